//! `workflow_sessions` 集合的原始记录透传
//!
//! 优先使用调用方的 `Authorization` 头，被拒绝时改用服务端令牌重试。

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use reqwest::Method;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};
use wordcast_providers::PbResponse;
use wordcast_services::workflow::SESSIONS_COLLECTION;
use wordcast_server_utils::{authorization_header, passthrough_response, ApiResult};

use crate::AppState;

const LIST_PAGE_SIZE: &str = "200";

fn records_path(id: Option<&str>) -> String {
    match id {
        Some(id) => format!("/api/collections/{SESSIONS_COLLECTION}/records/{id}"),
        None => format!("/api/collections/{SESSIONS_COLLECTION}/records"),
    }
}

/// 上游失败时把响应体作为错误文案返回
fn upstream_error(response: PbResponse) -> Response {
    let message = match response.body {
        Value::String(text) => text,
        Value::Null => String::new(),
        other => other.to_string(),
    };
    passthrough_response(response.status, json!({ "error": message }))
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub sort: Option<String>,
}

pub async fn list(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ListQuery>,
) -> ApiResult<Response> {
    let client_token = authorization_header(&headers);
    debug!("[WorkflowSessions] 客户端令牌: {}", client_token.is_some());

    let path = records_path(None);
    let mut params = vec![("perPage", LIST_PAGE_SIZE.to_string())];
    if let Some(sort) = query.sort.as_ref().filter(|s| !s.is_empty()) {
        params.push(("sort", sort.clone()));
    }
    let mut response = state
        .pocketbase
        .proxy_with_client_token(Method::GET, &path, &params, None, client_token.as_deref())
        .await?;

    // 排序字段无效时去掉查询参数再试一次
    if response.status == 400 && params.len() > 1 {
        warn!("[WorkflowSessions] 排序参数被拒绝，去掉排序重试");
        response = state
            .pocketbase
            .proxy_with_client_token(Method::GET, &path, &params[..1], None, client_token.as_deref())
            .await?;
    }

    if !response.is_success() {
        return Ok(upstream_error(response));
    }
    let items = response.body.get("items").cloned().unwrap_or_else(|| json!([]));
    Ok(Json(json!({ "items": items })).into_response())
}

pub async fn create(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> ApiResult<Response> {
    let client_token = authorization_header(&headers);
    let response = state
        .pocketbase
        .proxy_with_client_token(Method::POST, &records_path(None), &[], Some(&body), client_token.as_deref())
        .await?;
    if !response.is_success() {
        return Ok(upstream_error(response));
    }
    Ok(Json(response.body).into_response())
}

pub async fn update(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> ApiResult<Response> {
    let client_token = authorization_header(&headers);
    let response = state
        .pocketbase
        .proxy_with_client_token(
            Method::PATCH,
            &records_path(Some(&id)),
            &[],
            Some(&body),
            client_token.as_deref(),
        )
        .await?;
    if !response.is_success() {
        return Ok(upstream_error(response));
    }
    Ok(Json(response.body).into_response())
}

pub async fn remove(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    let client_token = authorization_header(&headers);
    let response = state
        .pocketbase
        .proxy_with_client_token(Method::DELETE, &records_path(Some(&id)), &[], None, client_token.as_deref())
        .await?;
    if !response.is_success() {
        return Ok(upstream_error(response));
    }
    Ok(StatusCode::NO_CONTENT.into_response())
}
