//! 健康检查、配置与日志

use std::collections::BTreeMap;

use axum::{
    extract::{Query, State},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;
use wordcast_core::LogEntry;
use wordcast_server_utils::ApiResult;

use crate::AppState;

const DEFAULT_LOG_LIMIT: usize = 200;

pub async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "time": chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
    }))
}

/// 读取 `.env`，密钥类的值打码
pub async fn get_config(State(state): State<AppState>) -> ApiResult<Json<BTreeMap<String, String>>> {
    Ok(Json(state.config.env_file().read_masked()?))
}

/// 写入 `.env` 并立即生效
pub async fn update_config(
    State(state): State<AppState>,
    Json(body): Json<BTreeMap<String, Value>>,
) -> ApiResult<Json<Value>> {
    let updates: BTreeMap<String, String> = body
        .into_iter()
        .filter(|(key, _)| !key.trim().is_empty())
        .map(|(key, value)| {
            let value = match value {
                Value::String(s) => s,
                Value::Null => String::new(),
                other => other.to_string(),
            };
            (key, value)
        })
        .collect();
    let updated = state.config.update_env(&updates)?;
    info!("[Config] 已更新 {} 个配置项", updated);
    Ok(Json(json!({ "success": true, "updated": updated })))
}

#[derive(Debug, Deserialize)]
pub struct LogQuery {
    pub limit: Option<usize>,
}

pub async fn logs(State(state): State<AppState>, Query(query): Query<LogQuery>) -> Json<Vec<LogEntry>> {
    let limit = query.limit.unwrap_or(DEFAULT_LOG_LIMIT);
    Json(state.logs.read().recent(limit))
}

pub async fn test_gemini(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    Ok(Json(state.generation.probe().await?))
}
