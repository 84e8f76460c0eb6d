//! 工作流会话与步骤操作

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use wordcast_services::workflow::{ContextField, ContextPatch, SessionPatch, StepId, WorkflowSession};
use wordcast_services::{StepCommand, StepOutcome};
use wordcast_server_utils::ApiResult;

use super::parse_body;
use crate::AppState;

pub async fn list(State(state): State<AppState>) -> Json<Value> {
    let sessions = state.manager.list_sessions().await;
    let active_id = state.manager.active_id().await;
    Json(json!({ "sessions": sessions, "activeId": active_id }))
}

#[derive(Debug, Default, Deserialize)]
pub struct CreateBody {
    pub title: Option<String>,
}

pub async fn create(State(state): State<AppState>, body: Option<Json<CreateBody>>) -> Json<WorkflowSession> {
    let title = body.and_then(|Json(body)| body.title);
    Json(state.manager.create_session(title).await)
}

pub async fn get(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Json<WorkflowSession>> {
    Ok(Json(state.manager.get_session(&id).await?))
}

pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(patch): Json<SessionPatch>,
) -> ApiResult<Json<WorkflowSession>> {
    Ok(Json(state.manager.update_session(&id, patch).await?))
}

pub async fn remove(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Json<Value>> {
    state.manager.delete_session(&id).await?;
    Ok(Json(json!({ "success": true })))
}

pub async fn switch(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Json<WorkflowSession>> {
    Ok(Json(state.manager.switch_session(&id).await?))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepAction {
    Start,
    Complete,
    Fail,
    Goto,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct StepBody {
    /// complete 时写入的上下文
    pub context: Option<ContextPatch>,
    /// fail 时的错误信息
    pub error: Option<String>,
}

pub async fn step_action(
    State(state): State<AppState>,
    Path((id, step, action)): Path<(String, StepId, StepAction)>,
    body: Option<Json<StepBody>>,
) -> ApiResult<Json<WorkflowSession>> {
    let body = body.map(|Json(body)| body).unwrap_or_default();
    let manager = &state.manager;
    let session = match action {
        StepAction::Start => manager.start_step(&id, step).await?,
        StepAction::Complete => {
            manager
                .complete_step(&id, step, body.context.unwrap_or_default())
                .await?
        }
        StepAction::Fail => {
            let message = body.error.unwrap_or_else(|| "步骤执行失败".to_string());
            manager.fail_step(&id, step, message).await?
        }
        StepAction::Goto => manager.go_to_step(&id, step).await?,
    };
    Ok(Json(session))
}

pub async fn regenerate(
    State(state): State<AppState>,
    Path((id, field)): Path<(String, ContextField)>,
) -> ApiResult<Json<WorkflowSession>> {
    Ok(Json(state.manager.regenerate_field(&id, field).await?))
}

pub async fn flush(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Json<Value>> {
    let flushed = state.manager.flush(&id).await?;
    Ok(Json(json!({ "success": true, "flushed": flushed })))
}

pub async fn rewrite_step(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Json<WorkflowSession>> {
    Ok(Json(state.manager.insert_rewrite_step(&id).await?))
}

/// 执行步骤操作，请求体为操作参数
pub async fn run(
    State(state): State<AppState>,
    Path((id, operation)): Path<(String, String)>,
    body: Option<Json<Value>>,
) -> ApiResult<Json<StepOutcome>> {
    let mut params = match body {
        Some(Json(Value::Object(map))) => map,
        _ => Map::new(),
    };
    params.insert("operation".to_string(), Value::String(operation));
    let command: StepCommand = parse_body(Value::Object(params))?;
    Ok(Json(state.executor.execute(&id, command).await?))
}
