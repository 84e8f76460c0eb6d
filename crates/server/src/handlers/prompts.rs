//! 提示词与技能文件

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use wordcast_services::prompt_store::Skill;
use wordcast_services::PromptKey;
use wordcast_server_utils::ApiResult;

use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct PromptQuery {
    #[serde(default)]
    pub key: String,
}

pub async fn get_prompt(
    State(state): State<AppState>,
    Query(query): Query<PromptQuery>,
) -> ApiResult<Json<Value>> {
    let key: PromptKey = query.key.parse()?;
    let content = state.generation.prompts().read(key).await?;
    Ok(Json(json!({ "content": content })))
}

#[derive(Debug, Deserialize)]
pub struct PromptUpdate {
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub content: String,
}

pub async fn update_prompt(
    State(state): State<AppState>,
    Json(body): Json<PromptUpdate>,
) -> ApiResult<Json<Value>> {
    let key: PromptKey = body.key.parse()?;
    state.generation.prompts().write(key, &body.content).await?;
    Ok(Json(json!({ "success": true })))
}

pub async fn list_skills(State(state): State<AppState>) -> ApiResult<Json<Vec<Skill>>> {
    Ok(Json(state.generation.prompts().list_skills().await?))
}

#[derive(Debug, Deserialize)]
pub struct SkillUpdate {
    #[serde(default)]
    pub content: String,
}

pub async fn update_skill(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(body): Json<SkillUpdate>,
) -> ApiResult<Json<Value>> {
    state.generation.prompts().update_skill(&name, &body.content).await?;
    Ok(Json(json!({ "success": true })))
}
