//! 文章、研究、词汇表与播客脚本生成
//!
//! 模型输出无法解析为 JSON 时仍返回 200，响应体为 `{error, raw}`。

use axum::{extract::State, Json};
use serde::Deserialize;
use serde_json::{json, Value};
use wordcast_core::errors::ApiError;
use wordcast_services::{GenerateRequest, ResearchRequest};
use wordcast_server_utils::ApiResult;

use crate::AppState;

pub async fn generate(
    State(state): State<AppState>,
    Json(request): Json<GenerateRequest>,
) -> ApiResult<Json<Value>> {
    let outcome = state.generation.generate_article(&request).await?;
    Ok(Json(outcome.into_value()))
}

pub async fn research(
    State(state): State<AppState>,
    Json(request): Json<ResearchRequest>,
) -> ApiResult<Json<Value>> {
    let outcome = state.generation.research(&request).await?;
    Ok(Json(outcome.into_value()))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArticleBody {
    pub article_json: Option<Value>,
    pub glossary: Option<Value>,
}

impl ArticleBody {
    fn article(&self) -> Result<&Value, ApiError> {
        self.article_json
            .as_ref()
            .filter(|article| !article.is_null())
            .ok_or_else(|| ApiError::bad_request("Missing articleJson"))
    }
}

pub async fn vocabulary(
    State(state): State<AppState>,
    Json(body): Json<ArticleBody>,
) -> ApiResult<Json<Value>> {
    let outcome = state.generation.vocabulary(body.article()?).await?;
    Ok(Json(outcome.into_value()))
}

pub async fn podcast_script(
    State(state): State<AppState>,
    Json(body): Json<ArticleBody>,
) -> ApiResult<Json<Value>> {
    let script = state
        .generation
        .podcast_script(body.article()?, body.glossary.as_ref())
        .await?;
    Ok(Json(json!({ "script": script })))
}
