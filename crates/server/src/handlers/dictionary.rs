//! 本地词典

use axum::{extract::State, Json};
use serde::Deserialize;
use serde_json::{json, Value};
use wordcast_core::errors::DictionaryError;
use wordcast_services::dictionary_service::{AddResult, DictionaryScan, DictionaryStats};
use wordcast_server_utils::ApiResult;

use crate::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanBody {
    pub article_json: Option<Value>,
}

pub async fn scan(State(state): State<AppState>, Json(body): Json<ScanBody>) -> ApiResult<Json<DictionaryScan>> {
    let article = body
        .article_json
        .filter(|article| !article.is_null())
        .ok_or_else(|| DictionaryError::InvalidEntries("Missing articleJson".to_string()))?;
    Ok(Json(state.dictionary.scan(&article).await?))
}

#[derive(Debug, Deserialize)]
pub struct GenerateBody {
    #[serde(default)]
    pub words: Vec<String>,
}

pub async fn generate(State(state): State<AppState>, Json(body): Json<GenerateBody>) -> ApiResult<Json<Value>> {
    let outcome = state.dictionary.generate(&body.words).await?;
    Ok(Json(outcome.into_value()))
}

#[derive(Debug, Deserialize)]
pub struct AddBody {
    #[serde(default)]
    pub entries: Value,
}

pub async fn add(State(state): State<AppState>, Json(body): Json<AddBody>) -> ApiResult<Json<AddResult>> {
    Ok(Json(state.dictionary.add(&body.entries).await?))
}

pub async fn stats(State(state): State<AppState>) -> ApiResult<Json<DictionaryStats>> {
    Ok(Json(state.dictionary.stats().await?))
}

/// 完整词典
pub async fn dump(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let dictionary = state.dictionary.load().await?;
    let count = dictionary.len();
    Ok(Json(json!({ "dictionary": dictionary, "count": count })))
}
