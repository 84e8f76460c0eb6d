//! 新闻选题与音频合成

use axum::{extract::State, Json};
use serde::Deserialize;
use wordcast_services::{NewsScan, SynthesizedAudio};
use wordcast_server_utils::ApiResult;

use crate::AppState;

pub async fn scan_news(State(state): State<AppState>) -> Json<NewsScan> {
    Json(state.news.scan().await)
}

#[derive(Debug, Deserialize)]
pub struct SynthesizeBody {
    #[serde(default)]
    pub script: String,
}

pub async fn synthesize(
    State(state): State<AppState>,
    Json(body): Json<SynthesizeBody>,
) -> ApiResult<Json<SynthesizedAudio>> {
    Ok(Json(state.audio.synthesize(&body.script).await?))
}
