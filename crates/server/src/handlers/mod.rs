//! API handlers

pub mod database;
pub mod dictionary;
pub mod generation;
pub mod media;
pub mod prompts;
pub mod sessions;
pub mod system;
pub mod workflow_sessions;

use serde::de::DeserializeOwned;
use serde_json::Value;
use wordcast_core::errors::ApiError;

/// 把 JSON 请求体解析为具体类型，失败时返回 400
pub(crate) fn parse_body<T: DeserializeOwned>(body: Value) -> Result<T, ApiError> {
    serde_json::from_value(body).map_err(|e| ApiError::bad_request(format!("请求参数无效: {e}")))
}
