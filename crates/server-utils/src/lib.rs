//! 服务器工具函数 crate
//!
//! 包含错误响应构建、透传响应与请求头解析等公共工具函数。

use axum::{
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::Value;
use tracing::{error, warn};
use wordcast_core::errors::{ApiError, ApiErrorCode};

/// 从错误信息中解析 HTTP 状态码
pub fn parse_error_status_code(error_message: &str) -> StatusCode {
    if error_message.contains("429") {
        StatusCode::TOO_MANY_REQUESTS
    } else if error_message.contains("403") {
        StatusCode::FORBIDDEN
    } else if error_message.contains("401") {
        StatusCode::UNAUTHORIZED
    } else if error_message.contains("404") {
        StatusCode::NOT_FOUND
    } else if error_message.contains("400") {
        StatusCode::BAD_REQUEST
    } else if error_message.contains("503") {
        StatusCode::SERVICE_UNAVAILABLE
    } else if error_message.contains("502") {
        StatusCode::BAD_GATEWAY
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    }
}

/// 构建错误响应，状态码从错误信息推断
pub fn build_error_response(error_message: &str) -> Response {
    let status_code = parse_error_status_code(error_message);
    build_error_response_with_status(status_code.as_u16(), error_message)
}

/// 从 HTTP 状态码构建错误响应
pub fn build_error_response_with_status(status_code: u16, error_message: &str) -> Response {
    build_api_error_response(ApiError::from_status(status_code, error_message))
}

/// 构建统一错误 JSON
pub fn build_api_error_json(error: &ApiError) -> Value {
    serde_json::to_value(error).unwrap_or_else(|_| {
        serde_json::json!({
            "error": "序列化错误响应失败",
            "code": ApiErrorCode::InternalError,
            "retryable": false
        })
    })
}

pub fn build_api_error_response(error: ApiError) -> Response {
    let status = StatusCode::from_u16(error.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    if status.is_server_error() {
        error!("[API] {} {}", status.as_u16(), error.message);
    } else {
        warn!("[API] {} {}", status.as_u16(), error.message);
    }
    (status, Json(build_api_error_json(&error))).into_response()
}

/// handler 的统一错误类型
///
/// 任何可以转换为 `ApiError` 的领域错误都能通过 `?` 直接返回。
#[derive(Debug)]
pub struct HandlerError(pub ApiError);

impl<E> From<E> for HandlerError
where
    E: Into<ApiError>,
{
    fn from(error: E) -> Self {
        Self(error.into())
    }
}

impl IntoResponse for HandlerError {
    fn into_response(self) -> Response {
        build_api_error_response(self.0)
    }
}

pub type ApiResult<T> = Result<T, HandlerError>;

/// 原样透传上游的状态码与 JSON
pub fn passthrough_response(status: u16, body: Value) -> Response {
    let status = StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY);
    (status, Json(body)).into_response()
}

/// 读取请求中的 `Authorization` 头
pub fn authorization_header(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToString::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn body_json(response: Response) -> (StatusCode, Value) {
        let (parts, body) = response.into_parts();
        let rt = tokio::runtime::Runtime::new().expect("runtime");
        let bytes = rt
            .block_on(async { axum::body::to_bytes(body, usize::MAX).await })
            .expect("bytes");
        (parts.status, serde_json::from_slice(&bytes).expect("json"))
    }

    #[test]
    fn test_parse_error_status_code() {
        assert_eq!(parse_error_status_code("HTTP 429 rate"), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(parse_error_status_code("status 404"), StatusCode::NOT_FOUND);
        assert_eq!(parse_error_status_code("boom"), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_error_response_is_flat() {
        let (status, json) = body_json(build_error_response_with_status(503, "PocketBase down"));
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(json["error"], "PocketBase down");
        assert_eq!(json["code"], "UPSTREAM_UNAVAILABLE");
        assert_eq!(json["retryable"], true);
    }

    #[test]
    fn test_handler_error_from_domain_error() {
        let err: HandlerError = wordcast_core::errors::WorkflowError::SessionNotFound("s1".into()).into();
        let (status, json) = body_json(err.into_response());
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json["code"], "NOT_FOUND");
        assert!(json["error"].as_str().unwrap().contains("s1"));
    }

    #[test]
    fn test_authorization_header() {
        let mut headers = HeaderMap::new();
        assert_eq!(authorization_header(&headers), None);
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer abc"));
        assert_eq!(authorization_header(&headers).as_deref(), Some("Bearer abc"));
    }
}
