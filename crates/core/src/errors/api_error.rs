//! HTTP 层统一错误模型
//!
//! 为后端 API 提供稳定的错误语义，错误文案始终是纯字符串，
//! 同时携带错误码与是否可重试标记，便于前端统一处理。

use serde::{Deserialize, Serialize};

/// API 错误码
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApiErrorCode {
    InvalidRequest,
    NotFound,
    AuthenticationFailed,
    RequestConflict,
    RateLimited,
    NotConfigured,
    UpstreamTimeout,
    UpstreamUnavailable,
    UpstreamError,
    InternalError,
}

impl ApiErrorCode {
    /// 根据状态码和错误消息推断错误码
    pub fn infer(status_code: u16, message: &str) -> Self {
        let normalized = message.to_lowercase();

        if normalized.contains("not configured") || normalized.contains("未配置") {
            return Self::NotConfigured;
        }

        if normalized.contains("timeout")
            || normalized.contains("timed out")
            || normalized.contains("超时")
        {
            return Self::UpstreamTimeout;
        }

        if normalized.contains("rate limit")
            || normalized.contains("too many requests")
            || normalized.contains("请求过于频繁")
        {
            return Self::RateLimited;
        }

        match status_code {
            400 | 422 => Self::InvalidRequest,
            404 => Self::NotFound,
            401 | 403 => Self::AuthenticationFailed,
            409 => Self::RequestConflict,
            429 => Self::RateLimited,
            408 | 504 => Self::UpstreamTimeout,
            502 | 503 => Self::UpstreamUnavailable,
            501 | 505..=599 => Self::UpstreamError,
            _ => Self::InternalError,
        }
    }

    /// 默认错误文案
    pub fn default_message(self) -> &'static str {
        match self {
            Self::InvalidRequest => "请求参数无效",
            Self::NotFound => "资源不存在",
            Self::AuthenticationFailed => "认证失败",
            Self::RequestConflict => "请求冲突",
            Self::RateLimited => "请求过于频繁，请稍后重试",
            Self::NotConfigured => "服务未配置",
            Self::UpstreamTimeout => "上游请求超时",
            Self::UpstreamUnavailable => "上游服务暂不可用",
            Self::UpstreamError => "上游服务返回错误",
            Self::InternalError => "服务内部错误",
        }
    }

    /// 是否可重试
    ///
    /// 仅作为提示返回给调用方，后端从不自动重试。
    pub fn retryable(self) -> bool {
        matches!(
            self,
            Self::RateLimited
                | Self::UpstreamTimeout
                | Self::UpstreamUnavailable
                | Self::UpstreamError
        )
    }
}

/// API 错误详情
///
/// 序列化为扁平结构：`{"error": "...", "code": "...", "retryable": bool}`。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    #[serde(skip, default = "default_status")]
    pub status: u16,
    #[serde(rename = "error")]
    pub message: String,
    pub code: ApiErrorCode,
    pub retryable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upstream: Option<String>,
}

fn default_status() -> u16 {
    500
}

impl ApiError {
    /// 创建错误详情
    pub fn new(status: u16, code: ApiErrorCode, message: impl Into<String>) -> Self {
        let message = message.into();
        let final_message = if message.trim().is_empty() {
            code.default_message().to_string()
        } else {
            message
        };

        Self {
            status,
            message: final_message,
            code,
            retryable: code.retryable(),
            upstream: None,
        }
    }

    /// 根据 HTTP 状态码推断错误码并创建
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        let code = ApiErrorCode::infer(status, &message);
        Self::new(status, code, message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(400, ApiErrorCode::InvalidRequest, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(404, ApiErrorCode::NotFound, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(500, ApiErrorCode::InternalError, message)
    }

    /// 设置上游服务名
    pub fn with_upstream(mut self, upstream: Option<&str>) -> Self {
        self.upstream = upstream.map(ToString::to_string);
        self
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ApiError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_infer_not_configured() {
        let code = ApiErrorCode::infer(500, "GEMINI_API_KEY 未配置");
        assert_eq!(code, ApiErrorCode::NotConfigured);
        assert!(!code.retryable());
    }

    #[test]
    fn test_infer_by_status() {
        assert_eq!(ApiErrorCode::infer(404, "x"), ApiErrorCode::NotFound);
        assert_eq!(ApiErrorCode::infer(401, "x"), ApiErrorCode::AuthenticationFailed);
        assert_eq!(ApiErrorCode::infer(502, "x"), ApiErrorCode::UpstreamUnavailable);
        assert_eq!(ApiErrorCode::infer(418, "x"), ApiErrorCode::InternalError);
    }

    #[test]
    fn test_retryable_codes() {
        assert!(ApiErrorCode::RateLimited.retryable());
        assert!(ApiErrorCode::UpstreamTimeout.retryable());
        assert!(!ApiErrorCode::InvalidRequest.retryable());
    }

    #[test]
    fn test_empty_message_falls_back_to_default() {
        let err = ApiError::new(400, ApiErrorCode::InvalidRequest, "  ");
        assert_eq!(err.message, "请求参数无效");
    }

    #[test]
    fn test_serialize_flat_shape() {
        let err = ApiError::from_status(502, "upstream failed").with_upstream(Some("gemini"));
        let value = serde_json::to_value(&err).unwrap();

        assert_eq!(value["error"], "upstream failed");
        assert_eq!(value["code"], "UPSTREAM_UNAVAILABLE");
        assert_eq!(value["retryable"], true);
        assert_eq!(value["upstream"], "gemini");
        assert!(value.get("status").is_none());
    }
}
