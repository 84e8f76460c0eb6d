//! 错误类型模块
//!
//! 定义 Wordcast 后端中的各种错误类型。
//!
//! ## 模块结构
//! - `api_error`: HTTP 层统一错误模型（ApiErrorCode, ApiError）
//! - `domain_error`: 业务领域错误（ProviderError, WorkflowError, DictionaryError 等）

pub mod api_error;
pub mod domain_error;

pub use api_error::{ApiError, ApiErrorCode};
pub use domain_error::{
    AudioError, ConfigError, DictionaryError, PromptError, ProviderError, PublishError,
    WorkflowError,
};
