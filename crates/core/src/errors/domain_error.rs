//! 业务领域错误类型
//!
//! 定义内容生产流程中的错误类型，包括：
//! - ProviderError（外部服务错误：Gemini、TTS、PocketBase、RSS）
//! - WorkflowError（工作流会话错误）
//! - DictionaryError（词典错误）
//! - PublishError（发布错误）
//! - PromptError（提示词文件错误）
//! - AudioError（音频合成错误）
//! - ConfigError（配置错误）
//!
//! 所有错误都能转换为 `String` 与 [`ApiError`]，序列化时输出纯文本。

use thiserror::Error;

use super::api_error::ApiError;

// ============================================================================
// 外部服务错误
// ============================================================================

/// 外部服务调用错误
#[derive(Error, Debug)]
pub enum ProviderError {
    /// 缺少必要配置
    #[error("{0} 未配置")]
    NotConfigured(&'static str),

    /// 网络请求失败
    #[error("请求失败: {0}")]
    Transport(String),

    /// 上游返回非成功状态码
    #[error("上游返回 HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// 上游返回业务错误信息
    #[error("{0}")]
    Upstream(String),

    /// 上游返回空响应
    #[error("上游返回空响应")]
    EmptyResponse,

    /// 响应解析失败
    #[error("响应解析失败: {0}")]
    Decode(String),

    /// 认证失败
    #[error("认证失败: {0}")]
    Auth(String),
}

impl ProviderError {
    /// 对应的 HTTP 状态码
    pub fn status_code(&self) -> u16 {
        match self {
            Self::NotConfigured(_) => 500,
            Self::Status { status, .. } if *status >= 400 => *status,
            Self::Auth(_) => 401,
            _ => 502,
        }
    }
}

// ============================================================================
// 工作流错误
// ============================================================================

/// 工作流会话错误
#[derive(Error, Debug)]
pub enum WorkflowError {
    /// 会话不存在
    #[error("会话不存在: {0}")]
    SessionNotFound(String),

    /// 步骤不存在
    #[error("步骤不存在: {0}")]
    StepNotFound(String),

    /// 步骤尚未解锁
    #[error("步骤尚未解锁: {0}")]
    StepLocked(String),

    /// 缺少前置输入
    #[error("缺少输入: {0}")]
    MissingInput(String),

    /// 上游输出无法使用
    #[error("输出无效: {0}")]
    InvalidOutput(String),

    /// 更新内容无法应用
    #[error("无效的更新: {0}")]
    InvalidPatch(String),

    /// 持久化失败
    #[error("持久化失败: {0}")]
    Persistence(String),

    /// 外部服务错误
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// 提示词读取失败
    #[error(transparent)]
    Prompt(#[from] PromptError),

    /// 音频合成失败
    #[error(transparent)]
    Audio(#[from] AudioError),

    /// 发布失败
    #[error(transparent)]
    Publish(#[from] PublishError),

    /// IO 错误
    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),

    /// 序列化错误
    #[error("序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl WorkflowError {
    pub fn status_code(&self) -> u16 {
        match self {
            Self::SessionNotFound(_) | Self::StepNotFound(_) => 404,
            Self::StepLocked(_) => 409,
            Self::MissingInput(_) | Self::InvalidPatch(_) => 400,
            Self::InvalidOutput(_) => 422,
            Self::Persistence(_) => 502,
            Self::Provider(err) => err.status_code(),
            Self::Prompt(err) => err.status_code(),
            Self::Audio(err) => err.status_code(),
            Self::Publish(err) => err.status_code(),
            Self::Io(_) | Self::Serialization(_) => 500,
        }
    }
}

// ============================================================================
// 词典错误
// ============================================================================

/// 本地词典错误
#[derive(Error, Debug)]
pub enum DictionaryError {
    /// 单词列表为空
    #[error("单词列表不能为空")]
    EmptyWords,

    /// 词条格式无效
    #[error("词条格式无效: {0}")]
    InvalidEntries(String),

    /// 模型输出无法解析
    #[error("词条生成结果无法解析: {0}")]
    InvalidOutput(String),

    /// 外部服务错误
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// IO 错误
    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),

    /// 词典文件解析失败
    #[error("词典文件解析失败: {0}")]
    Parse(#[from] serde_json::Error),
}

impl DictionaryError {
    pub fn status_code(&self) -> u16 {
        match self {
            Self::EmptyWords | Self::InvalidEntries(_) => 400,
            Self::InvalidOutput(_) => 502,
            Self::Provider(err) => err.status_code(),
            Self::Io(_) | Self::Parse(_) => 500,
        }
    }
}

// ============================================================================
// 发布错误
// ============================================================================

/// 文章发布与管理错误
#[derive(Error, Debug)]
pub enum PublishError {
    /// 负载无效
    #[error("发布内容无效: {0}")]
    InvalidPayload(String),

    /// 文章不存在
    #[error("文章不存在: {0}")]
    NotFound(String),

    /// 未配置 PocketBase
    #[error("{0} 未配置")]
    NotConfigured(&'static str),

    /// PocketBase 返回无法使用的结果
    #[error("{0}")]
    Upstream(String),

    /// 外部服务错误
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// IO 错误
    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),

    /// 序列化错误
    #[error("序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl PublishError {
    pub fn status_code(&self) -> u16 {
        match self {
            Self::InvalidPayload(_) | Self::NotConfigured(_) => 400,
            Self::NotFound(_) => 404,
            Self::Upstream(_) => 502,
            Self::Provider(err) => err.status_code(),
            Self::Io(_) | Self::Serialization(_) => 500,
        }
    }
}

// ============================================================================
// 提示词错误
// ============================================================================

/// 提示词与技能文件错误
#[derive(Error, Debug)]
pub enum PromptError {
    /// 未知的提示词键
    #[error("无效的提示词键: {0}")]
    UnknownKey(String),

    /// 技能名称非法
    #[error("无效的技能名称: {0}")]
    InvalidName(String),

    /// 内容为空
    #[error("内容不能为空")]
    MissingContent,

    /// IO 错误
    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),
}

impl PromptError {
    pub fn status_code(&self) -> u16 {
        match self {
            Self::UnknownKey(_) | Self::InvalidName(_) | Self::MissingContent => 400,
            Self::Io(_) => 500,
        }
    }
}

// ============================================================================
// 音频错误
// ============================================================================

/// 音频合成错误
#[derive(Error, Debug)]
pub enum AudioError {
    /// 脚本为空
    #[error("播客脚本不能为空")]
    EmptyScript,

    /// 外部服务错误
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// IO 错误
    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),
}

impl AudioError {
    pub fn status_code(&self) -> u16 {
        match self {
            Self::EmptyScript => 400,
            Self::Provider(err) => err.status_code(),
            Self::Io(_) => 500,
        }
    }
}

// ============================================================================
// 配置错误
// ============================================================================

/// 配置加载与写入错误
#[derive(Error, Debug)]
pub enum ConfigError {
    /// 配置值无效
    #[error("配置无效: {0}")]
    Invalid(String),

    /// IO 错误
    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),

    /// YAML 解析失败
    #[error("YAML 解析失败: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl ConfigError {
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Invalid(_) => 400,
            Self::Io(_) | Self::Yaml(_) => 500,
        }
    }
}

// ============================================================================
// 公共转换
// ============================================================================

macro_rules! impl_error_conversions {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for String {
                fn from(err: $ty) -> Self {
                    err.to_string()
                }
            }

            impl From<$ty> for ApiError {
                fn from(err: $ty) -> Self {
                    ApiError::from_status(err.status_code(), err.to_string())
                }
            }

            impl serde::Serialize for $ty {
                fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
                where
                    S: serde::Serializer,
                {
                    serializer.serialize_str(&self.to_string())
                }
            }
        )*
    };
}

impl_error_conversions!(
    ProviderError,
    WorkflowError,
    DictionaryError,
    PublishError,
    PromptError,
    AudioError,
    ConfigError,
);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ApiErrorCode;

    #[test]
    fn test_provider_status_mapping() {
        let err = ProviderError::Status {
            status: 403,
            body: "forbidden".to_string(),
        };
        assert_eq!(err.status_code(), 403);
        assert_eq!(ProviderError::EmptyResponse.status_code(), 502);
        assert_eq!(ProviderError::NotConfigured("GEMINI_API_KEY").status_code(), 500);
    }

    #[test]
    fn test_workflow_error_to_api_error() {
        let api: ApiError = WorkflowError::SessionNotFound("abc".to_string()).into();
        assert_eq!(api.status, 404);
        assert_eq!(api.code, ApiErrorCode::NotFound);
        assert_eq!(api.message, "会话不存在: abc");
    }

    #[test]
    fn test_not_configured_inferred() {
        let api: ApiError = ProviderError::NotConfigured("GEMINI_API_KEY").into();
        assert_eq!(api.code, ApiErrorCode::NotConfigured);
    }

    #[test]
    fn test_serialize_as_plain_string() {
        let value = serde_json::to_value(DictionaryError::EmptyWords).unwrap();
        assert_eq!(value, serde_json::json!("单词列表不能为空"));
    }

    #[test]
    fn test_nested_provider_error_keeps_status() {
        let err = WorkflowError::from(ProviderError::Auth("bad token".to_string()));
        assert_eq!(err.status_code(), 401);
        assert_eq!(String::from(err), "认证失败: bad token");
    }
}
