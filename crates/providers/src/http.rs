//! HTTP 客户端工具

use std::time::Duration;

use reqwest::Client;
use wordcast_core::errors::ProviderError;

const USER_AGENT: &str = concat!("wordcast/", env!("CARGO_PKG_VERSION"));

/// 创建 HTTP 客户端
///
/// # 参数
///
/// * `proxy` - 可选的 HTTPS 代理地址
/// * `timeout_secs` - 请求超时（秒）
pub fn build_http_client(proxy: Option<&str>, timeout_secs: u64) -> Result<Client, ProviderError> {
    let mut builder = Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .user_agent(USER_AGENT);

    if let Some(proxy_url) = proxy.map(str::trim).filter(|p| !p.is_empty()) {
        let proxy = reqwest::Proxy::all(proxy_url)
            .map_err(|e| ProviderError::Transport(format!("代理地址无效: {e}")))?;
        tracing::info!("[HTTP] 使用代理: {}", proxy_url);
        builder = builder.proxy(proxy);
    }

    builder
        .build()
        .map_err(|e| ProviderError::Transport(format!("创建 HTTP 客户端失败: {e}")))
}

/// 截断过长的响应体，用于错误信息
pub fn preview_payload(payload: &str) -> String {
    const MAX_CHARS: usize = 400;
    let trimmed = payload.trim();
    if trimmed.chars().count() <= MAX_CHARS {
        return trimmed.to_string();
    }
    let head: String = trimmed.chars().take(MAX_CHARS).collect();
    format!("{head}...")
}

pub(crate) fn transport_error(context: &str, error: reqwest::Error) -> ProviderError {
    if error.is_timeout() {
        ProviderError::Transport(format!("{context}: 请求超时 (timeout)"))
    } else {
        ProviderError::Transport(format!("{context}: {error}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preview_payload_truncates_on_char_boundary() {
        let long = "词".repeat(500);
        let preview = preview_payload(&long);
        assert!(preview.ends_with("..."));
        assert_eq!(preview.chars().count(), 403);
        assert_eq!(preview_payload("  short  "), "short");
    }

    #[test]
    fn test_invalid_proxy_rejected() {
        assert!(build_http_client(Some("::not a url::"), 5).is_err());
        assert!(build_http_client(Some("  "), 5).is_ok());
    }
}
