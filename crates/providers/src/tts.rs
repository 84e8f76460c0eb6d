//! 语音合成客户端
//!
//! 对接火山引擎 TTS HTTP v1 接口。长脚本按行切分为多段，逐段合成后拼接 mp3。

use std::sync::Arc;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::Client;
use serde_json::{json, Value};
use tracing::{debug, info};
use wordcast_core::config::TtsConfig;
use wordcast_core::errors::ProviderError;
use wordcast_core::ConfigManager;

use crate::http::{build_http_client, preview_payload, transport_error};

/// 合成成功的业务码
const SUCCESS_CODE: i64 = 3000;

/// 语音合成
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// 合成整段脚本，返回 mp3 字节
    async fn synthesize(&self, script: &str) -> Result<Vec<u8>, ProviderError>;
}

/// 火山引擎 TTS
pub struct VolcengineTts {
    client: Client,
    config: Arc<ConfigManager>,
}

impl VolcengineTts {
    pub fn new(config: Arc<ConfigManager>) -> Result<Self, ProviderError> {
        let client = build_http_client(None, 60)?;
        Ok(Self { client, config })
    }

    async fn synthesize_chunk(
        &self,
        tts: &TtsConfig,
        app_id: &str,
        token: &str,
        text: &str,
    ) -> Result<Vec<u8>, ProviderError> {
        let body = build_request_body(tts, app_id, token, text);
        let response = self
            .client
            .post(&tts.base_url)
            .header(AUTHORIZATION, format!("Bearer;{token}"))
            .header(CONTENT_TYPE, "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error("TTS 请求失败", e))?;

        let status = response.status();
        let payload = response
            .text()
            .await
            .map_err(|e| transport_error("TTS 响应读取失败", e))?;
        if !status.is_success() {
            return Err(ProviderError::Status {
                status: status.as_u16(),
                body: preview_payload(&payload),
            });
        }

        let value: Value = serde_json::from_str(&payload)
            .map_err(|e| ProviderError::Decode(format!("TTS 响应解析失败: {e}")))?;
        decode_audio(&value)
    }
}

#[async_trait]
impl SpeechSynthesizer for VolcengineTts {
    async fn synthesize(&self, script: &str) -> Result<Vec<u8>, ProviderError> {
        let tts = self.config.tts();
        let app_id = tts
            .app_id
            .clone()
            .filter(|v| !v.is_empty())
            .ok_or(ProviderError::NotConfigured("TTS_APP_ID"))?;
        let token = tts
            .access_token
            .clone()
            .filter(|v| !v.is_empty())
            .ok_or(ProviderError::NotConfigured("TTS_ACCESS_TOKEN"))?;

        let chunks = chunk_script(script, tts.max_chars);
        info!("[TTS] 开始合成，共 {} 段", chunks.len());

        let mut audio = Vec::new();
        for (index, chunk) in chunks.iter().enumerate() {
            debug!("[TTS] 合成第 {} 段 ({} 字符)", index + 1, chunk.chars().count());
            let bytes = self.synthesize_chunk(&tts, &app_id, &token, chunk).await?;
            audio.extend_from_slice(&bytes);
        }
        Ok(audio)
    }
}

/// 构建单段合成请求
pub fn build_request_body(tts: &TtsConfig, app_id: &str, token: &str, text: &str) -> Value {
    json!({
        "app": { "appid": app_id, "token": token, "cluster": tts.cluster },
        "user": { "uid": "wordcast" },
        "audio": {
            "voice_type": tts.voice_type,
            "encoding": "mp3",
            "speed_ratio": tts.speed_ratio,
        },
        "request": {
            "reqid": uuid::Uuid::new_v4().to_string(),
            "text": text,
            "text_type": "plain",
            "operation": "query",
        }
    })
}

/// 解出响应中的 base64 音频
pub fn decode_audio(value: &Value) -> Result<Vec<u8>, ProviderError> {
    let code = value.get("code").and_then(Value::as_i64).unwrap_or(-1);
    if code != SUCCESS_CODE {
        let message = value
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown error");
        return Err(ProviderError::Upstream(format!("TTS 合成失败 ({code}): {message}")));
    }
    let data = value
        .get("data")
        .and_then(Value::as_str)
        .filter(|data| !data.is_empty())
        .ok_or(ProviderError::EmptyResponse)?;
    STANDARD
        .decode(data)
        .map_err(|e| ProviderError::Decode(format!("音频数据解码失败: {e}")))
}

/// 按行切分脚本，每段不超过 `max_chars` 个字符
///
/// 单行超长时按字符硬切。空行被丢弃。
pub fn chunk_script(script: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;

    for line in script.lines().map(str::trim).filter(|line| !line.is_empty()) {
        let line_len = line.chars().count();

        if line_len > max_chars {
            if !current.is_empty() {
                chunks.push(std::mem::take(&mut current));
                current_len = 0;
            }
            let chars: Vec<char> = line.chars().collect();
            for piece in chars.chunks(max_chars) {
                chunks.push(piece.iter().collect());
            }
            continue;
        }

        let extra = if current.is_empty() { line_len } else { line_len + 1 };
        if current_len + extra > max_chars {
            chunks.push(std::mem::take(&mut current));
            current_len = 0;
        }
        if !current.is_empty() {
            current.push('\n');
            current_len += 1;
        }
        current.push_str(line);
        current_len += line_len;
    }

    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::HeaderMap, routing::post, Json, Router};
    use proptest::prelude::*;
    use wordcast_core::AppConfig;

    #[test]
    fn test_chunk_script_respects_lines() {
        let script = "Host: hello\nGuest: hi there\n\nHost: bye";
        assert_eq!(
            chunk_script(script, 30),
            vec!["Host: hello\nGuest: hi there", "Host: bye"]
        );
        assert_eq!(chunk_script("", 30), Vec::<String>::new());
    }

    #[test]
    fn test_chunk_script_splits_long_line() {
        let chunks = chunk_script(&"播".repeat(25), 10);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[2].chars().count(), 5);
    }

    #[test]
    fn test_decode_audio() {
        let ok = json!({ "code": 3000, "data": STANDARD.encode(b"ID3") });
        assert_eq!(decode_audio(&ok).unwrap(), b"ID3".to_vec());

        let failed = json!({ "code": 3001, "message": "invalid voice" });
        let err = decode_audio(&failed).unwrap_err();
        assert!(err.to_string().contains("invalid voice"));
    }

    #[tokio::test]
    async fn test_synthesize_concatenates_chunks() {
        let app = Router::new().route(
            "/tts",
            post(|headers: HeaderMap, Json(body): Json<Value>| async move {
                let auth = headers
                    .get("authorization")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("");
                if auth != "Bearer;tok" {
                    return Json(json!({ "code": 3001, "message": "bad auth" }));
                }
                let text = body["request"]["text"].as_str().unwrap_or("");
                Json(json!({ "code": 3000, "data": STANDARD.encode(text.as_bytes()) }))
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let mut config = AppConfig::default();
        config.tts.base_url = format!("http://{addr}/tts");
        config.tts.app_id = Some("app".to_string());
        config.tts.access_token = Some("tok".to_string());
        config.tts.max_chars = 5;
        let tts = VolcengineTts::new(Arc::new(ConfigManager::new(".", config))).unwrap();

        let audio = tts.synthesize("abc\ndef").await.unwrap();
        assert_eq!(audio, b"abcdef".to_vec());
    }

    #[tokio::test]
    async fn test_missing_credentials() {
        let tts = VolcengineTts::new(Arc::new(ConfigManager::new(".", AppConfig::default()))).unwrap();
        let err = tts.synthesize("hello").await.unwrap_err();
        assert!(matches!(err, ProviderError::NotConfigured("TTS_APP_ID")));
    }

    proptest! {
        #[test]
        fn prop_chunks_bounded(lines in prop::collection::vec("[a-z ]{0,40}", 0..20), max in 5usize..50) {
            let script = lines.join("\n");
            for chunk in chunk_script(&script, max) {
                prop_assert!(chunk.chars().count() <= max);
                prop_assert!(!chunk.is_empty());
            }
        }
    }
}
