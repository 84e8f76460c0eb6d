//! Gemini 文本生成客户端
//!
//! 通过 `generateContent` 接口调用模型，可选开启 Google Search grounding。

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};
use wordcast_core::errors::ProviderError;
use wordcast_core::ConfigManager;

use crate::http::{build_http_client, preview_payload, transport_error};

/// 生成参数
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationOptions {
    pub temperature: f32,
    /// 要求模型输出 `application/json`
    pub json_response: bool,
    /// 开启 Google Search grounding
    pub google_search: bool,
}

impl GenerationOptions {
    pub fn json(temperature: f32) -> Self {
        Self {
            temperature,
            json_response: true,
            google_search: false,
        }
    }

    pub fn text(temperature: f32) -> Self {
        Self {
            temperature,
            json_response: false,
            google_search: false,
        }
    }

    pub fn with_search(mut self) -> Self {
        self.google_search = true;
        self
    }
}

/// grounding 引用来源
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroundingSource {
    pub title: String,
    pub url: String,
}

/// 生成结果
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Generation {
    pub text: String,
    pub sources: Vec<GroundingSource>,
    pub search_queries: Vec<String>,
}

impl Generation {
    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }
}

/// 文本生成模型
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn generate(
        &self,
        model: &str,
        prompt: &str,
        options: &GenerationOptions,
    ) -> Result<Generation, ProviderError>;

    /// 连通性测试，返回上游原始响应
    async fn probe(&self) -> Result<Value, ProviderError>;
}

/// Gemini REST 客户端
pub struct GeminiClient {
    client: Client,
    config: Arc<ConfigManager>,
}

impl GeminiClient {
    pub fn new(config: Arc<ConfigManager>) -> Result<Self, ProviderError> {
        let gemini = config.gemini();
        let client = build_http_client(gemini.proxy.as_deref(), gemini.timeout_secs)?;
        Ok(Self { client, config })
    }

    fn endpoint(&self, model: &str) -> Result<(String, String), ProviderError> {
        let gemini = self.config.gemini();
        let api_key = gemini
            .api_key
            .filter(|key| !key.trim().is_empty())
            .ok_or(ProviderError::NotConfigured("GEMINI_API_KEY"))?;
        let url = format!(
            "{}/models/{}:generateContent",
            gemini.base_url.trim_end_matches('/'),
            model
        );
        Ok((url, api_key))
    }

    async fn post(&self, model: &str, body: &Value) -> Result<Value, ProviderError> {
        let (url, api_key) = self.endpoint(model)?;
        debug!("[Gemini] 请求模型: {}", model);

        let response = self
            .client
            .post(&url)
            .query(&[("key", api_key.as_str())])
            .header(CONTENT_TYPE, "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| transport_error("Gemini 请求失败", e))?;

        let status = response.status();
        let payload = response
            .text()
            .await
            .map_err(|e| transport_error("Gemini 响应读取失败", e))?;

        let value: Value = match serde_json::from_str(&payload) {
            Ok(value) => value,
            Err(_) if !status.is_success() => {
                return Err(ProviderError::Status {
                    status: status.as_u16(),
                    body: preview_payload(&payload),
                })
            }
            Err(e) => return Err(ProviderError::Decode(format!("Gemini 响应解析失败: {e}"))),
        };

        if let Some(message) = value
            .get("error")
            .and_then(|error| error.get("message"))
            .and_then(Value::as_str)
        {
            warn!("[Gemini] 上游错误: {}", message);
            return Err(ProviderError::Upstream(message.to_string()));
        }

        if !status.is_success() {
            return Err(ProviderError::Status {
                status: status.as_u16(),
                body: preview_payload(&payload),
            });
        }

        Ok(value)
    }
}

#[async_trait]
impl LanguageModel for GeminiClient {
    async fn generate(
        &self,
        model: &str,
        prompt: &str,
        options: &GenerationOptions,
    ) -> Result<Generation, ProviderError> {
        let body = build_request_body(prompt, options);
        let value = self.post(model, &body).await?;
        parse_generate_response(&value)
    }

    async fn probe(&self) -> Result<Value, ProviderError> {
        let model = self.config.gemini().article_model;
        let body = json!({
            "contents": [{ "parts": [{ "text": "Hello! Reply with 'Gemini is Online'." }] }]
        });
        self.post(&model, &body).await
    }
}

/// 构建 `generateContent` 请求体
pub fn build_request_body(prompt: &str, options: &GenerationOptions) -> Value {
    let mut generation_config = json!({ "temperature": options.temperature });
    if options.json_response {
        generation_config["responseMimeType"] = json!("application/json");
    }

    let mut body = json!({
        "contents": [{ "role": "user", "parts": [{ "text": prompt }] }],
        "generationConfig": generation_config,
    });
    if options.google_search {
        body["tools"] = json!([{ "googleSearch": {} }]);
    }
    body
}

/// 解析 `generateContent` 响应
pub fn parse_generate_response(value: &Value) -> Result<Generation, ProviderError> {
    let candidate = value.get("candidates").and_then(|c| c.get(0));

    let text = candidate
        .and_then(|c| c.pointer("/content/parts/0/text"))
        .and_then(Value::as_str)
        .filter(|text| !text.is_empty())
        .ok_or(ProviderError::EmptyResponse)?;

    let grounding = candidate.and_then(|c| c.get("groundingMetadata"));

    let search_queries = grounding
        .and_then(|g| g.get("webSearchQueries"))
        .and_then(Value::as_array)
        .map(|queries| {
            queries
                .iter()
                .filter_map(Value::as_str)
                .map(ToString::to_string)
                .collect()
        })
        .unwrap_or_default();

    let sources = grounding
        .and_then(|g| g.get("groundingChunks"))
        .and_then(Value::as_array)
        .map(|chunks| {
            chunks
                .iter()
                .filter_map(|chunk| {
                    let web = chunk.get("web")?;
                    let url = web.get("uri").and_then(Value::as_str).unwrap_or("");
                    if url.is_empty() {
                        return None;
                    }
                    Some(GroundingSource {
                        title: web
                            .get("title")
                            .and_then(Value::as_str)
                            .unwrap_or("Unknown")
                            .to_string(),
                        url: url.to_string(),
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    Ok(Generation {
        text: text.to_string(),
        sources,
        search_queries,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{extract::Query, routing::post, Json, Router};
    use std::collections::HashMap;
    use wordcast_core::AppConfig;

    #[test]
    fn test_request_body_flags() {
        let body = build_request_body("hi", &GenerationOptions::json(0.3).with_search());
        assert_eq!(body["generationConfig"]["responseMimeType"], "application/json");
        assert_eq!(body["tools"][0]["googleSearch"], json!({}));
        assert_eq!(body["contents"][0]["parts"][0]["text"], "hi");

        let plain = build_request_body("hi", &GenerationOptions::text(0.7));
        assert!(plain.get("tools").is_none());
        assert!(plain["generationConfig"].get("responseMimeType").is_none());
    }

    #[test]
    fn test_parse_grounding_metadata() {
        let value = json!({
            "candidates": [{
                "content": { "parts": [{ "text": "{\"summary\":\"s\"}" }] },
                "groundingMetadata": {
                    "webSearchQueries": ["tariff news"],
                    "groundingChunks": [
                        { "web": { "title": "Reuters", "uri": "https://reuters.com/a" } },
                        { "web": { "uri": "https://example.com/b" } },
                        { "web": { "title": "No url" } }
                    ]
                }
            }]
        });
        let generation = parse_generate_response(&value).unwrap();
        assert_eq!(generation.search_queries, vec!["tariff news"]);
        assert_eq!(generation.sources.len(), 2);
        assert_eq!(generation.sources[1].title, "Unknown");
    }

    #[test]
    fn test_parse_empty_candidates() {
        let err = parse_generate_response(&json!({ "candidates": [] })).unwrap_err();
        assert!(matches!(err, ProviderError::EmptyResponse));
    }

    async fn spawn_fake_gemini() -> String {
        let app = Router::new().route(
            "/v1beta/models/:model",
            post(
                |Query(query): Query<HashMap<String, String>>, Json(body): Json<Value>| async move {
                    if query.get("key").map(String::as_str) != Some("test-key") {
                        return Json(json!({ "error": { "message": "API key not valid" } }));
                    }
                    let prompt = body["contents"][0]["parts"][0]["text"].as_str().unwrap_or("");
                    Json(json!({
                        "candidates": [{ "content": { "parts": [{ "text": format!("echo: {prompt}") }] } }]
                    }))
                },
            ),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}/v1beta")
    }

    fn client_with(base_url: String, api_key: Option<&str>) -> GeminiClient {
        let mut config = AppConfig::default();
        config.gemini.base_url = base_url;
        config.gemini.api_key = api_key.map(ToString::to_string);
        GeminiClient::new(Arc::new(ConfigManager::new(".", config))).unwrap()
    }

    #[tokio::test]
    async fn test_generate_against_fake_server() {
        let base_url = spawn_fake_gemini().await;
        let client = client_with(base_url.clone(), Some("test-key"));
        let generation = client
            .generate("gemini-test", "hello", &GenerationOptions::text(0.7))
            .await
            .unwrap();
        assert_eq!(generation.text, "echo: hello");

        let bad = client_with(base_url, Some("wrong"));
        let err = bad
            .generate("gemini-test", "hello", &GenerationOptions::text(0.7))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "API key not valid");
    }

    #[tokio::test]
    async fn test_missing_api_key() {
        let client = client_with("http://127.0.0.1:9".to_string(), None);
        let err = client
            .generate("m", "p", &GenerationOptions::text(0.7))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::NotConfigured("GEMINI_API_KEY")));
    }
}
