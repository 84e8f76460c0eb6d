//! HTTP API 集成测试
//!
//! 使用内存中的模型、语音与新闻源驱动完整路由。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;
use wordcast_core::errors::ProviderError;
use wordcast_core::{AppConfig, ConfigManager, LogStore, SharedLogStore};
use wordcast_providers::{
    Generation, GenerationOptions, LanguageModel, NewsFeed, NewsItem, PocketBaseClient, SpeechSynthesizer,
};
use wordcast_server::{build_router, AppState, Collaborators};
use wordcast_services::workflow::{InMemorySessionRepository, SessionSync, WorkflowManager};

#[derive(Default)]
struct QueueModel {
    replies: Mutex<Vec<String>>,
}

#[async_trait]
impl LanguageModel for QueueModel {
    async fn generate(
        &self,
        _model: &str,
        _prompt: &str,
        _options: &GenerationOptions,
    ) -> Result<Generation, ProviderError> {
        let mut replies = self.replies.lock();
        if replies.is_empty() {
            return Err(ProviderError::EmptyResponse);
        }
        Ok(Generation::from_text(replies.remove(0)))
    }

    async fn probe(&self) -> Result<Value, ProviderError> {
        Ok(json!({ "candidates": [] }))
    }
}

struct BytesTts;

#[async_trait]
impl SpeechSynthesizer for BytesTts {
    async fn synthesize(&self, script: &str) -> Result<Vec<u8>, ProviderError> {
        Ok(format!("MP3:{script}").into_bytes())
    }
}

struct StaticFeed;

#[async_trait]
impl NewsFeed for StaticFeed {
    async fn fetch_items(&self) -> Result<Vec<NewsItem>, ProviderError> {
        Ok(vec![NewsItem::new("科技", "BBC", "Chip export rules", "https://example.com/c")])
    }
}

struct TestApp {
    _dir: TempDir,
    router: Router,
    model: Arc<QueueModel>,
}

fn test_app() -> TestApp {
    let dir = TempDir::new().unwrap();
    let config = Arc::new(ConfigManager::new(dir.path(), AppConfig::with_root(dir.path())));
    let logs: SharedLogStore = Arc::new(parking_lot::RwLock::new(LogStore::in_memory(100)));
    let model = Arc::new(QueueModel::default());
    let collaborators = Collaborators {
        model: model.clone(),
        tts: Arc::new(BytesTts),
        feed: Arc::new(StaticFeed),
        pocketbase: Arc::new(PocketBaseClient::new(config.clone()).unwrap()),
    };
    let sync = SessionSync::spawn(Arc::new(InMemorySessionRepository::new()), Duration::from_millis(5));
    let manager = Arc::new(WorkflowManager::new(sync));
    let state = AppState::new(config, logs, collaborators, manager);
    TestApp {
        _dir: dir,
        router: build_router(state),
        model,
    }
}

impl TestApp {
    fn reply(&self, text: &str) {
        self.model.replies.lock().push(text.to_string());
    }

    async fn raw(&self, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Vec<u8>) {
        let mut builder = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(body) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Body::from(body.to_string())
            }
            None => Body::empty(),
        };
        let response = self
            .router
            .clone()
            .oneshot(builder.body(body).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, bytes.to_vec())
    }

    async fn call(&self, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let (status, bytes) = self.raw(method, uri, body).await;
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).to_string()))
        };
        (status, value)
    }
}

#[tokio::test]
async fn test_health() {
    let app = test_app();
    let (status, body) = app.call(Method::GET, "/api/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert!(body["time"].as_str().unwrap().ends_with('Z'));
}

#[tokio::test]
async fn test_config_roundtrip_masks_secrets() {
    let app = test_app();
    let (status, body) = app
        .call(
            Method::POST,
            "/api/config",
            Some(json!({ "GEMINI_API_KEY": "abcd1234efgh5678", "ARTICLE_MODEL": "gemini-x" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);

    let (_, config) = app.call(Method::GET, "/api/config", None).await;
    assert_eq!(config["ARTICLE_MODEL"], "gemini-x");
    assert_eq!(config["GEMINI_API_KEY"], "abcd****5678");
}

#[tokio::test]
async fn test_unknown_prompt_key_is_bad_request() {
    let app = test_app();
    let (status, body) = app.call(Method::GET, "/api/prompts?key=bogus", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "INVALID_REQUEST");
    assert_eq!(body["retryable"], false);
    assert!(body["error"].as_str().unwrap().contains("bogus"));

    let (status, _) = app
        .call(
            Method::POST,
            "/api/prompts",
            Some(json!({ "key": "style-show-off", "content": "SHOW" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let (_, body) = app.call(Method::GET, "/api/prompts?key=style-show-off", None).await;
    assert_eq!(body["content"], "SHOW");
}

#[tokio::test]
async fn test_generate_returns_raw_on_invalid_json() {
    let app = test_app();
    app.reply("not json at all");
    let (status, body) = app
        .call(Method::POST, "/api/generate", Some(json!({ "topic": "AI chips" })))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["error"], "Invalid JSON format");
    assert_eq!(body["raw"], "not json at all");
}

#[tokio::test]
async fn test_research_requires_topic() {
    let app = test_app();
    let (status, body) = app.call(Method::POST, "/api/research", Some(json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("Missing topic or newsTitle"));
}

#[tokio::test]
async fn test_dictionary_add_and_stats() {
    let app = test_app();
    let (status, body) = app
        .call(
            Method::POST,
            "/api/dictionary/add",
            Some(json!({ "entries": { "Tariff": { "phonetic": "/ˈtærɪf/" } } })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "success": true, "addedCount": 1, "totalWords": 1 }));

    let (_, stats) = app.call(Method::GET, "/api/dictionary/stats", None).await;
    assert_eq!(stats["totalWords"], 1);

    let (_, dump) = app.call(Method::GET, "/api/database/dictionary", None).await;
    assert_eq!(dump["count"], 1);
    assert!(dump["dictionary"]["tariff"].is_object());

    let (status, _) = app
        .call(Method::POST, "/api/dictionary/generate", Some(json!({ "words": [] })))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_synthesize_serves_temp_file() {
    let app = test_app();
    let (status, body) = app
        .call(Method::POST, "/api/synthesize", Some(json!({ "script": "Hello" })))
        .await;
    assert_eq!(status, StatusCode::OK);
    let url = body["audioUrl"].as_str().unwrap().to_string();
    assert!(url.starts_with("/temp/audio_"));

    let (status, bytes) = app.raw(Method::GET, &url, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(bytes, b"MP3:Hello");

    let (status, _) = app
        .call(Method::POST, "/api/synthesize", Some(json!({ "script": "" })))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_news_scan() {
    let app = test_app();
    let (status, body) = app.call(Method::GET, "/api/news/scan", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["topics"], json!(["【科技 | BBC】Chip export rules"]));
    assert!(body.get("error").is_none());
}

#[tokio::test]
async fn test_local_publish_and_listing() {
    let app = test_app();
    let (status, body) = app
        .call(
            Method::POST,
            "/api/publish",
            Some(json!({ "title": "Chips", "content": "Body", "glossary": { "chip": {} } })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["source"], "local");
    assert_eq!(body["glossaryCount"], 1);
    let id = body["articleId"].as_str().unwrap().to_string();

    let (_, listing) = app.call(Method::GET, "/api/database/articles", None).await;
    assert_eq!(listing["source"], "local");
    assert_eq!(listing["articles"].as_array().unwrap().len(), 1);

    let (status, _) = app
        .call(Method::DELETE, &format!("/api/database/articles/{id}"), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    let (status, body) = app
        .call(Method::DELETE, &format!("/api/database/articles/{id}"), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_session_lifecycle() {
    let app = test_app();
    let (status, session) = app
        .call(Method::POST, "/api/sessions", Some(json!({ "title": "Chips" })))
        .await;
    assert_eq!(status, StatusCode::OK);
    let id = session["id"].as_str().unwrap().to_string();
    assert_eq!(session["currentStepId"], "topic-discovery");

    let (status, body) = app
        .call(Method::POST, &format!("/api/sessions/{id}/steps/publishing/goto"), None)
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "REQUEST_CONFLICT");

    let (status, outcome) = app
        .call(
            Method::POST,
            &format!("/api/sessions/{id}/run/select-topic"),
            Some(json!({ "topic": "Chip export rules" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(outcome["session"]["currentStepId"], "article-generation");
    assert_eq!(outcome["session"]["context"]["category"], "科技");

    let (status, session) = app
        .call(Method::POST, &format!("/api/sessions/{id}/regenerate/topic"), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(session["context"].get("topic").map_or(true, Value::is_null));
    assert_eq!(session["currentStepId"], "topic-discovery");

    let (status, _) = app
        .call(Method::POST, &format!("/api/sessions/{id}/run/dance"), Some(json!({})))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, listing) = app.call(Method::GET, "/api/sessions", None).await;
    assert_eq!(listing["sessions"].as_array().unwrap().len(), 1);

    let (status, body) = app.call(Method::POST, &format!("/api/sessions/{id}/flush"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);

    let (status, _) = app.call(Method::DELETE, &format!("/api/sessions/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, body) = app.call(Method::GET, &format!("/api/sessions/{id}"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap().contains(&id));
}

#[tokio::test]
async fn test_failed_run_marks_step_error() {
    let app = test_app();
    let (_, session) = app.call(Method::POST, "/api/sessions", Some(json!({}))).await;
    let id = session["id"].as_str().unwrap().to_string();
    app.call(
        Method::POST,
        &format!("/api/sessions/{id}/steps/topic-discovery/complete"),
        Some(json!({ "context": { "topic": "Chips" } })),
    )
    .await;

    let (status, body) = app
        .call(Method::POST, &format!("/api/sessions/{id}/run/generate-ab"), None)
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["code"], "INVALID_REQUEST");

    let (_, session) = app.call(Method::GET, &format!("/api/sessions/{id}"), None).await;
    assert_eq!(session["status"], "failed");
    let step = session["steps"]
        .as_array()
        .unwrap()
        .iter()
        .find(|s| s["id"] == "article-generation")
        .unwrap();
    assert_eq!(step["status"], "error");
}

#[tokio::test]
async fn test_workflow_sessions_proxy_requires_pocketbase() {
    let app = test_app();
    let (status, body) = app.call(Method::GET, "/api/workflow-sessions", None).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["code"], "NOT_CONFIGURED");
}
