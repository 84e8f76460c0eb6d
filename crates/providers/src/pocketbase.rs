//! PocketBase 客户端
//!
//! 只使用记录 CRUD、集合列表、健康检查与密码登录这几个接口。
//! 登录令牌缓存 1 小时，先尝试 `users` 集合，再尝试 `_superusers`。

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, Method};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, warn};
use wordcast_core::errors::ProviderError;
use wordcast_core::ConfigManager;

use crate::http::{build_http_client, preview_payload, transport_error};

const TOKEN_TTL: Duration = Duration::from_secs(3600);
const AUTH_COLLECTIONS: [&str; 2] = ["users", "_superusers"];

#[derive(Debug, Clone)]
struct CachedToken {
    base_url: String,
    token: String,
    fetched_at: Instant,
}

/// 原始响应：状态码 + JSON 体（非 JSON 时为 `{error: 文本}`）
#[derive(Debug, Clone, PartialEq)]
pub struct PbResponse {
    pub status: u16,
    pub body: Value,
}

impl PbResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    fn into_result(self) -> Result<Value, ProviderError> {
        if self.is_success() {
            return Ok(self.body);
        }
        let body = self
            .body
            .get("message")
            .and_then(Value::as_str)
            .map(ToString::to_string)
            .unwrap_or_else(|| preview_payload(&self.body.to_string()));
        Err(ProviderError::Status {
            status: self.status,
            body,
        })
    }
}

/// 列表查询参数
#[derive(Debug, Clone, Default)]
pub struct ListQuery {
    pub page: Option<u32>,
    pub per_page: Option<u32>,
    pub sort: Option<String>,
    pub filter: Option<String>,
}

impl ListQuery {
    pub fn per_page(per_page: u32) -> Self {
        Self {
            per_page: Some(per_page),
            ..Self::default()
        }
    }

    pub fn sorted(mut self, sort: impl Into<String>) -> Self {
        self.sort = Some(sort.into());
        self
    }

    pub fn with_page(mut self, page: u32) -> Self {
        self.page = Some(page);
        self
    }

    fn pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::new();
        if let Some(page) = self.page {
            pairs.push(("page", page.to_string()));
        }
        if let Some(per_page) = self.per_page {
            pairs.push(("perPage", per_page.to_string()));
        }
        if let Some(sort) = &self.sort {
            pairs.push(("sort", sort.clone()));
        }
        if let Some(filter) = &self.filter {
            pairs.push(("filter", filter.clone()));
        }
        pairs
    }
}

/// 记录列表
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordList {
    #[serde(default)]
    pub items: Vec<Value>,
    #[serde(default)]
    pub total_items: u64,
    #[serde(default)]
    pub page: u32,
    #[serde(default)]
    pub total_pages: u32,
}

/// 集合字段描述
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaField {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: String,
    pub required: bool,
    pub description: String,
}

/// PocketBase REST 客户端
pub struct PocketBaseClient {
    client: Client,
    config: Arc<ConfigManager>,
    auth: Mutex<Option<CachedToken>>,
}

impl PocketBaseClient {
    pub fn new(config: Arc<ConfigManager>) -> Result<Self, ProviderError> {
        let client = build_http_client(None, 30)?;
        Ok(Self {
            client,
            config,
            auth: Mutex::new(None),
        })
    }

    pub fn is_configured(&self) -> bool {
        self.config.pocketbase().is_configured()
    }

    /// 当前配置的服务地址（去掉末尾 `/`）
    pub fn base_url(&self) -> Result<String, ProviderError> {
        self.config
            .pocketbase()
            .url
            .map(|url| url.trim().trim_end_matches('/').to_string())
            .filter(|url| !url.is_empty())
            .ok_or(ProviderError::NotConfigured("POCKETBASE_URL"))
    }

    /// 获取服务端令牌；未配置账号或登录失败时返回 `None`
    pub async fn auth_token(&self) -> Result<Option<String>, ProviderError> {
        let base_url = self.base_url()?;
        let cached = self.auth.lock().clone();
        if let Some(cached) = cached {
            if cached.base_url == base_url && cached.fetched_at.elapsed() < TOKEN_TTL {
                return Ok(Some(cached.token));
            }
        }

        let pb = self.config.pocketbase();
        let (Some(email), Some(password)) = (pb.email, pb.password) else {
            return Ok(None);
        };

        for collection in AUTH_COLLECTIONS {
            let url = format!("{base_url}/api/collections/{collection}/auth-with-password");
            let response = self
                .client
                .post(&url)
                .json(&json!({ "identity": email, "password": password }))
                .send()
                .await;
            let response = match response {
                Ok(response) if response.status().is_success() => response,
                Ok(response) => {
                    debug!("[PocketBase] {} 登录失败: HTTP {}", collection, response.status());
                    continue;
                }
                Err(e) => {
                    warn!("[PocketBase] {} 登录请求失败: {}", collection, e);
                    continue;
                }
            };
            let body: Value = match response.json().await {
                Ok(body) => body,
                Err(e) => {
                    warn!("[PocketBase] 登录响应解析失败: {}", e);
                    continue;
                }
            };
            if let Some(token) = body.get("token").and_then(Value::as_str) {
                info!("[PocketBase] 已通过 {} 集合登录", collection);
                *self.auth.lock() = Some(CachedToken {
                    base_url: base_url.clone(),
                    token: token.to_string(),
                    fetched_at: Instant::now(),
                });
                return Ok(Some(token.to_string()));
            }
        }

        warn!("[PocketBase] 所有登录方式均失败，使用匿名访问");
        Ok(None)
    }

    /// 清除令牌缓存
    pub fn invalidate_token(&self) {
        *self.auth.lock() = None;
    }

    /// 发送请求并返回原始响应
    ///
    /// `path` 以 `/api/` 开头。
    pub async fn send(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<&Value>,
        token: Option<&str>,
    ) -> Result<PbResponse, ProviderError> {
        let url = format!("{}{}", self.base_url()?, path);
        debug!("[PocketBase] {} {}", method, path);

        let mut request = self.client.request(method, &url);
        if !query.is_empty() {
            request = request.query(query);
        }
        if let Some(token) = token.filter(|t| !t.is_empty()) {
            request = request.header(AUTHORIZATION, token);
        }
        if let Some(body) = body {
            request = request.header(CONTENT_TYPE, "application/json").json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| transport_error("PocketBase 请求失败", e))?;
        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|e| transport_error("PocketBase 响应读取失败", e))?;
        Ok(PbResponse {
            status,
            body: parse_body(&text),
        })
    }

    async fn request_json(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<&Value>,
    ) -> Result<Value, ProviderError> {
        let token = self.auth_token().await?;
        self.send(method, path, query, body, token.as_deref())
            .await?
            .into_result()
    }

    pub async fn list_records(
        &self,
        collection: &str,
        query: &ListQuery,
    ) -> Result<RecordList, ProviderError> {
        let path = format!("/api/collections/{collection}/records");
        let value = self
            .request_json(Method::GET, &path, &query.pairs(), None)
            .await?;
        serde_json::from_value(value)
            .map_err(|e| ProviderError::Decode(format!("记录列表解析失败: {e}")))
    }

    pub async fn get_record(&self, collection: &str, id: &str) -> Result<Value, ProviderError> {
        let path = format!("/api/collections/{collection}/records/{id}");
        self.request_json(Method::GET, &path, &[], None).await
    }

    pub async fn create_record(
        &self,
        collection: &str,
        record: &Value,
    ) -> Result<Value, ProviderError> {
        let path = format!("/api/collections/{collection}/records");
        self.request_json(Method::POST, &path, &[], Some(record)).await
    }

    pub async fn update_record(
        &self,
        collection: &str,
        id: &str,
        record: &Value,
    ) -> Result<Value, ProviderError> {
        let path = format!("/api/collections/{collection}/records/{id}");
        self.request_json(Method::PATCH, &path, &[], Some(record))
            .await
    }

    pub async fn delete_record(&self, collection: &str, id: &str) -> Result<(), ProviderError> {
        let path = format!("/api/collections/{collection}/records/{id}");
        self.request_json(Method::DELETE, &path, &[], None).await?;
        Ok(())
    }

    /// 以 multipart 方式上传文件到记录字段
    pub async fn upload_file(
        &self,
        collection: &str,
        id: &str,
        field: &str,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> Result<Value, ProviderError> {
        let url = format!(
            "{}/api/collections/{collection}/records/{id}",
            self.base_url()?
        );
        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(file_name.to_string())
            .mime_str("audio/mpeg")
            .map_err(|e| transport_error("构建上传请求失败", e))?;
        let form = reqwest::multipart::Form::new().part(field.to_string(), part);

        let mut request = self.client.patch(&url).multipart(form);
        if let Some(token) = self.auth_token().await? {
            request = request.header(AUTHORIZATION, token);
        }
        let response = request
            .send()
            .await
            .map_err(|e| transport_error("PocketBase 上传失败", e))?;
        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|e| transport_error("PocketBase 响应读取失败", e))?;
        PbResponse {
            status,
            body: parse_body(&text),
        }
        .into_result()
    }

    /// 集合列表，兼容数组与 `{items}` 两种返回
    pub async fn list_collections(&self) -> Result<Vec<Value>, ProviderError> {
        let value = self
            .request_json(
                Method::GET,
                "/api/collections",
                &[("perPage", "200".to_string())],
                None,
            )
            .await?;
        Ok(collection_items(value))
    }

    pub async fn collection_schema(&self, name: &str) -> Result<Vec<SchemaField>, ProviderError> {
        let path = format!("/api/collections/{name}");
        let value = self.request_json(Method::GET, &path, &[], None).await?;
        Ok(parse_schema(&value))
    }

    pub async fn health(&self) -> Result<Value, ProviderError> {
        self.send(Method::GET, "/api/health", &[], None, None)
            .await?
            .into_result()
    }

    /// 透传请求：优先使用调用方令牌，401/403 时换服务端令牌重试一次
    pub async fn proxy_with_client_token(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<&Value>,
        client_token: Option<&str>,
    ) -> Result<PbResponse, ProviderError> {
        let server_token = self.auth_token().await?;
        let token = client_token
            .filter(|t| !t.is_empty())
            .map(ToString::to_string)
            .or_else(|| server_token.clone())
            .ok_or_else(|| ProviderError::Auth("PocketBase authentication failed".to_string()))?;

        let response = self
            .send(method.clone(), path, query, body, Some(&token))
            .await?;
        if matches!(response.status, 401 | 403) {
            if let Some(server_token) = server_token.filter(|t| *t != token) {
                debug!("[PocketBase] 客户端令牌被拒绝，改用服务端令牌重试");
                return self
                    .send(method, path, query, body, Some(&server_token))
                    .await;
            }
        }
        Ok(response)
    }
}

fn parse_body(text: &str) -> Value {
    if text.trim().is_empty() {
        return Value::Null;
    }
    serde_json::from_str(text).unwrap_or_else(|_| json!({ "error": text }))
}

/// 集合接口返回值统一为数组
pub fn collection_items(value: Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove("items") {
            Some(Value::Array(items)) => items,
            _ => Vec::new(),
        },
        _ => Vec::new(),
    }
}

/// 解析集合字段：新版为 `fields`，旧版为 `schema`
pub fn parse_schema(collection: &Value) -> Vec<SchemaField> {
    let fields = collection
        .get("schema")
        .or_else(|| collection.get("fields"))
        .and_then(Value::as_array);
    let Some(fields) = fields else {
        return Vec::new();
    };

    fields
        .iter()
        .filter_map(|field| {
            let name = field.get("name").and_then(Value::as_str)?;
            let max_size = field
                .pointer("/options/maxSize")
                .or_else(|| field.get("maxSize"))
                .filter(|v| !v.is_null());
            Some(SchemaField {
                name: name.to_string(),
                field_type: field
                    .get("type")
                    .and_then(Value::as_str)
                    .unwrap_or("text")
                    .to_string(),
                required: field
                    .get("required")
                    .and_then(Value::as_bool)
                    .unwrap_or(false),
                description: max_size
                    .map(|size| format!("Max: {size}"))
                    .unwrap_or_default(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        extract::Path,
        http::{HeaderMap, StatusCode},
        routing::{get, post},
        Json, Router,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};
    use wordcast_core::AppConfig;

    #[test]
    fn test_parse_schema_variants() {
        let legacy = json!({
            "schema": [
                { "name": "title_zh", "type": "text", "required": true, "options": { "maxSize": 200 } },
                { "name": "content", "type": "json" }
            ]
        });
        let fields = parse_schema(&legacy);
        assert_eq!(fields.len(), 2);
        assert_eq!(fields[0].description, "Max: 200");
        assert!(fields[0].required);
        assert_eq!(fields[1].description, "");

        let modern = json!({ "fields": [ { "name": "podcast_file", "type": "file", "maxSize": 5242880 } ] });
        assert_eq!(parse_schema(&modern)[0].description, "Max: 5242880");
    }

    #[test]
    fn test_collection_items_shapes() {
        assert_eq!(collection_items(json!([{ "name": "a" }])).len(), 1);
        assert_eq!(collection_items(json!({ "items": [{ "name": "a" }, { "name": "b" }] })).len(), 2);
        assert!(collection_items(json!({ "page": 1 })).is_empty());
    }

    #[test]
    fn test_parse_body_non_json() {
        assert_eq!(parse_body("Bad Gateway"), json!({ "error": "Bad Gateway" }));
        assert_eq!(parse_body(""), Value::Null);
    }

    struct FakePb {
        url: String,
        user_logins: Arc<AtomicUsize>,
    }

    async fn spawn_fake_pocketbase() -> FakePb {
        let user_logins = Arc::new(AtomicUsize::new(0));
        let logins = user_logins.clone();
        let app = Router::new()
            .route(
                "/api/collections/users/auth-with-password",
                post(move || {
                    logins.fetch_add(1, Ordering::SeqCst);
                    async { (StatusCode::BAD_REQUEST, Json(json!({ "message": "no user" }))) }
                }),
            )
            .route(
                "/api/collections/_superusers/auth-with-password",
                post(|| async { Json(json!({ "token": "admin-token" })) }),
            )
            .route(
                "/api/collections/:name/records",
                get(|Path(name): Path<String>, headers: HeaderMap| async move {
                    let auth = headers.get("authorization").and_then(|v| v.to_str().ok());
                    if auth != Some("admin-token") {
                        return (StatusCode::FORBIDDEN, Json(json!({ "message": "forbidden" })));
                    }
                    (
                        StatusCode::OK,
                        Json(json!({ "items": [{ "id": "r1", "collection": name }], "totalItems": 1 })),
                    )
                }),
            );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        FakePb {
            url: format!("http://{addr}"),
            user_logins,
        }
    }

    fn client_for(url: &str) -> PocketBaseClient {
        let mut config = AppConfig::default();
        config.pocketbase.url = Some(url.to_string());
        config.pocketbase.email = Some("ops@example.com".to_string());
        config.pocketbase.password = Some("secret".to_string());
        PocketBaseClient::new(Arc::new(ConfigManager::new(".", config))).unwrap()
    }

    #[tokio::test]
    async fn test_auth_falls_back_to_superusers_and_caches() {
        let fake = spawn_fake_pocketbase().await;
        let client = client_for(&fake.url);

        assert_eq!(client.auth_token().await.unwrap().as_deref(), Some("admin-token"));
        assert_eq!(client.auth_token().await.unwrap().as_deref(), Some("admin-token"));
        assert_eq!(fake.user_logins.load(Ordering::SeqCst), 1);

        let list = client
            .list_records("articles", &ListQuery::per_page(100))
            .await
            .unwrap();
        assert_eq!(list.total_items, 1);
        assert_eq!(list.items[0]["collection"], "articles");
    }

    #[tokio::test]
    async fn test_proxy_retries_with_server_token() {
        let fake = spawn_fake_pocketbase().await;
        let client = client_for(&fake.url);

        let response = client
            .proxy_with_client_token(
                Method::GET,
                "/api/collections/workflow_sessions/records",
                &[],
                None,
                Some("stale-client-token"),
            )
            .await
            .unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.body["items"][0]["id"], "r1");
    }

    #[tokio::test]
    async fn test_not_configured() {
        let client =
            PocketBaseClient::new(Arc::new(ConfigManager::new(".", AppConfig::default()))).unwrap();
        assert!(!client.is_configured());
        assert!(matches!(
            client.auth_token().await,
            Err(ProviderError::NotConfigured("POCKETBASE_URL"))
        ));
    }
}
