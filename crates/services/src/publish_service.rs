//! 文章发布与数据浏览
//!
//! 发布优先写入 PocketBase `articles` 集合，失败时保存到 `output/articles`。
//! 同时提供文章列表、删除、集合浏览、字段结构查询与连接测试。

use std::path::PathBuf;
use std::sync::Arc;

use reqwest::Method;
use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};
use wordcast_core::article::{article_root, glossary_len, normalize_json_field};
use wordcast_core::errors::PublishError;
use wordcast_core::ConfigManager;
use wordcast_providers::{ListQuery, PbResponse, PocketBaseClient, SchemaField};

pub const ARTICLES_COLLECTION: &str = "articles";
pub const PODCAST_FILE_FIELD: &str = "podcast_file";
const KNOWN_TOPICS: [&str; 3] = ["国际", "财经", "科技"];

// ============================================================================
// 负载映射
// ============================================================================

/// 按 JS 的真值规则取值：null、空字符串、false、0 视为缺失
fn truthy(value: Option<&Value>) -> Option<&Value> {
    value.filter(|v| match v {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::String(s) => !s.is_empty(),
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::Array(_) | Value::Object(_) => true,
    })
}

fn or_default(value: Option<&Value>, default: Value) -> Value {
    truthy(value).cloned().unwrap_or(default)
}

fn normalized_or(value: Option<&Value>, default: Value) -> Value {
    value
        .map(normalize_json_field)
        .filter(|v| truthy(Some(v)).is_some())
        .unwrap_or(default)
}

fn now_iso() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

/// 负载是否为扁平的 `articles` 记录（而非 `{article: {...}}` 结构）
pub fn is_direct_payload(payload: &Value) -> bool {
    truthy(payload.get("article")).is_none()
        && ["title_zh", "title_en", "content", "intro"]
            .iter()
            .any(|key| truthy(payload.get(*key)).is_some())
}

/// 把发布负载映射为 `articles` 记录
pub fn build_article_record(payload: &Value) -> Value {
    if is_direct_payload(payload) {
        return json!({
            "title_zh": or_default(payload.get("title_zh"), json!("无标题")),
            "title_en": or_default(payload.get("title_en"), json!("Untitled")),
            "date": or_default(payload.get("date"), json!(now_iso())),
            "level": or_default(payload.get("level"), json!("10")),
            "topic": or_default(payload.get("topic"), json!("科技")),
            "intro": normalized_or(payload.get("intro"), Value::Null),
            "content": normalized_or(payload.get("content"), json!({})),
            "glossary": normalized_or(payload.get("glossary"), json!({})),
            "podcast_script": or_default(payload.get("podcast_script"), json!("")),
            "podcast_url": or_default(payload.get("podcast_url"), json!("")),
        });
    }

    let empty = json!({});
    let article_root = truthy(payload.get("article")).unwrap_or(&empty);
    let article_data = truthy(article_root.get("article")).unwrap_or(article_root);
    let title = article_data.get("title");
    let meta = article_data.get("meta");

    let mut record = Map::new();
    record.insert(
        "title_zh".to_string(),
        truthy(title.and_then(|t| t.get("zh")))
            .or_else(|| truthy(title.and_then(|t| t.get("cn"))))
            .cloned()
            .unwrap_or_else(|| json!("无标题")),
    );
    record.insert(
        "title_en".to_string(),
        or_default(title.and_then(|t| t.get("en")), json!("Untitled")),
    );
    record.insert(
        "date".to_string(),
        or_default(meta.and_then(|m| m.get("date")), json!(now_iso())),
    );
    record.insert(
        "level".to_string(),
        or_default(meta.and_then(|m| m.get("level")), json!("10")),
    );
    record.insert(
        "topic".to_string(),
        or_default(meta.and_then(|m| m.get("topic")), json!("科技")),
    );

    let intro = truthy(article_data.get("intro")).cloned().or_else(|| {
        truthy(article_data.get("briefing")).map(|briefing| json!({ "text": briefing }))
    });
    record.insert("intro".to_string(), intro.unwrap_or(Value::Null));

    let mut content = Map::new();
    for key in ["meta", "paragraphs"] {
        if let Some(value) = article_data.get(key) {
            content.insert(key.to_string(), value.clone());
        }
    }
    record.insert("content".to_string(), Value::Object(content));

    if let Some(glossary) =
        truthy(payload.get("glossary")).or_else(|| article_root.get("glossary").filter(|g| !g.is_null()))
    {
        record.insert("glossary".to_string(), glossary.clone());
    }
    if let Some(script) = payload.get("podcast_script").filter(|s| !s.is_null()) {
        record.insert("podcast_script".to_string(), script.clone());
    }
    if let Some(url) = truthy(payload.get("podcast_url")).or_else(|| article_data.get("podcastUrl")) {
        record.insert("podcast_url".to_string(), url.clone());
    }

    if let Some(topic) = article_data
        .get("topic")
        .and_then(Value::as_str)
        .filter(|t| KNOWN_TOPICS.contains(t))
    {
        record.insert("topic".to_string(), json!(topic));
    }

    Value::Object(record)
}

/// 已有文章的增量更新字段：负载中出现的播客与词汇表字段
pub fn build_update_fields(payload: &Value) -> Map<String, Value> {
    let mut fields = Map::new();
    for key in ["podcast_script", "podcast_url"] {
        if let Some(value) = payload.get(key) {
            fields.insert(key.to_string(), value.clone());
        }
    }
    if let Some(glossary) = payload.get("glossary") {
        fields.insert("glossary".to_string(), normalized_or(Some(glossary), json!({})));
    }
    fields
}

// ============================================================================
// 返回类型
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageSource {
    Pocketbase,
    Local,
    PocketbaseRestricted,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishResult {
    pub success: bool,
    pub article_id: String,
    pub glossary_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_path: Option<String>,
    pub source: StorageSource,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArticleListing {
    pub articles: Vec<Value>,
    pub source: StorageSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authenticated: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeleteResult {
    pub success: bool,
    pub source: StorageSource,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CollectionInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub collection_type: String,
}

impl CollectionInfo {
    fn new(name: &str, collection_type: &str) -> Self {
        Self {
            name: name.to_string(),
            collection_type: collection_type.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CollectionListing {
    pub source: StorageSource,
    pub collections: Vec<CollectionInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SchemaListing {
    pub schema: Vec<SchemaField>,
    pub source: StorageSource,
}

/// 播客音频上传结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadedPodcast {
    pub article_id: String,
    pub podcast_url: String,
}

/// 新建文章时使用的会话信息
#[derive(Debug, Clone, Default)]
pub struct PodcastArticle<'a> {
    pub article: Option<&'a Value>,
    pub level: Option<&'a str>,
    pub topic: Option<&'a str>,
}

// ============================================================================
// 服务
// ============================================================================

pub struct PublishService {
    config: Arc<ConfigManager>,
    pocketbase: Arc<PocketBaseClient>,
}

fn valid_article_id(id: &str) -> bool {
    !id.is_empty() && id != "." && id != ".." && !id.contains(['/', '\\', '\0'])
}

impl PublishService {
    pub fn new(config: Arc<ConfigManager>, pocketbase: Arc<PocketBaseClient>) -> Self {
        Self { config, pocketbase }
    }

    pub fn pocketbase(&self) -> &Arc<PocketBaseClient> {
        &self.pocketbase
    }

    fn articles_dir(&self) -> PathBuf {
        self.config.paths().articles_dir()
    }

    /// 发布文章；已有 `articleId` 且带播客或词汇表字段时更新，否则新建
    pub async fn publish(&self, payload: &Value) -> Result<PublishResult, PublishError> {
        if !payload.is_object() {
            return Err(PublishError::InvalidPayload("Missing payload".to_string()));
        }
        let glossary_count = glossary_len(payload.get("glossary"));

        if self.pocketbase.is_configured() {
            match self.publish_remote(payload, glossary_count).await {
                Ok(result) => return Ok(result),
                Err(e) => warn!("[Publish] PocketBase 发布失败，改为本地保存: {}", e),
            }
        }
        self.save_local(payload, glossary_count).await
    }

    async fn publish_remote(
        &self,
        payload: &Value,
        glossary_count: usize,
    ) -> Result<PublishResult, PublishError> {
        let base_url = self.pocketbase.base_url()?;
        let updates = build_update_fields(payload);
        let article_id = payload
            .get("articleId")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty());

        if let Some(id) = article_id.filter(|_| !updates.is_empty()) {
            match self
                .pocketbase
                .update_record(ARTICLES_COLLECTION, id, &Value::Object(updates))
                .await
            {
                Ok(_) => {
                    info!("[Publish] 已更新文章 {}", id);
                    return Ok(PublishResult {
                        success: true,
                        article_id: id.to_string(),
                        glossary_count,
                        url: Some(format!("{base_url}/articles/{id}")),
                        local_path: None,
                        source: StorageSource::Pocketbase,
                    });
                }
                Err(e) => warn!("[Publish] 更新文章 {} 失败，改为新建: {}", id, e),
            }
        }

        let record = build_article_record(payload);
        let created = self
            .pocketbase
            .create_record(ARTICLES_COLLECTION, &record)
            .await?;
        let id = created
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| PublishError::Upstream("PocketBase 未返回记录 id".to_string()))?
            .to_string();
        info!("[Publish] 已创建文章 {}", id);
        Ok(PublishResult {
            success: true,
            url: Some(format!("{base_url}/articles/{id}")),
            article_id: id,
            glossary_count,
            local_path: None,
            source: StorageSource::Pocketbase,
        })
    }

    async fn save_local(
        &self,
        payload: &Value,
        glossary_count: usize,
    ) -> Result<PublishResult, PublishError> {
        let dir = self.articles_dir();
        tokio::fs::create_dir_all(&dir).await?;
        let article_id = format!("article_{}", chrono::Utc::now().timestamp_millis());
        let path = dir.join(format!("{article_id}.json"));
        tokio::fs::write(&path, serde_json::to_string_pretty(payload)?).await?;
        info!("[Publish] 文章已保存到本地: {}", path.display());
        Ok(PublishResult {
            success: true,
            article_id,
            glossary_count,
            url: None,
            local_path: Some(path.to_string_lossy().to_string()),
            source: StorageSource::Local,
        })
    }

    /// 本地文章（按文件名排序）；`skip_invalid` 时跳过无法解析的文件
    async fn local_articles(&self, skip_invalid: bool) -> Result<Option<Vec<Value>>, PublishError> {
        let mut entries = match tokio::fs::read_dir(self.articles_dir()).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            if let Some(id) = name.strip_suffix(".json") {
                files.push((id.to_string(), entry.path()));
            }
        }
        files.sort_by(|a, b| a.0.cmp(&b.0));

        let mut articles = Vec::with_capacity(files.len());
        for (id, path) in files {
            let parsed = tokio::fs::read_to_string(&path)
                .await
                .ok()
                .and_then(|content| serde_json::from_str::<Value>(&content).ok());
            match parsed {
                Some(data) => {
                    let mut article = Map::new();
                    article.insert("id".to_string(), json!(id));
                    match data {
                        Value::Object(fields) => article.extend(fields),
                        other => {
                            article.insert("data".to_string(), other);
                        }
                    }
                    articles.push(Value::Object(article));
                }
                None if skip_invalid => debug!("[Publish] 跳过无法解析的文件 {}", id),
                None => articles.push(json!({ "id": id, "error": "Parse error" })),
            }
        }
        Ok(Some(articles))
    }

    /// 文章列表：PocketBase 优先，失败时读取本地文件
    pub async fn list_articles(&self) -> Result<ArticleListing, PublishError> {
        if self.pocketbase.is_configured() {
            match self
                .pocketbase
                .list_records(ARTICLES_COLLECTION, &ListQuery::per_page(100))
                .await
            {
                Ok(list) => {
                    let authenticated = self.pocketbase.auth_token().await.ok().flatten().is_some();
                    info!("[Database] 从 PocketBase 获取 {} 篇文章", list.items.len());
                    return Ok(ArticleListing {
                        articles: list.items,
                        source: StorageSource::Pocketbase,
                        authenticated: Some(authenticated),
                        message: None,
                    });
                }
                Err(e) => warn!("[Database] PocketBase 文章获取失败，改读本地: {}", e),
            }
        }

        Ok(match self.local_articles(false).await? {
            Some(articles) => ArticleListing {
                articles,
                source: StorageSource::Local,
                authenticated: None,
                message: None,
            },
            None => ArticleListing {
                articles: Vec::new(),
                source: StorageSource::Local,
                authenticated: None,
                message: Some("No local articles yet".to_string()),
            },
        })
    }

    /// 删除文章：先删本地文件，再尝试 PocketBase
    pub async fn delete_article(&self, id: &str) -> Result<DeleteResult, PublishError> {
        if !valid_article_id(id) {
            return Err(PublishError::InvalidPayload(format!("无效的文章 id: {id}")));
        }
        let path = self.articles_dir().join(format!("{id}.json"));
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                info!("[Database] 已删除本地文章 {}", id);
                return Ok(DeleteResult {
                    success: true,
                    source: StorageSource::Local,
                });
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        if self.pocketbase.is_configured() {
            match self.pocketbase.delete_record(ARTICLES_COLLECTION, id).await {
                Ok(()) => {
                    info!("[Database] 已删除 PocketBase 文章 {}", id);
                    return Ok(DeleteResult {
                        success: true,
                        source: StorageSource::Pocketbase,
                    });
                }
                Err(e) => debug!("[Database] PocketBase 删除 {} 失败: {}", id, e),
            }
        }
        Err(PublishError::NotFound("Article not found".to_string()))
    }

    /// 集合字段结构
    pub async fn schema(&self, collection: &str) -> Result<SchemaListing, PublishError> {
        if !self.pocketbase.is_configured() {
            return Err(PublishError::NotConfigured("POCKETBASE_URL"));
        }
        let schema = self
            .pocketbase
            .collection_schema(collection)
            .await
            .map_err(|e| {
                warn!("[Schema] 获取 {} 字段失败: {}", collection, e);
                PublishError::Upstream("Failed to fetch schema from PocketBase.".to_string())
            })?;
        Ok(SchemaListing {
            schema,
            source: StorageSource::Pocketbase,
        })
    }

    /// 集合列表；未配置时列出本地数据，无权限时返回默认集合
    pub async fn collections(&self) -> CollectionListing {
        if !self.pocketbase.is_configured() {
            return CollectionListing {
                source: StorageSource::Local,
                collections: vec![
                    CollectionInfo::new("articles", "base"),
                    CollectionInfo::new("dictionary", "local"),
                ],
            };
        }
        match self.pocketbase.list_collections().await {
            Ok(items) => CollectionListing {
                source: StorageSource::Pocketbase,
                collections: items
                    .iter()
                    .map(|c| {
                        CollectionInfo::new(
                            c.get("name").and_then(Value::as_str).unwrap_or_default(),
                            c.get("type").and_then(Value::as_str).unwrap_or_default(),
                        )
                    })
                    .collect(),
            },
            Err(e) => {
                warn!("[Database] 集合列表获取失败: {}", e);
                CollectionListing {
                    source: StorageSource::PocketbaseRestricted,
                    collections: vec![
                        CollectionInfo::new("articles", "base"),
                        CollectionInfo::new("users", "auth"),
                        CollectionInfo::new("dictionary", "base"),
                    ],
                }
            }
        }
    }

    /// 集合记录；PocketBase 的错误状态与响应体原样返回
    pub async fn collection_records(&self, name: &str) -> Result<PbResponse, PublishError> {
        if !self.pocketbase.is_configured() {
            if name == ARTICLES_COLLECTION {
                let items = self.local_articles(true).await?.unwrap_or_default();
                let body = json!({
                    "totalItems": items.len(),
                    "items": items,
                    "source": StorageSource::Local,
                });
                return Ok(PbResponse { status: 200, body });
            }
            return Ok(PbResponse {
                status: 200,
                body: json!({ "items": [], "source": StorageSource::Unknown }),
            });
        }

        let token = self.pocketbase.auth_token().await?;
        let path = format!("/api/collections/{name}/records");
        let response = self
            .pocketbase
            .send(
                Method::GET,
                &path,
                &[("perPage", "200".to_string())],
                None,
                token.as_deref(),
            )
            .await?;
        if !response.is_success() {
            warn!("[Database] 集合 {} 获取失败: HTTP {}", name, response.status);
            return Ok(response);
        }
        let body = json!({
            "items": response.body.get("items").cloned().unwrap_or_else(|| json!([])),
            "totalItems": response.body.get("totalItems").cloned().unwrap_or(Value::Null),
            "source": StorageSource::Pocketbase,
        });
        Ok(PbResponse { status: 200, body })
    }

    /// PocketBase 连接测试，失败信息放在返回值中
    pub async fn test_connection(&self) -> Value {
        let Ok(url) = self.pocketbase.base_url() else {
            return json!({ "connected": false, "message": "No POCKETBASE_URL configured" });
        };
        let token = match self.pocketbase.auth_token().await {
            Ok(token) => token,
            Err(e) => return json!({ "connected": false, "error": e.to_string() }),
        };
        let health = match self
            .pocketbase
            .send(Method::GET, "/api/health", &[], None, None)
            .await
        {
            Ok(health) => health,
            Err(e) => return json!({ "connected": false, "error": e.to_string() }),
        };
        let collections: Vec<Value> = match self.pocketbase.list_collections().await {
            Ok(items) => items
                .iter()
                .filter_map(|c| c.get("name").cloned())
                .collect(),
            Err(e) => {
                debug!("[Database] 无法列出集合: {}", e);
                Vec::new()
            }
        };
        json!({
            "connected": health.is_success(),
            "url": url,
            "authenticated": token.is_some(),
            "health": health.body,
            "collectionsCount": collections.len(),
            "collections": collections,
        })
    }

    /// 上传播客音频到文章的 `podcast_file` 字段，没有文章时先新建
    pub async fn upload_podcast(
        &self,
        article_id: Option<&str>,
        article: PodcastArticle<'_>,
        audio: Vec<u8>,
    ) -> Result<UploadedPodcast, PublishError> {
        let base_url = self.pocketbase.base_url()?;
        let id = match article_id.filter(|id| !id.is_empty()) {
            Some(id) => id.to_string(),
            None => {
                let record = podcast_article_record(&article);
                let created = self
                    .pocketbase
                    .create_record(ARTICLES_COLLECTION, &record)
                    .await?;
                created
                    .get("id")
                    .and_then(Value::as_str)
                    .ok_or_else(|| PublishError::Upstream("PocketBase 未返回记录 id".to_string()))?
                    .to_string()
            }
        };

        let file_name = format!("podcast_{}.mp3", chrono::Utc::now().timestamp_millis());
        let record = self
            .pocketbase
            .upload_file(ARTICLES_COLLECTION, &id, PODCAST_FILE_FIELD, &file_name, audio)
            .await?;
        let stored = record
            .get(PODCAST_FILE_FIELD)
            .and_then(Value::as_str)
            .ok_or_else(|| PublishError::Upstream("PocketBase 未返回 podcast_file".to_string()))?;
        info!("[Publish] 播客音频已上传到文章 {}", id);
        Ok(UploadedPodcast {
            podcast_url: format!("{base_url}/api/files/{ARTICLES_COLLECTION}/{id}/{stored}"),
            article_id: id,
        })
    }
}

/// 仅有音频时新建的文章记录
pub fn podcast_article_record(article: &PodcastArticle<'_>) -> Value {
    let empty = json!({});
    let content = article.article.unwrap_or(&empty);
    let root = article_root(content);
    let meta = root.get("meta");
    let title = root.get("title");
    let topic = article.topic.filter(|t| !t.is_empty());

    let title_zh = truthy(meta.and_then(|m| m.get("title_zh")))
        .or_else(|| truthy(title.and_then(|t| t.get("zh"))))
        .cloned()
        .unwrap_or_else(|| json!(topic.unwrap_or("Untitled")));
    let title_en = truthy(meta.and_then(|m| m.get("title_en")))
        .or_else(|| truthy(title.and_then(|t| t.get("en"))))
        .cloned()
        .unwrap_or_else(|| json!("Untitled"));
    let intro = truthy(meta.and_then(|m| m.get("briefing")))
        .map(|briefing| json!({ "briefing": briefing }))
        .unwrap_or_else(|| json!({}));

    json!({
        "date": now_iso(),
        "level": article.level.filter(|l| !l.is_empty()).unwrap_or("10"),
        "topic": topic.unwrap_or("科技"),
        "title_zh": title_zh,
        "title_en": title_en,
        "intro": intro,
        "content": content,
    })
}
