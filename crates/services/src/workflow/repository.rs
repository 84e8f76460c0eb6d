//! 会话持久化存储
//!
//! - `PocketBaseSessionRepository`：远程集合 `workflow_sessions`
//! - `FileSessionRepository`：未配置 PocketBase 时写入本地 JSON 文件
//! - `InMemorySessionRepository`：测试用

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};
use wordcast_core::errors::{ProviderError, WorkflowError};
use wordcast_providers::{ListQuery, PocketBaseClient};

use super::record::SessionRecord;

pub const SESSIONS_COLLECTION: &str = "workflow_sessions";
const LIST_PAGE_SIZE: u32 = 200;
const MAX_LIST_PAGES: u32 = 50;

/// 会话存储
#[async_trait]
pub trait SessionRepository: Send + Sync {
    /// 存储名称，用于日志
    fn name(&self) -> &'static str;

    async fn list(&self) -> Result<Vec<SessionRecord>, WorkflowError>;

    /// 新建记录，返回远程 id
    async fn create(&self, record: &SessionRecord) -> Result<String, WorkflowError>;

    async fn update(&self, remote_id: &str, record: &SessionRecord) -> Result<(), WorkflowError>;

    async fn delete(&self, remote_id: &str) -> Result<(), WorkflowError>;
}

fn persistence_error(context: &str, error: impl std::fmt::Display) -> WorkflowError {
    WorkflowError::Persistence(format!("{context}: {error}"))
}

fn record_body(record: &SessionRecord) -> Result<Value, WorkflowError> {
    let mut value = serde_json::to_value(record)?;
    if let Some(map) = value.as_object_mut() {
        map.remove("id");
    }
    Ok(value)
}

// ============================================================================
// PocketBase
// ============================================================================

pub struct PocketBaseSessionRepository {
    client: Arc<PocketBaseClient>,
}

impl PocketBaseSessionRepository {
    pub fn new(client: Arc<PocketBaseClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SessionRepository for PocketBaseSessionRepository {
    fn name(&self) -> &'static str {
        "pocketbase"
    }

    /// 逐页读取全部记录，最多 `MAX_LIST_PAGES` 页
    async fn list(&self) -> Result<Vec<SessionRecord>, WorkflowError> {
        let mut query = ListQuery::per_page(LIST_PAGE_SIZE).sorted("-created");
        let mut items = Vec::new();
        for page in 1..=MAX_LIST_PAGES {
            query = query.with_page(page);
            let list = match self.client.list_records(SESSIONS_COLLECTION, &query).await {
                Err(ProviderError::Status { status: 400, .. }) if query.sort.is_some() => {
                    debug!("[会话存储] 排序字段不可用，改为不排序查询");
                    query.sort = None;
                    self.client.list_records(SESSIONS_COLLECTION, &query).await
                }
                other => other,
            }
            .map_err(|e| persistence_error("加载会话失败", e))?;

            let fetched = list.items.len();
            items.extend(list.items);
            if fetched == 0 || page >= list.total_pages {
                break;
            }
            if page == MAX_LIST_PAGES {
                warn!("[会话存储] 会话超过 {} 页，其余记录未加载", MAX_LIST_PAGES);
            }
        }

        Ok(items
            .into_iter()
            .filter_map(|item| match serde_json::from_value::<SessionRecord>(item) {
                Ok(record) => Some(record),
                Err(e) => {
                    warn!("[会话存储] 跳过无法解析的记录: {}", e);
                    None
                }
            })
            .collect())
    }

    async fn create(&self, record: &SessionRecord) -> Result<String, WorkflowError> {
        let created = self
            .client
            .create_record(SESSIONS_COLLECTION, &record_body(record)?)
            .await
            .map_err(|e| persistence_error("创建会话记录失败", e))?;
        created
            .get("id")
            .and_then(Value::as_str)
            .map(ToString::to_string)
            .ok_or_else(|| WorkflowError::Persistence("创建会话记录未返回 id".to_string()))
    }

    async fn update(&self, remote_id: &str, record: &SessionRecord) -> Result<(), WorkflowError> {
        self.client
            .update_record(SESSIONS_COLLECTION, remote_id, &record_body(record)?)
            .await
            .map_err(|e| persistence_error("更新会话记录失败", e))?;
        Ok(())
    }

    async fn delete(&self, remote_id: &str) -> Result<(), WorkflowError> {
        self.client
            .delete_record(SESSIONS_COLLECTION, remote_id)
            .await
            .map_err(|e| persistence_error("删除会话记录失败", e))
    }
}

// ============================================================================
// 本地文件
// ============================================================================

/// 本地 JSON 文件存储，远程 id 即会话 id
pub struct FileSessionRepository {
    path: PathBuf,
    lock: AsyncMutex<()>,
}

impl FileSessionRepository {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: AsyncMutex::new(()),
        }
    }

    async fn read_all(&self) -> Result<Vec<SessionRecord>, WorkflowError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) if content.trim().is_empty() => Ok(Vec::new()),
            Ok(content) => Ok(serde_json::from_str(&content)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_all(&self, records: &[SessionRecord]) -> Result<(), WorkflowError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, serde_json::to_vec_pretty(records)?).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    async fn upsert(&self, remote_id: &str, record: &SessionRecord) -> Result<(), WorkflowError> {
        let _guard = self.lock.lock().await;
        let mut records = self.read_all().await?;
        let mut stored = record.clone();
        stored.id = Some(remote_id.to_string());
        match records
            .iter_mut()
            .find(|r| r.id.as_deref() == Some(remote_id))
        {
            Some(existing) => *existing = stored,
            None => records.insert(0, stored),
        }
        self.write_all(&records).await
    }
}

#[async_trait]
impl SessionRepository for FileSessionRepository {
    fn name(&self) -> &'static str {
        "file"
    }

    async fn list(&self) -> Result<Vec<SessionRecord>, WorkflowError> {
        let _guard = self.lock.lock().await;
        let mut records = self.read_all().await?;
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(records)
    }

    async fn create(&self, record: &SessionRecord) -> Result<String, WorkflowError> {
        let remote_id = record.session_id.clone();
        self.upsert(&remote_id, record).await?;
        info!("[会话存储] 已写入本地文件: {}", self.path.display());
        Ok(remote_id)
    }

    async fn update(&self, remote_id: &str, record: &SessionRecord) -> Result<(), WorkflowError> {
        self.upsert(remote_id, record).await
    }

    async fn delete(&self, remote_id: &str) -> Result<(), WorkflowError> {
        let _guard = self.lock.lock().await;
        let mut records = self.read_all().await?;
        let before = records.len();
        records.retain(|r| r.id.as_deref() != Some(remote_id));
        if records.len() != before {
            self.write_all(&records).await?;
        }
        Ok(())
    }
}

// ============================================================================
// 内存
// ============================================================================

/// 内存存储，记录写入次数并可模拟失败
#[derive(Default)]
pub struct InMemorySessionRepository {
    records: Mutex<Vec<SessionRecord>>,
    writes: Mutex<Vec<String>>,
    fail: Mutex<bool>,
}

impl InMemorySessionRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: Vec<SessionRecord>) -> Self {
        Self {
            records: Mutex::new(records),
            ..Self::default()
        }
    }

    pub fn set_fail(&self, fail: bool) {
        *self.fail.lock() = fail;
    }

    pub fn records(&self) -> Vec<SessionRecord> {
        self.records.lock().clone()
    }

    /// 写操作日志：`create:<session_id>` / `update:<remote_id>` / `delete:<remote_id>`
    pub fn writes(&self) -> Vec<String> {
        self.writes.lock().clone()
    }

    fn check(&self) -> Result<(), WorkflowError> {
        if *self.fail.lock() {
            return Err(WorkflowError::Persistence("存储不可用".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl SessionRepository for InMemorySessionRepository {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn list(&self) -> Result<Vec<SessionRecord>, WorkflowError> {
        self.check()?;
        Ok(self.records())
    }

    async fn create(&self, record: &SessionRecord) -> Result<String, WorkflowError> {
        self.check()?;
        let remote_id = format!("rec-{}", record.session_id);
        let mut stored = record.clone();
        stored.id = Some(remote_id.clone());
        self.records.lock().insert(0, stored);
        self.writes.lock().push(format!("create:{}", record.session_id));
        Ok(remote_id)
    }

    async fn update(&self, remote_id: &str, record: &SessionRecord) -> Result<(), WorkflowError> {
        self.check()?;
        let mut records = self.records.lock();
        let existing = records
            .iter_mut()
            .find(|r| r.id.as_deref() == Some(remote_id))
            .ok_or_else(|| WorkflowError::Persistence(format!("记录不存在: {remote_id}")))?;
        *existing = SessionRecord {
            id: Some(remote_id.to_string()),
            ..record.clone()
        };
        drop(records);
        self.writes.lock().push(format!("update:{remote_id}"));
        Ok(())
    }

    async fn delete(&self, remote_id: &str) -> Result<(), WorkflowError> {
        self.check()?;
        self.records
            .lock()
            .retain(|r| r.id.as_deref() != Some(remote_id));
        self.writes.lock().push(format!("delete:{remote_id}"));
        Ok(())
    }
}
