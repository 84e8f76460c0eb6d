//! 会话防抖持久化
//!
//! 后台任务通过 mpsc 接收会话快照。同一会话的每次 `schedule` 替换待写快照并把
//! 截止时间推迟到 `now + debounce`，到期后只写入最新快照一次。
//! 写入失败记录在 `last_error` 中，不自动重试，下一次变更会重新排期。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};
use wordcast_core::errors::WorkflowError;

use super::record::SessionRecord;
use super::repository::SessionRepository;
use super::types::WorkflowSession;

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(800);

enum SyncCommand {
    Schedule(Box<WorkflowSession>),
    Flush {
        id: Option<String>,
        ack: oneshot::Sender<Result<usize, WorkflowError>>,
    },
    Cancel(String),
    Delete {
        id: String,
        ack: oneshot::Sender<Result<(), WorkflowError>>,
    },
}

#[derive(Default)]
struct SyncShared {
    /// 会话 id → 远程记录 id
    remote_ids: Mutex<HashMap<String, String>>,
    /// 会话 id → 最近一次写入错误
    last_errors: Mutex<HashMap<String, String>>,
}

struct PendingWrite {
    session: WorkflowSession,
    deadline: Instant,
}

/// 删除命令的完成通知
pub struct DeleteAck(oneshot::Receiver<Result<(), WorkflowError>>);

/// 防抖持久化句柄
#[derive(Clone)]
pub struct SessionSync {
    tx: mpsc::UnboundedSender<SyncCommand>,
    shared: Arc<SyncShared>,
    repository: Arc<dyn SessionRepository>,
}

impl SessionSync {
    /// 启动后台写入任务（需在 tokio 运行时内调用）
    pub fn spawn(repository: Arc<dyn SessionRepository>, debounce: Duration) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(SyncShared::default());
        let worker = SyncWorker {
            repository: repository.clone(),
            shared: shared.clone(),
            debounce,
            pending: HashMap::new(),
        };
        tokio::spawn(worker.run(rx));
        info!(
            "[会话同步] 已启动，存储: {}，防抖 {} ms",
            repository.name(),
            debounce.as_millis()
        );
        Self {
            tx,
            shared,
            repository,
        }
    }

    pub fn repository(&self) -> Arc<dyn SessionRepository> {
        self.repository.clone()
    }

    fn stopped() -> WorkflowError {
        WorkflowError::Persistence("会话同步任务已停止".to_string())
    }

    /// 排期保存
    pub fn schedule(&self, session: &WorkflowSession) {
        if self
            .tx
            .send(SyncCommand::Schedule(Box::new(session.clone())))
            .is_err()
        {
            warn!("[会话同步] 任务已停止，丢弃会话 {} 的保存", session.id);
        }
    }

    /// 立即写入指定会话的待写快照，返回是否有写入
    pub async fn flush(&self, id: &str) -> Result<bool, WorkflowError> {
        let (ack, rx) = oneshot::channel();
        self.tx
            .send(SyncCommand::Flush {
                id: Some(id.to_string()),
                ack,
            })
            .map_err(|_| Self::stopped())?;
        let written = rx.await.map_err(|_| Self::stopped())??;
        Ok(written > 0)
    }

    /// 立即写入所有待写快照，返回写入数量
    pub async fn flush_all(&self) -> Result<usize, WorkflowError> {
        let (ack, rx) = oneshot::channel();
        self.tx
            .send(SyncCommand::Flush { id: None, ack })
            .map_err(|_| Self::stopped())?;
        rx.await.map_err(|_| Self::stopped())?
    }

    /// 丢弃待写快照
    pub fn cancel(&self, id: &str) {
        let _ = self.tx.send(SyncCommand::Cancel(id.to_string()));
    }

    /// 取消待写快照并立即删除远程记录
    pub async fn delete(&self, id: &str) -> Result<(), WorkflowError> {
        let ack = self.request_delete(id)?;
        Self::await_delete(ack).await
    }

    /// 只发送删除命令，排在此前所有 `schedule` 之后执行
    pub fn request_delete(&self, id: &str) -> Result<DeleteAck, WorkflowError> {
        let (ack, rx) = oneshot::channel();
        self.tx
            .send(SyncCommand::Delete {
                id: id.to_string(),
                ack,
            })
            .map_err(|_| Self::stopped())?;
        Ok(DeleteAck(rx))
    }

    pub async fn await_delete(ack: DeleteAck) -> Result<(), WorkflowError> {
        ack.0.await.map_err(|_| Self::stopped())?
    }

    /// 登记已存在的远程记录
    pub fn register_remote(&self, session_id: &str, remote_id: &str) {
        self.shared
            .remote_ids
            .lock()
            .insert(session_id.to_string(), remote_id.to_string());
    }

    pub fn remote_id(&self, session_id: &str) -> Option<String> {
        self.shared.remote_ids.lock().get(session_id).cloned()
    }

    pub fn last_error(&self, session_id: &str) -> Option<String> {
        self.shared.last_errors.lock().get(session_id).cloned()
    }
}

struct SyncWorker {
    repository: Arc<dyn SessionRepository>,
    shared: Arc<SyncShared>,
    debounce: Duration,
    pending: HashMap<String, PendingWrite>,
}

impl SyncWorker {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<SyncCommand>) {
        loop {
            let next_deadline = self.pending.values().map(|p| p.deadline).min();
            let wake_at = next_deadline.unwrap_or_else(|| Instant::now() + Duration::from_secs(3600));

            tokio::select! {
                command = rx.recv() => match command {
                    Some(command) => self.handle(command).await,
                    None => {
                        let _ = self.flush_ids(self.pending.keys().cloned().collect()).await;
                        debug!("[会话同步] 通道关闭，任务退出");
                        break;
                    }
                },
                _ = sleep_until(wake_at), if next_deadline.is_some() => {
                    let now = Instant::now();
                    let due: Vec<String> = self
                        .pending
                        .iter()
                        .filter(|(_, p)| p.deadline <= now)
                        .map(|(id, _)| id.clone())
                        .collect();
                    let _ = self.flush_ids(due).await;
                }
            }
        }
    }

    async fn handle(&mut self, command: SyncCommand) {
        match command {
            SyncCommand::Schedule(session) => {
                if let Some(pending) = self.pending.get(&session.id) {
                    if pending.session.updated_at > session.updated_at {
                        debug!("[会话同步] 忽略会话 {} 的过期快照", session.id);
                        return;
                    }
                }
                let deadline = Instant::now() + self.debounce;
                self.pending.insert(
                    session.id.clone(),
                    PendingWrite {
                        session: *session,
                        deadline,
                    },
                );
            }
            SyncCommand::Flush { id, ack } => {
                let ids = match id {
                    Some(id) => vec![id],
                    None => self.pending.keys().cloned().collect(),
                };
                let _ = ack.send(self.flush_ids(ids).await);
            }
            SyncCommand::Cancel(id) => {
                if self.pending.remove(&id).is_some() {
                    debug!("[会话同步] 已取消会话 {} 的待写快照", id);
                }
            }
            SyncCommand::Delete { id, ack } => {
                self.pending.remove(&id);
                let remote_id = self.shared.remote_ids.lock().remove(&id);
                self.shared.last_errors.lock().remove(&id);
                let result = match &remote_id {
                    Some(remote_id) => self.repository.delete(remote_id).await,
                    None => Ok(()),
                };
                if let Err(e) = &result {
                    warn!("[会话同步] 删除会话 {} 失败，保留远程记录: {}", id, e);
                    if let Some(remote_id) = remote_id {
                        self.shared.remote_ids.lock().insert(id.clone(), remote_id);
                    }
                }
                let _ = ack.send(result);
            }
        }
    }

    /// 写入给定会话的待写快照；返回成功数量或第一个错误
    async fn flush_ids(&mut self, ids: Vec<String>) -> Result<usize, WorkflowError> {
        let mut written = 0;
        let mut first_error = None;
        for id in ids {
            let Some(pending) = self.pending.remove(&id) else {
                continue;
            };
            match self.persist(&pending.session).await {
                Ok(()) => written += 1,
                Err(e) => {
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(written),
        }
    }

    async fn persist(&self, session: &WorkflowSession) -> Result<(), WorkflowError> {
        let result = self.write(session).await;
        match &result {
            Ok(()) => {
                self.shared.last_errors.lock().remove(&session.id);
                debug!("[会话同步] 会话 {} 已保存", session.id);
            }
            Err(e) => {
                warn!("[会话同步] 会话 {} 保存失败: {}", session.id, e);
                self.shared
                    .last_errors
                    .lock()
                    .insert(session.id.clone(), e.to_string());
            }
        }
        result
    }

    async fn write(&self, session: &WorkflowSession) -> Result<(), WorkflowError> {
        let record = SessionRecord::from_session(session)?;
        let remote_id = self.shared.remote_ids.lock().get(&session.id).cloned();
        match remote_id {
            Some(remote_id) => self.repository.update(&remote_id, &record).await,
            None => {
                let remote_id = self.repository.create(&record).await?;
                self.shared
                    .remote_ids
                    .lock()
                    .insert(session.id.clone(), remote_id);
                Ok(())
            }
        }
    }
}
