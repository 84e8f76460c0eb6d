//! 工作流会话管理
//!
//! 管理会话缓存、步骤状态流转与局部重新生成，每次变更后排期持久化

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;
use wordcast_core::errors::WorkflowError;

use super::patch::{step_inputs, ContextField, ContextPatch, SessionPatch};
use super::record::SessionRecord;
use super::sync::SessionSync;
use super::types::*;

pub const DEFAULT_TITLE: &str = "New Workflow";

#[derive(Default)]
struct ManagerState {
    sessions: HashMap<String, WorkflowSession>,
    active_id: Option<String>,
}

/// 会话管理器
pub struct WorkflowManager {
    state: Arc<RwLock<ManagerState>>,
    sync: SessionSync,
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// 除 `keep` 外的 running 步骤回到 pending，保证同时只有一个步骤在运行
fn demote_running_except(session: &mut WorkflowSession, keep: StepId) {
    for step in &mut session.steps {
        if step.id != keep && step.status == StepStatus::Running {
            step.status = StepStatus::Pending;
        }
    }
}

fn sort_newest_first(sessions: &mut [WorkflowSession]) {
    sessions.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| b.updated_at.cmp(&a.updated_at))
    });
}

impl WorkflowManager {
    pub fn new(sync: SessionSync) -> Self {
        Self {
            state: Arc::new(RwLock::new(ManagerState::default())),
            sync,
        }
    }

    pub fn sync(&self) -> &SessionSync {
        &self.sync
    }

    /// 从存储加载会话，第一个会话设为当前会话
    pub async fn load_from_remote(&self) -> Result<usize, WorkflowError> {
        let records = self.sync.repository().list().await?;
        let mut loaded = Vec::with_capacity(records.len());
        for record in records {
            let remote_id = record.id.clone();
            match record.into_session() {
                Ok(session) if !session.id.is_empty() => {
                    if let Some(remote_id) = remote_id {
                        self.sync.register_remote(&session.id, &remote_id);
                    }
                    loaded.push(session);
                }
                Ok(_) => warn!("跳过缺少 session_id 的会话记录"),
                Err(e) => warn!("跳过无法还原的会话记录: {}", e),
            }
        }
        sort_newest_first(&mut loaded);

        let count = loaded.len();
        let mut state = self.state.write().await;
        state.active_id = loaded.first().map(|s| s.id.clone());
        state.sessions = loaded.into_iter().map(|s| (s.id.clone(), s)).collect();
        info!("已加载 {} 个工作流会话", count);
        Ok(count)
    }

    /// 创建会话并设为当前会话
    pub async fn create_session(&self, title: Option<String>) -> WorkflowSession {
        let now = now_millis();
        let session = WorkflowSession {
            id: Uuid::new_v4().to_string(),
            title: title
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| DEFAULT_TITLE.to_string()),
            created_at: now,
            updated_at: now,
            status: WorkflowStatus::Idle,
            current_step_id: StepId::TopicDiscovery,
            steps: initial_steps(),
            context: SessionContext::default(),
        };

        let mut state = self.state.write().await;
        state.sessions.insert(session.id.clone(), session.clone());
        state.active_id = Some(session.id.clone());
        self.sync.schedule(&session);
        drop(state);

        info!("创建工作流会话: {}", session.id);
        session
    }

    /// 会话列表（新的在前）
    pub async fn list_sessions(&self) -> Vec<WorkflowSession> {
        let state = self.state.read().await;
        let mut sessions: Vec<WorkflowSession> = state.sessions.values().cloned().collect();
        sort_newest_first(&mut sessions);
        sessions
    }

    pub async fn get_session(&self, id: &str) -> Result<WorkflowSession, WorkflowError> {
        let state = self.state.read().await;
        state
            .sessions
            .get(id)
            .cloned()
            .ok_or_else(|| WorkflowError::SessionNotFound(id.to_string()))
    }

    pub async fn active_id(&self) -> Option<String> {
        self.state.read().await.active_id.clone()
    }

    pub async fn active_session(&self) -> Option<WorkflowSession> {
        let state = self.state.read().await;
        let id = state.active_id.as_ref()?;
        state.sessions.get(id).cloned()
    }

    pub async fn switch_session(&self, id: &str) -> Result<WorkflowSession, WorkflowError> {
        let mut state = self.state.write().await;
        let session = state
            .sessions
            .get(id)
            .cloned()
            .ok_or_else(|| WorkflowError::SessionNotFound(id.to_string()))?;
        state.active_id = Some(id.to_string());
        debug!("切换到会话: {}", id);
        Ok(session)
    }

    /// 修改会话：成功后更新时间戳并排期保存
    ///
    /// 排期在持有写锁时完成，快照进入同步通道的顺序与提交顺序一致。
    async fn mutate<F>(&self, id: &str, f: F) -> Result<WorkflowSession, WorkflowError>
    where
        F: FnOnce(&mut WorkflowSession) -> Result<(), WorkflowError>,
    {
        let mut state = self.state.write().await;
        let current = state
            .sessions
            .get(id)
            .ok_or_else(|| WorkflowError::SessionNotFound(id.to_string()))?;

        let mut next = current.clone();
        f(&mut next)?;
        next.updated_at = now_millis().max(current.updated_at + 1);

        state.sessions.insert(id.to_string(), next.clone());
        self.sync.schedule(&next);
        drop(state);
        Ok(next)
    }

    /// 局部更新
    pub async fn update_session(
        &self,
        id: &str,
        patch: SessionPatch,
    ) -> Result<WorkflowSession, WorkflowError> {
        self.mutate(id, |session| {
            *session = patch.apply(session)?;
            Ok(())
        })
        .await
    }

    /// 删除会话：本地移除并立即删除远程记录
    ///
    /// 远程删除失败时会话恢复到缓存并重新排期保存，可再次删除。
    pub async fn delete_session(&self, id: &str) -> Result<(), WorkflowError> {
        let mut state = self.state.write().await;
        let Some(removed) = state.sessions.remove(id) else {
            return Err(WorkflowError::SessionNotFound(id.to_string()));
        };
        let was_active = state.active_id.as_deref() == Some(id);
        if was_active {
            state.active_id = None;
        }
        let pending = self.sync.request_delete(id);
        drop(state);

        info!("删除工作流会话: {}", id);
        let result = match pending {
            Ok(ack) => SessionSync::await_delete(ack).await,
            Err(e) => Err(e),
        };
        let Err(e) = result else {
            return Ok(());
        };

        let mut state = self.state.write().await;
        if !state.sessions.contains_key(id) {
            state.sessions.insert(id.to_string(), removed.clone());
            if was_active && state.active_id.is_none() {
                state.active_id = Some(id.to_string());
            }
            self.sync.schedule(&removed);
        }
        Err(WorkflowError::Persistence(format!(
            "远程删除失败，会话已保留: {e}"
        )))
    }

    pub async fn start_step(&self, id: &str, step: StepId) -> Result<WorkflowSession, WorkflowError> {
        self.mutate(id, |session| {
            if !session.has_step(step) {
                return Err(WorkflowError::StepNotFound(step.to_string()));
            }
            if let Some(target) = session.step_mut(step) {
                target.status = StepStatus::Running;
                target.error = None;
            }
            demote_running_except(session, step);
            session.status = WorkflowStatus::Running;
            session.current_step_id = step;
            Ok(())
        })
        .await
    }

    /// 完成步骤并推进到下一步
    pub async fn complete_step(
        &self,
        id: &str,
        step: StepId,
        outputs: ContextPatch,
    ) -> Result<WorkflowSession, WorkflowError> {
        let session = self
            .mutate(id, |session| {
                let index = session
                    .step_index(step)
                    .ok_or_else(|| WorkflowError::StepNotFound(step.to_string()))?;
                session.context = outputs.apply(&session.context)?;

                let completed = &mut session.steps[index];
                completed.status = StepStatus::Completed;
                completed.error = None;

                match session.steps.get_mut(index + 1) {
                    Some(next) => {
                        next.status = StepStatus::Running;
                        next.error = None;
                        let next_id = next.id;
                        session.current_step_id = next_id;
                        session.status = WorkflowStatus::Running;
                        demote_running_except(session, next_id);
                    }
                    None => {
                        session.current_step_id = step;
                        session.status = WorkflowStatus::Completed;
                        demote_running_except(session, step);
                    }
                }
                Ok(())
            })
            .await?;
        let (done, total) = session.progress();
        info!("完成步骤 {} ({} / {})", step, done, total);
        Ok(session)
    }

    /// 标记步骤失败；不影响其他步骤
    pub async fn fail_step(
        &self,
        id: &str,
        step: StepId,
        message: impl Into<String>,
    ) -> Result<WorkflowSession, WorkflowError> {
        let message = message.into();
        warn!("步骤 {} 失败: {}", step, message);
        self.mutate(id, |session| {
            let target = session
                .step_mut(step)
                .ok_or_else(|| WorkflowError::StepNotFound(step.to_string()))?;
            target.status = StepStatus::Error;
            target.error = Some(message);
            session.status = WorkflowStatus::Failed;
            Ok(())
        })
        .await
    }

    /// 跳转：目标步骤非 pending 或就是当前步骤
    pub async fn go_to_step(&self, id: &str, step: StepId) -> Result<WorkflowSession, WorkflowError> {
        self.mutate(id, |session| {
            let target = session
                .step(step)
                .ok_or_else(|| WorkflowError::StepNotFound(step.to_string()))?;
            if target.status == StepStatus::Pending && session.current_step_id != step {
                return Err(WorkflowError::StepLocked(step.to_string()));
            }
            session.current_step_id = step;
            Ok(())
        })
        .await
    }

    /// 写入步骤的附加数据
    pub async fn set_step_data(
        &self,
        id: &str,
        step: StepId,
        data: Value,
    ) -> Result<WorkflowSession, WorkflowError> {
        self.mutate(id, |session| {
            let target = session
                .step_mut(step)
                .ok_or_else(|| WorkflowError::StepNotFound(step.to_string()))?;
            target.data = Some(data);
            Ok(())
        })
        .await
    }

    /// 局部重新生成
    ///
    /// 清除字段及其派生字段，归属步骤置为 running，之后读取了被清除字段的步骤重置为 pending。
    pub async fn regenerate_field(
        &self,
        id: &str,
        field: ContextField,
    ) -> Result<WorkflowSession, WorkflowError> {
        self.mutate(id, |session| {
            let owner = field.owning_step(session);
            let owner_index = session
                .step_index(owner)
                .ok_or_else(|| WorkflowError::StepNotFound(owner.to_string()))?;

            let cleared = field.closure();
            let patch = cleared
                .iter()
                .fold(ContextPatch::new(), |patch, f| patch.clear(*f));
            session.context = patch.apply(&session.context)?;

            let owners: BTreeSet<StepId> = cleared.iter().map(|f| f.owning_step(session)).collect();
            for step in session.steps.iter_mut().skip(owner_index) {
                if step.id == owner {
                    step.status = StepStatus::Running;
                    step.error = None;
                    step.data = None;
                    continue;
                }
                let reads_cleared = step_inputs(step.id).iter().any(|f| cleared.contains(f));
                if reads_cleared || owners.contains(&step.id) {
                    step.status = StepStatus::Pending;
                    step.error = None;
                    step.data = None;
                }
            }
            demote_running_except(session, owner);

            session.current_step_id = owner;
            session.status = WorkflowStatus::Running;
            info!("重新生成字段 {} ，清除 {} 个字段", field.key(), cleared.len());
            Ok(())
        })
        .await
    }

    /// 在文章生成之后插入改写步骤
    pub async fn insert_rewrite_step(&self, id: &str) -> Result<WorkflowSession, WorkflowError> {
        self.mutate(id, |session| {
            if session.has_step(StepId::ArticleRewrite) {
                return Ok(());
            }
            let index = session
                .step_index(StepId::ArticleGeneration)
                .ok_or_else(|| WorkflowError::StepNotFound(StepId::ArticleGeneration.to_string()))?;
            session
                .steps
                .insert(index + 1, WorkflowStep::pending(StepId::ArticleRewrite));
            Ok(())
        })
        .await
    }

    /// 立即保存会话
    pub async fn flush(&self, id: &str) -> Result<bool, WorkflowError> {
        self.get_session(id).await?;
        if self.sync.flush(id).await? {
            return Ok(true);
        }
        // 没有待写快照但从未保存过时补写一次
        if self.sync.remote_id(id).is_none() {
            let state = self.state.read().await;
            let session = state
                .sessions
                .get(id)
                .ok_or_else(|| WorkflowError::SessionNotFound(id.to_string()))?;
            self.sync.schedule(session);
            drop(state);
            return self.sync.flush(id).await;
        }
        Ok(false)
    }

    pub async fn flush_all(&self) -> Result<usize, WorkflowError> {
        self.sync.flush_all().await
    }

    /// 把会话转为远程记录格式（用于调试接口）
    pub async fn record_of(&self, id: &str) -> Result<SessionRecord, WorkflowError> {
        let session = self.get_session(id).await?;
        let mut record = SessionRecord::from_session(&session)?;
        record.id = self.sync.remote_id(id);
        Ok(record)
    }
}
