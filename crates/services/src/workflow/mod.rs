//! 内容生产工作流
//!
//! 会话与步骤模型、上下文补丁、防抖持久化与发布预览。

pub mod manager;
pub mod patch;
pub mod preview;
pub mod record;
pub mod repository;
pub mod sync;
pub mod types;

pub use manager::{WorkflowManager, DEFAULT_TITLE};
pub use patch::{step_inputs, ContextField, ContextPatch, SessionPatch};
pub use preview::{format_coverage, AuditItem, AuditKey, CoverageSource, LevelSnapshot, PublishPreview};
pub use record::SessionRecord;
pub use repository::{
    FileSessionRepository, InMemorySessionRepository, PocketBaseSessionRepository, SessionRepository,
    SESSIONS_COLLECTION,
};
pub use sync::{DeleteAck, SessionSync, DEFAULT_DEBOUNCE};
pub use types::*;
