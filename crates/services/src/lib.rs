//! 业务服务模块
//!
//! 包含工作流会话、文章生成、词典、新闻、音频与发布等业务服务。

pub mod audio_service;
pub mod dictionary_service;
pub mod executor;
pub mod generation_service;
pub mod news_service;
pub mod prompt_store;
pub mod publish_service;
pub mod workflow;

pub use audio_service::{AudioService, SynthesizedAudio};
pub use dictionary_service::DictionaryService;
pub use executor::{StepCommand, StepExecutor, StepOutcome};
pub use generation_service::{GenerateRequest, GenerationOutcome, GenerationService, ResearchRequest};
pub use news_service::{NewsScan, NewsService};
pub use prompt_store::{PromptKey, PromptStore};
pub use publish_service::PublishService;
pub use workflow::WorkflowManager;
