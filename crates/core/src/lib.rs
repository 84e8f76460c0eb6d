//! 核心类型和工具模块
//!
//! 包含 config, errors, logger 以及文章 JSON 的读取与校验等基础功能

pub mod article;
pub mod audit;
pub mod config;
pub mod errors;
pub mod logger;

pub use config::{AppConfig, ConfigManager};
pub use logger::{LogEntry, LogStore, LogStoreConfig, LogStoreLayer, SharedLogStore};

pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
