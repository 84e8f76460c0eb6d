//! 日志管理模块
//!
//! 内存环形缓冲 + 可选的滚动日志文件，所有写入都先经过脱敏。
//! [`LogStoreLayer`] 把 `tracing` 事件接入 [`LogStore`]。
use crate::config::LoggingConfig;
use chrono::{Duration, Local, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt::Write as _;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;

#[derive(Debug, Clone)]
pub struct LogStoreConfig {
    pub max_logs: usize,
    pub retention_days: u32,
    pub max_file_size: u64,
    pub enable_file_logging: bool,
}

impl Default for LogStoreConfig {
    fn default() -> Self {
        Self {
            max_logs: 1000,
            retention_days: 7,
            max_file_size: 10 * 1024 * 1024,
            enable_file_logging: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: String,
    pub level: String,
    pub target: String,
    pub message: String,
}

pub struct LogStore {
    logs: VecDeque<LogEntry>,
    config: LogStoreConfig,
    log_file_path: Option<PathBuf>,
}

impl Default for LogStore {
    fn default() -> Self {
        Self::with_config(LogStoreConfig::default(), Some(default_log_dir()))
    }
}

fn default_log_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".wordcast")
        .join("logs")
}

impl LogStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 仅内存缓冲，不写文件
    pub fn in_memory(max_logs: usize) -> Self {
        Self::with_config(
            LogStoreConfig {
                max_logs,
                enable_file_logging: false,
                ..LogStoreConfig::default()
            },
            None,
        )
    }

    pub fn with_config(config: LogStoreConfig, log_dir: Option<PathBuf>) -> Self {
        let log_file_path = log_dir
            .filter(|_| config.enable_file_logging)
            .and_then(|dir| match fs::create_dir_all(&dir) {
                Ok(()) => Some(dir.join("wordcast.log")),
                Err(_) => None,
            });
        Self {
            logs: VecDeque::with_capacity(config.max_logs.min(1024)),
            config,
            log_file_path,
        }
    }

    pub fn add(&mut self, level: &str, target: &str, message: &str) {
        let sanitized = sanitize_log_message(message);
        let entry = LogEntry {
            timestamp: Utc::now().to_rfc3339(),
            level: level.to_string(),
            target: target.to_string(),
            message: sanitized.clone(),
        };
        self.logs.push_back(entry);
        if let Some(ref path) = self.log_file_path {
            self.rotate_log_file_if_needed(path);
            let local_time = Local::now().format("%Y-%m-%d %H:%M:%S%.3f");
            let log_line = format!(
                "{} [{}] {}: {}\n",
                local_time,
                level.to_uppercase(),
                target,
                sanitized
            );
            if let Ok(mut file) = OpenOptions::new().create(true).append(true).open(path) {
                let _ = file.write_all(log_line.as_bytes());
            }
        }
        while self.logs.len() > self.config.max_logs {
            self.logs.pop_front();
        }
    }

    pub fn get_logs(&self) -> Vec<LogEntry> {
        self.logs.iter().cloned().collect()
    }

    /// 最近的 `limit` 条日志，按时间正序
    pub fn recent(&self, limit: usize) -> Vec<LogEntry> {
        let skip = self.logs.len().saturating_sub(limit);
        self.logs.iter().skip(skip).cloned().collect()
    }

    pub fn clear(&mut self) {
        self.logs.clear();
    }

    pub fn get_log_file_path(&self) -> Option<String> {
        self.log_file_path
            .as_ref()
            .map(|p| p.to_string_lossy().to_string())
    }

    fn rotate_log_file_if_needed(&self, path: &Path) {
        let Ok(metadata) = fs::metadata(path) else {
            return;
        };
        if metadata.len() <= self.config.max_file_size {
            return;
        }
        let suffix = Local::now().format("%Y%m%d-%H%M%S");
        let rotated = path.with_file_name(format!(
            "{}.{}",
            path.file_name().unwrap_or_default().to_string_lossy(),
            suffix
        ));
        let _ = fs::rename(path, &rotated);
        self.prune_old_logs(path);
    }

    fn prune_old_logs(&self, path: &Path) {
        let Some(dir) = path.parent() else { return };
        let Ok(entries) = fs::read_dir(dir) else {
            return;
        };
        let cutoff = Utc::now() - Duration::days(self.config.retention_days as i64);
        let prefix = format!(
            "{}.",
            path.file_name().unwrap_or_default().to_string_lossy()
        );
        for entry in entries.flatten() {
            let file_name = entry.file_name();
            let file_name = file_name.to_string_lossy();
            if !file_name.starts_with(&prefix) {
                continue;
            }
            let Ok(metadata) = entry.metadata() else {
                continue;
            };
            let Ok(modified) = metadata.modified() else {
                continue;
            };
            let modified = chrono::DateTime::<Utc>::from(modified);
            if modified < cutoff {
                let _ = fs::remove_file(entry.path());
            }
        }
    }
}

pub type SharedLogStore = Arc<parking_lot::RwLock<LogStore>>;

pub fn create_log_store_from_config(logging: &LoggingConfig) -> LogStore {
    let config = LogStoreConfig {
        max_logs: logging.max_logs,
        retention_days: logging.retention_days,
        enable_file_logging: logging.enabled,
        ..LogStoreConfig::default()
    };
    let dir = logging.log_dir.clone().unwrap_or_else(default_log_dir);
    LogStore::with_config(config, Some(dir))
}

static SANITIZE_PATTERNS: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    [
        (r"Bearer\s*;?\s*[A-Za-z0-9._-]+", "Bearer ***"),
        (
            r#"api[_-]?key["']?\s*[:=]\s*["']?[A-Za-z0-9._-]+"#,
            "api_key: ***",
        ),
        (r"key=[A-Za-z0-9._-]{12,}", "key=***"),
        (r#"token["']?\s*[:=]\s*["']?[A-Za-z0-9._-]+"#, "token: ***"),
        (
            r#"access[_-]?token["']?\s*[:=]\s*["']?[A-Za-z0-9._-]+"#,
            "access_token: ***",
        ),
        (
            r#"[Aa]uthorization["']?\s*[:=]\s*["']?[A-Za-z0-9._\s-]+"#,
            "authorization: ***",
        ),
        (r#"password["']?\s*[:=]\s*["']?[^\s"',}]+"#, "password: ***"),
        (
            r#"secret["']?\s*[:=]\s*["']?[A-Za-z0-9._-]+"#,
            "secret: ***",
        ),
    ]
    .into_iter()
    .filter_map(|(pattern, replacement)| Regex::new(pattern).ok().map(|re| (re, replacement)))
    .collect()
});

/// 日志脱敏：Bearer token、API key、密码、密钥等
pub fn sanitize_log_message(message: &str) -> String {
    let mut sanitized = message.to_string();
    for (re, replacement) in SANITIZE_PATTERNS.iter() {
        sanitized = re.replace_all(&sanitized, *replacement).to_string();
    }
    sanitized
}

/// 把 tracing 事件写入 [`LogStore`] 的 Layer
pub struct LogStoreLayer {
    store: SharedLogStore,
}

impl LogStoreLayer {
    pub fn new(store: SharedLogStore) -> Self {
        Self { store }
    }
}

#[derive(Default)]
struct MessageVisitor {
    message: String,
    fields: String,
}

impl Visit for MessageVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message.push_str(value);
        } else {
            let _ = write!(self.fields, " {}={}", field.name(), value);
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            let _ = write!(self.message, "{value:?}");
        } else {
            let _ = write!(self.fields, " {}={:?}", field.name(), value);
        }
    }
}

impl<S: Subscriber> Layer<S> for LogStoreLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);
        let message = format!("{}{}", visitor.message, visitor.fields);
        self.store.write().add(
            &metadata.level().to_string().to_lowercase(),
            metadata.target(),
            &message,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tracing_subscriber::layer::SubscriberExt;

    #[test]
    fn test_sanitize_bearer_token() {
        let input = "Authorization: Bearer abcDEF123._-XYZ";
        let output = sanitize_log_message(input);
        assert!(!output.contains("abcDEF123"));
        assert!(output.contains("***"));
    }

    #[test]
    fn test_sanitize_volcengine_bearer() {
        let output = sanitize_log_message("header Bearer;tts_token_value sent");
        assert!(!output.contains("tts_token_value"));
    }

    #[test]
    fn test_sanitize_api_key() {
        let input = r#"request api_key="sk-test_123.456-ABC" end"#;
        let output = sanitize_log_message(input);
        assert!(output.contains("api_key: ***"));
        assert!(!output.contains("sk-test_123"));
    }

    #[test]
    fn test_sanitize_query_key() {
        let output = sanitize_log_message("POST /models/x:generateContent?key=AIzaSyABCDEFGHIJK");
        assert!(!output.contains("AIzaSyABCDEFGHIJK"));
    }

    #[test]
    fn test_sanitize_password() {
        let input = r#"{"password":"p@ssW0rd!"}"#;
        let output = sanitize_log_message(input);
        assert!(output.contains("password: ***"));
        assert!(!output.contains("p@ssW0rd!"));
    }

    #[test]
    fn test_plain_text_unchanged() {
        let input = "这是一段普通日志，不包含任何敏感字段。";
        let output = sanitize_log_message(input);
        assert_eq!(output, input);
    }

    #[test]
    fn test_ring_buffer_keeps_latest() {
        let mut store = LogStore::in_memory(3);
        for i in 0..5 {
            store.add("info", "test", &format!("entry {i}"));
        }
        let logs = store.get_logs();
        assert_eq!(logs.len(), 3);
        assert_eq!(logs[0].message, "entry 2");
        assert_eq!(store.recent(1)[0].message, "entry 4");
    }

    #[test]
    fn test_file_logging_writes_sanitized_line() {
        let dir = TempDir::new().unwrap();
        let config = LogStoreConfig::default();
        let mut store = LogStore::with_config(config, Some(dir.path().to_path_buf()));
        store.add("warn", "wordcast", "password=hunter2 leaked");

        let path = store.get_log_file_path().unwrap();
        let content = fs::read_to_string(path).unwrap();
        assert!(content.contains("[WARN] wordcast: password: ***"));
        assert!(!content.contains("hunter2"));
    }

    #[test]
    fn test_layer_captures_tracing_events() {
        let store: SharedLogStore = Arc::new(parking_lot::RwLock::new(LogStore::in_memory(10)));
        let subscriber =
            tracing_subscriber::registry().with(LogStoreLayer::new(store.clone()));

        tracing::subscriber::with_default(subscriber, || {
            tracing::info!(session = "abc", "会话已创建");
        });

        let logs = store.read().get_logs();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].level, "info");
        assert_eq!(logs[0].message, "会话已创建 session=abc");
    }
}
