//! 配置管理模块
//!
//! 配置按以下顺序叠加：默认值 → `wordcast.yaml` → 进程环境变量 → `.env`。
//! `.env` 最后生效，控制台写入后调用 [`ConfigManager::reload`] 即可立即生效。

mod env_file;

pub use env_file::{is_secret_key, mask_value, parse_env, EnvFile, MASK};

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::errors::ConfigError;

pub const CONFIG_FILE_NAME: &str = "wordcast.yaml";
pub const ENV_FILE_NAME: &str = ".env";

/// 应用配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub gemini: GeminiConfig,
    pub tts: TtsConfig,
    pub pocketbase: PocketBaseConfig,
    pub paths: PathsConfig,
    pub sync: SyncConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// 请求体上限（字节）
    pub body_limit: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3003,
            body_limit: 10 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeminiConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub article_model: String,
    pub research_model: String,
    pub vocabulary_model: String,
    pub podcast_model: String,
    /// HTTPS 代理地址，仅在启动时读取
    pub proxy: Option<String>,
    pub timeout_secs: u64,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            article_model: "gemini-3-pro-preview".to_string(),
            research_model: "gemini-3-flash-preview".to_string(),
            vocabulary_model: "gemini-3-flash-preview".to_string(),
            podcast_model: "gemini-3-pro-preview".to_string(),
            proxy: None,
            timeout_secs: 180,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TtsConfig {
    pub app_id: Option<String>,
    pub access_token: Option<String>,
    pub cluster: String,
    pub voice_type: String,
    pub base_url: String,
    pub speed_ratio: f32,
    /// 单次请求的最大字符数
    pub max_chars: usize,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            app_id: None,
            access_token: None,
            cluster: "volcano_tts".to_string(),
            voice_type: "BV001_streaming".to_string(),
            base_url: "https://openspeech.bytedance.com/api/v1/tts".to_string(),
            speed_ratio: 0.85,
            max_chars: 300,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PocketBaseConfig {
    pub url: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
}

impl PocketBaseConfig {
    pub fn is_configured(&self) -> bool {
        self.url.as_deref().is_some_and(|url| !url.trim().is_empty())
    }
}

/// 文件系统路径，相对路径基于 `project_root`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub project_root: PathBuf,
    pub agent_dir: PathBuf,
    pub data_dir: PathBuf,
    pub temp_dir: PathBuf,
    pub output_dir: PathBuf,
}

impl PathsConfig {
    pub fn under(root: &Path) -> Self {
        Self {
            project_root: root.to_path_buf(),
            agent_dir: root.join(".agent"),
            data_dir: root.join("data"),
            temp_dir: root.join("temp"),
            output_dir: root.join("output"),
        }
    }

    fn resolve(&mut self, root: &Path) {
        if self.project_root.as_os_str().is_empty() {
            self.project_root = root.to_path_buf();
        }
        let base = self.project_root.clone();
        let defaults = Self::under(&base);
        for (path, default) in [
            (&mut self.agent_dir, defaults.agent_dir),
            (&mut self.data_dir, defaults.data_dir),
            (&mut self.temp_dir, defaults.temp_dir),
            (&mut self.output_dir, defaults.output_dir),
        ] {
            if path.as_os_str().is_empty() {
                *path = default;
            } else if path.is_relative() {
                *path = base.join(&*path);
            }
        }
    }

    pub fn skills_dir(&self) -> PathBuf {
        self.agent_dir.join("skills")
    }

    pub fn prompts_dir(&self) -> PathBuf {
        self.agent_dir.join("prompts")
    }

    pub fn dictionary_file(&self) -> PathBuf {
        self.data_dir.join("dictionary.json")
    }

    pub fn sessions_file(&self) -> PathBuf {
        self.data_dir.join("workflow_sessions.json")
    }

    pub fn articles_dir(&self) -> PathBuf {
        self.output_dir.join("articles")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// 会话保存的防抖间隔（毫秒）
    pub debounce_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self { debounce_ms: 800 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// 是否写入日志文件
    pub enabled: bool,
    pub retention_days: u32,
    pub max_logs: usize,
    pub log_dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            retention_days: 7,
            max_logs: 1000,
            log_dir: None,
        }
    }
}

impl AppConfig {
    /// 以指定目录为项目根创建默认配置
    pub fn with_root(root: &Path) -> Self {
        Self {
            paths: PathsConfig::under(root),
            ..Self::default()
        }
    }

    /// 从项目根加载完整配置
    pub fn load(root: &Path) -> Result<Self, ConfigError> {
        let process_vars: BTreeMap<String, String> = std::env::vars().collect();
        Self::load_with_env(root, &process_vars)
    }

    /// 使用给定的进程环境变量加载配置
    pub fn load_with_env(
        root: &Path,
        process_vars: &BTreeMap<String, String>,
    ) -> Result<Self, ConfigError> {
        let yaml_path = root.join(CONFIG_FILE_NAME);
        let mut config = if yaml_path.exists() {
            let content = fs::read_to_string(&yaml_path)?;
            debug!("加载配置文件: {}", yaml_path.display());
            serde_yaml::from_str::<AppConfig>(&content)?
        } else {
            AppConfig::default()
        };
        config.paths.resolve(root);
        config.apply_env(process_vars)?;

        let env_file = EnvFile::new(config.paths.project_root.join(ENV_FILE_NAME));
        config.apply_env(&env_file.read()?)?;

        Ok(config)
    }

    /// 叠加环境变量形式的键值
    pub fn apply_env(&mut self, vars: &BTreeMap<String, String>) -> Result<(), ConfigError> {
        let get = |key: &str| {
            vars.get(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        if let Some(value) = get("GEMINI_API_KEY") {
            self.gemini.api_key = Some(value);
        }
        if let Some(value) = get("GEMINI_BASE_URL") {
            self.gemini.base_url = value;
        }
        if let Some(value) = get("ARTICLE_MODEL") {
            self.gemini.article_model = value;
        }
        if let Some(value) = get("RESEARCH_MODEL") {
            self.gemini.research_model = value;
        }
        if let Some(value) = get("VOCABULARY_MODEL") {
            self.gemini.vocabulary_model = value;
        }
        if let Some(value) = get("PODCAST_MODEL") {
            self.gemini.podcast_model = value;
        }
        if let Some(value) = get("HTTPS_PROXY") {
            self.gemini.proxy = Some(value);
        }
        if let Some(value) = get("POCKETBASE_URL") {
            self.pocketbase.url = Some(value.trim_end_matches('/').to_string());
        }
        if let Some(value) = get("POCKETBASE_EMAIL") {
            self.pocketbase.email = Some(value);
        }
        if let Some(value) = get("POCKETBASE_PASSWORD") {
            self.pocketbase.password = Some(value);
        }
        if let Some(value) = get("TTS_APP_ID") {
            self.tts.app_id = Some(value);
        }
        if let Some(value) = get("TTS_ACCESS_TOKEN") {
            self.tts.access_token = Some(value);
        }
        if let Some(value) = get("TTS_CLUSTER") {
            self.tts.cluster = value;
        }
        if let Some(value) = get("TTS_VOICE_TYPE") {
            self.tts.voice_type = value;
        }
        if let Some(value) = get("TTS_BASE_URL") {
            self.tts.base_url = value;
        }
        if let Some(value) = get("HOST") {
            self.server.host = value;
        }
        if let Some(value) = get("PORT") {
            self.server.port = value
                .parse()
                .map_err(|_| ConfigError::Invalid(format!("PORT 不是合法端口: {value}")))?;
        }
        if let Some(value) = get("WORKFLOW_SYNC_DEBOUNCE_MS") {
            self.sync.debounce_ms = value.parse().map_err(|_| {
                ConfigError::Invalid(format!("WORKFLOW_SYNC_DEBOUNCE_MS 无效: {value}"))
            })?;
        }
        Ok(())
    }
}

/// 运行时配置管理器
///
/// 保存当前生效的配置快照，并负责 `.env` 的读写与重新加载。
pub struct ConfigManager {
    root: PathBuf,
    current: RwLock<AppConfig>,
}

impl ConfigManager {
    pub fn new(root: impl Into<PathBuf>, config: AppConfig) -> Self {
        Self {
            root: root.into(),
            current: RwLock::new(config),
        }
    }

    /// 从项目根加载配置并创建管理器
    pub fn load(root: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let root = root.into();
        let config = AppConfig::load(&root)?;
        Ok(Self::new(root, config))
    }

    /// 当前配置快照
    pub fn snapshot(&self) -> AppConfig {
        self.current.read().clone()
    }

    pub fn gemini(&self) -> GeminiConfig {
        self.current.read().gemini.clone()
    }

    pub fn tts(&self) -> TtsConfig {
        self.current.read().tts.clone()
    }

    pub fn pocketbase(&self) -> PocketBaseConfig {
        self.current.read().pocketbase.clone()
    }

    pub fn paths(&self) -> PathsConfig {
        self.current.read().paths.clone()
    }

    pub fn env_file(&self) -> EnvFile {
        let root = self.current.read().paths.project_root.clone();
        let root = if root.as_os_str().is_empty() {
            self.root.clone()
        } else {
            root
        };
        EnvFile::new(root.join(ENV_FILE_NAME))
    }

    /// 重新加载配置
    pub fn reload(&self) -> Result<AppConfig, ConfigError> {
        let config = AppConfig::load(&self.root)?;
        *self.current.write() = config.clone();
        info!("配置已重新加载");
        Ok(config)
    }

    /// 写入 `.env` 并立即生效
    pub fn update_env(&self, updates: &BTreeMap<String, String>) -> Result<usize, ConfigError> {
        let written = self.env_file().upsert(updates)?;
        if written > 0 {
            let mut config = self.snapshot();
            let applied: BTreeMap<String, String> = updates
                .iter()
                .filter(|(_, value)| !value.contains(MASK))
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect();
            config.apply_env(&applied)?;
            *self.current.write() = config;
            info!("已更新 {} 项配置", written);
        }
        Ok(written)
    }
}
