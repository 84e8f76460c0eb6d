//! 播客音频合成
//!
//! 合成结果写入临时目录，通过 `/temp/<file>` 提供访问。

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tracing::info;
use wordcast_core::errors::AudioError;
use wordcast_core::ConfigManager;
use wordcast_providers::SpeechSynthesizer;

/// 临时文件的 URL 前缀
pub const TEMP_URL_PREFIX: &str = "/temp/";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SynthesizedAudio {
    pub success: bool,
    pub audio_url: String,
    pub local_path: String,
}

pub struct AudioService {
    config: Arc<ConfigManager>,
    tts: Arc<dyn SpeechSynthesizer>,
}

impl AudioService {
    pub fn new(config: Arc<ConfigManager>, tts: Arc<dyn SpeechSynthesizer>) -> Self {
        Self { config, tts }
    }

    pub fn temp_dir(&self) -> PathBuf {
        self.config.paths().temp_dir
    }

    /// 合成脚本并保存为 `audio_<毫秒时间戳>.mp3`，脚本原文一并保存
    pub async fn synthesize(&self, script: &str) -> Result<SynthesizedAudio, AudioError> {
        if script.trim().is_empty() {
            return Err(AudioError::EmptyScript);
        }
        let dir = self.temp_dir();
        tokio::fs::create_dir_all(&dir).await?;

        let timestamp = chrono::Utc::now().timestamp_millis();
        let script_path = dir.join(format!("script_{timestamp}.txt"));
        tokio::fs::write(&script_path, script).await?;

        let audio = self.tts.synthesize(script).await?;
        let file_name = format!("audio_{timestamp}.mp3");
        let audio_path = dir.join(&file_name);
        tokio::fs::write(&audio_path, &audio).await?;
        info!("[TTS] 音频已保存: {} ({} 字节)", audio_path.display(), audio.len());

        Ok(SynthesizedAudio {
            success: true,
            audio_url: format!("{TEMP_URL_PREFIX}{file_name}"),
            local_path: audio_path.to_string_lossy().to_string(),
        })
    }

    /// 读取 `/temp/<file>` 对应的本地文件，非临时目录地址返回 `None`
    pub async fn read_temp_file(&self, url: &str) -> Result<Option<Vec<u8>>, AudioError> {
        let Some(path) = temp_path(&self.temp_dir(), url) else {
            return Ok(None);
        };
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// `/temp/audio_1.mp3` → `<temp_dir>/audio_1.mp3`
pub fn temp_path(temp_dir: &Path, url: &str) -> Option<PathBuf> {
    let name = url.strip_prefix(TEMP_URL_PREFIX)?;
    let valid = !name.is_empty() && !name.contains(['/', '\\']) && name != "..";
    valid.then(|| temp_dir.join(name))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use tempfile::TempDir;
    use wordcast_core::errors::ProviderError;
    use wordcast_core::AppConfig;

    /// 把脚本字节原样作为音频返回
    pub(crate) struct EchoTts;

    #[async_trait]
    impl SpeechSynthesizer for EchoTts {
        async fn synthesize(&self, script: &str) -> Result<Vec<u8>, ProviderError> {
            Ok(script.as_bytes().to_vec())
        }
    }

    #[tokio::test]
    async fn test_synthesize_writes_audio_and_script() {
        let dir = TempDir::new().unwrap();
        let config = Arc::new(ConfigManager::new(dir.path(), AppConfig::with_root(dir.path())));
        let service = AudioService::new(config, Arc::new(EchoTts));

        let audio = service.synthesize("Hello 你好").await.unwrap();
        assert!(audio.success);
        assert!(audio.audio_url.starts_with("/temp/audio_"));
        assert!(audio.audio_url.ends_with(".mp3"));
        assert_eq!(std::fs::read(&audio.local_path).unwrap(), "Hello 你好".as_bytes());

        let bytes = service.read_temp_file(&audio.audio_url).await.unwrap();
        assert_eq!(bytes.unwrap(), "Hello 你好".as_bytes());
        assert!(service.read_temp_file("https://cdn/x.mp3").await.unwrap().is_none());

        let scripts = std::fs::read_dir(dir.path().join("temp"))
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().starts_with("script_"))
            .count();
        assert_eq!(scripts, 1);
    }

    #[tokio::test]
    async fn test_empty_script_rejected() {
        let dir = TempDir::new().unwrap();
        let config = Arc::new(ConfigManager::new(dir.path(), AppConfig::with_root(dir.path())));
        let service = AudioService::new(config, Arc::new(EchoTts));
        assert!(matches!(service.synthesize("  \n").await, Err(AudioError::EmptyScript)));
    }

    #[test]
    fn test_temp_path_rejects_traversal() {
        let dir = Path::new("/srv/temp");
        assert_eq!(temp_path(dir, "/temp/a.mp3"), Some(PathBuf::from("/srv/temp/a.mp3")));
        assert_eq!(temp_path(dir, "/temp/../etc/passwd"), None);
        assert_eq!(temp_path(dir, "/other/a.mp3"), None);
    }
}
