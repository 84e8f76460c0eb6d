//! 本地词典服务
//!
//! 词典保存在 `data/dictionary.json`，键为小写单词。

use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tracing::{info, warn};
use wordcast_core::article::extract_vocabulary;
use wordcast_core::errors::DictionaryError;
use wordcast_core::ConfigManager;

use crate::generation_service::{GenerationOutcome, GenerationService};

pub type Dictionary = Map<String, Value>;

/// 扫描出的单词
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScannedWord {
    pub word: String,
    pub in_dict: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entry: Option<Value>,
}

/// 文章词汇与词典的比对结果
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DictionaryScan {
    pub total_article_words: usize,
    pub scannable_words: usize,
    pub existing_count: usize,
    pub missing_count: usize,
    pub existing_words: Vec<ScannedWord>,
    pub missing_words: Vec<ScannedWord>,
    pub coverage_percent: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AddResult {
    pub success: bool,
    pub added_count: usize,
    pub total_words: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DictionaryStats {
    pub total_words: usize,
    pub last_updated: Option<String>,
}

pub struct DictionaryService {
    config: Arc<ConfigManager>,
    generation: Arc<GenerationService>,
    write_lock: Mutex<()>,
}

impl DictionaryService {
    pub fn new(config: Arc<ConfigManager>, generation: Arc<GenerationService>) -> Self {
        Self {
            config,
            generation,
            write_lock: Mutex::new(()),
        }
    }

    fn path(&self) -> PathBuf {
        self.config.paths().dictionary_file()
    }

    /// 读取词典，文件不存在时为空
    pub async fn load(&self) -> Result<Dictionary, DictionaryError> {
        match tokio::fs::read_to_string(self.path()).await {
            Ok(content) if content.trim().is_empty() => Ok(Dictionary::new()),
            Ok(content) => Ok(serde_json::from_str(&content)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Dictionary::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, dictionary: &Dictionary) -> Result<(), DictionaryError> {
        let path = self.path();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, serde_json::to_string_pretty(dictionary)?).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    /// 扫描文章候选词并与词典比对
    pub async fn scan(&self, article: &Value) -> Result<DictionaryScan, DictionaryError> {
        let extraction = extract_vocabulary(article);
        let dictionary = self.load().await?;
        let lowered: Map<String, Value> = dictionary
            .iter()
            .map(|(word, entry)| (word.to_lowercase(), entry.clone()))
            .collect();

        let (existing, missing): (Vec<_>, Vec<_>) = extraction
            .words
            .iter()
            .map(|word| {
                let entry = lowered.get(word).cloned();
                ScannedWord {
                    word: word.clone(),
                    in_dict: entry.is_some(),
                    entry,
                }
            })
            .partition(|w| w.in_dict);

        let scannable = extraction.words.len();
        let coverage_percent = if scannable == 0 {
            100
        } else {
            ((existing.len() as f64 / scannable as f64) * 100.0).round() as u32
        };

        Ok(DictionaryScan {
            total_article_words: extraction.raw_count,
            scannable_words: scannable,
            existing_count: existing.len(),
            missing_count: missing.len(),
            existing_words: existing,
            missing_words: missing,
            coverage_percent,
        })
    }

    /// 用模型为单词生成词条
    pub async fn generate(&self, words: &[String]) -> Result<GenerationOutcome, DictionaryError> {
        let words: Vec<String> = words
            .iter()
            .map(|w| w.trim().to_string())
            .filter(|w| !w.is_empty())
            .collect();
        if words.is_empty() {
            return Err(DictionaryError::EmptyWords);
        }
        info!("[Dictionary] 为 {} 个单词生成词条", words.len());
        Ok(self.generation.dictionary_entries(&words).await?)
    }

    /// 合并词条，已存在的单词保持不变
    pub async fn add(&self, entries: &Value) -> Result<AddResult, DictionaryError> {
        let entries = entries
            .as_object()
            .ok_or_else(|| DictionaryError::InvalidEntries("Missing entries object".to_string()))?;

        let _guard = self.write_lock.lock().await;
        let mut dictionary = self.load().await?;
        let mut added_count = 0;
        for (word, entry) in entries {
            let key = word.to_lowercase();
            let exists = dictionary.get(&key).is_some_and(|e| !e.is_null());
            if !exists {
                dictionary.insert(key, entry.clone());
                added_count += 1;
            }
        }
        self.save(&dictionary).await?;
        info!("[Dictionary] 新增 {} 个词条，共 {} 个", added_count, dictionary.len());

        Ok(AddResult {
            success: true,
            added_count,
            total_words: dictionary.len(),
        })
    }

    pub async fn stats(&self) -> Result<DictionaryStats, DictionaryError> {
        let dictionary = self.load().await?;
        let last_updated = match tokio::fs::metadata(self.path()).await {
            Ok(meta) => meta.modified().ok().map(|time| {
                chrono::DateTime::<chrono::Utc>::from(time)
                    .to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                warn!("[Dictionary] 读取文件信息失败: {}", e);
                None
            }
        };
        Ok(DictionaryStats {
            total_words: dictionary.len(),
            last_updated,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation_service::tests::{service, ScriptedModel};
    use serde_json::json;
    use tempfile::TempDir;
    use wordcast_core::AppConfig;

    fn dictionary(dir: &TempDir, model: ScriptedModel) -> DictionaryService {
        let config = Arc::new(ConfigManager::new(dir.path(), AppConfig::with_root(dir.path())));
        let generation = Arc::new(service(dir, Arc::new(model)));
        DictionaryService::new(config, generation)
    }

    fn article() -> Value {
        json!({ "article": { "paragraphs": [
            { "paragraph": { "tokenizedSentences": [
                { "tokens": [
                    { "text": "Tariffs" }, { "text": "reshape" }, { "text": "global" },
                    { "text": "trade" }, { "text": "the" }, { "text": "贸易" }
                ] }
            ] } }
        ] } })
    }

    #[tokio::test]
    async fn test_scan_against_dictionary() {
        let dir = TempDir::new().unwrap();
        let svc = dictionary(&dir, ScriptedModel::default());
        svc.add(&json!({ "Tariffs": { "phonetic": "/ˈtærɪfs/" }, "trade": {} }))
            .await
            .unwrap();

        let scan = svc.scan(&article()).await.unwrap();
        assert_eq!(scan.total_article_words, 5);
        assert_eq!(scan.scannable_words, 4);
        assert_eq!(scan.existing_count, 2);
        assert_eq!(scan.missing_count, 2);
        assert_eq!(scan.coverage_percent, 50);
        assert_eq!(scan.existing_words[0].word, "tariffs");
        assert_eq!(
            scan.existing_words[0].entry,
            Some(json!({ "phonetic": "/ˈtærɪfs/" }))
        );
        let missing: Vec<&str> = scan.missing_words.iter().map(|w| w.word.as_str()).collect();
        assert_eq!(missing, vec!["global", "reshape"]);
    }

    #[tokio::test]
    async fn test_scan_empty_article_is_full_coverage() {
        let dir = TempDir::new().unwrap();
        let svc = dictionary(&dir, ScriptedModel::default());
        let scan = svc.scan(&json!({})).await.unwrap();
        assert_eq!(scan.scannable_words, 0);
        assert_eq!(scan.coverage_percent, 100);
    }

    #[tokio::test]
    async fn test_add_keeps_existing_entries() {
        let dir = TempDir::new().unwrap();
        let svc = dictionary(&dir, ScriptedModel::default());

        let first = svc.add(&json!({ "Rise": { "v": 1 } })).await.unwrap();
        assert_eq!(first.added_count, 1);
        let second = svc
            .add(&json!({ "rise": { "v": 2 }, "fall": { "v": 3 } }))
            .await
            .unwrap();
        assert_eq!(second, AddResult { success: true, added_count: 1, total_words: 2 });

        let all = svc.load().await.unwrap();
        assert_eq!(all["rise"], json!({ "v": 1 }));

        assert!(matches!(
            svc.add(&json!(["rise"])).await,
            Err(DictionaryError::InvalidEntries(_))
        ));
    }

    #[tokio::test]
    async fn test_stats_and_generate_validation() {
        let dir = TempDir::new().unwrap();
        let svc = dictionary(
            &dir,
            ScriptedModel::replying(vec!["{\"entries\":{\"tariff\":{\"word\":\"tariff\"}}}"]),
        );

        let empty = svc.stats().await.unwrap();
        assert_eq!(empty, DictionaryStats { total_words: 0, last_updated: None });

        assert!(matches!(
            svc.generate(&[" ".to_string()]).await,
            Err(DictionaryError::EmptyWords)
        ));
        let outcome = svc.generate(&["tariff".to_string()]).await.unwrap();
        assert_eq!(outcome.parsed().unwrap()["entries"]["tariff"]["word"], "tariff");

        svc.add(&json!({ "tariff": {} })).await.unwrap();
        let stats = svc.stats().await.unwrap();
        assert_eq!(stats.total_words, 1);
        assert!(stats.last_updated.unwrap().ends_with('Z'));
    }
}
