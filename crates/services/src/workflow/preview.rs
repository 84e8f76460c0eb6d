//! 发布预览
//!
//! 从会话上下文中取出某个等级的文章、词汇表与播客脚本，生成发布前检查项和上传负载。

use serde::Serialize;
use serde_json::{json, Map, Value};
use wordcast_core::article::{article_root, count_english_words, glossary_len, paragraphs};

use super::types::{Level, SessionContext};

/// 文章 meta 中可能携带覆盖率的字段
const COVERAGE_META_KEYS: [&str; 4] = ["wordCoverage", "word_coverage", "coverage", "coveragePercent"];

/// 覆盖率来源
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CoverageSource {
    Meta,
    Calculated,
}

/// 检查项
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditKey {
    Body,
    Glossary,
    Coverage,
    Podcast,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditItem {
    pub key: AuditKey,
    pub label: &'static str,
    pub passed: bool,
    pub detail: String,
}

/// 某一等级的发布快照
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LevelSnapshot {
    pub level: Level,
    pub article: Option<Value>,
    pub glossary: Value,
    pub podcast_script: String,
    pub podcast_url: String,
    pub paragraph_count: usize,
    pub glossary_count: usize,
    pub coverage_value: Option<f64>,
    pub coverage_source: Option<CoverageSource>,
    /// 上传负载，没有文章时为 `None`
    pub payload: Option<Value>,
}

impl LevelSnapshot {
    pub fn build(context: &SessionContext, level: Level) -> Self {
        let article = context.article(level).filter(|a| !a.is_null()).cloned();
        let glossary = context
            .glossary_for(level)
            .filter(|g| g.is_object() || g.is_array())
            .cloned()
            .unwrap_or_else(|| Value::Object(Map::new()));
        let podcast_script = context.podcast_script_for(level).unwrap_or_default().to_string();
        let podcast_url = context.podcast_url_for(level).unwrap_or_default().to_string();

        let (paragraph_count, meta_coverage, word_count) = match &article {
            Some(article) => (
                paragraphs(article).len(),
                meta_coverage(article),
                count_english_words(article),
            ),
            None => (0, None, 0),
        };
        let (coverage_value, coverage_source) = match meta_coverage {
            Some(value) => (Some(value), Some(CoverageSource::Meta)),
            None if word_count > 0 => (Some(word_count as f64), Some(CoverageSource::Calculated)),
            None => (None, None),
        };

        let payload = article.as_ref().map(|article| {
            json!({
                "article": article,
                "glossary": glossary,
                "podcast_script": podcast_script,
                "podcast_url": podcast_url,
            })
        });

        Self {
            level,
            glossary_count: glossary_len(Some(&glossary)),
            article,
            glossary,
            podcast_script,
            podcast_url,
            paragraph_count,
            coverage_value,
            coverage_source,
            payload,
        }
    }

    pub fn audit_items(&self) -> Vec<AuditItem> {
        let has_body = self.paragraph_count > 0;
        let has_glossary = self.glossary_count > 0;
        let has_podcast = !self.podcast_script.trim().is_empty();
        let coverage = self.coverage_value.filter(|v| *v > 0.0);

        vec![
            AuditItem {
                key: AuditKey::Body,
                label: "主文内容 (Body)",
                passed: has_body,
                detail: if has_body {
                    format!("{} 段", self.paragraph_count)
                } else {
                    "缺少段落数据".to_string()
                },
            },
            AuditItem {
                key: AuditKey::Glossary,
                label: "词汇表 (Glossary)",
                passed: has_glossary,
                detail: if has_glossary {
                    format!("{} 个词", self.glossary_count)
                } else {
                    "词汇表为空".to_string()
                },
            },
            AuditItem {
                key: AuditKey::Coverage,
                label: "词汇覆盖率 (Coverage)",
                passed: coverage.is_some(),
                detail: match coverage {
                    Some(value) => {
                        let suffix = if self.coverage_source == Some(CoverageSource::Calculated) {
                            "（根据正文词数估算）"
                        } else {
                            ""
                        };
                        format!("{}{}", format_coverage(value), suffix)
                    }
                    None => "缺少覆盖率信息".to_string(),
                },
            },
            AuditItem {
                key: AuditKey::Podcast,
                label: "播客脚本 (Podcast)",
                passed: has_podcast,
                detail: if has_podcast {
                    format!("脚本长度 {} 字符", self.podcast_script.chars().count())
                } else {
                    "播客脚本缺失".to_string()
                },
            },
        ]
    }
}

fn meta_coverage(article: &Value) -> Option<f64> {
    let meta = article_root(article).get("meta")?;
    COVERAGE_META_KEYS
        .iter()
        .filter_map(|key| meta.get(*key).and_then(Value::as_f64))
        .find(|value| value.is_finite())
}

/// 覆盖率显示：不超过 1 视为比例，100 以上取整，其余保留一位小数
pub fn format_coverage(value: f64) -> String {
    let normalized = if value <= 1.0 { value * 100.0 } else { value };
    let rounded = if normalized >= 100.0 {
        normalized.round()
    } else {
        (normalized * 10.0).round() / 10.0
    };
    format!("{rounded}%")
}

/// 发布预览结果
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishPreview {
    pub snapshot: LevelSnapshot,
    pub items: Vec<AuditItem>,
    pub ready: bool,
    pub missing: usize,
}

impl PublishPreview {
    pub fn build(context: &SessionContext, level: Level) -> Self {
        let snapshot = LevelSnapshot::build(context, level);
        let items = snapshot.audit_items();
        let missing = items.iter().filter(|item| !item.passed).count();
        Self {
            snapshot,
            ready: missing == 0,
            missing,
            items,
        }
    }

    pub fn failed_labels(&self) -> Vec<&'static str> {
        self.items
            .iter()
            .filter(|item| !item.passed)
            .map(|item| item.label)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn article(meta: Value) -> Value {
        json!({
            "title": { "en": "Tariffs", "zh": "关税" },
            "meta": meta,
            "paragraphs": [
                { "paragraph": { "tokenizedSentences": [
                    { "tokens": [{ "text": "Global" }, { "text": "trade" }, { "text": "slows." }] }
                ] } },
                { "paragraph": { "tokenizedSentences": [
                    { "tokens": [{ "text": "Prices" }, { "text": "rise" }, { "text": "，" }] }
                ] } }
            ]
        })
    }

    #[test]
    fn test_format_coverage() {
        assert_eq!(format_coverage(0.856), "85.6%");
        assert_eq!(format_coverage(1.0), "100%");
        assert_eq!(format_coverage(42.26), "42.3%");
        assert_eq!(format_coverage(230.4), "230%");
    }

    #[test]
    fn test_empty_context_fails_every_item() {
        let preview = PublishPreview::build(&SessionContext::default(), Level::Ten);
        assert!(!preview.ready);
        assert_eq!(preview.missing, 4);
        assert!(preview.snapshot.payload.is_none());
        let details: Vec<&str> = preview.items.iter().map(|i| i.detail.as_str()).collect();
        assert_eq!(details, vec!["缺少段落数据", "词汇表为空", "缺少覆盖率信息", "播客脚本缺失"]);
    }

    #[test]
    fn test_meta_coverage_wins() {
        let context = SessionContext {
            article_json: Some(article(json!({ "word_coverage": 0.92 }))),
            glossary: Some(json!({ "tariff": {}, "slow": {} })),
            podcast_script: Some("Host: 你好".to_string()),
            podcast_url: Some("/temp/audio_1.mp3".to_string()),
            ..SessionContext::default()
        };
        let preview = PublishPreview::build(&context, Level::Ten);

        assert!(preview.ready);
        assert_eq!(preview.snapshot.coverage_source, Some(CoverageSource::Meta));
        assert_eq!(preview.items[0].detail, "2 段");
        assert_eq!(preview.items[1].detail, "2 个词");
        assert_eq!(preview.items[2].detail, "92%");
        assert_eq!(preview.items[3].detail, "脚本长度 8 字符");

        let payload = preview.snapshot.payload.unwrap();
        assert_eq!(payload["podcast_url"], "/temp/audio_1.mp3");
        assert_eq!(payload["glossary"]["tariff"], json!({}));
    }

    #[test]
    fn test_calculated_coverage_for_level_seven() {
        let context = SessionContext {
            article_json: Some(article(json!({ "coverage": 0.5 }))),
            article_json_7: Some(article(json!({}))),
            ..SessionContext::default()
        };
        let preview = PublishPreview::build(&context, Level::Seven);

        assert_eq!(preview.snapshot.coverage_source, Some(CoverageSource::Calculated));
        assert_eq!(preview.snapshot.coverage_value, Some(5.0));
        assert_eq!(preview.items[2].detail, "5%（根据正文词数估算）");
        assert_eq!(preview.failed_labels(), vec!["词汇表 (Glossary)", "播客脚本 (Podcast)"]);
        assert_eq!(preview.snapshot.payload.unwrap()["podcast_script"], "");
    }
}
