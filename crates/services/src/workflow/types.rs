//! 工作流类型定义
//!
//! 定义会话、步骤、上下文等核心数据结构

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use wordcast_providers::{GroundingSource, NewsItem};

/// 步骤标识
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StepId {
    /// 选题搜索
    TopicDiscovery,
    /// 文章生成
    ArticleGeneration,
    /// 文章改写（可选步骤）
    ArticleRewrite,
    /// 词汇补全
    Vocabulary,
    /// 播客脚本
    PodcastScript,
    /// 音频合成
    AudioSynthesis,
    /// 发布预览
    PublishPreview,
    /// 最终发布
    Publishing,
}

impl StepId {
    pub const ALL: [StepId; 8] = [
        StepId::TopicDiscovery,
        StepId::ArticleGeneration,
        StepId::ArticleRewrite,
        StepId::Vocabulary,
        StepId::PodcastScript,
        StepId::AudioSynthesis,
        StepId::PublishPreview,
        StepId::Publishing,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TopicDiscovery => "topic-discovery",
            Self::ArticleGeneration => "article-generation",
            Self::ArticleRewrite => "article-rewrite",
            Self::Vocabulary => "vocabulary",
            Self::PodcastScript => "podcast-script",
            Self::AudioSynthesis => "audio-synthesis",
            Self::PublishPreview => "publish-preview",
            Self::Publishing => "publishing",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::TopicDiscovery => "选题搜索",
            Self::ArticleGeneration => "文章生成",
            Self::ArticleRewrite => "文章改写",
            Self::Vocabulary => "词汇补全",
            Self::PodcastScript => "播客脚本",
            Self::AudioSynthesis => "音频合成",
            Self::PublishPreview => "发布预览",
            Self::Publishing => "最终发布",
        }
    }
}

impl fmt::Display for StepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StepId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|step| step.as_str() == s)
            .ok_or_else(|| s.to_string())
    }
}

/// 步骤状态
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Error,
}

/// 会话状态
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowStatus {
    #[default]
    Idle,
    Running,
    Waiting,
    Completed,
    Failed,
}

impl WorkflowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Waiting => "waiting",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// 宽松解析，未知值视为 `idle`
    pub fn parse_lenient(value: &str) -> Self {
        match value {
            "running" => Self::Running,
            "waiting" => Self::Waiting,
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            _ => Self::Idle,
        }
    }
}

/// 工作流步骤
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStep {
    pub id: StepId,
    pub label: String,
    #[serde(default)]
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl WorkflowStep {
    pub fn pending(id: StepId) -> Self {
        Self {
            id,
            label: id.label().to_string(),
            status: StepStatus::Pending,
            data: None,
            error: None,
        }
    }
}

/// 新会话的初始流水线
pub fn initial_steps() -> Vec<WorkflowStep> {
    [
        StepId::TopicDiscovery,
        StepId::ArticleGeneration,
        StepId::Vocabulary,
        StepId::PodcastScript,
        StepId::AudioSynthesis,
        StepId::PublishPreview,
        StepId::Publishing,
    ]
    .into_iter()
    .map(WorkflowStep::pending)
    .collect()
}

/// 文章难度等级
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Level {
    #[default]
    #[serde(rename = "10")]
    Ten,
    #[serde(rename = "7")]
    Seven,
}

impl Level {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ten => "10",
            Self::Seven => "7",
        }
    }
}

/// A/B 生成风格
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArticleStyle {
    /// 老编辑风格
    A,
    /// 炫技风格
    B,
}

/// 正反方观点
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Perspectives {
    pub supporters: String,
    pub critics: String,
}

/// 深度研究结果
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ResearchResult {
    pub summary: String,
    pub background: String,
    pub key_points: Vec<String>,
    pub perspectives: Perspectives,
    pub related_topics: Vec<String>,
    pub sources: Vec<GroundingSource>,
    pub search_queries: Vec<String>,
    pub topic: String,
}

/// 单侧生成状态
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SlotStatus {
    #[default]
    Idle,
    Generating,
    Success,
    Error,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationSlot {
    pub status: SlotStatus,
    /// 生成结果（格式化后的 JSON 文本，解析失败时为原始输出）
    pub json: String,
    pub error: String,
}

/// A/B 生成状态
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationState {
    #[serde(rename = "A", default, skip_serializing_if = "Option::is_none")]
    pub a: Option<GenerationSlot>,
    #[serde(rename = "B", default, skip_serializing_if = "Option::is_none")]
    pub b: Option<GenerationSlot>,
}

impl GenerationState {
    pub fn slot(&self, style: ArticleStyle) -> Option<&GenerationSlot> {
        match style {
            ArticleStyle::A => self.a.as_ref(),
            ArticleStyle::B => self.b.as_ref(),
        }
    }
}

/// 会话上下文：各步骤产出的累积
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub news_items: Option<Vec<NewsItem>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub article_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub article_id_7: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub article_json: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub article_json_7: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub glossary: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub glossary_7: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub podcast_script: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub podcast_script_7: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub podcast_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub podcast_url_7: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_payload: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub research_result: Option<ResearchResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation_state: Option<GenerationState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_style: Option<ArticleStyle>,
    /// 未识别的字段原样保留
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl SessionContext {
    pub fn article(&self, level: Level) -> Option<&Value> {
        match level {
            Level::Ten => self.article_json.as_ref(),
            Level::Seven => self.article_json_7.as_ref(),
        }
    }

    pub fn glossary_for(&self, level: Level) -> Option<&Value> {
        match level {
            Level::Ten => self.glossary.as_ref(),
            Level::Seven => self.glossary_7.as_ref(),
        }
    }

    pub fn podcast_script_for(&self, level: Level) -> Option<&str> {
        match level {
            Level::Ten => self.podcast_script.as_deref(),
            Level::Seven => self.podcast_script_7.as_deref(),
        }
    }

    pub fn podcast_url_for(&self, level: Level) -> Option<&str> {
        match level {
            Level::Ten => self.podcast_url.as_deref(),
            Level::Seven => self.podcast_url_7.as_deref(),
        }
    }

    pub fn article_id_for(&self, level: Level) -> Option<&str> {
        match level {
            Level::Ten => self.article_id.as_deref(),
            Level::Seven => self.article_id_7.as_deref(),
        }
    }
}

/// 工作流会话
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowSession {
    pub id: String,
    pub title: String,
    pub created_at: i64,
    #[serde(default)]
    pub updated_at: i64,
    pub status: WorkflowStatus,
    pub current_step_id: StepId,
    pub steps: Vec<WorkflowStep>,
    #[serde(default)]
    pub context: SessionContext,
}

impl WorkflowSession {
    pub fn step(&self, id: StepId) -> Option<&WorkflowStep> {
        self.steps.iter().find(|step| step.id == id)
    }

    pub fn step_mut(&mut self, id: StepId) -> Option<&mut WorkflowStep> {
        self.steps.iter_mut().find(|step| step.id == id)
    }

    pub fn step_index(&self, id: StepId) -> Option<usize> {
        self.steps.iter().position(|step| step.id == id)
    }

    pub fn has_step(&self, id: StepId) -> bool {
        self.step_index(id).is_some()
    }

    /// 流水线中 `id` 的下一步
    pub fn next_step(&self, id: StepId) -> Option<StepId> {
        let index = self.step_index(id)?;
        self.steps.get(index + 1).map(|step| step.id)
    }

    /// 已完成步骤数 / 总步骤数
    pub fn progress(&self) -> (usize, usize) {
        let completed = self
            .steps
            .iter()
            .filter(|step| step.status == StepStatus::Completed)
            .count();
        (completed, self.steps.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_step_id_serde_and_parse() {
        assert_eq!(serde_json::to_value(StepId::AudioSynthesis).unwrap(), json!("audio-synthesis"));
        assert_eq!("publish-preview".parse::<StepId>(), Ok(StepId::PublishPreview));
        assert!("unknown".parse::<StepId>().is_err());
    }

    #[test]
    fn test_initial_steps_order() {
        let steps = initial_steps();
        assert_eq!(steps.len(), 7);
        assert_eq!(steps[0].label, "选题搜索");
        assert!(steps.iter().all(|s| s.status == StepStatus::Pending));
        assert!(!steps.iter().any(|s| s.id == StepId::ArticleRewrite));
    }

    #[test]
    fn test_context_keeps_unknown_keys() {
        let raw = json!({
            "topic": "Tariffs",
            "articleJson7": { "title": "x" },
            "generationState": { "A": { "status": "success", "json": "{}", "error": "" } },
            "customNote": "keep me"
        });
        let context: SessionContext = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(context.topic.as_deref(), Some("Tariffs"));
        assert!(context.article_json_7.is_some());
        assert_eq!(context.extra["customNote"], "keep me");
        assert_eq!(
            context.generation_state.as_ref().and_then(|g| g.a.as_ref()).map(|s| s.status),
            Some(SlotStatus::Success)
        );
        assert_eq!(serde_json::to_value(&context).unwrap(), raw);
    }

    #[test]
    fn test_level_serde() {
        assert_eq!(serde_json::to_value(Level::Seven).unwrap(), json!("7"));
        assert_eq!(serde_json::from_value::<Level>(json!("10")).unwrap(), Level::Ten);
    }
}
