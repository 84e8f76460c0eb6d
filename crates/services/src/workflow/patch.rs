//! 会话的局部更新
//!
//! `ContextPatch` 按 JSON merge 语义逐键合并：缺省保持原值，`null` 清除，其余替换。

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use wordcast_core::errors::WorkflowError;

use super::types::{SessionContext, StepId, WorkflowSession, WorkflowStatus, WorkflowStep};

/// 上下文字段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ContextField {
    TargetDate,
    Category,
    Topic,
    NewsItems,
    Level,
    ArticleId,
    #[serde(rename = "articleId7")]
    ArticleId7,
    ArticleJson,
    #[serde(rename = "articleJson7")]
    ArticleJson7,
    Glossary,
    #[serde(rename = "glossary7")]
    Glossary7,
    PodcastScript,
    #[serde(rename = "podcastScript7")]
    PodcastScript7,
    PodcastUrl,
    #[serde(rename = "podcastUrl7")]
    PodcastUrl7,
    FinalPayload,
    ResearchResult,
    GenerationState,
    SelectedStyle,
}

impl ContextField {
    pub const ALL: [ContextField; 19] = [
        Self::TargetDate,
        Self::Category,
        Self::Topic,
        Self::NewsItems,
        Self::Level,
        Self::ArticleId,
        Self::ArticleId7,
        Self::ArticleJson,
        Self::ArticleJson7,
        Self::Glossary,
        Self::Glossary7,
        Self::PodcastScript,
        Self::PodcastScript7,
        Self::PodcastUrl,
        Self::PodcastUrl7,
        Self::FinalPayload,
        Self::ResearchResult,
        Self::GenerationState,
        Self::SelectedStyle,
    ];

    /// 上下文 JSON 中的键名
    pub fn key(&self) -> &'static str {
        match self {
            Self::TargetDate => "targetDate",
            Self::Category => "category",
            Self::Topic => "topic",
            Self::NewsItems => "newsItems",
            Self::Level => "level",
            Self::ArticleId => "articleId",
            Self::ArticleId7 => "articleId7",
            Self::ArticleJson => "articleJson",
            Self::ArticleJson7 => "articleJson7",
            Self::Glossary => "glossary",
            Self::Glossary7 => "glossary7",
            Self::PodcastScript => "podcastScript",
            Self::PodcastScript7 => "podcastScript7",
            Self::PodcastUrl => "podcastUrl",
            Self::PodcastUrl7 => "podcastUrl7",
            Self::FinalPayload => "finalPayload",
            Self::ResearchResult => "researchResult",
            Self::GenerationState => "generationState",
            Self::SelectedStyle => "selectedStyle",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|field| field.key() == key)
    }

    /// 直接依赖本字段生成的字段
    pub fn derived(&self) -> &'static [ContextField] {
        use ContextField::*;
        match self {
            Topic => &[ArticleJson, ArticleJson7, ResearchResult, GenerationState],
            ArticleJson => &[ArticleJson7, Glossary, PodcastScript, FinalPayload],
            ArticleJson7 => &[Glossary7, PodcastScript7],
            Glossary => &[PodcastScript, FinalPayload],
            Glossary7 => &[PodcastScript7],
            PodcastScript => &[PodcastUrl, FinalPayload],
            PodcastScript7 => &[PodcastUrl7],
            PodcastUrl => &[FinalPayload],
            _ => &[],
        }
    }

    /// 本字段及其全部派生字段
    pub fn closure(&self) -> BTreeSet<ContextField> {
        let mut seen = BTreeSet::new();
        let mut stack = vec![*self];
        while let Some(field) = stack.pop() {
            if seen.insert(field) {
                stack.extend_from_slice(field.derived());
            }
        }
        seen
    }

    /// 产出本字段的步骤
    ///
    /// `articleJson7` 在会话没有改写步骤时归属文章生成步骤。
    pub fn owning_step(&self, session: &WorkflowSession) -> StepId {
        use ContextField::*;
        match self {
            TargetDate | Category | Topic | NewsItems | ResearchResult => StepId::TopicDiscovery,
            Level | ArticleJson | GenerationState | SelectedStyle => StepId::ArticleGeneration,
            ArticleJson7 if session.has_step(StepId::ArticleRewrite) => StepId::ArticleRewrite,
            ArticleJson7 => StepId::ArticleGeneration,
            Glossary | Glossary7 => StepId::Vocabulary,
            PodcastScript | PodcastScript7 => StepId::PodcastScript,
            PodcastUrl | PodcastUrl7 => StepId::AudioSynthesis,
            FinalPayload => StepId::PublishPreview,
            ArticleId | ArticleId7 => StepId::Publishing,
        }
    }
}

/// 各步骤读取的上下文字段
pub fn step_inputs(step: StepId) -> &'static [ContextField] {
    use ContextField::*;
    match step {
        StepId::TopicDiscovery => &[],
        StepId::ArticleGeneration => &[Topic, ResearchResult],
        StepId::ArticleRewrite => &[ArticleJson],
        StepId::Vocabulary => &[ArticleJson, ArticleJson7],
        StepId::PodcastScript => &[ArticleJson, ArticleJson7, Glossary, Glossary7],
        StepId::AudioSynthesis => &[PodcastScript, PodcastScript7],
        StepId::PublishPreview => &[ArticleJson, Glossary, PodcastScript, PodcastUrl],
        StepId::Publishing => &[FinalPayload],
    }
}

/// 上下文局部更新
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContextPatch(Map<String, Value>);

impl ContextPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, field: ContextField) -> bool {
        self.0.contains_key(field.key())
    }

    pub fn get(&self, field: ContextField) -> Option<&Value> {
        self.0.get(field.key())
    }

    /// 设置字段；序列化失败的值按 `null` 处理
    pub fn set(mut self, field: ContextField, value: impl Serialize) -> Self {
        let value = serde_json::to_value(value).unwrap_or(Value::Null);
        self.0.insert(field.key().to_string(), value);
        self
    }

    /// 设置任意键（用于保留未识别字段）
    pub fn set_raw(mut self, key: impl Into<String>, value: Value) -> Self {
        self.0.insert(key.into(), value);
        self
    }

    pub fn clear(mut self, field: ContextField) -> Self {
        self.0.insert(field.key().to_string(), Value::Null);
        self
    }

    /// 合并到上下文
    pub fn apply(&self, context: &SessionContext) -> Result<SessionContext, WorkflowError> {
        if self.is_empty() {
            return Ok(context.clone());
        }
        let mut map = match serde_json::to_value(context)? {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        for (key, value) in &self.0 {
            if value.is_null() {
                map.remove(key);
            } else {
                map.insert(key.clone(), value.clone());
            }
        }
        serde_json::from_value(Value::Object(map))
            .map_err(|e| WorkflowError::InvalidPatch(format!("上下文字段类型不匹配: {e}")))
    }
}

/// 会话局部更新
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SessionPatch {
    pub title: Option<String>,
    pub status: Option<WorkflowStatus>,
    pub current_step_id: Option<StepId>,
    pub steps: Option<Vec<WorkflowStep>>,
    pub context: Option<ContextPatch>,
}

impl SessionPatch {
    /// 在会话副本上应用更新并校验
    pub fn apply(&self, session: &WorkflowSession) -> Result<WorkflowSession, WorkflowError> {
        let mut next = session.clone();
        if let Some(title) = &self.title {
            next.title = title.clone();
        }
        if let Some(status) = self.status {
            next.status = status;
        }
        if let Some(steps) = &self.steps {
            if steps.is_empty() {
                return Err(WorkflowError::InvalidPatch("步骤列表不能为空".to_string()));
            }
            next.steps = steps.clone();
        }
        if let Some(step) = self.current_step_id {
            next.current_step_id = step;
        }
        if !next.has_step(next.current_step_id) {
            return Err(WorkflowError::StepNotFound(next.current_step_id.to_string()));
        }
        if let Some(context) = &self.context {
            next.context = context.apply(&next.context)?;
        }
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::types::initial_steps;
    use proptest::prelude::*;
    use serde_json::json;

    fn session() -> WorkflowSession {
        WorkflowSession {
            id: "s1".to_string(),
            title: "New Workflow".to_string(),
            created_at: 1,
            updated_at: 1,
            status: WorkflowStatus::Idle,
            current_step_id: StepId::TopicDiscovery,
            steps: initial_steps(),
            context: SessionContext::default(),
        }
    }

    #[test]
    fn test_context_patch_merge_semantics() {
        let context = SessionContext {
            topic: Some("Old".to_string()),
            category: Some("科技".to_string()),
            podcast_script: Some("script".to_string()),
            ..SessionContext::default()
        };
        let patch: ContextPatch = serde_json::from_value(json!({
            "topic": "New",
            "podcastScript": null,
            "customFlag": true
        }))
        .unwrap();

        let merged = patch.apply(&context).unwrap();
        assert_eq!(merged.topic.as_deref(), Some("New"));
        assert_eq!(merged.category.as_deref(), Some("科技"));
        assert!(merged.podcast_script.is_none());
        assert_eq!(merged.extra["customFlag"], true);
    }

    #[test]
    fn test_context_patch_type_mismatch() {
        let patch = ContextPatch::new().set_raw("newsItems", json!("not a list"));
        let err = patch.apply(&SessionContext::default()).unwrap_err();
        assert!(matches!(err, WorkflowError::InvalidPatch(_)));
    }

    #[test]
    fn test_closure_of_article_json() {
        let cleared = ContextField::ArticleJson.closure();
        for field in [
            ContextField::ArticleJson,
            ContextField::ArticleJson7,
            ContextField::Glossary,
            ContextField::Glossary7,
            ContextField::PodcastScript,
            ContextField::PodcastScript7,
            ContextField::PodcastUrl,
            ContextField::PodcastUrl7,
            ContextField::FinalPayload,
        ] {
            assert!(cleared.contains(&field), "{field:?} 应被清除");
        }
        assert!(!cleared.contains(&ContextField::Topic));
        assert!(!cleared.contains(&ContextField::ResearchResult));
    }

    #[test]
    fn test_owning_step_depends_on_rewrite() {
        let mut s = session();
        assert_eq!(ContextField::ArticleJson7.owning_step(&s), StepId::ArticleGeneration);
        s.steps.insert(2, WorkflowStep::pending(StepId::ArticleRewrite));
        assert_eq!(ContextField::ArticleJson7.owning_step(&s), StepId::ArticleRewrite);
    }

    #[test]
    fn test_session_patch_rejects_unknown_current_step() {
        let patch = SessionPatch {
            current_step_id: Some(StepId::ArticleRewrite),
            ..SessionPatch::default()
        };
        assert!(matches!(
            patch.apply(&session()),
            Err(WorkflowError::StepNotFound(_))
        ));
    }

    #[test]
    fn test_field_keys_match_context_serialization() {
        let context = SessionContext {
            article_json_7: Some(json!({})),
            glossary_7: Some(json!({})),
            podcast_url_7: Some("u".to_string()),
            article_id_7: Some("id".to_string()),
            ..SessionContext::default()
        };
        let value = serde_json::to_value(context).unwrap();
        for field in [
            ContextField::ArticleJson7,
            ContextField::Glossary7,
            ContextField::PodcastUrl7,
            ContextField::ArticleId7,
        ] {
            assert!(value.get(field.key()).is_some(), "{}", field.key());
        }
    }

    proptest! {
        #[test]
        fn prop_patch_only_touches_named_keys(topic in "[a-z]{1,12}", script in proptest::option::of("[a-z ]{0,20}")) {
            let base = SessionContext {
                category: Some("财经".to_string()),
                topic: Some("seed".to_string()),
                ..SessionContext::default()
            };
            let mut patch = ContextPatch::new().set(ContextField::Topic, &topic);
            patch = match &script {
                Some(text) => patch.set(ContextField::PodcastScript, text),
                None => patch.clear(ContextField::PodcastScript),
            };
            let merged = patch.apply(&base).unwrap();
            prop_assert_eq!(merged.topic.as_deref(), Some(topic.as_str()));
            prop_assert_eq!(merged.category.as_deref(), Some("财经"));
            prop_assert_eq!(merged.podcast_script, script);
        }
    }
}
