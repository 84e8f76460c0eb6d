//! 会话的远程记录格式
//!
//! 体积较大的字段单独成列，其余上下文以 JSON 保存在 `context` 列。

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use tracing::warn;
use wordcast_core::article::normalize_json_field;
use wordcast_core::errors::WorkflowError;

use super::types::{initial_steps, StepId, WorkflowSession, WorkflowStatus, WorkflowStep};

/// 拆分为独立列的 JSON 字段
const JSON_COLUMNS: [&str; 4] = ["articleJson", "articleJson7", "glossary", "glossary7"];
/// 拆分为独立列的文本字段
const TEXT_COLUMNS: [&str; 2] = ["podcastScript", "podcastScript7"];

fn json_column<'de, D>(deserializer: D) -> Result<Value, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match normalize_json_field(&value) {
        Value::String(text) if text.is_empty() => Value::Null,
        other => other,
    })
}

fn text_column<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.filter(|text| !text.is_empty()))
}

fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(text) => text,
        Value::Null => String::new(),
        other => other.to_string(),
    })
}

fn lenient_i64<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)).unwrap_or(0),
        Value::String(text) => text.parse().unwrap_or(0),
        _ => 0,
    })
}

/// 远程记录
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    /// 远程记录 id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub session_id: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub title: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub status: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub current_step_id: String,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub created_at: i64,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub updated_at: i64,
    #[serde(default, deserialize_with = "json_column")]
    pub steps: Value,
    #[serde(default, deserialize_with = "json_column")]
    pub context: Value,
    #[serde(default, deserialize_with = "json_column", skip_serializing_if = "Value::is_null")]
    pub article_json: Value,
    #[serde(default, deserialize_with = "json_column", skip_serializing_if = "Value::is_null")]
    pub article_json_7: Value,
    #[serde(default, deserialize_with = "json_column", skip_serializing_if = "Value::is_null")]
    pub glossary: Value,
    #[serde(default, deserialize_with = "json_column", skip_serializing_if = "Value::is_null")]
    pub glossary_7: Value,
    #[serde(default, deserialize_with = "text_column", skip_serializing_if = "Option::is_none")]
    pub podcast_script: Option<String>,
    #[serde(default, deserialize_with = "text_column", skip_serializing_if = "Option::is_none")]
    pub podcast_script_7: Option<String>,
}

impl SessionRecord {
    pub fn from_session(session: &WorkflowSession) -> Result<Self, WorkflowError> {
        let mut context = match serde_json::to_value(&session.context)? {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        let mut take = |key: &str| context.remove(key).unwrap_or(Value::Null);
        let article_json = take("articleJson");
        let article_json_7 = take("articleJson7");
        let glossary = take("glossary");
        let glossary_7 = take("glossary7");
        let podcast_script = take("podcastScript").as_str().map(ToString::to_string);
        let podcast_script_7 = take("podcastScript7").as_str().map(ToString::to_string);

        Ok(Self {
            id: None,
            session_id: session.id.clone(),
            title: session.title.clone(),
            status: session.status.as_str().to_string(),
            current_step_id: session.current_step_id.as_str().to_string(),
            created_at: session.created_at,
            updated_at: session.updated_at,
            steps: serde_json::to_value(&session.steps)?,
            context: Value::Object(context),
            article_json,
            article_json_7,
            glossary,
            glossary_7,
            podcast_script,
            podcast_script_7,
        })
    }

    /// 还原为会话；旧记录把所有字段放在 `context` 中也能加载，
    /// 两处都有时以独立列为准
    pub fn into_session(self) -> Result<WorkflowSession, WorkflowError> {
        let mut context = match self.context {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        let columns = [
            (JSON_COLUMNS[0], self.article_json),
            (JSON_COLUMNS[1], self.article_json_7),
            (JSON_COLUMNS[2], self.glossary),
            (JSON_COLUMNS[3], self.glossary_7),
            (TEXT_COLUMNS[0], self.podcast_script.map(Value::String).unwrap_or(Value::Null)),
            (TEXT_COLUMNS[1], self.podcast_script_7.map(Value::String).unwrap_or(Value::Null)),
        ];
        for (key, value) in columns {
            if !value.is_null() {
                context.insert(key.to_string(), value);
            }
        }
        for key in JSON_COLUMNS {
            if let Some(value) = context.get_mut(key) {
                *value = normalize_json_field(value);
            }
        }

        let steps = match serde_json::from_value::<Vec<WorkflowStep>>(self.steps) {
            Ok(steps) if !steps.is_empty() => steps,
            Ok(_) => initial_steps(),
            Err(e) => {
                warn!("会话 {} 的步骤无法解析，使用初始步骤: {}", self.session_id, e);
                initial_steps()
            }
        };
        let current_step_id = self
            .current_step_id
            .parse::<StepId>()
            .ok()
            .filter(|step| steps.iter().any(|s| s.id == *step))
            .unwrap_or(steps[0].id);

        let session_id = if self.session_id.is_empty() {
            self.id.clone().unwrap_or_default()
        } else {
            self.session_id
        };

        Ok(WorkflowSession {
            id: session_id,
            title: if self.title.is_empty() {
                "New Workflow".to_string()
            } else {
                self.title
            },
            created_at: self.created_at,
            updated_at: self.updated_at.max(self.created_at),
            status: WorkflowStatus::parse_lenient(&self.status),
            current_step_id,
            steps,
            context: serde_json::from_value(Value::Object(context))?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::types::SessionContext;
    use proptest::prelude::*;
    use serde_json::json;

    fn session_with(context: SessionContext) -> WorkflowSession {
        WorkflowSession {
            id: "sess-1".to_string(),
            title: "Topic: Tariffs".to_string(),
            created_at: 1_700_000_000_000,
            updated_at: 1_700_000_000_500,
            status: WorkflowStatus::Running,
            current_step_id: StepId::Vocabulary,
            steps: initial_steps(),
            context,
        }
    }

    #[test]
    fn test_large_fields_split_into_columns() {
        let session = session_with(SessionContext {
            topic: Some("Tariffs".to_string()),
            article_json: Some(json!({ "article": { "title": { "zh": "关税" } } })),
            podcast_script: Some("Host: hi".to_string()),
            ..SessionContext::default()
        });
        let record = SessionRecord::from_session(&session).unwrap();

        assert_eq!(record.context, json!({ "topic": "Tariffs" }));
        assert_eq!(record.article_json["article"]["title"]["zh"], "关税");
        assert_eq!(record.podcast_script.as_deref(), Some("Host: hi"));

        let value = serde_json::to_value(&record).unwrap();
        assert!(value.get("article_json_7").is_none());
        assert!(value.get("id").is_none());
        assert_eq!(record.into_session().unwrap(), session);
    }

    #[test]
    fn test_legacy_record_and_string_columns() {
        let raw = json!({
            "id": "pb123",
            "session_id": "sess-legacy",
            "title": "",
            "status": "",
            "current_step_id": "not-a-step",
            "created_at": "1700000000000",
            "steps": "[]",
            "context": "{\"topic\":\"Old\",\"glossary\":{\"old\":{}},\"articleJson\":{\"v\":1}}",
            "article_json": "{\"v\":2}",
            "glossary": null,
            "podcast_script": ""
        });
        let record: SessionRecord = serde_json::from_value(raw).unwrap();
        let session = record.into_session().unwrap();

        assert_eq!(session.id, "sess-legacy");
        assert_eq!(session.title, "New Workflow");
        assert_eq!(session.status, WorkflowStatus::Idle);
        assert_eq!(session.current_step_id, StepId::TopicDiscovery);
        assert_eq!(session.steps.len(), 7);
        assert_eq!(session.created_at, 1_700_000_000_000);
        assert_eq!(session.context.article_json, Some(json!({ "v": 2 })));
        assert_eq!(session.context.glossary, Some(json!({ "old": {} })));
        assert!(session.context.podcast_script.is_none());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn prop_record_round_trip(
            topic in proptest::option::of("[a-zA-Z ]{1,20}"),
            script in proptest::option::of("[a-z\n ]{1,40}"),
            script7 in proptest::option::of("[a-z ]{1,40}"),
            words in prop::collection::btree_set("[a-z]{3,8}", 0..5),
        ) {
            let glossary = (!words.is_empty()).then(|| {
                Value::Object(words.iter().map(|w| (w.clone(), json!({ "word": w }))).collect())
            });
            let session = session_with(SessionContext {
                topic,
                podcast_script: script,
                podcast_script_7: script7,
                glossary,
                ..SessionContext::default()
            });
            let record = SessionRecord::from_session(&session).unwrap();
            let wire = serde_json::to_value(&record).unwrap();
            let back: SessionRecord = serde_json::from_value(wire).unwrap();
            prop_assert_eq!(back.into_session().unwrap(), session);
        }
    }
}
