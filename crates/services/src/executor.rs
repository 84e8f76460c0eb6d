//! 步骤执行器
//!
//! 针对会话的某个步骤调用外部服务，把产出写回会话上下文。
//! 操作失败时对应步骤标记为 error，不影响其他步骤，也不自动重试。

use std::future::Future;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};
use wordcast_core::errors::WorkflowError;

use crate::audio_service::AudioService;
use crate::generation_service::{GenerateRequest, GenerationOutcome, GenerationService, ResearchRequest};
use crate::news_service::NewsService;
use crate::publish_service::{PodcastArticle, PublishService};
use crate::workflow::{
    ArticleStyle, ContextField, ContextPatch, GenerationSlot, GenerationState, Level, PublishPreview,
    ResearchResult, SessionPatch, SlotStatus, StepId, WorkflowManager, WorkflowSession,
};

/// 改写为 Level 7 时的指令
pub const REWRITE_FEEDBACK: &str = "Rewrite this article to Level 7 difficulty. Simplify vocabulary and sentence structure while keeping the same core information and structure (3 paragraphs).";

/// 可执行的操作，JSON 中以 `operation` 字段区分
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "operation", rename_all = "kebab-case")]
pub enum StepCommand {
    ScanNews,
    SelectTopic {
        topic: String,
        #[serde(default)]
        category: Option<String>,
    },
    Research {
        #[serde(default)]
        topic: Option<String>,
    },
    GenerateAb,
    SelectGeneration {
        style: ArticleStyle,
    },
    Rewrite,
    ExtractVocabulary {
        #[serde(default)]
        level: Level,
    },
    RemoveGlossaryWord {
        word: String,
        #[serde(default)]
        level: Level,
    },
    PodcastScript {
        #[serde(default)]
        level: Level,
    },
    SynthesizeAudio {
        #[serde(default)]
        level: Level,
    },
    Preview {
        #[serde(default)]
        level: Level,
    },
    Publish {
        #[serde(default)]
        level: Level,
    },
}

impl StepCommand {
    /// 操作所属的步骤
    pub fn step(&self) -> StepId {
        match self {
            Self::ScanNews | Self::SelectTopic { .. } | Self::Research { .. } => StepId::TopicDiscovery,
            Self::GenerateAb | Self::SelectGeneration { .. } => StepId::ArticleGeneration,
            Self::Rewrite => StepId::ArticleRewrite,
            Self::ExtractVocabulary { .. } | Self::RemoveGlossaryWord { .. } => StepId::Vocabulary,
            Self::PodcastScript { .. } => StepId::PodcastScript,
            Self::SynthesizeAudio { .. } => StepId::AudioSynthesis,
            Self::Preview { .. } => StepId::PublishPreview,
            Self::Publish { .. } => StepId::Publishing,
        }
    }
}

/// 执行结果：最新会话与操作自身的返回值
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepOutcome {
    pub session: WorkflowSession,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
}

impl StepOutcome {
    fn session(session: WorkflowSession) -> Self {
        Self { session, result: None }
    }

    fn with_result(session: WorkflowSession, result: impl Serialize) -> Result<Self, WorkflowError> {
        Ok(Self {
            session,
            result: Some(serde_json::to_value(result)?),
        })
    }
}

fn missing(what: &str) -> WorkflowError {
    WorkflowError::MissingInput(what.to_string())
}

fn slot_from(result: Result<GenerationOutcome, WorkflowError>) -> GenerationSlot {
    match result {
        Ok(GenerationOutcome::Parsed(value)) => GenerationSlot {
            status: SlotStatus::Success,
            json: serde_json::to_string_pretty(&value).unwrap_or_else(|_| value.to_string()),
            error: String::new(),
        },
        Ok(GenerationOutcome::Unparsed { raw, .. }) => GenerationSlot {
            status: SlotStatus::Error,
            json: raw,
            error: "Invalid JSON format".to_string(),
        },
        Err(e) => GenerationSlot {
            status: SlotStatus::Error,
            json: String::new(),
            error: e.to_string(),
        },
    }
}

/// `data.glossary || data` 形式的词汇表
fn glossary_of(value: Value) -> Value {
    match value {
        Value::Object(mut map) => match map.remove("glossary") {
            Some(glossary) if glossary.is_object() || glossary.is_array() => glossary,
            Some(other) => {
                map.insert("glossary".to_string(), other);
                Value::Object(map)
            }
            None => Value::Object(map),
        },
        other => other,
    }
}

fn remove_word(glossary: &Value, word: &str) -> Value {
    let target = word.trim().to_lowercase();
    match glossary {
        Value::Object(map) => Value::Object(
            map.iter()
                .filter(|(key, _)| key.to_lowercase() != target)
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect(),
        ),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .filter(|item| {
                    item.get("word")
                        .and_then(Value::as_str)
                        .map_or(true, |w| w.to_lowercase() != target)
                })
                .cloned()
                .collect(),
        ),
        other => other.clone(),
    }
}

pub struct StepExecutor {
    manager: Arc<WorkflowManager>,
    generation: Arc<GenerationService>,
    news: Arc<NewsService>,
    audio: Arc<AudioService>,
    publish: Arc<PublishService>,
}

impl StepExecutor {
    pub fn new(
        manager: Arc<WorkflowManager>,
        generation: Arc<GenerationService>,
        news: Arc<NewsService>,
        audio: Arc<AudioService>,
        publish: Arc<PublishService>,
    ) -> Self {
        Self {
            manager,
            generation,
            news,
            audio,
            publish,
        }
    }

    pub fn manager(&self) -> &Arc<WorkflowManager> {
        &self.manager
    }

    pub async fn execute(&self, id: &str, command: StepCommand) -> Result<StepOutcome, WorkflowError> {
        let step = command.step();
        info!("[Executor] 会话 {} 执行 {:?}", id, command);
        self.guard(id, step, self.dispatch(id, command)).await
    }

    /// 操作失败时标记步骤失败；会话或步骤不存在时直接返回错误
    async fn guard<F>(&self, id: &str, step: StepId, fut: F) -> Result<StepOutcome, WorkflowError>
    where
        F: Future<Output = Result<StepOutcome, WorkflowError>>,
    {
        match fut.await {
            Ok(outcome) => Ok(outcome),
            Err(e @ (WorkflowError::SessionNotFound(_) | WorkflowError::StepNotFound(_))) => Err(e),
            Err(e) => {
                if let Err(mark) = self.manager.fail_step(id, step, e.to_string()).await {
                    warn!("[Executor] 无法标记步骤 {} 失败: {}", step, mark);
                }
                Err(e)
            }
        }
    }

    async fn dispatch(&self, id: &str, command: StepCommand) -> Result<StepOutcome, WorkflowError> {
        match command {
            StepCommand::ScanNews => self.scan_news(id).await,
            StepCommand::SelectTopic { topic, category } => self.select_topic(id, topic, category).await,
            StepCommand::Research { topic } => self.research(id, topic).await,
            StepCommand::GenerateAb => self.generate_ab(id).await,
            StepCommand::SelectGeneration { style } => self.select_generation(id, style).await,
            StepCommand::Rewrite => self.rewrite(id).await,
            StepCommand::ExtractVocabulary { level } => self.extract_vocabulary(id, level).await,
            StepCommand::RemoveGlossaryWord { word, level } => {
                self.remove_glossary_word(id, &word, level).await
            }
            StepCommand::PodcastScript { level } => self.generate_podcast_script(id, level).await,
            StepCommand::SynthesizeAudio { level } => self.synthesize_audio(id, level).await,
            StepCommand::Preview { level } => self.preview(id, level).await,
            StepCommand::Publish { level } => self.publish(id, level).await,
        }
    }

    async fn update_context(&self, id: &str, patch: ContextPatch) -> Result<WorkflowSession, WorkflowError> {
        self.manager
            .update_session(
                id,
                SessionPatch {
                    context: Some(patch),
                    ..SessionPatch::default()
                },
            )
            .await
    }

    // ------------------------------------------------------------------
    // 选题
    // ------------------------------------------------------------------

    pub async fn scan_news(&self, id: &str) -> Result<StepOutcome, WorkflowError> {
        self.manager.start_step(id, StepId::TopicDiscovery).await?;
        let scan = self.news.scan().await;
        let session = self
            .update_context(id, ContextPatch::new().set(ContextField::NewsItems, &scan.items))
            .await?;
        StepOutcome::with_result(session, scan)
    }

    pub async fn select_topic(
        &self,
        id: &str,
        topic: String,
        category: Option<String>,
    ) -> Result<StepOutcome, WorkflowError> {
        let topic = topic.trim().to_string();
        if topic.is_empty() {
            return Err(missing("topic"));
        }
        let session = self.manager.get_session(id).await?;
        if session.context.topic.as_deref().is_some_and(|t| t != topic) {
            info!("[Executor] 选题变更，清除已有产出");
            self.manager.regenerate_field(id, ContextField::Topic).await?;
        }

        let mut patch = ContextPatch::new().set(ContextField::Topic, &topic);
        let category = category.or_else(|| {
            session
                .context
                .news_items
                .iter()
                .flatten()
                .find(|item| item.raw == topic || item.title == topic)
                .map(|item| item.category.clone())
        });
        if let Some(category) = category {
            patch = patch.set(ContextField::Category, category);
        }
        let session = self.manager.complete_step(id, StepId::TopicDiscovery, patch).await?;
        Ok(StepOutcome::session(session))
    }

    pub async fn research(&self, id: &str, topic: Option<String>) -> Result<StepOutcome, WorkflowError> {
        let session = self.manager.get_session(id).await?;
        let topic = topic
            .filter(|t| !t.trim().is_empty())
            .or_else(|| session.context.topic.clone())
            .ok_or_else(|| missing("Missing topic or newsTitle"))?;
        let news = session
            .context
            .news_items
            .iter()
            .flatten()
            .find(|item| item.raw == topic || item.title == topic);

        let request = ResearchRequest {
            topic: Some(topic.clone()),
            news_title: news.map(|item| item.title.clone()),
            news_source: news.map(|item| item.source.clone()),
            target_date: session.context.target_date.clone(),
        };
        let value = self.generation.research(&request).await?.require("研究结果")?;
        let research: ResearchResult = serde_json::from_value(value)
            .map_err(|e| WorkflowError::InvalidOutput(format!("研究结果格式不正确: {e}")))?;
        let session = self
            .update_context(id, ContextPatch::new().set(ContextField::ResearchResult, &research))
            .await?;
        StepOutcome::with_result(session, research)
    }

    // ------------------------------------------------------------------
    // 文章
    // ------------------------------------------------------------------

    fn generate_request(session: &WorkflowSession, topic: &str, style: ArticleStyle) -> GenerateRequest {
        GenerateRequest {
            topic: topic.to_string(),
            level: Some(Level::Ten.as_str().to_string()),
            style: Some(style),
            research_context: session
                .context
                .research_result
                .as_ref()
                .and_then(|r| serde_json::to_value(r).ok()),
            target_date: session.context.target_date.clone(),
            previous_draft: None,
            feedback: None,
        }
    }

    /// 同时生成 A/B 两个版本，一侧失败不影响另一侧
    pub async fn generate_ab(&self, id: &str) -> Result<StepOutcome, WorkflowError> {
        let session = self.manager.get_session(id).await?;
        let topic = session.context.topic.clone().ok_or_else(|| missing("topic"))?;
        self.manager.start_step(id, StepId::ArticleGeneration).await?;

        let generating = GenerationSlot {
            status: SlotStatus::Generating,
            ..GenerationSlot::default()
        };
        let pending = GenerationState {
            a: Some(generating.clone()),
            b: Some(generating),
        };
        self.update_context(id, ContextPatch::new().set(ContextField::GenerationState, &pending))
            .await?;

        let request_a = Self::generate_request(&session, &topic, ArticleStyle::A);
        let request_b = Self::generate_request(&session, &topic, ArticleStyle::B);
        let (a, b) = tokio::join!(
            self.generation.generate_article(&request_a),
            self.generation.generate_article(&request_b)
        );
        let state = GenerationState {
            a: Some(slot_from(a)),
            b: Some(slot_from(b)),
        };
        let both_failed = [&state.a, &state.b]
            .iter()
            .all(|slot| slot.as_ref().map_or(true, |s| s.status != SlotStatus::Success));
        let session = self
            .update_context(id, ContextPatch::new().set(ContextField::GenerationState, &state))
            .await?;

        if both_failed {
            let errors: Vec<&str> = [&state.a, &state.b]
                .into_iter()
                .flatten()
                .map(|s| s.error.as_str())
                .collect();
            return Err(WorkflowError::InvalidOutput(format!("A/B 生成均失败: {}", errors.join("; "))));
        }
        StepOutcome::with_result(session, state)
    }

    /// 选定 A 或 B 作为正式文章
    pub async fn select_generation(&self, id: &str, style: ArticleStyle) -> Result<StepOutcome, WorkflowError> {
        let session = self.manager.get_session(id).await?;
        let slot = session
            .context
            .generation_state
            .as_ref()
            .and_then(|state| state.slot(style))
            .filter(|slot| slot.status == SlotStatus::Success)
            .ok_or_else(|| missing("所选版本尚未生成成功"))?;
        let article: Value = serde_json::from_str(&slot.json)
            .map_err(|e| WorkflowError::InvalidOutput(format!("所选版本不是有效的 JSON: {e}")))?;

        if session.context.article_json.is_some() {
            self.manager.regenerate_field(id, ContextField::ArticleJson).await?;
        }
        let patch = ContextPatch::new()
            .set(ContextField::ArticleJson, &article)
            .set(ContextField::SelectedStyle, style)
            .set(ContextField::Level, Level::Ten.as_str());
        let session = self.manager.complete_step(id, StepId::ArticleGeneration, patch).await?;
        Ok(StepOutcome::session(session))
    }

    /// 把 Level 10 文章改写为 Level 7
    pub async fn rewrite(&self, id: &str) -> Result<StepOutcome, WorkflowError> {
        let session = self.manager.get_session(id).await?;
        let article = session.context.article_json.clone().ok_or_else(|| missing("articleJson"))?;
        self.manager.insert_rewrite_step(id).await?;
        self.manager.start_step(id, StepId::ArticleRewrite).await?;

        let request = GenerateRequest {
            topic: session.context.topic.clone().unwrap_or_default(),
            level: Some(Level::Seven.as_str().to_string()),
            style: None,
            research_context: None,
            target_date: session.context.target_date.clone(),
            previous_draft: Some(article),
            feedback: Some(REWRITE_FEEDBACK.to_string()),
        };
        let value = self.generation.generate_article(&request).await?.require("改写结果")?;
        let article_7 = match value.get("article") {
            Some(inner) if inner.is_object() => inner.clone(),
            _ => value,
        };
        let session = self
            .manager
            .complete_step(
                id,
                StepId::ArticleRewrite,
                ContextPatch::new().set(ContextField::ArticleJson7, &article_7),
            )
            .await?;
        Ok(StepOutcome::session(session))
    }

    // ------------------------------------------------------------------
    // 词汇与播客
    // ------------------------------------------------------------------

    pub async fn extract_vocabulary(&self, id: &str, level: Level) -> Result<StepOutcome, WorkflowError> {
        let session = self.manager.get_session(id).await?;
        let article = session.context.article(level).cloned().ok_or_else(|| missing("articleJson"))?;
        if level == Level::Ten {
            self.manager.start_step(id, StepId::Vocabulary).await?;
        }

        let glossary = glossary_of(self.generation.vocabulary(&article).await?.require("词汇表")?);
        let session = match level {
            Level::Ten => {
                self.manager
                    .complete_step(
                        id,
                        StepId::Vocabulary,
                        ContextPatch::new().set(ContextField::Glossary, &glossary),
                    )
                    .await?
            }
            Level::Seven => {
                self.update_context(id, ContextPatch::new().set(ContextField::Glossary7, &glossary))
                    .await?
            }
        };
        StepOutcome::with_result(session, glossary)
    }

    pub async fn remove_glossary_word(
        &self,
        id: &str,
        word: &str,
        level: Level,
    ) -> Result<StepOutcome, WorkflowError> {
        let session = self.manager.get_session(id).await?;
        let glossary = session.context.glossary_for(level).ok_or_else(|| missing("glossary"))?;
        let field = match level {
            Level::Ten => ContextField::Glossary,
            Level::Seven => ContextField::Glossary7,
        };
        let session = self
            .update_context(id, ContextPatch::new().set(field, remove_word(glossary, word)))
            .await?;
        Ok(StepOutcome::session(session))
    }

    /// Level 7 没有专门的词汇表时使用主词汇表
    pub async fn generate_podcast_script(&self, id: &str, level: Level) -> Result<StepOutcome, WorkflowError> {
        let session = self.manager.get_session(id).await?;
        let article = session.context.article(level).cloned().ok_or_else(|| missing("articleJson"))?;
        let glossary = session
            .context
            .glossary_for(level)
            .or(session.context.glossary.as_ref())
            .cloned();
        if level == Level::Ten {
            self.manager.start_step(id, StepId::PodcastScript).await?;
        }

        let script = self.generation.podcast_script(&article, glossary.as_ref()).await?;
        let session = match level {
            Level::Ten => {
                self.manager
                    .complete_step(
                        id,
                        StepId::PodcastScript,
                        ContextPatch::new().set(ContextField::PodcastScript, &script),
                    )
                    .await?
            }
            Level::Seven => {
                self.update_context(id, ContextPatch::new().set(ContextField::PodcastScript7, &script))
                    .await?
            }
        };
        StepOutcome::with_result(session, json!({ "script": script }))
    }

    /// 合成音频；配置了 PocketBase 时上传到文章记录，上传失败则保留本地地址
    pub async fn synthesize_audio(&self, id: &str, level: Level) -> Result<StepOutcome, WorkflowError> {
        let session = self.manager.get_session(id).await?;
        let script = session
            .context
            .podcast_script_for(level)
            .filter(|s| !s.trim().is_empty())
            .map(str::to_string)
            .ok_or_else(|| missing("Missing script content"))?;
        if level == Level::Ten {
            self.manager.start_step(id, StepId::AudioSynthesis).await?;
        }

        let audio = self.audio.synthesize(&script).await?;
        let mut podcast_url = audio.audio_url.clone();
        let mut article_id = session.context.article_id_for(level).map(str::to_string);

        if self.publish.pocketbase().is_configured() {
            if let Some(bytes) = self.audio.read_temp_file(&audio.audio_url).await? {
                let article = PodcastArticle {
                    article: session.context.article(level),
                    level: Some(level.as_str()),
                    topic: session.context.topic.as_deref(),
                };
                match self.publish.upload_podcast(article_id.as_deref(), article, bytes).await {
                    Ok(uploaded) => {
                        podcast_url = uploaded.podcast_url;
                        article_id = Some(uploaded.article_id);
                    }
                    Err(e) => warn!("[Executor] 音频上传失败，使用本地地址: {}", e),
                }
            }
        }

        let (url_field, id_field) = match level {
            Level::Ten => (ContextField::PodcastUrl, ContextField::ArticleId),
            Level::Seven => (ContextField::PodcastUrl7, ContextField::ArticleId7),
        };
        let mut patch = ContextPatch::new().set(url_field, &podcast_url);
        if let Some(article_id) = &article_id {
            patch = patch.set(id_field, article_id);
        }
        let session = match level {
            Level::Ten => self.manager.complete_step(id, StepId::AudioSynthesis, patch).await?,
            Level::Seven => self.update_context(id, patch).await?,
        };
        StepOutcome::with_result(session, json!({ "audioUrl": podcast_url, "localPath": audio.local_path }))
    }

    // ------------------------------------------------------------------
    // 预览与发布
    // ------------------------------------------------------------------

    pub async fn preview(&self, id: &str, level: Level) -> Result<StepOutcome, WorkflowError> {
        let session = self.manager.get_session(id).await?;
        let preview = PublishPreview::build(&session.context, level);
        let session = self
            .manager
            .set_step_data(id, StepId::PublishPreview, serde_json::to_value(&preview)?)
            .await?;
        StepOutcome::with_result(session, preview)
    }

    /// 发布：检查项全部通过后才上传，Level 10 发布成功即完成整个流程
    pub async fn publish(&self, id: &str, level: Level) -> Result<StepOutcome, WorkflowError> {
        let session = self.manager.get_session(id).await?;
        let preview = PublishPreview::build(&session.context, level);
        if !preview.ready {
            return Err(WorkflowError::MissingInput(format!(
                "发布前检查未通过: {}",
                preview.failed_labels().join("、")
            )));
        }
        let mut payload = preview.snapshot.payload.clone().ok_or_else(|| missing("articleJson"))?;
        if let (Some(map), Some(article_id)) = (payload.as_object_mut(), session.context.article_id_for(level)) {
            map.insert("articleId".to_string(), json!(article_id));
        }

        let result = self.publish.publish(&payload).await?;
        let session = match level {
            Level::Ten => {
                let patch = ContextPatch::new()
                    .set(ContextField::FinalPayload, &payload)
                    .set(ContextField::ArticleId, &result.article_id);
                self.manager.complete_step(id, StepId::PublishPreview, patch).await?;
                self.manager
                    .complete_step(id, StepId::Publishing, ContextPatch::new())
                    .await?;
                self.manager.go_to_step(id, StepId::PublishPreview).await?
            }
            Level::Seven => {
                self.update_context(id, ContextPatch::new().set(ContextField::ArticleId7, &result.article_id))
                    .await?
            }
        };
        info!("[Executor] 会话 {} 已发布 Level {}: {}", id, level.as_str(), result.article_id);
        StepOutcome::with_result(session, result)
    }
}
