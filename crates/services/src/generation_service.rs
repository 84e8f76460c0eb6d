//! 内容生成服务
//!
//! 组装提示词并调用语言模型：文章生成、深度研究、词汇表、播客脚本与词典释义。

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};
use wordcast_core::article::extract_json;
use wordcast_core::errors::{ProviderError, WorkflowError};
use wordcast_core::ConfigManager;
use wordcast_providers::{GenerationOptions, LanguageModel};

use crate::prompt_store::{PromptKey, PromptStore, ARTICLE_SKILL, PODCAST_SKILL, VOCABULARY_SKILL};
use crate::workflow::{ArticleStyle, ResearchResult};

/// 修订时附带的上一稿最大字符数
const PREVIOUS_DRAFT_LIMIT: usize = 15_000;

const ARTICLE_FALLBACK: &str = r#"You are a bilingual news writer for Chinese learners of English.
Write a three-paragraph article as JSON: { "article": { "title": { "en", "zh" }, "meta": { "date", "level", "topic" }, "intro", "paragraphs": [ { "paragraph": { "tokenizedSentences": [ { "tokens": [ { "text" } ], "analysis" } ] } } ] } }."#;

const RESEARCH_FALLBACK: &str = r#"
You are a news research assistant. I need you to analyze and provide comprehensive background information on the following news topic.

**News Topic**: {{topic}}
{{source_line}}
{{date_context}}

Please provide:
1. **Summary** (综合摘要): A 2-3 sentence overview of the core issue
2. **Background** (背景信息): What context is needed to understand this topic? (1-2 paragraphs)
3. **Key Points** (关键要点): 3-5 bullet points of the most important facts
4. **Perspectives** (多方观点):
   - Supporters' view (支持方): What arguments do supporters make?
   - Critics' view (反对方): What concerns or criticisms exist?
5. **Related Topics** (相关话题): 2-3 related topics for further reading

Return your response in the following JSON format:
{
    "summary": "...",
    "background": "...",
    "keyPoints": ["point1", "point2", "point3"],
    "perspectives": {
        "supporters": "...",
        "critics": "..."
    },
    "relatedTopics": ["topic1", "topic2"]
}

IMPORTANT: Return ONLY valid JSON, no markdown formatting.
"#;

const VOCABULARY_FALLBACK: &str = r#"
You are a vocabulary extraction expert for English learners.
Given an article JSON, identify all important vocabulary words for intermediate/advanced learners.
For each word, provide:
- word: the word itself (lowercase)
- phonetic: IPA pronunciation
- definitions: array of { pos: "noun"|"verb"|etc, zh: "中文释义", en: "English definition" }
- example: a sentence from the article using this word
Return JSON format: { "glossary": { "wordKey": { definition object } } }
"#;

const PODCAST_FALLBACK: &str = r#"
You are a podcast script writer for English learners.
Given an article JSON and glossary, generate a bilingual (Chinese + English) podcast script.

The script should:
1. Start with an English greeting and Chinese introduction
2. For each paragraph:
   - Provide Chinese context
   - Read the English original sentence
   - Explain grammar points in Chinese
   - Highlight vocabulary with definitions
3. End with a thank you and goodbye

Output pure text only, no markdown formatting.
Use newlines for pacing (each newline = 600ms pause in TTS).
"#;

/// 文章生成请求
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GenerateRequest {
    pub topic: String,
    pub level: Option<String>,
    pub style: Option<ArticleStyle>,
    pub research_context: Option<Value>,
    pub target_date: Option<String>,
    pub previous_draft: Option<Value>,
    pub feedback: Option<String>,
}

/// 研究请求：`topic` 与 `news_title` 至少提供一个
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ResearchRequest {
    pub topic: Option<String>,
    pub news_title: Option<String>,
    pub news_source: Option<String>,
    pub target_date: Option<String>,
}

impl ResearchRequest {
    pub fn search_topic(&self) -> Option<&str> {
        [self.news_title.as_deref(), self.topic.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .find(|t| !t.is_empty())
    }
}

/// 需要 JSON 输出的生成结果
#[derive(Debug, Clone, PartialEq)]
pub enum GenerationOutcome {
    Parsed(Value),
    /// 模型输出无法解析为 JSON，保留原文
    Unparsed { raw: String, topic: Option<String> },
}

impl GenerationOutcome {
    pub fn parsed(&self) -> Option<&Value> {
        match self {
            Self::Parsed(value) => Some(value),
            Self::Unparsed { .. } => None,
        }
    }

    /// 转为接口返回值，无法解析时为 `{error: "Invalid JSON format", raw}`
    pub fn into_value(self) -> Value {
        match self {
            Self::Parsed(value) => value,
            Self::Unparsed { raw, topic } => {
                let mut body = json!({ "error": "Invalid JSON format", "raw": raw });
                if let Some(topic) = topic {
                    body["topic"] = Value::String(topic);
                }
                body
            }
        }
    }

    /// 必须得到 JSON 时使用
    pub fn require(self, what: &str) -> Result<Value, WorkflowError> {
        match self {
            Self::Parsed(value) => Ok(value),
            Self::Unparsed { .. } => Err(WorkflowError::InvalidOutput(format!("{what}不是有效的 JSON"))),
        }
    }
}

fn parse_outcome(text: String, topic: Option<String>) -> GenerationOutcome {
    match extract_json(&text) {
        Some(value) => GenerationOutcome::Parsed(value),
        None => {
            warn!("模型输出无法解析为 JSON（{} 字符）", text.chars().count());
            GenerationOutcome::Unparsed { raw: text, topic }
        }
    }
}

fn na(value: &str) -> &str {
    if value.trim().is_empty() {
        "N/A"
    } else {
        value
    }
}

/// 研究结果转为生成提示词的一段
fn research_section(research: &ResearchResult) -> String {
    let key_points = research
        .key_points
        .iter()
        .enumerate()
        .map(|(i, p)| format!("{}. {}", i + 1, p))
        .collect::<Vec<_>>()
        .join("\n");
    let related = research.related_topics.join(", ");
    format!(
        "\n[Deep Research Results - Use this to enrich the article]\n\n\
         Summary: {}\n\n\
         Background Context: {}\n\n\
         Key Points:\n{}\n\n\
         Different Perspectives:\n\
         - Supporters' View: {}\n\
         - Critics' View: {}\n\n\
         Related Topics: {}\n\n\
         IMPORTANT: Use the above research to create a balanced, informative article that:\n\
         1. Includes relevant background context\n\
         2. Presents multiple perspectives (both supporting and critical views)\n\
         3. References the key points discovered\n",
        na(&research.summary),
        na(&research.background),
        key_points,
        na(&research.perspectives.supporters),
        na(&research.perspectives.critics),
        na(&related),
    )
}

fn truncate_chars(text: &str, limit: usize) -> &str {
    match text.char_indices().nth(limit) {
        Some((index, _)) => &text[..index],
        None => text,
    }
}

pub fn today() -> String {
    chrono::Utc::now().format("%Y-%m-%d").to_string()
}

/// 内容生成服务
pub struct GenerationService {
    config: Arc<ConfigManager>,
    model: Arc<dyn LanguageModel>,
    prompts: PromptStore,
}

impl GenerationService {
    pub fn new(config: Arc<ConfigManager>, model: Arc<dyn LanguageModel>, prompts: PromptStore) -> Self {
        Self {
            config,
            model,
            prompts,
        }
    }

    pub fn prompts(&self) -> &PromptStore {
        &self.prompts
    }

    /// 生成文章的完整提示词
    pub async fn article_prompt(&self, request: &GenerateRequest) -> Result<String, WorkflowError> {
        let system = self
            .prompts
            .skill_or(ARTICLE_SKILL, ARTICLE_FALLBACK)
            .await?;
        let level = request.level.as_deref().unwrap_or("10");
        let date = request
            .target_date
            .clone()
            .filter(|d| !d.trim().is_empty())
            .unwrap_or_else(today);

        let mut prompt = format!(
            "Target Topic: {}\nTarget Level: {}\nArticle Date (meta.date): {}\n\
             IMPORTANT: Use this exact date for the meta.date field in the output JSON.\n",
            request.topic, level, date
        );

        let research = request
            .research_context
            .as_ref()
            .filter(|v| v.is_object())
            .and_then(|v| serde_json::from_value::<ResearchResult>(v.clone()).ok());
        match research {
            Some(research) => prompt.push_str(&research_section(&research)),
            None => prompt.push_str(&format!(
                "\n[Basic Research Data]\nLatest news indicates that \"{}\" is a trending issue.\n\
                 Key entities involved: Global Tech Giants, Governments.\n\
                 Context: Significant developments have occurred in this field recently.\n",
                request.topic
            )),
        }

        let style = match request.style {
            Some(ArticleStyle::A) => self.prompts.read(PromptKey::StyleOldEditor).await,
            Some(ArticleStyle::B) => self.prompts.read(PromptKey::StyleShowOff).await,
            None => Ok(String::new()),
        }?;
        prompt.push_str(&format!(
            "\nTask: Transform this research into the JSON format defined in the System Prompt.\n\n{}\n",
            style
        ));

        if let (Some(draft), Some(feedback)) = (&request.previous_draft, &request.feedback) {
            let draft = draft.to_string();
            prompt.push_str(&format!(
                "\n[Refinement Task - CRITICAL]\n\
                 The previous draft failed specific audit checks. You must fix these errors while maintaining the required style.\n\n\
                 Previous Draft (JSON):\n{} ... (truncated if too long) ...\n\n\
                 Audit Feedback / Errors to Fix:\n{}\n\n\
                 Action: Rewrite the article to fix these errors.\n\
                 CRITICAL REQUIREMENT: You MUST regenerate the full 'tokens' array for every sentence. \
                 The 'tokens' array contains the English text and MUST NOT be empty. Do not omit the English tokens.\n",
                truncate_chars(&draft, PREVIOUS_DRAFT_LIMIT),
                feedback
            ));
        }
        prompt.push_str("\nIMPORTANT: Return ONLY valid JSON, no markdown code blocks.\n");

        Ok(format!("{system}\n\n{prompt}"))
    }

    /// 生成文章
    pub async fn generate_article(
        &self,
        request: &GenerateRequest,
    ) -> Result<GenerationOutcome, WorkflowError> {
        let model = self.config.gemini().article_model;
        let prompt = self.article_prompt(request).await?;
        info!(
            "[Generate] 模型: {}，主题: {}，等级: {}",
            model,
            request.topic,
            request.level.as_deref().unwrap_or("10")
        );
        let generation = self
            .model
            .generate(&model, &prompt, &GenerationOptions::json(0.7))
            .await?;
        Ok(parse_outcome(generation.text, None))
    }

    /// 深度研究（开启搜索 grounding）
    pub async fn research(&self, request: &ResearchRequest) -> Result<GenerationOutcome, WorkflowError> {
        let topic = request
            .search_topic()
            .ok_or_else(|| WorkflowError::MissingInput("Missing topic or newsTitle".to_string()))?
            .to_string();
        let template = self
            .prompts
            .read_or(PromptKey::ResearchTemplate, RESEARCH_FALLBACK)
            .await?;
        let source_line = request
            .news_source
            .as_deref()
            .filter(|s| !s.is_empty())
            .map(|s| format!("**Original Source**: {s}"))
            .unwrap_or_default();
        let date_context = request
            .target_date
            .as_deref()
            .filter(|d| !d.is_empty())
            .map(|d| format!("Focus on news and events from {d}."))
            .unwrap_or_default();
        let prompt = template
            .replacen("{{topic}}", &topic, 1)
            .replacen("{{source_line}}", &source_line, 1)
            .replacen("{{date_context}}", &date_context, 1);

        let model = self.config.gemini().research_model;
        info!("[Research] 开始研究: {}，模型: {}", topic, model);
        let generation = self
            .model
            .generate(&model, &prompt, &GenerationOptions::json(0.3).with_search())
            .await?;

        Ok(match parse_outcome(generation.text, Some(topic.clone())) {
            GenerationOutcome::Parsed(mut value) => {
                if let Some(map) = value.as_object_mut() {
                    map.insert("sources".to_string(), json!(generation.sources));
                    map.insert("searchQueries".to_string(), json!(generation.search_queries));
                    map.insert("topic".to_string(), Value::String(topic));
                }
                info!("[Research] 完成，引用来源 {} 个", generation.sources.len());
                GenerationOutcome::Parsed(value)
            }
            unparsed => unparsed,
        })
    }

    /// 词汇表
    pub async fn vocabulary(&self, article: &Value) -> Result<GenerationOutcome, WorkflowError> {
        let system = self
            .prompts
            .skill_or(VOCABULARY_SKILL, VOCABULARY_FALLBACK)
            .await?;
        let article_text = serde_json::to_string_pretty(article)?;
        let prompt = format!(
            "{system}\n\n\
             Extract vocabulary from the following article.\n\
             Focus on words that:\n\
             - Are Level 7-10 (intermediate-advanced)\n\
             - Are key to understanding the article\n\
             - May be challenging for non-native speakers\n\n\
             Article JSON:\n{article_text}\n\n\
             Return ONLY valid JSON with glossary map.\n"
        );
        let model = self.config.gemini().vocabulary_model;
        info!("[Vocabulary] 生成词汇表，模型: {}", model);
        let generation = self
            .model
            .generate(&model, &prompt, &GenerationOptions::json(0.3))
            .await?;
        Ok(parse_outcome(generation.text, None))
    }

    /// 播客脚本（纯文本）
    pub async fn podcast_script(
        &self,
        article: &Value,
        glossary: Option<&Value>,
    ) -> Result<String, WorkflowError> {
        let system = self
            .prompts
            .skill_or(PODCAST_SKILL, PODCAST_FALLBACK)
            .await?;
        let empty = json!({});
        let prompt = format!(
            "{system}\n\n\
             Generate a podcast script based on the following article.\n\n\
             Article JSON:\n{}\n\n\
             Glossary:\n{}\n\n\
             Requirements:\n\
             1. Output pure text only (no markdown, no speaker labels)\n\
             2. Use Chinese for explanations, English for original quotes\n\
             3. Include grammar analysis and vocabulary explanation\n\
             4. Use newlines to control pacing\n\
             5. Aim for 3-5 minutes of content\n\n\
             Return the script as plain text.\n",
            serde_json::to_string_pretty(article)?,
            serde_json::to_string_pretty(glossary.unwrap_or(&empty))?,
        );
        let model = self.config.gemini().podcast_model;
        info!("[Podcast] 生成播客脚本，模型: {}", model);
        let generation = self
            .model
            .generate(&model, &prompt, &GenerationOptions::text(0.7))
            .await?;
        if generation.text.trim().is_empty() {
            return Err(ProviderError::EmptyResponse.into());
        }
        Ok(generation.text)
    }

    /// 为单词生成词典条目，结果形如 `{entries: {word: {...}}}`
    pub async fn dictionary_entries(&self, words: &[String]) -> Result<GenerationOutcome, ProviderError> {
        let prompt = format!(
            "Generate dictionary entries for the following English words.\n\
             For each word, provide:\n\
             - word: the word itself (lowercase)\n\
             - phonetic: IPA pronunciation\n\
             - definitions: array of {{ pos: \"n.\"|\"v.\"|\"adj.\"|\"adv.\", zh: \"中文释义\", en: \"English definition\" }}\n\n\
             Words: {}\n\n\
             Return JSON format:\n\
             {{\n    \"entries\": {{\n        \"word1\": {{ \"word\": \"word1\", \"phonetic\": \"...\", \"definitions\": [...] }}\n    }}\n}}\n\n\
             IMPORTANT: Return ONLY valid JSON.\n",
            words.join(", ")
        );
        let model = self.config.gemini().vocabulary_model;
        let generation = self
            .model
            .generate(&model, &prompt, &GenerationOptions::json(0.3))
            .await?;
        Ok(parse_outcome(generation.text, None))
    }

    /// 连通性测试
    pub async fn probe(&self) -> Result<Value, ProviderError> {
        self.model.probe().await
    }
}
