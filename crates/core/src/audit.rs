//! 文章质量校验
//!
//! 词数 210–270、3 个段落、简报字段齐全且语法分析以中文开头、
//! 句子分析以中文开头时判定为通过。

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::article::{article_root, count_english_words, paragraphs, sentences, starts_with_cjk};

pub const MIN_WORDS: usize = 210;
pub const MAX_WORDS: usize = 270;
pub const EXPECTED_PARAGRAPHS: usize = 3;

/// 简报字段及中文名
pub const BRIEFING_FIELDS: [(&str, &str); 6] = [
    ("what", "事件内容"),
    ("when", "时间"),
    ("who", "主体"),
    ("scope", "范围"),
    ("market_implications", "市场影响"),
    ("grammar_analysis", "语法分析"),
];

/// 校验结果
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditReport {
    pub word_count: usize,
    pub para_count: usize,
    pub has_title: bool,
    pub has_briefing: bool,
    pub has_glossary: bool,
    pub has_sentence_analysis: bool,
    pub is_sentence_analysis_chinese_start: bool,
    pub has_what: bool,
    pub has_when: bool,
    pub has_who: bool,
    pub has_scope: bool,
    pub has_market_implications: bool,
    pub has_grammar_analysis: bool,
    pub is_grammar_analysis_chinese_start: bool,
    pub is_grammar_analysis_valid: bool,
    pub is_briefing_complete: bool,
    pub is_word_count_valid: bool,
    pub is_para_count_valid: bool,
    pub valid: bool,
}

impl AuditReport {
    /// 未通过项的中文描述，用于改写反馈
    pub fn failures(&self) -> Vec<String> {
        let mut failures = Vec::new();
        if !self.is_word_count_valid {
            failures.push(format!(
                "英文词数为 {}，需要在 {MIN_WORDS}–{MAX_WORDS} 之间",
                self.word_count
            ));
        }
        if !self.is_para_count_valid {
            failures.push(format!(
                "段落数为 {}，需要正好 {EXPECTED_PARAGRAPHS} 段",
                self.para_count
            ));
        }
        let briefing = [
            (self.has_what, "what"),
            (self.has_when, "when"),
            (self.has_who, "who"),
            (self.has_scope, "scope"),
            (self.has_market_implications, "market_implications"),
        ];
        for (present, key) in briefing {
            if !present {
                let label = BRIEFING_FIELDS
                    .iter()
                    .find(|(field, _)| *field == key)
                    .map(|(_, label)| *label)
                    .unwrap_or(key);
                failures.push(format!("简报缺少字段 {key}（{label}）"));
            }
        }
        if !self.has_grammar_analysis {
            failures.push("简报缺少字段 grammar_analysis（语法分析）".to_string());
        } else if !self.is_grammar_analysis_chinese_start {
            failures.push("grammar_analysis 必须以中文开头".to_string());
        }
        if !self.is_sentence_analysis_chinese_start {
            failures.push("句子分析（grammar / explanation）必须以中文开头".to_string());
        }
        failures
    }
}

fn non_blank(value: Option<&Value>) -> bool {
    value
        .and_then(Value::as_str)
        .is_some_and(|text| !text.trim().is_empty())
}

/// 校验文章 JSON（可以是 `{article, glossary}` 或文章本体）
pub fn audit_article(value: &Value) -> AuditReport {
    let root = article_root(value);
    let paragraph_list = paragraphs(value);
    let briefing = root
        .get("meta")
        .and_then(|meta| meta.get("briefing"))
        .cloned()
        .unwrap_or(Value::Null);

    let word_count = count_english_words(value);

    let mut has_sentence_analysis = false;
    let mut is_sentence_analysis_chinese_start = true;
    for sentence in sentences(value) {
        let Some(analysis) = sentence.get("analysis") else {
            continue;
        };
        let grammar = analysis.get("grammar").and_then(Value::as_str).unwrap_or("");
        let explanation = analysis
            .get("explanation")
            .and_then(Value::as_str)
            .unwrap_or("");
        if !grammar.is_empty() || !explanation.is_empty() {
            has_sentence_analysis = true;
        }
        let grammar_ok = grammar.is_empty() || starts_with_cjk(grammar);
        let explanation_ok = explanation.is_empty() || starts_with_cjk(explanation);
        if !grammar_ok || !explanation_ok {
            is_sentence_analysis_chinese_start = false;
        }
    }

    let has_what = non_blank(briefing.get("what"));
    let has_when = non_blank(briefing.get("when"));
    let has_who = non_blank(briefing.get("who"));
    let has_scope = non_blank(briefing.get("scope"));
    let has_market_implications = non_blank(briefing.get("market_implications"));
    let grammar_analysis = briefing.get("grammar_analysis").and_then(Value::as_str);
    let has_grammar_analysis = non_blank(briefing.get("grammar_analysis"));
    let is_grammar_analysis_chinese_start =
        has_grammar_analysis && grammar_analysis.is_some_and(starts_with_cjk);
    let is_grammar_analysis_valid = has_grammar_analysis && is_grammar_analysis_chinese_start;
    let is_briefing_complete = has_what
        && has_when
        && has_who
        && has_scope
        && has_market_implications
        && is_grammar_analysis_valid;

    let is_word_count_valid = (MIN_WORDS..=MAX_WORDS).contains(&word_count);
    let is_para_count_valid = paragraph_list.len() == EXPECTED_PARAGRAPHS;

    let title = root.get("title");
    let has_title = non_blank(title.and_then(|t| t.get("zh")))
        || non_blank(title.and_then(|t| t.get("cn")));
    let has_briefing = non_blank(root.get("intro").and_then(|intro| intro.get("text")))
        || briefing.as_object().is_some_and(|map| !map.is_empty());
    let has_glossary = value
        .get("glossary")
        .and_then(Value::as_object)
        .is_some_and(|map| !map.is_empty());

    AuditReport {
        word_count,
        para_count: paragraph_list.len(),
        has_title,
        has_briefing,
        has_glossary,
        has_sentence_analysis,
        is_sentence_analysis_chinese_start,
        has_what,
        has_when,
        has_who,
        has_scope,
        has_market_implications,
        has_grammar_analysis,
        is_grammar_analysis_chinese_start,
        is_grammar_analysis_valid,
        is_briefing_complete,
        is_word_count_valid,
        is_para_count_valid,
        valid: is_word_count_valid
            && is_para_count_valid
            && is_briefing_complete
            && is_sentence_analysis_chinese_start,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn paragraph(words: usize, grammar: &str) -> Value {
        let tokens: Vec<Value> = (0..words).map(|i| json!({ "text": format!("word{i}") })).collect();
        json!({
            "paragraph": {
                "tokenizedSentences": [
                    { "tokens": tokens, "analysis": { "grammar": grammar, "explanation": "解释" } }
                ]
            }
        })
    }

    fn valid_article() -> Value {
        json!({
            "article": {
                "title": { "zh": "标题", "en": "Title" },
                "meta": {
                    "briefing": {
                        "what": "事件",
                        "when": "2025-01-01",
                        "who": "政府",
                        "scope": "全球",
                        "market_implications": "利好",
                        "grammar_analysis": "本文使用了被动语态"
                    }
                },
                "paragraphs": [paragraph(80, "主谓宾"), paragraph(80, "定语从句"), paragraph(80, "状语")]
            },
            "glossary": { "word0": {} }
        })
    }

    #[test]
    fn test_valid_article_passes() {
        let report = audit_article(&valid_article());
        assert_eq!(report.word_count, 240);
        assert_eq!(report.para_count, 3);
        assert!(report.has_title);
        assert!(report.has_glossary);
        assert!(report.has_sentence_analysis);
        assert!(report.is_briefing_complete);
        assert!(report.valid, "完整文章应通过校验: {:?}", report.failures());
        assert!(report.failures().is_empty());
    }

    #[test]
    fn test_english_grammar_analysis_fails() {
        let mut value = valid_article();
        value["article"]["meta"]["briefing"]["grammar_analysis"] = json!("Passive voice");
        let report = audit_article(&value);

        assert!(report.has_grammar_analysis);
        assert!(!report.is_grammar_analysis_chinese_start);
        assert!(!report.is_briefing_complete);
        assert!(!report.valid);
        assert!(report.failures().iter().any(|f| f.contains("必须以中文开头")));
    }

    #[test]
    fn test_word_count_and_paragraph_bounds() {
        let mut value = valid_article();
        value["article"]["paragraphs"] = json!([paragraph(300, "主语")]);
        let report = audit_article(&value);

        assert!(!report.is_word_count_valid);
        assert!(!report.is_para_count_valid);
        assert_eq!(report.failures().len(), 2);
    }

    #[test]
    fn test_sentence_analysis_must_start_with_chinese() {
        let mut value = valid_article();
        value["article"]["paragraphs"][1] = paragraph(80, "Subject + verb");
        let report = audit_article(&value);
        assert!(!report.is_sentence_analysis_chinese_start);
        assert!(!report.valid);
    }

    #[test]
    fn test_serialize_camel_case() {
        let value = serde_json::to_value(audit_article(&json!({}))).unwrap();
        assert_eq!(value["wordCount"], 0);
        assert_eq!(value["isParaCountValid"], false);
    }
}
