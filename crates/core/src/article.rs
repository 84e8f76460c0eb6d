//! 文章 JSON 结构工具
//!
//! 生成的文章结构为 `{ article: { title, meta, intro, paragraphs } }`，
//! 其中每个段落为 `{ paragraph: { tokenizedSentences: [{ tokens, analysis }] } }`，
//! 旧格式中段落也可能直接是句子数组。这里的函数都按宽松方式读取。

use std::collections::{BTreeSet, HashSet};

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

/// 提取词汇时排除的常见词（仍计入总词数）
static STOP_WORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "the", "and", "for", "are", "but", "not", "you", "all", "can", "had", "her", "was", "one",
        "our", "out", "has", "his", "how", "its", "may", "new", "now", "old", "see", "way", "who",
        "boy", "did", "get", "let", "put", "say", "she", "too", "use", "this", "that", "with",
        "have", "from", "they", "been", "call", "come", "each", "find", "first", "just", "know",
        "like", "long", "make", "many", "more", "most", "name", "number", "only", "other", "part",
        "people", "than", "them", "then", "time", "very", "when", "which", "word", "would",
        "write", "about", "after", "also", "back", "being", "could", "down", "even", "give",
        "good", "here", "into", "look", "made", "much", "must", "over", "said", "same", "should",
        "some", "still", "such", "take", "these", "thing", "think", "those", "through", "under",
        "well", "what", "where", "while", "will", "work", "year", "your", "there", "their",
        "were", "before", "because", "want",
    ]
    .into_iter()
    .collect()
});

static JSON_FENCE: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"```json\s*([\s\S]*?)\s*```").ok());

/// 文章主体：优先取 `article` 字段
pub fn article_root(value: &Value) -> &Value {
    match value.get("article") {
        Some(inner) if inner.is_object() => inner,
        _ => value,
    }
}

/// 段落列表
pub fn paragraphs(value: &Value) -> &[Value] {
    article_root(value)
        .get("paragraphs")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

/// 段落中的句子
pub fn paragraph_sentences(paragraph: &Value) -> &[Value] {
    if let Some(sentences) = paragraph
        .get("paragraph")
        .and_then(|p| p.get("tokenizedSentences"))
        .and_then(Value::as_array)
    {
        return sentences;
    }
    paragraph.as_array().map(Vec::as_slice).unwrap_or(&[])
}

/// 所有句子（跨段落）
pub fn sentences(value: &Value) -> impl Iterator<Item = &Value> {
    paragraphs(value).iter().flat_map(paragraph_sentences)
}

/// 单个 token 的文本：`text` → `value` → `word`
pub fn token_text(token: &Value) -> Option<&str> {
    ["text", "value", "word"]
        .iter()
        .filter_map(|key| token.get(*key).and_then(Value::as_str))
        .find(|text| !text.is_empty())
}

fn sentence_tokens(sentence: &Value) -> &[Value] {
    sentence
        .get("tokens")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

/// 是否以中文字符开头
pub fn starts_with_cjk(text: &str) -> bool {
    text.trim().chars().next().is_some_and(is_cjk)
}

pub fn is_cjk(c: char) -> bool {
    ('\u{4e00}'..='\u{9fa5}').contains(&c)
}

fn contains_cjk(text: &str) -> bool {
    text.chars().any(is_cjk)
}

/// 含英文字母且不含中文
pub fn is_english_text(text: &str) -> bool {
    text.chars().any(|c| c.is_ascii_alphabetic()) && !contains_cjk(text)
}

/// 英文词数（校验口径）
///
/// token 文本按空白切分，去掉首尾标点后仍为英文的才计数。
pub fn count_english_words(value: &Value) -> usize {
    sentences(value)
        .flat_map(sentence_tokens)
        .filter_map(token_text)
        .flat_map(str::split_whitespace)
        .map(|word| word.trim_matches(|c: char| !(c.is_alphanumeric() || c == '_')))
        .filter(|word| !word.is_empty() && is_english_text(word))
        .count()
}

/// 词汇提取结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VocabularyExtraction {
    /// 英文 token 总数
    pub raw_count: usize,
    /// 去重排序后的候选词
    pub words: Vec<String>,
}

/// 提取候选词汇
///
/// 规则：英文 token 计入 `raw_count`；清洗为仅含字母和连字符、转小写，
/// 长度不少于 3 且不在常见词表中的才作为候选词。
pub fn extract_vocabulary(value: &Value) -> VocabularyExtraction {
    let mut raw_count = 0;
    let mut unique = BTreeSet::new();

    for text in sentences(value).flat_map(sentence_tokens).filter_map(token_text) {
        if !is_english_text(text) {
            continue;
        }
        raw_count += 1;
        let clean: String = text
            .chars()
            .filter(|c| c.is_ascii_alphabetic() || *c == '-')
            .collect::<String>()
            .to_lowercase();
        if clean.chars().count() >= 3 && !STOP_WORDS.contains(clean.as_str()) {
            unique.insert(clean);
        }
    }

    VocabularyExtraction {
        raw_count,
        words: unique.into_iter().collect(),
    }
}

/// 去掉 markdown 代码块标记
pub fn strip_code_fences(text: &str) -> String {
    text.replace("```json", "").replace("```", "")
}

/// 从模型输出中提取 JSON
///
/// 依次尝试：```json 代码块 → 最外层花括号 → 去掉代码块标记后整体解析。
pub fn extract_json(text: &str) -> Option<Value> {
    if let Some(re) = JSON_FENCE.as_ref() {
        if let Some(captures) = re.captures(text) {
            if let Some(inner) = captures.get(1) {
                if let Ok(value) = serde_json::from_str(inner.as_str()) {
                    return Some(value);
                }
            }
        }
    }

    if let (Some(first), Some(last)) = (text.find('{'), text.rfind('}')) {
        if last > first {
            if let Ok(value) = serde_json::from_str(&text[first..=last]) {
                return Some(value);
            }
        }
    }

    serde_json::from_str(strip_code_fences(text).trim()).ok()
}

/// 字符串形式的 JSON 字段尝试解析，失败则原样保留
pub fn normalize_json_field(value: &Value) -> Value {
    match value {
        Value::String(text) => serde_json::from_str(text).unwrap_or_else(|_| value.clone()),
        other => other.clone(),
    }
}

/// JSON 值是否“有内容”：非 null、非空字符串、非空对象/数组
pub fn is_present(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::String(s)) => !s.trim().is_empty(),
        Some(Value::Object(map)) => !map.is_empty(),
        Some(Value::Array(items)) => !items.is_empty(),
        Some(_) => true,
    }
}

/// 词汇表条目数（对象按键数，数组按长度）
pub fn glossary_len(value: Option<&Value>) -> usize {
    match value {
        Some(Value::Object(map)) => map.len(),
        Some(Value::Array(items)) => items.len(),
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn article(tokens: &[&str]) -> Value {
        let tokens: Vec<Value> = tokens.iter().map(|t| json!({ "text": t })).collect();
        json!({
            "article": {
                "paragraphs": [
                    { "paragraph": { "tokenizedSentences": [ { "tokens": tokens } ] } }
                ]
            }
        })
    }

    #[test]
    fn test_extract_vocabulary_rules() {
        let value = article(&["The", "Senate", "passed,", "the", "war", "act", "法案", "AI", "tax-cut"]);
        let result = extract_vocabulary(&value);

        assert_eq!(result.raw_count, 8);
        assert_eq!(result.words, vec!["act", "passed", "senate", "tax-cut", "war"]);
    }

    #[test]
    fn test_token_text_fallback_order() {
        assert_eq!(token_text(&json!({ "text": "", "value": "alpha" })), Some("alpha"));
        assert_eq!(token_text(&json!({ "word": "beta" })), Some("beta"));
        assert_eq!(token_text(&json!({ "other": "gamma" })), None);
    }

    #[test]
    fn test_legacy_paragraph_array() {
        let value = json!({
            "paragraphs": [[ { "tokens": [ { "value": "legacy" }, { "value": "format" } ] } ]]
        });
        assert_eq!(count_english_words(&value), 2);
        assert_eq!(extract_vocabulary(&value).words, vec!["format", "legacy"]);
    }

    #[test]
    fn test_count_english_words_splits_phrases() {
        let value = article(&["New York", "(Reuters)", "—", "纽约", "5%"]);
        assert_eq!(count_english_words(&value), 3);
    }

    #[test]
    fn test_extract_json_variants() {
        assert_eq!(
            extract_json("Here:\n```json\n{\"a\": 1}\n```"),
            Some(json!({ "a": 1 }))
        );
        assert_eq!(extract_json("noise {\"b\": [1, 2]} trailing"), Some(json!({ "b": [1, 2] })));
        assert_eq!(extract_json("```\n[1, 2]\n```"), Some(json!([1, 2])));
        assert_eq!(extract_json("not json at all"), None);
    }

    #[test]
    fn test_normalize_json_field() {
        assert_eq!(normalize_json_field(&json!("{\"x\":1}")), json!({ "x": 1 }));
        assert_eq!(normalize_json_field(&json!("plain text")), json!("plain text"));
        assert_eq!(normalize_json_field(&json!({ "y": 2 })), json!({ "y": 2 }));
    }

    #[test]
    fn test_starts_with_cjk() {
        assert!(starts_with_cjk("  主语 + 谓语"));
        assert!(!starts_with_cjk("Subject first"));
        assert!(!starts_with_cjk(""));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_vocabulary_sorted_unique_and_bounded(words in prop::collection::vec("[A-Za-z,.-]{1,10}", 0..40)) {
            let refs: Vec<&str> = words.iter().map(String::as_str).collect();
            let result = extract_vocabulary(&article(&refs));

            prop_assert!(result.words.len() <= result.raw_count);
            prop_assert!(result.words.windows(2).all(|w| w[0] < w[1]));
            for word in &result.words {
                prop_assert!(word.len() >= 3);
                prop_assert!(!STOP_WORDS.contains(word.as_str()));
                prop_assert!(word.chars().all(|c| c.is_ascii_lowercase() || c == '-'));
            }
        }

        #[test]
        fn prop_chinese_tokens_never_counted(words in prop::collection::vec("[\u{4e00}-\u{4e50}]{1,4}", 0..20)) {
            let refs: Vec<&str> = words.iter().map(String::as_str).collect();
            let value = article(&refs);
            prop_assert_eq!(count_english_words(&value), 0);
            prop_assert_eq!(extract_vocabulary(&value).raw_count, 0);
        }
    }
}
