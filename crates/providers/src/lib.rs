//! 外部服务客户端
//!
//! Gemini 文本生成、火山引擎语音合成、PocketBase 记录存储与 RSS 新闻源。

pub mod gemini;
pub mod http;
pub mod pocketbase;
pub mod rss;
pub mod tts;

pub use gemini::{GeminiClient, Generation, GenerationOptions, GroundingSource, LanguageModel};
pub use pocketbase::{ListQuery, PbResponse, PocketBaseClient, RecordList, SchemaField};
pub use rss::{default_feeds, FeedSource, NewsFeed, NewsItem, RssFetcher};
pub use tts::{SpeechSynthesizer, VolcengineTts};
