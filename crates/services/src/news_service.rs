//! 新闻选题
//!
//! 汇总 RSS 新闻，抓取失败时返回内置的备选选题。

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};
use wordcast_providers::{NewsFeed, NewsItem};

/// 单次扫描最多返回的条目数
pub const MAX_NEWS_ITEMS: usize = 22;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewsScan {
    pub items: Vec<NewsItem>,
    /// 每条新闻的 `raw` 文本
    pub topics: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl NewsScan {
    fn new(items: Vec<NewsItem>, error: Option<String>) -> Self {
        let topics = items.iter().map(|item| item.raw.clone()).collect();
        Self { items, topics, error }
    }
}

pub fn fallback_items() -> Vec<NewsItem> {
    [
        ("科技", "Tech News", "SpaceX Starship Latest Updates"),
        ("科技", "AI News", "New AI Models Released This Week"),
        ("财经", "Finance", "Global Economic Trends 2026"),
        ("科技", "Tech News", "Quantum Computing Breakthroughs"),
        ("科技", "Auto News", "Electric Vehicle Market Analysis"),
    ]
    .into_iter()
    .map(|(category, source, title)| NewsItem::new(category, source, title, ""))
    .collect()
}

pub struct NewsService {
    feed: Arc<dyn NewsFeed>,
}

impl NewsService {
    pub fn new(feed: Arc<dyn NewsFeed>) -> Self {
        Self { feed }
    }

    pub async fn scan(&self) -> NewsScan {
        match self.feed.fetch_items().await {
            Ok(mut items) => {
                items.truncate(MAX_NEWS_ITEMS);
                info!("[News] 返回 {} 条新闻", items.len());
                NewsScan::new(items, None)
            }
            Err(e) => {
                warn!("[News] 抓取失败，使用备选选题: {}", e);
                NewsScan::new(fallback_items(), Some(e.to_string()))
            }
        }
    }
}
