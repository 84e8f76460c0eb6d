//! RSS 新闻源
//!
//! 并发抓取配置的订阅源，使用 feed-rs 解析（RSS 与 Atom 均可），
//! 每个源按 `max_items` 截断。单个源失败只记录警告。

use std::io::Cursor;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use wordcast_core::errors::ProviderError;
use wordcast_core::ConfigManager;

use crate::http::{build_http_client, transport_error};

/// 订阅源
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedSource {
    pub name: String,
    pub category: String,
    pub url: String,
    pub max_items: usize,
}

impl FeedSource {
    pub fn new(name: &str, category: &str, url: &str, max_items: usize) -> Self {
        Self {
            name: name.to_string(),
            category: category.to_string(),
            url: url.to_string(),
            max_items,
        }
    }
}

/// 默认订阅源
pub fn default_feeds() -> Vec<FeedSource> {
    vec![
        FeedSource::new("Hacker News", "科技", "https://news.ycombinator.com/rss", 6),
        FeedSource::new(
            "NYTimes Politics",
            "政治",
            "https://rss.nytimes.com/services/xml/rss/nyt/Politics.xml",
            4,
        ),
        FeedSource::new(
            "BBC Politics",
            "政治",
            "https://feeds.bbci.co.uk/news/politics/rss.xml",
            4,
        ),
        FeedSource::new(
            "NYTimes Business",
            "财经",
            "https://rss.nytimes.com/services/xml/rss/nyt/Business.xml",
            4,
        ),
        FeedSource::new(
            "WSJ Markets",
            "财经",
            "https://feeds.a.dj.com/rss/RSSMarketsMain.xml",
            4,
        ),
    ]
}

/// 新闻条目
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewsItem {
    pub category: String,
    pub source: String,
    pub title: String,
    #[serde(default)]
    pub link: String,
    /// `【分类 | 来源】标题`
    pub raw: String,
}

impl NewsItem {
    pub fn new(category: &str, source: &str, title: &str, link: &str) -> Self {
        Self {
            category: category.to_string(),
            source: source.to_string(),
            title: title.to_string(),
            link: link.to_string(),
            raw: format!("【{category} | {source}】{title}"),
        }
    }
}

/// 解析单个订阅源的内容
pub fn parse_feed(bytes: &[u8], source: &FeedSource) -> Result<Vec<NewsItem>, ProviderError> {
    let feed = feed_rs::parser::parse(Cursor::new(bytes))
        .map_err(|e| ProviderError::Decode(format!("RSS 解析失败 ({}): {e}", source.name)))?;

    Ok(feed
        .entries
        .into_iter()
        .filter_map(|entry| {
            let title = entry.title.map(|t| t.content.trim().to_string())?;
            if title.is_empty() {
                return None;
            }
            let link = entry
                .links
                .first()
                .map(|link| link.href.trim().to_string())
                .unwrap_or_default();
            Some(NewsItem::new(&source.category, &source.name, &title, &link))
        })
        .take(source.max_items)
        .collect())
}

/// 新闻源抽象
#[async_trait]
pub trait NewsFeed: Send + Sync {
    /// 抓取所有源的条目；全部失败或没有条目时返回错误
    async fn fetch_items(&self) -> Result<Vec<NewsItem>, ProviderError>;
}

/// 基于 HTTP 的 RSS 抓取器
pub struct RssFetcher {
    client: Client,
    feeds: Vec<FeedSource>,
}

impl RssFetcher {
    pub fn new(config: &Arc<ConfigManager>, feeds: Vec<FeedSource>) -> Result<Self, ProviderError> {
        let proxy = config.gemini().proxy;
        let client = build_http_client(proxy.as_deref(), 15)?;
        Ok(Self { client, feeds })
    }

    async fn fetch_feed(&self, source: &FeedSource) -> Result<Vec<NewsItem>, ProviderError> {
        let response = self
            .client
            .get(&source.url)
            .send()
            .await
            .map_err(|e| transport_error(&format!("RSS 抓取失败 ({})", source.name), e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(ProviderError::Status {
                status: status.as_u16(),
                body: format!("Failed to fetch RSS ({})", source.name),
            });
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| transport_error("RSS 读取失败", e))?;
        parse_feed(&bytes, source)
    }
}

#[async_trait]
impl NewsFeed for RssFetcher {
    async fn fetch_items(&self) -> Result<Vec<NewsItem>, ProviderError> {
        let results = join_all(self.feeds.iter().map(|feed| self.fetch_feed(feed))).await;

        let mut items = Vec::new();
        for (feed, result) in self.feeds.iter().zip(results) {
            match result {
                Ok(feed_items) => items.extend(feed_items),
                Err(e) => warn!("[RSS] {} 抓取失败: {}", feed.name, e),
            }
        }

        if items.is_empty() {
            return Err(ProviderError::Upstream("No RSS items fetched".to_string()));
        }
        info!("[RSS] 共获取 {} 条新闻", items.len());
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{routing::get, Router};
    use wordcast_core::AppConfig;

    const SAMPLE_RSS: &str = r#"<?xml version="1.0"?>
<rss version="2.0"><channel><title>Sample</title>
<item><title><![CDATA[Senate passes budget]]></title><link>https://example.com/a</link></item>
<item><title>Markets rally</title><link>https://example.com/b</link></item>
<item><title>Third story</title></item>
</channel></rss>"#;

    #[test]
    fn test_parse_feed_caps_and_formats() {
        let source = FeedSource::new("Sample", "政治", "http://unused", 2);
        let items = parse_feed(SAMPLE_RSS.as_bytes(), &source).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].title, "Senate passes budget");
        assert_eq!(items[0].link, "https://example.com/a");
        assert_eq!(items[0].raw, "【政治 | Sample】Senate passes budget");
    }

    #[test]
    fn test_parse_feed_rejects_garbage() {
        let source = FeedSource::new("Broken", "科技", "http://unused", 5);
        assert!(parse_feed(b"<html>not a feed</html>", &source).is_err());
    }

    #[tokio::test]
    async fn test_fetch_items_skips_failed_feeds() {
        let app = Router::new()
            .route("/ok.xml", get(|| async { SAMPLE_RSS }))
            .route(
                "/down.xml",
                get(|| async { (axum::http::StatusCode::SERVICE_UNAVAILABLE, "down") }),
            );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let config = Arc::new(ConfigManager::new(".", AppConfig::default()));
        let fetcher = RssFetcher::new(
            &config,
            vec![
                FeedSource::new("Down", "科技", &format!("http://{addr}/down.xml"), 5),
                FeedSource::new("Up", "财经", &format!("http://{addr}/ok.xml"), 5),
            ],
        )
        .unwrap();

        let items = fetcher.fetch_items().await.unwrap();
        assert_eq!(items.len(), 3);
        assert!(items.iter().all(|item| item.source == "Up"));
    }
}
