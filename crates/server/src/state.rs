//! 共享应用状态

use std::sync::Arc;

use wordcast_core::errors::ProviderError;
use wordcast_core::{ConfigManager, SharedLogStore};
use wordcast_providers::{
    default_feeds, GeminiClient, LanguageModel, NewsFeed, PocketBaseClient, RssFetcher,
    SpeechSynthesizer, VolcengineTts,
};
use wordcast_services::{
    AudioService, DictionaryService, GenerationService, NewsService, PromptStore, PublishService,
    StepExecutor, WorkflowManager,
};

/// 外部服务
pub struct Collaborators {
    pub model: Arc<dyn LanguageModel>,
    pub tts: Arc<dyn SpeechSynthesizer>,
    pub feed: Arc<dyn NewsFeed>,
    pub pocketbase: Arc<PocketBaseClient>,
}

impl Collaborators {
    /// 按配置创建真实的客户端
    pub fn from_config(config: &Arc<ConfigManager>) -> Result<Self, ProviderError> {
        Ok(Self {
            model: Arc::new(GeminiClient::new(config.clone())?),
            tts: Arc::new(VolcengineTts::new(config.clone())?),
            feed: Arc::new(RssFetcher::new(config, default_feeds())?),
            pocketbase: Arc::new(PocketBaseClient::new(config.clone())?),
        })
    }
}

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ConfigManager>,
    pub logs: SharedLogStore,
    pub pocketbase: Arc<PocketBaseClient>,
    pub manager: Arc<WorkflowManager>,
    pub generation: Arc<GenerationService>,
    pub dictionary: Arc<DictionaryService>,
    pub news: Arc<NewsService>,
    pub audio: Arc<AudioService>,
    pub publish: Arc<PublishService>,
    pub executor: Arc<StepExecutor>,
}

impl AppState {
    pub fn new(
        config: Arc<ConfigManager>,
        logs: SharedLogStore,
        collaborators: Collaborators,
        manager: Arc<WorkflowManager>,
    ) -> Self {
        let Collaborators {
            model,
            tts,
            feed,
            pocketbase,
        } = collaborators;

        let generation = Arc::new(GenerationService::new(
            config.clone(),
            model,
            PromptStore::new(config.clone()),
        ));
        let dictionary = Arc::new(DictionaryService::new(config.clone(), generation.clone()));
        let news = Arc::new(NewsService::new(feed));
        let audio = Arc::new(AudioService::new(config.clone(), tts));
        let publish = Arc::new(PublishService::new(config.clone(), pocketbase.clone()));
        let executor = Arc::new(StepExecutor::new(
            manager.clone(),
            generation.clone(),
            news.clone(),
            audio.clone(),
            publish.clone(),
        ));

        Self {
            config,
            logs,
            pocketbase,
            manager,
            generation,
            dictionary,
            news,
            audio,
            publish,
            executor,
        }
    }
}
