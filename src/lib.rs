//! Wordcast 后端入口
//!
//! 加载配置、初始化日志、恢复工作流会话并启动 HTTP 服务。

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use wordcast_core::logger::create_log_store_from_config;
use wordcast_core::{ConfigManager, LogStoreLayer, SharedLogStore};
use wordcast_server::{build_router, AppState, Collaborators};
use wordcast_services::workflow::{
    FileSessionRepository, PocketBaseSessionRepository, SessionRepository, SessionSync, WorkflowManager,
};

/// 项目根目录的环境变量
pub const ROOT_ENV: &str = "WORDCAST_ROOT";

/// 项目根：`WORDCAST_ROOT`，否则为当前目录
pub fn project_root() -> anyhow::Result<PathBuf> {
    match std::env::var_os(ROOT_ENV).filter(|v| !v.is_empty()) {
        Some(root) => Ok(PathBuf::from(root)),
        None => std::env::current_dir().context("无法读取当前目录"),
    }
}

/// 初始化 tracing：控制台输出并写入内存日志
pub fn init_tracing(logs: SharedLogStore) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let result = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(LogStoreLayer::new(logs))
        .try_init();
    if let Err(e) = result {
        eprintln!("日志初始化失败: {e}");
    }
}

/// 按配置选择会话存储：配置了 PocketBase 时使用远程集合，否则写本地文件
pub fn session_repository(
    config: &ConfigManager,
    collaborators: &Collaborators,
) -> Arc<dyn SessionRepository> {
    if config.pocketbase().is_configured() {
        Arc::new(PocketBaseSessionRepository::new(collaborators.pocketbase.clone()))
    } else {
        Arc::new(FileSessionRepository::new(config.paths().sessions_file()))
    }
}

pub async fn run() -> anyhow::Result<()> {
    let root = project_root()?;
    let config = Arc::new(ConfigManager::load(&root).context("加载配置失败")?);
    let snapshot = config.snapshot();

    let logs: SharedLogStore = Arc::new(parking_lot::RwLock::new(create_log_store_from_config(
        &snapshot.logging,
    )));
    init_tracing(logs.clone());
    info!("Wordcast {} 启动，项目根: {}", wordcast_core::version(), root.display());

    let collaborators = Collaborators::from_config(&config).context("创建外部服务客户端失败")?;
    let repository = session_repository(&config, &collaborators);
    info!("会话存储: {}", repository.name());

    let sync = SessionSync::spawn(repository, Duration::from_millis(snapshot.sync.debounce_ms));
    let manager = Arc::new(WorkflowManager::new(sync));
    if let Err(e) = manager.load_from_remote().await {
        warn!("加载工作流会话失败，从空列表开始: {}", e);
    }

    let state = AppState::new(config, logs, collaborators, manager.clone());
    let app = build_router(state);

    let addr = format!("{}:{}", snapshot.server.host, snapshot.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("无法监听 {addr}"))?;
    info!("后端服务运行于 http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP 服务异常退出")?;

    match manager.flush_all().await {
        Ok(count) => info!("退出前已保存 {} 个会话", count),
        Err(e) => error!("退出前保存会话失败: {}", e),
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("监听退出信号失败: {}", e);
    }
    info!("收到退出信号，正在关闭");
}
