pub mod config;
pub mod credential;
pub mod error;
pub mod gateway;
pub mod logging;
pub mod quota;
pub mod upstream;

use anyhow::Context;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = config::Config::load()?;

    init_tracing(&cfg);

    // 没有可用的 virtual key 时拒绝启动。
    let keys = credential::registry::KeyRegistry::load(&cfg.keys_file_path)
        .await
        .context("加载 virtual keys 失败")?;
    for (provider, _) in keys.provider_credentials() {
        if upstream::provider::Provider::parse(&provider).is_none() {
            tracing::warn!("未知的 provider: {provider}（对应的 key 转发时将返回 502）");
        }
    }

    let tracker = Arc::new(quota::QuotaTracker::new(cfg.quota_enabled, cfg.quota_limit));
    let upstream =
        upstream::client::ProviderClient::new(&cfg).context("初始化上游 HTTP 客户端失败")?;
    let interactions = Arc::new(
        logging::InteractionLog::open(&cfg)
            .await
            .context("初始化交互日志失败")?,
    );

    tracing::info!(
        "已加载 {} 个 virtual key，配额 {}（每小时 {} 次），请求超时 {}s",
        keys.len(),
        if cfg.quota_enabled { "开启" } else { "关闭" },
        cfg.quota_limit,
        cfg.request_timeout_secs,
    );

    let addr: SocketAddr = format!("{}:{}", cfg.host, cfg.port)
        .parse()
        .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], cfg.port)));

    let state = Arc::new(gateway::GatewayState {
        cfg,
        keys: Arc::new(keys),
        tracker,
        upstream,
        interactions,
    });
    let app = gateway::router(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("绑定监听端口失败")?;

    tracing::info!("LLM Gateway listening on http://{addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("服务异常退出")?;

    Ok(())
}

fn init_tracing(cfg: &config::Config) {
    // 依赖库默认只输出 warn；本项目日志至少为 info，避免 RUST_LOG=warn 把交互日志过滤掉。
    let env = std::env::var("RUST_LOG").unwrap_or_default();
    let env = env.trim();
    let filter = if env.is_empty() {
        EnvFilter::new("warn,llm_gateway=info")
    } else if env.contains("llm_gateway") {
        EnvFilter::new(env)
    } else {
        EnvFilter::new(format!("{env},llm_gateway=info"))
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_level(true);

    let _ = if cfg.json_logs() {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::warn!("注册 SIGTERM 监听失败: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("收到退出信号，准备关闭服务...");
}
