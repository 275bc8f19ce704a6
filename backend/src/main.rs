//! Legal MCP server.

use anyhow::Context;
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use legal_mcp::{
    auth::AuthConfig,
    config::Config,
    create_app_with_config,
    llm::AnthropicClient,
    mcp::SessionRegistry,
    state::AppState,
    storage::{FsDocumentStore, PromptStore},
};

/// Longest pause between idle-session sweeps.
const MAX_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Legal MCP Server - document analysis tools over MCP Streamable HTTP
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Port to listen on
    #[arg(short, long, env = "PORT")]
    port: Option<u16>,

    /// Data directory holding documents/ and prompts/library.json
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Directory of PDF documents (overrides data dir)
    #[arg(long)]
    documents_path: Option<PathBuf>,

    /// Prompt library file (overrides data dir)
    #[arg(long)]
    prompts_path: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging - use RUST_LOG env var or default to info
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .compact()
        .init();

    info!("Starting Legal MCP server...");

    let config = Config::from_figment(
        args.port,
        args.data_dir,
        args.documents_path,
        args.prompts_path,
    )?;
    info!("Configuration loaded");

    let inference = AnthropicClient::from_settings(&config.inference)
        .context("Set ANTHROPIC_API_KEY or [inference] api_key")?;
    info!("Inference model: {}", config.inference.model);

    let prompts = PromptStore::new(&config.prompts_path);
    prompts
        .load()
        .await
        .with_context(|| format!("Failed to load prompt library {:?}", config.prompts_path))?;

    let state = AppState::new(
        Arc::new(FsDocumentStore::new(&config.documents_path)),
        prompts,
        Arc::new(inference),
    );
    let registry = SessionRegistry::new();

    if let Some(idle) = config.session_idle_timeout {
        spawn_session_reaper(registry.clone(), idle);
    }

    let app = create_app_with_config(
        state,
        registry.clone(),
        AuthConfig::new(config.api_key.clone()),
        config.allowed_origins.clone(),
    );

    // Bind to 0.0.0.0 to be accessible from all interfaces (Docker, network, etc.)
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Server listening on {}", addr);
    info!("MCP endpoint: http://{}/mcp", addr);

    // Sessions are closed before axum drains connections, which ends their SSE streams
    let shutdown_signal = async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Received Ctrl+C, shutting down gracefully...");

        let report = registry.close_all().await;
        for (id, e) in &report.failed {
            warn!("Session {} did not close cleanly: {}", id, e);
        }
        info!("Server shutting down");
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await?;

    Ok(())
}

/// Periodically close sessions idle longer than `idle`.
fn spawn_session_reaper(registry: SessionRegistry, idle: Duration) {
    info!("Closing MCP sessions idle for more than {}s", idle.as_secs());
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(idle.min(MAX_SWEEP_INTERVAL));
        loop {
            interval.tick().await;
            let closed = registry.cleanup_stale(idle).await;
            if closed > 0 {
                info!("Closed {} idle MCP sessions", closed);
            }
        }
    });
}
