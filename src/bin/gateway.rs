//! Hive Gateway - WebSocket 回复服务
//!
//! 运行方式：
//! ```bash
//! cargo run --bin hive-gateway --features gateway
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use hive::config::load_config;
use hive::core::{serve_until_shutdown, ReplyDrain, ShutdownManager};
use hive::gateway::Gateway;
use hive::llm::create_model;
use hive::memory::{InMemoryStore, MessageStore, SqliteStore};
use hive::observability;
use hive::tools::{ToolExecutor, ToolRegistry};
use hive::ReplyOrchestrator;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let cfg = load_config(config_path)?;
    observability::init_with_level(&cfg.app.log_level);

    let store: Arc<dyn MessageStore> = match &cfg.store.sqlite_path {
        Some(path) => {
            tracing::info!(path = %path.display(), "using sqlite message store");
            Arc::new(SqliteStore::new(path).await?)
        }
        None => {
            tracing::info!("using in-memory message store");
            Arc::new(InMemoryStore::new())
        }
    };

    let model = create_model(&cfg.llm);
    let tools = ToolExecutor::new(ToolRegistry::new(), cfg.tools.tool_timeout_secs);
    let shutdown = Arc::new(ShutdownManager::new());

    let orchestrator = Arc::new(
        ReplyOrchestrator::new(model, store, cfg.reply.clone())
            .with_tools(tools)
            .with_shutdown(Arc::clone(&shutdown)),
    );

    let gateway = Gateway::new(cfg.gateway.bind_addr.clone(), Arc::clone(&orchestrator));
    let listener = gateway.bind().await?;
    tracing::info!("Starting Hive gateway on ws://{}", cfg.gateway.bind_addr);
    tracing::info!("Press Ctrl+C to stop");

    let drain = ReplyDrain::new(Arc::clone(orchestrator.registry()), Duration::from_secs(10));
    if !serve_until_shutdown(Arc::clone(&shutdown), gateway.serve(listener), drain).await {
        tracing::warn!("exiting with unfinished replies");
    }

    Ok(())
}
