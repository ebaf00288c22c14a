//! MCP Host
//!
//! Entry point: reads prompts from stdin, answers on stdout, logs to stderr.

use std::sync::Arc;

use anyhow::Context;
use dotenvy::dotenv;
use mimalloc::MiMalloc;
use tokio::io::BufReader;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use mcp_host::config::{AppConfig, ConfigError};
use mcp_host::llm::{AnthropicDriver, Orchestrator};

/// Global allocator for improved performance (M-MIMALLOC-APPS).
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[tokio::main]
async fn main() {
    // Load .env (if present) before anything reads the environment.
    let _ = dotenv();

    // stdout carries the conversation, so logs go to stderr.
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let code = match run().await {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("Error: {e:#}");
            1
        }
    };

    // The blocking stdin reader can keep the runtime alive after the loop
    // ends; every child has been closed by now.
    std::process::exit(code)
}

async fn run() -> anyhow::Result<()> {
    let cfg = match AppConfig::load() {
        Ok(cfg) => cfg,
        Err(ConfigError::Cli(e)) if !e.use_stderr() => {
            e.print().context("failed to print usage")?;
            return Ok(());
        }
        Err(e) => return Err(e).context("configuration error"),
    };

    info!(
        name: "mcp.host.starting",
        config_path = %cfg.config_path,
        model = %cfg.host.model,
        follow_up_depth = cfg.host.follow_up_depth,
        collision_policy = %cfg.host.collision_policy,
        "Starting MCP host"
    );

    let cancel = CancellationToken::new();
    tokio::spawn(cancel_on_signal(cancel.clone()));

    let driver = Arc::new(AnthropicDriver::new(cfg.llm_settings()));
    let mut host = Orchestrator::load(&cfg.config_path, driver, cfg.host_options(), cancel)
        .await
        .context("failed to start MCP host")?;

    let result = host
        .run(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
        .await;

    for failure in host.shutdown().await {
        warn!(error = %failure, "Server teardown failed");
    }

    result.context("conversation loop failed")
}

/// Cancel `token` on Ctrl-C or SIGTERM.
async fn cancel_on_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }

    info!(name: "mcp.host.signal", "Shutdown signal received");
    token.cancel();
}
