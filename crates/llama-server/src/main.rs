use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use llama_runtime::{EngineConfig, NativeEngine, TracingTelemetry};
use llama_server::{run_server, AppState, ServerConfig};
use tracing_subscriber::EnvFilter;

/// HTTP server for llama-textgen sessions
#[derive(Parser)]
#[command(name = "llama-server")]
struct Cli {
    /// Address to bind.
    #[arg(long, default_value = "127.0.0.1:8080")]
    bind: SocketAddr,

    /// Model used when a session request names none.
    #[arg(short, long)]
    model: Option<PathBuf>,

    /// Default context window of new sessions.
    #[arg(long, default_value_t = 2048)]
    ctx_size: usize,

    /// Default batch size of new sessions.
    #[arg(long, default_value_t = 4096)]
    batch_size: usize,

    /// Maximum concurrent engine calls.
    #[arg(long, default_value_t = 64)]
    max_concurrent: usize,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let engine = Arc::new(NativeEngine::new(
        EngineConfig::default().with_telemetry(TracingTelemetry),
    ));
    let config = ServerConfig {
        default_model: cli.model,
        default_context_size: cli.ctx_size,
        default_batch_size: cli.batch_size,
        max_concurrent_calls: cli.max_concurrent,
    };

    run_server(AppState::new(engine, config), cli.bind).await?;
    Ok(())
}
