//! Agent-likeness detection engine for the Hivetrap honeypot
//!
//! Accepts request events from the honeypot's wildcard route over a Unix
//! socket (newline-delimited JSON) and analyzes them fire-and-forget.

use anyhow::Result;
use clap::Parser;
use hivetrap_agent_detection::store::{DetectionStore, MemoryStore, PostgresStore};
use hivetrap_agent_detection::{
    AgentDetectionConfig, AnalysisQueue, HoneypotAnalyzer, RawRequest,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::UnixListener;
use tracing::{debug, error, info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "hivetrap-agent-detection")]
#[command(author, version, about = "Agent-likeness detection engine for the Hivetrap honeypot")]
struct Args {
    /// Unix socket path the honeypot route ships request events to
    #[arg(short, long, default_value = "/tmp/hivetrap-agent-detection.sock")]
    socket: PathBuf,

    /// Path to configuration file (JSON or YAML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable JSON logging format
    #[arg(long)]
    json_logs: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn init_logging(json: bool, level: &str) {
    let level = match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let env_filter = EnvFilter::from_default_env().add_directive(level.into());

    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer())
            .init();
    }
}

/// Store endpoint from the environment; never carried in the config file.
fn store_url() -> Option<String> {
    std::env::var("HIVETRAP_STORE_URL")
        .or_else(|_| std::env::var("DATABASE_URL"))
        .ok()
        .filter(|url| !url.is_empty())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(args.json_logs, &args.log_level);

    // Load configuration
    let config: AgentDetectionConfig = if let Some(config_path) = &args.config {
        let content = std::fs::read_to_string(config_path)?;
        if config_path
            .extension()
            .is_some_and(|e| e == "yaml" || e == "yml")
        {
            serde_yaml::from_str(&content)?
        } else {
            serde_json::from_str(&content)?
        }
    } else {
        AgentDetectionConfig::default()
    };

    let session_timeout = config.session.timeout();
    let store: Arc<dyn DetectionStore> = match store_url() {
        Some(url) => {
            let store = PostgresStore::connect(
                &url,
                session_timeout,
                config.store.max_connections,
                config.session.lookup_cache_size,
            )
            .await?;
            info!("connected to the persistent store");
            Arc::new(store)
        }
        None => {
            warn!(
                "no HIVETRAP_STORE_URL or DATABASE_URL set, running with the \
                 in-memory store (nothing survives a restart)"
            );
            Arc::new(MemoryStore::new(session_timeout))
        }
    };

    let queue_capacity = config.analysis.queue_capacity;
    let analyzer = Arc::new(HoneypotAnalyzer::new(config, store));
    let seeded = analyzer.seed_tokens().await?;
    info!(tokens = seeded, "honey token catalogue ready");

    let queue = AnalysisQueue::start(analyzer, queue_capacity);

    run_uds_server(args.socket, queue).await
}

/// Accept dispatcher connections and feed their request events into the
/// analysis queue. One JSON-encoded [`RawRequest`] per line; the dispatcher
/// never waits on an answer.
async fn run_uds_server(socket_path: PathBuf, queue: AnalysisQueue) -> Result<()> {
    // Remove existing socket file if it exists
    if socket_path.exists() {
        std::fs::remove_file(&socket_path)?;
    }

    let listener = UnixListener::bind(&socket_path)?;
    info!(socket = %socket_path.display(), "listening for honeypot request events");

    loop {
        let (stream, _) = listener.accept().await?;
        let queue = queue.clone();

        tokio::spawn(async move {
            let reader = BufReader::new(stream);
            let mut lines = reader.lines();

            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        if line.trim().is_empty() {
                            continue;
                        }
                        match serde_json::from_str::<RawRequest>(&line) {
                            Ok(raw) => queue.submit(raw),
                            Err(err) => {
                                warn!(error = %err, "undecodable request event, skipping")
                            }
                        }
                    }
                    Ok(None) => {
                        debug!("dispatcher disconnected");
                        break;
                    }
                    Err(err) => {
                        error!(error = %err, "failed to read request event");
                        break;
                    }
                }
            }
        });
    }
}
