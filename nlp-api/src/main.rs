//! nlp-api - Named-entity annotation service for court decisions
//!
//! Loads the entity model once, then serves `POST /ner` on a single
//! analysis slot until SIGINT or SIGTERM.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use nlp_common::config::{load_config_layer, resolve_service_config, LogFormat, Overrides};
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use nlp_api::api::request_log::OPERATION_NAME;
use nlp_api::pipeline::{stages::PostProcessors, Pipeline};
use nlp_api::tagger::{load_entity_model, RuleTokenizer, Tagger};
use nlp_api::{build_router, AppState};

/// Command-line arguments for nlp-api
#[derive(Parser, Debug)]
#[command(name = "nlp-api")]
#[command(about = "Named-entity annotation service for court decisions")]
#[command(version)]
struct Args {
    /// Address to bind
    #[arg(short, long, env = "NLP_API_ADDRESS")]
    address: Option<String>,

    /// Port to listen on
    #[arg(short, long, env = "NLP_API_PORT")]
    port: Option<u16>,

    /// Log level or EnvFilter directive
    #[arg(short, long, env = "NLP_API_LOG_LEVEL")]
    log_level: Option<String>,

    /// Log line format (text or json)
    #[arg(long, env = "NLP_API_LOG_FORMAT")]
    log_format: Option<LogFormat>,

    /// Entity model: ONNX directory or lexicon JSON file
    #[arg(short, long, env = "MODEL")]
    model: Option<PathBuf>,

    /// TOML configuration file
    #[arg(short, long, env = "NLP_API_CONFIG")]
    config: Option<PathBuf>,

    /// Largest request body accepted, in bytes
    #[arg(long, env = "NLP_API_MAX_BODY_BYTES")]
    max_body_bytes: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Config is resolved before tracing exists; its own log lines are lost
    let toml = load_config_layer(args.config.as_deref())?;
    let overrides = Overrides {
        model: args.model,
        address: args.address,
        port: args.port,
        log_level: args.log_level,
        log_format: args.log_format,
        max_body_bytes: args.max_body_bytes,
    };
    let config = resolve_service_config(&overrides, &toml)?;

    let filter = EnvFilter::try_new(&config.log_level)
        .with_context(|| format!("Invalid log level '{}'", config.log_level))?;
    match config.log_format {
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
        LogFormat::Json => tracing_subscriber::fmt().json().with_env_filter(filter).init(),
    }

    info!(
        operation_name = OPERATION_NAME,
        "Starting server nlp-api v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );

    info!("Loading entity model from {}", config.model_path.display());
    let model = match load_entity_model(&config.model_path) {
        Ok(model) => model,
        Err(e) => {
            error!("Failed to load entity model: {}", e);
            return Err(e).context("Entity model unavailable");
        }
    };

    let tagger = Tagger::new(Arc::new(RuleTokenizer::new()), model);
    let pipeline = Pipeline::new(tagger, PostProcessors::standard());
    let state = AppState::new(pipeline).with_max_body_bytes(config.max_body_bytes);
    let app = build_router(state);

    let addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    info!("nlp-api listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!(operation_name = OPERATION_NAME, "Shutting down server");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
