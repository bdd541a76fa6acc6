//! # parley
//!
//! Chat relay binary: serves the WebSocket relay, or connects to one as an
//! interactive terminal client.

#![deny(unsafe_code)]

mod chat;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::Level;

use parley_llm::{BoundedGenerator, OllamaGenerator};
use parley_server::ServerConfig;
use parley_settings::{load_settings, LogFormat, ParleySettings};
use parley_telemetry::{init_telemetry, install_recorder, parse_level, TelemetryConfig};

/// WebSocket chat relay with generated reply suggestions.
#[derive(Parser, Debug)]
#[command(name = "parley", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the relay server (default).
    Serve(ServeArgs),

    /// Connect to a relay as an interactive terminal client.
    Chat {
        /// WebSocket endpoint of the relay.
        #[arg(long, default_value = "ws://localhost:8888/ws")]
        url: String,
    },

    /// Print the effective settings (defaults + environment) as JSON.
    ShowConfig,
}

/// Flags that override settings from the environment.
#[derive(Args, Debug, Default)]
struct ServeArgs {
    /// Host to bind.
    #[arg(long)]
    host: Option<String>,

    /// Port to bind (0 for auto-assign).
    #[arg(long)]
    port: Option<u16>,

    /// Base URL of the text-generation backend.
    #[arg(long)]
    backend_url: Option<String>,

    /// Model identifier sent with every generation request.
    #[arg(long)]
    model: Option<String>,

    /// Upper bound on one generation request, in milliseconds.
    #[arg(long)]
    generation_timeout_ms: Option<u64>,

    /// Emit logs as JSON lines.
    #[arg(long)]
    json_logs: bool,
}

impl ServeArgs {
    fn apply(&self, settings: &mut ParleySettings) {
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(url) = &self.backend_url {
            settings.generation.backend_url.clone_from(url);
        }
        if let Some(model) = &self.model {
            settings.generation.model.clone_from(model);
        }
        if let Some(timeout_ms) = self.generation_timeout_ms {
            settings.generation.timeout_ms = timeout_ms;
        }
        if self.json_logs {
            settings.logging.format = LogFormat::Json;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command.unwrap_or_else(|| Command::Serve(ServeArgs::default())) {
        Command::Serve(args) => serve(args).await,
        Command::Chat { url } => {
            // stdout belongs to the conversation
            init_telemetry(&TelemetryConfig {
                log_level: Level::WARN,
                to_stderr: true,
                ..Default::default()
            })
            .context("failed to initialize logging")?;
            chat::run(&url).await
        }
        Command::ShowConfig => {
            let settings = load_settings().context("invalid settings")?;
            println!("{}", serde_json::to_string_pretty(&settings)?);
            Ok(())
        }
    }
}

async fn serve(args: ServeArgs) -> Result<()> {
    let mut settings = load_settings().context("invalid settings")?;
    args.apply(&mut settings);
    settings.validate().context("invalid settings")?;

    init_telemetry(&TelemetryConfig {
        log_level: parse_level(&settings.logging.level),
        json: settings.logging.format == LogFormat::Json,
        ..Default::default()
    })
    .context("failed to initialize logging")?;

    let metrics = match install_recorder() {
        Ok(handle) => Some(handle),
        Err(e) => {
            tracing::warn!(error = %e, "metrics disabled");
            None
        }
    };

    let backend = OllamaGenerator::new(
        settings.generation.backend_url.as_str(),
        settings.generation.model.as_str(),
    )
    .context("failed to build backend client")?;
    let generator = Arc::new(BoundedGenerator::new(backend, settings.generation.timeout()));

    let config = ServerConfig::from(&settings);
    let addr = format!("{}:{}", config.host, config.port);
    let handle = parley_server::start(config, generator, metrics)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    tracing::info!(
        port = handle.port,
        backend = %settings.generation.backend_url,
        model = %settings.generation.model,
        timeout_ms = settings.generation.timeout_ms,
        "parley ready"
    );

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl+c")?;

    tracing::info!("shutting down");
    handle.shutdown().await;
    Ok(())
}
