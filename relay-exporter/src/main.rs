// rtl433 Relay Exporter - Prometheus scrape target for rtl_433 events
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! # rtl433 Relay Exporter
//!
//! Reads rtl_433 JSON events and serves them as Prometheus metrics.
//!
//! ## Usage
//!
//! ```bash
//! # Pipe rtl_433 output in
//! rtl_433 -F json | rtl433-relay-exporter
//!
//! # Listen for syslog datagrams (rtl_433 -F syslog:127.0.0.1:4433)
//! rtl433-relay-exporter --udp 4433 --port 9100
//!
//! # Load settings from a file, override one of them
//! rtl433-relay-exporter --config relay.json --max-age 600
//! ```

mod metrics;
mod pipeline;
mod server;

use clap::Parser;
use pipeline::{Pipeline, PipelineConfig, PipelineError};
use rtl433_relay::{RelayConfig, RelayError, RepeatPolicy, DEFAULT_PORT};
use server::{router, AppState};
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, Level};
use tracing_subscriber::EnvFilter;

/// rtl_433 to Prometheus relay
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Port to serve metrics on
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Address to bind the HTTP server and syslog listeners to
    #[arg(short, long, default_value_t = pipeline::DEFAULT_BIND_IP)]
    bind: IpAddr,

    /// Listen for rtl_433 syslog datagrams on this UDP port (repeatable).
    /// Without it, JSON lines are read from stdin.
    #[arg(short, long = "udp")]
    udp: Vec<u16>,

    /// JSON file with relay settings
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Forget readings older than this many seconds
    #[arg(long)]
    max_age: Option<f64>,

    /// Render every reading younger than this many seconds
    #[arg(long)]
    backlog: Option<f64>,

    /// Minimum repeat interval for the novelty filter, in seconds
    #[arg(long)]
    min_repeat: Option<f64>,

    /// Novelty filter policy (retain_always, retain_after_interval, confirm_repeat)
    #[arg(long, value_parser = parse_policy)]
    repeat_policy: Option<RepeatPolicy>,

    /// Leave timestamps off rendered samples
    #[arg(long)]
    no_timestamps: bool,

    /// Compact the log every this many lines
    #[arg(long)]
    clean_interval: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn parse_policy(value: &str) -> Result<RepeatPolicy, String> {
    serde_json::from_value(serde_json::Value::String(value.to_string()))
        .map_err(|_| format!("unknown repeat policy '{}'", value))
}

impl Args {
    /// Settings file first, then command-line overrides.
    fn relay_config(&self) -> Result<RelayConfig, RelayError> {
        let mut config = match &self.config {
            Some(path) => RelayConfig::from_json(&std::fs::read_to_string(path)?)?,
            None => RelayConfig::default(),
        };

        if let Some(max_age) = self.max_age {
            config.max_age_secs = max_age;
        }
        if let Some(backlog) = self.backlog {
            config.backlog_secs = backlog;
        }
        if let Some(min_repeat) = self.min_repeat {
            config.min_repeat_secs = min_repeat;
        }
        if let Some(policy) = self.repeat_policy {
            config.repeat_policy = policy;
        }
        if self.no_timestamps {
            config.export_timestamps = false;
        }
        if let Some(interval) = self.clean_interval {
            config.clean_interval = interval;
        }

        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = match args.log_level.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "info" => Level::INFO,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        };
        EnvFilter::from_default_env().add_directive(level.into())
    });

    // Stdout is left alone; rtl_433 may be piped through us.
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    info!("rtl433 Relay Exporter v{}", env!("CARGO_PKG_VERSION"));

    let relay = match args.relay_config() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            std::process::exit(2);
        }
    };
    info!(
        max_age_secs = relay.max_age_secs,
        backlog_secs = relay.backlog_secs,
        policy = relay.repeat_policy.as_str(),
        "relay configured"
    );

    if let Err(e) = run(&args, relay).await {
        error!("{}", e);
        std::process::exit(1);
    }
}

async fn run(args: &Args, relay: RelayConfig) -> Result<(), PipelineError> {
    metrics::register_all();

    let pipeline = Pipeline::start(PipelineConfig {
        relay: relay.clone(),
        sources: PipelineConfig::sources_for(args.bind, &args.udp),
        ..Default::default()
    })?;

    let state = Arc::new(AppState::new(&pipeline, relay));
    let app = router(state);

    let addr = SocketAddr::new(args.bind, args.port);
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| PipelineError::Bind(addr, e))?;
    info!("Starting server on http://{}", addr);
    info!("Metrics endpoint: http://{}/metrics", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(pipeline))
        .await?;

    info!("Server stopped");
    Ok(())
}

/// Stop on ctrl-c, or once every source has closed.
async fn shutdown_signal(pipeline: Pipeline) {
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                error!("Cannot listen for ctrl-c: {}", e);
            }
            info!("Interrupted, shutting down");
        }
        _ = pipeline.finished() => {
            info!("All sources closed, shutting down");
        }
    }
}
