// rtl433 Relay Exporter - Ingestion pipeline
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Ingestion pipeline: line sources, funnel and the aggregator thread.
//!
//! Sources and the aggregator run on plain OS threads since they block on
//! I/O. The HTTP side only gets read handles.

use rtl433_relay::source::{spawn_stdin, spawn_syslog};
use rtl433_relay::{
    Aggregator, ConfigError, Funnel, IngestStats, Line, LogReader, MetricsRenderer, RelayConfig,
};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use tokio::sync::oneshot;
use tracing::{info, warn};

/// Where lines come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceSpec {
    /// JSON lines on stdin (`rtl_433 -F json | ...`).
    Stdin,
    /// Syslog datagrams (`rtl_433 -F syslog:host:port`).
    Syslog(SocketAddr),
}

impl std::fmt::Display for SourceSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceSpec::Stdin => f.write_str("stdin"),
            SourceSpec::Syslog(addr) => write!(f, "udp://{}", addr),
        }
    }
}

/// Configuration for the ingestion pipeline.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub relay: RelayConfig,
    pub sources: Vec<SourceSpec>,
    /// Funnel capacity in lines.
    pub funnel_capacity: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            relay: RelayConfig::default(),
            sources: vec![SourceSpec::Stdin],
            funnel_capacity: rtl433_relay::source::DEFAULT_FUNNEL_CAPACITY,
        }
    }
}

impl PipelineConfig {
    /// Sources for a list of UDP ports; stdin if the list is empty.
    pub fn sources_for(bind_ip: IpAddr, udp_ports: &[u16]) -> Vec<SourceSpec> {
        if udp_ports.is_empty() {
            vec![SourceSpec::Stdin]
        } else {
            udp_ports
                .iter()
                .map(|port| SourceSpec::Syslog(SocketAddr::new(bind_ip, *port)))
                .collect()
        }
    }
}

/// Default address for syslog listeners.
pub const DEFAULT_BIND_IP: IpAddr = IpAddr::V4(Ipv4Addr::UNSPECIFIED);

/// State of the ingestion thread.
#[derive(Debug)]
pub struct PipelineState {
    /// Whether the aggregator is still consuming lines.
    pub running: AtomicBool,
    /// Human-readable source descriptions.
    pub sources: Vec<String>,
}

/// Running ingestion pipeline.
pub struct Pipeline {
    pub reader: LogReader,
    pub renderer: MetricsRenderer,
    pub stats: Arc<IngestStats>,
    pub state: Arc<PipelineState>,
    finished: oneshot::Receiver<()>,
}

impl Pipeline {
    /// Open every source and start the aggregator thread.
    pub fn start(config: PipelineConfig) -> Result<Self, PipelineError> {
        let aggregator = Aggregator::new(config.relay)?;
        let funnel = Funnel::new(config.funnel_capacity);

        for source in &config.sources {
            match source {
                SourceSpec::Stdin => {
                    spawn_stdin(funnel.sender())?;
                }
                SourceSpec::Syslog(addr) => {
                    spawn_syslog(*addr, funnel.sender())
                        .map_err(|e| PipelineError::Bind(*addr, e))?;
                }
            }
        }

        let names = config.sources.iter().map(ToString::to_string).collect();
        Self::spawn(aggregator, funnel.into_lines(), names)
    }

    /// Run `aggregator` over `lines` on a dedicated thread.
    pub fn spawn<I>(
        mut aggregator: Aggregator,
        lines: I,
        sources: Vec<String>,
    ) -> Result<Self, PipelineError>
    where
        I: Iterator<Item = Line> + Send + 'static,
    {
        let state = Arc::new(PipelineState {
            running: AtomicBool::new(true),
            sources,
        });
        let reader = aggregator.reader();
        let renderer = aggregator.renderer();
        let stats = aggregator.stats();
        let (done_tx, finished) = oneshot::channel();

        let thread_state = Arc::clone(&state);
        thread::Builder::new()
            .name("ingest".to_string())
            .spawn(move || {
                info!(sources = ?thread_state.sources, "ingestion started");
                aggregator.run(lines);
                thread_state.running.store(false, Ordering::SeqCst);
                info!("ingestion finished");
                if done_tx.send(()).is_err() {
                    warn!("nobody waiting for ingestion to finish");
                }
            })?;

        Ok(Self {
            reader,
            renderer,
            stats,
            state,
            finished,
        })
    }

    /// Resolves once every source is exhausted.
    pub async fn finished(self) {
        // A dropped sender also means the thread is gone.
        let _ = self.finished.await;
    }
}

/// Pipeline startup errors.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Invalid relay configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Cannot listen on {0}: {1}")]
    Bind(SocketAddr, std::io::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
