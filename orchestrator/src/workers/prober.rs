//! Periodic connectivity prober

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::cache::NodeStatusCache;
use crate::probe::{probe_many, ConnectivityProbe};
use crate::registry::NodeRegistry;

/// Prober worker options
#[derive(Debug, Clone)]
pub struct Options {
    /// Probe interval
    pub interval: Duration,

    /// Initial delay before first probe
    pub initial_delay: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            initial_delay: Duration::from_secs(5),
        }
    }
}

/// Run the prober worker
pub async fn run<S, F>(
    options: &Options,
    nodes: Arc<dyn NodeRegistry>,
    probe: Arc<dyn ConnectivityProbe>,
    cache: Arc<NodeStatusCache>,
    sleep_fn: S,
    mut shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
) where
    S: Fn(Duration) -> F,
    F: Future<Output = ()>,
{
    info!("Prober worker starting...");

    tokio::select! {
        _ = &mut shutdown_signal => {
            info!("Prober worker shutting down...");
            return;
        }
        _ = sleep_fn(options.initial_delay) => {}
    }

    loop {
        let targets = nodes.list_nodes().await;
        if !targets.is_empty() {
            let reports = tokio::select! {
                _ = &mut shutdown_signal => {
                    info!("Prober worker shutting down...");
                    return;
                }
                reports = probe_many(Arc::clone(&probe), targets) => reports,
            };
            debug!("Recorded {} probe reports", reports.len());
            cache.record_all(reports);
        }

        tokio::select! {
            _ = &mut shutdown_signal => {
                info!("Prober worker shutting down...");
                return;
            }
            _ = sleep_fn(options.interval) => {}
        }
    }
}
