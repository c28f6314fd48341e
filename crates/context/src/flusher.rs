//! Background AOF flusher.
//!
//! With write-through off, appends sit in each session's increment buffer
//! until this loop drains them. Shutdown runs one last flush and waits for
//! the loop to exit, bounded by a timeout.

use roundclaw_config::SessionSettings;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::store::ContextStore;

pub struct AofFlusher {
    store: Arc<ContextStore>,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
    shutdown_timeout: Duration,
}

impl AofFlusher {
    /// Start a flusher for a store opened with `settings`.
    ///
    /// Returns `None` in write-through mode, where there is nothing to drain.
    pub fn from_config(store: Arc<ContextStore>, settings: &SessionSettings) -> Option<Self> {
        if settings.aof_write_through {
            return None;
        }
        Some(Self::spawn(
            store,
            Duration::from_secs(settings.flush_interval_secs.max(1)),
            Duration::from_secs(settings.shutdown_timeout_secs),
        ))
    }

    /// Start the flush loop. The first tick fires after one full `interval`.
    pub fn spawn(store: Arc<ContextStore>, interval: Duration, shutdown_timeout: Duration) -> Self {
        let cancel = CancellationToken::new();
        let loop_store = Arc::clone(&store);
        let loop_cancel = cancel.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            loop {
                tokio::select! {
                    _ = loop_cancel.cancelled() => {
                        debug!("AOF flusher stopping");
                        return;
                    }
                    _ = ticker.tick() => {
                        match loop_store.flush_all().await {
                            Ok(0) => {}
                            Ok(n) => debug!(entries = n, "AOF flushed"),
                            Err(e) => warn!(error = %e, "Periodic AOF flush failed"),
                        }
                    }
                }
            }
        });

        info!(interval_secs = interval.as_secs(), "AOF flusher started");
        Self {
            store,
            cancel,
            handle,
            shutdown_timeout,
        }
    }

    /// Stop the loop and flush whatever is still buffered.
    ///
    /// Returns the number of entries written by the final flush.
    pub async fn shutdown(self) -> usize {
        self.cancel.cancel();
        if tokio::time::timeout(self.shutdown_timeout, self.handle).await.is_err() {
            warn!(timeout_secs = self.shutdown_timeout.as_secs(), "AOF flusher did not stop in time");
        }

        match tokio::time::timeout(self.shutdown_timeout, self.store.flush_all()).await {
            Ok(Ok(n)) => {
                info!(entries = n, "Final AOF flush done");
                n
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Final AOF flush failed");
                0
            }
            Err(_) => {
                warn!("Final AOF flush timed out");
                0
            }
        }
    }
}
