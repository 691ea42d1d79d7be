//! Change stream dispatcher.
//!
//! Consumes the configuration store's change log, keeps only schedule/period
//! inserts and modifications, coalesces them inside a bounded window and
//! hands each closed batch's keys to the notifier exactly once.
//!
//! # Delivery model
//!
//! - No in-process retry: a failed batch is reported and dropped; upstream
//!   redelivery of unacknowledged records is the retry.
//! - The notifier receives keys, not deltas, so duplicates are harmless.
//! - Batches are dispatched sequentially by the owning task, which keeps
//!   per-key sequence order across batches.
//! - The open batch lives only in this value. Cancellation drops it.

use std::sync::Arc;
use std::time::Duration;

use confprop_core::{
    ChangeRecord, ErrorReport, ErrorReporter, Notifier, NotifyError, StreamConfig,
};
use futures::{Stream, StreamExt};
use metrics::{counter, histogram};
use tokio::time::{sleep_until, timeout, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::window::{BatchWindow, ClosedBatch, Offer, WindowSpec};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatcherConfig {
    pub window: WindowSpec,
    /// Bound on one notifier call
    pub notify_timeout: Duration,
}

impl DispatcherConfig {
    pub fn from_config(config: &StreamConfig) -> Self {
        Self {
            window: WindowSpec::from_config(config),
            notify_timeout: config.notify_timeout(),
        }
    }
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self::from_config(&StreamConfig::default())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Delivered {
        batch_id: Uuid,
        records: usize,
        keys: usize,
    },
    Failed {
        batch_id: Uuid,
        records: usize,
        error: NotifyError,
    },
}

impl DispatchOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, DispatchOutcome::Delivered { .. })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub received: u64,
    pub filtered_out: u64,
    pub accepted: u64,
    pub batches_dispatched: u64,
    pub batches_failed: u64,
}

pub struct ChangeStreamDispatcher {
    window: BatchWindow,
    notifier: Arc<dyn Notifier>,
    reporter: Arc<dyn ErrorReporter>,
    notify_timeout: Duration,
    stats: DispatchStats,
}

impl ChangeStreamDispatcher {
    pub fn new(
        config: DispatcherConfig,
        notifier: Arc<dyn Notifier>,
        reporter: Arc<dyn ErrorReporter>,
    ) -> Self {
        Self {
            window: BatchWindow::new(config.window),
            notifier,
            reporter,
            notify_timeout: config.notify_timeout,
            stats: DispatchStats::default(),
        }
    }

    pub fn stats(&self) -> &DispatchStats {
        &self.stats
    }

    /// Records waiting in the open batch.
    pub fn pending(&self) -> usize {
        self.window.len()
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.window.deadline()
    }

    /// Entry point for one delivered change record. Returns the outcome of
    /// every batch the record caused to close.
    pub async fn on_change_record(&mut self, record: ChangeRecord) -> Vec<DispatchOutcome> {
        self.stats.received += 1;
        counter!("confprop_records_received").increment(1);

        match self.window.offer(record, Instant::now()) {
            Offer::FilteredOut => {
                self.stats.filtered_out += 1;
                counter!("confprop_records_filtered").increment(1);
                Vec::new()
            }
            Offer::Buffered => {
                self.stats.accepted += 1;
                Vec::new()
            }
            Offer::Closed(closed) => {
                self.stats.accepted += 1;
                let mut outcomes = Vec::with_capacity(closed.len());
                for batch in closed {
                    outcomes.push(self.dispatch(batch).await);
                }
                outcomes
            }
        }
    }

    /// Dispatch the open batch if its window has elapsed.
    pub async fn poll(&mut self) -> Option<DispatchOutcome> {
        let closed = self.window.poll_expired(Instant::now())?;
        Some(self.dispatch(closed).await)
    }

    /// Dispatch the open batch regardless of its window.
    pub async fn flush(&mut self) -> Option<DispatchOutcome> {
        let closed = self.window.flush()?;
        Some(self.dispatch(closed).await)
    }

    /// Drop the open batch without dispatching it.
    pub fn abandon(&mut self) -> usize {
        self.window.reset()
    }

    /// Drive the dispatcher from a record stream until the stream ends or
    /// `shutdown` fires. Stream end flushes the open batch; shutdown drops it.
    pub async fn run<S>(mut self, records: S, shutdown: CancellationToken) -> DispatchStats
    where
        S: Stream<Item = ChangeRecord> + Send,
    {
        futures::pin_mut!(records);
        info!("change stream dispatcher started");

        loop {
            let deadline = self.window.deadline();
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    let dropped = self.abandon();
                    if dropped > 0 {
                        warn!(dropped, "dispatcher stopped with an open batch; records rely on upstream redelivery");
                    }
                    break;
                }
                _ = wait_until(deadline) => {
                    self.poll().await;
                }
                next = records.next() => match next {
                    Some(record) => {
                        self.on_change_record(record).await;
                    }
                    None => {
                        self.flush().await;
                        break;
                    }
                }
            }
        }

        info!(
            received = self.stats.received,
            dispatched = self.stats.batches_dispatched,
            failed = self.stats.batches_failed,
            "change stream dispatcher stopped"
        );
        self.stats
    }

    async fn dispatch(&mut self, closed: ClosedBatch) -> DispatchOutcome {
        let span = info_span!(
            "dispatch",
            batch_id = %closed.batch.batch_id,
            records = closed.batch.len(),
            reason = ?closed.reason,
        );
        let outcome = deliver(
            self.notifier.as_ref(),
            self.reporter.as_ref(),
            self.notify_timeout,
            closed,
        )
        .instrument(span)
        .await;

        if outcome.is_delivered() {
            self.stats.batches_dispatched += 1;
            counter!("confprop_batches_dispatched").increment(1);
        } else {
            self.stats.batches_failed += 1;
            counter!("confprop_batches_failed").increment(1);
        }
        outcome
    }
}

async fn deliver(
    notifier: &dyn Notifier,
    reporter: &dyn ErrorReporter,
    notify_timeout: Duration,
    closed: ClosedBatch,
) -> DispatchOutcome {
    let batch = closed.batch;
    let keys = batch.keys();
    let start = std::time::Instant::now();
    histogram!("confprop_batch_size").record(batch.len() as f64);
    debug!(keys = keys.len(), "notifying downstream");

    let result = match timeout(notify_timeout, notifier.notify(&keys)).await {
        Ok(result) => result,
        Err(_) => Err(NotifyError::Timeout(notify_timeout)),
    };
    histogram!("confprop_dispatch_seconds").record(start.elapsed());

    match result {
        Ok(()) => {
            info!(keys = keys.len(), "batch delivered");
            DispatchOutcome::Delivered {
                batch_id: batch.batch_id,
                records: batch.len(),
                keys: keys.len(),
            }
        }
        Err(err) => {
            error!("batch delivery failed: {}", err);
            let (batch_id, records) = (batch.batch_id, batch.len());
            reporter.publish(ErrorReport::batch_failure(batch, &err)).await;
            DispatchOutcome::Failed {
                batch_id,
                records,
                error: err,
            }
        }
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
