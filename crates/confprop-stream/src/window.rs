//! Predicate + time/size window primitive shared by stream consumers.
//!
//! The window owns the only mutable state of a consumer: the records of the
//! open batch. Closing always moves the buffer out, so the window is empty
//! again before the closed batch is handed to anyone.

use std::mem;
use std::time::Duration;

use chrono::{DateTime, Utc};
use confprop_core::{ChangeBatch, ChangeRecord, FilterPredicate, StreamConfig};
use tokio::time::Instant;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowSpec {
    pub filter: FilterPredicate,
    pub max_window: Duration,
    pub max_batch_size: usize,
}

impl WindowSpec {
    pub fn new(filter: FilterPredicate, max_window: Duration, max_batch_size: usize) -> Self {
        Self {
            filter,
            max_window,
            max_batch_size: max_batch_size.max(1),
        }
    }

    /// Schedule/period insert+modify filter with the configured bounds.
    pub fn from_config(config: &StreamConfig) -> Self {
        Self::new(
            FilterPredicate::schedule_changes(),
            config.window(),
            config.max_batch_size,
        )
    }
}

impl Default for WindowSpec {
    fn default() -> Self {
        Self::from_config(&StreamConfig::default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Reached `max_batch_size`.
    Full,
    /// `max_window` elapsed since the first record.
    Expired,
    /// Closed on request (stream drained).
    Flushed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClosedBatch {
    pub batch: ChangeBatch,
    pub reason: CloseReason,
}

/// Result of offering one record to the window.
#[derive(Debug, Clone, PartialEq)]
pub enum Offer {
    FilteredOut,
    Buffered,
    /// The record was accepted and one or more batches closed.
    Closed(Vec<ClosedBatch>),
}

pub struct BatchWindow {
    spec: WindowSpec,
    buffer: Vec<ChangeRecord>,
    opened_at: Option<Instant>,
    opened_wall: Option<DateTime<Utc>>,
}

impl BatchWindow {
    pub fn new(spec: WindowSpec) -> Self {
        let capacity = spec.max_batch_size.min(1024);
        Self {
            spec,
            buffer: Vec::with_capacity(capacity),
            opened_at: None,
            opened_wall: None,
        }
    }

    pub fn spec(&self) -> &WindowSpec {
        &self.spec
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn admits(&self, record: &ChangeRecord) -> bool {
        self.spec.filter.matches(record)
    }

    /// Instant at which the open batch must close, if one is open.
    pub fn deadline(&self) -> Option<Instant> {
        self.opened_at.map(|t| t + self.spec.max_window)
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        self.deadline().map_or(false, |d| now >= d)
    }

    pub fn offer(&mut self, record: ChangeRecord, now: Instant) -> Offer {
        if !self.admits(&record) {
            return Offer::FilteredOut;
        }

        let mut closed = Vec::new();
        // A late arrival must not stretch an already expired batch
        if self.is_expired(now) {
            closed.extend(self.close(CloseReason::Expired));
        }

        if self.buffer.is_empty() {
            self.opened_at = Some(now);
            self.opened_wall = Some(Utc::now());
        }
        self.buffer.push(record);

        if self.buffer.len() >= self.spec.max_batch_size {
            closed.extend(self.close(CloseReason::Full));
        }

        if closed.is_empty() {
            Offer::Buffered
        } else {
            Offer::Closed(closed)
        }
    }

    pub fn poll_expired(&mut self, now: Instant) -> Option<ClosedBatch> {
        if self.is_expired(now) {
            self.close(CloseReason::Expired)
        } else {
            None
        }
    }

    pub fn flush(&mut self) -> Option<ClosedBatch> {
        self.close(CloseReason::Flushed)
    }

    /// Discard the open batch. Returns how many records were dropped.
    pub fn reset(&mut self) -> usize {
        let dropped = self.buffer.len();
        self.buffer.clear();
        self.opened_at = None;
        self.opened_wall = None;
        dropped
    }

    fn close(&mut self, reason: CloseReason) -> Option<ClosedBatch> {
        let records = mem::take(&mut self.buffer);
        self.opened_at = None;
        let window_start = self.opened_wall.take().unwrap_or_else(Utc::now);
        ChangeBatch::new(records, window_start, Utc::now()).map(|batch| ClosedBatch { batch, reason })
    }
}
