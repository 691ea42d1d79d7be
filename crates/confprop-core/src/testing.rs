//! Recording test doubles for the capability traits.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::{
    ConfigKey, ErrorReport, ErrorReporter, Notifier, NotifyError, RegistrationEvent,
    RegistrationHandler, Result, ScheduleRefresher,
};

/// Notifier that records every call and fails the first `failures` of them.
#[derive(Default)]
pub struct RecordingNotifier {
    calls: Mutex<Vec<Vec<ConfigKey>>>,
    failures: AtomicUsize,
    delay: Option<Duration>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(failures: usize) -> Self {
        Self {
            failures: AtomicUsize::new(failures),
            ..Self::default()
        }
    }

    /// Every call sleeps for `delay` before answering.
    pub fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<Vec<ConfigKey>> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, keys: &[ConfigKey]) -> std::result::Result<(), NotifyError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.calls.lock().push(keys.to_vec());
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(NotifyError::failed("injected failure"));
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingReporter {
    reports: Mutex<Vec<ErrorReport>>,
}

impl RecordingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reports(&self) -> Vec<ErrorReport> {
        self.reports.lock().clone()
    }
}

#[async_trait]
impl ErrorReporter for RecordingReporter {
    async fn publish(&self, report: ErrorReport) {
        self.reports.lock().push(report);
    }
}

#[derive(Default)]
pub struct RecordingRegistrationHandler {
    events: Mutex<Vec<RegistrationEvent>>,
}

impl RecordingRegistrationHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<RegistrationEvent> {
        self.events.lock().clone()
    }
}

#[async_trait]
impl RegistrationHandler for RecordingRegistrationHandler {
    async fn handle(&self, event: &RegistrationEvent) -> Result<String> {
        self.events.lock().push(event.clone());
        Ok(format!("recorded {}", event.source_account_id))
    }
}

#[derive(Default)]
pub struct RecordingRefresher {
    calls: Mutex<Vec<BTreeSet<String>>>,
}

impl RecordingRefresher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<BTreeSet<String>> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl ScheduleRefresher for RecordingRefresher {
    async fn refresh(&self, schedule_names: &BTreeSet<String>) -> std::result::Result<(), NotifyError> {
        self.calls.lock().push(schedule_names.clone());
        Ok(())
    }
}
