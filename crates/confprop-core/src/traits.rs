use std::collections::BTreeSet;

use async_trait::async_trait;
use tokio::sync::mpsc::UnboundedReceiver;

use crate::{
    ChangeRecord, ConfigKey, ErrorReport, FilterPredicate, NotifyError, RegistrationEvent, Result,
    ScheduleDefinition, SequenceNumber,
};

/// Downstream capability that recomputes state for a set of changed keys.
///
/// Implementations must be idempotent: the same keys may arrive more than once.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, keys: &[ConfigKey]) -> std::result::Result<(), NotifyError>;
}

/// Publish-only sink for operator-facing failure reports. Never fails the caller.
#[async_trait]
pub trait ErrorReporter: Send + Sync {
    async fn publish(&self, report: ErrorReport);
}

/// Applies an accepted spoke registration to the configuration store.
#[async_trait]
pub trait RegistrationHandler: Send + Sync {
    async fn handle(&self, event: &RegistrationEvent) -> Result<String>;
}

/// Set-membership view of registered spoke accounts.
#[async_trait]
pub trait SpokeAccountStore: Send + Sync {
    /// Adds the ids; already present ids are left untouched. Returns the full set.
    async fn register_spoke_accounts(&self, account_ids: &BTreeSet<String>) -> Result<BTreeSet<String>>;

    /// Removes the ids; absent ids are ignored. Returns the full set.
    async fn deregister_spoke_accounts(&self, account_ids: &BTreeSet<String>) -> Result<BTreeSet<String>>;

    async fn spoke_accounts(&self) -> Result<BTreeSet<String>>;
}

#[async_trait]
pub trait ScheduleIndex: Send + Sync {
    /// Schedules whose period list references `period_name`.
    async fn find_by_period(&self, period_name: &str) -> Result<Vec<ScheduleDefinition>>;
}

/// Scheduler entry point that re-evaluates the named schedules from store state.
#[async_trait]
pub trait ScheduleRefresher: Send + Sync {
    async fn refresh(&self, schedule_names: &BTreeSet<String>) -> std::result::Result<(), NotifyError>;
}

/// Change-log contract of the configuration store.
pub trait ChangeLog: Send + Sync {
    /// Live subscription; records not matching `filter` are never delivered.
    fn subscribe(&self, filter: Option<FilterPredicate>) -> UnboundedReceiver<ChangeRecord>;

    /// Replay of retained history strictly after `after` (all history for `None`).
    fn history_since(&self, after: Option<&SequenceNumber>) -> Vec<ChangeRecord>;
}
