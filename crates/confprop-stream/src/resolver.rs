use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use confprop_core::{ConfigKey, EntityType, Notifier, NotifyError, ScheduleIndex, ScheduleRefresher};
use tracing::{debug, error};

/// Notifier adapter that turns changed keys into the set of schedules to refresh.
///
/// Schedule keys pass through. A period key expands to every schedule that
/// references the period; a failed lookup is logged and skipped so the rest
/// of the batch still propagates. Account keys carry no schedule.
pub struct ScheduleResolvingNotifier {
    index: Arc<dyn ScheduleIndex>,
    refresher: Arc<dyn ScheduleRefresher>,
}

impl ScheduleResolvingNotifier {
    pub fn new(index: Arc<dyn ScheduleIndex>, refresher: Arc<dyn ScheduleRefresher>) -> Self {
        Self { index, refresher }
    }

    pub async fn resolve(&self, keys: &[ConfigKey]) -> BTreeSet<String> {
        let mut names = BTreeSet::new();
        for key in keys {
            match key.entity_type {
                EntityType::Schedule => {
                    names.insert(key.name.clone());
                }
                // TODO: resolve all period keys of a batch in one index scan
                EntityType::Period => match self.index.find_by_period(&key.name).await {
                    Ok(schedules) => names.extend(schedules.into_iter().map(|s| s.name)),
                    Err(e) => error!(
                        "Unable to determine schedules to update based on period {}: {}",
                        key.name, e
                    ),
                },
                EntityType::Account => {}
            }
        }
        names
    }
}

#[async_trait]
impl Notifier for ScheduleResolvingNotifier {
    async fn notify(&self, keys: &[ConfigKey]) -> Result<(), NotifyError> {
        let names = self.resolve(keys).await;
        if names.is_empty() {
            debug!("no schedules affected by {} changed keys", keys.len());
            return Ok(());
        }
        debug!(schedules = ?names, "refreshing schedules");
        self.refresher.refresh(&names).await
    }
}
