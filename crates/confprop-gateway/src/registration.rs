use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use confprop_core::{
    ErrorReport, ErrorReporter, RegistrationAction, RegistrationEvent, RegistrationHandler,
    SpokeAccountStore,
};
use tracing::{error, info};

use crate::error::{GatewayError, Result};

const ACCOUNT_ID_LEN: usize = 12;

pub fn validate_account_id(account_id: &str) -> Result<()> {
    if account_id.len() == ACCOUNT_ID_LEN && account_id.bytes().all(|b| b.is_ascii_digit()) {
        Ok(())
    } else {
        Err(GatewayError::InvalidRegistration(format!(
            "{:?} is not a valid account id",
            account_id
        )))
    }
}

/// Applies registrations as set-membership changes on the spoke account set.
///
/// Create adds, Delete removes; both are idempotent, so redelivered or
/// reordered events converge on the same set.
pub struct SpokeRegistrationHandler {
    store: Arc<dyn SpokeAccountStore>,
    reporter: Arc<dyn ErrorReporter>,
}

impl SpokeRegistrationHandler {
    pub fn new(store: Arc<dyn SpokeAccountStore>, reporter: Arc<dyn ErrorReporter>) -> Self {
        Self { store, reporter }
    }

    pub async fn apply(&self, event: &RegistrationEvent) -> Result<String> {
        match self.try_apply(event).await {
            Ok(outcome) => {
                info!("{}", outcome);
                Ok(outcome)
            }
            Err(e) => {
                error!("Error handling spoke registration request {:?}: {}", event, e);
                self.reporter
                    .publish(ErrorReport::registration_failure(event.clone(), &e))
                    .await;
                Err(e)
            }
        }
    }

    async fn try_apply(&self, event: &RegistrationEvent) -> Result<String> {
        let account_id = event.source_account_id.as_str();
        validate_account_id(account_id)?;
        let ids = BTreeSet::from([account_id.to_string()]);

        match event.action {
            RegistrationAction::Create => {
                self.store.register_spoke_accounts(&ids).await.map_err(|e| {
                    GatewayError::Handler(format!("Error registering spoke account {}: {}", account_id, e))
                })?;
                Ok(format!("Registered spoke account {}", account_id))
            }
            RegistrationAction::Delete => {
                self.store.deregister_spoke_accounts(&ids).await.map_err(|e| {
                    GatewayError::Handler(format!(
                        "Error deregistering spoke account {}: {}",
                        account_id, e
                    ))
                })?;
                Ok(format!("Deregistered spoke account {}", account_id))
            }
        }
    }
}

#[async_trait]
impl RegistrationHandler for SpokeRegistrationHandler {
    async fn handle(&self, event: &RegistrationEvent) -> confprop_core::Result<String> {
        Ok(self.apply(event).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use confprop_core::testing::RecordingReporter;
    use confprop_core::{MemoryConfigStore, PropagationError};

    fn event(account: &str, action: RegistrationAction) -> RegistrationEvent {
        RegistrationEvent {
            source_account_id: account.to_string(),
            organization_id: "o-abc".to_string(),
            action,
            parameter_name: "/instance-scheduler/do-not-delete-manually".to_string(),
        }
    }

    struct BrokenStore;

    #[async_trait]
    impl SpokeAccountStore for BrokenStore {
        async fn register_spoke_accounts(&self, _: &BTreeSet<String>) -> confprop_core::Result<BTreeSet<String>> {
            Err(PropagationError::Store("table unavailable".to_string()))
        }

        async fn deregister_spoke_accounts(&self, _: &BTreeSet<String>) -> confprop_core::Result<BTreeSet<String>> {
            Err(PropagationError::Store("table unavailable".to_string()))
        }

        async fn spoke_accounts(&self) -> confprop_core::Result<BTreeSet<String>> {
            Ok(BTreeSet::new())
        }
    }

    #[test]
    fn account_ids_are_twelve_digits() {
        assert!(validate_account_id("111122223333").is_ok());
        assert!(validate_account_id("").is_err());
        assert!(validate_account_id("11112222333").is_err());
        assert!(validate_account_id("11112222333a").is_err());
        assert!(validate_account_id("1111222233334").is_err());
    }

    #[tokio::test]
    async fn create_registers_and_delete_deregisters() {
        let store = Arc::new(MemoryConfigStore::new());
        let handler = SpokeRegistrationHandler::new(store.clone(), Arc::new(RecordingReporter::new()));

        let out = handler.apply(&event("111122223333", RegistrationAction::Create)).await.unwrap();
        assert_eq!(out, "Registered spoke account 111122223333");
        assert_eq!(store.spoke_accounts().await.unwrap(), BTreeSet::from(["111122223333".to_string()]));

        let out = handler.apply(&event("111122223333", RegistrationAction::Delete)).await.unwrap();
        assert_eq!(out, "Deregistered spoke account 111122223333");
        assert!(store.spoke_accounts().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_of_unknown_account_is_a_noop() {
        let store = Arc::new(MemoryConfigStore::new());
        let handler = SpokeRegistrationHandler::new(store.clone(), Arc::new(RecordingReporter::new()));

        handler.apply(&event("111122223333", RegistrationAction::Delete)).await.unwrap();

        assert!(store.spoke_accounts().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn store_failure_is_reported_and_returned() {
        let reporter = Arc::new(RecordingReporter::new());
        let handler = SpokeRegistrationHandler::new(Arc::new(BrokenStore), reporter.clone());

        let err = handler
            .handle(&event("111122223333", RegistrationAction::Create))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Error registering spoke account 111122223333"));

        let reports = reporter.reports();
        assert_eq!(reports.len(), 1);
        assert!(matches!(reports[0], ErrorReport::RegistrationFailure { .. }));
    }

    #[tokio::test]
    async fn invalid_account_id_never_reaches_the_store() {
        let store = Arc::new(MemoryConfigStore::new());
        let reporter = Arc::new(RecordingReporter::new());
        let handler = SpokeRegistrationHandler::new(store.clone(), reporter.clone());

        let result = handler.apply(&event("not-an-account", RegistrationAction::Create)).await;

        assert!(matches!(result, Err(GatewayError::InvalidRegistration(_))));
        assert!(store.spoke_accounts().await.unwrap().is_empty());
        assert_eq!(reporter.reports().len(), 1);
    }
}
