use async_trait::async_trait;
use confprop_core::{ErrorReport, ErrorReporter};
use tokio::sync::broadcast;
use tracing::error;

/// Fire-and-forget error topic.
///
/// Every report is logged at `error` with its JSON body and broadcast to
/// current subscribers; with no subscribers the report only reaches the log.
pub struct TopicReporter {
    topic: String,
    tx: broadcast::Sender<ErrorReport>,
}

impl TopicReporter {
    pub fn new(topic: impl Into<String>) -> Self {
        let (tx, _rx) = broadcast::channel(256);
        Self {
            topic: topic.into(),
            tx,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ErrorReport> {
        self.tx.subscribe()
    }
}

#[async_trait]
impl ErrorReporter for TopicReporter {
    async fn publish(&self, report: ErrorReport) {
        match report.to_json() {
            Ok(body) => error!(topic = %self.topic, message = %body, "{}", report.error()),
            Err(e) => error!(topic = %self.topic, "{} (report not serializable: {})", report.error(), e),
        }
        let _ = self.tx.send(report);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use confprop_core::{ChangeBatch, ChangeOperation, ChangeRecord, EntityType, SequenceNumber};

    #[tokio::test]
    async fn subscribers_receive_published_reports() {
        let reporter = TopicReporter::new("issues");
        let mut rx = reporter.subscribe();
        let batch = ChangeBatch::new(
            vec![ChangeRecord::new(
                "s",
                EntityType::Schedule,
                ChangeOperation::Insert,
                SequenceNumber::from_counter(1),
            )],
            Utc::now(),
            Utc::now(),
        )
        .unwrap();

        reporter.publish(ErrorReport::batch_failure(batch.clone(), "boom")).await;

        match rx.recv().await.unwrap() {
            ErrorReport::BatchFailure { batch: got, error, .. } => {
                assert_eq!(got, batch);
                assert_eq!(error, "boom");
            }
            other => panic!("unexpected report {:?}", other),
        }
    }

    #[tokio::test]
    async fn publishing_without_subscribers_does_not_fail() {
        let reporter = TopicReporter::new("issues");
        let event = confprop_core::RegistrationEvent {
            source_account_id: "111122223333".into(),
            organization_id: "o-abc".into(),
            action: confprop_core::RegistrationAction::Create,
            parameter_name: "/marker".into(),
        };
        reporter.publish(ErrorReport::registration_failure(event, "down")).await;
        assert_eq!(reporter.topic(), "issues");
    }
}
