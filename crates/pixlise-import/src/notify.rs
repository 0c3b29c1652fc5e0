//! Outbound "dataset ready" notifications

use async_trait::async_trait;
use pixlise_common::Result;
use std::collections::BTreeMap;
use tracing::info;

use crate::summary::UpdateKind;

pub const TOPIC_NEW_DATASET: &str = "new-dataset-available";

/// Subscription lookup used for every update topic
pub const TOPIC_DATASET_UPDATED: &str = "dataset-updated";

/// One notification, as handed to the external sink
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub topic: String,
    /// `datasourcename` holds the dataset id, which stays fixed across
    /// re-imports while the title may not
    pub template_vars: BTreeMap<String, String>,
    /// Restrict to these users; empty means every subscriber
    pub user_ids: Vec<String>,
    pub include_admins: bool,
    /// Topic to look subscriptions up under, when it differs from `topic`
    pub topic_override: Option<String>,
}

impl Notification {
    pub fn new_dataset(dataset_id: &str) -> Self {
        Self::build(TOPIC_NEW_DATASET.to_string(), dataset_id, None)
    }

    pub fn dataset_updated(dataset_id: &str, kind: UpdateKind) -> Self {
        Self::build(
            format!("dataset-{kind}-updated"),
            dataset_id,
            Some(TOPIC_DATASET_UPDATED.to_string()),
        )
    }

    fn build(topic: String, dataset_id: &str, topic_override: Option<String>) -> Self {
        let template_vars = BTreeMap::from([
            ("datasourcename".to_string(), dataset_id.to_string()),
            (
                "subject".to_string(),
                format!("Datasource {dataset_id} Processing Complete"),
            ),
        ]);
        Self {
            topic,
            template_vars,
            user_ids: Vec::new(),
            include_admins: true,
            topic_override,
        }
    }
}

#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, notification: &Notification) -> Result<()>;
}

/// Sink that only logs, for deployments without a notification service
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingSink;

#[async_trait]
impl NotificationSink for LoggingSink {
    async fn notify(&self, notification: &Notification) -> Result<()> {
        info!(
            topic = %notification.topic,
            lookup = ?notification.topic_override,
            vars = ?notification.template_vars,
            "Notification"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topics() {
        let n = Notification::new_dataset("189137412");
        assert_eq!(n.topic, "new-dataset-available");
        assert_eq!(n.topic_override, None);
        assert_eq!(n.template_vars["subject"], "Datasource 189137412 Processing Complete");

        let n = Notification::dataset_updated("189137412", UpdateKind::Housekeeping);
        assert_eq!(n.topic, "dataset-housekeeping-updated");
        assert_eq!(n.topic_override.as_deref(), Some("dataset-updated"));
        assert_eq!(n.template_vars["datasourcename"], "189137412");
    }
}
