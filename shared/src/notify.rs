use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;

use crate::store::{PushError, PushRegistry, PushSender};

/// Summary of one fanout. Zero endpoints is a zero-success report, not a
/// failure.
#[derive(Debug, Default, Serialize)]
pub struct DispatchReport {
    pub success_count: usize,
    pub failure_count: usize,
}

#[derive(Debug, Serialize)]
struct PushPayload<'a> {
    title: &'a str,
    body: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    url: Option<&'a str>,
}

/// Best-effort push dispatch to the registered endpoints of a recipient set.
#[derive(Clone)]
pub struct NotificationFanout {
    registry: Arc<dyn PushRegistry>,
    sender: Arc<dyn PushSender>,
}

impl NotificationFanout {
    pub fn new(registry: Arc<dyn PushRegistry>, sender: Arc<dyn PushSender>) -> Self {
        Self { registry, sender }
    }

    /// Resolve endpoints for `user_ids`, deduplicate, and dispatch to each.
    /// One endpoint's failure never blocks the others. Endpoints reported
    /// permanently gone are pruned from the registry best-effort.
    pub async fn send(
        &self,
        user_ids: &[String],
        title: &str,
        body: &str,
        url: Option<&str>,
    ) -> DispatchReport {
        let endpoints = match self.registry.endpoints_for(user_ids).await {
            Ok(endpoints) => endpoints,
            Err(e) => {
                tracing::error!("Failed to resolve push endpoints: {}", e);
                return DispatchReport::default();
            }
        };

        let payload = match serde_json::to_vec(&PushPayload { title, body, url }) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!("Failed to encode push payload: {}", e);
                return DispatchReport::default();
            }
        };

        let mut seen = HashSet::new();
        let mut report = DispatchReport::default();

        for endpoint in endpoints {
            if !seen.insert(endpoint.endpoint_id.clone()) {
                continue;
            }
            match self.sender.push(&endpoint.endpoint_id, &payload).await {
                Ok(()) => report.success_count += 1,
                Err(PushError::Gone) => {
                    report.failure_count += 1;
                    tracing::warn!(
                        "Endpoint {} is gone, pruning from user {}",
                        endpoint.endpoint_id,
                        endpoint.user_id
                    );
                    if let Err(e) = self
                        .registry
                        .remove_endpoint(&endpoint.user_id, &endpoint.endpoint_id)
                        .await
                    {
                        tracing::warn!("Failed to prune endpoint {}: {}", endpoint.endpoint_id, e);
                    }
                }
                Err(PushError::Other(e)) => {
                    report.failure_count += 1;
                    tracing::warn!("Failed to push to endpoint {}: {}", endpoint.endpoint_id, e);
                }
            }
        }

        tracing::info!(
            "Notification fanout: {} delivered, {} failed",
            report.success_count,
            report.failure_count
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::{MemoryStore, RecordingPushSender};
    use crate::types::PushEndpoint;
    use chrono::Utc;

    fn endpoint(user_id: &str, endpoint_id: &str) -> PushEndpoint {
        PushEndpoint {
            endpoint_id: endpoint_id.to_string(),
            user_id: user_id.to_string(),
            registered_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn no_endpoints_is_a_zero_report() {
        let store = Arc::new(MemoryStore::new());
        let sender = Arc::new(RecordingPushSender::new());
        let fanout = NotificationFanout::new(store, sender.clone());

        let report = fanout
            .send(&["u1".to_string()], "RFA approved", "SD-100 rev 1", None)
            .await;
        assert_eq!(report.success_count, 0);
        assert_eq!(report.failure_count, 0);
        assert!(sender.sent().is_empty());
    }

    #[tokio::test]
    async fn dispatches_to_each_registered_endpoint() {
        let store = Arc::new(MemoryStore::new());
        store.register_endpoint(&endpoint("u1", "ep-1")).await.unwrap();
        store.register_endpoint(&endpoint("u1", "ep-2")).await.unwrap();
        store.register_endpoint(&endpoint("u2", "ep-3")).await.unwrap();
        let sender = Arc::new(RecordingPushSender::new());
        let fanout = NotificationFanout::new(store, sender.clone());

        let report = fanout
            .send(
                &["u1".to_string(), "u2".to_string()],
                "Review required",
                "SD-100",
                Some("/rfas/SD-100"),
            )
            .await;
        assert_eq!(report.success_count, 3);
        assert_eq!(report.failure_count, 0);
        assert_eq!(sender.sent().len(), 3);
    }

    #[tokio::test]
    async fn one_failing_endpoint_does_not_block_others() {
        let store = Arc::new(MemoryStore::new());
        store.register_endpoint(&endpoint("u1", "ep-bad")).await.unwrap();
        store.register_endpoint(&endpoint("u1", "ep-good")).await.unwrap();
        let sender = Arc::new(RecordingPushSender::new());
        sender.fail_endpoint("ep-bad");
        let fanout = NotificationFanout::new(store, sender.clone());

        let report = fanout.send(&["u1".to_string()], "t", "b", None).await;
        assert_eq!(report.success_count, 1);
        assert_eq!(report.failure_count, 1);
    }

    #[tokio::test]
    async fn gone_endpoints_are_pruned() {
        let store = Arc::new(MemoryStore::new());
        store.register_endpoint(&endpoint("u1", "ep-gone")).await.unwrap();
        let sender = Arc::new(RecordingPushSender::new());
        sender.gone_endpoint("ep-gone");
        let fanout = NotificationFanout::new(store.clone(), sender);

        let report = fanout.send(&["u1".to_string()], "t", "b", None).await;
        assert_eq!(report.failure_count, 1);
        let remaining = store.endpoints_for(&["u1".to_string()]).await.unwrap();
        assert!(remaining.is_empty());
    }
}
