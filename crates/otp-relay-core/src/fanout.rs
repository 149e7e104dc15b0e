//! Fan-out delivery: one formatted payload to every enabled destination.
//!
//! Partial failure is the normal case. Each destination succeeds or fails on its own and
//! the engine never returns an error; the caller gets a [`DeliveryReport`] instead.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::{
    config::Config,
    domain::{Destination, DestinationId},
    messaging::{
        port::MessagingPort,
        types::{LinkButton, OutboundMessage},
    },
    store::{destinations_or_empty, ConfigStore},
};

/// Fallback button metadata for destinations that leave label or target unset.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ButtonDefaults {
    pub label: String,
    pub target: Option<String>,
}

impl Default for ButtonDefaults {
    fn default() -> Self {
        Self {
            label: "Open".to_string(),
            target: None,
        }
    }
}

impl From<&Config> for ButtonDefaults {
    fn from(cfg: &Config) -> Self {
        Self {
            label: cfg.default_button_label.clone(),
            target: cfg.default_button_url.clone(),
        }
    }
}

impl ButtonDefaults {
    /// Per-field fallback. No target anywhere means no button at all.
    pub fn resolve(&self, dest: &Destination) -> Option<LinkButton> {
        let url = non_blank(dest.button_target.as_deref()).or(self.target.as_deref())?;
        let label = non_blank(dest.button_label.as_deref()).unwrap_or(&self.label);
        Some(LinkButton {
            label: label.to_string(),
            url: url.to_string(),
        })
    }
}

fn non_blank(s: Option<&str>) -> Option<&str> {
    s.filter(|s| !s.trim().is_empty())
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum DeliveryStatus {
    Delivered,
    Failed(String),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DeliveryOutcome {
    pub destination: DestinationId,
    #[serde(flatten)]
    pub status: DeliveryStatus,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct DeliveryReport {
    /// Attempted sends in store order.
    pub outcomes: Vec<DeliveryOutcome>,
    pub skipped_disabled: usize,
}

impl DeliveryReport {
    pub fn attempted(&self) -> usize {
        self.outcomes.len()
    }

    pub fn delivered(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| o.status == DeliveryStatus::Delivered)
            .count()
    }

    pub fn failed(&self) -> usize {
        self.attempted() - self.delivered()
    }
}

pub struct FanoutEngine {
    store: Arc<dyn ConfigStore>,
    messenger: Arc<dyn MessagingPort>,
    defaults: ButtonDefaults,
}

impl FanoutEngine {
    pub fn new(
        store: Arc<dyn ConfigStore>,
        messenger: Arc<dyn MessagingPort>,
        defaults: ButtonDefaults,
    ) -> Self {
        Self {
            store,
            messenger,
            defaults,
        }
    }

    /// Send `html` to every enabled destination, sequentially, in store order.
    ///
    /// The destination list is read once per call. A destination added meanwhile may
    /// miss this payload; one removed meanwhile may still get it.
    pub async fn deliver(&self, html: &str) -> DeliveryReport {
        let mut report = DeliveryReport::default();
        let destinations = destinations_or_empty(self.store.as_ref()).await;

        for dest in destinations {
            if !dest.enabled {
                debug!(destination = %dest.id, "skipping disabled destination");
                report.skipped_disabled += 1;
                continue;
            }

            let msg = OutboundMessage::html(html).with_button(self.defaults.resolve(&dest));
            let status = match self.messenger.send(&dest.id, &msg).await {
                Ok(sent) => {
                    debug!(destination = %dest.id, message_id = sent.message_id, "delivered");
                    // Counter write failures never fail the delivery itself.
                    if let Err(e) = self.store.increment_message_count(&dest.id).await {
                        warn!(destination = %dest.id, error = %e, "failed to record delivery");
                    }
                    DeliveryStatus::Delivered
                }
                Err(e) => {
                    warn!(destination = %dest.id, error = %e, "delivery failed");
                    DeliveryStatus::Failed(e.to_string())
                }
            };
            report.outcomes.push(DeliveryOutcome {
                destination: dest.id,
                status,
            });
        }

        info!(
            attempted = report.attempted(),
            delivered = report.delivered(),
            failed = report.failed(),
            skipped = report.skipped_disabled,
            "fan-out finished"
        );
        report
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory messenger shared by the fan-out and worker tests.

    use std::{collections::HashSet, sync::Mutex};

    use async_trait::async_trait;

    use crate::{
        domain::{DestinationId, MessageRef},
        errors::Error,
        messaging::{
            port::MessagingPort,
            types::{MessagingCapabilities, OutboundMessage},
        },
        Result,
    };

    #[derive(Default)]
    pub struct RecordingMessenger {
        pub sent: Mutex<Vec<(DestinationId, OutboundMessage)>>,
        pub rejecting: Mutex<HashSet<DestinationId>>,
    }

    impl RecordingMessenger {
        pub fn reject(&self, id: &DestinationId) {
            self.rejecting.lock().unwrap().insert(id.clone());
        }

        pub fn sent(&self) -> Vec<(DestinationId, OutboundMessage)> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl MessagingPort for RecordingMessenger {
        fn capabilities(&self) -> MessagingCapabilities {
            MessagingCapabilities {
                supports_html: true,
                supports_inline_buttons: true,
                max_message_len: 4096,
            }
        }

        async fn send(&self, to: &DestinationId, msg: &OutboundMessage) -> Result<MessageRef> {
            if self.rejecting.lock().unwrap().contains(to) {
                return Err(Error::External("chat not found".to_string()));
            }
            let mut sent = self.sent.lock().unwrap();
            sent.push((to.clone(), msg.clone()));
            Ok(MessageRef {
                destination: to.clone(),
                message_id: sent.len() as i32,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::RecordingMessenger;
    use super::*;
    use crate::{domain::UserId, store::SqliteStore};

    fn id(raw: &str) -> DestinationId {
        DestinationId::parse(raw).unwrap()
    }

    async fn setup(dests: Vec<Destination>) -> (Arc<SqliteStore>, Arc<RecordingMessenger>) {
        let store = Arc::new(SqliteStore::open_in_memory(UserId(1)).await.unwrap());
        for d in dests {
            store.upsert_destination(d).await.unwrap();
        }
        (store, Arc::new(RecordingMessenger::default()))
    }

    fn engine(store: &Arc<SqliteStore>, messenger: &Arc<RecordingMessenger>) -> FanoutEngine {
        FanoutEngine::new(
            store.clone(),
            messenger.clone(),
            ButtonDefaults {
                label: "Open".to_string(),
                target: Some("https://example.com".to_string()),
            },
        )
    }

    #[tokio::test]
    async fn one_failure_does_not_block_the_rest() {
        let (store, messenger) =
            setup(vec![Destination::new(id("-1")), Destination::new(id("-2"))]).await;
        messenger.reject(&id("-1"));

        let report = engine(&store, &messenger).deliver("<b>hi</b>").await;

        assert_eq!(report.attempted(), 2);
        assert_eq!(report.delivered(), 1);
        assert!(matches!(report.outcomes[0].status, DeliveryStatus::Failed(_)));
        assert_eq!(report.outcomes[1].status, DeliveryStatus::Delivered);

        let a = store.get_destination(&id("-1")).await.unwrap().unwrap();
        let b = store.get_destination(&id("-2")).await.unwrap().unwrap();
        assert_eq!(a.message_count, 0);
        assert_eq!(b.message_count, 1);
    }

    #[tokio::test]
    async fn disabled_destinations_are_skipped_but_kept() {
        let mut off = Destination::new(id("-2"));
        off.enabled = false;
        let (store, messenger) = setup(vec![Destination::new(id("-1")), off]).await;

        let report = engine(&store, &messenger).deliver("x").await;

        assert_eq!(report.attempted(), 1);
        assert_eq!(report.skipped_disabled, 1);
        assert_eq!(messenger.sent().len(), 1);
        assert_eq!(store.list_destinations().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn sends_in_store_order_with_resolved_buttons() {
        let (store, messenger) = setup(vec![
            Destination::new(id("-3")).with_button(Some("Join".into()), Some("https://t.me/a".into())),
            Destination::new(id("-1")).with_button(None, Some("https://t.me/b".into())),
            Destination::new(id("@c")),
        ])
        .await;

        engine(&store, &messenger).deliver("x").await;

        let sent = messenger.sent();
        let order: Vec<&str> = sent.iter().map(|(d, _)| d.as_str()).collect();
        assert_eq!(order, ["-3", "-1", "@c"]);

        let buttons: Vec<_> = sent.iter().map(|(_, m)| m.button.clone().unwrap()).collect();
        assert_eq!(buttons[0].label, "Join");
        assert_eq!(buttons[1].label, "Open");
        assert_eq!(buttons[1].url, "https://t.me/b");
        assert_eq!(buttons[2].url, "https://example.com");
        assert!(sent.iter().all(|(_, m)| m.disable_link_preview));
    }

    #[tokio::test]
    async fn empty_store_is_an_empty_report() {
        let (store, messenger) = setup(vec![]).await;
        let report = engine(&store, &messenger).deliver("x").await;
        assert_eq!(report, DeliveryReport::default());
    }

    #[test]
    fn no_target_anywhere_means_no_button() {
        let defaults = ButtonDefaults::default();
        let d = Destination::new(id("-1")).with_button(Some("Label only".into()), None);
        assert_eq!(defaults.resolve(&d), None);
    }
}
