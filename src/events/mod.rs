use metrics::counter;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

/// Publishes domain events after their transaction commits.
#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Queues an event without waiting. A full or closed channel drops the
    /// event with a warning.
    pub fn publish(&self, event: Event) {
        if let Err(err) = self.sender.try_send(event) {
            counter!("stockroom_events.publish_failed", 1);
            warn!(error = %err, "domain event dropped");
        }
    }
}

/// Facts emitted by the services once the owning transaction has committed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    TenantRegistered {
        tenant_id: Uuid,
        owner_user_id: Uuid,
    },
    MemberAdded {
        tenant_id: Uuid,
        user_id: Uuid,
        role_key: String,
    },
    MemberRemoved {
        tenant_id: Uuid,
        user_id: Uuid,
    },
    OwnershipTransferred {
        tenant_id: Uuid,
        from_user_id: Uuid,
        to_user_id: Uuid,
    },
    ProductCreated {
        tenant_id: Uuid,
        product_id: Uuid,
    },
    ProductUpdated {
        tenant_id: Uuid,
        product_id: Uuid,
        version: i32,
    },
    ProductDeleted {
        tenant_id: Uuid,
        product_id: Uuid,
    },
    StockMoved {
        tenant_id: Uuid,
        branch_id: Uuid,
        product_id: Uuid,
        kind: String,
        qty_delta: i64,
        qty_on_hand: i64,
    },
    TransferStatusChanged {
        tenant_id: Uuid,
        transfer_id: Uuid,
        from: Option<String>,
        to: String,
    },
    ApprovalLevelDecided {
        tenant_id: Uuid,
        transfer_id: Uuid,
        level: i32,
        status: String,
    },
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::TenantRegistered { .. } => "tenant_registered",
            Event::MemberAdded { .. } => "member_added",
            Event::MemberRemoved { .. } => "member_removed",
            Event::OwnershipTransferred { .. } => "ownership_transferred",
            Event::ProductCreated { .. } => "product_created",
            Event::ProductUpdated { .. } => "product_updated",
            Event::ProductDeleted { .. } => "product_deleted",
            Event::StockMoved { .. } => "stock_moved",
            Event::TransferStatusChanged { .. } => "transfer_status_changed",
            Event::ApprovalLevelDecided { .. } => "approval_level_decided",
        }
    }
}

/// Drains the event channel until every sender is dropped.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        counter!("stockroom_events.processed", 1, "event" => event.name());
        match serde_json::to_string(&event) {
            Ok(payload) => info!(event = event.name(), %payload, "domain event"),
            Err(err) => warn!(event = event.name(), error = %err, "unserializable event"),
        }
    }

    info!("Event processing loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_delivers_to_receiver() {
        let (tx, mut rx) = mpsc::channel(4);
        let sender = EventSender::new(tx);
        let event = Event::ProductCreated {
            tenant_id: Uuid::new_v4(),
            product_id: Uuid::new_v4(),
        };

        sender.publish(event.clone());
        assert_eq!(rx.recv().await, Some(event));
    }

    #[test]
    fn publish_after_receiver_dropped_does_not_fail() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let sender = EventSender::new(tx);
        sender.publish(Event::MemberRemoved {
            tenant_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
        });
    }

    #[tokio::test]
    async fn publish_on_a_full_channel_drops_instead_of_waiting() {
        let (tx, mut rx) = mpsc::channel(1);
        let sender = EventSender::new(tx);
        let first = Event::ProductDeleted {
            tenant_id: Uuid::nil(),
            product_id: Uuid::new_v4(),
        };
        let second = Event::ProductDeleted {
            tenant_id: Uuid::nil(),
            product_id: Uuid::new_v4(),
        };

        sender.publish(first.clone());
        sender.publish(second);

        assert_eq!(rx.recv().await, Some(first));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn events_serialize_with_type_tag() {
        let json = serde_json::to_value(Event::TransferStatusChanged {
            tenant_id: Uuid::nil(),
            transfer_id: Uuid::nil(),
            from: Some("DRAFT".into()),
            to: "REQUESTED".into(),
        })
        .unwrap();
        assert_eq!(json["type"], "transfer_status_changed");
        assert_eq!(json["to"], "REQUESTED");
    }
}
