use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use tracing::error;

use crate::models::{ActionRequest, PermissionGrant, Scope};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventTopic {
    ActionEnqueued,
    ActionCompleted,
    ActionFailed,
    PermissionNeeded,
    PermissionGranted,
    PermissionRevoked,
}

#[derive(Debug, Clone)]
pub enum Event {
    ActionEnqueued {
        action: ActionRequest,
    },
    ActionCompleted {
        action: ActionRequest,
    },
    ActionFailed {
        action: ActionRequest,
    },
    PermissionNeeded {
        handler_id: String,
        permission_name: String,
        scope: Scope,
    },
    PermissionGranted {
        grant: PermissionGrant,
    },
    PermissionRevoked {
        grant: PermissionGrant,
    },
}

impl Event {
    pub fn topic(&self) -> EventTopic {
        match self {
            Event::ActionEnqueued { .. } => EventTopic::ActionEnqueued,
            Event::ActionCompleted { .. } => EventTopic::ActionCompleted,
            Event::ActionFailed { .. } => EventTopic::ActionFailed,
            Event::PermissionNeeded { .. } => EventTopic::PermissionNeeded,
            Event::PermissionGranted { .. } => EventTopic::PermissionGranted,
            Event::PermissionRevoked { .. } => EventTopic::PermissionRevoked,
        }
    }
}

type Subscriber = Arc<dyn Fn(&Event) + Send + Sync>;

/// Disposer token returned by [`EventBus::on`]; pass back to `off` to stop
/// delivery. Dropping it leaves the subscription alive.
#[derive(Debug)]
pub struct Subscription {
    topic: EventTopic,
    id: u64,
}

/// Synchronous in-process pub/sub. Subscribers run in registration order on
/// the emitting thread, before the emitting call returns.
#[derive(Default)]
pub struct EventBus {
    subscribers: RwLock<HashMap<EventTopic, Vec<(u64, Subscriber)>>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on<F>(&self, topic: EventTopic, subscriber: F) -> Subscription
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(topic)
            .or_default()
            .push((id, Arc::new(subscriber)));
        Subscription { topic, id }
    }

    pub fn off(&self, subscription: Subscription) {
        if let Some(entries) = self
            .subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(&subscription.topic)
        {
            entries.retain(|(id, _)| *id != subscription.id);
        }
    }

    pub fn emit(&self, event: &Event) {
        let subscribers: Vec<Subscriber> = self
            .subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&event.topic())
            .map(|entries| entries.iter().map(|(_, s)| s.clone()).collect())
            .unwrap_or_default();

        for subscriber in subscribers {
            // One misbehaving subscriber must not starve the rest.
            if catch_unwind(AssertUnwindSafe(|| subscriber(event))).is_err() {
                error!(topic = ?event.topic(), "event subscriber panicked");
            }
        }
    }
}
