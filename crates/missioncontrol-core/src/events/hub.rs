//! Topic-scoped pub/sub fan-out with bounded per-subscriber queues.
//!
//! Deliberately built on a per-subscriber `tokio::sync::mpsc::channel(256)`
//! rather than a broadcast channel: broadcast's lag-and-skip semantics
//! silently drop old events for a slow reader, but this hub's contract is
//! "close the stream, don't skip" — a slow subscriber must reconnect and
//! resync rather than silently miss events.

use crate::events::types::{Event, TopicFilter};
use crate::state::StateSnapshot;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum HubError {
    #[error("authentication required")]
    AuthRequired,
    #[error("invalid bearer token")]
    InvalidToken,
}

pub type HubResult<T> = Result<T, HubError>;

struct Subscriber {
    filter: TopicFilter,
    sender: mpsc::Sender<Event>,
}

/// A live subscription handle returned from [`EventHub::subscribe`].
pub struct Subscription {
    pub id: u64,
    pub receiver: mpsc::Receiver<Event>,
}

/// Owns subscriber membership and fans events out. All membership mutation
/// happens inside the single serialization task spawned by [`EventHub::new`];
/// publishers only ever push into a bounded channel and never touch
/// subscriber state directly, so no publisher can block on a slow reader.
pub struct EventHub {
    publish_tx: mpsc::Sender<Event>,
    subscribe_tx: mpsc::Sender<SubscribeRequest>,
    next_id: AtomicU64,
    required_token: Option<String>,
    queue_capacity: usize,
}

struct SubscribeRequest {
    id: u64,
    filter: TopicFilter,
    sender: mpsc::Sender<Event>,
}

impl EventHub {
    /// Spawn the hub's serialization task. `required_token` is `None` for
    /// open/development mode (an empty env token means no auth required).
    pub fn new(queue_capacity: usize, required_token: Option<String>) -> Arc<Self> {
        let (publish_tx, mut publish_rx) = mpsc::channel::<Event>(1024);
        let (subscribe_tx, mut subscribe_rx) = mpsc::channel::<SubscribeRequest>(256);

        tokio::spawn(async move {
            let subscribers: Mutex<HashMap<u64, Subscriber>> = Mutex::new(HashMap::new());
            loop {
                tokio::select! {
                    Some(req) = subscribe_rx.recv() => {
                        let mut subs = subscribers.lock().await;
                        subs.insert(req.id, Subscriber { filter: req.filter, sender: req.sender });
                    }
                    Some(event) = publish_rx.recv() => {
                        let mut subs = subscribers.lock().await;
                        let mut dead = Vec::new();
                        for (id, sub) in subs.iter() {
                            if !sub.filter.matches(event.topic) {
                                continue;
                            }
                            match sub.sender.try_send(event.clone()) {
                                Ok(()) => {}
                                Err(mpsc::error::TrySendError::Full(_)) => {
                                    warn!(subscriber = id, "subscriber queue full, disconnecting");
                                    dead.push(*id);
                                }
                                Err(mpsc::error::TrySendError::Closed(_)) => {
                                    dead.push(*id);
                                }
                            }
                        }
                        for id in dead {
                            subs.remove(&id);
                        }
                    }
                    else => break,
                }
            }
            debug!("event hub serialization task exiting");
        });

        Arc::new(EventHub {
            publish_tx,
            subscribe_tx,
            next_id: AtomicU64::new(1),
            required_token,
            queue_capacity,
        })
    }

    /// Register a new subscriber, optionally checking a bearer token, and
    /// return a subscription whose first item is always
    /// `sync.initial_state` built from `snapshot`.
    pub async fn subscribe(
        &self,
        filter: TopicFilter,
        token: Option<&str>,
        snapshot: &StateSnapshot,
    ) -> HubResult<Subscription> {
        if let Some(required) = &self.required_token {
            match token {
                None => return Err(HubError::AuthRequired),
                Some(t) if t != required => return Err(HubError::InvalidToken),
                Some(_) => {}
            }
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::channel(self.queue_capacity);

        // Queue the initial snapshot into the subscriber's own channel
        // *before* registering it with the serialization task, so it is
        // always the first frame the subscriber ever observes and no live
        // event can be interleaved ahead of it.
        let _ = tx.send(Event::initial_state(snapshot)).await;

        let _ = self
            .subscribe_tx
            .send(SubscribeRequest { id, filter, sender: tx })
            .await;

        Ok(Subscription { id, receiver: rx })
    }

    /// Publish a change event onto the hub. Never blocks on a subscriber;
    /// only blocks (briefly) on the hub's own bounded publish channel.
    pub async fn publish(&self, event: Event) {
        if self.publish_tx.send(event).await.is_err() {
            warn!("event hub publish channel closed");
        }
    }

    pub fn subscriber_queue_capacity(&self) -> usize {
        self.queue_capacity
    }
}
