//! Reconnecting bridge between an external agent gateway and the worker
//! tracker. The wire protocol to the actual gateway is intentionally out of
//! this crate's scope, so [`GatewayTransport`] is a trait a real transport
//! implements and tests substitute with a double.
//!
//! Reconnect uses exponential backoff (base delay doubling), capped at
//! 1s -> 30s.

use crate::worker::WorkerTracker;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const RECONNECT_BASE: Duration = Duration::from_secs(1);
const RECONNECT_CAP: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("gateway connect failed: {0}")]
    Connect(String),
    #[error("gateway stream closed")]
    StreamClosed,
}

pub type BridgeResult<T> = Result<T, BridgeError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecyclePhase {
    Start,
    End,
}

impl LifecyclePhase {
    fn as_static_str(self) -> &'static str {
        match self {
            LifecyclePhase::Start => "start",
            LifecyclePhase::End => "end",
        }
    }
}

/// `agent.event(run_id, stream="lifecycle", session_key, data:{phase, started_at})`.
#[derive(Debug, Clone)]
pub struct GatewayMessage {
    pub session_key: String,
    pub phase: LifecyclePhase,
    pub started_at: DateTime<Utc>,
}

/// A long-lived connection to the external agent gateway. Implementors own
/// reconnection mechanics below the `connect`/`recv` boundary; the bridge
/// only drives retry timing.
#[async_trait]
pub trait GatewayTransport: Send + Sync {
    async fn connect(&mut self) -> BridgeResult<()>;
    /// Returns the next message, or `None` when the connection has dropped.
    async fn recv(&mut self) -> Option<GatewayMessage>;
}

/// Read-only status exposed for a health endpoint.
#[derive(Debug, Clone)]
pub struct BridgeStatus {
    pub connected: bool,
    pub last_error: Option<String>,
    pub last_connected_at: Option<DateTime<Utc>>,
}

struct SharedStatus {
    connected: AtomicBool,
    detail: Mutex<(Option<String>, Option<DateTime<Utc>>)>,
}

pub struct GatewayBridge {
    status: Arc<SharedStatus>,
}

impl GatewayBridge {
    pub fn new() -> Arc<Self> {
        Arc::new(GatewayBridge {
            status: Arc::new(SharedStatus {
                connected: AtomicBool::new(false),
                detail: Mutex::new((None, None)),
            }),
        })
    }

    pub fn status(&self) -> BridgeStatus {
        let (last_error, last_connected_at) = self.status.detail.lock().unwrap().clone();
        BridgeStatus {
            connected: self.status.connected.load(Ordering::SeqCst),
            last_error,
            last_connected_at,
        }
    }

    /// Run the reconnect-and-forward loop until `cancel` fires. Disconnect
    /// is logged and reflected in [`status`] but never takes the
    /// orchestrator down.
    pub async fn run(
        self: Arc<Self>,
        mut transport: impl GatewayTransport + 'static,
        tracker: Arc<WorkerTracker>,
        cancel: CancellationToken,
    ) {
        let mut backoff = RECONNECT_BASE;
        loop {
            if cancel.is_cancelled() {
                break;
            }
            match transport.connect().await {
                Ok(()) => {
                    info!("gateway bridge connected");
                    self.status.connected.store(true, Ordering::SeqCst);
                    {
                        let mut detail = self.status.detail.lock().unwrap();
                        detail.0 = None;
                        detail.1 = Some(Utc::now());
                    }
                    backoff = RECONNECT_BASE;
                }
                Err(e) => {
                    warn!(error = %e, backoff_secs = backoff.as_secs(), "gateway connect failed, retrying");
                    self.status.connected.store(false, Ordering::SeqCst);
                    self.status.detail.lock().unwrap().0 = Some(e.to_string());
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(backoff) => {}
                    }
                    backoff = (backoff * 2).min(RECONNECT_CAP);
                    continue;
                }
            }

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    message = transport.recv() => {
                        match message {
                            Some(msg) => {
                                // Only `subagent:*` sessions are mission workers; the
                                // gateway also emits lifecycle events for orchestrator
                                // and other non-worker sessions, which must not be
                                // buffered or allowed to terminate a tracked worker.
                                if !msg.session_key.contains("subagent:") {
                                    continue;
                                }
                                if let Err(e) = tracker
                                    .handle_lifecycle(&msg.session_key, msg.phase.as_static_str(), msg.started_at)
                                    .await
                                {
                                    warn!(error = %e, "failed to apply gateway lifecycle event");
                                }
                            }
                            None => {
                                warn!("gateway stream closed, will reconnect");
                                self.status.connected.store(false, Ordering::SeqCst);
                                self.status.detail.lock().unwrap().0 = Some(BridgeError::StreamClosed.to_string());
                                break;
                            }
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::events::EventHub;
    use crate::state::StateStore;
    use std::collections::VecDeque;
    use tokio::sync::Mutex as TokioMutex;

    struct ScriptedTransport {
        connect_failures_remaining: u32,
        messages: Arc<TokioMutex<VecDeque<GatewayMessage>>>,
    }

    #[async_trait]
    impl GatewayTransport for ScriptedTransport {
        async fn connect(&mut self) -> BridgeResult<()> {
            if self.connect_failures_remaining > 0 {
                self.connect_failures_remaining -= 1;
                return Err(BridgeError::Connect("simulated".to_string()));
            }
            Ok(())
        }

        async fn recv(&mut self) -> Option<GatewayMessage> {
            self.messages.lock().await.pop_front()
        }
    }

    #[tokio::test]
    async fn reconnects_after_failures_and_delivers_messages() {
        let store = Arc::new(StateStore::new(100));
        let hub = EventHub::new(256, None);
        let tracker = WorkerTracker::new(store.clone(), hub, Config::default());
        let bridge = GatewayBridge::new();

        let mut queue = VecDeque::new();
        queue.push_back(GatewayMessage {
            session_key: "subagent:sess-1".to_string(),
            phase: LifecyclePhase::Start,
            started_at: Utc::now(),
        });
        let messages = Arc::new(TokioMutex::new(queue));

        let transport = ScriptedTransport { connect_failures_remaining: 1, messages: messages.clone() };
        let cancel = CancellationToken::new();
        let cancel_clone = cancel.clone();

        let handle = tokio::spawn(async move {
            bridge.run(transport, tracker, cancel_clone).await;
        });

        tokio::time::sleep(Duration::from_millis(1200)).await;
        cancel.cancel();
        let _ = tokio::time::timeout(Duration::from_secs(2), handle).await;

        let snapshot = store.snapshot().unwrap();
        // A buffered start with no registration yet produces no worker, but
        // must not error the bridge loop.
        assert!(snapshot.workers.is_empty());
    }

    #[tokio::test]
    async fn non_mission_sessions_are_ignored() {
        let store = Arc::new(StateStore::new(100));
        let hub = EventHub::new(256, None);
        let tracker = WorkerTracker::new(store.clone(), hub, Config::default());
        let worker_id = tracker.register("subagent:sess-1", "t1", "developer", "z", "sonnet").await.unwrap();

        let mut queue = VecDeque::new();
        queue.push_back(GatewayMessage {
            session_key: "orchestrator:foo".to_string(),
            phase: LifecyclePhase::End,
            started_at: Utc::now(),
        });
        let messages = Arc::new(TokioMutex::new(queue));

        let bridge = GatewayBridge::new();
        let transport = ScriptedTransport { connect_failures_remaining: 0, messages: messages.clone() };
        let cancel = CancellationToken::new();
        let cancel_clone = cancel.clone();

        let handle = tokio::spawn(async move {
            bridge.run(transport, tracker, cancel_clone).await;
        });

        tokio::time::sleep(Duration::from_millis(300)).await;
        cancel.cancel();
        let _ = tokio::time::timeout(Duration::from_secs(2), handle).await;

        // The non-mission "end" message must not have completed the
        // already-registered worker.
        let snapshot = store.snapshot().unwrap();
        assert_eq!(snapshot.workers[&worker_id].status, crate::model::WorkerStatus::Running);
    }
}
