//! PixelGrid Table Server
//!
//! Authoritative in-memory pixel table. Clients subscribe to the table and
//! receive every row change; mutations go through reducers.
//!
//! ## Protocol
//!
//! Messages are JSON with the following format:
//! ```json
//! { "type": "subscribe", "query": "SELECT * FROM pixel" }
//! { "type": "paint", "positions": [0, 1], "color": "#ff0000" }
//! { "type": "row_updated", "row": { "position": 0, "color": "#ff0000", ... } }
//! ```

mod config;
mod state;

use axum::{
    Router,
    extract::{
        Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use config::ServerConfig;
use futures_util::{SinkExt, StreamExt, stream::SplitSink};
use pixelgrid_core::protocol::{ClientMessage, ServerMessage};
use serde::Deserialize;
use state::AppState;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{debug, info, warn};
use uuid::Uuid;

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pixelgrid_server=info,tower_http=info".into()),
        )
        .init();

    let config = ServerConfig::from_env();
    let state = Arc::new(AppState::new(&config));

    let app = Router::new()
        .route("/", get(index))
        .route("/ws", get(ws_handler))
        .route("/health", get(health))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    info!("PixelGrid table server listening on {}", config.addr);
    info!("WebSocket endpoint: ws://{}/ws", config.addr);
    if config.token.is_some() {
        info!("Connections require a token");
    }

    let listener = tokio::net::TcpListener::bind(config.addr).await.expect("failed to bind listener");
    axum::serve(listener, app).await.expect("server error");
}

/// Index page
async fn index() -> &'static str {
    "PixelGrid Table Server - Connect via WebSocket at /ws"
}

/// Health check
async fn health() -> &'static str {
    "ok"
}

#[derive(Debug, Deserialize)]
struct ConnectParams {
    token: Option<String>,
}

/// WebSocket upgrade handler
async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<ConnectParams>,
    State(state): State<Arc<AppState>>,
) -> Response {
    if !state.authorize(params.token.as_deref()) {
        warn!("Rejected connection with missing or invalid token");
        return StatusCode::UNAUTHORIZED.into_response();
    }
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

type Sender = SplitSink<WebSocket, Message>;

/// Serialize and send one message. Returns false when the socket is gone.
async fn send(sender: &mut Sender, msg: &ServerMessage) -> bool {
    let json = match serde_json::to_string(msg) {
        Ok(json) => json,
        Err(e) => {
            warn!("Failed to encode server message: {}", e);
            return true;
        }
    };
    sender.send(Message::Text(json.into())).await.is_ok()
}

/// Run one reducer call and produce the direct reply, if any.
fn dispatch(state: &AppState, identity: &str, msg: ClientMessage, subscribed: &mut bool) -> Option<ServerMessage> {
    let failed = |reducer: &str, message: String| {
        debug!("Reducer {} failed for {}: {}", reducer, identity, message);
        Some(ServerMessage::ReducerFailed { reducer: reducer.to_string(), message })
    };

    match msg {
        ClientMessage::Subscribe { query } => match state.subscribe(identity, &query) {
            Ok(rows) => {
                *subscribed = true;
                Some(ServerMessage::SubscriptionApplied { rows })
            }
            Err(e) => failed("subscribe", e),
        },
        ClientMessage::Paint { positions, color } => {
            match state.paint(identity, &positions, color.as_deref()) {
                Ok(_) => None,
                Err(e) => failed("paint", e),
            }
        }
        ClientMessage::ClearGrid => match state.clear_grid(identity) {
            Ok(_) => None,
            Err(e) => failed("clear_grid", e),
        },
        ClientMessage::SyncIdentity { external_id, email, username } => {
            match state.sync_identity(identity, external_id, email, username) {
                Ok(()) => None,
                Err(e) => failed("sync_identity", e),
            }
        }
    }
}

/// Handle a WebSocket connection
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let identity = Uuid::new_v4().to_string();
    let (mut sender, mut receiver) = socket.split();
    let mut rows_rx = state.connect(&identity);
    let mut subscribed = false;

    if !send(&mut sender, &ServerMessage::Connected { identity: identity.clone() }).await {
        state.disconnect(&identity);
        return;
    }

    loop {
        tokio::select! {
            // Handle incoming messages from client
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let reply = match serde_json::from_str::<ClientMessage>(&text) {
                            Ok(client_msg) => {
                                if matches!(client_msg, ClientMessage::Subscribe { .. }) {
                                    // Events queued before the snapshot is read are already in it.
                                    rows_rx = rows_rx.resubscribe();
                                }
                                dispatch(&state, &identity, client_msg, &mut subscribed)
                            }
                            Err(e) => {
                                warn!("Invalid message from {}: {}", identity, e);
                                Some(ServerMessage::Error { message: format!("Invalid message: {}", e) })
                            }
                        };
                        if let Some(reply) = reply {
                            if !send(&mut sender, &reply).await {
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        break;
                    }
                    Some(Ok(_)) => {} // Ignore binary/ping/pong
                    Some(Err(e)) => {
                        warn!("WebSocket error for {}: {}", identity, e);
                        break;
                    }
                }
            }

            // Forward row events once subscribed
            event = rows_rx.recv() => {
                let outgoing = match event {
                    Ok(_) if !subscribed => continue,
                    Ok(event) => event,
                    Err(RecvError::Lagged(skipped)) => {
                        if !subscribed {
                            continue;
                        }
                        warn!("Client {} lagged by {} events; resending table", identity, skipped);
                        ServerMessage::SubscriptionApplied { rows: state.rows() }
                    }
                    Err(RecvError::Closed) => break,
                };
                if !send(&mut sender, &outgoing).await {
                    break;
                }
            }
        }
    }

    state.disconnect(&identity);
}
