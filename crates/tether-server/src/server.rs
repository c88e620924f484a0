//! HTTP endpoint implementation using Axum.
//!
//! One route serves two audiences: a request carrying a WebSocket upgrade
//! becomes a bridge session, and any other request receives the bootstrap
//! payload that tells a not-yet-connected peer how to connect back as a
//! duplex client.

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::{header, HeaderMap, Uri};
use axum::response::{IntoResponse, Response};
use axum::Router;
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use tether_core::bootstrap::bootstrap_payload;
use tether_core::Session;
use tokio::sync::mpsc;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

/// Hook invoked with every established session.
pub type ConnectionHook = Arc<dyn Fn(Session) + Send + Sync>;

/// Application state shared across handlers.
pub struct AppState {
    /// Client-side bootstrap script, served beneath the connection-URL line.
    pub script: String,
    /// Called once per upgraded connection.
    pub on_connection: ConnectionHook,
}

/// Start the bridge endpoint.
///
/// Returns the actual address the server is bound to (useful when port=0).
pub async fn start_server(
    host: &str,
    port: u16,
    script: String,
    on_connection: ConnectionHook,
) -> anyhow::Result<SocketAddr> {
    let state = Arc::new(AppState {
        script,
        on_connection,
    });

    // Every path is served: the connection URL echoes the request path back
    // to the peer, so the endpoint must answer wherever it is mounted.
    let app = Router::new()
        .fallback(handle_request)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let actual_addr = listener.local_addr()?;

    info!("Bridge endpoint listening on {}", actual_addr);

    tokio::spawn(async move {
        axum::serve(listener, app)
            .await
            .expect("Server error");
    });

    Ok(actual_addr)
}

/// Single entry point: upgrade to a session, or serve the bootstrap payload.
async fn handle_request(
    State(state): State<Arc<AppState>>,
    ws: Option<WebSocketUpgrade>,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    if let Some(upgrade) = ws {
        return upgrade.on_upgrade(move |socket| handle_socket(socket, state));
    }

    let host = headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("localhost");
    // Plain HTTP itself is never secure; honor the proxy header so peers
    // behind a TLS terminator get a wss:// URL.
    let secure = headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .map(|proto| proto == "https" || proto == "wss")
        .unwrap_or(false);

    bootstrap_payload(secure, host, uri.path(), &state.script).into_response()
}

/// Drive one WebSocket connection as a bridge session.
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<String>();
    let session = Session::new(outbound_tx);

    (state.on_connection)(session.clone());

    let writer = tokio::spawn(async move {
        while let Some(frame) = outbound_rx.recv().await {
            if ws_tx.send(WsMessage::Text(frame)).await.is_err() {
                break;
            }
        }
    });

    while let Some(received) = ws_rx.next().await {
        match received {
            Ok(WsMessage::Text(text)) => session.handle_frame(&text),
            Ok(WsMessage::Close(_)) => break,
            Ok(_) => {} // binary, ping, pong: not part of the protocol
            Err(e) => {
                debug!("connection error: {e}");
                break;
            }
        }
    }

    session.handle_close();
    writer.abort();
}
