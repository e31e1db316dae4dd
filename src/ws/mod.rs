pub mod handlers;

use axum::{
    body::Bytes,
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        ConnectInfo, State,
    },
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use futures::{
    sink::{Sink, SinkExt},
    stream::StreamExt,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::hub::ConnectionHub;
use crate::registry::{Connection, Outbound};
use crate::types::ConnectionInfo;
use handlers::SessionState;

/// WebSocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    State(hub): State<Arc<ConnectionHub>>,
) -> Response {
    if hub.is_shutting_down() {
        return (StatusCode::SERVICE_UNAVAILABLE, "Shutting down").into_response();
    }

    let user_agent = headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    tracing::debug!(%addr, ?user_agent, "WebSocket connection request");

    let info = ConnectionInfo::new(Some(addr), user_agent);
    ws.on_upgrade(move |socket| handle_socket(socket, info, hub))
}

fn to_frame(outbound: Outbound) -> Message {
    match outbound {
        Outbound::Text(text) => Message::Text(text.into()),
        Outbound::Ping => Message::Ping(Bytes::new()),
    }
}

/// Drain the connection's queue into the socket until it is terminated.
///
/// Frames queued before termination are still flushed ahead of the Close
/// frame, so a broadcast counted as delivered reaches the socket.
async fn write_loop<S>(
    mut sender: S,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    conn: Arc<Connection>,
) where
    S: Sink<Message> + Unpin,
    S::Error: std::fmt::Display,
{
    loop {
        tokio::select! {
            biased;
            _ = conn.closed() => {
                while let Ok(frame) = outbound.try_recv() {
                    if sender.send(to_frame(frame)).await.is_err() {
                        return;
                    }
                }
                break;
            }
            frame = outbound.recv() => {
                let Some(frame) = frame else { break };
                if let Err(e) = sender.send(to_frame(frame)).await {
                    tracing::warn!(client_id = %conn.id(), "WebSocket send failed: {}", e);
                    conn.terminate();
                    return;
                }
            }
        }
    }

    // Best effort, the peer may already be gone
    let _ = sender.send(Message::Close(None)).await;
}

/// Handle individual WebSocket connection
async fn handle_socket(socket: WebSocket, info: ConnectionInfo, hub: Arc<ConnectionHub>) {
    let (sender, mut receiver) = socket.split();
    let (tx, rx) = mpsc::unbounded_channel();

    let conn = hub.register(info, tx).await;
    let id = conn.id().clone();
    let writer = tokio::spawn(write_loop(sender, rx, conn.clone()));
    let mut state = SessionState::Connected;

    let reason = loop {
        tokio::select! {
            _ = conn.closed() => break "terminated",

            ws_msg = receiver.next() => {
                let reply = match ws_msg {
                    Some(Ok(Message::Text(text))) => {
                        handlers::handle_message(&conn, &mut state, text.as_str())
                    }
                    Some(Ok(Message::Binary(data))) => {
                        handlers::handle_binary(&conn, &mut state, &data)
                    }
                    Some(Ok(Message::Pong(_))) => {
                        conn.mark_alive();
                        None
                    }
                    // Pings are answered by the websocket layer
                    Some(Ok(Message::Ping(_))) => None,
                    Some(Ok(Message::Close(_))) => break "closed by client",
                    Some(Err(e)) => {
                        tracing::error!(client_id = %id, "WebSocket error: {}", e);
                        break "transport error";
                    }
                    None => break "stream ended",
                };

                if let Some(reply) = reply {
                    if !conn.send_message(&reply) {
                        break "send failed";
                    }
                }
            }
        }
    };

    state = SessionState::Closed;
    hub.disconnect(&id, reason).await;
    conn.terminate();
    if let Err(e) = writer.await {
        tracing::error!(client_id = %id, "Writer task failed: {}", e);
    }
    tracing::debug!(client_id = %id, ?state, "WebSocket session finished");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::test_support::connection;
    use futures::channel::mpsc as sink_channel;

    fn text_of(msg: &Message) -> Option<&str> {
        match msg {
            Message::Text(text) => Some(text.as_str()),
            _ => None,
        }
    }

    #[tokio::test]
    async fn test_queued_frames_flush_before_close() {
        let (conn, _unused) = connection();
        let conn = Arc::new(conn);
        let (tx, rx) = mpsc::unbounded_channel();
        let (sink, socket) = sink_channel::unbounded::<Message>();

        // Queued, then terminated before the writer ever runs
        tx.send(Outbound::Text("first".to_string())).unwrap();
        tx.send(Outbound::Text("second".to_string())).unwrap();
        conn.terminate();

        write_loop(sink, rx, conn).await;

        let frames: Vec<Message> = socket.collect().await;
        assert_eq!(frames.len(), 3);
        assert_eq!(text_of(&frames[0]), Some("first"));
        assert_eq!(text_of(&frames[1]), Some("second"));
        assert!(matches!(frames[2], Message::Close(None)));
    }

    #[tokio::test]
    async fn test_writer_stops_when_queue_closes() {
        let (conn, _unused) = connection();
        let conn = Arc::new(conn);
        let (tx, rx) = mpsc::unbounded_channel();
        let (sink, socket) = sink_channel::unbounded::<Message>();

        tx.send(Outbound::Ping).unwrap();
        drop(tx);
        write_loop(sink, rx, conn).await;

        let frames: Vec<Message> = socket.collect().await;
        assert_eq!(frames.len(), 2);
        assert!(matches!(frames[0], Message::Ping(_)));
        assert!(matches!(frames[1], Message::Close(None)));
    }
}
