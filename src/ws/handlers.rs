//! Inbound frame routing
//!
//! Each frame is decoded, dispatched by kind, and answered on the same
//! connection. A bad frame earns an error reply but never closes the session.

use crate::protocol::{ClientMessage, ServerMessage};
use crate::registry::Connection;

/// Per-connection routing state; `Closed` is terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connected,
    Active,
    Closed,
}

impl SessionState {
    fn on_message(self) -> Self {
        match self {
            SessionState::Closed => SessionState::Closed,
            _ => SessionState::Active,
        }
    }
}

/// Route one text frame and return the reply to send back
pub fn handle_message(
    conn: &Connection,
    state: &mut SessionState,
    text: &str,
) -> Option<ServerMessage> {
    if *state == SessionState::Closed {
        return None;
    }

    let msg = match ClientMessage::decode(text) {
        Ok(msg) => msg,
        Err(e) => {
            tracing::warn!(client_id = %conn.id(), "Failed to parse client message: {}", e);
            return Some(ServerMessage::malformed());
        }
    };

    conn.touch();
    *state = state.on_message();

    match msg {
        ClientMessage::Ping => {
            conn.mark_alive();
            Some(ServerMessage::pong())
        }
        ClientMessage::Unknown => {
            tracing::debug!(client_id = %conn.id(), "Received message: {}", text);
            Some(ServerMessage::acknowledge())
        }
    }
}

/// Route a binary frame. Browsers may send JSON as binary; anything that
/// is not UTF-8 is malformed.
pub fn handle_binary(
    conn: &Connection,
    state: &mut SessionState,
    data: &[u8],
) -> Option<ServerMessage> {
    match std::str::from_utf8(data) {
        Ok(text) => handle_message(conn, state, text),
        Err(_) if *state == SessionState::Closed => None,
        Err(_) => Some(ServerMessage::malformed()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::test_support::connection;
    use std::time::Duration;

    #[test]
    fn test_ping_gets_pong_and_marks_alive() {
        let (conn, _rx) = connection();
        conn.take_alive();
        let mut state = SessionState::Connected;

        let reply = handle_message(&conn, &mut state, r#"{"type":"ping"}"#);
        assert!(matches!(reply, Some(ServerMessage::Pong { .. })));
        assert!(conn.is_alive());
        assert_eq!(state, SessionState::Active);
    }

    #[test]
    fn test_other_messages_are_acknowledged_without_liveness() {
        let (conn, _rx) = connection();
        conn.take_alive();
        let mut state = SessionState::Connected;

        let reply = handle_message(&conn, &mut state, r#"{"type":"chat","text":"hi"}"#);
        assert!(matches!(reply, Some(ServerMessage::Acknowledge { .. })));
        assert!(!conn.is_alive());
        assert_eq!(state, SessionState::Active);
    }

    #[test]
    fn test_malformed_frame_gets_error() {
        let (conn, _rx) = connection();
        let mut state = SessionState::Connected;

        let reply = handle_message(&conn, &mut state, "definitely not json");
        match reply {
            Some(ServerMessage::Error { message, .. }) => {
                assert_eq!(message, "Invalid message format")
            }
            other => panic!("Expected error reply, got {:?}", other),
        }
        assert_eq!(state, SessionState::Connected);
        assert!(!conn.is_terminated());
    }

    #[test]
    fn test_closed_session_ignores_frames() {
        let (conn, _rx) = connection();
        let mut state = SessionState::Closed;
        assert!(handle_message(&conn, &mut state, r#"{"type":"ping"}"#).is_none());
        assert_eq!(state, SessionState::Closed);
    }

    #[test]
    fn test_binary_frames() {
        let (conn, _rx) = connection();
        let mut state = SessionState::Connected;
        assert!(matches!(
            handle_binary(&conn, &mut state, br#"{"type":"ping"}"#),
            Some(ServerMessage::Pong { .. })
        ));
        assert!(matches!(
            handle_binary(&conn, &mut state, &[0xff, 0xfe]),
            Some(ServerMessage::Error { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_parsed_frames_update_activity() {
        let (conn, _rx) = connection();
        let mut state = SessionState::Connected;
        tokio::time::advance(Duration::from_secs(90)).await;

        handle_message(&conn, &mut state, "oops");
        assert!(conn.idle_for() >= Duration::from_secs(90));

        handle_message(&conn, &mut state, r#"{"type":"status"}"#);
        assert!(conn.idle_for() < Duration::from_secs(1));
    }
}
