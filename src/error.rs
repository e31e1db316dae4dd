use std::net::SocketAddr;

/// Fatal hub setup failures; these end the process
#[derive(Debug, thiserror::Error)]
pub enum HubError {
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("Server error: {0}")]
    Serve(#[from] std::io::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Client-side failures (reconnector and push client)
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("WebSocket connect failed: {0}")]
    Connect(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Connect timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Hub rejected request with status {0}")]
    Rejected(reqwest::StatusCode),

    #[error("Reconnector has shut down")]
    Closed,
}
