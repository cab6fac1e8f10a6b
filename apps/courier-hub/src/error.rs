/// Why a new connection was turned away before registration.
#[derive(Debug, thiserror::Error)]
pub enum HandshakeError {
    #[error("first frame did not match the shared secret")]
    SecretMismatch,
    #[error("no shared secret received within {0:?}")]
    Timeout(std::time::Duration),
    #[error("connection closed before the shared secret was sent")]
    Closed,
    #[error("transport error during handshake: {0}")]
    Transport(#[from] axum::Error),
}

impl HandshakeError {
    /// WebSocket close code sent to the peer (4000-range, application level).
    pub fn close_code(&self) -> u16 {
        match self {
            HandshakeError::Timeout(_) => CLOSE_HANDSHAKE_TIMEOUT,
            _ => CLOSE_AUTH_FAILED,
        }
    }

    pub fn close_reason(&self) -> &'static str {
        match self {
            HandshakeError::Timeout(_) => "Handshake timeout",
            _ => "Authentication failed",
        }
    }
}

pub const CLOSE_NORMAL: u16 = 1000;
pub const CLOSE_AUTH_FAILED: u16 = 4004;
pub const CLOSE_HANDSHAKE_TIMEOUT: u16 = 4009;
