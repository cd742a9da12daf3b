use thiserror::Error;

/// Application error types.
#[derive(Error, Debug)]
pub enum SeederError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("could not connect to {peer}: {source}")]
    Connect {
        peer: String,
        source: std::io::Error,
    },

    #[error("handshake with {peer} failed: {reason}")]
    Handshake { peer: String, reason: String },

    #[error("timed out waiting for {command} from {peer}")]
    Timeout {
        peer: String,
        command: &'static str,
    },

    #[error("wire error: {0}")]
    Wire(String),

    #[error("invalid subnetwork id: {0}")]
    Subnetwork(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for the wire and probe layers.
pub type Result<T> = std::result::Result<T, SeederError>;
