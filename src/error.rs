use thiserror::Error;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("{0} missing or empty (set it in the environment or .env)")]
    MissingCredential(&'static str),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("upstream returned status {0}")]
    UpstreamStatus(u16),

    #[error("upstream returned an empty body")]
    EmptyBody,

    #[error("malformed tick frame: {0}")]
    MalformedFrame(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type RelayResult<T> = Result<T, RelayError>;
