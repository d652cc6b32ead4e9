use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(String),

    #[error("unable to decode datasource settings: {0}")]
    ConfigDecode(String),

    #[error("unable to decode query '{ref_id}': {message}")]
    QueryDecode { ref_id: String, message: String },

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("unexpected upstream response: {0}")]
    Protocol(String),

    #[error("request cancelled")]
    Cancelled,

    #[error(
        "fetching costs for subscription '{subscription_id}' over [{}, {}): {source}",
        .start.format("%Y-%m-%d"),
        .end.format("%Y-%m-%d")
    )]
    Fetch {
        subscription_id: String,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        #[source]
        source: Box<AppError>,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Settings(#[from] config::ConfigError),

    #[error(transparent)]
    Keyring(#[from] keyring::Error),

    #[error(transparent)]
    TomlSer(#[from] toml::ser::Error),
}

impl AppError {
    pub fn query_decode(ref_id: &str, message: impl Into<String>) -> Self {
        AppError::QueryDecode {
            ref_id: ref_id.to_string(),
            message: message.into(),
        }
    }

    /// Strips context wrappers and returns the error that caused the failure.
    pub fn root(&self) -> &AppError {
        match self {
            AppError::Fetch { source, .. } => source.root(),
            other => other,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.root(), AppError::Cancelled)
    }
}
