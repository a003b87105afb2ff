/// Shared error type used across all channel-gateway crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("no seed configured")]
    NoSeed,

    #[error("index {0} is already being created")]
    AlreadyPending(u32),

    #[error("session already connected: {0}")]
    AlreadyConnected(String),

    #[error("{what} not found: {key}")]
    NotFound { what: &'static str, key: String },

    #[error("invalid parameter: {0}")]
    InvalidParam(String),

    #[error("channel connect failed: {0}")]
    UpstreamConnect(String),

    #[error("channel call {method} failed: {message}")]
    UpstreamCall { method: String, message: String },

    #[error("seed changed while deriving wallet {0}")]
    SeedChanged(u32),

    #[error("store: {0}")]
    Store(String),

    #[error("HTTP: {0}")]
    Http(String),

    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn not_found(what: &'static str, key: impl Into<String>) -> Self {
        Self::NotFound {
            what,
            key: key.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_message_names_the_kind() {
        let err = Error::not_found("subscription", "abc");
        assert_eq!(err.to_string(), "subscription not found: abc");
    }

    #[test]
    fn upstream_call_message_includes_method() {
        let err = Error::UpstreamCall {
            method: "deposit".into(),
            message: "HTTP 500".into(),
        };
        assert_eq!(err.to_string(), "channel call deposit failed: HTTP 500");
    }
}
