/// Error types shared across the wiki service crates.
///
/// These errors represent failures talking to the upstream APIs (Wikipedia, the
/// chat-completion host) and persisting the usage counters. Completion calls keep their
/// own `CompletionClientError` so callers can tell the two upstreams apart.
#[derive(Debug, thiserror::Error)]
pub enum CommonError {
    #[error("{service} upstream error: {message}")]
    Upstream {
        service: &'static str,
        message: String,
    },

    #[error("http client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CommonError {
    pub fn upstream(service: &'static str, message: impl std::fmt::Display) -> Self {
        Self::Upstream {
            service,
            message: message.to_string(),
        }
    }
}
