//! Error taxonomy for the graph client.
//!
//! The client classifies failures once; callers decide whether to retry.
//! No retry happens at this layer.

/// Classified graph-call failure.
#[derive(Debug, Clone)]
pub enum GraphError {
    /// Transport or handshake failure; the graph endpoint is unreachable.
    Unavailable(String),
    /// Timeout or retryable server error on a single call.
    Transient(String),
    /// An element the operation required does not exist.
    NotFound(String),
    /// Duplicate `txn_id` or conflicting write.
    Conflict(String),
    /// Unrecoverable server or protocol error.
    Fatal(String),
}

impl GraphError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Unavailable(_) => "unavailable",
            Self::Transient(_) => "transient",
            Self::NotFound(_) => "not_found",
            Self::Conflict(_) => "conflict",
            Self::Fatal(_) => "fatal",
        }
    }

    /// Classify a Gremlin server status code outside the success range.
    ///
    /// 598 is the server-side evaluation timeout; 597 carries script
    /// errors whose message distinguishes timeouts from real failures.
    pub fn from_status(code: u16, message: &str) -> Self {
        match code {
            598 => Self::Transient(format!("server evaluation timeout: {message}")),
            597 | 500 => {
                let lower = message.to_ascii_lowercase();
                if lower.contains("timeout") || lower.contains("retry") {
                    Self::Transient(format!("server error {code}: {message}"))
                } else if lower.contains("duplicate") || lower.contains("already exists") {
                    Self::Conflict(format!("server error {code}: {message}"))
                } else {
                    Self::Fatal(format!("server error {code}: {message}"))
                }
            }
            401 | 403 | 407 => Self::Fatal(format!("auth failure {code}: {message}")),
            _ => Self::Fatal(format!("unexpected status {code}: {message}")),
        }
    }
}

impl std::fmt::Display for GraphError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unavailable(m) => write!(f, "graph unavailable: {m}"),
            Self::Transient(m) => write!(f, "transient graph error: {m}"),
            Self::NotFound(m) => write!(f, "not found: {m}"),
            Self::Conflict(m) => write!(f, "conflict: {m}"),
            Self::Fatal(m) => write!(f, "fatal graph error: {m}"),
        }
    }
}

impl std::error::Error for GraphError {}
