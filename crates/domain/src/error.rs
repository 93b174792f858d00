/// Shared error type used across all Switchyard crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("config: {0}")]
    Config(String),

    /// A turn or compaction attempt raced an already-running turn.
    #[error("session {0} is locked — a turn is already in progress")]
    SessionLocked(String),

    /// Cooperative cancellation fired. Never retried; finalizes the
    /// current assistant message.
    #[error("aborted")]
    Aborted,

    /// A permission request was rejected by the operator (or by session
    /// teardown). Recovered locally: the tool call that asked becomes an
    /// error part and the turn continues.
    #[error("{}", Rejected::render(.0))]
    PermissionRejected(Rejected),

    /// Provider-side failure. `retryable` routes the turn into the
    /// backoff policy; fatal errors terminate the turn.
    #[error("provider {provider}: {message}")]
    Provider {
        provider: String,
        message: String,
        retryable: bool,
        /// Server-supplied retry hint in seconds, when present.
        retry_after: Option<u64>,
    },

    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("agent not found: {0}")]
    AgentNotFound(String),

    #[error("permission not found: {0}")]
    PermissionNotFound(String),

    #[error("tool not found: {0}")]
    ToolNotFound(String),

    #[error("invalid PIN")]
    InvalidPin,

    #[error("validation: {0}")]
    Validation(String),

    #[error("{0}")]
    Other(String),
}

/// Payload carried by a permission rejection.
#[derive(Debug, Clone, Default)]
pub struct Rejected {
    pub session_id: String,
    pub permission_id: String,
    pub call_id: Option<String>,
    pub metadata: serde_json::Value,
    /// Operator-supplied reason, surfaced verbatim to the model.
    pub message: Option<String>,
}

impl Rejected {
    fn render(r: &Rejected) -> String {
        let base = match &r.message {
            Some(m) => format!("{m}\n\nThe user rejected the permission request."),
            None => "The user rejected the permission request.".to_string(),
        };
        // A rejected plan carries a re-submission hint so the model knows
        // the plan tool is still available.
        if r.metadata.get("plan_id").is_some() {
            format!("{base} You may revise the plan and submit it again.")
        } else {
            base
        }
    }
}

impl Error {
    /// True when the retry policy should absorb this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Provider { retryable: true, .. })
    }

    pub fn retry_after(&self) -> Option<u64> {
        match self {
            Error::Provider { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    pub fn rejected(&self) -> Option<&Rejected> {
        match self {
            Error::PermissionRejected(r) => Some(r),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
