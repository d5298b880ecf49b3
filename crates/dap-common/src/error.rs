//! Error types for DAP client operations.

use thiserror::Error;

/// Result type alias using DapError.
pub type DapResult<T> = Result<T, DapError>;

/// Errors raised by the external HTTP transport.
///
/// These are surfaced verbatim; the client never retries them.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("client error {status}: {body}")]
    Client { status: u16, body: String },

    #[error("server error {status}: {body}")]
    Server { status: u16, body: String },

    #[error(
        "redirect error {status}: {body}\n\nRedirects are followed by the transport; \
         this is most likely a circular redirect."
    )]
    Redirect { status: u16, body: String },

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("request failed: {0}")]
    Request(String),
}

impl TransportError {
    /// HTTP status attached to the error, when there is one.
    pub fn status(&self) -> Option<u16> {
        match self {
            TransportError::Client { status, .. }
            | TransportError::Server { status, .. }
            | TransportError::Redirect { status, .. } => Some(*status),
            TransportError::Timeout(_) | TransportError::Request(_) => None,
        }
    }
}

/// Primary error type for DAP operations.
#[derive(Debug, Error)]
pub enum DapError {
    // === Constraint Errors ===
    #[error("constraint expression error: {0}")]
    Constraint(String),

    #[error("ambiguous shorthand notation request: {0}")]
    AmbiguousShorthand(String),

    #[error("index error: {0}")]
    Index(String),

    // === Metadata Errors ===
    #[error("failed to parse {kind}: {message}")]
    Parse { kind: &'static str, message: String },

    #[error("unknown data type: {0}")]
    UnknownType(String),

    #[error("variable not found: {0}")]
    VariableNotFound(String),

    #[error("no data bound to variable: {0}")]
    NoData(String),

    // === Decode Errors ===
    #[error("protocol decode error: {0}")]
    Decode(String),

    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("server reported an error: {0}")]
    Remote(String),

    // === Infrastructure Errors ===
    #[error("extension not supported: {0}")]
    UnsupportedExtension(String),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl DapError {
    /// Create a Parse error for the given document kind (DDS, DAS, DMR...).
    pub fn parse(kind: &'static str, message: impl Into<String>) -> Self {
        Self::Parse {
            kind,
            message: message.into(),
        }
    }

    /// Create a Decode error.
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode(message.into())
    }

    /// Create a Constraint error.
    pub fn constraint(message: impl Into<String>) -> Self {
        Self::Constraint(message.into())
    }

    /// Create an Index error.
    pub fn index(message: impl Into<String>) -> Self {
        Self::Index(message.into())
    }

    /// Decode error raised when a variable's payload does not match its
    /// declared shape, usually because the server truncated the response.
    pub fn truncated(id: &str, expected: usize, actual: usize) -> Self {
        Self::Decode(format!(
            "variable {id} could not be properly retrieved: expected {expected} elements, \
             got {actual}. To avoid this error consider opening the dataset with \
             output_grid disabled and requesting a narrower slice."
        ))
    }

    /// Whether the error came from a constraint or index expression and was
    /// raised before any network access.
    pub fn is_constraint_error(&self) -> bool {
        matches!(
            self,
            DapError::Constraint(_) | DapError::AmbiguousShorthand(_) | DapError::Index(_)
        )
    }
}

impl From<serde_json::Error> for DapError {
    fn from(err: serde_json::Error) -> Self {
        DapError::decode(format!("JSON error: {}", err))
    }
}
