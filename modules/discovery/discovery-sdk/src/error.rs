//! Error types surfaced by the external capabilities.

/// Error type for OCI and OCM access.
#[derive(Debug, thiserror::Error)]
pub enum OcmError {
    /// Network connection to the registry failed.
    #[error("connection error: {0}")]
    Connection(String),

    /// Request exceeded its deadline.
    #[error("timeout: {0}")]
    Timeout(String),

    /// The registry answered with an error status.
    #[error("HTTP {status} from {url}")]
    Http { status: u16, url: String },

    /// Component, version, or blob does not exist.
    #[error("not found: {reference}")]
    NotFound { reference: String },

    /// Manifest, descriptor, or archive could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),

    /// Anything the layers below did not classify.
    #[error("{0}")]
    Other(String),
}

impl OcmError {
    /// Whether a retry with backoff may succeed.
    ///
    /// Typed variants are classified directly; opaque error text falls back
    /// to the substring rules the upstream wrapping is known to produce
    /// (`429`, `too many requests`, `connection refused`).
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Connection(_) | Self::Timeout(_) => true,
            Self::Http { status, .. } => *status == 429,
            Self::NotFound { .. } | Self::Decode(_) => false,
            Self::Other(text) => transient_by_text(text),
        }
    }
}

/// Substring-based transient classification for opaque error text.
#[must_use]
pub fn transient_by_text(text: &str) -> bool {
    let text = text.to_lowercase();
    text.contains("429") || text.contains("too many requests") || text.contains("connection refused")
}

/// Error type for catalog store operations.
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    /// No record with the requested name exists in the namespace.
    #[error("record not found")]
    NotFound,

    /// A record with the requested name already exists.
    #[error("record already exists: {0}")]
    Conflict(String),

    /// The store could not be reached.
    #[error("catalog unavailable: {0}")]
    Unavailable(String),

    /// The store rejected the operation.
    #[error("catalog error: {0}")]
    Internal(String),
}
