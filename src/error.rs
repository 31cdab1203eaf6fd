//! Failure taxonomy for the retrieval core.
//!
//! Lookups that can legitimately miss (cache entries, per-file indexes)
//! return `Option` and never produce an error. The variants below cover
//! everything else:
//!
//! | Variant | Meaning | Caller action |
//! |---------|---------|---------------|
//! | [`Validation`](RetrievalError::Validation) | malformed vectors in a similarity computation | skip the candidate |
//! | [`Upstream`](RetrievalError::Upstream) | embedding provider or vector store failed | abort the query |
//! | [`EmptyResult`](RetrievalError::EmptyResult) | retrieval produced zero usable chunks | report "no relevant content" |
//! | [`InvalidIdentifier`](RetrievalError::InvalidIdentifier) | empty or malformed file/chunk id | programmer error |

/// Errors surfaced by the retrieval core.
#[derive(Debug, thiserror::Error)]
pub enum RetrievalError {
    #[error("invalid vectors: {reason}")]
    Validation { reason: String },

    #[error("upstream failure during {operation}: {message}")]
    Upstream { operation: String, message: String },

    #[error("no relevant content found for query: {query}")]
    EmptyResult { query: String },

    #[error("invalid identifier: {0:?}")]
    InvalidIdentifier(String),
}

impl RetrievalError {
    pub fn validation(reason: impl Into<String>) -> Self {
        Self::Validation {
            reason: reason.into(),
        }
    }

    /// Wrap a collaborator failure. The full `anyhow` chain is flattened
    /// into the message.
    pub fn upstream(operation: impl Into<String>, err: &anyhow::Error) -> Self {
        Self::Upstream {
            operation: operation.into(),
            message: format!("{:#}", err),
        }
    }

    pub fn is_empty_result(&self) -> bool {
        matches!(self, Self::EmptyResult { .. })
    }
}

pub type RetrievalResult<T> = std::result::Result<T, RetrievalError>;

/// Reject empty identifiers before they reach a cache or index.
pub fn ensure_identifier(id: &str) -> RetrievalResult<()> {
    if id.trim().is_empty() {
        return Err(RetrievalError::InvalidIdentifier(id.to_string()));
    }
    Ok(())
}
