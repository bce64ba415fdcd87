//! Error taxonomy for reconciliation
//!
//! Gateway implementations work with `anyhow` internally and map failures
//! into [`SyncError`] at the trait boundary so the reconcilers can react to
//! the kind of failure (e.g. a rejected continuation token).

/// Errors surfaced by the reconciliation engine and its gateways
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// The remote source could not be reached or returned an error (transient)
    #[error("Source fetch failed: {message}")]
    SourceFetch { message: String },

    /// The remote source refused our credentials (operator action required)
    #[error("Source authentication failed: {message}")]
    SourceAuth { message: String },

    /// A local store read or write failed
    #[error("Store write failed: {message}")]
    StoreWrite { message: String },

    /// The source rejected the continuation token
    #[error("Continuation token rejected by source")]
    TokenInvalid,

    /// A resource is already subscribed under a different notification URL
    #[error("Subscription conflict for {resource}")]
    SubscriptionConflict { resource: String },

    /// An inbound notification could not be parsed or validated
    #[error("Malformed notification: {message}")]
    MalformedNotification { message: String },

    /// An inbound notification names a resource that is not configured
    #[error("Unknown resource: {descriptor}")]
    UnknownResource { descriptor: String },

    /// Configuration failed load-time validation
    #[error("Configuration error: {message}")]
    Config { message: String },
}

impl SyncError {
    pub fn source_fetch(err: impl std::fmt::Display) -> Self {
        SyncError::SourceFetch {
            message: err.to_string(),
        }
    }

    pub fn store(err: impl std::fmt::Display) -> Self {
        SyncError::StoreWrite {
            message: err.to_string(),
        }
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        SyncError::MalformedNotification {
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        SyncError::Config {
            message: message.into(),
        }
    }

    /// Whether the error requires operator action rather than a retry
    pub fn is_fatal(&self) -> bool {
        matches!(self, SyncError::SourceAuth { .. } | SyncError::Config { .. })
    }
}

impl From<rusqlite::Error> for SyncError {
    fn from(e: rusqlite::Error) -> Self {
        SyncError::store(e)
    }
}

/// Store errors carry the whole context chain (`{:#}`) so the failing
/// statement and item id survive the conversion.
impl From<anyhow::Error> for SyncError {
    fn from(e: anyhow::Error) -> Self {
        match e.downcast::<SyncError>() {
            Ok(sync_error) => sync_error,
            Err(e) => SyncError::StoreWrite {
                message: format!("{:#}", e),
            },
        }
    }
}

pub type Result<T, E = SyncError> = std::result::Result<T, E>;
