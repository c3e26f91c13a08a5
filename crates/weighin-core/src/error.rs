//! Error types for weighin-core.
//!
//! Errors fall into four classes, and callers react to each differently:
//!
//! | Class | Variants | Storage touched? | Caller action |
//! |-------|----------|------------------|---------------|
//! | Validation | [`Error::Validation`], [`Error::InvalidRange`], [`Error::CrossMonthRange`], [`Error::OutOfScope`] | No | Fix the input |
//! | Upstream | [`Error::Http`], [`Error::ProviderStatus`], [`Error::Unauthorized`], [`Error::Provider`] | No | Retry the scope |
//! | Storage | [`Error::Store`], [`Error::Storage`] | Possibly partially | Retry the whole scope |
//! | Credential | [`Error::NoCredential`], [`Error::RotationWrite`], [`Error::CleanupIncomplete`] | See variant | See variant |
//!
//! Every reconciliation step is idempotent, so re-running a failed scope
//! converges to the same state as an uninterrupted run.

use thiserror::Error;

/// Errors produced by reconciliation, sync, and credential handling.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Malformed input: bad date, unknown metric or unit, missing period.
    #[error("Validation error: {0}")]
    Validation(#[from] weighin_types::ParseError),

    /// A range that cannot be partitioned (`start` not strictly before `end`).
    #[error("Invalid range: {start}..{end} (start must be before end)")]
    InvalidRange { start: String, end: String },

    /// A provider range request spanning more than one calendar month.
    #[error("Range {start}..{end} crosses a month boundary")]
    CrossMonthRange { start: String, end: String },

    /// A desired record does not belong to the scope being reconciled.
    #[error("Record {identity} is outside scope {scope}")]
    OutOfScope { scope: String, identity: String },

    /// Transport failure talking to the provider.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The provider answered with a non-success status.
    #[error("Provider returned HTTP {status}: {message}")]
    ProviderStatus { status: u16, message: String },

    /// The provider rejected the access token.
    #[error("Provider rejected the access token")]
    Unauthorized,

    /// Any other provider failure.
    #[error("Provider error: {0}")]
    Provider(String),

    /// SQLite failure.
    #[error("Storage error: {0}")]
    Store(#[from] weighin_store::Error),

    /// Failure from a non-SQLite record store.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Failure from the secret store.
    #[error("Secret store error: {0}")]
    Secret(String),

    /// No live version of the named credential exists.
    #[error("No credential stored under '{0}'")]
    NoCredential(String),

    /// A stored credential payload could not be decoded.
    #[error("Invalid credential: {0}")]
    InvalidCredential(#[from] serde_json::Error),

    /// The new credential version could not be written; the old version
    /// is still the live one.
    #[error("Failed to write new credential version: {source}")]
    RotationWrite {
        #[source]
        source: Box<Error>,
    },

    /// The new credential version is live but older versions may remain.
    #[error("Credential version {new_version} written but cleanup stopped: {source}")]
    CleanupIncomplete {
        new_version: i64,
        #[source]
        source: Box<Error>,
    },

    /// A range sync stopped at its first failing sub-range.
    ///
    /// `applied` counts records from sub-ranges that completed before the
    /// failure was observed; it is a lower bound.
    #[error("Range sync failed after {applied} records were applied: {source}")]
    PartialSync {
        applied: usize,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Create a provider error.
    pub fn provider(message: impl Into<String>) -> Self {
        Self::Provider(message.into())
    }

    /// Create a storage error for non-SQLite stores.
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage(message.into())
    }

    /// Create a secret store error.
    pub fn secret(message: impl Into<String>) -> Self {
        Self::Secret(message.into())
    }

    /// The innermost error, looking through wrappers added by sync and rotation.
    pub fn root(&self) -> &Error {
        match self {
            Error::RotationWrite { source }
            | Error::CleanupIncomplete { source, .. }
            | Error::PartialSync { source, .. } => source.root(),
            other => other,
        }
    }

    /// Whether the error was caused by bad input rather than a failure.
    pub fn is_validation(&self) -> bool {
        matches!(
            self.root(),
            Error::Validation(_)
                | Error::InvalidRange { .. }
                | Error::CrossMonthRange { .. }
                | Error::OutOfScope { .. }
        )
    }

    /// Whether the error came from the upstream provider.
    pub fn is_upstream(&self) -> bool {
        matches!(
            self.root(),
            Error::Http(_) | Error::ProviderStatus { .. } | Error::Unauthorized | Error::Provider(_)
        )
    }
}

/// Result type alias using weighin-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;
