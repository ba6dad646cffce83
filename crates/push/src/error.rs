//! Error taxonomy for push connections.
//!
//! [`Error`] carries detail for logs and debugging; [`ErrorKind`] is the small
//! stable classification callers (and host bindings) branch on.

use std::{path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};

/// Reportable error classes.
///
/// The serialized names are part of the host boundary contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Invalid configuration or input.
    GeneralError,
    /// Invariant violation, use after close, caught panic. Never retried.
    InternalError,
    /// Random or key generation failed.
    #[serde(rename = "OpenSSLError")]
    OpenSslError,
    /// Transient network failure or timeout; the whole operation may be retried.
    CommunicationError,
    /// The push server rejected the request; do not retry blindly.
    CommunicationServerError,
    /// Channel exists with conflicting parameters.
    AlreadyRegisteredError,
    /// Store unusable at a higher level (wrong key, locked, corrupt record).
    StorageError,
    /// Backend query or migration failure.
    StorageSqlError,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::GeneralError => "GeneralError",
            Self::InternalError => "InternalError",
            Self::OpenSslError => "OpenSSLError",
            Self::CommunicationError => "CommunicationError",
            Self::CommunicationServerError => "CommunicationServerError",
            Self::AlreadyRegisteredError => "AlreadyRegisteredError",
            Self::StorageError => "StorageError",
            Self::StorageSqlError => "StorageSqlError",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One channel that could not be brought up to date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelFailure {
    pub channel_id: String,
    pub kind: ErrorKind,
    pub message: String,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    Config(#[from] courier_config::Error),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("connection closed")]
    Closed,

    #[error("crypto error: {0}")]
    Crypto(String),

    #[error("{context}")]
    Communication {
        context: String,
        #[source]
        source: Option<reqwest::Error>,
    },

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("deadline exceeded")]
    DeadlineExceeded,

    #[error("push server returned HTTP {status}: {body}")]
    Server { status: u16, body: String },

    #[error("channel {channel_id} is already registered")]
    AlreadyRegistered { channel_id: String },

    #[error("storage error: {0}")]
    Storage(String),

    #[error("store {} is already open by another connection", .path.display())]
    StoreLocked { path: PathBuf },

    #[error("store encryption: {0}")]
    Vault(#[from] courier_vault::VaultError),

    #[error("error executing SQL: {0}")]
    Sql(#[from] sqlx::Error),

    #[error("store migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("{} of {} channels failed to update", .failed.len(), .failed.len() + .updated.len())]
    PartialUpdate {
        updated: Vec<String>,
        failed: Vec<ChannelFailure>,
    },
}

impl Error {
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    #[must_use]
    pub fn crypto(message: impl Into<String>) -> Self {
        Self::Crypto(message.into())
    }

    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage(message.into())
    }

    #[must_use]
    pub fn communication(context: impl Into<String>) -> Self {
        Self::Communication {
            context: context.into(),
            source: None,
        }
    }

    #[must_use]
    pub fn transport(context: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Communication {
            context: context.into(),
            source: Some(source),
        }
    }

    /// Classify this error for callers.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Config(_) | Self::InvalidInput(_) => ErrorKind::GeneralError,
            Self::Internal(_) | Self::Closed => ErrorKind::InternalError,
            Self::Crypto(_) => ErrorKind::OpenSslError,
            Self::Communication { .. } | Self::Timeout(_) | Self::DeadlineExceeded => {
                ErrorKind::CommunicationError
            },
            // Retries are exhausted by the time a 5xx gets here.
            Self::Server { status, .. } if *status >= 500 => ErrorKind::CommunicationError,
            Self::Server { .. } => ErrorKind::CommunicationServerError,
            Self::AlreadyRegistered { .. } => ErrorKind::AlreadyRegisteredError,
            Self::Storage(_) | Self::StoreLocked { .. } | Self::Vault(_) => {
                ErrorKind::StorageError
            },
            Self::Sql(_) | Self::Migrate(_) => ErrorKind::StorageSqlError,
            Self::PartialUpdate { failed, .. } => failed
                .first()
                .map_or(ErrorKind::InternalError, |f| f.kind),
        }
    }

    /// Whether a bridge request that failed this way may be attempted again.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Communication { .. } | Self::Timeout(_) => true,
            Self::Server { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Whether the server no longer recognises the registration this request
    /// was made for.
    pub fn is_unknown_registration(&self) -> bool {
        matches!(self, Self::Server { status: 401 | 404 | 410, .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;
