//! Configuration validation.
//!
//! Errors make a config unusable for opening a connection; warnings are
//! logged and otherwise ignored.

use crate::{
    Error, Result,
    schema::{ConnectionConfig, KdfConfig},
};

/// Severity level for a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Error,
    Warning,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Error => write!(f, "error"),
            Self::Warning => write!(f, "warning"),
        }
    }
}

/// A single validation diagnostic.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    /// Dotted field path, e.g. `storage.kdf.m_cost`.
    pub field: &'static str,
    pub message: String,
}

#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub diagnostics: Vec<Diagnostic>,
}

impl ValidationResult {
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == Severity::Error)
    }

    #[must_use]
    pub fn count(&self, severity: Severity) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == severity)
            .count()
    }

    fn error(&mut self, field: &'static str, message: impl Into<String>) {
        self.diagnostics.push(Diagnostic {
            severity: Severity::Error,
            field,
            message: message.into(),
        });
    }

    fn warning(&mut self, field: &'static str, message: impl Into<String>) {
        self.diagnostics.push(Diagnostic {
            severity: Severity::Warning,
            field,
            message: message.into(),
        });
    }
}

impl ConnectionConfig {
    /// Collect every problem with this config.
    pub fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::default();

        if self.application_id.trim().is_empty() {
            result.error("application_id", "must not be empty");
        }
        if self.sender_id.trim().is_empty() {
            result.error("sender_id", "must not be empty");
        }
        if self.server_host.trim().is_empty() {
            result.error("server_host", "must not be empty");
        } else if self.server_host.contains("://") {
            result.error("server_host", "must not include a scheme; use socket_protocol");
        }
        match self.socket_protocol.as_str() {
            "https" => {},
            "http" => result.warning(
                "socket_protocol",
                "plain http exposes registration secrets on the wire",
            ),
            other => result.error(
                "socket_protocol",
                format!("unsupported protocol `{other}` (expected https or http)"),
            ),
        }
        if self.bridge_type.is_empty() || self.bridge_type.contains('/') {
            result.error("bridge_type", "must be a single non-empty path segment");
        }
        if self.sender_id.contains('/') {
            result.error("sender_id", "must not contain `/`");
        }
        if self.request_timeout_secs == 0 {
            result.error("request_timeout_secs", "must be at least 1");
        }
        if self.max_attempts == 0 {
            result.error("max_attempts", "must be at least 1");
        }
        if self.encryption_key.is_some() {
            check_kdf(&self.storage.kdf, &mut result);
        }

        result
    }

    /// Validate and turn the first error into an [`Error::Invalid`].
    pub fn check(&self) -> Result<()> {
        let result = self.validate();
        for diag in &result.diagnostics {
            if diag.severity == Severity::Warning {
                tracing::warn!(field = diag.field, "{}", diag.message);
            }
        }
        match result
            .diagnostics
            .into_iter()
            .find(|d| d.severity == Severity::Error)
        {
            Some(diag) => Err(Error::invalid(diag.field, diag.message)),
            None => Ok(()),
        }
    }
}

fn check_kdf(kdf: &KdfConfig, result: &mut ValidationResult) {
    // Argon2 requires at least 8 KiB per lane.
    if kdf.p_cost == 0 {
        result.error("storage.kdf.p_cost", "must be at least 1");
    } else if kdf.m_cost < 8 * kdf.p_cost {
        result.error("storage.kdf.m_cost", "must be at least 8 KiB per lane");
    }
    if kdf.t_cost == 0 {
        result.error("storage.kdf.t_cost", "must be at least 1");
    }
}
