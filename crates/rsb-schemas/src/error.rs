//! Classified error type shared by every component.
//!
//! Remote and repository failures never panic and never surface as bare
//! strings: they carry a machine-readable `code`, a classification
//! ([`ErrorKind`]) that drives retry/abort decisions, and optionally the
//! original response payload for diagnostics.

use serde_json::Value;

pub type SyncResult<T> = Result<T, SyncError>;

/// Failure classification. Drives the retry executor and run-level
/// propagation rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Network timeout, 5xx, 429, connection reset, optimistic conflict.
    /// Retried by the retry executor.
    Transient,
    /// Bad input or schema violation. Surfaced per item; never retried.
    Validation,
    /// Unique constraint or missing foreign key. Aborts the order / fails
    /// the product, never the whole run.
    Integrity,
    /// Credential failure. Fatal for the run.
    Auth,
    /// Response shape did not match expectations (unknown/missing field).
    /// Logged with the full payload; the item is skipped.
    SchemaDrift,
    /// Another holder owns the distributed lock. Soft: the tick is skipped.
    LockHeld,
    /// Cooperative stop. Not counted as a failure.
    Cancelled,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Transient => "transient",
            ErrorKind::Validation => "validation",
            ErrorKind::Integrity => "integrity",
            ErrorKind::Auth => "auth",
            ErrorKind::SchemaDrift => "schema_drift",
            ErrorKind::LockHeld => "lock_held",
            ErrorKind::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("{code}: {message}")]
pub struct SyncError {
    pub kind: ErrorKind,
    /// Stable machine-readable code, e.g. `"http_429"`, `"unknown_sku"`.
    pub code: String,
    pub message: String,
    /// Original remote payload, when one exists. Diagnostics only.
    pub payload: Option<Value>,
    /// Server-requested wait before the next attempt (429 responses).
    pub retry_after_secs: Option<u64>,
}

impl SyncError {
    pub fn new(kind: ErrorKind, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            code: code.into(),
            message: message.into(),
            payload: None,
            retry_after_secs: None,
        }
    }

    pub fn transient(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transient, code, message)
    }

    pub fn validation(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, code, message)
    }

    pub fn integrity(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Integrity, code, message)
    }

    pub fn auth(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Auth, code, message)
    }

    pub fn schema_drift(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::SchemaDrift, code, message)
    }

    pub fn lock_held(name: impl Into<String>) -> Self {
        Self::new(ErrorKind::LockHeld, "lock_held", name)
    }

    pub fn cancelled() -> Self {
        Self::new(ErrorKind::Cancelled, "cancelled", "run cancelled")
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn with_retry_after(mut self, secs: u64) -> Self {
        self.retry_after_secs = Some(secs);
        self
    }

    /// Only `Transient` failures are eligible for another attempt.
    pub fn is_retryable(&self) -> bool {
        self.kind == ErrorKind::Transient
    }

    /// Auth failures terminate the whole run, not just the current item.
    pub fn is_fatal_for_run(&self) -> bool {
        self.kind == ErrorKind::Auth
    }
}
