//! Crate-wide error taxonomy.
//!
//! # Severity rules
//! - [`DetectError`] is always recoverable — the caller can offer a manual
//!   format choice or reject the input.
//! - `MalformedContainer` is fatal for that input; retrying without a
//!   different file cannot succeed.
//! - Unresolved assets (remote fetch failed, embedded chunk missing) are
//!   NOT errors.  They are reported as [`Warning`] values attached to an
//!   otherwise successful result; partial success is the norm.
//! - Mapping loss (a source field with no target representation) is never
//!   raised at all — it is logged via `tracing` and documented per mapper.
//! - `InvariantViolation` is fatal and MUST abort the operation rather than
//!   persist an inconsistent state.

use std::io;
use thiserror::Error;

/// No known card format matched the input bytes.
#[derive(Error, Debug)]
#[error("unrecognized format{}", .hint.as_deref().map(|h| format!(" (hint: {h})")).unwrap_or_default())]
pub struct DetectError {
    /// File-name hint that was supplied alongside the bytes, if any.
    pub hint: Option<String>,
}

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Detect(#[from] DetectError),
    /// ZIP or PNG structure is invalid — fatal for this input.
    #[error("malformed container: {0}")]
    MalformedContainer(String),
    /// A hard data-model invariant would be broken. Abort, never persist.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("ZIP error: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, EngineError>;

/// Non-fatal problem scoped to one asset (or one package member).
///
/// Carried in result structs next to the successful payload so callers can
/// report "archived 8 of 10 images" with the failures attached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Warning {
    /// Asset name or entry path the warning applies to, when known.
    pub subject: Option<String>,
    pub message: String,
}

impl Warning {
    pub fn new(subject: impl Into<String>, message: impl Into<String>) -> Self {
        Self { subject: Some(subject.into()), message: message.into() }
    }

    pub fn general(message: impl Into<String>) -> Self {
        Self { subject: None, message: message.into() }
    }
}

impl std::fmt::Display for Warning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.subject {
            Some(s) => write!(f, "{s}: {}", self.message),
            None => write!(f, "{}", self.message),
        }
    }
}
