//! Error types for the routing core.

use std::sync::atomic::{AtomicU64, Ordering};

use thiserror::Error;

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while loading, provisioning, or running the HTTP app.
#[derive(Error, Debug)]
pub enum Error {
    /// Bad configuration detected while decoding or provisioning modules.
    #[error("provisioning error: {0}")]
    Provision(String),

    /// Configuration rejected by validation (e.g. duplicate listeners).
    #[error("validation error: {0}")]
    Validation(String),

    /// A listener could not be bound.
    #[error("binding listener {address}: {source}")]
    Listen {
        address: String,
        #[source]
        source: std::io::Error,
    },

    /// TLS subsystem failure surfaced during provisioning or start.
    #[error("TLS error: {0}")]
    Tls(#[from] portico_tls::TlsError),

    /// IO error outside of listener binding.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// An error returned by a handler in the chain.
///
/// Carries the status to write if it reaches the server level unhandled, a
/// message, a per-error ID for log correlation, and the origin site. The
/// rehandle signal travels as a distinguished value of this type so the
/// chain can short-circuit through the same path; it is not treated as a
/// failure.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct HandlerError {
    /// Status code to write when unhandled; 0 means unset (500).
    pub status_code: u16,
    pub message: String,
    /// Short identifier included in logs and `{http.error.id}`.
    pub id: String,
    /// Origin of the error, `file:line` of the constructor call.
    pub trace: String,
    rehandle: bool,
}

static ERROR_SEQ: AtomicU64 = AtomicU64::new(0);

fn next_error_id() -> String {
    let seq = ERROR_SEQ.fetch_add(1, Ordering::Relaxed);
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.subsec_nanos() as u64)
        .unwrap_or_default();
    format!("{:08x}{:04x}", nanos.wrapping_mul(2654435761) ^ seq, seq & 0xffff)
}

impl HandlerError {
    #[track_caller]
    pub fn new(status_code: u16, message: impl Into<String>) -> Self {
        let loc = std::panic::Location::caller();
        Self {
            status_code,
            message: message.into(),
            id: next_error_id(),
            trace: format!("{}:{}", loc.file(), loc.line()),
            rehandle: false,
        }
    }

    /// Wrap an arbitrary error; status defaults to 500 at write time.
    #[track_caller]
    pub fn from_err(err: impl std::fmt::Display) -> Self {
        Self::new(0, err.to_string())
    }

    /// The rehandle signal: re-run the chain from the top against the
    /// (possibly rewritten) request.
    #[track_caller]
    pub fn rehandle() -> Self {
        let mut e = Self::new(0, "rehandle requested");
        e.rehandle = true;
        e
    }

    pub fn is_rehandle(&self) -> bool {
        self.rehandle
    }

    /// Status to write to the client, defaulting unset to 500.
    pub fn status_or_default(&self) -> u16 {
        if self.status_code == 0 {
            500
        } else {
            self.status_code
        }
    }
}
