use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TallyError {
    #[error("Counter error: {0}")]
    Counter(#[from] CounterError),

    #[error("Upstream error: {0}")]
    Upstream(#[from] UpstreamError),

    #[error("Server error: {0}")]
    Server(#[from] ServerError),
}

/// Errors raised by a count store.
///
/// Only `Overflow` and `Closed` ever reach a request handler. The other
/// variants stay inside the persistence path where they are logged and
/// counted.
#[derive(Error, Debug)]
pub enum CounterError {
    #[error("Snapshot {path} is corrupt: {detail}")]
    Corrupt { path: PathBuf, detail: String },

    #[error("Unable to read {path}: {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Unable to save {path}: {source}")]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Counter overflow")]
    Overflow,

    #[error("Count store is closed")]
    Closed,
}

/// Errors raised while asking the upstream node for its count.
#[derive(Error, Debug)]
pub enum UpstreamError {
    #[error("upstream unreachable: {0}")]
    Unreachable(String),

    #[error("upstream bad response: {0}")]
    BadResponse(String),

    #[error("upstream request cancelled")]
    Cancelled,

    #[error("invalid upstream address {addr}: {detail}")]
    InvalidAddress { addr: String, detail: String },
}

impl UpstreamError {
    /// True when the caller's own scope ended the call.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Failed to bind listener on {addr}: {source}")]
    ListenerBindFailed {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Server IO error: {0}")]
    Serve(#[from] std::io::Error),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Server already started")]
    AlreadyStarted,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upstream_errors_identify_their_source() {
        let e = UpstreamError::BadResponse("500 Internal Server Error".into());
        assert_eq!(
            e.to_string(),
            "upstream bad response: 500 Internal Server Error"
        );
        assert!(!e.is_cancelled());
        assert!(UpstreamError::Cancelled.is_cancelled());
    }

    #[test]
    fn counter_errors_convert_into_top_level() {
        let e: TallyError = CounterError::Closed.into();
        assert!(matches!(e, TallyError::Counter(CounterError::Closed)));
        assert_eq!(e.to_string(), "Counter error: Count store is closed");
    }

    #[test]
    fn write_failure_names_the_file() {
        let e = CounterError::WriteFailed {
            path: PathBuf::from("/data/count"),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        assert!(e.to_string().starts_with("Unable to save /data/count"));
    }
}
