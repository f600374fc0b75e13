use std::future::Future;

use crate::contracts::error::CounterError;

/// Authoritative request counter with asynchronous persistence.
///
/// # Invariants
/// - Increments are linearizable: N concurrent calls return exactly `1..=N`
///   above the starting value, with no gaps and no duplicates.
/// - The in-memory value never decreases and never wraps.
/// - Persistence is best effort. A flush reads the live value at dispatch
///   time, so it may already include later increments.
pub trait CountStore: Send + Sync {
    /// Adds one and returns the new value.
    /// Requests a flush without blocking; pending requests coalesce.
    fn increment(&self) -> Result<u64, CounterError>;

    /// Returns the live in-memory value.
    fn current(&self) -> u64;

    /// Persists the current value and waits for the write.
    /// Returns the value that is now on disk.
    fn flush_now(&self) -> impl Future<Output = Result<u64, CounterError>> + Send;

    /// Stops the persistence worker. A flush already pending is still
    /// processed, but later increments are refused.
    fn shutdown(&self) -> impl Future<Output = ()> + Send;
}
