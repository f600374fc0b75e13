use std::future::Future;

use tokio_util::sync::CancellationToken;

use crate::contracts::error::UpstreamError;

/// Source of the cluster-wide count reported by an upstream node.
///
/// One attempt per call. Retrying is left to the caller.
pub trait Upstream: Send + Sync {
    /// Fetches the upstream's current total.
    ///
    /// Must return [`UpstreamError::Cancelled`] when `cancel` fires before
    /// the upstream answers.
    fn fetch_count(
        &self,
        cancel: &CancellationToken,
    ) -> impl Future<Output = Result<u64, UpstreamError>> + Send;

    /// Address used in logs.
    fn endpoint(&self) -> &str;
}
