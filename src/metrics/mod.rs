//! Observability metrics for the counting service.
//!
//! Lock-free atomics only, exposed in Prometheus text format on `/metrics`.

pub mod histogram;
pub mod registry;

pub use histogram::Histogram;
pub use registry::{MetricsRegistry, PersistenceMetrics, RequestMetrics, UpstreamMetrics};
