//! Downstream collaborators of the reconcilers.
//!
//! 1. **Pull**: a `prometheus` registry holding absolute values, rendered on
//!    `GET /metrics` by the scrape server.
//! 2. **Push**: a reporter that accumulates deltas and periodically flushes
//!    them as JSON to a collector endpoint or stdout.
//! 3. **Memory**: recording sinks for tests and dry runs.

pub mod memory;
pub mod prometheus_registry;
pub mod push_reporter;
pub mod scrape_server;

pub use memory::{MemoryPullSink, MemoryPushSink};
pub use prometheus_registry::{PrometheusRegistry, PrometheusSink};
pub use push_reporter::{PushBatch, PushReporter, PushReporterSink};
