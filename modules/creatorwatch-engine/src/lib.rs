pub mod alert;
pub mod backup;
pub mod circuit_breaker;
pub mod dates;
pub mod email;
pub mod lock;
pub mod normalize;
pub mod pipeline;
pub mod policy;
pub mod quality;
pub mod report;
pub mod retry;
pub mod scheduler;
pub mod source_runner;
pub mod streak;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;
pub mod traits;

pub use lock::FailurePolicy;
pub use pipeline::{Pipeline, PipelineSettings};
pub use retry::RetryPolicy;
