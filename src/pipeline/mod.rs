pub mod orchestrator;
pub mod retry;

pub use orchestrator::{BackfillSummary, Pipeline, WindowReport};
pub use retry::RetryPolicy;
