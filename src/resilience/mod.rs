pub mod classifier;
pub mod retry;

pub use classifier::{classify, Classification, Classify, ErrorCategory, ResponseCategory};
pub use retry::{RetryConfig, RetryExecutor};
