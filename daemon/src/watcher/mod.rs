//! Server log watching and classification.

pub mod classifier;
pub mod locator;
pub mod monitor;
pub mod tailer;

pub use classifier::Event;
pub use locator::RetryPolicy;
pub use monitor::monitor;
