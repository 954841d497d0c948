/// Bounded blocking queue backed by Mutex and CondVar
pub mod blocking_queue;
pub use blocking_queue::BBQUEUE_UNBOUNDED;
pub use blocking_queue::BBQueue;

/// the errors
pub mod error;
pub use error::BBQueueError;
pub use error::BBQueuePushError;

/// utils for internal usage
mod utils;
