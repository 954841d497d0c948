use std::fmt;

#[derive(Eq, PartialEq, Debug, Clone, Copy, thiserror::Error)]
pub enum BBQueueError {
    #[error("invalid arguments")]
    InvalidArgs,
    #[error("queue is empty")]
    EmptyQueue,
    #[error("timed out waiting on the queue")]
    Timeout,
}

/// Failure to enqueue. Carries the rejected value so the caller keeps ownership of it.
#[derive(Eq, PartialEq, Clone, Copy)]
pub enum BBQueuePushError<T> {
    /// The queue was at capacity and the call was non-blocking.
    OutOfSpace(T),
    /// The queue stayed at capacity for the whole timeout.
    Timeout(T),
}

impl<T> BBQueuePushError<T> {
    /// Recover the value that could not be pushed.
    pub fn into_inner(self) -> T {
        match self {
            BBQueuePushError::OutOfSpace(value) | BBQueuePushError::Timeout(value) => value,
        }
    }

    pub fn is_out_of_space(&self) -> bool {
        matches!(self, BBQueuePushError::OutOfSpace(_))
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, BBQueuePushError::Timeout(_))
    }
}

// the payload is left out so `T` does not need to be Debug
impl<T> fmt::Debug for BBQueuePushError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BBQueuePushError::OutOfSpace(_) => f.write_str("OutOfSpace(..)"),
            BBQueuePushError::Timeout(_) => f.write_str("Timeout(..)"),
        }
    }
}

impl<T> fmt::Display for BBQueuePushError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BBQueuePushError::OutOfSpace(_) => f.write_str("queue is at capacity"),
            BBQueuePushError::Timeout(_) => f.write_str("timed out waiting for queue capacity"),
        }
    }
}

impl<T> std::error::Error for BBQueuePushError<T> {}
