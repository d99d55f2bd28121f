//! The error taxonomy this crate returns and publishes.
//!
//! Synchronous calls return [`SimConnectError`] directly. Background work (the
//! [`Dispatcher`](crate::dispatcher::Dispatcher) and the per-subscription callback
//! workers) instead publishes [`SimConnectError`] onto a manager's bounded error
//! channel; see [`crate::error::ErrorSink`].

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Default capacity of a manager's background error channel.
pub const ERROR_CHANNEL_CAPACITY: usize = 10;

/// Every way this crate can fail.
///
/// Variants are grouped the way callers need to branch on them: configuration
/// mistakes are the caller's fault and are always synchronous; native errors came
/// back from the vendor DLL; state errors mean the connection handle was used out
/// of order; dispatch errors are asynchronous and never fatal to the dispatcher.
#[derive(Debug, thiserror::Error)]
pub enum SimConnectError {
    /// A variable name that is already registered was registered again.
    #[error("variable `{0}` is already registered")]
    DuplicateVariable(String),

    /// `add_variable` was called after `start()`.
    #[error("cannot add variable `{0}`: manager is already running")]
    AlreadyRunning(String),

    /// `start()` was called with no variables registered.
    #[error("cannot start: no variables registered")]
    NoVariables,

    /// `set_variable` targeted a variable that was not registered writable.
    #[error("variable `{0}` is not writable")]
    NotWritable(String),

    /// `get_variable`/`set_variable` referenced an unknown name.
    #[error("variable `{0}` not found")]
    VariableNotFound(String),

    /// `set_variable_by_index` referenced an index past the end of the table.
    #[error("variable index {0} out of range (have {1})")]
    IndexOutOfRange(usize, usize),

    /// A non-success status code came back from a native ABI call.
    #[error("native call `{function}` failed with status {code}: {message}")]
    Native {
        function: &'static str,
        code: u32,
        message: String,
    },

    /// An operation was attempted on a connection that is not open.
    #[error("connection is not open")]
    NotOpen,

    /// `open()` was called on a connection that is already open.
    #[error("connection is already open")]
    AlreadyOpen,

    /// `close()` was called on a connection that is already closed.
    #[error("connection is already closed")]
    AlreadyClosed,

    /// The host sent a `quit` message; the connection is now terminal.
    #[error("host disconnected")]
    Disconnected,

    /// An inbound buffer was shorter than its declared size, or shorter than the
    /// header, or otherwise failed to decode as the message kind it claimed to be.
    #[error("malformed message: {0}")]
    MalformedMessage(String),

    /// A data-sample arrived for a request ID nobody registered.
    #[error("unknown request id {0}")]
    UnknownRequestId(u32),

    /// A basic/filename/object/frame event arrived for an event ID nobody subscribed to.
    #[error("unknown event id {0}")]
    UnknownEventId(u32),

    /// A user callback panicked; the panic payload could not be turned into a string.
    #[error("callback for event `{0}` panicked")]
    CallbackPanicked(String),

    /// Failed to load the vendor DLL or resolve one of its entry points.
    #[error("failed to load native library: {0}")]
    LibraryLoad(String),
}

type Queue = Arc<Mutex<VecDeque<SimConnectError>>>;

/// The sending half of a manager's bounded background error channel.
///
/// Backed by a ring buffer, not a blocking queue: publishing past capacity evicts
/// the oldest buffered error to make room for the new one rather than blocking the
/// dispatcher or dropping the incoming error. This is a fail-fast diagnostic
/// surface, not a reliable log. Cloning is cheap; every background worker that can
/// fail gets its own clone.
#[derive(Clone)]
pub struct ErrorSink {
    queue: Queue,
    capacity: usize,
}

impl ErrorSink {
    /// Publishes an error, evicting the oldest queued error first if the ring
    /// buffer is already at capacity.
    pub fn publish(&self, err: SimConnectError) {
        let mut queue = self.queue.lock().unwrap();
        if queue.len() >= self.capacity {
            if let Some(dropped) = queue.pop_front() {
                tracing::warn!(error = %dropped, "error channel full, dropping oldest diagnostic");
            }
        }
        queue.push_back(err);
    }
}

/// The receiving half of a manager's bounded background error channel.
///
/// Cloneable and shareable like [`ErrorSink`]; every clone observes the same
/// underlying ring buffer.
#[derive(Clone)]
pub struct ErrorReceiver {
    queue: Queue,
}

impl ErrorReceiver {
    /// Pops the oldest queued error, if any.
    pub fn try_recv(&self) -> Option<SimConnectError> {
        self.queue.lock().unwrap().pop_front()
    }
}

/// Creates a bounded error channel pair: an [`ErrorSink`] for background workers to
/// publish to, and an [`ErrorReceiver`] for the caller to drain with `get_errors()`.
pub fn error_channel(capacity: usize) -> (ErrorSink, ErrorReceiver) {
    let capacity = capacity.max(1);
    let queue: Queue = Arc::new(Mutex::new(VecDeque::with_capacity(capacity)));
    (
        ErrorSink {
            queue: queue.clone(),
            capacity,
        },
        ErrorReceiver { queue },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overflow_drops_the_oldest_error_not_the_newest() {
        let (sink, rx) = error_channel(2);
        sink.publish(SimConnectError::NoVariables);
        sink.publish(SimConnectError::NotOpen);
        sink.publish(SimConnectError::AlreadyOpen); // NoVariables evicted, not this one

        assert!(matches!(rx.try_recv(), Some(SimConnectError::NotOpen)));
        assert!(matches!(rx.try_recv(), Some(SimConnectError::AlreadyOpen)));
        assert!(rx.try_recv().is_none());
    }
}
