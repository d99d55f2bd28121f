//! Cross-thread access to the Variable Manager and Event Manager, serialized with
//! the dispatcher's own message routing.
//!
//! The managers are already `Send + Sync` on their own, so most callers never
//! need this. It exists for the case where a caller needs several manager calls
//! to happen as one atomic step relative to the dispatcher's tick, for example
//! reading a variable and subscribing to an event without a data sample landing
//! in between. A [`RemoteEndpoint`] posts a closure onto the dispatcher thread
//! and, optionally, waits for its result. The dispatcher drains posted closures
//! once per tick, interleaved with draining inbound messages.

use std::sync::mpsc;
use std::time::Duration;

use crate::error::SimConnectError;
use crate::event_manager::EventManager;
use crate::variable::VariableManager;

pub(crate) type BoxFn = Box<dyn FnOnce(&VariableManager, &EventManager) + Send>;

/// The dispatcher-side half: drains posted closures once per tick.
pub(crate) struct RemoteEndpointSubscriber {
    rx: mpsc::Receiver<BoxFn>,
}

impl RemoteEndpointSubscriber {
    pub(crate) fn drain(&self, variables: &VariableManager, events: &EventManager) {
        while let Ok(f) = self.rx.try_recv() {
            f(variables, events);
        }
    }
}

/// A cloneable handle for posting closures onto the dispatcher thread.
#[derive(Clone)]
pub struct RemoteEndpoint {
    tx: mpsc::Sender<BoxFn>,
}

pub(crate) fn remote_endpoint() -> (RemoteEndpoint, RemoteEndpointSubscriber) {
    let (tx, rx) = mpsc::channel();
    (RemoteEndpoint { tx }, RemoteEndpointSubscriber { rx })
}

impl RemoteEndpoint {
    /// Posts a closure to the dispatcher thread and blocks until it returns.
    pub fn call_blocking<F, T>(&self, f: F) -> Result<T, SimConnectError>
    where
        F: FnOnce(&VariableManager, &EventManager) -> T + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(Box::new(move |variables, events| {
                let _ = tx.send(f(variables, events));
            }))
            .map_err(|_| SimConnectError::NotOpen)?;
        rx.recv().map_err(|_| SimConnectError::NotOpen)
    }

    /// Same as [`call_blocking`](Self::call_blocking), but gives up and returns
    /// [`SimConnectError::NotOpen`] if the dispatcher hasn't produced a result
    /// within `timeout`.
    pub fn call_blocking_with_timeout<F, T>(
        &self,
        f: F,
        timeout: Duration,
    ) -> Result<T, SimConnectError>
    where
        F: FnOnce(&VariableManager, &EventManager) -> T + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(Box::new(move |variables, events| {
                let _ = tx.send(f(variables, events));
            }))
            .map_err(|_| SimConnectError::NotOpen)?;
        rx.recv_timeout(timeout).map_err(|_| SimConnectError::NotOpen)
    }

    /// Posts a closure without waiting for it to run.
    pub fn call_nonblocking<F>(&self, f: F) -> Result<(), SimConnectError>
    where
        F: FnOnce(&VariableManager, &EventManager) + Send + 'static,
    {
        self.tx.send(Box::new(f)).map_err(|_| SimConnectError::NotOpen)
    }
}
