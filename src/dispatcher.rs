//! Drives the connection: on a fixed tick, drains every message the native queue
//! currently holds and routes each one to the manager that owns it.
//!
//! The vendor transport gives this crate no file descriptor to wait on, only a
//! "pull one message, or tell me the queue is empty" entry point, so this is a
//! plain timed poll rather than an `epoll_wait`-driven reactor: one background
//! thread, a state flag checked at every loop boundary, and a drain-to-empty
//! inner loop so a burst of messages between ticks doesn't pile up waiting for
//! the next tick.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::bridge::AbiOps;
use crate::codec::{self, Message};
use crate::error::{ErrorSink, SimConnectError};
use crate::event_manager::EventManager;
#[cfg(feature = "remote-endpoint")]
use crate::remote_endpoint::RemoteEndpointSubscriber;
use crate::variable::VariableManager;

/// Drives the fixed-interval poll-and-route loop for a connection.
pub struct Dispatcher {
    abi: Arc<Mutex<dyn AbiOps>>,
    variables: Arc<VariableManager>,
    events: Arc<EventManager>,
    error_sink: ErrorSink,
    tick_interval: Duration,
    running: Arc<AtomicBool>,
    terminal: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
    #[cfg(feature = "remote-endpoint")]
    remote: Option<RemoteEndpointSubscriber>,
}

impl Dispatcher {
    pub(crate) fn new(
        abi: Arc<Mutex<dyn AbiOps>>,
        variables: Arc<VariableManager>,
        events: Arc<EventManager>,
        error_sink: ErrorSink,
        tick_interval: Duration,
    ) -> Self {
        Self {
            abi,
            variables,
            events,
            error_sink,
            tick_interval,
            running: Arc::new(AtomicBool::new(false)),
            terminal: Arc::new(AtomicBool::new(false)),
            thread: None,
            #[cfg(feature = "remote-endpoint")]
            remote: None,
        }
    }

    /// Attaches the dispatcher-side half of a [`RemoteEndpoint`](crate::remote_endpoint::RemoteEndpoint)
    /// pair. Must be called before `start()`.
    #[cfg(feature = "remote-endpoint")]
    pub(crate) fn attach_remote_endpoint(&mut self, subscriber: RemoteEndpointSubscriber) {
        self.remote = Some(subscriber);
    }

    /// Starts the background polling thread. Calling `start()` while already
    /// running is a no-op.
    pub fn start(&mut self) {
        if self.running.swap(true, Ordering::AcqRel) {
            return;
        }
        self.terminal.store(false, Ordering::Release);

        let abi = self.abi.clone();
        let variables = self.variables.clone();
        let events = self.events.clone();
        let error_sink = self.error_sink.clone();
        let running = self.running.clone();
        let terminal = self.terminal.clone();
        let tick_interval = self.tick_interval;
        #[cfg(feature = "remote-endpoint")]
        let remote = self.remote.take();

        let thread = std::thread::Builder::new()
            .name("simconnect-dispatcher".into())
            .spawn(move || {
                tracing::info!("dispatcher thread started");
                while running.load(Ordering::Acquire) {
                    tracing::trace!("dispatcher tick");
                    #[cfg(feature = "remote-endpoint")]
                    if let Some(remote) = &remote {
                        remote.drain(&variables, &events);
                    }
                    loop {
                        if !running.load(Ordering::Acquire) {
                            return;
                        }
                        let pulled = abi.lock().unwrap().pull_raw_message();
                        match pulled {
                            Ok(Some(bytes)) => {
                                if route_one(&bytes, &variables, &events, &error_sink) {
                                    tracing::info!("quit message received, dispatcher stopping");
                                    terminal.store(true, Ordering::Release);
                                    running.store(false, Ordering::Release);
                                    return;
                                }
                            }
                            Ok(None) => break,
                            Err(err) => {
                                tracing::warn!(error = %err, "dispatcher: raw pull failed");
                                error_sink.publish(err);
                                break;
                            }
                        }
                    }
                    std::thread::sleep(tick_interval);
                }
                tracing::info!("dispatcher thread stopped");
            })
            .expect("failed to spawn dispatcher thread");

        self.thread = Some(thread);
    }

    /// Signals the dispatcher thread to stop and joins it. Idempotent.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// True once a `quit` message has been observed from the host.
    pub fn is_terminal(&self) -> bool {
        self.terminal.load(Ordering::Acquire)
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Decodes and routes a single raw message. Returns `true` if it was a `quit`
/// message, signaling the caller to stop the loop.
fn route_one(
    bytes: &[u8],
    variables: &VariableManager,
    events: &EventManager,
    error_sink: &ErrorSink,
) -> bool {
    let message = match codec::parse_message(bytes) {
        Ok(message) => message,
        Err(err) => {
            tracing::warn!(error = %err, "dispatcher: malformed message");
            error_sink.publish(err);
            return false;
        }
    };

    match message {
        Message::Quit => return true,
        Message::Open => {}
        Message::Exception { code } => {
            tracing::warn!(code, "dispatcher: host reported an async exception");
            error_sink.publish(SimConnectError::Native {
                function: "<async exception>",
                code,
                message: "host reported an exception for a prior request".into(),
            });
        }
        Message::Event(ev) => events.on_basic_event(ev),
        Message::ObjectEvent(ev) => events.on_object_event(ev),
        Message::FilenameEvent(ev) => events.on_filename_event(ev),
        Message::FrameEvent(ev) => events.on_frame_event(ev),
        Message::SimObjectData(sample) => variables.on_data_sample(sample),
        Message::Unhandled(_) => {}
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::{RawMessageKind, HEADER_LEN};
    use crate::bridge::MockAbiOps;
    use crate::error::error_channel;
    use crate::registry::Registry;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration as StdDuration;

    fn header_bytes(size: u32, kind: u32) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&size.to_le_bytes());
        buf.extend_from_slice(&0u32.to_le_bytes());
        buf.extend_from_slice(&kind.to_le_bytes());
        buf
    }

    fn quit_message() -> Vec<u8> {
        header_bytes(HEADER_LEN as u32, RawMessageKind::QUIT.0)
    }

    #[test]
    fn quit_message_flips_to_terminal_and_stops() {
        let queue = Arc::new(StdMutex::new(vec![quit_message()]));
        let mut mock = MockAbiOps::new();
        let queue_clone = queue.clone();
        mock.expect_pull_raw_message().returning(move || {
            Ok(queue_clone.lock().unwrap().pop())
        });

        let abi: Arc<Mutex<dyn AbiOps>> = Arc::new(Mutex::new(mock));
        let registry = Arc::new(Mutex::new(Registry::new()));
        let variables = Arc::new(VariableManager::new(abi.clone(), registry.clone(), 10));
        let events = Arc::new(EventManager::new(abi.clone(), registry, 10));
        let (error_sink, _errors) = error_channel(10);

        let mut dispatcher = Dispatcher::new(
            abi,
            variables,
            events,
            error_sink,
            StdDuration::from_millis(5),
        );
        dispatcher.start();

        let mut terminal = false;
        for _ in 0..100 {
            if dispatcher.is_terminal() {
                terminal = true;
                break;
            }
            std::thread::sleep(StdDuration::from_millis(10));
        }
        assert!(terminal);
        assert!(!dispatcher.is_running());
        dispatcher.stop();
    }

    #[test]
    fn malformed_message_is_reported_and_does_not_stop_the_loop() {
        let mock_queue = Arc::new(StdMutex::new(vec![vec![0u8; 2]]));
        let mut mock = MockAbiOps::new();
        let queue_clone = mock_queue.clone();
        mock.expect_pull_raw_message().returning(move || {
            Ok(queue_clone.lock().unwrap().pop())
        });

        let abi: Arc<Mutex<dyn AbiOps>> = Arc::new(Mutex::new(mock));
        let registry = Arc::new(Mutex::new(Registry::new()));
        let variables = Arc::new(VariableManager::new(abi.clone(), registry.clone(), 10));
        let events = Arc::new(EventManager::new(abi.clone(), registry, 10));
        let (error_sink, errors) = error_channel(10);

        let mut dispatcher = Dispatcher::new(
            abi,
            variables,
            events,
            error_sink,
            StdDuration::from_millis(5),
        );
        dispatcher.start();

        let mut got_error = false;
        for _ in 0..50 {
            if errors.try_recv().is_some() {
                got_error = true;
                break;
            }
            std::thread::sleep(StdDuration::from_millis(10));
        }
        assert!(got_error);
        assert!(dispatcher.is_running());
        dispatcher.stop();
    }
}
