//! Subscribes to named system events and fans inbound occurrences out to
//! per-subscription callback workers.
//!
//! Each subscription gets its own worker thread and its own unbounded channel. The
//! dispatcher thread posts decoded [`SimEvent`] values onto a subscription's
//! channel, and that subscription's worker thread runs the callback: one
//! subscription's slow or panicking callback never blocks another's, and within
//! one subscription, callbacks still run in the order their events arrived.
//!
//! Subscriptions are addressed by the event ID `subscribe` hands back, not by
//! name: a name is only a label attached to that ID, and the ABI itself only ever
//! speaks in event IDs.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex, RwLock};
use std::thread::JoinHandle;

use rustc_hash::FxHashMap;

use crate::abi::EventState;
use crate::bridge::AbiOps;
use crate::codec;
use crate::error::{error_channel, ErrorReceiver, ErrorSink, SimConnectError};
use crate::registry::Registry;
use crate::sim_event::SimEvent;

type Callback = dyn Fn(SimEvent) + Send + 'static;

struct Subscription {
    event_id: u32,
    name: String,
    tx: Sender<SimEvent>,
    worker: Option<JoinHandle<()>>,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

/// Subscribes to system events and dispatches them to per-subscription callback
/// workers.
///
/// Shares the connection's [`Registry`] and ABI bridge handle with the
/// [`VariableManager`](crate::variable::VariableManager) and
/// [`Dispatcher`](crate::dispatcher::Dispatcher).
pub struct EventManager {
    abi: Arc<Mutex<dyn AbiOps>>,
    registry: Arc<Mutex<Registry>>,
    subscriptions: RwLock<Vec<Option<Subscription>>>,
    by_name: RwLock<FxHashMap<String, u32>>,
    by_event_id: RwLock<FxHashMap<u32, usize>>,
    running: AtomicBool,
    error_sink: ErrorSink,
    errors: ErrorReceiver,
}

impl EventManager {
    pub(crate) fn new(
        abi: Arc<Mutex<dyn AbiOps>>,
        registry: Arc<Mutex<Registry>>,
        error_channel_capacity: usize,
    ) -> Self {
        let (error_sink, errors) = error_channel(error_channel_capacity);
        Self {
            abi,
            registry,
            subscriptions: RwLock::new(Vec::new()),
            by_name: RwLock::new(FxHashMap::default()),
            by_event_id: RwLock::new(FxHashMap::default()),
            running: AtomicBool::new(false),
            error_sink,
            errors,
        }
    }

    /// Marks the manager active. Subscriptions can be made before, during, or
    /// after `start()`; the flag exists for parity with the Variable Manager's
    /// lifecycle and for callers that want a single "is everything up" check.
    pub fn start(&self) -> Result<(), SimConnectError> {
        if self.running.swap(true, Ordering::AcqRel) {
            return Err(SimConnectError::AlreadyRunning("<event manager>".into()));
        }
        tracing::info!("event manager started");
        Ok(())
    }

    /// Tears down every active subscription and marks the manager stopped.
    /// Idempotent.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
        let _ = self.unsubscribe_all();
        tracing::info!("event manager stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Subscribes to a named system event, spawning a dedicated callback worker.
    /// Returns the event ID the ABI assigned, which is how the subscription is
    /// addressed afterward.
    pub fn subscribe(
        &self,
        event_name: impl Into<String>,
        callback: impl Fn(SimEvent) + Send + 'static,
    ) -> Result<u32, SimConnectError> {
        let event_name = event_name.into();
        if self.by_name.read().unwrap().contains_key(&event_name) {
            return Err(SimConnectError::DuplicateVariable(event_name));
        }

        let event_id = self.registry.lock().unwrap().next_event_id();
        self.abi
            .lock()
            .unwrap()
            .subscribe_to_system_event(event_id, &event_name)?;

        let index = self.spawn_subscription(event_name.clone(), event_id, Box::new(callback));
        self.registry
            .lock()
            .unwrap()
            .register_event_owner(event_id, index);
        self.by_name.write().unwrap().insert(event_name.clone(), event_id);
        self.by_event_id.write().unwrap().insert(event_id, index);
        tracing::debug!(event_id, event_name, "subscribed to system event");
        Ok(event_id)
    }

    /// Subscribes to several events at once. If any subscription fails, every
    /// subscription made earlier in the same call is rolled back before the error
    /// is returned, so a partial `subscribe_many` never leaves live subscriptions
    /// the caller doesn't know about. Returns the allocated event IDs in the same
    /// order as `events`.
    pub fn subscribe_many(
        &self,
        events: Vec<(String, Arc<dyn Fn(SimEvent) + Send + Sync>)>,
    ) -> Result<Vec<u32>, SimConnectError> {
        let mut subscribed = Vec::new();
        for (name, callback) in events {
            let cb = callback.clone();
            match self.subscribe(name.clone(), move |ev| (*cb)(ev)) {
                Ok(event_id) => subscribed.push(event_id),
                Err(err) => {
                    for event_id in subscribed {
                        let _ = self.unsubscribe(event_id);
                    }
                    return Err(err);
                }
            }
        }
        Ok(subscribed)
    }

    /// Unsubscribes by event ID. Idempotent: unsubscribing an unknown ID is not an
    /// error, since the end state the caller wants is already true.
    pub fn unsubscribe(&self, event_id: u32) -> Result<(), SimConnectError> {
        let index = match self.by_event_id.write().unwrap().remove(&event_id) {
            Some(index) => index,
            None => return Ok(()),
        };

        let subscription = self
            .subscriptions
            .write()
            .unwrap()
            .get_mut(index)
            .and_then(|slot| slot.take());

        if let Some(subscription) = subscription {
            self.by_name.write().unwrap().remove(&subscription.name);
            self.registry
                .lock()
                .unwrap()
                .forget_event_owner(subscription.event_id);
            self.abi
                .lock()
                .unwrap()
                .unsubscribe_from_system_event(subscription.event_id)?;
            tracing::debug!(event_id, name = %subscription.name, "unsubscribed from system event");
        }
        Ok(())
    }

    /// Unsubscribes every active subscription.
    pub fn unsubscribe_all(&self) -> Result<(), SimConnectError> {
        let ids: Vec<u32> = self.by_event_id.read().unwrap().keys().copied().collect();
        for event_id in ids {
            self.unsubscribe(event_id)?;
        }
        Ok(())
    }

    /// Enables or disables delivery of an already-subscribed event without
    /// tearing down its callback worker.
    pub fn set_event_state(&self, event_id: u32, state: EventState) -> Result<(), SimConnectError> {
        if !self.by_event_id.read().unwrap().contains_key(&event_id) {
            return Err(SimConnectError::UnknownEventId(event_id));
        }
        self.abi
            .lock()
            .unwrap()
            .set_system_event_state(event_id, state)
    }

    /// A snapshot mapping of every currently active subscription's event ID to
    /// its name, in no particular order.
    pub fn get_subscribed_events(&self) -> Vec<(u32, String)> {
        self.by_name
            .read()
            .unwrap()
            .iter()
            .map(|(name, event_id)| (*event_id, name.clone()))
            .collect()
    }

    /// Returns this manager's background error channel. Call `try_recv()` on it
    /// to drain queued errors.
    pub fn get_errors(&self) -> &ErrorReceiver {
        &self.errors
    }

    /// Called by the dispatcher for a decoded basic event.
    pub(crate) fn on_basic_event(&self, ev: codec::BasicEvent) {
        self.dispatch(ev.event_id, SimEvent::from_basic(ev));
    }

    pub(crate) fn on_object_event(&self, ev: codec::ObjectEvent) {
        self.dispatch(ev.event_id, SimEvent::from_object(ev));
    }

    pub(crate) fn on_filename_event(&self, ev: codec::FilenameEvent) {
        self.dispatch(ev.event_id, SimEvent::from_filename(ev));
    }

    pub(crate) fn on_frame_event(&self, ev: codec::FrameEvent) {
        self.dispatch(ev.event_id, SimEvent::from_frame(ev));
    }

    fn dispatch(&self, event_id: u32, event: SimEvent) {
        let index = self.registry.lock().unwrap().lookup_event_owner(event_id);
        match index {
            Some(index) => self.dispatch_to_index(index, event),
            None => {
                tracing::warn!(event_id, "dispatch: unknown event id");
                self.error_sink
                    .publish(SimConnectError::UnknownEventId(event_id));
            }
        }
    }

    fn dispatch_to_index(&self, index: usize, event: SimEvent) {
        let subscriptions = self.subscriptions.read().unwrap();
        if let Some(Some(subscription)) = subscriptions.get(index) {
            // A full/closed channel means the worker already exited; there is
            // nothing to do but drop the event.
            let _ = subscription.tx.send(event);
        }
    }

    fn spawn_subscription(
        &self,
        name: String,
        event_id: u32,
        callback: Box<Callback>,
    ) -> usize {
        let (tx, rx) = mpsc::channel::<SimEvent>();
        let error_sink = self.error_sink.clone();
        let worker_name = name.clone();
        let worker = std::thread::Builder::new()
            .name(format!("simconnect-event-{name}"))
            .spawn(move || {
                while let Ok(event) = rx.recv() {
                    let result = catch_unwind(AssertUnwindSafe(|| callback(event)));
                    if result.is_err() {
                        error_sink.publish(SimConnectError::CallbackPanicked(worker_name.clone()));
                    }
                }
            })
            .expect("failed to spawn event callback worker thread");

        let subscription = Subscription {
            event_id,
            name,
            tx,
            worker: Some(worker),
        };

        let mut subscriptions = self.subscriptions.write().unwrap();
        let index = subscriptions.len();
        subscriptions.push(Some(subscription));
        index
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::MockAbiOps;
    use std::sync::mpsc::channel as test_channel;
    use std::time::Duration;

    fn manager_with_mock(configure: impl FnOnce(&mut MockAbiOps)) -> EventManager {
        let mut mock = MockAbiOps::new();
        configure(&mut mock);
        let abi: Arc<Mutex<dyn AbiOps>> = Arc::new(Mutex::new(mock));
        let registry = Arc::new(Mutex::new(Registry::new()));
        EventManager::new(abi, registry, 10)
    }

    #[test]
    fn start_is_idempotent_error_and_stop_tears_down_subscriptions() {
        let mgr = manager_with_mock(|mock| {
            mock.expect_subscribe_to_system_event()
                .returning(|_, _| Ok(()));
            mock.expect_unsubscribe_from_system_event()
                .returning(|_| Ok(()));
        });
        assert!(!mgr.is_running());
        mgr.start().unwrap();
        assert!(mgr.is_running());
        assert!(matches!(mgr.start(), Err(SimConnectError::AlreadyRunning(_))));

        mgr.subscribe("Pause", |_| {}).unwrap();
        mgr.stop();
        assert!(!mgr.is_running());
        assert!(mgr.get_subscribed_events().is_empty());
    }

    #[test]
    fn subscribe_then_unsubscribe_joins_the_worker_cleanly() {
        let mgr = manager_with_mock(|mock| {
            mock.expect_subscribe_to_system_event()
                .returning(|_, _| Ok(()));
            mock.expect_unsubscribe_from_system_event()
                .returning(|_| Ok(()));
        });
        let event_id = mgr.subscribe("Pause", |_| {}).unwrap();
        assert!(mgr.unsubscribe(event_id).is_ok());
    }

    #[test]
    fn duplicate_subscription_name_is_rejected() {
        let mgr = manager_with_mock(|mock| {
            mock.expect_subscribe_to_system_event()
                .returning(|_, _| Ok(()));
        });
        mgr.subscribe("Pause", |_| {}).unwrap();
        let err = mgr.subscribe("Pause", |_| {});
        assert!(matches!(err, Err(SimConnectError::DuplicateVariable(_))));
    }

    #[test]
    fn callback_actually_receives_dispatched_event() {
        let mgr = manager_with_mock(|mock| {
            mock.expect_subscribe_to_system_event()
                .returning(|_, _| Ok(()));
        });
        let (tx, rx) = test_channel();
        let event_id = mgr
            .subscribe("Pause", move |ev| {
                let _ = tx.send(ev);
            })
            .unwrap();

        mgr.on_basic_event(codec::BasicEvent {
            event_id,
            data: 1,
        });

        let event = rx.recv_timeout(Duration::from_secs(1)).unwrap();
        assert!(matches!(event, SimEvent::Basic { data: 1 }));
    }

    #[test]
    fn unknown_event_id_is_reported_not_panicked() {
        let mgr = manager_with_mock(|_| {});
        mgr.on_basic_event(codec::BasicEvent {
            event_id: 99_999,
            data: 0,
        });
        assert!(matches!(
            mgr.get_errors().try_recv(),
            Some(SimConnectError::UnknownEventId(99_999))
        ));
    }

    #[test]
    fn panicking_callback_is_isolated_and_reported() {
        let mgr = manager_with_mock(|mock| {
            mock.expect_subscribe_to_system_event()
                .returning(|_, _| Ok(()));
        });
        let event_id = mgr.subscribe("Pause", |_| panic!("boom")).unwrap();
        mgr.on_basic_event(codec::BasicEvent {
            event_id,
            data: 0,
        });

        let mut found = None;
        for _ in 0..50 {
            if let Some(err) = mgr.get_errors().try_recv() {
                found = Some(err);
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        assert!(matches!(found, Some(SimConnectError::CallbackPanicked(_))));
    }

    #[test]
    fn unsubscribe_unknown_event_id_is_not_an_error() {
        let mgr = manager_with_mock(|_| {});
        assert!(mgr.unsubscribe(99_999).is_ok());
    }

    #[test]
    fn get_subscribed_events_reflects_unsubscribe() {
        let mgr = manager_with_mock(|mock| {
            mock.expect_subscribe_to_system_event()
                .returning(|_, _| Ok(()));
            mock.expect_unsubscribe_from_system_event()
                .returning(|_| Ok(()));
        });
        let event_id = mgr.subscribe("Pause", |_| {}).unwrap();
        assert_eq!(
            mgr.get_subscribed_events(),
            vec![(event_id, "Pause".to_string())]
        );
        mgr.unsubscribe(event_id).unwrap();
        assert!(mgr.get_subscribed_events().is_empty());
    }

    #[test]
    fn set_event_state_rejects_unknown_event_id() {
        let mgr = manager_with_mock(|_| {});
        assert!(matches!(
            mgr.set_event_state(99_999, EventState::Off),
            Err(SimConnectError::UnknownEventId(99_999))
        ));
    }
}
