//! The top-level handle applications hold: opens the native library, owns the
//! shared [`Registry`] and ABI handle, and wires the Variable Manager, Event
//! Manager, and Dispatcher together.

use std::sync::{Arc, Mutex};

use crate::bridge::{AbiOps, NativeBridge};
use crate::config::ConnectionConfig;
use crate::dispatcher::Dispatcher;
use crate::error::{ErrorReceiver, SimConnectError};
use crate::event_manager::EventManager;
use crate::registry::Registry;
#[cfg(feature = "remote-endpoint")]
use crate::remote_endpoint::{remote_endpoint, RemoteEndpoint};
use crate::variable::VariableManager;

/// A connection to a running simulator host.
///
/// Construct with [`Connection::open`] (uses [`ConnectionConfig::default`]) or
/// [`Connection::open_with_config`]. A `Connection` is useless once [`close`] has
/// been called; open a new one instead of trying to reopen it.
///
/// [`close`]: Connection::close
pub struct Connection {
    abi: Arc<Mutex<dyn AbiOps>>,
    variables: Arc<VariableManager>,
    events: Arc<EventManager>,
    dispatcher: Dispatcher,
    dispatch_errors: ErrorReceiver,
    open: bool,
    #[cfg(feature = "remote-endpoint")]
    remote: RemoteEndpoint,
}

impl Connection {
    /// Opens a connection using [`ConnectionConfig::default`].
    pub fn open(client_name: &str) -> Result<Self, SimConnectError> {
        Self::open_with_config(client_name, ConnectionConfig::default())
    }

    /// Opens a connection to the simulator host, loading the native library and
    /// starting the background dispatcher thread.
    pub fn open_with_config(
        client_name: &str,
        config: ConnectionConfig,
    ) -> Result<Self, SimConnectError> {
        let dll_path = config
            .dll_path
            .clone()
            .unwrap_or_else(|| "SimConnect.dll".to_string());

        let mut bridge = NativeBridge::new(dll_path);
        bridge.open(client_name)?;
        tracing::info!(client_name, "connection opened");

        let abi: Arc<Mutex<dyn AbiOps>> = Arc::new(Mutex::new(bridge));
        Self::from_abi(abi, config)
    }

    /// Builds a `Connection` over an already-open [`AbiOps`] implementation.
    ///
    /// Exists so tests (and anyone who needs to drive a mock transport, such as a
    /// remote bridge backend behind the `remote-endpoint` feature) can construct a
    /// fully wired `Connection` without going through `NativeBridge::open`.
    pub fn from_abi(
        abi: Arc<Mutex<dyn AbiOps>>,
        config: ConnectionConfig,
    ) -> Result<Self, SimConnectError> {
        let registry = Arc::new(Mutex::new(Registry::new()));
        let variables = Arc::new(VariableManager::new(
            abi.clone(),
            registry.clone(),
            config.error_channel_capacity,
        ));
        let events = Arc::new(EventManager::new(
            abi.clone(),
            registry,
            config.error_channel_capacity,
        ));

        let (error_sink, dispatch_errors) = crate::error::error_channel(config.error_channel_capacity);
        let mut dispatcher = Dispatcher::new(
            abi.clone(),
            variables.clone(),
            events.clone(),
            error_sink,
            config.tick_interval,
        );

        #[cfg(feature = "remote-endpoint")]
        let remote = {
            let (endpoint, subscriber) = remote_endpoint();
            dispatcher.attach_remote_endpoint(subscriber);
            endpoint
        };

        dispatcher.start();

        Ok(Self {
            abi,
            variables,
            events,
            dispatcher,
            dispatch_errors,
            open: true,
            #[cfg(feature = "remote-endpoint")]
            remote,
        })
    }

    /// Returns a cloneable handle for posting closures onto the dispatcher
    /// thread. Available only with the `remote-endpoint` feature.
    #[cfg(feature = "remote-endpoint")]
    pub fn remote_endpoint(&self) -> RemoteEndpoint {
        self.remote.clone()
    }

    /// Access to the Variable Manager.
    pub fn variables(&self) -> &VariableManager {
        &self.variables
    }

    /// Access to the Event Manager.
    pub fn events(&self) -> &EventManager {
        &self.events
    }

    /// The dispatcher's own background error channel: malformed messages, async
    /// host exceptions, and raw-pull failures that aren't tied to either manager.
    /// Call `try_recv()` on it to drain queued errors.
    pub fn dispatch_errors(&self) -> &ErrorReceiver {
        &self.dispatch_errors
    }

    pub fn is_open(&self) -> bool {
        self.open && !self.dispatcher.is_terminal()
    }

    /// Stops the dispatcher and closes the native library. Calling `close()` twice
    /// returns [`SimConnectError::AlreadyClosed`] the second time.
    pub fn close(&mut self) -> Result<(), SimConnectError> {
        if !self.open {
            return Err(SimConnectError::AlreadyClosed);
        }
        self.open = false;
        self.dispatcher.stop();
        self.variables.stop();
        self.events.stop();
        let result = self.abi.lock().unwrap().close();
        tracing::info!("connection closed");
        result
    }

    /// Pulls and returns one raw, undecoded message from the queue, bypassing the
    /// dispatcher entirely. Diagnostic escape hatch for inspecting bytes the codec
    /// rejected; not used by normal operation.
    pub fn pull_raw_message(&self) -> Result<Option<Vec<u8>>, SimConnectError> {
        self.abi.lock().unwrap().pull_raw_message()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if self.open {
            let _ = self.close();
        }
    }
}
