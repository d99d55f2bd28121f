//! Maintains the set of registered simulation variables, arms their periodic
//! requests, stores the latest value of each, and exposes read/write access.
//!
//! Public getters take a read lock; `add_variable`, the state transitions, and the
//! inbound value update all take a write lock. No lock is ever held across a call
//! into the ABI Bridge.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::SystemTime;

use rustc_hash::FxHashMap;

use crate::abi::{DataRequestFlag, DatumType, ObjectId, Period};
use crate::bridge::AbiOps;
use crate::codec::DataSample;
use crate::error::{error_channel, ErrorReceiver, ErrorSink, SimConnectError};
use crate::registry::Registry;

/// A snapshot of one registered variable.
#[derive(Debug, Clone)]
pub struct VariableRecord {
    pub name: String,
    pub vendor_name: String,
    pub units: String,
    pub definition_id: u32,
    pub request_id: u32,
    pub value: f64,
    pub updated: Option<SystemTime>,
    pub writable: bool,
}

struct VariableTable {
    records: Vec<VariableRecord>,
    by_name: FxHashMap<String, usize>,
}

impl VariableTable {
    fn new() -> Self {
        Self {
            records: Vec::new(),
            by_name: FxHashMap::default(),
        }
    }
}

/// Aggregate counters exposed by `get_stats()`.
#[derive(Debug, Clone, Copy)]
pub struct Stats {
    pub total_updates: u64,
    pub error_count: u64,
    pub last_update: Option<SystemTime>,
}

/// Maintains registered simulation variables and their live values.
///
/// Shares the connection's [`Registry`] and ABI bridge handle with the
/// [`Dispatcher`](crate::dispatcher::Dispatcher) and
/// [`EventManager`](crate::event_manager::EventManager).
pub struct VariableManager {
    abi: Arc<Mutex<dyn AbiOps>>,
    registry: Arc<Mutex<Registry>>,
    table: RwLock<VariableTable>,
    running: AtomicBool,
    total_updates: AtomicU64,
    error_count: AtomicU64,
    last_update: RwLock<Option<SystemTime>>,
    error_sink: ErrorSink,
    errors: ErrorReceiver,
}

impl VariableManager {
    pub(crate) fn new(
        abi: Arc<Mutex<dyn AbiOps>>,
        registry: Arc<Mutex<Registry>>,
        error_channel_capacity: usize,
    ) -> Self {
        let (error_sink, errors) = error_channel(error_channel_capacity);
        Self {
            abi,
            registry,
            table: RwLock::new(VariableTable::new()),
            running: AtomicBool::new(false),
            total_updates: AtomicU64::new(0),
            error_count: AtomicU64::new(0),
            last_update: RwLock::new(None),
            error_sink,
            errors,
        }
    }

    /// Registers a read-only simulation variable. Fails once the manager is running.
    pub fn add_variable(
        &self,
        name: impl Into<String>,
        vendor_name: impl Into<String>,
        units: impl Into<String>,
    ) -> Result<(), SimConnectError> {
        self.add_variable_writable(name, vendor_name, units, false)
    }

    /// Registers a simulation variable, optionally allowing `set_variable` writes.
    pub fn add_variable_writable(
        &self,
        name: impl Into<String>,
        vendor_name: impl Into<String>,
        units: impl Into<String>,
        writable: bool,
    ) -> Result<(), SimConnectError> {
        let name = name.into();
        if self.running.load(Ordering::Acquire) {
            return Err(SimConnectError::AlreadyRunning(name));
        }

        let mut table = self.table.write().unwrap();
        if table.by_name.contains_key(&name) {
            return Err(SimConnectError::DuplicateVariable(name));
        }

        let mut registry = self.registry.lock().unwrap();
        let definition_id = registry.next_definition_id();
        let request_id = registry.next_request_id();
        drop(registry);

        let index = table.records.len();
        table.records.push(VariableRecord {
            name: name.clone(),
            vendor_name: vendor_name.into(),
            units: units.into(),
            definition_id,
            request_id,
            value: 0.0,
            updated: None,
            writable,
        });
        table.by_name.insert(name, index);
        Ok(())
    }

    /// Arms every registered variable with `period = once-per-second`,
    /// `flags = changed-only`, the only combination this manager supports. Aborts
    /// on the first native error; variables armed before the failing one remain
    /// armed, and that partial state is surfaced to the caller rather than
    /// silently unwound.
    pub fn start(&self) -> Result<(), SimConnectError> {
        if self.running.swap(true, Ordering::AcqRel) {
            return Err(SimConnectError::AlreadyRunning("<manager>".into()));
        }

        let snapshot: Vec<(usize, u32, String, String, u32)> = {
            let table = self.table.read().unwrap();
            if table.records.is_empty() {
                self.running.store(false, Ordering::Release);
                return Err(SimConnectError::NoVariables);
            }
            table
                .records
                .iter()
                .enumerate()
                .map(|(index, record)| {
                    (
                        index,
                        record.definition_id,
                        record.vendor_name.clone(),
                        record.units.clone(),
                        record.request_id,
                    )
                })
                .collect()
        };

        for (index, definition_id, vendor_name, units, request_id) in snapshot {
            self.abi.lock().unwrap().add_to_data_definition(
                definition_id,
                &vendor_name,
                &units,
                DatumType::Float64,
            )?;
            self.abi.lock().unwrap().request_data_on_sim_object(
                request_id,
                definition_id,
                ObjectId::USER,
                Period::SecondOnce,
                DataRequestFlag::ChangedOnly,
            )?;
            self.registry
                .lock()
                .unwrap()
                .register_request_owner(request_id, index);
        }

        tracing::info!(variable_count = %self.table.read().unwrap().records.len(), "variable manager started");
        Ok(())
    }

    /// Idempotent: calling `stop()` twice behaves like calling it once.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
        tracing::info!("variable manager stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Returns a copy of one variable's current record.
    pub fn get_variable(&self, name: &str) -> Result<VariableRecord, SimConnectError> {
        let table = self.table.read().unwrap();
        let index = table
            .by_name
            .get(name)
            .ok_or_else(|| SimConnectError::VariableNotFound(name.to_string()))?;
        Ok(table.records[*index].clone())
    }

    /// Returns a snapshot copy of every registered variable.
    pub fn get_all_variables(&self) -> Vec<VariableRecord> {
        self.table.read().unwrap().records.clone()
    }

    /// Writes a new value for a writable variable by name.
    pub fn set_variable(&self, name: &str, value: f64) -> Result<(), SimConnectError> {
        let index = {
            let table = self.table.read().unwrap();
            *table
                .by_name
                .get(name)
                .ok_or_else(|| SimConnectError::VariableNotFound(name.to_string()))?
        };
        self.set_variable_by_index(index, value)
    }

    /// Writes a new value for a writable variable by its index in
    /// `get_all_variables()` order.
    pub fn set_variable_by_index(&self, index: usize, value: f64) -> Result<(), SimConnectError> {
        let (definition_id, writable, len) = {
            let table = self.table.read().unwrap();
            let len = table.records.len();
            let record = table
                .records
                .get(index)
                .ok_or(SimConnectError::IndexOutOfRange(index, len))?;
            (record.definition_id, record.writable, len)
        };

        if index >= len {
            return Err(SimConnectError::IndexOutOfRange(index, len));
        }
        if !writable {
            let name = self.table.read().unwrap().records[index].name.clone();
            return Err(SimConnectError::NotWritable(name));
        }

        let payload = value.to_le_bytes();
        self.abi
            .lock()
            .unwrap()
            .set_data_on_sim_object(definition_id, ObjectId::USER, &payload)
    }

    pub fn get_stats(&self) -> Stats {
        Stats {
            total_updates: self.total_updates.load(Ordering::Acquire),
            error_count: self.error_count.load(Ordering::Acquire),
            last_update: *self.last_update.read().unwrap(),
        }
    }

    /// Returns this manager's background error channel. Call `try_recv()` on it
    /// to drain queued errors.
    pub fn get_errors(&self) -> &ErrorReceiver {
        &self.errors
    }

    /// Called by the dispatcher for every inbound data-sample record.
    ///
    /// Unknown request IDs and short payloads are counted and reported but never
    /// terminate the dispatcher.
    pub(crate) fn on_data_sample(&self, sample: DataSample) {
        let Some(value) = sample.first_f64() else {
            return;
        };

        let index = self
            .registry
            .lock()
            .unwrap()
            .lookup_request_owner(sample.request_id);

        let Some(index) = index else {
            self.error_count.fetch_add(1, Ordering::AcqRel);
            self.error_sink
                .publish(SimConnectError::UnknownRequestId(sample.request_id));
            return;
        };

        let now = SystemTime::now();
        {
            let mut table = self.table.write().unwrap();
            if let Some(record) = table.records.get_mut(index) {
                record.value = value;
                record.updated = Some(now);
            }
        }
        *self.last_update.write().unwrap() = Some(now);
        self.total_updates.fetch_add(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::MockAbiOps;

    /// Builds a manager over a mock configured by `configure` before it is erased
    /// into the trait object the manager actually stores.
    fn manager_with_mock(configure: impl FnOnce(&mut MockAbiOps)) -> VariableManager {
        let mut mock = MockAbiOps::new();
        configure(&mut mock);
        let abi: Arc<Mutex<dyn AbiOps>> = Arc::new(Mutex::new(mock));
        let registry = Arc::new(Mutex::new(Registry::new()));
        VariableManager::new(abi, registry, 10)
    }

    #[test]
    fn add_after_start_is_rejected() {
        let mgr = manager_with_mock(|mock| {
            mock.expect_add_to_data_definition().returning(|_, _, _, _| Ok(()));
            mock.expect_request_data_on_sim_object()
                .returning(|_, _, _, _, _| Ok(()));
        });
        mgr.add_variable("Altitude", "Plane Altitude", "feet").unwrap();
        mgr.start().unwrap();

        let err = mgr.add_variable("Throttle", "General Eng Throttle Lever Position:1", "percent");
        assert!(matches!(err, Err(SimConnectError::AlreadyRunning(_))));
    }

    #[test]
    fn duplicate_variable_name_is_rejected() {
        let mgr = manager_with_mock(|_| {});
        mgr.add_variable("Altitude", "Plane Altitude", "feet").unwrap();
        let err = mgr.add_variable("Altitude", "Plane Altitude", "feet");
        assert!(matches!(err, Err(SimConnectError::DuplicateVariable(_))));
    }

    #[test]
    fn start_with_no_variables_fails() {
        let mgr = manager_with_mock(|_| {});
        assert!(matches!(mgr.start(), Err(SimConnectError::NoVariables)));
    }

    #[test]
    fn not_writable_short_circuits_before_touching_the_bridge() {
        let mgr = manager_with_mock(|mock| {
            mock.expect_set_data_on_sim_object().times(0);
        });
        mgr.add_variable("Altitude", "Plane Altitude", "feet").unwrap();
        let err = mgr.set_variable("Altitude", 0.0);
        assert!(matches!(err, Err(SimConnectError::NotWritable(_))));
    }

    #[test]
    fn writable_variable_invokes_bridge_once_with_eight_byte_payload() {
        let mgr = manager_with_mock(|mock| {
            mock.expect_set_data_on_sim_object()
                .withf(|_, _, payload| payload.len() == 8)
                .times(1)
                .returning(|_, _, _| Ok(()));
        });
        mgr.add_variable_writable(
            "Throttle",
            "General Eng Throttle Lever Position:1",
            "percent",
            true,
        )
        .unwrap();
        mgr.set_variable("Throttle", 75.0).unwrap();
    }

    #[test]
    fn data_sample_updates_value_and_stats() {
        let mgr = manager_with_mock(|_| {});
        mgr.add_variable("Altitude", "Plane Altitude", "feet").unwrap();
        let request_id = mgr.get_variable("Altitude").unwrap().request_id;

        mgr.on_data_sample(DataSample {
            request_id,
            object_id: 0,
            definition_id: 0,
            payload: 1234.5f64.to_le_bytes().to_vec(),
        });

        let record = mgr.get_variable("Altitude").unwrap();
        assert_eq!(record.value, 1234.5);
        assert_eq!(mgr.get_stats().total_updates, 1);
    }

    #[test]
    fn unknown_request_id_increments_error_count_and_publishes() {
        let mgr = manager_with_mock(|_| {});
        mgr.add_variable("Altitude", "Plane Altitude", "feet").unwrap();

        mgr.on_data_sample(DataSample {
            request_id: 99_999,
            object_id: 0,
            definition_id: 0,
            payload: 1.0f64.to_le_bytes().to_vec(),
        });

        assert_eq!(mgr.get_stats().error_count, 1);
        assert!(matches!(
            mgr.get_errors().try_recv(),
            Some(SimConnectError::UnknownRequestId(99_999))
        ));
        assert_eq!(mgr.get_variable("Altitude").unwrap().updated, None);
    }

    #[test]
    fn short_payload_is_ignored_not_counted() {
        let mgr = manager_with_mock(|_| {});
        mgr.add_variable("Altitude", "Plane Altitude", "feet").unwrap();
        let request_id = mgr.get_variable("Altitude").unwrap().request_id;

        mgr.on_data_sample(DataSample {
            request_id,
            object_id: 0,
            definition_id: 0,
            payload: vec![0u8; 4],
        });

        assert_eq!(mgr.get_stats().total_updates, 0);
        assert_eq!(mgr.get_stats().error_count, 0);
    }
}
