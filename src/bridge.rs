//! The safe, typed interface over the vendor C ABI.
//!
//! [`AbiOps`] is the seam: the Variable Manager, Event Manager, and Dispatcher all
//! depend on `Box<dyn AbiOps>` (or a generic `AbiOps` bound), never on
//! [`NativeBridge`] directly, so unit tests can swap in `MockAbiOps` without a real
//! DLL and without a real simulator host.

use std::ffi::CString;
use std::os::raw::c_char;

use libloading::{Library, Symbol};

use crate::abi::{DataRequestFlag, DatumType, ObjectId, Period, RawStatus};
use crate::error::SimConnectError;

/// A decoded status, carrying enough context to build a [`SimConnectError::Native`]
/// if it was not a success.
pub type AbiResult<T> = Result<T, SimConnectError>;

/// Every native entry point this crate calls, behind a trait so it can be mocked.
///
/// Method names mirror the vendor function names in `snake_case`.
#[cfg_attr(feature = "mock", mockall::automock)]
pub trait AbiOps: Send {
    fn open(&mut self, client_name: &str) -> AbiResult<()>;
    fn close(&mut self) -> AbiResult<()>;
    fn add_to_data_definition(
        &mut self,
        def_id: u32,
        variable_name: &str,
        units: &str,
        datum_type: DatumType,
    ) -> AbiResult<()>;
    fn request_data_on_sim_object(
        &mut self,
        request_id: u32,
        def_id: u32,
        object_id: ObjectId,
        period: Period,
        flags: DataRequestFlag,
    ) -> AbiResult<()>;
    fn set_data_on_sim_object(
        &mut self,
        def_id: u32,
        object_id: ObjectId,
        payload: &[u8],
    ) -> AbiResult<()>;
    fn subscribe_to_system_event(&mut self, event_id: u32, event_name: &str) -> AbiResult<()>;
    fn unsubscribe_from_system_event(&mut self, event_id: u32) -> AbiResult<()>;
    fn set_system_event_state(
        &mut self,
        event_id: u32,
        state: crate::abi::EventState,
    ) -> AbiResult<()>;
    fn request_system_state(&mut self, request_id: u32, state_name: &str) -> AbiResult<()>;
    /// Pulls one raw message, copying the native-owned buffer into a
    /// library-owned `Vec`. Returns `None` when the queue is empty.
    fn pull_raw_message(&mut self) -> AbiResult<Option<Vec<u8>>>;
}

type FnOpen = unsafe extern "C" fn(*mut u64, *const c_char, u32, u64, u32) -> i32;
type FnClose = unsafe extern "C" fn(u64) -> i32;
type FnAddToDataDefinition =
    unsafe extern "C" fn(u64, u32, *const c_char, *const c_char, u32, f32, u32) -> i32;
type FnRequestDataOnSimObject =
    unsafe extern "C" fn(u64, u32, u32, u32, u32, u32, f32, u32, u32) -> i32;
type FnSetDataOnSimObject = unsafe extern "C" fn(u64, u32, u32, u32, u32, u32, *const u8) -> i32;
type FnSubscribeToSystemEvent = unsafe extern "C" fn(u64, u32, *const c_char) -> i32;
type FnUnsubscribeFromSystemEvent = unsafe extern "C" fn(u64, u32) -> i32;
type FnSetSystemEventState = unsafe extern "C" fn(u64, u32, u32) -> i32;
type FnRequestSystemState = unsafe extern "C" fn(u64, u32, *const c_char) -> i32;
type FnGetNextDispatch = unsafe extern "C" fn(u64, *mut *const u8, *mut u32) -> i32;

/// Loads the vendor DLL and resolves each entry point once, at `open()` time.
///
/// A missing symbol is reported as [`SimConnectError::LibraryLoad`], not a panic:
/// the vendor DLL is third-party input and this crate never assumes it is well
/// formed.
pub struct NativeBridge {
    library_path: String,
    library: Option<Library>,
    handle: u64,
}

impl NativeBridge {
    pub fn new(library_path: impl Into<String>) -> Self {
        Self {
            library_path: library_path.into(),
            library: None,
            handle: 0,
        }
    }

    fn symbol<'a, T>(lib: &'a Library, name: &str) -> AbiResult<Symbol<'a, T>> {
        let cname = CString::new(name).expect("symbol name has no interior nul");
        unsafe { lib.get(cname.as_bytes_with_nul()) }
            .map_err(|e| SimConnectError::LibraryLoad(format!("{name}: {e}")))
    }

    fn call(function: &'static str, status: i32) -> AbiResult<()> {
        match RawStatus(status as u32).classify() {
            crate::abi::StatusClass::Success => Ok(()),
            crate::abi::StatusClass::InvalidArgument => Err(SimConnectError::Native {
                function,
                code: status as u32,
                message: "invalid argument".into(),
            }),
            crate::abi::StatusClass::RemoteDisconnect => Err(SimConnectError::Disconnected),
            crate::abi::StatusClass::QueueEmpty => Ok(()),
            crate::abi::StatusClass::Unknown(code) => Err(SimConnectError::Native {
                function,
                code,
                message: "unclassified native failure".into(),
            }),
        }
    }

    fn library(&self) -> AbiResult<&Library> {
        self.library.as_ref().ok_or(SimConnectError::NotOpen)
    }
}

impl AbiOps for NativeBridge {
    fn open(&mut self, client_name: &str) -> AbiResult<()> {
        if self.library.is_some() {
            return Err(SimConnectError::AlreadyOpen);
        }
        let lib = unsafe { Library::new(&self.library_path) }
            .map_err(|e| SimConnectError::LibraryLoad(e.to_string()))?;
        let name = CString::new(client_name).map_err(|_| {
            SimConnectError::Native {
                function: "SimConnect_Open",
                code: 0,
                message: "client name has an interior nul".into(),
            }
        })?;

        let mut handle = 0u64;
        let status = {
            let open: Symbol<FnOpen> = Self::symbol(&lib, "SimConnect_Open")?;
            unsafe { open(&mut handle, name.as_ptr(), 0, 0, 0) }
        };
        Self::call("SimConnect_Open", status)?;

        self.handle = handle;
        self.library = Some(lib);
        Ok(())
    }

    fn close(&mut self) -> AbiResult<()> {
        let lib = self.library.take().ok_or(SimConnectError::NotOpen)?;
        let close: Symbol<FnClose> = Self::symbol(&lib, "SimConnect_Close")?;
        let status = unsafe { close(self.handle) };
        self.handle = 0;
        Self::call("SimConnect_Close", status)
    }

    fn add_to_data_definition(
        &mut self,
        def_id: u32,
        variable_name: &str,
        units: &str,
        datum_type: DatumType,
    ) -> AbiResult<()> {
        let lib = self.library()?;
        let f: Symbol<FnAddToDataDefinition> = Self::symbol(lib, "SimConnect_AddToDataDefinition")?;
        let name = CString::new(variable_name).unwrap_or_default();
        let units = CString::new(units).unwrap_or_default();
        let status = unsafe {
            f(
                self.handle,
                def_id,
                name.as_ptr(),
                units.as_ptr(),
                datum_type.raw(),
                0.0,
                0,
            )
        };
        Self::call("SimConnect_AddToDataDefinition", status)
    }

    fn request_data_on_sim_object(
        &mut self,
        request_id: u32,
        def_id: u32,
        object_id: ObjectId,
        period: Period,
        flags: DataRequestFlag,
    ) -> AbiResult<()> {
        let lib = self.library()?;
        let f: Symbol<FnRequestDataOnSimObject> =
            Self::symbol(lib, "SimConnect_RequestDataOnSimObject")?;
        let status = unsafe {
            f(
                self.handle,
                request_id,
                def_id,
                object_id.0,
                period.raw(),
                flags.raw(),
                0.0,
                0,
                0,
            )
        };
        Self::call("SimConnect_RequestDataOnSimObject", status)
    }

    fn set_data_on_sim_object(
        &mut self,
        def_id: u32,
        object_id: ObjectId,
        payload: &[u8],
    ) -> AbiResult<()> {
        let lib = self.library()?;
        let f: Symbol<FnSetDataOnSimObject> = Self::symbol(lib, "SimConnect_SetDataOnSimObject")?;
        let status = unsafe {
            f(
                self.handle,
                def_id,
                object_id.0,
                0, // non-tagged: whole-payload replace
                1,
                payload.len() as u32,
                payload.as_ptr(),
            )
        };
        Self::call("SimConnect_SetDataOnSimObject", status)
    }

    fn subscribe_to_system_event(&mut self, event_id: u32, event_name: &str) -> AbiResult<()> {
        let lib = self.library()?;
        let f: Symbol<FnSubscribeToSystemEvent> =
            Self::symbol(lib, "SimConnect_SubscribeToSystemEvent")?;
        let name = CString::new(event_name).unwrap_or_default();
        let status = unsafe { f(self.handle, event_id, name.as_ptr()) };
        Self::call("SimConnect_SubscribeToSystemEvent", status)
    }

    fn unsubscribe_from_system_event(&mut self, event_id: u32) -> AbiResult<()> {
        let lib = self.library()?;
        let f: Symbol<FnUnsubscribeFromSystemEvent> =
            Self::symbol(lib, "SimConnect_UnsubscribeFromSystemEvent")?;
        let status = unsafe { f(self.handle, event_id) };
        Self::call("SimConnect_UnsubscribeFromSystemEvent", status)
    }

    fn set_system_event_state(
        &mut self,
        event_id: u32,
        state: crate::abi::EventState,
    ) -> AbiResult<()> {
        let lib = self.library()?;
        let f: Symbol<FnSetSystemEventState> = Self::symbol(lib, "SimConnect_SetSystemEventState")?;
        let status = unsafe { f(self.handle, event_id, state.raw()) };
        Self::call("SimConnect_SetSystemEventState", status)
    }

    fn request_system_state(&mut self, request_id: u32, state_name: &str) -> AbiResult<()> {
        let lib = self.library()?;
        let f: Symbol<FnRequestSystemState> = Self::symbol(lib, "SimConnect_RequestSystemState")?;
        let name = CString::new(state_name).unwrap_or_default();
        let status = unsafe { f(self.handle, request_id, name.as_ptr()) };
        Self::call("SimConnect_RequestSystemState", status)
    }

    fn pull_raw_message(&mut self) -> AbiResult<Option<Vec<u8>>> {
        let lib = self.library()?;
        let f: Symbol<FnGetNextDispatch> = Self::symbol(lib, "SimConnect_GetNextDispatch")?;

        let mut ptr: *const u8 = std::ptr::null();
        let mut size: u32 = 0;
        let status = unsafe { f(self.handle, &mut ptr, &mut size) };

        if RawStatus(status as u32) == RawStatus::QUEUE_EMPTY {
            return Ok(None);
        }
        Self::call("SimConnect_GetNextDispatch", status)?;

        if ptr.is_null() || size == 0 {
            return Ok(None);
        }
        // SAFETY: the native library guarantees `ptr` is valid for `size` bytes
        // until the next dispatch call; we copy it into a library-owned buffer
        // immediately so the caller never observes the borrowed lifetime.
        let bytes = unsafe { std::slice::from_raw_parts(ptr, size as usize) }.to_vec();
        Ok(Some(bytes))
    }
}

#[cfg(all(test, feature = "mock"))]
mod tests {
    use super::*;
    use crate::abi::EventState;

    #[test]
    fn mock_satisfies_the_trait_object_shape() {
        let mut mock = MockAbiOps::new();
        mock.expect_open().returning(|_| Ok(()));
        mock.expect_close().returning(|| Ok(()));
        mock.expect_set_system_event_state()
            .returning(|_, _| Ok(()));

        let bridge: &mut dyn AbiOps = &mut mock;
        assert!(bridge.open("T1").is_ok());
        assert!(bridge.set_system_event_state(1, EventState::On).is_ok());
        assert!(bridge.close().is_ok());
    }
}
