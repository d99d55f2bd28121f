//! A thread-safe runtime for talking to a flight simulator host over its native
//! SimConnect-style client ABI.
//!
//! This crate loads the vendor DLL, arms a set of named simulation variables for
//! periodic delivery, subscribes to named system events, and dispatches both onto
//! a background thread so application code never blocks on the native transport.
//!
//! # Key Features
//!
//! - **Typed ABI boundary**: every native entry point is wrapped behind the
//!   [`AbiOps`] trait, so the rest of the crate, and your tests, never touch a
//!   raw function pointer.
//! - **Checked decoding**: inbound messages are parsed through a bounds-checked
//!   cursor; a short or malformed buffer is a typed error, never a panic.
//! - **Isolated callbacks**: each event subscription runs its callback on its own
//!   worker thread, so one slow or panicking subscriber never blocks another.
//! - **Testability**: [`AbiOps`] is mockable via `mockall` behind the `mock`
//!   feature, so the managers and dispatcher are fully testable without a real
//!   simulator host.
//!
//! # Core Concepts
//!
//! - [`Connection`]: opens the native library and owns the background dispatcher.
//! - [`VariableManager`]: registers and arms simulation variables, and holds
//!   their latest values.
//! - [`EventManager`]: subscribes to named system events and fans occurrences out
//!   to per-subscription callbacks.
//! - [`SimEvent`]: the tagged record delivered to event callbacks.
//!
//! # Examples
//!
//! ```no_run
//! use simconnect_rt::{Connection, SimEvent};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut conn = Connection::open("my-addon")?;
//!
//! conn.variables().add_variable("Plane Altitude", "Plane Altitude", "feet")?;
//! conn.variables().start()?;
//!
//! conn.events().subscribe("Pause", |event: SimEvent| {
//!     println!("{event:?}");
//! })?;
//!
//! conn.close()?;
//! # Ok(()) }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(rustdoc::broken_intra_doc_links)]
#![deny(rustdoc::private_intra_doc_links)]

pub mod abi;
pub mod bridge;
pub mod codec;
pub mod config;
pub mod connection;
pub mod error;
pub mod event_manager;
#[cfg(feature = "remote-endpoint")]
pub mod remote_endpoint;
mod registry;
pub mod sim_event;
pub mod variable;

pub use crate::bridge::{AbiOps, NativeBridge};
#[cfg(feature = "mock")]
pub use crate::bridge::MockAbiOps;
pub use crate::config::ConnectionConfig;
pub use crate::connection::Connection;
pub use crate::error::{ErrorReceiver, SimConnectError};
pub use crate::event_manager::EventManager;
#[cfg(feature = "remote-endpoint")]
pub use crate::remote_endpoint::RemoteEndpoint;
pub use crate::sim_event::SimEvent;
pub use crate::variable::VariableManager;
