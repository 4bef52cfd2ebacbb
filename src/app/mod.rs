//! Application core: pure domain logic, zero I/O.
//!
//! The business rules of the kiosk: one fortune pipeline per accepted tag,
//! every slow stage bounded by a deadline.  All interaction with the device,
//! the generator and the printer happens through **port traits** defined in
//! [`ports`], keeping this layer fully testable without real peripherals.

pub mod commands;
pub mod events;
pub mod pipeline;
pub mod ports;
pub mod service;
