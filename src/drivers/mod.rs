//! Output drivers.
//!
//! The controller firmware owns the physical LEDs; this side only decides
//! which colour to request for each pipeline state.

pub mod light;
