//! Divinofax orchestration library.
//!
//! Exposes the engine for the binary and for integration testing.  The
//! pure pipeline logic lives in [`app`] and [`fsm`]; everything that talks
//! to hardware or processes sits behind the port traits in
//! [`app::ports`].

#![deny(unused_must_use)]

pub mod adapters;
pub mod app;
pub mod config;
pub mod debounce;
pub mod drivers;
pub mod error;
pub mod fsm;
pub mod link;
pub mod runtime;
pub mod sim;
