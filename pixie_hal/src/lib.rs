//! # Pixie HAL Library
//!
//! Pluggable module hardware backends.
//!
//! Backends implement the `ModuleHardware` trait defined in
//! `pixie_common::hw`. The SDK creates one backend instance per probed
//! device through the [`DriverRegistry`].
//!
//! # Module Structure
//!
//! - [`driver_registry`] - Backend factory registration
//! - [`drivers`] - Backend implementations
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │          pixie_sdk::PixieCrate           │
//! │    one Module per slot, one backend each │
//! └────────────────────┬─────────────────────┘
//!                      │ Box<dyn ModuleHardware>
//!                      ▼
//! ┌─────────────────┐    ┌───────────────────┐
//! │ DriverRegistry  │───►│  SimulatedModule  │
//! └─────────────────┘    └───────────────────┘
//! ```

#![deny(missing_docs)]

pub mod driver_registry;
pub mod drivers;

pub use crate::driver_registry::DriverRegistry;
pub use crate::drivers::register_all_drivers;
