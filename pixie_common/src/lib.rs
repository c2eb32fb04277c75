//! Pixie Common Library
//!
//! This crate provides the pieces every Pixie crate shares: hardware
//! constants, the DSP variable catalog, address maps, firmware sets,
//! configuration loading and the hardware access trait.
//!
//! # Module Structure
//!
//! - [`consts`] - Hardware constants and limits
//! - [`error`] - Error codes and the structured error type
//! - [`config`] - Configuration loading traits and types
//! - [`param`] - Variable and parameter catalog, copy filters
//! - [`address`] - DSP variable address map
//! - [`firmware`] - Firmware images, sets and catalog
//! - [`hw`] - Hardware access trait
//! - [`prelude`] - Common re-exports for convenience
//!
//! # Usage
//!
//! Add to your `Cargo.toml`:
//! ```toml
//! [dependencies]
//! pixie_common = { path = "../pixie_common" }
//! ```
//!
//! Then import:
//! ```rust
//! use pixie_common::prelude::*;
//! ```

#![deny(missing_docs)]

pub mod address;
pub mod config;
pub mod consts;
pub mod error;
pub mod firmware;
pub mod hw;
pub mod param;
pub mod prelude;
