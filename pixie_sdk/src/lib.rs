//! # Pixie SDK
//!
//! Crate, module and channel control for Pixie digital pulse processors.
//!
//! A [`PixieCrate`] owns one [`Module`] per backplane slot. Modules own the
//! DSP variable caches and run state; [`ChannelView`] converts the named
//! channel parameters to and from raw DSP variables.
//!
//! # Module Structure
//!
//! - [`pixie_crate`] - Slot table, probe, concurrent boot, shutdown
//! - [`module`] - Boot, variable access, run control and FIFO draining
//! - [`channel`] - Engineering unit conversion of channel parameters
//! - [`baseline`] - Baseline capture and cut finding
//! - [`backplane`] - Backplane roles and synchronous run accounting
//! - [`stats`] - Run, module and channel statistics
//! - [`settings`] - Settings import and export
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                  PixieCrate                  │
//! │  Mutex<slots>  AtomicBool ready  users count │
//! └──────┬───────────────┬───────────────┬───────┘
//!        ▼               ▼               ▼
//!   ┌─────────┐     ┌─────────┐     ┌─────────┐
//!   │ Module  │     │ Module  │ ... │ Module  │──► Arc<Backplane>
//!   └────┬────┘     └─────────┘     └─────────┘
//!        │ ChannelView / Baseline
//!        ▼
//!   Box<dyn ModuleHardware>  (pixie_hal)
//! ```
//!
//! # Usage
//!
//! ```rust,no_run
//! use pixie_common::prelude::*;
//! use pixie_sdk::{BootParams, PixieCrate};
//!
//! let config = CrateConfig::load(std::path::Path::new("crate.toml"))?;
//! let pixie = PixieCrate::new(config)?;
//! pixie.initialize()?;
//! pixie.boot(&BootParams::default())?;
//! pixie.write_channel_param(0, ChannelParam::Tau, 0, 0.2)?;
//! pixie.shutdown()?;
//! # Ok::<(), PixieError>(())
//! ```

#![deny(missing_docs)]

pub mod backplane;
pub mod baseline;
pub mod channel;
pub mod module;
pub mod pixie_crate;
pub mod settings;
pub mod stats;

pub use crate::backplane::Backplane;
pub use crate::baseline::{Baseline, BaselineRecord};
pub use crate::channel::ChannelView;
pub use crate::module::{BootPattern, Module};
pub use crate::pixie_crate::{BootParams, CopyDestinations, CrateCounts, ModuleGuard, PixieCrate};
pub use crate::settings::{JsonSettings, ModuleSettings, SettingsStore};
pub use crate::stats::{ChannelStats, FifoStats, ModuleStats, Stats};
