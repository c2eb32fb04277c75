//! Prelude module for common re-exports.
//!
//! ```rust
//! use pixie_common::prelude::*;
//! ```

// ─── Logging ────────────────────────────────────────────────────────
pub use crate::config::LogLevel;

// ─── Configuration ──────────────────────────────────────────────────
pub use crate::config::{ConfigLoader, CrateConfig, FifoConfig, FirmwareEntry, SimulationConfig};

// ─── Errors ─────────────────────────────────────────────────────────
pub use crate::error::{ErrorCode, ErrorKind, PixieError, Result};

// ─── Constants ──────────────────────────────────────────────────────
pub use crate::consts::{Address, MAX_CHANNELS, MAX_SLOTS, Word};

// ─── Catalog ────────────────────────────────────────────────────────
pub use crate::address::{AddressMap, AddressRange};
pub use crate::param::{
    ChannelParam, ChannelVar, CopyMask, Descriptors, ModuleParam, ModuleVar, SystemParam,
};

// ─── Firmware ───────────────────────────────────────────────────────
pub use crate::firmware::{Device, FirmwareCatalog, FirmwareSet, SetType};

// ─── Hardware ───────────────────────────────────────────────────────
pub use crate::hw::{
    AdcConfig, ControlTask, DeviceInfo, HardwareFactory, MemoryRegion, ModuleHardware, RunMode,
    RunTask,
};
