//! Simulation driver module.
//!
//! Software modules for development and testing without a crate.

mod defs;
mod driver;
pub mod firmware;
mod memory;

pub use defs::{ModuleDef, VarDefaults, parse_module_defs};
pub use driver::{DEFAULT_WORDS_PER_POLL, SimulatedModule};
pub use firmware::{var_file_text, write_firmware_set, write_var_file};

use pixie_common::hw::ModuleHardware;

/// Factory function to create a simulated module.
pub fn create_driver() -> Box<dyn ModuleHardware> {
    Box::new(SimulatedModule::new())
}
