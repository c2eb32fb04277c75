//! Variable and parameter catalog.
//!
//! # Module Structure
//!
//! - `vars` - Module and channel DSP variables with default descriptors
//! - `params` - System, module and channel parameter names
//! - `copy` - Channel copy filters
//!
//! Descriptors start from the compiled-in defaults. Loading a DSP variable
//! file assigns addresses; anything the file does not name is disabled.

pub mod copy;
pub mod params;
pub mod vars;

pub use copy::{CopyFilterVar, CopyMask};
pub use params::{ChannelParam, ModuleParam, SystemParam, map_module_param};
pub use vars::{CHANNEL_VAR_DEFAULTS, ChannelVar, MODULE_VAR_DEFAULTS, ModuleVar};

use crate::consts::{Address, Word};
use crate::error::{ErrorCode, PixieError, Result};
use std::path::Path;
use tracing::debug;

/// Access mode of a variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    /// Host reads and writes.
    ReadWrite,
    /// DSP output.
    ReadOnly,
    /// Host writes, reads are meaningless.
    WriteOnly,
}

impl Mode {
    /// Short label.
    pub fn label(self) -> &'static str {
        match self {
            Mode::ReadWrite => "rw",
            Mode::ReadOnly => "ro",
            Mode::WriteOnly => "wr",
        }
    }
}

/// Whether the firmware provides a variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum State {
    /// Present.
    Enabled,
    /// Absent or unused.
    Disabled,
}

/// Describes one DSP variable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VarDescriptor<V> {
    /// Variable.
    pub var: V,
    /// Firmware provides it.
    pub state: State,
    /// Access mode.
    pub mode: Mode,
    /// Words the variable covers.
    pub size: usize,
    /// DSP name.
    pub name: &'static str,
    /// DSP memory address. Zero until a variable file is loaded.
    pub address: Address,
}

impl<V> VarDescriptor<V> {
    /// Create a descriptor with no address.
    pub const fn new(var: V, state: State, mode: Mode, size: usize, name: &'static str) -> Self {
        Self {
            var,
            state,
            mode,
            size,
            name,
            address: 0,
        }
    }

    /// True if the firmware provides the variable.
    pub fn enabled(&self) -> bool {
        self.state == State::Enabled
    }

    /// True if the host may write the variable.
    pub fn writeable(&self) -> bool {
        self.enabled() && self.mode != Mode::ReadOnly
    }
}

/// Module variable descriptor.
pub type ModuleVarDesc = VarDescriptor<ModuleVar>;
/// Channel variable descriptor.
pub type ChannelVarDesc = VarDescriptor<ChannelVar>;

/// Descriptor tables for one module's firmware.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Descriptors {
    /// Indexed by [`ModuleVar`] ordinal.
    pub module: Vec<ModuleVarDesc>,
    /// Indexed by [`ChannelVar`] ordinal.
    pub channel: Vec<ChannelVarDesc>,
}

impl Default for Descriptors {
    fn default() -> Self {
        Self {
            module: MODULE_VAR_DEFAULTS.to_vec(),
            channel: CHANNEL_VAR_DEFAULTS.to_vec(),
        }
    }
}

impl Descriptors {
    /// Module variable descriptor.
    #[inline]
    pub fn module_var(&self, var: ModuleVar) -> &ModuleVarDesc {
        &self.module[var.index()]
    }

    /// Channel variable descriptor.
    #[inline]
    pub fn channel_var(&self, var: ChannelVar) -> &ChannelVarDesc {
        &self.channel[var.index()]
    }

    /// Verify every table index matches its variable ordinal.
    pub fn check(&self) -> Result<()> {
        if self.module.len() != ModuleVar::COUNT || self.channel.len() != ChannelVar::COUNT {
            return Err(PixieError::new(
                ErrorCode::InternalFailure,
                "variable descriptor table size mismatch",
            ));
        }
        for (i, desc) in self.module.iter().enumerate() {
            if desc.var.index() != i {
                return Err(PixieError::new(
                    ErrorCode::InternalFailure,
                    format!("module var descriptor out of order: {}", desc.name),
                ));
            }
        }
        for (i, desc) in self.channel.iter().enumerate() {
            if desc.var.index() != i {
                return Err(PixieError::new(
                    ErrorCode::InternalFailure,
                    format!("channel var descriptor out of order: {}", desc.name),
                ));
            }
        }
        Ok(())
    }

    /// Load a DSP variable file: `<hex address> <name>` per line.
    pub fn load_file(&mut self, path: &Path) -> Result<()> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                PixieError::new(ErrorCode::FileNotFound, format!("dsp var file: {}", path.display()))
            } else {
                PixieError::new(
                    ErrorCode::FileReadFailure,
                    format!("dsp var file: {}: {e}", path.display()),
                )
            }
        })?;
        self.load(&text)
    }

    /// Load DSP variable file text.
    ///
    /// Unknown names fail with `ModuleInvalidVar`. Descriptors the file does
    /// not name are disabled.
    pub fn load(&mut self, text: &str) -> Result<()> {
        let mut module_seen = vec![false; self.module.len()];
        let mut channel_seen = vec![false; self.channel.len()];

        for (lineno, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let mut fields = line.split_whitespace();
            let (Some(addr), Some(name)) = (fields.next(), fields.next()) else {
                return Err(PixieError::new(
                    ErrorCode::ModuleInvalidVar,
                    format!("dsp var file: line {}: malformed", lineno + 1),
                ));
            };
            let addr = addr.trim_start_matches("0x").trim_start_matches("0X");
            let address = Address::from_str_radix(addr, 16).map_err(|_| {
                PixieError::new(
                    ErrorCode::ModuleInvalidVar,
                    format!("dsp var file: line {}: bad address: {addr}", lineno + 1),
                )
            })?;

            if let Some(var) = ModuleVar::from_name(name) {
                self.module[var.index()].address = address;
                module_seen[var.index()] = true;
            } else if let Some(var) = ChannelVar::from_name(name) {
                self.channel[var.index()].address = address;
                channel_seen[var.index()] = true;
            } else {
                return Err(PixieError::new(
                    ErrorCode::ModuleInvalidVar,
                    format!("DSP variable not found: {name}"),
                ));
            }
        }

        for (desc, seen) in self.module.iter_mut().zip(module_seen) {
            if !seen && desc.enabled() {
                debug!("dsp var file: {} not present, disabled", desc.name);
                desc.state = State::Disabled;
            }
        }
        for (desc, seen) in self.channel.iter_mut().zip(channel_seen) {
            if !seen && desc.enabled() {
                debug!("dsp var file: {} not present, disabled", desc.name);
                desc.state = State::Disabled;
            }
        }

        self.check()
    }
}

/// A cached variable word.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Value {
    /// Last value read or written.
    pub value: Word,
    /// Written to the cache but not yet to hardware.
    pub dirty: bool,
}

/// A variable's cached words.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variable<V> {
    /// Variable.
    pub var: V,
    /// One entry per element.
    pub values: Vec<Value>,
}

impl<V: Copy> Variable<V> {
    /// Zeroed cache for a descriptor.
    pub fn new(desc: &VarDescriptor<V>) -> Self {
        Self {
            var: desc.var,
            values: vec![Value::default(); desc.size],
        }
    }
}

/// Module variable cache.
pub type ModuleVariable = Variable<ModuleVar>;
/// Channel variable cache.
pub type ChannelVariable = Variable<ChannelVar>;

/// Look up a system parameter.
pub fn lookup_system_param(name: &str) -> Result<SystemParam> {
    SystemParam::from_name(name).ok_or_else(|| {
        PixieError::new(ErrorCode::UnknownParameter, format!("invalid system parameter: {name}"))
    })
}

/// Look up a module parameter.
pub fn lookup_module_param(name: &str) -> Result<ModuleParam> {
    ModuleParam::from_name(name).ok_or_else(|| {
        PixieError::new(ErrorCode::UnknownParameter, format!("invalid module parameter: {name}"))
    })
}

/// Look up a channel parameter.
pub fn lookup_channel_param(name: &str) -> Result<ChannelParam> {
    ChannelParam::from_name(name).ok_or_else(|| {
        PixieError::new(ErrorCode::UnknownParameter, format!("invalid channel parameter: {name}"))
    })
}

/// Look up a module variable.
pub fn lookup_module_var(name: &str) -> Result<ModuleVar> {
    ModuleVar::from_name(name).ok_or_else(|| {
        PixieError::new(ErrorCode::UnknownParameter, format!("invalid module variable: {name}"))
    })
}

/// Look up a channel variable.
pub fn lookup_channel_var(name: &str) -> Result<ChannelVar> {
    ChannelVar::from_name(name).ok_or_else(|| {
        PixieError::new(ErrorCode::UnknownParameter, format!("invalid channel variable: {name}"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_names_fail_per_namespace() {
        let err = lookup_channel_param("NOPE").unwrap_err();
        assert_eq!(err.code, ErrorCode::UnknownParameter);
        assert!(err.message.contains("channel parameter"));
        let err = lookup_module_var("TAU").unwrap_err();
        assert!(err.message.contains("module variable"));
        assert_eq!(lookup_system_param("NUMBER_MODULES").unwrap(), SystemParam::NumberModules);
    }

    #[test]
    fn load_assigns_addresses_and_disables_missing() {
        let mut descs = Descriptors::default();
        descs.load("0004a000 ModNum\n\n0004a100 ChanCSRa\n").unwrap();
        assert_eq!(descs.module_var(ModuleVar::ModNum).address, 0x4a000);
        assert_eq!(descs.channel_var(ChannelVar::ChanCSRa).address, 0x4a100);
        assert!(!descs.module_var(ModuleVar::ModCSRB).enabled());
        assert!(descs.channel_var(ChannelVar::ChanCSRa).writeable());
    }

    #[test]
    fn load_rejects_unknown_variable() {
        let mut descs = Descriptors::default();
        let err = descs.load("0004a000 NotAVar\n").unwrap_err();
        assert_eq!(err.code, ErrorCode::ModuleInvalidVar);
    }

    #[test]
    fn variable_cache_sized_by_descriptor() {
        let descs = Descriptors::default();
        let var = ModuleVariable::new(descs.module_var(ModuleVar::UserIn));
        assert_eq!(var.values.len(), 16);
        assert!(var.values.iter().all(|v| !v.dirty));
    }
}
