//! Simulated module definitions and variable defaults.
//!
//! A module definition is a comma separated `key=value` list:
//!
//! ```text
//! device-number=0,slot=2,revision=15,num-channels=16,adc-bits=16,adc-msps=250,adc-clk-div=2
//! ```
//!
//! Variable defaults are `Name=value` lines with `#` comments. A value may
//! carry a trailing `(...)` annotation which is ignored.

use pixie_common::consts::Word;
use pixie_common::error::{ErrorCode, PixieError, Result};
use pixie_common::param::{ChannelVar, ModuleVar};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, info};

/// One simulated module.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModuleDef {
    /// Bus enumeration index.
    pub device_number: usize,
    /// Slot the module reports.
    pub slot: usize,
    /// Hardware revision.
    pub revision: u32,
    /// EEPROM layout version.
    pub eeprom_format: u32,
    /// Serial number.
    pub serial_num: u32,
    /// Channels fitted. Zero disables the definition.
    pub num_channels: usize,
    /// ADC resolution.
    pub adc_bits: u32,
    /// ADC sample rate.
    pub adc_msps: u32,
    /// ADC clocks per FPGA clock.
    pub adc_clk_div: u32,
    /// PCI bus number.
    pub pci_bus: u32,
    /// PCI slot number.
    pub pci_slot: u32,
    /// Backplane revision.
    pub crate_revision: u32,
    /// Per module variable defaults file.
    pub var_defaults: Option<PathBuf>,
}

fn invalid(what: impl Into<String>) -> PixieError {
    PixieError::new(ErrorCode::InvalidValue, what)
}

fn number<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| invalid(format!("invalid module definition: bad value: {key}={value}")))
}

impl FromStr for ModuleDef {
    type Err = PixieError;

    fn from_str(desc: &str) -> Result<Self> {
        let mut def = ModuleDef::default();
        for field in desc.split(',').map(str::trim).filter(|f| !f.is_empty()) {
            let Some((key, value)) = field.split_once('=') else {
                return Err(invalid(format!("invalid module definition: {field}")));
            };
            match key.trim() {
                "device-number" => def.device_number = number(key, value)?,
                "slot" => def.slot = number(key, value)?,
                "revision" => def.revision = number(key, value)?,
                "eeprom-format" => def.eeprom_format = number(key, value)?,
                "serial-num" => def.serial_num = number(key, value)?,
                "num-channels" => def.num_channels = number(key, value)?,
                "adc-bits" => def.adc_bits = number(key, value)?,
                "adc-msps" => def.adc_msps = number(key, value)?,
                "adc-clk-div" => def.adc_clk_div = number(key, value)?,
                "pci-bus" => def.pci_bus = number(key, value)?,
                "pci-slot" => def.pci_slot = number(key, value)?,
                "crate-revision" => def.crate_revision = number(key, value)?,
                "var-defaults" => def.var_defaults = Some(PathBuf::from(value.trim())),
                _ => return Err(invalid(format!("invalid module definition: {field}"))),
            }
        }
        debug!("sim: module def: {desc}");
        Ok(def)
    }
}

/// Parse every definition string.
pub fn parse_module_defs(defs: &[String]) -> Result<Vec<ModuleDef>> {
    defs.iter().map(|d| d.parse()).collect()
}

/// Variable values written after the DSP boots.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VarDefaults {
    /// Module variables, element 0.
    pub module: Vec<(ModuleVar, Word)>,
    /// Channel variables, applied to every channel.
    pub channel: Vec<(ChannelVar, Word)>,
}

impl VarDefaults {
    /// Parse defaults text. Names that are not variables are skipped.
    pub fn parse(text: &str) -> Result<Self> {
        let mut defaults = VarDefaults::default();
        for line in text.lines() {
            let line = line.split('#').next().unwrap_or_default().trim();
            let Some((label, value)) = line.split_once('=') else {
                continue;
            };
            let label = label.trim();
            let value = value.split('(').next().unwrap_or_default().trim();
            if let Some(var) = ModuleVar::from_name(label) {
                defaults.module.push((var, number(label, value)?));
                debug!("sim: module: mod var: {label}={value}");
            } else if let Some(var) = ChannelVar::from_name(label) {
                defaults.channel.push((var, number(label, value)?));
                debug!("sim: module: chan var: {label}={value}");
            }
        }
        Ok(defaults)
    }

    /// Load a defaults file.
    pub fn load(path: &Path) -> Result<Self> {
        info!("sim: module: load var defaults: {}", path.display());
        let text = std::fs::read_to_string(path).map_err(|e| {
            PixieError::new(
                ErrorCode::FileReadFailure,
                format!("module var defaults open: {}: {e}", path.display()),
            )
        })?;
        Self::parse(&text)
    }

    /// Append another set; later entries win when applied.
    pub fn extend(&mut self, other: VarDefaults) {
        self.module.extend(other.module);
        self.channel.extend(other.channel);
    }
}
