//! Settings import and export.
//!
//! A settings file holds one entry per online module: metadata describing
//! the module it was taken from and the writable DSP variables by name.
//! The on-disk format belongs to a [`SettingsStore`]; [`JsonSettings`] is
//! the JSON store.
//!
//! ```text
//! [
//!   {
//!     "metadata": { "number": 0, "slot": 2, "hardware_revision": "F", ... },
//!     "module":   { "input": { "ModCSRB": 0, "TrigConfig": [0, 0, 0, 0], ... } },
//!     "channel":  { "input": { "ChanCSRa": [4, 4, ...], ... } }
//!   }
//! ]
//! ```
//!
//! Importing writes the caches only; the caller syncs the DSP afterwards.

use crate::module::{Module, SyncDirection};
use pixie_common::config::FifoConfig;
use pixie_common::consts::{Word, revision};
use pixie_common::error::{ErrorCode, PixieError, Result};
use pixie_common::param::{ChannelParam, ChannelVar, ModuleParam, ModuleVar};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, warn};

/// A variable's value: a scalar or one word per element.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum VarValues {
    /// Single word.
    One(Word),
    /// Several words.
    Many(Vec<Word>),
}

impl VarValues {
    fn from_words(words: Vec<Word>) -> Self {
        match words.as_slice() {
            [one] => VarValues::One(*one),
            _ => VarValues::Many(words),
        }
    }

    /// Words in element order.
    pub fn as_slice(&self) -> &[Word] {
        match self {
            VarValues::One(one) => std::slice::from_ref(one),
            VarValues::Many(many) => many,
        }
    }
}

/// ADC configuration of one channel as recorded in a settings file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Resolution in bits.
    pub adc_bits: u32,
    /// Sample rate in MSPS.
    pub adc_msps: u32,
    /// ADC clocks per FPGA clock.
    pub adc_clk_div: u32,
    /// FPGA filter clock in MHz.
    pub fpga_clk_mhz: u32,
}

/// Where a settings entry was taken from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub struct SettingsMetadata {
    /// Logical module number.
    pub number: usize,
    /// Physical slot.
    pub slot: usize,
    /// EEPROM serial number.
    #[serde(default)]
    pub serial_num: u32,
    /// Hardware revision letter.
    #[serde(rename = "hardware_revision")]
    pub hardware_revision: String,
    /// Channels fitted.
    #[serde(default)]
    pub num_channels: usize,
    /// Firmware tag, `revision-msps-bits`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub firmware_tag: Option<String>,
    /// Firmware release label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub firmware_release: Option<String>,
    /// FIFO configuration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fifo: Option<FifoConfig>,
    /// Per channel ADC configuration.
    #[serde(default)]
    pub config: Vec<ChannelConfig>,
}

/// Named variable values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Inputs {
    /// Variable name to values.
    pub input: BTreeMap<String, VarValues>,
}

/// Settings of one module.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ModuleSettings {
    /// Source module.
    pub metadata: SettingsMetadata,
    /// Module variables.
    pub module: Inputs,
    /// Channel variables, channel major.
    pub channel: Inputs,
}

/// Loads and saves settings files.
pub trait SettingsStore: Send + Sync {
    /// Read every module entry in `path`.
    fn load(&self, path: &Path) -> Result<Vec<ModuleSettings>>;

    /// Write `settings` to `path`, replacing it.
    fn save(&self, path: &Path, settings: &[ModuleSettings]) -> Result<()>;
}

/// JSON settings files.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSettings;

impl SettingsStore for JsonSettings {
    fn load(&self, path: &Path) -> Result<Vec<ModuleSettings>> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                PixieError::new(ErrorCode::FileNotFound, format!("{}", path.display()))
            } else {
                PixieError::new(ErrorCode::FileReadFailure, format!("{}: {e}", path.display()))
            }
        })?;
        serde_json::from_str(&content).map_err(|e| {
            PixieError::new(
                ErrorCode::ConfigInvalid,
                format!("settings: {}: {e}", path.display()),
            )
        })
    }

    fn save(&self, path: &Path, settings: &[ModuleSettings]) -> Result<()> {
        let text = serde_json::to_string_pretty(settings)
            .map_err(|e| PixieError::new(ErrorCode::InternalFailure, format!("settings: {e}")))?;
        std::fs::write(path, text + "\n").map_err(|e| {
            PixieError::new(
                ErrorCode::FileCreateFailure,
                format!("{}: {e}", path.display()),
            )
        })
    }
}

impl ModuleSettings {
    /// Capture a module's writable variables after refreshing them from the
    /// DSP.
    pub fn from_module(module: &mut Module) -> Result<Self> {
        module.sync_vars(SyncDirection::FromHardware)?;
        let (module_vars, channel_vars) = module.writable_values();

        let firmware_tag = module.firmware.as_ref().and_then(|fw| fw.tag().ok());
        let firmware_release = module.firmware.as_ref().and_then(|fw| fw.release.clone());
        let metadata = SettingsMetadata {
            number: module.number,
            slot: module.slot,
            serial_num: module.serial_num,
            hardware_revision: revision::label(module.revision).to_string(),
            num_channels: module.num_channels,
            firmware_tag,
            firmware_release,
            fifo: Some(*module.fifo_config()),
            config: module
                .configs
                .iter()
                .map(|c| ChannelConfig {
                    adc_bits: c.adc_bits,
                    adc_msps: c.adc_msps,
                    adc_clk_div: c.adc_clk_div,
                    fpga_clk_mhz: c.fpga_clk_mhz(),
                })
                .collect(),
        };

        let module_input = module_vars
            .into_iter()
            .map(|(var, words)| (var.name().to_string(), VarValues::from_words(words)))
            .collect();
        let channel_input = channel_vars
            .into_iter()
            .map(|(var, words)| (var.name().to_string(), VarValues::Many(words)))
            .collect();

        Ok(Self {
            metadata,
            module: Inputs { input: module_input },
            channel: Inputs {
                input: channel_input,
            },
        })
    }

    /// Write the settings into a module's caches.
    ///
    /// `SlotID` is left alone and `ModNum` takes the module's number.
    /// Entries with the wrong size are skipped with a warning. Channel
    /// arrays shorter than the channel count are extended with their first
    /// element. Names that are neither variables nor parameters are logged.
    pub fn apply(&self, module: &mut Module) -> Result<()> {
        if self.metadata.slot != module.slot {
            warn!(
                "{}settings for module {} (slot {}) loaded into slot {}",
                module.label(),
                self.metadata.number,
                self.metadata.slot,
                module.slot
            );
        }

        for (name, values) in &self.module.input {
            let Some(var) = ModuleVar::from_name(name) else {
                if ModuleParam::from_name(name).is_none() {
                    warn!("{}settings: invalid module variable: {name}", module.label());
                }
                continue;
            };
            let desc = module.descriptors.module_var(var);
            if !desc.writeable() {
                continue;
            }
            let words = values.as_slice();
            if words.len() != desc.size {
                warn!("{}settings: size does not match: {name}", module.label());
                continue;
            }
            debug!("{}settings: module var set: {name}", module.label());
            match var {
                ModuleVar::SlotID => {}
                ModuleVar::ModNum => module.write_var(var, module.number as Word, 0, false)?,
                _ => {
                    for (offset, &word) in words.iter().enumerate() {
                        module.write_var(var, word, offset, false)?;
                    }
                }
            }
        }

        for (name, values) in &self.channel.input {
            let Some(var) = ChannelVar::from_name(name) else {
                if ChannelParam::from_name(name).is_none() {
                    warn!("{}settings: invalid channel variable: {name}", module.label());
                }
                continue;
            };
            let desc = module.descriptors.channel_var(var);
            if !desc.writeable() {
                continue;
            }
            let size = desc.size.max(1);
            let mut words = values.as_slice().to_vec();
            if words.is_empty() || words.len() % size != 0 {
                warn!("{}settings: size does not match: {name}", module.label());
                continue;
            }
            if words.len() / size < module.num_channels {
                debug!(
                    "{}settings: extending {name} to {} channels",
                    module.label(),
                    module.num_channels
                );
                let first = words[0];
                words.resize(module.num_channels * size, first);
            }
            for (channel, chunk) in words.chunks(size).take(module.num_channels).enumerate() {
                for (offset, &word) in chunk.iter().enumerate() {
                    module.write_channel_var(var, word, channel, offset, false)?;
                }
            }
        }
        Ok(())
    }
}
