//! Configuration loading traits and types.
//!
//! Crate bring-up is driven by a single TOML file:
//!
//! ```toml
//! [crate]
//! driver = "simulation"
//! slot_map = [2, 3, 4]
//! log_level = "debug"
//!
//! [fifo]
//! buffers = 200
//!
//! [[firmware]]
//! version = "r33339"
//! revision = 15
//! adc_msps = 250
//! adc_bits = 16
//! device = "dsp"
//! file = "/usr/local/xia/fw/rev-f/dsp.ldr"
//!
//! [simulation]
//! modules = ["device-number=0,slot=2,revision=15,num-channels=16,adc-bits=16,adc-msps=250,adc-clk-div=2"]
//! ```

use crate::consts::{MAX_DMA_BLOCK_SIZE, MAX_SLOTS};
use crate::error::{ErrorCode, PixieError};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Log level for application logging.
///
/// Uses lowercase serde values for TOML compatibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Most verbose.
    Trace,
    /// Development detail.
    Debug,
    /// Normal operation.
    #[default]
    Info,
    /// Potential problems.
    Warn,
    /// Serious problems.
    Error,
}

impl LogLevel {
    /// Directive string accepted by `tracing_subscriber::EnvFilter`.
    pub fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Load any deserializable type from a TOML file.
///
/// - Returns `FileNotFound` if the file does not exist
/// - Returns `ConfigInvalid` if the TOML cannot be parsed
pub trait ConfigLoader: Sized + serde::de::DeserializeOwned {
    /// Load configuration from a TOML file.
    fn load(path: &Path) -> Result<Self, PixieError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                PixieError::new(ErrorCode::FileNotFound, format!("{}", path.display()))
            } else {
                PixieError::new(ErrorCode::FileReadFailure, format!("{}: {e}", path.display()))
            }
        })?;

        Self::parse(&content)
    }

    /// Parse configuration from TOML text.
    fn parse(content: &str) -> Result<Self, PixieError> {
        toml::from_str(content).map_err(|e| PixieError::new(ErrorCode::ConfigInvalid, e.to_string()))
    }
}

impl<T: serde::de::DeserializeOwned> ConfigLoader for T {}

/// Crate level settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CrateSection {
    /// Hardware driver name.
    #[serde(default = "default_driver")]
    pub driver: String,
    /// Slot for each module number. Empty numbers modules in slot order.
    #[serde(default)]
    pub slot_map: Vec<usize>,
    /// Logging verbosity.
    #[serde(default)]
    pub log_level: LogLevel,
    /// Bring modules up without touching the hardware.
    #[serde(default)]
    pub offline: bool,
}

fn default_driver() -> String {
    "simulation".to_string()
}

impl Default for CrateSection {
    fn default() -> Self {
        Self {
            driver: default_driver(),
            slot_map: Vec::new(),
            log_level: LogLevel::default(),
            offline: false,
        }
    }
}

/// Host side FIFO servicing.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FifoConfig {
    /// Host buffers in the pool.
    pub buffers: usize,
    /// Poll period while a run is active.
    pub run_wait_usecs: u64,
    /// Poll period while idle.
    pub idle_wait_usecs: u64,
    /// Time data may sit in the hardware FIFO before it is drained.
    pub hold_usecs: u64,
    /// Hardware FIFO level that triggers a DMA drain, in bytes.
    pub dma_trigger_level_bytes: usize,
}

impl FifoConfig {
    /// Buffer count bounds.
    pub const BUFFERS: (usize, usize) = (10, 10_000_000);
    /// Run poll bounds.
    pub const RUN_WAIT_USECS: (u64, u64) = (500, 200_000);
    /// Idle poll bounds.
    pub const IDLE_WAIT_USECS: (u64, u64) = (10_000, 1_000_000);
    /// Hold bounds.
    pub const HOLD_USECS: (u64, u64) = (1000, 100_000);
    /// DMA trigger bounds.
    pub const DMA_TRIGGER_LEVEL_BYTES: (usize, usize) = (512, MAX_DMA_BLOCK_SIZE * 4);

    /// Words a host buffer holds.
    pub const BUFFER_WORDS: usize = 16 * 1024;

    /// Host side capacity in words.
    pub fn capacity_words(&self) -> usize {
        self.buffers * Self::BUFFER_WORDS
    }

    /// Check all values are within hardware limits.
    pub fn validate(&self) -> Result<(), PixieError> {
        check_range("fifo.buffers", self.buffers, Self::BUFFERS)?;
        check_range("fifo.run_wait_usecs", self.run_wait_usecs, Self::RUN_WAIT_USECS)?;
        check_range("fifo.idle_wait_usecs", self.idle_wait_usecs, Self::IDLE_WAIT_USECS)?;
        check_range("fifo.hold_usecs", self.hold_usecs, Self::HOLD_USECS)?;
        check_range(
            "fifo.dma_trigger_level_bytes",
            self.dma_trigger_level_bytes,
            Self::DMA_TRIGGER_LEVEL_BYTES,
        )
    }
}

impl Default for FifoConfig {
    fn default() -> Self {
        Self {
            buffers: 100,
            run_wait_usecs: 5000,
            idle_wait_usecs: 150_000,
            hold_usecs: 10_000,
            dma_trigger_level_bytes: 1024,
        }
    }
}

fn check_range<T: PartialOrd + std::fmt::Display + Copy>(
    name: &str,
    value: T,
    (min, max): (T, T),
) -> Result<(), PixieError> {
    if value < min || value > max {
        return Err(PixieError::new(
            ErrorCode::ConfigInvalid,
            format!("{name}: {value} out of range ({min}..={max})"),
        ));
    }
    Ok(())
}

/// One firmware image entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FirmwareEntry {
    /// Image version label.
    pub version: String,
    /// Module hardware revision the image targets.
    pub revision: u32,
    /// ADC sample rate the image targets.
    pub adc_msps: u32,
    /// ADC resolution the image targets.
    pub adc_bits: u32,
    /// Device name: `sys`, `fippi`, `dsp` or `var`.
    pub device: String,
    /// Image file.
    pub file: PathBuf,
    /// Vendor release label. Absent for user images.
    #[serde(default)]
    pub release: Option<String>,
    /// Slots the image applies to. Empty means every slot.
    #[serde(default)]
    pub slots: Vec<usize>,
}

/// Simulation driver settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SimulationConfig {
    /// Module definitions, one `key=value,...` string per device.
    pub modules: Vec<String>,
    /// Optional `Name=value` file of variable defaults.
    pub var_defaults: Option<PathBuf>,
    /// Words the list-mode generator produces per FIFO poll.
    pub words_per_poll: Option<usize>,
}

/// Complete crate configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CrateConfig {
    /// Crate section.
    #[serde(default, rename = "crate")]
    pub crate_: CrateSection,
    /// FIFO servicing.
    #[serde(default)]
    pub fifo: FifoConfig,
    /// Firmware images.
    #[serde(default)]
    pub firmware: Vec<FirmwareEntry>,
    /// Simulation driver.
    #[serde(default)]
    pub simulation: SimulationConfig,
}

impl CrateConfig {
    /// Validate the configuration.
    ///
    /// # Errors
    /// `SlotMapInvalid` for a bad slot map, `ConfigInvalid` for anything else.
    pub fn validate(&self) -> Result<(), PixieError> {
        let mut slots = HashSet::new();
        for &slot in &self.crate_.slot_map {
            if slot == 0 || slot >= MAX_SLOTS {
                return Err(PixieError::new(
                    ErrorCode::SlotMapInvalid,
                    format!("slot out of range: {slot}"),
                ));
            }
            if !slots.insert(slot) {
                return Err(PixieError::new(
                    ErrorCode::SlotMapInvalid,
                    format!("duplicate slot: {slot}"),
                ));
            }
        }

        self.fifo.validate()?;

        for fw in &self.firmware {
            if !matches!(fw.device.as_str(), "sys" | "fippi" | "dsp" | "var") {
                return Err(PixieError::new(
                    ErrorCode::ConfigInvalid,
                    format!("firmware: invalid device: {}", fw.device),
                ));
            }
            for &slot in &fw.slots {
                if slot == 0 || slot >= MAX_SLOTS {
                    return Err(PixieError::new(
                        ErrorCode::ConfigInvalid,
                        format!("firmware: {}: slot out of range: {slot}", fw.file.display()),
                    ));
                }
            }
        }

        Ok(())
    }
}
