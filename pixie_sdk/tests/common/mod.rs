//! Shared helpers: a three module simulated crate with generated firmware.

#![allow(dead_code)]

use pixie_common::config::{CrateConfig, FirmwareEntry};
use pixie_common::consts::revision;
use pixie_hal::drivers::simulation::write_firmware_set;
use pixie_sdk::{BootParams, PixieCrate};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing_subscriber::EnvFilter;

/// `(slot, adc_msps, adc_clk_div)` of each simulated module.
pub const MODULES: [(usize, u32, u32); 3] = [(2, 100, 1), (3, 250, 2), (4, 500, 5)];

pub fn module_defs() -> Vec<String> {
    MODULES
        .iter()
        .enumerate()
        .map(|(device, (slot, msps, div))| {
            format!(
                "device-number={device},slot={slot},revision=15,serial-num={},\
                 num-channels=16,adc-bits=16,adc-msps={msps},adc-clk-div={div}",
                1000 + device
            )
        })
        .collect()
}

/// Firmware sets for every module type except `skip_msps`.
pub fn write_firmware(dir: &Path, skip_msps: Option<u32>) -> Vec<FirmwareEntry> {
    let mut entries = Vec::new();
    for (_, msps, _) in MODULES {
        if Some(msps) == skip_msps {
            continue;
        }
        entries.extend(write_firmware_set(dir, revision::REV_F, msps, 16, 16, Some("r1")).unwrap());
    }
    entries
}

pub fn sim_config(dir: &TempDir) -> CrateConfig {
    let mut config = CrateConfig::default();
    config.firmware = write_firmware(dir.path(), None);
    config.simulation.modules = module_defs();
    config
}

/// Write the crate configuration as TOML.
pub fn write_crate_toml(dir: &TempDir) -> PathBuf {
    let mut text = String::from(
        r#"
[crate]
driver = "simulation"
log_level = "info"

[fifo]
buffers = 200
"#,
    );
    for entry in write_firmware(dir.path(), None) {
        text.push_str(&format!(
            r#"
[[firmware]]
version = "{}"
revision = {}
adc_msps = {}
adc_bits = {}
device = "{}"
file = "{}"
release = "r1"
"#,
            entry.version,
            entry.revision,
            entry.adc_msps,
            entry.adc_bits,
            entry.device,
            entry.file.display()
        ));
    }
    text.push_str("\n[simulation]\nmodules = [\n");
    for def in module_defs() {
        text.push_str(&format!("  \"{def}\",\n"));
    }
    text.push_str("]\n");
    let path = dir.path().join("crate.toml");
    fs::write(&path, text).unwrap();
    path
}

/// Route log output through the test harness at the configured level.
pub fn init_logging(config: &CrateConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.crate_.log_level.as_filter()));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .compact()
        .try_init();
}

/// An initialised crate.
pub fn initialized(config: CrateConfig) -> PixieCrate {
    init_logging(&config);
    let pixie = PixieCrate::new(config).unwrap();
    pixie.initialize().unwrap();
    pixie
}

/// An initialised and booted crate.
pub fn booted(dir: &TempDir) -> PixieCrate {
    let pixie = initialized(sim_config(dir));
    pixie.boot(&BootParams::default()).unwrap();
    pixie
}
