//! Generated firmware for simulated crates.
//!
//! The simulated DSP accepts any image. What matters is the variable file:
//! it must place every channel variable exactly one channel array apart or
//! the address map rejects it.

use pixie_common::config::FirmwareEntry;
use pixie_common::consts::Address;
use pixie_common::error::{ErrorCode, PixieError, Result};
use pixie_common::firmware;
use pixie_common::param::{Descriptors, Mode, VarDescriptor};
use std::fmt::Write;
use std::path::Path;
use tracing::info;

/// First module input variable.
pub const VARS_BASE: Address = 0x4a000;
/// Lowest address of the DSP output variables.
pub const OUTPUTS_BASE: Address = 0x4a340;

fn place<V>(
    text: &mut String,
    descs: &[VarDescriptor<V>],
    outputs: bool,
    stride: usize,
    mut address: Address,
) -> Address {
    for d in descs
        .iter()
        .filter(|d| d.enabled() && (d.mode == Mode::ReadOnly) == outputs)
    {
        // Writing to a String cannot fail.
        let _ = writeln!(text, "{address:08x} {}", d.name);
        address += (d.size * stride) as Address;
    }
    address
}

/// Variable file text for the default descriptors with a channel stride of
/// `max_channels`.
pub fn var_file_text(max_channels: usize) -> String {
    let descs = Descriptors::default();
    let mut text = String::new();
    let end = place(&mut text, &descs.module, false, 1, VARS_BASE);
    let end = place(&mut text, &descs.channel, false, max_channels, end);
    let end = place(&mut text, &descs.module, true, 1, end.max(OUTPUTS_BASE));
    place(&mut text, &descs.channel, true, max_channels, end);
    text
}

fn write(path: &Path, contents: &[u8]) -> Result<()> {
    std::fs::write(path, contents).map_err(|e| {
        PixieError::new(
            ErrorCode::FileCreateFailure,
            format!("sim: firmware: {}: {e}", path.display()),
        )
    })
}

/// Write a variable file.
pub fn write_var_file(path: &Path, max_channels: usize) -> Result<()> {
    write(path, var_file_text(max_channels).as_bytes())
}

/// Write a complete firmware set for a module type under `dir/<tag>/` and
/// return the configuration entries describing it.
pub fn write_firmware_set(
    dir: &Path,
    revision: u32,
    adc_msps: u32,
    adc_bits: u32,
    max_channels: usize,
    release: Option<&str>,
) -> Result<Vec<FirmwareEntry>> {
    let tag = firmware::tag(revision, adc_msps, adc_bits);
    let base = dir.join(&tag);
    std::fs::create_dir_all(&base).map_err(|e| {
        PixieError::new(
            ErrorCode::FileCreateFailure,
            format!("sim: firmware: {}: {e}", base.display()),
        )
    })?;

    let files = [
        ("sys", "sys.bin"),
        ("fippi", "fippi.bin"),
        ("dsp", "dsp.ldr"),
        ("var", "dsp.var"),
    ];
    let mut entries = Vec::with_capacity(files.len());
    for (device, name) in files {
        let path = base.join(name);
        if device == "var" {
            write_var_file(&path, max_channels)?;
        } else {
            write(&path, format!("{device}:{tag}").as_bytes())?;
        }
        entries.push(FirmwareEntry {
            version: "sim".to_string(),
            revision,
            adc_msps,
            adc_bits,
            device: device.to_string(),
            file: path,
            release: release.map(str::to_string),
            slots: Vec::new(),
        });
    }
    info!("sim: firmware: wrote set {tag} in {}", base.display());
    Ok(entries)
}
