//! DSP variable file loading and address map tests.

use pixie_common::address::AddressMap;
use pixie_common::error::ErrorCode;
use pixie_common::param::{ChannelVar, Descriptors, Mode, ModuleVar};
use std::fmt::Write;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Write a var file laying every enabled variable out back to back.
fn write_var_file(dir: &Path, max_channels: usize) -> PathBuf {
    let descs = Descriptors::default();
    let mut text = String::new();
    let mut addr = 0x4a000u32;
    for d in descs.module.iter().filter(|d| d.enabled()) {
        writeln!(text, "{addr:08x} {}", d.name).unwrap();
        addr += d.size as u32;
    }
    for ro in [false, true] {
        for d in descs
            .channel
            .iter()
            .filter(|d| d.enabled() && (d.mode == Mode::ReadOnly) == ro)
        {
            writeln!(text, "{addr:08x} {}", d.name).unwrap();
            addr += (d.size * max_channels) as u32;
        }
    }
    let path = dir.join("dsp.var");
    fs::write(&path, text).unwrap();
    path
}

#[test]
fn test_load_var_file_and_map() {
    let tmp = TempDir::new().unwrap();
    let path = write_var_file(tmp.path(), 32);

    let mut descs = Descriptors::default();
    descs.load_file(&path).unwrap();
    assert_eq!(descs.module_var(ModuleVar::ModNum).address, 0x4a000);
    assert!(descs.channel_var(ChannelVar::ChanCSRa).address > 0x4a000);

    let mut map = AddressMap::default();
    map.set(32, &descs.module, &descs.channel).unwrap();
    assert_eq!(map.module.start, 0x4a000);
    assert_eq!(map.module.end, map.channels.start);
    assert_eq!(map.max_channels, 32);
    assert!(map.channels_in.end <= map.channels_out.start);
}

#[test]
fn test_var_file_against_wrong_channel_count() {
    let tmp = TempDir::new().unwrap();
    let path = write_var_file(tmp.path(), 16);

    let mut descs = Descriptors::default();
    descs.load_file(&path).unwrap();
    let mut map = AddressMap::default();
    let err = map.set(32, &descs.module, &descs.channel).unwrap_err();
    assert_eq!(err.code, ErrorCode::ChannelInvalidVar);
}

#[test]
fn test_missing_var_file() {
    let tmp = TempDir::new().unwrap();
    let mut descs = Descriptors::default();
    let err = descs.load_file(&tmp.path().join("nope.var")).unwrap_err();
    assert_eq!(err.code, ErrorCode::FileNotFound);
}

#[test]
fn test_channel_address_indexing() {
    let tmp = TempDir::new().unwrap();
    let path = write_var_file(tmp.path(), 16);
    let mut descs = Descriptors::default();
    descs.load_file(&path).unwrap();

    let qdc = descs.channel_var(ChannelVar::QDCLen0);
    assert_eq!(
        AddressMap::channel_address(qdc, 3, 0),
        qdc.address + 3 * qdc.size as u32
    );
}
