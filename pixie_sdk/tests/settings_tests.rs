//! Settings export and import through a JSON file.

mod common;

use pixie_common::error::ErrorCode;
use pixie_common::param::ChannelParam;
use pixie_sdk::JsonSettings;
use std::fs;
use tempfile::TempDir;

#[test]
fn test_export_import_restores_parameters() {
    let tmp = TempDir::new().unwrap();
    let pixie = common::booted(&tmp);
    let path = tmp.path().join("settings.json");

    pixie.write_channel_param(1, ChannelParam::Emin, 3, 42.0).unwrap();
    pixie.export_config(&JsonSettings, &path).unwrap();

    let json: serde_json::Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
    let modules = json.as_array().unwrap();
    assert_eq!(modules.len(), 3);
    assert_eq!(modules[1]["metadata"]["slot"], 3);
    assert_eq!(modules[2]["metadata"]["config"][0]["adc_msps"], 500);
    assert_eq!(modules[1]["channel"]["input"]["EnergyLow"][3], 42);

    pixie.write_channel_param(1, ChannelParam::Emin, 3, 0.0).unwrap();
    let loaded = pixie.import_config(&JsonSettings, &path).unwrap();
    assert_eq!(loaded, vec![(0, 2), (1, 3), (2, 4)]);
    assert_eq!(pixie.read_channel_param(1, ChannelParam::Emin, 3).unwrap(), 42.0);
    assert_eq!(pixie.read_channel_param(0, ChannelParam::Emin, 3).unwrap(), 0.0);
}

#[test]
fn test_import_errors() {
    let tmp = TempDir::new().unwrap();
    let pixie = common::booted(&tmp);

    let missing = tmp.path().join("missing.json");
    let err = pixie.import_config(&JsonSettings, &missing).unwrap_err();
    assert_eq!(err.code, ErrorCode::FileNotFound);

    let bad = tmp.path().join("bad.json");
    fs::write(&bad, "{ not json").unwrap();
    let err = pixie.import_config(&JsonSettings, &bad).unwrap_err();
    assert_eq!(err.code, ErrorCode::ConfigInvalid);
}

#[test]
fn test_export_needs_ready_crate() {
    let tmp = TempDir::new().unwrap();
    let pixie = common::booted(&tmp);
    pixie.shutdown().unwrap();
    let err = pixie
        .export_config(&JsonSettings, &tmp.path().join("out.json"))
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::CrateNotReady);
}
