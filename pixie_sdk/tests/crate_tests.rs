//! Crate lifecycle and parameter tests against a simulated three module
//! crate (100, 250 and 500 MSPS).

mod common;

use pixie_common::config::{ConfigLoader, CrateConfig};
use pixie_common::error::ErrorCode;
use pixie_common::param::{ChannelParam, ChannelVar, CopyMask};
use pixie_sdk::{BootParams, BootPattern, CopyDestinations, PixieCrate};
use tempfile::TempDir;

#[test]
fn test_initialize_from_toml() {
    let tmp = TempDir::new().unwrap();
    let path = common::write_crate_toml(&tmp);
    let config = CrateConfig::load(&path).unwrap();
    assert_eq!(config.fifo.buffers, 200);

    let pixie = common::initialized(config);
    assert_eq!(pixie.slots().unwrap(), vec![2, 3, 4]);
    let counts = pixie.counts().unwrap();
    assert_eq!((counts.present, counts.online, counts.offline), (3, 0, 3));
    assert_eq!(pixie.module(2).unwrap().configs[0].adc_msps, 500);
    assert!(pixie.module(0).unwrap().firmware.is_some());
}

#[test]
fn test_initialize_twice_fails() {
    let tmp = TempDir::new().unwrap();
    let pixie = common::initialized(common::sim_config(&tmp));
    let err = pixie.initialize().unwrap_err();
    assert_eq!(err.code, ErrorCode::CrateAlreadyOpen);
    assert!(pixie.is_ready());
}

#[test]
fn test_shutdown_balances_counts() {
    let tmp = TempDir::new().unwrap();
    let pixie = common::booted(&tmp);
    assert_eq!(pixie.counts().unwrap().online, 3);

    pixie.shutdown().unwrap();
    let counts = pixie.counts().unwrap();
    assert_eq!(counts.online, 0);
    assert_eq!(counts.offline, counts.present);
    assert!(!pixie.is_ready());
    assert_eq!(pixie.module(0).err().unwrap().code, ErrorCode::CrateNotReady);

    pixie.initialize().unwrap();
    assert_eq!(pixie.counts().unwrap().present, 3);
}

#[test]
fn test_boot_failure_does_not_stop_siblings() {
    let tmp = TempDir::new().unwrap();
    let mut config = common::sim_config(&tmp);
    config.firmware = common::write_firmware(tmp.path(), Some(500));
    let pixie = common::initialized(config);

    let err = pixie.boot(&BootParams::default()).unwrap_err();
    assert_eq!(err.code, ErrorCode::ModuleInvalidFirmware);
    assert_eq!(err.slot, Some(4));

    let counts = pixie.counts().unwrap();
    assert_eq!((counts.online, counts.offline), (2, 1));
    assert!(pixie.module(0).unwrap().online());
    assert!(pixie.module(1).unwrap().online());
    assert!(!pixie.module(2).unwrap().online());
    assert!(!pixie.probe().unwrap());
}

#[test]
fn test_boot_reports_lowest_failing_module() {
    let tmp = TempDir::new().unwrap();
    let mut config = common::sim_config(&tmp);
    config.firmware = common::write_firmware(tmp.path(), Some(250))
        .into_iter()
        .filter(|entry| entry.adc_msps != 500)
        .collect();
    let pixie = common::initialized(config);

    let err = pixie.boot(&BootParams::default()).unwrap_err();
    assert_eq!(err.code, ErrorCode::ModuleInvalidFirmware);
    assert_eq!(err.slot, Some(3));

    let counts = pixie.counts().unwrap();
    assert_eq!((counts.present, counts.online, counts.offline), (3, 1, 2));
    assert!(pixie.module(0).unwrap().online());
    pixie.shutdown().unwrap();
}

#[test]
fn test_boot_selected_slots_and_skip_online() {
    let tmp = TempDir::new().unwrap();
    let pixie = common::initialized(common::sim_config(&tmp));
    let params = BootParams {
        slots: vec![3],
        ..BootParams::default()
    };
    pixie.boot(&params).unwrap();
    assert_eq!(pixie.counts().unwrap().online, 1);
    assert!(pixie.module(1).unwrap().online());

    let params = BootParams {
        force: false,
        pattern: BootPattern::ALL,
        slots: Vec::new(),
    };
    pixie.boot(&params).unwrap();
    assert!(pixie.probe().unwrap());
}

#[test]
fn test_tau_encoding() {
    let tmp = TempDir::new().unwrap();
    let pixie = common::booted(&tmp);
    pixie.write_channel_param(1, ChannelParam::Tau, 0, 0.2).unwrap();
    let raw = pixie
        .module(1)
        .unwrap()
        .read_channel_var(ChannelVar::PreampTau, 0, 0, true)
        .unwrap();
    assert_eq!(raw, 1_045_220_556);
    let tau = pixie.read_channel_param(1, ChannelParam::Tau, 0).unwrap();
    assert!((tau - 0.2).abs() < 0.001, "tau {tau}");
}

#[test]
fn test_trace_length_at_500_msps() {
    let tmp = TempDir::new().unwrap();
    let pixie = common::booted(&tmp);
    pixie
        .write_channel_param(2, ChannelParam::TraceLength, 0, 0.253)
        .unwrap();
    let raw = pixie
        .module(2)
        .unwrap()
        .read_channel_var(ChannelVar::TraceLength, 0, 0, true)
        .unwrap();
    assert_eq!(raw, 120);
    let length = pixie
        .read_channel_param(2, ChannelParam::TraceLength, 0)
        .unwrap();
    assert!((length - 120.0 / 500.0).abs() < 1e-9);
}

#[test]
fn test_baseline_average_negated() {
    let tmp = TempDir::new().unwrap();
    let pixie = common::booted(&tmp);
    pixie
        .write_channel_param(0, ChannelParam::BaselineAverage, 1, 3.0)
        .unwrap();
    let raw = pixie
        .module(0)
        .unwrap()
        .read_channel_var(ChannelVar::Log2Bweight, 1, 0, true)
        .unwrap();
    assert_eq!(raw, u32::MAX - 2);
    assert_eq!(
        pixie
            .read_channel_param(0, ChannelParam::BaselineAverage, 1)
            .unwrap(),
        3.0
    );

    pixie
        .write_channel_param(0, ChannelParam::BaselineAverage, 1, 0.0)
        .unwrap();
    let raw = pixie
        .module(0)
        .unwrap()
        .read_channel_var(ChannelVar::Log2Bweight, 1, 0, true)
        .unwrap();
    assert_eq!(raw, 0);
}

#[test]
fn test_trigger_threshold_scales_by_clock_divider() {
    let tmp = TempDir::new().unwrap();
    let pixie = common::booted(&tmp);
    pixie
        .write_channel_param(1, ChannelParam::TriggerThreshold, 4, 100.0)
        .unwrap();
    let raw = pixie
        .module(1)
        .unwrap()
        .read_channel_var(ChannelVar::FastThresh, 4, 0, true)
        .unwrap();
    assert_eq!(raw, 2000);
    let value = pixie
        .read_channel_param(1, ChannelParam::TriggerThreshold, 4)
        .unwrap();
    assert_eq!(value, 100.0);
}

#[test]
fn test_channel_and_module_range_errors() {
    let tmp = TempDir::new().unwrap();
    let pixie = common::booted(&tmp);
    let err = pixie
        .read_channel_param(0, ChannelParam::Tau, 16)
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::ChannelNumberInvalid);
    let err = pixie.read_channel_param(3, ChannelParam::Tau, 0).unwrap_err();
    assert_eq!(err.code, ErrorCode::ModuleNumberInvalid);
}

#[test]
fn test_copy_trigger_filter() {
    let tmp = TempDir::new().unwrap();
    let pixie = common::booted(&tmp);
    pixie
        .write_channel_param(0, ChannelParam::TriggerRisetime, 0, 0.2)
        .unwrap();
    let source = pixie
        .module(0)
        .unwrap()
        .read_channel_var(ChannelVar::FastLength, 0, 0, true)
        .unwrap();
    assert_eq!(source, 20);

    let mut destinations = CopyDestinations::new();
    destinations.add(1, 2).add_module(2, 16);
    pixie
        .copy_parameters(CopyMask::TRIGGER, (0, 0), &destinations)
        .unwrap();

    let mut module = pixie.module(1).unwrap();
    assert_eq!(module.read_channel_var(ChannelVar::FastLength, 2, 0, true).unwrap(), 20);
    assert_eq!(module.read_channel_var(ChannelVar::FastLength, 3, 0, true).unwrap(), 10);
    drop(module);
    let mut module = pixie.module(2).unwrap();
    assert_eq!(module.read_channel_var(ChannelVar::FastLength, 15, 0, true).unwrap(), 20);
}

#[test]
fn test_initialize_afe() {
    let tmp = TempDir::new().unwrap();
    let pixie = common::booted(&tmp);
    pixie.initialize_afe().unwrap();
    assert_eq!(pixie.users(), 0);
}

#[test]
fn test_duplicate_slot_map_rejected() {
    let tmp = TempDir::new().unwrap();
    let mut config = common::sim_config(&tmp);
    config.crate_.slot_map = vec![2, 2];
    let err = PixieCrate::new(config).err().unwrap();
    assert_eq!(err.code, ErrorCode::SlotMapInvalid);
}
