//! Simulated module integration tests.
//!
//! Builds module definitions and generated firmware in a temp dir, then
//! drives a simulated module through boot, control tasks and a histogram run.

use pixie_common::config::CrateConfig;
use pixie_common::error::ErrorCode;
use pixie_common::firmware::{Device, FirmwareCatalog};
use pixie_common::hw::{ControlTask, MemoryRegion, RunMode, RunTask};
use pixie_common::param::{ChannelVar, Descriptors, ModuleVar};
use pixie_hal::DriverRegistry;
use pixie_hal::drivers::simulation::write_firmware_set;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn write_var_defaults(dir: &Path) -> std::path::PathBuf {
    let path = dir.join("defaults.txt");
    fs::write(
        &path,
        r#"# simulated defaults
SlowFilterRange=3
FastThresh=2500 (trigger)
"#,
    )
    .unwrap();
    path
}

fn sim_config(dir: &Path) -> CrateConfig {
    let mut config = CrateConfig::default();
    config.simulation.modules = vec![
        "device-number=0,slot=2,revision=15,num-channels=16,adc-bits=16,adc-msps=250,adc-clk-div=2"
            .to_string(),
        "device-number=1,slot=3,revision=15,num-channels=16,adc-bits=14,adc-msps=500,adc-clk-div=5"
            .to_string(),
    ];
    config.simulation.var_defaults = Some(write_var_defaults(dir));
    config.firmware = write_firmware_set(dir, 15, 250, 16, 16, Some("1.0")).unwrap();
    config
}

#[test]
fn test_probe_stops_at_first_missing_device() {
    let tmp = TempDir::new().unwrap();
    let config = sim_config(tmp.path());
    let registry = DriverRegistry::with_builtin();

    let mut found = Vec::new();
    for device in 0.. {
        let mut hw = registry.create_driver("simulation").unwrap();
        match hw.open(device, &config).unwrap() {
            Some(info) => found.push(info.slot),
            None => break,
        }
    }
    assert_eq!(found, vec![2, 3]);
}

#[test]
fn test_boot_from_generated_firmware() {
    let tmp = TempDir::new().unwrap();
    let config = sim_config(tmp.path());
    let catalog = FirmwareCatalog::from_entries(&config.firmware).unwrap();
    let set = catalog.find("15-250-16", None, 2).unwrap();

    let registry = DriverRegistry::with_builtin();
    let mut hw = registry.create_driver("simulation").unwrap();
    let info = hw.open(0, &config).unwrap().unwrap();

    let mut descs = Descriptors::default();
    descs
        .load_file(&set.get(Device::Var).unwrap().file)
        .unwrap();
    hw.boot_comms(&set.get(Device::Sys).unwrap().load().unwrap()).unwrap();
    hw.boot_fippi(&set.get(Device::Fippi).unwrap().load().unwrap()).unwrap();
    hw.boot_dsp(&set.get(Device::Dsp).unwrap().load().unwrap(), &descs)
        .unwrap();
    assert!(hw.loaded().all());

    let sfr = descs.module_var(ModuleVar::SlowFilterRange).address;
    assert_eq!(hw.read_word(sfr).unwrap(), 3);
    let thresh = descs.channel_var(ChannelVar::FastThresh).address;
    assert_eq!(hw.read_word(thresh + info.num_channels as u32 - 1).unwrap(), 2500);

    hw.close().unwrap();
    assert!(!hw.loaded().dsp);
}

#[test]
fn test_histogram_run_accumulates_and_clears() {
    let tmp = TempDir::new().unwrap();
    let config = sim_config(tmp.path());
    let registry = DriverRegistry::with_builtin();
    let mut hw = registry.create_driver("simulation").unwrap();
    hw.open(0, &config).unwrap();

    let mut descs = Descriptors::default();
    descs.load(&pixie_hal::drivers::simulation::var_file_text(16)).unwrap();
    hw.boot_comms(b"sys").unwrap();
    hw.boot_fippi(b"fippi").unwrap();
    hw.boot_dsp(b"dsp", &descs).unwrap();

    hw.start_run(RunTask::Histogram, RunMode::NewRun).unwrap();
    for _ in 0..10 {
        assert!(hw.busy().unwrap());
    }
    hw.end_run().unwrap();

    let mut mca = vec![0; 32768];
    hw.read_memory(MemoryRegion::Mca, 4, &mut mca).unwrap();
    assert_eq!(mca.iter().sum::<u32>(), 8 * 10);

    hw.clear_memory(MemoryRegion::Mca).unwrap();
    hw.read_memory(MemoryRegion::Mca, 4, &mut mca).unwrap();
    assert!(mca.iter().all(|&c| c == 0));

    hw.start_control_task(ControlTask::GetTraces).unwrap();
    let mut trace = vec![0; 16];
    hw.read_memory(MemoryRegion::AdcTrace, 0, &mut trace).unwrap();
    assert!(trace.iter().all(|&w| w != 0));
}

#[test]
fn test_bad_module_definition() {
    let mut config = CrateConfig::default();
    config.simulation.modules = vec!["device-number=0,slots=2".to_string()];
    let mut hw = DriverRegistry::with_builtin()
        .create_driver("simulation")
        .unwrap();
    let err = hw.open(0, &config).unwrap_err();
    assert_eq!(err.code, ErrorCode::InvalidValue);
}
