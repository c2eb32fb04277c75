//! List-mode, histogram and synchronous run tests.

mod common;

use pixie_common::consts::{MAX_HISTOGRAM_LENGTH, csrb};
use pixie_common::error::ErrorCode;
use pixie_common::hw::RunMode;
use pixie_common::param::ModuleParam;
use std::thread;
use tempfile::TempDir;

#[test]
fn test_list_mode_run_drains_fifo() {
    let tmp = TempDir::new().unwrap();
    let pixie = common::booted(&tmp);
    let mut module = pixie.module(0).unwrap();

    module.start_listmode(RunMode::NewRun).unwrap();
    assert!(module.run_active().unwrap());

    let mut level = 0;
    for _ in 0..100 {
        level = module.read_list_mode_level().unwrap();
        if level > 0 {
            break;
        }
        thread::sleep(module.fifo_poll_wait());
    }
    assert!(level > 0);

    let mut words = vec![0; level];
    assert_eq!(module.read_list_mode(&mut words).unwrap(), level);
    // Header: event length, slot, channel.
    assert_eq!(words[0] >> 17, 4);
    assert_eq!((words[0] >> 4) & 0xf, 2);
    assert_eq!(words[0] & 0xf, 0);
    assert_eq!(words[1], 0);

    let mut last = (module.run_stats.in_bytes(), module.run_stats.out_bytes());
    for _ in 0..5 {
        let level = module.read_list_mode_level().unwrap();
        let mut words = vec![0; level];
        assert_eq!(module.read_list_mode(&mut words).unwrap(), level);
        let now = (module.run_stats.in_bytes(), module.run_stats.out_bytes());
        assert!(now.0 >= last.0 && now.1 >= last.1);
        last = now;
    }
    assert!(module.run_stats.out_bytes() <= module.run_stats.in_bytes());

    module.run_end().unwrap();
    assert!(!module.run_active().unwrap());

    loop {
        let level = module.read_list_mode_level().unwrap();
        if level == 0 {
            break;
        }
        let mut words = vec![0; level];
        module.read_list_mode(&mut words).unwrap();
    }
    assert_eq!(module.run_stats.in_bytes(), module.run_stats.out_bytes());

    let mut words = vec![7; 8];
    assert_eq!(module.read_list_mode(&mut words).unwrap(), 0);
    assert!(words.iter().all(|&w| w == 0));
}

#[test]
fn test_histogram_run_and_stats() {
    let tmp = TempDir::new().unwrap();
    let pixie = common::booted(&tmp);
    for number in 0..3 {
        pixie
            .module(number)
            .unwrap()
            .start_histograms(RunMode::NewRun)
            .unwrap();
    }
    pixie.end_run().unwrap();

    let mut module = pixie.module(1).unwrap();
    assert!(!module.run_active().unwrap());
    let mut histogram = vec![0; MAX_HISTOGRAM_LENGTH];
    module.read_histogram(3, &mut histogram).unwrap();
    assert!(histogram.iter().map(|&c| u64::from(c)).sum::<u64>() > 0);

    let stats = module.read_stats().unwrap();
    assert_eq!(stats.channels.len(), 16);
    assert!(stats.module.processed_events() > 0);
    assert!(stats.module.real_time() > 0.0);
    assert!(stats.channels[0].input_counts() >= stats.channels[0].output_counts());
}

#[test]
fn test_sync_wait_needs_run_leader() {
    let tmp = TempDir::new().unwrap();
    let pixie = common::booted(&tmp);

    pixie.write_module_param(0, ModuleParam::SynchWait, 1).unwrap();
    for number in 0..3 {
        assert_eq!(pixie.read_module_param(number, ModuleParam::SynchWait).unwrap(), 1);
    }
    assert_eq!(pixie.backplane().sync_waits(), 3);

    let err = pixie
        .module(0)
        .unwrap()
        .start_listmode(RunMode::NewRun)
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::ModuleInvalidOperation);

    let roles = (1 << csrb::CHASSISMASTER) | (1 << csrb::DIRMOD);
    pixie.write_module_param(0, ModuleParam::ModuleCsrb, roles).unwrap();
    assert_eq!(pixie.backplane().director.slot(), Some(2));
    let err = pixie
        .write_module_param(1, ModuleParam::ModuleCsrb, 1 << csrb::DIRMOD)
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::ModuleInvalidParam);

    for number in 0..3 {
        pixie
            .module(number)
            .unwrap()
            .start_histograms(RunMode::NewRun)
            .unwrap();
    }
    pixie.end_run().unwrap();
    for number in 0..3 {
        assert!(!pixie.module(number).unwrap().run_active().unwrap());
    }

    pixie.write_module_param(2, ModuleParam::SynchWait, 0).unwrap();
    assert_eq!(pixie.backplane().sync_waits(), 0);
}

#[test]
fn test_control_task_rejected_during_run() {
    let tmp = TempDir::new().unwrap();
    let pixie = common::booted(&tmp);
    let mut module = pixie.module(2).unwrap();
    module.start_histograms(RunMode::NewRun).unwrap();
    let err = module.set_dacs().unwrap_err();
    assert_eq!(err.code, ErrorCode::ModuleInvalidOperation);
    module.run_end().unwrap();
    module.set_dacs().unwrap();
}
