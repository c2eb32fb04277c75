//! Control tasks and data runs.
//!
//! A control task is a short DSP job (program the FPGA, set DACs, capture
//! baselines) the host waits on. A run task is list-mode or histogram data
//! taking that stays active until it is ended.
//!
//! ```text
//!  Idle ──start_listmode()/start_histograms()──► Active
//!   ▲                                              │
//!   └──────────────── run_end() ◄──────────────────┘
//! ```

use super::Module;
use crate::baseline::Baseline;
use crate::stats::{self, Stats};
use pixie_common::consts::{Word, revision};
use pixie_common::error::{ErrorCode, Result};
use pixie_common::hw::{ControlTask, MemoryRegion, RunMode, RunTask};
use pixie_common::param::{ModuleParam, ModuleVar};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Longest a control task may run.
pub const CONTROL_TASK_TIMEOUT: Duration = Duration::from_millis(10_000);

/// Longest the DSP may take to end a run.
pub const RUN_END_TIMEOUT: Duration = Duration::from_millis(1000);

const POLL_PERIOD: Duration = Duration::from_millis(1);

impl Module {
    /// Write the task variables the DSP reads when a task starts.
    fn write_task_vars(&mut self, run: RunTask, control: ControlTask, mode: RunMode) -> Result<()> {
        let vars = [
            (ModuleVar::RunTask, run as Word),
            (ModuleVar::ControlTask, control as Word),
            (ModuleVar::Resume, mode as Word),
        ];
        for (var, value) in vars {
            if self.descriptors.module_var(var).enabled() {
                self.write_var(var, value, 0, true)?;
            }
        }
        Ok(())
    }

    /// Wait for the DSP to go idle.
    fn wait_idle(&mut self, timeout: Duration) -> Result<bool> {
        let start = Instant::now();
        loop {
            if !self.hw.busy()? {
                return Ok(true);
            }
            if start.elapsed() >= timeout {
                return Ok(false);
            }
            thread::sleep(POLL_PERIOD);
        }
    }

    /// Run a control task and wait for it to finish.
    ///
    /// # Errors
    /// `ModuleInvalidOperation` while a run is active, `ModuleTaskTimeout`
    /// if the DSP does not finish in [`CONTROL_TASK_TIMEOUT`].
    pub fn control(&mut self, task: ControlTask) -> Result<()> {
        self.online_check()?;
        if self.offline_mode {
            debug!("{}control: {task:?}: offline mode", self.label());
            self.control_task = task;
            return Ok(());
        }
        if task == ControlTask::RampOffsetDacs && self.revision == revision::REV_H {
            return Err(self.error(ErrorCode::ModuleInvalidOperation, "not supported"));
        }
        self.run_check()?;
        debug!("{}control: {task:?}", self.label());
        let start = Instant::now();
        self.write_task_vars(RunTask::Nop, task, RunMode::NewRun)?;
        self.run_task = RunTask::Nop;
        self.control_task = task;
        self.hw.start_control_task(task)?;
        if !self.wait_idle(CONTROL_TASK_TIMEOUT)? {
            return Err(self.error(
                ErrorCode::ModuleTaskTimeout,
                format!("control task failed to end: {}", task as u32),
            ));
        }
        debug!(
            "{}control: {task:?}: duration={:?}",
            self.label(),
            start.elapsed()
        );
        Ok(())
    }

    /// Program the signal processing FPGA from the DSP variables.
    pub fn program_fippi(&mut self) -> Result<()> {
        debug!("{}program-fippi", self.label());
        self.control(ControlTask::ProgramFippi)
    }

    /// Load the offset DACs.
    pub fn set_dacs(&mut self) -> Result<()> {
        info!("{}set-dacs", self.label());
        self.control(ControlTask::SetDacs)
    }

    /// Capture ADC traces for [`Module::read_adc`].
    pub fn get_traces(&mut self) -> Result<()> {
        info!("{}get-traces", self.label());
        self.control(ControlTask::GetTraces)
    }

    /// Auto adjust the offset DACs.
    pub fn adjust_offsets(&mut self) -> Result<()> {
        info!("{}adjust-offsets", self.label());
        self.control(ControlTask::AdjustOffsets)
    }

    /// Estimate each channel's decay time into `AutoTau`.
    pub fn tau_finder(&mut self) -> Result<()> {
        info!("{}tau-finder", self.label());
        self.control(ControlTask::TauFinder)
    }

    /// Capture baselines into the I/O buffer.
    pub fn acquire_baselines(&mut self) -> Result<()> {
        info!("{}acquire-baselines", self.label());
        self.control(ControlTask::GetBaselines)
    }

    /// Bring the analog front end in line with the DSP variables.
    pub fn sync_hw(&mut self) -> Result<()> {
        self.online_check()?;
        info!("{}sync hardware", self.label());
        self.program_fippi()?;
        self.set_dacs()?;
        let csrb = self.read_param(ModuleParam::ModuleCsrb)?;
        self.module_csrb(csrb)?;
        if self.revision == revision::REV_F {
            self.control(ControlTask::ResetAdc)?;
        }
        Ok(())
    }

    // ─── Runs ───────────────────────────────────────────────────────

    /// True while the DSP runs a task.
    pub fn run_active(&mut self) -> Result<bool> {
        if !self.online() || self.offline_mode {
            return Ok(false);
        }
        self.hw.busy()
    }

    /// Fail if a run is active.
    pub fn run_check(&mut self) -> Result<()> {
        if self.run_active()? {
            return Err(self.error(
                ErrorCode::ModuleInvalidOperation,
                "invalid action while run active",
            ));
        }
        Ok(())
    }

    /// Task of the active run.
    pub fn run_task(&self) -> RunTask {
        self.run_task
    }

    /// Last control task started.
    pub fn control_task(&self) -> ControlTask {
        self.control_task
    }

    fn start_run(&mut self, task: RunTask, mode: RunMode) -> Result<()> {
        if self.run_active()? {
            return Err(self.error(
                ErrorCode::ModuleInvalidOperation,
                "module already running a task",
            ));
        }
        self.backplane.sync_wait_valid()?;
        self.run_stats.start();
        self.control_task = ControlTask::Nop;
        self.run_task = task;
        if self.offline_mode {
            debug!("{}run: {task:?}: offline mode", self.label());
            return Ok(());
        }
        self.write_task_vars(task, ControlTask::Nop, mode)?;
        self.hw.start_run(task, mode)
    }

    /// Start MCA histogramming. A new run clears the histograms.
    pub fn start_histograms(&mut self, mode: RunMode) -> Result<()> {
        info!("{}start-histograms: mode={mode:?}", self.label());
        self.online_check()?;
        if mode == RunMode::NewRun && self.hardware_accessible() && !self.run_active()? {
            self.hw.clear_memory(MemoryRegion::Mca)?;
        }
        self.start_run(RunTask::Histogram, mode)
    }

    /// Start list-mode data taking. The host FIFO is flushed.
    pub fn start_listmode(&mut self, mode: RunMode) -> Result<()> {
        info!("{}start-list-mode: mode={mode:?}", self.label());
        self.online_check()?;
        if self.run_task != RunTask::Nop && self.run_active()? {
            return Err(self.error(
                ErrorCode::ModuleInvalidOperation,
                "module already running a task",
            ));
        }
        self.fifo_data.clear();
        self.start_run(RunTask::ListMode, mode)
    }

    /// End the active run and drain what the DSP pushed to the FIFO.
    ///
    /// # Errors
    /// `ModuleTaskTimeout` if the DSP does not stop in
    /// [`RUN_END_TIMEOUT`]; the module must then be rebooted.
    pub fn run_end(&mut self) -> Result<()> {
        self.online_check()?;
        info!("{}run_end: attempting to stop run", self.label());
        let running = self.run_task != RunTask::Nop;
        if !running {
            warn!("{}run-end: no run active", self.label());
        }
        if self.hardware_accessible() && self.hw.busy()? {
            let start = Instant::now();
            self.hw.end_run()?;
            if !self.wait_idle(RUN_END_TIMEOUT)? {
                self.run_task = RunTask::Nop;
                self.control_task = ControlTask::Nop;
                error!("{}run: failed to end task; module reboot required", self.label());
                return Err(self.error(
                    ErrorCode::ModuleTaskTimeout,
                    "failed to end active run task; module reboot required",
                ));
            }
            debug!("{}run: ended, duration={:?}", self.label(), start.elapsed());
        }
        if self.hardware_accessible() {
            self.fifo_service(true)?;
        }
        self.run_task = RunTask::Nop;
        self.control_task = ControlTask::Nop;
        self.run_stats.stop();
        if running {
            info!("{}run: {}", self.label(), self.run_stats);
        }
        Ok(())
    }

    // ─── Memory ─────────────────────────────────────────────────────

    fn read_region(&mut self, region: MemoryRegion, channel: usize, out: &mut [Word]) -> Result<()> {
        if !self.hardware_accessible() {
            return Err(self.error(ErrorCode::ModuleOffline, "hardware not accessible"));
        }
        self.hw.read_memory(region, channel, out)
    }

    pub(crate) fn read_io_buffer(&mut self, out: &mut [Word]) -> Result<()> {
        self.read_region(MemoryRegion::IoBuffer, 0, out)
    }

    /// Read a channel's MCA histogram into `out`.
    pub fn read_histogram(&mut self, channel: usize, out: &mut [Word]) -> Result<()> {
        info!(
            "{}read-histogram: channel={channel} length={}",
            self.label(),
            out.len()
        );
        self.online_check()?;
        self.check_channel(channel)?;
        self.read_region(MemoryRegion::Mca, channel, out)
    }

    /// Read a channel's ADC trace. With `run` the traces are captured first,
    /// otherwise the last control task must have captured them.
    pub fn read_adc(&mut self, channel: usize, out: &mut [u16], run: bool) -> Result<()> {
        debug!(
            "{}read-adc: channel={channel} size={} run={run}",
            self.label(),
            out.len()
        );
        self.online_check()?;
        self.check_channel(channel)?;
        if run {
            self.get_traces()?;
        }
        if self.control_task != ControlTask::GetTraces {
            return Err(self.error(
                ErrorCode::ModuleInvalidOperation,
                "control task `get_traces` has not run",
            ));
        }
        let mut words = vec![0; out.len().div_ceil(2)];
        self.read_region(MemoryRegion::AdcTrace, channel, &mut words)?;
        for (pair, word) in out.chunks_mut(2).zip(words) {
            pair[0] = (word & 0xffff) as u16;
            if let Some(hi) = pair.get_mut(1) {
                *hi = (word >> 16) as u16;
            }
        }
        Ok(())
    }

    /// Run statistics read from the DSP.
    pub fn read_stats(&mut self) -> Result<Stats> {
        info!("{}read-stats: channels={}", self.label(), self.num_channels);
        self.online_check()?;
        stats::read(self)
    }

    // ─── Baselines ──────────────────────────────────────────────────

    /// Find and set the baseline cut of `channels`. Returns the cuts.
    pub fn bl_find_cut(&mut self, channels: &[usize]) -> Result<Vec<Word>> {
        info!("{}bl-find-cut: channels={}", self.label(), channels.len());
        self.online_check()?;
        let mut baseline = Baseline::new(self, channels)?;
        baseline.find_cut(self)?;
        Ok(baseline.cuts().to_vec())
    }

    /// Read baselines for `channels`. With `run` they are captured first,
    /// otherwise the last control task must have captured them.
    pub fn bl_get(&mut self, channels: &[usize], run: bool) -> Result<Baseline> {
        info!("{}bl-get: channels={}", self.label(), channels.len());
        self.online_check()?;
        let mut baseline = Baseline::new(self, channels)?;
        if run {
            self.acquire_baselines()?;
        }
        if self.control_task != ControlTask::GetBaselines {
            return Err(self.error(
                ErrorCode::ModuleInvalidOperation,
                "control task `get_baselines` has not run",
            ));
        }
        baseline.get(self, false)?;
        Ok(baseline)
    }
}
