//! Host side list-mode FIFO.
//!
//! Words are moved from the hardware FIFO into a bounded host queue when the
//! hardware level reaches the DMA trigger level or the hold time expires.
//! Callers read from the host queue. Words that do not fit are dropped and
//! counted.

use super::Module;
use pixie_common::config::FifoConfig;
use pixie_common::consts::Word;
use pixie_common::error::{ErrorCode, Result};
use pixie_common::hw::RunTask;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const WORD_BYTES: usize = std::mem::size_of::<Word>();

impl Module {
    fn check_fifo_range<T>(&self, name: &str, value: T, (min, max): (T, T)) -> Result<()>
    where
        T: PartialOrd + std::fmt::Display + Copy,
    {
        if value < min || value > max {
            return Err(self.error(
                ErrorCode::ModuleInvalidVar,
                format!("invalid fifo {name}: {value} (range {min}..={max})"),
            ));
        }
        Ok(())
    }

    /// FIFO configuration in use.
    pub fn fifo_config(&self) -> &FifoConfig {
        &self.fifo_config
    }

    /// Set the number of host buffers. Not allowed while a run is active.
    pub fn set_fifo_buffers(&mut self, buffers: usize) -> Result<()> {
        self.check_fifo_range("buffers", buffers, FifoConfig::BUFFERS)?;
        self.run_check()?;
        self.fifo_config.buffers = buffers;
        Ok(())
    }

    /// Set the poll period used while a run is active. Zero polls
    /// continuously.
    pub fn set_fifo_run_wait(&mut self, usecs: u64) -> Result<()> {
        if usecs == 0 {
            warn!("{}fifo run wait is 0, polling continuously", self.label());
        } else {
            self.check_fifo_range("run wait", usecs, FifoConfig::RUN_WAIT_USECS)?;
        }
        self.fifo_config.run_wait_usecs = usecs;
        Ok(())
    }

    /// Set the poll period used while idle.
    pub fn set_fifo_idle_wait(&mut self, usecs: u64) -> Result<()> {
        self.check_fifo_range("idle wait", usecs, FifoConfig::IDLE_WAIT_USECS)?;
        self.fifo_config.idle_wait_usecs = usecs;
        Ok(())
    }

    /// Set how long data may sit in the hardware FIFO below the DMA trigger
    /// level.
    pub fn set_fifo_hold(&mut self, usecs: u64) -> Result<()> {
        self.check_fifo_range("hold", usecs, FifoConfig::HOLD_USECS)?;
        self.fifo_config.hold_usecs = usecs;
        Ok(())
    }

    /// Set the hardware level in bytes that triggers a drain.
    pub fn set_fifo_dma_trigger_level(&mut self, bytes: usize) -> Result<()> {
        self.check_fifo_range(
            "dma trigger level",
            bytes,
            FifoConfig::DMA_TRIGGER_LEVEL_BYTES,
        )?;
        self.fifo_config.dma_trigger_level_bytes = bytes;
        Ok(())
    }

    /// Period a caller should wait between FIFO polls.
    pub fn fifo_poll_wait(&self) -> Duration {
        let usecs = if self.run_task == RunTask::Nop {
            self.fifo_config.idle_wait_usecs
        } else {
            self.fifo_config.run_wait_usecs
        };
        Duration::from_micros(usecs)
    }

    /// Move words from the hardware FIFO to the host queue. Without `force`
    /// a level below the DMA trigger is left in place until the hold time
    /// has passed. Returns the words moved.
    pub(crate) fn fifo_service(&mut self, force: bool) -> Result<usize> {
        let level = self.hw.fifo_level()?;
        let overflows = self.hw.fifo_overflows()?;
        if overflows > 0 {
            warn!("{}fifo: hardware overflows: {overflows}", self.label());
            self.run_stats.hw_overflows += overflows;
        }
        if level == 0 {
            self.fifo_drained = Some(Instant::now());
            self.run_stats.update_bandwidth();
            return Ok(0);
        }
        let hold = Duration::from_micros(self.fifo_config.hold_usecs);
        let held = self.fifo_drained.is_some_and(|at| at.elapsed() < hold);
        if !force && level * WORD_BYTES < self.fifo_config.dma_trigger_level_bytes && held {
            return Ok(0);
        }

        let mut words = vec![0; level];
        let read = self.hw.fifo_read(&mut words)?;
        words.truncate(read);
        self.fifo_drained = Some(Instant::now());
        self.run_stats.dma_in_words += read;

        let space = self
            .fifo_config
            .capacity_words()
            .saturating_sub(self.fifo_data.len());
        let queued = read.min(space);
        if queued < read {
            let dropped = read - queued;
            warn!("{}fifo: host queue full, dropped {dropped} words", self.label());
            self.run_stats.overflows += 1;
            self.run_stats.dropped += dropped;
        }
        self.fifo_data.extend(words.into_iter().take(queued));
        self.run_stats.in_words += queued;
        self.run_stats.update_bandwidth();
        debug!(
            "{}fifo: moved={read} queued={}",
            self.label(),
            self.fifo_data.len()
        );
        Ok(read)
    }

    /// Words waiting in the host queue.
    pub fn read_list_mode_level(&mut self) -> Result<usize> {
        self.online_check()?;
        if self.hardware_accessible() {
            self.fifo_service(false)?;
        }
        Ok(self.fifo_data.len())
    }

    /// Copy up to `out.len()` words from the host queue. A shortfall is
    /// logged and the rest of `out` zero filled. Returns the words copied.
    pub fn read_list_mode(&mut self, out: &mut [Word]) -> Result<usize> {
        self.online_check()?;
        if self.hardware_accessible() && self.fifo_data.len() < out.len() {
            self.fifo_service(true)?;
        }
        let count = out.len().min(self.fifo_data.len());
        for (slot, word) in out.iter_mut().zip(self.fifo_data.drain(..count)) {
            *slot = word;
        }
        if count < out.len() {
            warn!(
                "{}read-list-mode: not enough data: requested={} available={count}",
                self.label(),
                out.len()
            );
            out[count..].fill(0);
        }
        self.run_stats.out_words += count;
        Ok(count)
    }
}
