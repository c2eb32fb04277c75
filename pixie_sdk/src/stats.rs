//! Run, module and channel statistics.
//!
//! `FifoStats` counts the words moving through a module's host side FIFO
//! during a run. `Stats` is a snapshot of the DSP run counters converted to
//! engineering units.

use crate::module::Module;
use pixie_common::consts::{SYSTEM_CLOCK_MHZ, Word};
use pixie_common::error::Result;
use pixie_common::hw::AdcConfig;
use pixie_common::param::{ChannelVar, ModuleVar};
use std::fmt;
use std::time::{Duration, Instant};

/// Minimum time between bandwidth updates.
const BANDWIDTH_UPDATE_PERIOD: Duration = Duration::from_millis(100);

const WORD_BYTES: usize = std::mem::size_of::<Word>();

// ─── FIFO statistics ────────────────────────────────────────────────

/// Host side FIFO counters for one run.
#[derive(Debug, Clone, Default)]
pub struct FifoStats {
    /// Words queued into the host FIFO.
    pub in_words: usize,
    /// Words read by the caller.
    pub out_words: usize,
    /// Words moved from the hardware FIFO.
    pub dma_in_words: usize,
    /// Host FIFO overflow events.
    pub overflows: usize,
    /// Words dropped on overflow.
    pub dropped: usize,
    /// Hardware FIFO overflow events.
    pub hw_overflows: usize,
    /// Current bandwidth in MB/s.
    pub bandwidth: f64,
    /// Maximum bandwidth in MB/s.
    pub max_bandwidth: f64,
    /// Minimum bandwidth in MB/s.
    pub min_bandwidth: f64,
    started: Option<Instant>,
    stopped: Option<Instant>,
    last_update: Option<(Instant, usize)>,
}

impl FifoStats {
    /// Clear the counters and start the run interval.
    pub fn start(&mut self) {
        self.clear();
        self.started = Some(Instant::now());
    }

    /// Stop the run interval and compute the run's average bandwidth.
    pub fn stop(&mut self) {
        if self.started.is_some() && self.stopped.is_none() {
            self.stopped = Some(Instant::now());
            self.last_update = None;
            self.bandwidth = self.average_bandwidth();
        }
    }

    /// Zero everything.
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// True between `start()` and `stop()`.
    pub fn running(&self) -> bool {
        self.started.is_some() && self.stopped.is_none()
    }

    /// Run interval so far.
    pub fn interval(&self) -> Duration {
        match (self.started, self.stopped) {
            (Some(start), Some(stop)) => stop.duration_since(start),
            (Some(start), None) => start.elapsed(),
            _ => Duration::ZERO,
        }
    }

    /// Bytes into the host FIFO.
    pub fn in_bytes(&self) -> usize {
        self.in_words * WORD_BYTES
    }

    /// Bytes read by the caller.
    pub fn out_bytes(&self) -> usize {
        self.out_words * WORD_BYTES
    }

    /// Bytes moved from the hardware FIFO.
    pub fn dma_in_bytes(&self) -> usize {
        self.dma_in_words * WORD_BYTES
    }

    fn average_bandwidth(&self) -> f64 {
        let secs = self.interval().as_secs_f64();
        if secs > 0.0 {
            self.dma_in_bytes() as f64 / secs / 1e6
        } else {
            0.0
        }
    }

    /// Update the bandwidth over the period since the last update. Returns
    /// true if the period had elapsed and the value changed.
    pub fn update_bandwidth(&mut self) -> bool {
        if !self.running() {
            return false;
        }
        let now = Instant::now();
        let (since, dma_in) = self
            .last_update
            .or(self.started.map(|s| (s, 0)))
            .unwrap_or((now, 0));
        let period = now.duration_since(since);
        if period < BANDWIDTH_UPDATE_PERIOD {
            return false;
        }
        let bytes = (self.dma_in_words - dma_in.min(self.dma_in_words)) * WORD_BYTES;
        self.bandwidth = bytes as f64 / period.as_secs_f64() / 1e6;
        if self.bandwidth > self.max_bandwidth {
            self.max_bandwidth = self.bandwidth;
        }
        if self.min_bandwidth == 0.0 || self.bandwidth < self.min_bandwidth {
            self.min_bandwidth = self.bandwidth;
        }
        self.last_update = Some((now, self.dma_in_words));
        true
    }
}

impl fmt::Display for FifoStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "period={:.3}s bw={:.3}MB/s max-bw={:.3}MB/s min-bw={:.3}MB/s in={} out={} \
             dma-in={} overflows={} dropped={} hw-overflows={}",
            self.interval().as_secs_f64(),
            self.bandwidth,
            self.max_bandwidth,
            self.min_bandwidth,
            self.in_bytes(),
            self.out_bytes(),
            self.dma_in_bytes(),
            self.overflows,
            self.dropped,
            self.hw_overflows
        )
    }
}

// ─── DSP run statistics ─────────────────────────────────────────────

fn make_u64(high: Word, low: Word) -> u64 {
    (u64::from(high) << 32) | u64::from(low)
}

/// Module run counters.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ModuleStats {
    /// `NumEventsA` word.
    pub num_events_a: Word,
    /// `NumEventsB` word.
    pub num_events_b: Word,
    /// `RunTimeA` word.
    pub runtime_a: Word,
    /// `RunTimeB` word.
    pub runtime_b: Word,
}

impl ModuleStats {
    /// Events the DSP processed.
    pub fn processed_events(&self) -> u64 {
        make_u64(self.num_events_a, self.num_events_b)
    }

    /// Run time in seconds.
    pub fn real_time(&self) -> f64 {
        make_u64(self.runtime_a, self.runtime_b) as f64 * (1.0e-6 / SYSTEM_CLOCK_MHZ)
    }
}

/// Channel run counters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelStats {
    /// `FastPeaksA` word.
    pub fast_peaks_a: Word,
    /// `FastPeaksB` word.
    pub fast_peaks_b: Word,
    /// `LiveTimeA` word.
    pub live_time_a: Word,
    /// `LiveTimeB` word.
    pub live_time_b: Word,
    /// `ChanEventsA` word.
    pub chan_events_a: Word,
    /// `ChanEventsB` word.
    pub chan_events_b: Word,
    /// Module `RunTimeA` word.
    pub runtime_a: Word,
    /// Module `RunTimeB` word.
    pub runtime_b: Word,
    /// Channel ADC configuration.
    pub config: AdcConfig,
}

impl ChannelStats {
    fn new(config: AdcConfig) -> Self {
        Self {
            fast_peaks_a: 0,
            fast_peaks_b: 0,
            live_time_a: 0,
            live_time_b: 0,
            chan_events_a: 0,
            chan_events_b: 0,
            runtime_a: 0,
            runtime_b: 0,
            config,
        }
    }

    /// Live time in seconds.
    pub fn live_time(&self) -> f64 {
        let live = make_u64(self.live_time_a, self.live_time_b) as f64;
        live * f64::from(self.config.adc_clk_div) * (1.0e-6 / f64::from(self.config.adc_msps))
    }

    /// Real time in seconds.
    pub fn real_time(&self) -> f64 {
        make_u64(self.runtime_a, self.runtime_b) as f64 * (1.0e-6 / SYSTEM_CLOCK_MHZ)
    }

    /// Raw input counts.
    pub fn input_counts(&self) -> u64 {
        make_u64(self.fast_peaks_a, self.fast_peaks_b)
    }

    /// Raw output counts.
    pub fn output_counts(&self) -> u64 {
        make_u64(self.chan_events_a, self.chan_events_b)
    }

    /// Input count rate in counts per second.
    pub fn input_count_rate(&self) -> f64 {
        let live = make_u64(self.live_time_a, self.live_time_b) as f64;
        if live == 0.0 || self.config.adc_msps == 0 {
            return 0.0;
        }
        self.input_counts() as f64 / (live * (1.0e-6 / f64::from(self.config.adc_msps)))
    }

    /// Output count rate in counts per second.
    pub fn output_count_rate(&self) -> f64 {
        let real = make_u64(self.runtime_a, self.runtime_b) as f64;
        if real == 0.0 {
            return 0.0;
        }
        self.output_counts() as f64 / (real * (1.0e-6 / SYSTEM_CLOCK_MHZ))
    }
}

/// Snapshot of a module's run statistics.
#[derive(Debug, Clone, PartialEq)]
pub struct Stats {
    /// Module counters.
    pub module: ModuleStats,
    /// One entry per channel.
    pub channels: Vec<ChannelStats>,
}

impl Stats {
    /// Zeroed statistics for a module's channel configurations.
    pub fn new(configs: &[AdcConfig]) -> Self {
        Self {
            module: ModuleStats::default(),
            channels: configs.iter().copied().map(ChannelStats::new).collect(),
        }
    }
}

/// Read a module's run counters.
pub(crate) fn read(module: &mut Module) -> Result<Stats> {
    let mut stats = Stats::new(&module.configs);
    stats.module.num_events_a = module.read_var(ModuleVar::NumEventsA, 0, true)?;
    stats.module.num_events_b = module.read_var(ModuleVar::NumEventsB, 0, true)?;
    stats.module.runtime_a = module.read_var(ModuleVar::RunTimeA, 0, true)?;
    stats.module.runtime_b = module.read_var(ModuleVar::RunTimeB, 0, true)?;
    for (channel, chan) in stats.channels.iter_mut().enumerate() {
        chan.fast_peaks_a = module.read_channel_var(ChannelVar::FastPeaksA, channel, 0, true)?;
        chan.fast_peaks_b = module.read_channel_var(ChannelVar::FastPeaksB, channel, 0, true)?;
        chan.live_time_a = module.read_channel_var(ChannelVar::LiveTimeA, channel, 0, true)?;
        chan.live_time_b = module.read_channel_var(ChannelVar::LiveTimeB, channel, 0, true)?;
        chan.chan_events_a = module.read_channel_var(ChannelVar::ChanEventsA, channel, 0, true)?;
        chan.chan_events_b = module.read_channel_var(ChannelVar::ChanEventsB, channel, 0, true)?;
        chan.runtime_a = stats.module.runtime_a;
        chan.runtime_b = stats.module.runtime_b;
    }
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adc(msps: u32, div: u32) -> AdcConfig {
        AdcConfig {
            adc_bits: 14,
            adc_msps: msps,
            adc_clk_div: div,
        }
    }

    #[test]
    fn zero_denominators_give_zero_rates() {
        let chan = ChannelStats::new(adc(250, 2));
        assert_eq!(chan.input_count_rate(), 0.0);
        assert_eq!(chan.output_count_rate(), 0.0);
        assert_eq!(chan.live_time(), 0.0);
    }

    #[test]
    fn channel_rates_from_counters() {
        let mut chan = ChannelStats::new(adc(250, 2));
        // 1 s of live time at 250 MSPS with a divide of 2.
        chan.live_time_b = 125_000_000;
        chan.fast_peaks_b = 1000;
        chan.runtime_b = 100_000_000;
        chan.chan_events_b = 500;
        assert!((chan.live_time() - 1.0).abs() < 1e-9);
        assert!((chan.input_count_rate() - 2000.0).abs() < 1e-6);
        assert!((chan.real_time() - 1.0).abs() < 1e-9);
        assert!((chan.output_count_rate() - 500.0).abs() < 1e-9);
    }

    #[test]
    fn module_counters_combine_words() {
        let stats = ModuleStats {
            num_events_a: 1,
            num_events_b: 2,
            runtime_a: 0,
            runtime_b: 50_000_000,
        };
        assert_eq!(stats.processed_events(), (1 << 32) + 2);
        assert!((stats.real_time() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn fifo_stats_bytes_and_lifecycle() {
        let mut stats = FifoStats::default();
        assert!(!stats.running());
        stats.start();
        stats.in_words = 10;
        stats.out_words = 4;
        stats.dma_in_words = 10;
        assert!(stats.running());
        assert_eq!(stats.in_bytes(), 40);
        assert_eq!(stats.out_bytes(), 16);
        stats.stop();
        assert!(!stats.running());
        assert!(stats.bandwidth >= 0.0);
        assert!(!stats.update_bandwidth());
        stats.start();
        assert_eq!(stats.in_words, 0);
    }
}
