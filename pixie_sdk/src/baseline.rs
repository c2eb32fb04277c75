//! Baseline capture and cut finding.
//!
//! The `get_baselines` control task fills the I/O buffer with a start time
//! followed by fixed size records:
//!
//! ```text
//!  word 0..2          start time (hi, lo)
//!  record n           time (hi, lo), baseline[0..max_channels] (IEEE single)
//! ```
//!
//! Record times are in system clock ticks and reported in seconds relative
//! to the start time. One capture serves every channel of the module.

use crate::module::Module;
use pixie_common::consts::{IO_BUFFER_LENGTH, SYSTEM_CLOCK_MHZ, Word};
use pixie_common::error::{ErrorCode, PixieError, Result};
use pixie_common::param::ChannelVar;
use std::time::Instant;
use tracing::{debug, info};

/// Capture rounds per cut computation.
const CUT_ROUNDS: usize = 10;

/// One baseline sample.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BaselineRecord {
    /// Seconds since the capture started.
    pub time: f64,
    /// Baseline level in ADC units.
    pub value: f64,
}

/// Baselines for a set of channels of one module.
#[derive(Debug, Clone)]
pub struct Baseline {
    channels: Vec<usize>,
    max_channels: usize,
    values: Vec<Vec<BaselineRecord>>,
    cuts: Vec<Word>,
}

fn ticks_to_secs(hi: Word, lo: Word) -> f64 {
    let ticks = (u64::from(hi) << 32) | u64::from(lo);
    ticks as f64 * 1.0e-6 / SYSTEM_CLOCK_MHZ
}

/// Sum and count of the absolute first differences that pass the outlier
/// test against `cut`. A `cut` of zero accepts every difference.
pub(crate) fn noise_differences(records: &[BaselineRecord], cut: Word) -> (f64, usize) {
    let mut sum = 0.0;
    let mut count = 0;
    for pair in records.windows(2) {
        let (a, b) = (pair[0].value, pair[1].value);
        let diff = (a - b).abs();
        if diff == 0.0 || diff >= 10.0 * a || diff >= 10.0 * b {
            continue;
        }
        if cut == 0 || diff < f64::from(cut) {
            sum += diff;
            count += 1;
        }
    }
    (sum, count)
}

/// `floor(8 * sigma)` where sigma is the mean difference scaled by
/// `sqrt(pi/2)`.
pub(crate) fn cut_from_noise(sum: f64, count: usize) -> Word {
    if count == 0 {
        return 0;
    }
    let sigma = sum * std::f64::consts::FRAC_PI_2.sqrt() / count as f64;
    (8.0 * sigma).floor() as Word
}

impl Baseline {
    /// Baselines for `channels` of `module`.
    ///
    /// # Errors
    /// `ChannelNumberInvalid` for a channel the module does not have.
    pub fn new(module: &Module, channels: &[usize]) -> Result<Self> {
        if let Some(&bad) = channels.iter().find(|&&ch| ch >= module.num_channels) {
            return Err(PixieError::module(
                module.number,
                module.slot,
                ErrorCode::ChannelNumberInvalid,
                format!("baseline: invalid channel: {bad}"),
            ));
        }
        if module.max_channels == 0 {
            return Err(PixieError::module(
                module.number,
                module.slot,
                ErrorCode::InternalFailure,
                "baseline: module has no channels",
            ));
        }
        Ok(Self {
            channels: channels.to_vec(),
            max_channels: module.max_channels,
            values: vec![Vec::new(); channels.len()],
            cuts: vec![0; channels.len()],
        })
    }

    /// Records per capture.
    pub fn num(&self) -> usize {
        (IO_BUFFER_LENGTH - 2) / (2 + self.max_channels)
    }

    /// Channels in capture order.
    pub fn channels(&self) -> &[usize] {
        &self.channels
    }

    /// Records of each channel, in the order of [`Baseline::channels`].
    pub fn values(&self) -> &[Vec<BaselineRecord>] {
        &self.values
    }

    /// Cut of each channel from the last [`Baseline::find_cut`].
    pub fn cuts(&self) -> &[Word] {
        &self.cuts
    }

    /// Read the captured baselines. With `run` a capture is started first.
    pub fn get(&mut self, module: &mut Module, run: bool) -> Result<()> {
        debug!("{}baseline get: run={run}", module.label());
        if run {
            module.acquire_baselines()?;
        }
        let mut buffer = vec![0; IO_BUFFER_LENGTH];
        module.read_io_buffer(&mut buffer)?;

        let start = ticks_to_secs(buffer[0], buffer[1]);
        let block = 2 + self.max_channels;
        let num = self.num();
        for (records, &channel) in self.values.iter_mut().zip(&self.channels) {
            records.clear();
            records.extend((0..num).map(|n| {
                let offset = 2 + n * block;
                BaselineRecord {
                    time: ticks_to_secs(buffer[offset], buffer[offset + 1]) - start,
                    value: f64::from(f32::from_bits(buffer[offset + 2 + channel])),
                }
            }));
        }
        Ok(())
    }

    /// Capture [`CUT_ROUNDS`] rounds and compute each channel's cut.
    pub fn compute_cut(&mut self, module: &mut Module) -> Result<()> {
        self.cuts.fill(0);
        let mut noise = vec![(0.0, 0usize); self.channels.len()];
        for _ in 0..CUT_ROUNDS {
            self.get(module, true)?;
            for ((records, &cut), (sum, count)) in
                self.values.iter().zip(&self.cuts).zip(noise.iter_mut())
            {
                let (s, c) = noise_differences(records, cut);
                *sum += s;
                *count += c;
            }
        }
        for (cut, (sum, count)) in self.cuts.iter_mut().zip(noise) {
            *cut = cut_from_noise(sum, count);
        }
        debug!("{}computed cuts={:?}", module.label(), self.cuts);
        Ok(())
    }

    fn write_cuts(&self, module: &mut Module) -> Result<()> {
        for (&channel, &cut) in self.channels.iter().zip(&self.cuts) {
            module.write_channel_var(ChannelVar::BLcut, cut, channel, 0, true)?;
        }
        Ok(())
    }

    fn measure(&mut self, module: &mut Module) -> Result<()> {
        self.compute_cut(module)?;
        self.write_cuts(module)?;
        self.compute_cut(module)?;
        self.write_cuts(module)
    }

    /// Find and write each channel's `BLcut`.
    ///
    /// Baseline averaging and the cut are zeroed while measuring. The
    /// averaging weight is restored afterwards; on error both variables get
    /// their saved values back and the first error is returned.
    pub fn find_cut(&mut self, module: &mut Module) -> Result<()> {
        info!(
            "{}find bl cut: channels={:?}",
            module.label(),
            self.channels
        );
        let start = Instant::now();

        let mut saved = Vec::with_capacity(self.channels.len());
        for &channel in &self.channels {
            let weight = module.read_channel_var(ChannelVar::Log2Bweight, channel, 0, false)?;
            let cut = module.read_channel_var(ChannelVar::BLcut, channel, 0, false)?;
            saved.push((weight, cut));
        }
        for &channel in &self.channels {
            module.write_channel_var(ChannelVar::Log2Bweight, 0, channel, 0, true)?;
            module.write_channel_var(ChannelVar::BLcut, 0, channel, 0, true)?;
        }

        if let Err(err) = self.measure(module) {
            for (&channel, &(weight, cut)) in self.channels.iter().zip(&saved) {
                let _ = module.write_channel_var(ChannelVar::Log2Bweight, weight, channel, 0, true);
                let _ = module.write_channel_var(ChannelVar::BLcut, cut, channel, 0, true);
            }
            return Err(err);
        }

        for (&channel, &(weight, _)) in self.channels.iter().zip(&saved) {
            module.write_channel_var(ChannelVar::Log2Bweight, weight, channel, 0, true)?;
        }

        info!(
            "{}find bl cut: cuts={:?} duration={:?}",
            module.label(),
            self.cuts,
            start.elapsed()
        );
        Ok(())
    }
}
