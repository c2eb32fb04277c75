//! Channel parameters in engineering units.
//!
//! A [`ChannelView`] borrows its module and converts the named channel
//! parameters to and from the raw DSP variables. Nothing is stored in the
//! view: every read is computed from the variable caches and every write
//! lands in the DSP.
//!
//! # Units
//!
//! | Parameter | Unit | Raw variables |
//! |-----------|------|---------------|
//! | `TRIGGER_RISETIME`, `TRIGGER_FLATTOP` | µs | `FastLength`, `FastGap` |
//! | `TRIGGER_THRESHOLD` | ADC units | `FastThresh` |
//! | `ENERGY_RISETIME`, `ENERGY_FLATTOP` | µs | `SlowLength`, `SlowGap`, `PeakSep`, `PeakSample` |
//! | `TRACE_LENGTH`, `TRACE_DELAY` | µs | `TraceLength`, `PAFlength`, `TriggerDelay` |
//! | `TAU` | µs | `PreampTau` (IEEE-754 single) |
//! | `VOFFSET` | V | `OffsetDAC` |
//! | `XDT` | µs | `Xwait` |
//!
//! Filter lengths scale by `2^FastFilterRange` and `2^SlowFilterRange`.
//! `round` is half away from zero.

use crate::module::Module;
use pixie_common::consts::{Word, csra, limits, revision};
use pixie_common::error::{ErrorCode, PixieError, Result};
use pixie_common::hw::AdcConfig;
use pixie_common::param::{ChannelParam, ChannelVar, ModuleVar, lookup_channel_param};
use tracing::{debug, info};

/// DSP clock used by `XDT`.
const DSP_CLOCK_MHZ: f64 = 100.0;

/// Twos complement of a small positive count.
fn negate(n: Word) -> Word {
    0u32.wrapping_sub(n)
}

/// Inverse of [`negate`], zero stays zero.
fn unnegate(raw: Word) -> f64 {
    if raw == 0 {
        0.0
    } else {
        (1u64 << 32) as f64 - f64::from(raw)
    }
}

/// Single precision encoding of `value` with the mantissa truncated toward
/// zero.
pub fn ieee_float_truncated(value: f64) -> Word {
    let single = value as f32;
    let bits = single.to_bits();
    if single != 0.0 && single.is_finite() && f64::from(single).abs() > value.abs() {
        bits - 1
    } else {
        bits
    }
}

/// Raw filter clocks scaled by a filter range, in f64 so large raw values
/// cannot overflow.
fn scaled(raw: Word, range: Word) -> f64 {
    f64::from(raw) * f64::from(range)
}

/// Peak sample for a peak separation at a slow filter range of `sfr`.
fn peak_sample(peak_sep: Word, sfr: Word) -> Word {
    let back = match sfr {
        2 => 3,
        4 | 8 => 2,
        16 | 64 => 1,
        32 => 0,
        _ => 2,
    };
    peak_sep.saturating_sub(back)
}

/// Borrowed access to one channel's parameters.
#[derive(Debug)]
pub struct ChannelView<'a> {
    module: &'a mut Module,
    channel: usize,
}

impl<'a> ChannelView<'a> {
    pub(crate) fn new(module: &'a mut Module, channel: usize) -> Self {
        Self { module, channel }
    }

    /// Channel number.
    pub fn number(&self) -> usize {
        self.channel
    }

    /// ADC configuration of the channel.
    pub fn config(&self) -> AdcConfig {
        self.module
            .configs
            .get(self.channel)
            .copied()
            .unwrap_or(AdcConfig {
                adc_bits: 0,
                adc_msps: 0,
                adc_clk_div: 0,
            })
    }

    fn fpga_clk(&self) -> f64 {
        f64::from(self.config().fpga_clk_mhz())
    }

    fn adc_msps(&self) -> f64 {
        f64::from(self.config().adc_msps)
    }

    fn error(&self, code: ErrorCode, message: impl Into<String>) -> PixieError {
        self.module.error(
            code,
            format!("channel={}: {}", self.channel, message.into()),
        )
    }

    // ─── Variable access ────────────────────────────────────────────

    fn get(&mut self, var: ChannelVar) -> Result<Word> {
        self.module.read_channel_var(var, self.channel, 0, true)
    }

    fn cached(&mut self, var: ChannelVar) -> Result<Word> {
        self.module.read_channel_var(var, self.channel, 0, false)
    }

    fn set(&mut self, var: ChannelVar, value: Word) -> Result<()> {
        self.module.write_channel_var(var, value, self.channel, 0, true)
    }

    fn filter_range(&mut self, var: ModuleVar) -> Result<Word> {
        let range = self.module.read_var(var, 0, false)?;
        Ok(1 << range.min(31))
    }

    fn ffr(&mut self) -> Result<Word> {
        self.filter_range(ModuleVar::FastFilterRange)
    }

    fn sfr(&mut self) -> Result<Word> {
        self.filter_range(ModuleVar::SlowFilterRange)
    }

    /// Filter clocks for `value` µs at a filter range, limited to `max`.
    fn filter_clocks(&self, value: f64, range: Word, max: Word) -> Word {
        let clocks = (value * self.fpga_clk() / f64::from(range)).round();
        clocks.clamp(0.0, f64::from(max)) as Word
    }

    fn find_cut(&mut self) -> Result<()> {
        if self.module.hardware_accessible() {
            self.module.bl_find_cut(&[self.channel])?;
        }
        Ok(())
    }

    fn qdc_divider(&self) -> f64 {
        let msps = self.adc_msps();
        if self.config().adc_msps == 500 {
            msps / 5.0
        } else {
            msps
        }
    }

    fn delay_max(&self, par: ChannelParam) -> Result<Word> {
        match self.module.revision {
            revision::REV_B | revision::REV_C | revision::REV_D => {
                Ok(limits::EXTDELAYLEN_MAX_REVBCD)
            }
            revision::REV_F | revision::REV_H => Ok(limits::EXTDELAYLEN_MAX_REVF),
            rev => Err(self.error(
                ErrorCode::NotSupported,
                format!("{par} not supported on revision {}", revision::label(rev)),
            )),
        }
    }

    // ─── FIFO delays ────────────────────────────────────────────────

    /// Recompute `TriggerDelay` and `PAFlength` for a trace delay in filter
    /// clocks.
    pub fn update_fifo(&mut self, trace_delay: Word) -> Result<()> {
        debug!(
            "{}channel={}: fifo update: trace-delay={trace_delay}",
            self.module.label(),
            self.channel
        );
        let sfr = self.sfr()?;
        let ffr = self.ffr()?;
        let fifo_length = self.module.read_var(ModuleVar::FIFOLength, 0, false)?;
        let peak_sep = self.cached(ChannelVar::PeakSep)?;

        let mut trigger_delay = peak_sep.saturating_sub(1).saturating_mul(sfr);
        let mut paf_length = (trigger_delay / ffr).saturating_add(trace_delay);
        if paf_length > fifo_length {
            paf_length = fifo_length.saturating_sub(1);
            trigger_delay = paf_length.saturating_sub(trace_delay).saturating_mul(ffr);
        }

        self.set(ChannelVar::TriggerDelay, trigger_delay)?;
        self.set(ChannelVar::PAFlength, paf_length)
    }

    /// Current trace delay in filter clocks.
    fn trace_delay_clocks(&mut self) -> Result<Word> {
        let ffr = self.ffr()?;
        let paf_length = self.cached(ChannelVar::PAFlength)?;
        let trigger_delay = self.cached(ChannelVar::TriggerDelay)?;
        Ok(paf_length.saturating_sub(trigger_delay / ffr))
    }

    /// Recompute the FIFO delays keeping the current trace delay.
    pub fn refresh_fifo(&mut self) -> Result<()> {
        let trace_delay = self.trace_delay_clocks()?;
        self.update_fifo(trace_delay)
    }

    // ─── Parameters ─────────────────────────────────────────────────

    /// Read a parameter in engineering units.
    pub fn read(&mut self, par: ChannelParam) -> Result<f64> {
        let fpga_clk = self.fpga_clk();
        let value = match par {
            ChannelParam::TriggerRisetime => {
                let ffr = self.ffr()?;
                scaled(self.get(ChannelVar::FastLength)?, ffr) / fpga_clk
            }
            ChannelParam::TriggerFlattop => {
                let ffr = self.ffr()?;
                scaled(self.get(ChannelVar::FastGap)?, ffr) / fpga_clk
            }
            ChannelParam::TriggerThreshold => {
                let thresh = f64::from(self.get(ChannelVar::FastThresh)?);
                let length = f64::from(self.get(ChannelVar::FastLength)?);
                let div = f64::from(self.config().adc_clk_div);
                if length == 0.0 || div == 0.0 {
                    0.0
                } else {
                    thresh / (length * div)
                }
            }
            ChannelParam::EnergyRisetime => {
                let sfr = self.sfr()?;
                scaled(self.get(ChannelVar::SlowLength)?, sfr) / fpga_clk
            }
            ChannelParam::EnergyFlattop => {
                let sfr = self.sfr()?;
                scaled(self.get(ChannelVar::SlowGap)?, sfr) / fpga_clk
            }
            ChannelParam::Tau => f64::from(f32::from_bits(self.get(ChannelVar::PreampTau)?)),
            ChannelParam::TraceLength => {
                let ffr = f64::from(self.ffr()?);
                f64::from(self.get(ChannelVar::TraceLength)?) / (self.adc_msps() * ffr)
            }
            ChannelParam::TraceDelay => {
                let ffr = self.ffr()?;
                let paf_length = f64::from(self.get(ChannelVar::PAFlength)?);
                let trigger_delay = f64::from(self.get(ChannelVar::TriggerDelay)?);
                let ffr = f64::from(ffr);
                (paf_length - trigger_delay / ffr) / (fpga_clk * ffr)
            }
            ChannelParam::Voffset => {
                let raw = f64::from(self.get(ChannelVar::OffsetDAC)?);
                raw / 65536.0 * limits::DAC_VOLTAGE_RANGE - limits::DAC_VOLTAGE_RANGE / 2.0
            }
            ChannelParam::Xdt => f64::from(self.get(ChannelVar::Xwait)?) / DSP_CLOCK_MHZ,
            ChannelParam::BaselinePercent => f64::from(self.get(ChannelVar::BaselinePercent)?),
            ChannelParam::Emin => f64::from(self.get(ChannelVar::EnergyLow)?),
            ChannelParam::BinFactor => unnegate(self.get(ChannelVar::Log2Ebin)?),
            ChannelParam::BaselineAverage => unnegate(self.get(ChannelVar::Log2Bweight)?),
            ChannelParam::ChannelCsra => f64::from(self.get(ChannelVar::ChanCSRa)?),
            ChannelParam::ChannelCsrb => f64::from(self.get(ChannelVar::ChanCSRb)?),
            ChannelParam::BlCut => f64::from(self.get(ChannelVar::BLcut)?),
            ChannelParam::Integrator => f64::from(self.get(ChannelVar::Integrator)?),
            ChannelParam::FastTrigBackLen => {
                f64::from(self.get(ChannelVar::FastTrigBackLen)?) / fpga_clk
            }
            ChannelParam::CfdDelay => f64::from(self.get(ChannelVar::CFDDelay)?) / fpga_clk,
            ChannelParam::CfdScale => f64::from(self.get(ChannelVar::CFDScale)?),
            ChannelParam::CfdThresh => f64::from(self.get(ChannelVar::CFDThresh)?),
            ChannelParam::QdcLen0
            | ChannelParam::QdcLen1
            | ChannelParam::QdcLen2
            | ChannelParam::QdcLen3
            | ChannelParam::QdcLen4
            | ChannelParam::QdcLen5
            | ChannelParam::QdcLen6
            | ChannelParam::QdcLen7 => {
                let var = qdc_var(par);
                f64::from(self.get(var)?) / self.qdc_divider()
            }
            ChannelParam::ExtTrigStretch => {
                f64::from(self.get(ChannelVar::ExtTrigStretch)?) / fpga_clk
            }
            ChannelParam::VetoStretch => f64::from(self.get(ChannelVar::VetoStretch)?) / fpga_clk,
            ChannelParam::ChanTrigStretch => {
                f64::from(self.get(ChannelVar::ChanTrigStretch)?) / fpga_clk
            }
            ChannelParam::ExternDelayLen => {
                f64::from(self.get(ChannelVar::ExternDelayLen)?) / fpga_clk
            }
            ChannelParam::FtrigoutDelay => {
                f64::from(self.get(ChannelVar::FtrigoutDelay)?) / fpga_clk
            }
            ChannelParam::MultiplicityMaskL => f64::from(self.get(ChannelVar::MultiplicityMaskL)?),
            ChannelParam::MultiplicityMaskH => f64::from(self.get(ChannelVar::MultiplicityMaskH)?),
            ChannelParam::ResetDelay => f64::from(self.get(ChannelVar::ResetDelay)?),
        };
        Ok(value)
    }

    /// Write a parameter in engineering units.
    ///
    /// Out of range values are clamped to the hardware limits except
    /// `CFDThresh`, which fails with `InvalidValue`. Writes that change the
    /// filters program the signal processing FPGA. Nothing is written while
    /// a run is active.
    pub fn write(&mut self, par: ChannelParam, value: f64) -> Result<()> {
        info!(
            "{}channel={}: param write: {par} = {value}",
            self.module.label(),
            self.channel
        );
        self.module.run_check()?;
        match par {
            ChannelParam::TriggerRisetime => self.trigger_risetime(value),
            ChannelParam::TriggerFlattop => self.trigger_flattop(value),
            ChannelParam::TriggerThreshold => self.trigger_threshold(value),
            ChannelParam::EnergyRisetime | ChannelParam::EnergyFlattop => {
                self.energy_filter(par, value)
            }
            ChannelParam::Tau => {
                self.set(ChannelVar::PreampTau, ieee_float_truncated(value))?;
                self.find_cut()
            }
            ChannelParam::TraceLength => self.trace_length(value),
            ChannelParam::TraceDelay => self.trace_delay(value),
            ChannelParam::Voffset => {
                let raw = (65536.0 * ((value / limits::DAC_VOLTAGE_RANGE + 1.0) / 2.0)) as Word;
                self.set(ChannelVar::OffsetDAC, raw.min(65535))?;
                self.module.set_dacs()
            }
            ChannelParam::Xdt => self.xdt(value),
            ChannelParam::BaselinePercent => {
                self.set(ChannelVar::BaselinePercent, (value as Word).clamp(1, 99))
            }
            ChannelParam::Emin => self.set(ChannelVar::EnergyLow, value as Word),
            ChannelParam::BinFactor => {
                let n = (value as Word).clamp(limits::BINFACTOR_MIN, limits::BINFACTOR_MAX);
                self.set(ChannelVar::Log2Ebin, negate(n))
            }
            ChannelParam::BaselineAverage => {
                let n = (value as Word).min(limits::BASELINE_AVERAGE_MAX);
                self.set(ChannelVar::Log2Bweight, negate(n))
            }
            ChannelParam::ChannelCsra => self.csra(value as Word),
            ChannelParam::ChannelCsrb => self.set(ChannelVar::ChanCSRb, value as Word),
            ChannelParam::BlCut => self.set(ChannelVar::BLcut, value as Word),
            ChannelParam::ResetDelay => self.set(ChannelVar::ResetDelay, value as Word),
            ChannelParam::Integrator => {
                let raw = (value as Word).min(limits::INTEGRATOR_MAX);
                self.set_and_program(ChannelVar::Integrator, raw)
            }
            ChannelParam::FastTrigBackLen => {
                let min = match self.config().adc_msps {
                    100 | 500 => 1,
                    _ => 2,
                };
                let raw = (value * self.fpga_clk()).round() as Word;
                self.set_and_program(
                    ChannelVar::FastTrigBackLen,
                    raw.clamp(min, limits::FASTTRIGBACKLEN_MAX),
                )
            }
            ChannelParam::CfdDelay => {
                let raw = (value * self.fpga_clk()).round() as Word;
                self.set_and_program(
                    ChannelVar::CFDDelay,
                    raw.clamp(limits::CFDDELAY_MIN, limits::CFDDELAY_MAX),
                )
            }
            ChannelParam::CfdScale => {
                let raw = (value as Word).min(limits::CFDSCALE_MAX);
                self.set_and_program(ChannelVar::CFDScale, raw)
            }
            ChannelParam::CfdThresh => {
                let raw = value as Word;
                if !(limits::CFDTHRESH_MIN..=limits::CFDTHRESH_MAX).contains(&raw) {
                    return Err(self.error(
                        ErrorCode::InvalidValue,
                        format!("out of range CFDThresh: {raw}"),
                    ));
                }
                self.set_and_program(ChannelVar::CFDThresh, raw)
            }
            ChannelParam::QdcLen0
            | ChannelParam::QdcLen1
            | ChannelParam::QdcLen2
            | ChannelParam::QdcLen3
            | ChannelParam::QdcLen4
            | ChannelParam::QdcLen5
            | ChannelParam::QdcLen6
            | ChannelParam::QdcLen7 => {
                let raw = (value * self.qdc_divider()).round() as Word;
                self.set_and_program(
                    qdc_var(par),
                    raw.clamp(limits::QDCLEN_MIN, limits::QDCLEN_MAX),
                )
            }
            ChannelParam::ExtTrigStretch => self.stretch(ChannelVar::ExtTrigStretch, value),
            ChannelParam::VetoStretch => self.stretch(ChannelVar::VetoStretch, value),
            ChannelParam::ChanTrigStretch => self.stretch(ChannelVar::ChanTrigStretch, value),
            ChannelParam::ExternDelayLen => {
                let max = self.delay_max(par)?;
                let raw = (value * self.fpga_clk()).round() as Word;
                self.set_and_program(ChannelVar::ExternDelayLen, raw.min(max))
            }
            ChannelParam::FtrigoutDelay => {
                let max = self.delay_max(par)?;
                let raw = (value * self.fpga_clk()).round() as Word;
                self.set_and_program(ChannelVar::FtrigoutDelay, raw.min(max))
            }
            ChannelParam::MultiplicityMaskL => {
                self.set_and_program(ChannelVar::MultiplicityMaskL, value as Word)
            }
            ChannelParam::MultiplicityMaskH => {
                self.set_and_program(ChannelVar::MultiplicityMaskH, value as Word)
            }
        }
    }

    /// Read a parameter by name.
    pub fn read_by_name(&mut self, name: &str) -> Result<f64> {
        let par = lookup_channel_param(name)?;
        self.read(par)
    }

    /// Write a parameter by name.
    pub fn write_by_name(&mut self, name: &str, value: f64) -> Result<()> {
        let par = lookup_channel_param(name)?;
        self.write(par, value)
    }

    // ─── Conversions ────────────────────────────────────────────────

    fn set_and_program(&mut self, var: ChannelVar, raw: Word) -> Result<()> {
        self.set(var, raw)?;
        self.module.program_fippi()
    }

    fn stretch(&mut self, var: ChannelVar, value: f64) -> Result<()> {
        let raw = (value * self.fpga_clk()).round() as Word;
        self.set_and_program(var, raw.clamp(limits::STRETCH_MIN, limits::STRETCH_MAX))
    }

    fn trigger_risetime(&mut self, value: f64) -> Result<()> {
        let ffr = self.ffr()?;
        let mut gap = self.cached(ChannelVar::FastGap)?;
        let mut length = self.filter_clocks(value, ffr, limits::FASTFILTER_MAX_LEN);
        if length.saturating_add(gap) > limits::FASTFILTER_MAX_LEN {
            length = limits::FASTFILTER_MAX_LEN.saturating_sub(gap);
        }
        if length < limits::FASTLENGTH_MIN_LEN {
            length = limits::FASTLENGTH_MIN_LEN;
            if length.saturating_add(gap) > limits::FASTFILTER_MAX_LEN {
                gap = limits::FASTFILTER_MAX_LEN - limits::FASTLENGTH_MIN_LEN;
            }
        }
        self.set(ChannelVar::FastLength, length)?;
        self.set(ChannelVar::FastGap, gap)?;
        self.module.program_fippi()
    }

    fn trigger_flattop(&mut self, value: f64) -> Result<()> {
        let ffr = self.ffr()?;
        let length = self.cached(ChannelVar::FastLength)?;
        let mut gap = self.filter_clocks(value, ffr, limits::FASTFILTER_MAX_LEN);
        if length.saturating_add(gap) > limits::FASTFILTER_MAX_LEN {
            gap = limits::FASTFILTER_MAX_LEN.saturating_sub(length);
        }
        self.set_and_program(ChannelVar::FastGap, gap)
    }

    fn trigger_threshold(&mut self, value: f64) -> Result<()> {
        let length = f64::from(self.cached(ChannelVar::FastLength)?);
        let div = f64::from(self.config().adc_clk_div);
        let mut thresh = (value * length * div) as Word;
        if thresh >= limits::FAST_THRESHOLD_MAX {
            let raw = f64::from(thresh);
            let rescaled = f64::from(limits::FAST_THRESHOLD_MAX) / (raw - 0.5) * raw;
            thresh = rescaled as Word;
        }
        self.set_and_program(ChannelVar::FastThresh, thresh)
    }

    fn energy_filter(&mut self, par: ChannelParam, value: f64) -> Result<()> {
        let sfr = self.sfr()?;
        let trace_delay = self.trace_delay_clocks()?;
        let clocks = self.filter_clocks(value, sfr, limits::SLOWFILTER_MAX_LEN);

        let (length, gap) = if par == ChannelParam::EnergyRisetime {
            let mut gap = self.cached(ChannelVar::SlowGap)?;
            let mut length = clocks;
            if length.saturating_add(gap) > limits::SLOWFILTER_MAX_LEN {
                length = limits::SLOWFILTER_MAX_LEN.saturating_sub(gap);
            }
            if length < limits::SLOWLENGTH_MIN_LEN {
                length = limits::SLOWLENGTH_MIN_LEN;
                if length.saturating_add(gap) > limits::SLOWFILTER_MAX_LEN {
                    gap = limits::SLOWFILTER_MAX_LEN - limits::SLOWLENGTH_MIN_LEN;
                }
            }
            (length, gap)
        } else {
            let mut length = self.cached(ChannelVar::SlowLength)?;
            let mut gap = clocks;
            if length.saturating_add(gap) > limits::SLOWFILTER_MAX_LEN {
                gap = limits::SLOWFILTER_MAX_LEN.saturating_sub(length);
            }
            if gap < limits::SLOWGAP_MIN_LEN {
                gap = limits::SLOWGAP_MIN_LEN;
                if length.saturating_add(gap) > limits::SLOWFILTER_MAX_LEN {
                    length = limits::SLOWFILTER_MAX_LEN - limits::SLOWGAP_MIN_LEN;
                }
            }
            (length, gap)
        };

        self.set(ChannelVar::SlowLength, length)?;
        self.set(ChannelVar::SlowGap, gap)?;
        let peak_sep = length.saturating_add(gap);
        self.set(ChannelVar::PeakSample, peak_sample(peak_sep, sfr))?;
        self.set(ChannelVar::PeakSep, peak_sep)?;
        self.update_fifo(trace_delay)?;
        self.module.program_fippi()
    }

    fn trace_length(&mut self, value: f64) -> Result<()> {
        let ffr = f64::from(self.ffr()?);
        let fifo_length = self.module.read_var(ModuleVar::FIFOLength, 0, false)?;
        let mut length = (value * self.adc_msps() / ffr) as Word;
        length = match self.config().adc_msps {
            500 => length / 10 * 10,
            100 | 250 => length / 2 * 2,
            _ => length,
        };
        self.set_and_program(ChannelVar::TraceLength, length.min(fifo_length))
    }

    fn trace_delay(&mut self, value: f64) -> Result<()> {
        let ffr = f64::from(self.ffr()?);
        let trace_length = self.cached(ChannelVar::TraceLength)?;
        let mut delay = (value * self.fpga_clk() / ffr) as Word;
        if delay > trace_length {
            delay = trace_length / 2;
        }
        delay = delay.min(limits::TRACEDELAY_MAX);
        self.update_fifo(delay)?;
        self.module.program_fippi()
    }

    fn xdt(&mut self, value: f64) -> Result<()> {
        let current = self.cached(ChannelVar::Xwait)?;
        let multiple: Word = match self.config().adc_msps {
            100 | 500 => 6,
            _ => 8,
        };
        let mut xwait = (value * DSP_CLOCK_MHZ).round() as Word;
        if xwait < multiple {
            xwait = multiple;
        }
        xwait = if xwait > current {
            xwait
                .checked_next_multiple_of(multiple)
                .unwrap_or(xwait / multiple * multiple)
        } else {
            xwait / multiple * multiple
        };
        self.set(ChannelVar::Xwait, xwait)
    }

    fn csra(&mut self, value: Word) -> Result<()> {
        let current = self.cached(ChannelVar::ChanCSRa)?;
        self.set(ChannelVar::ChanCSRa, value)?;
        self.module.program_fippi()?;
        self.module.set_dacs()?;
        let relay = 1 << csra::ENARELAY;
        if value & relay != current & relay {
            self.find_cut()?;
        }
        Ok(())
    }
}

fn qdc_var(par: ChannelParam) -> ChannelVar {
    const QDC: [ChannelVar; 8] = [
        ChannelVar::QDCLen0,
        ChannelVar::QDCLen1,
        ChannelVar::QDCLen2,
        ChannelVar::QDCLen3,
        ChannelVar::QDCLen4,
        ChannelVar::QDCLen5,
        ChannelVar::QDCLen6,
        ChannelVar::QDCLen7,
    ];
    QDC[par.qdc_index().unwrap_or(0)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::test_support::{booted, booted_with};
    use pixie_common::param::ModuleParam;
    use tempfile::TempDir;

    fn raw(module: &mut Module, var: ChannelVar, channel: usize) -> Word {
        module.read_channel_var(var, channel, 0, true).unwrap()
    }

    #[test]
    fn tau_is_truncated_single_precision() {
        assert_eq!(ieee_float_truncated(0.2), 1045220556);
        assert_eq!(ieee_float_truncated(0.5), 0.5f32.to_bits());
        assert_eq!(ieee_float_truncated(0.0), 0);

        let dir = TempDir::new().unwrap();
        let mut module = booted(&dir);
        module.channel(0).unwrap().write(ChannelParam::Tau, 0.2).unwrap();
        assert_eq!(raw(&mut module, ChannelVar::PreampTau, 0), 1045220556);
        let tau = module.channel(0).unwrap().read(ChannelParam::Tau).unwrap();
        assert!((tau - 0.2).abs() < 0.001);
        // The write found a baseline cut.
        assert!(raw(&mut module, ChannelVar::BLcut, 0) > 0);
    }

    #[test]
    fn peak_sample_lookup() {
        assert_eq!(peak_sample(45, 2), 42);
        assert_eq!(peak_sample(45, 4), 43);
        assert_eq!(peak_sample(45, 32), 45);
        assert_eq!(peak_sample(45, 64), 44);
        assert_eq!(peak_sample(45, 128), 43);
        assert_eq!(peak_sample(1, 2), 0);
    }

    #[test]
    fn trigger_risetime_clamps_with_gap() {
        let dir = TempDir::new().unwrap();
        let mut module = booted(&dir);
        let mut chan = module.channel(1).unwrap();
        // 250 MSPS with a divide of 2 is a 125 MHz filter clock.
        chan.write(ChannelParam::TriggerRisetime, 0.1).unwrap();
        assert!((chan.read(ChannelParam::TriggerRisetime).unwrap() - 0.104).abs() < 1e-9);
        chan.write(ChannelParam::TriggerRisetime, 10.0).unwrap();
        // Gap is 10 after boot.
        assert_eq!(raw(&mut module, ChannelVar::FastLength, 1), 117);
        let mut chan = module.channel(1).unwrap();
        chan.write(ChannelParam::TriggerFlattop, 10.0).unwrap();
        assert_eq!(raw(&mut module, ChannelVar::FastGap, 1), 10);
        let mut chan = module.channel(1).unwrap();
        chan.write(ChannelParam::TriggerRisetime, 0.0).unwrap();
        assert_eq!(raw(&mut module, ChannelVar::FastLength, 1), 2);
    }

    #[test]
    fn threshold_rescaled_at_field_limit() {
        let dir = TempDir::new().unwrap();
        let mut module = booted(&dir);
        let mut chan = module.channel(2).unwrap();
        chan.write(ChannelParam::TriggerThreshold, 100.0).unwrap();
        // FastLength 10, divide 2.
        assert_eq!(raw(&mut module, ChannelVar::FastThresh, 2), 2000);
        let mut chan = module.channel(2).unwrap();
        chan.write(ChannelParam::TriggerThreshold, 5000.0).unwrap();
        let thresh = raw(&mut module, ChannelVar::FastThresh, 2);
        assert!(thresh <= limits::FAST_THRESHOLD_MAX);
        let value = module
            .channel(2)
            .unwrap()
            .read(ChannelParam::TriggerThreshold)
            .unwrap();
        assert_eq!(value, f64::from(thresh) / 20.0);
    }

    #[test]
    fn energy_filter_updates_peak_and_fifo() {
        let dir = TempDir::new().unwrap();
        let mut module = booted(&dir);
        let mut chan = module.channel(0).unwrap();
        // SlowFilterRange 2 gives sfr 4: 1.0 µs is 125/4 = 31.25 -> 31.
        chan.write(ChannelParam::EnergyRisetime, 1.0).unwrap();
        assert_eq!(raw(&mut module, ChannelVar::SlowLength, 0), 31);
        assert_eq!(raw(&mut module, ChannelVar::SlowGap, 0), 15);
        assert_eq!(raw(&mut module, ChannelVar::PeakSep, 0), 46);
        assert_eq!(raw(&mut module, ChannelVar::PeakSample, 0), 44);
        assert_eq!(raw(&mut module, ChannelVar::TriggerDelay, 0), 45 * 4);
        // Trace delay after boot is PAFlength 300 - TriggerDelay 176.
        assert_eq!(raw(&mut module, ChannelVar::PAFlength, 0), 180 + 124);

        let mut chan = module.channel(0).unwrap();
        chan.write(ChannelParam::EnergyFlattop, 0.0).unwrap();
        assert_eq!(raw(&mut module, ChannelVar::SlowGap, 0), limits::SLOWGAP_MIN_LEN);
        let mut chan = module.channel(0).unwrap();
        chan.write(ChannelParam::EnergyRisetime, 100.0).unwrap();
        assert_eq!(
            raw(&mut module, ChannelVar::SlowLength, 0),
            limits::SLOWFILTER_MAX_LEN - limits::SLOWGAP_MIN_LEN
        );
    }

    #[test]
    fn trace_delay_limited_by_trace_length() {
        let dir = TempDir::new().unwrap();
        let mut module = booted(&dir);
        let mut chan = module.channel(3).unwrap();
        // 10 µs is 1250 clocks, over the 500 word trace.
        chan.write(ChannelParam::TraceDelay, 10.0).unwrap();
        let trigger_delay = raw(&mut module, ChannelVar::TriggerDelay, 3);
        let paf_length = raw(&mut module, ChannelVar::PAFlength, 3);
        assert_eq!(paf_length - trigger_delay, 250);
        let delay = module.channel(3).unwrap().read(ChannelParam::TraceDelay).unwrap();
        assert!((delay - 2.0).abs() < 1e-9);
    }

    #[test]
    fn trace_length_multiple_and_fifo_cap() {
        let dir = TempDir::new().unwrap();
        let mut module = booted(&dir);
        let mut chan = module.channel(0).unwrap();
        chan.write(ChannelParam::TraceLength, 0.253).unwrap();
        // 0.253 * 250 = 63.25 -> 62.
        assert_eq!(raw(&mut module, ChannelVar::TraceLength, 0), 62);
        let mut chan = module.channel(0).unwrap();
        chan.write(ChannelParam::TraceLength, 1000.0).unwrap();
        assert_eq!(raw(&mut module, ChannelVar::TraceLength, 0), 8188);
    }

    #[test]
    fn negated_counts_and_zero() {
        let dir = TempDir::new().unwrap();
        let mut module = booted(&dir);
        let mut chan = module.channel(4).unwrap();
        chan.write(ChannelParam::BaselineAverage, 5.0).unwrap();
        assert_eq!(chan.read(ChannelParam::BaselineAverage).unwrap(), 5.0);
        chan.write(ChannelParam::BaselineAverage, 40.0).unwrap();
        assert_eq!(raw(&mut module, ChannelVar::Log2Bweight, 4), negate(16));
        let mut chan = module.channel(4).unwrap();
        chan.write(ChannelParam::BaselineAverage, -3.0).unwrap();
        assert_eq!(raw(&mut module, ChannelVar::Log2Bweight, 4), 0);
        let mut chan = module.channel(4).unwrap();
        assert_eq!(chan.read(ChannelParam::BaselineAverage).unwrap(), 0.0);
        chan.write(ChannelParam::BinFactor, 9.0).unwrap();
        assert_eq!(chan.read(ChannelParam::BinFactor).unwrap(), 6.0);
        chan.write(ChannelParam::BinFactor, 0.0).unwrap();
        assert_eq!(chan.read(ChannelParam::BinFactor).unwrap(), 1.0);
    }

    #[test]
    fn xdt_rounds_with_write_direction() {
        let dir = TempDir::new().unwrap();
        let mut module = booted(&dir);
        let mut chan = module.channel(0).unwrap();
        // 250 MSPS: multiples of 8, Xwait starts at 0.
        chan.write(ChannelParam::Xdt, 0.5).unwrap();
        assert_eq!(chan.read(ChannelParam::Xdt).unwrap(), 0.56);
        chan.write(ChannelParam::Xdt, 0.5).unwrap();
        assert_eq!(chan.read(ChannelParam::Xdt).unwrap(), 0.48);
        chan.write(ChannelParam::Xdt, 0.01).unwrap();
        assert_eq!(chan.read(ChannelParam::Xdt).unwrap(), 0.08);
    }

    #[test]
    fn huge_filter_times_clamp_to_field_limits() {
        let dir = TempDir::new().unwrap();
        let mut module = booted(&dir);
        let fast_gap = raw(&mut module, ChannelVar::FastGap, 0);
        module
            .channel(0)
            .unwrap()
            .write(ChannelParam::TriggerRisetime, 1e10)
            .unwrap();
        assert_eq!(
            raw(&mut module, ChannelVar::FastLength, 0),
            limits::FASTFILTER_MAX_LEN - fast_gap
        );

        let fast_length = raw(&mut module, ChannelVar::FastLength, 1);
        module
            .channel(1)
            .unwrap()
            .write(ChannelParam::TriggerFlattop, 1e10)
            .unwrap();
        assert_eq!(
            raw(&mut module, ChannelVar::FastGap, 1),
            limits::FASTFILTER_MAX_LEN - fast_length
        );

        let slow_gap = raw(&mut module, ChannelVar::SlowGap, 2);
        module
            .channel(2)
            .unwrap()
            .write(ChannelParam::EnergyRisetime, 1e10)
            .unwrap();
        assert_eq!(
            raw(&mut module, ChannelVar::SlowLength, 2),
            limits::SLOWFILTER_MAX_LEN - slow_gap
        );
        assert_eq!(raw(&mut module, ChannelVar::PeakSep, 2), limits::SLOWFILTER_MAX_LEN);

        let slow_length = raw(&mut module, ChannelVar::SlowLength, 3);
        module
            .channel(3)
            .unwrap()
            .write(ChannelParam::EnergyFlattop, 1e10)
            .unwrap();
        assert_eq!(
            raw(&mut module, ChannelVar::SlowGap, 3),
            limits::SLOWFILTER_MAX_LEN - slow_length
        );

        module.channel(4).unwrap().write(ChannelParam::Xdt, 1e12).unwrap();
        let xwait = raw(&mut module, ChannelVar::Xwait, 4);
        assert!(xwait > 0);
        assert_eq!(xwait % 8, 0);
    }

    #[test]
    fn full_scale_filter_fields_read_back() {
        let dir = TempDir::new().unwrap();
        let mut module = booted(&dir);
        module
            .write_channel_var(ChannelVar::FastLength, Word::MAX, 0, 0, true)
            .unwrap();
        module
            .write_channel_var(ChannelVar::SlowGap, Word::MAX, 0, 0, true)
            .unwrap();
        let mut chan = module.channel(0).unwrap();
        // Fast range 1, slow range 4 at 125 MHz.
        let risetime = chan.read(ChannelParam::TriggerRisetime).unwrap();
        assert!((risetime - f64::from(Word::MAX) / 125.0).abs() < 1e-6);
        let flattop = chan.read(ChannelParam::EnergyFlattop).unwrap();
        assert!((flattop - f64::from(Word::MAX) * 4.0 / 125.0).abs() < 1e-6);
    }

    #[test]
    fn voffset_and_percent_clamped() {
        let dir = TempDir::new().unwrap();
        let mut module = booted(&dir);
        let mut chan = module.channel(5).unwrap();
        chan.write(ChannelParam::Voffset, 0.0).unwrap();
        assert_eq!(chan.read(ChannelParam::Voffset).unwrap(), 0.0);
        chan.write(ChannelParam::Voffset, 3.0).unwrap();
        assert_eq!(raw(&mut module, ChannelVar::OffsetDAC, 5), 65535);
        let mut chan = module.channel(5).unwrap();
        chan.write(ChannelParam::BaselinePercent, 150.0).unwrap();
        assert_eq!(chan.read(ChannelParam::BaselinePercent).unwrap(), 99.0);
        chan.write(ChannelParam::BaselinePercent, 0.0).unwrap();
        assert_eq!(chan.read(ChannelParam::BaselinePercent).unwrap(), 1.0);
    }

    #[test]
    fn cfd_parameters_use_their_own_variables() {
        let dir = TempDir::new().unwrap();
        let mut module = booted(&dir);
        let mut chan = module.channel(6).unwrap();
        chan.write(ChannelParam::CfdDelay, 0.08).unwrap();
        chan.write(ChannelParam::CfdScale, 12.0).unwrap();
        assert_eq!(raw(&mut module, ChannelVar::CFDDelay, 6), 10);
        assert_eq!(raw(&mut module, ChannelVar::CFDScale, 6), 7);
        let mut chan = module.channel(6).unwrap();
        let err = chan.write(ChannelParam::CfdThresh, 0.0).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidValue);
        chan.write(ChannelParam::CfdThresh, 300.0).unwrap();
        assert_eq!(chan.read(ChannelParam::CfdThresh).unwrap(), 300.0);
    }

    #[test]
    fn qdc_divider_at_500_msps() {
        let dir = TempDir::new().unwrap();
        let mut module = booted_with(&dir, revision::REV_F, 500, 5);
        let mut chan = module.channel(0).unwrap();
        chan.write(ChannelParam::QdcLen3, 1.0).unwrap();
        assert_eq!(raw(&mut module, ChannelVar::QDCLen3, 0), 100);
        let mut chan = module.channel(0).unwrap();
        chan.write(ChannelParam::QdcLen3, 1000.0).unwrap();
        assert_eq!(raw(&mut module, ChannelVar::QDCLen3, 0), limits::QDCLEN_MAX);
        let mut chan = module.channel(0).unwrap();
        chan.write(ChannelParam::FastTrigBackLen, 0.0).unwrap();
        assert_eq!(chan.read(ChannelParam::FastTrigBackLen).unwrap(), 0.01);
    }

    #[test]
    fn delay_lengths_depend_on_revision() {
        let dir = TempDir::new().unwrap();
        let mut module = booted(&dir);
        let mut chan = module.channel(0).unwrap();
        chan.write(ChannelParam::ExternDelayLen, 100.0).unwrap();
        assert_eq!(raw(&mut module, ChannelVar::ExternDelayLen, 0), 511);

        let dir = TempDir::new().unwrap();
        let mut module = booted_with(&dir, revision::REV_E, 250, 2);
        let err = module
            .channel(0)
            .unwrap()
            .write(ChannelParam::FtrigoutDelay, 1.0)
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::NotSupported);
    }

    #[test]
    fn stretches_clamped() {
        let dir = TempDir::new().unwrap();
        let mut module = booted(&dir);
        let mut chan = module.channel(7).unwrap();
        chan.write(ChannelParam::VetoStretch, 0.0).unwrap();
        chan.write(ChannelParam::ExtTrigStretch, 1000.0).unwrap();
        assert_eq!(raw(&mut module, ChannelVar::VetoStretch, 7), limits::STRETCH_MIN);
        assert_eq!(raw(&mut module, ChannelVar::ExtTrigStretch, 7), limits::STRETCH_MAX);
    }

    #[test]
    fn slow_filter_range_keeps_trace_delay() {
        let dir = TempDir::new().unwrap();
        let mut module = booted(&dir);
        module.write_param(ModuleParam::SlowFilterRange, 3).unwrap();
        let trigger_delay = raw(&mut module, ChannelVar::TriggerDelay, 0);
        let paf_length = raw(&mut module, ChannelVar::PAFlength, 0);
        // PeakSep 45 at sfr 8.
        assert_eq!(trigger_delay, 44 * 8);
        assert_eq!(paf_length - trigger_delay, 124);
    }

    #[test]
    fn names_resolve() {
        let dir = TempDir::new().unwrap();
        let mut module = booted(&dir);
        let mut chan = module.channel(0).unwrap();
        chan.write_by_name("EMIN", 12.0).unwrap();
        assert_eq!(chan.read_by_name("EMIN").unwrap(), 12.0);
        let err = chan.read_by_name("NOPE").unwrap_err();
        assert_eq!(err.code, ErrorCode::UnknownParameter);
    }
}
