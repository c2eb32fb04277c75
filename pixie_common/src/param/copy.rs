//! Channel parameter copy filters.
//!
//! A filter is a fixed set of channel variables, each with a bit mask. The
//! [`CopyMask`] selects which filters a copy applies.

use super::ChannelVar;
use crate::consts::{Word, csra};
use bitflags::bitflags;

bitflags! {
    /// Filter group selection for a parameter copy.
    ///
    /// `ENERGY` and `TRIGGER` share bit 0.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct CopyMask: u32 {
        /// Energy filter.
        const ENERGY                = 1 << 0;
        /// Trigger filter.
        const TRIGGER               = 1 << 0;
        /// Analog signal conditioning.
        const ANALOG_SIGNAL_COND    = 1 << 1;
        /// Histogram control.
        const HISTOGRAM_CONTROL     = 1 << 2;
        /// Decay time.
        const DECAY_TIME            = 1 << 3;
        /// Pulse shape analysis.
        const PULSE_SHAPE_ANALYSIS  = 1 << 4;
        /// Baseline control.
        const BASELINE_CONTROL      = 1 << 5;
        /// Channel CSRA.
        const CHANNEL_CSRA          = 1 << 7;
        /// CFD trigger.
        const CFD_TRIGGER           = 1 << 8;
        /// Trigger stretch lengths.
        const TRIGGER_STRETCH_LEN   = 1 << 9;
        /// FIFO delays.
        const FIFO_DELAYS           = 1 << 10;
        /// Multiplicity.
        const MULTIPLICITY          = 1 << 11;
        /// QDC.
        const QDC                   = 1 << 12;
    }
}

/// One variable in a copy filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CopyFilterVar {
    /// Variable to copy.
    pub var: ChannelVar,
    /// Bits of the variable to copy.
    pub mask: Word,
}

impl CopyFilterVar {
    const fn all(var: ChannelVar) -> Self {
        Self { var, mask: Word::MAX }
    }

    const fn bits(var: ChannelVar, mask: Word) -> Self {
        Self { var, mask }
    }

    /// Merge the masked source bits into the destination.
    #[inline]
    pub const fn apply(&self, source: Word, dest: Word) -> Word {
        (dest & !self.mask) | (source & self.mask)
    }
}

use ChannelVar as CV;

const ENERGY: &[CopyFilterVar] = &[
    CopyFilterVar::all(CV::SlowLength),
    CopyFilterVar::all(CV::SlowGap),
    CopyFilterVar::all(CV::PeakSep),
    CopyFilterVar::all(CV::PeakSample),
    CopyFilterVar::all(CV::TriggerDelay),
    CopyFilterVar::all(CV::PAFlength),
    CopyFilterVar::all(CV::BLcut),
];

const TRIGGER: &[CopyFilterVar] = &[
    CopyFilterVar::all(CV::FastLength),
    CopyFilterVar::all(CV::FastGap),
    CopyFilterVar::all(CV::FastThresh),
];

const ANALOG_SIGNAL_COND: &[CopyFilterVar] = &[
    CopyFilterVar::bits(CV::ChanCSRa, (1 << csra::POLARITY) | (1 << csra::ENARELAY)),
    CopyFilterVar::all(CV::OffsetDAC),
];

const HISTOGRAM_CONTROL: &[CopyFilterVar] = &[
    CopyFilterVar::all(CV::EnergyLow),
    CopyFilterVar::all(CV::Log2Ebin),
];

const DECAY_TIME: &[CopyFilterVar] = &[CopyFilterVar::all(CV::PreampTau)];

const PULSE_SHAPE_ANALYSIS: &[CopyFilterVar] = &[
    CopyFilterVar::all(CV::TraceLength),
    CopyFilterVar::all(CV::TriggerDelay),
    CopyFilterVar::all(CV::PAFlength),
];

const BASELINE_CONTROL: &[CopyFilterVar] = &[
    CopyFilterVar::all(CV::BLcut),
    CopyFilterVar::all(CV::BaselinePercent),
    CopyFilterVar::all(CV::Log2Bweight),
];

const CHANNEL_CSRA: &[CopyFilterVar] = &[CopyFilterVar::all(CV::ChanCSRa)];

const CFD_TRIGGER: &[CopyFilterVar] = &[
    CopyFilterVar::all(CV::CFDDelay),
    CopyFilterVar::all(CV::CFDScale),
    CopyFilterVar::all(CV::CFDThresh),
];

const TRIGGER_STRETCH_LEN: &[CopyFilterVar] = &[
    CopyFilterVar::all(CV::ExtTrigStretch),
    CopyFilterVar::all(CV::ChanTrigStretch),
    CopyFilterVar::all(CV::VetoStretch),
    CopyFilterVar::all(CV::FastTrigBackLen),
];

const FIFO_DELAYS: &[CopyFilterVar] = &[
    CopyFilterVar::all(CV::ExternDelayLen),
    CopyFilterVar::all(CV::FtrigoutDelay),
];

const MULTIPLICITY: &[CopyFilterVar] = &[
    CopyFilterVar::all(CV::MultiplicityMaskL),
    CopyFilterVar::all(CV::MultiplicityMaskH),
];

const QDC: &[CopyFilterVar] = &[
    CopyFilterVar::all(CV::QDCLen0),
    CopyFilterVar::all(CV::QDCLen1),
    CopyFilterVar::all(CV::QDCLen2),
    CopyFilterVar::all(CV::QDCLen3),
    CopyFilterVar::all(CV::QDCLen4),
    CopyFilterVar::all(CV::QDCLen5),
    CopyFilterVar::all(CV::QDCLen6),
    CopyFilterVar::all(CV::QDCLen7),
];

/// Filter groups in the order a copy applies them.
const FILTERS: &[(CopyMask, &[CopyFilterVar])] = &[
    (CopyMask::ENERGY, ENERGY),
    (CopyMask::TRIGGER, TRIGGER),
    (CopyMask::ANALOG_SIGNAL_COND, ANALOG_SIGNAL_COND),
    (CopyMask::HISTOGRAM_CONTROL, HISTOGRAM_CONTROL),
    (CopyMask::DECAY_TIME, DECAY_TIME),
    (CopyMask::PULSE_SHAPE_ANALYSIS, PULSE_SHAPE_ANALYSIS),
    (CopyMask::BASELINE_CONTROL, BASELINE_CONTROL),
    (CopyMask::CHANNEL_CSRA, CHANNEL_CSRA),
    (CopyMask::CFD_TRIGGER, CFD_TRIGGER),
    (CopyMask::TRIGGER_STRETCH_LEN, TRIGGER_STRETCH_LEN),
    (CopyMask::FIFO_DELAYS, FIFO_DELAYS),
    (CopyMask::MULTIPLICITY, MULTIPLICITY),
    (CopyMask::QDC, QDC),
];

/// Iterate the filter variables a mask selects, in application order.
///
/// Variables shared by two selected groups are visited once per group.
pub fn selected(mask: CopyMask) -> impl Iterator<Item = &'static CopyFilterVar> {
    FILTERS
        .iter()
        .filter(move |(group, _)| mask.intersects(*group))
        .flat_map(|(_, vars)| vars.iter())
}

/// Copy the selected variables from `source` into `dest`.
///
/// Both slices are indexed by [`ChannelVar`] ordinal.
pub fn copy_channel_values(mask: CopyMask, source: &[Word], dest: &mut [Word]) {
    for f in selected(mask) {
        let i = f.var.index();
        if let (Some(src), Some(dst)) = (source.get(i), dest.get_mut(i)) {
            *dst = f.apply(*src, *dst);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn energy_bit_selects_trigger_too() {
        let vars: Vec<_> = selected(CopyMask::ENERGY).map(|f| f.var).collect();
        assert!(vars.contains(&CV::SlowLength));
        assert!(vars.contains(&CV::FastThresh));
        assert!(!vars.contains(&CV::PreampTau));
    }

    #[test]
    fn csra_copy_respects_bit_mask() {
        let mut source = vec![0; ChannelVar::COUNT];
        let mut dest = vec![0; ChannelVar::COUNT];
        source[CV::ChanCSRa.index()] = 0xffff;
        dest[CV::ChanCSRa.index()] = 0x0001;
        copy_channel_values(CopyMask::ANALOG_SIGNAL_COND, &source, &mut dest);
        assert_eq!(dest[CV::ChanCSRa.index()], 0x0001 | (1 << 5) | (1 << 14));

        copy_channel_values(CopyMask::CHANNEL_CSRA, &source, &mut dest);
        assert_eq!(dest[CV::ChanCSRa.index()], 0xffff);
    }

    #[test]
    fn empty_mask_copies_nothing() {
        let source = vec![7; ChannelVar::COUNT];
        let mut dest = vec![0; ChannelVar::COUNT];
        copy_channel_values(CopyMask::empty(), &source, &mut dest);
        assert!(dest.iter().all(|&v| v == 0));
    }
}
