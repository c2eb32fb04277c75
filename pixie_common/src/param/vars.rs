//! DSP variable enums and their compiled-in default descriptor tables.
//!
//! Enum ordinals follow the DSP variable file order. The descriptor table
//! index of every variable equals its ordinal; [`Descriptors::check`] verifies
//! this after a variable file is loaded.
//!
//! [`Descriptors::check`]: super::Descriptors::check

use super::{Mode, State, VarDescriptor};
use static_assertions::const_assert_eq;

/// Define a catalog enum with its ordinal table and DSP names.
macro_rules! catalog_enum {
    (
        $(#[$meta:meta])*
        $name:ident { $($var:ident => $label:literal),* $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[allow(missing_docs)]
        pub enum $name {
            $($var),*
        }

        impl $name {
            /// Every entry in ordinal order.
            pub const ALL: &'static [$name] = &[$($name::$var),*];

            /// Number of entries.
            pub const COUNT: usize = Self::ALL.len();

            /// Catalog name.
            pub const fn name(self) -> &'static str {
                match self {
                    $($name::$var => $label),*
                }
            }

            /// Ordinal, which is also the descriptor table index.
            pub const fn index(self) -> usize {
                self as usize
            }

            /// Look an entry up by its catalog name.
            pub fn from_name(name: &str) -> Option<Self> {
                Self::ALL.iter().copied().find(|v| v.name() == name)
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.name())
            }
        }
    };
}

pub(crate) use catalog_enum;

catalog_enum! {
    /// Module scope DSP variables.
    ModuleVar {
        ModNum => "ModNum",
        ModCSRA => "ModCSRA",
        ModCSRB => "ModCSRB",
        ModFormat => "ModFormat",
        RunTask => "RunTask",
        ControlTask => "ControlTask",
        MaxEvents => "MaxEvents",
        CoincPattern => "CoincPattern",
        CoincWait => "CoincWait",
        SynchWait => "SynchWait",
        InSynch => "InSynch",
        Resume => "Resume",
        SlowFilterRange => "SlowFilterRange",
        FastFilterRange => "FastFilterRange",
        ChanNum => "ChanNum",
        HostIO => "HostIO",
        UserIn => "UserIn",
        FastTrigBackplaneEna => "FastTrigBackplaneEna",
        CrateID => "CrateID",
        SlotID => "SlotID",
        ModID => "ModID",
        TrigConfig => "TrigConfig",
        HostRunTimePreset => "HostRunTimePreset",
        U00 => "U00",
        RealTimeA => "RealTimeA",
        RealTimeB => "RealTimeB",
        RunTimeA => "RunTimeA",
        RunTimeB => "RunTimeB",
        SynchDone => "SynchDone",
        UserOut => "UserOut",
        HardwareID => "HardwareID",
        HardVariant => "HardVariant",
        FIFOLength => "FIFOLength",
        DSPrelease => "DSPrelease",
        DSPbuild => "DSPbuild",
        NumEventsA => "NumEventsA",
        NumEventsB => "NumEventsB",
        BufHeadLen => "BufHeadLen",
        EventHeadLen => "EventHeadLen",
        ChanHeadLen => "ChanHeadLen",
        LOutBuffer => "LOutBuffer",
        FippiID => "FippiID",
        FippiVariant => "FippiVariant",
        DSPVariant => "DSPVariant",
    }
}

catalog_enum! {
    /// Channel scope DSP variables.
    ChannelVar {
        ChanCSRa => "ChanCSRa",
        ChanCSRb => "ChanCSRb",
        GainDAC => "GainDAC",
        OffsetDAC => "OffsetDAC",
        DigGain => "DigGain",
        SlowLength => "SlowLength",
        SlowGap => "SlowGap",
        FastLength => "FastLength",
        FastGap => "FastGap",
        PeakSample => "PeakSample",
        PeakSep => "PeakSep",
        CFDThresh => "CFDThresh",
        FastThresh => "FastThresh",
        ThreshWidth => "ThreshWidth",
        PAFlength => "PAFlength",
        TriggerDelay => "TriggerDelay",
        ResetDelay => "ResetDelay",
        ChanTrigStretch => "ChanTrigStretch",
        TraceLength => "TraceLength",
        Xwait => "Xwait",
        TrigOutLen => "TrigOutLen",
        EnergyLow => "EnergyLow",
        Log2Ebin => "Log2Ebin",
        MultiplicityMaskL => "MultiplicityMaskL",
        MultiplicityMaskH => "MultiplicityMaskH",
        PSAoffset => "PSAoffset",
        PSAlength => "PSAlength",
        Integrator => "Integrator",
        BLcut => "BLcut",
        BaselinePercent => "BaselinePercent",
        FtrigoutDelay => "FtrigoutDelay",
        Log2Bweight => "Log2Bweight",
        PreampTau => "PreampTau",
        FastTrigBackLen => "FastTrigBackLen",
        CFDDelay => "CFDDelay",
        CFDScale => "CFDScale",
        ExtTrigStretch => "ExtTrigStretch",
        VetoStretch => "VetoStretch",
        ExternDelayLen => "ExternDelayLen",
        QDCLen0 => "QDCLen0",
        QDCLen1 => "QDCLen1",
        QDCLen2 => "QDCLen2",
        QDCLen3 => "QDCLen3",
        QDCLen4 => "QDCLen4",
        QDCLen5 => "QDCLen5",
        QDCLen6 => "QDCLen6",
        QDCLen7 => "QDCLen7",
        GSLTtime => "GSLTtime",
        DSPerror => "DSPerror",
        AOutBuffer => "AOutBuffer",
        AECorr => "AECorr",
        LECorr => "LECorr",
        U20 => "U20",
        LiveTimeA => "LiveTimeA",
        LiveTimeB => "LiveTimeB",
        FastPeaksA => "FastPeaksA",
        FastPeaksB => "FastPeaksB",
        OverflowA => "OverflowA",
        OverflowB => "OverflowB",
        InSpecA => "InSpecA",
        InSpecB => "InSpecB",
        UnderflowA => "UnderflowA",
        UnderflowB => "UnderflowB",
        ChanEventsA => "ChanEventsA",
        ChanEventsB => "ChanEventsB",
        AutoTau => "AutoTau",
        U30 => "U30",
    }
}

const_assert_eq!(MODULE_VAR_DEFAULTS.len(), 44);
const_assert_eq!(CHANNEL_VAR_DEFAULTS.len(), 67);

use Mode::{ReadOnly as RO, ReadWrite as RW};
use State::{Disabled as OFF, Enabled as ON};

const fn mv(var: ModuleVar, state: State, mode: Mode, size: usize) -> VarDescriptor<ModuleVar> {
    VarDescriptor::new(var, state, mode, size, var.name())
}

const fn cv(var: ChannelVar, state: State, mode: Mode) -> VarDescriptor<ChannelVar> {
    VarDescriptor::new(var, state, mode, 1, var.name())
}

/// Hardware default module variable descriptors.
pub const MODULE_VAR_DEFAULTS: [VarDescriptor<ModuleVar>; 44] = {
    use ModuleVar::*;
    [
        mv(ModNum, ON, RW, 1),
        mv(ModCSRA, ON, RW, 1),
        mv(ModCSRB, ON, RW, 1),
        mv(ModFormat, OFF, RW, 1),
        mv(RunTask, ON, RW, 1),
        mv(ControlTask, ON, RW, 1),
        mv(MaxEvents, OFF, RW, 1),
        mv(CoincPattern, OFF, RW, 1),
        mv(CoincWait, OFF, RW, 1),
        mv(SynchWait, ON, RW, 1),
        mv(InSynch, ON, RW, 1),
        mv(Resume, ON, RW, 1),
        mv(SlowFilterRange, ON, RW, 1),
        mv(FastFilterRange, ON, RW, 1),
        mv(ChanNum, ON, RW, 1),
        mv(HostIO, ON, RW, 16),
        mv(UserIn, ON, RW, 16),
        mv(FastTrigBackplaneEna, ON, RW, 1),
        mv(CrateID, ON, RW, 1),
        mv(SlotID, ON, RW, 1),
        mv(ModID, ON, RW, 1),
        mv(TrigConfig, ON, RW, 4),
        mv(HostRunTimePreset, ON, RW, 1),
        mv(U00, OFF, RW, 1),
        mv(RealTimeA, ON, RO, 1),
        mv(RealTimeB, ON, RO, 1),
        mv(RunTimeA, ON, RO, 1),
        mv(RunTimeB, ON, RO, 1),
        mv(SynchDone, ON, RO, 1),
        mv(UserOut, ON, RO, 16),
        mv(HardwareID, ON, RO, 1),
        mv(HardVariant, ON, RO, 1),
        mv(FIFOLength, ON, RO, 1),
        mv(DSPrelease, ON, RO, 1),
        mv(DSPbuild, ON, RO, 1),
        mv(NumEventsA, ON, RO, 1),
        mv(NumEventsB, ON, RO, 1),
        mv(BufHeadLen, OFF, RO, 1),
        mv(EventHeadLen, OFF, RO, 1),
        mv(ChanHeadLen, OFF, RO, 1),
        mv(LOutBuffer, OFF, RO, 1),
        mv(FippiID, OFF, RO, 1),
        mv(FippiVariant, OFF, RO, 1),
        mv(DSPVariant, OFF, RO, 1),
    ]
};

/// Hardware default channel variable descriptors.
pub const CHANNEL_VAR_DEFAULTS: [VarDescriptor<ChannelVar>; 67] = {
    use ChannelVar::*;
    [
        cv(ChanCSRa, ON, RW),
        cv(ChanCSRb, ON, RW),
        cv(GainDAC, OFF, RW),
        cv(OffsetDAC, ON, RW),
        cv(DigGain, OFF, RW),
        cv(SlowLength, ON, RW),
        cv(SlowGap, ON, RW),
        cv(FastLength, ON, RW),
        cv(FastGap, ON, RW),
        cv(PeakSample, ON, RW),
        cv(PeakSep, ON, RW),
        cv(CFDThresh, ON, RW),
        cv(FastThresh, ON, RW),
        cv(ThreshWidth, OFF, RW),
        cv(PAFlength, ON, RW),
        cv(TriggerDelay, ON, RW),
        cv(ResetDelay, ON, RW),
        cv(ChanTrigStretch, ON, RW),
        cv(TraceLength, ON, RW),
        cv(Xwait, ON, RW),
        cv(TrigOutLen, OFF, RW),
        cv(EnergyLow, ON, RW),
        cv(Log2Ebin, ON, RW),
        cv(MultiplicityMaskL, ON, RW),
        cv(MultiplicityMaskH, ON, RW),
        cv(PSAoffset, OFF, RW),
        cv(PSAlength, OFF, RW),
        cv(Integrator, ON, RW),
        cv(BLcut, ON, RW),
        cv(BaselinePercent, ON, RW),
        cv(FtrigoutDelay, ON, RW),
        cv(Log2Bweight, ON, RW),
        cv(PreampTau, ON, RW),
        cv(FastTrigBackLen, ON, RW),
        cv(CFDDelay, ON, RW),
        cv(CFDScale, ON, RW),
        cv(ExtTrigStretch, ON, RW),
        cv(VetoStretch, ON, RW),
        cv(ExternDelayLen, ON, RW),
        cv(QDCLen0, ON, RW),
        cv(QDCLen1, ON, RW),
        cv(QDCLen2, ON, RW),
        cv(QDCLen3, ON, RW),
        cv(QDCLen4, ON, RW),
        cv(QDCLen5, ON, RW),
        cv(QDCLen6, ON, RW),
        cv(QDCLen7, ON, RW),
        cv(GSLTtime, ON, RO),
        cv(DSPerror, ON, RO),
        cv(AOutBuffer, ON, RO),
        cv(AECorr, ON, RO),
        cv(LECorr, ON, RO),
        cv(U20, ON, RO),
        cv(LiveTimeA, ON, RO),
        cv(LiveTimeB, ON, RO),
        cv(FastPeaksA, ON, RO),
        cv(FastPeaksB, ON, RO),
        cv(OverflowA, ON, RO),
        cv(OverflowB, ON, RO),
        cv(InSpecA, ON, RO),
        cv(InSpecB, ON, RO),
        cv(UnderflowA, ON, RO),
        cv(UnderflowB, ON, RO),
        cv(ChanEventsA, ON, RO),
        cv(ChanEventsB, ON, RO),
        cv(AutoTau, ON, RO),
        cv(U30, OFF, RO),
    ]
};
