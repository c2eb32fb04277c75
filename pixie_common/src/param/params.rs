//! User facing parameter names.
//!
//! Parameters are the engineering unit view the API exposes. Module
//! parameters alias raw module variables through [`map_module_param`];
//! channel parameters are computed by the channel layer.

use super::vars::{ModuleVar, catalog_enum};

catalog_enum! {
    /// Crate scope parameters.
    SystemParam {
        NumberModules => "NUMBER_MODULES",
        OfflineAnalysis => "OFFLINE_ANALYSIS",
        PxiSlotMap => "PXI_SLOT_MAP",
    }
}

catalog_enum! {
    /// Module scope parameters.
    ModuleParam {
        CrateId => "CrateID",
        FastFilterRange => "FAST_FILTER_RANGE",
        FastTrigBackplaneEna => "FastTrigBackplaneEna",
        HostRtPreset => "HOST_RT_PRESET",
        InSynch => "IN_SYNCH",
        MaxEvents => "MAX_EVENTS",
        ModuleCsra => "MODULE_CSRA",
        ModuleCsrb => "MODULE_CSRB",
        ModuleFormat => "MODULE_FORMAT",
        ModuleId => "ModID",
        ModuleNumber => "MODULE_NUMBER",
        SlotId => "SlotID",
        SlowFilterRange => "SLOW_FILTER_RANGE",
        SynchWait => "SYNCH_WAIT",
        TrigConfig0 => "TrigConfig0",
        TrigConfig1 => "TrigConfig1",
        TrigConfig2 => "TrigConfig2",
        TrigConfig3 => "TrigConfig3",
    }
}

catalog_enum! {
    /// Channel scope parameters.
    ChannelParam {
        BaselineAverage => "BASELINE_AVERAGE",
        BaselinePercent => "BASELINE_PERCENT",
        BinFactor => "BINFACTOR",
        BlCut => "BLCUT",
        CfdDelay => "CFDDelay",
        CfdScale => "CFDScale",
        CfdThresh => "CFDThresh",
        ChannelCsra => "CHANNEL_CSRA",
        ChannelCsrb => "CHANNEL_CSRB",
        ChanTrigStretch => "ChanTrigStretch",
        Emin => "EMIN",
        EnergyFlattop => "ENERGY_FLATTOP",
        EnergyRisetime => "ENERGY_RISETIME",
        ExternDelayLen => "ExternDelayLen",
        ExtTrigStretch => "ExtTrigStretch",
        FastTrigBackLen => "FASTTRIGBACKLEN",
        FtrigoutDelay => "FtrigoutDelay",
        Integrator => "INTEGRATOR",
        MultiplicityMaskL => "MultiplicityMaskL",
        MultiplicityMaskH => "MultiplicityMaskH",
        QdcLen0 => "QDCLen0",
        QdcLen1 => "QDCLen1",
        QdcLen2 => "QDCLen2",
        QdcLen3 => "QDCLen3",
        QdcLen4 => "QDCLen4",
        QdcLen5 => "QDCLen5",
        QdcLen6 => "QDCLen6",
        QdcLen7 => "QDCLen7",
        ResetDelay => "RESET_DELAY",
        Tau => "TAU",
        TraceDelay => "TRACE_DELAY",
        TraceLength => "TRACE_LENGTH",
        TriggerFlattop => "TRIGGER_FLATTOP",
        TriggerRisetime => "TRIGGER_RISETIME",
        TriggerThreshold => "TRIGGER_THRESHOLD",
        VetoStretch => "VetoStretch",
        Voffset => "VOFFSET",
        Xdt => "XDT",
    }
}

const MODULE_PARAM_VARS: [ModuleVar; ModuleParam::COUNT] = [
    ModuleVar::CrateID,
    ModuleVar::FastFilterRange,
    ModuleVar::FastTrigBackplaneEna,
    ModuleVar::HostRunTimePreset,
    ModuleVar::InSynch,
    ModuleVar::MaxEvents,
    ModuleVar::ModCSRA,
    ModuleVar::ModCSRB,
    ModuleVar::ModFormat,
    ModuleVar::ModID,
    ModuleVar::ModNum,
    ModuleVar::SlotID,
    ModuleVar::SlowFilterRange,
    ModuleVar::SynchWait,
    ModuleVar::TrigConfig,
    ModuleVar::TrigConfig,
    ModuleVar::TrigConfig,
    ModuleVar::TrigConfig,
];

/// Module variable that backs a module parameter.
pub fn map_module_param(par: ModuleParam) -> ModuleVar {
    MODULE_PARAM_VARS[par.index()]
}

impl ModuleParam {
    /// Element offset within the backing variable. Non-zero only for the
    /// `TrigConfig` words.
    pub fn var_offset(self) -> usize {
        match self {
            ModuleParam::TrigConfig0
            | ModuleParam::TrigConfig1
            | ModuleParam::TrigConfig2
            | ModuleParam::TrigConfig3 => self.index() - ModuleParam::TrigConfig0.index(),
            _ => 0,
        }
    }
}

impl ChannelParam {
    /// QDC sum index for the `QDCLen*` parameters.
    pub fn qdc_index(self) -> Option<usize> {
        match self {
            ChannelParam::QdcLen0
            | ChannelParam::QdcLen1
            | ChannelParam::QdcLen2
            | ChannelParam::QdcLen3
            | ChannelParam::QdcLen4
            | ChannelParam::QdcLen5
            | ChannelParam::QdcLen6
            | ChannelParam::QdcLen7 => Some(self.index() - ChannelParam::QdcLen0.index()),
            _ => None,
        }
    }
}
