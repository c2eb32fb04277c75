//! Hardware constants shared by every Pixie crate.
//!
//! Values are fixed by the module firmware and the backplane design.

/// Raw DSP word.
pub type Word = u32;

/// DSP memory address.
pub type Address = u32;

/// Maximum number of slots in a crate.
pub const MAX_SLOTS: usize = 15;

/// Maximum number of channels any module variant carries.
pub const MAX_CHANNELS: usize = 32;

/// System (DSP) clock in MHz. Run and real time counters tick at this rate.
pub const SYSTEM_CLOCK_MHZ: f64 = 100.0;

/// Length of the on-board I/O buffer in words.
pub const IO_BUFFER_LENGTH: usize = 65536;

/// Length of one channel's MCA histogram in words.
pub const MAX_HISTOGRAM_LENGTH: usize = 32768;

/// Length of one channel's ADC trace in words.
pub const MAX_ADC_TRACE_LENGTH: usize = 8192;

/// Size of the module's external data FIFO in words.
pub const FIFO_SIZE_WORDS: usize = 131_072;

/// Largest DMA block the bus moves in one transfer, in words.
pub const MAX_DMA_BLOCK_SIZE: usize = 8192;

/// Crate revision with the slot 5 / slot 13 bus quirk.
pub const QUIRK_CRATE_REVISION: u32 = 2;

/// Hardware revisions. The numeric value is what the EEPROM reports.
pub mod revision {
    /// Revision A.
    pub const REV_A: u32 = 10;
    /// Revision B.
    pub const REV_B: u32 = 11;
    /// Revision C.
    pub const REV_C: u32 = 12;
    /// Revision D.
    pub const REV_D: u32 = 13;
    /// Revision E.
    pub const REV_E: u32 = 14;
    /// Revision F.
    pub const REV_F: u32 = 15;
    /// Revision G.
    pub const REV_G: u32 = 16;
    /// Revision H.
    pub const REV_H: u32 = 17;

    /// Single letter label for logs.
    pub fn label(rev: u32) -> char {
        match rev {
            REV_A..=REV_H => (b'A' + (rev - REV_A) as u8) as char,
            _ => '?',
        }
    }
}

/// DSP filter and timing limits.
pub mod limits {
    /// Maximum combined fast filter length plus gap.
    pub const FASTFILTER_MAX_LEN: u32 = 127;
    /// Minimum fast filter length.
    pub const FASTLENGTH_MIN_LEN: u32 = 2;
    /// Largest fast trigger threshold register value.
    pub const FAST_THRESHOLD_MAX: u32 = 65535;
    /// Maximum combined slow filter length plus gap.
    pub const SLOWFILTER_MAX_LEN: u32 = 127;
    /// Minimum slow filter length.
    pub const SLOWLENGTH_MIN_LEN: u32 = 2;
    /// Minimum slow filter gap.
    pub const SLOWGAP_MIN_LEN: u32 = 3;
    /// Largest trace delay in FPGA clocks.
    pub const TRACEDELAY_MAX: u32 = 1023;
    /// Offset DAC voltage span.
    pub const DAC_VOLTAGE_RANGE: f64 = 3.0;
    /// Fast filter range bounds.
    pub const FASTFILTERRANGE_MIN: u32 = 0;
    /// Fast filter range bounds.
    pub const FASTFILTERRANGE_MAX: u32 = 0;
    /// Slow filter range bounds.
    pub const SLOWFILTERRANGE_MIN: u32 = 1;
    /// Slow filter range bounds.
    pub const SLOWFILTERRANGE_MAX: u32 = 6;
    /// Fast trigger back length upper bound.
    pub const FASTTRIGBACKLEN_MAX: u32 = 4095;
    /// CFD delay bounds.
    pub const CFDDELAY_MIN: u32 = 1;
    /// CFD delay bounds.
    pub const CFDDELAY_MAX: u32 = 63;
    /// CFD scale upper bound.
    pub const CFDSCALE_MAX: u32 = 7;
    /// CFD threshold bounds.
    pub const CFDTHRESH_MIN: u32 = 1;
    /// CFD threshold bounds.
    pub const CFDTHRESH_MAX: u32 = 65535;
    /// QDC sum length bounds.
    pub const QDCLEN_MIN: u32 = 1;
    /// QDC sum length bounds.
    pub const QDCLEN_MAX: u32 = 32767;
    /// Trigger stretch bounds, shared by external, veto and channel stretch.
    pub const STRETCH_MIN: u32 = 1;
    /// Trigger stretch bounds, shared by external, veto and channel stretch.
    pub const STRETCH_MAX: u32 = 4095;
    /// External delay limit on revisions B, C and D.
    pub const EXTDELAYLEN_MAX_REVBCD: u32 = 255;
    /// External delay limit on revisions F and H.
    pub const EXTDELAYLEN_MAX_REVF: u32 = 511;
    /// Largest baseline average exponent.
    pub const BASELINE_AVERAGE_MAX: u32 = 16;
    /// Histogram bin factor bounds.
    pub const BINFACTOR_MIN: u32 = 1;
    /// Histogram bin factor bounds.
    pub const BINFACTOR_MAX: u32 = 6;
    /// Largest integrator mode.
    pub const INTEGRATOR_MAX: u32 = 7;
}

/// Channel CSRA bit positions.
pub mod csra {
    /// Input signal polarity.
    pub const POLARITY: u32 = 5;
    /// Input relay connect.
    pub const ENARELAY: u32 = 14;
}

/// Module CSRB bit positions that claim backplane roles.
pub mod csrb {
    /// Wired-or trigger line pullups.
    pub const CPLDPULLUP: u32 = 0;
    /// Director module.
    pub const DIRMOD: u32 = 4;
    /// Chassis run leader.
    pub const CHASSISMASTER: u32 = 6;
}
