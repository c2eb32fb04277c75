//! Hardware access trait and the types that cross it.
//!
//! This module defines:
//! - `ModuleHardware` trait - Interface for pluggable module backends
//! - `HardwareFactory` type alias - Factory function type
//! - `DeviceInfo` / `AdcConfig` - What a probe reports
//! - `RunTask`, `RunMode`, `ControlTask` - DSP task codes
//!
//! The SDK owns every policy decision (timeouts, boot ordering, caches). A
//! backend only moves words.

use crate::config::CrateConfig;
use crate::consts::{Address, Word};
use crate::error::Result;
use crate::param::Descriptors;

/// ADC configuration of one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdcConfig {
    /// Resolution in bits.
    pub adc_bits: u32,
    /// Sample rate in MSPS.
    pub adc_msps: u32,
    /// ADC clocks per FPGA clock.
    pub adc_clk_div: u32,
}

impl AdcConfig {
    /// FPGA filter clock in MHz.
    pub fn fpga_clk_mhz(&self) -> u32 {
        if self.adc_clk_div == 0 {
            0
        } else {
            self.adc_msps / self.adc_clk_div
        }
    }
}

/// What opening a device reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Bus enumeration index.
    pub device_number: usize,
    /// Physical slot the module reports.
    pub slot: usize,
    /// Hardware revision.
    pub revision: u32,
    /// EEPROM serial number.
    pub serial_num: u32,
    /// EEPROM layout version.
    pub eeprom_format: u32,
    /// Channels fitted.
    pub num_channels: usize,
    /// Channel array length in DSP memory.
    pub max_channels: usize,
    /// PCI bus number.
    pub pci_bus: u32,
    /// PCI slot number.
    pub pci_slot: u32,
    /// Backplane revision.
    pub crate_revision: u32,
    /// Per channel ADC configuration.
    pub configs: Vec<AdcConfig>,
}

/// On-board memory regions read by block transfers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryRegion {
    /// DSP I/O buffer (baselines, traces staging).
    IoBuffer,
    /// MCA histogram memory.
    Mca,
    /// ADC trace capture buffer.
    AdcTrace,
}

/// DSP run task codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum RunTask {
    /// Idle.
    Nop = 0,
    /// List-mode data taking.
    ListMode = 0x101,
    /// MCA histogramming.
    Histogram = 0x301,
}

/// Start a run fresh or resume the last one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum RunMode {
    /// Resume counting.
    Resume = 0,
    /// Clear and start.
    NewRun = 1,
}

/// DSP control task codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum ControlTask {
    /// Load offset DACs.
    SetDacs = 0,
    /// Connect inputs.
    EnableInput = 1,
    /// Ramp offset DACs.
    RampOffsetDacs = 3,
    /// Capture ADC traces.
    GetTraces = 4,
    /// Program the signal processing FPGA from DSP variables.
    ProgramFippi = 5,
    /// Capture baselines into the I/O buffer.
    GetBaselines = 6,
    /// Auto adjust offsets.
    AdjustOffsets = 7,
    /// Estimate decay time.
    TauFinder = 8,
    /// Fill the external FIFO.
    FillExtFifo = 11,
    /// Reset the ADCs.
    ResetAdc = 23,
    /// No operation.
    Nop = 100,
}

/// Which devices hold firmware.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Loaded {
    /// Communications FPGA.
    pub comms: bool,
    /// Signal processing FPGA.
    pub fippi: bool,
    /// DSP.
    pub dsp: bool,
}

impl Loaded {
    /// All devices loaded.
    pub fn all(&self) -> bool {
        self.comms && self.fippi && self.dsp
    }
}

/// Factory function type for creating backend instances.
pub type HardwareFactory = fn() -> Box<dyn ModuleHardware>;

/// Access to one module's hardware.
///
/// # Lifecycle
///
/// 1. `open()` - probe a device number; `None` means nothing is there
/// 2. `boot_*()` - load images
/// 3. word, block, task and FIFO access
/// 4. `close()`
pub trait ModuleHardware: Send {
    /// Backend identifier, e.g. `"simulation"`.
    fn name(&self) -> &'static str;

    /// Probe and open a device.
    ///
    /// # Errors
    /// A device that exists but cannot be opened is an error. A device
    /// number past the last device returns `Ok(None)`.
    fn open(&mut self, device_number: usize, config: &CrateConfig) -> Result<Option<DeviceInfo>>;

    /// Release the device.
    fn close(&mut self) -> Result<()>;

    /// Load the communications FPGA.
    fn boot_comms(&mut self, image: &[u8]) -> Result<()>;

    /// Load the signal processing FPGA.
    fn boot_fippi(&mut self, image: &[u8]) -> Result<()>;

    /// Load the DSP. `descriptors` holds the resolved variable addresses.
    fn boot_dsp(&mut self, image: &[u8], descriptors: &Descriptors) -> Result<()>;

    /// Devices holding firmware.
    fn loaded(&self) -> Loaded;

    /// Read one DSP word.
    fn read_word(&mut self, address: Address) -> Result<Word>;

    /// Write one DSP word.
    fn write_word(&mut self, address: Address, value: Word) -> Result<()>;

    /// Read consecutive DSP words.
    fn read_block(&mut self, address: Address, out: &mut [Word]) -> Result<()> {
        for (i, word) in out.iter_mut().enumerate() {
            *word = self.read_word(address + i as Address)?;
        }
        Ok(())
    }

    /// Read a channel's slice of an on-board memory region.
    ///
    /// `channel` is ignored for [`MemoryRegion::IoBuffer`].
    fn read_memory(&mut self, region: MemoryRegion, channel: usize, out: &mut [Word]) -> Result<()>;

    /// Zero an on-board memory region.
    fn clear_memory(&mut self, region: MemoryRegion) -> Result<()>;

    /// Start a control task.
    fn start_control_task(&mut self, task: ControlTask) -> Result<()>;

    /// Start a run task.
    fn start_run(&mut self, task: RunTask, mode: RunMode) -> Result<()>;

    /// Request the active run to stop.
    fn end_run(&mut self) -> Result<()>;

    /// True while a control or run task is executing.
    fn busy(&mut self) -> Result<bool>;

    /// Words waiting in the hardware FIFO.
    fn fifo_level(&mut self) -> Result<usize>;

    /// Drain up to `out.len()` words; returns the count read.
    fn fifo_read(&mut self, out: &mut [Word]) -> Result<usize>;

    /// Hardware FIFO overflow events since the last call.
    fn fifo_overflows(&mut self) -> Result<usize> {
        Ok(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fpga_clock_from_adc() {
        let cfg = |msps, div| AdcConfig {
            adc_bits: 14,
            adc_msps: msps,
            adc_clk_div: div,
        };
        assert_eq!(cfg(100, 1).fpga_clk_mhz(), 100);
        assert_eq!(cfg(250, 2).fpga_clk_mhz(), 125);
        assert_eq!(cfg(500, 5).fpga_clk_mhz(), 100);
        assert_eq!(cfg(500, 0).fpga_clk_mhz(), 0);
    }

    #[test]
    fn task_codes() {
        assert_eq!(RunTask::ListMode as u32, 0x101);
        assert_eq!(RunTask::Histogram as u32, 0x301);
        assert_eq!(ControlTask::ResetAdc as u32, 23);
        assert!(!Loaded::default().all());
    }
}
