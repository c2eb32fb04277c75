//! Boot sequencing.
//!
//! Devices load in order: communications FPGA, signal processing FPGA,
//! DSP. Reloading an FPGA always reloads the DSP, and reloading the
//! communications FPGA reloads the signal processing FPGA when it is not
//! already loaded. The DSP variable file is read before every DSP load
//! so a new firmware assignment takes effect on the next boot.

use super::{Module, SyncDirection};
use bitflags::bitflags;
use pixie_common::consts::Word;
use pixie_common::error::{ErrorCode, Result};
use pixie_common::firmware::{Device, FirmwareSet};
use pixie_common::param::{ChannelVariable, ModuleVar, ModuleVariable};
use tracing::{debug, info, warn};

bitflags! {
    /// Devices a boot loads.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BootPattern: u32 {
        /// Communications FPGA.
        const COMMS = 1 << 0;
        /// Signal processing FPGA.
        const FIPPI = 1 << 2;
        /// DSP code.
        const DSP   = 1 << 3;
        /// Everything.
        const ALL   = Self::COMMS.bits() | Self::FIPPI.bits() | Self::DSP.bits();
    }
}

impl Default for BootPattern {
    fn default() -> Self {
        BootPattern::ALL
    }
}

impl Module {
    /// True if the devices hold firmware from `release`.
    pub fn firmware_resident(&self, release: &Option<String>) -> bool {
        self.resident == *release
    }

    fn firmware_set(&self) -> Result<FirmwareSet> {
        self.firmware.clone().ok_or_else(|| {
            self.error(ErrorCode::ModuleInvalidFirmware, "no firmware set assigned")
        })
    }

    /// Boot the devices `pattern` selects.
    ///
    /// The module is online when all three devices hold firmware. Once
    /// online the signal processing FPGA is programmed from the DSP
    /// variables and `SlotID` is written with the physical slot.
    pub fn boot(&mut self, pattern: BootPattern) -> Result<()> {
        if !self.opened {
            return Err(self.error(ErrorCode::ModuleOffline, "module not open"));
        }
        if self.forced_offline {
            warn!("{}module is forced offline, no boot performed", self.label());
            return Ok(());
        }
        if self.online() && !pattern.is_empty() {
            warn!("{}booting online module", self.label());
        }

        let firmware = self.firmware_set()?;
        let mut pattern = pattern;
        if pattern.intersects(BootPattern::COMMS | BootPattern::FIPPI) {
            debug!("{}dsp load forced", self.label());
            pattern |= BootPattern::DSP;
            if pattern.contains(BootPattern::COMMS) && !self.hw.loaded().fippi {
                debug!("{}fippi load forced", self.label());
                pattern |= BootPattern::FIPPI;
            }
        }

        if !self.firmware_resident(&firmware.release) && pattern != BootPattern::ALL {
            return Err(self.error(
                ErrorCode::ModuleInitializeFailure,
                "partial boot: firmware does not match resident firmware",
            ));
        }

        self.online = false;
        self.load_vars(&firmware, pattern.contains(BootPattern::DSP))?;

        if self.offline_mode {
            return self.boot_offline();
        }

        if pattern.contains(BootPattern::COMMS) {
            if self.hw.loaded().comms {
                info!("{}comms already loaded", self.label());
            }
            let image = firmware.get(Device::Sys)?.load()?;
            self.hw.boot_comms(&image)?;
        }

        if pattern.contains(BootPattern::FIPPI) {
            if self.hw.loaded().fippi {
                info!("{}fippi already loaded", self.label());
            }
            if !self.hw.loaded().comms {
                return Err(self.error(
                    ErrorCode::ModuleInitializeFailure,
                    "fippi boot needs comms booted",
                ));
            }
            let image = firmware.get(Device::Fippi)?.load()?;
            self.hw.boot_fippi(&image)?;
        }

        if pattern.contains(BootPattern::DSP) {
            if self.hw.loaded().dsp {
                info!("{}dsp already running", self.label());
            }
            let loaded = self.hw.loaded();
            if !loaded.comms || !loaded.fippi {
                return Err(self.error(
                    ErrorCode::ModuleInitializeFailure,
                    "dsp needs comms and fippi booted",
                ));
            }
            let image = firmware.get(Device::Dsp)?.load()?;
            self.hw.boot_dsp(&image, &self.descriptors)?;
        }

        if !pattern.is_empty() {
            self.resident = firmware.release.clone();
        }

        let loaded = self.hw.loaded();
        if loaded.fippi && loaded.dsp {
            self.init_values()?;
            self.init_channels()?;
        }

        info!(
            "{}boot: sys-fpga={} fippi-fpga={} dsp={}",
            self.label(),
            loaded.comms,
            loaded.fippi,
            loaded.dsp
        );

        self.online = loaded.all();
        if self.online {
            self.sync_vars(SyncDirection::FromHardware)?;
            self.program_fippi()?;
            self.write_var(ModuleVar::SlotID, self.slot as Word, 0, true)?;
        }
        Ok(())
    }

    /// Offline mode: resolve the variables and mark the module online with
    /// zeroed caches.
    fn boot_offline(&mut self) -> Result<()> {
        self.init_values()?;
        self.init_channels()?;
        self.online = true;
        info!("{}boot: offline mode", self.label());
        Ok(())
    }

    /// Read the DSP variable file and build the address map. Without
    /// `reload` a file already read is kept.
    pub(crate) fn load_vars(&mut self, firmware: &FirmwareSet, reload: bool) -> Result<()> {
        if self.vars_loaded && !reload {
            return Ok(());
        }
        let vars = firmware.get(Device::Var)?;
        self.descriptors.load_file(&vars.file)?;
        self.address_map
            .set(self.max_channels, &self.descriptors.module, &self.descriptors.channel)
            .map_err(|e| e.at(self.number, self.slot))?;
        self.vars_loaded = true;
        info!("{}address map: {}", self.label(), self.address_map.full);
        Ok(())
    }

    fn check_configs(&self) -> Result<()> {
        if self.num_channels == 0 {
            return Err(self.error(ErrorCode::InternalFailure, "number of channels is 0"));
        }
        if self.configs.len() != self.num_channels {
            return Err(self.error(
                ErrorCode::InternalFailure,
                "invalid number of channels configurations",
            ));
        }
        Ok(())
    }

    fn init_values(&mut self) -> Result<()> {
        self.check_configs()?;
        self.module_vars = self
            .descriptors
            .module
            .iter()
            .map(ModuleVariable::new)
            .collect();
        Ok(())
    }

    fn init_channels(&mut self) -> Result<()> {
        self.check_configs()?;
        let channel: Vec<ChannelVariable> = self
            .descriptors
            .channel
            .iter()
            .map(ChannelVariable::new)
            .collect();
        self.channel_vars = vec![channel; self.num_channels];
        Ok(())
    }
}
