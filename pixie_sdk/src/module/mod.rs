//! One hardware module.
//!
//! A `Module` owns the backend for one device, its DSP variable caches, the
//! firmware set it boots and its run state. Channel parameters are reached
//! through [`Module::channel`].
//!
//! # Module Structure
//!
//! - `mod.rs` - State, variable access and module parameters
//! - `boot` - Boot sequencing and cache initialisation
//! - `run` - Control tasks, runs, histograms, traces and statistics
//! - `fifo` - Host side list-mode FIFO and its configuration
//!
//! # State
//!
//! ```text
//!  placeholder ──open()──► opened ──boot()──► online
//!       ▲                    │                  │
//!       └──────close()───────┴──────────────────┘
//! ```
//!
//! A module that is online but forced offline keeps its caches and refuses
//! hardware access.

mod boot;
mod fifo;
mod run;

pub use boot::BootPattern;

use crate::backplane::Backplane;
use crate::channel::ChannelView;
use crate::stats::FifoStats;
use pixie_common::address::AddressMap;
use pixie_common::config::{CrateConfig, FifoConfig};
use pixie_common::consts::{Address, Word, csrb, limits, revision};
use pixie_common::error::{ErrorCode, PixieError, Result};
use pixie_common::firmware::FirmwareSet;
use pixie_common::hw::{AdcConfig, ControlTask, ModuleHardware, RunTask};
use pixie_common::param::{
    ChannelVar, ChannelVariable, Descriptors, Mode, ModuleParam, ModuleVar, ModuleVariable, Value,
    lookup_module_param, map_module_param,
};
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Direction of a cache synchronisation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncDirection {
    /// Write dirty cached values to the DSP.
    ToHardware,
    /// Refresh every enabled variable from the DSP.
    FromHardware,
}

/// Cached writable values: module variables, then channel variables with
/// one value per channel.
pub(crate) type WritableValues = (Vec<(ModuleVar, Vec<Word>)>, Vec<(ChannelVar, Vec<Word>)>);

/// One module and its variable caches.
pub struct Module {
    /// Logical module number.
    pub number: usize,
    /// Physical slot. Zero until opened.
    pub slot: usize,
    /// Bus enumeration index if the device was probed.
    pub device_number: Option<usize>,
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
    /// Backplane revision the module reports.
    pub crate_revision: u32,
    /// PCI bus number.
    pub pci_bus: u32,
    /// PCI slot number.
    pub pci_slot: u32,
    /// Per channel ADC configuration.
    pub configs: Vec<AdcConfig>,
    /// Firmware set the module boots.
    pub firmware: Option<FirmwareSet>,
    /// Host FIFO statistics of the current or last run.
    pub run_stats: FifoStats,

    pub(crate) descriptors: Descriptors,
    pub(crate) address_map: AddressMap,

    hw: Box<dyn ModuleHardware>,
    backplane: Arc<Backplane>,
    present: bool,
    opened: bool,
    online: bool,
    forced_offline: bool,
    offline_mode: bool,
    vars_loaded: bool,
    /// Release label of the firmware the devices hold.
    resident: Option<String>,
    module_vars: Vec<ModuleVariable>,
    channel_vars: Vec<Vec<ChannelVariable>>,
    run_task: RunTask,
    control_task: ControlTask,
    fifo_config: FifoConfig,
    fifo_data: VecDeque<Word>,
    fifo_drained: Option<Instant>,
}

impl fmt::Debug for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Module")
            .field("number", &self.number)
            .field("slot", &self.slot)
            .field("device_number", &self.device_number)
            .field("revision", &self.revision)
            .field("serial_num", &self.serial_num)
            .field("num_channels", &self.num_channels)
            .field("present", &self.present)
            .field("opened", &self.opened)
            .field("online", &self.online)
            .field("forced_offline", &self.forced_offline)
            .field("driver", &self.hw.name())
            .finish()
    }
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "num={} slot={} rev={} serial={} channels={} online={}",
            self.number,
            self.slot,
            revision::label(self.revision),
            self.serial_num,
            self.num_channels,
            self.online()
        )
    }
}

impl Module {
    /// An unopened placeholder.
    pub fn new(
        hw: Box<dyn ModuleHardware>,
        backplane: Arc<Backplane>,
        fifo_config: FifoConfig,
        offline_mode: bool,
    ) -> Self {
        Self {
            number: 0,
            slot: 0,
            device_number: None,
            revision: 0,
            serial_num: 0,
            eeprom_format: 0,
            num_channels: 0,
            max_channels: 0,
            crate_revision: 0,
            pci_bus: 0,
            pci_slot: 0,
            configs: Vec::new(),
            firmware: None,
            run_stats: FifoStats::default(),
            descriptors: Descriptors::default(),
            address_map: AddressMap::default(),
            hw,
            backplane,
            present: false,
            opened: false,
            online: false,
            forced_offline: false,
            offline_mode,
            vars_loaded: false,
            resident: None,
            module_vars: Vec::new(),
            channel_vars: Vec::new(),
            run_task: RunTask::Nop,
            control_task: ControlTask::Nop,
            fifo_config,
            fifo_data: VecDeque::new(),
            fifo_drained: None,
        }
    }

    /// Log and error prefix.
    pub fn label(&self) -> String {
        format!("module: num={} slot={}: ", self.number, self.slot)
    }

    pub(crate) fn error(&self, code: ErrorCode, message: impl Into<String>) -> PixieError {
        PixieError::module(self.number, self.slot, code, message)
    }

    // ─── State ──────────────────────────────────────────────────────

    /// A device answered the probe.
    pub fn present(&self) -> bool {
        self.present
    }

    /// The device is open.
    pub fn opened(&self) -> bool {
        self.opened
    }

    /// Booted and not forced offline.
    pub fn online(&self) -> bool {
        self.online && !self.forced_offline
    }

    /// Online with the hardware reachable.
    pub fn hardware_accessible(&self) -> bool {
        self.online() && !self.offline_mode
    }

    /// Modules never touch hardware in offline mode.
    pub fn offline_mode(&self) -> bool {
        self.offline_mode
    }

    /// The slot was reported by an opened device.
    pub fn slot_valid(&self) -> bool {
        self.slot > 0
    }

    /// Backend name.
    pub fn driver(&self) -> &'static str {
        self.hw.name()
    }

    fn check_channel(&self, channel: usize) -> Result<()> {
        if channel >= self.num_channels {
            return Err(self.error(
                ErrorCode::ChannelNumberInvalid,
                format!("channel out of range: {channel}"),
            ));
        }
        Ok(())
    }

    pub(crate) fn online_check(&self) -> Result<()> {
        if !self.online() {
            return Err(self.error(ErrorCode::ModuleOffline, "module offline"));
        }
        Ok(())
    }

    /// Channel parameter access.
    pub fn channel(&mut self, channel: usize) -> Result<ChannelView<'_>> {
        self.check_channel(channel)?;
        Ok(ChannelView::new(self, channel))
    }

    // ─── Lifecycle ──────────────────────────────────────────────────

    /// Probe and open `device_number`.
    ///
    /// Returns `false` when no device answers. A device that answers but
    /// fails to open is left present and unopened, and the error returned.
    pub fn open(&mut self, device_number: usize, config: &CrateConfig) -> Result<bool> {
        if self.opened {
            return Err(self.error(ErrorCode::ModuleAlreadyOpen, "module already open"));
        }
        let info = match self.hw.open(device_number, config) {
            Ok(Some(info)) => info,
            Ok(None) => return Ok(false),
            Err(e) => {
                self.present = true;
                self.device_number = Some(device_number);
                return Err(e);
            }
        };
        self.present = true;
        self.opened = true;
        self.device_number = Some(info.device_number);
        self.slot = info.slot;
        self.revision = info.revision;
        self.serial_num = info.serial_num;
        self.eeprom_format = info.eeprom_format;
        self.num_channels = info.num_channels;
        self.max_channels = info.max_channels;
        self.crate_revision = info.crate_revision;
        self.pci_bus = info.pci_bus;
        self.pci_slot = info.pci_slot;
        self.configs = info.configs;
        self.descriptors = Descriptors::default();
        self.address_map = AddressMap::default();
        self.vars_loaded = false;
        self.resident = None;
        info!(
            "{}open: device={device_number} rev={} serial={} channels={}",
            self.label(),
            revision::label(self.revision),
            self.serial_num,
            self.num_channels
        );
        Ok(true)
    }

    /// Close the device. The module becomes a placeholder.
    pub fn close(&mut self) -> Result<()> {
        if !self.opened {
            self.present = false;
            return Ok(());
        }
        info!("{}close", self.label());
        if self.online {
            self.backplane.offline(self.slot)?;
        }
        self.online = false;
        self.forced_offline = false;
        self.opened = false;
        self.present = false;
        self.vars_loaded = false;
        self.resident = None;
        self.run_task = RunTask::Nop;
        self.fifo_data.clear();
        let result = self.hw.close();
        result.map_err(|e| {
            self.error(
                ErrorCode::ModuleCloseFailure,
                format!("close: {}", e.message),
            )
        })
    }

    /// Refresh the online state from the loaded devices.
    pub fn probe(&mut self) -> Result<()> {
        if !self.opened {
            return Err(self.error(ErrorCode::ModuleOffline, "module not open"));
        }
        if self.offline_mode {
            return Ok(());
        }
        let loaded = self.hw.loaded();
        let online = loaded.all() && self.vars_loaded;
        if online != self.online {
            info!("{}probe: online={online}", self.label());
        }
        self.online = online;
        Ok(())
    }

    /// Clear a forced offline state.
    pub fn force_online(&mut self) -> Result<()> {
        if !self.opened {
            return Err(self.error(ErrorCode::ModuleOffline, "module not open"));
        }
        if self.forced_offline {
            info!("{}forced online", self.label());
            self.forced_offline = false;
        }
        Ok(())
    }

    /// Take the module offline without closing it.
    pub fn force_offline(&mut self) -> Result<()> {
        if self.online() {
            warn!("{}forced offline", self.label());
            self.backplane.offline(self.slot)?;
        }
        self.forced_offline = true;
        Ok(())
    }

    // ─── Variables ──────────────────────────────────────────────────

    /// Read a module variable element. With `io` the DSP is read and the
    /// cache updated; without it the cache is returned.
    pub fn read_var(&mut self, var: ModuleVar, offset: usize, io: bool) -> Result<Word> {
        let desc = self.descriptors.module_var(var);
        if !desc.enabled() {
            return Err(self.error(
                ErrorCode::ModuleParamDisabled,
                format!("module variable disabled: {}", desc.name),
            ));
        }
        if desc.mode == Mode::WriteOnly {
            return Err(self.error(
                ErrorCode::ModuleInvalidVar,
                format!("module variable not readable: {}", desc.name),
            ));
        }
        if offset >= desc.size {
            return Err(self.error(
                ErrorCode::ModuleInvalidParam,
                format!("module variable offset out of range: {}: {offset}", desc.name),
            ));
        }
        let address = desc.address + offset as Address;
        let value = if io && self.hardware_accessible() {
            Some(self.hw.read_word(address)?)
        } else {
            None
        };
        let cached = self.module_value(var, offset)?;
        if let Some(value) = value {
            *cached = Value { value, dirty: false };
        }
        Ok(cached.value)
    }

    /// Write a module variable element. With `io` the DSP is written;
    /// without it the cache is marked dirty.
    ///
    /// # Errors
    /// `ModuleInvalidOperation` for a DSP write while a run is active.
    pub fn write_var(&mut self, var: ModuleVar, value: Word, offset: usize, io: bool) -> Result<()> {
        if io {
            self.run_check()?;
        }
        let desc = self.descriptors.module_var(var);
        if !desc.enabled() {
            return Err(self.error(
                ErrorCode::ModuleParamDisabled,
                format!("module variable disabled: {}", desc.name),
            ));
        }
        if desc.mode == Mode::ReadOnly {
            return Err(self.error(
                ErrorCode::ModuleParamReadonly,
                format!("module variable read only: {}", desc.name),
            ));
        }
        if offset >= desc.size {
            return Err(self.error(
                ErrorCode::ModuleInvalidParam,
                format!("module variable offset out of range: {}: {offset}", desc.name),
            ));
        }
        let address = desc.address + offset as Address;
        debug!("{}write var: {var}[{offset}] = {value} (0x{value:08x})", self.label());
        let write = io && self.hardware_accessible();
        if write {
            self.hw.write_word(address, value)?;
        }
        let cached = self.module_value(var, offset)?;
        cached.value = value;
        cached.dirty = !write;
        Ok(())
    }

    /// Read a channel variable element.
    pub fn read_channel_var(
        &mut self,
        var: ChannelVar,
        channel: usize,
        offset: usize,
        io: bool,
    ) -> Result<Word> {
        self.check_channel(channel)?;
        let desc = self.descriptors.channel_var(var);
        if !desc.enabled() {
            return Err(self.error(
                ErrorCode::ChannelParamDisabled,
                format!("channel variable disabled: {}", desc.name),
            ));
        }
        if desc.mode == Mode::WriteOnly {
            return Err(self.error(
                ErrorCode::ModuleInvalidVar,
                format!("channel variable not readable: {}", desc.name),
            ));
        }
        if offset >= desc.size {
            return Err(self.error(
                ErrorCode::ChannelInvalidParam,
                format!("channel variable offset out of range: {}: {offset}", desc.name),
            ));
        }
        let address = AddressMap::channel_address(desc, channel, offset);
        let accessible = self.hardware_accessible();
        let value = if io && accessible {
            Some(self.hw.read_word(address)?)
        } else {
            None
        };
        let cached = self.channel_value(var, channel, offset)?;
        if let Some(value) = value {
            cached.value = value;
            cached.dirty = false;
        }
        Ok(cached.value)
    }

    /// Write a channel variable element.
    pub fn write_channel_var(
        &mut self,
        var: ChannelVar,
        value: Word,
        channel: usize,
        offset: usize,
        io: bool,
    ) -> Result<()> {
        if io {
            self.run_check()?;
        }
        self.check_channel(channel)?;
        let desc = self.descriptors.channel_var(var);
        if !desc.enabled() {
            return Err(self.error(
                ErrorCode::ChannelParamDisabled,
                format!("channel variable disabled: {}", desc.name),
            ));
        }
        if desc.mode == Mode::ReadOnly {
            return Err(self.error(
                ErrorCode::ChannelParamReadonly,
                format!("channel variable read only: {}", desc.name),
            ));
        }
        if offset >= desc.size {
            return Err(self.error(
                ErrorCode::ChannelInvalidParam,
                format!("channel variable offset out of range: {}: {offset}", desc.name),
            ));
        }
        let address = AddressMap::channel_address(desc, channel, offset);
        debug!(
            "{}channel={channel}: write var: {var}[{offset}] = {value} (0x{value:08x})",
            self.label()
        );
        let write = io && self.hardware_accessible();
        if write {
            self.hw.write_word(address, value)?;
        }
        let cached = self.channel_value(var, channel, offset)?;
        cached.value = value;
        cached.dirty = !write;
        Ok(())
    }

    /// Read a module or channel variable by DSP name. `channel` is ignored
    /// for module variables.
    pub fn read_var_by_name(&mut self, name: &str, channel: usize, offset: usize) -> Result<Word> {
        if let Some(var) = ModuleVar::from_name(name) {
            self.read_var(var, offset, true)
        } else if let Some(var) = ChannelVar::from_name(name) {
            self.read_channel_var(var, channel, offset, true)
        } else {
            Err(self.error(ErrorCode::ModuleInvalidVar, format!("invalid variable: {name}")))
        }
    }

    /// Write a module or channel variable by DSP name.
    pub fn write_var_by_name(
        &mut self,
        name: &str,
        value: Word,
        channel: usize,
        offset: usize,
    ) -> Result<()> {
        if let Some(var) = ModuleVar::from_name(name) {
            self.write_var(var, value, offset, true)
        } else if let Some(var) = ChannelVar::from_name(name) {
            self.write_channel_var(var, value, channel, offset, true)
        } else {
            Err(self.error(ErrorCode::ModuleInvalidVar, format!("invalid variable: {name}")))
        }
    }

    /// Synchronise the caches with the DSP.
    pub fn sync_vars(&mut self, direction: SyncDirection) -> Result<()> {
        if !self.hardware_accessible() {
            return Ok(());
        }
        debug!("{}sync vars: {direction:?}", self.label());
        let module: Vec<_> = self
            .descriptors
            .module
            .iter()
            .filter(|d| d.enabled())
            .map(|d| (d.var, d.mode, d.size))
            .collect();
        let channel: Vec<_> = self
            .descriptors
            .channel
            .iter()
            .filter(|d| d.enabled())
            .map(|d| (d.var, d.mode, d.size))
            .collect();
        for (var, mode, size) in module {
            for offset in 0..size {
                match direction {
                    SyncDirection::ToHardware => {
                        let cached = *self.module_value(var, offset)?;
                        if mode != Mode::ReadOnly && cached.dirty {
                            self.write_var(var, cached.value, offset, true)?;
                        }
                    }
                    SyncDirection::FromHardware => {
                        if mode != Mode::WriteOnly {
                            self.read_var(var, offset, true)?;
                        }
                    }
                }
            }
        }
        for channel_num in 0..self.num_channels {
            for &(var, mode, size) in &channel {
                for offset in 0..size {
                    match direction {
                        SyncDirection::ToHardware => {
                            let cached = *self.channel_value(var, channel_num, offset)?;
                            if mode != Mode::ReadOnly && cached.dirty {
                                self.write_channel_var(var, cached.value, channel_num, offset, true)?;
                            }
                        }
                        SyncDirection::FromHardware => {
                            if mode != Mode::WriteOnly {
                                self.read_channel_var(var, channel_num, offset, true)?;
                            }
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Writable variables and their cached values: module then channel.
    pub(crate) fn writable_values(&self) -> WritableValues {
        let module = self
            .module_vars
            .iter()
            .filter(|v| self.descriptors.module_var(v.var).writeable())
            .map(|v| (v.var, v.values.iter().map(|x| x.value).collect()))
            .collect();
        let channel = self
            .descriptors
            .channel
            .iter()
            .filter(|d| d.writeable())
            .map(|d| {
                let values = self
                    .channel_vars
                    .iter()
                    .take(self.num_channels)
                    .map(|vars| {
                        vars.get(d.var.index())
                            .and_then(|v| v.values.first())
                            .map_or(0, |v| v.value)
                    })
                    .collect();
                (d.var, values)
            })
            .collect();
        (module, channel)
    }

    fn module_value(&mut self, var: ModuleVar, offset: usize) -> Result<&mut Value> {
        let (number, slot) = (self.number, self.slot);
        self.module_vars
            .get_mut(var.index())
            .and_then(|v| v.values.get_mut(offset))
            .ok_or_else(|| {
                PixieError::module(
                    number,
                    slot,
                    ErrorCode::ModuleInvalidVar,
                    format!("module variables not loaded: {var}"),
                )
            })
    }

    fn channel_value(
        &mut self,
        var: ChannelVar,
        channel: usize,
        offset: usize,
    ) -> Result<&mut Value> {
        let (number, slot) = (self.number, self.slot);
        self.channel_vars
            .get_mut(channel)
            .and_then(|vars| vars.get_mut(var.index()))
            .and_then(|v| v.values.get_mut(offset))
            .ok_or_else(|| {
                PixieError::module(
                    number,
                    slot,
                    ErrorCode::ChannelInvalidVar,
                    format!("channel variables not loaded: {var}"),
                )
            })
    }

    // ─── Module parameters ──────────────────────────────────────────

    /// Read a module parameter.
    pub fn read_param(&mut self, par: ModuleParam) -> Result<Word> {
        self.read_var(map_module_param(par), par.var_offset(), true)
    }

    /// Write a module parameter. Returns `true` when the value must be
    /// broadcast to every other online module. Rejected while a run is
    /// active.
    pub fn write_param(&mut self, par: ModuleParam, value: Word) -> Result<bool> {
        info!("{}param write: {par} = {value}", self.label());
        self.run_check()?;
        let var = map_module_param(par);
        let mut bcast = false;
        match par {
            ModuleParam::ModuleCsrb => {
                self.module_csrb(value)?;
                self.write_var(var, value, 0, true)?;
                if self.hardware_accessible() {
                    self.program_fippi()?;
                }
            }
            ModuleParam::SlowFilterRange => {
                if !(limits::SLOWFILTERRANGE_MIN..=limits::SLOWFILTERRANGE_MAX).contains(&value) {
                    return Err(self.error(
                        ErrorCode::ModuleInvalidParam,
                        format!("invalid SLOW_FILTER_RANGE: {value}"),
                    ));
                }
                self.write_var(var, value, 0, true)?;
                if self.hardware_accessible() {
                    self.refresh_fifo_delays()?;
                    self.program_fippi()?;
                    if self.revision < revision::REV_H {
                        let channels: Vec<usize> = (0..self.num_channels).collect();
                        self.bl_find_cut(&channels)?;
                    }
                }
            }
            ModuleParam::FastFilterRange => {
                let clamped = value.clamp(limits::FASTFILTERRANGE_MIN, limits::FASTFILTERRANGE_MAX);
                if clamped != value {
                    warn!(
                        "{}FAST_FILTER_RANGE {value} out of range, using {clamped}",
                        self.label()
                    );
                }
                self.write_var(var, clamped, 0, true)?;
                if self.hardware_accessible() {
                    self.refresh_fifo_delays()?;
                    self.program_fippi()?;
                }
            }
            ModuleParam::SynchWait => {
                self.backplane.sync_wait(self.slot, value)?;
                bcast = true;
                self.write_var(var, value, 0, true)?;
            }
            ModuleParam::InSynch | ModuleParam::HostRtPreset => {
                bcast = true;
                self.write_var(var, value, 0, true)?;
            }
            ModuleParam::ModuleFormat | ModuleParam::MaxEvents => {
                self.write_var(var, value, 0, true)?;
            }
            ModuleParam::TrigConfig0
            | ModuleParam::TrigConfig1
            | ModuleParam::TrigConfig2
            | ModuleParam::TrigConfig3
            | ModuleParam::ModuleCsra
            | ModuleParam::FastTrigBackplaneEna
            | ModuleParam::CrateId
            | ModuleParam::SlotId
            | ModuleParam::ModuleId => {
                self.write_var(var, value, par.var_offset(), true)?;
                if self.hardware_accessible() {
                    self.program_fippi()?;
                }
            }
            ModuleParam::ModuleNumber => {
                return Err(self.error(
                    ErrorCode::ModuleInvalidParam,
                    format!("module parameter not writable: {par}"),
                ));
            }
        }
        Ok(bcast)
    }

    /// Claim or release the backplane roles `MODULE_CSRB` selects.
    fn module_csrb(&mut self, value: Word) -> Result<()> {
        let roles = [
            (csrb::CPLDPULLUP, &self.backplane.wired_or_triggers_pullup),
            (csrb::CHASSISMASTER, &self.backplane.run),
            (csrb::DIRMOD, &self.backplane.director),
        ];
        for (bit, role) in roles {
            if value & (1 << bit) != 0 {
                if !role.request(self.slot) {
                    return Err(PixieError::module(
                        self.number,
                        self.slot,
                        ErrorCode::ModuleInvalidParam,
                        format!(
                            "{} leader role already taken: slot: {}",
                            role.label(),
                            role.slot().unwrap_or_default()
                        ),
                    ));
                }
            } else {
                role.release(self.slot);
            }
        }
        Ok(())
    }

    /// Recompute every channel's FIFO delays from the cached trace delay.
    fn refresh_fifo_delays(&mut self) -> Result<()> {
        for channel in 0..self.num_channels {
            self.channel(channel)?.refresh_fifo()?;
        }
        Ok(())
    }

    /// Read a module parameter by name.
    pub fn read_param_by_name(&mut self, name: &str) -> Result<Word> {
        let par = lookup_module_param(name)?;
        self.read_param(par)
    }

    /// Write a module parameter by name.
    pub fn write_param_by_name(&mut self, name: &str, value: Word) -> Result<bool> {
        let par = lookup_module_param(name)?;
        self.write_param(par, value)
    }

    pub(crate) fn backplane(&self) -> &Arc<Backplane> {
        &self.backplane
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use pixie_common::firmware::FirmwareCatalog;
    use pixie_common::hw::{DeviceInfo, Loaded, MemoryRegion, RunMode};
    use pixie_hal::drivers::simulation::{SimulatedModule, write_firmware_set};
    use tempfile::TempDir;

    /// Crate configuration for one simulated 16 channel module in slot 2.
    pub(crate) fn write_config(dir: &TempDir, revision: u32, msps: u32, div: u32) -> CrateConfig {
        let firmware = write_firmware_set(dir.path(), revision, msps, 16, 16, Some("r1")).unwrap();
        let mut config = CrateConfig::default();
        config.firmware = firmware;
        config.simulation.modules = vec![format!(
            "device-number=0,slot=2,revision={revision},num-channels=16,adc-bits=16,\
             adc-msps={msps},adc-clk-div={div}"
        )];
        config
    }

    pub(crate) fn unopened() -> Module {
        Module::new(
            Box::new(SimulatedModule::new()),
            Arc::new(Backplane::new()),
            FifoConfig::default(),
            false,
        )
    }

    /// Simulated hardware whose baseline captures fail once `captures` have
    /// run.
    pub(crate) struct FailingBaselines {
        sim: SimulatedModule,
        captures: usize,
    }

    impl ModuleHardware for FailingBaselines {
        fn name(&self) -> &'static str {
            self.sim.name()
        }

        fn open(&mut self, device_number: usize, config: &CrateConfig) -> Result<Option<DeviceInfo>> {
            self.sim.open(device_number, config)
        }

        fn close(&mut self) -> Result<()> {
            self.sim.close()
        }

        fn boot_comms(&mut self, image: &[u8]) -> Result<()> {
            self.sim.boot_comms(image)
        }

        fn boot_fippi(&mut self, image: &[u8]) -> Result<()> {
            self.sim.boot_fippi(image)
        }

        fn boot_dsp(&mut self, image: &[u8], descriptors: &Descriptors) -> Result<()> {
            self.sim.boot_dsp(image, descriptors)
        }

        fn loaded(&self) -> Loaded {
            self.sim.loaded()
        }

        fn read_word(&mut self, address: Address) -> Result<Word> {
            self.sim.read_word(address)
        }

        fn write_word(&mut self, address: Address, value: Word) -> Result<()> {
            self.sim.write_word(address, value)
        }

        fn read_memory(&mut self, region: MemoryRegion, channel: usize, out: &mut [Word]) -> Result<()> {
            self.sim.read_memory(region, channel, out)
        }

        fn clear_memory(&mut self, region: MemoryRegion) -> Result<()> {
            self.sim.clear_memory(region)
        }

        fn start_control_task(&mut self, task: ControlTask) -> Result<()> {
            if task == ControlTask::GetBaselines {
                if self.captures == 0 {
                    return Err(PixieError::new(ErrorCode::DeviceHwFailure, "sim: capture failed"));
                }
                self.captures -= 1;
            }
            self.sim.start_control_task(task)
        }

        fn start_run(&mut self, task: RunTask, mode: RunMode) -> Result<()> {
            self.sim.start_run(task, mode)
        }

        fn end_run(&mut self) -> Result<()> {
            self.sim.end_run()
        }

        fn busy(&mut self) -> Result<bool> {
            self.sim.busy()
        }

        fn fifo_level(&mut self) -> Result<usize> {
            self.sim.fifo_level()
        }

        fn fifo_read(&mut self, out: &mut [Word]) -> Result<usize> {
            self.sim.fifo_read(out)
        }

        fn fifo_overflows(&mut self) -> Result<usize> {
            self.sim.fifo_overflows()
        }
    }

    fn boot_on(mut module: Module, dir: &TempDir, revision: u32, msps: u32, div: u32) -> Module {
        let config = write_config(dir, revision, msps, div);
        assert!(module.open(0, &config).unwrap());
        let catalog = FirmwareCatalog::from_entries(&config.firmware).unwrap();
        let tag = format!("{revision}-{msps}-16");
        module.firmware = Some(catalog.find(&tag, None, module.slot).unwrap());
        module.boot(BootPattern::ALL).unwrap();
        module
    }

    /// A booted simulated module.
    pub(crate) fn booted_with(dir: &TempDir, revision: u32, msps: u32, div: u32) -> Module {
        boot_on(unopened(), dir, revision, msps, div)
    }

    /// A booted revision F, 250 MSPS module.
    pub(crate) fn booted(dir: &TempDir) -> Module {
        booted_with(dir, revision::REV_F, 250, 2)
    }

    /// A booted revision F, 250 MSPS module allowing `captures` baseline
    /// captures.
    pub(crate) fn booted_failing_baselines(dir: &TempDir, captures: usize) -> Module {
        let hw = FailingBaselines {
            sim: SimulatedModule::new(),
            captures,
        };
        let module = Module::new(
            Box::new(hw),
            Arc::new(Backplane::new()),
            FifoConfig::default(),
            false,
        );
        boot_on(module, dir, revision::REV_F, 250, 2)
    }
}
