//! Crate of modules.
//!
//! The crate owns a fixed table of [`MAX_SLOTS`] modules. After the device
//! probe each module sits at the table index matching its physical slot,
//! and modules are numbered either by the configured slot map or in slot
//! order.
//!
//! # Locking
//!
//! - One `Mutex` guards the slot table. Structural operations (initialize,
//!   boot, probe, shutdown, import/export, AFE sync) and module access hold
//!   it for their duration.
//! - An `AtomicBool` ready flag fails module operations fast with
//!   `CrateNotReady` before `initialize` and after `shutdown`.
//! - An `AtomicUsize` counts callers holding a [`ModuleGuard`].
//!
//! A [`ModuleGuard`] holds the table lock. Drop it before calling another
//! crate operation from the same thread.
//!
//! # Concurrency
//!
//! ```text
//!  boot() / initialize_afe()
//!        │
//!        ├── worker: module slot 2 ──┐
//!        ├── worker: module slot 3 ──┼── join all, first error wins
//!        └── worker: module slot 7 ──┘
//! ```

use crate::backplane::Backplane;
use crate::module::{BootPattern, Module, SyncDirection};
use crate::settings::{ModuleSettings, SettingsStore};
use pixie_common::config::CrateConfig;
use pixie_common::consts::{MAX_SLOTS, QUIRK_CRATE_REVISION, Word};
use pixie_common::error::{ErrorCode, PixieError, Result};
use pixie_common::firmware::{FirmwareCatalog, tag};
use pixie_common::param::copy::{CopyMask, copy_channel_values};
use pixie_common::param::{ChannelParam, ChannelVar, ModuleParam, ModuleVar};
use pixie_hal::DriverRegistry;
use std::collections::BTreeSet;
use std::ops::{Deref, DerefMut};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use tracing::{debug, error, info, warn};

/// What a crate boot loads and where.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootParams {
    /// Boot modules that are already online.
    pub force: bool,
    /// Devices to load.
    pub pattern: BootPattern,
    /// Slot table indices to boot. Empty boots every slot.
    pub slots: Vec<usize>,
}

impl Default for BootParams {
    fn default() -> Self {
        Self {
            force: true,
            pattern: BootPattern::ALL,
            slots: Vec::new(),
        }
    }
}

/// Module and channel pairs a parameter copy writes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CopyDestinations {
    cells: BTreeSet<(usize, usize)>,
}

impl CopyDestinations {
    /// No destinations.
    pub fn new() -> Self {
        Self::default()
    }

    /// Destinations from a module by channel grid.
    pub fn from_grid(grid: &[Vec<bool>]) -> Self {
        let cells = grid
            .iter()
            .enumerate()
            .flat_map(|(module, channels)| {
                channels
                    .iter()
                    .enumerate()
                    .filter(|(_, set)| **set)
                    .map(move |(channel, _)| (module, channel))
            })
            .collect();
        Self { cells }
    }

    /// Add a destination.
    pub fn add(&mut self, module: usize, channel: usize) -> &mut Self {
        self.cells.insert((module, channel));
        self
    }

    /// Every channel of `module`.
    pub fn add_module(&mut self, module: usize, num_channels: usize) -> &mut Self {
        self.cells.extend((0..num_channels).map(|channel| (module, channel)));
        self
    }

    /// True if `(module, channel)` is a destination.
    pub fn contains(&self, module: usize, channel: usize) -> bool {
        self.cells.contains(&(module, channel))
    }

    /// Destinations in module then channel order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.cells.iter().copied()
    }

    /// No destinations selected.
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

/// Module counts. `online + offline == present` between operations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CrateCounts {
    /// Devices that answered the probe.
    pub present: usize,
    /// Present modules that are online.
    pub online: usize,
    /// Present modules that are not online.
    pub offline: usize,
}

#[derive(Debug, Default)]
struct SlotTable {
    modules: Vec<Module>,
    /// Table index of each module number.
    numbers: Vec<usize>,
    counts: CrateCounts,
    revision: Option<u32>,
}

impl SlotTable {
    fn index(&self, number: usize) -> Result<usize> {
        self.numbers.get(number).copied().ok_or_else(|| {
            PixieError::new(
                ErrorCode::ModuleNumberInvalid,
                format!("crate: invalid module number: {number}"),
            )
        })
    }

    fn online_indices(&self) -> Vec<usize> {
        self.numbers
            .iter()
            .copied()
            .filter(|&index| self.modules[index].online())
            .collect()
    }

    fn recount(&mut self) {
        let mut counts = CrateCounts::default();
        for module in self.modules.iter().filter(|m| m.present()) {
            counts.present += 1;
            if module.online() {
                counts.online += 1;
            } else {
                counts.offline += 1;
            }
        }
        self.counts = counts;
    }

    /// Swap modules so each sits at the table index of its slot. A slot with
    /// no module takes a module with no valid slot.
    fn move_modules_to_slots(&mut self) {
        let num_slots = self.modules.len();
        for slot in 0..num_slots {
            let found = (slot..num_slots).find(|&check| self.modules[check].slot == slot);
            match found {
                Some(check) => {
                    if check != slot {
                        debug!("crate: slot {slot}: moved from table index {check}");
                        self.modules.swap(slot, check);
                    }
                }
                None => {
                    if self.modules[slot].slot_valid()
                        && let Some(check) =
                            (slot + 1..num_slots).find(|&check| !self.modules[check].slot_valid())
                    {
                        self.modules.swap(slot, check);
                    }
                }
            }
        }
    }

    fn check_revision(&mut self) {
        self.revision = None;
        for module in self.modules.iter().filter(|m| m.opened()) {
            match self.revision {
                None => {
                    info!("crate: crate revision: {}", module.crate_revision);
                    self.revision = Some(module.crate_revision);
                }
                Some(revision) if revision != module.crate_revision => {
                    warn!(
                        "crate: crate revision mismatch: {} module slot={}",
                        module.crate_revision, module.slot
                    );
                }
                Some(_) => {}
            }
        }
    }

    /// Table index pairs of opened modules reporting the same slot, one pair
    /// per slot.
    fn duplicate_slots(&self) -> Vec<(usize, usize)> {
        let mut dups: Vec<(usize, usize)> = Vec::new();
        for (i, module) in self.modules.iter().enumerate() {
            if !module.opened() {
                continue;
            }
            for (j, compare) in self.modules.iter().enumerate() {
                if i == j || !compare.opened() || module.slot != compare.slot {
                    continue;
                }
                if !dups.iter().any(|&(d, _)| self.modules[d].slot == module.slot) {
                    dups.push((i, j));
                }
            }
        }
        dups
    }

    /// Report duplicate slots. On the quirk crate revision a slot 5 module
    /// sharing a PCI bus with its duplicate moves to slot 4 if either sits
    /// in PCI slot 13.
    fn check_slots(&mut self) {
        for (a, b) in self.duplicate_slots() {
            if self.revision == Some(QUIRK_CRATE_REVISION) {
                let (m1, m2) = (&self.modules[a], &self.modules[b]);
                if m1.slot == 5 && m1.pci_bus == m2.pci_bus {
                    if m1.pci_slot == 13 {
                        info!("crate: slot 5 on PCI slot 13 renumbered to slot 4");
                        self.modules[a].slot = 4;
                    } else if m2.pci_slot == 13 {
                        info!("crate: slot 5 on PCI slot 13 renumbered to slot 4");
                        self.modules[b].slot = 4;
                    }
                }
            }
            let (m1, m2) = (&self.modules[a], &self.modules[b]);
            if m1.slot == m2.slot {
                error!(
                    "crate: duplicate slot: {} 1:pci={}:{} 2:pci={}:{}",
                    m1.slot, m1.pci_bus, m1.pci_slot, m2.pci_bus, m2.pci_slot
                );
            }
        }
    }

    /// Number modules by the slot map, or in slot order without one. Opened
    /// modules left out of the map are closed.
    fn assign_numbers(&mut self, slot_map: &[usize]) -> Result<()> {
        self.numbers.clear();
        if slot_map.is_empty() {
            for (index, module) in self.modules.iter_mut().enumerate() {
                if module.opened() {
                    module.number = self.numbers.len();
                    self.numbers.push(index);
                }
            }
        } else {
            for (number, &slot) in slot_map.iter().enumerate() {
                let index = self
                    .modules
                    .iter()
                    .position(|m| m.opened() && m.slot == slot)
                    .ok_or_else(|| {
                        PixieError::new(
                            ErrorCode::ModuleNumberInvalid,
                            format!("crate: slot map references empty slot: {slot}"),
                        )
                    })?;
                self.modules[index].number = number;
                self.numbers.push(index);
            }
            for index in 0..self.modules.len() {
                if self.modules[index].opened() && !self.numbers.contains(&index) {
                    info!("crate: slot {} not in slot map, closing", self.modules[index].slot);
                    self.modules[index].close()?;
                }
            }
        }
        info!(
            "crate: module map: {}",
            self.numbers
                .iter()
                .enumerate()
                .map(|(number, &index)| format!("{}->{number}", self.modules[index].slot))
                .collect::<Vec<_>>()
                .join(" ")
        );
        Ok(())
    }
}

/// Counts a caller inside a guarded operation until dropped.
struct UserToken<'a>(&'a AtomicUsize);

impl<'a> UserToken<'a> {
    fn new(users: &'a AtomicUsize) -> Self {
        users.fetch_add(1, Ordering::SeqCst);
        Self(users)
    }
}

impl Drop for UserToken<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Exclusive access to one module of a crate.
pub struct ModuleGuard<'a> {
    table: MutexGuard<'a, SlotTable>,
    index: usize,
    _user: UserToken<'a>,
}

impl Deref for ModuleGuard<'_> {
    type Target = Module;

    fn deref(&self) -> &Module {
        &self.table.modules[self.index]
    }
}

impl DerefMut for ModuleGuard<'_> {
    fn deref_mut(&mut self) -> &mut Module {
        &mut self.table.modules[self.index]
    }
}

/// Run `work` on every module `select` picks, one thread per module. Every
/// worker runs to completion; the first error in table order is returned.
fn for_each_concurrent<S, W>(modules: &mut [Module], select: S, work: W) -> Result<usize>
where
    S: Fn(usize, &Module) -> bool,
    W: Fn(&mut Module) -> Result<()> + Sync,
{
    let work = &work;
    let results: Vec<Result<()>> = thread::scope(|scope| {
        let handles: Vec<_> = modules
            .iter_mut()
            .enumerate()
            .filter(|(index, module)| select(*index, module))
            .map(|(_, module)| scope.spawn(move || work(module)))
            .collect();
        handles
            .into_iter()
            .map(|handle| {
                handle.join().unwrap_or_else(|_| {
                    Err(PixieError::new(ErrorCode::InternalFailure, "crate: worker panicked"))
                })
            })
            .collect()
    });
    let workers = results.len();
    results.into_iter().collect::<Result<Vec<()>>>()?;
    Ok(workers)
}

/// A crate of modules.
pub struct PixieCrate {
    config: CrateConfig,
    registry: DriverRegistry,
    firmware: FirmwareCatalog,
    backplane: Arc<Backplane>,
    table: Mutex<SlotTable>,
    ready: AtomicBool,
    users: AtomicUsize,
}

impl PixieCrate {
    /// A crate using the built-in drivers.
    ///
    /// # Errors
    /// `ConfigInvalid` for an invalid configuration, unknown driver or
    /// inconsistent firmware entries.
    pub fn new(config: CrateConfig) -> Result<Self> {
        Self::with_registry(config, DriverRegistry::with_builtin())
    }

    /// A crate creating module backends from `registry`.
    pub fn with_registry(config: CrateConfig, registry: DriverRegistry) -> Result<Self> {
        config.validate()?;
        registry.get_factory(&config.crate_.driver).ok_or_else(|| {
            PixieError::new(
                ErrorCode::ConfigInvalid,
                format!("driver not found: {}", config.crate_.driver),
            )
        })?;
        let firmware = FirmwareCatalog::from_entries(&config.firmware)?;
        info!(
            "crate: driver={} firmware-sets={} offline={}",
            config.crate_.driver,
            firmware.len(),
            config.crate_.offline
        );
        Ok(Self {
            config,
            registry,
            firmware,
            backplane: Arc::new(Backplane::new()),
            table: Mutex::new(SlotTable::default()),
            ready: AtomicBool::new(false),
            users: AtomicUsize::new(0),
        })
    }

    /// Crate configuration.
    pub fn config(&self) -> &CrateConfig {
        &self.config
    }

    /// Firmware catalog.
    pub fn firmware(&self) -> &FirmwareCatalog {
        &self.firmware
    }

    /// Backplane shared by the modules.
    pub fn backplane(&self) -> &Arc<Backplane> {
        &self.backplane
    }

    /// Initialised and not shut down.
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    /// Callers holding module access.
    pub fn users(&self) -> usize {
        self.users.load(Ordering::SeqCst)
    }

    /// Some caller holds module access.
    pub fn busy(&self) -> bool {
        self.users() > 0
    }

    fn ready(&self) -> Result<()> {
        if !self.is_ready() {
            return Err(PixieError::new(ErrorCode::CrateNotReady, "crate is not ready"));
        }
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, SlotTable>> {
        self.table
            .lock()
            .map_err(|_| PixieError::new(ErrorCode::InternalFailure, "crate: lock poisoned"))
    }

    fn lock_ready(&self) -> Result<MutexGuard<'_, SlotTable>> {
        self.ready()?;
        self.lock()
    }

    /// Module counts.
    pub fn counts(&self) -> Result<CrateCounts> {
        Ok(self.lock()?.counts)
    }

    /// Modules with a number.
    pub fn num_modules(&self) -> Result<usize> {
        Ok(self.lock()?.numbers.len())
    }

    /// Backplane revision of the first opened module.
    pub fn revision(&self) -> Result<Option<u32>> {
        Ok(self.lock()?.revision)
    }

    /// Physical slot of each module number.
    pub fn slots(&self) -> Result<Vec<usize>> {
        let table = self.lock()?;
        Ok(table.numbers.iter().map(|&i| table.modules[i].slot).collect())
    }

    // ─── Lifecycle ──────────────────────────────────────────────────

    /// Probe the devices, reconcile slots and assign firmware.
    ///
    /// # Errors
    /// `CrateAlreadyOpen` if called again before [`PixieCrate::shutdown`].
    /// A device that fails to open is logged and left unopened.
    pub fn initialize(&self) -> Result<()> {
        info!("crate: initialise");
        if self.ready.swap(true, Ordering::SeqCst) {
            return Err(PixieError::new(
                ErrorCode::CrateAlreadyOpen,
                "crate already initialised",
            ));
        }
        let result = self.lock().and_then(|mut table| self.bring_up(&mut table));
        if result.is_err() {
            self.ready.store(false, Ordering::SeqCst);
        }
        result
    }

    fn placeholder(&self) -> Result<Module> {
        let hw = self.registry.create_driver(&self.config.crate_.driver)?;
        Ok(Module::new(
            hw,
            Arc::clone(&self.backplane),
            self.config.fifo,
            self.config.crate_.offline,
        ))
    }

    fn bring_up(&self, table: &mut SlotTable) -> Result<()> {
        table.modules = (0..MAX_SLOTS)
            .map(|_| self.placeholder())
            .collect::<Result<Vec<_>>>()?;
        table.numbers.clear();

        let mut num_present = 0;
        for device_number in 0..MAX_SLOTS {
            let module = &mut table.modules[device_number];
            if let Err(e) = module.open(device_number, &self.config) {
                error!("module: device {device_number}: error: {e}");
            }
            if !module.present() {
                break;
            }
            num_present += 1;
        }
        debug!("crate: devices present: {num_present}");

        table.move_modules_to_slots();
        table.check_revision();
        table.check_slots();
        table.assign_numbers(&self.config.crate_.slot_map)?;
        table.recount();

        for module in table.modules.iter().filter(|m| m.present()) {
            match module.device_number {
                Some(device) if module.opened() => info!(
                    "slot: device {device}: slot:{} serial-number:{} online:{}",
                    module.slot,
                    module.serial_num,
                    module.online()
                ),
                _ => info!("slot: device present but not opened"),
            }
        }

        self.backplane.init(table.counts.present)?;
        self.assign_firmware(table);
        Ok(())
    }

    /// Close every module.
    ///
    /// # Errors
    /// `ModuleTotalInvalid` if the counts do not balance afterwards,
    /// otherwise the first close error.
    pub fn shutdown(&self) -> Result<()> {
        info!("crate: shutdown");
        let mut table = self.lock()?;
        let mut first_error = None;
        let mut counts = table.counts;
        for module in table.modules.iter_mut() {
            let was_present = module.present();
            let was_online = module.online();
            match module.close() {
                Ok(()) => {
                    if was_present && was_online {
                        counts.online = counts.online.saturating_sub(1);
                        counts.offline += 1;
                    }
                }
                Err(e) => {
                    error!("crate: shutdown: {e}");
                    first_error.get_or_insert(e);
                }
            }
        }
        table.counts = counts;
        if counts.online > 0 {
            return Err(PixieError::new(
                ErrorCode::ModuleTotalInvalid,
                "crate shutdown online count not 0",
            ));
        }
        if counts.offline != counts.present {
            return Err(PixieError::new(
                ErrorCode::ModuleTotalInvalid,
                "crate shutdown offline count not present count",
            ));
        }
        table.modules.clear();
        table.numbers.clear();
        self.backplane.clear()?;
        self.ready.store(false, Ordering::SeqCst);
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Refresh the online state of every opened module. Returns `true` when
    /// every present module is online.
    pub fn probe(&self) -> Result<bool> {
        let mut table = self.lock_ready()?;
        info!("crate: probe: {}", table.modules.len());
        for module in table.modules.iter_mut().filter(|m| m.opened()) {
            module.probe()?;
        }
        table.recount();
        self.backplane_reinit(&mut table)?;
        Ok(table.counts.online == table.counts.present)
    }

    /// Boot the selected modules concurrently.
    ///
    /// Unopened modules, modules with no revision and, without
    /// `params.force`, online modules are skipped. Every worker finishes
    /// and the counts are updated before the first error is returned. A
    /// worker error wins over a backplane error.
    pub fn boot(&self, params: &BootParams) -> Result<()> {
        info!(
            "crate: boot: force={} pattern={:?} slots={:?}",
            params.force, params.pattern, params.slots
        );
        if let Some(&bad) = params.slots.iter().find(|&&slot| slot >= MAX_SLOTS) {
            return Err(PixieError::new(
                ErrorCode::ModuleNumberInvalid,
                format!("invalid boot slot number: {bad}"),
            ));
        }
        let mut table = self.lock_ready()?;
        let before: Vec<(bool, bool)> = table
            .modules
            .iter()
            .map(|m| (m.present(), m.online()))
            .collect();

        let pattern = params.pattern;
        let result = for_each_concurrent(
            &mut table.modules,
            |index, module| {
                (params.slots.is_empty() || params.slots.contains(&index))
                    && module.opened()
                    && module.revision != 0
                    && (params.force || !module.online())
            },
            |module| module.boot(pattern),
        );

        let mut counts = table.counts;
        for (module, &(present, online)) in table.modules.iter().zip(&before) {
            if present && module.online() != online {
                if online {
                    counts.online = counts.online.saturating_sub(1);
                    counts.offline += 1;
                } else {
                    counts.online += 1;
                    counts.offline = counts.offline.saturating_sub(1);
                }
            }
        }
        table.counts = counts;

        let reinit = self.backplane_reinit(&mut table);
        let workers = result?;
        reinit?;
        info!(
            "crate: boot: modules={workers} online={} offline={}",
            counts.online, counts.offline
        );
        Ok(())
    }

    /// Assign each opened module the catalog firmware set for its tag.
    /// Modules whose channels disagree on ADC rate or bits get none.
    pub fn set_firmware(&self) -> Result<()> {
        let mut table = self.lock_ready()?;
        self.assign_firmware(&mut table);
        Ok(())
    }

    fn assign_firmware(&self, table: &mut SlotTable) {
        info!("crate: set firmware");
        for module in table.modules.iter_mut().filter(|m| m.opened()) {
            let Some(config) = module.configs.first().copied() else {
                warn!("{}no firmware set", module.label());
                continue;
            };
            let mixed = module
                .configs
                .iter()
                .any(|c| c.adc_msps != config.adc_msps || c.adc_bits != config.adc_bits);
            if mixed {
                warn!("{}crate: channels differ in ADC rate or bits, no firmware", module.label());
                module.firmware = None;
                continue;
            }
            let fw_tag = tag(module.revision, config.adc_msps, config.adc_bits);
            match self.firmware.find(&fw_tag, None, module.slot) {
                Ok(set) => {
                    debug!("{}firmware: {fw_tag}", module.label());
                    module.firmware = Some(set);
                }
                Err(e) => {
                    warn!("{}crate: module firmware not found: {fw_tag}: {e}", module.label());
                }
            }
        }
    }

    fn backplane_reinit(&self, table: &mut SlotTable) -> Result<()> {
        self.backplane.init(table.counts.present)?;
        for module in table.modules.iter_mut().filter(|m| m.online()) {
            let synch_wait = module.read_var(ModuleVar::SynchWait, 0, false)?;
            self.backplane.sync_wait(module.slot, synch_wait)?;
        }
        Ok(())
    }

    /// Clear a module's forced offline state.
    pub fn set_online(&self, number: usize) -> Result<()> {
        let mut table = self.lock_ready()?;
        let index = table.index(number)?;
        let module = &mut table.modules[index];
        if module.online() {
            return Err(module_error(
                module,
                ErrorCode::ModuleInvalidOperation,
                "module not seen as offline",
            ));
        }
        info!("crate: set online: slot={}", module.slot);
        module.force_online()?;
        table.recount();
        Ok(())
    }

    /// Force a module offline without closing it.
    pub fn set_offline(&self, number: usize) -> Result<()> {
        let mut table = self.lock_ready()?;
        let index = table.index(number)?;
        let module = &mut table.modules[index];
        if !module.online() {
            return Err(module_error(
                module,
                ErrorCode::ModuleInvalidOperation,
                "module not seen as online",
            ));
        }
        info!("crate: set offline: slot={}", module.slot);
        module.force_offline()?;
        table.recount();
        Ok(())
    }

    // ─── Module access ──────────────────────────────────────────────

    /// Exclusive access to module `number`.
    ///
    /// # Errors
    /// `CrateNotReady` before initialisation, `ModuleNumberInvalid` for an
    /// unknown number.
    pub fn module(&self, number: usize) -> Result<ModuleGuard<'_>> {
        self.ready()?;
        let user = UserToken::new(&self.users);
        let table = self.lock()?;
        let index = table.index(number)?;
        Ok(ModuleGuard {
            table,
            index,
            _user: user,
        })
    }

    /// Read a module parameter.
    pub fn read_module_param(&self, number: usize, par: ModuleParam) -> Result<Word> {
        self.module(number)?.read_param(par)
    }

    /// Write a module parameter. Broadcast parameters are written to every
    /// other online module as well.
    pub fn write_module_param(&self, number: usize, par: ModuleParam, value: Word) -> Result<()> {
        let _user = UserToken::new(&self.users);
        let mut table = self.lock_ready()?;
        let index = table.index(number)?;
        if table.modules[index].write_param(par, value)? {
            debug!("crate: broadcast {par} = {value}");
            for other in table.online_indices() {
                if other != index {
                    table.modules[other].write_param(par, value)?;
                }
            }
        }
        Ok(())
    }

    /// Read a channel parameter.
    pub fn read_channel_param(
        &self,
        number: usize,
        par: ChannelParam,
        channel: usize,
    ) -> Result<f64> {
        self.module(number)?.channel(channel)?.read(par)
    }

    /// Write a channel parameter.
    pub fn write_channel_param(
        &self,
        number: usize,
        par: ChannelParam,
        channel: usize,
        value: f64,
    ) -> Result<()> {
        self.module(number)?.channel(channel)?.write(par, value)
    }

    /// End the run on every online module. With sync wait active the
    /// director ends first.
    pub fn end_run(&self) -> Result<()> {
        let _user = UserToken::new(&self.users);
        let mut table = self.lock_ready()?;
        let mut order = table.online_indices();
        if self.backplane.sync_waits() > 0
            && let Some(leader) = self.backplane.director.slot().or(self.backplane.run.slot())
            && let Some(pos) = order.iter().position(|&i| table.modules[i].slot == leader)
        {
            let index = order.remove(pos);
            order.insert(0, index);
        }
        info!("crate: end run: modules={}", order.len());
        let mut first_error = None;
        for index in order {
            if let Err(e) = table.modules[index].run_end() {
                error!("{}end run: {e}", table.modules[index].label());
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Copy the channel variables `mask` selects from a source channel to
    /// every destination, then reprogram the destination modules.
    pub fn copy_parameters(
        &self,
        mask: CopyMask,
        source: (usize, usize),
        destinations: &CopyDestinations,
    ) -> Result<()> {
        let _user = UserToken::new(&self.users);
        let mut table = self.lock_ready()?;
        let (source_number, source_channel) = source;
        let source_index = table.index(source_number)?;
        let values = channel_values(&mut table.modules[source_index], source_channel)?;
        info!(
            "crate: copy parameters: mask={:#x} source={source_number}:{source_channel} \
             destinations={}",
            mask.bits(),
            destinations.iter().count()
        );

        let mut touched = BTreeSet::new();
        for (number, channel) in destinations.iter() {
            if (number, channel) == source {
                continue;
            }
            let index = table.index(number)?;
            let module = &mut table.modules[index];
            let current = channel_values(module, channel)?;
            let mut updated = current.clone();
            copy_channel_values(mask, &values, &mut updated);
            for &var in ChannelVar::ALL {
                let i = var.index();
                if updated[i] != current[i] {
                    module.write_channel_var(var, updated[i], channel, 0, true)?;
                }
            }
            touched.insert(index);
        }

        for index in touched {
            let module = &mut table.modules[index];
            if module.hardware_accessible() {
                module.program_fippi()?;
                module.set_dacs()?;
            }
        }
        Ok(())
    }

    // ─── Settings ───────────────────────────────────────────────────

    /// Load a settings file into the online modules in slot order. Returns
    /// the `(number, slot)` of each module loaded.
    pub fn import_config(
        &self,
        store: &dyn SettingsStore,
        path: &Path,
    ) -> Result<Vec<(usize, usize)>> {
        info!("crate: import configuration: {}", path.display());
        let settings = store.load(path)?;
        let mut table = self.lock_ready()?;
        let mut loaded = Vec::new();
        let mut entries = settings.iter();
        for module in table.modules.iter_mut().filter(|m| m.online()) {
            let Some(entry) = entries.next() else {
                warn!("{}settings: no entry for module", module.label());
                break;
            };
            entry.apply(module)?;
            loaded.push((module.number, module.slot));
        }
        if entries.next().is_some() {
            warn!("crate: settings: more entries than online modules");
        }
        for module in table.modules.iter_mut().filter(|m| m.online()) {
            module.sync_vars(SyncDirection::ToHardware)?;
        }
        self.backplane_reinit(&mut table)?;
        Ok(loaded)
    }

    /// Save every online module's writable variables, in number order.
    pub fn export_config(&self, store: &dyn SettingsStore, path: &Path) -> Result<()> {
        info!("crate: export configuration: {}", path.display());
        let mut table = self.lock_ready()?;
        let mut settings = Vec::new();
        for index in table.online_indices() {
            settings.push(ModuleSettings::from_module(&mut table.modules[index])?);
        }
        store.save(path, &settings)
    }

    /// Synchronise the analog front end of every online module
    /// concurrently.
    pub fn initialize_afe(&self) -> Result<()> {
        info!("crate: initializing analog front-end");
        let mut table = self.lock_ready()?;
        let workers = for_each_concurrent(&mut table.modules, |_, m| m.online(), Module::sync_hw)?;
        debug!("crate: analog front-end: modules={workers}");
        Ok(())
    }
}

fn module_error(module: &Module, code: ErrorCode, message: &str) -> PixieError {
    PixieError::module(module.number, module.slot, code, message)
}

/// Cached channel variable values indexed by variable ordinal. Disabled
/// variables read as zero.
fn channel_values(module: &mut Module, channel: usize) -> Result<Vec<Word>> {
    if channel >= module.num_channels {
        return Err(module_error(
            module,
            ErrorCode::ChannelNumberInvalid,
            &format!("copy: invalid channel: {channel}"),
        ));
    }
    let mut values = vec![0; ChannelVar::COUNT];
    for &var in ChannelVar::ALL {
        if module.descriptors.channel_var(var).enabled() {
            values[var.index()] = module.read_channel_var(var, channel, 0, false)?;
        }
    }
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pixie_common::consts::revision;
    use pixie_hal::drivers::simulation::write_firmware_set;
    use tempfile::TempDir;

    fn write_crate_config(dir: &TempDir, modules: &[&str]) -> CrateConfig {
        let mut config = CrateConfig::default();
        config.firmware =
            write_firmware_set(dir.path(), revision::REV_F, 250, 16, 16, Some("r1")).unwrap();
        config.simulation.modules = modules
            .iter()
            .map(|def| {
                format!(
                    "{def},revision=15,num-channels=16,adc-bits=16,adc-msps=250,adc-clk-div=2"
                )
            })
            .collect();
        config
    }

    #[test]
    fn modules_move_to_their_slots() {
        let dir = TempDir::new().unwrap();
        let config = write_crate_config(
            &dir,
            &["device-number=0,slot=7", "device-number=1,slot=2", "device-number=2,slot=4"],
        );
        let pixie = PixieCrate::new(config).unwrap();
        pixie.initialize().unwrap();
        assert_eq!(pixie.slots().unwrap(), vec![2, 4, 7]);
        let counts = pixie.counts().unwrap();
        assert_eq!(counts.present, 3);
        assert_eq!(counts.offline, 3);
        assert_eq!(pixie.module(1).unwrap().slot, 4);
        assert_eq!(pixie.module(1).unwrap().number, 1);
    }

    #[test]
    fn slot_map_numbers_modules() {
        let dir = TempDir::new().unwrap();
        let mut config = write_crate_config(
            &dir,
            &["device-number=0,slot=2", "device-number=1,slot=3", "device-number=2,slot=5"],
        );
        config.crate_.slot_map = vec![5, 2];
        let pixie = PixieCrate::new(config).unwrap();
        pixie.initialize().unwrap();
        assert_eq!(pixie.slots().unwrap(), vec![5, 2]);
        assert_eq!(pixie.counts().unwrap().present, 2);
        assert_eq!(
            pixie.module(2).err().unwrap().code,
            ErrorCode::ModuleNumberInvalid
        );
    }

    #[test]
    fn slot_map_to_empty_slot_fails_initialize() {
        let dir = TempDir::new().unwrap();
        let mut config = write_crate_config(&dir, &["device-number=0,slot=2"]);
        config.crate_.slot_map = vec![9];
        let pixie = PixieCrate::new(config).unwrap();
        let err = pixie.initialize().unwrap_err();
        assert_eq!(err.code, ErrorCode::ModuleNumberInvalid);
        assert!(!pixie.is_ready());
    }

    #[test]
    fn quirk_revision_renumbers_slot_five() {
        let dir = TempDir::new().unwrap();
        let config = write_crate_config(
            &dir,
            &[
                "device-number=0,slot=5,pci-bus=1,pci-slot=12,crate-revision=2",
                "device-number=1,slot=5,pci-bus=1,pci-slot=13,crate-revision=2",
            ],
        );
        let pixie = PixieCrate::new(config).unwrap();
        pixie.initialize().unwrap();
        let mut slots = pixie.slots().unwrap();
        slots.sort();
        assert_eq!(slots, vec![4, 5]);
        assert_eq!(pixie.revision().unwrap(), Some(2));
    }

    #[test]
    fn duplicate_slots_kept_on_other_revisions() {
        let dir = TempDir::new().unwrap();
        let config = write_crate_config(
            &dir,
            &[
                "device-number=0,slot=5,pci-bus=1,pci-slot=12,crate-revision=1",
                "device-number=1,slot=5,pci-bus=1,pci-slot=13,crate-revision=1",
            ],
        );
        let pixie = PixieCrate::new(config).unwrap();
        pixie.initialize().unwrap();
        assert_eq!(pixie.slots().unwrap(), vec![5, 5]);
    }

    #[test]
    fn not_ready_before_initialize() {
        let dir = TempDir::new().unwrap();
        let config = write_crate_config(&dir, &["device-number=0,slot=2"]);
        let pixie = PixieCrate::new(config).unwrap();
        assert_eq!(pixie.module(0).err().unwrap().code, ErrorCode::CrateNotReady);
        assert_eq!(
            pixie.boot(&BootParams::default()).unwrap_err().code,
            ErrorCode::CrateNotReady
        );
    }

    #[test]
    fn unknown_driver_rejected() {
        let dir = TempDir::new().unwrap();
        let mut config = write_crate_config(&dir, &["device-number=0,slot=2"]);
        config.crate_.driver = "pcie".into();
        let err = PixieCrate::new(config).err().unwrap();
        assert_eq!(err.code, ErrorCode::ConfigInvalid);
    }

    #[test]
    fn guard_counts_users() {
        let dir = TempDir::new().unwrap();
        let config = write_crate_config(&dir, &["device-number=0,slot=2"]);
        let pixie = PixieCrate::new(config).unwrap();
        pixie.initialize().unwrap();
        {
            let _module = pixie.module(0).unwrap();
            assert!(pixie.busy());
        }
        assert_eq!(pixie.users(), 0);
    }

    #[test]
    fn boot_slot_out_of_range() {
        let dir = TempDir::new().unwrap();
        let config = write_crate_config(&dir, &["device-number=0,slot=2"]);
        let pixie = PixieCrate::new(config).unwrap();
        pixie.initialize().unwrap();
        let params = BootParams {
            slots: vec![MAX_SLOTS],
            ..BootParams::default()
        };
        assert_eq!(
            pixie.boot(&params).unwrap_err().code,
            ErrorCode::ModuleNumberInvalid
        );
    }

    #[test]
    fn forced_offline_and_back() {
        let dir = TempDir::new().unwrap();
        let config = write_crate_config(&dir, &["device-number=0,slot=2", "device-number=1,slot=3"]);
        let pixie = PixieCrate::new(config).unwrap();
        pixie.initialize().unwrap();
        pixie.boot(&BootParams::default()).unwrap();
        assert!(pixie.probe().unwrap());

        pixie.set_offline(1).unwrap();
        assert_eq!(pixie.counts().unwrap().offline, 1);
        assert!(!pixie.probe().unwrap());
        assert_eq!(
            pixie.set_offline(1).unwrap_err().code,
            ErrorCode::ModuleInvalidOperation
        );
        pixie.set_online(1).unwrap();
        assert!(pixie.probe().unwrap());
    }

    #[test]
    fn mixed_adc_configs_get_no_firmware() {
        let dir = TempDir::new().unwrap();
        let config = write_crate_config(&dir, &["device-number=0,slot=2", "device-number=1,slot=3"]);
        let pixie = PixieCrate::new(config).unwrap();
        pixie.initialize().unwrap();
        pixie.module(1).unwrap().configs[4].adc_msps = 500;
        pixie.set_firmware().unwrap();
        assert!(pixie.module(0).unwrap().firmware.is_some());
        assert!(pixie.module(1).unwrap().firmware.is_none());

        let err = pixie.boot(&BootParams::default()).unwrap_err();
        assert_eq!(err.code, ErrorCode::ModuleInvalidFirmware);
        assert_eq!(err.slot, Some(3));
        assert!(pixie.module(0).unwrap().online());
    }

    #[test]
    fn shutdown_rejects_unbalanced_counts() {
        let dir = TempDir::new().unwrap();
        let config = write_crate_config(&dir, &["device-number=0,slot=2", "device-number=1,slot=3"]);
        let pixie = PixieCrate::new(config).unwrap();
        pixie.initialize().unwrap();
        pixie.boot(&BootParams::default()).unwrap();
        pixie.table.lock().unwrap().counts.online += 1;

        let err = pixie.shutdown().unwrap_err();
        assert_eq!(err.code, ErrorCode::ModuleTotalInvalid);
        let table = pixie.table.lock().unwrap();
        assert!(table.modules.iter().all(|m| !m.online()));
        assert_eq!(table.counts.online, 1);
    }

    #[test]
    fn destinations_from_grid() {
        let grid = vec![vec![false, true], vec![true, false, true]];
        let dest = CopyDestinations::from_grid(&grid);
        assert_eq!(dest.iter().collect::<Vec<_>>(), vec![(0, 1), (1, 0), (1, 2)]);
        let mut dest = CopyDestinations::new();
        dest.add(2, 1).add_module(0, 2);
        assert!(dest.contains(0, 1));
        assert!(!dest.contains(2, 0));
    }
}
