//! Simulated module implementation.
//!
//! The `SimulatedModule` implements the `ModuleHardware` trait with DSP
//! memory held in process. Control tasks complete as soon as they start. A
//! run stays active until it is ended and advances the run counters on
//! every status or FIFO poll.

use super::defs::{ModuleDef, VarDefaults, parse_module_defs};
use super::memory::{DspMemory, HwFifo, Noise, Regions};
use pixie_common::config::CrateConfig;
use pixie_common::consts::{Address, FIFO_SIZE_WORDS, IO_BUFFER_LENGTH, SYSTEM_CLOCK_MHZ, Word};
use pixie_common::error::{ErrorCode, PixieError, Result};
use pixie_common::hw::{
    AdcConfig, ControlTask, DeviceInfo, Loaded, MemoryRegion, ModuleHardware, RunMode, RunTask,
};
use pixie_common::param::{ChannelVar, Descriptors, ModuleVar};
use tracing::{debug, info};

/// List-mode words generated per poll when not configured.
pub const DEFAULT_WORDS_PER_POLL: usize = 512;

/// System clock ticks a poll advances the run by (1 ms).
const TICKS_PER_POLL: u64 = (SYSTEM_CLOCK_MHZ * 1000.0) as u64;

/// Words in one list-mode event record.
const EVENT_WORDS: usize = 4;

/// Values the DSP holds after boot when nothing else sets them.
const POWER_ON_MODULE: &[(ModuleVar, Word)] = &[
    (ModuleVar::SlowFilterRange, 2),
    (ModuleVar::FastFilterRange, 0),
    (ModuleVar::FIFOLength, 8188),
    (ModuleVar::HardwareID, 0xa1),
    (ModuleVar::DSPrelease, 0x0350),
    (ModuleVar::DSPbuild, 1),
];

const POWER_ON_CHANNEL: &[(ChannelVar, Word)] = &[
    (ChannelVar::FastLength, 10),
    (ChannelVar::FastGap, 10),
    (ChannelVar::FastThresh, 1000),
    (ChannelVar::SlowLength, 30),
    (ChannelVar::SlowGap, 15),
    (ChannelVar::PeakSep, 45),
    (ChannelVar::PeakSample, 43),
    (ChannelVar::TraceLength, 500),
    (ChannelVar::TriggerDelay, 176),
    (ChannelVar::PAFlength, 300),
    (ChannelVar::OffsetDAC, 32768),
    (ChannelVar::BaselinePercent, 10),
    (ChannelVar::CFDDelay, 8),
    (ChannelVar::CFDThresh, 120),
    (ChannelVar::ExtTrigStretch, 150),
    (ChannelVar::ChanTrigStretch, 150),
    (ChannelVar::VetoStretch, 150),
    (ChannelVar::FastTrigBackLen, 10),
    (ChannelVar::QDCLen0, 10),
];

#[derive(Debug)]
struct Opened {
    def: ModuleDef,
    defaults: VarDefaults,
    words_per_poll: usize,
    memory: DspMemory,
    regions: Regions,
    fifo: HwFifo,
    descriptors: Option<Descriptors>,
    noise: Noise,
    run: Option<RunTask>,
    event: Word,
}

/// Simulated module hardware.
#[derive(Debug, Default)]
pub struct SimulatedModule {
    opened: Option<Opened>,
    loaded: Loaded,
}

impl SimulatedModule {
    /// Create an unopened module.
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&mut self) -> Result<&mut Opened> {
        self.opened
            .as_mut()
            .ok_or_else(|| PixieError::new(ErrorCode::DeviceHwFailure, "sim: module not open"))
    }

    fn dsp(&mut self) -> Result<&mut Opened> {
        let loaded = self.loaded.dsp;
        let state = self.state()?;
        if !loaded {
            return Err(PixieError::module(
                state.def.device_number,
                state.def.slot,
                ErrorCode::DeviceHwFailure,
                "sim: dsp not loaded",
            ));
        }
        Ok(state)
    }

    fn check_image(&mut self, device: &str, image: &[u8]) -> Result<()> {
        let state = self.state()?;
        if image.is_empty() {
            return Err(PixieError::module(
                state.def.device_number,
                state.def.slot,
                ErrorCode::DeviceImageFailure,
                format!("sim: {device}: empty image"),
            ));
        }
        info!(
            "sim: module: device={} slot={}: boot {device}: {} bytes",
            state.def.device_number,
            state.def.slot,
            image.len()
        );
        Ok(())
    }
}

impl Opened {
    fn module_addr(&self, var: ModuleVar) -> Option<Address> {
        let desc = self.descriptors.as_ref()?.module_var(var);
        desc.enabled().then_some(desc.address)
    }

    fn channel_addr(&self, var: ChannelVar, channel: usize) -> Option<Address> {
        let desc = self.descriptors.as_ref()?.channel_var(var);
        desc.enabled()
            .then_some(desc.address + (channel * desc.size) as Address)
    }

    fn apply_defaults(&mut self) {
        let mut module: Vec<_> = POWER_ON_MODULE.to_vec();
        module.extend(self.defaults.module.iter().copied());
        for (var, value) in module {
            if let Some(addr) = self.module_addr(var) {
                self.memory.write(addr, value);
            }
        }
        let mut channel: Vec<_> = POWER_ON_CHANNEL.to_vec();
        channel.extend(self.defaults.channel.iter().copied());
        for (var, value) in channel {
            for ch in 0..self.def.num_channels {
                if let Some(addr) = self.channel_addr(var, ch) {
                    self.memory.write(addr, value);
                }
            }
        }
    }

    fn add_module_counter(&mut self, hi: ModuleVar, lo: ModuleVar, delta: u64) {
        if let (Some(hi), Some(lo)) = (self.module_addr(hi), self.module_addr(lo)) {
            self.memory.add_counter(hi, lo, delta);
        }
    }

    fn add_channel_counter(&mut self, hi: ChannelVar, lo: ChannelVar, channel: usize, delta: u64) {
        if let (Some(hi), Some(lo)) = (self.channel_addr(hi, channel), self.channel_addr(lo, channel)) {
            self.memory.add_counter(hi, lo, delta);
        }
    }

    fn reset_counters(&mut self) {
        let module = [
            (ModuleVar::RunTimeA, ModuleVar::RunTimeB),
            (ModuleVar::NumEventsA, ModuleVar::NumEventsB),
        ];
        for (hi, lo) in module {
            for var in [hi, lo] {
                if let Some(addr) = self.module_addr(var) {
                    self.memory.write(addr, 0);
                }
            }
        }
        let channel = [
            ChannelVar::LiveTimeA,
            ChannelVar::LiveTimeB,
            ChannelVar::FastPeaksA,
            ChannelVar::FastPeaksB,
            ChannelVar::ChanEventsA,
            ChannelVar::ChanEventsB,
        ];
        for ch in 0..self.def.num_channels {
            for var in channel {
                if let Some(addr) = self.channel_addr(var, ch) {
                    self.memory.write(addr, 0);
                }
            }
        }
    }

    /// Advance an active run by one poll.
    fn tick(&mut self) {
        let Some(task) = self.run else {
            return;
        };
        let channels = self.def.num_channels;
        let events_per_channel = 8u64;
        let adc = self.adc_config();
        let live_ticks = TICKS_PER_POLL * adc.adc_msps as u64
            / (SYSTEM_CLOCK_MHZ as u64 * adc.adc_clk_div.max(1) as u64);

        self.add_module_counter(ModuleVar::RealTimeA, ModuleVar::RealTimeB, TICKS_PER_POLL);
        self.add_module_counter(ModuleVar::RunTimeA, ModuleVar::RunTimeB, TICKS_PER_POLL);
        self.add_module_counter(
            ModuleVar::NumEventsA,
            ModuleVar::NumEventsB,
            events_per_channel * channels as u64,
        );
        for ch in 0..channels {
            self.add_channel_counter(ChannelVar::LiveTimeA, ChannelVar::LiveTimeB, ch, live_ticks);
            self.add_channel_counter(
                ChannelVar::FastPeaksA,
                ChannelVar::FastPeaksB,
                ch,
                events_per_channel + 2,
            );
            self.add_channel_counter(
                ChannelVar::ChanEventsA,
                ChannelVar::ChanEventsB,
                ch,
                events_per_channel,
            );
        }

        match task {
            RunTask::ListMode => {
                let events = self.words_per_poll / EVENT_WORDS;
                let mut words = Vec::with_capacity(events * EVENT_WORDS);
                for _ in 0..events {
                    let channel = self.event as usize % channels.max(1);
                    words.extend_from_slice(&[
                        (EVENT_WORDS as Word) << 17 | (self.def.slot as Word) << 4 | channel as Word,
                        self.event,
                        0,
                        self.noise.next_u32() & 0xffff,
                    ]);
                    self.event = self.event.wrapping_add(1);
                }
                self.fifo.push(words);
            }
            RunTask::Histogram => {
                for ch in 0..channels {
                    for _ in 0..events_per_channel {
                        let len = self.regions.mca[ch].len();
                        let centre = len / 4 + ch * 64;
                        let bin = (centre as f64 + self.noise.next_unit() * 32.0) as usize;
                        if let Some(count) = self.regions.mca[ch].get_mut(bin.min(len - 1)) {
                            *count += 1;
                        }
                    }
                }
            }
            RunTask::Nop => {}
        }
    }

    fn adc_config(&self) -> AdcConfig {
        AdcConfig {
            adc_bits: self.def.adc_bits,
            adc_msps: self.def.adc_msps,
            adc_clk_div: self.def.adc_clk_div,
        }
    }

    /// Baseline records: start time then blocks of time plus one IEEE float
    /// per channel.
    fn fill_baselines(&mut self) {
        let max_channels = self.def.num_channels;
        let block = 2 + max_channels;
        let records = (IO_BUFFER_LENGTH - 2) / block;
        let start: u64 = 1_000_000;
        let buffer = &mut self.regions.io_buffer;
        buffer[0] = (start >> 32) as Word;
        buffer[1] = start as Word;
        for record in 0..records {
            let offset = 2 + record * block;
            let time = start + (record as u64 + 1) * 100;
            buffer[offset] = (time >> 32) as Word;
            buffer[offset + 1] = time as Word;
            for ch in 0..max_channels {
                let level = 2000.0 + 100.0 * ch as f64;
                let value = level + 4.0 * self.noise.next_unit();
                buffer[offset + 2 + ch] = (value as f32).to_bits();
            }
        }
    }

    fn fill_traces(&mut self) {
        let full_scale = 1u32 << self.def.adc_bits.min(16);
        for (ch, trace) in self.regions.adc.iter_mut().enumerate() {
            let base = (full_scale / 8 + ch as u32 * 16) as f64;
            for word in trace.iter_mut() {
                let lo = (base + 3.0 * self.noise.next_unit()) as Word & 0xffff;
                let hi = (base + 3.0 * self.noise.next_unit()) as Word & 0xffff;
                *word = hi << 16 | lo;
            }
        }
    }
}

impl ModuleHardware for SimulatedModule {
    fn name(&self) -> &'static str {
        "simulation"
    }

    fn open(&mut self, device_number: usize, config: &CrateConfig) -> Result<Option<DeviceInfo>> {
        if let Some(state) = &self.opened {
            return Err(PixieError::module(
                state.def.device_number,
                state.def.slot,
                ErrorCode::ModuleAlreadyOpen,
                "sim: module already open",
            ));
        }

        let defs = parse_module_defs(&config.simulation.modules)?;
        let Some(def) = defs
            .into_iter()
            .find(|d| d.num_channels != 0 && d.device_number == device_number)
        else {
            return Ok(None);
        };

        info!("sim: module: open: device={device_number} slot={}", def.slot);

        let mut defaults = VarDefaults::default();
        if let Some(path) = &config.simulation.var_defaults {
            defaults.extend(VarDefaults::load(path)?);
        }
        if let Some(path) = &def.var_defaults {
            defaults.extend(VarDefaults::load(path)?);
        }

        let adc = AdcConfig {
            adc_bits: def.adc_bits,
            adc_msps: def.adc_msps,
            adc_clk_div: def.adc_clk_div,
        };
        let info = DeviceInfo {
            device_number,
            slot: def.slot,
            revision: def.revision,
            serial_num: def.serial_num,
            eeprom_format: def.eeprom_format,
            num_channels: def.num_channels,
            max_channels: def.num_channels,
            pci_bus: def.pci_bus,
            pci_slot: def.pci_slot,
            crate_revision: def.crate_revision,
            configs: vec![adc; def.num_channels],
        };

        self.opened = Some(Opened {
            regions: Regions::new(def.num_channels),
            noise: Noise::new(def.serial_num ^ (def.slot as u32) << 8 ^ 0x5eed),
            words_per_poll: config
                .simulation
                .words_per_poll
                .unwrap_or(DEFAULT_WORDS_PER_POLL),
            def,
            defaults,
            memory: DspMemory::default(),
            fifo: HwFifo::new(FIFO_SIZE_WORDS),
            descriptors: None,
            run: None,
            event: 0,
        });
        self.loaded = Loaded::default();
        Ok(Some(info))
    }

    fn close(&mut self) -> Result<()> {
        if let Some(state) = self.opened.take() {
            info!(
                "sim: module: close: device={} slot={}",
                state.def.device_number, state.def.slot
            );
        }
        self.loaded = Loaded::default();
        Ok(())
    }

    fn boot_comms(&mut self, image: &[u8]) -> Result<()> {
        self.check_image("sys", image)?;
        self.loaded.comms = true;
        Ok(())
    }

    fn boot_fippi(&mut self, image: &[u8]) -> Result<()> {
        self.check_image("fippi", image)?;
        if !self.loaded.comms {
            let state = self.state()?;
            return Err(PixieError::module(
                state.def.device_number,
                state.def.slot,
                ErrorCode::DeviceBootFailure,
                "sim: fippi: comms fpga not loaded",
            ));
        }
        self.loaded.fippi = true;
        Ok(())
    }

    fn boot_dsp(&mut self, image: &[u8], descriptors: &Descriptors) -> Result<()> {
        self.check_image("dsp", image)?;
        let state = self.state()?;
        state.memory.clear();
        state.fifo.clear();
        state.run = None;
        state.descriptors = Some(descriptors.clone());
        state.apply_defaults();
        self.loaded.dsp = true;
        Ok(())
    }

    fn loaded(&self) -> Loaded {
        self.loaded
    }

    fn read_word(&mut self, address: Address) -> Result<Word> {
        Ok(self.dsp()?.memory.read(address))
    }

    fn write_word(&mut self, address: Address, value: Word) -> Result<()> {
        self.dsp()?.memory.write(address, value);
        Ok(())
    }

    fn read_memory(&mut self, region: MemoryRegion, channel: usize, out: &mut [Word]) -> Result<()> {
        let words = self.dsp()?.regions.get(region, channel)?;
        let count = out.len().min(words.len());
        out[..count].copy_from_slice(&words[..count]);
        out[count..].fill(0);
        Ok(())
    }

    fn clear_memory(&mut self, region: MemoryRegion) -> Result<()> {
        self.dsp()?.regions.clear(region);
        Ok(())
    }

    fn start_control_task(&mut self, task: ControlTask) -> Result<()> {
        let state = self.dsp()?;
        debug!("sim: module: slot={}: control task {task:?}", state.def.slot);
        match task {
            ControlTask::GetBaselines => state.fill_baselines(),
            ControlTask::GetTraces => state.fill_traces(),
            ControlTask::FillExtFifo => state.tick(),
            _ => {}
        }
        Ok(())
    }

    fn start_run(&mut self, task: RunTask, mode: RunMode) -> Result<()> {
        let state = self.dsp()?;
        info!("sim: module: slot={}: start run {task:?} {mode:?}", state.def.slot);
        if mode == RunMode::NewRun {
            state.reset_counters();
            state.event = 0;
        }
        state.run = (task != RunTask::Nop).then_some(task);
        Ok(())
    }

    fn end_run(&mut self) -> Result<()> {
        let state = self.dsp()?;
        if state.run.take().is_some() {
            info!("sim: module: slot={}: end run", state.def.slot);
        }
        Ok(())
    }

    fn busy(&mut self) -> Result<bool> {
        let state = self.dsp()?;
        state.tick();
        Ok(state.run.is_some())
    }

    fn fifo_level(&mut self) -> Result<usize> {
        let state = self.dsp()?;
        state.tick();
        Ok(state.fifo.level())
    }

    fn fifo_read(&mut self, out: &mut [Word]) -> Result<usize> {
        Ok(self.dsp()?.fifo.drain(out))
    }

    fn fifo_overflows(&mut self) -> Result<usize> {
        Ok(self.dsp()?.fifo.take_overflows())
    }
}
