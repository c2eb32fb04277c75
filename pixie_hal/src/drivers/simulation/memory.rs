//! Simulated on-board memory.
//!
//! - `DspMemory` - Sparse DSP data memory, zero where never written
//! - `Regions` - I/O buffer, MCA histograms and ADC traces
//! - `HwFifo` - Bounded external FIFO with overflow accounting

use pixie_common::consts::{
    Address, IO_BUFFER_LENGTH, MAX_ADC_TRACE_LENGTH, MAX_HISTOGRAM_LENGTH, Word,
};
use pixie_common::error::{ErrorCode, PixieError, Result};
use pixie_common::hw::MemoryRegion;
use std::collections::{HashMap, VecDeque};

/// Sparse DSP data memory.
#[derive(Debug, Default)]
pub struct DspMemory {
    words: HashMap<Address, Word>,
}

impl DspMemory {
    /// Read a word.
    pub fn read(&self, address: Address) -> Word {
        self.words.get(&address).copied().unwrap_or(0)
    }

    /// Write a word.
    pub fn write(&mut self, address: Address, value: Word) {
        self.words.insert(address, value);
    }

    /// Add to a 64 bit counter held as a high word at `hi` and low word at `lo`.
    pub fn add_counter(&mut self, hi: Address, lo: Address, delta: u64) {
        let value = ((self.read(hi) as u64) << 32 | self.read(lo) as u64).wrapping_add(delta);
        self.write(hi, (value >> 32) as Word);
        self.write(lo, value as Word);
    }

    /// Forget every word.
    pub fn clear(&mut self) {
        self.words.clear();
    }
}

/// Block memory regions.
#[derive(Debug)]
pub struct Regions {
    /// DSP I/O buffer.
    pub io_buffer: Vec<Word>,
    /// Histogram per channel.
    pub mca: Vec<Vec<Word>>,
    /// Packed ADC trace per channel, two samples per word.
    pub adc: Vec<Vec<Word>>,
}

impl Regions {
    /// Zeroed regions for `channels` channels.
    pub fn new(channels: usize) -> Self {
        Self {
            io_buffer: vec![0; IO_BUFFER_LENGTH],
            mca: vec![vec![0; MAX_HISTOGRAM_LENGTH]; channels],
            adc: vec![vec![0; MAX_ADC_TRACE_LENGTH / 2]; channels],
        }
    }

    /// The words of a region for a channel.
    pub fn get(&self, region: MemoryRegion, channel: usize) -> Result<&[Word]> {
        let words = match region {
            MemoryRegion::IoBuffer => Some(&self.io_buffer),
            MemoryRegion::Mca => self.mca.get(channel),
            MemoryRegion::AdcTrace => self.adc.get(channel),
        };
        words.map(Vec::as_slice).ok_or_else(|| {
            PixieError::new(
                ErrorCode::ChannelNumberInvalid,
                format!("sim: memory: {region:?}: invalid channel: {channel}"),
            )
        })
    }

    /// Zero a region on every channel.
    pub fn clear(&mut self, region: MemoryRegion) {
        match region {
            MemoryRegion::IoBuffer => self.io_buffer.fill(0),
            MemoryRegion::Mca => self.mca.iter_mut().for_each(|m| m.fill(0)),
            MemoryRegion::AdcTrace => self.adc.iter_mut().for_each(|t| t.fill(0)),
        }
    }
}

/// Bounded hardware FIFO.
#[derive(Debug)]
pub struct HwFifo {
    words: VecDeque<Word>,
    capacity: usize,
    overflows: usize,
}

impl HwFifo {
    /// Empty FIFO holding up to `capacity` words.
    pub fn new(capacity: usize) -> Self {
        Self {
            words: VecDeque::with_capacity(capacity),
            capacity,
            overflows: 0,
        }
    }

    /// Queue words; whatever does not fit is dropped and counted as one overflow.
    pub fn push(&mut self, words: impl IntoIterator<Item = Word>) {
        let mut dropped = false;
        for word in words {
            if self.words.len() < self.capacity {
                self.words.push_back(word);
            } else {
                dropped = true;
            }
        }
        if dropped {
            self.overflows += 1;
        }
    }

    /// Words queued.
    pub fn level(&self) -> usize {
        self.words.len()
    }

    /// Move up to `out.len()` words out; returns the count.
    pub fn drain(&mut self, out: &mut [Word]) -> usize {
        let count = out.len().min(self.words.len());
        for (slot, word) in out.iter_mut().zip(self.words.drain(..count)) {
            *slot = word;
        }
        count
    }

    /// Overflow events since the last call.
    pub fn take_overflows(&mut self) -> usize {
        std::mem::take(&mut self.overflows)
    }

    /// Drop everything queued.
    pub fn clear(&mut self) {
        self.words.clear();
    }
}

/// Deterministic noise source.
#[derive(Debug, Clone)]
pub struct Noise(u32);

impl Noise {
    /// Seeded source; a zero seed is replaced.
    pub fn new(seed: u32) -> Self {
        Self(if seed == 0 { 0x9e37_79b9 } else { seed })
    }

    /// Next raw value.
    pub fn next_u32(&mut self) -> u32 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.0 = x;
        x
    }

    /// Uniform value in `[-1, 1)`.
    pub fn next_unit(&mut self) -> f64 {
        (self.next_u32() as f64 / u32::MAX as f64) * 2.0 - 1.0
    }
}
