//! DSP variable address map.
//!
//! Computes the module and channel address ranges from the descriptor tables
//! once a variable file has been loaded. Channel variables are arrays of
//! `max_channels` elements; consecutive channel variables must be exactly one
//! array apart.

use crate::consts::Address;
use crate::error::{ErrorCode, PixieError, Result};
use crate::param::{ChannelVarDesc, Mode, ModuleVarDesc, VarDescriptor};
use std::fmt;

/// A half open range of DSP addresses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AddressRange {
    /// First address.
    pub start: Address,
    /// One past the last address.
    pub end: Address,
}

impl AddressRange {
    /// Words covered.
    pub fn size(&self) -> usize {
        (self.end - self.start) as usize
    }

    /// True if nothing is covered.
    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    /// True if `address` is inside the range.
    pub fn contains(&self, address: Address) -> bool {
        address >= self.start && address < self.end
    }

    fn union(a: AddressRange, b: AddressRange) -> AddressRange {
        match (a.is_empty(), b.is_empty()) {
            (true, _) => b,
            (_, true) => a,
            _ => AddressRange {
                start: a.start.min(b.start),
                end: a.end.max(b.end),
            },
        }
    }
}

impl fmt::Display for AddressRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:05x}..0x{:05x} ({})", self.start, self.end, self.size())
    }
}

/// Address ranges of one module's variables.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddressMap {
    /// Module and channel variables together.
    pub full: AddressRange,
    /// Module variables.
    pub module: AddressRange,
    /// Writable module variables.
    pub module_in: AddressRange,
    /// Read only module variables.
    pub module_out: AddressRange,
    /// Channel variables.
    pub channels: AddressRange,
    /// Writable channel variables.
    pub channels_in: AddressRange,
    /// Read only channel variables.
    pub channels_out: AddressRange,
    /// Enabled variables.
    pub vars: usize,
    /// Enabled module variables.
    pub module_vars: usize,
    /// Enabled channel variables.
    pub channel_vars: usize,
    /// Channel array length.
    pub max_channels: usize,
}

type DescAddress = (Address, usize, &'static str);

/// (address, words, name) of each enabled descriptor in one mode, by address.
fn addresses<V>(descs: &[VarDescriptor<V>], input: bool, stride: usize) -> Vec<DescAddress> {
    let mut out: Vec<_> = descs
        .iter()
        .filter(|d| d.enabled() && ((d.mode != Mode::ReadOnly) == input))
        .map(|d| (d.address, d.size * stride, d.name))
        .collect();
    out.sort_by_key(|&(addr, _, _)| addr);
    out
}

fn range(addresses: &[DescAddress]) -> AddressRange {
    match (addresses.first(), addresses.iter().map(|&(a, w, _)| a + w as Address).max()) {
        (Some(&(start, _, _)), Some(end)) => AddressRange { start, end },
        _ => AddressRange::default(),
    }
}

impl AddressMap {
    /// Compute all ranges.
    ///
    /// # Errors
    /// `ChannelInvalidVar` if channel variables are not uniformly strided by
    /// `max_channels`.
    pub fn set(
        &mut self,
        max_channels: usize,
        module_descs: &[ModuleVarDesc],
        channel_descs: &[ChannelVarDesc],
    ) -> Result<()> {
        let mod_in = addresses(module_descs, true, 1);
        let mod_out = addresses(module_descs, false, 1);
        let chan_in = addresses(channel_descs, true, max_channels);
        let chan_out = addresses(channel_descs, false, max_channels);

        Self::check_channel_gap(max_channels, channel_descs, &chan_in)?;
        Self::check_channel_gap(max_channels, channel_descs, &chan_out)?;

        self.max_channels = max_channels;
        self.module_in = range(&mod_in);
        self.module_out = range(&mod_out);
        self.module = AddressRange::union(self.module_in, self.module_out);
        self.channels_in = range(&chan_in);
        self.channels_out = range(&chan_out);
        self.channels = AddressRange::union(self.channels_in, self.channels_out);
        self.full = AddressRange::union(self.module, self.channels);
        self.module_vars = mod_in.len() + mod_out.len();
        self.channel_vars = chan_in.len() + chan_out.len();
        self.vars = self.module_vars + self.channel_vars;
        Ok(())
    }

    fn check_channel_gap(
        max_channels: usize,
        channel_descs: &[ChannelVarDesc],
        addresses: &[DescAddress],
    ) -> Result<()> {
        for pair in addresses.windows(2) {
            let (addr, _, name) = pair[0];
            let (next, _, next_name) = pair[1];
            let size = channel_descs
                .iter()
                .find(|d| d.name == name)
                .map_or(1, |d| d.size.max(1));
            let gap = (next - addr) as usize;
            if gap / size != max_channels {
                return Err(PixieError::new(
                    ErrorCode::ChannelInvalidVar,
                    format!(
                        "channel variable address gap: {name}@0x{addr:x} -> {next_name}@0x{next:x}: \
                         gap={gap} max_channels={max_channels}"
                    ),
                ));
            }
        }
        Ok(())
    }

    /// Address of element `offset` of a channel variable for `channel`.
    #[inline]
    pub fn channel_address(desc: &ChannelVarDesc, channel: usize, offset: usize) -> Address {
        desc.address + (channel * desc.size + offset) as Address
    }
}

impl fmt::Display for AddressMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "full: {}", self.full)?;
        writeln!(f, " module: {}", self.module)?;
        writeln!(f, "  in: {}", self.module_in)?;
        writeln!(f, "  out: {}", self.module_out)?;
        writeln!(f, " channels: {}", self.channels)?;
        writeln!(f, "  in: {}", self.channels_in)?;
        write!(f, "  out: {}", self.channels_out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::param::{ChannelVar, Descriptors, State};

    fn loaded(max_channels: usize) -> Descriptors {
        let mut descs = Descriptors::default();
        let mut addr: Address = 0x4a000;
        for d in descs.module.iter_mut().filter(|d| d.enabled()) {
            d.address = addr;
            addr += d.size as Address;
        }
        for d in descs.channel.iter_mut().filter(|d| d.enabled() && d.mode != Mode::ReadOnly) {
            d.address = addr;
            addr += (d.size * max_channels) as Address;
        }
        for d in descs.channel.iter_mut().filter(|d| d.enabled() && d.mode == Mode::ReadOnly) {
            d.address = addr;
            addr += (d.size * max_channels) as Address;
        }
        descs
    }

    #[test]
    fn well_formed_table_bounds_full_range() {
        let descs = loaded(16);
        let mut map = AddressMap::default();
        map.set(16, &descs.module, &descs.channel).unwrap();
        assert_eq!(map.full.start, map.module.start.min(map.channels.start));
        assert_eq!(map.full.end, map.module.end.max(map.channels.end));
        assert_eq!(map.module.start, 0x4a000);
        assert!(map.channels_in.end <= map.channels_out.start);
        assert_eq!(map.vars, map.module_vars + map.channel_vars);
    }

    #[test]
    fn uneven_stride_is_rejected() {
        let mut descs = loaded(16);
        descs.channel[ChannelVar::SlowGap.index()].address += 3;
        let mut map = AddressMap::default();
        let err = map.set(16, &descs.module, &descs.channel).unwrap_err();
        assert_eq!(err.code, ErrorCode::ChannelInvalidVar);
        assert!(err.is_internal());
    }

    #[test]
    fn wrong_channel_count_is_rejected() {
        let descs = loaded(32);
        let mut map = AddressMap::default();
        assert!(map.set(16, &descs.module, &descs.channel).is_err());
    }

    #[test]
    fn disabled_variable_leaves_gap() {
        let mut descs = loaded(16);
        descs.channel[ChannelVar::SlowGap.index()].address = 0;
        descs.channel[ChannelVar::SlowGap.index()].state = State::Disabled;
        let mut map = AddressMap::default();
        // SlowLength now sits two arrays before FastLength.
        assert!(map.set(16, &descs.module, &descs.channel).is_err());
    }
}
