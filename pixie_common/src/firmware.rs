//! Firmware images, sets and the crate firmware catalog.
//!
//! A module needs one image per device: the communications FPGA (`sys`), the
//! signal processing FPGA (`fippi`), the DSP code (`dsp`) and the DSP
//! variable file (`var`). Images are grouped into sets keyed by the module
//! tag `revision-adc_msps-adc_bits`:
//!
//! - **partial**: fewer devices than the revision needs, never released
//! - **user**: complete, not released
//! - **release**: complete, carries a vendor release label
//!
//! Lookups layer a partial set over a user set over a release set.

use crate::config::FirmwareEntry;
use crate::consts::revision::{REV_A, REV_H};
use crate::error::{ErrorCode, PixieError, Result};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Firmware target device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Device {
    /// Communications FPGA.
    Sys,
    /// Signal processing FPGA.
    Fippi,
    /// DSP code.
    Dsp,
    /// DSP variable address file.
    Var,
}

impl Device {
    /// Device name as used in firmware descriptions.
    pub fn name(self) -> &'static str {
        match self {
            Device::Sys => "sys",
            Device::Fippi => "fippi",
            Device::Dsp => "dsp",
            Device::Var => "var",
        }
    }

    /// Parse a device name.
    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            "sys" => Ok(Device::Sys),
            "fippi" => Ok(Device::Fippi),
            "dsp" => Ok(Device::Dsp),
            "var" => Ok(Device::Var),
            _ => Err(PixieError::new(
                ErrorCode::ModuleInvalidFirmware,
                format!("firmware: invalid device: {name}"),
            )),
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

const ALL_DEVICES: &[Device] = &[Device::Sys, Device::Fippi, Device::Dsp, Device::Var];

/// Devices a hardware revision needs for a complete set.
pub fn devices_for(revision: u32) -> Result<&'static [Device]> {
    match revision {
        REV_A..=REV_H => Ok(ALL_DEVICES),
        _ => Err(PixieError::new(
            ErrorCode::ModuleInvalidFirmware,
            format!("firmware: invalid module revision: {revision}"),
        )),
    }
}

/// Module tag a firmware set is keyed by.
pub fn tag(revision: u32, adc_msps: u32, adc_bits: u32) -> String {
    format!("{revision}-{adc_msps}-{adc_bits}")
}

/// One firmware image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Firmware {
    /// Image version label.
    pub version: String,
    /// Module revision.
    pub revision: u32,
    /// ADC sample rate.
    pub adc_msps: u32,
    /// ADC resolution.
    pub adc_bits: u32,
    /// Target device.
    pub device: Device,
    /// Image file.
    pub file: PathBuf,
    /// Vendor release, `None` if not released.
    pub release: Option<String>,
}

impl Firmware {
    /// Module tag of the image.
    pub fn tag(&self) -> String {
        tag(self.revision, self.adc_msps, self.adc_bits)
    }

    /// Check the device is valid for the revision.
    pub fn check(&self) -> Result<()> {
        if !devices_for(self.revision)?.contains(&self.device) {
            return Err(PixieError::new(
                ErrorCode::ModuleInvalidFirmware,
                format!("firmware: device {} not valid for revision {}", self.device, self.revision),
            ));
        }
        Ok(())
    }

    /// Read the image from disk.
    pub fn load(&self) -> Result<Vec<u8>> {
        debug!("firmware: load: {} {}", self.device, self.file.display());
        std::fs::read(&self.file).map_err(|e| file_error(&self.file, e))
    }
}

fn file_error(path: &Path, e: std::io::Error) -> PixieError {
    if e.kind() == std::io::ErrorKind::NotFound {
        PixieError::new(ErrorCode::FileNotFound, format!("firmware: {}", path.display()))
    } else {
        PixieError::new(
            ErrorCode::FileReadFailure,
            format!("firmware: {}: {e}", path.display()),
        )
    }
}

impl TryFrom<&FirmwareEntry> for Firmware {
    type Error = PixieError;

    fn try_from(entry: &FirmwareEntry) -> Result<Self> {
        let fw = Firmware {
            version: entry.version.clone(),
            revision: entry.revision,
            adc_msps: entry.adc_msps,
            adc_bits: entry.adc_bits,
            device: Device::from_name(&entry.device)?,
            file: entry.file.clone(),
            release: entry.release.clone(),
        };
        fw.check()?;
        Ok(fw)
    }
}

/// Kind of firmware set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetType {
    /// No images.
    Undefined,
    /// Incomplete.
    Partial,
    /// Complete, not released.
    User,
    /// Complete and released.
    Release,
}

/// A group of images for one module tag.
#[derive(Debug, Clone, Default)]
pub struct FirmwareSet {
    /// Vendor release, `None` for partial and user sets.
    pub release: Option<String>,
    /// Images, at most one per device.
    pub firmwares: Vec<Firmware>,
    /// Slots the set applies to. Empty means all.
    pub slots: Vec<usize>,
}

impl PartialEq for FirmwareSet {
    fn eq(&self, other: &Self) -> bool {
        self.release == other.release
            && self.firmwares.len() == other.firmwares.len()
            && self.firmwares.iter().all(|fw| other.firmwares.contains(fw))
    }
}

impl FirmwareSet {
    /// Empty set with a release label.
    pub fn new(release: Option<String>) -> Self {
        Self {
            release,
            ..Default::default()
        }
    }

    /// True if the set holds nothing at all.
    pub fn is_empty(&self) -> bool {
        self.release.is_none() && self.firmwares.is_empty() && self.slots.is_empty()
    }

    /// Module tag, from the first image.
    pub fn tag(&self) -> Result<String> {
        self.firmwares.first().map(Firmware::tag).ok_or_else(|| {
            PixieError::new(ErrorCode::ModuleInvalidFirmware, "firmware: set: no firmware")
        })
    }

    /// Module revision, from the first image.
    pub fn revision(&self) -> Result<u32> {
        self.firmwares.first().map(|fw| fw.revision).ok_or_else(|| {
            PixieError::new(ErrorCode::ModuleInvalidFirmware, "firmware: set: no firmware")
        })
    }

    /// Classify the set.
    pub fn set_type(&self) -> Result<SetType> {
        let Some(first) = self.firmwares.first() else {
            return Ok(SetType::Undefined);
        };
        let needed = devices_for(first.revision)?.len();
        match self.firmwares.len() {
            n if n < needed => Ok(SetType::Partial),
            n if n == needed && self.release.is_none() => Ok(SetType::User),
            n if n == needed => Ok(SetType::Release),
            _ => Err(PixieError::new(
                ErrorCode::ModuleInvalidFirmware,
                format!("firmware: set: invalid set size: {}", first.tag()),
            )),
        }
    }

    /// True if the set is complete and consistent.
    pub fn valid(&self) -> bool {
        self.check().is_ok()
            && matches!(self.set_type(), Ok(SetType::User) | Ok(SetType::Release))
    }

    /// Check every image shares a tag and revision.
    pub fn check(&self) -> Result<()> {
        let Some(first) = self.firmwares.first() else {
            if self.release.is_some() {
                return Err(PixieError::new(
                    ErrorCode::ModuleInvalidFirmware,
                    "firmware: set: check: release set with no firmware",
                ));
            }
            return Ok(());
        };
        let tag = first.tag();
        for fw in &self.firmwares {
            if fw.tag() != tag {
                return Err(PixieError::new(
                    ErrorCode::ModuleInvalidFirmware,
                    format!("firmware: set: check: tag mismatch: {tag}"),
                ));
            }
        }
        Ok(())
    }

    /// True if the set applies to `slot`. Slot 0 matches every set.
    pub fn check_slot(&self, slot: usize) -> bool {
        self.slots.is_empty() || slot == 0 || self.slots.contains(&slot)
    }

    /// Image for a device.
    pub fn get(&self, device: Device) -> Result<&Firmware> {
        self.firmwares.iter().find(|fw| fw.device == device).ok_or_else(|| {
            PixieError::new(
                ErrorCode::ModuleInvalidFirmware,
                format!("firmware: set: device not found: {device}"),
            )
        })
    }

    /// Add an image.
    pub fn add(&mut self, fw: Firmware) -> Result<()> {
        fw.check()?;
        if let Ok(tag) = self.tag() {
            if fw.tag() != tag {
                return Err(PixieError::new(
                    ErrorCode::ModuleInvalidFirmware,
                    format!("firmware: add: invalid tag: module:{tag} fw:{}", fw.tag()),
                ));
            }
            if self.firmwares.iter().any(|f| f.device == fw.device) {
                return Err(PixieError::new(
                    ErrorCode::ModuleInvalidFirmware,
                    format!("firmware: add: duplicate firmware: fw:{tag} device:{}", fw.device),
                ));
            }
        }
        self.firmwares.push(fw);
        Ok(())
    }

    /// Merge another set of the same release into this one.
    pub fn merge(&mut self, set: &FirmwareSet) -> Result<()> {
        if self.release != set.release {
            return Err(PixieError::new(
                ErrorCode::ModuleInvalidFirmware,
                format!("firmware: set: merge: mismatched releases: {:?}", set.release),
            ));
        }
        self.merge_firmwares(set)?;
        self.merge_slots(set);
        Ok(())
    }

    fn merge_firmwares(&mut self, set: &FirmwareSet) -> Result<()> {
        if set.firmwares.is_empty() {
            return Ok(());
        }
        let Ok(tag) = self.tag() else {
            self.firmwares = set.firmwares.clone();
            return Ok(());
        };
        for sfw in &set.firmwares {
            if sfw.tag() != tag {
                return Err(PixieError::new(
                    ErrorCode::ModuleInvalidFirmware,
                    format!("firmware: set: merge: invalid tag: set-tag:{tag} fw:{}", sfw.tag()),
                ));
            }
            match self.firmwares.iter().find(|fw| fw.device == sfw.device) {
                Some(fw) if fw.file != sfw.file => {
                    return Err(PixieError::new(
                        ErrorCode::ModuleInvalidFirmware,
                        format!(
                            "firmware: set: merge: file name changed: device:{} file:{}",
                            sfw.device,
                            sfw.file.display()
                        ),
                    ));
                }
                Some(_) => {}
                None => self.firmwares.push(sfw.clone()),
            }
        }
        Ok(())
    }

    /// Merge the slot lists.
    pub fn merge_slots(&mut self, set: &FirmwareSet) {
        if self.slots.is_empty() != set.slots.is_empty() {
            warn!("firmware: set: merge: mixed use of all slots and slots");
        }
        for &slot in &set.slots {
            if !self.slots.contains(&slot) {
                self.slots.push(slot);
            }
        }
    }

    /// Add images from `set` for devices this set does not have.
    pub fn underlay(&mut self, set: &FirmwareSet) -> Result<()> {
        if let (Ok(tag), Ok(other)) = (self.tag(), set.tag()) {
            if tag != other {
                return Err(PixieError::new(
                    ErrorCode::ModuleInvalidFirmware,
                    format!("firmware: set: underlay: invalid tag: {other}"),
                ));
            }
        }
        self.merge_slots(set);
        for fw in &set.firmwares {
            if !self.firmwares.iter().any(|f| f.device == fw.device) {
                self.firmwares.push(fw.clone());
            }
        }
        Ok(())
    }
}

impl fmt::Display for FirmwareSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = self.tag().unwrap_or_default();
        write!(
            f,
            "tag={tag} release={} images={}",
            self.release.as_deref().unwrap_or("not-released"),
            self.firmwares.len()
        )
    }
}

/// Every firmware set known to the crate, grouped by module tag.
#[derive(Debug, Clone, Default)]
pub struct FirmwareCatalog {
    sets: HashMap<String, Vec<FirmwareSet>>,
}

impl FirmwareCatalog {
    /// Empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a catalog from configuration entries.
    ///
    /// Entries with the same tag, release and slots form one set.
    pub fn from_entries(entries: &[FirmwareEntry]) -> Result<Self> {
        let mut groups: Vec<(String, FirmwareSet)> = Vec::new();
        for entry in entries {
            let fw = Firmware::try_from(entry)?;
            let tag = fw.tag();
            let index = groups.iter().position(|(t, s)| {
                *t == tag && s.release == fw.release && s.slots == entry.slots
            });
            let set = match index {
                Some(i) => &mut groups[i].1,
                None => {
                    let mut set = FirmwareSet::new(fw.release.clone());
                    set.slots = entry.slots.clone();
                    groups.push((tag, set));
                    let last = groups.len() - 1;
                    &mut groups[last].1
                }
            };
            set.add(fw)?;
        }

        let mut catalog = Self::new();
        for (_, set) in groups {
            catalog.add(set)?;
        }
        Ok(catalog)
    }

    /// Number of module tags.
    pub fn len(&self) -> usize {
        self.sets.len()
    }

    /// True if nothing was added.
    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }

    /// True if the catalog has sets for a tag.
    pub fn contains(&self, tag: &str) -> bool {
        self.sets.contains_key(tag)
    }

    /// Sets for a tag.
    pub fn sets(&self, tag: &str) -> &[FirmwareSet] {
        self.sets.get(tag).map_or(&[], Vec::as_slice)
    }

    /// Add a set.
    ///
    /// Partial sets merge with an existing partial set. A user set may only
    /// repeat an existing user set. A release may only repeat an existing
    /// set of the same release. Matching sets merge their slots.
    pub fn add(&mut self, set: FirmwareSet) -> Result<()> {
        if set.is_empty() {
            return Ok(());
        }
        set.check()?;
        let set_type = set.set_type()?;
        let tag = set.tag()?;
        if set.release.is_some() && set_type != SetType::Release {
            return Err(PixieError::new(
                ErrorCode::ModuleInvalidFirmware,
                format!(
                    "firmware: set: add: released set not complete: module:{tag} release:{}",
                    set.release.as_deref().unwrap_or_default()
                ),
            ));
        }

        let sets = self.sets.entry(tag.clone()).or_default();
        let find = |sets: &[FirmwareSet], want: SetType| {
            sets.iter().position(|s| s.set_type().ok() == Some(want))
        };

        match set_type {
            SetType::Partial => {
                if let Some(pi) = find(sets.as_slice(), SetType::Partial) {
                    let mut merged = sets[pi].clone();
                    merged.merge(&set)?;
                    if merged.set_type()? != SetType::Partial {
                        if let Some(ui) = find(sets.as_slice(), SetType::User) {
                            if merged != sets[ui] {
                                return Err(PixieError::new(
                                    ErrorCode::ModuleInvalidFirmware,
                                    format!(
                                        "firmware: set: add: partial set creates user set and a \
                                         different user set already exists: module:{tag}"
                                    ),
                                ));
                            }
                            sets[ui].merge_slots(&merged);
                            sets.remove(pi);
                            return Ok(());
                        }
                    }
                    sets[pi] = merged;
                    return Ok(());
                }
            }
            SetType::User => {
                if let Some(ui) = find(sets.as_slice(), SetType::User) {
                    if set != sets[ui] {
                        return Err(PixieError::new(
                            ErrorCode::ModuleInvalidFirmware,
                            format!(
                                "firmware: set: add: different user set already exists: module:{tag}"
                            ),
                        ));
                    }
                    sets[ui].merge_slots(&set);
                    return Ok(());
                }
            }
            SetType::Release => {
                if let Some(ri) = sets.iter().position(|s| s.release == set.release) {
                    if sets[ri] == set {
                        sets[ri].merge_slots(&set);
                        return Ok(());
                    }
                    return Err(PixieError::new(
                        ErrorCode::ModuleInvalidFirmware,
                        format!(
                            "firmware: set: add: released set already exists: module:{tag} \
                             release:{}",
                            set.release.as_deref().unwrap_or_default()
                        ),
                    ));
                }
            }
            SetType::Undefined => {
                return Err(PixieError::new(
                    ErrorCode::InternalFailure,
                    format!("firmware: set: add: undefined firmware set: module:{tag}"),
                ));
            }
        }

        debug!("firmware: add: {set}");
        sets.push(set);
        Ok(())
    }

    /// Find the set a module in `slot` with `tag` boots.
    ///
    /// A partial set is laid over a user set. Without a user set the named
    /// release is used, or the latest release when `release` is `None`.
    pub fn find(&self, tag: &str, release: Option<&str>, slot: usize) -> Result<FirmwareSet> {
        let sets = self.sets.get(tag).ok_or_else(|| {
            PixieError::new(
                ErrorCode::ModuleInvalidFirmware,
                format!("firmware: set: find: module type not found: {tag}"),
            )
        })?;
        if sets.is_empty() {
            return Err(PixieError::new(
                ErrorCode::ModuleInvalidFirmware,
                "firmware: find: no firmware sets",
            ));
        }

        let of_type = |want: SetType| sets.iter().find(|s| s.set_type().ok() == Some(want));
        let mut found = FirmwareSet::default();

        if let Some(partial) = of_type(SetType::Partial) {
            if partial.check_slot(slot) {
                found.underlay(partial)?;
            }
        }
        if let Some(user) = of_type(SetType::User) {
            if user.check_slot(slot) {
                found.underlay(user)?;
                return Ok(found);
            }
        }

        let chosen = match release {
            Some(release) => {
                let set = sets
                    .iter()
                    .find(|s| s.release.as_deref() == Some(release))
                    .ok_or_else(|| {
                        PixieError::new(
                            ErrorCode::ModuleInvalidFirmware,
                            format!("firmware: find: release not found: {release}"),
                        )
                    })?;
                set.check_slot(slot).then_some(set)
            }
            None => sets
                .iter()
                .filter(|s| s.release.is_some() && s.valid() && s.check_slot(slot))
                .max_by(|a, b| a.release.cmp(&b.release)),
        };

        if let Some(set) = chosen {
            if found.firmwares.is_empty() {
                found.release = set.release.clone();
            }
            found.underlay(set)?;
            return Ok(found);
        }

        Err(PixieError::new(
            ErrorCode::ModuleInvalidFirmware,
            format!(
                "firmware: find: firmware set not found: tag:{tag} release:{} slot:{slot}",
                release.unwrap_or("latest")
            ),
        ))
    }
}
