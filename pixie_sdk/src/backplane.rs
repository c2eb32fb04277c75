//! Backplane roles and synchronous run accounting.
//!
//! A crate shares one `Backplane` between its modules. Three roles can each
//! be held by a single slot:
//!
//! - wired-or trigger pullup (`MODULE_CSRB` bit 0)
//! - director (`MODULE_CSRB` bit 4)
//! - run leader (`MODULE_CSRB` bit 6)
//!
//! Modules that set `SYNCH_WAIT` wait for each other to start and stop a
//! run. A run may start when no module waits, or when every present module
//! waits and a run leader is assigned.

use heapless::Vec as FixedVec;
use pixie_common::consts::MAX_SLOTS;
use pixie_common::error::{ErrorCode, PixieError, Result};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::info;

const RELEASED: usize = usize::MAX;

/// A backplane role held by at most one slot.
#[derive(Debug)]
pub struct Role {
    label: &'static str,
    leader: AtomicUsize,
}

impl Role {
    const fn new(label: &'static str) -> Self {
        Self {
            label,
            leader: AtomicUsize::new(RELEASED),
        }
    }

    /// Role name.
    pub fn label(&self) -> &'static str {
        self.label
    }

    /// Claim the role for `slot`. True if `slot` now holds it.
    pub fn request(&self, slot: usize) -> bool {
        match self
            .leader
            .compare_exchange(RELEASED, slot, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => {
                info!("backplane: {}: leader: slot={slot}", self.label);
                true
            }
            Err(current) => current == slot,
        }
    }

    /// Give the role up if `slot` holds it. True if it was released.
    pub fn release(&self, slot: usize) -> bool {
        let released = self
            .leader
            .compare_exchange(slot, RELEASED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if released {
            info!("backplane: {}: released: slot={slot}", self.label);
        }
        released
    }

    /// Slot holding the role.
    pub fn slot(&self) -> Option<usize> {
        match self.leader.load(Ordering::Acquire) {
            RELEASED => None,
            slot => Some(slot),
        }
    }

    /// True if some slot holds the role.
    pub fn has_leader(&self) -> bool {
        self.slot().is_some()
    }

    /// True if `slot` holds the role.
    pub fn is_leader(&self, slot: usize) -> bool {
        self.slot() == Some(slot)
    }

    /// True if another slot holds the role.
    pub fn not_leader(&self, slot: usize) -> bool {
        self.has_leader() && !self.is_leader(slot)
    }

    fn clear(&self) {
        self.leader.store(RELEASED, Ordering::Release);
    }
}

#[derive(Debug, Default)]
struct SyncState {
    num_slots_present: usize,
    sync_waits: usize,
    waiters: FixedVec<bool, MAX_SLOTS>,
}

impl SyncState {
    fn reset(&mut self, num_present: usize) {
        self.num_slots_present = num_present;
        self.sync_waits = 0;
        self.waiters.clear();
        // Capacity is MAX_SLOTS so this cannot fail.
        let _ = self.waiters.resize(MAX_SLOTS, false);
    }
}

/// Crate backplane shared by every module.
#[derive(Debug)]
pub struct Backplane {
    /// Wired-or trigger pullup role.
    pub wired_or_triggers_pullup: Role,
    /// Run leader role.
    pub run: Role,
    /// Director role.
    pub director: Role,
    sync: Mutex<SyncState>,
}

impl Default for Backplane {
    fn default() -> Self {
        Self::new()
    }
}

impl Backplane {
    /// Backplane with no roles held.
    pub fn new() -> Self {
        let mut state = SyncState::default();
        state.reset(0);
        Self {
            wired_or_triggers_pullup: Role::new("wired-or-triggers"),
            run: Role::new("run"),
            director: Role::new("director"),
            sync: Mutex::new(state),
        }
    }

    fn state(&self) -> Result<std::sync::MutexGuard<'_, SyncState>> {
        self.sync
            .lock()
            .map_err(|_| PixieError::new(ErrorCode::InternalFailure, "backplane: lock poisoned"))
    }

    /// Reset the sync wait accounting for `num_present` modules.
    pub fn init(&self, num_present: usize) -> Result<()> {
        self.state()?.reset(num_present);
        Ok(())
    }

    /// Release every role and reset the accounting.
    pub fn clear(&self) -> Result<()> {
        self.wired_or_triggers_pullup.clear();
        self.run.clear();
        self.director.clear();
        self.init(0)
    }

    /// Record the `SYNCH_WAIT` value of the online module in `slot`.
    ///
    /// # Errors
    /// `InternalFailure` if more slots wait than are present.
    pub fn sync_wait(&self, slot: usize, synch_wait: u32) -> Result<()> {
        let active = synch_wait == 1;
        let mut state = self.state()?;
        let Some(&waiting) = state.waiters.get(slot) else {
            return Err(PixieError::new(
                ErrorCode::ModuleNumberInvalid,
                format!("backplane: invalid slot: {slot}"),
            ));
        };
        if active == waiting {
            return Ok(());
        }
        if active {
            state.sync_waits += 1;
        } else if state.sync_waits > 0 {
            state.sync_waits -= 1;
        }
        state.waiters[slot] = active;
        if state.sync_waits > state.num_slots_present {
            return Err(PixieError::new(
                ErrorCode::InternalFailure,
                format!(
                    "slot: {slot}: invalid backplane sync_wait value: {}",
                    state.sync_waits
                ),
            ));
        }
        Ok(())
    }

    /// Check a run may start.
    ///
    /// # Errors
    /// `ModuleInvalidOperation` if only some slots wait, or slots wait
    /// without a run leader.
    pub fn sync_wait_valid(&self) -> Result<()> {
        let state = self.state()?;
        let waits = state.sync_waits;
        if waits != 0 && waits != state.num_slots_present {
            return Err(PixieError::new(
                ErrorCode::ModuleInvalidOperation,
                format!(
                    "sync wait mode enabled and not all slots in the sync wait state: \
                     {waits} of {} waiting",
                    state.num_slots_present
                ),
            ));
        }
        if waits != 0 && !self.run.has_leader() {
            return Err(PixieError::new(
                ErrorCode::ModuleInvalidOperation,
                "sync wait mode enabled but no run leader slot is assigned",
            ));
        }
        Ok(())
    }

    /// Slots currently in the sync wait state.
    pub fn sync_waits(&self) -> usize {
        self.state().map(|s| s.sync_waits).unwrap_or(0)
    }

    /// A module in `slot` went offline.
    pub fn offline(&self, slot: usize) -> Result<()> {
        let mut state = self.state()?;
        if state.waiters.get(slot).copied().unwrap_or(false) {
            state.sync_waits = state.sync_waits.saturating_sub(1);
            state.waiters[slot] = false;
        }
        Ok(())
    }
}
