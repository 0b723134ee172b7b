//! The process-wide VM slot.
//!
//! The platform supports at most one VM per process, so the slot is an
//! explicit singleton registry rather than ad hoc flags: acquire and release
//! run the platform call inside the same critical section that flips the
//! flag, which is what makes the invariant race-free.

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{RwLock, RwLockWriteGuard};

use crate::error::HvError;

pub(crate) struct VmRegistry {
    active: RwLock<bool>,
    live: AtomicI32,
}

/// The one slot this process gets.
pub(crate) static REGISTRY: VmRegistry = VmRegistry::new();

impl VmRegistry {
    pub(crate) const fn new() -> VmRegistry {
        VmRegistry {
            active: RwLock::new(false),
            live: AtomicI32::new(0),
        }
    }

    /// Claims the slot and runs `create` while holding it. If the slot is
    /// taken this fails fast with [`HvError::VmAlreadyActive`] without
    /// calling `create`; if `create` fails the slot stays free.
    pub(crate) fn acquire<F>(&self, create: F) -> Result<(), HvError>
    where
        F: FnOnce() -> Result<(), HvError>,
    {
        let mut active = write_flag(&self.active);
        if *active {
            return Err(HvError::VmAlreadyActive);
        }
        create()?;
        *active = true;
        self.live.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    /// Runs `destroy` and frees the slot on success. Returns `Ok(false)` if
    /// the slot was already free (nothing destroyed). If `destroy` fails the
    /// slot stays held: the platform has not confirmed the release, and
    /// freeing it would let a second VM be created over a live one.
    pub(crate) fn release<F>(&self, destroy: F) -> Result<bool, HvError>
    where
        F: FnOnce() -> Result<(), HvError>,
    {
        let mut active = write_flag(&self.active);
        if !*active {
            return Ok(false);
        }
        destroy()?;
        *active = false;
        self.live.fetch_sub(1, Ordering::SeqCst);
        Ok(true)
    }

    /// Whether a VM currently holds the slot.
    #[allow(dead_code)]
    pub(crate) fn is_active(&self) -> bool {
        *self
            .active
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Net live-VM count, a diagnostic that should only ever read 0 or 1.
    #[allow(dead_code)]
    pub(crate) fn live_count(&self) -> i32 {
        self.live.load(Ordering::SeqCst)
    }
}

fn write_flag(lock: &RwLock<bool>) -> RwLockWriteGuard<'_, bool> {
    // A panicking create/destroy closure leaves the flag itself consistent
    // (it only flips after the closure succeeds), so a poisoned lock is
    // recoverable.
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}
