//! The VM handle.

use std::sync::{Mutex, MutexGuard};
use std::time::Instant;

use scopeguard::defer;

use crate::error::{self, HvError};
use crate::metrics;
use crate::platform;
use crate::vstate::slot::REGISTRY;
use crate::vstate::vcpu::Vcpu;

pub(crate) struct VmState {
    pub(crate) closed: bool,
}

/// Handle to this process's hypervisor VM.
///
/// At most one VM can be active per process; [`Vm::new`] fails with
/// [`HvError::VmAlreadyActive`] while another handle holds the slot. Close
/// explicitly with [`Vm::close`]: dropping an open handle releases the VM as
/// a best-effort fallback and logs the leak, but is not the supported
/// teardown path.
pub struct Vm {
    state: Mutex<VmState>,
}

impl Vm {
    /// Creates the hypervisor VM for this process.
    pub fn new() -> Result<Vm, HvError> {
        let start = Instant::now();
        defer! {
            metrics::record_vm_create(start.elapsed());
        }

        let result = REGISTRY.acquire(|| {
            error::check(platform::vm_create()).map_err(HvError::from)
        });
        match result {
            Ok(()) => Ok(Vm {
                state: Mutex::new(VmState { closed: false }),
            }),
            Err(err) => {
                match err {
                    HvError::VmAlreadyActive => metrics::record_validation_error(),
                    _ => metrics::record_resource_error(),
                }
                Err(err)
            }
        }
    }

    /// Destroys the VM and frees the process slot. Idempotent: a second
    /// close destroys nothing and succeeds.
    ///
    /// If the platform rejects the destroy, the handle stays open and the
    /// slot stays held; the resources are still alive at the hardware level
    /// and pretending otherwise would let a second VM be created over them.
    pub fn close(&self) -> Result<(), HvError> {
        let mut state = self.lock_state();
        if state.closed {
            return Ok(());
        }

        let released = REGISTRY.release(|| {
            error::check(platform::vm_destroy()).map_err(HvError::DestroyVm)
        })?;

        state.closed = true;
        if released {
            metrics::record_vm_destroy();
        }
        Ok(())
    }

    /// Creates a vCPU bound to this VM.
    pub fn create_vcpu(&self) -> Result<Vcpu, HvError> {
        let state = self.lock_state();
        if state.closed {
            metrics::record_validation_error();
            return Err(HvError::VmClosed);
        }
        Vcpu::new()
    }

    pub(crate) fn lock_state(&self) -> MutexGuard<'_, VmState> {
        // The closed flag stays meaningful even if a holder panicked, so a
        // poisoned lock is recoverable.
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Locks the handle state, failing if the VM is closed. Used by the
    /// memory mapper so a close cannot race an in-flight map.
    pub(crate) fn lock_open(&self) -> Result<MutexGuard<'_, VmState>, HvError> {
        let state = self.lock_state();
        if state.closed {
            return Err(HvError::VmClosed);
        }
        Ok(state)
    }
}

impl Drop for Vm {
    fn drop(&mut self) {
        let Ok(state) = self.state.get_mut() else {
            // Poisoned state means a holder panicked mid-operation; skip
            // cleanup rather than risk a double destroy.
            return;
        };
        if state.closed {
            return;
        }
        // Mark closed first so nothing re-enters this path.
        state.closed = true;
        log::warn!("VM handle dropped without close; destroying the VM as a fallback");
        let _ = REGISTRY.release(|| {
            error::check(platform::vm_destroy()).map_err(HvError::DestroyVm)
        });
    }
}
