//! The vCPU handle.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Instant;

use scopeguard::defer;

use crate::error::{self, HvError};
use crate::exit::ExitInfo;
use crate::metrics;
use crate::platform;
use crate::registers::{PlatformReg, Reg};

pub(crate) struct VcpuState {
    id: u64,
    closed: bool,
}

/// Handle to one vCPU of the active VM.
///
/// A vCPU manages its own close state independently of the VM that created
/// it. Every operation holds the handle's lock for its full duration, so a
/// concurrent [`Vcpu::close`] can never free the underlying vCPU out from
/// under a register access or a run.
pub struct Vcpu {
    state: Mutex<VcpuState>,
}

impl Vcpu {
    pub(crate) fn new() -> Result<Vcpu, HvError> {
        let mut id = 0u64;
        if let Err(status) = error::check(platform::vcpu_create(&mut id)) {
            metrics::record_resource_error();
            return Err(HvError::from(status));
        }
        metrics::record_vcpu_create();
        Ok(Vcpu {
            state: Mutex::new(VcpuState { id, closed: false }),
        })
    }

    /// Reads a register.
    pub fn get_reg(&self, reg: Reg) -> Result<u64, HvError> {
        let state = self.lock_open()?;
        let mut value = 0u64;
        let ret = match reg.to_platform() {
            PlatformReg::Core(hv_reg) => platform::reg_get(state.id, hv_reg, &mut value),
            PlatformReg::Sys(sys_reg) => platform::sys_reg_get(state.id, sys_reg, &mut value),
        };
        if let Err(status) = error::check(ret) {
            metrics::record_resource_error();
            return Err(HvError::GetReg { reg, source: status });
        }
        metrics::record_register_op();
        Ok(value)
    }

    /// Writes a register.
    pub fn set_reg(&self, reg: Reg, value: u64) -> Result<(), HvError> {
        let state = self.lock_open()?;
        let ret = match reg.to_platform() {
            PlatformReg::Core(hv_reg) => platform::reg_set(state.id, hv_reg, value),
            PlatformReg::Sys(sys_reg) => platform::sys_reg_set(state.id, sys_reg, value),
        };
        if let Err(status) = error::check(ret) {
            metrics::record_resource_error();
            return Err(HvError::SetReg { reg, source: status });
        }
        metrics::record_register_op();
        Ok(())
    }

    /// Reads the program counter.
    pub fn get_pc(&self) -> Result<u64, HvError> {
        self.get_reg(Reg::Pc)
    }

    /// Writes the program counter.
    pub fn set_pc(&self, value: u64) -> Result<(), HvError> {
        self.set_reg(Reg::Pc, value)
    }

    /// Reads several registers, one platform call each. Fails on the first
    /// register that cannot be read.
    pub fn get_regs(&self, regs: &[Reg]) -> Result<HashMap<Reg, u64>, HvError> {
        let mut batch = HashMap::with_capacity(regs.len());
        for &reg in regs {
            batch.insert(reg, self.get_reg(reg)?);
        }
        Ok(batch)
    }

    /// Writes several registers in slice order, one platform call each.
    /// Stops at the first failure; writes already applied are not rolled
    /// back.
    pub fn set_regs(&self, regs: &[(Reg, u64)]) -> Result<(), HvError> {
        for &(reg, value) in regs {
            self.set_reg(reg, value)?;
        }
        Ok(())
    }

    /// Runs the vCPU until the guest exits back to the host.
    ///
    /// This blocks the calling thread for the duration and cannot be
    /// cancelled from this layer. Exit diagnostics are best-effort: if the
    /// syndrome registers cannot be read afterwards the exit is reported as
    /// [`ExitReason::Unknown`](crate::ExitReason::Unknown) with zeroed
    /// values rather than failing the run.
    pub fn run(&self) -> Result<ExitInfo, HvError> {
        let start = Instant::now();
        defer! {
            metrics::record_run(start.elapsed());
        }

        let state = self.lock_open()?;
        if let Err(status) = error::check(platform::vcpu_run(state.id)) {
            metrics::record_resource_error();
            return Err(HvError::Run(status));
        }

        let mut esr = 0u64;
        let mut far = 0u64;
        let esr_ret = platform::sys_reg_get(state.id, platform::sysreg::ESR_EL1, &mut esr);
        let far_ret = platform::sys_reg_get(state.id, platform::sysreg::FAR_EL1, &mut far);
        if error::check(esr_ret).is_err() || error::check(far_ret).is_err() {
            return Ok(ExitInfo::unknown());
        }
        Ok(ExitInfo::classify(esr, far))
    }

    /// Destroys the vCPU. Idempotent: a second close destroys nothing and
    /// succeeds. A failed platform destroy leaves the handle open.
    pub fn close(&self) -> Result<(), HvError> {
        let mut state = self.lock_state();
        if state.closed {
            return Ok(());
        }
        if let Err(status) = error::check(platform::vcpu_destroy(state.id)) {
            return Err(HvError::DestroyVcpu(status));
        }
        state.closed = true;
        metrics::record_vcpu_destroy();
        Ok(())
    }

    fn lock_state(&self) -> MutexGuard<'_, VcpuState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_open(&self) -> Result<MutexGuard<'_, VcpuState>, HvError> {
        let state = self.lock_state();
        if state.closed {
            metrics::record_validation_error();
            return Err(HvError::VcpuClosed);
        }
        Ok(state)
    }
}

impl Drop for Vcpu {
    fn drop(&mut self) {
        let Ok(state) = self.state.get_mut() else {
            return;
        };
        if state.closed {
            return;
        }
        state.closed = true;
        log::warn!("vCPU handle dropped without close; destroying it as a fallback");
        let _ = platform::vcpu_destroy(state.id);
    }
}
