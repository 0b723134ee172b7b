//! The hypervisor call surface.
//!
//! Every backend exposes the same set of thin `pub(crate)` functions that
//! mirror the framework calls one-to-one and report raw `hv_return_t`
//! values. All policy (validation, locking, the single-VM invariant, error
//! mapping) lives above this layer.
//!
//! Backends:
//! - `hvf`: the real Hypervisor.framework FFI, macOS on Apple Silicon only.
//! - `stub`: every call reports `HV_UNSUPPORTED`; compiled on all other
//!   targets so the crate builds and the probe reports the platform as
//!   unsupported.
//! - `fake`: a deterministic in-process double used by the unit tests.

#[cfg(all(target_os = "macos", target_arch = "aarch64", not(test)))]
mod hvf;
#[cfg(all(target_os = "macos", target_arch = "aarch64", not(test)))]
pub(crate) use hvf::*;

#[cfg(all(not(test), not(all(target_os = "macos", target_arch = "aarch64"))))]
mod stub;
#[cfg(all(not(test), not(all(target_os = "macos", target_arch = "aarch64"))))]
pub(crate) use stub::*;

#[cfg(test)]
mod fake;
#[cfg(test)]
pub(crate) use fake::*;

/// `hv_reg_t` constants (`Hypervisor/hv_vcpu_types.h`). X0 through X30 are
/// contiguous, so only the landmarks are named here.
pub(crate) mod reg {
    pub const X0: u32 = 0;
    pub const FP: u32 = 29;
    pub const LR: u32 = 30;
    pub const PC: u32 = 31;
    pub const CPSR: u32 = 34;
}

/// `hv_sys_reg_t` encodings for the system registers this crate touches.
pub(crate) mod sysreg {
    pub const SP_EL0: u16 = 0xc208;
    pub const ESR_EL1: u16 = 0xc290;
    pub const FAR_EL1: u16 = 0xc600;
}

/// `hv_memory_flags_t` bits for `hv_vm_map`.
pub(crate) mod mem {
    pub const READ: u64 = 1 << 0;
    pub const WRITE: u64 = 1 << 1;
    pub const EXEC: u64 = 1 << 2;
}
