//! Stub backend for targets without Hypervisor.framework.
//!
//! Keeps the crate building everywhere: the probe reports the platform as
//! unsupported and every call surfaces `HV_UNSUPPORTED`.

use crate::error::{HvError, HV_UNSUPPORTED};

const UNSUPPORTED: i32 = HV_UNSUPPORTED as i32;

pub(crate) fn availability() -> Result<bool, HvError> {
    Err(HvError::NotSupported)
}

pub(crate) fn vm_create() -> i32 {
    UNSUPPORTED
}

pub(crate) fn vm_destroy() -> i32 {
    UNSUPPORTED
}

pub(crate) fn vm_map(_host: *mut u8, _guest_phys: u64, _size: usize, _flags: u64) -> i32 {
    UNSUPPORTED
}

pub(crate) fn vm_unmap(_guest_phys: u64, _size: usize) -> i32 {
    UNSUPPORTED
}

pub(crate) fn vcpu_create(_id: &mut u64) -> i32 {
    UNSUPPORTED
}

pub(crate) fn vcpu_destroy(_id: u64) -> i32 {
    UNSUPPORTED
}

pub(crate) fn reg_get(_id: u64, _reg: u32, _value: &mut u64) -> i32 {
    UNSUPPORTED
}

pub(crate) fn reg_set(_id: u64, _reg: u32, _value: u64) -> i32 {
    UNSUPPORTED
}

pub(crate) fn sys_reg_get(_id: u64, _reg: u16, _value: &mut u64) -> i32 {
    UNSUPPORTED
}

pub(crate) fn sys_reg_set(_id: u64, _reg: u16, _value: u64) -> i32 {
    UNSUPPORTED
}

pub(crate) fn vcpu_run(_id: u64) -> i32 {
    UNSUPPORTED
}
