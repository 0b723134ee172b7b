//! Hypervisor.framework FFI, macOS on Apple Silicon.
//!
//! Callers need the `com.apple.security.hypervisor` entitlement; without it
//! every call reports `HV_DENIED`.

#![allow(non_camel_case_types)]

use std::ffi::c_void;
use std::ptr;

use crate::error::{HvError, HV_ERROR, HV_SUCCESS};

type hv_return_t = i32;
type hv_vcpu_t = u64;
type hv_vm_config_t = *mut c_void;

/// Exit structure owned by the framework for each vCPU. Exit diagnosis goes
/// through the fault-syndrome system registers instead, so only the pointer
/// shape matters here.
#[repr(C)]
struct hv_vcpu_exit_t {
    _reason: u32,
    _exception: [u64; 3],
}

#[link(name = "Hypervisor", kind = "framework")]
extern "C" {
    fn hv_vm_create(config: hv_vm_config_t) -> hv_return_t;
    fn hv_vm_destroy() -> hv_return_t;
    fn hv_vm_map(uva: *mut c_void, gpa: u64, size: usize, flags: u64) -> hv_return_t;
    fn hv_vm_unmap(gpa: u64, size: usize) -> hv_return_t;
    fn hv_vm_config_create() -> hv_vm_config_t;
    fn hv_vm_config_get_default_ipa_size(ipa_size: *mut u32) -> hv_return_t;
    fn hv_vm_config_set_ipa_size(config: hv_vm_config_t, ipa_size: u32) -> hv_return_t;
    fn hv_vcpu_create(
        vcpu: *mut hv_vcpu_t,
        exit: *mut *const hv_vcpu_exit_t,
        config: *mut c_void,
    ) -> hv_return_t;
    fn hv_vcpu_destroy(vcpu: hv_vcpu_t) -> hv_return_t;
    fn hv_vcpu_get_reg(vcpu: hv_vcpu_t, reg: u32, value: *mut u64) -> hv_return_t;
    fn hv_vcpu_set_reg(vcpu: hv_vcpu_t, reg: u32, value: u64) -> hv_return_t;
    fn hv_vcpu_get_sys_reg(vcpu: hv_vcpu_t, reg: u16, value: *mut u64) -> hv_return_t;
    fn hv_vcpu_set_sys_reg(vcpu: hv_vcpu_t, reg: u16, value: u64) -> hv_return_t;
    fn hv_vcpu_run(vcpu: hv_vcpu_t) -> hv_return_t;
}

extern "C" {
    // From <os/object.h>; hv_vm_config_t is an os_object.
    fn os_release(object: *mut c_void);
}

/// Queries the `kern.hv_support` sysctl. A missing key means the capability
/// is absent, not that the probe failed.
pub(crate) fn availability() -> Result<bool, HvError> {
    let mut supported: u32 = 0;
    let mut len = std::mem::size_of::<u32>();
    // SAFETY: the name is a NUL-terminated literal and supported/len describe
    // a valid u32 out-buffer.
    let ret = unsafe {
        libc::sysctlbyname(
            c"kern.hv_support".as_ptr(),
            &mut supported as *mut u32 as *mut c_void,
            &mut len,
            ptr::null_mut(),
            0,
        )
    };
    if ret != 0 {
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::ENOENT) {
            return Ok(false);
        }
        return Err(HvError::NotSupported);
    }
    Ok(supported != 0)
}

/// Creates the VM, sized to the platform's default guest address space when
/// the configuration API is available.
pub(crate) fn vm_create() -> i32 {
    // SAFETY: the config object is released on every path; a null config is
    // an accepted fallback meaning framework defaults.
    unsafe {
        let config = hv_vm_config_create();
        if config.is_null() {
            return HV_ERROR as i32;
        }
        let mut ipa_size: u32 = 0;
        if hv_vm_config_get_default_ipa_size(&mut ipa_size) == HV_SUCCESS as i32 {
            let ret = hv_vm_config_set_ipa_size(config, ipa_size);
            if ret != HV_SUCCESS as i32 {
                os_release(config);
                return ret;
            }
        }
        let ret = hv_vm_create(config);
        os_release(config);
        ret
    }
}

pub(crate) fn vm_destroy() -> i32 {
    // SAFETY: no arguments; destroys the process's VM if one exists.
    unsafe { hv_vm_destroy() }
}

pub(crate) fn vm_map(host: *mut u8, guest_phys: u64, size: usize, flags: u64) -> i32 {
    // SAFETY: the caller validated that host points to a live, page-aligned
    // buffer of `size` bytes and keeps it alive while mapped.
    unsafe { hv_vm_map(host.cast(), guest_phys, size, flags) }
}

pub(crate) fn vm_unmap(guest_phys: u64, size: usize) -> i32 {
    // SAFETY: plain values; the framework validates the range.
    unsafe { hv_vm_unmap(guest_phys, size) }
}

pub(crate) fn vcpu_create(id: &mut u64) -> i32 {
    let mut vcpu: hv_vcpu_t = 0;
    let mut exit: *const hv_vcpu_exit_t = ptr::null();
    // SAFETY: vcpu and exit are valid out-pointers on the stack; a null
    // config requests default vCPU settings. The exit structure stays owned
    // by the framework and is not used by this crate.
    let ret = unsafe { hv_vcpu_create(&mut vcpu, &mut exit, ptr::null_mut()) };
    *id = vcpu;
    ret
}

pub(crate) fn vcpu_destroy(id: u64) -> i32 {
    // SAFETY: the id came from hv_vcpu_create; the framework rejects stale
    // handles with a status code.
    unsafe { hv_vcpu_destroy(id) }
}

pub(crate) fn reg_get(id: u64, reg: u32, value: &mut u64) -> i32 {
    // SAFETY: value is a valid out-pointer; reg is one of the hv_reg_t
    // constants selected by the register table.
    unsafe { hv_vcpu_get_reg(id, reg, value) }
}

pub(crate) fn reg_set(id: u64, reg: u32, value: u64) -> i32 {
    // SAFETY: plain values; see reg_get.
    unsafe { hv_vcpu_set_reg(id, reg, value) }
}

pub(crate) fn sys_reg_get(id: u64, reg: u16, value: &mut u64) -> i32 {
    // SAFETY: value is a valid out-pointer; reg is an hv_sys_reg_t encoding.
    unsafe { hv_vcpu_get_sys_reg(id, reg, value) }
}

pub(crate) fn sys_reg_set(id: u64, reg: u16, value: u64) -> i32 {
    // SAFETY: plain values; see sys_reg_get.
    unsafe { hv_vcpu_set_sys_reg(id, reg, value) }
}

pub(crate) fn vcpu_run(id: u64) -> i32 {
    // SAFETY: the id came from hv_vcpu_create. This blocks the calling
    // thread until the guest exits.
    unsafe { hv_vcpu_run(id) }
}
