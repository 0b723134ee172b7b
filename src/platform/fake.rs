//! Deterministic in-process double of the hypervisor call surface, used by
//! the unit tests.
//!
//! Tracks VM and vCPU existence, per-vCPU register files, and guest
//! mappings, and interprets just enough AArch64 (`MOVZ` with a zero shift
//! and `BRK`) for the execution scenarios to observe a realistic
//! exception exit. Everything else surrenders with a clean, unclassified
//! exit.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, OnceLock};

use crate::error::{HvError, HV_BAD_ARGUMENT, HV_EXISTS, HV_ILLEGAL_GUEST_STATE, HV_SUCCESS};

use super::{reg, sysreg};

// hv_reg_t discriminants run X0..X30, PC, FPCR, FPSR, CPSR.
const CORE_REG_SLOTS: usize = 35;

// ESR_EL2 exception class for a BRK instruction taken from a lower EL.
const ESR_EC_BRK: u64 = 0x3C << 26;

struct FakeVcpu {
    regs: [u64; CORE_REG_SLOTS],
    sp_el0: u64,
    esr_el1: u64,
    far_el1: u64,
}

impl FakeVcpu {
    fn new() -> FakeVcpu {
        FakeVcpu {
            regs: [0; CORE_REG_SLOTS],
            sp_el0: 0,
            esr_el1: 0,
            far_el1: 0,
        }
    }
}

struct Mapping {
    guest_phys: u64,
    size: u64,
    host: usize,
}

#[derive(Default)]
struct FakeHv {
    vm_exists: bool,
    next_vcpu: u64,
    vcpus: HashMap<u64, FakeVcpu>,
    mappings: Vec<Mapping>,
}

fn state() -> MutexGuard<'static, FakeHv> {
    static STATE: OnceLock<Mutex<FakeHv>> = OnceLock::new();
    STATE
        .get_or_init(|| Mutex::new(FakeHv::default()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

const fn ok() -> i32 {
    HV_SUCCESS as i32
}

const fn err(code: u32) -> i32 {
    code as i32
}

pub(crate) fn availability() -> Result<bool, HvError> {
    Ok(true)
}

pub(crate) fn vm_create() -> i32 {
    let mut s = state();
    if s.vm_exists {
        return err(HV_EXISTS);
    }
    s.vm_exists = true;
    ok()
}

pub(crate) fn vm_destroy() -> i32 {
    let mut s = state();
    if !s.vm_exists {
        return err(HV_BAD_ARGUMENT);
    }
    s.vm_exists = false;
    s.vcpus.clear();
    s.mappings.clear();
    ok()
}

pub(crate) fn vm_map(host: *mut u8, guest_phys: u64, size: usize, _flags: u64) -> i32 {
    let mut s = state();
    if !s.vm_exists {
        return err(HV_BAD_ARGUMENT);
    }
    let size = size as u64;
    let end = guest_phys + size;
    let overlaps = s
        .mappings
        .iter()
        .any(|m| guest_phys < m.guest_phys + m.size && m.guest_phys < end);
    if overlaps {
        return err(HV_BAD_ARGUMENT);
    }
    s.mappings.push(Mapping {
        guest_phys,
        size,
        host: host as usize,
    });
    ok()
}

pub(crate) fn vm_unmap(guest_phys: u64, size: usize) -> i32 {
    let mut s = state();
    if !s.vm_exists {
        return err(HV_BAD_ARGUMENT);
    }
    match s
        .mappings
        .iter()
        .position(|m| m.guest_phys == guest_phys && m.size == size as u64)
    {
        Some(index) => {
            s.mappings.remove(index);
            ok()
        }
        None => err(HV_BAD_ARGUMENT),
    }
}

pub(crate) fn vcpu_create(id: &mut u64) -> i32 {
    let mut s = state();
    if !s.vm_exists {
        return err(HV_BAD_ARGUMENT);
    }
    s.next_vcpu += 1;
    let new_id = s.next_vcpu;
    s.vcpus.insert(new_id, FakeVcpu::new());
    *id = new_id;
    ok()
}

pub(crate) fn vcpu_destroy(id: u64) -> i32 {
    match state().vcpus.remove(&id) {
        Some(_) => ok(),
        None => err(HV_BAD_ARGUMENT),
    }
}

pub(crate) fn reg_get(id: u64, hv_reg: u32, value: &mut u64) -> i32 {
    let s = state();
    let Some(vcpu) = s.vcpus.get(&id) else {
        return err(HV_BAD_ARGUMENT);
    };
    let Some(&stored) = vcpu.regs.get(hv_reg as usize) else {
        return err(HV_BAD_ARGUMENT);
    };
    *value = stored;
    ok()
}

pub(crate) fn reg_set(id: u64, hv_reg: u32, value: u64) -> i32 {
    let mut s = state();
    let Some(vcpu) = s.vcpus.get_mut(&id) else {
        return err(HV_BAD_ARGUMENT);
    };
    let Some(slot) = vcpu.regs.get_mut(hv_reg as usize) else {
        return err(HV_BAD_ARGUMENT);
    };
    *slot = value;
    ok()
}

pub(crate) fn sys_reg_get(id: u64, sys_reg: u16, value: &mut u64) -> i32 {
    let s = state();
    let Some(vcpu) = s.vcpus.get(&id) else {
        return err(HV_BAD_ARGUMENT);
    };
    *value = match sys_reg {
        sysreg::SP_EL0 => vcpu.sp_el0,
        sysreg::ESR_EL1 => vcpu.esr_el1,
        sysreg::FAR_EL1 => vcpu.far_el1,
        _ => return err(HV_BAD_ARGUMENT),
    };
    ok()
}

pub(crate) fn sys_reg_set(id: u64, sys_reg: u16, value: u64) -> i32 {
    let mut s = state();
    let Some(vcpu) = s.vcpus.get_mut(&id) else {
        return err(HV_BAD_ARGUMENT);
    };
    match sys_reg {
        sysreg::SP_EL0 => vcpu.sp_el0 = value,
        sysreg::ESR_EL1 => vcpu.esr_el1 = value,
        sysreg::FAR_EL1 => vcpu.far_el1 = value,
        _ => return err(HV_BAD_ARGUMENT),
    }
    ok()
}

pub(crate) fn vcpu_run(id: u64) -> i32 {
    let mut s = state();
    let Some(vcpu) = s.vcpus.get(&id) else {
        return err(HV_BAD_ARGUMENT);
    };

    let mut regs = vcpu.regs;
    let mut pc = regs[reg::PC as usize];
    let mut esr = 0;
    let mut far = 0;

    for _ in 0..1024 {
        let Some(insn) = fetch(&s.mappings, pc) else {
            return err(HV_ILLEGAL_GUEST_STATE);
        };
        if insn & 0xFF80_0000 == 0xD280_0000 {
            // MOVZ Xd, #imm16, LSL #(hw * 16)
            let rd = (insn & 0x1F) as usize;
            let imm = u64::from((insn >> 5) & 0xFFFF);
            let hw = (insn >> 21) & 0x3;
            if rd < 31 {
                regs[rd] = imm << (hw * 16);
            }
            pc += 4;
        } else if insn & 0xFFE0_001F == 0xD420_0000 {
            // BRK #imm16 traps with the breakpoint at the preferred return
            // address.
            let imm = u64::from((insn >> 5) & 0xFFFF);
            esr = ESR_EC_BRK | imm;
            far = 0;
            break;
        } else {
            // Anything outside the modeled subset exits unclassified.
            break;
        }
    }

    let vcpu = s.vcpus.get_mut(&id).expect("vcpu existed above");
    vcpu.regs = regs;
    vcpu.regs[reg::PC as usize] = pc;
    vcpu.esr_el1 = esr;
    vcpu.far_el1 = far;
    ok()
}

fn fetch(mappings: &[Mapping], pc: u64) -> Option<u32> {
    for mapping in mappings {
        if pc >= mapping.guest_phys && pc + 4 <= mapping.guest_phys + mapping.size {
            let offset = (pc - mapping.guest_phys) as usize;
            let mut bytes = [0u8; 4];
            // SAFETY: whoever mapped this range promised to keep the host
            // buffer alive while it is mapped; the bounds check above keeps
            // the read inside it.
            unsafe {
                std::ptr::copy_nonoverlapping(
                    (mapping.host + offset) as *const u8,
                    bytes.as_mut_ptr(),
                    4,
                );
            }
            return Some(u32::from_le_bytes(bytes));
        }
    }
    None
}
