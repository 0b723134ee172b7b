//! The ARM64 register file exposed to callers.

use std::fmt;

use crate::error::HvError;
use crate::platform;

/// An ARM64 general-purpose or special register.
///
/// Covers the 29 general-purpose registers plus frame pointer, link
/// register, stack pointer, program counter, and the status register. Each
/// holds a 64-bit value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Reg {
    X0 = 0,
    X1,
    X2,
    X3,
    X4,
    X5,
    X6,
    X7,
    X8,
    X9,
    X10,
    X11,
    X12,
    X13,
    X14,
    X15,
    X16,
    X17,
    X18,
    X19,
    X20,
    X21,
    X22,
    X23,
    X24,
    X25,
    X26,
    X27,
    X28,
    /// Frame pointer (X29).
    Fp,
    /// Link register (X30).
    Lr,
    /// Stack pointer (SP_EL0).
    Sp,
    /// Program counter.
    Pc,
    /// Status register (CPSR).
    Cpsr,
}

/// Where a register lives in the hypervisor API: the general-register call
/// or the system-register call. The stack pointer is the one register that
/// takes the system route.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PlatformReg {
    Core(u32),
    Sys(u16),
}

// Built once, indexed by discriminant. X0..X30 are contiguous in hv_reg_t,
// so the general entries are just the discriminants up through LR.
const REG_MAP: [PlatformReg; Reg::COUNT] = {
    let mut map = [PlatformReg::Core(platform::reg::X0); Reg::COUNT];
    let mut i = Reg::X0 as usize;
    while i <= Reg::X28 as usize {
        map[i] = PlatformReg::Core(i as u32);
        i += 1;
    }
    map[Reg::Fp as usize] = PlatformReg::Core(platform::reg::FP);
    map[Reg::Lr as usize] = PlatformReg::Core(platform::reg::LR);
    map[Reg::Sp as usize] = PlatformReg::Sys(platform::sysreg::SP_EL0);
    map[Reg::Pc as usize] = PlatformReg::Core(platform::reg::PC);
    map[Reg::Cpsr as usize] = PlatformReg::Core(platform::reg::CPSR);
    map
};

impl Reg {
    /// Number of registers in the set.
    pub const COUNT: usize = 34;

    /// Every register, in discriminant order.
    pub const ALL: [Reg; Reg::COUNT] = [
        Reg::X0,
        Reg::X1,
        Reg::X2,
        Reg::X3,
        Reg::X4,
        Reg::X5,
        Reg::X6,
        Reg::X7,
        Reg::X8,
        Reg::X9,
        Reg::X10,
        Reg::X11,
        Reg::X12,
        Reg::X13,
        Reg::X14,
        Reg::X15,
        Reg::X16,
        Reg::X17,
        Reg::X18,
        Reg::X19,
        Reg::X20,
        Reg::X21,
        Reg::X22,
        Reg::X23,
        Reg::X24,
        Reg::X25,
        Reg::X26,
        Reg::X27,
        Reg::X28,
        Reg::Fp,
        Reg::Lr,
        Reg::Sp,
        Reg::Pc,
        Reg::Cpsr,
    ];

    pub(crate) fn to_platform(self) -> PlatformReg {
        REG_MAP[self as usize]
    }
}

impl TryFrom<u32> for Reg {
    type Error = HvError;

    fn try_from(value: u32) -> Result<Reg, HvError> {
        Reg::ALL
            .get(value as usize)
            .copied()
            .ok_or(HvError::InvalidRegister(value))
    }
}

impl fmt::Display for Reg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reg::Fp => f.write_str("FP"),
            Reg::Lr => f.write_str("LR"),
            Reg::Sp => f.write_str("SP"),
            Reg::Pc => f.write_str("PC"),
            Reg::Cpsr => f.write_str("CPSR"),
            general => write!(f, "X{}", *general as u32),
        }
    }
}
