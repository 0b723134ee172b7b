use std::env;
use std::fmt;
use std::sync::OnceLock;

use vm_memory::mmap::MmapRegionError;

use crate::registers::Reg;

// Hypervisor.framework hv_return_t constants (Hypervisor/hv_error.h).
pub(crate) const HV_SUCCESS: u32 = 0x0000_0000;
pub(crate) const HV_ERROR: u32 = 0xFAE9_4001;
pub(crate) const HV_BUSY: u32 = 0xFAE9_4002;
pub(crate) const HV_BAD_ARGUMENT: u32 = 0xFAE9_4003;
pub(crate) const HV_ILLEGAL_GUEST_STATE: u32 = 0xFAE9_4004;
pub(crate) const HV_NO_RESOURCES: u32 = 0xFAE9_4005;
pub(crate) const HV_NO_DEVICE: u32 = 0xFAE9_4006;
pub(crate) const HV_DENIED: u32 = 0xFAE9_4007;
pub(crate) const HV_EXISTS: u32 = 0xFAE9_4008;
pub(crate) const HV_UNSUPPORTED: u32 = 0xFAE9_400F;

/// Status reported by a hypervisor call, mapped one-to-one from the raw
/// `hv_return_t` value. Codes outside the documented set are preserved in
/// [`HvStatus::Unknown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HvStatus {
    Error,
    Busy,
    BadArgument,
    IllegalGuestState,
    NoResources,
    NoDevice,
    Denied,
    Exists,
    Unsupported,
    Unknown(u32),
}

impl HvStatus {
    /// Maps a raw non-success `hv_return_t` value to its status kind.
    pub fn from_code(code: u32) -> HvStatus {
        match code {
            HV_ERROR => HvStatus::Error,
            HV_BUSY => HvStatus::Busy,
            HV_BAD_ARGUMENT => HvStatus::BadArgument,
            HV_ILLEGAL_GUEST_STATE => HvStatus::IllegalGuestState,
            HV_NO_RESOURCES => HvStatus::NoResources,
            HV_NO_DEVICE => HvStatus::NoDevice,
            HV_DENIED => HvStatus::Denied,
            HV_EXISTS => HvStatus::Exists,
            HV_UNSUPPORTED => HvStatus::Unsupported,
            other => HvStatus::Unknown(other),
        }
    }

    /// The raw 32-bit `hv_return_t` value.
    pub fn code(self) -> u32 {
        match self {
            HvStatus::Error => HV_ERROR,
            HvStatus::Busy => HV_BUSY,
            HvStatus::BadArgument => HV_BAD_ARGUMENT,
            HvStatus::IllegalGuestState => HV_ILLEGAL_GUEST_STATE,
            HvStatus::NoResources => HV_NO_RESOURCES,
            HvStatus::NoDevice => HV_NO_DEVICE,
            HvStatus::Denied => HV_DENIED,
            HvStatus::Exists => HV_EXISTS,
            HvStatus::Unsupported => HV_UNSUPPORTED,
            HvStatus::Unknown(code) => code,
        }
    }

    fn detailed(self) -> String {
        match self {
            HvStatus::Error => {
                "hv: general error (HV_ERROR) - check system requirements and API usage".into()
            }
            HvStatus::Busy => {
                "hv: resource busy (HV_BUSY) - another operation is in progress".into()
            }
            HvStatus::BadArgument => {
                "hv: invalid argument (HV_BAD_ARGUMENT) - check parameter values and alignment"
                    .into()
            }
            HvStatus::IllegalGuestState => {
                "hv: illegal guest state (HV_ILLEGAL_GUEST_STATE) - guest CPU state is invalid"
                    .into()
            }
            HvStatus::NoResources => {
                "hv: insufficient resources (HV_NO_RESOURCES) - system memory or limits exceeded"
                    .into()
            }
            HvStatus::NoDevice => {
                "hv: device not found (HV_NO_DEVICE) - hardware virtualization unavailable".into()
            }
            HvStatus::Denied => "hv: access denied (HV_DENIED) - missing entitlement \
                 'com.apple.security.hypervisor' or insufficient privileges"
                .into(),
            HvStatus::Exists => {
                "hv: resource exists (HV_EXISTS) - VM or vCPU already created".into()
            }
            HvStatus::Unsupported => "hv: operation unsupported (HV_UNSUPPORTED) - feature not \
                 available on this hardware/OS"
                .into(),
            HvStatus::Unknown(code) => format!(
                "hv: unknown error code {code:#010x} - consult Apple Hypervisor.framework \
                 documentation"
            ),
        }
    }

    fn terse(self) -> String {
        match self {
            HvStatus::Error => "hv: general error".into(),
            HvStatus::Busy => "hv: resource busy".into(),
            HvStatus::BadArgument => "hv: invalid argument".into(),
            HvStatus::IllegalGuestState => "hv: illegal guest state".into(),
            HvStatus::NoResources => "hv: insufficient resources".into(),
            HvStatus::NoDevice => "hv: device not found".into(),
            HvStatus::Denied => "hv: access denied".into(),
            HvStatus::Exists => "hv: resource exists".into(),
            HvStatus::Unsupported => "hv: operation unsupported".into(),
            HvStatus::Unknown(_) => "hv: hypervisor error".into(),
        }
    }
}

impl fmt::Display for HvStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if sanitize_messages() {
            f.write_str(&self.terse())
        } else {
            f.write_str(&self.detailed())
        }
    }
}

impl std::error::Error for HvStatus {}

/// Maps a raw `hv_return_t` to a result.
pub(crate) fn check(ret: i32) -> Result<(), HvStatus> {
    match ret as u32 {
        HV_SUCCESS => Ok(()),
        code => Err(HvStatus::from_code(code)),
    }
}

/// Whether error messages are rendered terse (production) instead of with
/// remediation hints (development). Derived from `HV_ENV` / `HV_DEBUG` once
/// per process; the choice is global, not per call site.
fn sanitize_messages() -> bool {
    static SANITIZE: OnceLock<bool> = OnceLock::new();
    *SANITIZE.get_or_init(|| {
        sanitize_from_env(
            env::var("HV_ENV").ok().as_deref(),
            env::var("HV_DEBUG").ok().as_deref(),
        )
    })
}

fn sanitize_from_env(hv_env: Option<&str>, hv_debug: Option<&str>) -> bool {
    if matches!(hv_env, Some("production") | Some("prod")) {
        return true;
    }
    if let Some(debug) = hv_debug {
        // Debug mode explicitly disabled also means production rendering.
        if matches!(debug.to_ascii_lowercase().as_str(), "0" | "f" | "false") {
            return true;
        }
    }
    false
}

/// Errors produced by this crate.
///
/// Platform-backed variants carry the [`HvStatus`] the hypervisor reported;
/// the remaining variants are invariant violations raised entirely by this
/// layer and render a fixed message regardless of the sanitization mode.
/// Dispatch on the variant (or [`HvError::status`]), never on the message
/// text.
#[derive(Debug, thiserror::Error)]
pub enum HvError {
    /// Status reported by a hypervisor call.
    #[error(transparent)]
    Platform(#[from] HvStatus),
    /// VM destruction failed; the VM is still considered active.
    #[error("failed to destroy VM: {0}")]
    DestroyVm(#[source] HvStatus),
    /// vCPU destruction failed; the handle is still considered open.
    #[error("failed to destroy vCPU: {0}")]
    DestroyVcpu(#[source] HvStatus),
    /// The platform rejected a guest memory mapping.
    #[error("failed to map {len} bytes at {guest_phys:#x}: {source}")]
    Map {
        len: u64,
        guest_phys: u64,
        #[source]
        source: HvStatus,
    },
    /// The platform rejected a guest memory unmapping.
    #[error("failed to unmap region {guest_phys:#x}+{size}: {source}")]
    Unmap {
        guest_phys: u64,
        size: u64,
        #[source]
        source: HvStatus,
    },
    /// A register read failed.
    #[error("failed to get register {reg}: {source}")]
    GetReg {
        reg: Reg,
        #[source]
        source: HvStatus,
    },
    /// A register write failed.
    #[error("failed to set register {reg}: {source}")]
    SetReg {
        reg: Reg,
        #[source]
        source: HvStatus,
    },
    /// vCPU execution failed.
    #[error("failed to run vCPU: {0}")]
    Run(#[source] HvStatus),
    /// Allocating a host buffer failed.
    #[error("failed to allocate host memory: {0}")]
    HostAlloc(#[source] MmapRegionError),

    /// Operation on a closed VM handle.
    #[error("hv: VM is closed")]
    VmClosed,
    /// Operation on a closed vCPU handle.
    #[error("hv: VCPU is closed")]
    VcpuClosed,
    /// A VM already exists in this process.
    #[error("hv: VM already active in this process")]
    VmAlreadyActive,
    /// Mapping requires a non-empty host buffer.
    #[error("hv: map requires non-empty host buffer")]
    EmptyBuffer,
    /// Buffer or region size exceeds what the platform calls accept.
    #[error("hv: region too large ({len} bytes, max {max})")]
    BufferTooLarge { len: u64, max: u64 },
    /// Guest address plus length leaves the 64-bit address space.
    #[error("hv: guest address range would overflow: {guest_phys:#x}+{len}")]
    AddressOverflow { guest_phys: u64, len: u64 },
    /// Mapping requires at least one permission bit.
    #[error("hv: map requires at least one permission (read, write, or exec)")]
    NoPermissions,
    /// Permission set contains bits outside read/write/exec.
    #[error("hv: invalid permission bits {perms:#x} (valid: {valid:#x})")]
    InvalidPermissions { perms: u32, valid: u32 },
    /// Guest physical address is not page-aligned.
    #[error("hv: guest address not page-aligned: {addr:#x} (page size: {page_size})")]
    UnalignedGuestAddress { addr: u64, page_size: u64 },
    /// Buffer or region length is not a page multiple.
    #[error("hv: length not a page multiple: {len} (page size: {page_size})")]
    UnalignedLength { len: u64, page_size: u64 },
    /// Host buffer base address is not page-aligned.
    #[error("hv: host buffer base not page-aligned: {addr:#x} (page size: {page_size})")]
    UnalignedHostBuffer { addr: usize, page_size: u64 },
    /// Unmap requires a non-zero size.
    #[error("hv: unmap requires non-zero size")]
    ZeroSize,
    /// Raw register value outside the defined register set.
    #[error("hv: invalid register {0}")]
    InvalidRegister(u32),
    /// The referenced guest range is not mapped.
    #[error("hv: memory not mapped")]
    MemoryNotMapped,
    /// Hardware virtualization is not available on this platform.
    #[error("hv: not supported on this platform")]
    NotSupported,
}

impl HvError {
    /// The underlying platform status, if this error wraps one.
    pub fn status(&self) -> Option<HvStatus> {
        match self {
            HvError::Platform(status)
            | HvError::DestroyVm(status)
            | HvError::DestroyVcpu(status)
            | HvError::Run(status)
            | HvError::Map { source: status, .. }
            | HvError::Unmap { source: status, .. }
            | HvError::GetReg { source: status, .. }
            | HvError::SetReg { source: status, .. } => Some(*status),
            _ => None,
        }
    }
}
