//! Guest memory mapping.
//!
//! Alignment and overflow are validated host-side, before anything reaches
//! the platform call: a misaligned or overflowing argument must produce a
//! typed error here, not undefined behavior at the hardware boundary.

use std::fs::File;
use std::ops::{BitOr, BitOrAssign};
use std::sync::OnceLock;

use vm_memory::{Address, FileOffset, GuestAddress, MmapRegion};

use crate::error::{self, HvError};
use crate::platform;
use crate::{metrics, vstate::vm::Vm};

/// Guest memory access permissions, combinable with `|`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemPerm(u32);

impl MemPerm {
    pub const READ: MemPerm = MemPerm(1 << 0);
    pub const WRITE: MemPerm = MemPerm(1 << 1);
    pub const EXEC: MemPerm = MemPerm(1 << 2);

    /// The empty permission set. Not a valid mapping permission.
    pub const fn empty() -> MemPerm {
        MemPerm(0)
    }

    const fn all() -> MemPerm {
        MemPerm(0b111)
    }

    /// The raw bit representation.
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// True if every bit in `other` is set in `self`.
    pub const fn contains(self, other: MemPerm) -> bool {
        self.0 & other.0 == other.0
    }

    pub(crate) const fn invalid_bits(self) -> u32 {
        self.0 & !MemPerm::all().0
    }
}

impl BitOr for MemPerm {
    type Output = MemPerm;

    fn bitor(self, rhs: MemPerm) -> MemPerm {
        MemPerm(self.0 | rhs.0)
    }
}

impl BitOrAssign for MemPerm {
    fn bitor_assign(&mut self, rhs: MemPerm) {
        self.0 |= rhs.0;
    }
}

/// Platform calls take a size the kernel treats as signed; reject anything
/// beyond that before converting.
const MAX_MAP_BYTES: u64 = i32::MAX as u64;

/// The host page size, cached for the process lifetime.
pub(crate) fn page_size() -> u64 {
    static PAGE_SIZE: OnceLock<u64> = OnceLock::new();
    *PAGE_SIZE.get_or_init(|| {
        // SAFETY: sysconf takes no pointers and cannot fail for _SC_PAGESIZE
        // on any supported target.
        let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        size as u64
    })
}

pub(crate) fn is_page_aligned(value: u64) -> bool {
    value & (page_size() - 1) == 0
}

pub(crate) fn validate_map(
    host: &[u8],
    guest_phys: GuestAddress,
    perms: MemPerm,
) -> Result<(), HvError> {
    if host.is_empty() {
        return Err(HvError::EmptyBuffer);
    }
    let len = host.len() as u64;
    if len > MAX_MAP_BYTES {
        return Err(HvError::BufferTooLarge {
            len,
            max: MAX_MAP_BYTES,
        });
    }
    if guest_phys.raw_value().checked_add(len).is_none() {
        return Err(HvError::AddressOverflow {
            guest_phys: guest_phys.raw_value(),
            len,
        });
    }
    if perms == MemPerm::empty() {
        return Err(HvError::NoPermissions);
    }
    if perms.invalid_bits() != 0 {
        return Err(HvError::InvalidPermissions {
            perms: perms.bits(),
            valid: MemPerm::all().bits(),
        });
    }
    if !is_page_aligned(guest_phys.raw_value()) {
        return Err(HvError::UnalignedGuestAddress {
            addr: guest_phys.raw_value(),
            page_size: page_size(),
        });
    }
    if !is_page_aligned(len) {
        return Err(HvError::UnalignedLength {
            len,
            page_size: page_size(),
        });
    }
    let base = host.as_ptr() as usize;
    if !is_page_aligned(base as u64) {
        return Err(HvError::UnalignedHostBuffer {
            addr: base,
            page_size: page_size(),
        });
    }
    Ok(())
}

pub(crate) fn validate_unmap(guest_phys: GuestAddress, size: u64) -> Result<(), HvError> {
    if size == 0 {
        return Err(HvError::ZeroSize);
    }
    if size > MAX_MAP_BYTES {
        return Err(HvError::BufferTooLarge {
            len: size,
            max: MAX_MAP_BYTES,
        });
    }
    if guest_phys.raw_value().checked_add(size).is_none() {
        return Err(HvError::AddressOverflow {
            guest_phys: guest_phys.raw_value(),
            len: size,
        });
    }
    if !is_page_aligned(guest_phys.raw_value()) {
        return Err(HvError::UnalignedGuestAddress {
            addr: guest_phys.raw_value(),
            page_size: page_size(),
        });
    }
    if !is_page_aligned(size) {
        return Err(HvError::UnalignedLength {
            len: size,
            page_size: page_size(),
        });
    }
    Ok(())
}

fn platform_flags(perms: MemPerm) -> u64 {
    let mut flags = 0;
    if perms.contains(MemPerm::READ) {
        flags |= platform::mem::READ;
    }
    if perms.contains(MemPerm::WRITE) {
        flags |= platform::mem::WRITE;
    }
    if perms.contains(MemPerm::EXEC) {
        flags |= platform::mem::EXEC;
    }
    flags
}

impl Vm {
    /// Maps a host buffer into the guest physical address space.
    ///
    /// The guest address, buffer length, and the buffer's base address must
    /// all be page-aligned. The buffer must stay alive and unmoved for as
    /// long as the mapping exists; this call borrows it but takes no
    /// ownership, so keeping it valid until [`Vm::unmap`] is the caller's
    /// contract.
    pub fn map(&self, host: &[u8], guest_phys: GuestAddress, perms: MemPerm) -> Result<(), HvError> {
        let _state = self.lock_open().inspect_err(|_| metrics::record_validation_error())?;
        if let Err(err) = validate_map(host, guest_phys, perms) {
            metrics::record_validation_error();
            return Err(err);
        }

        let ret = platform::vm_map(
            host.as_ptr() as *mut u8,
            guest_phys.raw_value(),
            host.len(),
            platform_flags(perms),
        );
        if let Err(status) = error::check(ret) {
            metrics::record_resource_error();
            return Err(HvError::Map {
                len: host.len() as u64,
                guest_phys: guest_phys.raw_value(),
                source: status,
            });
        }

        log::debug!(
            "mapped {} bytes at {:#x} (perms {:#x})",
            host.len(),
            guest_phys.raw_value(),
            perms.bits()
        );
        metrics::record_map();
        Ok(())
    }

    /// Removes a region from the guest physical address space.
    pub fn unmap(&self, guest_phys: GuestAddress, size: u64) -> Result<(), HvError> {
        let _state = self.lock_open().inspect_err(|_| metrics::record_validation_error())?;
        if let Err(err) = validate_unmap(guest_phys, size) {
            metrics::record_validation_error();
            return Err(err);
        }

        let ret = platform::vm_unmap(guest_phys.raw_value(), size as usize);
        if let Err(status) = error::check(ret) {
            metrics::record_resource_error();
            return Err(HvError::Unmap {
                guest_phys: guest_phys.raw_value(),
                size,
                source: status,
            });
        }

        log::debug!("unmapped {:#x}+{}", guest_phys.raw_value(), size);
        metrics::record_unmap();
        Ok(())
    }
}

/// A page-aligned, zero-initialized host buffer suitable for guest mapping.
///
/// Plain heap allocations rarely land on a page boundary; this wraps an
/// anonymous private mapping so the base address always satisfies the
/// mapper's host-alignment requirement. `size` should be a multiple of the
/// host page size, or the mapping validation will reject the buffer later.
pub struct HostMemory {
    region: MmapRegion,
}

impl HostMemory {
    /// Allocates `size` bytes of page-aligned host memory.
    pub fn new(size: usize) -> Result<HostMemory, HvError> {
        let region = MmapRegion::new(size).map_err(HvError::HostAlloc)?;
        Ok(HostMemory { region })
    }

    /// Maps the first `size` bytes of `file` instead of anonymous memory,
    /// for loading guest images.
    pub fn from_file(file: File, size: usize) -> Result<HostMemory, HvError> {
        let region =
            MmapRegion::from_file(FileOffset::new(file, 0), size).map_err(HvError::HostAlloc)?;
        Ok(HostMemory { region })
    }

    pub fn len(&self) -> usize {
        self.region.size()
    }

    pub fn is_empty(&self) -> bool {
        self.region.size() == 0
    }

    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: the region owns a live mapping of exactly `size` bytes for
        // as long as `self` exists, and no other safe API hands out an
        // aliasing mutable view without &mut self.
        unsafe { std::slice::from_raw_parts(self.region.as_ptr(), self.region.size()) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: as above, plus &mut self guarantees exclusive access.
        unsafe { std::slice::from_raw_parts_mut(self.region.as_ptr(), self.region.size()) }
    }
}

impl std::fmt::Debug for HostMemory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostMemory")
            .field("len", &self.len())
            .finish()
    }
}
