//! Bindings for Apple's Hypervisor.framework on Apple Silicon.
//!
//! Provides VM and vCPU lifecycle management with guest memory mapping,
//! register access, and execution control. One VM exists per process at
//! most; the crate enforces that invariant and keeps handle teardown
//! idempotent and safe against concurrent use.
//!
//! # Requirements
//!
//! - macOS on Apple Silicon (aarch64)
//! - the `com.apple.security.hypervisor` entitlement, applied by code
//!   signing the binary
//!
//! On every other platform the crate builds, [`supported`] reports the
//! platform as unsupported, and all lifecycle calls fail with an
//! unsupported status.
//!
//! # Usage
//!
//! ```no_run
//! use hvf::{GuestAddress, HostMemory, MemPerm, Reg, Vm};
//!
//! fn main() -> Result<(), hvf::HvError> {
//!     if !hvf::supported().unwrap_or(false) {
//!         return Ok(());
//!     }
//!
//!     let vm = Vm::new()?;
//!     let vcpu = vm.create_vcpu()?;
//!
//!     // Stage guest code in a page-aligned buffer and map it in.
//!     let mut mem = HostMemory::new(0x4000)?;
//!     mem.as_mut_slice()[..4].copy_from_slice(&0xD280_0840u32.to_le_bytes()); // MOVZ X0, #0x42
//!     mem.as_mut_slice()[4..8].copy_from_slice(&0xD420_0000u32.to_le_bytes()); // BRK #0
//!     vm.map(
//!         mem.as_slice(),
//!         GuestAddress(0x4000),
//!         MemPerm::READ | MemPerm::WRITE | MemPerm::EXEC,
//!     )?;
//!
//!     vcpu.set_pc(0x4000)?;
//!     let exit = vcpu.run()?;
//!     println!("exit {:?}, X0 = {:#x}", exit.reason, vcpu.get_reg(Reg::X0)?);
//!
//!     vcpu.close()?;
//!     vm.unmap(GuestAddress(0x4000), mem.len() as u64)?;
//!     vm.close()?;
//!     Ok(())
//! }
//! ```
//!
//! # Resource management
//!
//! Close VMs and vCPUs explicitly. Handles are not clonable, so ownership
//! is single; dropping an open handle logs a leak warning and releases the
//! underlying resource best-effort, which is a diagnostic signal rather
//! than a supported teardown path.
//!
//! # Errors
//!
//! Hypervisor status codes surface as [`HvStatus`] inside [`HvError`].
//! Message detail is selected process-wide from the environment (`HV_ENV`,
//! `HV_DEBUG`); match on error variants, not message strings.

pub mod error;
pub mod exit;
pub mod memory;
pub mod metrics;
mod platform;
pub mod registers;
pub mod vstate;

pub use error::{HvError, HvStatus};
pub use exit::{ExitInfo, ExitReason};
pub use memory::{HostMemory, MemPerm};
pub use registers::Reg;
pub use vstate::vcpu::Vcpu;
pub use vstate::vm::Vm;

pub use vm_memory::GuestAddress;

/// Reports whether hardware virtualization is available and accessible.
///
/// Stable for the lifetime of the process and safe to call concurrently.
pub fn supported() -> Result<bool, HvError> {
    platform::availability()
}


#[cfg(test)]
mod tests {
    use std::io::Write;

    use vmm_sys_util::tempfile::TempFile;

    use super::*;
    use crate::memory::page_size;
    use crate::test_support::lock_vm;

    const MOVZ_X0_0X42: u32 = 0xD280_0840;
    const MOVZ_X0_0X53: u32 = 0xD280_0A60;
    const BRK_0: u32 = 0xD420_0000;
    const NOP: u32 = 0xD503_201F;

    #[test]
    fn probe_reports_availability() {
        assert!(supported().unwrap());
    }

    #[test]
    fn executes_guest_code_until_the_breakpoint() {
        let _guard = lock_vm();
        let before = metrics::snapshot();

        let vm = Vm::new().unwrap();
        let ps = page_size() as usize;
        let mut mem = HostMemory::new(ps).unwrap();
        mem.as_mut_slice()[..4].copy_from_slice(&MOVZ_X0_0X42.to_le_bytes());
        mem.as_mut_slice()[4..8].copy_from_slice(&BRK_0.to_le_bytes());

        vm.map(
            mem.as_slice(),
            GuestAddress(0x4000),
            MemPerm::READ | MemPerm::WRITE | MemPerm::EXEC,
        )
        .unwrap();

        let vcpu = vm.create_vcpu().unwrap();
        vcpu.set_pc(0x4000).unwrap();

        let exit = vcpu.run().unwrap();
        assert_eq!(exit.reason, ExitReason::Exception);
        assert_ne!(exit.esr, 0);
        assert_eq!(vcpu.get_reg(Reg::X0).unwrap(), 0x42);
        // Execution moved past the first instruction before trapping.
        assert_eq!(vcpu.get_pc().unwrap(), 0x4004);

        vcpu.close().unwrap();
        vm.unmap(GuestAddress(0x4000), ps as u64).unwrap();
        vm.close().unwrap();

        let after = metrics::snapshot();
        assert_eq!(after.map_operations, before.map_operations + 1);
        assert_eq!(after.unmap_operations, before.unmap_operations + 1);
        assert_eq!(after.run_operations, before.run_operations + 1);
        assert_eq!(after.vcpu_created, before.vcpu_created + 1);
        assert_eq!(after.vcpu_destroyed, before.vcpu_destroyed + 1);
    }

    #[test]
    fn maps_guest_code_from_a_file() {
        let _guard = lock_vm();
        let ps = page_size() as usize;

        let mut file = TempFile::new().unwrap().into_file();
        file.write_all(&MOVZ_X0_0X53.to_le_bytes()).unwrap();
        file.write_all(&BRK_0.to_le_bytes()).unwrap();
        file.set_len(ps as u64).unwrap();

        let mem = HostMemory::from_file(file, ps).unwrap();
        assert_eq!(&mem.as_slice()[..4], &MOVZ_X0_0X53.to_le_bytes());

        let vm = Vm::new().unwrap();
        vm.map(
            mem.as_slice(),
            GuestAddress(0x8000),
            MemPerm::READ | MemPerm::EXEC,
        )
        .unwrap();

        let vcpu = vm.create_vcpu().unwrap();
        vcpu.set_pc(0x8000).unwrap();
        let exit = vcpu.run().unwrap();
        assert_eq!(exit.reason, ExitReason::Exception);
        assert_eq!(vcpu.get_reg(Reg::X0).unwrap(), 0x53);

        vcpu.close().unwrap();
        vm.unmap(GuestAddress(0x8000), ps as u64).unwrap();
        vm.close().unwrap();
    }

    #[test]
    fn exit_without_a_syndrome_stays_unclassified() {
        let _guard = lock_vm();

        let vm = Vm::new().unwrap();
        let ps = page_size() as usize;
        let mut mem = HostMemory::new(ps).unwrap();
        mem.as_mut_slice()[..4].copy_from_slice(&NOP.to_le_bytes());

        vm.map(
            mem.as_slice(),
            GuestAddress(0x4000),
            MemPerm::READ | MemPerm::EXEC,
        )
        .unwrap();

        let vcpu = vm.create_vcpu().unwrap();
        vcpu.set_pc(0x4000).unwrap();
        let exit = vcpu.run().unwrap();
        assert_eq!(exit.reason, ExitReason::Unknown);
        assert_eq!(exit.esr, 0);
        assert_eq!(exit.far, 0);

        vcpu.close().unwrap();
        vm.close().unwrap();
    }
}
