//! Process-wide operation counters and timers.
//!
//! Recording is fire-and-forget from the lifecycle paths; the snapshot/reset
//! pair exists for observability and is not part of the core contract.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;

static VM_CREATED: AtomicU64 = AtomicU64::new(0);
static VM_DESTROYED: AtomicU64 = AtomicU64::new(0);
static VCPU_CREATED: AtomicU64 = AtomicU64::new(0);
static VCPU_DESTROYED: AtomicU64 = AtomicU64::new(0);
static MAP_OPERATIONS: AtomicU64 = AtomicU64::new(0);
static UNMAP_OPERATIONS: AtomicU64 = AtomicU64::new(0);
static REGISTER_OPERATIONS: AtomicU64 = AtomicU64::new(0);
static RUN_OPERATIONS: AtomicU64 = AtomicU64::new(0);
static TOTAL_VM_CREATE_NS: AtomicU64 = AtomicU64::new(0);
static TOTAL_RUN_NS: AtomicU64 = AtomicU64::new(0);
static VALIDATION_ERRORS: AtomicU64 = AtomicU64::new(0);
static RESOURCE_ERRORS: AtomicU64 = AtomicU64::new(0);

/// Point-in-time snapshot of the crate's operation metrics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Metrics {
    pub vm_created: u64,
    pub vm_destroyed: u64,
    pub vcpu_created: u64,
    pub vcpu_destroyed: u64,
    pub map_operations: u64,
    pub unmap_operations: u64,
    pub register_operations: u64,
    pub run_operations: u64,
    pub avg_vm_create_time_ns: u64,
    pub avg_run_time_ns: u64,
    pub validation_errors: u64,
    pub resource_errors: u64,
}

/// Returns the current metrics.
pub fn snapshot() -> Metrics {
    let vm_created = VM_CREATED.load(Ordering::Relaxed);
    let run_operations = RUN_OPERATIONS.load(Ordering::Relaxed);
    let avg_vm_create_time_ns = if vm_created > 0 {
        TOTAL_VM_CREATE_NS.load(Ordering::Relaxed) / vm_created
    } else {
        0
    };
    let avg_run_time_ns = if run_operations > 0 {
        TOTAL_RUN_NS.load(Ordering::Relaxed) / run_operations
    } else {
        0
    };
    Metrics {
        vm_created,
        vm_destroyed: VM_DESTROYED.load(Ordering::Relaxed),
        vcpu_created: VCPU_CREATED.load(Ordering::Relaxed),
        vcpu_destroyed: VCPU_DESTROYED.load(Ordering::Relaxed),
        map_operations: MAP_OPERATIONS.load(Ordering::Relaxed),
        unmap_operations: UNMAP_OPERATIONS.load(Ordering::Relaxed),
        register_operations: REGISTER_OPERATIONS.load(Ordering::Relaxed),
        run_operations,
        avg_vm_create_time_ns,
        avg_run_time_ns,
        validation_errors: VALIDATION_ERRORS.load(Ordering::Relaxed),
        resource_errors: RESOURCE_ERRORS.load(Ordering::Relaxed),
    }
}

/// Clears all counters and timers.
pub fn reset() {
    for counter in [
        &VM_CREATED,
        &VM_DESTROYED,
        &VCPU_CREATED,
        &VCPU_DESTROYED,
        &MAP_OPERATIONS,
        &UNMAP_OPERATIONS,
        &REGISTER_OPERATIONS,
        &RUN_OPERATIONS,
        &TOTAL_VM_CREATE_NS,
        &TOTAL_RUN_NS,
        &VALIDATION_ERRORS,
        &RESOURCE_ERRORS,
    ] {
        counter.store(0, Ordering::Relaxed);
    }
}

pub(crate) fn record_vm_create(elapsed: Duration) {
    VM_CREATED.fetch_add(1, Ordering::Relaxed);
    TOTAL_VM_CREATE_NS.fetch_add(elapsed.as_nanos() as u64, Ordering::Relaxed);
}

pub(crate) fn record_vm_destroy() {
    VM_DESTROYED.fetch_add(1, Ordering::Relaxed);
}

pub(crate) fn record_vcpu_create() {
    VCPU_CREATED.fetch_add(1, Ordering::Relaxed);
}

pub(crate) fn record_vcpu_destroy() {
    VCPU_DESTROYED.fetch_add(1, Ordering::Relaxed);
}

pub(crate) fn record_map() {
    MAP_OPERATIONS.fetch_add(1, Ordering::Relaxed);
}

pub(crate) fn record_unmap() {
    UNMAP_OPERATIONS.fetch_add(1, Ordering::Relaxed);
}

pub(crate) fn record_register_op() {
    REGISTER_OPERATIONS.fetch_add(1, Ordering::Relaxed);
}

pub(crate) fn record_run(elapsed: Duration) {
    RUN_OPERATIONS.fetch_add(1, Ordering::Relaxed);
    TOTAL_RUN_NS.fetch_add(elapsed.as_nanos() as u64, Ordering::Relaxed);
}

pub(crate) fn record_validation_error() {
    VALIDATION_ERRORS.fetch_add(1, Ordering::Relaxed);
}

pub(crate) fn record_resource_error() {
    RESOURCE_ERRORS.fetch_add(1, Ordering::Relaxed);
}
