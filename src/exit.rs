//! Classification of vCPU exits.

/// Why a vCPU returned control to the host.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ExitReason {
    /// No further diagnosis was possible.
    #[default]
    Unknown,
    /// The guest took an exception (fault, breakpoint, trapped instruction).
    Exception,
    /// Reserved for virtual-timer exits; not produced by the current run
    /// path.
    Timer,
}

/// Information about one vCPU exit, produced fresh on every run.
///
/// `esr` and `far` carry the fault syndrome and fault address the hardware
/// reported; both are zero when the diagnostics were unavailable.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExitInfo {
    pub reason: ExitReason,
    pub esr: u64,
    pub far: u64,
}

impl ExitInfo {
    /// An exit with no usable diagnostics.
    pub(crate) fn unknown() -> ExitInfo {
        ExitInfo::default()
    }

    /// Classifies an exit from the syndrome and fault-address registers. A
    /// non-zero syndrome means the guest took an exception; anything else
    /// stays unclassified.
    pub(crate) fn classify(esr: u64, far: u64) -> ExitInfo {
        let reason = if esr != 0 {
            ExitReason::Exception
        } else {
            ExitReason::Unknown
        };
        ExitInfo { reason, esr, far }
    }
}
