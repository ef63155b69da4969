use thiserror::Error;

use crate::memory::Pid;

/// Errors surfaced by [`VirtualMemoryManager`](crate::manager::VirtualMemoryManager)
/// operations.
///
/// `ProcessNotFound` and `AlreadyRegistered` are caller mistakes: the manager
/// leaves its state untouched and the caller decides whether to log and move
/// on. `ReplacementExhausted` means the frame table and the replacement
/// bookkeeping disagree; continuing past it would corrupt the frame table, so
/// callers must treat it as fatal.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum VmError {
    /// Operation referenced a process that was never registered (or was freed).
    #[error("process {0} not found")]
    ProcessNotFound(Pid),

    /// `allocate_process` called twice for the same pid; the first
    /// registration is kept.
    #[error("process {0} is already registered")]
    AlreadyRegistered(Pid),

    /// The replacement engine produced no victim even though the free-frame
    /// scan found nothing. Internal-consistency violation.
    #[error("replacement engine found no victim despite a full frame table")]
    ReplacementExhausted,
}

impl VmError {
    /// Whether the error signals a broken internal invariant rather than bad
    /// caller input.
    pub fn is_fatal(&self) -> bool {
        matches!(self, VmError::ReplacementExhausted)
    }
}
