//! Online page-replacement engine.
//!
//! The policy is a tagged variant with one selection function per case, so
//! each algorithm's invariants stay locally checkable. Selection is pure over
//! a snapshot of the occupied frames ([`Candidate`]); the only mutation is to
//! the policy's own auxiliary state (FIFO queue, Clock hand). The Clock sweep
//! reports which referenced bits it cleared and the manager writes those back
//! to the page tables.

use std::collections::VecDeque;
use std::str::FromStr;

use thiserror::Error;

use crate::error::VmError;
use crate::memory::{FrameOwner, Pid};

/// Which victim-selection algorithm the manager runs under memory pressure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReplacementPolicy {
    #[default]
    Fifo,
    Lru,
    Clock,
}

impl std::fmt::Display for ReplacementPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ReplacementPolicy::Fifo => "fifo",
            ReplacementPolicy::Lru => "lru",
            ReplacementPolicy::Clock => "clock",
        };
        f.write_str(name)
    }
}

/// Unrecognized policy name on the command line.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unknown policy '{0}', expected fifo, lru, or clock")]
pub struct ParsePolicyError(String);

impl FromStr for ReplacementPolicy {
    type Err = ParsePolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "fifo" => Ok(ReplacementPolicy::Fifo),
            "lru" => Ok(ReplacementPolicy::Lru),
            "clock" => Ok(ReplacementPolicy::Clock),
            other => Err(ParsePolicyError(other.to_string())),
        }
    }
}

/// Policy-specific auxiliary state.
///
/// LRU needs nothing beyond the access stamps already stored in the page
/// tables, so it carries no state here.
#[derive(Debug)]
pub enum ReplacementState {
    Fifo { queue: VecDeque<FrameOwner> },
    Lru,
    Clock { hand: usize },
}

impl ReplacementState {
    pub fn new(policy: ReplacementPolicy) -> Self {
        match policy {
            ReplacementPolicy::Fifo => ReplacementState::Fifo {
                queue: VecDeque::new(),
            },
            ReplacementPolicy::Lru => ReplacementState::Lru,
            ReplacementPolicy::Clock => ReplacementState::Clock { hand: 0 },
        }
    }

    /// Record a fresh installation. Only FIFO tracks insertion order.
    pub fn note_install(&mut self, owner: FrameOwner) {
        if let ReplacementState::Fifo { queue } = self {
            queue.push_back(owner);
        }
    }

    /// Purge every queue entry belonging to a freed process so a later pop
    /// can never name one of its pages.
    pub fn forget_process(&mut self, pid: Pid) {
        if let ReplacementState::Fifo { queue } = self {
            queue.retain(|owner| owner.pid != pid);
        }
    }
}

/// Snapshot of one occupied frame, taken by the manager right before victim
/// selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Candidate {
    pub frame: usize,
    pub owner: FrameOwner,
    pub last_access: u64,
    pub referenced: bool,
}

/// A selected victim plus the side effects of finding it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Victim {
    pub frame: usize,
    /// Frames whose referenced bit the Clock sweep cleared on its way to the
    /// victim. Empty for FIFO and LRU.
    pub cleared: Vec<usize>,
}

/// Choose a victim frame. Called only when the free-frame scan came up empty,
/// so `candidates` must describe every frame, in frame order.
pub fn select_victim(
    state: &mut ReplacementState,
    candidates: &[Candidate],
) -> Result<Victim, VmError> {
    match state {
        ReplacementState::Fifo { queue } => fifo_select(queue, candidates),
        ReplacementState::Lru => lru_select(candidates),
        ReplacementState::Clock { hand } => clock_select(hand, candidates),
    }
}

/// Oldest surviving insertion wins. A popped entry may be stale (its page was
/// evicted through `free_process` or never reinserted after bookkeeping
/// drift); such entries are dropped and the next one is tried rather than
/// trusted blindly.
fn fifo_select(
    queue: &mut VecDeque<FrameOwner>,
    candidates: &[Candidate],
) -> Result<Victim, VmError> {
    while let Some(owner) = queue.pop_front() {
        if let Some(candidate) = candidates.iter().find(|c| c.owner == owner) {
            return Ok(Victim {
                frame: candidate.frame,
                cleared: Vec::new(),
            });
        }
        log::debug!(
            "fifo: skipping stale queue entry P{} VP{}",
            owner.pid,
            owner.vpn
        );
    }
    Err(VmError::ReplacementExhausted)
}

/// Smallest access stamp wins; ties go to the lowest frame index so the scan
/// is deterministic.
fn lru_select(candidates: &[Candidate]) -> Result<Victim, VmError> {
    candidates
        .iter()
        .min_by_key(|c| (c.last_access, c.frame))
        .map(|c| Victim {
            frame: c.frame,
            cleared: Vec::new(),
        })
        .ok_or(VmError::ReplacementExhausted)
}

/// Second chance: advance the hand, clearing referenced bits, until an
/// unreferenced page turns up. Every set bit is cleared on the first pass, so
/// the sweep terminates within two passes; the loop bound is a backstop that
/// turns bookkeeping drift into a loud error instead of a hang.
fn clock_select(hand: &mut usize, candidates: &[Candidate]) -> Result<Victim, VmError> {
    let n = candidates.len();
    if n == 0 {
        return Err(VmError::ReplacementExhausted);
    }

    let mut referenced: Vec<bool> = candidates.iter().map(|c| c.referenced).collect();
    let mut cleared = Vec::new();

    for _ in 0..=2 * n {
        let idx = *hand % n;
        let candidate = &candidates[idx];
        if candidate.frame != idx {
            // The snapshot is not the full frame-ordered table it must be
            return Err(VmError::ReplacementExhausted);
        }
        *hand = (idx + 1) % n;
        if referenced[idx] {
            referenced[idx] = false;
            cleared.push(candidate.frame);
        } else {
            return Ok(Victim {
                frame: candidate.frame,
                cleared,
            });
        }
    }
    Err(VmError::ReplacementExhausted)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owner(pid: Pid, vpn: usize) -> FrameOwner {
        FrameOwner { pid, vpn }
    }

    fn candidate(frame: usize, pid: Pid, vpn: usize, last_access: u64, referenced: bool) -> Candidate {
        Candidate {
            frame,
            owner: owner(pid, vpn),
            last_access,
            referenced,
        }
    }

    #[test]
    fn test_policy_from_str() {
        assert_eq!("fifo".parse::<ReplacementPolicy>(), Ok(ReplacementPolicy::Fifo));
        assert_eq!("LRU".parse::<ReplacementPolicy>(), Ok(ReplacementPolicy::Lru));
        assert_eq!("Clock".parse::<ReplacementPolicy>(), Ok(ReplacementPolicy::Clock));
        assert!("optimal".parse::<ReplacementPolicy>().is_err());
    }

    #[test]
    fn test_fifo_picks_earliest_insertion() {
        let mut state = ReplacementState::new(ReplacementPolicy::Fifo);
        state.note_install(owner(1, 0));
        state.note_install(owner(1, 1));
        state.note_install(owner(1, 2));

        let candidates = vec![
            candidate(0, 1, 0, 10, true),
            candidate(1, 1, 1, 11, true),
            candidate(2, 1, 2, 12, true),
        ];
        let victim = select_victim(&mut state, &candidates).unwrap();
        assert_eq!(victim.frame, 0);
        assert!(victim.cleared.is_empty());
    }

    #[test]
    fn test_fifo_skips_stale_entries() {
        let mut state = ReplacementState::new(ReplacementPolicy::Fifo);
        state.note_install(owner(1, 0)); // will be stale: not among candidates
        state.note_install(owner(1, 1));

        let candidates = vec![candidate(0, 1, 1, 5, false), candidate(1, 1, 2, 6, false)];
        let victim = select_victim(&mut state, &candidates).unwrap();
        assert_eq!(victim.frame, 0, "stale head must be skipped, not selected");
    }

    #[test]
    fn test_fifo_forget_process_purges_queue() {
        let mut state = ReplacementState::new(ReplacementPolicy::Fifo);
        state.note_install(owner(1, 0));
        state.note_install(owner(2, 0));
        state.note_install(owner(1, 1));
        state.forget_process(1);

        let candidates = vec![candidate(0, 2, 0, 1, false)];
        let victim = select_victim(&mut state, &candidates).unwrap();
        assert_eq!(victim.frame, 0);
    }

    #[test]
    fn test_fifo_exhausted_on_empty_queue() {
        let mut state = ReplacementState::new(ReplacementPolicy::Fifo);
        let candidates = vec![candidate(0, 1, 0, 1, false)];
        assert_eq!(
            select_victim(&mut state, &candidates),
            Err(VmError::ReplacementExhausted)
        );
    }

    #[test]
    fn test_lru_picks_smallest_stamp() {
        let mut state = ReplacementState::new(ReplacementPolicy::Lru);
        let candidates = vec![
            candidate(0, 1, 0, 30, true),
            candidate(1, 1, 1, 10, true),
            candidate(2, 1, 2, 20, true),
        ];
        let victim = select_victim(&mut state, &candidates).unwrap();
        assert_eq!(victim.frame, 1);
    }

    #[test]
    fn test_lru_tie_breaks_by_lowest_frame() {
        let mut state = ReplacementState::new(ReplacementPolicy::Lru);
        let candidates = vec![
            candidate(0, 1, 0, 7, false),
            candidate(1, 1, 1, 7, false),
            candidate(2, 1, 2, 9, false),
        ];
        assert_eq!(select_victim(&mut state, &candidates).unwrap().frame, 0);
    }

    #[test]
    fn test_lru_exhausted_on_empty_snapshot() {
        let mut state = ReplacementState::new(ReplacementPolicy::Lru);
        assert_eq!(
            select_victim(&mut state, &[]),
            Err(VmError::ReplacementExhausted)
        );
    }

    #[test]
    fn test_clock_takes_first_unreferenced() {
        let mut state = ReplacementState::new(ReplacementPolicy::Clock);
        let candidates = vec![
            candidate(0, 1, 0, 1, true),
            candidate(1, 1, 1, 2, false),
            candidate(2, 1, 2, 3, true),
        ];
        let victim = select_victim(&mut state, &candidates).unwrap();
        assert_eq!(victim.frame, 1);
        assert_eq!(victim.cleared, vec![0], "frame 0 got its second chance");

        // Hand parked past the victim
        match state {
            ReplacementState::Clock { hand } => assert_eq!(hand, 2),
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_clock_all_referenced_terminates_at_hand() {
        let mut state = ReplacementState::new(ReplacementPolicy::Clock);
        let candidates = vec![
            candidate(0, 1, 0, 1, true),
            candidate(1, 1, 1, 2, true),
            candidate(2, 1, 2, 3, true),
        ];
        // First pass clears everything, second pass evicts frame 0
        let victim = select_victim(&mut state, &candidates).unwrap();
        assert_eq!(victim.frame, 0);
        assert_eq!(victim.cleared, vec![0, 1, 2]);
    }

    #[test]
    fn test_clock_resumes_from_hand() {
        let mut state = ReplacementState::new(ReplacementPolicy::Clock);
        let candidates = vec![
            candidate(0, 1, 0, 1, false),
            candidate(1, 1, 1, 2, false),
            candidate(2, 1, 2, 3, false),
        ];
        assert_eq!(select_victim(&mut state, &candidates).unwrap().frame, 0);
        assert_eq!(select_victim(&mut state, &candidates).unwrap().frame, 1);
        assert_eq!(select_victim(&mut state, &candidates).unwrap().frame, 2);
        // Wraps around
        assert_eq!(select_victim(&mut state, &candidates).unwrap().frame, 0);
    }

    #[test]
    fn test_clock_rejects_sparse_snapshot() {
        let mut state = ReplacementState::new(ReplacementPolicy::Clock);
        // Frame 1 missing: not the full frame-ordered table
        let candidates = vec![candidate(0, 1, 0, 1, false), candidate(2, 1, 2, 3, false)];
        assert_eq!(
            select_victim(&mut state, &candidates),
            Err(VmError::ReplacementExhausted)
        );
    }
}
