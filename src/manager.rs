//! The virtual memory manager facade: process registration, page access with
//! permission checks, demand paging with eviction, and diagnostic dumps.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::str::FromStr;

use thiserror::Error;

use crate::error::VmError;
use crate::memory::{
    AccessType, FrameOwner, FrameTable, PageDirectory, PagePermissions, PageTableEntry, Pid, Vpn,
};
use crate::policy::{self, Candidate, ReplacementPolicy, ReplacementState};
use crate::translation::VirtualPage;

/// How chatty the manager's diagnostics are. Gates log emission only; never
/// changes behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum LogLevel {
    #[default]
    Normal,
    Verbose,
    Debug,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            LogLevel::Normal => "normal",
            LogLevel::Verbose => "verbose",
            LogLevel::Debug => "debug",
        };
        f.write_str(name)
    }
}

/// Unrecognized log level name on the command line.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unknown log level '{0}', expected normal, verbose, or debug")]
pub struct ParseLogLevelError(String);

impl FromStr for LogLevel {
    type Err = ParseLogLevelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "normal" => Ok(LogLevel::Normal),
            "verbose" => Ok(LogLevel::Verbose),
            "debug" => Ok(LogLevel::Debug),
            other => Err(ParseLogLevelError(other.to_string())),
        }
    }
}

/// Route a diagnostic through the `log` facade if the configured level admits
/// it. Free function so call sites can hold field borrows of the manager.
fn emit(configured: LogLevel, level: LogLevel, args: std::fmt::Arguments<'_>) {
    if level > configured {
        return;
    }
    match level {
        LogLevel::Normal => log::info!("{args}"),
        LogLevel::Verbose => log::debug!("{args}"),
        LogLevel::Debug => log::trace!("{args}"),
    }
}

/// What a single `access_page` call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessOutcome {
    /// Resident page, permission granted; recency refreshed.
    Hit { frame: usize },
    /// Page fault serviced and the access then granted. `evicted` names the
    /// page pushed out, if installing required one.
    Fault {
        frame: usize,
        evicted: Option<FrameOwner>,
    },
    /// Permission check failed: protection fault, access denied. If the page
    /// was non-resident it was still faulted in first.
    Denied,
}

impl std::fmt::Display for AccessOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AccessOutcome::Hit { frame } => write!(f, "hit (frame {frame})"),
            AccessOutcome::Fault { frame, evicted: None } => {
                write!(f, "page fault (frame {frame})")
            }
            AccessOutcome::Fault {
                frame,
                evicted: Some(victim),
            } => write!(
                f,
                "page fault (frame {frame}, evicted P{} VP{})",
                victim.pid, victim.vpn
            ),
            AccessOutcome::Denied => f.write_str("denied"),
        }
    }
}

/// Address-translation and page-replacement core.
///
/// Single-threaded by construction: every operation takes `&mut self` and
/// runs to completion, so the translate/fault/evict sequence is atomic with
/// respect to all callers.
pub struct VirtualMemoryManager {
    page_size: usize,
    frames: FrameTable,
    directories: HashMap<Pid, PageDirectory>,
    policy: ReplacementPolicy,
    state: ReplacementState,
    access_clock: u64,
    page_faults: u64,
    protection_faults: u64,
    log_level: LogLevel,
}

impl VirtualMemoryManager {
    /// Build a manager over `memory_size / page_size` frames.
    ///
    /// # Panics
    ///
    /// Panics if `page_size` is zero.
    pub fn new(memory_size: usize, page_size: usize, policy: ReplacementPolicy) -> Self {
        assert!(page_size > 0, "page size must be non-zero");
        let total_frames = memory_size / page_size;
        VirtualMemoryManager {
            page_size,
            frames: FrameTable::new(total_frames),
            directories: HashMap::new(),
            policy,
            state: ReplacementState::new(policy),
            access_clock: 0,
            page_faults: 0,
            protection_faults: 0,
            log_level: LogLevel::Normal,
        }
    }

    pub fn set_log_level(&mut self, level: LogLevel) {
        self.log_level = level;
    }

    pub fn log_level(&self) -> LogLevel {
        self.log_level
    }

    pub fn policy(&self) -> ReplacementPolicy {
        self.policy
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn total_frames(&self) -> usize {
        self.frames.len()
    }

    /// Page faults serviced so far. Protection faults are counted separately.
    pub fn page_fault_count(&self) -> u64 {
        self.page_faults
    }

    pub fn protection_fault_count(&self) -> u64 {
        self.protection_faults
    }

    /// Resident pages across every registered process. Always equals the
    /// number of occupied frame slots.
    pub fn resident_pages(&self) -> usize {
        self.directories.values().map(|d| d.resident_count()).sum()
    }

    pub fn occupied_frames(&self) -> usize {
        self.frames.occupied_count()
    }

    /// Register a process with an empty page directory. The first
    /// registration wins; a repeat is reported and changes nothing.
    pub fn allocate_process(&mut self, pid: Pid) -> Result<(), VmError> {
        if self.directories.contains_key(&pid) {
            return Err(VmError::AlreadyRegistered(pid));
        }
        self.directories.insert(pid, PageDirectory::default());
        emit(
            self.log_level,
            LogLevel::Normal,
            format_args!("registered process {pid}"),
        );
        Ok(())
    }

    /// Core entry point: translate, check permissions, fault in on a miss.
    pub fn access_page(
        &mut self,
        pid: Pid,
        vpn: Vpn,
        access: AccessType,
    ) -> Result<AccessOutcome, VmError> {
        let lvl = self.log_level;
        let page = VirtualPage::from_vpn(vpn);
        emit(lvl, LogLevel::Debug, format_args!("P{pid} {access} {page}"));

        let dir = self
            .directories
            .get_mut(&pid)
            .ok_or(VmError::ProcessNotFound(pid))?;

        // Resident hit: permission check comes first, and a denial mutates
        // nothing (no recency update, no referenced bit).
        if let Some(pte) = dir.table_mut(page.pdi).and_then(|t| t.get_mut(page.pti)) {
            if let Some(frame) = pte.frame {
                if !pte.permissions.allows(access) {
                    self.protection_faults += 1;
                    emit(
                        lvl,
                        LogLevel::Normal,
                        format_args!("protection fault: P{pid} denied {access} on VP{vpn}"),
                    );
                    return Ok(AccessOutcome::Denied);
                }
                self.access_clock += 1;
                pte.last_access = self.access_clock;
                pte.referenced = true;
                emit(
                    lvl,
                    LogLevel::Verbose,
                    format_args!(
                        "hit: P{pid} VP{vpn} -> frame {frame} (PA {})",
                        frame * self.page_size
                    ),
                );
                return Ok(AccessOutcome::Hit { frame });
            }
        }

        let (frame, evicted) = self.handle_fault(pid, page)?;

        // A freshly faulted-in page has whatever permissions were set before
        // (default deny); the access itself must still pass the check.
        let perms = self
            .pte(FrameOwner { pid, vpn })
            .map(|pte| pte.permissions)
            .unwrap_or_default();
        if !perms.allows(access) {
            self.protection_faults += 1;
            emit(
                lvl,
                LogLevel::Normal,
                format_args!("protection fault: P{pid} denied {access} on VP{vpn}"),
            );
            return Ok(AccessOutcome::Denied);
        }
        Ok(AccessOutcome::Fault { frame, evicted })
    }

    /// Set the permission triple, lazily creating the directory entry, table,
    /// and PTE just like the fault path does, without making the page
    /// resident.
    pub fn set_page_permissions(
        &mut self,
        pid: Pid,
        vpn: Vpn,
        perms: PagePermissions,
    ) -> Result<(), VmError> {
        let lvl = self.log_level;
        let page = VirtualPage::from_vpn(vpn);
        let dir = self
            .directories
            .get_mut(&pid)
            .ok_or(VmError::ProcessNotFound(pid))?;
        dir.table_or_create(page.pdi).entry_or_create(page.pti).permissions = perms;
        emit(
            lvl,
            LogLevel::Verbose,
            format_args!("P{pid} VP{vpn} permissions set to {perms}"),
        );
        Ok(())
    }

    /// Tear down a process: return all of its resident frames to the pool,
    /// purge it from the replacement bookkeeping, and drop its directory with
    /// every owned table. Returns how many frames were released.
    pub fn free_process(&mut self, pid: Pid) -> Result<usize, VmError> {
        let mut dir = self
            .directories
            .remove(&pid)
            .ok_or(VmError::ProcessNotFound(pid))?;

        let mut released = 0;
        for (_pdi, table) in dir.iter_mut() {
            for (_pti, pte) in table.iter_mut() {
                if let Some(frame) = pte.frame.take() {
                    self.frames.release(frame);
                    released += 1;
                }
            }
        }
        self.state.forget_process(pid);
        emit(
            self.log_level,
            LogLevel::Normal,
            format_args!("freed process {pid} ({released} frames returned)"),
        );
        Ok(released)
    }

    /// Human-readable page table for one process, rows sorted by VPN.
    pub fn dump_page_table(&self, pid: Pid) -> Result<String, VmError> {
        let dir = self
            .directories
            .get(&pid)
            .ok_or(VmError::ProcessNotFound(pid))?;

        let mut rows: Vec<(Vpn, &PageTableEntry)> = Vec::new();
        for (pdi, table) in dir.iter() {
            for (pti, pte) in table.iter() {
                rows.push((pdi * crate::constants::PAGE_TABLE_SPAN + pti, pte));
            }
        }
        rows.sort_by_key(|&(vpn, _)| vpn);

        let mut out = String::new();
        let _ = writeln!(out, "=== Page Table: process {pid} ===");
        let _ = writeln!(out, "Page\tFrame\tPerms\tRef");
        for (vpn, pte) in rows {
            let frame = match pte.frame {
                Some(f) => f.to_string(),
                None => "-".to_string(),
            };
            let referenced = if pte.referenced { "yes" } else { "no" };
            let _ = writeln!(out, "{vpn}\t{frame}\t{}\t{referenced}", pte.permissions);
        }
        Ok(out)
    }

    /// Human-readable frame table.
    pub fn dump_frame_table(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "=== Frame Table ===");
        let _ = writeln!(out, "Frame\tProcess\tPage");
        for (frame, slot) in self.frames.iter() {
            match slot {
                Some(owner) => {
                    let _ = writeln!(out, "{frame}\t{}\t{}", owner.pid, owner.vpn);
                }
                None => {
                    let _ = writeln!(out, "{frame}\tFree\t-");
                }
            }
        }
        out
    }

    /// Service a fault for a page known to be non-resident. Returns the frame
    /// the page landed in and the evicted occupant, if eviction was needed.
    fn handle_fault(
        &mut self,
        pid: Pid,
        page: VirtualPage,
    ) -> Result<(usize, Option<FrameOwner>), VmError> {
        let lvl = self.log_level;
        self.page_faults += 1;
        emit(
            lvl,
            LogLevel::Normal,
            format_args!("page fault at P{pid} VP{}", page.vpn),
        );

        // Lazy creation: directory entry, then the PTE inside it
        {
            let dir = self
                .directories
                .get_mut(&pid)
                .ok_or(VmError::ProcessNotFound(pid))?;
            if dir.table(page.pdi).is_none() {
                emit(
                    lvl,
                    LogLevel::Verbose,
                    format_args!("directory miss: P{pid} pdi {} gets a new table", page.pdi),
                );
            }
            dir.table_or_create(page.pdi).entry_or_create(page.pti);
        }

        let owner = FrameOwner { pid, vpn: page.vpn };

        if let Some(frame) = self.frames.first_free() {
            self.install(owner, page, frame);
            return Ok((frame, None));
        }

        let candidates = self.collect_candidates()?;
        let victim = policy::select_victim(&mut self.state, &candidates)?;

        // Clock's sweep cleared second-chance bits along the way
        for &cleared in &victim.cleared {
            if let Some(swept) = self.frames.owner(cleared) {
                if let Some(pte) = self.pte_mut(swept) {
                    pte.referenced = false;
                }
            }
        }

        let evicted = self.evict(victim.frame)?;
        self.install(owner, page, victim.frame);
        Ok((victim.frame, Some(evicted)))
    }

    /// Snapshot every occupied frame for victim selection. Any hole here
    /// means the free-frame scan and the slot state disagree, which is the
    /// fatal inconsistency `ReplacementExhausted` exists for.
    fn collect_candidates(&self) -> Result<Vec<Candidate>, VmError> {
        let mut candidates = Vec::with_capacity(self.frames.len());
        for (frame, slot) in self.frames.iter() {
            let owner = slot.ok_or(VmError::ReplacementExhausted)?;
            let pte = self.pte(owner).ok_or(VmError::ReplacementExhausted)?;
            candidates.push(Candidate {
                frame,
                owner,
                last_access: pte.last_access,
                referenced: pte.referenced,
            });
        }
        Ok(candidates)
    }

    /// Clear the victim's table entry and its frame slot together, so the two
    /// structures never disagree. Permissions survive.
    fn evict(&mut self, frame: usize) -> Result<FrameOwner, VmError> {
        let owner = self
            .frames
            .owner(frame)
            .ok_or(VmError::ReplacementExhausted)?;
        let lvl = self.log_level;
        let pte = self.pte_mut(owner).ok_or(VmError::ReplacementExhausted)?;
        pte.evict();
        self.frames.release(frame);
        emit(
            lvl,
            LogLevel::Verbose,
            format_args!("evicted P{} VP{} from frame {frame}", owner.pid, owner.vpn),
        );
        Ok(owner)
    }

    /// Bind a page to a frame: table entry and frame slot updated together,
    /// FIFO insertion recorded when that policy is active.
    fn install(&mut self, owner: FrameOwner, page: VirtualPage, frame: usize) {
        self.access_clock += 1;
        let stamp = self.access_clock;
        let lvl = self.log_level;

        // The PTE exists: handle_fault created it before looking for a frame
        if let Some(dir) = self.directories.get_mut(&owner.pid) {
            let pte = dir.table_or_create(page.pdi).entry_or_create(page.pti);
            pte.frame = Some(frame);
            pte.referenced = true;
            pte.last_access = stamp;
        }
        self.frames.claim(frame, owner);
        self.state.note_install(owner);
        emit(
            lvl,
            LogLevel::Verbose,
            format_args!(
                "installed P{} VP{} into frame {frame}",
                owner.pid, owner.vpn
            ),
        );
    }

    fn pte(&self, owner: FrameOwner) -> Option<&PageTableEntry> {
        let page = VirtualPage::from_vpn(owner.vpn);
        self.directories
            .get(&owner.pid)?
            .table(page.pdi)?
            .get(page.pti)
    }

    fn pte_mut(&mut self, owner: FrameOwner) -> Option<&mut PageTableEntry> {
        let page = VirtualPage::from_vpn(owner.vpn);
        self.directories
            .get_mut(&owner.pid)?
            .table_mut(page.pdi)?
            .get_mut(page.pti)
    }
}
