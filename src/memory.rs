//! Core paging data structures: page table entries, the two-level per-process
//! directory, and the global frame table.
//!
//! The directory owns its tables by value; frame slots back-reference their
//! occupant by `(pid, vpn)` identity rather than holding a live reference, so
//! there are no ownership cycles between a process's tables and the shared
//! frame table.

use std::collections::HashMap;

use bitflags::bitflags;

/// Process identity, handed in by the scheduler collaborator.
pub type Pid = u32;

/// Virtual page number.
pub type Vpn = usize;

bitflags! {
    /// Per-page access permission bits. Empty means deny everything.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct PagePermissions: u8 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
        const EXECUTE = 1 << 2;
    }
}

impl PagePermissions {
    /// Whether this permission set grants the requested access.
    #[inline]
    pub fn allows(&self, access: AccessType) -> bool {
        self.contains(access.required())
    }
}

impl std::fmt::Display for PagePermissions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}{}{}",
            if self.contains(PagePermissions::READ) { 'r' } else { '-' },
            if self.contains(PagePermissions::WRITE) { 'w' } else { '-' },
            if self.contains(PagePermissions::EXECUTE) { 'x' } else { '-' },
        )
    }
}

/// The kind of access a caller is attempting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessType {
    Read,
    Write,
    Execute,
}

impl AccessType {
    /// The permission bit this access needs.
    #[inline]
    pub fn required(self) -> PagePermissions {
        match self {
            AccessType::Read => PagePermissions::READ,
            AccessType::Write => PagePermissions::WRITE,
            AccessType::Execute => PagePermissions::EXECUTE,
        }
    }
}

impl std::fmt::Display for AccessType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            AccessType::Read => "READ",
            AccessType::Write => "WRITE",
            AccessType::Execute => "EXECUTE",
        };
        f.write_str(name)
    }
}

/// Per-virtual-page state.
///
/// Residency is `frame.is_some()`: a resident page always has a frame and a
/// non-resident page never does, so the inconsistent pair the two separate
/// fields would permit cannot be represented.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageTableEntry {
    /// Physical frame currently holding the page, if resident.
    pub frame: Option<usize>,
    /// Second-chance bit, set on install and every granted access.
    pub referenced: bool,
    /// Monotonic access stamp; 0 means never accessed.
    pub last_access: u64,
    /// Explicit permission bits; survive eviction.
    pub permissions: PagePermissions,
}

impl PageTableEntry {
    #[inline]
    pub fn is_resident(&self) -> bool {
        self.frame.is_some()
    }

    /// Drop the frame binding on eviction. Permissions are untouched.
    pub fn evict(&mut self) {
        self.frame = None;
        self.referenced = false;
    }
}

/// Second-level table: sparse map from `pti` to entries, created lazily.
#[derive(Debug, Default)]
pub struct PageTable {
    entries: HashMap<usize, PageTableEntry>,
}

impl PageTable {
    pub fn get(&self, pti: usize) -> Option<&PageTableEntry> {
        self.entries.get(&pti)
    }

    pub fn get_mut(&mut self, pti: usize) -> Option<&mut PageTableEntry> {
        self.entries.get_mut(&pti)
    }

    /// Entry for `pti`, created default (non-resident, deny-all) if absent.
    pub fn entry_or_create(&mut self, pti: usize) -> &mut PageTableEntry {
        self.entries.entry(pti).or_default()
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &PageTableEntry)> {
        self.entries.iter().map(|(&pti, e)| (pti, e))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (usize, &mut PageTableEntry)> {
        self.entries.iter_mut().map(|(&pti, e)| (pti, e))
    }

    pub fn resident_count(&self) -> usize {
        self.entries.values().filter(|e| e.is_resident()).count()
    }
}

/// First-level index, exclusively owned by one process.
///
/// Map presence is the directory entry's present bit; a slot is never
/// re-absented individually, only dropped wholesale when the owning process
/// is freed.
#[derive(Debug, Default)]
pub struct PageDirectory {
    tables: HashMap<usize, PageTable>,
}

impl PageDirectory {
    pub fn table(&self, pdi: usize) -> Option<&PageTable> {
        self.tables.get(&pdi)
    }

    pub fn table_mut(&mut self, pdi: usize) -> Option<&mut PageTable> {
        self.tables.get_mut(&pdi)
    }

    /// Table for `pdi`, created empty on a directory miss.
    pub fn table_or_create(&mut self, pdi: usize) -> &mut PageTable {
        self.tables.entry(pdi).or_default()
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &PageTable)> {
        self.tables.iter().map(|(&pdi, t)| (pdi, t))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (usize, &mut PageTable)> {
        self.tables.iter_mut().map(|(&pdi, t)| (pdi, t))
    }

    /// Resident pages across every owned table.
    pub fn resident_count(&self) -> usize {
        self.tables.values().map(|t| t.resident_count()).sum()
    }
}

/// Identity of the page occupying a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameOwner {
    pub pid: Pid,
    pub vpn: Vpn,
}

/// Global array of physical frame slots, shared across all processes.
#[derive(Debug)]
pub struct FrameTable {
    slots: Vec<Option<FrameOwner>>,
}

impl FrameTable {
    pub fn new(total_frames: usize) -> Self {
        FrameTable {
            slots: vec![None; total_frames],
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Lowest-index empty slot, if any.
    pub fn first_free(&self) -> Option<usize> {
        self.slots.iter().position(|slot| slot.is_none())
    }

    pub fn owner(&self, frame: usize) -> Option<FrameOwner> {
        self.slots[frame]
    }

    /// Bind a frame to its new occupant.
    pub fn claim(&mut self, frame: usize, owner: FrameOwner) {
        self.slots[frame] = Some(owner);
    }

    /// Empty a slot, returning the previous occupant.
    pub fn release(&mut self, frame: usize) -> Option<FrameOwner> {
        self.slots[frame].take()
    }

    pub fn occupied_count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, Option<FrameOwner>)> + '_ {
        self.slots.iter().enumerate().map(|(i, &slot)| (i, slot))
    }
}
