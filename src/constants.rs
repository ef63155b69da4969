/// Entries per second-level page table; the directory fan-out `D`.
///
/// A VPN decomposes as `pdi = vpn / PAGE_TABLE_SPAN`, `pti = vpn % PAGE_TABLE_SPAN`.
pub const PAGE_TABLE_SPAN: usize = 1024;

/// Default total memory size for the CLI, in the same unit as the page size.
pub const DEFAULT_MEMORY_SIZE: usize = 16;

/// Default page/frame size for the CLI.
pub const DEFAULT_PAGE_SIZE: usize = 4;
