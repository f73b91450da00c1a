//! Page table entries for i386 two-level paging.

use crate::config::PAGE_SIZE;
use bitflags::bitflags;

bitflags! {
    /// Page directory / page table entry flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PageTableFlags: usize {
        /// Page is present in memory.
        const PRESENT = 1 << 0;
        /// Page is writable.
        const WRITABLE = 1 << 1;
        /// Page is accessible from user mode.
        const USER_ACCESSIBLE = 1 << 2;
        /// Write-through caching.
        const WRITE_THROUGH = 1 << 3;
        /// Disable caching.
        const NO_CACHE = 1 << 4;
        /// Page has been accessed.
        const ACCESSED = 1 << 5;
        /// Page has been written to.
        const DIRTY = 1 << 6;
    }
}

/// A single page directory or page table entry.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageTableEntry(usize);

impl PageTableEntry {
    /// Create an empty (not present) entry.
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Entry pointing at the frame `addr` with `flags`.
    pub fn new(addr: usize, flags: PageTableFlags) -> Self {
        debug_assert!(addr % PAGE_SIZE == 0, "Address must be page-aligned");
        Self(addr | flags.bits())
    }

    /// Get the flags of this entry.
    pub fn flags(&self) -> PageTableFlags {
        PageTableFlags::from_bits_truncate(self.0)
    }

    pub fn is_present(&self) -> bool {
        self.flags().contains(PageTableFlags::PRESENT)
    }

    /// Physical address of the frame this entry points to.
    pub fn addr(&self) -> usize {
        self.0 & !(PAGE_SIZE - 1)
    }
}

/// Page directory index (bits 22-31) of a virtual address.
pub const fn pde_index(vaddr: usize) -> usize {
    (vaddr >> 22) & 0x3ff
}

/// Page table index (bits 12-21) of a virtual address.
pub const fn pte_index(vaddr: usize) -> usize {
    (vaddr >> 12) & 0x3ff
}

/// Virtual address mapped by directory entry `pde` and table entry `pte`.
pub const fn table_vaddr(pde: usize, pte: usize) -> usize {
    (pde << 22) | (pte << 12)
}
