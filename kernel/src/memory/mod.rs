//! Memory-management interface.
//!
//! Page allocation and page-table construction belong to the memory
//! subsystem; the process core reaches them only through [`MemoryManager`].

pub mod page_table;
pub mod vaddr;

use core::fmt;
use core::ptr::NonNull;

use crate::config::{PTE_PER_TABLE, USER_PDE_COUNT};

pub use page_table::{PageTableEntry, PageTableFlags};
pub use vaddr::VaddrPool;

/// Memory subsystem errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemError {
    /// No free page or frame.
    OutOfMemory,
    /// The address has no mapping in the active page directory.
    Unmapped,
    /// The address is already backed by a frame.
    AlreadyMapped,
    /// The address lies outside the user range.
    OutOfRange,
}

impl fmt::Display for MemError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemError::OutOfMemory => write!(f, "out of memory"),
            MemError::Unmapped => write!(f, "address not mapped"),
            MemError::AlreadyMapped => write!(f, "address already mapped"),
            MemError::OutOfRange => write!(f, "address outside the user range"),
        }
    }
}

/// Kernel virtual address of a page-directory page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageDir(NonNull<u8>);

// SAFETY: a page directory is plain memory owned by one task.
unsafe impl Send for PageDir {}

impl PageDir {
    pub fn new(page: NonNull<u8>) -> Self {
        PageDir(page)
    }

    pub fn as_ptr(&self) -> NonNull<u8> {
        self.0
    }

    pub fn addr(&self) -> usize {
        self.0.as_ptr() as usize
    }
}

/// Services consumed from the memory subsystem.
///
/// "Active" means the directory last passed to [`MemoryManager::activate`].
pub trait MemoryManager {
    /// Allocate `count` physically contiguous, zeroed kernel pages.
    fn alloc_kernel_pages(&mut self, count: usize) -> Result<NonNull<u8>, MemError>;

    /// Return pages obtained from [`MemoryManager::alloc_kernel_pages`].
    ///
    /// # Safety
    ///
    /// `base` and `count` must match one earlier allocation, and the pages
    /// must not be used afterwards.
    unsafe fn free_kernel_pages(&mut self, base: NonNull<u8>, count: usize);

    /// Create a page directory holding only the kernel mappings.
    fn create_page_dir(&mut self) -> Result<PageDir, MemError>;

    /// Load `dir`, or the kernel's own directory for `None`.
    fn activate(&mut self, dir: Option<PageDir>);

    /// Back `vaddr` with a fresh frame in the active directory.
    /// No virtual-address bitmap is touched.
    fn map_user_page(&mut self, vaddr: usize) -> Result<(), MemError>;

    /// Entry `index` of `dir`.
    fn pde(&self, dir: PageDir, index: usize) -> PageTableEntry;

    /// Page-table entry mapping `vaddr` in the active directory.
    /// Empty when the covering table is absent.
    fn pte(&self, vaddr: usize) -> PageTableEntry;

    /// Return one physical frame to the frame pool.
    fn free_frame(&mut self, phys: usize);

    /// Copy user memory at `vaddr` in the active directory into `buf`.
    fn read_user(&self, vaddr: usize, buf: &mut [u8]) -> Result<(), MemError>;

    /// Copy `buf` into user memory at `vaddr` in the active directory.
    fn write_user(&mut self, vaddr: usize, buf: &[u8]) -> Result<(), MemError>;
}

/// Free every user frame and page table reachable from `dir`.
///
/// `dir` must be the active directory. The directory page itself is left
/// for the caller.
pub fn release_user_frames<M: MemoryManager + ?Sized>(mm: &mut M, dir: PageDir) {
    for pde in 0..USER_PDE_COUNT {
        let table = mm.pde(dir, pde);
        if !table.is_present() {
            continue;
        }
        for pte in 0..PTE_PER_TABLE {
            let entry = mm.pte(page_table::table_vaddr(pde, pte));
            if entry.is_present() {
                mm.free_frame(entry.addr());
            }
        }
        mm.free_frame(table.addr());
    }
}
