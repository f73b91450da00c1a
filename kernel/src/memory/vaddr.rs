//! User virtual-address pool.
//!
//! One bit per user page between `USER_VADDR_START` and `USER_STACK_TOP`;
//! a set bit means the page is resident. The bitmap bytes live in kernel
//! pages, so a bitwise copy of a pool aliases the same bitmap.

use super::{MemError, MemoryManager};
use crate::bitmap::{Bitmap, RawBytes};
use crate::config::{PAGE_SIZE, USER_STACK_TOP, USER_VADDR_START, VADDR_BITMAP_BYTES, VADDR_BITMAP_PAGES};

#[derive(Debug, Clone, Copy)]
pub struct VaddrPool {
    start: usize,
    bitmap: Bitmap<RawBytes>,
}

impl VaddrPool {
    /// Allocate an empty pool.
    pub fn allocate<M: MemoryManager + ?Sized>(mm: &mut M) -> Result<Self, MemError> {
        let storage = mm.alloc_kernel_pages(VADDR_BITMAP_PAGES)?;
        // SAFETY: the pages are ours until `release`, and are zeroed.
        let bytes = unsafe { RawBytes::from_raw_parts(storage, VADDR_BITMAP_BYTES) };
        Ok(VaddrPool {
            start: USER_VADDR_START,
            bitmap: Bitmap::new(bytes),
        })
    }

    /// A pool with its own storage and the same bits as `self`.
    pub fn duplicate<M: MemoryManager + ?Sized>(&self, mm: &mut M) -> Result<Self, MemError> {
        let mut copy = Self::allocate(mm)?;
        copy.bitmap.copy_from(self.bitmap.as_bytes());
        Ok(copy)
    }

    /// Free the bitmap storage.
    ///
    /// # Safety
    ///
    /// No copy of this pool may be used afterwards.
    pub unsafe fn release<M: MemoryManager + ?Sized>(self, mm: &mut M) {
        // SAFETY: the storage came from `allocate` with this page count.
        unsafe { mm.free_kernel_pages(self.bitmap.storage().as_ptr(), VADDR_BITMAP_PAGES) };
    }

    /// Whether `vaddr` lies in the range this pool tracks.
    pub fn covers(&self, vaddr: usize) -> bool {
        (self.start..USER_STACK_TOP).contains(&vaddr)
    }

    fn index(&self, vaddr: usize) -> usize {
        assert!(
            self.covers(vaddr),
            "user address {:#x} outside the user range",
            vaddr
        );
        (vaddr - self.start) / PAGE_SIZE
    }

    /// Mark the page holding `vaddr` resident. Returns false if it already was.
    pub fn mark(&mut self, vaddr: usize) -> bool {
        let index = self.index(vaddr);
        if self.bitmap.test(index) {
            return false;
        }
        self.bitmap.set(index, true);
        true
    }

    pub fn contains(&self, vaddr: usize) -> bool {
        self.bitmap.test(self.index(vaddr))
    }

    /// Base addresses of all resident pages, ascending.
    pub fn pages(&self) -> impl Iterator<Item = usize> + '_ {
        self.bitmap
            .iter_set()
            .map(move |index| self.start + index * PAGE_SIZE)
    }

    /// Number of resident pages.
    pub fn resident(&self) -> usize {
        self.bitmap.count_set()
    }

    /// The raw bitmap bytes.
    pub fn bits(&self) -> &[u8] {
        self.bitmap.as_bytes()
    }
}
