//! Byte-backed bitmap.
//!
//! Used by the pid pool with inline storage and by every user process for
//! its virtual-address pool, whose storage lives in kernel pages.

use core::ptr::NonNull;
use core::slice;

/// A bitmap over any byte storage. Bit `i` is bit `i % 8` of byte `i / 8`.
#[derive(Debug, Clone, Copy)]
pub struct Bitmap<S> {
    bytes: S,
}

impl<S: AsRef<[u8]>> Bitmap<S> {
    /// Wrap existing storage. Its current contents are kept.
    pub const fn new(bytes: S) -> Self {
        Bitmap { bytes }
    }

    /// Number of bits.
    pub fn len(&self) -> usize {
        self.bytes.as_ref().len() * 8
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.as_ref().is_empty()
    }

    /// Whether bit `index` is set.
    pub fn test(&self, index: usize) -> bool {
        self.bytes.as_ref()[index / 8] & (1 << (index % 8)) != 0
    }

    /// Index of the first run of `count` clear bits.
    pub fn scan(&self, count: usize) -> Option<usize> {
        if count == 0 {
            return None;
        }
        // Whole bytes of set bits can be skipped.
        let first = self.bytes.as_ref().iter().position(|&byte| byte != 0xff)? * 8;
        let mut run = 0;
        for index in first..self.len() {
            if self.test(index) {
                run = 0;
            } else {
                run += 1;
                if run == count {
                    return Some(index + 1 - count);
                }
            }
        }
        None
    }

    /// Indices of all set bits, ascending.
    pub fn iter_set(&self) -> impl Iterator<Item = usize> + '_ {
        self.bytes
            .as_ref()
            .iter()
            .enumerate()
            .filter(|(_, &byte)| byte != 0)
            .flat_map(|(offset, &byte)| {
                (0..8)
                    .filter(move |bit| byte & (1 << bit) != 0)
                    .map(move |bit| offset * 8 + bit)
            })
    }

    /// Number of set bits.
    pub fn count_set(&self) -> usize {
        self.bytes
            .as_ref()
            .iter()
            .map(|byte| byte.count_ones() as usize)
            .sum()
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.bytes.as_ref()
    }

    /// The underlying storage.
    pub fn storage(&self) -> &S {
        &self.bytes
    }
}

impl<S: AsRef<[u8]> + AsMut<[u8]>> Bitmap<S> {
    /// Set or clear bit `index`.
    pub fn set(&mut self, index: usize, value: bool) {
        let byte = &mut self.bytes.as_mut()[index / 8];
        if value {
            *byte |= 1 << (index % 8);
        } else {
            *byte &= !(1 << (index % 8));
        }
    }

    /// Overwrite every byte with the matching byte of `source`.
    pub fn copy_from(&mut self, source: &[u8]) {
        self.bytes.as_mut().copy_from_slice(source);
    }
}

/// Bitmap storage living in memory owned elsewhere (kernel pages).
///
/// Copies alias the same bytes, like the raw pointer they wrap.
#[derive(Debug, Clone, Copy)]
pub struct RawBytes {
    ptr: NonNull<u8>,
    len: usize,
}

impl RawBytes {
    /// # Safety
    ///
    /// `ptr` must be valid for reads and writes of `len` bytes for as long as
    /// this value or any copy of it is used, and nothing else may access the
    /// bytes meanwhile.
    pub unsafe fn from_raw_parts(ptr: NonNull<u8>, len: usize) -> Self {
        RawBytes { ptr, len }
    }

    /// Start of the storage.
    pub fn as_ptr(&self) -> NonNull<u8> {
        self.ptr
    }
}

impl AsRef<[u8]> for RawBytes {
    fn as_ref(&self) -> &[u8] {
        // SAFETY: guaranteed by the `from_raw_parts` contract.
        unsafe { slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }
}

impl AsMut<[u8]> for RawBytes {
    fn as_mut(&mut self) -> &mut [u8] {
        // SAFETY: guaranteed by the `from_raw_parts` contract.
        unsafe { slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}
