//! Per-process table of file-backed mappings.
//!
//! Each live slot describes one `mmap`ed range. Two page sets track its
//! pages:
//!
//! ```text
//!   covered   1 1 1 1 0 0 1 1    still part of the mapping
//!   resident  0 1 0 0 0 0 1 0    backed by a frame right now
//! ```
//!
//! `resident` is always a subset of `covered`. A slot is reclaimed once
//! nothing is covered.

use bitflags::bitflags;

use crate::config::{MAX_MAP_PAGES, NVMA};
use crate::fs::FileRef;
use crate::mm::address::pages_for;
use crate::mm::{PteFlags, PAGE_SIZE};

bitflags! {
    /// Protection requested for a mapping.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Prot: u64 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
    }
}

/// `mmap` flag: changes are written back to the file.
pub const MAP_SHARED: u64 = 0x01;
/// `mmap` flag: changes stay private to the process.
pub const MAP_PRIVATE: u64 = 0x02;

/// How changes to a mapping relate to its file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapMode {
    Shared,
    Private,
}

impl MapMode {
    /// Decode the `flags` argument of `mmap`; exactly one mode must be named.
    pub fn from_flags(flags: u64) -> Option<Self> {
        match flags {
            MAP_SHARED => Some(Self::Shared),
            MAP_PRIVATE => Some(Self::Private),
            _ => None,
        }
    }
}

const WORDS: usize = MAX_MAP_PAGES.div_ceil(64);

/// A set of page indices within one mapping.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PageSet([u64; WORDS]);

impl PageSet {
    pub const EMPTY: Self = Self([0; WORDS]);

    /// The set `{0, 1, .., n - 1}`.
    pub fn first(n: usize) -> Self {
        assert!(n <= MAX_MAP_PAGES, "page set: {} pages", n);
        let mut set = Self::EMPTY;
        for page in 0..n {
            set.insert(page);
        }
        set
    }

    #[inline]
    pub fn contains(&self, page: usize) -> bool {
        page < MAX_MAP_PAGES && self.0[page / 64] & (1 << (page % 64)) != 0
    }

    #[inline]
    pub fn insert(&mut self, page: usize) {
        self.0[page / 64] |= 1 << (page % 64);
    }

    #[inline]
    pub fn remove(&mut self, page: usize) {
        self.0[page / 64] &= !(1 << (page % 64));
    }

    pub fn is_empty(&self) -> bool {
        self.0.iter().all(|&word| word == 0)
    }

    pub fn count(&self) -> usize {
        self.0.iter().map(|word| word.count_ones() as usize).sum()
    }

    /// Members in increasing order.
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        (0..MAX_MAP_PAGES).filter(|&page| self.contains(page))
    }
}

/// One live mapping.
#[derive(Debug)]
pub struct Vma {
    pub base: usize,
    pub length: usize,
    /// Keeps the backing file open for as long as the mapping exists.
    pub file: FileRef,
    pub prot: Prot,
    pub mode: MapMode,
    /// File offset of the first mapped byte.
    pub offset: usize,
    pub resident: PageSet,
    pub covered: PageSet,
}

impl Vma {
    pub fn new(
        base: usize,
        length: usize,
        file: FileRef,
        prot: Prot,
        mode: MapMode,
        offset: usize,
    ) -> Self {
        Self {
            base,
            length,
            file,
            prot,
            mode,
            offset,
            resident: PageSet::EMPTY,
            covered: PageSet::first(pages_for(length)),
        }
    }

    pub fn end(&self) -> usize {
        self.base + self.length
    }

    pub fn npages(&self) -> usize {
        pages_for(self.length)
    }

    pub fn contains(&self, va: usize) -> bool {
        self.base <= va && va < self.end()
    }

    /// Index of the page holding `va`. `va` must lie inside the mapping.
    pub fn page_index(&self, va: usize) -> usize {
        (va - self.base) / PAGE_SIZE
    }

    /// User address of page `page`.
    pub fn page_va(&self, page: usize) -> usize {
        self.base + page * PAGE_SIZE
    }

    /// File offset backing page `page`, if it is representable.
    pub fn file_offset(&self, page: usize) -> Option<usize> {
        page.checked_mul(PAGE_SIZE).and_then(|delta| self.offset.checked_add(delta))
    }

    /// Page-table permissions for a resident page.
    pub fn pte_flags(&self) -> PteFlags {
        let mut flags = PteFlags::U | PteFlags::X;
        if self.prot.contains(Prot::READ) {
            flags |= PteFlags::R;
        }
        if self.prot.contains(Prot::WRITE) {
            flags |= PteFlags::W;
        }
        flags
    }
}

/// Fixed-capacity mapping table.
#[derive(Debug)]
pub struct VmaTable {
    slots: [Option<Vma>; NVMA],
}

impl VmaTable {
    pub fn new() -> Self {
        Self {
            slots: [const { None }; NVMA],
        }
    }

    /// Store `vma` in the first free slot. On a full table it is handed
    /// back.
    pub fn insert(&mut self, vma: Vma) -> Result<usize, Vma> {
        match self.slots.iter().position(Option::is_none) {
            Some(index) => {
                self.slots[index] = Some(vma);
                Ok(index)
            }
            None => Err(vma),
        }
    }

    pub fn has_free_slot(&self) -> bool {
        self.slots.iter().any(Option::is_none)
    }

    /// Slot of the live mapping whose range contains `va`.
    pub fn find(&self, va: usize) -> Option<usize> {
        self.slots
            .iter()
            .position(|slot| slot.as_ref().is_some_and(|vma| vma.contains(va)))
    }

    pub fn get(&self, index: usize) -> Option<&Vma> {
        self.slots.get(index)?.as_ref()
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut Vma> {
        self.slots.get_mut(index)?.as_mut()
    }

    /// Empty slot `index`, returning what it held.
    pub fn remove(&mut self, index: usize) -> Option<Vma> {
        self.slots.get_mut(index)?.take()
    }

    /// Live mappings.
    pub fn iter(&self) -> impl Iterator<Item = &Vma> {
        self.slots.iter().flatten()
    }

    pub fn count(&self) -> usize {
        self.iter().count()
    }
}

impl Default for VmaTable {
    fn default() -> Self {
        Self::new()
    }
}
