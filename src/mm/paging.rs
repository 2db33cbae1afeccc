//! User Page Tables
//!
//! Per-process mapping from user virtual pages to physical frames, plus the
//! user-memory copy routines the syscall layer reads arguments through.
//!
//! The hardware encoding of entries is not modelled: a table is a sorted map
//! from virtual page number to `(frame, flags)`.
//!
//! # Security Properties
//! - Only entries carrying `U` are reachable from `copy_in`/`copy_out`
//! - `copy_out` additionally requires `W`, `copy_in` requires `R`
//! - Installing over a live entry fails instead of silently remapping

use alloc::collections::BTreeMap;
use alloc::vec::Vec;

use super::address::{pg_round_down, PhysAddr, VirtAddr, MAXVA, PAGE_SIZE};
use super::frame::FrameAllocator;

bitflags::bitflags! {
    /// Page table entry permission bits (RISC-V Sv39 layout).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PteFlags: u16 {
        /// Entry is valid.
        const V = 1 << 0;
        /// Readable.
        const R = 1 << 1;
        /// Writable.
        const W = 1 << 2;
        /// Executable.
        const X = 1 << 3;
        /// Accessible from user mode.
        const U = 1 << 4;
    }
}

impl PteFlags {
    /// Ordinary user data: readable, writable, user-accessible.
    pub const USER_DATA: Self = Self::R.union(Self::W).union(Self::U);
}

/// A single page table entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageTableEntry {
    pub addr: PhysAddr,
    pub flags: PteFlags,
}

/// Error type for page mapping and user-copy operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MappingError {
    /// The virtual address is already mapped.
    AlreadyMapped,
    /// The virtual address is not mapped.
    NotMapped,
    /// No physical frames available.
    OutOfMemory,
    /// The address is not properly aligned.
    MisalignedAddress,
    /// The mapping exists but lacks the permission the access needs.
    InvalidPermissions,
    /// The address lies outside user space or the range overflows.
    BadAddress,
    /// No terminating NUL within the allowed length.
    Unterminated,
}

impl core::fmt::Display for MappingError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::AlreadyMapped => write!(f, "virtual address already mapped"),
            Self::NotMapped => write!(f, "virtual address not mapped"),
            Self::OutOfMemory => write!(f, "out of physical frames"),
            Self::MisalignedAddress => write!(f, "address not properly aligned"),
            Self::InvalidPermissions => write!(f, "invalid permission combination"),
            Self::BadAddress => write!(f, "address outside user space"),
            Self::Unterminated => write!(f, "string not terminated within limit"),
        }
    }
}

/// A process's user page table.
#[derive(Debug, Default)]
pub struct PageTable {
    entries: BTreeMap<usize, PageTableEntry>,
}

impl PageTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of mapped pages.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Look up the entry for the page containing `va`.
    pub fn translate(&self, va: VirtAddr) -> Option<PageTableEntry> {
        self.entries.get(&va.vpn()).copied()
    }

    /// Install mappings for `[va, va + size)` onto consecutive frames
    /// starting at `pa` (`mappages`).
    ///
    /// Nothing is installed unless every page in the range is free.
    pub fn map_pages(
        &mut self,
        va: VirtAddr,
        size: usize,
        pa: PhysAddr,
        flags: PteFlags,
    ) -> Result<(), MappingError> {
        if size == 0 {
            return Err(MappingError::BadAddress);
        }
        if !va.is_aligned() || !pa.is_aligned() {
            return Err(MappingError::MisalignedAddress);
        }
        let end = va
            .as_usize()
            .checked_add(size)
            .filter(|&end| end <= MAXVA)
            .ok_or(MappingError::BadAddress)?;

        let first = va.vpn();
        let count = (end - va.as_usize()).div_ceil(PAGE_SIZE);
        if (first..first + count).any(|vpn| self.entries.contains_key(&vpn)) {
            return Err(MappingError::AlreadyMapped);
        }

        for i in 0..count {
            let entry = PageTableEntry {
                addr: PhysAddr::new(pa.as_usize() + i * PAGE_SIZE),
                flags: flags | PteFlags::V,
            };
            self.entries.insert(first + i, entry);
        }
        Ok(())
    }

    /// Remove `npages` mappings starting at `va` (`uvmunmap`), returning
    /// their frames to `frames`.
    ///
    /// Nothing is removed unless every page in the range is mapped.
    pub fn unmap(
        &mut self,
        va: VirtAddr,
        npages: usize,
        frames: &FrameAllocator,
    ) -> Result<(), MappingError> {
        if !va.is_aligned() {
            return Err(MappingError::MisalignedAddress);
        }
        let first = va.vpn();
        if (first..first + npages).any(|vpn| !self.entries.contains_key(&vpn)) {
            return Err(MappingError::NotMapped);
        }
        for vpn in first..first + npages {
            if let Some(entry) = self.entries.remove(&vpn) {
                frames.free(entry.addr);
            }
        }
        Ok(())
    }

    /// Drop every mapping, freeing the frames behind them.
    pub fn free_all(&mut self, frames: &FrameAllocator) {
        for (_, entry) in core::mem::take(&mut self.entries) {
            frames.free(entry.addr);
        }
    }

    /// Resolve a user address to its frame, requiring `U` plus `needed`.
    fn user_frame(&self, va: usize, needed: PteFlags) -> Result<PhysAddr, MappingError> {
        if va >= MAXVA {
            return Err(MappingError::BadAddress);
        }
        let entry = self
            .entries
            .get(&(va / PAGE_SIZE))
            .ok_or(MappingError::NotMapped)?;
        if !entry.flags.contains(needed | PteFlags::U | PteFlags::V) {
            return Err(MappingError::InvalidPermissions);
        }
        Ok(entry.addr)
    }

    /// Check that `[va, va + len)` is resident and user-accessible, writable
    /// too when `write` is set. Touches nothing.
    pub fn check_range(&self, va: usize, len: usize, write: bool) -> Result<(), MappingError> {
        if len == 0 {
            return Ok(());
        }
        let end = va.checked_add(len).ok_or(MappingError::BadAddress)?;
        let needed = if write { PteFlags::W } else { PteFlags::R };
        let mut page = pg_round_down(va);
        while page < end {
            self.user_frame(page, needed)?;
            page += PAGE_SIZE;
        }
        Ok(())
    }

    /// Copy `src` into user memory at `dstva` (`copyout`).
    pub fn copy_out(
        &self,
        frames: &FrameAllocator,
        dstva: usize,
        src: &[u8],
    ) -> Result<(), MappingError> {
        self.check_range(dstva, src.len(), true)?;
        let mut va = dstva;
        let mut done = 0;
        while done < src.len() {
            let pa = self.user_frame(va, PteFlags::W)?;
            let off = va % PAGE_SIZE;
            let n = (PAGE_SIZE - off).min(src.len() - done);
            frames.with_frame_mut(pa, |page| {
                page[off..off + n].copy_from_slice(&src[done..done + n]);
            });
            done += n;
            va += n;
        }
        Ok(())
    }

    /// Copy `dst.len()` bytes out of user memory at `srcva` (`copyin`).
    pub fn copy_in(
        &self,
        frames: &FrameAllocator,
        dst: &mut [u8],
        srcva: usize,
    ) -> Result<(), MappingError> {
        self.check_range(srcva, dst.len(), false)?;
        let mut va = srcva;
        let mut done = 0;
        while done < dst.len() {
            let pa = self.user_frame(va, PteFlags::R)?;
            let off = va % PAGE_SIZE;
            let n = (PAGE_SIZE - off).min(dst.len() - done);
            frames.with_frame(pa, |page| {
                dst[done..done + n].copy_from_slice(&page[off..off + n]);
            });
            done += n;
            va += n;
        }
        Ok(())
    }

    /// Copy a NUL-terminated string of at most `max` bytes (terminator
    /// included) out of user memory (`copyinstr`). The terminator is not
    /// part of the result.
    pub fn copy_in_str(
        &self,
        frames: &FrameAllocator,
        srcva: usize,
        max: usize,
    ) -> Result<Vec<u8>, MappingError> {
        let mut out = Vec::new();
        let mut va = srcva;
        while out.len() < max {
            let pa = self.user_frame(va, PteFlags::R)?;
            let off = va % PAGE_SIZE;
            let n = (PAGE_SIZE - off).min(max - out.len());
            let terminated = frames.with_frame(pa, |page| {
                let chunk = &page[off..off + n];
                match chunk.iter().position(|&b| b == 0) {
                    Some(nul) => {
                        out.extend_from_slice(&chunk[..nul]);
                        true
                    }
                    None => {
                        out.extend_from_slice(chunk);
                        false
                    }
                }
            });
            if terminated {
                return Ok(out);
            }
            va += n;
        }
        Err(MappingError::Unterminated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_with_page(frames: &FrameAllocator, va: usize, flags: PteFlags) -> PageTable {
        let mut pt = PageTable::new();
        let pa = frames.alloc().unwrap();
        pt.map_pages(VirtAddr::new(va), PAGE_SIZE, pa, flags).unwrap();
        pt
    }

    #[test]
    fn test_remap_is_rejected() {
        let frames = FrameAllocator::new(2);
        let mut pt = table_with_page(&frames, 0x1000, PteFlags::USER_DATA);
        let pa = frames.alloc().unwrap();
        assert_eq!(
            pt.map_pages(VirtAddr::new(0x1000), PAGE_SIZE, pa, PteFlags::USER_DATA),
            Err(MappingError::AlreadyMapped)
        );
    }

    #[test]
    fn test_copy_round_trip_across_pages() {
        let frames = FrameAllocator::new(4);
        let mut pt = PageTable::new();
        let a = frames.alloc().unwrap();
        let b = frames.alloc().unwrap();
        pt.map_pages(VirtAddr::new(0), PAGE_SIZE, a, PteFlags::USER_DATA).unwrap();
        pt.map_pages(VirtAddr::new(PAGE_SIZE), PAGE_SIZE, b, PteFlags::USER_DATA).unwrap();

        let data = [7u8; 64];
        pt.copy_out(&frames, PAGE_SIZE - 32, &data).unwrap();
        let mut back = [0u8; 64];
        pt.copy_in(&frames, &mut back, PAGE_SIZE - 32).unwrap();
        assert_eq!(back, data);
    }

    #[test]
    fn test_copy_out_needs_write_permission() {
        let frames = FrameAllocator::new(1);
        let pt = table_with_page(&frames, 0, PteFlags::R | PteFlags::U);
        assert_eq!(
            pt.copy_out(&frames, 0, b"x"),
            Err(MappingError::InvalidPermissions)
        );
    }

    #[test]
    fn test_kernel_only_page_is_invisible_to_copy_in() {
        let frames = FrameAllocator::new(1);
        let pt = table_with_page(&frames, 0, PteFlags::R | PteFlags::W);
        let mut buf = [0u8; 4];
        assert_eq!(
            pt.copy_in(&frames, &mut buf, 0),
            Err(MappingError::InvalidPermissions)
        );
    }

    #[test]
    fn test_copy_in_str_limits() {
        let frames = FrameAllocator::new(1);
        let pt = table_with_page(&frames, 0, PteFlags::USER_DATA);
        pt.copy_out(&frames, 0, b"hello\0").unwrap();
        assert_eq!(pt.copy_in_str(&frames, 0, 16).unwrap(), b"hello");
        assert_eq!(
            pt.copy_in_str(&frames, 0, 5),
            Err(MappingError::Unterminated)
        );
        // Runs off the only mapped page without finding a terminator.
        pt.copy_out(&frames, PAGE_SIZE - 2, b"ab").unwrap();
        assert_eq!(
            pt.copy_in_str(&frames, PAGE_SIZE - 2, 16),
            Err(MappingError::NotMapped)
        );
    }

    #[test]
    fn test_unmap_frees_frames() {
        let frames = FrameAllocator::new(1);
        let mut pt = table_with_page(&frames, 0x2000, PteFlags::USER_DATA);
        assert_eq!(frames.free_frames(), 0);
        pt.unmap(VirtAddr::new(0x2000), 1, &frames).unwrap();
        assert_eq!(frames.free_frames(), 1);
        assert_eq!(
            pt.unmap(VirtAddr::new(0x2000), 1, &frames),
            Err(MappingError::NotMapped)
        );
    }
}
