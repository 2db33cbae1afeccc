//! `mmap` / `munmap`.
//!
//! Creating a mapping only records it: no frame is allocated and nothing is
//! read until the first access faults (see `fault`). Unmapping a shared
//! mapping writes every resident page back to the file first.

use log::{debug, trace};

use super::vma::{MapMode, Prot, Vma};
use crate::config::MAX_MAP_PAGES;
use crate::fs::{FileError, FileKind, FileRef, FsError};
use crate::kernel::Kernel;
use crate::mm::address::MAXVA;
use crate::mm::{pg_round_down, pg_round_up, MappingError, PageTable, VirtAddr, PAGE_SIZE};
use crate::proc::Process;

/// Errors from creating or removing a mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MmapError {
    /// Zero length, or longer than a mapping can track.
    BadLength,
    /// `flags` does not name exactly one of shared / private.
    BadFlags,
    /// The descriptor does not refer to a regular file.
    NotMappable,
    /// The file range backing the mapping runs past the largest offset.
    BadOffset,
    /// The protection asks for access the file was not opened with.
    PermissionDenied,
    /// Every mapping slot is in use.
    NoFreeSlot,
    /// The mapping would run past the top of the user address space.
    NoAddressSpace,
    /// No live mapping contains the address.
    NotMapped,
    /// Writing a page back to its file failed.
    WriteBack(FileError),
    /// The page table refused the operation.
    Mapping(MappingError),
}

impl core::fmt::Display for MmapError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::BadLength => write!(f, "bad mapping length"),
            Self::BadFlags => write!(f, "flags must be MAP_SHARED or MAP_PRIVATE"),
            Self::NotMappable => write!(f, "file cannot be mapped"),
            Self::BadOffset => write!(f, "file offset out of range"),
            Self::PermissionDenied => write!(f, "protection exceeds file access"),
            Self::NoFreeSlot => write!(f, "no free mapping slot"),
            Self::NoAddressSpace => write!(f, "out of user address space"),
            Self::NotMapped => write!(f, "address not mapped"),
            Self::WriteBack(e) => write!(f, "write-back failed: {}", e),
            Self::Mapping(e) => write!(f, "{}", e),
        }
    }
}

impl From<MappingError> for MmapError {
    fn from(e: MappingError) -> Self {
        Self::Mapping(e)
    }
}

/// Map `length` bytes of `file`, starting at file offset `offset`, and
/// return the base address. The mapping keeps `file`; on failure it is
/// dropped.
///
/// The mapping is placed at the page-rounded high-water mark, which then
/// moves past it; released ranges are never handed out again.
pub fn mmap(
    proc: &mut Process,
    file: FileRef,
    length: usize,
    prot: Prot,
    flags: u64,
    offset: usize,
) -> Result<usize, MmapError> {
    if length == 0 || length > MAX_MAP_PAGES * PAGE_SIZE {
        return Err(MmapError::BadLength);
    }
    let mode = MapMode::from_flags(flags).ok_or(MmapError::BadFlags)?;
    if offset.checked_add(pg_round_up(length)).is_none() {
        return Err(MmapError::BadOffset);
    }
    if !matches!(file.kind(), FileKind::Inode(_)) {
        return Err(MmapError::NotMappable);
    }
    if prot.contains(Prot::WRITE) && mode != MapMode::Private && !file.writable() {
        return Err(MmapError::PermissionDenied);
    }
    if prot.contains(Prot::READ) && !file.readable() {
        return Err(MmapError::PermissionDenied);
    }
    if !proc.vmas.has_free_slot() {
        return Err(MmapError::NoFreeSlot);
    }

    let base = pg_round_up(proc.sz);
    let top = base
        .checked_add(pg_round_up(length))
        .filter(|&top| top <= MAXVA)
        .ok_or(MmapError::NoAddressSpace)?;

    let vma = Vma::new(base, length, file, prot, mode, offset);
    proc.vmas.insert(vma).map_err(|_| MmapError::NoFreeSlot)?;
    proc.sz = top;

    debug!(
        "[MMAP] pid {}: {:#x}..{:#x} {:?} {:?} off {}",
        proc.pid, base, top, prot, mode, offset
    );
    Ok(base)
}

/// Remove the pages of `[addr, addr + length)` from the mapping that
/// contains `addr`.
///
/// Pages past the end of that mapping are ignored. Once every page of the
/// mapping is gone its slot is freed and the file reference dropped.
pub fn munmap(
    kernel: &Kernel,
    proc: &mut Process,
    addr: usize,
    length: usize,
) -> Result<(), MmapError> {
    let index = proc.vmas.find(addr).ok_or(MmapError::NotMapped)?;
    let vma = proc.vmas.get_mut(index).ok_or(MmapError::NotMapped)?;

    let first = (pg_round_down(addr) - vma.base) / PAGE_SIZE;
    let last = (addr.saturating_add(length) - vma.base)
        .div_ceil(PAGE_SIZE)
        .min(vma.npages());
    let write_back = vma.mode == MapMode::Shared && vma.file.writable();

    for page in first..last {
        if vma.resident.contains(page) {
            let va = VirtAddr::new(vma.page_va(page));
            if write_back {
                write_page(kernel, &proc.pagetable, vma, page)?;
            }
            proc.pagetable.unmap(va, 1, &kernel.frames)?;
            vma.resident.remove(page);
        }
        vma.covered.remove(page);
    }

    if vma.covered.is_empty() {
        if let Some(vma) = proc.vmas.remove(index) {
            debug!("[MMAP] pid {}: released {:#x}", proc.pid, vma.base);
        }
    }
    Ok(())
}

/// Copy resident page `page` of `vma` back to its place in the file.
///
/// A page lying wholly beyond the end of the file has nowhere to go and is
/// dropped; a page overlapping the end extends the file by a full page.
fn write_page(
    kernel: &Kernel,
    pagetable: &PageTable,
    vma: &Vma,
    page: usize,
) -> Result<(), MmapError> {
    let va = VirtAddr::new(vma.page_va(page));
    let pte = pagetable.translate(va).ok_or(MappingError::NotMapped)?;
    let mut buf = [0u8; PAGE_SIZE];
    kernel.frames.with_frame(pte.addr, |frame| buf.copy_from_slice(frame));

    let ip = vma
        .file
        .inode()
        .ok_or(MmapError::WriteBack(FileError::NotSupported))?;
    let off = vma.file_offset(page).ok_or(MmapError::BadOffset)?;
    let _tx = ip.fs().begin_op();
    match ip.lock().write(off, &buf) {
        Ok(_) => {
            trace!("[MMAP] wrote back {} to offset {}", va, off);
            Ok(())
        }
        Err(FsError::BadOffset) => {
            trace!("[MMAP] {} lies past end of file, dropped", va);
            Ok(())
        }
        Err(e) => Err(MmapError::WriteBack(e.into())),
    }
}
