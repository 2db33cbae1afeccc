//! Demand paging for file mappings.
//!
//! A page of a mapping gets its frame on the first access: the trap handler
//! passes the fault here, a zeroed frame is filled from the file and mapped
//! with the mapping's protection.

use log::{debug, trace};

use super::vma::Prot;
use crate::kernel::Kernel;
use crate::mm::{pg_round_down, MappingError, PhysFrame, VirtAddr, PAGE_SIZE};
use crate::proc::Process;

/// `scause` of an instruction page fault.
pub const CAUSE_FETCH: u64 = 12;
/// `scause` of a load page fault.
pub const CAUSE_LOAD: u64 = 13;
/// `scause` of a store page fault.
pub const CAUSE_STORE: u64 = 15;

/// Kind of access that faulted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Fetch,
    Load,
    Store,
}

impl Access {
    pub fn from_cause(cause: u64) -> Option<Self> {
        match cause {
            CAUSE_FETCH => Some(Self::Fetch),
            CAUSE_LOAD => Some(Self::Load),
            CAUSE_STORE => Some(Self::Store),
            _ => None,
        }
    }

    /// Protection the mapping must carry for this access.
    fn required(self) -> Prot {
        match self {
            Self::Fetch | Self::Load => Prot::READ,
            Self::Store => Prot::WRITE,
        }
    }
}

/// Why a fault could not be resolved. Every one is fatal to the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultError {
    /// Not a page-fault cause.
    UnknownCause(u64),
    /// No live mapping covers the address.
    NoMapping,
    /// The mapping does not allow this kind of access.
    ProtectionViolation,
    /// The page's file offset is not representable.
    BadOffset,
    /// No physical frame available.
    OutOfMemory,
    /// The page table refused the new entry.
    Mapping(MappingError),
}

impl core::fmt::Display for FaultError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::UnknownCause(c) => write!(f, "unexpected scause {}", c),
            Self::NoMapping => write!(f, "no mapping covers the address"),
            Self::ProtectionViolation => write!(f, "access violates mapping protection"),
            Self::BadOffset => write!(f, "file offset out of range"),
            Self::OutOfMemory => write!(f, "out of physical frames"),
            Self::Mapping(e) => write!(f, "{}", e),
        }
    }
}

impl From<MappingError> for FaultError {
    fn from(e: MappingError) -> Self {
        Self::Mapping(e)
    }
}

/// Resolve a page fault at `va` against the process's mappings.
///
/// Protection is checked before anything is allocated. The page is filled
/// from the file at `offset + (page - base)`; bytes past the end of the
/// file stay zero.
pub fn handle_mapping_fault(
    kernel: &Kernel,
    proc: &mut Process,
    cause: u64,
    va: usize,
) -> Result<(), FaultError> {
    let access = Access::from_cause(cause).ok_or(FaultError::UnknownCause(cause))?;
    let index = proc.vmas.find(va).ok_or(FaultError::NoMapping)?;
    let vma = proc.vmas.get_mut(index).ok_or(FaultError::NoMapping)?;

    let page = vma.page_index(va);
    if !vma.covered.contains(page) {
        return Err(FaultError::NoMapping);
    }
    if !vma.prot.contains(access.required()) {
        debug!("[FAULT] pid {}: {:?} at {:#x} denied", proc.pid, access, va);
        return Err(FaultError::ProtectionViolation);
    }
    if vma.resident.contains(page) {
        return Err(FaultError::Mapping(MappingError::AlreadyMapped));
    }
    let ip = vma.file.inode().ok_or(FaultError::NoMapping)?;
    let off = vma.file_offset(page).ok_or(FaultError::BadOffset)?;

    let frame = PhysFrame::alloc(&kernel.frames).ok_or(FaultError::OutOfMemory)?;
    let page_va = pg_round_down(va);
    let mut buf = [0u8; PAGE_SIZE];
    let n = ip.lock().read(off, &mut buf);
    kernel
        .frames
        .with_frame_mut(frame.addr(), |dst| dst[..n].copy_from_slice(&buf[..n]));

    // On failure the frame drops and goes back to the allocator.
    proc.pagetable
        .map_pages(VirtAddr::new(page_va), PAGE_SIZE, frame.addr(), vma.pte_flags())?;
    frame.into_addr();
    vma.resident.insert(page);

    trace!(
        "[FAULT] pid {}: {:?} at {:#x}, {} byte(s) from offset {}",
        proc.pid,
        access,
        va,
        n,
        off
    );
    Ok(())
}
