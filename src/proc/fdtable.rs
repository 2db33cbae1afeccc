//! Per-process descriptor table.
//!
//! A fixed array of `NOFILE` slots, each empty or holding one reference to
//! an open file. A descriptor is valid iff its slot is occupied.
//!
//! # Design
//! - Slots are addressed by `Fd` indices, bounds-checked at construction
//! - New descriptors take the lowest free slot
//! - Operations: alloc, get, dup, close

use crate::config::NOFILE;
use crate::fs::FileRef;

/// A descriptor index.
///
/// This is a newtype to prevent using arbitrary integers as slot indices.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(transparent)]
pub struct Fd(u32);

impl Fd {
    /// Create a descriptor index.
    ///
    /// Returns None if the index is out of range.
    #[inline]
    pub const fn new(index: i64) -> Option<Self> {
        if index >= 0 && (index as usize) < NOFILE {
            Some(Self(index as u32))
        } else {
            None
        }
    }

    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    /// Value handed back to user space.
    #[inline]
    pub const fn as_raw(self) -> u64 {
        self.0 as u64
    }
}

/// Error type for descriptor table operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FdError {
    /// The descriptor names an empty slot.
    SlotEmpty,
    /// Every slot is occupied.
    TableFull,
}

impl core::fmt::Display for FdError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::SlotEmpty => write!(f, "descriptor not open"),
            Self::TableFull => write!(f, "too many open files"),
        }
    }
}

pub struct FdTable {
    slots: [Option<FileRef>; NOFILE],
}

impl FdTable {
    pub fn new() -> Self {
        Self {
            slots: [const { None }; NOFILE],
        }
    }

    /// Install `file` in the lowest free slot (`fdalloc`).
    ///
    /// On a full table the reference is handed back so the caller decides
    /// how to release it.
    pub fn alloc(&mut self, file: FileRef) -> Result<Fd, FileRef> {
        match self.slots.iter().position(Option::is_none) {
            Some(index) => {
                self.slots[index] = Some(file);
                Ok(Fd(index as u32))
            }
            None => Err(file),
        }
    }

    /// The open file behind `fd`.
    pub fn get(&self, fd: Fd) -> Result<&FileRef, FdError> {
        self.slots[fd.index()].as_ref().ok_or(FdError::SlotEmpty)
    }

    /// Install another reference to `fd`'s file in a new slot.
    pub fn dup(&mut self, fd: Fd) -> Result<Fd, FdError> {
        let file = self.get(fd)?.dup();
        self.alloc(file).map_err(|_| FdError::TableFull)
    }

    /// Empty `fd`'s slot and return the reference it held.
    pub fn close(&mut self, fd: Fd) -> Result<FileRef, FdError> {
        self.slots[fd.index()].take().ok_or(FdError::SlotEmpty)
    }

    /// Close every descriptor (process exit).
    pub fn close_all(&mut self) {
        for slot in self.slots.iter_mut() {
            *slot = None;
        }
    }

    /// Number of open descriptors.
    pub fn count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }
}

impl Default for FdTable {
    fn default() -> Self {
        Self::new()
    }
}
