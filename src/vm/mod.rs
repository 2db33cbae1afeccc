//! File-backed virtual memory
//!
//! - `vma`: the per-process mapping table
//! - `mmap`: creating and removing mappings, write-back on unmap
//! - `fault`: filling mapped pages on first access

pub mod fault;
pub mod mmap;
pub mod vma;

pub use fault::{handle_mapping_fault, FaultError};
pub use mmap::{mmap, munmap, MmapError};
pub use vma::{MapMode, PageSet, Prot, Vma, VmaTable};
