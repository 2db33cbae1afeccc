//! Memory management for user address spaces
//!
//! Provides:
//! - Typed physical/virtual addresses and page rounding
//! - The physical frame allocator backing user pages
//! - Per-process page tables and user-memory copy routines
//!
//! # Security Principles
//! - Frames are zeroed before they are handed out
//! - Every user access is checked against the page table first

pub mod address;
pub mod frame;
pub mod paging;

pub use address::{pg_round_down, pg_round_up, PhysAddr, VirtAddr, PAGE_SIZE};
pub use frame::{FrameAllocator, PhysFrame};
pub use paging::{MappingError, PageTable, PteFlags};
