//! sysfile - file-system syscalls and memory-mapped files
//!
//! The layer of a small teaching kernel that sits between user space and
//! the file system: it validates syscall arguments, keeps per-process
//! descriptor and mapping tables, changes directories inside transactions
//! and pages file mappings in on demand.
//!
//! # Layout
//! - `syscall`: argument validation, dispatch and the file syscalls
//! - `vm`: mapping table, `mmap`/`munmap`, demand paging
//! - `proc`: per-process state and the descriptor table
//! - `fs`, `mm`: the inode, log, file and page-table layers underneath
//! - `trap`: entry from user mode
//!
//! # Safety
//! - No `unsafe`: user memory is only reached through the page table
//! - Invariant violations inside the file system panic, user errors never do

#![cfg_attr(not(test), no_std)]
#![forbid(unsafe_code)]

extern crate alloc;

pub mod config;
pub mod fs;
pub mod kernel;
pub mod mm;
pub mod proc;
pub mod syscall;
pub mod trap;
pub mod vm;

#[cfg(test)]
mod testutil;

pub use kernel::Kernel;
pub use proc::Process;
