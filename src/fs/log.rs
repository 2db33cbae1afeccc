//! Transaction log.
//!
//! Every metadata or content change is staged as a whole inode image via
//! `log_write`. Staged images reach the disk image only when the last
//! outstanding operation ends, so a group of operations is durable all
//! together or not at all.
//!
//! A `Transaction` is the `begin_op`/`end_op` bracket: creating one begins
//! an operation, dropping it ends the operation on every exit path.

use alloc::collections::BTreeMap;
use log::trace;

use super::inode::DiskInode;
use super::FileSystem;

#[derive(Default)]
pub(super) struct LogState {
    /// Operations currently inside `begin_op`/`end_op`.
    outstanding: usize,
    /// Inode images written by the current group, newest wins.
    staged: BTreeMap<u32, DiskInode>,
    /// Completed commits, for diagnostics.
    commits: u64,
}

/// An open file-system operation. Ends the operation when dropped.
#[must_use = "dropping a Transaction immediately ends the operation"]
pub struct Transaction<'a> {
    fs: &'a FileSystem,
}

impl FileSystem {
    /// Begin a file-system operation (`begin_op`).
    pub fn begin_op(&self) -> Transaction<'_> {
        self.log.lock().outstanding += 1;
        Transaction { fs: self }
    }

    fn end_op(&self) {
        let mut log = self.log.lock();
        log.outstanding = log
            .outstanding
            .checked_sub(1)
            .expect("end_op: no outstanding operation");
        if log.outstanding > 0 {
            return;
        }

        let staged = core::mem::take(&mut log.staged);
        if staged.is_empty() {
            return;
        }
        let count = staged.len();
        let mut disk = self.disk.lock();
        for (inum, image) in staged {
            disk[inum as usize] = image;
        }
        log.commits += 1;
        trace!("[LOG] commit #{}: {} inode(s)", log.commits, count);
    }

    /// Stage a new image of inode `inum` in the running transaction.
    ///
    /// # Panics
    /// Panics when called outside of a transaction.
    pub(super) fn log_write(&self, inum: u32, image: DiskInode) {
        let mut log = self.log.lock();
        if log.outstanding == 0 {
            panic!("log_write outside of trans");
        }
        log.staged.insert(inum, image);
    }

    /// Latest image of inode `inum`: staged if written this group, else the
    /// committed one.
    pub(super) fn read_dinode(&self, inum: u32) -> DiskInode {
        let log = self.log.lock();
        if let Some(image) = log.staged.get(&inum) {
            return image.clone();
        }
        self.disk.lock()[inum as usize].clone()
    }

    /// The committed image of inode `inum`, ignoring staged changes.
    pub fn committed_inode(&self, inum: u32) -> Option<DiskInode> {
        self.disk.lock().get(inum as usize).cloned()
    }

    /// Number of operations currently open.
    pub fn outstanding_ops(&self) -> usize {
        self.log.lock().outstanding
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        self.fs.end_op();
    }
}
