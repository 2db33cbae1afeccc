//! Inode cache.
//!
//! `iget` hands out `InodeRef`s, counted references to a cached in-memory
//! inode; dropping the last one (`iput`) evicts the inode and, when no
//! directory entry refers to it any more, frees it on disk. `lock` is
//! `ilock`: it returns an `InodeGuard`, and dropping the guard is `iunlock`.
//!
//! Contents are read and written through the guard. Every change that must
//! survive goes through `InodeGuard::update` (`iupdate`), which stages the
//! inode image in the running transaction.

use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::ops::{Deref, DerefMut};
use spin::{Mutex, MutexGuard};

use super::{CachedInode, FileSystem, FsError};
use crate::config::MAXFILE_BYTES;

/// Type of an inode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(i16)]
pub enum InodeType {
    /// Unallocated.
    #[default]
    Free = 0,
    Dir = 1,
    File = 2,
    Device = 3,
}

/// Persistent inode image. The file size is `data.len()`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiskInode {
    pub typ: InodeType,
    pub major: i16,
    pub minor: i16,
    pub nlink: i16,
    pub data: Vec<u8>,
}

impl DiskInode {
    pub fn size(&self) -> usize {
        self.data.len()
    }
}

/// Size of the `Stat` record copied out to user space.
pub const STAT_SIZE: usize = 24;

/// File status as reported by `fstat`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stat {
    pub dev: i32,
    pub ino: u32,
    pub typ: InodeType,
    pub nlink: i16,
    pub size: u64,
}

impl Stat {
    /// C layout: `int dev; uint ino; short type; short nlink; uint64 size;`
    pub fn to_bytes(&self) -> [u8; STAT_SIZE] {
        let mut out = [0u8; STAT_SIZE];
        out[0..4].copy_from_slice(&self.dev.to_le_bytes());
        out[4..8].copy_from_slice(&self.ino.to_le_bytes());
        out[8..10].copy_from_slice(&(self.typ as i16).to_le_bytes());
        out[10..12].copy_from_slice(&self.nlink.to_le_bytes());
        out[16..24].copy_from_slice(&self.size.to_le_bytes());
        out
    }
}

/// In-memory inode. Its contents are only reachable through `InodeRef::lock`.
pub struct Inode {
    dev: u32,
    inum: u32,
    data: Mutex<DiskInode>,
}

/// A counted reference to a cached inode.
///
/// There is no `Clone`: taking another reference is the explicit
/// [`InodeRef::dup`], and dropping one is `iput`.
pub struct InodeRef {
    fs: Arc<FileSystem>,
    inode: Arc<Inode>,
}

impl InodeRef {
    pub fn inum(&self) -> u32 {
        self.inode.inum
    }

    pub fn dev(&self) -> u32 {
        self.inode.dev
    }

    /// File system the inode lives on.
    pub fn fs(&self) -> &Arc<FileSystem> {
        &self.fs
    }

    /// Take another reference to the same inode (`idup`).
    pub fn dup(&self) -> InodeRef {
        self.fs.iget(self.inode.inum)
    }

    /// Lock the inode (`ilock`). The lock is released when the guard drops.
    pub fn lock(&self) -> InodeGuard<'_> {
        InodeGuard {
            ip: self,
            data: self.inode.data.lock(),
        }
    }

    /// Whether two references name the same inode.
    pub fn same_inode(&self, other: &InodeRef) -> bool {
        Arc::ptr_eq(&self.inode, &other.inode)
    }
}

impl Drop for InodeRef {
    fn drop(&mut self) {
        self.fs.iput(&self.inode);
    }
}

impl core::fmt::Debug for InodeRef {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("InodeRef")
            .field("dev", &self.inode.dev)
            .field("inum", &self.inode.inum)
            .finish()
    }
}

/// A locked inode.
pub struct InodeGuard<'a> {
    ip: &'a InodeRef,
    data: MutexGuard<'a, DiskInode>,
}

impl Deref for InodeGuard<'_> {
    type Target = DiskInode;

    fn deref(&self) -> &DiskInode {
        &self.data
    }
}

impl DerefMut for InodeGuard<'_> {
    fn deref_mut(&mut self) -> &mut DiskInode {
        &mut self.data
    }
}

impl InodeGuard<'_> {
    /// The reference this guard was taken through.
    pub fn inode(&self) -> &InodeRef {
        self.ip
    }

    /// Persist the in-memory copy (`iupdate`). Must run inside a transaction.
    pub fn update(&self) {
        self.ip.fs.log_write(self.ip.inum(), self.data.clone());
    }

    /// Read up to `dst.len()` bytes at `off` (`readi`). Reads past the end of
    /// the file are short; an offset past the end reads nothing.
    pub fn read(&self, off: usize, dst: &mut [u8]) -> usize {
        let size = self.data.size();
        if off >= size {
            return 0;
        }
        let n = dst.len().min(size - off);
        dst[..n].copy_from_slice(&self.data.data[off..off + n]);
        n
    }

    /// Write `src` at `off`, growing the file as needed (`writei`), and
    /// stage the result. Must run inside a transaction.
    pub fn write(&mut self, off: usize, src: &[u8]) -> Result<usize, FsError> {
        if off > self.data.size() {
            return Err(FsError::BadOffset);
        }
        let end = off.checked_add(src.len()).ok_or(FsError::FileTooLarge)?;
        if end > MAXFILE_BYTES {
            return Err(FsError::FileTooLarge);
        }
        if end > self.data.data.len() {
            self.data.data.resize(end, 0);
        }
        self.data.data[off..end].copy_from_slice(src);
        self.update();
        Ok(src.len())
    }

    /// Discard the contents (`itrunc`) and stage the result.
    pub fn truncate(&mut self) {
        self.data.data.clear();
        self.update();
    }

    /// Status of the locked inode.
    pub fn stat(&self) -> Stat {
        Stat {
            dev: self.ip.dev() as i32,
            ino: self.ip.inum(),
            typ: self.data.typ,
            nlink: self.data.nlink,
            size: self.data.size() as u64,
        }
    }
}

impl FileSystem {
    /// Reference the in-memory copy of inode `inum` (`iget`), loading it
    /// into the cache if needed. Does not lock it.
    pub fn iget(self: &Arc<Self>, inum: u32) -> InodeRef {
        let mut itable = self.itable.lock();
        self.iget_locked(&mut itable, inum)
    }

    /// `iget` for a caller already holding the inode table.
    fn iget_locked(
        self: &Arc<Self>,
        itable: &mut BTreeMap<u32, CachedInode>,
        inum: u32,
    ) -> InodeRef {
        if let Some(cached) = itable.get_mut(&inum) {
            cached.refcnt += 1;
            return InodeRef {
                fs: Arc::clone(self),
                inode: Arc::clone(&cached.inode),
            };
        }

        let inode = Arc::new(Inode {
            dev: self.dev,
            inum,
            data: Mutex::new(self.read_dinode(inum)),
        });
        itable.insert(
            inum,
            CachedInode {
                inode: Arc::clone(&inode),
                refcnt: 1,
            },
        );
        InodeRef {
            fs: Arc::clone(self),
            inode,
        }
    }

    /// Allocate a free on-disk inode of type `typ` (`ialloc`) and return an
    /// unlocked reference to it. Link count starts at zero.
    pub fn ialloc(self: &Arc<Self>, typ: InodeType) -> Result<InodeRef, FsError> {
        // Held across the scan: an inode is cached before anyone else can
        // see it free.
        let mut itable = self.itable.lock();
        for inum in 1..self.ninodes {
            if itable.contains_key(&inum) || self.read_dinode(inum).typ != InodeType::Free {
                continue;
            }
            self.log_write(
                inum,
                DiskInode {
                    typ,
                    ..DiskInode::default()
                },
            );
            return Ok(self.iget_locked(&mut itable, inum));
        }
        Err(FsError::NoInodes)
    }

    /// Drop a reference (`iput`). On the last reference, an inode with no
    /// links left is freed on disk.
    fn iput(&self, inode: &Arc<Inode>) {
        let last = {
            let itable = self.itable.lock();
            let cached = itable.get(&inode.inum).expect("iput: inode not cached");
            cached.refcnt == 1
        };

        if last {
            // The caller holds the only reference, so nobody else can be
            // holding this inode's lock.
            let mut data = inode.data.lock();
            if data.nlink == 0 && data.typ != InodeType::Free {
                let _tx = self.begin_op();
                *data = DiskInode::default();
                self.log_write(inode.inum, data.clone());
                log::debug!("[FS] freed inode {}", inode.inum);
            }
        }

        let mut itable = self.itable.lock();
        if let Some(cached) = itable.get_mut(&inode.inum) {
            cached.refcnt -= 1;
            if cached.refcnt == 0 {
                itable.remove(&inode.inum);
            }
        }
    }

    /// Number of live references to inode `inum`.
    pub fn refcount(&self, inum: u32) -> usize {
        self.itable
            .lock()
            .get(&inum)
            .map_or(0, |cached| cached.refcnt)
    }
}
