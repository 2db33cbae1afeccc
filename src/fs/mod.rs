//! File-system collaborators of the syscall layer
//!
//! - `log`: transaction boundaries; staged inode images commit atomically
//! - `inode`: inode cache, per-inode locks, content read/write
//! - `dir` / `path`: directory entries and path resolution
//! - `file`, `pipe`, `device`: reference-counted open-file objects
//!
//! The "disk" is a vector of inode images. Only what the outer layer
//! observes is modelled: the block layout and crash recovery beyond
//! "committed images survive" are not.

pub mod device;
pub mod dir;
pub mod file;
pub mod inode;
pub mod log;
pub mod path;
pub mod pipe;

use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;
use spin::Mutex;

use crate::config::ROOTINO;

pub use device::{Console, Device, DeviceTable};
pub use dir::{dir_name, DirName, Dirent, DIRENT_SIZE};
pub use file::{FileError, FileKind, FileRef};
pub use inode::{DiskInode, InodeGuard, InodeRef, InodeType, Stat, STAT_SIZE};
pub use log::Transaction;

/// Errors reported by the inode, directory and path layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsError {
    /// A path component does not exist.
    NotFound,
    /// A non-final path component, or a required directory, is not one.
    NotDir,
    /// The operation is not allowed on a directory.
    IsDir,
    /// The name already exists.
    Exists,
    /// The directory still has entries besides `.` and `..`.
    NotEmpty,
    /// Every on-disk inode is in use.
    NoInodes,
    /// Growing the file would exceed the maximum file size.
    FileTooLarge,
    /// Source and destination live on different devices.
    CrossDevice,
    /// `.` or `..` where a real entry is required.
    InvalidName,
    /// Write offset lies beyond the end of the file.
    BadOffset,
}

impl core::fmt::Display for FsError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NotFound => write!(f, "no such file or directory"),
            Self::NotDir => write!(f, "not a directory"),
            Self::IsDir => write!(f, "is a directory"),
            Self::Exists => write!(f, "file exists"),
            Self::NotEmpty => write!(f, "directory not empty"),
            Self::NoInodes => write!(f, "no free inodes"),
            Self::FileTooLarge => write!(f, "file too large"),
            Self::CrossDevice => write!(f, "cross-device link"),
            Self::InvalidName => write!(f, "invalid name"),
            Self::BadOffset => write!(f, "offset beyond end of file"),
        }
    }
}

/// An in-cache inode and the number of `InodeRef`s pointing at it.
struct CachedInode {
    inode: Arc<inode::Inode>,
    refcnt: usize,
}

/// One mounted file system: disk image, log and inode cache.
pub struct FileSystem {
    dev: u32,
    ninodes: u32,
    /// Committed inode images, indexed by inode number (0 is unused).
    disk: Mutex<Vec<DiskInode>>,
    log: Mutex<log::LogState>,
    itable: Mutex<BTreeMap<u32, CachedInode>>,
}

impl FileSystem {
    /// Format a fresh file system holding only the root directory.
    pub fn new(dev: u32, ninodes: u32) -> Arc<Self> {
        assert!(ninodes > ROOTINO, "mkfs: too few inodes");
        let mut disk = vec![DiskInode::default(); ninodes as usize];

        let mut root = DiskInode {
            typ: InodeType::Dir,
            nlink: 1,
            ..DiskInode::default()
        };
        root.data
            .extend_from_slice(&Dirent::new(ROOTINO as u16, &dir_name(b".")).to_bytes());
        root.data
            .extend_from_slice(&Dirent::new(ROOTINO as u16, &dir_name(b"..")).to_bytes());
        disk[ROOTINO as usize] = root;

        Arc::new(Self {
            dev,
            ninodes,
            disk: Mutex::new(disk),
            log: Mutex::new(log::LogState::default()),
            itable: Mutex::new(BTreeMap::new()),
        })
    }

    /// Device number of this file system.
    pub fn dev(&self) -> u32 {
        self.dev
    }

    /// A new reference to the root directory.
    pub fn root(self: &Arc<Self>) -> InodeRef {
        self.iget(ROOTINO)
    }
}

impl core::fmt::Debug for FileSystem {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("FileSystem")
            .field("dev", &self.dev)
            .field("ninodes", &self.ninodes)
            .finish()
    }
}
