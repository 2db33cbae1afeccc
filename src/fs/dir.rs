//! Directory entries.
//!
//! A directory's content is a packed array of 16-byte records:
//!
//! ```text
//! ┌────────────┬──────────────────────────────┐
//! │ inum: u16  │ name: [u8; DIRSIZ]           │
//! └────────────┴──────────────────────────────┘
//! ```
//!
//! `inum == 0` marks a free slot. Names shorter than `DIRSIZ` are
//! NUL-padded; a name of exactly `DIRSIZ` bytes has no terminator.

use super::inode::{InodeGuard, InodeRef};
use super::FsError;
use crate::config::DIRSIZ;

/// Size of one on-disk directory entry.
pub const DIRENT_SIZE: usize = 2 + DIRSIZ;

/// A directory-entry name: truncated to `DIRSIZ` bytes and NUL-padded.
pub type DirName = [u8; DIRSIZ];

/// Build the stored form of a path component. Longer components are
/// truncated, so two names sharing their first `DIRSIZ` bytes collide.
pub fn dir_name(component: &[u8]) -> DirName {
    let mut name = [0u8; DIRSIZ];
    let n = component.len().min(DIRSIZ);
    name[..n].copy_from_slice(&component[..n]);
    name
}

/// Whether `name` is `.` or `..`.
pub fn is_dot_or_dotdot(name: &DirName) -> bool {
    *name == dir_name(b".") || *name == dir_name(b"..")
}

/// One directory record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dirent {
    pub inum: u16,
    pub name: DirName,
}

impl Dirent {
    pub const EMPTY: Self = Self {
        inum: 0,
        name: [0; DIRSIZ],
    };

    pub fn new(inum: u16, name: &DirName) -> Self {
        Self { inum, name: *name }
    }

    pub fn to_bytes(&self) -> [u8; DIRENT_SIZE] {
        let mut out = [0u8; DIRENT_SIZE];
        out[..2].copy_from_slice(&self.inum.to_le_bytes());
        out[2..].copy_from_slice(&self.name);
        out
    }

    pub fn from_bytes(bytes: &[u8; DIRENT_SIZE]) -> Self {
        let mut name = [0u8; DIRSIZ];
        name.copy_from_slice(&bytes[2..]);
        Self {
            inum: u16::from_le_bytes([bytes[0], bytes[1]]),
            name,
        }
    }
}

impl InodeGuard<'_> {
    /// Read the entry at byte offset `off`.
    ///
    /// # Panics
    /// Panics on a short read: directory sizes are always whole entries.
    pub fn read_dirent(&self, off: usize) -> Dirent {
        let mut buf = [0u8; DIRENT_SIZE];
        if self.read(off, &mut buf) != DIRENT_SIZE {
            panic!("dirent: short read at {}", off);
        }
        Dirent::from_bytes(&buf)
    }

    /// Find `name` in this directory; returns its inode number and the byte
    /// offset of its entry.
    pub fn dir_find(&self, name: &DirName) -> Option<(u32, usize)> {
        (0..self.size())
            .step_by(DIRENT_SIZE)
            .map(|off| (off, self.read_dirent(off)))
            .find(|(_, de)| de.inum != 0 && de.name == *name)
            .map(|(off, de)| (u32::from(de.inum), off))
    }

    /// Look up `name` (`dirlookup`), referencing the inode it names.
    pub fn dirlookup(&self, name: &DirName) -> Option<(InodeRef, usize)> {
        let (inum, off) = self.dir_find(name)?;
        Some((self.inode().fs().iget(inum), off))
    }

    /// Add the entry `(name, inum)` (`dirlink`), reusing the first free slot
    /// or appending. Must run inside a transaction.
    pub fn dirlink(&mut self, name: &DirName, inum: u32) -> Result<(), FsError> {
        if self.dir_find(name).is_some() {
            return Err(FsError::Exists);
        }
        let inum = u16::try_from(inum).map_err(|_| FsError::NoInodes)?;

        let off = (0..self.size())
            .step_by(DIRENT_SIZE)
            .find(|&off| self.read_dirent(off).inum == 0)
            .unwrap_or(self.size());
        self.write(off, &Dirent::new(inum, name).to_bytes())?;
        Ok(())
    }

    /// Zero the entry at `off`, leaving a free slot. Must run inside a
    /// transaction.
    pub fn clear_dirent(&mut self, off: usize) -> Result<(), FsError> {
        self.write(off, &Dirent::EMPTY.to_bytes())?;
        Ok(())
    }

    /// Whether the directory holds nothing besides `.` and `..`.
    pub fn is_dir_empty(&self) -> bool {
        (2 * DIRENT_SIZE..self.size())
            .step_by(DIRENT_SIZE)
            .all(|off| self.read_dirent(off).inum == 0)
    }

    /// Live entries of this directory, `.` and `..` included.
    pub fn entries(&self) -> impl Iterator<Item = Dirent> + '_ {
        (0..self.size())
            .step_by(DIRENT_SIZE)
            .map(|off| self.read_dirent(off))
            .filter(|de| de.inum != 0)
    }
}
