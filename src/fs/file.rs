//! Open-file objects.
//!
//! A `File` is what a descriptor points at: an inode with a shared byte
//! offset, a device inode routed through the device switch, or one end of a
//! pipe. Descriptors and mappings hold `FileRef`s; the object is torn down
//! (inode released, pipe end closed) when the last one drops.

use alloc::sync::Arc;
use spin::Mutex;

use super::device::DeviceTable;
use super::inode::{InodeRef, Stat};
use super::pipe::PipeEnd;
use super::FsError;
use crate::config::MAX_WRITE_CHUNK;

/// Errors from reading, writing or inspecting an open file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileError {
    /// The file was not opened for reading.
    NotReadable,
    /// The file was not opened for writing.
    NotWritable,
    /// No driver is registered for the device's major number.
    NoDevice,
    /// Write to a pipe whose read end is closed.
    BrokenPipe,
    /// The operation makes no sense for this kind of file.
    NotSupported,
    /// The inode layer refused the operation.
    Fs(FsError),
}

impl core::fmt::Display for FileError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NotReadable => write!(f, "file not open for reading"),
            Self::NotWritable => write!(f, "file not open for writing"),
            Self::NoDevice => write!(f, "no such device"),
            Self::BrokenPipe => write!(f, "broken pipe"),
            Self::NotSupported => write!(f, "operation not supported"),
            Self::Fs(e) => write!(f, "{}", e),
        }
    }
}

impl From<FsError> for FileError {
    fn from(e: FsError) -> Self {
        Self::Fs(e)
    }
}

/// What an open file refers to.
pub enum FileKind {
    Inode(InodeRef),
    Device { ip: InodeRef, major: usize },
    Pipe(PipeEnd),
}

pub struct File {
    kind: FileKind,
    readable: bool,
    writable: bool,
    /// Byte offset for inode-backed files.
    off: Mutex<usize>,
}

/// A counted reference to an open file.
///
/// Like `InodeRef` there is no `Clone`; [`FileRef::dup`] is `filedup` and
/// dropping is `fileclose`.
pub struct FileRef(Arc<File>);

impl FileRef {
    /// Allocate an open-file object (`filealloc`).
    pub fn new(kind: FileKind, readable: bool, writable: bool) -> Self {
        Self(Arc::new(File {
            kind,
            readable,
            writable,
            off: Mutex::new(0),
        }))
    }

    pub fn dup(&self) -> FileRef {
        FileRef(Arc::clone(&self.0))
    }

    /// Number of live references to this open file.
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.0)
    }

    /// Whether both references name the same open-file object.
    pub fn same_file(&self, other: &FileRef) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub fn readable(&self) -> bool {
        self.0.readable
    }

    pub fn writable(&self) -> bool {
        self.0.writable
    }

    pub fn kind(&self) -> &FileKind {
        &self.0.kind
    }

    /// The inode behind a file or device, `None` for pipes.
    pub fn inode(&self) -> Option<&InodeRef> {
        match &self.0.kind {
            FileKind::Inode(ip) | FileKind::Device { ip, .. } => Some(ip),
            FileKind::Pipe(_) => None,
        }
    }

    /// Current byte offset.
    pub fn offset(&self) -> usize {
        *self.0.off.lock()
    }

    /// Read into `dst` (`fileread`), advancing the offset of an inode file.
    pub fn read(&self, devices: &DeviceTable, dst: &mut [u8]) -> Result<usize, FileError> {
        if !self.0.readable {
            return Err(FileError::NotReadable);
        }
        match &self.0.kind {
            FileKind::Pipe(end) => end.read(dst),
            FileKind::Device { major, .. } => {
                devices.get(*major).ok_or(FileError::NoDevice)?.read(dst)
            }
            FileKind::Inode(ip) => {
                let guard = ip.lock();
                let mut off = self.0.off.lock();
                let n = guard.read(*off, dst);
                *off += n;
                Ok(n)
            }
        }
    }

    /// Write `src` (`filewrite`). Inode writes go out in pieces of at most
    /// `MAX_WRITE_CHUNK` bytes, each in its own transaction, so one large
    /// write never overflows the log.
    pub fn write(&self, devices: &DeviceTable, src: &[u8]) -> Result<usize, FileError> {
        if !self.0.writable {
            return Err(FileError::NotWritable);
        }
        match &self.0.kind {
            FileKind::Pipe(end) => end.write(src),
            FileKind::Device { major, .. } => {
                devices.get(*major).ok_or(FileError::NoDevice)?.write(src)
            }
            FileKind::Inode(ip) => {
                let mut done = 0;
                for chunk in src.chunks(MAX_WRITE_CHUNK) {
                    let _tx = ip.fs().begin_op();
                    let mut guard = ip.lock();
                    let mut off = self.0.off.lock();
                    let n = guard.write(*off, chunk)?;
                    *off += n;
                    done += n;
                }
                Ok(done)
            }
        }
    }

    /// Status of the underlying inode (`filestat`).
    pub fn stat(&self) -> Result<Stat, FileError> {
        let ip = self.inode().ok_or(FileError::NotSupported)?;
        let stat = ip.lock().stat();
        Ok(stat)
    }
}

impl core::fmt::Debug for FileRef {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let kind = match &self.0.kind {
            FileKind::Inode(_) => "inode",
            FileKind::Device { .. } => "device",
            FileKind::Pipe(_) => "pipe",
        };
        f.debug_struct("FileRef")
            .field("kind", &kind)
            .field("readable", &self.0.readable)
            .field("writable", &self.0.writable)
            .field("refs", &self.ref_count())
            .finish()
    }
}
