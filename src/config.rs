//! Kernel parameters for the file-system and mapping layer.
//!
//! Sizes of the fixed per-process tables, path limits and the device
//! switch range live here as constants. `KernelConfig` carries the few
//! knobs that size shared kernel state at boot.

/// Open files per process.
pub const NOFILE: usize = 16;

/// Memory-mapped regions per process.
pub const NVMA: usize = 16;

/// Number of entries in the device switch table.
pub const NDEV: usize = 10;

/// Maximum length of a path handed in by user space, terminator included.
pub const MAXPATH: usize = 128;

/// Length of the name field of a directory entry.
pub const DIRSIZ: usize = 14;

/// Largest mapping, in pages. The per-mapping page bit-sets are sized from
/// this, so `mmap` refuses anything longer.
pub const MAX_MAP_PAGES: usize = 64;

/// Largest file the inode layer will grow to (268 KiB: 12 direct blocks plus
/// one indirect block of 256 addresses, 1 KiB each).
pub const MAXFILE_BYTES: usize = 268 * 1024;

/// Bytes written per transaction when an inode-backed file is written.
pub const MAX_WRITE_CHUNK: usize = 3 * 1024;

/// Device number of the root file system.
pub const ROOTDEV: u32 = 1;

/// Inode number of the root directory.
pub const ROOTINO: u32 = 1;

/// Major number of the console device.
pub const CONSOLE: usize = 1;

/// Capacity of a pipe's ring buffer.
pub const PIPESIZE: usize = 512;

/// Boot-time sizing of shared kernel state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelConfig {
    /// Inodes on the root file system.
    pub ninodes: u32,
    /// Physical frames available to user memory.
    pub nframes: usize,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            ninodes: 200,
            nframes: 256,
        }
    }
}
