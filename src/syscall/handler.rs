//! System Call Dispatch
//!
//! Reads the syscall number from `a7`, runs the handler and folds its result
//! into the single value returned in `a0`.
//!
//! # Security Considerations
//! - Only the numbers listed in `numbers` are accepted
//! - Handlers report failures as `SyscallError`; user space only ever sees
//!   the generic `-1`
//! - Each handler validates its own arguments before acting

use log::{debug, trace, warn};

use super::sysfile;
use crate::fs::{FileError, FsError};
use crate::kernel::Kernel;
use crate::mm::MappingError;
use crate::proc::Process;
use crate::vm::MmapError;

/// System call numbers
pub mod numbers {
    pub const SYS_PIPE: u64 = 4;
    pub const SYS_READ: u64 = 5;
    pub const SYS_FSTAT: u64 = 8;
    pub const SYS_CHDIR: u64 = 9;
    pub const SYS_DUP: u64 = 10;
    pub const SYS_OPEN: u64 = 15;
    pub const SYS_WRITE: u64 = 16;
    pub const SYS_MKNOD: u64 = 17;
    pub const SYS_UNLINK: u64 = 18;
    pub const SYS_LINK: u64 = 19;
    pub const SYS_MKDIR: u64 = 20;
    pub const SYS_CLOSE: u64 = 21;
    pub const SYS_MMAP: u64 = 22;
    pub const SYS_MUNMAP: u64 = 23;
}

/// Value returned in `a0` for every failed syscall.
pub const SYSCALL_FAILED: u64 = u64::MAX;

/// Why a syscall failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyscallError {
    /// Unknown syscall number.
    NoSyscall(u64),
    /// The descriptor is out of range or not open.
    BadDescriptor,
    /// A user pointer does not name accessible memory.
    BadAddress(MappingError),
    /// An argument is out of range.
    InvalidArgument,
    /// The descriptor table is full.
    TooManyFiles,
    /// The path or inode layer refused the operation.
    Fs(FsError),
    /// The open file refused the operation.
    File(FileError),
    /// Creating or removing a mapping failed.
    Mmap(MmapError),
}

impl core::fmt::Display for SyscallError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NoSyscall(num) => write!(f, "unknown syscall {}", num),
            Self::BadDescriptor => write!(f, "bad file descriptor"),
            Self::BadAddress(e) => write!(f, "bad address: {}", e),
            Self::InvalidArgument => write!(f, "invalid argument"),
            Self::TooManyFiles => write!(f, "too many open files"),
            Self::Fs(e) => write!(f, "{}", e),
            Self::File(e) => write!(f, "{}", e),
            Self::Mmap(e) => write!(f, "{}", e),
        }
    }
}

impl From<FsError> for SyscallError {
    fn from(e: FsError) -> Self {
        Self::Fs(e)
    }
}

impl From<FileError> for SyscallError {
    fn from(e: FileError) -> Self {
        Self::File(e)
    }
}

impl From<MmapError> for SyscallError {
    fn from(e: MmapError) -> Self {
        Self::Mmap(e)
    }
}

fn name(num: u64) -> &'static str {
    match num {
        numbers::SYS_PIPE => "pipe",
        numbers::SYS_READ => "read",
        numbers::SYS_FSTAT => "fstat",
        numbers::SYS_CHDIR => "chdir",
        numbers::SYS_DUP => "dup",
        numbers::SYS_OPEN => "open",
        numbers::SYS_WRITE => "write",
        numbers::SYS_MKNOD => "mknod",
        numbers::SYS_UNLINK => "unlink",
        numbers::SYS_LINK => "link",
        numbers::SYS_MKDIR => "mkdir",
        numbers::SYS_CLOSE => "close",
        numbers::SYS_MMAP => "mmap",
        numbers::SYS_MUNMAP => "munmap",
        _ => "?",
    }
}

/// Dispatch the system call described by `proc`'s trap frame.
///
/// # Returns
/// The value for `a0`: the handler's result, or `SYSCALL_FAILED`.
pub fn dispatch(kernel: &Kernel, proc: &mut Process) -> u64 {
    let num = proc.trapframe.a[7];
    let result = match num {
        numbers::SYS_PIPE => sysfile::sys_pipe(kernel, proc),
        numbers::SYS_READ => sysfile::sys_read(kernel, proc),
        numbers::SYS_FSTAT => sysfile::sys_fstat(kernel, proc),
        numbers::SYS_CHDIR => sysfile::sys_chdir(kernel, proc),
        numbers::SYS_DUP => sysfile::sys_dup(kernel, proc),
        numbers::SYS_OPEN => sysfile::sys_open(kernel, proc),
        numbers::SYS_WRITE => sysfile::sys_write(kernel, proc),
        numbers::SYS_MKNOD => sysfile::sys_mknod(kernel, proc),
        numbers::SYS_UNLINK => sysfile::sys_unlink(kernel, proc),
        numbers::SYS_LINK => sysfile::sys_link(kernel, proc),
        numbers::SYS_MKDIR => sysfile::sys_mkdir(kernel, proc),
        numbers::SYS_CLOSE => sysfile::sys_close(kernel, proc),
        numbers::SYS_MMAP => sysfile::sys_mmap(kernel, proc),
        numbers::SYS_MUNMAP => sysfile::sys_munmap(kernel, proc),
        _ => {
            warn!("[SYSCALL] pid {}: unknown syscall {}", proc.pid, num);
            return SYSCALL_FAILED;
        }
    };

    match result {
        Ok(ret) => {
            trace!("[SYSCALL] pid {}: {} -> {:#x}", proc.pid, name(num), ret);
            ret
        }
        Err(e) => {
            debug!("[SYSCALL] pid {}: {} failed: {}", proc.pid, name(num), e);
            SYSCALL_FAILED
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::TestEnv;

    #[test]
    fn test_unknown_syscall_fails() {
        let mut env = TestEnv::new();
        assert_eq!(env.call(0, &[]), SYSCALL_FAILED);
        assert_eq!(env.call(99, &[]), SYSCALL_FAILED);
    }

    #[test]
    fn test_bad_descriptor_for_every_fd_syscall() {
        let mut env = TestEnv::new();
        let buf = env.alloc_buf(64) as u64;
        for (num, args) in [
            (numbers::SYS_READ, [9, buf, 8]),
            (numbers::SYS_WRITE, [9, buf, 8]),
            (numbers::SYS_FSTAT, [9, buf, 0]),
            (numbers::SYS_DUP, [9, 0, 0]),
            (numbers::SYS_CLOSE, [9, 0, 0]),
        ] {
            assert_eq!(env.call(num, &args), SYSCALL_FAILED, "syscall {}", name(num));
        }
    }
}
