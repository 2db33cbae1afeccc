//! System Call Argument Validation
//!
//! Every syscall argument comes from the trap frame and is untrusted.
//! Nothing here mutates kernel state: a handler validates all of its
//! arguments first and only then acts on them.
//!
//! # Security Principles
//! - Argument indices beyond the six argument registers are rejected
//! - Descriptors must be in range and name an open file
//! - Paths must be NUL-terminated within their limit and fully resident
//! - User buffers are checked against the page table before any kernel
//!   buffer is sized from them
//! - Data is copied between user and kernel space, never aliased

use alloc::vec;
use alloc::vec::Vec;

use super::handler::SyscallError;
use crate::fs::FileRef;
use crate::kernel::Kernel;
use crate::proc::{Fd, Process};

/// Number of argument registers (`a0`..`a5`).
pub const MAXARG: usize = 6;

fn arg_raw(proc: &Process, n: usize) -> Result<u64, SyscallError> {
    if n >= MAXARG {
        return Err(SyscallError::InvalidArgument);
    }
    Ok(proc.trapframe.a[n])
}

/// Fetch argument `n` as a 32-bit integer.
pub fn arg_int(proc: &Process, n: usize) -> Result<i32, SyscallError> {
    arg_raw(proc, n).map(|raw| raw as i32)
}

/// Fetch argument `n` as a user address or length. The value itself is not
/// checked; whoever dereferences it does that.
pub fn arg_addr(proc: &Process, n: usize) -> Result<usize, SyscallError> {
    arg_raw(proc, n).map(|raw| raw as usize)
}

/// Fetch argument `n` as a NUL-terminated string of at most `max` bytes,
/// terminator included.
pub fn arg_str(
    kernel: &Kernel,
    proc: &Process,
    n: usize,
    max: usize,
) -> Result<Vec<u8>, SyscallError> {
    let addr = arg_addr(proc, n)?;
    proc.pagetable
        .copy_in_str(&kernel.frames, addr, max)
        .map_err(SyscallError::BadAddress)
}

/// Fetch argument `n` as an open descriptor.
pub fn arg_fd(proc: &Process, n: usize) -> Result<(Fd, &FileRef), SyscallError> {
    let raw = arg_int(proc, n)?;
    let fd = Fd::new(i64::from(raw)).ok_or(SyscallError::BadDescriptor)?;
    let file = proc
        .ofile
        .get(fd)
        .map_err(|_| SyscallError::BadDescriptor)?;
    Ok((fd, file))
}

/// A user range checked readable.
///
/// Only constructed by [`validate_user_read`].
#[derive(Debug, Clone, Copy)]
pub struct UserBuffer {
    addr: usize,
    len: usize,
}

impl UserBuffer {
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Copy the range into a kernel buffer.
    pub fn copy_in(&self, kernel: &Kernel, proc: &Process) -> Result<Vec<u8>, SyscallError> {
        let mut buf = vec![0u8; self.len];
        proc.pagetable
            .copy_in(&kernel.frames, &mut buf, self.addr)
            .map_err(SyscallError::BadAddress)?;
        Ok(buf)
    }
}

/// A user range checked writable.
///
/// Only constructed by [`validate_user_write`].
#[derive(Debug, Clone, Copy)]
pub struct UserBufferMut {
    addr: usize,
    len: usize,
}

impl UserBufferMut {
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Copy `src` to the start of the range. `src` must fit.
    pub fn copy_out(
        &self,
        kernel: &Kernel,
        proc: &Process,
        src: &[u8],
    ) -> Result<(), SyscallError> {
        if src.len() > self.len {
            return Err(SyscallError::InvalidArgument);
        }
        proc.pagetable
            .copy_out(&kernel.frames, self.addr, src)
            .map_err(SyscallError::BadAddress)
    }
}

/// Validate that `[ptr, ptr + len)` is resident and readable from user mode.
pub fn validate_user_read(
    proc: &Process,
    ptr: usize,
    len: usize,
) -> Result<UserBuffer, SyscallError> {
    proc.pagetable
        .check_range(ptr, len, false)
        .map_err(SyscallError::BadAddress)?;
    Ok(UserBuffer { addr: ptr, len })
}

/// Validate that `[ptr, ptr + len)` is resident and writable from user mode.
pub fn validate_user_write(
    proc: &Process,
    ptr: usize,
    len: usize,
) -> Result<UserBufferMut, SyscallError> {
    proc.pagetable
        .check_range(ptr, len, true)
        .map_err(SyscallError::BadAddress)?;
    Ok(UserBufferMut { addr: ptr, len })
}

/// Validate a byte count argument: negative counts are rejected.
pub fn arg_len(proc: &Process, n: usize) -> Result<usize, SyscallError> {
    let len = arg_int(proc, n)?;
    usize::try_from(len).map_err(|_| SyscallError::InvalidArgument)
}
