//! System Call Interface
//!
//! The file-system and memory-mapping syscalls of user space.
//!
//! # Security Model
//! - Whitelist approach: only explicitly implemented syscalls are allowed
//! - All parameters are validated before use
//! - Invalid inputs return errors, never panic
//!
//! # Syscalls
//! - 4: pipe(fds[2])
//! - 5: read(fd, buf, n), 16: write(fd, buf, n)
//! - 8: fstat(fd, stat)
//! - 9: chdir(path)
//! - 10: dup(fd), 21: close(fd)
//! - 15: open(path, mode)
//! - 17: mknod(path, major, minor), 20: mkdir(path)
//! - 18: unlink(path), 19: link(old, new)
//! - 22: mmap(addr, length, prot, flags, fd, offset), 23: munmap(addr, length)

mod handler;
pub mod namespace;
pub mod sysfile;
mod validate;

pub use handler::{dispatch, numbers, SyscallError, SYSCALL_FAILED};
pub use sysfile::OpenFlags;
pub use validate::{UserBuffer, UserBufferMut};
