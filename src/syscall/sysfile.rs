//! File-system syscall handlers.
//!
//! Argument checks come first and touch nothing; directory changes go
//! through `namespace` inside a transaction. A handler that fails after
//! acquiring something (an inode, a file, a descriptor) gives it back
//! before returning: references are RAII, descriptors are closed
//! explicitly.

use alloc::vec;
use bitflags::bitflags;
use log::{debug, trace};

use super::handler::SyscallError;
use super::namespace;
use super::validate::{
    arg_addr, arg_fd, arg_int, arg_len, arg_str, validate_user_read, validate_user_write,
};
use crate::config::MAXPATH;
use crate::fs::pipe::pipe_alloc;
use crate::fs::{DeviceTable, FileError, FileKind, FileRef, FsError, InodeType, STAT_SIZE};
use crate::kernel::Kernel;
use crate::proc::{Fd, Process};
use crate::vm::{self, Prot};

bitflags! {
    /// `mode` argument of `open`. Read-only is the empty set.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OpenFlags: u32 {
        const WRONLY = 0x001;
        const RDWR = 0x002;
        const CREATE = 0x200;
        const TRUNC = 0x400;
    }
}

impl OpenFlags {
    pub const RDONLY: Self = Self::empty();

    pub fn readable(self) -> bool {
        !self.contains(Self::WRONLY)
    }

    pub fn writable(self) -> bool {
        self.intersects(Self::WRONLY | Self::RDWR)
    }
}

/// Install `file` in the descriptor table; on a full table the file is
/// released.
fn install(proc: &mut Process, file: FileRef) -> Result<Fd, SyscallError> {
    proc.ofile.alloc(file).map_err(|file| {
        drop(file);
        SyscallError::TooManyFiles
    })
}

/// `open(path, mode)`
pub fn sys_open(kernel: &Kernel, proc: &mut Process) -> Result<u64, SyscallError> {
    let path = arg_str(kernel, proc, 0, MAXPATH)?;
    let mode = OpenFlags::from_bits_truncate(arg_int(proc, 1)? as u32);
    let fs = &kernel.fs;

    let _tx = fs.begin_op();
    let ip = if mode.contains(OpenFlags::CREATE) {
        namespace::create(fs, &proc.cwd, &path, InodeType::File, 0, 0)?
    } else {
        fs.namei(&proc.cwd, &path)?
    };

    let (typ, major) = {
        let guard = ip.lock();
        (guard.typ, guard.major)
    };
    if typ == InodeType::Dir && mode != OpenFlags::RDONLY {
        return Err(FsError::IsDir.into());
    }
    if typ == InodeType::Device && !DeviceTable::in_range(major) {
        return Err(FileError::NoDevice.into());
    }

    let truncate = mode.contains(OpenFlags::TRUNC) && typ == InodeType::File;
    let kind = if typ == InodeType::Device {
        FileKind::Device {
            ip: ip.dup(),
            major: major as usize,
        }
    } else {
        FileKind::Inode(ip.dup())
    };
    let fd = install(proc, FileRef::new(kind, mode.readable(), mode.writable()))?;
    if truncate {
        ip.lock().truncate();
    }

    debug!(
        "[SYSCALL] pid {}: open inode {} as fd {} ({:?})",
        proc.pid,
        ip.inum(),
        fd.index(),
        mode
    );
    Ok(fd.as_raw())
}

/// `close(fd)`
pub fn sys_close(_kernel: &Kernel, proc: &mut Process) -> Result<u64, SyscallError> {
    let (fd, _) = arg_fd(proc, 0)?;
    let file = proc
        .ofile
        .close(fd)
        .map_err(|_| SyscallError::BadDescriptor)?;
    drop(file);
    Ok(0)
}

/// `dup(fd)`
pub fn sys_dup(_kernel: &Kernel, proc: &mut Process) -> Result<u64, SyscallError> {
    let (fd, _) = arg_fd(proc, 0)?;
    let new = proc
        .ofile
        .dup(fd)
        .map_err(|_| SyscallError::TooManyFiles)?;
    Ok(new.as_raw())
}

/// `read(fd, buf, n)`
pub fn sys_read(kernel: &Kernel, proc: &mut Process) -> Result<u64, SyscallError> {
    let (_, file) = arg_fd(proc, 0)?;
    let addr = arg_addr(proc, 1)?;
    let len = arg_len(proc, 2)?;
    let dst = validate_user_write(proc, addr, len)?;

    let mut buf = vec![0u8; dst.len()];
    let n = file.read(&kernel.devices, &mut buf)?;
    dst.copy_out(kernel, proc, &buf[..n])?;
    Ok(n as u64)
}

/// `write(fd, buf, n)`
pub fn sys_write(kernel: &Kernel, proc: &mut Process) -> Result<u64, SyscallError> {
    let (_, file) = arg_fd(proc, 0)?;
    let addr = arg_addr(proc, 1)?;
    let len = arg_len(proc, 2)?;
    let src = validate_user_read(proc, addr, len)?;

    let data = src.copy_in(kernel, proc)?;
    let n = file.write(&kernel.devices, &data)?;
    Ok(n as u64)
}

/// `fstat(fd, stat)`
pub fn sys_fstat(kernel: &Kernel, proc: &mut Process) -> Result<u64, SyscallError> {
    let (_, file) = arg_fd(proc, 0)?;
    let addr = arg_addr(proc, 1)?;
    let dst = validate_user_write(proc, addr, STAT_SIZE)?;

    let stat = file.stat()?;
    dst.copy_out(kernel, proc, &stat.to_bytes())?;
    Ok(0)
}

/// `link(old, new)`
pub fn sys_link(kernel: &Kernel, proc: &mut Process) -> Result<u64, SyscallError> {
    let old = arg_str(kernel, proc, 0, MAXPATH)?;
    let new = arg_str(kernel, proc, 1, MAXPATH)?;
    namespace::link(&kernel.fs, &proc.cwd, &old, &new)?;
    Ok(0)
}

/// `unlink(path)`
pub fn sys_unlink(kernel: &Kernel, proc: &mut Process) -> Result<u64, SyscallError> {
    let path = arg_str(kernel, proc, 0, MAXPATH)?;
    namespace::unlink(&kernel.fs, &proc.cwd, &path)?;
    Ok(0)
}

/// `mkdir(path)`
pub fn sys_mkdir(kernel: &Kernel, proc: &mut Process) -> Result<u64, SyscallError> {
    let path = arg_str(kernel, proc, 0, MAXPATH)?;
    let _tx = kernel.fs.begin_op();
    namespace::create(&kernel.fs, &proc.cwd, &path, InodeType::Dir, 0, 0)?;
    Ok(0)
}

/// `mknod(path, major, minor)`
pub fn sys_mknod(kernel: &Kernel, proc: &mut Process) -> Result<u64, SyscallError> {
    let path = arg_str(kernel, proc, 0, MAXPATH)?;
    let major = arg_int(proc, 1)? as i16;
    let minor = arg_int(proc, 2)? as i16;
    let _tx = kernel.fs.begin_op();
    namespace::create(&kernel.fs, &proc.cwd, &path, InodeType::Device, major, minor)?;
    Ok(0)
}

/// `chdir(path)`
pub fn sys_chdir(kernel: &Kernel, proc: &mut Process) -> Result<u64, SyscallError> {
    let path = arg_str(kernel, proc, 0, MAXPATH)?;
    let _tx = kernel.fs.begin_op();
    let ip = kernel.fs.namei(&proc.cwd, &path)?;
    if ip.lock().typ != InodeType::Dir {
        return Err(FsError::NotDir.into());
    }
    // The old directory is released inside the transaction.
    proc.cwd = ip;
    Ok(0)
}

/// `pipe(fds)`: stores the read and write descriptors as two `i32`s.
pub fn sys_pipe(kernel: &Kernel, proc: &mut Process) -> Result<u64, SyscallError> {
    let addr = arg_addr(proc, 0)?;
    let dst = validate_user_write(proc, addr, 2 * core::mem::size_of::<i32>())?;

    let (r, w) = pipe_alloc();
    let rfd = install(proc, FileRef::new(FileKind::Pipe(r), true, false))?;
    let wfd = match install(proc, FileRef::new(FileKind::Pipe(w), false, true)) {
        Ok(fd) => fd,
        Err(e) => {
            let _ = proc.ofile.close(rfd);
            return Err(e);
        }
    };

    let mut fds = [0u8; 8];
    fds[..4].copy_from_slice(&(rfd.index() as i32).to_le_bytes());
    fds[4..].copy_from_slice(&(wfd.index() as i32).to_le_bytes());
    if let Err(e) = dst.copy_out(kernel, proc, &fds) {
        let _ = proc.ofile.close(rfd);
        let _ = proc.ofile.close(wfd);
        return Err(e);
    }
    Ok(0)
}

/// `mmap(addr, length, prot, flags, fd, offset)`: returns the base of the
/// new mapping. The address hint is not honoured.
pub fn sys_mmap(_kernel: &Kernel, proc: &mut Process) -> Result<u64, SyscallError> {
    let hint = arg_addr(proc, 0)?;
    let length = arg_addr(proc, 1)?;
    let prot = Prot::from_bits_truncate(u64::from(arg_int(proc, 2)? as u32));
    let flags = u64::from(arg_int(proc, 3)? as u32);
    let file = arg_fd(proc, 4)?.1.dup();
    let offset = arg_addr(proc, 5)?;

    if hint != 0 {
        trace!("[MMAP] pid {}: ignoring hint {:#x}", proc.pid, hint);
    }
    let base = vm::mmap(proc, file, length, prot, flags, offset)?;
    Ok(base as u64)
}

/// `munmap(addr, length)`
pub fn sys_munmap(kernel: &Kernel, proc: &mut Process) -> Result<u64, SyscallError> {
    let addr = arg_addr(proc, 0)?;
    let length = arg_addr(proc, 1)?;
    vm::munmap(kernel, proc, addr, length)?;
    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CONSOLE, NOFILE};
    use crate::fs::{dir_name, InodeType};
    use crate::mm::PAGE_SIZE;
    use crate::syscall::numbers::*;
    use crate::syscall::SYSCALL_FAILED;
    use crate::testutil::TestEnv;
    use crate::vm::fault::CAUSE_STORE;
    use crate::vm::vma::{MAP_PRIVATE, MAP_SHARED};

    const O_RDONLY: u64 = 0;
    const O_WRONLY: u64 = OpenFlags::WRONLY.bits() as u64;
    const O_RDWR: u64 = OpenFlags::RDWR.bits() as u64;
    const O_CREATE: u64 = OpenFlags::CREATE.bits() as u64;
    const O_TRUNC: u64 = OpenFlags::TRUNC.bits() as u64;

    fn open(env: &mut TestEnv, path: &[u8], mode: u64) -> u64 {
        let p = env.put_str(path) as u64;
        env.call(SYS_OPEN, &[p, mode])
    }

    fn write(env: &mut TestEnv, fd: u64, data: &[u8]) -> u64 {
        let buf = env.put_bytes(data) as u64;
        env.call(SYS_WRITE, &[fd, buf, data.len() as u64])
    }

    fn read(env: &mut TestEnv, fd: u64, n: usize) -> Option<alloc::vec::Vec<u8>> {
        let buf = env.alloc_buf(n);
        let got = env.call(SYS_READ, &[fd, buf as u64, n as u64]);
        (got != SYSCALL_FAILED).then(|| env.read_user(buf, got as usize))
    }

    fn path_call(env: &mut TestEnv, num: u64, path: &[u8]) -> u64 {
        let p = env.put_str(path) as u64;
        env.call(num, &[p])
    }

    #[test]
    fn test_open_create_write_read() {
        let mut env = TestEnv::new();
        let fd = open(&mut env, b"/f", O_CREATE | O_RDWR);
        assert_eq!(fd, 0);
        assert_eq!(write(&mut env, fd, b"hello"), 5);
        assert_eq!(env.call(SYS_CLOSE, &[fd]), 0);

        let fd = open(&mut env, b"/f", O_RDONLY);
        assert_eq!(read(&mut env, fd, 16).unwrap(), b"hello");
        assert_eq!(write(&mut env, fd, b"x"), SYSCALL_FAILED);
        assert_eq!(open(&mut env, b"/missing", O_RDONLY), SYSCALL_FAILED);
    }

    #[test]
    fn test_open_existing_file_and_directory_with_create() {
        let mut env = TestEnv::new();
        let fd = open(&mut env, b"/f", O_CREATE | O_WRONLY);
        write(&mut env, fd, b"abc");
        assert_eq!(path_call(&mut env, SYS_MKDIR, b"/d"), 0);

        let again = open(&mut env, b"/f", O_CREATE | O_RDONLY);
        assert_ne!(again, SYSCALL_FAILED);
        assert_eq!(read(&mut env, again, 8).unwrap(), b"abc");

        assert_eq!(open(&mut env, b"/d", O_CREATE | O_RDONLY), SYSCALL_FAILED);
        assert_eq!(open(&mut env, b"/d", O_WRONLY), SYSCALL_FAILED);
        assert_ne!(open(&mut env, b"/d", O_RDONLY), SYSCALL_FAILED);
    }

    #[test]
    fn test_truncate_only_on_request() {
        let mut env = TestEnv::new();
        let fd = open(&mut env, b"/f", O_CREATE | O_WRONLY);
        write(&mut env, fd, b"abcdef");
        let fd = open(&mut env, b"/f", O_WRONLY | O_TRUNC);
        write(&mut env, fd, b"xy");

        let fd = open(&mut env, b"/f", O_RDONLY);
        assert_eq!(read(&mut env, fd, 16).unwrap(), b"xy");
    }

    #[test]
    fn test_create_then_unlink_leaves_nothing() {
        let mut env = TestEnv::new();
        let fd = open(&mut env, b"/tmp", O_CREATE | O_RDWR);
        let ip = env.proc.ofile.get(Fd::new(fd as i64).unwrap()).unwrap().inode().unwrap().dup();

        assert_eq!(path_call(&mut env, SYS_UNLINK, b"/tmp"), 0);
        assert_eq!(ip.lock().nlink, 0);
        let root = env.kernel.fs.root();
        assert!(root.lock().dir_find(&dir_name(b"tmp")).is_none());

        // Still open: the inode survives until the last reference goes.
        assert_eq!(write(&mut env, fd, b"zz"), 2);
        let inum = ip.inum();
        drop(ip);
        assert_eq!(env.call(SYS_CLOSE, &[fd]), 0);
        assert_eq!(
            env.kernel.fs.committed_inode(inum).unwrap().typ,
            InodeType::Free
        );
    }

    #[test]
    fn test_dup_survives_close_of_original() {
        let mut env = TestEnv::new();
        let fd = open(&mut env, b"/f", O_CREATE | O_RDWR);
        write(&mut env, fd, b"payload");
        assert_eq!(env.call(SYS_CLOSE, &[fd]), 0);

        let fd = open(&mut env, b"/f", O_RDONLY);
        let copy = env.call(SYS_DUP, &[fd]);
        assert_eq!(copy, fd + 1);
        assert_eq!(env.call(SYS_CLOSE, &[fd]), 0);
        assert_eq!(read(&mut env, copy, 16).unwrap(), b"payload");
        assert!(read(&mut env, fd, 1).is_none());
    }

    #[test]
    fn test_descriptor_table_exhaustion() {
        let mut env = TestEnv::new();
        let fd = open(&mut env, b"/f", O_CREATE | O_RDWR);
        write(&mut env, fd, b"data");
        let ip_refs = {
            let file = env.proc.ofile.get(Fd::new(0).unwrap()).unwrap();
            env.kernel.fs.refcount(file.inode().unwrap().inum())
        };

        let mut fds = alloc::vec![fd];
        for _ in 1..NOFILE {
            let fd = open(&mut env, b"/f", O_RDONLY);
            assert_ne!(fd, SYSCALL_FAILED);
            fds.push(fd);
        }
        assert_eq!(open(&mut env, b"/f", O_RDONLY), SYSCALL_FAILED);
        assert_eq!(env.call(SYS_DUP, &[0]), SYSCALL_FAILED);

        // The failed open released its file and inode reference.
        let inum = env.proc.ofile.get(Fd::new(0).unwrap()).unwrap().inode().unwrap().inum();
        assert_eq!(env.kernel.fs.refcount(inum), ip_refs + NOFILE - 1);
        for &fd in &fds[1..] {
            assert_eq!(read(&mut env, fd, 4).unwrap(), b"data");
        }
    }

    #[test]
    fn test_fstat() {
        let mut env = TestEnv::new();
        let fd = open(&mut env, b"/f", O_CREATE | O_RDWR);
        write(&mut env, fd, b"12345");
        let buf = env.alloc_buf(STAT_SIZE);
        assert_eq!(env.call(SYS_FSTAT, &[fd, buf as u64]), 0);
        let raw = env.read_user(buf, STAT_SIZE);
        assert_eq!(i16::from_le_bytes([raw[8], raw[9]]), InodeType::File as i16);
        assert_eq!(i16::from_le_bytes([raw[10], raw[11]]), 1);
        assert_eq!(u64::from_le_bytes(raw[16..24].try_into().unwrap()), 5);

        // Unwritable destination.
        assert_eq!(env.call(SYS_FSTAT, &[fd, 0x7fff_0000]), SYSCALL_FAILED);
    }

    #[test]
    fn test_link_unlink_syscalls() {
        let mut env = TestEnv::new();
        let fd = open(&mut env, b"/a", O_CREATE | O_RDWR);
        env.call(SYS_CLOSE, &[fd]);
        let a = env.put_str(b"/a") as u64;
        let b = env.put_str(b"/b") as u64;
        assert_eq!(env.call(SYS_LINK, &[a, b]), 0);
        assert_eq!(env.call(SYS_LINK, &[a, b]), SYSCALL_FAILED);
        assert_eq!(path_call(&mut env, SYS_UNLINK, b"/a"), 0);
        assert_ne!(open(&mut env, b"/b", O_RDONLY), SYSCALL_FAILED);

        assert_eq!(path_call(&mut env, SYS_MKDIR, b"/d"), 0);
        assert_eq!(path_call(&mut env, SYS_MKDIR, b"/d/e"), 0);
        assert_eq!(path_call(&mut env, SYS_UNLINK, b"/d"), SYSCALL_FAILED);
        assert_eq!(path_call(&mut env, SYS_UNLINK, b"/d/e"), 0);
        assert_eq!(path_call(&mut env, SYS_UNLINK, b"/d"), 0);
    }

    #[test]
    fn test_chdir_and_relative_paths() {
        let mut env = TestEnv::new();
        assert_eq!(path_call(&mut env, SYS_MKDIR, b"/d"), 0);
        assert_eq!(path_call(&mut env, SYS_CHDIR, b"d"), 0);
        let fd = open(&mut env, b"f", O_CREATE | O_RDWR);
        env.call(SYS_CLOSE, &[fd]);
        assert_ne!(open(&mut env, b"/d/f", O_RDONLY), SYSCALL_FAILED);

        assert_eq!(path_call(&mut env, SYS_CHDIR, b"f"), SYSCALL_FAILED);
        assert_eq!(path_call(&mut env, SYS_CHDIR, b".."), 0);
        assert!(env.proc.cwd.same_inode(&env.kernel.fs.root()));
    }

    #[test]
    fn test_console_device() {
        let mut env = TestEnv::new();
        let p = env.put_str(b"/console") as u64;
        assert_eq!(env.call(SYS_MKNOD, &[p, CONSOLE as u64, 0]), 0);
        let fd = open(&mut env, b"/console", O_RDWR);
        assert_eq!(write(&mut env, fd, b"hi\n"), 3);
        assert_eq!(env.kernel.console.take_output(), b"hi\n");

        env.kernel.console.push_input(b"in");
        assert_eq!(read(&mut env, fd, 8).unwrap(), b"in");

        let p = env.put_str(b"/bogus") as u64;
        assert_eq!(env.call(SYS_MKNOD, &[p, 42, 0]), 0);
        assert_eq!(open(&mut env, b"/bogus", O_RDWR), SYSCALL_FAILED);
    }

    #[test]
    fn test_pipe() {
        let mut env = TestEnv::new();
        let out = env.alloc_buf(8);
        assert_eq!(env.call(SYS_PIPE, &[out as u64]), 0);
        let raw = env.read_user(out, 8);
        let rfd = i32::from_le_bytes(raw[..4].try_into().unwrap()) as u64;
        let wfd = i32::from_le_bytes(raw[4..].try_into().unwrap()) as u64;
        assert_eq!((rfd, wfd), (0, 1));

        assert_eq!(write(&mut env, wfd, b"ping"), 4);
        assert_eq!(read(&mut env, rfd, 8).unwrap(), b"ping");

        // A bad destination leaves no descriptors behind.
        assert_eq!(env.call(SYS_PIPE, &[0x7fff_0000]), SYSCALL_FAILED);
        assert_eq!(env.proc.ofile.count(), 2);
    }

    #[test]
    fn test_pipe_releases_read_end_when_table_fills() {
        let mut env = TestEnv::new();
        for _ in 0..NOFILE - 1 {
            open(&mut env, b"/", O_RDONLY);
        }
        let out = env.alloc_buf(8);
        assert_eq!(env.call(SYS_PIPE, &[out as u64]), SYSCALL_FAILED);
        assert_eq!(env.proc.ofile.count(), NOFILE - 1);
    }

    #[test]
    fn test_mmap_shared_round_trip() {
        let mut env = TestEnv::new();
        let fd = open(&mut env, b"/m", O_CREATE | O_RDWR);
        let page = alloc::vec![b'-'; PAGE_SIZE];
        write(&mut env, fd, &page);

        let prot = (Prot::READ | Prot::WRITE).bits();
        let base = env.call(SYS_MMAP, &[0, PAGE_SIZE as u64, prot, MAP_SHARED, fd, 0]);
        assert_ne!(base, SYSCALL_FAILED);
        assert_eq!(base as usize % PAGE_SIZE, 0);
        // The mapping keeps its own reference to the file.
        assert_eq!(env.call(SYS_CLOSE, &[fd]), 0);

        vm::handle_mapping_fault(&env.kernel, &mut env.proc, CAUSE_STORE, base as usize).unwrap();
        env.proc
            .pagetable
            .copy_out(&env.kernel.frames, base as usize + 10, b"mapped")
            .unwrap();
        let mut in_memory = [0u8; PAGE_SIZE];
        env.proc
            .pagetable
            .copy_in(&env.kernel.frames, &mut in_memory, base as usize)
            .unwrap();

        assert_eq!(env.call(SYS_MUNMAP, &[base, PAGE_SIZE as u64]), 0);
        let root = env.kernel.fs.root();
        let inum = root.lock().dir_find(&dir_name(b"m")).unwrap().0;
        assert_eq!(env.kernel.fs.committed_inode(inum).unwrap().data, in_memory);
        assert_eq!(env.call(SYS_MUNMAP, &[base, PAGE_SIZE as u64]), SYSCALL_FAILED);
    }

    #[test]
    fn test_mmap_rejects_offset_that_overflows() {
        let mut env = TestEnv::new();
        let fd = open(&mut env, b"/m", O_CREATE | O_RDWR);
        let r = Prot::READ.bits();
        let len = 2 * PAGE_SIZE as u64;
        for offset in [u64::MAX, u64::MAX - PAGE_SIZE as u64] {
            let args = [0, len, r, MAP_PRIVATE, fd, offset];
            assert_eq!(env.call(SYS_MMAP, &args), SYSCALL_FAILED);
        }
        assert_eq!(env.proc.vmas.count(), 0);
        assert_ne!(env.call(SYS_MMAP, &[0, len, r, MAP_PRIVATE, fd, 0]), SYSCALL_FAILED);
    }

    #[test]
    fn test_mmap_rejects_bad_descriptor_and_flags() {
        let mut env = TestEnv::new();
        let fd = open(&mut env, b"/m", O_CREATE | O_RDONLY);
        let rw = (Prot::READ | Prot::WRITE).bits();
        let r = Prot::READ.bits();
        assert_eq!(env.call(SYS_MMAP, &[0, 4096, r, MAP_SHARED, 7, 0]), SYSCALL_FAILED);
        assert_eq!(env.call(SYS_MMAP, &[0, 4096, rw, MAP_SHARED, fd, 0]), SYSCALL_FAILED);
        assert_eq!(env.call(SYS_MMAP, &[0, 4096, r, 0, fd, 0]), SYSCALL_FAILED);
        assert_ne!(env.call(SYS_MMAP, &[0, 4096, r, MAP_SHARED, fd, 0]), SYSCALL_FAILED);
    }
}
