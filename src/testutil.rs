//! Test harness: a kernel, one process with scratch user memory, and
//! helpers for driving syscalls the way user space would.

use alloc::vec;
use alloc::vec::Vec;

use crate::config::KernelConfig;
use crate::fs::{FileKind, FileRef, InodeType};
use crate::kernel::Kernel;
use crate::mm::PAGE_SIZE;
use crate::proc::Process;
use crate::syscall::{self, namespace};

/// Pages of user memory set aside for syscall arguments.
const SCRATCH_PAGES: usize = 8;

pub struct TestEnv {
    pub kernel: Kernel,
    pub proc: Process,
    /// Next free byte of scratch memory.
    next: usize,
}

impl TestEnv {
    pub fn new() -> Self {
        let mut env = Self::with_frames(KernelConfig::default().nframes);
        let base = env
            .proc
            .grow(&env.kernel, SCRATCH_PAGES * PAGE_SIZE)
            .unwrap();
        env.next = base;
        env
    }

    /// A process without user memory, on a kernel with `nframes` frames.
    pub fn with_frames(nframes: usize) -> Self {
        let kernel = Kernel::new(KernelConfig {
            nframes,
            ..KernelConfig::default()
        });
        let proc = Process::new(&kernel, 1);
        Self {
            kernel,
            proc,
            next: 0,
        }
    }

    /// Reserve `len` bytes of scratch user memory.
    pub fn alloc_buf(&mut self, len: usize) -> usize {
        let addr = self.next;
        assert!(addr + len <= self.proc.sz, "scratch memory exhausted");
        self.next += len;
        addr
    }

    /// Copy `bytes` into scratch user memory.
    pub fn put_bytes(&mut self, bytes: &[u8]) -> usize {
        let addr = self.alloc_buf(bytes.len());
        self.proc
            .pagetable
            .copy_out(&self.kernel.frames, addr, bytes)
            .unwrap();
        addr
    }

    /// Copy `s` plus a terminating NUL into scratch user memory.
    pub fn put_str(&mut self, s: &[u8]) -> usize {
        let mut bytes = s.to_vec();
        bytes.push(0);
        self.put_bytes(&bytes)
    }

    /// Read `len` bytes of user memory at `addr`.
    pub fn read_user(&self, addr: usize, len: usize) -> Vec<u8> {
        let mut buf = vec![0u8; len];
        self.proc
            .pagetable
            .copy_in(&self.kernel.frames, &mut buf, addr)
            .unwrap();
        buf
    }

    /// Issue syscall `num` with `args` through the dispatcher.
    pub fn call(&mut self, num: u64, args: &[u64]) -> u64 {
        self.proc.trapframe.a = [0; 8];
        self.proc.trapframe.a[..args.len()].copy_from_slice(args);
        self.proc.trapframe.a[7] = num;
        syscall::dispatch(&self.kernel, &mut self.proc)
    }
}

/// Create (or reuse) the file at absolute `path` with `contents` and open it
/// with the given access, bypassing the syscall layer.
pub fn open_file(
    env: &TestEnv,
    path: &[u8],
    contents: &[u8],
    readable: bool,
    writable: bool,
) -> FileRef {
    let fs = &env.kernel.fs;
    let _tx = fs.begin_op();
    let ip = namespace::create(fs, &env.proc.cwd, path, InodeType::File, 0, 0).unwrap();
    {
        let mut guard = ip.lock();
        guard.truncate();
        guard.write(0, contents).unwrap();
    }
    FileRef::new(FileKind::Inode(ip), readable, writable)
}

/// Committed contents of the inode behind `file`.
pub fn file_contents(env: &TestEnv, file: &FileRef) -> Vec<u8> {
    let inum = file.inode().unwrap().inum();
    env.kernel.fs.committed_inode(inum).unwrap().data
}
