//! Per-process state seen by the file and mapping syscalls
//!
//! Everything here is private to one process and only touched by that
//! process's own kernel execution, so none of it is locked.

pub mod fdtable;

pub use fdtable::{Fd, FdError, FdTable};

use log::{debug, warn};

use crate::fs::InodeRef;
use crate::kernel::Kernel;
use crate::mm::{pg_round_up, MappingError, PageTable, PhysFrame, PteFlags, VirtAddr, PAGE_SIZE};
use crate::trap::TrapFrame;
use crate::vm::{self, VmaTable};

pub struct Process {
    pub pid: u32,
    pub pagetable: PageTable,
    /// High-water mark of the user address space. Only ever grows.
    pub sz: usize,
    pub ofile: FdTable,
    pub vmas: VmaTable,
    pub cwd: InodeRef,
    pub trapframe: TrapFrame,
    /// Set when the process must not return to user space.
    pub killed: bool,
}

impl Process {
    /// A process with an empty address space, running in the root directory.
    pub fn new(kernel: &Kernel, pid: u32) -> Self {
        Self {
            pid,
            pagetable: PageTable::new(),
            sz: 0,
            ofile: FdTable::new(),
            vmas: VmaTable::new(),
            cwd: kernel.fs.root(),
            trapframe: TrapFrame::default(),
            killed: false,
        }
    }

    /// Grow user memory by `n` bytes of zeroed read-write pages (`sbrk`).
    /// Returns the old size.
    pub fn grow(&mut self, kernel: &Kernel, n: usize) -> Result<usize, MappingError> {
        let old = self.sz;
        let new = old.checked_add(n).ok_or(MappingError::BadAddress)?;
        let first = pg_round_up(old);
        let mut va = first;
        while va < new {
            let result = PhysFrame::alloc(&kernel.frames)
                .ok_or(MappingError::OutOfMemory)
                .and_then(|frame| {
                    let page = VirtAddr::new(va);
                    self.pagetable.map_pages(page, PAGE_SIZE, frame.addr(), PteFlags::USER_DATA)?;
                    frame.into_addr();
                    Ok(())
                });
            if let Err(e) = result {
                let mapped = (va - first) / PAGE_SIZE;
                if mapped > 0 {
                    self.pagetable
                        .unmap(VirtAddr::new(first), mapped, &kernel.frames)?;
                }
                return Err(e);
            }
            va += PAGE_SIZE;
        }
        self.sz = new;
        Ok(old)
    }

    /// Tear the process down: unmap every mapping (writing shared pages
    /// back), close every descriptor, free user memory and let go of the
    /// working directory.
    pub fn exit(mut self, kernel: &Kernel) {
        let regions: alloc::vec::Vec<(usize, usize)> =
            self.vmas.iter().map(|vma| (vma.base, vma.length)).collect();
        for (base, length) in regions {
            if let Err(e) = vm::munmap(kernel, &mut self, base, length) {
                warn!("[MMAP] pid {}: unmap {:#x} at exit: {}", self.pid, base, e);
            }
        }
        self.ofile.close_all();
        self.pagetable.free_all(&kernel.frames);
        debug!("[PROC] pid {} exited", self.pid);
    }
}
