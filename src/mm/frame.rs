//! Physical Frame Allocator
//!
//! Manages the physical pages (frames) that back user memory using a bitmap
//! allocator over a fixed arena.
//!
//! Frames are handed out lowest-first and zeroed on the way out. Freeing a
//! frame that is not in use panics. The bitmap and the frame contents sit
//! behind separate spinlocks; neither is held while the other is taken.

use alloc::vec;
use alloc::vec::Vec;
use spin::Mutex;

use super::address::{PhysAddr, PAGE_SHIFT, PAGE_SIZE, PHYS_MEM_BASE};

/// One physical page worth of bytes.
pub type Page = [u8; PAGE_SIZE];

/// Allocation bitmap, one bit per frame, set while the frame is in use.
struct Bitmap {
    words: Vec<u64>,
    free: usize,
    total: usize,
}

impl Bitmap {
    fn new(total: usize) -> Self {
        Self {
            words: vec![0; total.div_ceil(64)],
            free: total,
            total,
        }
    }

    fn in_use(&self, frame: usize) -> bool {
        self.words[frame / 64] & (1 << (frame % 64)) != 0
    }

    /// Claim the lowest free frame.
    fn claim(&mut self) -> Option<usize> {
        if self.free == 0 {
            return None;
        }
        let (i, word) = self
            .words
            .iter_mut()
            .enumerate()
            .find(|(_, w)| **w != u64::MAX)?;
        let bit = word.trailing_ones() as usize;
        let frame = i * 64 + bit;
        if frame >= self.total {
            return None;
        }
        *word |= 1 << bit;
        self.free -= 1;
        Some(frame)
    }

    fn release(&mut self, frame: usize) {
        if frame >= self.total {
            panic!("kfree: frame {} outside managed range", frame);
        }
        if !self.in_use(frame) {
            panic!("kfree: double free of frame {}", frame);
        }
        self.words[frame / 64] &= !(1 << (frame % 64));
        self.free += 1;
    }
}

/// Allocator and backing store for every frame user memory can be built from.
pub struct FrameAllocator {
    bitmap: Mutex<Bitmap>,
    memory: Mutex<Vec<Page>>,
}

impl FrameAllocator {
    /// Create an allocator managing `nframes` frames starting at
    /// `PHYS_MEM_BASE`.
    pub fn new(nframes: usize) -> Self {
        Self {
            bitmap: Mutex::new(Bitmap::new(nframes)),
            memory: Mutex::new(vec![[0; PAGE_SIZE]; nframes]),
        }
    }

    fn index_of(&self, addr: PhysAddr) -> usize {
        if !addr.is_aligned() || addr.as_usize() < PHYS_MEM_BASE {
            panic!("frame: bad physical address {:?}", addr);
        }
        (addr.as_usize() - PHYS_MEM_BASE) >> PAGE_SHIFT
    }

    /// Allocate a single physical frame (`kalloc`).
    ///
    /// Returns `None` if no frames are available. The returned frame is
    /// zeroed.
    pub fn alloc(&self) -> Option<PhysAddr> {
        let frame = self.bitmap.lock().claim()?;
        self.memory.lock()[frame].fill(0);
        Some(PhysAddr::new(PHYS_MEM_BASE + (frame << PAGE_SHIFT)))
    }

    /// Free a physical frame (`kfree`).
    ///
    /// # Panics
    /// Panics if the frame is misaligned, outside the arena, or not
    /// allocated (double free).
    pub fn free(&self, addr: PhysAddr) {
        let frame = self.index_of(addr);
        self.bitmap.lock().release(frame);
    }

    /// Number of free frames remaining.
    pub fn free_frames(&self) -> usize {
        self.bitmap.lock().free
    }

    /// Run `f` over the contents of an allocated frame.
    pub fn with_frame<R>(&self, addr: PhysAddr, f: impl FnOnce(&Page) -> R) -> R {
        let frame = self.index_of(addr);
        let memory = self.memory.lock();
        f(&memory[frame])
    }

    /// Run `f` over the contents of an allocated frame, mutably.
    pub fn with_frame_mut<R>(&self, addr: PhysAddr, f: impl FnOnce(&mut Page) -> R) -> R {
        let frame = self.index_of(addr);
        let mut memory = self.memory.lock();
        f(&mut memory[frame])
    }
}

/// A RAII guard for a physical frame that automatically frees it on drop.
///
/// This provides automatic cleanup even in error paths.
#[derive(Debug)]
pub struct PhysFrame<'a> {
    allocator: &'a FrameAllocator,
    addr: PhysAddr,
}

impl<'a> PhysFrame<'a> {
    /// Allocate a new, zeroed physical frame.
    pub fn alloc(allocator: &'a FrameAllocator) -> Option<Self> {
        allocator.alloc().map(|addr| Self { allocator, addr })
    }

    #[inline]
    pub fn addr(&self) -> PhysAddr {
        self.addr
    }

    /// Consume the frame without freeing it.
    ///
    /// Use this when transferring ownership to a page table.
    #[inline]
    pub fn into_addr(self) -> PhysAddr {
        let addr = self.addr;
        core::mem::forget(self);
        addr
    }
}

impl Drop for PhysFrame<'_> {
    fn drop(&mut self) {
        self.allocator.free(self.addr);
    }
}

impl core::fmt::Debug for FrameAllocator {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let bitmap = self.bitmap.lock();
        f.debug_struct("FrameAllocator")
            .field("total", &bitmap.total)
            .field("free", &bitmap.free)
            .finish()
    }
}
