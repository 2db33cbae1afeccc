//! Address newtypes and page arithmetic
//!
//! Frame addresses and user virtual addresses get distinct types so the
//! page-table code cannot confuse them.
//!
//! # Layout
//! - User virtual addresses live in `[0, MAXVA)` (Sv39, 38 usable bits).
//! - Physical frames handed to user memory start at `PHYS_MEM_BASE`.

use core::fmt;

pub const PAGE_SIZE: usize = 4096;
pub const PAGE_SHIFT: usize = 12;
const PAGE_MASK: usize = PAGE_SIZE - 1;

/// One past the highest user virtual address.
pub const MAXVA: usize = 1 << 38;

/// Physical address of the first frame in the user-memory arena.
pub const PHYS_MEM_BASE: usize = 0x8000_0000;

/// Round `n` up to a page boundary.
#[inline]
pub const fn pg_round_up(n: usize) -> usize {
    (n + PAGE_MASK) & !PAGE_MASK
}

/// Round `n` down to a page boundary.
#[inline]
pub const fn pg_round_down(n: usize) -> usize {
    n & !PAGE_MASK
}

/// Number of pages needed to hold `len` bytes.
#[inline]
pub const fn pages_for(len: usize) -> usize {
    pg_round_up(len) >> PAGE_SHIFT
}

/// Defines a `usize` address newtype with the accessors both kinds share.
macro_rules! address_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        #[repr(transparent)]
        pub struct $name(usize);

        impl $name {
            #[inline]
            pub const fn new(addr: usize) -> Self {
                Self(addr)
            }

            #[inline]
            pub const fn as_usize(self) -> usize {
                self.0
            }

            /// True on a page boundary.
            #[inline]
            pub const fn is_aligned(self) -> bool {
                self.0 % PAGE_SIZE == 0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!(stringify!($name), "({:#x})"), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{:#x}", self.0)
            }
        }
    };
}

address_type! {
    /// A physical frame address. Never dereferenced: frame contents are
    /// reached through the allocator that owns them.
    PhysAddr
}

address_type! {
    /// A user virtual address.
    VirtAddr
}

impl VirtAddr {
    /// Virtual page number, the key of a page-table entry.
    #[inline]
    pub const fn vpn(self) -> usize {
        self.0 >> PAGE_SHIFT
    }
}
