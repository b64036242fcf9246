//! # Virtual Layout
//!
//! Every address space spans [`ADDRESS_SPACE_SIZE`] bytes, translated by a
//! two-level table: a directory of [`ENTRIES_PER_TABLE`] entries, each
//! covering 2 MiB through a leaf table of 4 KiB pages.
//!
//! ```text
//!  ADDRESS_SPACE_SIZE -> +------------------------------+
//!                        | UVPT: read-only self-map     |
//!  UVPT               -> +------------------------------+
//!                        | kernel region (shared)       |
//!  UTOP               -> +------------------------------+
//!                        | guard                        |
//!  USTACKTOP          -> +------------------------------+
//!                        | THREAD_MAX stack bands       |
//!  USTACKBOTTOM       -> +------------------------------+
//!                        | image, heap ...              |
//!  0                  -> +------------------------------+
//! ```

use lattice_hal::{VirtAddr, PAGE_SIZE};
use static_assertions::const_assert;

/// Entries in one page-table page
pub const ENTRIES_PER_TABLE: usize = 512;

/// Shift of the directory index within an address
pub const PDX_SHIFT: u32 = 21;

/// Bytes covered by one directory entry
pub const DIR_SPAN: u64 = 1 << PDX_SHIFT;

/// Total size of an address space
pub const ADDRESS_SPACE_SIZE: u64 = DIR_SPAN * ENTRIES_PER_TABLE as u64;

/// Top of the user region; everything above is shared kernel mapping
pub const UTOP: u64 = 0x3000_0000;

/// Window through which a process sees its own page tables
pub const UVPT: u64 = ADDRESS_SPACE_SIZE - DIR_SPAN;

/// Maximum threads per process
pub const THREAD_MAX: usize = 8;

/// Pages in one thread's private stack band
pub const STACK_BAND_PAGES: u64 = 4;

/// Bytes in one thread's private stack band
pub const STACK_BAND_SIZE: u64 = STACK_BAND_PAGES * PAGE_SIZE;

/// Top of the stack region (one guard page pair below [`UTOP`])
pub const USTACKTOP: u64 = UTOP - 2 * PAGE_SIZE;

/// Bottom of the stack region shared out to the thread slots
pub const USTACKBOTTOM: u64 = USTACKTOP - STACK_BAND_SIZE * THREAD_MAX as u64;

const_assert!(UTOP % DIR_SPAN == 0);
const_assert!(UVPT >= UTOP);
const_assert!(THREAD_MAX.is_power_of_two() && THREAD_MAX <= 8);
const_assert!(USTACKBOTTOM % PAGE_SIZE == 0);

/// Directory index of an address
#[inline]
pub const fn pdx(va: VirtAddr) -> usize {
    ((va.as_u64() >> PDX_SHIFT) as usize) & (ENTRIES_PER_TABLE - 1)
}

/// Leaf table index of an address
#[inline]
pub const fn ptx(va: VirtAddr) -> usize {
    ((va.as_u64() >> lattice_hal::PAGE_SHIFT) as usize) & (ENTRIES_PER_TABLE - 1)
}

/// Address formed from directory and leaf indices
#[inline]
pub const fn page_address(pdx: usize, ptx: usize) -> VirtAddr {
    VirtAddr::new(((pdx as u64) << PDX_SHIFT) | ((ptx as u64) << lattice_hal::PAGE_SHIFT))
}

/// Initial stack pointer of the thread in `slot`
///
/// Slot `n` owns `[top - STACK_BAND_SIZE, top)` with
/// `top = USTACKTOP - n * STACK_BAND_SIZE`.
#[inline]
pub const fn stack_top(slot: usize) -> VirtAddr {
    VirtAddr::new(USTACKTOP - STACK_BAND_SIZE * slot as u64)
}

/// Whether `[va, va + len)` lies entirely below [`UTOP`]
#[inline]
pub const fn is_user_range(va: VirtAddr, len: u64) -> bool {
    match va.as_u64().checked_add(len) {
        Some(end) => end <= UTOP,
        None => false,
    }
}
