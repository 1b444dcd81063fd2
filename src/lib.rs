//! # tagheap - A Boundary-Tag Heap Allocator
//!
//! This crate implements a dynamic memory allocator that manages a single
//! contiguous heap on top of a growable address range, with boundary-tag
//! bookkeeping, in-place splitting, immediate coalescing and three
//! interchangeable placement policies (first, next and best fit).
//!
//! ## Overview
//!
//! The heap sits inside a range handed out by a [`RegionProvider`], padded
//! inward to 32-byte boundaries and bounded by two zero-size, permanently
//! allocated sentinels:
//!
//! ```text
//!           initial sentinel half-block                  end sentinel half-block
//!                     │                                             │
//!   region_start      │   heap_start                         heap_end       region_brk
//!               │     │   │                                         │       │
//!               ▼     ▼   ▼                                         ▼       ▼
//!               ┌─────┬───┬─────────────────────────────────────────┬───┬───┐
//!               │ ??? │ F │ h :                                 : f │ H │???│
//!               └─────┴───┴─────────────────────────────────────────┴───┴───┘
//!                         ▲                                         ▲
//!                         │                                         │
//!                 32-byte aligned                           32-byte aligned
//!
//!   h,f: header/footer of a free block     H,F: header/footer of an allocated block
//! ```
//!
//! Blocks are not linked; the free set is found by walking from `heap_start`
//! to `heap_end`, each header's size giving the offset to the next block.
//! Every block carries the same `(size, status)` tag in its header and
//! footer, so the block before any header can be reached through its footer:
//!
//! ```text
//!   ┌───┬──────────────┬───┬───┬──────────────────────┬───┬───┬─────────┬───┐
//!   │ H │   payload    │ F │ h │                      │ f │ H │ payload │ F │
//!   └───┴──────────────┴───┴───┴──────────────────────┴───┴───┴─────────┴───┘
//!   ◄──── allocated ────────►◄──────── free ──────────────►◄── allocated ───►
//! ```
//!
//! ## Crate Structure
//!
//! ```text
//!   tagheap
//!   ├── align      - Alignment macros (align!, align_down!)
//!   ├── tag        - Boundary tag encoding
//!   ├── block      - Block navigation over raw tags (internal)
//!   ├── region     - RegionProvider trait, DataSegment and FixedRegion
//!   ├── policy     - First, next and best fit placement
//!   ├── config     - HeapConfig and DiagnosticLevel
//!   ├── heap       - Heap state, initialization, extension, coalescing
//!   ├── alloc      - allocate, allocate_zeroed, resize, release
//!   └── check      - Consistency checker and HeapReport
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use tagheap::{AllocationPolicy, DataSegment, Heap, HeapConfig};
//!
//! let segment = DataSegment::new(DataSegment::DEFAULT_CAPACITY).unwrap();
//! let mut heap = Heap::init(segment, HeapConfig::new(AllocationPolicy::BestFit));
//!
//! let ptr = heap.allocate(100);
//! unsafe {
//!     ptr.as_ptr().write_bytes(0xAB, 100);
//!     heap.release(ptr.as_ptr());
//! }
//!
//! assert!(heap.check_consistency().is_coherent());
//! ```
//!
//! ## Failure Model
//!
//! Allocation never reports running out of free blocks: the heap grows and
//! retries. Conditions it cannot recover from (a dirty or missing region, a
//! provider that refuses to grow, an overflowing request) are fatal: they are
//! logged at `error` level and the call panics. The `try_*` variants return
//! the same conditions as [`HeapError`] instead.
//!
//! A panic only ends the process when the binary is built with
//! `panic = "abort"`. Under the default unwinding strategy the panic can be
//! caught (`catch_unwind`, or a joined thread), and the process keeps
//! running. Every fatal check happens before a tag or a bound is written, so
//! a heap that saw a caught fatal error is still structurally coherent, but
//! the failed request was not served.
//!
//! ## Limitations
//!
//! - **Single-threaded only**: no synchronization; wrap the heap in a lock to share it
//! - **Grow only**: memory is never returned to the provider
//! - **One region**: the heap is a single contiguous range

/// Logs through the `log` facade when the heap's diagnostic level is at
/// least `$at`.
macro_rules! diag {
  ($current:expr, $at:ident, $($arg:tt)+) => {{
    let at = $crate::config::DiagnosticLevel::$at;
    if $current >= at {
      if let Some(level) = at.log_level() {
        log::log!(level, $($arg)+);
      }
    }
  }};
}

pub mod align;
mod alloc;
mod block;
mod check;
mod config;
mod error;
mod heap;
mod policy;
mod region;
mod tag;

pub use self::alloc::block_size_for;
pub use check::{BlockInfo, HeapReport, TagMismatch};
pub use config::{DiagnosticLevel, HeapConfig};
pub use error::{ConfigError, HeapError, RegionError};
pub use heap::{Heap, HeapStats};
pub use policy::AllocationPolicy;
pub use region::{DataSegment, FixedRegion, RegionProvider};
pub use tag::{BLOCK_ALIGN, MIN_BLOCK_SIZE, Status, TAG_SIZE, Tag, Word};
