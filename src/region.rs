//! Backing address ranges for the heap.
//!
//! The heap never talks to the operating system directly; it asks a
//! [`RegionProvider`] for more bytes at the end of a single contiguous range,
//! the same way a classic allocator moves the program break with `sbrk(2)`.

use std::{io, ptr, ptr::NonNull};

use crate::error::RegionError;

/// A growable, contiguous byte range `[start, brk)`.
///
/// # Safety
///
/// Implementors guarantee that every byte in `[start, brk)` stays valid for
/// reads and writes, and never moves, for as long as the provider is alive,
/// and that [`grow`](RegionProvider::grow) only ever appends to the end of
/// the range.
pub unsafe trait RegionProvider {
  /// Current `(start, brk)` bounds. `start` is null if no range exists.
  fn bounds(&self) -> (*mut u8, *mut u8);

  /// Extends the range by `increment` bytes and returns the previous break.
  fn grow(
    &mut self,
    increment: usize,
  ) -> Result<*mut u8, RegionError>;

  fn page_size(&self) -> usize;
}

/// A simulated data segment: a fixed-size anonymous mapping whose break is
/// moved forward on demand.
///
/// ```text
///   start                      brk                              limit
///   │                          │                                │
///   ▼                          ▼                                ▼
///   ┌──────────────────────────┬────────────────────────────────┐
///   │        handed out        │       reserved, not yet used   │
///   └──────────────────────────┴────────────────────────────────┘
/// ```
pub struct DataSegment {
  start: NonNull<u8>,
  brk: usize,
  capacity: usize,
  page_size: usize,
}

impl DataSegment {
  pub const DEFAULT_CAPACITY: usize = 64 << 20;

  /// Reserves `capacity` bytes (rounded up to whole pages).
  pub fn new(capacity: usize) -> Result<Self, RegionError> {
    let page_size = match unsafe { libc::sysconf(libc::_SC_PAGESIZE) } {
      n if n > 0 => n as usize,
      _ => 0,
    };
    let capacity = if page_size.is_power_of_two() {
      crate::align!(capacity, page_size)
    } else {
      capacity
    };

    let addr = unsafe {
      libc::mmap(
        ptr::null_mut(),
        capacity,
        libc::PROT_READ | libc::PROT_WRITE,
        libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
        -1,
        0,
      )
    };
    if addr == libc::MAP_FAILED {
      return Err(RegionError::Map(io::Error::last_os_error()));
    }
    let start = NonNull::new(addr as *mut u8).ok_or_else(|| RegionError::Map(io::Error::other("mmap returned null")))?;

    log::debug!("data segment reserved at {:p}, capacity {:#x}, page size {}", start, capacity, page_size);

    Ok(Self {
      start,
      brk: 0,
      capacity,
      page_size,
    })
  }

  pub fn capacity(&self) -> usize {
    self.capacity
  }

  /// Bytes handed out so far.
  pub fn used(&self) -> usize {
    self.brk
  }
}

unsafe impl RegionProvider for DataSegment {
  fn bounds(&self) -> (*mut u8, *mut u8) {
    let start = self.start.as_ptr();
    (start, unsafe { start.add(self.brk) })
  }

  fn grow(
    &mut self,
    increment: usize,
  ) -> Result<*mut u8, RegionError> {
    let available = self.capacity - self.brk;
    if increment > available {
      return Err(RegionError::Exhausted {
        requested: increment,
        available,
      });
    }

    let previous = unsafe { self.start.as_ptr().add(self.brk) };
    self.brk += increment;
    Ok(previous)
  }

  fn page_size(&self) -> usize {
    self.page_size
  }
}

impl Drop for DataSegment {
  fn drop(&mut self) {
    unsafe {
      libc::munmap(self.start.as_ptr() as *mut libc::c_void, self.capacity);
    }
  }
}

/// An in-process region carved from a boxed buffer, with a configurable
/// reported page size.
pub struct FixedRegion {
  buf: NonNull<[u8]>,
  brk: usize,
  page_size: usize,
}

impl FixedRegion {
  pub const DEFAULT_PAGE_SIZE: usize = 4096;

  pub fn new(capacity: usize) -> Self {
    let buf: Box<[u8]> = vec![0u8; capacity].into_boxed_slice();
    Self {
      buf: NonNull::from(Box::leak(buf)),
      brk: 0,
      page_size: Self::DEFAULT_PAGE_SIZE,
    }
  }

  pub fn with_page_size(
    mut self,
    page_size: usize,
  ) -> Self {
    self.page_size = page_size;
    self
  }

  pub fn capacity(&self) -> usize {
    self.buf.len()
  }

  pub fn used(&self) -> usize {
    self.brk
  }
}

unsafe impl RegionProvider for FixedRegion {
  fn bounds(&self) -> (*mut u8, *mut u8) {
    let start = self.buf.as_ptr() as *mut u8;
    (start, unsafe { start.add(self.brk) })
  }

  fn grow(
    &mut self,
    increment: usize,
  ) -> Result<*mut u8, RegionError> {
    let available = self.capacity() - self.brk;
    if increment > available {
      return Err(RegionError::Exhausted {
        requested: increment,
        available,
      });
    }

    let previous = unsafe { (self.buf.as_ptr() as *mut u8).add(self.brk) };
    self.brk += increment;
    Ok(previous)
  }

  fn page_size(&self) -> usize {
    self.page_size
  }
}

impl Drop for FixedRegion {
  fn drop(&mut self) {
    drop(unsafe { Box::from_raw(self.buf.as_ptr()) });
  }
}
