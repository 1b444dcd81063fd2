use std::{cmp::Ordering, ptr, ptr::NonNull};

use crate::{
  align::checked_align,
  block::Block,
  error::HeapError,
  heap::{Heap, fatal},
  policy::Placement,
  region::RegionProvider,
  tag::{BLOCK_ALIGN, MIN_BLOCK_SIZE, Status, TAG_SIZE},
};

/// Size of the block that holds a payload of `request` bytes: payload plus
/// both tags, rounded up to [`BLOCK_ALIGN`] and never below
/// [`MIN_BLOCK_SIZE`]. `None` if that overflows.
///
/// ```rust
/// use tagheap::block_size_for;
///
/// assert_eq!(block_size_for(0), Some(32));
/// assert_eq!(block_size_for(16), Some(32));
/// assert_eq!(block_size_for(17), Some(64));
/// assert_eq!(block_size_for(usize::MAX), None);
/// ```
pub fn block_size_for(request: usize) -> Option<usize> {
  request
    .checked_add(2 * TAG_SIZE)
    .and_then(|size| checked_align(size, BLOCK_ALIGN))
    .map(|size| size.max(MIN_BLOCK_SIZE))
    .filter(|&size| size <= isize::MAX as usize)
}

impl<P: RegionProvider> Heap<P> {
  /// Allocates at least `size` bytes. Aborts if the heap cannot grow.
  pub fn allocate(
    &mut self,
    size: usize,
  ) -> NonNull<u8> {
    self.try_allocate(size).unwrap_or_else(|err| fatal(err))
  }

  pub fn try_allocate(
    &mut self,
    size: usize,
  ) -> Result<NonNull<u8>, HeapError> {
    diag!(self.level, Info, "allocate({:#x})", size);

    let block_size = block_size_for(size).ok_or(HeapError::RequestTooLarge(size))?;

    let block = loop {
      if let Some(block) = unsafe { self.locator.find(self.span, block_size) } {
        break block;
      }
      diag!(self.level, Verbose, "  no free block of {:#x} bytes", block_size);
      unsafe { self.extend(block_size)? };
    };

    unsafe { self.place(block, block_size) };
    self.stats.allocations += 1;
    Ok(block.payload())
  }

  /// Marks the first `block_size` bytes of a free block allocated and
  /// splits off the rest as a new free block.
  ///
  /// The remainder cannot have a free neighbour: the block it came from was
  /// already coalesced.
  unsafe fn place(
    &mut self,
    block: Block,
    block_size: usize,
  ) {
    unsafe {
      let available = block.size();
      block.set(block_size, Status::Allocated);

      if available > block_size {
        let rest = block.offset(block_size);
        rest.set(available - block_size, Status::Free);
        diag!(self.level, Verbose, "  split {:p}: {:#x} + {:#x}", block.header(), block_size, available - block_size);
      }
    }
  }

  /// Allocates a zero-filled array of `count` elements of `size` bytes.
  ///
  /// Returns `None` when either argument is zero; aborts on overflow.
  pub fn allocate_zeroed(
    &mut self,
    count: usize,
    size: usize,
  ) -> Option<NonNull<u8>> {
    self.try_allocate_zeroed(count, size).unwrap_or_else(|err| fatal(err))
  }

  pub fn try_allocate_zeroed(
    &mut self,
    count: usize,
    size: usize,
  ) -> Result<Option<NonNull<u8>>, HeapError> {
    diag!(self.level, Info, "allocate_zeroed({:#x}, {:#x})", count, size);

    if count == 0 || size == 0 {
      return Ok(None);
    }
    let bytes = count.checked_mul(size).ok_or(HeapError::CallocOverflow { count, size })?;

    let payload = self.try_allocate(bytes)?;
    unsafe { ptr::write_bytes(payload.as_ptr(), 0, bytes) };
    Ok(Some(payload))
  }

  /// Resizes the allocation at `ptr` to hold `size` bytes.
  ///
  /// A null `ptr` allocates; a zero `size` releases the block and returns
  /// `None`. Otherwise the block shrinks or grows in place when it can, and
  /// moves (copying the common prefix) when it cannot.
  ///
  /// # Safety
  ///
  /// `ptr` must be null or a live allocation from this heap. After a move
  /// or a zero-size resize the old pointer is dangling.
  pub unsafe fn resize(
    &mut self,
    ptr: *mut u8,
    size: usize,
  ) -> Option<NonNull<u8>> {
    unsafe { self.try_resize(ptr, size) }.unwrap_or_else(|err| fatal(err))
  }

  /// # Safety
  ///
  /// See [`resize`](Heap::resize).
  pub unsafe fn try_resize(
    &mut self,
    ptr: *mut u8,
    size: usize,
  ) -> Result<Option<NonNull<u8>>, HeapError> {
    diag!(self.level, Info, "resize({:p}, {:#x})", ptr, size);

    let Some(payload) = NonNull::new(ptr) else {
      return self.try_allocate(size).map(Some);
    };
    if size == 0 {
      unsafe { self.release(ptr) };
      return Ok(None);
    }

    let wanted = block_size_for(size).ok_or(HeapError::RequestTooLarge(size))?;

    unsafe {
      let block = Block::from_payload(payload);
      let current = block.size();

      match wanted.cmp(&current) {
        Ordering::Equal => Ok(Some(payload)),
        Ordering::Less => {
          block.set(wanted, Status::Allocated);
          let rest = block.offset(wanted);
          rest.set(current - wanted, Status::Free);
          self.coalesce(rest);
          self.stats.in_place_resizes += 1;
          Ok(Some(payload))
        }
        Ordering::Greater => {
          let next = block.next();
          let deficit = wanted - current;

          if next.is_free() && next.size() >= deficit {
            let next_size = next.size();
            block.set(wanted, Status::Allocated);
            if next_size > deficit {
              block.offset(wanted).set(next_size - deficit, Status::Free);
            }
            diag!(self.level, Verbose, "  grew {:p} in place to {:#x}", block.header(), wanted);
            self.stats.in_place_resizes += 1;
            return Ok(Some(payload));
          }

          let fresh = self.try_allocate(size)?;
          let keep = (current - 2 * TAG_SIZE).min(size);
          ptr::copy_nonoverlapping(payload.as_ptr(), fresh.as_ptr(), keep);
          self.release(ptr);
          diag!(self.level, Verbose, "  moved {:p} -> {:p}", ptr, fresh);
          self.stats.moved_resizes += 1;
          Ok(Some(fresh))
        }
      }
    }
  }

  /// Releases the allocation at `ptr`; null is a no-op.
  ///
  /// # Safety
  ///
  /// `ptr` must be null or a live allocation from this heap.
  pub unsafe fn release(
    &mut self,
    ptr: *mut u8,
  ) {
    diag!(self.level, Info, "release({:p})", ptr);

    let Some(payload) = NonNull::new(ptr) else {
      return;
    };

    unsafe {
      let block = Block::from_payload(payload);
      debug_assert!(self.span.contains(block.header()), "release of a pointer outside the heap");
      debug_assert!(!block.is_free(), "release of a free block");

      if self.locator.forget(block, self.span.start) {
        diag!(self.level, Verbose, "  released the next fit block, cursor back to heap start");
      }

      block.set(block.size(), Status::Free);
      self.coalesce(block);
    }
    self.stats.releases += 1;
  }

  /// Payload bytes usable through `ptr`, which may exceed the requested size.
  ///
  /// # Safety
  ///
  /// `ptr` must be a live allocation from this heap.
  pub unsafe fn usable_size(
    &self,
    ptr: NonNull<u8>,
  ) -> usize {
    unsafe { Block::from_payload(ptr).size() - 2 * TAG_SIZE }
  }
}
