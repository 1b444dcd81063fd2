use std::ptr::NonNull;

use crate::tag::{BLOCK_ALIGN, MIN_BLOCK_SIZE, Status, TAG_SIZE, Tag};

/// Handle to a block in the implicit block sequence, identified by the
/// address of its header tag.
///
/// ```text
///   header                                              footer
///   │                                                   │
///   ▼                                                   ▼
///   ┌───────┬───────────────────────────────────────────┬───────┐
///   │ H/h   │                payload                    │ F/f   │
///   └───────┴───────────────────────────────────────────┴───────┘
///   ◄──────────────────────── size ────────────────────────────►
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Block(NonNull<u8>);

impl Block {
  /// # Safety
  ///
  /// `header` must point at a header tag inside a live heap.
  #[inline]
  pub unsafe fn at(header: NonNull<u8>) -> Self {
    Block(header)
  }

  /// Recovers the block that owns a payload pointer.
  ///
  /// # Safety
  ///
  /// `payload` must have been returned by the heap that owns the block.
  #[inline]
  pub unsafe fn from_payload(payload: NonNull<u8>) -> Self {
    unsafe { Block(payload.sub(TAG_SIZE)) }
  }

  #[inline]
  pub fn header(self) -> *mut u8 {
    self.0.as_ptr()
  }

  #[inline]
  pub fn addr(self) -> usize {
    self.0.as_ptr() as usize
  }

  #[inline]
  pub fn payload(self) -> NonNull<u8> {
    unsafe { self.0.add(TAG_SIZE) }
  }

  #[inline]
  pub unsafe fn tag(self) -> Tag {
    unsafe { Tag::read(self.header()) }
  }

  #[inline]
  pub unsafe fn size(self) -> usize {
    unsafe { self.tag().size() }
  }

  #[inline]
  pub unsafe fn is_free(self) -> bool {
    unsafe { self.tag().is_free() }
  }

  /// Footer address according to the size stored in the header.
  #[inline]
  pub unsafe fn footer(self) -> *mut u8 {
    unsafe { self.header().add(self.size() - TAG_SIZE) }
  }

  #[inline]
  pub unsafe fn footer_tag(self) -> Tag {
    unsafe { Tag::read(self.footer()) }
  }

  /// Writes matching header and footer tags for a block of `size` bytes.
  #[inline]
  pub unsafe fn set(
    self,
    size: usize,
    status: Status,
  ) {
    debug_assert!(size >= MIN_BLOCK_SIZE, "block of {size:#x} bytes is below the minimum");
    debug_assert!(size % BLOCK_ALIGN == 0, "block of {size:#x} bytes is not aligned");
    let tag = Tag::pack(size, status);
    unsafe {
      tag.write(self.header());
      tag.write(self.header().add(size - TAG_SIZE));
    }
  }

  /// Block starting `offset` bytes past this block's header.
  #[inline]
  pub unsafe fn offset(
    self,
    offset: usize,
  ) -> Block {
    unsafe { Block(self.0.add(offset)) }
  }

  #[inline]
  pub unsafe fn next(self) -> Block {
    unsafe { self.offset(self.size()) }
  }

  /// Footer tag of the physically preceding block (or the initial sentinel).
  #[inline]
  pub unsafe fn prev_tag(self) -> Tag {
    unsafe { Tag::read(self.header().sub(TAG_SIZE)) }
  }

  /// Header tag of the physically following block (or the end sentinel).
  #[inline]
  pub unsafe fn next_tag(self) -> Tag {
    unsafe { Tag::read(self.header().add(self.size())) }
  }

  /// Physically preceding block, located through its footer.
  #[inline]
  pub unsafe fn prev(self) -> Block {
    unsafe { Block(self.0.sub(self.prev_tag().size())) }
  }
}

/// The managed range `[start, end)`: first block header up to the end sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Span {
  pub start: *mut u8,
  pub end: *mut u8,
}

impl Span {
  /// # Safety
  ///
  /// The span must describe a coherent heap.
  pub unsafe fn blocks(self) -> BlockIter {
    unsafe { BlockIter::new(self.start, self.end) }
  }

  pub fn contains(
    self,
    addr: *const u8,
  ) -> bool {
    (self.start as *const u8) <= addr && addr < self.end as *const u8
  }
}

/// Walks the block sequence in `[from, end)` by following size fields.
///
/// Stops early on a zero-sized tag so a corrupt heap cannot loop forever.
pub(crate) struct BlockIter {
  cur: *mut u8,
  end: *mut u8,
}

impl BlockIter {
  /// # Safety
  ///
  /// `from` must be a block header (or equal to `end`) in a coherent heap.
  pub unsafe fn new(
    from: *mut u8,
    end: *mut u8,
  ) -> Self {
    Self { cur: from, end }
  }
}

impl Iterator for BlockIter {
  type Item = Block;

  fn next(&mut self) -> Option<Block> {
    if self.cur >= self.end {
      return None;
    }

    let block = Block(NonNull::new(self.cur)?);
    let size = unsafe { block.size() };
    if size == 0 {
      self.cur = self.end;
      return None;
    }

    self.cur = unsafe { self.cur.add(size) };
    Some(block)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::tag::Word;

  #[repr(C, align(32))]
  struct Arena([Word; 32]);

  fn arena_block(
    arena: &mut Arena,
    word: usize,
  ) -> Block {
    let base = arena.0.as_mut_ptr() as *mut u8;
    unsafe { Block::at(NonNull::new_unchecked(base.add(word * TAG_SIZE))) }
  }

  #[test]
  fn test_navigation() {
    let mut arena = Arena([0; 32]);
    let first = arena_block(&mut arena, 1);

    unsafe {
      Tag::SENTINEL.write(first.header().sub(TAG_SIZE));
      first.set(8 * TAG_SIZE, Status::Allocated);
      let second = first.next();
      second.set(12 * TAG_SIZE, Status::Free);
      Tag::SENTINEL.write(second.next().header());

      assert_eq!(first.size(), 8 * TAG_SIZE);
      assert_eq!(first.tag(), first.footer_tag());
      assert_eq!(second.prev(), first);
      assert!(second.is_free());
      assert_eq!(first.next_tag(), Tag::pack(12 * TAG_SIZE, Status::Free));
      assert_eq!(first.prev_tag(), Tag::SENTINEL);
      assert_eq!(second.next_tag(), Tag::SENTINEL);
      assert_eq!(Block::from_payload(second.payload()), second);

      let end = second.next().header();
      let walked: Vec<Block> = BlockIter::new(first.header(), end).collect();
      assert_eq!(walked, vec![first, second]);
    }
  }

  #[test]
  fn test_iter_stops_on_zero_size() {
    let mut arena = Arena([0; 32]);
    let first = arena_block(&mut arena, 1);
    let end = arena_block(&mut arena, 30).header();

    unsafe {
      first.set(4 * TAG_SIZE, Status::Free);
      assert_eq!(BlockIter::new(first.header(), end).count(), 1);
    }
  }

  #[test]
  #[cfg(debug_assertions)]
  #[should_panic(expected = "below the minimum")]
  fn test_set_rejects_undersized_block() {
    let mut arena = Arena([0; 32]);
    let first = arena_block(&mut arena, 1);
    unsafe { first.set(MIN_BLOCK_SIZE - BLOCK_ALIGN / 2, Status::Free) };
  }
}
