//! Boundary tag encoding.
//!
//! A tag is one machine word. The low three bits hold the status (only bit 0
//! is used), the remaining bits hold the block size, which is always a
//! multiple of [`BLOCK_ALIGN`].
//!
//! ```text
//!   ┌──────────────────────────────────────────────┬─────┐
//!   │                 size (bits 3..)              │ st  │
//!   └──────────────────────────────────────────────┴─────┘
//!                                                   0 = free
//!                                                   1 = allocated
//! ```

use std::{fmt, mem, ptr};

/// Word type stored in headers and footers.
pub type Word = usize;

/// Width of a single boundary tag in bytes.
pub const TAG_SIZE: usize = mem::size_of::<Word>();

/// Block sizes and block start addresses are multiples of this.
pub const BLOCK_ALIGN: usize = 32;

/// Header + footer + two payload words, rounded to [`BLOCK_ALIGN`].
pub const MIN_BLOCK_SIZE: usize = BLOCK_ALIGN;

const STATUS_MASK: Word = 0x7;
const SIZE_MASK: Word = !STATUS_MASK;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
  Free,
  Allocated,
}

impl Status {
  const fn bits(self) -> Word {
    match self {
      Status::Free => 0,
      Status::Allocated => 1,
    }
  }
}

impl fmt::Display for Status {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    f.write_str(match self {
      Status::Free => "free",
      Status::Allocated => "allocated",
    })
  }
}

/// A packed `(size, status)` boundary tag.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Tag(Word);

impl Tag {
  /// Sentinel value: zero size, permanently allocated.
  pub const SENTINEL: Tag = Tag::pack(0, Status::Allocated);

  pub const fn pack(
    size: usize,
    status: Status,
  ) -> Self {
    Tag((size as Word & SIZE_MASK) | status.bits())
  }

  pub const fn from_raw(raw: Word) -> Self {
    Tag(raw)
  }

  pub const fn raw(self) -> Word {
    self.0
  }

  pub const fn size(self) -> usize {
    (self.0 & SIZE_MASK) as usize
  }

  /// Raw status bits, all three of them.
  pub const fn status_bits(self) -> Word {
    self.0 & STATUS_MASK
  }

  pub const fn status(self) -> Status {
    if self.0 & 1 == 0 {
      Status::Free
    } else {
      Status::Allocated
    }
  }

  pub const fn is_free(self) -> bool {
    matches!(self.status(), Status::Free)
  }

  /// Loads the tag stored at `addr`.
  ///
  /// # Safety
  ///
  /// `addr` must be word aligned and valid for reads of one [`Word`].
  #[inline]
  pub unsafe fn read(addr: *const u8) -> Self {
    unsafe { Tag(ptr::read(addr as *const Word)) }
  }

  /// Stores the tag at `addr`.
  ///
  /// # Safety
  ///
  /// `addr` must be word aligned and valid for writes of one [`Word`].
  #[inline]
  pub unsafe fn write(
    self,
    addr: *mut u8,
  ) {
    unsafe { ptr::write(addr as *mut Word, self.0) }
  }
}

impl fmt::Debug for Tag {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    write!(f, "Tag({:#x}, {})", self.size(), self.status())
  }
}
