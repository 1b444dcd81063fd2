//! Free block placement policies.
//!
//! All three policies walk the implicit block sequence; they differ only in
//! where the walk starts and when it stops.
//!
//! ```text
//!   first fit   ──►  start ─────────► first match
//!   next fit    ──►  cursor ────────► end ─► start ────► cursor
//!   best fit    ──►  start ─────────────────────────────► end  (smallest leftover)
//! ```

use std::{fmt, str::FromStr};

use crate::{
  block::{Block, BlockIter, Span},
  error::ConfigError,
};

/// Placement strategy, fixed for the lifetime of a heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AllocationPolicy {
  #[default]
  FirstFit,
  NextFit,
  BestFit,
}

impl AllocationPolicy {
  pub const ALL: [AllocationPolicy; 3] = [
    AllocationPolicy::FirstFit,
    AllocationPolicy::NextFit,
    AllocationPolicy::BestFit,
  ];

  pub fn as_str(self) -> &'static str {
    match self {
      AllocationPolicy::FirstFit => "first fit",
      AllocationPolicy::NextFit => "next fit",
      AllocationPolicy::BestFit => "best fit",
    }
  }
}

impl fmt::Display for AllocationPolicy {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for AllocationPolicy {
  type Err = ConfigError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.trim().to_ascii_lowercase().replace(['-', '_', ' '], "").as_str() {
      "first" | "firstfit" | "ff" => Ok(AllocationPolicy::FirstFit),
      "next" | "nextfit" | "nf" => Ok(AllocationPolicy::NextFit),
      "best" | "bestfit" | "bf" => Ok(AllocationPolicy::BestFit),
      _ => Err(ConfigError::UnknownPolicy(s.to_string())),
    }
  }
}

/// A free block search strategy.
pub(crate) trait Placement {
  /// Returns a free block of at least `size` bytes, or `None`.
  ///
  /// # Safety
  ///
  /// `span` must describe a coherent heap.
  unsafe fn find(
    &mut self,
    span: Span,
    size: usize,
  ) -> Option<Block>;
}

#[inline]
unsafe fn fits(
  block: &Block,
  size: usize,
) -> bool {
  unsafe { block.is_free() && block.size() >= size }
}

pub(crate) struct FirstFit;

impl Placement for FirstFit {
  unsafe fn find(
    &mut self,
    span: Span,
    size: usize,
  ) -> Option<Block> {
    unsafe { span.blocks().find(|b| fits(b, size)) }
  }
}

/// Resumes each search at the block handed out last.
pub(crate) struct NextFit {
  cursor: *mut u8,
}

impl Placement for NextFit {
  unsafe fn find(
    &mut self,
    span: Span,
    size: usize,
  ) -> Option<Block> {
    let found = unsafe {
      BlockIter::new(self.cursor, span.end)
        .chain(BlockIter::new(span.start, self.cursor))
        .find(|b| fits(b, size))
    };

    if let Some(block) = found {
      self.cursor = block.header();
    }
    found
  }
}

pub(crate) struct BestFit;

impl Placement for BestFit {
  unsafe fn find(
    &mut self,
    span: Span,
    size: usize,
  ) -> Option<Block> {
    // min_by_key keeps the first of equal minima
    unsafe {
      span
        .blocks()
        .filter(|b| fits(b, size))
        .min_by_key(|b| b.size() - size)
    }
  }
}

/// The active policy together with its search state.
pub(crate) enum Locator {
  First(FirstFit),
  Next(NextFit),
  Best(BestFit),
}

impl Locator {
  pub fn new(
    policy: AllocationPolicy,
    heap_start: *mut u8,
  ) -> Self {
    match policy {
      AllocationPolicy::FirstFit => Locator::First(FirstFit),
      AllocationPolicy::NextFit => Locator::Next(NextFit { cursor: heap_start }),
      AllocationPolicy::BestFit => Locator::Best(BestFit),
    }
  }

  pub fn policy(&self) -> AllocationPolicy {
    match self {
      Locator::First(_) => AllocationPolicy::FirstFit,
      Locator::Next(_) => AllocationPolicy::NextFit,
      Locator::Best(_) => AllocationPolicy::BestFit,
    }
  }

  /// The next-fit cursor, when next fit is active.
  pub fn cursor(&self) -> Option<*mut u8> {
    match self {
      Locator::Next(next) => Some(next.cursor),
      _ => None,
    }
  }

  /// Moves the cursor back to `heap_start` if it references `block`.
  pub fn forget(
    &mut self,
    block: Block,
    heap_start: *mut u8,
  ) -> bool {
    match self {
      Locator::Next(next) if next.cursor == block.header() => {
        next.cursor = heap_start;
        true
      }
      _ => false,
    }
  }
}

impl Placement for Locator {
  unsafe fn find(
    &mut self,
    span: Span,
    size: usize,
  ) -> Option<Block> {
    unsafe {
      match self {
        Locator::First(p) => p.find(span, size),
        Locator::Next(p) => p.find(span, size),
        Locator::Best(p) => p.find(span, size),
      }
    }
  }
}
