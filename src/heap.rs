use std::ptr::NonNull;

use crate::{
  block::{Block, Span},
  check::BlockInfo,
  config::{DiagnosticLevel, HeapConfig},
  error::HeapError,
  policy::{AllocationPolicy, Locator},
  region::RegionProvider,
  tag::{BLOCK_ALIGN, Status, TAG_SIZE, Tag},
};

/// Logs a fatal condition and terminates the calling operation.
///
/// This is a plain panic: it aborts the process under `panic = "abort"` and
/// unwinds otherwise.
#[cold]
pub(crate) fn fatal(err: HeapError) -> ! {
  log::error!("{err}");
  panic!("PANIC in tagheap: {err}");
}

/// Operation counters, useful for tests and the demo.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeapStats {
  pub allocations: u64,
  pub releases: u64,
  pub extensions: u64,
  pub coalesces: u64,
  pub in_place_resizes: u64,
  pub moved_resizes: u64,
}

/// A boundary-tag heap living inside the range of a [`RegionProvider`].
///
/// The heap owns its provider; a `Heap` only exists once initialization
/// succeeded, so there is no uninitialized state to guard against.
pub struct Heap<P: RegionProvider> {
  pub(crate) provider: P,
  pub(crate) region_start: *mut u8,
  pub(crate) region_brk: *mut u8,
  pub(crate) span: Span,
  pub(crate) locator: Locator,
  pub(crate) config: HeapConfig,
  pub(crate) level: DiagnosticLevel,
  pub(crate) stats: HeapStats,
}

// SAFETY: the heap has exclusive ownership of every byte its raw pointers
// refer to; moving it to another thread moves that ownership along.
unsafe impl<P: RegionProvider + Send> Send for Heap<P> {}

/// Last 32-byte boundary that leaves room for the end sentinel below `brk`.
fn end_below(brk: *mut u8) -> *mut u8 {
  let addr = brk as usize;
  let end = crate::align_down!(addr - TAG_SIZE, BLOCK_ALIGN);
  brk.wrapping_sub(addr - end)
}

impl<P: RegionProvider> Heap<P> {
  /// Initializes a heap on a pristine region, aborting on any failure.
  pub fn init(
    provider: P,
    config: HeapConfig,
  ) -> Self {
    Self::try_init(provider, config).unwrap_or_else(|err| fatal(err))
  }

  /// Validates the region, requests the first chunk and lays out one free
  /// block spanning the whole heap.
  pub fn try_init(
    mut provider: P,
    config: HeapConfig,
  ) -> Result<Self, HeapError> {
    let level = config.diagnostic_level;
    diag!(level, Info, "init({})", config.policy);

    config.validate().map_err(HeapError::InvalidConfig)?;

    let (start, brk) = provider.bounds();
    let page_size = provider.page_size();
    diag!(
      level,
      Verbose,
      "  region_start: {:p}, region_brk: {:p}, page size: {}",
      start,
      brk,
      page_size
    );

    if start.is_null() {
      return Err(HeapError::NotProvided);
    }
    if start != brk {
      return Err(HeapError::NotPristine {
        start: start as usize,
        brk: brk as usize,
      });
    }
    if page_size == 0 {
      return Err(HeapError::ZeroPageSize);
    }

    let previous = provider.grow(config.chunk_size)?;
    if previous != brk {
      return Err(HeapError::Discontiguous {
        expected: brk as usize,
        found: previous as usize,
      });
    }
    let (region_start, region_brk) = provider.bounds();

    let offset = crate::align!(region_start as usize + TAG_SIZE, BLOCK_ALIGN) - region_start as usize;
    let heap_start = region_start.wrapping_add(offset);
    let heap_end = end_below(region_brk);

    unsafe {
      Tag::SENTINEL.write(heap_start.sub(TAG_SIZE));
      Tag::SENTINEL.write(heap_end);
      Block::at(NonNull::new_unchecked(heap_start)).set(heap_end as usize - heap_start as usize, Status::Free);
    }

    diag!(
      level,
      Verbose,
      "  heap_start: {:p}, heap_end: {:p}, initial free block: {:#x}",
      heap_start,
      heap_end,
      heap_end as usize - heap_start as usize
    );

    Ok(Self {
      provider,
      region_start,
      region_brk,
      span: Span {
        start: heap_start,
        end: heap_end,
      },
      locator: Locator::new(config.policy, heap_start),
      config,
      level,
      stats: HeapStats::default(),
    })
  }

  /// Merges `block` with free neighbours and returns the resulting block.
  ///
  /// The sentinels are permanently allocated, so neither side ever reads
  /// outside the heap.
  pub(crate) unsafe fn coalesce(
    &mut self,
    block: Block,
  ) -> Block {
    unsafe {
      let mut size = block.size();
      let prev_free = block.prev_tag().is_free();
      let next_free = block.next_tag().is_free();

      let merged = match (prev_free, next_free) {
        (false, false) => return block,
        (false, true) => {
          size += block.next().size();
          block
        }
        (true, false) => {
          let prev = block.prev();
          size += prev.size();
          prev
        }
        (true, true) => {
          let prev = block.prev();
          size += prev.size() + block.next().size();
          prev
        }
      };

      merged.set(size, Status::Free);
      self.stats.coalesces += 1;
      diag!(self.level, Verbose, "  coalesce {:p} -> {:p} ({:#x})", block.header(), merged.header(), size);
      merged
    }
  }

  /// Grows the region by enough whole chunks to hold a block of
  /// `min_size` bytes, turns the old end sentinel into the header of the
  /// new free space and coalesces it with the block before.
  pub(crate) unsafe fn extend(
    &mut self,
    min_size: usize,
  ) -> Result<Block, HeapError> {
    let chunk = self.config.chunk_size;
    let increment = min_size
      .max(1)
      .div_ceil(chunk)
      .checked_mul(chunk)
      .ok_or(HeapError::RequestTooLarge(min_size))?;
    diag!(self.level, Verbose, "  extend heap by {:#x}", increment);

    let previous = self.provider.grow(increment)?;
    if previous != self.region_brk {
      return Err(HeapError::Discontiguous {
        expected: self.region_brk as usize,
        found: previous as usize,
      });
    }
    let (_, brk) = self.provider.bounds();
    self.region_brk = brk;

    let old_end = self.span.end;
    let new_end = end_below(brk);

    unsafe {
      let block = Block::at(NonNull::new_unchecked(old_end));
      block.set(new_end as usize - old_end as usize, Status::Free);
      Tag::SENTINEL.write(new_end);
      self.span.end = new_end;
      self.stats.extensions += 1;

      Ok(self.coalesce(block))
    }
  }

  pub fn policy(&self) -> AllocationPolicy {
    self.locator.policy()
  }

  pub fn config(&self) -> &HeapConfig {
    &self.config
  }

  pub fn diagnostic_level(&self) -> DiagnosticLevel {
    self.level
  }

  pub fn set_diagnostic_level(
    &mut self,
    level: DiagnosticLevel,
  ) {
    self.level = level;
  }

  /// Header address of the first block.
  pub fn heap_start(&self) -> *mut u8 {
    self.span.start
  }

  /// Address of the end sentinel.
  pub fn heap_end(&self) -> *mut u8 {
    self.span.end
  }

  /// Bounds of the provider's range as last observed.
  pub fn region_bounds(&self) -> (*mut u8, *mut u8) {
    (self.region_start, self.region_brk)
  }

  /// Header address the next search starts from, under next fit.
  pub fn cursor(&self) -> Option<*mut u8> {
    self.locator.cursor()
  }

  pub fn stats(&self) -> HeapStats {
    self.stats
  }

  pub fn provider(&self) -> &P {
    &self.provider
  }

  /// Snapshot of every block between `heap_start` and `heap_end`.
  pub fn blocks(&self) -> impl Iterator<Item = BlockInfo> + '_ {
    unsafe { self.span.blocks() }.map(|b| unsafe { BlockInfo::of(b) })
  }
}

#[cfg(test)]
mod tests {
  use test_log::test;

  use super::*;
  use crate::{
    error::RegionError,
    region::{DataSegment, FixedRegion},
  };

  /// A provider whose bounds and growth behaviour are scripted.
  struct Scripted {
    start: *mut u8,
    brk: *mut u8,
    page_size: usize,
  }

  unsafe impl RegionProvider for Scripted {
    fn bounds(&self) -> (*mut u8, *mut u8) {
      (self.start, self.brk)
    }

    fn grow(
      &mut self,
      increment: usize,
    ) -> Result<*mut u8, RegionError> {
      Err(RegionError::Exhausted {
        requested: increment,
        available: 0,
      })
    }

    fn page_size(&self) -> usize {
      self.page_size
    }
  }

  /// Grows a real region but misreports the previous break on the
  /// `skew_on`-th call, as if someone else had moved it in between.
  struct Skewed {
    inner: FixedRegion,
    grows: usize,
    skew_on: usize,
  }

  impl Skewed {
    const SKEW: usize = 64;

    fn new(skew_on: usize) -> Self {
      Self {
        inner: FixedRegion::new(1 << 16),
        grows: 0,
        skew_on,
      }
    }
  }

  unsafe impl RegionProvider for Skewed {
    fn bounds(&self) -> (*mut u8, *mut u8) {
      self.inner.bounds()
    }

    fn grow(
      &mut self,
      increment: usize,
    ) -> Result<*mut u8, RegionError> {
      let previous = self.inner.grow(increment)?;
      self.grows += 1;
      if self.grows == self.skew_on {
        Ok(previous.wrapping_add(Self::SKEW))
      } else {
        Ok(previous)
      }
    }

    fn page_size(&self) -> usize {
      self.inner.page_size()
    }
  }

  fn heap(policy: AllocationPolicy) -> Heap<FixedRegion> {
    Heap::try_init(FixedRegion::new(1 << 16), HeapConfig::new(policy)).unwrap()
  }

  #[test]
  fn test_init_layout() {
    let heap = heap(AllocationPolicy::FirstFit);
    let (region_start, region_brk) = heap.region_bounds();

    assert_eq!(heap.heap_start() as usize % BLOCK_ALIGN, 0);
    assert_eq!(heap.heap_end() as usize % BLOCK_ALIGN, 0);
    assert!(heap.heap_start() as usize - TAG_SIZE >= region_start as usize);
    assert!(heap.heap_end() as usize + TAG_SIZE <= region_brk as usize);
    assert_eq!(region_brk as usize - region_start as usize, 4096);

    let blocks: Vec<BlockInfo> = heap.blocks().collect();
    assert_eq!(blocks.len(), 1);
    assert_eq!(blocks[0].status, Status::Free);
    assert_eq!(blocks[0].size, heap.heap_end() as usize - heap.heap_start() as usize);

    unsafe {
      assert_eq!(Tag::read(heap.heap_start().sub(TAG_SIZE)), Tag::SENTINEL);
      assert_eq!(Tag::read(heap.heap_end()), Tag::SENTINEL);
    }
    assert_eq!(heap.cursor(), None);
  }

  #[test]
  fn test_next_fit_cursor_starts_at_heap_start() {
    let heap = heap(AllocationPolicy::NextFit);
    assert_eq!(heap.cursor(), Some(heap.heap_start()));
    assert_eq!(heap.policy(), AllocationPolicy::NextFit);
  }

  #[test]
  fn test_init_on_data_segment() {
    let segment = DataSegment::new(1 << 20).unwrap();
    let heap = Heap::try_init(segment, HeapConfig::default()).unwrap();

    // a page aligned mapping loses one block at each end
    assert_eq!(heap.blocks().next().unwrap().size, 4096 - 2 * BLOCK_ALIGN);
    assert_eq!(heap.provider().used(), 4096);
  }

  #[test]
  fn test_init_rejects_dirty_region() {
    let mut region = FixedRegion::new(1 << 16);
    region.grow(64).unwrap();

    assert!(matches!(
      Heap::try_init(region, HeapConfig::default()),
      Err(HeapError::NotPristine { .. })
    ));
  }

  #[test]
  fn test_init_twice_on_same_region_is_rejected() {
    let mut region = FixedRegion::new(1 << 16);
    let (start, _) = region.bounds();
    region.grow(4096).unwrap();
    let (_, brk) = region.bounds();

    let err = Heap::try_init(region, HeapConfig::default()).err().unwrap();
    match err {
      HeapError::NotPristine { start: s, brk: b } => {
        assert_eq!(s, start as usize);
        assert_eq!(b, brk as usize);
      }
      other => panic!("unexpected error {other}"),
    }
  }

  #[test]
  fn test_init_rejects_missing_region() {
    let provider = Scripted {
      start: std::ptr::null_mut(),
      brk: std::ptr::null_mut(),
      page_size: 4096,
    };
    assert!(matches!(
      Heap::try_init(provider, HeapConfig::default()),
      Err(HeapError::NotProvided)
    ));
  }

  #[test]
  fn test_init_rejects_zero_page_size() {
    let region = FixedRegion::new(1 << 16).with_page_size(0);
    assert!(matches!(
      Heap::try_init(region, HeapConfig::default()),
      Err(HeapError::ZeroPageSize)
    ));
  }

  #[test]
  fn test_init_fails_when_provider_refuses() {
    let mut backing = [0u8; 64];
    let start = backing.as_mut_ptr();
    let provider = Scripted {
      start,
      brk: start,
      page_size: 4096,
    };
    assert!(matches!(
      Heap::try_init(provider, HeapConfig::default()),
      Err(HeapError::Region(RegionError::Exhausted { .. }))
    ));

    let small = FixedRegion::new(1024);
    assert!(matches!(
      Heap::try_init(small, HeapConfig::default()),
      Err(HeapError::Region(RegionError::Exhausted { requested: 4096, available: 1024 }))
    ));
  }

  #[test]
  fn test_init_rejects_bad_chunk_size() {
    let config = HeapConfig::default().with_chunk_size(100);
    assert!(matches!(
      Heap::try_init(FixedRegion::new(1 << 16), config),
      Err(HeapError::InvalidConfig(_))
    ));
  }

  #[test]
  #[should_panic(expected = "heap not clean")]
  fn test_init_is_fatal() {
    let mut region = FixedRegion::new(1 << 16);
    region.grow(32).unwrap();
    Heap::init(region, HeapConfig::default());
  }

  #[test]
  fn test_extend_merges_with_trailing_free_block() {
    let mut heap = heap(AllocationPolicy::FirstFit);
    let before = heap.blocks().next().unwrap().size;

    let merged = unsafe { heap.extend(1).unwrap() };
    assert_eq!(merged.header(), heap.heap_start());

    let blocks: Vec<BlockInfo> = heap.blocks().collect();
    assert_eq!(blocks.len(), 1);
    assert_eq!(blocks[0].size, before + 4096);
    assert_eq!(heap.stats().extensions, 1);
    unsafe {
      assert_eq!(Tag::read(heap.heap_end()), Tag::SENTINEL);
    }
  }

  #[test]
  fn test_extend_rounds_to_whole_chunks() {
    let mut heap = heap(AllocationPolicy::FirstFit);
    let end = heap.heap_end();

    unsafe { heap.extend(4097).unwrap() };
    assert_eq!(heap.heap_end() as usize - end as usize, 8192);

    let (start, brk) = heap.region_bounds();
    assert_eq!(brk as usize - start as usize, 4096 + 8192);
  }

  #[test]
  fn test_extend_failure_is_reported() {
    let region = FixedRegion::new(4096 + 1024);
    let mut heap = Heap::try_init(region, HeapConfig::default()).unwrap();

    assert!(matches!(
      unsafe { heap.extend(32) },
      Err(HeapError::Region(RegionError::Exhausted { .. }))
    ));
    assert_eq!(heap.stats().extensions, 0);
  }

  #[test]
  fn test_init_rejects_moved_break() {
    let provider = Skewed::new(1);
    let (_, brk) = provider.bounds();

    match Heap::try_init(provider, HeapConfig::default()) {
      Err(HeapError::Discontiguous { expected, found }) => {
        assert_eq!(expected, brk as usize);
        assert_eq!(found, brk as usize + Skewed::SKEW);
      }
      Err(other) => panic!("unexpected error {other}"),
      Ok(_) => panic!("init accepted a discontiguous region"),
    }
  }

  #[test]
  fn test_extend_rejects_moved_break() {
    let mut heap = Heap::try_init(Skewed::new(2), HeapConfig::default()).unwrap();
    let bounds = heap.region_bounds();
    let end = heap.heap_end();
    let blocks: Vec<BlockInfo> = heap.blocks().collect();

    match heap.try_allocate(8000) {
      Err(HeapError::Discontiguous { expected, found }) => {
        assert_eq!(expected, bounds.1 as usize);
        assert_eq!(found, bounds.1 as usize + Skewed::SKEW);
      }
      other => panic!("unexpected result {other:?}"),
    }

    assert_eq!(heap.region_bounds(), bounds);
    assert_eq!(heap.heap_end(), end);
    assert_eq!(heap.blocks().collect::<Vec<_>>(), blocks);
    assert_eq!(heap.stats().extensions, 0);
    assert_eq!(heap.stats().allocations, 0);
    unsafe {
      assert_eq!(Tag::read(heap.heap_end()), Tag::SENTINEL);
    }
  }

  #[test]
  #[should_panic(expected = "PANIC in tagheap")]
  fn test_discontiguous_extension_is_fatal() {
    let mut heap = Heap::try_init(Skewed::new(2), HeapConfig::default()).unwrap();
    heap.allocate(8000);
  }

  #[test]
  fn test_caught_fatal_error_leaves_heap_coherent() {
    let mut heap = Heap::try_init(FixedRegion::new(8192), HeapConfig::default()).unwrap();
    let kept = heap.allocate(64);

    let caught = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| heap.allocate(1 << 16)));
    let payload = caught.expect_err("growing past the region must be fatal");
    let message = payload
      .downcast_ref::<String>()
      .map(String::as_str)
      .unwrap_or_default();
    assert!(message.starts_with("PANIC in tagheap"), "{message}");

    let report = heap.report();
    assert!(report.is_coherent(), "{report}");
    assert_eq!(heap.stats().allocations, 1);
    assert_eq!(heap.stats().extensions, 0);
    unsafe { heap.release(kept.as_ptr()) };
    assert_eq!(heap.blocks().count(), 1);
  }

  #[test]
  fn test_diagnostic_level_can_change() {
    let mut heap = Heap::try_init(
      FixedRegion::new(1 << 16),
      HeapConfig::default().with_diagnostic_level(DiagnosticLevel::Verbose),
    )
    .unwrap();
    assert_eq!(heap.diagnostic_level(), DiagnosticLevel::Verbose);

    heap.set_diagnostic_level(DiagnosticLevel::Off);
    assert_eq!(heap.diagnostic_level(), DiagnosticLevel::Off);
  }
}
