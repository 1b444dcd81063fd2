//! Read-only heap walker used for diagnostics and as a test oracle.

use std::{fmt, ptr::NonNull};

use crate::{
  block::Block,
  heap::Heap,
  policy::AllocationPolicy,
  region::RegionProvider,
  tag::{Status, TAG_SIZE, Tag, Word},
};

/// One block (or sentinel) as seen by the checker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
  pub address: usize,
  pub size: usize,
  pub status: Status,
}

impl BlockInfo {
  pub(crate) unsafe fn of(block: Block) -> Self {
    let tag = unsafe { block.tag() };
    Self::from_tag(block.addr(), tag)
  }

  fn from_tag(
    address: usize,
    tag: Tag,
  ) -> Self {
    Self {
      address,
      size: tag.size(),
      status: tag.status(),
    }
  }

  /// Payload address of an allocated block.
  pub fn payload(&self) -> usize {
    self.address + TAG_SIZE
  }
}

/// A footer that disagrees with its header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TagMismatch {
  pub header: usize,
  pub footer: usize,
  pub footer_size: usize,
  pub footer_status: Word,
}

/// Structural snapshot of a heap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeapReport {
  pub region_start: usize,
  pub region_brk: usize,
  pub heap_start: usize,
  pub heap_end: usize,
  pub policy: AllocationPolicy,
  pub cursor: Option<usize>,
  pub initial_sentinel: BlockInfo,
  pub end_sentinel: BlockInfo,
  pub blocks: Vec<BlockInfo>,
  pub mismatches: Vec<TagMismatch>,
  /// Pairs of physically adjacent free blocks.
  pub adjacent_free: usize,
  /// Traversal hit a zero size or a size running past `heap_end`.
  pub truncated: bool,
  /// Traversal landed exactly on `heap_end`.
  pub reached_end: bool,
}

impl HeapReport {
  pub fn is_coherent(&self) -> bool {
    self.error_count() == 0
  }

  /// Number of structural problems found.
  pub fn error_count(&self) -> usize {
    self.mismatches.len() + self.adjacent_free + usize::from(self.truncated || !self.reached_end)
  }

  pub fn free_blocks(&self) -> impl Iterator<Item = &BlockInfo> {
    self.blocks.iter().filter(|b| b.status == Status::Free)
  }

  pub fn free_bytes(&self) -> usize {
    self.free_blocks().map(|b| b.size).sum()
  }
}

fn sentinel_line(
  f: &mut fmt::Formatter<'_>,
  label: &str,
  b: &BlockInfo,
) -> fmt::Result {
  writeln!(
    f,
    "  {label:<24}{:#x}: size: {:6x} ({:7}), status: {}",
    b.address, b.size, b.size, b.status
  )
}

impl fmt::Display for HeapReport {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    writeln!(f)?;
    writeln!(f, "{:-^97}", " heap check ")?;
    writeln!(f, "  region_start:           {:#x}", self.region_start)?;
    writeln!(f, "  region_brk:             {:#x}", self.region_brk)?;
    writeln!(f, "  heap_start:             {:#x}", self.heap_start)?;
    writeln!(f, "  heap_end:               {:#x}", self.heap_end)?;
    writeln!(f, "  allocation policy:      {}", self.policy)?;
    match self.cursor {
      Some(cursor) => writeln!(f, "  next_block:             {cursor:#x}")?,
      None => writeln!(f, "  next_block:             -")?,
    }
    writeln!(f)?;

    sentinel_line(f, "initial sentinel:", &self.initial_sentinel)?;
    sentinel_line(f, "end sentinel:", &self.end_sentinel)?;
    writeln!(f)?;
    writeln!(f, "  blocks:")?;

    for block in &self.blocks {
      writeln!(
        f,
        "    {:#x}: size: {:6x} ({:7}), status: {}",
        block.address, block.size, block.size, block.status
      )?;
      for m in self.mismatches.iter().filter(|m| m.header == block.address) {
        writeln!(
          f,
          "    --> ERROR: footer at {:#x} with different properties: size: {:x}, status: {:x}",
          m.footer, m.footer_size, m.footer_status
        )?;
      }
    }
    if self.truncated {
      writeln!(f, "    WARNING: invalid block size detected, aborting traversal.")?;
    }
    if self.adjacent_free > 0 {
      writeln!(f, "    WARNING: {} pair(s) of adjacent free blocks.", self.adjacent_free)?;
    }

    writeln!(f)?;
    if self.is_coherent() {
      writeln!(f, "  Block structure coherent.")?;
    }
    write!(f, "{:-<97}", "")
  }
}

impl<P: RegionProvider> Heap<P> {
  /// Walks the heap and collects a [`HeapReport`] without printing it.
  pub fn report(&self) -> HeapReport {
    let start = self.span.start;
    let end = self.span.end;

    unsafe {
      let initial = start.sub(TAG_SIZE);
      let mut report = HeapReport {
        region_start: self.region_start as usize,
        region_brk: self.region_brk as usize,
        heap_start: start as usize,
        heap_end: end as usize,
        policy: self.policy(),
        cursor: self.cursor().map(|c| c as usize),
        initial_sentinel: BlockInfo::from_tag(initial as usize, Tag::read(initial)),
        end_sentinel: BlockInfo::from_tag(end as usize, Tag::read(end)),
        blocks: Vec::new(),
        mismatches: Vec::new(),
        adjacent_free: 0,
        truncated: false,
        reached_end: false,
      };

      let mut p = start;
      let mut prev_free = false;
      while p < end {
        let block = Block::at(NonNull::new_unchecked(p));
        let header = block.tag();
        let size = header.size();
        report.blocks.push(BlockInfo::from_tag(p as usize, header));

        if size == 0 || size > end as usize - p as usize {
          report.truncated = true;
          break;
        }

        let footer = block.footer_tag();
        if footer != header {
          report.mismatches.push(TagMismatch {
            header: p as usize,
            footer: block.footer() as usize,
            footer_size: footer.size(),
            footer_status: footer.status_bits(),
          });
        }

        if prev_free && header.is_free() {
          report.adjacent_free += 1;
        }
        prev_free = header.is_free();
        p = p.add(size);
      }
      report.reached_end = p == end;

      report
    }
  }

  /// Prints the structural report to stdout and returns it.
  pub fn check_consistency(&self) -> HeapReport {
    let report = self.report();
    println!("{report}");
    report
  }
}
