use std::io::Read;

use clap::Parser;
use tagheap::{AllocationPolicy, DataSegment, DiagnosticLevel, Heap, HeapConfig};

/// Walks a scripted sequence of heap operations, printing the heap's
/// block structure after each step.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
  /// Placement policy: first, next or best.
  #[arg(short, long, default_value = "first")]
  policy: AllocationPolicy,

  /// Diagnostic level: off, info or verbose (set RUST_LOG to see it).
  #[arg(short, long, default_value = "off")]
  log: DiagnosticLevel,

  /// Wait for ENTER between steps.
  #[arg(long)]
  pause: bool,
}

/// Waits until the user presses ENTER.
/// Useful when you want to inspect the process with tools like `pmap` or
/// `gdb` while the heap is in a known state.
fn block_until_enter_pressed(pause: bool) {
  if pause {
    println!("\n>>> Press ENTER to continue...");
    let _ = std::io::stdin().bytes().next();
  }
}

fn print_region(
  heap: &Heap<DataSegment>,
  label: &str,
) {
  let (start, brk) = heap.region_bounds();
  println!(
    "[{}] PID = {}, region = {:p}..{:p} ({} bytes), extensions = {}",
    label,
    std::process::id(),
    start,
    brk,
    brk as usize - start as usize,
    heap.stats().extensions,
  );
}

fn main() {
  env_logger::init();
  let args = Args::parse();

  let segment = DataSegment::new(DataSegment::DEFAULT_CAPACITY).unwrap_or_else(|err| {
    eprintln!("cannot reserve the data segment: {err}");
    std::process::exit(1);
  });
  let config = HeapConfig::new(args.policy).with_diagnostic_level(args.log);
  let mut heap = Heap::init(segment, config);

  print_region(&heap, "start");
  heap.check_consistency();
  block_until_enter_pressed(args.pause);

  // 1) Two small allocations; both round up to the minimum block.
  let first = heap.allocate(16);
  let second = heap.allocate(16);
  println!("\n[1] allocate(16) twice -> {:p}, {:p}", first, second);
  heap.check_consistency();
  block_until_enter_pressed(args.pause);

  // 2) A larger block with a recognizable pattern.
  let third = heap.allocate(200);
  unsafe { third.as_ptr().write_bytes(0xAB, 200) };
  println!("\n[2] allocate(200) -> {:p}, filled with 0xAB", third);
  heap.check_consistency();
  block_until_enter_pressed(args.pause);

  // 3) Release the first block: it stays apart from the free tail because
  //    the second block separates them.
  unsafe { heap.release(first.as_ptr()) };
  println!("\n[3] release({:p})", first);
  heap.check_consistency();
  block_until_enter_pressed(args.pause);

  // 4) Release the second block: it merges with the first one.
  unsafe { heap.release(second.as_ptr()) };
  println!("\n[4] release({:p}) coalesces with its free neighbour", second);
  heap.check_consistency();
  block_until_enter_pressed(args.pause);

  // 5) Shrink the 200 byte block in place, then grow it back into the
  //    space it just gave up.
  let shrunk = unsafe { heap.resize(third.as_ptr(), 40) };
  println!("\n[5] resize({:p}, 40) -> {:?}", third, shrunk);
  heap.check_consistency();
  let shrunk = shrunk.and_then(|p| unsafe { heap.resize(p.as_ptr(), 120) });
  println!("    resize(.., 120) -> {:?}, in place: {}", shrunk, shrunk == Some(third));
  heap.check_consistency();
  block_until_enter_pressed(args.pause);

  // 6) A zeroed array reuses the hole at the front when it fits.
  let zeroed = heap.allocate_zeroed(4, 8);
  println!("\n[6] allocate_zeroed(4, 8) -> {:?}", zeroed);
  heap.check_consistency();
  block_until_enter_pressed(args.pause);

  // 7) A large request forces the region to grow.
  print_region(&heap, "before large allocate");
  let big = heap.allocate(64 * 1024);
  println!("\n[7] allocate(64 KiB) -> {:p}", big);
  print_region(&heap, "after large allocate");
  heap.check_consistency();
  block_until_enter_pressed(args.pause);

  // 8) Release everything; the heap folds back into a single free block.
  unsafe {
    if let Some(p) = shrunk {
      heap.release(p.as_ptr());
    }
    if let Some(p) = zeroed {
      heap.release(p.as_ptr());
    }
    heap.release(big.as_ptr());
  }
  println!("\n[8] released everything");
  let report = heap.check_consistency();
  println!("{:?}", heap.stats());

  if !report.is_coherent() {
    std::process::exit(2);
  }
}
