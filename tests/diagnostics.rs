//! Diagnostic level gating through the `log` facade.
//!
//! Runs in its own test binary so it can install a capturing logger without
//! racing the `env_logger` instances set up by `test_log` elsewhere.

use std::{cell::RefCell, sync::Once};

use log::{Level, LevelFilter, Log, Metadata, Record};
use tagheap::{AllocationPolicy, DiagnosticLevel, FixedRegion, Heap, HeapConfig};

thread_local! {
  static RECORDS: RefCell<Vec<(Level, String)>> = const { RefCell::new(Vec::new()) };
}

/// Keeps records per thread; each test runs on its own thread.
struct Capture;

impl Log for Capture {
  fn enabled(
    &self,
    _metadata: &Metadata<'_>,
  ) -> bool {
    true
  }

  fn log(
    &self,
    record: &Record<'_>,
  ) {
    RECORDS.with(|r| r.borrow_mut().push((record.level(), record.args().to_string())));
  }

  fn flush(&self) {}
}

static CAPTURE: Capture = Capture;
static INSTALL: Once = Once::new();

fn capture() {
  INSTALL.call_once(|| {
    log::set_logger(&CAPTURE).expect("no other logger in this binary");
    log::set_max_level(LevelFilter::Trace);
  });
  RECORDS.with(|r| r.borrow_mut().clear());
}

fn take() -> Vec<(Level, String)> {
  RECORDS.with(|r| r.borrow_mut().drain(..).collect())
}

/// Allocates, splits, releases and coalesces: touches every trace site
/// that does not need the heap to grow.
fn exercise(heap: &mut Heap<FixedRegion>) {
  let first = heap.allocate(16);
  let second = heap.allocate(100);
  unsafe {
    heap.release(first.as_ptr());
    heap.release(second.as_ptr());
  }
}

fn heap(level: DiagnosticLevel) -> Heap<FixedRegion> {
  let config = HeapConfig::new(AllocationPolicy::FirstFit).with_diagnostic_level(level);
  Heap::init(FixedRegion::new(1 << 16), config)
}

#[test]
fn off_emits_nothing() {
  capture();
  let mut heap = heap(DiagnosticLevel::Off);
  exercise(&mut heap);
  assert_eq!(take(), vec![]);
}

#[test]
fn info_reports_operations_only() {
  capture();
  let mut heap = heap(DiagnosticLevel::Info);
  exercise(&mut heap);

  let records = take();
  assert!(records.iter().all(|(level, _)| *level == Level::Info), "{records:?}");
  let messages: Vec<&str> = records.iter().map(|(_, m)| m.as_str()).collect();
  assert_eq!(messages[0], "init(first fit)");
  assert_eq!(messages[1], "allocate(0x10)");
  assert_eq!(messages[2], "allocate(0x64)");
  assert!(messages[3].starts_with("release("));
  assert!(messages[4].starts_with("release("));
  assert_eq!(messages.len(), 5);
}

#[test]
fn verbose_adds_details() {
  capture();
  let mut heap = heap(DiagnosticLevel::Verbose);
  exercise(&mut heap);

  let records = take();
  let info = records.iter().filter(|(level, _)| *level == Level::Info).count();
  let debug: Vec<&str> = records
    .iter()
    .filter(|(level, _)| *level == Level::Debug)
    .map(|(_, m)| m.as_str())
    .collect();

  assert_eq!(info, 5);
  assert!(debug.iter().any(|m| m.contains("heap_start")), "{debug:?}");
  assert!(debug.iter().any(|m| m.contains("split")), "{debug:?}");
  assert!(debug.iter().any(|m| m.contains("coalesce")), "{debug:?}");
}

#[test]
fn level_can_be_changed_on_a_live_heap() {
  capture();
  let mut heap = heap(DiagnosticLevel::Off);
  heap.allocate(16);
  assert_eq!(take(), vec![]);

  heap.set_diagnostic_level(DiagnosticLevel::Info);
  heap.allocate(16);
  assert_eq!(take(), vec![(Level::Info, "allocate(0x10)".to_string())]);

  heap.set_diagnostic_level(DiagnosticLevel::Off);
  heap.allocate(16);
  assert_eq!(take(), vec![]);
}
