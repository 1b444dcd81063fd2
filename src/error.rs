use std::io;

use thiserror::Error;

/// Failures reported by a [`RegionProvider`](crate::RegionProvider).
#[derive(Debug, Error)]
pub enum RegionError {
  #[error("region exhausted: requested {requested} bytes, {available} available")]
  Exhausted { requested: usize, available: usize },
  #[error("mapping the backing region failed: {0}")]
  Map(#[source] io::Error),
}

/// Reasons a heap operation cannot complete.
///
/// Every variant is fatal for the contract entry points; the `try_*`
/// variants hand them back instead.
#[derive(Debug, Error)]
pub enum HeapError {
  #[error("data segment not initialized")]
  NotProvided,
  #[error("heap not clean: region start {start:#x} != break {brk:#x}")]
  NotPristine { start: usize, brk: usize },
  #[error("reported page size == 0")]
  ZeroPageSize,
  #[error("invalid configuration: {0}")]
  InvalidConfig(&'static str),
  #[error("region provider refused to grow: {0}")]
  Region(#[from] RegionError),
  #[error("region grew discontiguously: expected break {expected:#x}, provider returned {found:#x}")]
  Discontiguous { expected: usize, found: usize },
  #[error("arithmetic overflow in zeroed allocation of {count} x {size} bytes")]
  CallocOverflow { count: usize, size: usize },
  #[error("request of {0} bytes exceeds the addressable block size")]
  RequestTooLarge(usize),
}

/// Errors parsing a [`HeapConfig`](crate::HeapConfig) from text.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
  #[error("unknown allocation policy `{0}` (expected first, next or best)")]
  UnknownPolicy(String),
  #[error("unknown diagnostic level `{0}` (expected off, info or verbose)")]
  UnknownLevel(String),
  #[error("invalid chunk size `{0}`")]
  ChunkSize(String),
}
