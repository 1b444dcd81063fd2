use std::{env, fmt, str::FromStr};

use crate::{error::ConfigError, policy::AllocationPolicy, tag::BLOCK_ALIGN};

/// How chatty the heap is through the `log` facade.
///
/// `Info` reports every public operation, `Verbose` adds placement,
/// splitting, coalescing and extension details.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum DiagnosticLevel {
  #[default]
  Off,
  Info,
  Verbose,
}

impl DiagnosticLevel {
  pub(crate) fn log_level(self) -> Option<log::Level> {
    match self {
      DiagnosticLevel::Off => None,
      DiagnosticLevel::Info => Some(log::Level::Info),
      DiagnosticLevel::Verbose => Some(log::Level::Debug),
    }
  }
}

impl From<u8> for DiagnosticLevel {
  fn from(level: u8) -> Self {
    match level {
      0 => DiagnosticLevel::Off,
      1 => DiagnosticLevel::Info,
      _ => DiagnosticLevel::Verbose,
    }
  }
}

impl fmt::Display for DiagnosticLevel {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    f.write_str(match self {
      DiagnosticLevel::Off => "off",
      DiagnosticLevel::Info => "info",
      DiagnosticLevel::Verbose => "verbose",
    })
  }
}

impl FromStr for DiagnosticLevel {
  type Err = ConfigError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.trim().to_ascii_lowercase().as_str() {
      "off" | "0" => Ok(DiagnosticLevel::Off),
      "info" | "1" => Ok(DiagnosticLevel::Info),
      "verbose" | "debug" | "2" => Ok(DiagnosticLevel::Verbose),
      _ => Err(ConfigError::UnknownLevel(s.to_string())),
    }
  }
}

/// Settings fixed when a heap is initialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapConfig {
  pub policy: AllocationPolicy,
  /// Initial region request and growth granularity, in bytes.
  pub chunk_size: usize,
  pub diagnostic_level: DiagnosticLevel,
}

impl HeapConfig {
  pub const DEFAULT_CHUNK_SIZE: usize = 1 << 12;
  pub const MIN_CHUNK_SIZE: usize = 4 * BLOCK_ALIGN;

  pub const ENV_POLICY: &'static str = "TAGHEAP_POLICY";
  pub const ENV_CHUNK_SIZE: &'static str = "TAGHEAP_CHUNK_SIZE";
  pub const ENV_LOG: &'static str = "TAGHEAP_LOG";

  pub fn new(policy: AllocationPolicy) -> Self {
    Self {
      policy,
      ..Self::default()
    }
  }

  pub fn with_policy(
    mut self,
    policy: AllocationPolicy,
  ) -> Self {
    self.policy = policy;
    self
  }

  pub fn with_chunk_size(
    mut self,
    chunk_size: usize,
  ) -> Self {
    self.chunk_size = chunk_size;
    self
  }

  pub fn with_diagnostic_level(
    mut self,
    level: DiagnosticLevel,
  ) -> Self {
    self.diagnostic_level = level;
    self
  }

  /// Defaults overridden by `TAGHEAP_POLICY`, `TAGHEAP_CHUNK_SIZE` and
  /// `TAGHEAP_LOG` when set.
  pub fn from_env() -> Result<Self, ConfigError> {
    Self::from_lookup(|key| env::var(key).ok())
  }

  pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
    let mut config = Self::default();

    if let Some(policy) = lookup(Self::ENV_POLICY) {
      config.policy = policy.parse()?;
    }
    if let Some(chunk) = lookup(Self::ENV_CHUNK_SIZE) {
      config.chunk_size = chunk
        .trim()
        .parse()
        .map_err(|_| ConfigError::ChunkSize(chunk.clone()))?;
    }
    if let Some(level) = lookup(Self::ENV_LOG) {
      config.diagnostic_level = level.parse()?;
    }

    Ok(config)
  }

  /// Checks the constraints the block layout relies on.
  pub fn validate(&self) -> Result<(), &'static str> {
    if self.chunk_size % BLOCK_ALIGN != 0 {
      return Err("chunk size must be a multiple of 32");
    }
    if self.chunk_size < Self::MIN_CHUNK_SIZE {
      return Err("chunk size must be at least 128 bytes");
    }
    Ok(())
  }
}

impl Default for HeapConfig {
  fn default() -> Self {
    Self {
      policy: AllocationPolicy::default(),
      chunk_size: Self::DEFAULT_CHUNK_SIZE,
      diagnostic_level: DiagnosticLevel::default(),
    }
  }
}
