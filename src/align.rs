/// Rounds `value` up to the next multiple of `to`, which must be a power of two.
///
/// Without a second argument the value is rounded to the machine word size.
///
/// # Examples
///
/// ```rust
/// use std::mem;
/// use tagheap::align;
///
/// assert_eq!(align!(13, 32), 32);
/// assert_eq!(align!(64, 32), 64);
///
/// match mem::size_of::<usize>() {
///     8 => assert_eq!(align!(13), 16), // 64 bit machine.
///     4 => assert_eq!(align!(11), 12), // 32 bit machine.
///     _ => {},
/// };
/// ```
#[macro_export]
macro_rules! align {
  ($value:expr) => {
    $crate::align!($value, ::core::mem::size_of::<usize>())
  };
  ($value:expr, $to:expr) => {
    ($value + $to - 1) & !($to - 1)
  };
}

/// Rounds `value` down to a multiple of `to`, which must be a power of two.
#[macro_export]
macro_rules! align_down {
  ($value:expr, $to:expr) => {
    $value & !($to - 1)
  };
}

/// Overflow-checked [`align!`]; `None` when rounding up would wrap.
pub const fn checked_align(
  value: usize,
  to: usize,
) -> Option<usize> {
  match value.checked_add(to - 1) {
    Some(v) => Some(v & !(to - 1)),
    None => None,
  }
}
