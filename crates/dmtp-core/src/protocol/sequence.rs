//! Event sequence numbering.
//!
//! # How event sequences are used
//!
//! Every event packet whose template contains a `Sequence` field carries a
//! small counter value.  The server acknowledges delivered events by echoing
//! the sequence of the last one it accepted, and the client deletes every
//! sent event up to and including that value.
//!
//! The field on the wire is only 1 to 4 bytes wide, so the value written is
//! the counter masked to the field length.  The counter itself keeps
//! counting; only the packet sees the truncated form.
//!
//! # Thread safety
//!
//! Events can be produced on a GPS thread while the session worker reads the
//! current value for diagnostics, so the counter is an `AtomicU32`.

use std::sync::atomic::{AtomicU32, Ordering};

/// A shared, monotonically increasing event sequence counter.
///
/// # Examples
///
/// ```rust
/// use dmtp_core::protocol::SequenceCounter;
///
/// let counter = SequenceCounter::new();
/// assert_eq!(counter.next_masked(1), 0);
/// assert_eq!(counter.next_masked(1), 1);
/// ```
#[derive(Debug)]
pub struct SequenceCounter {
    inner: AtomicU32,
}

impl SequenceCounter {
    /// Creates a counter starting at 0.
    pub fn new() -> Self {
        Self::starting_at(0)
    }

    /// Creates a counter that resumes from a persisted value.
    pub fn starting_at(value: u32) -> Self {
        Self {
            inner: AtomicU32::new(value),
        }
    }

    /// Returns the next raw value and advances.  Wraps at `u32::MAX`.
    pub fn next(&self) -> u32 {
        // Relaxed: the value orders nothing but itself.
        self.inner.fetch_add(1, Ordering::Relaxed)
    }

    /// Returns the next value truncated to a `len`-byte field.
    ///
    /// `len` outside `1..=4` is treated as 4.
    pub fn next_masked(&self, len: usize) -> u32 {
        mask_to_len(self.next(), len)
    }

    /// The value the next call to [`next`](Self::next) will return.
    pub fn current(&self) -> u32 {
        self.inner.load(Ordering::Relaxed)
    }
}

impl Default for SequenceCounter {
    fn default() -> Self {
        Self::new()
    }
}

/// Truncates `value` to the low `len` bytes.
pub fn mask_to_len(value: u32, len: usize) -> u32 {
    match len {
        1..=3 => value & ((1u32 << (8 * len)) - 1),
        _ => value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_counter_starts_at_zero() {
        let counter = SequenceCounter::new();
        assert_eq!(counter.next(), 0);
        assert_eq!(counter.current(), 1);
    }

    #[test]
    fn test_masked_value_wraps_at_field_width() {
        // Arrange – one step before a 1-byte field wraps
        let counter = SequenceCounter::starting_at(0xFF);

        // Act
        let before = counter.next_masked(1);
        let after = counter.next_masked(1);

        // Assert
        assert_eq!(before, 0xFF);
        assert_eq!(after, 0x00);
        assert_eq!(counter.current(), 0x101, "raw counter keeps counting");
    }

    #[test]
    fn test_mask_to_len() {
        assert_eq!(mask_to_len(0x1234_5678, 1), 0x78);
        assert_eq!(mask_to_len(0x1234_5678, 2), 0x5678);
        assert_eq!(mask_to_len(0x1234_5678, 3), 0x34_5678);
        assert_eq!(mask_to_len(0x1234_5678, 4), 0x1234_5678);
        assert_eq!(mask_to_len(0x1234_5678, 0), 0x1234_5678);
    }

    #[test]
    fn test_counter_wraps_at_u32_max() {
        let counter = SequenceCounter::starting_at(u32::MAX);
        assert_eq!(counter.next(), u32::MAX);
        assert_eq!(counter.next(), 0);
    }

    #[test]
    fn test_counter_is_unique_across_threads() {
        // Arrange
        let counter = Arc::new(SequenceCounter::new());

        // Act
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let c = Arc::clone(&counter);
                thread::spawn(move || (0..500).map(|_| c.next()).collect::<Vec<_>>())
            })
            .collect();
        let mut all: Vec<u32> = handles
            .into_iter()
            .flat_map(|h| h.join().expect("thread panicked"))
            .collect();

        // Assert
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), 2000);
    }
}
