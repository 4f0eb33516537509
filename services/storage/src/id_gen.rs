//! Monotonic sort key generation.
//!
//! Keys are ULIDs: 48 bits of millisecond time followed by 80 random bits,
//! rendered as 26 Crockford base32 characters so string order equals
//! generation order. Calls inside the same millisecond increment the previous
//! value instead of drawing new randomness.

use parking_lot::Mutex;
use ulid::Ulid;

/// Thread-safe generator of strictly increasing ULIDs
#[derive(Debug)]
pub struct MonotonicIdGenerator {
    last: Mutex<Ulid>,
}

impl MonotonicIdGenerator {
    pub fn new() -> Self {
        Self {
            last: Mutex::new(Ulid::nil()),
        }
    }

    /// Next id, strictly greater than every id this generator returned before
    pub fn next(&self) -> Ulid {
        let mut last = self.last.lock();
        let fresh = Ulid::new();

        let next = if fresh > *last {
            fresh
        } else {
            // Same tick (or clock stepped back): bump the previous value.
            last.increment()
                .unwrap_or_else(|| Ulid::from_parts(last.timestamp_ms() + 1, 0))
        };

        *last = next;
        next
    }

    /// Next id as its sortable string form
    pub fn next_string(&self) -> String {
        self.next().to_string()
    }

    #[cfg(test)]
    fn starting_after(last: Ulid) -> Self {
        Self {
            last: Mutex::new(last),
        }
    }
}

impl Default for MonotonicIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_ids_strictly_increase() {
        let generator = MonotonicIdGenerator::new();
        let ids: Vec<String> = (0..10_000).map(|_| generator.next_string()).collect();

        for pair in ids.windows(2) {
            assert!(pair[0] < pair[1], "{} !< {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn test_clock_behind_last_id() {
        // Last id sits far in the future: new ids must still sort after it
        let future = Ulid::from_parts(u64::from(u32::MAX) * 1000, 7);
        let generator = MonotonicIdGenerator::starting_after(future);

        let next = generator.next();
        assert!(next > future);
        assert_eq!(next.timestamp_ms(), future.timestamp_ms());
    }

    #[test]
    fn test_random_overflow_rolls_to_next_millisecond() {
        let saturated = Ulid::from_parts(u64::from(u32::MAX) * 1000, u128::MAX);
        let generator = MonotonicIdGenerator::starting_after(saturated);

        let next = generator.next();
        assert!(next > saturated);
        assert_eq!(next.timestamp_ms(), saturated.timestamp_ms() + 1);
    }

    #[test]
    fn test_concurrent_generation_is_unique() {
        let generator = Arc::new(MonotonicIdGenerator::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let generator = generator.clone();
                std::thread::spawn(move || {
                    (0..1000).map(|_| generator.next()).collect::<Vec<_>>()
                })
            })
            .collect();

        let mut all: Vec<Ulid> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        let total = all.len();
        all.sort();
        all.dedup();
        assert_eq!(all.len(), total);
    }
}
