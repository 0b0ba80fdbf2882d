//! Cross-thread single-assignment slot.
//!
//! The async side fills the slot once; a blocked worker thread waits on it
//! with a deadline. The first `fill` wins and every later one is dropped,
//! so racing producers (answer, timeout, cancel) cannot overwrite each other.

use std::fmt;
use std::sync::{Condvar, Mutex, PoisonError};
use std::time::Duration;

enum Slot<T> {
    Empty,
    Filled(T),
    Taken,
}

/// Single-assignment slot shared between threads
pub struct Handoff<T> {
    slot: Mutex<Slot<T>>,
    ready: Condvar,
}

impl<T> Default for Handoff<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Handoff<T> {
    /// Create an empty slot
    #[must_use]
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(Slot::Empty),
            ready: Condvar::new(),
        }
    }

    /// Store a value and wake every waiter. Returns `false` if the slot was
    /// already filled, in which case `value` is dropped.
    pub fn fill(&self, value: T) -> bool {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        if !matches!(*slot, Slot::Empty) {
            return false;
        }
        *slot = Slot::Filled(value);
        drop(slot);
        self.ready.notify_all();
        true
    }

    /// Whether a value has been stored
    #[must_use]
    pub fn is_filled(&self) -> bool {
        let slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        !matches!(*slot, Slot::Empty)
    }

    fn wait_filled(&self, timeout: Duration) -> std::sync::MutexGuard<'_, Slot<T>> {
        let slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        let (slot, _) = self
            .ready
            .wait_timeout_while(slot, timeout, |s| matches!(s, Slot::Empty))
            .unwrap_or_else(PoisonError::into_inner);
        slot
    }

    /// Block until filled or `timeout` elapses, moving the value out.
    ///
    /// Only one caller can take the value; others get `None`.
    pub fn take_timeout(&self, timeout: Duration) -> Option<T> {
        let mut slot = self.wait_filled(timeout);
        match std::mem::replace(&mut *slot, Slot::Taken) {
            Slot::Filled(value) => Some(value),
            Slot::Empty => {
                *slot = Slot::Empty;
                None
            }
            Slot::Taken => None,
        }
    }
}

impl<T: Clone> Handoff<T> {
    /// Block until filled or `timeout` elapses, cloning the value.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<T> {
        match &*self.wait_filled(timeout) {
            Slot::Filled(value) => Some(value.clone()),
            _ => None,
        }
    }
}

impl<T> fmt::Debug for Handoff<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handoff")
            .field("filled", &self.is_filled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Instant;

    #[test]
    fn test_first_fill_wins() {
        let slot = Handoff::new();
        assert!(slot.fill("answer"));
        assert!(!slot.fill("timeout"));
        assert_eq!(slot.take_timeout(Duration::ZERO), Some("answer"));
        assert_eq!(slot.take_timeout(Duration::ZERO), None);
    }

    #[test]
    fn test_wait_times_out_when_empty() {
        let slot: Handoff<u8> = Handoff::new();
        let start = Instant::now();
        assert_eq!(slot.take_timeout(Duration::from_millis(50)), None);
        assert!(start.elapsed() >= Duration::from_millis(50));
        assert!(slot.fill(1));
    }

    #[test]
    fn test_cross_thread_fill_wakes_waiter() {
        let slot = Arc::new(Handoff::new());
        let producer = {
            let slot = Arc::clone(&slot);
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(20));
                slot.fill(42)
            })
        };
        assert_eq!(slot.take_timeout(Duration::from_secs(5)), Some(42));
        assert!(producer.join().unwrap());
    }

    #[test]
    fn test_racing_producers_fill_once() {
        let slot = Arc::new(Handoff::new());
        let winners: usize = (0..16)
            .map(|i| {
                let slot = Arc::clone(&slot);
                std::thread::spawn(move || slot.fill(i))
            })
            .collect::<Vec<_>>()
            .into_iter()
            .map(|h| usize::from(h.join().unwrap()))
            .sum();
        assert_eq!(winners, 1);
        assert!(slot.wait_timeout(Duration::ZERO).is_some());
        assert!(slot.wait_timeout(Duration::ZERO).is_some());
    }
}
