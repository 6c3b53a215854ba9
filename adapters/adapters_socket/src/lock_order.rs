//! Lock-pair ordering
//!
//! Operations that touch two handles at once (moves) must lock both. Each
//! [`OrderedMutex`] carries a process-unique, monotonically assigned id; a pair
//! is always acquired lower id first, and the second lock is only ever
//! try-locked. On contention the first lock is released and the whole
//! acquisition restarts after a short sleep, so two threads locking the same
//! pair in opposite argument order cannot deadlock.

use std::fmt;
use std::ptr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError, TryLockError};
use std::thread;
use std::time::Duration;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Sleep between acquisition attempts when the second lock is busy
pub const CONTENTION_BACKOFF: Duration = Duration::from_millis(1);

/// Mutex with an identity used for ordering
pub struct OrderedMutex<T> {
    id: u64,
    inner: Mutex<T>,
}

impl<T> OrderedMutex<T> {
    pub fn new(value: T) -> Self {
        Self {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            inner: Mutex::new(value),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Block until the lock is held; a poisoned lock is recovered
    pub fn lock(&self) -> MutexGuard<'_, T> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// `None` if another thread holds the lock
    pub fn try_lock(&self) -> Option<MutexGuard<'_, T>> {
        match self.inner.try_lock() {
            Ok(guard) => Some(guard),
            Err(TryLockError::Poisoned(poisoned)) => Some(poisoned.into_inner()),
            Err(TryLockError::WouldBlock) => None,
        }
    }
}

impl<T: Default> Default for OrderedMutex<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T> fmt::Debug for OrderedMutex<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OrderedMutex").field("id", &self.id).finish_non_exhaustive()
    }
}

/// Guards returned by [`lock_pair`]
///
/// `Distinct` keeps the guards in argument order regardless of the order
/// they were acquired in.
pub enum LockedPair<'a, T> {
    /// Both arguments were the same mutex; it is locked once
    Same(MutexGuard<'a, T>),
    Distinct {
        first: MutexGuard<'a, T>,
        second: MutexGuard<'a, T>,
    },
}

/// Lock two mutexes without risking a lock-order deadlock
pub fn lock_pair<'a, T>(a: &'a OrderedMutex<T>, b: &'a OrderedMutex<T>) -> LockedPair<'a, T> {
    if ptr::eq(a, b) {
        return LockedPair::Same(a.lock());
    }

    let swapped = a.id > b.id;
    let (lower, higher) = if swapped { (b, a) } else { (a, b) };
    loop {
        let lower_guard = lower.lock();
        if let Some(higher_guard) = higher.try_lock() {
            return if swapped {
                LockedPair::Distinct {
                    first: higher_guard,
                    second: lower_guard,
                }
            } else {
                LockedPair::Distinct {
                    first: lower_guard,
                    second: higher_guard,
                }
            };
        }
        drop(lower_guard);
        thread::sleep(CONTENTION_BACKOFF);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_ids_are_unique_and_increasing() {
        let a = OrderedMutex::new(());
        let b = OrderedMutex::new(());
        assert!(b.id() > a.id());
    }

    #[test]
    fn test_same_mutex_locks_once() {
        let m = OrderedMutex::new(5);
        match lock_pair(&m, &m) {
            LockedPair::Same(guard) => assert_eq!(*guard, 5),
            LockedPair::Distinct { .. } => panic!("expected a single guard"),
        };
    }

    #[test]
    fn test_guards_follow_argument_order() {
        let low = OrderedMutex::new("low");
        let high = OrderedMutex::new("high");
        match lock_pair(&high, &low) {
            LockedPair::Distinct { first, second } => {
                assert_eq!(*first, "high");
                assert_eq!(*second, "low");
            }
            LockedPair::Same(_) => panic!("expected two guards"),
        };
    }

    #[test]
    fn test_opposite_order_contention_terminates() {
        let a = Arc::new(OrderedMutex::new(0u64));
        let b = Arc::new(OrderedMutex::new(0u64));

        let workers: Vec<_> = (0..4)
            .map(|i| {
                let (a, b) = (Arc::clone(&a), Arc::clone(&b));
                thread::spawn(move || {
                    for _ in 0..200 {
                        let pair = if i % 2 == 0 { lock_pair(&a, &b) } else { lock_pair(&b, &a) };
                        if let LockedPair::Distinct { mut first, mut second } = pair {
                            *first += 1;
                            *second += 1;
                        }
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }
        assert_eq!(*a.lock(), 800);
        assert_eq!(*b.lock(), 800);
    }

    #[test]
    fn test_poisoned_lock_is_recovered() {
        let m = Arc::new(OrderedMutex::new(1));
        let poisoner = Arc::clone(&m);
        let _ = thread::spawn(move || {
            let _guard = poisoner.lock();
            panic!("poison");
        })
        .join();
        assert_eq!(*m.lock(), 1);
        assert!(m.try_lock().is_some());
    }
}
