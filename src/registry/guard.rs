//! Writer lock with re-entrancy detection.
//!
//! The lock covers planning and publishing only. Handler `init`/`destroy`
//! callbacks run after the guard is dropped, so a callback may register into
//! any registry, including its own. Acquiring the lock twice on one thread
//! would still deadlock a plain mutex; here it fails with
//! `RegistrationError::Reentrant`.
//!
//! Readers never touch this lock.

use std::ops::{Deref, DerefMut};
use std::thread::{self, ThreadId};

use parking_lot::{Mutex, MutexGuard};

use crate::error::{RegistrationError, RegistrationResult};

/// Mutual exclusion for the read-modify-publish sequence of one registry.
#[derive(Debug, Default)]
pub struct WriterLock<T> {
    state: Mutex<T>,
    owner: Mutex<Option<ThreadId>>,
}

impl<T> WriterLock<T> {
    pub fn new(state: T) -> Self {
        Self {
            state: Mutex::new(state),
            owner: Mutex::new(None),
        }
    }

    /// Acquire the lock, failing fast when the current thread already holds it.
    pub fn write(&self) -> RegistrationResult<WriterGuard<'_, T>> {
        let me = thread::current().id();
        if *self.owner.lock() == Some(me) {
            tracing::error!("Re-entrant registry mutation from a handler callback");
            return Err(RegistrationError::Reentrant);
        }
        let state = self.state.lock();
        *self.owner.lock() = Some(me);
        Ok(WriterGuard { state, lock: self })
    }

    /// True when the current thread holds the lock.
    pub fn is_held_by_current_thread(&self) -> bool {
        *self.owner.lock() == Some(thread::current().id())
    }
}

/// Exclusive access to the registry's mutable state.
pub struct WriterGuard<'a, T> {
    state: MutexGuard<'a, T>,
    lock: &'a WriterLock<T>,
}

impl<T> Deref for WriterGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.state
    }
}

impl<T> DerefMut for WriterGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.state
    }
}

impl<T> Drop for WriterGuard<'_, T> {
    fn drop(&mut self) {
        *self.lock.owner.lock() = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_reentry_is_rejected() {
        let lock = WriterLock::new(0u32);
        let guard = lock.write().unwrap();
        assert!(lock.is_held_by_current_thread());
        assert!(matches!(lock.write(), Err(RegistrationError::Reentrant)));
        drop(guard);
        assert!(!lock.is_held_by_current_thread());
        assert!(lock.write().is_ok());
    }

    #[test]
    fn test_other_threads_wait() {
        let lock = Arc::new(WriterLock::new(0u32));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let lock = lock.clone();
                thread::spawn(move || {
                    for _ in 0..100 {
                        *lock.write().unwrap() += 1;
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(*lock.write().unwrap(), 800);
    }
}
