//! Safe lock utilities that handle poisoned locks gracefully
//!
//! A thread panicking while holding a lock poisons it; these helpers recover
//! the inner data so one bad request cannot cascade into lock failures
//! everywhere else.

use std::sync::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Acquire a read lock, recovering from poison if necessary.
pub fn read_lock<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| {
        tracing::warn!("RwLock was poisoned during read access, recovering");
        poisoned.into_inner()
    })
}

/// Acquire a write lock, recovering from poison if necessary.
pub fn write_lock<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| {
        tracing::warn!("RwLock was poisoned during write access, recovering");
        poisoned.into_inner()
    })
}

/// Acquire a mutex, recovering from poison if necessary.
pub fn mutex_lock<T>(lock: &Mutex<T>) -> MutexGuard<'_, T> {
    lock.lock().unwrap_or_else(|poisoned| {
        tracing::warn!("Mutex was poisoned, recovering");
        poisoned.into_inner()
    })
}
