//! The big kernel lock.
//!
//! All mapping-database and backend mutation is serialized by one lock that
//! the syscall/IPC path takes before calling into `map`/`unmap`. Holding the
//! lock is proven to the callee with a [`CpuToken`], obtained by splitting
//! the guard the same way ordered-lock guards hand out their level token:
//!
//! ```
//! use l4_mapdb::sync::CpuLock;
//!
//! let lock = CpuLock::new(0usize);
//! let mut guard = lock.lock();
//! let (value, token) = guard.token_split();
//! assert!(token.was_set());
//! *value += 1;
//! ```

use core::marker::PhantomData;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicBool, Ordering};

pub struct CpuLock<T> {
    inner: spin::Mutex<T>,
    held: AtomicBool,
}

impl<T> CpuLock<T> {
    pub const fn new(val: T) -> Self {
        Self {
            inner: spin::Mutex::new(val),
            held: AtomicBool::new(false),
        }
    }

    /// Acquire the lock, spinning until it is available.
    pub fn lock(&self) -> CpuLockGuard<'_, T> {
        let inner = self.inner.lock();
        self.held.store(true, Ordering::Release);
        CpuLockGuard {
            inner,
            held: &self.held,
        }
    }

    pub fn try_lock(&self) -> Option<CpuLockGuard<'_, T>> {
        self.inner.try_lock().map(|inner| {
            self.held.store(true, Ordering::Release);
            CpuLockGuard {
                inner,
                held: &self.held,
            }
        })
    }

    pub fn is_locked(&self) -> bool {
        self.held.load(Ordering::Acquire)
    }

    pub fn into_inner(self) -> T {
        self.inner.into_inner()
    }
}

/// RAII guard; the lock is released when it is dropped.
pub struct CpuLockGuard<'a, T> {
    inner: spin::MutexGuard<'a, T>,
    held: &'a AtomicBool,
}

impl<T> CpuLockGuard<'_, T> {
    /// Split the guard into the protected data and a token proving the lock
    /// is held for as long as both are borrowed.
    pub fn token_split(&mut self) -> (&mut T, CpuToken<'_>) {
        (
            &mut *self.inner,
            CpuToken {
                held: self.held,
                _not_send: PhantomData,
            },
        )
    }
}

impl<T> Deref for CpuLockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.inner
    }
}

impl<T> DerefMut for CpuLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.inner
    }
}

impl<T> Drop for CpuLockGuard<'_, T> {
    fn drop(&mut self) {
        self.held.store(false, Ordering::Release);
    }
}

/// Proof that the kernel lock is held by the current CPU.
#[derive(Clone, Copy)]
pub struct CpuToken<'a> {
    held: &'a AtomicBool,
    _not_send: PhantomData<*const ()>,
}

impl CpuToken<'_> {
    pub fn was_set(&self) -> bool {
        self.held.load(Ordering::Acquire)
    }
}
