//! # Memory accounting
//!
//! Backends never allocate their backing store from the kernel heap directly;
//! every table, bitmap or slot chunk is charged to the owning task's
//! [`RamQuota`] first and wrapped in a [`QuotaBox`] that refunds the charge
//! when it is dropped.

use alloc::boxed::Box;
use alloc::sync::Arc;
use core::mem;
use core::ops::{Deref, DerefMut};

use crate::error::{Error, ENOMEM};

pub use self::quota::RamQuota;

pub mod quota;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Enomem;

impl From<Enomem> for Error {
    fn from(_: Enomem) -> Self {
        Self::new(ENOMEM)
    }
}

/// A heap allocation whose size has been charged to a quota.
pub struct QuotaBox<T> {
    inner: Box<T>,
    quota: Arc<RamQuota>,
}

impl<T> QuotaBox<T> {
    /// Charge `size_of::<T>()` to `quota`, then build the value. Nothing is
    /// constructed when the charge fails.
    pub fn new_with(quota: &Arc<RamQuota>, init: impl FnOnce() -> T) -> Result<Self, Enomem> {
        quota.alloc(mem::size_of::<T>())?;
        Ok(Self {
            inner: Box::new(init()),
            quota: Arc::clone(quota),
        })
    }

    pub fn quota(&self) -> &Arc<RamQuota> {
        &self.quota
    }
}

impl<T> Deref for QuotaBox<T> {
    type Target = T;
    fn deref(&self) -> &T {
        &self.inner
    }
}

impl<T> DerefMut for QuotaBox<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.inner
    }
}

impl<T> Drop for QuotaBox<T> {
    fn drop(&mut self) {
        self.quota.free(mem::size_of::<T>());
    }
}

impl<T: core::fmt::Debug> core::fmt::Debug for QuotaBox<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        self.inner.fmt(f)
    }
}
