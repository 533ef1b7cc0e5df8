use alloc::sync::Arc;
use core::sync::atomic::{AtomicUsize, Ordering};

use super::Enomem;

/// A charge account bounding the kernel memory a task may consume.
///
/// A child quota reserves its whole limit from the parent when it is
/// created and gives it back when the last reference is dropped, so a
/// charge against a child never has to walk the hierarchy.
#[derive(Debug)]
pub struct RamQuota {
    parent: Option<Arc<RamQuota>>,
    limit: usize,
    used: AtomicUsize,
}

impl RamQuota {
    /// Create a root quota.
    pub fn new(limit: usize) -> Arc<Self> {
        Arc::new(Self {
            parent: None,
            limit,
            used: AtomicUsize::new(0),
        })
    }

    /// Create a quota of `limit` bytes carved out of `parent`.
    pub fn new_child(parent: &Arc<RamQuota>, limit: usize) -> Result<Arc<Self>, Enomem> {
        parent.alloc(limit)?;
        Ok(Arc::new(Self {
            parent: Some(Arc::clone(parent)),
            limit,
            used: AtomicUsize::new(0),
        }))
    }

    /// Charge `bytes`; on failure the account is unchanged.
    pub fn alloc(&self, bytes: usize) -> Result<(), Enomem> {
        self.used
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                used.checked_add(bytes).filter(|&total| total <= self.limit)
            })
            .map(|_| ())
            .map_err(|_| {
                log::debug!("quota exhausted: {} + {} > {}", self.used(), bytes, self.limit);
                Enomem
            })
    }

    pub fn free(&self, bytes: usize) {
        let prev = self.used.fetch_sub(bytes, Ordering::AcqRel);
        debug_assert!(prev >= bytes, "quota refund of {bytes} exceeds charge {prev}");
    }

    pub fn used(&self) -> usize {
        self.used.load(Ordering::Acquire)
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn available(&self) -> usize {
        self.limit.saturating_sub(self.used())
    }
}

impl Drop for RamQuota {
    fn drop(&mut self) {
        if let Some(parent) = self.parent.take() {
            parent.free(self.limit);
        }
    }
}
