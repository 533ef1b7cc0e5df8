//! # Tasks
//!
//! A task is the unit that owns address spaces: one space per resource kind,
//! all charged to the task's quota. Its id doubles as the [`SpaceId`] of
//! each of its spaces in the mapping databases.

use alloc::string::String;
use alloc::sync::Arc;

use crate::common::SpaceId;
use crate::memory::RamQuota;
use crate::space::{CapSpace, IoSpace, MemSpace, ObjSpace};

pub use self::list::TaskList;

pub mod list;

/// Maximum task id, ids wrap around below it
pub const TASK_MAX_TASKS: usize = (isize::MAX as usize) - 1;

#[derive(Debug)]
pub struct Task {
    /// The id of this task
    pub id: SpaceId,
    /// The name of the task
    pub name: String,
    /// Charge account for every backing allocation of the task's spaces
    quota: Arc<RamQuota>,
    pub mem: MemSpace,
    pub io: IoSpace,
    pub cap: CapSpace,
    pub obj: ObjSpace,
    sigma0: bool,
}

impl Task {
    pub fn new(id: SpaceId, name: &str, quota: Arc<RamQuota>) -> Task {
        Task {
            id,
            name: String::from(name),
            mem: MemSpace::new(Arc::clone(&quota)),
            io: IoSpace::new(Arc::clone(&quota)),
            cap: CapSpace::new(Arc::clone(&quota)),
            obj: ObjSpace::new(Arc::clone(&quota)),
            quota,
            sigma0: false,
        }
    }

    /// The root task: owns all memory, ports and capability slots.
    pub fn new_sigma0(id: SpaceId, quota: Arc<RamQuota>) -> Task {
        Task {
            id,
            name: String::from("sigma0"),
            mem: MemSpace::new_sigma0(Arc::clone(&quota)),
            io: IoSpace::new_sigma0(Arc::clone(&quota)),
            cap: CapSpace::new_sigma0(Arc::clone(&quota)),
            obj: ObjSpace::new(Arc::clone(&quota)),
            quota,
            sigma0: true,
        }
    }

    pub fn quota(&self) -> &Arc<RamQuota> {
        &self.quota
    }

    pub fn is_sigma0(&self) -> bool {
        self.sigma0
    }
}
