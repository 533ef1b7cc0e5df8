use alloc::collections::BTreeMap;
use alloc::sync::Arc;

use super::{Task, TASK_MAX_TASKS};
use crate::common::SpaceId;
use crate::error::{Error, Result, EAGAIN, ENOMEM};
use crate::memory::RamQuota;
use crate::space::{CapSpace, IoSpace, MemSpace, ObjSpace, SpaceDirectory};

/// Task list type
#[derive(Debug)]
pub struct TaskList {
    // Using a BTreeMap for its range method
    map: BTreeMap<SpaceId, Task>,
    next_id: usize,
}

impl TaskList {
    /// Create a new task list.
    pub const fn new() -> Self {
        TaskList {
            map: BTreeMap::new(),
            next_id: 1,
        }
    }

    /// Get the nth task.
    pub fn get(&self, id: SpaceId) -> Option<&Task> {
        self.map.get(&id)
    }

    pub fn get_mut(&mut self, id: SpaceId) -> Option<&mut Task> {
        self.map.get_mut(&id)
    }

    pub fn iter(&self) -> alloc::collections::btree_map::Iter<'_, SpaceId, Task> {
        self.map.iter()
    }

    pub fn range(
        &self,
        range: impl core::ops::RangeBounds<SpaceId>,
    ) -> alloc::collections::btree_map::Range<'_, SpaceId, Task> {
        self.map.range(range)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    fn next_free_id(&mut self) -> Result<SpaceId> {
        if self.next_id >= TASK_MAX_TASKS {
            self.next_id = 1;
        }

        while self.map.contains_key(&SpaceId::new(self.next_id)) {
            self.next_id += 1;
        }

        if self.next_id >= TASK_MAX_TASKS {
            return Err(Error::new(EAGAIN));
        }

        let id = SpaceId::new(self.next_id);
        self.next_id += 1;
        Ok(id)
    }

    /// Create a new task whose quota of `limit` bytes is carved out of
    /// `parent`.
    pub fn new_task(
        &mut self,
        name: &str,
        parent: &Arc<RamQuota>,
        limit: usize,
    ) -> Result<SpaceId> {
        let quota = RamQuota::new_child(parent, limit).map_err(|_| Error::new(ENOMEM))?;
        let id = self.next_free_id()?;
        assert!(self.map.insert(id, Task::new(id, name, quota)).is_none());
        log::debug!("task {:?} '{}' created with {} bytes", id, name, limit);
        Ok(id)
    }

    /// Create the root task, charging its own quota directly.
    pub fn new_sigma0(&mut self, quota: Arc<RamQuota>) -> Result<SpaceId> {
        let id = self.next_free_id()?;
        assert!(self.map.insert(id, Task::new_sigma0(id, quota)).is_none());
        Ok(id)
    }

    /// Remove a task from the list. Its spaces are dropped with it, so
    /// callers unmap everything first.
    pub fn remove(&mut self, id: SpaceId) -> Option<Task> {
        self.map.remove(&id)
    }
}

impl Default for TaskList {
    fn default() -> Self {
        Self::new()
    }
}

macro_rules! space_directory {
    ($space:ty, $field:ident) => {
        impl SpaceDirectory<$space> for TaskList {
            fn space(&self, id: SpaceId) -> Option<&$space> {
                self.map.get(&id).map(|task| &task.$field)
            }

            fn space_mut(&mut self, id: SpaceId) -> Option<&mut $space> {
                self.map.get_mut(&id).map(|task| &mut task.$field)
            }
        }
    };
}

space_directory!(MemSpace, mem);
space_directory!(IoSpace, io);
space_directory!(CapSpace, cap);
space_directory!(ObjSpace, obj);
