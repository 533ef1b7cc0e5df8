//! # Kernel state
//!
//! The mapping databases and the task list live in one process-wide
//! [`Kernel`] behind the big kernel lock. It is built once by [`init`]
//! before any other CPU runs.

use alloc::sync::Arc;

use spin::Once;

use crate::common::{Pfn, SpaceId, Vpn};
use crate::debugger::{check_consistency, Inconsistency};
use crate::error::{Error, Result, EEXIST, ENOMEM, EPERM, ESRCH};
use crate::fpage::{FlexPage, FpageRights};
use crate::map_util::{fpage_map, fpage_unmap, UnmapMode};
use crate::mapdb::Mapdbs;
use crate::memory::RamQuota;
use crate::space::{
    Attribs, CapSpace, InsertStatus, IoSpace, Lookup, MemSpace, ObjSpace, Space, SpaceDirectory,
};
use crate::sync::{CpuLock, CpuToken};
use crate::task::TaskList;

static KERNEL: Once<CpuLock<Kernel>> = Once::new();

/// Boot-time parameters.
#[derive(Clone, Copy, Debug)]
pub struct KernelConfig {
    /// Bytes of kernel memory available to all tasks together
    pub root_quota: usize,
    pub log_level: log::LevelFilter,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            root_quota: 64 * 1024 * 1024,
            log_level: log::LevelFilter::Info,
        }
    }
}

#[derive(Debug)]
pub struct Kernel {
    pub mapdbs: Mapdbs,
    pub tasks: TaskList,
    root_quota: Arc<RamQuota>,
    sigma0: SpaceId,
    next_object: usize,
}

/// Initialize the kernel state. Later calls return the existing instance.
pub fn init(config: KernelConfig) -> Result<&'static CpuLock<Kernel>> {
    KERNEL
        .try_call_once(|| {
            crate::log::init();
            crate::log::init_logger(config.log_level);
            Kernel::new(config).map(CpuLock::new)
        })
        .map(|kernel| {
            log::info!("Mapping database initialized.");
            kernel
        })
}

/// The kernel state, once [`init`] has run.
pub fn kernel() -> Option<&'static CpuLock<Kernel>> {
    KERNEL.get()
}

impl Kernel {
    pub fn new(config: KernelConfig) -> Result<Self> {
        let root_quota = RamQuota::new(config.root_quota);
        let mut tasks = TaskList::new();
        let sigma0 = tasks.new_sigma0(Arc::clone(&root_quota))?;
        Ok(Self {
            mapdbs: Mapdbs::new(),
            tasks,
            root_quota,
            sigma0,
            next_object: 1,
        })
    }

    pub fn sigma0(&self) -> SpaceId {
        self.sigma0
    }

    pub fn root_quota(&self) -> &Arc<RamQuota> {
        &self.root_quota
    }

    pub fn create_task(
        &mut self,
        token: CpuToken<'_>,
        name: &str,
        quota: usize,
    ) -> Result<SpaceId> {
        debug_assert!(token.was_set());
        self.tasks.new_task(name, &self.root_quota, quota)
    }

    /// Revoke everything the task holds, and everything derived from it,
    /// then drop the task.
    pub fn destroy_task(&mut self, token: CpuToken<'_>, id: SpaceId) -> Result<()> {
        if id == self.sigma0 {
            return Err(Error::new(EPERM));
        }
        if self.tasks.get(id).is_none() {
            return Err(Error::new(ESRCH));
        }

        let all = FlexPage::all_spaces(FpageRights::RWX);
        fpage_unmap(token, &mut self.mapdbs, &mut self.tasks, id, None, all, true, UnmapMode::Full);

        if let Some(task) = self.tasks.remove(id) {
            log::debug!("task {:?} '{}' destroyed", id, task.name);
        }
        Ok(())
    }

    /// Create a kernel object owned by `id` in its object slot `slot`.
    pub fn create_object(
        &mut self,
        token: CpuToken<'_>,
        id: SpaceId,
        slot: usize,
        rights: Attribs,
    ) -> Result<Pfn> {
        debug_assert!(token.was_set());
        let task = self.tasks.get_mut(id).ok_or(Error::new(ESRCH))?;
        let obj = Pfn::new(self.next_object);
        match task.obj.v_insert(obj, Vpn::new(slot), 0, rights) {
            InsertStatus::Ok => {
                self.next_object += 1;
                Ok(obj)
            }
            InsertStatus::ErrNomem => Err(Error::new(ENOMEM)),
            _ => Err(Error::new(EEXIST)),
        }
    }

    /// Transfer the send flexpage of `from` into the receive window of `to`.
    pub fn map_fpage(
        &mut self,
        token: CpuToken<'_>,
        from: SpaceId,
        snd: FlexPage,
        to: SpaceId,
        rcv: FlexPage,
        hot_spot: usize,
    ) -> Result<u8> {
        fpage_map(token, &mut self.mapdbs, &mut self.tasks, from, snd, to, rcv, hot_spot)
    }

    pub fn unmap_fpage(
        &mut self,
        token: CpuToken<'_>,
        id: SpaceId,
        fpage: FlexPage,
        me_too: bool,
        mode: UnmapMode,
    ) -> Attribs {
        fpage_unmap(token, &mut self.mapdbs, &mut self.tasks, id, None, fpage, me_too, mode)
    }

    /// Run the consistency check over every database.
    pub fn check(&self) -> Result<(), Inconsistency> {
        check_consistency::<MemSpace, _>(&self.mapdbs.mem, &self.tasks)?;
        check_consistency::<IoSpace, _>(&self.mapdbs.io, &self.tasks)?;
        check_consistency::<CapSpace, _>(&self.mapdbs.cap, &self.tasks)?;
        check_consistency::<ObjSpace, _>(&self.mapdbs.obj, &self.tasks)
    }

    pub fn lookup<S: Space>(&self, id: SpaceId, virt: Vpn) -> Option<Lookup>
    where
        TaskList: SpaceDirectory<S>,
    {
        SpaceDirectory::<S>::space(&self.tasks, id)?.v_lookup(virt)
    }
}
