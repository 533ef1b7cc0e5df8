use alloc::sync::Arc;
use core::mem;

use hashbrown::hash_map::Entry;
use hashbrown::HashMap;

use super::{strip, upgrade_or_exists, Attribs, InsertStatus, Lookup, Space};
use crate::common::{Pfn, Vpn};
use crate::consts::{MEM_MAP_MAX, MEM_SUPERPAGE_ORDER, MEM_TABLE_ENTRIES};
use crate::fpage::FpageKind;
use crate::memory::{QuotaBox, RamQuota};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Pte {
    frame: Pfn,
    attribs: Attribs,
}

type PageTable = [Option<Pte>; MEM_TABLE_ENTRIES];

#[derive(Debug)]
enum PdEntry {
    Superpage(Pte),
    Table {
        table: QuotaBox<PageTable>,
        used: usize,
    },
}

/// A two-level page table: a sparse directory of superpage slots, each
/// holding either a superpage or a lazily allocated table of pages.
#[derive(Debug)]
pub struct MemSpace {
    quota: Arc<RamQuota>,
    dir: HashMap<usize, PdEntry>,
    need_flush: bool,
    sigma0: bool,
}

const SUPER_MASK: usize = MEM_TABLE_ENTRIES - 1;

impl MemSpace {
    /// Bytes charged to the quota for every page table
    pub const TABLE_BYTES: usize = mem::size_of::<PageTable>();

    pub fn new(quota: Arc<RamQuota>) -> Self {
        Self {
            quota,
            dir: HashMap::new(),
            need_flush: false,
            sigma0: false,
        }
    }

    /// The memory owner: all of physical memory appears identity mapped.
    pub fn new_sigma0(quota: Arc<RamQuota>) -> Self {
        Self {
            sigma0: true,
            ..Self::new(quota)
        }
    }

    pub fn quota(&self) -> &Arc<RamQuota> {
        &self.quota
    }

    /// Number of page tables currently allocated.
    pub fn table_count(&self) -> usize {
        self.dir
            .values()
            .filter(|entry| matches!(entry, PdEntry::Table { .. }))
            .count()
    }

    /// Simulate a hardware access through `virt`, setting the referenced
    /// and, for writes, the dirty bit. Returns false on a page fault.
    pub fn touch(&mut self, virt: Vpn, write: bool) -> bool {
        let Some(pte) = self.pte_mut(virt) else {
            return false;
        };
        if write && !pte.attribs.contains(Attribs::WRITE) {
            return false;
        }
        pte.attribs |= Attribs::REFERENCED;
        if write {
            pte.attribs |= Attribs::DIRTY;
        }
        true
    }

    fn pte_mut(&mut self, virt: Vpn) -> Option<&mut Pte> {
        match self.dir.get_mut(&(virt.get() >> MEM_SUPERPAGE_ORDER))? {
            PdEntry::Superpage(pte) => Some(pte),
            PdEntry::Table { table, .. } => table[virt.get() & SUPER_MASK].as_mut(),
        }
    }

    fn insert_superpage(&mut self, phys: Pfn, virt: Vpn, attribs: Attribs) -> InsertStatus {
        let pdi = virt.get() >> MEM_SUPERPAGE_ORDER;
        match self.dir.get_mut(&pdi) {
            None => {
                self.dir.insert(pdi, PdEntry::Superpage(Pte { frame: phys, attribs }));
                InsertStatus::Ok
            }
            Some(PdEntry::Superpage(pte)) if pte.frame == phys => {
                upgrade_or_exists(&mut pte.attribs, attribs)
            }
            // A page table (or a different superpage) is in the way.
            Some(_) => InsertStatus::ErrExists,
        }
    }

    fn insert_page(&mut self, phys: Pfn, virt: Vpn, attribs: Attribs) -> InsertStatus {
        let index = virt.get() & SUPER_MASK;

        let entry = match self.dir.entry(virt.get() >> MEM_SUPERPAGE_ORDER) {
            Entry::Occupied(occupied) => occupied.into_mut(),
            Entry::Vacant(vacant) => {
                let Ok(table) = QuotaBox::new_with(&self.quota, || [None; MEM_TABLE_ENTRIES]) else {
                    return InsertStatus::ErrNomem;
                };
                vacant.insert(PdEntry::Table { table, used: 0 })
            }
        };

        match entry {
            PdEntry::Superpage(pte) => {
                // Covered by a superpage; only an identical request is benign.
                if pte.frame.add(index) == phys && pte.attribs.rights().contains(attribs) {
                    InsertStatus::WarnExists
                } else {
                    InsertStatus::ErrExists
                }
            }
            PdEntry::Table { table, used } => {
                let slot = &mut table[index];
                match slot.as_mut() {
                    Some(pte) if pte.frame == phys => upgrade_or_exists(&mut pte.attribs, attribs),
                    Some(_) => InsertStatus::ErrExists,
                    None => {
                        *slot = Some(Pte { frame: phys, attribs });
                        *used += 1;
                        InsertStatus::Ok
                    }
                }
            }
        }
    }
}

impl Space for MemSpace {
    const KIND: FpageKind = FpageKind::Memory;
    const SUPERPAGE_ORDER: u32 = MEM_SUPERPAGE_ORDER;
    const HAS_SUPERPAGE: bool = cfg!(feature = "superpages");
    const MAP_MAX: usize = MEM_MAP_MAX;
    const IDENTITY_MAP: bool = false;

    fn v_insert(&mut self, phys: Pfn, virt: Vpn, order: u32, attribs: Attribs) -> InsertStatus {
        if !self.is_mappable(virt, order) {
            log::debug!("mem: refusing insert at {:?} order {}", virt, order);
            return InsertStatus::ErrExists;
        }
        let attribs = attribs.rights();
        if order == MEM_SUPERPAGE_ORDER {
            self.insert_superpage(phys, virt, attribs)
        } else {
            self.insert_page(phys, virt, attribs)
        }
    }

    fn v_lookup(&self, virt: Vpn) -> Option<Lookup> {
        if virt.get() >= MEM_MAP_MAX {
            return None;
        }
        match self.dir.get(&(virt.get() >> MEM_SUPERPAGE_ORDER))? {
            PdEntry::Superpage(pte) => Some(Lookup {
                phys: pte.frame,
                order: MEM_SUPERPAGE_ORDER,
                attribs: pte.attribs,
            }),
            PdEntry::Table { table, .. } => table[virt.get() & SUPER_MASK].map(|pte| Lookup {
                phys: pte.frame,
                order: 0,
                attribs: pte.attribs,
            }),
        }
    }

    fn v_fabricate(&self, virt: Vpn) -> Option<Lookup> {
        if !self.sigma0 || virt.get() >= MEM_MAP_MAX {
            return None;
        }
        let order = if Self::HAS_SUPERPAGE { MEM_SUPERPAGE_ORDER } else { 0 };
        Some(Lookup {
            phys: Pfn::new(virt.align_down(order).get()),
            order,
            attribs: Attribs::RIGHTS,
        })
    }

    fn v_delete(&mut self, virt: Vpn, order: u32, mask: Attribs) -> Attribs {
        let start = virt.align_down(order).get();
        let end = start.saturating_add(1 << order).min(MEM_MAP_MAX);
        let mut flushed = Attribs::empty();

        let mut addr = start;
        while addr < end {
            let pdi = addr >> MEM_SUPERPAGE_ORDER;
            let next = (pdi + 1) << MEM_SUPERPAGE_ORDER;
            let stop = next.min(end);

            let mut drop_entry = false;
            match self.dir.get_mut(&pdi) {
                None => {}
                Some(PdEntry::Superpage(pte)) => {
                    let (bits, gone) = strip(&mut pte.attribs, mask);
                    flushed |= bits;
                    drop_entry = gone;
                }
                Some(PdEntry::Table { table, used }) => {
                    for index in (addr & SUPER_MASK)..=((stop - 1) & SUPER_MASK) {
                        let slot = &mut table[index];
                        let Some(pte) = slot.as_mut() else { continue };
                        let (bits, gone) = strip(&mut pte.attribs, mask);
                        flushed |= bits;
                        if gone {
                            *slot = None;
                            *used -= 1;
                        }
                    }
                    drop_entry = *used == 0;
                }
            }
            if drop_entry {
                // Empty tables go back to the quota.
                self.dir.remove(&pdi);
            }
            addr = stop;
        }

        if !flushed.is_empty() {
            self.need_flush = true;
        }
        flushed
    }

    fn is_mappable(&self, virt: Vpn, order: u32) -> bool {
        let size_ok = order == 0 || (Self::HAS_SUPERPAGE && order == MEM_SUPERPAGE_ORDER);
        size_ok && virt.is_aligned(order) && virt.get() + (1 << order) <= MEM_MAP_MAX
    }

    fn tlb_flush(&mut self) {
        if self.need_flush {
            log::trace!("mem: tlb flush");
            self.need_flush = false;
        }
    }

    fn need_tlb_flush(&self) -> bool {
        self.need_flush
    }
}
