use alloc::sync::Arc;
use core::mem;

use hashbrown::HashMap;

use super::{strip, upgrade_or_exists, Attribs, InsertStatus, Lookup, Space};
use crate::common::{Pfn, Vpn};
use crate::consts::{OBJ_CHUNK_ORDER, OBJ_CHUNK_SLOTS, OBJ_MAP_MAX};
use crate::fpage::FpageKind;
use crate::memory::{QuotaBox, RamQuota};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct ObjEntry {
    obj: Pfn,
    attribs: Attribs,
}

type SlotChunk = [Option<ObjEntry>; OBJ_CHUNK_SLOTS];

#[derive(Debug)]
struct ObjChunk {
    slots: QuotaBox<SlotChunk>,
    used: usize,
}

/// Kernel-object handle table. Slots hold object ids; slot memory is
/// allocated in chunks and returned once a chunk is empty.
#[derive(Debug)]
pub struct ObjSpace {
    quota: Arc<RamQuota>,
    chunks: HashMap<usize, ObjChunk>,
}

const CHUNK_MASK: usize = OBJ_CHUNK_SLOTS - 1;

impl ObjSpace {
    pub const CHUNK_BYTES: usize = mem::size_of::<SlotChunk>();

    pub fn new(quota: Arc<RamQuota>) -> Self {
        Self {
            quota,
            chunks: HashMap::new(),
        }
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    fn entry(&self, slot: usize) -> Option<&ObjEntry> {
        self.chunks.get(&(slot >> OBJ_CHUNK_ORDER))?.slots[slot & CHUNK_MASK].as_ref()
    }

    fn delete_slot(&mut self, slot: usize, mask: Attribs) -> Attribs {
        let key = slot >> OBJ_CHUNK_ORDER;
        let Some(chunk) = self.chunks.get_mut(&key) else {
            return Attribs::empty();
        };
        let entry = &mut chunk.slots[slot & CHUNK_MASK];
        let Some(obj) = entry.as_mut() else {
            return Attribs::empty();
        };

        let (removed, gone) = strip(&mut obj.attribs, mask);
        if gone {
            *entry = None;
            chunk.used -= 1;
            if chunk.used == 0 {
                self.chunks.remove(&key);
            }
        }
        removed
    }
}

impl Space for ObjSpace {
    const KIND: FpageKind = FpageKind::Obj;
    const SUPERPAGE_ORDER: u32 = 0;
    const HAS_SUPERPAGE: bool = false;
    const MAP_MAX: usize = OBJ_MAP_MAX;
    const IDENTITY_MAP: bool = false;

    fn v_insert(&mut self, phys: Pfn, virt: Vpn, order: u32, attribs: Attribs) -> InsertStatus {
        if !self.is_mappable(virt, order) {
            return InsertStatus::ErrExists;
        }

        let slot = virt.get();
        let key = slot >> OBJ_CHUNK_ORDER;
        if !self.chunks.contains_key(&key) {
            let Ok(slots) = QuotaBox::new_with(&self.quota, || [None; OBJ_CHUNK_SLOTS]) else {
                return InsertStatus::ErrNomem;
            };
            self.chunks.insert(key, ObjChunk { slots, used: 0 });
        }
        let Some(chunk) = self.chunks.get_mut(&key) else {
            return InsertStatus::ErrNomem;
        };

        let entry = &mut chunk.slots[slot & CHUNK_MASK];
        match entry.as_mut() {
            Some(existing) if existing.obj == phys => {
                upgrade_or_exists(&mut existing.attribs, attribs)
            }
            Some(_) => InsertStatus::ErrExists,
            None => {
                *entry = Some(ObjEntry {
                    obj: phys,
                    attribs: attribs.rights(),
                });
                chunk.used += 1;
                InsertStatus::Ok
            }
        }
    }

    fn v_lookup(&self, virt: Vpn) -> Option<Lookup> {
        if virt.get() >= OBJ_MAP_MAX {
            return None;
        }
        self.entry(virt.get()).map(|entry| Lookup {
            phys: entry.obj,
            order: 0,
            attribs: entry.attribs,
        })
    }

    fn v_delete(&mut self, virt: Vpn, order: u32, mask: Attribs) -> Attribs {
        let start = virt.align_down(order).get();
        let end = start.saturating_add(1 << order).min(OBJ_MAP_MAX);

        let mut removed = Attribs::empty();
        for slot in start..end {
            removed |= self.delete_slot(slot, mask);
        }
        removed
    }

    fn is_mappable(&self, virt: Vpn, order: u32) -> bool {
        order == 0 && virt.get() < OBJ_MAP_MAX
    }
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;

    fn space() -> ObjSpace {
        ObjSpace::new(RamQuota::new(2 * ObjSpace::CHUNK_BYTES))
    }

    #[test]
    fn slots_hold_object_ids() {
        // Given
        let mut objs = space();

        // When
        let status = objs.v_insert(Pfn::new(0xabc), Vpn::new(3), 0, Attribs::READ);

        // Then
        assert_eq!(status, InsertStatus::Ok);
        let lookup = objs.v_lookup(Vpn::new(3)).expect("slot filled");
        assert_eq!(lookup.phys, Pfn::new(0xabc));
        assert_eq!(lookup.attribs, Attribs::READ);
        assert_eq!(
            objs.v_insert(Pfn::new(0xabc), Vpn::new(3), 0, Attribs::READ),
            InsertStatus::WarnExists
        );
        assert_eq!(
            objs.v_insert(Pfn::new(0xdef), Vpn::new(3), 0, Attribs::READ),
            InsertStatus::ErrExists
        );
        assert_eq!(
            objs.v_insert(Pfn::new(0xabc), Vpn::new(3), 0, Attribs::RW),
            InsertStatus::WarnAttribUpgrade
        );
    }

    #[test]
    fn no_superpages() {
        let objs = space();
        assert!(!objs.is_mappable(Vpn::new(0), 1));
        assert!(!objs.is_mappable(Vpn::new(OBJ_MAP_MAX), 0));
    }

    #[test]
    fn empty_chunks_are_released() {
        // Given
        let quota = RamQuota::new(ObjSpace::CHUNK_BYTES);
        let mut objs = ObjSpace::new(Arc::clone(&quota));
        objs.v_insert(Pfn::new(1), Vpn::new(0), 0, Attribs::RW);
        objs.v_insert(Pfn::new(2), Vpn::new(1), 0, Attribs::RW);

        // When
        let other_chunk = objs.v_insert(Pfn::new(3), Vpn::new(OBJ_CHUNK_SLOTS), 0, Attribs::RW);
        let removed = objs.v_delete(Vpn::new(0), 1, Attribs::RIGHTS);

        // Then
        assert_eq!(other_chunk, InsertStatus::ErrNomem);
        assert_eq!(removed, Attribs::RW);
        assert_eq!(objs.chunk_count(), 0);
        assert_eq!(quota.used(), 0);
    }

    #[test]
    fn write_revoke_keeps_slot() {
        let mut objs = space();
        objs.v_insert(Pfn::new(1), Vpn::new(0), 0, Attribs::RW);

        assert_eq!(objs.v_delete(Vpn::new(0), 0, Attribs::WRITE), Attribs::WRITE);
        assert_eq!(objs.v_lookup(Vpn::new(0)).map(|l| l.attribs), Some(Attribs::READ));
    }
}
