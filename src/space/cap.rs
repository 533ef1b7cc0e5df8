use alloc::sync::Arc;

use super::{Attribs, InsertStatus, Lookup, Space};
use crate::common::{Pfn, Vpn};
use crate::consts::{CAP_BITMAP_WORDS, CAP_MAP_MAX, CAP_SLOT_ORDER};
use crate::fpage::FpageKind;
use crate::memory::{QuotaBox, RamQuota};

type CapBitmap = [usize; CAP_BITMAP_WORDS];

const WORD_BITS: usize = usize::BITS as usize;

/// Task capability slots. A task either holds individual slots, tracked in a
/// bitmap, or the whole slot space at once; never both.
#[derive(Debug)]
pub struct CapSpace {
    quota: Arc<RamQuota>,
    bitmap: Option<QuotaBox<CapBitmap>>,
    count: usize,
    full: bool,
    sigma0: bool,
}

impl CapSpace {
    pub const BITMAP_BYTES: usize = core::mem::size_of::<CapBitmap>();

    pub fn new(quota: Arc<RamQuota>) -> Self {
        Self {
            quota,
            bitmap: None,
            count: 0,
            full: false,
            sigma0: false,
        }
    }

    pub fn new_sigma0(quota: Arc<RamQuota>) -> Self {
        Self {
            sigma0: true,
            ..Self::new(quota)
        }
    }

    /// Number of individually mapped slots.
    pub fn count(&self) -> usize {
        self.count
    }

    pub fn is_full(&self) -> bool {
        self.full
    }

    fn has_slot(&self, slot: usize) -> bool {
        self.bitmap
            .as_ref()
            .map_or(false, |bitmap| bitmap[slot / WORD_BITS] & (1 << (slot % WORD_BITS)) != 0)
    }

    fn whole_space() -> Lookup {
        Lookup {
            phys: Pfn::new(0),
            order: CAP_SLOT_ORDER,
            attribs: Attribs::RW,
        }
    }
}

impl Space for CapSpace {
    const KIND: FpageKind = FpageKind::Cap;
    const SUPERPAGE_ORDER: u32 = CAP_SLOT_ORDER;
    const HAS_SUPERPAGE: bool = true;
    const MAP_MAX: usize = CAP_MAP_MAX;
    const IDENTITY_MAP: bool = true;

    fn v_insert(&mut self, phys: Pfn, virt: Vpn, order: u32, _attribs: Attribs) -> InsertStatus {
        if phys.get() != virt.get() {
            return InsertStatus::ErrExists;
        }

        if order == CAP_SLOT_ORDER {
            if self.full {
                return InsertStatus::WarnExists;
            }
            if self.count > 0 {
                return InsertStatus::ErrExists;
            }
            self.full = true;
            return InsertStatus::Ok;
        }

        if order != 0 || virt.get() >= CAP_MAP_MAX || self.full {
            return InsertStatus::ErrExists;
        }

        let slot = virt.get();
        if self.bitmap.is_none() {
            match QuotaBox::new_with(&self.quota, || [0; CAP_BITMAP_WORDS]) {
                Ok(bitmap) => self.bitmap = Some(bitmap),
                Err(_) => return InsertStatus::ErrNomem,
            }
        }
        let Some(bitmap) = self.bitmap.as_mut() else {
            return InsertStatus::ErrNomem;
        };

        let word = &mut bitmap[slot / WORD_BITS];
        let bit = 1 << (slot % WORD_BITS);
        if *word & bit != 0 {
            return InsertStatus::WarnExists;
        }
        *word |= bit;
        self.count += 1;
        InsertStatus::Ok
    }

    fn v_lookup(&self, virt: Vpn) -> Option<Lookup> {
        let slot = virt.get();
        if slot >= CAP_MAP_MAX {
            return None;
        }
        if self.full {
            return Some(Self::whole_space());
        }
        if self.has_slot(slot) {
            return Some(Lookup {
                phys: Pfn::new(slot),
                order: 0,
                attribs: Attribs::RW,
            });
        }
        self.v_fabricate(virt)
    }

    fn v_fabricate(&self, virt: Vpn) -> Option<Lookup> {
        (self.sigma0 && virt.get() < CAP_MAP_MAX).then(Self::whole_space)
    }

    fn v_delete(&mut self, virt: Vpn, order: u32, mask: Attribs) -> Attribs {
        if !mask.removes_mapping() {
            return Attribs::empty();
        }

        if self.full {
            // Only a whole-space revoke takes the whole space away.
            if order == CAP_SLOT_ORDER {
                self.full = false;
                return Attribs::RW;
            }
            return Attribs::empty();
        }

        let start = virt.align_down(order).get();
        let end = start.saturating_add(1 << order).min(CAP_MAP_MAX);
        let Some(bitmap) = self.bitmap.as_mut() else {
            return Attribs::empty();
        };

        let mut removed = 0;
        for slot in start..end {
            let word = &mut bitmap[slot / WORD_BITS];
            let bit = 1 << (slot % WORD_BITS);
            if *word & bit != 0 {
                *word &= !bit;
                removed += 1;
            }
        }
        self.count -= removed;
        if self.count == 0 {
            self.bitmap = None;
        }

        if removed == 0 {
            Attribs::empty()
        } else {
            Attribs::RW
        }
    }

    fn is_mappable(&self, virt: Vpn, order: u32) -> bool {
        match order {
            0 => !self.full && virt.get() < CAP_MAP_MAX,
            CAP_SLOT_ORDER => self.count == 0 && virt.get() == 0,
            _ => false,
        }
    }
}
