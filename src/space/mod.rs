//! # Space backends
//!
//! A space is one task's view of one resource domain. The mapping
//! algorithm is generic over [`Space`] and is monomorphized once per
//! backend:
//!
//! - [`MemSpace`]: page table, 4 KiB pages and 4 MiB superpages
//! - [`IoSpace`]: I/O permission bitmap, one port per unit, identity mapped
//! - [`CapSpace`]: task capability bitmap, one slot per unit, identity mapped
//! - [`ObjSpace`]: kernel object slot array, one slot per unit
//!
//! Addresses and sizes are always counted in the backend's own unit; sizes
//! are passed as orders (log2 of the unit count).

use bitflags::bitflags;
use hashbrown::HashMap;

use crate::common::{Pfn, SpaceId, Vpn};
use crate::fpage::{FpageKind, FpageRights};

pub use self::cap::CapSpace;
pub use self::io::IoSpace;
pub use self::mem::MemSpace;
pub use self::obj::ObjSpace;

pub mod cap;
pub mod io;
pub mod mem;
pub mod obj;

bitflags! {
    /// Access rights of a mapping, plus the status bits hardware leaves
    /// behind in memory mappings.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct Attribs: u8 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
        const EXEC = 1 << 2;
        const REFERENCED = 1 << 3;
        const DIRTY = 1 << 4;

        const RW = Self::READ.bits() | Self::WRITE.bits();
        const RIGHTS = Self::READ.bits() | Self::WRITE.bits() | Self::EXEC.bits();
        const STATUS = Self::REFERENCED.bits() | Self::DIRTY.bits();
    }
}

impl From<FpageRights> for Attribs {
    fn from(rights: FpageRights) -> Self {
        let mut attribs = Attribs::empty();
        attribs.set(Attribs::READ, rights.contains(FpageRights::R));
        attribs.set(Attribs::WRITE, rights.contains(FpageRights::W));
        attribs.set(Attribs::EXEC, rights.contains(FpageRights::X));
        attribs
    }
}

impl Attribs {
    pub fn rights(self) -> Attribs {
        self & Attribs::RIGHTS
    }

    /// A mask that removes read access removes the mapping altogether.
    pub fn removes_mapping(self) -> bool {
        self.contains(Attribs::READ)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InsertStatus {
    Ok,
    /// The identical mapping is already present; nothing changed.
    WarnExists,
    /// The same frame was already mapped with fewer rights; rights added.
    WarnAttribUpgrade,
    /// Backing store could not be charged; nothing changed.
    ErrNomem,
    /// A different mapping occupies the slot.
    ErrExists,
}

/// Result of a backend lookup: the mapping containing the queried address.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Lookup {
    /// Frame number (or object id) backing the first unit of the mapping
    pub phys: Pfn,
    pub order: u32,
    pub attribs: Attribs,
}

impl Lookup {
    pub fn size(&self) -> usize {
        1 << self.order
    }

    /// Start of the mapping that contains `virt`.
    pub fn base_of(&self, virt: Vpn) -> Vpn {
        virt.align_down(self.order)
    }
}

/// The uniform backend contract the mapping algorithm is written against.
pub trait Space {
    /// Flexpage type addressing this space
    const KIND: FpageKind;
    /// Order of the largest mapping the backend stores in one entry
    const SUPERPAGE_ORDER: u32;
    const HAS_SUPERPAGE: bool;
    /// One past the highest mappable address
    const MAP_MAX: usize;
    /// Senders and receivers must use the same address (ports, task caps).
    const IDENTITY_MAP: bool;

    /// Enter a mapping of `1 << order` units at `virt` backed by `phys`.
    fn v_insert(&mut self, phys: Pfn, virt: Vpn, order: u32, attribs: Attribs) -> InsertStatus;

    fn v_lookup(&self, virt: Vpn) -> Option<Lookup>;

    /// Synthesize a mapping the space implicitly owns, used for sigma0.
    fn v_fabricate(&self, _virt: Vpn) -> Option<Lookup> {
        None
    }

    /// Remove the rights in `mask` from the mapping covering `virt`;
    /// dropping READ removes the mapping. Returns the rights removed and
    /// any status bits harvested, or empty if nothing was mapped.
    fn v_delete(&mut self, virt: Vpn, order: u32, mask: Attribs) -> Attribs;

    fn is_mappable(&self, virt: Vpn, order: u32) -> bool;

    fn tlb_flush(&mut self) {}

    fn need_tlb_flush(&self) -> bool {
        false
    }
}

/// Resolves space ids to backends so the algorithm can reach every space
/// that appears in a mapping tree.
pub trait SpaceDirectory<S: Space> {
    fn space(&self, id: SpaceId) -> Option<&S>;
    fn space_mut(&mut self, id: SpaceId) -> Option<&mut S>;
}

impl<S: Space> SpaceDirectory<S> for HashMap<SpaceId, S> {
    fn space(&self, id: SpaceId) -> Option<&S> {
        self.get(&id)
    }

    fn space_mut(&mut self, id: SpaceId) -> Option<&mut S> {
        self.get_mut(&id)
    }
}

/// Shared insert rule for re-inserting an already present frame.
pub(crate) fn upgrade_or_exists(existing: &mut Attribs, new: Attribs) -> InsertStatus {
    let new = new.rights();
    if existing.rights().contains(new) {
        InsertStatus::WarnExists
    } else {
        *existing |= new;
        InsertStatus::WarnAttribUpgrade
    }
}

/// Shared delete rule for one entry. Returns the bits to report and whether
/// the entry has to go.
pub(crate) fn strip(entry: &mut Attribs, mask: Attribs) -> (Attribs, bool) {
    let status = *entry & Attribs::STATUS;
    if mask.removes_mapping() {
        return (entry.rights() | status, true);
    }
    let removed = entry.rights() & mask;
    entry.remove(removed | Attribs::STATUS);
    (removed | status, false)
}
