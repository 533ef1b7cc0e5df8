//! # Map and unmap
//!
//! The generic algorithm moving access rights between spaces. It is written
//! once against [`Space`] and instantiated per backend; the per-kind entry
//! points and the flexpage dispatch at the bottom feed it.
//!
//! Every call requires the kernel lock, proven by a [`CpuToken`].

use alloc::vec::Vec;

use crate::common::{Pfn, SpaceId, Vpn};
use crate::error::{Error, Result, EREMAPFAILED, ESRCH};
use crate::fpage::{FlexPage, FpageKind};
use crate::mapdb::{Mapdb, Mapdbs, MappingTree, NodeId, TreeKey};
use crate::space::{
    Attribs, CapSpace, InsertStatus, IoSpace, MemSpace, ObjSpace, Space, SpaceDirectory,
};
use crate::sync::CpuToken;

/// What an unmap takes away.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnmapMode {
    /// Remove the mappings.
    Full,
    /// Remove only these rights; removing read access removes the mapping.
    Rights(Attribs),
}

impl UnmapMode {
    pub fn mask(self) -> Attribs {
        match self {
            UnmapMode::Full => Attribs::RIGHTS,
            UnmapMode::Rights(mask) if mask.removes_mapping() => Attribs::RIGHTS,
            UnmapMode::Rights(mask) => mask.rights(),
        }
    }

    pub fn is_full(self) -> bool {
        self.mask().removes_mapping()
    }
}

/// Sender and receiver ranges after clamping, in units of the space.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Window {
    pub snd_addr: Vpn,
    pub rcv_addr: Vpn,
    pub size: usize,
}

pub trait MapTraits: Space {
    /// Fit a send window of `snd_size` units into a receive window of
    /// `rcv_size` units. Sizes are powers of two. The smaller window wins;
    /// `hot_spot` picks where inside the larger one it lands. Identity
    /// mapped spaces transfer the numeric intersection instead.
    fn constraint(
        snd_addr: Vpn,
        snd_size: usize,
        rcv_addr: Vpn,
        rcv_size: usize,
        hot_spot: usize,
    ) -> Option<Window> {
        if snd_size == 0 || rcv_size == 0 {
            return None;
        }

        if Self::IDENTITY_MAP {
            let start = snd_addr.max(rcv_addr);
            let end = snd_addr
                .get()
                .saturating_add(snd_size)
                .min(rcv_addr.get().saturating_add(rcv_size));
            return (start.get() < end).then(|| Window {
                snd_addr: start,
                rcv_addr: start,
                size: end - start.get(),
            });
        }

        if rcv_size >= snd_size {
            let shift = (hot_spot & (rcv_size - 1)) & !(snd_size - 1);
            Some(Window {
                snd_addr,
                rcv_addr: rcv_addr.add(shift),
                size: snd_size,
            })
        } else {
            let shift = (hot_spot & (snd_size - 1)) & !(rcv_size - 1);
            Some(Window {
                snd_addr: snd_addr.add(shift),
                rcv_addr,
                size: rcv_size,
            })
        }
    }
}

impl<S: Space> MapTraits for S {}

/// Map (or with `grant`, move) `snd_size` units at `snd_addr` of space
/// `from_id` to `rcv_addr` of space `to_id`.
///
/// Returns the number of flexpages transferred, 1 if any unit arrived and 0
/// for an empty transfer. Only a receiver out of memory is an error.
#[allow(clippy::too_many_arguments)]
pub fn map<S: Space, D: SpaceDirectory<S>>(
    token: CpuToken<'_>,
    mapdb: &mut Mapdb,
    spaces: &mut D,
    from_id: SpaceId,
    snd_addr: Vpn,
    snd_size: usize,
    to_id: SpaceId,
    rcv_addr: Vpn,
    grant: bool,
    attribs: Attribs,
) -> Result<u8> {
    debug_assert!(token.was_set(), "map without the kernel lock");
    debug_assert_eq!(mapdb.kind(), S::KIND);

    if spaces.space(from_id).is_none() || spaces.space(to_id).is_none() {
        return Err(Error::new(ESRCH));
    }
    if snd_size == 0 || snd_addr.get() >= S::MAP_MAX || rcv_addr.get() >= S::MAP_MAX {
        return Ok(0);
    }
    let size = snd_size
        .min(S::MAP_MAX - snd_addr.get())
        .min(S::MAP_MAX - rcv_addr.get());
    let attribs = attribs.rights();

    let mut transferred = false;
    let mut offset = 0;
    let res = loop {
        if offset >= size {
            break Ok(());
        }
        let unit = MapUnit {
            from_id,
            snd: snd_addr.add(offset),
            to_id,
            rcv: rcv_addr.add(offset),
            remaining: size - offset,
            grant,
            attribs,
        };
        match unit.run::<S, D>(token, mapdb, spaces) {
            Ok((units, mapped)) => {
                transferred |= mapped;
                offset += units;
            }
            Err(err) => break Err(err),
        }
    };

    if grant {
        flush::<S, D>(spaces, from_id);
    }
    flush::<S, D>(spaces, to_id);

    #[cfg(feature = "debug_mapdb")]
    crate::debugger::assert_consistent::<S, D>(mapdb, spaces);

    res.map(|()| u8::from(transferred))
}

/// One step of `map`: the largest chunk starting at `snd` that can move
/// as a single mapping.
struct MapUnit {
    from_id: SpaceId,
    snd: Vpn,
    to_id: SpaceId,
    rcv: Vpn,
    remaining: usize,
    grant: bool,
    attribs: Attribs,
}

impl MapUnit {
    /// Returns the units consumed and whether anything was transferred.
    fn run<S: Space, D: SpaceDirectory<S>>(
        &self,
        token: CpuToken<'_>,
        mapdb: &mut Mapdb,
        spaces: &mut D,
    ) -> Result<(usize, bool)> {
        let (from_id, snd, to_id, rcv) = (self.from_id, self.snd, self.to_id, self.rcv);

        let Some(s) = sender_lookup::<S, D>(spaces, from_id, snd) else {
            return Ok((1, false));
        };
        let s_base = s.base_of(snd);
        let s_phys = s.phys.add(snd.offset_from(s_base));

        let order = mapdb.orders().find(|&order| {
            order <= s.order
                && snd.is_aligned(order)
                && rcv.is_aligned(order)
                && (1usize << order) <= self.remaining
        });
        let Some(order) = order else {
            return Ok((1, false));
        };
        let units = 1usize << order;

        if !spaces.space(to_id).map_or(false, |to| to.is_mappable(rcv, order)) {
            log::debug!("map: {:?} not mappable at {:?} in {:?}", s_phys, rcv, to_id);
            return Ok((units, false));
        }

        if (s.attribs.rights() & self.attribs).is_empty() {
            return Ok((units, false));
        }

        // Nothing may change before the sender is known to hold the frame:
        // either through its node or, with no tree yet, outright.
        let sender_node = mapdb.find(s_phys, from_id, snd);
        if sender_node.is_none() && mapdb.tree_covering(s_phys).is_some() {
            log::debug!("map: {:?} has no mapping node for {:?}", from_id, s_phys);
            return Ok((units, false));
        }
        let full_grant = self.grant
            && match sender_node {
                Some((key, node)) => mapdb
                    .lookup_tree(key)
                    .and_then(|tree| tree.get(node))
                    .map_or(false, |n| n.virt == snd && n.order == order),
                None => s_base == snd && s.order == order,
            };

        // Overmap: whatever the receiver holds at the slot goes first.
        let existing = spaces.space(to_id).and_then(|to| to.v_lookup(rcv));
        if let Some(r) = existing {
            let r_phys = r.phys.add(rcv.offset_from(r.base_of(rcv)));
            let replace = if r_phys != s_phys || r.order != order {
                true
            } else if full_grant {
                let held = mapdb.find(s_phys, to_id, rcv);
                match (sender_node, held) {
                    (Some(sender), Some(held)) if sender == held => false,
                    (Some((key, node)), Some((held_key, held)))
                        if key == held_key
                            && mapdb
                                .lookup_tree(key)
                                .map_or(false, |tree| tree.is_ancestor(held, node)) =>
                    {
                        let returned =
                            return_to_ancestor::<S, D>(mapdb, spaces, key, node, from_id, snd);
                        return Ok((units, returned));
                    }
                    (_, held) => held.is_some(),
                }
            } else {
                false
            };

            if replace {
                log::trace!("map: overmapping {:?} at {:?} in {:?}", r_phys, rcv, to_id);
                unmap::<S, D>(token, mapdb, spaces, to_id, None, rcv, units, true, UnmapMode::Full);
                // The sender may have been derived from what was just revoked.
                if sender_lookup::<S, D>(spaces, from_id, snd) != Some(s) {
                    return Ok((units, false));
                }
            }
        }

        let (key, node, created) = match mapdb.find(s_phys, from_id, snd) {
            Some((key, node)) => (key, node, false),
            None => {
                if mapdb.tree_covering(s_phys).is_some() {
                    return Ok((units, false));
                }
                let rights = s.attribs.rights();
                let Some((key, tree, _)) =
                    mapdb.lookup_or_create_root(s.phys, s.order, from_id, s_base, rights)
                else {
                    return Ok((units, false));
                };
                let Some(root) = tree.root() else {
                    return Ok((units, false));
                };
                (key, root, true)
            }
        };

        let sender = match mapdb.lookup_tree(key).and_then(|tree| tree.get(node)) {
            Some(sender) => (sender.virt, sender.order, sender.rights),
            None => return Ok((units, false)),
        };
        let (sender_virt, sender_order, sender_rights) = sender;
        let i_attribs = s.attribs.rights() & sender_rights & self.attribs;
        let grant = self.grant
            && sender_virt == snd
            && sender_order == order
            && !(from_id == to_id && rcv == snd);

        let status = match spaces.space_mut(to_id) {
            Some(_) if i_attribs.is_empty() => InsertStatus::ErrExists,
            Some(to) => to.v_insert(s_phys, rcv, order, i_attribs),
            None => return Err(Error::new(ESRCH)),
        };

        match status {
            InsertStatus::Ok => {}
            // The receiver already holds the frame; a grant still moves the node.
            InsertStatus::WarnExists | InsertStatus::WarnAttribUpgrade if grant => {}
            InsertStatus::WarnExists => {
                drop_fresh_tree(mapdb, key, created);
                return Ok((units, true));
            }
            InsertStatus::WarnAttribUpgrade => {
                drop_fresh_tree(mapdb, key, created);
                sync_upgraded_rights::<S, D>(mapdb, spaces, key, node, to_id, rcv, order, s_phys);
                return Ok((units, true));
            }
            InsertStatus::ErrNomem => {
                drop_fresh_tree(mapdb, key, created);
                log::warn!("map: {:?} out of memory for {:?} at {:?}", to_id, s_phys, rcv);
                return Err(Error::new(EREMAPFAILED));
            }
            InsertStatus::ErrExists => {
                drop_fresh_tree(mapdb, key, created);
                log::debug!("map: {:?} conflicts at {:?} in {:?}", s_phys, rcv, to_id);
                return Ok((units, false));
            }
        }

        let Some(tree) = mapdb.lookup_tree_mut(key) else {
            return Ok((units, true));
        };

        if grant {
            let removed = sender_rights - i_attribs;
            if !removed.is_empty() {
                let (start, end) = phys_range(tree, node);
                let mode = UnmapMode::Rights(removed);
                revoke_descendants::<S, D>(tree, spaces, node, start, end, None, mode);
            }
            tree.relabel(node, to_id, rcv, i_attribs);
            if let Some(from) = spaces.space_mut(from_id) {
                from.v_delete(snd, order, Attribs::RIGHTS);
            }
            log::trace!("map: granted {:?} from {:?} to {:?}", s_phys, from_id, to_id);
        } else {
            if self.grant {
                log::debug!("map: partial grant of {:?} degrades to map", s_phys);
            }
            tree.insert_child(node, to_id, rcv, s_phys, order, i_attribs);
            log::trace!(
                "map: mapped {:?} from {:?} to {:?} at {:?}",
                s_phys,
                from_id,
                to_id,
                rcv
            );
        }

        Ok((units, true))
    }
}

/// Grant back to a space the frame was derived from: the sender's node goes
/// away and its children move up to its parent.
fn return_to_ancestor<S: Space, D: SpaceDirectory<S>>(
    mapdb: &mut Mapdb,
    spaces: &mut D,
    key: TreeKey,
    node: NodeId,
    from_id: SpaceId,
    snd: Vpn,
) -> bool {
    let Some(removed) = mapdb.lookup_tree_mut(key).and_then(|tree| tree.splice(node)) else {
        return false;
    };
    if let Some(from) = spaces.space_mut(from_id) {
        from.v_delete(snd, removed.order, Attribs::RIGHTS);
    }
    log::trace!("map: {:?} returned {:?} to an ancestor", from_id, removed.phys);
    true
}

/// After the receiver's entry gained rights, bring its node along when the
/// sender is its parent. Otherwise the extra rights are taken back so the
/// entry never holds more than its node.
#[allow(clippy::too_many_arguments)]
fn sync_upgraded_rights<S: Space, D: SpaceDirectory<S>>(
    mapdb: &mut Mapdb,
    spaces: &mut D,
    key: TreeKey,
    sender: NodeId,
    to_id: SpaceId,
    rcv: Vpn,
    order: u32,
    phys: Pfn,
) {
    let Some((held_key, held)) = mapdb.find(phys, to_id, rcv) else {
        return;
    };
    let Some(entry) = spaces.space(to_id).and_then(|to| to.v_lookup(rcv)) else {
        return;
    };
    let Some(tree) = mapdb.lookup_tree_mut(held_key) else {
        return;
    };
    let Some(mapping) = tree.get_mut(held) else {
        return;
    };

    if held_key == key && mapping.parent() == Some(sender) {
        mapping.rights |= entry.attribs.rights();
        return;
    }

    let extra = entry.attribs.rights() - mapping.rights;
    if !extra.is_empty() && !extra.removes_mapping() {
        if let Some(to) = spaces.space_mut(to_id) {
            to.v_delete(rcv, order, extra);
        }
    }
}

fn sender_lookup<S: Space, D: SpaceDirectory<S>>(
    spaces: &D,
    from_id: SpaceId,
    snd: Vpn,
) -> Option<crate::space::Lookup> {
    let from = spaces.space(from_id)?;
    from.v_lookup(snd).or_else(|| from.v_fabricate(snd))
}

fn drop_fresh_tree(mapdb: &mut Mapdb, key: TreeKey, created: bool) {
    if created {
        mapdb.remove_tree(key);
    }
}

fn flush<S: Space, D: SpaceDirectory<S>>(spaces: &mut D, id: SpaceId) {
    if let Some(space) = spaces.space_mut(id) {
        if space.need_tlb_flush() {
            space.tlb_flush();
        }
    }
}

fn phys_range(tree: &MappingTree, node: NodeId) -> (Pfn, Pfn) {
    tree.get(node)
        .map(|n| (n.phys, n.phys.add(n.size())))
        .unwrap_or_default()
}

/// Revoke `unmap` mode from every descendant of `node` whose frames overlap
/// `[start, end)`. With a restriction only subtrees rooted in that space are
/// touched.
fn revoke_descendants<S: Space, D: SpaceDirectory<S>>(
    tree: &mut MappingTree,
    spaces: &mut D,
    node: NodeId,
    start: Pfn,
    end: Pfn,
    restriction: Option<SpaceId>,
    mode: UnmapMode,
) -> Attribs {
    let mut targets = Vec::new();
    let mut stack: Vec<NodeId> = tree
        .get(node)
        .map(|n| n.children().to_vec())
        .unwrap_or_default();
    while let Some(id) = stack.pop() {
        let Some(child) = tree.get(id) else {
            continue;
        };
        if !child.overlaps_phys(start, end) {
            continue;
        }
        if restriction.map_or(true, |space| space == child.space) {
            targets.push(id);
        } else {
            stack.extend(child.children().iter().copied());
        }
    }

    let mut removed = Attribs::empty();
    for target in targets {
        removed |= revoke_subtree::<S, D>(tree, spaces, target, mode);
    }
    removed
}

/// Revoke `node` and everything derived from it.
fn revoke_subtree<S: Space, D: SpaceDirectory<S>>(
    tree: &mut MappingTree,
    spaces: &mut D,
    node: NodeId,
    mode: UnmapMode,
) -> Attribs {
    let mask = mode.mask();
    let mut removed = Attribs::empty();
    for id in tree.subtree(node) {
        let Some(mapping) = tree.get_mut(id) else {
            continue;
        };
        if let Some(space) = spaces.space_mut(mapping.space) {
            removed |= space.v_delete(mapping.virt, mapping.order, mask);
            if space.need_tlb_flush() {
                space.tlb_flush();
            }
        }
        log::trace!("unmap: {:?} loses {:?} at {:?}", mapping.space, mask, mapping.virt);
        mapping.rights.remove(mask);
    }
    if mode.is_full() {
        tree.remove_subtree(node);
    }
    removed
}

/// Revoke what space `space_id` passed on from `[addr, addr + size)`.
///
/// `me_too` also revokes the space's own mappings. A `restriction` limits
/// revocation to subtrees held by that space. Returns the rights removed
/// and the referenced/dirty state harvested from the revoked entries.
#[allow(clippy::too_many_arguments)]
pub fn unmap<S: Space, D: SpaceDirectory<S>>(
    token: CpuToken<'_>,
    mapdb: &mut Mapdb,
    spaces: &mut D,
    space_id: SpaceId,
    restriction: Option<SpaceId>,
    addr: Vpn,
    size: usize,
    me_too: bool,
    mode: UnmapMode,
) -> Attribs {
    debug_assert!(token.was_set(), "unmap without the kernel lock");
    debug_assert_eq!(mapdb.kind(), S::KIND);

    let restriction = restriction.filter(|&space| space != space_id);
    let remove_self = me_too && restriction.is_none();
    let end = addr.get().saturating_add(size).min(S::MAP_MAX);

    let mut removed = Attribs::empty();
    let mut virt = addr;
    while virt.get() < end {
        let Some(lookup) = sender_lookup::<S, D>(spaces, space_id, virt) else {
            virt = virt.add(1);
            continue;
        };
        let base = lookup.base_of(virt);
        let phys = lookup.phys.add(virt.offset_from(base));

        if let Some((key, node)) = mapdb.find(phys, space_id, virt) {
            if let Some(tree) = mapdb.lookup_tree_mut(key) {
                removed |= if remove_self {
                    revoke_subtree::<S, D>(tree, spaces, node, mode)
                } else {
                    let (start, stop) = requested_frames(tree, node, virt, end);
                    revoke_descendants::<S, D>(tree, spaces, node, start, stop, restriction, mode)
                };
            }
            mapdb.remove_if_empty(key);
        }

        virt = base.add(lookup.size());
    }

    #[cfg(feature = "debug_mapdb")]
    crate::debugger::assert_consistent::<S, D>(mapdb, spaces);

    removed
}

/// Frames of `node` that back the virtual range `[virt, end)`.
fn requested_frames(tree: &MappingTree, node: NodeId, virt: Vpn, end: usize) -> (Pfn, Pfn) {
    let Some(n) = tree.get(node) else {
        return (Pfn::default(), Pfn::default());
    };
    let lo = virt.max(n.virt).offset_from(n.virt);
    let hi = end.min(n.virt.get() + n.size()) - n.virt.get();
    (n.phys.add(lo), n.phys.add(hi))
}

/// Address and size in units a flexpage covers in space `S`.
fn fpage_window<S: Space>(fpage: &FlexPage) -> (Vpn, usize) {
    let max_order = S::MAP_MAX.next_power_of_two().trailing_zeros();
    (Vpn::new(fpage.base()), fpage.size_in(max_order))
}

#[allow(clippy::too_many_arguments)]
fn kind_map<S: Space, D: SpaceDirectory<S>>(
    token: CpuToken<'_>,
    mapdb: &mut Mapdb,
    spaces: &mut D,
    from_id: SpaceId,
    snd: FlexPage,
    to_id: SpaceId,
    rcv: FlexPage,
    hot_spot: usize,
    attribs: Attribs,
) -> Result<u8> {
    if snd.kind() != S::KIND || !(rcv.kind() == S::KIND || rcv.is_all_spaces()) {
        return Ok(0);
    }
    let (snd_addr, snd_size) = fpage_window::<S>(&snd);
    let (rcv_addr, rcv_size) = fpage_window::<S>(&rcv);

    let Some(window) = S::constraint(snd_addr, snd_size, rcv_addr, rcv_size, hot_spot) else {
        return Ok(0);
    };
    map::<S, D>(
        token,
        mapdb,
        spaces,
        from_id,
        window.snd_addr,
        window.size,
        to_id,
        window.rcv_addr,
        snd.is_grant(),
        attribs,
    )
}

/// Map memory pages; rights come from the send flexpage.
#[allow(clippy::too_many_arguments)]
pub fn mem_map<D: SpaceDirectory<MemSpace>>(
    token: CpuToken<'_>,
    mapdb: &mut Mapdb,
    spaces: &mut D,
    from_id: SpaceId,
    snd: FlexPage,
    to_id: SpaceId,
    rcv: FlexPage,
    hot_spot: usize,
) -> Result<u8> {
    let attribs = Attribs::from(snd.rights());
    kind_map::<MemSpace, D>(token, mapdb, spaces, from_id, snd, to_id, rcv, hot_spot, attribs)
}

/// Map I/O ports. Ports are identity mapped and carry no partial rights.
#[allow(clippy::too_many_arguments)]
pub fn io_map<D: SpaceDirectory<IoSpace>>(
    token: CpuToken<'_>,
    mapdb: &mut Mapdb,
    spaces: &mut D,
    from_id: SpaceId,
    snd: FlexPage,
    to_id: SpaceId,
    rcv: FlexPage,
    hot_spot: usize,
) -> Result<u8> {
    kind_map::<IoSpace, D>(token, mapdb, spaces, from_id, snd, to_id, rcv, hot_spot, Attribs::RW)
}

/// Map task capability slots, identity mapped like ports.
#[allow(clippy::too_many_arguments)]
pub fn cap_map<D: SpaceDirectory<CapSpace>>(
    token: CpuToken<'_>,
    mapdb: &mut Mapdb,
    spaces: &mut D,
    from_id: SpaceId,
    snd: FlexPage,
    to_id: SpaceId,
    rcv: FlexPage,
    hot_spot: usize,
) -> Result<u8> {
    kind_map::<CapSpace, D>(token, mapdb, spaces, from_id, snd, to_id, rcv, hot_spot, Attribs::RW)
}

#[allow(clippy::too_many_arguments)]
pub fn obj_map<D: SpaceDirectory<ObjSpace>>(
    token: CpuToken<'_>,
    mapdb: &mut Mapdb,
    spaces: &mut D,
    from_id: SpaceId,
    snd: FlexPage,
    to_id: SpaceId,
    rcv: FlexPage,
    hot_spot: usize,
) -> Result<u8> {
    let attribs = Attribs::from(snd.rights());
    kind_map::<ObjSpace, D>(token, mapdb, spaces, from_id, snd, to_id, rcv, hot_spot, attribs)
}

/// Dispatch a send flexpage to the backend of its type.
#[allow(clippy::too_many_arguments)]
pub fn fpage_map<D>(
    token: CpuToken<'_>,
    mapdbs: &mut Mapdbs,
    spaces: &mut D,
    from_id: SpaceId,
    snd: FlexPage,
    to_id: SpaceId,
    rcv: FlexPage,
    hot_spot: usize,
) -> Result<u8>
where
    D: SpaceDirectory<MemSpace>
        + SpaceDirectory<IoSpace>
        + SpaceDirectory<CapSpace>
        + SpaceDirectory<ObjSpace>,
{
    match snd.kind() {
        FpageKind::Memory => {
            mem_map(token, &mut mapdbs.mem, spaces, from_id, snd, to_id, rcv, hot_spot)
        }
        FpageKind::Io => {
            io_map(token, &mut mapdbs.io, spaces, from_id, snd, to_id, rcv, hot_spot)
        }
        FpageKind::Cap => {
            cap_map(token, &mut mapdbs.cap, spaces, from_id, snd, to_id, rcv, hot_spot)
        }
        FpageKind::Obj => {
            obj_map(token, &mut mapdbs.obj, spaces, from_id, snd, to_id, rcv, hot_spot)
        }
        FpageKind::Nil => Ok(0),
    }
}

#[allow(clippy::too_many_arguments)]
fn kind_unmap<S: Space, D: SpaceDirectory<S>>(
    token: CpuToken<'_>,
    mapdb: &mut Mapdb,
    spaces: &mut D,
    space_id: SpaceId,
    restriction: Option<SpaceId>,
    fpage: FlexPage,
    me_too: bool,
    mode: UnmapMode,
) -> Attribs {
    if !(fpage.kind() == S::KIND || fpage.is_all_spaces()) {
        return Attribs::empty();
    }
    let (addr, size) = fpage_window::<S>(&fpage);
    unmap::<S, D>(token, mapdb, spaces, space_id, restriction, addr, size, me_too, mode)
}

/// Revoke the region a flexpage names. The all-spaces flexpage revokes
/// every backend of the space.
#[allow(clippy::too_many_arguments)]
pub fn fpage_unmap<D>(
    token: CpuToken<'_>,
    mapdbs: &mut Mapdbs,
    spaces: &mut D,
    space_id: SpaceId,
    restriction: Option<SpaceId>,
    fpage: FlexPage,
    me_too: bool,
    mode: UnmapMode,
) -> Attribs
where
    D: SpaceDirectory<MemSpace>
        + SpaceDirectory<IoSpace>
        + SpaceDirectory<CapSpace>
        + SpaceDirectory<ObjSpace>,
{
    let mut removed = Attribs::empty();
    removed |= kind_unmap::<MemSpace, D>(
        token,
        &mut mapdbs.mem,
        spaces,
        space_id,
        restriction,
        fpage,
        me_too,
        mode,
    );
    removed |= kind_unmap::<IoSpace, D>(
        token,
        &mut mapdbs.io,
        spaces,
        space_id,
        restriction,
        fpage,
        me_too,
        mode,
    );
    removed |= kind_unmap::<CapSpace, D>(
        token,
        &mut mapdbs.cap,
        spaces,
        space_id,
        restriction,
        fpage,
        me_too,
        mode,
    );
    removed |= kind_unmap::<ObjSpace, D>(
        token,
        &mut mapdbs.obj,
        spaces,
        space_id,
        restriction,
        fpage,
        me_too,
        mode,
    );
    removed
}

#[cfg(test)]
mod tests {
    use alloc::sync::Arc;

    use hashbrown::HashMap;
    use test_log::test;

    use super::*;
    use crate::consts::{IO_PORT_ORDER, MEM_SUPERPAGE_ORDER};
    use crate::debugger::check_consistency;
    use crate::fpage::FpageRights;
    use crate::memory::RamQuota;
    use crate::sync::CpuLock;

    const A: SpaceId = SpaceId::new(1);
    const B: SpaceId = SpaceId::new(2);
    const C: SpaceId = SpaceId::new(3);

    const P: Pfn = Pfn::new(0x100);
    const Q: Pfn = Pfn::new(0x200);

    type MemSpaces = HashMap<SpaceId, MemSpace>;

    fn mem_spaces() -> MemSpaces {
        let quota = RamQuota::new(64 * MemSpace::TABLE_BYTES);
        [A, B, C]
            .into_iter()
            .map(|id| (id, MemSpace::new(Arc::clone(&quota))))
            .collect()
    }

    fn memdb() -> Mapdb {
        Mapdb::new(FpageKind::Memory, &[MEM_SUPERPAGE_ORDER, 0])
    }

    fn own(spaces: &mut MemSpaces, id: SpaceId, virt: usize, phys: Pfn, order: u32) {
        let status = spaces
            .get_mut(&id)
            .map(|space| space.v_insert(phys, Vpn::new(virt), order, Attribs::RW));
        assert_eq!(status, Some(InsertStatus::Ok));
    }

    fn lookup(spaces: &MemSpaces, id: SpaceId, virt: usize) -> Option<crate::space::Lookup> {
        spaces.get(&id).and_then(|space| space.v_lookup(Vpn::new(virt)))
    }

    fn with_token<R>(f: impl FnOnce(CpuToken<'_>) -> R) -> R {
        let lock = CpuLock::new(());
        let mut guard = lock.lock();
        let (_, token) = guard.token_split();
        f(token)
    }

    /// Map `size` pages from `from.0` at `from.1` to `to.0` at `to.1`.
    fn send_range(
        db: &mut Mapdb,
        spaces: &mut MemSpaces,
        from: (SpaceId, usize),
        to: (SpaceId, usize),
        size: usize,
        grant: bool,
        rights: Attribs,
    ) -> Result<u8> {
        with_token(|token| {
            map::<MemSpace, _>(
                token,
                db,
                spaces,
                from.0,
                Vpn::new(from.1),
                size,
                to.0,
                Vpn::new(to.1),
                grant,
                rights,
            )
        })
    }

    fn send(
        db: &mut Mapdb,
        spaces: &mut MemSpaces,
        from: (SpaceId, usize),
        to: (SpaceId, usize),
        grant: bool,
        rights: Attribs,
    ) -> Result<u8> {
        send_range(db, spaces, from, to, 1, grant, rights)
    }

    /// Unrestricted unmap of `size` pages of `id` starting at `virt`.
    fn revoke(
        db: &mut Mapdb,
        spaces: &mut MemSpaces,
        (id, virt): (SpaceId, usize),
        size: usize,
        me_too: bool,
        mode: UnmapMode,
    ) -> Attribs {
        with_token(|token| {
            unmap::<MemSpace, _>(token, db, spaces, id, None, Vpn::new(virt), size, me_too, mode)
        })
    }

    /// A owns P at 0x10, B gets it at 0x20 read-write, C read-only at 0x30.
    fn chain(db: &mut Mapdb, spaces: &mut MemSpaces) {
        own(spaces, A, 0x10, P, 0);
        let ab = send(db, spaces, (A, 0x10), (B, 0x20), false, Attribs::RW);
        let bc = send(db, spaces, (B, 0x20), (C, 0x30), false, Attribs::READ);
        assert_eq!(ab, Ok(1));
        assert_eq!(bc, Ok(1));
    }

    #[test]
    fn map_shares_page() {
        // Given
        let mut db = memdb();
        let mut spaces = mem_spaces();
        own(&mut spaces, A, 0x10, P, 0);

        // When
        let res = send(&mut db, &mut spaces, (A, 0x10), (B, 0x20), false, Attribs::RIGHTS);

        // Then
        assert_eq!(res, Ok(1));
        let b = lookup(&spaces, B, 0x20).expect("B received the page");
        assert_eq!(b.phys, P);
        assert_eq!(b.attribs, Attribs::RW);
        assert!(lookup(&spaces, A, 0x10).is_some());
        let (key, _) = db.find(P, A, Vpn::new(0x10)).expect("A is the root");
        assert_eq!(db.lookup_tree(key).map(MappingTree::len), Some(2));
    }

    #[test]
    fn map_never_widens_rights() {
        let mut db = memdb();
        let mut spaces = mem_spaces();
        chain(&mut db, &mut spaces);

        let res = send(&mut db, &mut spaces, (C, 0x30), (A, 0x50), false, Attribs::RW);

        assert_eq!(res, Ok(1));
        assert_eq!(lookup(&spaces, C, 0x30).map(|l| l.attribs), Some(Attribs::READ));
        assert_eq!(lookup(&spaces, A, 0x50).map(|l| l.attribs), Some(Attribs::READ));
    }

    #[test]
    fn grant_moves_the_node() {
        // Given
        let mut db = memdb();
        let mut spaces = mem_spaces();
        chain(&mut db, &mut spaces);
        let before = lookup(&spaces, B, 0x20);

        // When
        let res = send(&mut db, &mut spaces, (B, 0x20), (C, 0x40), true, Attribs::RW);

        // Then
        assert_eq!(res, Ok(1));
        assert_eq!(lookup(&spaces, B, 0x20), None);
        assert_eq!(lookup(&spaces, C, 0x40), before);
        let (key, node) = db.find(P, C, Vpn::new(0x40)).expect("relabeled node");
        let tree = db.lookup_tree(key).expect("tree survives");
        assert_eq!(tree.len(), 3);
        assert_eq!(tree.depth(node), 1);
        assert_eq!(db.find(P, B, Vpn::new(0x20)), None);
    }

    #[test]
    fn grant_with_fewer_rights_strips_descendants() {
        let mut db = memdb();
        let mut spaces = mem_spaces();
        chain(&mut db, &mut spaces);
        send(&mut db, &mut spaces, (C, 0x30), (A, 0x60), false, Attribs::READ).expect("plain map");

        // When: B hands its page over read-only.
        let res = send(&mut db, &mut spaces, (B, 0x20), (B, 0x70), true, Attribs::READ);

        // Then
        assert_eq!(res, Ok(1));
        assert_eq!(lookup(&spaces, B, 0x70).map(|l| l.attribs), Some(Attribs::READ));
        assert_eq!(lookup(&spaces, C, 0x30).map(|l| l.attribs), Some(Attribs::READ));
        assert_eq!(lookup(&spaces, A, 0x60).map(|l| l.attribs), Some(Attribs::READ));
    }

    #[test]
    fn grant_onto_held_frame_leaves_sender_empty() {
        // Given: A hands P to B read-write and to C read-only
        let mut db = memdb();
        let mut spaces = mem_spaces();
        own(&mut spaces, A, 0x10, P, 0);
        send(&mut db, &mut spaces, (A, 0x10), (B, 0x20), false, Attribs::RW).expect("A to B");
        send(&mut db, &mut spaces, (A, 0x10), (C, 0x30), false, Attribs::READ).expect("A to C");

        // When: B grants its copy onto the slot where C already holds P
        let res = send(&mut db, &mut spaces, (B, 0x20), (C, 0x30), true, Attribs::RW);

        // Then
        assert_eq!(res, Ok(1));
        assert_eq!(lookup(&spaces, B, 0x20), None);
        let c = lookup(&spaces, C, 0x30).expect("C holds P");
        assert_eq!((c.phys, c.attribs), (P, Attribs::RW));
        assert_eq!(db.find(P, B, Vpn::new(0x20)), None);
        let (key, _) = db.find(P, C, Vpn::new(0x30)).expect("granted node");
        assert_eq!(db.lookup_tree(key).map(MappingTree::len), Some(2));
        assert_eq!(check_consistency::<MemSpace, _>(&db, &spaces), Ok(()));
    }

    #[test]
    fn grant_back_to_ancestor_keeps_descendants() {
        // Given: A -> B -> C
        let mut db = memdb();
        let mut spaces = mem_spaces();
        chain(&mut db, &mut spaces);

        // When: B grants P back onto A's own slot
        let res = send(&mut db, &mut spaces, (B, 0x20), (A, 0x10), true, Attribs::RW);

        // Then
        assert_eq!(res, Ok(1));
        assert_eq!(lookup(&spaces, B, 0x20), None);
        assert_eq!(lookup(&spaces, A, 0x10).map(|l| l.attribs), Some(Attribs::RW));
        assert_eq!(lookup(&spaces, C, 0x30).map(|l| l.attribs), Some(Attribs::READ));
        let (key, c) = db.find(P, C, Vpn::new(0x30)).expect("C survives");
        let tree = db.lookup_tree(key).expect("tree survives");
        assert_eq!(tree.len(), 2);
        assert_eq!(tree.depth(c), 1);
        assert_eq!(check_consistency::<MemSpace, _>(&db, &spaces), Ok(()));
    }

    #[test]
    fn remap_with_more_rights_upgrades_child_node() {
        // Given: B got P read-only from A
        let mut db = memdb();
        let mut spaces = mem_spaces();
        own(&mut spaces, A, 0x10, P, 0);
        send(&mut db, &mut spaces, (A, 0x10), (B, 0x20), false, Attribs::READ).expect("read-only");

        // When
        let res = send(&mut db, &mut spaces, (A, 0x10), (B, 0x20), false, Attribs::RW);

        // Then
        assert_eq!(res, Ok(1));
        assert_eq!(lookup(&spaces, B, 0x20).map(|l| l.attribs), Some(Attribs::RW));
        let (key, node) = db.find(P, B, Vpn::new(0x20)).expect("B's node");
        let rights = db.lookup_tree(key).and_then(|tree| tree.get(node)).map(|n| n.rights);
        assert_eq!(rights, Some(Attribs::RW));
        assert_eq!(db.lookup_tree(key).map(MappingTree::len), Some(2));
    }

    #[test]
    fn upgrade_from_non_parent_is_taken_back() {
        // Given: A -> B (RW) -> C (READ)
        let mut db = memdb();
        let mut spaces = mem_spaces();
        chain(&mut db, &mut spaces);

        // When: A offers C write access at the same slot
        let res = send(&mut db, &mut spaces, (A, 0x10), (C, 0x30), false, Attribs::RW);

        // Then
        assert_eq!(res, Ok(1));
        assert_eq!(lookup(&spaces, C, 0x30).map(|l| l.attribs), Some(Attribs::READ));
        assert_eq!(check_consistency::<MemSpace, _>(&db, &spaces), Ok(()));
    }

    #[test]
    fn untracked_sender_leaves_receiver_alone() {
        // Given: B holds Q from A; C has P in its page table but no node
        let mut db = memdb();
        let mut spaces = mem_spaces();
        own(&mut spaces, A, 0x10, P, 0);
        own(&mut spaces, A, 0x11, Q, 0);
        own(&mut spaces, C, 0x30, P, 0);
        send(&mut db, &mut spaces, (A, 0x10), (B, 0x20), false, Attribs::RW).expect("P to B");
        send(&mut db, &mut spaces, (A, 0x11), (B, 0x21), false, Attribs::RW).expect("Q to B");

        // When
        let res = send(&mut db, &mut spaces, (C, 0x30), (B, 0x21), false, Attribs::RW);

        // Then
        assert_eq!(res, Ok(0));
        assert_eq!(lookup(&spaces, B, 0x21).map(|l| l.phys), Some(Q));
        assert!(db.find(Q, B, Vpn::new(0x21)).is_some());
    }

    #[test]
    fn recursive_unmap_clears_every_descendant() {
        // Given
        let mut db = memdb();
        let mut spaces = mem_spaces();
        chain(&mut db, &mut spaces);
        own(&mut spaces, A, 0x11, Q, 0);
        send(&mut db, &mut spaces, (A, 0x11), (B, 0x21), false, Attribs::RW).expect("Q to B");

        // When: unrelated page first, then P itself.
        let removed_q = revoke(&mut db, &mut spaces, (A, 0x11), 1, true, UnmapMode::Full);
        let p_untouched = (lookup(&spaces, B, 0x20), lookup(&spaces, C, 0x30));
        let removed_p = revoke(&mut db, &mut spaces, (A, 0x10), 1, true, UnmapMode::Full);

        // Then
        assert_eq!(removed_q, Attribs::RW);
        assert!(p_untouched.0.is_some() && p_untouched.1.is_some());
        assert_eq!(removed_p, Attribs::RW);
        for (id, virt) in [(A, 0x10), (B, 0x20), (C, 0x30), (A, 0x11), (B, 0x21)] {
            assert_eq!(lookup(&spaces, id, virt), None, "{id:?} at {virt:#x}");
        }
        assert_eq!(db.tree_count(), 0);
    }

    #[test]
    fn subtree_unmap_keeps_own_mapping() {
        let mut db = memdb();
        let mut spaces = mem_spaces();
        chain(&mut db, &mut spaces);
        let own_before = lookup(&spaces, B, 0x20);

        let removed = revoke(&mut db, &mut spaces, (B, 0x20), 1, false, UnmapMode::Full);

        assert_eq!(removed, Attribs::READ);
        assert_eq!(lookup(&spaces, B, 0x20), own_before);
        assert_eq!(lookup(&spaces, C, 0x30), None);
        assert!(db.find(P, B, Vpn::new(0x20)).is_some());
        assert_eq!(db.find(P, C, Vpn::new(0x30)), None);
    }

    #[test]
    fn empty_transfers_change_nothing() {
        // Given
        let mut db = memdb();
        let mut spaces = mem_spaces();
        own(&mut spaces, A, 0x10, P, 0);

        // When
        let (db, spaces) = (&mut db, &mut spaces);
        let zero_size = send_range(db, spaces, (A, 0x10), (B, 0x20), 0, false, Attribs::RW);
        let unowned = send_range(db, spaces, (A, 0x90), (B, 0x20), 4, false, Attribs::RW);
        let no_rights = send(db, spaces, (A, 0x10), (B, 0x20), false, Attribs::EXEC);

        // Then
        assert_eq!((zero_size, unowned, no_rights), (Ok(0), Ok(0), Ok(0)));
        assert_eq!(lookup(spaces, B, 0x20), None);
        assert_eq!(db.tree_count(), 0);
    }

    #[test]
    fn unknown_space_is_an_error() {
        let mut db = memdb();
        let mut spaces = mem_spaces();
        let stranger = SpaceId::new(99);
        let res = send(&mut db, &mut spaces, (A, 0), (stranger, 0), false, Attribs::RW);
        assert_eq!(res, Err(Error::new(ESRCH)));
    }

    #[test]
    fn receiver_out_of_memory_is_remap_failure() {
        // Given
        let mut db = memdb();
        let mut spaces = mem_spaces();
        spaces.insert(B, MemSpace::new(RamQuota::new(MemSpace::TABLE_BYTES - 1)));
        own(&mut spaces, A, 0x10, P, 0);

        // When
        let res = send(&mut db, &mut spaces, (A, 0x10), (B, 0x20), false, Attribs::RW);

        // Then
        assert_eq!(res, Err(Error::new(EREMAPFAILED)));
        assert_eq!(lookup(&spaces, B, 0x20), None);
        assert_eq!(db.tree_count(), 0);
    }

    #[test]
    fn overmap_replaces_receiver_subtree() {
        // Given
        let mut db = memdb();
        let mut spaces = mem_spaces();
        chain(&mut db, &mut spaces);
        own(&mut spaces, A, 0x11, Q, 0);

        // When
        let res = send(&mut db, &mut spaces, (A, 0x11), (B, 0x20), false, Attribs::RW);

        // Then
        assert_eq!(res, Ok(1));
        assert_eq!(lookup(&spaces, B, 0x20).map(|l| l.phys), Some(Q));
        assert_eq!(lookup(&spaces, C, 0x30), None);
        let (p_tree, _) = db.find(P, A, Vpn::new(0x10)).expect("A keeps P");
        assert_eq!(db.lookup_tree(p_tree).map(MappingTree::len), Some(1));
    }

    #[test]
    fn identical_remap_is_idempotent() {
        let mut db = memdb();
        let mut spaces = mem_spaces();
        chain(&mut db, &mut spaces);

        let res = send(&mut db, &mut spaces, (A, 0x10), (B, 0x20), false, Attribs::RW);

        assert_eq!(res, Ok(1));
        let (key, _) = db.find(P, A, Vpn::new(0x10)).expect("tree");
        assert_eq!(db.lookup_tree(key).map(MappingTree::len), Some(3));
        assert_eq!(lookup(&spaces, C, 0x30).map(|l| l.attribs), Some(Attribs::READ));
    }

    #[test]
    fn rights_revocation_downgrades_descendants() {
        // Given
        let mut db = memdb();
        let mut spaces = mem_spaces();
        chain(&mut db, &mut spaces);

        // When
        let mode = UnmapMode::Rights(Attribs::WRITE);
        let removed = revoke(&mut db, &mut spaces, (A, 0x10), 1, false, mode);

        // Then
        assert_eq!(removed, Attribs::WRITE);
        assert_eq!(lookup(&spaces, A, 0x10).map(|l| l.attribs), Some(Attribs::RW));
        assert_eq!(lookup(&spaces, B, 0x20).map(|l| l.attribs), Some(Attribs::READ));
        assert_eq!(lookup(&spaces, C, 0x30).map(|l| l.attribs), Some(Attribs::READ));
        let (key, _) = db.find(P, A, Vpn::new(0x10)).expect("tree");
        assert_eq!(db.lookup_tree(key).map(MappingTree::len), Some(3));
    }

    #[test]
    fn read_revocation_is_full_unmap() {
        assert!(UnmapMode::Rights(Attribs::READ).is_full());
        assert_eq!(UnmapMode::Rights(Attribs::WRITE | Attribs::DIRTY).mask(), Attribs::WRITE);
    }

    #[test]
    fn restricted_unmap_spares_other_subtrees() {
        // Given: A -> B and A -> C
        let mut db = memdb();
        let mut spaces = mem_spaces();
        own(&mut spaces, A, 0x10, P, 0);
        send(&mut db, &mut spaces, (A, 0x10), (B, 0x20), false, Attribs::RW).expect("A to B");
        send(&mut db, &mut spaces, (A, 0x10), (C, 0x30), false, Attribs::RW).expect("A to C");

        // When
        let removed = with_token(|token| {
            let (a, mode) = (Vpn::new(0x10), UnmapMode::Full);
            unmap::<MemSpace, _>(token, &mut db, &mut spaces, A, Some(C), a, 1, true, mode)
        });

        // Then
        assert_eq!(removed, Attribs::RW);
        assert_eq!(lookup(&spaces, C, 0x30), None);
        assert!(lookup(&spaces, B, 0x20).is_some());
        assert!(lookup(&spaces, A, 0x10).is_some());
    }

    #[test]
    fn unmap_reports_dirty_descendants() {
        let mut db = memdb();
        let mut spaces = mem_spaces();
        chain(&mut db, &mut spaces);
        assert_eq!(spaces.get_mut(&B).map(|b| b.touch(Vpn::new(0x20), true)), Some(true));

        let removed = revoke(&mut db, &mut spaces, (A, 0x10), 1, false, UnmapMode::Full);

        assert!(removed.contains(Attribs::DIRTY | Attribs::REFERENCED));
        assert!(removed.contains(Attribs::RW));
    }

    #[test]
    fn unmap_without_tree_is_a_noop() {
        let mut db = memdb();
        let mut spaces = mem_spaces();
        own(&mut spaces, A, 0x10, P, 0);

        let removed = revoke(&mut db, &mut spaces, (A, 0), 0x100, true, UnmapMode::Full);

        assert_eq!(removed, Attribs::empty());
        assert!(lookup(&spaces, A, 0x10).is_some());
    }

    #[cfg(feature = "superpages")]
    #[test]
    fn superpage_maps_whole_and_in_pieces() {
        // Given: A owns a 4 MiB superpage
        let mut db = memdb();
        let mut spaces = mem_spaces();
        own(&mut spaces, A, 0x400, Pfn::new(0x800), MEM_SUPERPAGE_ORDER);

        // When
        let (db, spaces) = (&mut db, &mut spaces);
        let whole = send_range(db, spaces, (A, 0x400), (B, 0xc00), 0x400, false, Attribs::RW);
        let piece = send(db, spaces, (B, 0xc05), (C, 0x7), false, Attribs::READ);
        let partial_grant = send(db, spaces, (A, 0x406), (C, 0x8), true, Attribs::RW);

        // Then
        assert_eq!((whole, piece, partial_grant), (Ok(1), Ok(1), Ok(1)));
        assert_eq!(lookup(spaces, B, 0xc00).map(|l| l.order), Some(MEM_SUPERPAGE_ORDER));
        assert_eq!(lookup(spaces, C, 0x7).map(|l| l.phys), Some(Pfn::new(0x805)));
        assert_eq!(lookup(spaces, C, 0x8).map(|l| l.phys), Some(Pfn::new(0x806)));
        assert_eq!(lookup(spaces, A, 0x400).map(|l| l.order), Some(MEM_SUPERPAGE_ORDER));
        assert_eq!(db.tree_count(), 1);

        let removed = revoke(db, spaces, (A, 0x400), 1, true, UnmapMode::Full);
        assert!(removed.contains(Attribs::RW));
        for (id, virt) in [(A, 0x400), (B, 0xc00), (C, 0x7), (C, 0x8)] {
            assert_eq!(lookup(spaces, id, virt), None, "{id:?} at {virt:#x}");
        }
        assert_eq!(db.tree_count(), 0);
    }

    #[test]
    fn constraint_places_window_at_hot_spot() {
        // Given: 4 pages sent into a 16 page receive window
        let window = MemSpace::constraint(Vpn::new(0x40), 4, Vpn::new(0x100), 16, 0x29);

        // Then
        assert_eq!(
            window,
            Some(Window {
                snd_addr: Vpn::new(0x40),
                rcv_addr: Vpn::new(0x108),
                size: 4,
            })
        );

        let shrunk = MemSpace::constraint(Vpn::new(0x40), 16, Vpn::new(0x100), 4, 0x29);
        assert_eq!(shrunk.map(|w| (w.snd_addr, w.size)), Some((Vpn::new(0x48), 4)));
    }

    #[test]
    fn identity_spaces_intersect_windows() {
        let window = IoSpace::constraint(Vpn::new(0x60), 16, Vpn::new(0x68), 16, 0);
        assert_eq!(
            window,
            Some(Window {
                snd_addr: Vpn::new(0x68),
                rcv_addr: Vpn::new(0x68),
                size: 8,
            })
        );
        assert_eq!(IoSpace::constraint(Vpn::new(0x60), 8, Vpn::new(0x70), 8, 0), None);
    }

    #[test]
    fn sigma0_ports_flow_through_io_map() {
        // Given
        let quota = RamQuota::new(4 * IoSpace::BITMAP_BYTES);
        let mut db = Mapdb::new(FpageKind::Io, &[IO_PORT_ORDER, 0]);
        let mut spaces: HashMap<SpaceId, IoSpace> = HashMap::new();
        spaces.insert(A, IoSpace::new_sigma0(Arc::clone(&quota)));
        spaces.insert(B, IoSpace::new(Arc::clone(&quota)));

        // When: sigma0 offers 0x60..0x70, B accepts 0x68..0x78
        let (offer, accept) = (FlexPage::io(0x60, 4), FlexPage::io(0x68, 3));
        let res = with_token(|token| io_map(token, &mut db, &mut spaces, A, offer, B, accept, 0));

        // Then
        assert_eq!(res, Ok(1));
        let b = spaces.get(&B).expect("B exists");
        assert_eq!(b.mapped_ports(), 8);
        assert!(b.v_lookup(Vpn::new(0x68)).is_some());
        assert!(b.v_lookup(Vpn::new(0x67)).is_none());

        let removed = with_token(|token| {
            let (start, all, mode) = (Vpn::new(0), 1 << IO_PORT_ORDER, UnmapMode::Full);
            unmap::<IoSpace, _>(token, &mut db, &mut spaces, A, None, start, all, false, mode)
        });
        assert_eq!(removed, Attribs::RW);
        assert_eq!(spaces.get(&B).map(IoSpace::mapped_ports), Some(0));
        assert_eq!(spaces.get(&A).map(IoSpace::mapped_ports), Some(1 << IO_PORT_ORDER));
    }

    #[test]
    fn mismatched_receive_type_transfers_nothing() {
        let mut db = memdb();
        let mut spaces = mem_spaces();
        own(&mut spaces, A, 0x10, P, 0);

        let (offer, accept) = (FlexPage::memory(0x10, 0, FpageRights::RW), FlexPage::io(0, 4));
        let res = with_token(|token| mem_map(token, &mut db, &mut spaces, A, offer, B, accept, 0));

        assert_eq!(res, Ok(0));
        assert_eq!(lookup(&spaces, B, 0), None);
    }
}
