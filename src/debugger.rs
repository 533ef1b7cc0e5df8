use hashbrown::HashSet;

use crate::common::{Pfn, SpaceId, Vpn};
use crate::mapdb::{Mapdb, MappingTree, TreeKey};
use crate::space::{Space, SpaceDirectory};

/// The first problem found by [`check_consistency`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Inconsistency {
    /// A tree without nodes was left in the database.
    EmptyTree(TreeKey),
    /// A node whose space does not map anything at its address.
    MissingEntry { key: TreeKey, space: SpaceId, virt: Vpn },
    /// A node whose space maps a different frame at its address.
    WrongFrame {
        key: TreeKey,
        space: SpaceId,
        virt: Vpn,
        expected: Pfn,
        found: Pfn,
    },
    /// A node holding rights its parent does not have.
    RightsWiden { key: TreeKey, space: SpaceId, virt: Vpn },
    /// Two nodes claim the same address of the same space.
    Duplicate { space: SpaceId, virt: Vpn },
}

/// Print one tree through the log, children indented below their parent.
pub fn dump_tree(key: TreeKey, tree: &MappingTree) {
    log::info!("tree {:?} base {:?}: {} nodes", key, key.base(), tree.len());
    let Some(root) = tree.root() else {
        return;
    };
    for id in tree.subtree(root) {
        let Some(node) = tree.get(id) else {
            continue;
        };
        log::info!(
            "{:indent$}{:?} {:?} -> {:?} order {} {:?}",
            "",
            node.space,
            node.virt,
            node.phys,
            node.order,
            node.rights,
            indent = 2 * (tree.depth(id) + 1),
        );
    }
}

pub fn dump_mapdb(mapdb: &Mapdb) {
    log::info!("mapdb {:?}: {} trees", mapdb.kind(), mapdb.tree_count());
    for (key, tree) in mapdb.trees() {
        dump_tree(key, tree);
    }
}

/// Verify that the database agrees with the backends: every node is backed
/// by a live entry for its frame, children never hold more rights than
/// their parent, and no empty tree is kept around.
pub fn check_consistency<S: Space, D: SpaceDirectory<S>>(
    mapdb: &Mapdb,
    spaces: &D,
) -> Result<(), Inconsistency> {
    let mut seen = HashSet::new();

    for (key, tree) in mapdb.trees() {
        if tree.is_empty() {
            return Err(Inconsistency::EmptyTree(key));
        }

        for (_, node) in tree.iter() {
            let (space, virt) = (node.space, node.virt);

            if !seen.insert((space, virt)) {
                return Err(Inconsistency::Duplicate { space, virt });
            }

            let entry = spaces
                .space(space)
                .and_then(|s| s.v_lookup(virt).or_else(|| s.v_fabricate(virt)));
            let Some(entry) = entry else {
                return Err(Inconsistency::MissingEntry { key, space, virt });
            };
            let found = entry.phys.add(virt.offset_from(entry.base_of(virt)));
            if found != node.phys {
                return Err(Inconsistency::WrongFrame {
                    key,
                    space,
                    virt,
                    expected: node.phys,
                    found,
                });
            }

            let parent = node.parent().and_then(|parent| tree.get(parent));
            if let Some(parent) = parent {
                if !parent.rights.rights().contains(node.rights.rights()) {
                    return Err(Inconsistency::RightsWiden { key, space, virt });
                }
            }
        }
    }

    Ok(())
}

/// Panic with a dump of the database if it is inconsistent.
pub fn assert_consistent<S: Space, D: SpaceDirectory<S>>(mapdb: &Mapdb, spaces: &D) {
    if let Err(err) = check_consistency::<S, D>(mapdb, spaces) {
        dump_mapdb(mapdb);
        panic!("mapdb inconsistent: {:?}", err);
    }
}

#[cfg(test)]
mod tests {
    use alloc::sync::Arc;

    use hashbrown::HashMap;
    use test_log::test;

    use super::*;
    use crate::fpage::FpageKind;
    use crate::memory::RamQuota;
    use crate::space::{Attribs, MemSpace};

    fn setup() -> (Mapdb, HashMap<SpaceId, MemSpace>) {
        let quota = RamQuota::new(4 * MemSpace::TABLE_BYTES);
        let mut spaces = HashMap::new();
        for id in 1..=2 {
            spaces.insert(SpaceId::new(id), MemSpace::new(Arc::clone(&quota)));
        }
        (Mapdb::new(FpageKind::Memory, &[0]), spaces)
    }

    #[test]
    fn backed_tree_is_consistent() {
        // Given
        let (mut db, mut spaces) = setup();
        let a = SpaceId::new(1);
        if let Some(space) = spaces.get_mut(&a) {
            space.v_insert(Pfn::new(0x42), Vpn::new(0x10), 0, Attribs::RW);
        }

        // When
        db.lookup_or_create_root(Pfn::new(0x42), 0, a, Vpn::new(0x10), Attribs::RW);

        // Then
        assert_eq!(check_consistency::<MemSpace, _>(&db, &spaces), Ok(()));
        dump_mapdb(&db);
    }

    #[test]
    fn dangling_node_is_reported() {
        let (mut db, spaces) = setup();
        let b = SpaceId::new(2);
        let (key, _, _) = db
            .lookup_or_create_root(Pfn::new(0x42), 0, b, Vpn::new(0x20), Attribs::RW)
            .expect("class 0");

        assert_eq!(
            check_consistency::<MemSpace, _>(&db, &spaces),
            Err(Inconsistency::MissingEntry {
                key,
                space: b,
                virt: Vpn::new(0x20),
            })
        );
    }

    #[test]
    fn widened_child_is_reported() {
        // Given
        let (mut db, mut spaces) = setup();
        let (a, b) = (SpaceId::new(1), SpaceId::new(2));
        for (id, virt) in [(a, 0x10), (b, 0x20)] {
            if let Some(space) = spaces.get_mut(&id) {
                space.v_insert(Pfn::new(0x42), Vpn::new(virt), 0, Attribs::RW);
            }
        }
        let (key, tree, _) = db
            .lookup_or_create_root(Pfn::new(0x42), 0, a, Vpn::new(0x10), Attribs::READ)
            .expect("class 0");

        // When
        let root = tree.root().expect("root");
        tree.insert_child(root, b, Vpn::new(0x20), Pfn::new(0x42), 0, Attribs::RW);

        // Then
        assert_eq!(
            check_consistency::<MemSpace, _>(&db, &spaces),
            Err(Inconsistency::RightsWiden {
                key,
                space: b,
                virt: Vpn::new(0x20),
            })
        );
    }
}
