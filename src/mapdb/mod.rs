//! # Mapping database
//!
//! One [`Mapdb`] per resource kind records, for every resource unit that is
//! mapped anywhere, the tree of who derived access from whom. Trees are
//! partitioned by size class so a superpage mapping is found with a single
//! lookup without splitting it into base-page trees.

use arrayvec::ArrayVec;
use hashbrown::HashMap;

use crate::common::{Pfn, SpaceId, Vpn};
use crate::consts::MAX_SIZE_CLASSES;
use crate::fpage::FpageKind;
use crate::space::{Attribs, CapSpace, IoSpace, MemSpace, ObjSpace, Space};

pub use self::tree::{Mapping, MappingTree, NodeId};

pub mod tree;

/// Position of a tree in the database: size class and frame key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TreeKey {
    pub order: u32,
    pub key: usize,
}

impl TreeKey {
    fn of(order: u32, phys: Pfn) -> Self {
        Self {
            order,
            key: phys.get() >> order,
        }
    }

    /// First frame covered by the tree.
    pub fn base(&self) -> Pfn {
        Pfn::new(self.key << self.order)
    }
}

#[derive(Debug)]
struct SizeClass {
    order: u32,
    trees: HashMap<usize, MappingTree>,
}

#[derive(Debug)]
pub struct Mapdb {
    kind: FpageKind,
    /// Largest class first
    classes: ArrayVec<SizeClass, MAX_SIZE_CLASSES>,
}

impl Mapdb {
    /// Create a database for the given size classes, in orders of the
    /// backend's unit. Order 0 is always present.
    pub fn new(kind: FpageKind, orders: &[u32]) -> Self {
        let mut sorted: ArrayVec<u32, MAX_SIZE_CLASSES> = ArrayVec::new();
        for &order in orders.iter().chain(core::iter::once(&0)) {
            if !sorted.contains(&order) && !sorted.is_full() {
                sorted.push(order);
            }
        }
        sorted.sort_unstable_by(|a, b| b.cmp(a));

        Self {
            kind,
            classes: sorted
                .into_iter()
                .map(|order| SizeClass {
                    order,
                    trees: HashMap::new(),
                })
                .collect(),
        }
    }

    /// Database sized for backend `S`: its superpage class if it has one,
    /// plus the base unit.
    pub fn for_space<S: Space>() -> Self {
        if S::HAS_SUPERPAGE {
            Self::new(S::KIND, &[S::SUPERPAGE_ORDER, 0])
        } else {
            Self::new(S::KIND, &[0])
        }
    }

    pub fn kind(&self) -> FpageKind {
        self.kind
    }

    /// Configured class orders, largest first.
    pub fn orders(&self) -> impl Iterator<Item = u32> + '_ {
        self.classes.iter().map(|class| class.order)
    }

    /// Smallest configured class that holds a mapping of `order`, or the
    /// largest class if none is big enough.
    pub fn size_class(&self, order: u32) -> u32 {
        self.orders()
            .filter(|&class| class >= order)
            .last()
            .or_else(|| self.orders().next())
            .unwrap_or(0)
    }

    fn class(&self, order: u32) -> Option<&SizeClass> {
        self.classes.iter().find(|class| class.order == order)
    }

    fn class_mut(&mut self, order: u32) -> Option<&mut SizeClass> {
        self.classes.iter_mut().find(|class| class.order == order)
    }

    /// Key of the tree a root mapping of `order` at `phys` belongs in.
    pub fn tree_key(&self, phys: Pfn, order: u32) -> TreeKey {
        TreeKey::of(self.size_class(order), phys)
    }

    pub fn lookup_tree(&self, key: TreeKey) -> Option<&MappingTree> {
        self.class(key.order)?.trees.get(&key.key)
    }

    pub fn lookup_tree_mut(&mut self, key: TreeKey) -> Option<&mut MappingTree> {
        self.class_mut(key.order)?.trees.get_mut(&key.key)
    }

    /// Any tree covering frame `phys`, largest class first.
    pub fn tree_covering(&self, phys: Pfn) -> Option<TreeKey> {
        self.classes
            .iter()
            .map(|class| TreeKey::of(class.order, phys))
            .find(|key| self.lookup_tree(*key).is_some())
    }

    /// Locate the node through which `space` maps frame `phys` at `virt`.
    pub fn find(&self, phys: Pfn, space: SpaceId, virt: Vpn) -> Option<(TreeKey, NodeId)> {
        self.classes.iter().find_map(|class| {
            let key = TreeKey::of(class.order, phys);
            let node = class.trees.get(&key.key)?.find(space, virt)?;
            Some((key, node))
        })
    }

    /// Return the tree for the resource, creating it with the given owner
    /// as root if it does not exist yet. The flag reports a fresh tree.
    pub fn lookup_or_create_root(
        &mut self,
        phys: Pfn,
        order: u32,
        owner: SpaceId,
        owner_virt: Vpn,
        rights: Attribs,
    ) -> Option<(TreeKey, &mut MappingTree, bool)> {
        let key = self.tree_key(phys, order);
        let class = self.class_mut(key.order)?;
        let mut created = false;
        let tree = class.trees.entry(key.key).or_insert_with(|| {
            created = true;
            MappingTree::new(owner, owner_virt, phys, order, rights)
        });
        Some((key, tree, created))
    }

    pub fn remove_tree(&mut self, key: TreeKey) -> Option<MappingTree> {
        self.class_mut(key.order)?.trees.remove(&key.key)
    }

    /// Drop the tree if its last node is gone.
    pub fn remove_if_empty(&mut self, key: TreeKey) {
        if self.lookup_tree(key).map_or(false, MappingTree::is_empty) {
            self.remove_tree(key);
        }
    }

    pub fn tree_count(&self) -> usize {
        self.classes.iter().map(|class| class.trees.len()).sum()
    }

    pub fn trees(&self) -> impl Iterator<Item = (TreeKey, &MappingTree)> + '_ {
        self.classes.iter().flat_map(|class| {
            class
                .trees
                .iter()
                .map(move |(&key, tree)| (TreeKey { order: class.order, key }, tree))
        })
    }
}

/// The four per-kind databases the kernel keeps.
#[derive(Debug)]
pub struct Mapdbs {
    pub mem: Mapdb,
    pub io: Mapdb,
    pub cap: Mapdb,
    pub obj: Mapdb,
}

impl Mapdbs {
    pub fn new() -> Self {
        Self {
            mem: Mapdb::for_space::<MemSpace>(),
            io: Mapdb::for_space::<IoSpace>(),
            cap: Mapdb::for_space::<CapSpace>(),
            obj: Mapdb::for_space::<ObjSpace>(),
        }
    }
}

impl Default for Mapdbs {
    fn default() -> Self {
        Self::new()
    }
}
