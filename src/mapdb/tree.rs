use alloc::vec::Vec;

use slab::Slab;

use crate::common::{Pfn, SpaceId, Vpn};
use crate::space::Attribs;

int_like!(NodeId, usize);

/// One node of a mapping tree: `space` holds `rights` on the `1 << order`
/// units starting at `phys`, entered at `virt`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Mapping {
    pub space: SpaceId,
    pub virt: Vpn,
    pub phys: Pfn,
    pub order: u32,
    pub rights: Attribs,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

impl Mapping {
    pub fn size(&self) -> usize {
        1 << self.order
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    pub fn contains_virt(&self, virt: Vpn) -> bool {
        virt >= self.virt && virt.offset_from(self.virt) < self.size()
    }

    /// Whether the frames `[start, end)` overlap this mapping.
    pub fn overlaps_phys(&self, start: Pfn, end: Pfn) -> bool {
        self.phys < end && start < self.phys.add(self.size())
    }
}

/// Derivation tree of one resource unit. Nodes live in an arena; a parent
/// owns its children through their indices, the `parent` back link is only
/// used for diagnostics and unlinking.
#[derive(Debug)]
pub struct MappingTree {
    nodes: Slab<Mapping>,
    root: NodeId,
}

impl MappingTree {
    /// Start a tree whose root is the original owner of the resource.
    pub fn new(space: SpaceId, virt: Vpn, phys: Pfn, order: u32, rights: Attribs) -> Self {
        let mut nodes = Slab::new();
        let root = NodeId::new(nodes.insert(Mapping {
            space,
            virt,
            phys,
            order,
            rights,
            parent: None,
            children: Vec::new(),
        }));
        Self { nodes, root }
    }

    pub fn root(&self) -> Option<NodeId> {
        self.nodes.contains(self.root.get()).then_some(self.root)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, id: NodeId) -> Option<&Mapping> {
        self.nodes.get(id.get())
    }

    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut Mapping> {
        self.nodes.get_mut(id.get())
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &Mapping)> + '_ {
        self.nodes.iter().map(|(i, node)| (NodeId::new(i), node))
    }

    /// Node through which `space` reaches `virt`.
    pub fn find(&self, space: SpaceId, virt: Vpn) -> Option<NodeId> {
        self.iter()
            .find(|(_, node)| node.space == space && node.contains_virt(virt))
            .map(|(id, _)| id)
    }

    pub fn depth(&self, id: NodeId) -> usize {
        let mut depth = 0;
        let mut cur = self.get(id).and_then(Mapping::parent);
        while let Some(parent) = cur {
            depth += 1;
            cur = self.get(parent).and_then(Mapping::parent);
        }
        depth
    }

    /// Attach a new child below `parent`. Children keep insertion order.
    pub fn insert_child(
        &mut self,
        parent: NodeId,
        space: SpaceId,
        virt: Vpn,
        phys: Pfn,
        order: u32,
        rights: Attribs,
    ) -> Option<NodeId> {
        if !self.nodes.contains(parent.get()) {
            return None;
        }
        let child = NodeId::new(self.nodes.insert(Mapping {
            space,
            virt,
            phys,
            order,
            rights,
            parent: Some(parent),
            children: Vec::new(),
        }));
        self.nodes[parent.get()].children.push(child);
        Some(child)
    }

    /// Hand the node over to another space in place; the node keeps its
    /// position and its descendants.
    pub fn relabel(&mut self, id: NodeId, space: SpaceId, virt: Vpn, rights: Attribs) {
        if let Some(node) = self.get_mut(id) {
            node.space = space;
            node.virt = virt;
            node.rights = rights;
        }
    }

    /// Whether `ancestor` lies on the path from `id` up to the root.
    pub fn is_ancestor(&self, ancestor: NodeId, id: NodeId) -> bool {
        let mut cur = self.get(id).and_then(Mapping::parent);
        while let Some(parent) = cur {
            if parent == ancestor {
                return true;
            }
            cur = self.get(parent).and_then(Mapping::parent);
        }
        false
    }

    /// Remove a single non-root node, handing its children to its parent.
    pub fn splice(&mut self, id: NodeId) -> Option<Mapping> {
        let parent = self.get(id)?.parent?;
        let pos = self.get(parent)?.children.iter().position(|&child| child == id)?;
        let node = self.nodes.remove(id.get());
        for &child in &node.children {
            self.nodes[child.get()].parent = Some(parent);
        }
        let siblings = &mut self.nodes[parent.get()].children;
        siblings.remove(pos);
        let tail = siblings.split_off(pos);
        siblings.extend(node.children.iter().copied());
        siblings.extend(tail);
        Some(node)
    }

    /// Preorder list of `id` and everything below it.
    pub fn subtree(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        if !self.nodes.contains(id.get()) {
            return out;
        }
        let mut stack = alloc::vec![id];
        while let Some(cur) = stack.pop() {
            out.push(cur);
            let children = &self.nodes[cur.get()].children;
            // Reversed so that the first child is visited first.
            stack.extend(children.iter().rev().copied());
        }
        out
    }

    /// Drop `id` together with its descendants.
    pub fn remove_subtree(&mut self, id: NodeId) {
        let doomed = self.subtree(id);
        if let Some(parent) = self.get(id).and_then(Mapping::parent) {
            if let Some(parent) = self.get_mut(parent) {
                parent.children.retain(|&child| child != id);
            }
        }
        for node in doomed {
            self.nodes.remove(node.get());
        }
    }
}
