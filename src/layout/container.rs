//! Tiling containers
//!
//! Containers live in an arena and refer to each other by [`ContainerId`].
//! A leaf wraps one toplevel surface; a split orders two or more children
//! along an axis.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::compositor::geometry::Rectangle;
use crate::compositor::SurfaceId;
use crate::layout::policy::SplitAxis;

/// Default share of the first child in a two-way split
pub const DEFAULT_SPLIT_RATIO: f32 = 0.5;
/// Step used by ratio adjustments
pub const SPLIT_RATIO_STEP: f32 = 0.05;
pub const MIN_SPLIT_RATIO: f32 = 0.1;
pub const MAX_SPLIT_RATIO: f32 = 0.9;

/// Unique identifier for containers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContainerId(pub u64);

impl ContainerId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        ContainerId(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// Container payload
#[derive(Debug, Clone, PartialEq)]
pub enum ContainerKind {
    Leaf {
        surface: SurfaceId,
    },
    Split {
        axis: SplitAxis,
        /// Share of the first child when there are exactly two
        ratio: f32,
        children: Vec<ContainerId>,
    },
}

/// A node in the tiling tree
#[derive(Debug, Clone)]
pub struct Container {
    pub id: ContainerId,
    pub parent: Option<ContainerId>,
    pub kind: ContainerKind,
    pub floating: bool,
    pub fullscreen: bool,
    pub urgent: bool,
    /// Cell assigned by the last arrangement
    pub geometry: Rectangle,
    pub title_bar: Option<Rectangle>,
    pub visible: bool,
}

impl Container {
    fn new(kind: ContainerKind) -> Self {
        Self {
            id: ContainerId::new(),
            parent: None,
            kind,
            floating: false,
            fullscreen: false,
            urgent: false,
            geometry: Rectangle::default(),
            title_bar: None,
            visible: false,
        }
    }

    /// Surface of a leaf
    pub fn surface(&self) -> Option<SurfaceId> {
        match self.kind {
            ContainerKind::Leaf { surface } => Some(surface),
            ContainerKind::Split { .. } => None,
        }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self.kind, ContainerKind::Leaf { .. })
    }

    /// Children of a split; empty for leaves
    pub fn children(&self) -> &[ContainerId] {
        match &self.kind {
            ContainerKind::Split { children, .. } => children,
            ContainerKind::Leaf { .. } => &[],
        }
    }
}

/// Owner of every container
#[derive(Debug, Default)]
pub struct ContainerArena {
    nodes: HashMap<ContainerId, Container>,
}

impl ContainerArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a detached leaf
    pub fn new_leaf(&mut self, surface: SurfaceId) -> ContainerId {
        let container = Container::new(ContainerKind::Leaf { surface });
        let id = container.id;
        self.nodes.insert(id, container);
        id
    }

    /// Create a split holding `children`, which must be detached
    pub fn new_split(&mut self, axis: SplitAxis, children: Vec<ContainerId>) -> ContainerId {
        let container = Container::new(ContainerKind::Split {
            axis,
            ratio: DEFAULT_SPLIT_RATIO,
            children: children.clone(),
        });
        let id = container.id;
        self.nodes.insert(id, container);
        for child in children {
            if let Some(node) = self.nodes.get_mut(&child) {
                debug_assert!(node.parent.is_none(), "child {:?} already attached", child);
                node.parent = Some(id);
            }
        }
        id
    }

    pub fn get(&self, id: ContainerId) -> Option<&Container> {
        self.nodes.get(&id)
    }

    pub fn get_mut(&mut self, id: ContainerId) -> Option<&mut Container> {
        self.nodes.get_mut(&id)
    }

    pub fn contains(&self, id: ContainerId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn parent(&self, id: ContainerId) -> Option<ContainerId> {
        self.nodes.get(&id).and_then(|c| c.parent)
    }

    /// Insert a detached `child` into split `parent` at `index`
    pub fn insert_child(&mut self, parent: ContainerId, index: usize, child: ContainerId) {
        let Some(ContainerKind::Split { children, .. }) = self.nodes.get_mut(&parent).map(|c| &mut c.kind) else {
            return;
        };
        children.insert(index.min(children.len()), child);
        if let Some(node) = self.nodes.get_mut(&child) {
            node.parent = Some(parent);
        }
    }

    /// Position of `child` among its parent's children
    pub fn index_in_parent(&self, child: ContainerId) -> Option<usize> {
        let parent = self.parent(child)?;
        self.get(parent)?.children().iter().position(|c| *c == child)
    }

    /// Detach `child` from its parent, leaving it in the arena
    pub fn detach(&mut self, child: ContainerId) -> Option<ContainerId> {
        let parent = self.parent(child)?;
        if let Some(ContainerKind::Split { children, .. }) = self.nodes.get_mut(&parent).map(|c| &mut c.kind) {
            children.retain(|c| *c != child);
        }
        if let Some(node) = self.nodes.get_mut(&child) {
            node.parent = None;
        }
        Some(parent)
    }

    /// Put `new` where `old` is in the tree; `old` ends up detached
    pub fn replace(&mut self, old: ContainerId, new: ContainerId) {
        let parent = self.parent(old);
        if let Some(parent) = parent {
            if let Some(ContainerKind::Split { children, .. }) = self.nodes.get_mut(&parent).map(|c| &mut c.kind) {
                for child in children.iter_mut() {
                    if *child == old {
                        *child = new;
                    }
                }
            }
        }
        if let Some(node) = self.nodes.get_mut(&old) {
            node.parent = None;
        }
        if let Some(node) = self.nodes.get_mut(&new) {
            node.parent = parent;
        }
    }

    /// Remove a detached container from the arena
    pub fn remove(&mut self, id: ContainerId) -> Option<Container> {
        let container = self.nodes.remove(&id)?;
        debug_assert!(
            container.children().is_empty(),
            "removed container {:?} still has children",
            id
        );
        Some(container)
    }

    /// Leaves under `root`, in container order
    pub fn leaves(&self, root: ContainerId) -> Vec<ContainerId> {
        let mut out = Vec::new();
        self.collect_leaves(root, &mut out);
        out
    }

    fn collect_leaves(&self, id: ContainerId, out: &mut Vec<ContainerId>) {
        let Some(node) = self.nodes.get(&id) else {
            return;
        };
        match &node.kind {
            ContainerKind::Leaf { .. } => out.push(id),
            ContainerKind::Split { children, .. } => {
                for child in children {
                    self.collect_leaves(*child, out);
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_adopts_children() {
        let mut arena = ContainerArena::new();
        let a = arena.new_leaf(SurfaceId(1));
        let b = arena.new_leaf(SurfaceId(2));
        let split = arena.new_split(SplitAxis::Vertical, vec![a, b]);
        assert_eq!(arena.parent(a), Some(split));
        assert_eq!(arena.index_in_parent(b), Some(1));
        assert_eq!(arena.leaves(split), vec![a, b]);
    }

    #[test]
    fn test_detach_and_insert() {
        let mut arena = ContainerArena::new();
        let a = arena.new_leaf(SurfaceId(1));
        let b = arena.new_leaf(SurfaceId(2));
        let c = arena.new_leaf(SurfaceId(3));
        let split = arena.new_split(SplitAxis::Vertical, vec![a, b]);

        arena.insert_child(split, 1, c);
        assert_eq!(arena.leaves(split), vec![a, c, b]);

        assert_eq!(arena.detach(a), Some(split));
        assert_eq!(arena.parent(a), None);
        assert_eq!(arena.leaves(split), vec![c, b]);
    }

    #[test]
    fn test_replace() {
        let mut arena = ContainerArena::new();
        let a = arena.new_leaf(SurfaceId(1));
        let b = arena.new_leaf(SurfaceId(2));
        let split = arena.new_split(SplitAxis::Horizontal, vec![a, b]);
        let c = arena.new_leaf(SurfaceId(3));

        arena.replace(a, c);
        assert_eq!(arena.get(split).unwrap().children(), &[c, b]);
        assert_eq!(arena.parent(c), Some(split));
        assert_eq!(arena.parent(a), None);
    }
}
