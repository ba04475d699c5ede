//! Tiling layout engine
//!
//! Owns the container arena and one tree per workspace. Every membership or
//! policy change re-arranges the affected workspace only.

use std::collections::HashMap;

use log::{debug, info};

use crate::compositor::frame::Border;
use crate::compositor::geometry::Rectangle;
use crate::compositor::SurfaceId;
use crate::config::TilingOptions;
use crate::layout::container::{
    ContainerArena, ContainerId, ContainerKind, DEFAULT_SPLIT_RATIO, MAX_SPLIT_RATIO, MIN_SPLIT_RATIO,
    SPLIT_RATIO_STEP,
};
use crate::layout::policy::{self, LayoutPolicy, Slot, SplitAxis};
use crate::layout::{Direction, LayoutCommand, LayoutError};

/// Smallest floating window edge
const MIN_FLOATING_SIZE: i32 = 50;

/// Where a window is drawn this frame
#[derive(Debug, Clone, PartialEq)]
pub struct LayoutSlot {
    pub surface: SurfaceId,
    /// Window content area
    pub geometry: Rectangle,
    pub title_bar: Option<Rectangle>,
    pub border: Option<Border>,
    /// Shown by the workspace policy
    pub visible: bool,
    /// Covered by a fullscreen window on the same workspace
    pub occluded: bool,
    pub focused: bool,
    pub floating: bool,
    pub fullscreen: bool,
}

#[derive(Debug)]
struct Workspace {
    root: Option<ContainerId>,
    /// Floating containers, bottom to top
    floating: Vec<ContainerId>,
    policy: LayoutPolicy,
    focused: Option<ContainerId>,
    fullscreen: Option<ContainerId>,
    /// Axis for wrapping the focused window on the next insertion
    next_split: Option<SplitAxis>,
}

impl Workspace {
    fn new(policy: LayoutPolicy) -> Self {
        Self {
            root: None,
            floating: Vec::new(),
            policy,
            focused: None,
            fullscreen: None,
            next_split: None,
        }
    }
}

/// The tiling layout engine
#[derive(Debug)]
pub struct LayoutEngine {
    arena: ContainerArena,
    workspaces: Vec<Workspace>,
    current: usize,
    options: TilingOptions,
    /// Full output area in global coordinates
    output: Rectangle,
    surfaces: HashMap<SurfaceId, (usize, ContainerId)>,
}

impl LayoutEngine {
    pub fn new(options: TilingOptions, output: Rectangle) -> Self {
        let workspaces = (0..options.workspace_count.max(1))
            .map(|_| Workspace::new(options.default_layout))
            .collect();
        Self {
            arena: ContainerArena::new(),
            workspaces,
            current: 0,
            options,
            output,
            surfaces: HashMap::new(),
        }
    }

    pub fn options(&self) -> &TilingOptions {
        &self.options
    }

    pub fn output_area(&self) -> Rectangle {
        self.output
    }

    /// Output area minus gaps and the bar
    pub fn usable_area(&self) -> Rectangle {
        let gap = self.options.gap_size;
        let bar = self.options.bar_height;
        Rectangle::new(
            self.output.x + gap,
            self.output.y + gap + bar,
            (self.output.width - 2 * gap).max(0),
            (self.output.height - 2 * gap - bar).max(0),
        )
    }

    /// Change the output area and re-arrange every workspace
    pub fn set_output_area(&mut self, output: Rectangle) {
        self.output = output;
        for ws in 0..self.workspaces.len() {
            self.arrange(ws);
        }
        info!("Layout area now {:?}", self.usable_area());
    }

    pub fn current_workspace(&self) -> usize {
        self.current
    }

    pub fn workspace_count(&self) -> usize {
        self.workspaces.len()
    }

    /// Policy of the current workspace
    pub fn policy(&self) -> LayoutPolicy {
        self.workspaces[self.current].policy
    }

    pub fn contains(&self, surface: SurfaceId) -> bool {
        self.surfaces.contains_key(&surface)
    }

    pub fn workspace_of(&self, surface: SurfaceId) -> Option<usize> {
        self.surfaces.get(&surface).map(|(ws, _)| *ws)
    }

    /// Number of managed windows
    pub fn len(&self) -> usize {
        self.surfaces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.surfaces.is_empty()
    }

    fn lookup(&self, surface: SurfaceId) -> Result<(usize, ContainerId), LayoutError> {
        self.surfaces
            .get(&surface)
            .copied()
            .ok_or(LayoutError::UnknownSurface(surface))
    }

    fn check_workspace(&self, index: usize) -> Result<(), LayoutError> {
        if index < self.workspaces.len() {
            Ok(())
        } else {
            Err(LayoutError::NoSuchWorkspace(index))
        }
    }

    fn surface_of(&self, id: ContainerId) -> Option<SurfaceId> {
        self.arena.get(id).and_then(|c| c.surface())
    }

    fn is_floating(&self, id: ContainerId) -> bool {
        self.arena.get(id).is_some_and(|c| c.floating)
    }

    /// Tiled leaves of a workspace in container order
    fn tiled_leaves(&self, ws: usize) -> Vec<ContainerId> {
        self.workspaces[ws]
            .root
            .map(|root| self.arena.leaves(root))
            .unwrap_or_default()
    }

    /// Tiled windows of a workspace in container order
    pub fn tiled_surfaces(&self, ws: usize) -> Vec<SurfaceId> {
        self.tiled_leaves(ws)
            .into_iter()
            .filter_map(|id| self.surface_of(id))
            .collect()
    }

    // ========================================================================
    // Membership
    // ========================================================================

    /// Add a newly mapped window to the current workspace's tree
    pub fn insert(&mut self, surface: SurfaceId) -> Result<ContainerId, LayoutError> {
        if self.contains(surface) {
            return Err(LayoutError::AlreadyManaged(surface));
        }
        let ws = self.current;
        let leaf = self.arena.new_leaf(surface);
        self.attach_tiled(ws, leaf);
        self.surfaces.insert(surface, (ws, leaf));
        self.workspaces[ws].focused = Some(leaf);
        self.arrange(ws);
        info!("Tiled {:?} on workspace {}", surface, ws);
        Ok(leaf)
    }

    /// Add a newly mapped window as floating
    pub fn insert_floating(
        &mut self,
        surface: SurfaceId,
        geometry: Option<Rectangle>,
    ) -> Result<ContainerId, LayoutError> {
        if self.contains(surface) {
            return Err(LayoutError::AlreadyManaged(surface));
        }
        let ws = self.current;
        let id = self.arena.new_leaf(surface);
        let geometry = geometry.unwrap_or_else(|| self.default_floating_geometry());
        if let Some(container) = self.arena.get_mut(id) {
            container.floating = true;
            container.geometry = geometry;
        }
        self.workspaces[ws].floating.push(id);
        self.surfaces.insert(surface, (ws, id));
        self.workspaces[ws].focused = Some(id);
        self.arrange(ws);
        info!("Floating {:?} on workspace {}", surface, ws);
        Ok(id)
    }

    /// Remove an unmapped window; its siblings take over the space
    pub fn remove(&mut self, surface: SurfaceId) -> Result<(), LayoutError> {
        let (ws, id) = self.lookup(surface)?;
        self.surfaces.remove(&surface);
        self.take_out(ws, id);
        self.arena.remove(id);
        self.arrange(ws);
        info!("Removed {:?} from workspace {}", surface, ws);
        Ok(())
    }

    /// Take a container out of its workspace without destroying it
    fn take_out(&mut self, ws: usize, id: ContainerId) {
        let next_focus = if self.workspaces[ws].focused == Some(id) {
            Some(self.neighbour(ws, id))
        } else {
            None
        };

        if self.is_floating(id) {
            self.workspaces[ws].floating.retain(|c| *c != id);
        } else {
            self.detach_tiled(ws, id);
        }
        if self.workspaces[ws].fullscreen == Some(id) {
            self.workspaces[ws].fullscreen = None;
        }
        if let Some(container) = self.arena.get_mut(id) {
            container.fullscreen = false;
        }
        if let Some(next_focus) = next_focus {
            self.workspaces[ws].focused = next_focus;
        }
    }

    /// Container to focus once `id` leaves: the next tiled sibling in order,
    /// else the previous one, else the topmost other floating window
    fn neighbour(&self, ws: usize, id: ContainerId) -> Option<ContainerId> {
        let leaves = self.tiled_leaves(ws);
        if let Some(index) = leaves.iter().position(|c| *c == id) {
            if let Some(next) = leaves.get(index + 1) {
                return Some(*next);
            }
            if index > 0 {
                return Some(leaves[index - 1]);
            }
        } else if let Some(last) = leaves.last() {
            return Some(*last);
        }
        self.workspaces[ws]
            .floating
            .iter()
            .rev()
            .find(|c| **c != id)
            .copied()
    }

    /// Link a detached leaf into a workspace's tree next to the focus
    fn attach_tiled(&mut self, ws: usize, leaf: ContainerId) {
        let next_split = self.workspaces[ws].next_split.take();
        let Some(root) = self.workspaces[ws].root else {
            self.workspaces[ws].root = Some(leaf);
            return;
        };

        let anchor = self.workspaces[ws]
            .focused
            .filter(|f| *f != leaf && !self.is_floating(*f) && self.arena.contains(*f))
            .or_else(|| self.arena.leaves(root).last().copied());
        let Some(anchor) = anchor else {
            self.workspaces[ws].root = Some(leaf);
            return;
        };

        match (next_split, self.arena.parent(anchor)) {
            (None, Some(parent)) => self.arena.insert_child(parent, usize::MAX, leaf),
            (axis, _) => {
                // Wrap the anchor and the new leaf in a fresh split
                let axis = axis.unwrap_or(self.options.default_split);
                let split = self.arena.new_split(axis, Vec::new());
                self.arena.replace(anchor, split);
                self.arena.insert_child(split, 0, anchor);
                self.arena.insert_child(split, 1, leaf);
                if self.workspaces[ws].root == Some(anchor) {
                    self.workspaces[ws].root = Some(split);
                }
            }
        }
    }

    /// Unlink a leaf from a workspace's tree, collapsing emptied splits
    fn detach_tiled(&mut self, ws: usize, leaf: ContainerId) {
        match self.arena.detach(leaf) {
            Some(parent) => self.collapse(ws, parent),
            None => {
                if self.workspaces[ws].root == Some(leaf) {
                    self.workspaces[ws].root = None;
                }
            }
        }
    }

    /// Remove a split left with fewer than two children
    fn collapse(&mut self, ws: usize, split: ContainerId) {
        let children = match self.arena.get(split) {
            Some(container) => container.children().to_vec(),
            None => return,
        };
        match children.len() {
            0 => {
                let grandparent = self.arena.detach(split);
                if self.workspaces[ws].root == Some(split) {
                    self.workspaces[ws].root = None;
                }
                self.arena.remove(split);
                if let Some(grandparent) = grandparent {
                    self.collapse(ws, grandparent);
                }
            }
            1 => {
                let only = children[0];
                self.arena.detach(only);
                self.arena.replace(split, only);
                if self.workspaces[ws].root == Some(split) {
                    self.workspaces[ws].root = Some(only);
                }
                self.arena.remove(split);
                debug!("Collapsed split {:?} into {:?}", split, only);
            }
            _ => {}
        }
    }

    fn default_floating_geometry(&self) -> Rectangle {
        let area = self.usable_area();
        let (width, height) = (area.width / 2, area.height / 2);
        Rectangle::new(
            area.x + (area.width - width) / 2,
            area.y + (area.height - height) / 2,
            width,
            height,
        )
    }

    // ========================================================================
    // Arrangement
    // ========================================================================

    /// Recompute every container's geometry on one workspace
    pub fn arrange(&mut self, ws: usize) {
        if ws >= self.workspaces.len() {
            return;
        }
        let area = self.usable_area();
        let policy = self.workspaces[ws].policy;
        let focused = self.workspaces[ws].focused;

        if let Some(root) = self.workspaces[ws].root {
            if policy.uses_tree() {
                self.arrange_node(root, area);
            } else {
                let leaves = self.arena.leaves(root);
                let count = leaves.len();
                let focused_index = leaves
                    .iter()
                    .position(|l| Some(*l) == focused)
                    .unwrap_or(0);
                let title_height = self.options.title_height;
                let slots = match policy {
                    LayoutPolicy::Monocle => policy::monocle(area, count, focused_index),
                    LayoutPolicy::Grid => policy::grid(area, count),
                    LayoutPolicy::Stacked => policy::stacked(area, count, focused_index, title_height),
                    LayoutPolicy::Tabbed => policy::tabbed(area, count, focused_index, title_height),
                    LayoutPolicy::Spiral => policy::spiral(area, count),
                    LayoutPolicy::Dwindle => policy::dwindle(area, count, self.root_ratio(root)),
                    LayoutPolicy::Tiling | LayoutPolicy::Floating => Vec::new(),
                };
                self.set_splits_geometry(root, area);
                for (leaf, slot) in leaves.into_iter().zip(slots) {
                    self.apply_slot(leaf, slot);
                }
            }
        }

        // Windows under a fullscreen one keep their visibility; slots
        // report them as occluded instead
        let fullscreen = self.workspaces[ws].fullscreen;
        if let Some(fs) = fullscreen {
            let output = self.output;
            self.apply_slot(
                fs,
                Slot {
                    geometry: output,
                    title_bar: None,
                    visible: true,
                },
            );
        }
        for id in self.workspaces[ws].floating.clone() {
            if Some(id) == fullscreen {
                continue;
            }
            if let Some(container) = self.arena.get_mut(id) {
                container.visible = true;
                container.title_bar = None;
            }
        }
        debug!("Arranged workspace {} with {} layout", ws, policy);
    }

    fn arrange_node(&mut self, id: ContainerId, area: Rectangle) {
        let Some(container) = self.arena.get_mut(id) else {
            return;
        };
        container.geometry = area;
        container.title_bar = None;
        container.visible = true;
        let (axis, ratio, children) = match &container.kind {
            ContainerKind::Leaf { .. } => return,
            ContainerKind::Split { axis, ratio, children } => (*axis, *ratio, children.clone()),
        };
        let cells = if children.len() == 2 {
            let (first, second) = policy::split_ratio(area, axis, ratio);
            vec![first, second]
        } else {
            policy::split_equal(area, axis, children.len())
        };
        for (child, cell) in children.into_iter().zip(cells) {
            self.arrange_node(child, cell);
        }
    }

    fn set_splits_geometry(&mut self, id: ContainerId, area: Rectangle) {
        let children = match self.arena.get_mut(id) {
            Some(container) if !container.is_leaf() => {
                container.geometry = area;
                container.visible = true;
                container.children().to_vec()
            }
            _ => return,
        };
        for child in children {
            self.set_splits_geometry(child, area);
        }
    }

    fn apply_slot(&mut self, id: ContainerId, slot: Slot) {
        if let Some(container) = self.arena.get_mut(id) {
            container.geometry = slot.geometry;
            container.title_bar = slot.title_bar;
            container.visible = slot.visible;
        }
    }

    fn root_ratio(&self, root: ContainerId) -> f32 {
        match self.arena.get(root).map(|c| &c.kind) {
            Some(ContainerKind::Split { ratio, .. }) => *ratio,
            _ => DEFAULT_SPLIT_RATIO,
        }
    }

    /// Slots of the current workspace: tiled in container order, then
    /// floating bottom to top
    pub fn slots(&self) -> Vec<LayoutSlot> {
        let ws = &self.workspaces[self.current];
        self.tiled_leaves(self.current)
            .into_iter()
            .chain(ws.floating.iter().copied())
            .filter_map(|id| self.slot(id, ws.focused, ws.fullscreen))
            .collect()
    }

    /// Slots that are drawn
    pub fn visible_slots(&self) -> Vec<LayoutSlot> {
        self.slots()
            .into_iter()
            .filter(|s| s.visible && !s.occluded)
            .collect()
    }

    /// Slot of one window, on any workspace
    pub fn slot_of(&self, surface: SurfaceId) -> Option<LayoutSlot> {
        let (ws, id) = self.surfaces.get(&surface).copied()?;
        let ws = &self.workspaces[ws];
        self.slot(id, ws.focused, ws.fullscreen)
    }

    fn slot(
        &self,
        id: ContainerId,
        focused: Option<ContainerId>,
        fullscreen: Option<ContainerId>,
    ) -> Option<LayoutSlot> {
        let container = self.arena.get(id)?;
        let surface = container.surface()?;
        let is_fullscreen = fullscreen == Some(id);
        let is_focused = focused == Some(id);
        let width = self.options.border_width;

        let (geometry, border) = if is_fullscreen || width <= 0 {
            (container.geometry, None)
        } else {
            let color = if container.urgent {
                self.options.border_color_urgent
            } else if is_focused {
                self.options.border_color_focused
            } else {
                self.options.border_color_unfocused
            };
            (container.geometry.inset(width), Some(Border { width, color }))
        };

        Some(LayoutSlot {
            surface,
            geometry,
            title_bar: container.title_bar,
            border,
            visible: container.visible,
            occluded: fullscreen.is_some() && !is_fullscreen,
            focused: is_focused,
            floating: container.floating,
            fullscreen: is_fullscreen,
        })
    }

    // ========================================================================
    // Focus
    // ========================================================================

    /// Focused window of the current workspace
    pub fn focused_surface(&self) -> Option<SurfaceId> {
        self.workspaces[self.current]
            .focused
            .and_then(|id| self.surface_of(id))
    }

    /// Focus a window, switching to its workspace
    pub fn focus(&mut self, surface: SurfaceId) -> Result<(), LayoutError> {
        let (ws, id) = self.lookup(surface)?;
        self.current = ws;
        self.set_focus(ws, id);
        Ok(())
    }

    fn set_focus(&mut self, ws: usize, id: ContainerId) {
        if self.workspaces[ws].focused == Some(id) {
            return;
        }
        self.workspaces[ws].focused = Some(id);
        if !self.workspaces[ws].policy.uses_tree() {
            // Visibility follows focus in monocle, stacked and tabbed
            self.arrange(ws);
        }
    }

    fn cycle_focus(&mut self, forward: bool) -> Option<SurfaceId> {
        let ws = self.current;
        let leaves = self.tiled_leaves(ws);
        if leaves.is_empty() {
            return None;
        }
        let n = leaves.len();
        let next = match leaves.iter().position(|l| Some(*l) == self.workspaces[ws].focused) {
            Some(index) if forward => (index + 1) % n,
            Some(index) => (index + n - 1) % n,
            None => 0,
        };
        self.set_focus(ws, leaves[next]);
        self.surface_of(leaves[next])
    }

    /// Focus the next tiled window, wrapping
    pub fn focus_next(&mut self) -> Option<SurfaceId> {
        self.cycle_focus(true)
    }

    /// Focus the previous tiled window, wrapping
    pub fn focus_prev(&mut self) -> Option<SurfaceId> {
        self.cycle_focus(false)
    }

    /// Focus the nearest visible tiled window in a direction
    pub fn focus_direction(&mut self, direction: Direction) -> Option<SurfaceId> {
        let ws = self.current;
        let focused = self.workspaces[ws].focused?;
        let origin = self.arena.get(focused)?.geometry.center();

        if matches!(
            self.workspaces[ws].policy,
            LayoutPolicy::Monocle | LayoutPolicy::Stacked | LayoutPolicy::Tabbed
        ) {
            // One window visible: move along the order instead
            return match direction {
                Direction::Left | Direction::Up => self.focus_prev(),
                Direction::Right | Direction::Down => self.focus_next(),
            };
        }

        let fullscreen = self.workspaces[ws].fullscreen;
        let best = self
            .tiled_leaves(ws)
            .into_iter()
            .filter(|id| *id != focused && fullscreen.map_or(true, |fs| fs == *id))
            .filter_map(|id| {
                let container = self.arena.get(id)?;
                if !container.visible {
                    return None;
                }
                let (cx, cy) = container.geometry.center();
                let (dx, dy) = (cx - origin.0, cy - origin.1);
                let (primary, secondary) = match direction {
                    Direction::Left => (-dx, dy.abs()),
                    Direction::Right => (dx, dy.abs()),
                    Direction::Up => (-dy, dx.abs()),
                    Direction::Down => (dy, dx.abs()),
                };
                (primary > 0.0).then_some((id, primary + secondary))
            })
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(id, _)| id)?;

        self.set_focus(ws, best);
        self.surface_of(best)
    }

    // ========================================================================
    // Structure
    // ========================================================================

    fn focused_container(&self) -> Result<ContainerId, LayoutError> {
        self.workspaces[self.current]
            .focused
            .ok_or(LayoutError::NoFocus)
    }

    fn adjust_split_ratio(&mut self, delta: f32) -> Result<f32, LayoutError> {
        let ws = self.current;
        let focused = self.focused_container()?;
        let parent = self.arena.parent(focused).ok_or(LayoutError::NoSplit)?;
        // Dwindle reads the root ratio whatever the child count
        let ratio_used = self.workspaces[ws].policy == LayoutPolicy::Dwindle
            && self.workspaces[ws].root == Some(parent);
        let ratio = match self.arena.get_mut(parent).map(|c| &mut c.kind) {
            Some(ContainerKind::Split { children, .. }) if children.len() != 2 && !ratio_used => {
                debug!("{:?} divides {} children equally", parent, children.len());
                return Err(LayoutError::EqualSplit);
            }
            Some(ContainerKind::Split { ratio, .. }) => {
                let adjusted = ((*ratio + delta) * 100.0).round() / 100.0;
                *ratio = adjusted.clamp(MIN_SPLIT_RATIO, MAX_SPLIT_RATIO);
                *ratio
            }
            _ => return Err(LayoutError::NoSplit),
        };
        if self.workspaces[ws].policy.uses_tree() && self.workspaces[ws].fullscreen.is_none() {
            let area = self.arena.get(parent).map(|c| c.geometry).unwrap_or_default();
            self.arrange_node(parent, area);
        } else {
            self.arrange(ws);
        }
        debug!("Split ratio of {:?} now {:.2}", parent, ratio);
        Ok(ratio)
    }

    /// Grow the focused window's share of its parent split
    pub fn increase_split_ratio(&mut self) -> Result<f32, LayoutError> {
        self.adjust_split_ratio(SPLIT_RATIO_STEP)
    }

    /// Shrink the focused window's share of its parent split
    pub fn decrease_split_ratio(&mut self) -> Result<f32, LayoutError> {
        self.adjust_split_ratio(-SPLIT_RATIO_STEP)
    }

    fn swap(&mut self, forward: bool) -> Result<(), LayoutError> {
        let ws = self.current;
        let focused = self.focused_container()?;
        let leaves = self.tiled_leaves(ws);
        let Some(index) = leaves.iter().position(|l| *l == focused) else {
            return Err(LayoutError::NoFocus);
        };
        if leaves.len() < 2 {
            return Ok(());
        }
        let n = leaves.len();
        let other = leaves[if forward { (index + 1) % n } else { (index + n - 1) % n }];

        let (Some(a), Some(b)) = (self.surface_of(focused), self.surface_of(other)) else {
            return Ok(());
        };
        if let Some(container) = self.arena.get_mut(focused) {
            container.kind = ContainerKind::Leaf { surface: b };
        }
        if let Some(container) = self.arena.get_mut(other) {
            container.kind = ContainerKind::Leaf { surface: a };
        }
        self.surfaces.insert(a, (ws, other));
        self.surfaces.insert(b, (ws, focused));
        // Focus stays with the moved window
        self.workspaces[ws].focused = Some(other);
        self.arrange(ws);
        Ok(())
    }

    pub fn swap_with_next(&mut self) -> Result<(), LayoutError> {
        self.swap(true)
    }

    pub fn swap_with_prev(&mut self) -> Result<(), LayoutError> {
        self.swap(false)
    }

    /// Wrap the focused window in a new split on the next insertion
    pub fn split_focused(&mut self, axis: SplitAxis) {
        self.workspaces[self.current].next_split = Some(axis);
    }

    /// Set the current workspace's policy
    pub fn set_policy(&mut self, policy: LayoutPolicy) {
        let ws = self.current;
        self.workspaces[ws].policy = policy;
        self.arrange(ws);
        info!("Workspace {} layout set to {}", ws, policy);
    }

    pub fn next_layout(&mut self) -> LayoutPolicy {
        let policy = self.policy().next();
        self.set_policy(policy);
        policy
    }

    pub fn prev_layout(&mut self) -> LayoutPolicy {
        let policy = self.policy().prev();
        self.set_policy(policy);
        policy
    }

    // ========================================================================
    // Workspaces
    // ========================================================================

    pub fn switch_workspace(&mut self, index: usize) -> Result<(), LayoutError> {
        self.check_workspace(index)?;
        if self.current != index {
            self.current = index;
            self.arrange(index);
            info!("Switched to workspace {}", index);
        }
        Ok(())
    }

    /// Move a window to another workspace, where it takes focus
    pub fn move_to_workspace(&mut self, surface: SurfaceId, index: usize) -> Result<(), LayoutError> {
        self.check_workspace(index)?;
        let (ws, id) = self.lookup(surface)?;
        if ws == index {
            return Ok(());
        }
        self.take_out(ws, id);
        if self.is_floating(id) {
            self.workspaces[index].floating.push(id);
        } else {
            self.attach_tiled(index, id);
        }
        self.surfaces.insert(surface, (index, id));
        self.workspaces[index].focused = Some(id);
        self.arrange(ws);
        self.arrange(index);
        info!("Moved {:?} from workspace {} to {}", surface, ws, index);
        Ok(())
    }

    // ========================================================================
    // Window state
    // ========================================================================

    pub fn toggle_floating(&mut self, surface: SurfaceId) -> Result<bool, LayoutError> {
        let (ws, id) = self.lookup(surface)?;
        let floating = !self.is_floating(id);
        if floating {
            self.detach_tiled(ws, id);
            let geometry = self.default_floating_geometry();
            if let Some(container) = self.arena.get_mut(id) {
                container.floating = true;
                container.geometry = geometry;
            }
            self.workspaces[ws].floating.push(id);
        } else {
            self.workspaces[ws].floating.retain(|c| *c != id);
            if let Some(container) = self.arena.get_mut(id) {
                container.floating = false;
            }
            self.attach_tiled(ws, id);
        }
        self.arrange(ws);
        Ok(floating)
    }

    pub fn is_floating_surface(&self, surface: SurfaceId) -> bool {
        self.surfaces
            .get(&surface)
            .is_some_and(|(_, id)| self.is_floating(*id))
    }

    /// Move a floating window
    pub fn move_floating(&mut self, surface: SurfaceId, x: i32, y: i32) -> Result<(), LayoutError> {
        let (_, id) = self.lookup(surface)?;
        match self.arena.get_mut(id) {
            Some(container) if container.floating => {
                container.geometry.x = x;
                container.geometry.y = y;
                Ok(())
            }
            _ => Err(LayoutError::NotFloating(surface)),
        }
    }

    /// Resize a floating window
    pub fn resize_floating(&mut self, surface: SurfaceId, width: i32, height: i32) -> Result<(), LayoutError> {
        let (_, id) = self.lookup(surface)?;
        match self.arena.get_mut(id) {
            Some(container) if container.floating => {
                container.geometry.width = width.max(MIN_FLOATING_SIZE);
                container.geometry.height = height.max(MIN_FLOATING_SIZE);
                Ok(())
            }
            _ => Err(LayoutError::NotFloating(surface)),
        }
    }

    pub fn set_fullscreen(&mut self, surface: SurfaceId, fullscreen: bool) -> Result<(), LayoutError> {
        let (ws, id) = self.lookup(surface)?;
        let previous = self.workspaces[ws].fullscreen;
        if fullscreen {
            if let Some(previous) = previous.filter(|p| *p != id) {
                if let Some(container) = self.arena.get_mut(previous) {
                    container.fullscreen = false;
                }
            }
            self.workspaces[ws].fullscreen = Some(id);
        } else if previous == Some(id) {
            self.workspaces[ws].fullscreen = None;
        }
        if let Some(container) = self.arena.get_mut(id) {
            container.fullscreen = fullscreen;
        }
        self.arrange(ws);
        Ok(())
    }

    pub fn is_fullscreen(&self, surface: SurfaceId) -> bool {
        self.surfaces
            .get(&surface)
            .is_some_and(|(ws, id)| self.workspaces[*ws].fullscreen == Some(*id))
    }

    pub fn set_urgent(&mut self, surface: SurfaceId, urgent: bool) -> Result<(), LayoutError> {
        let (_, id) = self.lookup(surface)?;
        if let Some(container) = self.arena.get_mut(id) {
            container.urgent = urgent;
        }
        Ok(())
    }

    // ========================================================================
    // Commands
    // ========================================================================

    /// Run a layout command against the current workspace
    pub fn execute(&mut self, command: LayoutCommand) -> Result<(), LayoutError> {
        debug!("Layout command {:?}", command);
        match command {
            LayoutCommand::FocusNext => {
                self.focus_next();
            }
            LayoutCommand::FocusPrev => {
                self.focus_prev();
            }
            LayoutCommand::Focus(direction) => {
                self.focus_direction(direction);
            }
            LayoutCommand::IncreaseSplitRatio => {
                self.increase_split_ratio()?;
            }
            LayoutCommand::DecreaseSplitRatio => {
                self.decrease_split_ratio()?;
            }
            LayoutCommand::SwapWithNext => self.swap_with_next()?,
            LayoutCommand::SwapWithPrev => self.swap_with_prev()?,
            LayoutCommand::SetLayout(policy) => self.set_policy(policy),
            LayoutCommand::NextLayout => {
                self.next_layout();
            }
            LayoutCommand::PrevLayout => {
                self.prev_layout();
            }
            LayoutCommand::SwitchWorkspace(index) => self.switch_workspace(index)?,
            LayoutCommand::MoveToWorkspace(index) => {
                let surface = self.focused_surface().ok_or(LayoutError::NoFocus)?;
                self.move_to_workspace(surface, index)?;
            }
            LayoutCommand::MoveToWorkspaceAndSwitch(index) => {
                let surface = self.focused_surface().ok_or(LayoutError::NoFocus)?;
                self.move_to_workspace(surface, index)?;
                self.switch_workspace(index)?;
            }
            LayoutCommand::ToggleFloating => {
                let surface = self.focused_surface().ok_or(LayoutError::NoFocus)?;
                self.toggle_floating(surface)?;
            }
            LayoutCommand::ToggleFullscreen => {
                let surface = self.focused_surface().ok_or(LayoutError::NoFocus)?;
                let fullscreen = !self.is_fullscreen(surface);
                self.set_fullscreen(surface, fullscreen)?;
            }
            LayoutCommand::Split(axis) => self.split_focused(axis),
        }
        Ok(())
    }
}
