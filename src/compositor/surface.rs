//! Surface management
//!
//! A surface carries two state slots. Client requests only ever write the
//! pending slot; [`Surface::commit`] moves it into the current slot in one
//! step, taking and dropping buffer references through the
//! [`BufferRegistry`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use log::{debug, trace};

use crate::compositor::buffer::{BufferError, BufferId, BufferRef, BufferRegistry, ReleaseOutcome};
use crate::compositor::geometry::Rectangle;
use crate::compositor::{ConnectionId, OutputId};
use crate::protocol::compositor::Region;

/// Unique identifier for surfaces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SurfaceId(pub u64);

impl SurfaceId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        SurfaceId(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// Identifier of a frame callback registered by a client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallbackId(pub u64);

impl CallbackId {
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        CallbackId(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for CallbackId {
    fn default() -> Self {
        Self::new()
    }
}

/// Buffer transform, matching wl_output.transform values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BufferTransform {
    #[default]
    Normal,
    Rotate90,
    Rotate180,
    Rotate270,
    Flipped,
    Flipped90,
    Flipped180,
    Flipped270,
}

impl BufferTransform {
    /// Create from a wl_output.transform value
    pub fn from_wayland(value: u32) -> Option<Self> {
        Some(match value {
            0 => BufferTransform::Normal,
            1 => BufferTransform::Rotate90,
            2 => BufferTransform::Rotate180,
            3 => BufferTransform::Rotate270,
            4 => BufferTransform::Flipped,
            5 => BufferTransform::Flipped90,
            6 => BufferTransform::Flipped180,
            7 => BufferTransform::Flipped270,
            _ => return None,
        })
    }

    /// Whether width and height trade places
    pub fn swaps_axes(self) -> bool {
        matches!(
            self,
            BufferTransform::Rotate90
                | BufferTransform::Rotate270
                | BufferTransform::Flipped90
                | BufferTransform::Flipped270
        )
    }
}

/// A pending value that is either left alone or replaced on commit
#[derive(Debug, Clone, PartialEq, Default)]
pub enum PendingChange<T> {
    #[default]
    Unchanged,
    Set(T),
}

impl<T> PendingChange<T> {
    pub fn is_set(&self) -> bool {
        matches!(self, PendingChange::Set(_))
    }
}

/// Surface role determines how the surface is used
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SurfaceRole {
    /// No role assigned yet
    #[default]
    None,
    /// XDG toplevel window
    Toplevel,
    /// XDG popup
    Popup,
    /// Pointer cursor image
    Cursor,
}

/// Pending state for a surface (not yet committed)
#[derive(Debug, Default)]
pub struct SurfacePendingState {
    /// Buffer to attach; `Set(None)` detaches
    pub buffer: PendingChange<Option<BufferId>>,
    /// Offset of the new buffer relative to the current one
    pub offset: (i32, i32),
    /// Damage in surface coordinates, as a single union
    pub damage: Rectangle,
    /// Damage in buffer coordinates, as a single union
    pub buffer_damage: Rectangle,
    pub scale: PendingChange<i32>,
    pub transform: PendingChange<BufferTransform>,
    pub input_region: PendingChange<Option<Region>>,
    pub opaque_region: PendingChange<Option<Region>>,
    /// Frame callbacks requested since the last commit
    pub frame_callbacks: Vec<CallbackId>,
}

/// The committed, renderable state of a surface
#[derive(Debug)]
pub struct SurfaceState {
    /// Reference on the attached buffer
    pub buffer: Option<BufferRef>,
    /// Size in surface-local (logical) coordinates
    pub size: (i32, i32),
    /// Sum of committed attach offsets
    pub offset: (i32, i32),
    pub scale: i32,
    pub transform: BufferTransform,
    /// `None` means the whole surface accepts input
    pub input_region: Option<Region>,
    pub opaque_region: Option<Region>,
    /// Damage not yet consumed by a frame
    pub damage: Vec<Rectangle>,
    /// Frame callbacks waiting for the next presented frame
    pub frame_callbacks: Vec<CallbackId>,
}

impl Default for SurfaceState {
    fn default() -> Self {
        Self {
            buffer: None,
            size: (0, 0),
            offset: (0, 0),
            scale: 1,
            transform: BufferTransform::Normal,
            input_region: None,
            opaque_region: None,
            damage: Vec::new(),
            frame_callbacks: Vec::new(),
        }
    }
}

/// What a commit changed, for the caller to act on
#[derive(Debug, Default)]
pub struct CommitOutcome {
    /// The surface went from no buffer to a buffer
    pub mapped: bool,
    /// The surface went from a buffer to no buffer
    pub unmapped: bool,
    /// The committed size differs from the previous one
    pub resized: bool,
    /// New damage was recorded
    pub damaged: bool,
    /// The reference dropped by this commit, and what it caused
    pub released: Option<(BufferId, ReleaseOutcome)>,
}

/// A Wayland surface
#[derive(Debug)]
pub struct Surface {
    /// Unique identifier
    pub id: SurfaceId,
    /// Connection that created the surface
    pub owner: ConnectionId,
    /// Pending state (not yet committed)
    pub pending: SurfacePendingState,
    /// Last committed state
    pub current: SurfaceState,
    /// Role-specific data (e.g., xdg_surface role)
    role: SurfaceRole,
    /// Whether a role object currently exists for the role
    role_active: bool,
    /// Outputs the surface is currently shown on
    pub outputs: Vec<OutputId>,
}

impl Surface {
    /// Create a new surface
    pub fn new(owner: ConnectionId) -> Self {
        Self {
            id: SurfaceId::new(),
            owner,
            pending: SurfacePendingState::default(),
            current: SurfaceState::default(),
            role: SurfaceRole::None,
            role_active: false,
            outputs: Vec::new(),
        }
    }

    /// Attach a buffer to the pending state
    pub fn attach(&mut self, buffer: Option<BufferId>, dx: i32, dy: i32) {
        self.pending.buffer = PendingChange::Set(buffer);
        self.pending.offset = (dx, dy);
    }

    /// Set the pending offset without attaching
    pub fn set_offset(&mut self, dx: i32, dy: i32) {
        self.pending.offset = (dx, dy);
    }

    /// Add surface-coordinate damage to the pending state
    pub fn damage(&mut self, rect: Rectangle) {
        self.pending.damage = self.pending.damage.union(&rect);
    }

    /// Add buffer-coordinate damage to the pending state
    pub fn damage_buffer(&mut self, rect: Rectangle) {
        self.pending.buffer_damage = self.pending.buffer_damage.union(&rect);
    }

    /// Add a frame callback
    pub fn frame(&mut self, callback: CallbackId) {
        self.pending.frame_callbacks.push(callback);
    }

    /// Set the buffer scale
    pub fn set_scale(&mut self, scale: i32) {
        self.pending.scale = PendingChange::Set(scale);
    }

    /// Set the buffer transform
    pub fn set_transform(&mut self, transform: BufferTransform) {
        self.pending.transform = PendingChange::Set(transform);
    }

    pub fn set_input_region(&mut self, region: Option<Region>) {
        self.pending.input_region = PendingChange::Set(region);
    }

    pub fn set_opaque_region(&mut self, region: Option<Region>) {
        self.pending.opaque_region = PendingChange::Set(region);
    }

    /// Commit pending state to current state.
    ///
    /// The new buffer reference is taken before anything is moved, so a
    /// failed commit leaves both slots untouched.
    pub fn commit(&mut self, buffers: &mut BufferRegistry) -> Result<CommitOutcome, BufferError> {
        let new_buffer = match &self.pending.buffer {
            PendingChange::Set(Some(id)) => {
                let info = buffers.info(*id).ok_or(BufferError::UnknownBuffer(*id))?;
                Some((buffers.attach_reference(*id)?, info.width as i32, info.height as i32))
            }
            _ => None,
        };

        let pending = std::mem::take(&mut self.pending);
        let mut outcome = CommitOutcome::default();
        let was_mapped = self.current.buffer.is_some();
        let old_size = self.current.size;

        if let PendingChange::Set(scale) = pending.scale {
            self.current.scale = scale;
        }
        if let PendingChange::Set(transform) = pending.transform {
            self.current.transform = transform;
        }
        if let PendingChange::Set(region) = pending.input_region {
            self.current.input_region = region;
        }
        if let PendingChange::Set(region) = pending.opaque_region {
            self.current.opaque_region = region;
        }

        let mut buffer_size = None;
        if let PendingChange::Set(attached) = pending.buffer {
            let old = match (attached, new_buffer) {
                (Some(_), Some((reference, width, height))) => {
                    buffer_size = Some((width, height));
                    self.current.buffer.replace(reference)
                }
                _ => {
                    self.current.size = (0, 0);
                    self.current.buffer.take()
                }
            };
            if let Some(old) = old {
                let id = old.id();
                outcome.released = Some((id, buffers.release_reference(old)));
            }
            self.current.offset.0 = self.current.offset.0.saturating_add(pending.offset.0);
            self.current.offset.1 = self.current.offset.1.saturating_add(pending.offset.1);
        } else if let Some(id) = self.current.buffer.as_ref().map(BufferRef::id) {
            // Scale or transform may change the logical size of the same buffer
            buffer_size = buffers.info(id).map(|info| (info.width as i32, info.height as i32));
        }

        if let Some((width, height)) = buffer_size {
            let (width, height) = if self.current.transform.swaps_axes() {
                (height, width)
            } else {
                (width, height)
            };
            let scale = self.current.scale.max(1);
            self.current.size = (width / scale, height / scale);
        }

        let mut damage = pending.damage;
        if !pending.buffer_damage.is_empty() {
            damage = damage.union(&self.buffer_to_surface_damage(pending.buffer_damage));
        }
        if let Some(visible) = damage.intersection(&Rectangle::from_size(
            self.current.size.0,
            self.current.size.1,
        )) {
            self.current.damage.push(visible);
            outcome.damaged = true;
        }

        self.current
            .frame_callbacks
            .extend(pending.frame_callbacks);

        let is_mapped = self.current.buffer.is_some();
        outcome.mapped = !was_mapped && is_mapped;
        outcome.unmapped = was_mapped && !is_mapped;
        outcome.resized = old_size != self.current.size;
        if is_mapped && (outcome.mapped || outcome.resized) {
            // New content everywhere
            self.current.damage.clear();
            self.current
                .damage
                .push(Rectangle::from_size(self.current.size.0, self.current.size.1));
            outcome.damaged = true;
        } else if outcome.unmapped {
            self.current.damage.clear();
        }

        trace!("Surface {:?} committed: {:?}", self.id, outcome);
        Ok(outcome)
    }

    /// Convert buffer-coordinate damage to surface coordinates.
    ///
    /// Rounds outwards; rotated or flipped buffers damage the whole surface.
    fn buffer_to_surface_damage(&self, rect: Rectangle) -> Rectangle {
        if self.current.transform != BufferTransform::Normal {
            return Rectangle::from_size(self.current.size.0, self.current.size.1);
        }
        let scale = self.current.scale.max(1);
        let x = rect.x.div_euclid(scale);
        let y = rect.y.div_euclid(scale);
        let right = rect.right().saturating_add(scale - 1).div_euclid(scale);
        let bottom = rect.bottom().saturating_add(scale - 1).div_euclid(scale);
        Rectangle::new(x, y, right.saturating_sub(x), bottom.saturating_sub(y))
    }

    /// Take damage that has not been drawn yet
    pub fn take_damage(&mut self) -> Vec<Rectangle> {
        std::mem::take(&mut self.current.damage)
    }

    /// Take the callbacks to fire after a presented frame
    pub fn take_frame_callbacks(&mut self) -> Vec<CallbackId> {
        std::mem::take(&mut self.current.frame_callbacks)
    }

    /// Currently attached buffer
    pub fn buffer(&self) -> Option<BufferId> {
        self.current.buffer.as_ref().map(BufferRef::id)
    }

    /// Whether the surface has committed content
    pub fn is_mapped(&self) -> bool {
        self.current.buffer.is_some()
    }

    /// Check whether a surface-local point accepts input
    pub fn accepts_input(&self, x: f64, y: f64) -> bool {
        let bounds = Rectangle::from_size(self.current.size.0, self.current.size.1);
        if !bounds.contains(x, y) {
            return false;
        }
        match &self.current.input_region {
            Some(region) => region.contains(x.floor() as i32, y.floor() as i32),
            None => true,
        }
    }

    /// Get the surface role
    pub fn role(&self) -> SurfaceRole {
        self.role
    }

    /// Set the surface role.
    ///
    /// A surface keeps its first role for life. The same role may be taken
    /// again only once the previous role object is gone; cursors may be set
    /// repeatedly.
    pub fn set_role(&mut self, role: SurfaceRole) -> Result<(), SurfaceRole> {
        let allowed = match self.role {
            SurfaceRole::None => true,
            current if current == role => role == SurfaceRole::Cursor || !self.role_active,
            _ => false,
        };
        if !allowed {
            return Err(self.role);
        }
        self.role = role;
        self.role_active = role != SurfaceRole::Cursor;
        Ok(())
    }

    /// The role object was destroyed; the role itself stays
    pub fn clear_role_object(&mut self) {
        self.role_active = false;
    }

    /// Drop the current buffer reference, as on destruction
    pub fn release_buffer(&mut self, buffers: &mut BufferRegistry) -> Option<(BufferId, ReleaseOutcome)> {
        self.current.buffer.take().map(|reference| {
            let id = reference.id();
            (id, buffers.release_reference(reference))
        })
    }
}

/// Manager for all surfaces
#[derive(Debug)]
pub struct SurfaceManager {
    surfaces: HashMap<SurfaceId, Surface>,
}

impl SurfaceManager {
    /// Create a new surface manager
    pub fn new() -> Self {
        Self {
            surfaces: HashMap::new(),
        }
    }

    /// Create a new surface and return its ID
    pub fn create_surface(&mut self, owner: ConnectionId) -> SurfaceId {
        let surface = Surface::new(owner);
        let id = surface.id;
        self.surfaces.insert(id, surface);
        debug!("Created surface {:?} for {:?}", id, owner);
        id
    }

    /// Get a surface by ID
    pub fn get(&self, id: SurfaceId) -> Option<&Surface> {
        self.surfaces.get(&id)
    }

    /// Get a mutable surface by ID
    pub fn get_mut(&mut self, id: SurfaceId) -> Option<&mut Surface> {
        self.surfaces.get_mut(&id)
    }

    /// Remove a surface
    pub fn remove(&mut self, id: SurfaceId) -> Option<Surface> {
        self.surfaces.remove(&id)
    }

    /// Owner of a surface
    pub fn owner(&self, id: SurfaceId) -> Option<ConnectionId> {
        self.surfaces.get(&id).map(|s| s.owner)
    }

    /// Get all surfaces
    pub fn iter(&self) -> impl Iterator<Item = (&SurfaceId, &Surface)> {
        self.surfaces.iter()
    }

    /// Get all surfaces mutably
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&SurfaceId, &mut Surface)> {
        self.surfaces.iter_mut()
    }

    /// Get count of surfaces
    pub fn len(&self) -> usize {
        self.surfaces.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.surfaces.is_empty()
    }
}

impl Default for SurfaceManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compositor::buffer::{ExternalHandle, PixelFormat};

    const CLIENT: ConnectionId = ConnectionId(1);

    fn buffer(registry: &mut BufferRegistry, width: u32, height: u32) -> BufferId {
        registry
            .import(
                CLIENT,
                ExternalHandle::from_bytes(vec![0; (width * height * 4) as usize]),
                width,
                height,
                width * 4,
                PixelFormat::Xrgb8888.to_wayland(),
            )
            .unwrap()
    }

    #[test]
    fn test_surface_id_unique() {
        let id1 = SurfaceId::new();
        let id2 = SurfaceId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_attach_does_not_touch_current() {
        let mut buffers = BufferRegistry::new();
        let a = buffer(&mut buffers, 10, 10);
        let mut surface = Surface::new(CLIENT);
        surface.attach(Some(a), 0, 0);
        assert!(surface.buffer().is_none());
        assert_eq!(buffers.info(a).unwrap().references, 0);

        surface.commit(&mut buffers).unwrap();
        assert_eq!(surface.buffer(), Some(a));
        assert_eq!(surface.current.size, (10, 10));
        assert_eq!(buffers.info(a).unwrap().references, 1);
    }

    #[test]
    fn test_commit_without_buffer_change_keeps_one_reference() {
        let mut buffers = BufferRegistry::new();
        let a = buffer(&mut buffers, 4, 4);
        let mut surface = Surface::new(CLIENT);
        surface.attach(Some(a), 0, 0);
        surface.commit(&mut buffers).unwrap();

        surface.damage(Rectangle::new(0, 0, 2, 2));
        surface.commit(&mut buffers).unwrap();
        surface.commit(&mut buffers).unwrap();
        assert_eq!(buffers.info(a).unwrap().references, 1);
    }

    #[test]
    fn test_swap_buffers_destroys_released_old_buffer() {
        let mut buffers = BufferRegistry::new();
        let a = buffer(&mut buffers, 4, 4);
        let b = buffer(&mut buffers, 4, 4);
        let mut surface = Surface::new(CLIENT);

        surface.attach(Some(a), 0, 0);
        surface.commit(&mut buffers).unwrap();
        buffers.client_release(a).unwrap();
        assert!(buffers.contains(a));

        surface.attach(Some(b), 0, 0);
        let outcome = surface.commit(&mut buffers).unwrap();
        assert_eq!(outcome.released, Some((a, ReleaseOutcome::Destroyed)));
        assert!(!buffers.contains(a));
        assert_eq!(buffers.info(b).unwrap().references, 1);
    }

    #[test]
    fn test_commit_with_unknown_buffer_leaves_state() {
        let mut buffers = BufferRegistry::new();
        let a = buffer(&mut buffers, 4, 4);
        let mut surface = Surface::new(CLIENT);
        surface.attach(Some(a), 0, 0);
        surface.commit(&mut buffers).unwrap();

        surface.attach(Some(BufferId(u64::MAX)), 0, 0);
        surface.damage(Rectangle::new(0, 0, 1, 1));
        assert!(surface.commit(&mut buffers).is_err());
        assert_eq!(surface.buffer(), Some(a));
        assert!(surface.pending.buffer.is_set());
    }

    #[test]
    fn test_damage_is_unioned_and_moved() {
        let mut buffers = BufferRegistry::new();
        let a = buffer(&mut buffers, 100, 100);
        let mut surface = Surface::new(CLIENT);
        surface.attach(Some(a), 0, 0);
        surface.commit(&mut buffers).unwrap();
        surface.take_damage();

        surface.damage(Rectangle::new(0, 0, 10, 10));
        surface.damage(Rectangle::new(50, 50, 10, 10));
        let outcome = surface.commit(&mut buffers).unwrap();
        assert!(outcome.damaged);
        assert_eq!(surface.take_damage(), vec![Rectangle::new(0, 0, 60, 60)]);
        assert!(surface.pending.damage.is_empty());
    }

    #[test]
    fn test_buffer_damage_rounds_out_by_scale() {
        let mut buffers = BufferRegistry::new();
        let a = buffer(&mut buffers, 200, 200);
        let mut surface = Surface::new(CLIENT);
        surface.set_scale(2);
        surface.attach(Some(a), 0, 0);
        surface.commit(&mut buffers).unwrap();
        assert_eq!(surface.current.size, (100, 100));
        surface.take_damage();

        surface.damage_buffer(Rectangle::new(3, 3, 4, 4));
        surface.commit(&mut buffers).unwrap();
        assert_eq!(surface.take_damage(), vec![Rectangle::new(1, 1, 3, 3)]);
    }

    #[test]
    fn test_huge_damage_covers_surface() {
        let mut buffers = BufferRegistry::new();
        let a = buffer(&mut buffers, 200, 200);
        let mut surface = Surface::new(CLIENT);
        surface.attach(Some(a), 0, 0);
        surface.commit(&mut buffers).unwrap();
        surface.take_damage();

        surface.damage(Rectangle::new(1, 1, i32::MAX, i32::MAX));
        assert!(surface.commit(&mut buffers).unwrap().damaged);
        assert_eq!(surface.take_damage(), vec![Rectangle::new(1, 1, 199, 199)]);

        surface.set_scale(2);
        surface.commit(&mut buffers).unwrap();
        surface.take_damage();
        surface.damage_buffer(Rectangle::new(0, 0, i32::MAX, i32::MAX));
        surface.commit(&mut buffers).unwrap();
        assert_eq!(surface.take_damage(), vec![Rectangle::new(0, 0, 100, 100)]);
    }

    #[test]
    fn test_null_attach_unmaps() {
        let mut buffers = BufferRegistry::new();
        let a = buffer(&mut buffers, 4, 4);
        let mut surface = Surface::new(CLIENT);
        surface.attach(Some(a), 0, 0);
        assert!(surface.commit(&mut buffers).unwrap().mapped);

        surface.attach(None, 0, 0);
        let outcome = surface.commit(&mut buffers).unwrap();
        assert!(outcome.unmapped);
        assert_eq!(outcome.released, Some((a, ReleaseOutcome::Idle { owner: CLIENT })));
    }

    #[test]
    fn test_frame_callbacks_move_on_commit() {
        let mut buffers = BufferRegistry::new();
        let mut surface = Surface::new(CLIENT);
        let callback = CallbackId::new();
        surface.frame(callback);
        assert!(surface.current.frame_callbacks.is_empty());
        surface.commit(&mut buffers).unwrap();
        assert_eq!(surface.take_frame_callbacks(), vec![callback]);
    }

    #[test]
    fn test_input_region_limits_hits() {
        let mut buffers = BufferRegistry::new();
        let a = buffer(&mut buffers, 100, 100);
        let mut surface = Surface::new(CLIENT);
        let mut region = Region::new();
        region.add(Rectangle::new(0, 0, 50, 50));
        surface.set_input_region(Some(region));
        surface.attach(Some(a), 0, 0);
        surface.commit(&mut buffers).unwrap();

        assert!(surface.accepts_input(10.0, 10.0));
        assert!(!surface.accepts_input(75.0, 75.0));
        assert!(!surface.accepts_input(150.0, 10.0));
    }

    #[test]
    fn test_surface_role() {
        let mut surface = Surface::new(CLIENT);
        assert!(surface.set_role(SurfaceRole::Toplevel).is_ok());
        assert_eq!(surface.set_role(SurfaceRole::Toplevel), Err(SurfaceRole::Toplevel));
        assert_eq!(surface.set_role(SurfaceRole::Popup), Err(SurfaceRole::Toplevel));

        surface.clear_role_object();
        assert!(surface.set_role(SurfaceRole::Toplevel).is_ok());
    }

    #[test]
    fn test_cursor_role_is_reusable() {
        let mut surface = Surface::new(CLIENT);
        assert!(surface.set_role(SurfaceRole::Cursor).is_ok());
        assert!(surface.set_role(SurfaceRole::Cursor).is_ok());
        assert!(surface.set_role(SurfaceRole::Toplevel).is_err());
    }

    #[test]
    fn test_surface_manager() {
        let mut manager = SurfaceManager::new();
        let id = manager.create_surface(CLIENT);
        assert_eq!(manager.owner(id), Some(CLIENT));
        manager.remove(id);
        assert!(manager.get(id).is_none());
    }
}
