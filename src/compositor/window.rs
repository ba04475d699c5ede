//! Toplevel window management
//!
//! A window is the toplevel role attached to one surface. Client requests
//! change the window's intent; the compositor decides the actual state and
//! size and proposes them through configures.

use std::collections::HashMap;

use bitflags::bitflags;
use log::debug;

use crate::compositor::configure::ConfigureTracker;
use crate::compositor::geometry::Rectangle;
use crate::compositor::SurfaceId;
use crate::layout::LayoutSlot;

bitflags! {
    /// Window state flags sent in toplevel configures
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ToplevelStates: u32 {
        const MAXIMIZED = 1 << 0;
        const FULLSCREEN = 1 << 1;
        const MINIMIZED = 1 << 2;
        const ACTIVATED = 1 << 3;
        /// Placed by the tiling engine with neighbours on every side
        const TILED = 1 << 4;
    }
}

/// What the compositor proposes to a toplevel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ToplevelConfigure {
    /// Proposed size; zero lets the client pick
    pub size: (i32, i32),
    pub states: ToplevelStates,
}

/// A sent configure with the layout cell it was computed from
#[derive(Debug, Clone, PartialEq)]
pub struct Proposal {
    pub configure: ToplevelConfigure,
    pub slot: Option<LayoutSlot>,
}

/// A toplevel window
#[derive(Debug)]
pub struct Window {
    /// Associated surface
    pub surface_id: SurfaceId,
    /// Window title
    pub title: Option<String>,
    /// Application ID (app_id)
    pub app_id: Option<String>,
    /// Minimum size (0 = no minimum)
    pub min_size: (i32, i32),
    /// Maximum size (0 = no maximum)
    pub max_size: (i32, i32),
    /// Parent window (for transient windows)
    pub parent: Option<SurfaceId>,
    /// States the client asked for
    pub requested: ToplevelStates,
    /// Size and states the compositor wants the client to have
    pub target: ToplevelConfigure,
    /// Layout cell the target was computed from
    pub target_slot: Option<LayoutSlot>,
    /// Configure/ack handshake
    pub configure: ConfigureTracker<Proposal>,
    /// Layout cell the client last committed to
    placed: Option<LayoutSlot>,
    /// Pending window geometry from xdg_surface.set_window_geometry
    pub pending_geometry: Option<Rectangle>,
    /// Visible window bounds inside the surface
    pub geometry: Option<Rectangle>,
    /// Last window menu request position, surface-local
    pub menu_request: Option<(i32, i32)>,
    /// The client committed once after getting the role
    pub initial_commit: bool,
    /// Has a buffer and is placed by the layout
    pub mapped: bool,
    /// Target changed since the last configure was sent
    needs_configure: bool,
}

impl Window {
    /// Create a new window
    pub fn new(surface_id: SurfaceId) -> Self {
        Self {
            surface_id,
            title: None,
            app_id: None,
            min_size: (0, 0),
            max_size: (0, 0),
            parent: None,
            requested: ToplevelStates::empty(),
            target: ToplevelConfigure::default(),
            target_slot: None,
            configure: ConfigureTracker::new(),
            placed: None,
            pending_geometry: None,
            geometry: None,
            menu_request: None,
            initial_commit: false,
            mapped: false,
            needs_configure: false,
        }
    }

    /// Set the window title
    pub fn set_title(&mut self, title: String) {
        self.title = Some(title);
    }

    /// Set the application ID
    pub fn set_app_id(&mut self, app_id: String) {
        self.app_id = Some(app_id);
    }

    /// Set minimum size
    pub fn set_min_size(&mut self, width: i32, height: i32) {
        self.min_size = (width.max(0), height.max(0));
    }

    /// Set maximum size
    pub fn set_max_size(&mut self, width: i32, height: i32) {
        self.max_size = (width.max(0), height.max(0));
    }

    pub fn set_parent(&mut self, parent: Option<SurfaceId>) {
        self.parent = parent;
    }

    pub fn show_window_menu(&mut self, x: i32, y: i32) {
        self.menu_request = Some((x, y));
    }

    /// Record the client's wish for maximized state
    pub fn request_maximize(&mut self, maximized: bool) {
        self.requested.set(ToplevelStates::MAXIMIZED, maximized);
        self.set_target_state(ToplevelStates::MAXIMIZED, maximized);
    }

    /// Record the client's wish for fullscreen state
    pub fn request_fullscreen(&mut self, fullscreen: bool) {
        self.requested.set(ToplevelStates::FULLSCREEN, fullscreen);
    }

    /// Record the client's wish to be minimized
    pub fn request_minimize(&mut self, minimized: bool) {
        self.requested.set(ToplevelStates::MINIMIZED, minimized);
    }

    /// Change one proposed state flag
    pub fn set_target_state(&mut self, state: ToplevelStates, enabled: bool) {
        let mut states = self.target.states;
        states.set(state, enabled);
        if states != self.target.states {
            self.target.states = states;
            self.needs_configure = true;
        }
    }

    /// Change the proposed size, honoring the client's limits
    pub fn set_target_size(&mut self, width: i32, height: i32) {
        let size = self.constrain(width, height);
        if size != self.target.size {
            self.target.size = size;
            self.needs_configure = true;
        }
    }

    /// Ask for a configure even if nothing changed
    pub fn schedule_configure(&mut self) {
        self.needs_configure = true;
    }

    /// Whether a configure should be sent
    pub fn needs_configure(&self) -> bool {
        self.needs_configure
    }

    /// Record a configure as sent
    pub fn configure_sent(&mut self, serial: u32) -> ToplevelConfigure {
        self.needs_configure = false;
        self.configure.send(
            serial,
            Proposal {
                configure: self.target,
                slot: self.target_slot.clone(),
            },
        );
        debug!(
            "Toplevel {:?} configure {}: {:?}",
            self.surface_id, serial, self.target
        );
        self.target
    }

    /// Nothing proposed is waiting for an ack or a commit
    pub fn is_settled(&self) -> bool {
        !self.needs_configure && self.configure.is_idle()
    }

    /// Promote the acked configure on commit
    pub fn commit_configure(&mut self) -> Option<ToplevelConfigure> {
        let applied = self.configure.commit()?.clone();
        if applied.slot.is_some() {
            self.placed = applied.slot;
        }
        Some(applied.configure)
    }

    /// Follow the layout directly while nothing is outstanding; a newly
    /// placed window starts at its first cell
    pub fn settle(&mut self, live: Option<LayoutSlot>) {
        if live.is_some() && (self.is_settled() || self.placed.is_none()) {
            self.placed = live;
        }
    }

    /// Where the window is drawn, given its cell in the current layout.
    ///
    /// While a configure is outstanding the window keeps the geometry the
    /// client last committed to; decoration colors, focus and policy
    /// visibility always follow the layout.
    pub fn placement(&self, live: LayoutSlot) -> LayoutSlot {
        let placed = match &self.placed {
            Some(placed) if !self.is_settled() => placed,
            _ => return live,
        };
        let border = match (placed.border, live.border) {
            (Some(_), Some(current)) => Some(current),
            (border, _) => border,
        };
        LayoutSlot {
            geometry: placed.geometry,
            title_bar: placed.title_bar,
            border,
            floating: placed.floating,
            fullscreen: placed.fullscreen,
            ..live
        }
    }

    /// Forget configure state, as when the client unmaps
    pub fn reset(&mut self) {
        self.configure.reset();
        self.placed = None;
        self.target_slot = None;
        self.initial_commit = false;
        self.mapped = false;
        self.needs_configure = false;
        self.target = ToplevelConfigure::default();
    }

    fn constrain(&self, width: i32, height: i32) -> (i32, i32) {
        let clamp = |value: i32, min: i32, max: i32| {
            if value == 0 {
                return 0;
            }
            let value = value.max(min);
            if max > 0 {
                value.min(max)
            } else {
                value
            }
        };
        (
            clamp(width, self.min_size.0, self.max_size.0),
            clamp(height, self.min_size.1, self.max_size.1),
        )
    }
}

/// Manager for all windows, keyed by their surface
#[derive(Debug)]
pub struct WindowManager {
    windows: HashMap<SurfaceId, Window>,
}

impl WindowManager {
    /// Create a new window manager
    pub fn new() -> Self {
        Self {
            windows: HashMap::new(),
        }
    }

    /// Create a new window for a surface
    pub fn create_window(&mut self, surface_id: SurfaceId) -> &mut Window {
        self.windows
            .entry(surface_id)
            .or_insert_with(|| Window::new(surface_id))
    }

    /// Get a window by surface ID
    pub fn get(&self, surface_id: SurfaceId) -> Option<&Window> {
        self.windows.get(&surface_id)
    }

    /// Get a mutable window by surface ID
    pub fn get_mut(&mut self, surface_id: SurfaceId) -> Option<&mut Window> {
        self.windows.get_mut(&surface_id)
    }

    /// Remove a window
    pub fn remove(&mut self, surface_id: SurfaceId) -> Option<Window> {
        self.windows.remove(&surface_id)
    }

    /// Check whether a surface is a toplevel
    pub fn contains(&self, surface_id: SurfaceId) -> bool {
        self.windows.contains_key(&surface_id)
    }

    /// Get all windows
    pub fn iter(&self) -> impl Iterator<Item = (&SurfaceId, &Window)> {
        self.windows.iter()
    }

    /// Get all windows mutably
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&SurfaceId, &mut Window)> {
        self.windows.iter_mut()
    }

    /// Get count of windows
    pub fn len(&self) -> usize {
        self.windows.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }
}

impl Default for WindowManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_new() {
        let surface_id = SurfaceId(1);
        let window = Window::new(surface_id);
        assert_eq!(window.surface_id, surface_id);
        assert!(window.title.is_none());
        assert!(!window.needs_configure());
    }

    #[test]
    fn test_requests_schedule_instead_of_apply() {
        let mut window = Window::new(SurfaceId(1));
        window.request_maximize(true);
        assert!(window.needs_configure());
        assert!(window.configure.current().is_none());

        let sent = window.configure_sent(10);
        assert!(sent.states.contains(ToplevelStates::MAXIMIZED));
        assert!(!window.needs_configure());
    }

    #[test]
    fn test_unchanged_target_does_not_reconfigure() {
        let mut window = Window::new(SurfaceId(1));
        window.set_target_size(400, 300);
        window.configure_sent(1);
        window.set_target_size(400, 300);
        window.set_target_state(ToplevelStates::ACTIVATED, false);
        assert!(!window.needs_configure());
    }

    fn slot(x: i32, width: i32) -> LayoutSlot {
        LayoutSlot {
            surface: SurfaceId(1),
            geometry: Rectangle::new(x, 0, width, 800),
            title_bar: None,
            border: None,
            visible: true,
            occluded: false,
            focused: true,
            floating: false,
            fullscreen: false,
        }
    }

    #[test]
    fn test_placement_waits_for_commit() {
        let mut window = Window::new(SurfaceId(1));
        window.settle(Some(slot(0, 1200)));

        window.set_target_size(600, 800);
        window.target_slot = Some(slot(0, 600));
        window.configure_sent(3);
        window.settle(Some(slot(0, 600)));
        assert_eq!(window.placement(slot(0, 600)).geometry.width, 1200);

        window.configure.ack(3).unwrap();
        assert_eq!(window.placement(slot(0, 600)).geometry.width, 1200);
        assert_eq!(window.commit_configure().unwrap().size, (600, 800));
        assert_eq!(window.placement(slot(600, 600)), slot(600, 600));
    }

    #[test]
    fn test_target_size_respects_limits() {
        let mut window = Window::new(SurfaceId(1));
        window.set_min_size(200, 0);
        window.set_max_size(0, 100);
        window.set_target_size(50, 500);
        assert_eq!(window.target.size, (200, 100));
    }

    #[test]
    fn test_window_manager() {
        let mut manager = WindowManager::new();
        let surface_id = SurfaceId(1);
        manager.create_window(surface_id).set_title("term".into());
        assert_eq!(manager.get(surface_id).unwrap().title.as_deref(), Some("term"));
        manager.remove(surface_id);
        assert!(manager.get(surface_id).is_none());
    }
}
