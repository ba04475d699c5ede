//! xdg_positioner state and popup placement
//!
//! Positioners are plain value objects: the popup role copies one when it is
//! created or repositioned and places itself with [`XdgPositioner::place`].

use bitflags::bitflags;

use crate::compositor::geometry::Rectangle;
use crate::compositor::ToplevelStates;

/// Anchor edge for popup positioning
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Anchor {
    #[default]
    None,
    Top,
    Bottom,
    Left,
    Right,
    TopLeft,
    BottomLeft,
    TopRight,
    BottomRight,
}

impl Anchor {
    /// Create from an xdg_positioner.anchor value
    pub fn from_wayland(value: u32) -> Option<Self> {
        Some(match value {
            0 => Anchor::None,
            1 => Anchor::Top,
            2 => Anchor::Bottom,
            3 => Anchor::Left,
            4 => Anchor::Right,
            5 => Anchor::TopLeft,
            6 => Anchor::BottomLeft,
            7 => Anchor::TopRight,
            8 => Anchor::BottomRight,
            _ => return None,
        })
    }

    fn flip_x(self) -> Self {
        match self {
            Anchor::Left => Anchor::Right,
            Anchor::Right => Anchor::Left,
            Anchor::TopLeft => Anchor::TopRight,
            Anchor::TopRight => Anchor::TopLeft,
            Anchor::BottomLeft => Anchor::BottomRight,
            Anchor::BottomRight => Anchor::BottomLeft,
            other => other,
        }
    }

    fn flip_y(self) -> Self {
        match self {
            Anchor::Top => Anchor::Bottom,
            Anchor::Bottom => Anchor::Top,
            Anchor::TopLeft => Anchor::BottomLeft,
            Anchor::BottomLeft => Anchor::TopLeft,
            Anchor::TopRight => Anchor::BottomRight,
            Anchor::BottomRight => Anchor::TopRight,
            other => other,
        }
    }

    /// Anchor point on `rect`
    fn point(self, rect: Rectangle) -> (i32, i32) {
        let (x, y) = (rect.x, rect.y);
        let (cx, cy) = (x.saturating_add(rect.width / 2), y.saturating_add(rect.height / 2));
        let (right, bottom) = (rect.right(), rect.bottom());
        match self {
            Anchor::None => (cx, cy),
            Anchor::Top => (cx, y),
            Anchor::Bottom => (cx, bottom),
            Anchor::Left => (x, cy),
            Anchor::Right => (right, cy),
            Anchor::TopLeft => (x, y),
            Anchor::TopRight => (right, y),
            Anchor::BottomLeft => (x, bottom),
            Anchor::BottomRight => (right, bottom),
        }
    }
}

/// Gravity for popup positioning; same value set as [`Anchor`]
pub type Gravity = Anchor;

impl Gravity {
    /// Top-left corner of a `(w, h)` box hanging off `point` in this direction
    fn origin(self, point: (i32, i32), w: i32, h: i32) -> (i32, i32) {
        let (ax, ay) = point;
        let (cx, cy) = (ax.saturating_sub(w / 2), ay.saturating_sub(h / 2));
        let (left, top) = (ax.saturating_sub(w), ay.saturating_sub(h));
        match self {
            Gravity::None => (cx, cy),
            Gravity::Top => (cx, top),
            Gravity::Bottom => (cx, ay),
            Gravity::Left => (left, cy),
            Gravity::Right => (ax, cy),
            Gravity::TopLeft => (left, top),
            Gravity::TopRight => (ax, top),
            Gravity::BottomLeft => (left, ay),
            Gravity::BottomRight => (ax, ay),
        }
    }
}

bitflags! {
    /// How a popup may be moved to stay on screen
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ConstraintAdjustment: u32 {
        const SLIDE_X = 1;
        const SLIDE_Y = 2;
        const FLIP_X = 4;
        const FLIP_Y = 8;
        const RESIZE_X = 16;
        const RESIZE_Y = 32;
    }
}

/// XDG positioner for popup placement
#[derive(Debug, Clone, Default, PartialEq)]
pub struct XdgPositioner {
    /// Size of the popup
    pub size: (i32, i32),
    /// Anchor rectangle in parent window-geometry coordinates
    pub anchor_rect: Rectangle,
    pub anchor: Anchor,
    pub gravity: Gravity,
    pub constraint_adjustment: ConstraintAdjustment,
    /// Offset from calculated position
    pub offset: (i32, i32),
    /// Re-run placement when the parent moves
    pub reactive: bool,
}

impl XdgPositioner {
    /// Create a new positioner
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the popup size
    pub fn set_size(&mut self, width: i32, height: i32) {
        self.size = (width, height);
    }

    /// Set the anchor rectangle
    pub fn set_anchor_rect(&mut self, rect: Rectangle) {
        self.anchor_rect = rect;
    }

    /// Set the anchor edge
    pub fn set_anchor(&mut self, anchor: Anchor) {
        self.anchor = anchor;
    }

    /// Set the gravity
    pub fn set_gravity(&mut self, gravity: Gravity) {
        self.gravity = gravity;
    }

    /// Set constraint adjustment
    pub fn set_constraint_adjustment(&mut self, bits: u32) {
        self.constraint_adjustment = ConstraintAdjustment::from_bits_truncate(bits);
    }

    /// Set offset
    pub fn set_offset(&mut self, x: i32, y: i32) {
        self.offset = (x, y);
    }

    /// A positioner is usable once it has a size and an anchor rectangle
    pub fn is_complete(&self) -> bool {
        self.size.0 > 0 && self.size.1 > 0 && self.anchor_rect.width > 0 && self.anchor_rect.height > 0
    }

    fn position(&self, anchor: Anchor, gravity: Gravity) -> Rectangle {
        let (w, h) = self.size;
        let (x, y) = gravity.origin(anchor.point(self.anchor_rect), w, h);
        Rectangle::new(x.saturating_add(self.offset.0), y.saturating_add(self.offset.1), w, h)
    }

    /// Unconstrained popup geometry relative to the parent
    pub fn calculate_geometry(&self) -> Rectangle {
        self.position(self.anchor, self.gravity)
    }

    /// Popup geometry relative to the parent, kept inside `bounds` (also
    /// parent-relative) as far as the constraint adjustments allow
    pub fn place(&self, bounds: Rectangle) -> Rectangle {
        let mut geometry = self.calculate_geometry();
        if bounds.is_empty() {
            return geometry;
        }
        let adjust = self.constraint_adjustment;

        let overflows_x = |g: &Rectangle| g.x < bounds.x || g.right() > bounds.right();
        let overflows_y = |g: &Rectangle| g.y < bounds.y || g.bottom() > bounds.bottom();

        if overflows_x(&geometry) && adjust.contains(ConstraintAdjustment::FLIP_X) {
            let flipped = self.position(self.anchor.flip_x(), self.gravity.flip_x());
            if !overflows_x(&flipped) {
                geometry.x = flipped.x;
            }
        }
        if overflows_y(&geometry) && adjust.contains(ConstraintAdjustment::FLIP_Y) {
            let flipped = self.position(self.anchor.flip_y(), self.gravity.flip_y());
            if !overflows_y(&flipped) {
                geometry.y = flipped.y;
            }
        }

        if overflows_x(&geometry) && adjust.contains(ConstraintAdjustment::SLIDE_X) {
            geometry.x = geometry.x.min(bounds.right().saturating_sub(geometry.width)).max(bounds.x);
        }
        if overflows_y(&geometry) && adjust.contains(ConstraintAdjustment::SLIDE_Y) {
            geometry.y = geometry.y.min(bounds.bottom().saturating_sub(geometry.height)).max(bounds.y);
        }

        if adjust.contains(ConstraintAdjustment::RESIZE_X) {
            if let Some(visible) = geometry.intersection(&bounds) {
                geometry.x = visible.x;
                geometry.width = visible.width;
            }
        }
        if adjust.contains(ConstraintAdjustment::RESIZE_Y) {
            if let Some(visible) = geometry.intersection(&bounds) {
                geometry.y = visible.y;
                geometry.height = visible.height;
            }
        }

        geometry
    }
}

/// Encode toplevel states as the `xdg_toplevel.configure` states array.
///
/// Tiled windows report all four tiled edges. Minimized has no wire state.
pub fn toplevel_states_to_wire(states: ToplevelStates) -> Vec<u8> {
    const MAXIMIZED: u32 = 1;
    const FULLSCREEN: u32 = 2;
    const ACTIVATED: u32 = 4;
    const TILED_EDGES: [u32; 4] = [5, 6, 7, 8];

    let mut values = Vec::new();
    if states.contains(ToplevelStates::MAXIMIZED) {
        values.push(MAXIMIZED);
    }
    if states.contains(ToplevelStates::FULLSCREEN) {
        values.push(FULLSCREEN);
    }
    if states.contains(ToplevelStates::ACTIVATED) {
        values.push(ACTIVATED);
    }
    if states.contains(ToplevelStates::TILED) {
        values.extend(TILED_EDGES);
    }
    values.into_iter().flat_map(u32::to_ne_bytes).collect()
}
