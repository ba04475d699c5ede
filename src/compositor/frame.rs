//! Frame lists
//!
//! A frame list is the ordered set of visible surfaces for one frame,
//! bottom to top: tiled windows, floating windows, the fullscreen window,
//! popups and finally the cursor. It is also the snapshot remote-display
//! consumers read and the structure pointer hit-testing walks.

use crate::compositor::buffer::BufferId;
use crate::compositor::geometry::Rectangle;
use crate::compositor::SurfaceId;
use crate::protocol::compositor::Region;
use crate::renderer::TextureHandle;

/// What a frame element is drawn as
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ElementKind {
    Tiled,
    Floating,
    Fullscreen,
    Popup,
    Cursor,
}

/// Window decoration drawn around a tiled or floating window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Border {
    pub width: i32,
    /// ARGB color
    pub color: u32,
}

/// One surface in a frame
#[derive(Debug, Clone, PartialEq)]
pub struct FrameElement {
    pub surface: SurfaceId,
    pub buffer: BufferId,
    /// Set once the buffer is bound for presentation
    pub texture: Option<TextureHandle>,
    /// Destination in global logical coordinates
    pub geometry: Rectangle,
    /// Damage in surface-local coordinates since the previous frame
    pub damage: Vec<Rectangle>,
    pub kind: ElementKind,
    /// Title strip for stacked and tabbed layouts
    pub title_bar: Option<Rectangle>,
    pub border: Option<Border>,
    /// Copied from the surface; `None` accepts input everywhere
    pub input_region: Option<Region>,
}

impl FrameElement {
    pub fn new(surface: SurfaceId, buffer: BufferId, geometry: Rectangle, kind: ElementKind) -> Self {
        Self {
            surface,
            buffer,
            texture: None,
            geometry,
            damage: Vec::new(),
            kind,
            title_bar: None,
            border: None,
            input_region: None,
        }
    }

    /// Whether a global point hits this element's input area
    fn accepts_input(&self, x: f64, y: f64) -> bool {
        if self.kind == ElementKind::Cursor || !self.geometry.contains(x, y) {
            return false;
        }
        match &self.input_region {
            Some(region) => region.contains(
                (x - self.geometry.x as f64).floor() as i32,
                (y - self.geometry.y as f64).floor() as i32,
            ),
            None => true,
        }
    }
}

/// Ordered visible surfaces for one frame
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameList {
    /// Area of the output being drawn
    pub output: Rectangle,
    elements: Vec<FrameElement>,
}

impl FrameList {
    pub fn new(output: Rectangle) -> Self {
        Self {
            output,
            elements: Vec::new(),
        }
    }

    /// Append an element on top of everything pushed so far
    pub fn push(&mut self, element: FrameElement) {
        debug_assert!(
            self.elements.last().map_or(true, |last| last.kind <= element.kind),
            "frame elements pushed out of stacking order"
        );
        self.elements.push(element);
    }

    /// Elements bottom to top
    pub fn elements(&self) -> &[FrameElement] {
        &self.elements
    }

    pub fn elements_mut(&mut self) -> &mut [FrameElement] {
        &mut self.elements
    }

    pub fn iter(&self) -> impl Iterator<Item = &FrameElement> {
        self.elements.iter()
    }

    pub fn contains(&self, surface: SurfaceId) -> bool {
        self.elements.iter().any(|e| e.surface == surface)
    }

    /// `(geometry, buffer)` pairs bottom to top, for read-only consumers.
    ///
    /// The buffer ids carry no reference; a consumer that keeps one past the
    /// next commit takes its own through the buffer registry.
    pub fn snapshot(&self) -> Vec<(Rectangle, BufferId)> {
        self.elements.iter().map(|e| (e.geometry, e.buffer)).collect()
    }

    /// Topmost surface accepting input at a global point, with the point in
    /// surface-local coordinates
    pub fn surface_at(&self, x: f64, y: f64) -> Option<(SurfaceId, f64, f64)> {
        self.elements
            .iter()
            .rev()
            .find(|e| e.accepts_input(x, y))
            .map(|e| (e.surface, x - e.geometry.x as f64, y - e.geometry.y as f64))
    }

    /// Geometry of a surface in this frame
    pub fn geometry_of(&self, surface: SurfaceId) -> Option<Rectangle> {
        self.elements
            .iter()
            .find(|e| e.surface == surface)
            .map(|e| e.geometry)
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }
}
