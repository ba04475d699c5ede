//! Touch point tracking

use std::collections::BTreeMap;

use crate::compositor::SurfaceId;

/// An active touch point
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TouchPoint {
    /// Surface that received the down event
    pub surface: SurfaceId,
    /// Last position in surface coordinates
    pub position: (f64, f64),
}

/// Touch events sent to clients
#[derive(Debug, Clone, PartialEq)]
pub enum TouchEvent {
    Down {
        serial: u32,
        time: u32,
        surface: SurfaceId,
        id: i32,
        x: f64,
        y: f64,
    },
    Up { serial: u32, time: u32, id: i32 },
    Motion { time: u32, id: i32, x: f64, y: f64 },
    Frame,
    Cancel,
}

/// Touch state
#[derive(Debug, Default)]
pub struct Touch {
    points: BTreeMap<i32, TouchPoint>,
}

impl Touch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a point; a reused id replaces the old point
    pub fn down(&mut self, id: i32, surface: SurfaceId, x: f64, y: f64) {
        self.points.insert(
            id,
            TouchPoint {
                surface,
                position: (x, y),
            },
        );
    }

    /// Move a point; unknown ids yield `None`
    pub fn motion(&mut self, id: i32, x: f64, y: f64) -> Option<TouchPoint> {
        let point = self.points.get_mut(&id)?;
        point.position = (x, y);
        Some(*point)
    }

    /// Stop tracking a point; unknown ids yield `None`
    pub fn up(&mut self, id: i32) -> Option<TouchPoint> {
        self.points.remove(&id)
    }

    pub fn point(&self, id: i32) -> Option<&TouchPoint> {
        self.points.get(&id)
    }

    /// Surfaces with at least one active point
    pub fn surfaces(&self) -> Vec<SurfaceId> {
        let mut surfaces: Vec<SurfaceId> = self.points.values().map(|p| p.surface).collect();
        surfaces.sort();
        surfaces.dedup();
        surfaces
    }

    /// Drop every point
    pub fn clear(&mut self) {
        self.points.clear();
    }

    /// Drop points on a surface that no longer exists
    pub fn forget_surface(&mut self, surface: SurfaceId) {
        self.points.retain(|_, p| p.surface != surface);
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}
