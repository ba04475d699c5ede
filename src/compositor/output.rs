//! Output/display management
//!
//! Tracks display sinks and records hot-plug changes so the protocol layer
//! can publish or withdraw the matching wl_output globals.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use log::info;

use crate::compositor::geometry::Rectangle;

/// Unique identifier for outputs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OutputId(pub u64);

impl OutputId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        OutputId(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// Output transform (rotation/flip)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputTransform {
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

impl OutputTransform {
    /// Convert to Wayland wl_output::transform value
    pub fn to_wayland(&self) -> u32 {
        match self {
            OutputTransform::Normal => 0,
            OutputTransform::Rotate90 => 1,
            OutputTransform::Rotate180 => 2,
            OutputTransform::Rotate270 => 3,
            OutputTransform::Flipped => 4,
            OutputTransform::Flipped90 => 5,
            OutputTransform::Flipped180 => 6,
            OutputTransform::Flipped270 => 7,
        }
    }

    fn swaps_axes(&self) -> bool {
        matches!(
            self,
            OutputTransform::Rotate90
                | OutputTransform::Rotate270
                | OutputTransform::Flipped90
                | OutputTransform::Flipped270
        )
    }
}

/// An output mode (resolution + refresh rate)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputMode {
    /// Width in pixels
    pub width: i32,
    /// Height in pixels
    pub height: i32,
    /// Refresh rate in mHz (e.g., 60000 for 60Hz)
    pub refresh: i32,
}

/// A display output (monitor)
#[derive(Debug, Clone)]
pub struct Output {
    /// Unique identifier
    pub id: OutputId,
    /// Output name (e.g., "HEADLESS-1")
    pub name: String,
    /// Manufacturer name
    pub make: String,
    /// Model name
    pub model: String,
    /// Position in global coordinate space
    pub position: (i32, i32),
    /// Physical size in millimeters
    pub physical_size: (i32, i32),
    /// Transform applied to output
    pub transform: OutputTransform,
    /// Current mode
    pub mode: OutputMode,
    /// Integer scale factor
    pub scale: i32,
}

impl Output {
    /// Create a new output
    pub fn new(name: impl Into<String>, mode: OutputMode) -> Self {
        Self {
            id: OutputId::new(),
            name: name.into(),
            make: String::new(),
            model: String::new(),
            position: (0, 0),
            physical_size: (0, 0),
            transform: OutputTransform::Normal,
            mode,
            scale: 1,
        }
    }

    /// Size in logical coordinates, after transform and scale
    pub fn logical_size(&self) -> (i32, i32) {
        let (w, h) = if self.transform.swaps_axes() {
            (self.mode.height, self.mode.width)
        } else {
            (self.mode.width, self.mode.height)
        };
        let scale = self.scale.max(1);
        (w / scale, h / scale)
    }

    /// Logical area in global coordinates
    pub fn logical_geometry(&self) -> Rectangle {
        let (w, h) = self.logical_size();
        Rectangle::new(self.position.0, self.position.1, w, h)
    }
}

/// Output hot-plug notifications
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputEvent {
    Added(OutputId),
    Removed(OutputId),
    Changed(OutputId),
}

/// Manager for all outputs
#[derive(Debug, Default)]
pub struct OutputManager {
    outputs: BTreeMap<OutputId, Output>,
    /// Primary output
    primary: Option<OutputId>,
    /// Changes not yet seen by the protocol layer
    events: Vec<OutputEvent>,
}

impl OutputManager {
    /// Create a new output manager
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an output
    pub fn add(&mut self, output: Output) -> OutputId {
        let id = output.id;
        info!(
            "Output {:?} '{}' added: {}x{}@{}mHz scale {}",
            id, output.name, output.mode.width, output.mode.height, output.mode.refresh, output.scale
        );
        self.outputs.insert(id, output);
        if self.primary.is_none() {
            self.primary = Some(id);
        }
        self.events.push(OutputEvent::Added(id));
        id
    }

    /// Get an output by ID
    pub fn get(&self, id: OutputId) -> Option<&Output> {
        self.outputs.get(&id)
    }

    /// Change an output's mode or scale and record the change
    pub fn update(&mut self, id: OutputId, f: impl FnOnce(&mut Output)) -> bool {
        match self.outputs.get_mut(&id) {
            Some(output) => {
                f(output);
                self.events.push(OutputEvent::Changed(id));
                true
            }
            None => false,
        }
    }

    /// Remove an output.
    ///
    /// The oldest remaining output becomes primary if the primary left.
    pub fn remove(&mut self, id: OutputId) -> Option<Output> {
        let output = self.outputs.remove(&id)?;
        if self.primary == Some(id) {
            self.primary = self.outputs.keys().next().copied();
        }
        info!("Output {:?} '{}' removed, primary now {:?}", id, output.name, self.primary);
        self.events.push(OutputEvent::Removed(id));
        Some(output)
    }

    /// Get the primary output
    pub fn primary(&self) -> Option<&Output> {
        self.primary.and_then(|id| self.outputs.get(&id))
    }

    pub fn primary_id(&self) -> Option<OutputId> {
        self.primary
    }

    /// Set the primary output
    pub fn set_primary(&mut self, id: OutputId) {
        if self.outputs.contains_key(&id) {
            self.primary = Some(id);
        }
    }

    /// Drain recorded hot-plug changes
    pub fn take_events(&mut self) -> Vec<OutputEvent> {
        std::mem::take(&mut self.events)
    }

    /// Get all outputs
    pub fn iter(&self) -> impl Iterator<Item = (&OutputId, &Output)> {
        self.outputs.iter()
    }

    /// Get count of outputs
    pub fn len(&self) -> usize {
        self.outputs.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }
}
