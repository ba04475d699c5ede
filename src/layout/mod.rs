//! Tiling layout
//!
//! Workspaces of containers arranged by a per-workspace policy. The engine
//! only computes geometry; configuring clients is up to the compositor.

mod container;
mod engine;
mod policy;

pub use container::{
    Container, ContainerArena, ContainerId, ContainerKind, DEFAULT_SPLIT_RATIO, MAX_SPLIT_RATIO,
    MIN_SPLIT_RATIO, SPLIT_RATIO_STEP,
};
pub use engine::{LayoutEngine, LayoutSlot};
pub use policy::{LayoutPolicy, Slot, SplitAxis};

use crate::compositor::SurfaceId;

/// Layout errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LayoutError {
    #[error("unknown layout {0:?}")]
    UnknownPolicy(String),

    #[error("surface {0:?} is not managed by the layout")]
    UnknownSurface(SurfaceId),

    #[error("surface {0:?} is already managed by the layout")]
    AlreadyManaged(SurfaceId),

    #[error("no workspace {0}")]
    NoSuchWorkspace(usize),

    #[error("no focused window")]
    NoFocus,

    #[error("focused window is not inside a split")]
    NoSplit,

    #[error("the split divides its children equally")]
    EqualSplit,

    #[error("surface {0:?} is not floating")]
    NotFloating(SurfaceId),
}

/// Direction for spatial focus moves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Left,
    Right,
    Up,
    Down,
}

/// User-level layout operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayoutCommand {
    FocusNext,
    FocusPrev,
    Focus(Direction),
    IncreaseSplitRatio,
    DecreaseSplitRatio,
    SwapWithNext,
    SwapWithPrev,
    SetLayout(LayoutPolicy),
    NextLayout,
    PrevLayout,
    SwitchWorkspace(usize),
    MoveToWorkspace(usize),
    MoveToWorkspaceAndSwitch(usize),
    ToggleFloating,
    ToggleFullscreen,
    /// Wrap the focused window in a split on the next insertion
    Split(SplitAxis),
}
