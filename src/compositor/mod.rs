//! Compositor core module
//!
//! This module contains the core compositor logic including:
//! - Buffer lifetime and the shared-memory pixel registry
//! - Surface pending/current state and commit
//! - Toplevel and popup roles with their configure handshakes
//! - Output management and frame assembly

pub mod buffer;
pub mod configure;
pub mod connection;
pub mod error;
pub mod event;
pub mod frame;
pub mod geometry;
pub mod output;
pub mod popup;
pub mod state;
pub mod surface;
pub mod window;

pub use buffer::{BufferError, BufferId, BufferInfo, BufferRegistry, BufferView, ExternalHandle, PixelFormat, ReleaseOutcome};
pub use connection::{ConnectionId, ConnectionRegistry};
pub use error::{ErrorObject, ProtocolError};
pub use event::ClientEvent;
pub use frame::{ElementKind, FrameElement, FrameList};
pub use geometry::Rectangle;
pub use output::{Output, OutputId, OutputManager, OutputMode};
pub use popup::{Popup, PopupManager};
pub use state::CompositorState;
pub use surface::{CallbackId, Surface, SurfaceId, SurfaceManager, SurfaceRole};
pub use window::{ToplevelStates, Window, WindowManager};
