//! Events the core queues for clients
//!
//! Every observable effect on a client goes through one of these variants.
//! The protocol layer drains each connection's queue after dispatch and
//! turns the variants into wire events.

use crate::compositor::buffer::BufferId;
use crate::compositor::popup::PopupConfigure;
use crate::compositor::surface::{CallbackId, SurfaceId};
use crate::compositor::window::ToplevelConfigure;
use crate::compositor::OutputId;
use crate::input::{KeyboardEvent, PointerEvent, TouchEvent};

/// An event addressed to one client connection
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// The compositor stopped reading the buffer; the client may reuse it
    BufferRelease { buffer: BufferId },
    /// A frame containing the surface was presented
    FrameDone { callback: CallbackId, time: u32 },
    /// Proposed toplevel size and state, followed by xdg_surface.configure
    ToplevelConfigure {
        surface: SurfaceId,
        serial: u32,
        configure: ToplevelConfigure,
    },
    /// Proposed popup placement, followed by xdg_surface.configure
    PopupConfigure {
        surface: SurfaceId,
        serial: u32,
        configure: PopupConfigure,
    },
    /// The popup was dismissed
    PopupDone { surface: SurfaceId },
    /// The compositor asks the toplevel to close
    Close { surface: SurfaceId },
    SurfaceEnter { surface: SurfaceId, output: OutputId },
    SurfaceLeave { surface: SurfaceId, output: OutputId },
    /// Liveness check
    Ping { serial: u32 },
    Pointer(PointerEvent),
    Keyboard(KeyboardEvent),
    Touch(TouchEvent),
}
