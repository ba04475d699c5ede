//! Protocol errors
//!
//! A protocol error is always the fault of one client. The protocol layer
//! reports it on the object named by [`ProtocolError::object`] and the core
//! then tears that client down; nothing else is affected.

use crate::compositor::buffer::{BufferError, BufferId};
use crate::compositor::configure::ConfigureError;
use crate::compositor::popup::PopupError;
use crate::compositor::surface::{SurfaceId, SurfaceRole};

/// The protocol object an error is reported on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorObject {
    /// wl_surface
    Surface(SurfaceId),
    /// xdg_surface of a surface
    XdgSurface(SurfaceId),
    /// xdg_popup of a surface
    Popup(SurfaceId),
    /// xdg_wm_base of the client
    WmBase,
    /// wl_pointer of the client
    Pointer,
    /// wl_buffer
    Buffer(BufferId),
}

/// Fatal client errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("surface {surface:?} already has the {existing:?} role")]
    RoleAlreadyAssigned {
        surface: SurfaceId,
        existing: SurfaceRole,
        requested: SurfaceRole,
    },
    #[error("unknown surface {0:?}")]
    UnknownSurface(SurfaceId),
    #[error("surface {surface:?} acked a configure that was never sent: {source}")]
    InvalidConfigureSerial {
        surface: SurfaceId,
        #[source]
        source: ConfigureError,
    },
    #[error("surface {0:?} attached a buffer before acking its first configure")]
    UnconfiguredBuffer(SurfaceId),
    #[error("invalid popup {surface:?}: {source}")]
    InvalidGrab {
        surface: SurfaceId,
        #[source]
        source: PopupError,
    },
    #[error("popup {0:?} has no valid parent")]
    InvalidPopupParent(SurfaceId),
    #[error("positioner for {0:?} is missing a size or anchor rectangle")]
    InvalidPositioner(SurfaceId),
    #[error("buffer scale {scale} on {surface:?} must be positive")]
    InvalidScale { surface: SurfaceId, scale: i32 },
    #[error("invalid buffer transform {transform} on {surface:?}")]
    InvalidTransform { surface: SurfaceId, transform: u32 },
    #[error("invalid window geometry on {0:?}")]
    InvalidWindowGeometry(SurfaceId),
    #[error("surface {surface:?}: {source}")]
    Buffer {
        surface: SurfaceId,
        #[source]
        source: BufferError,
    },
}

impl ProtocolError {
    /// The object the error is reported on
    pub fn object(&self) -> ErrorObject {
        match self {
            ProtocolError::RoleAlreadyAssigned {
                requested: SurfaceRole::Cursor,
                ..
            } => ErrorObject::Pointer,
            ProtocolError::RoleAlreadyAssigned { .. } => ErrorObject::WmBase,
            ProtocolError::UnknownSurface(surface) => ErrorObject::Surface(*surface),
            ProtocolError::InvalidConfigureSerial { surface, .. } => ErrorObject::XdgSurface(*surface),
            ProtocolError::UnconfiguredBuffer(surface) => ErrorObject::XdgSurface(*surface),
            ProtocolError::InvalidGrab { surface, .. } => ErrorObject::Popup(*surface),
            ProtocolError::InvalidPopupParent(_) => ErrorObject::WmBase,
            ProtocolError::InvalidPositioner(_) => ErrorObject::WmBase,
            ProtocolError::InvalidScale { surface, .. } => ErrorObject::Surface(*surface),
            ProtocolError::InvalidTransform { surface, .. } => ErrorObject::Surface(*surface),
            ProtocolError::InvalidWindowGeometry(surface) => ErrorObject::XdgSurface(*surface),
            ProtocolError::Buffer { surface, .. } => ErrorObject::Surface(*surface),
        }
    }

    /// Error code within the interface of [`ProtocolError::object`]
    pub fn code(&self) -> u32 {
        match self {
            // wl_pointer.role and xdg_wm_base.role
            ProtocolError::RoleAlreadyAssigned { .. } => 0,
            ProtocolError::UnknownSurface(_) => 0,
            ProtocolError::InvalidConfigureSerial { .. } => 4,
            ProtocolError::UnconfiguredBuffer(_) => 3,
            ProtocolError::InvalidGrab { .. } => 0,
            ProtocolError::InvalidPopupParent(_) => 3,
            ProtocolError::InvalidPositioner(_) => 5,
            ProtocolError::InvalidScale { .. } => 0,
            ProtocolError::InvalidTransform { .. } => 1,
            ProtocolError::InvalidWindowGeometry(_) => 5,
            // wl_surface.invalid_size
            ProtocolError::Buffer { .. } => 2,
        }
    }

    /// The surface involved, if any
    pub fn surface(&self) -> Option<SurfaceId> {
        match self {
            ProtocolError::RoleAlreadyAssigned { surface, .. }
            | ProtocolError::UnknownSurface(surface)
            | ProtocolError::InvalidConfigureSerial { surface, .. }
            | ProtocolError::UnconfiguredBuffer(surface)
            | ProtocolError::InvalidGrab { surface, .. }
            | ProtocolError::InvalidPopupParent(surface)
            | ProtocolError::InvalidPositioner(surface)
            | ProtocolError::InvalidScale { surface, .. }
            | ProtocolError::InvalidTransform { surface, .. }
            | ProtocolError::InvalidWindowGeometry(surface)
            | ProtocolError::Buffer { surface, .. } => Some(*surface),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_error_object() {
        let err = ProtocolError::RoleAlreadyAssigned {
            surface: SurfaceId(1),
            existing: SurfaceRole::Toplevel,
            requested: SurfaceRole::Popup,
        };
        assert_eq!(err.object(), ErrorObject::WmBase);

        let err = ProtocolError::RoleAlreadyAssigned {
            surface: SurfaceId(1),
            existing: SurfaceRole::Toplevel,
            requested: SurfaceRole::Cursor,
        };
        assert_eq!(err.object(), ErrorObject::Pointer);
    }

    #[test]
    fn test_error_message_names_serial() {
        let err = ProtocolError::InvalidConfigureSerial {
            surface: SurfaceId(3),
            source: ConfigureError::UnknownSerial(99),
        };
        assert!(err.to_string().contains("never sent"));
        assert_eq!(err.object(), ErrorObject::XdgSurface(SurfaceId(3)));
        assert_eq!(err.code(), 4);
    }
}
