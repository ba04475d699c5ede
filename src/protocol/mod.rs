//! Wayland protocol helpers
//!
//! Wire-independent state and encoding used by the server front-end:
//! - wl_region
//! - xdg_positioner placement and toplevel state encoding
//! - wl_seat keymap delivery
//! - wl_shm pools
//! - wl_output events

pub mod compositor;
pub mod output;
pub mod seat;
pub mod shell;
pub mod shm;

pub use compositor::Region;
pub use seat::KeymapFile;
pub use shell::XdgPositioner;
pub use shm::{ShmError, ShmPoolId, ShmPools};
