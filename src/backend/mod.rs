//! Backend module
//!
//! The event loop that ties the Wayland socket, input producers and the
//! frame clock together on top of calloop.

pub mod event_loop;

pub use event_loop::EventLoop;
