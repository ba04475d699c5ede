//! Winland - a tiling Wayland compositor core
//!
//! Winland accepts Wayland clients, tracks their surfaces and buffers,
//! arranges toplevel windows with a tiling layout engine, routes input
//! through a single seat and hands frame lists to a pluggable renderer.
//!
//! # Architecture
//!
//! - **Protocol Layer**: Implements Wayland protocols using wayland-server-rs
//! - **Compositor Core**: Buffers, surfaces, shell roles, outputs and frames
//! - **Layout Engine**: Workspaces of containers placed by tiling policies
//! - **Input**: Seat with pointer, keyboard and touch focus
//! - **Renderer**: Texture binding and presentation behind a trait, with a
//!   headless software implementation
//!
//! # Example
//!
//! ```no_run
//! use winland::compositor::CompositorState;
//! use winland::config::CompositorConfig;
//!
//! let mut compositor = CompositorState::new(CompositorConfig::default());
//! let client = compositor.connect();
//! let surface = compositor.create_surface(client);
//! compositor.create_toplevel(surface).unwrap();
//! ```

pub mod backend;
pub mod compositor;
pub mod config;
pub mod input;
pub mod layout;
pub mod protocol;
pub mod renderer;
pub mod server;
