//! Rendering interface
//!
//! The core never draws. It binds buffers to textures through a
//! [`Renderer`] and hands it a [`FrameList`] to present. A [`FrameGate`]
//! decides whether a frame is produced at all.

use std::time::{Duration, Instant};

use crate::compositor::frame::FrameList;
use crate::compositor::BufferView;

mod headless;

pub use headless::HeadlessRenderer;

/// Opaque texture handle issued by a renderer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureHandle(pub u64);

/// Rendering backend errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RenderError {
    #[error("buffer holds {available} bytes but {required} are needed")]
    ShortBuffer { required: usize, available: usize },
    #[error("unknown texture {0:?}")]
    UnknownTexture(TextureHandle),
    #[error("backend failure: {0}")]
    Backend(String),
}

/// A rendering backend
pub trait Renderer {
    /// Upload a buffer's pixels and return a texture for it.
    ///
    /// `reuse` is the handle previously bound to the same buffer; a backend
    /// may refill it in place and return it again.
    fn upload_or_get_texture(
        &mut self,
        buffer: &BufferView<'_>,
        reuse: Option<TextureHandle>,
    ) -> Result<TextureHandle, RenderError>;

    /// Free a texture whose buffer is gone
    fn release_texture(&mut self, texture: TextureHandle);

    /// Draw a frame list
    fn present(&mut self, frame: &FrameList) -> Result<(), RenderError>;
}

/// Frame pacing gate consulted before a frame list is assembled
pub trait FrameGate {
    fn request_frame_now(&mut self) -> bool;
}

/// Gate that never throttles
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysRender;

impl FrameGate for AlwaysRender {
    fn request_frame_now(&mut self) -> bool {
        true
    }
}

/// Gate that allows at most one frame per interval
#[derive(Debug, Clone)]
pub struct FrameInterval {
    interval: Duration,
    last: Option<Instant>,
}

impl FrameInterval {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: None,
        }
    }

    /// Limiter for a refresh rate in mHz
    pub fn from_refresh(refresh_mhz: i32) -> Self {
        let refresh = refresh_mhz.max(1) as u64;
        Self::new(Duration::from_micros(1_000_000_000 / refresh))
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

impl FrameGate for FrameInterval {
    fn request_frame_now(&mut self) -> bool {
        let now = Instant::now();
        match self.last {
            Some(last) if now.duration_since(last) < self.interval => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }
}
