//! Software renderer
//!
//! Keeps texture copies in memory and composites frame lists into an ARGB
//! framebuffer. Used when no GPU backend is attached and by tests.

use std::collections::HashMap;

use log::{debug, trace};

use super::{RenderError, Renderer, TextureHandle};
use crate::compositor::frame::FrameList;
use crate::compositor::geometry::Rectangle;
use crate::compositor::{BufferView, PixelFormat};

/// A texture: pixels converted to ARGB8888
#[derive(Debug, Clone)]
struct Texture {
    width: u32,
    height: u32,
    pixels: Vec<u32>,
}

/// Renderer that draws into main memory
#[derive(Debug, Default)]
pub struct HeadlessRenderer {
    textures: HashMap<TextureHandle, Texture>,
    next_handle: u64,
    uploads: usize,
    frames: usize,
    /// Background color (ARGB)
    clear_color: u32,
    framebuffer: Vec<u32>,
    size: (i32, i32),
    /// Geometry of every element in the last presented frame
    last_frame: Vec<Rectangle>,
}

impl HeadlessRenderer {
    /// Create a renderer without a framebuffer; frames are only recorded
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a renderer compositing into a framebuffer of the given size
    pub fn with_size(width: i32, height: i32) -> Self {
        let mut renderer = Self::new();
        renderer.resize(width, height);
        renderer
    }

    pub fn resize(&mut self, width: i32, height: i32) {
        self.size = (width.max(0), height.max(0));
        self.framebuffer = vec![self.clear_color; (self.size.0 * self.size.1) as usize];
    }

    pub fn set_clear_color(&mut self, argb: u32) {
        self.clear_color = argb;
    }

    /// Number of uploads performed
    pub fn upload_count(&self) -> usize {
        self.uploads
    }

    /// Number of frames presented
    pub fn frame_count(&self) -> usize {
        self.frames
    }

    /// Number of live textures
    pub fn texture_count(&self) -> usize {
        self.textures.len()
    }

    pub fn last_frame(&self) -> &[Rectangle] {
        &self.last_frame
    }

    /// Composited pixel at a framebuffer position
    pub fn pixel(&self, x: i32, y: i32) -> Option<u32> {
        if x < 0 || y < 0 || x >= self.size.0 || y >= self.size.1 {
            return None;
        }
        self.framebuffer.get((y * self.size.0 + x) as usize).copied()
    }

    fn convert(buffer: &BufferView<'_>) -> Result<Vec<u32>, RenderError> {
        let bpp = buffer.format.bytes_per_pixel() as usize;
        let stride = buffer.stride as usize;
        let (width, height) = (buffer.width as usize, buffer.height as usize);
        let required = stride * height.saturating_sub(1) + width * bpp;
        if buffer.pixels.len() < required {
            return Err(RenderError::ShortBuffer {
                required,
                available: buffer.pixels.len(),
            });
        }

        let mut out = Vec::with_capacity(width * height);
        for row in 0..height {
            let line = &buffer.pixels[row * stride..row * stride + width * bpp];
            for px in line.chunks_exact(bpp) {
                out.push(to_argb(buffer.format, px));
            }
        }
        Ok(out)
    }

    fn draw(&mut self, texture: &Texture, dest: Rectangle) {
        let screen = Rectangle::from_size(self.size.0, self.size.1);
        let Some(clip) = dest.intersection(&screen) else {
            return;
        };
        for y in clip.y..clip.bottom() {
            // Nearest-neighbour scaling onto the destination
            let ty = ((y - dest.y) as i64 * texture.height as i64 / dest.height as i64) as usize;
            for x in clip.x..clip.right() {
                let tx = ((x - dest.x) as i64 * texture.width as i64 / dest.width as i64) as usize;
                let src = texture.pixels[ty * texture.width as usize + tx];
                let index = (y * self.size.0 + x) as usize;
                self.framebuffer[index] = blend(src, self.framebuffer[index]);
            }
        }
    }

    fn fill(&mut self, rect: Rectangle, color: u32) {
        let screen = Rectangle::from_size(self.size.0, self.size.1);
        let Some(clip) = rect.intersection(&screen) else {
            return;
        };
        for y in clip.y..clip.bottom() {
            let start = (y * self.size.0 + clip.x) as usize;
            self.framebuffer[start..start + clip.width as usize].fill(color);
        }
    }
}

impl Renderer for HeadlessRenderer {
    fn upload_or_get_texture(
        &mut self,
        buffer: &BufferView<'_>,
        reuse: Option<TextureHandle>,
    ) -> Result<TextureHandle, RenderError> {
        let pixels = Self::convert(buffer)?;
        let texture = Texture {
            width: buffer.width,
            height: buffer.height,
            pixels,
        };
        self.uploads += 1;

        // Refill in place when the size is unchanged
        if let Some(handle) = reuse {
            if let Some(existing) = self.textures.get_mut(&handle) {
                if existing.width == texture.width && existing.height == texture.height {
                    *existing = texture;
                    trace!("Refilled texture {:?} from buffer {:?}", handle, buffer.id);
                    return Ok(handle);
                }
            }
        }

        self.next_handle += 1;
        let handle = TextureHandle(self.next_handle);
        debug!(
            "Created texture {:?} for buffer {:?}, {}x{}, format {:?}",
            handle, buffer.id, buffer.width, buffer.height, buffer.format
        );
        self.textures.insert(handle, texture);
        Ok(handle)
    }

    fn release_texture(&mut self, texture: TextureHandle) {
        if self.textures.remove(&texture).is_some() {
            trace!("Released texture {:?}", texture);
        }
    }

    fn present(&mut self, frame: &FrameList) -> Result<(), RenderError> {
        self.frames += 1;
        self.last_frame = frame.iter().map(|e| e.geometry).collect();
        if self.framebuffer.is_empty() {
            return Ok(());
        }

        let clear = self.clear_color;
        self.framebuffer.fill(clear);
        let origin = frame.output;
        for element in frame.iter() {
            let dest = element.geometry.translate(-origin.x, -origin.y);
            if let Some(border) = element.border {
                self.fill(dest.inset(-border.width), border.color);
            }
            if let Some(title) = element.title_bar {
                self.fill(title.translate(-origin.x, -origin.y), 0xFF22_2222);
            }
            let Some(handle) = element.texture else {
                continue;
            };
            let texture = self
                .textures
                .get(&handle)
                .cloned()
                .ok_or(RenderError::UnknownTexture(handle))?;
            if dest.is_empty() || texture.width == 0 || texture.height == 0 {
                continue;
            }
            self.draw(&texture, dest);
        }
        Ok(())
    }
}

/// Convert one pixel of a supported format to ARGB8888
fn to_argb(format: PixelFormat, px: &[u8]) -> u32 {
    match format {
        // Little-endian B, G, R, A
        PixelFormat::Argb8888 => u32::from_le_bytes([px[0], px[1], px[2], px[3]]),
        PixelFormat::Xrgb8888 => u32::from_le_bytes([px[0], px[1], px[2], 0xFF]),
        // Little-endian R, G, B, A
        PixelFormat::Abgr8888 => u32::from_le_bytes([px[2], px[1], px[0], px[3]]),
        PixelFormat::Xbgr8888 => u32::from_le_bytes([px[2], px[1], px[0], 0xFF]),
        PixelFormat::Rgb565 => {
            let v = u16::from_le_bytes([px[0], px[1]]) as u32;
            let r = ((v >> 11) & 0x1F) * 255 / 31;
            let g = ((v >> 5) & 0x3F) * 255 / 63;
            let b = (v & 0x1F) * 255 / 31;
            0xFF00_0000 | (r << 16) | (g << 8) | b
        }
    }
}

/// Premultiplied source-over
fn blend(src: u32, dst: u32) -> u32 {
    let alpha = src >> 24;
    if alpha == 0xFF {
        return src;
    }
    if alpha == 0 {
        return dst;
    }
    let inv = 255 - alpha;
    let channel = |shift: u32| {
        let s = (src >> shift) & 0xFF;
        let d = (dst >> shift) & 0xFF;
        (s + d * inv / 255).min(255) << shift
    };
    channel(24) | channel(16) | channel(8) | channel(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compositor::frame::{ElementKind, FrameElement};
    use crate::compositor::{BufferId, SurfaceId};

    fn view(pixels: &[u8], width: u32, height: u32, format: PixelFormat) -> BufferView<'_> {
        BufferView {
            id: BufferId(1),
            width,
            height,
            stride: width * format.bytes_per_pixel(),
            format,
            pixels,
        }
    }

    #[test]
    fn test_upload_reuses_handle_for_same_size() {
        let mut renderer = HeadlessRenderer::new();
        let pixels = vec![0u8; 16];
        let first = renderer
            .upload_or_get_texture(&view(&pixels, 2, 2, PixelFormat::Xrgb8888), None)
            .unwrap();
        let second = renderer
            .upload_or_get_texture(&view(&pixels, 2, 2, PixelFormat::Xrgb8888), Some(first))
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(renderer.upload_count(), 2);
        assert_eq!(renderer.texture_count(), 1);
    }

    #[test]
    fn test_short_buffer_rejected() {
        let mut renderer = HeadlessRenderer::new();
        let pixels = vec![0u8; 8];
        let err = renderer
            .upload_or_get_texture(&view(&pixels, 2, 2, PixelFormat::Argb8888), None)
            .unwrap_err();
        assert_eq!(
            err,
            RenderError::ShortBuffer {
                required: 16,
                available: 8
            }
        );
    }

    #[test]
    fn test_present_composites() {
        let mut renderer = HeadlessRenderer::with_size(4, 4);
        // One opaque red XRGB pixel, stretched to 2x2
        let pixels = [0x00, 0x00, 0xFF, 0x00];
        let texture = renderer
            .upload_or_get_texture(&view(&pixels, 1, 1, PixelFormat::Xrgb8888), None)
            .unwrap();

        let mut frame = FrameList::new(Rectangle::from_size(4, 4));
        let mut element = FrameElement::new(
            SurfaceId(1),
            BufferId(1),
            Rectangle::new(1, 1, 2, 2),
            ElementKind::Tiled,
        );
        element.texture = Some(texture);
        frame.push(element);
        renderer.present(&frame).unwrap();

        assert_eq!(renderer.frame_count(), 1);
        assert_eq!(renderer.pixel(1, 1), Some(0xFFFF_0000));
        assert_eq!(renderer.pixel(2, 2), Some(0xFFFF_0000));
        assert_eq!(renderer.pixel(0, 0), Some(0));
        assert_eq!(renderer.last_frame(), &[Rectangle::new(1, 1, 2, 2)]);
    }

    #[test]
    fn test_rgb565_conversion() {
        assert_eq!(to_argb(PixelFormat::Rgb565, &[0x00, 0xF8]), 0xFFFF_0000);
        assert_eq!(to_argb(PixelFormat::Rgb565, &[0x1F, 0x00]), 0xFF00_00FF);
    }

    #[test]
    fn test_blend() {
        assert_eq!(blend(0xFF12_3456, 0xFF00_0000), 0xFF12_3456);
        assert_eq!(blend(0x0000_0000, 0xFFAB_CDEF), 0xFFAB_CDEF);
    }
}
