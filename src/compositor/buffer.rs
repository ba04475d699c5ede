//! Buffer registry
//!
//! Tracks client-submitted pixel buffers, their busy state and their cached
//! texture binding. A buffer is destroyed exactly once, when the client has
//! released it and no surface (or other consumer) still holds a reference.
//!
//! References are handed out as [`BufferRef`] tokens. A token is not `Clone`
//! and is consumed by [`BufferRegistry::release_reference`], so a reference
//! can neither be released twice nor outlive the entry it points to.

use std::collections::HashMap;
use std::fmt;
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use log::{debug, trace};

use crate::compositor::ConnectionId;
use crate::renderer::{RenderError, Renderer, TextureHandle};

/// Unique identifier for buffers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(pub u64);

impl BufferId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        BufferId(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// Supported pixel formats, using wl_shm format codes on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    /// 32-bit ARGB (A in high byte)
    Argb8888,
    /// 32-bit XRGB (alpha ignored)
    Xrgb8888,
    /// 32-bit ABGR
    Abgr8888,
    /// 32-bit XBGR
    Xbgr8888,
    /// 16-bit RGB 5:6:5
    Rgb565,
}

impl PixelFormat {
    /// Every format the registry accepts, in advertisement order
    pub const ALL: [PixelFormat; 5] = [
        PixelFormat::Argb8888,
        PixelFormat::Xrgb8888,
        PixelFormat::Abgr8888,
        PixelFormat::Xbgr8888,
        PixelFormat::Rgb565,
    ];

    /// Create from a wl_shm format code
    pub fn from_wayland(code: u32) -> Result<Self, BufferError> {
        match code {
            0 => Ok(PixelFormat::Argb8888),
            1 => Ok(PixelFormat::Xrgb8888),
            0x3432_4241 => Ok(PixelFormat::Abgr8888),
            0x3432_4258 => Ok(PixelFormat::Xbgr8888),
            0x3631_4752 => Ok(PixelFormat::Rgb565),
            other => Err(BufferError::UnsupportedFormat(other)),
        }
    }

    /// Convert to a wl_shm format code
    pub fn to_wayland(self) -> u32 {
        match self {
            PixelFormat::Argb8888 => 0,
            PixelFormat::Xrgb8888 => 1,
            PixelFormat::Abgr8888 => 0x3432_4241,
            PixelFormat::Xbgr8888 => 0x3432_4258,
            PixelFormat::Rgb565 => 0x3631_4752,
        }
    }

    /// Get bytes per pixel
    pub fn bytes_per_pixel(self) -> u32 {
        match self {
            PixelFormat::Rgb565 => 2,
            _ => 4,
        }
    }

    /// Whether the format carries an alpha channel
    pub fn has_alpha(self) -> bool {
        matches!(self, PixelFormat::Argb8888 | PixelFormat::Abgr8888)
    }
}

/// Shared, already-mapped pixel memory owned by someone else
pub type PixelStorage = Arc<dyn AsRef<[u8]> + Send + Sync>;

/// A borrowed view of client memory: the storage plus where the buffer starts
#[derive(Clone)]
pub struct ExternalHandle {
    storage: PixelStorage,
    offset: usize,
}

impl ExternalHandle {
    pub fn new(storage: PixelStorage, offset: usize) -> Self {
        Self { storage, offset }
    }

    /// Wrap owned bytes; used by in-process producers and tests
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self::new(Arc::new(bytes), 0)
    }

    fn len(&self) -> usize {
        (*self.storage).as_ref().len()
    }
}

impl fmt::Debug for ExternalHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExternalHandle")
            .field("len", &self.len())
            .field("offset", &self.offset)
            .finish()
    }
}

/// Read-only access to a registered buffer's pixels
#[derive(Debug, Clone, Copy)]
pub struct BufferView<'a> {
    pub id: BufferId,
    pub width: u32,
    pub height: u32,
    pub stride: u32,
    pub format: PixelFormat,
    pub pixels: &'a [u8],
}

/// A counted reference on a buffer.
///
/// Only the registry creates these, and only the registry can consume them.
#[must_use = "a BufferRef must be handed back to BufferRegistry::release_reference"]
#[derive(Debug, PartialEq, Eq)]
pub struct BufferRef {
    id: BufferId,
}

impl BufferRef {
    pub fn id(&self) -> BufferId {
        self.id
    }
}

/// Busy/ownership state of one buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    /// Client owns it and nothing references it
    Idle,
    /// Client owns it and `n` references are live
    Busy(NonZeroU32),
    /// Client released it; `n` references keep it alive
    Orphaned(NonZeroU32),
}

/// Cached renderer binding for a buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TextureBinding {
    Unbound,
    Bound(TextureHandle),
    /// Backing memory may have changed since the upload
    Stale(TextureHandle),
}

/// What happened to a buffer as the result of a lifecycle operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// References remain; nothing observable happened
    Retained,
    /// Busy count reached zero while the client still owns the buffer:
    /// the client may now reuse it
    Idle { owner: ConnectionId },
    /// Both conditions held and the buffer was destroyed
    Destroyed,
}

#[derive(Debug)]
struct BufferEntry {
    owner: ConnectionId,
    width: u32,
    height: u32,
    stride: u32,
    format: PixelFormat,
    handle: ExternalHandle,
    lifecycle: Lifecycle,
    texture: TextureBinding,
}

impl BufferEntry {
    fn view(&self, id: BufferId) -> BufferView<'_> {
        let len = self.stride as usize * self.height as usize;
        let bytes = (*self.handle.storage).as_ref();
        BufferView {
            id,
            width: self.width,
            height: self.height,
            stride: self.stride,
            format: self.format,
            pixels: &bytes[self.handle.offset..self.handle.offset + len],
        }
    }

    fn references(&self) -> u32 {
        match self.lifecycle {
            Lifecycle::Idle => 0,
            Lifecycle::Busy(n) | Lifecycle::Orphaned(n) => n.get(),
        }
    }
}

/// Metadata about a buffer, detached from the registry borrow
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferInfo {
    pub owner: ConnectionId,
    pub width: u32,
    pub height: u32,
    pub stride: u32,
    pub format: PixelFormat,
    pub references: u32,
    pub client_released: bool,
}

/// Registry of every live buffer
#[derive(Debug, Default)]
pub struct BufferRegistry {
    buffers: HashMap<BufferId, BufferEntry>,
    /// Texture handles of destroyed buffers, waiting for the renderer
    retired_textures: Vec<TextureHandle>,
}

impl BufferRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register client pixel memory as a buffer.
    ///
    /// No pixel data is copied; the registry keeps a shared view of
    /// `handle`, which must already be mapped.
    pub fn import(
        &mut self,
        owner: ConnectionId,
        handle: ExternalHandle,
        width: u32,
        height: u32,
        stride: u32,
        format: u32,
    ) -> Result<BufferId, BufferError> {
        let format = PixelFormat::from_wayland(format)?;

        if width == 0 || height == 0 {
            return Err(BufferError::InvalidDimensions { width, height });
        }

        let min_stride = width
            .checked_mul(format.bytes_per_pixel())
            .ok_or(BufferError::InvalidDimensions { width, height })?;
        if stride < min_stride {
            return Err(BufferError::InvalidStride { stride, min_stride });
        }

        let end = (stride as usize)
            .checked_mul(height as usize)
            .and_then(|len| len.checked_add(handle.offset));
        match end {
            Some(end) if end <= handle.len() => {}
            _ => {
                return Err(BufferError::OutOfBounds {
                    offset: handle.offset,
                    available: handle.len(),
                })
            }
        }

        let id = BufferId::new();
        self.buffers.insert(
            id,
            BufferEntry {
                owner,
                width,
                height,
                stride,
                format,
                handle,
                lifecycle: Lifecycle::Idle,
                texture: TextureBinding::Unbound,
            },
        );

        debug!(
            "Imported buffer {:?} for {:?}: {}x{} stride {} {:?}",
            id, owner, width, height, stride, format
        );
        Ok(id)
    }

    /// Take a counted reference on a buffer.
    ///
    /// Surfaces take one on commit; frame-list consumers that need a buffer
    /// past the next commit take their own.
    pub fn attach_reference(&mut self, id: BufferId) -> Result<BufferRef, BufferError> {
        let entry = self
            .buffers
            .get_mut(&id)
            .ok_or(BufferError::UnknownBuffer(id))?;

        entry.lifecycle = match entry.lifecycle {
            Lifecycle::Idle => {
                // The client may have rewritten the memory while it was idle
                if let TextureBinding::Bound(handle) = entry.texture {
                    entry.texture = TextureBinding::Stale(handle);
                }
                Lifecycle::Busy(NonZeroU32::MIN)
            }
            Lifecycle::Busy(n) => Lifecycle::Busy(n.saturating_add(1)),
            Lifecycle::Orphaned(n) => Lifecycle::Orphaned(n.saturating_add(1)),
        };

        trace!("Buffer {:?} reference taken ({:?})", id, entry.lifecycle);
        Ok(BufferRef { id })
    }

    /// Give back a reference taken with [`attach_reference`](Self::attach_reference).
    pub fn release_reference(&mut self, reference: BufferRef) -> ReleaseOutcome {
        let id = reference.id;
        let Some(entry) = self.buffers.get_mut(&id) else {
            panic!("buffer {:?} destroyed while a reference was outstanding", id);
        };

        let outcome = match entry.lifecycle {
            Lifecycle::Idle => {
                panic!("buffer {:?} released more often than referenced", id)
            }
            Lifecycle::Busy(n) => match NonZeroU32::new(n.get() - 1) {
                Some(rest) => {
                    entry.lifecycle = Lifecycle::Busy(rest);
                    ReleaseOutcome::Retained
                }
                None => {
                    entry.lifecycle = Lifecycle::Idle;
                    ReleaseOutcome::Idle { owner: entry.owner }
                }
            },
            Lifecycle::Orphaned(n) => match NonZeroU32::new(n.get() - 1) {
                Some(rest) => {
                    entry.lifecycle = Lifecycle::Orphaned(rest);
                    ReleaseOutcome::Retained
                }
                None => {
                    self.destroy(id);
                    ReleaseOutcome::Destroyed
                }
            },
        };

        trace!("Buffer {:?} reference released: {:?}", id, outcome);
        outcome
    }

    /// The owning client released its buffer object.
    ///
    /// Destroys the buffer now if nothing references it, otherwise defers
    /// destruction to the last [`release_reference`](Self::release_reference).
    pub fn client_release(&mut self, id: BufferId) -> Result<ReleaseOutcome, BufferError> {
        let entry = self
            .buffers
            .get_mut(&id)
            .ok_or(BufferError::UnknownBuffer(id))?;

        match entry.lifecycle {
            Lifecycle::Idle => {
                self.destroy(id);
                Ok(ReleaseOutcome::Destroyed)
            }
            Lifecycle::Busy(n) => {
                entry.lifecycle = Lifecycle::Orphaned(n);
                debug!("Buffer {:?} released by client, {} references remain", id, n);
                Ok(ReleaseOutcome::Retained)
            }
            Lifecycle::Orphaned(_) => Err(BufferError::Released(id)),
        }
    }

    /// Release every buffer a client owns, as when its connection closes
    pub fn release_client_buffers(&mut self, owner: ConnectionId) -> usize {
        let owned: Vec<BufferId> = self
            .buffers
            .iter()
            .filter(|(_, entry)| {
                entry.owner == owner && !matches!(entry.lifecycle, Lifecycle::Orphaned(_))
            })
            .map(|(id, _)| *id)
            .collect();

        for id in &owned {
            // Only owned, non-orphaned entries were collected above
            let _ = self.client_release(*id);
        }
        owned.len()
    }

    fn destroy(&mut self, id: BufferId) {
        if let Some(entry) = self.buffers.remove(&id) {
            assert_eq!(
                entry.references(),
                0,
                "buffer {:?} destroyed with live references",
                id
            );
            match entry.texture {
                TextureBinding::Bound(handle) | TextureBinding::Stale(handle) => {
                    self.retired_textures.push(handle)
                }
                TextureBinding::Unbound => {}
            }
            debug!("Destroyed buffer {:?}", id);
        }
    }

    /// Return the renderer binding for a buffer, uploading only when needed.
    ///
    /// Repeated calls for an unchanged buffer return the cached handle.
    pub fn request_texture_binding<R>(
        &mut self,
        id: BufferId,
        renderer: &mut R,
    ) -> Result<TextureHandle, BufferError>
    where
        R: Renderer + ?Sized,
    {
        let entry = self
            .buffers
            .get_mut(&id)
            .ok_or(BufferError::UnknownBuffer(id))?;

        let reuse = match entry.texture {
            TextureBinding::Bound(handle) => return Ok(handle),
            TextureBinding::Stale(handle) => Some(handle),
            TextureBinding::Unbound => None,
        };

        let view = entry.view(id);
        let handle = renderer.upload_or_get_texture(&view, reuse)?;
        if let Some(old) = reuse.filter(|old| *old != handle) {
            self.retired_textures.push(old);
        }
        entry.texture = TextureBinding::Bound(handle);
        trace!("Buffer {:?} bound to texture {:?}", id, handle);
        Ok(handle)
    }

    /// Mark the cached binding as out of date.
    ///
    /// Used when the backing memory is known to have changed without a new
    /// buffer object.
    pub fn invalidate_texture(&mut self, id: BufferId) {
        if let Some(entry) = self.buffers.get_mut(&id) {
            if let TextureBinding::Bound(handle) = entry.texture {
                entry.texture = TextureBinding::Stale(handle);
            }
        }
    }

    /// Drain texture handles that belonged to destroyed buffers
    pub fn take_retired_textures(&mut self) -> Vec<TextureHandle> {
        std::mem::take(&mut self.retired_textures)
    }

    /// Borrow a buffer's pixels
    pub fn view(&self, id: BufferId) -> Option<BufferView<'_>> {
        self.buffers.get(&id).map(|entry| entry.view(id))
    }

    /// Get buffer metadata
    pub fn info(&self, id: BufferId) -> Option<BufferInfo> {
        self.buffers.get(&id).map(|entry| BufferInfo {
            owner: entry.owner,
            width: entry.width,
            height: entry.height,
            stride: entry.stride,
            format: entry.format,
            references: entry.references(),
            client_released: matches!(entry.lifecycle, Lifecycle::Orphaned(_)),
        })
    }

    /// Check whether a buffer is still alive
    pub fn contains(&self, id: BufferId) -> bool {
        self.buffers.contains_key(&id)
    }

    /// Total number of outstanding references across all buffers
    pub fn live_references(&self) -> u32 {
        self.buffers.values().map(BufferEntry::references).sum()
    }

    /// Get count of buffers
    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }
}

/// Buffer registry errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BufferError {
    #[error("unsupported pixel format {0:#x}")]
    UnsupportedFormat(u32),
    #[error("invalid buffer size {width}x{height}")]
    InvalidDimensions { width: u32, height: u32 },
    #[error("stride {stride} is smaller than the row size {min_stride}")]
    InvalidStride { stride: u32, min_stride: u32 },
    #[error("buffer at offset {offset} does not fit in {available} bytes")]
    OutOfBounds { offset: usize, available: usize },
    #[error("unknown buffer {0:?}")]
    UnknownBuffer(BufferId),
    #[error("buffer {0:?} was already released by its client")]
    Released(BufferId),
    #[error("texture upload failed: {0}")]
    Render(#[from] RenderError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::HeadlessRenderer;

    const CLIENT: ConnectionId = ConnectionId(7);

    fn import(registry: &mut BufferRegistry, width: u32, height: u32) -> BufferId {
        let bytes = vec![0u8; (width * height * 4) as usize];
        registry
            .import(
                CLIENT,
                ExternalHandle::from_bytes(bytes),
                width,
                height,
                width * 4,
                PixelFormat::Argb8888.to_wayland(),
            )
            .unwrap()
    }

    #[test]
    fn test_import_rejects_unknown_format() {
        let mut registry = BufferRegistry::new();
        let err = registry
            .import(CLIENT, ExternalHandle::from_bytes(vec![0; 64]), 4, 4, 16, 0xdead)
            .unwrap_err();
        assert_eq!(err, BufferError::UnsupportedFormat(0xdead));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_import_validates_layout() {
        let mut registry = BufferRegistry::new();
        let short_stride = registry.import(CLIENT, ExternalHandle::from_bytes(vec![0; 64]), 4, 4, 8, 0);
        assert!(matches!(short_stride, Err(BufferError::InvalidStride { .. })));

        let too_big = registry.import(CLIENT, ExternalHandle::from_bytes(vec![0; 32]), 4, 4, 16, 0);
        assert!(matches!(too_big, Err(BufferError::OutOfBounds { .. })));

        let rgb565 = registry.import(CLIENT, ExternalHandle::from_bytes(vec![0; 32]), 4, 4, 8, 0x3631_4752);
        assert!(rgb565.is_ok());
    }

    #[test]
    fn test_client_release_without_references_destroys() {
        let mut registry = BufferRegistry::new();
        let id = import(&mut registry, 2, 2);
        assert_eq!(registry.client_release(id), Ok(ReleaseOutcome::Destroyed));
        assert!(!registry.contains(id));
    }

    #[test]
    fn test_destroyed_only_after_both_conditions() {
        let mut registry = BufferRegistry::new();
        let id = import(&mut registry, 2, 2);

        let first = registry.attach_reference(id).unwrap();
        let second = registry.attach_reference(id).unwrap();
        assert_eq!(registry.client_release(id), Ok(ReleaseOutcome::Retained));
        assert!(registry.contains(id));

        assert_eq!(registry.release_reference(first), ReleaseOutcome::Retained);
        assert!(registry.contains(id));
        assert_eq!(registry.release_reference(second), ReleaseOutcome::Destroyed);
        assert!(!registry.contains(id));
    }

    #[test]
    fn test_reference_drop_to_zero_reports_idle() {
        let mut registry = BufferRegistry::new();
        let id = import(&mut registry, 2, 2);
        let reference = registry.attach_reference(id).unwrap();
        assert_eq!(
            registry.release_reference(reference),
            ReleaseOutcome::Idle { owner: CLIENT }
        );
        assert!(registry.contains(id));
        assert_eq!(registry.info(id).unwrap().references, 0);
    }

    #[test]
    fn test_double_client_release_is_an_error() {
        let mut registry = BufferRegistry::new();
        let id = import(&mut registry, 2, 2);
        let reference = registry.attach_reference(id).unwrap();
        registry.client_release(id).unwrap();
        assert_eq!(registry.client_release(id), Err(BufferError::Released(id)));
        let _ = registry.release_reference(reference);
    }

    #[test]
    fn test_texture_binding_is_cached() {
        let mut registry = BufferRegistry::new();
        let mut renderer = HeadlessRenderer::new();
        let id = import(&mut registry, 4, 4);

        let a = registry.request_texture_binding(id, &mut renderer).unwrap();
        let b = registry.request_texture_binding(id, &mut renderer).unwrap();
        assert_eq!(a, b);
        assert_eq!(renderer.upload_count(), 1);

        registry.invalidate_texture(id);
        registry.request_texture_binding(id, &mut renderer).unwrap();
        assert_eq!(renderer.upload_count(), 2);
    }

    #[test]
    fn test_reattach_after_idle_reuploads() {
        let mut registry = BufferRegistry::new();
        let mut renderer = HeadlessRenderer::new();
        let id = import(&mut registry, 4, 4);

        let reference = registry.attach_reference(id).unwrap();
        registry.request_texture_binding(id, &mut renderer).unwrap();
        let _ = registry.release_reference(reference);

        // The client reused the memory and attached the same buffer again
        let reference = registry.attach_reference(id).unwrap();
        registry.request_texture_binding(id, &mut renderer).unwrap();
        assert_eq!(renderer.upload_count(), 2);
        let _ = registry.release_reference(reference);
    }

    #[test]
    fn test_destroy_retires_texture() {
        let mut registry = BufferRegistry::new();
        let mut renderer = HeadlessRenderer::new();
        let id = import(&mut registry, 4, 4);
        let handle = registry.request_texture_binding(id, &mut renderer).unwrap();
        registry.client_release(id).unwrap();
        assert_eq!(registry.take_retired_textures(), vec![handle]);
    }

    #[test]
    fn test_release_client_buffers() {
        let mut registry = BufferRegistry::new();
        let idle = import(&mut registry, 2, 2);
        let busy = import(&mut registry, 2, 2);
        let reference = registry.attach_reference(busy).unwrap();

        assert_eq!(registry.release_client_buffers(CLIENT), 2);
        assert!(!registry.contains(idle));
        assert!(registry.info(busy).unwrap().client_released);

        assert_eq!(registry.release_reference(reference), ReleaseOutcome::Destroyed);
        assert!(registry.is_empty());
    }

    #[test]
    #[should_panic(expected = "destroyed while a reference was outstanding")]
    fn test_forged_reference_panics() {
        let mut registry = BufferRegistry::new();
        let _ = registry.release_reference(BufferRef { id: BufferId(u64::MAX) });
    }
}
