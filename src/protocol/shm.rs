//! wl_shm pool management
//!
//! Client memory arrives as a file descriptor. Each pool maps it read-only
//! once; buffers created from the pool share that mapping through
//! [`ExternalHandle`] so no pixel data is ever copied on import.

use std::collections::HashMap;
use std::os::fd::OwnedFd;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use log::debug;
use memmap2::{Mmap, MmapOptions};

use crate::compositor::{ExternalHandle, PixelFormat};

/// Unique identifier for shm pools
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShmPoolId(pub u64);

impl ShmPoolId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        ShmPoolId(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// SHM errors
#[derive(Debug, thiserror::Error)]
pub enum ShmError {
    #[error("invalid pool")]
    InvalidPool,
    #[error("pool size {requested} exceeds the {available} bytes behind the fd")]
    InvalidFd { requested: usize, available: u64 },
    #[error("pools cannot shrink ({current} -> {requested})")]
    Shrink { current: usize, requested: usize },
    #[error("mapping the pool failed: {0}")]
    Map(#[from] std::io::Error),
}

impl From<rustix::io::Errno> for ShmError {
    fn from(errno: rustix::io::Errno) -> Self {
        ShmError::Map(errno.into())
    }
}

/// A shared memory pool
#[derive(Debug)]
pub struct ShmPool {
    /// Unique identifier
    pub id: ShmPoolId,
    /// Client file descriptor, kept for remapping on resize
    fd: OwnedFd,
    /// Size of the pool in bytes
    size: usize,
    /// Current mapping; buffers created before a resize keep the old one
    map: Option<Arc<Mmap>>,
}

impl ShmPool {
    fn map(fd: OwnedFd, size: usize) -> Result<Self, ShmError> {
        let mut pool = Self {
            id: ShmPoolId::new(),
            fd,
            size: 0,
            map: None,
        };
        pool.remap(size)?;
        Ok(pool)
    }

    fn remap(&mut self, size: usize) -> Result<(), ShmError> {
        let available = rustix::fs::fstat(&self.fd)?.st_size.max(0) as u64;
        if size as u64 > available {
            return Err(ShmError::InvalidFd {
                requested: size,
                available,
            });
        }
        self.map = if size == 0 {
            None
        } else {
            // SAFETY: read-only mapping, only ever read as plain bytes
            let map = unsafe { MmapOptions::new().len(size).map(&self.fd)? };
            Some(Arc::new(map))
        };
        self.size = size;
        Ok(())
    }

    pub fn size(&self) -> usize {
        self.size
    }
}

/// All pools of all clients
#[derive(Debug, Default)]
pub struct ShmPools {
    pools: HashMap<ShmPoolId, ShmPool>,
}

impl ShmPools {
    pub fn new() -> Self {
        Self::default()
    }

    /// Formats advertised on wl_shm
    pub fn formats() -> impl Iterator<Item = u32> {
        PixelFormat::ALL.into_iter().map(PixelFormat::to_wayland)
    }

    /// Map a client fd as a new pool
    pub fn create_pool(&mut self, fd: OwnedFd, size: usize) -> Result<ShmPoolId, ShmError> {
        let pool = ShmPool::map(fd, size)?;
        let id = pool.id;
        self.pools.insert(id, pool);
        debug!("Created shm pool {:?}, size {}", id, size);
        Ok(id)
    }

    /// Grow a pool; existing buffers keep reading the previous mapping
    pub fn resize_pool(&mut self, id: ShmPoolId, size: usize) -> Result<(), ShmError> {
        let pool = self.pools.get_mut(&id).ok_or(ShmError::InvalidPool)?;
        if size < pool.size {
            return Err(ShmError::Shrink {
                current: pool.size,
                requested: size,
            });
        }
        pool.remap(size)?;
        debug!("Resized shm pool {:?} to {}", id, size);
        Ok(())
    }

    /// Forget a pool. Buffers created from it stay valid.
    pub fn destroy_pool(&mut self, id: ShmPoolId) {
        self.pools.remove(&id);
        debug!("Destroyed shm pool {:?}", id);
    }

    /// Memory for a buffer starting at `offset`
    pub fn handle(&self, id: ShmPoolId, offset: usize) -> Result<ExternalHandle, ShmError> {
        let pool = self.pools.get(&id).ok_or(ShmError::InvalidPool)?;
        let storage: Arc<Mmap> = match &pool.map {
            Some(map) => map.clone(),
            None => return Ok(ExternalHandle::from_bytes(Vec::new())),
        };
        Ok(ExternalHandle::new(storage, offset))
    }

    pub fn get(&self, id: ShmPoolId) -> Option<&ShmPool> {
        self.pools.get(&id)
    }

    pub fn len(&self) -> usize {
        self.pools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::Write;

    use crate::compositor::{BufferError, BufferRegistry, ConnectionId};

    fn pool_file(len: usize) -> OwnedFd {
        let mut file = tempfile::tempfile().unwrap();
        file.write_all(&vec![0xAB; len]).unwrap();
        file.into()
    }

    #[test]
    fn test_formats_include_argb_and_xrgb() {
        let formats: Vec<u32> = ShmPools::formats().collect();
        assert!(formats.contains(&0));
        assert!(formats.contains(&1));
    }

    #[test]
    fn test_pool_backs_buffer() {
        let mut pools = ShmPools::new();
        let id = pools.create_pool(pool_file(4 * 8 * 8), 4 * 8 * 8).unwrap();

        let mut registry = BufferRegistry::new();
        let handle = pools.handle(id, 0).unwrap();
        let buffer = registry.import(ConnectionId(1), handle, 8, 8, 32, 1).unwrap();
        let view = registry.view(buffer).unwrap();
        assert_eq!(view.pixels[0], 0xAB);
    }

    #[test]
    fn test_pool_larger_than_fd_is_rejected() {
        let mut pools = ShmPools::new();
        let err = pools.create_pool(pool_file(16), 4096).unwrap_err();
        assert!(matches!(err, ShmError::InvalidFd { requested: 4096, .. }));
    }

    #[test]
    fn test_buffer_outside_pool_is_rejected() {
        let mut pools = ShmPools::new();
        let id = pools.create_pool(pool_file(64), 64).unwrap();
        let mut registry = BufferRegistry::new();
        let err = registry
            .import(ConnectionId(1), pools.handle(id, 32).unwrap(), 4, 4, 16, 0)
            .unwrap_err();
        assert!(matches!(err, BufferError::OutOfBounds { .. }));
    }

    #[test]
    fn test_pool_cannot_shrink() {
        let mut pools = ShmPools::new();
        let id = pools.create_pool(pool_file(128), 64).unwrap();
        assert!(pools.resize_pool(id, 128).is_ok());
        assert_eq!(pools.get(id).unwrap().size(), 128);
        assert!(matches!(pools.resize_pool(id, 32), Err(ShmError::Shrink { .. })));
    }

    #[test]
    fn test_destroyed_pool_keeps_buffers_readable() {
        let mut pools = ShmPools::new();
        let id = pools.create_pool(pool_file(64), 64).unwrap();
        let handle = pools.handle(id, 0).unwrap();
        pools.destroy_pool(id);
        assert!(pools.is_empty());

        let mut registry = BufferRegistry::new();
        let buffer = registry.import(ConnectionId(1), handle, 4, 4, 16, 0).unwrap();
        assert_eq!(registry.view(buffer).unwrap().pixels.len(), 64);
    }
}
