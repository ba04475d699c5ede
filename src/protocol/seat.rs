//! wl_seat helpers
//!
//! Keymap delivery for wl_keyboard: the XKB text keymap is written into a
//! sealed memfd that clients map read-only.

use std::fs::File;
use std::io::Write;
use std::os::fd::{AsFd, BorrowedFd, OwnedFd};

use rustix::fs::{MemfdFlags, SealFlags};

use crate::input::SeatCapabilities;

/// A keymap ready to be sent with `wl_keyboard.keymap`
#[derive(Debug)]
pub struct KeymapFile {
    fd: OwnedFd,
    /// Size including the trailing NUL
    size: u32,
}

impl KeymapFile {
    /// Write `keymap` into a sealed memfd
    pub fn new(keymap: &str) -> std::io::Result<Self> {
        let fd = rustix::fs::memfd_create("winland-keymap", MemfdFlags::CLOEXEC | MemfdFlags::ALLOW_SEALING)?;
        let mut file = File::from(fd);
        file.write_all(keymap.as_bytes())?;
        file.write_all(&[0])?;
        file.flush()?;

        let fd = OwnedFd::from(file);
        rustix::fs::fcntl_add_seals(&fd, SealFlags::SHRINK | SealFlags::GROW | SealFlags::WRITE | SealFlags::SEAL)?;
        Ok(Self {
            fd,
            size: keymap.len() as u32 + 1,
        })
    }

    pub fn size(&self) -> u32 {
        self.size
    }
}

impl AsFd for KeymapFile {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

/// Advertised wl_seat capabilities
pub fn wire_capabilities(capabilities: SeatCapabilities) -> wayland_server::protocol::wl_seat::Capability {
    wayland_server::protocol::wl_seat::Capability::from_bits_truncate(capabilities.to_wayland())
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::{Read, Seek, SeekFrom};

    use crate::input::Keyboard;

    #[test]
    fn test_keymap_is_nul_terminated() {
        let keymap = Keyboard::default_keymap();
        let file = KeymapFile::new(&keymap).unwrap();
        assert_eq!(file.size() as usize, keymap.len() + 1);

        let mut reader = File::from(file.fd.try_clone().unwrap());
        reader.seek(SeekFrom::Start(0)).unwrap();
        let mut contents = Vec::new();
        reader.read_to_end(&mut contents).unwrap();
        assert_eq!(contents.last(), Some(&0));
        assert!(contents.starts_with(b"xkb_keymap"));
    }

    #[test]
    fn test_keymap_is_sealed() {
        let file = KeymapFile::new("xkb_keymap {};").unwrap();
        let seals = rustix::fs::fcntl_get_seals(&file.fd).unwrap();
        assert!(seals.contains(SealFlags::WRITE));
    }

    #[test]
    fn test_capabilities() {
        let caps = SeatCapabilities {
            pointer: true,
            keyboard: true,
            touch: false,
        };
        let wire = wire_capabilities(caps);
        assert!(wire.contains(wayland_server::protocol::wl_seat::Capability::Pointer));
        assert!(!wire.contains(wayland_server::protocol::wl_seat::Capability::Touch));
    }
}
