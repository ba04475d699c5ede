//! Pointer (mouse/trackpad) state

use log::debug;

use crate::compositor::SurfaceId;

/// Pointer state
#[derive(Debug, Default)]
pub struct Pointer {
    /// Currently focused surface
    focus: Option<SurfaceId>,
    /// Serial of the enter event sent to the focused surface
    enter_serial: Option<u32>,
    /// Position in global logical coordinates
    position: (f64, f64),
    /// Currently pressed buttons
    pressed_buttons: Vec<u32>,
    /// Cursor surface chosen by the focused client
    cursor_surface: Option<SurfaceId>,
    /// Cursor hotspot
    cursor_hotspot: (i32, i32),
}

/// Scroll axis
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    VerticalScroll,
    HorizontalScroll,
}

/// Button state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonState {
    Released,
    Pressed,
}

/// Pointer events sent to clients
#[derive(Debug, Clone, PartialEq)]
pub enum PointerEvent {
    /// Pointer entered a surface
    Enter {
        serial: u32,
        surface: SurfaceId,
        x: f64,
        y: f64,
    },
    /// Pointer left a surface
    Leave { serial: u32, surface: SurfaceId },
    /// Motion in surface-local coordinates
    Motion { time: u32, x: f64, y: f64 },
    /// Button press or release
    Button {
        serial: u32,
        time: u32,
        button: u32,
        state: ButtonState,
    },
    /// Axis (scroll) event
    Axis { time: u32, axis: Axis, value: f64 },
    /// Frame delimiter
    Frame,
}

impl Pointer {
    /// Create a new pointer
    pub fn new() -> Self {
        Self::default()
    }

    /// Set pointer focus, returning the previous focus
    pub fn set_focus(&mut self, surface: Option<SurfaceId>, enter_serial: Option<u32>) -> Option<SurfaceId> {
        let old = self.focus;
        self.focus = surface;
        self.enter_serial = enter_serial;
        if old != surface {
            // A new client has to set its own cursor
            self.cursor_surface = None;
        }
        old
    }

    /// Get the currently focused surface
    pub fn focus(&self) -> Option<SurfaceId> {
        self.focus
    }

    pub fn enter_serial(&self) -> Option<u32> {
        self.enter_serial
    }

    /// Update pointer position
    pub fn motion(&mut self, x: f64, y: f64) {
        self.position = (x, y);
    }

    /// Get current position
    pub fn position(&self) -> (f64, f64) {
        self.position
    }

    /// Handle a button press
    pub fn button_press(&mut self, button: u32) -> bool {
        if !self.pressed_buttons.contains(&button) {
            self.pressed_buttons.push(button);
            debug!("Button pressed: {:#x}", button);
            true
        } else {
            false
        }
    }

    /// Handle a button release
    pub fn button_release(&mut self, button: u32) -> bool {
        if let Some(idx) = self.pressed_buttons.iter().position(|&b| b == button) {
            self.pressed_buttons.remove(idx);
            debug!("Button released: {:#x}", button);
            true
        } else {
            false
        }
    }

    /// Get currently pressed buttons
    pub fn pressed_buttons(&self) -> &[u32] {
        &self.pressed_buttons
    }

    /// Check if any button is pressed
    pub fn has_button_pressed(&self) -> bool {
        !self.pressed_buttons.is_empty()
    }

    /// Set the cursor surface
    pub fn set_cursor(&mut self, surface: Option<SurfaceId>, hotspot_x: i32, hotspot_y: i32) {
        self.cursor_surface = surface;
        self.cursor_hotspot = (hotspot_x, hotspot_y);
    }

    /// Get the cursor surface
    pub fn cursor(&self) -> Option<SurfaceId> {
        self.cursor_surface
    }

    /// Get cursor hotspot
    pub fn cursor_hotspot(&self) -> (i32, i32) {
        self.cursor_hotspot
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pointer_new() {
        let pointer = Pointer::new();
        assert!(pointer.focus().is_none());
        assert!(pointer.pressed_buttons().is_empty());
    }

    #[test]
    fn test_button_press_release() {
        let mut pointer = Pointer::new();

        assert!(pointer.button_press(0x110));
        assert!(!pointer.button_press(0x110));
        assert!(pointer.has_button_pressed());

        assert!(pointer.button_release(0x110));
        assert!(!pointer.button_release(0x110));
        assert!(!pointer.has_button_pressed());
    }

    #[test]
    fn test_focus_change_resets_cursor() {
        let mut pointer = Pointer::new();
        pointer.set_focus(Some(SurfaceId(1)), Some(3));
        pointer.set_cursor(Some(SurfaceId(100)), 10, 5);
        assert_eq!(pointer.cursor(), Some(SurfaceId(100)));
        assert_eq!(pointer.cursor_hotspot(), (10, 5));

        let old = pointer.set_focus(Some(SurfaceId(2)), Some(4));
        assert_eq!(old, Some(SurfaceId(1)));
        assert_eq!(pointer.enter_serial(), Some(4));
        assert!(pointer.cursor().is_none());
    }
}
