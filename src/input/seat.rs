//! Input seat coordination
//!
//! The seat owns pointer, keyboard and touch state plus the three serial
//! counters. It never hit-tests: callers pass the target surface along with
//! surface-local coordinates. Every notification is queued as a
//! [`RoutedEvent`] and drained by the core.

use log::debug;

use super::keyboard::{KeyState, Keyboard, KeyboardEvent, ModifierState};
use super::pointer::{Axis, ButtonState, Pointer, PointerEvent};
use super::touch::{Touch, TouchEvent};
use crate::compositor::SurfaceId;

/// Seat capabilities
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeatCapabilities {
    pub keyboard: bool,
    pub pointer: bool,
    pub touch: bool,
}

impl SeatCapabilities {
    /// Convert to Wayland capability flags
    pub fn to_wayland(&self) -> u32 {
        let mut flags = 0u32;
        if self.pointer {
            flags |= 1;
        }
        if self.keyboard {
            flags |= 2;
        }
        if self.touch {
            flags |= 4;
        }
        flags
    }
}

/// Monotonic serial source
#[derive(Debug, Default)]
struct SerialCounter(u32);

impl SerialCounter {
    fn next(&mut self) -> u32 {
        self.0 = self.0.wrapping_add(1);
        self.0
    }

    fn last(&self) -> u32 {
        self.0
    }
}

/// A seat notification
#[derive(Debug, Clone, PartialEq)]
pub enum SeatEvent {
    Pointer(PointerEvent),
    Keyboard(KeyboardEvent),
    Touch(TouchEvent),
}

/// A seat notification together with the surface whose client receives it
#[derive(Debug, Clone, PartialEq)]
pub struct RoutedEvent {
    pub surface: SurfaceId,
    pub event: SeatEvent,
}

/// Input seat that coordinates keyboard, pointer and touch
#[derive(Debug)]
pub struct Seat {
    /// Seat name
    name: String,
    keyboard: Keyboard,
    pointer: Pointer,
    touch: Touch,
    capabilities: SeatCapabilities,
    pointer_serial: SerialCounter,
    keyboard_serial: SerialCounter,
    touch_serial: SerialCounter,
    /// Serial of the most recent pointer button press
    last_button_press: Option<u32>,
    /// Notifications not yet drained
    events: Vec<RoutedEvent>,
}

impl Seat {
    /// Create a new seat
    pub fn new(name: impl Into<String>, repeat_rate: i32, repeat_delay: i32) -> Self {
        Self {
            name: name.into(),
            keyboard: Keyboard::new(repeat_rate, repeat_delay),
            pointer: Pointer::new(),
            touch: Touch::new(),
            capabilities: SeatCapabilities {
                keyboard: true,
                pointer: true,
                touch: true,
            },
            pointer_serial: SerialCounter::default(),
            keyboard_serial: SerialCounter::default(),
            touch_serial: SerialCounter::default(),
            last_button_press: None,
            events: Vec::new(),
        }
    }

    /// Get the seat name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get seat capabilities
    pub fn capabilities(&self) -> SeatCapabilities {
        self.capabilities
    }

    /// Set seat capabilities
    pub fn set_capabilities(&mut self, capabilities: SeatCapabilities) {
        self.capabilities = capabilities;
    }

    /// Get keyboard reference
    pub fn keyboard(&self) -> &Keyboard {
        &self.keyboard
    }

    /// Get pointer reference
    pub fn pointer(&self) -> &Pointer {
        &self.pointer
    }

    /// Get touch reference
    pub fn touch(&self) -> &Touch {
        &self.touch
    }

    /// Last serial handed out by the pointer counter
    pub fn pointer_serial(&self) -> u32 {
        self.pointer_serial.last()
    }

    /// Last serial handed out by the keyboard counter
    pub fn keyboard_serial(&self) -> u32 {
        self.keyboard_serial.last()
    }

    /// Last serial handed out by the touch counter
    pub fn touch_serial(&self) -> u32 {
        self.touch_serial.last()
    }

    /// Serial of the last pointer button press, used to validate grabs
    pub fn last_button_press_serial(&self) -> Option<u32> {
        self.last_button_press
    }

    fn push(&mut self, surface: SurfaceId, event: SeatEvent) {
        self.events.push(RoutedEvent { surface, event });
    }

    /// Take every queued notification
    pub fn take_events(&mut self) -> Vec<RoutedEvent> {
        std::mem::take(&mut self.events)
    }

    // ========================================================================
    // Focus
    // ========================================================================

    /// Move keyboard focus; leave reaches the old surface before enter
    /// reaches the new one
    pub fn set_keyboard_focus(&mut self, surface: Option<SurfaceId>) {
        if self.keyboard.focus() == surface {
            return;
        }
        let old = self.keyboard.set_focus(surface);
        if let Some(old) = old {
            let serial = self.keyboard_serial.next();
            self.push(old, SeatEvent::Keyboard(KeyboardEvent::Leave { serial, surface: old }));
        }
        if let Some(new) = surface {
            let serial = self.keyboard_serial.next();
            let pressed_keys = self.keyboard.pressed_keys().to_vec();
            self.push(
                new,
                SeatEvent::Keyboard(KeyboardEvent::Enter {
                    serial,
                    surface: new,
                    pressed_keys,
                }),
            );
            let state = self.keyboard.modifiers();
            self.push(new, SeatEvent::Keyboard(KeyboardEvent::Modifiers { serial, state }));
        }
        debug!("Keyboard focus {:?} -> {:?}", old, surface);
    }

    /// Move pointer focus to `target` with surface-local coordinates
    pub fn set_pointer_focus(&mut self, target: Option<(SurfaceId, f64, f64)>) {
        let surface = target.map(|(s, _, _)| s);
        let old = self.pointer.focus();
        if old == surface {
            return;
        }
        if let Some(old) = old {
            let serial = self.pointer_serial.next();
            self.push(old, SeatEvent::Pointer(PointerEvent::Leave { serial, surface: old }));
            self.push(old, SeatEvent::Pointer(PointerEvent::Frame));
        }
        let mut enter_serial = None;
        if let Some((new, x, y)) = target {
            let serial = self.pointer_serial.next();
            enter_serial = Some(serial);
            self.push(
                new,
                SeatEvent::Pointer(PointerEvent::Enter {
                    serial,
                    surface: new,
                    x,
                    y,
                }),
            );
            self.push(new, SeatEvent::Pointer(PointerEvent::Frame));
        }
        self.pointer.set_focus(surface, enter_serial);
        debug!("Pointer focus {:?} -> {:?}", old, surface);
    }

    /// Forget a destroyed surface without sending it anything
    pub fn surface_destroyed(&mut self, surface: SurfaceId) {
        if self.keyboard.focus() == Some(surface) {
            self.keyboard.set_focus(None);
        }
        if self.pointer.focus() == Some(surface) {
            self.pointer.set_focus(None, None);
        }
        if self.pointer.cursor() == Some(surface) {
            self.pointer.set_cursor(None, 0, 0);
        }
        self.touch.forget_surface(surface);
        self.events.retain(|e| e.surface != surface);
    }

    // ========================================================================
    // Pointer
    // ========================================================================

    /// Record the global position and forward surface-local motion to the
    /// focused surface
    pub fn pointer_motion(&mut self, time: u32, global: (f64, f64), local: Option<(f64, f64)>) {
        self.pointer.motion(global.0, global.1);
        if let (Some(focus), Some((x, y))) = (self.pointer.focus(), local) {
            self.push(focus, SeatEvent::Pointer(PointerEvent::Motion { time, x, y }));
            self.push(focus, SeatEvent::Pointer(PointerEvent::Frame));
        }
    }

    /// Press or release a button; returns the serial of a forwarded event
    pub fn pointer_button(&mut self, time: u32, button: u32, pressed: bool) -> Option<u32> {
        let changed = if pressed {
            self.pointer.button_press(button)
        } else {
            self.pointer.button_release(button)
        };
        if !changed {
            return None;
        }
        let serial = self.pointer_serial.next();
        if pressed {
            self.last_button_press = Some(serial);
        }
        if let Some(focus) = self.pointer.focus() {
            let state = if pressed {
                ButtonState::Pressed
            } else {
                ButtonState::Released
            };
            self.push(
                focus,
                SeatEvent::Pointer(PointerEvent::Button {
                    serial,
                    time,
                    button,
                    state,
                }),
            );
            self.push(focus, SeatEvent::Pointer(PointerEvent::Frame));
        }
        Some(serial)
    }

    pub fn pointer_axis(&mut self, time: u32, axis: Axis, value: f64) {
        if let Some(focus) = self.pointer.focus() {
            self.push(focus, SeatEvent::Pointer(PointerEvent::Axis { time, axis, value }));
            self.push(focus, SeatEvent::Pointer(PointerEvent::Frame));
        }
    }

    /// Set the cursor image with the serial of the current enter event.
    /// The caller checks that the requester owns the focused surface.
    /// Whether `serial` is the serial of the current pointer enter
    pub fn is_current_enter(&self, serial: u32) -> bool {
        self.pointer.focus().is_some() && self.pointer.enter_serial() == Some(serial)
    }

    pub fn set_cursor(&mut self, serial: u32, surface: Option<SurfaceId>, hotspot: (i32, i32)) -> bool {
        if !self.is_current_enter(serial) {
            debug!("Ignoring set_cursor with stale serial {}", serial);
            return false;
        }
        self.pointer.set_cursor(surface, hotspot.0, hotspot.1);
        true
    }

    // ========================================================================
    // Keyboard
    // ========================================================================

    /// Press or release a key; repeats and releases of unknown keys are dropped
    pub fn keyboard_key(&mut self, time: u32, key: u32, pressed: bool) -> Option<u32> {
        let changed = if pressed {
            self.keyboard.key_press(key)
        } else {
            self.keyboard.key_release(key)
        };
        if !changed {
            return None;
        }
        let serial = self.keyboard_serial.next();
        if let Some(focus) = self.keyboard.focus() {
            let state = if pressed {
                KeyState::Pressed
            } else {
                KeyState::Released
            };
            self.push(
                focus,
                SeatEvent::Keyboard(KeyboardEvent::Key {
                    serial,
                    time,
                    key,
                    state,
                }),
            );
        }
        Some(serial)
    }

    /// Update the modifier mask
    pub fn modifiers(&mut self, state: ModifierState) {
        if !self.keyboard.update_modifiers(state) {
            return;
        }
        let serial = self.keyboard_serial.next();
        if let Some(focus) = self.keyboard.focus() {
            self.push(focus, SeatEvent::Keyboard(KeyboardEvent::Modifiers { serial, state }));
        }
    }

    // ========================================================================
    // Touch
    // ========================================================================

    pub fn touch_down(&mut self, time: u32, id: i32, surface: SurfaceId, x: f64, y: f64) -> u32 {
        self.touch.down(id, surface, x, y);
        let serial = self.touch_serial.next();
        self.push(
            surface,
            SeatEvent::Touch(TouchEvent::Down {
                serial,
                time,
                surface,
                id,
                x,
                y,
            }),
        );
        self.push(surface, SeatEvent::Touch(TouchEvent::Frame));
        serial
    }

    /// Move a touch point; unknown ids are a no-op
    pub fn touch_motion(&mut self, time: u32, id: i32, x: f64, y: f64) {
        if let Some(point) = self.touch.motion(id, x, y) {
            self.push(point.surface, SeatEvent::Touch(TouchEvent::Motion { time, id, x, y }));
            self.push(point.surface, SeatEvent::Touch(TouchEvent::Frame));
        }
    }

    /// Lift a touch point; unknown ids are a no-op
    pub fn touch_up(&mut self, time: u32, id: i32) {
        let Some(point) = self.touch.up(id) else {
            debug!("touch_up for unknown id {}", id);
            return;
        };
        let serial = self.touch_serial.next();
        self.push(point.surface, SeatEvent::Touch(TouchEvent::Up { serial, time, id }));
        self.push(point.surface, SeatEvent::Touch(TouchEvent::Frame));
    }

    /// Cancel every active touch sequence
    pub fn touch_cancel(&mut self) {
        for surface in self.touch.surfaces() {
            self.push(surface, SeatEvent::Touch(TouchEvent::Cancel));
        }
        self.touch.clear();
    }
}

impl Default for Seat {
    fn default() -> Self {
        Self::new("seat0", 25, 600)
    }
}
