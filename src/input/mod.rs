//! Input handling
//!
//! Producers (devices, remote input injection) never touch the seat
//! directly. They push [`InputEvent`]s into an [`InputSender`] and the
//! event loop feeds them to the core one at a time.

mod keyboard;
mod pointer;
mod seat;
mod touch;

pub use keyboard::{
    KeyState, Keyboard, KeyboardEvent, ModifierState, KEY_ESC, MOD_ALT, MOD_CTRL, MOD_SHIFT, MOD_SUPER,
};
pub use pointer::{Axis, ButtonState, Pointer, PointerEvent};
pub use seat::{RoutedEvent, Seat, SeatCapabilities, SeatEvent};
pub use touch::{Touch, TouchEvent, TouchPoint};

/// Normalized input from an external producer.
///
/// Coordinates are global logical pixels; keycodes are evdev codes.
#[derive(Debug, Clone, PartialEq)]
pub enum InputEvent {
    PointerMotion { time: u32, x: f64, y: f64 },
    PointerButton { time: u32, button: u32, pressed: bool },
    PointerAxis { time: u32, axis: Axis, value: f64 },
    Key { time: u32, key: u32, pressed: bool },
    Modifiers(ModifierState),
    TouchDown { time: u32, id: i32, x: f64, y: f64 },
    TouchMotion { time: u32, id: i32, x: f64, y: f64 },
    TouchUp { time: u32, id: i32 },
    TouchCancel,
}

/// Thread-safe handle for input producers
pub type InputSender = calloop::channel::Sender<InputEvent>;
