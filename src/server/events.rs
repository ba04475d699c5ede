//! Delivery of queued core events as wire events

use log::trace;
use wayland_server::protocol::wl_output::WlOutput;
use wayland_server::protocol::wl_surface::WlSurface;
use wayland_server::protocol::{wl_keyboard, wl_pointer};
use wayland_server::Resource;

use super::Resources;
use crate::compositor::{ClientEvent, ConnectionId, OutputId, SurfaceId};
use crate::input::{Axis, ButtonState, KeyState, KeyboardEvent, PointerEvent, TouchEvent};
use crate::protocol::shell::toplevel_states_to_wire;

/// Send one event to `connection`. Events whose target object is already
/// gone are dropped.
pub(super) fn deliver(resources: &mut Resources, connection: ConnectionId, event: ClientEvent) {
    trace!("Delivering {:?} to {:?}", event, connection);
    match event {
        ClientEvent::BufferRelease { buffer } => {
            if let Some(wl_buffer) = resources.buffers.get(&buffer) {
                wl_buffer.release();
            }
        }
        ClientEvent::FrameDone { callback, time } => {
            if let Some((_, wl_callback)) = resources.callbacks.remove(&callback) {
                wl_callback.done(time);
            }
        }
        ClientEvent::ToplevelConfigure {
            surface,
            serial,
            configure,
        } => {
            let (Some(toplevel), Some(xdg_surface)) =
                (resources.toplevels.get(&surface), resources.xdg_surfaces.get(&surface))
            else {
                return;
            };
            let (width, height) = configure.size;
            toplevel.configure(width, height, toplevel_states_to_wire(configure.states));
            xdg_surface.configure(serial);
        }
        ClientEvent::PopupConfigure {
            surface,
            serial,
            configure,
        } => {
            let (Some(popup), Some(xdg_surface)) = (resources.popups.get(&surface), resources.xdg_surfaces.get(&surface))
            else {
                return;
            };
            if let Some(token) = configure.reposition_token {
                if popup.version() >= 3 {
                    popup.repositioned(token);
                }
            }
            let geometry = configure.geometry;
            popup.configure(geometry.x, geometry.y, geometry.width, geometry.height);
            xdg_surface.configure(serial);
        }
        ClientEvent::PopupDone { surface } => {
            if let Some(popup) = resources.popups.get(&surface) {
                popup.popup_done();
            }
        }
        ClientEvent::Close { surface } => {
            if let Some(toplevel) = resources.toplevels.get(&surface) {
                toplevel.close();
            }
        }
        ClientEvent::SurfaceEnter { surface, output } => {
            for_output(resources, connection, surface, output, |wl_surface, wl_output| {
                wl_surface.enter(wl_output)
            });
        }
        ClientEvent::SurfaceLeave { surface, output } => {
            for_output(resources, connection, surface, output, |wl_surface, wl_output| {
                wl_surface.leave(wl_output)
            });
        }
        ClientEvent::Ping { serial } => {
            for wm_base in resources.wm_bases.get(&connection).into_iter().flatten() {
                wm_base.ping(serial);
            }
        }
        ClientEvent::Pointer(event) => deliver_pointer(resources, connection, event),
        ClientEvent::Keyboard(event) => deliver_keyboard(resources, connection, event),
        ClientEvent::Touch(event) => deliver_touch(resources, connection, event),
    }
}

/// Run `f` for every wl_output the client bound for `output`
fn for_output(
    resources: &Resources,
    connection: ConnectionId,
    surface: SurfaceId,
    output: OutputId,
    f: impl Fn(&WlSurface, &WlOutput),
) {
    let Some(wl_surface) = resources.surfaces.get(&surface) else {
        return;
    };
    for (_, wl_output) in resources
        .outputs
        .get(&connection)
        .into_iter()
        .flatten()
        .filter(|(id, _)| *id == output)
    {
        f(wl_surface, wl_output);
    }
}

fn deliver_pointer(resources: &Resources, connection: ConnectionId, event: PointerEvent) {
    for pointer in resources.pointers.get(&connection).into_iter().flatten() {
        match &event {
            PointerEvent::Enter { serial, surface, x, y } => {
                if let Some(wl_surface) = resources.surfaces.get(surface) {
                    pointer.enter(*serial, wl_surface, *x, *y);
                }
            }
            PointerEvent::Leave { serial, surface } => {
                if let Some(wl_surface) = resources.surfaces.get(surface) {
                    pointer.leave(*serial, wl_surface);
                }
            }
            PointerEvent::Motion { time, x, y } => pointer.motion(*time, *x, *y),
            PointerEvent::Button {
                serial,
                time,
                button,
                state,
            } => {
                let state = match state {
                    ButtonState::Pressed => wl_pointer::ButtonState::Pressed,
                    ButtonState::Released => wl_pointer::ButtonState::Released,
                };
                pointer.button(*serial, *time, *button, state);
            }
            PointerEvent::Axis { time, axis, value } => {
                let axis = match axis {
                    Axis::VerticalScroll => wl_pointer::Axis::VerticalScroll,
                    Axis::HorizontalScroll => wl_pointer::Axis::HorizontalScroll,
                };
                pointer.axis(*time, axis, *value);
            }
            PointerEvent::Frame => {
                if pointer.version() >= 5 {
                    pointer.frame();
                }
            }
        }
    }
}

fn deliver_keyboard(resources: &Resources, connection: ConnectionId, event: KeyboardEvent) {
    for keyboard in resources.keyboards.get(&connection).into_iter().flatten() {
        match &event {
            KeyboardEvent::Enter {
                serial,
                surface,
                pressed_keys,
            } => {
                if let Some(wl_surface) = resources.surfaces.get(surface) {
                    let keys = pressed_keys.iter().flat_map(|k| k.to_ne_bytes()).collect();
                    keyboard.enter(*serial, wl_surface, keys);
                }
            }
            KeyboardEvent::Leave { serial, surface } => {
                if let Some(wl_surface) = resources.surfaces.get(surface) {
                    keyboard.leave(*serial, wl_surface);
                }
            }
            KeyboardEvent::Key {
                serial,
                time,
                key,
                state,
            } => {
                let state = match state {
                    KeyState::Pressed => wl_keyboard::KeyState::Pressed,
                    KeyState::Released => wl_keyboard::KeyState::Released,
                };
                keyboard.key(*serial, *time, *key, state);
            }
            KeyboardEvent::Modifiers { serial, state } => {
                keyboard.modifiers(*serial, state.depressed, state.latched, state.locked, state.group);
            }
        }
    }
}

fn deliver_touch(resources: &Resources, connection: ConnectionId, event: TouchEvent) {
    for touch in resources.touches.get(&connection).into_iter().flatten() {
        match &event {
            TouchEvent::Down {
                serial,
                time,
                surface,
                id,
                x,
                y,
            } => {
                if let Some(wl_surface) = resources.surfaces.get(surface) {
                    touch.down(*serial, *time, wl_surface, *id, *x, *y);
                }
            }
            TouchEvent::Up { serial, time, id } => touch.up(*serial, *time, *id),
            TouchEvent::Motion { time, id, x, y } => touch.motion(*time, *id, *x, *y),
            TouchEvent::Frame => touch.frame(),
            TouchEvent::Cancel => touch.cancel(),
        }
    }
}
