//! Wayland global registry implementations
//!
//! Implements GlobalDispatch for advertising globals to clients, plus the
//! xdg-shell objects created through xdg_wm_base.

use std::os::fd::AsFd;
use std::sync::{Mutex, PoisonError};

use log::{debug, info};
use wayland_protocols::xdg::shell::server::{xdg_popup, xdg_positioner, xdg_surface, xdg_toplevel, xdg_wm_base};
use wayland_server::protocol::{wl_compositor, wl_keyboard, wl_output, wl_seat, wl_shm};
use wayland_server::backend::ClientId;
use wayland_server::{Client, DataInit, Dispatch, DisplayHandle, GlobalDispatch, New, Resource, WEnum};

use super::{connection_of, enum_value, ServerState};
use crate::compositor::{OutputId, Rectangle, SurfaceId};
use crate::protocol::output::send_output;
use crate::protocol::seat::wire_capabilities;
use crate::protocol::shell::Anchor;
use crate::protocol::{ShmPools, XdgPositioner};

// ============================================================================
// wl_compositor global
// ============================================================================

impl GlobalDispatch<wl_compositor::WlCompositor, ()> for ServerState {
    fn bind(
        _state: &mut Self,
        _handle: &DisplayHandle,
        _client: &Client,
        resource: New<wl_compositor::WlCompositor>,
        _global_data: &(),
        data_init: &mut DataInit<'_, Self>,
    ) {
        debug!("Client bound wl_compositor");
        data_init.init(resource, ());
    }
}

// ============================================================================
// wl_shm global
// ============================================================================

impl GlobalDispatch<wl_shm::WlShm, ()> for ServerState {
    fn bind(
        _state: &mut Self,
        _handle: &DisplayHandle,
        _client: &Client,
        resource: New<wl_shm::WlShm>,
        _global_data: &(),
        data_init: &mut DataInit<'_, Self>,
    ) {
        debug!("Client bound wl_shm");
        let shm = data_init.init(resource, ());
        for code in ShmPools::formats() {
            if let Ok(format) = wl_shm::Format::try_from(code) {
                shm.format(format);
            }
        }
    }
}

// ============================================================================
// wl_seat global
// ============================================================================

impl GlobalDispatch<wl_seat::WlSeat, ()> for ServerState {
    fn bind(
        state: &mut Self,
        _handle: &DisplayHandle,
        _client: &Client,
        resource: New<wl_seat::WlSeat>,
        _global_data: &(),
        data_init: &mut DataInit<'_, Self>,
    ) {
        debug!("Client bound wl_seat");
        let seat = data_init.init(resource, ());
        seat.capabilities(wire_capabilities(state.compositor.seat.capabilities()));
        if seat.version() >= 2 {
            seat.name(state.compositor.seat.name().to_string());
        }
    }
}

impl ServerState {
    /// Send keymap and repeat info to a fresh wl_keyboard
    pub(super) fn init_keyboard(&self, keyboard: &wl_keyboard::WlKeyboard) {
        match &self.keymap {
            Some(keymap) => keyboard.keymap(wl_keyboard::KeymapFormat::XkbV1, keymap.as_fd(), keymap.size()),
            None => debug!("No keymap available for {:?}", keyboard.id()),
        }
        if keyboard.version() >= 4 {
            let (rate, delay) = self.compositor.seat.keyboard().repeat_info();
            keyboard.repeat_info(rate, delay);
        }
    }
}

// ============================================================================
// wl_output global
// ============================================================================

impl GlobalDispatch<wl_output::WlOutput, OutputId> for ServerState {
    fn bind(
        state: &mut Self,
        _handle: &DisplayHandle,
        client: &Client,
        resource: New<wl_output::WlOutput>,
        global_data: &OutputId,
        data_init: &mut DataInit<'_, Self>,
    ) {
        debug!("Client bound wl_output for {:?}", global_data);
        let output = data_init.init(resource, *global_data);
        if let Some(info) = state.compositor.outputs.get(*global_data) {
            send_output(&output, info);
        }
        if let Some(connection) = connection_of(client) {
            state
                .resources
                .outputs
                .entry(connection)
                .or_default()
                .push((*global_data, output));
        }
    }
}

// ============================================================================
// xdg_wm_base global
// ============================================================================

impl GlobalDispatch<xdg_wm_base::XdgWmBase, ()> for ServerState {
    fn bind(
        state: &mut Self,
        _handle: &DisplayHandle,
        client: &Client,
        resource: New<xdg_wm_base::XdgWmBase>,
        _global_data: &(),
        data_init: &mut DataInit<'_, Self>,
    ) {
        debug!("Client bound xdg_wm_base");
        let wm_base = data_init.init(resource, ());
        if let Some(connection) = connection_of(client) {
            state.resources.wm_bases.entry(connection).or_default().push(wm_base);
        }
    }
}

impl Dispatch<xdg_wm_base::XdgWmBase, ()> for ServerState {
    fn request(
        state: &mut Self,
        client: &Client,
        _resource: &xdg_wm_base::XdgWmBase,
        request: xdg_wm_base::Request,
        _data: &(),
        _dhandle: &DisplayHandle,
        data_init: &mut DataInit<'_, Self>,
    ) {
        match request {
            xdg_wm_base::Request::CreatePositioner { id } => {
                data_init.init(id, Mutex::new(XdgPositioner::new()));
            }
            xdg_wm_base::Request::GetXdgSurface { id, surface } => {
                let Some(surface_id) = surface.data::<SurfaceId>().copied() else {
                    return;
                };
                debug!("Creating xdg_surface for {:?}", surface_id);
                let xdg_surface = data_init.init(id, surface_id);
                state.resources.xdg_surfaces.insert(surface_id, xdg_surface);
            }
            xdg_wm_base::Request::Pong { serial } => {
                if let Some(connection) = connection_of(client) {
                    state.compositor.pong(connection, serial);
                }
            }
            xdg_wm_base::Request::Destroy => {}
            _ => {}
        }
    }

    fn destroyed(state: &mut Self, _client: ClientId, resource: &xdg_wm_base::XdgWmBase, _data: &()) {
        for list in state.resources.wm_bases.values_mut() {
            list.retain(|wm_base| wm_base != resource);
        }
    }
}

// ============================================================================
// xdg_positioner
// ============================================================================

fn positioner_snapshot(resource: &xdg_positioner::XdgPositioner) -> XdgPositioner {
    resource
        .data::<Mutex<XdgPositioner>>()
        .map(|data| data.lock().unwrap_or_else(PoisonError::into_inner).clone())
        .unwrap_or_default()
}

impl Dispatch<xdg_positioner::XdgPositioner, Mutex<XdgPositioner>> for ServerState {
    fn request(
        _state: &mut Self,
        _client: &Client,
        resource: &xdg_positioner::XdgPositioner,
        request: xdg_positioner::Request,
        data: &Mutex<XdgPositioner>,
        _dhandle: &DisplayHandle,
        _data_init: &mut DataInit<'_, Self>,
    ) {
        let mut positioner = data.lock().unwrap_or_else(PoisonError::into_inner);
        match request {
            xdg_positioner::Request::SetSize { width, height } => {
                if width <= 0 || height <= 0 {
                    resource.post_error(
                        xdg_positioner::Error::InvalidInput,
                        format!("invalid positioner size {}x{}", width, height),
                    );
                    return;
                }
                positioner.set_size(width, height);
            }
            xdg_positioner::Request::SetAnchorRect { x, y, width, height } => {
                if width < 0 || height < 0 {
                    resource.post_error(
                        xdg_positioner::Error::InvalidInput,
                        format!("invalid anchor rect {}x{}", width, height),
                    );
                    return;
                }
                positioner.set_anchor_rect(Rectangle::new(x, y, width, height));
            }
            xdg_positioner::Request::SetAnchor { anchor } => {
                positioner.set_anchor(Anchor::from_wayland(enum_value(anchor)).unwrap_or_default());
            }
            xdg_positioner::Request::SetGravity { gravity } => {
                positioner.set_gravity(Anchor::from_wayland(enum_value(gravity)).unwrap_or_default());
            }
            xdg_positioner::Request::SetConstraintAdjustment { constraint_adjustment } => {
                let bits = match constraint_adjustment {
                    WEnum::Value(value) => value.bits(),
                    WEnum::Unknown(raw) => raw,
                };
                positioner.set_constraint_adjustment(bits);
            }
            xdg_positioner::Request::SetOffset { x, y } => {
                positioner.set_offset(x, y);
            }
            xdg_positioner::Request::SetReactive => {}
            xdg_positioner::Request::SetParentSize { .. } => {}
            xdg_positioner::Request::SetParentConfigure { .. } => {}
            xdg_positioner::Request::Destroy => {}
            _ => {}
        }
    }
}

// ============================================================================
// xdg_surface
// ============================================================================

impl Dispatch<xdg_surface::XdgSurface, SurfaceId> for ServerState {
    fn request(
        state: &mut Self,
        client: &Client,
        resource: &xdg_surface::XdgSurface,
        request: xdg_surface::Request,
        data: &SurfaceId,
        _dhandle: &DisplayHandle,
        data_init: &mut DataInit<'_, Self>,
    ) {
        let Some(connection) = connection_of(client) else {
            return;
        };
        let surface_id = *data;
        match request {
            xdg_surface::Request::GetToplevel { id } => {
                let toplevel = data_init.init(id, surface_id);
                match state.compositor.create_toplevel(surface_id) {
                    Ok(()) => {
                        state.resources.toplevels.insert(surface_id, toplevel);
                    }
                    Err(err) => state.protocol_error(connection, resource, err),
                }
            }
            xdg_surface::Request::GetPopup { id, parent, positioner } => {
                let popup = data_init.init(id, surface_id);
                let parent = parent.and_then(|p| p.data::<SurfaceId>().copied());
                match state
                    .compositor
                    .create_popup(surface_id, parent, positioner_snapshot(&positioner))
                {
                    Ok(()) => {
                        state.resources.popups.insert(surface_id, popup);
                    }
                    Err(err) => state.protocol_error(connection, resource, err),
                }
            }
            xdg_surface::Request::SetWindowGeometry { x, y, width, height } => {
                let geometry = Rectangle::new(x, y, width, height);
                if let Err(err) = state.compositor.set_window_geometry(surface_id, geometry) {
                    state.protocol_error(connection, resource, err);
                }
            }
            xdg_surface::Request::AckConfigure { serial } => {
                match state.compositor.ack_configure(surface_id, serial) {
                    Ok(outcome) => debug!("Surface {:?} acked {}: {:?}", surface_id, serial, outcome),
                    Err(err) => state.protocol_error(connection, resource, err),
                }
            }
            xdg_surface::Request::Destroy => {}
            _ => {}
        }
        state.deliver_events();
    }

    fn destroyed(state: &mut Self, _client: ClientId, _resource: &xdg_surface::XdgSurface, data: &SurfaceId) {
        state.resources.xdg_surfaces.remove(data);
    }
}

// ============================================================================
// xdg_toplevel
// ============================================================================

impl Dispatch<xdg_toplevel::XdgToplevel, SurfaceId> for ServerState {
    fn request(
        state: &mut Self,
        _client: &Client,
        _resource: &xdg_toplevel::XdgToplevel,
        request: xdg_toplevel::Request,
        data: &SurfaceId,
        _dhandle: &DisplayHandle,
        _data_init: &mut DataInit<'_, Self>,
    ) {
        let surface_id = *data;
        match request {
            xdg_toplevel::Request::SetParent { parent } => {
                let parent = parent.and_then(|p| p.data::<SurfaceId>().copied());
                if let Some(window) = state.compositor.windows.get_mut(surface_id) {
                    window.set_parent(parent);
                }
            }
            xdg_toplevel::Request::SetTitle { title } => {
                if let Some(window) = state.compositor.windows.get_mut(surface_id) {
                    window.set_title(title);
                }
            }
            xdg_toplevel::Request::SetAppId { app_id } => {
                if let Some(window) = state.compositor.windows.get_mut(surface_id) {
                    window.set_app_id(app_id);
                }
            }
            xdg_toplevel::Request::ShowWindowMenu { x, y, .. } => {
                if let Some(window) = state.compositor.windows.get_mut(surface_id) {
                    window.show_window_menu(x, y);
                }
            }
            // Tiled windows are placed by the layout, never by the client
            xdg_toplevel::Request::Move { .. } => {
                debug!("Ignoring interactive move of {:?}", surface_id);
            }
            xdg_toplevel::Request::Resize { .. } => {
                debug!("Ignoring interactive resize of {:?}", surface_id);
            }
            xdg_toplevel::Request::SetMaxSize { width, height } => {
                if let Some(window) = state.compositor.windows.get_mut(surface_id) {
                    window.set_max_size(width, height);
                }
            }
            xdg_toplevel::Request::SetMinSize { width, height } => {
                if let Some(window) = state.compositor.windows.get_mut(surface_id) {
                    window.set_min_size(width, height);
                }
            }
            xdg_toplevel::Request::SetMaximized => state.compositor.request_maximize(surface_id, true),
            xdg_toplevel::Request::UnsetMaximized => state.compositor.request_maximize(surface_id, false),
            xdg_toplevel::Request::SetFullscreen { .. } => state.compositor.request_fullscreen(surface_id, true),
            xdg_toplevel::Request::UnsetFullscreen => state.compositor.request_fullscreen(surface_id, false),
            xdg_toplevel::Request::SetMinimized => state.compositor.request_minimize(surface_id),
            xdg_toplevel::Request::Destroy => {}
            _ => {}
        }
        state.deliver_events();
    }

    fn destroyed(state: &mut Self, _client: ClientId, _resource: &xdg_toplevel::XdgToplevel, data: &SurfaceId) {
        info!("Toplevel {:?} destroyed", data);
        state.compositor.destroy_toplevel(*data);
        state.resources.toplevels.remove(data);
        state.deliver_events();
    }
}

// ============================================================================
// xdg_popup
// ============================================================================

impl Dispatch<xdg_popup::XdgPopup, SurfaceId> for ServerState {
    fn request(
        state: &mut Self,
        client: &Client,
        resource: &xdg_popup::XdgPopup,
        request: xdg_popup::Request,
        data: &SurfaceId,
        _dhandle: &DisplayHandle,
        _data_init: &mut DataInit<'_, Self>,
    ) {
        let Some(connection) = connection_of(client) else {
            return;
        };
        let surface_id = *data;
        match request {
            xdg_popup::Request::Grab { serial, .. } => {
                if let Err(err) = state.compositor.popup_grab(surface_id, serial) {
                    state.protocol_error(connection, resource, err);
                }
            }
            xdg_popup::Request::Reposition { positioner, token } => {
                let positioner = positioner_snapshot(&positioner);
                if let Err(err) = state.compositor.popup_reposition(surface_id, positioner, token) {
                    state.protocol_error(connection, resource, err);
                }
            }
            xdg_popup::Request::Destroy => {}
            _ => {}
        }
        state.deliver_events();
    }

    fn destroyed(state: &mut Self, _client: ClientId, _resource: &xdg_popup::XdgPopup, data: &SurfaceId) {
        state.compositor.destroy_popup(*data);
        state.resources.popups.remove(data);
        state.deliver_events();
    }
}
