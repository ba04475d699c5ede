//! Wayland protocol dispatch implementations
//!
//! Implements the Dispatch trait for each core Wayland protocol object.
//! Handlers translate requests into calls on the compositor core and
//! report [`ProtocolError`](crate::compositor::ProtocolError)s on the wire.

use std::os::fd::OwnedFd;
use std::sync::{Mutex, PoisonError};

use log::{debug, warn};
use wayland_server::backend::ClientId;
use wayland_server::protocol::{
    wl_buffer, wl_callback, wl_compositor, wl_keyboard, wl_output, wl_pointer, wl_region, wl_seat, wl_shm,
    wl_shm_pool, wl_surface, wl_touch,
};
use wayland_server::{Client, DataInit, Dispatch, DisplayHandle, New, Resource};

use super::{connection_of, enum_value, ServerState};
use crate::compositor::{BufferError, BufferId, CallbackId, OutputId, Rectangle, SurfaceId};
use crate::protocol::{Region, ShmPoolId};

// ============================================================================
// wl_compositor
// ============================================================================

impl Dispatch<wl_compositor::WlCompositor, ()> for ServerState {
    fn request(
        state: &mut Self,
        client: &Client,
        _resource: &wl_compositor::WlCompositor,
        request: wl_compositor::Request,
        _data: &(),
        _dhandle: &DisplayHandle,
        data_init: &mut DataInit<'_, Self>,
    ) {
        match request {
            wl_compositor::Request::CreateSurface { id } => {
                let Some(connection) = connection_of(client) else {
                    return;
                };
                let surface_id = state.compositor.create_surface(connection);
                debug!("Created wl_surface {:?}", surface_id);
                let surface = data_init.init(id, surface_id);
                state.resources.surfaces.insert(surface_id, surface);
            }
            wl_compositor::Request::CreateRegion { id } => {
                data_init.init(id, Mutex::new(Region::new()));
            }
            _ => {}
        }
    }
}

// ============================================================================
// wl_region
// ============================================================================

fn region_snapshot(region: Option<wl_region::WlRegion>) -> Option<Region> {
    region.and_then(|r| {
        r.data::<Mutex<Region>>()
            .map(|data| data.lock().unwrap_or_else(PoisonError::into_inner).clone())
    })
}

impl Dispatch<wl_region::WlRegion, Mutex<Region>> for ServerState {
    fn request(
        _state: &mut Self,
        _client: &Client,
        _resource: &wl_region::WlRegion,
        request: wl_region::Request,
        data: &Mutex<Region>,
        _dhandle: &DisplayHandle,
        _data_init: &mut DataInit<'_, Self>,
    ) {
        let mut region = data.lock().unwrap_or_else(PoisonError::into_inner);
        match request {
            wl_region::Request::Add { x, y, width, height } => region.add(Rectangle::new(x, y, width, height)),
            wl_region::Request::Subtract { x, y, width, height } => {
                region.subtract(Rectangle::new(x, y, width, height))
            }
            wl_region::Request::Destroy => {}
            _ => {}
        }
    }
}

// ============================================================================
// wl_surface
// ============================================================================

impl Dispatch<wl_surface::WlSurface, SurfaceId> for ServerState {
    fn request(
        state: &mut Self,
        client: &Client,
        resource: &wl_surface::WlSurface,
        request: wl_surface::Request,
        data: &SurfaceId,
        _dhandle: &DisplayHandle,
        data_init: &mut DataInit<'_, Self>,
    ) {
        let Some(connection) = connection_of(client) else {
            return;
        };
        let surface_id = *data;

        // Requests that go through the core's validation
        match request {
            wl_surface::Request::Commit => {
                if let Err(err) = state.compositor.surface_commit(surface_id) {
                    state.protocol_error(connection, resource, err);
                }
            }
            wl_surface::Request::SetBufferScale { scale } => {
                if let Err(err) = state.compositor.set_buffer_scale(surface_id, scale) {
                    state.protocol_error(connection, resource, err);
                }
            }
            wl_surface::Request::SetBufferTransform { transform } => {
                if let Err(err) = state.compositor.set_buffer_transform(surface_id, enum_value(transform)) {
                    state.protocol_error(connection, resource, err);
                }
            }
            wl_surface::Request::Frame { callback } => {
                let callback_id = CallbackId::new();
                let wl_callback = data_init.init(callback, ());
                state.resources.callbacks.insert(callback_id, (surface_id, wl_callback));
                if let Some(surface) = state.compositor.surfaces.get_mut(surface_id) {
                    surface.frame(callback_id);
                }
            }
            request => {
                let Some(surface) = state.compositor.surfaces.get_mut(surface_id) else {
                    warn!("Surface {:?} not found", surface_id);
                    return;
                };
                match request {
                    wl_surface::Request::Attach { buffer, x, y } => {
                        let buffer = buffer.and_then(|b| b.data::<BufferId>().copied());
                        surface.attach(buffer, x, y);
                    }
                    wl_surface::Request::Offset { x, y } => surface.set_offset(x, y),
                    wl_surface::Request::Damage { x, y, width, height } => {
                        surface.damage(Rectangle::new(x, y, width, height))
                    }
                    wl_surface::Request::DamageBuffer { x, y, width, height } => {
                        surface.damage_buffer(Rectangle::new(x, y, width, height))
                    }
                    wl_surface::Request::SetOpaqueRegion { region } => {
                        surface.set_opaque_region(region_snapshot(region))
                    }
                    wl_surface::Request::SetInputRegion { region } => {
                        surface.set_input_region(region_snapshot(region))
                    }
                    wl_surface::Request::Destroy => {}
                    _ => {}
                }
            }
        }
        state.deliver_events();
    }

    fn destroyed(state: &mut Self, _client: ClientId, _resource: &wl_surface::WlSurface, data: &SurfaceId) {
        state.compositor.destroy_surface(*data);
        state.resources.surfaces.remove(data);
        state.resources.callbacks.retain(|_, (surface, _)| surface != data);
        state.deliver_events();
    }
}

// ============================================================================
// wl_callback
// ============================================================================

impl Dispatch<wl_callback::WlCallback, ()> for ServerState {
    fn request(
        _state: &mut Self,
        _client: &Client,
        _resource: &wl_callback::WlCallback,
        _request: wl_callback::Request,
        _data: &(),
        _dhandle: &DisplayHandle,
        _data_init: &mut DataInit<'_, Self>,
    ) {
        // wl_callback has no requests
    }
}

// ============================================================================
// wl_shm
// ============================================================================

impl Dispatch<wl_shm::WlShm, ()> for ServerState {
    fn request(
        state: &mut Self,
        _client: &Client,
        _resource: &wl_shm::WlShm,
        request: wl_shm::Request,
        _data: &(),
        _dhandle: &DisplayHandle,
        data_init: &mut DataInit<'_, Self>,
    ) {
        match request {
            wl_shm::Request::CreatePool { id, fd, size } => create_pool(state, data_init, id, fd, size),
            wl_shm::Request::Release => {}
            _ => {}
        }
    }
}

fn create_pool(
    state: &mut ServerState,
    data_init: &mut DataInit<'_, ServerState>,
    id: New<wl_shm_pool::WlShmPool>,
    fd: OwnedFd,
    size: i32,
) {
    if size <= 0 {
        data_init.post_error(id, wl_shm::Error::InvalidStride, format!("invalid pool size {}", size));
        return;
    }
    match state.shm.create_pool(fd, size as usize) {
        Ok(pool) => {
            data_init.init(id, pool);
        }
        Err(err) => data_init.post_error(id, wl_shm::Error::InvalidFd, err.to_string()),
    }
}

// ============================================================================
// wl_shm_pool
// ============================================================================

impl Dispatch<wl_shm_pool::WlShmPool, ShmPoolId> for ServerState {
    fn request(
        state: &mut Self,
        client: &Client,
        resource: &wl_shm_pool::WlShmPool,
        request: wl_shm_pool::Request,
        data: &ShmPoolId,
        _dhandle: &DisplayHandle,
        data_init: &mut DataInit<'_, Self>,
    ) {
        match request {
            wl_shm_pool::Request::CreateBuffer {
                id,
                offset,
                width,
                height,
                stride,
                format,
            } => {
                let Some(connection) = connection_of(client) else {
                    return;
                };
                if offset < 0 || width <= 0 || height <= 0 || stride <= 0 {
                    data_init.post_error(
                        id,
                        wl_shm::Error::InvalidStride,
                        format!("invalid buffer {}x{} stride {} offset {}", width, height, stride, offset),
                    );
                    return;
                }
                let handle = match state.shm.handle(*data, offset as usize) {
                    Ok(handle) => handle,
                    Err(err) => {
                        data_init.post_error(id, wl_shm::Error::InvalidFd, err.to_string());
                        return;
                    }
                };
                let imported = state.compositor.import_buffer(
                    connection,
                    handle,
                    width as u32,
                    height as u32,
                    stride as u32,
                    enum_value(format),
                );
                match imported {
                    Ok(buffer_id) => {
                        let buffer = data_init.init(id, buffer_id);
                        state.resources.buffers.insert(buffer_id, buffer);
                    }
                    Err(err @ BufferError::UnsupportedFormat(_)) => {
                        data_init.post_error(id, wl_shm::Error::InvalidFormat, err.to_string())
                    }
                    Err(err) => data_init.post_error(id, wl_shm::Error::InvalidStride, err.to_string()),
                }
            }
            wl_shm_pool::Request::Resize { size } => {
                if size < 0 {
                    resource.post_error(wl_shm::Error::InvalidStride, format!("invalid pool size {}", size));
                    return;
                }
                if let Err(err) = state.shm.resize_pool(*data, size as usize) {
                    resource.post_error(wl_shm::Error::InvalidFd, err.to_string());
                }
            }
            wl_shm_pool::Request::Destroy => {}
            _ => {}
        }
    }

    fn destroyed(state: &mut Self, _client: ClientId, _resource: &wl_shm_pool::WlShmPool, data: &ShmPoolId) {
        state.shm.destroy_pool(*data);
    }
}

// ============================================================================
// wl_buffer
// ============================================================================

impl Dispatch<wl_buffer::WlBuffer, BufferId> for ServerState {
    fn request(
        _state: &mut Self,
        _client: &Client,
        _resource: &wl_buffer::WlBuffer,
        request: wl_buffer::Request,
        _data: &BufferId,
        _dhandle: &DisplayHandle,
        _data_init: &mut DataInit<'_, Self>,
    ) {
        match request {
            wl_buffer::Request::Destroy => {}
            _ => {}
        }
    }

    fn destroyed(state: &mut Self, _client: ClientId, _resource: &wl_buffer::WlBuffer, data: &BufferId) {
        // Disconnect cleanup may already have dropped it
        if let Err(err) = state.compositor.destroy_buffer(*data) {
            debug!("Buffer {:?} destroyed: {}", data, err);
        }
        state.resources.buffers.remove(data);
    }
}

// ============================================================================
// wl_seat
// ============================================================================

impl Dispatch<wl_seat::WlSeat, ()> for ServerState {
    fn request(
        state: &mut Self,
        client: &Client,
        _resource: &wl_seat::WlSeat,
        request: wl_seat::Request,
        _data: &(),
        _dhandle: &DisplayHandle,
        data_init: &mut DataInit<'_, Self>,
    ) {
        let Some(connection) = connection_of(client) else {
            return;
        };
        match request {
            wl_seat::Request::GetPointer { id } => {
                let pointer = data_init.init(id, ());
                state.resources.pointers.entry(connection).or_default().push(pointer);
            }
            wl_seat::Request::GetKeyboard { id } => {
                let keyboard = data_init.init(id, ());
                state.init_keyboard(&keyboard);
                state.resources.keyboards.entry(connection).or_default().push(keyboard);
            }
            wl_seat::Request::GetTouch { id } => {
                let touch = data_init.init(id, ());
                state.resources.touches.entry(connection).or_default().push(touch);
            }
            wl_seat::Request::Release => {}
            _ => {}
        }
    }
}

// ============================================================================
// wl_pointer
// ============================================================================

impl Dispatch<wl_pointer::WlPointer, ()> for ServerState {
    fn request(
        state: &mut Self,
        client: &Client,
        resource: &wl_pointer::WlPointer,
        request: wl_pointer::Request,
        _data: &(),
        _dhandle: &DisplayHandle,
        _data_init: &mut DataInit<'_, Self>,
    ) {
        match request {
            wl_pointer::Request::SetCursor {
                serial,
                surface,
                hotspot_x,
                hotspot_y,
            } => {
                let Some(connection) = connection_of(client) else {
                    return;
                };
                let surface = surface.and_then(|s| s.data::<SurfaceId>().copied());
                if let Err(err) = state
                    .compositor
                    .set_cursor(connection, serial, surface, (hotspot_x, hotspot_y))
                {
                    state.protocol_error(connection, resource, err);
                }
                state.deliver_events();
            }
            wl_pointer::Request::Release => {}
            _ => {}
        }
    }

    fn destroyed(state: &mut Self, _client: ClientId, resource: &wl_pointer::WlPointer, _data: &()) {
        for list in state.resources.pointers.values_mut() {
            list.retain(|pointer| pointer != resource);
        }
    }
}

// ============================================================================
// wl_keyboard
// ============================================================================

impl Dispatch<wl_keyboard::WlKeyboard, ()> for ServerState {
    fn request(
        _state: &mut Self,
        _client: &Client,
        _resource: &wl_keyboard::WlKeyboard,
        request: wl_keyboard::Request,
        _data: &(),
        _dhandle: &DisplayHandle,
        _data_init: &mut DataInit<'_, Self>,
    ) {
        match request {
            wl_keyboard::Request::Release => {}
            _ => {}
        }
    }

    fn destroyed(state: &mut Self, _client: ClientId, resource: &wl_keyboard::WlKeyboard, _data: &()) {
        for list in state.resources.keyboards.values_mut() {
            list.retain(|keyboard| keyboard != resource);
        }
    }
}

// ============================================================================
// wl_touch
// ============================================================================

impl Dispatch<wl_touch::WlTouch, ()> for ServerState {
    fn request(
        _state: &mut Self,
        _client: &Client,
        _resource: &wl_touch::WlTouch,
        request: wl_touch::Request,
        _data: &(),
        _dhandle: &DisplayHandle,
        _data_init: &mut DataInit<'_, Self>,
    ) {
        match request {
            wl_touch::Request::Release => {}
            _ => {}
        }
    }

    fn destroyed(state: &mut Self, _client: ClientId, resource: &wl_touch::WlTouch, _data: &()) {
        for list in state.resources.touches.values_mut() {
            list.retain(|touch| touch != resource);
        }
    }
}

// ============================================================================
// wl_output
// ============================================================================

impl Dispatch<wl_output::WlOutput, OutputId> for ServerState {
    fn request(
        _state: &mut Self,
        _client: &Client,
        _resource: &wl_output::WlOutput,
        request: wl_output::Request,
        _data: &OutputId,
        _dhandle: &DisplayHandle,
        _data_init: &mut DataInit<'_, Self>,
    ) {
        match request {
            wl_output::Request::Release => {}
            _ => {}
        }
    }

    fn destroyed(
        state: &mut Self,
        _client: ClientId,
        resource: &wl_output::WlOutput,
        _data: &OutputId,
    ) {
        for list in state.resources.outputs.values_mut() {
            list.retain(|(_, output)| output != resource);
        }
    }
}
