//! Wayland server implementation
//!
//! This module sets up the Wayland display server, registers globals,
//! and dispatches protocol requests to the compositor core. Events the core
//! queues per connection are turned back into wire events after each
//! dispatch.

mod dispatch;
mod events;
mod globals;

use std::collections::HashMap;
use std::os::unix::io::AsFd;
use std::os::unix::net::UnixStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use calloop::generic::Generic;
use calloop::{Interest, LoopHandle, Mode, PostAction};
use log::{debug, error, info, warn};
use wayland_protocols::xdg::shell::server::{xdg_popup, xdg_surface, xdg_toplevel, xdg_wm_base};
use wayland_server::backend::{ClientData, ClientId, DisconnectReason, GlobalId};
use wayland_server::protocol::{
    wl_buffer, wl_callback, wl_compositor, wl_keyboard, wl_output, wl_pointer, wl_seat, wl_shm, wl_surface,
    wl_touch,
};
use wayland_server::{Client, Display, DisplayHandle, ListeningSocket, Resource, WEnum};

use crate::compositor::{
    BufferId, CallbackId, CompositorState, ConnectionId, ErrorObject, Output, OutputId, ProtocolError, SurfaceId,
};
use crate::config::CompositorConfig;
use crate::input::Keyboard;
use crate::protocol::{KeymapFile, ShmPools};
use crate::renderer::{FrameGate, RenderError, Renderer};

/// Per-client data attached to every wayland-server client
#[derive(Debug)]
pub struct ClientState {
    pub connection: ConnectionId,
    gone: AtomicBool,
}

impl ClientState {
    fn new(connection: ConnectionId) -> Self {
        Self {
            connection,
            gone: AtomicBool::new(false),
        }
    }
}

impl ClientData for ClientState {
    fn disconnected(&self, _client_id: ClientId, reason: DisconnectReason) {
        debug!("Client {:?} disconnected: {:?}", self.connection, reason);
        self.gone.store(true, Ordering::Release);
    }
}

/// Connection of a wayland-server client
fn connection_of(client: &Client) -> Option<ConnectionId> {
    client.get_data::<ClientState>().map(|data| data.connection)
}

/// Raw value of a wire enum argument
fn enum_value<T: Into<u32>>(value: WEnum<T>) -> u32 {
    match value {
        WEnum::Value(value) => value.into(),
        WEnum::Unknown(raw) => raw,
    }
}

/// Wire objects the core's events are delivered through
#[derive(Debug, Default)]
struct Resources {
    surfaces: HashMap<SurfaceId, wl_surface::WlSurface>,
    buffers: HashMap<BufferId, wl_buffer::WlBuffer>,
    callbacks: HashMap<CallbackId, (SurfaceId, wl_callback::WlCallback)>,
    xdg_surfaces: HashMap<SurfaceId, xdg_surface::XdgSurface>,
    toplevels: HashMap<SurfaceId, xdg_toplevel::XdgToplevel>,
    popups: HashMap<SurfaceId, xdg_popup::XdgPopup>,
    wm_bases: HashMap<ConnectionId, Vec<xdg_wm_base::XdgWmBase>>,
    pointers: HashMap<ConnectionId, Vec<wl_pointer::WlPointer>>,
    keyboards: HashMap<ConnectionId, Vec<wl_keyboard::WlKeyboard>>,
    touches: HashMap<ConnectionId, Vec<wl_touch::WlTouch>>,
    outputs: HashMap<ConnectionId, Vec<(OutputId, wl_output::WlOutput)>>,
}

impl Resources {
    fn forget_connection(&mut self, connection: ConnectionId) {
        self.wm_bases.remove(&connection);
        self.pointers.remove(&connection);
        self.keyboards.remove(&connection);
        self.touches.remove(&connection);
        self.outputs.remove(&connection);
    }
}

/// State passed to Wayland dispatch handlers
pub struct ServerState {
    /// Protocol-agnostic compositor core
    pub compositor: CompositorState,
    /// Client shm pools
    pub shm: ShmPools,
    display: DisplayHandle,
    resources: Resources,
    clients: Vec<Arc<ClientState>>,
    output_globals: HashMap<OutputId, GlobalId>,
    keymap: Option<KeymapFile>,
}

impl ServerState {
    /// Create the server state and advertise every global on `display`
    pub fn new(config: CompositorConfig, display: DisplayHandle) -> Self {
        let keymap = match KeymapFile::new(&Keyboard::default_keymap()) {
            Ok(keymap) => Some(keymap),
            Err(err) => {
                error!("Failed to create keymap file: {}", err);
                None
            }
        };

        let mut state = Self {
            compositor: CompositorState::new(config),
            shm: ShmPools::new(),
            display,
            resources: Resources::default(),
            clients: Vec::new(),
            output_globals: HashMap::new(),
            keymap,
        };
        state.register_globals();
        state
    }

    fn register_globals(&mut self) {
        let dh = &self.display;
        dh.create_global::<ServerState, wl_compositor::WlCompositor, _>(6, ());
        dh.create_global::<ServerState, wl_shm::WlShm, _>(1, ());
        dh.create_global::<ServerState, wl_seat::WlSeat, _>(9, ());
        dh.create_global::<ServerState, xdg_wm_base::XdgWmBase, _>(6, ());

        let outputs: Vec<OutputId> = self.compositor.outputs.iter().map(|(id, _)| *id).collect();
        for id in outputs {
            self.create_output_global(id);
        }

        info!("Registered Wayland globals: wl_compositor, wl_shm, wl_seat, wl_output, xdg_wm_base");
    }

    fn create_output_global(&mut self, id: OutputId) {
        let global = self.display.create_global::<ServerState, wl_output::WlOutput, _>(4, id);
        self.output_globals.insert(id, global);
    }

    /// Register a new client connected over `stream`
    pub fn insert_client(&mut self, stream: UnixStream) -> std::io::Result<ConnectionId> {
        let connection = self.compositor.connect();
        let data = Arc::new(ClientState::new(connection));
        if let Err(err) = self.display.insert_client(stream, data.clone()) {
            self.compositor.disconnect(connection);
            return Err(err);
        }
        self.clients.push(data);
        info!("Client {:?} connected", connection);
        Ok(connection)
    }

    /// Tear down clients that went away, then deliver queued events
    pub fn after_dispatch(&mut self) {
        self.reap_clients();
        self.deliver_events();
    }

    fn reap_clients(&mut self) {
        let (gone, alive): (Vec<_>, Vec<_>) = self
            .clients
            .drain(..)
            .partition(|client| client.gone.load(Ordering::Acquire));
        self.clients = alive;
        for client in gone {
            self.compositor.disconnect(client.connection);
            self.resources.forget_connection(client.connection);
            info!("Client {:?} torn down", client.connection);
        }
    }

    /// Send everything the core queued so far.
    ///
    /// Handlers call this before returning so events precede the replies to
    /// any later request, such as a wl_display.sync.
    fn deliver_events(&mut self) {
        for connection in self.compositor.connections.with_pending_events() {
            for event in self.compositor.drain_events(connection) {
                events::deliver(&mut self.resources, connection, event);
            }
        }
    }

    /// Present a frame if one is due, then deliver frame callbacks
    pub fn render(&mut self, renderer: &mut dyn Renderer, gate: &mut dyn FrameGate) -> Result<bool, RenderError> {
        let presented = self.compositor.render(renderer, gate)?;
        if presented {
            self.after_dispatch();
            self.flush_clients();
        }
        Ok(presented)
    }

    /// Hot-plug an output and advertise it
    pub fn add_output(&mut self, output: Output) -> OutputId {
        let id = self.compositor.add_output(output);
        self.create_output_global(id);
        self.after_dispatch();
        id
    }

    /// Unplug an output; surfaces on it are told before the global goes
    pub fn remove_output(&mut self, id: OutputId) -> Option<Output> {
        let output = self.compositor.remove_output(id)?;
        self.after_dispatch();
        if let Some(global) = self.output_globals.remove(&id) {
            self.display.remove_global::<ServerState>(global);
        }
        Some(output)
    }

    pub fn flush_clients(&mut self) {
        if let Err(err) = self.display.flush_clients() {
            warn!("Failed to flush clients: {}", err);
        }
    }

    /// Disconnect everyone and release all client memory
    pub fn shutdown(&mut self) {
        self.compositor.shutdown();
        self.clients.clear();
        self.resources = Resources::default();
    }

    /// Report a fatal error on the object it names, or on `fallback`.
    ///
    /// The client is killed by the wire layer; the core cleans up when the
    /// disconnect is reaped.
    fn protocol_error<R: Resource>(&self, connection: ConnectionId, fallback: &R, err: ProtocolError) {
        warn!("Protocol error from {:?}: {}", connection, err);
        let code = err.code();
        let message = err.to_string();
        let resources = &self.resources;

        let posted = match err.object() {
            ErrorObject::Surface(id) => post(resources.surfaces.get(&id), code, &message),
            ErrorObject::XdgSurface(id) => post(resources.xdg_surfaces.get(&id), code, &message),
            ErrorObject::Popup(id) => post(resources.popups.get(&id), code, &message),
            ErrorObject::Buffer(id) => post(resources.buffers.get(&id), code, &message),
            ErrorObject::WmBase => post(
                resources.wm_bases.get(&connection).and_then(|list| list.first()),
                code,
                &message,
            ),
            ErrorObject::Pointer => post(
                resources.pointers.get(&connection).and_then(|list| list.first()),
                code,
                &message,
            ),
        };
        if !posted {
            fallback.post_error(code, message);
        }
    }
}

fn post<R: Resource>(resource: Option<&R>, code: u32, message: &str) -> bool {
    match resource {
        Some(resource) if resource.is_alive() => {
            resource.post_error(code, message.to_string());
            true
        }
        _ => false,
    }
}

/// The Wayland server: display plus listening socket
pub struct WaylandServer {
    /// The Wayland display
    display: Display<ServerState>,
    /// Listening socket for client connections
    socket: ListeningSocket,
    /// Socket name for WAYLAND_DISPLAY
    socket_name: String,
}

impl WaylandServer {
    /// Create the display and bind its socket
    pub fn new(config: &CompositorConfig) -> anyhow::Result<Self> {
        info!("Creating Wayland display server");

        let display: Display<ServerState> = Display::new()?;
        let socket = match &config.socket_name {
            Some(name) => ListeningSocket::bind(name)?,
            None => ListeningSocket::bind_auto("wayland", 1..33)?,
        };
        let socket_name = socket
            .socket_name()
            .and_then(|n| n.to_str().map(String::from))
            .unwrap_or_else(|| "wayland-1".to_string());

        info!("Wayland socket: {}", socket_name);

        Ok(Self {
            display,
            socket,
            socket_name,
        })
    }

    /// Get the socket name (for WAYLAND_DISPLAY)
    pub fn socket_name(&self) -> &str {
        &self.socket_name
    }

    /// Get a handle to the display for registering globals
    pub fn display_handle(&self) -> DisplayHandle {
        self.display.handle()
    }

    /// Insert the listening socket and the display into a calloop loop
    pub fn insert_into_loop(mut self, handle: &LoopHandle<'static, ServerState>) -> anyhow::Result<()> {
        handle
            .insert_source(
                Generic::new(self.socket.as_fd().try_clone_to_owned()?, Interest::READ, Mode::Level),
                {
                    let socket = self.socket;
                    move |_, _, state: &mut ServerState| {
                        while let Some(stream) = socket.accept()? {
                            if let Err(e) = state.insert_client(stream) {
                                error!("Failed to insert client: {}", e);
                            }
                        }
                        Ok(PostAction::Continue)
                    }
                },
            )
            .map_err(|err| err.error)?;

        handle
            .insert_source(
                Generic::new(
                    self.display.backend().poll_fd().try_clone_to_owned()?,
                    Interest::READ,
                    Mode::Level,
                ),
                {
                    let mut display = self.display;
                    move |_, _, state: &mut ServerState| {
                        display.dispatch_clients(state)?;
                        state.after_dispatch();
                        display.flush_clients()?;
                        Ok(PostAction::Continue)
                    }
                },
            )
            .map_err(|err| err.error)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use crate::backend::EventLoop;

    #[test]
    fn test_server_accepts_clients_from_loop() {
        let runtime = tempfile::tempdir().unwrap();
        std::env::set_var("XDG_RUNTIME_DIR", runtime.path());
        let config = CompositorConfig {
            socket_name: Some("winland-loop-test".to_string()),
            ..CompositorConfig::default()
        };

        let server = WaylandServer::new(&config).unwrap();
        assert_eq!(server.socket_name(), "winland-loop-test");
        let mut event_loop = EventLoop::new().unwrap();
        let mut state = ServerState::new(config, server.display_handle());
        server.insert_into_loop(&event_loop.handle()).unwrap();

        let _client = UnixStream::connect(runtime.path().join("winland-loop-test")).unwrap();
        event_loop.dispatch(Some(Duration::from_millis(100)), &mut state).unwrap();

        assert_eq!(state.compositor.connections.len(), 1);
    }
}
