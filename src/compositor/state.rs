//! Global compositor state
//!
//! [`CompositorState`] is the context object every front-end drives: the
//! wire protocol layer, input producers and the render loop all call into
//! it. It owns every registry and coordinates commit, re-layout and frame
//! assembly. Effects on clients are queued per connection as
//! [`ClientEvent`]s.

use std::time::Instant;

use log::{debug, error, info, warn};

use crate::compositor::buffer::{BufferError, BufferId, BufferRegistry, ExternalHandle, ReleaseOutcome};
use crate::compositor::configure::AckOutcome;
use crate::compositor::connection::{ConnectionId, ConnectionRegistry};
use crate::compositor::error::ProtocolError;
use crate::compositor::event::ClientEvent;
use crate::compositor::frame::{ElementKind, FrameElement, FrameList};
use crate::compositor::geometry::Rectangle;
use crate::compositor::output::{Output, OutputId, OutputManager};
use crate::compositor::popup::{PopupConfigure, PopupManager};
use crate::compositor::surface::{BufferTransform, CommitOutcome, PendingChange, SurfaceId, SurfaceManager, SurfaceRole};
use crate::compositor::window::{ToplevelStates, WindowManager};
use crate::config::{BindingAction, CompositorConfig};
use crate::input::{InputEvent, RoutedEvent, Seat, SeatEvent, KEY_ESC};
use crate::layout::{LayoutCommand, LayoutEngine, LayoutError, LayoutSlot};
use crate::protocol::shell::XdgPositioner;
use crate::renderer::{FrameGate, RenderError, Renderer};

/// The global compositor state
///
/// Holds everything needed to run the compositor: connections, surfaces,
/// buffers, shell roles, outputs, the seat and the layout engine.
#[derive(Debug)]
pub struct CompositorState {
    pub config: CompositorConfig,

    /// Connected clients and their outgoing event queues
    pub connections: ConnectionRegistry,

    /// Surface manager - tracks all wl_surfaces
    pub surfaces: SurfaceManager,

    /// Buffer registry - client pixel memory and reference counts
    pub buffers: BufferRegistry,

    /// Toplevel windows, keyed by surface
    pub windows: WindowManager,

    /// Popups, keyed by surface
    pub popups: PopupManager,

    /// Output manager - tracks displays
    pub outputs: OutputManager,

    /// Input seat - manages keyboard, pointer, touch
    pub seat: Seat,

    /// Tiling layout engine
    pub layout: LayoutEngine,

    /// Last presented frame
    frame: FrameList,

    /// Something visible changed since the last frame
    needs_frame: bool,

    /// Serial counter for shell configures and pings
    serial: u32,

    running: bool,

    /// Origin for frame callback timestamps
    started: Instant,
}

impl CompositorState {
    /// Create the state with one output built from `config`
    pub fn new(config: CompositorConfig) -> Self {
        let mut output = Output::new(config.output.name.clone(), config.output.mode());
        output.make = "winland".to_string();
        output.model = "headless".to_string();
        output.scale = config.output.scale.max(1);
        output.physical_size = config.output.physical_size;
        let area = output.logical_geometry();

        let mut outputs = OutputManager::new();
        outputs.add(output);

        Self {
            connections: ConnectionRegistry::new(),
            surfaces: SurfaceManager::new(),
            buffers: BufferRegistry::new(),
            windows: WindowManager::new(),
            popups: PopupManager::new(),
            outputs,
            seat: Seat::new(config.seat_name.clone(), config.repeat_rate, config.repeat_delay),
            layout: LayoutEngine::new(config.tiling.clone(), area),
            frame: FrameList::new(area),
            needs_frame: true,
            serial: 0,
            running: true,
            started: Instant::now(),
            config,
        }
    }

    /// Get the next serial for shell configures and pings
    pub fn next_serial(&mut self) -> u32 {
        self.serial = self.serial.wrapping_add(1).max(1);
        self.serial
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Ask the loop to stop after the current iteration
    pub fn stop(&mut self) {
        self.running = false;
    }

    /// Whether a new frame should be assembled
    pub fn needs_frame(&self) -> bool {
        self.needs_frame
    }

    pub fn schedule_frame(&mut self) {
        self.needs_frame = true;
    }

    // ========================================================================
    // Connections
    // ========================================================================

    /// Register a new client connection
    pub fn connect(&mut self) -> ConnectionId {
        self.connections.create()
    }

    /// Tear down a connection and everything it owns
    pub fn disconnect(&mut self, id: ConnectionId) {
        let Some(connection) = self.connections.remove(id) else {
            return;
        };
        let surfaces: Vec<SurfaceId> = connection.surfaces().collect();
        for surface in surfaces {
            self.destroy_surface(surface);
        }
        let released = self.buffers.release_client_buffers(id);
        debug!("Released {} buffers of {:?}", released, id);
    }

    /// Take the events queued for a client
    pub fn drain_events(&mut self, id: ConnectionId) -> Vec<ClientEvent> {
        self.connections.drain_events(id)
    }

    /// Send a liveness ping; returns its serial
    pub fn ping(&mut self, client: ConnectionId) -> u32 {
        let serial = self.next_serial();
        self.connections.ping_sent(client, serial);
        self.connections.send(client, ClientEvent::Ping { serial });
        serial
    }

    /// Handle a pong; unknown serials are ignored
    pub fn pong(&mut self, client: ConnectionId, serial: u32) -> bool {
        let matched = self.connections.pong(client, serial);
        if !matched {
            debug!("Unexpected pong {} from {:?}", serial, client);
        }
        matched
    }

    // ========================================================================
    // Buffers
    // ========================================================================

    /// Register client pixel memory
    pub fn import_buffer(
        &mut self,
        owner: ConnectionId,
        handle: ExternalHandle,
        width: u32,
        height: u32,
        stride: u32,
        format: u32,
    ) -> Result<BufferId, BufferError> {
        self.buffers.import(owner, handle, width, height, stride, format)
    }

    /// The client destroyed its buffer object
    pub fn destroy_buffer(&mut self, buffer: BufferId) -> Result<(), BufferError> {
        let outcome = self.buffers.client_release(buffer)?;
        debug!("Client released buffer {:?}: {:?}", buffer, outcome);
        Ok(())
    }

    fn buffer_released(&mut self, buffer: BufferId, outcome: ReleaseOutcome) {
        if let ReleaseOutcome::Idle { owner } = outcome {
            self.connections.send(owner, ClientEvent::BufferRelease { buffer });
        }
    }

    // ========================================================================
    // Surfaces
    // ========================================================================

    /// Create a surface owned by `owner`
    pub fn create_surface(&mut self, owner: ConnectionId) -> SurfaceId {
        let id = self.surfaces.create_surface(owner);
        self.connections.add_surface(owner, id);
        id
    }

    /// Set the pending buffer scale
    pub fn set_buffer_scale(&mut self, id: SurfaceId, scale: i32) -> Result<(), ProtocolError> {
        if scale <= 0 {
            return Err(ProtocolError::InvalidScale { surface: id, scale });
        }
        let surface = self.surfaces.get_mut(id).ok_or(ProtocolError::UnknownSurface(id))?;
        surface.set_scale(scale);
        Ok(())
    }

    /// Set the pending buffer transform from its wire value
    pub fn set_buffer_transform(&mut self, id: SurfaceId, transform: u32) -> Result<(), ProtocolError> {
        let value = BufferTransform::from_wayland(transform)
            .ok_or(ProtocolError::InvalidTransform { surface: id, transform })?;
        let surface = self.surfaces.get_mut(id).ok_or(ProtocolError::UnknownSurface(id))?;
        surface.set_transform(value);
        Ok(())
    }

    /// Promote a surface's pending state and react to what changed
    pub fn surface_commit(&mut self, id: SurfaceId) -> Result<(), ProtocolError> {
        let surface = self.surfaces.get(id).ok_or(ProtocolError::UnknownSurface(id))?;
        let role = surface.role();
        if matches!(surface.pending.buffer, PendingChange::Set(Some(_))) {
            let configured = match role {
                SurfaceRole::Toplevel => self.windows.get(id).map(|w| w.configure.is_configured()),
                SurfaceRole::Popup => self.popups.get(id).map(|p| p.configure.is_configured()),
                SurfaceRole::Cursor | SurfaceRole::None => None,
            };
            if configured == Some(false) {
                return Err(ProtocolError::UnconfiguredBuffer(id));
            }
        }

        let surface = self.surfaces.get_mut(id).ok_or(ProtocolError::UnknownSurface(id))?;
        let outcome = surface
            .commit(&mut self.buffers)
            .map_err(|source| ProtocolError::Buffer { surface: id, source })?;
        let wants_frame = !surface.current.frame_callbacks.is_empty();

        if let Some((buffer, release)) = outcome.released {
            self.buffer_released(buffer, release);
        }
        match role {
            SurfaceRole::Toplevel => {
                self.commit_toplevel(id, &outcome);
                self.settle_window(id);
            }
            SurfaceRole::Popup => self.commit_popup(id, &outcome),
            SurfaceRole::Cursor | SurfaceRole::None => {}
        }
        if outcome.damaged || outcome.mapped || outcome.unmapped || wants_frame {
            self.needs_frame = true;
        }
        Ok(())
    }

    /// Destroy a surface, cascading to its role and buffer reference
    pub fn destroy_surface(&mut self, id: SurfaceId) {
        // Forget focus first so the destroyed surface is sent nothing
        self.seat.surface_destroyed(id);
        if self.windows.contains(id) {
            self.destroy_toplevel(id);
        }
        if self.popups.contains(id) {
            self.destroy_popup(id);
        }

        let Some(mut surface) = self.surfaces.remove(id) else {
            return;
        };
        if let Some((buffer, outcome)) = surface.release_buffer(&mut self.buffers) {
            self.buffer_released(buffer, outcome);
        }
        self.connections.remove_surface(surface.owner, id);
        self.needs_frame = true;
        debug!("Destroyed surface {:?}", id);
    }

    /// Global position of a surface's origin, if it is placed
    pub fn surface_origin(&self, id: SurfaceId) -> Option<(i32, i32)> {
        let offset = |geometry: Option<Rectangle>| geometry.map_or((0, 0), |g| (g.x, g.y));

        if let Some(window) = self.windows.get(id) {
            let slot = window.placement(self.layout.slot_of(id)?);
            let (ox, oy) = offset(window.geometry);
            return Some((slot.geometry.x.saturating_sub(ox), slot.geometry.y.saturating_sub(oy)));
        }
        if let Some(popup) = self.popups.get(id) {
            let (px, py) = self.window_geometry_origin(popup.parent)?;
            let placement = popup.placement();
            let (ox, oy) = offset(popup.geometry);
            return Some((
                px.saturating_add(placement.x).saturating_sub(ox),
                py.saturating_add(placement.y).saturating_sub(oy),
            ));
        }
        let pointer = self.seat.pointer();
        if pointer.cursor() == Some(id) {
            let (x, y) = pointer.position();
            let (hx, hy) = pointer.cursor_hotspot();
            return Some((x.floor() as i32 - hx, y.floor() as i32 - hy));
        }
        None
    }

    /// Global position of a role surface's window geometry
    fn window_geometry_origin(&self, id: SurfaceId) -> Option<(i32, i32)> {
        let (x, y) = self.surface_origin(id)?;
        let geometry = self
            .windows
            .get(id)
            .and_then(|w| w.geometry)
            .or_else(|| self.popups.get(id).and_then(|p| p.geometry));
        Some(match geometry {
            Some(g) => (x.saturating_add(g.x), y.saturating_add(g.y)),
            None => (x, y),
        })
    }

    fn to_local(&self, id: SurfaceId, x: f64, y: f64) -> Option<(f64, f64)> {
        let (ox, oy) = self.surface_origin(id)?;
        Some((x - ox as f64, y - oy as f64))
    }

    // ========================================================================
    // Shell roles
    // ========================================================================

    /// Give a surface the toplevel role
    pub fn create_toplevel(&mut self, id: SurfaceId) -> Result<(), ProtocolError> {
        let surface = self.surfaces.get_mut(id).ok_or(ProtocolError::UnknownSurface(id))?;
        surface
            .set_role(SurfaceRole::Toplevel)
            .map_err(|existing| ProtocolError::RoleAlreadyAssigned {
                surface: id,
                existing,
                requested: SurfaceRole::Toplevel,
            })?;
        self.windows.create_window(id);
        info!("Surface {:?} is now a toplevel", id);
        Ok(())
    }

    /// The toplevel role object was destroyed; the surface stays alive
    pub fn destroy_toplevel(&mut self, id: SurfaceId) {
        let Some(window) = self.windows.remove(id) else {
            return;
        };
        let dismissed = self.popups.dismiss(id);
        self.send_popup_done(dismissed);
        if let Some(surface) = self.surfaces.get_mut(id) {
            surface.clear_role_object();
        }
        if window.mapped {
            self.remove_from_layout(id);
            self.sync_layout();
        }
    }

    /// Give a surface the popup role
    pub fn create_popup(
        &mut self,
        id: SurfaceId,
        parent: Option<SurfaceId>,
        positioner: XdgPositioner,
    ) -> Result<(), ProtocolError> {
        let parent = parent
            .filter(|p| self.windows.contains(*p) || self.popups.contains(*p))
            .ok_or(ProtocolError::InvalidPopupParent(id))?;
        if !positioner.is_complete() {
            return Err(ProtocolError::InvalidPositioner(id));
        }
        let surface = self.surfaces.get_mut(id).ok_or(ProtocolError::UnknownSurface(id))?;
        surface
            .set_role(SurfaceRole::Popup)
            .map_err(|existing| ProtocolError::RoleAlreadyAssigned {
                surface: id,
                existing,
                requested: SurfaceRole::Popup,
            })?;
        self.popups.create_popup(id, parent, positioner);
        Ok(())
    }

    /// Take an explicit grab for a popup
    pub fn popup_grab(&mut self, id: SurfaceId, serial: u32) -> Result<(), ProtocolError> {
        let last_press = self.seat.last_button_press_serial();
        self.popups
            .grab(id, serial, last_press)
            .map_err(|source| ProtocolError::InvalidGrab { surface: id, source })?;
        self.sync_keyboard_focus();
        Ok(())
    }

    /// Place a popup again with a new positioner
    pub fn popup_reposition(
        &mut self,
        id: SurfaceId,
        positioner: XdgPositioner,
        token: u32,
    ) -> Result<(), ProtocolError> {
        if !positioner.is_complete() {
            return Err(ProtocolError::InvalidPositioner(id));
        }
        let popup = self.popups.get_mut(id).ok_or(ProtocolError::UnknownSurface(id))?;
        popup.positioner = positioner;
        self.send_popup_configure(id, Some(token));
        Ok(())
    }

    /// The popup role object was destroyed
    pub fn destroy_popup(&mut self, id: SurfaceId) {
        if !self.popups.contains(id) {
            return;
        }
        let mut dismissed = self.popups.dismiss(id);
        dismissed.retain(|s| *s != id);
        self.send_popup_done(dismissed);
        self.popups.remove(id);
        if let Some(surface) = self.surfaces.get_mut(id) {
            surface.clear_role_object();
        }
        self.needs_frame = true;
        self.sync_keyboard_focus();
    }

    /// Handle xdg_surface.ack_configure
    pub fn ack_configure(&mut self, id: SurfaceId, serial: u32) -> Result<AckOutcome, ProtocolError> {
        let result = if let Some(window) = self.windows.get_mut(id) {
            window.configure.ack(serial)
        } else if let Some(popup) = self.popups.get_mut(id) {
            popup.configure.ack(serial)
        } else {
            return Err(ProtocolError::UnknownSurface(id));
        };
        result.map_err(|source| ProtocolError::InvalidConfigureSerial { surface: id, source })
    }

    /// Handle xdg_surface.set_window_geometry; applied on the next commit
    pub fn set_window_geometry(&mut self, id: SurfaceId, geometry: Rectangle) -> Result<(), ProtocolError> {
        if geometry.width <= 0 || geometry.height <= 0 {
            return Err(ProtocolError::InvalidWindowGeometry(id));
        }
        if let Some(window) = self.windows.get_mut(id) {
            window.pending_geometry = Some(geometry);
        } else if let Some(popup) = self.popups.get_mut(id) {
            popup.pending_geometry = Some(geometry);
        } else {
            return Err(ProtocolError::UnknownSurface(id));
        }
        Ok(())
    }

    pub fn request_fullscreen(&mut self, id: SurfaceId, fullscreen: bool) {
        let Some(window) = self.windows.get_mut(id) else {
            return;
        };
        window.request_fullscreen(fullscreen);
        window.schedule_configure();
        if window.mapped {
            if let Err(err) = self.layout.set_fullscreen(id, fullscreen) {
                warn!("Fullscreen request for {:?} failed: {}", id, err);
            }
            self.sync_layout();
        } else {
            self.flush_configures();
        }
    }

    /// Tiled windows already fill their cell; only the state flag changes
    pub fn request_maximize(&mut self, id: SurfaceId, maximized: bool) {
        let Some(window) = self.windows.get_mut(id) else {
            return;
        };
        window.request_maximize(maximized);
        window.schedule_configure();
        self.flush_configures();
    }

    pub fn request_minimize(&mut self, id: SurfaceId) {
        if let Some(window) = self.windows.get_mut(id) {
            window.request_minimize(true);
            debug!("Toplevel {:?} asked to be minimized", id);
        }
    }

    /// Ask a toplevel to close
    pub fn request_close(&mut self, id: SurfaceId) {
        if !self.windows.contains(id) {
            return;
        }
        if let Some(owner) = self.surfaces.owner(id) {
            self.connections.send(owner, ClientEvent::Close { surface: id });
        }
    }

    fn commit_toplevel(&mut self, id: SurfaceId, outcome: &CommitOutcome) {
        let Some(window) = self.windows.get_mut(id) else {
            return;
        };
        if let Some(geometry) = window.pending_geometry.take() {
            window.geometry = Some(geometry);
        }
        if let Some(applied) = window.commit_configure() {
            debug!("Toplevel {:?} committed {:?}", id, applied);
            self.needs_frame = true;
        }

        if !window.initial_commit {
            // Empty initial configure: the client picks its size until mapped
            window.initial_commit = true;
            window.schedule_configure();
            self.flush_configures();
            return;
        }

        if outcome.mapped && !window.mapped {
            window.mapped = true;
            let transient = window.parent.is_some();
            let fullscreen = window.requested.contains(ToplevelStates::FULLSCREEN);
            let inserted = if transient {
                self.layout.insert_floating(id, None)
            } else {
                self.layout.insert(id)
            };
            if let Err(err) = inserted {
                warn!("Could not place {:?}: {}", id, err);
            }
            if fullscreen {
                if let Err(err) = self.layout.set_fullscreen(id, true) {
                    warn!("Could not make {:?} fullscreen: {}", id, err);
                }
            }
            self.enter_primary_output(id);
            info!("Toplevel {:?} mapped", id);
            self.sync_layout();
        } else if outcome.unmapped && window.mapped {
            window.reset();
            self.unmap_window(id);
            info!("Toplevel {:?} unmapped", id);
        }
    }

    fn unmap_window(&mut self, id: SurfaceId) {
        self.remove_from_layout(id);
        let dismissed = self.popups.dismiss(id);
        self.send_popup_done(dismissed);
        if self.seat.pointer().focus() == Some(id) {
            self.seat.set_pointer_focus(None);
        }
        self.sync_layout();
    }

    fn remove_from_layout(&mut self, id: SurfaceId) {
        if let Err(err) = self.layout.remove(id) {
            debug!("Surface {:?} was not in the layout: {}", id, err);
        }
    }

    fn commit_popup(&mut self, id: SurfaceId, outcome: &CommitOutcome) {
        let Some(popup) = self.popups.get_mut(id) else {
            return;
        };
        if let Some(geometry) = popup.pending_geometry.take() {
            popup.geometry = Some(geometry);
        }
        popup.configure.commit();
        if popup.dismissed {
            return;
        }

        if popup.configure.latest_sent().is_none() {
            self.send_popup_configure(id, None);
            return;
        }
        if outcome.mapped {
            popup.mapped = true;
            self.enter_primary_output(id);
            debug!("Popup {:?} mapped", id);
        } else if outcome.unmapped {
            popup.mapped = false;
            let mut dismissed = self.popups.dismiss(id);
            dismissed.retain(|s| *s != id);
            self.send_popup_done(dismissed);
        }
    }

    fn send_popup_configure(&mut self, id: SurfaceId, reposition_token: Option<u32>) {
        let Some(popup) = self.popups.get(id) else {
            return;
        };
        let (px, py) = self.window_geometry_origin(popup.parent).unwrap_or((0, 0));
        let bounds = self.layout.output_area().translate(px.saturating_neg(), py.saturating_neg());
        let geometry = popup.positioner.place(bounds);

        let serial = self.next_serial();
        let configure = PopupConfigure {
            geometry,
            reposition_token,
        };
        if let Some(popup) = self.popups.get_mut(id) {
            popup.configure.send(serial, configure);
        }
        if let Some(owner) = self.surfaces.owner(id) {
            self.connections.send(
                owner,
                ClientEvent::PopupConfigure {
                    surface: id,
                    serial,
                    configure,
                },
            );
        }
    }

    fn send_popup_done(&mut self, dismissed: Vec<SurfaceId>) {
        if dismissed.is_empty() {
            return;
        }
        for surface in dismissed {
            if let Some(owner) = self.surfaces.owner(surface) {
                self.connections.send(owner, ClientEvent::PopupDone { surface });
            }
        }
        self.needs_frame = true;
    }

    /// Send configures for every window whose target changed
    pub fn flush_configures(&mut self) {
        let mut ids: Vec<SurfaceId> = self
            .windows
            .iter()
            .filter(|(_, w)| w.initial_commit && w.needs_configure())
            .map(|(id, _)| *id)
            .collect();
        ids.sort();

        for id in ids {
            let serial = self.next_serial();
            let Some(owner) = self.surfaces.owner(id) else {
                continue;
            };
            let Some(window) = self.windows.get_mut(id) else {
                continue;
            };
            let configure = window.configure_sent(serial);
            self.connections.send(
                owner,
                ClientEvent::ToplevelConfigure {
                    surface: id,
                    serial,
                    configure,
                },
            );
        }
    }

    // ========================================================================
    // Layout
    // ========================================================================

    /// Run a layout command and reconfigure affected windows
    pub fn layout_command(&mut self, command: LayoutCommand) -> Result<(), LayoutError> {
        self.layout.execute(command)?;
        self.sync_layout();
        Ok(())
    }

    /// Propagate layout geometry and focus to windows and the seat
    fn sync_layout(&mut self) {
        let focused = self.layout.focused_surface();
        let mut ids: Vec<SurfaceId> = self
            .windows
            .iter()
            .filter(|(_, w)| w.mapped)
            .map(|(id, _)| *id)
            .collect();
        ids.sort();

        for id in ids {
            let Some(slot) = self.layout.slot_of(id) else {
                continue;
            };
            let Some(window) = self.windows.get_mut(id) else {
                continue;
            };
            window.set_target_size(slot.geometry.width, slot.geometry.height);
            window.set_target_state(ToplevelStates::TILED, !slot.floating && !slot.fullscreen);
            window.set_target_state(ToplevelStates::FULLSCREEN, slot.fullscreen);
            window.set_target_state(ToplevelStates::ACTIVATED, focused == Some(id));
            window.target_slot = Some(slot);
        }

        self.flush_configures();
        let mapped: Vec<SurfaceId> = self
            .windows
            .iter()
            .filter(|(_, w)| w.mapped)
            .map(|(id, _)| *id)
            .collect();
        for id in mapped {
            self.settle_window(id);
        }
        self.sync_keyboard_focus();
        self.needs_frame = true;
    }

    /// Windows with nothing outstanding follow the layout directly
    fn settle_window(&mut self, id: SurfaceId) {
        let live = self.layout.slot_of(id);
        if let Some(window) = self.windows.get_mut(id) {
            window.settle(live);
        }
    }

    /// Where a window is drawn: the layout cell the client last
    /// committed to while a configure is outstanding
    pub fn window_placement(&self, id: SurfaceId) -> Option<LayoutSlot> {
        let live = self.layout.slot_of(id)?;
        Some(self.windows.get(id)?.placement(live))
    }

    /// Keyboard focus goes to the topmost grabbing popup, else to the
    /// layout's focused window
    fn sync_keyboard_focus(&mut self) {
        let target = self
            .popups
            .topmost_grab()
            .or_else(|| self.layout.focused_surface());
        self.seat.set_keyboard_focus(target);
        self.route_seat_events();
    }

    // ========================================================================
    // Outputs
    // ========================================================================

    /// Add an output; the first one becomes primary and hosts the layout
    pub fn add_output(&mut self, output: Output) -> OutputId {
        let id = self.outputs.add(output);
        self.apply_primary_area();
        id
    }

    /// Remove an output, moving its surfaces to the primary output
    pub fn remove_output(&mut self, id: OutputId) -> Option<Output> {
        let removed = self.outputs.remove(id)?;
        let primary = self.outputs.primary_id();

        let mut affected: Vec<(SurfaceId, ConnectionId)> = self
            .surfaces
            .iter()
            .filter(|(_, s)| s.outputs.contains(&id))
            .map(|(sid, s)| (*sid, s.owner))
            .collect();
        affected.sort();
        for (surface, owner) in affected {
            self.connections.send(owner, ClientEvent::SurfaceLeave { surface, output: id });
            if let Some(entry) = self.surfaces.get_mut(surface) {
                entry.outputs.retain(|o| *o != id);
            }
            if let Some(primary) = primary {
                self.enter_output(surface, primary);
            }
        }

        self.apply_primary_area();
        Some(removed)
    }

    /// Change an output; a primary output change re-arranges the layout
    pub fn update_output(&mut self, id: OutputId, f: impl FnOnce(&mut Output)) -> bool {
        let changed = self.outputs.update(id, f);
        if changed && self.outputs.primary_id() == Some(id) {
            self.apply_primary_area();
        }
        changed
    }

    fn apply_primary_area(&mut self) {
        let Some(area) = self.outputs.primary().map(Output::logical_geometry) else {
            return;
        };
        if area != self.layout.output_area() {
            self.layout.set_output_area(area);
            self.sync_layout();
        }
    }

    fn enter_output(&mut self, surface: SurfaceId, output: OutputId) {
        let Some(entry) = self.surfaces.get_mut(surface) else {
            return;
        };
        if entry.outputs.contains(&output) {
            return;
        }
        entry.outputs.push(output);
        let owner = entry.owner;
        self.connections.send(owner, ClientEvent::SurfaceEnter { surface, output });
    }

    fn enter_primary_output(&mut self, surface: SurfaceId) {
        if let Some(primary) = self.outputs.primary_id() {
            self.enter_output(surface, primary);
        }
    }

    // ========================================================================
    // Input
    // ========================================================================

    /// Apply one normalized input event
    pub fn handle_input(&mut self, event: InputEvent) {
        match event {
            InputEvent::PointerMotion { time, x, y } => self.pointer_motion(time, x, y),
            InputEvent::PointerButton { time, button, pressed } => self.pointer_button(time, button, pressed),
            InputEvent::PointerAxis { time, axis, value } => self.seat.pointer_axis(time, axis, value),
            InputEvent::Key { time, key, pressed } => self.keyboard_key(time, key, pressed),
            InputEvent::Modifiers(state) => self.seat.modifiers(state),
            InputEvent::TouchDown { time, id, x, y } => self.touch_down(time, id, x, y),
            InputEvent::TouchMotion { time, id, x, y } => {
                let local = self
                    .seat
                    .touch()
                    .point(id)
                    .and_then(|point| self.to_local(point.surface, x, y));
                if let Some((lx, ly)) = local {
                    self.seat.touch_motion(time, id, lx, ly);
                }
            }
            InputEvent::TouchUp { time, id } => self.seat.touch_up(time, id),
            InputEvent::TouchCancel => self.seat.touch_cancel(),
        }
        self.route_seat_events();
    }

    fn pointer_motion(&mut self, time: u32, x: f64, y: f64) {
        let area = self.layout.output_area();
        let x = x.max(area.x as f64).min((area.right() - 1).max(area.x) as f64);
        let y = y.max(area.y as f64).min((area.bottom() - 1).max(area.y) as f64);

        // Pressed buttons keep the implicit grab on the current focus
        if !self.seat.pointer().has_button_pressed() {
            let target = self.frame.surface_at(x, y);
            self.seat.set_pointer_focus(target);
        }
        let local = self
            .seat
            .pointer()
            .focus()
            .and_then(|surface| self.to_local(surface, x, y));
        self.seat.pointer_motion(time, (x, y), local);
        if self.seat.pointer().cursor().is_some() {
            self.needs_frame = true;
        }
    }

    fn pointer_button(&mut self, time: u32, button: u32, pressed: bool) {
        if pressed {
            let (x, y) = self.seat.pointer().position();
            let hit = self.frame.surface_at(x, y).map(|(surface, _, _)| surface);
            self.press_at(hit);
        }
        self.seat.pointer_button(time, button, pressed);
    }

    fn touch_down(&mut self, time: u32, id: i32, x: f64, y: f64) {
        let hit = self.frame.surface_at(x, y);
        self.press_at(hit.map(|(surface, _, _)| surface));
        if let Some((surface, lx, ly)) = hit {
            self.seat.touch_down(time, id, surface, lx, ly);
        }
    }

    /// Popup dismissal and click-to-focus for a press on `hit`
    fn press_at(&mut self, hit: Option<SurfaceId>) {
        if let Some(bottom) = self.popups.grab_stack().first().copied() {
            let inside = hit.is_some_and(|s| s == bottom || self.popups.descendants(bottom).contains(&s));
            if !inside {
                let dismissed = self.popups.dismiss_grabs();
                self.send_popup_done(dismissed);
                self.sync_keyboard_focus();
            }
        }

        if let Some(surface) = hit.filter(|s| self.layout.contains(*s)) {
            if self.layout.focused_surface() != Some(surface) && self.layout.focus(surface).is_ok() {
                self.sync_layout();
            }
        }
    }

    fn keyboard_key(&mut self, time: u32, key: u32, pressed: bool) {
        if pressed {
            let active = self.seat.keyboard().modifiers().active();
            if let Some(action) = self.config.binding(active, key) {
                // Consumed; the seat never sees the press, so it drops the release
                self.run_binding(action);
                return;
            }
        }
        if pressed && key == KEY_ESC {
            if let Some(top) = self.popups.topmost_grab() {
                // Escape closes the grab and is not forwarded
                let dismissed = self.popups.dismiss(top);
                self.send_popup_done(dismissed);
                self.sync_keyboard_focus();
                return;
            }
        }
        self.seat.keyboard_key(time, key, pressed);
    }

    fn run_binding(&mut self, action: BindingAction) {
        debug!("Key binding: {:?}", action);
        match action {
            BindingAction::Layout(command) => {
                if let Err(err) = self.layout_command(command) {
                    debug!("{:?} did nothing: {}", command, err);
                }
            }
            BindingAction::CloseFocused => {
                if let Some(id) = self.layout.focused_surface() {
                    self.request_close(id);
                }
            }
            BindingAction::Quit => {
                info!("Quit requested from the keyboard");
                self.stop();
            }
        }
    }

    /// Handle wl_pointer.set_cursor from `client`
    pub fn set_cursor(
        &mut self,
        client: ConnectionId,
        serial: u32,
        surface: Option<SurfaceId>,
        hotspot: (i32, i32),
    ) -> Result<(), ProtocolError> {
        let focus_owner = self
            .seat
            .pointer()
            .focus()
            .and_then(|focus| self.surfaces.owner(focus));
        if focus_owner != Some(client) {
            debug!("Ignoring set_cursor from unfocused client {:?}", client);
            return Ok(());
        }
        // A rejected request must not leave the role behind
        if !self.seat.is_current_enter(serial) {
            debug!("Ignoring set_cursor with stale serial {}", serial);
            return Ok(());
        }
        if let Some(id) = surface {
            let entry = self.surfaces.get_mut(id).ok_or(ProtocolError::UnknownSurface(id))?;
            entry
                .set_role(SurfaceRole::Cursor)
                .map_err(|existing| ProtocolError::RoleAlreadyAssigned {
                    surface: id,
                    existing,
                    requested: SurfaceRole::Cursor,
                })?;
        }
        if self.seat.set_cursor(serial, surface, hotspot) {
            self.needs_frame = true;
        }
        Ok(())
    }

    fn route_seat_events(&mut self) {
        for RoutedEvent { surface, event } in self.seat.take_events() {
            let Some(owner) = self.surfaces.owner(surface) else {
                continue;
            };
            let event = match event {
                SeatEvent::Pointer(event) => ClientEvent::Pointer(event),
                SeatEvent::Keyboard(event) => ClientEvent::Keyboard(event),
                SeatEvent::Touch(event) => ClientEvent::Touch(event),
            };
            self.connections.send(owner, event);
        }
    }

    // ========================================================================
    // Frames
    // ========================================================================

    /// The last presented frame list
    pub fn current_frame_list(&self) -> &FrameList {
        &self.frame
    }

    /// Assemble and present a frame if one is due and the gate allows it.
    ///
    /// Returns whether a frame was presented.
    pub fn render(&mut self, renderer: &mut dyn Renderer, gate: &mut dyn FrameGate) -> Result<bool, RenderError> {
        if !self.needs_frame || !gate.request_frame_now() {
            return Ok(false);
        }

        let mut frame = self.build_frame();
        for element in frame.elements_mut() {
            match self.buffers.request_texture_binding(element.buffer, &mut *renderer) {
                Ok(texture) => element.texture = Some(texture),
                Err(err) => warn!("Skipping surface {:?}: {}", element.surface, err),
            }
        }
        for texture in self.buffers.take_retired_textures() {
            renderer.release_texture(texture);
        }
        renderer.present(&frame)?;

        let time = self.started.elapsed().as_millis() as u32;
        let shown: Vec<SurfaceId> = frame.iter().map(|e| e.surface).collect();
        for id in shown {
            let Some(surface) = self.surfaces.get_mut(id) else {
                continue;
            };
            let owner = surface.owner;
            for callback in surface.take_frame_callbacks() {
                self.connections.send(owner, ClientEvent::FrameDone { callback, time });
            }
        }

        self.frame = frame;
        self.needs_frame = false;
        Ok(true)
    }

    fn build_frame(&mut self) -> FrameList {
        let mut frame = FrameList::new(self.layout.output_area());

        let placements: Vec<LayoutSlot> = self
            .layout
            .slots()
            .into_iter()
            .filter_map(|live| Some(self.windows.get(live.surface)?.placement(live)))
            .collect();
        // Windows stay uncovered until the fullscreen client commits
        let covered = placements.iter().any(|p| p.fullscreen);

        let mut windows = Vec::new();
        for slot in placements {
            if !slot.fullscreen && (!slot.visible || covered) {
                continue;
            }
            let kind = if slot.fullscreen {
                ElementKind::Fullscreen
            } else if slot.floating {
                ElementKind::Floating
            } else {
                ElementKind::Tiled
            };
            if let Some(mut element) = self.element_for(slot.surface, kind) {
                element.border = slot.border;
                element.title_bar = slot.title_bar;
                windows.push(element);
            }
        }
        windows.sort_by_key(|e| e.kind);
        let roots: Vec<SurfaceId> = windows.iter().map(|e| e.surface).collect();
        for element in windows {
            frame.push(element);
        }

        for popup in self.popups.visible_in_order() {
            if !roots.contains(&self.popups.root_of(popup)) {
                continue;
            }
            if let Some(element) = self.element_for(popup, ElementKind::Popup) {
                frame.push(element);
            }
        }

        let pointer = self.seat.pointer();
        if let (Some(cursor), Some(_)) = (pointer.cursor(), pointer.focus()) {
            if let Some(element) = self.element_for(cursor, ElementKind::Cursor) {
                frame.push(element);
            }
        }
        frame
    }

    fn element_for(&mut self, id: SurfaceId, kind: ElementKind) -> Option<FrameElement> {
        let (x, y) = self.surface_origin(id)?;
        let surface = self.surfaces.get_mut(id)?;
        let buffer = surface.buffer()?;
        let (width, height) = surface.current.size;
        let mut element = FrameElement::new(id, buffer, Rectangle::new(x, y, width, height), kind);
        element.damage = surface.take_damage();
        element.input_region = surface.current.input_region.clone();
        Some(element)
    }

    // ========================================================================
    // Shutdown
    // ========================================================================

    /// Destroy every connection; no buffer reference survives
    pub fn shutdown(&mut self) {
        self.running = false;
        for id in self.connections.ids() {
            self.disconnect(id);
        }
        let leaked = self.buffers.live_references();
        if leaked != 0 {
            error!("{} buffer references survived teardown", leaked);
        }
        debug_assert_eq!(leaked, 0, "buffer references survived teardown");
        info!("Compositor state torn down");
    }
}

impl Default for CompositorState {
    fn default() -> Self {
        Self::new(CompositorConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compositor::surface::CallbackId;
    use crate::compositor::window::ToplevelConfigure;
    use crate::compositor::OutputMode;
    use crate::config::{OutputConfig, TilingOptions};
    use crate::input::{KeyboardEvent, ModifierState, PointerEvent, MOD_SUPER};
    use crate::protocol::shell::{Anchor, Gravity};
    use crate::renderer::{AlwaysRender, HeadlessRenderer};

    /// XRGB8888 wire code
    const XRGB: u32 = 1;

    fn config() -> CompositorConfig {
        CompositorConfig {
            output: OutputConfig {
                width: 1200,
                height: 800,
                ..OutputConfig::default()
            },
            tiling: TilingOptions {
                gap_size: 0,
                bar_height: 0,
                border_width: 0,
                ..TilingOptions::default()
            },
            ..CompositorConfig::default()
        }
    }

    fn import(state: &mut CompositorState, client: ConnectionId, width: u32, height: u32) -> BufferId {
        let bytes = vec![0u8; (width * height * 4) as usize];
        state
            .import_buffer(client, ExternalHandle::from_bytes(bytes), width, height, width * 4, XRGB)
            .unwrap()
    }

    fn toplevel_configures(state: &mut CompositorState, client: ConnectionId) -> Vec<(u32, ToplevelConfigure)> {
        state
            .drain_events(client)
            .into_iter()
            .filter_map(|e| match e {
                ClientEvent::ToplevelConfigure { serial, configure, .. } => Some((serial, configure)),
                _ => None,
            })
            .collect()
    }

    /// Run the initial configure handshake and map with a buffer
    fn map_toplevel(state: &mut CompositorState, client: ConnectionId) -> (SurfaceId, BufferId) {
        let surface = state.create_surface(client);
        state.create_toplevel(surface).unwrap();
        state.surface_commit(surface).unwrap();
        let (serial, configure) = *toplevel_configures(state, client).last().unwrap();
        assert_eq!(configure.size, (0, 0));
        state.ack_configure(surface, serial).unwrap();

        let buffer = import(state, client, 100, 100);
        state.surfaces.get_mut(surface).unwrap().attach(Some(buffer), 0, 0);
        state.surface_commit(surface).unwrap();
        (surface, buffer)
    }

    fn popup_positioner() -> XdgPositioner {
        let mut positioner = XdgPositioner::new();
        positioner.set_size(50, 50);
        positioner.set_anchor_rect(Rectangle::new(10, 10, 1, 1));
        positioner.set_anchor(Anchor::BottomRight);
        positioner.set_gravity(Gravity::BottomRight);
        positioner
    }

    #[test]
    fn test_three_toplevels_tile_into_columns() {
        let mut state = CompositorState::new(config());
        let client = state.connect();
        let surfaces: Vec<SurfaceId> = (0..3).map(|_| map_toplevel(&mut state, client).0).collect();

        let columns: Vec<Rectangle> = surfaces
            .iter()
            .map(|s| state.layout.slot_of(*s).unwrap().geometry)
            .collect();
        assert_eq!(
            columns,
            vec![
                Rectangle::new(0, 0, 400, 800),
                Rectangle::new(400, 0, 400, 800),
                Rectangle::new(800, 0, 400, 800),
            ]
        );
        for surface in &surfaces {
            let window = state.windows.get(*surface).unwrap();
            assert_eq!(window.target.size, (400, 800));
            assert!(window.target.states.contains(ToplevelStates::TILED));
        }
        let focused = state.windows.get(surfaces[2]).unwrap();
        assert!(focused.target.states.contains(ToplevelStates::ACTIVATED));
        assert_eq!(state.seat.keyboard().focus(), Some(surfaces[2]));
    }

    #[test]
    fn test_buffer_before_ack_is_protocol_error() {
        let mut state = CompositorState::new(config());
        let client = state.connect();
        let surface = state.create_surface(client);
        state.create_toplevel(surface).unwrap();
        let buffer = import(&mut state, client, 10, 10);
        state.surfaces.get_mut(surface).unwrap().attach(Some(buffer), 0, 0);

        let err = state.surface_commit(surface).unwrap_err();
        assert_eq!(err, ProtocolError::UnconfiguredBuffer(surface));
        assert_eq!(state.buffers.info(buffer).unwrap().references, 0);
    }

    #[test]
    fn test_second_role_is_rejected() {
        let mut state = CompositorState::new(config());
        let client = state.connect();
        let (parent, _) = map_toplevel(&mut state, client);
        let surface = state.create_surface(client);
        state.create_toplevel(surface).unwrap();

        let err = state
            .create_popup(surface, Some(parent), popup_positioner())
            .unwrap_err();
        assert!(matches!(err, ProtocolError::RoleAlreadyAssigned { .. }));
    }

    #[test]
    fn test_geometry_waits_for_newest_ack() {
        let mut state = CompositorState::new(config());
        let a = state.connect();
        let b = state.connect();
        let (first, _) = map_toplevel(&mut state, a);
        map_toplevel(&mut state, b);
        let (serial, _) = *toplevel_configures(&mut state, a).last().unwrap();
        state.ack_configure(first, serial).unwrap();
        state.surface_commit(first).unwrap();
        let settled = state.window_placement(first).unwrap().geometry;
        assert_eq!(settled, Rectangle::new(0, 0, 600, 800));

        state.layout_command(LayoutCommand::IncreaseSplitRatio).unwrap();
        state.layout_command(LayoutCommand::IncreaseSplitRatio).unwrap();
        let sent = toplevel_configures(&mut state, a);
        assert_eq!(sent.len(), 2);
        let (older, newer) = (sent[0].0, sent[1].0);

        assert_eq!(state.ack_configure(first, older).unwrap(), AckOutcome::Superseded);
        state.surface_commit(first).unwrap();
        assert_eq!(state.window_placement(first).unwrap().geometry, settled);
        assert_ne!(state.layout.slot_of(first).unwrap().geometry, settled);

        assert_eq!(state.ack_configure(first, newer).unwrap(), AckOutcome::Applied);
        state.surface_commit(first).unwrap();
        assert_eq!(state.window_placement(first), state.layout.slot_of(first));
        assert_eq!(
            state.window_placement(first).unwrap().geometry,
            Rectangle::new(0, 0, 720, 800)
        );
    }

    #[test]
    fn test_fullscreen_waits_for_ack() {
        let mut state = CompositorState::new(config());
        let a = state.connect();
        let b = state.connect();
        let (first, _) = map_toplevel(&mut state, a);
        let (second, _) = map_toplevel(&mut state, b);
        let mut renderer = HeadlessRenderer::new();
        let kinds = |state: &CompositorState| -> Vec<(SurfaceId, ElementKind)> {
            state.current_frame_list().iter().map(|e| (e.surface, e.kind)).collect()
        };

        state.drain_events(a);
        state.request_fullscreen(first, true);
        let (serial, configure) = *toplevel_configures(&mut state, a).last().unwrap();
        assert!(configure.states.contains(ToplevelStates::FULLSCREEN));
        assert_eq!(configure.size, (1200, 800));

        state.render(&mut renderer, &mut AlwaysRender).unwrap();
        assert_eq!(
            kinds(&state),
            vec![(first, ElementKind::Tiled), (second, ElementKind::Tiled)]
        );

        state.ack_configure(first, serial).unwrap();
        state.surface_commit(first).unwrap();
        assert!(state.render(&mut renderer, &mut AlwaysRender).unwrap());
        assert_eq!(kinds(&state), vec![(first, ElementKind::Fullscreen)]);
    }

    #[test]
    fn test_forged_ack_is_rejected() {
        let mut state = CompositorState::new(config());
        let client = state.connect();
        let (surface, _) = map_toplevel(&mut state, client);
        let err = state.ack_configure(surface, 9999).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidConfigureSerial { .. }));
    }

    #[test]
    fn test_released_buffer_destroyed_on_swap() {
        let mut state = CompositorState::new(config());
        let client = state.connect();
        let (surface, a) = map_toplevel(&mut state, client);
        assert_eq!(state.buffers.info(a).unwrap().references, 1);

        state.destroy_buffer(a).unwrap();
        assert!(state.buffers.contains(a));

        let b = import(&mut state, client, 100, 100);
        state.surfaces.get_mut(surface).unwrap().attach(Some(b), 0, 0);
        state.surface_commit(surface).unwrap();
        assert!(!state.buffers.contains(a));
        assert_eq!(state.buffers.info(b).unwrap().references, 1);
    }

    #[test]
    fn test_swapped_buffer_is_released_to_client() {
        let mut state = CompositorState::new(config());
        let client = state.connect();
        let (surface, a) = map_toplevel(&mut state, client);
        state.drain_events(client);

        let b = import(&mut state, client, 100, 100);
        state.surfaces.get_mut(surface).unwrap().attach(Some(b), 0, 0);
        state.surface_commit(surface).unwrap();
        let events = state.drain_events(client);
        assert!(events.contains(&ClientEvent::BufferRelease { buffer: a }));
        assert!(state.buffers.contains(a));
    }

    #[test]
    fn test_null_attach_unmaps_and_retiles() {
        let mut state = CompositorState::new(config());
        let client = state.connect();
        let (first, _) = map_toplevel(&mut state, client);
        let (second, _) = map_toplevel(&mut state, client);

        state.surfaces.get_mut(second).unwrap().attach(None, 0, 0);
        state.surface_commit(second).unwrap();
        assert!(!state.layout.contains(second));
        assert!(!state.windows.get(second).unwrap().initial_commit);
        assert_eq!(
            state.layout.slot_of(first).unwrap().geometry,
            Rectangle::new(0, 0, 1200, 800)
        );
    }

    #[test]
    fn test_disconnect_cascades() {
        let mut state = CompositorState::new(config());
        let keep = state.connect();
        let gone = state.connect();
        let (kept, _) = map_toplevel(&mut state, keep);
        map_toplevel(&mut state, gone);
        map_toplevel(&mut state, gone);

        state.disconnect(gone);
        assert_eq!(state.layout.len(), 1);
        assert_eq!(state.surfaces.len(), 1);
        assert_eq!(state.buffers.len(), 1);
        assert_eq!(state.seat.keyboard().focus(), Some(kept));
        assert_eq!(state.layout.slot_of(kept).unwrap().geometry, Rectangle::new(0, 0, 1200, 800));
    }

    #[test]
    fn test_focus_change_sends_leave_then_enter() {
        let mut state = CompositorState::new(config());
        let a = state.connect();
        let b = state.connect();
        let (first, _) = map_toplevel(&mut state, a);
        let (second, _) = map_toplevel(&mut state, b);
        state.drain_events(a);
        state.drain_events(b);

        state.layout_command(LayoutCommand::FocusPrev).unwrap();
        assert_eq!(state.seat.keyboard().focus(), Some(first));

        let left = state.drain_events(b);
        assert!(left
            .iter()
            .any(|e| matches!(e, ClientEvent::Keyboard(KeyboardEvent::Leave { surface, .. }) if *surface == second)));
        let entered = state.drain_events(a);
        assert!(entered
            .iter()
            .any(|e| matches!(e, ClientEvent::Keyboard(KeyboardEvent::Enter { surface, .. }) if *surface == first)));
    }

    #[test]
    fn test_render_presents_and_fires_callbacks() {
        let mut state = CompositorState::new(config());
        let client = state.connect();
        let (surface, buffer) = map_toplevel(&mut state, client);
        let callback = CallbackId::new();
        state.surfaces.get_mut(surface).unwrap().frame(callback);
        state.surface_commit(surface).unwrap();
        state.drain_events(client);

        let mut renderer = HeadlessRenderer::new();
        assert!(state.render(&mut renderer, &mut AlwaysRender).unwrap());
        assert_eq!(state.current_frame_list().snapshot(), vec![(Rectangle::new(0, 0, 100, 100), buffer)]);
        assert_eq!(renderer.frame_count(), 1);
        assert!(state
            .drain_events(client)
            .iter()
            .any(|e| matches!(e, ClientEvent::FrameDone { callback: c, .. } if *c == callback)));

        // Nothing changed: no new frame
        assert!(!state.render(&mut renderer, &mut AlwaysRender).unwrap());
        assert_eq!(renderer.upload_count(), 1);
    }

    #[test]
    fn test_frame_gate_defers_frame() {
        struct Never;
        impl FrameGate for Never {
            fn request_frame_now(&mut self) -> bool {
                false
            }
        }

        let mut state = CompositorState::new(config());
        let client = state.connect();
        map_toplevel(&mut state, client);
        let mut renderer = HeadlessRenderer::new();
        assert!(!state.render(&mut renderer, &mut Never).unwrap());
        assert!(state.needs_frame());
        assert_eq!(renderer.frame_count(), 0);
    }

    #[test]
    fn test_click_focuses_window() {
        let mut state = CompositorState::new(config());
        let client = state.connect();
        let (first, _) = map_toplevel(&mut state, client);
        let (second, _) = map_toplevel(&mut state, client);
        state.render(&mut HeadlessRenderer::new(), &mut AlwaysRender).unwrap();
        assert_eq!(state.seat.keyboard().focus(), Some(second));

        state.handle_input(InputEvent::PointerMotion { time: 1, x: 10.0, y: 10.0 });
        assert_eq!(state.seat.pointer().focus(), Some(first));
        state.handle_input(InputEvent::PointerButton { time: 2, button: 0x110, pressed: true });
        assert_eq!(state.seat.keyboard().focus(), Some(first));
        assert_eq!(state.layout.focused_surface(), Some(first));

        let events = state.drain_events(client);
        assert!(events
            .iter()
            .any(|e| matches!(e, ClientEvent::Pointer(PointerEvent::Button { .. }))));
    }

    fn grabbed_popup(state: &mut CompositorState, client: ConnectionId) -> SurfaceId {
        let (parent, _) = map_toplevel(state, client);
        state.render(&mut HeadlessRenderer::new(), &mut AlwaysRender).unwrap();
        state.handle_input(InputEvent::PointerMotion { time: 1, x: 5.0, y: 5.0 });
        state.handle_input(InputEvent::PointerButton { time: 2, button: 0x110, pressed: true });
        state.handle_input(InputEvent::PointerButton { time: 3, button: 0x110, pressed: false });
        let serial = state.seat.last_button_press_serial().unwrap();

        let popup = state.create_surface(client);
        state.create_popup(popup, Some(parent), popup_positioner()).unwrap();
        state.popup_grab(popup, serial).unwrap();
        state.surface_commit(popup).unwrap();
        assert_eq!(state.seat.keyboard().focus(), Some(popup));
        state.drain_events(client);
        popup
    }

    #[test]
    fn test_popup_configure_is_parent_relative() {
        let mut state = CompositorState::new(config());
        let client = state.connect();
        let (parent, _) = map_toplevel(&mut state, client);
        state.drain_events(client);
        let popup = state.create_surface(client);
        state.create_popup(popup, Some(parent), popup_positioner()).unwrap();
        state.surface_commit(popup).unwrap();

        let configure = state
            .drain_events(client)
            .into_iter()
            .find_map(|e| match e {
                ClientEvent::PopupConfigure { configure, .. } => Some(configure),
                _ => None,
            })
            .unwrap();
        assert_eq!(configure.geometry, Rectangle::new(11, 11, 50, 50));
    }

    #[test]
    fn test_grab_with_stale_serial_fails() {
        let mut state = CompositorState::new(config());
        let client = state.connect();
        let (parent, _) = map_toplevel(&mut state, client);
        let popup = state.create_surface(client);
        state.create_popup(popup, Some(parent), popup_positioner()).unwrap();
        let err = state.popup_grab(popup, 42).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidGrab { .. }));
    }

    #[test]
    fn test_outside_click_dismisses_grab() {
        let mut state = CompositorState::new(config());
        let client = state.connect();
        let popup = grabbed_popup(&mut state, client);

        state.handle_input(InputEvent::PointerButton { time: 4, button: 0x110, pressed: true });
        let events = state.drain_events(client);
        assert!(events.contains(&ClientEvent::PopupDone { surface: popup }));
        assert!(!state.popups.has_grab());
        assert_ne!(state.seat.keyboard().focus(), Some(popup));
    }

    #[test]
    fn test_escape_dismisses_grab() {
        let mut state = CompositorState::new(config());
        let client = state.connect();
        let popup = grabbed_popup(&mut state, client);

        state.handle_input(InputEvent::Key { time: 4, key: KEY_ESC, pressed: true });
        let events = state.drain_events(client);
        assert!(events.contains(&ClientEvent::PopupDone { surface: popup }));
        assert!(!events
            .iter()
            .any(|e| matches!(e, ClientEvent::Keyboard(KeyboardEvent::Key { .. }))));
    }

    #[test]
    fn test_super_bindings_are_consumed() {
        const KEY_LEFT: u32 = 105;
        const KEY_Q: u32 = 16;

        let mut state = CompositorState::new(config());
        let client = state.connect();
        let surfaces: Vec<SurfaceId> = (0..3).map(|_| map_toplevel(&mut state, client).0).collect();
        state.drain_events(client);

        state.handle_input(InputEvent::Modifiers(ModifierState {
            depressed: MOD_SUPER,
            ..ModifierState::default()
        }));
        state.handle_input(InputEvent::Key { time: 1, key: KEY_LEFT, pressed: true });
        state.handle_input(InputEvent::Key { time: 2, key: KEY_LEFT, pressed: false });
        assert_eq!(state.layout.focused_surface(), Some(surfaces[1]));
        assert_eq!(state.seat.keyboard().focus(), Some(surfaces[1]));

        state.handle_input(InputEvent::Key { time: 3, key: KEY_Q, pressed: true });
        let events = state.drain_events(client);
        assert!(events.contains(&ClientEvent::Close { surface: surfaces[1] }));
        assert!(!events
            .iter()
            .any(|e| matches!(e, ClientEvent::Keyboard(KeyboardEvent::Key { .. }))));

        // Without Super the key goes to the client
        state.handle_input(InputEvent::Modifiers(ModifierState::default()));
        state.handle_input(InputEvent::Key { time: 4, key: KEY_Q, pressed: true });
        assert!(state
            .drain_events(client)
            .iter()
            .any(|e| matches!(e, ClientEvent::Keyboard(KeyboardEvent::Key { key, .. }) if *key == KEY_Q)));
    }

    #[test]
    fn test_set_cursor_requires_pointer_focus() {
        let mut state = CompositorState::new(config());
        let client = state.connect();
        let other = state.connect();
        map_toplevel(&mut state, client);
        state.render(&mut HeadlessRenderer::new(), &mut AlwaysRender).unwrap();
        state.handle_input(InputEvent::PointerMotion { time: 1, x: 5.0, y: 5.0 });
        let serial = state.seat.pointer().enter_serial().unwrap();

        let stranger = state.create_surface(other);
        state.set_cursor(other, serial, Some(stranger), (0, 0)).unwrap();
        assert_eq!(state.seat.pointer().cursor(), None);

        let cursor = state.create_surface(client);
        state.set_cursor(client, serial.wrapping_sub(1), Some(cursor), (1, 1)).unwrap();
        assert_eq!(state.seat.pointer().cursor(), None);
        assert_eq!(state.surfaces.get(cursor).unwrap().role(), SurfaceRole::None);

        state.set_cursor(client, serial, Some(cursor), (1, 1)).unwrap();
        assert_eq!(state.seat.pointer().cursor(), Some(cursor));
        assert_eq!(state.surface_origin(cursor), Some((4, 4)));
    }

    #[test]
    fn test_stale_cursor_request_keeps_surface_free() {
        let mut state = CompositorState::new(config());
        let client = state.connect();
        map_toplevel(&mut state, client);
        state.render(&mut HeadlessRenderer::new(), &mut AlwaysRender).unwrap();
        state.handle_input(InputEvent::PointerMotion { time: 1, x: 5.0, y: 5.0 });
        let serial = state.seat.pointer().enter_serial().unwrap();

        let surface = state.create_surface(client);
        state.set_cursor(client, serial + 100, Some(surface), (0, 0)).unwrap();
        assert_eq!(state.seat.pointer().cursor(), None);
        assert!(state.create_toplevel(surface).is_ok());
    }

    #[test]
    fn test_output_removal_moves_surfaces() {
        let mut state = CompositorState::new(config());
        let first = state.outputs.primary_id().unwrap();
        let mut second = Output::new(
            "HEADLESS-2",
            OutputMode {
                width: 800,
                height: 600,
                refresh: 60_000,
            },
        );
        second.position = (1200, 0);
        let second = state.add_output(second);

        let client = state.connect();
        let (surface, _) = map_toplevel(&mut state, client);
        state.drain_events(client);

        state.remove_output(first).unwrap();
        let events = state.drain_events(client);
        assert_eq!(events[0], ClientEvent::SurfaceLeave { surface, output: first });
        assert!(events.contains(&ClientEvent::SurfaceEnter { surface, output: second }));
        assert_eq!(state.layout.output_area(), Rectangle::new(1200, 0, 800, 600));
        assert_eq!(state.windows.get(surface).unwrap().target.size, (800, 600));
    }

    #[test]
    fn test_ping_pong() {
        let mut state = CompositorState::new(config());
        let client = state.connect();
        let serial = state.ping(client);
        assert_eq!(state.drain_events(client), vec![ClientEvent::Ping { serial }]);
        assert!(!state.pong(client, serial + 1));
        assert!(state.pong(client, serial));
    }

    #[test]
    fn test_invalid_scale() {
        let mut state = CompositorState::new(config());
        let client = state.connect();
        let surface = state.create_surface(client);
        assert!(state.set_buffer_scale(surface, 0).is_err());
        assert!(state.set_buffer_transform(surface, 8).is_err());
        assert!(state.set_buffer_scale(surface, 2).is_ok());
    }

    #[test]
    fn test_shutdown_releases_every_reference() {
        let mut state = CompositorState::new(config());
        for _ in 0..3 {
            let client = state.connect();
            map_toplevel(&mut state, client);
        }
        state.shutdown();
        assert!(!state.is_running());
        assert!(state.connections.is_empty());
        assert!(state.buffers.is_empty());
        assert!(state.layout.is_empty());
    }
}
