//! End-to-end tests: a real wayland-client talks to the server over a
//! socket pair while the test thread drives the display.

use std::os::unix::io::AsFd;
use std::os::unix::net::UnixStream;
use std::thread;
use std::time::{Duration, Instant};

use wayland_client::protocol::{
    wl_buffer, wl_callback, wl_compositor, wl_keyboard, wl_output, wl_registry, wl_seat, wl_shm, wl_shm_pool,
    wl_surface,
};
use wayland_client::{delegate_noop, Connection, Dispatch, EventQueue, QueueHandle, WEnum};
use wayland_protocols::xdg::shell::client::{xdg_surface, xdg_toplevel, xdg_wm_base};
use wayland_server::Display;
use winland::config::{CompositorConfig, OutputConfig, TilingOptions};
use winland::renderer::{AlwaysRender, HeadlessRenderer};
use winland::server::ServerState;

const WIDTH: i32 = 64;
const HEIGHT: i32 = 64;

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

/// Run `client` on its own thread against a fresh server until it returns
/// and hangs up.
fn run_client<T, F>(client: F) -> (Display<ServerState>, ServerState, T)
where
    F: FnOnce(UnixStream) -> T + Send + 'static,
    T: Send + 'static,
{
    let mut display = Display::<ServerState>::new().unwrap();
    let mut state = ServerState::new(config(), display.handle());
    let mut renderer = HeadlessRenderer::with_size(1200, 800);
    let (server_end, client_end) = UnixStream::pair().unwrap();
    state.insert_client(server_end).unwrap();

    let handle = thread::spawn(move || client(client_end));
    let deadline = Instant::now() + Duration::from_secs(10);
    let mut pump = |display: &mut Display<ServerState>, state: &mut ServerState| {
        display.dispatch_clients(state).unwrap();
        state.after_dispatch();
        state.render(&mut renderer, &mut AlwaysRender).unwrap();
        let _ = display.flush_clients();
        thread::sleep(Duration::from_millis(1));
    };

    while !handle.is_finished() {
        assert!(Instant::now() < deadline, "client did not finish in time");
        pump(&mut display, &mut state);
    }
    let result = handle.join().unwrap();

    // Let the server notice the hang-up
    for _ in 0..20 {
        pump(&mut display, &mut state);
    }
    (display, state, result)
}

#[derive(Default)]
struct Client {
    compositor: Option<wl_compositor::WlCompositor>,
    shm: Option<wl_shm::WlShm>,
    seat: Option<wl_seat::WlSeat>,
    wm_base: Option<xdg_wm_base::XdgWmBase>,
    formats: Vec<wl_shm::Format>,
    keymap_size: Option<u32>,
    keyboard_entered: bool,
    entered_output: bool,
    /// (width, height, states) of each toplevel configure
    toplevel_configures: Vec<(i32, i32, Vec<u32>)>,
    surface_configures: Vec<u32>,
    frame_done: bool,
}

impl Client {
    fn connect(stream: UnixStream) -> (Connection, EventQueue<Client>, Client) {
        let conn = Connection::from_socket(stream).unwrap();
        let mut queue = conn.new_event_queue();
        let qh = queue.handle();
        conn.display().get_registry(&qh, ());

        let mut client = Client::default();
        queue.roundtrip(&mut client).unwrap();
        // Second roundtrip collects the events sent on bind
        queue.roundtrip(&mut client).unwrap();
        (conn, queue, client)
    }

    fn create_buffer(&self, qh: &QueueHandle<Client>) -> wl_buffer::WlBuffer {
        let stride = WIDTH * 4;
        let size = stride * HEIGHT;
        let file = tempfile::tempfile().unwrap();
        file.set_len(size as u64).unwrap();
        let mut mmap = unsafe { memmap2::MmapMut::map_mut(&file).unwrap() };
        for pixel in mmap.chunks_exact_mut(4) {
            pixel.copy_from_slice(&[0xFF, 0x00, 0x00, 0xFF]);
        }

        let pool = self.shm.as_ref().unwrap().create_pool(file.as_fd(), size, qh, ());
        let buffer = pool.create_buffer(0, WIDTH, HEIGHT, stride, wl_shm::Format::Xrgb8888, qh, ());
        pool.destroy();
        buffer
    }
}

impl Dispatch<wl_registry::WlRegistry, ()> for Client {
    fn event(
        state: &mut Self,
        registry: &wl_registry::WlRegistry,
        event: wl_registry::Event,
        _data: &(),
        _conn: &Connection,
        qh: &QueueHandle<Self>,
    ) {
        if let wl_registry::Event::Global {
            name,
            interface,
            version,
        } = event
        {
            match interface.as_str() {
                "wl_compositor" => {
                    state.compositor = Some(registry.bind(name, version.min(6), qh, ()));
                }
                "wl_shm" => {
                    state.shm = Some(registry.bind(name, version.min(1), qh, ()));
                }
                "wl_seat" => {
                    let seat: wl_seat::WlSeat = registry.bind(name, version.min(9), qh, ());
                    seat.get_keyboard(qh, ());
                    state.seat = Some(seat);
                }
                "wl_output" => {
                    registry.bind::<wl_output::WlOutput, _, _>(name, version.min(4), qh, ());
                }
                "xdg_wm_base" => {
                    state.wm_base = Some(registry.bind(name, version.min(6), qh, ()));
                }
                _ => {}
            }
        }
    }
}

impl Dispatch<wl_shm::WlShm, ()> for Client {
    fn event(
        state: &mut Self,
        _shm: &wl_shm::WlShm,
        event: wl_shm::Event,
        _data: &(),
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        if let wl_shm::Event::Format {
            format: WEnum::Value(format),
        } = event
        {
            state.formats.push(format);
        }
    }
}

impl Dispatch<wl_keyboard::WlKeyboard, ()> for Client {
    fn event(
        state: &mut Self,
        _keyboard: &wl_keyboard::WlKeyboard,
        event: wl_keyboard::Event,
        _data: &(),
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        match event {
            wl_keyboard::Event::Keymap { size, .. } => state.keymap_size = Some(size),
            wl_keyboard::Event::Enter { .. } => state.keyboard_entered = true,
            wl_keyboard::Event::Leave { .. } => state.keyboard_entered = false,
            _ => {}
        }
    }
}

impl Dispatch<wl_surface::WlSurface, ()> for Client {
    fn event(
        state: &mut Self,
        _surface: &wl_surface::WlSurface,
        event: wl_surface::Event,
        _data: &(),
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        if let wl_surface::Event::Enter { .. } = event {
            state.entered_output = true;
        }
    }
}

impl Dispatch<wl_callback::WlCallback, ()> for Client {
    fn event(
        state: &mut Self,
        _callback: &wl_callback::WlCallback,
        event: wl_callback::Event,
        _data: &(),
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        if let wl_callback::Event::Done { .. } = event {
            state.frame_done = true;
        }
    }
}

impl Dispatch<xdg_wm_base::XdgWmBase, ()> for Client {
    fn event(
        _state: &mut Self,
        wm_base: &xdg_wm_base::XdgWmBase,
        event: xdg_wm_base::Event,
        _data: &(),
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        if let xdg_wm_base::Event::Ping { serial } = event {
            wm_base.pong(serial);
        }
    }
}

impl Dispatch<xdg_surface::XdgSurface, ()> for Client {
    fn event(
        state: &mut Self,
        _xdg_surface: &xdg_surface::XdgSurface,
        event: xdg_surface::Event,
        _data: &(),
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        if let xdg_surface::Event::Configure { serial } = event {
            state.surface_configures.push(serial);
        }
    }
}

impl Dispatch<xdg_toplevel::XdgToplevel, ()> for Client {
    fn event(
        state: &mut Self,
        _toplevel: &xdg_toplevel::XdgToplevel,
        event: xdg_toplevel::Event,
        _data: &(),
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        if let xdg_toplevel::Event::Configure { width, height, states } = event {
            let states = states
                .chunks_exact(4)
                .map(|c| u32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
                .collect();
            state.toplevel_configures.push((width, height, states));
        }
    }
}

delegate_noop!(Client: wl_compositor::WlCompositor);
delegate_noop!(Client: wl_shm_pool::WlShmPool);
delegate_noop!(Client: ignore wl_buffer::WlBuffer);
delegate_noop!(Client: ignore wl_seat::WlSeat);
delegate_noop!(Client: ignore wl_output::WlOutput);

/// Outcome of a client session, checked on the test thread
struct Session {
    client: Client,
    protocol_error: Option<(u32, String)>,
}

#[test]
fn test_toplevel_maps_and_tiles_over_the_wire() {
    let (_display, state, session) = run_client(|stream| {
        let (_conn, mut queue, mut client) = Client::connect(stream);
        let qh = queue.handle();

        let surface = client.compositor.as_ref().unwrap().create_surface(&qh, ());
        let xdg_surface = client.wm_base.as_ref().unwrap().get_xdg_surface(&surface, &qh, ());
        let toplevel = xdg_surface.get_toplevel(&qh, ());
        toplevel.set_title("wire test".to_string());
        surface.commit();
        queue.roundtrip(&mut client).unwrap();

        let serial = *client.surface_configures.last().unwrap();
        xdg_surface.ack_configure(serial);

        let buffer = client.create_buffer(&qh);
        surface.attach(Some(&buffer), 0, 0);
        surface.damage_buffer(0, 0, WIDTH, HEIGHT);
        surface.frame(&qh, ());
        surface.commit();
        queue.roundtrip(&mut client).unwrap();

        while !client.frame_done {
            queue.blocking_dispatch(&mut client).unwrap();
        }
        Session {
            client,
            protocol_error: None,
        }
    });
    let client = session.client;

    assert!(client.formats.contains(&wl_shm::Format::Argb8888));
    assert!(client.formats.contains(&wl_shm::Format::Xrgb8888));
    assert!(client.keymap_size.unwrap() > 0);

    // Initial configure leaves the size to the client
    let (width, height, _) = &client.toplevel_configures[0];
    assert_eq!((*width, *height), (0, 0));

    // Mapping tiles the only window over the whole output
    let (width, height, states) = client.toplevel_configures.last().unwrap();
    assert_eq!((*width, *height), (1200, 800));
    assert!(states.contains(&4), "activated missing from {:?}", states);
    for edge in 5..=8 {
        assert!(states.contains(&edge), "tiled edge {} missing from {:?}", edge, states);
    }
    assert!(client.keyboard_entered);
    assert!(client.entered_output);
    assert!(client.frame_done);

    // Hanging up tears down everything the client owned
    assert!(state.compositor.connections.is_empty());
    assert!(state.compositor.surfaces.is_empty());
    assert!(state.compositor.buffers.is_empty());
    assert!(state.compositor.layout.is_empty());
}

#[test]
fn test_buffer_before_ack_is_fatal() {
    let (_display, state, session) = run_client(|stream| {
        let (conn, mut queue, mut client) = Client::connect(stream);
        let qh = queue.handle();

        let surface = client.compositor.as_ref().unwrap().create_surface(&qh, ());
        let xdg_surface = client.wm_base.as_ref().unwrap().get_xdg_surface(&surface, &qh, ());
        let _toplevel = xdg_surface.get_toplevel(&qh, ());
        let buffer = client.create_buffer(&qh);
        surface.attach(Some(&buffer), 0, 0);
        surface.commit();

        assert!(queue.roundtrip(&mut client).is_err());
        let protocol_error = conn
            .protocol_error()
            .map(|err| (err.code, err.object_interface.to_string()));
        Session {
            client,
            protocol_error,
        }
    });

    let (code, interface) = session.protocol_error.unwrap();
    assert_eq!(interface, "xdg_surface");
    assert_eq!(code, 3);
    assert!(session.client.toplevel_configures.is_empty());
    assert!(state.compositor.connections.is_empty());
    assert!(state.compositor.buffers.is_empty());
}
