//! Winland - a tiling Wayland compositor
//!
//! Entry point: binds the Wayland socket, wires it into the event loop and
//! renders headlessly until the compositor stops.

use log::info;
use winland::backend::EventLoop;
use winland::config::CompositorConfig;
use winland::renderer::{FrameInterval, HeadlessRenderer};
use winland::server::{ServerState, WaylandServer};

fn main() -> anyhow::Result<()> {
    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    info!("Starting Winland compositor");
    let config = CompositorConfig::from_env()?;

    let mut event_loop = EventLoop::new()?;
    let server = WaylandServer::new(&config)?;
    let mut state = ServerState::new(config.clone(), server.display_handle());
    info!("Clients can connect with WAYLAND_DISPLAY={}", server.socket_name());
    server.insert_into_loop(&event_loop.handle())?;

    // Input producers attach through this sender
    let _input = event_loop.insert_input_source()?;
    event_loop.insert_termination_signals()?;

    let renderer = HeadlessRenderer::with_size(config.output.width, config.output.height);
    let gate = FrameInterval::new(config.frame_interval);
    event_loop.insert_frame_clock(renderer, gate, config.frame_interval)?;

    let result = event_loop.run(&mut state);
    state.shutdown();
    result
}
