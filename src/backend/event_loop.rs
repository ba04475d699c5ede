//! Event loop integration
//!
//! Wraps calloop with [`ServerState`] as the shared loop data. Input
//! producers, the Wayland socket, the frame clock and termination signals
//! all register here.

use std::time::Duration;

use calloop::channel::{self, Event};
use calloop::signals::{Signal, Signals};
use calloop::timer::{TimeoutAction, Timer};
use calloop::{EventLoop as CalLoop, LoopHandle, LoopSignal};
use log::{debug, error, info};

use crate::input::InputSender;
use crate::renderer::{FrameGate, Renderer};
use crate::server::ServerState;

/// Winland event loop wrapper
pub struct EventLoop {
    /// Calloop event loop
    event_loop: CalLoop<'static, ServerState>,
    /// Loop signal for waking/stopping
    signal: LoopSignal,
}

impl EventLoop {
    /// Create a new event loop
    pub fn new() -> anyhow::Result<Self> {
        let event_loop = CalLoop::try_new()?;
        let signal = event_loop.get_signal();

        Ok(Self { event_loop, signal })
    }

    /// Get a handle to register event sources
    pub fn handle(&self) -> LoopHandle<'static, ServerState> {
        self.event_loop.handle()
    }

    /// Get the loop signal for waking
    pub fn signal(&self) -> LoopSignal {
        self.signal.clone()
    }

    /// Create the channel input producers push events into
    pub fn insert_input_source(&self) -> anyhow::Result<InputSender> {
        let (sender, receiver) = channel::channel();
        self.event_loop
            .handle()
            .insert_source(receiver, |event, _, state: &mut ServerState| match event {
                Event::Msg(input) => {
                    state.compositor.handle_input(input);
                    state.after_dispatch();
                    state.flush_clients();
                }
                Event::Closed => debug!("Input source closed"),
            })
            .map_err(|err| err.error)?;
        Ok(sender)
    }

    /// Drive `renderer` from a timer firing every `period`
    pub fn insert_frame_clock<R, G>(&self, mut renderer: R, mut gate: G, period: Duration) -> anyhow::Result<()>
    where
        R: Renderer + 'static,
        G: FrameGate + 'static,
    {
        self.event_loop
            .handle()
            .insert_source(Timer::from_duration(period), move |_, _, state: &mut ServerState| {
                if let Err(err) = state.render(&mut renderer, &mut gate) {
                    error!("Render failed: {}", err);
                }
                TimeoutAction::ToDuration(period)
            })
            .map_err(|err| err.error)?;
        Ok(())
    }

    /// Stop the compositor on SIGINT or SIGTERM
    pub fn insert_termination_signals(&self) -> anyhow::Result<()> {
        let signals = Signals::new(&[Signal::SIGINT, Signal::SIGTERM])?;
        self.event_loop
            .handle()
            .insert_source(signals, |event, _, state: &mut ServerState| {
                request_stop(state, event.signal());
            })
            .map_err(|err| err.error)?;
        Ok(())
    }

    /// Run one iteration of the event loop
    pub fn dispatch(&mut self, timeout: Option<Duration>, state: &mut ServerState) -> anyhow::Result<()> {
        self.event_loop.dispatch(timeout, state)?;
        Ok(())
    }

    /// Run the event loop until the compositor stops
    pub fn run(&mut self, state: &mut ServerState) -> anyhow::Result<()> {
        debug!("Starting event loop");

        while state.compositor.is_running() {
            if let Err(e) = self.dispatch(None, state) {
                error!("Event loop error: {}", e);
                return Err(e);
            }
        }
        info!("Event loop stopped");
        Ok(())
    }

    /// Stop the event loop
    pub fn stop(&self) {
        self.signal.stop();
    }

    /// Wake the event loop from another thread
    pub fn wake(&self) {
        self.signal.wakeup();
    }
}

fn request_stop(state: &mut ServerState, signal: Signal) {
    info!("Received {:?}, shutting down", signal);
    state.compositor.stop();
}
