//! Autonomous-drawing state machine.
//!
//! The demo owns a worker thread that cycles through randomly selected
//! drawings within a time budget, drives the ambient lighting, and reacts to
//! manual trigger events. All control enters through one channel consumed
//! exclusively by the worker; concurrent callers (RPC handler, proximity
//! thread, job executor) only ever enqueue events. The current state is
//! published through an atomic cell for status queries.

use crate::chains::{self, BoundingBox, Drawing, Units};
use crate::client::MachClient;
use crate::config::AppConfig;
use crate::error::{Error, Result};
use crate::patterns::{Params, PatternRegistry};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Demo lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DemoState {
    /// Terminal; the worker thread has exited or is about to
    Dead,
    /// Idle, waiting for a trigger
    Quiet,
    /// Stop requested; cleanup in progress
    Halting,
    /// Actively cycling drawings
    Running,
}

impl DemoState {
    fn as_u8(self) -> u8 {
        match self {
            DemoState::Dead => 0,
            DemoState::Quiet => 1,
            DemoState::Halting => 2,
            DemoState::Running => 3,
        }
    }

    fn from_u8(v: u8) -> DemoState {
        match v {
            0 => DemoState::Dead,
            2 => DemoState::Halting,
            3 => DemoState::Running,
            _ => DemoState::Quiet,
        }
    }
}

/// Atomically published read-only view of the worker's state
#[derive(Debug)]
struct StateCell(AtomicU8);

impl StateCell {
    fn new(state: DemoState) -> Self {
        Self(AtomicU8::new(state.as_u8()))
    }

    fn get(&self) -> DemoState {
        DemoState::from_u8(self.0.load(Ordering::Acquire))
    }

    fn set(&self, state: DemoState) {
        self.0.store(state.as_u8(), Ordering::Release);
    }
}

/// Control events consumed by the worker thread
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DemoEvent {
    Once,
    Continuous(i64),
    Halt,
    Stop,
    LightsRandom,
}

/// Count value meaning "draw until halted"
const UNBOUNDED: i64 = -1;

/// The machine as the demo sees it; implemented by [`MachClient`] in
/// production and by mocks in tests
pub trait Machine: Send {
    /// Submit one drawing (clamped and converted downstream)
    fn draw(
        &mut self,
        drawing: &Drawing,
        bbox: &BoundingBox,
        feed: f64,
        table_units: Units,
        mach_units: Units,
    ) -> Result<()>;

    /// Whether the machine is idle
    fn ready(&mut self) -> Result<bool>;

    /// Immediate stop
    fn halt(&mut self) -> Result<()>;
}

impl Machine for MachClient {
    fn draw(
        &mut self,
        drawing: &Drawing,
        bbox: &BoundingBox,
        feed: f64,
        table_units: Units,
        mach_units: Units,
    ) -> Result<()> {
        self.run(drawing, bbox, feed, table_units, mach_units, false)
            .map(|_| ())
    }

    fn ready(&mut self) -> Result<bool> {
        self.get_state()
    }

    fn halt(&mut self) -> Result<()> {
        MachClient::halt(self).map(|_| ())
    }
}

/// Ambient lighting collaborator; real renderers live outside this crate
pub trait LightControl: Send {
    fn set_random(&mut self) -> Result<()>;
    fn off(&mut self) -> Result<()>;
}

/// Lighting stub for tables without an LED matrix
pub struct NullLights;

impl LightControl for NullLights {
    fn set_random(&mut self) -> Result<()> {
        log::debug!("lights: random pattern (no LED driver)");
        Ok(())
    }

    fn off(&mut self) -> Result<()> {
        log::debug!("lights: off (no LED driver)");
        Ok(())
    }
}

/// Drawing-history collaborator; persistence lives outside this crate
pub trait DrawingHistory: Send {
    fn save(&mut self, pattern: &str, params: &Params, drawing: &Drawing, slot: &str)
        -> Result<()>;
}

/// History stub that only logs
pub struct NullHistory;

impl DrawingHistory for NullHistory {
    fn save(
        &mut self,
        pattern: &str,
        _params: &Params,
        _drawing: &Drawing,
        slot: &str,
    ) -> Result<()> {
        log::debug!("history: {} saved to {} (no history store)", pattern, slot);
        Ok(())
    }
}

/// Timing and geometry the demo cycle operates under
#[derive(Debug, Clone)]
pub struct DemoSettings {
    pub polling_delay: Duration,
    /// Dwell between consecutive drawings
    pub pause: Duration,
    /// Bound on waiting for a drawing to report ready
    pub wait_timeout: Duration,
    /// Acceptance band for estimated draw time, seconds
    pub draw_time_min: f64,
    pub draw_time_max: f64,
    /// Table bounding box in table units
    pub bbox: BoundingBox,
    pub feed: f64,
    pub accel: f64,
    pub table_units: Units,
    pub mach_units: Units,
}

impl DemoSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            polling_delay: config.demo.polling_delay(),
            pause: config.demo.pause(),
            wait_timeout: config.demo.wait_timeout(),
            draw_time_min: config.demo.draw_time_min_secs,
            draw_time_max: config.demo.draw_time_max_secs,
            bbox: config.table.bounding_box(),
            feed: config.machine.feed,
            accel: config.machine.accel,
            table_units: config.table.units,
            mach_units: config.machine.units,
        }
    }
}

/// Cloneable control handle; every entry point enqueues an event
#[derive(Clone)]
pub struct DemoHandle {
    tx: crossbeam_channel::Sender<DemoEvent>,
    state: Arc<StateCell>,
}

impl DemoHandle {
    /// Current published state
    pub fn state(&self) -> DemoState {
        self.state.get()
    }

    /// Run exactly one drawing
    pub fn demo_once(&self) {
        self.send(DemoEvent::Once);
    }

    /// Keep drawing; `None` means until halted
    pub fn demo_continuous(&self, count: Option<i64>) {
        self.send(DemoEvent::Continuous(count.unwrap_or(UNBOUNDED)));
    }

    /// Stop the running cycle (no-op unless running)
    pub fn demo_halt(&self) {
        self.send(DemoEvent::Halt);
    }

    /// Terminate the worker thread
    pub fn stop(&self) {
        self.send(DemoEvent::Stop);
    }

    /// Manual-tap dispatch from the proximity switch
    pub fn prox_callback(&self, taps: usize) {
        match taps {
            2 => self.send(DemoEvent::LightsRandom),
            3 => self.demo_once(),
            4 => self.demo_continuous(None),
            5 => self.demo_halt(),
            n => log::info!("Number of taps: {}", n),
        }
    }

    fn send(&self, event: DemoEvent) {
        if self.tx.send(event).is_err() {
            log::warn!("Demo thread is gone; dropping {:?}", event);
        }
    }
}

/// Spawn the demo worker thread
pub fn spawn(
    settings: DemoSettings,
    registry: Arc<PatternRegistry>,
    machine: Box<dyn Machine>,
    lights: Box<dyn LightControl>,
    history: Box<dyn DrawingHistory>,
) -> Result<(DemoHandle, JoinHandle<()>)> {
    let (tx, rx) = crossbeam_channel::unbounded();
    let state = Arc::new(StateCell::new(DemoState::Quiet));

    let worker = DemoWorker {
        rx,
        cell: Arc::clone(&state),
        state: DemoState::Quiet,
        count: 0,
        settings,
        registry,
        machine,
        lights,
        history,
        rng: StdRng::from_entropy(),
    };

    let join = std::thread::Builder::new()
        .name("demo".to_string())
        .spawn(move || worker.run())?;

    Ok((DemoHandle { tx, state }, join))
}

/// A drawing accepted by rejection sampling
struct Accepted {
    name: String,
    params: Params,
    drawing: Drawing,
    seconds: f64,
}

struct DemoWorker {
    rx: crossbeam_channel::Receiver<DemoEvent>,
    cell: Arc<StateCell>,
    state: DemoState,
    count: i64,
    settings: DemoSettings,
    registry: Arc<PatternRegistry>,
    machine: Box<dyn Machine>,
    lights: Box<dyn LightControl>,
    history: Box<dyn DrawingHistory>,
    rng: StdRng,
}

impl DemoWorker {
    fn run(mut self) {
        log::info!("Demo active");
        loop {
            match self.state {
                DemoState::Dead => break,
                DemoState::Quiet => self.poll_events(self.settings.polling_delay),
                DemoState::Running => self.run_cycle(),
                DemoState::Halting => {
                    self.lights_off();
                    if let Err(e) = self.machine.halt() {
                        log::error!("Halt failed: {}", e);
                    }
                    self.set_state(DemoState::Quiet);
                }
            }
        }
        log::info!("Demo exiting");
    }

    /// One running cycle: lights on, draw until the count is exhausted or an
    /// event interrupts, lights off.
    fn run_cycle(&mut self) {
        self.lights_random();
        while self.state == DemoState::Running && self.count != 0 {
            self.count -= 1;
            match self.select_drawing() {
                Ok(Some(accepted)) => {
                    if self.submit(&accepted) {
                        self.wait_ready();
                    }
                    self.dwell();
                }
                // Interrupted by a state-changing event between attempts
                Ok(None) => {}
                Err(e) => {
                    log::error!("Stopping demo cycle: {}", e);
                    break;
                }
            }
        }
        self.lights_off();
        if self.state == DemoState::Running {
            self.set_state(DemoState::Quiet);
        }
    }

    /// Rejection sampling: pick a generator uniformly at random, randomize its
    /// parameters, and accept the drawing only when the machining-time
    /// estimate falls inside the configured band. Generation failures log and
    /// retry; control events are observed between attempts.
    fn select_drawing(&mut self) -> Result<Option<Accepted>> {
        if self.registry.is_empty() {
            return Err(Error::EmptyRegistry);
        }
        loop {
            self.drain_events();
            if self.state != DemoState::Running {
                return Ok(None);
            }

            let (name, generator) = match self.registry.pick_random(&mut self.rng) {
                Some(picked) => picked,
                None => return Err(Error::EmptyRegistry),
            };
            let name = name.to_string();
            let params = PatternRegistry::randomize(generator.schema(), &mut self.rng);

            match generator.generate(&params) {
                Ok(drawing) => {
                    let estimate = chains::estimate_machining_time(
                        &drawing,
                        &self.settings.bbox,
                        self.settings.feed,
                        self.settings.accel,
                    );
                    let t = estimate.seconds;
                    if t >= self.settings.draw_time_min && t <= self.settings.draw_time_max {
                        log::info!(
                            "Drawing {}, estimated time {}:{:02}",
                            name,
                            (t / 60.0) as u64,
                            t as u64 % 60
                        );
                        return Ok(Some(Accepted {
                            name,
                            params,
                            drawing,
                            seconds: t,
                        }));
                    }
                    log::info!(
                        "Tried {} but time was {}:{:02}",
                        name,
                        (t / 60.0) as u64,
                        t as u64 % 60
                    );
                }
                Err(e) => log::warn!("Tried {} but failed with {}", name, e),
            }
        }
    }

    /// Submit the accepted drawing and record it. Machine faults are logged
    /// and the cycle continues; the worker never dies on a driver error.
    fn submit(&mut self, accepted: &Accepted) -> bool {
        let s = &self.settings;
        match self.machine.draw(
            &accepted.drawing,
            &s.bbox,
            s.feed,
            s.table_units,
            s.mach_units,
        ) {
            Ok(()) => {
                if let Err(e) =
                    self.history
                        .save(&accepted.name, &accepted.params, &accepted.drawing, "lastdemo")
                {
                    log::warn!("History save failed: {}", e);
                }
                true
            }
            Err(e) => {
                log::error!(
                    "Drawing {} ({}s) failed: {}",
                    accepted.name,
                    accepted.seconds as u64,
                    e
                );
                false
            }
        }
    }

    /// Poll the machine until ready, an interrupting event, or the timeout.
    /// Transport errors are logged and retried within the deadline.
    fn wait_ready(&mut self) {
        let deadline = Instant::now() + self.settings.wait_timeout;
        loop {
            if self.state != DemoState::Running {
                return;
            }
            match self.machine.ready() {
                Ok(true) => return,
                Ok(false) => {}
                Err(e) => log::warn!("Status poll failed: {}", e),
            }
            if Instant::now() >= deadline {
                log::error!("{}", Error::DrawTimeout);
                if let Err(e) = self.machine.halt() {
                    log::error!("Halt after timeout failed: {}", e);
                }
                return;
            }
            self.poll_events(self.settings.polling_delay);
        }
    }

    /// Pause between drawings, still reacting to events each tick
    fn dwell(&mut self) {
        let end = Instant::now() + self.settings.pause;
        while self.state == DemoState::Running && Instant::now() < end {
            self.poll_events(self.settings.polling_delay);
        }
    }

    /// Block up to `timeout` for one event, then drain whatever queued up
    fn poll_events(&mut self, timeout: Duration) {
        match self.rx.recv_timeout(timeout) {
            Ok(event) => self.apply(event),
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => {}
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
                // Every handle dropped; nothing can ever wake us again
                self.set_state(DemoState::Dead);
                return;
            }
        }
        self.drain_events();
    }

    fn drain_events(&mut self) {
        while let Ok(event) = self.rx.try_recv() {
            self.apply(event);
        }
    }

    fn apply(&mut self, event: DemoEvent) {
        match event {
            DemoEvent::Once => {
                self.count = 1;
                self.set_state(DemoState::Running);
            }
            DemoEvent::Continuous(count) => {
                log::info!("demoContinuous({}) has been called", count);
                self.count = count;
                self.set_state(DemoState::Running);
            }
            DemoEvent::Halt => {
                log::info!("demoHalt has been called");
                if self.state == DemoState::Running {
                    self.set_state(DemoState::Halting);
                }
            }
            DemoEvent::Stop => self.set_state(DemoState::Dead),
            DemoEvent::LightsRandom => self.lights_random(),
        }
    }

    fn set_state(&mut self, state: DemoState) {
        self.state = state;
        self.cell.set(state);
    }

    fn lights_random(&mut self) {
        if let Err(e) = self.lights.set_random() {
            log::warn!("Lights failed: {}", e);
        }
    }

    fn lights_off(&mut self) {
        if let Err(e) = self.lights.off() {
            log::warn!("Lights failed: {}", e);
        }
    }
}
