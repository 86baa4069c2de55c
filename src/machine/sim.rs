//! Simulated machine driver.
//!
//! Behaves like a real table without hardware: drawings take (scaled)
//! estimated machining time before the driver reports ready again, the
//! position tracks the last point issued, and every raw send is recorded.
//! Used by default in development configs and throughout the test suite.

use crate::chains::{self, BoundingBox, Drawing, Point, Units};
use crate::config::MachineConfig;
use crate::error::Result;
use crate::machine::{MachineDriver, MachineStatus};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Default compression of simulated drawing time (1s of machining ≈ 1ms)
const DEFAULT_TIME_SCALE: f64 = 0.001;

/// Observable state of the simulated machine
#[derive(Debug, Default)]
pub struct SimState {
    pub pos: Point,
    pub homed: bool,
    /// Raw lines received via `send` and during homing
    pub sent: Vec<String>,
    /// Drawings queued since the last flush
    pub queued: usize,
    pub flushes: u32,
    pub halts: u32,
    pub runs: u32,
    pub shutdowns: u32,
    busy_until: Option<Instant>,
}

/// Hardware-free machine driver
pub struct SimDriver {
    config: MachineConfig,
    time_scale: f64,
    state: Arc<Mutex<SimState>>,
}

impl SimDriver {
    pub fn new(config: MachineConfig) -> Self {
        Self {
            config,
            time_scale: DEFAULT_TIME_SCALE,
            state: Arc::new(Mutex::new(SimState::default())),
        }
    }

    /// Override the simulated-time compression factor
    pub fn with_time_scale(mut self, scale: f64) -> Self {
        self.time_scale = scale;
        self
    }

    /// Shared handle onto the simulated state, for inspection from tests
    pub fn state_handle(&self) -> Arc<Mutex<SimState>> {
        Arc::clone(&self.state)
    }
}

impl MachineDriver for SimDriver {
    fn home(&mut self) -> Result<()> {
        let init = self.config.init.clone();
        let mut state = self.state.lock();
        for line in init {
            state.sent.push(line);
        }
        state.pos = (0.0, 0.0);
        state.homed = true;
        state.busy_until = None;
        log::info!("sim: homed");
        Ok(())
    }

    fn send(&mut self, line: &str) -> Result<()> {
        self.state.lock().sent.push(line.to_string());
        Ok(())
    }

    fn run(&mut self, drawing: &Drawing, units: Units, feed: f64) -> Result<()> {
        // The daemon clamps nothing at this layer; measure the drawing as-is.
        let bbox = BoundingBox::new((f64::MIN, f64::MIN), (f64::MAX, f64::MAX));
        let estimate = chains::estimate_machining_time(drawing, &bbox, feed, self.config.accel);
        let busy = Duration::from_secs_f64(estimate.seconds * self.time_scale);

        let mut state = self.state.lock();
        state.runs += 1;
        state.queued += 1;
        state.busy_until = Some(Instant::now() + busy);
        if let Some(p) = drawing.iter().rev().find_map(|chain| chain.last()) {
            state.pos = *p;
        }
        log::debug!(
            "sim: run {} chains ({:?}, feed {}), busy for {:?}",
            drawing.len(),
            units,
            feed,
            busy
        );
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        let mut state = self.state.lock();
        state.queued = 0;
        state.flushes += 1;
        Ok(())
    }

    fn halt(&mut self) -> Result<()> {
        let mut state = self.state.lock();
        state.halts += 1;
        state.busy_until = None;
        log::info!("sim: halted");
        Ok(())
    }

    fn status(&mut self) -> Result<MachineStatus> {
        let mut state = self.state.lock();
        let ready = match state.busy_until {
            Some(t) => {
                if Instant::now() >= t {
                    state.busy_until = None;
                    true
                } else {
                    false
                }
            }
            None => true,
        };
        Ok(MachineStatus {
            pos: state.pos,
            ready,
        })
    }

    fn shutdown(&mut self) -> Result<()> {
        self.state.lock().shutdowns += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;

    fn driver() -> SimDriver {
        SimDriver::new(AppConfig::sandtable_defaults().machine)
    }

    #[test]
    fn test_home_runs_init_and_zeroes_position() {
        let mut d = driver();
        let handle = d.state_handle();
        d.home().unwrap();

        let state = handle.lock();
        assert!(state.homed);
        assert_eq!(state.sent, vec!["$G", "$X", "$H"]);
        assert_eq!(state.pos, (0.0, 0.0));
    }

    #[test]
    fn test_run_busy_until_estimate_elapses() {
        let mut d = driver().with_time_scale(0.005);
        let drawing: Drawing = vec![vec![(0.0, 0.0), (1000.0, 0.0)]];
        d.run(&drawing, Units::Mm, 2000.0).unwrap();

        assert!(!d.status().unwrap().ready);
        // 1000mm at 2000 mm/min ≈ 30s machining → 150ms simulated
        std::thread::sleep(Duration::from_millis(250));
        let status = d.status().unwrap();
        assert!(status.ready);
        assert_eq!(status.pos, (1000.0, 0.0));
    }

    #[test]
    fn test_halt_makes_ready_immediately() {
        let mut d = driver().with_time_scale(10.0);
        let drawing: Drawing = vec![vec![(0.0, 0.0), (500.0, 500.0)]];
        d.run(&drawing, Units::Mm, 2000.0).unwrap();
        assert!(!d.status().unwrap().ready);

        d.halt().unwrap();
        assert!(d.status().unwrap().ready);
        assert_eq!(d.state_handle().lock().halts, 1);
    }

    #[test]
    fn test_flush_clears_queue() {
        let mut d = driver();
        let drawing: Drawing = vec![vec![(0.0, 0.0), (1.0, 1.0)]];
        d.run(&drawing, Units::Mm, 2000.0).unwrap();
        assert_eq!(d.state_handle().lock().queued, 1);
        d.flush().unwrap();
        assert_eq!(d.state_handle().lock().queued, 0);
    }

    #[test]
    fn test_status_does_not_mutate() {
        let mut d = driver();
        let a = d.status().unwrap();
        let b = d.status().unwrap();
        assert_eq!(a, b);
    }
}
