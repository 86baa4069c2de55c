//! Proximity-switch polling thread.
//!
//! Samples one physical input line at a fixed rate and aggregates activations
//! into "taps" within a sliding window. When the oldest recorded activation is
//! at least one window old, the callback fires with the activation count and
//! the window is cleared in the same tick, so a gesture is never counted
//! twice.
//!
//! Sampling conflates "poll tick" with "tap": at most one activation is
//! recorded per tick, so taps faster than the polling rate are undercounted.
//! That resolution bound is inherent to the design.

use crate::error::Result;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// One physical input line
pub trait InputLine: Send {
    /// Whether the line is asserted right now
    fn is_asserted(&mut self) -> bool;
}

/// Input line backed by the sysfs GPIO interface
pub struct GpioLine {
    path: std::path::PathBuf,
    warned: bool,
}

impl GpioLine {
    pub fn new(pin: u32) -> Self {
        Self {
            path: std::path::PathBuf::from(format!("/sys/class/gpio/gpio{}/value", pin)),
            warned: false,
        }
    }
}

impl InputLine for GpioLine {
    fn is_asserted(&mut self) -> bool {
        match std::fs::read_to_string(&self.path) {
            Ok(contents) => contents.trim() == "1",
            Err(e) => {
                if !self.warned {
                    log::warn!("Cannot read {}: {}", self.path.display(), e);
                    self.warned = true;
                }
                false
            }
        }
    }
}

/// Handle to the running polling thread
pub struct ProxSwitchHandle {
    running: Arc<AtomicBool>,
    join: JoinHandle<()>,
}

impl ProxSwitchHandle {
    /// Signal the thread to exit and wait for it
    pub fn stop(self) {
        self.running.store(false, Ordering::Relaxed);
        if self.join.join().is_err() {
            log::error!("ProxSwitchThread panicked");
        }
    }
}

/// Spawn the polling thread. `callback` receives the aggregated tap count.
pub fn spawn<F>(
    mut line: Box<dyn InputLine>,
    window: Duration,
    polling_delay: Duration,
    callback: F,
) -> Result<ProxSwitchHandle>
where
    F: Fn(usize) + Send + 'static,
{
    let running = Arc::new(AtomicBool::new(true));
    let running_thread = Arc::clone(&running);

    // Window capacity in polling ticks
    let capacity = ((window.as_secs_f64() / polling_delay.as_secs_f64()).ceil() as usize).max(1);

    let join = std::thread::Builder::new()
        .name("prox-switch".to_string())
        .spawn(move || {
            log::info!("ProxSwitchThread active");
            let mut taps: VecDeque<Instant> = VecDeque::with_capacity(capacity);

            while running_thread.load(Ordering::Relaxed) {
                let now = Instant::now();
                if line.is_asserted() && taps.len() < capacity {
                    taps.push_back(now);
                }
                if let Some(&oldest) = taps.front() {
                    if now.duration_since(oldest) >= window {
                        callback(taps.len());
                        taps.clear();
                    }
                }
                std::thread::sleep(polling_delay);
            }
            log::info!("ProxSwitchThread exiting");
        })?;

    Ok(ProxSwitchHandle { running, join })
}
