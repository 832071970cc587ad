//! Gate/trigger monitor
//!
//! A single polling loop samples the gate anchor at a fixed interval and
//! fires a detection pass on a worker thread when the gate triggers. At most
//! one pass is ever in flight; a trigger that arrives while one is running
//! is skipped. Everything the monitor does is reported as a
//! [`MonitorEvent`] on a channel.

pub mod gate;

use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::config::GateSettings;
use crate::detection::{MatchRecord, PassReport};
use crate::vision::{CaptureSource, Frame, VisionError};

pub use gate::{AnchorProbe, GateMachine, GateProbe, GateState, GateTransition};

/// Longest single sleep, so a stop request is noticed quickly
const STOP_CHECK_INTERVAL: Duration = Duration::from_millis(20);

/// Runs one full detection pass over a frame
pub trait PassRunner: Send + Sync + 'static {
    fn run_pass(&self, frame: &Frame) -> Result<PassReport, VisionError>;

    /// Cap on clean identities in the summary
    fn clean_limit(&self) -> usize {
        4
    }
}

/// Everything the monitor reports
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum MonitorEvent {
    Started,
    GateScore { score: f64 },
    Triggered,
    /// The actionable record of a finished pass; banned slots carry no identity
    Detected { record: MatchRecord },
    DetectionFailed { message: String },
    /// The gate fired while a pass was still running
    TriggerSkipped,
    Released,
    Stopped,
}

/// Single-slot admission for detection passes
#[derive(Debug, Clone, Default)]
pub struct PassGuard {
    busy: Arc<AtomicBool>,
}

/// Held for the duration of a pass; frees the slot on drop
#[derive(Debug)]
pub struct PassPermit {
    busy: Arc<AtomicBool>,
}

impl PassGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the slot, or `None` if a pass is already running
    pub fn try_acquire(&self) -> Option<PassPermit> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| PassPermit {
                busy: Arc::clone(&self.busy),
            })
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

impl Drop for PassPermit {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
    }
}

/// Polling loop configuration and collaborators
pub struct Monitor<S, P, R> {
    source: S,
    probe: P,
    runner: Arc<R>,
    settings: GateSettings,
}

impl<S, P, R> Monitor<S, P, R>
where
    S: CaptureSource + 'static,
    P: GateProbe + 'static,
    R: PassRunner,
{
    pub fn new(source: S, probe: P, runner: Arc<R>, settings: GateSettings) -> Self {
        Self {
            source,
            probe,
            runner,
            settings,
        }
    }

    /// Start the polling loop on its own thread
    pub fn spawn(self) -> std::io::Result<MonitorHandle> {
        let (tx, rx) = kanal::unbounded();
        let stop = Arc::new(AtomicBool::new(false));
        let loop_stop = Arc::clone(&stop);

        let thread = std::thread::Builder::new()
            .name("gate-monitor".to_string())
            .spawn(move || self.run(tx, loop_stop))?;

        Ok(MonitorHandle {
            stop,
            events: rx,
            thread: Some(thread),
        })
    }

    fn run(mut self, tx: kanal::Sender<MonitorEvent>, stop: Arc<AtomicBool>) {
        let emit = |event: MonitorEvent| {
            if tx.send(event).is_err() {
                log::debug!("Monitor event dropped, receiver gone");
            }
        };

        let mut gate = GateMachine::new(self.settings.clone());
        let guard = PassGuard::new();
        let mut worker: Option<JoinHandle<()>> = None;
        let mut samples: u64 = 0;
        let interval = Duration::from_millis(self.settings.poll_interval_ms);

        gate.start();
        emit(MonitorEvent::Started);
        log::info!("Gate monitor started (poll {} ms)", self.settings.poll_interval_ms);

        while !stop.load(Ordering::Acquire) {
            let tick = Instant::now();

            let (frame, score) = match self.source.grab() {
                Ok(Some(frame)) => match self.probe.score(&frame) {
                    Ok(score) => (Some(frame), Some(score)),
                    Err(e) => {
                        log::warn!("Gate sample failed: {}", e);
                        (None, None)
                    }
                },
                Ok(None) => {
                    if self.source.is_exhausted() {
                        log::info!("Capture source exhausted");
                        break;
                    }
                    log::debug!("No capture target, resetting gate");
                    gate.reset();
                    sleep_unless_stopped(interval, &stop);
                    continue;
                }
                Err(e) => {
                    log::warn!("Capture failed: {}", e);
                    (None, None)
                }
            };

            if let Some(score) = score {
                samples += 1;
                let every = self.settings.score_report_every as u64;
                if every > 0 && samples % every == 0 {
                    emit(MonitorEvent::GateScore { score });
                }
            }

            match gate.observe(score, tick) {
                GateTransition::Fire => {
                    log::info!("Gate triggered");
                    emit(MonitorEvent::Triggered);
                    if let Some(frame) = frame {
                        reap(&mut worker);
                        match guard.try_acquire() {
                            Some(permit) => {
                                let runner = Arc::clone(&self.runner);
                                worker = spawn_pass(permit, frame, runner, tx.clone());
                            }
                            None => {
                                log::warn!("Detection pass still running, trigger skipped");
                                emit(MonitorEvent::TriggerSkipped);
                            }
                        }
                    }
                }
                GateTransition::Release => {
                    log::info!("Gate released");
                    emit(MonitorEvent::Released);
                }
                GateTransition::None => {}
            }

            sleep_unless_stopped(interval.saturating_sub(tick.elapsed()), &stop);
        }

        if let Some(handle) = worker.take() {
            if handle.join().is_err() {
                log::error!("Detection worker panicked");
            }
        }
        emit(MonitorEvent::Stopped);
        self.source.release();
        log::info!("Gate monitor stopped");
    }
}

fn reap(worker: &mut Option<JoinHandle<()>>) {
    if worker.as_ref().is_some_and(|h| h.is_finished()) {
        if let Some(handle) = worker.take() {
            if handle.join().is_err() {
                log::error!("Detection worker panicked");
            }
        }
    }
}

fn spawn_pass<R: PassRunner>(
    permit: PassPermit,
    frame: Frame,
    runner: Arc<R>,
    tx: kanal::Sender<MonitorEvent>,
) -> Option<JoinHandle<()>> {
    let spawned = std::thread::Builder::new()
        .name("detection-pass".to_string())
        .spawn(move || {
            let _permit = permit;
            let event = match runner.run_pass(&frame) {
                Ok(report) => {
                    let record = MatchRecord::new(&report, runner.clean_limit());
                    log::info!(
                        "Pass done: clean {:?}, banned {:?}",
                        record.summary.clean,
                        record.summary.banned
                    );
                    MonitorEvent::Detected { record }
                }
                Err(e) => {
                    log::warn!("Detection pass failed: {}", e);
                    MonitorEvent::DetectionFailed {
                        message: e.to_string(),
                    }
                }
            };
            if tx.send(event).is_err() {
                log::debug!("Pass result dropped, receiver gone");
            }
        });

    match spawned {
        Ok(handle) => Some(handle),
        Err(e) => {
            log::error!("Cannot start detection worker: {}", e);
            None
        }
    }
}

fn sleep_unless_stopped(duration: Duration, stop: &AtomicBool) {
    let deadline = Instant::now() + duration;
    while !stop.load(Ordering::Acquire) {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        std::thread::sleep((deadline - now).min(STOP_CHECK_INTERVAL));
    }
}

/// Owner side of a running monitor
pub struct MonitorHandle {
    stop: Arc<AtomicBool>,
    events: kanal::Receiver<MonitorEvent>,
    thread: Option<JoinHandle<()>>,
}

impl MonitorHandle {
    pub fn events(&self) -> &kanal::Receiver<MonitorEvent> {
        &self.events
    }

    /// Ask the loop to stop without waiting
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    /// Stop and wait for the loop (and any in-flight pass) to finish
    pub fn stop(mut self) {
        self.request_stop();
        self.join_thread();
    }

    /// Wait for the loop to end on its own (finite sources)
    pub fn join(mut self) {
        self.join_thread();
    }

    fn join_thread(&mut self) {
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("Gate monitor thread panicked");
            }
        }
    }
}

impl Drop for MonitorHandle {
    fn drop(&mut self) {
        self.request_stop();
        self.join_thread();
    }
}
