//! Tempo, loop bounds and the lookahead step scheduler.

use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, trace, warn};

use crate::graph::AudioContext;
use crate::{EngineConfig, Result, StudioError};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/*
Lookahead Scheduling
====================

Two clocks are involved and they must not be confused:

  control clock   the periodic check (a tokio interval). Jittery: it fires
                  whenever the runtime gets around to it.

  audio clock     the graph's frame counter, advanced by the device. Exact.

Every step is stamped with an audio-clock time. The periodic check only
decides WHEN those stamps get handed out, never what they are. Each check
looks `schedule_ahead` seconds into the audio future and emits every step
boundary that falls inside that window:

  audio clock ─────────────────────────────────────────────────────────►
                  now                     now + schedule_ahead
                   │◄──────── window ──────────►│
                   │     ▼          ▼           │    ▼
                   │   step 4     step 5        │  step 6 (next check)
                   │
        check ─────┴──── 100 ms ────┬──── 100 ms ────┬────
                                    check            check

With a 100 ms check and a 200 ms window every step is committed at least
100 ms before it sounds, so a late check costs nothing. The cursor
`next_time` only ever moves forward by one step duration, so the emitted
times are strictly increasing and no step is emitted twice.

    step_duration = 60 / tempo / steps_per_beat

Tempo is read fresh for every step, so a change lands on the next step
boundary that has not been emitted yet.


Late Checks
-----------

If the control side stalls long enough for the cursor to fall behind the
audio clock, emitting the backlog would schedule notes in the past. The
scheduler instead moves the cursor to `now + start_offset` and carries on
from the same step index, logging a warning.
*/

/// Observable transport snapshot.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransportState {
    /// Beats per minute
    pub tempo: f64,
    pub is_playing: bool,
    /// Step the next emitted tick will carry
    pub current_step: u32,
    pub loop_start: u32,
    /// Exclusive
    pub loop_end: u32,
    pub steps_per_beat: u32,
}

/// One step boundary, stamped on the audio clock.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepTick {
    pub step: u32,
    /// Audio-clock seconds
    pub time: f64,
    /// Seconds until the following step
    pub duration: f64,
}

fn validate_tempo(bpm: f64) -> Result<()> {
    if bpm.is_finite() && bpm > 0.0 {
        Ok(())
    } else {
        Err(StudioError::InvalidTempo(bpm))
    }
}

fn validate_loop(start: u32, end: u32) -> Result<()> {
    if end > start {
        Ok(())
    } else {
        Err(StudioError::InvalidParam(format!(
            "loop end {end} must be greater than loop start {start}"
        )))
    }
}

/// The scheduling state machine, free of timers and locks.
///
/// `Transport` drives it from a periodic task; tests drive it directly.
#[derive(Debug, Clone)]
pub struct Scheduler {
    state: TransportState,
    next_time: f64,
    schedule_ahead: f64,
    start_offset: f64,
}

impl Scheduler {
    pub fn new(config: &EngineConfig) -> Result<Self> {
        validate_tempo(config.tempo)?;
        validate_loop(config.loop_start, config.loop_end)?;
        if config.steps_per_beat == 0 {
            return Err(StudioError::InvalidParam("steps per beat must be positive".into()));
        }

        Ok(Self {
            state: TransportState {
                tempo: config.tempo,
                is_playing: false,
                current_step: config.loop_start,
                loop_start: config.loop_start,
                loop_end: config.loop_end,
                steps_per_beat: config.steps_per_beat,
            },
            next_time: 0.0,
            schedule_ahead: config.schedule_ahead.max(0.0),
            start_offset: config.start_offset.max(0.0),
        })
    }

    pub fn state(&self) -> TransportState {
        self.state
    }

    pub fn is_playing(&self) -> bool {
        self.state.is_playing
    }

    pub fn current_step(&self) -> u32 {
        self.state.current_step
    }

    /// Audio-clock time of the next step to be emitted.
    pub fn next_time(&self) -> f64 {
        self.next_time
    }

    pub fn step_duration(&self) -> f64 {
        60.0 / self.state.tempo / self.state.steps_per_beat as f64
    }

    /// Begin advancing. Returns false if already playing.
    pub fn start(&mut self, now: f64) -> bool {
        if self.state.is_playing {
            return false;
        }
        self.state.is_playing = true;
        self.next_time = now + self.start_offset;
        true
    }

    /// Halt advancement, keeping the current step. Returns false if already
    /// stopped.
    pub fn stop(&mut self) -> bool {
        if !self.state.is_playing {
            return false;
        }
        self.state.is_playing = false;
        true
    }

    /// Rejects non-positive and non-finite tempos, keeping the old one.
    pub fn set_tempo(&mut self, bpm: f64) -> Result<()> {
        validate_tempo(bpm)?;
        self.state.tempo = bpm;
        Ok(())
    }

    /// Set loop bounds (`end` exclusive). A current step outside the new
    /// range jumps to `start`.
    pub fn set_loop(&mut self, start: u32, end: u32) -> Result<()> {
        validate_loop(start, end)?;
        self.state.loop_start = start;
        self.state.loop_end = end;
        if !(start..end).contains(&self.state.current_step) {
            self.state.current_step = start;
        }
        Ok(())
    }

    pub fn set_steps_per_beat(&mut self, steps: u32) -> Result<()> {
        if steps == 0 {
            return Err(StudioError::InvalidParam("steps per beat must be positive".into()));
        }
        self.state.steps_per_beat = steps;
        Ok(())
    }

    fn following_step(&self, step: u32) -> u32 {
        let next = step + 1;
        if next >= self.state.loop_end || next < self.state.loop_start {
            self.state.loop_start
        } else {
            next
        }
    }

    /// Emit every step boundary inside `[now, now + schedule_ahead)` and
    /// return how many were emitted.
    pub fn advance(&mut self, now: f64, mut emit: impl FnMut(StepTick)) -> usize {
        if !self.state.is_playing {
            return 0;
        }

        if self.next_time < now {
            let behind = now - self.next_time;
            warn!(behind, step = self.state.current_step, "transport fell behind the audio clock; resyncing");
            self.next_time = now + self.start_offset;
        }

        let horizon = now + self.schedule_ahead;
        let mut emitted = 0;
        while self.next_time < horizon {
            let duration = self.step_duration();
            let tick = StepTick {
                step: self.state.current_step,
                time: self.next_time,
                duration,
            };
            trace!(step = tick.step, time = tick.time, "step");
            emit(tick);

            self.state.current_step = self.following_step(self.state.current_step);
            self.next_time += duration;
            emitted += 1;
        }
        emitted
    }
}

/// Receives every emitted step, in order.
pub type StepCallback = Box<dyn FnMut(StepTick) + Send>;

struct TransportShared {
    context: AudioContext,
    scheduler: Mutex<Scheduler>,
    callback: Mutex<Option<StepCallback>>,
    /// Held across advancing and delivery, so concurrent checks hand out
    /// their batches in step order.
    ticking: Mutex<()>,
    task: Mutex<Option<JoinHandle<()>>>,
    state_tx: watch::Sender<TransportState>,
    interval: Duration,
}

impl Drop for TransportShared {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().take() {
            task.abort();
        }
    }
}

/// Shared transport handle. Clones control the same scheduler.
///
/// While playing, a tokio interval task calls [`Transport::tick`] every
/// `lookahead_interval`. The task holds only a weak reference, so dropping
/// the last handle ends it.
#[derive(Clone)]
pub struct Transport {
    shared: Arc<TransportShared>,
}

impl Transport {
    pub fn new(context: AudioContext, config: &EngineConfig) -> Result<Self> {
        let scheduler = Scheduler::new(config)?;
        let (state_tx, _) = watch::channel(scheduler.state());
        Ok(Self {
            shared: Arc::new(TransportShared {
                context,
                scheduler: Mutex::new(scheduler),
                callback: Mutex::new(None),
                ticking: Mutex::new(()),
                task: Mutex::new(None),
                state_tx,
                interval: config.lookahead_interval.max(Duration::from_millis(1)),
            }),
        })
    }

    /// Register the step callback, replacing any previous one.
    ///
    /// The callback runs on the transport task. It must not register or
    /// clear callbacks, or call [`Transport::tick`], itself.
    pub fn on_step(&self, callback: impl FnMut(StepTick) + Send + 'static) {
        *self.shared.callback.lock() = Some(Box::new(callback));
    }

    pub fn clear_step_callback(&self) {
        *self.shared.callback.lock() = None;
    }

    pub fn state(&self) -> TransportState {
        self.shared.scheduler.lock().state()
    }

    pub fn is_playing(&self) -> bool {
        self.shared.scheduler.lock().is_playing()
    }

    pub fn current_step(&self) -> u32 {
        self.shared.scheduler.lock().current_step()
    }

    pub fn step_duration(&self) -> f64 {
        self.shared.scheduler.lock().step_duration()
    }

    /// Watch transport state changes (play/stop, tempo, loop, step).
    pub fn subscribe(&self) -> watch::Receiver<TransportState> {
        self.shared.state_tx.subscribe()
    }

    /// Start advancing from the current step. A no-op while playing.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) -> Result<()> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| StudioError::Runtime(e.to_string()))?;

        let now = self.shared.context.current_time();
        let started = self.shared.scheduler.lock().start(now);
        if !started {
            return Ok(());
        }

        let weak: Weak<TransportShared> = Arc::downgrade(&self.shared);
        let period = self.shared.interval;
        let task = runtime.spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                let Some(shared) = weak.upgrade() else {
                    break;
                };
                Transport { shared }.tick();
            }
        });

        if let Some(previous) = self.shared.task.lock().replace(task) {
            previous.abort();
        }
        debug!(time = now, "transport started");
        self.publish();
        Ok(())
    }

    /// Stop advancing. Steps already handed to the graph still sound.
    pub fn stop(&self) {
        let stopped = self.shared.scheduler.lock().stop();
        if let Some(task) = self.shared.task.lock().take() {
            task.abort();
        }
        if stopped {
            debug!(step = self.current_step(), "transport stopped");
            self.publish();
        }
    }

    pub fn set_tempo(&self, bpm: f64) -> Result<()> {
        let result = self.shared.scheduler.lock().set_tempo(bpm);
        match &result {
            Ok(()) => self.publish(),
            Err(_) => warn!(bpm, "rejected tempo change"),
        }
        result
    }

    pub fn set_loop(&self, start: u32, end: u32) -> Result<()> {
        self.shared.scheduler.lock().set_loop(start, end)?;
        self.publish();
        Ok(())
    }

    pub fn set_steps_per_beat(&self, steps: u32) -> Result<()> {
        self.shared.scheduler.lock().set_steps_per_beat(steps)?;
        self.publish();
        Ok(())
    }

    /// Run one lookahead check against the audio clock now. Returns the
    /// number of steps emitted.
    ///
    /// Safe to call from several threads; must not be called from inside
    /// the step callback.
    pub fn tick(&self) -> usize {
        let _ticking = self.shared.ticking.lock();
        let now = self.shared.context.current_time();
        let mut ticks = Vec::new();
        self.shared
            .scheduler
            .lock()
            .advance(now, |tick| ticks.push(tick));

        if ticks.is_empty() {
            return 0;
        }

        // Scheduler lock released: the callback may read transport state
        if let Some(callback) = self.shared.callback.lock().as_mut() {
            for &tick in &ticks {
                callback(tick);
            }
        }
        self.publish();
        ticks.len()
    }

    fn publish(&self) {
        let state = self.state();
        self.shared.state_tx.send_replace(state);
    }
}
