use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded};
use log::{debug, warn};
use parking_lot::Mutex;

use crate::dmx_output::OutputInterface;
use crate::dmx_types::{Cue, CueError, CueTiming, channel_index, clamp_level};
use crate::patch::{PatchOption, PatchTable};

/// Time between two fade steps, at most 40 frames per second.
pub const FADE_TICK: Duration = Duration::from_millis(25);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FadeOutcome {
    /// Ran until its times were over
    Completed,
    /// Interrupted by a stop
    Stopped,
}

/// Receives fade events. Calls come from the fade thread, except
/// `on_fade_start` which runs on the caller of `start_fade_to`.
pub trait FadeObserver: Send + Sync {
    fn on_fade_start(&self, _cue: f64) {}
    fn on_fade_progress(&self, _elapsed: Duration) {}
    fn on_fade_complete(&self, _cue: f64, _outcome: FadeOutcome) {}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum StopSignal {
    /// A new fade takes over, the observer is not told
    Silent,
    Stop,
}

/// Progress (0.0 - 1.0) of one group of channels after `elapsed` seconds.
pub fn fade_progress(elapsed: f64, wait: f64, time: f64) -> f64 {
    let running = elapsed - wait;
    if running <= 0.0 {
        0.0
    } else if time > 0.0 {
        (running / time).min(1.0)
    } else {
        1.0
    }
}

struct LiveState {
    cue: Cue,
    initial: Vec<f64>,
    delta: Vec<f64>,
    target: Vec<f64>,
    /// 0.0 - 1.0
    master: f64,
    stopped: bool,
    fading: bool,
    /// Bumped by every fade start; a fade thread only steps its own generation.
    generation: u64,
    patch: PatchTable,
}

impl LiveState {
    fn prepare(&mut self, cue: &Cue) {
        self.cue.number = cue.number;
        self.cue.timing = cue.timing.sanitized();
        for (idx, live) in self.cue.livestate.iter().enumerate() {
            let target = cue.livestate.get(idx).copied().unwrap_or(0.0);
            self.initial[idx] = *live;
            self.target[idx] = target;
            self.delta[idx] = target - live;
        }
        self.stopped = false;
        self.fading = true;
        self.generation = self.generation.wrapping_add(1);
    }

    /// Computes the levels `elapsed` seconds into the fade.
    /// Returns false once the fade is over.
    fn step(&mut self, elapsed: f64) -> bool {
        let t = self.cue.timing;
        let finished =
            (elapsed - t.waituptime) >= t.uptime && (elapsed - t.waitdowntime) >= t.downtime;
        if finished {
            self.cue.livestate.copy_from_slice(&self.target);
        } else {
            let up = fade_progress(elapsed, t.waituptime, t.uptime);
            let down = fade_progress(elapsed, t.waitdowntime, t.downtime);
            for idx in 0..self.cue.livestate.len() {
                // unchanged channels belong to the down group
                let progress = if self.delta[idx] > 0.0 { up } else { down };
                self.cue.livestate[idx] = if progress >= 1.0 {
                    self.target[idx]
                } else {
                    self.initial[idx] + progress * self.delta[idx]
                };
            }
        }
        let mut running = !finished;
        if t.has_follow() {
            running = running && elapsed < t.followtime;
        }
        running
    }

    fn frame(&self) -> Vec<u8> {
        self.patch.translate(&self.cue.livestate, self.master)
    }
}

struct FadeHandle {
    stop: Sender<StopSignal>,
    handle: JoinHandle<()>,
}

struct LiveInner {
    state: Mutex<LiveState>,
    output: Mutex<Option<Arc<dyn OutputInterface>>>,
    fade: Mutex<Option<FadeHandle>>,
}

impl LiveInner {
    fn push_frame(&self, frame: &[u8]) {
        let output = self.output.lock().clone();
        if let Some(output) = output {
            output.set_values(frame);
            if let Err(e) = output.send_now() {
                warn!("Could not write to DMX output: {e}");
            }
        }
    }
}

/// The live output state and its fade scheduler.
///
/// Levels are percentages per channel. Every change is translated through the
/// patch into a DMX frame and written to the output. At most one fade runs at a
/// time; starting a new one replaces the running fade without telling its
/// observer.
#[derive(Clone)]
pub struct LiveCue {
    inner: Arc<LiveInner>,
}

impl LiveCue {
    pub fn new(channels: usize, addresses: usize) -> Self {
        let state = LiveState {
            cue: Cue::new(0.0, channels),
            initial: vec![0.0; channels],
            delta: vec![0.0; channels],
            target: vec![0.0; channels],
            master: 1.0,
            stopped: false,
            fading: false,
            generation: 0,
            patch: PatchTable::new(channels, addresses),
        };
        Self {
            inner: Arc::new(LiveInner {
                state: Mutex::new(state),
                output: Mutex::new(None),
                fade: Mutex::new(None),
            }),
        }
    }

    pub fn channels(&self) -> usize {
        self.inner.state.lock().cue.channels()
    }

    pub fn set_output(&self, output: Option<Arc<dyn OutputInterface>>) {
        *self.inner.output.lock() = output;
    }

    pub fn output(&self) -> Option<Arc<dyn OutputInterface>> {
        self.inner.output.lock().clone()
    }

    /// Translates the live levels and sends them.
    pub fn write_to_output(&self) {
        let frame = self.current_frame();
        self.inner.push_frame(&frame);
    }

    /// The DMX frame for the current levels and master.
    pub fn current_frame(&self) -> Vec<u8> {
        self.inner.state.lock().frame()
    }

    /// Starts fading from the live levels to `cue`.
    pub fn start_fade_to(&self, cue: &Cue, observer: Option<Arc<dyn FadeObserver>>) {
        self.stop_with(StopSignal::Silent);
        let generation = {
            let mut state = self.inner.state.lock();
            state.prepare(cue);
            state.generation
        };
        debug!("Fading to cue {}", cue.number);
        if let Some(observer) = &observer {
            observer.on_fade_start(cue.number);
        }

        let number = cue.number;
        let (stop, stop_rx) = bounded(1);
        let inner = self.inner.clone();
        // the slot stays locked until the handle is stored, so the thread
        // always finds its own handle when it finishes
        let mut fade = self.inner.fade.lock();
        let spawned = thread::Builder::new()
            .name("fade".to_string())
            .spawn(move || run_fade(inner, stop_rx, observer, number, generation));
        let previous = match spawned {
            Ok(handle) => fade.replace(FadeHandle { stop, handle }),
            Err(e) => {
                warn!("Could not start fade thread: {e}");
                self.inner.state.lock().fading = false;
                None
            }
        };
        // a fade started concurrently by another caller
        if let Some(previous) = &previous {
            let _ = previous.stop.try_send(StopSignal::Silent);
        }
        drop(fade);
        if let Some(previous) = previous {
            join_fade(previous);
        }
    }

    fn stop_with(&self, signal: StopSignal) {
        let handle = {
            let mut fade = self.inner.fade.lock();
            let handle = fade.take();
            if let Some(handle) = &handle {
                let _ = handle.stop.try_send(signal);
            }
            handle
        };
        if let Some(handle) = handle {
            join_fade(handle);
        }
    }

    /// Stops a running fade and waits for its thread to end.
    pub fn stop_fading(&self) {
        self.stop_with(StopSignal::Stop);
    }

    /// Stops the fade where it is and cancels its follow-on.
    pub fn stop(&self) {
        {
            let mut state = self.inner.state.lock();
            state.stopped = true;
            if state.fading {
                state.cue.timing.followtime = -1.0;
            }
        }
        self.stop_fading();
    }

    pub fn is_fading(&self) -> bool {
        self.inner.state.lock().fading
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.state.lock().stopped
    }

    /// Sets a channel (1-based). While fading, the channel leaves the fade and
    /// holds the new level.
    pub fn set_level(&self, channel: usize, level: f64) -> Result<(), CueError> {
        let level = clamp_level(level);
        let frame = {
            let mut state = self.inner.state.lock();
            let idx = channel_index(channel, state.cue.channels())?;
            if state.fading {
                state.delta[idx] = 0.0;
                state.initial[idx] = level;
                state.target[idx] = level;
                None
            } else {
                state.cue.livestate[idx] = level;
                Some(state.frame())
            }
        };
        if let Some(frame) = frame {
            self.inner.push_frame(&frame);
        }
        Ok(())
    }

    /// Sets the channel patched to `address` (1-based).
    pub fn set_dimmer_level(&self, address: usize, level: f64) -> Result<(), CueError> {
        let channel = self
            .inner
            .state
            .lock()
            .patch
            .channel_for_address(address)
            .ok_or(CueError::UnpatchedAddress(address))?;
        self.set_level(channel, level)
    }

    pub fn level(&self, channel: usize) -> Option<f64> {
        self.inner.state.lock().cue.level(channel)
    }

    pub fn levels(&self) -> Vec<f64> {
        self.inner.state.lock().cue.livestate.clone()
    }

    /// Master as a percentage.
    pub fn master(&self) -> f64 {
        self.inner.state.lock().master * 100.0
    }

    pub fn set_master(&self, percent: f64) {
        let frame = {
            let mut state = self.inner.state.lock();
            state.master = clamp_level(percent) / 100.0;
            (!state.fading).then(|| state.frame())
        };
        if let Some(frame) = frame {
            self.inner.push_frame(&frame);
        }
    }

    /// Number of the cue last faded to.
    pub fn number(&self) -> f64 {
        self.inner.state.lock().cue.number
    }

    pub fn timing(&self) -> CueTiming {
        self.inner.state.lock().cue.timing
    }

    /// The live levels as a cue, ready to be recorded.
    pub fn snapshot(&self) -> Cue {
        self.inner.state.lock().cue.clone()
    }

    /// `percent` is the patch level, 0 - 100.
    pub fn patch_address(
        &self,
        address: usize,
        channel: usize,
        percent: f64,
        option: PatchOption,
    ) -> Result<(), CueError> {
        self.inner
            .state
            .lock()
            .patch
            .patch(address, channel, percent / 100.0, option)
    }

    pub fn set_option_for_address(
        &self,
        address: usize,
        option: PatchOption,
        percent: Option<f64>,
    ) -> Result<(), CueError> {
        self.inner
            .state
            .lock()
            .patch
            .set_option(address, option, percent.map(|p| p / 100.0))
    }

    pub fn clear_patch(&self) {
        self.inner.state.lock().patch.unpatch_all();
    }

    pub fn patch_snapshot(&self) -> PatchTable {
        self.inner.state.lock().patch.clone()
    }
}

fn join_fade(fade: FadeHandle) {
    // an observer running on the fade thread may stop its own fade
    if fade.handle.thread().id() == thread::current().id() {
        return;
    }
    if fade.handle.join().is_err() {
        warn!("Fade thread panicked");
    }
}

fn run_fade(
    inner: Arc<LiveInner>,
    stop: Receiver<StopSignal>,
    observer: Option<Arc<dyn FadeObserver>>,
    number: f64,
    generation: u64,
) {
    let start = Instant::now();
    let mut outcome = loop {
        let elapsed = start.elapsed();
        let step = {
            let mut state = inner.state.lock();
            if state.generation != generation {
                None
            } else {
                let running = state.step(elapsed.as_secs_f64());
                if !running {
                    state.fading = false;
                }
                Some((running, state.frame()))
            }
        };
        let Some((running, frame)) = step else {
            break None;
        };
        inner.push_frame(&frame);
        if let Some(observer) = &observer {
            observer.on_fade_progress(elapsed);
        }
        if !running {
            break Some(FadeOutcome::Completed);
        }
        match stop.recv_timeout(FADE_TICK) {
            Err(RecvTimeoutError::Timeout) => {}
            Ok(StopSignal::Silent) => break None,
            Ok(StopSignal::Stop) | Err(RecvTimeoutError::Disconnected) => {
                break Some(FadeOutcome::Stopped);
            }
        }
    };

    {
        let mut fade = inner.fade.lock();
        let own = fade
            .as_ref()
            .is_some_and(|f| f.handle.thread().id() == thread::current().id());
        if own {
            *fade = None;
        } else if outcome == Some(FadeOutcome::Completed) {
            // taken by a stopper, whose signal is already queued
            outcome = match stop.try_recv() {
                Ok(StopSignal::Stop) => Some(FadeOutcome::Stopped),
                _ => None,
            };
        }
    }
    if outcome == Some(FadeOutcome::Stopped) {
        let mut state = inner.state.lock();
        if state.generation == generation {
            state.fading = false;
        }
    }

    if let (Some(outcome), Some(observer)) = (outcome, observer) {
        observer.on_fade_complete(number, outcome);
    }
}
