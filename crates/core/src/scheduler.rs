//! The deterministic step scheduler (C6): a lookahead loop that converts
//! session state into precisely-timed voice triggers.

use crate::session::{Session, Track, MAX_STEPS};
use crate::timing::{advance_step, step_duration, swing_delay, tied_duration};

/// How far ahead of "now" the scheduler schedules triggers.
pub const LOOKAHEAD_SECS: f64 = 0.100;
/// How often the scheduler wakes up to look for steps to schedule.
pub const TICK_INTERVAL_SECS: f64 = 0.025;

/// A single note event handed to the voice interface (§6.3).
#[derive(Debug, Clone, PartialEq)]
pub struct Trigger {
    pub track_id: String,
    pub sample_id: String,
    pub midi_pitch: i16,
    pub duration_secs: f64,
    pub velocity: f32,
    pub scheduled_audio_time: f64,
}

/// Host-supplied monotonic audio clock (§6.4).
pub trait Clock {
    fn current_audio_time(&self) -> f64;
}

/// The opaque voice interface (§6.3). The scheduler never inspects a
/// voice's internals; it only calls these entry points.
pub trait Voice {
    fn is_ready(&self, sample_id: &str) -> bool;
    fn trigger(&mut self, trigger: Trigger);
    fn cancel_all(&mut self);
}

/// The scheduler's own timing cursor. Exclusively owned by the scheduler
/// (see SPEC_FULL §9 "Ownership").
pub struct Scheduler {
    global_step: u16,
    audio_start_time: f64,
    total_steps_scheduled: u64,
    tempo: u16,
    running: bool,
}

impl Default for Scheduler {
    fn default() -> Self {
        Scheduler {
            global_step: 0,
            audio_start_time: 0.0,
            total_steps_scheduled: 0,
            tempo: 120,
            running: false,
        }
    }
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn global_step(&self) -> u16 {
        self.global_step
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn total_steps_scheduled(&self) -> u64 {
        self.total_steps_scheduled
    }

    /// Starts playback: the next step is scheduled at `now`.
    pub fn start(&mut self, now: f64, tempo: u16) {
        self.tempo = tempo;
        self.audio_start_time = now - (self.total_steps_scheduled as f64) * step_duration(tempo);
        self.running = true;
    }

    /// Stops playback: resets the timing cursor and global step per §4.6
    /// "Cancellation". Callers are responsible for calling
    /// `Voice::cancel_all` themselves -- the scheduler only owns its own
    /// cursor, not the voice's in-flight notes.
    pub fn stop(&mut self) {
        self.running = false;
        self.global_step = 0;
        self.audio_start_time = 0.0;
        self.total_steps_scheduled = 0;
    }

    /// Applies a tempo change without flooding or gapping notes: the next
    /// step's scheduled time is pinned to `now` by recomputing
    /// `audio_start_time` from the *current* absolute step count and audio
    /// time only (SPEC_FULL §4.6, §9 "Cycles").
    pub fn set_tempo(&mut self, tempo: u16, now: f64) {
        if self.running {
            self.audio_start_time = now - (self.total_steps_scheduled as f64) * step_duration(tempo);
        }
        self.tempo = tempo;
    }

    /// The scheduled audio time of the `absolute_step`th step ever
    /// scheduled. Deliberately takes the monotonic `total_steps_scheduled`
    /// count rather than the wrapping pattern-position `global_step` --
    /// `global_step` resets/wraps (at `MAX_STEPS` or at a loop region's
    /// bounds) while the timeline itself never does.
    fn step_time(&self, absolute_step: u64) -> f64 {
        self.audio_start_time + (absolute_step as f64) * step_duration(self.tempo)
    }

    /// Schedules every step whose audio time falls within
    /// `[now, now + LOOKAHEAD_SECS]`, advancing the global step counter
    /// (respecting `loop_region`) and emitting triggers to `voice` for
    /// every audible, active-or-tied-extended track.
    ///
    /// Returns the triggers emitted this tick (also handed to `voice`), for
    /// callers that want to observe scheduling without a stateful `Voice`.
    pub fn tick(&mut self, session: &Session, now: f64, voice: &mut dyn Voice) -> Vec<Trigger> {
        if !self.running {
            return Vec::new();
        }
        let mut emitted = Vec::new();
        let any_soloed = session.any_soloed();

        loop {
            let t = self.step_time(self.total_steps_scheduled);
            if t > now + LOOKAHEAD_SECS {
                break;
            }

            for track in session.tracks.iter() {
                if let Some(trigger) =
                    self.trigger_for_track(track, self.global_step, t, any_soloed, session.swing)
                {
                    if voice.is_ready(&track.sample_id) {
                        voice.trigger(trigger.clone());
                        emitted.push(trigger);
                    }
                }
            }

            self.total_steps_scheduled += 1;
            self.global_step = advance_step(self.global_step, session.loop_region);
        }

        emitted
    }

    fn trigger_for_track(
        &self,
        track: &Track,
        global_step: u16,
        scheduled_time: f64,
        any_soloed: bool,
        global_swing: u8,
    ) -> Option<Trigger> {
        if track.step_count == 0 || !track.is_audible(any_soloed) {
            return None;
        }
        let local_step = global_step % track.step_count;
        let idx = local_step as usize;
        if idx >= MAX_STEPS {
            return None;
        }

        let triggered = track.steps[idx];
        let lock = track.parameter_locks[idx];
        let is_tie_only = !triggered && lock.map(|l| l.tie).unwrap_or(false);
        if !triggered || is_tie_only {
            // A tie-only slot is an extension of a previous attack, not a
            // new trigger; a silent slot with no lock produces nothing.
            return None;
        }

        let duration = self.duration_for(track, local_step);
        let delay = swing_delay(local_step, global_swing, track.swing, step_duration(self.tempo));
        let pitch_lock = lock.and_then(|l| l.pitch).unwrap_or(0);
        let volume_lock = lock.and_then(|l| l.volume).unwrap_or(1.0);

        Some(Trigger {
            track_id: track.id.clone(),
            sample_id: track.sample_id.clone(),
            midi_pitch: 60 + track.transpose as i16 + pitch_lock as i16,
            duration_secs: duration,
            velocity: (track.volume * volume_lock).clamp(0.0, 1.0),
            scheduled_audio_time: scheduled_time + delay,
        })
    }

    fn duration_for(&self, track: &Track, local_step: u16) -> f64 {
        tied_duration(track, local_step, track.step_count, step_duration(self.tempo))
    }
}
