//! Test helpers shared by the core crate's integration tests.

use keyboardia_core::{Clock, Trigger, Voice};

/// A clock that advances only when told to, so scheduler tests are
/// deterministic instead of depending on wall-clock time.
pub struct FakeClock {
    now: f64,
}

impl FakeClock {
    pub fn new(start: f64) -> Self {
        FakeClock { now: start }
    }

    pub fn advance(&mut self, secs: f64) {
        self.now += secs;
    }
}

impl Clock for FakeClock {
    fn current_audio_time(&self) -> f64 {
        self.now
    }
}

/// A voice collaborator that just records every trigger it receives.
#[derive(Default)]
pub struct RecordingVoice {
    pub triggers: Vec<Trigger>,
}

impl Voice for RecordingVoice {
    fn is_ready(&self, _sample_id: &str) -> bool {
        true
    }

    fn trigger(&mut self, trigger: Trigger) {
        self.triggers.push(trigger);
    }

    fn cancel_all(&mut self) {
        self.triggers.clear();
    }
}
