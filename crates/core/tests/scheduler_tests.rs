//! Integration test for the scheduler (C6), driven by a fake `Clock` and a
//! recording `Voice`, mirroring the teacher's `tests/common/mod.rs`
//! helper-module pattern.

use keyboardia_core::scheduler::TICK_INTERVAL_SECS;
use keyboardia_core::session::{LoopRegion, Track};
use keyboardia_core::{Clock, Scheduler, Session, Trigger, Voice};

mod common;
use common::{FakeClock, RecordingVoice};

#[test]
fn four_on_the_floor_over_two_seconds_of_fake_clock_ticks() {
    let mut session = Session::default();
    session.tempo = 120;
    let mut track = Track::new("kick", "Kick", "808kick");
    track.step_count = 16;
    for i in [0, 4, 8, 12] {
        track.steps[i] = true;
    }
    session.tracks.push(track);

    let mut scheduler = Scheduler::new();
    let mut voice = RecordingVoice::default();
    let mut clock = FakeClock::new(0.0);
    scheduler.start(clock.current_audio_time(), 120);

    while clock.current_audio_time() < 2.0 {
        scheduler.tick(&session, clock.current_audio_time(), &mut voice);
        clock.advance(TICK_INTERVAL_SECS);
    }

    let times: Vec<f64> = voice.triggers.iter().map(|t: &Trigger| t.scheduled_audio_time).collect();
    for expected in [0.0, 0.5, 1.0, 1.5] {
        assert!(times.iter().any(|t| (t - expected).abs() < 0.001), "missing trigger near {expected}, got {times:?}");
    }
}

#[test]
fn loop_region_keeps_the_scheduler_inside_its_bounds_across_many_ticks() {
    let mut session = Session::default();
    session.loop_region = Some(LoopRegion { start: 4, end: 7 });
    let mut track = Track::new("t1", "T", "x");
    track.step_count = 128;
    for step in &mut track.steps {
        *step = true;
    }
    session.tracks.push(track);

    let mut scheduler = Scheduler::new();
    let mut voice = RecordingVoice::default();
    let mut clock = FakeClock::new(0.0);
    scheduler.start(clock.current_audio_time(), 120);

    for _ in 0..64 {
        scheduler.tick(&session, clock.current_audio_time(), &mut voice);
        clock.advance(TICK_INTERVAL_SECS);
    }

    assert!(scheduler.global_step() >= 4 && scheduler.global_step() <= 7);
}

#[test]
fn stop_cancels_the_voice_and_resets_the_cursor() {
    let mut session = Session::default();
    let mut track = Track::new("t1", "T", "x");
    track.step_count = 4;
    track.steps[0] = true;
    session.tracks.push(track);

    let mut scheduler = Scheduler::new();
    let mut voice = RecordingVoice::default();
    let clock = FakeClock::new(0.0);
    scheduler.start(clock.current_audio_time(), 120);
    scheduler.tick(&session, clock.current_audio_time(), &mut voice);
    assert!(!voice.triggers.is_empty());

    voice.cancel_all();
    scheduler.stop();
    assert!(voice.triggers.is_empty());
    assert_eq!(scheduler.global_step(), 0);
    assert!(!scheduler.is_running());
}
