//! Pure timing calculations (C7). No I/O, no clocks -- these are the
//! property-test surface named in SPEC_FULL §8.

use crate::session::{LoopRegion, Track, MAX_STEPS, MAX_TEMPO, MAX_TRANSPOSE, MIN_TEMPO, MIN_TRANSPOSE};

/// Duration in seconds of one 16th-note step at `tempo` BPM.
pub fn step_duration(tempo: u16) -> f64 {
    60.0 / (tempo as f64 * 4.0)
}

pub fn clamp_tempo(tempo: u16) -> u16 {
    tempo.clamp(MIN_TEMPO, MAX_TEMPO)
}

pub fn clamp_swing(swing: u8) -> u8 {
    swing.min(100)
}

pub fn clamp_volume(volume: f32) -> f32 {
    volume.clamp(0.0, 1.0)
}

pub fn clamp_transpose(transpose: i8) -> i8 {
    transpose.clamp(MIN_TRANSPOSE, MAX_TRANSPOSE)
}

/// Blends a track's swing override with the session-wide swing: the track
/// override wins when non-zero, otherwise the global value applies.
pub fn blend_swing(global_swing: u8, track_swing: Option<u8>) -> u8 {
    match track_swing {
        Some(s) if s != 0 => s,
        _ => global_swing,
    }
}

/// Delay applied to an odd local step to produce a triplet feel. Even steps
/// never shift. Always in `[0, step_duration * 0.5]`.
pub fn swing_delay(local_step: u16, global_swing: u8, track_swing: Option<u8>, step_duration: f64) -> f64 {
    if local_step % 2 == 0 {
        return 0.0;
    }
    let swing = blend_swing(global_swing, track_swing).min(100) as f64 / 100.0;
    swing * step_duration * 0.5
}

/// Walks forward from `step` through consecutive tied, non-triggered local
/// slots (wrapping at `step_count`) and returns the sounding duration in
/// seconds: `tie_length * step_duration * 0.9`.
///
/// `step_count` bounds the walk (a polyrhythm's local loop length); the walk
/// never visits more than `step_count` slots so a fully-tied track still
/// terminates.
pub fn tied_duration(track: &Track, step: u16, step_count: u16, step_duration: f64) -> f64 {
    if step_count == 0 {
        return step_duration * 0.9;
    }
    let mut tie_length: u32 = 1;
    let mut cursor = (step + 1) % step_count;
    while cursor != step && (tie_length as u16) < step_count {
        let idx = cursor as usize;
        let is_tied = track
            .parameter_locks
            .get(idx)
            .and_then(|l| *l)
            .map(|l| l.tie)
            .unwrap_or(false);
        let is_triggered = track.steps.get(idx).copied().unwrap_or(false);
        if is_tied && !is_triggered {
            tie_length += 1;
            cursor = (cursor + 1) % step_count;
        } else {
            break;
        }
    }
    tie_length as f64 * step_duration * 0.9
}

/// Advances the global step counter `current` by one, respecting an
/// optional loop region (wraps `end + 1 -> start`) or the full `MAX_STEPS`
/// range when no loop region is set.
pub fn advance_step(current: u16, loop_region: Option<LoopRegion>) -> u16 {
    match loop_region {
        Some(region) if region.is_valid() => {
            if current >= region.end || current < region.start {
                region.start
            } else {
                current + 1
            }
        }
        _ => (current + 1) % MAX_STEPS as u16,
    }
}

pub fn is_step_in_loop(step: u16, loop_region: Option<LoopRegion>) -> bool {
    match loop_region {
        Some(region) if region.is_valid() => region.contains(step),
        _ => (step as usize) < MAX_STEPS,
    }
}
