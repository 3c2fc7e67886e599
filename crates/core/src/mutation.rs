//! The closed mutation vocabulary and the pure `apply_mutation` function.
//!
//! `apply_mutation` never fails: unknown, out-of-range, or invariant-violating
//! mutations return the state unchanged (see SPEC_FULL §7). Callers that need
//! to surface *why* a mutation didn't take (the server, before it broadcasts)
//! use `validate_mutation` first and echo `RejectReason` back to the
//! originator.

use serde::{Deserialize, Serialize};

use crate::session::{
    Effects, LoopRegion, ParameterLock, Scale, Session, Track, MAX_STEPS, MAX_TRACKS,
    VALID_STEP_COUNTS,
};
use crate::timing::{clamp_swing, clamp_tempo, clamp_transpose, clamp_volume};

/// The full closed set of mutations a session can undergo. Adding a variant
/// here without a matching arm in `sync::classify` is a compile error (see
/// `sync.rs`), which is how §4.2's exhaustiveness requirement is enforced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Mutation {
    ToggleStep { track_id: String, step: u16 },
    SetTempo { tempo: u16 },
    SetSwing { swing: u8 },
    SetTrackVolume { track_id: String, volume: f32 },
    SetTrackTranspose { track_id: String, transpose: i8 },
    SetTrackStepCount { track_id: String, step_count: u16 },
    AddTrack { track: Track },
    DeleteTrack { track_id: String },
    ClearTrack { track_id: String },
    SetTrackSample { track_id: String, sample_id: String, name: Option<String> },
    SetParameterLock { track_id: String, step: u16, lock: Option<ParameterLock> },
    CopySequence { source_track_id: String, target_track_id: String },
    MoveSequence { source_track_id: String, target_track_id: String },
    SetEffects { effects: Effects },
    SetScale { scale: Option<Scale> },
    SetSessionName { name: Option<String> },
    SetLoopRegion { loop_region: Option<LoopRegion> },
    RotateSteps { track_id: String, amount: i32 },
    InvertSteps { track_id: String },
    ReverseSteps { track_id: String },
    MirrorSteps { track_id: String },
    EuclideanFill { track_id: String, pulses: u16 },
    ReorderTracks { from_index: usize, to_index: usize },
    ReorderTrackById { track_id: String, before_track_id: Option<String> },
    /// Local-only in spirit (never synced, see `sync::classify`), but
    /// routed through the same pure `apply_mutation` path so the reducer
    /// bridge (C10) doesn't need a second state-update mechanism.
    SetTrackMuted { track_id: String, muted: bool },
    SetTrackSoloed { track_id: String, soloed: bool },
    /// Replaces the whole session (RESET_STATE / LOAD_STATE at the apply
    /// layer). Local-only field preservation across a `LoadState` is the
    /// reducer bridge's job (`keyboardia_client::reducer`), not this
    /// function's -- `apply_mutation` just installs the payload verbatim.
    LoadState { session: Box<Session> },
    ResetState,
}

/// Why a mutation was rejected. Never produced by `apply_mutation` itself
/// (which always succeeds); produced by `validate_mutation` for the
/// authority to echo back as `rejected(seq, reason)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum RejectReason {
    #[error("a track with this id already exists")]
    DuplicateTrackId,
    #[error("session already has the maximum number of tracks")]
    TrackLimitReached,
    #[error("target track does not exist")]
    UnknownTrack,
    #[error("step index is out of range")]
    StepOutOfRange,
    #[error("loop region start/end is invalid")]
    InvalidLoopRegion,
}

/// Checks whether `mutation` would be accepted without actually applying it.
/// Mirrors the subset of `apply_mutation`'s logic that can reject rather
/// than silently clamp or no-op.
pub fn validate_mutation(state: &Session, mutation: &Mutation) -> Result<(), RejectReason> {
    match mutation {
        Mutation::AddTrack { track } => {
            if state.tracks.iter().any(|t| t.id == track.id) {
                return Err(RejectReason::DuplicateTrackId);
            }
            if state.tracks.len() >= MAX_TRACKS {
                return Err(RejectReason::TrackLimitReached);
            }
            Ok(())
        }
        Mutation::ToggleStep { track_id, step } | Mutation::SetParameterLock { track_id, step, .. } => {
            if state.track(track_id).is_none() {
                return Err(RejectReason::UnknownTrack);
            }
            if (*step as usize) >= MAX_STEPS {
                return Err(RejectReason::StepOutOfRange);
            }
            Ok(())
        }
        Mutation::SetTrackVolume { track_id, .. }
        | Mutation::SetTrackTranspose { track_id, .. }
        | Mutation::SetTrackStepCount { track_id, .. }
        | Mutation::ClearTrack { track_id }
        | Mutation::SetTrackSample { track_id, .. }
        | Mutation::RotateSteps { track_id, .. }
        | Mutation::InvertSteps { track_id }
        | Mutation::ReverseSteps { track_id }
        | Mutation::MirrorSteps { track_id }
        | Mutation::EuclideanFill { track_id, .. }
        | Mutation::SetTrackMuted { track_id, .. }
        | Mutation::SetTrackSoloed { track_id, .. } => {
            if state.track(track_id).is_none() {
                return Err(RejectReason::UnknownTrack);
            }
            Ok(())
        }
        Mutation::CopySequence { source_track_id, target_track_id }
        | Mutation::MoveSequence { source_track_id, target_track_id } => {
            if state.track(source_track_id).is_none() || state.track(target_track_id).is_none() {
                return Err(RejectReason::UnknownTrack);
            }
            Ok(())
        }
        Mutation::SetLoopRegion { loop_region: Some(region) } => {
            if region.is_valid() {
                Ok(())
            } else {
                Err(RejectReason::InvalidLoopRegion)
            }
        }
        Mutation::DeleteTrack { .. }
        | Mutation::SetTempo { .. }
        | Mutation::SetSwing { .. }
        | Mutation::SetEffects { .. }
        | Mutation::SetScale { .. }
        | Mutation::SetSessionName { .. }
        | Mutation::SetLoopRegion { loop_region: None }
        | Mutation::ReorderTracks { .. }
        | Mutation::ReorderTrackById { .. }
        | Mutation::LoadState { .. }
        | Mutation::ResetState => Ok(()),
    }
}

/// Applies `mutation` to `state`, returning a new state. Pure: never
/// mutates `state` in place, always returns (even for malformed input,
/// in which case the returned state equals the input).
pub fn apply_mutation(state: &Session, mutation: &Mutation) -> Session {
    let mut next = state.clone();

    match mutation {
        Mutation::ToggleStep { track_id, step } => {
            if let Some(track) = next.track_mut(track_id) {
                if let Some(slot) = track.steps.get_mut(*step as usize) {
                    *slot = !*slot;
                }
            }
        }
        Mutation::SetTempo { tempo } => {
            next.tempo = clamp_tempo(*tempo);
        }
        Mutation::SetSwing { swing } => {
            next.swing = clamp_swing(*swing);
        }
        Mutation::SetTrackVolume { track_id, volume } => {
            if let Some(track) = next.track_mut(track_id) {
                track.volume = clamp_volume(*volume);
            }
        }
        Mutation::SetTrackTranspose { track_id, transpose } => {
            if let Some(track) = next.track_mut(track_id) {
                track.transpose = clamp_transpose(*transpose);
            }
        }
        Mutation::SetTrackStepCount { track_id, step_count } => {
            // Shrinking only moves the modulo bound the scheduler uses;
            // `steps`/`parameter_locks` stay MAX_STEPS long so a later
            // re-expansion restores the truncated tail.
            if let Some(track) = next.track_mut(track_id) {
                track.step_count = clamp_step_count(*step_count);
            }
        }
        Mutation::AddTrack { track } => {
            if !next.tracks.iter().any(|t| t.id == track.id) && next.tracks.len() < MAX_TRACKS {
                next.tracks.push(track.as_ref().clone());
            }
        }
        Mutation::DeleteTrack { track_id } => {
            next.tracks.retain(|t| &t.id != track_id);
        }
        Mutation::ClearTrack { track_id } => {
            if let Some(track) = next.track_mut(track_id) {
                track.steps.iter_mut().for_each(|s| *s = false);
                track.parameter_locks.iter_mut().for_each(|l| *l = None);
            }
        }
        Mutation::SetTrackSample { track_id, sample_id, name } => {
            if let Some(track) = next.track_mut(track_id) {
                track.sample_id = sample_id.clone();
                if let Some(name) = name {
                    track.name = name.clone();
                }
            }
        }
        Mutation::SetParameterLock { track_id, step, lock } => {
            if let Some(track) = next.track_mut(track_id) {
                if let Some(slot) = track.parameter_locks.get_mut(*step as usize) {
                    *slot = *lock;
                }
            }
        }
        Mutation::CopySequence { source_track_id, target_track_id } => {
            if let Some(source) = next.track(source_track_id) {
                let steps = source.steps.clone();
                let locks = source.parameter_locks.clone();
                let step_count = source.step_count;
                if let Some(target) = next.track_mut(target_track_id) {
                    target.steps = steps;
                    target.parameter_locks = locks;
                    target.step_count = step_count;
                }
            }
        }
        Mutation::MoveSequence { source_track_id, target_track_id } => {
            if let Some(source) = next.track(source_track_id) {
                let steps = source.steps.clone();
                let locks = source.parameter_locks.clone();
                let step_count = source.step_count;
                if let Some(target) = next.track_mut(target_track_id) {
                    target.steps = steps;
                    target.parameter_locks = locks;
                    target.step_count = step_count;
                }
                if let Some(source) = next.track_mut(source_track_id) {
                    source.steps.iter_mut().for_each(|s| *s = false);
                    source.parameter_locks.iter_mut().for_each(|l| *l = None);
                    source.step_count = 16;
                }
            }
        }
        Mutation::SetEffects { effects } => {
            next.effects = effects.clone();
        }
        Mutation::SetScale { scale } => {
            next.scale = scale.clone();
        }
        Mutation::SetSessionName { name } => {
            next.name = name.clone();
        }
        Mutation::SetLoopRegion { loop_region } => {
            next.loop_region = match loop_region {
                Some(region) if region.is_valid() => Some(*region),
                Some(_) => next.loop_region,
                None => None,
            };
        }
        Mutation::RotateSteps { track_id, amount } => {
            if let Some(track) = next.track_mut(track_id) {
                rotate_track(track, *amount);
            }
        }
        Mutation::InvertSteps { track_id } => {
            if let Some(track) = next.track_mut(track_id) {
                let n = track.step_count as usize;
                for i in 0..n.min(MAX_STEPS) {
                    track.steps[i] = !track.steps[i];
                }
            }
        }
        Mutation::ReverseSteps { track_id } => {
            if let Some(track) = next.track_mut(track_id) {
                let n = (track.step_count as usize).min(MAX_STEPS);
                track.steps[..n].reverse();
                track.parameter_locks[..n].reverse();
            }
        }
        Mutation::MirrorSteps { track_id } => {
            if let Some(track) = next.track_mut(track_id) {
                let n = (track.step_count as usize).min(MAX_STEPS);
                for i in 0..n / 2 {
                    let mirror = n - 1 - i;
                    let a = track.steps[i] || track.steps[mirror];
                    track.steps[i] = a;
                    track.steps[mirror] = a;
                }
            }
        }
        Mutation::EuclideanFill { track_id, pulses } => {
            if let Some(track) = next.track_mut(track_id) {
                let n = (track.step_count as usize).min(MAX_STEPS);
                let pattern = euclidean_pattern(n, (*pulses as usize).min(n));
                for i in 0..n {
                    track.steps[i] = pattern[i];
                }
            }
        }
        Mutation::ReorderTracks { from_index, to_index } => {
            if *from_index < next.tracks.len() && *to_index < next.tracks.len() {
                let track = next.tracks.remove(*from_index);
                next.tracks.insert(*to_index, track);
            }
        }
        Mutation::ReorderTrackById { track_id, before_track_id } => {
            if let Some(from) = next.track_index(track_id) {
                let track = next.tracks.remove(from);
                let to = match before_track_id {
                    Some(before) => next.track_index(before).unwrap_or(next.tracks.len()),
                    None => next.tracks.len(),
                };
                next.tracks.insert(to.min(next.tracks.len()), track);
            }
        }
        Mutation::SetTrackMuted { track_id, muted } => {
            if let Some(track) = next.track_mut(track_id) {
                track.muted = *muted;
            }
        }
        Mutation::SetTrackSoloed { track_id, soloed } => {
            if let Some(track) = next.track_mut(track_id) {
                track.soloed = *soloed;
            }
        }
        Mutation::LoadState { session } => {
            next = session.as_ref().clone();
        }
        Mutation::ResetState => {
            next = Session::reset();
        }
    }

    next
}

fn clamp_step_count(requested: u16) -> u16 {
    VALID_STEP_COUNTS
        .iter()
        .copied()
        .min_by_key(|v| (*v as i32 - requested as i32).abs())
        .unwrap_or(16)
}

fn rotate_track(track: &mut Track, amount: i32) {
    let n = (track.step_count as usize).min(MAX_STEPS);
    if n == 0 {
        return;
    }
    let shift = amount.rem_euclid(n as i32) as usize;
    if shift == 0 {
        return;
    }
    track.steps[..n].rotate_right(shift);
    track.parameter_locks[..n].rotate_right(shift);
}

/// Bjorklund's algorithm: distributes `pulses` onsets as evenly as possible
/// across `n` slots.
fn euclidean_pattern(n: usize, pulses: usize) -> Vec<bool> {
    if pulses == 0 || n == 0 {
        return vec![false; n];
    }
    let mut pattern = vec![false; n];
    let mut bucket = 0usize;
    for i in 0..n {
        bucket += pulses;
        if bucket >= n {
            bucket -= n;
            pattern[i] = true;
        }
    }
    pattern
}
