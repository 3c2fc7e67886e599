//! Canonical session state: the single authoritative data model shared by
//! every client and the live-session authority.

use serde::{Deserialize, Serialize};

/// Number of step slots backing every track, regardless of its active
/// `step_count`. Shrinking a track's `step_count` never resizes these arrays.
pub const MAX_STEPS: usize = 128;

/// Upper bound on the number of tracks a session may hold.
pub const MAX_TRACKS: usize = 16;

/// The step counts a track is allowed to run at. Kept sorted; used both to
/// clamp incoming values and to enumerate valid choices in a UI.
pub const VALID_STEP_COUNTS: &[u16] = &[
    1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 24, 32, 48, 64, 96, 128,
];

pub const MIN_TEMPO: u16 = 60;
pub const MAX_TEMPO: u16 = 180;

pub const MIN_TRANSPOSE: i8 = -24;
pub const MAX_TRANSPOSE: i8 = 24;

/// The 12 pitch classes, used for `Scale::root`.
pub const PITCH_CLASSES: u8 = 12;

/// Full session state. This is the only authoritative truth: everything
/// else (playhead, selection, focus, per-player mute/solo) lives outside it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub tracks: Vec<Track>,
    pub tempo: u16,
    pub swing: u8,
    pub effects: Effects,
    pub scale: Option<Scale>,
    pub loop_region: Option<LoopRegion>,
    pub name: Option<String>,
    /// Persisted-format version; bumped by the persistence adapter's
    /// normalization pass (see `keyboardia_server::persistence`).
    #[serde(default = "default_version")]
    pub version: u32,
}

fn default_version() -> u32 {
    CURRENT_SESSION_VERSION
}

/// Current on-disk/wire session format version.
pub const CURRENT_SESSION_VERSION: u32 = 3;

impl Default for Session {
    fn default() -> Self {
        Session {
            tracks: Vec::new(),
            tempo: 120,
            swing: 0,
            effects: Effects::default(),
            scale: None,
            loop_region: None,
            name: None,
            version: CURRENT_SESSION_VERSION,
        }
    }
}

impl Session {
    /// A freshly reset session: empty, defaults, same shape `RESET_STATE`
    /// yields in the distilled spec.
    pub fn reset() -> Self {
        Session::default()
    }

    pub fn track_index(&self, track_id: &str) -> Option<usize> {
        self.tracks.iter().position(|t| t.id == track_id)
    }

    pub fn track(&self, track_id: &str) -> Option<&Track> {
        self.tracks.iter().find(|t| t.id == track_id)
    }

    pub fn track_mut(&mut self, track_id: &str) -> Option<&mut Track> {
        self.tracks.iter_mut().find(|t| t.id == track_id)
    }

    /// `true` iff any track in the session has `soloed == true`. The
    /// scheduler consults this at schedule time to decide mute/solo gating.
    pub fn any_soloed(&self) -> bool {
        self.tracks.iter().any(|t| t.soloed)
    }
}

/// A single track: its sample/voice assignment, its 128-slot step grid, and
/// its per-step parameter locks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub id: String,
    pub name: String,
    pub sample_id: String,
    #[serde(with = "steps_serde")]
    pub steps: Vec<bool>,
    #[serde(with = "parameter_locks_serde")]
    pub parameter_locks: Vec<Option<ParameterLock>>,
    pub volume: f32,
    pub transpose: i8,
    pub step_count: u16,
    pub fm_params: Option<FmParams>,
    /// Per-track swing override; `None` means "use the session's swing".
    pub swing: Option<u8>,
    /// LOCAL-ONLY: never synced, never overwritten by a snapshot merge.
    #[serde(skip)]
    pub muted: bool,
    /// LOCAL-ONLY: never synced, never overwritten by a snapshot merge.
    #[serde(skip)]
    pub soloed: bool,
}

/// Steps/parameter_locks are always `MAX_STEPS` long on the wire; serde's
/// default Vec<bool> serialization is already dense, so this module exists
/// only to make that invariant visible at the type's definition site.
mod steps_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(steps: &[bool], s: S) -> Result<S::Ok, S::Error> {
        steps.serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<bool>, D::Error> {
        let mut steps = Vec::<bool>::deserialize(d)?;
        steps.resize(super::MAX_STEPS, false);
        Ok(steps)
    }
}

/// Like `steps_serde`: densifies a short or legacy `parameter_locks` array
/// up to `MAX_STEPS` on load, padding new slots with `None`.
mod parameter_locks_serde {
    use super::ParameterLock;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(locks: &[Option<ParameterLock>], s: S) -> Result<S::Ok, S::Error> {
        locks.serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<Option<ParameterLock>>, D::Error> {
        let mut locks = Vec::<Option<ParameterLock>>::deserialize(d)?;
        locks.resize(super::MAX_STEPS, None);
        Ok(locks)
    }
}

impl Track {
    pub fn new(id: impl Into<String>, name: impl Into<String>, sample_id: impl Into<String>) -> Self {
        Track {
            id: id.into(),
            name: name.into(),
            sample_id: sample_id.into(),
            steps: vec![false; MAX_STEPS],
            parameter_locks: vec![None; MAX_STEPS],
            volume: 0.8,
            transpose: 0,
            step_count: 16,
            fm_params: None,
            swing: None,
            muted: false,
            soloed: false,
        }
    }

    /// Parses the voice family out of `sample_id`'s optional typed prefix.
    /// Bare names (no `prefix:`) denote drum samples.
    pub fn voice_family(&self) -> VoiceFamily {
        VoiceFamily::parse(&self.sample_id)
    }

    /// `true` iff this track should produce audio right now, given the
    /// session-wide solo state. Mute/solo gating is local-only state, so
    /// this reads `self.muted`/`self.soloed` which a snapshot never touches.
    pub fn is_audible(&self, any_soloed: bool) -> bool {
        if any_soloed {
            self.soloed
        } else {
            !self.muted
        }
    }
}

/// The voice family encoded in a track's `sample_id` prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VoiceFamily {
    Synth,
    Tone,
    Advanced,
    Sampled,
    /// No recognized prefix: a bare drum sample name.
    Drum,
}

impl VoiceFamily {
    pub fn parse(sample_id: &str) -> Self {
        match sample_id.split_once(':') {
            Some(("synth", _)) => VoiceFamily::Synth,
            Some(("tone", _)) => VoiceFamily::Tone,
            Some(("advanced", _)) => VoiceFamily::Advanced,
            Some(("sampled", _)) => VoiceFamily::Sampled,
            _ => VoiceFamily::Drum,
        }
    }

    /// The preset/sample name with the family prefix stripped.
    pub fn preset_id(sample_id: &str) -> &str {
        match sample_id.split_once(':') {
            Some((_, rest)) => rest,
            None => sample_id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParameterLock {
    pub pitch: Option<i8>,
    pub volume: Option<f32>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub tie: bool,
}

impl ParameterLock {
    pub fn tie() -> Self {
        ParameterLock { pitch: None, volume: None, tie: true }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FmParams {
    pub harmonicity: f32,
    pub modulation_index: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LoopRegion {
    pub start: u16,
    pub end: u16,
}

impl LoopRegion {
    /// `true` iff `{start, end}` satisfy `start < end <= MAX_STEPS`.
    pub fn is_valid(&self) -> bool {
        self.start < self.end && (self.end as usize) <= MAX_STEPS
    }

    pub fn contains(&self, step: u16) -> bool {
        step >= self.start && step <= self.end
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scale {
    /// Root pitch class, `0..PITCH_CLASSES`.
    pub root: u8,
    pub scale_id: String,
    pub locked: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Effects {
    pub reverb: EffectParams,
    pub delay: EffectParams,
    pub chorus: EffectParams,
    pub distortion: EffectParams,
}

/// A single effect block's parameters. `wet = 0.0` is "dry" and is the
/// default for all four blocks.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EffectParams {
    pub wet: f32,
    pub param_a: f32,
    pub param_b: f32,
}

impl Default for EffectParams {
    fn default() -> Self {
        EffectParams { wet: 0.0, param_a: 0.0, param_b: 0.0 }
    }
}
