//! Sync classification (C2): an exhaustive, compile-time-checked table over
//! every `Mutation` variant. Adding a variant to `mutation.rs` without
//! adding an arm to `classify` below is a hard compile error -- there is no
//! wildcard arm.

use crate::mutation::Mutation;

/// The subset of a track's fields a client must never let a snapshot merge
/// overwrite. Always exactly `{muted, soloed}` or empty for non-track
/// mutations -- kept as a small enum rather than a `HashSet<String>` so the
/// reducer bridge can match on it without string comparisons.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalOnlyFields {
    None,
    TrackMuteSolo,
}

/// One row of the sync classification table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncInfo {
    pub synced: bool,
    pub local_only_fields: LocalOnlyFields,
    pub client_message: &'static str,
    pub server_broadcast: &'static str,
}

const NOT_SYNCED: SyncInfo = SyncInfo {
    synced: false,
    local_only_fields: LocalOnlyFields::None,
    client_message: "",
    server_broadcast: "",
};

/// Classifies a mutation per §4.2. `synced` mutations are the only ones the
/// client sync engine (C4) ever puts on the wire; the rest are applied
/// locally only and never assigned a client `seq`.
pub fn classify(mutation: &Mutation) -> SyncInfo {
    match mutation {
        Mutation::ToggleStep { .. } => SyncInfo {
            synced: true,
            local_only_fields: LocalOnlyFields::None,
            client_message: "toggle_step",
            server_broadcast: "step_toggled",
        },
        Mutation::SetTempo { .. } => SyncInfo {
            synced: true,
            local_only_fields: LocalOnlyFields::None,
            client_message: "set_tempo",
            server_broadcast: "tempo_set",
        },
        Mutation::SetSwing { .. } => SyncInfo {
            synced: true,
            local_only_fields: LocalOnlyFields::None,
            client_message: "set_swing",
            server_broadcast: "swing_set",
        },
        Mutation::SetTrackVolume { .. } => SyncInfo {
            synced: true,
            local_only_fields: LocalOnlyFields::None,
            client_message: "set_track_volume",
            server_broadcast: "track_volume_set",
        },
        Mutation::SetTrackTranspose { .. } => SyncInfo {
            synced: true,
            local_only_fields: LocalOnlyFields::None,
            client_message: "set_track_transpose",
            server_broadcast: "track_transpose_set",
        },
        Mutation::SetTrackStepCount { .. } => SyncInfo {
            synced: true,
            local_only_fields: LocalOnlyFields::None,
            client_message: "set_track_step_count",
            server_broadcast: "track_step_count_set",
        },
        Mutation::AddTrack { .. } => SyncInfo {
            synced: true,
            local_only_fields: LocalOnlyFields::TrackMuteSolo,
            client_message: "add_track",
            server_broadcast: "track_added",
        },
        Mutation::DeleteTrack { .. } => SyncInfo {
            synced: true,
            local_only_fields: LocalOnlyFields::None,
            client_message: "delete_track",
            server_broadcast: "track_deleted",
        },
        Mutation::ClearTrack { .. } => SyncInfo {
            synced: true,
            local_only_fields: LocalOnlyFields::None,
            client_message: "clear_track",
            server_broadcast: "track_cleared",
        },
        Mutation::SetTrackSample { .. } => SyncInfo {
            synced: true,
            local_only_fields: LocalOnlyFields::None,
            client_message: "set_track_sample",
            server_broadcast: "track_sample_set",
        },
        Mutation::SetParameterLock { .. } => SyncInfo {
            synced: true,
            local_only_fields: LocalOnlyFields::None,
            client_message: "set_parameter_lock",
            server_broadcast: "parameter_lock_set",
        },
        Mutation::CopySequence { .. } => SyncInfo {
            synced: true,
            local_only_fields: LocalOnlyFields::None,
            client_message: "copy_sequence",
            server_broadcast: "sequence_copied",
        },
        Mutation::MoveSequence { .. } => SyncInfo {
            synced: true,
            local_only_fields: LocalOnlyFields::None,
            client_message: "move_sequence",
            server_broadcast: "sequence_moved",
        },
        Mutation::SetEffects { .. } => SyncInfo {
            synced: true,
            local_only_fields: LocalOnlyFields::None,
            client_message: "set_effects",
            server_broadcast: "effects_set",
        },
        Mutation::SetScale { .. } => SyncInfo {
            synced: true,
            local_only_fields: LocalOnlyFields::None,
            client_message: "set_scale",
            server_broadcast: "scale_set",
        },
        Mutation::SetSessionName { .. } => SyncInfo {
            synced: true,
            local_only_fields: LocalOnlyFields::None,
            client_message: "set_session_name",
            server_broadcast: "session_name_set",
        },
        Mutation::SetLoopRegion { .. } => SyncInfo {
            synced: true,
            local_only_fields: LocalOnlyFields::None,
            client_message: "set_loop_region",
            server_broadcast: "loop_region_set",
        },
        Mutation::RotateSteps { .. } => SyncInfo {
            synced: true,
            local_only_fields: LocalOnlyFields::None,
            client_message: "rotate_steps",
            server_broadcast: "steps_rotated",
        },
        Mutation::InvertSteps { .. } => SyncInfo {
            synced: true,
            local_only_fields: LocalOnlyFields::None,
            client_message: "invert_steps",
            server_broadcast: "steps_inverted",
        },
        Mutation::ReverseSteps { .. } => SyncInfo {
            synced: true,
            local_only_fields: LocalOnlyFields::None,
            client_message: "reverse_steps",
            server_broadcast: "steps_reversed",
        },
        Mutation::MirrorSteps { .. } => SyncInfo {
            synced: true,
            local_only_fields: LocalOnlyFields::None,
            client_message: "mirror_steps",
            server_broadcast: "steps_mirrored",
        },
        Mutation::EuclideanFill { .. } => SyncInfo {
            synced: true,
            local_only_fields: LocalOnlyFields::None,
            client_message: "euclidean_fill",
            server_broadcast: "steps_euclidean_filled",
        },
        Mutation::ReorderTracks { .. } => SyncInfo {
            synced: true,
            local_only_fields: LocalOnlyFields::None,
            client_message: "reorder_tracks",
            server_broadcast: "tracks_reordered",
        },
        Mutation::ReorderTrackById { .. } => SyncInfo {
            synced: true,
            local_only_fields: LocalOnlyFields::None,
            client_message: "reorder_track_by_id",
            server_broadcast: "track_reordered_by_id",
        },
        // Mute/soloed are never synced -- always local-only, per §4.2.
        Mutation::SetTrackMuted { .. } => NOT_SYNCED,
        Mutation::SetTrackSoloed { .. } => NOT_SYNCED,
        // Snapshot application and reset are server-originated / local
        // bookkeeping, never themselves re-broadcast as a mutation.
        Mutation::LoadState { .. } => SyncInfo {
            synced: false,
            local_only_fields: LocalOnlyFields::TrackMuteSolo,
            client_message: "",
            server_broadcast: "snapshot",
        },
        Mutation::ResetState => NOT_SYNCED,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Track;

    #[test]
    fn mute_and_solo_are_never_synced() {
        assert!(!classify(&Mutation::SetTrackMuted { track_id: "t".into(), muted: true }).synced);
        assert!(!classify(&Mutation::SetTrackSoloed { track_id: "t".into(), soloed: true }).synced);
    }

    #[test]
    fn toggle_step_wire_names_match_spec() {
        let info = classify(&Mutation::ToggleStep { track_id: "t".into(), step: 0 });
        assert!(info.synced);
        assert_eq!(info.client_message, "toggle_step");
        assert_eq!(info.server_broadcast, "step_toggled");
    }

    #[test]
    fn add_track_marks_mute_solo_local_only() {
        let info = classify(&Mutation::AddTrack { track: Track::new("t", "T", "x") });
        assert_eq!(info.local_only_fields, LocalOnlyFields::TrackMuteSolo);
    }
}
