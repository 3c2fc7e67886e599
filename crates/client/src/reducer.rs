//! Reducer bridge (C10): the only component that knows both about the wire
//! and about per-tab (per-connection) local state.

use keyboardia_core::{apply_mutation, classify, Mutation, Session};

/// Per-connection transient state that is never part of the synced
/// `Session` and is never touched by a snapshot merge: playhead, selection,
/// focus, and the local play/stop toggle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LocalUiState {
    pub is_playing: bool,
    pub current_step: u16,
    pub selection: Option<Selection>,
    pub focus: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    pub track_id: String,
    pub step: Option<u16>,
}

/// The target the reducer bridge hands synced mutations to. The client
/// sync engine (`sync_engine.rs`) implements this; tests use a recording
/// fake.
pub trait MutationSink {
    fn dispatch(&mut self, mutation: Mutation);
}

/// A sink that records every mutation handed to it, for tests.
#[derive(Default)]
pub struct RecordingSink {
    pub sent: Vec<Mutation>,
}

impl MutationSink for RecordingSink {
    fn dispatch(&mut self, mutation: Mutation) {
        self.sent.push(mutation);
    }
}

/// Owns the local copy of the session plus transient UI state, and routes
/// every UI intent through `apply_mutation` before forwarding synced
/// mutations to the sync engine.
pub struct ReducerBridge<S: MutationSink> {
    session: Session,
    ui: LocalUiState,
    sink: S,
}

impl<S: MutationSink> ReducerBridge<S> {
    pub fn new(session: Session, sink: S) -> Self {
        ReducerBridge { session, ui: LocalUiState::default(), sink }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn ui(&self) -> &LocalUiState {
        &self.ui
    }

    pub fn ui_mut(&mut self) -> &mut LocalUiState {
        &mut self.ui
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Applies `mutation` locally (optimistically), then forwards it to the
    /// sync engine iff §4.2 classifies it as synced. `LoadState` gets the
    /// special merge treatment of §4.4/§4.10: LOCAL-ONLY fields on tracks
    /// already present by id survive the incoming snapshot, and transient
    /// UI state (`self.ui`) is left untouched entirely.
    pub fn dispatch(&mut self, mutation: Mutation) {
        let next = apply_mutation(&self.session, &mutation);
        self.session = if matches!(mutation, Mutation::LoadState { .. }) {
            merge_preserving_local_only(&self.session, next)
        } else {
            next
        };

        let info = classify(&mutation);
        if info.synced {
            self.sink.dispatch(mutation);
        }
    }
}

/// Merges `incoming` (the result of applying a `LoadState`) over `local`:
/// every field of every track survives from `incoming` except `muted` and
/// `soloed`, which are copied from the locally-known track with the same
/// id (new tracks get their LOCAL-ONLY defaults, since there is no local
/// counterpart to preserve).
fn merge_preserving_local_only(local: &Session, mut incoming: Session) -> Session {
    for track in incoming.tracks.iter_mut() {
        if let Some(local_track) = local.track(&track.id) {
            track.muted = local_track.muted;
            track.soloed = local_track.soloed;
        }
    }
    incoming
}
