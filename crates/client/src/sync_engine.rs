//! Client sync engine (C4): connects to a live session, issues mutations,
//! reconciles echoes and remote mutations against the tracker, consumes
//! snapshots, and drives reconnect.
//!
//! Split in two layers: `SyncEngineState` is pure bookkeeping (seq
//! assignment, tracker updates, LWW reconciliation) and is exercised
//! directly in tests; `ClientSyncEngine` wraps it with the actual
//! WebSocket I/O (tokio-tungstenite) and is exercised by running it against
//! a real authority.

use std::time::{Duration, Instant};

use futures_util::{SinkExt, StreamExt};
use keyboardia_core::protocol::{ClientMessage, ServerMessage};
use keyboardia_core::{Mutation, RejectReason};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use url::Url;

use crate::backoff::Backoff;
use crate::error::SyncError;
use crate::tracker::{mutation_target, MutationState, MutationTracker};

/// Heartbeat cadence (§4.4 "Presence").
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Pure reconciliation state: everything the sync engine needs to decide
/// what to send and what to apply locally, with no networking.
pub struct SyncEngineState {
    pub player_id: String,
    pub session_id: String,
    tracker: MutationTracker,
    next_seq: u64,
}

impl SyncEngineState {
    pub fn new(player_id: String, session_id: String) -> Self {
        SyncEngineState { player_id, session_id, tracker: MutationTracker::new(), next_seq: 1 }
    }

    pub fn tracker(&self) -> &MutationTracker {
        &self.tracker
    }

    /// Assigns the next client `seq` to a locally-originated synced
    /// mutation, tracks it as pending, and returns the wire envelope.
    pub fn prepare_outbound(&mut self, mutation: Mutation, now: Instant) -> ClientMessage {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.tracker.track_mutation(seq, mutation.clone(), now);
        ClientMessage::Mutate { seq, mutation }
    }

    /// Reconciles an inbound broadcast against the tracker. Returns the
    /// mutation that should be dispatched into local state, or `None` if
    /// the broadcast is either our own echo (already applied optimistically)
    /// or has been beaten by a confirmed local mutation on the same target.
    pub fn reconcile_broadcast(
        &mut self,
        server_seq: u64,
        originator_seq: Option<u64>,
        originator_player_id: &str,
        mutation: &Mutation,
    ) -> Option<Mutation> {
        if originator_player_id == self.player_id {
            if let Some(seq) = originator_seq {
                self.tracker.confirm_mutation(seq, Some(server_seq));
            }
            return None;
        }

        if let Some((track_id, step)) = mutation_target(mutation) {
            let beaten_by_local = self
                .tracker
                .find_mutations_for_step(&track_id, step)
                .iter()
                .any(|tracked| {
                    tracked.state == MutationState::Confirmed
                        && tracked.confirmed_at_server_seq.map_or(false, |s| s > server_seq)
                });
            if beaten_by_local {
                return None;
            }
        }

        Some(mutation.clone())
    }

    /// Handles an inbound rejection: the corresponding tracked mutation is
    /// never retried, just marked lost.
    pub fn reconcile_rejected(&mut self, seq: u64) {
        self.tracker.mark_lost(seq);
    }

    /// Called when a snapshot arrives: clears mutations safely baked into
    /// it (§4.3 `clear_on_snapshot`).
    pub fn apply_snapshot(&mut self, server_seq: u64, now: Instant) {
        self.tracker.clear_on_snapshot(Some(server_seq), now);
    }

    /// Mutations still pending that should be re-sent on reconnect, in the
    /// order they were originally issued.
    pub fn mutations_to_resend(&self) -> Vec<ClientMessage> {
        self.tracker
            .pending_in_order()
            .into_iter()
            .map(|tracked| ClientMessage::Mutate { seq: tracked.seq, mutation: tracked.mutation.clone() })
            .collect()
    }
}

/// Outcome of processing one inbound `ServerMessage`, handed back to the
/// caller (typically a reducer bridge) to apply.
pub enum Inbound {
    Identity { player_id: String, color: String, name: String },
    /// A `LoadState` mutation ready for the reducer bridge's merge logic.
    Snapshot(Mutation),
    Mutation(Mutation),
    Rejected { seq: u64, reason: RejectReason },
    Ignored,
}

impl SyncEngineState {
    /// Processes one inbound wire message end to end.
    pub fn handle_server_message(&mut self, msg: ServerMessage, now: Instant) -> Inbound {
        match msg {
            ServerMessage::Identity { player_id, color, name } => {
                Inbound::Identity { player_id, color, name }
            }
            ServerMessage::Snapshot { server_seq, state } => {
                self.apply_snapshot(server_seq, now);
                Inbound::Snapshot(Mutation::LoadState { session: state })
            }
            ServerMessage::Broadcast { server_seq, originator_seq, originator_player_id, mutation } => {
                match self.reconcile_broadcast(server_seq, originator_seq, &originator_player_id, &mutation) {
                    Some(m) => Inbound::Mutation(m),
                    None => Inbound::Ignored,
                }
            }
            ServerMessage::Rejected { seq, reason } => {
                self.reconcile_rejected(seq);
                Inbound::Rejected { seq, reason }
            }
            ServerMessage::Unknown => Inbound::Ignored,
        }
    }
}

/// The networked half: owns a WebSocket connection to the live session and
/// drives reconnect-with-backoff. `outbound` carries locally-originated
/// synced mutations in; `inbound` carries reconciled results out.
pub struct ClientSyncEngine {
    url: Url,
    state: SyncEngineState,
    backoff: Backoff,
}

impl ClientSyncEngine {
    pub fn new(url: Url, player_id: String, session_id: String) -> Self {
        ClientSyncEngine { url, state: SyncEngineState::new(player_id, session_id), backoff: Backoff::default() }
    }

    pub fn state(&self) -> &SyncEngineState {
        &self.state
    }

    /// Runs the connect/reconnect loop until `outbound` is closed. Every
    /// reconciled inbound message is sent to `inbound`; every mutation
    /// pulled off `outbound` is assigned a seq, tracked, and sent.
    pub async fn run(
        mut self,
        mut outbound: mpsc::UnboundedReceiver<Mutation>,
        inbound: mpsc::UnboundedSender<Inbound>,
    ) -> Result<(), SyncError> {
        loop {
            match self.connect_and_pump(&mut outbound, &inbound).await {
                Ok(()) => return Ok(()), // outbound channel closed: clean shutdown
                Err(e) => {
                    log::warn!("sync engine connection lost: {e}; reconnecting");
                    let delay = self.backoff.next_delay();
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    async fn connect_and_pump(
        &mut self,
        outbound: &mut mpsc::UnboundedReceiver<Mutation>,
        inbound: &mpsc::UnboundedSender<Inbound>,
    ) -> Result<(), SyncError> {
        let mut url = self.url.clone();
        url.query_pairs_mut()
            .append_pair("player_id", &self.state.player_id)
            .append_pair("session_id", &self.state.session_id);

        let (ws_stream, _) =
            tokio_tungstenite::connect_async(url.as_str()).await.map_err(|e| SyncError::Transport(e.to_string()))?;
        self.backoff.reset();
        let (mut write, mut read) = ws_stream.split();

        let hello = ClientMessage::Hello {
            player_id: self.state.player_id.clone(),
            session_id: self.state.session_id.clone(),
            last_known_server_seq: None,
        };
        send(&mut write, &hello).await?;

        for resend in self.state.mutations_to_resend() {
            send(&mut write, &resend).await?;
        }

        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);

        loop {
            tokio::select! {
                mutation = outbound.recv() => {
                    match mutation {
                        Some(mutation) => {
                            let envelope = self.state.prepare_outbound(mutation, Instant::now());
                            send(&mut write, &envelope).await?;
                        }
                        None => return Ok(()),
                    }
                }
                incoming = read.next() => {
                    match incoming {
                        Some(Ok(WsMessage::Text(text))) => {
                            let msg: ServerMessage = serde_json::from_str(&text)?;
                            let result = self.state.handle_server_message(msg, Instant::now());
                            let _ = inbound.send(result);
                        }
                        Some(Ok(WsMessage::Close(_))) | None => {
                            return Err(SyncError::Transport("connection closed".into()));
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => return Err(SyncError::Transport(e.to_string())),
                    }
                }
                _ = heartbeat.tick() => {
                    send(&mut write, &ClientMessage::Heartbeat).await?;
                }
            }
        }
    }
}

async fn send<W>(write: &mut W, msg: &ClientMessage) -> Result<(), SyncError>
where
    W: SinkExt<WsMessage> + Unpin,
    SyncError: From<W::Error>,
{
    let text = serde_json::to_string(msg)?;
    write.send(WsMessage::Text(text)).await?;
    Ok(())
}

impl From<tokio_tungstenite::tungstenite::Error> for SyncError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        SyncError::Transport(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keyboardia_core::Session;

    fn toggle(track_id: &str, step: u16) -> Mutation {
        Mutation::ToggleStep { track_id: track_id.to_string(), step }
    }

    #[test]
    fn prepare_outbound_assigns_monotonic_seq() {
        let mut state = SyncEngineState::new("p1".into(), "s1".into());
        let a = state.prepare_outbound(toggle("t1", 0), Instant::now());
        let b = state.prepare_outbound(toggle("t1", 1), Instant::now());
        match (a, b) {
            (ClientMessage::Mutate { seq: s1, .. }, ClientMessage::Mutate { seq: s2, .. }) => {
                assert_eq!(s1, 1);
                assert_eq!(s2, 2);
            }
            _ => panic!("expected Mutate envelopes"),
        }
    }

    #[test]
    fn own_echo_confirms_without_reapplying() {
        let mut state = SyncEngineState::new("p1".into(), "s1".into());
        state.prepare_outbound(toggle("t1", 0), Instant::now());
        let result = state.reconcile_broadcast(5, Some(1), "p1", &toggle("t1", 0));
        assert!(result.is_none());
        assert_eq!(state.tracker().get(1).unwrap().confirmed_at_server_seq, Some(5));
    }

    #[test]
    fn remote_broadcast_is_dispatched_when_not_beaten() {
        let mut state = SyncEngineState::new("p1".into(), "s1".into());
        let result = state.reconcile_broadcast(5, None, "p2", &toggle("t1", 0));
        assert_eq!(result, Some(toggle("t1", 0)));
    }

    #[test]
    fn remote_broadcast_loses_to_a_higher_confirmed_local_seq() {
        let mut state = SyncEngineState::new("p1".into(), "s1".into());
        state.prepare_outbound(toggle("t1", 0), Instant::now());
        // our own mutation confirms at server_seq 10
        state.reconcile_broadcast(10, Some(1), "p1", &toggle("t1", 0));

        // a stray remote broadcast for the same step at a lower server_seq
        let result = state.reconcile_broadcast(3, None, "p2", &toggle("t1", 0));
        assert!(result.is_none());
    }

    #[test]
    fn snapshot_handling_produces_load_state() {
        let mut state = SyncEngineState::new("p1".into(), "s1".into());
        let msg = ServerMessage::Snapshot { server_seq: 1, state: Box::new(Session::default()) };
        match state.handle_server_message(msg, Instant::now()) {
            Inbound::Snapshot(Mutation::LoadState { .. }) => {}
            _ => panic!("expected a Snapshot inbound result"),
        }
    }

    #[test]
    fn rejected_marks_mutation_lost() {
        let mut state = SyncEngineState::new("p1".into(), "s1".into());
        state.prepare_outbound(toggle("t1", 0), Instant::now());
        state.reconcile_rejected(1);
        assert!(state.tracker().get(1).is_none());
    }

    #[test]
    fn pending_mutations_resend_in_seq_order_after_reconnect() {
        let mut state = SyncEngineState::new("p1".into(), "s1".into());
        state.prepare_outbound(toggle("t1", 0), Instant::now());
        state.prepare_outbound(toggle("t1", 1), Instant::now());
        let resend = state.mutations_to_resend();
        assert_eq!(resend.len(), 2);
        match (&resend[0], &resend[1]) {
            (ClientMessage::Mutate { seq: s1, .. }, ClientMessage::Mutate { seq: s2, .. }) => {
                assert!(s1 < s2);
            }
            _ => panic!("expected Mutate envelopes"),
        }
    }
}
