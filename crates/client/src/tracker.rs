//! Mutation tracker (C3): client-side bookkeeping of in-flight mutations,
//! keyed by the client's own monotonic `seq`.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use keyboardia_core::Mutation;

/// Default age after which a still-pending mutation is presumed lost.
pub const DEFAULT_MUTATION_TIMEOUT: Duration = Duration::from_secs(30);
/// Default age after which a confirmed mutation is evicted even without a
/// `server_seq`-based snapshot clear (§4.3 `clear_on_snapshot`).
pub const DEFAULT_MAX_CONFIRMED_AGE: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationState {
    Pending,
    Confirmed,
    Superseded,
    Lost,
}

#[derive(Debug, Clone)]
pub struct TrackedMutation {
    pub seq: u64,
    pub mutation: Mutation,
    pub state: MutationState,
    pub sent_at: Instant,
    pub confirmed_at_server_seq: Option<u64>,
}

/// Keeps the pending/confirmed/superseded/lost state of every mutation a
/// client has issued, so that a snapshot arriving before its own echo
/// cannot silently erase the user's intent (the "snapshot-before-echo
/// race", §4.3).
pub struct MutationTracker {
    mutations: HashMap<u64, TrackedMutation>,
    mutation_timeout: Duration,
    max_confirmed_age: Duration,
}

impl Default for MutationTracker {
    fn default() -> Self {
        MutationTracker {
            mutations: HashMap::new(),
            mutation_timeout: DEFAULT_MUTATION_TIMEOUT,
            max_confirmed_age: DEFAULT_MAX_CONFIRMED_AGE,
        }
    }
}

impl MutationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeouts(mutation_timeout: Duration, max_confirmed_age: Duration) -> Self {
        MutationTracker { mutations: HashMap::new(), mutation_timeout, max_confirmed_age }
    }

    pub fn len(&self) -> usize {
        self.mutations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mutations.is_empty()
    }

    pub fn get(&self, seq: u64) -> Option<&TrackedMutation> {
        self.mutations.get(&seq)
    }

    /// Records `mutation` as `Pending` under `seq`, starting its eviction
    /// clock at `now`.
    pub fn track_mutation(&mut self, seq: u64, mutation: Mutation, now: Instant) {
        self.mutations.insert(
            seq,
            TrackedMutation { seq, mutation, state: MutationState::Pending, sent_at: now, confirmed_at_server_seq: None },
        );
    }

    /// Flips `seq` to `Confirmed`, recording `server_seq` if the authority
    /// provided one in its echo.
    pub fn confirm_mutation(&mut self, seq: u64, server_seq: Option<u64>) {
        if let Some(tracked) = self.mutations.get_mut(&seq) {
            tracked.state = MutationState::Confirmed;
            tracked.confirmed_at_server_seq = server_seq;
        }
    }

    /// Flips `seq` to `Superseded` and removes it immediately -- a
    /// superseded mutation has no further bookkeeping value.
    pub fn mark_superseded(&mut self, seq: u64) {
        self.mutations.remove(&seq);
    }

    /// Flips `seq` to `Lost` and removes it.
    pub fn mark_lost(&mut self, seq: u64) {
        self.mutations.remove(&seq);
    }

    /// Moves any `Pending` mutation older than `mutation_timeout` to `Lost`
    /// (removed from the map).
    pub fn prune_old_mutations(&mut self, now: Instant) {
        let timeout = self.mutation_timeout;
        self.mutations.retain(|_, tracked| {
            !(tracked.state == MutationState::Pending && now.duration_since(tracked.sent_at) >= timeout)
        });
    }

    /// Clears confirmed mutations that are safely baked into an incoming
    /// snapshot: either `confirmed_at_server_seq <= snapshot_server_seq`,
    /// or -- when no `server_seq` is available -- old enough that it's
    /// presumed baked in. Pending mutations are never touched: they must
    /// survive a snapshot that arrived before their echo.
    pub fn clear_on_snapshot(&mut self, snapshot_server_seq: Option<u64>, now: Instant) {
        let max_age = self.max_confirmed_age;
        self.mutations.retain(|_, tracked| {
            if tracked.state != MutationState::Confirmed {
                return true;
            }
            match (tracked.confirmed_at_server_seq, snapshot_server_seq) {
                (Some(confirmed_seq), Some(snap_seq)) => confirmed_seq > snap_seq,
                _ => now.duration_since(tracked.sent_at) < max_age,
            }
        });
    }

    /// Finds tracked mutations targeting `(track_id, step)` -- used by the
    /// client to decide whether to hold its optimistic local value against
    /// an incoming remote one.
    pub fn find_mutations_for_step<'a>(&'a self, track_id: &'a str, step: u16) -> Vec<&'a TrackedMutation> {
        self.mutations
            .values()
            .filter(|tracked| mutation_targets_step(&tracked.mutation, track_id, step))
            .collect()
    }

    /// All currently-pending mutations, in `seq` order -- used to re-send
    /// on reconnect.
    pub fn pending_in_order(&self) -> Vec<&TrackedMutation> {
        let mut pending: Vec<&TrackedMutation> =
            self.mutations.values().filter(|t| t.state == MutationState::Pending).collect();
        pending.sort_by_key(|t| t.seq);
        pending
    }
}

fn mutation_targets_step(mutation: &Mutation, track_id: &str, step: u16) -> bool {
    mutation_target(mutation).map_or(false, |(t, s)| t == track_id && s == step)
}

/// The `(track_id, step)` a mutation addresses, if it addresses a single
/// step at all. Used both by the tracker's step lookup and by the sync
/// engine's conflict reconciliation.
pub fn mutation_target(mutation: &Mutation) -> Option<(String, u16)> {
    match mutation {
        Mutation::ToggleStep { track_id, step } => Some((track_id.clone(), *step)),
        Mutation::SetParameterLock { track_id, step, .. } => Some((track_id.clone(), *step)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toggle(track_id: &str, step: u16) -> Mutation {
        Mutation::ToggleStep { track_id: track_id.to_string(), step }
    }

    #[test]
    fn tracked_mutation_starts_pending() {
        let mut tracker = MutationTracker::new();
        tracker.track_mutation(1, toggle("t1", 5), Instant::now());
        assert_eq!(tracker.get(1).unwrap().state, MutationState::Pending);
    }

    #[test]
    fn confirm_records_server_seq() {
        let mut tracker = MutationTracker::new();
        tracker.track_mutation(1, toggle("t1", 5), Instant::now());
        tracker.confirm_mutation(1, Some(42));
        let tracked = tracker.get(1).unwrap();
        assert_eq!(tracked.state, MutationState::Confirmed);
        assert_eq!(tracked.confirmed_at_server_seq, Some(42));
    }

    #[test]
    fn superseded_and_lost_are_removed_immediately() {
        let mut tracker = MutationTracker::new();
        tracker.track_mutation(1, toggle("t1", 5), Instant::now());
        tracker.mark_superseded(1);
        assert!(tracker.get(1).is_none());

        tracker.track_mutation(2, toggle("t1", 6), Instant::now());
        tracker.mark_lost(2);
        assert!(tracker.get(2).is_none());
    }

    #[test]
    fn prune_old_mutations_moves_pending_to_lost() {
        let mut tracker = MutationTracker::with_timeouts(Duration::from_millis(0), DEFAULT_MAX_CONFIRMED_AGE);
        let past = Instant::now() - Duration::from_secs(1);
        tracker.track_mutation(1, toggle("t1", 5), past);
        tracker.prune_old_mutations(Instant::now());
        assert!(tracker.get(1).is_none());
    }

    #[test]
    fn snapshot_race_survives_until_echo_is_baked_in() {
        // Confirmed at server_seq = S+1, snapshot arrives at S: must survive.
        let mut tracker = MutationTracker::new();
        let now = Instant::now();
        tracker.track_mutation(7, toggle("t1", 5), now);
        tracker.confirm_mutation(7, Some(11));

        tracker.clear_on_snapshot(Some(10), now);
        assert!(tracker.get(7).is_some(), "mutation baked at 11 must survive a snapshot at 10");

        // A later snapshot at >= 11 finally clears it.
        tracker.clear_on_snapshot(Some(11), now);
        assert!(tracker.get(7).is_none());
    }

    #[test]
    fn pending_mutations_are_never_cleared_by_snapshots() {
        let mut tracker = MutationTracker::new();
        let now = Instant::now();
        tracker.track_mutation(3, toggle("t1", 2), now);
        tracker.clear_on_snapshot(Some(999), now);
        assert!(tracker.get(3).is_some());
    }

    #[test]
    fn find_mutations_for_step_matches_target() {
        let mut tracker = MutationTracker::new();
        let now = Instant::now();
        tracker.track_mutation(1, toggle("t1", 5), now);
        tracker.track_mutation(2, toggle("t1", 6), now);
        let found = tracker.find_mutations_for_step("t1", 5);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].seq, 1);
    }

    #[test]
    fn pending_in_order_is_sorted_by_seq() {
        let mut tracker = MutationTracker::new();
        let now = Instant::now();
        tracker.track_mutation(5, toggle("t1", 1), now);
        tracker.track_mutation(2, toggle("t1", 2), now);
        tracker.track_mutation(9, toggle("t1", 3), now);
        let seqs: Vec<_> = tracker.pending_in_order().iter().map(|t| t.seq).collect();
        assert_eq!(seqs, vec![2, 5, 9]);
    }
}
