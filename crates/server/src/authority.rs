//! Live-session authority (C5): one authoritative `Session` per session id,
//! a monotonic `server_seq`, and a table of connected players. Grounded on
//! the teacher's `AudioEngine` -- handed messages, broadcasts new state to
//! subscribers -- generalized from a single process-wide instance to one
//! instance per session id via `SessionRegistry`.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::{Duration, Instant};

use keyboardia_core::{apply_mutation, validate_mutation, Mutation, RejectReason, ServerMessage, Session};
use tokio::sync::{mpsc, Mutex};

use crate::error::AuthorityError;
use crate::persistence::{SaveDebouncer, SessionRecord, SessionStore};

/// How often stale-connection pruning is allowed to run (§4.5).
const PRUNE_INTERVAL: Duration = Duration::from_secs(60);
/// How old a connection's last message may be before it's pruned.
const STALE_AFTER: Duration = Duration::from_secs(120);

const IDENTITY_COLORS: &[&str] =
    &["red", "orange", "yellow", "green", "teal", "blue", "indigo", "violet", "pink", "gray"];
const IDENTITY_ADJECTIVES: &[&str] = &["Swift", "Quiet", "Bright", "Bold", "Calm", "Keen", "Vivid", "Steady"];
const IDENTITY_NOUNS: &[&str] = &["Fox", "Heron", "Otter", "Lynx", "Wren", "Falcon", "Badger", "Mantis"];

/// Deterministic (color, name) pair for a `player_id`, so reconnects look
/// identical to other players without any server-side state (§4.5).
pub fn deterministic_identity(player_id: &str) -> (String, String) {
    let mut hasher = DefaultHasher::new();
    player_id.hash(&mut hasher);
    let hash = hasher.finish();

    let color = IDENTITY_COLORS[(hash % IDENTITY_COLORS.len() as u64) as usize].to_string();
    let adjective = IDENTITY_ADJECTIVES[((hash >> 8) % IDENTITY_ADJECTIVES.len() as u64) as usize];
    let noun = IDENTITY_NOUNS[((hash >> 16) % IDENTITY_NOUNS.len() as u64) as usize];
    (color, format!("{adjective} {noun}"))
}

/// A message handed to a connected player's writer task.
#[derive(Debug, Clone)]
pub enum ToClient {
    Message(ServerMessage),
    Close { code: u16, reason: &'static str },
}

struct PlayerConnection {
    color: String,
    name: String,
    sender: mpsc::UnboundedSender<ToClient>,
    last_message_at: Instant,
}

/// The authoritative state for one session id.
pub struct LiveSession {
    session_id: String,
    state: Session,
    server_seq: u64,
    players: HashMap<String, PlayerConnection>,
    last_prune: Instant,
    last_dirty_at: Option<Instant>,
    last_saved_at: Option<Instant>,
    last_saved_payload: Option<String>,
}

impl LiveSession {
    pub fn new(session_id: String, state: Session) -> Self {
        LiveSession {
            session_id,
            state,
            server_seq: 0,
            players: HashMap::new(),
            last_prune: Instant::now(),
            last_dirty_at: None,
            last_saved_at: None,
            last_saved_payload: None,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn server_seq(&self) -> u64 {
        self.server_seq
    }

    pub fn state(&self) -> &Session {
        &self.state
    }

    pub fn connected_players(&self) -> usize {
        self.players.len()
    }

    /// Registers a new connection for `player_id`, closing any prior
    /// connection under the same id (zombie replacement, §4.5 scenario 5).
    /// Returns the assigned identity and the snapshot to send immediately.
    pub fn connect(&mut self, player_id: &str, sender: mpsc::UnboundedSender<ToClient>, now: Instant) -> (String, String, ServerMessage) {
        let (color, name) = self
            .players
            .get(player_id)
            .map(|p| (p.color.clone(), p.name.clone()))
            .unwrap_or_else(|| deterministic_identity(player_id));

        if let Some(old) = self.players.insert(
            player_id.to_string(),
            PlayerConnection { color: color.clone(), name: name.clone(), sender, last_message_at: now },
        ) {
            let _ = old.sender.send(ToClient::Close { code: 1000, reason: "Replaced by new connection" });
            log::info!("player {player_id} replaced a stale connection in session {}", self.session_id);
        } else {
            log::info!("player {player_id} joined session {}", self.session_id);
        }

        let snapshot = ServerMessage::Snapshot { server_seq: self.server_seq, state: Box::new(self.state.clone()) };
        (color, name, snapshot)
    }

    pub fn disconnect(&mut self, player_id: &str) {
        self.players.remove(player_id);
        log::info!("player {player_id} left session {}", self.session_id);
    }

    pub fn record_heartbeat(&mut self, player_id: &str, now: Instant) {
        if let Some(conn) = self.players.get_mut(player_id) {
            conn.last_message_at = now;
        }
    }

    /// Validates and applies an incoming mutation, broadcasting the result
    /// to every connected player (including the originator, as an echo with
    /// both `seq`s stamped). Rejected mutations go only to the originator.
    pub fn handle_mutate(&mut self, player_id: &str, seq: u64, mutation: Mutation, now: Instant) {
        if let Some(conn) = self.players.get_mut(player_id) {
            conn.last_message_at = now;
        }

        match validate_mutation(&self.state, &mutation) {
            Ok(()) => {
                self.state = apply_mutation(&self.state, &mutation);
                self.server_seq += 1;
                self.last_dirty_at = Some(now);

                let broadcast = ServerMessage::Broadcast {
                    server_seq: self.server_seq,
                    originator_seq: Some(seq),
                    originator_player_id: player_id.to_string(),
                    mutation,
                };
                self.broadcast_all(broadcast);
            }
            Err(reason) => {
                self.send_to(player_id, ServerMessage::Rejected { seq, reason });
            }
        }
    }

    /// Full snapshot broadcast, used by the periodic snapshot policy and
    /// on explicit request.
    pub fn broadcast_snapshot(&mut self) {
        let snapshot = ServerMessage::Snapshot { server_seq: self.server_seq, state: Box::new(self.state.clone()) };
        self.broadcast_all(snapshot);
    }

    fn broadcast_all(&self, message: ServerMessage) {
        for conn in self.players.values() {
            let _ = conn.sender.send(ToClient::Message(message.clone()));
        }
    }

    fn send_to(&self, player_id: &str, message: ServerMessage) {
        if let Some(conn) = self.players.get(player_id) {
            let _ = conn.sender.send(ToClient::Message(message));
        }
    }

    /// Stale-connection pruning, rate-limited to once per `PRUNE_INTERVAL`
    /// and run opportunistically on every inbound message (§4.5).
    pub fn prune_stale(&mut self, now: Instant) {
        if now.duration_since(self.last_prune) < PRUNE_INTERVAL {
            return;
        }
        self.last_prune = now;

        let stale: Vec<String> = self
            .players
            .iter()
            .filter(|(_, conn)| now.duration_since(conn.last_message_at) >= STALE_AFTER)
            .map(|(id, _)| id.clone())
            .collect();

        for player_id in stale {
            if let Some(conn) = self.players.remove(&player_id) {
                let _ = conn.sender.send(ToClient::Close { code: 1001, reason: "Stale connection" });
                log::info!("pruned stale player {player_id} from session {}", self.session_id);
            }
        }
    }

    fn to_record(&self, name: Option<String>) -> SessionRecord {
        let now = chrono::Utc::now();
        SessionRecord {
            id: self.session_id.clone(),
            name,
            created_at: now,
            updated_at: now,
            last_accessed_at: now,
            remixed_from: None,
            remix_count: 0,
            state: self.state.clone(),
        }
    }

    /// Saves through `debouncer` iff the debounce policy says it's time.
    /// Called opportunistically by the authority's background tick.
    pub async fn maybe_save(&mut self, debouncer: &SaveDebouncer, now: Instant) -> Result<(), AuthorityError> {
        let Some(dirty_at) = self.last_dirty_at else { return Ok(()) };
        if !debouncer.should_save(dirty_at, self.last_saved_at, now) {
            return Ok(());
        }

        let record = self.to_record(self.state.name.clone());
        let saved = debouncer.save_if_changed(&record, &mut self.last_saved_payload).await?;
        if saved {
            self.last_saved_at = Some(now);
            log::debug!("saved session {}", self.session_id);
        }
        Ok(())
    }
}

/// Process-wide registry of live-session authorities, one per session id
/// (§4.5 "process-wide singleton within its process").
pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, Arc<Mutex<LiveSession>>>>,
    store: Option<Arc<dyn SessionStore>>,
    debouncer: Option<SaveDebouncer>,
}

impl SessionRegistry {
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        let debouncer = SaveDebouncer::new(store.clone(), Duration::from_secs(2), Duration::from_secs(15));
        SessionRegistry { sessions: Mutex::new(HashMap::new()), store: Some(store), debouncer: Some(debouncer) }
    }

    pub fn with_save_policy(store: Arc<dyn SessionStore>, debounce: Duration, max_delay: Duration) -> Self {
        let debouncer = SaveDebouncer::new(store.clone(), debounce, max_delay);
        SessionRegistry { sessions: Mutex::new(HashMap::new()), store: Some(store), debouncer: Some(debouncer) }
    }

    /// Gets the authority for `session_id`, loading it from the store (or
    /// creating a fresh one) if this process has not seen it yet.
    pub async fn get_or_load(&self, session_id: &str) -> Result<Arc<Mutex<LiveSession>>, AuthorityError> {
        let mut sessions = self.sessions.lock().await;
        if let Some(existing) = sessions.get(session_id) {
            return Ok(existing.clone());
        }

        let state = match &self.store {
            Some(store) => match store.load(session_id).await? {
                Some(record) => record.state,
                None => Session::default(),
            },
            None => Session::default(),
        };

        let authority = Arc::new(Mutex::new(LiveSession::new(session_id.to_string(), state)));
        sessions.insert(session_id.to_string(), authority.clone());
        Ok(authority)
    }

    /// One round of the periodic snapshot/save tick (§4.5 "snapshotted
    /// periodically"): every live session gets a fresh snapshot broadcast
    /// and a chance to save through the debounce policy.
    pub async fn tick(&self, now: Instant) {
        let sessions: Vec<Arc<Mutex<LiveSession>>> = self.sessions.lock().await.values().cloned().collect();
        for session in sessions {
            let mut session = session.lock().await;
            session.broadcast_snapshot();
            if let Some(debouncer) = &self.debouncer {
                if let Err(e) = session.maybe_save(debouncer, now).await {
                    log::warn!("failed to save session {}: {e}", session.session_id());
                }
            }
        }
    }

    /// Spawns the background task that drives `tick` every `interval`,
    /// returning a hook that cancels it (for `SingletonRegistry`, §4.9).
    pub fn spawn_background_tick(self: Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                self.tick(Instant::now()).await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keyboardia_core::session::Track;

    fn recv_all(rx: &mut mpsc::UnboundedReceiver<ToClient>) -> Vec<ToClient> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            out.push(msg);
        }
        out
    }

    #[test]
    fn deterministic_identity_is_stable_for_the_same_player_id() {
        let a = deterministic_identity("player-42");
        let b = deterministic_identity("player-42");
        assert_eq!(a, b);
    }

    #[test]
    fn connect_sends_a_snapshot_with_the_current_server_seq() {
        let mut session = LiveSession::new("s1".into(), Session::default());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (_, _, snapshot) = session.connect("p1", tx, Instant::now());
        match snapshot {
            ServerMessage::Snapshot { server_seq, .. } => assert_eq!(server_seq, 0),
            _ => panic!("expected a snapshot"),
        }
        assert!(recv_all(&mut rx).is_empty());
    }

    #[test]
    fn zombie_replacement_closes_the_old_connection_and_keeps_identity() {
        let mut session = LiveSession::new("s1".into(), Session::default());
        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (color1, name1, _) = session.connect("p1", tx1, Instant::now());

        let (tx2, _rx2) = mpsc::unbounded_channel();
        let (color2, name2, _) = session.connect("p1", tx2, Instant::now());

        assert_eq!((color1, name1), (color2, name2));
        assert_eq!(session.connected_players(), 1);

        let messages = recv_all(&mut rx1);
        assert!(matches!(messages.as_slice(), [ToClient::Close { code: 1000, .. }]));
    }

    #[test]
    fn valid_mutation_broadcasts_to_all_players_with_stamped_seqs() {
        let mut state = Session::default();
        state.tracks.push(Track::new("t1", "Kick", "808kick"));
        let mut session = LiveSession::new("s1".into(), state);

        let (tx1, mut rx1) = mpsc::unbounded_channel();
        session.connect("p1", tx1, Instant::now());
        let (tx2, mut rx2) = mpsc::unbounded_channel();
        session.connect("p2", tx2, Instant::now());

        session.handle_mutate("p1", 7, Mutation::ToggleStep { track_id: "t1".into(), step: 0 }, Instant::now());

        assert_eq!(session.server_seq(), 1);
        assert!(session.state().tracks[0].steps[0]);

        for rx in [&mut rx1, &mut rx2] {
            let messages = recv_all(rx);
            match &messages[..] {
                [ToClient::Message(ServerMessage::Broadcast { server_seq, originator_seq, originator_player_id, .. })] => {
                    assert_eq!(*server_seq, 1);
                    assert_eq!(*originator_seq, Some(7));
                    assert_eq!(originator_player_id, "p1");
                }
                other => panic!("unexpected messages: {other:?}"),
            }
        }
    }

    #[test]
    fn rejected_mutation_is_only_sent_to_the_originator() {
        let mut session = LiveSession::new("s1".into(), Session::default());
        let (tx1, mut rx1) = mpsc::unbounded_channel();
        session.connect("p1", tx1, Instant::now());
        let (tx2, mut rx2) = mpsc::unbounded_channel();
        session.connect("p2", tx2, Instant::now());

        session.handle_mutate("p1", 1, Mutation::ToggleStep { track_id: "unknown".into(), step: 0 }, Instant::now());

        assert_eq!(session.server_seq(), 0);
        let p1_messages = recv_all(&mut rx1);
        assert!(matches!(
            p1_messages.as_slice(),
            [ToClient::Message(ServerMessage::Rejected { seq: 1, reason: RejectReason::UnknownTrack })]
        ));
        assert!(recv_all(&mut rx2).is_empty());
    }

    #[test]
    fn prune_stale_closes_connections_past_the_threshold_but_is_rate_limited() {
        let mut session = LiveSession::new("s1".into(), Session::default());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let long_ago = Instant::now() - Duration::from_secs(200);
        session.connect("p1", tx, long_ago);
        session.last_prune = Instant::now() - Duration::from_secs(61);

        session.prune_stale(Instant::now());
        assert_eq!(session.connected_players(), 0);
        assert!(matches!(recv_all(&mut rx).as_slice(), [ToClient::Close { code: 1001, .. }]));
    }

    #[test]
    fn prune_stale_does_nothing_before_the_rate_limit_elapses() {
        let mut session = LiveSession::new("s1".into(), Session::default());
        let (tx, _rx) = mpsc::unbounded_channel();
        let long_ago = Instant::now() - Duration::from_secs(200);
        session.connect("p1", tx, long_ago);
        // last_prune defaults to "now" at construction, so this call is a no-op.
        session.prune_stale(Instant::now());
        assert_eq!(session.connected_players(), 1);
    }

    #[tokio::test]
    async fn registry_tick_broadcasts_a_snapshot_to_every_live_session() {
        let store: Arc<dyn SessionStore> = Arc::new(crate::persistence::InMemorySessionStore::new());
        let registry = SessionRegistry::new(store);
        let authority = registry.get_or_load("s1").await.unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        authority.lock().await.connect("p1", tx, Instant::now());

        registry.tick(Instant::now()).await;

        let messages = recv_all(&mut rx);
        assert!(matches!(messages.as_slice(), [ToClient::Message(ServerMessage::Snapshot { .. })]));
    }
}
