pub mod backoff;
pub mod error;
pub mod identity;
pub mod lifecycle;
pub mod reducer;
pub mod sync_engine;
pub mod tracker;

pub use backoff::Backoff;
pub use error::SyncError;
pub use identity::{player_id_for, FileIdentityStore, IdentityStore, InMemoryIdentityStore};
pub use lifecycle::SingletonRegistry;
pub use reducer::{LocalUiState, MutationSink, ReducerBridge, RecordingSink, Selection};
pub use sync_engine::{ClientSyncEngine, Inbound, SyncEngineState};
pub use tracker::{mutation_target, MutationState, MutationTracker, TrackedMutation};
