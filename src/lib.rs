//! Voicebridge - Session synchronization engine
//!
//! Mirrors a remote voice/SMS account (text threads, voicemail, contacts)
//! by polling full snapshots and folding them into local state. Polling
//! cadence adapts to a presence state pushed in by the embedding
//! application, and every change is published as an event.
//!
//! ## Module Organization
//!
//! - `backend/`: Trait the remote account implementation plugs into
//! - `bus/`: Registration-ordered fan-out event bus
//! - `config/`: Session and polling cadence configuration
//! - `poll/`: Adaptive polling state machines and their strategies
//! - `scheduler/`: Procedure spawning and the blocking worker pool
//! - `session`: Assembly of one account session
//! - `sync/`: Resource mirrors, merge and diff engines, cache files
//! - `types/`: Data structures and the error type

pub mod backend;
pub mod bus;
pub mod config;
pub mod poll;
pub mod scheduler;
pub mod session;
pub mod sync;
pub mod types;

pub use backend::AccountBackend;
pub use bus::{EventBus, Sink, SinkId};
pub use config::{default_config_paths, ResourcePolicy, SessionConfig};
pub use poll::{PollState, PollStrategy, Poller, PollerGroup, DEFAULT_MAX_DELAY};
pub use scheduler::{Scheduler, Suspend, TimerHandle};
pub use session::Session;
pub use sync::{
    AddressbookDelta, AddressbookMirror, ConversationMirror, ConversationStore, FileCache,
    Resource, SyncEvent, UpdateOutcome,
};
pub use types::error::{BridgeError, Result};
pub use types::{normalize_number, ContactEntry, Conversation, SmsMessage, ThreadSnapshot};
