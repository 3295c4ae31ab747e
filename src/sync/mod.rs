//! Resource mirrors and their change notifications
//!
//! Each remote resource (text threads, voicemail threads, contacts) is
//! mirrored locally by a type implementing [`Resource`]. Mirrors are
//! refreshed through the scheduler, persist merged state to a per-resource
//! cache file, and publish [`SyncEvent`]s on their own bus.

pub mod addressbook;
pub mod cache;
pub mod conversations;

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::bus::EventBus;

pub use addressbook::{diff, AddressbookDelta, AddressbookMirror, ContactFetch};
pub use cache::{FileCache, CACHE_FORMAT_VERSION};
pub use conversations::{ConversationMirror, ConversationStore, ThreadFetch};

/// A pollable mirror of one remote resource
pub trait Resource: Send + Sync {
    /// Stable name used in events, logs, and cache file names
    fn name(&self) -> &str;

    /// Kick off an update cycle without waiting for it. With `force` off
    /// the mirror declines when it already holds state.
    fn update(&self, force: bool);

    /// Bus carrying this resource's change notifications
    fn events(&self) -> &EventBus<SyncEvent>;
}

/// Event emitted by a resource mirror
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SyncEvent {
    ThreadsChanged {
        resource: String,
        numbers: BTreeSet<String>,
    },
    ContactsChanged {
        added: BTreeSet<String>,
        removed: BTreeSet<String>,
        changed: BTreeSet<String>,
    },
    UpdateFailed {
        resource: String,
        message: String,
    },
}

/// What a completed update cycle did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// Unforced update declined because state was already present
    Skipped,
    /// Fetch completed but nothing advanced
    Unchanged,
    Threads { changed: BTreeSet<String> },
    Contacts { delta: AddressbookDelta },
}
