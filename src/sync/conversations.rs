//! Conversation merge engine
//!
//! Repeated full-snapshot polls are folded into an append-only history per
//! normalized number. Appends must move strictly forward in time; stale
//! results are skipped. When a poll revisits a thread seen in an earlier
//! poll, the newest status flags win retroactively, messages already on
//! record are dropped from the incoming snapshot, and a revisit that
//! carries nothing new at a newer timestamp is treated as the backend
//! shrinking its data, which aborts the update instead of being absorbed.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

use crate::bus::EventBus;
use crate::scheduler::{Scheduler, Suspend};
use crate::sync::cache::FileCache;
use crate::sync::{Resource, SyncEvent, UpdateOutcome};
use crate::types::error::{BridgeError, Result};
use crate::types::{normalize_number, Conversation, ThreadSnapshot};

/// Zero-argument fetch capability returning the full current snapshot set
pub type ThreadFetch = Arc<dyn Fn() -> Result<Vec<ThreadSnapshot>> + Send + Sync>;

/// Merged per-number history of polled snapshots
#[derive(Debug, Default)]
pub struct ConversationStore {
    conversations: BTreeMap<String, Conversation>,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_conversations(conversations: BTreeMap<String, Conversation>) -> Self {
        Self { conversations }
    }

    /// Fold one poll's snapshot set into the store.
    ///
    /// Snapshots are processed in ascending time order. Returns the set of
    /// normalized numbers whose history grew. A revisited thread whose
    /// messages dedup away entirely is a contract violation by the
    /// backend and fails the whole merge.
    pub fn merge(&mut self, mut fetched: Vec<ThreadSnapshot>) -> Result<BTreeSet<String>> {
        fetched.sort_by_key(|snapshot| snapshot.time);
        let mut changed = BTreeSet::new();

        for mut snapshot in fetched {
            let key = normalize_number(&snapshot.number);
            let conversation = self
                .conversations
                .entry(key.clone())
                .or_insert_with(|| Conversation::new(key.clone()));

            if let Some(last_time) = conversation.last_time() {
                if snapshot.time <= last_time {
                    warn!(
                        number = %key,
                        thread = %snapshot.id,
                        "stale snapshot does not advance history, skipping"
                    );
                    continue;
                }
            }

            let mut revisited = false;
            for prior in conversation
                .entries
                .iter_mut()
                .filter(|entry| entry.id == snapshot.id)
            {
                revisited = true;
                // Newest poll's status flags win, applied retroactively.
                prior.is_spam = snapshot.is_spam;
                prior.is_trash = snapshot.is_trash;
                prior.is_archived = snapshot.is_archived;
                snapshot
                    .messages
                    .retain(|message| !prior.messages.contains(message));
            }

            if revisited {
                if snapshot.messages.is_empty() {
                    return Err(BridgeError::SnapshotRegression(format!(
                        "thread {} advanced to {} with no unseen messages",
                        snapshot.id, snapshot.time
                    )));
                }
                // There is genuinely new content; a backend race can mark
                // the thread read before the reply shows up, so do not
                // trust its flag here.
                snapshot.is_read = false;
            }

            conversation.entries.push(snapshot);
            changed.insert(key);
        }

        Ok(changed)
    }

    pub fn numbers(&self) -> Vec<String> {
        self.conversations.keys().cloned().collect()
    }

    pub fn get(&self, number: &str) -> Option<&Conversation> {
        self.conversations.get(&normalize_number(number))
    }

    pub fn remove(&mut self, number: &str) -> Option<Conversation> {
        self.conversations.remove(&normalize_number(number))
    }

    pub fn clear(&mut self) {
        self.conversations.clear();
    }

    pub fn len(&self) -> usize {
        self.conversations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conversations.is_empty()
    }

    pub fn snapshot(&self) -> BTreeMap<String, Conversation> {
        self.conversations.clone()
    }
}

struct MirrorInner {
    name: String,
    scheduler: Scheduler,
    fetch: ThreadFetch,
    bus: EventBus<SyncEvent>,
    store: Mutex<ConversationStore>,
    cache: Option<FileCache>,
}

/// Locally mirrored view of one conversation-like resource (texts or
/// voicemail), refreshed through the scheduler and publishing a changed-keys
/// event per poll that grew any history.
#[derive(Clone)]
pub struct ConversationMirror {
    inner: Arc<MirrorInner>,
}

impl ConversationMirror {
    pub fn new(
        name: &str,
        scheduler: Scheduler,
        fetch: ThreadFetch,
        cache: Option<FileCache>,
    ) -> Self {
        let mut store = ConversationStore::new();
        if let Some(cache) = &cache {
            if let Some(conversations) = cache.load::<BTreeMap<String, Conversation>>() {
                info!(
                    resource = name,
                    conversations = conversations.len(),
                    "seeded mirror from cache"
                );
                store = ConversationStore::from_conversations(conversations);
            }
        }
        Self {
            inner: Arc::new(MirrorInner {
                name: name.to_string(),
                scheduler,
                fetch,
                bus: EventBus::new(),
                store: Mutex::new(store),
                cache,
            }),
        }
    }

    fn store(&self) -> MutexGuard<'_, ConversationStore> {
        self.inner
            .store
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Fire-and-forget update, scheduled as a tracked procedure. Failures
    /// are logged and surfaced as an `UpdateFailed` event.
    pub fn update(&self, force: bool) {
        let mirror = self.clone();
        self.inner.scheduler.spawn(move |mut suspend| async move {
            if let Err(err) = mirror.refresh_with(&mut suspend, force).await {
                mirror.report_failure(&err);
            }
            Ok(())
        });
    }

    /// Run one update cycle and await its outcome.
    pub async fn refresh(&self, force: bool) -> Result<UpdateOutcome> {
        let mut suspend = self.inner.scheduler.suspend();
        self.refresh_with(&mut suspend, force).await
    }

    async fn refresh_with(&self, suspend: &mut Suspend, force: bool) -> Result<UpdateOutcome> {
        if !force && !self.is_empty() {
            debug!(resource = %self.inner.name, "history present, skipping unforced update");
            return Ok(UpdateOutcome::Skipped);
        }

        let fetch = Arc::clone(&self.inner.fetch);
        let fetched = suspend.run(move || fetch()).await?;
        debug!(
            resource = %self.inner.name,
            snapshots = fetched.len(),
            "fetched snapshot set"
        );

        let changed = self.store().merge(fetched)?;
        if changed.is_empty() {
            return Ok(UpdateOutcome::Unchanged);
        }
        info!(
            resource = %self.inner.name,
            changed = changed.len(),
            "conversation history grew"
        );
        self.inner.bus.publish(&SyncEvent::ThreadsChanged {
            resource: self.inner.name.clone(),
            numbers: changed.clone(),
        });
        self.persist(suspend).await;
        Ok(UpdateOutcome::Threads { changed })
    }

    /// Write the merged state to the resource cache on a worker thread.
    /// Persistence failures degrade to a warning; the in-memory mirror
    /// stays authoritative.
    async fn persist(&self, suspend: &mut Suspend) {
        let cache = match &self.inner.cache {
            Some(cache) => cache.clone(),
            None => return,
        };
        let payload = self.store().snapshot();
        if payload.is_empty() {
            debug!(resource = %self.inner.name, "nothing to persist, skipping save");
            return;
        }
        if let Err(err) = suspend.run(move || cache.save(&payload)).await {
            warn!(resource = %self.inner.name, error = %err, "failed to persist mirror");
        }
    }

    fn report_failure(&self, err: &BridgeError) {
        match err {
            BridgeError::SnapshotRegression(_) => {
                tracing::error!(resource = %self.inner.name, error = %err, "update aborted")
            }
            _ => warn!(resource = %self.inner.name, error = %err, "update failed"),
        }
        self.inner.bus.publish(&SyncEvent::UpdateFailed {
            resource: self.inner.name.clone(),
            message: err.to_string(),
        });
    }

    pub fn numbers(&self) -> Vec<String> {
        self.store().numbers()
    }

    pub fn get(&self, number: &str) -> Option<Conversation> {
        self.store().get(number).cloned()
    }

    pub fn len(&self) -> usize {
        self.store().len()
    }

    pub fn is_empty(&self) -> bool {
        self.store().is_empty()
    }

    /// Drop one number's history. Returns false when it was not present.
    pub fn clear(&self, number: &str) -> bool {
        self.store().remove(number).is_some()
    }

    pub fn clear_all(&self) {
        self.store().clear();
    }
}

impl Resource for ConversationMirror {
    fn name(&self) -> &str {
        &self.inner.name
    }

    fn update(&self, force: bool) {
        ConversationMirror::update(self, force);
    }

    fn events(&self) -> &EventBus<SyncEvent> {
        &self.inner.bus
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SmsMessage;
    use chrono::{DateTime, TimeZone, Utc};
    use std::collections::VecDeque;
    use std::sync::Mutex as StdMutex;

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 14, 9, minute, 0).unwrap()
    }

    fn message(text: &str, minute: u32) -> SmsMessage {
        SmsMessage {
            from: "5555551224".into(),
            text: text.into(),
            time: at(minute),
        }
    }

    fn snapshot(id: &str, number: &str, minute: u32, texts: &[(&str, u32)]) -> ThreadSnapshot {
        ThreadSnapshot {
            id: id.into(),
            number: number.into(),
            time: at(minute),
            messages: texts
                .iter()
                .map(|(text, minute)| message(text, *minute))
                .collect(),
            is_read: true,
            is_archived: false,
            is_spam: false,
            is_trash: false,
        }
    }

    #[test]
    fn test_empty_fetch_creates_nothing() {
        let mut store = ConversationStore::new();
        let changed = store.merge(Vec::new()).unwrap();
        assert!(changed.is_empty());
        assert!(store.is_empty());
    }

    #[test]
    fn test_first_merge_creates_history() {
        let mut store = ConversationStore::new();
        let changed = store
            .merge(vec![snapshot("conv1", "(555) 555-1224", 0, &[("hi", 0)])])
            .unwrap();

        assert_eq!(changed, BTreeSet::from(["5555551224".to_string()]));
        let conversation = store.get("5555551224").unwrap();
        assert_eq!(conversation.entries.len(), 1);
        assert_eq!(conversation.message_count(), 1);
    }

    #[test]
    fn test_snapshots_merge_in_time_order_across_numbers() {
        let mut store = ConversationStore::new();
        let changed = store
            .merge(vec![
                snapshot("conv2", "5555550000", 5, &[("later", 5)]),
                snapshot("conv1", "5555551224", 0, &[("earlier", 0)]),
            ])
            .unwrap();
        assert_eq!(changed.len(), 2);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_growing_thread_dedups_existing_messages() {
        let mut store = ConversationStore::new();
        store
            .merge(vec![snapshot("conv1", "5555551224", 0, &[("hi", 0)])])
            .unwrap();

        let changed = store
            .merge(vec![snapshot(
                "conv1",
                "5555551224",
                3,
                &[("hi", 0), ("are you there?", 3)],
            )])
            .unwrap();

        assert_eq!(changed, BTreeSet::from(["5555551224".to_string()]));
        let conversation = store.get("5555551224").unwrap();
        assert_eq!(conversation.entries.len(), 2);
        assert_eq!(conversation.message_count(), 2);
        assert_eq!(conversation.entries[1].messages[0].text, "are you there?");
    }

    #[test]
    fn test_replayed_snapshot_is_skipped_not_merged() {
        let mut store = ConversationStore::new();
        let first = snapshot("conv1", "5555551224", 0, &[("hi", 0)]);
        store.merge(vec![first.clone()]).unwrap();

        let changed = store.merge(vec![first]).unwrap();

        assert!(changed.is_empty());
        assert_eq!(store.get("5555551224").unwrap().message_count(), 1);
    }

    #[test]
    fn test_out_of_order_snapshot_is_skipped() {
        let mut store = ConversationStore::new();
        store
            .merge(vec![snapshot("conv1", "5555551224", 10, &[("hi", 10)])])
            .unwrap();

        let changed = store
            .merge(vec![snapshot("conv0", "5555551224", 4, &[("old", 4)])])
            .unwrap();

        assert!(changed.is_empty());
        assert_eq!(store.get("5555551224").unwrap().entries.len(), 1);
    }

    #[test]
    fn test_revisit_copies_flags_onto_prior_entries() {
        let mut store = ConversationStore::new();
        store
            .merge(vec![snapshot("conv1", "5555551224", 0, &[("hi", 0)])])
            .unwrap();

        let mut second = snapshot("conv1", "5555551224", 3, &[("hi", 0), ("spam!", 3)]);
        second.is_spam = true;
        second.is_archived = true;
        store.merge(vec![second]).unwrap();

        let conversation = store.get("5555551224").unwrap();
        assert!(conversation.entries[0].is_spam);
        assert!(conversation.entries[0].is_archived);
        assert!(!conversation.entries[0].is_trash);
    }

    #[test]
    fn test_revisit_with_new_content_is_forced_unread() {
        let mut store = ConversationStore::new();
        store
            .merge(vec![snapshot("conv1", "5555551224", 0, &[("hi", 0)])])
            .unwrap();

        // The backend claims read, but the thread carries an unseen reply.
        let second = snapshot("conv1", "5555551224", 3, &[("hi", 0), ("reply", 3)]);
        assert!(second.is_read);
        store.merge(vec![second]).unwrap();

        let conversation = store.get("5555551224").unwrap();
        assert!(!conversation.entries[1].is_read);
    }

    #[test]
    fn test_fresh_thread_keeps_backend_read_flag() {
        let mut store = ConversationStore::new();
        store
            .merge(vec![snapshot("conv1", "5555551224", 0, &[("hi", 0)])])
            .unwrap();
        assert!(store.get("5555551224").unwrap().entries[0].is_read);
    }

    #[test]
    fn test_dedup_exhaustion_is_fatal() {
        let mut store = ConversationStore::new();
        store
            .merge(vec![snapshot("conv1", "5555551224", 0, &[("hi", 0)])])
            .unwrap();

        // Newer timestamp, same single message: the backend lost data.
        let result = store.merge(vec![snapshot("conv1", "5555551224", 5, &[("hi", 0)])]);

        assert!(matches!(result, Err(BridgeError::SnapshotRegression(_))));
    }

    #[test]
    fn test_numbers_normalize_to_one_key() {
        let mut store = ConversationStore::new();
        store
            .merge(vec![snapshot("conv1", "+1 (555) 555-1224", 0, &[("hi", 0)])])
            .unwrap();
        store
            .merge(vec![snapshot(
                "conv1",
                "555-555-1224",
                2,
                &[("hi", 0), ("again", 2)],
            )])
            .unwrap();

        assert_eq!(store.numbers(), vec!["5555551224".to_string()]);
        assert_eq!(store.get("5555551224").unwrap().message_count(), 2);
    }

    fn scripted_mirror(
        responses: Vec<Result<Vec<ThreadSnapshot>>>,
    ) -> (ConversationMirror, Scheduler, Arc<StdMutex<Vec<SyncEvent>>>) {
        let scheduler = Scheduler::new(1).unwrap();
        let script = Arc::new(StdMutex::new(VecDeque::from(responses)));
        let fetch: ThreadFetch = Arc::new(move || {
            script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(Vec::new()))
        });
        let mirror = ConversationMirror::new("texts", scheduler.clone(), fetch, None);
        let events = Arc::new(StdMutex::new(Vec::new()));
        let sink_events = Arc::clone(&events);
        mirror.events().subscribe(Box::new(move |event: &SyncEvent| {
            sink_events.lock().unwrap().push(event.clone());
            Ok(())
        }));
        (mirror, scheduler, events)
    }

    #[tokio::test]
    async fn test_refresh_publishes_one_changed_keys_event() {
        let (mirror, scheduler, events) = scripted_mirror(vec![
            Ok(vec![snapshot("conv1", "5555551224", 0, &[("hi", 0)])]),
            Ok(vec![snapshot(
                "conv1",
                "5555551224",
                3,
                &[("hi", 0), ("more", 3)],
            )]),
        ]);

        let outcome = mirror.refresh(true).await.unwrap();
        assert!(matches!(outcome, UpdateOutcome::Threads { .. }));
        let outcome = mirror.refresh(true).await.unwrap();
        match outcome {
            UpdateOutcome::Threads { changed } => {
                assert_eq!(changed, BTreeSet::from(["5555551224".to_string()]))
            }
            other => panic!("unexpected outcome: {other:?}"),
        }

        assert_eq!(mirror.get("5555551224").unwrap().message_count(), 2);
        let seen = events.lock().unwrap();
        assert_eq!(seen.len(), 2);
        for event in seen.iter() {
            match event {
                SyncEvent::ThreadsChanged { resource, numbers } => {
                    assert_eq!(resource, "texts");
                    assert_eq!(numbers, &BTreeSet::from(["5555551224".to_string()]));
                }
                other => panic!("unexpected event: {other:?}"),
            }
        }
        drop(seen);
        scheduler.stop();
    }

    #[tokio::test]
    async fn test_empty_fetch_emits_no_event() {
        let (mirror, scheduler, events) = scripted_mirror(vec![Ok(Vec::new())]);

        let outcome = mirror.refresh(true).await.unwrap();
        assert!(matches!(outcome, UpdateOutcome::Unchanged));
        assert!(mirror.is_empty());
        assert!(events.lock().unwrap().is_empty());
        scheduler.stop();
    }

    #[tokio::test]
    async fn test_unforced_refresh_is_throttled_by_existing_state() {
        let (mirror, scheduler, _) = scripted_mirror(vec![
            Ok(vec![snapshot("conv1", "5555551224", 0, &[("hi", 0)])]),
            Err(BridgeError::Network("should not be fetched".into())),
        ]);

        mirror.refresh(true).await.unwrap();
        let outcome = mirror.refresh(false).await.unwrap();
        assert!(matches!(outcome, UpdateOutcome::Skipped));

        // An empty mirror does fetch even unforced.
        mirror.clear_all();
        let outcome = mirror.refresh(false).await;
        assert!(matches!(outcome, Err(BridgeError::Network(_))));
        scheduler.stop();
    }

    #[tokio::test]
    async fn test_fetch_failure_surfaces_and_publishes_update_failed() {
        let (mirror, scheduler, events) = scripted_mirror(vec![Err(BridgeError::Auth(
            "session expired".into(),
        ))]);

        mirror.update(true);
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
        loop {
            if !events.lock().unwrap().is_empty() {
                break;
            }
            assert!(std::time::Instant::now() < deadline, "no event arrived");
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }

        let seen = events.lock().unwrap();
        match &seen[0] {
            SyncEvent::UpdateFailed { resource, message } => {
                assert_eq!(resource, "texts");
                assert!(message.contains("session expired"));
            }
            other => panic!("unexpected event: {other:?}"),
        }
        drop(seen);
        scheduler.stop();
    }

    #[tokio::test]
    async fn test_snapshot_regression_aborts_cycle_without_event() {
        let (mirror, scheduler, events) = scripted_mirror(vec![
            Ok(vec![snapshot("conv1", "5555551224", 0, &[("hi", 0)])]),
            Ok(vec![snapshot("conv1", "5555551224", 5, &[("hi", 0)])]),
        ]);

        mirror.refresh(true).await.unwrap();
        let result = mirror.refresh(true).await;
        assert!(matches!(result, Err(BridgeError::SnapshotRegression(_))));

        // Only the first cycle published a change event.
        assert_eq!(events.lock().unwrap().len(), 1);
        scheduler.stop();
    }

    #[tokio::test]
    async fn test_cache_round_trip_seeds_new_mirror() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileCache::new(dir.path(), "5551230000", "texts", "0.1.0");
        let scheduler = Scheduler::new(1).unwrap();
        let fetch: ThreadFetch = Arc::new(|| {
            Ok(vec![snapshot("conv1", "5555551224", 0, &[("hi", 0)])])
        });
        let mirror = ConversationMirror::new(
            "texts",
            scheduler.clone(),
            fetch,
            Some(cache.clone()),
        );
        mirror.refresh(true).await.unwrap();
        assert!(cache.path().exists());

        let no_fetch: ThreadFetch = Arc::new(|| {
            Err(BridgeError::Network("should not be fetched".into()))
        });
        let seeded =
            ConversationMirror::new("texts", scheduler.clone(), no_fetch, Some(cache));
        assert_eq!(seeded.len(), 1);
        assert!(matches!(
            seeded.refresh(false).await.unwrap(),
            UpdateOutcome::Skipped
        ));
        scheduler.stop();
    }
}
