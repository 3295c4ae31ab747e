//! Addressbook diff engine
//!
//! Contacts are replaced wholesale on every poll rather than merged. Each
//! refresh diffs the stored map against the incoming one and reports which
//! normalized numbers were added, removed, or changed in place.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::bus::EventBus;
use crate::scheduler::{Scheduler, Suspend};
use crate::sync::cache::FileCache;
use crate::sync::{Resource, SyncEvent, UpdateOutcome};
use crate::types::error::{BridgeError, Result};
use crate::types::{normalize_number, ContactEntry};

/// Zero-argument fetch capability returning the full current contact list
pub type ContactFetch = Arc<dyn Fn() -> Result<Vec<ContactEntry>> + Send + Sync>;

/// Normalized numbers that differ between two addressbook generations
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressbookDelta {
    pub added: BTreeSet<String>,
    pub removed: BTreeSet<String>,
    pub changed: BTreeSet<String>,
}

impl AddressbookDelta {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }
}

/// Compare two contact maps keyed by normalized number.
pub fn diff(
    old: &BTreeMap<String, ContactEntry>,
    new: &BTreeMap<String, ContactEntry>,
) -> AddressbookDelta {
    let mut delta = AddressbookDelta::default();
    for (number, entry) in new {
        match old.get(number) {
            None => {
                delta.added.insert(number.clone());
            }
            Some(prior) if prior != entry => {
                delta.changed.insert(number.clone());
            }
            Some(_) => {}
        }
    }
    for number in old.keys() {
        if !new.contains_key(number) {
            delta.removed.insert(number.clone());
        }
    }
    delta
}

struct MirrorInner {
    name: String,
    scheduler: Scheduler,
    fetch: ContactFetch,
    bus: EventBus<SyncEvent>,
    store: Mutex<BTreeMap<String, ContactEntry>>,
    cache: Option<FileCache>,
}

/// Locally mirrored addressbook, refreshed through the scheduler and
/// publishing one delta event per poll that changed anything.
#[derive(Clone)]
pub struct AddressbookMirror {
    inner: Arc<MirrorInner>,
}

impl AddressbookMirror {
    pub fn new(
        name: &str,
        scheduler: Scheduler,
        fetch: ContactFetch,
        cache: Option<FileCache>,
    ) -> Self {
        let mut store = BTreeMap::new();
        if let Some(cache) = &cache {
            if let Some(contacts) = cache.load::<BTreeMap<String, ContactEntry>>() {
                info!(
                    resource = name,
                    contacts = contacts.len(),
                    "seeded addressbook from cache"
                );
                store = contacts;
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

    fn store(&self) -> MutexGuard<'_, BTreeMap<String, ContactEntry>> {
        self.inner
            .store
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Fire-and-forget update, scheduled as a tracked procedure.
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
            debug!(resource = %self.inner.name, "contacts present, skipping unforced update");
            return Ok(UpdateOutcome::Skipped);
        }

        let fetch = Arc::clone(&self.inner.fetch);
        let fetched = suspend.run(move || fetch()).await?;
        debug!(
            resource = %self.inner.name,
            contacts = fetched.len(),
            "fetched contact list"
        );

        let mut incoming = BTreeMap::new();
        for entry in fetched {
            let key = normalize_number(&entry.number);
            if incoming.insert(key.clone(), entry).is_some() {
                debug!(number = %key, "duplicate contact number in fetch, keeping last");
            }
        }

        let delta = {
            let mut store = self.store();
            let delta = diff(&store, &incoming);
            *store = incoming;
            delta
        };
        if delta.is_empty() {
            return Ok(UpdateOutcome::Unchanged);
        }
        info!(
            resource = %self.inner.name,
            added = delta.added.len(),
            removed = delta.removed.len(),
            changed = delta.changed.len(),
            "addressbook changed"
        );
        self.inner.bus.publish(&SyncEvent::ContactsChanged {
            added: delta.added.clone(),
            removed: delta.removed.clone(),
            changed: delta.changed.clone(),
        });
        self.persist(suspend).await;
        Ok(UpdateOutcome::Contacts { delta })
    }

    async fn persist(&self, suspend: &mut Suspend) {
        let cache = match &self.inner.cache {
            Some(cache) => cache.clone(),
            None => return,
        };
        let payload = self.store().clone();
        if payload.is_empty() {
            debug!(resource = %self.inner.name, "nothing to persist, skipping save");
            return;
        }
        if let Err(err) = suspend.run(move || cache.save(&payload)).await {
            warn!(resource = %self.inner.name, error = %err, "failed to persist addressbook");
        }
    }

    fn report_failure(&self, err: &BridgeError) {
        warn!(resource = %self.inner.name, error = %err, "update failed");
        self.inner.bus.publish(&SyncEvent::UpdateFailed {
            resource: self.inner.name.clone(),
            message: err.to_string(),
        });
    }

    pub fn numbers(&self) -> Vec<String> {
        self.store().keys().cloned().collect()
    }

    pub fn get(&self, number: &str) -> Option<ContactEntry> {
        self.store().get(&normalize_number(number)).cloned()
    }

    pub fn contacts(&self) -> BTreeMap<String, ContactEntry> {
        self.store().clone()
    }

    pub fn len(&self) -> usize {
        self.store().len()
    }

    pub fn is_empty(&self) -> bool {
        self.store().is_empty()
    }

    /// Drop one contact locally. Returns false when it was not present.
    pub fn clear(&self, number: &str) -> bool {
        self.store().remove(&normalize_number(number)).is_some()
    }

    pub fn clear_all(&self) {
        self.store().clear();
    }
}

impl Resource for AddressbookMirror {
    fn name(&self) -> &str {
        &self.inner.name
    }

    fn update(&self, force: bool) {
        AddressbookMirror::update(self, force);
    }

    fn events(&self) -> &EventBus<SyncEvent> {
        &self.inner.bus
    }
}
