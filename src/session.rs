//! Session assembly
//!
//! A [`Session`] wires one backend to the three resource mirrors, gives each
//! mirror its own polling machine, and groups the machines under a master
//! that fans out lifecycle calls. Consumers subscribe to change events on
//! the individual mirrors.

use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::backend::AccountBackend;
use crate::config::SessionConfig;
use crate::poll::{PollState, Poller, PollerGroup};
use crate::scheduler::Scheduler;
use crate::sync::{
    AddressbookMirror, ContactFetch, ConversationMirror, FileCache, Resource, ThreadFetch,
};
use crate::types::error::Result;

pub struct Session {
    config: SessionConfig,
    scheduler: Scheduler,
    backend: Arc<dyn AccountBackend>,
    texts: ConversationMirror,
    voicemail: ConversationMirror,
    contacts: AddressbookMirror,
    group: PollerGroup,
}

impl Session {
    pub fn new(config: SessionConfig, backend: Arc<dyn AccountBackend>) -> Result<Self> {
        let scheduler = Scheduler::new(config.workers)?;
        let max_delay = Duration::from_secs(config.max_poll_delay_secs);

        let cache_dir = config
            .cache_dir
            .clone()
            .or_else(|| dirs::cache_dir().map(|dir| dir.join("voicebridge")));
        if cache_dir.is_none() {
            warn!("no cache directory available, mirrors start cold every run");
        }
        let cache_for = |resource: &str| {
            cache_dir
                .as_deref()
                .map(|dir| FileCache::new(dir, &config.account, resource, &config.build))
        };

        let texts_backend = Arc::clone(&backend);
        let texts_fetch: ThreadFetch = Arc::new(move || texts_backend.fetch_texts());
        let texts = ConversationMirror::new("texts", scheduler.clone(), texts_fetch, cache_for("texts"));

        let voicemail_backend = Arc::clone(&backend);
        let voicemail_fetch: ThreadFetch = Arc::new(move || voicemail_backend.fetch_voicemails());
        let voicemail = ConversationMirror::new(
            "voicemail",
            scheduler.clone(),
            voicemail_fetch,
            cache_for("voicemail"),
        );

        let contacts_backend = Arc::clone(&backend);
        let contacts_fetch: ContactFetch = Arc::new(move || contacts_backend.fetch_contacts());
        let contacts = AddressbookMirror::new(
            "contacts",
            scheduler.clone(),
            contacts_fetch,
            cache_for("contacts"),
        );

        let texts_poller = Poller::new("texts", config.texts.clone(), scheduler.clone(), max_delay);
        texts_poller.bind(Arc::new(texts.clone()) as Arc<dyn Resource>);
        let voicemail_poller = Poller::new(
            "voicemail",
            config.voicemail.clone(),
            scheduler.clone(),
            max_delay,
        );
        voicemail_poller.bind(Arc::new(voicemail.clone()) as Arc<dyn Resource>);
        let contacts_poller = Poller::new(
            "contacts",
            config.contacts.clone(),
            scheduler.clone(),
            max_delay,
        );
        contacts_poller.bind(Arc::new(contacts.clone()) as Arc<dyn Resource>);

        let group = PollerGroup::new(vec![texts_poller, voicemail_poller, contacts_poller]);

        info!(
            account = %config.account,
            workers = config.workers,
            "session assembled"
        );
        Ok(Self {
            config,
            scheduler,
            backend,
            texts,
            voicemail,
            contacts,
            group,
        })
    }

    /// Authenticate against the backend on a worker thread.
    pub async fn login(&self) -> Result<()> {
        let backend = Arc::clone(&self.backend);
        self.scheduler.io(move || backend.login()).await?;
        info!(account = %self.config.account, "logged in");
        Ok(())
    }

    /// Start polling every resource in the current presence state.
    pub fn start(&self) {
        self.group.start();
    }

    /// Halt polling timers. Cadence positions survive for a later start.
    pub fn stop(&self) {
        self.group.stop();
    }

    /// Push a presence change to every polling machine.
    pub fn set_state(&self, state: PollState) {
        self.group.set_state(state);
    }

    /// Snap every polling machine back to its fastest cadence.
    pub fn reset_timers(&self) {
        self.group.reset_timers();
    }

    pub fn state(&self) -> PollState {
        self.group.state()
    }

    /// Tear the session down. Polling machines are closed for good and the
    /// scheduler stops, so the session cannot be restarted afterwards.
    pub fn close(&self) {
        self.group.close();
        self.scheduler.stop();
        info!(account = %self.config.account, "session closed");
    }

    pub fn texts(&self) -> &ConversationMirror {
        &self.texts
    }

    pub fn voicemail(&self) -> &ConversationMirror {
        &self.voicemail
    }

    pub fn contacts(&self) -> &AddressbookMirror {
        &self.contacts
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }
}
