//! Shared collaborators every session of a process is created against

use std::sync::Arc;

use super::identity::ApplicationIdentity;
use super::session::Session;
use crate::config::SessionSettings;
use crate::document::{DocumentOverrides, DocumentStore};
use crate::error::Result;
use crate::purge::PurgePolicy;
use crate::routing::RoutingCoordinator;
use crate::runtime::Runtime;

/// Runtime, routing coordinator, document store and lock purge policy shared
/// by the sessions of one process group
#[derive(Clone)]
pub struct SessionHost {
    runtime: Arc<dyn Runtime>,
    coordinator: Arc<RoutingCoordinator>,
    store: DocumentStore,
    purge: Option<PurgePolicy>,
}

impl SessionHost {
    pub fn new(
        runtime: Arc<dyn Runtime>,
        coordinator: Arc<RoutingCoordinator>,
        store: DocumentStore,
    ) -> Self {
        Self {
            runtime,
            coordinator,
            store,
            purge: Some(PurgePolicy::default()),
        }
    }

    /// Host with a fresh coordinator, wired from loaded settings
    pub fn from_settings(settings: &SessionSettings, runtime: Arc<dyn Runtime>) -> Self {
        Self {
            runtime,
            coordinator: Arc::new(RoutingCoordinator::new()),
            store: DocumentStore::new(settings.document.path.clone()),
            purge: settings.purge.enabled.then(|| settings.purge.policy()),
        }
    }

    pub fn with_purge(mut self, policy: PurgePolicy) -> Self {
        self.purge = Some(policy);
        self
    }

    pub fn without_purge(mut self) -> Self {
        self.purge = None;
        self
    }

    pub fn runtime(&self) -> &Arc<dyn Runtime> {
        &self.runtime
    }

    pub fn coordinator(&self) -> &Arc<RoutingCoordinator> {
        &self.coordinator
    }

    pub fn store(&self) -> &DocumentStore {
        &self.store
    }

    pub fn purge_policy(&self) -> Option<&PurgePolicy> {
        self.purge.as_ref()
    }

    pub fn create_session(&self, options: SessionOptions) -> Result<Session> {
        Session::create(self, options)
    }
}

impl std::fmt::Debug for SessionHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHost")
            .field("coordinator", &self.coordinator)
            .field("store", &self.store)
            .field("purge", &self.purge)
            .finish()
    }
}

/// What a new session is created with
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub identity: ApplicationIdentity,
    pub overrides: DocumentOverrides,
    /// Event group used for event offers and subscriptions (0x0000 = all)
    pub event_group: u16,
    /// Purge stale runtime locks before creating the application
    pub force_purge: bool,
}

impl SessionOptions {
    pub fn new(name: impl Into<String>, service_id: u16, instance_id: u16) -> Self {
        Self {
            identity: ApplicationIdentity::new(name, service_id, instance_id),
            overrides: DocumentOverrides::default(),
            event_group: 0x0000,
            force_purge: true,
        }
    }

    pub fn version(mut self, major: u8, minor: u8) -> Self {
        self.identity = self.identity.with_version(major, minor);
        self
    }

    pub fn overrides(mut self, overrides: DocumentOverrides) -> Self {
        self.overrides = overrides;
        self
    }

    pub fn event_group(mut self, group: u16) -> Self {
        self.event_group = group;
        self
    }

    pub fn force_purge(mut self, force: bool) -> Self {
        self.force_purge = force;
        self
    }
}
