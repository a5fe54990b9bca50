//! Routing manager election

use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, info};

use crate::document::{ConfigurationDocument, EndpointEntry};
use crate::error::Result;

type EndpointKey = (u16, u16);

/// What one admitted name contributed to the shared document
#[derive(Debug, Default)]
struct Member {
    /// Live admissions under this name
    admissions: usize,
    services: BTreeSet<EndpointKey>,
    clients: BTreeSet<EndpointKey>,
}

#[derive(Debug, Default)]
struct RoutingState {
    current_router: Option<String>,
    document: Option<ConfigurationDocument>,
    members: HashMap<String, Member>,
}

/// Outcome of admitting an application into the process group
#[derive(Debug, Clone)]
pub struct Admission {
    /// Routing manager every application in the process agrees on
    pub router: String,
    /// Whether this admission elected the candidate
    pub elected: bool,
    /// Shared document as persisted for the runtime
    pub document: ConfigurationDocument,
}

/// Elects and tracks the single routing application of a process.
///
/// First writer wins: the first application admitted while no router is set
/// becomes the router and keeps the role until it releases it. The shared
/// configuration document lives under the same lock so the router written
/// into it can never disagree with the election.
///
/// `routing` in the shared document is only set while the router has an
/// `applications` entry; otherwise it is absent.
#[derive(Debug, Default)]
pub struct RoutingCoordinator {
    state: Mutex<RoutingState>,
}

impl RoutingCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Elect `candidate` if no router is set, otherwise confirm the current one
    pub fn assign_or_confirm(&self, candidate: &str) -> String {
        let mut state = self.state.lock();
        Self::assign_locked(&mut state, candidate).0
    }

    /// Clear routing ownership if `name` holds it; returns whether it did
    pub fn release(&self, name: &str) -> bool {
        let mut state = self.state.lock();
        Self::release_locked(&mut state, name)
    }

    pub fn current_router(&self) -> Option<String> {
        self.state.lock().current_router.clone()
    }

    pub fn is_router(&self, name: &str) -> bool {
        self.state.lock().current_router.as_deref() == Some(name)
    }

    /// Shared document as last persisted
    pub fn document(&self) -> Option<ConfigurationDocument> {
        self.state.lock().document.clone()
    }

    /// Admit an application: elect or confirm the router, fold `document` into
    /// the shared document, write the router into it and hand it to `persist`,
    /// all under one lock.
    ///
    /// If `persist` fails, an election made by this call is undone and the
    /// shared document is left as it was.
    pub fn admit<F>(
        &self,
        candidate: &str,
        document: &ConfigurationDocument,
        persist: F,
    ) -> Result<Admission>
    where
        F: FnOnce(&ConfigurationDocument) -> Result<()>,
    {
        let mut state = self.state.lock();
        let (router, elected) = Self::assign_locked(&mut state, candidate);

        let mut shared = match &state.document {
            Some(existing) => {
                let mut shared = existing.clone();
                shared.absorb(document);
                shared
            }
            None => document.clone(),
        };
        Self::stamp_routing(&mut shared, Some(&router));

        if let Err(e) = persist(&shared) {
            if elected {
                state.current_router = None;
            }
            return Err(e);
        }

        let member = state.members.entry(candidate.to_string()).or_default();
        member.admissions += 1;
        member.services.extend(document.services.iter().map(EndpointEntry::key));
        member.clients.extend(document.clients.iter().map(EndpointEntry::key));

        state.document = Some(shared.clone());
        Ok(Admission {
            router,
            elected,
            document: shared,
        })
    }

    /// Undo an admission whose application never came up.
    ///
    /// Releases routing if `admission` elected `candidate`, drops what the
    /// candidate contributed to the shared document and persists the result.
    pub fn withdraw<F>(&self, candidate: &str, admission: &Admission, persist: F) -> Result<()>
    where
        F: FnOnce(&ConfigurationDocument) -> Result<()>,
    {
        let mut state = self.state.lock();
        if admission.elected {
            Self::release_locked(&mut state, candidate);
        }
        Self::retire_locked(&mut state, candidate);
        match &state.document {
            Some(shared) => persist(shared),
            None => Ok(()),
        }
    }

    /// Forget one admission of `name`.
    ///
    /// Once the last admission under a name is retired, its application entry
    /// and the endpoints no other member declared leave the shared document.
    /// Routing ownership is untouched; see [`release`](Self::release).
    pub fn retire(&self, name: &str) {
        let mut state = self.state.lock();
        Self::retire_locked(&mut state, name);
    }

    fn assign_locked(state: &mut RoutingState, candidate: &str) -> (String, bool) {
        match &state.current_router {
            Some(router) => {
                debug!("{} confirmed routing manager {}", candidate, router);
                (router.clone(), false)
            }
            None => {
                state.current_router = Some(candidate.to_string());
                info!("{} elected routing manager", candidate);
                (candidate.to_string(), true)
            }
        }
    }

    fn release_locked(state: &mut RoutingState, name: &str) -> bool {
        if state.current_router.as_deref() == Some(name) {
            state.current_router = None;
            info!("Routing manager {} released ownership", name);
            true
        } else {
            debug!(
                "Ignoring routing release from {} (current router: {:?})",
                name, state.current_router
            );
            false
        }
    }

    fn retire_locked(state: &mut RoutingState, name: &str) {
        let Some(member) = state.members.get_mut(name) else {
            return;
        };
        member.admissions = member.admissions.saturating_sub(1);
        if member.admissions > 0 {
            return;
        }
        let Some(member) = state.members.remove(name) else {
            return;
        };

        let stale_services: Vec<EndpointKey> = member
            .services
            .iter()
            .filter(|key| !state.members.values().any(|m| m.services.contains(*key)))
            .copied()
            .collect();
        let stale_clients: Vec<EndpointKey> = member
            .clients
            .iter()
            .filter(|key| !state.members.values().any(|m| m.clients.contains(*key)))
            .copied()
            .collect();

        let router = state.current_router.clone();
        if let Some(shared) = state.document.as_mut() {
            shared.applications.retain(|app| app.name != name);
            shared.services.retain(|e| !stale_services.contains(&e.key()));
            shared.clients.retain(|e| !stale_clients.contains(&e.key()));
            Self::stamp_routing(shared, router.as_deref());
            debug!("Retired {} from the shared document", name);
        }
    }

    fn stamp_routing(shared: &mut ConfigurationDocument, router: Option<&str>) {
        shared.routing = router
            .filter(|router| shared.has_application(router))
            .map(str::to_string);
        if shared.routing.is_none() {
            if let Some(router) = router {
                debug!("Routing manager {} has no applications entry; routing left unset", router);
            }
        }
    }
}
