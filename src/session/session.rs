//! Application Session

use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::host::{SessionHost, SessionOptions};
use super::identity::ApplicationIdentity;
use super::state::{Role, RoleCell, SessionState};
use crate::dispatch::{default_handler, Bindings, MessageHandler, MessageType};
use crate::document::{build_default, merge, ConfigurationDocument, Transport};
use crate::error::{Result, SessionError};
use crate::purge::purge_stale_locks;
use crate::routing::RoutingCoordinator;
use crate::runtime::Runtime;

/// Payload sent when the caller supplies none; the runtime needs at least one byte
const EMPTY_PAYLOAD: &[u8] = &[0x00];

#[derive(Debug, Default)]
struct Offers {
    endpoint: bool,
    events: BTreeSet<u16>,
}

/// One application on the SOME/IP network.
///
/// Methods take `&self`, so a session can be shared with the handlers it
/// installs (a service typically notifies from inside a request handler).
pub struct Session {
    identity: ApplicationIdentity,
    event_group: u16,
    runtime: Arc<dyn Runtime>,
    coordinator: Arc<RoutingCoordinator>,
    configuration: ConfigurationDocument,
    role: Arc<RoleCell>,
    state: Mutex<SessionState>,
    ready: AtomicBool,
    /// Set when this session's admission won the routing election
    holds_routing: AtomicBool,
    bindings: Bindings,
    offers: Mutex<Offers>,
}

impl Session {
    /// Admit the application and create it in the runtime.
    ///
    /// The merged document is folded into the process-wide document, stamped
    /// with the agreed router and written for the runtime before `create`. If
    /// `create` fails, the admission is withdrawn (election and document
    /// entries) and the runtime's error is returned as is.
    pub fn create(host: &SessionHost, options: SessionOptions) -> Result<Self> {
        let SessionOptions {
            identity,
            overrides,
            event_group,
            force_purge,
        } = options;

        let document = merge(&build_default()?, &overrides);
        let store = host.store();
        let admission = host
            .coordinator()
            .admit(&identity.name, &document, |shared| store.write(shared))?;

        info!(
            "Admitted {} (routing manager: {}{})",
            identity,
            admission.router,
            if admission.elected { ", elected" } else { "" }
        );

        if force_purge {
            if let Some(policy) = host.purge_policy() {
                match purge_stale_locks(policy) {
                    Ok(report) => {
                        if report.removed > 0 {
                            debug!("Purged {} stale runtime locks", report.removed);
                        }
                        for failure in &report.failures {
                            warn!(
                                "Could not remove stale runtime lock {}: {}",
                                failure.path.display(),
                                failure.error
                            );
                        }
                    }
                    Err(e) => warn!("Stale runtime lock purge skipped: {}", e),
                }
            }
        }

        if let Err(e) = host.runtime().create(&identity) {
            let withdrawn = host
                .coordinator()
                .withdraw(&identity.name, &admission, |shared| store.write(shared));
            if let Err(persist_error) = withdrawn {
                warn!(
                    "Could not rewrite configuration document after failed create of {}: {}",
                    identity.name, persist_error
                );
            }
            return Err(e);
        }

        Ok(Self {
            identity,
            event_group,
            runtime: host.runtime().clone(),
            coordinator: host.coordinator().clone(),
            configuration: admission.document,
            role: Arc::new(RoleCell::new()),
            state: Mutex::new(SessionState::Created),
            ready: AtomicBool::new(false),
            holds_routing: AtomicBool::new(admission.elected),
            bindings: Bindings::new(),
            offers: Mutex::new(Offers::default()),
        })
    }

    pub fn identity(&self) -> &ApplicationIdentity {
        &self.identity
    }

    pub fn name(&self) -> &str {
        &self.identity.name
    }

    pub fn role(&self) -> Role {
        self.role.get()
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    pub fn event_group(&self) -> u16 {
        self.event_group
    }

    /// Document written for the runtime when this session was created
    pub fn configuration(&self) -> &ConfigurationDocument {
        &self.configuration
    }

    /// Whether this session won the election and still holds routing.
    /// A same-named session that lost the election is never the router.
    pub fn is_router(&self) -> bool {
        self.holds_routing.load(Ordering::Acquire)
            && self.coordinator.is_router(&self.identity.name)
    }

    /// Event ids offered so far, ascending
    pub fn offered_events(&self) -> Vec<u16> {
        self.offers.lock().events.iter().copied().collect()
    }

    /// Start event processing. A no-op when already started.
    pub fn start(&self) -> Result<()> {
        match self.state() {
            SessionState::Started => return Ok(()),
            SessionState::Stopped => {
                return Err(SessionError::invalid_operation(format!(
                    "{} is stopped; create a new session to rejoin",
                    self.identity.name
                )))
            }
            SessionState::Uninitialized | SessionState::Created => {}
        }

        self.runtime.start(&self.identity)?;

        let mut state = self.state.lock();
        if *state == SessionState::Created {
            *state = SessionState::Started;
            self.ready.store(true, Ordering::Release);
            info!("{} started", self.identity.name);
        }
        Ok(())
    }

    /// Stop the application, handing back routing ownership if this session
    /// holds it. Stopping twice is a no-op. In-flight handlers are not awaited.
    pub fn stop(&self) -> Result<()> {
        {
            let mut state = self.state.lock();
            if state.is_terminal() {
                return Ok(());
            }
            *state = SessionState::Stopped;
        }
        self.ready.store(false, Ordering::Release);

        if self.holds_routing.swap(false, Ordering::AcqRel)
            && self.coordinator.release(&self.identity.name)
        {
            info!("{} handed back routing ownership", self.identity.name);
        }
        self.coordinator.retire(&self.identity.name);
        self.runtime.stop(&self.identity)?;
        info!("{} stopped", self.identity.name);
        Ok(())
    }

    /// Join the offering of the service this application names (client side)
    pub fn register(&self) -> Result<()> {
        self.ensure_active("register")?;
        self.claim_client("client registers, service offers")?;
        self.runtime.request_service(&self.identity)
    }

    /// Invoke a service method. A missing payload sends a single zero byte.
    pub fn request(&self, method_id: u16, payload: Option<&[u8]>, transport: Transport) -> Result<()> {
        self.ensure_active("request")?;
        self.claim_client("client requests, service responds")?;
        self.runtime.send_service(
            &self.identity,
            method_id,
            transport,
            payload.unwrap_or(EMPTY_PAYLOAD),
        )
    }

    /// Advertise the request endpoint (no events) or a set of events.
    ///
    /// Offering something makes this session a service. Re-offering the
    /// endpoint or an already offered event id does nothing.
    pub fn offer(&self, events: &[u16]) -> Result<()> {
        self.ensure_active("offer")?;
        if self.role.assign(Role::Service) != Role::Service {
            return Err(SessionError::invalid_operation(
                "client registers/requests, service offers/responds",
            ));
        }

        // Reserved under the lock before the runtime call; a failed call
        // gives its reservation back.
        if events.is_empty() {
            {
                let mut offers = self.offers.lock();
                if offers.endpoint {
                    debug!("{} already offers its endpoint", self.identity.name);
                    return Ok(());
                }
                offers.endpoint = true;
            }
            if let Err(e) = self.runtime.offer_service(&self.identity) {
                self.offers.lock().endpoint = false;
                return Err(e);
            }
            return Ok(());
        }

        let reserved: BTreeSet<u16> = {
            let mut offers = self.offers.lock();
            events
                .iter()
                .copied()
                .filter(|event| offers.events.insert(*event))
                .collect()
        };
        let mut remaining = reserved.iter().copied();
        while let Some(event) = remaining.next() {
            if let Err(e) = self
                .runtime
                .offer_event_service(&self.identity, event, self.event_group)
            {
                let mut offers = self.offers.lock();
                offers.events.remove(&event);
                for unsent in remaining {
                    offers.events.remove(&unsent);
                }
                return Err(e);
            }
        }
        Ok(())
    }

    /// Publish an event to subscribed clients. A missing payload sends a
    /// single zero byte.
    pub fn notify(&self, event_id: u16, payload: Option<&[u8]>) -> Result<()> {
        self.ensure_active("notify")?;
        if !self.role.is_service() {
            return Err(SessionError::invalid_operation(
                "client consumes events, service notifies",
            ));
        }
        self.runtime.notify_clients(
            &self.identity,
            event_id,
            payload.unwrap_or(EMPTY_PAYLOAD),
        )
    }

    /// Bind a handler to a method id; `None` installs the default handler
    pub fn on_message(&self, id: u16, handler: Option<MessageHandler>) -> Result<()> {
        self.ensure_active("on_message")?;
        let handler = handler.unwrap_or_else(|| self.default_handler());
        if self.bindings.bind(id, handler.clone()) {
            debug!("{} replaced handler for {:#06x}", self.identity.name, id);
        }
        self.runtime.register_message(&self.identity, id, handler)
    }

    /// Subscribe to an event and bind a handler for it; `None` installs the
    /// default handler
    pub fn on_event(&self, event_id: u16, handler: Option<MessageHandler>) -> Result<()> {
        self.ensure_active("on_event")?;
        self.runtime
            .request_event_service(&self.identity, event_id, self.event_group)?;
        self.on_message(event_id, handler)
    }

    /// Echo for services, silence for everyone else
    pub fn default_handler(&self) -> MessageHandler {
        default_handler(self.identity.name.clone(), self.role.clone())
    }

    /// Route an inbound message to the handler bound for `id`
    pub fn dispatch(&self, message_type: MessageType, id: u16, payload: &[u8]) -> Option<Vec<u8>> {
        self.bindings.dispatch(message_type, id, payload)
    }

    fn ensure_active(&self, operation: &str) -> Result<()> {
        if self.state().is_terminal() {
            return Err(SessionError::invalid_operation(format!(
                "{operation} on stopped session {}",
                self.identity.name
            )));
        }
        Ok(())
    }

    fn claim_client(&self, message: &str) -> Result<()> {
        match self.role.assign(Role::Client) {
            Role::Service => Err(SessionError::invalid_operation(message)),
            _ => Ok(()),
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if !self.state.get_mut().is_terminal() {
            warn!(
                "{} dropped without stop; the runtime application stays registered",
                self.identity.name
            );
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("identity", &self.identity)
            .field("role", &self.role())
            .field("state", &self.state())
            .field("ready", &self.is_ready())
            .field("bindings", &self.bindings)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{DocumentOverrides, DocumentStore, EndpointEntry};
    use crate::runtime::MockRuntime;
    use mockall::predicate::eq;

    fn host(runtime: MockRuntime, dir: &tempfile::TempDir) -> SessionHost {
        SessionHost::new(
            Arc::new(runtime),
            Arc::new(RoutingCoordinator::new()),
            DocumentStore::new(dir.path().join("vsomeip.json")),
        )
        .without_purge()
    }

    fn service_options() -> SessionOptions {
        SessionOptions::new("service_example", 0x1234, 0x5678).overrides(
            DocumentOverrides::new()
                .application("service_example", 0x1111)
                .service(EndpointEntry::unreliable(0x1234, 0x5678, 30509)),
        )
    }

    #[test]
    fn test_create_failure_releases_election() {
        let dir = tempfile::tempdir().unwrap();
        let mut runtime = MockRuntime::new();
        runtime
            .expect_create()
            .times(1)
            .returning(|_| Err(SessionError::runtime("create", "stack refused")));
        let host = host(runtime, &dir);

        let err = Session::create(&host, service_options()).unwrap_err();
        match err {
            SessionError::Runtime { operation, reason } => {
                assert_eq!(operation, "create");
                assert_eq!(reason, "stack refused");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(host.coordinator().current_router(), None);

        let persisted = host.store().read().unwrap();
        assert_eq!(persisted.routing, None);
        assert!(!persisted.has_application("service_example"));
    }

    fn permissive_runtime() -> MockRuntime {
        let mut runtime = MockRuntime::new();
        runtime.expect_create().returning(|_| Ok(()));
        runtime.expect_stop().returning(|_| Ok(()));
        runtime
    }

    #[test]
    fn test_same_name_loser_cannot_evict_router() {
        let dir = tempfile::tempdir().unwrap();
        let host = host(permissive_runtime(), &dir);

        let first = Session::create(&host, service_options()).unwrap();
        let second = Session::create(&host, service_options()).unwrap();
        assert!(first.is_router());
        assert!(!second.is_router());

        second.stop().unwrap();
        assert_eq!(
            host.coordinator().current_router().as_deref(),
            Some("service_example")
        );
        assert!(first.is_router());
        assert!(host
            .coordinator()
            .document()
            .unwrap()
            .has_application("service_example"));

        first.stop().unwrap();
        assert_eq!(host.coordinator().current_router(), None);
        assert!(host.coordinator().document().unwrap().applications.is_empty());
    }

    #[test]
    fn test_unreadable_lock_directory_does_not_block_create() {
        let dir = tempfile::tempdir().unwrap();
        let host = host(permissive_runtime(), &dir).with_purge(crate::purge::PurgePolicy {
            directory: dir.path().join("missing"),
            ..Default::default()
        });

        let session = Session::create(&host, service_options()).unwrap();
        assert_eq!(session.state(), SessionState::Created);
        session.stop().unwrap();
    }

    #[test]
    fn test_concurrent_endpoint_offers_reach_runtime_once() {
        let dir = tempfile::tempdir().unwrap();
        let mut runtime = permissive_runtime();
        runtime.expect_offer_service().times(1).returning(|_| {
            std::thread::sleep(std::time::Duration::from_millis(20));
            Ok(())
        });
        runtime
            .expect_offer_event_service()
            .times(1)
            .returning(|_, _, _| {
                std::thread::sleep(std::time::Duration::from_millis(20));
                Ok(())
            });
        let host = host(runtime, &dir);
        let session = Session::create(&host, service_options()).unwrap();

        std::thread::scope(|scope| {
            for _ in 0..4 {
                scope.spawn(|| session.offer(&[]).unwrap());
                scope.spawn(|| session.offer(&[0x8778]).unwrap());
            }
        });
        assert_eq!(session.offered_events(), vec![0x8778]);
        session.stop().unwrap();
    }

    #[test]
    fn test_failed_endpoint_offer_can_be_retried() {
        let dir = tempfile::tempdir().unwrap();
        let mut runtime = permissive_runtime();
        let mut seq = mockall::Sequence::new();
        runtime
            .expect_offer_service()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Err(SessionError::runtime("offer_service", "busy")));
        runtime
            .expect_offer_service()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        let host = host(runtime, &dir);
        let session = Session::create(&host, service_options()).unwrap();

        assert!(session.offer(&[]).is_err());
        session.offer(&[]).unwrap();
        session.offer(&[]).unwrap();
        session.stop().unwrap();
    }

    #[test]
    fn test_document_is_written_before_create() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vsomeip.json");
        let seen = path.clone();
        let mut runtime = MockRuntime::new();
        runtime.expect_create().times(1).returning(move |_| {
            assert!(seen.exists());
            Ok(())
        });
        runtime.expect_stop().returning(|_| Ok(()));
        let host = host(runtime, &dir);

        let session = Session::create(&host, service_options()).unwrap();
        assert_eq!(session.state(), SessionState::Created);
        assert_eq!(
            host.store().read().unwrap().routing.as_deref(),
            Some("service_example")
        );
        session.stop().unwrap();
    }

    #[test]
    fn test_start_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let mut runtime = MockRuntime::new();
        runtime.expect_create().returning(|_| Ok(()));
        runtime.expect_start().times(1).returning(|_| Ok(()));
        runtime.expect_stop().times(1).returning(|_| Ok(()));
        let host = host(runtime, &dir);

        let session = Session::create(&host, service_options()).unwrap();
        assert!(!session.is_ready());
        session.start().unwrap();
        session.start().unwrap();
        assert!(session.is_ready());
        assert_eq!(session.state(), SessionState::Started);

        session.stop().unwrap();
        session.stop().unwrap();
        assert!(!session.is_ready());
        assert!(session.start().unwrap_err().is_invalid_operation());
    }

    #[test]
    fn test_offer_is_idempotent_per_event() {
        let dir = tempfile::tempdir().unwrap();
        let mut runtime = MockRuntime::new();
        runtime.expect_create().returning(|_| Ok(()));
        runtime.expect_offer_service().times(1).returning(|_| Ok(()));
        runtime
            .expect_offer_event_service()
            .with(mockall::predicate::always(), eq(0x8778), eq(0x0000))
            .times(1)
            .returning(|_, _, _| Ok(()));
        runtime
            .expect_offer_event_service()
            .with(mockall::predicate::always(), eq(0x8779), eq(0x0000))
            .times(1)
            .returning(|_, _, _| Ok(()));
        runtime.expect_stop().returning(|_| Ok(()));
        let host = host(runtime, &dir);

        let session = Session::create(&host, service_options()).unwrap();
        session.offer(&[]).unwrap();
        session.offer(&[]).unwrap();
        session.offer(&[0x8778]).unwrap();
        session.offer(&[0x8778, 0x8779, 0x8779]).unwrap();
        assert_eq!(session.offered_events(), vec![0x8778, 0x8779]);
        assert_eq!(session.role(), Role::Service);
        session.stop().unwrap();
    }

    #[test]
    fn test_failed_event_offer_is_not_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let mut runtime = MockRuntime::new();
        runtime.expect_create().returning(|_| Ok(()));
        runtime
            .expect_offer_event_service()
            .times(1)
            .returning(|_, _, _| Err(SessionError::runtime("offer_event_service", "busy")));
        runtime.expect_stop().returning(|_| Ok(()));
        let host = host(runtime, &dir);

        let session = Session::create(&host, service_options()).unwrap();
        assert!(session.offer(&[0x8778]).is_err());
        assert!(session.offered_events().is_empty());
        session.stop().unwrap();
    }

    #[test]
    fn test_missing_payload_sends_zero_byte() {
        let dir = tempfile::tempdir().unwrap();
        let mut runtime = MockRuntime::new();
        runtime.expect_create().returning(|_| Ok(()));
        runtime
            .expect_send_service()
            .withf(|_, method_id, transport, payload| {
                *method_id == 0x9002 && *transport == Transport::Reliable && payload.len() == 1 && payload[0] == 0x00
            })
            .times(1)
            .returning(|_, _, _, _| Ok(()));
        runtime.expect_stop().returning(|_| Ok(()));
        let host = host(runtime, &dir);

        let session = Session::create(&host, SessionOptions::new("cli", 0x1234, 0x5678)).unwrap();
        session.request(0x9002, None, Transport::Reliable).unwrap();
        assert_eq!(session.role(), Role::Client);
        session.stop().unwrap();
    }

    #[test]
    fn test_on_message_without_handler_binds_default() {
        let dir = tempfile::tempdir().unwrap();
        let mut runtime = MockRuntime::new();
        runtime.expect_create().returning(|_| Ok(()));
        runtime
            .expect_register_message()
            .times(2)
            .returning(|_, _, _| Ok(()));
        runtime.expect_offer_service().returning(|_| Ok(()));
        runtime.expect_stop().returning(|_| Ok(()));
        let host = host(runtime, &dir);

        let session = Session::create(&host, service_options()).unwrap();
        session.on_message(0x9002, None).unwrap();
        assert_eq!(session.dispatch(MessageType::Request, 0x9002, &[1, 2]), None);

        session.offer(&[]).unwrap();
        assert_eq!(
            session.dispatch(MessageType::Request, 0x9002, &[1, 2]),
            Some(vec![1, 2])
        );

        session
            .on_message(0x9002, Some(crate::dispatch::handler(|_, _, _| Some(vec![9]))))
            .unwrap();
        assert_eq!(
            session.dispatch(MessageType::Request, 0x9002, &[1, 2]),
            Some(vec![9])
        );
        session.stop().unwrap();
    }

    #[test]
    fn test_operations_after_stop_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut runtime = MockRuntime::new();
        runtime.expect_create().returning(|_| Ok(()));
        runtime.expect_stop().times(1).returning(|_| Ok(()));
        let host = host(runtime, &dir);

        let session = Session::create(&host, service_options()).unwrap();
        session.stop().unwrap();
        assert!(session.offer(&[]).unwrap_err().is_invalid_operation());
        assert!(session.register().unwrap_err().is_invalid_operation());
        assert!(session.on_message(1, None).unwrap_err().is_invalid_operation());
    }
}
