//! In-process runtime
//!
//! Routes requests, responses and notifications between applications of the
//! same process without touching the network, and journals every call it
//! receives. Backs the demo command and the integration tests.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info};

use super::Runtime;
use crate::dispatch::{MessageHandler, MessageType};
use crate::document::Transport;
use crate::error::{Result, SessionError};
use crate::session::ApplicationIdentity;

/// One call received by the runtime
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeCall {
    Create {
        app: String,
    },
    Start {
        app: String,
    },
    Stop {
        app: String,
    },
    RequestService {
        app: String,
        major: u8,
        minor: u8,
    },
    SendService {
        app: String,
        method_id: u16,
        transport: Transport,
        payload: Vec<u8>,
    },
    RegisterMessage {
        app: String,
        id: u16,
    },
    RequestEventService {
        app: String,
        event_id: u16,
        group: u16,
    },
    OfferService {
        app: String,
        major: u8,
        minor: u8,
    },
    OfferEventService {
        app: String,
        event_id: u16,
        group: u16,
    },
    NotifyClients {
        app: String,
        event_id: u16,
        payload: Vec<u8>,
    },
}

impl RuntimeCall {
    pub fn app(&self) -> &str {
        match self {
            RuntimeCall::Create { app }
            | RuntimeCall::Start { app }
            | RuntimeCall::Stop { app }
            | RuntimeCall::RequestService { app, .. }
            | RuntimeCall::SendService { app, .. }
            | RuntimeCall::RegisterMessage { app, .. }
            | RuntimeCall::RequestEventService { app, .. }
            | RuntimeCall::OfferService { app, .. }
            | RuntimeCall::OfferEventService { app, .. }
            | RuntimeCall::NotifyClients { app, .. } => app,
        }
    }
}

type ServiceKey = (u16, u16);
type EventKey = (u16, u16, u16);

struct Application {
    identity: ApplicationIdentity,
    started: bool,
    handlers: HashMap<u16, MessageHandler>,
    subscriptions: HashSet<EventKey>,
}

/// Runtime that delivers messages between applications of this process
#[derive(Default)]
pub struct LoopbackRuntime {
    applications: DashMap<String, Application>,
    services: DashMap<ServiceKey, String>,
    events: DashMap<EventKey, String>,
    journal: Mutex<Vec<RuntimeCall>>,
}

impl LoopbackRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Calls received so far, oldest first
    pub fn calls(&self) -> Vec<RuntimeCall> {
        self.journal.lock().clone()
    }

    /// Calls received for one application
    pub fn calls_for(&self, app: &str) -> Vec<RuntimeCall> {
        self.journal
            .lock()
            .iter()
            .filter(|call| call.app() == app)
            .cloned()
            .collect()
    }

    pub fn is_created(&self, app: &str) -> bool {
        self.applications.contains_key(app)
    }

    pub fn is_started(&self, app: &str) -> bool {
        self.applications
            .get(app)
            .map(|entry| entry.started)
            .unwrap_or(false)
    }

    /// Application currently offering the request endpoint of a service instance
    pub fn provider_of(&self, service_id: u16, instance_id: u16) -> Option<String> {
        self.services
            .get(&(service_id, instance_id))
            .map(|entry| entry.value().clone())
    }

    fn record(&self, call: RuntimeCall) {
        self.journal.lock().push(call);
    }

    fn ensure_created(&self, app: &ApplicationIdentity, operation: &str) -> Result<()> {
        if self.applications.contains_key(&app.name) {
            Ok(())
        } else {
            Err(SessionError::runtime(
                operation,
                format!("application {} has not been created", app.name),
            ))
        }
    }

    fn handler_of(&self, app: &str, id: u16) -> Option<MessageHandler> {
        self.applications
            .get(app)
            .filter(|entry| entry.started)
            .and_then(|entry| entry.handlers.get(&id).cloned())
    }
}

impl Runtime for LoopbackRuntime {
    fn create(&self, app: &ApplicationIdentity) -> Result<()> {
        self.record(RuntimeCall::Create {
            app: app.name.clone(),
        });
        if self.applications.contains_key(&app.name) {
            return Err(SessionError::runtime(
                "create",
                format!("application {} already exists", app.name),
            ));
        }
        self.applications.insert(
            app.name.clone(),
            Application {
                identity: app.clone(),
                started: false,
                handlers: HashMap::new(),
                subscriptions: HashSet::new(),
            },
        );
        info!("Loopback runtime created {}", app);
        Ok(())
    }

    fn start(&self, app: &ApplicationIdentity) -> Result<()> {
        self.record(RuntimeCall::Start {
            app: app.name.clone(),
        });
        match self.applications.get_mut(&app.name) {
            Some(mut entry) => {
                entry.started = true;
                Ok(())
            }
            None => Err(SessionError::runtime(
                "start",
                format!("application {} has not been created", app.name),
            )),
        }
    }

    fn stop(&self, app: &ApplicationIdentity) -> Result<()> {
        self.record(RuntimeCall::Stop {
            app: app.name.clone(),
        });
        if self.applications.remove(&app.name).is_none() {
            return Err(SessionError::runtime(
                "stop",
                format!("application {} has not been created", app.name),
            ));
        }
        self.services.retain(|_, owner| *owner != app.name);
        self.events.retain(|_, owner| *owner != app.name);
        info!("Loopback runtime stopped {}", app);
        Ok(())
    }

    fn request_service(&self, app: &ApplicationIdentity) -> Result<()> {
        self.record(RuntimeCall::RequestService {
            app: app.name.clone(),
            major: app.major_version,
            minor: app.minor_version,
        });
        self.ensure_created(app, "request_service")
    }

    fn send_service(
        &self,
        app: &ApplicationIdentity,
        method_id: u16,
        transport: Transport,
        payload: &[u8],
    ) -> Result<()> {
        self.record(RuntimeCall::SendService {
            app: app.name.clone(),
            method_id,
            transport,
            payload: payload.to_vec(),
        });
        self.ensure_created(app, "send_service")?;

        let Some(provider) = self.provider_of(app.service_id, app.instance_id) else {
            debug!(
                "No provider for {:04x}.{:04x}, request {:#06x} from {} dropped",
                app.service_id, app.instance_id, method_id, app.name
            );
            return Ok(());
        };
        let Some(on_request) = self.handler_of(&provider, method_id) else {
            debug!("{} has no handler for {:#06x}, request dropped", provider, method_id);
            return Ok(());
        };

        let Some(response) = on_request(MessageType::Request, method_id, payload) else {
            return Ok(());
        };
        if let Some(on_response) = self.handler_of(&app.name, method_id) {
            on_response(MessageType::Response, method_id, &response);
        }
        Ok(())
    }

    fn register_message(
        &self,
        app: &ApplicationIdentity,
        id: u16,
        handler: MessageHandler,
    ) -> Result<()> {
        self.record(RuntimeCall::RegisterMessage {
            app: app.name.clone(),
            id,
        });
        match self.applications.get_mut(&app.name) {
            Some(mut entry) => {
                entry.handlers.insert(id, handler);
                Ok(())
            }
            None => Err(SessionError::runtime(
                "register_message",
                format!("application {} has not been created", app.name),
            )),
        }
    }

    fn request_event_service(
        &self,
        app: &ApplicationIdentity,
        event_id: u16,
        group: u16,
    ) -> Result<()> {
        self.record(RuntimeCall::RequestEventService {
            app: app.name.clone(),
            event_id,
            group,
        });
        match self.applications.get_mut(&app.name) {
            Some(mut entry) => {
                entry
                    .subscriptions
                    .insert((app.service_id, app.instance_id, event_id));
                Ok(())
            }
            None => Err(SessionError::runtime(
                "request_event_service",
                format!("application {} has not been created", app.name),
            )),
        }
    }

    fn offer_service(&self, app: &ApplicationIdentity) -> Result<()> {
        self.record(RuntimeCall::OfferService {
            app: app.name.clone(),
            major: app.major_version,
            minor: app.minor_version,
        });
        self.ensure_created(app, "offer_service")?;
        self.services
            .insert((app.service_id, app.instance_id), app.name.clone());
        Ok(())
    }

    fn offer_event_service(
        &self,
        app: &ApplicationIdentity,
        event_id: u16,
        group: u16,
    ) -> Result<()> {
        self.record(RuntimeCall::OfferEventService {
            app: app.name.clone(),
            event_id,
            group,
        });
        self.ensure_created(app, "offer_event_service")?;
        self.events
            .insert((app.service_id, app.instance_id, event_id), app.name.clone());
        Ok(())
    }

    fn notify_clients(
        &self,
        app: &ApplicationIdentity,
        event_id: u16,
        payload: &[u8],
    ) -> Result<()> {
        self.record(RuntimeCall::NotifyClients {
            app: app.name.clone(),
            event_id,
            payload: payload.to_vec(),
        });
        self.ensure_created(app, "notify_clients")?;

        let key = (app.service_id, app.instance_id, event_id);
        let offered = self
            .events
            .get(&key)
            .map(|owner| owner.value() == &app.name)
            .unwrap_or(false);
        if !offered {
            debug!("{} notified {:#06x} without offering it, dropped", app.name, event_id);
            return Ok(());
        }

        let subscribers: Vec<MessageHandler> = self
            .applications
            .iter()
            .filter(|entry| entry.started && entry.subscriptions.contains(&key))
            .filter_map(|entry| entry.handlers.get(&event_id).cloned())
            .collect();

        debug!(
            "{} notifying {:#06x} to {} subscribers",
            app.name,
            event_id,
            subscribers.len()
        );
        for on_event in subscribers {
            on_event(MessageType::Notification, event_id, payload);
        }
        Ok(())
    }
}

impl std::fmt::Debug for LoopbackRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let identities: Vec<String> = self
            .applications
            .iter()
            .map(|entry| entry.identity.to_string())
            .collect();
        f.debug_struct("LoopbackRuntime")
            .field("applications", &identities)
            .field("calls", &self.journal.lock().len())
            .finish()
    }
}
