//! Default template and override merging

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::net::IpAddr;

use super::types::{loopback, ApplicationEntry, ConfigurationDocument, EndpointEntry};
use crate::error::{Result, SessionError};

const TEMPLATE: &str = include_str!("template.json");

/// Load the default document: template contents, host unicast address,
/// empty collections and no routing.
pub fn build_default() -> Result<ConfigurationDocument> {
    let mut document: ConfigurationDocument = serde_json::from_str(TEMPLATE)
        .map_err(|e| SessionError::Template(format!("embedded template is invalid: {e}")))?;

    document.unicast = default_unicast();
    document.applications.clear();
    document.services.clear();
    document.clients.clear();
    document.routing = None;
    Ok(document)
}

/// Layer caller overrides onto `base`.
///
/// Collection overrides replace the base list wholesale; scalar fields and
/// extra keys replace field-wise. Nothing is validated, so duplicate ids pass
/// through to the runtime as given.
pub fn merge(base: &ConfigurationDocument, overrides: &DocumentOverrides) -> ConfigurationDocument {
    let mut merged = base.clone();

    if let Some(unicast) = overrides.unicast {
        merged.unicast = unicast;
    }
    if let Some(applications) = &overrides.applications {
        merged.applications = applications.clone();
    }
    if let Some(services) = &overrides.services {
        merged.services = services.clone();
    }
    if let Some(clients) = &overrides.clients {
        merged.clients = clients.clone();
    }
    if let Some(routing) = &overrides.routing {
        merged.routing = Some(routing.clone());
    }
    for (key, value) in &overrides.extra {
        merged.extra.insert(key.clone(), value.clone());
    }

    merged
}

/// Unicast address the runtime binds to.
///
/// Loopback is not reliably routable for the runtime on Windows, so the host's
/// own IPv4 address is preferred there.
fn default_unicast() -> IpAddr {
    #[cfg(windows)]
    {
        if let Some(address) = host_address() {
            return address;
        }
    }
    loopback()
}

#[cfg(windows)]
fn host_address() -> Option<IpAddr> {
    use std::net::ToSocketAddrs;

    let host = std::env::var("COMPUTERNAME").ok()?;
    (host.as_str(), 0)
        .to_socket_addrs()
        .ok()?
        .map(|addr| addr.ip())
        .find(IpAddr::is_ipv4)
}

/// Partial document supplied per application
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DocumentOverrides {
    pub unicast: Option<IpAddr>,
    pub applications: Option<Vec<ApplicationEntry>>,
    pub services: Option<Vec<EndpointEntry>>,
    pub clients: Option<Vec<EndpointEntry>>,
    pub routing: Option<String>,
    pub extra: Map<String, Value>,
}

impl DocumentOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn unicast(mut self, address: IpAddr) -> Self {
        self.unicast = Some(address);
        self
    }

    pub fn application(mut self, name: impl Into<String>, id: u16) -> Self {
        self.applications
            .get_or_insert_with(Vec::new)
            .push(ApplicationEntry::new(name, id));
        self
    }

    pub fn service(mut self, entry: EndpointEntry) -> Self {
        self.services.get_or_insert_with(Vec::new).push(entry);
        self
    }

    pub fn client(mut self, entry: EndpointEntry) -> Self {
        self.clients.get_or_insert_with(Vec::new).push(entry);
        self
    }

    pub fn routing(mut self, name: impl Into<String>) -> Self {
        self.routing = Some(name.into());
        self
    }

    pub fn extra(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }
}
