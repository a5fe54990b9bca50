//! Configuration document types

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::net::{IpAddr, Ipv4Addr};

/// Transport an endpoint (or a single request) goes over
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transport {
    /// TCP
    Reliable,
    /// UDP
    Unreliable,
}

impl Transport {
    pub fn is_reliable(&self) -> bool {
        matches!(self, Transport::Reliable)
    }
}

impl Default for Transport {
    fn default() -> Self {
        Self::Unreliable
    }
}

impl std::fmt::Display for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Transport::Reliable => write!(f, "reliable"),
            Transport::Unreliable => write!(f, "unreliable"),
        }
    }
}

/// `applications` entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationEntry {
    pub name: String,
    #[serde(with = "hex_id")]
    pub id: u16,
}

impl ApplicationEntry {
    pub fn new(name: impl Into<String>, id: u16) -> Self {
        Self {
            name: name.into(),
            id,
        }
    }
}

/// `services` / `clients` entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EndpointEntry {
    pub service: u16,
    pub instance: u16,
    pub port: u16,
    pub transport: Transport,
}

impl EndpointEntry {
    pub fn new(service: u16, instance: u16, port: u16, transport: Transport) -> Self {
        Self {
            service,
            instance,
            port,
            transport,
        }
    }

    pub fn unreliable(service: u16, instance: u16, port: u16) -> Self {
        Self::new(service, instance, port, Transport::Unreliable)
    }

    pub fn reliable(service: u16, instance: u16, port: u16) -> Self {
        Self::new(service, instance, port, Transport::Reliable)
    }

    /// Entries describing the same service instance share a key
    pub fn key(&self) -> (u16, u16) {
        (self.service, self.instance)
    }
}

/// On-disk layout: `"unreliable": port` or `"reliable": {"port": port}`
#[derive(Serialize, Deserialize)]
struct RawEndpoint {
    #[serde(with = "hex_id")]
    service: u16,
    #[serde(with = "hex_id")]
    instance: u16,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "opt_port")]
    unreliable: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    reliable: Option<RawReliable>,
}

#[derive(Serialize, Deserialize)]
struct RawReliable {
    #[serde(with = "port")]
    port: u16,
}

impl Serialize for EndpointEntry {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let raw = match self.transport {
            Transport::Unreliable => RawEndpoint {
                service: self.service,
                instance: self.instance,
                unreliable: Some(self.port),
                reliable: None,
            },
            Transport::Reliable => RawEndpoint {
                service: self.service,
                instance: self.instance,
                unreliable: None,
                reliable: Some(RawReliable { port: self.port }),
            },
        };
        raw.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for EndpointEntry {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = RawEndpoint::deserialize(deserializer)?;
        let (port, transport) = match (raw.unreliable, raw.reliable) {
            (Some(port), None) => (port, Transport::Unreliable),
            (None, Some(reliable)) => (reliable.port, Transport::Reliable),
            (Some(_), Some(_)) => {
                return Err(serde::de::Error::custom(
                    "endpoint declares both reliable and unreliable ports",
                ))
            }
            (None, None) => {
                return Err(serde::de::Error::custom(
                    "endpoint declares neither a reliable nor an unreliable port",
                ))
            }
        };
        Ok(Self::new(raw.service, raw.instance, port, transport))
    }
}

/// Configuration document consumed by the runtime.
///
/// Template keys this crate does not model (`logging`, `service-discovery`,
/// ...) are carried through `extra` untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigurationDocument {
    #[serde(default = "loopback")]
    pub unicast: IpAddr,
    #[serde(default)]
    pub applications: Vec<ApplicationEntry>,
    #[serde(default)]
    pub services: Vec<EndpointEntry>,
    #[serde(default)]
    pub clients: Vec<EndpointEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub routing: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

pub(crate) fn loopback() -> IpAddr {
    IpAddr::V4(Ipv4Addr::LOCALHOST)
}

impl ConfigurationDocument {
    pub fn application(&self, name: &str) -> Option<&ApplicationEntry> {
        self.applications.iter().find(|app| app.name == name)
    }

    pub fn has_application(&self, name: &str) -> bool {
        self.application(name).is_some()
    }

    /// Fold another application's document into this one.
    ///
    /// Applications are keyed by name and endpoints by `(service, instance)`;
    /// incoming entries replace matching ones in place and are appended
    /// otherwise. `unicast` and extra keys follow the incoming document.
    /// `routing` is left alone.
    pub fn absorb(&mut self, other: &ConfigurationDocument) {
        self.unicast = other.unicast;

        for app in &other.applications {
            match self.applications.iter_mut().find(|a| a.name == app.name) {
                Some(existing) => *existing = app.clone(),
                None => self.applications.push(app.clone()),
            }
        }

        absorb_endpoints(&mut self.services, &other.services);
        absorb_endpoints(&mut self.clients, &other.clients);

        for (key, value) in &other.extra {
            self.extra.insert(key.clone(), value.clone());
        }
    }

    /// Pretty, key-sorted JSON as written for the runtime
    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        // Going through `Value` sorts object keys (serde_json's default map is ordered)
        let value = serde_json::to_value(self)?;
        serde_json::to_string_pretty(&value)
    }
}

fn absorb_endpoints(target: &mut Vec<EndpointEntry>, incoming: &[EndpointEntry]) {
    for entry in incoming {
        match target.iter_mut().find(|e| e.key() == entry.key()) {
            Some(existing) => *existing = *entry,
            None => target.push(*entry),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum NumberOrText {
    Number(u64),
    Text(String),
}

fn parse_u16<E: serde::de::Error>(raw: NumberOrText) -> Result<u16, E> {
    let value = match raw {
        NumberOrText::Number(n) => n,
        NumberOrText::Text(text) => {
            let text = text.trim();
            let parsed = match text
                .strip_prefix("0x")
                .or_else(|| text.strip_prefix("0X"))
            {
                Some(hex) => u64::from_str_radix(hex, 16),
                None => text.parse::<u64>(),
            };
            parsed.map_err(|e| E::custom(format!("invalid number {text:?}: {e}")))?
        }
    };
    u16::try_from(value).map_err(|_| E::custom(format!("{value} does not fit in 16 bits")))
}

/// Identifiers are written as `"0x1234"`; numbers and decimal strings are accepted
mod hex_id {
    use super::{parse_u16, NumberOrText};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(id: &u16, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("{id:#06x}"))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u16, D::Error> {
        parse_u16(NumberOrText::deserialize(deserializer)?)
    }
}

/// Ports are written as plain numbers; strings are accepted
mod port {
    use super::{parse_u16, NumberOrText};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(port: &u16, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u16(*port)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u16, D::Error> {
        parse_u16(NumberOrText::deserialize(deserializer)?)
    }
}

mod opt_port {
    use super::{parse_u16, NumberOrText};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(port: &Option<u16>, serializer: S) -> Result<S::Ok, S::Error> {
        match port {
            Some(port) => serializer.serialize_some(port),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<u16>, D::Error> {
        Option::<NumberOrText>::deserialize(deserializer)?
            .map(parse_u16)
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_endpoint_layout() {
        let udp = serde_json::to_value(EndpointEntry::unreliable(0x1234, 0x5678, 30509)).unwrap();
        assert_eq!(
            udp,
            json!({"service": "0x1234", "instance": "0x5678", "unreliable": 30509})
        );

        let tcp = serde_json::to_value(EndpointEntry::reliable(0x1234, 0x5678, 30510)).unwrap();
        assert_eq!(
            tcp,
            json!({"service": "0x1234", "instance": "0x5678", "reliable": {"port": 30510}})
        );
    }

    #[test]
    fn test_endpoint_accepts_runtime_spellings() {
        let entry: EndpointEntry = serde_json::from_value(
            json!({"service": 4660, "instance": "0x5678", "unreliable": "30509"}),
        )
        .unwrap();
        assert_eq!(entry, EndpointEntry::unreliable(0x1234, 0x5678, 30509));

        let entry: EndpointEntry = serde_json::from_value(
            json!({"service": "4660", "instance": 22136, "reliable": {"port": 30510}}),
        )
        .unwrap();
        assert_eq!(entry, EndpointEntry::reliable(0x1234, 0x5678, 30510));
    }

    #[test]
    fn test_endpoint_rejects_ambiguous_ports() {
        let both = serde_json::from_value::<EndpointEntry>(json!({
            "service": 1, "instance": 1, "unreliable": 1, "reliable": {"port": 2}
        }));
        assert!(both.is_err());

        let neither = serde_json::from_value::<EndpointEntry>(json!({"service": 1, "instance": 1}));
        assert!(neither.is_err());
    }

    #[test]
    fn test_id_out_of_range() {
        let app = serde_json::from_value::<ApplicationEntry>(json!({"name": "a", "id": "0x10000"}));
        assert!(app.is_err());
    }

    #[test]
    fn test_absorb_replaces_and_appends() {
        let mut shared = ConfigurationDocument {
            unicast: loopback(),
            applications: vec![ApplicationEntry::new("svc", 0x1111)],
            services: vec![EndpointEntry::unreliable(0x1234, 0x5678, 30509)],
            clients: vec![],
            routing: Some("svc".to_string()),
            extra: Map::new(),
        };
        let incoming = ConfigurationDocument {
            unicast: loopback(),
            applications: vec![
                ApplicationEntry::new("cli", 0x2222),
                ApplicationEntry::new("svc", 0x1112),
            ],
            services: vec![EndpointEntry::reliable(0x1234, 0x5678, 30600)],
            clients: vec![EndpointEntry::unreliable(0x1234, 0x5678, 30509)],
            routing: None,
            extra: Map::new(),
        };

        shared.absorb(&incoming);
        assert_eq!(
            shared.applications,
            vec![
                ApplicationEntry::new("svc", 0x1112),
                ApplicationEntry::new("cli", 0x2222)
            ]
        );
        assert_eq!(shared.services, vec![EndpointEntry::reliable(0x1234, 0x5678, 30600)]);
        assert_eq!(shared.clients.len(), 1);
        assert_eq!(shared.routing.as_deref(), Some("svc"));
    }

    #[test]
    fn test_json_keys_are_sorted() {
        let doc = ConfigurationDocument {
            unicast: loopback(),
            applications: vec![ApplicationEntry::new("svc", 0x1111)],
            services: vec![],
            clients: vec![],
            routing: Some("svc".to_string()),
            extra: Map::new(),
        };
        let text = doc.to_json_pretty().unwrap();
        let positions: Vec<usize> = ["\"applications\"", "\"clients\"", "\"routing\"", "\"services\"", "\"unicast\""]
            .iter()
            .map(|key| text.find(key).unwrap())
            .collect();
        let mut sorted = positions.clone();
        sorted.sort_unstable();
        assert_eq!(positions, sorted);
    }
}
