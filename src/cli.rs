use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::SessionSettings;
use crate::dispatch::{handler, MessageType};
use crate::document::{build_default, merge, ApplicationEntry, DocumentOverrides, EndpointEntry, Transport};
use crate::error::{Result, SessionError};
use crate::purge::{purge_stale_locks, PurgePolicy, PurgeReport};
use crate::runtime::LoopbackRuntime;
use crate::session::{Session, SessionHost, SessionOptions};

pub const DEMO_SERVICE_ID: u16 = 0x1234;
pub const DEMO_INSTANCE_ID: u16 = 0x5678;
pub const DEMO_METHOD_ID: u16 = 0x9002;
pub const DEMO_EVENT_ID: u16 = 0x8778;
const DEMO_PORT: u16 = 30509;
const DEMO_PAYLOAD: &[u8] = b"ABC";

#[derive(Parser)]
#[command(name = "someip-session")]
#[command(version)]
#[command(about = "SOME/IP application sessions: configuration, lock cleanup and a loopback demo", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Directory holding default.toml and per-environment overrides
    #[arg(long, global = true, default_value = "config")]
    pub config_dir: PathBuf,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Print the configuration document an application would be created with
    Config {
        /// Application entry, NAME:ID (e.g. service-sample:0x1277)
        #[arg(long = "application", value_parser = parse_application)]
        applications: Vec<ApplicationEntry>,
        /// Offered endpoint, SERVICE:INSTANCE:PORT[:tcp|udp]
        #[arg(long = "service", value_parser = parse_endpoint)]
        services: Vec<EndpointEntry>,
        /// Consumed endpoint, SERVICE:INSTANCE:PORT[:tcp|udp]
        #[arg(long = "client", value_parser = parse_endpoint)]
        clients: Vec<EndpointEntry>,
        /// Routing manager name
        #[arg(long)]
        routing: Option<String>,
    },
    /// Remove stale runtime lock files
    Purge {
        /// Glob matched against file names (default from settings)
        #[arg(long)]
        pattern: Option<String>,
        /// Lock directory (default from settings, then the OS temp dir)
        #[arg(long)]
        dir: Option<PathBuf>,
    },
    /// Run the request/event example between one service and N clients in-process
    Demo {
        #[arg(long, default_value = "1")]
        clients: usize,
        #[arg(long, default_value = "3")]
        rounds: u32,
        /// Delay between rounds
        #[arg(long, default_value = "1000")]
        interval_ms: u64,
    },
}

/// Accepts `0x`-prefixed hex or decimal
pub fn parse_id(s: &str) -> std::result::Result<u16, String> {
    let s = s.trim();
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u16::from_str_radix(hex, 16),
        None => s.parse::<u16>(),
    };
    parsed.map_err(|e| format!("invalid id '{}': {}", s, e))
}

pub fn parse_application(s: &str) -> std::result::Result<ApplicationEntry, String> {
    let (name, id) = s
        .rsplit_once(':')
        .ok_or_else(|| format!("expected NAME:ID, got '{}'", s))?;
    if name.is_empty() {
        return Err(format!("missing application name in '{}'", s));
    }
    Ok(ApplicationEntry::new(name, parse_id(id)?))
}

pub fn parse_endpoint(s: &str) -> std::result::Result<EndpointEntry, String> {
    let parts: Vec<&str> = s.split(':').collect();
    let transport = match parts.get(3).map(|t| t.to_ascii_lowercase()) {
        None => Transport::Unreliable,
        Some(t) if t == "udp" => Transport::Unreliable,
        Some(t) if t == "tcp" => Transport::Reliable,
        Some(t) => return Err(format!("unknown transport '{}', expected tcp or udp", t)),
    };
    if parts.len() < 3 || parts.len() > 4 {
        return Err(format!("expected SERVICE:INSTANCE:PORT[:tcp|udp], got '{}'", s));
    }
    Ok(EndpointEntry::new(
        parse_id(parts[0])?,
        parse_id(parts[1])?,
        parse_id(parts[2])?,
        transport,
    ))
}

/// Overrides assembled from `config` subcommand flags
pub fn overrides_from_args(
    applications: &[ApplicationEntry],
    services: &[EndpointEntry],
    clients: &[EndpointEntry],
    routing: Option<&str>,
) -> DocumentOverrides {
    let mut overrides = DocumentOverrides::new();
    if !applications.is_empty() {
        overrides.applications = Some(applications.to_vec());
    }
    if !services.is_empty() {
        overrides.services = Some(services.to_vec());
    }
    if !clients.is_empty() {
        overrides.clients = Some(clients.to_vec());
    }
    overrides.routing = routing.map(str::to_string);
    overrides
}

/// Merged document as pretty JSON
pub fn render_config(overrides: &DocumentOverrides) -> Result<String> {
    let document = merge(&build_default()?, overrides);
    Ok(document.to_json_pretty()?)
}

/// Purge with settings, letting flags override pattern and directory
pub fn run_purge(
    settings: &SessionSettings,
    pattern: Option<String>,
    dir: Option<PathBuf>,
) -> Result<PurgeReport> {
    let mut policy: PurgePolicy = settings.purge.policy();
    if let Some(pattern) = pattern {
        policy.pattern = pattern;
    }
    if let Some(dir) = dir {
        policy.directory = dir;
    }
    info!(
        "Purging '{}' from {}",
        policy.pattern,
        policy.directory.display()
    );
    purge_stale_locks(&policy)
}

pub fn print_purge_report(report: &PurgeReport) {
    println!("Removed {} stale lock file(s)", report.removed);
    for failure in &report.failures {
        println!("  failed: {} ({})", failure.path.display(), failure.error);
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DemoOptions {
    pub clients: usize,
    pub rounds: u32,
    pub interval: Duration,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DemoSummary {
    pub router: Option<String>,
    pub clients: usize,
    pub rounds: u32,
    pub requests_sent: usize,
    pub requests_handled: usize,
    pub responses_received: usize,
    pub notifications_received: usize,
    pub runtime_calls: usize,
}

impl std::fmt::Display for DemoSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "routing manager:        {}",
            self.router.as_deref().unwrap_or("-")
        )?;
        writeln!(f, "clients:                {}", self.clients)?;
        writeln!(f, "rounds:                 {}", self.rounds)?;
        writeln!(f, "requests sent:          {}", self.requests_sent)?;
        writeln!(f, "requests handled:       {}", self.requests_handled)?;
        writeln!(f, "responses received:     {}", self.responses_received)?;
        writeln!(f, "notifications received: {}", self.notifications_received)?;
        write!(f, "runtime calls:          {}", self.runtime_calls)
    }
}

#[derive(Default)]
struct DemoCounters {
    requests_handled: AtomicUsize,
    responses: AtomicUsize,
    notifications: AtomicUsize,
}

fn demo_overrides(name: &str, id: u16, offering: bool) -> DocumentOverrides {
    let endpoint = EndpointEntry::unreliable(DEMO_SERVICE_ID, DEMO_INSTANCE_ID, DEMO_PORT);
    let overrides = DocumentOverrides::new().application(name, id);
    if offering {
        overrides.service(endpoint)
    } else {
        overrides.client(endpoint)
    }
}

fn start_service(host: &SessionHost, counters: &Arc<DemoCounters>) -> Result<Arc<Session>> {
    let name = "service-sample";
    let options = SessionOptions::new(name, DEMO_SERVICE_ID, DEMO_INSTANCE_ID)
        .overrides(demo_overrides(name, 0x1277, true));
    let service = Arc::new(host.create_session(options)?);
    service.start()?;

    // Weak: the handler is owned by the session it calls back into
    let weak: Weak<Session> = Arc::downgrade(&service);
    let counters = counters.clone();
    service.on_message(
        DEMO_METHOD_ID,
        Some(handler(move |message_type, id, payload| {
            if message_type != MessageType::Request {
                return None;
            }
            counters.requests_handled.fetch_add(1, Ordering::Relaxed);
            let service = weak.upgrade()?;
            debug!("{} got request {:#06x}: {}", service.name(), id, hex::encode(payload));
            if let Err(e) = service.notify(DEMO_EVENT_ID, Some(payload)) {
                warn!("{} could not publish {:#06x}: {}", service.name(), DEMO_EVENT_ID, e);
            }
            Some(payload.to_vec())
        })),
    )?;
    service.offer(&[])?;
    service.offer(&[DEMO_EVENT_ID])?;
    Ok(service)
}

fn start_client(host: &SessionHost, index: usize, counters: &Arc<DemoCounters>) -> Result<Session> {
    let name = format!("client-sample-{index}");
    let id = 0x1344u16.wrapping_add(index as u16);
    let options = SessionOptions::new(name.as_str(), DEMO_SERVICE_ID, DEMO_INSTANCE_ID)
        .overrides(demo_overrides(&name, id, false));
    let client = host.create_session(options)?;
    client.start()?;
    client.register()?;

    let on_event = counters.clone();
    client.on_event(
        DEMO_EVENT_ID,
        Some(handler(move |_, _, _| {
            on_event.notifications.fetch_add(1, Ordering::Relaxed);
            None
        })),
    )?;
    let on_response = counters.clone();
    client.on_message(
        DEMO_METHOD_ID,
        Some(handler(move |message_type, _, _| {
            if message_type == MessageType::Response {
                on_response.responses.fetch_add(1, Ordering::Relaxed);
            }
            None
        })),
    )?;
    Ok(client)
}

/// Service/client example over [`LoopbackRuntime`].
///
/// The service (created first, so routing manager) answers method
/// `0x9002` and republishes every request as event `0x8778`; every client
/// subscribes to the event and client 0 sends `"ABC"` once per round.
pub async fn run_demo(host: SessionHost, options: DemoOptions) -> Result<DemoSummary> {
    if options.clients == 0 {
        return Err(SessionError::invalid_operation(
            "demo needs at least one client",
        ));
    }

    let counters = Arc::new(DemoCounters::default());
    let service = start_service(&host, &counters)?;
    let mut clients = Vec::with_capacity(options.clients);
    for index in 0..options.clients {
        clients.push(Arc::new(start_client(&host, index, &counters)?));
    }
    let router = host.coordinator().current_router();
    info!(
        "Demo running: {} client(s), {} round(s), routing manager {:?}",
        options.clients, options.rounds, router
    );

    let sender = clients[0].clone();
    let rounds = options.rounds;
    let interval = options.interval;
    let driver = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
        let mut sent = 0usize;
        for round in 1..=rounds {
            ticker.tick().await;
            debug!("Round {}/{}", round, rounds);
            sender.request(DEMO_METHOD_ID, Some(DEMO_PAYLOAD), Transport::Unreliable)?;
            sent += 1;
        }
        Ok::<usize, SessionError>(sent)
    });
    let requests_sent = driver
        .await
        .map_err(|e| SessionError::Other(anyhow::anyhow!("demo driver failed: {e}")))??;

    for client in &clients {
        client.stop()?;
    }
    service.stop()?;

    Ok(DemoSummary {
        router,
        clients: options.clients,
        rounds: options.rounds,
        requests_sent,
        requests_handled: counters.requests_handled.load(Ordering::Relaxed),
        responses_received: counters.responses.load(Ordering::Relaxed),
        notifications_received: counters.notifications.load(Ordering::Relaxed),
        runtime_calls: 0,
    })
}

/// [`run_demo`] on a fresh loopback runtime wired from settings
pub async fn demo_with_settings(settings: &SessionSettings, options: DemoOptions) -> Result<DemoSummary> {
    let runtime = Arc::new(LoopbackRuntime::new());
    let host = SessionHost::from_settings(settings, runtime.clone());
    let mut summary = run_demo(host, options).await?;
    summary.runtime_calls = runtime.calls().len();
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::RuntimeCall;

    #[test]
    fn test_parse_id() {
        assert_eq!(parse_id("0x1234"), Ok(0x1234));
        assert_eq!(parse_id("30509"), Ok(30509));
        assert!(parse_id("0xzz").is_err());
        assert!(parse_id("70000").is_err());
    }

    #[test]
    fn test_parse_application() {
        let entry = parse_application("service-sample:0x1277").unwrap();
        assert_eq!(entry, ApplicationEntry::new("service-sample", 0x1277));
        assert!(parse_application("no-id").is_err());
        assert!(parse_application(":0x1277").is_err());
    }

    #[test]
    fn test_parse_endpoint() {
        assert_eq!(
            parse_endpoint("0x1234:0x5678:30509").unwrap(),
            EndpointEntry::unreliable(0x1234, 0x5678, 30509)
        );
        assert_eq!(
            parse_endpoint("0x1234:0x5678:30509:tcp").unwrap(),
            EndpointEntry::reliable(0x1234, 0x5678, 30509)
        );
        assert!(parse_endpoint("0x1234:0x5678").is_err());
        assert!(parse_endpoint("0x1234:0x5678:1:sctp").is_err());
    }

    #[test]
    fn test_render_config_lists_overrides() {
        let overrides = overrides_from_args(
            &[ApplicationEntry::new("service-sample", 0x1277)],
            &[EndpointEntry::unreliable(0x1234, 0x5678, 30509)],
            &[],
            Some("service-sample"),
        );
        let rendered = render_config(&overrides).unwrap();
        let value: serde_json::Value = serde_json::from_str(&rendered).unwrap();
        assert_eq!(value["applications"][0]["name"], "service-sample");
        assert_eq!(value["applications"][0]["id"], "0x1277");
        assert_eq!(value["services"][0]["unreliable"], 30509);
        assert_eq!(value["routing"], "service-sample");
    }

    fn demo_settings(dir: &tempfile::TempDir) -> SessionSettings {
        let mut settings = SessionSettings::default();
        settings.document.path = dir.path().join("vsomeip.json");
        settings.purge.enabled = false;
        settings
    }

    #[tokio::test]
    async fn test_demo_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = Arc::new(LoopbackRuntime::new());
        let host = SessionHost::from_settings(&demo_settings(&dir), runtime.clone());
        let options = DemoOptions {
            clients: 2,
            rounds: 3,
            interval: Duration::from_millis(1),
        };

        let summary = run_demo(host.clone(), options).await.unwrap();
        assert_eq!(summary.router.as_deref(), Some("service-sample"));
        assert_eq!(summary.requests_sent, 3);
        assert_eq!(summary.requests_handled, 3);
        assert_eq!(summary.responses_received, 3);
        assert_eq!(summary.notifications_received, 6);

        let payloads: Vec<Vec<u8>> = runtime
            .calls_for("client-sample-0")
            .into_iter()
            .filter_map(|call| match call {
                RuntimeCall::SendService { payload, .. } => Some(payload),
                _ => None,
            })
            .collect();
        assert_eq!(payloads, vec![b"ABC".to_vec(); 3]);
        assert_eq!(host.coordinator().current_router(), None);
    }

    #[tokio::test]
    async fn test_demo_counts_runtime_calls() {
        let dir = tempfile::tempdir().unwrap();
        let options = DemoOptions {
            clients: 1,
            rounds: 1,
            interval: Duration::from_millis(1),
        };
        let summary = demo_with_settings(&demo_settings(&dir), options).await.unwrap();
        assert!(summary.runtime_calls > 0);
        assert_eq!(summary.notifications_received, 1);
        assert!(dir.path().join("vsomeip.json").exists());
    }

    #[tokio::test]
    async fn test_demo_requires_a_client() {
        let dir = tempfile::tempdir().unwrap();
        let options = DemoOptions {
            clients: 0,
            rounds: 1,
            interval: Duration::from_millis(1),
        };
        let err = demo_with_settings(&demo_settings(&dir), options).await.unwrap_err();
        assert!(err.is_invalid_operation());
    }
}
