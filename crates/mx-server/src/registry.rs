use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use mx_common::error::ExportError;

/// Registry name this process registers under.
pub const SERVICE_NAME: &str = "webitel.media-exporter";

/// TTL of the registry health check; the heartbeat runs at half this cadence.
const CHECK_TTL: Duration = Duration::from_secs(60);

/// How long the registry keeps a critical instance before deregistering it.
const DEREGISTER_CRITICAL_AFTER: Duration = Duration::from_secs(30);

/// Thin client over the Consul agent HTTP API.
#[derive(Clone)]
pub struct ConsulClient {
    base: String,
    http: reqwest::Client,
}

impl ConsulClient {
    pub fn new(addr: &str) -> Self {
        Self {
            base: format!("http://{addr}"),
            http: reqwest::Client::new(),
        }
    }

    async fn put(&self, path: &str, body: Option<serde_json::Value>) -> Result<(), ExportError> {
        let mut request = self.http.put(format!("{}{path}", self.base));
        if let Some(body) = body {
            request = request.json(&body);
        }
        let response = request
            .send()
            .await
            .map_err(|err| ExportError::UpstreamUnavailable(format!("consul: {err}")))?;
        if !response.status().is_success() {
            return Err(ExportError::UpstreamUnavailable(format!(
                "consul answered {} on {path}",
                response.status()
            )));
        }
        Ok(())
    }
}

#[derive(Serialize)]
struct ServiceRegistration<'a> {
    #[serde(rename = "ID")]
    id: &'a str,
    #[serde(rename = "Name")]
    name: &'a str,
    #[serde(rename = "Address")]
    address: &'a str,
    #[serde(rename = "Port")]
    port: u16,
    #[serde(rename = "Check")]
    check: ServiceCheck,
}

#[derive(Serialize)]
struct ServiceCheck {
    #[serde(rename = "TTL")]
    ttl: String,
    #[serde(rename = "DeregisterCriticalServiceAfter")]
    deregister_critical_service_after: String,
}

/// TTL-based service registration: register once, pass the check on a fixed
/// cadence, deregister on shutdown. Unrelated to export semantics.
pub struct ConsulRegistry {
    client: ConsulClient,
    service_id: String,
}

impl ConsulRegistry {
    pub fn new(consul_addr: &str, service_id: &str) -> Self {
        Self {
            client: ConsulClient::new(consul_addr),
            service_id: service_id.to_string(),
        }
    }

    pub async fn register(&self, public_addr: &str) -> Result<(), ExportError> {
        let (address, port) = public_addr.rsplit_once(':').ok_or_else(|| {
            ExportError::InvalidArgument(format!("unable to parse address: {public_addr}"))
        })?;
        let port: u16 = port.parse().map_err(|_| {
            ExportError::InvalidArgument(format!("unable to parse port: {public_addr}"))
        })?;

        let registration = ServiceRegistration {
            id: &self.service_id,
            name: SERVICE_NAME,
            address,
            port,
            check: ServiceCheck {
                ttl: format!("{}s", CHECK_TTL.as_secs()),
                deregister_critical_service_after: format!(
                    "{}s",
                    DEREGISTER_CRITICAL_AFTER.as_secs()
                ),
            },
        };

        self.client
            .put(
                "/v1/agent/service/register",
                Some(serde_json::to_value(&registration).map_err(|err| {
                    ExportError::Internal(format!("encode registration: {err}"))
                })?),
            )
            .await?;

        info!(service = SERVICE_NAME, id = %self.service_id, "service registered");
        Ok(())
    }

    async fn pass_check(&self) -> Result<(), ExportError> {
        self.client
            .put(
                &format!("/v1/agent/check/pass/service:{}", self.service_id),
                None,
            )
            .await
    }

    pub async fn deregister(&self) -> Result<(), ExportError> {
        self.client
            .put(
                &format!("/v1/agent/service/deregister/{}", self.service_id),
                None,
            )
            .await?;
        info!(id = %self.service_id, "service deregistered");
        Ok(())
    }

    /// Heartbeat loop at half the check TTL until cancellation.
    pub async fn run_check_loop(&self, shutdown: CancellationToken) {
        if let Err(err) = self.pass_check().await {
            warn!(error = %err, "initial registry check-in failed");
        }

        let mut ticker = tokio::time::interval(CHECK_TTL / 2);
        ticker.tick().await;
        info!("started registry service checker");
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("stopped registry service checker");
                    return;
                }
                _ = ticker.tick() => {
                    if let Err(err) = self.pass_check().await {
                        error!(error = %err, "registry check-in failed");
                    }
                }
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct HealthEntry {
    #[serde(rename = "Service")]
    service: HealthService,
}

#[derive(Debug, Deserialize)]
struct HealthService {
    #[serde(rename = "Address")]
    address: String,
    #[serde(rename = "Port")]
    port: u16,
}

/// Round-robin resolver over the healthy instances of an upstream service.
/// Shared by every upstream client.
pub struct ConsulResolver {
    client: ConsulClient,
    cursor: AtomicUsize,
}

impl ConsulResolver {
    pub fn new(consul_addr: &str) -> Arc<Self> {
        Arc::new(Self {
            client: ConsulClient::new(consul_addr),
            cursor: AtomicUsize::new(0),
        })
    }

    pub async fn resolve(&self, service: &str) -> Result<String, ExportError> {
        let response = self
            .client
            .http
            .get(format!(
                "{}/v1/health/service/{service}?passing=true",
                self.client.base
            ))
            .send()
            .await
            .map_err(|err| ExportError::UpstreamUnavailable(format!("consul: {err}")))?;

        let entries: Vec<HealthEntry> = response
            .json()
            .await
            .map_err(|err| ExportError::UpstreamUnavailable(format!("decode consul health: {err}")))?;

        if entries.is_empty() {
            return Err(ExportError::UpstreamUnavailable(format!(
                "no healthy instance of {service}"
            )));
        }

        let picked = &entries[self.cursor.fetch_add(1, Ordering::Relaxed) % entries.len()];
        Ok(format!(
            "http://{}:{}",
            picked.service.address, picked.service.port
        ))
    }
}
