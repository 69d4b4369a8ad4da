//! Docker event reconciliation and service derivation.
//!
//! A single long-running loop keeps the registry in sync with the daemon:
//! subscribe to container events, list what is already running, then apply
//! lifecycle events one by one. Any stream failure tears the loop down and
//! the supervisor reconnects with exponential backoff, resyncing from a
//! fresh listing to catch up on missed events.

use std::collections::{HashMap, HashSet};
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use bollard::container::{InspectContainerOptions, ListContainersOptions};
use bollard::models::EventMessage;
use bollard::system::EventsOptions;
use bollard::{Docker, API_DEFAULT_VERSION};
use futures::StreamExt;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::DnsError;
use crate::metrics;
use crate::registry::{is_hex, Service, ServiceProvider, ServiceRegistry};

/// Timeout for docker daemon requests, in seconds.
const DOCKER_TIMEOUT_SECS: u64 = 120;

/// Supervisor backoff cap.
const MAX_BACKOFF_SECS: u64 = 30;

/// Keeps the service registry in sync with the docker daemon.
pub struct DockerManager {
    config: Arc<Config>,
    registry: Arc<ServiceRegistry>,
    client: Docker,
}

impl DockerManager {
    /// Connect a manager to the daemon endpoint from the configuration.
    pub fn new(config: Arc<Config>, registry: Arc<ServiceRegistry>) -> Result<Self, DnsError> {
        let client = connect(&config)?;
        Ok(Self {
            config,
            registry,
            client,
        })
    }

    /// Verify the daemon is reachable.
    pub async fn ping(&self) -> Result<(), DnsError> {
        self.client.ping().await?;
        Ok(())
    }

    /// Run the reconciliation loop until cancelled, reconnecting with
    /// exponential backoff on stream failures.
    pub async fn run(self, cancel: CancellationToken) {
        let mut backoff_secs = 1u64;

        loop {
            if cancel.is_cancelled() {
                info!("docker manager shutting down");
                return;
            }

            match self.watch(&cancel, &mut backoff_secs).await {
                Ok(()) => {
                    info!("docker manager shutting down");
                    return;
                }
                Err(e) => {
                    error!(
                        error = %e,
                        retry_in_secs = backoff_secs,
                        "error watching docker events, retrying"
                    );
                    metrics::record_docker_reconnect();
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("docker manager shutting down");
                    return;
                }
                _ = sleep(Duration::from_secs(backoff_secs)) => {}
            }
            backoff_secs = (backoff_secs * 2).min(MAX_BACKOFF_SECS);
        }
    }

    /// One monitor cycle: subscribe, resync, then apply events until the
    /// stream breaks or we are cancelled.
    async fn watch(
        &self,
        cancel: &CancellationToken,
        backoff_secs: &mut u64,
    ) -> Result<(), DnsError> {
        let mut filters = HashMap::new();
        filters.insert("type".to_string(), vec!["container".to_string()]);
        let events = self.client.events(Some(EventsOptions::<String> {
            filters,
            ..Default::default()
        }));
        let mut events = std::pin::pin!(events);

        self.resync().await?;
        *backoff_secs = 1;

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    return Ok(());
                }

                event = events.next() => match event {
                    Some(Ok(message)) => self.dispatch(message).await?,
                    Some(Err(e)) => return Err(e.into()),
                    None => return Err(DnsError::EventStreamEnded),
                }
            }
        }
    }

    /// Register every listed container and drop reconciler-owned entries
    /// whose container no longer exists.
    async fn resync(&self) -> Result<(), DnsError> {
        let options = ListContainersOptions::<String> {
            all: self.config.all,
            ..Default::default()
        };
        let containers = self.client.list_containers(Some(options)).await?;

        let mut seen = HashSet::new();
        for summary in containers {
            let Some(id) = summary.id else { continue };
            self.add_container(&id).await?;
            seen.insert(id);
        }

        for (id, service) in self.registry.get_all() {
            if service.provider == ServiceProvider::Docker && !seen.contains(&id) {
                let _ = self.registry.remove(&id);
            }
        }

        info!(containers = seen.len(), "container resync complete");
        Ok(())
    }

    /// Apply a single container event to the registry.
    pub async fn dispatch(&self, message: EventMessage) -> Result<(), DnsError> {
        let Some(id) = message.actor.and_then(|actor| actor.id) else {
            return Ok(());
        };
        let action = message.action.unwrap_or_default();
        metrics::record_docker_event(&action);

        match action.as_str() {
            "create" => {
                debug!(id = %id, "created container");
                if self.config.all {
                    self.add_container(&id).await?;
                }
            }
            "start" | "unpause" => {
                debug!(id = %id, "started container");
                if !self.config.all {
                    self.add_container(&id).await?;
                }
            }
            "die" | "pause" => {
                debug!(id = %id, "stopped container");
                if !self.config.all {
                    self.remove_container(&id);
                } else {
                    debug!(id = %id, "stopped container kept as --all is set");
                }
            }
            "destroy" => {
                debug!(id = %id, "destroyed container");
                if self.config.all {
                    self.remove_container(&id);
                }
            }
            "rename" => {
                debug!(id = %id, "renamed container");
                self.remove_container(&id);
                self.add_container(&id).await?;
            }
            _ => {}
        }
        Ok(())
    }

    /// Derive and register a container, leaving manual overrides untouched.
    async fn add_container(&self, id: &str) -> Result<(), DnsError> {
        if let Ok(existing) = self.registry.get(id) {
            if existing.provider != ServiceProvider::Docker {
                debug!(id = %id, "skipping container with a manual override");
                return Ok(());
            }
        }

        let Some(service) = self.derive_service(id).await? else {
            debug!(id = %id, "container ignored by user");
            return Ok(());
        };
        match self.registry.add(id, service) {
            Err(DnsError::NoIpProvided(_)) => {
                warn!(id = %id, "service ignored: no IP provided");
                Ok(())
            }
            other => other,
        }
    }

    /// Remove a reconciler-owned entry; manual entries always survive.
    fn remove_container(&self, id: &str) {
        match self.registry.get(id) {
            Ok(service) if service.provider == ServiceProvider::Docker => {
                if let Err(e) = self.registry.remove(id) {
                    debug!(id = %id, error = %e, "container was not registered");
                }
            }
            Ok(_) => debug!(id = %id, "keeping manual entry"),
            Err(_) => {}
        }
    }

    /// Build the service record for a container from its description.
    async fn derive_service(&self, id: &str) -> Result<Option<Service>, DnsError> {
        let desc = self
            .client
            .inspect_container(id, None::<InspectContainerOptions>)
            .await?;

        let mut service = Service::new(ServiceProvider::Docker);

        let container_config = desc.config.unwrap_or_default();
        service.image = image_name(container_config.image.as_deref().unwrap_or_default());
        let digest = desc.image.unwrap_or_default();
        if image_name_is_sha(&service.image, &digest) {
            warn!(
                id = %short_id(id),
                image = %service.image,
                "can't route container by image, image is not a tag"
            );
            service.image.clear();
        }
        service.name = clean_container_name(desc.name.as_deref().unwrap_or_default());

        let networks = desc
            .network_settings
            .and_then(|settings| settings.networks)
            .unwrap_or_default();
        if networks.is_empty() {
            warn!(name = %service.name, "no IP address found for container");
        }
        for endpoint in networks.values() {
            if let Some(ip) = endpoint
                .ip_address
                .as_deref()
                .and_then(|addr| addr.parse::<Ipv4Addr>().ok())
            {
                service.ips.push(ip);
            }
        }

        let labels = container_config.labels.unwrap_or_default();
        if !apply_overrides(&mut service, &labels, &LABEL_KEYS) {
            return Ok(None);
        }
        let env = split_env(container_config.env.as_deref().unwrap_or_default());
        if !apply_overrides(&mut service, &env, &ENV_KEYS) {
            return Ok(None);
        }

        if self.config.create_alias {
            let alias = service.name.clone();
            service.aliases.push(alias);
        }
        Ok(Some(service))
    }
}

/// Connect to the daemon endpoint, with mTLS when configured.
fn connect(config: &Config) -> Result<Docker, DnsError> {
    let host = config.docker_host.as_str();
    let client = if host.starts_with("unix://") {
        Docker::connect_with_unix(host, DOCKER_TIMEOUT_SECS, API_DEFAULT_VERSION)?
    } else if config.tls_verify {
        Docker::connect_with_ssl(
            host,
            &config.tls_key,
            &config.tls_cert,
            &config.tls_ca_cert,
            DOCKER_TIMEOUT_SECS,
            API_DEFAULT_VERSION,
        )?
    } else {
        Docker::connect_with_http(host, DOCKER_TIMEOUT_SECS, API_DEFAULT_VERSION)?
    };
    Ok(client)
}

/// Alternative key names for one override, checked in order.
struct OverrideKeys {
    ignore: &'static [&'static str],
    alias: &'static [&'static str],
    name: &'static [&'static str],
    tags: &'static [&'static str],
    image: &'static [&'static str],
    ttl: &'static [&'static str],
    region: &'static [&'static str],
    ip_addr: &'static [&'static str],
    prefix: &'static [&'static str],
}

const LABEL_KEYS: OverrideKeys = OverrideKeys {
    ignore: &["com.dnsdock.ignore"],
    alias: &["com.dnsdock.alias"],
    name: &["com.dnsdock.name"],
    tags: &["com.dnsdock.tags"],
    image: &["com.dnsdock.image"],
    ttl: &["com.dnsdock.ttl"],
    region: &["com.dnsdock.region"],
    ip_addr: &["com.dnsdock.ip_addr"],
    prefix: &["com.dnsdock.prefix"],
};

const ENV_KEYS: OverrideKeys = OverrideKeys {
    ignore: &["DNSDOCK_IGNORE", "SERVICE_IGNORE"],
    alias: &["DNSDOCK_ALIAS"],
    name: &["DNSDOCK_NAME"],
    tags: &["SERVICE_TAGS"],
    image: &["DNSDOCK_IMAGE", "SERVICE_NAME"],
    ttl: &["DNSDOCK_TTL"],
    region: &["SERVICE_REGION"],
    ip_addr: &["DNSDOCK_IPADDRESS"],
    prefix: &["DNSDOCK_PREFIX"],
};

fn lookup<'a>(map: &'a HashMap<String, String>, keys: &[&str]) -> Option<&'a str> {
    keys.iter().find_map(|key| map.get(*key).map(String::as_str))
}

/// Apply user overrides from labels or environment variables.
///
/// Returns `false` when an ignore key asks for the container to be skipped.
fn apply_overrides(
    service: &mut Service,
    map: &HashMap<String, String>,
    keys: &OverrideKeys,
) -> bool {
    if lookup(map, keys.ignore).is_some() {
        return false;
    }

    if let Some(value) = lookup(map, keys.alias) {
        service.aliases = value.split(',').map(str::to_string).collect();
    }
    if let Some(value) = lookup(map, keys.name) {
        service.name = value.to_string();
    }
    if let Some(value) = lookup(map, keys.tags) {
        // the first tag becomes the name; an empty value clears it
        service.name = value.split(',').next().unwrap_or("").to_string();
    }
    if let Some(value) = lookup(map, keys.image) {
        service.image = value.to_string();
    }
    if let Some(value) = lookup(map, keys.ttl) {
        if let Ok(ttl) = value.parse::<i32>() {
            service.ttl = ttl;
        }
    }
    if let Some(value) = lookup(map, keys.ip_addr) {
        if let Ok(ip) = value.parse::<Ipv4Addr>() {
            service.ips = vec![ip];
        }
    }
    if let Some(value) = lookup(map, keys.prefix) {
        service.ips.retain(|ip| ip.to_string().starts_with(value));
        if service.ips.is_empty() {
            warn!(
                prefix = %value,
                name = %service.name,
                "the prefix didn't match any IP address of the service, it will be ignored"
            );
        }
    }
    if let Some(region) = lookup(map, keys.region) {
        if !region.is_empty() {
            service.image = format!("{}.{}", service.image, region);
        }
    }

    true
}

/// The routable fragment of an image ref: last path segment, tag stripped.
fn image_name(tag: &str) -> String {
    let tag = tag.rsplit('/').next().unwrap_or(tag);
    match tag.rfind(':') {
        Some(index) => tag[..index].to_string(),
        None => tag.to_string(),
    }
}

/// Whether the "image name" is really a prefix of the image content hash.
fn image_name_is_sha(image: &str, digest: &str) -> bool {
    // Hard to make a judgement on small image names.
    if image.len() < 4 || !is_hex(image) {
        return false;
    }
    let digest = digest.strip_prefix("sha256:").unwrap_or(digest);
    digest.starts_with(image)
}

fn clean_container_name(name: &str) -> String {
    name.replace('/', "")
}

fn split_env(vars: &[String]) -> HashMap<String, String> {
    vars.iter()
        .map(|exp| match exp.split_once('=') {
            Some((key, value)) => (key.trim().to_string(), value.trim().to_string()),
            None => (exp.trim().to_string(), String::new()),
        })
        .collect()
}

fn short_id(id: &str) -> &str {
    id.get(..10).unwrap_or(id)
}
