//! In-memory service registry backed by container state.
//!
//! The registry maps opaque container ids to [`Service`] records under a
//! single readers-writer lock. Short hex ids expand to the unique 64-char
//! id they prefix, and every registered alias is routed authoritatively
//! through the [`SuffixRouter`] while the record lives.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::DnsError;
use crate::metrics;

/// Origin of a registry entry.
///
/// The event reconciler only ever touches entries it owns; anything else
/// (admin HTTP overrides in particular) survives container lifecycle events.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ServiceProvider {
    /// Owned by the docker event reconciler.
    Docker,
    /// Added through the admin HTTP surface.
    #[default]
    Manual,
}

/// A container (or manually added entry) and its attached DNS record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Service {
    /// Container hostname fragment, lowercased when matching.
    pub name: String,

    /// Image-tag fragment; empty means the synthesized name has no image part.
    #[serde(default)]
    pub image: String,

    /// Addresses of the service; the first one is canonical.
    #[serde(default)]
    pub ips: Vec<Ipv4Addr>,

    /// Per-record TTL override; `-1` inherits the global TTL.
    #[serde(default = "default_ttl")]
    pub ttl: i32,

    /// Extra fully-qualified names this service answers to.
    #[serde(default)]
    pub aliases: Vec<String>,

    /// Which subsystem owns the entry.
    #[serde(skip)]
    pub provider: ServiceProvider,

    /// Set when an ignore label/env asked for this container to be skipped.
    #[serde(skip)]
    pub ignored_by_user: bool,
}

fn default_ttl() -> i32 {
    -1
}

impl Service {
    /// Create an empty service owned by `provider`, inheriting the global TTL.
    pub fn new(provider: ServiceProvider) -> Self {
        Self {
            name: String::new(),
            image: String::new(),
            ips: Vec::new(),
            ttl: -1,
            aliases: Vec::new(),
            provider,
            ignored_by_user: false,
        }
    }
}

/// Dynamic routing hooks the registry drives as aliases come and go.
///
/// Implementations must be short and in-memory: the registry calls these
/// while holding its write lock.
pub trait SuffixRouter: Send + Sync {
    /// Route queries under `suffix` to the authoritative handler.
    fn register_suffix(&self, suffix: &str);

    /// Remove the route for `suffix`, falling back to forwarding.
    fn unregister_suffix(&self, suffix: &str);
}

/// Thread-safe id → service mapping.
pub struct ServiceRegistry {
    services: RwLock<HashMap<String, Service>>,
    router: Arc<dyn SuffixRouter>,
}

impl ServiceRegistry {
    /// Create an empty registry wired to the given alias router.
    pub fn new(router: Arc<dyn SuffixRouter>) -> Self {
        Self {
            services: RwLock::new(HashMap::new()),
            router,
        }
    }

    /// Insert or replace a service.
    ///
    /// Services flagged by an ignore label are silently skipped, and a
    /// service without any IP address is refused. Replacing an id first
    /// drops the alias routes of the previous record.
    pub fn add(&self, id: &str, service: Service) -> Result<(), DnsError> {
        if service.ignored_by_user {
            return Ok(());
        }
        if service.ips.is_empty() {
            return Err(DnsError::NoIpProvided(id.to_string()));
        }

        let mut services = self.services.write();
        let id = expand_id(&services, id);

        if let Some(previous) = services.get(&id) {
            for alias in &previous.aliases {
                self.router.unregister_suffix(alias);
            }
        }
        for alias in &service.aliases {
            debug!(alias = %alias, "handling DNS requests for alias");
            self.router.register_suffix(alias);
        }

        debug!(id = %id, name = %service.name, image = %service.image, "added service");
        services.insert(id, service);
        metrics::record_registry_size(services.len());
        Ok(())
    }

    /// Remove a service, releasing its alias routes.
    pub fn remove(&self, id: &str) -> Result<Service, DnsError> {
        let mut services = self.services.write();
        let id = expand_id(&services, id);

        let Some(service) = services.remove(&id) else {
            return Err(DnsError::ServiceNotExist(id));
        };
        for alias in &service.aliases {
            self.router.unregister_suffix(alias);
        }

        debug!(id = %id, "removed service");
        metrics::record_registry_size(services.len());
        Ok(service)
    }

    /// Read a copy of a service.
    pub fn get(&self, id: &str) -> Result<Service, DnsError> {
        let services = self.services.read();
        let id = expand_id(&services, id);
        services.get(&id).cloned().ok_or(DnsError::ServiceNotExist(id))
    }

    /// Read a copy of every service. Mutating the returned map cannot
    /// affect registry state.
    pub fn get_all(&self) -> HashMap<String, Service> {
        self.services.read().clone()
    }

    /// Number of registered services.
    pub fn len(&self) -> usize {
        self.services.read().len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.services.read().is_empty()
    }

    /// Stream every `(id, service)` pair to `f` under the read lock.
    ///
    /// The lock is held for the whole traversal and released when this
    /// returns, so callers can build answers without materializing the
    /// service list, but must not block inside `f`.
    pub fn for_each<F>(&self, mut f: F)
    where
        F: FnMut(&str, &Service),
    {
        let services = self.services.read();
        for (id, service) in services.iter() {
            f(id, service);
        }
    }
}

/// Expand a partial container SHA to the unique full id it prefixes.
///
/// Inputs shorter than four characters or containing non-hex characters are
/// returned unchanged, as is anything that prefixes no registered 64-char
/// hex id.
fn expand_id(services: &HashMap<String, Service>, id: &str) -> String {
    // Hard to make a judgement on small image names.
    if id.len() < 4 || !is_hex(id) {
        return id.to_string();
    }

    services
        .keys()
        .find(|full| full.len() == 64 && is_hex(full) && full.starts_with(id))
        .cloned()
        .unwrap_or_else(|| id.to_string())
}

pub(crate) fn is_hex(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}
