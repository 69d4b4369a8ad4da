//! Configuration types for dnsdock.

use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use crate::error::DnsError;

/// A domain as an ordered sequence of labels, e.g. `["dev", "docker"]`.
///
/// Normalization collapses repeated dots and strips leading/trailing ones,
/// so `".foo..docker."` and `"foo.docker"` are the same domain.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Domain {
    labels: Vec<String>,
}

impl Domain {
    /// Create a domain from a dotted string.
    pub fn new(s: &str) -> Self {
        Self {
            labels: s
                .split('.')
                .filter(|label| !label.is_empty())
                .map(str::to_string)
                .collect(),
        }
    }

    /// The labels of the domain, root-last.
    pub fn labels(&self) -> &[String] {
        &self.labels
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.labels.join("."))
    }
}

/// The process-wide TTL for matched records.
///
/// Services with a TTL of `-1` inherit this value, the SOA record uses it as
/// its minimum TTL, and the admin endpoint `PUT /set/ttl` mutates it at
/// runtime.
#[derive(Clone, Debug)]
pub struct SharedTtl(Arc<AtomicU32>);

impl SharedTtl {
    /// Create a new TTL cell.
    pub fn new(ttl: u32) -> Self {
        Self(Arc::new(AtomicU32::new(ttl)))
    }

    /// Read the current TTL.
    pub fn get(&self) -> u32 {
        self.0.load(Ordering::Relaxed)
    }

    /// Replace the TTL.
    pub fn set(&self, ttl: u32) {
        self.0.store(ttl, Ordering::Relaxed)
    }
}

/// dnsdock configuration.
#[derive(Clone, Debug)]
pub struct Config {
    /// Upstream nameservers for unmatched requests, tried in order.
    pub nameservers: Vec<SocketAddr>,

    /// Address the DNS server listens on (UDP).
    pub dns_addr: SocketAddr,

    /// Address the admin HTTP server listens on.
    pub http_addr: SocketAddr,

    /// Authoritative domain appended to all synthesized names.
    pub domain: Domain,

    /// Docker daemon endpoint (`unix://...` or `tcp://host:port`).
    pub docker_host: String,

    /// Enable mTLS when connecting to the docker daemon.
    pub tls_verify: bool,

    /// CA certificate for daemon mTLS.
    pub tls_ca_cert: PathBuf,

    /// Client certificate for daemon mTLS.
    pub tls_cert: PathBuf,

    /// Client certificate private key for daemon mTLS.
    pub tls_key: PathBuf,

    /// Initial global TTL for matched requests.
    pub ttl: u32,

    /// Rewrite the TTL of forwarded answers to the global TTL.
    pub force_ttl: bool,

    /// Automatically create an alias with just the container name.
    pub create_alias: bool,

    /// Keep stopped containers registered.
    pub all: bool,
}

impl Default for Config {
    fn default() -> Self {
        let docker_host = std::env::var("DOCKER_HOST")
            .unwrap_or_else(|_| "unix:///var/run/docker.sock".to_string());
        let tls_verify = std::env::var("DOCKER_TLS_VERIFY").map(|v| !v.is_empty()).unwrap_or(false);
        let cert_dir = docker_cert_dir();

        Self {
            nameservers: vec![SocketAddr::from(([8, 8, 8, 8], 53))],
            dns_addr: SocketAddr::from(([0, 0, 0, 0], 53)),
            http_addr: SocketAddr::from(([0, 0, 0, 0], 80)),
            domain: Domain::new("docker"),
            docker_host,
            tls_verify,
            tls_ca_cert: cert_dir.join("ca.pem"),
            tls_cert: cert_dir.join("cert.pem"),
            tls_key: cert_dir.join("key.pem"),
            ttl: 0,
            force_ttl: false,
            create_alias: false,
            all: false,
        }
    }
}

/// Directory holding docker TLS material (`$DOCKER_CERT_PATH` or `~/.docker`).
pub fn docker_cert_dir() -> PathBuf {
    std::env::var("DOCKER_CERT_PATH").map(PathBuf::from).unwrap_or_else(|_| {
        PathBuf::from(std::env::var("HOME").unwrap_or_default()).join(".docker")
    })
}

/// Parse a listen address, accepting the `":53"` shorthand for all interfaces.
pub fn parse_listen_addr(s: &str) -> Result<SocketAddr, DnsError> {
    let full;
    let addr = if s.starts_with(':') {
        full = format!("0.0.0.0{s}");
        full.as_str()
    } else {
        s
    };
    addr.parse().map_err(|_| DnsError::InvalidAddress(s.to_string()))
}

/// Parse a comma separated list of upstream `host:port` nameservers.
pub fn parse_nameservers(s: &str) -> Result<Vec<SocketAddr>, DnsError> {
    s.split(',')
        .map(str::trim)
        .filter(|ns| !ns.is_empty())
        .map(|ns| ns.parse().map_err(|_| DnsError::InvalidAddress(ns.to_string())))
        .collect()
}
