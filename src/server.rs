//! DNS server setup and lifecycle management.

use std::sync::Arc;

use hickory_server::ServerFuture;
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::authority::{QueryEngine, ZoneSoa};
use crate::config::{Config, SharedTtl};
use crate::error::DnsError;
use crate::forward::Forwarder;
use crate::mux::{DnsMux, HandlerKind, RouteTable};
use crate::registry::{ServiceRegistry, SuffixRouter};

/// The UDP DNS server and the registry it answers from.
pub struct DnsServer {
    config: Arc<Config>,
    registry: Arc<ServiceRegistry>,
    table: Arc<RouteTable>,
    ttl: SharedTtl,
}

impl DnsServer {
    /// Create a server for the configured zone with an empty registry.
    pub fn new(config: Arc<Config>, ttl: SharedTtl) -> Self {
        let table = Arc::new(RouteTable::new());

        debug!(domain = %config.domain, "handling DNS requests for domain");
        table.insert(&format!("{}.", config.domain), HandlerKind::Authoritative);
        table.insert("in-addr.arpa.", HandlerKind::Reverse);
        table.insert(".", HandlerKind::Forward);

        let router: Arc<dyn SuffixRouter> = table.clone();
        let registry = Arc::new(ServiceRegistry::new(router));

        Self {
            config,
            registry,
            table,
            ttl,
        }
    }

    /// The registry backing this server.
    pub fn registry(&self) -> Arc<ServiceRegistry> {
        self.registry.clone()
    }

    /// Serve UDP until cancelled.
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), DnsError> {
        let engine = QueryEngine::new(
            self.registry.clone(),
            self.config.domain.clone(),
            self.ttl.clone(),
        );
        let soa = ZoneSoa::new(&self.config.domain, self.ttl.clone());
        let forwarder = Forwarder::new(
            self.config.nameservers.clone(),
            self.config.force_ttl,
            self.ttl.clone(),
            soa,
        );
        let mux = DnsMux::new(self.table.clone(), engine, forwarder);

        let socket = UdpSocket::bind(self.config.dns_addr).await?;
        info!(addr = %self.config.dns_addr, domain = %self.config.domain, "DNS UDP listening");

        let mut server = ServerFuture::new(mux);
        server.register_socket(socket);

        tokio::select! {
            _ = cancel.cancelled() => {
                info!("DNS server shutdown requested");
                Ok(())
            }
            result = server.block_until_done() => {
                result.map_err(Into::into)
            }
        }
    }
}
