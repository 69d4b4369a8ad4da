//! Stub forwarding of non-authoritative queries to upstream resolvers.

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use hickory_proto::op::{Message, MessageType, OpCode, Query, ResponseCode};
use tokio::net::UdpSocket;
use tracing::{debug, error, warn};

use crate::authority::{Reply, ZoneSoa};
use crate::config::SharedTtl;
use crate::error::DnsError;
use crate::metrics;

/// Per-exchange timeout for a single upstream attempt.
const EXCHANGE_TIMEOUT: Duration = Duration::from_secs(5);

/// Forwards queries to configured upstreams, first answer wins.
pub struct Forwarder {
    nameservers: Vec<SocketAddr>,
    force_ttl: bool,
    ttl: SharedTtl,
    soa: ZoneSoa,
}

impl Forwarder {
    /// Create a forwarder over the ordered upstream list.
    pub fn new(nameservers: Vec<SocketAddr>, force_ttl: bool, ttl: SharedTtl, soa: ZoneSoa) -> Self {
        Self {
            nameservers,
            force_ttl,
            ttl,
            soa,
        }
    }

    /// Try each upstream in order and proxy the first response back.
    ///
    /// When every upstream fails the client gets REFUSED with the zone SOA
    /// in the authority section.
    pub async fn forward(&self, id: u16, query: &Query, recursion_desired: bool) -> Reply {
        debug!(query = %query.name(), "using DNS forwarding for query");

        let mut message = Message::new();
        message.set_id(id);
        message.set_message_type(MessageType::Query);
        message.set_op_code(OpCode::Query);
        message.set_recursion_desired(recursion_desired);
        message.add_query(query.clone());

        let bytes = match message.to_vec() {
            Ok(bytes) => bytes,
            Err(e) => {
                error!(error = %e, "unable to encode forwarded query");
                return self.refused();
            }
        };

        for upstream in &self.nameservers {
            debug!(upstream = %upstream, "using nameserver");
            match self.exchange(*upstream, &bytes, id).await {
                Ok(mut response) => {
                    if self.force_ttl {
                        debug!("forcing TTL value of the forwarded response");
                        let ttl = self.ttl.get();
                        let mut answers = response.take_answers();
                        for record in &mut answers {
                            record.set_ttl(ttl);
                        }
                        response.insert_answers(answers);
                    }
                    metrics::record_forward(true);
                    return Reply::from_upstream(response);
                }
                Err(e) => {
                    debug!(upstream = %upstream, error = %e, "DNS forwarding failed: trying next nameserver");
                }
            }
        }

        warn!("DNS forwarding failed: no more nameservers to try");
        metrics::record_forward(false);
        self.refused()
    }

    fn refused(&self) -> Reply {
        let mut reply = Reply::skeleton();
        reply.recursion_available = false;
        reply.rcode = ResponseCode::Refused;
        reply.name_servers.push(self.soa.record());
        reply
    }

    async fn exchange(
        &self,
        upstream: SocketAddr,
        query: &[u8],
        id: u16,
    ) -> Result<Message, DnsError> {
        let bind: SocketAddr = if upstream.is_ipv6() {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        };
        let socket = UdpSocket::bind(bind).await?;
        socket.connect(upstream).await?;
        socket.send(query).await?;

        let mut buf = [0u8; 4096];
        let len = tokio::time::timeout(EXCHANGE_TIMEOUT, socket.recv(&mut buf))
            .await
            .map_err(|_| DnsError::UpstreamTimeout(upstream))??;

        let response = Message::from_vec(&buf[..len])?;
        if response.id() != id {
            return Err(DnsError::UpstreamIdMismatch(upstream));
        }
        Ok(response)
    }
}

impl Reply {
    /// Turn an upstream response into a reply for the client, keeping all
    /// sections and header flags.
    pub fn from_upstream(mut message: Message) -> Self {
        Self {
            rcode: message.response_code(),
            authoritative: message.authoritative(),
            recursion_available: message.recursion_available(),
            truncated: message.truncated(),
            answers: message.take_answers(),
            name_servers: message.take_name_servers(),
            additionals: message.take_additionals(),
        }
    }
}
