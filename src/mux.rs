//! UDP request multiplexing by longest DNS suffix.
//!
//! Queries route to the authoritative handler, the reverse handler, or the
//! forwarder depending on the longest registered suffix of the question
//! name. Alias suffixes come and go at runtime as the registry drives the
//! [`SuffixRouter`] hooks.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use hickory_proto::op::{Header, ResponseCode};
use hickory_server::authority::MessageResponseBuilder;
use hickory_server::server::{Request, RequestHandler, ResponseHandler, ResponseInfo};
use parking_lot::RwLock;
use tracing::{debug, error};

use crate::authority::{QueryEngine, Reply};
use crate::forward::Forwarder;
use crate::metrics::{self, QueryOutcome, Timer};
use crate::registry::SuffixRouter;

/// Which handler owns a suffix.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HandlerKind {
    /// Synthesize answers from the registry.
    Authoritative,
    /// Reverse (`in-addr.arpa`) lookups.
    Reverse,
    /// Proxy to the upstream nameservers.
    Forward,
}

/// Suffix → handler routing table.
///
/// Resolution walks the query name dropping leftmost labels until a
/// registered suffix matches, so the longest suffix always wins; the `"."`
/// entry is the catch-all. Mutations are short and in-memory, safe to call
/// from under the registry write lock.
pub struct RouteTable {
    routes: RwLock<HashMap<String, HandlerKind>>,
}

impl RouteTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self {
            routes: RwLock::new(HashMap::new()),
        }
    }

    /// Route `suffix` to `kind`.
    pub fn insert(&self, suffix: &str, kind: HandlerKind) {
        self.routes.write().insert(normalize_suffix(suffix), kind);
    }

    /// Drop the route for `suffix`.
    pub fn remove(&self, suffix: &str) {
        self.routes.write().remove(&normalize_suffix(suffix));
    }

    /// Find the handler for an absolute, lowercase query name.
    pub fn resolve(&self, qname: &str) -> HandlerKind {
        let routes = self.routes.read();

        let mut name = qname;
        loop {
            if let Some(kind) = routes.get(name) {
                return *kind;
            }
            match name.split_once('.') {
                Some((_, rest)) if !rest.is_empty() => name = rest,
                _ => break,
            }
        }
        routes.get(".").copied().unwrap_or(HandlerKind::Forward)
    }
}

impl Default for RouteTable {
    fn default() -> Self {
        Self::new()
    }
}

impl SuffixRouter for RouteTable {
    fn register_suffix(&self, suffix: &str) {
        self.insert(suffix, HandlerKind::Authoritative);
    }

    fn unregister_suffix(&self, suffix: &str) {
        self.remove(suffix);
    }
}

/// Lowercase and make absolute.
fn normalize_suffix(suffix: &str) -> String {
    let suffix = suffix.to_lowercase();
    if suffix.ends_with('.') {
        suffix
    } else {
        format!("{suffix}.")
    }
}

/// The DNS request handler: routes each question through the table and
/// serializes the resulting [`Reply`] back to the client.
pub struct DnsMux {
    table: Arc<RouteTable>,
    engine: QueryEngine,
    forwarder: Forwarder,
}

impl DnsMux {
    /// Assemble the mux from its routing table and handlers.
    pub fn new(table: Arc<RouteTable>, engine: QueryEngine, forwarder: Forwarder) -> Self {
        Self {
            table,
            engine,
            forwarder,
        }
    }

    async fn reply_for(&self, request: &Request) -> (Reply, bool) {
        let query = request.query();

        let qname = normalize_suffix(&query.name().to_string());
        let qtype = query.query_type();
        let name = query.original().name().clone();

        debug!(
            query = %qname,
            qtype = ?qtype,
            remote = %request.src(),
            "DNS request"
        );

        match self.table.resolve(&qname) {
            HandlerKind::Authoritative => (self.engine.authoritative(&name, qtype), false),
            HandlerKind::Reverse => match self.engine.reverse(&name, qtype) {
                Some(reply) => (reply, false),
                // reverse queries for unknown addresses are forwarded
                None => (
                    self.forwarder
                        .forward(request.id(), query.original(), request.header().recursion_desired())
                        .await,
                    true,
                ),
            },
            HandlerKind::Forward => (
                self.forwarder
                    .forward(request.id(), query.original(), request.header().recursion_desired())
                    .await,
                true,
            ),
        }
    }
}

#[async_trait]
impl RequestHandler for DnsMux {
    async fn handle_request<R: ResponseHandler>(
        &self,
        request: &Request,
        mut response_handle: R,
    ) -> ResponseInfo {
        let timer = Timer::start();
        let qtype = format!("{:?}", request.query().query_type());

        let (reply, forwarded) = self.reply_for(request).await;

        let outcome = match reply.rcode {
            ResponseCode::Refused => QueryOutcome::Refused,
            ResponseCode::NXDomain => QueryOutcome::NxDomain,
            _ if forwarded => QueryOutcome::Forwarded,
            _ if reply.answers.is_empty() => QueryOutcome::NoData,
            _ => QueryOutcome::Answered,
        };
        metrics::record_query(&qtype, outcome, timer.elapsed());

        let mut header = Header::response_from_request(request.header());
        header.set_response_code(reply.rcode);
        header.set_authoritative(reply.authoritative);
        header.set_recursion_available(reply.recursion_available);
        header.set_truncated(reply.truncated);

        let builder = MessageResponseBuilder::from_message_request(request);
        let response = builder.build(
            header,
            reply.answers.iter(),
            reply.name_servers.iter(),
            std::iter::empty(),
            reply.additionals.iter(),
        );

        match response_handle.send_response(response).await {
            Ok(info) => info,
            Err(e) => {
                error!(error = %e, "unable to write response");
                let mut header = Header::response_from_request(request.header());
                header.set_response_code(ResponseCode::ServFail);
                header.into()
            }
        }
    }
}
