//! Authoritative answer synthesis from registry state.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use hickory_proto::op::ResponseCode;
use hickory_proto::rr::rdata::{A, MX, PTR, SOA};
use hickory_proto::rr::{DNSClass, Name, RData, Record, RecordType};
use tracing::{debug, warn};

use crate::config::{Domain, SharedTtl};
use crate::matcher::is_prefix_query;
use crate::registry::{Service, ServiceRegistry};

/// A reply under construction, independent of the wire machinery.
///
/// The mux turns this into a `MessageResponse` against the original request.
#[derive(Debug)]
pub struct Reply {
    /// Response code.
    pub rcode: ResponseCode,
    /// Authoritative-answer flag.
    pub authoritative: bool,
    /// Recursion-available flag.
    pub recursion_available: bool,
    /// Truncated flag (only ever set on proxied replies).
    pub truncated: bool,
    /// Answer section.
    pub answers: Vec<Record>,
    /// Authority section.
    pub name_servers: Vec<Record>,
    /// Additional section.
    pub additionals: Vec<Record>,
}

impl Reply {
    /// An empty NOERROR reply advertising recursion, the skeleton of every
    /// locally synthesized answer. Unknown names are forwarded upstream, so
    /// recursion is effectively available.
    pub fn skeleton() -> Self {
        Self {
            rcode: ResponseCode::NoError,
            authoritative: false,
            recursion_available: true,
            truncated: false,
            answers: Vec::new(),
            name_servers: Vec::new(),
            additionals: Vec::new(),
        }
    }
}

/// Synthesizes the SOA record for the authoritative zone.
///
/// The TTL and minimum TTL come from the shared global TTL so negative
/// results are not cached longer than configured. The remaining timers are
/// fixed (skydns defaults); they have no other use here.
#[derive(Clone, Debug)]
pub struct ZoneSoa {
    zone: String,
    ttl: SharedTtl,
}

impl ZoneSoa {
    /// Create the SOA synthesizer for `domain`.
    pub fn new(domain: &Domain, ttl: SharedTtl) -> Self {
        Self {
            zone: format!("{domain}."),
            ttl,
        }
    }

    /// Build the SOA record with a serial truncated to the current hour.
    pub fn record(&self) -> Record {
        let ttl = self.ttl.get();
        let origin = Name::from_ascii(&self.zone).unwrap_or_else(|_| Name::root());
        let ns = Name::from_ascii(format!("dnsdock.{}", self.zone)).unwrap_or_else(|_| Name::root());
        let mbox =
            Name::from_ascii(format!("dnsdock.dnsdock.{}", self.zone)).unwrap_or_else(|_| Name::root());

        let soa = SOA::new(ns, mbox, hour_serial(), 28800, 7200, 604800, ttl);
        let mut record = Record::from_rdata(origin, ttl, RData::SOA(soa));
        record.set_dns_class(DNSClass::IN);
        record
    }
}

fn hour_serial() -> u32 {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    (secs - secs % 3600) as u32
}

/// Builds authoritative and reverse replies from the service registry.
pub struct QueryEngine {
    registry: Arc<ServiceRegistry>,
    domain: Domain,
    ttl: SharedTtl,
    soa: ZoneSoa,
}

impl QueryEngine {
    /// Create a query engine over `registry` for the given zone.
    pub fn new(registry: Arc<ServiceRegistry>, domain: Domain, ttl: SharedTtl) -> Self {
        let soa = ZoneSoa::new(&domain, ttl.clone());
        Self {
            registry,
            domain,
            ttl,
            soa,
        }
    }

    /// Reply for a message without a question: empty answer, SOA authority.
    pub fn no_question(&self) -> Reply {
        let mut reply = Reply::skeleton();
        reply.name_servers.push(self.soa.record());
        reply
    }

    /// Answer a query under the authoritative zone (or an alias).
    pub fn authoritative(&self, name: &Name, qtype: RecordType) -> Reply {
        let mut reply = Reply::skeleton();

        if qtype == RecordType::SOA {
            reply.answers.push(self.soa.record());
            return reply;
        }

        let query = name.to_string();
        let query = query.trim_end_matches('.').to_lowercase();
        let labels: Vec<&str> = if query.is_empty() {
            Vec::new()
        } else {
            query.split('.').collect()
        };

        let mut answers = Vec::new();
        let mut unsupported_qtype_hit = false;
        self.registry.for_each(|_, service| {
            let hits = self.match_count(&labels, service);
            if hits == 0 {
                return;
            }
            debug!(query = %query, "DNS record found for query");
            match qtype {
                RecordType::A => {
                    for _ in 0..hits {
                        if let Some(record) = self.make_a(name, service) {
                            answers.push(record);
                        }
                    }
                }
                RecordType::MX => {
                    for _ in 0..hits {
                        answers.push(self.make_mx(name, service));
                    }
                }
                _ => unsupported_qtype_hit = true,
            }
        });

        if unsupported_qtype_hit {
            // this query type isn't supported, but we do have a record with
            // this name. Per RFC 4074 sec. 3, return an empty NOERROR reply.
            reply.authoritative = true;
            reply.name_servers.push(self.soa.record());
            return reply;
        }

        reply.answers = answers;
        if reply.answers.is_empty() {
            debug!(query = %query, "no DNS record found for query");
            reply.rcode = ResponseCode::NXDomain;
            reply.name_servers.push(self.soa.record());
        }
        reply
    }

    /// Answer a reverse (`in-addr.arpa`) query.
    ///
    /// Returns `None` when no registered service owns the address, in which
    /// case the request is forwarded instead of answered locally.
    pub fn reverse(&self, name: &Name, qtype: RecordType) -> Option<Reply> {
        let query = name.to_string();
        let query = query.trim_end_matches('.').to_lowercase();
        let address = reverse_address(&query);

        let mut any_match = false;
        let mut answers = Vec::new();
        self.registry.for_each(|_, service| {
            let canonical = match service.ips.first() {
                Some(ip) => ip.to_string(),
                None => return,
            };
            if canonical != address {
                return;
            }
            any_match = true;

            if qtype == RecordType::PTR {
                let ttl = self.record_ttl(service);
                for domain in self.domain_list(service) {
                    if let Ok(target) = Name::from_ascii(&domain) {
                        let mut record = Record::from_rdata(name.clone(), ttl, RData::PTR(PTR(target)));
                        record.set_dns_class(DNSClass::IN);
                        answers.push(record);
                    }
                }
            }
        });

        if qtype != RecordType::PTR {
            if !any_match {
                return None;
            }
            // name exists but not with this type, same policy as forward zone
            let mut reply = Reply::skeleton();
            reply.name_servers.push(self.soa.record());
            return Some(reply);
        }

        if answers.is_empty() {
            return None;
        }
        let mut reply = Reply::skeleton();
        reply.answers = answers;
        Some(reply)
    }

    /// TTL for a service record, falling back to the global TTL.
    fn record_ttl(&self, service: &Service) -> u32 {
        if service.ttl >= 0 {
            service.ttl as u32
        } else {
            self.ttl.get()
        }
    }

    /// How many times `query` matches this service: once for the synthesized
    /// candidate name, plus once per matching alias.
    fn match_count(&self, query: &[&str], service: &Service) -> usize {
        let name = service.name.to_lowercase();

        let mut candidate: Vec<&str> = Vec::new();
        if !name.is_empty() {
            candidate.extend(name.split('.'));
        }
        if !service.image.is_empty() {
            candidate.extend(service.image.split('.'));
        }
        candidate.extend(self.domain.labels().iter().map(String::as_str));

        let mut count = usize::from(is_prefix_query(query, &candidate));
        for alias in &service.aliases {
            let alias_labels: Vec<&str> = alias.split('.').collect();
            if is_prefix_query(query, &alias_labels) {
                count += 1;
            }
        }
        count
    }

    /// The absolute names a PTR answer enumerates for a service.
    fn domain_list(&self, service: &Service) -> Vec<String> {
        let mut domains = Vec::new();
        if service.image.is_empty() {
            domains.push(format!("{}.{}.", service.name, self.domain));
        } else {
            let image_domain = format!("{}.{}.", service.image, self.domain);
            domains.push(format!("{}.{}", service.name, image_domain));
            domains.push(image_domain);
        }
        for alias in &service.aliases {
            domains.push(format!("{alias}."));
        }
        domains
    }

    fn make_a(&self, name: &Name, service: &Service) -> Option<Record> {
        let Some(ip) = service.ips.first() else {
            warn!(name = %service.name, "no valid IP address found for container");
            return None;
        };
        if service.ips.len() > 1 {
            warn!(
                name = %service.name,
                "multiple IP addresses found for container, only the first will be used"
            );
        }

        let mut record = Record::from_rdata(
            name.clone(),
            self.record_ttl(service),
            RData::A(A::from(*ip)),
        );
        record.set_dns_class(DNSClass::IN);
        Some(record)
    }

    fn make_mx(&self, name: &Name, service: &Service) -> Record {
        let mut record = Record::from_rdata(
            name.clone(),
            self.record_ttl(service),
            RData::MX(MX::new(0, name.clone())),
        );
        record.set_dns_class(DNSClass::IN);
        record
    }
}

/// Rebuild a dotted IPv4 address from a reverse query name.
fn reverse_address(query: &str) -> String {
    let stripped = query.strip_suffix(".in-addr.arpa").unwrap_or(query);
    let mut labels: Vec<&str> = stripped.split('.').collect();
    labels.reverse();
    labels.join(".")
}
