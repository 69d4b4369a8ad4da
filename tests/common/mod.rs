//! Shared test infrastructure for DNS pipeline integration tests.

use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use hickory_proto::op::{Message, MessageType, OpCode, Query, ResponseCode};
use hickory_proto::rr::rdata::A;
use hickory_proto::rr::{DNSClass, Name, RData, Record, RecordType};
use hickory_proto::serialize::binary::{BinDecodable, BinDecoder, BinEncoder};
use hickory_server::authority::{MessageRequest, MessageResponse};
use hickory_server::server::{Protocol, Request, RequestHandler, ResponseHandler, ResponseInfo};
use tokio::net::UdpSocket;

use dnsdock::authority::{QueryEngine, ZoneSoa};
use dnsdock::forward::Forwarder;
use dnsdock::mux::{DnsMux, HandlerKind, RouteTable};
use dnsdock::registry::{Service, ServiceProvider, ServiceRegistry, SuffixRouter};
use dnsdock::{Domain, SharedTtl};

// --- TestResponseHandler ---

/// Captures the serialized DNS response for inspection in tests.
///
/// Implements `ResponseHandler` so it can be passed to
/// `DnsMux::handle_request()`. The response is serialized via
/// `MessageResponse::destructive_emit()` and stored as raw wire-format
/// bytes, which can then be parsed with `Message::from_vec()`.
#[derive(Clone)]
pub struct TestResponseHandler {
    buf: Arc<Mutex<Vec<u8>>>,
}

impl TestResponseHandler {
    pub fn new() -> Self {
        Self {
            buf: Arc::new(Mutex::new(Vec::with_capacity(512))),
        }
    }

    /// Parse the captured wire bytes into a `Message` for assertions.
    pub fn into_message(self) -> Message {
        let buf = self.buf.lock().unwrap();
        assert!(!buf.is_empty(), "no response was captured");
        Message::from_vec(&buf).expect("failed to parse captured DNS response")
    }
}

#[async_trait]
impl ResponseHandler for TestResponseHandler {
    async fn send_response<'a>(
        &mut self,
        response: MessageResponse<
            '_,
            'a,
            impl Iterator<Item = &'a Record> + Send + 'a,
            impl Iterator<Item = &'a Record> + Send + 'a,
            impl Iterator<Item = &'a Record> + Send + 'a,
            impl Iterator<Item = &'a Record> + Send + 'a,
        >,
    ) -> io::Result<ResponseInfo> {
        let mut buf = self.buf.lock().unwrap();
        buf.clear();
        let mut encoder = BinEncoder::new(&mut *buf);
        encoder.set_max_size(u16::MAX);
        let info = response
            .destructive_emit(&mut encoder)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        Ok(info)
    }
}

// --- Stack builder ---

/// A full query pipeline over an in-memory registry, no sockets involved.
pub struct TestStack {
    pub mux: DnsMux,
    pub registry: Arc<ServiceRegistry>,
    pub ttl: SharedTtl,
}

/// Build the mux the way `DnsServer::run` wires it, with the given zone and
/// upstreams.
pub fn build_stack(domain: &str, ttl: u32, upstreams: Vec<SocketAddr>, force_ttl: bool) -> TestStack {
    let domain = Domain::new(domain);
    let ttl = SharedTtl::new(ttl);

    let table = Arc::new(RouteTable::new());
    table.insert(&format!("{domain}."), HandlerKind::Authoritative);
    table.insert("in-addr.arpa.", HandlerKind::Reverse);
    table.insert(".", HandlerKind::Forward);

    let router: Arc<dyn SuffixRouter> = table.clone();
    let registry = Arc::new(ServiceRegistry::new(router));

    let engine = QueryEngine::new(registry.clone(), domain.clone(), ttl.clone());
    let soa = ZoneSoa::new(&domain, ttl.clone());
    let forwarder = Forwarder::new(upstreams, force_ttl, ttl.clone(), soa);

    TestStack {
        mux: DnsMux::new(table, engine, forwarder),
        registry,
        ttl,
    }
}

/// A service with one address and everything else defaulted.
pub fn make_service(name: &str, image: &str, ip: [u8; 4]) -> Service {
    Service {
        name: name.to_string(),
        image: image.to_string(),
        ips: vec![Ipv4Addr::from(ip)],
        ..Service::new(ServiceProvider::Docker)
    }
}

// --- Query/Request construction ---

/// Build wire-format bytes for a DNS query.
pub fn build_query_bytes(name: &str, record_type: RecordType, id: u16) -> Vec<u8> {
    let mut msg = Message::new();
    msg.set_id(id);
    msg.set_message_type(MessageType::Query);
    msg.set_op_code(OpCode::Query);
    msg.set_recursion_desired(true);
    let mut query = Query::new();
    query.set_name(Name::from_ascii(name).unwrap());
    query.set_query_type(record_type);
    query.set_query_class(DNSClass::IN);
    msg.add_query(query);
    msg.to_vec().unwrap()
}

/// Parse wire bytes into a MessageRequest.
pub fn parse_message_request(bytes: &[u8]) -> MessageRequest {
    let mut decoder = BinDecoder::new(bytes);
    MessageRequest::read(&mut decoder).expect("failed to parse MessageRequest")
}

/// Build a full `Request` as the UDP listener would.
pub fn build_request(name: &str, record_type: RecordType, id: u16) -> Request {
    let bytes = build_query_bytes(name, record_type, id);
    let msg = parse_message_request(&bytes);
    let src: SocketAddr = SocketAddr::from(([127, 0, 0, 1], 12345));
    Request::new(msg, src, Protocol::Udp)
}

/// Execute a query through the stack and return the parsed response.
pub async fn execute_query(
    stack: &TestStack,
    name: &str,
    record_type: RecordType,
    id: u16,
) -> Message {
    let request = build_request(name, record_type, id);
    let handler = TestResponseHandler::new();
    stack.mux.handle_request(&request, handler.clone()).await;
    handler.into_message()
}

// --- Stub upstream ---

/// Serve a single upstream response with the given answer address and TTL.
pub async fn spawn_upstream(answer: [u8; 4], answer_ttl: u32) -> SocketAddr {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = socket.local_addr().unwrap();

    tokio::spawn(async move {
        let mut buf = [0u8; 4096];
        let (len, peer) = socket.recv_from(&mut buf).await.unwrap();
        let request = Message::from_vec(&buf[..len]).unwrap();

        let mut response = Message::new();
        response.set_id(request.id());
        response.set_message_type(MessageType::Response);
        response.set_op_code(OpCode::Query);
        response.set_recursion_available(true);
        if let Some(query) = request.queries().first() {
            response.add_query(query.clone());
            response.add_answer(Record::from_rdata(
                query.name().clone(),
                answer_ttl,
                RData::A(A::from(Ipv4Addr::from(answer))),
            ));
        }

        let bytes = response.to_vec().unwrap();
        socket.send_to(&bytes, peer).await.unwrap();
    });

    addr
}

// --- Response helpers ---

/// Extract A record addresses from a response.
pub fn extract_a_ips(msg: &Message) -> Vec<Ipv4Addr> {
    msg.answers()
        .iter()
        .filter_map(|r| match r.data() {
            Some(RData::A(a)) => Some(Ipv4Addr::from(*a)),
            _ => None,
        })
        .collect()
}

/// Assert the authority section carries exactly one SOA for the zone.
pub fn assert_soa_authority(msg: &Message, min_ttl: u32) {
    let soas: Vec<_> = msg
        .name_servers()
        .iter()
        .filter_map(|r| match r.data() {
            Some(RData::SOA(soa)) => Some(soa),
            _ => None,
        })
        .collect();
    assert_eq!(soas.len(), 1, "expected exactly one SOA in authority");
    assert_eq!(soas[0].minimum(), min_ttl);
    assert!(soas[0].mname().to_string().starts_with("dnsdock."));
    assert!(soas[0].rname().to_string().starts_with("dnsdock.dnsdock."));
}

/// Assert response code.
pub fn assert_response_code(msg: &Message, expected: ResponseCode) {
    assert_eq!(
        msg.response_code(),
        expected,
        "expected {:?}, got {:?}",
        expected,
        msg.response_code()
    );
}
