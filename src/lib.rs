//! dnsdock - Automatic authoritative DNS for docker containers.
//!
//! This crate serves DNS records synthesized from the containers running on
//! a docker daemon. Containers resolve as `name.image.domain` (plus any
//! aliases); everything outside the authoritative domain is forwarded to the
//! configured upstream nameservers.
//!
//! ## Features
//!
//! - Real-time records driven by the docker event stream, with automatic
//!   reconnect and resync
//! - Prefix queries with `*` wildcards over synthesized names
//! - Per-container overrides through labels and environment variables
//! - Admin HTTP surface for manual records that survive container events
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                           dnsdock                               │
//! │                                                                 │
//! │  ┌──────────────────┐    ┌──────────────────┐                   │
//! │  │  Docker events   │───▶│ Service registry │◀── admin HTTP     │
//! │  │  (reconciler)    │    │   (in-memory)    │                   │
//! │  └──────────────────┘    └────────┬─────────┘                   │
//! │                                   │                             │
//! │                                   ▼                             │
//! │  ┌───────────┐           ┌──────────────────┐                   │
//! │  │ Upstream  │◀──────────│   DNS suffix     │◀── UDP :53        │
//! │  │ resolvers │  unmatched│   multiplexer    │                   │
//! │  └───────────┘           └──────────────────┘                   │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Name resolution
//!
//! ```text
//! redis-1.redis.docker
//!   → match services whose name/image/domain labels end the query
//!   → A record per match with the service (or global) TTL
//! ```

#![warn(missing_docs)]

pub mod authority;
pub mod config;
pub mod docker;
pub mod error;
pub mod forward;
pub mod http;
pub mod matcher;
pub mod metrics;
pub mod mux;
pub mod registry;
pub mod server;
pub mod telemetry;

// Re-export main types
pub use config::{Config, Domain, SharedTtl};
pub use docker::DockerManager;
pub use error::DnsError;
pub use http::HttpServer;
pub use registry::{Service, ServiceProvider, ServiceRegistry};
pub use server::DnsServer;
