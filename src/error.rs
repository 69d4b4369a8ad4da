//! Error types for dnsdock.

use std::net::SocketAddr;

use thiserror::Error;

/// Errors that can occur in the DNS server.
#[derive(Debug, Error)]
pub enum DnsError {
    /// IO error (network, file, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Docker daemon client error
    #[error("docker client error: {0}")]
    Docker(#[from] bollard::errors::Error),

    /// DNS protocol error
    #[error("DNS protocol error: {0}")]
    Proto(#[from] hickory_proto::error::ProtoError),

    /// Registry lookup miss
    #[error("no such service: {0}")]
    ServiceNotExist(String),

    /// A service without any IP address cannot be registered
    #[error("service '{0}' ignored: no IP provided")]
    NoIpProvided(String),

    /// Failed to parse an address
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// The docker event stream closed without an error
    #[error("docker event stream ended")]
    EventStreamEnded,

    /// An upstream nameserver did not answer in time
    #[error("upstream {0} timed out")]
    UpstreamTimeout(SocketAddr),

    /// An upstream nameserver answered with an unexpected message id
    #[error("upstream {0} answered with a mismatched message id")]
    UpstreamIdMismatch(SocketAddr),

    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    Config(String),
}
