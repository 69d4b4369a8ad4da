//! dnsdock binary entry point.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use dnsdock::config::{docker_cert_dir, parse_listen_addr, parse_nameservers};
use dnsdock::{telemetry, Config, DnsServer, DockerManager, Domain, HttpServer, SharedTtl};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Automatic DNS for docker containers.
#[derive(Parser, Debug)]
#[command(name = "dnsdock")]
#[command(version, about, long_about = None)]
struct Args {
    /// Comma separated list of DNS server(s) for unmatched requests
    #[arg(long, default_value = "8.8.8.8:53")]
    nameserver: String,

    /// Listen DNS requests on this address
    #[arg(short = 'd', long, default_value = ":53")]
    dns: String,

    /// Listen HTTP requests on this address
    #[arg(short = 't', long, default_value = ":80")]
    http: String,

    /// Domain that is appended to all requests
    #[arg(long, default_value = "docker")]
    domain: String,

    /// Optional context before domain suffix
    #[arg(long, default_value = "")]
    environment: String,

    /// Docker daemon endpoint
    #[arg(long, env = "DOCKER_HOST", default_value = "unix:///var/run/docker.sock")]
    docker: String,

    /// Enable mTLS when connecting to docker
    #[arg(long)]
    tlsverify: bool,

    /// Path to CA certificate
    #[arg(long)]
    tlscacert: Option<PathBuf>,

    /// Path to client certificate
    #[arg(long)]
    tlscert: Option<PathBuf>,

    /// Path to client certificate private key
    #[arg(long)]
    tlskey: Option<PathBuf>,

    /// TTL for matched requests
    #[arg(long, default_value_t = 0)]
    ttl: u32,

    /// Rewrite the TTL of forwarded answers to the configured TTL
    #[arg(long)]
    force_ttl: bool,

    /// Automatically create an alias with just the container name
    #[arg(long = "alias")]
    create_alias: bool,

    /// Keep stopped containers registered
    #[arg(long)]
    all: bool,

    /// Verbose mode
    #[arg(short, long)]
    verbose: bool,

    /// Quiet mode
    #[arg(short, long)]
    quiet: bool,
}

impl Args {
    fn into_config(self) -> Result<Config, Box<dyn std::error::Error>> {
        let tls_verify = self.tlsverify
            || std::env::var("DOCKER_TLS_VERIFY")
                .map(|v| !v.is_empty())
                .unwrap_or(false);
        let cert_dir = docker_cert_dir();

        Ok(Config {
            nameservers: parse_nameservers(&self.nameserver)?,
            dns_addr: parse_listen_addr(&self.dns)?,
            http_addr: parse_listen_addr(&self.http)?,
            domain: Domain::new(&format!("{}.{}", self.environment, self.domain)),
            docker_host: self.docker,
            tls_verify,
            tls_ca_cert: self.tlscacert.unwrap_or_else(|| cert_dir.join("ca.pem")),
            tls_cert: self.tlscert.unwrap_or_else(|| cert_dir.join("cert.pem")),
            tls_key: self.tlskey.unwrap_or_else(|| cert_dir.join("key.pem")),
            ttl: self.ttl,
            force_ttl: self.force_ttl,
            create_alias: self.create_alias,
            all: self.all,
        })
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    telemetry::init(args.verbose, args.quiet);

    let config = Arc::new(args.into_config()?);
    info!(
        dns = %config.dns_addr,
        http = %config.http_addr,
        domain = %config.domain,
        docker = %config.docker_host,
        "starting dnsdock"
    );

    let ttl = SharedTtl::new(config.ttl);
    let server = DnsServer::new(config.clone(), ttl.clone());
    let registry = server.registry();

    // A daemon that is unreachable at startup is fatal; later stream
    // failures are retried with backoff.
    let docker = DockerManager::new(config.clone(), registry.clone())?;
    docker.ping().await?;

    let cancel = CancellationToken::new();

    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            signal_cancel.cancel();
        }
    });

    let docker_handle = tokio::spawn(docker.run(cancel.clone()));

    let http_server = HttpServer::new(&config, registry, ttl);
    let http_cancel = cancel.clone();
    let http_handle = tokio::spawn(async move {
        if let Err(e) = http_server.run(http_cancel).await {
            error!(error = %e, "admin HTTP server error");
        }
    });

    let result = server.run(cancel.clone()).await;
    cancel.cancel();

    let _ = docker_handle.await;
    let _ = http_handle.await;

    if let Err(e) = result {
        error!(error = %e, "DNS server error");
        return Err(e.into());
    }

    info!("dnsdock shutdown complete");
    Ok(())
}
