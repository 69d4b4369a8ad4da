//! Admin HTTP surface over the service registry.
//!
//! A small REST facade for inspecting and overriding records:
//! `GET /services`, `GET/PUT/PATCH/DELETE /services/{id}` and
//! `PUT /set/ttl`. Entries written here carry the manual provider tag, so
//! the docker reconciler leaves them alone.

use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, put};
use axum::{Json, Router};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::{Config, SharedTtl};
use crate::error::DnsError;
use crate::registry::{Service, ServiceProvider, ServiceRegistry};

/// Shared state for the admin handlers.
#[derive(Clone)]
pub struct AdminState {
    registry: Arc<ServiceRegistry>,
    ttl: SharedTtl,
}

impl AdminState {
    /// Bundle the registry and the global TTL for the handlers.
    pub fn new(registry: Arc<ServiceRegistry>, ttl: SharedTtl) -> Self {
        Self { registry, ttl }
    }
}

/// The admin HTTP endpoint.
pub struct HttpServer {
    addr: SocketAddr,
    state: AdminState,
}

impl HttpServer {
    /// Create the admin server over the registry and the global TTL.
    pub fn new(config: &Config, registry: Arc<ServiceRegistry>, ttl: SharedTtl) -> Self {
        Self {
            addr: config.http_addr,
            state: AdminState::new(registry, ttl),
        }
    }

    /// Serve until cancelled.
    pub async fn run(self, cancel: CancellationToken) -> Result<(), DnsError> {
        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        info!(addr = %self.addr, "admin HTTP listening");

        axum::serve(listener, router(self.state))
            .with_graceful_shutdown(cancel.cancelled_owned())
            .await?;
        Ok(())
    }
}

/// Build the admin router.
pub fn router(state: AdminState) -> Router {
    Router::new()
        .route("/services", get(get_services))
        .route(
            "/services/:id",
            get(get_service)
                .put(put_service)
                .patch(patch_service)
                .delete(delete_service),
        )
        .route("/set/ttl", put(set_ttl))
        .with_state(state)
}

type HandlerError = (StatusCode, String);

async fn get_services(State(state): State<AdminState>) -> Json<HashMap<String, Service>> {
    Json(state.registry.get_all())
}

async fn get_service(
    State(state): State<AdminState>,
    Path(id): Path<String>,
) -> Result<Json<Service>, HandlerError> {
    state
        .registry
        .get(&id)
        .map(Json)
        .map_err(|e| (StatusCode::NOT_FOUND, e.to_string()))
}

/// Body of `PUT /services/{id}`.
#[derive(Debug, Deserialize)]
struct ServicePayload {
    #[serde(default)]
    name: String,
    #[serde(default)]
    image: String,
    ip: Option<Ipv4Addr>,
    #[serde(default)]
    aliases: Vec<String>,
    ttl: Option<i32>,
}

async fn put_service(
    State(state): State<AdminState>,
    Path(id): Path<String>,
    Json(payload): Json<ServicePayload>,
) -> Result<StatusCode, HandlerError> {
    if payload.name.is_empty() {
        return Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            "property \"name\" is required".to_string(),
        ));
    }
    if payload.image.is_empty() {
        return Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            "property \"image\" is required".to_string(),
        ));
    }
    let Some(ip) = payload.ip else {
        return Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            "property \"ip\" is required".to_string(),
        ));
    };

    let mut service = Service::new(ServiceProvider::Manual);
    service.name = payload.name;
    service.image = payload.image;
    service.ips = vec![ip];
    service.aliases = payload.aliases;
    if let Some(ttl) = payload.ttl {
        service.ttl = ttl;
    }

    debug!(id = %id, "adding service through admin API");
    state
        .registry
        .add(&id, service)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    Ok(StatusCode::OK)
}

/// Body of `PATCH /services/{id}`; absent fields keep their value.
#[derive(Debug, Deserialize)]
struct ServicePatch {
    ttl: Option<i32>,
    name: Option<String>,
    image: Option<String>,
    alias: Option<Vec<String>>,
}

async fn patch_service(
    State(state): State<AdminState>,
    Path(id): Path<String>,
    Json(patch): Json<ServicePatch>,
) -> Result<StatusCode, HandlerError> {
    let mut service = state
        .registry
        .get(&id)
        .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?;

    if let Some(ttl) = patch.ttl {
        service.ttl = ttl;
    }
    if let Some(name) = patch.name {
        service.name = name;
    }
    if let Some(image) = patch.image {
        service.image = image;
    }
    if let Some(aliases) = patch.alias {
        service.aliases = aliases;
    }
    // a patched record becomes a manual override and survives reconciliation
    service.provider = ServiceProvider::Manual;

    state
        .registry
        .add(&id, service)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    Ok(StatusCode::OK)
}

async fn delete_service(
    State(state): State<AdminState>,
    Path(id): Path<String>,
) -> Result<StatusCode, HandlerError> {
    state
        .registry
        .remove(&id)
        .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?;
    Ok(StatusCode::OK)
}

async fn set_ttl(State(state): State<AdminState>, Json(value): Json<u32>) -> StatusCode {
    debug!(ttl = value, "setting global TTL");
    state.ttl.set(value);
    StatusCode::OK
}
