//! Manual records written through the admin API must survive container
//! lifecycle events, and keep answering DNS queries.

mod common;

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use bollard::models::{EventActor, EventMessage};
use hickory_proto::op::ResponseCode;
use hickory_proto::rr::RecordType;
use serde_json::json;
use std::net::Ipv4Addr;
use tower::ServiceExt;

use dnsdock::http::{router, AdminState};
use dnsdock::{Config, DockerManager};

use common::*;

fn make_event(action: &str, id: &str) -> EventMessage {
    EventMessage {
        action: Some(action.to_string()),
        actor: Some(EventActor {
            id: Some(id.to_string()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_manual_record_survives_container_die() {
    let stack = build_stack("docker", 30, Vec::new(), false);
    let admin = router(AdminState::new(stack.registry.clone(), stack.ttl.clone()));

    // PUT /services/c1 {name: app, image: web, ip: 10.0.0.1}
    let response = admin
        .clone()
        .oneshot(
            Request::put("/services/c1")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(
                    json!({"name": "app", "image": "web", "ip": "10.0.0.1"}).to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // a `die` event for the same id must not remove the manual record
    let config = Arc::new(Config {
        // never connected in this test
        docker_host: "unix:///var/run/docker.sock".to_string(),
        ..Config::default()
    });
    let manager = DockerManager::new(config, stack.registry.clone()).unwrap();
    manager.dispatch(make_event("die", "c1")).await.unwrap();

    let response = admin
        .oneshot(Request::get("/services/c1").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // and DNS keeps answering for it
    let msg = execute_query(&stack, "app.web.docker.", RecordType::A, 1).await;
    assert_response_code(&msg, ResponseCode::NoError);
    assert_eq!(extract_a_ips(&msg), [Ipv4Addr::new(10, 0, 0, 1)]);
}

#[tokio::test]
async fn test_admin_ttl_change_affects_answers() {
    let stack = build_stack("docker", 30, Vec::new(), false);
    let admin = router(AdminState::new(stack.registry.clone(), stack.ttl.clone()));
    stack
        .registry
        .add("c1", make_service("app", "web", [10, 0, 0, 1]))
        .unwrap();

    let response = admin
        .oneshot(
            Request::put("/set/ttl")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from("120"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let msg = execute_query(&stack, "app.web.docker.", RecordType::A, 2).await;
    assert_eq!(msg.answers()[0].ttl(), 120);
}
