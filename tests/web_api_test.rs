#![cfg(feature = "web")]

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::{MockDevice, fast_settings};
use elios4you::client::Elios4YouClient;
use elios4you::config::Config;
use elios4you::coordinator::PollCoordinator;
use elios4you::web::{AppState, build_router};
use http_body_util::BodyExt;
use std::sync::Arc;
use tower::ServiceExt;

async fn app(device: &MockDevice) -> (axum::Router, Arc<Elios4YouClient>) {
    let mut config = Config::default();
    config.device = device.device_config();
    config.connection = fast_settings();
    let client = Arc::new(Elios4YouClient::from_config(&config));
    let coordinator = Arc::new(PollCoordinator::new(client.clone(), &config.polling));
    let state = AppState {
        config: Arc::new(config),
        client: client.clone(),
        coordinator,
    };
    (build_router(state), client)
}

async fn send(router: &axum::Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn refresh_then_read_sensors() {
    let device = MockDevice::start().await;
    let (router, _) = app(&device).await;

    let (status, json) = send(
        &router,
        Request::post("/api/refresh").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["ok"], true);

    let (_, json) = send(&router, Request::get("/api/sensors").body(Body::empty()).unwrap()).await;
    let sensors = json["sensors"].as_array().unwrap();
    let produced = sensors
        .iter()
        .find(|s| s["key"] == "produced_power")
        .unwrap();
    assert_eq!(produced["value"], 2.46);
    assert_eq!(produced["unit"], "kW");
    assert_eq!(produced["unique_id"], "elios4you_E4U123456_produced_power");
}

#[tokio::test]
async fn relay_endpoint_switches_device() {
    let device = MockDevice::start().await;
    let (router, client) = app(&device).await;

    let (status, json) = send(
        &router,
        Request::post("/api/relay")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"state":"on"}"#))
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["ok"], true);
    assert_eq!(json["relay_state"], 1);
    assert!(client.data().relay_is_on());

    let (_, json) = send(&router, Request::get("/api/sensors").body(Body::empty()).unwrap()).await;
    assert_eq!(json["relay"]["is_on"], true);
}
