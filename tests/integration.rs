use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::{Duration, Utc};
use courier_dispatch::api::rest::router;
use courier_dispatch::config::Config;
use courier_dispatch::models::courier::CourierAvailability;
use courier_dispatch::models::delivery::NewDelivery;
use courier_dispatch::models::order::{Order, OrderStatus, OrderType};
use courier_dispatch::ports::{DeliveryRepository, OrderRepository, Principal, Role};
use courier_dispatch::state::{AppState, Ports};
use courier_dispatch::store::memory::MemoryStore;
use courier_dispatch::tokens::HmacTokenVerifier;
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

const COURIER: u128 = 11;
const OTHER_COURIER: u128 = 12;
const PARTNER: u128 = 21;
const ORDER: u128 = 31;

struct TestApp {
    app: axum::Router,
    store: Arc<MemoryStore>,
    delivery_id: Uuid,
}

async fn setup() -> TestApp {
    let store = Arc::new(MemoryStore::new());
    let now = Utc::now();

    store.insert_order(Order {
        id: Uuid::from_u128(ORDER),
        partner_id: Uuid::from_u128(PARTNER),
        customer_id: Uuid::from_u128(41),
        order_type: OrderType::Delivery,
        status: OrderStatus::ReadyForPickup,
        dropoff: None,
        created_at: now,
        updated_at: now,
    });
    store.insert_availability(CourierAvailability {
        courier_id: Uuid::from_u128(COURIER),
        city: "berlin".to_string(),
        is_available: false,
        is_working: true,
        last_status_change: now - Duration::minutes(10),
    });

    let delivery = store
        .create_delivery(NewDelivery {
            order_id: Uuid::from_u128(ORDER),
            courier_id: Uuid::from_u128(COURIER),
            estimated_delivery_at: None,
        })
        .await
        .unwrap();

    let state = AppState::new(Config::default(), Ports::in_memory(store.clone()));

    TestApp {
        app: router(Arc::new(state)),
        store,
        delivery_id: delivery.id,
    }
}

fn token(user: u128, role: Role) -> String {
    HmacTokenVerifier::new(&Config::default().access_token_secret).issue(&Principal {
        user_id: Uuid::from_u128(user),
        role,
    })
}

fn courier_token() -> String {
    token(COURIER, Role::Courier)
}

fn request(method: &str, uri: &str, bearer: Option<&str>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(bearer) = bearer {
        builder = builder.header("authorization", format!("Bearer {bearer}"));
    }

    match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_string(&body).unwrap()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn body_string(response: axum::response::Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

#[tokio::test]
async fn health_returns_ok() {
    let test = setup().await;
    let response = test
        .app
        .oneshot(request("GET", "/health", None, None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["connected_couriers"], 0);
    assert_eq!(body["topics"]["tracking"], 0);
}

#[tokio::test]
async fn metrics_returns_prometheus_format() {
    let test = setup().await;
    let response = test
        .app
        .oneshot(request("GET", "/metrics", None, None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let content_type = response
        .headers()
        .get("content-type")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(content_type.contains("text/plain"));

    let body = body_string(response).await;
    assert!(body.contains("connected_couriers"));
}

#[tokio::test]
async fn accept_moves_delivery_to_accepted() {
    let test = setup().await;
    let uri = format!("/deliveries/{}/accept", test.delivery_id);
    let response = test
        .app
        .oneshot(request("POST", &uri, Some(&courier_token()), None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["status"], "accepted");
    assert!(body["accepted_at"].is_string());
}

#[tokio::test]
async fn skipping_to_delivered_returns_400() {
    let test = setup().await;
    let uri = format!("/deliveries/{}/status", test.delivery_id);
    let response = test
        .app
        .oneshot(request(
            "PATCH",
            &uri,
            Some(&courier_token()),
            Some(json!({ "status": "delivered" })),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body = body_json(response).await;
    assert_eq!(body["code"], "InvalidStatusTransition");
    assert_eq!(body["from"], "assigned");
    assert_eq!(body["to"], "delivered");
}

#[tokio::test]
async fn proof_before_delivery_returns_400() {
    let test = setup().await;
    let uri = format!("/deliveries/{}/status", test.delivery_id);
    let response = test
        .app
        .oneshot(request(
            "PATCH",
            &uri,
            Some(&courier_token()),
            Some(json!({ "status": "accepted", "proof_image_url": "proofs/early.jpg" })),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let delivery = test
        .store
        .find_delivery(test.delivery_id)
        .await
        .unwrap()
        .unwrap();
    assert!(delivery.proof_image_url.is_none());
}

#[tokio::test]
async fn full_walk_marks_order_delivered() {
    let test = setup().await;
    let uri = format!("/deliveries/{}/status", test.delivery_id);

    for status in ["accepted", "picked_up", "in_transit"] {
        let response = test
            .app
            .clone()
            .oneshot(request(
                "PATCH",
                &uri,
                Some(&courier_token()),
                Some(json!({ "status": status })),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    let response = test
        .app
        .oneshot(request(
            "PATCH",
            &uri,
            Some(&courier_token()),
            Some(json!({ "status": "delivered", "proof_image_url": "proofs/31.jpg" })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["proof_image_url"], "proofs/31.jpg");

    let order = test
        .store
        .find_order(Uuid::from_u128(ORDER))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(order.status, OrderStatus::Delivered);
}

#[tokio::test]
async fn other_courier_gets_403() {
    let test = setup().await;
    let uri = format!("/deliveries/{}/accept", test.delivery_id);
    let response = test
        .app
        .oneshot(request(
            "POST",
            &uri,
            Some(&token(OTHER_COURIER, Role::Courier)),
            None,
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn non_courier_role_gets_403() {
    let test = setup().await;
    let uri = format!("/deliveries/{}/accept", test.delivery_id);
    let response = test
        .app
        .oneshot(request("POST", &uri, Some(&token(PARTNER, Role::Partner)), None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn unknown_delivery_returns_404() {
    let test = setup().await;
    let uri = format!("/deliveries/{}/accept", Uuid::from_u128(999));
    let response = test
        .app
        .oneshot(request("POST", &uri, Some(&courier_token()), None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn missing_or_forged_token_returns_401() {
    let test = setup().await;
    let uri = format!("/deliveries/{}/accept", test.delivery_id);

    let response = test
        .app
        .clone()
        .oneshot(request("POST", &uri, None, None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let forged = courier_token().replace(
        &Uuid::from_u128(COURIER).simple().to_string(),
        &Uuid::from_u128(OTHER_COURIER).simple().to_string(),
    );
    let response = test
        .app
        .oneshot(request("POST", &uri, Some(&forged), None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn status_options_follow_current_status() {
    let test = setup().await;
    let uri = format!("/deliveries/{}/status-options", test.delivery_id);
    let response = test
        .app
        .oneshot(request("GET", &uri, Some(&courier_token()), None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["current"], "assigned");
    assert_eq!(body["options"], json!(["accepted"]));
}

#[tokio::test]
async fn availability_is_saved_for_the_caller() {
    let test = setup().await;
    let response = test
        .app
        .oneshot(request(
            "POST",
            "/courier/availability",
            Some(&token(OTHER_COURIER, Role::Courier)),
            Some(json!({ "is_available": true, "is_working": true })),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["courier_id"], Uuid::from_u128(OTHER_COURIER).to_string());
    assert_eq!(body["is_available"], true);
    assert_eq!(body["is_working"], true);
}

#[tokio::test]
async fn courier_lists_own_deliveries() {
    let test = setup().await;
    let response = test
        .app
        .clone()
        .oneshot(request(
            "GET",
            "/courier/deliveries?active_only=true",
            Some(&courier_token()),
            None,
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body.as_array().unwrap().len(), 1);
    assert_eq!(body[0]["id"], test.delivery_id.to_string());

    let response = test
        .app
        .oneshot(request(
            "GET",
            "/courier/deliveries",
            Some(&token(OTHER_COURIER, Role::Courier)),
            None,
        ))
        .await
        .unwrap();
    let body = body_json(response).await;
    assert!(body.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn refresh_availability_reflects_open_deliveries() {
    let test = setup().await;
    let response = test
        .app
        .clone()
        .oneshot(request(
            "POST",
            "/courier/refresh-availability",
            Some(&courier_token()),
            None,
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["is_available"], false);

    let response = test
        .app
        .oneshot(request(
            "POST",
            "/courier/refresh-availability",
            Some(&token(OTHER_COURIER, Role::Courier)),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
