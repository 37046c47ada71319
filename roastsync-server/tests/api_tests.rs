//! Integration tests for the roastsync-server HTTP API
//!
//! Each test drives the router against a throw-away database:
//! - Roast upsert: stock deduction, stale writes, idempotent replay, gzip
//! - Roast reads: conditional GET, listing
//! - Blends, references, task history and caller identity

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use chrono::{DateTime, Utc};
use flate2::write::GzEncoder;
use flate2::Compression;
use roastsync_common::config::anonymous_user;
use roastsync_common::db::{init_database, Coffee, ProductionTask, TaskType};
use roastsync_common::events::NotificationHub;
use roastsync_server::db::{coffees, tasks};
use roastsync_server::scheduler::TASK_EVENT;
use roastsync_server::{build_router, AppState};
use rust_decimal::Decimal;
use serde_json::{json, Value};
use std::io::Write;
use std::str::FromStr;
use tempfile::TempDir;
use tower::util::ServiceExt; // for `oneshot` method
use uuid::Uuid;

const ROAST_ID: &str = "6ba7b810-9dad-11d1-80b4-00c04fd430c8";

struct TestApp {
    state: AppState,
    _dir: TempDir,
}

impl TestApp {
    async fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let pool = init_database(&dir.path().join("roastsync.db")).await.unwrap();
        let state = AppState::new(
            pool,
            NotificationHub::new(16),
            anonymous_user(),
            Decimal::from(1000),
            dir.path().join("profiles"),
        );
        Self { state, _dir: dir }
    }

    fn router(&self) -> Router {
        build_router(self.state.clone())
    }

    async fn send(&self, request: Request<Body>) -> (StatusCode, Vec<u8>) {
        let response = self.router().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("Should read body");
        (status, bytes.to_vec())
    }

    async fn send_json(&self, request: Request<Body>) -> (StatusCode, Value) {
        let (status, bytes) = self.send(request).await;
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).expect("Should parse JSON")
        };
        (status, body)
    }

    async fn add_coffee(&self, hr_id: &str, stock: &str) -> Uuid {
        let id = Uuid::new_v4();
        let mut conn = self.state.db.acquire().await.unwrap();
        coffees::insert(
            &mut conn,
            &Coffee {
                id,
                hr_id: hr_id.into(),
                label: format!("Coffee {}", hr_id),
                origin: None,
                region: None,
                variety: None,
                processing: None,
                stock_weight_kg: Decimal::from_str(stock).unwrap(),
                created_at: Utc::now(),
            },
        )
        .await
        .unwrap();
        id
    }

    async fn stock(&self, hr_id: &str) -> Decimal {
        let mut conn = self.state.db.acquire().await.unwrap();
        coffees::get_by_hr_id(&mut conn, hr_id)
            .await
            .unwrap()
            .expect("coffee exists")
            .stock_weight_kg
    }
}

fn json_request(method: &str, uri: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn empty_request(method: &str, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

fn upsert_request(body: &Value, key: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/api/v1/aroast")
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(key) = key {
        builder = builder.header("Idempotency-Key", key);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn kg(text: &str) -> Decimal {
    Decimal::from_str(text).unwrap()
}

// =============================================================================
// Health
// =============================================================================

#[tokio::test]
async fn test_health_endpoint() {
    let app = TestApp::new().await;
    let (status, body) = app.send_json(empty_request("GET", "/health")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["module"], "roastsync-server");
    assert!(body["version"].is_string());
}

// =============================================================================
// Roast upsert
// =============================================================================

#[tokio::test]
async fn test_stock_deducted_once_and_restored_on_delete() {
    let app = TestApp::new().await;
    app.add_coffee("C1001", "10").await;

    let create = json!({
        "roast_id": ROAST_ID,
        "date": "2024-05-01T08:00:00Z",
        "modified_at": "2024-05-01T08:30:00Z",
        "amount": 2.5,
        "coffee": "C1001",
        "label": "Morning"
    });
    let (status, body) = app.send_json(upsert_request(&create, None)).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["success"], true);
    assert_eq!(body["result"]["roast_id"], ROAST_ID);
    assert_eq!(body["result"]["message"], "Roast saved successfully");
    assert_eq!(app.stock("C1001").await, kg("7.5"));

    // Older client copy loses
    let stale = json!({
        "roast_id": ROAST_ID,
        "date": "2024-05-01T08:00:00Z",
        "modified_at": "2024-05-01T08:00:00Z",
        "amount": 4.0,
        "coffee": "C1001"
    });
    let (status, body) = app.send_json(upsert_request(&stale, None)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "CONFLICT");
    assert!(body["server_modified_at"].is_string());
    assert_eq!(app.stock("C1001").await, kg("7.5"));

    // Same payload again replays without touching stock
    let (status, _) = app.send_json(upsert_request(&create, None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(app.stock("C1001").await, kg("7.5"));

    let (status, _) = app
        .send(empty_request("DELETE", &format!("/api/v1/roasts/{}", ROAST_ID)))
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert_eq!(app.stock("C1001").await, kg("10"));

    let (status, _) = app
        .send(empty_request("GET", &format!("/api/v1/roasts/{}", ROAST_ID)))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_blend_roast_deducts_by_recipe() {
    let app = TestApp::new().await;
    let a = app.add_coffee("C1", "10").await;
    let b = app.add_coffee("C2", "10").await;

    let (status, blend) = app
        .send_json(json_request(
            "POST",
            "/api/v1/blends",
            &json!({
                "name": "House",
                "recipe": [
                    {"coffee_id": a.to_string(), "percentage": 60},
                    {"coffee_id": b.to_string(), "percentage": 40}
                ]
            }),
        ))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let available = blend["data"]["available_weight_kg"].as_f64().unwrap();
    assert!((available - 16.667).abs() < 1e-9, "{}", available);
    let blend_id = blend["data"]["id"].as_str().unwrap().to_string();

    let roast = json!({
        "roast_id": ROAST_ID,
        "date": "2024-05-02T09:00:00Z",
        "amount": 5.0,
        "blend": blend_id
    });
    let (status, body) = app.send_json(upsert_request(&roast, None)).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["result"]["blend_id"], blend_id.as_str());
    assert_eq!(body["data"]["deducted_components"].as_array().unwrap().len(), 2);
    assert_eq!(app.stock("C1").await, kg("7"));
    assert_eq!(app.stock("C2").await, kg("8"));

    // A blend with roasts cannot be deleted
    let (status, _) = app
        .send_json(empty_request("DELETE", &format!("/api/v1/blends/{}", blend_id)))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_idempotent_replay_is_byte_identical() {
    let app = TestApp::new().await;
    app.add_coffee("C1001", "10").await;
    let create = json!({
        "roast_id": ROAST_ID,
        "date": "2024-05-01T08:00:00Z",
        "amount": 1.0,
        "coffee": "C1001"
    });

    let (first_status, first) = app.send(upsert_request(&create, Some("retry-42"))).await;
    let (second_status, second) = app.send(upsert_request(&create, Some("retry-42"))).await;

    assert_eq!(first_status, StatusCode::CREATED);
    assert_eq!(second_status, StatusCode::CREATED);
    assert_eq!(first, second);
    assert_eq!(app.stock("C1001").await, kg("9"));
}

#[tokio::test]
async fn test_gzip_body_accepted() {
    let app = TestApp::new().await;
    let payload = json!({
        "roast_id": ROAST_ID,
        "date": "2024-05-01T08:00:00Z",
        "amount": 0.5,
        "coffee": "C2002"
    });
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(payload.to_string().as_bytes()).unwrap();
    let compressed = encoder.finish().unwrap();

    let request = Request::builder()
        .method("POST")
        .uri("/api/v1/roasts")
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::CONTENT_ENCODING, "gzip")
        .body(Body::from(compressed))
        .unwrap();
    let (status, body) = app.send_json(request).await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["roast_id"], ROAST_ID);
    // Unknown coffee is created with the placeholder stock
    assert_eq!(app.stock("C2002").await, kg("999.5"));
}

#[tokio::test]
async fn test_malformed_payload_is_bad_request() {
    let app = TestApp::new().await;
    let request = Request::builder()
        .method("POST")
        .uri("/api/v1/aroast")
        .body(Body::from("{not json"))
        .unwrap();
    let (status, body) = app.send_json(request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
}

// =============================================================================
// Roast reads
// =============================================================================

#[tokio::test]
async fn test_conditional_get() {
    let app = TestApp::new().await;
    let modified = "2024-05-01T08:30:00Z";
    let create = json!({
        "roast_id": ROAST_ID,
        "date": "2024-05-01T08:00:00Z",
        "modified_at": modified
    });
    let (status, _) = app.send(upsert_request(&create, None)).await;
    assert_eq!(status, StatusCode::CREATED);

    let server_ms = DateTime::parse_from_rfc3339(modified).unwrap().timestamp_millis();
    let uri = format!("/api/v1/roasts/{}?modified_at={}", ROAST_ID, server_ms);
    let (status, bytes) = app.send(empty_request("GET", &uri)).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert!(bytes.is_empty());

    let uri = format!("/api/v1/roasts/{}?modified_at={}", ROAST_ID, server_ms - 1);
    let (status, body) = app.send_json(empty_request("GET", &uri)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["roast_id"], ROAST_ID);
    assert_eq!(body["result"]["roast_id"], ROAST_ID);

    let (status, _) = app.send(empty_request("GET", "/api/v1/roasts/not-an-id")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_list_and_patch() {
    let app = TestApp::new().await;
    for (id, date) in [
        (ROAST_ID, "2024-05-01T08:00:00Z"),
        ("3f2504e0-4f89-11d3-9a0c-0305e82c3301", "2024-05-03T08:00:00Z"),
    ] {
        let (status, _) = app
            .send(upsert_request(&json!({"roast_id": id, "date": date}), None))
            .await;
        assert_eq!(status, StatusCode::CREATED);
    }

    let (status, body) = app.send_json(empty_request("GET", "/api/v1/roasts?limit=10")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["total"], 2);
    assert_eq!(body["data"]["items"][0]["roast_id"], "3f2504e0-4f89-11d3-9a0c-0305e82c3301");

    let (status, body) = app
        .send_json(empty_request("GET", "/api/v1/roasts?date_to=2024-05-01"))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["total"], 1);

    let (status, _) = app.send(empty_request("GET", "/api/v1/roasts?limit=0")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = app
        .send_json(json_request(
            "PATCH",
            &format!("/api/v1/roasts/{}", ROAST_ID),
            &json!({"cupping_verdict": "good", "in_quality_control": true}),
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["cupping_verdict"], "good");
    assert_eq!(body["data"]["in_quality_control"], true);

    let (_, body) = app
        .send_json(empty_request("GET", "/api/v1/roasts?in_quality_control=true"))
        .await;
    assert_eq!(body["data"]["total"], 1);
}

// =============================================================================
// Blends
// =============================================================================

#[tokio::test]
async fn test_blend_recipe_validation() {
    let app = TestApp::new().await;
    let a = app.add_coffee("C1", "10").await;
    let b = app.add_coffee("C2", "10").await;

    let invalid = [
        json!([{"coffee_id": a, "percentage": 60}, {"coffee_id": b, "percentage": 30}]),
        json!([{"coffee_id": a, "percentage": 50}, {"coffee_id": a, "percentage": 50}]),
        json!([{"coffee_id": a, "percentage": 100}]),
        json!([{"coffee_id": a, "percentage": 50}, {"coffee_id": Uuid::new_v4(), "percentage": 50}]),
    ];
    for recipe in invalid {
        let (status, body) = app
            .send_json(json_request(
                "POST",
                "/api/v1/blends",
                &json!({"name": "Bad", "recipe": recipe}),
            ))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{}", body);
    }

    let (status, body) = app.send_json(empty_request("GET", "/api/v1/blends")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["total"], 0);
}

#[tokio::test]
async fn test_blends_are_scoped_to_caller() {
    let app = TestApp::new().await;
    let a = app.add_coffee("C1", "10").await;
    let b = app.add_coffee("C2", "10").await;
    let (status, blend) = app
        .send_json(json_request(
            "POST",
            "/api/v1/blends",
            &json!({
                "name": "House",
                "recipe": [
                    {"coffee_id": a, "percentage": 50},
                    {"coffee_id": b, "percentage": 50}
                ]
            }),
        ))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let uri = format!("/api/v1/blends/{}", blend["data"]["id"].as_str().unwrap());

    let request = Request::builder()
        .method("GET")
        .uri(&uri)
        .header("X-User-Id", Uuid::new_v4().to_string())
        .body(Body::empty())
        .unwrap();
    let (status, _) = app.send(request).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = app.send(empty_request("DELETE", &uri)).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
}

// =============================================================================
// References
// =============================================================================

#[tokio::test]
async fn test_reference_lifecycle() {
    let app = TestApp::new().await;
    let coffee = app.add_coffee("C1001", "10").await;
    let (status, _) = app
        .send(upsert_request(
            &json!({"roast_id": ROAST_ID, "date": "2024-05-01", "coffee": "C1001", "machine": "Giesen"}),
            None,
        ))
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let reference_uri = format!("/api/v1/roasts/{}/reference", ROAST_ID);
    let (status, body) = app
        .send_json(json_request(
            "POST",
            &reference_uri,
            &json!({
                "reference_name": "Espresso base",
                "reference_for_coffee_id": coffee,
                "reference_machine": "Giesen"
            }),
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["is_reference"], true);

    // Machine match is trimmed and case-insensitive
    let (_, body) = app
        .send_json(empty_request("GET", "/api/v1/references?coffee_hr_id=C1001&machine=%20giesen%20"))
        .await;
    assert_eq!(body["data"]["total"], 1);
    assert_eq!(body["data"]["items"][0]["reference_name"], "Espresso base");

    // Unknown machine falls back to all machines
    let (_, body) = app
        .send_json(empty_request("GET", "/api/v1/references?coffee_hr_id=C1001&machine=Probat"))
        .await;
    assert_eq!(body["data"]["total"], 1);

    let (status, _) = app
        .send(empty_request(
            "GET",
            &format!("/api/v1/references?coffee_id={}&blend_id={}", coffee, Uuid::new_v4()),
        ))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app.send(empty_request("DELETE", &reference_uri)).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = app.send(empty_request("DELETE", &reference_uri)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_reference_requires_one_target() {
    let app = TestApp::new().await;
    let (status, _) = app
        .send(upsert_request(&json!({"roast_id": ROAST_ID, "date": "2024-05-01"}), None))
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = app
        .send_json(json_request(
            "POST",
            &format!("/api/v1/roasts/{}/reference", ROAST_ID),
            &json!({"reference_name": "x"}),
        ))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"]["message"].as_str().unwrap().contains("exactly one"));
}

// =============================================================================
// Profiles, tasks and identity
// =============================================================================

#[tokio::test]
async fn test_profile_data_falls_back_to_telemetry() {
    let app = TestApp::new().await;
    let payload = json!({
        "roast_id": ROAST_ID,
        "date": "2024-05-01",
        "timex": [0.0, 60.0, 120.0],
        "temp1": [200.0, 180.0, 190.0],
        "temp2": [180.0, 120.0, 150.0]
    });
    let (status, _) = app.send(upsert_request(&payload, None)).await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = app
        .send_json(empty_request("GET", &format!("/api/v1/roasts/{}/profile/data", ROAST_ID)))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["timex"].as_array().unwrap().len(), 3);

    let (status, _) = app
        .send(empty_request("GET", &format!("/api/v1/roasts/{}/profile", ROAST_ID)))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_counter_task_fires_then_snooze_and_complete() {
    let app = TestApp::new().await;
    app.add_coffee("C1001", "10").await;
    {
        let mut conn = app.state.db.acquire().await.unwrap();
        tasks::insert_task(
            &mut conn,
            &ProductionTask {
                id: Uuid::new_v4(),
                user_id: anonymous_user(),
                title: "Clean chaff collector".into(),
                notification_text: "Empty and wipe".into(),
                task_type: TaskType::Counter,
                schedule_day_of_week: None,
                schedule_time: None,
                counter_trigger_value: Some(1),
                counter_current_value: 0,
                counter_reset_on_trigger: true,
                machine_id: None,
                scheduled_date: None,
                scheduled_time: None,
                repeat_after_days: None,
                is_active: true,
                last_triggered_at: None,
                last_triggered_roast_id: None,
            },
        )
        .await
        .unwrap();
    }
    let mut rx = app.state.hub.subscribe();

    let roast = json!({
        "roast_id": ROAST_ID,
        "date": "2024-05-01T08:00:00Z",
        "modified_at": "2024-05-01T08:30:00Z",
        "amount": 1.0,
        "coffee": "C1001"
    });
    let (status, _) = app.send(upsert_request(&roast, None)).await;
    assert_eq!(status, StatusCode::CREATED);

    let notification = rx.try_recv().expect("counter task should notify");
    assert_eq!(notification.event_type, TASK_EVENT);
    assert_eq!(notification.target_user_id, anonymous_user());

    let history_id: String = sqlx::query_scalar("SELECT id FROM production_task_history")
        .fetch_one(&app.state.db)
        .await
        .unwrap();
    assert_eq!(notification.payload["history_id"], history_id.as_str());

    let snooze = format!("/api/v1/tasks/history/{}/snooze", history_id);
    let (status, _) = app
        .send(json_request("POST", &snooze, &json!({"minutes": 0})))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = app
        .send_json(json_request("POST", &snooze, &json!({"minutes": 30})))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["id"], history_id.as_str());
    assert!(body["data"]["snoozed_until"].is_string());

    // Someone else's history item is invisible
    let complete = format!("/api/v1/tasks/history/{}/complete", history_id);
    let other = Request::builder()
        .method("POST")
        .uri(&complete)
        .header("X-User-Id", Uuid::new_v4().to_string())
        .body(Body::empty())
        .unwrap();
    let (status, _) = app.send(other).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = app.send_json(empty_request("POST", &complete)).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["data"]["marked_completed_at"].is_string());
}

#[tokio::test]
async fn test_unknown_task_history() {
    let app = TestApp::new().await;
    let uri = format!("/api/v1/tasks/history/{}/complete", Uuid::new_v4());
    let (status, _) = app.send(empty_request("POST", &uri)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_malformed_user_header() {
    let app = TestApp::new().await;
    let request = Request::builder()
        .method("GET")
        .uri("/api/v1/blends")
        .header("X-User-Id", "nobody")
        .body(Body::empty())
        .unwrap();
    let (status, body) = app.send_json(request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "BAD_REQUEST");
}
