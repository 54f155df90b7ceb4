use std::net::SocketAddr;
use std::sync::Arc;

use serde_json::{Value, json};
use tokio::net::TcpListener;
use ulid::Ulid;

use deskbook::api::{self, AppState};
use deskbook::engine::{Engine, EngineSettings};
use deskbook::notify::NotifyHub;

const ADMIN: &str = "test-admin";

// ── Test infrastructure ──────────────────────────────────────

async fn start_test_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let dir = std::env::temp_dir().join(format!("deskbook_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    let engine = Engine::new(
        dir.join("deskbook.wal"),
        Arc::new(NotifyHub::new()),
        EngineSettings::default(),
    )
    .unwrap();
    let state = AppState::new(Arc::new(engine), ADMIN);

    tokio::spawn(async move {
        let _ = api::serve(listener, state, std::future::pending()).await;
    });
    addr
}

/// Blocking client; run inside `spawn_blocking`.
struct Client {
    base: String,
}

impl Client {
    fn new(addr: SocketAddr) -> Self {
        Self {
            base: format!("http://{addr}"),
        }
    }

    fn call(&self, method: &str, path: &str, token: Option<&str>, body: Option<Value>) -> (u16, Value) {
        let mut req = ureq::request(method, &format!("{}{path}", self.base));
        if let Some(token) = token {
            req = req.set("Authorization", &format!("Bearer {token}"));
        }
        let result = match body {
            Some(body) => req.send_json(body),
            None => req.call(),
        };
        let resp = match result {
            Ok(resp) => resp,
            Err(ureq::Error::Status(_, resp)) => resp,
            Err(e) => panic!("{method} {path}: {e}"),
        };
        let status = resp.status();
        let text = resp.into_string().unwrap();
        let value = if text.is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).unwrap()
        };
        (status, value)
    }

    fn register(&self, name: &str) -> String {
        let (status, body) = self.call(
            "POST",
            "/v1/users",
            Some(ADMIN),
            Some(json!({ "name": name, "email": format!("{name}@example.com") })),
        );
        assert_eq!(status, 201, "{body}");
        body["id"].as_str().unwrap().to_string()
    }

    fn space(&self, kind: &str, price: u32) -> String {
        let (status, body) = self.call(
            "POST",
            "/v1/spaces",
            Some(ADMIN),
            Some(json!({ "type": kind, "name": format!("{kind} A"), "price": price })),
        );
        assert_eq!(status, 201, "{body}");
        body["id"].as_str().unwrap().to_string()
    }

    fn book(&self, user: &str, space: &str, from: &str, to: &str, plan: &str) -> (u16, Value) {
        self.call(
            "POST",
            "/v1/bookings",
            Some(user),
            Some(json!({ "spaceId": space, "fromDate": from, "toDate": to, "planType": plan })),
        )
    }
}

async fn run_blocking(addr: SocketAddr, scenario: impl FnOnce(Client) + Send + 'static) {
    tokio::task::spawn_blocking(move || scenario(Client::new(addr)))
        .await
        .unwrap();
}

// ── Tests ────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread")]
async fn health_and_auth() {
    let addr = start_test_server().await;
    run_blocking(addr, |c| {
        let (status, body) = c.call("GET", "/healthz", None, None);
        assert_eq!(status, 200);
        assert_eq!(body["status"], "ok");

        let (status, body) = c.call("GET", "/v1/spaces", None, None);
        assert_eq!(status, 401);
        assert_eq!(body["error"], "unauthorized");

        let (status, _) = c.call("GET", "/v1/spaces", Some("not-a-token"), None);
        assert_eq!(status, 401);

        let user = c.register("ada");
        let (status, body) = c.call(
            "POST",
            "/v1/spaces",
            Some(&user),
            Some(json!({ "type": "Desk", "name": "Desk", "price": 500 })),
        );
        assert_eq!(status, 403);
        assert_eq!(body["error"], "forbidden");

        let (status, _) = c.call("GET", "/v1/spaces", Some(&user), None);
        assert_eq!(status, 200);
    })
    .await;
}

#[tokio::test(flavor = "multi_thread")]
async fn booking_lifecycle_over_http() {
    let addr = start_test_server().await;
    run_blocking(addr, |c| {
        let ada = c.register("ada");
        let bob = c.register("bob");
        let desk = c.space("Desk", 500);

        let (status, booking) = c.book(&ada, &desk, "2024-03-05", "2024-03-06", "Daily");
        assert_eq!(status, 201, "{booking}");
        assert_eq!(booking["totalAmount"], 1000.0);
        assert_eq!(booking["status"], "pending");
        assert_eq!(booking["paymentStatus"], "pending");
        assert_eq!(booking["userName"], "ada");
        let id = booking["id"].as_str().unwrap().to_string();

        let (status, body) = c.book(&bob, &desk, "2024-03-05T10:00:00Z", "2024-03-07", "Daily");
        assert_eq!(status, 409);
        assert_eq!(body["error"], "conflict");

        let (status, body) = c.call("GET", &format!("/v1/bookings/{id}"), Some(&bob), None);
        assert_eq!(status, 404);
        assert_eq!(body["error"], "not_found");

        let (status, body) = c.call("POST", &format!("/v1/admin/bookings/{id}/approve"), Some(&ada), None);
        assert_eq!(status, 403, "{body}");

        let (status, body) = c.call("POST", &format!("/v1/admin/bookings/{id}/approve"), Some(ADMIN), None);
        assert_eq!(status, 200);
        assert_eq!(body["status"], "approved");

        let (status, body) = c.call(
            "PATCH",
            &format!("/v1/bookings/{id}"),
            Some(&ada),
            Some(json!({ "notes": "late arrival" })),
        );
        assert_eq!(status, 403);
        assert_eq!(body["error"], "forbidden");

        let (status, body) = c.call("POST", &format!("/v1/admin/bookings/{id}/activate"), Some(ADMIN), None);
        assert_eq!(status, 200);
        assert_eq!(body["status"], "active");
        assert_eq!(body["paymentStatus"], "paid");
        assert_eq!(body["invoice"]["number"], format!("INV-{id}"));
        assert_eq!(body["invoice"]["gst"], 180.0);
        assert_eq!(body["invoice"]["total"], 1180.0);

        let (status, body) = c.call(
            "PUT",
            &format!("/v1/admin/bookings/{id}/status"),
            Some(ADMIN),
            Some(json!({ "status": "pending" })),
        );
        assert_eq!(status, 400);
        assert_eq!(body["error"], "invalid_transition");

        let (status, body) = c.call(
            "PUT",
            &format!("/v1/admin/bookings/{id}/status"),
            Some(ADMIN),
            Some(json!({ "status": "completed" })),
        );
        assert_eq!(status, 200);
        assert_eq!(body["status"], "completed");

        let (status, body) = c.call("POST", &format!("/v1/bookings/{id}/cancel"), Some(&ada), None);
        assert_eq!(status, 400);
        assert_eq!(body["error"], "invalid_transition");

        let (status, list) = c.call("GET", "/v1/bookings?status=completed", Some(&ada), None);
        assert_eq!(status, 200);
        assert_eq!(list.as_array().unwrap().len(), 1);
        let (_, list) = c.call("GET", "/v1/bookings", Some(&bob), None);
        assert!(list.as_array().unwrap().is_empty());
    })
    .await;
}

#[tokio::test(flavor = "multi_thread")]
async fn conference_rules_over_http() {
    let addr = start_test_server().await;
    run_blocking(addr, |c| {
        let ada = c.register("ada");
        let room = c.space("Conference", 1500);

        let (status, body) = c.book(&ada, &room, "2024-03-05", "2024-03-12", "Weekly");
        assert_eq!(status, 400);
        assert_eq!(body["error"], "invalid_plan");

        let (status, body) = c.book(&ada, &room, "2024-03-05T08:00:00Z", "2024-03-05", "Daily");
        assert_eq!(status, 201, "{body}");
        assert_eq!(body["fromDate"], "2024-03-05T13:00:00.000+00:00");
        assert_eq!(body["toDate"], "2024-03-05T14:00:00.000+00:00");
        assert_eq!(body["totalAmount"], 1500.0);

        let (_, list) = c.call("GET", "/v1/bookings", Some(&ada), None);
        assert_eq!(list.as_array().unwrap().len(), 1);

        let (status, slots) = c.call(
            "GET",
            &format!("/v1/spaces/{room}/bookings?from=2024-03-01&to=2024-03-31"),
            Some(&ada),
            None,
        );
        assert_eq!(status, 200);
        assert_eq!(slots[0]["fromDate"], "2024-03-05T13:00:00.000+00:00");
        assert!(slots[0].get("userEmail").is_none());
    })
    .await;
}

#[tokio::test(flavor = "multi_thread")]
async fn boundary_validation() {
    let addr = start_test_server().await;
    run_blocking(addr, |c| {
        let ada = c.register("ada");
        let desk = c.space("Desk", 500);

        let (status, body) = c.book(&ada, &desk, "2024-03-05", "2024-03-06", "Hourly");
        assert_eq!(status, 400);
        assert_eq!(body["error"], "invalid_plan");

        let (status, body) = c.book(&ada, &desk, "soon", "2024-03-06", "Daily");
        assert_eq!(status, 400);
        assert_eq!(body["error"], "bad_request");

        let (status, body) = c.book(&ada, &desk, "2024-03-09", "2024-03-06", "Daily");
        assert_eq!(status, 400);
        assert_eq!(body["error"], "invalid_range");

        let missing = Ulid::new().to_string();
        let (status, body) = c.book(&ada, &missing, "2024-03-05", "2024-03-06", "Daily");
        assert_eq!(status, 404);
        assert_eq!(body["error"], "not_found");

        let (status, _) = c.call("GET", "/v1/bookings/not-an-id", Some(&ada), None);
        assert_eq!(status, 400);

        let (status, body) = c.call(
            "PATCH",
            &format!("/v1/spaces/{desk}"),
            Some(ADMIN),
            Some(json!({ "isActive": false })),
        );
        assert_eq!(status, 200);
        assert_eq!(body["isActive"], false);

        let (status, body) = c.book(&ada, &desk, "2024-03-05", "2024-03-06", "Daily");
        assert_eq!(status, 400);
        assert_eq!(body["error"], "space_inactive");
    })
    .await;
}

#[tokio::test(flavor = "multi_thread")]
async fn owner_withdraws_pending_booking() {
    let addr = start_test_server().await;
    run_blocking(addr, |c| {
        let ada = c.register("ada");
        let bob = c.register("bob");
        let desk = c.space("Desk", 500);

        let (_, booking) = c.book(&ada, &desk, "2024-03-05", "2024-03-06", "Daily");
        let id = booking["id"].as_str().unwrap().to_string();

        let (status, body) = c.call(
            "PATCH",
            &format!("/v1/bookings/{id}"),
            Some(&ada),
            Some(json!({ "notes": "near the window" })),
        );
        assert_eq!(status, 200);
        assert_eq!(body["notes"], "near the window");

        let (status, _) = c.call("DELETE", &format!("/v1/bookings/{id}"), Some(&bob), None);
        assert_eq!(status, 404);

        let (status, body) = c.call("DELETE", &format!("/v1/bookings/{id}"), Some(&ada), None);
        assert_eq!(status, 204);
        assert_eq!(body, Value::Null);

        let (status, _) = c.book(&bob, &desk, "2024-03-05", "2024-03-06", "Daily");
        assert_eq!(status, 201);
    })
    .await;
}
