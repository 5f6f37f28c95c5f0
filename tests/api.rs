//! HTTP-level tests: routing, auth layers, the error envelope and the
//! checkout flow end to end.

mod common;

use std::net::SocketAddr;

use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{header, Method, Request, Response, StatusCode};
use serde_json::json;
use tower::ServiceExt;

use common::{body_json, build_test_app, build_test_app_with, TestApp, WEBHOOK_SECRET};
use tirestore::services::payment::signature_header;

fn product_body(name: &str, sku: &str, price: f64, stock: i64) -> serde_json::Value {
    json!({
        "name": name,
        "sku": sku,
        "brand": "Michelin",
        "model": "Pilot Sport 4",
        "size": "225/45R17",
        "width": 225,
        "aspectRatio": 45,
        "rimDiameter": 17,
        "seasonType": "summer",
        "price": price,
        "stockQuantity": stock,
    })
}

fn address() -> serde_json::Value {
    json!({
        "fullName": "Sam Driver",
        "line1": "1 Main St",
        "city": "Springfield",
        "state": "IL",
        "postalCode": "62701",
        "country": "US",
    })
}

#[tokio::test]
async fn health_reports_ok_with_version() {
    let app = build_test_app().await;
    let response = app.get("/api/health", None).await;
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["status"], "ok");
    assert!(json["version"].is_string());
}

#[tokio::test]
async fn unknown_route_uses_error_envelope() {
    let app = build_test_app().await;
    let response = app.get("/api/nope", None).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await["error"]["code"], "NOT_FOUND");
}

#[tokio::test]
async fn first_account_is_admin_and_duplicates_conflict() {
    let app = build_test_app().await;
    let admin = app.register("owner@example.com").await;
    let customer = app.register("buyer@example.com").await;

    let me = body_json(app.get("/api/auth/me", Some(&admin)).await).await;
    assert_eq!(me["role"], "admin");
    assert!(me.get("passwordHash").is_none());
    let me = body_json(app.get("/api/auth/me", Some(&customer)).await).await;
    assert_eq!(me["role"], "customer");

    let response = app
        .post(
            "/api/auth/register",
            None,
            json!({ "email": "BUYER@example.com", "password": "another-password" }),
        )
        .await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(body_json(response).await["error"]["code"], "CONFLICT");
}

#[tokio::test]
async fn protected_and_admin_routes_check_the_token() {
    let app = build_test_app().await;
    let _admin = app.register("owner@example.com").await;
    let customer = app.register("buyer@example.com").await;

    let response = app.get("/api/cart", None).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(response).await["error"]["code"], "UNAUTHORIZED");

    let response = app.get("/api/cart", Some("not-a-jwt")).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .post("/api/products", Some(&customer), product_body("X", "X-1", 10.0, 1))
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(body_json(response).await["error"]["code"], "FORBIDDEN");

    let response = app.get("/api/dashboard/stats", Some(&customer)).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn login_failures_are_uniform_then_rate_limited() {
    let app = build_test_app().await;
    app.register("owner@example.com").await;

    let unknown = app
        .post(
            "/api/auth/login",
            None,
            json!({ "email": "ghost@example.com", "password": "whatever1" }),
        )
        .await;
    assert_eq!(unknown.status(), StatusCode::UNAUTHORIZED);
    let unknown_message = body_json(unknown).await["error"]["message"].clone();

    let mut wrong_message = serde_json::Value::Null;
    for _ in 0..5 {
        let response = app
            .post(
                "/api/auth/login",
                None,
                json!({ "email": "owner@example.com", "password": "wrong-password" }),
            )
            .await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        wrong_message = body_json(response).await["error"]["message"].clone();
    }
    assert_eq!(unknown_message, wrong_message);

    let blocked = app
        .post(
            "/api/auth/login",
            None,
            json!({ "email": "owner@example.com", "password": "correct-horse" }),
        )
        .await;
    assert_eq!(blocked.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(blocked.headers().contains_key(header::RETRY_AFTER));
    let json = body_json(blocked).await;
    assert_eq!(json["error"]["code"], "RATE_LIMITED");
    assert!(json["error"]["details"]["retry_after"].as_u64().unwrap() > 0);
}

/// Log in as if the TCP connection came from `peer`
async fn login_via(
    app: &TestApp,
    peer: [u8; 4],
    forwarded_for: Option<&str>,
    email: &str,
    password: &str,
) -> Response<Body> {
    let mut builder = Request::builder()
        .method(Method::POST)
        .uri("/api/auth/login")
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(forwarded_for) = forwarded_for {
        builder = builder.header("x-forwarded-for", forwarded_for);
    }
    let mut request = builder
        .body(Body::from(json!({ "email": email, "password": password }).to_string()))
        .unwrap();
    request
        .extensions_mut()
        .insert(ConnectInfo(SocketAddr::from((peer, 40000))));
    app.router.clone().oneshot(request).await.unwrap()
}

#[tokio::test]
async fn rotating_forwarded_for_does_not_escape_login_block() {
    let app = build_test_app().await;
    app.register("owner@example.com").await;

    for i in 0..5 {
        let spoofed = format!("198.51.100.{}", i + 1);
        let response = login_via(
            &app,
            [203, 0, 113, 7],
            Some(&spoofed),
            "owner@example.com",
            "wrong-password",
        )
        .await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    let blocked = login_via(
        &app,
        [203, 0, 113, 7],
        Some("198.51.100.99"),
        "owner@example.com",
        "correct-horse",
    )
    .await;
    assert_eq!(blocked.status(), StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn trusted_proxy_forwards_the_client_address() {
    let app = build_test_app_with(|config| {
        config.server.trusted_proxies = vec!["10.0.0.1".parse().unwrap()];
    })
    .await;
    app.register("owner@example.com").await;

    // The leading hop is client supplied; the proxy appended the real one
    for i in 0..5 {
        let chain = format!("1.1.1.{}, 198.51.100.20", i);
        let response =
            login_via(&app, [10, 0, 0, 1], Some(&chain), "owner@example.com", "wrong-password").await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
    let blocked = login_via(
        &app,
        [10, 0, 0, 1],
        Some("198.51.100.20"),
        "owner@example.com",
        "correct-horse",
    )
    .await;
    assert_eq!(blocked.status(), StatusCode::TOO_MANY_REQUESTS);

    // A different client behind the same proxy is not affected
    let other = login_via(
        &app,
        [10, 0, 0, 1],
        Some("198.51.100.21"),
        "owner@example.com",
        "correct-horse",
    )
    .await;
    assert_eq!(other.status(), StatusCode::OK);
}

#[tokio::test]
async fn simultaneous_campaign_sends_mail_each_subscriber_once() {
    let app = build_test_app().await;
    let admin = app.register("owner@example.com").await;
    for i in 0..5 {
        let response = app
            .post(
                "/api/newsletter/subscribe",
                None,
                json!({ "email": format!("reader{}@example.com", i) }),
            )
            .await;
        assert_eq!(response.status(), StatusCode::CREATED);
    }

    let campaign = body_json(
        app.post(
            "/api/newsletter/campaigns",
            Some(&admin),
            json!({ "subject": "Winter fitting week", "content": "<p>Book now</p>" }),
        )
        .await,
    )
    .await;
    let uri = format!("/api/newsletter/campaigns/{}/send", campaign["id"]);

    let (first, second) = tokio::join!(
        app.request(Method::POST, &uri, Some(&admin), None),
        app.request(Method::POST, &uri, Some(&admin), None),
    );
    let mut statuses = vec![first.status(), second.status()];
    statuses.sort();
    assert_eq!(statuses, vec![StatusCode::OK, StatusCode::CONFLICT]);

    let delivered = app
        .mailer
        .sent
        .lock()
        .unwrap()
        .iter()
        .filter(|m| m.subject == "Winter fitting week")
        .count();
    assert_eq!(delivered, 5);
}

#[tokio::test]
async fn catalog_listing_validates_and_paginates() {
    let app = build_test_app().await;
    let admin = app.register("owner@example.com").await;
    for i in 0..3 {
        let response = app
            .post(
                "/api/products",
                Some(&admin),
                product_body(&format!("Tire {}", i), &format!("SKU-{}", i), 100.0 + i as f64, 5),
            )
            .await;
        assert_eq!(response.status(), StatusCode::CREATED);
    }

    let response = app.get("/api/products?minPrice=abc", None).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"]["code"], "VALIDATION_ERROR");

    let json = body_json(app.get("/api/products?limit=2&page=2", None).await).await;
    assert_eq!(json["items"].as_array().unwrap().len(), 1);
    assert_eq!(json["pagination"]["total"], 3);
    assert_eq!(json["pagination"]["totalPages"], 2);

    let json = body_json(app.get("/api/products?category=no-such-category", None).await).await;
    assert_eq!(json["pagination"]["total"], 0);

    let response = app.get("/api/products/tire-1", None).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["sku"], "SKU-1");
}

#[tokio::test]
async fn malformed_json_body_is_a_validation_error() {
    let app = build_test_app().await;
    let request = Request::builder()
        .method(Method::POST)
        .uri("/api/auth/login")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let response = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"]["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn checkout_from_cart_to_paid_order() {
    let app = build_test_app().await;
    let admin = app.register("owner@example.com").await;
    let customer = app.register("buyer@example.com").await;

    let product = body_json(
        app.post("/api/products", Some(&admin), product_body("Pilot", "PS4-225", 200.0, 4))
            .await,
    )
    .await;
    let product_id = product["id"].as_i64().unwrap();

    // More than in stock
    let response = app
        .post(
            "/api/cart/items",
            Some(&customer),
            json!({ "productId": product_id, "quantity": 5 }),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let cart = body_json(
        app.post(
            "/api/cart/items",
            Some(&customer),
            json!({ "productId": product_id, "quantity": 2 }),
        )
        .await,
    )
    .await;
    assert_eq!(cart["itemCount"], 2);
    assert_eq!(cart["subtotal"], 400.0);

    // 400 subtotal + 8% tax + 25 flat shipping
    let session = body_json(
        app.post(
            "/api/payments/create-intent",
            Some(&customer),
            json!({ "shippingAddress": address() }),
        )
        .await,
    )
    .await;
    assert_eq!(session["amount"], 457.0);
    assert_eq!(session["paymentIntentId"], "pi_it_1");
    assert_eq!(app.gateway.requests.lock().unwrap()[0].amount_cents, 45_700);
    let order_id = session["orderId"].as_i64().unwrap();

    let event = json!({
        "id": "evt_it_1",
        "type": "payment_intent.succeeded",
        "data": { "object": {
            "id": "pi_it_1",
            "amount": 45_700,
            "metadata": { "user_id": "2" },
        }},
    })
    .to_string();
    let signature = signature_header(event.as_bytes(), WEBHOOK_SECRET, chrono::Utc::now().timestamp());

    for expect_duplicate in [false, true] {
        let request = Request::builder()
            .method(Method::POST)
            .uri("/api/payments/webhook")
            .header("stripe-signature", &signature)
            .body(Body::from(event.clone()))
            .unwrap();
        let response = app.router.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let ack = body_json(response).await;
        assert_eq!(ack["received"], true);
        assert_eq!(ack["duplicate"], expect_duplicate);
    }

    let order = body_json(app.get(&format!("/api/orders/{}", order_id), Some(&customer)).await).await;
    assert_eq!(order["paymentStatus"], "paid");
    assert_eq!(order["status"], "processing");
    assert_eq!(order["items"].as_array().unwrap().len(), 1);

    let cart = body_json(app.get("/api/cart", Some(&customer)).await).await;
    assert_eq!(cart["itemCount"], 0);

    let product = body_json(app.get(&format!("/api/products/{}", product_id), None).await).await;
    assert_eq!(product["stockQuantity"], 2);

    // Somebody else's order reads as missing
    let response = app.get(&format!("/api/orders/{}", order_id), Some(&admin)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let stranger = app.register("stranger@example.com").await;
    let response = app.get(&format!("/api/orders/{}", order_id), Some(&stranger)).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn webhook_rejects_bad_signature() {
    let app = build_test_app().await;
    let request = Request::builder()
        .method(Method::POST)
        .uri("/api/payments/webhook")
        .header("stripe-signature", "t=1,v1=deadbeef")
        .body(Body::from(r#"{"id":"evt_1","type":"payment_intent.succeeded","data":{"object":{}}}"#))
        .unwrap();
    let response = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn public_settings_and_contact_form() {
    let app = build_test_app().await;

    let settings = body_json(app.get("/api/settings/public", None).await).await;
    assert_eq!(settings["taxRate"], 0.08);

    let response = app
        .post(
            "/api/contact",
            None,
            json!({ "name": "Sam", "email": "sam@example.com", "message": "Do you sell rims?" }),
        )
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = app
        .post(
            "/api/contact",
            None,
            json!({ "name": "Sam", "email": "not-an-email", "message": "Hi" }),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
