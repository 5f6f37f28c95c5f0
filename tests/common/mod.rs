//! Shared helpers for HTTP-level tests.
//!
//! The router is the one `main.rs` serves, backed by an in-memory SQLite
//! database, the memory cache, a temp upload directory and fakes for the
//! payment gateway and the mail transport.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::http::{header, Method, Request, Response};
use axum::Router;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

use tirestore::api::{self, AppState};
use tirestore::cache::{Cache, MemoryCache};
use tirestore::config::Config;
use tirestore::db::{create_test_pool, migrations, DynDatabasePool};
use tirestore::services::payment::{GatewayError, IntentRequest, PaymentIntent};
use tirestore::services::storage::LocalStorage;
use tirestore::services::{Mailer, OutgoingEmail, PaymentGateway};

pub const WEBHOOK_SECRET: &str = "whsec_integration";

/// Issues predictable intent ids: `pi_it_1`, `pi_it_2`, ...
#[derive(Default)]
pub struct FakeGateway {
    pub requests: Mutex<Vec<IntentRequest>>,
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn create_payment_intent(&self, request: &IntentRequest) -> Result<PaymentIntent, GatewayError> {
        let mut requests = self.requests.lock().unwrap();
        requests.push(request.clone());
        let id = format!("pi_it_{}", requests.len());
        Ok(PaymentIntent {
            client_secret: format!("{}_secret", id),
            id,
            amount: request.amount_cents,
        })
    }
}

#[derive(Default)]
pub struct OutboxMailer {
    pub sent: Mutex<Vec<OutgoingEmail>>,
}

#[async_trait]
impl Mailer for OutboxMailer {
    async fn send(&self, email: &OutgoingEmail) -> Result<()> {
        self.sent.lock().unwrap().push(email.clone());
        Ok(())
    }
}

pub struct TestApp {
    pub router: Router,
    pub pool: DynDatabasePool,
    pub gateway: Arc<FakeGateway>,
    pub mailer: Arc<OutboxMailer>,
    _uploads: TempDir,
}

pub async fn build_test_app() -> TestApp {
    build_test_app_with(|_| {}).await
}

/// Same as `build_test_app`, with a hook to adjust the config first
pub async fn build_test_app_with(configure: impl FnOnce(&mut Config)) -> TestApp {
    let uploads = TempDir::new().unwrap();

    let mut config = Config::default();
    config.stripe.webhook_secret = WEBHOOK_SECRET.to_string();
    config.storage.path = uploads.path().to_path_buf();
    config.auth.jwt_secret = "integration-test-secret".to_string();
    configure(&mut config);

    let pool = create_test_pool().await.unwrap();
    migrations::run_migrations(&pool).await.unwrap();

    let gateway = Arc::new(FakeGateway::default());
    let mailer = Arc::new(OutboxMailer::default());
    let storage = Arc::new(LocalStorage::new(
        uploads.path(),
        &config.storage.public_base_url,
    ));

    let state = AppState::new(
        &config,
        pool.clone(),
        Arc::new(Cache::Memory(MemoryCache::new())),
        gateway.clone(),
        mailer.clone(),
        storage,
    );

    TestApp {
        router: api::build_router(state, "http://localhost:3000"),
        pool,
        gateway,
        mailer,
        _uploads: uploads,
    }
}

impl TestApp {
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> Response<Body> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let body = match body {
            Some(json) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };
        self.router
            .clone()
            .oneshot(builder.body(body).unwrap())
            .await
            .unwrap()
    }

    pub async fn get(&self, uri: &str, token: Option<&str>) -> Response<Body> {
        self.request(Method::GET, uri, token, None).await
    }

    pub async fn post(&self, uri: &str, token: Option<&str>, body: Value) -> Response<Body> {
        self.request(Method::POST, uri, token, Some(body)).await
    }

    /// Register an account and return its token
    pub async fn register(&self, email: &str) -> String {
        let response = self
            .post(
                "/api/auth/register",
                None,
                serde_json::json!({
                    "email": email,
                    "password": "correct-horse",
                    "firstName": "Test",
                    "lastName": "Driver",
                }),
            )
            .await;
        assert_eq!(response.status(), 201);
        body_json(response).await["token"].as_str().unwrap().to_string()
    }
}

pub async fn body_json(response: Response<Body>) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}
