//! Payments
//!
//! Checkout creates a Stripe PaymentIntent and a pending order holding the
//! quote. The signed webhook then settles the order. Event ids are recorded
//! so a redelivered notification is a no-op.

use async_trait::async_trait;
use chrono::Utc;
use data_encoding::{HEXLOWER, HEXLOWER_PERMISSIVE};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::config::StripeConfig;
use crate::db::repositories::{PaymentApplied, UserRepository};
use crate::models::{OrderWithItems, PaymentStatus, ShippingAddress};
use crate::services::email::EmailService;
use crate::services::error::{ServiceError, ServiceResult};
use crate::services::order::{CheckoutDetails, OrderService};

type HmacSha256 = Hmac<Sha256>;

const GATEWAY_TIMEOUT_SECS: u64 = 15;

pub const EVENT_PAYMENT_SUCCEEDED: &str = "payment_intent.succeeded";
pub const EVENT_PAYMENT_FAILED: &str = "payment_intent.payment_failed";

/// Errors from the payment provider
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Payment provider is not configured")]
    NotConfigured,

    #[error("Payment provider request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Payment provider rejected the request ({status}): {message}")]
    Rejected { status: u16, message: String },
}

impl From<GatewayError> for ServiceError {
    fn from(err: GatewayError) -> Self {
        ServiceError::Upstream(err.to_string())
    }
}

/// What the gateway is asked to charge
#[derive(Debug, Clone, PartialEq)]
pub struct IntentRequest {
    pub amount_cents: i64,
    pub currency: String,
    pub user_id: i64,
    pub receipt_email: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct PaymentIntent {
    pub id: String,
    pub client_secret: String,
    pub amount: i64,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_payment_intent(&self, request: &IntentRequest) -> Result<PaymentIntent, GatewayError>;
}

/// Stripe REST client
pub struct StripeGateway {
    client: reqwest::Client,
    api_base: String,
    secret_key: String,
}

#[derive(Deserialize)]
struct StripeErrorBody {
    error: StripeErrorDetail,
}

#[derive(Deserialize)]
struct StripeErrorDetail {
    message: Option<String>,
}

impl StripeGateway {
    pub fn new(config: &StripeConfig) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(GATEWAY_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            secret_key: config.secret_key.clone(),
        })
    }
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    async fn create_payment_intent(&self, request: &IntentRequest) -> Result<PaymentIntent, GatewayError> {
        if self.secret_key.is_empty() {
            return Err(GatewayError::NotConfigured);
        }

        let form = [
            ("amount", request.amount_cents.to_string()),
            ("currency", request.currency.to_lowercase()),
            ("metadata[user_id]", request.user_id.to_string()),
            ("receipt_email", request.receipt_email.clone()),
            ("automatic_payment_methods[enabled]", "true".to_string()),
        ];

        let response = self
            .client
            .post(format!("{}/v1/payment_intents", self.api_base))
            .bearer_auth(&self.secret_key)
            .form(&form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .json::<StripeErrorBody>()
                .await
                .ok()
                .and_then(|b| b.error.message)
                .unwrap_or_else(|| status.canonical_reason().unwrap_or("unknown error").to_string());
            return Err(GatewayError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        Ok(response.json::<PaymentIntent>().await?)
    }
}

/// Returned to the storefront to confirm the payment client-side
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutSession {
    pub client_secret: String,
    pub payment_intent_id: String,
    pub order_id: i64,
    pub amount: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookOutcome {
    Processed,
    Duplicate,
    Ignored,
}

#[derive(Debug, Deserialize)]
struct WebhookEvent {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    data: WebhookEventData,
}

#[derive(Debug, Deserialize)]
struct WebhookEventData {
    object: serde_json::Value,
}

#[derive(Debug, Default, Deserialize)]
struct IntentObject {
    id: String,
    #[serde(default)]
    amount: i64,
    #[serde(default)]
    metadata: HashMap<String, String>,
    #[serde(default)]
    receipt_email: Option<String>,
    #[serde(default)]
    shipping: Option<IntentShipping>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct IntentShipping {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    phone: Option<String>,
    #[serde(default)]
    address: IntentAddress,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct IntentAddress {
    line1: Option<String>,
    line2: Option<String>,
    city: Option<String>,
    state: Option<String>,
    postal_code: Option<String>,
    country: Option<String>,
}

impl From<IntentShipping> for ShippingAddress {
    fn from(s: IntentShipping) -> Self {
        let a = s.address;
        ShippingAddress {
            full_name: s.name.unwrap_or_default(),
            line1: a.line1.unwrap_or_default(),
            line2: a.line2,
            city: a.city.unwrap_or_default(),
            state: a.state.unwrap_or_default(),
            postal_code: a.postal_code.unwrap_or_default(),
            country: a.country.unwrap_or_default(),
            phone: s.phone,
        }
    }
}

pub struct PaymentService {
    gateway: Arc<dyn PaymentGateway>,
    orders: Arc<OrderService>,
    users: Arc<dyn UserRepository>,
    email: Arc<EmailService>,
    config: StripeConfig,
}

impl PaymentService {
    pub fn new(
        gateway: Arc<dyn PaymentGateway>,
        orders: Arc<OrderService>,
        users: Arc<dyn UserRepository>,
        email: Arc<EmailService>,
        config: StripeConfig,
    ) -> Self {
        Self {
            gateway,
            orders,
            users,
            email,
            config,
        }
    }

    /// Quote the cart, open a PaymentIntent for the total and store the
    /// pending order. The account email is used when none is given.
    pub async fn create_intent(
        &self,
        user_id: i64,
        account_email: &str,
        mut details: CheckoutDetails,
    ) -> ServiceResult<CheckoutSession> {
        if details.email.trim().is_empty() {
            details.email = account_email.to_string();
        }
        let details = details.validate()?;
        let quote = self.orders.quote(user_id).await?;

        let request = IntentRequest {
            amount_cents: to_cents(quote.totals.total),
            currency: self.config.currency.clone(),
            user_id,
            receipt_email: details.email.clone(),
        };
        let intent = self.gateway.create_payment_intent(&request).await.map_err(|e| {
            tracing::error!(user_id, "Failed to create payment intent: {}", e);
            ServiceError::from(e)
        })?;

        let order = self
            .orders
            .create_pending(user_id, &quote, details, Some(intent.id.clone()))
            .await?;
        tracing::info!(
            user_id,
            order_id = order.order.id,
            payment_intent = %intent.id,
            amount_cents = request.amount_cents,
            "Payment intent created"
        );

        Ok(CheckoutSession {
            client_secret: intent.client_secret,
            payment_intent_id: intent.id,
            order_id: order.order.id,
            amount: quote.totals.total,
        })
    }

    /// Verify and apply a webhook delivery
    pub async fn handle_webhook(
        &self,
        payload: &[u8],
        signature: Option<&str>,
    ) -> ServiceResult<WebhookOutcome> {
        let signature =
            signature.ok_or_else(|| ServiceError::validation("Missing Stripe-Signature header"))?;
        verify_signature(
            payload,
            signature,
            &self.config.webhook_secret,
            self.config.webhook_tolerance_secs,
            Utc::now().timestamp(),
        )?;

        let event: WebhookEvent = serde_json::from_slice(payload)
            .map_err(|e| ServiceError::Validation(format!("Malformed webhook payload: {}", e)))?;

        let repo = self.orders.repository();
        if repo.event_seen(&event.id).await? {
            tracing::debug!(event_id = %event.id, "Webhook event already processed");
            return Ok(WebhookOutcome::Duplicate);
        }

        match event.event_type.as_str() {
            EVENT_PAYMENT_SUCCEEDED => {
                let intent = parse_intent(event.data.object)?;
                self.payment_succeeded(&event.id, &event.event_type, intent).await
            }
            EVENT_PAYMENT_FAILED => {
                let intent = parse_intent(event.data.object)?;
                match repo.get_by_payment_intent(&intent.id).await? {
                    Some(order) => {
                        repo.update_payment_status(order.order.id, PaymentStatus::Failed)
                            .await?;
                        tracing::info!(order_id = order.order.id, payment_intent = %intent.id, "Payment failed");
                    }
                    None => {
                        tracing::warn!(payment_intent = %intent.id, "Payment failed for unknown intent");
                    }
                }
                repo.record_event(&event.id, &event.event_type).await?;
                Ok(WebhookOutcome::Processed)
            }
            other => {
                tracing::debug!(event_id = %event.id, event_type = other, "Ignoring webhook event");
                repo.record_event(&event.id, other).await?;
                Ok(WebhookOutcome::Ignored)
            }
        }
    }

    async fn payment_succeeded(
        &self,
        event_id: &str,
        event_type: &str,
        intent: IntentObject,
    ) -> ServiceResult<WebhookOutcome> {
        let repo = self.orders.repository();
        let order = match repo.get_by_payment_intent(&intent.id).await? {
            Some(order) => order,
            None => match self.order_from_metadata(&intent).await? {
                Some(order) => order,
                None => {
                    repo.record_event(event_id, event_type).await?;
                    return Ok(WebhookOutcome::Ignored);
                }
            },
        };

        let expected = to_cents(order.order.total);
        if intent.amount != expected {
            tracing::warn!(
                order_id = order.order.id,
                expected_cents = expected,
                received_cents = intent.amount,
                "Payment amount differs from order total"
            );
        }

        match repo.apply_payment(order.order.id, event_id, event_type).await? {
            PaymentApplied::Duplicate => Ok(WebhookOutcome::Duplicate),
            PaymentApplied::PaidAfterCancel => {
                tracing::warn!(
                    order_id = order.order.id,
                    order_number = %order.order.order_number,
                    payment_intent = %intent.id,
                    "Payment received for a cancelled order, refund needed"
                );
                Ok(WebhookOutcome::Processed)
            }
            PaymentApplied::Applied => {
                tracing::info!(
                    order_id = order.order.id,
                    order_number = %order.order.order_number,
                    "Order paid"
                );
                if let Some(paid) = repo.get(order.order.id).await? {
                    self.email.dispatch(self.email.order_confirmation(&paid));
                }
                Ok(WebhookOutcome::Processed)
            }
        }
    }

    /// Build the order from the cart of the user named in the intent's
    /// metadata. None when that is not possible.
    async fn order_from_metadata(&self, intent: &IntentObject) -> ServiceResult<Option<OrderWithItems>> {
        let Some(user_id) = intent.metadata.get("user_id").and_then(|v| v.parse::<i64>().ok()) else {
            tracing::warn!(payment_intent = %intent.id, "Paid intent has no order and no user metadata");
            return Ok(None);
        };
        let Some(user) = self.users.get_by_id(user_id).await? else {
            tracing::warn!(payment_intent = %intent.id, user_id, "Paid intent names an unknown user");
            return Ok(None);
        };

        let email = intent
            .receipt_email
            .clone()
            .filter(|e| !e.trim().is_empty())
            .unwrap_or(user.email);
        let address = intent
            .shipping
            .clone()
            .map(ShippingAddress::from)
            .unwrap_or_default();

        match self
            .orders
            .create_for_payment(user_id, &email, address, &intent.id)
            .await
        {
            Ok(order) => {
                tracing::info!(order_id = order.order.id, payment_intent = %intent.id, "Order built from paid intent");
                Ok(Some(order))
            }
            Err(ServiceError::Validation(reason)) => {
                tracing::error!(payment_intent = %intent.id, user_id, "Cannot build order for paid intent: {}", reason);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}

fn parse_intent(object: serde_json::Value) -> ServiceResult<IntentObject> {
    serde_json::from_value(object)
        .map_err(|e| ServiceError::Validation(format!("Malformed payment intent: {}", e)))
}

fn to_cents(amount: f64) -> i64 {
    (amount * 100.0).round() as i64
}

/// Check a `Stripe-Signature` header (`t=<unix>,v1=<hex>[,v1=...]`) against
/// the raw payload. Any `v1` entry may match; the timestamp must be within
/// `tolerance_secs` of `now`.
pub fn verify_signature(
    payload: &[u8],
    header: &str,
    secret: &str,
    tolerance_secs: i64,
    now: i64,
) -> ServiceResult<()> {
    let invalid = || ServiceError::validation("Invalid webhook signature");

    let mut timestamp = None;
    let mut signatures = Vec::new();
    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => timestamp = value.parse::<i64>().ok(),
            Some(("v1", value)) => signatures.push(value),
            _ => {}
        }
    }
    let timestamp = timestamp.ok_or_else(invalid)?;
    if signatures.is_empty() || secret.is_empty() {
        return Err(invalid());
    }
    if (now - timestamp).abs() > tolerance_secs {
        return Err(ServiceError::validation("Webhook timestamp outside tolerance"));
    }

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| invalid())?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);

    let matched = signatures.iter().any(|candidate| {
        HEXLOWER_PERMISSIVE
            .decode(candidate.as_bytes())
            .map(|expected| mac.clone().verify_slice(&expected).is_ok())
            .unwrap_or(false)
    });
    if matched {
        Ok(())
    } else {
        Err(invalid())
    }
}

/// Header value Stripe would send for `payload` at `timestamp`
pub fn signature_header(payload: &[u8], secret: &str, timestamp: i64) -> String {
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return format!("t={}", timestamp),
    };
    mac.update(format!("{}.", timestamp).as_bytes());
    mac.update(payload);
    format!("t={},v1={}", timestamp, HEXLOWER.encode(&mac.finalize().into_bytes()))
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;

    /// Records requests and hands out sequential intent ids
    #[derive(Default)]
    pub struct FakeGateway {
        pub requests: Mutex<Vec<IntentRequest>>,
        pub fail: bool,
    }

    #[async_trait]
    impl PaymentGateway for FakeGateway {
        async fn create_payment_intent(&self, request: &IntentRequest) -> Result<PaymentIntent, GatewayError> {
            if self.fail {
                return Err(GatewayError::Rejected {
                    status: 402,
                    message: "Your card was declined".into(),
                });
            }
            let mut requests = self.requests.lock().unwrap();
            requests.push(request.clone());
            let id = format!("pi_test_{}", requests.len());
            Ok(PaymentIntent {
                client_secret: format!("{}_secret", id),
                id,
                amount: request.amount_cents,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::FakeGateway;
    use super::*;
    use crate::db::repositories::SqlxUserRepository;
    use crate::models::OrderStatus;
    use crate::services::email::testing::RecordingMailer;
    use crate::services::order::test_support::{details, shop, Shop};
    use serde_json::json;

    const SECRET: &str = "whsec_test";

    struct Fixture {
        shop: Shop,
        payments: PaymentService,
        gateway: Arc<FakeGateway>,
        mailer: Arc<RecordingMailer>,
    }

    async fn fixture() -> Fixture {
        fixture_with(FakeGateway::default()).await
    }

    async fn fixture_with(gateway: FakeGateway) -> Fixture {
        let shop = shop().await;
        let gateway = Arc::new(gateway);
        let mailer = Arc::new(RecordingMailer::default());
        let email = Arc::new(EmailService::new(mailer.clone(), "http://shop.test", "Tire Shop", None));
        let config = StripeConfig {
            webhook_secret: SECRET.into(),
            ..StripeConfig::default()
        };
        let payments = PaymentService::new(
            gateway.clone(),
            shop.orders.clone(),
            SqlxUserRepository::boxed(shop.pool.clone()),
            email,
            config,
        );
        Fixture {
            shop,
            payments,
            gateway,
            mailer,
        }
    }

    fn event(id: &str, event_type: &str, object: serde_json::Value) -> Vec<u8> {
        serde_json::to_vec(&json!({
            "id": id,
            "type": event_type,
            "data": { "object": object }
        }))
        .unwrap()
    }

    async fn deliver(f: &Fixture, payload: &[u8]) -> ServiceResult<WebhookOutcome> {
        let header = signature_header(payload, SECRET, Utc::now().timestamp());
        f.payments.handle_webhook(payload, Some(&header)).await
    }

    async fn stock(f: &Fixture, product_id: i64) -> i64 {
        sqlx::query_scalar("SELECT stock_quantity FROM products WHERE id = ?")
            .bind(product_id)
            .fetch_one(f.shop.pool.sqlite())
            .await
            .unwrap()
    }

    #[test]
    fn test_signature_accepts_valid() {
        let payload = br#"{"id":"evt_1"}"#;
        let header = signature_header(payload, SECRET, 1_700_000_000);
        assert!(verify_signature(payload, &header, SECRET, 300, 1_700_000_100).is_ok());
    }

    #[test]
    fn test_signature_accepts_any_v1() {
        let payload = b"{}";
        let good = signature_header(payload, SECRET, 1_700_000_000);
        let v1 = good.split_once(",v1=").unwrap().1;
        let header = format!("t=1700000000,v1={},v1={}", "00".repeat(32), v1);
        assert!(verify_signature(payload, &header, SECRET, 300, 1_700_000_000).is_ok());
    }

    #[test]
    fn test_signature_rejects_tampering() {
        let header = signature_header(b"{\"amount\":100}", SECRET, 1_700_000_000);
        assert!(verify_signature(b"{\"amount\":1}", &header, SECRET, 300, 1_700_000_000).is_err());
        assert!(verify_signature(b"{\"amount\":100}", &header, "whsec_other", 300, 1_700_000_000).is_err());
        assert!(verify_signature(b"{}", "garbage", SECRET, 300, 1_700_000_000).is_err());
        assert!(verify_signature(b"{}", "t=1700000000,v1=zz", SECRET, 300, 1_700_000_000).is_err());
    }

    #[test]
    fn test_signature_enforces_tolerance() {
        let header = signature_header(b"{}", SECRET, 1_700_000_000);
        assert!(verify_signature(b"{}", &header, SECRET, 300, 1_700_000_300).is_ok());
        assert!(matches!(
            verify_signature(b"{}", &header, SECRET, 300, 1_700_000_301),
            Err(ServiceError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_create_intent_stores_pending_order() {
        let f = fixture().await;
        f.shop.cart.add(1, 1, 2).await.unwrap();

        let session = f
            .payments
            .create_intent(1, "one@example.com", details())
            .await
            .unwrap();
        assert_eq!(session.payment_intent_id, "pi_test_1");
        assert_eq!(session.client_secret, "pi_test_1_secret");
        assert_eq!(session.amount, 241.0);

        let requests = f.gateway.requests.lock().unwrap().clone();
        assert_eq!(requests[0].amount_cents, 24_100);
        assert_eq!(requests[0].currency, "usd");
        assert_eq!(requests[0].user_id, 1);

        let order = f.shop.orders.get(session.order_id, 1, false).await.unwrap();
        assert_eq!(order.order.payment_intent_id.as_deref(), Some("pi_test_1"));
        assert_eq!(order.order.payment_status, PaymentStatus::Pending);
    }

    #[tokio::test]
    async fn test_create_intent_uses_account_email_and_validates_first() {
        let f = fixture().await;
        f.shop.cart.add(1, 1, 1).await.unwrap();

        let mut no_address = details();
        no_address.shipping_address = ShippingAddress::default();
        assert!(matches!(
            f.payments.create_intent(1, "one@example.com", no_address).await,
            Err(ServiceError::Validation(_))
        ));
        assert!(f.gateway.requests.lock().unwrap().is_empty());

        let mut no_email = details();
        no_email.email = String::new();
        let session = f
            .payments
            .create_intent(1, "One@Example.com", no_email)
            .await
            .unwrap();
        let order = f.shop.orders.get(session.order_id, 1, false).await.unwrap();
        assert_eq!(order.order.email, "one@example.com");
    }

    #[tokio::test]
    async fn test_create_intent_empty_cart_and_gateway_failure() {
        let f = fixture().await;
        assert!(matches!(
            f.payments.create_intent(1, "one@example.com", details()).await,
            Err(ServiceError::Validation(_))
        ));

        let failing = fixture_with(FakeGateway {
            fail: true,
            ..FakeGateway::default()
        })
        .await;
        failing.shop.cart.add(1, 1, 1).await.unwrap();
        assert!(matches!(
            failing.payments.create_intent(1, "one@example.com", details()).await,
            Err(ServiceError::Upstream(_))
        ));
        let orders = failing
            .shop
            .orders
            .list_for_user(1, &crate::models::ListParams::default())
            .await
            .unwrap();
        assert_eq!(orders.total, 0);
    }

    #[tokio::test]
    async fn test_succeeded_webhook_settles_order_once() {
        let f = fixture().await;
        f.shop.cart.add(1, 1, 2).await.unwrap();
        let session = f
            .payments
            .create_intent(1, "one@example.com", details())
            .await
            .unwrap();

        let payload = event(
            "evt_1",
            EVENT_PAYMENT_SUCCEEDED,
            json!({ "id": session.payment_intent_id, "amount": 24_100, "metadata": { "user_id": "1" } }),
        );
        assert_eq!(deliver(&f, &payload).await.unwrap(), WebhookOutcome::Processed);

        let order = f.shop.orders.get(session.order_id, 1, false).await.unwrap();
        assert_eq!(order.order.payment_status, PaymentStatus::Paid);
        assert_eq!(order.order.status, OrderStatus::Processing);
        assert_eq!(stock(&f, 1).await, 8);
        assert!(f.shop.cart.summary(1).await.unwrap().items.is_empty());

        // Redelivery changes nothing
        assert_eq!(deliver(&f, &payload).await.unwrap(), WebhookOutcome::Duplicate);
        assert_eq!(stock(&f, 1).await, 8);

        for _ in 0..50 {
            if !f.mailer.recipients().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(f.mailer.recipients(), vec!["one@example.com".to_string()]);
    }

    #[tokio::test]
    async fn test_payment_for_cancelled_order_is_not_fulfilled() {
        let f = fixture().await;
        f.shop.cart.add(1, 1, 2).await.unwrap();
        let session = f
            .payments
            .create_intent(1, "one@example.com", details())
            .await
            .unwrap();
        f.shop.orders.cancel(session.order_id, 1).await.unwrap();
        let before = stock(&f, 1).await;

        let payload = event(
            "evt_late",
            EVENT_PAYMENT_SUCCEEDED,
            json!({ "id": session.payment_intent_id, "amount": 24_100, "metadata": { "user_id": "1" } }),
        );
        assert_eq!(deliver(&f, &payload).await.unwrap(), WebhookOutcome::Processed);

        let order = f.shop.orders.get(session.order_id, 1, false).await.unwrap();
        assert_eq!(order.order.status, OrderStatus::Cancelled);
        assert_eq!(order.order.payment_status, PaymentStatus::Paid);
        assert_eq!(stock(&f, 1).await, before);
        assert_eq!(f.shop.cart.summary(1).await.unwrap().items.len(), 1);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(f.mailer.recipients().is_empty());
    }

    #[tokio::test]
    async fn test_succeeded_without_order_builds_from_cart() {
        let f = fixture().await;
        f.shop.cart.add(2, 2, 1).await.unwrap();

        let payload = event(
            "evt_2",
            EVENT_PAYMENT_SUCCEEDED,
            json!({
                "id": "pi_external",
                "amount": 29_500,
                "metadata": { "user_id": "2" },
                "shipping": {
                    "name": "Sam Buyer",
                    "address": { "line1": "2 Elm St", "city": "Shelbyville", "postal_code": "62565", "country": "US" }
                }
            }),
        );
        assert_eq!(deliver(&f, &payload).await.unwrap(), WebhookOutcome::Processed);

        let orders = f
            .shop
            .orders
            .list_for_user(2, &crate::models::ListParams::default())
            .await
            .unwrap();
        assert_eq!(orders.total, 1);
        let order = &orders.items[0];
        assert_eq!(order.email, "two@example.com");
        assert_eq!(order.payment_status, PaymentStatus::Paid);
        assert_eq!(order.shipping_address.city, "Shelbyville");
        assert_eq!(stock(&f, 2).await, 2);
    }

    #[tokio::test]
    async fn test_succeeded_for_unknown_user_is_ignored() {
        let f = fixture().await;
        let payload = event(
            "evt_3",
            EVENT_PAYMENT_SUCCEEDED,
            json!({ "id": "pi_orphan", "amount": 100, "metadata": { "user_id": "999" } }),
        );
        assert_eq!(deliver(&f, &payload).await.unwrap(), WebhookOutcome::Ignored);
        assert_eq!(deliver(&f, &payload).await.unwrap(), WebhookOutcome::Duplicate);
    }

    #[tokio::test]
    async fn test_failed_webhook_marks_payment_failed() {
        let f = fixture().await;
        f.shop.cart.add(1, 1, 1).await.unwrap();
        let session = f
            .payments
            .create_intent(1, "one@example.com", details())
            .await
            .unwrap();

        let payload = event(
            "evt_4",
            EVENT_PAYMENT_FAILED,
            json!({ "id": session.payment_intent_id, "amount": 13_300 }),
        );
        assert_eq!(deliver(&f, &payload).await.unwrap(), WebhookOutcome::Processed);
        let order = f.shop.orders.get(session.order_id, 1, false).await.unwrap();
        assert_eq!(order.order.payment_status, PaymentStatus::Failed);
        assert_eq!(stock(&f, 1).await, 10);
    }

    #[tokio::test]
    async fn test_other_events_and_bad_signatures() {
        let f = fixture().await;
        let payload = event("evt_5", "charge.refunded", json!({ "id": "ch_1" }));
        assert_eq!(deliver(&f, &payload).await.unwrap(), WebhookOutcome::Ignored);

        assert!(matches!(
            f.payments.handle_webhook(&payload, None).await,
            Err(ServiceError::Validation(_))
        ));
        let stale = signature_header(&payload, SECRET, Utc::now().timestamp() - 3600);
        assert!(matches!(
            f.payments.handle_webhook(&payload, Some(&stale)).await,
            Err(ServiceError::Validation(_))
        ));
    }
}
