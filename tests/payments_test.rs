mod common;

use chrono::Utc;
use common::{
    as_admin, assert_failure, clear_payments, connect, create_org, delete_org, json_ok_response,
    setup, setup_with_stripe, with_tenant_schema,
};
use diesel::prelude::*;
use hmac::{Hmac, Mac};
use rocket::http::{ContentType, Header, Status};
use rocket::local::blocking::Client;
use rocket::tokio::runtime::Runtime;
use serde_json::{json, Value};
use serial_test::serial;
use sha2::Sha256;
use tenantshop::model::{PaymentProvider, PaymentTransaction};
use tenantshop::payments::{AccountCreated, AccountFees, AccountStatus, IntentCreated, WebhookAck};
use tenantshop::schema::tenant::payment_providers::dsl::payment_providers;
use tenantshop::schema::tenant::payment_transactions::dsl as pts;
use uuid::Uuid;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const WEBHOOK_SECRET: &str = "whsec_test";

fn signature(payload: &str) -> Header<'static> {
    let timestamp = Utc::now().timestamp();
    let mut mac = Hmac::<Sha256>::new_from_slice(WEBHOOK_SECRET.as_bytes()).unwrap();
    mac.update(format!("{}.{}", timestamp, payload).as_bytes());
    Header::new(
        "Stripe-Signature",
        format!("t={},v1={}", timestamp, hex::encode(mac.finalize().into_bytes())),
    )
}

#[test]
fn intent_validation() {
    let client = setup();
    let org_id = Uuid::new_v4().to_string();
    let order_id = Uuid::new_v4().to_string();

    let error = assert_failure(
        client
            .post("/api/payments/intents")
            .header(ContentType::JSON)
            .body(json!({"organizationId": org_id, "orderId": order_id}).to_string()),
        Status::BadRequest,
    );
    assert_eq!("Missing required field: amount", error);

    let error = assert_failure(
        client
            .post("/api/payments/intents")
            .header(ContentType::JSON)
            .body(json!({"organizationId": org_id, "orderId": order_id, "amount": 0}).to_string()),
        Status::BadRequest,
    );
    assert_eq!("Amount must be positive", error);

    assert_failure(
        client
            .post("/api/payments/intents")
            .header(ContentType::JSON)
            .body(json!({"organizationId": "acme", "orderId": order_id, "amount": 100}).to_string()),
        Status::BadRequest,
    );
}

#[test]
#[serial]
fn organization_without_tenant_database() {
    let client = setup();
    let org = create_org(&client, "No Db", "no-db-shop", None);

    let error = assert_failure(
        client
            .post("/api/payments/intents")
            .header(ContentType::JSON)
            .body(
                json!({
                    "organizationId": org.id.to_string(),
                    "orderId": Uuid::new_v4().to_string(),
                    "amount": 1000
                })
                .to_string(),
            ),
        Status::NotFound,
    );
    assert_eq!("Tenant database not found", error);

    assert_failure(
        client.get(format!("/api/payments/accounts/{}/acct_123", org.id)),
        Status::NotFound,
    );

    delete_org(&client, &org);
}

#[test]
fn account_creation_validation() {
    let client = setup();
    let error = assert_failure(
        client
            .post("/api/payments/accounts")
            .header(ContentType::JSON)
            .body(json!({"organizationId": Uuid::new_v4().to_string()}).to_string()),
        Status::BadRequest,
    );
    assert_eq!("Missing required field: email", error);

    assert_failure(
        client
            .post("/api/payments/accounts/acct_123/link")
            .header(ContentType::JSON)
            .body(json!({"returnUrl": "https://shop.test/done"}).to_string()),
        Status::BadRequest,
    );
}

#[test]
fn webhook_signatures() {
    let client = setup();
    let payload = json!({
        "id": "evt_1",
        "type": "payment_intent.succeeded",
        "data": {"object": {"id": "pi_1"}}
    })
    .to_string();

    let response = client
        .post("/api/payments/webhook")
        .body(payload.clone())
        .dispatch();
    assert_eq!(response.status(), Status::BadRequest);

    let error = assert_failure(
        client
            .post("/api/payments/webhook")
            .header(Header::new("Stripe-Signature", "t=1,v1=deadbeef"))
            .body(payload.clone()),
        Status::BadRequest,
    );
    assert_eq!("Invalid webhook signature", error);

    let ack: WebhookAck = json_ok_response(
        client
            .post("/api/payments/webhook")
            .header(signature(&payload))
            .body(payload),
    );
    assert!(ack.received);
}

#[test]
fn account_update_without_organization_is_acknowledged() {
    let client = setup();
    let payload = json!({
        "id": "evt_2",
        "type": "account.updated",
        "data": {"object": {"id": "acct_1", "charges_enabled": true}}
    })
    .to_string();
    let ack: WebhookAck = json_ok_response(
        client
            .post("/api/payments/webhook")
            .header(signature(&payload))
            .body(payload),
    );
    assert!(ack.received);
}

/// Stripe stand-in; the runtime only drives mock registration.
struct FakeStripe {
    runtime: Runtime,
    server: MockServer,
}

impl FakeStripe {
    fn start() -> Self {
        let runtime = Runtime::new().unwrap();
        let server = runtime.block_on(MockServer::start());
        FakeStripe { runtime, server }
    }

    fn respond(&self, mock: Mock) {
        self.runtime.block_on(mock.mount(&self.server));
    }
}

fn account_json(account_id: &str, org_id: Uuid, enabled: bool) -> Value {
    json!({
        "id": account_id,
        "charges_enabled": enabled,
        "payouts_enabled": enabled,
        "details_submitted": enabled,
        "metadata": {"organization_id": org_id.to_string()}
    })
}

fn account_updated(client: &Client, account: Value) {
    let payload = json!({
        "id": format!("evt_{}", Uuid::new_v4().simple()),
        "type": "account.updated",
        "data": {"object": account}
    })
    .to_string();
    let ack: WebhookAck = json_ok_response(
        client
            .post("/api/payments/webhook")
            .header(signature(&payload))
            .body(payload),
    );
    assert!(ack.received);
}

fn account_status(client: &Client, org_id: Uuid, account_id: &str) -> AccountStatus {
    json_ok_response(client.get(format!("/api/payments/accounts/{}/{}", org_id, account_id)))
}

fn intent_request(org_id: Uuid, order_id: Uuid, amount: i64) -> String {
    json!({
        "organizationId": org_id.to_string(),
        "orderId": order_id.to_string(),
        "amount": amount,
        "customerEmail": "buyer@example.com"
    })
    .to_string()
}

#[test]
#[serial]
fn connected_account_to_payment_intent() {
    let stripe = FakeStripe::start();
    let client = setup_with_stripe(&stripe.server.uri());
    let org = create_org(&client, "Paying", "paying-shop", None);
    with_tenant_schema(&client, org.id);
    let mut c = connect();
    clear_payments(&mut c);

    stripe.respond(
        Mock::given(method("POST"))
            .and(path("/v1/accounts"))
            .and(header("authorization", "Bearer sk_test_unused"))
            .and(body_string_contains("type=express"))
            .and(body_string_contains(&format!(
                "metadata%5Borganization_id%5D={}",
                org.id
            )))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(account_json("acct_flow", org.id, false)),
            ),
    );

    // creating the account twice keeps a single provider row
    for _ in 0..2 {
        let created: AccountCreated = json_ok_response(
            client
                .post("/api/payments/accounts")
                .header(ContentType::JSON)
                .body(
                    json!({"organizationId": org.id.to_string(), "email": "owner@paying.test"})
                        .to_string(),
                ),
        );
        assert_eq!("acct_flow", created.account_id);
        assert!(!created.charges_enabled);
    }
    let providers: Vec<PaymentProvider> = payment_providers.load(&mut c).unwrap();
    assert_eq!(1, providers.len());
    assert!(providers[0].is_primary);
    assert!(!providers[0].is_active);
    assert_eq!(1.0, providers[0].platform_fee_percentage);
    assert_eq!(0.0, providers[0].platform_fee_fixed);

    let status = account_status(&client, org.id, "acct_flow");
    assert_eq!("pending", status.status);
    assert!(!status.onboarding_complete);

    account_updated(&client, account_json("acct_flow", org.id, true));
    let status = account_status(&client, org.id, "acct_flow");
    assert_eq!("active", status.status);
    assert!(status.charges_enabled);
    assert!(status.onboarding_complete);

    let schedule = json!({"platformFeePercentage": 2.5, "platformFeeFixed": 0.3}).to_string();
    assert_failure(
        client
            .put(format!("/api/payments/accounts/{}/acct_flow/fees", org.id))
            .header(ContentType::JSON)
            .body(schedule.clone()),
        Status::Unauthorized,
    );
    assert_failure(
        as_admin(
            client
                .put(format!("/api/payments/accounts/{}/acct_flow/fees", org.id))
                .header(ContentType::JSON)
                .body(
                    json!({"platformFeePercentage": 120.0, "platformFeeFixed": 0.0}).to_string(),
                ),
        ),
        Status::BadRequest,
    );
    let fees: AccountFees = json_ok_response(as_admin(
        client
            .put(format!("/api/payments/accounts/{}/acct_flow/fees", org.id))
            .header(ContentType::JSON)
            .body(schedule),
    ));
    assert_eq!(2.5, fees.platform_fee_percentage);
    assert_eq!(0.3, fees.platform_fee_fixed);

    stripe.respond(
        Mock::given(method("POST"))
            .and(path("/v1/payment_intents"))
            .and(body_string_contains("amount=10000"))
            .and(body_string_contains("application_fee_amount=280"))
            .and(body_string_contains("transfer_data%5Bdestination%5D=acct_flow"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "pi_flow",
                "client_secret": "pi_flow_secret_1",
                "amount": 10000,
                "application_fee_amount": 280
            }))),
    );

    let order_id = Uuid::new_v4();
    let intent: IntentCreated = json_ok_response(
        client
            .post("/api/payments/intents")
            .header(ContentType::JSON)
            .body(intent_request(org.id, order_id, 10_000)),
    );
    assert_eq!("pi_flow", intent.payment_intent_id);
    assert_eq!("pi_flow_secret_1", intent.client_secret);
    assert_eq!(10_000, intent.amount);
    assert_eq!(280, intent.application_fee);

    let stored: PaymentTransaction = pts::payment_transactions
        .filter(pts::provider_transaction_id.eq("pi_flow"))
        .first(&mut c)
        .unwrap();
    assert_eq!(order_id, stored.order_id);
    assert_eq!(10_000, stored.amount);
    assert_eq!(280, stored.platform_fee);
    assert_eq!(9_720, stored.net_amount);
    assert_eq!("usd", stored.currency);
    assert_eq!("pending", stored.status);

    // charges disabled again: no active provider is left
    account_updated(&client, account_json("acct_flow", org.id, false));
    let error = assert_failure(
        client
            .post("/api/payments/intents")
            .header(ContentType::JSON)
            .body(intent_request(org.id, Uuid::new_v4(), 500)),
        Status::NotFound,
    );
    assert_eq!("No active payment provider", error);

    clear_payments(&mut c);
    delete_org(&client, &org);
}

#[test]
#[serial]
fn stripe_errors_surface_as_bad_gateway() {
    let stripe = FakeStripe::start();
    let client = setup_with_stripe(&stripe.server.uri());
    let org = create_org(&client, "Declined", "declined-shop", None);
    with_tenant_schema(&client, org.id);

    stripe.respond(
        Mock::given(method("POST"))
            .and(path("/v1/accounts"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": {"message": "Country is not supported"}
            }))),
    );
    let error = assert_failure(
        client
            .post("/api/payments/accounts")
            .header(ContentType::JSON)
            .body(
                json!({
                    "organizationId": org.id.to_string(),
                    "email": "owner@declined.test",
                    "country": "ZZ"
                })
                .to_string(),
            ),
        Status::BadGateway,
    );
    assert_eq!("Country is not supported", error);

    delete_org(&client, &org);
}
