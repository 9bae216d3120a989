use chrono::Utc;
use diesel::pg::PgConnection;
use diesel::prelude::*;
use rocket::http::Status;
use rocket::request::{FromRequest, Outcome, Request};
use rocket::serde::json::Json;
use rocket::{Route, State};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::base::*;
use crate::model::{PaymentProvider, PaymentTransaction};
use crate::schema::tenant::payment_providers as pps;
use crate::schema::tenant::payment_providers::dsl::payment_providers;
use crate::schema::tenant::payment_transactions::dsl::payment_transactions;
use crate::stripe::{self, AccountRequest, ConnectAccount, PaymentIntentRequest, StripeClient};
use crate::tenant_db::{self, TenantPoolSettings};

/// Platform fee in minor units: `round(amount * pct / 100 + fixed * 100)`.
///
/// `fixed` is expressed in major units of the currency.
pub fn platform_fee(amount: i64, percentage: f64, fixed: f64) -> i64 {
    (amount as f64 * percentage / 100.0 + fixed * 100.0).round() as i64
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeBreakdown {
    pub amount: i64,
    pub platform_fee: i64,
    pub net_amount: i64,
}

impl FeeBreakdown {
    pub fn compute(amount: i64, provider: &PaymentProvider) -> Self {
        let fee = platform_fee(
            amount,
            provider.platform_fee_percentage,
            provider.platform_fee_fixed,
        );
        FeeBreakdown {
            amount,
            platform_fee: fee,
            net_amount: amount - fee,
        }
    }
}

/// Percentage of the amount plus a fixed part in major units.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FeeSchedule {
    pub platform_fee_percentage: f64,
    pub platform_fee_fixed: f64,
}

impl FeeSchedule {
    pub fn from_config(config: &Config) -> Self {
        FeeSchedule {
            platform_fee_percentage: config.platform_fee_percentage,
            platform_fee_fixed: config.platform_fee_fixed,
        }
    }

    pub fn validate(self) -> ShopResult<Self> {
        let pct = self.platform_fee_percentage;
        if !pct.is_finite() || !(0.0..=100.0).contains(&pct) {
            return Err(ShopError::validation("Fee percentage must be between 0 and 100"));
        }
        let fixed = self.platform_fee_fixed;
        if !fixed.is_finite() || fixed < 0.0 {
            return Err(ShopError::validation("Fixed fee must not be negative"));
        }
        Ok(self)
    }
}

fn provider_status(account: &ConnectAccount) -> &'static str {
    if account.charges_enabled {
        "active"
    } else {
        "pending"
    }
}

/// Inserts or refreshes the provider row of a connected account.
///
/// The first account of a tenant becomes its primary provider. `fees` only
/// applies to new rows; an existing schedule is kept.
pub fn upsert_provider(
    c: &mut PgConnection,
    account: &ConnectAccount,
    fees: FeeSchedule,
) -> QueryResult<PaymentProvider> {
    c.transaction(|c| {
        let primaries: i64 = payment_providers
            .filter(pps::is_primary.eq(true))
            .filter(pps::stripe_account_id.ne(&account.id))
            .count()
            .get_result(c)?;
        let now = Utc::now();
        let provider = PaymentProvider {
            id: Uuid::new_v4(),
            provider: String::from("stripe"),
            stripe_account_id: account.id.clone(),
            status: String::from(provider_status(account)),
            is_active: account.charges_enabled,
            is_primary: primaries == 0,
            charges_enabled: account.charges_enabled,
            payouts_enabled: account.payouts_enabled,
            details_submitted: account.details_submitted,
            platform_fee_percentage: fees.platform_fee_percentage,
            platform_fee_fixed: fees.platform_fee_fixed,
            created: now,
            updated: now,
        };
        diesel::insert_into(payment_providers)
            .values(&provider)
            .on_conflict(pps::stripe_account_id)
            .do_update()
            .set((
                pps::status.eq(provider_status(account)),
                pps::is_active.eq(account.charges_enabled),
                pps::charges_enabled.eq(account.charges_enabled),
                pps::payouts_enabled.eq(account.payouts_enabled),
                pps::details_submitted.eq(account.details_submitted),
                pps::updated.eq(now),
            ))
            .get_result(c)
    })
}

/// Refreshes an existing provider row from an account update; `None` if unknown.
pub fn sync_provider(
    c: &mut PgConnection,
    account: &ConnectAccount,
) -> QueryResult<Option<PaymentProvider>> {
    diesel::update(payment_providers.filter(pps::stripe_account_id.eq(&account.id)))
        .set((
            pps::status.eq(provider_status(account)),
            pps::is_active.eq(account.charges_enabled),
            pps::charges_enabled.eq(account.charges_enabled),
            pps::payouts_enabled.eq(account.payouts_enabled),
            pps::details_submitted.eq(account.details_submitted),
            pps::updated.eq(Utc::now()),
        ))
        .get_result(c)
        .optional()
}

/// Sets the fee schedule of a connected account; `None` if unknown.
pub fn set_fee_schedule(
    c: &mut PgConnection,
    account_id: &str,
    fees: FeeSchedule,
) -> QueryResult<Option<PaymentProvider>> {
    diesel::update(payment_providers.filter(pps::stripe_account_id.eq(account_id)))
        .set((
            pps::platform_fee_percentage.eq(fees.platform_fee_percentage),
            pps::platform_fee_fixed.eq(fees.platform_fee_fixed),
            pps::updated.eq(Utc::now()),
        ))
        .get_result(c)
        .optional()
}

pub fn primary_provider(c: &mut PgConnection) -> QueryResult<Option<PaymentProvider>> {
    payment_providers
        .filter(pps::is_active.eq(true))
        .filter(pps::is_primary.eq(true))
        .first(c)
        .optional()
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateAccountRequest {
    organization_id: Option<String>,
    email: Option<String>,
    country: Option<String>,
}

#[derive(Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct AccountCreated {
    pub success: bool,
    pub account_id: String,
    pub charges_enabled: bool,
}

#[post("/accounts", data = "<request>")]
async fn create_account(
    request: Json<CreateAccountRequest>,
    config: &State<Config>,
    stripe: &State<StripeClient>,
    conn: MainDbConn,
) -> ShopResult<Json<AccountCreated>> {
    let org_id = required_uuid(request.organization_id.as_deref(), "organizationId")?;
    let email = required_text(request.email.as_deref(), "email")?;
    let country = request
        .country
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .unwrap_or(&config.connect_country)
        .to_uppercase();

    let url = tenant_db::connection_for_organization(&conn, org_id, &config.encryption_key).await?;
    let org = org_id.to_string();
    let account = stripe
        .create_account(&AccountRequest {
            organization_id: &org,
            email,
            country: &country,
        })
        .await?;
    slog::info!(slog_scope::logger(), "created connect account"; "organization_id" => %org_id, "account_id" => &account.id);

    let settings = TenantPoolSettings::from(config.inner());
    let stored = account.clone();
    let fees = FeeSchedule::from_config(config.inner());
    tenant_db::with_tenant(url, settings, move |c| Ok(upsert_provider(c, &stored, fees)?)).await?;

    Ok(Json(AccountCreated {
        success: true,
        account_id: account.id,
        charges_enabled: account.charges_enabled,
    }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountLinkRequest {
    refresh_url: Option<String>,
    return_url: Option<String>,
}

#[derive(Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct OnboardingLink {
    pub success: bool,
    pub url: String,
    pub expires_at: i64,
}

#[post("/accounts/<account>/link", data = "<request>")]
async fn create_onboarding_link(
    account: &str,
    request: Json<AccountLinkRequest>,
    stripe: &State<StripeClient>,
) -> ShopResult<Json<OnboardingLink>> {
    let refresh_url = required_text(request.refresh_url.as_deref(), "refreshUrl")?;
    let return_url = required_text(request.return_url.as_deref(), "returnUrl")?;
    let link = stripe
        .create_account_link(account, refresh_url, return_url)
        .await?;
    Ok(Json(OnboardingLink {
        success: true,
        url: link.url,
        expires_at: link.expires_at,
    }))
}

#[derive(Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct AccountStatus {
    pub success: bool,
    pub account_id: String,
    pub status: String,
    pub charges_enabled: bool,
    pub payouts_enabled: bool,
    pub details_submitted: bool,
    pub onboarding_complete: bool,
}

#[get("/accounts/<org>/<account>")]
async fn account_status(
    org: &str,
    account: &str,
    config: &State<Config>,
    conn: MainDbConn,
) -> ShopResult<Json<AccountStatus>> {
    let org_id = required_uuid(Some(org), "organizationId")?;
    let url = tenant_db::connection_for_organization(&conn, org_id, &config.encryption_key).await?;
    let account_id = String::from(account);
    let provider = tenant_db::with_tenant(url, TenantPoolSettings::from(config.inner()), move |c| {
        Ok(payment_providers
            .filter(pps::stripe_account_id.eq(&account_id))
            .first::<PaymentProvider>(c)
            .optional()?)
    })
    .await?
    .ok_or_else(|| ShopError::not_found("Payment account not found"))?;

    Ok(Json(AccountStatus {
        success: true,
        onboarding_complete: provider.onboarding_complete(),
        account_id: provider.stripe_account_id,
        status: provider.status,
        charges_enabled: provider.charges_enabled,
        payouts_enabled: provider.payouts_enabled,
        details_submitted: provider.details_submitted,
    }))
}

#[derive(Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct AccountFees {
    pub success: bool,
    pub account_id: String,
    pub platform_fee_percentage: f64,
    pub platform_fee_fixed: f64,
}

#[put("/accounts/<org>/<account>/fees", data = "<request>")]
async fn update_fees(
    _admin: AdminKey,
    org: &str,
    account: &str,
    request: Json<FeeSchedule>,
    config: &State<Config>,
    conn: MainDbConn,
) -> ShopResult<Json<AccountFees>> {
    let org_id = required_uuid(Some(org), "organizationId")?;
    let fees = request.into_inner().validate()?;
    let url = tenant_db::connection_for_organization(&conn, org_id, &config.encryption_key).await?;
    let account_id = String::from(account);
    let provider = tenant_db::with_tenant(url, TenantPoolSettings::from(config.inner()), move |c| {
        Ok(set_fee_schedule(c, &account_id, fees)?)
    })
    .await?
    .ok_or_else(|| ShopError::not_found("Payment account not found"))?;
    slog::info!(slog_scope::logger(), "fee schedule updated"; "organization_id" => %org_id, "account_id" => &provider.stripe_account_id, "percentage" => provider.platform_fee_percentage, "fixed" => provider.platform_fee_fixed);

    Ok(Json(AccountFees {
        success: true,
        account_id: provider.stripe_account_id,
        platform_fee_percentage: provider.platform_fee_percentage,
        platform_fee_fixed: provider.platform_fee_fixed,
    }))
}

/// Raw `Stripe-Signature` header.
pub struct StripeSignature<'r>(&'r str);

#[rocket::async_trait]
impl<'r> FromRequest<'r> for StripeSignature<'r> {
    type Error = ShopError;

    async fn from_request(request: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        match request.headers().get_one("Stripe-Signature") {
            Some(signature) => Outcome::Success(StripeSignature(signature)),
            None => Outcome::Error((
                Status::BadRequest,
                ShopError::validation("Missing Stripe-Signature header"),
            )),
        }
    }
}

#[derive(Serialize, Deserialize, Debug)]
pub struct WebhookAck {
    pub received: bool,
}

/// Onboarding completion arrives here as `account.updated` events.
#[post("/webhook", data = "<payload>")]
async fn webhook(
    payload: String,
    signature: StripeSignature<'_>,
    config: &State<Config>,
    conn: MainDbConn,
) -> ShopResult<Json<WebhookAck>> {
    stripe::verify_signature(
        &payload,
        signature.0,
        &config.stripe_webhook_secret,
        Utc::now().timestamp(),
    )?;
    let event: stripe::Event = serde_json::from_str(&payload)
        .map_err(|e| ShopError::validation(format!("Invalid event payload: {}", e)))?;
    let log = slog_scope::logger();
    if event.event_type != "account.updated" {
        slog::debug!(log, "ignored stripe event"; "event_id" => &event.id, "type" => &event.event_type);
        return Ok(Json(WebhookAck { received: true }));
    }

    let account: ConnectAccount = serde_json::from_value(event.data.object)
        .map_err(|e| ShopError::validation(format!("Invalid account payload: {}", e)))?;
    let org_id = match account
        .metadata
        .get("organization_id")
        .and_then(|o| Uuid::parse_str(o).ok())
    {
        Some(org_id) => org_id,
        None => {
            slog::warn!(log, "account update without organization"; "account_id" => &account.id);
            return Ok(Json(WebhookAck { received: true }));
        }
    };

    let url = tenant_db::connection_for_organization(&conn, org_id, &config.encryption_key).await?;
    let account_id = account.id.clone();
    let updated = tenant_db::with_tenant(url, TenantPoolSettings::from(config.inner()), move |c| {
        Ok(sync_provider(c, &account)?)
    })
    .await?;
    match updated {
        Some(provider) => slog::info!(log, "payment account updated"; "account_id" => &account_id, "status" => &provider.status, "onboarding_complete" => provider.onboarding_complete()),
        None => slog::warn!(log, "update for unknown payment account"; "account_id" => &account_id),
    }
    Ok(Json(WebhookAck { received: true }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateIntentRequest {
    organization_id: Option<String>,
    order_id: Option<String>,
    amount: Option<i64>,
    currency: Option<String>,
    customer_email: Option<String>,
    metadata: Option<HashMap<String, String>>,
}

#[derive(Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct IntentCreated {
    pub success: bool,
    pub client_secret: String,
    pub payment_intent_id: String,
    pub amount: i64,
    pub application_fee: i64,
}

#[post("/intents", data = "<request>")]
async fn create_payment_intent(
    request: Json<CreateIntentRequest>,
    config: &State<Config>,
    stripe: &State<StripeClient>,
    conn: MainDbConn,
) -> ShopResult<Json<IntentCreated>> {
    let org_id = required_uuid(request.organization_id.as_deref(), "organizationId")?;
    let order_id = required_uuid(request.order_id.as_deref(), "orderId")?;
    let amount = match request.amount {
        None => return Err(ShopError::validation("Missing required field: amount")),
        Some(a) if a <= 0 => return Err(ShopError::validation("Amount must be positive")),
        Some(a) => a,
    };
    let currency = request
        .currency
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .unwrap_or("usd")
        .to_lowercase();

    let url = tenant_db::connection_for_organization(&conn, org_id, &config.encryption_key).await?;
    let settings = TenantPoolSettings::from(config.inner());
    let provider = tenant_db::with_tenant(url.clone(), settings, |c| Ok(primary_provider(c)?))
        .await?
        .ok_or_else(|| ShopError::not_found("No active payment provider"))?;

    let fees = FeeBreakdown::compute(amount, &provider);
    let org = org_id.to_string();
    let order = order_id.to_string();
    let empty = HashMap::new();
    let intent = stripe
        .create_payment_intent(&PaymentIntentRequest {
            amount,
            currency: &currency,
            application_fee: fees.platform_fee,
            destination: &provider.stripe_account_id,
            customer_email: request.customer_email.as_deref(),
            organization_id: &org,
            order_id: &order,
            metadata: request.metadata.as_ref().unwrap_or(&empty),
        })
        .await?;

    let transaction = PaymentTransaction {
        id: Uuid::new_v4(),
        order_id,
        provider_id: provider.id,
        provider_transaction_id: intent.id.clone(),
        amount,
        platform_fee: fees.platform_fee,
        net_amount: fees.net_amount,
        currency,
        status: String::from("pending"),
        created: Utc::now(),
    };
    tenant_db::with_tenant(url, settings, move |c| {
        diesel::insert_into(payment_transactions)
            .values(&transaction)
            .execute(c)?;
        Ok(())
    })
    .await?;
    slog::info!(slog_scope::logger(), "created payment intent"; "organization_id" => %org_id, "order_id" => %order_id, "payment_intent" => &intent.id, "fee" => fees.platform_fee);

    Ok(Json(IntentCreated {
        success: true,
        client_secret: intent.client_secret,
        payment_intent_id: intent.id,
        amount,
        application_fee: fees.platform_fee,
    }))
}

pub fn routes() -> Vec<Route> {
    routes![
        create_account,
        create_onboarding_link,
        account_status,
        update_fees,
        webhook,
        create_payment_intent
    ]
}
