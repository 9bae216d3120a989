//! Minimal Stripe Connect client over the REST API.

use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::Sha256;
use std::collections::HashMap;
use std::time::Duration;

use crate::base::*;

type HmacSha256 = Hmac<Sha256>;

/// Accepted age of a webhook signature, in seconds.
pub const SIGNATURE_TOLERANCE: u64 = 300;

pub type Params = Vec<(String, String)>;

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct ConnectAccount {
    pub id: String,
    #[serde(default)]
    pub charges_enabled: bool,
    #[serde(default)]
    pub payouts_enabled: bool,
    #[serde(default)]
    pub details_submitted: bool,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct AccountLink {
    pub url: String,
    pub expires_at: i64,
}

#[derive(Deserialize, Debug, Clone)]
pub struct PaymentIntent {
    pub id: String,
    pub client_secret: String,
    pub amount: i64,
    pub application_fee_amount: Option<i64>,
}

pub struct AccountRequest<'a> {
    pub organization_id: &'a str,
    pub email: &'a str,
    pub country: &'a str,
}

pub struct PaymentIntentRequest<'a> {
    pub amount: i64,
    pub currency: &'a str,
    pub application_fee: i64,
    pub destination: &'a str,
    pub customer_email: Option<&'a str>,
    pub organization_id: &'a str,
    pub order_id: &'a str,
    pub metadata: &'a HashMap<String, String>,
}

fn param<K: Into<String>, V: Into<String>>(params: &mut Params, key: K, value: V) {
    params.push((key.into(), value.into()));
}

pub fn account_params(request: &AccountRequest) -> Params {
    let mut params = Params::new();
    param(&mut params, "type", "express");
    param(&mut params, "country", request.country);
    param(&mut params, "email", request.email);
    param(&mut params, "capabilities[card_payments][requested]", "true");
    param(&mut params, "capabilities[transfers][requested]", "true");
    param(&mut params, "settings[payouts][schedule][interval]", "daily");
    param(&mut params, "metadata[organization_id]", request.organization_id);
    params
}

pub fn account_link_params(account_id: &str, refresh_url: &str, return_url: &str) -> Params {
    let mut params = Params::new();
    param(&mut params, "account", account_id);
    param(&mut params, "refresh_url", refresh_url);
    param(&mut params, "return_url", return_url);
    param(&mut params, "type", "account_onboarding");
    params
}

pub fn payment_intent_params(request: &PaymentIntentRequest) -> Params {
    let mut params = Params::new();
    param(&mut params, "amount", request.amount.to_string());
    param(&mut params, "currency", request.currency.to_lowercase());
    param(&mut params, "application_fee_amount", request.application_fee.to_string());
    param(&mut params, "transfer_data[destination]", request.destination);
    param(&mut params, "automatic_payment_methods[enabled]", "true");
    if let Some(email) = request.customer_email {
        param(&mut params, "receipt_email", email);
    }
    let mut extra: Vec<(&String, &String)> = request
        .metadata
        .iter()
        .filter(|(k, _)| k.as_str() != "order_id" && k.as_str() != "organization_id")
        .collect();
    extra.sort();
    for (key, value) in extra {
        param(&mut params, format!("metadata[{}]", key), value.as_str());
    }
    param(&mut params, "metadata[order_id]", request.order_id);
    param(&mut params, "metadata[organization_id]", request.organization_id);
    params
}

pub struct StripeClient {
    http: Client,
    api_base: String,
    secret_key: String,
}

impl StripeClient {
    pub fn new<S: Into<String>>(api_base: S, secret_key: S) -> ShopResult<Self> {
        let http = Client::builder().timeout(Duration::from_secs(30)).build()?;
        Ok(StripeClient {
            http,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            secret_key: secret_key.into(),
        })
    }

    async fn post_form<T: DeserializeOwned>(&self, path: &str, params: &Params) -> ShopResult<T> {
        let response = self
            .http
            .post(format!("{}/v1/{}", self.api_base, path))
            .bearer_auth(&self.secret_key)
            .form(params)
            .send()
            .await?;
        let status = response.status();
        let body: Value = response.json().await?;
        if !status.is_success() {
            let message = body["error"]["message"]
                .as_str()
                .unwrap_or("Stripe request failed")
                .to_string();
            slog::warn!(slog_scope::logger(), "stripe request failed"; "path" => path, "status" => status.as_u16(), "error" => %message);
            return Err(ShopError::Upstream(message));
        }
        Ok(serde_json::from_value(body)?)
    }

    pub async fn create_account(&self, request: &AccountRequest<'_>) -> ShopResult<ConnectAccount> {
        self.post_form("accounts", &account_params(request)).await
    }

    pub async fn create_account_link(
        &self,
        account_id: &str,
        refresh_url: &str,
        return_url: &str,
    ) -> ShopResult<AccountLink> {
        self.post_form("account_links", &account_link_params(account_id, refresh_url, return_url))
            .await
    }

    pub async fn create_payment_intent(
        &self,
        request: &PaymentIntentRequest<'_>,
    ) -> ShopResult<PaymentIntent> {
        self.post_form("payment_intents", &payment_intent_params(request)).await
    }
}

/// Checks a `Stripe-Signature` header (`t=<ts>,v1=<hex>[,v1=...]`) against the payload.
///
/// Without a configured secret nothing is accepted.
pub fn verify_signature(payload: &str, header: &str, secret: &str, now: i64) -> ShopResult<()> {
    if secret.is_empty() {
        return Err(ShopError::Unauthorized);
    }
    let invalid = || ShopError::validation("Invalid webhook signature");
    let mut timestamp: Option<i64> = None;
    let mut signatures = vec![];
    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", v)) => timestamp = v.parse().ok(),
            Some(("v1", v)) => signatures.push(v),
            _ => {}
        }
    }
    let timestamp = timestamp.filter(|t| *t > 0).ok_or_else(invalid)?;
    let age = now.checked_sub(timestamp).map(i64::unsigned_abs).ok_or_else(invalid)?;
    if signatures.is_empty() || age > SIGNATURE_TOLERANCE {
        return Err(invalid());
    }
    let signed_payload = format!("{}.{}", timestamp, payload);
    for signature in signatures {
        let expected = match hex::decode(signature) {
            Ok(bytes) => bytes,
            Err(_) => continue,
        };
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| invalid())?;
        mac.update(signed_payload.as_bytes());
        if mac.verify_slice(&expected).is_ok() {
            return Ok(());
        }
    }
    Err(invalid())
}

#[derive(Deserialize, Debug)]
pub struct Event {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: EventData,
}

#[derive(Deserialize, Debug)]
pub struct EventData {
    pub object: Value,
}
