use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::schema::tenant::{payment_providers, payment_transactions};
use crate::schema::*;

#[derive(Queryable, Identifiable, Insertable, Serialize, Deserialize, Debug, Clone, PartialEq)]
#[diesel(table_name = organizations)]
#[serde(rename_all = "camelCase")]
pub struct Organization {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
    pub subdomain: Option<String>,
    pub domain: Option<String>,
    pub subscription_status: String,
    pub subscription_plan: String,
    pub created: DateTime<Utc>,
}

impl Organization {
    pub fn new<S: Into<String>>(name: S, slug: S) -> Self {
        Organization {
            id: Uuid::new_v4(),
            name: name.into(),
            slug: slug.into(),
            subdomain: None,
            domain: None,
            subscription_status: String::from("trialing"),
            subscription_plan: String::from("starter"),
            created: Utc::now(),
        }
    }
}

/// Partial update of an organization; `Some(None)` clears a nullable column.
#[derive(AsChangeset, Default, Debug)]
#[diesel(table_name = organizations)]
pub struct OrganizationChanges {
    pub name: Option<String>,
    pub subdomain: Option<Option<String>>,
    pub domain: Option<Option<String>>,
    pub subscription_status: Option<String>,
    pub subscription_plan: Option<String>,
}

impl OrganizationChanges {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.subdomain.is_none()
            && self.domain.is_none()
            && self.subscription_status.is_none()
            && self.subscription_plan.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TenantDbStatus {
    Provisioning,
    Active,
    Failed,
}

impl TenantDbStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TenantDbStatus::Provisioning => "provisioning",
            TenantDbStatus::Active => "active",
            TenantDbStatus::Failed => "failed",
        }
    }
}

/// A tenant database registry row, without its encrypted connection string.
#[derive(Queryable, Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct TenantDatabaseInfo {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub status: String,
    pub last_migration_synced: Option<String>,
    pub updated: DateTime<Utc>,
}

#[derive(Queryable, Identifiable, Insertable, AsChangeset, Serialize, Deserialize, Debug, Clone)]
#[diesel(table_name = store_settings, primary_key(organization_id))]
#[serde(rename_all = "camelCase")]
pub struct StoreSettings {
    pub organization_id: Uuid,
    pub store_name: String,
    pub contact_email: Option<String>,
    pub currency: String,
    pub country: String,
    pub updated: DateTime<Utc>,
}

#[derive(Queryable, Identifiable, Insertable, AsChangeset, Serialize, Deserialize, Debug, Clone)]
#[diesel(table_name = store_themes, primary_key(organization_id), treat_none_as_null = true)]
#[serde(rename_all = "camelCase")]
pub struct StoreTheme {
    pub organization_id: Uuid,
    pub primary_color: Option<String>,
    pub accent_color: Option<String>,
    pub font_family: Option<String>,
    pub logo_url: Option<String>,
    pub updated: DateTime<Utc>,
}

#[derive(Queryable, Identifiable, Insertable, Serialize, Deserialize, Debug, Clone, PartialEq)]
#[diesel(table_name = products)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub name: String,
    pub slug: String,
    pub description: Option<String>,
    pub price_cents: i64,
    pub currency: String,
    pub image_url: Option<String>,
    pub is_active: bool,
    pub created: DateTime<Utc>,
}

#[derive(Queryable, Identifiable, Insertable, Serialize, Deserialize, Debug, Clone, PartialEq)]
#[diesel(table_name = collections)]
#[serde(rename_all = "camelCase")]
pub struct Collection {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub name: String,
    pub slug: String,
    pub description: Option<String>,
    pub position: i32,
    pub is_active: bool,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = email_sends)]
pub struct EmailSend {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub tracking_id: String,
    pub recipient: String,
    pub subject: String,
    pub provider_message_id: Option<String>,
    pub sent: DateTime<Utc>,
}

#[derive(Queryable, Insertable, Serialize, Debug)]
#[diesel(table_name = email_events)]
#[serde(rename_all = "camelCase")]
pub struct EmailEvent {
    pub id: Uuid,
    pub tracking_id: String,
    pub event_type: String,
    pub url: Option<String>,
    pub created: DateTime<Utc>,
}

impl EmailEvent {
    pub fn new<S: Into<String>>(tracking_id: S, event_type: &str, url: Option<String>) -> Self {
        EmailEvent {
            id: Uuid::new_v4(),
            tracking_id: tracking_id.into(),
            event_type: String::from(event_type),
            url,
            created: Utc::now(),
        }
    }
}

#[derive(Queryable, Insertable, Serialize, Debug)]
#[diesel(table_name = marketing_events)]
#[serde(rename_all = "camelCase")]
pub struct MarketingEvent {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub user_id: Option<String>,
    pub session_id: Option<String>,
    pub event_type: String,
    pub event_data: serde_json::Value,
    pub created: DateTime<Utc>,
}

#[derive(Queryable, Identifiable, Insertable, Serialize, Deserialize, Debug, Clone)]
#[diesel(table_name = payment_providers)]
#[serde(rename_all = "camelCase")]
pub struct PaymentProvider {
    pub id: Uuid,
    pub provider: String,
    pub stripe_account_id: String,
    pub status: String,
    pub is_active: bool,
    pub is_primary: bool,
    pub charges_enabled: bool,
    pub payouts_enabled: bool,
    pub details_submitted: bool,
    pub platform_fee_percentage: f64,
    pub platform_fee_fixed: f64,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
}

impl PaymentProvider {
    pub fn onboarding_complete(&self) -> bool {
        self.details_submitted && self.charges_enabled
    }
}

#[derive(Queryable, Insertable, Serialize, Debug, Clone)]
#[diesel(table_name = payment_transactions)]
#[serde(rename_all = "camelCase")]
pub struct PaymentTransaction {
    pub id: Uuid,
    pub order_id: Uuid,
    pub provider_id: Uuid,
    pub provider_transaction_id: String,
    pub amount: i64,
    pub platform_fee: i64,
    pub net_amount: i64,
    pub currency: String,
    pub status: String,
    pub created: DateTime<Utc>,
}
