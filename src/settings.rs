use chrono::Utc;
use diesel::pg::PgConnection;
use diesel::prelude::*;
use rocket::http::Status;
use rocket::serde::json::Json;
use rocket::{Route, State};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::base::*;
use crate::catalog::Catalog;
use crate::model::{
    Organization, OrganizationChanges, StoreSettings, StoreTheme, TenantDatabaseInfo,
};
use crate::schema::organizations as orgs;
use crate::schema::organizations::dsl::organizations;
use crate::schema::store_settings as sts;
use crate::schema::store_settings::dsl::store_settings;
use crate::schema::store_themes as thms;
use crate::schema::store_themes::dsl::store_themes;
use crate::tenant_db;

/// `#rrggbb`
pub fn is_hex_color(value: &str) -> bool {
    value.len() == 7
        && value.starts_with('#')
        && value[1..].bytes().all(|b| b.is_ascii_hexdigit())
}

fn dns_label(value: &str, field: &str) -> ShopResult<String> {
    let value = value.trim().to_ascii_lowercase();
    if is_dns_label(&value) {
        Ok(value)
    } else {
        Err(ShopError::validation(format!("Invalid {}: {}", field, value)))
    }
}

/// Blank clears, anything else must be a DNS label.
fn optional_label(value: Option<&str>, field: &str) -> ShopResult<Option<Option<String>>> {
    match value.map(str::trim) {
        None => Ok(None),
        Some("") => Ok(Some(None)),
        Some(v) => dns_label(v, field).map(|l| Some(Some(l))),
    }
}

fn optional_color(value: Option<String>, field: &str) -> ShopResult<Option<String>> {
    match value.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(v) if is_hex_color(v) => Ok(Some(v.to_ascii_lowercase())),
        Some(v) => Err(ShopError::validation(format!("Invalid {}: {}", field, v))),
    }
}

fn blank_to_none(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub fn find_organization(c: &mut PgConnection, org_id: Uuid) -> QueryResult<Organization> {
    organizations.filter(orgs::id.eq(org_id)).first(c)
}

pub fn find_settings(c: &mut PgConnection, org_id: Uuid) -> QueryResult<Option<StoreSettings>> {
    store_settings
        .filter(sts::organization_id.eq(org_id))
        .first(c)
        .optional()
}

pub fn find_theme(c: &mut PgConnection, org_id: Uuid) -> QueryResult<Option<StoreTheme>> {
    store_themes
        .filter(thms::organization_id.eq(org_id))
        .first(c)
        .optional()
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewOrganization {
    name: Option<String>,
    slug: Option<String>,
    subdomain: Option<String>,
    domain: Option<String>,
}

/// Creates the organization, or returns the one already using the slug.
#[post("/", data = "<request>")]
async fn create_organization(
    _admin: AdminKey,
    request: Json<NewOrganization>,
    conn: MainDbConn,
) -> ShopResult<Json<Organization>> {
    let name = required_text(request.name.as_deref(), "name")?.to_owned();
    let slug = dns_label(required_text(request.slug.as_deref(), "slug")?, "slug")?;
    let subdomain = optional_label(request.subdomain.as_deref(), "subdomain")?.flatten();
    let domain = blank_to_none(request.domain.clone()).map(|d| d.to_ascii_lowercase());

    let org = conn
        .run(move |c| {
            let existing = organizations
                .filter(orgs::slug.eq(&slug))
                .first(c)
                .optional()?;
            match existing {
                Some(org) => Ok(org),
                None => {
                    let mut org = Organization::new(name, slug);
                    org.subdomain = subdomain;
                    org.domain = domain;
                    diesel::insert_into(organizations).values(&org).execute(c)?;
                    Ok::<Organization, diesel::result::Error>(org)
                }
            }
        })
        .await?;
    slog::info!(slog_scope::logger(), "organization ready"; "organization_id" => %org.id, "slug" => &org.slug);
    Ok(Json(org))
}

#[get("/count")]
async fn count_organizations(_admin: AdminKey, conn: MainDbConn) -> ShopResult<Json<i64>> {
    let cnt = conn.run(|c| organizations.count().get_result(c)).await?;
    Ok(Json(cnt))
}

#[get("/?<limit>&<offset>")]
async fn get_organizations(
    _admin: AdminKey,
    limit: Option<usize>,
    offset: Option<i64>,
    conn: MainDbConn,
) -> ShopResult<Json<Vec<Organization>>> {
    let real_limit = limit.unwrap_or(10);
    let real_offset = offset.unwrap_or(0);

    let orgs = conn
        .run(move |c| {
            organizations
                .order(orgs::name)
                .limit(real_limit as i64)
                .offset(real_offset)
                .load(c)
        })
        .await?;
    Ok(Json(orgs))
}

#[get("/<org>")]
async fn get_organization(
    _admin: AdminKey,
    org: &str,
    conn: MainDbConn,
) -> ShopResult<Json<Organization>> {
    let org_id = required_uuid(Some(org), "organization id")?;
    let org = conn.run(move |c| find_organization(c, org_id)).await?;
    Ok(Json(org))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrganizationUpdate {
    name: Option<String>,
    subdomain: Option<String>,
    domain: Option<String>,
    subscription_status: Option<String>,
    subscription_plan: Option<String>,
}

impl OrganizationUpdate {
    fn changes(&self) -> ShopResult<OrganizationChanges> {
        Ok(OrganizationChanges {
            name: blank_to_none(self.name.clone()),
            subdomain: optional_label(self.subdomain.as_deref(), "subdomain")?,
            domain: self
                .domain
                .as_deref()
                .map(|d| Some(d.trim().to_ascii_lowercase()).filter(|d| !d.is_empty())),
            subscription_status: blank_to_none(self.subscription_status.clone()),
            subscription_plan: blank_to_none(self.subscription_plan.clone()),
        })
    }
}

#[put("/<org>", data = "<request>")]
async fn update_organization(
    _admin: AdminKey,
    org: &str,
    request: Json<OrganizationUpdate>,
    conn: MainDbConn,
) -> ShopResult<Json<Organization>> {
    let org_id = required_uuid(Some(org), "organization id")?;
    let changes = request.changes()?;
    let org = conn
        .run(move |c| {
            let target = organizations.filter(orgs::id.eq(org_id));
            if changes.is_empty() {
                target.first(c)
            } else {
                diesel::update(target).set(&changes).get_result(c)
            }
        })
        .await?;
    Ok(Json(org))
}

#[delete("/<org>")]
async fn delete_organization(
    _admin: AdminKey,
    org: &str,
    catalog: &State<Catalog>,
    conn: MainDbConn,
) -> ShopResult<Status> {
    let org_id = required_uuid(Some(org), "organization id")?;
    conn.run(move |c| diesel::delete(organizations.filter(orgs::id.eq(org_id))).execute(c))
        .await?;
    catalog.invalidate(org_id);
    Ok(Status::NoContent)
}

#[get("/<org>/settings")]
async fn get_settings(
    _admin: AdminKey,
    org: &str,
    conn: MainDbConn,
) -> ShopResult<Json<StoreSettings>> {
    let org_id = required_uuid(Some(org), "organization id")?;
    let settings = conn
        .run(move |c| -> ShopResult<StoreSettings> {
            let org = find_organization(c, org_id)?;
            Ok(find_settings(c, org_id)?.unwrap_or_else(|| StoreSettings {
                organization_id: org.id,
                store_name: org.name,
                contact_email: None,
                currency: String::from("usd"),
                country: String::from("US"),
                updated: org.created,
            }))
        })
        .await?;
    Ok(Json(settings))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsUpdate {
    store_name: Option<String>,
    contact_email: Option<String>,
    currency: Option<String>,
    country: Option<String>,
}

impl SettingsUpdate {
    fn into_settings(self, org_id: Uuid) -> ShopResult<StoreSettings> {
        let store_name = required_text(self.store_name.as_deref(), "storeName")?.to_owned();
        let currency = self
            .currency
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .unwrap_or("usd")
            .to_ascii_lowercase();
        if currency.len() != 3 || !currency.bytes().all(|b| b.is_ascii_lowercase()) {
            return Err(ShopError::validation(format!("Invalid currency: {}", currency)));
        }
        let country = self
            .country
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .unwrap_or("US")
            .to_ascii_uppercase();
        if country.len() != 2 || !country.bytes().all(|b| b.is_ascii_uppercase()) {
            return Err(ShopError::validation(format!("Invalid country: {}", country)));
        }
        Ok(StoreSettings {
            organization_id: org_id,
            store_name,
            contact_email: blank_to_none(self.contact_email),
            currency,
            country,
            updated: Utc::now(),
        })
    }
}

#[put("/<org>/settings", data = "<request>")]
async fn update_settings(
    _admin: AdminKey,
    org: &str,
    request: Json<SettingsUpdate>,
    conn: MainDbConn,
) -> ShopResult<Json<StoreSettings>> {
    let org_id = required_uuid(Some(org), "organization id")?;
    let settings = request.into_inner().into_settings(org_id)?;
    let saved = conn
        .run(move |c| -> ShopResult<StoreSettings> {
            find_organization(c, org_id)?;
            Ok(diesel::insert_into(store_settings)
                .values(&settings)
                .on_conflict(sts::organization_id)
                .do_update()
                .set(&settings)
                .get_result(c)?)
        })
        .await?;
    Ok(Json(saved))
}

#[get("/<org>/theme")]
async fn get_theme(_admin: AdminKey, org: &str, conn: MainDbConn) -> ShopResult<Json<StoreTheme>> {
    let org_id = required_uuid(Some(org), "organization id")?;
    let theme = conn
        .run(move |c| -> ShopResult<StoreTheme> {
            let org = find_organization(c, org_id)?;
            Ok(find_theme(c, org_id)?.unwrap_or_else(|| StoreTheme {
                organization_id: org.id,
                primary_color: None,
                accent_color: None,
                font_family: None,
                logo_url: None,
                updated: org.created,
            }))
        })
        .await?;
    Ok(Json(theme))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThemeUpdate {
    primary_color: Option<String>,
    accent_color: Option<String>,
    font_family: Option<String>,
    logo_url: Option<String>,
}

impl ThemeUpdate {
    fn into_theme(self, org_id: Uuid) -> ShopResult<StoreTheme> {
        Ok(StoreTheme {
            organization_id: org_id,
            primary_color: optional_color(self.primary_color, "primaryColor")?,
            accent_color: optional_color(self.accent_color, "accentColor")?,
            font_family: blank_to_none(self.font_family),
            logo_url: blank_to_none(self.logo_url),
            updated: Utc::now(),
        })
    }
}

#[put("/<org>/theme", data = "<request>")]
async fn update_theme(
    _admin: AdminKey,
    org: &str,
    request: Json<ThemeUpdate>,
    conn: MainDbConn,
) -> ShopResult<Json<StoreTheme>> {
    let org_id = required_uuid(Some(org), "organization id")?;
    let theme = request.into_inner().into_theme(org_id)?;
    let saved = conn
        .run(move |c| -> ShopResult<StoreTheme> {
            find_organization(c, org_id)?;
            Ok(diesel::insert_into(store_themes)
                .values(&theme)
                .on_conflict(thms::organization_id)
                .do_update()
                .set(&theme)
                .get_result(c)?)
        })
        .await?;
    Ok(Json(saved))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseRegistration {
    connection_string: Option<String>,
}

#[derive(Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseRegistered {
    pub success: bool,
    pub tenant_database_id: Uuid,
}

#[post("/<org>/database", data = "<request>")]
async fn register_database(
    _admin: AdminKey,
    org: &str,
    request: Json<DatabaseRegistration>,
    config: &State<Config>,
    conn: MainDbConn,
) -> ShopResult<Json<DatabaseRegistered>> {
    let org_id = required_uuid(Some(org), "organization id")?;
    let url = required_text(request.connection_string.as_deref(), "connectionString")?.to_owned();
    let key = config.encryption_key.clone();
    let id = conn
        .run(move |c| -> ShopResult<Uuid> {
            find_organization(c, org_id)?;
            Ok(tenant_db::register(c, org_id, &url, &key)?)
        })
        .await?;
    slog::info!(slog_scope::logger(), "tenant database registered"; "organization_id" => %org_id, "tenant_database_id" => %id);
    Ok(Json(DatabaseRegistered {
        success: true,
        tenant_database_id: id,
    }))
}

#[get("/<org>/database")]
async fn get_database(
    _admin: AdminKey,
    org: &str,
    conn: MainDbConn,
) -> ShopResult<Json<TenantDatabaseInfo>> {
    let org_id = required_uuid(Some(org), "organization id")?;
    let info = conn
        .run(move |c| tenant_db::find_by_organization(c, org_id))
        .await?
        .ok_or_else(|| ShopError::not_found("Tenant database not found"))?;
    Ok(Json(info))
}

pub fn routes() -> Vec<Route> {
    routes![
        create_organization,
        count_organizations,
        get_organizations,
        get_organization,
        update_organization,
        delete_organization,
        get_settings,
        update_settings,
        get_theme,
        update_theme,
        register_database,
        get_database
    ]
}
