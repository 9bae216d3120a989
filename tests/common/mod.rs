#![allow(dead_code)]

use diesel::pg::PgConnection;
use diesel::Connection;
use rocket::http::{ContentType, Header, Status};
use rocket::local::blocking::{Client, LocalRequest};
use rocket::serde::DeserializeOwned;
use serde_json::json;
use rocket::figment::providers::Serialized;
use std::env;
use uuid::Uuid;
use tenantshop::migrations::MigrationReport;
use tenantshop::model::Organization;
use tenantshop::settings::DatabaseRegistered;

pub const ADMIN_KEY: &str = "test-admin-key";
pub const ROOT_DOMAIN: &str = "shop.test";

pub fn setup() -> Client {
    env::set_var("ROCKET_PROFILE", "test");

    let rocket = tenantshop::rocket();
    Client::tracked(rocket).unwrap()
}

/// Same as `setup`, with Stripe calls sent to `api_base`.
pub fn setup_with_stripe(api_base: &str) -> Client {
    env::set_var("ROCKET_PROFILE", "test");

    let figment = rocket::Config::figment().merge(Serialized::global("stripe_api_base", api_base));
    Client::tracked(tenantshop::rocket_with(figment)).unwrap()
}

pub fn test_database_url() -> String {
    rocket::Config::figment()
        .select("test")
        .extract_inner("databases.main.url")
        .unwrap()
}

pub fn connect() -> PgConnection {
    PgConnection::establish(&test_database_url()).unwrap()
}

pub fn as_admin(req: LocalRequest) -> LocalRequest {
    req.header(Header::new("X-Admin-Key", ADMIN_KEY))
}

pub fn on_host<'c>(req: LocalRequest<'c>, host: &str) -> LocalRequest<'c> {
    req.header(Header::new("Host", host.to_string()))
}

pub fn json_ok_response<T>(req: LocalRequest) -> T
where
    T: Send + DeserializeOwned + 'static,
{
    let response = req.dispatch();
    assert_eq!(response.status(), Status::Ok);
    assert_eq!(response.content_type(), Some(ContentType::JSON));
    response.into_json().unwrap()
}

/// `{success:false, error}` with the given status.
pub fn assert_failure(req: LocalRequest, status: Status) -> String {
    let response = req.dispatch();
    assert_eq!(response.status(), status);
    assert_eq!(response.content_type(), Some(ContentType::JSON));
    let body: serde_json::Value = response.into_json().unwrap();
    assert_eq!(false, body["success"]);
    body["error"].as_str().unwrap().to_string()
}

pub fn create_org(
    client: &Client,
    name: &str,
    slug: &str,
    subdomain: Option<&str>,
) -> Organization {
    json_ok_response(as_admin(
        client
            .post("/api/admin/orgs")
            .header(ContentType::JSON)
            .body(json!({"name": name, "slug": slug, "subdomain": subdomain}).to_string()),
    ))
}

pub fn delete_org(client: &Client, org: &Organization) {
    let response = as_admin(client.delete(format!("/api/admin/orgs/{}", org.id))).dispatch();
    assert_eq!(response.status(), Status::NoContent);
}

/// Registers `url` as the tenant database of the organization.
pub fn register_database(client: &Client, org_id: Uuid, url: &str) -> Uuid {
    let registered: DatabaseRegistered = json_ok_response(as_admin(
        client
            .post(format!("/api/admin/orgs/{}/database", org_id))
            .header(ContentType::JSON)
            .body(json!({ "connectionString": url }).to_string()),
    ));
    registered.tenant_database_id
}

pub fn migrate(client: &Client, tenant_database_id: Uuid) -> LocalRequest<'_> {
    as_admin(
        client
            .post("/api/tenants/migrate")
            .header(ContentType::JSON)
            .body(json!({ "tenantDatabaseId": tenant_database_id.to_string() }).to_string()),
    )
}

/// Uses the test database as the organization's tenant database, migrated.
pub fn with_tenant_schema(client: &Client, org_id: Uuid) -> Uuid {
    let tdb_id = register_database(client, org_id, &test_database_url());
    let report: MigrationReport = json_ok_response(migrate(client, tdb_id));
    assert!(report.success);
    tdb_id
}

pub fn clear_payments(c: &mut PgConnection) {
    use diesel::RunQueryDsl;
    use tenantshop::schema::tenant::payment_providers::dsl::payment_providers;
    use tenantshop::schema::tenant::payment_transactions::dsl::payment_transactions;

    diesel::delete(payment_transactions).execute(c).unwrap();
    diesel::delete(payment_providers).execute(c).unwrap();
}
