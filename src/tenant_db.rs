//! Central registry of tenant databases and short-lived connections to them.
//!
//! Connection strings are stored encrypted with `pgcrypto`; the key never
//! leaves the application configuration and plain text never hits a column.

use chrono::Utc;
use diesel::pg::PgConnection;
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, Pool};
use diesel::sql_types::{Nullable, Text, Uuid as SqlUuid};
use std::time::Duration;
use uuid::Uuid;

use crate::base::*;
use crate::model::{TenantDatabaseInfo, TenantDbStatus};
use crate::schema::tenant_databases as tdbs;
use crate::schema::tenant_databases::dsl::tenant_databases;

pub type TenantPool = Pool<ConnectionManager<PgConnection>>;

#[derive(Debug, Clone, Copy)]
pub struct TenantPoolSettings {
    pub connect_timeout: Duration,
    pub idle_timeout: Duration,
}

impl From<&Config> for TenantPoolSettings {
    fn from(config: &Config) -> Self {
        TenantPoolSettings {
            connect_timeout: Duration::from_secs(config.tenant_connect_timeout_seconds),
            idle_timeout: Duration::from_secs(config.tenant_idle_timeout_seconds),
        }
    }
}

/// Builds a pool holding at most one connection to a tenant database.
pub fn open_pool(url: &str, settings: &TenantPoolSettings) -> ShopResult<TenantPool> {
    let pool = Pool::builder()
        .max_size(1)
        .min_idle(Some(0))
        .connection_timeout(settings.connect_timeout)
        .idle_timeout(Some(settings.idle_timeout))
        .build(ConnectionManager::<PgConnection>::new(url))?;
    Ok(pool)
}

/// Runs `work` against the tenant database on the blocking pool.
///
/// The pool lives only for the duration of the call, so its connection is
/// closed before this returns, whatever the outcome.
pub async fn with_tenant<F, T>(url: String, settings: TenantPoolSettings, work: F) -> ShopResult<T>
where
    F: FnOnce(&mut PgConnection) -> ShopResult<T> + Send + 'static,
    T: Send + 'static,
{
    rocket::tokio::task::spawn_blocking(move || {
        let pool = open_pool(&url, &settings)?;
        let mut conn = pool.get()?;
        let result = work(&mut conn);
        drop(conn);
        drop(pool);
        result
    })
    .await?
}

fn info_columns() -> (
    tdbs::id,
    tdbs::organization_id,
    tdbs::status,
    tdbs::last_migration_synced,
    tdbs::updated,
) {
    (
        tdbs::id,
        tdbs::organization_id,
        tdbs::status,
        tdbs::last_migration_synced,
        tdbs::updated,
    )
}

pub fn find_by_id(
    c: &mut PgConnection,
    tenant_database_id: Uuid,
) -> QueryResult<Option<TenantDatabaseInfo>> {
    tenant_databases
        .filter(tdbs::id.eq(tenant_database_id))
        .select(info_columns())
        .first(c)
        .optional()
}

pub fn find_by_organization(
    c: &mut PgConnection,
    org_id: Uuid,
) -> QueryResult<Option<TenantDatabaseInfo>> {
    tenant_databases
        .filter(tdbs::organization_id.eq(org_id))
        .select(info_columns())
        .first(c)
        .optional()
}

#[derive(QueryableByName)]
struct Decrypted {
    #[diesel(sql_type = Nullable<Text>)]
    connection_string: Option<String>,
}

#[derive(QueryableByName)]
struct Registered {
    #[diesel(sql_type = SqlUuid)]
    id: Uuid,
}

/// Decrypts the stored connection string; `None` when nothing usable is stored.
pub fn decrypt_connection_string(
    c: &mut PgConnection,
    tenant_database_id: Uuid,
    key: &str,
) -> QueryResult<Option<String>> {
    let row: Option<Decrypted> = diesel::sql_query(
        "SELECT pgp_sym_decrypt(connection_string_encrypted, $2) AS connection_string \
         FROM tenant_databases WHERE id = $1",
    )
    .bind::<SqlUuid, _>(tenant_database_id)
    .bind::<Text, _>(key)
    .get_result(c)
    .optional()?;
    Ok(row
        .and_then(|r| r.connection_string)
        .filter(|s| !s.trim().is_empty()))
}

/// Registers (or re-registers) the database of an organization, back in `provisioning`.
pub fn register(
    c: &mut PgConnection,
    org_id: Uuid,
    connection_string: &str,
    key: &str,
) -> QueryResult<Uuid> {
    let row: Registered = diesel::sql_query(
        "INSERT INTO tenant_databases (id, organization_id, connection_string_encrypted, status) \
         VALUES ($1, $2, pgp_sym_encrypt($3, $4), 'provisioning') \
         ON CONFLICT (organization_id) DO UPDATE \
         SET connection_string_encrypted = EXCLUDED.connection_string_encrypted, \
             status = 'provisioning', updated = now() \
         RETURNING id",
    )
    .bind::<SqlUuid, _>(Uuid::new_v4())
    .bind::<SqlUuid, _>(org_id)
    .bind::<Text, _>(connection_string)
    .bind::<Text, _>(key)
    .get_result(c)?;
    Ok(row.id)
}

/// Writes the outcome of a migration run back to the registry.
pub fn record_status(
    c: &mut PgConnection,
    tenant_database_id: Uuid,
    status: TenantDbStatus,
    last_synced: Option<&str>,
) -> QueryResult<usize> {
    let target = tenant_databases.filter(tdbs::id.eq(tenant_database_id));
    match last_synced {
        Some(name) => diesel::update(target)
            .set((
                tdbs::status.eq(status.as_str()),
                tdbs::last_migration_synced.eq(name),
                tdbs::updated.eq(Utc::now()),
            ))
            .execute(c),
        None => diesel::update(target)
            .set((tdbs::status.eq(status.as_str()), tdbs::updated.eq(Utc::now())))
            .execute(c),
    }
}

/// Resolves the decrypted connection string of an organization's database.
///
/// Fails with `NotFound` when the organization has no tenant database or when
/// its connection string cannot be recovered.
pub async fn connection_for_organization(
    conn: &MainDbConn,
    org_id: Uuid,
    key: &str,
) -> ShopResult<String> {
    let key = key.to_owned();
    conn.run(move |c| -> ShopResult<String> {
        let tdb = find_by_organization(c, org_id)?
            .ok_or_else(|| ShopError::not_found("Tenant database not found"))?;
        decrypt_connection_string(c, tdb.id, &key)?
            .ok_or_else(|| ShopError::not_found("Tenant database connection string unavailable"))
    })
    .await
}
