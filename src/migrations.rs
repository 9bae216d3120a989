use chrono::Utc;
use diesel::connection::SimpleConnection;
use diesel::pg::PgConnection;
use diesel::prelude::*;
use rocket::http::Status;
use rocket::response::status;
use rocket::serde::json::Json;
use rocket::{Route, State};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::base::*;
use crate::model::TenantDbStatus;
use crate::schema::tenant::tenant_migrations as tms;
use crate::tenant_db::{self, TenantPoolSettings};

/// A named schema script applied to every tenant database.
#[derive(Debug, Clone, Copy)]
pub struct MigrationScript {
    pub name: &'static str,
    pub description: &'static str,
}

pub const TENANT_MIGRATIONS: &[MigrationScript] = &[
    MigrationScript {
        name: "001_create_commerce",
        description: "Customers and orders",
    },
    MigrationScript {
        name: "002_create_payment_providers",
        description: "Connected payment accounts and fee schedules",
    },
    MigrationScript {
        name: "003_create_payment_transactions",
        description: "Payment transactions with platform fees",
    },
];

const MIGRATION_LOG_SQL: &str = "CREATE TABLE IF NOT EXISTS tenant_migrations (
    name TEXT PRIMARY KEY,
    checksum TEXT NOT NULL,
    executed_at TIMESTAMPTZ NOT NULL DEFAULT now()
)";

/// SQL text of an embedded tenant migration.
pub fn embedded_body(name: &str) -> Option<&'static str> {
    match name {
        "001_create_commerce" => Some(include_str!("../tenant_migrations/001_create_commerce.sql")),
        "002_create_payment_providers" => {
            Some(include_str!("../tenant_migrations/002_create_payment_providers.sql"))
        }
        "003_create_payment_transactions" => {
            Some(include_str!("../tenant_migrations/003_create_payment_transactions.sql"))
        }
        _ => None,
    }
}

pub fn checksum(sql: &str) -> String {
    hex::encode(Sha256::digest(sql.as_bytes()))
}

/// A database migrations can be applied to.
pub trait MigrationTarget {
    /// Makes sure the migration log exists.
    fn prepare(&mut self) -> ShopResult<()>;

    /// Executes one script and records it in the migration log, atomically.
    fn apply(&mut self, name: &str, checksum: &str, sql: &str) -> ShopResult<()>;
}

impl MigrationTarget for PgConnection {
    fn prepare(&mut self) -> ShopResult<()> {
        self.batch_execute(MIGRATION_LOG_SQL)?;
        Ok(())
    }

    fn apply(&mut self, name: &str, checksum: &str, sql: &str) -> ShopResult<()> {
        self.transaction::<_, diesel::result::Error, _>(|c| {
            c.batch_execute(sql)?;
            diesel::insert_into(tms::table)
                .values((
                    tms::name.eq(name),
                    tms::checksum.eq(checksum),
                    tms::executed_at.eq(Utc::now()),
                ))
                .on_conflict(tms::name)
                .do_nothing()
                .execute(c)?;
            Ok(())
        })?;
        Ok(())
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MigrationStatus {
    Success,
    Failed,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct MigrationResult {
    pub migration: String,
    pub status: MigrationStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl MigrationResult {
    fn success(script: &MigrationScript) -> Self {
        MigrationResult {
            migration: String::from(script.name),
            status: MigrationStatus::Success,
            description: Some(String::from(script.description)),
            error: None,
        }
    }

    fn failed(script: &MigrationScript, error: String) -> Self {
        MigrationResult {
            migration: String::from(script.name),
            status: MigrationStatus::Failed,
            description: None,
            error: Some(error),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MigrationRun {
    pub results: Vec<MigrationResult>,
    /// Last migration successfully applied during this run.
    pub last_synced: Option<String>,
}

impl MigrationRun {
    pub fn succeeded(&self) -> bool {
        self.results.iter().all(|r| r.status == MigrationStatus::Success)
    }

    pub fn tenant_status(&self) -> TenantDbStatus {
        if self.succeeded() {
            TenantDbStatus::Active
        } else {
            TenantDbStatus::Failed
        }
    }

    pub fn failure(&self) -> Option<&MigrationResult> {
        self.results.iter().find(|r| r.status == MigrationStatus::Failed)
    }
}

/// Applies `scripts` in order, stopping at the first failure.
///
/// Scripts applied before a failure stay applied: migrations only move forward.
pub fn run_migrations<'a, T, L>(
    target: &mut T,
    scripts: &[MigrationScript],
    load: L,
) -> MigrationRun
where
    T: MigrationTarget + ?Sized,
    L: Fn(&str) -> Option<&'a str>,
{
    let log = slog_scope::logger();
    let mut run = MigrationRun {
        results: Vec::with_capacity(scripts.len()),
        last_synced: None,
    };
    let first = match scripts.first() {
        None => return run,
        Some(first) => first,
    };
    if let Err(e) = target.prepare() {
        slog::error!(log, "could not prepare migration log"; "error" => %e);
        run.results.push(MigrationResult::failed(first, e.to_string()));
        return run;
    }

    for script in scripts {
        let outcome = match load(script.name) {
            None => Err(ShopError::Internal(format!("Migration body not found: {}", script.name))),
            Some(sql) => target.apply(script.name, &checksum(sql), sql),
        };
        match outcome {
            Ok(()) => {
                slog::info!(log, "applied tenant migration"; "migration" => script.name);
                run.results.push(MigrationResult::success(script));
                run.last_synced = Some(String::from(script.name));
            }
            Err(e) => {
                slog::error!(log, "tenant migration failed"; "migration" => script.name, "error" => %e);
                run.results.push(MigrationResult::failed(script, e.to_string()));
                break;
            }
        }
    }
    run
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrateRequest {
    tenant_database_id: Option<String>,
    connection_string: Option<String>,
}

#[derive(Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct MigrationReport {
    pub success: bool,
    pub tenant_database_id: Uuid,
    pub migrations: Vec<MigrationResult>,
    pub message: String,
}

impl MigrationReport {
    fn new(tenant_database_id: Uuid, run: MigrationRun) -> Self {
        let message = match run.failure() {
            None => format!("Applied {} migrations", run.results.len()),
            Some(failed) => format!("Migration {} failed", failed.migration),
        };
        MigrationReport {
            success: run.succeeded(),
            tenant_database_id,
            migrations: run.results,
            message,
        }
    }
}

#[post("/migrate", data = "<request>")]
async fn migrate(
    _admin: AdminKey,
    request: Json<MigrateRequest>,
    config: &State<Config>,
    conn: MainDbConn,
) -> ShopResult<status::Custom<Json<MigrationReport>>> {
    let tdb_id = required_uuid(request.tenant_database_id.as_deref(), "tenantDatabaseId")?;
    let provided = request
        .connection_string
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from);

    let key = config.encryption_key.clone();
    let url = conn
        .run(move |c| -> ShopResult<String> {
            tenant_db::find_by_id(c, tdb_id)?
                .ok_or_else(|| ShopError::not_found("Tenant database not found"))?;
            match provided {
                Some(url) => Ok(url),
                None => tenant_db::decrypt_connection_string(c, tdb_id, &key)?.ok_or_else(|| {
                    ShopError::not_found("Tenant database connection string unavailable")
                }),
            }
        })
        .await?;

    let log = slog_scope::logger();
    slog::info!(log, "migrating tenant database"; "tenant_database_id" => %tdb_id);
    let settings = TenantPoolSettings::from(config.inner());
    let outcome = tenant_db::with_tenant(url, settings, |c| {
        Ok(run_migrations(c, TENANT_MIGRATIONS, embedded_body))
    })
    .await;

    let run = match outcome {
        Ok(run) => run,
        Err(e) => {
            slog::error!(log, "tenant database unreachable"; "tenant_database_id" => %tdb_id, "error" => %e);
            conn.run(move |c| tenant_db::record_status(c, tdb_id, TenantDbStatus::Failed, None))
                .await?;
            return Err(e);
        }
    };

    let status = run.tenant_status();
    let last_synced = run.last_synced.clone();
    conn.run(move |c| tenant_db::record_status(c, tdb_id, status, last_synced.as_deref()))
        .await?;

    let report = MigrationReport::new(tdb_id, run);
    let code = if report.success {
        Status::Ok
    } else {
        Status::InternalServerError
    };
    Ok(status::Custom(code, Json(report)))
}

pub fn routes() -> Vec<Route> {
    routes![migrate]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    /// In-memory database that fails on scripts containing `FAIL`.
    #[derive(Default)]
    struct MemoryTarget {
        prepared: bool,
        applied: Vec<String>,
        log: HashMap<String, String>,
    }

    impl MigrationTarget for MemoryTarget {
        fn prepare(&mut self) -> ShopResult<()> {
            self.prepared = true;
            Ok(())
        }

        fn apply(&mut self, name: &str, checksum: &str, sql: &str) -> ShopResult<()> {
            if sql.contains("FAIL") {
                return Err(ShopError::Database(format!("syntax error in {}", name)));
            }
            self.applied.push(String::from(name));
            self.log
                .entry(String::from(name))
                .or_insert_with(|| String::from(checksum));
            Ok(())
        }
    }

    const SCRIPTS: &[MigrationScript] = &[
        MigrationScript { name: "m1", description: "one" },
        MigrationScript { name: "m2", description: "two" },
        MigrationScript { name: "m3", description: "three" },
        MigrationScript { name: "m4", description: "four" },
    ];

    fn bodies(failing: Option<&'static str>) -> impl Fn(&str) -> Option<&'static str> {
        move |name| {
            if Some(name) == failing {
                Some("FAIL")
            } else {
                Some("CREATE TABLE IF NOT EXISTS t (id INT)")
            }
        }
    }

    #[test]
    fn all_succeed() {
        let mut target = MemoryTarget::default();
        let run = run_migrations(&mut target, SCRIPTS, bodies(None));
        assert!(target.prepared);
        assert_eq!(vec!["m1", "m2", "m3", "m4"], target.applied);
        assert!(run.succeeded());
        assert_eq!(TenantDbStatus::Active, run.tenant_status());
        assert_eq!(Some(String::from("m4")), run.last_synced);
        assert!(run.results.iter().all(|r| r.error.is_none()));
        assert_eq!(Some(String::from("two")), run.results[1].description);
    }

    #[test]
    fn stops_at_first_failure() {
        let mut target = MemoryTarget::default();
        let run = run_migrations(&mut target, SCRIPTS, bodies(Some("m3")));
        assert_eq!(vec!["m1", "m2"], target.applied);
        assert_eq!(3, run.results.len());
        assert_eq!(MigrationStatus::Success, run.results[0].status);
        assert_eq!(MigrationStatus::Success, run.results[1].status);
        assert_eq!(MigrationStatus::Failed, run.results[2].status);
        assert_eq!(Some(String::from("syntax error in m3")), run.results[2].error);
        assert_eq!(TenantDbStatus::Failed, run.tenant_status());
        assert_eq!(Some(String::from("m2")), run.last_synced);
    }

    #[test]
    fn first_failure_syncs_nothing() {
        let mut target = MemoryTarget::default();
        let run = run_migrations(&mut target, SCRIPTS, bodies(Some("m1")));
        assert!(target.applied.is_empty());
        assert_eq!(1, run.results.len());
        assert_eq!(None, run.last_synced);
        assert_eq!(TenantDbStatus::Failed, run.tenant_status());
    }

    #[test]
    fn empty_list_succeeds() {
        let mut target = MemoryTarget::default();
        let run = run_migrations(&mut target, &[], bodies(None));
        assert!(!target.prepared);
        assert!(run.results.is_empty());
        assert_eq!(TenantDbStatus::Active, run.tenant_status());
    }

    #[test]
    fn missing_body_fails_that_step() {
        let mut target = MemoryTarget::default();
        let run = run_migrations(&mut target, SCRIPTS, |name| {
            if name == "m2" {
                None
            } else {
                Some("SELECT 1")
            }
        });
        assert_eq!(vec!["m1"], target.applied);
        assert_eq!(
            Some(String::from("Migration body not found: m2")),
            run.results[1].error
        );
        assert_eq!(2, run.results.len());
    }

    #[test]
    fn rerun_keeps_single_log_entry() {
        let mut target = MemoryTarget::default();
        run_migrations(&mut target, SCRIPTS, bodies(None));
        run_migrations(&mut target, SCRIPTS, bodies(None));
        assert_eq!(8, target.applied.len());
        assert_eq!(4, target.log.len());
    }

    #[test]
    fn embedded_scripts_are_complete() {
        for script in TENANT_MIGRATIONS {
            let body = embedded_body(script.name).unwrap();
            assert!(!body.trim().is_empty(), "{} is empty", script.name);
        }
        assert_eq!(None, embedded_body("999_unknown"));
    }

    #[test]
    fn checksums_are_stable() {
        assert_eq!(64, checksum("SELECT 1").len());
        assert_eq!(checksum("SELECT 1"), checksum("SELECT 1"));
        assert_ne!(checksum("SELECT 1"), checksum("SELECT 2"));
    }

    #[test]
    fn report_serializes_description_or_error() {
        let mut target = MemoryTarget::default();
        let run = run_migrations(&mut target, SCRIPTS, bodies(Some("m2")));
        let report = MigrationReport::new(Uuid::nil(), run);
        assert!(!report.success);
        assert_eq!("Migration m2 failed", report.message);
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!("success", json["migrations"][0]["status"]);
        assert_eq!("one", json["migrations"][0]["description"]);
        assert!(json["migrations"][0].get("error").is_none());
        assert_eq!("failed", json["migrations"][1]["status"]);
        assert!(json["migrations"][1].get("description").is_none());
        assert_eq!(
            "00000000-0000-0000-0000-000000000000",
            json["tenantDatabaseId"]
        );
    }
}
