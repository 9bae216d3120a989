#[macro_use]
extern crate rocket;
#[macro_use]
extern crate diesel;

use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use rocket::figment::Figment;
use rocket::fairing::AdHoc;
use rocket::{Build, Rocket};
use rocket_dyn_templates::Template;

pub mod base;
use base::*;

pub mod branding;
pub mod cart;
pub mod catalog;
pub mod context;
pub mod email;
pub mod logging;
pub mod migrations;
pub mod model;
pub mod payments;
pub mod schema;
pub mod settings;
pub mod storefront;
pub mod stripe;
pub mod tenant_db;
pub mod tracking;

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

async fn run_migrations(rocket: Rocket<Build>) -> Result<Rocket<Build>, Rocket<Build>> {
    let conn = match MainDbConn::get_one(&rocket).await {
        Some(conn) => conn,
        None => {
            slog::crit!(slog_scope::logger(), "no database connection for migrations");
            return Err(rocket);
        }
    };
    let applied = conn
        .run(|c| {
            c.run_pending_migrations(MIGRATIONS)
                .map(|versions| versions.len())
                .map_err(|e| e.to_string())
        })
        .await;
    match applied {
        Ok(count) => {
            slog::info!(slog_scope::logger(), "central migrations applied"; "count" => count);
            Ok(rocket)
        }
        Err(e) => {
            slog::crit!(slog_scope::logger(), "central migrations failed"; "error" => %e);
            Err(rocket)
        }
    }
}

/// Builds the shared clients from configuration.
async fn services(rocket: Rocket<Build>) -> Result<Rocket<Build>, Rocket<Build>> {
    let config: Config = match rocket.figment().extract() {
        Ok(config) => config,
        Err(e) => {
            slog::crit!(slog_scope::logger(), "invalid configuration"; "error" => %e);
            return Err(rocket);
        }
    };
    let stripe = stripe::StripeClient::new(
        config.stripe_api_base.as_str(),
        config.stripe_secret_key.as_str(),
    );
    let mailer = email::Mailer::new(&config.aws_region, &config.email_from);
    match (stripe, mailer) {
        (Ok(stripe), Ok(mailer)) => Ok(rocket
            .manage(catalog::Catalog::new(config.catalog_ttl()))
            .manage(stripe)
            .manage(mailer)),
        (Err(e), _) | (_, Err(e)) => {
            slog::crit!(slog_scope::logger(), "could not start services"; "error" => %e);
            Err(rocket)
        }
    }
}

pub fn rocket() -> Rocket<Build> {
    rocket_with(rocket::Config::figment())
}

/// The application on top of an explicit configuration.
pub fn rocket_with(figment: Figment) -> Rocket<Build> {
    rocket::custom(figment)
        .attach(MainDbConn::fairing())
        .attach(AdHoc::try_on_ignite("Diesel Migrations", run_migrations))
        .attach(AdHoc::try_on_ignite("Services", services))
        .mount("/", storefront::routes())
        .mount("/", routes![preflight])
        .mount("/api/tenants", migrations::routes())
        .mount("/api/payments", payments::routes())
        .mount("/api/email", email::routes())
        .mount("/api/email", tracking::email_routes())
        .mount("/api/events", tracking::event_routes())
        .mount("/api/stores", catalog::routes())
        .mount("/api/admin/orgs", settings::routes())
        .register("/api", catchers![api_error])
        .attach(cors())
        .attach(AdHoc::config::<Config>())
        .attach(Template::custom(|engines| {
            engines.tera.register_filter("money", storefront::money);
        }))
}
