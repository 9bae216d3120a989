use serde::{Deserialize, Serialize};

use diesel::result::Error as DieselError;
use rocket::fairing::AdHoc;
use rocket::http::{Header, Status};
use rocket::request::{FromRequest, Outcome, Request};
use rocket::response::{self, status, Responder};
use rocket::serde::json::Json;
use rocket_sync_db_pools::database;
use std::error::Error as StdError;
use std::fmt;
use std::io::Error as IOError;
use std::time::Duration;

pub const ADMIN_HEADER: &str = "X-Admin-Key";

#[derive(Deserialize, Debug, Clone)]
pub struct Config {
    pub root_domain: String,
    pub public_url: String,
    pub admin_api_key: String,
    pub encryption_key: String,
    #[serde(default)]
    pub stripe_secret_key: String,
    #[serde(default)]
    pub stripe_webhook_secret: String,
    #[serde(default = "default_stripe_api_base")]
    pub stripe_api_base: String,
    #[serde(default = "default_connect_country")]
    pub connect_country: String,
    pub email_from: String,
    #[serde(default = "default_aws_region")]
    pub aws_region: String,
    #[serde(default = "default_catalog_cache_seconds")]
    pub catalog_cache_seconds: u64,
    #[serde(default = "default_tenant_connect_timeout")]
    pub tenant_connect_timeout_seconds: u64,
    #[serde(default = "default_tenant_idle_timeout")]
    pub tenant_idle_timeout_seconds: u64,
    /// Fee schedule given to newly connected payment accounts.
    #[serde(default)]
    pub platform_fee_percentage: f64,
    #[serde(default)]
    pub platform_fee_fixed: f64,
}

fn default_stripe_api_base() -> String {
    String::from("https://api.stripe.com")
}

fn default_connect_country() -> String {
    String::from("US")
}

fn default_aws_region() -> String {
    String::from("eu-west-1")
}

fn default_catalog_cache_seconds() -> u64 {
    60
}

fn default_tenant_connect_timeout() -> u64 {
    10
}

fn default_tenant_idle_timeout() -> u64 {
    30
}

impl Config {
    pub fn catalog_ttl(&self) -> Duration {
        Duration::from_secs(self.catalog_cache_seconds)
    }

    /// Scheme of `public_url`, `https` when it cannot be parsed.
    pub fn public_scheme(&self) -> String {
        url::Url::parse(self.public_base())
            .map(|u| u.scheme().to_owned())
            .unwrap_or_else(|_| String::from("https"))
    }

    /// Base URL of the platform itself, without a trailing slash.
    pub fn public_base(&self) -> &str {
        self.public_url.trim_end_matches('/')
    }
}

#[database("main")]
pub struct MainDbConn(diesel::PgConnection);

#[derive(Debug)]
pub enum ShopError {
    Validation(String),
    Unauthorized,
    NotFound(String),
    Upstream(String),
    Database(String),
    IOError(String),
    Internal(String),
}

impl ShopError {
    pub fn status(&self) -> Status {
        match self {
            ShopError::Validation(_) => Status::BadRequest,
            ShopError::Unauthorized => Status::Unauthorized,
            ShopError::NotFound(_) => Status::NotFound,
            ShopError::Upstream(_) => Status::BadGateway,
            ShopError::Database(_) | ShopError::IOError(_) | ShopError::Internal(_) => {
                Status::InternalServerError
            }
        }
    }

    pub fn validation<S: Into<String>>(msg: S) -> Self {
        ShopError::Validation(msg.into())
    }

    pub fn not_found<S: Into<String>>(msg: S) -> Self {
        ShopError::NotFound(msg.into())
    }
}

/// JSON envelope returned for every failed API call.
#[derive(Serialize, Deserialize, Debug)]
pub struct Failure {
    pub success: bool,
    pub error: String,
}

impl Failure {
    pub fn new<S: Into<String>>(error: S) -> Self {
        Failure {
            success: false,
            error: error.into(),
        }
    }
}

impl<'r, 'o: 'r> Responder<'r, 'o> for ShopError {
    fn respond_to(self, request: &'r Request<'_>) -> response::Result<'o> {
        let status = self.status();
        let log = slog_scope::logger();
        if status.code >= 500 {
            slog::error!(log, "request failed"; "uri" => %request.uri(), "status" => status.code, "error" => %self);
        } else {
            slog::info!(log, "request rejected"; "uri" => %request.uri(), "status" => status.code, "error" => %self);
        }
        status::Custom(status, Json(Failure::new(self.to_string()))).respond_to(request)
    }
}

impl fmt::Display for ShopError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            ShopError::Validation(msg) => msg,
            ShopError::Unauthorized => "Unauthorized",
            ShopError::NotFound(msg) => msg,
            ShopError::Upstream(msg) => msg,
            ShopError::Database(msg) => msg,
            ShopError::IOError(msg) => msg,
            ShopError::Internal(msg) => msg,
        })
    }
}

impl StdError for ShopError {}

impl From<DieselError> for ShopError {
    fn from(e: DieselError) -> Self {
        match e {
            DieselError::NotFound => ShopError::NotFound(String::from("Not Found")),
            e => ShopError::Database(e.to_string()),
        }
    }
}

impl From<diesel::r2d2::PoolError> for ShopError {
    fn from(e: diesel::r2d2::PoolError) -> Self {
        ShopError::Database(e.to_string())
    }
}

impl From<diesel::ConnectionError> for ShopError {
    fn from(e: diesel::ConnectionError) -> Self {
        ShopError::Database(e.to_string())
    }
}

impl From<IOError> for ShopError {
    fn from(e: IOError) -> Self {
        ShopError::IOError(e.to_string())
    }
}

impl From<uuid::Error> for ShopError {
    fn from(e: uuid::Error) -> Self {
        ShopError::Validation(e.to_string())
    }
}

impl From<serde_json::Error> for ShopError {
    fn from(e: serde_json::Error) -> Self {
        ShopError::Internal(e.to_string())
    }
}

impl From<reqwest::Error> for ShopError {
    fn from(e: reqwest::Error) -> Self {
        ShopError::Upstream(e.to_string())
    }
}

impl<E: StdError + 'static> From<rusoto_core::RusotoError<E>> for ShopError {
    fn from(e: rusoto_core::RusotoError<E>) -> Self {
        ShopError::Upstream(e.to_string())
    }
}

impl From<lettre::address::AddressError> for ShopError {
    fn from(e: lettre::address::AddressError) -> Self {
        ShopError::Validation(format!("Invalid email address: {}", e))
    }
}

impl From<lettre::error::Error> for ShopError {
    fn from(e: lettre::error::Error) -> Self {
        ShopError::Internal(e.to_string())
    }
}

impl From<rocket::tokio::task::JoinError> for ShopError {
    fn from(e: rocket::tokio::task::JoinError) -> Self {
        ShopError::Internal(e.to_string())
    }
}

pub type ShopResult<T> = std::result::Result<T, ShopError>;

/// Parses a required uuid field, naming it in the validation message.
pub fn required_uuid(value: Option<&str>, field: &str) -> ShopResult<uuid::Uuid> {
    match value.map(str::trim).filter(|v| !v.is_empty()) {
        None => Err(ShopError::validation(format!("Missing required field: {}", field))),
        Some(v) => uuid::Uuid::parse_str(v)
            .map_err(|_| ShopError::validation(format!("Invalid {}: {}", field, v))),
    }
}

/// Returns the trimmed value of a required text field.
pub fn required_text<'a>(value: Option<&'a str>, field: &str) -> ShopResult<&'a str> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ShopError::validation(format!("Missing required field: {}", field)))
}

/// Lowercase DNS label: `[a-z0-9-]`, 1 to 63 characters, no hyphen at either end.
pub fn is_dns_label(value: &str) -> bool {
    !value.is_empty()
        && value.len() <= 63
        && !value.starts_with('-')
        && !value.ends_with('-')
        && value
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
}

/// Access to the admin API, granted by the `X-Admin-Key` header.
pub struct AdminKey;

#[rocket::async_trait]
impl<'r> FromRequest<'r> for AdminKey {
    type Error = ShopError;

    async fn from_request(request: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let expected = request
            .rocket()
            .state::<Config>()
            .map(|c| c.admin_api_key.as_str())
            .unwrap_or("");
        match request.headers().get_one(ADMIN_HEADER) {
            Some(key) if !expected.is_empty() && key == expected => Outcome::Success(AdminKey),
            _ => Outcome::Error((Status::Unauthorized, ShopError::Unauthorized)),
        }
    }
}

pub fn cors() -> AdHoc {
    AdHoc::on_response("CORS", |_req, res| {
        Box::pin(async move {
            res.set_header(Header::new("Access-Control-Allow-Origin", "*"));
            res.set_header(Header::new(
                "Access-Control-Allow-Methods",
                "GET, POST, PUT, DELETE, OPTIONS",
            ));
            res.set_header(Header::new(
                "Access-Control-Allow-Headers",
                "authorization, content-type, x-admin-key, stripe-signature",
            ));
        })
    })
}

#[options("/<_..>")]
pub fn preflight() -> Status {
    Status::NoContent
}

#[catch(default)]
pub fn api_error(status: Status, _request: &Request) -> status::Custom<Json<Failure>> {
    let reason = status.reason().unwrap_or("Error");
    status::Custom(status, Json(Failure::new(reason)))
}
