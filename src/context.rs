//! Which tenant a storefront request is for.

use diesel::pg::PgConnection;
use diesel::prelude::*;
use rocket::http::Status;
use rocket::request::{FromRequest, Outcome, Request};
use std::convert::Infallible;

use crate::base::*;
use crate::model::Organization;
use crate::schema::organizations as orgs;
use crate::schema::organizations::dsl::organizations;

fn strip_port(host: &str) -> (&str, Option<&str>) {
    match host.rsplit_once(':') {
        Some((name, port)) if !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()) => {
            (name, Some(port))
        }
        _ => (host, None),
    }
}

/// Tenant subdomain of `host` under `root_domain`, if any.
pub fn subdomain_of(host: &str, root_domain: &str) -> Option<String> {
    let (name, _) = strip_port(host.trim());
    let name = name.trim_end_matches('.').to_ascii_lowercase();
    let root = root_domain.trim_end_matches('.').to_ascii_lowercase();
    let label = name.strip_suffix(&root)?.strip_suffix('.')?;
    if label.is_empty() || label.contains('.') || label == "www" {
        return None;
    }
    Some(String::from(label))
}

/// The `Host` of a request, with the tenant subdomain it names.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreHost {
    pub host: String,
    pub subdomain: Option<String>,
}

impl StoreHost {
    pub fn new(host: &str, root_domain: &str) -> Self {
        StoreHost {
            host: String::from(host),
            subdomain: subdomain_of(host, root_domain),
        }
    }
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for StoreHost {
    type Error = Infallible;

    async fn from_request(request: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let root = request
            .rocket()
            .state::<Config>()
            .map(|c| c.root_domain.as_str())
            .unwrap_or("");
        let host = request.headers().get_one("Host").unwrap_or("");
        Outcome::Success(StoreHost::new(host, root))
    }
}

/// A request arriving on a tenant subdomain; forwards otherwise.
#[derive(Debug, Clone, PartialEq)]
pub struct TenantHost(pub String);

#[rocket::async_trait]
impl<'r> FromRequest<'r> for TenantHost {
    type Error = Infallible;

    async fn from_request(request: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        match StoreHost::from_request(request).await {
            Outcome::Success(StoreHost {
                subdomain: Some(sub),
                ..
            }) => Outcome::Success(TenantHost(sub)),
            _ => Outcome::Forward(Status::NotFound),
        }
    }
}

pub fn find_by_subdomain(
    c: &mut PgConnection,
    subdomain: &str,
) -> QueryResult<Option<Organization>> {
    organizations
        .filter(orgs::subdomain.eq(subdomain))
        .first(c)
        .optional()
}

pub fn find_by_slug(c: &mut PgConnection, slug: &str) -> QueryResult<Option<Organization>> {
    organizations.filter(orgs::slug.eq(slug)).first(c).optional()
}

/// Subdomain first, path slug second.
pub async fn resolve_store(
    conn: &MainDbConn,
    subdomain: Option<String>,
    slug: Option<String>,
) -> ShopResult<Option<Organization>> {
    let org = conn
        .run(move |c| -> QueryResult<Option<Organization>> {
            if let Some(sub) = subdomain {
                if let Some(org) = find_by_subdomain(c, &sub)? {
                    return Ok(Some(org));
                }
            }
            match slug {
                Some(slug) => find_by_slug(c, &slug),
                None => Ok(None),
            }
        })
        .await?;
    Ok(org)
}

/// Where a request reaching a tenant outside its own subdomain should go.
///
/// `rest` is the path after the store prefix, without a leading slash.
/// `scheme` is the one the platform is served with.
pub fn canonical_redirect(
    org: &Organization,
    scheme: &str,
    host: &str,
    root_domain: &str,
    rest: &str,
) -> Option<String> {
    let sub = org.subdomain.as_deref()?;
    if subdomain_of(host, root_domain).as_deref() == Some(sub) {
        return None;
    }
    let target = match strip_port(host.trim()).1 {
        Some(port) => format!("{}.{}:{}", sub, root_domain, port),
        None => format!("{}.{}", sub, root_domain),
    };
    Some(format!("{}://{}/{}", scheme, target, rest.trim_start_matches('/')))
}
