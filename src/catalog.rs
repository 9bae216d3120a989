use diesel::pg::PgConnection;
use diesel::prelude::*;
use rocket::serde::json::Json;
use rocket::{Route, State};
use serde::{Deserialize, Serialize};
use moka::future::Cache;
use std::time::Duration;
use uuid::Uuid;

use crate::base::*;
use crate::context;
use crate::model::{Collection, Product};
use crate::schema::collection_products as cps;
use crate::schema::collection_products::dsl::collection_products;
use crate::schema::collections as cols;
use crate::schema::collections::dsl::collections;
use crate::schema::products as prods;
use crate::schema::products::dsl::products;

pub const PRODUCT_LIMIT: i64 = 24;
pub const COLLECTION_LIMIT: i64 = 8;
pub const PAGE_SIZE: usize = 8;

/// One window of a list already held in memory.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: usize,
    pub total_pages: usize,
    pub has_previous: bool,
    pub has_next: bool,
}

/// Slices `items` into pages of `PAGE_SIZE`; page 0 reads as 1, past-the-end as the last.
pub fn paginate<T: Clone>(items: &[T], page: usize) -> Page<T> {
    let total_pages = std::cmp::max(1, (items.len() + PAGE_SIZE - 1) / PAGE_SIZE);
    let page = page.clamp(1, total_pages);
    let start = (page - 1) * PAGE_SIZE;
    let end = std::cmp::min(start + PAGE_SIZE, items.len());
    Page {
        items: items[start..end].to_vec(),
        page,
        total_pages,
        has_previous: page > 1,
        has_next: page < total_pages,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Scope {
    Products,
    Collections,
    Collection(String),
}

#[derive(Debug, Clone)]
pub enum Listing {
    Products(Vec<Product>),
    Collections(Vec<Collection>),
    Collection(Collection, Vec<Product>),
}

/// Listings per tenant and scope, dropped `ttl` after they were stored.
pub type CatalogCache = Cache<(Uuid, Scope), Listing>;

pub fn catalog_cache(ttl: Duration) -> CatalogCache {
    Cache::builder()
        .time_to_live(ttl)
        .support_invalidation_closures()
        .build()
}

pub fn fetch_products(c: &mut PgConnection, org_id: Uuid) -> QueryResult<Vec<Product>> {
    products
        .filter(prods::organization_id.eq(org_id))
        .filter(prods::is_active.eq(true))
        .order(prods::created.desc())
        .limit(PRODUCT_LIMIT)
        .load(c)
}

pub fn fetch_collections(c: &mut PgConnection, org_id: Uuid) -> QueryResult<Vec<Collection>> {
    collections
        .filter(cols::organization_id.eq(org_id))
        .filter(cols::is_active.eq(true))
        .order(cols::position.asc())
        .limit(COLLECTION_LIMIT)
        .load(c)
}

pub fn fetch_collection(
    c: &mut PgConnection,
    org_id: Uuid,
    slug: &str,
) -> QueryResult<Option<(Collection, Vec<Product>)>> {
    let collection: Option<Collection> = collections
        .filter(cols::organization_id.eq(org_id))
        .filter(cols::slug.eq(slug))
        .filter(cols::is_active.eq(true))
        .first(c)
        .optional()?;
    let collection = match collection {
        Some(collection) => collection,
        None => return Ok(None),
    };
    let items = collection_products
        .inner_join(products)
        .filter(cps::collection_id.eq(collection.id))
        .filter(prods::is_active.eq(true))
        .order(cps::position.asc())
        .limit(PRODUCT_LIMIT)
        .select(prods::all_columns)
        .load(c)?;
    Ok(Some((collection, items)))
}

pub fn fetch_products_by_id(
    c: &mut PgConnection,
    org_id: Uuid,
    ids: Vec<Uuid>,
) -> QueryResult<Vec<Product>> {
    products
        .filter(prods::organization_id.eq(org_id))
        .filter(prods::id.eq_any(ids))
        .load(c)
}

/// Cached catalog reads.
pub struct Catalog {
    cache: CatalogCache,
}

impl Catalog {
    pub fn new(ttl: Duration) -> Self {
        Catalog {
            cache: catalog_cache(ttl),
        }
    }

    async fn listing(
        &self,
        conn: &MainDbConn,
        org_id: Uuid,
        scope: Scope,
    ) -> ShopResult<Option<Listing>> {
        let key = (org_id, scope);
        if let Some(hit) = self.cache.get(&key).await {
            return Ok(Some(hit));
        }
        let scope = key.1.clone();
        let fetched = conn
            .run(move |c| -> QueryResult<Option<Listing>> {
                Ok(match scope {
                    Scope::Products => Some(Listing::Products(fetch_products(c, org_id)?)),
                    Scope::Collections => Some(Listing::Collections(fetch_collections(c, org_id)?)),
                    Scope::Collection(slug) => {
                        fetch_collection(c, org_id, &slug)?
                            .map(|(col, ps)| Listing::Collection(col, ps))
                    }
                })
            })
            .await?;
        if let Some(listing) = &fetched {
            slog::debug!(slog_scope::logger(), "catalog cache refreshed"; "organization_id" => %org_id, "scope" => ?key.1);
            self.cache.insert(key, listing.clone()).await;
        }
        Ok(fetched)
    }

    pub async fn products(&self, conn: &MainDbConn, org_id: Uuid) -> ShopResult<Vec<Product>> {
        match self.listing(conn, org_id, Scope::Products).await? {
            Some(Listing::Products(ps)) => Ok(ps),
            _ => Ok(vec![]),
        }
    }

    pub async fn collections(
        &self,
        conn: &MainDbConn,
        org_id: Uuid,
    ) -> ShopResult<Vec<Collection>> {
        match self.listing(conn, org_id, Scope::Collections).await? {
            Some(Listing::Collections(cs)) => Ok(cs),
            _ => Ok(vec![]),
        }
    }

    pub async fn collection(
        &self,
        conn: &MainDbConn,
        org_id: Uuid,
        slug: &str,
    ) -> ShopResult<Option<(Collection, Vec<Product>)>> {
        match self
            .listing(conn, org_id, Scope::Collection(String::from(slug)))
            .await?
        {
            Some(Listing::Collection(col, ps)) => Ok(Some((col, ps))),
            _ => Ok(None),
        }
    }

    /// Drops everything cached for a tenant.
    pub fn invalidate(&self, org_id: Uuid) {
        if let Err(e) = self
            .cache
            .invalidate_entries_if(move |key: &(Uuid, Scope), _: &Listing| key.0 == org_id)
        {
            slog::warn!(slog_scope::logger(), "could not invalidate catalog cache"; "organization_id" => %org_id, "error" => %e);
        }
    }
}

#[derive(Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ProductPage {
    pub success: bool,
    pub page: usize,
    pub total_pages: usize,
    pub products: Vec<Product>,
}

#[get("/<slug>/products?<page>")]
async fn store_products(
    slug: &str,
    page: Option<usize>,
    catalog: &State<Catalog>,
    conn: MainDbConn,
) -> ShopResult<Json<ProductPage>> {
    let slug = String::from(slug);
    let org = conn
        .run(move |c| context::find_by_slug(c, &slug))
        .await?
        .ok_or_else(|| ShopError::not_found("Store not found"))?;
    let all = catalog.products(&conn, org.id).await?;
    let window = paginate(&all, page.unwrap_or(1));
    Ok(Json(ProductPage {
        success: true,
        page: window.page,
        total_pages: window.total_pages,
        products: window.items,
    }))
}

pub fn routes() -> Vec<Route> {
    routes![store_products]
}
