use rocket::form::Form;
use rocket::http::CookieJar;
use rocket::request::FlashMessage;
use rocket::response::{status, Flash, Redirect};
use rocket::{Route, State};
use rocket_dyn_templates::tera::{self, Value};
use rocket_dyn_templates::Template;
use serde::Serialize;
use std::collections::HashMap;
use uuid::Uuid;

use crate::base::*;
use crate::branding::{self, Branding};
use crate::cart::{self, CartNotice, CartView};
use crate::catalog::{self, Catalog, Page};
use crate::context::{self, StoreHost, TenantHost};
use crate::model::{Collection, Organization, Product};
use crate::settings;

/// Minor units as a decimal amount: `2550` is `25.50`.
pub fn format_cents(cents: i64) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let abs = cents.unsigned_abs();
    format!("{}{}.{:02}", sign, abs / 100, abs % 100)
}

/// Tera filter around `format_cents`.
pub fn money(value: &Value, _args: &HashMap<String, Value>) -> tera::Result<Value> {
    match value.as_i64() {
        Some(cents) => Ok(Value::String(format_cents(cents))),
        None => Err(tera::Error::msg(format!("money expects an integer, got {}", value))),
    }
}

#[derive(Responder)]
pub enum StorePage {
    Page(Template),
    Redirect(Redirect),
    Notice(Flash<Redirect>),
    Missing(status::NotFound<Template>),
}

/// How the store was addressed.
#[derive(Debug, Clone, PartialEq)]
pub enum Mount {
    Subdomain(String),
    Path(String),
}

impl Mount {
    /// Prefix of the store's links.
    pub fn base(&self) -> String {
        match self {
            Mount::Subdomain(_) => String::new(),
            Mount::Path(slug) => format!("/store/{}", slug),
        }
    }
}

pub struct Store {
    pub org: Organization,
    pub branding: Branding,
    pub base: String,
}

pub enum Resolved {
    Open(Store),
    Respond(StorePage),
}

#[derive(Serialize)]
struct NotFoundContext<'a> {
    root_domain: &'a str,
}

fn not_found(config: &Config) -> StorePage {
    StorePage::Missing(status::NotFound(Template::render(
        "not_found",
        &NotFoundContext {
            root_domain: &config.root_domain,
        },
    )))
}

async fn open_store(
    conn: &MainDbConn,
    config: &Config,
    host: &StoreHost,
    mount: Mount,
    rest: &str,
) -> ShopResult<Resolved> {
    let org = match &mount {
        Mount::Subdomain(sub) => context::resolve_store(conn, Some(sub.clone()), None).await?,
        Mount::Path(slug) => context::resolve_store(conn, None, Some(slug.clone())).await?,
    };
    let org = match org {
        Some(org) => org,
        None => return Ok(Resolved::Respond(not_found(config))),
    };
    if let Mount::Path(_) = mount {
        if let Some(target) = context::canonical_redirect(
            &org,
            &config.public_scheme(),
            &host.host,
            &config.root_domain,
            rest,
        ) {
            return Ok(Resolved::Respond(StorePage::Redirect(Redirect::found(target))));
        }
    }
    let org_id = org.id;
    let (store_settings, theme) = conn
        .run(move |c| -> ShopResult<_> {
            Ok((settings::find_settings(c, org_id)?, settings::find_theme(c, org_id)?))
        })
        .await?;
    let branding = Branding::resolve(
        &org,
        store_settings.as_ref().map(|s| s.store_name.as_str()),
        theme.as_ref(),
    );
    Ok(Resolved::Open(Store {
        org,
        branding,
        base: mount.base(),
    }))
}

#[derive(Serialize)]
struct StoreContext {
    store: Branding,
    base: String,
    canonical_url: String,
    notice: Option<CartNotice>,
    cart_count: u32,
    collections: Vec<Collection>,
    products: Option<Page<Product>>,
    collection: Option<Collection>,
    cart: Option<CartView>,
}

impl StoreContext {
    fn new(
        store: Store,
        config: &Config,
        flash: Option<FlashMessage<'_>>,
        cookies: &CookieJar<'_>,
    ) -> Self {
        StoreContext {
            canonical_url: branding::canonical_url(&store.org, &config.root_domain),
            notice: flash.as_ref().map(CartNotice::from_flash),
            cart_count: cart::load(cookies, &store.org.slug).item_count(),
            store: store.branding,
            base: store.base,
            collections: vec![],
            products: None,
            collection: None,
            cart: None,
        }
    }
}

async fn home_page(
    store: Store,
    config: &Config,
    flash: Option<FlashMessage<'_>>,
    cookies: &CookieJar<'_>,
    catalog: &Catalog,
    conn: &MainDbConn,
) -> ShopResult<StorePage> {
    let org_id = store.org.id;
    let mut ctx = StoreContext::new(store, config, flash, cookies);
    ctx.collections = catalog.collections(conn, org_id).await?;
    ctx.products = Some(catalog::paginate(&catalog.products(conn, org_id).await?, 1));
    Ok(StorePage::Page(Template::render("store", &ctx)))
}

async fn products_page(
    store: Store,
    page: Option<usize>,
    config: &Config,
    flash: Option<FlashMessage<'_>>,
    cookies: &CookieJar<'_>,
    catalog: &Catalog,
    conn: &MainDbConn,
) -> ShopResult<StorePage> {
    let org_id = store.org.id;
    let mut ctx = StoreContext::new(store, config, flash, cookies);
    let all = catalog.products(conn, org_id).await?;
    ctx.products = Some(catalog::paginate(&all, page.unwrap_or(1)));
    Ok(StorePage::Page(Template::render("store", &ctx)))
}

async fn collection_page(
    store: Store,
    slug: &str,
    page: Option<usize>,
    config: &Config,
    flash: Option<FlashMessage<'_>>,
    cookies: &CookieJar<'_>,
    catalog: &Catalog,
    conn: &MainDbConn,
) -> ShopResult<StorePage> {
    let org_id = store.org.id;
    let (collection, items) = match catalog.collection(conn, org_id, slug).await? {
        Some(found) => found,
        None => return Ok(not_found(config)),
    };
    let mut ctx = StoreContext::new(store, config, flash, cookies);
    ctx.collection = Some(collection);
    ctx.products = Some(catalog::paginate(&items, page.unwrap_or(1)));
    Ok(StorePage::Page(Template::render("collection", &ctx)))
}

async fn cart_page(
    store: Store,
    config: &Config,
    flash: Option<FlashMessage<'_>>,
    cookies: &CookieJar<'_>,
    conn: &MainDbConn,
) -> ShopResult<StorePage> {
    let org_id = store.org.id;
    let current = cart::load(cookies, &store.org.slug);
    let ids = current.product_ids();
    let items = conn
        .run(move |c| catalog::fetch_products_by_id(c, org_id, ids))
        .await?;
    let mut ctx = StoreContext::new(store, config, flash, cookies);
    ctx.cart = Some(current.priced(&items));
    Ok(StorePage::Page(Template::render("cart", &ctx)))
}

#[derive(FromForm, Debug)]
pub struct AddToCart<'r> {
    product_id: &'r str,
    quantity: Option<u32>,
    return_to: Option<&'r str>,
}

/// Redirect target keeping the requested page.
fn with_page(path: &str, page: Option<usize>) -> String {
    match page {
        Some(p) => format!("{}?page={}", path, p),
        None => String::from(path),
    }
}

/// Local path to send the shopper back to.
fn return_path(requested: Option<&str>, base: &str) -> String {
    match requested {
        Some(path) if path.starts_with('/') && !path.starts_with("//") => String::from(path),
        _ => format!("{}/cart", base),
    }
}

async fn add_to_cart(
    store: Store,
    form: &AddToCart<'_>,
    cookies: &CookieJar<'_>,
    conn: &MainDbConn,
) -> ShopResult<StorePage> {
    let back = Redirect::to(return_path(form.return_to, &store.base));
    let product_id = match Uuid::parse_str(form.product_id.trim()) {
        Ok(id) => id,
        Err(_) => return Ok(StorePage::Notice(Flash::error(back, "Unknown product"))),
    };
    let org_id = store.org.id;
    let product = conn
        .run(move |c| catalog::fetch_products_by_id(c, org_id, vec![product_id]))
        .await?
        .into_iter()
        .find(|p| p.is_active);
    let product = match product {
        Some(product) => product,
        None => return Ok(StorePage::Notice(Flash::error(back, "Unknown product"))),
    };
    let mut current = cart::load(cookies, &store.org.slug);
    let quantity = current.add(product.id, form.quantity.unwrap_or(1));
    cart::save(cookies, &store.org.slug, &current);
    slog::debug!(slog_scope::logger(), "cart updated"; "store" => &store.org.slug, "product_id" => %product.id, "quantity" => quantity);
    Ok(StorePage::Notice(Flash::success(
        back,
        cart::added_message(&product.name, quantity),
    )))
}

#[derive(Serialize)]
struct IndexContext<'a> {
    root_domain: &'a str,
}

#[get("/", rank = 2)]
pub fn index(config: &State<Config>) -> Template {
    Template::render(
        "index",
        &IndexContext {
            root_domain: &config.root_domain,
        },
    )
}

#[get("/", rank = 1)]
async fn tenant_home(
    tenant: TenantHost,
    host: StoreHost,
    flash: Option<FlashMessage<'_>>,
    cookies: &CookieJar<'_>,
    config: &State<Config>,
    catalog: &State<Catalog>,
    conn: MainDbConn,
) -> ShopResult<StorePage> {
    match open_store(&conn, config, &host, Mount::Subdomain(tenant.0), "").await? {
        Resolved::Open(store) => home_page(store, config, flash, cookies, catalog, &conn).await,
        Resolved::Respond(page) => Ok(page),
    }
}

#[get("/products?<page>")]
async fn tenant_products(
    tenant: TenantHost,
    host: StoreHost,
    page: Option<usize>,
    flash: Option<FlashMessage<'_>>,
    cookies: &CookieJar<'_>,
    config: &State<Config>,
    catalog: &State<Catalog>,
    conn: MainDbConn,
) -> ShopResult<StorePage> {
    match open_store(&conn, config, &host, Mount::Subdomain(tenant.0), "products").await? {
        Resolved::Open(store) => {
            products_page(store, page, config, flash, cookies, catalog, &conn).await
        }
        Resolved::Respond(page) => Ok(page),
    }
}

#[get("/collections/<collection>?<page>")]
async fn tenant_collection(
    tenant: TenantHost,
    host: StoreHost,
    collection: &str,
    page: Option<usize>,
    flash: Option<FlashMessage<'_>>,
    cookies: &CookieJar<'_>,
    config: &State<Config>,
    catalog: &State<Catalog>,
    conn: MainDbConn,
) -> ShopResult<StorePage> {
    let rest = format!("collections/{}", collection);
    match open_store(&conn, config, &host, Mount::Subdomain(tenant.0), &rest).await? {
        Resolved::Open(store) => {
            collection_page(store, collection, page, config, flash, cookies, catalog, &conn).await
        }
        Resolved::Respond(page) => Ok(page),
    }
}

#[get("/cart")]
async fn tenant_cart(
    tenant: TenantHost,
    host: StoreHost,
    flash: Option<FlashMessage<'_>>,
    cookies: &CookieJar<'_>,
    config: &State<Config>,
    conn: MainDbConn,
) -> ShopResult<StorePage> {
    match open_store(&conn, config, &host, Mount::Subdomain(tenant.0), "cart").await? {
        Resolved::Open(store) => cart_page(store, config, flash, cookies, &conn).await,
        Resolved::Respond(page) => Ok(page),
    }
}

#[post("/cart", data = "<form>")]
async fn tenant_add_to_cart(
    tenant: TenantHost,
    host: StoreHost,
    form: Form<AddToCart<'_>>,
    cookies: &CookieJar<'_>,
    config: &State<Config>,
    conn: MainDbConn,
) -> ShopResult<StorePage> {
    match open_store(&conn, config, &host, Mount::Subdomain(tenant.0), "cart").await? {
        Resolved::Open(store) => add_to_cart(store, &form, cookies, &conn).await,
        Resolved::Respond(page) => Ok(page),
    }
}

#[get("/store/<slug>")]
async fn path_home(
    slug: &str,
    host: StoreHost,
    flash: Option<FlashMessage<'_>>,
    cookies: &CookieJar<'_>,
    config: &State<Config>,
    catalog: &State<Catalog>,
    conn: MainDbConn,
) -> ShopResult<StorePage> {
    match open_store(&conn, config, &host, Mount::Path(String::from(slug)), "").await? {
        Resolved::Open(store) => home_page(store, config, flash, cookies, catalog, &conn).await,
        Resolved::Respond(page) => Ok(page),
    }
}

#[get("/store/<slug>/products?<page>")]
async fn path_products(
    slug: &str,
    host: StoreHost,
    page: Option<usize>,
    flash: Option<FlashMessage<'_>>,
    cookies: &CookieJar<'_>,
    config: &State<Config>,
    catalog: &State<Catalog>,
    conn: MainDbConn,
) -> ShopResult<StorePage> {
    let rest = with_page("products", page);
    match open_store(&conn, config, &host, Mount::Path(String::from(slug)), &rest).await? {
        Resolved::Open(store) => {
            products_page(store, page, config, flash, cookies, catalog, &conn).await
        }
        Resolved::Respond(page) => Ok(page),
    }
}

#[get("/store/<slug>/collections/<collection>?<page>")]
async fn path_collection(
    slug: &str,
    collection: &str,
    host: StoreHost,
    page: Option<usize>,
    flash: Option<FlashMessage<'_>>,
    cookies: &CookieJar<'_>,
    config: &State<Config>,
    catalog: &State<Catalog>,
    conn: MainDbConn,
) -> ShopResult<StorePage> {
    let rest = with_page(&format!("collections/{}", collection), page);
    match open_store(&conn, config, &host, Mount::Path(String::from(slug)), &rest).await? {
        Resolved::Open(store) => {
            collection_page(store, collection, page, config, flash, cookies, catalog, &conn).await
        }
        Resolved::Respond(page) => Ok(page),
    }
}

#[get("/store/<slug>/cart")]
async fn path_cart(
    slug: &str,
    host: StoreHost,
    flash: Option<FlashMessage<'_>>,
    cookies: &CookieJar<'_>,
    config: &State<Config>,
    conn: MainDbConn,
) -> ShopResult<StorePage> {
    match open_store(&conn, config, &host, Mount::Path(String::from(slug)), "cart").await? {
        Resolved::Open(store) => cart_page(store, config, flash, cookies, &conn).await,
        Resolved::Respond(page) => Ok(page),
    }
}

/// Form posts are not redirected to the subdomain; the cart stays with the host it was posted to.
#[post("/store/<slug>/cart", data = "<form>")]
async fn path_add_to_cart(
    slug: &str,
    form: Form<AddToCart<'_>>,
    cookies: &CookieJar<'_>,
    config: &State<Config>,
    conn: MainDbConn,
) -> ShopResult<StorePage> {
    let mount = Mount::Path(String::from(slug));
    match context::resolve_store(&conn, None, Some(String::from(slug))).await? {
        None => Ok(not_found(config)),
        Some(org) => {
            let store = Store {
                branding: Branding::resolve(&org, None, None),
                org,
                base: mount.base(),
            };
            add_to_cart(store, &form, cookies, &conn).await
        }
    }
}

pub fn routes() -> Vec<Route> {
    routes![
        index,
        tenant_home,
        tenant_products,
        tenant_collection,
        tenant_cart,
        tenant_add_to_cart,
        path_home,
        path_products,
        path_collection,
        path_cart,
        path_add_to_cart
    ]
}
