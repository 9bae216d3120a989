//! Shopping cart held in a private cookie, and the toast shown after adding to it.

use rocket::http::{Cookie, CookieJar};
use rocket::request::FlashMessage;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::Product;

pub const MIN_QUANTITY: u32 = 1;
pub const MAX_QUANTITY: u32 = 99;
pub const NOTICE_DISMISS_MS: u64 = 4000;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct CartLine {
    pub product_id: Uuid,
    pub quantity: u32,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct Cart {
    pub lines: Vec<CartLine>,
}

fn clamp_quantity(quantity: u32) -> u32 {
    quantity.clamp(MIN_QUANTITY, MAX_QUANTITY)
}

impl Cart {
    /// Adds to the line of `product_id`, creating it if needed. Returns the new quantity.
    pub fn add(&mut self, product_id: Uuid, quantity: u32) -> u32 {
        match self.lines.iter_mut().find(|l| l.product_id == product_id) {
            Some(line) => {
                line.quantity = clamp_quantity(line.quantity.saturating_add(quantity));
                line.quantity
            }
            None => {
                let quantity = clamp_quantity(quantity);
                self.lines.push(CartLine {
                    product_id,
                    quantity,
                });
                quantity
            }
        }
    }

    pub fn product_ids(&self) -> Vec<Uuid> {
        self.lines.iter().map(|l| l.product_id).collect()
    }

    pub fn item_count(&self) -> u32 {
        self.lines.iter().map(|l| l.quantity).sum()
    }

    /// Prices the cart against `products`; lines for unknown products are dropped.
    pub fn priced(&self, products: &[Product]) -> CartView {
        let lines: Vec<PricedLine> = self
            .lines
            .iter()
            .filter_map(|line| {
                products
                    .iter()
                    .find(|p| p.id == line.product_id)
                    .map(|p| PricedLine {
                        product: p.clone(),
                        quantity: line.quantity,
                        line_total_cents: p.price_cents * i64::from(line.quantity),
                    })
            })
            .collect();
        CartView {
            total_cents: lines.iter().map(|l| l.line_total_cents).sum(),
            lines,
        }
    }
}

#[derive(Serialize, Debug, Clone)]
pub struct PricedLine {
    pub product: Product,
    pub quantity: u32,
    pub line_total_cents: i64,
}

#[derive(Serialize, Debug, Clone)]
pub struct CartView {
    pub lines: Vec<PricedLine>,
    pub total_cents: i64,
}

pub fn cookie_name(store_slug: &str) -> String {
    format!("cart_{}", store_slug)
}

pub fn load(cookies: &CookieJar<'_>, store_slug: &str) -> Cart {
    cookies
        .get_private(&cookie_name(store_slug))
        .and_then(|c| serde_json::from_str(c.value()).ok())
        .unwrap_or_default()
}

pub fn save(cookies: &CookieJar<'_>, store_slug: &str, cart: &Cart) {
    match serde_json::to_string(cart) {
        Ok(value) => cookies.add_private(Cookie::new(cookie_name(store_slug), value)),
        Err(e) => {
            slog::error!(slog_scope::logger(), "could not store cart"; "store" => store_slug, "error" => %e)
        }
    }
}

/// Transient confirmation after a cart change.
///
/// The page hides it after `dismiss_after_ms`; its close button clears that timer.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct CartNotice {
    pub message: String,
    pub kind: String,
    pub dismiss_after_ms: u64,
}

impl CartNotice {
    pub fn new<S: Into<String>>(kind: &str, message: S) -> Self {
        CartNotice {
            message: message.into(),
            kind: String::from(kind),
            dismiss_after_ms: NOTICE_DISMISS_MS,
        }
    }

    pub fn from_flash(flash: &FlashMessage<'_>) -> Self {
        CartNotice::new(flash.kind(), flash.message())
    }
}

pub fn added_message(product_name: &str, quantity: u32) -> String {
    format!("Added {} to your cart (quantity {})", product_name, quantity)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adding_merges_lines() {
        let mut cart = Cart::default();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        assert_eq!(1, cart.add(a, 1));
        assert_eq!(3, cart.add(a, 2));
        assert_eq!(2, cart.add(b, 2));
        assert_eq!(2, cart.lines.len());
        assert_eq!(5, cart.item_count());
        assert_eq!(vec![a, b], cart.product_ids());
    }

    #[test]
    fn quantities_are_clamped() {
        let mut cart = Cart::default();
        let a = Uuid::new_v4();
        assert_eq!(1, cart.add(a, 0));
        assert_eq!(99, cart.add(a, 500));
        assert_eq!(99, cart.add(a, u32::MAX));
    }

    #[test]
    fn pricing_drops_unknown_products() {
        let mut shoe = Product {
            id: Uuid::new_v4(),
            organization_id: Uuid::new_v4(),
            name: String::from("Shoe"),
            slug: String::from("shoe"),
            description: None,
            price_cents: 2_500,
            currency: String::from("usd"),
            image_url: None,
            is_active: true,
            created: chrono::Utc::now(),
        };
        let mut cart = Cart::default();
        cart.add(shoe.id, 3);
        cart.add(Uuid::new_v4(), 1);
        let view = cart.priced(&[shoe.clone()]);
        assert_eq!(1, view.lines.len());
        assert_eq!(7_500, view.total_cents);
        shoe.price_cents = 0;
        assert_eq!(0, cart.priced(&[shoe]).total_cents);
    }

    #[test]
    fn notice_dismisses_after_four_seconds() {
        let notice = CartNotice::new("success", added_message("Shoe", 2));
        let json = serde_json::to_value(&notice).unwrap();
        assert_eq!(4000, json["dismiss_after_ms"]);
        assert_eq!("success", json["kind"]);
        assert_eq!("Added Shoe to your cart (quantity 2)", json["message"]);
    }
}
