use serde::Serialize;

use crate::model::{Organization, StoreTheme};

pub const DEFAULT_PRIMARY: &str = "#111827";
pub const DEFAULT_ACCENT: &str = "#6366f1";
pub const DEFAULT_FONT: &str = "system-ui, sans-serif";

/// Presentation values of a store, theme overrides applied.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct Branding {
    pub name: String,
    pub initials: String,
    pub logo_url: Option<String>,
    pub primary_color: String,
    pub accent_color: String,
    pub font_family: String,
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(String::from)
}

/// Up to two uppercase initials, from the first letters of the first two words.
pub fn initials(name: &str) -> String {
    let words: Vec<&str> = name.split_whitespace().collect();
    let letters: String = match words.as_slice() {
        [] => String::new(),
        [one] => one.chars().filter(|c| c.is_alphanumeric()).take(2).collect(),
        [first, second, ..] => first
            .chars()
            .take(1)
            .chain(second.chars().take(1))
            .collect(),
    };
    letters.to_uppercase()
}

impl Branding {
    pub fn resolve(
        org: &Organization,
        store_name: Option<&str>,
        theme: Option<&StoreTheme>,
    ) -> Self {
        let name = store_name
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .unwrap_or(&org.name)
            .to_string();
        let themed = |value: Option<&Option<String>>, default: &str| {
            value
                .and_then(non_empty)
                .unwrap_or_else(|| String::from(default))
        };
        Branding {
            initials: initials(&name),
            logo_url: theme.and_then(|t| non_empty(&t.logo_url)),
            primary_color: themed(theme.map(|t| &t.primary_color), DEFAULT_PRIMARY),
            accent_color: themed(theme.map(|t| &t.accent_color), DEFAULT_ACCENT),
            font_family: themed(theme.map(|t| &t.font_family), DEFAULT_FONT),
            name,
        }
    }
}

/// Public address of a store: custom domain, then subdomain, then slug path.
pub fn canonical_url(org: &Organization, root_domain: &str) -> String {
    if let Some(domain) = org.domain.as_deref().filter(|d| !d.is_empty()) {
        return format!("https://{}", domain);
    }
    if let Some(sub) = org.subdomain.as_deref().filter(|s| !s.is_empty()) {
        return format!("https://{}.{}", sub, root_domain);
    }
    format!("https://{}/store/{}", root_domain, org.slug)
}
