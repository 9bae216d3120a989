use chrono::Utc;
use diesel::prelude::*;
use lettre::message::header::ContentType;
use lettre::Message;
use rand::distributions::Alphanumeric;
use rand::{thread_rng, Rng};
use rocket::serde::json::Json;
use rocket::{Route, State};
use rusoto_core::Region;
use rusoto_ses::{RawMessage, SendRawEmailRequest, Ses, SesClient};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use url::form_urlencoded;
use uuid::Uuid;

use crate::base::*;
use crate::model::{EmailEvent, EmailSend};
use crate::schema::email_events::dsl::email_events;
use crate::schema::email_sends::dsl::email_sends;

pub const TRACKING_ID_LENGTH: usize = 24;

pub fn tracking_id() -> String {
    thread_rng()
        .sample_iter(&Alphanumeric)
        .take(TRACKING_ID_LENGTH)
        .map(char::from)
        .collect()
}

pub fn open_pixel_url(public_base: &str, id: &str) -> String {
    format!("{}/api/email/track?event=open&id={}", public_base, id)
}

pub fn click_url(public_base: &str, id: &str, target: &str) -> String {
    let encoded: String = form_urlencoded::byte_serialize(target.as_bytes()).collect();
    format!(
        "{}/api/email/track?event=click&amp;id={}&amp;url={}",
        public_base, id, encoded
    )
}

fn rewrite_links(html: &str, public_base: &str, id: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut rest = html;
    while let Some(pos) = rest.find("href=") {
        let (before, after) = rest.split_at(pos + "href=".len());
        out.push_str(before);
        rest = after;
        let quote = match rest.chars().next() {
            Some(q) if q == '"' || q == '\'' => q,
            _ => continue,
        };
        let value_start = quote.len_utf8();
        let end = match rest[value_start..].find(quote) {
            Some(end) => value_start + end,
            None => continue,
        };
        let target = &rest[value_start..end];
        let lower = target.to_ascii_lowercase();
        if lower.starts_with("http://") || lower.starts_with("https://") {
            let decoded = target.replace("&amp;", "&");
            out.push(quote);
            out.push_str(&click_url(public_base, id, &decoded));
            out.push(quote);
            rest = &rest[end + quote.len_utf8()..];
        }
    }
    out.push_str(rest);
    out
}

/// Routes absolute links through the click tracker and adds the open pixel.
pub fn inject_tracking(html: &str, public_base: &str, id: &str) -> String {
    let mut tracked = rewrite_links(html, public_base, id);
    let pixel = format!(
        r#"<img src="{}" width="1" height="1" alt="" style="display:none" />"#,
        open_pixel_url(public_base, id)
    );
    match tracked.to_ascii_lowercase().rfind("</body>") {
        Some(pos) => tracked.insert_str(pos, &pixel),
        None => tracked.push_str(&pixel),
    }
    tracked
}

/// Sends HTML mail through SES.
pub struct Mailer {
    client: SesClient,
    from: String,
}

impl Mailer {
    pub fn new(region: &str, from: &str) -> ShopResult<Self> {
        let region = Region::from_str(region)
            .map_err(|e| ShopError::Internal(format!("Invalid AWS region: {}", e)))?;
        Ok(Mailer {
            client: SesClient::new(region),
            from: String::from(from),
        })
    }

    /// Returns the provider message id.
    pub async fn send_html(&self, to: &str, subject: &str, html: String) -> ShopResult<String> {
        let email = Message::builder()
            .from(self.from.parse()?)
            .to(to.parse()?)
            .subject(subject)
            .header(ContentType::TEXT_HTML)
            .body(html)?;

        let request = SendRawEmailRequest {
            raw_message: RawMessage {
                data: email.formatted().into(),
            },
            ..Default::default()
        };
        let response = self.client.send_raw_email(request).await?;
        Ok(response.message_id)
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendRequest {
    organization_id: Option<String>,
    to: Option<String>,
    subject: Option<String>,
    html: Option<String>,
}

#[derive(Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct SendResponse {
    pub success: bool,
    pub tracking_id: String,
    pub message_id: String,
}

#[post("/send", data = "<request>")]
async fn send_tracked(
    request: Json<SendRequest>,
    config: &State<Config>,
    mailer: &State<Mailer>,
    conn: MainDbConn,
) -> ShopResult<Json<SendResponse>> {
    let org_id = required_uuid(request.organization_id.as_deref(), "organizationId")?;
    let to = required_text(request.to.as_deref(), "to")?.to_owned();
    let subject = required_text(request.subject.as_deref(), "subject")?.to_owned();
    let html = required_text(request.html.as_deref(), "html")?;

    let id = tracking_id();
    let body = inject_tracking(html, config.public_base(), &id);
    let message_id = mailer.send_html(&to, &subject, body).await?;
    slog::info!(slog_scope::logger(), "sent tracked email"; "organization_id" => %org_id, "tracking_id" => &id, "message_id" => &message_id);

    let send = EmailSend {
        id: Uuid::new_v4(),
        organization_id: org_id,
        tracking_id: id.clone(),
        recipient: to,
        subject,
        provider_message_id: Some(message_id.clone()),
        sent: Utc::now(),
    };
    let event = EmailEvent::new(id.clone(), "sent", None);
    conn.run(move |c| {
        c.transaction::<_, diesel::result::Error, _>(|c| {
            diesel::insert_into(email_sends).values(&send).execute(c)?;
            diesel::insert_into(email_events).values(&event).execute(c)?;
            Ok(())
        })
    })
    .await?;

    Ok(Json(SendResponse {
        success: true,
        tracking_id: id,
        message_id,
    }))
}

pub fn routes() -> Vec<Route> {
    routes![send_tracked]
}
