//! Email open/click tracking and marketing event capture.

use chrono::Utc;
use diesel::pg::PgConnection;
use diesel::prelude::*;
use rocket::http::Header;
use rocket::response::Redirect;
use rocket::serde::json::Json;
use rocket::Route;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;
use uuid::Uuid;

use crate::base::*;
use crate::model::{EmailEvent, MarketingEvent};
use crate::schema::email_events::dsl::email_events;
use crate::schema::email_sends as ess;
use crate::schema::email_sends::dsl::email_sends;
use crate::schema::marketing_events::dsl::marketing_events;

/// 1x1 transparent GIF.
const PIXEL_GIF: &str = "R0lGODlhAQABAIAAAAAAAP///yH5BAEAAAAALAAAAAABAAEAAAIBRAA7";

pub fn pixel_bytes() -> Vec<u8> {
    base64::decode(PIXEL_GIF).unwrap_or_default()
}

#[derive(Responder)]
#[response(content_type = "image/gif")]
pub struct Pixel {
    body: Vec<u8>,
    cache: Header<'static>,
}

impl Pixel {
    fn new() -> Self {
        Pixel {
            body: pixel_bytes(),
            cache: Header::new("Cache-Control", "no-store, no-cache, must-revalidate"),
        }
    }
}

#[derive(Responder)]
pub enum Tracked {
    Pixel(Pixel),
    Click(Redirect),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackEvent {
    Open,
    Click(String),
}

impl TrackEvent {
    fn kind(&self) -> &'static str {
        match self {
            TrackEvent::Open => "open",
            TrackEvent::Click(_) => "click",
        }
    }
}

/// Accepts only absolute `http`/`https` URLs.
pub fn validate_click_url(raw: &str) -> Option<String> {
    let url = Url::parse(raw.trim()).ok()?;
    match url.scheme() {
        "http" | "https" if url.host().is_some() => Some(url.into()),
        _ => None,
    }
}

pub fn parse_track(
    event: Option<&str>,
    id: Option<&str>,
    url: Option<&str>,
) -> ShopResult<(String, TrackEvent)> {
    let id = required_text(id, "id")?.to_owned();
    let event = match required_text(event, "event")? {
        "open" => TrackEvent::Open,
        "click" => {
            let target = url
                .and_then(validate_click_url)
                .ok_or_else(|| ShopError::validation("Invalid click url"))?;
            TrackEvent::Click(target)
        }
        other => return Err(ShopError::validation(format!("Unknown event: {}", other))),
    };
    Ok((id, event))
}

/// Stores the event when the tracking id belongs to a known send.
///
/// Returns whether anything was recorded.
pub fn record_email_event(c: &mut PgConnection, id: &str, event: &TrackEvent) -> QueryResult<bool> {
    let known: i64 = email_sends
        .filter(ess::tracking_id.eq(id))
        .count()
        .get_result(c)?;
    if known == 0 {
        return Ok(false);
    }
    let url = match event {
        TrackEvent::Open => None,
        TrackEvent::Click(target) => Some(target.clone()),
    };
    diesel::insert_into(email_events)
        .values(&EmailEvent::new(id, event.kind(), url))
        .execute(c)?;
    Ok(true)
}

#[get("/track?<event>&<id>&<url>")]
async fn track(
    event: Option<&str>,
    id: Option<&str>,
    url: Option<&str>,
    conn: MainDbConn,
) -> ShopResult<Tracked> {
    let (id, event) = parse_track(event, id, url)?;
    let log = slog_scope::logger();
    let recorded = {
        let id = id.clone();
        let event = event.clone();
        conn.run(move |c| record_email_event(c, &id, &event)).await
    };
    let known = match recorded {
        Ok(true) => {
            slog::debug!(log, "email event recorded"; "tracking_id" => &id, "event" => event.kind());
            true
        }
        Ok(false) => {
            slog::warn!(log, "unknown tracking id"; "tracking_id" => &id, "event" => event.kind());
            false
        }
        Err(e) => {
            slog::error!(log, "could not record email event"; "tracking_id" => &id, "error" => %e);
            true
        }
    };
    match event {
        TrackEvent::Open => Ok(Tracked::Pixel(Pixel::new())),
        // only links of emails we sent are followed
        TrackEvent::Click(_) if !known => Err(ShopError::not_found("Unknown tracking id")),
        TrackEvent::Click(target) => Ok(Tracked::Click(Redirect::to(target))),
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRequest {
    organization_id: Option<String>,
    user_id: Option<String>,
    session_id: Option<String>,
    event_type: Option<String>,
    event_data: Option<Value>,
}

#[derive(Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct EventRecorded {
    pub success: bool,
    pub event_id: Uuid,
}

#[post("/", data = "<request>")]
async fn record_event(
    request: Json<EventRequest>,
    conn: MainDbConn,
) -> ShopResult<Json<EventRecorded>> {
    let request = request.into_inner();
    let org_id = required_uuid(request.organization_id.as_deref(), "organizationId")?;
    let event_type = required_text(request.event_type.as_deref(), "eventType")?.to_owned();
    let event = MarketingEvent {
        id: Uuid::new_v4(),
        organization_id: org_id,
        user_id: request.user_id,
        session_id: request.session_id,
        event_type,
        event_data: request.event_data.unwrap_or_else(|| Value::Object(Default::default())),
        created: Utc::now(),
    };
    let event_id = event.id;
    conn.run(move |c| diesel::insert_into(marketing_events).values(&event).execute(c))
        .await?;
    Ok(Json(EventRecorded {
        success: true,
        event_id,
    }))
}

pub fn email_routes() -> Vec<Route> {
    routes![track]
}

pub fn event_routes() -> Vec<Route> {
    routes![record_event]
}
