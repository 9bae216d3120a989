mod common;

use chrono::Utc;
use common::{assert_failure, connect, create_org, delete_org, json_ok_response, setup};
use diesel::prelude::*;
use rocket::http::{ContentType, Status};
use serde_json::json;
use serial_test::serial;
use tenantshop::email::tracking_id;
use tenantshop::model::{EmailEvent, EmailSend};
use tenantshop::schema::email_events::dsl as ees;
use tenantshop::schema::email_sends::dsl as ess;
use tenantshop::tracking::EventRecorded;
use uuid::Uuid;

#[test]
#[serial]
fn marketing_events() {
    let client = setup();
    let org = create_org(&client, "Events", "events-shop", None);

    let recorded: EventRecorded = json_ok_response(
        client
            .post("/api/events")
            .header(ContentType::JSON)
            .body(
                json!({
                    "organizationId": org.id.to_string(),
                    "sessionId": "s-1",
                    "eventType": "page_view",
                    "eventData": {"path": "/products"}
                })
                .to_string(),
            ),
    );
    assert!(recorded.success);

    let error = assert_failure(
        client
            .post("/api/events")
            .header(ContentType::JSON)
            .body(json!({"organizationId": org.id.to_string()}).to_string()),
        Status::BadRequest,
    );
    assert_eq!("Missing required field: eventType", error);

    assert_failure(
        client
            .post("/api/events")
            .header(ContentType::JSON)
            .body(json!({"organizationId": "nope", "eventType": "x"}).to_string()),
        Status::BadRequest,
    );

    delete_org(&client, &org);
}

#[test]
fn open_pixel() {
    let client = setup();
    let response = client.get("/api/email/track?event=open&id=unknown").dispatch();
    assert_eq!(response.status(), Status::Ok);
    assert_eq!(response.content_type(), Some(ContentType::GIF));
    assert_eq!(Some("no-store"), response.headers().get_one("Cache-Control"));
    let body = response.into_bytes().unwrap();
    assert!(body.starts_with(b"GIF89a"));
}

#[test]
fn unknown_clicks_are_not_followed() {
    let client = setup();
    let error = assert_failure(
        client.get("/api/email/track?event=click&id=unknown&url=https%3A%2F%2Fevil.example%2F"),
        Status::NotFound,
    );
    assert_eq!("Unknown tracking id", error);
}

#[test]
fn bad_track_requests() {
    let client = setup();
    assert_failure(
        client.get("/api/email/track?event=click&id=abc&url=javascript%3Aalert(1)"),
        Status::BadRequest,
    );
    assert_failure(client.get("/api/email/track?event=click&id=abc"), Status::BadRequest);
    assert_failure(client.get("/api/email/track?event=bounce&id=abc"), Status::BadRequest);
    assert_failure(client.get("/api/email/track?event=open"), Status::BadRequest);
}

#[test]
#[serial]
fn events_of_known_sends_are_recorded() {
    let client = setup();
    let org = create_org(&client, "Mailer", "mailer-shop", None);
    let tracking = tracking_id();

    let mut c = connect();
    diesel::insert_into(ess::email_sends)
        .values(&EmailSend {
            id: Uuid::new_v4(),
            organization_id: org.id,
            tracking_id: tracking.clone(),
            recipient: String::from("buyer@example.com"),
            subject: String::from("Hello"),
            provider_message_id: None,
            sent: Utc::now(),
        })
        .execute(&mut c)
        .unwrap();

    let response = client
        .get(format!("/api/email/track?event=open&id={}", tracking))
        .dispatch();
    assert_eq!(response.status(), Status::Ok);
    let response = client
        .get(format!(
            "/api/email/track?event=click&id={}&url=https%3A%2F%2Fexample.com%2Fsale%3Fa%3D1",
            tracking
        ))
        .dispatch();
    assert_eq!(response.status(), Status::SeeOther);
    assert_eq!(
        Some("https://example.com/sale?a=1"),
        response.headers().get_one("Location")
    );

    let events: Vec<EmailEvent> = ees::email_events
        .filter(ees::tracking_id.eq(&tracking))
        .order(ees::created.asc())
        .load(&mut c)
        .unwrap();
    assert_eq!(2, events.len());
    assert_eq!("open", events[0].event_type);
    assert_eq!("click", events[1].event_type);
    assert_eq!(Some(String::from("https://example.com/sale?a=1")), events[1].url);

    diesel::delete(ees::email_events.filter(ees::tracking_id.eq(&tracking)))
        .execute(&mut c)
        .unwrap();
    delete_org(&client, &org);
}
