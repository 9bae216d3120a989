mod common;

use common::{assert_failure, setup};
use rocket::http::{ContentType, Status};

#[test]
fn preflight_is_short_circuited() {
    let client = setup();
    let response = client.options("/api/payments/intents").dispatch();
    assert_eq!(response.status(), Status::NoContent);
    assert_eq!(
        Some("*"),
        response.headers().get_one("Access-Control-Allow-Origin")
    );
    assert!(response
        .headers()
        .get_one("Access-Control-Allow-Headers")
        .unwrap()
        .contains("content-type"));
}

#[test]
fn api_responses_carry_cors_headers() {
    let client = setup();
    let response = client
        .post("/api/events")
        .header(ContentType::JSON)
        .body("{}")
        .dispatch();
    assert_eq!(response.status(), Status::BadRequest);
    assert_eq!(
        Some("*"),
        response.headers().get_one("Access-Control-Allow-Origin")
    );
}

#[test]
fn unknown_api_route_is_json() {
    let client = setup();
    let error = assert_failure(client.get("/api/nothing/here"), Status::NotFound);
    assert_eq!("Not Found", error);
}

#[test]
fn admin_api_requires_key() {
    let client = setup();
    let response = client.get("/api/admin/orgs").dispatch();
    assert_eq!(response.status(), Status::Unauthorized);

    let response = client
        .get("/api/admin/orgs")
        .header(rocket::http::Header::new("X-Admin-Key", "wrong"))
        .dispatch();
    assert_eq!(response.status(), Status::Unauthorized);
}

#[test]
fn platform_index() {
    let client = setup();
    let response = client.get("/").dispatch();
    assert_eq!(response.status(), Status::Ok);
    assert_eq!(response.content_type(), Some(ContentType::HTML));
    assert!(response.into_string().unwrap().contains("Launch your store"));
}
