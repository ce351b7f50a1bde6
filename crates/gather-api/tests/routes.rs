use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;

use gather_api::router;
use gather_api::state::AppStateInner;
use gather_db::Database;

fn app() -> Router {
    let db = Database::open_in_memory().unwrap();
    router(AppStateInner::new(db, "test-secret".into(), None))
}

async fn send(
    app: &Router,
    method: &str,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

async fn register(app: &Router, username: &str) -> (String, String) {
    let (status, body) = send(
        app,
        "POST",
        "/api/auth/register",
        None,
        Some(json!({ "username": username, "password": "correct horse" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    (
        body["user_id"].as_str().unwrap().to_string(),
        body["token"].as_str().unwrap().to_string(),
    )
}

#[tokio::test]
async fn one_character_suggestion_query_is_empty() {
    let app = app();
    let (status, body) = send(&app, "GET", "/api/search/suggestions?q=a", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!([]));

    let (status, body) = send(&app, "GET", "/api/search/suggestions", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!([]));
}

#[tokio::test]
async fn simultaneous_registrations_of_one_name_conflict() {
    let app = app();
    let body = json!({ "username": "samename", "password": "correct horse" });
    let (a, b) = tokio::join!(
        send(&app, "POST", "/api/auth/register", None, Some(body.clone())),
        send(&app, "POST", "/api/auth/register", None, Some(body.clone())),
    );
    let mut statuses = vec![a.0, b.0];
    statuses.sort();
    assert_eq!(statuses, vec![StatusCode::CREATED, StatusCode::CONFLICT]);

    let (status, body) = send(&app, "POST", "/api/auth/register", None, Some(body)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "username is taken");
}

#[tokio::test]
async fn protected_routes_need_a_token() {
    let app = app();
    let (status, _) = send(&app, "GET", "/api/notifications", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (status, _) = send(&app, "GET", "/api/notifications", Some("garbage"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn search_finds_groups_and_events_by_substring() {
    let app = app();
    let (_, token) = register(&app, "organizer").await;

    let (status, _) = send(
        &app,
        "POST",
        "/api/groups",
        Some(&token),
        Some(json!({ "name": "Birdwatchers", "city": "Parkgate" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, _) = send(
        &app,
        "POST",
        "/api/events",
        Some(&token),
        Some(json!({
            "title": "Sunday PARK run",
            "kind": "standard",
            "privacy": "public",
            "recurrence": {
                "repeat_interval": "weekly",
                "recurrence_weekday": 0,
                "recurrence_time": "09:00"
            },
            "location": { "kind": "address", "address": "Main gate" }
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, _) = send(
        &app,
        "POST",
        "/api/events",
        Some(&token),
        Some(json!({
            "title": "Book club",
            "kind": "standard",
            "privacy": "public",
            "starts_at": "2099-01-01T18:00:00Z",
            "location": { "kind": "online" }
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = send(&app, "GET", "/api/search?q=%20park%20", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["events"].as_array().unwrap().len(), 1);
    assert_eq!(body["events"][0]["title"], "Sunday PARK run");
    assert_eq!(body["groups"].as_array().unwrap().len(), 1);
    assert_eq!(body["groups"][0]["member_count"], 1);

    let (_, body) = send(&app, "GET", "/api/search/suggestions?q=pa", None, None).await;
    let kinds: Vec<&str> = body
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s["type"].as_str().unwrap())
        .collect();
    assert_eq!(kinds, vec!["event", "group"]);
}

#[tokio::test]
async fn invalid_rule_is_reported_on_its_field() {
    let app = app();
    let (_, token) = register(&app, "organizer").await;
    let (status, body) = send(
        &app,
        "POST",
        "/api/events",
        Some(&token),
        Some(json!({
            "title": "Quiz",
            "kind": "lightning",
            "privacy": "public",
            "recurrence": { "repeat_interval": "weekly", "recurrence_time": "20:00" },
            "location": { "kind": "address", "address": "The Anchor" }
        })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["errors"]["recurrence_weekday"].is_string());

    let (status, body) = send(
        &app,
        "POST",
        "/api/events",
        Some(&token),
        Some(json!({
            "title": "Quiz",
            "kind": "lightning",
            "privacy": "public",
            "starts_at": "2099-05-01T19:00:00Z",
            "recurrence": { "recurrence_weekday": 5, "recurrence_time": "20:00" },
            "location": { "kind": "address", "address": "The Anchor" }
        })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["errors"]["repeat_interval"].is_string());
}

#[tokio::test]
async fn conversation_pages_and_authorization() {
    let app = app();
    let (_, organizer) = register(&app, "organizer").await;
    let (_, outsider) = register(&app, "outsider").await;

    let (_, group) = send(
        &app,
        "POST",
        "/api/groups",
        Some(&organizer),
        Some(json!({ "name": "Chess" })),
    )
    .await;
    let group_id = group["id"].as_str().unwrap().to_string();
    let subject = json!({ "subject": { "type": "group", "id": group_id } });

    let (status, first) =
        send(&app, "POST", "/api/conversations", Some(&organizer), Some(subject.clone())).await;
    assert_eq!(status, StatusCode::OK);
    let (_, again) = send(&app, "POST", "/api/conversations", Some(&organizer), Some(subject.clone())).await;
    assert_eq!(first["id"], again["id"]);

    let (status, body) = send(&app, "POST", "/api/conversations", Some(&outsider), Some(subject)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body, json!({ "error": "not authorized" }));

    let conversation_id = first["id"].as_str().unwrap();
    let messages_uri = format!("/api/conversations/{}/messages", conversation_id);
    for i in 0..5 {
        let (status, _) = send(
            &app,
            "POST",
            &messages_uri,
            Some(&organizer),
            Some(json!({ "content": format!("  move {}  ", i) })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
    }
    let (status, _) = send(&app, "POST", &messages_uri, Some(&organizer), Some(json!({ "content": "   " }))).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (status, newest) = send(&app, "GET", &format!("{}?limit=3", messages_uri), Some(&organizer), None).await;
    assert_eq!(status, StatusCode::OK);
    let contents: Vec<&str> = newest["messages"]
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["content"].as_str().unwrap())
        .collect();
    assert_eq!(contents, vec!["move 2", "move 3", "move 4"]);

    let cursor = newest["next_cursor"].as_str().unwrap();
    let (_, older) = send(
        &app,
        "GET",
        &format!("{}?limit=3&cursor={}", messages_uri, cursor),
        Some(&organizer),
        None,
    )
    .await;
    assert_eq!(older["messages"].as_array().unwrap().len(), 2);
    assert!(older["next_cursor"].is_null());

    let (status, _) = send(&app, "GET", &format!("{}?cursor=%21%21", messages_uri), Some(&organizer), None).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (status, _) = send(&app, "GET", &messages_uri, Some(&outsider), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn approval_groups_notify_the_organizer() {
    let app = app();
    let (_, organizer) = register(&app, "organizer").await;
    let (_, applicant) = register(&app, "applicant").await;

    let (_, group) = send(
        &app,
        "POST",
        "/api/groups",
        Some(&organizer),
        Some(json!({ "name": "Choir", "requires_approval": true })),
    )
    .await;
    let join_uri = format!("/api/groups/{}/join", group["id"].as_str().unwrap());

    let (_, body) = send(&app, "POST", &join_uri, Some(&applicant), None).await;
    assert_eq!(body["outcome"], "requested");
    let (_, body) = send(&app, "POST", &join_uri, Some(&applicant), None).await;
    assert_eq!(body["outcome"], "requested");

    let (_, unread) = send(&app, "GET", "/api/notifications/unread", Some(&organizer), None).await;
    assert_eq!(unread["count"], 1);

    let (_, list) = send(&app, "GET", "/api/notifications", Some(&organizer), None).await;
    assert_eq!(list[0]["type"], "new_member_request");
    let id = list[0]["id"].as_str().unwrap();

    let (status, _) = send(&app, "POST", &format!("/api/notifications/{}/read", id), Some(&applicant), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = send(&app, "POST", &format!("/api/notifications/{}/read", id), Some(&organizer), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (_, unread) = send(&app, "GET", "/api/notifications/unread", Some(&organizer), None).await;
    assert_eq!(unread["count"], 0);
}

#[tokio::test]
async fn organizer_decides_pending_requests() {
    let app = app();
    let (_, organizer) = register(&app, "organizer").await;
    let (applicant_id, applicant) = register(&app, "applicant").await;
    let (declined_id, declined) = register(&app, "declined").await;

    let (_, group) = send(
        &app,
        "POST",
        "/api/groups",
        Some(&organizer),
        Some(json!({ "name": "Choir", "requires_approval": true })),
    )
    .await;
    let group_uri = format!("/api/groups/{}", group["id"].as_str().unwrap());
    let join_uri = format!("{}/join", group_uri);
    send(&app, "POST", &join_uri, Some(&applicant), None).await;
    send(&app, "POST", &join_uri, Some(&declined), None).await;

    let approve_uri = format!("{}/requests/{}/approve", group_uri, applicant_id);
    let (status, _) = send(&app, "POST", &approve_uri, Some(&applicant), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = send(&app, "POST", &approve_uri, Some(&organizer), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = send(&app, "POST", &approve_uri, Some(&organizer), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let decline_uri = format!("{}/requests/{}/decline", group_uri, declined_id);
    let (status, _) = send(&app, "POST", &decline_uri, Some(&organizer), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (_, body) = send(&app, "GET", &group_uri, Some(&organizer), None).await;
    assert_eq!(body["member_count"], 2);
    let (_, body) = send(&app, "POST", &join_uri, Some(&applicant), None).await;
    assert_eq!(body["outcome"], "already_member");
    let (_, body) = send(&app, "POST", &join_uri, Some(&declined), None).await;
    assert_eq!(body["outcome"], "requested");
}

#[tokio::test]
async fn only_invited_users_become_admins() {
    let app = app();
    let (_, organizer) = register(&app, "organizer").await;
    let (invitee_id, invitee) = register(&app, "invitee").await;
    let (_, stranger) = register(&app, "stranger").await;

    let (_, group) = send(&app, "POST", "/api/groups", Some(&organizer), Some(json!({ "name": "Chess" }))).await;
    let group_uri = format!("/api/groups/{}", group["id"].as_str().unwrap());
    let accept_uri = format!("{}/admins/accept", group_uri);

    let (status, _) = send(&app, "POST", &accept_uri, Some(&invitee), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = send(
        &app,
        "POST",
        &format!("{}/admins", group_uri),
        Some(&organizer),
        Some(json!({ "user_id": invitee_id })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, _) = send(&app, "POST", &accept_uri, Some(&stranger), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = send(&app, "POST", &accept_uri, Some(&invitee), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (_, body) = send(&app, "GET", &group_uri, Some(&organizer), None).await;
    assert_eq!(body["member_count"], 2);
}

#[tokio::test]
async fn rsvp_respects_the_attendee_limit() {
    let app = app();
    let (_, organizer) = register(&app, "organizer").await;
    let (_, first) = register(&app, "first").await;
    let (_, second) = register(&app, "second").await;

    let (_, event) = send(
        &app,
        "POST",
        "/api/events",
        Some(&organizer),
        Some(json!({
            "title": "Pottery taster",
            "kind": "flagship",
            "privacy": "public",
            "starts_at": "2099-03-01T10:00:00Z",
            "location": { "kind": "address", "address": "4 Kiln Lane" },
            "attendee_limit": 1
        })),
    )
    .await;
    assert_eq!(event["map"]["mode"], "static");
    let rsvp_uri = format!("/api/events/{}/rsvp", event["id"].as_str().unwrap());

    let (status, _) = send(&app, "POST", &rsvp_uri, Some(&first), Some(json!({ "status": "going" }))).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = send(&app, "POST", &rsvp_uri, Some(&second), Some(json!({ "status": "going" }))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    let (status, _) = send(&app, "POST", &rsvp_uri, Some(&second), Some(json!({ "status": "not_going" }))).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send(
        &app,
        "POST",
        &rsvp_uri,
        Some(&first),
        Some(json!({ "status": "going", "occurrence_at": "2099-03-01T10:00:00Z" })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}
