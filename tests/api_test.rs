//! End-to-end tests driving the full router over an in-memory database.

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
};
use chrono::{Duration, Utc};
use serde_json::{Value, json};
use shelfmark::auth::Authenticator;
use shelfmark::config::{Auth, BootstrapAdmin};
use shelfmark::db::Database;
use shelfmark::handler::AppState;
use tower::ServiceExt;

const ADMIN_EMAIL: &str = "librarian@school.test";
const ADMIN_PASSWORD: &str = "correct horse battery";

async fn test_app() -> Router {
    let db = Database::open_local(":memory:").await.unwrap();
    let auth = Authenticator::new(&Auth {
        token_secret: "integration-secret".into(),
        token_ttl_hours: 1,
        bcrypt_cost: 4,
        bootstrap_admin: None,
    });
    auth.bootstrap_admin(
        &db,
        &BootstrapAdmin {
            name: "Librarian".into(),
            email: ADMIN_EMAIL.into(),
            password: ADMIN_PASSWORD.into(),
        },
    )
    .await
    .unwrap();

    shelfmark::app(AppState::new(db, auth))
}

async fn send(app: &Router, method: &str, uri: &str, auth: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(auth) = auth {
        builder = builder.header(header::AUTHORIZATION, auth);
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
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

async fn login(app: &Router, email: &str, password: &str) -> String {
    let (status, body) = send(
        app,
        "POST",
        "/auth/login",
        None,
        Some(json!({ "email": email, "password": password })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    format!("Bearer {}", body["data"]["token"].as_str().unwrap())
}

struct Seeded {
    app: Router,
    staff: String,
    book_id: i64,
    copy_id: i64,
    student_id: i64,
    other_student_id: i64,
}

async fn seeded() -> Seeded {
    let app = test_app().await;
    let staff = login(&app, ADMIN_EMAIL, ADMIN_PASSWORD).await;

    let (status, book) = send(
        &app,
        "POST",
        "/books",
        Some(&staff),
        Some(json!({ "title": "Charlotte's Web", "author": "E. B. White", "copy_count": 1 })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{book}");
    let book_id = book["data"]["id"].as_i64().unwrap();

    let (_, copies) = send(&app, "GET", &format!("/books/{book_id}/copies"), Some(&staff), None).await;
    let copy_id = copies["data"][0]["id"].as_i64().unwrap();

    let (status, student) = send(
        &app,
        "POST",
        "/students",
        Some(&staff),
        Some(json!({ "name": "Arnold", "grade": "3", "pin": "4321" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{student}");
    assert_eq!(student["data"]["pin"], "4321");
    let (_, other) = send(
        &app,
        "POST",
        "/students",
        Some(&staff),
        Some(json!({ "name": "Wanda", "pin": "8765" })),
    )
    .await;

    Seeded {
        app,
        staff,
        book_id,
        copy_id,
        student_id: student["data"]["id"].as_i64().unwrap(),
        other_student_id: other["data"]["id"].as_i64().unwrap(),
    }
}

fn due_in_two_weeks() -> String {
    (Utc::now().date_naive() + Duration::days(14)).format("%Y-%m-%d").to_string()
}

#[tokio::test]
async fn test_healthcheck_needs_no_credentials() {
    let app = test_app().await;
    let (status, body) = send(&app, "GET", "/", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_missing_and_bad_credentials() {
    let s = seeded().await;

    let (status, body) = send(&s.app, "GET", "/books", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(body["error"].is_string());

    let (status, _) = send(&s.app, "GET", "/books", Some("Pin 0000"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send(&s.app, "GET", "/books", Some("Bearer forged.token"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send(&s.app, "GET", "/books", Some("Pin 43210"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send(
        &s.app,
        "POST",
        "/auth/login",
        None,
        Some(json!({ "email": ADMIN_EMAIL, "password": "wrong password" })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_checkout_and_return_scenario() {
    let s = seeded().await;

    let (status, record) = send(
        &s.app,
        "POST",
        "/checkouts",
        Some(&s.staff),
        Some(json!({ "book_copy_id": s.copy_id, "student_id": s.student_id, "due_date": due_in_two_weeks() })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{record}");
    assert_eq!(record["data"]["status"], "checked_out");
    let record_id = record["data"]["id"].as_i64().unwrap();

    let (_, copy) = send(&s.app, "GET", &format!("/copies/{}", s.copy_id), Some(&s.staff), None).await;
    assert_eq!(copy["data"]["status"], "checked_out");

    let (_, book) = send(&s.app, "GET", &format!("/books/{}", s.book_id), Some(&s.staff), None).await;
    assert_eq!(book["data"]["available_count"], 0);

    // the copy is out; no second open record
    let (status, _) = send(
        &s.app,
        "POST",
        "/checkouts",
        Some(&s.staff),
        Some(json!({ "book_copy_id": s.copy_id, "student_id": s.other_student_id, "due_date": due_in_two_weeks() })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let today = Utc::now().date_naive().format("%Y-%m-%d").to_string();
    let (status, returned) = send(
        &s.app,
        "PUT",
        &format!("/checkouts/{record_id}/return"),
        Some(&s.staff),
        Some(json!({ "returned_on": today })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{returned}");
    assert_eq!(returned["data"]["status"], "returned");
    assert_eq!(returned["data"]["return_date"], today);

    let (_, copy) = send(&s.app, "GET", &format!("/copies/{}", s.copy_id), Some(&s.staff), None).await;
    assert_eq!(copy["data"]["status"], "available");

    let (status, ledger) = send(&s.app, "GET", "/checkouts", Some(&s.staff), None).await;
    assert_eq!(status, StatusCode::OK);
    let entries = ledger["data"].as_array().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["student_name"], "Arnold");
    assert_eq!(entries[0]["book_title"], "Charlotte's Web");
}

#[tokio::test]
async fn test_return_without_body_and_unknown_record() {
    let s = seeded().await;

    let (_, record) = send(
        &s.app,
        "POST",
        "/checkouts",
        Some(&s.staff),
        Some(json!({ "book_copy_id": s.copy_id, "student_id": s.student_id, "due_date": due_in_two_weeks() })),
    )
    .await;
    let record_id = record["data"]["id"].as_i64().unwrap();

    let (status, returned) = send(
        &s.app,
        "PUT",
        &format!("/checkouts/{record_id}/return"),
        Some(&s.staff),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(returned["data"]["status"], "returned");

    let (status, again) = send(
        &s.app,
        "PUT",
        &format!("/checkouts/{record_id}/return"),
        Some(&s.staff),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(again["data"], returned["data"]);

    let (status, _) = send(&s.app, "PUT", "/checkouts/9999/return", Some(&s.staff), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_student_pin_permissions() {
    let s = seeded().await;
    let student = "Pin 4321";

    let (status, _) = send(&s.app, "GET", "/books", Some(student), None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, me) = send(&s.app, "GET", "/me", Some(student), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(me["data"]["role"], "student");

    for (method, uri) in [("GET", "/checkouts"), ("GET", "/students"), ("GET", "/classes")] {
        let (status, _) = send(&s.app, method, uri, Some(student), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN, "{method} {uri}");
    }
    let (status, _) = send(
        &s.app,
        "POST",
        "/books",
        Some(student),
        Some(json!({ "title": "Holes", "author": "Louis Sachar" })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // not on someone else's behalf
    let (status, _) = send(
        &s.app,
        "POST",
        "/checkouts",
        Some(student),
        Some(json!({ "book_copy_id": s.copy_id, "student_id": s.other_student_id, "due_date": due_in_two_weeks() })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, record) = send(
        &s.app,
        "POST",
        "/checkouts",
        Some(student),
        Some(json!({ "book_copy_id": s.copy_id, "student_id": s.student_id, "due_date": due_in_two_weeks() })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{record}");
    let record_id = record["data"]["id"].as_i64().unwrap();

    let (status, mine) = send(&s.app, "GET", "/me/checkouts", Some(student), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(mine["data"].as_array().unwrap().len(), 1);

    let (status, _) = send(
        &s.app,
        "PUT",
        &format!("/checkouts/{record_id}/return"),
        Some("Pin 8765"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, returned) = send(
        &s.app,
        "PUT",
        &format!("/checkouts/{record_id}/return"),
        Some(student),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(returned["data"]["status"], "returned");
}

#[tokio::test]
async fn test_staff_accounts_are_admin_managed() {
    let s = seeded().await;

    let (status, teacher) = send(
        &s.app,
        "POST",
        "/users",
        Some(&s.staff),
        Some(json!({
            "name": "Ms. Frizzle",
            "email": "frizzle@school.test",
            "password": "magic-school-bus",
            "role": "teacher"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{teacher}");
    assert!(teacher["data"].get("password_hash").is_none());

    let teacher_token = login(&s.app, "frizzle@school.test", "magic-school-bus").await;

    let (status, _) = send(&s.app, "GET", "/users", Some(&teacher_token), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, class) = send(
        &s.app,
        "POST",
        "/classes",
        Some(&teacher_token),
        Some(json!({
            "name": "3B",
            "teacher_id": teacher["data"]["id"],
            "school_year": "2024-2025"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{class}");
    let class_id = class["data"]["id"].as_i64().unwrap();

    let (status, class) = send(
        &s.app,
        "POST",
        &format!("/classes/{class_id}/students"),
        Some(&teacher_token),
        Some(json!({ "student_id": s.student_id })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(class["data"]["student_ids"], json!([s.student_id]));
}

#[tokio::test]
async fn test_catalog_rules_over_http() {
    let s = seeded().await;

    let (status, _) = send(
        &s.app,
        "PUT",
        &format!("/books/{}", s.book_id),
        Some(&s.staff),
        Some(json!({ "copy_count": 4 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &s.app,
        "POST",
        "/books",
        Some(&s.staff),
        Some(json!({ "title": "Holes", "author": "Louis Sachar", "copy_count": 0 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, copy) = send(
        &s.app,
        "PUT",
        &format!("/copies/{}/status", s.copy_id),
        Some(&s.staff),
        Some(json!({ "status": "in_repair" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(copy["data"]["status"], "in_repair");

    let (status, _) = send(
        &s.app,
        "POST",
        "/checkouts",
        Some(&s.staff),
        Some(json!({ "book_copy_id": s.copy_id, "student_id": s.student_id, "due_date": due_in_two_weeks() })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (_, ledger) = send(&s.app, "GET", "/checkouts", Some(&s.staff), None).await;
    assert!(ledger["data"].as_array().unwrap().is_empty());

    let (status, _) = send(&s.app, "DELETE", &format!("/books/{}", s.book_id), Some(&s.staff), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = send(&s.app, "GET", &format!("/books/{}", s.book_id), Some(&s.staff), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_malformed_requests_are_validation_errors() {
    let s = seeded().await;

    let (status, body) = send(
        &s.app,
        "POST",
        "/checkouts",
        Some(&s.staff),
        Some(json!({ "book_copy_id": s.copy_id, "student_id": s.student_id })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("due_date"), "{body}");

    let (status, body) = send(
        &s.app,
        "PUT",
        &format!("/books/{}", s.book_id),
        Some(&s.staff),
        Some(json!({ "copies": 3 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());

    let (status, body) = send(&s.app, "GET", "/checkouts/abc", Some(&s.staff), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());

    let (status, body) = send(&s.app, "GET", "/checkouts?status=misplaced", Some(&s.staff), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());

    let request = Request::builder()
        .method("POST")
        .uri("/books")
        .header(header::AUTHORIZATION, &s.staff)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let response = s.app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn test_me_checkouts_for_staff_is_empty() {
    let s = seeded().await;

    send(
        &s.app,
        "POST",
        "/checkouts",
        Some(&s.staff),
        Some(json!({ "book_copy_id": s.copy_id, "student_id": s.student_id, "due_date": due_in_two_weeks() })),
    )
    .await;

    let (status, body) = send(&s.app, "GET", "/me/checkouts", Some(&s.staff), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"], json!([]));

    let (status, body) = send(&s.app, "GET", "/me/checkouts", Some("Pin 4321"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_student_reads_hide_pin() {
    let s = seeded().await;

    let (status, student) = send(&s.app, "GET", &format!("/students/{}", s.student_id), Some(&s.staff), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(student["data"]["name"], "Arnold");
    assert!(student["data"].get("pin").is_none());

    let (_, listed) = send(&s.app, "GET", "/students", Some(&s.staff), None).await;
    assert!(listed["data"].as_array().unwrap().iter().all(|st| st.get("pin").is_none()));

    let (status, updated) = send(
        &s.app,
        "PUT",
        &format!("/students/{}", s.student_id),
        Some(&s.staff),
        Some(json!({ "pin": "1357" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["data"]["pin"], "1357");
}
