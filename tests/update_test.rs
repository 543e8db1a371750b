mod common;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use ess_autopilot::api::AuthSettings;
use ess_autopilot::models::{BatteryMode, Settings, SolarMode, SystemStatus};

use common::*;

#[tokio::test]
async fn update_runs_a_tick_and_logs_a_dry_run_action() {
    let mut app = TestApp::new();
    app.storage = MockStorage::with_settings(Settings {
        dry_run: true,
        min_battery_soc: 5.0,
        ..Settings::default()
    });

    let response = app.request(get("/api/update")).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "success");

    // The default status has zero capacity; the guard decides Standby and
    // the command layer forces solar to Any.
    let commands = app.ess.set_modes_calls.lock().unwrap().clone();
    assert_eq!(commands, vec![(BatteryMode::Standby, SolarMode::Any)]);

    let actions = app.storage.actions.lock().unwrap().clone();
    assert_eq!(actions.len(), 1);
    assert!(actions[0].dry_run);
    assert!(actions[0].description.contains("Capacity 0"));

    // The confirmed price was synced.
    assert_eq!(app.storage.prices.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn paused_update_runs_sync_but_never_touches_the_ess() {
    let mut app = TestApp::new();
    app.storage = MockStorage::with_settings(Settings {
        pause: true,
        ..Settings::default()
    });

    let response = app.request(get("/api/update")).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "paused");

    assert_eq!(
        app.ess
            .status_calls
            .load(std::sync::atomic::Ordering::SeqCst),
        0
    );
    assert!(app.ess.set_modes_calls.lock().unwrap().is_empty());
    assert!(app.storage.actions.lock().unwrap().is_empty());
    // The sync steps still ran.
    assert_eq!(app.storage.prices.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn emergency_mode_stops_before_any_command() {
    let mut app = TestApp::new();
    app.ess = MockEss::with_status(SystemStatus {
        emergency_mode: true,
        battery_capacity_kwh: 10.0,
        ..SystemStatus::default()
    });

    let response = app.request(get("/api/update")).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "emergency mode");

    assert_eq!(
        app.ess
            .status_calls
            .load(std::sync::atomic::Ordering::SeqCst),
        1
    );
    assert!(app.ess.set_modes_calls.lock().unwrap().is_empty());
    assert!(app.storage.actions.lock().unwrap().is_empty());
}

#[tokio::test]
async fn failed_mode_command_is_recorded_in_the_description() {
    let mut app = TestApp::new();
    app.ess = std::sync::Arc::new(MockEss {
        fail_set_modes: true,
        ..MockEss::default()
    });

    let response = app.request(get("/api/update")).await;
    assert_eq!(response.status(), StatusCode::OK);

    let actions = app.storage.actions.lock().unwrap().clone();
    assert_eq!(actions.len(), 1);
    assert!(
        actions[0].description.contains("(FAILED:"),
        "description: {}",
        actions[0].description
    );
}

fn scheduler_auth(update_email: &str, admin_emails: Vec<String>) -> AuthSettings {
    AuthSettings {
        oidc_audience: "my-audience".into(),
        update_specific_audience: "my-audience".into(),
        update_specific_email: update_email.into(),
        admin_emails,
        bypass_auth: false,
    }
}

fn bearer(token: &str) -> Request<Body> {
    Request::builder()
        .uri("/api/update")
        .header(header::AUTHORIZATION, format!("Bearer {}", token))
        .body(Body::empty())
        .unwrap()
}

#[tokio::test]
async fn missing_authorization_header_is_unauthorized() {
    let mut app = TestApp::new();
    app.auth = scheduler_auth("check@example.com", vec![]);

    let response = app.request(get("/api/update")).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn non_bearer_authorization_is_unauthorized() {
    let mut app = TestApp::new();
    app.auth = scheduler_auth("check@example.com", vec![]);

    let request = Request::builder()
        .uri("/api/update")
        .header(header::AUTHORIZATION, "Basic dXNlcjpwYXNz")
        .body(Body::empty())
        .unwrap();
    let response = app.request(request).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn invalid_bearer_token_is_unauthorized() {
    let mut app = TestApp::new();
    app.auth = scheduler_auth("check@example.com", vec![]);
    app.validator = MockValidator::rejecting();

    let response = app.request(bearer("bad-token")).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn token_without_email_claim_is_forbidden() {
    let mut app = TestApp::new();
    app.auth = scheduler_auth("check@example.com", vec![]);
    app.validator = MockValidator::without_email();

    let response = app.request(bearer("valid-token")).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn admin_email_fallback_allows_the_tick() {
    let mut app = TestApp::new();
    app.auth = scheduler_auth("", vec!["admin@example.com".into()]);
    app.validator = MockValidator::with_email("admin@example.com");

    let response = app.request(bearer("valid-token")).await;
    assert_eq!(response.status(), StatusCode::OK);

    // The token was checked against the scheduler audience.
    let seen = app.validator.seen.lock().unwrap().clone();
    assert_eq!(seen, vec![("valid-token".into(), "my-audience".into())]);
}

#[tokio::test]
async fn wrong_specific_email_is_forbidden() {
    let mut app = TestApp::new();
    app.auth = scheduler_auth("right@example.com", vec![]);
    app.validator = MockValidator::with_email("wrong@example.com");

    let response = app.request(bearer("valid-token")).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn correct_specific_email_is_allowed() {
    let mut app = TestApp::new();
    app.auth = scheduler_auth("right@example.com", vec![]);
    app.validator = MockValidator::with_email("right@example.com");

    let response = app.request(bearer("valid-token")).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn non_admin_email_is_forbidden() {
    let mut app = TestApp::new();
    app.auth = scheduler_auth("", vec!["admin@example.com".into()]);
    app.validator = MockValidator::with_email("notadmin@example.com");

    let response = app.request(bearer("valid-token")).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn no_auth_configuration_blocks_the_tick() {
    let mut app = TestApp::new();
    app.auth = AuthSettings {
        oidc_audience: "my-audience".into(),
        update_specific_audience: "my-audience".into(),
        ..AuthSettings::default()
    };

    let response = app.request(get("/api/update")).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn cookie_admin_can_trigger_the_tick() {
    let mut app = TestApp::new();
    app.auth = AuthSettings {
        oidc_audience: "my-audience".into(),
        admin_emails: vec!["admin@example.com".into()],
        ..AuthSettings::default()
    };
    app.validator = MockValidator::with_email("admin@example.com");

    let request = Request::builder()
        .uri("/api/update")
        .header(header::COOKIE, "auth_token=session-token")
        .body(Body::empty())
        .unwrap();
    let response = app.request(request).await;
    assert_eq!(response.status(), StatusCode::OK);
}
