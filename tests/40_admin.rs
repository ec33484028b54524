mod common;

use anyhow::Result;
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use catering_storefront::auth::{generate_jwt, Claims, ADMIN_ROLE};
use catering_storefront::security::SecurityEventKind;
use uuid::Uuid;

use common::{body_json, send, test_app, test_config};

fn token_with_role(role: &str) -> Result<String> {
    let config = test_config();
    let claims = Claims::new(Uuid::new_v4(), "chef@example.com".to_string(), role.to_string(), 1);
    Ok(generate_jwt(&claims, &config.security.jwt_secret)?)
}

fn admin_get(uri: &str, token: Option<&str>) -> Result<Request<Body>> {
    let mut builder = Request::builder().uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    Ok(builder.body(Body::empty())?)
}

#[tokio::test]
async fn admin_routes_require_a_bearer_token() -> Result<()> {
    let (app, _) = test_app(test_config())?;

    let res = send(&app, admin_get("/api/admin/quotes", None)?).await?;
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let body = body_json(res).await?;
    assert_eq!(body["error"], true);
    assert_eq!(body["code"], "UNAUTHORIZED");
    Ok(())
}

#[tokio::test]
async fn forged_token_is_recorded_as_auth_failure() -> Result<()> {
    let (app, state) = test_app(test_config())?;

    let res = send(&app, admin_get("/api/admin/whoami", Some("not.a.jwt"))?).await?;
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    assert!(state
        .monitor
        .recent(10, None)
        .iter()
        .any(|e| e.kind == SecurityEventKind::AuthFailure));
    Ok(())
}

#[tokio::test]
async fn non_admin_role_is_forbidden() -> Result<()> {
    let (app, _) = test_app(test_config())?;
    let token = token_with_role("viewer")?;

    let res = send(&app, admin_get("/api/admin/whoami", Some(&token))?).await?;
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
    Ok(())
}

#[tokio::test]
async fn admin_token_reaches_whoami() -> Result<()> {
    let (app, _) = test_app(test_config())?;
    let token = token_with_role(ADMIN_ROLE)?;

    let res = send(&app, admin_get("/api/admin/whoami", Some(&token))?).await?;
    assert_eq!(res.status(), StatusCode::OK);

    let body = body_json(res).await?;
    assert_eq!(body["data"]["email"], "chef@example.com");
    assert_eq!(body["data"]["role"], ADMIN_ROLE);
    Ok(())
}

#[tokio::test]
async fn unknown_status_filter_is_a_field_error() -> Result<()> {
    let (app, _) = test_app(test_config())?;
    let token = token_with_role(ADMIN_ROLE)?;

    for uri in ["/api/admin/quotes?status=bogus", "/api/admin/orders?status=bogus"] {
        let res = send(&app, admin_get(uri, Some(&token))?).await?;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST, "{}", uri);
        let body = body_json(res).await?;
        assert!(body["field_errors"]["status"].is_string(), "{}", body);
    }
    Ok(())
}

#[tokio::test]
async fn security_endpoints_report_monitor_state() -> Result<()> {
    let (app, state) = test_app(test_config())?;
    let token = token_with_role(ADMIN_ROLE)?;

    state.monitor.record(
        SecurityEventKind::InjectionAttempt,
        Some("203.0.113.9".to_string()),
        "checkout.notes: <script>",
    );
    state
        .monitor
        .record(SecurityEventKind::RateLimited, Some("203.0.113.9".to_string()), "api limit hit");

    let res = send(&app, admin_get("/api/admin/security/events?limit=10", Some(&token))?).await?;
    assert_eq!(res.status(), StatusCode::OK);
    let body = body_json(res).await?;
    assert_eq!(body["data"].as_array().map(Vec::len), Some(2));

    let res = send(&app, admin_get("/api/admin/security/summary", Some(&token))?).await?;
    assert_eq!(res.status(), StatusCode::OK);
    let body = body_json(res).await?;
    assert_eq!(body["data"]["total_events"], 2);
    Ok(())
}
