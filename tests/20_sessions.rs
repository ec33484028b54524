mod common;

use anyhow::Result;
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use catering_storefront::security::SecurityEventKind;
use catering_storefront::services::housekeeping_service::{spawn_housekeeping, sweep_once};

use common::{body_json, send, session_cookie, test_app, test_config};

fn session_request(user_agent: &str, cookie: Option<&str>) -> Result<Request<Body>> {
    let mut builder = Request::builder().uri("/api/session").header(header::USER_AGENT, user_agent);
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }
    Ok(builder.body(Body::empty())?)
}

#[tokio::test]
async fn first_visit_issues_an_http_only_cookie() -> Result<()> {
    let (app, _) = test_app(test_config())?;

    let res = send(&app, session_request("Mozilla/5.0", None)?).await?;
    assert_eq!(res.status(), StatusCode::OK);

    let raw = res
        .headers()
        .get(header::SET_COOKIE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    assert!(raw.starts_with("sf_session="), "{}", raw);
    assert!(raw.contains("HttpOnly"));
    assert!(raw.contains("SameSite=Lax"));
    assert!(!raw.contains("Secure"), "development config does not require https");
    assert_eq!(
        res.headers().get(header::CACHE_CONTROL).and_then(|v| v.to_str().ok()),
        Some("no-store")
    );

    let body = body_json(res).await?;
    assert_eq!(body["data"]["new_session"], true);
    Ok(())
}

#[tokio::test]
async fn returning_visitor_keeps_the_session() -> Result<()> {
    let (app, _) = test_app(test_config())?;

    let first = send(&app, session_request("Mozilla/5.0", None)?).await?;
    let cookie = session_cookie(&first).unwrap_or_default();
    assert!(!cookie.is_empty());

    let second = send(&app, session_request("Mozilla/5.0", Some(&cookie))?).await?;
    assert!(session_cookie(&second).is_none(), "no new cookie for a valid session");
    let body = body_json(second).await?;
    assert_eq!(body["data"]["new_session"], false);
    Ok(())
}

#[tokio::test]
async fn cookie_replayed_from_another_client_starts_over() -> Result<()> {
    let (app, state) = test_app(test_config())?;

    let first = send(&app, session_request("Mozilla/5.0", None)?).await?;
    let cookie = session_cookie(&first).unwrap_or_default();

    let replay = send(&app, session_request("curl/8.0", Some(&cookie))?).await?;
    let fresh = session_cookie(&replay);
    assert!(fresh.is_some());
    assert_ne!(fresh.as_deref(), Some(cookie.as_str()));

    let events = state.monitor.recent(10, None);
    assert!(events.iter().any(|e| e.kind == SecurityEventKind::SessionHijackSuspected));

    // The stolen token is dead for its original owner too
    let original = send(&app, session_request("Mozilla/5.0", Some(&cookie))?).await?;
    assert!(session_cookie(&original).is_some());
    Ok(())
}

#[tokio::test]
async fn ending_a_session_expires_the_cookie() -> Result<()> {
    let (app, state) = test_app(test_config())?;

    let first = send(&app, session_request("Mozilla/5.0", None)?).await?;
    let cookie = session_cookie(&first).unwrap_or_default();
    assert_eq!(state.sessions.len().await, 1);

    let end = Request::builder()
        .method("DELETE")
        .uri("/api/session")
        .header(header::USER_AGENT, "Mozilla/5.0")
        .header(header::COOKIE, &cookie)
        .body(Body::empty())?;
    let res = send(&app, end).await?;
    assert_eq!(res.status(), StatusCode::NO_CONTENT);
    assert!(res
        .headers()
        .get(header::SET_COOKIE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.contains("Max-Age=0")));
    assert_eq!(state.sessions.len().await, 0);
    Ok(())
}

#[tokio::test]
async fn housekeeping_purges_sessions_with_automation_off() -> Result<()> {
    let mut config = test_config();
    config.automation.enabled = false;
    let (app, state) = test_app(config)?;

    for agent in ["crawler/1.0", "curl/8.4", "uptime-check"] {
        let res = send(&app, session_request(agent, None)?).await?;
        assert!(session_cookie(&res).is_some());
    }
    assert_eq!(state.sessions.len().await, 3);

    let idle = chrono::Duration::minutes(state.config.security.session_idle_minutes + 1);
    let report = sweep_once(&state, chrono::Utc::now() + idle).await;
    assert_eq!(report.sessions, 3);
    assert_eq!(state.sessions.len().await, 0);
    Ok(())
}

#[tokio::test]
async fn background_housekeeping_starts_without_automation() -> Result<()> {
    let mut config = test_config();
    config.automation.enabled = false;
    config.security.session_idle_minutes = 0;
    let (app, state) = test_app(config)?;

    send(&app, session_request("crawler/1.0", None)?).await?;
    assert_eq!(state.sessions.len().await, 1);

    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    let handle = spawn_housekeeping(state.clone());
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    handle.abort();

    assert_eq!(state.sessions.len().await, 0);
    Ok(())
}

#[tokio::test]
async fn session_store_is_capped() -> Result<()> {
    let mut config = test_config();
    config.security.max_sessions = 2;
    let (app, state) = test_app(config)?;

    for agent in ["a", "b", "c", "d"] {
        send(&app, session_request(agent, None)?).await?;
    }
    assert_eq!(state.sessions.len().await, 2);
    Ok(())
}
