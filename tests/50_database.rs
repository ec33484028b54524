//! Flows that need Postgres. Every test returns early unless `DATABASE_URL` is set.

mod common;

use anyhow::Result;
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use catering_storefront::automation::TaskKind;
use catering_storefront::catalog::NewProduct;
use catering_storefront::payments::stripe::{signature_header, SIGNATURE_HEADER};
use catering_storefront::quotes::{QuoteRequest, QuoteStatus};
use catering_storefront::router;
use catering_storefront::services::automation_service::schedule_task;
use chrono::{Duration, Utc};
use once_cell::sync::Lazy;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use uuid::Uuid;

use common::{body_json, database_state, send, STRIPE_WEBHOOK_SECRET};

/// `run_once` claims every due task in the database, so tests that drive it take turns
static RUNNER: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

fn stripe_succeeded(intent_id: &str, reference: &str, amount_cents: i64) -> Result<Request<Body>> {
    let payload = serde_json::to_vec(&json!({
        "type": "payment_intent.succeeded",
        "data": { "object": {
            "id": intent_id,
            "amount": amount_cents,
            "amount_received": amount_cents,
            "metadata": { "reference": reference }
        }}
    }))?;
    let signature = signature_header(STRIPE_WEBHOOK_SECRET, Utc::now().timestamp(), &payload);
    Ok(Request::builder()
        .method("POST")
        .uri("/api/webhooks/stripe")
        .header(header::CONTENT_TYPE, "application/json")
        .header(SIGNATURE_HEADER, signature)
        .body(Body::from(payload))?)
}

/// Deliver a webhook and return the acknowledged action
async fn deliver(app: &Router, request: Request<Body>) -> Result<String> {
    let res = send(app, request).await?;
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = body_json(res).await?;
    assert_eq!(body["data"]["received"], true);
    Ok(body["data"]["action"].as_str().unwrap_or_default().to_string())
}

async fn approved_quote(state: &catering_storefront::AppState, total_cents: i64) -> Result<Uuid> {
    let quote = state
        .quotes()
        .request(QuoteRequest {
            customer_name: "Dana Reyes".to_string(),
            email: format!("dana+{}@example.com", Uuid::new_v4().simple()),
            phone: "+1 555 010 2030".to_string(),
            event_date: Utc::now().date_naive() + Duration::days(30),
            guest_count: 80,
            details: "Buffet lunch".to_string(),
        })
        .await?;
    state.quotes().approve(quote.id, total_cents).await?;
    Ok(quote.id)
}

async fn pending_order(state: &catering_storefront::AppState, total_cents: i64) -> Result<Uuid> {
    let id = Uuid::new_v4();
    sqlx::query(
        r#"
        INSERT INTO orders
            (id, customer_name, email, phone, fulfilment, status, provider, provider_ref,
             subtotal_cents, tax_cents, delivery_fee_cents, total_cents)
        VALUES ($1, 'Lee', 'lee@example.com', '5550109999', 'pickup', 'pending_payment', 'stripe', $2, $3, 0, 0, $3)
        "#,
    )
    .bind(id)
    .bind(format!("pi_order_{}", id.simple()))
    .bind(total_cents)
    .execute(&state.pool())
    .await?;
    Ok(id)
}

async fn task_status(state: &catering_storefront::AppState, id: Uuid) -> Result<String> {
    Ok(sqlx::query_scalar("SELECT status FROM scheduled_tasks WHERE id = $1")
        .bind(id)
        .fetch_one(&state.pool())
        .await?)
}

#[tokio::test]
async fn deposit_then_balance_completes_the_quote() -> Result<()> {
    let Some(state) = database_state().await? else { return Ok(()) };
    let app = router(state.clone());
    let quote_id = approved_quote(&state, 100_000).await?;

    let deposit = format!("pi_dep_{}", Uuid::new_v4().simple());
    let action = deliver(&app, stripe_succeeded(&deposit, &format!("quote:{}:deposit", quote_id), 50_000)?).await?;
    assert_eq!(action, "quote_advanced");
    assert_eq!(state.quotes().get(quote_id).await?.status()?, QuoteStatus::DepositPaid);

    let balance = format!("pi_bal_{}", Uuid::new_v4().simple());
    let action = deliver(&app, stripe_succeeded(&balance, &format!("quote:{}:balance", quote_id), 50_000)?).await?;
    assert_eq!(action, "quote_advanced");

    let quote = state.quotes().get(quote_id).await?;
    assert_eq!(quote.status()?, QuoteStatus::Completed);
    assert!(quote.deposit_paid_at.is_some());
    assert!(quote.completed_at.is_some());
    Ok(())
}

#[tokio::test]
async fn redelivered_webhook_is_a_duplicate() -> Result<()> {
    let Some(state) = database_state().await? else { return Ok(()) };
    let app = router(state.clone());
    let quote_id = approved_quote(&state, 80_000).await?;

    let intent = format!("pi_dep_{}", Uuid::new_v4().simple());
    let reference = format!("quote:{}:deposit", quote_id);
    assert_eq!(deliver(&app, stripe_succeeded(&intent, &reference, 40_000)?).await?, "quote_advanced");
    assert_eq!(deliver(&app, stripe_succeeded(&intent, &reference, 40_000)?).await?, "duplicate");

    let payments: i64 = sqlx::query_scalar("SELECT count(*) FROM quote_payments WHERE quote_id = $1")
        .bind(quote_id)
        .fetch_one(&state.pool())
        .await?;
    assert_eq!(payments, 1);
    assert_eq!(state.quotes().get(quote_id).await?.status()?, QuoteStatus::DepositPaid);
    Ok(())
}

#[tokio::test]
async fn short_quote_payment_is_recorded_as_underpaid() -> Result<()> {
    let Some(state) = database_state().await? else { return Ok(()) };
    let app = router(state.clone());
    let quote_id = approved_quote(&state, 100_000).await?;

    let intent = format!("pi_dep_{}", Uuid::new_v4().simple());
    let reference = format!("quote:{}:deposit", quote_id);
    assert_eq!(deliver(&app, stripe_succeeded(&intent, &reference, 10_000)?).await?, "underpaid");
    assert_eq!(deliver(&app, stripe_succeeded(&intent, &reference, 10_000)?).await?, "duplicate");

    let (status, amount): (String, i64) =
        sqlx::query_as("SELECT status, amount_cents FROM quote_payments WHERE provider_ref = $1")
            .bind(&intent)
            .fetch_one(&state.pool())
            .await?;
    assert_eq!(status, "underpaid");
    assert_eq!(amount, 10_000);
    assert_eq!(state.quotes().get(quote_id).await?.status()?, QuoteStatus::Approved);
    Ok(())
}

#[tokio::test]
async fn payment_for_cancelled_order_is_flagged_for_refund() -> Result<()> {
    let Some(state) = database_state().await? else { return Ok(()) };
    let app = router(state.clone());
    let order_id = pending_order(&state, 4200).await?;
    state.checkout().cancel(order_id).await?;

    let intent = format!("pi_order_{}", order_id.simple());
    let reference = format!("order:{}", order_id);
    assert_eq!(deliver(&app, stripe_succeeded(&intent, &reference, 4200)?).await?, "needs_refund");
    assert_eq!(deliver(&app, stripe_succeeded(&intent, &reference, 4200)?).await?, "duplicate");

    let (status, paid, issue): (String, Option<i64>, Option<String>) =
        sqlx::query_as("SELECT status, paid_cents, payment_issue FROM orders WHERE id = $1")
            .bind(order_id)
            .fetch_one(&state.pool())
            .await?;
    assert_eq!(status, "cancelled");
    assert_eq!(paid, Some(4200));
    assert_eq!(issue.as_deref(), Some("needs_refund"));
    Ok(())
}

#[tokio::test]
async fn short_order_payment_stays_pending() -> Result<()> {
    let Some(state) = database_state().await? else { return Ok(()) };
    let app = router(state.clone());
    let order_id = pending_order(&state, 4200).await?;

    let intent = format!("pi_order_{}", order_id.simple());
    let action = deliver(&app, stripe_succeeded(&intent, &format!("order:{}", order_id), 4000)?).await?;
    assert_eq!(action, "underpaid");

    let (status, issue): (String, Option<String>) =
        sqlx::query_as("SELECT status, payment_issue FROM orders WHERE id = $1")
            .bind(order_id)
            .fetch_one(&state.pool())
            .await?;
    assert_eq!(status, "pending_payment");
    assert_eq!(issue.as_deref(), Some("underpaid"));
    Ok(())
}

#[tokio::test]
async fn reminder_is_skipped_once_the_balance_is_paid() -> Result<()> {
    let Some(state) = database_state().await? else { return Ok(()) };
    let _runner = RUNNER.lock().await;
    let app = router(state.clone());
    let quote_id = approved_quote(&state, 60_000).await?;

    let deposit = format!("pi_dep_{}", Uuid::new_v4().simple());
    deliver(&app, stripe_succeeded(&deposit, &format!("quote:{}:deposit", quote_id), 30_000)?).await?;
    let due = schedule_task(&state.pool(), TaskKind::BalanceReminder, quote_id, Utc::now() + Duration::days(1)).await?;

    let balance = format!("pi_bal_{}", Uuid::new_v4().simple());
    deliver(&app, stripe_succeeded(&balance, &format!("quote:{}:balance", quote_id), 30_000)?).await?;
    // Paying in full retires pending reminders
    assert_eq!(task_status(&state, due).await?, "skipped");

    // One that slipped in after payment is dropped when it comes due
    let late = schedule_task(&state.pool(), TaskKind::BalanceReminder, quote_id, Utc::now() - Duration::minutes(1)).await?;
    let report = state.automation().run_once().await?;
    assert!(report.skipped >= 1);
    assert_eq!(task_status(&state, late).await?, "skipped");
    Ok(())
}

#[tokio::test]
async fn concurrent_runners_claim_each_task_once() -> Result<()> {
    let Some(state) = database_state().await? else { return Ok(()) };
    let _runner = RUNNER.lock().await;
    let app = router(state.clone());
    let quote_id = approved_quote(&state, 60_000).await?;
    deliver(
        &app,
        stripe_succeeded(&format!("pi_dep_{}", Uuid::new_v4().simple()), &format!("quote:{}:deposit", quote_id), 30_000)?,
    )
    .await?;
    let due = schedule_task(&state.pool(), TaskKind::BalanceReminder, quote_id, Utc::now() - Duration::minutes(1)).await?;

    let (auto_a, auto_b) = (state.automation(), state.automation());
    let (a, b) = tokio::join!(auto_a.run_once(), auto_b.run_once());
    let (a, b) = (a?, b?);
    assert!(a.completed + b.completed >= 1);
    assert_eq!(task_status(&state, due).await?, "done");

    let attempts: i32 = sqlx::query_scalar("SELECT attempts FROM scheduled_tasks WHERE id = $1")
        .bind(due)
        .fetch_one(&state.pool())
        .await?;
    assert_eq!(attempts, 1);
    Ok(())
}

#[tokio::test]
async fn concurrent_cart_adds_are_all_kept() -> Result<()> {
    let Some(state) = database_state().await? else { return Ok(()) };
    let product = state
        .catalog()
        .create(NewProduct {
            name: format!("Samosa Platter {}", Uuid::new_v4().simple()),
            slug: None,
            description: String::new(),
            category: "appetizers".to_string(),
            price_cents: 1800,
            image_url: None,
            is_catering: false,
            min_quantity: None,
        })
        .await?;
    let session_id = Uuid::new_v4();

    let adds = (0..8).map(|_| {
        let carts = state.carts();
        let product_id = product.id;
        async move { carts.add_item(session_id, product_id, 1, None).await }
    });
    for result in futures::future::join_all(adds).await {
        result?;
    }

    let cart = state.carts().load(session_id).await?;
    assert_eq!(cart.items.len(), 1);
    assert_eq!(cart.items[0].quantity, 8);
    state.carts().clear(session_id).await?;
    Ok(())
}
