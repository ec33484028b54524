use axum::{
    extract::DefaultBodyLimit,
    http::{header, HeaderValue, Method},
    middleware,
    routing::{get, post, put},
    Router,
};
use sqlx::PgPool;
use std::sync::Arc;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    services::ServeDir,
    trace::TraceLayer,
};

use crate::cart::Pricing;
use crate::config::AppConfig;
use crate::database::DatabaseManager;
use crate::handlers;
use crate::middleware::{admin_auth_middleware, cache_control_middleware, rate_limit_middleware, session_middleware};
use crate::notifications::EmailTransport;
use crate::payments::PaymentRegistry;
use crate::security::session::SessionPolicy;
use crate::security::{RateLimiter, SecurityMonitor, SessionStore, TokenSigner};
use crate::services::{
    AutomationService, CartService, CatalogService, CheckoutService, NotificationService, QuoteService,
    UploadService, WebhookService,
};

/// Shared handles passed to every handler through axum state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub db: DatabaseManager,
    pub payments: PaymentRegistry,
    pub signer: TokenSigner,
    pub notifications: Arc<NotificationService>,
    pub sessions: Arc<SessionStore>,
    pub rate_limiter: Arc<RateLimiter>,
    pub monitor: Arc<SecurityMonitor>,
}

impl AppState {
    pub fn new(config: AppConfig, db: DatabaseManager) -> Self {
        let transport = NotificationService::transport_from_config(&config.email);
        Self::with_transport(config, db, transport)
    }

    /// Build with an explicit email transport (tests pass a `LogTransport`)
    pub fn with_transport(config: AppConfig, db: DatabaseManager, transport: Arc<dyn EmailTransport>) -> Self {
        let signer = TokenSigner::new(&config.security.link_secret);
        let notifications = Arc::new(NotificationService::new(
            db.pool().clone(),
            transport,
            signer.clone(),
            &config.email,
            &config.server,
        ));
        let sessions = Arc::new(SessionStore::new(SessionPolicy::new(
            config.security.session_idle_minutes,
            config.security.session_absolute_hours,
            config.security.max_sessions,
        )));
        let monitor = Arc::new(SecurityMonitor::new(
            config.security.monitor_alert_threshold,
            chrono::Duration::seconds(config.security.monitor_window_secs),
            Some(db.pool().clone()),
        ));

        Self {
            payments: PaymentRegistry::from_config(&config.payments),
            rate_limiter: Arc::new(RateLimiter::from_config(&config.api)),
            config: Arc::new(config),
            db,
            signer,
            notifications,
            sessions,
            monitor,
        }
    }

    pub fn pool(&self) -> PgPool {
        self.db.pool().clone()
    }

    pub fn pricing(&self) -> Pricing {
        Pricing {
            tax_rate: self.config.payments.tax_rate,
            delivery_fee_cents: self.config.payments.delivery_fee_cents,
        }
    }

    pub fn catalog(&self) -> CatalogService {
        CatalogService::new(self.pool())
    }

    pub fn carts(&self) -> CartService {
        CartService::new(self.pool())
    }

    pub fn checkout(&self) -> CheckoutService {
        CheckoutService::new(
            self.pool(),
            self.payments.clone(),
            self.pricing(),
            self.config.payments.currency.clone(),
        )
    }

    pub fn quotes(&self) -> QuoteService {
        QuoteService::new(
            self.pool(),
            self.payments.clone(),
            self.signer.clone(),
            self.notifications.clone(),
            self.config.payments.deposit_percent,
            chrono::Duration::days(self.config.security.payment_link_ttl_days),
            &self.config.server.public_url,
            self.config.payments.currency.clone(),
        )
    }

    pub fn automation(&self) -> AutomationService {
        AutomationService::new(
            self.pool(),
            self.quotes(),
            self.config.automation.batch_size,
            self.config.automation.max_attempts,
        )
    }

    pub fn webhooks(&self) -> WebhookService {
        WebhookService::new(
            self.payments.clone(),
            self.checkout(),
            self.quotes(),
            self.notifications.clone(),
            self.monitor.clone(),
        )
    }

    pub fn uploads(&self) -> UploadService {
        UploadService::new(
            self.pool(),
            &self.config.server.uploads_dir,
            self.config.security.max_upload_bytes,
        )
    }
}

/// Assemble the full HTTP surface
pub fn router(state: AppState) -> Router {
    let config = state.config.clone();

    let mut app = Router::new()
        .route("/", get(handlers::root))
        .route("/health", get(handlers::health))
        .route("/cache-manifest", get(handlers::cache_manifest))
        .merge(shopper_routes(state.clone()))
        .merge(public_routes())
        .nest("/api/admin", admin_routes(state.clone()))
        .nest_service("/uploads", ServeDir::new(&config.server.uploads_dir))
        .layer(middleware::from_fn(cache_control_middleware))
        .layer(middleware::from_fn_with_state(state.clone(), rate_limit_middleware))
        .layer(DefaultBodyLimit::max(config.api.max_request_size_bytes))
        .layer(TraceLayer::new_for_http());

    if config.security.enable_cors {
        app = app.layer(cors_layer(&config.security.cors_origins));
    }

    app.with_state(state)
}

/// Routes that need the anonymous shopper session
fn shopper_routes(state: AppState) -> Router<AppState> {
    use handlers::public::{cart, checkout, uploads};

    Router::new()
        .route("/api/session", get(handlers::public::session_info).delete(handlers::public::end_session))
        .route("/api/cart", get(cart::get_cart).delete(cart::clear_cart))
        .route("/api/cart/items", post(cart::add_item))
        .route("/api/cart/items/:product_id", put(cart::update_item).delete(cart::remove_item))
        .route("/api/checkout", post(checkout::checkout))
        .route("/api/uploads", post(uploads::upload))
        .layer(middleware::from_fn_with_state(state, session_middleware))
}

fn public_routes() -> Router<AppState> {
    use handlers::public::{auth, notifications, products, quotes, webhooks};

    Router::new()
        .route("/api/products", get(products::list))
        .route("/api/products/:slug", get(products::show))
        .route("/api/quotes", post(quotes::request_quote))
        .route("/api/quotes/pay/:token", get(quotes::describe_payment).post(quotes::pay))
        .route("/api/webhooks/stripe", post(webhooks::stripe))
        .route("/api/webhooks/square", post(webhooks::square))
        .route(
            "/api/notifications/preferences",
            get(notifications::get_preferences).put(notifications::update_preferences),
        )
        .route("/auth/admin/login", post(auth::admin_login))
}

fn admin_routes(state: AppState) -> Router<AppState> {
    use handlers::admin;

    Router::new()
        .route("/whoami", get(admin::whoami))
        .route("/quotes", get(admin::quotes::list))
        .route("/quotes/:id", get(admin::quotes::show))
        .route("/quotes/:id/approve", post(admin::quotes::approve))
        .route("/quotes/:id/cancel", post(admin::quotes::cancel))
        .route("/quotes/:id/payment-link", get(admin::quotes::payment_link))
        .route("/orders", get(admin::orders::list))
        .route("/orders/:id/fulfil", post(admin::orders::fulfil))
        .route("/orders/:id/cancel", post(admin::orders::cancel))
        .route("/products", get(admin::products::list).post(admin::products::create))
        .route("/products/:id", put(admin::products::update))
        .route("/products/:id/availability", put(admin::products::set_availability))
        .route("/automation/run", post(admin::automation::run))
        .route("/security/events", get(admin::security::events))
        .route("/security/summary", get(admin::security::summary))
        .layer(middleware::from_fn_with_state(state, admin_auth_middleware))
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins.iter().filter_map(|o| o.parse().ok()).collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .allow_credentials(true)
}
