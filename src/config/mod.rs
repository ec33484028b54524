use once_cell::sync::Lazy;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub environment: Environment,
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub api: ApiConfig,
    pub security: SecurityConfig,
    pub payments: PaymentsConfig,
    pub email: EmailConfig,
    pub automation: AutomationConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Environment {
    Development,
    Staging,
    Production,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub port: u16,
    /// Public origin used when building links in emails and payment redirects
    pub public_url: String,
    pub uploads_dir: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub max_connections: u32,
    pub connection_timeout: u64,
    pub run_migrations: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    pub enable_rate_limiting: bool,
    pub rate_limit_requests: u32,
    pub rate_limit_window_secs: u64,
    pub checkout_limit_per_minute: u32,
    pub quote_limit_per_hour: u32,
    pub upload_limit_per_hour: u32,
    pub admin_login_limit_per_minute: u32,
    pub max_request_size_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    pub enable_cors: bool,
    pub cors_origins: Vec<String>,
    pub require_https: bool,
    #[serde(skip_serializing)]
    pub jwt_secret: String,
    pub jwt_expiry_hours: u64,
    /// Secret for HMAC-signed payment links and unsubscribe tokens
    #[serde(skip_serializing)]
    pub link_secret: String,
    pub payment_link_ttl_days: i64,
    pub session_idle_minutes: i64,
    pub session_absolute_hours: i64,
    pub max_sessions: usize,
    /// How often expired sessions and idle rate-limit buckets are swept
    pub housekeeping_interval_secs: u64,
    pub max_upload_bytes: usize,
    pub monitor_alert_threshold: usize,
    pub monitor_window_secs: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentsConfig {
    pub currency: String,
    pub tax_rate: Decimal,
    pub delivery_fee_cents: i64,
    /// Percentage of an approved quote collected up front
    pub deposit_percent: Decimal,
    #[serde(skip_serializing)]
    pub stripe_secret_key: Option<String>,
    #[serde(skip_serializing)]
    pub stripe_webhook_secret: Option<String>,
    pub stripe_api_base: String,
    #[serde(skip_serializing)]
    pub square_access_token: Option<String>,
    pub square_location_id: Option<String>,
    #[serde(skip_serializing)]
    pub square_webhook_key: Option<String>,
    pub square_notification_url: Option<String>,
    pub square_api_base: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailConfig {
    pub enabled: bool,
    #[serde(skip_serializing)]
    pub resend_api_key: Option<String>,
    pub resend_api_base: String,
    pub from_address: String,
    pub admin_address: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutomationConfig {
    pub enabled: bool,
    pub poll_interval_secs: u64,
    pub batch_size: i64,
    pub max_attempts: i32,
}

fn override_parse<T: FromStr>(key: &str, target: &mut T) {
    if let Ok(v) = env::var(key) {
        if let Ok(parsed) = v.parse() {
            *target = parsed;
        } else {
            tracing::warn!("Ignoring unparseable value for {}", key);
        }
    }
}

fn override_optional(key: &str, target: &mut Option<String>) {
    if let Ok(v) = env::var(key) {
        let v = v.trim().to_string();
        *target = if v.is_empty() { None } else { Some(v) };
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        let environment = match env::var("APP_ENV").as_deref() {
            Ok("production") | Ok("prod") => Environment::Production,
            Ok("staging") | Ok("stage") => Environment::Staging,
            _ => Environment::Development,
        };

        match environment {
            Environment::Production => Self::production(),
            Environment::Staging => Self::staging(),
            Environment::Development => Self::development(),
        }
        .with_env_overrides()
    }

    fn with_env_overrides(mut self) -> Self {
        // Server overrides
        override_parse("PORT", &mut self.server.port);
        override_parse("STOREFRONT_PORT", &mut self.server.port);
        override_parse("PUBLIC_URL", &mut self.server.public_url);
        override_parse("UPLOADS_DIR", &mut self.server.uploads_dir);

        // Database overrides
        override_parse("DATABASE_MAX_CONNECTIONS", &mut self.database.max_connections);
        override_parse("DATABASE_CONNECTION_TIMEOUT", &mut self.database.connection_timeout);
        override_parse("DATABASE_RUN_MIGRATIONS", &mut self.database.run_migrations);

        // API overrides
        override_parse("API_ENABLE_RATE_LIMITING", &mut self.api.enable_rate_limiting);
        override_parse("API_RATE_LIMIT_REQUESTS", &mut self.api.rate_limit_requests);
        override_parse("API_RATE_LIMIT_WINDOW_SECS", &mut self.api.rate_limit_window_secs);
        override_parse("API_CHECKOUT_LIMIT_PER_MINUTE", &mut self.api.checkout_limit_per_minute);
        override_parse("API_QUOTE_LIMIT_PER_HOUR", &mut self.api.quote_limit_per_hour);
        override_parse("API_UPLOAD_LIMIT_PER_HOUR", &mut self.api.upload_limit_per_hour);
        override_parse("API_ADMIN_LOGIN_LIMIT_PER_MINUTE", &mut self.api.admin_login_limit_per_minute);
        override_parse("API_MAX_REQUEST_SIZE_BYTES", &mut self.api.max_request_size_bytes);

        // Security overrides
        override_parse("SECURITY_ENABLE_CORS", &mut self.security.enable_cors);
        if let Ok(v) = env::var("SECURITY_CORS_ORIGINS") {
            self.security.cors_origins = v.split(',').map(|s| s.trim().to_string()).collect();
        }
        override_parse("SECURITY_REQUIRE_HTTPS", &mut self.security.require_https);
        override_parse("JWT_SECRET", &mut self.security.jwt_secret);
        override_parse("SECURITY_JWT_EXPIRY_HOURS", &mut self.security.jwt_expiry_hours);
        override_parse("PAYMENT_LINK_SECRET", &mut self.security.link_secret);
        override_parse("PAYMENT_LINK_TTL_DAYS", &mut self.security.payment_link_ttl_days);
        override_parse("SESSION_IDLE_MINUTES", &mut self.security.session_idle_minutes);
        override_parse("SESSION_ABSOLUTE_HOURS", &mut self.security.session_absolute_hours);
        override_parse("MAX_SESSIONS", &mut self.security.max_sessions);
        override_parse("HOUSEKEEPING_INTERVAL_SECS", &mut self.security.housekeeping_interval_secs);
        override_parse("SECURITY_MAX_UPLOAD_BYTES", &mut self.security.max_upload_bytes);
        override_parse("SECURITY_MONITOR_ALERT_THRESHOLD", &mut self.security.monitor_alert_threshold);
        override_parse("SECURITY_MONITOR_WINDOW_SECS", &mut self.security.monitor_window_secs);

        // Payment overrides
        override_parse("PAYMENTS_CURRENCY", &mut self.payments.currency);
        override_parse("PAYMENTS_TAX_RATE", &mut self.payments.tax_rate);
        override_parse("PAYMENTS_DELIVERY_FEE_CENTS", &mut self.payments.delivery_fee_cents);
        override_parse("PAYMENTS_DEPOSIT_PERCENT", &mut self.payments.deposit_percent);
        override_optional("STRIPE_SECRET_KEY", &mut self.payments.stripe_secret_key);
        override_optional("STRIPE_WEBHOOK_SECRET", &mut self.payments.stripe_webhook_secret);
        override_parse("STRIPE_API_BASE", &mut self.payments.stripe_api_base);
        override_optional("SQUARE_ACCESS_TOKEN", &mut self.payments.square_access_token);
        override_optional("SQUARE_LOCATION_ID", &mut self.payments.square_location_id);
        override_optional("SQUARE_WEBHOOK_SIGNATURE_KEY", &mut self.payments.square_webhook_key);
        override_optional("SQUARE_NOTIFICATION_URL", &mut self.payments.square_notification_url);
        override_parse("SQUARE_API_BASE", &mut self.payments.square_api_base);

        // Email overrides
        override_parse("EMAIL_ENABLED", &mut self.email.enabled);
        override_optional("RESEND_API_KEY", &mut self.email.resend_api_key);
        override_parse("RESEND_API_BASE", &mut self.email.resend_api_base);
        override_parse("EMAIL_FROM", &mut self.email.from_address);
        override_parse("EMAIL_ADMIN", &mut self.email.admin_address);

        // Automation overrides
        override_parse("AUTOMATION_ENABLED", &mut self.automation.enabled);
        override_parse("AUTOMATION_POLL_INTERVAL_SECS", &mut self.automation.poll_interval_secs);
        override_parse("AUTOMATION_BATCH_SIZE", &mut self.automation.batch_size);
        override_parse("AUTOMATION_MAX_ATTEMPTS", &mut self.automation.max_attempts);

        self
    }

    fn base_payments() -> PaymentsConfig {
        PaymentsConfig {
            currency: "usd".to_string(),
            tax_rate: Decimal::ZERO,
            delivery_fee_cents: 0,
            deposit_percent: Decimal::from(50),
            stripe_secret_key: None,
            stripe_webhook_secret: None,
            stripe_api_base: "https://api.stripe.com".to_string(),
            square_access_token: None,
            square_location_id: None,
            square_webhook_key: None,
            square_notification_url: None,
            square_api_base: "https://connect.squareup.com".to_string(),
        }
    }

    pub fn development() -> Self {
        Self {
            environment: Environment::Development,
            server: ServerConfig {
                port: 3000,
                public_url: "http://localhost:3000".to_string(),
                uploads_dir: "./uploads".to_string(),
            },
            database: DatabaseConfig {
                max_connections: 10,
                connection_timeout: 30,
                run_migrations: true,
            },
            api: ApiConfig {
                enable_rate_limiting: false,
                rate_limit_requests: 1000,
                rate_limit_window_secs: 60,
                checkout_limit_per_minute: 60,
                quote_limit_per_hour: 100,
                upload_limit_per_hour: 100,
                admin_login_limit_per_minute: 30,
                max_request_size_bytes: 10 * 1024 * 1024, // 10MB
            },
            security: SecurityConfig {
                enable_cors: true,
                cors_origins: vec!["http://localhost:3000".to_string(), "http://localhost:5173".to_string()],
                require_https: false,
                jwt_secret: "dev-jwt-secret-change-me".to_string(),
                jwt_expiry_hours: 24 * 7, // 1 week
                link_secret: "dev-link-secret-change-me".to_string(),
                payment_link_ttl_days: 14,
                session_idle_minutes: 60 * 24,
                session_absolute_hours: 24 * 30,
                max_sessions: 100_000,
                housekeeping_interval_secs: 60,
                max_upload_bytes: 5 * 1024 * 1024,
                monitor_alert_threshold: 50,
                monitor_window_secs: 300,
            },
            payments: Self::base_payments(),
            email: EmailConfig {
                enabled: false,
                resend_api_key: None,
                resend_api_base: "https://api.resend.com".to_string(),
                from_address: "Kitchen <orders@localhost>".to_string(),
                admin_address: "admin@localhost".to_string(),
            },
            automation: AutomationConfig {
                enabled: false,
                poll_interval_secs: 60,
                batch_size: 25,
                max_attempts: 5,
            },
        }
    }

    pub fn staging() -> Self {
        let dev = Self::development();
        Self {
            environment: Environment::Staging,
            database: DatabaseConfig {
                max_connections: 20,
                connection_timeout: 10,
                run_migrations: true,
            },
            api: ApiConfig {
                enable_rate_limiting: true,
                rate_limit_requests: 300,
                rate_limit_window_secs: 60,
                checkout_limit_per_minute: 10,
                quote_limit_per_hour: 20,
                upload_limit_per_hour: 30,
                admin_login_limit_per_minute: 10,
                max_request_size_bytes: 8 * 1024 * 1024,
            },
            security: SecurityConfig {
                cors_origins: vec!["https://staging.example.com".to_string()],
                require_https: true,
                jwt_expiry_hours: 24,
                monitor_alert_threshold: 20,
                ..dev.security
            },
            email: EmailConfig { enabled: true, ..dev.email },
            automation: AutomationConfig { enabled: true, ..dev.automation },
            ..dev
        }
    }

    pub fn production() -> Self {
        let dev = Self::development();
        Self {
            environment: Environment::Production,
            database: DatabaseConfig {
                max_connections: 50,
                connection_timeout: 5,
                run_migrations: false,
            },
            api: ApiConfig {
                enable_rate_limiting: true,
                rate_limit_requests: 120,
                rate_limit_window_secs: 60,
                checkout_limit_per_minute: 5,
                quote_limit_per_hour: 10,
                upload_limit_per_hour: 20,
                admin_login_limit_per_minute: 5,
                max_request_size_bytes: 6 * 1024 * 1024,
            },
            security: SecurityConfig {
                cors_origins: vec!["https://www.example.com".to_string()],
                require_https: true,
                // Must be provided through the environment in production
                jwt_secret: String::new(),
                link_secret: String::new(),
                jwt_expiry_hours: 8,
                session_idle_minutes: 60 * 2,
                monitor_alert_threshold: 20,
                ..dev.security
            },
            email: EmailConfig { enabled: true, ..dev.email },
            automation: AutomationConfig {
                enabled: true,
                poll_interval_secs: 300,
                ..dev.automation
            },
            ..dev
        }
    }

    /// Fails fast on settings that would make the service unsafe to run.
    pub fn validate(&self) -> Result<(), String> {
        if self.security.jwt_secret.len() < 16 {
            return Err("JWT_SECRET must be at least 16 characters".to_string());
        }
        if self.security.link_secret.len() < 16 {
            return Err("PAYMENT_LINK_SECRET must be at least 16 characters".to_string());
        }
        if self.payments.deposit_percent <= Decimal::ZERO || self.payments.deposit_percent > Decimal::from(100) {
            return Err("PAYMENTS_DEPOSIT_PERCENT must be in (0, 100]".to_string());
        }
        if self.payments.tax_rate < Decimal::ZERO || self.payments.tax_rate >= Decimal::ONE {
            return Err("PAYMENTS_TAX_RATE must be a fraction in [0, 1)".to_string());
        }
        if self.email.enabled && self.email.resend_api_key.is_none() {
            return Err("EMAIL_ENABLED requires RESEND_API_KEY".to_string());
        }
        Ok(())
    }
}

// Global singleton config - initialized once at startup
pub static CONFIG: Lazy<AppConfig> = Lazy::new(AppConfig::from_env);

// Convenience function for accessing config
pub fn config() -> &'static AppConfig {
    &CONFIG
}

#[macro_export]
macro_rules! is_development {
    () => {
        matches!($crate::config::CONFIG.environment, $crate::config::Environment::Development)
    };
}

#[macro_export]
macro_rules! is_production {
    () => {
        matches!($crate::config::CONFIG.environment, $crate::config::Environment::Production)
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_development_config() {
        let config = AppConfig::development();
        assert!(!config.api.enable_rate_limiting);
        assert!(!config.email.enabled);
        assert_eq!(config.payments.deposit_percent, Decimal::from(50));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_production_config() {
        let config = AppConfig::production();
        assert!(config.api.enable_rate_limiting);
        assert!(config.security.require_https);
        // Secrets are intentionally blank until provided by the environment
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_out_of_range_deposit() {
        let mut config = AppConfig::development();
        config.payments.deposit_percent = Decimal::from(120);
        assert!(config.validate().is_err());
    }
}
