use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

use crate::config::{EmailConfig, ServerConfig};
use crate::database::DatabaseError;
use crate::notifications::{
    template, DeliveryStatus, EmailMessage, EmailTransport, LogTransport, NotificationPreferences,
    NotificationTrigger, PreferenceCategory, PreferencesUpdate, ResendTransport, TemplateVars,
};
use crate::payments::http_client;
use crate::security::tokens::TokenSigner;

/// Sends trigger emails; delivery problems are logged and recorded, never returned
pub struct NotificationService {
    pool: PgPool,
    transport: Arc<dyn EmailTransport>,
    signer: TokenSigner,
    from_address: String,
    admin_address: String,
    public_url: String,
}

impl NotificationService {
    pub fn new(
        pool: PgPool,
        transport: Arc<dyn EmailTransport>,
        signer: TokenSigner,
        email: &EmailConfig,
        server: &ServerConfig,
    ) -> Self {
        Self {
            pool,
            transport,
            signer,
            from_address: email.from_address.clone(),
            admin_address: email.admin_address.clone(),
            public_url: server.public_url.trim_end_matches('/').to_string(),
        }
    }

    /// Pick the transport from config: Resend when enabled and keyed, otherwise log only
    pub fn transport_from_config(email: &EmailConfig) -> Arc<dyn EmailTransport> {
        match (&email.resend_api_key, email.enabled) {
            (Some(key), true) if !key.is_empty() => {
                Arc::new(ResendTransport::new(http_client(), email.resend_api_base.clone(), key.clone()))
            }
            _ => {
                tracing::info!("Email delivery disabled; messages will be logged");
                Arc::new(LogTransport::new())
            }
        }
    }

    pub fn transport_name(&self) -> &'static str {
        self.transport.name()
    }

    /// Link that lets a recipient manage opt-outs without an account
    pub fn preferences_url(&self, email: &str) -> String {
        format!(
            "{}/notifications/preferences?token={}",
            self.public_url,
            self.signer.issue_preference_token(email)
        )
    }

    pub async fn notify(&self, trigger: NotificationTrigger, recipient: &str, mut vars: TemplateVars) -> DeliveryStatus {
        let category = trigger.category();

        if !category.always_sent() {
            match self.preferences(recipient).await {
                Ok(prefs) if !prefs.allows(category) => {
                    tracing::debug!("{} opted out of {:?}; skipping {}", recipient, category, trigger);
                    self.record(trigger, recipient, "", DeliveryStatus::Skipped, None, None).await;
                    return DeliveryStatus::Skipped;
                }
                Ok(_) => {}
                Err(e) => tracing::warn!("Preference lookup failed for {}, sending anyway: {}", recipient, e),
            }
        }

        let Some(template) = template::builtin(trigger.template()) else {
            tracing::error!("No template '{}' for trigger {}", trigger.template(), trigger);
            return DeliveryStatus::Failed;
        };
        if category != PreferenceCategory::Admin {
            vars.insert("preferences_url".to_string(), self.preferences_url(recipient));
        }
        let rendered = template.render(&vars);

        let message = EmailMessage {
            from: self.from_address.clone(),
            to: recipient.to_string(),
            subject: rendered.subject,
            html: rendered.html,
        };

        match self.transport.send(&message).await {
            Ok(provider_id) => {
                tracing::info!("Sent {} email to {}", trigger, recipient);
                self.record(trigger, recipient, &message.subject, DeliveryStatus::Sent, provider_id, None)
                    .await;
                DeliveryStatus::Sent
            }
            Err(e) => {
                tracing::error!("Failed to send {} email to {}: {}", trigger, recipient, e);
                self.record(trigger, recipient, &message.subject, DeliveryStatus::Failed, None, Some(e.to_string()))
                    .await;
                DeliveryStatus::Failed
            }
        }
    }

    pub async fn notify_admin(&self, trigger: NotificationTrigger, vars: TemplateVars) -> DeliveryStatus {
        let admin = self.admin_address.clone();
        self.notify(trigger, &admin, vars).await
    }

    pub async fn preferences(&self, email: &str) -> Result<NotificationPreferences, DatabaseError> {
        let prefs = sqlx::query_as::<_, NotificationPreferences>(
            "SELECT email, quote_updates, reminders FROM notification_preferences WHERE email = $1",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        Ok(prefs.unwrap_or_else(|| NotificationPreferences::default_for(email)))
    }

    pub async fn update_preferences(
        &self,
        email: &str,
        update: PreferencesUpdate,
    ) -> Result<NotificationPreferences, DatabaseError> {
        let current = self.preferences(email).await?;
        let prefs = NotificationPreferences {
            email: email.to_string(),
            quote_updates: update.quote_updates.unwrap_or(current.quote_updates),
            reminders: update.reminders.unwrap_or(current.reminders),
        };

        sqlx::query(
            r#"
            INSERT INTO notification_preferences (email, quote_updates, reminders, updated_at)
            VALUES ($1, $2, $3, now())
            ON CONFLICT (email) DO UPDATE
            SET quote_updates = EXCLUDED.quote_updates, reminders = EXCLUDED.reminders, updated_at = now()
            "#,
        )
        .bind(&prefs.email)
        .bind(prefs.quote_updates)
        .bind(prefs.reminders)
        .execute(&self.pool)
        .await?;

        tracing::info!("Updated notification preferences for {}", email);
        Ok(prefs)
    }

    async fn record(
        &self,
        trigger: NotificationTrigger,
        recipient: &str,
        subject: &str,
        status: DeliveryStatus,
        provider_id: Option<String>,
        error: Option<String>,
    ) {
        let result = sqlx::query(
            r#"
            INSERT INTO email_log (id, trigger_name, recipient, subject, status, provider_id, error)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(trigger.as_str())
        .bind(recipient)
        .bind(subject)
        .bind(status.as_str())
        .bind(provider_id)
        .bind(error)
        .execute(&self.pool)
        .await;

        if let Err(e) = result {
            tracing::warn!("Could not record email_log entry for {}: {}", trigger, e);
        }
    }
}
