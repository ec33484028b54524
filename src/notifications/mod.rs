//! Transactional email: triggers, templates, transports and opt-out preferences.

pub mod template;
pub mod transport;
pub mod trigger;

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

pub use template::{vars, EmailTemplate, RenderedEmail, TemplateVars};
pub use transport::{EmailError, EmailMessage, EmailTransport, LogTransport, ResendTransport};
pub use trigger::{NotificationTrigger, PreferenceCategory};

/// Per-address opt-outs; addresses with no row receive everything
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct NotificationPreferences {
    pub email: String,
    pub quote_updates: bool,
    pub reminders: bool,
}

impl NotificationPreferences {
    pub fn default_for(email: &str) -> Self {
        Self {
            email: email.to_string(),
            quote_updates: true,
            reminders: true,
        }
    }

    pub fn allows(&self, category: PreferenceCategory) -> bool {
        match category {
            PreferenceCategory::Transactional | PreferenceCategory::Admin => true,
            PreferenceCategory::QuoteUpdates => self.quote_updates,
            PreferenceCategory::Reminders => self.reminders,
        }
    }
}

/// Body for `PUT /api/notifications/preferences`
#[derive(Debug, Clone, Deserialize)]
pub struct PreferencesUpdate {
    pub quote_updates: Option<bool>,
    pub reminders: Option<bool>,
}

/// Outcome recorded in `email_log`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryStatus {
    Sent,
    Failed,
    Skipped,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Sent => "sent",
            DeliveryStatus::Failed => "failed",
            DeliveryStatus::Skipped => "skipped",
        }
    }
}
