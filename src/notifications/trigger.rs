use serde::{Deserialize, Serialize};
use std::fmt;

/// Business events that send email
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationTrigger {
    OrderConfirmation,
    PaymentFailed,
    QuoteReceived,
    QuoteApproved,
    QuoteFollowUp,
    DepositReceived,
    BalanceReminder,
    BalanceReceived,
    QuoteCancelled,
    AdminNewOrder,
    AdminNewQuote,
    AdminPaymentIssue,
}

/// Opt-out groups; only `QuoteUpdates` and `Reminders` can be switched off
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PreferenceCategory {
    Transactional,
    QuoteUpdates,
    Reminders,
    Admin,
}

impl PreferenceCategory {
    pub fn always_sent(&self) -> bool {
        matches!(self, PreferenceCategory::Transactional | PreferenceCategory::Admin)
    }
}

impl NotificationTrigger {
    pub const ALL: [NotificationTrigger; 12] = [
        NotificationTrigger::OrderConfirmation,
        NotificationTrigger::PaymentFailed,
        NotificationTrigger::QuoteReceived,
        NotificationTrigger::QuoteApproved,
        NotificationTrigger::QuoteFollowUp,
        NotificationTrigger::DepositReceived,
        NotificationTrigger::BalanceReminder,
        NotificationTrigger::BalanceReceived,
        NotificationTrigger::QuoteCancelled,
        NotificationTrigger::AdminNewOrder,
        NotificationTrigger::AdminNewQuote,
        NotificationTrigger::AdminPaymentIssue,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationTrigger::OrderConfirmation => "order_confirmation",
            NotificationTrigger::PaymentFailed => "payment_failed",
            NotificationTrigger::QuoteReceived => "quote_received",
            NotificationTrigger::QuoteApproved => "quote_approved",
            NotificationTrigger::QuoteFollowUp => "quote_follow_up",
            NotificationTrigger::DepositReceived => "deposit_received",
            NotificationTrigger::BalanceReminder => "balance_reminder",
            NotificationTrigger::BalanceReceived => "balance_received",
            NotificationTrigger::QuoteCancelled => "quote_cancelled",
            NotificationTrigger::AdminNewOrder => "admin_new_order",
            NotificationTrigger::AdminNewQuote => "admin_new_quote",
            NotificationTrigger::AdminPaymentIssue => "admin_payment_issue",
        }
    }

    /// Template id rendered for this trigger
    pub fn template(&self) -> &'static str {
        match self {
            NotificationTrigger::OrderConfirmation => "order-confirmation",
            NotificationTrigger::PaymentFailed => "payment-failed",
            NotificationTrigger::QuoteReceived => "quote-received",
            NotificationTrigger::QuoteApproved => "quote-approved",
            NotificationTrigger::QuoteFollowUp => "quote-follow-up",
            NotificationTrigger::DepositReceived => "deposit-received",
            NotificationTrigger::BalanceReminder => "balance-reminder",
            NotificationTrigger::BalanceReceived => "balance-received",
            NotificationTrigger::QuoteCancelled => "quote-cancelled",
            NotificationTrigger::AdminNewOrder => "admin-new-order",
            NotificationTrigger::AdminNewQuote => "admin-new-quote",
            NotificationTrigger::AdminPaymentIssue => "admin-payment-issue",
        }
    }

    pub fn category(&self) -> PreferenceCategory {
        match self {
            NotificationTrigger::OrderConfirmation
            | NotificationTrigger::PaymentFailed
            | NotificationTrigger::QuoteReceived
            | NotificationTrigger::QuoteApproved
            | NotificationTrigger::DepositReceived
            | NotificationTrigger::BalanceReceived => PreferenceCategory::Transactional,
            NotificationTrigger::QuoteCancelled => PreferenceCategory::QuoteUpdates,
            NotificationTrigger::QuoteFollowUp | NotificationTrigger::BalanceReminder => PreferenceCategory::Reminders,
            NotificationTrigger::AdminNewOrder
            | NotificationTrigger::AdminNewQuote
            | NotificationTrigger::AdminPaymentIssue => PreferenceCategory::Admin,
        }
    }
}

impl fmt::Display for NotificationTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admin_and_transactional_cannot_be_muted() {
        assert!(NotificationTrigger::OrderConfirmation.category().always_sent());
        assert!(NotificationTrigger::AdminNewQuote.category().always_sent());
        assert!(!NotificationTrigger::BalanceReminder.category().always_sent());
        assert!(!NotificationTrigger::QuoteCancelled.category().always_sent());
    }

    #[test]
    fn every_trigger_has_a_template() {
        for trigger in NotificationTrigger::ALL {
            assert!(super::super::template::builtin(trigger.template()).is_some(), "{}", trigger);
        }
    }
}
