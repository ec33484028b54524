//! `{{key}}` email templates.
//!
//! Values are HTML-escaped into the body. Subjects are reduced to a single
//! sanitized line so a value can never inject extra headers.

use std::collections::HashMap;

use crate::security::sanitize::{escape_html, sanitize_line};

pub type TemplateVars = HashMap<String, String>;

/// Build template variables from string pairs
pub fn vars<const N: usize>(pairs: [(&str, String); N]) -> TemplateVars {
    pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
}

#[derive(Debug, Clone, Copy)]
pub struct EmailTemplate {
    pub id: &'static str,
    pub subject: &'static str,
    pub html: &'static str,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedEmail {
    pub subject: String,
    pub html: String,
}

impl EmailTemplate {
    pub fn render(&self, vars: &TemplateVars) -> RenderedEmail {
        let subject = substitute(self.subject, |key| vars.get(key).map(|v| sanitize_line(v, 200)), self.id);
        let html = substitute(self.html, |key| vars.get(key).map(|v| escape_html(v)), self.id);
        RenderedEmail {
            subject: sanitize_line(&subject, 200),
            html,
        }
    }
}

fn substitute<F>(source: &str, lookup: F, template_id: &str) -> String
where
    F: Fn(&str) -> Option<String>,
{
    let mut out = String::with_capacity(source.len());
    let mut rest = source;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            // Unterminated placeholder, emit verbatim
            out.push_str(&rest[start..]);
            return out;
        };
        let key = after[..end].trim();
        match lookup(key) {
            Some(value) => out.push_str(&value),
            None => tracing::debug!("Template {} has no value for '{}'", template_id, key),
        }
        rest = &after[end + 2..];
    }
    out.push_str(rest);
    out
}

macro_rules! with_footer {
    ($body:expr) => {
        concat!($body, r#"<p style="font-size:12px;color:#777">Manage your email preferences: <a href="{{preferences_url}}">{{preferences_url}}</a></p>"#)
    };
}

static TEMPLATES: &[EmailTemplate] = &[
    EmailTemplate {
        id: "order-confirmation",
        subject: "Order {{order_number}} confirmed",
        html: with_footer!("<h1>Thanks, {{customer_name}}!</h1><p>We received payment for order <strong>{{order_number}}</strong>.</p><p>Total: ${{total}} ({{fulfilment}})</p>"),
    },
    EmailTemplate {
        id: "payment-failed",
        subject: "Payment for {{reference}} did not go through",
        html: with_footer!("<p>Hi {{customer_name}},</p><p>Your payment for {{reference}} failed: {{reason}}.</p><p>No charge was made. Please try again.</p>"),
    },
    EmailTemplate {
        id: "quote-received",
        subject: "We received your catering request",
        html: with_footer!("<p>Hi {{customer_name}},</p><p>Thanks for your catering request for {{guest_count}} guests on {{event_date}}. We will review it and send a quote shortly.</p>"),
    },
    EmailTemplate {
        id: "quote-approved",
        subject: "Your catering quote is ready",
        html: with_footer!("<p>Hi {{customer_name}},</p><p>Your quote for {{event_date}} comes to ${{total}}.</p><p>A deposit of ${{deposit}} secures your date; the remaining ${{balance}} is due before the event.</p><p><a href=\"{{payment_url}}\">Pay your deposit</a></p>"),
    },
    EmailTemplate {
        id: "quote-follow-up",
        subject: "Your catering date is still open",
        html: with_footer!("<p>Hi {{customer_name}},</p><p>We are holding {{event_date}} for you. Pay the ${{deposit}} deposit to confirm.</p><p><a href=\"{{payment_url}}\">Pay your deposit</a></p>"),
    },
    EmailTemplate {
        id: "deposit-received",
        subject: "Deposit received for {{event_date}}",
        html: with_footer!("<p>Hi {{customer_name}},</p><p>We received your ${{deposit}} deposit. Your date is confirmed.</p><p>The balance of ${{balance}} can be paid any time before the event: <a href=\"{{payment_url}}\">pay balance</a>.</p>"),
    },
    EmailTemplate {
        id: "balance-reminder",
        subject: "Balance due for your event on {{event_date}}",
        html: with_footer!("<p>Hi {{customer_name}},</p><p>Your event is coming up on {{event_date}}. The remaining balance of ${{balance}} is due.</p><p><a href=\"{{payment_url}}\">Pay balance</a></p>"),
    },
    EmailTemplate {
        id: "balance-received",
        subject: "Paid in full, see you on {{event_date}}",
        html: with_footer!("<p>Hi {{customer_name}},</p><p>We received your final payment of ${{balance}}. Your catering order is paid in full.</p>"),
    },
    EmailTemplate {
        id: "quote-cancelled",
        subject: "Your catering quote was cancelled",
        html: with_footer!("<p>Hi {{customer_name}},</p><p>Your catering quote for {{event_date}} has been cancelled.</p><p>{{reason}}</p>"),
    },
    EmailTemplate {
        id: "admin-new-order",
        subject: "New order {{order_number}} (${{total}})",
        html: "<p>Order {{order_number}} from {{customer_name}} ({{email}}) was paid.</p><p>Total: ${{total}}, {{fulfilment}}.</p>",
    },
    EmailTemplate {
        id: "admin-new-quote",
        subject: "New catering request from {{customer_name}}",
        html: "<p>{{customer_name}} ({{email}}, {{phone}}) requested catering for {{guest_count}} guests on {{event_date}}.</p><p>{{details}}</p>",
    },
    EmailTemplate {
        id: "admin-payment-issue",
        subject: "Payment needs attention: {{reference}} ({{issue}})",
        html: "<p>{{provider}} payment {{provider_ref}} captured ${{amount}} for {{reference}} ({{detail}}).</p><p>It was recorded as <strong>{{issue}}</strong> and not applied. Refund or settle it with {{customer_name}} ({{email}}).</p>",
    },
];

pub fn builtin(id: &str) -> Option<&'static EmailTemplate> {
    TEMPLATES.iter().find(|t| t.id == id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitutes_and_escapes() {
        let template = EmailTemplate {
            id: "t",
            subject: "Hello {{ name }}",
            html: "<p>{{name}} said {{quote}}</p>",
        };
        let rendered = template.render(&vars([
            ("name", "Ana".to_string()),
            ("quote", "<script>alert(1)</script>".to_string()),
        ]));
        assert_eq!(rendered.subject, "Hello Ana");
        assert_eq!(rendered.html, "<p>Ana said &lt;script&gt;alert(1)&lt;/script&gt;</p>");
    }

    #[test]
    fn missing_keys_render_empty() {
        let template = EmailTemplate {
            id: "t",
            subject: "Order {{number}}",
            html: "<p>{{missing}}done</p>",
        };
        let rendered = template.render(&TemplateVars::new());
        assert_eq!(rendered.subject, "Order");
        assert_eq!(rendered.html, "<p>done</p>");
    }

    #[test]
    fn subject_values_cannot_add_lines() {
        let template = EmailTemplate {
            id: "t",
            subject: "Hi {{name}}",
            html: "",
        };
        let rendered = template.render(&vars([("name", "Ana\r\nBcc: x@example.com".to_string())]));
        assert!(!rendered.subject.contains('\n'));
        assert!(!rendered.subject.contains('\r'));
    }

    #[test]
    fn unterminated_placeholder_is_left_alone() {
        let template = EmailTemplate {
            id: "t",
            subject: "",
            html: "a {{b",
        };
        assert_eq!(template.render(&TemplateVars::new()).html, "a {{b");
    }

    #[test]
    fn customer_templates_carry_preferences_link() {
        let rendered = builtin("quote-approved")
            .unwrap()
            .render(&vars([("preferences_url", "https://shop.example/p?token=abc".to_string())]));
        assert!(rendered.html.contains("https://shop.example/p?token=abc"));
        assert!(!builtin("admin-new-quote").unwrap().html.contains("preferences_url"));
    }
}
