//! Input sanitization for customer-supplied text.
//!
//! Everything a customer types (names, notes, event details) passes through
//! here before it is stored or echoed into an email.

use serde_json::Value;

/// Escape the five HTML-significant characters
pub fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(ch),
        }
    }
    out
}

/// Remove anything that looks like a markup tag, including unterminated ones
pub fn strip_tags(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut in_tag = false;
    for ch in input.chars() {
        match ch {
            '<' => in_tag = true,
            '>' if in_tag => in_tag = false,
            _ if !in_tag => out.push(ch),
            _ => {}
        }
    }
    out
}

/// Trim, drop control characters, strip tags, collapse whitespace and cap length.
///
/// Newlines survive so multi-line notes keep their shape.
pub fn sanitize_text(input: &str, max_chars: usize) -> String {
    let stripped = strip_tags(input);
    let mut out = String::with_capacity(stripped.len().min(max_chars * 4));
    let mut last_was_space = false;

    for ch in stripped.chars() {
        if ch == '\n' {
            // Drop trailing spaces before a newline
            while out.ends_with(' ') {
                out.pop();
            }
            out.push('\n');
            last_was_space = false;
            continue;
        }
        if ch.is_control() {
            continue;
        }
        if ch.is_whitespace() {
            if !last_was_space {
                out.push(' ');
            }
            last_was_space = true;
            continue;
        }
        out.push(ch);
        last_was_space = false;
    }

    let trimmed = out.trim();
    trimmed.chars().take(max_chars).collect::<String>().trim_end().to_string()
}

/// Single-line variant for names and similar fields
pub fn sanitize_line(input: &str, max_chars: usize) -> String {
    sanitize_text(&input.replace(['\r', '\n'], " "), max_chars)
}

pub fn validate_email(input: &str) -> Result<String, String> {
    let email = input.trim().to_ascii_lowercase();
    if email.is_empty() {
        return Err("Email cannot be empty".to_string());
    }
    if email.len() > 254 {
        return Err("Email is too long".to_string());
    }

    let (local, domain) = email.split_once('@').ok_or_else(|| "Invalid email format".to_string())?;
    if local.is_empty() || local.len() > 64 || domain.contains('@') {
        return Err("Invalid email format".to_string());
    }
    if !domain.contains('.') || domain.starts_with('.') || domain.ends_with('.') || domain.contains("..") {
        return Err("Invalid email domain".to_string());
    }

    let local_ok = local
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || "._%+-'".contains(c));
    let domain_ok = domain
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-');
    if !local_ok || !domain_ok {
        return Err("Invalid email format".to_string());
    }

    Ok(email)
}

/// Normalize a phone number to `+digits` or `digits`, 10..=15 digits long
pub fn normalize_phone(input: &str) -> Result<String, String> {
    let trimmed = input.trim();
    let plus = trimmed.starts_with('+');
    let mut digits = String::new();

    for ch in trimmed.chars() {
        match ch {
            '0'..='9' => digits.push(ch),
            ' ' | '-' | '(' | ')' | '.' => {}
            '+' if digits.is_empty() => {}
            _ => return Err("Phone number contains invalid characters".to_string()),
        }
    }

    if !(10..=15).contains(&digits.len()) {
        return Err("Phone number must have 10 to 15 digits".to_string());
    }

    Ok(if plus { format!("+{}", digits) } else { digits })
}

/// Lowercase `a-z0-9-` slug, collapsing other runs into single hyphens
pub fn sanitize_slug(input: &str) -> String {
    let mut slug = String::with_capacity(input.len());
    for ch in input.trim().to_ascii_lowercase().chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch);
        } else if !slug.ends_with('-') && !slug.is_empty() {
            slug.push('-');
        }
    }
    slug.trim_end_matches('-').chars().take(80).collect()
}

const INJECTION_MARKERS: &[&str] = &[
    "<script",
    "</script",
    "javascript:",
    "vbscript:",
    "data:text/html",
    "<iframe",
    "<object",
    "<embed",
    "' or '1'='1",
    "\" or \"1\"=\"1",
    "union select",
    "; drop table",
    "--;",
    "/*",
];

/// Heuristic check for script or SQL injection payloads.
///
/// Used for monitoring; it never replaces escaping or bound parameters.
pub fn contains_injection_pattern(input: &str) -> bool {
    let lowered = input.to_ascii_lowercase();
    if INJECTION_MARKERS.iter().any(|marker| lowered.contains(marker)) {
        return true;
    }
    has_inline_event_handler(&lowered)
}

// Matches things like `onerror=` or `onload =` inside markup
fn has_inline_event_handler(lowered: &str) -> bool {
    let bytes = lowered.as_bytes();
    let mut i = 0;
    while let Some(pos) = lowered[i..].find("on") {
        let start = i + pos;
        let preceded_ok = start == 0 || !bytes[start - 1].is_ascii_alphanumeric();
        let mut j = start + 2;
        while j < bytes.len() && bytes[j].is_ascii_alphabetic() {
            j += 1;
        }
        let name_len = j - start - 2;
        while j < bytes.len() && bytes[j] == b' ' {
            j += 1;
        }
        if preceded_ok && name_len >= 3 && j < bytes.len() && bytes[j] == b'=' && lowered.contains('<') {
            return true;
        }
        i = start + 2;
    }
    false
}

/// Recursively sanitize every string inside a JSON value
pub fn sanitize_json_strings(value: &mut Value, max_chars: usize) {
    match value {
        Value::String(s) => *s = sanitize_text(s, max_chars),
        Value::Array(items) => items.iter_mut().for_each(|v| sanitize_json_strings(v, max_chars)),
        Value::Object(map) => map.values_mut().for_each(|v| sanitize_json_strings(v, max_chars)),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn escapes_html_specials() {
        assert_eq!(escape_html(r#"<a href="x">Tom & Jerry's</a>"#), "&lt;a href=&quot;x&quot;&gt;Tom &amp; Jerry&#x27;s&lt;/a&gt;");
    }

    #[test]
    fn strips_tags_and_collapses_whitespace() {
        assert_eq!(sanitize_text("  <b>Hello</b>   \t world  ", 100), "Hello world");
        assert_eq!(sanitize_text("line one   \nline two", 100), "line one\nline two");
        assert_eq!(sanitize_text("<script>alert(1)</script>ok", 100), "alert(1)ok");
        assert_eq!(sanitize_text("unterminated <img src=x onerror=alert(1)", 100), "unterminated");
    }

    #[test]
    fn truncates_on_char_boundary() {
        assert_eq!(sanitize_text("crème brûlée", 5), "crème");
        assert_eq!(sanitize_line("a\nb", 10), "a b");
    }

    #[test]
    fn validates_emails() {
        assert_eq!(validate_email(" Chef@Example.COM ").unwrap(), "chef@example.com");
        assert!(validate_email("o'brien+events@mail.example.org").is_ok());
        assert!(validate_email("").is_err());
        assert!(validate_email("no-at-sign").is_err());
        assert!(validate_email("a@b").is_err());
        assert!(validate_email("a@@b.com").is_err());
        assert!(validate_email("a@b..com").is_err());
        assert!(validate_email("a b@c.com").is_err());
    }

    #[test]
    fn normalizes_phone_numbers() {
        assert_eq!(normalize_phone("(555) 123-4567").unwrap(), "5551234567");
        assert_eq!(normalize_phone("+44 20 7946 0958").unwrap(), "+442079460958");
        assert!(normalize_phone("12345").is_err());
        assert!(normalize_phone("555-123-4567 ext 9").is_err());
    }

    #[test]
    fn builds_slugs() {
        assert_eq!(sanitize_slug("  Smoked Brisket (1 lb) "), "smoked-brisket-1-lb");
        assert_eq!(sanitize_slug("--Tacos!!"), "tacos");
    }

    #[test]
    fn flags_injection_patterns() {
        assert!(contains_injection_pattern("<SCRIPT>alert(1)</script>"));
        assert!(contains_injection_pattern("x' OR '1'='1"));
        assert!(contains_injection_pattern("<img src=x onerror=alert(1)>"));
        assert!(contains_injection_pattern("1 UNION SELECT password FROM admin_users"));
        assert!(!contains_injection_pattern("Please add extra onions = yes"));
        assert!(!contains_injection_pattern("Gluten-free options for 40 guests"));
    }

    #[test]
    fn sanitizes_nested_json() {
        let mut value = json!({ "notes": "<b>hi</b>", "items": [{ "label": " a   b " }], "qty": 3 });
        sanitize_json_strings(&mut value, 50);
        assert_eq!(value, json!({ "notes": "hi", "items": [{ "label": "a b" }], "qty": 3 }));
    }
}
