use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use uuid::Uuid;

const RING_CAPACITY: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityEventKind {
    RateLimited,
    InvalidSignature,
    SessionHijackSuspected,
    UploadRejected,
    InjectionAttempt,
    AuthFailure,
}

impl SecurityEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SecurityEventKind::RateLimited => "rate_limited",
            SecurityEventKind::InvalidSignature => "invalid_signature",
            SecurityEventKind::SessionHijackSuspected => "session_hijack_suspected",
            SecurityEventKind::UploadRejected => "upload_rejected",
            SecurityEventKind::InjectionAttempt => "injection_attempt",
            SecurityEventKind::AuthFailure => "auth_failure",
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            SecurityEventKind::RateLimited => Severity::Low,
            SecurityEventKind::UploadRejected | SecurityEventKind::AuthFailure => Severity::Medium,
            SecurityEventKind::InjectionAttempt | SecurityEventKind::InvalidSignature => Severity::High,
            SecurityEventKind::SessionHijackSuspected => Severity::High,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SecurityEvent {
    pub id: Uuid,
    pub kind: SecurityEventKind,
    pub severity: Severity,
    pub ip: Option<String>,
    pub detail: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SecuritySummary {
    pub total_events: usize,
    pub by_kind: HashMap<&'static str, usize>,
    pub flagged_ips: Vec<String>,
    pub window_secs: i64,
}

#[derive(Default)]
struct MonitorState {
    events: VecDeque<SecurityEvent>,
    flagged: HashMap<String, DateTime<Utc>>,
}

/// Bounded in-memory record of security events with per-IP alerting
pub struct SecurityMonitor {
    state: Mutex<MonitorState>,
    alert_threshold: usize,
    window: Duration,
    pool: Option<PgPool>,
}

impl SecurityMonitor {
    pub fn new(alert_threshold: usize, window: Duration, pool: Option<PgPool>) -> Self {
        Self {
            state: Mutex::new(MonitorState::default()),
            alert_threshold: alert_threshold.max(1),
            window,
            pool,
        }
    }

    /// Record an event; returns true when this event pushed the IP over the alert threshold
    pub fn record(&self, kind: SecurityEventKind, ip: Option<String>, detail: impl Into<String>) -> bool {
        let event = SecurityEvent {
            id: Uuid::new_v4(),
            kind,
            severity: kind.severity(),
            ip,
            detail: detail.into(),
            at: Utc::now(),
        };

        match event.severity {
            Severity::High => tracing::warn!(kind = kind.as_str(), ip = ?event.ip, "security event: {}", event.detail),
            _ => tracing::info!(kind = kind.as_str(), ip = ?event.ip, "security event: {}", event.detail),
        }

        let newly_flagged = self.push(event.clone());
        self.persist(event);
        newly_flagged
    }

    fn push(&self, event: SecurityEvent) -> bool {
        // A poisoned lock only means another thread panicked mid-push; the ring is still usable
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let cutoff = event.at - self.window;

        let mut newly_flagged = false;
        if let Some(ip) = event.ip.clone() {
            let recent = state
                .events
                .iter()
                .filter(|e| e.at >= cutoff && e.ip.as_deref() == Some(ip.as_str()))
                .count()
                + 1;
            if recent >= self.alert_threshold && !state.flagged.contains_key(&ip) {
                tracing::warn!(ip = %ip, count = recent, "security alert: event threshold exceeded");
                state.flagged.insert(ip, event.at);
                newly_flagged = true;
            }
        }

        if state.events.len() == RING_CAPACITY {
            state.events.pop_front();
        }
        state.events.push_back(event);
        newly_flagged
    }

    fn persist(&self, event: SecurityEvent) {
        let Some(pool) = self.pool.clone() else { return };
        // Best effort; monitoring must never fail a request
        if tokio::runtime::Handle::try_current().is_err() {
            return;
        }
        tokio::spawn(async move {
            let result = sqlx::query(
                "INSERT INTO security_events (id, kind, severity, ip, detail, created_at) VALUES ($1, $2, $3, $4, $5, $6)",
            )
            .bind(event.id)
            .bind(event.kind.as_str())
            .bind(event.severity.as_str())
            .bind(&event.ip)
            .bind(&event.detail)
            .bind(event.at)
            .execute(&pool)
            .await;
            if let Err(e) = result {
                tracing::debug!("Failed to persist security event: {}", e);
            }
        });
    }

    pub fn is_flagged(&self, ip: &str) -> bool {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state
            .flagged
            .get(ip)
            .is_some_and(|at| Utc::now() - *at < self.window)
    }

    /// Most recent events first
    pub fn recent(&self, limit: usize, min_severity: Option<Severity>) -> Vec<SecurityEvent> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state
            .events
            .iter()
            .rev()
            .filter(|e| min_severity.map_or(true, |min| e.severity >= min))
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn summary(&self) -> SecuritySummary {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let cutoff = Utc::now() - self.window;

        let mut by_kind = HashMap::new();
        let mut total = 0;
        for event in state.events.iter().filter(|e| e.at >= cutoff) {
            *by_kind.entry(event.kind.as_str()).or_insert(0) += 1;
            total += 1;
        }

        let mut flagged_ips: Vec<String> = state
            .flagged
            .iter()
            .filter(|(_, at)| **at >= cutoff)
            .map(|(ip, _)| ip.clone())
            .collect();
        flagged_ips.sort();

        SecuritySummary {
            total_events: total,
            by_kind,
            flagged_ips,
            window_secs: self.window.num_seconds(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_ip_once_threshold_reached() {
        let monitor = SecurityMonitor::new(3, Duration::minutes(5), None);
        let ip = Some("203.0.113.9".to_string());
        assert!(!monitor.record(SecurityEventKind::AuthFailure, ip.clone(), "bad password"));
        assert!(!monitor.record(SecurityEventKind::AuthFailure, ip.clone(), "bad password"));
        assert!(monitor.record(SecurityEventKind::AuthFailure, ip.clone(), "bad password"));
        // Already flagged; no second alert
        assert!(!monitor.record(SecurityEventKind::AuthFailure, ip, "bad password"));
        assert!(monitor.is_flagged("203.0.113.9"));
        assert!(!monitor.is_flagged("198.51.100.1"));
    }

    #[test]
    fn ring_is_bounded() {
        let monitor = SecurityMonitor::new(usize::MAX, Duration::minutes(5), None);
        for i in 0..(RING_CAPACITY + 10) {
            monitor.record(SecurityEventKind::RateLimited, None, format!("event {}", i));
        }
        let recent = monitor.recent(usize::MAX, None);
        assert_eq!(recent.len(), RING_CAPACITY);
        assert_eq!(recent[0].detail, format!("event {}", RING_CAPACITY + 9));
    }

    #[test]
    fn filters_by_severity_and_summarizes() {
        let monitor = SecurityMonitor::new(100, Duration::minutes(5), None);
        monitor.record(SecurityEventKind::RateLimited, Some("a".into()), "x");
        monitor.record(SecurityEventKind::InjectionAttempt, Some("a".into()), "y");
        monitor.record(SecurityEventKind::InvalidSignature, None, "z");

        let high = monitor.recent(10, Some(Severity::High));
        assert_eq!(high.len(), 2);

        let summary = monitor.summary();
        assert_eq!(summary.total_events, 3);
        assert_eq!(summary.by_kind.get("rate_limited"), Some(&1));
        assert!(summary.flagged_ips.is_empty());
    }
}
