//! Anonymous shopper sessions.
//!
//! The browser holds a random bearer token in an HttpOnly cookie; the server
//! keeps only its SHA-256 hash plus a fingerprint of the client. A session
//! whose fingerprint changes is treated as hijacked and revoked.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::net::IpAddr;
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

pub const SESSION_COOKIE: &str = "sf_session";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("session not found")]
    NotFound,
    #[error("session expired")]
    Expired,
    #[error("session fingerprint mismatch")]
    FingerprintMismatch,
}

#[derive(Debug, Clone)]
pub struct Session {
    /// Stable identifier; survives token rotation so carts stay attached
    pub id: Uuid,
    pub fingerprint: String,
    pub created_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

/// What handlers see for the current request
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub session_id: Uuid,
    pub fingerprint: String,
    /// Token currently bound to the session
    pub token: String,
    /// Set when the middleware minted the token on this request
    pub issued_token: Option<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct SessionPolicy {
    pub idle_timeout: Duration,
    pub absolute_lifetime: Duration,
    /// Upper bound on live sessions; the least recently seen is evicted past it
    pub max_sessions: usize,
}

impl SessionPolicy {
    pub fn new(idle_minutes: i64, absolute_hours: i64, max_sessions: usize) -> Self {
        Self {
            idle_timeout: Duration::minutes(idle_minutes),
            absolute_lifetime: Duration::hours(absolute_hours),
            max_sessions: max_sessions.max(1),
        }
    }
}

/// SHA-256 over the stable parts of a client's identity.
///
/// The IP is truncated to its /24 (v4) or /48 (v6) network so mobile clients
/// moving within a carrier block keep their session.
pub fn fingerprint(user_agent: &str, accept_language: &str, ip: Option<IpAddr>) -> String {
    let network = match ip {
        Some(IpAddr::V4(v4)) => {
            let o = v4.octets();
            format!("{}.{}.{}.0/24", o[0], o[1], o[2])
        }
        Some(IpAddr::V6(v6)) => {
            let s = v6.segments();
            format!("{:x}:{:x}:{:x}::/48", s[0], s[1], s[2])
        }
        None => "unknown".to_string(),
    };

    let mut hasher = Sha256::new();
    hasher.update(user_agent.as_bytes());
    hasher.update(b"|");
    hasher.update(accept_language.as_bytes());
    hasher.update(b"|");
    hasher.update(network.as_bytes());
    hex::encode(hasher.finalize())
}

fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

fn new_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Build the `Set-Cookie` value for a session token
pub fn session_cookie(token: &str, secure: bool, max_age: Duration) -> String {
    let mut cookie = format!(
        "{}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
        SESSION_COOKIE,
        token,
        max_age.num_seconds()
    );
    if secure {
        cookie.push_str("; Secure");
    }
    cookie
}

/// Pull the session token out of a `Cookie` header value
pub fn token_from_cookie_header(header: &str) -> Option<&str> {
    header
        .split(';')
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value.trim())
        .filter(|value| !value.is_empty())
}

/// In-memory session registry keyed by token hash
pub struct SessionStore {
    sessions: RwLock<HashMap<String, Session>>,
    policy: SessionPolicy,
}

impl SessionStore {
    pub fn new(policy: SessionPolicy) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            policy,
        }
    }

    pub fn policy(&self) -> SessionPolicy {
        self.policy
    }

    /// Start a new session and return its bearer token
    pub async fn create(&self, fingerprint: String) -> (String, Session) {
        let now = Utc::now();
        let token = new_token();
        let session = Session {
            id: Uuid::new_v4(),
            fingerprint,
            created_at: now,
            last_seen: now,
        };

        let mut sessions = self.sessions.write().await;
        if sessions.len() >= self.policy.max_sessions {
            sessions.retain(|_, s| !self.is_expired(s, now));
        }
        if sessions.len() >= self.policy.max_sessions {
            let stalest = sessions
                .iter()
                .min_by_key(|(_, s)| s.last_seen)
                .map(|(key, _)| key.clone());
            if let Some(key) = stalest {
                sessions.remove(&key);
                tracing::debug!("Session store full ({}); evicted least recently seen", self.policy.max_sessions);
            }
        }
        sessions.insert(hash_token(&token), session.clone());
        (token, session)
    }

    /// Check token, expiry and fingerprint; refreshes `last_seen` on success
    pub async fn validate(&self, token: &str, fingerprint: &str, now: DateTime<Utc>) -> Result<Session, SessionError> {
        let key = hash_token(token);
        let mut sessions = self.sessions.write().await;
        let session = sessions.get_mut(&key).ok_or(SessionError::NotFound)?;

        if self.is_expired(session, now) {
            sessions.remove(&key);
            return Err(SessionError::Expired);
        }
        if session.fingerprint != fingerprint {
            sessions.remove(&key);
            return Err(SessionError::FingerprintMismatch);
        }

        session.last_seen = now;
        Ok(session.clone())
    }

    /// Replace the token while keeping the session identity
    pub async fn rotate(&self, token: &str) -> Result<String, SessionError> {
        let mut sessions = self.sessions.write().await;
        let session = sessions.remove(&hash_token(token)).ok_or(SessionError::NotFound)?;
        let fresh = new_token();
        sessions.insert(hash_token(&fresh), session);
        Ok(fresh)
    }

    pub async fn revoke(&self, token: &str) -> bool {
        self.sessions.write().await.remove(&hash_token(token)).is_some()
    }

    /// Drop expired sessions; returns how many were removed
    pub async fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, s| !self.is_expired(s, now));
        before - sessions.len()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    fn is_expired(&self, session: &Session, now: DateTime<Utc>) -> bool {
        now - session.last_seen > self.policy.idle_timeout || now - session.created_at > self.policy.absolute_lifetime
    }
}
