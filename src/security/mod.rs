// Security and compliance layer: sessions, input hygiene, uploads, throttling, monitoring

pub mod monitor;
pub mod rate_limit;
pub mod sanitize;
pub mod session;
pub mod tokens;
pub mod upload;

pub use monitor::{SecurityEventKind, SecurityMonitor};
pub use rate_limit::{Decision, RateLimiter, RateScope};
pub use session::{SessionContext, SessionStore};
pub use tokens::TokenSigner;

/// Compare two byte strings without short-circuiting on the first difference
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_time_eq_matches_regular_eq() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"ab"));
        assert!(constant_time_eq(b"", b""));
    }
}
