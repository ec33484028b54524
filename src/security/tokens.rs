//! HMAC-signed, URL-safe tokens for quote payment links and email preference links.
//!
//! Token format: `base64url(payload) "." base64url(hmac_sha256(secret, payload))`.
//! Payloads are `|`-separated and start with a version tag.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Duration, TimeZone, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;
use uuid::Uuid;

use crate::types::PaymentPhase;

type HmacSha256 = Hmac<Sha256>;

const PAYMENT_TOKEN_VERSION: &str = "v1";
const PREFERENCE_TOKEN_VERSION: &str = "p1";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenError {
    #[error("token is malformed")]
    Malformed,
    #[error("token signature does not match")]
    BadSignature,
    #[error("token has expired")]
    Expired,
    #[error("unsupported token version")]
    UnsupportedVersion,
}

/// Signs and verifies opaque link tokens with a server-side secret
#[derive(Clone)]
pub struct TokenSigner {
    secret: Vec<u8>,
}

impl std::fmt::Debug for TokenSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenSigner").finish_non_exhaustive()
    }
}

impl TokenSigner {
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        Self {
            secret: secret.as_ref().to_vec(),
        }
    }

    fn mac(&self) -> HmacSha256 {
        // HMAC accepts keys of any length
        HmacSha256::new_from_slice(&self.secret).expect("HMAC accepts any key length")
    }

    pub fn sign(&self, payload: &str) -> String {
        let mut mac = self.mac();
        mac.update(payload.as_bytes());
        let signature = mac.finalize().into_bytes();
        format!("{}.{}", URL_SAFE_NO_PAD.encode(payload), URL_SAFE_NO_PAD.encode(signature))
    }

    /// Verify the signature in constant time and return the payload
    pub fn verify(&self, token: &str) -> Result<String, TokenError> {
        let (payload_b64, sig_b64) = token.split_once('.').ok_or(TokenError::Malformed)?;
        let payload = URL_SAFE_NO_PAD.decode(payload_b64).map_err(|_| TokenError::Malformed)?;
        let signature = URL_SAFE_NO_PAD.decode(sig_b64).map_err(|_| TokenError::Malformed)?;

        let mut mac = self.mac();
        mac.update(&payload);
        mac.verify_slice(&signature).map_err(|_| TokenError::BadSignature)?;

        String::from_utf8(payload).map_err(|_| TokenError::Malformed)
    }

    pub fn issue_payment_token(&self, claims: &PaymentClaims) -> String {
        self.sign(&claims.encode())
    }

    pub fn verify_payment_token(&self, token: &str, now: DateTime<Utc>) -> Result<PaymentClaims, TokenError> {
        let payload = self.verify(token)?;
        let claims = PaymentClaims::decode(&payload)?;
        if claims.expires_at <= now {
            return Err(TokenError::Expired);
        }
        Ok(claims)
    }

    pub fn issue_preference_token(&self, email: &str) -> String {
        self.sign(&format!("{}|{}", PREFERENCE_TOKEN_VERSION, email.to_ascii_lowercase()))
    }

    /// Returns the email address the preference link was issued for
    pub fn verify_preference_token(&self, token: &str) -> Result<String, TokenError> {
        let payload = self.verify(token)?;
        let (version, email) = payload.split_once('|').ok_or(TokenError::Malformed)?;
        if version != PREFERENCE_TOKEN_VERSION {
            return Err(TokenError::UnsupportedVersion);
        }
        if email.is_empty() {
            return Err(TokenError::Malformed);
        }
        Ok(email.to_string())
    }
}

/// What a quote payment link authorises: one specific charge against one quote
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentClaims {
    pub quote_id: Uuid,
    pub phase: PaymentPhase,
    pub amount_cents: i64,
    pub expires_at: DateTime<Utc>,
}

impl PaymentClaims {
    pub fn new(quote_id: Uuid, phase: PaymentPhase, amount_cents: i64, ttl: Duration) -> Self {
        Self {
            quote_id,
            phase,
            amount_cents,
            expires_at: Utc::now() + ttl,
        }
    }

    fn encode(&self) -> String {
        format!(
            "{}|{}|{}|{}|{}",
            PAYMENT_TOKEN_VERSION,
            self.quote_id,
            self.phase,
            self.amount_cents,
            self.expires_at.timestamp()
        )
    }

    fn decode(payload: &str) -> Result<Self, TokenError> {
        let parts: Vec<&str> = payload.split('|').collect();
        if parts.len() != 5 {
            return Err(TokenError::Malformed);
        }
        if parts[0] != PAYMENT_TOKEN_VERSION {
            return Err(TokenError::UnsupportedVersion);
        }

        let quote_id = Uuid::parse_str(parts[1]).map_err(|_| TokenError::Malformed)?;
        let phase = parts[2].parse::<PaymentPhase>().map_err(|_| TokenError::Malformed)?;
        let amount_cents = parts[3].parse::<i64>().map_err(|_| TokenError::Malformed)?;
        let expires_unix = parts[4].parse::<i64>().map_err(|_| TokenError::Malformed)?;
        let expires_at = Utc
            .timestamp_opt(expires_unix, 0)
            .single()
            .ok_or(TokenError::Malformed)?;

        Ok(Self {
            quote_id,
            phase,
            amount_cents,
            expires_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signer() -> TokenSigner {
        TokenSigner::new("test-secret-for-links")
    }

    #[test]
    fn payment_token_verifies_and_decodes() {
        let claims = PaymentClaims::new(Uuid::new_v4(), PaymentPhase::Deposit, 125_000, Duration::days(14));
        let token = signer().issue_payment_token(&claims);

        let decoded = signer().verify_payment_token(&token, Utc::now()).unwrap();
        assert_eq!(decoded.quote_id, claims.quote_id);
        assert_eq!(decoded.phase, PaymentPhase::Deposit);
        assert_eq!(decoded.amount_cents, 125_000);
        // Second precision survives the trip
        assert_eq!(decoded.expires_at.timestamp(), claims.expires_at.timestamp());
    }

    #[test]
    fn token_is_url_safe() {
        let claims = PaymentClaims::new(Uuid::new_v4(), PaymentPhase::Balance, 1, Duration::days(1));
        let token = signer().issue_payment_token(&claims);
        assert!(token.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.'));
    }

    #[test]
    fn rejects_tampered_amount() {
        let claims = PaymentClaims::new(Uuid::new_v4(), PaymentPhase::Deposit, 50_000, Duration::days(1));
        let token = signer().issue_payment_token(&claims);
        let (_, sig) = token.split_once('.').unwrap();

        let forged_payload = PaymentClaims { amount_cents: 1, ..claims }.encode();
        let forged = format!("{}.{}", URL_SAFE_NO_PAD.encode(forged_payload), sig);
        assert_eq!(signer().verify_payment_token(&forged, Utc::now()), Err(TokenError::BadSignature));
    }

    #[test]
    fn rejects_token_from_other_secret() {
        let claims = PaymentClaims::new(Uuid::new_v4(), PaymentPhase::Deposit, 50_000, Duration::days(1));
        let token = TokenSigner::new("another-secret").issue_payment_token(&claims);
        assert_eq!(signer().verify_payment_token(&token, Utc::now()), Err(TokenError::BadSignature));
    }

    #[test]
    fn rejects_expired_token() {
        let claims = PaymentClaims::new(Uuid::new_v4(), PaymentPhase::Balance, 10, Duration::hours(1));
        let token = signer().issue_payment_token(&claims);
        let later = Utc::now() + Duration::hours(2);
        assert_eq!(signer().verify_payment_token(&token, later), Err(TokenError::Expired));
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(signer().verify("no-dot-here"), Err(TokenError::Malformed));
        assert_eq!(signer().verify("!!!.???"), Err(TokenError::Malformed));
    }

    #[test]
    fn preference_token_is_not_a_payment_token() {
        let token = signer().issue_preference_token("Guest@Example.com");
        assert_eq!(signer().verify_preference_token(&token).unwrap(), "guest@example.com");
        assert_eq!(
            signer().verify_payment_token(&token, Utc::now()),
            Err(TokenError::Malformed)
        );
    }
}
