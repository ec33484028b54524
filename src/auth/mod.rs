use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sqlx::{FromRow, PgPool};
use thiserror::Error;
use uuid::Uuid;

use crate::database::DatabaseError;
use crate::security::constant_time_eq;

pub const ADMIN_ROLE: &str = "admin";
const ISSUER: &str = "catering-storefront";

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    /// Admin user id
    pub sub: Uuid,
    pub email: String,
    pub role: String,
    pub exp: i64,
    pub iat: i64,
    pub iss: String,
}

impl Claims {
    pub fn new(sub: Uuid, email: String, role: String, expiry_hours: u64) -> Self {
        let now = Utc::now();
        let exp = (now + Duration::hours(expiry_hours as i64)).timestamp();

        Self {
            sub,
            email,
            role,
            exp,
            iat: now.timestamp(),
            iss: ISSUER.to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("JWT generation error: {0}")]
    TokenGeneration(String),
    #[error("invalid token: {0}")]
    InvalidToken(String),
    #[error("JWT secret is not configured")]
    InvalidSecret,
    #[error("malformed password hash")]
    MalformedHash,
    #[error(transparent)]
    Database(#[from] DatabaseError),
}

pub fn generate_jwt(claims: &Claims, secret: &str) -> Result<String, AuthError> {
    if secret.is_empty() {
        return Err(AuthError::InvalidSecret);
    }

    let encoding_key = EncodingKey::from_secret(secret.as_bytes());
    encode(&Header::default(), claims, &encoding_key).map_err(|e| AuthError::TokenGeneration(e.to_string()))
}

pub fn validate_jwt(token: &str, secret: &str) -> Result<Claims, AuthError> {
    if secret.is_empty() {
        return Err(AuthError::InvalidSecret);
    }

    let decoding_key = DecodingKey::from_secret(secret.as_bytes());
    let mut validation = Validation::default();
    validation.set_issuer(&[ISSUER]);

    decode::<Claims>(token, &decoding_key, &validation)
        .map(|data| data.claims)
        .map_err(|e| AuthError::InvalidToken(e.to_string()))
}

const HASH_SCHEME: &str = "sha256";
const HASH_ROUNDS: usize = 10_000;

fn stretch(salt: &str, password: &str) -> Vec<u8> {
    let mut digest = Sha256::digest(format!("{}:{}", salt, password).as_bytes()).to_vec();
    for _ in 0..HASH_ROUNDS {
        let mut hasher = Sha256::new();
        hasher.update(salt.as_bytes());
        hasher.update(&digest);
        digest = hasher.finalize().to_vec();
    }
    digest
}

/// Salted, iterated SHA-256 in the form `sha256$<salt>$<hex>`
pub fn hash_password(password: &str) -> String {
    let mut salt = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut salt);
    let salt = hex::encode(salt);
    format!("{}${}${}", HASH_SCHEME, salt, hex::encode(stretch(&salt, password)))
}

pub fn verify_password(password: &str, stored: &str) -> Result<bool, AuthError> {
    let mut parts = stored.splitn(3, '$');
    let (Some(scheme), Some(salt), Some(expected_hex)) = (parts.next(), parts.next(), parts.next()) else {
        return Err(AuthError::MalformedHash);
    };
    if scheme != HASH_SCHEME {
        return Err(AuthError::MalformedHash);
    }
    let expected = hex::decode(expected_hex).map_err(|_| AuthError::MalformedHash)?;
    Ok(constant_time_eq(&stretch(salt, password), &expected))
}

#[derive(Debug, Clone, FromRow)]
pub struct AdminUser {
    pub id: Uuid,
    pub email: String,
    pub password_hash: String,
}

/// Check admin credentials and mint a session JWT
pub async fn login(pool: &PgPool, email: &str, password: &str, secret: &str, expiry_hours: u64) -> Result<(String, AdminUser), AuthError> {
    let user = sqlx::query_as::<_, AdminUser>("SELECT id, email, password_hash FROM admin_users WHERE email = $1")
        .bind(email.trim().to_ascii_lowercase())
        .fetch_optional(pool)
        .await
        .map_err(DatabaseError::from)?;

    let Some(user) = user else {
        // Burn comparable time so unknown emails aren't distinguishable
        let _ = stretch("0000", password);
        return Err(AuthError::InvalidCredentials);
    };

    if !verify_password(password, &user.password_hash)? {
        return Err(AuthError::InvalidCredentials);
    }

    let claims = Claims::new(user.id, user.email.clone(), ADMIN_ROLE.to_string(), expiry_hours);
    let token = generate_jwt(&claims, secret)?;
    Ok((token, user))
}

/// Insert or replace an admin account
pub async fn upsert_admin(pool: &PgPool, email: &str, password: &str) -> Result<Uuid, AuthError> {
    let id: Uuid = sqlx::query_scalar(
        r#"
        INSERT INTO admin_users (id, email, password_hash)
        VALUES ($1, $2, $3)
        ON CONFLICT (email) DO UPDATE SET password_hash = EXCLUDED.password_hash
        RETURNING id
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(email.trim().to_ascii_lowercase())
    .bind(hash_password(password))
    .fetch_one(pool)
    .await
    .map_err(DatabaseError::from)?;
    Ok(id)
}
