use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use once_cell::sync::Lazy;
use rand_core::{OsRng, RngCore};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{DbError, DbResult};
use crate::replication::EventKind;
use crate::server::handlers::AppState;
use crate::store::Role;

// Secret for end-user JWT signing - MUST be set via JWT_SECRET env var in
// production. Separate from the inter-node replication token.
static JWT_SECRET: Lazy<String> = Lazy::new(|| match std::env::var("JWT_SECRET") {
    Ok(secret) => {
        if secret.len() < 32 {
            tracing::warn!("JWT_SECRET is less than 32 characters - consider a longer secret");
        }
        secret
    }
    Err(_) => {
        // Random per-process secret for development; tokens die with the process
        let mut key_bytes = [0u8; 32];
        OsRng.fill_bytes(&mut key_bytes);
        tracing::warn!(
            "JWT_SECRET is not set - generated a random secret, tokens will be invalid after restart"
        );
        hex::encode(key_bytes)
    }
});

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    pub sub: String,
    pub role: Role,
    pub exp: usize,
}

pub struct AuthService;

impl AuthService {
    pub fn hash_password(password: &str) -> DbResult<String> {
        let salt = SaltString::generate(&mut OsRng);
        Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| DbError::InternalError(format!("Hashing error: {}", e)))
    }

    pub fn verify_password(password: &str, password_hash: &str) -> bool {
        match PasswordHash::new(password_hash) {
            Ok(parsed) => Argon2::default()
                .verify_password(password.as_bytes(), &parsed)
                .is_ok(),
            Err(_) => false,
        }
    }

    /// Create a JWT for an authenticated user.
    pub fn create_jwt(username: &str, role: Role, expires_minutes: u64) -> DbResult<String> {
        let expiration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| DbError::InternalError(e.to_string()))?
            .as_secs() as usize
            + (expires_minutes as usize) * 60;

        let claims = Claims {
            sub: username.to_owned(),
            role,
            exp: expiration,
        };

        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(JWT_SECRET.as_bytes()),
        )
        .map_err(|e| DbError::InternalError(format!("Token creation failed: {}", e)))
    }

    /// Validate a JWT and return its claims.
    pub fn validate_token(token: &str) -> DbResult<Claims> {
        let token_data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(JWT_SECRET.as_bytes()),
            &Validation::new(Algorithm::HS256),
        )
        .map_err(|_| DbError::Unauthorized("Invalid token".to_string()))?;

        Ok(token_data.claims)
    }
}

/// Constant-time comparison to prevent timing attacks
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b.iter()).fold(0, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Axum middleware for end-user authentication (Authorization: Bearer).
///
/// Validates the token and confirms the subject still exists locally, then
/// exposes the claims through request extensions.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, DbError> {
    let token = req
        .headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .ok_or_else(|| DbError::Unauthorized("Missing bearer token".to_string()))?;

    let claims = AuthService::validate_token(token)?;
    if state.inventory.get_user(&claims.sub)?.is_none() {
        return Err(DbError::Unauthorized("Unknown user".to_string()));
    }

    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}

/// Admin gate for user/product management.
pub fn require_admin(claims: &Claims) -> DbResult<()> {
    if claims.role != Role::Admin {
        return Err(DbError::Forbidden(
            "Operation restricted to administrators".to_string(),
        ));
    }
    Ok(())
}

/// Create the bootstrap admin account on first start. The resulting user
/// record replicates like any other mutation.
pub fn ensure_admin_user(state: &AppState) -> DbResult<()> {
    if state.inventory.get_user(&state.config.admin_user)?.is_some() {
        return Ok(());
    }

    let password_hash = AuthService::hash_password(&state.config.admin_password)?;
    let user = state.inventory.upsert_user(
        state.config.admin_user.clone(),
        password_hash,
        Role::Admin,
    )?;
    tracing::info!("Created bootstrap admin user '{}'", user.username);

    let event = state.events.record(
        EventKind::UserUpsert,
        &user.username,
        user.version,
        json!({ "user": &user }),
    );
    state.queues.broadcast(event);
    Ok(())
}
