//! JWT claims and token handling.

use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::config;

#[derive(Debug, Error)]
pub enum JwtError {
    #[error("Token encoding failed: {0}")]
    Encoding(#[from] jsonwebtoken::errors::Error),
}

/// Claims carried by every API token. `tenant` and `roles` drive the
/// authorization scoper; `sub` is the caller's user id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub tenant: String,
    pub roles: Vec<String>,
    pub exp: i64,
    pub iat: i64,
}

impl Claims {
    pub fn new(user_id: Uuid, tenant: impl Into<String>, roles: Vec<String>) -> Self {
        let now = chrono::Utc::now().timestamp();
        let expiry_hours = config::CONFIG.security.jwt_expiry_hours as i64;
        Self {
            sub: user_id,
            tenant: tenant.into(),
            roles,
            iat: now,
            exp: now + expiry_hours * 3600,
        }
    }
}

pub fn generate_jwt(claims: &Claims) -> Result<String, JwtError> {
    let secret = config::CONFIG.security.jwt_secret.as_bytes();
    let token = encode(&Header::default(), claims, &EncodingKey::from_secret(secret))?;
    Ok(token)
}

pub fn verify_jwt(token: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
    let secret = config::CONFIG.security.jwt_secret.as_bytes();
    let validation = Validation::new(Algorithm::HS256);
    let data = decode::<Claims>(token, &DecodingKey::from_secret(secret), &validation)?;
    Ok(data.claims)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_preserves_claims() {
        let user_id = Uuid::new_v4();
        let claims = Claims::new(user_id, "tenant_a", vec!["admin".to_string()]);
        let token = generate_jwt(&claims).unwrap();
        let decoded = verify_jwt(&token).unwrap();
        assert_eq!(decoded.sub, user_id);
        assert_eq!(decoded.tenant, "tenant_a");
        assert_eq!(decoded.roles, vec!["admin"]);
    }

    #[test]
    fn tampered_token_is_rejected() {
        let claims = Claims::new(Uuid::new_v4(), "tenant_a", vec!["admin".to_string()]);
        let mut token = generate_jwt(&claims).unwrap();
        token.push('x');
        assert!(verify_jwt(&token).is_err());
    }
}
