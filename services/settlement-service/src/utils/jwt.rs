// JWT validation dengan database untuk Settlement Service

use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use shared::TokenClaims;
use sqlx::PgPool;
use std::env;
use thiserror::Error;

// Error types untuk JWT validation
#[derive(Debug, Error)]
pub enum JwtError {
    #[error("Token invalid atau expired")]
    InvalidToken,
    #[error("JWT secret tidak ditemukan")]
    MissingSecret,
    #[error("Token type tidak valid untuk endpoint ini")]
    InvalidTokenType,
    #[error("Token sudah di-blacklist")]
    TokenBlacklisted,
    #[error("Database error saat validasi blacklist")]
    DatabaseError,
}

// Decode JWT token dan validasi signature
fn decode_jwt_token(token: &str) -> Result<TokenClaims, JwtError> {
    let secret = env::var("JWT_SECRET").map_err(|_| JwtError::MissingSecret)?;

    // Production safety check
    if !cfg!(debug_assertions) && secret.contains("change-this") {
        return Err(JwtError::MissingSecret);
    }

    let validation = Validation::new(Algorithm::HS256);
    let token_data = decode::<TokenClaims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .map_err(|_| JwtError::InvalidToken)?;

    // Business services hanya terima access token
    if !token_data.claims.is_access_token() {
        return Err(JwtError::InvalidTokenType);
    }

    Ok(token_data.claims)
}

// Cek apakah token sudah di-blacklist
async fn check_jwt_blacklist(pool: &PgPool, claims: &TokenClaims) -> Result<(), JwtError> {
    let is_blacklisted: bool = sqlx::query_scalar::<_, Option<bool>>(
        "SELECT is_token_blacklisted($1, $2)",
    )
    .bind(&claims.jti)
    .bind(&claims.token_type)
    .fetch_one(pool)
    .await
    .map_err(|_| JwtError::DatabaseError)?
    .unwrap_or(true);

    if is_blacklisted {
        return Err(JwtError::TokenBlacklisted);
    }

    Ok(())
}

// Main validation function dengan database trust boundary
pub async fn validate_token(token: &str, pool: &PgPool) -> Result<TokenClaims, JwtError> {
    // Decode dan validasi signature
    let claims = decode_jwt_token(token)?;

    // Cek blacklist
    check_jwt_blacklist(pool, &claims).await?;

    Ok(claims)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use jsonwebtoken::{encode, EncodingKey, Header};

    fn create_test_token(user_id: i32, role: &str, token_type: &str) -> String {
        let now = Utc::now();
        let claims = TokenClaims {
            sub: user_id,
            email: "test@karyaloka.id".to_string(),
            role: role.to_string(),
            exp: (now + Duration::minutes(15)).timestamp(),
            iat: now.timestamp(),
            token_type: token_type.to_string(),
            jti: "test-jti-42".to_string(),
        };

        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret("test-secret-key-for-testing-only".as_ref()),
        )
        .unwrap()
    }

    // Satu test fn supaya manipulasi JWT_SECRET tidak balapan antar test
    #[test]
    fn test_token_validation() {
        std::env::set_var("JWT_SECRET", "test-secret-key-for-testing-only");

        // Access token valid
        let token = create_test_token(42, "buyer", "access");
        let claims = decode_jwt_token(&token).unwrap();
        assert_eq!(claims.sub, 42);
        assert_eq!(claims.role, "buyer");

        // Refresh token ditolak di business service
        let token = create_test_token(42, "buyer", "refresh");
        assert!(matches!(
            decode_jwt_token(&token).unwrap_err(),
            JwtError::InvalidTokenType
        ));

        // Format token rusak ditolak
        assert!(matches!(
            decode_jwt_token("invalid.token.here").unwrap_err(),
            JwtError::InvalidToken
        ));
    }
}
