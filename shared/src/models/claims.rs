use serde::{Deserialize, Serialize};

/// Model JWT claims yang digunakan di seluruh sistem untuk authentication
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TokenClaims {
    pub sub: i32,
    pub email: String,
    pub role: String,
    pub exp: i64,
    pub iat: i64,
    pub token_type: String,
    pub jti: String,
}

impl TokenClaims {
    /// Cek apakah token adalah access token
    pub fn is_access_token(&self) -> bool {
        self.token_type == "access"
    }

    /// Cek apakah token adalah refresh token
    pub fn is_refresh_token(&self) -> bool {
        self.token_type == "refresh"
    }

    /// Cek apakah user punya role admin platform
    pub fn is_admin(&self) -> bool {
        self.role == "admin"
    }

    /// Seller produk, provider jasa, dan author konten semuanya punya earnings
    pub fn is_earner(&self) -> bool {
        matches!(self.role.as_str(), "seller" | "provider" | "author")
    }

    /// Cek apakah token sudah expired berdasarkan current time
    pub fn is_expired(&self) -> bool {
        let now = chrono::Utc::now().timestamp();
        self.exp <= now
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_claims(role: &str) -> TokenClaims {
        let now = chrono::Utc::now().timestamp();
        TokenClaims {
            sub: 42,
            email: "test@karyaloka.id".to_string(),
            role: role.to_string(),
            exp: now + 900,
            iat: now,
            token_type: "access".to_string(),
            jti: "unique-jti-42".to_string(),
        }
    }

    #[test]
    fn test_is_access_token() {
        let claims = create_test_claims("buyer");
        assert!(claims.is_access_token());
        assert!(!claims.is_refresh_token());
    }

    #[test]
    fn test_is_admin() {
        let claims = create_test_claims("admin");
        assert!(claims.is_admin());
        assert!(!claims.is_earner());
    }

    #[test]
    fn test_earner_roles() {
        assert!(create_test_claims("seller").is_earner());
        assert!(create_test_claims("provider").is_earner());
        assert!(create_test_claims("author").is_earner());
        assert!(!create_test_claims("buyer").is_earner());
    }

    #[test]
    fn test_is_expired() {
        let mut claims = create_test_claims("buyer");
        assert!(!claims.is_expired());
        claims.exp = chrono::Utc::now().timestamp() - 1;
        assert!(claims.is_expired());
    }
}
