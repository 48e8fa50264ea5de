// JWT-Only Authentication Middleware untuk Settlement Service

use crate::{config::AppState, error::AppError, utils::jwt};
use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};

// Authentication context untuk user yang sudah terautentikasi
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: i32,
    pub email: String,
    pub role: String,
}

// Axum extractor implementation untuk AuthUser
impl<S> axum::extract::FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut axum::http::request::Parts,
        _state: &S,
    ) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthUser>()
            .cloned()
            .ok_or_else(|| AppError::unauthorized("Authentication required"))
    }
}

// Extractor untuk earner (seller produk / provider jasa / author konten):
// pemilik saldo ledger yang boleh akses balance & withdrawal
#[derive(Debug, Clone)]
pub struct AuthEarner {
    pub user_id: i32,
    pub email: String,
    pub role: String,
}

impl<S> axum::extract::FromRequestParts<S> for AuthEarner
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut axum::http::request::Parts,
        _state: &S,
    ) -> Result<Self, Self::Rejection> {
        let auth = parts
            .extensions
            .get::<AuthUser>()
            .cloned()
            .ok_or_else(|| AppError::unauthorized("Authentication required"))?;

        if !matches!(auth.role.as_str(), "seller" | "provider" | "author") {
            return Err(AppError::forbidden(
                "Endpoint ini hanya untuk seller/provider/author",
            ));
        }

        Ok(AuthEarner {
            user_id: auth.user_id,
            email: auth.email,
            role: auth.role,
        })
    }
}

// Extractor untuk admin platform
#[derive(Debug, Clone)]
pub struct AuthAdmin {
    pub user_id: i32,
    pub email: String,
}

impl<S> axum::extract::FromRequestParts<S> for AuthAdmin
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut axum::http::request::Parts,
        _state: &S,
    ) -> Result<Self, Self::Rejection> {
        let auth = parts
            .extensions
            .get::<AuthUser>()
            .cloned()
            .ok_or_else(|| AppError::unauthorized("Authentication required"))?;

        if auth.role != "admin" {
            return Err(AppError::forbidden("Endpoint ini hanya untuk admin"));
        }

        Ok(AuthAdmin {
            user_id: auth.user_id,
            email: auth.email,
        })
    }
}

// Extract Bearer token dari Authorization header
fn extract_jwt_token(headers: &HeaderMap) -> Result<String, AppError> {
    let auth_header = headers
        .get("authorization")
        .ok_or_else(|| AppError::unauthorized("Authorization header dengan Bearer token diperlukan"))?
        .to_str()
        .map_err(|_| AppError::unauthorized("Invalid Authorization header format"))?;

    if !auth_header.starts_with("Bearer ") {
        return Err(AppError::unauthorized("Bearer token format diperlukan"));
    }

    Ok(auth_header[7..].to_string())
}

// JWT authentication middleware dengan blacklist validation
pub async fn jwt_auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    // Skip authentication untuk health check dan webhook gateway
    // (webhook diautentikasi lewat signature, bukan JWT)
    let path = request.uri().path().to_string();
    if path == "/health" || path == "/info" || path.contains("webhooks") {
        return Ok(next.run(request).await);
    }

    // Extract JWT token dari Authorization header
    let token = extract_jwt_token(request.headers())?;

    // Validasi JWT dengan database trust boundary
    let claims = jwt::validate_token(&token, &state.db)
        .await
        .map_err(|_| AppError::unauthorized("Token tidak valid, expired, atau sudah di-blacklist"))?;

    // Prepare user context untuk handlers
    let auth_user = AuthUser {
        user_id: claims.sub,
        email: claims.email.clone(),
        role: claims.role.clone(),
    };

    // Inject ke request extensions agar bisa di-extract oleh handlers
    request.extensions_mut().insert(auth_user.clone());

    tracing::debug!(
        "User authenticated - ID: {}, Role: {}, Endpoint: {}",
        auth_user.user_id,
        auth_user.role,
        path
    );

    Ok(next.run(request).await)
}
