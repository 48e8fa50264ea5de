use crate::domain::content::{ContentPurchase, PurchaseContentRequest};
use crate::error::AppError;
use crate::middleware::auth::AuthUser;
use axum::{
    extract::{Path, State},
    response::Json,
};
use serde_json::{json, Value};
use utoipa;

/// Beli lisensi konten digital. Konten gratis langsung aktif;
/// konten berbayar menunggu settlement payment.
#[utoipa::path(
    post,
    path = "/api/content/purchases",
    tag = "Content",
    summary = "Purchase content license",
    request_body = PurchaseContentRequest,
    responses(
        (status = 200, description = "Purchase created", body = serde_json::Value),
        (status = 400, description = "Sudah punya lisensi aktif / input tidak valid"),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Konten tidak ditemukan")
    ),
    security(("bearer_auth" = []))
)]
pub async fn purchase_content(
    auth: AuthUser,
    State(app_state): State<crate::config::AppState>,
    Json(request): Json<PurchaseContentRequest>,
) -> Result<Json<Value>, AppError> {
    let purchase = app_state
        .content_repository
        .create_purchase(auth.user_id, request.content_id)
        .await?;

    let message = if purchase.is_free() {
        "Konten gratis, lisensi langsung aktif"
    } else {
        "Purchase dibuat, lanjutkan ke pembayaran"
    };

    Ok(Json(json!({
        "success": true,
        "message": message,
        "data": format_purchase_response(&purchase)
    })))
}

/// Get detail lisensi
#[utoipa::path(
    get,
    path = "/api/content/purchases/{purchase_id}",
    tag = "Content",
    summary = "Get purchase detail",
    params(("purchase_id" = i32, Path, description = "Purchase ID")),
    responses(
        (status = 200, description = "Purchase detail", body = serde_json::Value),
        (status = 403, description = "Bukan lisensi Anda"),
        (status = 404, description = "Lisensi tidak ditemukan")
    ),
    security(("bearer_auth" = []))
)]
pub async fn get_purchase(
    auth: AuthUser,
    State(app_state): State<crate::config::AppState>,
    Path(purchase_id): Path<i32>,
) -> Result<Json<Value>, AppError> {
    let purchase = app_state
        .content_repository
        .find_by_id(purchase_id)
        .await?
        .ok_or_else(|| AppError::not_found("Lisensi tidak ditemukan"))?;

    if purchase.buyer_id != auth.user_id && purchase.author_id != auth.user_id && auth.role != "admin"
    {
        return Err(AppError::forbidden("Bukan lisensi Anda"));
    }

    Ok(Json(json!({
        "success": true,
        "data": format_purchase_response(&purchase)
    })))
}

/// Catat satu download: cek access window + kuota, decrement atomik
#[utoipa::path(
    post,
    path = "/api/content/purchases/{purchase_id}/download",
    tag = "Content",
    summary = "Record download",
    params(("purchase_id" = i32, Path, description = "Purchase ID")),
    responses(
        (status = 200, description = "Download diizinkan", body = serde_json::Value),
        (status = 400, description = "Akses berakhir / kuota habis"),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Bukan lisensi Anda")
    ),
    security(("bearer_auth" = []))
)]
pub async fn record_download(
    auth: AuthUser,
    State(app_state): State<crate::config::AppState>,
    Path(purchase_id): Path<i32>,
) -> Result<Json<Value>, AppError> {
    let purchase = app_state
        .content_repository
        .record_download(purchase_id, auth.user_id)
        .await?;

    tracing::info!(
        "Download dicatat untuk {} (sisa kuota: {:?})",
        purchase.purchase_ref,
        purchase.downloads_remaining
    );

    Ok(Json(json!({
        "success": true,
        "message": "Download diizinkan",
        "data": {
            "purchase_ref": purchase.purchase_ref,
            "content_id": purchase.content_id,
            "downloads_remaining": purchase.downloads_remaining,
            "expires_at": purchase.expires_at
        }
    })))
}

/// Buyer membatalkan purchase yang belum dibayar
#[utoipa::path(
    post,
    path = "/api/content/purchases/{purchase_id}/cancel",
    tag = "Content",
    summary = "Cancel purchase",
    params(("purchase_id" = i32, Path, description = "Purchase ID")),
    responses(
        (status = 200, description = "Purchase cancelled", body = serde_json::Value),
        (status = 400, description = "Lisensi sudah aktif / terminal"),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Bukan lisensi Anda")
    ),
    security(("bearer_auth" = []))
)]
pub async fn cancel_purchase(
    auth: AuthUser,
    State(app_state): State<crate::config::AppState>,
    Path(purchase_id): Path<i32>,
) -> Result<Json<Value>, AppError> {
    let purchase = app_state
        .content_repository
        .cancel(purchase_id, auth.user_id)
        .await?;

    let subject = crate::domain::payment::SubjectRef {
        kind: crate::domain::payment::SubjectKind::ContentPurchase,
        id: purchase_id,
    };
    app_state
        .payment_repository
        .fail_active_for_subject(subject)
        .await?;

    Ok(Json(json!({
        "success": true,
        "message": "Purchase cancelled successfully",
        "data": format_purchase_response(&purchase)
    })))
}

// Format purchase response untuk API
fn format_purchase_response(purchase: &ContentPurchase) -> Value {
    json!({
        "id": purchase.id,
        "purchase_ref": purchase.purchase_ref,
        "buyer_id": purchase.buyer_id,
        "author_id": purchase.author_id,
        "content_id": purchase.content_id,
        "price_minor": purchase.price_minor,
        "currency": purchase.currency,
        "status": purchase.status,
        "access_type": purchase.access_type,
        "expires_at": purchase.expires_at,
        "downloads_remaining": purchase.downloads_remaining,
        "created_at": purchase.created_at,
        "activated_at": purchase.activated_at,
        "refunded_at": purchase.refunded_at,
        "updated_at": purchase.updated_at
    })
}
