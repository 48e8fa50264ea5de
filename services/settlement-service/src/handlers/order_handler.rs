use crate::domain::order::{CancelRequest, CreateOrderRequest, Order};
use crate::domain::payment::{SubjectKind, SubjectRef};
use crate::error::AppError;
use crate::middleware::auth::AuthUser;
use crate::utils::notifier::{self, NotificationPayload};
use axum::{
    extract::{Path, State},
    response::Json,
};
use serde_json::{json, Value};
use utoipa;

/// Create product order baru
#[utoipa::path(
    post,
    path = "/api/orders",
    tag = "Orders",
    summary = "Create order",
    description = "Buat order produk baru; stock direserve atomik",
    request_body = CreateOrderRequest,
    responses(
        (status = 200, description = "Order created", body = serde_json::Value),
        (status = 400, description = "Stok tidak mencukupi / input tidak valid"),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Produk tidak ditemukan")
    ),
    security(("bearer_auth" = []))
)]
pub async fn create_order(
    auth: AuthUser,
    State(app_state): State<crate::config::AppState>,
    Json(request): Json<CreateOrderRequest>,
) -> Result<Json<Value>, AppError> {
    let order = app_state
        .order_repository
        .create(auth.user_id, request.product_id, request.quantity)
        .await?;

    Ok(Json(json!({
        "success": true,
        "message": "Order created successfully",
        "data": format_order_response(&order)
    })))
}

/// Get order detail
#[utoipa::path(
    get,
    path = "/api/orders/{order_id}",
    tag = "Orders",
    summary = "Get order detail",
    params(("order_id" = i32, Path, description = "Order ID")),
    responses(
        (status = 200, description = "Order detail", body = serde_json::Value),
        (status = 403, description = "Bukan order Anda"),
        (status = 404, description = "Order tidak ditemukan")
    ),
    security(("bearer_auth" = []))
)]
pub async fn get_order(
    auth: AuthUser,
    State(app_state): State<crate::config::AppState>,
    Path(order_id): Path<i32>,
) -> Result<Json<Value>, AppError> {
    let order = app_state
        .order_repository
        .find_by_id(order_id)
        .await?
        .ok_or_else(|| AppError::not_found("Order tidak ditemukan"))?;

    if order.buyer_id != auth.user_id && order.seller_id != auth.user_id && auth.role != "admin" {
        return Err(AppError::forbidden("Bukan order Anda"));
    }

    Ok(Json(json!({
        "success": true,
        "data": format_order_response(&order)
    })))
}

/// Buyer konfirmasi barang diterima: order selesai dan dana seller
/// pindah dari pending ke available
#[utoipa::path(
    post,
    path = "/api/orders/{order_id}/received",
    tag = "Orders",
    summary = "Konfirmasi barang diterima",
    params(("order_id" = i32, Path, description = "Order ID")),
    responses(
        (status = 200, description = "Order completed", body = serde_json::Value),
        (status = 400, description = "Order tidak dalam status processing"),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Bukan order Anda")
    ),
    security(("bearer_auth" = []))
)]
pub async fn mark_received(
    auth: AuthUser,
    State(app_state): State<crate::config::AppState>,
    Path(order_id): Path<i32>,
) -> Result<Json<Value>, AppError> {
    let order = app_state
        .order_repository
        .mark_received(order_id, auth.user_id)
        .await?;

    notifier::notify(
        app_state.http_client.clone(),
        app_state.config.notification_service_url.clone(),
        NotificationPayload {
            user_id: order.seller_id,
            event: "order_completed".to_string(),
            title: "Order selesai".to_string(),
            body: format!("Dana order {} sudah bisa ditarik", order.order_ref),
        },
    );

    Ok(Json(json!({
        "success": true,
        "message": "Order completed, dana seller direlease",
        "data": format_order_response(&order)
    })))
}

/// Buyer membatalkan order yang belum dibayar (stock dikembalikan)
#[utoipa::path(
    post,
    path = "/api/orders/{order_id}/cancel",
    tag = "Orders",
    summary = "Cancel order",
    params(("order_id" = i32, Path, description = "Order ID")),
    request_body = CancelRequest,
    responses(
        (status = 200, description = "Order cancelled", body = serde_json::Value),
        (status = 400, description = "Order sudah tidak bisa dibatalkan"),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Bukan order Anda")
    ),
    security(("bearer_auth" = []))
)]
pub async fn cancel_order(
    auth: AuthUser,
    State(app_state): State<crate::config::AppState>,
    Path(order_id): Path<i32>,
    Json(request): Json<CancelRequest>,
) -> Result<Json<Value>, AppError> {
    if request.reason.trim().is_empty() {
        return Err(AppError::validation("Alasan pembatalan wajib diisi"));
    }

    let order = app_state
        .order_repository
        .cancel(order_id, auth.user_id, &request.reason)
        .await?;

    // Payment aktif (kalau ada) di-settle failed supaya gateway event
    // yang datang belakangan dibuang sebagai stale
    let subject = SubjectRef {
        kind: SubjectKind::Order,
        id: order_id,
    };
    if let Some(payment) = app_state
        .payment_repository
        .fail_active_for_subject(subject)
        .await?
    {
        tracing::info!(
            "Payment {} ikut dibatalkan bersama order {}",
            payment.payment_ref,
            order.order_ref
        );
    }

    Ok(Json(json!({
        "success": true,
        "message": "Order cancelled successfully",
        "data": format_order_response(&order)
    })))
}

// Format order response untuk API
fn format_order_response(order: &Order) -> Value {
    json!({
        "id": order.id,
        "order_ref": order.order_ref,
        "buyer_id": order.buyer_id,
        "seller_id": order.seller_id,
        "product_id": order.product_id,
        "quantity": order.quantity,
        "amount_minor": order.amount_minor,
        "currency": order.currency,
        "status": order.status,
        "cancel_reason": order.cancel_reason,
        "created_at": order.created_at,
        "paid_at": order.paid_at,
        "completed_at": order.completed_at,
        "cancelled_at": order.cancelled_at,
        "refunded_at": order.refunded_at,
        "updated_at": order.updated_at
    })
}
