use crate::domain::order::CancelRequest;
use crate::domain::payment::{SubjectKind, SubjectRef};
use crate::domain::service_order::{
    CreateServiceOrderRequest, ServiceOrder, UpdateServiceStatusRequest,
};
use crate::error::AppError;
use crate::middleware::auth::AuthUser;
use crate::utils::notifier::{self, NotificationPayload};
use axum::{
    extract::{Path, State},
    response::Json,
};
use serde_json::{json, Value};
use utoipa;

/// Create service order baru
#[utoipa::path(
    post,
    path = "/api/service-orders",
    tag = "Service Orders",
    summary = "Create service order",
    description = "Pesan jasa ke provider; ditolak kalau provider sedang penuh (backpressure)",
    request_body = CreateServiceOrderRequest,
    responses(
        (status = 200, description = "Service order created", body = serde_json::Value),
        (status = 400, description = "Provider penuh / input tidak valid"),
        (status = 401, description = "Unauthorized")
    ),
    security(("bearer_auth" = []))
)]
pub async fn create_service_order(
    auth: AuthUser,
    State(app_state): State<crate::config::AppState>,
    Json(request): Json<CreateServiceOrderRequest>,
) -> Result<Json<Value>, AppError> {
    let order = app_state
        .service_order_repository
        .create(
            auth.user_id,
            request.provider_id,
            &request.title,
            request.brief.as_deref(),
            request.amount_minor,
            &app_state.config.currency,
        )
        .await?;

    notifier::notify(
        app_state.http_client.clone(),
        app_state.config.notification_service_url.clone(),
        NotificationPayload {
            user_id: order.provider_id,
            event: "service_order_created".to_string(),
            title: "Order jasa baru".to_string(),
            body: format!("Order {} menunggu pembayaran buyer", order.order_ref),
        },
    );

    Ok(Json(json!({
        "success": true,
        "message": "Service order created successfully",
        "data": format_service_order_response(&order)
    })))
}

/// Get service order detail
#[utoipa::path(
    get,
    path = "/api/service-orders/{order_id}",
    tag = "Service Orders",
    summary = "Get service order detail",
    params(("order_id" = i32, Path, description = "Service order ID")),
    responses(
        (status = 200, description = "Service order detail", body = serde_json::Value),
        (status = 403, description = "Bukan order Anda"),
        (status = 404, description = "Order tidak ditemukan")
    ),
    security(("bearer_auth" = []))
)]
pub async fn get_service_order(
    auth: AuthUser,
    State(app_state): State<crate::config::AppState>,
    Path(order_id): Path<i32>,
) -> Result<Json<Value>, AppError> {
    let order = app_state
        .service_order_repository
        .find_by_id(order_id)
        .await?
        .ok_or_else(|| AppError::not_found("Service order tidak ditemukan"))?;

    if order.buyer_id != auth.user_id && order.provider_id != auth.user_id && auth.role != "admin" {
        return Err(AppError::forbidden("Bukan order Anda"));
    }

    Ok(Json(json!({
        "success": true,
        "data": format_service_order_response(&order)
    })))
}

/// Update status service order. Action menentukan siapa yang boleh:
/// accept/start/deliver/resume milik provider, approve milik buyer.
#[utoipa::path(
    post,
    path = "/api/service-orders/{order_id}/status",
    tag = "Service Orders",
    summary = "Update status service order",
    params(("order_id" = i32, Path, description = "Service order ID")),
    request_body = UpdateServiceStatusRequest,
    responses(
        (status = 200, description = "Status updated", body = serde_json::Value),
        (status = 400, description = "Transisi tidak diizinkan"),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Bukan pihak yang berwenang untuk action ini")
    ),
    security(("bearer_auth" = []))
)]
pub async fn update_service_order_status(
    auth: AuthUser,
    State(app_state): State<crate::config::AppState>,
    Path(order_id): Path<i32>,
    Json(request): Json<UpdateServiceStatusRequest>,
) -> Result<Json<Value>, AppError> {
    let repo = &app_state.service_order_repository;

    let order = match request.action.as_str() {
        "accept" => repo.accept(order_id, auth.user_id).await?,
        "start" => repo.start_work(order_id, auth.user_id).await?,
        "deliver" => {
            let order = repo.deliver(order_id, auth.user_id).await?;
            notifier::notify(
                app_state.http_client.clone(),
                app_state.config.notification_service_url.clone(),
                NotificationPayload {
                    user_id: order.buyer_id,
                    event: "service_order_delivered".to_string(),
                    title: "Hasil kerja dikirim".to_string(),
                    body: format!("Order {} menunggu review Anda", order.order_ref),
                },
            );
            order
        }
        "resume" => repo.resume_work(order_id, auth.user_id).await?,
        "approve" => {
            let order = repo.approve(order_id, auth.user_id).await?;
            notifier::notify(
                app_state.http_client.clone(),
                app_state.config.notification_service_url.clone(),
                NotificationPayload {
                    user_id: order.provider_id,
                    event: "service_order_completed".to_string(),
                    title: "Order jasa selesai".to_string(),
                    body: format!("Dana order {} sudah bisa ditarik", order.order_ref),
                },
            );
            order
        }
        other => {
            return Err(AppError::validation(format!(
                "Action '{}' tidak dikenal (accept/start/deliver/resume/approve)",
                other
            )))
        }
    };

    Ok(Json(json!({
        "success": true,
        "message": "Status updated successfully",
        "data": format_service_order_response(&order)
    })))
}

/// Buyer meminta revisi atas hasil delivery (counter terbatas)
#[utoipa::path(
    post,
    path = "/api/service-orders/{order_id}/revision",
    tag = "Service Orders",
    summary = "Request revisi",
    params(("order_id" = i32, Path, description = "Service order ID")),
    responses(
        (status = 200, description = "Revisi diminta", body = serde_json::Value),
        (status = 400, description = "Jatah revisi habis / status tidak delivered"),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Bukan order Anda")
    ),
    security(("bearer_auth" = []))
)]
pub async fn request_revision(
    auth: AuthUser,
    State(app_state): State<crate::config::AppState>,
    Path(order_id): Path<i32>,
) -> Result<Json<Value>, AppError> {
    let order = app_state
        .service_order_repository
        .request_revision(order_id, auth.user_id)
        .await?;

    notifier::notify(
        app_state.http_client.clone(),
        app_state.config.notification_service_url.clone(),
        NotificationPayload {
            user_id: order.provider_id,
            event: "revision_requested".to_string(),
            title: "Revisi diminta".to_string(),
            body: format!(
                "Buyer meminta revisi untuk {} (sisa {} revisi)",
                order.order_ref, order.revisions_remaining
            ),
        },
    );

    Ok(Json(json!({
        "success": true,
        "message": "Revisi diminta",
        "data": format_service_order_response(&order)
    })))
}

/// Buyer membatalkan service order. Order yang belum dibayar dibatalkan
/// langsung; order yang sudah dibayar (pending/accepted) lewat jalur
/// refund: payment direfund dan dana provider ditarik kembali.
#[utoipa::path(
    post,
    path = "/api/service-orders/{order_id}/cancel",
    tag = "Service Orders",
    summary = "Cancel service order",
    params(("order_id" = i32, Path, description = "Service order ID")),
    request_body = CancelRequest,
    responses(
        (status = 200, description = "Order cancelled", body = serde_json::Value),
        (status = 400, description = "Order sudah dikerjakan, tidak bisa dibatalkan"),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Bukan order Anda")
    ),
    security(("bearer_auth" = []))
)]
pub async fn cancel_service_order(
    auth: AuthUser,
    State(app_state): State<crate::config::AppState>,
    Path(order_id): Path<i32>,
    Json(request): Json<CancelRequest>,
) -> Result<Json<Value>, AppError> {
    if request.reason.trim().is_empty() {
        return Err(AppError::validation("Alasan pembatalan wajib diisi"));
    }

    let order = app_state
        .service_order_repository
        .find_by_id(order_id)
        .await?
        .ok_or_else(|| AppError::not_found("Service order tidak ditemukan"))?;

    if order.buyer_id != auth.user_id {
        return Err(AppError::forbidden("Bukan order milik Anda"));
    }

    let subject = SubjectRef {
        kind: SubjectKind::ServiceOrder,
        id: order_id,
    };

    if order.is_paid() {
        // Cancel setelah pembayaran = jalur refund eksplisit
        app_state
            .payment_repository
            .refund_for_subject(subject, &request.reason)
            .await?;
    } else {
        app_state
            .service_order_repository
            .cancel_unpaid(order_id, auth.user_id, &request.reason)
            .await?;
        // Settle failed payment yang mungkin masih menggantung
        app_state
            .payment_repository
            .fail_active_for_subject(subject)
            .await?;
    }

    let order = app_state
        .service_order_repository
        .find_by_id(order_id)
        .await?
        .ok_or_else(|| AppError::not_found("Service order tidak ditemukan"))?;

    Ok(Json(json!({
        "success": true,
        "message": "Service order cancelled successfully",
        "data": format_service_order_response(&order)
    })))
}

// Format service order response untuk API
fn format_service_order_response(order: &ServiceOrder) -> Value {
    json!({
        "id": order.id,
        "order_ref": order.order_ref,
        "buyer_id": order.buyer_id,
        "provider_id": order.provider_id,
        "title": order.title,
        "brief": order.brief,
        "amount_minor": order.amount_minor,
        "currency": order.currency,
        "status": order.status,
        "revisions_remaining": order.revisions_remaining,
        "delivery_due_at": order.delivery_due_at,
        "cancel_reason": order.cancel_reason,
        "created_at": order.created_at,
        "paid_at": order.paid_at,
        "accepted_at": order.accepted_at,
        "delivered_at": order.delivered_at,
        "completed_at": order.completed_at,
        "cancelled_at": order.cancelled_at,
        "refunded_at": order.refunded_at,
        "updated_at": order.updated_at
    })
}
