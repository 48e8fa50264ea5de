use crate::domain::payment::{
    AdminVerifyRequest, CreatePaymentRequest, Payment, PaymentMethod, PaymentStatus,
    RefundRequest, SettleOutcome, SubjectKind, SubjectRef, SubmitProofRequest, WebhookResponse,
};
use crate::error::AppError;
use crate::handlers::gateway_service::{
    charge_with_retry, GatewayChargeRequest, NusaPayService, CHARGE_RETRY_BUDGET,
};
use crate::middleware::auth::{AuthAdmin, AuthUser};
use crate::repositories::payment_repo::ReconcileOutcome;
use crate::utils::notifier::{self, NotificationPayload};
use axum::{
    extract::{Path, State},
    http::HeaderMap,
    response::Json,
};
use chrono::Utc;
use serde_json::{json, Value};
use utoipa;

/// Create payment untuk order/service order/content purchase
#[utoipa::path(
    post,
    path = "/api/payments",
    tag = "Payments",
    summary = "Create payment",
    description = "Buat payment untuk transaksi yang masih pending dan route ke NusaPay",
    request_body = CreatePaymentRequest,
    responses(
        (status = 200, description = "Payment created", body = serde_json::Value),
        (status = 400, description = "Subject tidak payable / input tidak valid"),
        (status = 401, description = "Unauthorized"),
        (status = 502, description = "Payment gateway unavailable")
    ),
    security(("bearer_auth" = []))
)]
pub async fn create_payment(
    auth: AuthUser,
    State(app_state): State<crate::config::AppState>,
    Json(request): Json<CreatePaymentRequest>,
) -> Result<Json<Value>, AppError> {
    let kind = SubjectKind::from_str(&request.subject_type)
        .ok_or_else(|| AppError::validation("subject_type harus order/service_order/content_purchase"))?;
    let method = PaymentMethod::from_str(&request.method)
        .ok_or_else(|| AppError::validation("Metode pembayaran tidak dikenal"))?;
    let subject = SubjectRef {
        kind,
        id: request.subject_id,
    };

    let payment = app_state
        .payment_repository
        .create(auth.user_id, subject, method)
        .await?;

    if !method.uses_gateway() {
        // Manual proof: tidak ada round-trip gateway, buyer upload bukti
        return Ok(Json(json!({
            "success": true,
            "message": "Payment dibuat, menunggu bukti transfer",
            "data": {
                "payment_id": payment.id,
                "payment_ref": payment.payment_ref,
                "amount_minor": payment.amount_minor,
                "currency": payment.currency,
                "method": payment.method,
                "status": payment.status,
                "instructions": "Transfer manual ke rekening platform lalu upload bukti pembayaran.",
                "expired_at": payment.expired_at
            }
        })));
    }

    let gateway = NusaPayService::new(
        app_state.config.nusapay_server_key.clone(),
        app_state.config.nusapay_api_url.clone(),
    );

    let charge_request = GatewayChargeRequest {
        payment_ref: payment.payment_ref.clone(),
        amount_minor: payment.amount_minor,
        currency: payment.currency.clone(),
        channel: NusaPayService::channel_for(method).to_string(),
        customer_email: auth.email.clone(),
    };

    let charge_response =
        match charge_with_retry(&gateway, &charge_request, CHARGE_RETRY_BUDGET).await {
            Ok(response) => response,
            Err(e) => {
                // Budget habis atau gateway menolak: payment jadi failed,
                // tidak pernah menggantung di processing. Buyer bisa buat
                // payment baru.
                tracing::error!(
                    "Charge gagal untuk {}: {} — settle failed",
                    payment.payment_ref,
                    e
                );
                app_state
                    .payment_repository
                    .settle(payment.id, SettleOutcome::Failure, None)
                    .await?;
                return Err(e);
            }
        };

    let payment = app_state
        .payment_repository
        .begin_processing(payment.id, &charge_response.transaction_id)
        .await?;

    let instructions = gateway.payment_instructions(method, &charge_response);

    tracing::info!(
        "Payment {} diproses via NusaPay (txn {})",
        payment.payment_ref,
        charge_response.transaction_id
    );

    Ok(Json(json!({
        "success": true,
        "message": "Payment created successfully",
        "data": {
            "payment_id": payment.id,
            "payment_ref": payment.payment_ref,
            "transaction_id": charge_response.transaction_id,
            "amount_minor": payment.amount_minor,
            "currency": payment.currency,
            "method": payment.method,
            "status": payment.status,
            "va_number": charge_response.va_number,
            "redirect_url": charge_response.redirect_url,
            "instructions": instructions,
            "expired_at": payment.expired_at
        }
    })))
}

/// Upload bukti transfer untuk metode manual_proof
#[utoipa::path(
    post,
    path = "/api/payments/{payment_ref}/proof",
    tag = "Payments",
    summary = "Submit bukti transfer manual",
    params(("payment_ref" = String, Path, description = "Payment reference")),
    request_body = SubmitProofRequest,
    responses(
        (status = 200, description = "Bukti diterima, menunggu verifikasi admin", body = serde_json::Value),
        (status = 400, description = "Bukan metode manual / status tidak valid"),
        (status = 401, description = "Unauthorized")
    ),
    security(("bearer_auth" = []))
)]
pub async fn submit_proof(
    auth: AuthUser,
    State(app_state): State<crate::config::AppState>,
    Path(payment_ref): Path<String>,
    Json(request): Json<SubmitProofRequest>,
) -> Result<Json<Value>, AppError> {
    if request.proof_url.trim().is_empty() {
        return Err(AppError::validation("proof_url wajib diisi"));
    }

    let payment = app_state
        .payment_repository
        .find_by_ref(&payment_ref)
        .await?
        .ok_or_else(|| AppError::not_found("Payment tidak ditemukan"))?;

    let payment = app_state
        .payment_repository
        .submit_proof(payment.id, auth.user_id, &request.proof_url)
        .await?;

    tracing::info!("Bukti transfer diupload untuk {}", payment.payment_ref);

    Ok(Json(json!({
        "success": true,
        "message": "Bukti transfer diterima, menunggu verifikasi admin",
        "data": {
            "payment_ref": payment.payment_ref,
            "status": payment.status
        }
    })))
}

/// Admin memverifikasi bukti transfer manual
#[utoipa::path(
    post,
    path = "/api/admin/payments/{payment_id}/verify",
    tag = "Payments",
    summary = "Verifikasi bukti transfer (admin)",
    params(("payment_id" = i32, Path, description = "Payment database ID")),
    request_body = AdminVerifyRequest,
    responses(
        (status = 200, description = "Keputusan verifikasi diterapkan", body = serde_json::Value),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Bukan admin"),
        (status = 409, description = "Payment sudah terminal")
    ),
    security(("bearer_auth" = []))
)]
pub async fn admin_verify_payment(
    admin: AuthAdmin,
    State(app_state): State<crate::config::AppState>,
    Path(payment_id): Path<i32>,
    Json(request): Json<AdminVerifyRequest>,
) -> Result<Json<Value>, AppError> {
    let payment = app_state
        .payment_repository
        .find_by_id(payment_id)
        .await?
        .ok_or_else(|| AppError::not_found("Payment tidak ditemukan"))?;

    if payment.status.is_terminal() {
        return Err(AppError::already_processed(format!(
            "Payment sudah {}",
            payment.status
        )));
    }
    if payment.status != PaymentStatus::PendingVerification {
        return Err(AppError::invalid_transition(
            payment.status.as_str(),
            "admin_verify",
        ));
    }

    let outcome = if request.approve {
        SettleOutcome::Success
    } else {
        SettleOutcome::Failure
    };

    let (payment, applied) = app_state
        .payment_repository
        .settle(payment_id, outcome, None)
        .await?;

    if !applied {
        return Err(AppError::already_processed(format!(
            "Payment sudah {}",
            payment.status
        )));
    }

    tracing::info!(
        "Admin {} memverifikasi {} -> {} ({})",
        admin.user_id,
        payment.payment_ref,
        payment.status,
        request.notes.as_deref().unwrap_or("-")
    );

    notify_payment_result(&app_state, &payment);

    Ok(Json(json!({
        "success": true,
        "message": "Keputusan verifikasi diterapkan",
        "data": {
            "payment_ref": payment.payment_ref,
            "status": payment.status
        }
    })))
}

/// Get payment details by payment ref
#[utoipa::path(
    get,
    path = "/api/payments/{payment_ref}",
    tag = "Payments",
    summary = "Get payment by ref",
    params(("payment_ref" = String, Path, description = "Payment reference")),
    responses(
        (status = 200, description = "Payment details", body = serde_json::Value),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Bukan payment milik Anda"),
        (status = 404, description = "Payment tidak ditemukan")
    ),
    security(("bearer_auth" = []))
)]
pub async fn get_payment(
    auth: AuthUser,
    State(app_state): State<crate::config::AppState>,
    Path(payment_ref): Path<String>,
) -> Result<Json<Value>, AppError> {
    let payment = app_state
        .payment_repository
        .find_by_ref(&payment_ref)
        .await?
        .ok_or_else(|| AppError::not_found("Payment tidak ditemukan"))?;

    if payment.payer_id != auth.user_id && auth.role != "admin" {
        return Err(AppError::forbidden("Bukan payment milik Anda"));
    }

    Ok(Json(json!({
        "success": true,
        "data": format_payment_response(&payment)
    })))
}

/// Handle NusaPay webhook notifications.
/// Selalu 2xx untuk dedup-or-process supaya gateway berhenti retry;
/// 4xx hanya untuk signature yang tidak valid.
#[utoipa::path(
    post,
    path = "/api/webhooks/gateway",
    tag = "Payments",
    summary = "Handle NusaPay webhook",
    description = "Proses update status pembayaran dari NusaPay (idempotent)",
    responses(
        (status = 200, description = "Webhook processed / deduplicated", body = WebhookResponse),
        (status = 401, description = "Signature tidak valid")
    )
)]
pub async fn gateway_webhook(
    State(app_state): State<crate::config::AppState>,
    headers: HeaderMap,
    body: String,
) -> Result<Json<WebhookResponse>, AppError> {
    // Signature verification adalah precondition: ditolak sebelum
    // menyentuh state apapun
    let signature = extract_signature(&headers)?;

    let gateway = NusaPayService::new(
        app_state.config.nusapay_server_key.clone(),
        app_state.config.nusapay_api_url.clone(),
    );

    let payload = gateway.parse_webhook_payload(&body).map_err(|e| {
        tracing::error!("Webhook parse failed: {}", e);
        e
    })?;

    if !gateway.verify_webhook_signature(&body, &signature, &payload.payment_ref) {
        return Err(AppError::AuthenticityError);
    }

    let event = gateway.normalize_event(&payload);

    let (success, message, payment_ref) = match app_state.payment_repository.reconcile(&event).await
    {
        Ok(ReconcileOutcome::Settled(payment)) => {
            notify_payment_result(&app_state, &payment);
            (true, "Webhook processed successfully".to_string(), payment.payment_ref)
        }
        Ok(ReconcileOutcome::Duplicate(payment)) => (
            true,
            "Duplicate delivery, no side effects".to_string(),
            payment.payment_ref,
        ),
        Ok(ReconcileOutcome::Discarded(payment)) => (
            true,
            "Stale event discarded".to_string(),
            payment.payment_ref,
        ),
        Ok(ReconcileOutcome::Acknowledged) => {
            (true, "Informational event acknowledged".to_string(), event.payment_ref.clone())
        }
        Err(AppError::UnknownTransaction(txn_id)) => {
            // Orphan webhook: operator alert, tapi tetap 200 supaya
            // gateway tidak retry storm. Tidak kita retry sendiri.
            tracing::error!(
                "⚠️ Webhook untuk gateway txn {} tidak match payment manapun (operator alert)",
                txn_id
            );
            (false, "Transaksi gateway tidak dikenal".to_string(), event.payment_ref.clone())
        }
        Err(e) => return Err(e),
    };

    tracing::info!(
        "Webhook processed: {} - {} ({})",
        payment_ref,
        event.raw_status,
        message
    );

    Ok(Json(WebhookResponse {
        success,
        message,
        payment_ref,
        transaction_id: event.gateway_txn_id,
    }))
}

/// Process refund untuk transaksi yang sudah dibayar (admin).
/// Jalur eksplisit yang terpisah dari cancel.
#[utoipa::path(
    post,
    path = "/api/refunds",
    tag = "Payments",
    summary = "Process refund (admin)",
    request_body = RefundRequest,
    responses(
        (status = 200, description = "Refund diterapkan", body = serde_json::Value),
        (status = 400, description = "Payment tidak eligible untuk refund"),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Bukan admin"),
        (status = 409, description = "Payment sudah direfund")
    ),
    security(("bearer_auth" = []))
)]
pub async fn process_refund(
    admin: AuthAdmin,
    State(app_state): State<crate::config::AppState>,
    Json(request): Json<RefundRequest>,
) -> Result<Json<Value>, AppError> {
    if request.reason.trim().is_empty() {
        return Err(AppError::validation("Alasan refund wajib diisi"));
    }

    let payment = app_state
        .payment_repository
        .refund(&request.payment_ref, &request.reason)
        .await?;

    tracing::info!(
        "Refund {} diproses oleh admin {} ({})",
        payment.payment_ref,
        admin.user_id,
        request.reason
    );

    notifier::notify(
        app_state.http_client.clone(),
        app_state.config.notification_service_url.clone(),
        NotificationPayload {
            user_id: payment.payer_id,
            event: "payment_refunded".to_string(),
            title: "Refund diproses".to_string(),
            body: format!("Payment {} telah direfund", payment.payment_ref),
        },
    );

    Ok(Json(json!({
        "success": true,
        "message": "Refund processed successfully",
        "data": {
            "payment_ref": payment.payment_ref,
            "status": payment.status,
            "refund_reason": payment.refund_reason,
            "refunded_at": payment.refunded_at
        }
    })))
}

/// Health check endpoint
#[utoipa::path(
    get,
    path = "/health",
    tag = "Service",
    summary = "Health check",
    responses((status = 200, description = "Service is healthy", body = serde_json::Value))
)]
pub async fn health_check(
    State(app_state): State<crate::config::AppState>,
) -> Result<Json<Value>, AppError> {
    let health = app_state.health_check().await;

    Ok(Json(json!({
        "status": health.overall,
        "database": health.database,
        "service": "settlement-service",
        "timestamp": Utc::now(),
        "version": app_state.config.app_version,
    })))
}

/// Get service information
#[utoipa::path(
    get,
    path = "/info",
    tag = "Service",
    summary = "Get service information",
    responses((status = 200, description = "Service info", body = serde_json::Value))
)]
pub async fn get_service_info(
    State(config): State<crate::config::AppConfig>,
) -> Result<Json<Value>, AppError> {
    let gateway = NusaPayService::new(config.nusapay_server_key.clone(), config.nusapay_api_url.clone());

    Ok(Json(json!({
        "service": "settlement-service",
        "version": config.app_version,
        "environment": gateway.environment_info(),
        "is_production": gateway.is_production(),
        "supported_payment_methods": ["card", "ewallet", "bank_transfer", "manual_proof"],
        "supported_transaction_types": ["order", "service_order", "content_purchase"],
        "features": [
            "NusaPay gateway integration",
            "HMAC SHA512 webhook verification",
            "Idempotent settlement (exactly-once)",
            "Seller ledger (pending/available)",
            "Withdrawal dengan fee schedule bertingkat",
            "Polymorphic payment support"
        ],
        "timestamp": Utc::now()
    })))
}

// Helper Functions untuk Payment Handlers

// Extract webhook signature dari headers
fn extract_signature(headers: &HeaderMap) -> crate::error::AppResult<String> {
    headers
        .get("x-callback-token")
        .and_then(|h| h.to_str().ok())
        .map(|s| s.to_string())
        .ok_or(AppError::AuthenticityError)
}

// Format payment response untuk API
fn format_payment_response(payment: &Payment) -> Value {
    json!({
        "id": payment.id,
        "payment_ref": payment.payment_ref,
        "subject": payment.subject().map(|s| json!({
            "type": s.kind,
            "id": s.id
        })),
        "amount_minor": payment.amount_minor,
        "currency": payment.currency,
        "method": payment.method,
        "status": payment.status,
        "gateway_txn_id": payment.gateway_txn_id,
        "proof_url": payment.proof_url,
        "paid_at": payment.paid_at,
        "expired_at": payment.expired_at,
        "refunded_at": payment.refunded_at,
        "is_expired": payment.is_expired(),
        "created_at": payment.created_at,
        "updated_at": payment.updated_at
    })
}

// Notifikasi hasil settlement ke payer (fire-and-forget)
fn notify_payment_result(app_state: &crate::config::AppState, payment: &Payment) {
    let (event, title, body) = match payment.status {
        PaymentStatus::Completed => (
            "payment_completed",
            "Pembayaran berhasil",
            format!("Pembayaran {} telah dikonfirmasi", payment.payment_ref),
        ),
        PaymentStatus::Failed => (
            "payment_failed",
            "Pembayaran gagal",
            format!("Pembayaran {} gagal diproses", payment.payment_ref),
        ),
        _ => return,
    };

    notifier::notify(
        app_state.http_client.clone(),
        app_state.config.notification_service_url.clone(),
        NotificationPayload {
            user_id: payment.payer_id,
            event: event.to_string(),
            title: title.to_string(),
            body,
        },
    );
}
