use crate::domain::ledger::BalanceResponse;
use crate::domain::withdrawal::{
    AdminProcessRequest, CreateWithdrawalRequest, PayoutMethod, Withdrawal, WithdrawalsListQuery,
    WithdrawalsListResponse,
};
use crate::error::AppError;
use crate::middleware::auth::{AuthAdmin, AuthEarner};
use crate::utils::notifier::{self, NotificationPayload};
use axum::{
    extract::{Path, Query, State},
    response::Json,
};
use serde_json::{json, Value};
use shared::Money;
use utoipa;

/// Ambil saldo earnings (available / pending / reserved)
#[utoipa::path(
    get,
    path = "/api/balance",
    tag = "Withdrawals",
    summary = "Get balance",
    responses(
        (status = 200, description = "Saldo earnings", body = BalanceResponse),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Bukan earner")
    ),
    security(("bearer_auth" = []))
)]
pub async fn get_balance(
    auth: AuthEarner,
    State(app_state): State<crate::config::AppState>,
) -> Result<Json<BalanceResponse>, AppError> {
    let entry = app_state
        .ledger_repository
        .get_or_create_entry(auth.user_id)
        .await?;

    tracing::debug!(
        "Balance user {}: available {}, pending {}, reserved {}",
        auth.user_id,
        entry.available_minor,
        entry.pending_minor,
        entry.reserved_minor
    );

    Ok(Json(BalanceResponse::from_entry(
        entry,
        &app_state.config.currency,
    )))
}

/// Buat withdrawal request baru
#[utoipa::path(
    post,
    path = "/api/withdrawals",
    tag = "Withdrawals",
    summary = "Request withdrawal",
    request_body = CreateWithdrawalRequest,
    responses(
        (status = 200, description = "Withdrawal request dibuat", body = serde_json::Value),
        (status = 400, description = "Saldo tidak cukup / terlalu banyak withdrawal pending"),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Bukan earner")
    ),
    security(("bearer_auth" = []))
)]
pub async fn create_withdrawal(
    auth: AuthEarner,
    State(app_state): State<crate::config::AppState>,
    Json(payload): Json<CreateWithdrawalRequest>,
) -> Result<Json<Value>, AppError> {
    let payout_method = PayoutMethod::from_str(&payload.payout_method)
        .ok_or_else(|| AppError::validation("Metode payout harus bank_transfer atau ewallet"))?;

    tracing::info!(
        "User {} requesting withdrawal: {}",
        auth.user_id,
        Money {
            amount_minor: payload.amount_minor,
            currency: app_state.config.currency.clone()
        }
        .format_major()
    );

    let withdrawal = app_state
        .withdrawal_repository
        .request(
            auth.user_id,
            payload.amount_minor,
            &app_state.config.currency,
            payout_method,
            &payload.bank_name,
            &payload.account_number,
            &payload.account_holder_name,
        )
        .await?;

    Ok(Json(json!({
        "success": true,
        "message": "Withdrawal request dibuat",
        "data": format_withdrawal_response(&withdrawal)
    })))
}

/// List withdrawal milik user
#[utoipa::path(
    get,
    path = "/api/withdrawals",
    tag = "Withdrawals",
    summary = "List withdrawals",
    params(
        ("status" = Option<String>, Query, description = "Filter status"),
        ("limit" = Option<i64>, Query, description = "Items per halaman (default 50, max 100)"),
        ("offset" = Option<i64>, Query, description = "Offset pagination")
    ),
    responses(
        (status = 200, description = "List withdrawal", body = WithdrawalsListResponse),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Bukan earner")
    ),
    security(("bearer_auth" = []))
)]
pub async fn list_withdrawals(
    auth: AuthEarner,
    State(app_state): State<crate::config::AppState>,
    Query(params): Query<WithdrawalsListQuery>,
) -> Result<Json<WithdrawalsListResponse>, AppError> {
    let limit = params.limit.unwrap_or(50).min(100);
    let offset = params.offset.unwrap_or(0);

    let (withdrawals, total) = app_state
        .withdrawal_repository
        .list_by_user(auth.user_id, params.status.as_deref(), limit, offset)
        .await?;

    Ok(Json(WithdrawalsListResponse {
        withdrawals,
        total,
        limit,
        offset,
    }))
}

/// Get detail withdrawal
#[utoipa::path(
    get,
    path = "/api/withdrawals/{id}",
    tag = "Withdrawals",
    summary = "Get withdrawal detail",
    params(("id" = i32, Path, description = "Withdrawal ID")),
    responses(
        (status = 200, description = "Detail withdrawal", body = serde_json::Value),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Withdrawal tidak ditemukan")
    ),
    security(("bearer_auth" = []))
)]
pub async fn get_withdrawal(
    auth: AuthEarner,
    State(app_state): State<crate::config::AppState>,
    Path(id): Path<i32>,
) -> Result<Json<Value>, AppError> {
    let withdrawal = app_state
        .withdrawal_repository
        .find_by_id(id)
        .await?
        .filter(|w| w.user_id == auth.user_id)
        .ok_or_else(|| AppError::not_found("Withdrawal tidak ditemukan"))?;

    Ok(Json(json!({
        "success": true,
        "data": format_withdrawal_response(&withdrawal)
    })))
}

/// User membatalkan withdrawal yang masih pending
#[utoipa::path(
    post,
    path = "/api/withdrawals/{id}/cancel",
    tag = "Withdrawals",
    summary = "Cancel withdrawal",
    params(("id" = i32, Path, description = "Withdrawal ID")),
    responses(
        (status = 200, description = "Withdrawal dibatalkan", body = serde_json::Value),
        (status = 401, description = "Unauthorized"),
        (status = 409, description = "Withdrawal sudah final")
    ),
    security(("bearer_auth" = []))
)]
pub async fn cancel_withdrawal(
    auth: AuthEarner,
    State(app_state): State<crate::config::AppState>,
    Path(id): Path<i32>,
) -> Result<Json<Value>, AppError> {
    let withdrawal = app_state
        .withdrawal_repository
        .cancel(id, auth.user_id)
        .await?;

    Ok(Json(json!({
        "success": true,
        "message": "Withdrawal dibatalkan, saldo dikembalikan",
        "data": format_withdrawal_response(&withdrawal)
    })))
}

/// Keputusan admin atas withdrawal: approve memfinalkan payout,
/// reject mengembalikan saldo
#[utoipa::path(
    post,
    path = "/api/admin/withdrawals/{id}/process",
    tag = "Withdrawals",
    summary = "Process withdrawal (admin)",
    params(("id" = i32, Path, description = "Withdrawal ID")),
    request_body = AdminProcessRequest,
    responses(
        (status = 200, description = "Keputusan diterapkan", body = serde_json::Value),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Bukan admin"),
        (status = 409, description = "Withdrawal sudah diproses")
    ),
    security(("bearer_auth" = []))
)]
pub async fn admin_process_withdrawal(
    admin: AuthAdmin,
    State(app_state): State<crate::config::AppState>,
    Path(id): Path<i32>,
    Json(request): Json<AdminProcessRequest>,
) -> Result<Json<Value>, AppError> {
    let withdrawal = app_state
        .withdrawal_repository
        .admin_process(id, request.approve, request.notes.as_deref())
        .await?;

    tracing::info!(
        "Admin {} memproses withdrawal #{}: {}",
        admin.user_id,
        id,
        withdrawal.status
    );

    notifier::notify(
        app_state.http_client.clone(),
        app_state.config.notification_service_url.clone(),
        NotificationPayload {
            user_id: withdrawal.user_id,
            event: if request.approve {
                "withdrawal_completed".to_string()
            } else {
                "withdrawal_rejected".to_string()
            },
            title: if request.approve {
                "Withdrawal selesai".to_string()
            } else {
                "Withdrawal ditolak".to_string()
            },
            body: format!(
                "Withdrawal #{} {}",
                id,
                if request.approve {
                    "sudah ditransfer"
                } else {
                    "ditolak, saldo dikembalikan"
                }
            ),
        },
    );

    Ok(Json(json!({
        "success": true,
        "message": "Keputusan diterapkan",
        "data": format_withdrawal_response(&withdrawal)
    })))
}

// Format withdrawal response untuk API
fn format_withdrawal_response(withdrawal: &Withdrawal) -> Value {
    json!({
        "id": withdrawal.id,
        "user_id": withdrawal.user_id,
        "amount_minor": withdrawal.amount_minor,
        "fee_minor": withdrawal.fee_minor,
        "net_minor": withdrawal.net_minor,
        "currency": withdrawal.currency,
        "payout_method": withdrawal.payout_method,
        "bank_name": withdrawal.bank_name,
        "account_number": withdrawal.account_number,
        "account_holder_name": withdrawal.account_holder_name,
        "status": withdrawal.status,
        "notes": withdrawal.notes,
        "requested_at": withdrawal.requested_at,
        "processed_at": withdrawal.processed_at,
        "completed_at": withdrawal.completed_at
    })
}
