use crate::domain::withdrawal::{
    FeeSchedule, PayoutMethod, Withdrawal, WithdrawalStatus, ALL_STATUSES,
};
use crate::error::AppError;
use crate::repositories::{ledger_repo, payment_repo, sql_in_list};
use chrono::{DateTime, Utc};
use shared::Money;
use sqlx::PgPool;

// Repository untuk withdrawal. Fee schedule dan cap diinject eksplisit
// saat konstruksi.
#[derive(Clone)]
pub struct WithdrawalRepository {
    pool: PgPool,
    fee_schedule: FeeSchedule,
    // Cap fairness/anti-abuse: maksimum withdrawal non-terminal per user
    max_pending_per_user: i64,
}

#[derive(Debug, sqlx::FromRow)]
struct WithdrawalRow {
    id: i32,
    user_id: i32,
    amount_minor: i64,
    fee_minor: i64,
    net_minor: i64,
    currency: String,
    payout_method: String,
    bank_name: String,
    account_number: String,
    account_holder_name: String,
    status: String,
    notes: Option<String>,
    requested_at: DateTime<Utc>,
    processed_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
}

const WITHDRAWAL_COLUMNS: &str =
    "id, user_id, amount_minor, fee_minor, net_minor, currency, payout_method, bank_name, \
     account_number, account_holder_name, status, notes, requested_at, processed_at, completed_at";

impl TryFrom<WithdrawalRow> for Withdrawal {
    type Error = AppError;

    fn try_from(row: WithdrawalRow) -> Result<Self, Self::Error> {
        let status = WithdrawalStatus::from_str(&row.status).ok_or_else(|| {
            AppError::internal(format!("Status withdrawal tidak dikenal: {}", row.status))
        })?;
        let payout_method = PayoutMethod::from_str(&row.payout_method).ok_or_else(|| {
            AppError::internal(format!("Metode payout tidak dikenal: {}", row.payout_method))
        })?;

        Ok(Withdrawal {
            id: row.id,
            user_id: row.user_id,
            amount_minor: row.amount_minor,
            fee_minor: row.fee_minor,
            net_minor: row.net_minor,
            currency: row.currency,
            payout_method,
            bank_name: row.bank_name,
            account_number: row.account_number,
            account_holder_name: row.account_holder_name,
            status,
            notes: row.notes,
            requested_at: row.requested_at,
            processed_at: row.processed_at,
            completed_at: row.completed_at,
        })
    }
}

impl WithdrawalRepository {
    pub fn new(pool: PgPool, fee_schedule: FeeSchedule, max_pending_per_user: i64) -> Self {
        Self {
            pool,
            fee_schedule,
            max_pending_per_user,
        }
    }

    /// Buat withdrawal request. Atomik dalam satu transaksi database:
    /// cek cap non-terminal, reserve saldo available (conditional UPDATE
    /// yang menserialisasi request konkuren user yang sama), hitung fee,
    /// simpan record. net = amount - fee.
    #[allow(clippy::too_many_arguments)]
    pub async fn request(
        &self,
        user_id: i32,
        amount_minor: i64,
        currency: &str,
        payout_method: PayoutMethod,
        bank_name: &str,
        account_number: &str,
        account_holder_name: &str,
    ) -> Result<Withdrawal, AppError> {
        if !shared::utils::validation::is_valid_amount(amount_minor) {
            return Err(AppError::validation("Nominal withdrawal tidak valid"));
        }
        if !shared::utils::validation::is_valid_account_number(account_number) {
            return Err(AppError::validation("Nomor rekening tidak valid"));
        }
        if account_holder_name.trim().is_empty() {
            return Err(AppError::validation("Nama pemilik rekening wajib diisi"));
        }

        let mut tx = self.pool.begin().await?;

        // Cap fairness: maksimum N withdrawal yang belum selesai per user
        let non_terminal = sql_in_list(
            ALL_STATUSES
                .into_iter()
                .filter(|s| !s.is_terminal())
                .map(|s| s.as_str()),
        );
        let pending: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(*) FROM withdrawals
             WHERE user_id = $1 AND status IN ({})",
            non_terminal
        ))
        .bind(user_id)
        .fetch_one(&mut *tx)
        .await?;

        if pending >= self.max_pending_per_user {
            return Err(AppError::TooManyPending(format!(
                "Maksimum {} withdrawal yang sedang berjalan per user",
                self.max_pending_per_user
            )));
        }

        // Check-and-reserve atomik terhadap saldo available
        ledger_repo::reserve_for_withdrawal(&mut tx, user_id, amount_minor).await?;

        let amount = Money {
            amount_minor,
            currency: currency.to_string(),
        };
        let fee = self.fee_schedule.compute_fee(payout_method, &amount);
        let net = amount.checked_sub(&fee)?;

        let row = sqlx::query_as::<_, WithdrawalRow>(&format!(
            "INSERT INTO withdrawals (
                user_id, amount_minor, fee_minor, net_minor, currency, payout_method,
                bank_name, account_number, account_holder_name, status, requested_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, 'pending', NOW())
            RETURNING {}",
            WITHDRAWAL_COLUMNS
        ))
        .bind(user_id)
        .bind(amount_minor)
        .bind(fee.amount_minor)
        .bind(net.amount_minor)
        .bind(currency)
        .bind(payout_method.as_str())
        .bind(bank_name)
        .bind(account_number)
        .bind(account_holder_name)
        .fetch_one(&mut *tx)
        .await?;

        payment_repo::record_transaction_log(
            &mut tx,
            "withdrawal_request",
            user_id,
            None,
            amount_minor,
            Some(fee.amount_minor),
            Some(-net.amount_minor),
            "pending",
            &format!("Withdrawal request #{}", row.id),
        )
        .await?;

        tx.commit().await?;

        tracing::info!(
            "Withdrawal #{} dibuat: user {} {} (fee {}, net {})",
            row.id,
            user_id,
            amount.format_major(),
            fee.format_major(),
            net.format_major()
        );

        row.try_into()
    }

    pub async fn find_by_id(&self, id: i32) -> Result<Option<Withdrawal>, AppError> {
        let row = sqlx::query_as::<_, WithdrawalRow>(&format!(
            "SELECT {} FROM withdrawals WHERE id = $1",
            WITHDRAWAL_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Withdrawal::try_from).transpose()
    }

    pub async fn list_by_user(
        &self,
        user_id: i32,
        status: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<Withdrawal>, i64), AppError> {
        let (rows, total) = match status {
            Some(status) => {
                let rows = sqlx::query_as::<_, WithdrawalRow>(&format!(
                    "SELECT {} FROM withdrawals
                     WHERE user_id = $1 AND status = $2
                     ORDER BY requested_at DESC LIMIT $3 OFFSET $4",
                    WITHDRAWAL_COLUMNS
                ))
                .bind(user_id)
                .bind(status)
                .bind(limit)
                .bind(offset)
                .fetch_all(&self.pool)
                .await?;

                let total: i64 = sqlx::query_scalar(
                    "SELECT COUNT(*) FROM withdrawals WHERE user_id = $1 AND status = $2",
                )
                .bind(user_id)
                .bind(status)
                .fetch_one(&self.pool)
                .await?;

                (rows, total)
            }
            None => {
                let rows = sqlx::query_as::<_, WithdrawalRow>(&format!(
                    "SELECT {} FROM withdrawals
                     WHERE user_id = $1
                     ORDER BY requested_at DESC LIMIT $2 OFFSET $3",
                    WITHDRAWAL_COLUMNS
                ))
                .bind(user_id)
                .bind(limit)
                .bind(offset)
                .fetch_all(&self.pool)
                .await?;

                let total: i64 =
                    sqlx::query_scalar("SELECT COUNT(*) FROM withdrawals WHERE user_id = $1")
                        .bind(user_id)
                        .fetch_one(&self.pool)
                        .await?;

                (rows, total)
            }
        };

        let withdrawals = rows
            .into_iter()
            .map(Withdrawal::try_from)
            .collect::<Result<Vec<_>, _>>()?;

        Ok((withdrawals, total))
    }

    /// User membatalkan withdrawal yang masih pending; reservasi saldo
    /// dikembalikan ke available.
    pub async fn cancel(&self, id: i32, user_id: i32) -> Result<Withdrawal, AppError> {
        let target = WithdrawalStatus::Cancelled;
        let sources = sql_in_list(
            WithdrawalStatus::sources_to(target)
                .into_iter()
                .map(|s| s.as_str()),
        );

        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, WithdrawalRow>(&format!(
            "UPDATE withdrawals
             SET status = '{}', processed_at = NOW()
             WHERE id = $1 AND user_id = $2 AND status IN ({})
             RETURNING {}",
            target.as_str(),
            sources,
            WITHDRAWAL_COLUMNS
        ))
        .bind(id)
        .bind(user_id)
        .fetch_optional(&mut *tx)
        .await?;

        let row = match row {
            Some(row) => row,
            None => {
                tx.rollback().await?;
                let existing = self
                    .find_by_id(id)
                    .await?
                    .ok_or_else(|| AppError::not_found("Withdrawal tidak ditemukan"))?;
                if existing.user_id != user_id {
                    return Err(AppError::forbidden("Bukan withdrawal milik Anda"));
                }
                if existing.status.is_terminal() {
                    return Err(AppError::already_processed("Withdrawal sudah final"));
                }
                return Err(AppError::invalid_transition(
                    existing.status.as_str(),
                    "cancel",
                ));
            }
        };

        ledger_repo::restore_reserved(&mut tx, user_id, row.amount_minor).await?;
        payment_repo::record_transaction_log(
            &mut tx,
            "withdrawal_cancelled",
            user_id,
            None,
            row.amount_minor,
            None,
            Some(row.amount_minor),
            "completed",
            &format!("Withdrawal #{} dibatalkan user", id),
        )
        .await?;

        tx.commit().await?;

        tracing::info!("Withdrawal #{} dibatalkan oleh user {}", id, user_id);

        row.try_into()
    }

    /// Keputusan admin: approve memfinalkan payout (terminal completed,
    /// bucket reserved dibersihkan), reject mengembalikan reservasi ke
    /// available. Dua-duanya satu-satunya penulis status terminal
    /// withdrawal selain cancel user.
    pub async fn admin_process(
        &self,
        id: i32,
        approve: bool,
        notes: Option<&str>,
    ) -> Result<Withdrawal, AppError> {
        let mut tx = self.pool.begin().await?;

        let target = if approve {
            WithdrawalStatus::Completed
        } else {
            WithdrawalStatus::Rejected
        };
        let sources = sql_in_list(
            WithdrawalStatus::sources_to(target)
                .into_iter()
                .map(|s| s.as_str()),
        );

        let row = if approve {
            // pending -> processing -> completed dalam satu keputusan;
            // processed_at mencatat fase payout berjalan
            sqlx::query_as::<_, WithdrawalRow>(&format!(
                "UPDATE withdrawals
                 SET status = '{}', notes = $2, processed_at = NOW(), completed_at = NOW()
                 WHERE id = $1 AND status IN ({})
                 RETURNING {}",
                target.as_str(),
                sources,
                WITHDRAWAL_COLUMNS
            ))
            .bind(id)
            .bind(notes)
            .fetch_optional(&mut *tx)
            .await?
        } else {
            sqlx::query_as::<_, WithdrawalRow>(&format!(
                "UPDATE withdrawals
                 SET status = '{}', notes = $2, processed_at = NOW()
                 WHERE id = $1 AND status IN ({})
                 RETURNING {}",
                target.as_str(),
                sources,
                WITHDRAWAL_COLUMNS
            ))
            .bind(id)
            .bind(notes)
            .fetch_optional(&mut *tx)
            .await?
        };

        let row = match row {
            Some(row) => row,
            None => {
                tx.rollback().await?;
                let existing = self
                    .find_by_id(id)
                    .await?
                    .ok_or_else(|| AppError::not_found("Withdrawal tidak ditemukan"))?;
                // Terminal sudah final: approve/reject kedua kali ditolak
                return Err(AppError::already_processed(format!(
                    "Withdrawal sudah {}",
                    existing.status
                )));
            }
        };

        if approve {
            ledger_repo::finalize_withdrawal(&mut tx, row.user_id, row.amount_minor).await?;
        } else {
            ledger_repo::restore_reserved(&mut tx, row.user_id, row.amount_minor).await?;
        }

        payment_repo::record_transaction_log(
            &mut tx,
            if approve { "withdrawal_completed" } else { "withdrawal_rejected" },
            row.user_id,
            None,
            row.amount_minor,
            Some(row.fee_minor),
            Some(if approve { -row.net_minor } else { row.amount_minor }),
            "completed",
            &format!(
                "Withdrawal #{} {} oleh admin",
                id,
                if approve { "disetujui" } else { "ditolak" }
            ),
        )
        .await?;

        tx.commit().await?;

        tracing::info!(
            "Withdrawal #{} {} (user {})",
            id,
            if approve { "completed" } else { "rejected" },
            row.user_id
        );

        row.try_into()
    }
}
