use crate::domain::ledger::LedgerEntry;
use crate::error::AppError;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};

// Satu-satunya tempat yang menulis saldo ledger. Semua operasi adalah
// conditional UPDATE dengan guard saldo; row lock per user pada UPDATE
// menserialisasi operasi konkuren untuk user yang sama.
#[derive(Clone)]
pub struct LedgerRepository {
    pool: PgPool,
}

#[derive(Debug, sqlx::FromRow)]
struct LedgerRow {
    user_id: i32,
    available_minor: i64,
    pending_minor: i64,
    reserved_minor: i64,
    total_minor: i64,
    updated_at: DateTime<Utc>,
}

impl From<LedgerRow> for LedgerEntry {
    fn from(row: LedgerRow) -> Self {
        LedgerEntry {
            user_id: row.user_id,
            available_minor: row.available_minor,
            pending_minor: row.pending_minor,
            reserved_minor: row.reserved_minor,
            total_minor: row.total_minor,
            updated_at: row.updated_at,
        }
    }
}

impl LedgerRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Ambil saldo user, buat row kosong kalau belum ada
    pub async fn get_or_create_entry(&self, user_id: i32) -> Result<LedgerEntry, AppError> {
        let mut tx = self.pool.begin().await?;
        ensure_entry(&mut tx, user_id).await?;
        let row = sqlx::query_as::<_, LedgerRow>(
            "SELECT user_id, available_minor, pending_minor, reserved_minor, total_minor, updated_at
             FROM ledger_entries WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;

        Ok(row.into())
    }
}

/// Buat ledger entry kosong kalau user belum punya
pub async fn ensure_entry(
    tx: &mut Transaction<'_, Postgres>,
    user_id: i32,
) -> Result<(), AppError> {
    sqlx::query(
        "INSERT INTO ledger_entries (user_id, available_minor, pending_minor, reserved_minor, total_minor, updated_at)
         VALUES ($1, 0, 0, 0, 0, NOW())
         ON CONFLICT (user_id) DO NOTHING",
    )
    .bind(user_id)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

/// Earnings masuk ke bucket pending (saat payment settle sukses)
pub async fn credit_pending(
    tx: &mut Transaction<'_, Postgres>,
    user_id: i32,
    amount_minor: i64,
) -> Result<(), AppError> {
    check_amount(amount_minor)?;
    ensure_entry(tx, user_id).await?;

    sqlx::query(
        "UPDATE ledger_entries
         SET pending_minor = pending_minor + $2,
             total_minor = total_minor + $2,
             updated_at = NOW()
         WHERE user_id = $1",
    )
    .bind(user_id)
    .bind(amount_minor)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

/// Transaksi selesai: dana pindah pending -> available.
/// Guard gagal berarti inkonsistensi internal, bukan input user.
pub async fn release_to_available(
    tx: &mut Transaction<'_, Postgres>,
    user_id: i32,
    amount_minor: i64,
) -> Result<(), AppError> {
    check_amount(amount_minor)?;

    let result = sqlx::query(
        "UPDATE ledger_entries
         SET pending_minor = pending_minor - $2,
             available_minor = available_minor + $2,
             updated_at = NOW()
         WHERE user_id = $1 AND pending_minor >= $2",
    )
    .bind(user_id)
    .bind(amount_minor)
    .execute(&mut **tx)
    .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::internal(format!(
            "Ledger pending user {} tidak mencukupi untuk release {}",
            user_id, amount_minor
        )));
    }

    Ok(())
}

/// Withdrawal request: debit available, tahan di reserved. Conditional
/// UPDATE ini adalah check-and-reserve atomik yang mencegah dua request
/// konkuren sama-sama lolos cek saldo.
pub async fn reserve_for_withdrawal(
    tx: &mut Transaction<'_, Postgres>,
    user_id: i32,
    amount_minor: i64,
) -> Result<(), AppError> {
    check_amount(amount_minor)?;
    ensure_entry(tx, user_id).await?;

    let result = sqlx::query(
        "UPDATE ledger_entries
         SET available_minor = available_minor - $2,
             reserved_minor = reserved_minor + $2,
             total_minor = total_minor - $2,
             updated_at = NOW()
         WHERE user_id = $1 AND available_minor >= $2",
    )
    .bind(user_id)
    .bind(amount_minor)
    .execute(&mut **tx)
    .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::insufficient_funds(
            "Saldo available tidak mencukupi untuk withdrawal ini",
        ));
    }

    Ok(())
}

/// Withdrawal approved: dana reserved keluar dari platform
pub async fn finalize_withdrawal(
    tx: &mut Transaction<'_, Postgres>,
    user_id: i32,
    amount_minor: i64,
) -> Result<(), AppError> {
    check_amount(amount_minor)?;

    let result = sqlx::query(
        "UPDATE ledger_entries
         SET reserved_minor = reserved_minor - $2,
             updated_at = NOW()
         WHERE user_id = $1 AND reserved_minor >= $2",
    )
    .bind(user_id)
    .bind(amount_minor)
    .execute(&mut **tx)
    .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::internal(format!(
            "Ledger reserved user {} tidak mencukupi untuk finalize {}",
            user_id, amount_minor
        )));
    }

    Ok(())
}

/// Withdrawal dibatalkan/ditolak: dana reserved kembali ke available
pub async fn restore_reserved(
    tx: &mut Transaction<'_, Postgres>,
    user_id: i32,
    amount_minor: i64,
) -> Result<(), AppError> {
    check_amount(amount_minor)?;

    let result = sqlx::query(
        "UPDATE ledger_entries
         SET reserved_minor = reserved_minor - $2,
             available_minor = available_minor + $2,
             total_minor = total_minor + $2,
             updated_at = NOW()
         WHERE user_id = $1 AND reserved_minor >= $2",
    )
    .bind(user_id)
    .bind(amount_minor)
    .execute(&mut **tx)
    .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::internal(format!(
            "Ledger reserved user {} tidak mencukupi untuk restore {}",
            user_id, amount_minor
        )));
    }

    Ok(())
}

/// Refund transaksi yang sudah release: tarik kembali dari available.
/// Bisa gagal secara sah kalau earner sudah menarik dananya.
pub async fn reverse_available(
    tx: &mut Transaction<'_, Postgres>,
    user_id: i32,
    amount_minor: i64,
) -> Result<(), AppError> {
    check_amount(amount_minor)?;

    let result = sqlx::query(
        "UPDATE ledger_entries
         SET available_minor = available_minor - $2,
             total_minor = total_minor - $2,
             updated_at = NOW()
         WHERE user_id = $1 AND available_minor >= $2",
    )
    .bind(user_id)
    .bind(amount_minor)
    .execute(&mut **tx)
    .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::insufficient_funds(
            "Saldo earner tidak mencukupi untuk refund ini",
        ));
    }

    Ok(())
}

/// Refund sebelum release: tarik kembali dari pending
pub async fn reverse_pending(
    tx: &mut Transaction<'_, Postgres>,
    user_id: i32,
    amount_minor: i64,
) -> Result<(), AppError> {
    check_amount(amount_minor)?;

    let result = sqlx::query(
        "UPDATE ledger_entries
         SET pending_minor = pending_minor - $2,
             total_minor = total_minor - $2,
             updated_at = NOW()
         WHERE user_id = $1 AND pending_minor >= $2",
    )
    .bind(user_id)
    .bind(amount_minor)
    .execute(&mut **tx)
    .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::internal(format!(
            "Ledger pending user {} tidak mencukupi untuk reversal {}",
            user_id, amount_minor
        )));
    }

    Ok(())
}

fn check_amount(amount_minor: i64) -> Result<(), AppError> {
    if amount_minor <= 0 {
        return Err(AppError::internal(
            "Nominal operasi ledger harus positif",
        ));
    }
    Ok(())
}
