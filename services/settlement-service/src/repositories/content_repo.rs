use crate::domain::content::{self, AccessType, ContentEvent, ContentPurchase, ContentPurchaseStatus};
use crate::domain::payment::{PaymentStatus, SubjectKind};
use crate::error::AppError;
use crate::repositories::order_repo::increment_seller_stats;
use crate::repositories::{ledger_repo, payment_repo, required_target, sql_in_list};
use chrono::{DateTime, Utc};
use sqlx::PgPool;

// Repository untuk pembelian lisensi konten digital
#[derive(Clone)]
pub struct ContentRepository {
    pool: PgPool,
}

#[derive(Debug, sqlx::FromRow)]
struct ContentPurchaseRow {
    id: i32,
    purchase_ref: String,
    buyer_id: i32,
    author_id: i32,
    content_id: i32,
    price_minor: i64,
    currency: String,
    status: String,
    access_type: String,
    expires_at: Option<DateTime<Utc>>,
    downloads_remaining: Option<i32>,
    created_at: DateTime<Utc>,
    activated_at: Option<DateTime<Utc>>,
    refunded_at: Option<DateTime<Utc>>,
    updated_at: DateTime<Utc>,
}

const PURCHASE_COLUMNS: &str =
    "id, purchase_ref, buyer_id, author_id, content_id, price_minor, currency, status, \
     access_type, expires_at, downloads_remaining, created_at, activated_at, refunded_at, updated_at";

impl TryFrom<ContentPurchaseRow> for ContentPurchase {
    type Error = AppError;

    fn try_from(row: ContentPurchaseRow) -> Result<Self, Self::Error> {
        let status = ContentPurchaseStatus::from_str(&row.status).ok_or_else(|| {
            AppError::internal(format!("Status content purchase tidak dikenal: {}", row.status))
        })?;
        let access_type = AccessType::from_str(&row.access_type).ok_or_else(|| {
            AppError::internal(format!("Access type tidak dikenal: {}", row.access_type))
        })?;

        Ok(ContentPurchase {
            id: row.id,
            purchase_ref: row.purchase_ref,
            buyer_id: row.buyer_id,
            author_id: row.author_id,
            content_id: row.content_id,
            price_minor: row.price_minor,
            currency: row.currency,
            status,
            access_type,
            expires_at: row.expires_at,
            downloads_remaining: row.downloads_remaining,
            created_at: row.created_at,
            activated_at: row.activated_at,
            refunded_at: row.refunded_at,
            updated_at: row.updated_at,
        })
    }
}

impl ContentRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Buat pembelian konten. Konten gratis langsung aktif tanpa payment
    /// round-trip; konten berbayar menunggu settlement.
    pub async fn create_purchase(
        &self,
        buyer_id: i32,
        content_id: i32,
    ) -> Result<ContentPurchase, AppError> {
        let mut tx = self.pool.begin().await?;

        #[derive(sqlx::FromRow)]
        struct ContentRow {
            author_id: i32,
            price_minor: i64,
            currency: String,
            access_type: String,
            access_days: Option<i32>,
            download_quota: Option<i32>,
        }

        let content = sqlx::query_as::<_, ContentRow>(
            "SELECT author_id, price_minor, currency, access_type, access_days, download_quota
             FROM contents WHERE id = $1",
        )
        .bind(content_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::not_found("Konten tidak ditemukan"))?;

        if content.author_id == buyer_id {
            return Err(AppError::validation("Tidak bisa membeli konten sendiri"));
        }

        // Satu lisensi non-terminal per buyer per konten
        let live = sql_in_list(
            content::ALL_STATUSES
                .into_iter()
                .filter(|s| !s.is_terminal())
                .map(|s| s.as_str()),
        );
        let existing: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(*) FROM content_purchases
             WHERE buyer_id = $1 AND content_id = $2 AND status IN ({})",
            live
        ))
        .bind(buyer_id)
        .bind(content_id)
        .fetch_one(&mut *tx)
        .await?;

        if existing > 0 {
            return Err(AppError::validation(
                "Anda sudah punya lisensi aktif untuk konten ini",
            ));
        }

        let purchase_ref = ContentPurchase::generate_purchase_ref();
        let is_free = content.price_minor == 0;

        // Konten gratis lewat edge free_grant di tabel; berbayar menunggu
        // settlement payment
        let initial_status = if is_free {
            required_target(
                content::event_target(ContentEvent::FreeGrant),
                ContentEvent::FreeGrant.as_str(),
            )?
        } else {
            ContentPurchaseStatus::Pending
        };

        let row = sqlx::query_as::<_, ContentPurchaseRow>(&format!(
            "INSERT INTO content_purchases (
                purchase_ref, buyer_id, author_id, content_id, price_minor, currency,
                status, access_type, access_days, expires_at, downloads_remaining,
                created_at, activated_at, updated_at
            ) VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8, $9,
                CASE WHEN $10 AND $8 = 'expires' THEN NOW() + make_interval(days => $9) ELSE NULL END,
                $11,
                NOW(),
                CASE WHEN $10 THEN NOW() ELSE NULL END,
                NOW()
            )
            RETURNING {}",
            PURCHASE_COLUMNS
        ))
        .bind(&purchase_ref)
        .bind(buyer_id)
        .bind(content.author_id)
        .bind(content_id)
        .bind(content.price_minor)
        .bind(&content.currency)
        .bind(initial_status.as_str())
        .bind(&content.access_type)
        .bind(content.access_days)
        .bind(is_free)
        .bind(content.download_quota)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::info!(
            "Content purchase {}: buyer {} konten {} ({})",
            purchase_ref,
            buyer_id,
            content_id,
            if is_free { "gratis, langsung aktif" } else { "menunggu pembayaran" }
        );

        row.try_into()
    }

    pub async fn find_by_id(&self, id: i32) -> Result<Option<ContentPurchase>, AppError> {
        let row = sqlx::query_as::<_, ContentPurchaseRow>(&format!(
            "SELECT {} FROM content_purchases WHERE id = $1",
            PURCHASE_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(ContentPurchase::try_from).transpose()
    }

    /// Catat satu download: cek akses + decrement kuota atomik.
    /// Kuota NULL berarti unlimited.
    pub async fn record_download(
        &self,
        id: i32,
        buyer_id: i32,
    ) -> Result<ContentPurchase, AppError> {
        let row = sqlx::query_as::<_, ContentPurchaseRow>(&format!(
            "UPDATE content_purchases
             SET downloads_remaining = CASE
                     WHEN downloads_remaining IS NULL THEN NULL
                     ELSE downloads_remaining - 1
                 END,
                 updated_at = NOW()
             WHERE id = $1 AND buyer_id = $2 AND status = '{}'
               AND (expires_at IS NULL OR expires_at > NOW())
               AND (downloads_remaining IS NULL OR downloads_remaining > 0)
             RETURNING {}",
            ContentPurchaseStatus::Active.as_str(),
            PURCHASE_COLUMNS
        ))
        .bind(id)
        .bind(buyer_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => row.try_into(),
            None => {
                let existing = self
                    .find_by_id(id)
                    .await?
                    .ok_or_else(|| AppError::not_found("Lisensi tidak ditemukan"))?;
                if existing.buyer_id != buyer_id {
                    return Err(AppError::forbidden("Bukan lisensi milik Anda"));
                }
                if existing.status != ContentPurchaseStatus::Active {
                    return Err(AppError::validation(format!(
                        "Lisensi berstatus {}, tidak bisa download",
                        existing.status
                    )));
                }
                if !existing.has_access(Utc::now()) {
                    return Err(AppError::validation("Masa akses lisensi sudah berakhir"));
                }
                Err(AppError::validation("Kuota download sudah habis"))
            }
        }
    }

    /// Pembatalan sebelum pembayaran
    pub async fn cancel(&self, id: i32, buyer_id: i32) -> Result<ContentPurchase, AppError> {
        let event = ContentEvent::BuyerCancelled;
        let target = required_target(content::event_target(event), event.as_str())?;
        let sources = sql_in_list(content::event_sources(event).into_iter().map(|s| s.as_str()));

        let row = sqlx::query_as::<_, ContentPurchaseRow>(&format!(
            "UPDATE content_purchases
             SET status = '{}', updated_at = NOW()
             WHERE id = $1 AND buyer_id = $2 AND status IN ({})
             RETURNING {}",
            target.as_str(),
            sources,
            PURCHASE_COLUMNS
        ))
        .bind(id)
        .bind(buyer_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => row.try_into(),
            None => {
                let existing = self
                    .find_by_id(id)
                    .await?
                    .ok_or_else(|| AppError::not_found("Lisensi tidak ditemukan"))?;
                if existing.buyer_id != buyer_id {
                    return Err(AppError::forbidden("Bukan lisensi milik Anda"));
                }
                Err(AppError::invalid_transition(
                    existing.status.as_str(),
                    event.as_str(),
                ))
            }
        }
    }

    /// Scheduler: lisensi active yang melewati expires_at menjadi expired
    pub async fn expire_overdue(&self) -> Result<u64, AppError> {
        let event = ContentEvent::WindowElapsed;
        let target = required_target(content::event_target(event), event.as_str())?;
        let sources = sql_in_list(content::event_sources(event).into_iter().map(|s| s.as_str()));

        let result = sqlx::query(&format!(
            "UPDATE content_purchases
             SET status = '{}', updated_at = NOW()
             WHERE status IN ({}) AND expires_at IS NOT NULL AND expires_at < NOW()",
            target.as_str(),
            sources
        ))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Scheduler: release dana author setelah refund window konten lewat.
    /// Konten tidak punya langkah konfirmasi buyer, jadi release berjalan
    /// otomatis dari hold window. Release di-key pada payment (completed,
    /// belum released), bukan status lisensi: lisensi dengan access window
    /// pendek bisa keburu expired sebelum hold window lewat, dan dana
    /// author tetap harus direlease.
    pub async fn release_overdue(&self, hold_days: i64) -> Result<u64, AppError> {
        let cutoff = Utc::now() - chrono::Duration::days(hold_days);

        #[derive(sqlx::FromRow)]
        struct ReleaseRow {
            id: i32,
            author_id: i32,
            purchase_ref: String,
        }

        let rows = sqlx::query_as::<_, ReleaseRow>(&format!(
            "SELECT cp.id, cp.author_id, cp.purchase_ref
             FROM content_purchases cp
             JOIN payments p ON p.content_purchase_id = cp.id
             WHERE p.status = '{}' AND p.released_at IS NULL
               AND cp.activated_at IS NOT NULL AND cp.activated_at < $1
             ORDER BY cp.activated_at
             LIMIT 100",
            PaymentStatus::Completed.as_str()
        ))
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;

        let mut released = 0;
        for row in rows {
            match self.release_one(row.id, row.author_id, &row.purchase_ref).await {
                Ok(()) => released += 1,
                Err(e) => tracing::error!("Gagal release content purchase {}: {}", row.id, e),
            }
        }

        Ok(released)
    }

    async fn release_one(
        &self,
        purchase_id: i32,
        author_id: i32,
        purchase_ref: &str,
    ) -> Result<(), AppError> {
        let mut tx = self.pool.begin().await?;

        let net = payment_repo::mark_released_for_subject(
            &mut tx,
            SubjectKind::ContentPurchase,
            purchase_id,
        )
        .await?;
        ledger_repo::release_to_available(&mut tx, author_id, net).await?;
        increment_seller_stats(&mut tx, author_id).await?;
        payment_repo::record_transaction_log(
            &mut tx,
            "release",
            author_id,
            None,
            net,
            None,
            Some(net),
            "completed",
            &format!("Release dana content purchase {}", purchase_ref),
        )
        .await?;

        tx.commit().await?;

        Ok(())
    }
}
