use crate::domain::payment::SubjectKind;
use crate::domain::service_order::{
    self, ServiceOrder, ServiceOrderEvent, ServiceOrderStatus, IN_FLIGHT_STATUSES,
};
use crate::error::AppError;
use crate::repositories::order_repo::increment_seller_stats;
use crate::repositories::{ledger_repo, payment_repo, required_target, sql_in_list};
use chrono::{DateTime, Utc};
use sqlx::PgPool;

// Repository untuk service order (jasa freelance)
#[derive(Clone)]
pub struct ServiceOrderRepository {
    pool: PgPool,
    // Backpressure: ceiling order in-flight per provider
    provider_capacity: i64,
    default_revisions: i32,
    delivery_days: i64,
}

#[derive(Debug, sqlx::FromRow)]
struct ServiceOrderRow {
    id: i32,
    order_ref: String,
    buyer_id: i32,
    provider_id: i32,
    title: String,
    brief: Option<String>,
    amount_minor: i64,
    currency: String,
    status: String,
    revisions_remaining: i32,
    delivery_due_at: Option<DateTime<Utc>>,
    cancel_reason: Option<String>,
    created_at: DateTime<Utc>,
    paid_at: Option<DateTime<Utc>>,
    accepted_at: Option<DateTime<Utc>>,
    delivered_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    cancelled_at: Option<DateTime<Utc>>,
    refunded_at: Option<DateTime<Utc>>,
    updated_at: DateTime<Utc>,
}

const SERVICE_ORDER_COLUMNS: &str =
    "id, order_ref, buyer_id, provider_id, title, brief, amount_minor, currency, status, \
     revisions_remaining, delivery_due_at, cancel_reason, created_at, paid_at, accepted_at, \
     delivered_at, completed_at, cancelled_at, refunded_at, updated_at";

impl TryFrom<ServiceOrderRow> for ServiceOrder {
    type Error = AppError;

    fn try_from(row: ServiceOrderRow) -> Result<Self, Self::Error> {
        let status = ServiceOrderStatus::from_str(&row.status).ok_or_else(|| {
            AppError::internal(format!("Status service order tidak dikenal: {}", row.status))
        })?;

        Ok(ServiceOrder {
            id: row.id,
            order_ref: row.order_ref,
            buyer_id: row.buyer_id,
            provider_id: row.provider_id,
            title: row.title,
            brief: row.brief,
            amount_minor: row.amount_minor,
            currency: row.currency,
            status,
            revisions_remaining: row.revisions_remaining,
            delivery_due_at: row.delivery_due_at,
            cancel_reason: row.cancel_reason,
            created_at: row.created_at,
            paid_at: row.paid_at,
            accepted_at: row.accepted_at,
            delivered_at: row.delivered_at,
            completed_at: row.completed_at,
            cancelled_at: row.cancelled_at,
            refunded_at: row.refunded_at,
            updated_at: row.updated_at,
        })
    }
}

impl ServiceOrderRepository {
    pub fn new(
        pool: PgPool,
        provider_capacity: i64,
        default_revisions: i32,
        delivery_days: i64,
    ) -> Self {
        Self {
            pool,
            provider_capacity,
            default_revisions,
            delivery_days,
        }
    }

    /// Buat service order baru. Conditional INSERT menolak order baru
    /// begitu in-flight count provider menyentuh ceiling (backpressure,
    /// bukan sekadar courtesy limit).
    pub async fn create(
        &self,
        buyer_id: i32,
        provider_id: i32,
        title: &str,
        brief: Option<&str>,
        amount_minor: i64,
        currency: &str,
    ) -> Result<ServiceOrder, AppError> {
        if buyer_id == provider_id {
            return Err(AppError::validation("Tidak bisa memesan jasa sendiri"));
        }
        if !shared::utils::validation::is_valid_amount(amount_minor) {
            return Err(AppError::validation("Nominal order tidak valid"));
        }
        if title.trim().is_empty() {
            return Err(AppError::validation("Judul order wajib diisi"));
        }

        let order_ref = ServiceOrder::generate_order_ref();
        let in_flight = sql_in_list(IN_FLIGHT_STATUSES.into_iter().map(|s| s.as_str()));

        let row = sqlx::query_as::<_, ServiceOrderRow>(&format!(
            "INSERT INTO service_orders (
                order_ref, buyer_id, provider_id, title, brief, amount_minor, currency,
                status, revisions_remaining, created_at, updated_at
            )
            SELECT $1, $2, $3, $4, $5, $6, $7, 'pending', $8, NOW(), NOW()
            WHERE (
                SELECT COUNT(*) FROM service_orders
                WHERE provider_id = $3 AND status IN ({})
            ) < $9
            RETURNING {}",
            in_flight, SERVICE_ORDER_COLUMNS
        ))
        .bind(&order_ref)
        .bind(buyer_id)
        .bind(provider_id)
        .bind(title)
        .bind(brief)
        .bind(amount_minor)
        .bind(currency)
        .bind(self.default_revisions)
        .bind(self.provider_capacity)
        .fetch_optional(&self.pool)
        .await?;

        let row = row.ok_or_else(|| {
            AppError::ProviderAtCapacity(format!(
                "Provider sedang penuh (maksimum {} order berjalan)",
                self.provider_capacity
            ))
        })?;

        tracing::info!(
            "Service order created: {} buyer {} -> provider {}",
            order_ref,
            buyer_id,
            provider_id
        );

        row.try_into()
    }

    pub async fn find_by_id(&self, id: i32) -> Result<Option<ServiceOrder>, AppError> {
        let row = sqlx::query_as::<_, ServiceOrderRow>(&format!(
            "SELECT {} FROM service_orders WHERE id = $1",
            SERVICE_ORDER_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(ServiceOrder::try_from).transpose()
    }

    /// Provider menerima order. Hanya order yang sudah dibayar; deadline
    /// delivery dihitung dari saat acceptance.
    pub async fn accept(&self, id: i32, provider_id: i32) -> Result<ServiceOrder, AppError> {
        let event = ServiceOrderEvent::ProviderAccepted;
        let target = required_target(service_order::event_target(event), event.as_str())?;
        let sources = sql_in_list(
            service_order::event_sources(event)
                .into_iter()
                .map(|s| s.as_str()),
        );

        let row = sqlx::query_as::<_, ServiceOrderRow>(&format!(
            "UPDATE service_orders
             SET status = '{}',
                 accepted_at = NOW(),
                 delivery_due_at = NOW() + make_interval(days => $3::int),
                 updated_at = NOW()
             WHERE id = $1 AND provider_id = $2 AND status IN ({}) AND paid_at IS NOT NULL
             RETURNING {}",
            target.as_str(),
            sources,
            SERVICE_ORDER_COLUMNS
        ))
        .bind(id)
        .bind(provider_id)
        .bind(self.delivery_days as i32)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let order: ServiceOrder = row.try_into()?;
                tracing::info!("Service order {} diterima provider {}", order.order_ref, provider_id);
                Ok(order)
            }
            None => {
                let existing = self.require(id).await?;
                if existing.provider_id != provider_id {
                    return Err(AppError::forbidden("Bukan order untuk provider Anda"));
                }
                if existing.status == ServiceOrderStatus::Pending && !existing.is_paid() {
                    return Err(AppError::validation(
                        "Order belum dibayar, belum bisa diterima",
                    ));
                }
                Err(AppError::invalid_transition(
                    existing.status.as_str(),
                    event.as_str(),
                ))
            }
        }
    }

    /// Provider mulai mengerjakan
    pub async fn start_work(&self, id: i32, provider_id: i32) -> Result<ServiceOrder, AppError> {
        self.provider_transition(id, provider_id, ServiceOrderEvent::WorkStarted)
            .await
    }

    /// Provider mengirim hasil kerja (delivery awal atau redelivery
    /// setelah revisi; tabel mengizinkan keduanya lewat event yang sama)
    pub async fn deliver(&self, id: i32, provider_id: i32) -> Result<ServiceOrder, AppError> {
        self.provider_transition(id, provider_id, ServiceOrderEvent::WorkDelivered)
            .await
    }

    /// Provider kembali mengerjakan setelah revision request
    pub async fn resume_work(&self, id: i32, provider_id: i32) -> Result<ServiceOrder, AppError> {
        self.provider_transition(id, provider_id, ServiceOrderEvent::WorkResumed)
            .await
    }

    // CAS transisi status yang dimiliki provider; state asal dan tujuan
    // diturunkan dari tabel transisi domain
    async fn provider_transition(
        &self,
        id: i32,
        provider_id: i32,
        event: ServiceOrderEvent,
    ) -> Result<ServiceOrder, AppError> {
        let target = required_target(service_order::event_target(event), event.as_str())?;
        let sources = sql_in_list(
            service_order::event_sources(event)
                .into_iter()
                .map(|s| s.as_str()),
        );
        let delivered_set = if target == ServiceOrderStatus::Delivered {
            "delivered_at = NOW(),"
        } else {
            ""
        };

        let row = sqlx::query_as::<_, ServiceOrderRow>(&format!(
            "UPDATE service_orders
             SET status = '{}',
                 {}
                 updated_at = NOW()
             WHERE id = $1 AND provider_id = $2 AND status IN ({})
             RETURNING {}",
            target.as_str(),
            delivered_set,
            sources,
            SERVICE_ORDER_COLUMNS
        ))
        .bind(id)
        .bind(provider_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => row.try_into(),
            None => {
                let existing = self.require(id).await?;
                if existing.provider_id != provider_id {
                    return Err(AppError::forbidden("Bukan order untuk provider Anda"));
                }
                Err(AppError::invalid_transition(
                    existing.status.as_str(),
                    event.as_str(),
                ))
            }
        }
    }

    /// Buyer menyetujui hasil delivery: order completed + release dana
    /// provider, satu transaksi database.
    pub async fn approve(&self, id: i32, buyer_id: i32) -> Result<ServiceOrder, AppError> {
        let event = ServiceOrderEvent::BuyerApproved;
        let target = required_target(service_order::event_target(event), event.as_str())?;
        let sources = sql_in_list(
            service_order::event_sources(event)
                .into_iter()
                .map(|s| s.as_str()),
        );

        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, ServiceOrderRow>(&format!(
            "UPDATE service_orders
             SET status = '{}', completed_at = NOW(), updated_at = NOW()
             WHERE id = $1 AND buyer_id = $2 AND status IN ({})
             RETURNING {}",
            target.as_str(),
            sources,
            SERVICE_ORDER_COLUMNS
        ))
        .bind(id)
        .bind(buyer_id)
        .fetch_optional(&mut *tx)
        .await?;

        let row = match row {
            Some(row) => row,
            None => {
                tx.rollback().await?;
                let existing = self.require(id).await?;
                if existing.buyer_id != buyer_id {
                    return Err(AppError::forbidden("Bukan order milik Anda"));
                }
                return Err(AppError::invalid_transition(
                    existing.status.as_str(),
                    event.as_str(),
                ));
            }
        };

        let order: ServiceOrder = row.try_into()?;

        let net =
            payment_repo::mark_released_for_subject(&mut tx, SubjectKind::ServiceOrder, id).await?;
        ledger_repo::release_to_available(&mut tx, order.provider_id, net).await?;
        increment_seller_stats(&mut tx, order.provider_id).await?;
        payment_repo::record_transaction_log(
            &mut tx,
            "release",
            order.provider_id,
            None,
            net,
            None,
            Some(net),
            "completed",
            &format!("Release dana service order {}", order.order_ref),
        )
        .await?;

        tx.commit().await?;

        tracing::info!(
            "Service order {} completed, provider {} menerima {} di available",
            order.order_ref,
            order.provider_id,
            net
        );

        Ok(order)
    }

    /// Buyer meminta revisi. Counter berkurang atomik dengan transisi
    /// status; di nol permintaan ditolak NoRevisionsRemaining.
    pub async fn request_revision(&self, id: i32, buyer_id: i32) -> Result<ServiceOrder, AppError> {
        let event = ServiceOrderEvent::RevisionRequested;
        let target = required_target(service_order::event_target(event), event.as_str())?;
        let sources = sql_in_list(
            service_order::event_sources(event)
                .into_iter()
                .map(|s| s.as_str()),
        );

        let row = sqlx::query_as::<_, ServiceOrderRow>(&format!(
            "UPDATE service_orders
             SET status = '{}',
                 revisions_remaining = revisions_remaining - 1,
                 updated_at = NOW()
             WHERE id = $1 AND buyer_id = $2 AND status IN ({}) AND revisions_remaining > 0
             RETURNING {}",
            target.as_str(),
            sources,
            SERVICE_ORDER_COLUMNS
        ))
        .bind(id)
        .bind(buyer_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let order: ServiceOrder = row.try_into()?;
                tracing::info!(
                    "Revision diminta untuk {} (sisa {})",
                    order.order_ref,
                    order.revisions_remaining
                );
                Ok(order)
            }
            None => {
                let existing = self.require(id).await?;
                if existing.buyer_id != buyer_id {
                    return Err(AppError::forbidden("Bukan order milik Anda"));
                }
                if existing.status == ServiceOrderStatus::Delivered
                    && existing.revisions_remaining == 0
                {
                    return Err(AppError::NoRevisionsRemaining);
                }
                Err(AppError::invalid_transition(
                    existing.status.as_str(),
                    event.as_str(),
                ))
            }
        }
    }

    /// Pembatalan order yang belum dibayar (pending). Pembatalan setelah
    /// pembayaran adalah jalur refund eksplisit, bukan jalur ini.
    pub async fn cancel_unpaid(
        &self,
        id: i32,
        buyer_id: i32,
        reason: &str,
    ) -> Result<ServiceOrder, AppError> {
        let event = ServiceOrderEvent::BuyerCancelled;
        let target = required_target(service_order::event_target(event), event.as_str())?;
        let sources = sql_in_list(
            service_order::event_sources(event)
                .into_iter()
                .map(|s| s.as_str()),
        );

        let row = sqlx::query_as::<_, ServiceOrderRow>(&format!(
            "UPDATE service_orders
             SET status = '{}', cancelled_at = NOW(), cancel_reason = $3, updated_at = NOW()
             WHERE id = $1 AND buyer_id = $2 AND status IN ({}) AND paid_at IS NULL
             RETURNING {}",
            target.as_str(),
            sources,
            SERVICE_ORDER_COLUMNS
        ))
        .bind(id)
        .bind(buyer_id)
        .bind(reason)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => row.try_into(),
            None => {
                let existing = self.require(id).await?;
                if existing.buyer_id != buyer_id {
                    return Err(AppError::forbidden("Bukan order milik Anda"));
                }
                if existing.is_paid() && !existing.status.is_terminal() {
                    return Err(AppError::validation(
                        "Order sudah dibayar; gunakan jalur refund",
                    ));
                }
                Err(AppError::invalid_transition(
                    existing.status.as_str(),
                    event.as_str(),
                ))
            }
        }
    }

    async fn require(&self, id: i32) -> Result<ServiceOrder, AppError> {
        self.find_by_id(id)
            .await?
            .ok_or_else(|| AppError::not_found("Service order tidak ditemukan"))
    }
}
