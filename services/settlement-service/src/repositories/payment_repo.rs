use crate::domain::content::{self, ContentEvent};
use crate::domain::ledger::CommissionConfig;
use crate::domain::order::{self, OrderEvent};
use crate::domain::payment::{
    GatewayEvent, Payment, PaymentMethod, PaymentStatus, ReconcileAction, SettleOutcome,
    SubjectKind, SubjectRef,
};
use crate::domain::service_order::{self, ServiceOrderEvent};
use crate::error::AppError;
use crate::repositories::{ledger_repo, required_target, sql_in_list};
use chrono::{DateTime, Utc};
use shared::Money;
use sqlx::{PgPool, Postgres, Transaction};

// Hasil reconciliation satu gateway event
#[derive(Debug)]
pub enum ReconcileOutcome {
    // Payment di-settle sekarang (side effects diterapkan tepat sekali)
    Settled(Payment),
    // Delivery duplikat, tanpa side effect
    Duplicate(Payment),
    // Event basi yang bertentangan dengan hasil terminal, dibuang
    Discarded(Payment),
    // Event informational (mis. pending), cukup di-ack
    Acknowledged,
}

// Repository untuk entity Payment. Satu-satunya tempat yang memutasi
// payment dan memicu side effect ledger/transaksi.
#[derive(Clone)]
pub struct PaymentRepository {
    pool: PgPool,
    commission: CommissionConfig,
}

#[derive(Debug, sqlx::FromRow)]
struct PaymentRow {
    id: i32,
    payment_ref: String,
    payer_id: i32,
    order_id: Option<i32>,
    service_order_id: Option<i32>,
    content_purchase_id: Option<i32>,
    amount_minor: i64,
    currency: String,
    method: String,
    status: String,
    gateway_txn_id: Option<String>,
    net_minor: Option<i64>,
    released_at: Option<DateTime<Utc>>,
    proof_url: Option<String>,
    paid_at: Option<DateTime<Utc>>,
    expired_at: Option<DateTime<Utc>>,
    refunded_at: Option<DateTime<Utc>>,
    refund_reason: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

const PAYMENT_COLUMNS: &str =
    "id, payment_ref, payer_id, order_id, service_order_id, content_purchase_id, \
     amount_minor, currency, method, status, gateway_txn_id, net_minor, released_at, \
     proof_url, paid_at, expired_at, refunded_at, refund_reason, created_at, updated_at";

impl TryFrom<PaymentRow> for Payment {
    type Error = AppError;

    fn try_from(row: PaymentRow) -> Result<Self, Self::Error> {
        let status = PaymentStatus::from_str(&row.status)
            .ok_or_else(|| AppError::internal(format!("Status payment tidak dikenal: {}", row.status)))?;
        let method = PaymentMethod::from_str(&row.method)
            .ok_or_else(|| AppError::internal(format!("Metode payment tidak dikenal: {}", row.method)))?;

        Ok(Payment {
            id: row.id,
            payment_ref: row.payment_ref,
            payer_id: row.payer_id,
            order_id: row.order_id,
            service_order_id: row.service_order_id,
            content_purchase_id: row.content_purchase_id,
            amount_minor: row.amount_minor,
            currency: row.currency,
            method,
            status,
            gateway_txn_id: row.gateway_txn_id,
            net_minor: row.net_minor,
            released_at: row.released_at,
            proof_url: row.proof_url,
            paid_at: row.paid_at,
            expired_at: row.expired_at,
            refunded_at: row.refunded_at,
            refund_reason: row.refund_reason,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

// Info subject yang dibutuhkan saat membuat payment
struct SubjectInfo {
    amount_minor: i64,
    currency: String,
}

impl PaymentRepository {
    pub fn new(pool: PgPool, commission: CommissionConfig) -> Self {
        Self { pool, commission }
    }

    /// Buat payment pending untuk satu subject. Gagal dengan InvalidSubject
    /// kalau subject tidak dalam kondisi payable.
    pub async fn create(
        &self,
        payer_id: i32,
        subject: SubjectRef,
        method: PaymentMethod,
    ) -> Result<Payment, AppError> {
        let mut tx = self.pool.begin().await?;

        let info = self.validate_subject_payable(&mut tx, payer_id, subject).await?;

        // Satu payment aktif per subject; payment failed boleh diulang
        let subject_column = subject_column(subject.kind);
        let active: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(*) FROM payments WHERE {} = $1 AND status <> '{}'",
            subject_column,
            PaymentStatus::Failed.as_str()
        ))
        .bind(subject.id)
        .fetch_one(&mut *tx)
        .await?;

        if active > 0 {
            return Err(AppError::invalid_subject(
                "Sudah ada payment aktif untuk transaksi ini",
            ));
        }

        let payment_ref = Payment::generate_payment_ref(subject.kind);
        let expired_at = Payment::generate_expiry_time(method);

        let row = sqlx::query_as::<_, PaymentRow>(&format!(
            "INSERT INTO payments (
                payment_ref, payer_id, {}, amount_minor, currency, method, status,
                expired_at, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, 'pending', $7, NOW(), NOW())
            RETURNING {}",
            subject_column, PAYMENT_COLUMNS
        ))
        .bind(&payment_ref)
        .bind(payer_id)
        .bind(subject.id)
        .bind(info.amount_minor)
        .bind(&info.currency)
        .bind(method.as_str())
        .bind(expired_at)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::info!(
            "Payment created: {} ({} {}) untuk {} #{} oleh user {}",
            payment_ref,
            info.amount_minor,
            info.currency,
            subject.kind,
            subject.id,
            payer_id
        );

        row.try_into()
    }

    // Validasi subject payable + ownership; kembalikan nominal & earner
    async fn validate_subject_payable(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        payer_id: i32,
        subject: SubjectRef,
    ) -> Result<SubjectInfo, AppError> {
        #[derive(sqlx::FromRow)]
        struct SubjectRow {
            buyer_id: i32,
            amount_minor: i64,
            currency: String,
            status: String,
        }

        let query = match subject.kind {
            SubjectKind::Order => {
                "SELECT buyer_id, amount_minor, currency, status FROM orders WHERE id = $1"
            }
            SubjectKind::ServiceOrder => {
                "SELECT buyer_id, amount_minor, currency, status FROM service_orders WHERE id = $1"
            }
            SubjectKind::ContentPurchase => {
                "SELECT buyer_id, price_minor AS amount_minor, currency, status
                 FROM content_purchases WHERE id = $1"
            }
        };

        let row = sqlx::query_as::<_, SubjectRow>(query)
            .bind(subject.id)
            .fetch_optional(&mut **tx)
            .await?
            .ok_or_else(|| {
                AppError::invalid_subject(format!("{} #{} tidak ditemukan", subject.kind, subject.id))
            })?;

        if row.buyer_id != payer_id {
            return Err(AppError::forbidden(
                "Hanya buyer transaksi yang bisa membuat payment",
            ));
        }

        if row.status != "pending" {
            return Err(AppError::invalid_subject(format!(
                "Transaksi berstatus {} tidak bisa dibayar",
                row.status
            )));
        }

        if row.amount_minor <= 0 {
            return Err(AppError::invalid_subject(
                "Transaksi gratis tidak memerlukan payment",
            ));
        }

        Ok(SubjectInfo {
            amount_minor: row.amount_minor,
            currency: row.currency,
        })
    }

    pub async fn find_by_id(&self, id: i32) -> Result<Option<Payment>, AppError> {
        let row = sqlx::query_as::<_, PaymentRow>(&format!(
            "SELECT {} FROM payments WHERE id = $1",
            PAYMENT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Payment::try_from).transpose()
    }

    pub async fn find_by_ref(&self, payment_ref: &str) -> Result<Option<Payment>, AppError> {
        let row = sqlx::query_as::<_, PaymentRow>(&format!(
            "SELECT {} FROM payments WHERE payment_ref = $1",
            PAYMENT_COLUMNS
        ))
        .bind(payment_ref)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Payment::try_from).transpose()
    }

    pub async fn find_by_gateway_txn_id(
        &self,
        gateway_txn_id: &str,
    ) -> Result<Option<Payment>, AppError> {
        let row = sqlx::query_as::<_, PaymentRow>(&format!(
            "SELECT {} FROM payments WHERE gateway_txn_id = $1",
            PAYMENT_COLUMNS
        ))
        .bind(gateway_txn_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Payment::try_from).transpose()
    }

    /// pending -> processing, sekaligus mencatat gateway_txn_id.
    /// gateway_txn_id immutable begitu terisi.
    pub async fn begin_processing(
        &self,
        payment_id: i32,
        gateway_txn_id: &str,
    ) -> Result<Payment, AppError> {
        let target = PaymentStatus::Processing;
        let sources = sql_in_list(
            PaymentStatus::sources_to(target)
                .into_iter()
                .map(|s| s.as_str()),
        );

        let row = sqlx::query_as::<_, PaymentRow>(&format!(
            "UPDATE payments
             SET status = '{}',
                 gateway_txn_id = $2,
                 updated_at = NOW()
             WHERE id = $1 AND status IN ({}) AND gateway_txn_id IS NULL
             RETURNING {}",
            target.as_str(),
            sources,
            PAYMENT_COLUMNS
        ))
        .bind(payment_id)
        .bind(gateway_txn_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => row.try_into(),
            None => {
                let current = self
                    .find_by_id(payment_id)
                    .await?
                    .ok_or_else(|| AppError::not_found("Payment tidak ditemukan"))?;
                Err(AppError::invalid_transition(
                    current.status.as_str(),
                    "begin_processing",
                ))
            }
        }
    }

    /// pending -> pending_verification untuk metode manual proof
    pub async fn submit_proof(
        &self,
        payment_id: i32,
        payer_id: i32,
        proof_url: &str,
    ) -> Result<Payment, AppError> {
        let target = PaymentStatus::PendingVerification;
        let sources = sql_in_list(
            PaymentStatus::sources_to(target)
                .into_iter()
                .map(|s| s.as_str()),
        );

        let row = sqlx::query_as::<_, PaymentRow>(&format!(
            "UPDATE payments
             SET status = '{}',
                 proof_url = $3,
                 updated_at = NOW()
             WHERE id = $1 AND payer_id = $2 AND method = '{}' AND status IN ({})
             RETURNING {}",
            target.as_str(),
            PaymentMethod::ManualProof.as_str(),
            sources,
            PAYMENT_COLUMNS
        ))
        .bind(payment_id)
        .bind(payer_id)
        .bind(proof_url)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => row.try_into(),
            None => {
                let current = self
                    .find_by_id(payment_id)
                    .await?
                    .ok_or_else(|| AppError::not_found("Payment tidak ditemukan"))?;
                if current.payer_id != payer_id {
                    return Err(AppError::forbidden("Bukan payment milik Anda"));
                }
                if current.method != PaymentMethod::ManualProof {
                    return Err(AppError::validation(
                        "Upload bukti hanya untuk metode manual_proof",
                    ));
                }
                Err(AppError::invalid_transition(
                    current.status.as_str(),
                    "submit_proof",
                ))
            }
        }
    }

    /// Satu-satunya jalur ke status terminal. Idempotent: payment yang
    /// sudah terminal dikembalikan apa adanya tanpa side effect kedua.
    /// CAS pada kolom status membuat settle aman di bawah delivery
    /// webhook konkuren. Return kedua = apakah settlement diterapkan.
    pub async fn settle(
        &self,
        payment_id: i32,
        outcome: SettleOutcome,
        gateway_txn_id: Option<&str>,
    ) -> Result<(Payment, bool), AppError> {
        let mut tx = self.pool.begin().await?;

        let terminal = outcome.terminal_status();
        let sources = sql_in_list(
            PaymentStatus::sources_to(terminal)
                .into_iter()
                .map(|s| s.as_str()),
        );
        let row = sqlx::query_as::<_, PaymentRow>(&format!(
            "UPDATE payments
             SET status = $2,
                 paid_at = CASE WHEN $2 = '{}' THEN NOW() ELSE paid_at END,
                 gateway_txn_id = COALESCE(gateway_txn_id, $3),
                 updated_at = NOW()
             WHERE id = $1 AND status IN ({})
             RETURNING {}",
            PaymentStatus::Completed.as_str(),
            sources,
            PAYMENT_COLUMNS
        ))
        .bind(payment_id)
        .bind(terminal.as_str())
        .bind(gateway_txn_id)
        .fetch_optional(&mut *tx)
        .await?;

        let row = match row {
            Some(row) => row,
            None => {
                // CAS kalah: payment sudah terminal (duplikat) atau tidak ada
                tx.rollback().await?;
                let existing = self
                    .find_by_id(payment_id)
                    .await?
                    .ok_or_else(|| AppError::not_found("Payment tidak ditemukan"))?;
                if existing.status.is_terminal() {
                    tracing::info!(
                        "Settle no-op: payment {} sudah {} (duplicate delivery)",
                        existing.payment_ref,
                        existing.status
                    );
                    return Ok((existing, false));
                }
                return Err(AppError::internal(format!(
                    "Settle CAS gagal untuk payment {} berstatus {}",
                    existing.payment_ref, existing.status
                )));
            }
        };

        let mut payment: Payment = row.try_into()?;

        match outcome {
            SettleOutcome::Success => {
                let net = self.apply_success_side_effects(&mut tx, &payment).await?;
                payment.net_minor = Some(net);
            }
            SettleOutcome::Failure => {
                // Subject sengaja dibiarkan: order/jasa tetap pending dan
                // payment bisa diulang; tidak ada efek ledger.
                tracing::info!("Payment {} settled failed", payment.payment_ref);
            }
        }

        tx.commit().await?;

        Ok((payment, true))
    }

    // Side effect sukses: advance transaksi pemilik + kredit pending earner,
    // semuanya dalam transaksi database yang sama dengan CAS status.
    async fn apply_success_side_effects(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        payment: &Payment,
    ) -> Result<i64, AppError> {
        let subject = payment
            .subject()
            .ok_or_else(|| AppError::internal("Payment tanpa subject reference"))?;

        #[derive(sqlx::FromRow)]
        struct EarnerRow {
            earner_id: i32,
        }

        let earner = match subject.kind {
            SubjectKind::Order => {
                let event = OrderEvent::PaymentConfirmed;
                let target = required_target(order::event_target(event), event.as_str())?;
                let sources =
                    sql_in_list(order::event_sources(event).into_iter().map(|s| s.as_str()));
                sqlx::query_as::<_, EarnerRow>(&format!(
                    "UPDATE orders
                     SET status = '{}', paid_at = NOW(), updated_at = NOW()
                     WHERE id = $1 AND status IN ({})
                     RETURNING seller_id AS earner_id",
                    target.as_str(),
                    sources
                ))
                .bind(subject.id)
                .fetch_optional(&mut **tx)
                .await?
            }
            SubjectKind::ServiceOrder => {
                // Edge payment_confirmed adalah self-loop: status tetap
                // pending menunggu acceptance provider, paid_at adalah
                // guard untuk accept
                let event = ServiceOrderEvent::PaymentConfirmed;
                let sources = sql_in_list(
                    service_order::event_sources(event)
                        .into_iter()
                        .map(|s| s.as_str()),
                );
                sqlx::query_as::<_, EarnerRow>(&format!(
                    "UPDATE service_orders
                     SET paid_at = NOW(), updated_at = NOW()
                     WHERE id = $1 AND status IN ({}) AND paid_at IS NULL
                     RETURNING provider_id AS earner_id",
                    sources
                ))
                .bind(subject.id)
                .fetch_optional(&mut **tx)
                .await?
            }
            SubjectKind::ContentPurchase => {
                // Access window berjalan sejak aktivasi
                let event = ContentEvent::PaymentConfirmed;
                let target = required_target(content::event_target(event), event.as_str())?;
                let sources =
                    sql_in_list(content::event_sources(event).into_iter().map(|s| s.as_str()));
                sqlx::query_as::<_, EarnerRow>(&format!(
                    "UPDATE content_purchases
                     SET status = '{}',
                         activated_at = NOW(),
                         expires_at = CASE
                             WHEN access_type = 'expires' THEN NOW() + make_interval(days => access_days)
                             ELSE NULL
                         END,
                         updated_at = NOW()
                     WHERE id = $1 AND status IN ({})
                     RETURNING author_id AS earner_id",
                    target.as_str(),
                    sources
                ))
                .bind(subject.id)
                .fetch_optional(&mut **tx)
                .await?
            }
        };

        let earner = earner.ok_or_else(|| {
            AppError::invalid_transition(
                subject.kind.as_str(),
                "payment_confirmed (transaksi tidak lagi menunggu pembayaran)",
            )
        })?;

        let gross = Money {
            amount_minor: payment.amount_minor,
            currency: payment.currency.clone(),
        };
        let net = self.commission.earner_net(&gross, subject.kind);

        ledger_repo::credit_pending(tx, earner.earner_id, net.amount_minor).await?;

        sqlx::query("UPDATE payments SET net_minor = $2 WHERE id = $1")
            .bind(payment.id)
            .bind(net.amount_minor)
            .execute(&mut **tx)
            .await?;

        record_transaction_log(
            tx,
            "settlement",
            earner.earner_id,
            Some(payment.id),
            payment.amount_minor,
            Some(payment.amount_minor - net.amount_minor),
            Some(net.amount_minor),
            "completed",
            &format!("Settlement {} untuk {} #{}", payment.payment_ref, subject.kind, subject.id),
        )
        .await?;

        tracing::info!(
            "Payment {} settled sukses: earner {} dikredit pending {}",
            payment.payment_ref,
            earner.earner_id,
            net.format_major()
        );

        Ok(net.amount_minor)
    }

    /// Titik masuk tunggal untuk gateway event (webhook atau konfirmasi
    /// sinkron). Dedup berdasarkan gateway_txn_id sebagai idempotency key.
    pub async fn reconcile(&self, event: &GatewayEvent) -> Result<ReconcileOutcome, AppError> {
        let outcome = match event.outcome {
            Some(outcome) => outcome,
            None => {
                tracing::debug!(
                    "Gateway event informational ({}) untuk {}, di-ack saja",
                    event.raw_status,
                    event.payment_ref
                );
                return Ok(ReconcileOutcome::Acknowledged);
            }
        };

        let payment = self
            .find_by_gateway_txn_id(&event.gateway_txn_id)
            .await?
            .ok_or_else(|| AppError::UnknownTransaction(event.gateway_txn_id.clone()))?;

        match ReconcileAction::decide(payment.status, outcome) {
            ReconcileAction::Settle => {
                let (payment, applied) = self
                    .settle(payment.id, outcome, Some(&event.gateway_txn_id))
                    .await?;
                if applied {
                    Ok(ReconcileOutcome::Settled(payment))
                } else {
                    // Webhook konkuren menang duluan
                    Ok(ReconcileOutcome::Duplicate(payment))
                }
            }
            ReconcileAction::DuplicateNoop => {
                tracing::info!(
                    "Duplicate webhook untuk payment {} ({}), no-op",
                    payment.payment_ref,
                    payment.status
                );
                Ok(ReconcileOutcome::Duplicate(payment))
            }
            ReconcileAction::DiscardStale => {
                tracing::warn!(
                    "Gateway event {} dibuang: payment {} sudah {} (success wins)",
                    event.raw_status,
                    payment.payment_ref,
                    payment.status
                );
                Ok(ReconcileOutcome::Discarded(payment))
            }
        }
    }

    /// Refund eksplisit untuk transaksi yang sudah dibayar. Bukan reuse
    /// jalur cancel: payment -> refunded, transaksi pemilik -> refunded /
    /// cancelled, dan dana earner ditarik kembali — satu transaksi database.
    pub async fn refund(&self, payment_ref: &str, reason: &str) -> Result<Payment, AppError> {
        let target = PaymentStatus::Refunded;
        let sources = sql_in_list(
            PaymentStatus::sources_to(target)
                .into_iter()
                .map(|s| s.as_str()),
        );

        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, PaymentRow>(&format!(
            "UPDATE payments
             SET status = '{}', refunded_at = NOW(), refund_reason = $2, updated_at = NOW()
             WHERE payment_ref = $1 AND status IN ({})
             RETURNING {}",
            target.as_str(),
            sources,
            PAYMENT_COLUMNS
        ))
        .bind(payment_ref)
        .bind(reason)
        .fetch_optional(&mut *tx)
        .await?;

        let row = match row {
            Some(row) => row,
            None => {
                tx.rollback().await?;
                let existing = self
                    .find_by_ref(payment_ref)
                    .await?
                    .ok_or_else(|| AppError::not_found("Payment tidak ditemukan"))?;
                if existing.status == PaymentStatus::Refunded {
                    return Err(AppError::already_processed("Payment sudah direfund"));
                }
                return Err(AppError::invalid_transition(
                    existing.status.as_str(),
                    "refund",
                ));
            }
        };

        let payment: Payment = row.try_into()?;
        let subject = payment
            .subject()
            .ok_or_else(|| AppError::internal("Payment tanpa subject reference"))?;
        let net = payment
            .net_minor
            .ok_or_else(|| AppError::internal("Payment completed tanpa net_minor"))?;

        let earner_id = self.refund_subject(&mut tx, subject, reason).await?;

        // Dana ditarik dari bucket tempat dana itu berada sekarang
        if payment.released_at.is_some() {
            ledger_repo::reverse_available(&mut tx, earner_id, net).await?;
        } else {
            ledger_repo::reverse_pending(&mut tx, earner_id, net).await?;
        }

        record_transaction_log(
            &mut tx,
            "refund",
            earner_id,
            Some(payment.id),
            payment.amount_minor,
            None,
            Some(-net),
            "completed",
            &format!("Refund {}: {}", payment.payment_ref, reason),
        )
        .await?;

        tx.commit().await?;

        tracing::info!("Payment {} direfund: {}", payment.payment_ref, reason);

        Ok(payment)
    }

    // Advance transaksi pemilik saat refund; kembalikan earner id
    async fn refund_subject(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        subject: SubjectRef,
        reason: &str,
    ) -> Result<i32, AppError> {
        #[derive(sqlx::FromRow)]
        struct EarnerRow {
            earner_id: i32,
        }

        let earner = match subject.kind {
            SubjectKind::Order => {
                let event = OrderEvent::Refund;
                let target = required_target(order::event_target(event), event.as_str())?;
                let sources =
                    sql_in_list(order::event_sources(event).into_iter().map(|s| s.as_str()));
                sqlx::query_as::<_, EarnerRow>(&format!(
                    "UPDATE orders
                     SET status = '{}', refunded_at = NOW(), updated_at = NOW()
                     WHERE id = $1 AND status IN ({})
                     RETURNING seller_id AS earner_id",
                    target.as_str(),
                    sources
                ))
                .bind(subject.id)
                .fetch_optional(&mut **tx)
                .await?
            }
            SubjectKind::ServiceOrder => {
                // Dua edge tabel sekaligus: refund dari completed, atau
                // pembatalan order yang sudah dibayar tapi belum dikerjakan
                // (cancel-after-payment = jalur refund ini, bukan reuse
                // jalur cancel biasa)
                let refund_target = required_target(
                    service_order::event_target(ServiceOrderEvent::Refund),
                    ServiceOrderEvent::Refund.as_str(),
                )?;
                let cancel_target = required_target(
                    service_order::event_target(ServiceOrderEvent::BuyerCancelled),
                    ServiceOrderEvent::BuyerCancelled.as_str(),
                )?;
                let refund_from = sql_in_list(
                    service_order::event_sources(ServiceOrderEvent::Refund)
                        .into_iter()
                        .map(|s| s.as_str()),
                );
                let cancel_from = sql_in_list(
                    service_order::event_sources(ServiceOrderEvent::BuyerCancelled)
                        .into_iter()
                        .map(|s| s.as_str()),
                );
                sqlx::query_as::<_, EarnerRow>(&format!(
                    "UPDATE service_orders
                     SET status = CASE WHEN status IN ({rf}) THEN '{rt}' ELSE '{ct}' END,
                         refunded_at = CASE WHEN status IN ({rf}) THEN NOW() ELSE refunded_at END,
                         cancelled_at = CASE WHEN status NOT IN ({rf}) THEN NOW() ELSE cancelled_at END,
                         cancel_reason = CASE WHEN status NOT IN ({rf}) THEN $2 ELSE cancel_reason END,
                         updated_at = NOW()
                     WHERE id = $1 AND status IN ({rf}, {cf})
                     RETURNING provider_id AS earner_id",
                    rf = refund_from,
                    rt = refund_target.as_str(),
                    ct = cancel_target.as_str(),
                    cf = cancel_from
                ))
                .bind(subject.id)
                .bind(reason)
                .fetch_optional(&mut **tx)
                .await?
            }
            SubjectKind::ContentPurchase => {
                let event = ContentEvent::Refund;
                let target = required_target(content::event_target(event), event.as_str())?;
                let sources =
                    sql_in_list(content::event_sources(event).into_iter().map(|s| s.as_str()));
                sqlx::query_as::<_, EarnerRow>(&format!(
                    "UPDATE content_purchases
                     SET status = '{}', refunded_at = NOW(), updated_at = NOW()
                     WHERE id = $1 AND status IN ({})
                     RETURNING author_id AS earner_id",
                    target.as_str(),
                    sources
                ))
                .bind(subject.id)
                .fetch_optional(&mut **tx)
                .await?
            }
        };

        earner
            .map(|e| e.earner_id)
            .ok_or_else(|| {
                AppError::invalid_transition(subject.kind.as_str(), "refund (status tidak eligible)")
            })
    }

    /// Refund berdasarkan subject: cari payment completed milik transaksi
    /// lalu jalankan jalur refund biasa
    pub async fn refund_for_subject(
        &self,
        subject: SubjectRef,
        reason: &str,
    ) -> Result<Payment, AppError> {
        let payment_ref: Option<String> = sqlx::query_scalar(&format!(
            "SELECT payment_ref FROM payments WHERE {} = $1 AND status = '{}'",
            subject_column(subject.kind),
            PaymentStatus::Completed.as_str()
        ))
        .bind(subject.id)
        .fetch_optional(&self.pool)
        .await?;

        let payment_ref = payment_ref.ok_or_else(|| {
            AppError::invalid_subject("Tidak ada payment completed untuk transaksi ini")
        })?;

        self.refund(&payment_ref, reason).await
    }

    /// Settle failed payment aktif milik satu subject (dipanggil saat
    /// buyer membatalkan transaksi sebelum pembayaran selesai), supaya
    /// gateway event yang datang belakangan terbuang sebagai stale.
    pub async fn fail_active_for_subject(
        &self,
        subject: SubjectRef,
    ) -> Result<Option<Payment>, AppError> {
        let active = sql_in_list(
            PaymentStatus::sources_to(PaymentStatus::Failed)
                .into_iter()
                .map(|s| s.as_str()),
        );
        let id: Option<i32> = sqlx::query_scalar(&format!(
            "SELECT id FROM payments
             WHERE {} = $1 AND status IN ({})",
            subject_column(subject.kind),
            active
        ))
        .bind(subject.id)
        .fetch_optional(&self.pool)
        .await?;

        match id {
            Some(id) => {
                let (payment, _) = self.settle(id, SettleOutcome::Failure, None).await?;
                Ok(Some(payment))
            }
            None => Ok(None),
        }
    }

    /// Scheduler: settle failed semua payment non-terminal yang sudah
    /// melewati batas waktu pembayaran
    pub async fn expire_overdue(&self) -> Result<u64, AppError> {
        let active = sql_in_list(
            PaymentStatus::sources_to(PaymentStatus::Failed)
                .into_iter()
                .map(|s| s.as_str()),
        );
        let ids: Vec<i32> = sqlx::query_scalar(&format!(
            "SELECT id FROM payments
             WHERE status IN ({})
               AND expired_at IS NOT NULL AND expired_at < NOW()
             ORDER BY expired_at
             LIMIT 100",
            active
        ))
        .fetch_all(&self.pool)
        .await?;

        let mut expired = 0;
        for id in ids {
            // settle idempotent; webhook sukses yang menang duluan aman
            match self.settle(id, SettleOutcome::Failure, None).await {
                Ok((_, true)) => expired += 1,
                Ok((_, false)) => {}
                Err(e) => {
                    tracing::error!("Gagal expire payment {}: {}", id, e);
                }
            }
        }

        Ok(expired)
    }
}

fn subject_column(kind: SubjectKind) -> &'static str {
    match kind {
        SubjectKind::Order => "order_id",
        SubjectKind::ServiceOrder => "service_order_id",
        SubjectKind::ContentPurchase => "content_purchase_id",
    }
}

/// Pindahkan dana payment completed dari pending ke available tepat sekali.
/// Guard released_at IS NULL mencegah double release; kembalikan net yang
/// harus di-release.
pub async fn mark_released_for_subject(
    tx: &mut Transaction<'_, Postgres>,
    kind: SubjectKind,
    subject_id: i32,
) -> Result<i64, AppError> {
    let net: Option<i64> = sqlx::query_scalar::<_, Option<i64>>(&format!(
        "UPDATE payments
         SET released_at = NOW(), updated_at = NOW()
         WHERE {} = $1 AND status = '{}' AND released_at IS NULL
         RETURNING net_minor",
        subject_column(kind),
        PaymentStatus::Completed.as_str()
    ))
    .bind(subject_id)
    .fetch_optional(&mut **tx)
    .await?
    .flatten();

    net.ok_or_else(|| {
        AppError::internal(format!(
            "Tidak ada payment completed yang belum direlease untuk {} #{}",
            kind, subject_id
        ))
    })
}

/// Catat satu baris audit di transaction_logs
#[allow(clippy::too_many_arguments)]
pub async fn record_transaction_log(
    tx: &mut Transaction<'_, Postgres>,
    transaction_type: &str,
    user_id: i32,
    payment_id: Option<i32>,
    amount_minor: i64,
    commission_minor: Option<i64>,
    net_minor: Option<i64>,
    status: &str,
    notes: &str,
) -> Result<(), AppError> {
    sqlx::query(
        "INSERT INTO transaction_logs
            (transaction_type, user_id, payment_id, amount_minor, commission_minor, net_minor, status, notes, created_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, NOW())",
    )
    .bind(transaction_type)
    .bind(user_id)
    .bind(payment_id)
    .bind(amount_minor)
    .bind(commission_minor)
    .bind(net_minor)
    .bind(status)
    .bind(notes)
    .execute(&mut **tx)
    .await?;

    Ok(())
}
