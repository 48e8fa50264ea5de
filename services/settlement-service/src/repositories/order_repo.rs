use crate::domain::order::{self, Order, OrderEvent, OrderStatus};
use crate::domain::payment::SubjectKind;
use crate::error::AppError;
use crate::repositories::{ledger_repo, payment_repo, required_target, sql_in_list};
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};

// Repository untuk product order
#[derive(Clone)]
pub struct OrderRepository {
    pool: PgPool,
}

#[derive(Debug, sqlx::FromRow)]
struct OrderRow {
    id: i32,
    order_ref: String,
    buyer_id: i32,
    seller_id: i32,
    product_id: i32,
    quantity: i32,
    amount_minor: i64,
    currency: String,
    status: String,
    cancel_reason: Option<String>,
    created_at: DateTime<Utc>,
    paid_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    cancelled_at: Option<DateTime<Utc>>,
    refunded_at: Option<DateTime<Utc>>,
    updated_at: DateTime<Utc>,
}

const ORDER_COLUMNS: &str =
    "id, order_ref, buyer_id, seller_id, product_id, quantity, amount_minor, currency, \
     status, cancel_reason, created_at, paid_at, completed_at, cancelled_at, refunded_at, updated_at";

impl TryFrom<OrderRow> for Order {
    type Error = AppError;

    fn try_from(row: OrderRow) -> Result<Self, Self::Error> {
        let status = OrderStatus::from_str(&row.status)
            .ok_or_else(|| AppError::internal(format!("Status order tidak dikenal: {}", row.status)))?;

        Ok(Order {
            id: row.id,
            order_ref: row.order_ref,
            buyer_id: row.buyer_id,
            seller_id: row.seller_id,
            product_id: row.product_id,
            quantity: row.quantity,
            amount_minor: row.amount_minor,
            currency: row.currency,
            status,
            cancel_reason: row.cancel_reason,
            created_at: row.created_at,
            paid_at: row.paid_at,
            completed_at: row.completed_at,
            cancelled_at: row.cancelled_at,
            refunded_at: row.refunded_at,
            updated_at: row.updated_at,
        })
    }
}

impl OrderRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Buat order baru. Stock produk direserve atomik dalam transaksi
    /// yang sama; pembatalan sebelum bayar mengembalikannya.
    pub async fn create(
        &self,
        buyer_id: i32,
        product_id: i32,
        quantity: i32,
    ) -> Result<Order, AppError> {
        if quantity <= 0 {
            return Err(AppError::validation("Quantity harus lebih dari 0"));
        }

        let mut tx = self.pool.begin().await?;

        #[derive(sqlx::FromRow)]
        struct ProductRow {
            seller_id: i32,
            price_minor: i64,
            currency: String,
        }

        // Conditional UPDATE = reserve stock sekaligus cek ketersediaan
        let product = sqlx::query_as::<_, ProductRow>(
            "UPDATE products
             SET stock = stock - $2, updated_at = NOW()
             WHERE id = $1 AND stock >= $2
             RETURNING seller_id, price_minor, currency",
        )
        .bind(product_id)
        .bind(quantity)
        .fetch_optional(&mut *tx)
        .await?;

        let product = match product {
            Some(p) => p,
            None => {
                let exists: bool =
                    sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM products WHERE id = $1)")
                        .bind(product_id)
                        .fetch_one(&mut *tx)
                        .await?;
                if !exists {
                    return Err(AppError::not_found("Produk tidak ditemukan"));
                }
                return Err(AppError::validation("Stok produk tidak mencukupi"));
            }
        };

        if product.seller_id == buyer_id {
            return Err(AppError::validation("Tidak bisa membeli produk sendiri"));
        }

        let amount = (product.price_minor as i128 * quantity as i128) as i64;
        let order_ref = Order::generate_order_ref();

        let row = sqlx::query_as::<_, OrderRow>(&format!(
            "INSERT INTO orders (
                order_ref, buyer_id, seller_id, product_id, quantity,
                amount_minor, currency, status, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, 'pending', NOW(), NOW())
            RETURNING {}",
            ORDER_COLUMNS
        ))
        .bind(&order_ref)
        .bind(buyer_id)
        .bind(product.seller_id)
        .bind(product_id)
        .bind(quantity)
        .bind(amount)
        .bind(&product.currency)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::info!(
            "Order created: {} buyer {} -> seller {} ({} x produk {})",
            order_ref,
            buyer_id,
            product.seller_id,
            quantity,
            product_id
        );

        row.try_into()
    }

    pub async fn find_by_id(&self, id: i32) -> Result<Option<Order>, AppError> {
        let row = sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {} FROM orders WHERE id = $1",
            ORDER_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Order::try_from).transpose()
    }

    /// Buyer konfirmasi barang diterima: order completed + dana seller
    /// pindah pending -> available, tepat sekali.
    pub async fn mark_received(&self, order_id: i32, buyer_id: i32) -> Result<Order, AppError> {
        self.complete(order_id, Some(buyer_id)).await
    }

    async fn complete(&self, order_id: i32, expect_buyer: Option<i32>) -> Result<Order, AppError> {
        let event = match expect_buyer {
            Some(_) => OrderEvent::BuyerReceived,
            None => OrderEvent::AutoRelease,
        };
        let target = required_target(order::event_target(event), event.as_str())?;
        let sources = sql_in_list(order::event_sources(event).into_iter().map(|s| s.as_str()));

        let mut tx = self.pool.begin().await?;

        let row = match expect_buyer {
            Some(buyer_id) => {
                sqlx::query_as::<_, OrderRow>(&format!(
                    "UPDATE orders
                     SET status = '{}', completed_at = NOW(), updated_at = NOW()
                     WHERE id = $1 AND buyer_id = $2 AND status IN ({})
                     RETURNING {}",
                    target.as_str(),
                    sources,
                    ORDER_COLUMNS
                ))
                .bind(order_id)
                .bind(buyer_id)
                .fetch_optional(&mut *tx)
                .await?
            }
            None => {
                sqlx::query_as::<_, OrderRow>(&format!(
                    "UPDATE orders
                     SET status = '{}', completed_at = NOW(), updated_at = NOW()
                     WHERE id = $1 AND status IN ({})
                     RETURNING {}",
                    target.as_str(),
                    sources,
                    ORDER_COLUMNS
                ))
                .bind(order_id)
                .fetch_optional(&mut *tx)
                .await?
            }
        };

        let row = match row {
            Some(row) => row,
            None => {
                tx.rollback().await?;
                let existing = self
                    .find_by_id(order_id)
                    .await?
                    .ok_or_else(|| AppError::not_found("Order tidak ditemukan"))?;
                if let Some(buyer_id) = expect_buyer {
                    if existing.buyer_id != buyer_id {
                        return Err(AppError::forbidden("Bukan order milik Anda"));
                    }
                }
                return Err(AppError::invalid_transition(
                    existing.status.as_str(),
                    event.as_str(),
                ));
            }
        };

        let order: Order = row.try_into()?;

        let net =
            payment_repo::mark_released_for_subject(&mut tx, SubjectKind::Order, order_id).await?;
        ledger_repo::release_to_available(&mut tx, order.seller_id, net).await?;
        increment_seller_stats(&mut tx, order.seller_id).await?;
        payment_repo::record_transaction_log(
            &mut tx,
            "release",
            order.seller_id,
            None,
            net,
            None,
            Some(net),
            "completed",
            &format!("Release dana order {}", order.order_ref),
        )
        .await?;

        tx.commit().await?;

        tracing::info!(
            "Order {} completed, seller {} menerima {} di available",
            order.order_ref,
            order.seller_id,
            net
        );

        Ok(order)
    }

    /// Pembatalan sebelum pembayaran: sinkron, langsung, dan mengembalikan
    /// stock yang direserve
    pub async fn cancel(
        &self,
        order_id: i32,
        buyer_id: i32,
        reason: &str,
    ) -> Result<Order, AppError> {
        let event = OrderEvent::BuyerCancelled;
        let target = required_target(order::event_target(event), event.as_str())?;
        let sources = sql_in_list(order::event_sources(event).into_iter().map(|s| s.as_str()));

        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, OrderRow>(&format!(
            "UPDATE orders
             SET status = '{}', cancelled_at = NOW(), cancel_reason = $3, updated_at = NOW()
             WHERE id = $1 AND buyer_id = $2 AND status IN ({})
             RETURNING {}",
            target.as_str(),
            sources,
            ORDER_COLUMNS
        ))
        .bind(order_id)
        .bind(buyer_id)
        .bind(reason)
        .fetch_optional(&mut *tx)
        .await?;

        let row = match row {
            Some(row) => row,
            None => {
                tx.rollback().await?;
                let existing = self
                    .find_by_id(order_id)
                    .await?
                    .ok_or_else(|| AppError::not_found("Order tidak ditemukan"))?;
                if existing.buyer_id != buyer_id {
                    return Err(AppError::forbidden("Bukan order milik Anda"));
                }
                return Err(AppError::invalid_transition(
                    existing.status.as_str(),
                    event.as_str(),
                ));
            }
        };

        // Kembalikan stock yang direserve saat create
        sqlx::query(
            "UPDATE products SET stock = stock + $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(row.product_id)
        .bind(row.quantity)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        let order: Order = row.try_into()?;
        tracing::info!("Order {} dibatalkan buyer {}: {}", order.order_ref, buyer_id, reason);

        Ok(order)
    }

    /// Scheduler: auto-complete order yang melewati hold window tanpa
    /// konfirmasi buyer. Efek ledger identik dengan konfirmasi manual.
    pub async fn auto_release(&self, hold_days: i64) -> Result<u64, AppError> {
        let cutoff = Utc::now() - chrono::Duration::days(hold_days);
        let sources = sql_in_list(
            order::event_sources(OrderEvent::AutoRelease)
                .into_iter()
                .map(|s| s.as_str()),
        );

        let ids: Vec<i32> = sqlx::query_scalar(&format!(
            "SELECT id FROM orders
             WHERE status IN ({}) AND paid_at IS NOT NULL AND paid_at < $1
             ORDER BY paid_at
             LIMIT 100",
            sources
        ))
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;

        let mut released = 0;
        for id in ids {
            match self.complete(id, None).await {
                Ok(_) => released += 1,
                Err(e) => tracing::error!("Gagal auto-release order {}: {}", id, e),
            }
        }

        Ok(released)
    }
}

/// Statistik penjualan earner, diincrement saat transaksi completed
pub async fn increment_seller_stats(
    tx: &mut Transaction<'_, Postgres>,
    user_id: i32,
) -> Result<(), AppError> {
    sqlx::query(
        "INSERT INTO seller_stats (user_id, completed_count, updated_at)
         VALUES ($1, 1, NOW())
         ON CONFLICT (user_id)
         DO UPDATE SET completed_count = seller_stats.completed_count + 1, updated_at = NOW()",
    )
    .bind(user_id)
    .execute(&mut **tx)
    .await?;

    Ok(())
}
