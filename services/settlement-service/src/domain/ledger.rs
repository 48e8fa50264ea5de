use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shared::Money;
use thiserror::Error;
use utoipa::ToSchema;

use crate::domain::payment::SubjectKind;

// Saldo earnings per user. Satu row per user, dibuat saat pertama dibutuhkan,
// tidak pernah dihapus. Invariant: total = available + pending.
// Bucket reserved menahan dana withdrawal yang sedang keluar dari platform
// dan tidak dihitung dalam total.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LedgerEntry {
    pub user_id: i32,
    pub available_minor: i64,
    pub pending_minor: i64,
    pub reserved_minor: i64,
    pub total_minor: i64,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Error, PartialEq)]
pub enum LedgerError {
    #[error("Saldo available tidak mencukupi")]
    InsufficientAvailable,
    #[error("Saldo pending tidak mencukupi")]
    InsufficientPending,
    #[error("Saldo reserved tidak mencukupi")]
    InsufficientReserved,
    #[error("Nominal operasi ledger harus positif")]
    NonPositiveAmount,
}

// Operasi murni yang semantiknya identik dengan UPDATE bertangguh guard di
// LedgerRepository. Controller tidak pernah menulis saldo langsung.
impl LedgerEntry {
    pub fn new(user_id: i32) -> Self {
        Self {
            user_id,
            available_minor: 0,
            pending_minor: 0,
            reserved_minor: 0,
            total_minor: 0,
            updated_at: Utc::now(),
        }
    }

    fn check_amount(amount: i64) -> Result<(), LedgerError> {
        if amount <= 0 {
            return Err(LedgerError::NonPositiveAmount);
        }
        Ok(())
    }

    /// Earnings masuk sebagai pending selama transaksi masih berjalan
    pub fn credit_pending(&mut self, amount: i64) -> Result<(), LedgerError> {
        Self::check_amount(amount)?;
        self.pending_minor += amount;
        self.total_minor += amount;
        Ok(())
    }

    /// Transaksi selesai: dana pindah dari pending ke available
    pub fn release_to_available(&mut self, amount: i64) -> Result<(), LedgerError> {
        Self::check_amount(amount)?;
        if self.pending_minor < amount {
            return Err(LedgerError::InsufficientPending);
        }
        self.pending_minor -= amount;
        self.available_minor += amount;
        Ok(())
    }

    /// Withdrawal request: debit available dan tahan di bucket reserved.
    /// Guard available >= amount inilah yang menserialisasi dua request
    /// withdrawal konkuren milik user yang sama.
    pub fn reserve_for_withdrawal(&mut self, amount: i64) -> Result<(), LedgerError> {
        Self::check_amount(amount)?;
        if self.available_minor < amount {
            return Err(LedgerError::InsufficientAvailable);
        }
        self.available_minor -= amount;
        self.reserved_minor += amount;
        self.total_minor -= amount;
        Ok(())
    }

    /// Withdrawal disetujui admin: dana reserved keluar dari platform
    pub fn finalize_withdrawal(&mut self, amount: i64) -> Result<(), LedgerError> {
        Self::check_amount(amount)?;
        if self.reserved_minor < amount {
            return Err(LedgerError::InsufficientReserved);
        }
        self.reserved_minor -= amount;
        Ok(())
    }

    /// Withdrawal dibatalkan/ditolak: dana reserved kembali ke available
    pub fn restore_reserved(&mut self, amount: i64) -> Result<(), LedgerError> {
        Self::check_amount(amount)?;
        if self.reserved_minor < amount {
            return Err(LedgerError::InsufficientReserved);
        }
        self.reserved_minor -= amount;
        self.available_minor += amount;
        self.total_minor += amount;
        Ok(())
    }

    /// Refund transaksi yang sudah completed: tarik kembali dari available
    pub fn reverse_available(&mut self, amount: i64) -> Result<(), LedgerError> {
        Self::check_amount(amount)?;
        if self.available_minor < amount {
            return Err(LedgerError::InsufficientAvailable);
        }
        self.available_minor -= amount;
        self.total_minor -= amount;
        Ok(())
    }

    /// Refund sebelum release: tarik kembali dari pending
    pub fn reverse_pending(&mut self, amount: i64) -> Result<(), LedgerError> {
        Self::check_amount(amount)?;
        if self.pending_minor < amount {
            return Err(LedgerError::InsufficientPending);
        }
        self.pending_minor -= amount;
        self.total_minor -= amount;
        Ok(())
    }

    pub fn invariant_holds(&self) -> bool {
        self.available_minor >= 0
            && self.pending_minor >= 0
            && self.reserved_minor >= 0
            && self.total_minor == self.available_minor + self.pending_minor
    }
}

// Response DTO untuk GET /api/balance
#[derive(Debug, Serialize, ToSchema)]
pub struct BalanceResponse {
    pub user_id: i32,
    pub available_minor: i64,
    pub pending_minor: i64,
    pub reserved_minor: i64,
    pub total_minor: i64,
    pub currency: String,
    pub updated_at: DateTime<Utc>,
}

impl BalanceResponse {
    pub fn from_entry(entry: LedgerEntry, currency: &str) -> Self {
        Self {
            user_id: entry.user_id,
            available_minor: entry.available_minor,
            pending_minor: entry.pending_minor,
            reserved_minor: entry.reserved_minor,
            total_minor: entry.total_minor,
            currency: currency.to_string(),
            updated_at: entry.updated_at,
        }
    }
}

// Pembagian komisi per jenis transaksi, dalam basis points untuk porsi
// earner. Diinject saat konstruksi repository, bukan dibaca dari global.
#[derive(Debug, Clone)]
pub struct CommissionConfig {
    pub product_seller_bps: u32,
    pub service_provider_bps: u32,
    pub content_author_bps: u32,
}

impl Default for CommissionConfig {
    fn default() -> Self {
        Self {
            product_seller_bps: 8_000,
            service_provider_bps: 8_500,
            content_author_bps: 9_000,
        }
    }
}

impl CommissionConfig {
    pub fn earner_share_bps(&self, kind: SubjectKind) -> u32 {
        match kind {
            SubjectKind::Order => self.product_seller_bps,
            SubjectKind::ServiceOrder => self.service_provider_bps,
            SubjectKind::ContentPurchase => self.content_author_bps,
        }
    }

    /// Net earner untuk satu pembayaran gross
    pub fn earner_net(&self, gross: &Money, kind: SubjectKind) -> Money {
        gross.share_bps(self.earner_share_bps(kind))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_product_settlement_scenario() {
        // Buyer bayar order produk $100.00, porsi seller 80%
        let config = CommissionConfig::default();
        let gross = Money::new(10_000, "USD").unwrap();
        let net = config.earner_net(&gross, SubjectKind::Order);
        assert_eq!(net.amount_minor, 8_000);

        let mut seller = LedgerEntry::new(20);
        seller.credit_pending(net.amount_minor).unwrap();
        assert_eq!(seller.pending_minor, 8_000);
        assert_eq!(seller.available_minor, 0);
        assert!(seller.invariant_holds());

        // Buyer konfirmasi terima barang: dana pindah pending -> available
        seller.release_to_available(net.amount_minor).unwrap();
        assert_eq!(seller.pending_minor, 0);
        assert_eq!(seller.available_minor, 8_000);
        assert!(seller.invariant_holds());
    }

    #[test]
    fn test_conservation_across_operations() {
        let mut entry = LedgerEntry::new(1);
        entry.credit_pending(5_000).unwrap();
        entry.credit_pending(2_500).unwrap();
        entry.release_to_available(5_000).unwrap();
        // total selalu = available + pending
        assert_eq!(entry.total_minor, 7_500);
        assert!(entry.invariant_holds());

        entry.reserve_for_withdrawal(4_000).unwrap();
        assert_eq!(entry.available_minor, 1_000);
        assert_eq!(entry.reserved_minor, 4_000);
        assert!(entry.invariant_holds());

        entry.restore_reserved(4_000).unwrap();
        assert_eq!(entry.available_minor, 5_000);
        assert!(entry.invariant_holds());
    }

    #[test]
    fn test_balances_never_go_negative() {
        let mut entry = LedgerEntry::new(1);
        entry.credit_pending(1_000).unwrap();
        entry.release_to_available(1_000).unwrap();

        assert_eq!(
            entry.reserve_for_withdrawal(1_001).unwrap_err(),
            LedgerError::InsufficientAvailable
        );
        assert_eq!(
            entry.release_to_available(1).unwrap_err(),
            LedgerError::InsufficientPending
        );
        assert_eq!(
            entry.restore_reserved(1).unwrap_err(),
            LedgerError::InsufficientReserved
        );
        // State tidak berubah setelah operasi yang ditolak
        assert_eq!(entry.available_minor, 1_000);
        assert!(entry.invariant_holds());
    }

    #[test]
    fn test_withdrawal_lifecycle() {
        let mut entry = LedgerEntry::new(1);
        entry.credit_pending(10_000).unwrap();
        entry.release_to_available(10_000).unwrap();

        entry.reserve_for_withdrawal(10_000).unwrap();
        assert_eq!(entry.available_minor, 0);

        // Approve: dana keluar dari platform
        entry.finalize_withdrawal(10_000).unwrap();
        assert_eq!(entry.reserved_minor, 0);
        assert_eq!(entry.total_minor, 0);
        assert!(entry.invariant_holds());
    }

    #[test]
    fn test_zero_amount_rejected() {
        let mut entry = LedgerEntry::new(1);
        assert_eq!(
            entry.credit_pending(0).unwrap_err(),
            LedgerError::NonPositiveAmount
        );
    }

    #[test]
    fn test_commission_shares_per_type() {
        let config = CommissionConfig::default();
        let gross = Money::new(10_000, "USD").unwrap();
        assert_eq!(config.earner_net(&gross, SubjectKind::Order).amount_minor, 8_000);
        assert_eq!(
            config.earner_net(&gross, SubjectKind::ServiceOrder).amount_minor,
            8_500
        );
        assert_eq!(
            config.earner_net(&gross, SubjectKind::ContentPurchase).amount_minor,
            9_000
        );
    }
}
