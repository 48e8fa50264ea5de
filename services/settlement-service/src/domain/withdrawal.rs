use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shared::Money;
use utoipa::ToSchema;

// Model withdrawal request
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Withdrawal {
    pub id: i32,
    pub user_id: i32,
    pub amount_minor: i64,
    pub fee_minor: i64,
    // Invariant: net = amount - fee
    pub net_minor: i64,
    pub currency: String,
    pub payout_method: PayoutMethod,
    pub bank_name: String,
    pub account_number: String,
    pub account_holder_name: String,
    pub status: WithdrawalStatus,
    pub notes: Option<String>,
    pub requested_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

// Status withdrawal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum WithdrawalStatus {
    Pending,
    Processing,
    Completed,
    Rejected,
    Cancelled,
}

impl WithdrawalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WithdrawalStatus::Pending => "pending",
            WithdrawalStatus::Processing => "processing",
            WithdrawalStatus::Completed => "completed",
            WithdrawalStatus::Rejected => "rejected",
            WithdrawalStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(WithdrawalStatus::Pending),
            "processing" => Some(WithdrawalStatus::Processing),
            "completed" => Some(WithdrawalStatus::Completed),
            "rejected" => Some(WithdrawalStatus::Rejected),
            "cancelled" => Some(WithdrawalStatus::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WithdrawalStatus::Completed
                | WithdrawalStatus::Rejected
                | WithdrawalStatus::Cancelled
        )
    }

    /// Tabel transisi eksplisit withdrawal
    pub fn can_transition(from: WithdrawalStatus, to: WithdrawalStatus) -> bool {
        use WithdrawalStatus::*;
        matches!(
            (from, to),
            (Pending, Processing)
                | (Pending, Completed)
                | (Pending, Rejected)
                | (Pending, Cancelled)
                | (Processing, Completed)
                | (Processing, Rejected)
        )
    }

    /// State asal yang boleh berpindah ke `to` menurut tabel. Repository
    /// memakai ini untuk membangun guard `status IN (...)` pada CAS update.
    pub fn sources_to(to: WithdrawalStatus) -> Vec<WithdrawalStatus> {
        ALL_STATUSES
            .into_iter()
            .filter(|from| WithdrawalStatus::can_transition(*from, to))
            .collect()
    }
}

pub const ALL_STATUSES: [WithdrawalStatus; 5] = [
    WithdrawalStatus::Pending,
    WithdrawalStatus::Processing,
    WithdrawalStatus::Completed,
    WithdrawalStatus::Rejected,
    WithdrawalStatus::Cancelled,
];

impl std::fmt::Display for WithdrawalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// Metode payout yang didukung
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum PayoutMethod {
    BankTransfer,
    Ewallet,
}

impl PayoutMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PayoutMethod::BankTransfer => "bank_transfer",
            PayoutMethod::Ewallet => "ewallet",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "bank_transfer" => Some(PayoutMethod::BankTransfer),
            "ewallet" => Some(PayoutMethod::Ewallet),
            _ => None,
        }
    }
}

impl std::fmt::Display for PayoutMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// Request DTO untuk POST /api/withdrawals
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct CreateWithdrawalRequest {
    #[schema(example = 10000)]
    pub amount_minor: i64,
    #[schema(example = "bank_transfer")]
    pub payout_method: String,
    #[schema(example = "BCA")]
    pub bank_name: String,
    #[schema(example = "1234567890")]
    pub account_number: String,
    #[schema(example = "Budi Santoso")]
    pub account_holder_name: String,
}

// Request keputusan admin untuk satu withdrawal
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct AdminProcessRequest {
    #[schema(example = true)]
    pub approve: bool,
    #[schema(example = "Payout batch 2026-08-04")]
    pub notes: Option<String>,
}

// Query parameters untuk withdrawal list
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct WithdrawalsListQuery {
    pub status: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

// Response DTO untuk GET /api/withdrawals
#[derive(Debug, Serialize, ToSchema)]
pub struct WithdrawalsListResponse {
    pub withdrawals: Vec<Withdrawal>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

// Skema fee withdrawal: base rate per metode, dikurangi per tier nominal,
// dengan floor. Semua dalam basis points; nilai diinject dari AppConfig
// saat konstruksi WithdrawalRepository.
#[derive(Debug, Clone)]
pub struct FeeSchedule {
    pub bank_transfer_bps: u32,
    pub ewallet_bps: u32,
    // >= tier1 dapat pengurangan tier1; >= tier2 dapat tambahan tier2
    pub tier1_threshold_minor: i64,
    pub tier1_reduction_bps: u32,
    pub tier2_threshold_minor: i64,
    pub tier2_reduction_bps: u32,
    pub floor_bps: u32,
}

impl Default for FeeSchedule {
    fn default() -> Self {
        Self {
            bank_transfer_bps: 250,
            ewallet_bps: 300,
            tier1_threshold_minor: 50_000,
            tier1_reduction_bps: 25,
            tier2_threshold_minor: 100_000,
            tier2_reduction_bps: 50,
            floor_bps: 150,
        }
    }
}

impl FeeSchedule {
    fn base_bps(&self, method: PayoutMethod) -> u32 {
        match method {
            PayoutMethod::BankTransfer => self.bank_transfer_bps,
            PayoutMethod::Ewallet => self.ewallet_bps,
        }
    }

    /// Rate efektif untuk satu request
    pub fn effective_bps(&self, method: PayoutMethod, amount_minor: i64) -> u32 {
        let mut reduction = 0;
        if amount_minor >= self.tier1_threshold_minor {
            reduction += self.tier1_reduction_bps;
        }
        if amount_minor >= self.tier2_threshold_minor {
            reduction += self.tier2_reduction_bps;
        }
        self.base_bps(method)
            .saturating_sub(reduction)
            .max(self.floor_bps)
    }

    pub fn compute_fee(&self, method: PayoutMethod, amount: &Money) -> Money {
        amount.share_bps(self.effective_bps(method, amount.amount_minor))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bank_transfer_base_rate() {
        // $100.00 via bank transfer: 2.5% => fee $2.50, net $97.50
        let schedule = FeeSchedule::default();
        let amount = Money::new(10_000, "USD").unwrap();
        let fee = schedule.compute_fee(PayoutMethod::BankTransfer, &amount);
        assert_eq!(fee.amount_minor, 250);
        let net = amount.checked_sub(&fee).unwrap();
        assert_eq!(net.amount_minor, 9_750);
    }

    #[test]
    fn test_tier_reductions_are_cumulative() {
        let schedule = FeeSchedule::default();
        // >= $500: 2.5% - 0.25% = 2.25%
        assert_eq!(
            schedule.effective_bps(PayoutMethod::BankTransfer, 50_000),
            225
        );
        // >= $1000: 2.5% - 0.25% - 0.5% = 1.75%
        assert_eq!(
            schedule.effective_bps(PayoutMethod::BankTransfer, 100_000),
            175
        );
    }

    #[test]
    fn test_fee_floor() {
        let schedule = FeeSchedule {
            bank_transfer_bps: 200,
            ..FeeSchedule::default()
        };
        // 200 - 75 = 125 bps, di bawah floor 150 => floor menang
        assert_eq!(
            schedule.effective_bps(PayoutMethod::BankTransfer, 100_000),
            150
        );
    }

    #[test]
    fn test_ewallet_rate() {
        let schedule = FeeSchedule::default();
        assert_eq!(schedule.effective_bps(PayoutMethod::Ewallet, 10_000), 300);
        assert_eq!(schedule.effective_bps(PayoutMethod::Ewallet, 100_000), 225);
    }

    #[test]
    fn test_net_invariant() {
        let schedule = FeeSchedule::default();
        for amount_minor in [1_000, 49_999, 50_000, 99_999, 100_000, 1_000_000] {
            let amount = Money::new(amount_minor, "USD").unwrap();
            let fee = schedule.compute_fee(PayoutMethod::BankTransfer, &amount);
            let net = amount.checked_sub(&fee).unwrap();
            assert_eq!(net.amount_minor + fee.amount_minor, amount_minor);
        }
    }

    #[test]
    fn test_transition_table() {
        use WithdrawalStatus::*;
        assert!(WithdrawalStatus::can_transition(Pending, Processing));
        assert!(WithdrawalStatus::can_transition(Pending, Cancelled));
        assert!(WithdrawalStatus::can_transition(Processing, Completed));
        assert!(WithdrawalStatus::can_transition(Processing, Rejected));

        // Terminal states final
        for to in [Pending, Processing, Completed, Rejected, Cancelled] {
            assert!(!WithdrawalStatus::can_transition(Completed, to));
            assert!(!WithdrawalStatus::can_transition(Rejected, to));
            assert!(!WithdrawalStatus::can_transition(Cancelled, to));
        }
        // Cancel hanya dari pending
        assert!(!WithdrawalStatus::can_transition(Processing, Cancelled));
    }

    #[test]
    fn test_sources_derived_from_table() {
        use WithdrawalStatus::*;
        assert_eq!(WithdrawalStatus::sources_to(Cancelled), vec![Pending]);
        assert_eq!(
            WithdrawalStatus::sources_to(Completed),
            vec![Pending, Processing]
        );
        assert_eq!(
            WithdrawalStatus::sources_to(Rejected),
            vec![Pending, Processing]
        );
        assert!(WithdrawalStatus::sources_to(Pending).is_empty());
    }
}
