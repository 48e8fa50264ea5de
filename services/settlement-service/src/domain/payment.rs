use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shared::Money;
use utoipa::ToSchema;

// Model data payment transaction
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Payment {
    pub id: i32,
    pub payment_ref: String,
    pub payer_id: i32,

    // Subject polimorfik: tepat satu dari tiga kolom ini terisi
    pub order_id: Option<i32>,
    pub service_order_id: Option<i32>,
    pub content_purchase_id: Option<i32>,

    pub amount_minor: i64,
    pub currency: String,
    pub method: PaymentMethod,
    pub status: PaymentStatus,

    // Idempotency anchor: unik dan immutable begitu terisi
    pub gateway_txn_id: Option<String>,

    // Net yang dikreditkan ke earner saat settlement sukses
    pub net_minor: Option<i64>,

    // Terisi saat dana earner dipindah dari pending ke available
    pub released_at: Option<DateTime<Utc>>,

    // Bukti transfer untuk metode manual
    pub proof_url: Option<String>,

    pub paid_at: Option<DateTime<Utc>>,
    pub expired_at: Option<DateTime<Utc>>,
    pub refunded_at: Option<DateTime<Utc>>,
    pub refund_reason: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// Metode pembayaran yang didukung gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Card,
    Ewallet,
    BankTransfer,
    ManualProof,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Card => "card",
            PaymentMethod::Ewallet => "ewallet",
            PaymentMethod::BankTransfer => "bank_transfer",
            PaymentMethod::ManualProof => "manual_proof",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "card" => Some(PaymentMethod::Card),
            "ewallet" => Some(PaymentMethod::Ewallet),
            "bank_transfer" => Some(PaymentMethod::BankTransfer),
            "manual_proof" => Some(PaymentMethod::ManualProof),
            _ => None,
        }
    }

    /// Metode manual tidak pernah memanggil gateway
    pub fn uses_gateway(&self) -> bool {
        !matches!(self, PaymentMethod::ManualProof)
    }
}

impl std::fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// Status payment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Processing,
    PendingVerification,
    Completed,
    Failed,
    Refunded,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Processing => "processing",
            PaymentStatus::PendingVerification => "pending_verification",
            PaymentStatus::Completed => "completed",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Refunded => "refunded",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(PaymentStatus::Pending),
            "processing" => Some(PaymentStatus::Processing),
            "pending_verification" => Some(PaymentStatus::PendingVerification),
            "completed" => Some(PaymentStatus::Completed),
            "failed" => Some(PaymentStatus::Failed),
            "refunded" => Some(PaymentStatus::Refunded),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PaymentStatus::Completed | PaymentStatus::Failed | PaymentStatus::Refunded
        )
    }

    /// Tabel transisi eksplisit. `pending` tidak pernah di-reenter.
    pub fn can_transition(from: PaymentStatus, to: PaymentStatus) -> bool {
        use PaymentStatus::*;
        matches!(
            (from, to),
            (Pending, Processing)
                | (Pending, PendingVerification)
                | (Pending, Completed)
                | (Pending, Failed)
                | (Processing, Completed)
                | (Processing, Failed)
                | (PendingVerification, Completed)
                | (PendingVerification, Failed)
                | (Completed, Refunded)
        )
    }

    /// State asal yang boleh berpindah ke `to` menurut tabel. Repository
    /// memakai ini untuk membangun guard `status IN (...)` pada CAS update.
    pub fn sources_to(to: PaymentStatus) -> Vec<PaymentStatus> {
        ALL_STATUSES
            .into_iter()
            .filter(|from| PaymentStatus::can_transition(*from, to))
            .collect()
    }
}

pub const ALL_STATUSES: [PaymentStatus; 6] = [
    PaymentStatus::Pending,
    PaymentStatus::Processing,
    PaymentStatus::PendingVerification,
    PaymentStatus::Completed,
    PaymentStatus::Failed,
    PaymentStatus::Refunded,
];

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// Request buat payment baru
#[derive(Debug, Deserialize, ToSchema)]
pub struct CreatePaymentRequest {
    #[schema(example = "order")]
    pub subject_type: String,
    #[schema(example = 1)]
    pub subject_id: i32,
    #[schema(example = "bank_transfer")]
    pub method: String,
}

// Request upload bukti transfer manual
#[derive(Debug, Deserialize, ToSchema)]
pub struct SubmitProofRequest {
    #[schema(example = "https://cdn.karyaloka.id/proofs/bukti.jpg")]
    pub proof_url: String,
}

// Request verifikasi bukti transfer oleh admin
#[derive(Debug, Deserialize, ToSchema)]
pub struct AdminVerifyRequest {
    #[schema(example = true)]
    pub approve: bool,
    pub notes: Option<String>,
}

// Request refund payment
#[derive(Debug, Deserialize, ToSchema)]
pub struct RefundRequest {
    #[schema(example = "PAY-ORD-20260101-00001")]
    pub payment_ref: String,
    #[schema(example = "Barang tidak sesuai deskripsi")]
    pub reason: String,
}

// Webhook response untuk NusaPay callback
#[derive(Debug, Serialize, ToSchema)]
pub struct WebhookResponse {
    pub success: bool,
    pub message: String,
    pub payment_ref: String,
    pub transaction_id: String,
}

// Hasil settlement dari gateway atau verifikasi admin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SettleOutcome {
    Success,
    Failure,
}

impl SettleOutcome {
    pub fn terminal_status(&self) -> PaymentStatus {
        match self {
            SettleOutcome::Success => PaymentStatus::Completed,
            SettleOutcome::Failure => PaymentStatus::Failed,
        }
    }
}

// Referensi subject yang dibayar (polymorphic)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SubjectKind {
    Order,
    ServiceOrder,
    ContentPurchase,
}

impl SubjectKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubjectKind::Order => "order",
            SubjectKind::ServiceOrder => "service_order",
            SubjectKind::ContentPurchase => "content_purchase",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "order" => Some(SubjectKind::Order),
            "service_order" => Some(SubjectKind::ServiceOrder),
            "content_purchase" => Some(SubjectKind::ContentPurchase),
            _ => None,
        }
    }

    pub fn ref_prefix(&self) -> &'static str {
        match self {
            SubjectKind::Order => "ORD",
            SubjectKind::ServiceOrder => "SVC",
            SubjectKind::ContentPurchase => "CNT",
        }
    }
}

impl std::fmt::Display for SubjectKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubjectRef {
    pub kind: SubjectKind,
    pub id: i32,
}

// Event gateway yang sudah dinormalisasi oleh adapter
#[derive(Debug, Clone)]
pub struct GatewayEvent {
    pub gateway_txn_id: String,
    pub payment_ref: String,
    pub raw_status: String,
    // None berarti event informational (mis. "pending"), tidak men-settle
    pub outcome: Option<SettleOutcome>,
}

// Keputusan reconciliation untuk satu event terhadap payment saat ini
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileAction {
    // Payment belum terminal: jalankan settle
    Settle,
    // Delivery duplikat yang cocok dengan hasil terminal: no-op sukses
    DuplicateNoop,
    // Event bertentangan dengan hasil terminal: log dan buang.
    // Kebijakan bisnis eksplisit: sukses yang sudah ter-settle menang
    // atas webhook failed yang datang terlambat.
    DiscardStale,
}

impl ReconcileAction {
    pub fn decide(current: PaymentStatus, outcome: SettleOutcome) -> ReconcileAction {
        if !current.is_terminal() {
            return ReconcileAction::Settle;
        }
        match (current, outcome) {
            (PaymentStatus::Completed, SettleOutcome::Success) => ReconcileAction::DuplicateNoop,
            (PaymentStatus::Completed, SettleOutcome::Failure) => ReconcileAction::DiscardStale,
            (PaymentStatus::Failed, SettleOutcome::Failure) => ReconcileAction::DuplicateNoop,
            (PaymentStatus::Failed, SettleOutcome::Success) => ReconcileAction::DiscardStale,
            // Refunded sudah melewati completed; event apapun sudah basi
            _ => ReconcileAction::DiscardStale,
        }
    }
}

// Business logic methods
impl Payment {
    pub fn subject(&self) -> Option<SubjectRef> {
        if let Some(id) = self.order_id {
            Some(SubjectRef { kind: SubjectKind::Order, id })
        } else if let Some(id) = self.service_order_id {
            Some(SubjectRef { kind: SubjectKind::ServiceOrder, id })
        } else {
            self.content_purchase_id.map(|id| SubjectRef {
                kind: SubjectKind::ContentPurchase,
                id,
            })
        }
    }

    pub fn money(&self) -> Money {
        Money {
            amount_minor: self.amount_minor,
            currency: self.currency.clone(),
        }
    }

    /// Cek apakah payment sudah melewati batas waktu pembayaran
    pub fn is_expired(&self) -> bool {
        !self.status.is_terminal()
            && self
                .expired_at
                .map(|expired| Utc::now() > expired)
                .unwrap_or(false)
    }

    /// Generate payment ref unik per subject
    pub fn generate_payment_ref(kind: SubjectKind) -> String {
        let date = Utc::now().format("%Y%m%d");
        let random: u32 = rand::random();
        format!("PAY-{}-{}-{:05}", kind.ref_prefix(), date, random % 100_000)
    }

    /// Batas waktu pembayaran per metode
    pub fn generate_expiry_time(method: PaymentMethod) -> DateTime<Utc> {
        let hours = match method {
            PaymentMethod::Card | PaymentMethod::Ewallet => 3,
            PaymentMethod::BankTransfer => 24,
            PaymentMethod::ManualProof => 48,
        };
        Utc::now() + chrono::Duration::hours(hours)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_legal_transitions() {
        use PaymentStatus::*;
        assert!(PaymentStatus::can_transition(Pending, Processing));
        assert!(PaymentStatus::can_transition(Pending, PendingVerification));
        assert!(PaymentStatus::can_transition(Processing, Completed));
        assert!(PaymentStatus::can_transition(Processing, Failed));
        assert!(PaymentStatus::can_transition(PendingVerification, Completed));
        assert!(PaymentStatus::can_transition(PendingVerification, Failed));
        assert!(PaymentStatus::can_transition(Completed, Refunded));
    }

    #[test]
    fn test_pending_never_reentered() {
        for from in ALL_STATUSES {
            assert!(
                !PaymentStatus::can_transition(from, PaymentStatus::Pending),
                "{} -> pending harus ditolak",
                from
            );
        }
    }

    #[test]
    fn test_terminal_statuses_only_completed_can_move() {
        use PaymentStatus::*;
        for to in ALL_STATUSES {
            assert!(!PaymentStatus::can_transition(Failed, to));
            assert!(!PaymentStatus::can_transition(Refunded, to));
            if to != Refunded {
                assert!(!PaymentStatus::can_transition(Completed, to));
            }
        }
    }

    #[test]
    fn test_sources_derived_from_table() {
        use PaymentStatus::*;
        assert_eq!(
            PaymentStatus::sources_to(Completed),
            vec![Pending, Processing, PendingVerification]
        );
        assert_eq!(
            PaymentStatus::sources_to(Failed),
            vec![Pending, Processing, PendingVerification]
        );
        assert_eq!(PaymentStatus::sources_to(Processing), vec![Pending]);
        assert_eq!(PaymentStatus::sources_to(Refunded), vec![Completed]);
        // Tidak ada jalan kembali ke pending
        assert!(PaymentStatus::sources_to(Pending).is_empty());
    }

    #[test]
    fn test_reconcile_settles_non_terminal() {
        use PaymentStatus::*;
        for status in [Pending, Processing, PendingVerification] {
            assert_eq!(
                ReconcileAction::decide(status, SettleOutcome::Success),
                ReconcileAction::Settle
            );
            assert_eq!(
                ReconcileAction::decide(status, SettleOutcome::Failure),
                ReconcileAction::Settle
            );
        }
    }

    #[test]
    fn test_reconcile_duplicate_is_noop() {
        assert_eq!(
            ReconcileAction::decide(PaymentStatus::Completed, SettleOutcome::Success),
            ReconcileAction::DuplicateNoop
        );
        assert_eq!(
            ReconcileAction::decide(PaymentStatus::Failed, SettleOutcome::Failure),
            ReconcileAction::DuplicateNoop
        );
    }

    #[test]
    fn test_reconcile_success_wins_over_late_failure() {
        // Webhook failed yang datang setelah settlement sukses dibuang,
        // tidak pernah menimpa hasil terminal
        assert_eq!(
            ReconcileAction::decide(PaymentStatus::Completed, SettleOutcome::Failure),
            ReconcileAction::DiscardStale
        );
    }

    #[test]
    fn test_payment_ref_prefix_per_subject() {
        let r = Payment::generate_payment_ref(SubjectKind::ServiceOrder);
        assert!(r.starts_with("PAY-SVC-"));
        let r = Payment::generate_payment_ref(SubjectKind::ContentPurchase);
        assert!(r.starts_with("PAY-CNT-"));
    }

    #[test]
    fn test_expiry_window_per_method() {
        let now = Utc::now();
        let card = Payment::generate_expiry_time(PaymentMethod::Card);
        let manual = Payment::generate_expiry_time(PaymentMethod::ManualProof);
        assert!(card > now && card < now + chrono::Duration::hours(4));
        assert!(manual > now + chrono::Duration::hours(47));
    }
}
