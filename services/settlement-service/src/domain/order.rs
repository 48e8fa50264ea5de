use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

// Model utama product order
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Order {
    pub id: i32,
    pub order_ref: String,
    pub buyer_id: i32,
    pub seller_id: i32,
    pub product_id: i32,
    pub quantity: i32,
    pub amount_minor: i64,
    pub currency: String,
    pub status: OrderStatus,
    pub cancel_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub refunded_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

// Status order produk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Processing,
    Completed,
    Cancelled,
    Refunded,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Processing => "processing",
            OrderStatus::Completed => "completed",
            OrderStatus::Cancelled => "cancelled",
            OrderStatus::Refunded => "refunded",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(OrderStatus::Pending),
            "processing" => Some(OrderStatus::Processing),
            "completed" => Some(OrderStatus::Completed),
            "cancelled" => Some(OrderStatus::Cancelled),
            "refunded" => Some(OrderStatus::Refunded),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Completed | OrderStatus::Cancelled | OrderStatus::Refunded
        )
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// Request untuk create order (buyer)
#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateOrderRequest {
    #[schema(example = 1)]
    pub product_id: i32,
    #[schema(example = 2)]
    pub quantity: i32,
}

// Request untuk cancel transaksi
#[derive(Debug, Deserialize, ToSchema)]
pub struct CancelRequest {
    #[schema(example = "Berubah pikiran")]
    pub reason: String,
}

// Event yang menggerakkan state machine order produk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderEvent {
    PaymentConfirmed,
    // Payment gagal membiarkan order tetap pending (payment bisa diulang)
    PaymentFailed,
    BuyerReceived,
    // Auto-release setelah hold window lewat, efeknya sama dengan konfirmasi buyer
    AutoRelease,
    BuyerCancelled,
    Refund,
}

impl OrderEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderEvent::PaymentConfirmed => "payment_confirmed",
            OrderEvent::PaymentFailed => "payment_failed",
            OrderEvent::BuyerReceived => "buyer_received",
            OrderEvent::AutoRelease => "auto_release",
            OrderEvent::BuyerCancelled => "buyer_cancelled",
            OrderEvent::Refund => "refund",
        }
    }
}

impl Order {
    /// Generate order ref unik
    pub fn generate_order_ref() -> String {
        let date = Utc::now().format("%Y%m%d");
        let random: u32 = rand::random();
        format!("ORD-{}-{:05}", date, random % 100_000)
    }
}

/// Tabel transisi eksplisit; pasangan (state, event) di luar tabel = None
pub fn transition(current: OrderStatus, event: OrderEvent) -> Option<OrderStatus> {
    use OrderEvent::*;
    use OrderStatus::*;
    match (current, event) {
        (Pending, PaymentConfirmed) => Some(Processing),
        (Pending, PaymentFailed) => Some(Pending),
        (Pending, BuyerCancelled) => Some(Cancelled),
        (Processing, BuyerReceived) => Some(Completed),
        (Processing, AutoRelease) => Some(Completed),
        (Completed, Refund) => Some(Refunded),
        _ => None,
    }
}

pub const ALL_STATUSES: [OrderStatus; 5] = [
    OrderStatus::Pending,
    OrderStatus::Processing,
    OrderStatus::Completed,
    OrderStatus::Cancelled,
    OrderStatus::Refunded,
];

/// State asal yang menerima `event` menurut tabel. Repository memakai ini
/// untuk membangun guard `status IN (...)` pada CAS update, jadi SQL tidak
/// menduplikasi tabel dengan literalnya sendiri.
pub fn event_sources(event: OrderEvent) -> Vec<OrderStatus> {
    ALL_STATUSES
        .into_iter()
        .filter(|s| transition(*s, event).is_some())
        .collect()
}

/// State tujuan `event`; tabel machine ini punya satu tujuan per event
pub fn event_target(event: OrderEvent) -> Option<OrderStatus> {
    ALL_STATUSES
        .into_iter()
        .find_map(|s| transition(s, event))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path() {
        let s = transition(OrderStatus::Pending, OrderEvent::PaymentConfirmed).unwrap();
        assert_eq!(s, OrderStatus::Processing);
        let s = transition(s, OrderEvent::BuyerReceived).unwrap();
        assert_eq!(s, OrderStatus::Completed);
        let s = transition(s, OrderEvent::Refund).unwrap();
        assert_eq!(s, OrderStatus::Refunded);
    }

    #[test]
    fn test_auto_release_equivalent_to_buyer_received() {
        assert_eq!(
            transition(OrderStatus::Processing, OrderEvent::AutoRelease),
            transition(OrderStatus::Processing, OrderEvent::BuyerReceived),
        );
    }

    #[test]
    fn test_payment_failure_keeps_order_pending() {
        assert_eq!(
            transition(OrderStatus::Pending, OrderEvent::PaymentFailed),
            Some(OrderStatus::Pending)
        );
    }

    #[test]
    fn test_cancel_only_before_payment() {
        assert_eq!(
            transition(OrderStatus::Pending, OrderEvent::BuyerCancelled),
            Some(OrderStatus::Cancelled)
        );
        assert_eq!(
            transition(OrderStatus::Processing, OrderEvent::BuyerCancelled),
            None
        );
        assert_eq!(
            transition(OrderStatus::Completed, OrderEvent::BuyerCancelled),
            None
        );
    }

    #[test]
    fn test_refund_only_from_completed() {
        for status in [
            OrderStatus::Pending,
            OrderStatus::Processing,
            OrderStatus::Cancelled,
            OrderStatus::Refunded,
        ] {
            assert_eq!(transition(status, OrderEvent::Refund), None);
        }
    }

    #[test]
    fn test_terminal_states_reject_all_events() {
        let events = [
            OrderEvent::PaymentConfirmed,
            OrderEvent::PaymentFailed,
            OrderEvent::BuyerReceived,
            OrderEvent::AutoRelease,
            OrderEvent::BuyerCancelled,
        ];
        for event in events {
            assert_eq!(transition(OrderStatus::Cancelled, event), None);
            assert_eq!(transition(OrderStatus::Refunded, event), None);
        }
    }

    #[test]
    fn test_every_event_has_one_edge_and_one_target() {
        let events = [
            OrderEvent::PaymentConfirmed,
            OrderEvent::PaymentFailed,
            OrderEvent::BuyerReceived,
            OrderEvent::AutoRelease,
            OrderEvent::BuyerCancelled,
            OrderEvent::Refund,
        ];
        for event in events {
            let sources = event_sources(event);
            let target = event_target(event);
            assert!(!sources.is_empty(), "{} tanpa edge", event.as_str());
            // Semua edge sebuah event menuju state yang sama
            for s in sources {
                assert_eq!(transition(s, event), target);
            }
        }
    }
}
