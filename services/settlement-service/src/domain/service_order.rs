use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

// Model utama service order (jasa freelance)
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ServiceOrder {
    pub id: i32,
    pub order_ref: String,
    pub buyer_id: i32,
    pub provider_id: i32,
    pub title: String,
    pub brief: Option<String>,
    pub amount_minor: i64,
    pub currency: String,
    pub status: ServiceOrderStatus,
    // Counter revisi hanya berkurang, tidak pernah negatif
    pub revisions_remaining: i32,
    pub delivery_due_at: Option<DateTime<Utc>>,
    pub cancel_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub refunded_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

// Status service order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ServiceOrderStatus {
    Pending,
    Accepted,
    InProgress,
    Delivered,
    RevisionRequested,
    Completed,
    Cancelled,
    Refunded,
}

impl ServiceOrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceOrderStatus::Pending => "pending",
            ServiceOrderStatus::Accepted => "accepted",
            ServiceOrderStatus::InProgress => "in_progress",
            ServiceOrderStatus::Delivered => "delivered",
            ServiceOrderStatus::RevisionRequested => "revision_requested",
            ServiceOrderStatus::Completed => "completed",
            ServiceOrderStatus::Cancelled => "cancelled",
            ServiceOrderStatus::Refunded => "refunded",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(ServiceOrderStatus::Pending),
            "accepted" => Some(ServiceOrderStatus::Accepted),
            "in_progress" => Some(ServiceOrderStatus::InProgress),
            "delivered" => Some(ServiceOrderStatus::Delivered),
            "revision_requested" => Some(ServiceOrderStatus::RevisionRequested),
            "completed" => Some(ServiceOrderStatus::Completed),
            "cancelled" => Some(ServiceOrderStatus::Cancelled),
            "refunded" => Some(ServiceOrderStatus::Refunded),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ServiceOrderStatus::Completed
                | ServiceOrderStatus::Cancelled
                | ServiceOrderStatus::Refunded
        )
    }
}

impl std::fmt::Display for ServiceOrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// Status yang dihitung sebagai beban in-flight provider (backpressure guard)
pub const IN_FLIGHT_STATUSES: [ServiceOrderStatus; 4] = [
    ServiceOrderStatus::Accepted,
    ServiceOrderStatus::InProgress,
    ServiceOrderStatus::Delivered,
    ServiceOrderStatus::RevisionRequested,
];

// Request untuk create service order (buyer)
#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateServiceOrderRequest {
    #[schema(example = 20)]
    pub provider_id: i32,
    #[schema(example = "Desain logo toko")]
    pub title: String,
    #[schema(example = "Logo minimalis warna biru, format vektor")]
    pub brief: Option<String>,
    #[schema(example = 50000)]
    pub amount_minor: i64,
}

// Request update status service order (accept/start/deliver/approve/resume)
#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateServiceStatusRequest {
    #[schema(example = "accept")]
    pub action: String,
}

// Event yang menggerakkan state machine service order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceOrderEvent {
    PaymentConfirmed,
    PaymentFailed,
    ProviderAccepted,
    WorkStarted,
    WorkDelivered,
    RevisionRequested,
    WorkResumed,
    BuyerApproved,
    BuyerCancelled,
    Refund,
}

impl ServiceOrderEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceOrderEvent::PaymentConfirmed => "payment_confirmed",
            ServiceOrderEvent::PaymentFailed => "payment_failed",
            ServiceOrderEvent::ProviderAccepted => "provider_accepted",
            ServiceOrderEvent::WorkStarted => "work_started",
            ServiceOrderEvent::WorkDelivered => "work_delivered",
            ServiceOrderEvent::RevisionRequested => "revision_requested",
            ServiceOrderEvent::WorkResumed => "work_resumed",
            ServiceOrderEvent::BuyerApproved => "buyer_approved",
            ServiceOrderEvent::BuyerCancelled => "buyer_cancelled",
            ServiceOrderEvent::Refund => "refund",
        }
    }
}

/// Tabel transisi eksplisit. Payment yang dikonfirmasi tidak mengubah
/// status (order menunggu acceptance provider dengan paid_at terisi);
/// payment gagal juga membiarkan order tetap pending agar bisa bayar ulang.
/// WorkDelivered dari revision_requested adalah redelivery setelah revisi.
pub fn transition(
    current: ServiceOrderStatus,
    event: ServiceOrderEvent,
) -> Option<ServiceOrderStatus> {
    use ServiceOrderEvent::*;
    use ServiceOrderStatus::*;
    match (current, event) {
        (Pending, PaymentConfirmed) => Some(Pending),
        (Pending, PaymentFailed) => Some(Pending),
        (Pending, ProviderAccepted) => Some(Accepted),
        (Pending, BuyerCancelled) => Some(Cancelled),
        (Accepted, WorkStarted) => Some(InProgress),
        (Accepted, BuyerCancelled) => Some(Cancelled),
        (InProgress, WorkDelivered) => Some(Delivered),
        (Delivered, BuyerApproved) => Some(Completed),
        (Delivered, ServiceOrderEvent::RevisionRequested) => Some(ServiceOrderStatus::RevisionRequested),
        (ServiceOrderStatus::RevisionRequested, WorkResumed) => Some(InProgress),
        (ServiceOrderStatus::RevisionRequested, WorkDelivered) => Some(Delivered),
        (Completed, Refund) => Some(Refunded),
        _ => None,
    }
}

pub const ALL_STATUSES: [ServiceOrderStatus; 8] = [
    ServiceOrderStatus::Pending,
    ServiceOrderStatus::Accepted,
    ServiceOrderStatus::InProgress,
    ServiceOrderStatus::Delivered,
    ServiceOrderStatus::RevisionRequested,
    ServiceOrderStatus::Completed,
    ServiceOrderStatus::Cancelled,
    ServiceOrderStatus::Refunded,
];

/// State asal yang menerima `event` menurut tabel. Repository memakai ini
/// untuk membangun guard `status IN (...)` pada CAS update, jadi SQL tidak
/// menduplikasi tabel dengan literalnya sendiri.
pub fn event_sources(event: ServiceOrderEvent) -> Vec<ServiceOrderStatus> {
    ALL_STATUSES
        .into_iter()
        .filter(|s| transition(*s, event).is_some())
        .collect()
}

/// State tujuan `event`; tabel machine ini punya satu tujuan per event
pub fn event_target(event: ServiceOrderEvent) -> Option<ServiceOrderStatus> {
    ALL_STATUSES
        .into_iter()
        .find_map(|s| transition(s, event))
}

impl ServiceOrder {
    /// Generate order ref unik
    pub fn generate_order_ref() -> String {
        let date = Utc::now().format("%Y%m%d");
        let random: u32 = rand::random();
        format!("SVC-{}-{:05}", date, random % 100_000)
    }

    pub fn is_paid(&self) -> bool {
        self.paid_at.is_some()
    }

    pub fn can_request_revision(&self) -> bool {
        self.status == ServiceOrderStatus::Delivered && self.revisions_remaining > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_delivery_path() {
        use ServiceOrderEvent::*;
        use ServiceOrderStatus::*;
        let mut s = Pending;
        for (event, expected) in [
            (PaymentConfirmed, Pending),
            (ProviderAccepted, Accepted),
            (WorkStarted, InProgress),
            (WorkDelivered, Delivered),
            (BuyerApproved, Completed),
        ] {
            s = transition(s, event).unwrap();
            assert_eq!(s, expected);
        }
    }

    #[test]
    fn test_revision_loop() {
        use ServiceOrderEvent::*;
        use ServiceOrderStatus::*;
        let s = transition(Delivered, ServiceOrderEvent::RevisionRequested).unwrap();
        assert_eq!(s, ServiceOrderStatus::RevisionRequested);
        // Provider boleh langsung kirim ulang atau mulai kerja dulu
        assert_eq!(transition(s, WorkResumed), Some(InProgress));
        assert_eq!(transition(s, WorkDelivered), Some(Delivered));
    }

    #[test]
    fn test_cancel_only_from_early_states() {
        use ServiceOrderEvent::BuyerCancelled;
        use ServiceOrderStatus::*;
        assert_eq!(transition(Pending, BuyerCancelled), Some(Cancelled));
        assert_eq!(transition(Accepted, BuyerCancelled), Some(Cancelled));
        assert_eq!(transition(InProgress, BuyerCancelled), None);
        assert_eq!(transition(Delivered, BuyerCancelled), None);
        assert_eq!(transition(Completed, BuyerCancelled), None);
    }

    #[test]
    fn test_terminal_states_reject_everything() {
        use ServiceOrderStatus::*;
        let events = [
            ServiceOrderEvent::ProviderAccepted,
            ServiceOrderEvent::WorkStarted,
            ServiceOrderEvent::WorkDelivered,
            ServiceOrderEvent::RevisionRequested,
            ServiceOrderEvent::BuyerApproved,
            ServiceOrderEvent::BuyerCancelled,
        ];
        for event in events {
            assert_eq!(transition(Cancelled, event), None);
            assert_eq!(transition(Refunded, event), None);
            if event != ServiceOrderEvent::RevisionRequested {
                assert_eq!(transition(Completed, event), None);
            }
        }
        assert_eq!(transition(Completed, ServiceOrderEvent::RevisionRequested), None);
    }

    #[test]
    fn test_every_event_has_one_edge_and_one_target() {
        let events = [
            ServiceOrderEvent::PaymentConfirmed,
            ServiceOrderEvent::PaymentFailed,
            ServiceOrderEvent::ProviderAccepted,
            ServiceOrderEvent::WorkStarted,
            ServiceOrderEvent::WorkDelivered,
            ServiceOrderEvent::RevisionRequested,
            ServiceOrderEvent::WorkResumed,
            ServiceOrderEvent::BuyerApproved,
            ServiceOrderEvent::BuyerCancelled,
            ServiceOrderEvent::Refund,
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

    fn test_order(revisions: i32, status: ServiceOrderStatus) -> ServiceOrder {
        let now = Utc::now();
        ServiceOrder {
            id: 1,
            order_ref: "SVC-20260101-00001".to_string(),
            buyer_id: 10,
            provider_id: 20,
            title: "Desain logo".to_string(),
            brief: None,
            amount_minor: 50_000,
            currency: "USD".to_string(),
            status,
            revisions_remaining: revisions,
            delivery_due_at: None,
            cancel_reason: None,
            created_at: now,
            paid_at: Some(now),
            accepted_at: Some(now),
            delivered_at: Some(now),
            completed_at: None,
            cancelled_at: None,
            refunded_at: None,
            updated_at: now,
        }
    }

    #[test]
    fn test_revision_counter_scenario() {
        // Order dengan 2 jatah revisi: dua kali request boleh, ketiga ditolak
        let mut order = test_order(2, ServiceOrderStatus::Delivered);

        assert!(order.can_request_revision());
        order.revisions_remaining -= 1;
        order.status = ServiceOrderStatus::RevisionRequested;

        order.status = ServiceOrderStatus::Delivered;
        assert!(order.can_request_revision());
        order.revisions_remaining -= 1;

        assert_eq!(order.revisions_remaining, 0);
        assert!(!order.can_request_revision());
    }

    #[test]
    fn test_revision_requires_delivered_status() {
        let order = test_order(2, ServiceOrderStatus::InProgress);
        assert!(!order.can_request_revision());
    }
}
