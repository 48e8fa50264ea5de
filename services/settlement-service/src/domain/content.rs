use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

// Model pembelian lisensi konten digital
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ContentPurchase {
    pub id: i32,
    pub purchase_ref: String,
    pub buyer_id: i32,
    pub author_id: i32,
    pub content_id: i32,
    // price 0 = konten gratis, langsung aktif tanpa payment round-trip
    pub price_minor: i64,
    pub currency: String,
    pub status: ContentPurchaseStatus,
    pub access_type: AccessType,
    pub expires_at: Option<DateTime<Utc>>,
    // None = unlimited download
    pub downloads_remaining: Option<i32>,
    pub created_at: DateTime<Utc>,
    pub activated_at: Option<DateTime<Utc>>,
    pub refunded_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

// Status lisensi konten
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ContentPurchaseStatus {
    Pending,
    Active,
    Expired,
    Cancelled,
    Refunded,
}

impl ContentPurchaseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentPurchaseStatus::Pending => "pending",
            ContentPurchaseStatus::Active => "active",
            ContentPurchaseStatus::Expired => "expired",
            ContentPurchaseStatus::Cancelled => "cancelled",
            ContentPurchaseStatus::Refunded => "refunded",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(ContentPurchaseStatus::Pending),
            "active" => Some(ContentPurchaseStatus::Active),
            "expired" => Some(ContentPurchaseStatus::Expired),
            "cancelled" => Some(ContentPurchaseStatus::Cancelled),
            "refunded" => Some(ContentPurchaseStatus::Refunded),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ContentPurchaseStatus::Expired
                | ContentPurchaseStatus::Cancelled
                | ContentPurchaseStatus::Refunded
        )
    }
}

impl std::fmt::Display for ContentPurchaseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// Jenis access window lisensi
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum AccessType {
    Lifetime,
    Expires,
}

impl AccessType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessType::Lifetime => "lifetime",
            AccessType::Expires => "expires",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "lifetime" => Some(AccessType::Lifetime),
            "expires" => Some(AccessType::Expires),
            _ => None,
        }
    }
}

// Request pembelian konten (buyer)
#[derive(Debug, Deserialize, ToSchema)]
pub struct PurchaseContentRequest {
    #[schema(example = 7)]
    pub content_id: i32,
}

// Event state machine lisensi konten
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentEvent {
    // Konten gratis aktif sinkron saat purchase dibuat
    FreeGrant,
    PaymentConfirmed,
    PaymentFailed,
    BuyerCancelled,
    WindowElapsed,
    Refund,
}

impl ContentEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentEvent::FreeGrant => "free_grant",
            ContentEvent::PaymentConfirmed => "payment_confirmed",
            ContentEvent::PaymentFailed => "payment_failed",
            ContentEvent::BuyerCancelled => "buyer_cancelled",
            ContentEvent::WindowElapsed => "window_elapsed",
            ContentEvent::Refund => "refund",
        }
    }
}

/// Tabel transisi eksplisit lisensi konten
pub fn transition(
    current: ContentPurchaseStatus,
    event: ContentEvent,
) -> Option<ContentPurchaseStatus> {
    use ContentEvent::*;
    use ContentPurchaseStatus::*;
    match (current, event) {
        (Pending, FreeGrant) => Some(Active),
        (Pending, PaymentConfirmed) => Some(Active),
        (Pending, PaymentFailed) => Some(Pending),
        (Pending, BuyerCancelled) => Some(Cancelled),
        (Active, WindowElapsed) => Some(Expired),
        (Active, Refund) => Some(Refunded),
        _ => None,
    }
}

pub const ALL_STATUSES: [ContentPurchaseStatus; 5] = [
    ContentPurchaseStatus::Pending,
    ContentPurchaseStatus::Active,
    ContentPurchaseStatus::Expired,
    ContentPurchaseStatus::Cancelled,
    ContentPurchaseStatus::Refunded,
];

/// State asal yang menerima `event` menurut tabel. Repository memakai ini
/// untuk membangun guard `status IN (...)` pada CAS update, jadi SQL tidak
/// menduplikasi tabel dengan literalnya sendiri.
pub fn event_sources(event: ContentEvent) -> Vec<ContentPurchaseStatus> {
    ALL_STATUSES
        .into_iter()
        .filter(|s| transition(*s, event).is_some())
        .collect()
}

/// State tujuan `event`; tabel machine ini punya satu tujuan per event
pub fn event_target(event: ContentEvent) -> Option<ContentPurchaseStatus> {
    ALL_STATUSES
        .into_iter()
        .find_map(|s| transition(s, event))
}

impl ContentPurchase {
    /// Generate purchase ref unik
    pub fn generate_purchase_ref() -> String {
        let date = Utc::now().format("%Y%m%d");
        let random: u32 = rand::random();
        format!("CNT-{}-{:05}", date, random % 100_000)
    }

    pub fn is_free(&self) -> bool {
        self.price_minor == 0
    }

    fn window_valid(&self, now: DateTime<Utc>) -> bool {
        match self.access_type {
            AccessType::Lifetime => true,
            AccessType::Expires => self.expires_at.map(|e| e > now).unwrap_or(false),
        }
    }

    /// Lisensi valid untuk akses (belum menghitung kuota download)
    pub fn has_access(&self, now: DateTime<Utc>) -> bool {
        self.status == ContentPurchaseStatus::Active && self.window_valid(now)
    }

    /// Boleh download sekarang: akses valid dan kuota belum habis
    pub fn can_download(&self, now: DateTime<Utc>) -> bool {
        self.has_access(now) && self.downloads_remaining.map(|d| d > 0).unwrap_or(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn purchase(
        price: i64,
        status: ContentPurchaseStatus,
        access_type: AccessType,
        expires_at: Option<DateTime<Utc>>,
        downloads: Option<i32>,
    ) -> ContentPurchase {
        let now = Utc::now();
        ContentPurchase {
            id: 1,
            purchase_ref: "CNT-20260101-00001".to_string(),
            buyer_id: 10,
            author_id: 30,
            content_id: 7,
            price_minor: price,
            currency: "USD".to_string(),
            status,
            access_type,
            expires_at,
            downloads_remaining: downloads,
            created_at: now,
            activated_at: None,
            refunded_at: None,
            updated_at: now,
        }
    }

    #[test]
    fn test_free_content_activates_directly() {
        assert_eq!(
            transition(ContentPurchaseStatus::Pending, ContentEvent::FreeGrant),
            Some(ContentPurchaseStatus::Active)
        );
    }

    #[test]
    fn test_paid_content_activates_via_settlement() {
        assert_eq!(
            transition(ContentPurchaseStatus::Pending, ContentEvent::PaymentConfirmed),
            Some(ContentPurchaseStatus::Active)
        );
        // Aktivasi kedua ditolak tabel
        assert_eq!(
            transition(ContentPurchaseStatus::Active, ContentEvent::PaymentConfirmed),
            None
        );
    }

    #[test]
    fn test_refund_only_from_active() {
        assert_eq!(
            transition(ContentPurchaseStatus::Active, ContentEvent::Refund),
            Some(ContentPurchaseStatus::Refunded)
        );
        assert_eq!(
            transition(ContentPurchaseStatus::Pending, ContentEvent::Refund),
            None
        );
    }

    #[test]
    fn test_lifetime_access_never_expires() {
        let p = purchase(0, ContentPurchaseStatus::Active, AccessType::Lifetime, None, None);
        assert!(p.has_access(Utc::now() + chrono::Duration::days(10_000)));
    }

    #[test]
    fn test_expired_window_denies_access() {
        let now = Utc::now();
        let p = purchase(
            5_000,
            ContentPurchaseStatus::Active,
            AccessType::Expires,
            Some(now - chrono::Duration::days(1)),
            None,
        );
        assert!(!p.has_access(now));
        assert!(!p.can_download(now));
    }

    #[test]
    fn test_every_event_has_one_edge_and_one_target() {
        let events = [
            ContentEvent::FreeGrant,
            ContentEvent::PaymentConfirmed,
            ContentEvent::PaymentFailed,
            ContentEvent::BuyerCancelled,
            ContentEvent::WindowElapsed,
            ContentEvent::Refund,
        ];
        for event in events {
            let sources = event_sources(event);
            let target = event_target(event);
            assert!(!sources.is_empty());
            // Semua edge sebuah event menuju state yang sama
            for s in sources {
                assert_eq!(transition(s, event), target);
            }
        }
    }

    #[test]
    fn test_download_quota() {
        let now = Utc::now();
        let mut p = purchase(
            5_000,
            ContentPurchaseStatus::Active,
            AccessType::Lifetime,
            None,
            Some(1),
        );
        assert!(p.can_download(now));
        p.downloads_remaining = Some(0);
        assert!(!p.can_download(now));
        // None = unlimited
        p.downloads_remaining = None;
        assert!(p.can_download(now));
    }
}
