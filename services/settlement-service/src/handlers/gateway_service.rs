use crate::domain::payment::{GatewayEvent, PaymentMethod, SettleOutcome};
use crate::error::AppError;
use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use sha2::Sha512;
use utoipa::ToSchema;

type HmacSha512 = Hmac<Sha512>;

// Jumlah percobaan charge sebelum payment di-settle failed.
// Retry di-key payment_ref (idempotent di sisi NusaPay), bukan attempt count.
pub const CHARGE_RETRY_BUDGET: u32 = 3;

// Request charge ke NusaPay
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct GatewayChargeRequest {
    pub payment_ref: String,
    pub amount_minor: i64,
    pub currency: String,
    pub channel: String,
    pub customer_email: String,
}

// Response charge dari NusaPay
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct GatewayChargeResponse {
    pub transaction_id: String,
    pub payment_ref: String,
    pub transaction_status: String,
    pub redirect_url: Option<String>,
    pub va_number: Option<String>,
    pub expiry_time: Option<String>,
}

// Payload webhook dari NusaPay
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct GatewayWebhookPayload {
    pub transaction_id: String,
    pub payment_ref: String,
    pub transaction_status: String,
    pub status_code: String,
    pub gross_amount: String,
}

// Interface tunggal ke payment gateway supaya tests bisa substitusi
// fake yang deterministik
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn charge(
        &self,
        request: &GatewayChargeRequest,
    ) -> Result<GatewayChargeResponse, AppError>;
}

// Service untuk integrasi NusaPay
pub struct NusaPayService {
    client: Client,
    server_key: String,
    is_production: bool,
    api_url: String,
}

impl NusaPayService {
    // Buat NusaPay service baru
    pub fn new(server_key: String, api_url: String) -> Self {
        let is_production = api_url.contains("api.nusapay.co.id");
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .unwrap_or_default();

        Self {
            client,
            server_key,
            is_production,
            api_url,
        }
    }

    // Map metode pembayaran internal ke channel NusaPay
    pub fn channel_for(method: PaymentMethod) -> &'static str {
        match method {
            PaymentMethod::Card => "credit_card",
            PaymentMethod::Ewallet => "ewallet",
            PaymentMethod::BankTransfer => "bank_transfer",
            // Manual proof tidak pernah sampai ke gateway
            PaymentMethod::ManualProof => "manual",
        }
    }

    /// Verify webhook signature dari NusaPay (HMAC-SHA512 atas
    /// payment_ref + raw body, base64)
    pub fn verify_webhook_signature(
        &self,
        payload: &str,
        signature: &str,
        payment_ref: &str,
    ) -> bool {
        let expected_signature = self.generate_signature(payload, payment_ref);
        expected_signature == signature
    }

    /// Generate signature untuk webhook
    fn generate_signature(&self, payload: &str, payment_ref: &str) -> String {
        let combined = format!("{}{}", payment_ref, payload);

        let mut mac = HmacSha512::new_from_slice(self.server_key.as_bytes())
            .expect("HMAC can take key of any size");
        mac.update(combined.as_bytes());

        let result = mac.finalize();
        let code_bytes = result.into_bytes();

        general_purpose::STANDARD.encode(code_bytes)
    }

    /// Parse webhook payload
    pub fn parse_webhook_payload(&self, payload: &str) -> Result<GatewayWebhookPayload, AppError> {
        serde_json::from_str(payload)
            .map_err(|e| AppError::gateway(format!("Failed to parse webhook payload: {}", e)))
    }

    /// Normalisasi payload webhook ke satu bentuk event internal
    pub fn normalize_event(&self, payload: &GatewayWebhookPayload) -> GatewayEvent {
        GatewayEvent {
            gateway_txn_id: payload.transaction_id.clone(),
            payment_ref: payload.payment_ref.clone(),
            raw_status: payload.transaction_status.clone(),
            outcome: Self::convert_status(&payload.transaction_status),
        }
    }

    /// Convert status NusaPay ke outcome settlement.
    /// "pending" adalah event informational: tidak men-settle apa-apa.
    pub fn convert_status(transaction_status: &str) -> Option<SettleOutcome> {
        match transaction_status {
            "settlement" | "capture" => Some(SettleOutcome::Success),
            "deny" | "cancel" | "expire" | "failure" => Some(SettleOutcome::Failure),
            "pending" => None,
            _ => Some(SettleOutcome::Failure),
        }
    }

    /// Encode auth credentials
    fn encode_auth(&self) -> String {
        let credentials = format!("{}:", self.server_key);
        general_purpose::STANDARD.encode(credentials.as_bytes())
    }

    pub fn is_production(&self) -> bool {
        self.is_production
    }

    pub fn environment_info(&self) -> &'static str {
        if self.is_production {
            "production"
        } else {
            "sandbox"
        }
    }

    // Instruksi pembayaran untuk customer
    pub fn payment_instructions(&self, method: PaymentMethod, response: &GatewayChargeResponse) -> String {
        match method {
            PaymentMethod::BankTransfer => match &response.va_number {
                Some(va) => format!(
                    "Silakan transfer ke Virtual Account: {}\n\
                    Pembayaran akan diproses otomatis.",
                    va
                ),
                None => "Instruksi transfer akan dikirim oleh payment provider.".to_string(),
            },
            PaymentMethod::Card | PaymentMethod::Ewallet => match &response.redirect_url {
                Some(url) => format!("Lanjutkan pembayaran melalui: {}", url),
                None => "Lanjutkan pembayaran di aplikasi Anda.".to_string(),
            },
            PaymentMethod::ManualProof => {
                "Transfer manual ke rekening platform lalu upload bukti pembayaran.".to_string()
            }
        }
    }
}

#[async_trait]
impl PaymentGateway for NusaPayService {
    // Charge payment ke NusaPay
    async fn charge(
        &self,
        request: &GatewayChargeRequest,
    ) -> Result<GatewayChargeResponse, AppError> {
        let auth_header = format!("Basic {}", self.encode_auth());

        let response = self
            .client
            .post(format!("{}/v1/charges", self.api_url))
            .header("Authorization", auth_header)
            .header("Content-Type", "application/json")
            .header("Accept", "application/json")
            .json(request)
            .send()
            .await
            .map_err(|e| {
                // Timeout / connect error = transient, boleh di-retry
                if e.is_timeout() || e.is_connect() {
                    AppError::gateway_unavailable(format!("NusaPay unreachable: {}", e))
                } else {
                    AppError::HttpClientError(e)
                }
            })?;

        if response.status().is_server_error() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(AppError::gateway_unavailable(format!(
                "NusaPay 5xx: {}",
                error_text
            )));
        }

        if !response.status().is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(AppError::gateway(format!("NusaPay API error: {}", error_text)));
        }

        let charge_response: GatewayChargeResponse = response
            .json()
            .await
            .map_err(|e| AppError::gateway(format!("Failed to parse NusaPay response: {}", e)))?;

        Ok(charge_response)
    }
}

/// Charge dengan bounded retry budget. Hanya GatewayUnavailable yang
/// di-retry; error lain langsung dikembalikan. Budget habis = caller
/// men-settle payment failed, tidak pernah menggantung di processing.
pub async fn charge_with_retry(
    gateway: &dyn PaymentGateway,
    request: &GatewayChargeRequest,
    budget: u32,
) -> Result<GatewayChargeResponse, AppError> {
    let mut last_error = AppError::gateway_unavailable("Charge retry budget is zero");

    for attempt in 1..=budget.max(1) {
        match gateway.charge(request).await {
            Ok(response) => return Ok(response),
            Err(AppError::GatewayUnavailable(msg)) => {
                tracing::warn!(
                    "NusaPay charge attempt {}/{} failed for {}: {}",
                    attempt,
                    budget,
                    request.payment_ref,
                    msg
                );
                last_error = AppError::GatewayUnavailable(msg);
                if attempt < budget {
                    tokio::time::sleep(std::time::Duration::from_millis(200 * attempt as u64))
                        .await;
                }
            }
            Err(other) => return Err(other),
        }
    }

    Err(last_error)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_service() -> NusaPayService {
        NusaPayService::new(
            "test-server-key".to_string(),
            "https://sandbox.nusapay.co.id".to_string(),
        )
    }

    fn test_request() -> GatewayChargeRequest {
        GatewayChargeRequest {
            payment_ref: "ORD-20260101-00001".to_string(),
            amount_minor: 10_000,
            currency: "USD".to_string(),
            channel: "bank_transfer".to_string(),
            customer_email: "buyer@example.com".to_string(),
        }
    }

    fn test_response() -> GatewayChargeResponse {
        GatewayChargeResponse {
            transaction_id: "np-txn-123".to_string(),
            payment_ref: "ORD-20260101-00001".to_string(),
            transaction_status: "pending".to_string(),
            redirect_url: None,
            va_number: Some("8808123456".to_string()),
            expiry_time: None,
        }
    }

    #[test]
    fn test_signature_roundtrip() {
        let service = test_service();
        let payload = r#"{"transaction_id":"np-txn-123","transaction_status":"settlement"}"#;
        let signature = service.generate_signature(payload, "ORD-20260101-00001");

        assert!(service.verify_webhook_signature(payload, &signature, "ORD-20260101-00001"));
        // Signature dengan payment_ref berbeda harus gagal
        assert!(!service.verify_webhook_signature(payload, &signature, "ORD-20260101-00002"));
        // Payload yang diubah harus gagal
        assert!(!service.verify_webhook_signature("tampered", &signature, "ORD-20260101-00001"));
    }

    #[test]
    fn test_status_normalization() {
        assert_eq!(
            NusaPayService::convert_status("settlement"),
            Some(SettleOutcome::Success)
        );
        assert_eq!(
            NusaPayService::convert_status("capture"),
            Some(SettleOutcome::Success)
        );
        for status in ["deny", "cancel", "expire", "failure", "unknown-thing"] {
            assert_eq!(
                NusaPayService::convert_status(status),
                Some(SettleOutcome::Failure)
            );
        }
        // Pending bersifat informational, tidak men-settle
        assert_eq!(NusaPayService::convert_status("pending"), None);
    }

    #[test]
    fn test_normalize_event_shape() {
        let service = test_service();
        let payload = GatewayWebhookPayload {
            transaction_id: "np-txn-123".to_string(),
            payment_ref: "ORD-20260101-00001".to_string(),
            transaction_status: "settlement".to_string(),
            status_code: "200".to_string(),
            gross_amount: "10000".to_string(),
        };
        let event = service.normalize_event(&payload);
        assert_eq!(event.gateway_txn_id, "np-txn-123");
        assert_eq!(event.outcome, Some(SettleOutcome::Success));
    }

    #[tokio::test]
    async fn test_retry_budget_exhausted() {
        let mut gateway = MockPaymentGateway::new();
        gateway
            .expect_charge()
            .times(3)
            .returning(|_| Err(AppError::gateway_unavailable("connection refused")));

        let result = charge_with_retry(&gateway, &test_request(), 3).await;
        assert!(matches!(result, Err(AppError::GatewayUnavailable(_))));
    }

    #[tokio::test]
    async fn test_retry_recovers_on_transient_failure() {
        let mut gateway = MockPaymentGateway::new();
        let mut attempts = 0;
        gateway.expect_charge().times(2).returning(move |_| {
            attempts += 1;
            if attempts == 1 {
                Err(AppError::gateway_unavailable("timeout"))
            } else {
                Ok(test_response())
            }
        });

        let result = charge_with_retry(&gateway, &test_request(), 3).await;
        assert_eq!(result.unwrap().transaction_id, "np-txn-123");
    }

    #[tokio::test]
    async fn test_non_transient_error_not_retried() {
        let mut gateway = MockPaymentGateway::new();
        gateway
            .expect_charge()
            .times(1)
            .returning(|_| Err(AppError::gateway("invalid channel")));

        let result = charge_with_retry(&gateway, &test_request(), 3).await;
        assert!(matches!(result, Err(AppError::GatewayError(_))));
    }
}
