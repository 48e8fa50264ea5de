// API Routes untuk Settlement Service dengan JWT-Only architecture

use crate::config::AppState;
use crate::handlers::{
    content_handler, order_handler, payment_handler, service_order_handler, withdrawal_handler,
};
use crate::middleware::{auth::jwt_auth_middleware, rate_limit::rate_limit_middleware};
use axum::{
    routing::{get, post},
    Router,
    extract::Request,
    middleware::Next,
    response::Response,
    http::{Method, StatusCode, header::HeaderValue},
};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;
use utoipa::Modify;
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{
    cors::CorsLayer,
    trace::TraceLayer,
    timeout::TimeoutLayer,
};
use std::time::Duration;

// OpenAPI Documentation untuk Settlement Service
#[derive(OpenApi)]
#[openapi(
    paths(
        order_handler::create_order,
        order_handler::get_order,
        order_handler::mark_received,
        order_handler::cancel_order,
        service_order_handler::create_service_order,
        service_order_handler::get_service_order,
        service_order_handler::update_service_order_status,
        service_order_handler::request_revision,
        service_order_handler::cancel_service_order,
        content_handler::purchase_content,
        content_handler::get_purchase,
        content_handler::record_download,
        content_handler::cancel_purchase,
        payment_handler::create_payment,
        payment_handler::submit_proof,
        payment_handler::get_payment,
        payment_handler::admin_verify_payment,
        payment_handler::gateway_webhook,
        payment_handler::process_refund,
        withdrawal_handler::get_balance,
        withdrawal_handler::create_withdrawal,
        withdrawal_handler::list_withdrawals,
        withdrawal_handler::get_withdrawal,
        withdrawal_handler::cancel_withdrawal,
        withdrawal_handler::admin_process_withdrawal,
        payment_handler::health_check,
        payment_handler::get_service_info,
    ),
    components(
        schemas(
            crate::domain::order::Order,
            crate::domain::order::OrderStatus,
            crate::domain::order::CreateOrderRequest,
            crate::domain::order::CancelRequest,
            crate::domain::service_order::ServiceOrder,
            crate::domain::service_order::ServiceOrderStatus,
            crate::domain::service_order::CreateServiceOrderRequest,
            crate::domain::service_order::UpdateServiceStatusRequest,
            crate::domain::content::ContentPurchase,
            crate::domain::content::ContentPurchaseStatus,
            crate::domain::content::AccessType,
            crate::domain::content::PurchaseContentRequest,
            crate::domain::payment::Payment,
            crate::domain::payment::PaymentStatus,
            crate::domain::payment::PaymentMethod,
            crate::domain::payment::SubjectKind,
            crate::domain::payment::CreatePaymentRequest,
            crate::domain::payment::SubmitProofRequest,
            crate::domain::payment::AdminVerifyRequest,
            crate::domain::payment::RefundRequest,
            crate::domain::payment::WebhookResponse,
            crate::domain::ledger::LedgerEntry,
            crate::domain::ledger::BalanceResponse,
            crate::domain::withdrawal::Withdrawal,
            crate::domain::withdrawal::WithdrawalStatus,
            crate::domain::withdrawal::PayoutMethod,
            crate::domain::withdrawal::CreateWithdrawalRequest,
            crate::domain::withdrawal::AdminProcessRequest,
            crate::domain::withdrawal::WithdrawalsListResponse
        )
    ),
    tags(
        (name = "settlement-service", description = "Transaction settlement core for Karyaloka marketplace")
    ),
    info(
        title = "Settlement Service API",
        description = "Transaction settlement core for the Karyaloka marketplace\n\n## Features\n\n- 💳 NusaPay payment gateway integration (card, e-wallet, bank transfer, manual proof)\n- 🔁 Idempotent webhook reconciliation (exactly-once settlement)\n- 📦 Product order, service order & content license state machines\n- 💰 Seller ledger (available/pending/reserved) + withdrawal processing\n- 🔒 JWT-Only authentication (no CSRF required)\n- 🌐 Redis-based rate limiting",
        version = "1.0.0",
        contact(
            name = "Karyaloka Support",
            email = "support@karyaloka.id"
        )
    ),
    servers(
        (url = "https://api.karyaloka.id", description = "Production server")
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub struct ApiDoc;

// Security scheme modifier untuk Bearer JWT authentication
struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build()
                ),
            )
        }
    }
}

// Security headers middleware
async fn security_headers_middleware(
    request: Request,
    next: Next,
) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();

    headers.insert("Content-Security-Policy",
        "default-src 'self'; script-src 'self' 'unsafe-inline'; style-src 'self' 'unsafe-inline'; img-src 'self' data: https:; font-src 'self'; connect-src 'self'; frame-ancestors 'none';"
            .parse().unwrap());
    headers.insert("X-Content-Type-Options", "nosniff".parse().unwrap());
    headers.insert("X-Frame-Options", "DENY".parse().unwrap());
    headers.insert("X-XSS-Protection", "1; mode=block".parse().unwrap());
    headers.insert("Referrer-Policy", "strict-origin-when-cross-origin".parse().unwrap());
    headers.insert("Permissions-Policy", "camera=(), microphone=(), geolocation=()".parse().unwrap());
    headers.insert("Strict-Transport-Security", "max-age=31536000; includeSubDomains".parse().unwrap());

    response
}

// Buat router dengan JWT-only security dan Redis rate limiting
pub async fn create_routes(state: AppState) -> Router {
    if state.config.is_production() {
        tracing::warn!("Settlement Service running in PRODUCTION mode");
    } else {
        tracing::info!("Settlement Service running in DEVELOPMENT mode");
    }

    // CORS configuration
    let frontend_url = std::env::var("FRONTEND_URL")
        .expect("FRONTEND_URL environment variable HARUS diisi di .env file");

    let allowed_origin = frontend_url.parse::<HeaderValue>()
        .expect("FRONTEND_URL harus valid URL format");

    let cors = CorsLayer::new()
        .allow_origin(allowed_origin)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::PATCH,
            Method::OPTIONS,
        ])
        .allow_headers([
            axum::http::header::AUTHORIZATION,
            axum::http::header::ACCEPT,
            axum::http::header::CONTENT_TYPE,
        ])
        .allow_credentials(false)
        .max_age(Duration::from_secs(86400));

    // Setup OpenAPI documentation
    let mut openapi = ApiDoc::openapi();
    SecurityAddon.modify(&mut openapi);

    // Public routes - tanpa JWT authentication
    let public_routes = Router::new()
        .route("/health", get(payment_handler::health_check))
        .route("/info", get(payment_handler::get_service_info))
        .merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", openapi))
        .with_state(state.clone());

    // Protected API routes - dengan JWT authentication
    // (webhook gateway ikut nest ini tapi di-skip oleh jwt middleware;
    // autentikasinya lewat HMAC signature)
    let protected_routes = build_api_routes(state.clone())
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            jwt_auth_middleware,
        ));

    // Combine semua routes dengan shared middleware
    public_routes
        .nest("/api", protected_routes)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(TimeoutLayer::with_status_code(StatusCode::REQUEST_TIMEOUT, Duration::from_secs(30)))
                .layer(cors)
        )
        .layer(axum::middleware::from_fn(security_headers_middleware))
        .layer(axum::middleware::from_fn_with_state(
            Arc::new(state.rate_limiter.clone()),
            rate_limit_middleware,
        ))
}

// Build API routes dengan JWT authentication
fn build_api_routes(state: AppState) -> Router {
    Router::new()
        // ===== Product Orders =====
        .route("/orders", post(order_handler::create_order))
        .route("/orders/{order_id}", get(order_handler::get_order))
        .route("/orders/{order_id}/received", post(order_handler::mark_received))
        .route("/orders/{order_id}/cancel", post(order_handler::cancel_order))

        // ===== Service Orders =====
        .route("/service-orders", post(service_order_handler::create_service_order))
        .route("/service-orders/{order_id}", get(service_order_handler::get_service_order))
        .route("/service-orders/{order_id}/status", post(service_order_handler::update_service_order_status))
        .route("/service-orders/{order_id}/revision", post(service_order_handler::request_revision))
        .route("/service-orders/{order_id}/cancel", post(service_order_handler::cancel_service_order))

        // ===== Content Licenses =====
        .route("/content/purchases", post(content_handler::purchase_content))
        .route("/content/purchases/{purchase_id}", get(content_handler::get_purchase))
        .route("/content/purchases/{purchase_id}/download", post(content_handler::record_download))
        .route("/content/purchases/{purchase_id}/cancel", post(content_handler::cancel_purchase))

        // ===== Payment Operations =====
        .route("/payments", post(payment_handler::create_payment))
        .route("/payments/{payment_ref}", get(payment_handler::get_payment))
        .route("/payments/{payment_ref}/proof", post(payment_handler::submit_proof))

        // ===== Refund Operations =====
        .route("/refunds", post(payment_handler::process_refund))

        // ===== Ledger & Withdrawals =====
        .route("/balance", get(withdrawal_handler::get_balance))
        .route("/withdrawals", post(withdrawal_handler::create_withdrawal).get(withdrawal_handler::list_withdrawals))
        .route("/withdrawals/{id}", get(withdrawal_handler::get_withdrawal))
        .route("/withdrawals/{id}/cancel", post(withdrawal_handler::cancel_withdrawal))

        // ===== Admin Operations =====
        .route("/admin/payments/{payment_id}/verify", post(payment_handler::admin_verify_payment))
        .route("/admin/withdrawals/{id}/process", post(withdrawal_handler::admin_process_withdrawal))

        // ===== Webhook (External - NusaPay) =====
        .route("/webhooks/gateway", post(payment_handler::gateway_webhook))
        .with_state(state)
}
