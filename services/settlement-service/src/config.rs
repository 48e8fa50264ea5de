// Settlement Service Configuration
use crate::domain::ledger::CommissionConfig;
use crate::domain::withdrawal::FeeSchedule;
use crate::middleware::rate_limit::RateLimiter;
use crate::repositories::content_repo::ContentRepository;
use crate::repositories::ledger_repo::LedgerRepository;
use crate::repositories::order_repo::OrderRepository;
use crate::repositories::payment_repo::PaymentRepository;
use crate::repositories::service_order_repo::ServiceOrderRepository;
use crate::repositories::withdrawal_repo::WithdrawalRepository;
use sqlx::{postgres::PgConnectOptions, postgres::PgPoolOptions, PgPool};
use std::env;
use std::str::FromStr;
use std::time::Duration;

// Konfigurasi aplikasi dari environment variables. Rate komisi, fee tier,
// dan kapasitas provider dibaca sekali di sini lalu diinject eksplisit ke
// repository saat konstruksi — tidak ada global mutable state.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub server_host: String,
    pub server_port: u16,
    pub environment: String,
    pub jwt_secret: String,
    pub nusapay_server_key: String,
    pub nusapay_api_url: String,
    pub notification_service_url: String,
    pub currency: String,
    pub product_seller_bps: u32,
    pub service_provider_bps: u32,
    pub content_author_bps: u32,
    pub max_pending_withdrawals: i64,
    pub provider_capacity: i64,
    pub service_default_revisions: i32,
    pub service_delivery_days: i64,
    pub order_hold_days: i64,
    pub content_hold_days: i64,
    pub app_version: String,
}

impl AppConfig {
    // Load konfigurasi dari environment dengan validasi
    pub fn from_env() -> Result<Self, String> {
        let database_url = env::var("DATABASE_URL")
            .map_err(|_| "DATABASE_URL harus diset")?;

        let jwt_secret = env::var("JWT_SECRET")
            .map_err(|_| "JWT_SECRET harus diset")?;

        if !cfg!(debug_assertions) && jwt_secret.contains("change-this") {
            return Err("JWT_SECRET masih default! Ganti untuk production".to_string());
        }

        let server_host = env::var("SETTLEMENT_SERVICE_HOST")
            .expect("SETTLEMENT_SERVICE_HOST harus diset di environment");

        let server_port = env::var("SETTLEMENT_SERVICE_PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .expect("SETTLEMENT_SERVICE_PORT harus diset di environment");

        let environment = env::var("RUST_ENV")
            .expect("RUST_ENV harus diset di environment");

        let nusapay_server_key = env::var("NUSAPAY_SERVER_KEY")
            .expect("NUSAPAY_SERVER_KEY harus diset di environment");

        let nusapay_api_url = env::var("NUSAPAY_API_URL")
            .expect("NUSAPAY_API_URL harus diset di environment");

        let notification_service_url = env::var("NOTIFICATION_SERVICE_URL")
            .expect("NOTIFICATION_SERVICE_URL harus diset di environment");

        let currency = env::var("PLATFORM_CURRENCY").unwrap_or_else(|_| "USD".to_string());

        // Porsi earner per jenis transaksi, dalam basis points
        let product_seller_bps = parse_env("COMMISSION_PRODUCT_SELLER_BPS", 8_000);
        let service_provider_bps = parse_env("COMMISSION_SERVICE_PROVIDER_BPS", 8_500);
        let content_author_bps = parse_env("COMMISSION_CONTENT_AUTHOR_BPS", 9_000);

        let max_pending_withdrawals = parse_env("MAX_PENDING_WITHDRAWALS", 3);
        let provider_capacity = parse_env("PROVIDER_CAPACITY", 5);
        let service_default_revisions = parse_env("SERVICE_DEFAULT_REVISIONS", 2);
        let service_delivery_days = parse_env("SERVICE_DELIVERY_DAYS", 7);
        let order_hold_days = parse_env("ORDER_HOLD_DAYS", 3);
        let content_hold_days = parse_env("CONTENT_HOLD_DAYS", 7);

        let app_version = env::var("APP_VERSION")
            .unwrap_or_else(|_| "1.0.0".to_string());

        Ok(AppConfig {
            database_url,
            server_host,
            server_port,
            environment,
            jwt_secret,
            nusapay_server_key,
            nusapay_api_url,
            notification_service_url,
            currency,
            product_seller_bps,
            service_provider_bps,
            content_author_bps,
            max_pending_withdrawals,
            provider_capacity,
            service_default_revisions,
            service_delivery_days,
            order_hold_days,
            content_hold_days,
            app_version,
        })
    }

    // Helper cek production mode
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    pub fn commission_config(&self) -> CommissionConfig {
        CommissionConfig {
            product_seller_bps: self.product_seller_bps,
            service_provider_bps: self.service_provider_bps,
            content_author_bps: self.content_author_bps,
        }
    }

    pub fn fee_schedule(&self) -> FeeSchedule {
        FeeSchedule {
            bank_transfer_bps: parse_env("FEE_BANK_TRANSFER_BPS", 250),
            ewallet_bps: parse_env("FEE_EWALLET_BPS", 300),
            tier1_threshold_minor: parse_env("FEE_TIER1_THRESHOLD_MINOR", 50_000),
            tier1_reduction_bps: parse_env("FEE_TIER1_REDUCTION_BPS", 25),
            tier2_threshold_minor: parse_env("FEE_TIER2_THRESHOLD_MINOR", 100_000),
            tier2_reduction_bps: parse_env("FEE_TIER2_REDUCTION_BPS", 50),
            floor_bps: parse_env("FEE_FLOOR_BPS", 150),
        }
    }
}

fn parse_env<T: std::str::FromStr + Copy>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

// Inisialisasi database connection pool
pub async fn init_db_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    tracing::info!("🔌 Initializing Settlement Service database connection...");

    // Parse connection options dan disable prepared statements
    let options = PgConnectOptions::from_str(database_url)?
        .statement_cache_capacity(0);

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .min_connections(3)
        .acquire_timeout(Duration::from_secs(10))
        .idle_timeout(Duration::from_secs(300))
        .max_lifetime(Duration::from_secs(1800))
        .test_before_acquire(true)
        .connect_with(options)
        .await?;

    tracing::info!("✅ Settlement Service database pool initialized for Karyaloka platform");
    Ok(pool)
}

// Health check database connection
pub async fn check_db_health(pool: &PgPool) -> bool {
    sqlx::query("SELECT 1")
        .fetch_optional(pool)
        .await
        .is_ok()
}

// Application state yang di-share ke semua handlers
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub config: AppConfig,
    pub http_client: reqwest::Client,
    pub payment_repository: PaymentRepository,
    pub order_repository: OrderRepository,
    pub service_order_repository: ServiceOrderRepository,
    pub content_repository: ContentRepository,
    pub withdrawal_repository: WithdrawalRepository,
    pub ledger_repository: LedgerRepository,
    pub rate_limiter: RateLimiter,
}

impl axum::extract::FromRef<AppState> for PgPool {
    fn from_ref(state: &AppState) -> Self {
        state.db.clone()
    }
}

impl axum::extract::FromRef<AppState> for AppConfig {
    fn from_ref(state: &AppState) -> Self {
        state.config.clone()
    }
}

impl axum::extract::FromRef<AppState> for RateLimiter {
    fn from_ref(state: &AppState) -> Self {
        state.rate_limiter.clone()
    }
}

impl AppState {
    // Inisialisasi application state
    pub async fn new(config: AppConfig) -> Result<Self, String> {
        let db = init_db_pool(&config.database_url)
            .await
            .map_err(|e| format!("Failed to init database: {}", e))?;

        let http_client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| format!("Failed to create HTTP client: {}", e))?;

        let payment_repository = PaymentRepository::new(db.clone(), config.commission_config());
        let order_repository = OrderRepository::new(db.clone());
        let service_order_repository = ServiceOrderRepository::new(
            db.clone(),
            config.provider_capacity,
            config.service_default_revisions,
            config.service_delivery_days,
        );
        let content_repository = ContentRepository::new(db.clone());
        let withdrawal_repository = WithdrawalRepository::new(
            db.clone(),
            config.fee_schedule(),
            config.max_pending_withdrawals,
        );
        let ledger_repository = LedgerRepository::new(db.clone());

        // Redis MANDATORY untuk rate limiting
        let redis_url = env::var("REDIS_URL")
            .unwrap_or_else(|_| {
                tracing::error!("❌ REDIS_URL environment variable tidak diset");
                panic!("REDIS_URL environment variable is REQUIRED for rate limiting");
            });

        tracing::info!("🔄 Initializing Redis rate limiter...");
        let rate_limiter = RateLimiter::new(&redis_url)
            .unwrap_or_else(|e| {
                tracing::error!("❌ Failed to initialize Redis rate limiter: {}", e);
                panic!("Failed to initialize Redis rate limiter: {}. Redis is MANDATORY", e);
            });
        tracing::info!("✅ Redis rate limiter initialized (MANDATORY)");

        Ok(AppState {
            db,
            config,
            http_client,
            payment_repository,
            order_repository,
            service_order_repository,
            content_repository,
            withdrawal_repository,
            ledger_repository,
            rate_limiter,
        })
    }

    // Inisialisasi application state dari environment
    pub async fn from_env() -> Result<Self, String> {
        let config = AppConfig::from_env()?;
        Self::new(config).await
    }

    // Health check semua dependencies
    pub async fn health_check(&self) -> HealthStatus {
        let db_healthy = check_db_health(&self.db).await;

        HealthStatus {
            database: if db_healthy { "healthy" } else { "unhealthy" }.to_string(),
            overall: if db_healthy { "healthy" } else { "degraded" }.to_string(),
        }
    }
}

// Response untuk health check endpoint
#[derive(Debug, serde::Serialize)]
pub struct HealthStatus {
    pub database: String,
    pub overall: String,
}
