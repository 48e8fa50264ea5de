use crate::config::AppState;
use std::time::Duration;

/// Background scheduler untuk settlement maintenance tasks
pub struct SettlementScheduler {
    state: AppState,
}

impl SettlementScheduler {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    /// Start background settlement tasks
    pub fn start(self) {
        // Check if scheduler is disabled
        if std::env::var("DISABLE_SCHEDULER").unwrap_or_else(|_| "false".to_string()) == "true" {
            tracing::info!("💸 Settlement scheduler disabled via DISABLE_SCHEDULER environment variable");
            return;
        }

        tracing::info!("💸 Starting Settlement Service Background Scheduler...");

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(900)); // Every 15 minutes

            loop {
                interval.tick().await;

                tracing::info!("🧹 Running settlement maintenance tasks...");

                // Settle failed payments yang melewati batas waktu pembayaran.
                // Settle idempotent, jadi race dengan webhook sukses aman.
                let payment_repo = self.state.payment_repository.clone();
                tokio::spawn(async move {
                    for attempt in 1..=3 {
                        match payment_repo.expire_overdue().await {
                            Ok(expired) => {
                                if expired > 0 {
                                    tracing::info!("✅ Expired {} overdue payments", expired);
                                }
                                break;
                            }
                            Err(e) => {
                                if attempt == 3 {
                                    tracing::error!("❌ Failed to expire overdue payments after 3 attempts: {}", e);
                                } else {
                                    tokio::time::sleep(Duration::from_millis(1000)).await;
                                }
                            }
                        }
                    }
                });

                // Auto-complete product orders yang melewati hold window
                // tanpa konfirmasi buyer (efek ledger sama dengan konfirmasi)
                let order_repo = self.state.order_repository.clone();
                let order_hold_days = self.state.config.order_hold_days;
                tokio::spawn(async move {
                    for attempt in 1..=3 {
                        match order_repo.auto_release(order_hold_days).await {
                            Ok(released) => {
                                if released > 0 {
                                    tracing::info!("✅ Auto-released {} product orders past hold window", released);
                                }
                                break;
                            }
                            Err(e) => {
                                if attempt == 3 {
                                    tracing::error!("❌ Failed to auto-release orders after 3 attempts: {}", e);
                                } else {
                                    tokio::time::sleep(Duration::from_millis(1000)).await;
                                }
                            }
                        }
                    }
                });

                // Release dana author untuk content purchase yang melewati
                // refund window
                let content_repo = self.state.content_repository.clone();
                let content_hold_days = self.state.config.content_hold_days;
                tokio::spawn(async move {
                    for attempt in 1..=3 {
                        match content_repo.release_overdue(content_hold_days).await {
                            Ok(released) => {
                                if released > 0 {
                                    tracing::info!("✅ Released earnings for {} content purchases", released);
                                }
                                break;
                            }
                            Err(e) => {
                                if attempt == 3 {
                                    tracing::error!("❌ Failed to release content earnings after 3 attempts: {}", e);
                                } else {
                                    tokio::time::sleep(Duration::from_millis(1000)).await;
                                }
                            }
                        }
                    }
                });

                // Expire content licenses yang melewati expires_at
                let content_repo = self.state.content_repository.clone();
                tokio::spawn(async move {
                    for attempt in 1..=3 {
                        match content_repo.expire_overdue().await {
                            Ok(expired) => {
                                if expired > 0 {
                                    tracing::info!("✅ Expired {} content licenses", expired);
                                }
                                break;
                            }
                            Err(e) => {
                                if attempt == 3 {
                                    tracing::error!("❌ Failed to expire content licenses after 3 attempts: {}", e);
                                } else {
                                    tokio::time::sleep(Duration::from_millis(1000)).await;
                                }
                            }
                        }
                    }
                });

                tracing::info!("✅ Settlement maintenance tasks completed");
            }
        });
    }
}
