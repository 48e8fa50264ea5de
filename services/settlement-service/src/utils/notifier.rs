// Fire-and-forget client ke notification service. Kegagalan notifikasi
// tidak pernah membatalkan settlement; cukup di-log.

use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct NotificationPayload {
    pub user_id: i32,
    pub event: String,
    pub title: String,
    pub body: String,
}

/// Kirim notifikasi di background task terpisah
pub fn notify(client: reqwest::Client, base_url: String, payload: NotificationPayload) {
    tokio::spawn(async move {
        let url = format!("{}/api/notifications/internal", base_url);
        match client.post(&url).json(&payload).send().await {
            Ok(response) if response.status().is_success() => {
                tracing::debug!(
                    "Notifikasi '{}' terkirim ke user {}",
                    payload.event,
                    payload.user_id
                );
            }
            Ok(response) => {
                tracing::warn!(
                    "Notification sink menolak event '{}' untuk user {}: {}",
                    payload.event,
                    payload.user_id,
                    response.status()
                );
            }
            Err(e) => {
                tracing::warn!(
                    "Gagal mengirim notifikasi '{}' ke user {}: {}",
                    payload.event,
                    payload.user_id,
                    e
                );
            }
        }
    });
}
