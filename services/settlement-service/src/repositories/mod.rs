pub mod content_repo;
pub mod ledger_repo;
pub mod order_repo;
pub mod payment_repo;
pub mod service_order_repo;
pub mod withdrawal_repo;

use crate::error::AppError;

// Format daftar state untuk klausa SQL `status IN (...)`
pub(crate) fn sql_in_list(statuses: impl IntoIterator<Item = &'static str>) -> String {
    statuses
        .into_iter()
        .map(|s| format!("'{}'", s))
        .collect::<Vec<_>>()
        .join(", ")
}

// Target sebuah event menurut tabel transisi domain; edge yang hilang
// berarti bug internal, bukan input user
pub(crate) fn required_target<S>(target: Option<S>, event: &str) -> Result<S, AppError> {
    target.ok_or_else(|| {
        AppError::internal(format!("Event {} tidak punya edge di tabel transisi", event))
    })
}
