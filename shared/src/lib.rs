// Shared library untuk semua service Karyaloka

pub mod models;
pub mod utils;

pub use models::claims::TokenClaims;
pub use utils::money::{Money, MoneyError};
