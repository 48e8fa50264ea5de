pub mod auth;
pub mod rate_limit;

pub use auth::{AuthAdmin, AuthEarner, AuthUser};
