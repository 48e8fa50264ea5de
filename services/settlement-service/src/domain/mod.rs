pub mod content;
pub mod ledger;
pub mod order;
pub mod payment;
pub mod service_order;
pub mod withdrawal;
