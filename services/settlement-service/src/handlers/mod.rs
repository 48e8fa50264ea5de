pub mod content_handler;
pub mod gateway_service;
pub mod order_handler;
pub mod payment_handler;
pub mod service_order_handler;
pub mod withdrawal_handler;
