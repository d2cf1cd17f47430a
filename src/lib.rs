pub mod config;
pub mod error;
pub mod extractor;
pub mod payouts;
pub mod routes;
pub mod webhooks;

pub use routes::{api_routes, payout_app};
