//! Marketplace order and payment engine.
//!
//! Handles atomic multi-item order creation against live inventory,
//! per-item commission settlement, the order and item lifecycles, the
//! Stripe payment flow with signed webhooks, and background expiration
//! of unpaid orders.

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod orders;
pub mod state;
pub mod stripe;
pub mod util;

pub use config::Config;
pub use error::{AppError, AppResult};
pub use state::AppState;
