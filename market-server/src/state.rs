//! Shared application state handed to every handler.

use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;
use crate::error::AppError;
use crate::stripe::StripeClient;

#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
    pub stripe: StripeClient,
    pub webhook_secret: String,
    pub commission_rate: f64,
}

impl AppState {
    pub async fn new(config: &Config) -> Result<Self, AppError> {
        let pool = db::connect(&config.database_path).await?;
        let stripe = StripeClient::new(config.stripe_secret_key.clone(), config.currency.clone());
        Ok(Self {
            pool,
            stripe,
            webhook_secret: config.stripe_webhook_secret.clone(),
            commission_rate: config.commission_rate,
        })
    }
}
