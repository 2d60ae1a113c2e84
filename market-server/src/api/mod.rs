//! API routes for market-server

pub mod health;
pub mod identity;
pub mod orders;
pub mod payments;
pub mod stripe_webhook;

use axum::routing::{get, patch, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Create the combined router
pub fn create_router(state: AppState) -> Router {
    // Order lifecycle (caller identity from the upstream gateway)
    let orders = Router::new()
        .route("/api/orders", post(orders::create_order).get(orders::list_orders))
        .route("/api/orders/my-purchases", get(orders::my_purchases))
        .route("/api/orders/my-sales", get(orders::my_sales))
        .route("/api/orders/my-sale-items", get(orders::my_sale_items))
        .route("/api/orders/my-stats", get(orders::my_stats))
        .route(
            "/api/orders/{id}",
            get(orders::get_order)
                .patch(orders::update_order)
                .delete(orders::cancel_order),
        )
        .route("/api/orders/items/{item_id}", patch(orders::update_item));

    // Payment flow
    let payments = Router::new()
        .route("/api/payments/intent", post(payments::create_intent))
        .route("/api/payments/confirm/{order_id}", post(payments::confirm));

    // Stripe webhook (signature-verified, raw body)
    let webhook = Router::new().route("/stripe/webhook", post(stripe_webhook::handle_webhook));

    Router::new()
        .route("/health", get(health::health_check))
        .merge(orders)
        .merge(payments)
        .merge(webhook)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
