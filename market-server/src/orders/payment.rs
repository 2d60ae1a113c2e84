//! Payment flow: intent creation, confirmation and the paid-effects
//! transition shared by the API confirm path and the webhook consumer.

use serde::Serialize;
use serde_json::json;
use sqlx::SqlitePool;
use tracing::{info, warn};

use crate::db::orders::{self, OrderWithItems};
use crate::db::users;
use crate::error::{AppError, AppResult};
use crate::orders::money;
use crate::orders::status::{ItemStatus, OrderStatus};
use crate::orders::service;
use crate::stripe::{PaymentIntent, StripeClient};
use crate::util::now_millis;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentIntentResponse {
    pub payment_intent_id: String,
    pub client_secret: Option<String>,
    pub amount: i64,
}

/// Create (or reuse) the gateway customer and open a payment intent for a
/// pending order.
pub async fn create_payment_intent(
    pool: &SqlitePool,
    stripe: &StripeClient,
    buyer_id: &str,
    order_id: &str,
) -> AppResult<PaymentIntentResponse> {
    let order = orders::find_with_items(pool, order_id)
        .await?
        .ok_or_else(|| AppError::not_found("Order not found"))?;
    if order.order.buyer_id != buyer_id {
        return Err(AppError::forbidden("Only the buyer can pay for this order"));
    }
    if order.order.status != OrderStatus::Pending.as_db() {
        return Err(AppError::validation("Order is not awaiting payment"));
    }

    let user = users::find_by_id(pool, buyer_id)
        .await?
        .ok_or_else(|| AppError::not_found("User not found"))?;

    // Customer is created once and cached on the user row.
    let customer_id = match user.stripe_customer_id {
        Some(id) => id,
        None => {
            let id = stripe
                .create_customer(&user.email, user.name.as_deref(), &user.id)
                .await?;
            users::set_stripe_customer(pool, &user.id, &id).await?;
            id
        }
    };

    let amount = money::to_minor_units(order.order.total_amount)?;
    let short_id = &order_id[order_id.len().saturating_sub(8)..];
    let description = format!("Order #{short_id} - {} items", order.items.len());

    let intent = stripe
        .create_payment_intent(amount, &customer_id, order_id, buyer_id, &description)
        .await?;

    orders::set_payment_intent(pool, order_id, &intent.id, now_millis()).await?;

    info!(order_id, intent_id = %intent.id, amount, "payment intent created");

    Ok(PaymentIntentResponse {
        payment_intent_id: intent.id,
        client_secret: intent.client_secret,
        amount,
    })
}

/// Buyer-driven confirmation: re-verify the intent with the gateway, then
/// apply the paid transition. Safe to call repeatedly.
pub async fn confirm_payment(
    pool: &SqlitePool,
    stripe: &StripeClient,
    buyer_id: &str,
    order_id: &str,
    payment_intent_id: &str,
) -> AppResult<OrderWithItems> {
    let order = orders::find_by_id(pool, order_id)
        .await?
        .ok_or_else(|| AppError::not_found("Order not found"))?;
    if order.buyer_id != buyer_id {
        return Err(AppError::forbidden("Only the buyer can pay for this order"));
    }

    // Already confirmed (by this call racing the webhook, or a retry).
    if order.status == OrderStatus::Paid.as_db() {
        return service::get_order(pool, order_id).await;
    }

    match order.payment_intent_id.as_deref() {
        Some(stored) if stored == payment_intent_id => {}
        _ => return Err(AppError::validation("Payment intent mismatch")),
    }

    // Never trust the client's word for the payment outcome.
    let intent = stripe.retrieve_payment_intent(payment_intent_id).await?;
    if intent.status != "succeeded" {
        return Err(AppError::validation("Payment not successful"));
    }

    apply_paid_effects(pool, order_id, &intent).await?;
    service::get_order(pool, order_id).await
}

/// Transition an order (and its items) to paid, recording the payment audit
/// blob. Returns `Ok(false)` when the order was already paid, making the
/// operation idempotent for retried confirmations and webhook redeliveries.
///
/// The intent must match the one stored on the order; a payment meant for a
/// different order (or a stale intent after a retry) is never applied.
pub async fn apply_paid_effects(
    pool: &SqlitePool,
    order_id: &str,
    intent: &PaymentIntent,
) -> AppResult<bool> {
    let now = now_millis();
    let metadata = json!({
        "id": intent.id,
        "amount": intent.amount,
        "status": intent.status,
        "chargeId": intent.latest_charge,
        "paidAt": now,
    })
    .to_string();

    let mut tx = pool.begin().await?;

    let order = orders::find_by_id(&mut *tx, order_id)
        .await?
        .ok_or_else(|| AppError::not_found("Order not found"))?;
    match order.payment_intent_id.as_deref() {
        Some(stored) if stored == intent.id => {}
        _ => return Err(AppError::validation("Payment intent mismatch")),
    }

    let applied = orders::mark_paid(&mut tx, order_id, &metadata, now).await?;
    if applied {
        orders::set_items_status(&mut tx, order_id, ItemStatus::Paid.as_db(), now).await?;
    }
    tx.commit().await?;

    if applied {
        info!(order_id, intent_id = %intent.id, "payment confirmed");
        return Ok(true);
    }
    // The guarded update saw a non-pending status; the row read in the same
    // transaction says which.
    if order.status == OrderStatus::Paid.as_db() {
        return Ok(false);
    }
    Err(AppError::validation("Order is not awaiting payment"))
}

/// Record a gateway failure for audit without moving the order; it stays
/// pending and the buyer may retry until the payment window closes.
pub async fn record_payment_failure(
    pool: &SqlitePool,
    order_id: &str,
    intent_id: &str,
    message: Option<&str>,
) -> AppResult<()> {
    let now = now_millis();
    let metadata = json!({
        "id": intent_id,
        "status": "failed",
        "error": message,
        "failedAt": now,
    })
    .to_string();
    orders::set_failure_metadata(pool, order_id, &metadata, now).await?;
    warn!(order_id, intent_id, "payment failed");
    Ok(())
}

/// Cancel an order, refunding the charge first when it was already paid.
pub async fn cancel_order_with_refund(
    pool: &SqlitePool,
    stripe: &StripeClient,
    user_id: &str,
    order_id: &str,
    reason: Option<&str>,
) -> AppResult<OrderWithItems> {
    let order = orders::find_by_id(pool, order_id)
        .await?
        .ok_or_else(|| AppError::not_found("Order not found"))?;
    if order.buyer_id != user_id {
        return Err(AppError::forbidden("Only the buyer can cancel this order"));
    }
    service::ensure_cancellable(OrderStatus::from_db(&order.status)?)?;

    if order.status == OrderStatus::Paid.as_db() {
        if let Some(intent_id) = order.payment_intent_id.as_deref() {
            let refund_id = stripe
                .create_refund(intent_id, "requested_by_customer")
                .await?;
            info!(order_id, refund_id, "payment refunded for cancellation");
        }
    }

    service::cancel_order(pool, user_id, order_id, reason).await
}
