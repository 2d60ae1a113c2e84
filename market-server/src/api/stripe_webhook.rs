//! Stripe webhook handler
//!
//! POST /stripe/webhook — handles Stripe events (raw body for signature verification)

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};

use crate::db::orders;
use crate::orders::payment;
use crate::state::AppState;
use crate::stripe::{self, PaymentIntent};
use crate::util::now_millis;

/// Handle incoming Stripe webhook events
///
/// Must receive raw body (not JSON) for HMAC signature verification.
pub async fn handle_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    // 1. Get Stripe-Signature header
    let sig_header = match headers
        .get("stripe-signature")
        .and_then(|v| v.to_str().ok())
    {
        Some(s) => s,
        None => {
            tracing::warn!("Missing Stripe-Signature header");
            return StatusCode::BAD_REQUEST;
        }
    };

    // 2. Verify signature
    if let Err(e) = stripe::verify_webhook_signature(&body, sig_header, &state.webhook_secret) {
        tracing::warn!(error = e, "Webhook signature verification failed");
        return StatusCode::BAD_REQUEST;
    }

    // 3. Parse JSON event
    let event: serde_json::Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(%e, "Failed to parse webhook JSON");
            return StatusCode::BAD_REQUEST;
        }
    };

    let event_type = event["type"].as_str().unwrap_or("");
    tracing::info!(event_type = event_type, "Received Stripe webhook");

    // 4. Idempotency: INSERT first, check rows_affected (eliminates TOCTOU race)
    let event_id = match event["id"].as_str() {
        Some(id) => id,
        None => {
            tracing::warn!("Webhook event missing id");
            return StatusCode::BAD_REQUEST;
        }
    };

    match orders::record_webhook_event(&state.pool, event_id, event_type, now_millis()).await {
        Ok(false) => {
            tracing::info!(event_id = event_id, "Duplicate webhook event, skipping");
            return StatusCode::OK;
        }
        Err(e) => {
            tracing::error!(%e, "DB error recording webhook event");
            return StatusCode::INTERNAL_SERVER_ERROR;
        }
        Ok(true) => {} // New event, proceed
    }

    // 5. Handle event types
    let status = match event_type {
        "payment_intent.succeeded" => handle_intent_succeeded(&state, &event).await,
        "payment_intent.payment_failed" => handle_intent_failed(&state, &event).await,
        _ => {
            tracing::debug!(event_type = event_type, "Unhandled webhook event type");
            StatusCode::OK
        }
    };

    // A failed attempt must not consume the event id, or the gateway's
    // redelivery would be skipped as a duplicate.
    if status != StatusCode::OK {
        if let Err(e) = orders::forget_webhook_event(&state.pool, event_id).await {
            tracing::error!(%e, event_id, "failed to release webhook ledger entry");
        }
    }
    status
}

/// payment_intent.succeeded → order paid, items paid
async fn handle_intent_succeeded(state: &AppState, event: &serde_json::Value) -> StatusCode {
    let obj = match event.get("data").and_then(|d| d.get("object")) {
        Some(o) => o,
        None => return StatusCode::OK,
    };

    let order_id = match obj["metadata"]["order_id"].as_str() {
        Some(s) => s,
        None => {
            tracing::warn!("payment_intent.succeeded missing order_id metadata");
            return StatusCode::OK;
        }
    };
    let intent_id = match obj["id"].as_str() {
        Some(s) => s,
        None => return StatusCode::OK,
    };

    let intent = PaymentIntent {
        id: intent_id.to_string(),
        client_secret: None,
        status: "succeeded".to_string(),
        amount: obj["amount"].as_i64().unwrap_or(0),
        latest_charge: obj["latest_charge"].as_str().map(String::from),
    };

    match payment::apply_paid_effects(&state.pool, order_id, &intent).await {
        Ok(true) => StatusCode::OK,
        Ok(false) => {
            tracing::info!(order_id, "order already paid, webhook no-op");
            StatusCode::OK
        }
        Err(e) => {
            // Non-2xx so the gateway redelivers. apply_paid_effects is
            // idempotent, so a redelivery racing a concurrent confirm
            // resolves to a no-op.
            tracing::error!(%e, order_id, "failed to apply paid webhook");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

/// payment_intent.payment_failed → record failure, order stays pending
async fn handle_intent_failed(state: &AppState, event: &serde_json::Value) -> StatusCode {
    let obj = match event.get("data").and_then(|d| d.get("object")) {
        Some(o) => o,
        None => return StatusCode::OK,
    };

    let order_id = match obj["metadata"]["order_id"].as_str() {
        Some(s) => s,
        None => return StatusCode::OK,
    };
    let intent_id = obj["id"].as_str().unwrap_or("");
    let message = obj["last_payment_error"]["message"].as_str();

    match payment::record_payment_failure(&state.pool, order_id, intent_id, message).await {
        Ok(()) => StatusCode::OK,
        Err(e) => {
            tracing::error!(%e, order_id, "failed to record payment failure");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}
