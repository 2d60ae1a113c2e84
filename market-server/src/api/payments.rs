//! Payment endpoints.

use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;

use crate::api::identity::CurrentUser;
use crate::db::orders::OrderWithItems;
use crate::error::AppResult;
use crate::orders::payment::{self, PaymentIntentResponse};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateIntentRequest {
    pub order_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmRequest {
    pub payment_intent_id: String,
}

pub async fn create_intent(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Json(req): Json<CreateIntentRequest>,
) -> AppResult<Json<PaymentIntentResponse>> {
    let resp =
        payment::create_payment_intent(&state.pool, &state.stripe, &user_id, &req.order_id).await?;
    Ok(Json(resp))
}

pub async fn confirm(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Path(order_id): Path<String>,
    Json(req): Json<ConfirmRequest>,
) -> AppResult<Json<OrderWithItems>> {
    let order = payment::confirm_payment(
        &state.pool,
        &state.stripe,
        &user_id,
        &order_id,
        &req.payment_intent_id,
    )
    .await?;
    Ok(Json(order))
}
