//! Order endpoints.

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;

use crate::api::identity::CurrentUser;
use crate::db::orders::{OrderFilter, OrderItemRow, OrderWithItems};
use crate::error::AppResult;
use crate::orders::service::{
    self, ItemUpdateInput, OrderLineInput, OrderUpdateInput, Paginated, UserStats,
};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderRequest {
    pub items: Vec<OrderLineInput>,
    pub shipping_instructions: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListQuery {
    pub status: Option<String>,
    pub buyer_id: Option<String>,
    pub seller_id: Option<String>,
    pub from_date: Option<i64>,
    pub to_date: Option<i64>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

impl ListQuery {
    fn into_filter(self) -> OrderFilter {
        OrderFilter {
            status: self.status,
            buyer_id: self.buyer_id,
            seller_id: self.seller_id,
            from_date: self.from_date,
            to_date: self.to_date,
            page: self.page.unwrap_or(1),
            limit: self.limit.unwrap_or(0),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CancelRequest {
    pub reason: Option<String>,
}

pub async fn create_order(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Json(req): Json<CreateOrderRequest>,
) -> AppResult<Json<OrderWithItems>> {
    let order = service::create_order(
        &state.pool,
        state.commission_rate,
        &user_id,
        &req.items,
        req.shipping_instructions.as_deref(),
    )
    .await?;
    Ok(Json(order))
}

pub async fn get_order(
    State(state): State<AppState>,
    CurrentUser(_user_id): CurrentUser,
    Path(id): Path<String>,
) -> AppResult<Json<OrderWithItems>> {
    Ok(Json(service::get_order(&state.pool, &id).await?))
}

/// Admin-style listing across all buyers and sellers.
pub async fn list_orders(
    State(state): State<AppState>,
    CurrentUser(_user_id): CurrentUser,
    Query(query): Query<ListQuery>,
) -> AppResult<Json<Paginated<OrderWithItems>>> {
    Ok(Json(service::list_orders(&state.pool, query.into_filter()).await?))
}

pub async fn my_purchases(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Query(query): Query<ListQuery>,
) -> AppResult<Json<Paginated<OrderWithItems>>> {
    let mut filter = query.into_filter();
    filter.buyer_id = Some(user_id);
    Ok(Json(service::list_orders(&state.pool, filter).await?))
}

/// Orders containing at least one of the caller's items.
pub async fn my_sales(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Query(query): Query<ListQuery>,
) -> AppResult<Json<Paginated<OrderWithItems>>> {
    let mut filter = query.into_filter();
    filter.seller_id = Some(user_id);
    Ok(Json(service::list_orders(&state.pool, filter).await?))
}

pub async fn my_sale_items(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Query(query): Query<ListQuery>,
) -> AppResult<Json<Paginated<OrderItemRow>>> {
    Ok(Json(
        service::list_sale_items(&state.pool, &user_id, query.into_filter()).await?,
    ))
}

pub async fn my_stats(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
) -> AppResult<Json<UserStats>> {
    Ok(Json(service::user_stats(&state.pool, &user_id).await?))
}

pub async fn update_order(
    State(state): State<AppState>,
    CurrentUser(_user_id): CurrentUser,
    Path(id): Path<String>,
    Json(input): Json<OrderUpdateInput>,
) -> AppResult<Json<OrderWithItems>> {
    Ok(Json(service::update_order(&state.pool, &id, &input).await?))
}

pub async fn cancel_order(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Path(id): Path<String>,
    body: Option<Json<CancelRequest>>,
) -> AppResult<Json<OrderWithItems>> {
    let reason = body.and_then(|Json(b)| b.reason);
    let order = crate::orders::payment::cancel_order_with_refund(
        &state.pool,
        &state.stripe,
        &user_id,
        &id,
        reason.as_deref(),
    )
    .await?;
    Ok(Json(order))
}

pub async fn update_item(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Path(item_id): Path<String>,
    Json(input): Json<ItemUpdateInput>,
) -> AppResult<Json<OrderItemRow>> {
    Ok(Json(
        service::update_item(&state.pool, &user_id, &item_id, &input).await?,
    ))
}
