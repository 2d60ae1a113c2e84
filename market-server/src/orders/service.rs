//! Order orchestration: atomic creation against live stock, cancellation
//! with restitution, fulfilment updates, listings and stats.

use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tracing::info;
use uuid::Uuid;

use crate::db::orders::{
    self, ItemUpdate, NewOrder, NewOrderItem, OrderFilter, OrderItemRow, OrderWithItems,
};
use crate::db::{products, users};
use crate::error::{AppError, AppResult};
use crate::orders::money;
use crate::orders::status::{ItemStatus, OrderStatus};
use crate::util::now_millis;

/// Window a pending order has to be paid before the sweeper expires it.
pub const PAYMENT_WINDOW_MS: i64 = 30 * 60 * 1000;

const DEFAULT_PAGE_LIMIT: i64 = 10;
const MAX_PAGE_LIMIT: i64 = 100;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderLineInput {
    pub product_id: String,
    pub quantity: i64,
    /// Agreed price per unit; defaults to the product's listed price.
    pub unit_price: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderUpdateInput {
    pub status: Option<OrderStatus>,
    pub shipping_instructions: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemUpdateInput {
    pub status: Option<ItemStatus>,
    pub tracking_number: Option<String>,
    pub shipping_method: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct Paginated<T> {
    pub data: Vec<T>,
    pub total: i64,
    pub page: i64,
    pub limit: i64,
}

fn normalize(mut filter: OrderFilter) -> OrderFilter {
    if filter.page < 1 {
        filter.page = 1;
    }
    if filter.limit < 1 {
        filter.limit = DEFAULT_PAGE_LIMIT;
    }
    filter.limit = filter.limit.min(MAX_PAGE_LIMIT);
    filter
}

/// Create an order from product lines in one transaction.
///
/// Stock for every line is reserved with a conditional decrement; any line
/// that cannot be covered rolls the whole order back, so no partial order or
/// stock mutation is ever observable.
pub async fn create_order(
    pool: &SqlitePool,
    commission_rate: f64,
    buyer_id: &str,
    lines: &[OrderLineInput],
    shipping_instructions: Option<&str>,
) -> AppResult<OrderWithItems> {
    if lines.is_empty() {
        return Err(AppError::validation("Order must contain at least one item"));
    }
    for line in lines {
        if line.quantity <= 0 {
            return Err(AppError::validation("Quantity must be positive"));
        }
    }

    users::find_by_id(pool, buyer_id)
        .await?
        .ok_or_else(|| AppError::not_found("User not found"))?;

    let now = now_millis();
    let order_id = Uuid::new_v4().to_string();

    let mut tx = pool.begin().await?;

    let mut ids: Vec<String> = lines.iter().map(|l| l.product_id.clone()).collect();
    ids.sort();
    ids.dedup();
    let found = products::find_by_ids(&mut tx, &ids).await?;
    if found.len() < ids.len() {
        return Err(AppError::validation("Some products not found"));
    }

    let unavailable: Vec<&str> = found
        .iter()
        .filter(|p| !p.is_available)
        .map(|p| p.title.as_str())
        .collect();
    if !unavailable.is_empty() {
        return Err(AppError::validation(format!(
            "Products not available: {}",
            unavailable.join(", ")
        )));
    }

    orders::insert(
        &mut tx,
        &NewOrder {
            id: &order_id,
            buyer_id,
            shipping_instructions,
            expires_at: now + PAYMENT_WINDOW_MS,
            now,
        },
    )
    .await?;

    let mut line_totals = Vec::with_capacity(lines.len());
    let mut line_commissions = Vec::with_capacity(lines.len());
    for line in lines {
        let product = found
            .iter()
            .find(|p| p.id == line.product_id)
            .ok_or_else(|| AppError::validation("Some products not found"))?;

        let unit_price = line.unit_price.unwrap_or(product.price);
        let amounts = money::item_amounts(unit_price, line.quantity, commission_rate)?;

        orders::insert_item(
            &mut tx,
            &NewOrderItem {
                id: &Uuid::new_v4().to_string(),
                order_id: &order_id,
                product_id: &product.id,
                seller_id: &product.seller_id,
                quantity: line.quantity,
                unit_price,
                total_price: amounts.total_price,
                commission_rate,
                commission_amount: amounts.commission_amount,
                seller_payout: amounts.seller_payout,
                now,
            },
        )
        .await?;

        // Conditional decrement is the oversell guard; a false return means
        // another transaction took the stock first.
        if !products::reserve_stock(&mut tx, &product.id, line.quantity).await? {
            return Err(AppError::validation(format!(
                "Insufficient stock for product: {}",
                product.title
            )));
        }

        line_totals.push(amounts.total_price);
        line_commissions.push(amounts.commission_amount);
    }

    let total_amount = money::sum_amounts(line_totals)?;
    let total_commission = money::sum_amounts(line_commissions)?;
    orders::set_totals(&mut tx, &order_id, total_amount, total_commission, now).await?;

    tx.commit().await?;

    info!(order_id, buyer_id, total_amount, "order created");

    orders::find_with_items(pool, &order_id)
        .await?
        .ok_or_else(|| AppError::internal("order vanished after commit"))
}

/// Buyer-initiated cancellation is narrower than the transition table:
/// an order already handed to shipping cannot be cancelled.
pub fn ensure_cancellable(status: OrderStatus) -> AppResult<()> {
    if matches!(status, OrderStatus::Pending | OrderStatus::Paid) {
        Ok(())
    } else {
        Err(AppError::validation(format!(
            "Invalid status transition from {status} to cancelled"
        )))
    }
}

/// Cancel an order on the buyer's behalf, restoring the reserved stock.
pub async fn cancel_order(
    pool: &SqlitePool,
    user_id: &str,
    order_id: &str,
    reason: Option<&str>,
) -> AppResult<OrderWithItems> {
    let now = now_millis();
    let mut tx = pool.begin().await?;

    let order = orders::find_by_id(&mut *tx, order_id)
        .await?
        .ok_or_else(|| AppError::not_found("Order not found"))?;
    if order.buyer_id != user_id {
        return Err(AppError::forbidden("Only the buyer can cancel this order"));
    }

    ensure_cancellable(OrderStatus::from_db(&order.status)?)?;

    let items = orders::items_for(&mut *tx, order_id).await?;
    for item in &items {
        let item_status = ItemStatus::from_db(&item.status)?;
        if !matches!(item_status, ItemStatus::Cancelled | ItemStatus::Expired) {
            products::restore_stock(&mut tx, &item.product_id, item.quantity).await?;
        }
    }

    orders::set_cancelled(&mut tx, order_id, reason, now).await?;
    orders::set_items_status(&mut tx, order_id, ItemStatus::Cancelled.as_db(), now).await?;

    tx.commit().await?;

    info!(order_id, user_id, "order cancelled");

    orders::find_with_items(pool, order_id)
        .await?
        .ok_or_else(|| AppError::not_found("Order not found"))
}

/// Patch an order's status or shipping instructions.
///
/// Paid, cancelled and expired each have a dedicated flow and cannot be
/// reached through this endpoint.
pub async fn update_order(
    pool: &SqlitePool,
    order_id: &str,
    input: &OrderUpdateInput,
) -> AppResult<OrderWithItems> {
    let now = now_millis();
    let mut tx = pool.begin().await?;

    let order = orders::find_by_id(&mut *tx, order_id)
        .await?
        .ok_or_else(|| AppError::not_found("Order not found"))?;

    if let Some(to) = input.status {
        match to {
            OrderStatus::Paid => {
                return Err(AppError::validation(
                    "Paid status is set by payment confirmation",
                ));
            }
            OrderStatus::Cancelled => {
                return Err(AppError::validation(
                    "Use the cancellation endpoint to cancel an order",
                ));
            }
            OrderStatus::Expired => {
                return Err(AppError::validation("Expired status is set by the system"));
            }
            _ => {}
        }
        let from = OrderStatus::from_db(&order.status)?;
        from.ensure_transition(to)?;
        orders::set_status(&mut tx, order_id, to.as_db(), now).await?;
    }

    if let Some(instructions) = &input.shipping_instructions {
        orders::set_shipping_instructions(&mut tx, order_id, instructions, now).await?;
    }

    tx.commit().await?;

    orders::find_with_items(pool, order_id)
        .await?
        .ok_or_else(|| AppError::not_found("Order not found"))
}

/// Seller-side fulfilment update for a single item line.
///
/// Shipment and delivery timestamps are stamped automatically; when the last
/// sibling is delivered the parent order rolls up to completed.
pub async fn update_item(
    pool: &SqlitePool,
    user_id: &str,
    item_id: &str,
    input: &ItemUpdateInput,
) -> AppResult<OrderItemRow> {
    let now = now_millis();
    let mut tx = pool.begin().await?;

    // Status is read and validated inside the transaction so a concurrent
    // update cannot slip between the FSM check and the write.
    let item = orders::find_item(&mut *tx, item_id)
        .await?
        .ok_or_else(|| AppError::not_found("Order item not found"))?;
    if item.seller_id != user_id {
        return Err(AppError::forbidden("Only the seller can update this item"));
    }

    let mut update = ItemUpdate {
        tracking_number: input.tracking_number.as_deref(),
        shipping_method: input.shipping_method.as_deref(),
        ..ItemUpdate::default()
    };

    let mut delivered = false;
    if let Some(to) = input.status {
        let from = ItemStatus::from_db(&item.status)?;
        from.ensure_transition(to)?;
        update.status = Some(to.as_db());
        match to {
            ItemStatus::Shipped => update.shipped_at = Some(now),
            ItemStatus::Delivered => {
                update.delivered_at = Some(now);
                delivered = true;
            }
            _ => {}
        }
    }

    orders::update_item(&mut tx, item_id, &update, now).await?;

    if delivered {
        let siblings = orders::items_for(&mut *tx, &item.order_id).await?;
        let all_delivered = siblings
            .iter()
            .all(|s| s.status == ItemStatus::Delivered.as_db());
        if all_delivered {
            let order = orders::find_by_id(&mut *tx, &item.order_id)
                .await?
                .ok_or_else(|| AppError::not_found("Order not found"))?;
            let order_status = OrderStatus::from_db(&order.status)?;
            if matches!(order_status, OrderStatus::Paid | OrderStatus::Shipping) {
                orders::set_status(&mut tx, &item.order_id, OrderStatus::Completed.as_db(), now)
                    .await?;
                info!(order_id = %item.order_id, "all items delivered, order completed");
            }
        }
    }

    tx.commit().await?;

    orders::find_item(pool, item_id)
        .await?
        .ok_or_else(|| AppError::not_found("Order item not found"))
}

pub async fn get_order(pool: &SqlitePool, order_id: &str) -> AppResult<OrderWithItems> {
    orders::find_with_items(pool, order_id)
        .await?
        .ok_or_else(|| AppError::not_found("Order not found"))
}

/// Filtered listing, items hydrated per order.
pub async fn list_orders(
    pool: &SqlitePool,
    filter: OrderFilter,
) -> AppResult<Paginated<OrderWithItems>> {
    let filter = normalize(filter);
    let (rows, total) = orders::list(pool, &filter).await?;

    let mut data = Vec::with_capacity(rows.len());
    for order in rows {
        let items = orders::items_for(pool, &order.id).await?;
        data.push(OrderWithItems { order, items });
    }

    Ok(Paginated {
        data,
        total,
        page: filter.page,
        limit: filter.limit,
    })
}

/// A seller's item lines across all orders.
pub async fn list_sale_items(
    pool: &SqlitePool,
    seller_id: &str,
    filter: OrderFilter,
) -> AppResult<Paginated<OrderItemRow>> {
    let filter = normalize(filter);
    let (data, total) = orders::list_sale_items(pool, seller_id, &filter).await?;
    Ok(Paginated {
        data,
        total,
        page: filter.page,
        limit: filter.limit,
    })
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserStats {
    pub buyer: orders::BuyerStats,
    pub seller: orders::SellerStats,
}

pub async fn user_stats(pool: &SqlitePool, user_id: &str) -> AppResult<UserStats> {
    let buyer = orders::buyer_stats(pool, user_id).await?;
    let seller = orders::seller_stats(pool, user_id).await?;
    Ok(UserStats { buyer, seller })
}
