//! Order and order-item rows
//!
//! Plain query functions over the pool (or a transaction connection for the
//! multi-row mutations driven by the orchestrator and sweeper).

use serde::Serialize;
use sqlx::{Sqlite, SqliteConnection, SqlitePool};

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct OrderRow {
    pub id: String,
    pub buyer_id: String,
    pub total_amount: f64,
    pub total_commission: f64,
    pub status: String,
    pub payment_intent_id: Option<String>,
    pub payment_metadata: Option<String>,
    pub shipping_instructions: Option<String>,
    pub cancellation_reason: Option<String>,
    pub expires_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Item row hydrated with the product title and seller name snapshot, so the
/// engine and its callers never operate on a partially loaded aggregate.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct OrderItemRow {
    pub id: String,
    pub order_id: String,
    pub product_id: String,
    pub seller_id: String,
    pub quantity: i64,
    pub unit_price: f64,
    pub total_price: f64,
    pub commission_rate: f64,
    pub commission_amount: f64,
    pub seller_payout: f64,
    pub status: String,
    pub tracking_number: Option<String>,
    pub shipping_method: Option<String>,
    pub shipped_at: Option<i64>,
    pub delivered_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
    pub product_title: Option<String>,
    pub seller_name: Option<String>,
}

/// Fully hydrated aggregate: the order plus all of its items.
#[derive(Debug, Clone, Serialize)]
pub struct OrderWithItems {
    #[serde(flatten)]
    pub order: OrderRow,
    pub items: Vec<OrderItemRow>,
}

pub struct NewOrder<'a> {
    pub id: &'a str,
    pub buyer_id: &'a str,
    pub shipping_instructions: Option<&'a str>,
    pub expires_at: i64,
    pub now: i64,
}

pub struct NewOrderItem<'a> {
    pub id: &'a str,
    pub order_id: &'a str,
    pub product_id: &'a str,
    pub seller_id: &'a str,
    pub quantity: i64,
    pub unit_price: f64,
    pub total_price: f64,
    pub commission_rate: f64,
    pub commission_amount: f64,
    pub seller_payout: f64,
    pub now: i64,
}

/// Listing filter; all fields optional, dates are unix-millis bounds on
/// the order's created_at.
#[derive(Debug, Default, Clone)]
pub struct OrderFilter {
    pub status: Option<String>,
    pub buyer_id: Option<String>,
    pub seller_id: Option<String>,
    pub from_date: Option<i64>,
    pub to_date: Option<i64>,
    pub page: i64,
    pub limit: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BuyerStats {
    pub total_purchases: i64,
    pub total_spent: f64,
    pub pending_orders: i64,
    pub completed_orders: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SellerStats {
    pub total_sales: i64,
    pub total_revenue: f64,
    pub total_commission: f64,
    pub pending_orders: i64,
    pub completed_orders: i64,
}

const ITEM_SELECT: &str = "SELECT i.*, p.title AS product_title, u.name AS seller_name \
     FROM order_items i \
     JOIN products p ON p.id = i.product_id \
     JOIN users u ON u.id = i.seller_id";

// ========== Writes (transaction scope) ==========

pub async fn insert(conn: &mut SqliteConnection, order: &NewOrder<'_>) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO orders (id, buyer_id, status, shipping_instructions, expires_at, created_at, updated_at) \
         VALUES (?, ?, 'pending', ?, ?, ?, ?)",
    )
    .bind(order.id)
    .bind(order.buyer_id)
    .bind(order.shipping_instructions)
    .bind(order.expires_at)
    .bind(order.now)
    .bind(order.now)
    .execute(conn)
    .await?;
    Ok(())
}

pub async fn insert_item(
    conn: &mut SqliteConnection,
    item: &NewOrderItem<'_>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO order_items (id, order_id, product_id, seller_id, quantity, unit_price, \
            total_price, commission_rate, commission_amount, seller_payout, status, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 'pending', ?, ?)",
    )
    .bind(item.id)
    .bind(item.order_id)
    .bind(item.product_id)
    .bind(item.seller_id)
    .bind(item.quantity)
    .bind(item.unit_price)
    .bind(item.total_price)
    .bind(item.commission_rate)
    .bind(item.commission_amount)
    .bind(item.seller_payout)
    .bind(item.now)
    .bind(item.now)
    .execute(conn)
    .await?;
    Ok(())
}

pub async fn set_totals(
    conn: &mut SqliteConnection,
    order_id: &str,
    total_amount: f64,
    total_commission: f64,
    now: i64,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE orders SET total_amount = ?, total_commission = ?, updated_at = ? WHERE id = ?")
        .bind(total_amount)
        .bind(total_commission)
        .bind(now)
        .bind(order_id)
        .execute(conn)
        .await?;
    Ok(())
}

pub async fn set_cancelled(
    conn: &mut SqliteConnection,
    order_id: &str,
    reason: Option<&str>,
    now: i64,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE orders SET status = 'cancelled', cancellation_reason = ?, updated_at = ? WHERE id = ?",
    )
    .bind(reason)
    .bind(now)
    .bind(order_id)
    .execute(conn)
    .await?;
    Ok(())
}

/// Expire an order, but only if it is still pending (a payment confirmed
/// between candidate selection and this update must win). Returns whether
/// the row was transitioned.
pub async fn mark_expired(
    conn: &mut SqliteConnection,
    order_id: &str,
    reason: &str,
    now: i64,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE orders SET status = 'expired', cancellation_reason = ?, updated_at = ? \
         WHERE id = ? AND status = 'pending'",
    )
    .bind(reason)
    .bind(now)
    .bind(order_id)
    .execute(conn)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Check-and-set paid transition: only applies when the order is still
/// pending. Returns whether the transition was applied, making payment
/// confirmation idempotent at the storage level.
pub async fn mark_paid(
    conn: &mut SqliteConnection,
    order_id: &str,
    payment_metadata: &str,
    now: i64,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE orders SET status = 'paid', payment_metadata = ?, updated_at = ? \
         WHERE id = ? AND status = 'pending'",
    )
    .bind(payment_metadata)
    .bind(now)
    .bind(order_id)
    .execute(conn)
    .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn set_status(
    conn: &mut SqliteConnection,
    order_id: &str,
    status: &str,
    now: i64,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE orders SET status = ?, updated_at = ? WHERE id = ?")
        .bind(status)
        .bind(now)
        .bind(order_id)
        .execute(conn)
        .await?;
    Ok(())
}

pub async fn set_items_status(
    conn: &mut SqliteConnection,
    order_id: &str,
    status: &str,
    now: i64,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE order_items SET status = ?, updated_at = ? WHERE order_id = ?")
        .bind(status)
        .bind(now)
        .bind(order_id)
        .execute(conn)
        .await?;
    Ok(())
}

pub async fn set_shipping_instructions(
    conn: &mut SqliteConnection,
    order_id: &str,
    instructions: &str,
    now: i64,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE orders SET shipping_instructions = ?, updated_at = ? WHERE id = ?")
        .bind(instructions)
        .bind(now)
        .bind(order_id)
        .execute(conn)
        .await?;
    Ok(())
}

/// Field-wise item update; only the provided columns are touched.
#[derive(Debug, Default)]
pub struct ItemUpdate<'a> {
    pub status: Option<&'a str>,
    pub tracking_number: Option<&'a str>,
    pub shipping_method: Option<&'a str>,
    pub shipped_at: Option<i64>,
    pub delivered_at: Option<i64>,
}

pub async fn update_item(
    conn: &mut SqliteConnection,
    item_id: &str,
    update: &ItemUpdate<'_>,
    now: i64,
) -> Result<(), sqlx::Error> {
    let mut set_parts = vec!["updated_at = ?".to_string()];
    if update.status.is_some() {
        set_parts.push("status = ?".to_string());
    }
    if update.tracking_number.is_some() {
        set_parts.push("tracking_number = ?".to_string());
    }
    if update.shipping_method.is_some() {
        set_parts.push("shipping_method = ?".to_string());
    }
    if update.shipped_at.is_some() {
        set_parts.push("shipped_at = ?".to_string());
    }
    if update.delivered_at.is_some() {
        set_parts.push("delivered_at = ?".to_string());
    }

    let sql = format!("UPDATE order_items SET {} WHERE id = ?", set_parts.join(", "));
    let mut query = sqlx::query(&sql).bind(now);
    if let Some(v) = update.status {
        query = query.bind(v.to_string());
    }
    if let Some(v) = update.tracking_number {
        query = query.bind(v.to_string());
    }
    if let Some(v) = update.shipping_method {
        query = query.bind(v.to_string());
    }
    if let Some(v) = update.shipped_at {
        query = query.bind(v);
    }
    if let Some(v) = update.delivered_at {
        query = query.bind(v);
    }
    query.bind(item_id.to_string()).execute(conn).await?;
    Ok(())
}

// ========== Payment bookkeeping ==========

pub async fn set_payment_intent(
    pool: &SqlitePool,
    order_id: &str,
    intent_id: &str,
    now: i64,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE orders SET payment_intent_id = ?, updated_at = ? WHERE id = ?")
        .bind(intent_id)
        .bind(now)
        .bind(order_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Store a failure audit blob without touching status; guarded so a late
/// failure event never overwrites the record of a confirmed payment.
pub async fn set_failure_metadata(
    pool: &SqlitePool,
    order_id: &str,
    metadata: &str,
    now: i64,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE orders SET payment_metadata = ?, updated_at = ? WHERE id = ? AND status = 'pending'",
    )
    .bind(metadata)
    .bind(now)
    .bind(order_id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Dedup ledger for webhook deliveries: insert first, then check whether the
/// row was new (eliminates the check-then-insert race).
pub async fn record_webhook_event(
    pool: &SqlitePool,
    event_id: &str,
    event_type: &str,
    now: i64,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "INSERT INTO processed_webhook_events (event_id, event_type, processed_at) \
         VALUES (?, ?, ?) ON CONFLICT DO NOTHING",
    )
    .bind(event_id)
    .bind(event_type)
    .bind(now)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Release a ledger entry after a failed handling attempt so the gateway's
/// redelivery is processed instead of skipped.
pub async fn forget_webhook_event(pool: &SqlitePool, event_id: &str) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM processed_webhook_events WHERE event_id = ?")
        .bind(event_id)
        .execute(pool)
        .await?;
    Ok(())
}

// ========== Reads ==========

pub async fn find_by_id<'e, E>(executor: E, order_id: &str) -> Result<Option<OrderRow>, sqlx::Error>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    sqlx::query_as("SELECT * FROM orders WHERE id = ?")
        .bind(order_id)
        .fetch_optional(executor)
        .await
}

pub async fn items_for<'e, E>(
    executor: E,
    order_id: &str,
) -> Result<Vec<OrderItemRow>, sqlx::Error>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    sqlx::query_as(&format!(
        "{ITEM_SELECT} WHERE i.order_id = ? ORDER BY i.created_at, i.id"
    ))
    .bind(order_id)
    .fetch_all(executor)
    .await
}

pub async fn find_item<'e, E>(
    executor: E,
    item_id: &str,
) -> Result<Option<OrderItemRow>, sqlx::Error>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    sqlx::query_as(&format!("{ITEM_SELECT} WHERE i.id = ?"))
        .bind(item_id)
        .fetch_optional(executor)
        .await
}

pub async fn find_with_items(
    pool: &SqlitePool,
    order_id: &str,
) -> Result<Option<OrderWithItems>, sqlx::Error> {
    let Some(order) = find_by_id(pool, order_id).await? else {
        return Ok(None);
    };
    let items = items_for(pool, order_id).await?;
    Ok(Some(OrderWithItems { order, items }))
}

/// Orders still pending past their payment deadline — the sweeper's batch.
pub async fn expired_pending_ids(
    conn: &mut SqliteConnection,
    now: i64,
) -> Result<Vec<String>, sqlx::Error> {
    let rows: Vec<(String,)> = sqlx::query_as(
        "SELECT id FROM orders WHERE status = 'pending' AND expires_at IS NOT NULL AND expires_at < ?",
    )
    .bind(now)
    .fetch_all(conn)
    .await?;
    Ok(rows.into_iter().map(|r| r.0).collect())
}

/// Filtered, paginated order listing (newest first).
pub async fn list(
    pool: &SqlitePool,
    filter: &OrderFilter,
) -> Result<(Vec<OrderRow>, i64), sqlx::Error> {
    let mut conditions: Vec<&str> = Vec::new();
    if filter.status.is_some() {
        conditions.push("o.status = ?");
    }
    if filter.buyer_id.is_some() {
        conditions.push("o.buyer_id = ?");
    }
    if filter.seller_id.is_some() {
        conditions.push(
            "EXISTS (SELECT 1 FROM order_items it WHERE it.order_id = o.id AND it.seller_id = ?)",
        );
    }
    if filter.from_date.is_some() {
        conditions.push("o.created_at >= ?");
    }
    if filter.to_date.is_some() {
        conditions.push("o.created_at <= ?");
    }

    let where_clause = if conditions.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", conditions.join(" AND "))
    };

    let count_sql = format!("SELECT COUNT(*) FROM orders o{where_clause}");
    let mut count_query = sqlx::query_as::<_, (i64,)>(&count_sql);
    if let Some(v) = &filter.status {
        count_query = count_query.bind(v.clone());
    }
    if let Some(v) = &filter.buyer_id {
        count_query = count_query.bind(v.clone());
    }
    if let Some(v) = &filter.seller_id {
        count_query = count_query.bind(v.clone());
    }
    if let Some(v) = filter.from_date {
        count_query = count_query.bind(v);
    }
    if let Some(v) = filter.to_date {
        count_query = count_query.bind(v);
    }
    let (total,) = count_query.fetch_one(pool).await?;

    let list_sql = format!(
        "SELECT o.* FROM orders o{where_clause} ORDER BY o.created_at DESC, o.id LIMIT ? OFFSET ?"
    );
    let mut list_query = sqlx::query_as::<_, OrderRow>(&list_sql);
    if let Some(v) = &filter.status {
        list_query = list_query.bind(v.clone());
    }
    if let Some(v) = &filter.buyer_id {
        list_query = list_query.bind(v.clone());
    }
    if let Some(v) = &filter.seller_id {
        list_query = list_query.bind(v.clone());
    }
    if let Some(v) = filter.from_date {
        list_query = list_query.bind(v);
    }
    if let Some(v) = filter.to_date {
        list_query = list_query.bind(v);
    }
    let offset = (filter.page - 1) * filter.limit;
    let orders = list_query.bind(filter.limit).bind(offset).fetch_all(pool).await?;

    Ok((orders, total))
}

/// A seller's item lines across all orders, filtered and paginated.
pub async fn list_sale_items(
    pool: &SqlitePool,
    seller_id: &str,
    filter: &OrderFilter,
) -> Result<(Vec<OrderItemRow>, i64), sqlx::Error> {
    let mut conditions = vec!["i.seller_id = ?".to_string()];
    if filter.status.is_some() {
        conditions.push("i.status = ?".to_string());
    }
    if filter.from_date.is_some() {
        conditions.push("i.created_at >= ?".to_string());
    }
    if filter.to_date.is_some() {
        conditions.push("i.created_at <= ?".to_string());
    }
    let where_clause = format!(" WHERE {}", conditions.join(" AND "));

    let count_sql = format!("SELECT COUNT(*) FROM order_items i{where_clause}");
    let mut count_query = sqlx::query_as::<_, (i64,)>(&count_sql).bind(seller_id.to_string());
    if let Some(v) = &filter.status {
        count_query = count_query.bind(v.clone());
    }
    if let Some(v) = filter.from_date {
        count_query = count_query.bind(v);
    }
    if let Some(v) = filter.to_date {
        count_query = count_query.bind(v);
    }
    let (total,) = count_query.fetch_one(pool).await?;

    let list_sql = format!(
        "{ITEM_SELECT}{where_clause} ORDER BY i.created_at DESC, i.id LIMIT ? OFFSET ?"
    );
    let mut list_query =
        sqlx::query_as::<_, OrderItemRow>(&list_sql).bind(seller_id.to_string());
    if let Some(v) = &filter.status {
        list_query = list_query.bind(v.clone());
    }
    if let Some(v) = filter.from_date {
        list_query = list_query.bind(v);
    }
    if let Some(v) = filter.to_date {
        list_query = list_query.bind(v);
    }
    let offset = (filter.page - 1) * filter.limit;
    let items = list_query.bind(filter.limit).bind(offset).fetch_all(pool).await?;

    Ok((items, total))
}

// ========== Aggregates ==========

pub async fn buyer_stats(pool: &SqlitePool, buyer_id: &str) -> Result<BuyerStats, sqlx::Error> {
    let row: (i64, f64, i64, i64) = sqlx::query_as(
        "SELECT COUNT(*), \
                COALESCE(SUM(total_amount), 0.0), \
                COUNT(CASE WHEN status IN ('pending', 'paid', 'shipping') THEN 1 END), \
                COUNT(CASE WHEN status = 'completed' THEN 1 END) \
         FROM orders WHERE buyer_id = ?",
    )
    .bind(buyer_id)
    .fetch_one(pool)
    .await?;

    Ok(BuyerStats {
        total_purchases: row.0,
        total_spent: row.1,
        pending_orders: row.2,
        completed_orders: row.3,
    })
}

pub async fn seller_stats(pool: &SqlitePool, seller_id: &str) -> Result<SellerStats, sqlx::Error> {
    let row: (i64, f64, f64, i64, i64) = sqlx::query_as(
        "SELECT COUNT(*), \
                COALESCE(SUM(seller_payout), 0.0), \
                COALESCE(SUM(commission_amount), 0.0), \
                COUNT(CASE WHEN status IN ('pending', 'paid', 'processing', 'shipped') THEN 1 END), \
                COUNT(CASE WHEN status = 'delivered' THEN 1 END) \
         FROM order_items WHERE seller_id = ?",
    )
    .bind(seller_id)
    .fetch_one(pool)
    .await?;

    Ok(SellerStats {
        total_sales: row.0,
        total_revenue: row.1,
        total_commission: row.2,
        pending_orders: row.3,
        completed_orders: row.4,
    })
}
