//! Product rows — owned by the catalog service; the order engine reads a
//! snapshot and moves the quantity column in both directions.

use serde::Serialize;
use sqlx::{SqliteConnection, SqlitePool};

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: String,
    pub seller_id: String,
    pub title: String,
    pub price: f64,
    pub quantity: i64,
    pub is_available: bool,
}

pub async fn find_by_id(pool: &SqlitePool, id: &str) -> Result<Option<Product>, sqlx::Error> {
    sqlx::query_as(
        "SELECT id, seller_id, title, price, quantity, is_available FROM products WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(pool)
    .await
}

/// Bulk snapshot load for order creation. One round trip for all ids; the
/// caller compares result count against the requested set.
pub async fn find_by_ids(
    conn: &mut SqliteConnection,
    ids: &[String],
) -> Result<Vec<Product>, sqlx::Error> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }

    let placeholders = vec!["?"; ids.len()].join(", ");
    let sql = format!(
        "SELECT id, seller_id, title, price, quantity, is_available \
         FROM products WHERE id IN ({placeholders})"
    );

    let mut query = sqlx::query_as(&sql);
    for id in ids {
        query = query.bind(id);
    }
    query.fetch_all(conn).await
}

/// Conditional stock reservation. The decrement only applies when enough
/// stock remains; returns whether a row was updated. This is the oversell
/// guard: check and decrement happen in one statement.
pub async fn reserve_stock(
    conn: &mut SqliteConnection,
    product_id: &str,
    quantity: i64,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE products SET quantity = quantity - ?1 WHERE id = ?2 AND quantity >= ?1",
    )
    .bind(quantity)
    .bind(product_id)
    .execute(conn)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Return previously reserved stock (cancellation, expiration).
pub async fn restore_stock(
    conn: &mut SqliteConnection,
    product_id: &str,
    quantity: i64,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE products SET quantity = quantity + ? WHERE id = ?")
        .bind(quantity)
        .bind(product_id)
        .execute(conn)
        .await?;
    Ok(())
}
