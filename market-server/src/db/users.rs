//! User rows — owned by the account service; the order engine reads buyer
//! and seller identity and caches the external payment-customer id.

use serde::Serialize;
use sqlx::SqlitePool;

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub email: String,
    pub name: Option<String>,
    pub phone: Option<String>,
    pub stripe_customer_id: Option<String>,
}

pub async fn find_by_id(pool: &SqlitePool, id: &str) -> Result<Option<User>, sqlx::Error> {
    sqlx::query_as(
        "SELECT id, email, name, phone, stripe_customer_id FROM users WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(pool)
    .await
}

/// Cache the gateway customer id on the user row. Written once per buyer,
/// reused for every later payment intent.
pub async fn set_stripe_customer(
    pool: &SqlitePool,
    user_id: &str,
    stripe_customer_id: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE users SET stripe_customer_id = ? WHERE id = ?")
        .bind(stripe_customer_id)
        .bind(user_id)
        .execute(pool)
        .await?;
    Ok(())
}
