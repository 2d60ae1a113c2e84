//! End-to-end order lifecycle tests over a throwaway SQLite database.

use sqlx::SqlitePool;
use tempfile::TempDir;

use market_server::db;
use market_server::orders::payment;
use market_server::orders::service::{self, ItemUpdateInput, OrderLineInput};
use market_server::orders::status::ItemStatus;
use market_server::orders::sweeper;
use market_server::stripe::PaymentIntent;
use market_server::AppError;

const BUYER: &str = "user-alice";
const SELLER_1: &str = "user-bob";
const SELLER_2: &str = "user-carol";
const CAMERA: &str = "prod-camera";
const LENS: &str = "prod-lens";
const TRIPOD: &str = "prod-tripod";

async fn setup() -> (TempDir, SqlitePool) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("orders-test.db");
    let pool = db::connect(path.to_str().unwrap()).await.unwrap();
    seed(&pool).await;
    (dir, pool)
}

async fn seed(pool: &SqlitePool) {
    let now = market_server::util::now_millis();
    for (id, email, name) in [
        (BUYER, "alice@example.com", "Alice"),
        (SELLER_1, "bob@example.com", "Bob"),
        (SELLER_2, "carol@example.com", "Carol"),
    ] {
        sqlx::query("INSERT INTO users (id, email, name, created_at) VALUES (?, ?, ?, ?)")
            .bind(id)
            .bind(email)
            .bind(name)
            .bind(now)
            .execute(pool)
            .await
            .unwrap();
    }
    for (id, seller, title, price, quantity, available) in [
        (CAMERA, SELLER_1, "Used camera", 100.0, 5i64, 1i64),
        (LENS, SELLER_2, "50mm lens", 50.0, 1, 1),
        (TRIPOD, SELLER_1, "Broken tripod", 20.0, 3, 0),
    ] {
        sqlx::query(
            "INSERT INTO products (id, seller_id, title, price, quantity, is_available, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(id)
        .bind(seller)
        .bind(title)
        .bind(price)
        .bind(quantity)
        .bind(available)
        .bind(now)
        .execute(pool)
        .await
        .unwrap();
    }
}

async fn stock_of(pool: &SqlitePool, product_id: &str) -> i64 {
    let (q,): (i64,) = sqlx::query_as("SELECT quantity FROM products WHERE id = ?")
        .bind(product_id)
        .fetch_one(pool)
        .await
        .unwrap();
    q
}

fn lines(items: &[(&str, i64)]) -> Vec<OrderLineInput> {
    items
        .iter()
        .map(|(id, qty)| OrderLineInput {
            product_id: (*id).to_string(),
            quantity: *qty,
            unit_price: None,
        })
        .collect()
}

async fn store_intent(pool: &SqlitePool, order_id: &str, intent_id: &str) {
    market_server::db::orders::set_payment_intent(
        pool,
        order_id,
        intent_id,
        market_server::util::now_millis(),
    )
    .await
    .unwrap();
}

fn succeeded_intent(id: &str, amount: i64) -> PaymentIntent {
    PaymentIntent {
        id: id.to_string(),
        client_secret: None,
        status: "succeeded".to_string(),
        amount,
        latest_charge: Some("ch_test_1".to_string()),
    }
}

#[tokio::test]
async fn create_order_reserves_stock_and_computes_totals() {
    let (_dir, pool) = setup().await;

    let before = market_server::util::now_millis();
    let order = service::create_order(
        &pool,
        0.05,
        BUYER,
        &lines(&[(CAMERA, 2), (LENS, 1)]),
        Some("leave at the door"),
    )
    .await
    .unwrap();

    assert_eq!(order.order.status, "pending");
    assert_eq!(order.order.total_amount, 250.0);
    assert_eq!(order.order.total_commission, 12.50);
    assert_eq!(order.order.shipping_instructions.as_deref(), Some("leave at the door"));

    let expires = order.order.expires_at.unwrap();
    let window = 30 * 60 * 1000;
    assert!(expires >= before + window && expires <= before + window + 5_000);

    assert_eq!(order.items.len(), 2);
    let camera = order.items.iter().find(|i| i.product_id == CAMERA).unwrap();
    assert_eq!(camera.quantity, 2);
    assert_eq!(camera.total_price, 200.0);
    assert_eq!(camera.commission_amount, 10.0);
    assert_eq!(camera.seller_payout, 190.0);
    assert_eq!(camera.status, "pending");
    assert_eq!(camera.product_title.as_deref(), Some("Used camera"));
    assert_eq!(camera.seller_name.as_deref(), Some("Bob"));

    let lens = order.items.iter().find(|i| i.product_id == LENS).unwrap();
    assert_eq!(lens.seller_payout, 47.50);

    assert_eq!(stock_of(&pool, CAMERA).await, 3);
    assert_eq!(stock_of(&pool, LENS).await, 0);
}

#[tokio::test]
async fn negotiated_unit_price_overrides_listed_price() {
    let (_dir, pool) = setup().await;

    let order = service::create_order(
        &pool,
        0.05,
        BUYER,
        &[OrderLineInput {
            product_id: CAMERA.to_string(),
            quantity: 1,
            unit_price: Some(80.0),
        }],
        None,
    )
    .await
    .unwrap();

    assert_eq!(order.order.total_amount, 80.0);
    assert_eq!(order.order.total_commission, 4.0);
    let item = &order.items[0];
    assert_eq!(item.unit_price, 80.0);
    assert_eq!(item.seller_payout, 76.0);
}

#[tokio::test]
async fn create_order_with_insufficient_stock_rolls_back() {
    let (_dir, pool) = setup().await;

    let err = service::create_order(&pool, 0.05, BUYER, &lines(&[(CAMERA, 99)]), None)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("Insufficient stock"));
    assert!(err.to_string().contains("Used camera"));

    // Nothing observable remains
    assert_eq!(stock_of(&pool, CAMERA).await, 5);
    let (orders,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM orders")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(orders, 0);
    let (items,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM order_items")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(items, 0);
}

#[tokio::test]
async fn create_order_rejects_unknown_and_unavailable_products() {
    let (_dir, pool) = setup().await;

    let err = service::create_order(&pool, 0.05, BUYER, &lines(&[("prod-nope", 1)]), None)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("Some products not found"));

    let err = service::create_order(&pool, 0.05, BUYER, &lines(&[(TRIPOD, 1)]), None)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("Products not available"));
    assert!(err.to_string().contains("Broken tripod"));

    let err = service::create_order(&pool, 0.05, BUYER, &[], None)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("at least one item"));

    let err = service::create_order(&pool, 0.05, "user-ghost", &lines(&[(CAMERA, 1)]), None)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
}

#[tokio::test]
async fn cancel_restores_stock_and_marks_items() {
    let (_dir, pool) = setup().await;

    let order = service::create_order(&pool, 0.05, BUYER, &lines(&[(CAMERA, 2), (LENS, 1)]), None)
        .await
        .unwrap();
    assert_eq!(stock_of(&pool, CAMERA).await, 3);

    let err = service::cancel_order(&pool, SELLER_1, &order.order.id, None)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Forbidden(_)));

    let cancelled = service::cancel_order(&pool, BUYER, &order.order.id, Some("changed my mind"))
        .await
        .unwrap();
    assert_eq!(cancelled.order.status, "cancelled");
    assert_eq!(cancelled.order.cancellation_reason.as_deref(), Some("changed my mind"));
    assert!(cancelled.items.iter().all(|i| i.status == "cancelled"));

    assert_eq!(stock_of(&pool, CAMERA).await, 5);
    assert_eq!(stock_of(&pool, LENS).await, 1);

    // Terminal: a second cancel is an invalid transition
    let err = service::cancel_order(&pool, BUYER, &order.order.id, None)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("Invalid status transition"));
}

#[tokio::test]
async fn sweeper_expires_stale_pending_orders() {
    let (_dir, pool) = setup().await;

    let stale = service::create_order(&pool, 0.05, BUYER, &lines(&[(CAMERA, 2)]), None)
        .await
        .unwrap();
    let fresh = service::create_order(&pool, 0.05, BUYER, &lines(&[(LENS, 1)]), None)
        .await
        .unwrap();

    sqlx::query("UPDATE orders SET expires_at = ? WHERE id = ?")
        .bind(market_server::util::now_millis() - 1_000)
        .bind(&stale.order.id)
        .execute(&pool)
        .await
        .unwrap();

    assert_eq!(sweeper::sweep_expired(&pool).await.unwrap(), 1);

    let expired = service::get_order(&pool, &stale.order.id).await.unwrap();
    assert_eq!(expired.order.status, "expired");
    assert_eq!(
        expired.order.cancellation_reason.as_deref(),
        Some("Order expired after 30 minutes")
    );
    assert!(expired.items.iter().all(|i| i.status == "expired"));
    assert_eq!(stock_of(&pool, CAMERA).await, 5);

    let untouched = service::get_order(&pool, &fresh.order.id).await.unwrap();
    assert_eq!(untouched.order.status, "pending");
    assert_eq!(stock_of(&pool, LENS).await, 0);

    // Nothing left to sweep
    assert_eq!(sweeper::sweep_expired(&pool).await.unwrap(), 0);
}

#[tokio::test]
async fn sweeper_handles_the_whole_batch_in_one_pass() {
    let (_dir, pool) = setup().await;

    let first = service::create_order(&pool, 0.05, BUYER, &lines(&[(CAMERA, 2)]), None)
        .await
        .unwrap();
    let second = service::create_order(&pool, 0.05, BUYER, &lines(&[(CAMERA, 1), (LENS, 1)]), None)
        .await
        .unwrap();
    assert_eq!(stock_of(&pool, CAMERA).await, 2);

    let past = market_server::util::now_millis() - 1_000;
    for id in [&first.order.id, &second.order.id] {
        sqlx::query("UPDATE orders SET expires_at = ? WHERE id = ?")
            .bind(past)
            .bind(id)
            .execute(&pool)
            .await
            .unwrap();
    }

    assert_eq!(sweeper::sweep_expired(&pool).await.unwrap(), 2);

    for id in [&first.order.id, &second.order.id] {
        let order = service::get_order(&pool, id).await.unwrap();
        assert_eq!(order.order.status, "expired");
        assert!(order.items.iter().all(|i| i.status == "expired"));
    }
    assert_eq!(stock_of(&pool, CAMERA).await, 5);
    assert_eq!(stock_of(&pool, LENS).await, 1);
}

#[tokio::test]
async fn paid_effects_are_idempotent() {
    let (_dir, pool) = setup().await;

    let order = service::create_order(&pool, 0.05, BUYER, &lines(&[(CAMERA, 1)]), None)
        .await
        .unwrap();
    store_intent(&pool, &order.order.id, "pi_test_1").await;
    let intent = succeeded_intent("pi_test_1", 10_000);

    assert!(payment::apply_paid_effects(&pool, &order.order.id, &intent).await.unwrap());

    let paid = service::get_order(&pool, &order.order.id).await.unwrap();
    assert_eq!(paid.order.status, "paid");
    assert!(paid.items.iter().all(|i| i.status == "paid"));
    let metadata = paid.order.payment_metadata.unwrap();
    assert!(metadata.contains("pi_test_1"));
    assert!(metadata.contains("ch_test_1"));

    // Replay (confirm racing a webhook) is a no-op
    assert!(!payment::apply_paid_effects(&pool, &order.order.id, &intent).await.unwrap());
    let still = service::get_order(&pool, &order.order.id).await.unwrap();
    assert_eq!(still.order.status, "paid");

    // Paid orders no longer expire
    sqlx::query("UPDATE orders SET expires_at = ? WHERE id = ?")
        .bind(market_server::util::now_millis() - 1_000)
        .bind(&order.order.id)
        .execute(&pool)
        .await
        .unwrap();
    assert_eq!(sweeper::sweep_expired(&pool).await.unwrap(), 0);
}

#[tokio::test]
async fn paid_effects_reject_non_pending_orders() {
    let (_dir, pool) = setup().await;

    let order = service::create_order(&pool, 0.05, BUYER, &lines(&[(CAMERA, 1)]), None)
        .await
        .unwrap();
    store_intent(&pool, &order.order.id, "pi_x").await;
    service::cancel_order(&pool, BUYER, &order.order.id, None).await.unwrap();

    let err = payment::apply_paid_effects(&pool, &order.order.id, &succeeded_intent("pi_x", 1))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("not awaiting payment"));
}

#[tokio::test]
async fn paid_effects_reject_a_foreign_intent() {
    let (_dir, pool) = setup().await;

    let order = service::create_order(&pool, 0.05, BUYER, &lines(&[(CAMERA, 1)]), None)
        .await
        .unwrap();
    store_intent(&pool, &order.order.id, "pi_current").await;

    // An event carrying some other order's intent must not pay this one
    let err = payment::apply_paid_effects(&pool, &order.order.id, &succeeded_intent("pi_other", 1))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("Payment intent mismatch"));

    let untouched = service::get_order(&pool, &order.order.id).await.unwrap();
    assert_eq!(untouched.order.status, "pending");
    assert!(untouched.order.payment_metadata.is_none());

    // An order that never opened an intent cannot be paid by webhook either
    let second = service::create_order(&pool, 0.05, BUYER, &lines(&[(LENS, 1)]), None)
        .await
        .unwrap();
    let err = payment::apply_paid_effects(&pool, &second.order.id, &succeeded_intent("pi_any", 1))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("Payment intent mismatch"));
}

#[tokio::test]
async fn fulfilment_rolls_order_up_to_completed() {
    let (_dir, pool) = setup().await;

    let order = service::create_order(&pool, 0.05, BUYER, &lines(&[(CAMERA, 1), (LENS, 1)]), None)
        .await
        .unwrap();
    store_intent(&pool, &order.order.id, "pi_test_2").await;
    payment::apply_paid_effects(&pool, &order.order.id, &succeeded_intent("pi_test_2", 15_000))
        .await
        .unwrap();

    let camera_item = order.items.iter().find(|i| i.product_id == CAMERA).unwrap();
    let lens_item = order.items.iter().find(|i| i.product_id == LENS).unwrap();

    // Only the owning seller may update an item
    let err = service::update_item(
        &pool,
        SELLER_2,
        &camera_item.id,
        &ItemUpdateInput {
            status: Some(ItemStatus::Processing),
            ..ItemUpdateInput::default()
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::Forbidden(_)));

    // Shipped straight from paid skips processing, an illegal jump
    let err = service::update_item(
        &pool,
        SELLER_1,
        &camera_item.id,
        &ItemUpdateInput {
            status: Some(ItemStatus::Shipped),
            ..ItemUpdateInput::default()
        },
    )
    .await
    .unwrap_err();
    assert!(err.to_string().contains("Invalid status transition"));

    service::update_item(
        &pool,
        SELLER_1,
        &camera_item.id,
        &ItemUpdateInput {
            status: Some(ItemStatus::Processing),
            ..ItemUpdateInput::default()
        },
    )
    .await
    .unwrap();

    let shipped = service::update_item(
        &pool,
        SELLER_1,
        &camera_item.id,
        &ItemUpdateInput {
            status: Some(ItemStatus::Shipped),
            tracking_number: Some("TRK-123".to_string()),
            shipping_method: Some("postal".to_string()),
        },
    )
    .await
    .unwrap();
    assert_eq!(shipped.status, "shipped");
    assert_eq!(shipped.tracking_number.as_deref(), Some("TRK-123"));
    assert!(shipped.shipped_at.is_some());

    let delivered = service::update_item(
        &pool,
        SELLER_1,
        &camera_item.id,
        &ItemUpdateInput {
            status: Some(ItemStatus::Delivered),
            ..ItemUpdateInput::default()
        },
    )
    .await
    .unwrap();
    assert!(delivered.delivered_at.is_some());

    // Delivered is terminal; the status re-read inside the update rejects
    // a repeated delivery
    let err = service::update_item(
        &pool,
        SELLER_1,
        &camera_item.id,
        &ItemUpdateInput {
            status: Some(ItemStatus::Delivered),
            ..ItemUpdateInput::default()
        },
    )
    .await
    .unwrap_err();
    assert!(err.to_string().contains("Invalid status transition"));

    // One sibling still undelivered, order stays paid
    let midway = service::get_order(&pool, &order.order.id).await.unwrap();
    assert_eq!(midway.order.status, "paid");

    for status in [ItemStatus::Processing, ItemStatus::Shipped, ItemStatus::Delivered] {
        service::update_item(
            &pool,
            SELLER_2,
            &lens_item.id,
            &ItemUpdateInput {
                status: Some(status),
                ..ItemUpdateInput::default()
            },
        )
        .await
        .unwrap();
    }

    let done = service::get_order(&pool, &order.order.id).await.unwrap();
    assert_eq!(done.order.status, "completed");
}

#[tokio::test]
async fn listings_filter_by_role_and_status() {
    let (_dir, pool) = setup().await;

    let first = service::create_order(&pool, 0.05, BUYER, &lines(&[(CAMERA, 1)]), None)
        .await
        .unwrap();
    let _second = service::create_order(&pool, 0.05, BUYER, &lines(&[(LENS, 1)]), None)
        .await
        .unwrap();
    service::cancel_order(&pool, BUYER, &first.order.id, None).await.unwrap();

    let purchases = service::list_orders(
        &pool,
        market_server::db::orders::OrderFilter {
            buyer_id: Some(BUYER.to_string()),
            ..Default::default()
        },
    )
    .await
    .unwrap();
    assert_eq!(purchases.total, 2);
    assert_eq!(purchases.page, 1);
    assert_eq!(purchases.limit, 10);
    assert!(purchases.data.iter().all(|o| !o.items.is_empty()));

    let pending_only = service::list_orders(
        &pool,
        market_server::db::orders::OrderFilter {
            buyer_id: Some(BUYER.to_string()),
            status: Some("pending".to_string()),
            ..Default::default()
        },
    )
    .await
    .unwrap();
    assert_eq!(pending_only.total, 1);

    // Seller view: only orders carrying that seller's items
    let bob_sales = service::list_orders(
        &pool,
        market_server::db::orders::OrderFilter {
            seller_id: Some(SELLER_1.to_string()),
            ..Default::default()
        },
    )
    .await
    .unwrap();
    assert_eq!(bob_sales.total, 1);

    let bob_items = service::list_sale_items(
        &pool,
        SELLER_1,
        market_server::db::orders::OrderFilter::default(),
    )
    .await
    .unwrap();
    assert_eq!(bob_items.total, 1);
    assert_eq!(bob_items.data[0].product_id, CAMERA);
}

#[tokio::test]
async fn stats_aggregate_both_roles() {
    let (_dir, pool) = setup().await;

    let order = service::create_order(&pool, 0.05, BUYER, &lines(&[(CAMERA, 2), (LENS, 1)]), None)
        .await
        .unwrap();
    store_intent(&pool, &order.order.id, "pi_s").await;
    payment::apply_paid_effects(&pool, &order.order.id, &succeeded_intent("pi_s", 25_000))
        .await
        .unwrap();

    let buyer = service::user_stats(&pool, BUYER).await.unwrap();
    assert_eq!(buyer.buyer.total_purchases, 1);
    assert_eq!(buyer.buyer.total_spent, 250.0);
    assert_eq!(buyer.buyer.pending_orders, 1); // paid counts as in-flight
    assert_eq!(buyer.buyer.completed_orders, 0);

    let bob = service::user_stats(&pool, SELLER_1).await.unwrap();
    assert_eq!(bob.seller.total_sales, 1);
    assert_eq!(bob.seller.total_revenue, 190.0);
    assert_eq!(bob.seller.total_commission, 10.0);
    assert_eq!(bob.seller.pending_orders, 1);
    assert_eq!(bob.seller.completed_orders, 0);

    let carol = service::user_stats(&pool, SELLER_2).await.unwrap();
    assert_eq!(carol.seller.total_revenue, 47.50);
    assert_eq!(carol.buyer.total_purchases, 0);
}
