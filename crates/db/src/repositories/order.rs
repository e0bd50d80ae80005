use sqlx::{sqlite::SqliteRow, Row};

use concierge_core::{
    BusinessId, CustomerId, Order, OrderId, OrderStatus, ProductId, VariantId,
};

use super::{parse_timestamp, RepositoryError};
use crate::DbPool;

pub struct SqlOrderRepository {
    pool: DbPool,
}

impl SqlOrderRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn insert(&self, order: &Order) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO orders (id, business_id, customer_id, product_id, variant_id,
                                 product_name, quantity, total_amount, status, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&order.id.0)
        .bind(&order.business_id.0)
        .bind(order.customer_id.as_ref().map(|id| id.0.as_str()))
        .bind(&order.product_id.0)
        .bind(order.variant_id.as_ref().map(|id| id.0.as_str()))
        .bind(&order.product_name)
        .bind(order.quantity)
        .bind(order.total_amount)
        .bind(order.status.as_str())
        .bind(order.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn find_by_id(
        &self,
        business_id: &BusinessId,
        id: &OrderId,
    ) -> Result<Option<Order>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, business_id, customer_id, product_id, variant_id, product_name,
                    quantity, total_amount, status, created_at
             FROM orders
             WHERE business_id = ? AND id = ?",
        )
        .bind(&business_id.0)
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(order_from_row).transpose()
    }

    pub async fn list_for_customer(
        &self,
        business_id: &BusinessId,
        customer_id: &CustomerId,
    ) -> Result<Vec<Order>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, business_id, customer_id, product_id, variant_id, product_name,
                    quantity, total_amount, status, created_at
             FROM orders
             WHERE business_id = ? AND customer_id = ?
             ORDER BY created_at DESC",
        )
        .bind(&business_id.0)
        .bind(&customer_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(order_from_row).collect()
    }

    /// Orders placed under any customer whose name partially matches,
    /// case-insensitive. Used when no customer id has been resolved.
    pub async fn list_for_customer_name(
        &self,
        business_id: &BusinessId,
        customer_name: &str,
    ) -> Result<Vec<Order>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT orders.id, orders.business_id, orders.customer_id, orders.product_id,
                    orders.variant_id, orders.product_name, orders.quantity,
                    orders.total_amount, orders.status, orders.created_at
             FROM orders
             JOIN customer ON customer.id = orders.customer_id
             WHERE orders.business_id = ?
               AND LOWER(customer.name) LIKE '%' || LOWER(TRIM(?)) || '%'
             ORDER BY orders.created_at DESC",
        )
        .bind(&business_id.0)
        .bind(customer_name)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(order_from_row).collect()
    }

    /// Mark cancelled. Returns false when the order was already cancelled,
    /// so stock is restored exactly once.
    pub async fn cancel(&self, id: &OrderId) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "UPDATE orders SET status = 'cancelled' WHERE id = ? AND status != 'cancelled'",
        )
        .bind(&id.0)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    // --- stock ledger ----------------------------------------------------

    /// Guarded decrement against the product row. A `NULL` current_stock is
    /// seeded from total_quantity on first write; zero rows affected means
    /// insufficient stock.
    pub async fn try_decrement_product_stock(
        &self,
        product_id: &ProductId,
        quantity: i64,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "UPDATE product
             SET current_stock = COALESCE(current_stock, total_quantity, 0) - ?
             WHERE id = ? AND COALESCE(current_stock, total_quantity, 0) >= ?",
        )
        .bind(quantity)
        .bind(&product_id.0)
        .bind(quantity)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn try_decrement_variant_stock(
        &self,
        variant_id: &VariantId,
        quantity: i64,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "UPDATE product_variant
             SET current_stock = COALESCE(current_stock, total_quantity, 0) - ?
             WHERE id = ? AND COALESCE(current_stock, total_quantity, 0) >= ?",
        )
        .bind(quantity)
        .bind(&variant_id.0)
        .bind(quantity)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn restore_product_stock(
        &self,
        product_id: &ProductId,
        quantity: i64,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            "UPDATE product
             SET current_stock = COALESCE(current_stock, total_quantity, 0) + ?
             WHERE id = ?",
        )
        .bind(quantity)
        .bind(&product_id.0)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn restore_variant_stock(
        &self,
        variant_id: &VariantId,
        quantity: i64,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            "UPDATE product_variant
             SET current_stock = COALESCE(current_stock, total_quantity, 0) + ?
             WHERE id = ?",
        )
        .bind(quantity)
        .bind(&variant_id.0)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn order_from_row(row: SqliteRow) -> Result<Order, RepositoryError> {
    let status_raw = row.try_get::<String, _>("status")?;
    let status = OrderStatus::parse(&status_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown order status `{status_raw}`")))?;

    Ok(Order {
        id: OrderId(row.try_get("id")?),
        business_id: BusinessId(row.try_get("business_id")?),
        customer_id: row.try_get::<Option<String>, _>("customer_id")?.map(CustomerId),
        product_id: ProductId(row.try_get("product_id")?),
        variant_id: row.try_get::<Option<String>, _>("variant_id")?.map(VariantId),
        product_name: row.try_get("product_name")?,
        quantity: row.try_get("quantity")?,
        total_amount: row.try_get("total_amount")?,
        status,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
    })
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use sqlx::Row;
    use uuid::Uuid;

    use concierge_core::{BusinessId, Order, OrderId, OrderStatus, ProductId};

    use super::SqlOrderRepository;
    use crate::{connect_with_settings, migrations, DbPool};

    async fn seeded_pool() -> DbPool {
        let pool = connect_with_settings("sqlite::memory:", 1, 5).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrate");
        sqlx::query("INSERT INTO business (id, name) VALUES ('biz-1', 'Fade Factory')")
            .execute(&pool)
            .await
            .expect("seed business");
        sqlx::query(
            "INSERT INTO product (id, business_id, name, price, total_quantity, current_stock)
             VALUES ('prod-1', 'biz-1', 'Matte Pomade', 18.0, 10, NULL)",
        )
        .execute(&pool)
        .await
        .expect("seed product");
        pool
    }

    async fn product_stock(pool: &DbPool) -> Option<i64> {
        sqlx::query("SELECT current_stock FROM product WHERE id = 'prod-1'")
            .fetch_one(pool)
            .await
            .expect("stock row")
            .get("current_stock")
    }

    fn order(quantity: i64) -> Order {
        Order {
            id: OrderId(Uuid::new_v4().to_string()),
            business_id: BusinessId("biz-1".to_string()),
            customer_id: None,
            product_id: ProductId("prod-1".to_string()),
            variant_id: None,
            product_name: "Matte Pomade".to_string(),
            quantity,
            total_amount: 18.0 * quantity as f64,
            status: OrderStatus::Confirmed,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn decrement_seeds_from_total_quantity_and_enforces_floor() {
        let pool = seeded_pool().await;
        let repo = SqlOrderRepository::new(pool.clone());
        let product_id = ProductId("prod-1".to_string());

        assert!(repo.try_decrement_product_stock(&product_id, 8).await.expect("decrement"));
        assert_eq!(product_stock(&pool).await, Some(2));

        assert!(!repo.try_decrement_product_stock(&product_id, 3).await.expect("over-ask"));
        assert_eq!(product_stock(&pool).await, Some(2));

        pool.close().await;
    }

    #[tokio::test]
    async fn cancel_restores_stock_exactly_once() {
        let pool = seeded_pool().await;
        let repo = SqlOrderRepository::new(pool.clone());
        let product_id = ProductId("prod-1".to_string());
        let record = order(4);

        assert!(repo.try_decrement_product_stock(&product_id, 4).await.expect("decrement"));
        repo.insert(&record).await.expect("insert");

        assert!(repo.cancel(&record.id).await.expect("cancel"));
        repo.restore_product_stock(&product_id, record.quantity).await.expect("restore");
        assert_eq!(product_stock(&pool).await, Some(10));

        // Second cancel reports already-cancelled; no second restoration.
        assert!(!repo.cancel(&record.id).await.expect("second cancel"));
        assert_eq!(product_stock(&pool).await, Some(10));

        pool.close().await;
    }
}
