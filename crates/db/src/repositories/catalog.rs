use std::collections::HashMap;

use sqlx::{sqlite::SqliteRow, Row};

use concierge_core::{
    Business, BusinessId, BusinessPolicy, FaqEntry, Product, ProductId, ProductVariant,
    Service, ServiceAddon, ServiceId, VariantId,
};

use super::RepositoryError;
use crate::DbPool;

pub struct SqlCatalogRepository {
    pool: DbPool,
}

impl SqlCatalogRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn find_business(
        &self,
        business_id: &BusinessId,
    ) -> Result<Option<Business>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, name, business_type, agent_instructions FROM business WHERE id = ?",
        )
        .bind(&business_id.0)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| Business {
            id: BusinessId(row.get("id")),
            name: row.get("name"),
            business_type: row.get("business_type"),
            agent_instructions: row.get("agent_instructions"),
        }))
    }

    pub async fn policies(
        &self,
        business_id: &BusinessId,
    ) -> Result<Vec<BusinessPolicy>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT title, body FROM business_policy WHERE business_id = ? ORDER BY title",
        )
        .bind(&business_id.0)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| BusinessPolicy { title: row.get("title"), body: row.get("body") })
            .collect())
    }

    pub async fn faqs(&self, business_id: &BusinessId) -> Result<Vec<FaqEntry>, RepositoryError> {
        let rows =
            sqlx::query("SELECT question, answer FROM faq WHERE business_id = ? ORDER BY rowid")
                .bind(&business_id.0)
                .fetch_all(&self.pool)
                .await?;

        Ok(rows
            .into_iter()
            .map(|row| FaqEntry { question: row.get("question"), answer: row.get("answer") })
            .collect())
    }

    /// All services with their add-ons attached.
    pub async fn services(
        &self,
        business_id: &BusinessId,
    ) -> Result<Vec<Service>, RepositoryError> {
        let service_rows = sqlx::query(
            "SELECT id, business_id, name, price, duration_minutes
             FROM service
             WHERE business_id = ?
             ORDER BY name",
        )
        .bind(&business_id.0)
        .fetch_all(&self.pool)
        .await?;

        let addon_rows = sqlx::query(
            "SELECT service_addon.service_id, service_addon.name, service_addon.price
             FROM service_addon
             JOIN service ON service.id = service_addon.service_id
             WHERE service.business_id = ?
             ORDER BY service_addon.name",
        )
        .bind(&business_id.0)
        .fetch_all(&self.pool)
        .await?;

        let mut addons_by_service: HashMap<String, Vec<ServiceAddon>> = HashMap::new();
        for row in addon_rows {
            addons_by_service.entry(row.get("service_id")).or_default().push(ServiceAddon {
                name: row.get("name"),
                price: row.get("price"),
            });
        }

        Ok(service_rows
            .into_iter()
            .map(|row| {
                let id: String = row.get("id");
                let addons = addons_by_service.remove(&id).unwrap_or_default();
                Service {
                    id: ServiceId(id),
                    business_id: BusinessId(row.get("business_id")),
                    name: row.get("name"),
                    price: row.get("price"),
                    duration_minutes: row.get("duration_minutes"),
                    addons,
                }
            })
            .collect())
    }

    /// All products with their variants attached.
    pub async fn products(
        &self,
        business_id: &BusinessId,
    ) -> Result<Vec<Product>, RepositoryError> {
        let product_rows = sqlx::query(
            "SELECT id, business_id, name, price, total_quantity, current_stock
             FROM product
             WHERE business_id = ?
             ORDER BY name",
        )
        .bind(&business_id.0)
        .fetch_all(&self.pool)
        .await?;

        let variant_rows = sqlx::query(
            "SELECT product_variant.id, product_variant.product_id, product_variant.name,
                    product_variant.price, product_variant.total_quantity,
                    product_variant.current_stock
             FROM product_variant
             JOIN product ON product.id = product_variant.product_id
             WHERE product.business_id = ?
             ORDER BY product_variant.name",
        )
        .bind(&business_id.0)
        .fetch_all(&self.pool)
        .await?;

        let mut variants_by_product: HashMap<String, Vec<ProductVariant>> = HashMap::new();
        for row in variant_rows {
            variants_by_product
                .entry(row.get("product_id"))
                .or_default()
                .push(variant_from_row(row));
        }

        Ok(product_rows
            .into_iter()
            .map(|row| {
                let id: String = row.get("id");
                let variants = variants_by_product.remove(&id).unwrap_or_default();
                Product {
                    id: ProductId(id),
                    business_id: BusinessId(row.get("business_id")),
                    name: row.get("name"),
                    price: row.get("price"),
                    total_quantity: row.get("total_quantity"),
                    current_stock: row.get("current_stock"),
                    variants,
                }
            })
            .collect())
    }

    pub async fn find_product(
        &self,
        business_id: &BusinessId,
        product_id: &ProductId,
    ) -> Result<Option<Product>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, business_id, name, price, total_quantity, current_stock
             FROM product
             WHERE business_id = ? AND id = ?",
        )
        .bind(&business_id.0)
        .bind(&product_id.0)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let variant_rows = sqlx::query(
            "SELECT id, product_id, name, price, total_quantity, current_stock
             FROM product_variant
             WHERE product_id = ?
             ORDER BY name",
        )
        .bind(&product_id.0)
        .fetch_all(&self.pool)
        .await?;

        Ok(Some(Product {
            id: ProductId(row.get("id")),
            business_id: BusinessId(row.get("business_id")),
            name: row.get("name"),
            price: row.get("price"),
            total_quantity: row.get("total_quantity"),
            current_stock: row.get("current_stock"),
            variants: variant_rows.into_iter().map(variant_from_row).collect(),
        }))
    }
}

fn variant_from_row(row: SqliteRow) -> ProductVariant {
    ProductVariant {
        id: VariantId(row.get("id")),
        product_id: ProductId(row.get("product_id")),
        name: row.get("name"),
        price: row.get("price"),
        total_quantity: row.get("total_quantity"),
        current_stock: row.get("current_stock"),
    }
}

#[cfg(test)]
mod tests {
    use concierge_core::BusinessId;

    use super::SqlCatalogRepository;
    use crate::{connect_with_settings, migrations, DbPool};

    async fn seeded_pool() -> DbPool {
        let pool = connect_with_settings("sqlite::memory:", 1, 5).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrate");
        sqlx::query("INSERT INTO business (id, name) VALUES ('biz-1', 'Fade Factory')")
            .execute(&pool)
            .await
            .expect("seed business");
        sqlx::query(
            "INSERT INTO service (id, business_id, name, price, duration_minutes)
             VALUES ('svc-1', 'biz-1', 'Signature Fade', 45.0, 45)",
        )
        .execute(&pool)
        .await
        .expect("seed service");
        sqlx::query(
            "INSERT INTO service_addon (id, service_id, name, price)
             VALUES ('add-1', 'svc-1', 'Beard Trim', 15.0)",
        )
        .execute(&pool)
        .await
        .expect("seed addon");
        sqlx::query(
            "INSERT INTO product (id, business_id, name, price, total_quantity, current_stock)
             VALUES ('prod-1', 'biz-1', 'Matte Pomade', 18.0, 10, 7)",
        )
        .execute(&pool)
        .await
        .expect("seed product");
        sqlx::query(
            "INSERT INTO product_variant (id, product_id, name, price, total_quantity, current_stock)
             VALUES ('var-1', 'prod-1', 'Travel Size', 9.0, 5, NULL)",
        )
        .execute(&pool)
        .await
        .expect("seed variant");
        pool
    }

    #[tokio::test]
    async fn services_carry_their_addons() {
        let pool = seeded_pool().await;
        let repo = SqlCatalogRepository::new(pool.clone());
        let business_id = BusinessId("biz-1".to_string());

        let services = repo.services(&business_id).await.expect("services");
        assert_eq!(services.len(), 1);
        assert_eq!(services[0].addons.len(), 1);
        assert_eq!(services[0].addon_price("beard trim"), 15.0);

        pool.close().await;
    }

    #[tokio::test]
    async fn products_carry_variants_with_stock_fallback() {
        let pool = seeded_pool().await;
        let repo = SqlCatalogRepository::new(pool.clone());
        let business_id = BusinessId("biz-1".to_string());

        let products = repo.products(&business_id).await.expect("products");
        assert_eq!(products.len(), 1);
        assert_eq!(products[0].effective_stock(), 7);
        let variant = products[0].find_variant("travel size").expect("variant");
        // NULL current_stock falls back to total_quantity.
        assert_eq!(variant.effective_stock(), 5);
        assert_eq!(variant.effective_price(products[0].price), 9.0);

        pool.close().await;
    }
}
