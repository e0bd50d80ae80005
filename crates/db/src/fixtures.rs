use sqlx::Executor;

use crate::connection::DbPool;
use crate::repositories::RepositoryError;

const SEED_BUSINESS_ID: &str = "biz-fade-001";

const SEED_SERVICE_IDS: &[&str] = &["svc-fade-001", "svc-fade-002", "svc-fade-003"];
const SEED_PRODUCT_IDS: &[&str] = &["prod-fade-001", "prod-fade-002"];
const SEED_SLOT_IDS: &[&str] = &[
    "slot-fade-001",
    "slot-fade-002",
    "slot-fade-003",
    "slot-fade-004",
    "slot-fade-005",
    "slot-fade-006",
];

/// Deterministic demo dataset: one barbershop with services, add-ons,
/// products, variants, slots, a returning customer, and an open booking.
/// Loading is idempotent; every fixture statement is INSERT OR REPLACE.
pub struct DemoSeedDataset;

impl DemoSeedDataset {
    pub const SQL: &str = include_str!("../../../config/fixtures/demo_seed_data.sql");

    pub async fn load(pool: &DbPool) -> Result<SeedResult, RepositoryError> {
        let mut tx = pool.begin().await?;
        tx.execute(sqlx::query(Self::SQL)).await?;
        tx.commit().await?;

        Ok(SeedResult {
            business_id: SEED_BUSINESS_ID,
            services: SEED_SERVICE_IDS.len(),
            products: SEED_PRODUCT_IDS.len(),
            slots: SEED_SLOT_IDS.len(),
        })
    }

    /// Verify the loaded fixtures match the seed contract.
    pub async fn verify(pool: &DbPool) -> Result<VerificationResult, RepositoryError> {
        let mut checks = Vec::new();

        let business_exists: i64 =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM business WHERE id = ?)")
                .bind(SEED_BUSINESS_ID)
                .fetch_one(pool)
                .await?;
        checks.push(("business", business_exists == 1));

        let service_count: i64 =
            sqlx::query_scalar("SELECT COUNT(1) FROM service WHERE business_id = ?")
                .bind(SEED_BUSINESS_ID)
                .fetch_one(pool)
                .await?;
        checks.push(("services", service_count == SEED_SERVICE_IDS.len() as i64));

        let addon_count: i64 = sqlx::query_scalar(
            "SELECT COUNT(1) FROM service_addon
             JOIN service ON service.id = service_addon.service_id
             WHERE service.business_id = ?",
        )
        .bind(SEED_BUSINESS_ID)
        .fetch_one(pool)
        .await?;
        checks.push(("service-addons", addon_count == 3));

        let product_count: i64 =
            sqlx::query_scalar("SELECT COUNT(1) FROM product WHERE business_id = ?")
                .bind(SEED_BUSINESS_ID)
                .fetch_one(pool)
                .await?;
        checks.push(("products", product_count == SEED_PRODUCT_IDS.len() as i64));

        let slot_count: i64 =
            sqlx::query_scalar("SELECT COUNT(1) FROM booking_slot WHERE business_id = ?")
                .bind(SEED_BUSINESS_ID)
                .fetch_one(pool)
                .await?;
        checks.push(("booking-slots", slot_count == SEED_SLOT_IDS.len() as i64));

        // Slot invariants must hold even for pre-booked fixtures.
        let invalid_slots: i64 = sqlx::query_scalar(
            "SELECT COUNT(1) FROM booking_slot
             WHERE business_id = ? AND (booked_count < 0 OR booked_count > capacity)",
        )
        .bind(SEED_BUSINESS_ID)
        .fetch_one(pool)
        .await?;
        checks.push(("slot-invariants", invalid_slots == 0));

        let customer_ok: i64 = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM customer
             WHERE id = 'cust-fade-001' AND email = 'maya@example.com'
               AND lead_score BETWEEN 0 AND 100)",
        )
        .fetch_one(pool)
        .await?;
        checks.push(("customer", customer_ok == 1));

        let booking_ok: i64 = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM booking
             WHERE id = 'book-fade-001' AND status = 'confirmed'
               AND customer_id = 'cust-fade-001')",
        )
        .fetch_one(pool)
        .await?;
        checks.push(("booking", booking_ok == 1));

        let all_present = checks.iter().all(|(_, ok)| *ok);
        Ok(VerificationResult { all_present, checks })
    }

    /// Remove seeded fixtures, child rows first.
    pub async fn clean(pool: &DbPool) -> Result<(), RepositoryError> {
        let mut tx = pool.begin().await?;

        for statement in [
            "DELETE FROM task_log WHERE business_id = ?",
            "DELETE FROM booking WHERE business_id = ?",
            "DELETE FROM booking_slot WHERE business_id = ?",
            "DELETE FROM message WHERE conversation_id IN
                 (SELECT id FROM conversation WHERE business_id = ?)",
            "DELETE FROM conversation WHERE business_id = ?",
            "DELETE FROM orders WHERE business_id = ?",
            "DELETE FROM customer WHERE business_id = ?",
            "DELETE FROM product_variant WHERE product_id IN
                 (SELECT id FROM product WHERE business_id = ?)",
            "DELETE FROM product WHERE business_id = ?",
            "DELETE FROM service_addon WHERE service_id IN
                 (SELECT id FROM service WHERE business_id = ?)",
            "DELETE FROM service WHERE business_id = ?",
            "DELETE FROM faq WHERE business_id = ?",
            "DELETE FROM business_policy WHERE business_id = ?",
            "DELETE FROM business WHERE id = ?",
        ] {
            sqlx::query(statement).bind(SEED_BUSINESS_ID).execute(&mut *tx).await?;
        }

        tx.commit().await?;
        Ok(())
    }
}

#[derive(Debug)]
pub struct SeedResult {
    pub business_id: &'static str,
    pub services: usize,
    pub products: usize,
    pub slots: usize,
}

#[derive(Debug)]
pub struct VerificationResult {
    pub all_present: bool,
    pub checks: Vec<(&'static str, bool)>,
}
