use sqlx::{sqlite::SqliteRow, Row};

use concierge_core::{BusinessId, Customer, CustomerId};

use super::{parse_json_list, parse_timestamp, RepositoryError};
use crate::DbPool;

pub struct SqlCustomerRepository {
    pool: DbPool,
}

impl SqlCustomerRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn find_by_id(
        &self,
        business_id: &BusinessId,
        id: &CustomerId,
    ) -> Result<Option<Customer>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, business_id, name, phone, email, internal_notes, tags_json,
                    lead_score, created_at
             FROM customer
             WHERE business_id = ? AND id = ?",
        )
        .bind(&business_id.0)
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(customer_from_row).transpose()
    }

    /// Case-insensitive email lookup. More than one match is treated as no
    /// match so the caller never binds a conversation to the wrong record.
    pub async fn find_unique_by_email(
        &self,
        business_id: &BusinessId,
        email: &str,
    ) -> Result<Option<Customer>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, business_id, name, phone, email, internal_notes, tags_json,
                    lead_score, created_at
             FROM customer
             WHERE business_id = ? AND email IS NOT NULL AND LOWER(email) = LOWER(?)
             LIMIT 2",
        )
        .bind(&business_id.0)
        .bind(email)
        .fetch_all(&self.pool)
        .await?;

        unique_match(rows)
    }

    pub async fn find_unique_by_phone(
        &self,
        business_id: &BusinessId,
        phone: &str,
    ) -> Result<Option<Customer>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, business_id, name, phone, email, internal_notes, tags_json,
                    lead_score, created_at
             FROM customer
             WHERE business_id = ? AND phone IS NOT NULL AND TRIM(phone) = TRIM(?)
             LIMIT 2",
        )
        .bind(&business_id.0)
        .bind(phone)
        .fetch_all(&self.pool)
        .await?;

        unique_match(rows)
    }

    pub async fn find_unique_by_exact_name(
        &self,
        business_id: &BusinessId,
        name: &str,
    ) -> Result<Option<Customer>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, business_id, name, phone, email, internal_notes, tags_json,
                    lead_score, created_at
             FROM customer
             WHERE business_id = ? AND LOWER(TRIM(name)) = LOWER(TRIM(?))
             LIMIT 2",
        )
        .bind(&business_id.0)
        .bind(name)
        .fetch_all(&self.pool)
        .await?;

        unique_match(rows)
    }

    pub async fn insert(&self, customer: &Customer) -> Result<(), RepositoryError> {
        let tags_json = serde_json::to_string(&customer.tags)
            .map_err(|err| RepositoryError::Decode(format!("encode tags: {err}")))?;

        sqlx::query(
            "INSERT INTO customer (id, business_id, name, phone, email, internal_notes,
                                   tags_json, lead_score, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&customer.id.0)
        .bind(&customer.business_id.0)
        .bind(&customer.name)
        .bind(&customer.phone)
        .bind(&customer.email)
        .bind(&customer.internal_notes)
        .bind(tags_json)
        .bind(customer.lead_score)
        .bind(customer.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Overwrite contact fields that were provided; `None` leaves the stored
    /// value untouched.
    pub async fn update_contact(
        &self,
        id: &CustomerId,
        name: Option<&str>,
        phone: Option<&str>,
        email: Option<&str>,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            "UPDATE customer SET
                name = COALESCE(?, name),
                phone = COALESCE(?, phone),
                email = COALESCE(?, email)
             WHERE id = ?",
        )
        .bind(name)
        .bind(phone)
        .bind(email)
        .bind(&id.0)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn update_insight(
        &self,
        id: &CustomerId,
        internal_notes: &str,
        tags: &[String],
        lead_score: i64,
    ) -> Result<(), RepositoryError> {
        let tags_json = serde_json::to_string(tags)
            .map_err(|err| RepositoryError::Decode(format!("encode tags: {err}")))?;

        sqlx::query(
            "UPDATE customer SET internal_notes = ?, tags_json = ?, lead_score = ?
             WHERE id = ?",
        )
        .bind(internal_notes)
        .bind(tags_json)
        .bind(lead_score)
        .bind(&id.0)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn unique_match(rows: Vec<SqliteRow>) -> Result<Option<Customer>, RepositoryError> {
    let mut rows = rows;
    match rows.len() {
        1 => customer_from_row(rows.remove(0)).map(Some),
        _ => Ok(None),
    }
}

fn customer_from_row(row: SqliteRow) -> Result<Customer, RepositoryError> {
    Ok(Customer {
        id: CustomerId(row.try_get("id")?),
        business_id: BusinessId(row.try_get("business_id")?),
        name: row.try_get("name")?,
        phone: row.try_get("phone")?,
        email: row.try_get("email")?,
        internal_notes: row.try_get("internal_notes")?,
        tags: parse_json_list("tags_json", row.try_get("tags_json")?)?,
        lead_score: row.try_get("lead_score")?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
    })
}
