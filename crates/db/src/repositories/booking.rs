use chrono::NaiveDate;
use sqlx::{sqlite::SqliteRow, Row};

use concierge_core::{
    BookingId, BookingSlot, BookingStatus, Booking, BusinessId, CustomerId, SlotId,
};

use super::{parse_date, parse_json_list, parse_timestamp, RepositoryError};
use crate::DbPool;

pub struct SqlBookingRepository {
    pool: DbPool,
}

impl SqlBookingRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    // --- slots -----------------------------------------------------------

    /// Upcoming slots with remaining capacity, date ascending then time,
    /// capped to `limit`.
    pub async fn future_slots(
        &self,
        business_id: &BusinessId,
        from_date: NaiveDate,
        limit: u32,
    ) -> Result<Vec<BookingSlot>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, business_id, slot_date, slot_time, capacity, booked_count
             FROM booking_slot
             WHERE business_id = ? AND slot_date >= ? AND booked_count < capacity
             ORDER BY slot_date ASC, slot_time ASC
             LIMIT ?",
        )
        .bind(&business_id.0)
        .bind(from_date.to_string())
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(slot_from_row).collect()
    }

    pub async fn slots_for_date(
        &self,
        business_id: &BusinessId,
        date: NaiveDate,
    ) -> Result<Vec<BookingSlot>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, business_id, slot_date, slot_time, capacity, booked_count
             FROM booking_slot
             WHERE business_id = ? AND slot_date = ?
             ORDER BY slot_time ASC",
        )
        .bind(&business_id.0)
        .bind(date.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(slot_from_row).collect()
    }

    pub async fn find_slot_by_id(
        &self,
        slot_id: &SlotId,
    ) -> Result<Option<BookingSlot>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, business_id, slot_date, slot_time, capacity, booked_count
             FROM booking_slot
             WHERE id = ?",
        )
        .bind(&slot_id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(slot_from_row).transpose()
    }

    /// Guarded increment. Zero rows affected means the slot was already at
    /// capacity; the check and the write happen in one statement so two
    /// concurrent reservations can never both win the last seat.
    pub async fn try_reserve_slot(&self, slot_id: &SlotId) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "UPDATE booking_slot
             SET booked_count = booked_count + 1
             WHERE id = ? AND booked_count < capacity",
        )
        .bind(&slot_id.0)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Guarded decrement; never drives `booked_count` below zero.
    pub async fn release_slot(&self, slot_id: &SlotId) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "UPDATE booking_slot
             SET booked_count = booked_count - 1
             WHERE id = ? AND booked_count > 0",
        )
        .bind(&slot_id.0)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    // --- bookings --------------------------------------------------------

    pub async fn insert(&self, booking: &Booking) -> Result<(), RepositoryError> {
        let addons_json = serde_json::to_string(&booking.addons)
            .map_err(|err| RepositoryError::Decode(format!("encode addons: {err}")))?;

        sqlx::query(
            "INSERT INTO booking (id, business_id, customer_id, customer_name, service_name,
                                  slot_date, slot_time, addons_json, total_amount, status,
                                  created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&booking.id.0)
        .bind(&booking.business_id.0)
        .bind(booking.customer_id.as_ref().map(|id| id.0.as_str()))
        .bind(&booking.customer_name)
        .bind(&booking.service_name)
        .bind(booking.slot_date.to_string())
        .bind(&booking.slot_time)
        .bind(addons_json)
        .bind(booking.total_amount)
        .bind(booking.status.as_str())
        .bind(booking.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn find_by_id(
        &self,
        business_id: &BusinessId,
        id: &BookingId,
    ) -> Result<Option<Booking>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, business_id, customer_id, customer_name, service_name, slot_date,
                    slot_time, addons_json, total_amount, status, created_at
             FROM booking
             WHERE business_id = ? AND id = ?",
        )
        .bind(&business_id.0)
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(booking_from_row).transpose()
    }

    pub async fn list_for_customer(
        &self,
        business_id: &BusinessId,
        customer_id: &CustomerId,
    ) -> Result<Vec<Booking>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, business_id, customer_id, customer_name, service_name, slot_date,
                    slot_time, addons_json, total_amount, status, created_at
             FROM booking
             WHERE business_id = ? AND customer_id = ?
             ORDER BY slot_date ASC, slot_time ASC",
        )
        .bind(&business_id.0)
        .bind(&customer_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(booking_from_row).collect()
    }

    pub async fn list_for_customer_name(
        &self,
        business_id: &BusinessId,
        customer_name: &str,
    ) -> Result<Vec<Booking>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, business_id, customer_id, customer_name, service_name, slot_date,
                    slot_time, addons_json, total_amount, status, created_at
             FROM booking
             WHERE business_id = ? AND customer_name IS NOT NULL
               AND LOWER(customer_name) LIKE '%' || LOWER(TRIM(?)) || '%'
             ORDER BY slot_date ASC, slot_time ASC",
        )
        .bind(&business_id.0)
        .bind(customer_name)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(booking_from_row).collect()
    }

    /// Active booking with the same customer/date/time, if any. The key is
    /// deliberately service-agnostic: a customer holds at most one active
    /// booking per slot.
    pub async fn find_active_duplicate(
        &self,
        business_id: &BusinessId,
        customer_id: Option<&CustomerId>,
        customer_name: Option<&str>,
        slot_date: NaiveDate,
        slot_time: &str,
    ) -> Result<Option<Booking>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, business_id, customer_id, customer_name, service_name, slot_date,
                    slot_time, addons_json, total_amount, status, created_at
             FROM booking
             WHERE business_id = ?
               AND status != 'cancelled'
               AND slot_date = ?
               AND slot_time = ?
               AND ((? IS NOT NULL AND customer_id = ?)
                 OR (? IS NULL AND ? IS NOT NULL AND customer_name IS NOT NULL
                     AND LOWER(TRIM(customer_name)) = LOWER(TRIM(?)))
                 OR (? IS NULL AND ? IS NULL AND customer_id IS NULL
                     AND (customer_name IS NULL OR TRIM(customer_name) = '')))
             ORDER BY created_at DESC
             LIMIT 1",
        )
        .bind(&business_id.0)
        .bind(slot_date.to_string())
        .bind(slot_time)
        .bind(customer_id.map(|id| id.0.as_str()))
        .bind(customer_id.map(|id| id.0.as_str()))
        .bind(customer_id.map(|id| id.0.as_str()))
        .bind(customer_name)
        .bind(customer_name)
        .bind(customer_id.map(|id| id.0.as_str()))
        .bind(customer_name)
        .fetch_optional(&self.pool)
        .await?;

        row.map(booking_from_row).transpose()
    }

    /// Non-cancelled bookings on a date created at or after `created_after`
    /// (RFC 3339 timestamps compare lexicographically). Callers apply the
    /// loose time and customer-identity match on top.
    pub async fn recent_bookings_for_date(
        &self,
        business_id: &BusinessId,
        slot_date: NaiveDate,
        created_after: &str,
    ) -> Result<Vec<Booking>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, business_id, customer_id, customer_name, service_name, slot_date,
                    slot_time, addons_json, total_amount, status, created_at
             FROM booking
             WHERE business_id = ?
               AND status != 'cancelled'
               AND slot_date = ?
               AND created_at >= ?
             ORDER BY created_at DESC",
        )
        .bind(&business_id.0)
        .bind(slot_date.to_string())
        .bind(created_after)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(booking_from_row).collect()
    }

    /// Rewrite the mutable booking fields after a modification.
    pub async fn update_details(&self, booking: &Booking) -> Result<(), RepositoryError> {
        let addons_json = serde_json::to_string(&booking.addons)
            .map_err(|err| RepositoryError::Decode(format!("encode addons: {err}")))?;

        sqlx::query(
            "UPDATE booking SET
                service_name = ?, slot_date = ?, slot_time = ?, addons_json = ?,
                total_amount = ?, status = ?
             WHERE id = ?",
        )
        .bind(&booking.service_name)
        .bind(booking.slot_date.to_string())
        .bind(&booking.slot_time)
        .bind(addons_json)
        .bind(booking.total_amount)
        .bind(booking.status.as_str())
        .bind(&booking.id.0)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Mark cancelled. Returns false when the booking was already cancelled,
    /// so the caller releases the slot exactly once.
    pub async fn cancel(&self, id: &BookingId) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "UPDATE booking SET status = 'cancelled' WHERE id = ? AND status != 'cancelled'",
        )
        .bind(&id.0)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}

fn slot_from_row(row: SqliteRow) -> Result<BookingSlot, RepositoryError> {
    Ok(BookingSlot {
        id: SlotId(row.try_get("id")?),
        business_id: BusinessId(row.try_get("business_id")?),
        slot_date: parse_date("slot_date", row.try_get("slot_date")?)?,
        slot_time: row.try_get("slot_time")?,
        capacity: row.try_get("capacity")?,
        booked_count: row.try_get("booked_count")?,
    })
}

fn booking_from_row(row: SqliteRow) -> Result<Booking, RepositoryError> {
    let status_raw = row.try_get::<String, _>("status")?;
    let status = BookingStatus::parse(&status_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown booking status `{status_raw}`")))?;

    Ok(Booking {
        id: BookingId(row.try_get("id")?),
        business_id: BusinessId(row.try_get("business_id")?),
        customer_id: row.try_get::<Option<String>, _>("customer_id")?.map(CustomerId),
        customer_name: row.try_get("customer_name")?,
        service_name: row.try_get("service_name")?,
        slot_date: parse_date("slot_date", row.try_get("slot_date")?)?,
        slot_time: row.try_get("slot_time")?,
        addons: parse_json_list("addons_json", row.try_get("addons_json")?)?,
        total_amount: row.try_get("total_amount")?,
        status,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
    })
}
