use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::business::BusinessId;
use crate::domain::customer::CustomerId;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SlotId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BookingId(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Cancelled,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "confirmed" => Some(Self::Confirmed),
            "cancelled" | "canceled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

/// A (business, date, time) capacity unit. `0 <= booked_count <= capacity`
/// must hold at all times, including under concurrent mutation; the
/// repository enforces it with conditional updates.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BookingSlot {
    pub id: SlotId,
    pub business_id: BusinessId,
    pub slot_date: NaiveDate,
    pub slot_time: String,
    pub capacity: i64,
    pub booked_count: i64,
}

impl BookingSlot {
    pub fn remaining(&self) -> i64 {
        (self.capacity - self.booked_count).max(0)
    }

    pub fn has_capacity(&self) -> bool {
        self.booked_count < self.capacity
    }
}

/// An optional extra attached to a booked service.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Addon {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Booking {
    pub id: BookingId,
    pub business_id: BusinessId,
    pub customer_id: Option<CustomerId>,
    pub customer_name: Option<String>,
    pub service_name: String,
    pub slot_date: NaiveDate,
    pub slot_time: String,
    pub addons: Vec<Addon>,
    pub total_amount: f64,
    pub status: BookingStatus,
    pub created_at: DateTime<Utc>,
}

impl Booking {
    pub fn is_cancelled(&self) -> bool {
        self.status == BookingStatus::Cancelled
    }
}

/// Set union of add-ons by case-insensitive name. Existing entries win; new
/// names are appended in their incoming order.
pub fn merge_addons(existing: &[Addon], incoming: &[Addon]) -> Vec<Addon> {
    let mut merged = existing.to_vec();
    for addon in incoming {
        let already_present =
            merged.iter().any(|known| known.name.eq_ignore_ascii_case(&addon.name));
        if !already_present {
            merged.push(addon.clone());
        }
    }
    merged
}

/// Parse an "HH:MM" or "HH:MM:SS" time into minutes since midnight. Used for
/// nearest-slot distance ordering and fuzzy slot matching.
pub fn time_to_minutes(raw: &str) -> Option<i64> {
    let mut parts = raw.trim().split(':');
    let hours: i64 = parts.next()?.parse().ok()?;
    let minutes: i64 = parts.next()?.parse().ok()?;
    if !(0..24).contains(&hours) || !(0..60).contains(&minutes) {
        return None;
    }
    Some(hours * 60 + minutes)
}

/// Truncate a time string to "HH:MM" for loose comparisons. The input comes
/// from the model and may be arbitrary text; a cut that would land inside a
/// multi-byte character falls back to the full string.
pub fn truncate_time(raw: &str) -> &str {
    let trimmed = raw.trim();
    trimmed.get(..5).unwrap_or(trimmed)
}

#[cfg(test)]
mod tests {
    use super::{merge_addons, time_to_minutes, truncate_time, Addon, BookingStatus};

    #[test]
    fn merge_unions_by_case_insensitive_name_and_keeps_existing() {
        let existing = vec![Addon { name: "Beard Trim".to_string(), price: Some(15.0) }];
        let incoming = vec![
            Addon { name: "beard trim".to_string(), price: Some(12.0) },
            Addon { name: "Hot Towel".to_string(), price: None },
        ];

        let merged = merge_addons(&existing, &incoming);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].name, "Beard Trim");
        assert_eq!(merged[0].price, Some(15.0));
        assert_eq!(merged[1].name, "Hot Towel");
    }

    #[test]
    fn time_parsing_accepts_seconds_and_rejects_garbage() {
        assert_eq!(time_to_minutes("10:00"), Some(600));
        assert_eq!(time_to_minutes("10:30:00"), Some(630));
        assert_eq!(time_to_minutes("25:00"), None);
        assert_eq!(time_to_minutes("noon"), None);
    }

    #[test]
    fn truncation_drops_seconds_only() {
        assert_eq!(truncate_time("10:00:00"), "10:00");
        assert_eq!(truncate_time("9:30"), "9:30");
    }

    #[test]
    fn truncation_tolerates_multibyte_input() {
        assert_eq!(truncate_time("10:0€"), "10:0€");
        assert_eq!(truncate_time("10:00€"), "10:00");
        assert_eq!(truncate_time("€€"), "€€");
    }

    #[test]
    fn cancelled_accepts_both_spellings() {
        assert_eq!(BookingStatus::parse("cancelled"), Some(BookingStatus::Cancelled));
        assert_eq!(BookingStatus::parse("canceled"), Some(BookingStatus::Cancelled));
        assert_eq!(BookingStatus::Confirmed.as_str(), "confirmed");
    }
}
