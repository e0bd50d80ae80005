use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::business::BusinessId;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CustomerId(pub String);

/// A business-scoped CRM record. Uniqueness per real person is approximate:
/// matched by email, then phone, then exact name, never enforced as a key.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Customer {
    pub id: CustomerId,
    pub business_id: BusinessId,
    pub name: String,
    pub phone: Option<String>,
    pub email: Option<String>,
    /// Business-internal running note log, never shown to the customer.
    pub internal_notes: Option<String>,
    pub tags: Vec<String>,
    pub lead_score: i64,
    pub created_at: DateTime<Utc>,
}

pub fn clamp_lead_score(score: i64) -> i64 {
    score.clamp(0, 100)
}

/// Display names that identify nobody. A conversation whose visitor name is
/// one of these never resolves a customer by name alone.
const PLACEHOLDER_NAMES: &[&str] =
    &["guest", "visitor", "anonymous", "anon", "customer", "user", "unknown", "there", "friend"];

pub fn is_placeholder_name(name: &str) -> bool {
    let normalized = name.trim().to_ascii_lowercase();
    normalized.is_empty() || PLACEHOLDER_NAMES.contains(&normalized.as_str())
}

#[cfg(test)]
mod tests {
    use super::{clamp_lead_score, is_placeholder_name};

    #[test]
    fn lead_score_clamps_to_bounds() {
        assert_eq!(clamp_lead_score(-10), 0);
        assert_eq!(clamp_lead_score(42), 42);
        assert_eq!(clamp_lead_score(105), 100);
    }

    #[test]
    fn placeholder_names_are_rejected() {
        assert!(is_placeholder_name("Guest"));
        assert!(is_placeholder_name("  visitor "));
        assert!(is_placeholder_name(""));
        assert!(!is_placeholder_name("Maya Rodriguez"));
    }
}
