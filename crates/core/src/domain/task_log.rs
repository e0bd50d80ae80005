use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::business::BusinessId;
use crate::domain::conversation::ConversationId;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskLogId(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Success,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Success => "success",
            Self::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "success" => Some(Self::Success),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// Append-only audit trail entry, one per tool invocation (plus the
/// summarizer's auto-update). Never mutated beyond the pending -> outcome
/// status transition, never deleted.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TaskLogEntry {
    pub id: TaskLogId,
    pub business_id: BusinessId,
    pub conversation_id: Option<ConversationId>,
    pub action_type: String,
    pub payload_json: String,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
