use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::business::BusinessId;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub String);

/// A visitor thread. The denormalized visitor fields are an identity
/// fallback, backfilled as tool executions discover who the visitor is.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ConversationId,
    pub business_id: BusinessId,
    pub visitor_name: Option<String>,
    pub visitor_email: Option<String>,
    pub visitor_phone: Option<String>,
}

impl Conversation {
    pub fn has_contact_info(&self) -> bool {
        non_empty(self.visitor_email.as_deref()) || non_empty(self.visitor_phone.as_deref())
    }
}

fn non_empty(value: Option<&str>) -> bool {
    value.map(|value| !value.trim().is_empty()).unwrap_or(false)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    Visitor,
    Assistant,
    Agent,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Visitor => "visitor",
            Self::Assistant => "assistant",
            Self::Agent => "agent",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "visitor" | "user" => Some(Self::Visitor),
            "assistant" => Some(Self::Assistant),
            "agent" => Some(Self::Agent),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub role: MessageRole,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::{Conversation, ConversationId, MessageRole};
    use crate::domain::business::BusinessId;

    #[test]
    fn contact_info_ignores_blank_fields() {
        let conversation = Conversation {
            id: ConversationId("conv-1".to_string()),
            business_id: BusinessId("biz-1".to_string()),
            visitor_name: Some("Guest".to_string()),
            visitor_email: Some("   ".to_string()),
            visitor_phone: None,
        };
        assert!(!conversation.has_contact_info());
    }

    #[test]
    fn role_round_trips_and_accepts_user_alias() {
        assert_eq!(MessageRole::parse("visitor"), Some(MessageRole::Visitor));
        assert_eq!(MessageRole::parse("user"), Some(MessageRole::Visitor));
        assert_eq!(MessageRole::parse(MessageRole::Agent.as_str()), Some(MessageRole::Agent));
        assert_eq!(MessageRole::parse("system"), None);
    }
}
