use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, warn};
use uuid::Uuid;

use concierge_core::config::AgentConfig;
use concierge_core::{
    clamp_lead_score, Conversation, Customer, TaskLogEntry, TaskLogId, TaskStatus,
};
use concierge_db::repositories::{SqlCustomerRepository, SqlTaskLogRepository};

use crate::identity::IdentityResolver;
use crate::llm::LlmClient;
use crate::runtime::CompletedAction;
use crate::schema::ToolName;

const BOOKED_TAG: &str = "Booked Service";
const ORDERED_TAG: &str = "Ordered Product";
const FALLBACK_EXCERPT_LEN: usize = 160;

/// Post-reply CRM maintenance: tags, lead score, and a running private note.
/// Entirely best-effort; no failure here may surface to the caller.
pub struct InsightSummarizer {
    llm: Arc<dyn LlmClient>,
    customers: SqlCustomerRepository,
    task_log: SqlTaskLogRepository,
    identity: IdentityResolver,
    config: AgentConfig,
}

impl InsightSummarizer {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        customers: SqlCustomerRepository,
        task_log: SqlTaskLogRepository,
        identity: IdentityResolver,
        config: AgentConfig,
    ) -> Self {
        Self { llm, customers, task_log, identity, config }
    }

    pub async fn run(
        &self,
        conversation: &Conversation,
        visitor_message: &str,
        reply: &str,
        customer: Option<Customer>,
        actions: &[CompletedAction],
    ) {
        let customer = match customer {
            Some(customer) => Some(customer),
            None => match self.identity.resolve(conversation, None, None).await {
                Ok(resolved) => resolved,
                Err(error) => {
                    warn!(
                        event_name = "insight.resolve_failed",
                        error = %error,
                        "insight pass could not resolve a customer"
                    );
                    None
                }
            },
        };
        let Some(customer) = customer else {
            debug!(
                event_name = "insight.skipped",
                conversation_id = %conversation.id.0,
                "no customer resolved, skipping insight update"
            );
            return;
        };

        let tags = union_action_tags(&customer.tags, actions);
        let summary = self.turn_summary(visitor_message, reply).await;
        let notes = append_note(customer.internal_notes.as_deref(), &summary);
        let lead_score = clamp_lead_score(customer.lead_score + self.config.lead_score_step);

        if let Err(error) =
            self.customers.update_insight(&customer.id, &notes, &tags, lead_score).await
        {
            warn!(
                event_name = "insight.update_failed",
                customer_id = %customer.id.0,
                error = %error,
                "failed to persist insight update"
            );
            return;
        }

        self.log_auto_update(conversation, &customer, &tags, lead_score).await;
    }

    /// One-sentence summary of the exchange from the secondary model call,
    /// falling back to a literal excerpt of the reply.
    async fn turn_summary(&self, visitor_message: &str, reply: &str) -> String {
        let prompt = format!(
            "Summarize this customer exchange in one sentence for a CRM note. \
             Mention any booking, order, or preference.\n\nCustomer: {visitor_message}\nAssistant: {reply}"
        );

        match self.llm.summarize(&prompt).await {
            Ok(summary) => summary.trim().to_string(),
            Err(error) => {
                warn!(
                    event_name = "insight.summary_failed",
                    error = %error,
                    "summary call failed, using reply excerpt"
                );
                truncate_excerpt(reply, FALLBACK_EXCERPT_LEN)
            }
        }
    }

    async fn log_auto_update(
        &self,
        conversation: &Conversation,
        customer: &Customer,
        tags: &[String],
        lead_score: i64,
    ) {
        let now = Utc::now();
        let payload = serde_json::json!({
            "customer_id": customer.id.0,
            "tags": tags,
            "lead_score": lead_score,
        });
        let entry = TaskLogEntry {
            id: TaskLogId(Uuid::new_v4().to_string()),
            business_id: conversation.business_id.clone(),
            conversation_id: Some(conversation.id.clone()),
            action_type: "insight_auto_update".to_string(),
            payload_json: payload.to_string(),
            status: TaskStatus::Success,
            created_at: now,
            updated_at: now,
        };

        if let Err(error) = self.task_log.insert(&entry).await {
            warn!(
                event_name = "insight.task_log_failed",
                error = %error,
                "failed to record insight auto-update"
            );
        }
    }
}

fn union_action_tags(existing: &[String], actions: &[CompletedAction]) -> Vec<String> {
    let mut tags = existing.to_vec();
    let booked = actions
        .iter()
        .any(|action| action.success && action.tool == ToolName::CreateBooking);
    let ordered = actions
        .iter()
        .any(|action| action.success && action.tool == ToolName::CreateOrder);

    if booked && !tags.iter().any(|tag| tag.eq_ignore_ascii_case(BOOKED_TAG)) {
        tags.push(BOOKED_TAG.to_string());
    }
    if ordered && !tags.iter().any(|tag| tag.eq_ignore_ascii_case(ORDERED_TAG)) {
        tags.push(ORDERED_TAG.to_string());
    }
    tags
}

fn append_note(existing: Option<&str>, summary: &str) -> String {
    let stamped = format!("[{}] {summary}", Utc::now().format("%Y-%m-%d %H:%M"));
    match existing.map(str::trim).filter(|notes| !notes.is_empty()) {
        Some(notes) => format!("{notes}\n{stamped}"),
        None => stamped,
    }
}

fn truncate_excerpt(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let cut: String = text.chars().take(max_chars).collect();
    format!("{cut}…")
}

#[cfg(test)]
mod tests {
    use crate::runtime::CompletedAction;
    use crate::schema::ToolName;

    use super::{append_note, truncate_excerpt, union_action_tags};

    #[test]
    fn tags_are_added_only_for_successful_creations() {
        let existing = vec!["VIP".to_string()];
        let actions = vec![
            CompletedAction { tool: ToolName::CreateBooking, success: true },
            CompletedAction { tool: ToolName::CreateOrder, success: false },
        ];

        let tags = union_action_tags(&existing, &actions);
        assert_eq!(tags, vec!["VIP".to_string(), "Booked Service".to_string()]);
    }

    #[test]
    fn existing_tags_are_never_duplicated() {
        let existing = vec!["booked service".to_string()];
        let actions = vec![CompletedAction { tool: ToolName::CreateBooking, success: true }];

        let tags = union_action_tags(&existing, &actions);
        assert_eq!(tags.len(), 1);
    }

    #[test]
    fn notes_accumulate_with_timestamps() {
        let first = append_note(None, "Asked about fades.");
        assert!(first.ends_with("Asked about fades."));
        assert!(first.starts_with('['));

        let second = append_note(Some(&first), "Booked for Tuesday.");
        assert_eq!(second.lines().count(), 2);
    }

    #[test]
    fn excerpts_are_truncated_on_char_boundaries() {
        assert_eq!(truncate_excerpt("short", 10), "short");
        let long = "a".repeat(200);
        let excerpt = truncate_excerpt(&long, 160);
        assert_eq!(excerpt.chars().count(), 161);
        assert!(excerpt.ends_with('…'));
    }
}
