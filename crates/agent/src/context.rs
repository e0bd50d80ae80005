use std::fmt::Write as _;

use chrono::NaiveDate;
use tracing::warn;

use concierge_core::config::AgentConfig;
use concierge_core::{
    BookingSlot, Business, BusinessPolicy, Conversation, Customer, FaqEntry, MessageRole,
    Product, Service,
};
use concierge_db::repositories::{
    RepositoryError, SqlBookingRepository, SqlCatalogRepository, SqlConversationRepository,
};

use crate::llm::ChatMessage;

/// Catalog and slot data prefetched once per request. The context builder
/// renders it into the system prompt; executors reuse it as a fast path
/// before their own live re-checks.
#[derive(Clone, Debug, Default)]
pub struct CatalogSnapshot {
    pub business: Option<Business>,
    pub services: Vec<Service>,
    pub products: Vec<Product>,
    pub future_slots: Vec<BookingSlot>,
    pub faqs: Vec<FaqEntry>,
    pub policies: Vec<BusinessPolicy>,
}

impl CatalogSnapshot {
    pub fn find_service(&self, name: &str) -> Option<&Service> {
        self.services.iter().find(|service| service.name.eq_ignore_ascii_case(name.trim()))
    }

    pub fn find_product(&self, name: &str) -> Option<&Product> {
        self.products.iter().find(|product| product.name.eq_ignore_ascii_case(name.trim()))
    }
}

/// Assembled model input for one request.
pub struct RequestContext {
    pub messages: Vec<ChatMessage>,
    pub snapshot: CatalogSnapshot,
}

/// Read-only composition of the model-facing prompt. Every section degrades
/// to empty on a failed query; context completeness is best-effort.
pub struct ContextBuilder {
    catalog: SqlCatalogRepository,
    bookings: SqlBookingRepository,
    conversations: SqlConversationRepository,
    config: AgentConfig,
}

impl ContextBuilder {
    pub fn new(
        catalog: SqlCatalogRepository,
        bookings: SqlBookingRepository,
        conversations: SqlConversationRepository,
        config: AgentConfig,
    ) -> Self {
        Self { catalog, bookings, conversations, config }
    }

    pub async fn build(
        &self,
        conversation: &Conversation,
        customer: Option<&Customer>,
        latest_message: &str,
        today: NaiveDate,
    ) -> RequestContext {
        let snapshot = self.fetch_snapshot(conversation, today).await;
        let system = render_system_prompt(&snapshot, customer, today);

        let mut messages = vec![ChatMessage::system(system)];
        messages.extend(self.history(conversation).await);
        messages.push(ChatMessage::user(latest_message));

        RequestContext { messages, snapshot }
    }

    async fn fetch_snapshot(&self, conversation: &Conversation, today: NaiveDate) -> CatalogSnapshot {
        let business_id = &conversation.business_id;

        CatalogSnapshot {
            business: degrade(
                "context.business",
                self.catalog.find_business(business_id).await,
            )
            .flatten(),
            services: degrade("context.services", self.catalog.services(business_id).await)
                .unwrap_or_default(),
            products: degrade("context.products", self.catalog.products(business_id).await)
                .unwrap_or_default(),
            future_slots: degrade(
                "context.slots",
                self.bookings
                    .future_slots(business_id, today, self.config.slot_horizon)
                    .await,
            )
            .unwrap_or_default(),
            faqs: degrade("context.faqs", self.catalog.faqs(business_id).await)
                .unwrap_or_default(),
            policies: degrade("context.policies", self.catalog.policies(business_id).await)
                .unwrap_or_default(),
        }
    }

    async fn history(&self, conversation: &Conversation) -> Vec<ChatMessage> {
        let stored = degrade(
            "context.history",
            self.conversations
                .recent_messages(&conversation.id, self.config.history_limit)
                .await,
        )
        .unwrap_or_default();

        stored
            .into_iter()
            .map(|message| match message.role {
                MessageRole::Visitor => ChatMessage::user(message.content),
                MessageRole::Assistant | MessageRole::Agent => {
                    ChatMessage::assistant(message.content)
                }
            })
            .collect()
    }
}

fn degrade<T>(section: &str, result: Result<T, RepositoryError>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(error) => {
            warn!(
                event_name = "context.section_failed",
                section,
                error = %error,
                "context section degraded to empty"
            );
            None
        }
    }
}

fn render_system_prompt(
    snapshot: &CatalogSnapshot,
    customer: Option<&Customer>,
    today: NaiveDate,
) -> String {
    let mut prompt = String::new();

    match &snapshot.business {
        Some(business) => {
            let _ = writeln!(
                prompt,
                "You are the booking and sales assistant for {}{}.",
                business.name,
                business
                    .business_type
                    .as_deref()
                    .map(|kind| format!(" (a {kind})"))
                    .unwrap_or_default()
            );
        }
        None => {
            let _ = writeln!(prompt, "You are a booking and sales assistant.");
        }
    }
    let _ = writeln!(prompt, "Today's date is {today}.");

    if let Some(customer) = customer {
        let _ = writeln!(prompt, "\n## Known customer");
        let _ = writeln!(prompt, "- id: {}", customer.id.0);
        let _ = writeln!(prompt, "- name: {}", customer.name);
        if let Some(email) = &customer.email {
            let _ = writeln!(prompt, "- email: {email}");
        }
        if let Some(phone) = &customer.phone {
            let _ = writeln!(prompt, "- phone: {phone}");
        }
        let _ = writeln!(prompt, "- lead score: {}", customer.lead_score);
        if !customer.tags.is_empty() {
            let _ = writeln!(prompt, "- tags: {}", customer.tags.join(", "));
        }
        if let Some(notes) = &customer.internal_notes {
            let _ = writeln!(prompt, "- private notes:\n{notes}");
        }
    }

    if !snapshot.services.is_empty() {
        let _ = writeln!(prompt, "\n## Services");
        for service in &snapshot.services {
            let duration = service
                .duration_minutes
                .map(|minutes| format!(", {minutes} min"))
                .unwrap_or_default();
            let _ = writeln!(prompt, "- {} (${:.2}{duration})", service.name, service.price);
            for addon in &service.addons {
                let _ = writeln!(prompt, "  - add-on: {} (${:.2})", addon.name, addon.price);
            }
        }
    }

    if !snapshot.products.is_empty() {
        let _ = writeln!(prompt, "\n## Products");
        for product in &snapshot.products {
            let _ = writeln!(
                prompt,
                "- {} (${:.2}, {} in stock)",
                product.name,
                product.price,
                product.effective_stock()
            );
            for variant in &product.variants {
                let _ = writeln!(
                    prompt,
                    "  - variant: {} (${:.2}, {} in stock)",
                    variant.name,
                    variant.effective_price(product.price),
                    variant.effective_stock()
                );
            }
        }
    }

    if !snapshot.future_slots.is_empty() {
        let _ = writeln!(prompt, "\n## Available slots");
        for slot in &snapshot.future_slots {
            let _ = writeln!(
                prompt,
                "- {} {} ({} left)",
                slot.slot_date,
                slot.slot_time,
                slot.remaining()
            );
        }
    }

    if !snapshot.faqs.is_empty() {
        let _ = writeln!(prompt, "\n## FAQs");
        for faq in &snapshot.faqs {
            let _ = writeln!(prompt, "Q: {}\nA: {}", faq.question, faq.answer);
        }
    }

    if !snapshot.policies.is_empty() {
        let _ = writeln!(prompt, "\n## Policies");
        for policy in &snapshot.policies {
            let _ = writeln!(prompt, "### {}\n{}", policy.title, policy.body);
        }
    }

    if let Some(instructions) =
        snapshot.business.as_ref().and_then(|business| business.agent_instructions.as_deref())
    {
        let _ = writeln!(prompt, "\n## Merchant instructions\n{instructions}");
    }

    prompt
}
