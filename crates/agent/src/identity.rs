use tracing::warn;

use concierge_core::{is_placeholder_name, Conversation, Customer, CustomerId};
use concierge_db::repositories::{
    RepositoryError, SqlConversationRepository, SqlCustomerRepository,
};

/// Contact details supplied explicitly in tool arguments, layered over the
/// conversation's denormalized visitor fields.
#[derive(Clone, Debug, Default)]
pub struct ContactHints {
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
}

impl ContactHints {
    pub fn from_conversation(conversation: &Conversation) -> Self {
        Self {
            name: non_blank(conversation.visitor_name.as_deref()),
            email: non_blank(conversation.visitor_email.as_deref()),
            phone: non_blank(conversation.visitor_phone.as_deref()),
        }
    }

    /// Explicit hints win; conversation fields fill the gaps.
    pub fn layered_over(mut self, fallback: Self) -> Self {
        self.name = self.name.or(fallback.name);
        self.email = self.email.or(fallback.email);
        self.phone = self.phone.or(fallback.phone);
        self
    }

    pub fn has_contact_info(&self) -> bool {
        self.email.is_some() || self.phone.is_some()
    }
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value.map(str::trim).filter(|text| !text.is_empty()).map(str::to_string)
}

/// Finds the unique customer record behind a conversation. Explicit id wins,
/// then email, then phone, then the visitor's display name as a last resort.
/// Every path that would guess between candidates resolves to `None` instead.
pub struct IdentityResolver {
    customers: SqlCustomerRepository,
    conversations: SqlConversationRepository,
}

impl IdentityResolver {
    pub fn new(customers: SqlCustomerRepository, conversations: SqlConversationRepository) -> Self {
        Self { customers, conversations }
    }

    pub async fn resolve(
        &self,
        conversation: &Conversation,
        explicit_customer_id: Option<&CustomerId>,
        explicit_contact: Option<&ContactHints>,
    ) -> Result<Option<Customer>, RepositoryError> {
        let hints = explicit_contact
            .cloned()
            .unwrap_or_default()
            .layered_over(ContactHints::from_conversation(conversation));

        let resolved = self
            .lookup(conversation, explicit_customer_id, &hints)
            .await?;

        if let Some(customer) = &resolved {
            self.backfill(conversation, customer).await;
        }

        Ok(resolved)
    }

    async fn lookup(
        &self,
        conversation: &Conversation,
        explicit_customer_id: Option<&CustomerId>,
        hints: &ContactHints,
    ) -> Result<Option<Customer>, RepositoryError> {
        let business_id = &conversation.business_id;

        if let Some(id) = explicit_customer_id {
            if let Some(customer) = self.customers.find_by_id(business_id, id).await? {
                return Ok(Some(customer));
            }
        }

        if let Some(email) = &hints.email {
            if let Some(customer) = self.customers.find_unique_by_email(business_id, email).await? {
                return Ok(Some(customer));
            }
        }

        if let Some(phone) = &hints.phone {
            if let Some(customer) = self.customers.find_unique_by_phone(business_id, phone).await? {
                return Ok(Some(customer));
            }
        }

        // Name is only trusted when there is nothing stronger to go on, and
        // never for generic placeholders like "guest".
        if !hints.has_contact_info() {
            if let Some(name) = &hints.name {
                if !is_placeholder_name(name) {
                    return self.customers.find_unique_by_exact_name(business_id, name).await;
                }
            }
        }

        Ok(None)
    }

    /// Persist the resolved identity onto the conversation's empty visitor
    /// fields. Best-effort: a write failure is logged and swallowed.
    pub async fn backfill(&self, conversation: &Conversation, customer: &Customer) {
        let result = self
            .conversations
            .backfill_visitor_identity(
                &conversation.id,
                Some(customer.name.as_str()),
                customer.email.as_deref(),
                customer.phone.as_deref(),
            )
            .await;

        if let Err(error) = result {
            warn!(
                event_name = "identity.backfill_failed",
                conversation_id = %conversation.id.0,
                error = %error,
                "failed to backfill conversation identity"
            );
        }
    }
}
