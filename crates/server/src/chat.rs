use axum::{extract::State, http::StatusCode, Json};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;

use concierge_agent::{
    AgentError, AgentRuntime, ContextBuilder, ExecutorContext, IdentityResolver,
    InsightSummarizer, ToolExecutor,
};
use concierge_core::{ConversationId, Message, MessageId, MessageRole};
use concierge_db::repositories::{
    SqlBookingRepository, SqlCatalogRepository, SqlConversationRepository, SqlCustomerRepository,
    SqlOrderRepository, SqlTaskLogRepository,
};

use crate::bootstrap::AppState;

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub merchant_id: Option<String>,
    #[serde(default)]
    pub message_content: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub reply: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> (StatusCode, Json<serde_json::Value>) {
    let body = serde_json::to_value(ErrorResponse { error: message.into() })
        .unwrap_or_else(|_| serde_json::json!({"error": "internal error"}));
    (status, Json(body))
}

/// POST /api/v1/chat — the request handler: assemble context, run the
/// tool-calling loop, persist the reply, then the best-effort insight pass.
pub async fn handle(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> (StatusCode, Json<serde_json::Value>) {
    // Input validation happens before any model or store contact.
    let Some(conversation_id) =
        request.conversation_id.as_deref().map(str::trim).filter(|id| !id.is_empty())
    else {
        return error_response(StatusCode::BAD_REQUEST, "conversation_id is required");
    };
    let Some(merchant_id) =
        request.merchant_id.as_deref().map(str::trim).filter(|id| !id.is_empty())
    else {
        return error_response(StatusCode::BAD_REQUEST, "merchant_id is required");
    };
    let message_content = request.message_content.unwrap_or_default();

    let conversations = SqlConversationRepository::new(state.db_pool.clone());
    let conversation = match conversations
        .find_by_id(&ConversationId(conversation_id.to_string()))
        .await
    {
        Ok(Some(conversation)) if conversation.business_id.0 == merchant_id => conversation,
        Ok(_) => {
            return error_response(
                StatusCode::NOT_FOUND,
                "conversation not found for this merchant",
            );
        }
        Err(err) => {
            error!(event_name = "chat.conversation_load_failed", error = %err, "failed to load conversation");
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "failed to load conversation");
        }
    };

    let agent_config = state.config.agent.clone();
    let identity = IdentityResolver::new(
        SqlCustomerRepository::new(state.db_pool.clone()),
        SqlConversationRepository::new(state.db_pool.clone()),
    );

    // Pre-resolution is best-effort: a failed lookup degrades to anonymous.
    let customer = match identity.resolve(&conversation, None, None).await {
        Ok(customer) => customer,
        Err(err) => {
            warn!(event_name = "chat.identity_degraded", error = %err, "identity resolution failed");
            None
        }
    };

    let builder = ContextBuilder::new(
        SqlCatalogRepository::new(state.db_pool.clone()),
        SqlBookingRepository::new(state.db_pool.clone()),
        SqlConversationRepository::new(state.db_pool.clone()),
        agent_config.clone(),
    );
    let context = builder
        .build(&conversation, customer.as_ref(), &message_content, Utc::now().date_naive())
        .await;

    let executor = ToolExecutor::new(
        SqlBookingRepository::new(state.db_pool.clone()),
        SqlOrderRepository::new(state.db_pool.clone()),
        SqlCustomerRepository::new(state.db_pool.clone()),
        SqlCatalogRepository::new(state.db_pool.clone()),
        IdentityResolver::new(
            SqlCustomerRepository::new(state.db_pool.clone()),
            SqlConversationRepository::new(state.db_pool.clone()),
        ),
        agent_config.clone(),
    );
    let runtime = AgentRuntime::new(
        state.llm.clone(),
        executor,
        SqlTaskLogRepository::new(state.db_pool.clone()),
        agent_config.clone(),
    );

    let ctx = ExecutorContext { customer, snapshot: context.snapshot };
    let outcome = match runtime.run(&conversation, context.messages, ctx).await {
        Ok(outcome) => outcome,
        Err(AgentError::Llm(err)) => {
            error!(event_name = "chat.llm_failed", error = %err, "model exchange failed");
            return error_response(StatusCode::BAD_GATEWAY, "language model service unavailable");
        }
    };

    let reply_message = Message {
        id: MessageId(Uuid::new_v4().to_string()),
        conversation_id: conversation.id.clone(),
        role: MessageRole::Assistant,
        content: outcome.reply.clone(),
        created_at: Utc::now(),
    };
    if let Err(err) = conversations.append_message(&reply_message).await {
        error!(event_name = "chat.reply_persist_failed", error = %err, "failed to persist reply");
        return error_response(StatusCode::INTERNAL_SERVER_ERROR, "failed to persist reply");
    }

    // Insight maintenance runs after the reply is final; its failures are
    // logged inside the summarizer and never surface here.
    let summarizer = InsightSummarizer::new(
        state.llm.clone(),
        SqlCustomerRepository::new(state.db_pool.clone()),
        SqlTaskLogRepository::new(state.db_pool.clone()),
        IdentityResolver::new(
            SqlCustomerRepository::new(state.db_pool.clone()),
            SqlConversationRepository::new(state.db_pool.clone()),
        ),
        agent_config,
    );
    summarizer
        .run(
            &conversation,
            &message_content,
            &outcome.reply,
            outcome.context.customer.clone(),
            &outcome.actions,
        )
        .await;

    info!(
        event_name = "chat.reply_sent",
        conversation_id = %conversation.id.0,
        actions = outcome.actions.len(),
        "reply produced"
    );

    let response = ChatResponse {
        reply: outcome.reply,
        customer_id: outcome.context.customer.map(|customer| customer.id.0),
    };
    match serde_json::to_value(&response) {
        Ok(body) => (StatusCode::OK, Json(body)),
        Err(_) => error_response(StatusCode::INTERNAL_SERVER_ERROR, "failed to encode response"),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use axum::{extract::State, http::StatusCode, Json};
    use serde_json::Value;

    use concierge_agent::{AssistantTurn, ChatMessage, LlmClient, LlmError};
    use concierge_core::config::AppConfig;
    use concierge_db::{connect_with_settings, migrations, DemoSeedDataset};

    use crate::bootstrap::AppState;

    use super::{handle, ChatRequest};

    struct CannedLlm {
        reply: String,
    }

    #[async_trait]
    impl LlmClient for CannedLlm {
        async fn chat(
            &self,
            _messages: &[ChatMessage],
            _tools: &[Value],
        ) -> Result<AssistantTurn, LlmError> {
            Ok(AssistantTurn { text: Some(self.reply.clone()), tool_calls: Vec::new() })
        }

        async fn summarize(&self, _prompt: &str) -> Result<String, LlmError> {
            Ok("Visitor asked about availability.".to_string())
        }
    }

    struct FailingLlm;

    #[async_trait]
    impl LlmClient for FailingLlm {
        async fn chat(
            &self,
            _messages: &[ChatMessage],
            _tools: &[Value],
        ) -> Result<AssistantTurn, LlmError> {
            Err(LlmError::Status { status: 500, body: "upstream down".to_string() })
        }

        async fn summarize(&self, _prompt: &str) -> Result<String, LlmError> {
            Err(LlmError::EmptyResponse)
        }
    }

    async fn seeded_state(llm: Arc<dyn LlmClient>) -> AppState {
        let db_pool = connect_with_settings("sqlite::memory:", 1, 5).await.expect("connect");
        migrations::run_pending(&db_pool).await.expect("migrate");
        DemoSeedDataset::load(&db_pool).await.expect("seed");
        AppState { config: AppConfig::default(), db_pool, llm }
    }

    fn request(conversation_id: Option<&str>, merchant_id: Option<&str>) -> ChatRequest {
        ChatRequest {
            conversation_id: conversation_id.map(str::to_string),
            merchant_id: merchant_id.map(str::to_string),
            message_content: Some("Do you have anything tomorrow?".to_string()),
        }
    }

    #[tokio::test]
    async fn missing_identifiers_are_rejected_before_any_processing() {
        let state = seeded_state(Arc::new(FailingLlm)).await;

        let (status, Json(body)) =
            handle(State(state.clone()), Json(request(None, Some("biz-fade-001")))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().expect("error").contains("conversation_id"));

        let (status, _) =
            handle(State(state.clone()), Json(request(Some("conv-fade-001"), None))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        state.db_pool.close().await;
    }

    #[tokio::test]
    async fn plain_reply_round_trip_persists_the_assistant_message() {
        let llm = Arc::new(CannedLlm { reply: "We have 9am open tomorrow.".to_string() });
        let state = seeded_state(llm).await;

        let (status, Json(body)) =
            handle(State(state.clone()), Json(request(Some("conv-fade-001"), Some("biz-fade-001"))))
                .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["reply"], "We have 9am open tomorrow.");
        // The seeded visitor resolves to the known customer by email.
        assert_eq!(body["customer_id"], "cust-fade-001");

        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(1) FROM message WHERE conversation_id = 'conv-fade-001' AND role = 'assistant'",
        )
        .fetch_one(&state.db_pool)
        .await
        .expect("count");
        assert_eq!(count, 1);

        state.db_pool.close().await;
    }

    #[tokio::test]
    async fn upstream_model_failure_maps_to_bad_gateway() {
        let state = seeded_state(Arc::new(FailingLlm)).await;

        let (status, Json(body)) =
            handle(State(state.clone()), Json(request(Some("conv-fade-001"), Some("biz-fade-001"))))
                .await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert!(body["error"].as_str().expect("error").contains("language model"));

        state.db_pool.close().await;
    }

    #[tokio::test]
    async fn unknown_conversation_is_not_found() {
        let state = seeded_state(Arc::new(FailingLlm)).await;

        let (status, _) =
            handle(State(state.clone()), Json(request(Some("conv-missing"), Some("biz-fade-001"))))
                .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        state.db_pool.close().await;
    }
}
