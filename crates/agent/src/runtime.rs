use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

use concierge_core::config::AgentConfig;
use concierge_core::{Conversation, TaskLogEntry, TaskLogId, TaskStatus};
use concierge_db::repositories::SqlTaskLogRepository;

use crate::executor::{ExecutorContext, ToolExecutor};
use crate::llm::{ChatMessage, LlmClient, LlmError, ToolCallRequest};
use crate::schema::{tool_declarations, ToolName};

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error(transparent)]
    Llm(#[from] LlmError),
}

/// One successfully dispatched tool call, recorded for the insight pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CompletedAction {
    pub tool: ToolName,
    pub success: bool,
}

/// Final product of one request: the reply text, the customer the turn ended
/// up attached to, and the actions it performed.
#[derive(Debug)]
pub struct TurnOutcome {
    pub reply: String,
    pub context: ExecutorContext,
    pub actions: Vec<CompletedAction>,
}

/// Drives the bounded tool-calling exchange: send history, dispatch any
/// requested tools in order, feed results back, stop on a plain-text turn or
/// at the round cap.
pub struct AgentRuntime {
    llm: Arc<dyn LlmClient>,
    executor: ToolExecutor,
    task_log: SqlTaskLogRepository,
    config: AgentConfig,
}

impl AgentRuntime {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        executor: ToolExecutor,
        task_log: SqlTaskLogRepository,
        config: AgentConfig,
    ) -> Self {
        Self { llm, executor, task_log, config }
    }

    pub async fn run(
        &self,
        conversation: &Conversation,
        mut messages: Vec<ChatMessage>,
        mut ctx: ExecutorContext,
    ) -> Result<TurnOutcome, AgentError> {
        let declarations = tool_declarations();
        let mut actions: Vec<CompletedAction> = Vec::new();
        let mut reply_candidate: Option<String> = None;

        for round in 1..=self.config.max_model_rounds {
            let turn = self.llm.chat(&messages, &declarations).await?;

            if turn.tool_calls.is_empty() {
                // Only a turn without tool calls is final.
                let reply = turn.text.or(reply_candidate).unwrap_or_default();
                return Ok(TurnOutcome { reply, context: ctx, actions });
            }

            if let Some(text) = &turn.text {
                // Inline text on a tool-call turn is kept only as the current
                // best reply candidate.
                reply_candidate = Some(text.clone());
            }

            debug!(
                event_name = "runtime.dispatching_tools",
                round,
                count = turn.tool_calls.len(),
                "dispatching tool calls"
            );
            messages.push(ChatMessage::assistant_with_tool_calls(
                turn.text.clone(),
                turn.tool_calls.clone(),
            ));

            for call in &turn.tool_calls {
                let (next_ctx, payload, success) =
                    self.dispatch_logged(conversation, ctx, call).await;
                ctx = next_ctx;

                if let Some(tool) = ToolName::parse(&call.function.name) {
                    actions.push(CompletedAction { tool, success });
                }
                messages.push(ChatMessage::tool_result(call.id.clone(), payload.to_string()));
            }
        }

        // Round cap reached: force-terminate with whatever text accumulated.
        warn!(
            event_name = "runtime.round_cap_reached",
            conversation_id = %conversation.id.0,
            max_model_rounds = self.config.max_model_rounds,
            "tool-calling loop hit the round cap"
        );
        Ok(TurnOutcome {
            reply: reply_candidate.unwrap_or_default(),
            context: ctx,
            actions,
        })
    }

    /// Dispatch one call wrapped in its audit-trail entry: `pending` before,
    /// `success`/`failed` after. Unknown tool names are rejected with a
    /// structured failure rather than a silent no-op.
    async fn dispatch_logged(
        &self,
        conversation: &Conversation,
        ctx: ExecutorContext,
        call: &ToolCallRequest,
    ) -> (ExecutorContext, Value, bool) {
        let log_id = self.log_pending(conversation, call).await;

        let (ctx, payload, success) = match ToolName::parse(&call.function.name) {
            Some(tool) => {
                let (ctx, outcome) =
                    self.executor.dispatch(conversation, ctx, tool, &call.function.arguments).await;
                (ctx, outcome.payload, outcome.success)
            }
            None => {
                warn!(
                    event_name = "runtime.unknown_tool",
                    tool = %call.function.name,
                    "model requested an undeclared tool"
                );
                let payload = serde_json::json!({
                    "success": false,
                    "error": format!("unknown tool `{}`", call.function.name),
                });
                (ctx, payload, false)
            }
        };

        if let Some(log_id) = log_id {
            let status = if success { TaskStatus::Success } else { TaskStatus::Failed };
            if let Err(error) =
                self.task_log.mark_outcome(&log_id, status, &payload.to_string()).await
            {
                warn!(
                    event_name = "runtime.task_log_failed",
                    error = %error,
                    "failed to record tool outcome"
                );
            }
        }

        (ctx, payload, success)
    }

    async fn log_pending(
        &self,
        conversation: &Conversation,
        call: &ToolCallRequest,
    ) -> Option<TaskLogId> {
        let now = Utc::now();
        let entry = TaskLogEntry {
            id: TaskLogId(Uuid::new_v4().to_string()),
            business_id: conversation.business_id.clone(),
            conversation_id: Some(conversation.id.clone()),
            action_type: call.function.name.clone(),
            payload_json: call.function.arguments.clone(),
            status: TaskStatus::Pending,
            created_at: now,
            updated_at: now,
        };

        match self.task_log.insert(&entry).await {
            Ok(()) => Some(entry.id),
            Err(error) => {
                warn!(
                    event_name = "runtime.task_log_failed",
                    error = %error,
                    "failed to record pending tool dispatch"
                );
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use async_trait::async_trait;
    use serde_json::Value;

    use concierge_core::config::AgentConfig;
    use concierge_core::{BusinessId, Conversation, ConversationId};
    use concierge_db::repositories::{
        SqlBookingRepository, SqlCatalogRepository, SqlConversationRepository,
        SqlCustomerRepository, SqlOrderRepository, SqlTaskLogRepository,
    };
    use concierge_db::{connect_with_settings, migrations, DbPool};

    use crate::executor::{ExecutorContext, ToolExecutor};
    use crate::identity::IdentityResolver;
    use crate::llm::{AssistantTurn, ChatMessage, FunctionCall, LlmClient, LlmError, ToolCallRequest};

    use super::AgentRuntime;

    /// Scripted model: replays a fixed sequence of turns, then keeps
    /// requesting tools forever so the round cap is exercised.
    struct ScriptedLlm {
        turns: Vec<AssistantTurn>,
        calls: AtomicUsize,
    }

    impl ScriptedLlm {
        fn new(turns: Vec<AssistantTurn>) -> Self {
            Self { turns, calls: AtomicUsize::new(0) }
        }

        fn rounds_used(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl LlmClient for ScriptedLlm {
        async fn chat(
            &self,
            _messages: &[ChatMessage],
            _tools: &[Value],
        ) -> Result<AssistantTurn, LlmError> {
            let index = self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.turns.get(index).cloned().unwrap_or_else(|| AssistantTurn {
                text: Some("still working".to_string()),
                tool_calls: vec![tool_call("loop", "check_availability", "{}")],
            }))
        }

        async fn summarize(&self, _prompt: &str) -> Result<String, LlmError> {
            Ok("summary".to_string())
        }
    }

    fn tool_call(id: &str, name: &str, arguments: &str) -> ToolCallRequest {
        ToolCallRequest {
            id: id.to_string(),
            call_type: "function".to_string(),
            function: FunctionCall { name: name.to_string(), arguments: arguments.to_string() },
        }
    }

    async fn seeded_pool() -> DbPool {
        let pool = connect_with_settings("sqlite::memory:", 1, 5).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrate");
        sqlx::query("INSERT INTO business (id, name) VALUES ('biz-1', 'Fade Factory')")
            .execute(&pool)
            .await
            .expect("seed business");
        sqlx::query("INSERT INTO conversation (id, business_id) VALUES ('conv-1', 'biz-1')")
            .execute(&pool)
            .await
            .expect("seed conversation");
        pool
    }

    fn runtime_with(pool: &DbPool, llm: Arc<ScriptedLlm>) -> AgentRuntime {
        let executor = ToolExecutor::new(
            SqlBookingRepository::new(pool.clone()),
            SqlOrderRepository::new(pool.clone()),
            SqlCustomerRepository::new(pool.clone()),
            SqlCatalogRepository::new(pool.clone()),
            IdentityResolver::new(
                SqlCustomerRepository::new(pool.clone()),
                SqlConversationRepository::new(pool.clone()),
            ),
            AgentConfig::default(),
        );
        AgentRuntime::new(
            llm,
            executor,
            SqlTaskLogRepository::new(pool.clone()),
            AgentConfig::default(),
        )
    }

    fn conversation() -> Conversation {
        Conversation {
            id: ConversationId("conv-1".to_string()),
            business_id: BusinessId("biz-1".to_string()),
            visitor_name: None,
            visitor_email: None,
            visitor_phone: None,
        }
    }

    #[tokio::test]
    async fn plain_text_turn_is_final() {
        let pool = seeded_pool().await;
        let llm = Arc::new(ScriptedLlm::new(vec![AssistantTurn {
            text: Some("We open at 9am.".to_string()),
            tool_calls: Vec::new(),
        }]));
        let runtime = runtime_with(&pool, llm.clone());

        let outcome = runtime
            .run(&conversation(), vec![ChatMessage::user("When do you open?")], ExecutorContext::default())
            .await
            .expect("run");

        assert_eq!(outcome.reply, "We open at 9am.");
        assert!(outcome.actions.is_empty());
        assert_eq!(llm.rounds_used(), 1);

        pool.close().await;
    }

    #[tokio::test]
    async fn loop_never_exceeds_the_round_cap() {
        let pool = seeded_pool().await;
        // Every scripted turn requests another tool; the cap must cut it off.
        let llm = Arc::new(ScriptedLlm::new(Vec::new()));
        let runtime = runtime_with(&pool, llm.clone());

        let outcome = runtime
            .run(&conversation(), vec![ChatMessage::user("keep going")], ExecutorContext::default())
            .await
            .expect("run");

        assert_eq!(llm.rounds_used(), 5);
        // Force-termination keeps the best inline text candidate.
        assert_eq!(outcome.reply, "still working");

        pool.close().await;
    }

    #[tokio::test]
    async fn unknown_tools_are_rejected_and_the_loop_continues() {
        let pool = seeded_pool().await;
        let llm = Arc::new(ScriptedLlm::new(vec![
            AssistantTurn {
                text: None,
                tool_calls: vec![tool_call("call_1", "drop_all_tables", "{}")],
            },
            AssistantTurn {
                text: Some("Sorry, I can't do that.".to_string()),
                tool_calls: Vec::new(),
            },
        ]));
        let runtime = runtime_with(&pool, llm.clone());

        let outcome = runtime
            .run(&conversation(), vec![ChatMessage::user("do something odd")], ExecutorContext::default())
            .await
            .expect("run");

        assert_eq!(outcome.reply, "Sorry, I can't do that.");
        // Undeclared names never reach an executor, so no action is recorded.
        assert!(outcome.actions.is_empty());

        // The rejection still lands in the audit trail.
        let (action_type, status): (String, String) = sqlx::query_as(
            "SELECT action_type, status FROM task_log WHERE conversation_id = 'conv-1'",
        )
        .fetch_one(&pool)
        .await
        .expect("task log row");
        assert_eq!(action_type, "drop_all_tables");
        assert_eq!(status, "failed");

        pool.close().await;
    }

    #[tokio::test]
    async fn malformed_arguments_feed_a_structured_failure_back() {
        let pool = seeded_pool().await;
        let llm = Arc::new(ScriptedLlm::new(vec![
            AssistantTurn {
                text: None,
                tool_calls: vec![tool_call("call_1", "check_availability", "{not json")],
            },
            AssistantTurn {
                text: Some("Which date did you mean?".to_string()),
                tool_calls: Vec::new(),
            },
        ]));
        let runtime = runtime_with(&pool, llm.clone());

        let outcome = runtime
            .run(&conversation(), vec![ChatMessage::user("book me in")], ExecutorContext::default())
            .await
            .expect("run");

        // The executor saw empty args, failed structurally, and the model got
        // another round to recover.
        assert_eq!(outcome.reply, "Which date did you mean?");
        assert_eq!(outcome.actions.len(), 1);
        assert!(!outcome.actions[0].success);

        pool.close().await;
    }
}
