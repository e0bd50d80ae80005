use sqlx::{sqlite::SqliteRow, Row};

use concierge_core::{
    BusinessId, Conversation, ConversationId, Message, MessageId, MessageRole,
};

use super::{parse_timestamp, RepositoryError};
use crate::DbPool;

pub struct SqlConversationRepository {
    pool: DbPool,
}

impl SqlConversationRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn find_by_id(
        &self,
        id: &ConversationId,
    ) -> Result<Option<Conversation>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, business_id, visitor_name, visitor_email, visitor_phone
             FROM conversation
             WHERE id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(conversation_from_row))
    }

    /// Last `limit` stored messages, returned oldest first.
    pub async fn recent_messages(
        &self,
        conversation_id: &ConversationId,
        limit: u32,
    ) -> Result<Vec<Message>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, conversation_id, role, content, created_at
             FROM message
             WHERE conversation_id = ?
             ORDER BY created_at DESC, id DESC
             LIMIT ?",
        )
        .bind(&conversation_id.0)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        let mut messages =
            rows.into_iter().map(message_from_row).collect::<Result<Vec<_>, _>>()?;
        messages.reverse();
        Ok(messages)
    }

    pub async fn append_message(&self, message: &Message) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO message (id, conversation_id, role, content, created_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&message.id.0)
        .bind(&message.conversation_id.0)
        .bind(message.role.as_str())
        .bind(&message.content)
        .bind(message.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Fill empty denormalized visitor identity fields. Existing non-empty
    /// values are never overwritten, so repeated calls are idempotent.
    pub async fn backfill_visitor_identity(
        &self,
        conversation_id: &ConversationId,
        name: Option<&str>,
        email: Option<&str>,
        phone: Option<&str>,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            "UPDATE conversation SET
                visitor_name = CASE
                    WHEN visitor_name IS NULL OR TRIM(visitor_name) = ''
                    THEN COALESCE(?, visitor_name) ELSE visitor_name END,
                visitor_email = CASE
                    WHEN visitor_email IS NULL OR TRIM(visitor_email) = ''
                    THEN COALESCE(?, visitor_email) ELSE visitor_email END,
                visitor_phone = CASE
                    WHEN visitor_phone IS NULL OR TRIM(visitor_phone) = ''
                    THEN COALESCE(?, visitor_phone) ELSE visitor_phone END
             WHERE id = ?",
        )
        .bind(name)
        .bind(email)
        .bind(phone)
        .bind(&conversation_id.0)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn conversation_from_row(row: SqliteRow) -> Conversation {
    Conversation {
        id: ConversationId(row.get("id")),
        business_id: BusinessId(row.get("business_id")),
        visitor_name: row.get("visitor_name"),
        visitor_email: row.get("visitor_email"),
        visitor_phone: row.get("visitor_phone"),
    }
}

fn message_from_row(row: SqliteRow) -> Result<Message, RepositoryError> {
    let role_raw = row.try_get::<String, _>("role")?;
    let role = MessageRole::parse(&role_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown message role `{role_raw}`")))?;

    Ok(Message {
        id: MessageId(row.try_get("id")?),
        conversation_id: ConversationId(row.try_get("conversation_id")?),
        role,
        content: row.try_get("content")?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
    })
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use uuid::Uuid;

    use concierge_core::{ConversationId, Message, MessageId, MessageRole};

    use super::SqlConversationRepository;
    use crate::{connect_with_settings, migrations, DbPool};

    async fn pool_with_conversation() -> (DbPool, ConversationId) {
        let pool = connect_with_settings("sqlite::memory:", 1, 5).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrate");

        sqlx::query("INSERT INTO business (id, name) VALUES ('biz-1', 'Fade Factory')")
            .execute(&pool)
            .await
            .expect("seed business");
        sqlx::query(
            "INSERT INTO conversation (id, business_id, visitor_name) VALUES ('conv-1', 'biz-1', 'Guest')",
        )
        .execute(&pool)
        .await
        .expect("seed conversation");

        (pool, ConversationId("conv-1".to_string()))
    }

    fn visitor_message(conversation_id: &ConversationId, content: &str) -> Message {
        Message {
            id: MessageId(Uuid::new_v4().to_string()),
            conversation_id: conversation_id.clone(),
            role: MessageRole::Visitor,
            content: content.to_string(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn recent_messages_are_capped_and_oldest_first() {
        let (pool, conversation_id) = pool_with_conversation().await;
        let repo = SqlConversationRepository::new(pool.clone());

        for index in 0..25 {
            let mut message = visitor_message(&conversation_id, &format!("message {index}"));
            message.created_at = Utc::now() + chrono::Duration::seconds(index);
            repo.append_message(&message).await.expect("append");
        }

        let window = repo.recent_messages(&conversation_id, 20).await.expect("window");
        assert_eq!(window.len(), 20);
        assert_eq!(window.first().expect("first").content, "message 5");
        assert_eq!(window.last().expect("last").content, "message 24");

        pool.close().await;
    }

    #[tokio::test]
    async fn backfill_only_fills_empty_fields() {
        let (pool, conversation_id) = pool_with_conversation().await;
        let repo = SqlConversationRepository::new(pool.clone());

        repo.backfill_visitor_identity(
            &conversation_id,
            Some("Maya Rodriguez"),
            Some("maya@example.com"),
            None,
        )
        .await
        .expect("backfill");

        let conversation =
            repo.find_by_id(&conversation_id).await.expect("find").expect("present");
        // visitor_name already held "Guest" and must survive.
        assert_eq!(conversation.visitor_name.as_deref(), Some("Guest"));
        assert_eq!(conversation.visitor_email.as_deref(), Some("maya@example.com"));
        assert_eq!(conversation.visitor_phone, None);

        repo.backfill_visitor_identity(
            &conversation_id,
            None,
            Some("other@example.com"),
            Some("555-0101"),
        )
        .await
        .expect("second backfill");

        let conversation =
            repo.find_by_id(&conversation_id).await.expect("find").expect("present");
        assert_eq!(conversation.visitor_email.as_deref(), Some("maya@example.com"));
        assert_eq!(conversation.visitor_phone.as_deref(), Some("555-0101"));

        pool.close().await;
    }
}
