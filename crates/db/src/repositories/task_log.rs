use chrono::Utc;
use sqlx::{sqlite::SqliteRow, Row};

use concierge_core::{
    BusinessId, ConversationId, TaskLogEntry, TaskLogId, TaskStatus,
};

use super::{parse_timestamp, RepositoryError};
use crate::DbPool;

pub struct SqlTaskLogRepository {
    pool: DbPool,
}

impl SqlTaskLogRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn insert(&self, entry: &TaskLogEntry) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO task_log (id, business_id, conversation_id, action_type,
                                   payload_json, status, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&entry.id.0)
        .bind(&entry.business_id.0)
        .bind(entry.conversation_id.as_ref().map(|id| id.0.as_str()))
        .bind(&entry.action_type)
        .bind(&entry.payload_json)
        .bind(entry.status.as_str())
        .bind(entry.created_at.to_rfc3339())
        .bind(entry.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Record the outcome of a previously logged dispatch.
    pub async fn mark_outcome(
        &self,
        id: &TaskLogId,
        status: TaskStatus,
        payload_json: &str,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            "UPDATE task_log SET status = ?, payload_json = ?, updated_at = ? WHERE id = ?",
        )
        .bind(status.as_str())
        .bind(payload_json)
        .bind(Utc::now().to_rfc3339())
        .bind(&id.0)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn list_for_conversation(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Vec<TaskLogEntry>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, business_id, conversation_id, action_type, payload_json, status,
                    created_at, updated_at
             FROM task_log
             WHERE conversation_id = ?
             ORDER BY created_at ASC",
        )
        .bind(&conversation_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(entry_from_row).collect()
    }
}

fn entry_from_row(row: SqliteRow) -> Result<TaskLogEntry, RepositoryError> {
    let status_raw = row.try_get::<String, _>("status")?;
    let status = TaskStatus::parse(&status_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown task status `{status_raw}`")))?;

    Ok(TaskLogEntry {
        id: TaskLogId(row.try_get("id")?),
        business_id: BusinessId(row.try_get("business_id")?),
        conversation_id: row.try_get::<Option<String>, _>("conversation_id")?.map(ConversationId),
        action_type: row.try_get("action_type")?,
        payload_json: row.try_get("payload_json")?,
        status,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use concierge_core::{
        BusinessId, ConversationId, TaskLogEntry, TaskLogId, TaskStatus,
    };

    use super::SqlTaskLogRepository;
    use crate::{connect_with_settings, migrations};

    #[tokio::test]
    async fn outcome_transitions_pending_to_failed() {
        let pool = connect_with_settings("sqlite::memory:", 1, 5).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrate");
        sqlx::query("INSERT INTO business (id, name) VALUES ('biz-1', 'Fade Factory')")
            .execute(&pool)
            .await
            .expect("seed business");
        sqlx::query(
            "INSERT INTO conversation (id, business_id) VALUES ('conv-1', 'biz-1')",
        )
        .execute(&pool)
        .await
        .expect("seed conversation");

        let repo = SqlTaskLogRepository::new(pool.clone());
        let now = Utc::now();
        let entry = TaskLogEntry {
            id: TaskLogId("task-1".to_string()),
            business_id: BusinessId("biz-1".to_string()),
            conversation_id: Some(ConversationId("conv-1".to_string())),
            action_type: "create_booking".to_string(),
            payload_json: "{}".to_string(),
            status: TaskStatus::Pending,
            created_at: now,
            updated_at: now,
        };
        repo.insert(&entry).await.expect("insert");

        repo.mark_outcome(
            &entry.id,
            TaskStatus::Failed,
            r#"{"success":false,"error":"slot is full"}"#,
        )
        .await
        .expect("mark");

        let logged = repo
            .list_for_conversation(&ConversationId("conv-1".to_string()))
            .await
            .expect("list");
        assert_eq!(logged.len(), 1);
        assert_eq!(logged[0].status, TaskStatus::Failed);
        assert!(logged[0].payload_json.contains("slot is full"));

        pool.close().await;
    }
}
