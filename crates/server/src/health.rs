use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use concierge_db::DbPool;
use serde::Serialize;
use tracing::{error, info};

/// Liveness report served on the side port. The only dependency probed is
/// SQLite; the model endpoint is deliberately left out so a slow upstream
/// never flips orchestration restarts.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub database: ComponentHealth,
    pub checked_at: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ComponentHealth {
    pub ok: bool,
    pub detail: String,
}

pub fn router(db_pool: DbPool) -> Router {
    Router::new().route("/health", get(report)).with_state(db_pool)
}

/// Bind the health listener and serve it on a background task.
pub async fn spawn(bind_address: &str, port: u16, db_pool: DbPool) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind((bind_address, port)).await?;

    info!(
        event_name = "server.health_listener_started",
        port,
        "health listener bound"
    );

    tokio::spawn(async move {
        if let Err(error) = axum::serve(listener, router(db_pool)).await {
            error!(
                event_name = "server.health_listener_failed",
                error = %error,
                "health listener exited"
            );
        }
    });

    Ok(())
}

pub async fn report(State(pool): State<DbPool>) -> (StatusCode, Json<HealthReport>) {
    let database = probe_database(&pool).await;

    let (code, status) = if database.ok {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "unavailable")
    };

    (code, Json(HealthReport { status, database, checked_at: Utc::now().to_rfc3339() }))
}

async fn probe_database(pool: &DbPool) -> ComponentHealth {
    match sqlx::query_scalar::<_, i64>("SELECT 1").fetch_one(pool).await {
        Ok(_) => ComponentHealth { ok: true, detail: "reachable".to_string() },
        Err(error) => ComponentHealth { ok: false, detail: error.to_string() },
    }
}
