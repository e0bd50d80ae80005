use crate::commands::{command_env, CommandResult, StepFailure};
use concierge_db::{connect_with_settings, migrations};

pub fn run() -> CommandResult {
    let env = match command_env("migrate") {
        Ok(env) => env,
        Err(result) => return result,
    };
    let db = &env.config.database;

    let outcome = env.runtime.block_on(async {
        let pool = connect_with_settings(&db.url, db.max_connections, db.timeout_secs)
            .await
            .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;
        migrations::run_pending(&pool)
            .await
            .map_err(|error| ("migration", error.to_string(), 5u8))?;
        pool.close().await;
        Ok::<usize, StepFailure>(migrations::MIGRATOR.migrations.len())
    });

    match outcome {
        Ok(embedded) => CommandResult::success(
            "migrate",
            format!("schema is current ({embedded} embedded migrations)"),
        ),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("migrate", error_class, message, exit_code)
        }
    }
}
