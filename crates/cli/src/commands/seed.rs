use crate::commands::{command_env, CommandResult, StepFailure};
use concierge_db::{connect_with_settings, migrations, DemoSeedDataset};

pub fn run() -> CommandResult {
    let env = match command_env("seed") {
        Ok(env) => env,
        Err(result) => return result,
    };
    let db = &env.config.database;

    let result = env.runtime.block_on(async {
        let pool = connect_with_settings(&db.url, db.max_connections, db.timeout_secs)
            .await
            .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;

        migrations::run_pending(&pool)
            .await
            .map_err(|error| ("migration", error.to_string(), 5u8))?;

        let seed_result = DemoSeedDataset::load(&pool)
            .await
            .map_err(|error| ("seed_execution", error.to_string(), 5u8))?;

        let verification = DemoSeedDataset::verify(&pool)
            .await
            .map_err(|error| ("seed_verification", error.to_string(), 6u8))?;

        let run_result: Result<SeedOutput, StepFailure> = if !verification.all_present {
            let failed_checks = verification
                .checks
                .iter()
                .filter_map(|(check, passed)| (!passed).then_some(*check))
                .collect::<Vec<_>>();
            let message = if failed_checks.is_empty() {
                "Some seed data failed to load".to_string()
            } else {
                format!("Seed verification failed for checks: {}", failed_checks.join(", "))
            };
            Err(("seed_verification", message, 6u8))
        } else {
            Ok(SeedOutput {
                business_id: seed_result.business_id,
                services: seed_result.services,
                products: seed_result.products,
                slots: seed_result.slots,
            })
        };

        pool.close().await;
        run_result
    });

    match result {
        Ok(output) => {
            let message = format!(
                "demo dataset loaded for business {}: {} services, {} products, {} booking slots",
                output.business_id, output.services, output.products, output.slots
            );
            CommandResult::success("seed", message)
        }
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("seed", error_class, message, exit_code)
        }
    }
}

struct SeedOutput {
    business_id: &'static str,
    services: usize,
    products: usize,
    slots: usize,
}

#[cfg(test)]
mod tests {
    #[test]
    fn verification_error_message_targets_failed_checks() {
        let checks = [("business", true), ("booking-slots", false), ("slot-invariants", false)];

        let failed_checks = checks
            .iter()
            .filter_map(|(check, passed)| (!passed).then_some(*check))
            .collect::<Vec<_>>();

        let message = if failed_checks.is_empty() {
            "Some seed data failed to load".to_string()
        } else {
            format!("Seed verification failed for checks: {}", failed_checks.join(", "))
        };

        assert_eq!(
            message,
            "Seed verification failed for checks: booking-slots, slot-invariants"
        );
    }
}
