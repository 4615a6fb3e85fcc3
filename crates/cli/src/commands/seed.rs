use crate::commands::{with_migrated_pool, CommandResult};
use signoff_db::{FlowSeedInfo, SeedDataset};

pub fn run() -> CommandResult {
    let result = with_migrated_pool("seed", |pool, _config| async move {
        let seed_result = SeedDataset::load(&pool)
            .await
            .map_err(|error| ("seed_execution", error.to_string(), 6u8))?;

        let verification = SeedDataset::verify(&pool)
            .await
            .map_err(|error| ("seed_verification", error.to_string(), 7u8))?;

        if !verification.all_present {
            let failed_checks = verification
                .checks
                .iter()
                .filter_map(|(check, passed)| (!passed).then_some(*check))
                .collect::<Vec<_>>();
            return Err(("seed_verification", verification_message(&failed_checks), 7u8));
        }

        Ok(seed_result.flows_seeded)
    });

    match result {
        Ok(flows) => CommandResult::success("seed", seed_message(&flows)),
        Err(failure) => failure,
    }
}

fn seed_message(flows: &[FlowSeedInfo]) -> String {
    let flow_descriptions: Vec<String> = flows
        .iter()
        .map(|flow| {
            format!(
                "  - {} [{}]: {} ({})",
                flow.code, flow.business_type, flow.document_id, flow.description
            )
        })
        .collect();
    format!(
        "demo dataset loaded with {} default approval flows:\n{}",
        flows.len(),
        flow_descriptions.join("\n")
    )
}

fn verification_message(failed_checks: &[&str]) -> String {
    if failed_checks.is_empty() {
        "Some seed data failed to load".to_string()
    } else {
        format!("Seed verification failed for checks: {}", failed_checks.join(", "))
    }
}
