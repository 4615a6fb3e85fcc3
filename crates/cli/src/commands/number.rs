use std::sync::Arc;

use chrono::NaiveDate;
use signoff_db::repositories::SqlSequenceRepository;
use signoff_db::SequenceGenerator;

use crate::commands::{with_migrated_pool, CommandResult};

pub fn run(prefix: &str, date: Option<&str>) -> CommandResult {
    let date = match date.map(|raw| (raw, NaiveDate::parse_from_str(raw, "%Y-%m-%d"))) {
        None => None,
        Some((_, Ok(parsed))) => Some(parsed),
        Some((raw, Err(error))) => {
            return CommandResult::failure(
                "number",
                "invalid_argument",
                format!("date `{raw}` is not YYYY-MM-DD: {error}"),
                2,
            );
        }
    };

    let result = with_migrated_pool("number", |pool, config| async move {
        let generator = SequenceGenerator::from_config(
            Arc::new(SqlSequenceRepository::new(pool)),
            &config.workflow,
        )
        .map_err(|error| ("config_validation", error.to_string(), 2u8))?;

        let issued = match date {
            Some(date) => generator.next_on(prefix, date).await,
            None => generator.next(prefix).await,
        };
        let number = issued.map_err(|error| ("sequence", error.to_string(), 6u8))?;
        let data = serde_json::to_value(&number)
            .map_err(|error| ("serialization", error.to_string(), 6u8))?;
        Ok((number.value, data))
    });

    match result {
        Ok((value, data)) => CommandResult::success_with_data("number", value, Some(data)),
        Err(failure) => failure,
    }
}
