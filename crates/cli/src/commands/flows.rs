use signoff_core::domain::business::BusinessType;
use signoff_db::repositories::{FlowRepository, SqlFlowRepository};

use crate::commands::{with_migrated_pool, CommandResult};

pub fn run(business_type: Option<&str>) -> CommandResult {
    let filter = match business_type.map(|value| (value, BusinessType::parse(value))) {
        None => None,
        Some((_, Some(parsed))) => Some(parsed),
        Some((raw, None)) => {
            return CommandResult::failure(
                "flows",
                "invalid_argument",
                format!("unknown business type `{raw}`"),
                2,
            );
        }
    };

    let result = with_migrated_pool("flows", |pool, _config| async move {
        let flows = SqlFlowRepository::new(pool)
            .list(filter)
            .await
            .map_err(|error| ("flow_query", error.to_string(), 6u8))?;
        let data = serde_json::to_value(&flows)
            .map_err(|error| ("serialization", error.to_string(), 6u8))?;
        Ok((flows.len(), data))
    });

    match result {
        Ok((count, data)) => {
            let scope =
                filter.map(|business_type| format!(" for {business_type}")).unwrap_or_default();
            CommandResult::success_with_data("flows", format!("{count} flows{scope}"), Some(data))
        }
        Err(failure) => failure,
    }
}
