use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use signoff_core::config::{AppConfig, LoadOptions};
use toml::Value;

/// `(key path, env override)` for every reported setting, in display order.
const FIELDS: &[(&str, &str)] = &[
    ("database.url", "SIGNOFF_DATABASE_URL"),
    ("database.max_connections", "SIGNOFF_DATABASE_MAX_CONNECTIONS"),
    ("database.timeout_secs", "SIGNOFF_DATABASE_TIMEOUT_SECS"),
    ("server.bind_address", "SIGNOFF_SERVER_BIND_ADDRESS"),
    ("server.port", "SIGNOFF_SERVER_PORT"),
    ("server.graceful_shutdown_secs", "SIGNOFF_SERVER_GRACEFUL_SHUTDOWN_SECS"),
    ("logging.level", "SIGNOFF_LOGGING_LEVEL"),
    ("logging.format", "SIGNOFF_LOGGING_FORMAT"),
    ("workflow.sequence_pad_length", "SIGNOFF_WORKFLOW_SEQUENCE_PAD_LENGTH"),
    ("workflow.sequence_count_fallback", "SIGNOFF_WORKFLOW_SEQUENCE_COUNT_FALLBACK"),
    ("workflow.guard_max_retries", "SIGNOFF_WORKFLOW_GUARD_MAX_RETRIES"),
    ("workflow.default_low_stock_threshold", "SIGNOFF_WORKFLOW_DEFAULT_LOW_STOCK_THRESHOLD"),
];

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for (key_path, env_key) in FIELDS {
        let value = effective_value(&config, key_path);
        let source =
            field_source(key_path, env_key, config_file_doc.as_ref(), config_file_path.as_deref());
        lines.push(render_line(key_path, &value, source));
    }

    lines.join("\n")
}

fn effective_value(config: &AppConfig, key_path: &str) -> String {
    match key_path {
        "database.url" => config.database.url.clone(),
        "database.max_connections" => config.database.max_connections.to_string(),
        "database.timeout_secs" => config.database.timeout_secs.to_string(),
        "server.bind_address" => config.server.bind_address.clone(),
        "server.port" => config.server.port.to_string(),
        "server.graceful_shutdown_secs" => config.server.graceful_shutdown_secs.to_string(),
        "logging.level" => config.logging.level.clone(),
        "logging.format" => format!("{:?}", config.logging.format),
        "workflow.sequence_pad_length" => config.workflow.sequence_pad_length.to_string(),
        "workflow.sequence_count_fallback" => config.workflow.sequence_count_fallback.to_string(),
        "workflow.guard_max_retries" => config.workflow.guard_max_retries.to_string(),
        "workflow.default_low_stock_threshold" => {
            config.workflow.default_low_stock_threshold.to_string()
        }
        _ => "<unknown>".to_string(),
    }
}

fn detect_config_path() -> Option<PathBuf> {
    let root = PathBuf::from("signoff.toml");
    if root.exists() {
        return Some(root);
    }

    let nested = PathBuf::from("config/signoff.toml");
    if nested.exists() {
        return Some(nested);
    }

    None
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_key: &str,
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if env::var_os(env_key).is_some() {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

#[cfg(test)]
mod tests {
    use super::{contains_path, field_source};

    #[test]
    fn nested_keys_are_found_in_file_documents() {
        let doc: toml::Value = "[workflow]\nguard_max_retries = 5\n".parse().expect("toml");
        assert!(contains_path(&doc, "workflow.guard_max_retries"));
        assert!(!contains_path(&doc, "workflow.sequence_pad_length"));
        assert!(!contains_path(&doc, "server.port"));
    }

    #[test]
    fn file_source_names_the_file() {
        let doc: toml::Value = "[server]\nport = 9000\n".parse().expect("toml");
        let source = field_source(
            "server.port",
            "SIGNOFF_TEST_UNSET_PORT",
            Some(&doc),
            Some(std::path::Path::new("config/signoff.toml")),
        );
        assert_eq!(source, "file (config/signoff.toml)");
    }
}
