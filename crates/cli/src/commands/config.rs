use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use concierge_core::config::{AppConfig, LoadOptions};
use toml::Value;

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let source = |key_path: &str, env_key: Option<&str>| {
        field_source(key_path, env_key, config_file_doc.as_ref(), config_file_path.as_deref())
    };

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];

    lines.push(render_line(
        "database.url",
        &config.database.url,
        source("database.url", Some("CONCIERGE_DATABASE_URL")),
    ));
    lines.push(render_line(
        "database.max_connections",
        &config.database.max_connections.to_string(),
        source("database.max_connections", Some("CONCIERGE_DATABASE_MAX_CONNECTIONS")),
    ));
    lines.push(render_line(
        "database.timeout_secs",
        &config.database.timeout_secs.to_string(),
        source("database.timeout_secs", Some("CONCIERGE_DATABASE_TIMEOUT_SECS")),
    ));

    lines.push(render_line(
        "llm.base_url",
        &config.llm.base_url,
        source("llm.base_url", Some("CONCIERGE_LLM_BASE_URL")),
    ));
    lines.push(render_line(
        "llm.model",
        &config.llm.model,
        source("llm.model", Some("CONCIERGE_LLM_MODEL")),
    ));
    lines.push(render_line(
        "llm.summary_model",
        config.llm.summary_model.as_deref().unwrap_or("<unset>"),
        source("llm.summary_model", Some("CONCIERGE_LLM_SUMMARY_MODEL")),
    ));
    let llm_api_key = if config.llm.api_key.is_some() { "<redacted>" } else { "<unset>" };
    lines.push(render_line(
        "llm.api_key",
        llm_api_key,
        source("llm.api_key", Some("CONCIERGE_LLM_API_KEY")),
    ));
    lines.push(render_line(
        "llm.timeout_secs",
        &config.llm.timeout_secs.to_string(),
        source("llm.timeout_secs", Some("CONCIERGE_LLM_TIMEOUT_SECS")),
    ));

    lines.push(render_line(
        "server.bind_address",
        &config.server.bind_address,
        source("server.bind_address", Some("CONCIERGE_SERVER_BIND_ADDRESS")),
    ));
    lines.push(render_line(
        "server.port",
        &config.server.port.to_string(),
        source("server.port", Some("CONCIERGE_SERVER_PORT")),
    ));
    lines.push(render_line(
        "server.health_check_port",
        &config.server.health_check_port.to_string(),
        source("server.health_check_port", Some("CONCIERGE_SERVER_HEALTH_CHECK_PORT")),
    ));
    lines.push(render_line(
        "server.graceful_shutdown_secs",
        &config.server.graceful_shutdown_secs.to_string(),
        source("server.graceful_shutdown_secs", None),
    ));

    lines.push(render_line(
        "agent.max_model_rounds",
        &config.agent.max_model_rounds.to_string(),
        source("agent.max_model_rounds", None),
    ));
    lines.push(render_line(
        "agent.dedup_window_minutes",
        &config.agent.dedup_window_minutes.to_string(),
        source("agent.dedup_window_minutes", Some("CONCIERGE_AGENT_DEDUP_WINDOW_MINUTES")),
    ));

    lines.push(render_line(
        "logging.level",
        &config.logging.level,
        source("logging.level", Some("CONCIERGE_LOGGING_LEVEL")),
    ));
    lines.push(render_line(
        "logging.format",
        &format!("{:?}", config.logging.format),
        source("logging.format", Some("CONCIERGE_LOGGING_FORMAT")),
    ));

    lines.join("\n")
}

fn detect_config_path() -> Option<PathBuf> {
    let root = PathBuf::from("concierge.toml");
    if root.exists() {
        return Some(root);
    }

    let nested = PathBuf::from("config/concierge.toml");
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
    env_key: Option<&str>,
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_key {
        if env::var_os(env_key).is_some() {
            return format!("env ({env_key})");
        }
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
