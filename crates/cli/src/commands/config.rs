use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::ExposeSecret;
use toml::Value;
use tutorbot_core::config::{AppConfig, LoadOptions};

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let api_key = config
        .llm
        .api_key
        .as_ref()
        .map(|key| redact_secret(key.expose_secret()))
        .unwrap_or_else(|| "<unset>".to_string());
    let api_key_env: Vec<&str> = std::iter::once("TUTORBOT_LLM_API_KEY")
        .chain(config.llm.provider.api_key_env_var())
        .collect();

    let fields: Vec<(&str, String, Vec<&str>)> = vec![
        ("chat.transport", config.chat.transport.as_str().to_string(), vec!["TUTORBOT_CHAT_TRANSPORT"]),
        (
            "chat.reconnect_max_retries",
            config.chat.reconnect_max_retries.to_string(),
            vec!["TUTORBOT_CHAT_RECONNECT_MAX_RETRIES"],
        ),
        (
            "llm.provider",
            config.llm.provider.as_str().to_string(),
            vec!["TUTORBOT_LLM_PROVIDER", "AI_MODEL_PROVIDER"],
        ),
        ("llm.api_key", api_key, api_key_env),
        ("llm.base_url", config.llm.effective_base_url().to_string(), vec!["TUTORBOT_LLM_BASE_URL"]),
        ("llm.model", config.llm.effective_model().to_string(), vec!["TUTORBOT_LLM_MODEL"]),
        ("llm.timeout_secs", config.llm.timeout_secs.to_string(), vec!["TUTORBOT_LLM_TIMEOUT_SECS"]),
        ("llm.temperature", config.llm.temperature.to_string(), vec!["TUTORBOT_LLM_TEMPERATURE"]),
        ("llm.max_tokens", config.llm.max_tokens.to_string(), vec!["TUTORBOT_LLM_MAX_TOKENS"]),
        ("ocr.enabled", config.ocr.enabled.to_string(), vec!["TUTORBOT_OCR_ENABLED"]),
        ("ocr.tesseract_path", config.ocr.tesseract_path.clone(), vec!["TUTORBOT_OCR_TESSERACT_PATH"]),
        ("ocr.language", config.ocr.language.clone(), vec!["TUTORBOT_OCR_LANGUAGE"]),
        (
            "governor.max_requests",
            config.governor.max_requests.to_string(),
            vec!["TUTORBOT_GOVERNOR_MAX_REQUESTS", "RATE_LIMIT_REQUESTS"],
        ),
        (
            "governor.window_seconds",
            config.governor.window_seconds.to_string(),
            vec!["TUTORBOT_GOVERNOR_WINDOW_SECONDS", "RATE_LIMIT_WINDOW"],
        ),
        (
            "governor.sweep_interval_secs",
            config.governor.sweep_interval_secs.to_string(),
            vec!["TUTORBOT_GOVERNOR_SWEEP_INTERVAL_SECS"],
        ),
        (
            "guardrails.enabled",
            config.guardrails.enabled.to_string(),
            vec!["TUTORBOT_GUARDRAILS_ENABLED", "ENABLE_CONTENT_FILTER"],
        ),
        (
            "guardrails.blocked_keywords",
            config.guardrails.blocked_keywords.join(","),
            vec!["TUTORBOT_GUARDRAILS_BLOCKED_KEYWORDS", "BLOCKED_KEYWORDS"],
        ),
        (
            "conversation_log.enabled",
            config.conversation_log.enabled.to_string(),
            vec!["TUTORBOT_CONVERSATION_LOG_ENABLED"],
        ),
        (
            "conversation_log.path",
            config.conversation_log.path.display().to_string(),
            vec!["TUTORBOT_CONVERSATION_LOG_PATH"],
        ),
        (
            "conversation_log.retention_days",
            config.conversation_log.retention_days.to_string(),
            vec!["TUTORBOT_CONVERSATION_LOG_RETENTION_DAYS"],
        ),
        ("server.bind_address", config.server.bind_address.clone(), vec!["TUTORBOT_SERVER_BIND_ADDRESS"]),
        (
            "server.health_check_port",
            config.server.health_check_port.to_string(),
            vec!["TUTORBOT_SERVER_HEALTH_CHECK_PORT"],
        ),
        (
            "logging.level",
            config.logging.level.clone(),
            vec!["TUTORBOT_LOGGING_LEVEL", "TUTORBOT_LOG_LEVEL"],
        ),
        (
            "logging.format",
            format!("{:?}", config.logging.format).to_lowercase(),
            vec!["TUTORBOT_LOGGING_FORMAT", "TUTORBOT_LOG_FORMAT"],
        ),
    ];

    let mut lines =
        vec!["effective config (source precedence: env > file > default):".to_string()];
    for (key, value, env_keys) in &fields {
        let source = field_source(
            key,
            env_keys.as_slice(),
            config_file_doc.as_ref(),
            config_file_path.as_deref(),
        );
        lines.push(render_line(key, value, source));
    }

    lines.join("\n")
}

fn detect_config_path() -> Option<PathBuf> {
    ["tutorbot.toml", "config/tutorbot.toml"].into_iter().map(PathBuf::from).find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_keys: &[&str],
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_keys.iter().find(|key| env::var_os(key).is_some()) {
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

/// Keeps a recognisable key prefix such as `sk-` and hides the rest.
fn redact_secret(secret: &str) -> String {
    let trimmed = secret.trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }

    if let Some((prefix, _)) = trimmed.split_once('-') {
        return format!("{prefix}-***");
    }

    "<redacted>".to_string()
}
