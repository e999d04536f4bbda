use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::governor::GovernorConfig;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub chat: ChatConfig,
    pub llm: LlmConfig,
    pub ocr: OcrConfig,
    pub governor: GovernorSettings,
    pub guardrails: GuardrailsConfig,
    pub conversation_log: ConversationLogConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct ChatConfig {
    pub transport: ChatTransportKind,
    pub reconnect_max_retries: u32,
}

#[derive(Clone, Debug)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub api_key: Option<SecretString>,
    pub base_url: Option<String>,
    pub model: Option<String>,
    pub timeout_secs: u64,
    pub temperature: f32,
    pub max_tokens: u32,
}

#[derive(Clone, Debug)]
pub struct OcrConfig {
    pub enabled: bool,
    pub tesseract_path: String,
    pub language: String,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct GovernorSettings {
    pub max_requests: u32,
    pub window_seconds: u64,
    pub sweep_interval_secs: u64,
}

#[derive(Clone, Debug)]
pub struct GuardrailsConfig {
    pub enabled: bool,
    pub blocked_keywords: Vec<String>,
    pub max_input_chars: usize,
}

#[derive(Clone, Debug)]
pub struct ConversationLogConfig {
    pub enabled: bool,
    pub path: PathBuf,
    /// Entries older than this are pruned at startup; zero keeps everything.
    pub retention_days: u64,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub health_check_port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmProvider {
    #[serde(alias = "openai")]
    OpenAi,
    Gemini,
    Ollama,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatTransportKind {
    Console,
    Noop,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub log_level: Option<String>,
    pub llm_provider: Option<LlmProvider>,
    pub llm_model: Option<String>,
    pub llm_api_key: Option<String>,
    pub chat_transport: Option<ChatTransportKind>,
    pub governor_max_requests: Option<u32>,
    pub governor_window_seconds: Option<u64>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

pub const DEFAULT_BLOCKED_KEYWORDS: [&str; 3] = ["inappropriate", "spam", "violence"];

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            chat: ChatConfig { transport: ChatTransportKind::Console, reconnect_max_retries: 5 },
            llm: LlmConfig {
                provider: LlmProvider::Ollama,
                api_key: None,
                base_url: None,
                model: None,
                timeout_secs: 30,
                temperature: 0.3,
                max_tokens: 2000,
            },
            ocr: OcrConfig {
                enabled: true,
                tesseract_path: "tesseract".to_string(),
                language: "eng".to_string(),
                timeout_secs: 30,
            },
            governor: GovernorSettings {
                max_requests: 10,
                window_seconds: 60,
                sweep_interval_secs: 300,
            },
            guardrails: GuardrailsConfig {
                enabled: true,
                blocked_keywords: DEFAULT_BLOCKED_KEYWORDS.iter().map(|kw| kw.to_string()).collect(),
                max_input_chars: 1000,
            },
            conversation_log: ConversationLogConfig {
                enabled: false,
                path: PathBuf::from("logs/conversations.jsonl"),
                retention_days: 90,
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                health_check_port: 8080,
                graceful_shutdown_secs: 15,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl LlmProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Gemini => "gemini",
            Self::Ollama => "ollama",
        }
    }

    pub fn default_base_url(&self) -> &'static str {
        match self {
            Self::OpenAi => "https://api.openai.com/v1",
            Self::Gemini => "https://generativelanguage.googleapis.com/v1beta",
            Self::Ollama => "http://localhost:11434",
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            Self::OpenAi => "gpt-4",
            Self::Gemini => "gemini-1.5-flash",
            Self::Ollama => "llama3.1",
        }
    }

    pub fn requires_api_key(&self) -> bool {
        matches!(self, Self::OpenAi | Self::Gemini)
    }

    /// Conventional provider-specific key variable, consulted when
    /// `TUTORBOT_LLM_API_KEY` is unset.
    pub fn api_key_env_var(&self) -> Option<&'static str> {
        match self {
            Self::OpenAi => Some("OPENAI_API_KEY"),
            Self::Gemini => Some("GEMINI_API_KEY"),
            Self::Ollama => None,
        }
    }
}

impl LlmConfig {
    pub fn effective_base_url(&self) -> &str {
        self.base_url.as_deref().unwrap_or_else(|| self.provider.default_base_url())
    }

    pub fn effective_model(&self) -> &str {
        self.model.as_deref().unwrap_or_else(|| self.provider.default_model())
    }
}

impl GovernorSettings {
    pub fn governor_config(&self) -> GovernorConfig {
        GovernorConfig { max_requests: self.max_requests, window_seconds: self.window_seconds }
    }
}

impl ChatTransportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Console => "console",
            Self::Noop => "noop",
        }
    }
}

impl std::str::FromStr for LlmProvider {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "openai" | "open_ai" => Ok(Self::OpenAi),
            "gemini" => Ok(Self::Gemini),
            "ollama" => Ok(Self::Ollama),
            other => Err(ConfigError::Validation(format!(
                "unsupported llm provider `{other}` (expected openai|gemini|ollama)"
            ))),
        }
    }
}

impl std::str::FromStr for ChatTransportKind {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "console" => Ok(Self::Console),
            "noop" => Ok(Self::Noop),
            other => Err(ConfigError::Validation(format!(
                "unsupported chat transport `{other}` (expected console|noop)"
            ))),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("tutorbot.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(chat) = patch.chat {
            if let Some(transport) = chat.transport {
                self.chat.transport = transport;
            }
            if let Some(reconnect_max_retries) = chat.reconnect_max_retries {
                self.chat.reconnect_max_retries = reconnect_max_retries;
            }
        }

        if let Some(llm) = patch.llm {
            if let Some(provider) = llm.provider {
                self.llm.provider = provider;
            }
            if let Some(llm_api_key_value) = llm.api_key {
                self.llm.api_key = Some(secret_value(llm_api_key_value));
            }
            if let Some(base_url) = llm.base_url {
                self.llm.base_url = Some(base_url);
            }
            if let Some(model) = llm.model {
                self.llm.model = Some(model);
            }
            if let Some(timeout_secs) = llm.timeout_secs {
                self.llm.timeout_secs = timeout_secs;
            }
            if let Some(temperature) = llm.temperature {
                self.llm.temperature = temperature;
            }
            if let Some(max_tokens) = llm.max_tokens {
                self.llm.max_tokens = max_tokens;
            }
        }

        if let Some(ocr) = patch.ocr {
            if let Some(enabled) = ocr.enabled {
                self.ocr.enabled = enabled;
            }
            if let Some(tesseract_path) = ocr.tesseract_path {
                self.ocr.tesseract_path = tesseract_path;
            }
            if let Some(language) = ocr.language {
                self.ocr.language = language;
            }
            if let Some(timeout_secs) = ocr.timeout_secs {
                self.ocr.timeout_secs = timeout_secs;
            }
        }

        if let Some(governor) = patch.governor {
            if let Some(max_requests) = governor.max_requests {
                self.governor.max_requests = max_requests;
            }
            if let Some(window_seconds) = governor.window_seconds {
                self.governor.window_seconds = window_seconds;
            }
            if let Some(sweep_interval_secs) = governor.sweep_interval_secs {
                self.governor.sweep_interval_secs = sweep_interval_secs;
            }
        }

        if let Some(guardrails) = patch.guardrails {
            if let Some(enabled) = guardrails.enabled {
                self.guardrails.enabled = enabled;
            }
            if let Some(blocked_keywords) = guardrails.blocked_keywords {
                self.guardrails.blocked_keywords = normalize_keywords(blocked_keywords);
            }
            if let Some(max_input_chars) = guardrails.max_input_chars {
                self.guardrails.max_input_chars = max_input_chars;
            }
        }

        if let Some(conversation_log) = patch.conversation_log {
            if let Some(enabled) = conversation_log.enabled {
                self.conversation_log.enabled = enabled;
            }
            if let Some(path) = conversation_log.path {
                self.conversation_log.path = path;
            }
            if let Some(retention_days) = conversation_log.retention_days {
                self.conversation_log.retention_days = retention_days;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(health_check_port) = server.health_check_port {
                self.server.health_check_port = health_check_port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("TUTORBOT_CHAT_TRANSPORT") {
            self.chat.transport = value.parse()?;
        }
        if let Some(value) = read_env("TUTORBOT_CHAT_RECONNECT_MAX_RETRIES") {
            self.chat.reconnect_max_retries =
                parse_u32("TUTORBOT_CHAT_RECONNECT_MAX_RETRIES", &value)?;
        }

        let provider = read_env("TUTORBOT_LLM_PROVIDER").or_else(|| read_env("AI_MODEL_PROVIDER"));
        if let Some(value) = provider {
            self.llm.provider = value.parse()?;
        }
        let api_key = read_env("TUTORBOT_LLM_API_KEY")
            .or_else(|| self.llm.provider.api_key_env_var().and_then(read_env));
        if let Some(value) = api_key {
            self.llm.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("TUTORBOT_LLM_BASE_URL") {
            self.llm.base_url = Some(value);
        }
        if let Some(value) = read_env("TUTORBOT_LLM_MODEL") {
            self.llm.model = Some(value);
        }
        if let Some(value) = read_env("TUTORBOT_LLM_TIMEOUT_SECS") {
            self.llm.timeout_secs = parse_u64("TUTORBOT_LLM_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("TUTORBOT_LLM_TEMPERATURE") {
            self.llm.temperature = parse_f32("TUTORBOT_LLM_TEMPERATURE", &value)?;
        }
        if let Some(value) = read_env("TUTORBOT_LLM_MAX_TOKENS") {
            self.llm.max_tokens = parse_u32("TUTORBOT_LLM_MAX_TOKENS", &value)?;
        }

        if let Some(value) = read_env("TUTORBOT_OCR_ENABLED") {
            self.ocr.enabled = parse_bool("TUTORBOT_OCR_ENABLED", &value)?;
        }
        if let Some(value) = read_env("TUTORBOT_OCR_TESSERACT_PATH") {
            self.ocr.tesseract_path = value;
        }
        if let Some(value) = read_env("TUTORBOT_OCR_LANGUAGE") {
            self.ocr.language = value;
        }
        if let Some(value) = read_env("TUTORBOT_OCR_TIMEOUT_SECS") {
            self.ocr.timeout_secs = parse_u64("TUTORBOT_OCR_TIMEOUT_SECS", &value)?;
        }

        let max_requests = read_env_with_alias("TUTORBOT_GOVERNOR_MAX_REQUESTS", "RATE_LIMIT_REQUESTS");
        if let Some((key, value)) = max_requests {
            self.governor.max_requests = parse_u32(key, &value)?;
        }
        let window_seconds = read_env_with_alias("TUTORBOT_GOVERNOR_WINDOW_SECONDS", "RATE_LIMIT_WINDOW");
        if let Some((key, value)) = window_seconds {
            self.governor.window_seconds = parse_u64(key, &value)?;
        }
        if let Some(value) = read_env("TUTORBOT_GOVERNOR_SWEEP_INTERVAL_SECS") {
            self.governor.sweep_interval_secs =
                parse_u64("TUTORBOT_GOVERNOR_SWEEP_INTERVAL_SECS", &value)?;
        }

        let guardrails_enabled =
            read_env_with_alias("TUTORBOT_GUARDRAILS_ENABLED", "ENABLE_CONTENT_FILTER");
        if let Some((key, value)) = guardrails_enabled {
            self.guardrails.enabled = parse_bool(key, &value)?;
        }
        let blocked_keywords =
            read_env_with_alias("TUTORBOT_GUARDRAILS_BLOCKED_KEYWORDS", "BLOCKED_KEYWORDS");
        if let Some((_, value)) = blocked_keywords {
            self.guardrails.blocked_keywords =
                normalize_keywords(value.split(',').map(str::to_string).collect());
        }
        if let Some(value) = read_env("TUTORBOT_GUARDRAILS_MAX_INPUT_CHARS") {
            self.guardrails.max_input_chars =
                parse_usize("TUTORBOT_GUARDRAILS_MAX_INPUT_CHARS", &value)?;
        }

        if let Some(value) = read_env("TUTORBOT_CONVERSATION_LOG_ENABLED") {
            self.conversation_log.enabled = parse_bool("TUTORBOT_CONVERSATION_LOG_ENABLED", &value)?;
        }
        if let Some(value) = read_env("TUTORBOT_CONVERSATION_LOG_PATH") {
            self.conversation_log.path = PathBuf::from(value);
        }
        if let Some(value) = read_env("TUTORBOT_CONVERSATION_LOG_RETENTION_DAYS") {
            self.conversation_log.retention_days =
                parse_u64("TUTORBOT_CONVERSATION_LOG_RETENTION_DAYS", &value)?;
        }

        if let Some(value) = read_env("TUTORBOT_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("TUTORBOT_SERVER_HEALTH_CHECK_PORT") {
            self.server.health_check_port = parse_u16("TUTORBOT_SERVER_HEALTH_CHECK_PORT", &value)?;
        }
        if let Some(value) = read_env("TUTORBOT_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("TUTORBOT_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        let log_level = read_env("TUTORBOT_LOGGING_LEVEL").or_else(|| read_env("TUTORBOT_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("TUTORBOT_LOGGING_FORMAT").or_else(|| read_env("TUTORBOT_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(llm_provider) = overrides.llm_provider {
            self.llm.provider = llm_provider;
        }
        if let Some(llm_model) = overrides.llm_model {
            self.llm.model = Some(llm_model);
        }
        if let Some(llm_api_key) = overrides.llm_api_key {
            self.llm.api_key = Some(secret_value(llm_api_key));
        }
        if let Some(chat_transport) = overrides.chat_transport {
            self.chat.transport = chat_transport;
        }
        if let Some(max_requests) = overrides.governor_max_requests {
            self.governor.max_requests = max_requests;
        }
        if let Some(window_seconds) = overrides.governor_window_seconds {
            self.governor.window_seconds = window_seconds;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_llm(&self.llm)?;
        validate_ocr(&self.ocr)?;
        validate_governor(&self.governor)?;
        validate_guardrails(&self.guardrails)?;
        validate_server(&self.server)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("tutorbot.toml"), PathBuf::from("config/tutorbot.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn normalize_keywords(keywords: Vec<String>) -> Vec<String> {
    keywords
        .into_iter()
        .map(|keyword| keyword.trim().to_lowercase())
        .filter(|keyword| !keyword.is_empty())
        .collect()
}

fn validate_llm(llm: &LlmConfig) -> Result<(), ConfigError> {
    if llm.timeout_secs == 0 || llm.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "llm.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    if !(0.0..=2.0).contains(&llm.temperature) {
        return Err(ConfigError::Validation(
            "llm.temperature must be in range 0.0..=2.0".to_string(),
        ));
    }

    if llm.max_tokens == 0 {
        return Err(ConfigError::Validation(
            "llm.max_tokens must be greater than zero".to_string(),
        ));
    }

    if llm.provider.requires_api_key() {
        let missing = llm
            .api_key
            .as_ref()
            .map(|value| value.expose_secret().trim().is_empty())
            .unwrap_or(true);
        if missing {
            let hint = llm.provider.api_key_env_var().unwrap_or("TUTORBOT_LLM_API_KEY");
            return Err(ConfigError::Validation(format!(
                "llm.api_key is required for the {} provider (set TUTORBOT_LLM_API_KEY or {hint})",
                llm.provider.as_str()
            )));
        }
    }

    let base_url = llm.effective_base_url();
    if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
        return Err(ConfigError::Validation(
            "llm.base_url must start with http:// or https://".to_string(),
        ));
    }

    Ok(())
}

fn validate_ocr(ocr: &OcrConfig) -> Result<(), ConfigError> {
    if !ocr.enabled {
        return Ok(());
    }

    if ocr.tesseract_path.trim().is_empty() {
        return Err(ConfigError::Validation(
            "ocr.tesseract_path must not be empty when ocr is enabled".to_string(),
        ));
    }

    if ocr.timeout_secs == 0 || ocr.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "ocr.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_governor(governor: &GovernorSettings) -> Result<(), ConfigError> {
    if governor.max_requests == 0 {
        return Err(ConfigError::Validation(
            "governor.max_requests must be greater than zero".to_string(),
        ));
    }

    if governor.window_seconds == 0 || governor.window_seconds > 86_400 {
        return Err(ConfigError::Validation(
            "governor.window_seconds must be in range 1..=86400".to_string(),
        ));
    }

    if governor.sweep_interval_secs == 0 {
        return Err(ConfigError::Validation(
            "governor.sweep_interval_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_guardrails(guardrails: &GuardrailsConfig) -> Result<(), ConfigError> {
    if guardrails.max_input_chars == 0 {
        return Err(ConfigError::Validation(
            "guardrails.max_input_chars must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.health_check_port == 0 {
        return Err(ConfigError::Validation(
            "server.health_check_port must be greater than zero".to_string(),
        ));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

/// Reads `primary`, falling back to the legacy `alias`; returns which key won.
fn read_env_with_alias(primary: &'static str, alias: &'static str) -> Option<(&'static str, String)> {
    read_env(primary).map(|value| (primary, value)).or_else(|| read_env(alias).map(|value| (alias, value)))
}

fn invalid(key: &str, value: &str) -> ConfigError {
    ConfigError::InvalidEnvOverride { key: key.to_string(), value: value.to_string() }
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.trim().parse::<u16>().map_err(|_| invalid(key, value))
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.trim().parse::<u32>().map_err(|_| invalid(key, value))
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.trim().parse::<u64>().map_err(|_| invalid(key, value))
}

fn parse_usize(key: &str, value: &str) -> Result<usize, ConfigError> {
    value.trim().parse::<usize>().map_err(|_| invalid(key, value))
}

fn parse_f32(key: &str, value: &str) -> Result<f32, ConfigError> {
    value.trim().parse::<f32>().map_err(|_| invalid(key, value))
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    value.trim().to_ascii_lowercase().parse::<bool>().map_err(|_| invalid(key, value))
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    chat: Option<ChatPatch>,
    llm: Option<LlmPatch>,
    ocr: Option<OcrPatch>,
    governor: Option<GovernorPatch>,
    guardrails: Option<GuardrailsPatch>,
    conversation_log: Option<ConversationLogPatch>,
    server: Option<ServerPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct ChatPatch {
    transport: Option<ChatTransportKind>,
    reconnect_max_retries: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct LlmPatch {
    provider: Option<LlmProvider>,
    api_key: Option<String>,
    base_url: Option<String>,
    model: Option<String>,
    timeout_secs: Option<u64>,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct OcrPatch {
    enabled: Option<bool>,
    tesseract_path: Option<String>,
    language: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct GovernorPatch {
    max_requests: Option<u32>,
    window_seconds: Option<u64>,
    sweep_interval_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct GuardrailsPatch {
    enabled: Option<bool>,
    blocked_keywords: Option<Vec<String>>,
    max_input_chars: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct ConversationLogPatch {
    enabled: Option<bool>,
    path: Option<PathBuf>,
    retention_days: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    health_check_port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

#[cfg(test)]
mod tests {
    use std::env;
    use std::fs;
    use std::io;
    use std::sync::{Mutex, OnceLock};

    use secrecy::ExposeSecret;
    use tempfile::TempDir;

    use super::{
        AppConfig, ChatTransportKind, ConfigError, ConfigOverrides, LlmProvider, LoadOptions,
        LogFormat,
    };

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

    const TOUCHED_VARS: [&str; 12] = [
        "TUTORBOT_LLM_PROVIDER",
        "TUTORBOT_LLM_API_KEY",
        "OPENAI_API_KEY",
        "GEMINI_API_KEY",
        "AI_MODEL_PROVIDER",
        "TUTORBOT_GOVERNOR_MAX_REQUESTS",
        "RATE_LIMIT_REQUESTS",
        "RATE_LIMIT_WINDOW",
        "TUTORBOT_LOG_LEVEL",
        "TUTORBOT_LOG_FORMAT",
        "BLOCKED_KEYWORDS",
        "TEST_TUTORBOT_LLM_KEY",
    ];

    fn env_lock() -> &'static Mutex<()> {
        ENV_LOCK.get_or_init(|| Mutex::new(()))
    }

    fn clear_vars(vars: &[&str]) {
        for var in vars {
            env::remove_var(var);
        }
    }

    fn ensure(condition: bool, message: &'static str) -> Result<(), String> {
        if condition {
            Ok(())
        } else {
            Err(message.to_string())
        }
    }

    fn with_clean_env(test: impl FnOnce() -> Result<(), String>) -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;
        clear_vars(&TOUCHED_VARS);
        let result = test();
        clear_vars(&TOUCHED_VARS);
        result
    }

    #[test]
    fn defaults_load_without_any_file_or_env() -> Result<(), String> {
        with_clean_env(|| {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.llm.provider == LlmProvider::Ollama, "default provider is ollama")?;
            ensure(config.llm.effective_model() == "llama3.1", "default ollama model")?;
            ensure(config.governor.max_requests == 10, "default quota is 10 requests")?;
            ensure(config.governor.window_seconds == 60, "default window is 60 seconds")?;
            ensure(config.governor.sweep_interval_secs == 300, "default sweep is 5 minutes")?;
            ensure(config.conversation_log.retention_days == 90, "default retention is 90 days")?;
            ensure(config.chat.transport == ChatTransportKind::Console, "console transport")?;
            ensure(
                config.guardrails.blocked_keywords == ["inappropriate", "spam", "violence"],
                "default blocked keywords",
            )
        })
    }

    #[test]
    fn file_load_supports_env_interpolation() -> Result<(), String> {
        with_clean_env(|| {
            env::set_var("TEST_TUTORBOT_LLM_KEY", "sk-from-env");

            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("tutorbot.toml");
            fs::write(
                &path,
                r#"
[llm]
provider = "open_ai"
api_key = "${TEST_TUTORBOT_LLM_KEY}"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config =
                AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
                    .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.llm.provider == LlmProvider::OpenAi, "provider should come from file")?;
            ensure(
                config.llm.api_key.as_ref().map(|key| key.expose_secret() == "sk-from-env")
                    == Some(true),
                "api key should be interpolated from environment",
            )?;
            ensure(config.llm.effective_model() == "gpt-4", "openai default model")
        })
    }

    #[test]
    fn legacy_rate_limit_aliases_are_supported() -> Result<(), String> {
        with_clean_env(|| {
            env::set_var("RATE_LIMIT_REQUESTS", "3");
            env::set_var("RATE_LIMIT_WINDOW", "30");
            env::set_var("TUTORBOT_LOG_LEVEL", "warn");
            env::set_var("TUTORBOT_LOG_FORMAT", "pretty");
            env::set_var("BLOCKED_KEYWORDS", " Spam , ,Cheat ");

            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.governor.max_requests == 3, "alias should set max requests")?;
            ensure(config.governor.window_seconds == 30, "alias should set window")?;
            ensure(config.logging.level == "warn", "log level alias")?;
            ensure(matches!(config.logging.format, LogFormat::Pretty), "log format alias")?;
            ensure(
                config.guardrails.blocked_keywords == ["spam", "cheat"],
                "keyword list should be trimmed and lowercased",
            )
        })
    }

    #[test]
    fn precedence_defaults_file_env_overrides() -> Result<(), String> {
        with_clean_env(|| {
            env::set_var("TUTORBOT_GOVERNOR_MAX_REQUESTS", "20");
            env::set_var("RATE_LIMIT_REQUESTS", "99");

            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("tutorbot.toml");
            fs::write(
                &path,
                r#"
[governor]
max_requests = 5
window_seconds = 120

[conversation_log]
retention_days = 30

[logging]
level = "warn"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config = AppConfig::load(LoadOptions {
                config_path: Some(path),
                overrides: ConfigOverrides {
                    log_level: Some("debug".to_string()),
                    governor_window_seconds: Some(90),
                    ..ConfigOverrides::default()
                },
                ..LoadOptions::default()
            })
            .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.governor.max_requests == 20, "prefixed env var should beat alias and file")?;
            ensure(config.governor.window_seconds == 90, "override should beat file")?;
            ensure(config.conversation_log.retention_days == 30, "retention should come from file")?;
            ensure(config.logging.level == "debug", "overridden log level should be debug")
        })
    }

    #[test]
    fn validation_fails_fast_with_actionable_error() -> Result<(), String> {
        with_clean_env(|| {
            env::set_var("TUTORBOT_LLM_PROVIDER", "gemini");

            let error = match AppConfig::load(LoadOptions::default()) {
                Ok(_) => {
                    return Err("expected validation failure but config load succeeded".to_string())
                }
                Err(error) => error,
            };
            let has_message = matches!(
                error,
                ConfigError::Validation(ref message)
                    if message.contains("llm.api_key") && message.contains("GEMINI_API_KEY")
            );
            ensure(has_message, "validation failure should mention llm.api_key")
        })
    }

    #[test]
    fn zero_quota_is_rejected() -> Result<(), String> {
        with_clean_env(|| {
            let result = AppConfig::load(LoadOptions {
                overrides: ConfigOverrides {
                    governor_max_requests: Some(0),
                    ..ConfigOverrides::default()
                },
                ..LoadOptions::default()
            });
            ensure(
                matches!(result, Err(ConfigError::Validation(ref message)) if message.contains("governor.max_requests")),
                "zero max_requests must fail validation",
            )
        })
    }

    #[test]
    fn secret_values_are_not_leaked_by_debug() -> Result<(), String> {
        with_clean_env(|| {
            env::set_var("TUTORBOT_LLM_PROVIDER", "openai");
            env::set_var("OPENAI_API_KEY", "sk-secret-value");

            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;
            let debug = format!("{config:?}");

            ensure(!debug.contains("sk-secret-value"), "debug output should not contain api key")?;
            ensure(
                matches!(config.logging.format, LogFormat::Compact),
                "default logging format should be compact",
            )
        })
    }
}
