//! Provider clients. Each one turns a prompt into the raw reply text; making
//! sense of that text is the normalizer's job.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tutorbot_core::config::{LlmConfig, LlmProvider};
use tutorbot_core::prompt::SYSTEM_PROMPT;

#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Provider name recorded on every solution.
    fn provider(&self) -> &str;

    async fn complete(&self, prompt: &str) -> Result<String>;
}

pub fn client_from_config(config: &LlmConfig) -> Result<Arc<dyn LlmClient>> {
    let http = Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()
        .context("failed to build HTTP client for llm provider")?;
    let settings = RequestSettings {
        base_url: config.effective_base_url().trim_end_matches('/').to_string(),
        model: config.effective_model().to_string(),
        temperature: config.temperature,
        max_tokens: config.max_tokens,
    };

    let client: Arc<dyn LlmClient> = match config.provider {
        LlmProvider::OpenAi => Arc::new(OpenAiClient {
            http,
            settings,
            api_key: required_key(config)?,
        }),
        LlmProvider::Gemini => Arc::new(GeminiClient {
            http,
            settings,
            api_key: required_key(config)?,
        }),
        LlmProvider::Ollama => Arc::new(OllamaClient { http, settings }),
    };
    Ok(client)
}

fn required_key(config: &LlmConfig) -> Result<SecretString> {
    config
        .api_key
        .clone()
        .ok_or_else(|| anyhow!("llm.api_key is required for the {} provider", config.provider.as_str()))
}

#[derive(Clone, Debug)]
struct RequestSettings {
    base_url: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
}

async fn post_json<B, R>(request: reqwest::RequestBuilder, body: &B, provider: &str) -> Result<R>
where
    B: Serialize + ?Sized,
    R: for<'de> Deserialize<'de>,
{
    let response = request
        .json(body)
        .send()
        .await
        .with_context(|| format!("{provider} request failed"))?;

    let status = response.status();
    if !status.is_success() {
        let detail = response.text().await.unwrap_or_default();
        bail!("{provider} returned HTTP {}: {}", status.as_u16(), truncate(&detail, 300));
    }

    response.json::<R>().await.with_context(|| format!("{provider} returned an unreadable body"))
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

pub struct OpenAiClient {
    http: Client,
    settings: RequestSettings,
    api_key: SecretString,
}

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

fn chat_completion_text(response: ChatCompletionResponse) -> Result<String> {
    response
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .ok_or_else(|| anyhow!("openai response contained no message content"))
}

#[async_trait]
impl LlmClient for OpenAiClient {
    fn provider(&self) -> &str {
        LlmProvider::OpenAi.as_str()
    }

    async fn complete(&self, prompt: &str) -> Result<String> {
        let body = ChatCompletionRequest {
            model: &self.settings.model,
            messages: [
                ChatMessage { role: "system", content: SYSTEM_PROMPT },
                ChatMessage { role: "user", content: prompt },
            ],
            temperature: self.settings.temperature,
            max_tokens: self.settings.max_tokens,
        };
        let request = self
            .http
            .post(format!("{}/chat/completions", self.settings.base_url))
            .bearer_auth(self.api_key.expose_secret());

        chat_completion_text(post_json(request, &body, self.provider()).await?)
    }
}

pub struct GeminiClient {
    http: Client,
    settings: RequestSettings,
    api_key: SecretString,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    system_instruction: GeminiContent<'a>,
    contents: [GeminiContent<'a>; 1],
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct GeminiContent<'a> {
    parts: [GeminiPart<'a>; 1],
}

#[derive(Serialize)]
struct GeminiPart<'a> {
    text: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    #[serde(default)]
    content: Option<GeminiReplyContent>,
}

#[derive(Debug, Deserialize)]
struct GeminiReplyContent {
    #[serde(default)]
    parts: Vec<GeminiReplyPart>,
}

#[derive(Debug, Deserialize)]
struct GeminiReplyPart {
    #[serde(default)]
    text: Option<String>,
}

fn generate_content_text(response: GenerateContentResponse) -> Result<String> {
    let text: String = response
        .candidates
        .into_iter()
        .next()
        .and_then(|candidate| candidate.content)
        .map(|content| content.parts.into_iter().filter_map(|part| part.text).collect())
        .unwrap_or_default();

    if text.is_empty() {
        bail!("gemini response contained no text parts");
    }
    Ok(text)
}

#[async_trait]
impl LlmClient for GeminiClient {
    fn provider(&self) -> &str {
        LlmProvider::Gemini.as_str()
    }

    async fn complete(&self, prompt: &str) -> Result<String> {
        let body = GenerateContentRequest {
            system_instruction: GeminiContent { parts: [GeminiPart { text: SYSTEM_PROMPT }] },
            contents: [GeminiContent { parts: [GeminiPart { text: prompt }] }],
            generation_config: GenerationConfig {
                temperature: self.settings.temperature,
                max_output_tokens: self.settings.max_tokens,
            },
        };
        let request = self
            .http
            .post(format!(
                "{}/models/{}:generateContent",
                self.settings.base_url, self.settings.model
            ))
            .header("x-goog-api-key", self.api_key.expose_secret());

        generate_content_text(post_json(request, &body, self.provider()).await?)
    }
}

pub struct OllamaClient {
    http: Client,
    settings: RequestSettings,
}

#[derive(Serialize)]
struct OllamaGenerateRequest<'a> {
    model: &'a str,
    system: &'a str,
    prompt: &'a str,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Serialize)]
struct OllamaOptions {
    temperature: f32,
    num_predict: u32,
}

#[derive(Debug, Deserialize)]
struct OllamaGenerateResponse {
    #[serde(default)]
    response: String,
}

#[async_trait]
impl LlmClient for OllamaClient {
    fn provider(&self) -> &str {
        LlmProvider::Ollama.as_str()
    }

    async fn complete(&self, prompt: &str) -> Result<String> {
        let body = OllamaGenerateRequest {
            model: &self.settings.model,
            system: SYSTEM_PROMPT,
            prompt,
            stream: false,
            options: OllamaOptions {
                temperature: self.settings.temperature,
                num_predict: self.settings.max_tokens,
            },
        };
        let request = self.http.post(format!("{}/api/generate", self.settings.base_url));

        let reply: OllamaGenerateResponse = post_json(request, &body, self.provider()).await?;
        if reply.response.trim().is_empty() {
            bail!("ollama returned an empty response");
        }
        Ok(reply.response)
    }
}

#[cfg(test)]
mod tests {
    use tutorbot_core::config::{AppConfig, LlmProvider};

    use super::{
        chat_completion_text, client_from_config, generate_content_text, ChatCompletionResponse,
        GenerateContentResponse,
    };

    #[test]
    fn openai_reply_text_is_first_choice_content() {
        let response: ChatCompletionResponse = serde_json::from_str(
            r#"{"choices": [{"message": {"role": "assistant", "content": "{\"solution\": \"4\"}"}}]}"#,
        )
        .expect("valid fixture");

        assert_eq!(chat_completion_text(response).expect("text"), r#"{"solution": "4"}"#);
    }

    #[test]
    fn openai_reply_without_choices_is_an_error() {
        let response: ChatCompletionResponse =
            serde_json::from_str(r#"{"choices": []}"#).expect("valid fixture");
        assert!(chat_completion_text(response).is_err());
    }

    #[test]
    fn gemini_reply_concatenates_text_parts() {
        let response: GenerateContentResponse = serde_json::from_str(
            r#"{"candidates": [{"content": {"parts": [{"text": "Answer: "}, {"text": "4"}]}}]}"#,
        )
        .expect("valid fixture");

        assert_eq!(generate_content_text(response).expect("text"), "Answer: 4");
    }

    #[test]
    fn gemini_reply_without_candidates_is_an_error() {
        let response: GenerateContentResponse =
            serde_json::from_str(r#"{"candidates": []}"#).expect("valid fixture");
        assert!(generate_content_text(response).is_err());
    }

    #[test]
    fn factory_selects_configured_provider() {
        let mut config = AppConfig::default().llm;
        let client = client_from_config(&config).expect("ollama needs no key");
        assert_eq!(client.provider(), "ollama");

        config.provider = LlmProvider::Gemini;
        config.api_key = Some("g-key".to_string().into());
        let client = client_from_config(&config).expect("gemini with key");
        assert_eq!(client.provider(), "gemini");
    }

    #[test]
    fn factory_rejects_keyless_hosted_provider() {
        let mut config = AppConfig::default().llm;
        config.provider = LlmProvider::OpenAi;
        assert!(client_from_config(&config).is_err());
    }
}
