//! OpenAI-compatible inference backend implementation.

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Local};
use reqwest::{Client, Method, RequestBuilder};
use std::time::Duration;
use tracing::{debug, info, warn};

use quill_core::{
    defaults, ChunkResult, ChunkingBackend, DocumentEmbeddings, EmbeddingBackend, Error,
    InferenceBackend, Result, TokenUsage, Vector,
};

use super::error::{to_quill_error, OpenAIErrorCode, Operation};
use super::types::*;

pub const DEFAULT_OPENAI_URL: &str = defaults::OPENAI_URL;
pub const DEFAULT_EMBED_MODEL: &str = defaults::EMBED_MODEL;
pub const DEFAULT_GEN_MODEL: &str = defaults::GEN_MODEL;
pub const DEFAULT_DIMENSION: usize = defaults::EMBED_DIMENSION;
pub const DEFAULT_TIMEOUT_SECS: u64 = defaults::PROVIDER_HTTP_TIMEOUT_SECS;

/// Texts per `/embeddings` call; long documents are split into batches.
pub const DEFAULT_EMBED_BATCH_SIZE: usize = 16;

const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

/// Name of the function the model is asked to call with its chunking result.
const CHUNK_FUNCTION: &str = "chunk";

const CHUNK_SYSTEM_PROMPT: &str = "\
You split the user's content into chunks for a retrieval index. You are not in a conversation \
with the user; only chunk the content.
Each chunk must stand on its own: keep the context it needs (dates, holidays, names, specific \
technologies) and never leave references such as \"these tasks\" dangling. Keep code together \
with the explanation it belongs to. If the content is already short and focused, return it as \
a single chunk.
Produce between 1 and 10 chunks and at most 5 tags. After chunking, drop any chunk that is not \
about the user's content.

Reference timeline for resolving relative dates:
{timeline}

Values wrapped as $hidden[...] are redacted placeholders. Copy them verbatim and do not \
interpret them.";

/// Provider settings. `api_key` may be empty for local servers.
#[derive(Debug, Clone)]
pub struct OpenAIConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub embed_model: String,
    /// Model used for chunking.
    pub gen_model: String,
    /// Vector width the store expects. Checked against nothing at runtime;
    /// a wrong value fails at insert.
    pub embed_dimension: usize,
    /// Send `dimensions` with embedding requests.
    pub send_dimensions: bool,
    pub embed_batch_size: usize,
    /// Per-request HTTP timeout. Stage timeouts in the pipeline are separate.
    pub timeout_seconds: u64,
    /// Accept self-signed certificates.
    pub skip_tls_verify: bool,
}

impl Default for OpenAIConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_OPENAI_URL.to_string(),
            api_key: None,
            embed_model: DEFAULT_EMBED_MODEL.to_string(),
            gen_model: DEFAULT_GEN_MODEL.to_string(),
            embed_dimension: DEFAULT_DIMENSION,
            send_dimensions: false,
            embed_batch_size: DEFAULT_EMBED_BATCH_SIZE,
            timeout_seconds: DEFAULT_TIMEOUT_SECS,
            skip_tls_verify: false,
        }
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn env_flag(key: &str) -> bool {
    env_string(key).is_some_and(|v| v == "1" || v.eq_ignore_ascii_case("true"))
}

impl OpenAIConfig {
    /// Read `OPENAI_*` variables; unset or unparsable values keep defaults.
    pub fn from_env() -> Self {
        let base = Self::default();
        Self {
            base_url: env_string("OPENAI_BASE_URL").unwrap_or(base.base_url),
            api_key: env_string("OPENAI_API_KEY"),
            embed_model: env_string("OPENAI_EMBED_MODEL").unwrap_or(base.embed_model),
            gen_model: env_string("OPENAI_GEN_MODEL").unwrap_or(base.gen_model),
            embed_dimension: env_string("OPENAI_EMBED_DIM")
                .and_then(|v| v.parse().ok())
                .unwrap_or(base.embed_dimension),
            send_dimensions: env_flag("OPENAI_SEND_DIMENSIONS"),
            embed_batch_size: env_string("OPENAI_EMBED_BATCH")
                .and_then(|v| v.parse().ok())
                .filter(|n: &usize| *n > 0)
                .unwrap_or(base.embed_batch_size),
            timeout_seconds: env_string("OPENAI_TIMEOUT")
                .and_then(|v| v.parse().ok())
                .unwrap_or(base.timeout_seconds),
            skip_tls_verify: env_flag("OPENAI_SKIP_TLS_VERIFY"),
        }
    }
}

/// Chunking and embedding over an OpenAI-compatible HTTP API.
pub struct OpenAIBackend {
    client: Client,
    config: OpenAIConfig,
}

impl OpenAIBackend {
    pub fn new(config: OpenAIConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .danger_accept_invalid_certs(config.skip_tls_verify)
            .build()
            .map_err(|e| Error::Config(format!("cannot build HTTP client: {}", e)))?;

        info!(
            subsystem = "inference",
            component = "openai",
            url = %config.base_url,
            embed_model = %config.embed_model,
            gen_model = %config.gen_model,
            embed_dimension = config.embed_dimension,
            batch = config.embed_batch_size,
            "OpenAI backend configured"
        );

        Ok(Self { client, config })
    }

    pub fn from_env() -> Result<Self> {
        Self::new(OpenAIConfig::from_env())
    }

    pub fn config(&self) -> &OpenAIConfig {
        &self.config
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), endpoint)
    }

    /// Request against `endpoint`, with a bearer token when a key is set.
    fn request(&self, method: Method, endpoint: &str) -> RequestBuilder {
        let req = self.client.request(method, self.url(endpoint));
        match &self.config.api_key {
            Some(key) => req.bearer_auth(key),
            None => req,
        }
    }

    async fn error_from_response(op: Operation, response: reqwest::Response) -> Error {
        let status = response.status();
        let body: OpenAIErrorResponse = response
            .json()
            .await
            .unwrap_or_else(|_| OpenAIErrorResponse::unparsable());
        let code = OpenAIErrorCode::from_response(status.as_u16(), &body.error.error_type);
        to_quill_error(
            op,
            code,
            &format!("OpenAI returned {}: {}", status, body.error.message),
        )
    }

    fn transport_error(op: Operation, e: reqwest::Error) -> Error {
        if e.is_timeout() {
            return Error::Timeout(format!("provider request timed out: {}", e));
        }
        match op {
            Operation::Chunk => Error::Inference(format!("Request failed: {}", e)),
            Operation::Embed => Error::Embedding(format!("Request failed: {}", e)),
        }
    }

    /// System prompt with a timeline around the current local time so the
    /// model can resolve relative dates ("yesterday", "next friday").
    fn chunk_system_prompt() -> String {
        let now = Local::now();
        let timeline = [-2i64, -1, 0, 1, 2]
            .iter()
            .map(|offset| {
                let day = now + ChronoDuration::days(*offset);
                let label = match offset {
                    -2 => "the day before yesterday",
                    -1 => "yesterday",
                    0 => "today",
                    1 => "tomorrow",
                    _ => "the day after tomorrow",
                };
                format!("- {}: {}", label, day.format("%Y-%m-%d %A"))
            })
            .chain(std::iter::once(format!(
                "- now: {}",
                now.format(defaults::MAYBE_DATE_FORMAT)
            )))
            .collect::<Vec<_>>()
            .join("\n");
        CHUNK_SYSTEM_PROMPT.replace("{timeline}", &timeline)
    }

    fn chunk_tool() -> Tool {
        Tool::function(
            CHUNK_FUNCTION,
            "Processed chunks content.",
            serde_json::json!({
                "type": "object",
                "properties": {
                    "tags": {
                        "type": "array",
                        "items": {"type": "string"},
                        "description": "Keywords or technical tags that help categorize the content later."
                    },
                    "title": {
                        "type": "string",
                        "description": "A title for the content."
                    },
                    "chunks": {
                        "type": "array",
                        "items": {"type": "string"},
                        "description": "The chunked content."
                    },
                    "date_time": {
                        "type": "string",
                        "description": "Time mentioned in the content as 'YYYY-MM-DD HH:MM'. Empty when none can be extracted."
                    }
                },
                "required": ["tags", "title", "chunks"]
            }),
        )
    }

    /// Pull the chunking result out of a completion: the `chunk` tool call
    /// when present, otherwise a JSON message body.
    fn parse_chunk_response(response: ChatCompletionResponse) -> Result<ChunkResult> {
        let message = response
            .choices
            .into_iter()
            .next()
            .map(|c| c.message)
            .ok_or_else(|| Error::Inference("completion returned no choices".to_string()))?;

        if let Some(call) = message
            .tool_calls
            .iter()
            .find(|c| c.function.name == CHUNK_FUNCTION)
        {
            return serde_json::from_str(&call.function.arguments).map_err(|e| {
                Error::Inference(format!("failed to parse chunk call arguments: {}", e))
            });
        }

        let content = message.content.unwrap_or_default();
        let trimmed = content
            .trim()
            .trim_start_matches("```json")
            .trim_start_matches("```")
            .trim_end_matches("```")
            .trim();
        serde_json::from_str(trimmed)
            .map_err(|_| Error::Inference("model did not return a chunk result".to_string()))
    }
}

#[async_trait]
impl ChunkingBackend for OpenAIBackend {
    async fn chunk(&self, text: &str) -> Result<ChunkResult> {
        debug!(
            subsystem = "inference",
            component = "openai",
            op = "chunk",
            model = %self.config.gen_model,
            input_len = text.len(),
            "Requesting chunking"
        );

        let request = ChatCompletionRequest {
            model: self.config.gen_model.clone(),
            messages: vec![
                ChatMessage::system(Self::chunk_system_prompt()),
                ChatMessage::user(text),
            ],
            tools: vec![Self::chunk_tool()],
            tool_choice: Some(serde_json::json!({
                "type": "function",
                "function": {"name": CHUNK_FUNCTION}
            })),
            temperature: None,
        };

        let response = self
            .request(Method::POST, "/chat/completions")
            .json(&request)
            .send()
            .await
            .map_err(|e| Self::transport_error(Operation::Chunk, e))?;

        if !response.status().is_success() {
            return Err(Self::error_from_response(Operation::Chunk, response).await);
        }

        let completion: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| Error::Inference(format!("malformed completion: {}", e)))?;
        let total_tokens = completion.usage.as_ref().map(|u| u.total_tokens);
        let usage = completion.usage.map(TokenUsage::from);

        let mut result = Self::parse_chunk_response(completion)?;
        result.model = self.config.gen_model.clone();
        result.usage = usage;

        debug!(
            subsystem = "inference",
            component = "openai",
            op = "chunk",
            chunk_count = result.chunks.len(),
            tag_count = result.tags.len(),
            total_tokens = ?total_tokens,
            "Chunking complete"
        );
        Ok(result)
    }

    fn model_name(&self) -> &str {
        &self.config.gen_model
    }
}

#[async_trait]
impl EmbeddingBackend for OpenAIBackend {
    async fn embed_document(&self, title: &str, texts: &[String]) -> Result<DocumentEmbeddings> {
        let mut embeddings = DocumentEmbeddings {
            model: self.config.embed_model.clone(),
            ..Default::default()
        };
        if texts.is_empty() {
            return Ok(embeddings);
        }

        debug!(
            subsystem = "inference",
            component = "openai",
            op = "embed",
            model = %self.config.embed_model,
            title = %title,
            text_count = texts.len(),
            "Embedding document"
        );

        embeddings.vectors.reserve(texts.len());
        for batch in texts.chunks(self.config.embed_batch_size.max(1)) {
            let request = EmbeddingRequest {
                model: self.config.embed_model.clone(),
                input: batch.to_vec(),
                encoding_format: Some("float".to_string()),
                dimensions: self
                    .config
                    .send_dimensions
                    .then_some(self.config.embed_dimension),
            };

            let response = self
                .request(Method::POST, "/embeddings")
                .json(&request)
                .send()
                .await
                .map_err(|e| Self::transport_error(Operation::Embed, e))?;

            if !response.status().is_success() {
                return Err(Self::error_from_response(Operation::Embed, response).await);
            }

            let result: EmbeddingResponse = response
                .json()
                .await
                .map_err(|e| Error::Embedding(format!("malformed embeddings: {}", e)))?;

            if let Some(usage) = result.usage.map(TokenUsage::from) {
                embeddings.usage = Some(embeddings.usage.unwrap_or_default().combined(usage));
            }

            let mut data = result.data;
            data.sort_by_key(|d| d.index);
            embeddings
                .vectors
                .extend(data.into_iter().map(|d| Vector::from(d.embedding)));
        }

        debug!(
            subsystem = "inference",
            component = "openai",
            op = "embed",
            vector_count = embeddings.vectors.len(),
            prompt_tokens = ?embeddings.usage.map(|u| u.prompt_tokens),
            "Generated embeddings"
        );
        Ok(embeddings)
    }

    fn dimension(&self) -> usize {
        self.config.embed_dimension
    }

    fn model_name(&self) -> &str {
        &self.config.embed_model
    }
}

#[async_trait]
impl InferenceBackend for OpenAIBackend {
    /// `GET /models`. Unreachable or non-2xx is `Ok(false)`, never an error.
    async fn health_check(&self) -> Result<bool> {
        let outcome = self
            .request(Method::GET, "/models")
            .timeout(HEALTH_CHECK_TIMEOUT)
            .send()
            .await;

        let healthy = match outcome {
            Ok(resp) if resp.status().is_success() => true,
            Ok(resp) => {
                warn!(
                    subsystem = "inference",
                    component = "openai",
                    status = %resp.status(),
                    "Provider health check rejected"
                );
                false
            }
            Err(e) => {
                warn!(
                    subsystem = "inference",
                    component = "openai",
                    error = %e,
                    "Provider unreachable"
                );
                false
            }
        };
        Ok(healthy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn completion(message: serde_json::Value) -> ChatCompletionResponse {
        serde_json::from_value(serde_json::json!({"choices": [{"message": message}]})).unwrap()
    }

    #[test]
    fn test_default_config_is_keyless_openai() {
        let config = OpenAIConfig::default();
        assert_eq!(config.base_url, DEFAULT_OPENAI_URL);
        assert_eq!(config.embed_dimension, DEFAULT_DIMENSION);
        assert_eq!(config.embed_batch_size, DEFAULT_EMBED_BATCH_SIZE);
        assert!(!config.send_dimensions);
        assert!(config.api_key.is_none());
    }

    #[test]
    fn test_backend_reports_models() {
        let backend = OpenAIBackend::new(OpenAIConfig {
            embed_model: "nomic-embed-text".to_string(),
            gen_model: "llama3".to_string(),
            embed_dimension: 768,
            ..Default::default()
        })
        .unwrap();

        assert_eq!(ChunkingBackend::model_name(&backend), "llama3");
        assert_eq!(EmbeddingBackend::model_name(&backend), "nomic-embed-text");
        assert_eq!(backend.dimension(), 768);
    }

    #[test]
    fn test_url_joins_without_double_slash() {
        let backend = OpenAIBackend::new(OpenAIConfig {
            base_url: "http://localhost:11434/v1/".to_string(),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(
            backend.url("/embeddings"),
            "http://localhost:11434/v1/embeddings"
        );
    }

    #[test]
    fn test_system_prompt_has_timeline() {
        let prompt = OpenAIBackend::chunk_system_prompt();
        assert!(!prompt.contains("{timeline}"));
        assert!(prompt.contains("- today: "));
        assert!(prompt.contains("$hidden[...]"));
    }

    #[test]
    fn test_parse_tool_call() {
        let resp = completion(serde_json::json!({
            "role": "assistant",
            "content": null,
            "tool_calls": [{
                "id": "call_1",
                "type": "function",
                "function": {
                    "name": "chunk",
                    "arguments": "{\"title\":\"Docker\",\"tags\":[\"ops\"],\"chunks\":[\"a\",\"b\"],\"date_time\":\"2024-03-01 09:00\"}"
                }
            }]
        }));
        let result = OpenAIBackend::parse_chunk_response(resp).unwrap();
        assert_eq!(result.title, "Docker");
        assert_eq!(result.chunks, vec!["a", "b"]);
        assert_eq!(result.date_time, "2024-03-01 09:00");
    }

    #[test]
    fn test_parse_fenced_json_content() {
        let resp = completion(serde_json::json!({
            "role": "assistant",
            "content": "```json\n{\"title\":\"Notes\",\"chunks\":[\"x\"]}\n```"
        }));
        let result = OpenAIBackend::parse_chunk_response(resp).unwrap();
        assert_eq!(result.title, "Notes");
        assert!(result.tags.is_empty());
    }

    #[test]
    fn test_parse_plain_text_is_inference_error() {
        let resp = completion(serde_json::json!({
            "role": "assistant",
            "content": "Sure! Here are your chunks."
        }));
        let err = OpenAIBackend::parse_chunk_response(resp).unwrap_err();
        assert!(matches!(err, Error::Inference(_)));
    }

    #[test]
    fn test_parse_no_choices() {
        let resp: ChatCompletionResponse =
            serde_json::from_value(serde_json::json!({"choices": []})).unwrap();
        assert!(OpenAIBackend::parse_chunk_response(resp).is_err());
    }
}
