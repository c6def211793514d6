use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One context block passed to the LLM, optionally marked cacheable by the
/// upstream prompt cache (§6 LLM collaborator contract).
#[derive(Debug, Clone, Serialize)]
pub struct ContextBlock {
    pub text: String,
    pub cache_hint: bool,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Usage {
    pub input_tokens: i32,
    pub output_tokens: i32,
    pub cached_tokens: i32,
}

#[derive(Debug, Clone)]
pub struct CompletionResult {
    pub text: String,
    pub usage: Usage,
    pub model: String,
}

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("transient LLM error (retriable): {0}")]
    Transient(String),
    #[error("non-retriable LLM error: {0}")]
    NonRetriable(String),
}

impl LlmError {
    pub fn is_retriable(&self) -> bool {
        matches!(self, LlmError::Transient(_))
    }
}

/// The `Completion` capability (§6): the LLM transport itself is an external
/// collaborator, so this is a trait seam rather than a concrete client
/// wired into the analyzer directly.
#[async_trait]
pub trait Completion: Send + Sync {
    async fn complete(
        &self,
        system: &str,
        context_blocks: &[ContextBlock],
        user_prompt: &str,
        max_tokens: u32,
        temperature: f32,
    ) -> Result<CompletionResult, LlmError>;
}

/// `reqwest`-backed implementation against an OpenAI-compatible chat
/// completion endpoint. Retries are applied by the caller (see
/// `complete_with_retry`), not inside this client, so the retry policy is
/// visible in one place (§4.H step 5).
pub struct HttpCompletionClient {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
}

impl HttpCompletionClient {
    pub fn new(endpoint: String, api_key: String, model: String) -> Self {
        HttpCompletionClient { client: reqwest::Client::new(), endpoint, api_key, model }
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
    model: String,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: String,
}

#[derive(Deserialize)]
struct ChatUsage {
    prompt_tokens: i32,
    completion_tokens: i32,
    #[serde(default)]
    cached_tokens: i32,
}

#[async_trait]
impl Completion for HttpCompletionClient {
    async fn complete(
        &self,
        system: &str,
        context_blocks: &[ContextBlock],
        user_prompt: &str,
        max_tokens: u32,
        temperature: f32,
    ) -> Result<CompletionResult, LlmError> {
        let mut content = String::new();
        for block in context_blocks {
            content.push_str(&block.text);
            content.push('\n');
        }
        content.push_str(user_prompt);

        let body = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage { role: "system", content: system },
                ChatMessage { role: "user", content: &content },
            ],
            max_tokens,
            temperature,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() || e.is_connect() {
                    LlmError::Transient(e.to_string())
                } else {
                    LlmError::NonRetriable(e.to_string())
                }
            })?;

        let status = response.status();
        if status.is_server_error() || status.as_u16() == 429 {
            return Err(LlmError::Transient(format!("HTTP {status}")));
        }
        if !status.is_success() {
            return Err(LlmError::NonRetriable(format!("HTTP {status}")));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| LlmError::NonRetriable(format!("invalid response body: {e}")))?;

        let text = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| LlmError::NonRetriable("empty choices array".to_string()))?;

        let usage = parsed
            .usage
            .map(|u| Usage {
                input_tokens: u.prompt_tokens,
                output_tokens: u.completion_tokens,
                cached_tokens: u.cached_tokens,
            })
            .unwrap_or_default();

        Ok(CompletionResult { text, usage, model: parsed.model })
    }
}

/// Wraps any `Completion` with the retry policy of §4.H step 5: 3 attempts,
/// exponential backoff with jitter, only for retriable errors.
pub async fn complete_with_retry(
    client: &dyn Completion,
    system: &str,
    context_blocks: &[ContextBlock],
    user_prompt: &str,
    max_tokens: u32,
    temperature: f32,
    max_retries: u32,
) -> Result<CompletionResult, LlmError> {
    let backoff = ExponentialBuilder::default()
        .with_max_times(max_retries as usize)
        .with_jitter();

    (|| async { client.complete(system, context_blocks, user_prompt, max_tokens, temperature).await })
        .retry(backoff)
        .when(|e: &LlmError| e.is_retriable())
        .await
}

#[cfg(test)]
pub mod mock {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// A scripted `Completion` for analyzer tests: returns queued responses
    /// in order and counts how many times it was actually invoked, so tests
    /// can assert exactly-once-call semantics (§8 property 2).
    pub struct MockCompletion {
        responses: Mutex<Vec<Result<CompletionResult, LlmError>>>,
        call_count: AtomicUsize,
    }

    impl MockCompletion {
        pub fn new(responses: Vec<Result<CompletionResult, LlmError>>) -> Self {
            MockCompletion { responses: Mutex::new(responses), call_count: AtomicUsize::new(0) }
        }

        pub fn call_count(&self) -> usize {
            self.call_count.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Completion for MockCompletion {
        async fn complete(
            &self,
            _system: &str,
            _context_blocks: &[ContextBlock],
            _user_prompt: &str,
            _max_tokens: u32,
            _temperature: f32,
        ) -> Result<CompletionResult, LlmError> {
            self.call_count.fetch_add(1, Ordering::SeqCst);
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                return Err(LlmError::NonRetriable("mock exhausted".to_string()));
            }
            responses.remove(0)
        }
    }
}
