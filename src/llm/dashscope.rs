//! Client for the DashScope OpenAI-compatible chat-completions endpoint.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use tracing::debug;

use crate::llm::streaming::{sse_payload, LineBuffer};
use crate::llm::types::*;
use crate::llm::{send_with_retry, ApiError, CompletionProvider, StreamingCallback};

const DEFAULT_BASE_URL: &str = "https://dashscope.aliyuncs.com/compatible-mode/v1";
const MAX_ATTEMPTS: u32 = 3;
const ATTEMPT_TIMEOUT: Duration = Duration::from_secs(30);

pub struct DashScopeClient {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    base_delay: Duration,
}

impl DashScopeClient {
    pub fn new(api_key: String, model: String) -> Self {
        Self::with_base_url(api_key, model, DEFAULT_BASE_URL.to_string())
    }

    pub fn with_base_url(api_key: String, model: String, base_url: String) -> Self {
        Self {
            client: Client::new(),
            api_key,
            base_url,
            model,
            base_delay: Duration::from_secs(1),
        }
    }

    /// Shrink the backoff delay; tests exercising the retry loop should not
    /// sleep for real seconds.
    #[cfg(test)]
    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    fn url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    fn build_request(
        &self,
        messages: &[ChatMessage],
        tools: Option<&[ToolDefinition]>,
        stream: bool,
    ) -> CompletionRequest {
        CompletionRequest {
            model: self.model.clone(),
            messages: messages.to_vec(),
            temperature: 0.7,
            stream: stream.then_some(true),
            tools: tools.map(<[ToolDefinition]>::to_vec),
            tool_choice: tools.map(|_| "auto".to_string()),
        }
    }

    /// Issue the request and surface HTTP-level failures as the typed error
    /// taxonomy the retry loop classifies on. Timeouts cover the attempt up
    /// to response headers; stream bodies are consumed by the caller.
    async fn open(&self, request: &CompletionRequest) -> Result<Response> {
        let send = self
            .client
            .post(self.url())
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(request)
            .send();

        let response = tokio::time::timeout(ATTEMPT_TIMEOUT, send)
            .await
            .map_err(|_| ApiError::Timeout(format!("no response within {}s", ATTEMPT_TIMEOUT.as_secs())))?
            .map_err(|e| {
                if e.is_timeout() || e.is_connect() {
                    ApiError::Network(e.to_string())
                } else {
                    ApiError::Unknown(e.to_string())
                }
            })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let error = match status {
            StatusCode::TOO_MANY_REQUESTS => ApiError::RateLimit(body),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ApiError::Authentication(body),
            StatusCode::BAD_REQUEST => ApiError::InvalidRequest(body),
            s if s.is_server_error() => ApiError::Service(format!("status {s}: {body}")),
            s => ApiError::InvalidRequest(format!("status {s}: {body}")),
        };
        Err(error.into())
    }

    /// Consume the chunked body, forwarding each content delta immediately.
    /// Malformed frames are dropped silently; the protocol permits comment
    /// and keep-alive lines.
    async fn consume_stream(
        &self,
        mut response: Response,
        callback: &StreamingCallback,
    ) -> Result<String> {
        let mut lines = LineBuffer::new();
        let mut full_text = String::new();

        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?
        {
            lines.process_chunk(&chunk, |line| {
                let payload = match sse_payload(line) {
                    Some(payload) => payload,
                    None => return Ok(()),
                };
                let parsed: StreamChunk = match serde_json::from_str(payload) {
                    Ok(parsed) => parsed,
                    Err(_) => return Ok(()),
                };
                if let Some(content) = parsed
                    .choices
                    .first()
                    .and_then(|choice| choice.delta.content.as_deref())
                {
                    if !content.is_empty() {
                        callback(content)?;
                        full_text.push_str(content);
                    }
                }
                Ok(())
            })?;
        }

        Ok(full_text)
    }

    async fn complete(
        &self,
        messages: &[ChatMessage],
        tools: Option<&[ToolDefinition]>,
    ) -> Result<ToolChatResponse> {
        let request = self.build_request(messages, tools, false);
        let response = send_with_retry(|| self.open(&request), MAX_ATTEMPTS, self.base_delay).await?;

        let body = response
            .text()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;
        debug!("completion response: {}", body);

        let completion: CompletionResponse = serde_json::from_str(&body)
            .map_err(|e| ApiError::Unknown(format!("failed to parse response: {e}")))?;
        let message = completion
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message)
            .ok_or_else(|| ApiError::Unknown("response carried no choices".to_string()))?;

        Ok(ToolChatResponse {
            content: message.content.unwrap_or_default(),
            tool_calls: message.tool_calls,
        })
    }
}

#[async_trait]
impl CompletionProvider for DashScopeClient {
    async fn chat(&self, messages: &[ChatMessage]) -> Result<String> {
        Ok(self.complete(messages, None).await?.content)
    }

    async fn chat_streamed(
        &self,
        messages: &[ChatMessage],
        callback: &StreamingCallback,
    ) -> Result<String> {
        let request = self.build_request(messages, None, true);
        // Retries cover the initial connection only. Once a delta has been
        // forwarded downstream a resumed stream could replay content, so
        // mid-stream failures are terminal.
        let response =
            send_with_retry(|| self.open(&request), MAX_ATTEMPTS, self.base_delay).await?;
        self.consume_stream(response, callback).await
    }

    async fn chat_with_tools(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
    ) -> Result<ToolChatResponse> {
        self.complete(messages, Some(tools)).await
    }
}
