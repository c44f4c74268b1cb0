//! Streaming relay to the hosted completion service.

pub mod dashscope;
pub mod streaming;
pub mod types;


pub use dashscope::DashScopeClient;
pub use types::*;

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use thiserror::Error;
use tokio::time::sleep;
use tracing::warn;

/// Called once per content delta, in arrival order. Returning an error
/// aborts the relay (used when the downstream client has disconnected).
pub type StreamingCallback = Box<dyn Fn(&str) -> Result<()> + Send + Sync>;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Network error: {0}")]
    Network(String),
    #[error("Request timed out: {0}")]
    Timeout(String),
    #[error("Rate limit exceeded: {0}")]
    RateLimit(String),
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Authentication failed: {0}")]
    Authentication(String),
    #[error("Service error: {0}")]
    Service(String),
    /// Synthesized after the retry budget is spent. `message` is the
    /// user-facing text; `detail` carries the last underlying error.
    #[error("{message}（已尝试 {attempts} 次连接）\n错误详情: {detail}")]
    Exhausted {
        message: String,
        attempts: u32,
        detail: String,
    },
    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl ApiError {
    /// Transient failures worth another attempt: connection problems,
    /// timeouts, throttling, upstream 5xx. Everything else fails fast.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ApiError::Network(_) | ApiError::Timeout(_) | ApiError::RateLimit(_) | ApiError::Service(_)
        )
    }

    /// User-facing translation, never a raw stack trace.
    pub fn friendly_message(&self) -> &'static str {
        match self {
            ApiError::Network(_) | ApiError::Timeout(_) => "网络连接不稳定，请稍后再试。",
            ApiError::RateLimit(_) => "请求过于频繁，请稍后再试。",
            _ => "AI服务暂时不可用，请稍后再试。",
        }
    }
}

/// The completion service as the rest of the crate sees it: an ordered
/// message list in, either a finished completion or a delta stream out.
/// Implementations must not touch session state.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Single completion, no tools.
    async fn chat(&self, messages: &[ChatMessage]) -> Result<String>;

    /// Streamed completion; every delta goes through `callback` as it
    /// arrives, and the accumulated full text is returned at the end.
    async fn chat_streamed(
        &self,
        messages: &[ChatMessage],
        callback: &StreamingCallback,
    ) -> Result<String>;

    /// Single completion with tool schemas offered; tool calls are returned
    /// unresolved for the caller to execute.
    async fn chat_with_tools(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
    ) -> Result<ToolChatResponse>;
}

/// Run `operation` up to `max_attempts` times. Only errors classified
/// retryable by [`ApiError::is_retryable`] are attempted again, after a
/// linear backoff of `attempt * base_delay`. When the budget is spent the
/// last error is folded into a single [`ApiError::Exhausted`] carrying the
/// friendly translation.
pub async fn send_with_retry<T, F, Fut>(
    operation: F,
    max_attempts: u32,
    base_delay: Duration,
) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        let error = match operation().await {
            Ok(value) => return Ok(value),
            Err(error) => error,
        };

        let retryable = error
            .downcast_ref::<ApiError>()
            .map(ApiError::is_retryable)
            .unwrap_or(false);
        if !retryable {
            return Err(error);
        }

        if attempt >= max_attempts {
            let message = error
                .downcast_ref::<ApiError>()
                .map(ApiError::friendly_message)
                .unwrap_or("AI服务暂时不可用，请稍后再试。")
                .to_string();
            return Err(ApiError::Exhausted {
                message,
                attempts: max_attempts,
                detail: error.to_string(),
            }
            .into());
        }

        let delay = base_delay * attempt;
        warn!(
            "Upstream attempt {}/{} failed: {}, retrying in {}ms",
            attempt,
            max_attempts,
            error,
            delay.as_millis()
        );
        sleep(delay).await;
    }
}
