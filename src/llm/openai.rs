use async_trait::async_trait;
use futures_util::StreamExt;

use crate::errors::{EmuPilotError, EmuPilotResult};
use crate::llm::client::{CompletionClient, TokenSink};
use crate::llm::registry::ProviderKind;
use crate::llm::sse;
use crate::llm::types::{ChatMessage, CompletionRequest, StreamChunkKind};

/// Chat-completion client for any OpenAI-compatible endpoint. OpenRouter
/// and Ollama both speak this dialect.
pub struct OpenAiCompatClient {
    kind: ProviderKind,
    api_base: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAiCompatClient {
    pub fn new(
        kind: ProviderKind,
        api_base: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            api_base: api_base.into(),
            api_key: api_key.into(),
            client: reqwest::Client::new(),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.api_base.trim_end_matches('/'))
    }

    fn wire_messages(request: &CompletionRequest) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(request.messages.len() + 1);
        if let Some(prompt) = &request.system_prompt {
            messages.push(ChatMessage::system(prompt.clone()));
        }
        messages.extend(request.messages.iter().cloned());
        messages
    }

    fn build_body(request: &CompletionRequest, stream: bool) -> serde_json::Value {
        serde_json::json!({
            "model": request.model,
            "messages": Self::wire_messages(request),
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
            "stream": stream,
        })
    }

    async fn post(&self, body: &serde_json::Value) -> EmuPilotResult<reqwest::Response> {
        tracing::debug!(
            provider = %self.kind,
            endpoint = %self.endpoint(),
            "sending completion request"
        );
        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let err_body = response.text().await.unwrap_or_default();
            return Err(EmuPilotError::upstream(Some(status), err_body));
        }
        Ok(response)
    }
}

#[async_trait]
impl CompletionClient for OpenAiCompatClient {
    fn provider(&self) -> ProviderKind {
        self.kind
    }

    async fn generate(&self, request: &CompletionRequest) -> EmuPilotResult<String> {
        let body = Self::build_body(request, false);
        let response = self.post(&body).await?;
        let json: serde_json::Value = response.json().await?;

        let content = json["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| {
                EmuPilotError::upstream(None, "response carried no completion choice")
            })?
            .to_string();

        tracing::info!(
            provider = %self.kind,
            model = %request.model,
            content_len = content.len(),
            "completion received"
        );
        Ok(content)
    }

    async fn stream(
        &self,
        request: &CompletionRequest,
        on_token: TokenSink<'_>,
    ) -> EmuPilotResult<String> {
        let body = Self::build_body(request, true);
        let response = self.post(&body).await?;

        let mut byte_stream = response.bytes_stream();
        let mut line_buf = String::new();
        let mut accumulated = String::new();

        'stream: while let Some(result) = byte_stream.next().await {
            let bytes = result?;
            let text = String::from_utf8_lossy(&bytes);

            for ch in text.chars() {
                if ch != '\n' {
                    line_buf.push(ch);
                    continue;
                }
                let line = line_buf.trim().to_string();
                line_buf.clear();
                if line.is_empty() {
                    continue;
                }

                match sse::parse_sse_line(&line) {
                    Ok(Some(chunk)) => match chunk.kind {
                        StreamChunkKind::Content => {
                            on_token(&chunk.content);
                            accumulated.push_str(&chunk.content);
                        }
                        StreamChunkKind::Done => break 'stream,
                        StreamChunkKind::Error => {
                            return Err(EmuPilotError::upstream(None, chunk.content));
                        }
                    },
                    Ok(None) => {}
                    Err(e) => {
                        tracing::debug!("SSE parse skipped: {e}");
                    }
                }
            }
        }

        tracing::info!(
            provider = %self.kind,
            model = %request.model,
            content_len = accumulated.len(),
            "completion stream complete"
        );
        Ok(accumulated)
    }
}
