//! `OpenAIProvider` — OpenAI chat-completions adapter.
//!
//! Wire shape: `Authorization: Bearer <key>` auth, `choices[0].message` carrying
//! content/tool_calls, SSE streaming framed with `data: ` lines terminated by the literal
//! `data: [DONE]`.

use crate::cloudllm::client_wrapper::{
    LLMRequest, LLMResponse, LLMStreamChunkStream, ProviderAdapter, ProviderError,
};
use crate::cloudllm::clients::common::{
    build_openai_request, decode_openai_sse, parse_openai_response,
};
use crate::cloudllm::clients::http_pool::get_http_client;
use futures::future::BoxFuture;
use log::{debug, log_enabled, Level};

/// Adapter for OpenAI's `/chat/completions` endpoint and any endpoint sharing its wire shape.
pub struct OpenAIProvider {
    api_key: String,
    base_url: String,
    client: reqwest::Client,
}

impl OpenAIProvider {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_base_url(api_key, "https://api.openai.com/v1")
    }

    /// Construct an adapter pointed at a custom base URL, sharing the connection-pooled
    /// `reqwest::Client` keyed by that URL (see [`crate::cloudllm::clients::http_pool`]).
    pub fn with_base_url(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        let client = get_http_client(&base_url);
        Self {
            api_key: api_key.into(),
            base_url,
            client,
        }
    }
}

#[async_trait::async_trait]
impl ProviderAdapter for OpenAIProvider {
    fn provider_name(&self) -> &str {
        "openai"
    }

    fn supports_structured_output(&self) -> bool {
        true
    }

    async fn complete(&self, req: &LLMRequest) -> Result<LLMResponse, ProviderError> {
        let body = build_openai_request(req);
        if log_enabled!(Level::Debug) {
            debug!(
                "openai request model={} messages={}",
                req.model,
                req.messages.len()
            );
        }

        let url = format!("{}/chat/completions", self.base_url);
        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(ProviderError::Http {
                status: status.as_u16(),
                body: text,
            });
        }

        let json_body: serde_json::Value = resp.json().await?;
        parse_openai_response(json_body)
    }

    fn stream_complete<'a>(
        &'a self,
        req: &'a LLMRequest,
    ) -> BoxFuture<'a, Result<Option<LLMStreamChunkStream>, ProviderError>> {
        Box::pin(async move {
            let mut body = build_openai_request(req);
            body["stream"] = serde_json::Value::Bool(true);

            let url = format!("{}/chat/completions", self.base_url);
            let resp = self
                .client
                .post(&url)
                .bearer_auth(&self.api_key)
                .json(&body)
                .send()
                .await?;

            let status = resp.status();
            if !status.is_success() {
                let text = resp.text().await.unwrap_or_default();
                return Err(ProviderError::Http {
                    status: status.as_u16(),
                    body: text,
                });
            }

            Ok(Some(decode_openai_sse(resp.bytes_stream())))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_name_is_openai() {
        let p = OpenAIProvider::new("sk-test");
        assert_eq!(p.provider_name(), "openai");
        assert!(p.supports_structured_output());
    }
}
