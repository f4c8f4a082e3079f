//! `GrokProvider` — xAI Grok adapter (OpenAI-compatible at a different host).
//!
//! xAI's Grok API shares OpenAI's wire shape exactly (same request/response JSON, same SSE
//! framing) so this adapter reuses [`crate::cloudllm::clients::common`]'s translation helpers
//! directly rather than delegating to [`OpenAIProvider`](super::openai::OpenAIProvider). It
//! exists as its own adapter type — not just a base-URL parameter on the OpenAI adapter — so the
//! provider registry can track distinct default models per vendor and so a future divergence in
//! wire shape doesn't require touching the OpenAI adapter.

use crate::cloudllm::client_wrapper::{
    LLMRequest, LLMResponse, LLMStreamChunkStream, ProviderAdapter, ProviderError,
};
use crate::cloudllm::clients::common::{
    build_openai_request, decode_openai_sse, parse_openai_response,
};
use crate::cloudllm::clients::http_pool::get_http_client;
use futures::future::BoxFuture;

/// Adapter for xAI's Grok models, reached through an OpenAI-compatible `/chat/completions`
/// endpoint at `https://api.x.ai/v1`.
pub struct GrokProvider {
    api_key: String,
    base_url: String,
    client: reqwest::Client,
}

impl GrokProvider {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_base_url(api_key, "https://api.x.ai/v1")
    }

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
impl ProviderAdapter for GrokProvider {
    fn provider_name(&self) -> &str {
        "grok"
    }

    async fn complete(&self, req: &LLMRequest) -> Result<LLMResponse, ProviderError> {
        let body = build_openai_request(req);
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
    fn provider_name_is_grok() {
        let p = GrokProvider::new("xai-test");
        assert_eq!(p.provider_name(), "grok");
    }
}
