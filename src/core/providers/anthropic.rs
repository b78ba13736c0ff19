use async_trait::async_trait;
use reqwest::Client;

use super::{CredentialProbe, ProbeOutcome, Provider, trim_base};

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Anthropic authenticates with `x-api-key` rather than a bearer token and
/// refuses requests without an API version header.
pub struct AnthropicProbe {
    base_url: String,
    client: Client,
}

impl AnthropicProbe {
    pub fn new(client: Client, base_url: &str) -> Self {
        Self {
            base_url: trim_base(base_url),
            client,
        }
    }
}

#[async_trait]
impl CredentialProbe for AnthropicProbe {
    fn provider(&self) -> Provider {
        Provider::Anthropic
    }

    async fn probe(&self, api_key: &str) -> ProbeOutcome {
        let res = self
            .client
            .get(format!("{}/v1/models", self.base_url))
            .header("x-api-key", api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .send()
            .await;
        match res {
            Ok(res) => ProbeOutcome::from_status(self.provider(), res.status()),
            Err(e) => ProbeOutcome::unreachable(self.provider(), &e),
        }
    }
}
