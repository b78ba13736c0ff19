use async_trait::async_trait;
use reqwest::Client;

use super::{CredentialProbe, ProbeOutcome, Provider, trim_base};

/// OpenAI-compatible providers that only differ in where their models
/// listing lives.
pub struct BearerModelsProbe {
    provider: Provider,
    url: String,
    client: Client,
}

impl BearerModelsProbe {
    pub fn new(provider: Provider, client: Client, base_url: &str, models_path: &str) -> Self {
        Self {
            provider,
            url: format!("{}{}", trim_base(base_url), models_path),
            client,
        }
    }
}

#[async_trait]
impl CredentialProbe for BearerModelsProbe {
    fn provider(&self) -> Provider {
        self.provider
    }

    async fn probe(&self, api_key: &str) -> ProbeOutcome {
        let res = self
            .client
            .get(&self.url)
            .bearer_auth(api_key)
            .send()
            .await;
        match res {
            Ok(res) => ProbeOutcome::from_status(self.provider, res.status()),
            Err(e) => ProbeOutcome::unreachable(self.provider, &e),
        }
    }
}
