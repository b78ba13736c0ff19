use async_trait::async_trait;
use reqwest::Client;

use super::{CredentialProbe, ProbeOutcome, Provider, trim_base};

pub struct OpenAiProbe {
    base_url: String,
    client: Client,
}

impl OpenAiProbe {
    pub fn new(client: Client, base_url: &str) -> Self {
        Self {
            base_url: trim_base(base_url),
            client,
        }
    }
}

#[async_trait]
impl CredentialProbe for OpenAiProbe {
    fn provider(&self) -> Provider {
        Provider::OpenAi
    }

    async fn probe(&self, api_key: &str) -> ProbeOutcome {
        let res = self
            .client
            .get(format!("{}/v1/models", self.base_url))
            .header("Authorization", format!("Bearer {}", api_key))
            .send()
            .await;
        match res {
            Ok(res) => ProbeOutcome::from_status(self.provider(), res.status()),
            Err(e) => ProbeOutcome::unreachable(self.provider(), &e),
        }
    }
}
