use async_trait::async_trait;
use reqwest::Client;

use super::{CredentialProbe, ProbeOutcome, Provider, trim_base};

pub struct GoogleProbe {
    base_url: String,
    client: Client,
}

impl GoogleProbe {
    pub fn new(client: Client, base_url: &str) -> Self {
        Self {
            base_url: trim_base(base_url),
            client,
        }
    }
}

#[async_trait]
impl CredentialProbe for GoogleProbe {
    fn provider(&self) -> Provider {
        Provider::Google
    }

    async fn probe(&self, api_key: &str) -> ProbeOutcome {
        // Gemini takes the key as a query parameter and answers a bad key
        // with 400 INVALID_ARGUMENT rather than 401.
        let res = self
            .client
            .get(format!("{}/v1beta/models", self.base_url))
            .query(&[("key", api_key), ("pageSize", "1")])
            .send()
            .await;
        match res {
            Ok(res) if res.status() == reqwest::StatusCode::BAD_REQUEST => {
                ProbeOutcome::rejected(self.provider(), res.status())
            }
            Ok(res) => ProbeOutcome::from_status(self.provider(), res.status()),
            Err(e) => ProbeOutcome::unreachable(self.provider(), &e),
        }
    }
}
