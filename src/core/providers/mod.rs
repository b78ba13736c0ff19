mod anthropic;
mod bearer;
mod google;
mod openai;

pub use anthropic::AnthropicProbe;
pub use bearer::BearerModelsProbe;
pub use google::GoogleProbe;
pub use openai::OpenAiProbe;

use anyhow::Result;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, warn};

use crate::core::config::ProviderEndpoints;

/// Third-party services a user can keep a key for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", try_from = "String")]
pub enum Provider {
    OpenAi,
    Anthropic,
    Google,
    Mistral,
    Groq,
}

impl Provider {
    pub const ALL: [Provider; 5] = [
        Provider::OpenAi,
        Provider::Anthropic,
        Provider::Google,
        Provider::Mistral,
        Provider::Groq,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::OpenAi => "openai",
            Provider::Anthropic => "anthropic",
            Provider::Google => "google",
            Provider::Mistral => "mistral",
            Provider::Groq => "groq",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Provider::OpenAi => "OpenAI",
            Provider::Anthropic => "Anthropic",
            Provider::Google => "Google Gemini",
            Provider::Mistral => "Mistral AI",
            Provider::Groq => "Groq",
        }
    }

    /// Name the workflow engine expects the decrypted key under.
    pub fn config_key(&self) -> &'static str {
        match self {
            Provider::OpenAi => "OPENAI_API_KEY",
            Provider::Anthropic => "ANTHROPIC_API_KEY",
            Provider::Google => "GOOGLE_API_KEY",
            Provider::Mistral => "MISTRAL_API_KEY",
            Provider::Groq => "GROQ_API_KEY",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unsupported provider '{0}'")]
pub struct UnknownProvider(pub String);

impl FromStr for Provider {
    type Err = UnknownProvider;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(Provider::OpenAi),
            "anthropic" | "claude" => Ok(Provider::Anthropic),
            "google" | "gemini" => Ok(Provider::Google),
            "mistral" => Ok(Provider::Mistral),
            "groq" => Ok(Provider::Groq),
            other => Err(UnknownProvider(other.to_string())),
        }
    }
}

impl TryFrom<String> for Provider {
    type Error = UnknownProvider;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Result of asking a provider whether it accepts a key.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProbeOutcome {
    pub provider: Provider,
    pub valid: bool,
    /// Upstream HTTP status, absent when the request never completed.
    pub status: Option<u16>,
    pub message: String,
}

impl ProbeOutcome {
    /// Map an upstream status onto valid/invalid. A 429 means the key was
    /// authenticated before being throttled.
    pub fn from_status(provider: Provider, status: StatusCode) -> Self {
        let (valid, message) = if status.is_success() {
            (true, format!("{} accepted the key", provider.display_name()))
        } else if status == StatusCode::TOO_MANY_REQUESTS {
            (
                true,
                format!(
                    "{} accepted the key but is rate limiting requests",
                    provider.display_name()
                ),
            )
        } else if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Self::rejected(provider, status);
        } else {
            (
                false,
                format!(
                    "{} returned unexpected status {}",
                    provider.display_name(),
                    status.as_u16()
                ),
            )
        };
        Self {
            provider,
            valid,
            status: Some(status.as_u16()),
            message,
        }
    }

    /// The provider refused the key. `status` is kept as sent, so providers
    /// that signal a bad key with something other than 401/403 still report
    /// what they actually answered.
    pub fn rejected(provider: Provider, status: StatusCode) -> Self {
        Self {
            provider,
            valid: false,
            status: Some(status.as_u16()),
            message: format!("{} rejected the key", provider.display_name()),
        }
    }

    /// Transport failure. reqwest errors can echo the URL, so only the error
    /// kind is kept; the Google probe carries the key in its query string.
    pub fn unreachable(provider: Provider, err: &reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            "timed out"
        } else if err.is_connect() {
            "connection failed"
        } else {
            "request failed"
        };
        Self {
            provider,
            valid: false,
            status: None,
            message: format!("{} could not be reached: {}", provider.display_name(), kind),
        }
    }
}

#[async_trait]
pub trait CredentialProbe: Send + Sync {
    fn provider(&self) -> Provider;

    /// One cheap authenticated request against the provider's API.
    async fn probe(&self, api_key: &str) -> ProbeOutcome;
}

pub(crate) fn trim_base(base_url: &str) -> String {
    base_url.trim_end_matches('/').to_string()
}

pub struct ProbeRegistry {
    probes: Vec<Box<dyn CredentialProbe>>,
}

impl Default for ProbeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ProbeRegistry {
    pub fn new() -> Self {
        Self { probes: Vec::new() }
    }

    /// One probe per supported provider, pointed at the configured endpoints.
    pub fn from_endpoints(endpoints: &ProviderEndpoints, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        let mut registry = Self::new();
        registry.register(Box::new(OpenAiProbe::new(client.clone(), &endpoints.openai)));
        registry.register(Box::new(AnthropicProbe::new(
            client.clone(),
            &endpoints.anthropic,
        )));
        registry.register(Box::new(GoogleProbe::new(client.clone(), &endpoints.google)));
        registry.register(Box::new(BearerModelsProbe::new(
            Provider::Mistral,
            client.clone(),
            &endpoints.mistral,
            "/v1/models",
        )));
        registry.register(Box::new(BearerModelsProbe::new(
            Provider::Groq,
            client,
            &endpoints.groq,
            "/openai/v1/models",
        )));
        Ok(registry)
    }

    pub fn register(&mut self, probe: Box<dyn CredentialProbe>) {
        info!("Registered credential probe: {}", probe.provider());
        self.probes.retain(|p| p.provider() != probe.provider());
        self.probes.push(probe);
    }

    pub fn get(&self, provider: Provider) -> Option<&dyn CredentialProbe> {
        self.probes
            .iter()
            .find(|p| p.provider() == provider)
            .map(|p| p.as_ref())
    }

    pub async fn probe(&self, provider: Provider, api_key: &str) -> ProbeOutcome {
        match self.get(provider) {
            Some(probe) => {
                let outcome = probe.probe(api_key).await;
                if outcome.valid {
                    info!(provider = provider.as_str(), "Credential probe passed");
                } else {
                    warn!(
                        provider = provider.as_str(),
                        status = outcome.status,
                        "Credential probe failed: {}",
                        outcome.message
                    );
                }
                outcome
            }
            None => ProbeOutcome {
                provider,
                valid: false,
                status: None,
                message: format!("No probe registered for {}", provider.display_name()),
            },
        }
    }
}
