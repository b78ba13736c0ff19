use anyhow::{Result, anyhow};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_API_HOST: &str = "127.0.0.1";
pub const DEFAULT_API_PORT: u16 = 18790;
pub const DEFAULT_EXECUTION_TIMEOUT_SECS: u64 = 120;
pub const DEFAULT_PROBE_TIMEOUT_SECS: u64 = 15;
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Upstream base URLs used by the credential probes. Overridable so tests and
/// self-hosted gateways can point at something other than the public APIs.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProviderEndpoints {
    pub openai: String,
    pub anthropic: String,
    pub google: String,
    pub mistral: String,
    pub groq: String,
}

impl Default for ProviderEndpoints {
    fn default() -> Self {
        Self {
            openai: "https://api.openai.com".to_string(),
            anthropic: "https://api.anthropic.com".to_string(),
            google: "https://generativelanguage.googleapis.com".to_string(),
            mistral: "https://api.mistral.ai".to_string(),
            groq: "https://api.groq.com".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub api_host: String,
    pub api_port: u16,
    /// Base URL of the workflow engine; `engine_base_url` in system_config overrides it.
    pub engine_url: Option<String>,
    pub engine_api_key: Option<String>,
    /// Master secret for the credential vault. 64 hex chars are used as-is,
    /// anything else is stretched. Unset means a generated `vault.key`.
    pub encryption_key: Option<String>,
    pub execution_timeout_secs: u64,
    pub probe_timeout_secs: u64,
    pub log: String,
    pub providers: ProviderEndpoints,
    #[serde(skip)]
    pub data_dir: PathBuf,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_host: DEFAULT_API_HOST.to_string(),
            api_port: DEFAULT_API_PORT,
            engine_url: None,
            engine_api_key: None,
            encryption_key: None,
            execution_timeout_secs: DEFAULT_EXECUTION_TIMEOUT_SECS,
            probe_timeout_secs: DEFAULT_PROBE_TIMEOUT_SECS,
            log: "info".to_string(),
            providers: ProviderEndpoints::default(),
            data_dir: PathBuf::new(),
        }
    }
}

impl AppConfig {
    /// Defaults, then `config.toml` in `data_dir`, then process environment.
    pub fn load(data_dir: &Path) -> Result<Self> {
        let path = data_dir.join(CONFIG_FILE_NAME);
        let mut config = if path.exists() {
            let raw = std::fs::read_to_string(&path)?;
            Self::from_toml(&raw).map_err(|e| anyhow!("{}: {}", path.display(), e))?
        } else {
            Self::default()
        };
        config.data_dir = data_dir.to_path_buf();
        config.apply_env(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    /// Apply `VIEAGENT_*` overrides. Takes a lookup so callers other than
    /// `load` can feed values without touching the process environment.
    /// Blank values are skipped; a numeric value that does not parse is an error.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(host) = get("VIEAGENT_API_HOST") {
            self.api_host = host;
        }
        if let Some(port) = get("VIEAGENT_API_PORT") {
            self.api_port = parse_env_number("VIEAGENT_API_PORT", &port)?;
        }
        if let Some(url) = get("VIEAGENT_ENGINE_URL") {
            self.engine_url = Some(url);
        }
        if let Some(key) = get("VIEAGENT_ENGINE_API_KEY") {
            self.engine_api_key = Some(key);
        }
        if let Some(key) = get("VIEAGENT_ENCRYPTION_KEY") {
            self.encryption_key = Some(key);
        }
        if let Some(secs) = get("VIEAGENT_EXECUTION_TIMEOUT_SECS") {
            self.execution_timeout_secs = parse_env_number("VIEAGENT_EXECUTION_TIMEOUT_SECS", &secs)?;
        }
        if let Some(secs) = get("VIEAGENT_PROBE_TIMEOUT_SECS") {
            self.probe_timeout_secs = parse_env_number("VIEAGENT_PROBE_TIMEOUT_SECS", &secs)?;
        }
        if let Some(directive) = get("VIEAGENT_LOG") {
            self.log = directive;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.api_port == 0 {
            return Err(anyhow!("api_port must be non-zero"));
        }
        if self.execution_timeout_secs == 0 || self.probe_timeout_secs == 0 {
            return Err(anyhow!("timeouts must be at least one second"));
        }
        if let Some(url) = &self.engine_url {
            validate_http_url(url)?;
        }
        Ok(())
    }

    pub fn execution_timeout(&self) -> Duration {
        Duration::from_secs(self.execution_timeout_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("vieagent.db")
    }
}

fn parse_env_number<T>(name: &str, raw: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e| anyhow!("{} must be a number, got '{}': {}", name, raw, e))
}

pub fn validate_http_url(raw: &str) -> Result<()> {
    let parsed = url::Url::parse(raw).map_err(|e| anyhow!("invalid URL '{}': {}", raw, e))?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(anyhow!("unsupported URL scheme '{}' in '{}'", other, raw)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_are_loopback() {
        let config = AppConfig::default();
        assert_eq!(config.api_host, "127.0.0.1");
        assert_eq!(config.api_port, DEFAULT_API_PORT);
        assert!(config.engine_url.is_none());
        assert_eq!(config.providers.openai, "https://api.openai.com");
    }

    #[test]
    fn toml_overrides_only_given_fields() {
        let raw = r#"
api_port = 9000
engine_url = "http://engine.local:5678"

[providers]
openai = "http://127.0.0.1:9999"
"#;
        let config = AppConfig::from_toml(raw).unwrap();
        assert_eq!(config.api_port, 9000);
        assert_eq!(config.api_host, DEFAULT_API_HOST);
        assert_eq!(config.engine_url.as_deref(), Some("http://engine.local:5678"));
        assert_eq!(config.providers.openai, "http://127.0.0.1:9999");
        assert_eq!(config.providers.groq, "https://api.groq.com");
    }

    #[test]
    fn env_overrides_win_and_blank_values_are_ignored() {
        let env: HashMap<&str, &str> = [
            ("VIEAGENT_API_PORT", "18000"),
            ("VIEAGENT_ENGINE_URL", "https://n8n.example.com"),
            ("VIEAGENT_API_HOST", "   "),
            ("VIEAGENT_EXECUTION_TIMEOUT_SECS", ""),
            ("VIEAGENT_PROBE_TIMEOUT_SECS", " 7 "),
        ]
        .into_iter()
        .collect();

        let mut config = AppConfig::default();
        config
            .apply_env(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.api_port, 18000);
        assert_eq!(config.engine_url.as_deref(), Some("https://n8n.example.com"));
        assert_eq!(config.api_host, DEFAULT_API_HOST);
        assert_eq!(config.execution_timeout_secs, DEFAULT_EXECUTION_TIMEOUT_SECS);
        assert_eq!(config.probe_timeout_secs, 7);
    }

    #[test]
    fn unparsable_numeric_env_values_are_errors() {
        for name in [
            "VIEAGENT_API_PORT",
            "VIEAGENT_EXECUTION_TIMEOUT_SECS",
            "VIEAGENT_PROBE_TIMEOUT_SECS",
        ] {
            let mut config = AppConfig::default();
            let err = config
                .apply_env(|k| (k == name).then(|| "abc".to_string()))
                .unwrap_err();
            assert!(err.to_string().contains(name), "{}", err);
            assert_eq!(config.api_port, DEFAULT_API_PORT);
        }

        let mut config = AppConfig::default();
        let err = config
            .apply_env(|k| (k == "VIEAGENT_API_PORT").then(|| "70000".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("VIEAGENT_API_PORT"));
    }

    #[test]
    fn validate_rejects_non_http_engine_url() {
        let config = AppConfig {
            engine_url: Some("ftp://engine".to_string()),
            ..AppConfig::default()
        };
        assert!(config.validate().is_err());

        let config = AppConfig {
            engine_url: Some("http://engine:5678".to_string()),
            ..AppConfig::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn load_reads_config_file_from_data_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE_NAME),
            "probe_timeout_secs = 3\nlog = \"debug\"\n",
        )
        .unwrap();
        let config = AppConfig::load(dir.path()).unwrap();
        assert_eq!(config.data_dir, dir.path());
        assert_eq!(config.db_path(), dir.path().join("vieagent.db"));
        assert_eq!(config.probe_timeout(), Duration::from_secs(3));
    }
}
