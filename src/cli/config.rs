use console::style;

use crate::core::config::{AppConfig, CONFIG_FILE_NAME};
use crate::core::store::MASKED_VALUE;
use crate::core::terminal::GuideSection;
use crate::core::vault::generate_hex_key;

fn masked(value: Option<&str>) -> String {
    match value {
        Some(v) if !v.is_empty() => MASKED_VALUE.to_string(),
        _ => "(unset)".to_string(),
    }
}

/// Label/value rows for `vieagent config`. Secrets never appear in clear.
pub(crate) fn describe_config(config: &AppConfig) -> Vec<(&'static str, String)> {
    vec![
        ("Data dir", config.data_dir.display().to_string()),
        (
            "Config file",
            config.data_dir.join(CONFIG_FILE_NAME).display().to_string(),
        ),
        ("Database", config.db_path().display().to_string()),
        ("API", format!("{}:{}", config.api_host, config.api_port)),
        (
            "Engine URL",
            config
                .engine_url
                .clone()
                .unwrap_or_else(|| "(unset)".to_string()),
        ),
        ("Engine key", masked(config.engine_api_key.as_deref())),
        (
            "Vault key",
            match config.encryption_key.as_deref() {
                Some(_) => MASKED_VALUE.to_string(),
                None => "vault.key in data dir".to_string(),
            },
        ),
        (
            "Execution timeout",
            format!("{}s", config.execution_timeout_secs),
        ),
        ("Probe timeout", format!("{}s", config.probe_timeout_secs)),
        ("Log filter", config.log.clone()),
    ]
}

pub fn show_config(config: &AppConfig) {
    let mut section = GuideSection::new("Effective configuration");
    for (label, value) in describe_config(config) {
        section = section.status(label, &value);
    }
    section
        .blank()
        .info("Settings stored through /api/admin/config override the engine values.")
        .print();
    println!();
}

pub fn run_keygen() {
    let key = generate_hex_key();
    println!("\n  {} {}\n", style("Key:").bold(), style(&key).green().bold());
    GuideSection::new("Use it")
        .hint(&format!("VIEAGENT_ENCRYPTION_KEY={} vieagent serve", key), "")
        .hint(&format!("encryption_key = \"{}\"", key), "config.toml")
        .warn("Changing the key makes stored credentials undecryptable.")
        .print();
    println!();
}
