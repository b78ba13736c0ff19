mod config;
mod serve;
mod tokens;

use anyhow::Result;
use console::style;

use crate::core::config::AppConfig;
use crate::core::terminal::{self, GuideSection, print_error};
use crate::platform::{NativePlatform, Platform};

fn print_help() {
    terminal::print_banner();

    GuideSection::new("Server")
        .command("serve", "Start the API server")
        .text("--api-host <host>   Interface to bind (default: 127.0.0.1)")
        .text("--api-port <port>   Port to listen on (default: 18790)")
        .print();

    GuideSection::new("Access")
        .command("token create", "Issue an API token (--user <id> [--admin] [--name <n>])")
        .command("token list", "List issued tokens")
        .command("token revoke", "Revoke a token by id")
        .print();

    GuideSection::new("Setup")
        .command("keygen", "Print a fresh 256-bit vault key")
        .command("config", "Show the effective configuration")
        .print();

    println!(
        "\n {} {} <command> [options]\n",
        style("Usage:").bold(),
        style("vieagent").green()
    );
}

/// Reads `--api-host` / `--api-port` after `start`, keeping the given values
/// when a flag is absent or malformed.
pub(crate) fn parse_api_server_flags(
    args: &[String],
    start: usize,
    mut api_host: String,
    mut api_port: u16,
) -> (String, u16) {
    let mut i = start;
    while i < args.len() {
        match args[i].as_str() {
            "--api-port" => {
                if i + 1 < args.len() {
                    api_port = args[i + 1].parse().unwrap_or(api_port);
                    i += 2;
                } else {
                    i += 1;
                }
            }
            "--api-host" => {
                if i + 1 < args.len() {
                    api_host = args[i + 1].clone();
                    i += 2;
                } else {
                    i += 1;
                }
            }
            _ => i += 1,
        }
    }
    (api_host, api_port)
}

fn load_config() -> Result<AppConfig> {
    AppConfig::load(&NativePlatform::data_dir())
}

pub async fn run_main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();

    let Some(cmd) = args.get(1).map(String::as_str) else {
        print_help();
        return Ok(());
    };

    match cmd {
        "serve" => {
            let mut config = load_config()?;
            (config.api_host, config.api_port) =
                parse_api_server_flags(&args, 2, config.api_host.clone(), config.api_port);
            config.validate()?;
            serve::run_server(config).await
        }
        "token" | "tokens" => {
            let config = load_config()?;
            tokens::run_token_command(&config, &args).await
        }
        "keygen" => {
            config::run_keygen();
            Ok(())
        }
        "config" => {
            let config = load_config()?;
            config::show_config(&config);
            Ok(())
        }
        "help" | "--help" | "-h" => {
            print_help();
            Ok(())
        }
        "version" | "--version" | "-V" => {
            println!("vieagent {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        _ => {
            print_error(&format!("Unknown command: {}", cmd));
            print_help();
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::parse_api_server_flags;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parse_api_server_flags_reads_host_and_port() {
        let args = args(&[
            "vieagent",
            "serve",
            "--api-host",
            "0.0.0.0",
            "--api-port",
            "19000",
        ]);
        let (host, port) = parse_api_server_flags(&args, 2, "127.0.0.1".to_string(), 18790);
        assert_eq!(host, "0.0.0.0");
        assert_eq!(port, 19000);
    }

    #[test]
    fn malformed_port_keeps_configured_value() {
        let args = args(&["vieagent", "serve", "--api-port", "lots", "--api-host"]);
        let (host, port) = parse_api_server_flags(&args, 2, "127.0.0.1".to_string(), 18790);
        assert_eq!(host, "127.0.0.1");
        assert_eq!(port, 18790);
    }
}
