use anyhow::Result;
use console::style;

use crate::core::config::AppConfig;
use crate::core::store::{Role, Store};
use crate::core::terminal::{print_error, print_info, print_success};

#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct TokenArgs {
    pub user: Option<String>,
    pub admin: bool,
    pub name: Option<String>,
    pub id: Option<String>,
}

/// Options after `token <sub>`. The first bare word is the token id for
/// `revoke`.
pub(crate) fn parse_token_args(args: &[String], start: usize) -> TokenArgs {
    let mut parsed = TokenArgs::default();
    let mut i = start;
    while i < args.len() {
        match args[i].as_str() {
            "--user" | "-u" => {
                if i + 1 < args.len() {
                    parsed.user = Some(args[i + 1].clone());
                    i += 2;
                } else {
                    i += 1;
                }
            }
            "--name" | "-n" => {
                if i + 1 < args.len() {
                    parsed.name = Some(args[i + 1].clone());
                    i += 2;
                } else {
                    i += 1;
                }
            }
            "--admin" => {
                parsed.admin = true;
                i += 1;
            }
            other => {
                if parsed.id.is_none() && !other.starts_with('-') {
                    parsed.id = Some(other.to_string());
                }
                i += 1;
            }
        }
    }
    parsed
}

fn print_usage() {
    println!(
        "{}",
        style("Usage: vieagent token <command> [options]").bold()
    );
    println!("  • create --user <id> [--admin] [--name <label>]   Issue a new API token");
    println!("  • list                                            List issued tokens");
    println!("  • revoke <token_id>                               Revoke a token");
}

pub async fn run_token_command(config: &AppConfig, args: &[String]) -> Result<()> {
    let sub_cmd = args.get(2).map(String::as_str).unwrap_or("");
    let parsed = parse_token_args(args, 3);

    match sub_cmd {
        "create" => {
            let Some(user) = parsed.user.as_deref().map(str::trim).filter(|u| !u.is_empty())
            else {
                println!(
                    "{}",
                    style("Usage: vieagent token create --user <id> [--admin] [--name <label>]")
                        .bold()
                );
                return Ok(());
            };
            let role = if parsed.admin { Role::Admin } else { Role::User };
            let name = parsed.name.as_deref().unwrap_or("cli");

            let store = Store::open(&config.db_path())?;
            let (raw, record) = store.create_api_token(user, role, name).await?;

            println!();
            print_success(&format!(
                "{} token '{}' created for user '{}'.",
                if parsed.admin { "Admin" } else { "User" },
                record.name,
                record.user_id
            ));
            println!("\n  {} {}\n", style("Token:").bold(), style(&raw).green().bold());
            println!(
                "  {} Save this token now. It will not be shown again.",
                style("⚠").yellow()
            );
            println!(
                "  {} Use it with: Authorization: Bearer {}\n",
                style("→").cyan(),
                raw
            );
        }
        "list" | "ls" => {
            let store = Store::open(&config.db_path())?;
            let tokens = store.list_api_tokens().await?;
            if tokens.is_empty() {
                print_info("No API tokens issued.");
                return Ok(());
            }
            println!("\n  {} API tokens:\n", style("●").cyan());
            for token in &tokens {
                println!(
                    "  {} {} [{}] user: {}  id: {}  created: {}",
                    style("→").cyan(),
                    style(&token.name).white().bold(),
                    token.role.as_str(),
                    token.user_id,
                    style(&token.id).dim(),
                    style(&token.created_at).dim()
                );
            }
            println!();
        }
        "revoke" | "delete" | "rm" => {
            let Some(id) = parsed.id.as_deref() else {
                println!(
                    "{}",
                    style("Usage: vieagent token revoke <token_id>").bold()
                );
                return Ok(());
            };
            let store = Store::open(&config.db_path())?;
            if store.delete_api_token(id).await? {
                print_success("Token revoked.");
            } else {
                print_error(&format!("No token with id '{}'.", id));
            }
        }
        _ => print_usage(),
    }

    Ok(())
}
