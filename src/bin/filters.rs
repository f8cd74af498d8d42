//! CLI tool for managing CONNECT filter rules
//!
//! Usage:
//!   filterproxy-filters list [--json]
//!   filterproxy-filters add <host> [--to-host <host>] [--to-port <port>]
//!   filterproxy-filters remove <host>
//!   filterproxy-filters debug <level>
//!
//! Edits the config document in place; a running proxy reloads it.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use filterproxy::config::{load_document, save_document, DEFAULT_CONFIG_PATH};
use filterproxy::{FilterRule, ProxyError, SettingsDocument};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// CLI tool for managing proxy filter rules
#[derive(Parser, Debug)]
#[command(name = "filterproxy-filters")]
#[command(author = "FilterProxy Contributors")]
#[command(version = "1.0.0")]
#[command(about = "Manage CONNECT filter rules for FilterProxy")]
struct Args {
    /// Filter config document
    #[arg(short = 'c', long, env = "PROXY_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List all filter rules
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Add a rule, or update the existing rule for the host
    Add {
        /// Original hostname as requested by clients (e.g., api.example.com)
        host: String,

        /// Host to connect to instead
        #[arg(long)]
        to_host: Option<String>,

        /// Port to connect to instead
        #[arg(long)]
        to_port: Option<u16>,
    },

    /// Remove the rule for a host
    Remove {
        /// Original hostname
        host: String,
    },

    /// Set the debug level
    Debug {
        /// Verbosity level (0 disables relay logging)
        level: u32,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();
    let mut document = read_or_default(&args.config)?;

    match args.command {
        Commands::List { json } => {
            let rules: Vec<(&String, &FilterRule)> = document
                .filters
                .iter()
                .flatten()
                .filter_map(|(host, rule)| rule.as_ref().map(|rule| (host, rule)))
                .collect();

            if json {
                let mut json_output = serde_json::Map::new();
                for (host, rule) in &rules {
                    json_output.insert((*host).clone(), serde_json::to_value(rule)?);
                }
                println!("{}", serde_json::to_string_pretty(&json_output)?);
                return Ok(());
            }

            if rules.is_empty() {
                println!("No filters configured");
                return Ok(());
            }

            println!("{:<40} {:<40} {:<8}", "HOST", "CONNECT TO", "PORT");
            println!("{}", "-".repeat(88));
            for (host, rule) in &rules {
                println!(
                    "{:<40} {:<40} {:<8}",
                    host,
                    rule.host.as_deref().unwrap_or("(same)"),
                    rule.port
                        .map(|p| p.to_string())
                        .unwrap_or_else(|| "(same)".to_string())
                );
            }
            println!("\nTotal: {} filter(s)", rules.len());
            return Ok(());
        }

        Commands::Add {
            host,
            to_host,
            to_port,
        } => {
            let update = FilterRule {
                host: to_host,
                port: to_port,
            };
            if update.is_empty() {
                bail!("nothing to change: pass --to-host and/or --to-port");
            }

            let rule = document
                .filters
                .get_or_insert_with(Default::default)
                .entry(host.clone())
                .or_insert(None)
                .get_or_insert_with(FilterRule::default);
            rule.merge(&update);

            println!("Filter for {}:", host);
            print_rule(rule);
        }

        Commands::Remove { host } => {
            let removed = document
                .filters
                .as_mut()
                .and_then(|filters| filters.remove(&host))
                .is_some();

            if !removed {
                eprintln!("No filter found for {}", host);
                std::process::exit(1);
            }
            println!("Removed filter for {}", host);
        }

        Commands::Debug { level } => {
            document.debug = Some(level);
            println!("Debug level set to {}", level);
        }
    }

    save_document(&args.config, &document)
        .with_context(|| format!("Failed to write {}", args.config.display()))?;

    Ok(())
}

fn read_or_default(path: &Path) -> Result<SettingsDocument> {
    match load_document(path) {
        Ok(document) => Ok(document),
        Err(ProxyError::ConfigRead { source, .. }) if source.kind() == ErrorKind::NotFound => {
            Ok(SettingsDocument::default())
        }
        Err(e) => Err(e).with_context(|| format!("Failed to load {}", path.display())),
    }
}

fn print_rule(rule: &FilterRule) {
    if let Some(ref host) = rule.host {
        println!("  Host:  {}", host);
    }
    if let Some(port) = rule.port {
        println!("  Port:  {}", port);
    }
}
