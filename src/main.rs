//! FilterProxy - Main entry point
//!
//! A forward HTTP/HTTPS proxy with hot-reloadable destination filters

use anyhow::{Context, Result};
use clap::Parser;
use filterproxy::certificate::{DEFAULT_CERT_DIR, DEFAULT_CERT_HOST};
use filterproxy::config::{load_document, DEFAULT_CONFIG_PATH};
use filterproxy::proxy::DEFAULT_LISTEN_PORT;
use filterproxy::{
    CertificateResponder, ConfigStore, ConfigWatcher, ProxyConfig, ProxyError, ProxyServer,
    Settings, SettingsDocument,
};
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// FilterProxy - A forward HTTP/HTTPS proxy
#[derive(Parser, Debug)]
#[command(name = "filterproxy")]
#[command(author = "FilterProxy Contributors")]
#[command(version = "1.0.0")]
#[command(about = "A forward HTTP/HTTPS proxy with hot-reloadable destination filters")]
struct Args {
    /// Port to listen on (default: `port` from the config document, else 8888)
    #[arg(short = 'p', long, env = "PROXY_PORT")]
    port: Option<u16>,

    /// Debug level; `-d` on its own means 1
    #[arg(short = 'd', long, num_args = 0..=1, default_missing_value = "1")]
    debug: Option<u32>,

    /// Filter config document
    #[arg(short = 'c', long, env = "PROXY_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Directory served to the certificate download host
    #[arg(long, default_value = DEFAULT_CERT_DIR)]
    cert_dir: PathBuf,

    /// Virtual host that selects certificate downloads
    #[arg(long, default_value = DEFAULT_CERT_HOST)]
    cert_host: String,

    /// Do not reload the config document when it changes
    #[arg(long)]
    no_watch: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging; the debug level decides what the relay emits
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,filterproxy=trace,hyper=warn"));

    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();

    let document = match load_document(&args.config) {
        Ok(document) => document,
        Err(ProxyError::ConfigRead { source, .. }) if source.kind() == ErrorKind::NotFound => {
            warn!(
                "Config {} not found, starting without filters",
                args.config.display()
            );
            SettingsDocument::default()
        }
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to load {}", args.config.display()))
        }
    };

    let mut settings = Settings::default();
    settings.merge(&document, None);
    if let Some(debug) = args.debug {
        settings.debug = debug;
    }
    let port = args.port.or(document.port).unwrap_or(DEFAULT_LISTEN_PORT);

    info!(
        "Loaded {} filter(s), debug level {}",
        settings.filters.len(),
        settings.debug
    );

    let store = Arc::new(ConfigStore::new(settings));

    // Keep the watcher alive for the lifetime of the server
    let _watcher = if args.no_watch {
        None
    } else {
        match ConfigWatcher::new(&args.config, store.clone()).run() {
            Ok(watcher) => Some(watcher),
            Err(e) => {
                warn!("Config hot reload disabled: {}", e);
                None
            }
        }
    };

    let config = ProxyConfig {
        port,
        ..ProxyConfig::default()
    };
    let certs = CertificateResponder::new(args.cert_dir, args.cert_host);

    let server = Arc::new(ProxyServer::new(config, store, certs));
    server.run().await.context("Proxy server failed")?;

    Ok(())
}
