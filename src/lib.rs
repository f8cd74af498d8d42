//! FilterProxy - A forward HTTP/HTTPS proxy
//!
//! - Plain HTTP requests are relayed to the origin named by the `Host` header
//! - CONNECT requests become opaque TCP tunnels (no TLS interception)
//! - CONNECT destinations can be rewritten by per-host filter rules
//! - Filter rules and the debug level hot-reload from a JSON document
//! - A fixed virtual host serves CA certificate downloads

pub mod certificate;
pub mod config;
pub mod debug;
pub mod error;
pub mod hostport;
pub mod proxy;
pub mod resolver;
pub mod tunnel;
pub mod watcher;

pub use certificate::CertificateResponder;
pub use config::{ConfigStore, FilterRule, Settings, SettingsDocument};
pub use debug::DebugGate;
pub use error::{ProxyError, Result};
pub use proxy::{ProxyConfig, ProxyServer};
pub use watcher::ConfigWatcher;
