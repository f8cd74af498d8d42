//! Destination rewrite for CONNECT targets.

use crate::config::Settings;
use tracing::trace;

/// Applies the filter rule for `host`, if any, to `(host, port)`.
///
/// The lookup is keyed strictly by the original hostname and happens once;
/// rules are never chained. The port override is applied before the host
/// override. A zero port or an empty host in a rule means "no override".
pub fn resolve(host: &str, port: u16, settings: &Settings) -> (String, u16) {
    let mut target = (host.to_string(), port);

    let Some(rule) = settings.filter(host) else {
        return target;
    };

    if let Some(port) = rule.port.filter(|&p| p != 0) {
        target.1 = port;
    }
    if let Some(host) = rule.host.as_deref().filter(|h| !h.is_empty()) {
        target.0 = host.to_string();
    }

    trace!(
        original_host = %host,
        original_port = port,
        host = %target.0,
        port = target.1,
        "Destination rewritten by filter"
    );

    target
}
