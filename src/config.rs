//! Runtime configuration: filter rules and debug level.
//!
//! The on-disk document (`hostfilters.json`) is parsed into a
//! [`SettingsDocument`], merged into a fresh [`Settings`] snapshot and
//! published through a [`ConfigStore`]. Readers take an `Arc<Settings>`
//! per request and never see a half-applied reload.

use crate::error::{ProxyError, Result};
use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

/// Default location of the config document, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "./config/hostfilters.json";

/// Destination override for one original hostname.
///
/// Also used as the document form of a rule, where `null` and missing
/// fields both mean "not set".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterRule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

impl FilterRule {
    /// Assigns every field that is set in `source`.
    pub fn merge(&mut self, source: &FilterRule) {
        if let Some(host) = &source.host {
            self.host = Some(host.clone());
        }
        if let Some(port) = source.port {
            self.port = Some(port);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.host.is_none() && self.port.is_none()
    }
}

/// An immutable configuration snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Settings {
    /// Verbosity threshold for the debug gate.
    pub debug: u32,
    /// Override rules keyed by the original requested hostname.
    pub filters: BTreeMap<String, FilterRule>,
}

impl Settings {
    /// Structural merge of a parsed document into this snapshot.
    ///
    /// Keys absent from `source` are left untouched and `null` values are
    /// ignored. A filter entry missing from `self` is first initialized
    /// from `defaults` when it has one, otherwise from an empty rule.
    pub fn merge(&mut self, source: &SettingsDocument, defaults: Option<&Settings>) {
        if let Some(debug) = source.debug {
            self.debug = debug;
        }

        let Some(filters) = &source.filters else {
            return;
        };

        for (host, rule) in filters {
            let Some(rule) = rule else {
                continue;
            };
            let target = self.filters.entry(host.clone()).or_insert_with(|| {
                defaults
                    .and_then(|d| d.filters.get(host))
                    .cloned()
                    .unwrap_or_default()
            });
            target.merge(rule);
        }
    }

    /// Looks up the rule for an original hostname.
    pub fn filter(&self, host: &str) -> Option<&FilterRule> {
        self.filters.get(host)
    }
}

/// The config document as found on disk.
///
/// Every field is optional; unknown fields are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingsDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub debug: Option<u32>,
    /// Listening port, used when none is given on the command line.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filters: Option<BTreeMap<String, Option<FilterRule>>>,
}

impl SettingsDocument {
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Reads and parses the config document at `path`.
pub fn load_document(path: &Path) -> Result<SettingsDocument> {
    let text = std::fs::read_to_string(path).map_err(|source| ProxyError::ConfigRead {
        path: path.to_path_buf(),
        source,
    })?;
    SettingsDocument::from_json(&text)
}

/// Writes the config document to `path` as pretty JSON.
pub fn save_document(path: &Path, document: &SettingsDocument) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let mut text = document.to_json_pretty()?;
    text.push('\n');
    std::fs::write(path, text)?;
    Ok(())
}

/// Holds the current snapshot and swaps it atomically on reload.
pub struct ConfigStore {
    current: ArcSwap<Settings>,
}

impl ConfigStore {
    pub fn new(settings: Settings) -> Self {
        Self {
            current: ArcSwap::from_pointee(settings),
        }
    }

    /// Returns the current snapshot. Never blocks on a concurrent reload.
    pub fn load(&self) -> Arc<Settings> {
        self.current.load_full()
    }

    /// Current debug level.
    pub fn debug_level(&self) -> u32 {
        self.current.load().debug
    }

    /// Replaces the snapshot wholesale.
    pub fn publish(&self, settings: Settings) {
        self.current.store(Arc::new(settings));
    }

    /// Applies a reloaded document and returns the published snapshot.
    ///
    /// The filter table is rebuilt from the document alone, so rules removed
    /// from the file disappear. The debug level carries over unless the
    /// document sets one.
    pub fn apply(&self, document: &SettingsDocument) -> Arc<Settings> {
        self.current.rcu(|previous| {
            let mut next = Settings {
                debug: previous.debug,
                ..Settings::default()
            };
            next.merge(document, None);
            next
        });
        self.load()
    }
}

impl Default for ConfigStore {
    fn default() -> Self {
        Self::new(Settings::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn rule(host: Option<&str>, port: Option<u16>) -> FilterRule {
        FilterRule {
            host: host.map(str::to_string),
            port,
        }
    }

    #[test]
    fn test_parse_full_document() {
        let doc = SettingsDocument::from_json(
            r#"{
                "debug": 2,
                "port": 9999,
                "filters": {
                    "old.example": { "host": "new.example", "port": 1234 },
                    "portonly.example": { "port": 8443 }
                }
            }"#,
        )
        .unwrap();

        assert_eq!(doc.debug, Some(2));
        assert_eq!(doc.port, Some(9999));
        let filters = doc.filters.unwrap();
        assert_eq!(filters["old.example"], Some(rule(Some("new.example"), Some(1234))));
        assert_eq!(filters["portonly.example"], Some(rule(None, Some(8443))));
    }

    #[test]
    fn test_parse_nulls_and_unknown_keys() {
        let doc = SettingsDocument::from_json(
            r#"{ "debug": null, "comment": "ignored", "filters": { "a": null, "b": { "host": null } } }"#,
        )
        .unwrap();
        assert_eq!(doc.debug, None);
        let filters = doc.filters.unwrap();
        assert_eq!(filters["a"], None);
        assert_eq!(filters["b"], Some(FilterRule::default()));
    }

    #[test]
    fn test_parse_rejects_negative_debug() {
        assert!(SettingsDocument::from_json(r#"{ "debug": -1 }"#).is_err());
    }

    #[test]
    fn test_merge_preserves_untouched_keys() {
        let mut target = Settings::default();
        target.filters.insert("a".to_string(), rule(None, Some(1)));

        let source = SettingsDocument {
            debug: Some(2),
            ..Default::default()
        };
        target.merge(&source, None);

        assert_eq!(target.debug, 2);
        assert_eq!(target.filters.len(), 1);
        assert_eq!(target.filters["a"], rule(None, Some(1)));
    }

    #[test]
    fn test_merge_ignores_null() {
        let mut target = Settings {
            debug: 3,
            ..Default::default()
        };
        let source = SettingsDocument::from_json(r#"{ "debug": null }"#).unwrap();
        target.merge(&source, None);
        assert_eq!(target.debug, 3);
    }

    #[test]
    fn test_merge_nested_rule_fields() {
        let mut target = Settings::default();
        target
            .filters
            .insert("a".to_string(), rule(Some("keep.example"), Some(1)));

        let source = SettingsDocument::from_json(
            r#"{ "filters": { "a": { "port": 2 }, "b": { "host": "b.example" }, "c": null } }"#,
        )
        .unwrap();
        target.merge(&source, None);

        assert_eq!(target.filters["a"], rule(Some("keep.example"), Some(2)));
        assert_eq!(target.filters["b"], rule(Some("b.example"), None));
        assert!(!target.filters.contains_key("c"));
    }

    #[test]
    fn test_merge_initializes_from_defaults() {
        let mut defaults = Settings::default();
        defaults
            .filters
            .insert("a".to_string(), rule(Some("default.example"), Some(7)));

        let mut target = Settings::default();
        let source =
            SettingsDocument::from_json(r#"{ "filters": { "a": { "port": 8 }, "z": {} } }"#)
                .unwrap();
        target.merge(&source, Some(&defaults));

        assert_eq!(target.filters["a"], rule(Some("default.example"), Some(8)));
        assert_eq!(target.filters["z"], FilterRule::default());
    }

    #[test]
    fn test_store_apply_replaces_filters_and_keeps_debug() {
        let mut initial = Settings {
            debug: 2,
            ..Default::default()
        };
        initial.filters.insert("gone".to_string(), rule(Some("x"), None));
        let store = ConfigStore::new(initial);

        let before = store.load();
        let doc = SettingsDocument::from_json(r#"{ "filters": { "new": { "port": 1 } } }"#)
            .unwrap();
        let after = store.apply(&doc);

        assert_eq!(after.debug, 2);
        assert!(after.filter("gone").is_none());
        assert_eq!(after.filter("new"), Some(&rule(None, Some(1))));

        // A snapshot taken before the reload is unaffected.
        assert!(before.filter("gone").is_some());
        assert_eq!(store.load(), after);
    }

    #[test]
    fn test_store_apply_sets_debug() {
        let store = ConfigStore::default();
        store.apply(&SettingsDocument {
            debug: Some(3),
            ..Default::default()
        });
        assert_eq!(store.debug_level(), 3);
    }

    #[test]
    fn test_store_publish_replaces_snapshot() {
        let store = ConfigStore::default();
        let before = store.load();

        let mut next = Settings {
            debug: 1,
            ..Default::default()
        };
        next.filters.insert("a".to_string(), rule(None, Some(2)));
        store.publish(next.clone());

        assert_eq!(*store.load(), next);
        assert_eq!(store.debug_level(), 1);
        assert!(before.filters.is_empty());
    }

    #[test]
    fn test_load_and_save_document() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config").join("hostfilters.json");

        let mut filters = BTreeMap::new();
        filters.insert("old.example".to_string(), Some(rule(Some("new.example"), None)));
        let doc = SettingsDocument {
            debug: Some(1),
            port: None,
            filters: Some(filters),
        };

        save_document(&path, &doc).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(!text.contains("\"port\""));
        assert_eq!(load_document(&path).unwrap(), doc);
    }

    #[test]
    fn test_load_document_missing_file() {
        let dir = tempdir().unwrap();
        let err = load_document(&dir.path().join("nope.json")).unwrap_err();
        assert!(matches!(err, ProxyError::ConfigRead { .. }));
    }
}
