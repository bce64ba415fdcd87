//! Service configuration
//!
//! Loaded from (in order of priority):
//! 1. The file named by the `VEGA_CONFIG` environment variable
//! 2. `vega.json` in the Cosmos config directory
//!
//! Secrets and the public webhook URL can be overridden from the
//! environment. The whole value is validated at load time so mapping
//! mistakes surface before the first sync.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::error::SyncError;
use crate::models::TrackedResource;

/// Config filename in the Cosmos config directory
const CONFIG_FILE: &str = "vega.json";

/// Default database filename in the Cosmos config directory
const DATABASE_FILE: &str = "vega.db";

/// Endpoint receiving list change notifications
pub const LIST_NOTIFICATION_PATH: &str = "/webhook/list-notification";
/// Endpoint receiving subscription lifecycle notifications
pub const SUBSCRIPTION_NOTIFICATION_PATH: &str = "/webhook/subscription-notification";
/// Health endpoint used by the startup reachability check
pub const PING_PATH: &str = "/webhook/ping";

/// Bounds for the subscription expiry window, in hours
pub const MIN_EXPIRY_HOURS: u32 = 1;
/// Graph caps list subscriptions at 42,300 minutes
pub const MAX_EXPIRY_HOURS: u32 = 705;

/// Root configuration value, injected into each component
#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    pub graph: GraphSettings,
    #[serde(default)]
    pub database: DatabaseSettings,
    pub webhook: WebhookSettings,
    #[serde(default)]
    pub subscriptions: SubscriptionSettings,
    #[serde(default)]
    pub sync: ReconcileSettings,
    #[serde(default)]
    pub lists: Vec<TrackedResource>,
}

/// Graph app registration
#[derive(Debug, Clone, Deserialize)]
pub struct GraphSettings {
    #[serde(default)]
    pub tenant_id: String,
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    #[serde(default = "default_scope")]
    pub scope: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_authority")]
    pub authority: String,
}

impl Default for GraphSettings {
    fn default() -> Self {
        Self {
            tenant_id: String::new(),
            client_id: String::new(),
            client_secret: String::new(),
            scope: default_scope(),
            base_url: default_base_url(),
            authority: default_authority(),
        }
    }
}

fn default_scope() -> String {
    "https://graph.microsoft.com/.default".to_string()
}

fn default_base_url() -> String {
    "https://graph.microsoft.com/v1.0".to_string()
}

fn default_authority() -> String {
    "https://login.microsoftonline.com".to_string()
}

/// Local SQLite database location
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DatabaseSettings {
    pub path: Option<PathBuf>,
}

impl DatabaseSettings {
    /// Configured path, or `vega.db` in the Cosmos config directory
    pub fn resolve_path(&self) -> Result<PathBuf> {
        match &self.path {
            Some(path) => Ok(path.clone()),
            None => config::config_path(DATABASE_FILE).context("Could not determine config directory"),
        }
    }
}

/// Inbound webhook endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookSettings {
    /// Public base URL the source posts notifications to
    #[serde(default)]
    pub external_base_url: String,
    /// Local socket address the webhook server binds to
    #[serde(default = "default_listen_address")]
    pub listen_address: String,
}

fn default_listen_address() -> String {
    "0.0.0.0:8080".to_string()
}

impl WebhookSettings {
    fn base(&self) -> &str {
        self.external_base_url.trim_end_matches('/')
    }

    pub fn notification_url(&self) -> String {
        format!("{}{}", self.base(), LIST_NOTIFICATION_PATH)
    }

    pub fn lifecycle_url(&self) -> String {
        format!("{}{}", self.base(), SUBSCRIPTION_NOTIFICATION_PATH)
    }

    pub fn ping_url(&self) -> String {
        format!("{}{}", self.base(), PING_PATH)
    }
}

/// Subscription lifetime
#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionSettings {
    #[serde(default = "default_expiry_hours")]
    pub expiry_hours: u32,
}

fn default_expiry_hours() -> u32 {
    48
}

impl Default for SubscriptionSettings {
    fn default() -> Self {
        Self {
            expiry_hours: default_expiry_hours(),
        }
    }
}

impl SubscriptionSettings {
    pub fn expiry_window(&self) -> chrono::Duration {
        chrono::Duration::hours(i64::from(self.expiry_hours))
    }
}

/// Item fetch tuning
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReconcileSettings {
    /// Stop paginating once this many items have been fetched in one pass
    pub page_cap: Option<usize>,
}

impl SyncConfig {
    /// Load configuration using the priority described in the module docs
    pub fn load() -> Result<Self> {
        let mut cfg: SyncConfig = match std::env::var("VEGA_CONFIG") {
            Ok(path) => config::load_json_file(Path::new(&path))?,
            Err(_) => {
                if !config::config_exists(CONFIG_FILE) {
                    let expected = Self::default_config_path()
                        .map(|p| p.display().to_string())
                        .unwrap_or_else(|| CONFIG_FILE.to_string());
                    anyhow::bail!("No configuration found: create {} or set VEGA_CONFIG", expected);
                }
                config::load_json(CONFIG_FILE)?
            }
        };
        cfg.apply_overrides(|key| std::env::var(key).ok());
        cfg.validate()?;
        Ok(cfg)
    }

    /// Parse and validate configuration from a JSON string
    pub fn from_json(json: &str) -> Result<Self> {
        let cfg: SyncConfig = serde_json::from_str(json).context("Failed to parse config JSON")?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Default config file path (~/.config/cosmos/vega.json)
    pub fn default_config_path() -> Option<PathBuf> {
        config::config_path(CONFIG_FILE)
    }

    /// Replace secrets and the webhook URL with values from `lookup`
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let overrides: [(&str, &mut String); 4] = [
            ("GRAPH_TENANT_ID", &mut self.graph.tenant_id),
            ("GRAPH_CLIENT_ID", &mut self.graph.client_id),
            ("GRAPH_CLIENT_SECRET", &mut self.graph.client_secret),
            ("WEBHOOK_BASE_URL", &mut self.webhook.external_base_url),
        ];
        for (key, slot) in overrides {
            if let Some(value) = lookup(key).filter(|v| !v.is_empty()) {
                *slot = value;
            }
        }
    }

    /// Check the configuration for mistakes that would only show up mid-sync
    pub fn validate(&self) -> Result<(), SyncError> {
        for (name, value) in [
            ("graph.tenant_id", &self.graph.tenant_id),
            ("graph.client_id", &self.graph.client_id),
            ("graph.client_secret", &self.graph.client_secret),
        ] {
            if value.trim().is_empty() {
                return Err(SyncError::config(format!("{} is not set", name)));
            }
        }

        let base = &self.webhook.external_base_url;
        if !(base.starts_with("https://") || base.starts_with("http://")) {
            return Err(SyncError::config(format!(
                "webhook.external_base_url '{}' must be an http(s) URL",
                base
            )));
        }

        let hours = self.subscriptions.expiry_hours;
        if !(MIN_EXPIRY_HOURS..=MAX_EXPIRY_HOURS).contains(&hours) {
            return Err(SyncError::config(format!(
                "subscriptions.expiry_hours must be between {} and {}, got {}",
                MIN_EXPIRY_HOURS, MAX_EXPIRY_HOURS, hours
            )));
        }

        if self.sync.page_cap == Some(0) {
            return Err(SyncError::config("sync.page_cap must be greater than zero"));
        }

        let mut descriptors = HashSet::new();
        let mut tables = HashSet::new();
        for tracked in &self.lists {
            if tracked.resource.site_id.is_empty() || tracked.resource.list_id.is_empty() {
                return Err(SyncError::config("every list needs a site_id and a list_id"));
            }
            tracked.schema.validate()?;
            if !descriptors.insert(tracked.descriptor()) {
                return Err(SyncError::config(format!(
                    "list {} is configured twice",
                    tracked.descriptor()
                )));
            }
            if !tables.insert(tracked.schema.table.to_ascii_lowercase()) {
                return Err(SyncError::config(format!(
                    "table '{}' is used by more than one list",
                    tracked.schema.table
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const VALID: &str = r#"{
        "graph": {"tenant_id": "t", "client_id": "c", "client_secret": "s"},
        "webhook": {"external_base_url": "https://hooks.example.com/"},
        "lists": [
            {"site_id": "s1", "list_id": "l1", "table": "tasks",
             "columns": [{"column": "title", "field": "Title"}]},
            {"site_id": "s1", "list_id": "l2", "table": "people", "columns": []}
        ]
    }"#;

    #[test]
    fn test_parse_valid_config() {
        let cfg = SyncConfig::from_json(VALID).unwrap();
        assert_eq!(cfg.lists.len(), 2);
        assert_eq!(cfg.subscriptions.expiry_hours, 48);
        assert_eq!(cfg.webhook.listen_address, "0.0.0.0:8080");
        assert_eq!(cfg.graph.base_url, "https://graph.microsoft.com/v1.0");
        assert_eq!(
            cfg.webhook.notification_url(),
            "https://hooks.example.com/webhook/list-notification"
        );
        assert_eq!(
            cfg.webhook.lifecycle_url(),
            "https://hooks.example.com/webhook/subscription-notification"
        );
    }

    #[test]
    fn test_rejects_duplicate_list() {
        let json = VALID.replace("\"l2\"", "\"l1\"");
        let err = SyncConfig::from_json(&json).unwrap_err();
        assert!(err.to_string().contains("configured twice"));
    }

    #[test]
    fn test_rejects_shared_table() {
        let json = VALID.replace("\"people\"", "\"TASKS\"");
        assert!(SyncConfig::from_json(&json).is_err());
    }

    #[test]
    fn test_rejects_bad_column() {
        let json = VALID.replace("\"column\": \"title\"", "\"column\": \"title;--\"");
        assert!(SyncConfig::from_json(&json).is_err());
    }

    #[test]
    fn test_rejects_expiry_out_of_bounds() {
        let json = VALID.replace(
            "\"webhook\"",
            "\"subscriptions\": {\"expiry_hours\": 10000}, \"webhook\"",
        );
        let err = SyncConfig::from_json(&json).unwrap_err();
        assert!(err.to_string().contains("expiry_hours"));

        // Longest window Graph accepts for list subscriptions
        let at_limit = VALID.replace(
            "\"webhook\"",
            "\"subscriptions\": {\"expiry_hours\": 705}, \"webhook\"",
        );
        assert!(SyncConfig::from_json(&at_limit).is_ok());
        let over = at_limit.replace("705", "706");
        assert!(SyncConfig::from_json(&over).is_err());
    }

    #[test]
    fn test_rejects_missing_secret() {
        let json = VALID.replace("\"client_secret\": \"s\"", "\"client_secret\": \"\"");
        assert!(SyncConfig::from_json(&json).is_err());
    }

    #[test]
    fn test_env_overrides() {
        let json = VALID.replace("\"client_secret\": \"s\"", "\"client_secret\": \"\"");
        let mut cfg: SyncConfig = serde_json::from_str(&json).unwrap();

        let env: HashMap<&str, &str> = [
            ("GRAPH_CLIENT_SECRET", "from-env"),
            ("WEBHOOK_BASE_URL", "https://other.example.com"),
        ]
        .into_iter()
        .collect();
        cfg.apply_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(cfg.graph.client_secret, "from-env");
        assert_eq!(cfg.webhook.ping_url(), "https://other.example.com/webhook/ping");
        assert!(cfg.validate().is_ok());
    }
}
