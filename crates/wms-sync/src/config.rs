//! # Sync Configuration
//!
//! Configuration management for the reconciliation layer.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     WMS_PAGE_SIZE=250                                                  │
//! │     WMS_SHOPIFY_DOMAIN=acme.myshopify.com                              │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/wms-suite/sync.toml (Linux)                              │
//! │     ~/Library/Application Support/com.wms.wms-suite/sync.toml (macOS)  │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! │     page_size = 100, max_pages = 500, both sources disabled            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! # sync.toml
//! [sync]
//! page_size = 100
//! max_pages = 500                # safety ceiling per pass
//! request_timeout_secs = 30
//! staleness_threshold_mins = 15  # scheduled refreshes skip fresher data
//!
//! [credentials]
//! refresh_lead_secs = 300
//!
//! [shopify]
//! enabled = true
//! shop_domain = "acme.myshopify.com"
//! client_id = "..."
//! client_secret = "..."
//!
//! [quickbooks]
//! enabled = true
//! client_id = "..."
//! client_secret = "..."
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;
use wms_core::validation::validate_page_size;

use crate::error::{SyncError, SyncResult};

// =============================================================================
// Sync Settings
// =============================================================================

/// Pass behavior: paging, retry and scheduling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSettings {
    /// Records requested per page.
    #[serde(default = "default_page_size")]
    pub page_size: u32,

    /// Hard page ceiling per pass. A pass that reaches it stops and reports
    /// a possibly incomplete result.
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,

    /// Timeout for every external HTTP call.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Delay before the single page retry.
    #[serde(default = "default_retry_backoff")]
    pub retry_backoff_ms: u64,

    /// Upper bound for any retry delay.
    #[serde(default = "default_max_backoff")]
    pub max_backoff_secs: u64,

    /// Scheduled refreshes run only when the last successful run is older
    /// than this.
    #[serde(default = "default_staleness_threshold")]
    pub staleness_threshold_mins: u64,

    /// Run the two sources side by side instead of one after the other.
    #[serde(default)]
    pub concurrent_sources: bool,
}

fn default_page_size() -> u32 {
    100
}
fn default_max_pages() -> u32 {
    500
}
fn default_request_timeout() -> u64 {
    30
}
fn default_retry_backoff() -> u64 {
    500
}
fn default_max_backoff() -> u64 {
    10
}
fn default_staleness_threshold() -> u64 {
    15
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            max_pages: default_max_pages(),
            request_timeout_secs: default_request_timeout(),
            retry_backoff_ms: default_retry_backoff(),
            max_backoff_secs: default_max_backoff(),
            staleness_threshold_mins: default_staleness_threshold(),
            concurrent_sources: false,
        }
    }
}

impl SyncSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_secs(self.max_backoff_secs)
    }

    pub fn staleness_threshold(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.staleness_threshold_mins as i64)
    }
}

// =============================================================================
// Credential Settings
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialSettings {
    /// A token expiring within this window is refreshed before use.
    #[serde(default = "default_refresh_lead")]
    pub refresh_lead_secs: u64,
}

fn default_refresh_lead() -> u64 {
    300
}

impl Default for CredentialSettings {
    fn default() -> Self {
        Self {
            refresh_lead_secs: default_refresh_lead(),
        }
    }
}

impl CredentialSettings {
    pub fn refresh_lead(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.refresh_lead_secs as i64)
    }
}

// =============================================================================
// Source Settings
// =============================================================================

/// Shopify Admin API settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShopifySettings {
    #[serde(default)]
    pub enabled: bool,

    /// `acme.myshopify.com`.
    #[serde(default)]
    pub shop_domain: String,

    #[serde(default = "default_shopify_api_version")]
    pub api_version: String,

    #[serde(default)]
    pub client_id: String,

    #[serde(default)]
    pub client_secret: String,

    /// Overrides `https://{shop_domain}` (proxies, test servers).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

fn default_shopify_api_version() -> String {
    "2024-10".to_string()
}

impl Default for ShopifySettings {
    fn default() -> Self {
        Self {
            enabled: false,
            shop_domain: String::new(),
            api_version: default_shopify_api_version(),
            client_id: String::new(),
            client_secret: String::new(),
            base_url: None,
        }
    }
}

impl ShopifySettings {
    /// Scheme and host every Shopify call is made against.
    pub fn endpoint_base(&self) -> String {
        match &self.base_url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => format!("https://{}", self.shop_domain),
        }
    }
}

/// QuickBooks Online settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuickBooksSettings {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_qbo_api_base")]
    pub api_base_url: String,

    #[serde(default = "default_qbo_token_url")]
    pub token_url: String,

    #[serde(default = "default_qbo_minor_version")]
    pub minor_version: u32,

    #[serde(default)]
    pub client_id: String,

    #[serde(default)]
    pub client_secret: String,
}

fn default_qbo_api_base() -> String {
    "https://quickbooks.api.intuit.com".to_string()
}
fn default_qbo_token_url() -> String {
    "https://oauth.platform.intuit.com/oauth2/v1/tokens/bearer".to_string()
}
fn default_qbo_minor_version() -> u32 {
    65
}

impl Default for QuickBooksSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            api_base_url: default_qbo_api_base(),
            token_url: default_qbo_token_url(),
            minor_version: default_qbo_minor_version(),
            client_id: String::new(),
            client_secret: String::new(),
        }
    }
}

// =============================================================================
// Root Config
// =============================================================================

/// Complete configuration for the reconciliation layer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default)]
    pub sync: SyncSettings,

    #[serde(default)]
    pub credentials: CredentialSettings,

    #[serde(default)]
    pub shopify: ShopifySettings,

    #[serde(default)]
    pub quickbooks: QuickBooksSettings,
}

impl SyncConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (sync.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> SyncResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading sync config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;

        Ok(config)
    }

    /// Loads config or returns default if load fails.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load sync config: {}. Using defaults.", e);
            Self::default()
        })
    }

    /// Saves configuration to file.
    pub fn save(&self, config_path: Option<PathBuf>) -> SyncResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| SyncError::ConfigSaveFailed("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| SyncError::ConfigSaveFailed(e.to_string()))?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents).map_err(|e| SyncError::ConfigSaveFailed(e.to_string()))?;

        info!(?path, "Sync config saved");
        Ok(())
    }

    /// Validates the configuration.
    pub fn validate(&self) -> SyncResult<()> {
        validate_page_size(self.sync.page_size)
            .map_err(|e| SyncError::InvalidConfig(e.to_string()))?;

        if self.sync.max_pages == 0 {
            return Err(SyncError::InvalidConfig(
                "max_pages must be greater than 0".into(),
            ));
        }

        if self.sync.request_timeout_secs == 0 {
            return Err(SyncError::InvalidConfig(
                "request_timeout_secs must be greater than 0".into(),
            ));
        }

        if self.shopify.enabled {
            if self.shopify.shop_domain.trim().is_empty() && self.shopify.base_url.is_none() {
                return Err(SyncError::InvalidConfig(
                    "shopify.shop_domain is required when Shopify is enabled".into(),
                ));
            }
            Url::parse(&self.shopify.endpoint_base())?;
            require_client(&self.shopify.client_id, &self.shopify.client_secret, "shopify")?;
        }

        if self.quickbooks.enabled {
            Url::parse(&self.quickbooks.api_base_url)?;
            Url::parse(&self.quickbooks.token_url)?;
            require_client(
                &self.quickbooks.client_id,
                &self.quickbooks.client_secret,
                "quickbooks",
            )?;
        }

        Ok(())
    }

    /// Applies `WMS_*` overrides. `lookup` is `std::env::var` outside tests.
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(size) = lookup("WMS_PAGE_SIZE").and_then(|v| v.parse().ok()) {
            debug!(page_size = size, "Overriding page size from environment");
            self.sync.page_size = size;
        }

        if let Some(pages) = lookup("WMS_MAX_PAGES").and_then(|v| v.parse().ok()) {
            self.sync.max_pages = pages;
        }

        if let Some(secs) = lookup("WMS_REQUEST_TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
            self.sync.request_timeout_secs = secs;
        }

        if let Some(mins) = lookup("WMS_STALENESS_MINS").and_then(|v| v.parse().ok()) {
            self.sync.staleness_threshold_mins = mins;
        }

        if let Some(flag) = lookup("WMS_CONCURRENT_SOURCES") {
            match flag.to_lowercase().as_str() {
                "1" | "true" | "yes" => self.sync.concurrent_sources = true,
                "0" | "false" | "no" => self.sync.concurrent_sources = false,
                _ => warn!(value = %flag, "Unknown WMS_CONCURRENT_SOURCES value in environment"),
            }
        }

        if let Some(domain) = lookup("WMS_SHOPIFY_DOMAIN") {
            debug!(domain = %domain, "Overriding Shopify domain from environment");
            self.shopify.shop_domain = domain;
        }

        if let Some(id) = lookup("WMS_SHOPIFY_CLIENT_ID") {
            self.shopify.client_id = id;
        }

        if let Some(secret) = lookup("WMS_SHOPIFY_CLIENT_SECRET") {
            self.shopify.client_secret = secret;
        }

        if let Some(url) = lookup("WMS_QBO_BASE_URL") {
            debug!(url = %url, "Overriding QuickBooks base URL from environment");
            self.quickbooks.api_base_url = url;
        }

        if let Some(id) = lookup("WMS_QBO_CLIENT_ID") {
            self.quickbooks.client_id = id;
        }

        if let Some(secret) = lookup("WMS_QBO_CLIENT_SECRET") {
            self.quickbooks.client_secret = secret;
        }
    }

    /// Returns the default config file path.
    fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "wms", "wms-suite")
            .map(|dirs| dirs.config_dir().join("sync.toml"))
    }
}

fn require_client(client_id: &str, client_secret: &str, section: &str) -> SyncResult<()> {
    if client_id.trim().is_empty() || client_secret.trim().is_empty() {
        return Err(SyncError::InvalidConfig(format!(
            "{section}.client_id and {section}.client_secret are required when enabled"
        )));
    }
    Ok(())
}
