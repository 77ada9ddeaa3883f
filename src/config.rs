//! Environment-backed configuration. Everything the pipeline needs is read
//! once into an explicit value here; nothing global, nothing mutable.
//!
//! Variables use the `WATCHER__` prefix with `__` separating nested keys,
//! e.g. `WATCHER__RECIPIENT`, `WATCHER__GATEWAY_URL`,
//! `WATCHER__TARGET__QUERY`.

use config::{Config, ConfigError, Environment};
use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, Clone, Deserialize)]
pub struct WatcherConfig {
    /// Contact identifier the price drop alert is delivered to.
    pub recipient: String,
    /// Base URL of the message gateway.
    pub gateway_url: String,
    #[serde(default = "default_history_path")]
    pub history_path: PathBuf,
    /// Settle time granted to the transport before a send is considered
    /// complete.
    #[serde(default = "default_settle_seconds")]
    pub settle_seconds: u64,
    /// When true, an aborted run exits nonzero instead of the default
    /// log-and-exit-0 behavior.
    #[serde(default)]
    pub strict_exit: bool,
    #[serde(default)]
    pub target: SearchTarget,
}

/// The fixed search flow: where to start, what to type, which result link
/// to follow, and where name and price live on the detail page.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SearchTarget {
    pub entry_url: String,
    pub search_box: String,
    pub query: String,
    pub result_link: String,
    pub title_selector: String,
    pub price_selector: String,
}

impl Default for SearchTarget {
    fn default() -> Self {
        Self {
            entry_url: "https://www.amazon.in/".into(),
            search_box: "Search".into(),
            query: "legion 5i pro".into(),
            result_link: "Lenovo Legion 5 Pro Intel Core i7-12700H".into(),
            title_selector: "#titleSection".into(),
            price_selector: "#corePriceDisplay_desktop_feature_div .a-price-whole".into(),
        }
    }
}

impl WatcherConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(
                Environment::with_prefix("WATCHER")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }
}

fn default_history_path() -> PathBuf {
    PathBuf::from("price_history.csv")
}

fn default_settle_seconds() -> u64 {
    2
}
