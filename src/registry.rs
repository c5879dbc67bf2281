use crate::error::{Result, ScraperError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use tracing::{debug, info};

/// Declarative description of one venue website: where to fetch, which
/// selectors to try, and how the listing is shaped. The extraction engine is
/// generic; everything site-specific lives in these records.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub source_id: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub venue: VenueInfo,
    pub urls: SourceUrls,
    #[serde(default)]
    pub selectors: SelectorConfig,
    #[serde(default)]
    pub detail: DetailConfig,
    /// Overrides the built-in shape lookup for this source.
    #[serde(default)]
    pub shape: Option<String>,
    /// The listing embeds the date in the event title, e.g. "26/09 KAS:ST".
    #[serde(default)]
    pub date_in_title: bool,
    /// The listing is script-rendered and needs a browser capability.
    #[serde(default)]
    pub requires_browser: bool,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub subcategory: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VenueInfo {
    pub name: String,
    pub address: String,
    #[serde(default = "default_city")]
    pub city: String,
    #[serde(default = "default_country")]
    pub country: String,
    /// Fallback image when an event card has none.
    #[serde(default)]
    pub logo_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceUrls {
    pub base: String,
    pub events: String,
    /// Listing URL template with `{start}`/`{end}` placeholders for sources
    /// that cap the date span per request.
    #[serde(default)]
    pub window_template: Option<String>,
    #[serde(default)]
    pub window_date_format: Option<String>,
}

/// Ordered candidate selectors per logical field. The extractor takes the
/// first candidate that yields a non-empty result.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SelectorConfig {
    #[serde(default)]
    pub event_container: Vec<String>,
    #[serde(default)]
    pub title: Vec<String>,
    #[serde(default)]
    pub date: Vec<String>,
    #[serde(default)]
    pub time: Vec<String>,
    #[serde(default)]
    pub price: Vec<String>,
    #[serde(default)]
    pub link: Vec<String>,
    #[serde(default)]
    pub image: Vec<String>,
    #[serde(default)]
    pub description: Vec<String>,
    #[serde(default)]
    pub artists: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DetailConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub title: Vec<String>,
    #[serde(default)]
    pub description: Vec<String>,
    #[serde(default)]
    pub ticket_link: Vec<String>,
    #[serde(default)]
    pub price: Vec<String>,
    #[serde(default)]
    pub image: Vec<String>,
}

fn default_true() -> bool {
    true
}

fn default_city() -> String {
    crate::constants::DEFAULT_CITY.to_string()
}

fn default_country() -> String {
    crate::constants::DEFAULT_COUNTRY.to_string()
}

/// All source configurations, loaded from a directory of JSON files.
pub struct SourceRegistry {
    sources: HashMap<String, SourceConfig>,
}

impl SourceRegistry {
    /// Reads every `*.json` file under `dir` as one source configuration.
    pub fn load_from_directory(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        if !dir.is_dir() {
            return Err(ScraperError::Config(format!(
                "Source directory '{}' not found",
                dir.display()
            )));
        }

        let mut sources = HashMap::new();
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let content = fs::read_to_string(&path)?;
            let config: SourceConfig = serde_json::from_str(&content).map_err(|e| {
                ScraperError::Config(format!("Invalid source file '{}': {}", path.display(), e))
            })?;
            validate(&config, &path)?;

            debug!(source_id = %config.source_id, enabled = config.enabled, "loaded source config");
            if sources.insert(config.source_id.clone(), config).is_some() {
                return Err(ScraperError::Config(format!(
                    "Duplicate source id in '{}'",
                    path.display()
                )));
            }
        }

        info!(count = sources.len(), "source registry loaded");
        Ok(Self { sources })
    }

    pub fn get(&self, source_id: &str) -> Option<&SourceConfig> {
        self.sources.get(source_id)
    }

    /// Enabled sources in stable id order.
    pub fn enabled_sources(&self) -> Vec<&SourceConfig> {
        let mut enabled: Vec<&SourceConfig> =
            self.sources.values().filter(|s| s.enabled).collect();
        enabled.sort_by(|a, b| a.source_id.cmp(&b.source_id));
        enabled
    }

    pub fn all_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.sources.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

fn validate(config: &SourceConfig, path: &Path) -> Result<()> {
    if config.source_id.trim().is_empty() {
        return Err(ScraperError::Config(format!(
            "Source file '{}' has an empty source_id",
            path.display()
        )));
    }
    if config.urls.events.trim().is_empty() {
        return Err(ScraperError::MissingField(format!(
            "urls.events in source '{}'",
            config.source_id
        )));
    }
    Ok(())
}
