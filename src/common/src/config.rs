//! Configuration loading from environment variables.

use std::env;
use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(String),

    #[error("Invalid URL format: {0}")]
    InvalidUrl(String),

    #[error("Invalid branch entry: {0}")]
    InvalidBranch(String),
}

/// A store branch: catalog id plus the display name listings are tagged with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Branch {
    pub id: String,
    pub name: String,
}

impl Branch {
    /// Parse an `id:name` pair. A bare value is used as both id and name.
    pub fn parse(entry: &str) -> Result<Self, ConfigError> {
        let entry = entry.trim();
        match entry.split_once(':') {
            Some((id, name)) => {
                let (id, name) = (id.trim(), name.trim());
                if id.is_empty() || name.is_empty() {
                    return Err(ConfigError::InvalidBranch(entry.to_string()));
                }
                Ok(Self {
                    id: id.to_string(),
                    name: name.to_string(),
                })
            }
            None if entry.is_empty() => Err(ConfigError::InvalidBranch(entry.to_string())),
            None => Ok(Self {
                id: entry.to_string(),
                name: entry.to_string(),
            }),
        }
    }
}

/// Application configuration loaded from environment.
#[derive(Debug, Clone)]
pub struct Config {
    /// Slack bot token. When absent the notifier runs in dry-run mode.
    pub slack_bot_token: Option<String>,

    /// Slack channel that receives bargain messages
    pub slack_channel_id: String,

    /// Slack Web API base URL
    pub slack_api_url: String,

    /// Retailer catalog endpoint
    pub catalog_api_url: String,

    /// Globally ordered branch list (rotation order and send priority)
    pub branches: Vec<Branch>,

    /// Catalog families to fetch, in send priority order
    pub families: Vec<String>,

    /// Rotation state file
    pub state_file: String,

    /// Catalog snapshot file
    pub catalog_snapshot_file: String,

    /// Product image cache file
    pub image_cache_file: String,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Optional variables (with defaults):
    /// - SLACK_BOT_TOKEN: bot token (unset = dry run)
    /// - SLACK_CHANNEL_ID: target channel (required when a token is set)
    /// - SLACK_API_URL: Slack Web API base URL
    /// - CATALOG_API_URL: catalog endpoint
    /// - BRANCHES: comma-separated `id:name` pairs
    /// - FAMILIES: comma-separated catalog families
    /// - STATE_FILE: rotation state path (default: rotation_state.json)
    /// - CATALOG_SNAPSHOT_FILE: snapshot path (default: catalog_snapshot.json)
    /// - IMAGE_CACHE_FILE: image cache path (default: imagenes_cache.json)
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present
        dotenvy::dotenv().ok();
        Self::from_env_only()
    }

    /// Load configuration from environment variables only (no .env file).
    /// Useful for testing.
    pub fn from_env_only() -> Result<Self, ConfigError> {
        let slack_bot_token = env::var("SLACK_BOT_TOKEN")
            .ok()
            .filter(|s| !s.trim().is_empty());

        let slack_channel_id = env::var("SLACK_CHANNEL_ID").unwrap_or_default();
        if slack_bot_token.is_some() && slack_channel_id.trim().is_empty() {
            return Err(ConfigError::MissingVar("SLACK_CHANNEL_ID".to_string()));
        }

        let slack_api_url =
            env::var("SLACK_API_URL").unwrap_or_else(|_| "https://slack.com/api".to_string());
        validate_url(&slack_api_url)?;

        let catalog_api_url = env::var("CATALOG_API_URL").unwrap_or_else(|_| {
            "https://efectimundo.com.mx/catalogo/consulta_catalogo.php".to_string()
        });
        validate_url(&catalog_api_url)?;

        let branches = env::var("BRANCHES")
            .ok()
            .map(|s| parse_branches(&s))
            .transpose()?
            .unwrap_or_default();

        let families = env::var("FAMILIES")
            .ok()
            .map(|s| parse_list(&s))
            .unwrap_or_else(|| vec!["CELULARES".to_string()]);

        let state_file =
            env::var("STATE_FILE").unwrap_or_else(|_| "rotation_state.json".to_string());

        let catalog_snapshot_file = env::var("CATALOG_SNAPSHOT_FILE")
            .unwrap_or_else(|_| "catalog_snapshot.json".to_string());

        let image_cache_file =
            env::var("IMAGE_CACHE_FILE").unwrap_or_else(|_| "imagenes_cache.json".to_string());

        Ok(Self {
            slack_bot_token,
            slack_channel_id,
            slack_api_url,
            catalog_api_url,
            branches,
            families,
            state_file,
            catalog_snapshot_file,
            image_cache_file,
        })
    }

    /// Branch names in rotation order.
    pub fn branch_names(&self) -> Vec<String> {
        self.branches.iter().map(|b| b.name.clone()).collect()
    }
}

fn validate_url(value: &str) -> Result<(), ConfigError> {
    Url::parse(value)
        .map(|_| ())
        .map_err(|_| ConfigError::InvalidUrl(value.to_string()))
}

/// Split a comma-separated list, dropping blanks.
pub fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Parse a comma-separated `id:name` branch list, keeping order.
pub fn parse_branches(value: &str) -> Result<Vec<Branch>, ConfigError> {
    value
        .split(',')
        .filter(|s| !s.trim().is_empty())
        .map(Branch::parse)
        .collect()
}
