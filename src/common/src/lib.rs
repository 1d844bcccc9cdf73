//! Common library for the bargain notifier.
//!
//! Provides the collaborators the detection engine talks to:
//! - Configuration loading from .env
//! - Retailer catalog client and table markup parsing
//! - Product image cache
//! - Slack Web API client
//! - Shared catalog record model

pub mod catalog;
pub mod config;
pub mod images;
pub mod models;
pub mod slack;
pub mod table;

pub use catalog::{CatalogClient, CatalogError, CatalogSnapshot};
pub use config::{Branch, Config, ConfigError};
pub use images::ImageCache;
pub use models::RawListing;
pub use slack::{SlackClient, SlackError};
pub use table::parse_table;
