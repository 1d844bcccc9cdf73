//! Bargain notifier configuration.

use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::rotation::OperatingWindow;

/// Bargain notifier configuration.
#[derive(Debug, Clone)]
pub struct NotifierConfig {
    /// Log messages instead of posting them
    pub dry_run: bool,
    /// Cheapest units considered per model (K)
    pub candidate_count: usize,
    /// Minimum margin vs the dominant minimum price (M)
    pub min_margin: Decimal,
    /// Minimum listings per model for quartiles to be trusted
    pub min_group_size: usize,
    /// Branches eligible per day; also the daily cursor step
    pub batch_size: usize,
    /// Wait between two dispatched messages
    pub message_interval_secs: u64,
    /// Local operating hours
    pub window: OperatingWindow,
    /// Reuse the catalog snapshot while younger than this
    pub catalog_max_age_secs: u64,
    /// Delay between cycles inside the operating window
    pub poll_interval_secs: u64,
    /// Attempts per post before the candidate is skipped
    pub post_attempts: u32,
    /// First retry delay; doubles per attempt
    pub retry_initial_delay_ms: u64,
    /// Retry delay cap
    pub retry_max_delay_ms: u64,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            dry_run: false,
            candidate_count: 4,
            min_margin: dec!(500),
            min_group_size: 5,
            batch_size: 3,
            message_interval_secs: 180, // 3 minutes
            window: OperatingWindow {
                start_hour: 7,
                end_hour: 20,
            },
            catalog_max_age_secs: 6 * 60 * 60,
            poll_interval_secs: 60 * 60,
            post_attempts: 3,
            retry_initial_delay_ms: 2_000,
            retry_max_delay_ms: 30_000,
        }
    }
}

impl NotifierConfig {
    /// Defaults with environment overrides applied. Unparseable values
    /// keep the default.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            candidate_count: env_or("CANDIDATE_COUNT", defaults.candidate_count),
            min_margin: env_or("MIN_MARGIN", defaults.min_margin),
            min_group_size: env_or("MIN_GROUP_SIZE", defaults.min_group_size),
            batch_size: env_or("BRANCH_BATCH_SIZE", defaults.batch_size),
            message_interval_secs: env_or("MESSAGE_INTERVAL_SECS", defaults.message_interval_secs),
            window: OperatingWindow {
                start_hour: env_or("START_HOUR", defaults.window.start_hour),
                end_hour: env_or("END_HOUR", defaults.window.end_hour),
            },
            ..defaults
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.window.start_hour > 23 || self.window.end_hour > 24 {
            bail!(
                "operating window {}-{} is not a valid hour range",
                self.window.start_hour,
                self.window.end_hour
            );
        }
        if self.window.start_hour == self.window.end_hour {
            bail!(
                "operating window {0:02}:00-{0:02}:00 is empty",
                self.window.start_hour
            );
        }
        if self.batch_size == 0 {
            bail!("batch_size must be at least 1");
        }
        if self.post_attempts == 0 {
            bail!("post_attempts must be at least 1");
        }
        if self.min_margin < Decimal::ZERO {
            bail!("min_margin ({}) cannot be negative", self.min_margin);
        }
        Ok(())
    }

    pub fn message_interval(&self) -> Duration {
        Duration::from_secs(self.message_interval_secs)
    }

    pub fn catalog_max_age(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.catalog_max_age_secs as i64)
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.trim().parse::<T>().ok())
        .unwrap_or(default)
}
