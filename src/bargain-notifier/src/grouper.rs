//! Listing normalization and model grouping.

use std::collections::BTreeMap;
use std::str::FromStr;

use common::RawListing;
use rust_decimal::Decimal;
use tracing::debug;

use crate::models::{Listing, ModelGroup, ModelKey};

/// Catalog "Tipo" value for units with an open incident report.
const REPORTED_KIND: &str = "con_reporte";

/// Validates raw catalog records into [`Listing`]s.
#[derive(Debug, Clone)]
pub struct ListingNormalizer {
    /// Lowercase fragments marking a damaged unit
    damage_keywords: Vec<String>,
}

impl Default for ListingNormalizer {
    fn default() -> Self {
        Self::new(&["dañado", "dañad", "daniado", "broken"])
    }
}

impl ListingNormalizer {
    pub fn new(damage_keywords: &[&str]) -> Self {
        Self {
            damage_keywords: damage_keywords.iter().map(|k| k.to_lowercase()).collect(),
        }
    }

    /// Normalize one record. Returns `None` for records that must be dropped:
    /// unparseable or non-positive price, missing sku/brand/model, damaged
    /// or reported units.
    pub fn normalize(&self, raw: &RawListing) -> Option<Listing> {
        let sku = raw.sku.trim();
        let brand = raw.brand.trim().to_uppercase();
        let model = raw.model.trim().to_uppercase();
        if sku.is_empty() || brand.is_empty() || model.is_empty() {
            return None;
        }

        if self.is_damaged(raw) {
            return None;
        }

        let price = parse_price(&raw.price)?;

        Some(Listing {
            sku: sku.to_string(),
            brand,
            model,
            description: raw.description.trim().to_string(),
            price,
            branch: raw.branch.trim().to_string(),
            family: raw
                .family
                .as_deref()
                .map(str::trim)
                .filter(|f| !f.is_empty())
                .map(str::to_string),
        })
    }

    fn is_damaged(&self, raw: &RawListing) -> bool {
        let description = raw.description.to_lowercase();
        let kind = raw.kind.as_deref().unwrap_or_default().trim().to_lowercase();

        kind == REPORTED_KIND
            || self
                .damage_keywords
                .iter()
                .any(|k| description.contains(k.as_str()) || kind.contains(k.as_str()))
    }
}

/// Parse a display price such as `"$ 6,599.00"`.
///
/// Currency symbols, thousands separators and other decoration are
/// stripped; a leading minus survives so negative prices are rejected.
/// Returns `None` unless the result is a positive decimal.
pub fn parse_price(value: &str) -> Option<Decimal> {
    let cleaned: String = value
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
        .collect();

    let price = Decimal::from_str(&cleaned).ok()?;
    (price > Decimal::ZERO).then_some(price)
}

/// Normalize raw records and partition them by (brand, model).
///
/// Groups come back in key order; each is sorted ascending by price.
pub fn group_listings(raw: &[RawListing], normalizer: &ListingNormalizer) -> Vec<ModelGroup> {
    let mut dropped = 0usize;
    let mut by_model: BTreeMap<ModelKey, Vec<Listing>> = BTreeMap::new();

    for record in raw {
        match normalizer.normalize(record) {
            Some(listing) => by_model.entry(listing.key()).or_default().push(listing),
            None => dropped += 1,
        }
    }

    if dropped > 0 {
        debug!("Dropped {} of {} raw listings", dropped, raw.len());
    }

    by_model
        .into_iter()
        .map(|(key, listings)| ModelGroup::new(key, listings))
        .collect()
}
