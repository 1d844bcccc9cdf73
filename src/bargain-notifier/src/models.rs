//! Bargain detection models.

use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Grouping key: brand and model, trimmed and uppercased.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ModelKey {
    pub brand: String,
    pub model: String,
}

impl ModelKey {
    pub fn new(brand: &str, model: &str) -> Self {
        Self {
            brand: brand.trim().to_uppercase(),
            model: model.trim().to_uppercase(),
        }
    }
}

impl fmt::Display for ModelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.brand, self.model)
    }
}

/// A validated catalog unit. Price is always positive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Listing {
    pub sku: String,
    pub brand: String,
    pub model: String,
    pub description: String,
    pub price: Decimal,
    pub branch: String,
    pub family: Option<String>,
}

impl Listing {
    pub fn key(&self) -> ModelKey {
        ModelKey::new(&self.brand, &self.model)
    }
}

/// All listings of one model, ascending by price.
#[derive(Debug, Clone)]
pub struct ModelGroup {
    key: ModelKey,
    listings: Vec<Listing>,
}

impl ModelGroup {
    /// Build a group, sorting by price. The sort is stable so equal
    /// prices keep their input order.
    pub fn new(key: ModelKey, mut listings: Vec<Listing>) -> Self {
        listings.sort_by(|a, b| a.price.cmp(&b.price));
        Self { key, listings }
    }

    pub fn key(&self) -> &ModelKey {
        &self.key
    }

    pub fn listings(&self) -> &[Listing] {
        &self.listings
    }

    pub fn len(&self) -> usize {
        self.listings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listings.is_empty()
    }

    /// Sorted price sequence.
    pub fn prices(&self) -> Vec<Decimal> {
        self.listings.iter().map(|l| l.price).collect()
    }

    pub fn max_price(&self) -> Option<Decimal> {
        self.listings.last().map(|l| l.price)
    }
}

/// Quartile statistics of a group's prices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceStatistics {
    pub q1: Decimal,
    pub q3: Decimal,
    pub median: Decimal,
    pub dominant_average: Decimal,
}

/// Estimator output: statistics plus the dominant cluster's extremes.
#[derive(Debug, Clone)]
pub struct DominantRange {
    pub stats: PriceStatistics,
    /// Number of listings priced inside [Q1, Q3]
    pub cluster_size: usize,
    /// Highest-priced listing in the cluster (first occurrence on ties)
    pub dominant_max: Option<Listing>,
    /// Lowest-priced listing in the cluster (first occurrence on ties)
    pub dominant_min: Option<Listing>,
}

impl DominantRange {
    /// Reference price for the profit floor: the cheapest dominant unit,
    /// or Q1 when the cluster is empty.
    pub fn dominant_min_price(&self) -> Decimal {
        self.dominant_min
            .as_ref()
            .map(|l| l.price)
            .unwrap_or(self.stats.q1)
    }
}

/// Price distribution of a group, split around the dominant range.
///
/// Used only for message composition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceBands {
    /// Cheapest candidate price
    pub low_from: Decimal,
    /// Q1
    pub low_to: Decimal,
    /// Listings in [low_from, Q1]
    pub low_count: usize,
    /// Listings in [Q1, Q3]
    pub dominant_count: usize,
    /// Q3
    pub high_from: Decimal,
    /// Most expensive listing
    pub high_to: Decimal,
    /// Listings in (Q3, high_to]
    pub high_count: usize,
}

/// A cheapest-K unit whose margin clears the profit floor.
#[derive(Debug, Clone)]
pub struct BargainCandidate {
    pub listing: Listing,
    pub margin_vs_dominant_avg: Decimal,
    pub margin_vs_q1: Decimal,
    pub margin_vs_dominant_min: Decimal,
    pub stats: PriceStatistics,
    pub bands: PriceBands,
}

impl BargainCandidate {
    pub fn sku(&self) -> &str {
        &self.listing.sku
    }

    pub fn branch(&self) -> &str {
        &self.listing.branch
    }

    pub fn price(&self) -> Decimal {
        self.listing.price
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn listing(sku: &str, price: Decimal, branch: &str) -> Listing {
        Listing {
            sku: sku.to_string(),
            brand: "APPLE".to_string(),
            model: "A2633".to_string(),
            description: "iPhone 13 128GB".to_string(),
            price,
            branch: branch.to_string(),
            family: Some("CELULARES".to_string()),
        }
    }

    pub fn group(prices: &[Decimal]) -> ModelGroup {
        let listings = prices
            .iter()
            .enumerate()
            .map(|(i, p)| listing(&format!("SKU{}", i), *p, "Centro"))
            .collect();
        ModelGroup::new(ModelKey::new("Apple", "A2633"), listings)
    }
}
