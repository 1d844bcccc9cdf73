//! Dominant price range estimation.
//!
//! The "dominant" range of a model is its interquartile band [Q1, Q3]:
//! the price most units of that model are actually listed at. Quartiles
//! use linear interpolation between closest ranks (rank = p/100 * (n - 1)),
//! the same definition as numpy's default percentile.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use crate::models::{DominantRange, ModelGroup, PriceStatistics};

/// Linear-interpolation percentile of an ascending slice.
///
/// `p` is in percent (0..=100). Returns `None` for an empty slice.
pub fn percentile(sorted: &[Decimal], p: Decimal) -> Option<Decimal> {
    let last = sorted.len().checked_sub(1)?;

    let rank = p / Decimal::ONE_HUNDRED * Decimal::from(last);
    let lower = rank.floor().to_usize()?.min(last);
    let upper = (lower + 1).min(last);
    let fraction = rank - Decimal::from(lower);

    Some(sorted[lower] + (sorted[upper] - sorted[lower]) * fraction)
}

/// Compute quartile statistics and dominant cluster references for a group.
///
/// Returns `None` only for an empty group. The population floor is
/// enforced by the caller.
pub fn estimate(group: &ModelGroup) -> Option<DominantRange> {
    if group.is_empty() {
        return None;
    }
    let prices = group.prices();

    let q1 = percentile(&prices, Decimal::from(25))?;
    let median = percentile(&prices, Decimal::from(50))?;
    let q3 = percentile(&prices, Decimal::from(75))?;

    let cluster: Vec<_> = group
        .listings()
        .iter()
        .filter(|l| l.price >= q1 && l.price <= q3)
        .collect();

    // An empty band is possible when the interpolated quartiles fall
    // strictly between two adjacent prices. A sum past Decimal::MAX also
    // falls back to the median.
    let dominant_average = cluster
        .iter()
        .try_fold(Decimal::ZERO, |sum, l| sum.checked_add(l.price))
        .filter(|_| !cluster.is_empty())
        .and_then(|sum| sum.checked_div(Decimal::from(cluster.len())))
        .unwrap_or(median);

    // Listings are sorted ascending, so the first cluster member is the
    // minimum and the first member at the top price is the maximum.
    let dominant_min = cluster.first().map(|l| (*l).clone());
    let dominant_max = cluster.last().and_then(|top| {
        cluster
            .iter()
            .find(|l| l.price == top.price)
            .map(|l| (*l).clone())
    });

    Some(DominantRange {
        stats: PriceStatistics {
            q1,
            q3,
            median,
            dominant_average,
        },
        cluster_size: cluster.len(),
        dominant_max,
        dominant_min,
    })
}
