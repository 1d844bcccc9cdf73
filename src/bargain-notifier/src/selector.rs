//! Bargain candidate selection.

use rust_decimal::Decimal;
use tracing::debug;

use crate::estimator::estimate;
use crate::models::{BargainCandidate, DominantRange, ModelGroup, PriceBands};

/// Selects underpriced units from model groups.
///
/// Only the K cheapest units of a model are considered. Looking further
/// up the price list mostly finds cheaper configurations of the same
/// model (less storage, less memory), not genuine bargains.
pub struct BargainSelector {
    /// Cheapest units considered per group (K)
    candidate_count: usize,
    /// Minimum margin against the dominant minimum price (M)
    min_margin: Decimal,
    /// Groups smaller than this are not analyzed
    min_group_size: usize,
}

/// Counters from a selection pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SelectionStats {
    pub groups_total: usize,
    pub groups_too_small: usize,
    pub groups_with_bargains: usize,
}

impl BargainSelector {
    /// Create a new bargain selector.
    pub fn new(candidate_count: usize, min_margin: Decimal, min_group_size: usize) -> Self {
        Self {
            candidate_count,
            min_margin,
            min_group_size,
        }
    }

    /// Select candidates from one group given its dominant range.
    ///
    /// Returns an empty list when no cheapest-K unit clears the margin floor.
    pub fn select(&self, group: &ModelGroup, range: &DominantRange) -> Vec<BargainCandidate> {
        let stats = range.stats;
        let reference = range.dominant_min_price();

        let kept: Vec<_> = group
            .listings()
            .iter()
            .take(self.candidate_count)
            .filter(|l| reference - l.price >= self.min_margin)
            .collect();

        let Some(cheapest) = kept.first() else {
            return Vec::new();
        };
        let bands = price_bands(group, range, cheapest.price);

        kept.into_iter()
            .map(|listing| BargainCandidate {
                listing: listing.clone(),
                margin_vs_dominant_avg: stats.dominant_average - listing.price,
                margin_vs_q1: stats.q1 - listing.price,
                margin_vs_dominant_min: reference - listing.price,
                stats,
                bands,
            })
            .collect()
    }

    /// Estimate and select across all groups, skipping undersized ones.
    pub fn scan_groups(&self, groups: &[ModelGroup]) -> (Vec<BargainCandidate>, SelectionStats) {
        let mut stats = SelectionStats {
            groups_total: groups.len(),
            ..Default::default()
        };
        let mut candidates = Vec::new();

        for group in groups {
            if group.len() < self.min_group_size {
                stats.groups_too_small += 1;
                continue;
            }

            let Some(range) = estimate(group) else {
                continue;
            };

            let selected = self.select(group, &range);
            if selected.is_empty() {
                continue;
            }

            debug!(
                "{}: {} bargains (Q1={}, Q3={}, cluster={}, dominant avg={:.2}, dominant max={}, cheapest={})",
                group.key(),
                selected.len(),
                range.stats.q1,
                range.stats.q3,
                range.cluster_size,
                range.stats.dominant_average,
                range
                    .dominant_max
                    .as_ref()
                    .map(|l| l.price.to_string())
                    .unwrap_or_else(|| "-".to_string()),
                selected[0].price()
            );

            stats.groups_with_bargains += 1;
            candidates.extend(selected);
        }

        (candidates, stats)
    }
}

/// Count the group's listings below, inside and above the dominant range.
fn price_bands(group: &ModelGroup, range: &DominantRange, low_from: Decimal) -> PriceBands {
    let q1 = range.stats.q1;
    let q3 = range.stats.q3;
    let high_to = group.max_price().unwrap_or(q3);
    let prices = group.prices();

    let count = |pred: &dyn Fn(Decimal) -> bool| prices.iter().filter(|p| pred(**p)).count();

    PriceBands {
        low_from,
        low_to: q1,
        low_count: count(&|p| p >= low_from && p <= q1),
        dominant_count: count(&|p| p >= q1 && p <= q3),
        high_from: q3,
        high_to,
        high_count: count(&|p| p > q3 && p <= high_to),
    }
}
