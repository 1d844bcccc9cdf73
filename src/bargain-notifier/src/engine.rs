//! One notification cycle: detection, scheduling and dispatch.

use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use chrono::NaiveDateTime;
use common::RawListing;
use tracing::{debug, info};
use uuid::Uuid;

use crate::dispatcher::DispatchCoordinator;
use crate::grouper::{group_listings, ListingNormalizer};
use crate::metrics::CycleMetrics;
use crate::models::BargainCandidate;
use crate::rotation::{BranchRotation, CyclePhase, DayPlan, RotationState, StateStore};
use crate::selector::BargainSelector;
use crate::transport::MessageHandle;

/// Result of [`BargainEngine::run_cycle`].
#[derive(Debug)]
pub struct CycleOutcome {
    pub state: RotationState,
    pub metrics: CycleMetrics,
}

/// The bargain detection and notification engine.
pub struct BargainEngine {
    normalizer: ListingNormalizer,
    selector: BargainSelector,
    rotation: BranchRotation,
    coordinator: DispatchCoordinator,
    store: Arc<dyn StateStore>,
}

impl BargainEngine {
    pub fn new(
        normalizer: ListingNormalizer,
        selector: BargainSelector,
        rotation: BranchRotation,
        coordinator: DispatchCoordinator,
        store: Arc<dyn StateStore>,
    ) -> Self {
        Self {
            normalizer,
            selector,
            rotation,
            coordinator,
            store,
        }
    }

    /// Load persisted state and plan the cycle for `now`, persisting any
    /// rollover.
    pub fn begin_day(&self, now: NaiveDateTime) -> Result<(RotationState, DayPlan)> {
        let mut state = self.store.load();
        let plan = self.rotation.plan(&mut state, now);

        if plan.state_changed {
            self.store.save(&state)?;
        }

        debug!(
            "[ROTATION] {:?}: cursor={} eligible={:?} sent_today={}",
            plan.phase,
            state.cursor,
            plan.eligible,
            state.sent_skus_today.len()
        );
        Ok((state, plan))
    }

    /// Group, estimate and select across the whole catalog.
    pub fn detect(&self, raw: &[RawListing], metrics: &mut CycleMetrics) -> Vec<BargainCandidate> {
        let groups = group_listings(raw, &self.normalizer);
        let (candidates, stats) = self.selector.scan_groups(&groups);

        metrics.listings_scanned = raw.len();
        metrics.groups_total = stats.groups_total;
        metrics.groups_too_small = stats.groups_too_small;
        metrics.groups_with_bargains = stats.groups_with_bargains;
        metrics.candidates_found = candidates.len();

        candidates
    }

    /// Run one cycle against `plan`. Only an in-progress plan does work.
    pub async fn run_cycle(
        &self,
        mut state: RotationState,
        plan: &DayPlan,
        raw: &[RawListing],
    ) -> Result<CycleOutcome> {
        let mut metrics = CycleMetrics::new();
        if plan.phase != CyclePhase::InProgress {
            return Ok(CycleOutcome { state, metrics });
        }

        let cycle_id = Uuid::new_v4().to_string();
        let cycle_start = Instant::now();
        info!(
            "[DISPATCH] Cycle {} starting for branches {:?}",
            cycle_id, plan.eligible
        );

        let detect_start = Instant::now();
        let candidates = self.detect(raw, &mut metrics);
        metrics.detection_ms = detect_start.elapsed().as_millis() as u64;

        let dispatch_start = Instant::now();
        let report = self
            .coordinator
            .dispatch(candidates, &plan.eligible, &mut state)
            .await?;
        metrics.dispatch_ms = dispatch_start.elapsed().as_millis() as u64;

        metrics.candidates_eligible = report.eligible;
        metrics.already_sent = report.already_sent;
        metrics.messages_sent = report.sent;
        metrics.messages_failed = report.failed;
        metrics.total_cycle_ms = cycle_start.elapsed().as_millis() as u64;
        metrics.log_summary(&cycle_id);

        Ok(CycleOutcome { state, metrics })
    }

    pub async fn retract(&self, handle: &MessageHandle) -> Result<()> {
        self.coordinator.retract(handle).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::DispatchSettings;
    use crate::message::MessageComposer;
    use crate::rotation::{MockStateStore, OperatingWindow};
    use crate::transport::MockNotifier;
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;
    use std::time::Duration;

    fn raw(sku: &str, model: &str, price: &str, branch: &str) -> RawListing {
        RawListing {
            sku: sku.to_string(),
            brand: "Apple".to_string(),
            model: model.to_string(),
            description: "iPhone".to_string(),
            price: price.to_string(),
            branch: branch.to_string(),
            family: Some("CELULARES".to_string()),
            kind: None,
        }
    }

    fn catalog() -> Vec<RawListing> {
        let mut listings = vec![
            raw("CHEAP-A", "A2633", "$3,000.00", "A"),
            raw("CHEAP-D", "A2633", "$4,000.00", "D"),
        ];
        for (i, branch) in ["A", "B", "C", "D", "E", "A", "B"].iter().enumerate() {
            listings.push(raw(&format!("P{}", i), "A2633", "$6,000.00", branch));
        }
        // Too few to analyze
        listings.push(raw("LONE", "A2111", "$100.00", "A"));
        listings
    }

    fn engine(notifier: MockNotifier, store: MockStateStore) -> BargainEngine {
        let notifier = Arc::new(notifier);
        let store: Arc<dyn StateStore> = Arc::new(store);
        let window = OperatingWindow {
            start_hour: 7,
            end_hour: 20,
        };
        let branches: Vec<String> = ["A", "B", "C", "D", "E"]
            .iter()
            .map(|s| s.to_string())
            .collect();

        BargainEngine::new(
            ListingNormalizer::default(),
            BargainSelector::new(4, dec!(500), 5),
            BranchRotation::new(branches.clone(), 3, window),
            DispatchCoordinator::new(
                notifier,
                store.clone(),
                MessageComposer::new("C123"),
                vec!["CELULARES".to_string()],
                branches,
                DispatchSettings {
                    message_interval: Duration::ZERO,
                    post_attempts: 1,
                    retry_initial_delay: Duration::ZERO,
                    retry_max_delay: Duration::ZERO,
                },
            ),
            store,
        )
    }

    fn at(day: u32, hour: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, day)
            .unwrap()
            .and_hms_opt(hour, 0, 0)
            .unwrap()
    }

    #[test]
    fn test_detect_reports_group_counts() {
        let engine = engine(MockNotifier::new(), MockStateStore::new());
        let mut metrics = CycleMetrics::new();

        let candidates = engine.detect(&catalog(), &mut metrics);

        let skus: Vec<_> = candidates.iter().map(|c| c.sku()).collect();
        assert_eq!(skus, vec!["CHEAP-A", "CHEAP-D"]);
        assert_eq!(metrics.listings_scanned, 10);
        assert_eq!(metrics.groups_total, 2);
        assert_eq!(metrics.groups_too_small, 1);
        assert_eq!(metrics.groups_with_bargains, 1);
    }

    #[test]
    fn test_begin_day_persists_rollover() {
        let mut store = MockStateStore::new();
        store.expect_load().returning(|| RotationState {
            cursor: 0,
            last_rollover_date: NaiveDate::from_ymd_opt(2024, 3, 1),
            ..Default::default()
        });
        store
            .expect_save()
            .withf(|s| s.cursor == 3)
            .times(1)
            .returning(|_| Ok(()));

        let engine = engine(MockNotifier::new(), store);
        let (state, plan) = engine.begin_day(at(2, 9)).unwrap();

        assert_eq!(state.cursor, 3);
        assert_eq!(plan.eligible, vec!["D", "E", "A"]);
    }

    #[tokio::test]
    async fn test_run_cycle_sends_only_eligible_branches() {
        let mut notifier = MockNotifier::new();
        notifier
            .expect_post()
            .times(1)
            .returning(|_| {
                Ok(MessageHandle {
                    channel: "C123".to_string(),
                    ts: "1.1".to_string(),
                })
            });
        notifier.expect_update().returning(|_, _| Ok(()));

        let mut store = MockStateStore::new();
        store.expect_load().returning(RotationState::default);
        store.expect_save().returning(|_| Ok(()));

        let engine = engine(notifier, store);
        let (state, plan) = engine.begin_day(at(1, 9)).unwrap();
        assert_eq!(plan.eligible, vec!["A", "B", "C"]);

        let outcome = engine.run_cycle(state, &plan, &catalog()).await.unwrap();

        // CHEAP-D is at branch D, not eligible on day 1
        assert!(outcome.state.is_sent("CHEAP-A"));
        assert!(!outcome.state.is_sent("CHEAP-D"));
        assert!(outcome.state.cycle_complete_today);
        assert_eq!(outcome.metrics.messages_sent, 1);
        assert_eq!(outcome.metrics.candidates_eligible, 1);
    }

    #[tokio::test]
    async fn test_run_cycle_idle_does_nothing() {
        let mut notifier = MockNotifier::new();
        notifier.expect_post().times(0);

        let engine = engine(notifier, MockStateStore::new());
        let plan = DayPlan {
            phase: CyclePhase::Complete,
            eligible: Vec::new(),
            state_changed: false,
        };

        let outcome = engine
            .run_cycle(RotationState::default(), &plan, &catalog())
            .await
            .unwrap();

        assert_eq!(outcome.metrics, CycleMetrics::default());
    }
}
