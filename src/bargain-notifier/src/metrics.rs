//! Per-cycle metrics.

use tracing::info;

/// Counters for one notification cycle.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CycleMetrics {
    pub total_cycle_ms: u64,
    pub detection_ms: u64,
    pub dispatch_ms: u64,
    pub listings_scanned: usize,
    pub groups_total: usize,
    pub groups_too_small: usize,
    pub groups_with_bargains: usize,
    pub candidates_found: usize,
    /// Candidates in today's eligible branches
    pub candidates_eligible: usize,
    /// Skipped because already notified today
    pub already_sent: usize,
    pub messages_sent: usize,
    pub messages_failed: usize,
}

impl CycleMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Emit the one-line cycle summary.
    pub fn log_summary(&self, cycle_id: &str) {
        info!(
            "[DISPATCH] Cycle {} done in {}ms (detect: {}ms, dispatch: {}ms) | Listings: {} | Groups: {} ({} too small, {} with bargains) | Candidates: {} ({} eligible, {} already sent) | Sent: {} | Failed: {}",
            cycle_id,
            self.total_cycle_ms,
            self.detection_ms,
            self.dispatch_ms,
            self.listings_scanned,
            self.groups_total,
            self.groups_too_small,
            self.groups_with_bargains,
            self.candidates_found,
            self.candidates_eligible,
            self.already_sent,
            self.messages_sent,
            self.messages_failed
        );
    }
}

/// Totals across cycles of one process run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SessionTotals {
    pub cycles: usize,
    pub messages_sent: usize,
    pub messages_failed: usize,
    pub candidates_found: usize,
}

impl SessionTotals {
    pub fn record(&mut self, cycle: &CycleMetrics) {
        self.cycles += 1;
        self.messages_sent += cycle.messages_sent;
        self.messages_failed += cycle.messages_failed;
        self.candidates_found += cycle.candidates_found;
    }
}
