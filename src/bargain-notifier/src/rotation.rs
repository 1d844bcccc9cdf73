//! Branch rotation scheduling and rotation state persistence.
//!
//! Each calendar day a window of `batch_size` branches, starting at the
//! persisted cursor, is eligible for notifications. The cursor advances
//! once per new day and wraps around the branch list.

use std::collections::BTreeSet;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Locks older than this are assumed to belong to a dead process.
const STALE_LOCK_AGE: Duration = Duration::from_secs(12 * 60 * 60);

#[derive(Debug, Error)]
pub enum StateError {
    #[error("State file I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("State serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("State lock held: {0}")]
    Locked(String),
}

/// Persisted rotation state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RotationState {
    #[serde(default)]
    pub cursor: usize,
    #[serde(default)]
    pub last_rollover_date: Option<NaiveDate>,
    #[serde(default)]
    pub sent_skus_today: BTreeSet<String>,
    #[serde(default)]
    pub cycle_complete_today: bool,
}

impl RotationState {
    /// Bring the state to `today`. Returns true if the state changed.
    ///
    /// A fresh state is stamped without advancing. A later date advances
    /// the cursor by `step` (once, however many days were skipped) and
    /// clears the day's progress. An earlier date is clock skew and is
    /// treated as the same day.
    pub fn advance_to(&mut self, today: NaiveDate, step: usize, branch_count: usize) -> bool {
        match self.last_rollover_date {
            None => {
                self.last_rollover_date = Some(today);
                true
            }
            Some(last) if today > last => {
                self.cursor = if branch_count == 0 {
                    0
                } else {
                    (self.cursor + step) % branch_count
                };
                self.sent_skus_today.clear();
                self.cycle_complete_today = false;
                self.last_rollover_date = Some(today);
                true
            }
            Some(_) => false,
        }
    }

    pub fn is_sent(&self, sku: &str) -> bool {
        self.sent_skus_today.contains(sku)
    }

    pub fn mark_sent(&mut self, sku: &str) {
        self.sent_skus_today.insert(sku.to_string());
    }

    pub fn complete_cycle(&mut self) {
        self.cycle_complete_today = true;
    }
}

/// Scheduler state for the current moment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CyclePhase {
    /// Outside the operating window
    IdleWaitingForDay,
    /// Today's cycle still has work to do
    InProgress,
    /// Today's cycle finished; nothing to do until tomorrow
    Complete,
}

/// Daily operating hours, `[start_hour, end_hour)` in local time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperatingWindow {
    pub start_hour: u32,
    pub end_hour: u32,
}

impl OperatingWindow {
    pub fn contains(&self, time: NaiveTime) -> bool {
        let hour = time.hour();
        if self.start_hour <= self.end_hour {
            hour >= self.start_hour && hour < self.end_hour
        } else {
            hour >= self.start_hour || hour < self.end_hour
        }
    }

    /// Time from `now` until the window next opens (zero when open).
    pub fn until_open(&self, now: NaiveDateTime) -> Duration {
        if self.contains(now.time()) {
            return Duration::ZERO;
        }

        let Some(mut open) = now.date().and_hms_opt(self.start_hour, 0, 0) else {
            return Duration::ZERO;
        };
        if open <= now {
            open += chrono::Duration::days(1);
        }

        (open - now).to_std().unwrap_or_default()
    }
}

/// Scheduler output for one cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DayPlan {
    pub phase: CyclePhase,
    /// Today's eligible branches, in global branch order from the cursor
    pub eligible: Vec<String>,
    /// Whether `plan` changed the state (it must be persisted)
    pub state_changed: bool,
}

/// Rotates the eligible branch window across days.
#[derive(Debug, Clone)]
pub struct BranchRotation {
    branches: Vec<String>,
    batch_size: usize,
    window: OperatingWindow,
}

impl BranchRotation {
    pub fn new(branches: Vec<String>, batch_size: usize, window: OperatingWindow) -> Self {
        Self {
            branches,
            batch_size,
            window,
        }
    }

    /// The `batch_size` branches starting at `cursor`, wrapping.
    /// Never repeats a branch when the batch exceeds the list.
    pub fn eligible_branches(&self, cursor: usize) -> Vec<String> {
        let n = self.branches.len();
        if n == 0 {
            return Vec::new();
        }

        (0..self.batch_size.min(n))
            .map(|i| self.branches[(cursor + i) % n].clone())
            .collect()
    }

    /// Decide what today's cycle should do, rolling the state over on a
    /// new day.
    pub fn plan(&self, state: &mut RotationState, now: NaiveDateTime) -> DayPlan {
        if !self.window.contains(now.time()) {
            return DayPlan {
                phase: CyclePhase::IdleWaitingForDay,
                eligible: Vec::new(),
                state_changed: false,
            };
        }

        let previous_cursor = state.cursor;
        let state_changed = state.advance_to(now.date(), self.batch_size, self.branches.len());
        if state_changed && state.cursor != previous_cursor {
            info!(
                "[ROTATION] New day {}: cursor {} -> {}",
                now.date(),
                previous_cursor,
                state.cursor
            );
        }

        if state.cycle_complete_today {
            return DayPlan {
                phase: CyclePhase::Complete,
                eligible: Vec::new(),
                state_changed,
            };
        }

        let eligible = self.eligible_branches(state.cursor);
        if eligible.is_empty() {
            warn!("[ROTATION] No branches configured; nothing is eligible");
        }

        DayPlan {
            phase: CyclePhase::InProgress,
            eligible,
            state_changed,
        }
    }
}

/// Load/save boundary for [`RotationState`].
#[cfg_attr(test, mockall::automock)]
pub trait StateStore: Send + Sync {
    /// Load the state. Absent or unreadable state yields the zero value.
    fn load(&self) -> RotationState;

    /// Persist the state.
    fn save(&self, state: &RotationState) -> Result<(), StateError>;
}

/// JSON state file, replaced atomically on save.
pub struct StateFile {
    path: PathBuf,
}

impl StateFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StateStore for StateFile {
    fn load(&self) -> RotationState {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("[ROTATION] No state file at {}", self.path.display());
                return RotationState::default();
            }
            Err(e) => {
                warn!(
                    "[ROTATION] Cannot read {}: {}; starting fresh",
                    self.path.display(),
                    e
                );
                return RotationState::default();
            }
        };

        serde_json::from_str(&contents).unwrap_or_else(|e| {
            warn!(
                "[ROTATION] Corrupt state file {}: {}; starting fresh",
                self.path.display(),
                e
            );
            RotationState::default()
        })
    }

    fn save(&self, state: &RotationState) -> Result<(), StateError> {
        let json = serde_json::to_string_pretty(state)?;
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

/// Exclusive guard over the state file, released on drop.
#[derive(Debug)]
pub struct StateLock {
    path: PathBuf,
}

impl StateLock {
    /// Take the lock next to `state_path`. A lock left behind longer
    /// than 12 hours is broken once.
    pub fn acquire(state_path: &Path) -> Result<Self, StateError> {
        let path = state_path.with_extension("lock");

        match Self::create(&path) {
            Err(StateError::Locked(_)) if Self::is_stale(&path) => {
                warn!("[ROTATION] Removing stale lock {}", path.display());
                fs::remove_file(&path)?;
                Self::create(&path)
            }
            result => result,
        }
    }

    fn create(path: &Path) -> Result<Self, StateError> {
        match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(mut file) => {
                writeln!(file, "{}", std::process::id())?;
                Ok(Self {
                    path: path.to_path_buf(),
                })
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                Err(StateError::Locked(path.display().to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn is_stale(path: &Path) -> bool {
        fs::metadata(path)
            .and_then(|m| m.modified())
            .ok()
            .and_then(|modified| SystemTime::now().duration_since(modified).ok())
            .is_some_and(|age| age > STALE_LOCK_AGE)
    }
}

impl Drop for StateLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!("[ROTATION] Failed to remove lock {}: {}", self.path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: OperatingWindow = OperatingWindow {
        start_hour: 7,
        end_hour: 20,
    };

    fn branches(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
    }

    fn at(d: u32, hour: u32) -> NaiveDateTime {
        day(d).and_hms_opt(hour, 0, 0).unwrap()
    }

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("{}-{}.json", name, uuid::Uuid::new_v4()))
    }

    // ============ RotationState TESTS ============

    #[test]
    fn test_fresh_state_stamps_without_advancing() {
        let mut state = RotationState::default();

        assert!(state.advance_to(day(1), 3, 5));
        assert_eq!(state.cursor, 0);
        assert_eq!(state.last_rollover_date, Some(day(1)));
    }

    #[test]
    fn test_new_day_resets_progress() {
        let mut state = RotationState {
            cursor: 0,
            last_rollover_date: Some(day(1)),
            sent_skus_today: ["X1".to_string()].into(),
            cycle_complete_today: true,
        };

        assert!(state.advance_to(day(2), 3, 5));
        assert_eq!(state.cursor, 3);
        assert!(state.sent_skus_today.is_empty());
        assert!(!state.cycle_complete_today);
    }

    #[test]
    fn test_advances_once_per_day() {
        let mut state = RotationState {
            last_rollover_date: Some(day(1)),
            ..Default::default()
        };

        assert!(state.advance_to(day(2), 3, 5));
        assert!(!state.advance_to(day(2), 3, 5));
        assert!(!state.advance_to(day(2), 3, 5));
        assert_eq!(state.cursor, 3);
    }

    #[test]
    fn test_multi_day_gap_advances_once() {
        let mut state = RotationState {
            last_rollover_date: Some(day(1)),
            ..Default::default()
        };

        state.advance_to(day(9), 3, 5);
        assert_eq!(state.cursor, 3);
    }

    #[test]
    fn test_clock_skew_is_same_day() {
        let mut state = RotationState {
            cursor: 2,
            last_rollover_date: Some(day(5)),
            sent_skus_today: ["X1".to_string()].into(),
            ..Default::default()
        };

        assert!(!state.advance_to(day(4), 3, 5));
        assert_eq!(state.cursor, 2);
        assert_eq!(state.last_rollover_date, Some(day(5)));
        assert!(state.is_sent("X1"));
    }

    #[test]
    fn test_empty_branch_list_keeps_cursor_zero() {
        let mut state = RotationState {
            cursor: 4,
            last_rollover_date: Some(day(1)),
            ..Default::default()
        };

        state.advance_to(day(2), 3, 0);
        assert_eq!(state.cursor, 0);
    }

    // ============ BranchRotation TESTS ============

    #[test]
    fn test_five_branch_rotation_scenario() {
        let rotation = BranchRotation::new(branches(&["A", "B", "C", "D", "E"]), 3, WINDOW);
        let mut state = RotationState::default();

        let plan = rotation.plan(&mut state, at(1, 9));
        assert_eq!(plan.phase, CyclePhase::InProgress);
        assert_eq!(plan.eligible, branches(&["A", "B", "C"]));

        let plan = rotation.plan(&mut state, at(2, 9));
        assert_eq!(state.cursor, 3);
        assert_eq!(plan.eligible, branches(&["D", "E", "A"]));

        let plan = rotation.plan(&mut state, at(3, 9));
        assert_eq!(state.cursor, 1);
        assert_eq!(plan.eligible, branches(&["B", "C", "D"]));
    }

    #[test]
    fn test_plan_outside_window_is_idle_and_untouched() {
        let rotation = BranchRotation::new(branches(&["A", "B"]), 1, WINDOW);
        let mut state = RotationState {
            last_rollover_date: Some(day(1)),
            ..Default::default()
        };

        let plan = rotation.plan(&mut state, at(2, 5));

        assert_eq!(plan.phase, CyclePhase::IdleWaitingForDay);
        assert!(!plan.state_changed);
        assert_eq!(state.last_rollover_date, Some(day(1)));
    }

    #[test]
    fn test_plan_complete_cycle_same_day() {
        let rotation = BranchRotation::new(branches(&["A", "B"]), 1, WINDOW);
        let mut state = RotationState {
            last_rollover_date: Some(day(1)),
            cycle_complete_today: true,
            ..Default::default()
        };

        let plan = rotation.plan(&mut state, at(1, 15));
        assert_eq!(plan.phase, CyclePhase::Complete);
        assert!(plan.eligible.is_empty());

        let plan = rotation.plan(&mut state, at(2, 8));
        assert_eq!(plan.phase, CyclePhase::InProgress);
        assert_eq!(plan.eligible, branches(&["B"]));
    }

    #[test]
    fn test_plan_with_no_branches() {
        let rotation = BranchRotation::new(Vec::new(), 3, WINDOW);
        let mut state = RotationState::default();

        let plan = rotation.plan(&mut state, at(1, 9));
        assert_eq!(plan.phase, CyclePhase::InProgress);
        assert!(plan.eligible.is_empty());
    }

    #[test]
    fn test_batch_larger_than_list_covers_each_once() {
        let rotation = BranchRotation::new(branches(&["A", "B"]), 5, WINDOW);
        assert_eq!(rotation.eligible_branches(1), branches(&["B", "A"]));
    }

    #[test]
    fn test_every_branch_covered_within_ceil_n_over_b_days() {
        for n in 1..=8usize {
            for b in 1..=4usize {
                let names: Vec<String> = (0..n).map(|i| format!("B{}", i)).collect();
                let rotation = BranchRotation::new(names.clone(), b, WINDOW);
                let mut state = RotationState::default();
                let mut seen = BTreeSet::new();

                for d in 1..=(n.div_ceil(b) as u32) {
                    seen.extend(rotation.plan(&mut state, at(d, 10)).eligible);
                }

                assert_eq!(seen.len(), n, "n={} b={}", n, b);
            }
        }
    }

    #[test]
    fn test_cursor_returns_when_batch_divides_list() {
        let rotation = BranchRotation::new(branches(&["A", "B", "C", "D", "E", "F"]), 3, WINDOW);
        let mut state = RotationState::default();
        rotation.plan(&mut state, at(1, 10));

        for d in 2..=3 {
            rotation.plan(&mut state, at(d, 10));
        }

        assert_eq!(state.cursor, 0);
    }

    // ============ OperatingWindow TESTS ============

    #[test]
    fn test_window_bounds() {
        assert!(!WINDOW.contains(NaiveTime::from_hms_opt(6, 59, 0).unwrap()));
        assert!(WINDOW.contains(NaiveTime::from_hms_opt(7, 0, 0).unwrap()));
        assert!(WINDOW.contains(NaiveTime::from_hms_opt(19, 59, 0).unwrap()));
        assert!(!WINDOW.contains(NaiveTime::from_hms_opt(20, 0, 0).unwrap()));
    }

    #[test]
    fn test_until_open() {
        assert_eq!(WINDOW.until_open(at(1, 10)), Duration::ZERO);
        assert_eq!(WINDOW.until_open(at(1, 5)), Duration::from_secs(2 * 3600));
        assert_eq!(WINDOW.until_open(at(1, 21)), Duration::from_secs(10 * 3600));
    }

    // ============ StateFile TESTS ============

    #[test]
    fn test_state_file_round_trip() {
        let store = StateFile::new(temp_path("rotation-state"));
        let mut state = RotationState {
            cursor: 3,
            last_rollover_date: Some(day(2)),
            ..Default::default()
        };
        state.mark_sent("X1");

        store.save(&state).unwrap();
        let loaded = store.load();

        assert_eq!(loaded, state);
        let _ = fs::remove_file(store.path());
    }

    #[test]
    fn test_state_file_schema() {
        let state = RotationState {
            cursor: 1,
            last_rollover_date: Some(day(3)),
            sent_skus_today: ["A1".to_string()].into(),
            cycle_complete_today: false,
        };

        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["last_rollover_date"], "2024-03-03");
        assert_eq!(json["sent_skus_today"], serde_json::json!(["A1"]));
    }

    #[test]
    fn test_missing_or_corrupt_state_is_zero_value() {
        let missing = StateFile::new(temp_path("rotation-missing"));
        assert_eq!(missing.load(), RotationState::default());

        let corrupt = StateFile::new(temp_path("rotation-corrupt"));
        fs::write(corrupt.path(), "{ not json").unwrap();
        assert_eq!(corrupt.load(), RotationState::default());
        let _ = fs::remove_file(corrupt.path());
    }

    // ============ StateLock TESTS ============

    #[test]
    fn test_lock_is_exclusive_and_released_on_drop() {
        let state_path = temp_path("rotation-lock");

        let lock = StateLock::acquire(&state_path).unwrap();
        assert!(matches!(
            StateLock::acquire(&state_path),
            Err(StateError::Locked(_))
        ));

        drop(lock);
        assert!(StateLock::acquire(&state_path).is_ok());
    }

    /// Leave a lock from another process, last touched `age` ago.
    fn abandoned_lock(state_path: &Path, age: Duration) -> PathBuf {
        let lock_path = state_path.with_extension("lock");
        fs::write(&lock_path, "99999\n").unwrap();
        OpenOptions::new()
            .write(true)
            .open(&lock_path)
            .unwrap()
            .set_modified(SystemTime::now() - age)
            .unwrap();
        lock_path
    }

    #[test]
    fn test_stale_lock_is_broken() {
        let state_path = temp_path("rotation-stale-lock");
        let lock_path = abandoned_lock(&state_path, STALE_LOCK_AGE + Duration::from_secs(3600));

        let lock = StateLock::acquire(&state_path).unwrap();
        let owner = fs::read_to_string(&lock_path).unwrap();
        assert_eq!(owner.trim(), std::process::id().to_string());

        drop(lock);
        assert!(!lock_path.exists());
    }

    #[test]
    fn test_recent_foreign_lock_is_respected() {
        let state_path = temp_path("rotation-recent-lock");
        let lock_path = abandoned_lock(&state_path, STALE_LOCK_AGE - Duration::from_secs(3600));

        assert!(matches!(
            StateLock::acquire(&state_path),
            Err(StateError::Locked(_))
        ));
        assert_eq!(fs::read_to_string(&lock_path).unwrap(), "99999\n");

        fs::remove_file(&lock_path).ok();
    }
}
