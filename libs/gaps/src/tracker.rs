//! Protocol-level gap tracking for one station
//!
//! [`GapTracker`] adds CD1.1 semantics on top of [`SequenceGapSet`]: rollover
//! detection from a provider's advertised range, and the filtered gap list
//! that goes into outbound acknacks.

use crate::error::GapError;
use crate::gap_set::{SequenceGap, SequenceGapSet, EMPTY_MARKER};
use chrono::{DateTime, TimeDelta, Utc};
use codec::Acknack;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Persisted form of a tracker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GapTrackerState {
    pub min: u64,
    pub max: u64,
    pub gaps: Vec<SequenceGap>,
}

/// Outcome of [`GapTracker::check_for_reset`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetCheck {
    /// Provider range rolled below the tracked range; tracker was reset
    Reset,
    Unchanged,
    /// Advertised range was inverted and ignored
    Rejected,
}

/// Inputs for an outbound acknack
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GapReport {
    pub lowest: u64,
    pub highest: u64,
    /// Flattened `[start, end)` pairs
    pub gaps: Vec<u64>,
}

impl GapReport {
    pub fn to_acknack(&self, frame_set_acked: impl Into<String>) -> Acknack {
        Acknack::new(frame_set_acked, self.lowest, self.highest, self.gaps.clone())
    }
}

#[derive(Debug)]
pub struct GapTracker {
    set: SequenceGapSet,
}

impl Default for GapTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl GapTracker {
    pub fn new() -> Self {
        Self {
            set: SequenceGapSet::bootstrap(),
        }
    }

    /// Restore a tracker from persisted state
    pub fn from_state(state: &GapTrackerState) -> Result<Self, GapError> {
        Ok(Self {
            set: SequenceGapSet::from_parts(state.min, state.max, &state.gaps)?,
        })
    }

    pub fn state(&self) -> GapTrackerState {
        let (min, max, gaps) = self.set.snapshot();
        GapTrackerState { min, max, gaps }
    }

    pub fn gap_set(&self) -> &SequenceGapSet {
        &self.set
    }

    /// Reset when the provider's whole advertised range lies below what is tracked
    pub fn check_for_reset(&self, lowest_seq: u64, highest_seq: u64) -> ResetCheck {
        if lowest_seq > highest_seq {
            warn!(
                lowest = lowest_seq,
                highest = highest_seq,
                "Ignoring inverted sequence range in reset check"
            );
            return ResetCheck::Rejected;
        }

        let reset = self
            .set
            .reinitialize_if(0, EMPTY_MARKER, |min, _| highest_seq < min);
        if reset {
            info!(
                lowest = lowest_seq,
                highest = highest_seq,
                "Provider sequence range rolled below tracked range, gaps reset"
            );
            ResetCheck::Reset
        } else {
            ResetCheck::Unchanged
        }
    }

    /// Discard all gaps and return to the bootstrap sentinel
    pub fn reset(&self) {
        self.set.reinitialize_if(0, EMPTY_MARKER, |_, _| true);
        debug!("Gap tracker reset");
    }

    pub fn process_sequence_number(&self, value: u64) -> bool {
        self.set.add_value(value)
    }

    pub fn process_sequence_range(&self, start: u64, end: u64) -> Result<(), GapError> {
        self.set.add_value_range(start, end)
    }

    pub fn highest_sequence_number(&self) -> u64 {
        self.set.max()
    }

    pub fn lowest_sequence_number(&self) -> u64 {
        self.set.min()
    }

    /// Flattened gap pairs fit for an acknack
    ///
    /// Ends are exclusive. Gaps reaching past the observed maximum, touching
    /// the top of the sequence space, or ending at or below the observed
    /// minimum are left out.
    pub fn reportable_gaps(&self) -> Vec<u64> {
        let (min, max, view) = self.set.gaps_view_with_bounds(false, true);
        Self::filter_reportable(min, max, view)
    }

    fn filter_reportable(min: u64, max: u64, view: Vec<(u64, u64)>) -> Vec<u64> {
        view.into_iter()
            .filter(|&(start, end)| {
                !(end > max
                    || end == EMPTY_MARKER
                    || end <= min
                    || (start == 0 && end == EMPTY_MARKER))
            })
            .flat_map(|(start, end)| [start, end])
            .collect()
    }

    /// Lowest, highest and reportable gaps taken from one consistent view
    pub fn report(&self) -> GapReport {
        let (min, max, view) = self.set.gaps_view_with_bounds(false, true);
        GapReport {
            lowest: min,
            highest: max,
            gaps: Self::filter_reportable(min, max, view),
        }
    }

    pub fn remove_expired_gaps(&self, max_age: Duration) -> usize {
        self.remove_expired_gaps_at(max_age, Utc::now())
    }

    /// Remove gaps last modified more than `max_age` before `now`
    pub fn remove_expired_gaps_at(&self, max_age: Duration, now: DateTime<Utc>) -> usize {
        let age = TimeDelta::from_std(max_age).unwrap_or(TimeDelta::MAX);
        let Some(cutoff) = now.checked_sub_signed(age) else {
            return 0;
        };

        let removed = self.set.remove_modified_before(cutoff);
        if removed > 0 {
            debug!(removed, cutoff = %cutoff, "Removed expired gaps");
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker_with(min: u64, max: u64, gaps: &[(u64, u64)]) -> GapTracker {
        let now = Utc::now();
        GapTracker::from_state(&GapTrackerState {
            min,
            max,
            gaps: gaps
                .iter()
                .map(|&(start, end)| SequenceGap {
                    start,
                    end,
                    last_modified: now,
                })
                .collect(),
        })
        .unwrap()
    }

    #[test]
    fn test_reset_when_range_rolls_below() {
        let tracker = tracker_with(100, 200, &[(150, 160)]);

        assert_eq!(tracker.check_for_reset(210, 250), ResetCheck::Unchanged);
        assert_eq!(tracker.lowest_sequence_number(), 100);
        assert_eq!(tracker.gap_set().gaps_view(false, false), vec![(150, 160)]);

        assert_eq!(tracker.check_for_reset(30, 50), ResetCheck::Reset);
        assert_eq!(tracker.lowest_sequence_number(), 0);
        assert_eq!(tracker.highest_sequence_number(), EMPTY_MARKER);
        assert_eq!(
            tracker.gap_set().gaps_view(false, false),
            vec![(0, EMPTY_MARKER)]
        );
        assert!(!tracker.gap_set().has_received_first_value());
    }

    #[test]
    fn test_inverted_range_rejected() {
        let tracker = tracker_with(100, 200, &[(150, 160)]);
        assert_eq!(tracker.check_for_reset(50, 30), ResetCheck::Rejected);
        assert_eq!(tracker.lowest_sequence_number(), 100);
        assert_eq!(tracker.gap_set().size(), 1);
    }

    #[test]
    fn test_reportable_gaps_filter_past_max() {
        let tracker = tracker_with(100, 195, &[(120, 130), (190, 205)]);
        assert_eq!(tracker.reportable_gaps(), vec![120, 131]);
    }

    #[test]
    fn test_reportable_gaps_filter_boundaries() {
        let tracker = tracker_with(100, 300, &[(0, 99), (150, 160), (301, EMPTY_MARKER)]);
        // [0,99] ends at min once exclusive, the tail reaches the top of the space
        assert_eq!(tracker.reportable_gaps(), vec![150, 161]);

        assert!(GapTracker::new().reportable_gaps().is_empty());
    }

    #[test]
    fn test_fresh_tracker_tracks_first_value() {
        let tracker = GapTracker::new();
        assert!(tracker.process_sequence_number(10));
        assert!(tracker.process_sequence_number(14));
        assert!(!tracker.process_sequence_number(14));

        let report = tracker.report();
        assert_eq!((report.lowest, report.highest), (10, 14));
        assert_eq!(report.gaps, vec![11, 14]);

        let acknack = report.to_acknack("ABC:0");
        assert_eq!(acknack.gap_count(), 1);
        assert_eq!(acknack.lowest_seq_num, 10);
        // 11..=13 missing, so the pair ends at the received 14
        assert_eq!(acknack.gap_ranges().collect::<Vec<_>>(), vec![(11, 14)]);
    }

    #[test]
    fn test_expiry_boundary() {
        let t = Utc::now() - TimeDelta::hours(2);
        let tracker = GapTracker::new();
        tracker.gap_set().add_value_at(50, t);
        tracker.gap_set().add_value_at(60, t);
        let count = tracker.gap_set().size();

        let d = Duration::from_secs(3600);
        let delta = TimeDelta::from_std(d).unwrap();

        let just_before = t + delta - TimeDelta::milliseconds(1);
        assert_eq!(tracker.remove_expired_gaps_at(d, just_before), 0);
        assert_eq!(tracker.gap_set().size(), count);

        let just_after = t + delta + TimeDelta::milliseconds(1);
        assert_eq!(tracker.remove_expired_gaps_at(d, just_after), count);
        assert_eq!(tracker.gap_set().size(), 0);
    }

    #[test]
    fn test_state_restores_equivalent_tracker() {
        let tracker = GapTracker::new();
        for value in [25, 30, 35, 50, 60, 70] {
            tracker.process_sequence_number(value);
        }

        let state = tracker.state();
        let json = serde_json::to_string(&state).unwrap();
        assert!(json.contains("lastModified"));

        let restored: GapTrackerState = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, state);
        let restored = GapTracker::from_state(&restored).unwrap();
        assert_eq!(restored.state(), state);
        assert_eq!(restored.reportable_gaps(), tracker.reportable_gaps());
        assert!(restored.gap_set().has_received_first_value());
    }
}
