//! # Sequence Gap Set
//!
//! Interval set over the full `u64` sequence space recording which sequence
//! numbers have not been received. Gaps are inclusive `[start, end]` ranges,
//! pairwise disjoint, keyed by `start` so the containing gap of any value is a
//! single ordered-map lookup.
//!
//! All operations take the one per-set lock: live frame traffic and periodic
//! expiry mutate the same set from different tasks.

use crate::error::GapError;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Upper bound of the sequence space, also the "nothing observed" maximum
pub const EMPTY_MARKER: u64 = u64::MAX;

/// One inclusive range of missing sequence numbers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SequenceGap {
    pub start: u64,
    pub end: u64,
    pub last_modified: DateTime<Utc>,
}

impl SequenceGap {
    pub fn contains(&self, value: u64) -> bool {
        self.start <= value && value <= self.end
    }
}

#[derive(Debug, Clone, Copy)]
struct GapEntry {
    end: u64,
    last_modified: DateTime<Utc>,
}

/// Where a gap sits relative to a filled range `[low, high]`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RangeOverlap {
    Before,
    After,
    Inside,
    Spans,
    LowerEdge,
    UpperEdge,
}

fn classify(start: u64, end: u64, low: u64, high: u64) -> RangeOverlap {
    if end < low {
        RangeOverlap::Before
    } else if start > high {
        RangeOverlap::After
    } else if start >= low && end <= high {
        RangeOverlap::Inside
    } else if start < low && end > high {
        RangeOverlap::Spans
    } else if start < low {
        RangeOverlap::LowerEdge
    } else {
        RangeOverlap::UpperEdge
    }
}

#[derive(Debug)]
struct Inner {
    min: u64,
    max: u64,
    gaps: BTreeMap<u64, GapEntry>,
    has_received_first_value: bool,
}

impl Inner {
    fn spanning(min: u64, max: u64, now: DateTime<Utc>) -> Self {
        let mut gaps = BTreeMap::new();
        gaps.insert(
            min,
            GapEntry {
                end: max,
                last_modified: now,
            },
        );
        Self {
            min,
            max,
            gaps,
            has_received_first_value: false,
        }
    }

    fn fill(&mut self, value: u64, now: DateTime<Utc>) -> bool {
        let Some((&start, &GapEntry { end, .. })) = self.gaps.range(..=value).next_back() else {
            return false;
        };
        if value > end {
            return false;
        }

        if start == value && end == value {
            self.gaps.remove(&start);
        } else if start == value {
            self.gaps.remove(&start);
            self.gaps.insert(
                start + 1,
                GapEntry {
                    end,
                    last_modified: now,
                },
            );
        } else if end == value {
            self.gaps.insert(
                start,
                GapEntry {
                    end: end - 1,
                    last_modified: now,
                },
            );
        } else {
            self.gaps.insert(
                start,
                GapEntry {
                    end: value - 1,
                    last_modified: now,
                },
            );
            self.gaps.insert(
                value + 1,
                GapEntry {
                    end,
                    last_modified: now,
                },
            );
        }
        true
    }

    fn view(&self, exclusive_start: bool, exclusive_end: bool) -> Vec<(u64, u64)> {
        self.gaps
            .iter()
            .map(|(&start, entry)| {
                let lower = if exclusive_start {
                    start.wrapping_sub(1)
                } else {
                    start
                };
                let upper = if exclusive_end && entry.end != EMPTY_MARKER {
                    entry.end + 1
                } else {
                    entry.end
                };
                (lower, upper)
            })
            .collect()
    }

    fn snapshot(&self) -> Vec<SequenceGap> {
        self.gaps
            .iter()
            .map(|(&start, entry)| SequenceGap {
                start,
                end: entry.end,
                last_modified: entry.last_modified,
            })
            .collect()
    }
}

/// Thread-safe set of missing sequence number ranges
#[derive(Debug)]
pub struct SequenceGapSet {
    inner: Mutex<Inner>,
}

impl SequenceGapSet {
    /// Create a set with one gap spanning `[min, max]`
    pub fn new(min: u64, max: u64) -> Result<Self, GapError> {
        Self::new_at(min, max, Utc::now())
    }

    pub fn new_at(min: u64, max: u64, now: DateTime<Utc>) -> Result<Self, GapError> {
        if min > max {
            return Err(GapError::InvalidRange { min, max });
        }
        Ok(Self {
            inner: Mutex::new(Inner::spanning(min, max, now)),
        })
    }

    /// The "nothing observed yet" set covering the whole sequence space
    pub fn bootstrap() -> Self {
        Self {
            inner: Mutex::new(Inner::spanning(0, EMPTY_MARKER, Utc::now())),
        }
    }

    /// Rebuild a set from persisted parts
    ///
    /// Gaps must be well-formed and strictly ascending without overlap. A
    /// range other than the bootstrap sentinel counts as already observed.
    pub fn from_parts(min: u64, max: u64, gaps: &[SequenceGap]) -> Result<Self, GapError> {
        if min > max {
            return Err(GapError::InvalidRange { min, max });
        }

        let mut map = BTreeMap::new();
        let mut previous_end: Option<u64> = None;
        for gap in gaps {
            if gap.start > gap.end {
                return Err(GapError::InvalidRange {
                    min: gap.start,
                    max: gap.end,
                });
            }
            if let Some(previous_end) = previous_end {
                if gap.start <= previous_end {
                    return Err(GapError::OverlappingGaps {
                        previous_end,
                        next_start: gap.start,
                    });
                }
            }
            previous_end = Some(gap.end);
            map.insert(
                gap.start,
                GapEntry {
                    end: gap.end,
                    last_modified: gap.last_modified,
                },
            );
        }

        Ok(Self {
            inner: Mutex::new(Inner {
                min,
                max,
                gaps: map,
                has_received_first_value: !(min == 0 && max == EMPTY_MARKER),
            }),
        })
    }

    /// Record a received sequence number; returns whether a gap was closed
    ///
    /// `min` and `max` move to include `value` even when no gap covers it,
    /// including when the gap list is already empty.
    pub fn add_value(&self, value: u64) -> bool {
        self.add_value_at(value, Utc::now())
    }

    pub fn add_value_at(&self, value: u64, now: DateTime<Utc>) -> bool {
        let mut inner = self.inner.lock();

        if inner.has_received_first_value {
            if value < inner.min {
                inner.min = value;
            }
            if value > inner.max {
                inner.max = value;
            }
        } else {
            inner.min = value;
            inner.max = value;
            inner.has_received_first_value = true;
        }

        inner.fill(value, now)
    }

    /// Record every sequence number in `[start_value, end_value]` as received
    ///
    /// Both bounds must lie within the current `[min, max]`.
    pub fn add_value_range(&self, start_value: u64, end_value: u64) -> Result<(), GapError> {
        self.add_value_range_at(start_value, end_value, Utc::now())
    }

    pub fn add_value_range_at(
        &self,
        start_value: u64,
        end_value: u64,
        now: DateTime<Utc>,
    ) -> Result<(), GapError> {
        if start_value > end_value {
            return Err(GapError::InvalidRange {
                min: start_value,
                max: end_value,
            });
        }

        let mut inner = self.inner.lock();
        for value in [start_value, end_value] {
            if value < inner.min || value > inner.max {
                return Err(GapError::ValueOutOfRange {
                    value,
                    min: inner.min,
                    max: inner.max,
                });
            }
        }

        let mut removed = Vec::new();
        let mut replacements = Vec::new();
        for (&start, entry) in &inner.gaps {
            let end = entry.end;
            match classify(start, end, start_value, end_value) {
                RangeOverlap::Before => continue,
                // Gaps are ascending by start, nothing further can overlap
                RangeOverlap::After => break,
                RangeOverlap::Inside => removed.push(start),
                RangeOverlap::Spans => {
                    removed.push(start);
                    replacements.push((start, start_value - 1));
                    replacements.push((end_value + 1, end));
                }
                RangeOverlap::LowerEdge => {
                    removed.push(start);
                    replacements.push((start, start_value - 1));
                }
                RangeOverlap::UpperEdge => {
                    removed.push(start);
                    replacements.push((end_value + 1, end));
                }
            }
        }

        for start in removed {
            inner.gaps.remove(&start);
        }
        for (start, end) in replacements {
            inner.gaps.insert(
                start,
                GapEntry {
                    end,
                    last_modified: now,
                },
            );
        }
        Ok(())
    }

    /// Gaps as `(start, end)` pairs, optionally shifted to exclusive bounds
    ///
    /// An end of [`EMPTY_MARKER`] is never shifted.
    pub fn gaps_view(&self, exclusive_start: bool, exclusive_end: bool) -> Vec<(u64, u64)> {
        self.inner.lock().view(exclusive_start, exclusive_end)
    }

    /// Same as [`gaps_view`](Self::gaps_view) with the `(min, max)` it was taken against
    pub fn gaps_view_with_bounds(
        &self,
        exclusive_start: bool,
        exclusive_end: bool,
    ) -> (u64, u64, Vec<(u64, u64)>) {
        let inner = self.inner.lock();
        (
            inner.min,
            inner.max,
            inner.view(exclusive_start, exclusive_end),
        )
    }

    /// Remove every gap last modified strictly before `cutoff`
    pub fn remove_modified_before(&self, cutoff: DateTime<Utc>) -> usize {
        let mut inner = self.inner.lock();
        let before = inner.gaps.len();
        inner.gaps.retain(|_, entry| entry.last_modified >= cutoff);
        before - inner.gaps.len()
    }

    /// Reinitialize to a single gap spanning `[min, max]` if `condition` holds
    /// for the current `(min, max)`
    pub(crate) fn reinitialize_if(
        &self,
        min: u64,
        max: u64,
        condition: impl FnOnce(u64, u64) -> bool,
    ) -> bool {
        let mut inner = self.inner.lock();
        if !condition(inner.min, inner.max) {
            return false;
        }
        *inner = Inner::spanning(min, max, Utc::now());
        true
    }

    pub fn min(&self) -> u64 {
        self.inner.lock().min
    }

    pub fn max(&self) -> u64 {
        self.inner.lock().max
    }

    /// Number of gaps
    pub fn size(&self) -> usize {
        self.inner.lock().gaps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().gaps.is_empty()
    }

    pub fn has_received_first_value(&self) -> bool {
        self.inner.lock().has_received_first_value
    }

    /// Ordered copy of the current gaps
    pub fn gaps(&self) -> Vec<SequenceGap> {
        self.inner.lock().snapshot()
    }

    /// `(min, max, gaps)` taken under one lock
    pub fn snapshot(&self) -> (u64, u64, Vec<SequenceGap>) {
        let inner = self.inner.lock();
        (inner.min, inner.max, inner.snapshot())
    }
}
