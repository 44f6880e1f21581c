//! Time regions flagged for tone replacement.

use serde::{Deserialize, Serialize};

/// A `[start, end)` interval, in seconds, within a segment's audio.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AdRegion {
    pub start: f64,
    pub end: f64,
}

impl AdRegion {
    /// Create a region, swapping the bounds if given in reverse.
    pub fn new(start: f64, end: f64) -> Self {
        if start <= end {
            Self { start, end }
        } else {
            Self {
                start: end,
                end: start,
            }
        }
    }

    /// Duration in seconds.
    pub fn duration(&self) -> f64 {
        self.end - self.start
    }

    /// Clamp the region into `[0, limit]`.
    ///
    /// Returns `None` when nothing of the region is left inside the range.
    pub fn clamp_to(&self, limit: f64) -> Option<Self> {
        let start = self.start.max(0.0);
        let end = self.end.min(limit);
        if end > start {
            Some(Self { start, end })
        } else {
            None
        }
    }

    /// Shift the region by `offset` seconds.
    pub fn shifted(&self, offset: f64) -> Self {
        Self {
            start: self.start + offset,
            end: self.end + offset,
        }
    }
}

/// Merge overlapping or near-adjacent regions.
///
/// Regions are sorted by start time; a region whose start lies at or before
/// `previous.end + gap` is folded into the previous one. The output is
/// start-ordered and non-overlapping, and merging it again is a no-op.
pub fn merge_regions(regions: &[AdRegion], gap: f64) -> Vec<AdRegion> {
    let mut sorted: Vec<AdRegion> = regions.to_vec();
    sorted.sort_by(|a, b| a.start.total_cmp(&b.start));

    let mut merged: Vec<AdRegion> = Vec::with_capacity(sorted.len());
    for region in sorted {
        match merged.last_mut() {
            Some(last) if region.start <= last.end + gap => {
                last.end = last.end.max(region.end);
            }
            _ => merged.push(region),
        }
    }
    merged
}
