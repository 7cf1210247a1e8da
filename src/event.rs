//! Event records and the per-day aggregation they flow into.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use url::Url;

use crate::window::DateWindow;

/// One discovered event listing, immutable after construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventRecord {
    date: NaiveDate,
    name: String,
    link: Url,
}

impl EventRecord {
    /// Builds a record, rejecting blank names.
    pub fn new(date: NaiveDate, name: String, link: Url) -> Option<Self> {
        if name.trim().is_empty() {
            return None;
        }
        Some(Self { date, name, link })
    }

    /// Target date the event was listed under.
    pub fn date(&self) -> NaiveDate {
        self.date
    }

    /// Display name of the event.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Absolute detail-page link; deduplication key within a date.
    pub fn link(&self) -> &Url {
        &self.link
    }
}

/// Per-date buckets of extracted events, one bucket per window date.
///
/// Every date in the window owns a bucket from construction on, so a day with
/// zero events is represented explicitly rather than by an absent key.
#[derive(Debug, Clone, Default)]
pub struct DayBuckets {
    buckets: BTreeMap<NaiveDate, Vec<EventRecord>>,
}

impl DayBuckets {
    /// Pre-populates one empty bucket per window date.
    pub fn for_window(window: &DateWindow) -> Self {
        let buckets = window.iter().map(|date| (date, Vec::new())).collect();
        Self { buckets }
    }

    /// Replaces the bucket for `date`; dates outside the window are ignored.
    pub fn fill(&mut self, date: NaiveDate, events: Vec<EventRecord>) {
        if let Some(slot) = self.buckets.get_mut(&date) {
            *slot = events;
        }
    }

    /// Iterates buckets in ascending date order.
    pub fn iter(&self) -> impl Iterator<Item = (NaiveDate, &[EventRecord])> {
        self.buckets
            .iter()
            .map(|(date, events)| (*date, events.as_slice()))
    }

    /// Number of buckets (equals the window length).
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    /// True when no dates are tracked at all.
    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Total number of events across all buckets.
    pub fn total_events(&self) -> usize {
        self.buckets.values().map(Vec::len).sum()
    }
}
