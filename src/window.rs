//! Rolling window of target calendar dates and their listings URLs.

use chrono::{Days, NaiveDate};
use url::Url;

/// Number of consecutive days covered by one run.
pub const WINDOW_DAYS: u64 = 7;

/// Ordered sequence of target dates, first date inclusive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DateWindow {
    dates: Vec<NaiveDate>,
}

impl DateWindow {
    /// Builds the window `[first, first + WINDOW_DAYS)`.
    pub fn starting(first: NaiveDate) -> Self {
        let dates = (0..WINDOW_DAYS)
            .filter_map(|offset| first.checked_add_days(Days::new(offset)))
            .collect();
        Self { dates }
    }

    /// All target dates in ascending order.
    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    /// First date of the window (the run date).
    pub fn first(&self) -> NaiveDate {
        self.dates[0]
    }

    /// Number of dates in the window.
    pub fn len(&self) -> usize {
        self.dates.len()
    }

    /// True when the window holds no dates.
    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }

    /// Iterates the target dates in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        self.dates.iter().copied()
    }
}

/// Listings URL for one target date: the base city URL with an ISO date segment appended.
pub fn listings_url(base: &str, date: NaiveDate) -> Result<Url, url::ParseError> {
    let trimmed = base.trim_end_matches('/');
    Url::parse(&format!("{trimmed}/{date}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    #[test]
    fn window_spans_seven_consecutive_days() {
        let window = DateWindow::starting(day(2024, 6, 1));
        assert_eq!(window.len(), 7);
        assert_eq!(window.first(), day(2024, 6, 1));
        assert_eq!(window.dates().last().copied(), Some(day(2024, 6, 7)));
        for pair in window.dates().windows(2) {
            assert_eq!(pair[1], pair[0].succ_opt().expect("successor"));
        }
    }

    #[test]
    fn window_crosses_month_boundaries() {
        let window = DateWindow::starting(day(2024, 12, 29));
        assert_eq!(window.dates().last().copied(), Some(day(2025, 1, 4)));
    }

    #[test]
    fn listings_url_appends_iso_date_segment() {
        let url = listings_url("https://shotgun.live/en/cities/paris", day(2024, 6, 1))
            .expect("valid url");
        assert_eq!(
            url.as_str(),
            "https://shotgun.live/en/cities/paris/2024-06-01"
        );
    }

    #[test]
    fn listings_url_tolerates_trailing_slash() {
        let url = listings_url("https://shotgun.live/en/cities/paris/", day(2024, 6, 1))
            .expect("valid url");
        assert_eq!(
            url.as_str(),
            "https://shotgun.live/en/cities/paris/2024-06-01"
        );
    }
}
