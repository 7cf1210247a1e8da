//! Spreadsheet assembly: one sheet per target date, collision-safe naming.

use std::collections::HashSet;
use std::error::Error;
use std::ffi::OsStr;
use std::fmt;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use chrono::{Local, NaiveDate};
use rust_xlsxwriter::{Format, Workbook, XlsxError};
use tracing::warn;

use crate::event::{DayBuckets, EventRecord};

/// Hard cap the workbook format places on sheet names.
const MAX_SHEET_NAME_LEN: usize = 31;

/// Column headers, in output order.
const COLUMNS: &[&str] = &["S.no", "Date", "Event name", "Event link"];

const PLACEHOLDER_ROW: &str = "No events found for this date";

/// Errors surfaced while assembling the workbook.
#[derive(Debug)]
pub enum ArtifactError {
    /// The workbook could not be built or saved.
    Workbook(XlsxError),
}

impl fmt::Display for ArtifactError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Workbook(err) => write!(f, "workbook error: {err}"),
        }
    }
}

impl Error for ArtifactError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Workbook(err) => Some(err),
        }
    }
}

impl From<XlsxError> for ArtifactError {
    fn from(err: XlsxError) -> Self {
        Self::Workbook(err)
    }
}

/// Serializes day buckets into a multi-sheet workbook.
#[derive(Debug, Default)]
pub struct ArtifactWriter;

impl ArtifactWriter {
    /// Creates a writer.
    pub fn new() -> Self {
        Self
    }

    /// Writes the workbook, returning the path actually written.
    ///
    /// A destination locked by another process is never fatal: the workbook
    /// moves to a sibling path suffixed with the current time of day.
    pub fn write(&self, buckets: &DayBuckets, dest: &Path) -> Result<PathBuf, ArtifactError> {
        let target = resolve_destination(dest);
        let mut workbook = Workbook::new();
        let header_format = Format::new().set_bold();

        if buckets.is_empty() {
            let sheet = workbook.add_worksheet();
            sheet.set_name("Summary")?;
            sheet.write_string(0, 0, "No target dates were processed")?;
        } else {
            for (date, events) in buckets.iter() {
                let sheet = workbook.add_worksheet();
                sheet.set_name(sheet_name(date))?;

                if events.is_empty() {
                    sheet.write_string(0, 0, PLACEHOLDER_ROW)?;
                    continue;
                }

                for (col, header) in COLUMNS.iter().enumerate() {
                    sheet.write_string_with_format(0, col as u16, *header, &header_format)?;
                }

                for (index, event) in ordered_rows(events).iter().enumerate() {
                    let row = index as u32 + 1;
                    sheet.write_number(row, 0, (index + 1) as f64)?;
                    sheet.write_string(row, 1, date.to_string())?;
                    sheet.write_string(row, 2, event.name())?;
                    sheet.write_string(row, 3, event.link().as_str())?;
                }
            }
        }

        workbook.save(&target)?;
        Ok(target)
    }
}

/// Rows for one sheet: deduplicated by link once more, sorted by name.
fn ordered_rows(events: &[EventRecord]) -> Vec<&EventRecord> {
    let mut seen = HashSet::new();
    let mut rows: Vec<&EventRecord> = events
        .iter()
        .filter(|event| seen.insert(event.link().as_str()))
        .collect();
    rows.sort_by(|a, b| a.name().cmp(b.name()));
    rows
}

/// ISO date, truncated to the workbook's sheet-name limit.
fn sheet_name(date: NaiveDate) -> String {
    let mut name = date.to_string();
    name.truncate(MAX_SHEET_NAME_LEN);
    name
}

/// Picks the writable destination: the requested path, or a time-suffixed
/// sibling when the requested path exists but cannot be opened read/write.
fn resolve_destination(dest: &Path) -> PathBuf {
    if !dest.exists() {
        return dest.to_path_buf();
    }
    match OpenOptions::new().read(true).write(true).open(dest) {
        Ok(_) => dest.to_path_buf(),
        Err(err) => {
            let fallback = alternate_path(dest, &Local::now().format("%H%M%S").to_string());
            warn!(
                requested = %dest.display(),
                fallback = %fallback.display(),
                error = %err,
                "destination locked, writing to fallback path"
            );
            fallback
        }
    }
}

fn alternate_path(dest: &Path, suffix: &str) -> PathBuf {
    let stem = dest
        .file_stem()
        .and_then(OsStr::to_str)
        .unwrap_or("events");
    let name = match dest.extension().and_then(OsStr::to_str) {
        Some(ext) => format!("{stem}_{suffix}.{ext}"),
        None => format!("{stem}_{suffix}"),
    };
    dest.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use url::Url;

    fn record(name: &str, link: &str) -> EventRecord {
        EventRecord::new(
            NaiveDate::from_ymd_opt(2024, 6, 1).expect("valid date"),
            name.to_string(),
            Url::parse(link).expect("valid url"),
        )
        .expect("record accepted")
    }

    #[test]
    fn sheet_names_fit_the_workbook_limit() {
        let date = NaiveDate::from_ymd_opt(2024, 6, 1).expect("valid date");
        let name = sheet_name(date);
        assert_eq!(name, "2024-06-01");
        assert!(name.len() <= MAX_SHEET_NAME_LEN);
    }

    #[test]
    fn rows_are_deduplicated_and_name_sorted() {
        let events = vec![
            record("Zulu Night", "https://x.test/events/z"),
            record("Acid Set", "https://x.test/events/a"),
            record("Duplicate", "https://x.test/events/z"),
        ];
        let rows = ordered_rows(&events);
        let names: Vec<_> = rows.iter().map(|r| r.name()).collect();
        assert_eq!(names, ["Acid Set", "Zulu Night"]);
    }

    #[test]
    fn alternate_path_keeps_stem_and_extension() {
        let alt = alternate_path(Path::new("out/paris_events_2024-06-01.xlsx"), "101500");
        assert_eq!(
            alt,
            Path::new("out/paris_events_2024-06-01_101500.xlsx")
        );
    }

    #[test]
    fn alternate_path_without_extension_still_suffixes() {
        let alt = alternate_path(Path::new("out/events"), "090000");
        assert_eq!(alt, Path::new("out/events_090000"));
    }
}
