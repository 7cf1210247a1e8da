//! Multi-strategy event extraction from listings markup.

use std::collections::HashSet;

use chrono::NaiveDate;
use scraper::{ElementRef, Html, Selector};
use url::Url;

use crate::event::EventRecord;

/// Path fragment identifying an event detail link.
pub const EVENT_PATH_PATTERN: &str = "/events/";

/// Shortest name accepted for an event record.
const MIN_NAME_CHARS: usize = 3;

/// Navigational labels that masquerade as event names.
const NAV_PHRASES: &[&str] = &["view more", "see all", "more events", "load more"];

/// A name is truncated at the first of these; everything after is a price tail.
const CURRENCY_SYMBOLS: &[char] = &['€', '$', '£'];

/// Class fragments that mark an element as an event card or list entry.
const CARD_SELECTORS: &[&str] = &[
    "[class*='event-card']",
    "[class*='eventCard']",
    "[class*='event-item']",
    "li[class*='event']",
    "article[class*='event']",
    "div[class*='card']",
];

/// Parses listings markup into deduplicated event records.
pub struct EventExtractor {
    base: Url,
    anchors: Selector,
    cards: Vec<Selector>,
}

impl EventExtractor {
    /// Compiles the selector set against the given base URL.
    pub fn new(base: Url) -> Self {
        Self {
            base,
            anchors: Selector::parse("a[href]").expect("anchor selector"),
            cards: CARD_SELECTORS
                .iter()
                .map(|css| Selector::parse(css).expect("card selector"))
                .collect(),
        }
    }

    /// Extracts every event for `date`, deduplicated by absolute link.
    ///
    /// Records keep encounter order; the link-first pass runs before the
    /// container-first pass, and a link claimed by either pass is never
    /// emitted twice.
    pub fn extract(&self, html: &str, date: NaiveDate) -> Vec<EventRecord> {
        let document = Html::parse_document(html);
        let mut seen = HashSet::new();
        let mut records = Vec::new();

        self.collect_link_first(&document, date, &mut seen, &mut records);
        self.collect_container_first(&document, date, &mut seen, &mut records);

        records
    }

    /// Strategy A: scan every anchor whose path looks like an event detail page.
    fn collect_link_first(
        &self,
        document: &Html,
        date: NaiveDate,
        seen: &mut HashSet<String>,
        records: &mut Vec<EventRecord>,
    ) {
        for anchor in document.select(&self.anchors) {
            let Some(link) = self.event_link(&anchor) else {
                continue;
            };
            if seen.contains(link.as_str()) {
                continue;
            }

            let own_text = element_text(&anchor);
            let raw = if own_text.chars().count() >= MIN_NAME_CHARS {
                own_text
            } else {
                parent_text(&anchor).unwrap_or(own_text)
            };

            let Some(name) = clean_name(&raw) else {
                continue;
            };
            if let Some(record) = EventRecord::new(date, name, link) {
                seen.insert(record.link().to_string());
                records.push(record);
            }
        }
    }

    /// Strategy B: scan card-shaped containers and pull the embedded event link.
    fn collect_container_first(
        &self,
        document: &Html,
        date: NaiveDate,
        seen: &mut HashSet<String>,
        records: &mut Vec<EventRecord>,
    ) {
        for selector in &self.cards {
            for card in document.select(selector) {
                let Some(anchor) = card
                    .select(&self.anchors)
                    .find(|a| self.event_link(a).is_some())
                else {
                    continue;
                };
                let Some(link) = self.event_link(&anchor) else {
                    continue;
                };
                if seen.contains(link.as_str()) {
                    continue;
                }

                let candidates = [
                    element_text(&anchor),
                    anchor
                        .value()
                        .attr("title")
                        .map(collapse_whitespace)
                        .unwrap_or_default(),
                    element_text(&card),
                ];
                let Some(raw) = candidates
                    .into_iter()
                    .find(|candidate| candidate.chars().count() >= MIN_NAME_CHARS)
                else {
                    continue;
                };

                let Some(name) = clean_name(&raw) else {
                    continue;
                };
                if let Some(record) = EventRecord::new(date, name, link) {
                    seen.insert(record.link().to_string());
                    records.push(record);
                }
            }
        }
    }

    /// Absolute event-detail link for an anchor, when its href matches the pattern.
    fn event_link(&self, anchor: &ElementRef<'_>) -> Option<Url> {
        let href = anchor.value().attr("href")?;
        if !href.contains(EVENT_PATH_PATTERN) {
            return None;
        }
        self.base.join(href).ok()
    }
}

/// Cleans a raw name candidate: collapse whitespace, strip the price tail,
/// reject navigational labels and too-short remainders.
pub fn clean_name(raw: &str) -> Option<String> {
    let collapsed = collapse_whitespace(raw);
    let name = collapsed
        .split(CURRENCY_SYMBOLS)
        .next()
        .unwrap_or_default()
        .trim();

    if name.chars().count() < MIN_NAME_CHARS {
        return None;
    }
    if NAV_PHRASES
        .iter()
        .any(|phrase| name.eq_ignore_ascii_case(phrase))
    {
        return None;
    }
    Some(name.to_string())
}

fn collapse_whitespace(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn element_text(element: &ElementRef<'_>) -> String {
    collapse_whitespace(&element.text().collect::<Vec<_>>().join(" "))
}

fn parent_text(element: &ElementRef<'_>) -> Option<String> {
    element
        .parent()
        .and_then(ElementRef::wrap)
        .map(|parent| element_text(&parent))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn price_tails_are_stripped() {
        assert_eq!(clean_name("Techno Night €25").as_deref(), Some("Techno Night"));
        assert_eq!(clean_name("Warehouse Rave $30+").as_deref(), Some("Warehouse Rave"));
        assert_eq!(clean_name("  Open  Air\nFestival  ").as_deref(), Some("Open Air Festival"));
    }

    #[test]
    fn navigational_labels_are_rejected() {
        for phrase in ["view more", "View More", "SEE ALL", "More events", "load more"] {
            assert_eq!(clean_name(phrase), None, "{phrase:?} should be rejected");
        }
    }

    #[test]
    fn short_or_price_only_names_are_rejected() {
        assert_eq!(clean_name("ab"), None);
        assert_eq!(clean_name("€25"), None);
        assert_eq!(clean_name("   "), None);
    }
}
