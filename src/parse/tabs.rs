//! Calendar tab discovery from the tournament's "tabs" page.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use reqwest::Url;
use scraper::{Html, Selector};

use crate::dates::parse_tab_range;
use crate::parse::calendar::is_tab_label;
use crate::text::get_text;
use crate::types::CalendarTab;

static ANCHOR: Lazy<Selector> = Lazy::new(|| Selector::parse("a").expect("valid anchor selector"));

/// One tab per distinct anchor label that reads like a day range, in document
/// order. `first_day`/`last_day` come from the anchor's href query when it
/// carries them, otherwise from the label itself.
pub fn extract_calendar_tabs(doc: &Html, season_label: Option<&str>) -> Vec<CalendarTab> {
    let mut seen = HashSet::new();
    let mut tabs = Vec::new();

    for anchor in doc.select(&ANCHOR) {
        let label = get_text(Some(anchor));
        if !is_tab_label(&label) || !seen.insert(label.clone()) {
            continue;
        }

        let (href_first, href_last) = anchor
            .value()
            .attr("href")
            .map(day_params)
            .unwrap_or_default();
        let (label_first, label_last) = parse_tab_range(&label, season_label);

        let (first_day, last_day) = match href_first {
            Some(first) => (Some(first), href_last.or(label_last)),
            None => (label_first, label_last),
        };
        tabs.push(CalendarTab { label, first_day, last_day });
    }
    tabs
}

/// `first_day`/`last_day` query values of a possibly relative href.
fn day_params(href: &str) -> (Option<String>, Option<String>) {
    let Ok(url) = Url::parse("http://tabs.invalid/").and_then(|base| base.join(href)) else {
        return (None, None);
    };
    let mut first = None;
    let mut last = None;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "first_day" if !value.is_empty() => first = Some(value.into_owned()),
            "last_day" if !value.is_empty() => last = Some(value.into_owned()),
            _ => {}
        }
    }
    (first, last)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tabs(html: &str) -> Vec<CalendarTab> {
        extract_calendar_tabs(&Html::parse_document(html), Some("2025/26"))
    }

    #[test]
    fn labels_resolve_to_day_ranges() {
        let out = tabs(
            r##"<nav><a href="#">Новини</a><a href="#">1-7 вересня</a>
               <a href="#">29 вересня - 5 жовтня</a><a href="#">12 січ</a><a href="#">1-7 вересня</a></nav>"##,
        );
        assert_eq!(out.len(), 3);
        assert_eq!(out[0].first_day.as_deref(), Some("2025-09-01"));
        assert_eq!(out[0].last_day.as_deref(), Some("2025-09-07"));
        assert_eq!(out[1].first_day.as_deref(), Some("2025-09-29"));
        assert_eq!(out[1].last_day.as_deref(), Some("2025-10-05"));
        assert_eq!(out[2].first_day.as_deref(), Some("2026-01-12"));
        assert_eq!(out[2].last_day.as_deref(), Some("0"));
    }

    #[test]
    fn href_params_take_precedence() {
        let out = tabs(r#"<a href="/calendar?first_day=2025-09-02&last_day=2025-09-08">1-7 вересня</a>"#);
        assert_eq!(out[0].first_day.as_deref(), Some("2025-09-02"));
        assert_eq!(out[0].last_day.as_deref(), Some("2025-09-08"));
    }

    #[test]
    fn unparseable_range_keeps_tab_without_first_day() {
        let out = tabs(r##"<a href="#">31 лютого</a>"##);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].label, "31 лютого");
        assert!(out[0].first_day.is_none());
    }
}
