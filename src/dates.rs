//! Season / month / date inference for Ukrainian tournament pages.
//!
//! Dates on the scraped pages are partial ("3 жовт", "1-7 вересня"): a day number
//! and a month word, no year. The year comes from the season label ("2025/26").
//! Anything that cannot be resolved becomes `None` and the caller skips the item.

use chrono::{Datelike, FixedOffset, NaiveDate, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::Html;

use crate::text::normalize_space;

/// Offset every resolved kickoff is emitted in.
const KICKOFF_UTC_OFFSET_SECS: i32 = 2 * 3600;

/// Month stems in calendar order with their three-letter abbreviation. A word
/// names the month when it starts with the stem ("жовтня", "жовт.") or is
/// exactly the abbreviation ("вер"). Stems are long enough that weekday and
/// other words ("середа", "група", "трансляція") never match.
const MONTH_STEMS: [(&str, &str, u32); 12] = [
    ("січ", "січ", 1),
    ("лют", "лют", 2),
    ("берез", "бер", 3),
    ("квіт", "кві", 4),
    ("трав", "тра", 5),
    ("черв", "чер", 6),
    ("лип", "лип", 7),
    ("серп", "сер", 8),
    ("верес", "вер", 9),
    ("жовт", "жов", 10),
    ("лист", "лис", 11),
    ("груд", "гру", 12),
];

static URL_SEASON_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:^|[/_=])(20\d{2})-(\d{2})(?:[^\d]|$)").expect("valid url season regex")
});
static TEXT_SEASON_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(20\d{2})\s*/\s*(\d{2})(\d{2})?(?:[^\d]|$)").expect("valid text season regex")
});
static SEASON_YEARS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d{4})(?:\s*[/-]\s*(\d{2,4}))?").expect("valid season years regex"));
static DAY_MONTH_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:^|[^\d])(\d{1,2})\.?\s*(\p{L}+)").expect("valid day month regex")
});
static TIME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d{1,2}):(\d{2})").expect("valid time regex"));
static RANGE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\d{1,2})\s*(\p{L}+)?\.?\s*[-–—]\s*(\d{1,2})\s+(\p{L}+)")
        .expect("valid tab range regex")
});
static SINGLE_DAY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{1,2})\s+(\p{L}+)").expect("valid single day regex"));

/// Season label for a tournament page: a `2025-26` segment in the URL wins,
/// else the first `YYYY/YY` token of the document text. Normalized to `YYYY/YY`.
pub fn infer_season_label_from_doc(url: Option<&str>, doc: &Html) -> Option<String> {
    if let Some(url) = url {
        let found = URL_SEASON_RE
            .captures_iter(url)
            .find_map(|caps| season_label(&caps[1], &caps[2]));
        if found.is_some() {
            return found;
        }
    }
    let text = normalize_space(&doc.root_element().text().collect::<String>());
    infer_season_label_from_text(&text)
}

pub fn infer_season_label_from_text(text: &str) -> Option<String> {
    TEXT_SEASON_RE.captures_iter(text).find_map(|caps| {
        // "2025/2026" captures "20" + "26"; the last two digits are the end year.
        let end = caps.get(3).map_or(&caps[2], |m| m.as_str());
        season_label(&caps[1], end)
    })
}

/// `YYYY/YY` when the two-digit end year directly follows the start year.
fn season_label(start: &str, end: &str) -> Option<String> {
    let start_year: u32 = start.parse().ok()?;
    let end_year: u32 = end.parse().ok()?;
    if (start_year + 1) % 100 != end_year {
        return None;
    }
    Some(format!("{start}/{end}"))
}

/// Month number for the first word of `text` that starts with a Ukrainian month
/// stem. Never guesses: unknown text is `None`.
pub fn month_ukr_to_number(text: &str) -> Option<u32> {
    let lower = text.to_lowercase();
    lower
        .split(|c: char| !c.is_alphabetic())
        .filter(|w| !w.is_empty())
        .find_map(|word| {
            MONTH_STEMS
                .iter()
                .find(|(stem, abbr, _)| word.starts_with(stem) || word == *abbr)
                .map(|&(_, _, n)| n)
        })
}

/// Calendar year of `month` within a season spanning two years: July..December
/// belong to the start year, January..June to the end year. Without a usable
/// season label `fallback_year` is used; the public date parsers pass the
/// current year.
pub fn resolve_year_for_month(season_label: Option<&str>, month: u32, fallback_year: i32) -> i32 {
    let Some(caps) = season_label.and_then(|s| SEASON_YEARS_RE.captures(s)) else {
        return fallback_year;
    };
    let Ok(start) = caps[1].parse::<i32>() else {
        return fallback_year;
    };
    // Single-year season: everything happens in that year.
    if caps.get(2).is_none() {
        return start;
    }
    if month >= 7 {
        start
    } else {
        start + 1
    }
}

/// `"3 жовт"` + `"18:30"` + `"2025/26"` → `"2025-10-03T18:30:00+02:00"`.
/// Returns `None` when the day, month, hour or minute cannot be resolved.
pub fn parse_date_text_to_iso(date_text: &str, time: &str, season_label: Option<&str>) -> Option<String> {
    parse_date_text_to_iso_in(date_text, time, season_label, Utc::now().year())
}

pub fn parse_date_text_to_iso_in(
    date_text: &str,
    time: &str,
    season_label: Option<&str>,
    fallback_year: i32,
) -> Option<String> {
    let text = normalize_space(date_text);
    // The month is the word right after the day, so a weekday prefix never wins.
    let (day, month) = DAY_MONTH_RE.captures_iter(&text).find_map(|caps| {
        let month = month_ukr_to_number(&caps[2])?;
        Some((caps[1].parse::<u32>().ok()?, month))
    })?;
    let caps = TIME_RE.captures(time)?;
    let hour: u32 = caps[1].parse().ok()?;
    let minute: u32 = caps[2].parse().ok()?;

    let year = resolve_year_for_month(season_label, month, fallback_year);
    let naive = NaiveDate::from_ymd_opt(year, month, day)?.and_hms_opt(hour, minute, 0)?;
    let offset = FixedOffset::east_opt(KICKOFF_UTC_OFFSET_SECS)?;
    let local = naive.and_local_timezone(offset).single()?;
    Some(local.format("%Y-%m-%dT%H:%M:%S%:z").to_string())
}

/// Date range of a calendar tab label as ISO dates. A single day yields
/// `last_day = "0"`. Unparseable labels yield `(None, None)`.
pub fn parse_tab_range(label: &str, season_label: Option<&str>) -> (Option<String>, Option<String>) {
    parse_tab_range_in(label, season_label, Utc::now().year())
}

pub fn parse_tab_range_in(
    label: &str,
    season_label: Option<&str>,
    fallback_year: i32,
) -> (Option<String>, Option<String>) {
    let text = normalize_space(label).to_lowercase();

    if let Some(caps) = RANGE_RE.captures(&text) {
        let last_month = month_ukr_to_number(&caps[4]);
        let first_month = match caps.get(2) {
            Some(m) => month_ukr_to_number(m.as_str()),
            None => last_month,
        };
        let first = iso_day(&caps[1], first_month, season_label, fallback_year);
        let last = iso_day(&caps[3], last_month, season_label, fallback_year);
        return match (first, last) {
            (Some(f), Some(l)) => (Some(f), Some(l)),
            _ => (None, None),
        };
    }

    if let Some(caps) = SINGLE_DAY_RE.captures(&text) {
        let month = month_ukr_to_number(&caps[2]);
        if let Some(day) = iso_day(&caps[1], month, season_label, fallback_year) {
            return (Some(day), Some("0".to_string()));
        }
    }
    (None, None)
}

fn iso_day(day: &str, month: Option<u32>, season_label: Option<&str>, fallback_year: i32) -> Option<String> {
    let month = month?;
    let day: u32 = day.parse().ok()?;
    let year = resolve_year_for_month(season_label, month, fallback_year);
    NaiveDate::from_ymd_opt(year, month, day).map(|d| d.format("%Y-%m-%d").to_string())
}
