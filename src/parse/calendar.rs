//! Calendar / match list extraction.
//!
//! Three attempts run in a fixed order (explicit match cards, generic blocks
//! holding a kickoff time, regex over the flattened text). The first attempt that
//! yields at least one deduplicated match wins.

use std::collections::{HashMap, HashSet};

use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde::Serialize;
use tracing::debug;

use crate::config::calendar::{MAX_ROOT_DEPTH, MAX_TAB_LABEL_CHARS};
use crate::dates::month_ukr_to_number;
use crate::text::{get_text, has_letter, normalize_space, own_text, parse_html_to_document};
use crate::types::MatchItem;

const CALENDAR_HEADING: &str = "Календар матчів";

/// League phrase the flattened-text layout is anchored on.
pub const TEXT_FALLBACK_LEAGUE: &str = "V9KY";

static BODY: Lazy<Selector> = Lazy::new(|| Selector::parse("body").expect("valid body selector"));
static CARD: Lazy<Selector> = Lazy::new(|| {
    Selector::parse(".match-card, .calendar-match, .game-card").expect("valid card selector")
});
static CARD_HOME: Lazy<Selector> = Lazy::new(|| {
    Selector::parse(".match-card__team--left, .team-left, .home-team").expect("valid home selector")
});
static CARD_AWAY: Lazy<Selector> = Lazy::new(|| {
    Selector::parse(".match-card__team--right, .team-right, .away-team").expect("valid away selector")
});
static CARD_DATE: Lazy<Selector> = Lazy::new(|| {
    Selector::parse(".match-card__date, .match-date, .date").expect("valid date selector")
});
static CARD_TIME: Lazy<Selector> = Lazy::new(|| {
    Selector::parse(".match-card__time, .match-time, .time").expect("valid time selector")
});
static CARD_STATUS: Lazy<Selector> = Lazy::new(|| {
    Selector::parse(".match-card__status, .match-status, .status").expect("valid status selector")
});
static CARD_MARK: Lazy<Selector> = Lazy::new(|| {
    Selector::parse(".match-card__mark, .match-mark, .mark").expect("valid mark selector")
});
static CONTAINER: Lazy<Selector> = Lazy::new(|| {
    Selector::parse("div, li, tr, article, section, p").expect("valid container selector")
});
static TAB_CANDIDATE: Lazy<Selector> =
    Lazy::new(|| Selector::parse("a, button, li, [role=tab]").expect("valid tab selector"));

static TIME_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b(\d{1,2}):(\d{2})\b").expect("valid time regex"));
static DAY_MONTH_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b\d{1,2}\s+(?:січ|лют|бер|кві|тра|чер|лип|сер|вер|жов|лис|гру)\p{L}*\.?")
        .expect("valid day-month regex")
});
static TAB_LABEL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\d{1,2}(?:\s+\p{L}+\.?)?(?:\s*[-–—]\s*\d{1,2})?\s+\p{L}+\.?$").expect("valid tab label regex")
});
static LRV_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:\bтур\b|\d+\s*тур|тур\s*\d+|ліга|league|поле|стадіон|арена|майданчик)")
        .expect("valid descriptor regex")
});
static STATUS_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(?:завершено|перенесено|скасовано|наживо|live|ft)$").expect("valid status regex")
});
static NON_TEAM_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:календар|матч|рахунок|^vs$|^[-–—:]$)").expect("valid non-team regex")
});
static TEXT_DATE_TIME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\d{1,2}\s+(?:січ|лют|бер|кві|тра|чер|лип|сер|вер|жов|лис|гру)\p{L}*\.?\s+\d{1,2}:\d{2}")
        .expect("valid text date-time regex")
});
static TEXT_MATCH_RE: Lazy<Regex> = Lazy::new(|| {
    let pattern = format!(
        r"^(?P<date>\d{{1,2}}\s+\p{{L}}+\.?)\s+(?P<time>\d{{1,2}}:\d{{2}})\s+(?P<home>.+?)\s+[-–—]\s+(?P<away>.+?)\s+(?P<lrv>{}\b.*?)\s*$",
        regex::escape(TEXT_FALLBACK_LEAGUE)
    );
    Regex::new(&pattern).expect("valid text match regex")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CalendarStrategy {
    Cards,
    Containers,
    Text,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CalendarParse {
    pub tab_labels: Vec<String>,
    pub matches: Vec<MatchItem>,
    /// Output of the winning attempt before deduplication.
    pub raw_matches: Vec<MatchItem>,
    pub strategy: Option<CalendarStrategy>,
}

/// A parsed match plus the element it came from, for tab tagging.
type Found<'a> = (MatchItem, Option<ElementRef<'a>>);
type Attempt = for<'a> fn(ElementRef<'a>) -> Vec<Found<'a>>;

/// Fallback order. The first attempt with a non-empty deduplicated result wins.
const ATTEMPTS: [(CalendarStrategy, Attempt); 3] = [
    (CalendarStrategy::Cards, match_cards),
    (CalendarStrategy::Containers, match_containers),
    (CalendarStrategy::Text, match_text),
];

pub fn parse_calendar_matches_from_html(html: &str) -> CalendarParse {
    parse_calendar_matches_from_dom(&parse_html_to_document(html))
}

pub fn parse_calendar_matches_from_dom(doc: &Html) -> CalendarParse {
    let root = find_calendar_root(doc);
    let order: HashMap<_, usize> = root
        .descendants()
        .enumerate()
        .map(|(idx, node)| (node.id(), idx))
        .collect();

    let labels = collect_tab_labels(root);
    let label_positions: Vec<(usize, &str)> = labels
        .iter()
        .filter_map(|(label, el)| order.get(&el.id()).map(|&idx| (idx, label.as_str())))
        .collect();

    let mut result = CalendarParse {
        tab_labels: labels.iter().map(|(l, _)| l.clone()).collect(),
        ..CalendarParse::default()
    };

    for (strategy, attempt) in ATTEMPTS {
        let found = attempt(root);
        let tagged: Vec<MatchItem> = found
            .into_iter()
            .map(|(mut item, source)| {
                if let Some(idx) = source.and_then(|el| order.get(&el.id()).copied()) {
                    item.tab_label = label_positions
                        .iter()
                        .take_while(|(label_idx, _)| *label_idx < idx)
                        .last()
                        .map(|(_, label)| label.to_string());
                }
                item
            })
            .collect();
        let deduped = dedupe_matches(&tagged);
        debug!(?strategy, raw = tagged.len(), unique = deduped.len(), "calendar attempt");
        if !deduped.is_empty() {
            result.matches = deduped;
            result.raw_matches = tagged;
            result.strategy = Some(strategy);
            break;
        }
    }
    result
}

/// Composite identity used before start times are resolved.
fn dedupe_key(m: &MatchItem) -> (String, String, String, String, String) {
    (
        m.date_text.clone(),
        m.time.clone(),
        m.home_team.clone(),
        m.away_team.clone(),
        m.league_round_venue.clone(),
    )
}

/// First occurrence per key, in input order. A later duplicate with a resolved
/// `start_at` replaces an earlier one without it.
pub fn dedupe_matches(items: &[MatchItem]) -> Vec<MatchItem> {
    let mut index: HashMap<_, usize> = HashMap::new();
    let mut out: Vec<MatchItem> = Vec::new();
    for m in items {
        match index.get(&dedupe_key(m)) {
            Some(&i) => {
                if out[i].start_at.is_none() && m.start_at.is_some() {
                    out[i] = m.clone();
                }
            }
            None => {
                index.insert(dedupe_key(m), out.len());
                out.push(m.clone());
            }
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Root + tab labels
// ---------------------------------------------------------------------------

fn find_calendar_root(doc: &Html) -> ElementRef<'_> {
    let body = doc.select(&BODY).next().unwrap_or_else(|| doc.root_element());
    let heading = doc
        .root_element()
        .descendants()
        .filter_map(ElementRef::wrap)
        .find(|el| own_text(*el).contains(CALENDAR_HEADING));
    let Some(mut current) = heading else {
        return body;
    };
    for _ in 0..=MAX_ROOT_DEPTH {
        if looks_like_calendar(current) {
            return current;
        }
        match current.parent().and_then(ElementRef::wrap) {
            Some(parent) => current = parent,
            None => break,
        }
    }
    body
}

fn looks_like_calendar(el: ElementRef<'_>) -> bool {
    if el.select(&CARD).next().is_some() {
        return true;
    }
    let text = get_text(Some(el));
    TIME_RE.is_match(&text) && DAY_MONTH_RE.is_match(&text)
}

/// Short "day(s) + month" fragments on clickable elements outside match cards,
/// deduplicated by text in document order.
fn collect_tab_labels(root: ElementRef<'_>) -> Vec<(String, ElementRef<'_>)> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for el in root.select(&TAB_CANDIDATE) {
        if inside_card(el) {
            continue;
        }
        let text = get_text(Some(el));
        if !is_tab_label(&text) {
            continue;
        }
        if seen.insert(text.clone()) {
            out.push((text, el));
        }
    }
    out
}

/// Short "day(s) + Ukrainian month" text such as "1-7 вересня" or "12 жовт".
pub(crate) fn is_tab_label(text: &str) -> bool {
    !text.is_empty()
        && text.chars().count() <= MAX_TAB_LABEL_CHARS
        && TAB_LABEL_RE.is_match(text)
        && month_ukr_to_number(text).is_some()
}

fn inside_card(el: ElementRef<'_>) -> bool {
    el.ancestors()
        .filter_map(ElementRef::wrap)
        .any(|a| CARD.matches(&a))
}

fn normalize_time(text: &str) -> Option<String> {
    let caps = TIME_RE.captures(text)?;
    let hour: u32 = caps[1].parse().ok()?;
    let minute: u32 = caps[2].parse().ok()?;
    if hour > 23 || minute > 59 {
        return None;
    }
    Some(format!("{hour:02}:{minute:02}"))
}

// ---------------------------------------------------------------------------
// Attempt 1: explicit match cards
// ---------------------------------------------------------------------------

fn match_cards(root: ElementRef<'_>) -> Vec<Found<'_>> {
    root.select(&CARD)
        .filter_map(|card| {
            let home_team = get_text(card.select(&CARD_HOME).next());
            let away_team = get_text(card.select(&CARD_AWAY).next());
            let time = normalize_time(&get_text(card.select(&CARD_TIME).next()));
            // Incomplete cards are layout noise (placeholders, ads), not errors.
            let time = time.filter(|_| !home_team.is_empty() && !away_team.is_empty())?;
            let status = Some(get_text(card.select(&CARD_STATUS).next())).filter(|s| !s.is_empty());
            let marks: Vec<String> = card
                .select(&CARD_MARK)
                .map(|m| get_text(Some(m)))
                .filter(|m| !m.is_empty())
                .collect();
            let item = MatchItem {
                date_text: get_text(card.select(&CARD_DATE).next()),
                time,
                home_team,
                away_team,
                league_round_venue: marks.join(" | "),
                status,
                ..MatchItem::default()
            };
            Some((item, Some(card)))
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Attempt 2: generic blocks holding a kickoff time and two team-like fragments
// ---------------------------------------------------------------------------

/// Containers longer than this hold whole sections, not one match.
const MAX_CONTAINER_CHARS: usize = 300;

fn match_containers(root: ElementRef<'_>) -> Vec<Found<'_>> {
    let accepted: Vec<(ElementRef<'_>, MatchItem)> = root
        .select(&CONTAINER)
        .filter_map(|el| container_match(el).map(|m| (el, m)))
        .collect();

    // Keep the innermost accepted block; an outer block spanning several matches
    // would pair teams from different fixtures.
    let ids: HashSet<_> = accepted.iter().map(|(el, _)| el.id()).collect();
    accepted
        .into_iter()
        .filter(|(el, _)| {
            !el.descendants()
                .skip(1)
                .any(|d| ids.contains(&d.id()))
        })
        .map(|(el, m)| (m, Some(el)))
        .collect()
}

fn container_match(el: ElementRef<'_>) -> Option<MatchItem> {
    let text = get_text(Some(el));
    if text.chars().count() > MAX_CONTAINER_CHARS {
        return None;
    }
    let time = normalize_time(&text)?;

    let fragments: Vec<String> = el
        .text()
        .map(normalize_space)
        .filter(|f| !f.is_empty())
        .collect();

    let teams: Vec<&String> = fragments.iter().filter(|f| is_team_like(f)).collect();
    if teams.len() < 2 {
        return None;
    }

    let date_text = DAY_MONTH_RE
        .find(&text)
        .map(|m| m.as_str().to_string())
        .unwrap_or_default();
    let descriptors: Vec<&str> = fragments
        .iter()
        .filter(|f| LRV_RE.is_match(f) && !TIME_RE.is_match(f))
        .map(String::as_str)
        .collect();
    let status = fragments.iter().find(|f| STATUS_RE.is_match(f)).cloned();

    Some(MatchItem {
        date_text,
        time,
        home_team: teams[0].clone(),
        away_team: teams[1].clone(),
        league_round_venue: descriptors.join(" | "),
        status,
        ..MatchItem::default()
    })
}

fn is_team_like(fragment: &str) -> bool {
    let len = fragment.chars().count();
    (2..=40).contains(&len)
        && has_letter(fragment)
        && !TIME_RE.is_match(fragment)
        && !DAY_MONTH_RE.is_match(fragment)
        && !LRV_RE.is_match(fragment)
        && !STATUS_RE.is_match(fragment)
        && !NON_TEAM_RE.is_match(fragment)
}

// ---------------------------------------------------------------------------
// Attempt 3: regex over the flattened text
// ---------------------------------------------------------------------------

/// Splits the flattened root text at every "day month time" marker and reads
/// each chunk as `date time home - away <league> ...`. Only the layout anchored
/// on [`TEXT_FALLBACK_LEAGUE`] is understood. There are no source elements here,
/// so each match takes the last tab label found earlier in the same text, and
/// a label also ends the chunk before it.
fn match_text(root: ElementRef<'_>) -> Vec<Found<'_>> {
    let text = get_text(Some(root));
    let starts: Vec<usize> = TEXT_DATE_TIME_RE.find_iter(&text).map(|m| m.start()).collect();
    let labels = label_offsets(&text, collect_tab_labels(root).into_iter().map(|(l, _)| l));

    starts
        .iter()
        .enumerate()
        .filter_map(|(i, &start)| {
            let next_start = starts.get(i + 1).copied().unwrap_or(text.len());
            let end = labels
                .iter()
                .map(|(at, _)| *at)
                .find(|&at| at > start && at < next_start)
                .unwrap_or(next_start);
            let chunk = text[start..end].trim();
            let caps = TEXT_MATCH_RE.captures(chunk)?;
            let time = normalize_time(&caps["time"])?;
            let item = MatchItem {
                date_text: caps["date"].to_string(),
                time,
                home_team: caps["home"].trim().to_string(),
                away_team: caps["away"].trim().to_string(),
                league_round_venue: caps["lrv"].trim().to_string(),
                tab_label: labels
                    .iter()
                    .take_while(|(at, _)| *at < start)
                    .last()
                    .map(|(_, label)| label.clone()),
                ..MatchItem::default()
            };
            Some((item, None))
        })
        .collect()
}

/// Byte offsets of every whole occurrence of each label in `text`, sorted.
fn label_offsets(text: &str, labels: impl Iterator<Item = String>) -> Vec<(usize, String)> {
    let mut out: Vec<(usize, String)> = labels
        .flat_map(|label| {
            text.match_indices(label.as_str())
                .filter(|(at, found)| {
                    let before = text[..*at].chars().next_back();
                    let after = text[at + found.len()..].chars().next();
                    !before.is_some_and(|c| c.is_alphanumeric())
                        && !after.is_some_and(|c| c.is_alphanumeric())
                })
                .map(|(at, _)| at)
                .collect::<Vec<_>>()
                .into_iter()
                .map(move |at| (at, label.clone()))
        })
        .collect();
    out.sort();
    out
}
