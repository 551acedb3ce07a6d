//! Multi-tab calendar import: discover tabs, fetch each one sequentially with
//! a pause between requests, parse, hash and merge.

use std::collections::HashMap;

use reqwest::Url;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::calendar::LOW_YIELD_MIN_TABS;
use crate::config::DEFAULT_RATE_LIMIT_MS;
use crate::dates::infer_season_label_from_doc;
use crate::error::{AppError, Result};
use crate::fetch::{sleep, HtmlSource};
use crate::match_key::assign_external_id;
use crate::parse::calendar::parse_calendar_matches_from_html;
use crate::parse::tabs::extract_calendar_tabs;
use crate::text::parse_html_to_document;
use crate::types::{
    CalendarTab, ImportWarning, MatchItem, MultiTabResult, TabProgress, TabResult, WarningCode,
};

const PAGINATION_PARAMS: [&str; 3] = ["first_day", "last_day", "page"];

#[derive(Debug, Clone)]
pub struct MultiTabOptions {
    pub tournament_url: String,
    /// Overrides the season inferred from the URL / tabs page.
    pub season_label: Option<String>,
    /// Case-insensitive team name fragment counted in `our_team_matches`.
    pub our_team_query: Option<String>,
    pub rate_limit_ms: u64,
}

impl MultiTabOptions {
    pub fn new(tournament_url: impl Into<String>) -> Self {
        Self {
            tournament_url: tournament_url.into(),
            season_label: None,
            our_team_query: None,
            rate_limit_ms: DEFAULT_RATE_LIMIT_MS,
        }
    }
}

pub type ProgressFn<'a> = &'a (dyn Fn(TabProgress) + Send + Sync);

/// Tournament URL without pagination query parameters; other params survive
/// in their original order.
pub fn strip_pagination_params(url: &str) -> Result<Url> {
    let mut parsed = Url::parse(url).map_err(|e| AppError::BadRequest(format!("invalid tournament url {url}: {e}")))?;
    let kept: Vec<(String, String)> = parsed
        .query_pairs()
        .filter(|(k, _)| !PAGINATION_PARAMS.contains(&k.as_ref()))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    parsed.set_query(None);
    if !kept.is_empty() {
        parsed.query_pairs_mut().extend_pairs(kept);
    }
    Ok(parsed)
}

/// Base URL plus the tab's `first_day` (and `last_day` when known).
pub fn tab_url(base: &Url, first_day: &str, last_day: Option<&str>) -> String {
    let mut url = base.clone();
    {
        let mut pairs = url.query_pairs_mut();
        pairs.append_pair("first_day", first_day);
        if let Some(last) = last_day {
            pairs.append_pair("last_day", last);
        }
    }
    url.to_string()
}

/// Run a full multi-tab import. `tabs_html` is the already-fetched page that
/// carries the calendar tab strip.
///
/// Per-tab failures are recorded on the tab and never abort the run; only
/// cancellation (and an unusable tournament URL) does.
pub async fn fetch_and_parse_all_tabs<S: HtmlSource>(
    source: &S,
    opts: &MultiTabOptions,
    tabs_html: &str,
    on_progress: Option<ProgressFn<'_>>,
    cancel: &CancellationToken,
) -> Result<MultiTabResult> {
    let base = strip_pagination_params(&opts.tournament_url)?;
    let (tabs, season_label) = discover_tabs(opts, tabs_html);
    let season = season_label.as_deref();
    info!(base_url = %base, tabs = tabs.len(), season = ?season, "starting multi-tab import");

    let total = tabs.len();
    let mut results = Vec::with_capacity(total);
    let mut collected: Vec<MatchItem> = Vec::new();

    for (index, tab) in tabs.into_iter().enumerate() {
        if cancel.is_cancelled() {
            return Err(AppError::Cancelled);
        }

        let fetched = match tab.first_day.as_deref() {
            None => {
                warn!(label = %tab.label, "tab date range unresolved, skipping");
                results.push(TabResult {
                    error: Some(format!("could not resolve a date range from tab label \"{}\"", tab.label)),
                    skipped: true,
                    ..tab_result(&tab, None)
                });
                false
            }
            Some(first_day) => {
                let url = tab_url(&base, first_day, tab.last_day.as_deref());
                match fetch_tab(source, &url, &tab.label, season, cancel).await {
                    Ok(matches) => {
                        debug!(label = %tab.label, matches = matches.len(), "tab parsed");
                        results.push(TabResult {
                            matches: matches.len(),
                            ..tab_result(&tab, Some(url))
                        });
                        collected.extend(matches);
                    }
                    Err(AppError::Cancelled) => return Err(AppError::Cancelled),
                    Err(e) => {
                        warn!(label = %tab.label, url = %url, error = %e, "tab fetch failed");
                        results.push(TabResult {
                            error: Some(e.to_string()),
                            ..tab_result(&tab, Some(url))
                        });
                    }
                }
                true
            }
        };

        if let Some(progress) = on_progress {
            progress(TabProgress {
                index,
                total,
                label: tab.label.clone(),
                matches_so_far: collected.len(),
            });
        }

        if fetched && index + 1 < total {
            sleep(opts.rate_limit_ms, cancel).await?;
        }
    }

    let matches = merge_matches(collected);
    let our_team_matches = opts
        .our_team_query
        .as_deref()
        .map(|q| count_team_matches(&matches, q))
        .unwrap_or(0);
    let warnings = compute_warnings(&results, matches.len());
    for w in &warnings {
        warn!(code = ?w.code, "{}", w.message);
    }
    info!(tabs = results.len(), matches = matches.len(), our_team_matches, "multi-tab import finished");

    Ok(MultiTabResult {
        base_url: base.to_string(),
        season_label,
        tabs: results,
        matches,
        our_team_matches,
        warnings,
    })
}

/// Tabs and season from the tabs page. Kept synchronous so the parsed
/// document never lives across an await point.
fn discover_tabs(opts: &MultiTabOptions, tabs_html: &str) -> (Vec<CalendarTab>, Option<String>) {
    let doc = parse_html_to_document(tabs_html);
    let season = opts
        .season_label
        .clone()
        .or_else(|| infer_season_label_from_doc(Some(&opts.tournament_url), &doc));
    let tabs = extract_calendar_tabs(&doc, season.as_deref());
    (tabs, season)
}

async fn fetch_tab<S: HtmlSource>(
    source: &S,
    url: &str,
    label: &str,
    season: Option<&str>,
    cancel: &CancellationToken,
) -> Result<Vec<MatchItem>> {
    let html = source.fetch_html(url, cancel).await?;
    let parsed = parse_calendar_matches_from_html(&html);
    Ok(parsed
        .matches
        .into_iter()
        .map(|mut m| {
            m.tab_label = Some(label.to_string());
            assign_external_id(&mut m, season);
            m
        })
        .collect())
}

fn tab_result(tab: &CalendarTab, url: Option<String>) -> TabResult {
    TabResult {
        label: tab.label.clone(),
        first_day: tab.first_day.clone(),
        last_day: tab.last_day.clone(),
        url,
        matches: 0,
        skipped: false,
        error: None,
    }
}

/// Deduplicate by `external_match_id` keeping first-seen order; a duplicate
/// with a resolved `start_at` replaces one without.
pub fn merge_matches(items: Vec<MatchItem>) -> Vec<MatchItem> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut merged: Vec<MatchItem> = Vec::new();
    for item in items {
        match index.get(&item.external_match_id) {
            Some(&i) => {
                if merged[i].start_at.is_none() && item.start_at.is_some() {
                    merged[i] = item;
                }
            }
            None => {
                index.insert(item.external_match_id.clone(), merged.len());
                merged.push(item);
            }
        }
    }
    merged
}

fn count_team_matches(matches: &[MatchItem], query: &str) -> usize {
    let q = query.trim().to_lowercase();
    if q.is_empty() {
        return 0;
    }
    matches
        .iter()
        .filter(|m| m.home_team.to_lowercase().contains(&q) || m.away_team.to_lowercase().contains(&q))
        .count()
}

pub fn compute_warnings(tabs: &[TabResult], merged: usize) -> Vec<ImportWarning> {
    let ok = tabs.iter().filter(|t| !t.skipped && t.error.is_none()).count();
    let skipped = tabs.iter().filter(|t| t.skipped).count();
    let failed = tabs.iter().filter(|t| !t.skipped && t.error.is_some()).count();

    let mut warnings = Vec::new();
    if ok >= LOW_YIELD_MIN_TABS && merged < ok {
        warnings.push(ImportWarning {
            code: WarningCode::LowYield,
            message: format!("only {merged} matches from {ok} fetched tabs; the calendar layout may have changed"),
        });
    }
    if skipped > 0 {
        warnings.push(ImportWarning {
            code: WarningCode::Tabs,
            message: format!("{skipped} tab(s) skipped: date range could not be resolved"),
        });
    }
    if failed > 0 {
        warnings.push(ImportWarning {
            code: WarningCode::FetchErrors,
            message: format!("{failed} tab(s) failed to fetch or parse"),
        });
    }
    warnings
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Serves canned pages keyed by the `first_day` query value.
    struct FakeSource {
        pages: HashMap<String, String>,
        requested: Mutex<Vec<String>>,
    }

    impl FakeSource {
        fn new(pages: &[(&str, &str)]) -> Self {
            Self {
                pages: pages.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
                requested: Mutex::new(Vec::new()),
            }
        }
    }

    impl HtmlSource for FakeSource {
        async fn fetch_html(&self, url: &str, _cancel: &CancellationToken) -> Result<String> {
            self.requested.lock().unwrap().push(url.to_string());
            self.pages
                .iter()
                .find(|(day, _)| url.contains(&format!("first_day={day}")))
                .map(|(_, html)| html.clone())
                .ok_or_else(|| AppError::HttpStatus {
                    status: 404,
                    reason: "Not Found".into(),
                })
        }
    }

    fn card(date: &str, time: &str, home: &str, away: &str) -> String {
        format!(
            r#"<div class="match-card"><span class="match-card__date">{date}</span>
               <span class="match-card__time">{time}</span>
               <span class="match-card__team--left">{home}</span>
               <span class="match-card__team--right">{away}</span>
               <span class="match-card__mark">Тур 1</span></div>"#
        )
    }

    fn page(cards: &[String]) -> String {
        format!("<body><h2>Календар матчів</h2><div>{}</div></body>", cards.join(""))
    }

    const TABS_HTML: &str = r##"<nav>
        <a href="?first_day=2025-09-01&amp;last_day=2025-09-07">1-7 вересня</a>
        <a href="#">31 лютого</a>
        <a href="?first_day=2025-09-08&amp;last_day=2025-09-14">8-14 вересня</a>
    </nav>"##;

    fn opts() -> MultiTabOptions {
        MultiTabOptions {
            season_label: Some("2025/26".into()),
            our_team_query: Some("наші".into()),
            rate_limit_ms: 0,
            ..MultiTabOptions::new("https://v9ky.in.ua/2025-26_Liga?first_day=2025-01-01&page=3&league=1")
        }
    }

    #[test]
    fn strips_only_pagination_params() {
        let base = strip_pagination_params("https://x.org/t?first_day=1&league=2&last_day=3&page=4").unwrap();
        assert_eq!(base.as_str(), "https://x.org/t?league=2");
        let bare = strip_pagination_params("https://x.org/t?page=1").unwrap();
        assert_eq!(bare.as_str(), "https://x.org/t");
        assert!(strip_pagination_params("not a url").is_err());
    }

    #[test]
    fn tab_url_appends_day_range() {
        let base = strip_pagination_params("https://x.org/t?league=2").unwrap();
        assert_eq!(
            tab_url(&base, "2025-09-01", Some("0")),
            "https://x.org/t?league=2&first_day=2025-09-01&last_day=0"
        );
    }

    #[tokio::test]
    async fn three_tabs_one_skipped() {
        let source = FakeSource::new(&[
            ("2025-09-01", &page(&[card("3 вер", "18:30", "Наші", "Сусіди")])),
            ("2025-09-08", &page(&[card("10 вер", "19:00", "Інші", "Треті"), card("11 вер", "19:00", "Сусіди", "Наші")])),
        ]);
        let progress = Mutex::new(Vec::new());
        let on_progress = |p: TabProgress| progress.lock().unwrap().push((p.index, p.total, p.matches_so_far));

        let res = fetch_and_parse_all_tabs(&source, &opts(), TABS_HTML, Some(&on_progress), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(res.base_url, "https://v9ky.in.ua/2025-26_Liga?league=1");
        assert_eq!(res.tabs.len(), 3);
        assert_eq!(res.tabs.iter().filter(|t| t.skipped).count(), 1);
        assert!(res.tabs[1].skipped);
        assert!(res.tabs[1].error.is_some());
        assert_eq!(res.tabs[0].matches, 1);
        assert_eq!(res.tabs[2].matches, 2);

        let tabs_warning = res.warnings.iter().find(|w| w.code == WarningCode::Tabs).unwrap();
        assert!(tabs_warning.message.contains('1'));
        assert!(!res.warnings.iter().any(|w| w.code == WarningCode::FetchErrors));

        assert_eq!(res.matches.len(), 3);
        assert_eq!(res.our_team_matches, 2);
        let first = &res.matches[0];
        assert_eq!(first.start_at.as_deref(), Some("2025-09-03T18:30:00+02:00"));
        assert_eq!(first.tab_label.as_deref(), Some("1-7 вересня"));
        assert_eq!(first.external_match_id.len(), 40);

        assert_eq!(*progress.lock().unwrap(), vec![(0, 3, 1), (1, 3, 1), (2, 3, 3)]);
        assert_eq!(source.requested.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn tab_failure_is_recorded_and_run_continues() {
        let source = FakeSource::new(&[("2025-09-08", &page(&[card("10 вер", "19:00", "А", "Б")]))]);
        let res = fetch_and_parse_all_tabs(&source, &opts(), TABS_HTML, None, &CancellationToken::new())
            .await
            .unwrap();
        assert!(res.tabs[0].error.as_deref().unwrap_or("").contains("404"));
        assert!(!res.tabs[0].skipped);
        assert_eq!(res.tabs[2].matches, 1);
        assert!(res.warnings.iter().any(|w| w.code == WarningCode::FetchErrors));
    }

    #[tokio::test]
    async fn cancelled_run_stops() {
        let source = FakeSource::new(&[]);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let res = fetch_and_parse_all_tabs(&source, &opts(), TABS_HTML, None, &cancel).await;
        assert!(matches!(res, Err(AppError::Cancelled)));
        assert!(source.requested.lock().unwrap().is_empty());
    }

    #[test]
    fn merge_prefers_resolved_start() {
        let unresolved = MatchItem {
            external_match_id: "same".into(),
            home_team: "A".into(),
            ..MatchItem::default()
        };
        let resolved = MatchItem {
            start_at: Some("2025-10-03T18:30:00+02:00".into()),
            ..unresolved.clone()
        };
        let other = MatchItem {
            external_match_id: "other".into(),
            ..MatchItem::default()
        };
        let merged = merge_matches(vec![unresolved, other, resolved.clone()]);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0], resolved);
        assert_eq!(merged[1].external_match_id, "other");
    }

    #[test]
    fn low_yield_needs_six_ok_tabs() {
        let ok = |label: &str| TabResult {
            label: label.into(),
            first_day: Some("2025-09-01".into()),
            last_day: None,
            url: None,
            matches: 0,
            skipped: false,
            error: None,
        };
        let five: Vec<TabResult> = (0..5).map(|i| ok(&i.to_string())).collect();
        assert!(compute_warnings(&five, 0).is_empty());
        let six: Vec<TabResult> = (0..6).map(|i| ok(&i.to_string())).collect();
        let w = compute_warnings(&six, 5);
        assert_eq!(w.len(), 1);
        assert_eq!(w[0].code, WarningCode::LowYield);
        assert!(compute_warnings(&six, 6).is_empty());
    }
}
