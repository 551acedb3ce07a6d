//! Standings table extraction.
//!
//! Each known site family has its own strategy, picked by hostname or an explicit
//! hint. Site strategies fall back to the generic table scorer when they find
//! nothing, so an unexpected layout degrades to "best effort" instead of an error.

use std::collections::{HashMap, HashSet};

use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Url;
use scraper::{ElementRef, Html, Selector};
use tracing::debug;

use crate::text::{get_text, has_letter, normalize_space, own_text, parse_html_to_document, parse_strict_int};
use crate::types::{ParsedStandings, StandingRow};

static TABLE: Lazy<Selector> = Lazy::new(|| Selector::parse("table").expect("valid table selector"));
static ROW: Lazy<Selector> = Lazy::new(|| Selector::parse("tr").expect("valid tr selector"));
static CELL: Lazy<Selector> = Lazy::new(|| Selector::parse("td, th").expect("valid cell selector"));
static IMG: Lazy<Selector> = Lazy::new(|| Selector::parse("img").expect("valid img selector"));
static H1: Lazy<Selector> = Lazy::new(|| Selector::parse("h1").expect("valid h1 selector"));
static TITLE: Lazy<Selector> = Lazy::new(|| Selector::parse("title").expect("valid title selector"));
static TABLE_BLOCK: Lazy<Selector> =
    Lazy::new(|| Selector::parse(".table").expect("valid table block selector"));
static BLOCK_TITLE: Lazy<Selector> = Lazy::new(|| {
    Selector::parse(".table__title, .table-title, h2, h3").expect("valid block title selector")
});

static GOALS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d+)\s*[-–]\s*(\d+)").expect("valid goals regex"));
static GOALS_CELL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d+\s*[-–]\s*\d+$").expect("valid goals cell regex"));

const V9KY_HEADING: &str = "Турнірна таблиця";
/// Column abbreviations of the v9ky header row (І В Н П М О) with spaces removed.
const V9KY_HEADER_ABBR: &str = "ІВНП";

/// Which extraction strategy to run for a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StandingsFormat {
    /// Table found under the "Турнірна таблиця" heading, class-tagged cells.
    V9ky,
    /// Several group tables in `.table` blocks; the one holding our team wins.
    JoinFootball,
    Generic,
}

impl StandingsFormat {
    pub fn from_url(url: Option<&str>) -> Self {
        let host = url
            .and_then(|u| Url::parse(u).ok())
            .and_then(|u| u.host_str().map(str::to_ascii_lowercase))
            .unwrap_or_default();
        if host.contains("v9ky") {
            StandingsFormat::V9ky
        } else if host.contains("join.football") {
            StandingsFormat::JoinFootball
        } else {
            StandingsFormat::Generic
        }
    }

    pub fn from_hint(hint: &str) -> Option<Self> {
        match hint.trim().to_ascii_lowercase().as_str() {
            "v9ky" => Some(StandingsFormat::V9ky),
            "join" | "join.football" | "joinfootball" => Some(StandingsFormat::JoinFootball),
            "generic" => Some(StandingsFormat::Generic),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Column {
    Position,
    Team,
    Played,
    Wins,
    Draws,
    Losses,
    Goals,
    Points,
}

/// Column layout assumed when the header row is not recognizable.
const FALLBACK_COLUMNS: [(Column, usize); 8] = [
    (Column::Position, 0),
    (Column::Team, 1),
    (Column::Played, 2),
    (Column::Wins, 3),
    (Column::Draws, 4),
    (Column::Losses, 5),
    (Column::Goals, 6),
    (Column::Points, 7),
];

/// CSS classes the v9ky markup puts on each standings cell.
const V9KY_CELL_CLASSES: [(Column, &[&str]); 8] = [
    (Column::Position, &["place", "position", "num"]),
    (Column::Team, &["team", "team-name", "name"]),
    (Column::Played, &["games", "played"]),
    (Column::Wins, &["win", "wins"]),
    (Column::Draws, &["draw", "draws"]),
    (Column::Losses, &["lose", "loses", "losses"]),
    (Column::Goals, &["goals", "balls"]),
    (Column::Points, &["points", "score", "pts"]),
];

fn header_column(text: &str) -> Option<Column> {
    let t = normalize_space(text).to_lowercase();
    let t = t.trim_end_matches('.');
    let column = match t {
        "#" | "№" | "місце" | "позиція" | "pos" | "position" | "place" => Column::Position,
        "і" | "ігри" | "ігор" | "и" | "игры" | "games" | "played" | "p" | "gp" => Column::Played,
        "в" | "виграші" | "перемоги" | "w" | "won" | "wins" => Column::Wins,
        "н" | "нічиї" | "d" | "drawn" | "draws" => Column::Draws,
        "п" | "поразки" | "l" | "lost" | "losses" => Column::Losses,
        "м" | "м'ячі" | "голи" | "г" | "goals" | "gf-ga" => Column::Goals,
        "о" | "очки" | "бали" | "pts" | "points" => Column::Points,
        _ if ["команда", "клуб", "назва", "team", "club"].iter().any(|k| t.contains(k)) => {
            Column::Team
        }
        _ => return None,
    };
    Some(column)
}

fn header_map(row: ElementRef<'_>) -> HashMap<Column, usize> {
    let mut map = HashMap::new();
    for (idx, cell) in row.select(&CELL).enumerate() {
        if let Some(col) = header_column(&get_text(Some(cell))) {
            map.entry(col).or_insert(idx);
        }
    }
    map
}

// ---------------------------------------------------------------------------
// Entry points
// ---------------------------------------------------------------------------

/// Parse a standings page, picking the strategy from the source URL's hostname.
pub fn parse_standings_from_html_dom(
    html: &str,
    source_url: Option<&str>,
    team_query: Option<&str>,
) -> ParsedStandings {
    parse_standings_with_format(html, source_url, team_query, StandingsFormat::from_url(source_url))
}

pub fn parse_standings_with_format(
    html: &str,
    source_url: Option<&str>,
    team_query: Option<&str>,
    format: StandingsFormat,
) -> ParsedStandings {
    let doc = parse_html_to_document(html);
    let base = source_url.and_then(|u| Url::parse(u).ok());
    let base = base.as_ref();

    let site_rows = match format {
        StandingsFormat::V9ky => parse_v9ky(&doc, base),
        StandingsFormat::JoinFootball => parse_join_football(&doc, base, team_query),
        StandingsFormat::Generic => Vec::new(),
    };
    let rows = if site_rows.is_empty() {
        if format != StandingsFormat::Generic {
            debug!(?format, "site strategy found no rows, falling back to generic table scoring");
        }
        parse_generic(&doc, base)
    } else {
        site_rows
    };

    ParsedStandings {
        title: page_title(&doc),
        rows: dedupe_rows(rows),
    }
}

fn page_title(doc: &Html) -> String {
    let h1 = get_text(doc.select(&H1).next());
    if !h1.is_empty() {
        return h1;
    }
    get_text(doc.select(&TITLE).next())
}

/// One row per position and per team; later duplicates are dropped.
fn dedupe_rows(rows: Vec<StandingRow>) -> Vec<StandingRow> {
    let mut positions = HashSet::new();
    let mut teams = HashSet::new();
    rows.into_iter()
        .filter(|r| {
            let keep = !positions.contains(&r.position) && !teams.contains(&r.team_name);
            if keep {
                positions.insert(r.position);
                teams.insert(r.team_name.clone());
            } else {
                debug!(team = %r.team_name, position = r.position, "dropping duplicate standings row");
            }
            keep
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Generic: best-scoring <table>
// ---------------------------------------------------------------------------

fn parse_generic(doc: &Html, base: Option<&Url>) -> Vec<StandingRow> {
    let best = doc
        .select(&TABLE)
        .filter_map(|table| {
            let score = score_table(table);
            (score > 0).then_some((score, table))
        })
        // max_by_key keeps the last maximum; reverse so the first table wins ties.
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .max_by_key(|(score, _)| *score);

    match best {
        Some((_, table)) => extract_table_rows(table, base),
        None => Vec::new(),
    }
}

fn score_table(table: ElementRef<'_>) -> usize {
    let rows: Vec<ElementRef<'_>> = table.select(&ROW).collect();
    let Some(first) = rows.first() else {
        return 0;
    };
    let map = header_map(*first);
    let mut score = 0;
    if map.contains_key(&Column::Team) {
        score += 10;
    }
    if map.contains_key(&Column::Played) {
        score += 5;
    }
    if map.contains_key(&Column::Points) {
        score += 5;
    }
    if rows.len() < 2 {
        return score;
    }
    score + rows.len().min(40)
}

/// Rows of one standings table, using the header map when the first row is a
/// recognizable header and fixed column positions otherwise.
fn extract_table_rows(table: ElementRef<'_>, base: Option<&Url>) -> Vec<StandingRow> {
    let rows: Vec<ElementRef<'_>> = table.select(&ROW).collect();
    let Some(first) = rows.first() else {
        return Vec::new();
    };
    let map = header_map(*first);
    let (columns, body): (HashMap<Column, usize>, &[ElementRef<'_>]) = if map.contains_key(&Column::Team) {
        (map, &rows[1..])
    } else {
        (FALLBACK_COLUMNS.into_iter().collect(), &rows[..])
    };

    body.iter()
        .filter_map(|row| {
            let cells: Vec<ElementRef<'_>> = row.select(&CELL).collect();
            row_from_columns(&cells, &columns, base)
        })
        .collect()
}

fn row_from_columns(
    cells: &[ElementRef<'_>],
    columns: &HashMap<Column, usize>,
    base: Option<&Url>,
) -> Option<StandingRow> {
    let cell = |col: Column| columns.get(&col).and_then(|&i| cells.get(i)).copied();
    let number = |col: Column| cell(col).and_then(|c| parse_strict_int(&get_text(Some(c))));

    let position = cell(Column::Position).and_then(|c| parse_position(&get_text(Some(c))))?;
    let team_cell = cell(Column::Team)?;
    let team_name = get_text(Some(team_cell));
    if team_name.is_empty() || !has_letter(&team_name) {
        return None;
    }

    let goals = cell(Column::Goals)
        .and_then(|c| parse_goals(&get_text(Some(c))))
        .or_else(|| find_goals_cell(cells));

    Some(StandingRow {
        team_name,
        position,
        played: number(Column::Played),
        points: number(Column::Points),
        wins: number(Column::Wins),
        draws: number(Column::Draws),
        losses: number(Column::Losses),
        goals_for: goals.map(|g| g.0),
        goals_against: goals.map(|g| g.1),
        logo_url: logo_url(team_cell, base),
    })
}

/// Position cells are sometimes rendered as "1."; anything else must be digits only.
fn parse_position(text: &str) -> Option<i64> {
    parse_strict_int(text.trim().trim_end_matches('.')).filter(|p| *p >= 1)
}

fn parse_goals(text: &str) -> Option<(i64, i64)> {
    let caps = GOALS_RE.captures(text)?;
    Some((caps[1].parse().ok()?, caps[2].parse().ok()?))
}

fn find_goals_cell(cells: &[ElementRef<'_>]) -> Option<(i64, i64)> {
    cells
        .iter()
        .map(|c| get_text(Some(*c)))
        .find(|t| GOALS_CELL_RE.is_match(t))
        .and_then(|t| parse_goals(&t))
}

fn logo_url(cell: ElementRef<'_>, base: Option<&Url>) -> Option<String> {
    let img = cell.select(&IMG).next()?;
    let src = img
        .value()
        .attr("src")
        .or_else(|| img.value().attr("data-src"))?
        .trim();
    if src.is_empty() {
        return None;
    }
    match base {
        Some(b) => b.join(src).ok().map(|u| u.to_string()),
        None => Some(src.to_string()),
    }
}

// ---------------------------------------------------------------------------
// v9ky: table under the "Турнірна таблиця" heading
// ---------------------------------------------------------------------------

fn parse_v9ky(doc: &Html, base: Option<&Url>) -> Vec<StandingRow> {
    let elements: Vec<ElementRef<'_>> = doc
        .root_element()
        .descendants()
        .filter_map(ElementRef::wrap)
        .collect();
    let Some(heading_idx) = elements
        .iter()
        .position(|el| own_text(*el).contains(V9KY_HEADING))
    else {
        return Vec::new();
    };
    let Some(table) = elements[heading_idx..]
        .iter()
        .find(|el| el.value().name() == "table")
    else {
        return Vec::new();
    };

    table
        .select(&ROW)
        .filter(|row| !is_repeated_header(*row))
        .filter_map(|row| {
            let cells: Vec<ElementRef<'_>> = row.select(&CELL).collect();
            v9ky_row_by_class(&cells, base).or_else(|| v9ky_row_heuristic(&cells, base))
        })
        .collect()
}

fn is_repeated_header(row: ElementRef<'_>) -> bool {
    let compact: String = get_text(Some(row)).chars().filter(|c| !c.is_whitespace()).collect();
    compact.to_uppercase().contains(V9KY_HEADER_ABBR)
}

fn v9ky_row_by_class(cells: &[ElementRef<'_>], base: Option<&Url>) -> Option<StandingRow> {
    let mut columns = HashMap::new();
    for (idx, cell) in cells.iter().enumerate() {
        for (col, classes) in V9KY_CELL_CLASSES {
            if cell.value().classes().any(|c| classes.contains(&c)) {
                columns.entry(col).or_insert(idx);
            }
        }
    }
    if !columns.contains_key(&Column::Team) {
        return None;
    }
    // Class-tagged rows without a tagged position cell keep the first column.
    columns.entry(Column::Position).or_insert(0);
    row_from_columns(cells, &columns, base)
}

/// Whole-row reading when the cells carry no class markers: position is the
/// first numeric cell, the team the first cell with letters, then the numeric
/// cells in І В Н П … О order.
fn v9ky_row_heuristic(cells: &[ElementRef<'_>], base: Option<&Url>) -> Option<StandingRow> {
    let texts: Vec<String> = cells.iter().map(|c| get_text(Some(*c))).collect();
    let position = texts.iter().find_map(|t| parse_position(t))?;
    let team_idx = texts
        .iter()
        .position(|t| has_letter(t) && !GOALS_CELL_RE.is_match(t))?;
    let numbers: Vec<i64> = texts[team_idx + 1..]
        .iter()
        .filter_map(|t| parse_strict_int(t))
        .collect();

    let mut row = StandingRow::new(texts[team_idx].clone(), position);
    row.played = numbers.first().copied();
    if numbers.len() >= 5 {
        row.wins = Some(numbers[1]);
        row.draws = Some(numbers[2]);
        row.losses = Some(numbers[3]);
    }
    if numbers.len() >= 2 {
        row.points = numbers.last().copied();
    }
    if let Some((gf, ga)) = find_goals_cell(cells) {
        row.goals_for = Some(gf);
        row.goals_against = Some(ga);
    }
    row.logo_url = logo_url(cells[team_idx], base);
    Some(row)
}

// ---------------------------------------------------------------------------
// join.football: several `.table` blocks, one per group
// ---------------------------------------------------------------------------

fn parse_join_football(doc: &Html, base: Option<&Url>, team_query: Option<&str>) -> Vec<StandingRow> {
    let query = team_query
        .map(|q| normalize_space(q).to_lowercase())
        .filter(|q| !q.is_empty());

    let mut first_non_empty: Option<Vec<StandingRow>> = None;
    for block in doc.select(&TABLE_BLOCK) {
        let table = if block.value().name() == "table" {
            Some(block)
        } else {
            block.select(&TABLE).next()
        };
        let Some(table) = table else {
            continue;
        };
        let rows = extract_table_rows(table, base);
        if rows.is_empty() {
            continue;
        }
        if let Some(q) = query.as_deref() {
            if rows.iter().any(|r| r.team_name.to_lowercase().contains(q)) {
                debug!(
                    block = %get_text(block.select(&BLOCK_TITLE).next()),
                    "team query matched standings block"
                );
                return rows;
            }
        }
        if first_non_empty.is_none() {
            first_non_empty = Some(rows);
        }
    }
    first_non_empty.unwrap_or_default()
}
