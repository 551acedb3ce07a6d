use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Standings
// ---------------------------------------------------------------------------

/// One team's table position at a point in time. A missing stat is `None`,
/// never a sentinel number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct StandingRow {
    pub team_name: String,
    pub position: i64,
    pub played: Option<i64>,
    pub points: Option<i64>,
    pub wins: Option<i64>,
    pub draws: Option<i64>,
    pub losses: Option<i64>,
    pub goals_for: Option<i64>,
    pub goals_against: Option<i64>,
    pub logo_url: Option<String>,
}

impl StandingRow {
    pub fn new(team_name: impl Into<String>, position: i64) -> Self {
        Self {
            team_name: team_name.into(),
            position,
            played: None,
            points: None,
            wins: None,
            draws: None,
            losses: None,
            goals_for: None,
            goals_against: None,
            logo_url: None,
        }
    }

    pub fn field(&self, field: DiffField) -> Option<i64> {
        match field {
            DiffField::Position => Some(self.position),
            DiffField::Played => self.played,
            DiffField::Points => self.points,
            DiffField::Wins => self.wins,
            DiffField::Draws => self.draws,
            DiffField::Losses => self.losses,
            DiffField::GoalsFor => self.goals_for,
            DiffField::GoalsAgainst => self.goals_against,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParsedStandings {
    pub title: String,
    pub rows: Vec<StandingRow>,
}

/// Numeric standings columns compared by the diff engine, in display order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiffField {
    Position,
    Played,
    Points,
    Wins,
    Draws,
    Losses,
    GoalsFor,
    GoalsAgainst,
}

impl DiffField {
    pub const ALL: [DiffField; 8] = [
        DiffField::Position,
        DiffField::Played,
        DiffField::Points,
        DiffField::Wins,
        DiffField::Draws,
        DiffField::Losses,
        DiffField::GoalsFor,
        DiffField::GoalsAgainst,
    ];

    /// Fields synthesized for rows that only exist on one side of a diff.
    pub const SUMMARY: [DiffField; 3] = [DiffField::Position, DiffField::Played, DiffField::Points];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiffKind {
    Changed,
    New,
    Removed,
    Same,
}

impl DiffKind {
    /// Review order: changed teams first, unchanged last.
    pub fn priority(self) -> u8 {
        match self {
            DiffKind::Changed => 0,
            DiffKind::New => 1,
            DiffKind::Removed => 2,
            DiffKind::Same => 3,
        }
    }
}

pub type FieldChange = (Option<i64>, Option<i64>);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandingDiffRow {
    pub team_name: String,
    pub old: Option<StandingRow>,
    pub next: Option<StandingRow>,
    pub changes: BTreeMap<DiffField, FieldChange>,
    pub kind: DiffKind,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StandingsDiff {
    pub changed_count: usize,
    pub rows: Vec<StandingDiffRow>,
}

// ---------------------------------------------------------------------------
// Matches
// ---------------------------------------------------------------------------

/// One scraped match occurrence. `external_match_id` stays empty until the
/// start time is resolved and the stable key hashed.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MatchItem {
    pub date_text: String,
    pub time: String,
    pub home_team: String,
    pub away_team: String,
    pub league_round_venue: String,
    pub status: Option<String>,
    pub start_at: Option<String>,
    pub season_label: Option<String>,
    pub tab_label: Option<String>,
    pub external_match_id: String,
}

/// A calendar sub-page discovered from tab UI text. `last_day == "0"` means
/// open-ended / same day. Without `first_day` the tab cannot be fetched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarTab {
    pub label: String,
    pub first_day: Option<String>,
    pub last_day: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TabResult {
    pub label: String,
    pub first_day: Option<String>,
    pub last_day: Option<String>,
    pub url: Option<String>,
    pub matches: usize,
    pub skipped: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningCode {
    LowYield,
    Tabs,
    FetchErrors,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportWarning {
    pub code: WarningCode,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MultiTabResult {
    pub base_url: String,
    pub season_label: Option<String>,
    pub tabs: Vec<TabResult>,
    pub matches: Vec<MatchItem>,
    pub our_team_matches: usize,
    pub warnings: Vec<ImportWarning>,
}

/// Emitted by the orchestrator after each tab.
#[derive(Debug, Clone, Serialize)]
pub struct TabProgress {
    pub index: usize,
    pub total: usize,
    pub label: String,
    pub matches_so_far: usize,
}

// ---------------------------------------------------------------------------
// Tournaments / runs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct TournamentInfo {
    pub id: i64,
    pub name: String,
    pub external_url: Option<String>,
    pub season: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Owner,
    Admin,
    Manager,
    Member,
}

impl Role {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "owner" => Some(Role::Owner),
            "admin" => Some(Role::Admin),
            "manager" => Some(Role::Manager),
            "member" => Some(Role::Member),
            _ => None,
        }
    }

    pub fn can_write(self) -> bool {
        matches!(self, Role::Owner | Role::Admin | Role::Manager)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum RunAction {
    Applied,
    Skipped,
}

impl std::fmt::Display for RunAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunAction::Applied => write!(f, "applied"),
            RunAction::Skipped => write!(f, "skipped"),
        }
    }
}

/// The authenticated caller, as supplied by the auth provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub user_id: String,
    pub team_id: i64,
}
