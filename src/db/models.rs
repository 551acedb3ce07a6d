//! Row types read back from SQLite.

use serde::Serialize;

use crate::types::RunAction;

/// One preview decision, applied or skipped.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct StandingsRun {
    pub id: i64,
    pub tournament_id: i64,
    pub team_id: i64,
    pub source_url: String,
    pub title: String,
    pub action: RunAction,
    pub rows_count: i64,
    pub changed_count: i64,
    pub created_by: String,
    pub created_at: i64,
}

/// Insert payload for `standings_runs`.
#[derive(Debug, Clone)]
pub struct NewRun<'a> {
    pub tournament_id: i64,
    pub team_id: i64,
    pub source_url: &'a str,
    pub title: &'a str,
    pub action: RunAction,
    pub changed_count: i64,
    pub created_by: &'a str,
    pub created_at: i64,
}
