//! SQLite access for tournaments, team links, standings snapshots and runs.
//! Multi-statement writes run inside a single transaction.

use sqlx::SqlitePool;

use crate::db::models::{NewRun, StandingsRun};
use crate::error::Result;
use crate::types::{MatchItem, Role, RunAction, StandingRow, TournamentInfo};

const STANDING_COLUMNS: &str =
    "team_name, position, played, points, wins, draws, losses, goals_for, goals_against, logo_url";

pub async fn member_role(pool: &SqlitePool, team_id: i64, user_id: &str) -> Result<Option<Role>> {
    let role: Option<String> =
        sqlx::query_scalar("SELECT role FROM team_members WHERE team_id = ? AND user_id = ?")
            .bind(team_id)
            .bind(user_id)
            .fetch_optional(pool)
            .await?;
    Ok(role.as_deref().and_then(Role::parse))
}

pub async fn team_name(pool: &SqlitePool, team_id: i64) -> Result<Option<String>> {
    let name = sqlx::query_scalar("SELECT name FROM teams WHERE id = ?")
        .bind(team_id)
        .fetch_optional(pool)
        .await?;
    Ok(name)
}

pub async fn tournament(pool: &SqlitePool, tournament_id: i64) -> Result<Option<TournamentInfo>> {
    let row = sqlx::query_as::<_, TournamentInfo>(
        "SELECT id, name, external_url, season FROM tournaments WHERE id = ?",
    )
    .bind(tournament_id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

pub async fn is_linked(pool: &SqlitePool, tournament_id: i64, team_id: i64) -> Result<bool> {
    let found: Option<i64> =
        sqlx::query_scalar("SELECT 1 FROM tournament_teams WHERE tournament_id = ? AND team_id = ?")
            .bind(tournament_id)
            .bind(team_id)
            .fetch_optional(pool)
            .await?;
    Ok(found.is_some())
}

/// Returns `true` when a new link row was created.
pub async fn link_tournament(pool: &SqlitePool, tournament_id: i64, team_id: i64, now: i64) -> Result<bool> {
    let res = sqlx::query(
        "INSERT OR IGNORE INTO tournament_teams (tournament_id, team_id, created_at) VALUES (?, ?, ?)",
    )
    .bind(tournament_id)
    .bind(team_id)
    .bind(now)
    .execute(pool)
    .await?;
    Ok(res.rows_affected() > 0)
}

pub async fn current_standings(pool: &SqlitePool, tournament_id: i64) -> Result<Vec<StandingRow>> {
    let rows = sqlx::query_as::<_, StandingRow>(&format!(
        "SELECT {STANDING_COLUMNS} FROM standings_current WHERE tournament_id = ? ORDER BY position, team_name"
    ))
    .bind(tournament_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Insert a run and, when applied, replace the snapshot with `rows`
/// (upsert by team, delete `removed`) and append the audit rows.
/// Everything commits together or not at all.
pub async fn record_run(
    pool: &SqlitePool,
    run: &NewRun<'_>,
    rows: &[StandingRow],
    removed: &[String],
) -> Result<StandingsRun> {
    let mut tx = pool.begin().await?;
    let rows_count = rows.len() as i64;

    let run_id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO standings_runs (
            tournament_id, team_id, source_url, title, action,
            rows_count, changed_count, created_by, created_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        RETURNING id
        "#,
    )
    .bind(run.tournament_id)
    .bind(run.team_id)
    .bind(run.source_url)
    .bind(run.title)
    .bind(run.action)
    .bind(rows_count)
    .bind(run.changed_count)
    .bind(run.created_by)
    .bind(run.created_at)
    .fetch_one(&mut *tx)
    .await?;

    if run.action == RunAction::Applied {
        for row in rows {
            sqlx::query(&format!(
                r#"
                INSERT INTO standings_current (tournament_id, {STANDING_COLUMNS}, updated_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT (tournament_id, team_name) DO UPDATE SET
                    position = excluded.position,
                    played = excluded.played,
                    points = excluded.points,
                    wins = excluded.wins,
                    draws = excluded.draws,
                    losses = excluded.losses,
                    goals_for = excluded.goals_for,
                    goals_against = excluded.goals_against,
                    logo_url = excluded.logo_url,
                    updated_at = excluded.updated_at
                "#
            ))
            .bind(run.tournament_id)
            .bind(&row.team_name)
            .bind(row.position)
            .bind(row.played)
            .bind(row.points)
            .bind(row.wins)
            .bind(row.draws)
            .bind(row.losses)
            .bind(row.goals_for)
            .bind(row.goals_against)
            .bind(&row.logo_url)
            .bind(run.created_at)
            .execute(&mut *tx)
            .await?;

            sqlx::query(&format!(
                "INSERT INTO standings_run_rows (run_id, {STANDING_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
            ))
            .bind(run_id)
            .bind(&row.team_name)
            .bind(row.position)
            .bind(row.played)
            .bind(row.points)
            .bind(row.wins)
            .bind(row.draws)
            .bind(row.losses)
            .bind(row.goals_for)
            .bind(row.goals_against)
            .bind(&row.logo_url)
            .execute(&mut *tx)
            .await?;
        }

        for team in removed {
            sqlx::query("DELETE FROM standings_current WHERE tournament_id = ? AND team_name = ?")
                .bind(run.tournament_id)
                .bind(team)
                .execute(&mut *tx)
                .await?;
        }
    }

    let stored = sqlx::query_as::<_, StandingsRun>("SELECT * FROM standings_runs WHERE id = ?")
        .bind(run_id)
        .fetch_one(&mut *tx)
        .await?;
    tx.commit().await?;
    Ok(stored)
}

pub async fn list_runs(pool: &SqlitePool, tournament_id: i64, limit: i64) -> Result<Vec<StandingsRun>> {
    let runs = sqlx::query_as::<_, StandingsRun>(
        "SELECT * FROM standings_runs WHERE tournament_id = ? ORDER BY created_at DESC, id DESC LIMIT ?",
    )
    .bind(tournament_id)
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(runs)
}

pub async fn get_run(pool: &SqlitePool, run_id: i64) -> Result<Option<StandingsRun>> {
    let run = sqlx::query_as::<_, StandingsRun>("SELECT * FROM standings_runs WHERE id = ?")
        .bind(run_id)
        .fetch_optional(pool)
        .await?;
    Ok(run)
}

pub async fn run_rows(pool: &SqlitePool, run_id: i64) -> Result<Vec<StandingRow>> {
    let rows = sqlx::query_as::<_, StandingRow>(&format!(
        "SELECT {STANDING_COLUMNS} FROM standings_run_rows WHERE run_id = ? ORDER BY position"
    ))
    .bind(run_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Upsert scraped matches by external id. Returns the number of rows written.
pub async fn upsert_matches(pool: &SqlitePool, tournament_id: i64, matches: &[MatchItem], now: i64) -> Result<u64> {
    let mut tx = pool.begin().await?;
    let mut written = 0;
    for m in matches.iter().filter(|m| !m.external_match_id.is_empty()) {
        let res = sqlx::query(
            r#"
            INSERT INTO tournament_matches (
                tournament_id, external_match_id, date_text, time, home_team, away_team,
                league_round_venue, status, start_at, season_label, tab_label, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (tournament_id, external_match_id) DO UPDATE SET
                status = excluded.status,
                start_at = COALESCE(excluded.start_at, tournament_matches.start_at),
                season_label = excluded.season_label,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(tournament_id)
        .bind(&m.external_match_id)
        .bind(&m.date_text)
        .bind(&m.time)
        .bind(&m.home_team)
        .bind(&m.away_team)
        .bind(&m.league_round_venue)
        .bind(&m.status)
        .bind(&m.start_at)
        .bind(&m.season_label)
        .bind(&m.tab_label)
        .bind(now)
        .execute(&mut *tx)
        .await?;
        written += res.rows_affected();
    }
    tx.commit().await?;
    Ok(written)
}

pub async fn count_matches(pool: &SqlitePool, tournament_id: i64) -> Result<i64> {
    let n = sqlx::query_scalar("SELECT COUNT(*) FROM tournament_matches WHERE tournament_id = ?")
        .bind(tournament_id)
        .fetch_one(pool)
        .await?;
    Ok(n)
}
