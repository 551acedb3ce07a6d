//! Standings preview/apply and match import, gated by team role and
//! tournament link.
//!
//! A preview fetches and parses the tournament page, diffs it against the
//! stored snapshot and parks the result in memory. Nothing is written until
//! the caller applies (or explicitly skips) that preview.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use serde::Serialize;
use sqlx::SqlitePool;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::PREVIEW_TTL_SECS;
use crate::db::models::{NewRun, StandingsRun};
use crate::db::store;
use crate::diff::compute_standings_diff;
use crate::error::{AppError, Result};
use crate::fetch::{HtmlClient, HtmlSource};
use crate::import::{fetch_and_parse_all_tabs, MultiTabOptions};
use crate::match_key::sha1_hex;
use crate::parse::standings::{parse_standings_from_html_dom, parse_standings_with_format, StandingsFormat};
use crate::types::{
    Caller, DiffKind, MultiTabResult, Role, RunAction, StandingRow, StandingsDiff, TournamentInfo,
};

#[derive(Debug, Clone, Serialize)]
pub struct StandingsPreview {
    pub preview_id: String,
    pub tournament: TournamentInfo,
    pub team_id: i64,
    pub title: String,
    pub source_url: String,
    pub diff: StandingsDiff,
    pub created_at: i64,
}

struct PendingPreview {
    preview: StandingsPreview,
    rows: Vec<StandingRow>,
}

pub struct StandingsWorkflow<S: HtmlSource = HtmlClient> {
    pool: SqlitePool,
    source: Arc<S>,
    previews: DashMap<String, PendingPreview>,
    tab_rate_limit_ms: u64,
    seq: AtomicU64,
}

impl<S: HtmlSource> StandingsWorkflow<S> {
    pub fn new(pool: SqlitePool, source: Arc<S>, tab_rate_limit_ms: u64) -> Self {
        Self {
            pool,
            source,
            previews: DashMap::new(),
            tab_rate_limit_ms,
            seq: AtomicU64::new(0),
        }
    }

    pub fn pending_previews(&self) -> usize {
        self.previews.len()
    }

    async fn require_write(&self, caller: &Caller) -> Result<Role> {
        match store::member_role(&self.pool, caller.team_id, &caller.user_id).await? {
            Some(role) if role.can_write() => Ok(role),
            Some(_) => Err(AppError::Forbidden(format!(
                "user {} cannot modify tournaments of team {}",
                caller.user_id, caller.team_id
            ))),
            None => Err(AppError::Forbidden(format!(
                "user {} is not a member of team {}",
                caller.user_id, caller.team_id
            ))),
        }
    }

    async fn require_link(&self, caller: &Caller, tournament_id: i64) -> Result<()> {
        if store::is_linked(&self.pool, tournament_id, caller.team_id).await? {
            Ok(())
        } else {
            Err(AppError::NotLinked(tournament_id))
        }
    }

    async fn load_tournament(&self, tournament_id: i64) -> Result<TournamentInfo> {
        store::tournament(&self.pool, tournament_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("tournament {tournament_id}")))
    }

    fn external_url(tournament: &TournamentInfo) -> Result<String> {
        tournament
            .external_url
            .clone()
            .filter(|u| !u.trim().is_empty())
            .ok_or_else(|| AppError::BadRequest(format!("tournament {} has no external url", tournament.id)))
    }

    pub async fn link_tournament(&self, caller: &Caller, tournament_id: i64) -> Result<bool> {
        self.require_write(caller).await?;
        self.load_tournament(tournament_id).await?;
        let created = store::link_tournament(&self.pool, tournament_id, caller.team_id, Utc::now().timestamp()).await?;
        info!(tournament_id, team_id = caller.team_id, created, "tournament linked");
        Ok(created)
    }

    /// Fetch, parse and diff without writing anything. Without a `format`
    /// hint the parser is picked from the tournament URL's host.
    pub async fn preview(
        &self,
        caller: &Caller,
        tournament_id: i64,
        format: Option<StandingsFormat>,
        cancel: &CancellationToken,
    ) -> Result<StandingsPreview> {
        self.require_write(caller).await?;
        self.require_link(caller, tournament_id).await?;
        let tournament = self.load_tournament(tournament_id).await?;
        let source_url = Self::external_url(&tournament)?;
        let team_query = store::team_name(&self.pool, caller.team_id).await?;

        let html = self.source.fetch_html(&source_url, cancel).await?;
        let parsed = match format {
            Some(format) => parse_standings_with_format(&html, Some(&source_url), team_query.as_deref(), format),
            None => parse_standings_from_html_dom(&html, Some(&source_url), team_query.as_deref()),
        };
        if parsed.rows.is_empty() {
            return Err(AppError::BadRequest(format!("no standings rows found at {source_url}")));
        }

        let current = store::current_standings(&self.pool, tournament_id).await?;
        let diff = compute_standings_diff(&current, &parsed.rows);

        let created_at = Utc::now().timestamp();
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let preview_id = sha1_hex(&format!(
            "{tournament_id}|{}|{}|{}|{seq}",
            caller.team_id,
            caller.user_id,
            Utc::now().timestamp_nanos_opt().unwrap_or_default()
        ));

        let preview = StandingsPreview {
            preview_id: preview_id.clone(),
            tournament,
            team_id: caller.team_id,
            title: parsed.title,
            source_url,
            diff,
            created_at,
        };

        self.previews
            .retain(|_, p| created_at - p.preview.created_at <= PREVIEW_TTL_SECS);
        self.previews.insert(
            preview_id.clone(),
            PendingPreview {
                preview: preview.clone(),
                rows: parsed.rows,
            },
        );
        info!(
            tournament_id,
            preview_id = %preview_id,
            rows = preview.diff.rows.len(),
            changed = preview.diff.changed_count,
            "standings preview ready"
        );
        Ok(preview)
    }

    /// Record the caller's decision on a pending preview. `Applied` writes the
    /// snapshot and audit rows together with the run; `Skipped` only logs the run.
    pub async fn apply(&self, caller: &Caller, preview_id: &str, action: RunAction) -> Result<StandingsRun> {
        self.require_write(caller).await?;

        let Some((_, pending)) = self
            .previews
            .remove_if(preview_id, |_, p| p.preview.team_id == caller.team_id)
        else {
            return Err(if self.previews.contains_key(preview_id) {
                AppError::Forbidden(format!("preview {preview_id} belongs to another team"))
            } else {
                AppError::NotFound(format!("preview {preview_id}"))
            });
        };

        let now = Utc::now().timestamp();
        if now - pending.preview.created_at > PREVIEW_TTL_SECS {
            return Err(AppError::NotFound(format!("preview {preview_id} expired")));
        }

        let preview = &pending.preview;
        let removed: Vec<String> = preview
            .diff
            .rows
            .iter()
            .filter(|r| r.kind == DiffKind::Removed)
            .map(|r| r.team_name.clone())
            .collect();
        let run = NewRun {
            tournament_id: preview.tournament.id,
            team_id: caller.team_id,
            source_url: &preview.source_url,
            title: &preview.title,
            action,
            changed_count: preview.diff.changed_count as i64,
            created_by: &caller.user_id,
            created_at: now,
        };

        match store::record_run(&self.pool, &run, &pending.rows, &removed).await {
            Ok(stored) => {
                info!(
                    run_id = stored.id,
                    tournament_id = stored.tournament_id,
                    action = %action,
                    rows = stored.rows_count,
                    removed = removed.len(),
                    "standings run recorded"
                );
                Ok(stored)
            }
            Err(e) => {
                warn!(preview_id, error = %e, "standings apply failed, preview kept");
                self.previews.insert(preview_id.to_string(), pending);
                Err(e)
            }
        }
    }

    pub async fn current_standings(&self, caller: &Caller, tournament_id: i64) -> Result<Vec<StandingRow>> {
        self.require_link(caller, tournament_id).await?;
        store::current_standings(&self.pool, tournament_id).await
    }

    pub async fn list_runs(&self, caller: &Caller, tournament_id: i64, limit: i64) -> Result<Vec<StandingsRun>> {
        self.require_link(caller, tournament_id).await?;
        store::list_runs(&self.pool, tournament_id, limit).await
    }

    /// Audit rows of one applied run.
    pub async fn run_rows(&self, caller: &Caller, run_id: i64) -> Result<Vec<StandingRow>> {
        let run = store::get_run(&self.pool, run_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("run {run_id}")))?;
        self.require_link(caller, run.tournament_id).await?;
        store::run_rows(&self.pool, run_id).await
    }

    /// Multi-tab calendar import over the tournament's external page;
    /// matches are upserted by external id.
    pub async fn import_matches(&self, caller: &Caller, tournament_id: i64, cancel: &CancellationToken) -> Result<MultiTabResult> {
        self.require_write(caller).await?;
        self.require_link(caller, tournament_id).await?;
        let tournament = self.load_tournament(tournament_id).await?;
        let url = Self::external_url(&tournament)?;
        let team_query = store::team_name(&self.pool, caller.team_id).await?;

        let tabs_html = self.source.fetch_html(&url, cancel).await?;
        let opts = MultiTabOptions {
            season_label: tournament.season.clone(),
            our_team_query: team_query,
            rate_limit_ms: self.tab_rate_limit_ms,
            ..MultiTabOptions::new(url)
        };
        let on_progress = |p: crate::types::TabProgress| {
            info!(tournament_id, tab = p.index + 1, total = p.total, label = %p.label, matches = p.matches_so_far, "tab done");
        };
        let result = fetch_and_parse_all_tabs(self.source.as_ref(), &opts, &tabs_html, Some(&on_progress), cancel).await?;

        let written = store::upsert_matches(&self.pool, tournament_id, &result.matches, Utc::now().timestamp()).await?;
        let stored = store::count_matches(&self.pool, tournament_id).await?;
        info!(tournament_id, matches = result.matches.len(), written, stored, "matches imported");
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;
    use std::sync::Mutex;

    struct StaticSource(Mutex<String>);

    impl StaticSource {
        fn set(&self, html: &str) {
            *self.0.lock().unwrap() = html.to_string();
        }
    }

    impl HtmlSource for StaticSource {
        async fn fetch_html(&self, _url: &str, _cancel: &CancellationToken) -> Result<String> {
            Ok(self.0.lock().unwrap().clone())
        }
    }

    fn table(rows: &[(i64, &str, i64)]) -> String {
        let body: String = rows
            .iter()
            .map(|(pos, team, pts)| format!("<tr><td>{pos}</td><td>{team}</td><td>5</td><td>{pts}</td></tr>"))
            .collect();
        format!(
            "<html><head><title>Ліга</title></head><body><table>\
             <tr><th>#</th><th>Команда</th><th>І</th><th>О</th></tr>{body}</table></body></html>"
        )
    }

    async fn setup() -> (StandingsWorkflow<StaticSource>, Arc<StaticSource>, SqlitePool) {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        for sql in [
            "INSERT INTO teams (id, name) VALUES (1, 'Наші'), (2, 'Інші')",
            "INSERT INTO team_members (team_id, user_id, role) VALUES (1, 'boss', 'manager'), (1, 'fan', 'member'), (2, 'rival', 'owner')",
            "INSERT INTO tournaments (id, name, external_url, season) VALUES (10, 'Ліга', 'https://example.com/t/10', '2025/26')",
        ] {
            sqlx::query(sql).execute(&pool).await.unwrap();
        }
        let source = Arc::new(StaticSource(Mutex::new(table(&[(1, "Наші", 9), (2, "Сусіди", 6)]))));
        let wf = StandingsWorkflow::new(pool.clone(), Arc::clone(&source), 0);
        (wf, source, pool)
    }

    fn caller(user: &str, team: i64) -> Caller {
        Caller {
            user_id: user.to_string(),
            team_id: team,
        }
    }

    #[tokio::test]
    async fn member_role_cannot_preview() {
        let (wf, _, _) = setup().await;
        let err = wf.preview(&caller("fan", 1), 10, None, &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));
        let err = wf.preview(&caller("stranger", 1), 10, None, &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));
    }

    #[tokio::test]
    async fn unlinked_tournament_is_rejected() {
        let (wf, _, _) = setup().await;
        let err = wf.preview(&caller("boss", 1), 10, None, &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, AppError::NotLinked(10)));
    }

    #[tokio::test]
    async fn preview_then_apply_writes_snapshot_and_history() {
        let (wf, _, pool) = setup().await;
        let boss = caller("boss", 1);
        assert!(wf.link_tournament(&boss, 10).await.unwrap());
        assert!(!wf.link_tournament(&boss, 10).await.unwrap());

        let preview = wf.preview(&boss, 10, None, &CancellationToken::new()).await.unwrap();
        assert_eq!(preview.title, "Ліга");
        assert_eq!(preview.diff.changed_count, 2);
        assert!(preview.diff.rows.iter().all(|r| r.kind == DiffKind::New));
        assert_eq!(preview.preview_id.len(), 40);
        assert!(wf.current_standings(&boss, 10).await.unwrap().is_empty());

        let run = wf.apply(&boss, &preview.preview_id, RunAction::Applied).await.unwrap();
        assert_eq!(run.action, RunAction::Applied);
        assert_eq!(run.rows_count, 2);
        assert_eq!(run.created_by, "boss");

        let snapshot = wf.current_standings(&boss, 10).await.unwrap();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].team_name, "Наші");
        assert_eq!(snapshot[0].points, Some(9));
        assert_eq!(wf.run_rows(&boss, run.id).await.unwrap().len(), 2);
        assert_eq!(wf.pending_previews(), 0);

        let err = wf.apply(&boss, &preview.preview_id, RunAction::Applied).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn skipped_run_leaves_snapshot_untouched() {
        let (wf, source, pool) = setup().await;
        let boss = caller("boss", 1);
        wf.link_tournament(&boss, 10).await.unwrap();
        let first = wf.preview(&boss, 10, None, &CancellationToken::new()).await.unwrap();
        wf.apply(&boss, &first.preview_id, RunAction::Applied).await.unwrap();

        source.set(&table(&[(1, "Сусіди", 9), (2, "Наші", 7)]));
        let second = wf.preview(&boss, 10, None, &CancellationToken::new()).await.unwrap();
        assert_eq!(second.diff.changed_count, 2);
        let run = wf.apply(&boss, &second.preview_id, RunAction::Skipped).await.unwrap();
        assert_eq!(run.action, RunAction::Skipped);
        assert!(store::run_rows(&pool, run.id).await.unwrap().is_empty());

        let snapshot = wf.current_standings(&boss, 10).await.unwrap();
        assert_eq!(snapshot[0].team_name, "Наші");
        assert_eq!(snapshot[0].position, 1);

        let runs = wf.list_runs(&boss, 10, 10).await.unwrap();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].action, RunAction::Skipped);
    }

    #[tokio::test]
    async fn applied_run_drops_removed_teams() {
        let (wf, source, _) = setup().await;
        let boss = caller("boss", 1);
        wf.link_tournament(&boss, 10).await.unwrap();
        let first = wf.preview(&boss, 10, None, &CancellationToken::new()).await.unwrap();
        wf.apply(&boss, &first.preview_id, RunAction::Applied).await.unwrap();

        source.set(&table(&[(1, "Наші", 12)]));
        let second = wf.preview(&boss, 10, None, &CancellationToken::new()).await.unwrap();
        let kinds: Vec<DiffKind> = second.diff.rows.iter().map(|r| r.kind).collect();
        assert_eq!(kinds, vec![DiffKind::Changed, DiffKind::Removed]);
        wf.apply(&boss, &second.preview_id, RunAction::Applied).await.unwrap();

        let snapshot = wf.current_standings(&boss, 10).await.unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].points, Some(12));
    }

    #[tokio::test]
    async fn other_team_cannot_apply_preview() {
        let (wf, _, pool) = setup().await;
        let boss = caller("boss", 1);
        wf.link_tournament(&boss, 10).await.unwrap();
        store::link_tournament(&pool, 10, 2, 0).await.unwrap();
        let preview = wf.preview(&boss, 10, None, &CancellationToken::new()).await.unwrap();

        let err = wf
            .apply(&caller("rival", 2), &preview.preview_id, RunAction::Applied)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));
        assert_eq!(wf.pending_previews(), 1);
    }

    #[tokio::test]
    async fn empty_parse_is_rejected() {
        let (wf, source, _) = setup().await;
        let boss = caller("boss", 1);
        wf.link_tournament(&boss, 10).await.unwrap();
        source.set("<html><body><p>maintenance</p></body></html>");
        let err = wf.preview(&boss, 10, None, &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
    }

    #[tokio::test]
    async fn import_matches_upserts_by_external_id() {
        let (wf, source, pool) = setup().await;
        let boss = caller("boss", 1);
        wf.link_tournament(&boss, 10).await.unwrap();
        // The same page serves as the tab strip and as every tab.
        source.set(
            r#"<body><nav><a href="?first_day=2025-09-01">1-7 вересня</a></nav>
               <h2>Календар матчів</h2>
               <div class="match-card"><span class="match-card__date">3 вер</span>
               <span class="match-card__time">18:30</span>
               <span class="match-card__team--left">Наші</span>
               <span class="match-card__team--right">Сусіди</span></div></body>"#,
        );
        let result = wf.import_matches(&boss, 10, &CancellationToken::new()).await.unwrap();
        assert_eq!(result.matches.len(), 1);
        assert_eq!(result.our_team_matches, 1);
        assert_eq!(result.season_label.as_deref(), Some("2025/26"));

        wf.import_matches(&boss, 10, &CancellationToken::new()).await.unwrap();
        assert_eq!(store::count_matches(&pool, 10).await.unwrap(), 1);
    }
}
