use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::types::{DiffField, DiffKind, StandingDiffRow, StandingRow, StandingsDiff};

/// Field-level diff of a stored standings snapshot against a freshly parsed one.
///
/// Rows are ordered for review: changed, new, removed, same; then by table
/// position (missing last); then by team name.
pub fn compute_standings_diff(old_rows: &[StandingRow], next_rows: &[StandingRow]) -> StandingsDiff {
    let old_by_team: HashMap<&str, &StandingRow> =
        old_rows.iter().map(|r| (r.team_name.as_str(), r)).collect();
    let next_by_team: HashMap<&str, &StandingRow> =
        next_rows.iter().map(|r| (r.team_name.as_str(), r)).collect();

    let teams: BTreeSet<&str> = old_by_team.keys().chain(next_by_team.keys()).copied().collect();

    let mut rows: Vec<StandingDiffRow> = teams
        .into_iter()
        .map(|team| diff_team(team, old_by_team.get(team).copied(), next_by_team.get(team).copied()))
        .collect();

    rows.sort_by(review_order);

    let changed_count = rows.iter().filter(|r| r.kind != DiffKind::Same).count();
    StandingsDiff { changed_count, rows }
}

fn diff_team(team: &str, old: Option<&StandingRow>, next: Option<&StandingRow>) -> StandingDiffRow {
    let mut changes = BTreeMap::new();
    let kind = match (old, next) {
        (None, Some(n)) => {
            for field in DiffField::SUMMARY {
                if let Some(v) = n.field(field) {
                    changes.insert(field, (None, Some(v)));
                }
            }
            DiffKind::New
        }
        (Some(o), None) => {
            for field in DiffField::SUMMARY {
                if let Some(v) = o.field(field) {
                    changes.insert(field, (Some(v), None));
                }
            }
            DiffKind::Removed
        }
        (Some(o), Some(n)) => {
            for field in DiffField::ALL {
                let (a, b) = (o.field(field), n.field(field));
                if a != b {
                    changes.insert(field, (a, b));
                }
            }
            if changes.is_empty() {
                DiffKind::Same
            } else {
                DiffKind::Changed
            }
        }
        (None, None) => DiffKind::Same,
    };

    StandingDiffRow {
        team_name: team.to_string(),
        old: old.cloned(),
        next: next.cloned(),
        changes,
        kind,
    }
}

fn display_position(row: &StandingDiffRow) -> Option<i64> {
    row.next
        .as_ref()
        .or(row.old.as_ref())
        .map(|r| r.position)
}

fn review_order(a: &StandingDiffRow, b: &StandingDiffRow) -> Ordering {
    a.kind
        .priority()
        .cmp(&b.kind.priority())
        .then_with(|| match (display_position(a), display_position(b)) {
            (Some(x), Some(y)) => x.cmp(&y),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        })
        .then_with(|| compare_names(&a.team_name, &b.team_name))
}

/// Case-insensitive first, byte order as the tie-break so the sort is total.
fn compare_names(a: &str, b: &str) -> Ordering {
    a.to_lowercase()
        .cmp(&b.to_lowercase())
        .then_with(|| a.cmp(b))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(team: &str, position: i64, played: i64, points: i64) -> StandingRow {
        StandingRow {
            played: Some(played),
            points: Some(points),
            ..StandingRow::new(team, position)
        }
    }

    fn table() -> Vec<StandingRow> {
        vec![row("Альфа", 1, 10, 25), row("Бета", 2, 10, 20), row("Гамма", 3, 9, 12)]
    }

    #[test]
    fn identical_sets_are_all_same() {
        let diff = compute_standings_diff(&table(), &table());
        assert_eq!(diff.changed_count, 0);
        assert_eq!(diff.rows.len(), 3);
        assert!(diff.rows.iter().all(|r| r.kind == DiffKind::Same && r.changes.is_empty()));
    }

    #[test]
    fn empty_old_is_all_new() {
        let diff = compute_standings_diff(&[], &table());
        assert_eq!(diff.changed_count, 3);
        assert!(diff.rows.iter().all(|r| r.kind == DiffKind::New && r.old.is_none()));
        let first = &diff.rows[0];
        assert_eq!(first.changes.get(&DiffField::Position), Some(&(None, Some(1))));
        assert_eq!(first.changes.get(&DiffField::Points), Some(&(None, Some(25))));
        assert!(!first.changes.contains_key(&DiffField::Wins));
    }

    #[test]
    fn empty_next_is_all_removed() {
        let diff = compute_standings_diff(&table(), &[]);
        assert_eq!(diff.rows.len(), 3);
        assert!(diff.rows.iter().all(|r| r.kind == DiffKind::Removed && r.next.is_none()));
        assert_eq!(diff.rows[2].changes.get(&DiffField::Played), Some(&(Some(9), None)));
    }

    #[test]
    fn position_swap_only_reports_position() {
        let old = vec![row("A", 1, 10, 20)];
        let next = vec![row("A", 2, 10, 20)];
        let diff = compute_standings_diff(&old, &next);
        let r = &diff.rows[0];
        assert_eq!(r.kind, DiffKind::Changed);
        assert_eq!(r.changes.get(&DiffField::Position), Some(&(Some(1), Some(2))));
        assert!(!r.changes.contains_key(&DiffField::Played));
        assert!(!r.changes.contains_key(&DiffField::Points));
        assert_eq!(diff.changed_count, 1);
    }

    #[test]
    fn missing_stat_on_both_sides_is_not_a_change() {
        let old = vec![StandingRow::new("A", 1)];
        let next = vec![StandingRow::new("A", 1)];
        let diff = compute_standings_diff(&old, &next);
        assert_eq!(diff.rows[0].kind, DiffKind::Same);
    }

    #[test]
    fn review_order_groups_kinds_then_positions() {
        let old = vec![row("Stay", 4, 5, 5), row("Gone", 6, 5, 1), row("Up", 3, 5, 6), row("Down", 2, 5, 7)];
        let next = vec![row("Stay", 4, 5, 5), row("Up", 2, 6, 9), row("Down", 3, 6, 7), row("Fresh", 5, 1, 3)];
        let diff = compute_standings_diff(&old, &next);
        let order: Vec<(&str, DiffKind)> =
            diff.rows.iter().map(|r| (r.team_name.as_str(), r.kind)).collect();
        assert_eq!(
            order,
            vec![
                ("Up", DiffKind::Changed),
                ("Down", DiffKind::Changed),
                ("Fresh", DiffKind::New),
                ("Gone", DiffKind::Removed),
                ("Stay", DiffKind::Same),
            ]
        );
        assert_eq!(diff.changed_count, 4);
    }

    #[test]
    fn equal_positions_fall_back_to_name() {
        let next = vec![row("beta", 1, 1, 1), row("Alpha", 1, 1, 1)];
        let diff = compute_standings_diff(&[], &next);
        assert_eq!(diff.rows[0].team_name, "Alpha");
        assert_eq!(diff.rows[1].team_name, "beta");
    }
}
