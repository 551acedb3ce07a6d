use sha1::{Digest, Sha1};

use crate::dates::parse_date_text_to_iso;
use crate::text::normalize_space;
use crate::types::MatchItem;

/// Deterministic identity string of a match: start time, both teams, the
/// league/round/venue descriptor and the source tab, pipe-joined and normalized.
pub fn stable_key_for_match(m: &MatchItem) -> String {
    let parts = [
        m.start_at.as_deref().unwrap_or(""),
        m.home_team.as_str(),
        m.away_team.as_str(),
        m.league_round_venue.as_str(),
        m.tab_label.as_deref().unwrap_or(""),
    ];
    normalize_space(&parts.join("|")).to_lowercase()
}

/// Lowercase hex SHA-1 (40 chars).
pub fn sha1_hex(input: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(input.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Resolve `start_at` from the match's own date text (when not already set)
/// and stamp the content hash as `external_match_id`.
pub fn assign_external_id(m: &mut MatchItem, season_label: Option<&str>) {
    if m.start_at.is_none() {
        m.start_at = parse_date_text_to_iso(&m.date_text, &m.time, season_label);
    }
    if m.season_label.is_none() {
        m.season_label = season_label.map(str::to_string);
    }
    m.external_match_id = sha1_hex(&stable_key_for_match(m));
}
