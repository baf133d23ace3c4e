//! Round score input and winner determination.

use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value;

use crate::state::{game::MatchState, preferences::MatchMode};

/// Points awarded per player for one round, keyed by player id.
///
/// Built from loosely typed input: anything that is not a number (or a
/// numeric string) counts as zero so a corrupt entry never blocks a round.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ScoreSheet(IndexMap<String, i32>);

impl ScoreSheet {
    /// Empty sheet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Coerce a JSON object of `{playerId: points}` into a sheet.
    ///
    /// Non-object input yields an empty sheet.
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Object(map) => map
                .iter()
                .map(|(id, points)| (id.clone(), coerce_points(points)))
                .collect(),
            _ => Self::default(),
        }
    }

    /// Set the points of a player.
    pub fn insert(&mut self, player_id: impl Into<String>, points: i32) {
        self.0.insert(player_id.into(), points);
    }

    /// Points for `player_id`, zero when absent.
    pub fn points_for(&self, player_id: &str) -> i32 {
        self.0.get(player_id).copied().unwrap_or(0)
    }

    /// Whether the sheet names `player_id`.
    pub fn contains(&self, player_id: &str) -> bool {
        self.0.contains_key(player_id)
    }

    /// True when no player is named.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>> FromIterator<(K, i32)> for ScoreSheet {
    fn from_iter<I: IntoIterator<Item = (K, i32)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(id, points)| (id.into(), points)).collect())
    }
}

impl<K: Into<String>, const N: usize> From<[(K, i32); N]> for ScoreSheet {
    fn from(entries: [(K, i32); N]) -> Self {
        entries.into_iter().collect()
    }
}

impl From<Value> for ScoreSheet {
    fn from(value: Value) -> Self {
        Self::from_json(&value)
    }
}

/// Turn an arbitrary JSON value into round points.
///
/// Integers pass through, floats are truncated, numeric strings are parsed and
/// everything else is zero. Results saturate at the `i32` bounds.
pub fn coerce_points(value: &Value) -> i32 {
    let raw = match value {
        Value::Number(number) => number
            .as_i64()
            .map(|n| n as f64)
            .or_else(|| number.as_f64()),
        Value::String(text) => text.trim().parse::<f64>().ok(),
        _ => None,
    };

    match raw {
        Some(n) if n.is_finite() => n.trunc().clamp(i32::MIN as f64, i32::MAX as f64) as i32,
        _ => 0,
    }
}

/// Result of checking the win condition after a scored round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoundOutcome {
    /// Exactly one player satisfies the win condition.
    Winner(String),
    /// Several players satisfy it at once; the caller must decide.
    Tie(Vec<String>),
    /// Nobody has won yet.
    Continue,
}

/// Apply the win condition of the match to the current scores.
///
/// Only the participant set counts: the tie-break roster while a tie-break is
/// active, every player otherwise.
pub fn evaluate_outcome(state: &MatchState) -> RoundOutcome {
    let Some(top_score) = state.participants().map(|player| player.score).max() else {
        return RoundOutcome::Continue;
    };

    let top_players = state
        .participants()
        .filter(|player| player.score == top_score);

    let winners: Vec<String> = match state.effective_mode() {
        MatchMode::Points => {
            let target = state.effective_points_target();
            let any_qualified = state.participants().any(|player| player.score >= target);
            if !any_qualified {
                return RoundOutcome::Continue;
            }
            top_players
                .filter(|player| player.score >= target)
                .map(|player| player.id.clone())
                .collect()
        }
        MatchMode::Rounds => {
            let decided = state.tie_break.is_some()
                || state.round >= state.effective_rounds_target();
            if !decided {
                return RoundOutcome::Continue;
            }
            top_players.map(|player| player.id.clone()).collect()
        }
    };

    match winners.len() {
        0 => RoundOutcome::Continue,
        1 => RoundOutcome::Winner(winners.into_iter().next().unwrap_or_default()),
        _ => RoundOutcome::Tie(winners),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::{
        config::AppConfig,
        state::{game::TieBreak, preferences::GamePreferences},
    };

    fn state_with_scores(mode: MatchMode, round: u32, scores: &[i32]) -> MatchState {
        let prefs = GamePreferences {
            player_count: scores.len(),
            mode,
            rounds_target: 3,
            points_target: 100,
            ..GamePreferences::default()
        };
        let mut state = MatchState::from_preferences(&prefs, &[], &AppConfig::default());
        state.round = round;
        for (player, score) in state.players.iter_mut().zip(scores) {
            player.push_round(1, *score, false);
        }
        state
    }

    #[test]
    fn coerce_points_handles_loose_input() {
        assert_eq!(coerce_points(&json!(12)), 12);
        assert_eq!(coerce_points(&json!(-3)), -3);
        assert_eq!(coerce_points(&json!(7.9)), 7);
        assert_eq!(coerce_points(&json!(" 15 ")), 15);
        assert_eq!(coerce_points(&json!("abc")), 0);
        assert_eq!(coerce_points(&json!(null)), 0);
        assert_eq!(coerce_points(&json!(true)), 0);
        assert_eq!(coerce_points(&json!([1])), 0);
        assert_eq!(coerce_points(&json!(1e12)), i32::MAX);
    }

    #[test]
    fn sheet_from_json_coerces_every_entry() {
        let sheet = ScoreSheet::from(json!({ "p1": "10", "p2": "oops", "p3": 4 }));
        assert_eq!(sheet.points_for("p1"), 10);
        assert_eq!(sheet.points_for("p2"), 0);
        assert_eq!(sheet.points_for("p3"), 4);
        assert_eq!(sheet.points_for("p9"), 0);
        assert!(ScoreSheet::from(json!("nope")).is_empty());
    }

    #[test]
    fn rounds_mode_waits_for_target() {
        let state = state_with_scores(MatchMode::Rounds, 2, &[30, 10]);
        assert_eq!(evaluate_outcome(&state), RoundOutcome::Continue);

        let state = state_with_scores(MatchMode::Rounds, 3, &[30, 10]);
        assert_eq!(evaluate_outcome(&state), RoundOutcome::Winner("p1".into()));
    }

    #[test]
    fn rounds_mode_reports_ties_at_target() {
        let state = state_with_scores(MatchMode::Rounds, 3, &[20, 20, 5]);
        assert_eq!(
            evaluate_outcome(&state),
            RoundOutcome::Tie(vec!["p1".into(), "p2".into()])
        );
    }

    #[test]
    fn points_mode_picks_top_qualified_player() {
        let state = state_with_scores(MatchMode::Points, 1, &[120, 105, 50]);
        assert_eq!(evaluate_outcome(&state), RoundOutcome::Winner("p1".into()));

        let state = state_with_scores(MatchMode::Points, 1, &[99, 50]);
        assert_eq!(evaluate_outcome(&state), RoundOutcome::Continue);
    }

    #[test]
    fn tie_break_only_counts_roster_and_ignores_round_target() {
        let mut state = state_with_scores(MatchMode::Rounds, 1, &[40, 30, 30]);
        state.tie_break = Some(TieBreak {
            players: vec!["p2".into(), "p3".into()],
            index: 1,
        });
        state.players[1].push_round(2, 5, true);

        assert_eq!(evaluate_outcome(&state), RoundOutcome::Winner("p2".into()));
    }
}
