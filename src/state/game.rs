use std::{collections::HashSet, time::SystemTime};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::{
    config::AppConfig,
    state::{
        phase::{Phase, PhaseKind, PhaseStatus},
        preferences::{
            GamePreferences, MAX_PLAYERS, MIN_PLAYERS, MatchMode, clamp_phase_seconds,
        },
    },
};

/// Persisted keys that may legitimately hold `null`.
const NULLABLE_KEYS: [&str; 4] = ["matchId", "tieBreak", "tieBreakPending", "preferencesRef"];
const ABBREV_LEN: usize = 3;

/// Points a player earned in one round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RoundEntry {
    /// Round number the points belong to.
    pub round: u32,
    /// Points earned (may be negative).
    pub points: i32,
    /// Whether the round was a tie-break decider.
    pub tie_break: bool,
}

/// Player info tracked during a match.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Player {
    /// Stable slot identifier (`p1`..`p8`).
    pub id: String,
    /// Display name.
    pub name: String,
    /// Upper-cased short label derived from the name.
    pub abbrev: String,
    /// Palette color, unique among the roster.
    pub color: String,
    /// Running total; always the sum of `rounds[].points`.
    pub score: i32,
    /// One entry per round the player took part in, ordered by round.
    pub rounds: Vec<RoundEntry>,
}

impl Player {
    /// Build a player with no score history.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        let mut player = Self {
            id: id.into(),
            name: name.into(),
            ..Self::default()
        };
        player.abbrev = derive_abbrev(&player.name, &player.id);
        player
    }

    /// Recompute `score` from the round history, saturating at the `i32` bounds.
    pub fn recompute_score(&mut self) {
        self.score = self
            .rounds
            .iter()
            .map(|entry| entry.points)
            .fold(0, i32::saturating_add);
    }

    /// Append the points of a freshly played round.
    pub fn push_round(&mut self, round: u32, points: i32, tie_break: bool) {
        self.rounds.push(RoundEntry {
            round,
            points,
            tie_break,
        });
        self.recompute_score();
    }

    /// Overwrite the points of `round`, inserting the entry in order when missing.
    pub fn set_round_points(&mut self, round: u32, points: i32) {
        match self.rounds.iter_mut().find(|entry| entry.round == round) {
            Some(entry) => entry.points = points,
            None => {
                let at = self.rounds.partition_point(|entry| entry.round < round);
                self.rounds.insert(
                    at,
                    RoundEntry {
                        round,
                        points,
                        tie_break: false,
                    },
                );
            }
        }
        self.recompute_score();
    }

    /// Forget every score recorded so far.
    pub fn clear_history(&mut self) {
        self.rounds.clear();
        self.score = 0;
    }
}

/// Active tie-break sub-match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TieBreak {
    /// Players allowed to score during the tie-break.
    pub players: Vec<String>,
    /// 1-based counter across cascading tie-breaks.
    pub index: u32,
}

/// Tied outcome waiting for the caller to either share the win or play a decider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TieBreakPending {
    /// Players sharing the winning position.
    pub players: Vec<String>,
    /// Mode the tie was computed in.
    pub mode: MatchMode,
}

/// Root aggregate of a running match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchState {
    /// Fresh identifier generated on every match start.
    pub match_id: Option<Uuid>,
    /// False only before the first start.
    pub is_active: bool,
    /// Current round number, starting at 1.
    pub round: u32,
    /// Current phase.
    pub phase: Phase,
    /// Seconds left in the current timed phase.
    pub remaining: u32,
    /// Win condition.
    pub mode: MatchMode,
    /// Rounds to play in [`MatchMode::Rounds`].
    pub rounds_target: u32,
    /// Score threshold in [`MatchMode::Points`].
    pub points_target: i32,
    /// Whether rounds are scored.
    pub scoring_enabled: bool,
    /// Whether record words go through the remote validator.
    pub validate_record_words: bool,
    /// Strategy phase duration in seconds.
    pub strategy_seconds: u32,
    /// Creation phase duration in seconds.
    pub creation_seconds: u32,
    /// Roster in display order.
    pub players: Vec<Player>,
    /// Restricted sub-match in progress, if any.
    pub tie_break: Option<TieBreak>,
    /// Tied outcome awaiting an external decision.
    pub tie_break_pending: Option<TieBreakPending>,
    /// Winners, filled only once the match is over.
    pub winner_ids: Vec<String>,
    /// Terminal flag.
    pub match_over: bool,
    /// Preferences the match was started from.
    pub preferences_ref: Option<GamePreferences>,
    /// Last mutation time.
    pub updated_at: SystemTime,
}

impl MatchState {
    /// Build an inactive match in the `config` phase from preferences.
    ///
    /// `names` seeds the player names slot by slot; missing entries get a
    /// numbered default.
    pub fn from_preferences(
        preferences: &GamePreferences,
        names: &[String],
        config: &AppConfig,
    ) -> Self {
        let preferences = preferences.clone().clamped();
        let players = (0..preferences.player_count)
            .map(|index| {
                let name = names
                    .get(index)
                    .map(|name| name.trim())
                    .filter(|name| !name.is_empty())
                    .map(str::to_string)
                    .unwrap_or_else(|| default_player_name(index));
                Player::new(slot_id(index), name)
            })
            .collect();

        let mut state = Self {
            match_id: None,
            is_active: false,
            round: 1,
            phase: Phase::Config,
            remaining: preferences.strategy_seconds,
            mode: preferences.mode,
            rounds_target: preferences.rounds_target,
            points_target: preferences.points_target,
            scoring_enabled: preferences.scoring_enabled,
            validate_record_words: preferences.validate_record_words,
            strategy_seconds: preferences.strategy_seconds,
            creation_seconds: preferences.creation_seconds,
            players,
            tie_break: None,
            tie_break_pending: None,
            winner_ids: Vec::new(),
            match_over: false,
            preferences_ref: None,
            updated_at: SystemTime::now(),
        };
        assign_colors(&mut state.players, config);
        state
    }

    /// Rebuild a persisted match, backfilling every missing key from `defaults`.
    ///
    /// Present values are never overwritten; `null` only survives for
    /// nullable fields. The result is normalized before being returned.
    pub fn hydrate(
        raw: Value,
        defaults: &MatchState,
        config: &AppConfig,
    ) -> Result<Self, serde_json::Error> {
        let mut merged = serde_json::to_value(defaults)?;
        if let (Value::Object(target), Value::Object(source)) = (&mut merged, raw) {
            for (key, value) in source {
                if value.is_null() && !NULLABLE_KEYS.contains(&key.as_str()) {
                    continue;
                }
                target.insert(key, value);
            }
        }

        let mut state: MatchState = serde_json::from_value(merged)?;
        state.normalize(config);
        Ok(state)
    }

    /// Re-derive computed fields and repair inconsistent values.
    pub fn normalize(&mut self, config: &AppConfig) {
        self.players.truncate(MAX_PLAYERS);
        while self.players.len() < MIN_PLAYERS {
            let index = self.players.len();
            self.players
                .push(Player::new(slot_id(index), default_player_name(index)));
        }

        let mut seen = HashSet::new();
        for (index, player) in self.players.iter_mut().enumerate() {
            if player.id.trim().is_empty() || !seen.insert(player.id.clone()) {
                player.id = slot_id(index);
                seen.insert(player.id.clone());
            }
            if player.name.trim().is_empty() {
                player.name = default_player_name(index);
            }
            player.abbrev = derive_abbrev(&player.name, &player.id);
            player.rounds.sort_by_key(|entry| entry.round);
            player.recompute_score();
        }
        assign_colors(&mut self.players, config);

        self.strategy_seconds = clamp_phase_seconds(self.strategy_seconds);
        self.creation_seconds = clamp_phase_seconds(self.creation_seconds);
        self.round = self.round.max(1);

        if let Phase::Round { kind, status } = self.phase {
            if status == PhaseStatus::Running {
                self.phase = Phase::round(kind, PhaseStatus::Paused);
            }
            self.remaining = match status {
                PhaseStatus::Timeup => 0,
                _ => self.remaining.min(self.duration(kind)),
            };
        }

        let known: HashSet<String> = self.players.iter().map(|p| p.id.clone()).collect();
        self.winner_ids.retain(|id| known.contains(id));
        if let Some(tie_break) = self.tie_break.as_mut() {
            tie_break.players.retain(|id| known.contains(id));
        }
        if let Some(pending) = self.tie_break_pending.as_mut() {
            pending.players.retain(|id| known.contains(id));
        }

        if self.match_over || self.phase == Phase::Done {
            self.match_over = true;
            self.phase = Phase::Done;
            self.remaining = 0;
        }
    }

    /// Configured duration of a phase kind, in seconds.
    pub fn duration(&self, kind: PhaseKind) -> u32 {
        match kind {
            PhaseKind::Strategy => self.strategy_seconds,
            PhaseKind::Creation => self.creation_seconds,
        }
    }

    /// Win condition, read from the preferences the match started with.
    pub fn effective_mode(&self) -> MatchMode {
        self.preferences_ref
            .as_ref()
            .map_or(self.mode, |prefs| prefs.mode)
    }

    /// Rounds target, read from the preferences the match started with.
    pub fn effective_rounds_target(&self) -> u32 {
        self.preferences_ref
            .as_ref()
            .map_or(self.rounds_target, |prefs| prefs.rounds_target)
    }

    /// Points target, read from the preferences the match started with.
    pub fn effective_points_target(&self) -> i32 {
        self.preferences_ref
            .as_ref()
            .map_or(self.points_target, |prefs| prefs.points_target)
    }

    /// Whether `player_id` scores in the current round.
    pub fn is_participant(&self, player_id: &str) -> bool {
        match &self.tie_break {
            Some(tie_break) => tie_break.players.iter().any(|id| id == player_id),
            None => true,
        }
    }

    /// Players whose score counts for the current round.
    pub fn participants(&self) -> impl Iterator<Item = &Player> {
        self.players
            .iter()
            .filter(|player| self.is_participant(&player.id))
    }

    /// Player with the given slot id.
    pub fn player(&self, id: &str) -> Option<&Player> {
        self.players.iter().find(|player| player.id == id)
    }

    /// Stamp the mutation time.
    pub fn touch(&mut self) {
        self.updated_at = SystemTime::now();
    }
}

/// Slot identifier for the player at `index`.
pub fn slot_id(index: usize) -> String {
    format!("p{}", index + 1)
}

/// Name used when a slot has no name.
pub fn default_player_name(index: usize) -> String {
    format!("Player {}", index + 1)
}

/// First three characters of the trimmed name, upper-cased.
pub fn derive_abbrev(name: &str, fallback: &str) -> String {
    let source = match name.trim() {
        "" => fallback,
        trimmed => trimmed,
    };
    source
        .chars()
        .take(ABBREV_LEN)
        .collect::<String>()
        .to_uppercase()
}

/// Give every player a color that no earlier player already holds.
///
/// A player keeps a color it already owns; otherwise the slot's palette
/// entry is used, falling back to the first unused one.
pub fn assign_colors(players: &mut [Player], config: &AppConfig) {
    let mut used: Vec<String> = Vec::with_capacity(players.len());
    for (index, player) in players.iter_mut().enumerate() {
        let keep = !player.color.is_empty() && !used.contains(&player.color);
        if !keep {
            player.color = config.color_for_slot(index, &used);
        }
        used.push(player.color.clone());
    }
}
