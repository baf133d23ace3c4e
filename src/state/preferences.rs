use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;

/// Shortest configurable phase duration, in seconds.
pub const MIN_PHASE_SECONDS: u32 = 10;
/// Longest configurable phase duration, in seconds.
pub const MAX_PHASE_SECONDS: u32 = 600;
/// Fewest players a match can hold.
pub const MIN_PLAYERS: usize = 2;
/// Most players a match can hold.
pub const MAX_PLAYERS: usize = 8;

const MAX_ROUNDS_TARGET: u32 = 50;
const MAX_POINTS_TARGET: i32 = 10_000;

/// Win condition of a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MatchMode {
    /// Highest score after a fixed number of rounds wins.
    #[default]
    Rounds,
    /// First to reach a score threshold wins.
    Points,
}

/// Game rules chosen before a match starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GamePreferences {
    /// Number of player slots.
    pub player_count: usize,
    /// Win condition.
    pub mode: MatchMode,
    /// Rounds to play in [`MatchMode::Rounds`].
    pub rounds_target: u32,
    /// Score threshold in [`MatchMode::Points`].
    pub points_target: i32,
    /// Whether rounds are scored at all.
    pub scoring_enabled: bool,
    /// Whether record words go through the remote validator.
    pub validate_record_words: bool,
    /// Strategy phase duration in seconds.
    pub strategy_seconds: u32,
    /// Creation phase duration in seconds.
    pub creation_seconds: u32,
}

impl Default for GamePreferences {
    fn default() -> Self {
        Self {
            player_count: MIN_PLAYERS,
            mode: MatchMode::Rounds,
            rounds_target: 5,
            points_target: 100,
            scoring_enabled: true,
            validate_record_words: false,
            strategy_seconds: 60,
            creation_seconds: 120,
        }
    }
}

impl GamePreferences {
    /// Clamp every numeric field into its supported range.
    pub fn clamped(mut self) -> Self {
        self.player_count = self.player_count.clamp(MIN_PLAYERS, MAX_PLAYERS);
        self.rounds_target = self.rounds_target.clamp(1, MAX_ROUNDS_TARGET);
        self.points_target = self.points_target.clamp(1, MAX_POINTS_TARGET);
        self.strategy_seconds = clamp_phase_seconds(self.strategy_seconds);
        self.creation_seconds = clamp_phase_seconds(self.creation_seconds);
        self
    }

    /// Shallow-merge `patch` over these preferences, then clamp.
    pub fn merged(mut self, patch: &PreferencesPatch) -> Self {
        if let Some(value) = patch.player_count {
            self.player_count = value;
        }
        if let Some(value) = patch.mode {
            self.mode = value;
        }
        if let Some(value) = patch.rounds_target {
            self.rounds_target = value;
        }
        if let Some(value) = patch.points_target {
            self.points_target = value;
        }
        if let Some(value) = patch.scoring_enabled {
            self.scoring_enabled = value;
        }
        if let Some(value) = patch.validate_record_words {
            self.validate_record_words = value;
        }
        if let Some(value) = patch.strategy_seconds {
            self.strategy_seconds = value;
        }
        if let Some(value) = patch.creation_seconds {
            self.creation_seconds = value;
        }
        self.clamped()
    }
}

/// Partial update of [`GamePreferences`]; absent fields keep their value.
#[skip_serializing_none]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreferencesPatch {
    /// New number of player slots.
    pub player_count: Option<usize>,
    /// New win condition.
    pub mode: Option<MatchMode>,
    /// New rounds target.
    pub rounds_target: Option<u32>,
    /// New points target.
    pub points_target: Option<i32>,
    /// Toggle scoring.
    pub scoring_enabled: Option<bool>,
    /// Toggle record-word validation.
    pub validate_record_words: Option<bool>,
    /// New strategy duration in seconds.
    pub strategy_seconds: Option<u32>,
    /// New creation duration in seconds.
    pub creation_seconds: Option<u32>,
}

impl From<GamePreferences> for PreferencesPatch {
    fn from(value: GamePreferences) -> Self {
        Self {
            player_count: Some(value.player_count),
            mode: Some(value.mode),
            rounds_target: Some(value.rounds_target),
            points_target: Some(value.points_target),
            scoring_enabled: Some(value.scoring_enabled),
            validate_record_words: Some(value.validate_record_words),
            strategy_seconds: Some(value.strategy_seconds),
            creation_seconds: Some(value.creation_seconds),
        }
    }
}

/// Application settings that outlive individual matches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    /// Language code forwarded to the word validator.
    pub language: String,
    /// Whether timer sounds are played by the presentation layer.
    pub sound_enabled: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            language: "en".into(),
            sound_enabled: true,
        }
    }
}

impl Settings {
    /// Shallow-merge `patch` over these settings.
    pub fn merged(mut self, patch: &SettingsPatch) -> Self {
        if let Some(language) = patch.language.as_deref() {
            let language = language.trim();
            if !language.is_empty() {
                self.language = language.to_lowercase();
            }
        }
        if let Some(value) = patch.sound_enabled {
            self.sound_enabled = value;
        }
        self
    }
}

/// Partial update of [`Settings`].
#[skip_serializing_none]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsPatch {
    /// New language code.
    pub language: Option<String>,
    /// Toggle sounds.
    pub sound_enabled: Option<bool>,
}

/// Clamp a phase duration into `[MIN_PHASE_SECONDS, MAX_PHASE_SECONDS]`.
pub fn clamp_phase_seconds(seconds: u32) -> u32 {
    seconds.clamp(MIN_PHASE_SECONDS, MAX_PHASE_SECONDS)
}
