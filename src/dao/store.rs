use std::time::SystemTime;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    dao::storage::StorageResult,
    state::{
        game::MatchState,
        preferences::{GamePreferences, PreferencesPatch, Settings, SettingsPatch},
    },
};

/// Most names remembered for quick re-entry.
pub const MAX_KNOWN_NAMES: usize = 32;

/// Everything the persistence collaborator keeps between sessions.
///
/// The match is kept as raw JSON so the engine can backfill fields that an
/// older snapshot does not carry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StoredProfile {
    /// Application settings.
    pub settings: Settings,
    /// Game preferences used for new matches.
    #[serde(rename = "gamePreferences")]
    pub preferences: GamePreferences,
    /// Last persisted match, if any.
    pub match_state: Option<Value>,
    /// Player names entered previously, most recent first.
    pub known_names: Vec<String>,
    /// Time of the last save.
    pub updated_at: Option<SystemTime>,
}

impl StoredProfile {
    /// Apply a save patch: shallow merge of settings and preferences, full
    /// replacement of the match and of the known names. Stamps `updated_at`.
    pub fn apply(&mut self, patch: SavePatch) -> serde_json::Result<()> {
        if let Some(settings) = patch.settings {
            self.settings = self.settings.clone().merged(&settings);
        }
        if let Some(preferences) = patch.preferences {
            self.preferences = self.preferences.clone().merged(&preferences);
        }
        if let Some(state) = patch.match_state {
            self.match_state = state.map(|state| serde_json::to_value(&state)).transpose()?;
        }
        if let Some(names) = patch.known_names {
            self.known_names = names;
        }
        self.updated_at = Some(SystemTime::now());
        Ok(())
    }
}

/// Partial update handed to [`MatchStore::save`]; `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct SavePatch {
    /// Settings to merge.
    pub settings: Option<SettingsPatch>,
    /// Preferences to merge.
    pub preferences: Option<PreferencesPatch>,
    /// Replacement match; `Some(None)` clears it.
    pub match_state: Option<Option<MatchState>>,
    /// Replacement list of known names.
    pub known_names: Option<Vec<String>>,
}

impl SavePatch {
    /// Patch replacing only the match snapshot.
    pub fn match_state(state: MatchState) -> Self {
        Self {
            match_state: Some(Some(state)),
            ..Self::default()
        }
    }
}

/// Abstraction over the persistence collaborator.
pub trait MatchStore: Send + Sync {
    /// Load the stored profile; an empty store yields [`StoredProfile::default`].
    fn load(&self) -> BoxFuture<'static, StorageResult<StoredProfile>>;
    /// Merge `patch` into the stored profile.
    fn save(&self, patch: SavePatch) -> BoxFuture<'static, StorageResult<()>>;
}

/// Put `name` at the front of `known`, dropping duplicates (case-insensitive)
/// and keeping at most [`MAX_KNOWN_NAMES`] entries.
pub fn remember_name(known: &mut Vec<String>, name: &str) {
    let name = name.trim();
    if name.is_empty() {
        return;
    }
    known.retain(|existing| !existing.eq_ignore_ascii_case(name));
    known.insert(0, name.to_string());
    known.truncate(MAX_KNOWN_NAMES);
}
