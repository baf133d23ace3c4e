//! Match engine: owns the match state, drives the phase state machine and the
//! countdown, applies scoring rules and persists after every mutation.

use std::{
    collections::HashSet,
    sync::{Arc, Weak},
    time::Duration,
};

use tokio::{
    sync::{Mutex, MutexGuard, broadcast},
    task::JoinHandle,
    time::{Instant, MissedTickBehavior, interval_at},
};
use tracing::{debug, info, trace, warn};
use uuid::Uuid;
use validator::Validate;

use crate::{
    config::AppConfig,
    dao::{
        store::{MatchStore, SavePatch, StoredProfile, remember_name},
        validator::WordValidator,
    },
    dto::{player::PlayerInput, validation::validate_player_name},
    error::ServiceError,
    state::{
        events::{EventHub, EventKind, MatchEvent, MatchObserver, SubscriptionId},
        game::{
            MatchState, Player, TieBreak, TieBreakPending, assign_colors, default_player_name,
            derive_abbrev, slot_id,
        },
        phase::{Phase, PhaseCommand, PhaseKind, PhaseStatus},
        preferences::{
            GamePreferences, MAX_PLAYERS, MIN_PLAYERS, PreferencesPatch, Settings, SettingsPatch,
        },
        scoring::{RoundOutcome, ScoreSheet, evaluate_outcome},
    },
};

const TICK: Duration = Duration::from_secs(1);
const EVENT_STREAM_CAPACITY: usize = 64;

/// Cloneable handle to a match engine; clones share the same match.
#[derive(Clone)]
pub struct MatchEngine {
    pub(super) inner: Arc<EngineInner>,
}

pub(super) struct EngineInner {
    pub(super) core: Mutex<EngineCore>,
    store: Arc<dyn MatchStore>,
    pub(super) hub: EventHub,
    config: AppConfig,
    pub(super) validator: Option<Arc<dyn WordValidator>>,
}

pub(super) struct EngineCore {
    pub(super) state: MatchState,
    preferences: GamePreferences,
    pub(super) settings: Settings,
    known_names: Vec<String>,
    timer: Countdown,
}

/// Bookkeeping for the single countdown task.
///
/// Every cancel bumps the epoch so a tick that was already scheduled for an
/// older countdown does nothing.
#[derive(Default)]
struct Countdown {
    epoch: u64,
    handle: Option<JoinHandle<()>>,
}

impl Countdown {
    fn cancel(&mut self) {
        self.epoch = self.epoch.wrapping_add(1);
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }

    /// Forget the handle without aborting; used by the countdown task itself.
    fn detach(&mut self) {
        self.handle.take();
    }
}

impl MatchEngine {
    /// Build an engine from whatever the store holds.
    ///
    /// A persisted match is rehydrated with missing fields backfilled from the
    /// stored preferences; otherwise a fresh match in the `config` phase is
    /// created. Load failures are logged and the engine starts from defaults.
    pub async fn hydrate(
        store: Arc<dyn MatchStore>,
        config: AppConfig,
        validator: Option<Arc<dyn WordValidator>>,
    ) -> Self {
        let profile = match store.load().await {
            Ok(profile) => profile,
            Err(err) => {
                warn!(error = %err, "failed to load stored profile; starting from defaults");
                StoredProfile::default()
            }
        };

        let preferences = if profile.updated_at.is_some() {
            profile.preferences.clamped()
        } else {
            config.default_preferences().clone()
        };
        let defaults = MatchState::from_preferences(&preferences, &profile.known_names, &config);

        let state = match profile.match_state {
            Some(raw) => match MatchState::hydrate(raw, &defaults, &config) {
                Ok(state) => {
                    info!(
                        match_id = ?state.match_id,
                        round = state.round,
                        phase = %state.phase,
                        "resumed persisted match"
                    );
                    state
                }
                Err(err) => {
                    warn!(error = %err, "persisted match is unreadable; starting a fresh one");
                    defaults
                }
            },
            None => defaults,
        };

        Self {
            inner: Arc::new(EngineInner {
                core: Mutex::new(EngineCore {
                    state,
                    preferences,
                    settings: profile.settings,
                    known_names: profile.known_names,
                    timer: Countdown::default(),
                }),
                store,
                hub: EventHub::new(EVENT_STREAM_CAPACITY),
                config,
                validator,
            }),
        }
    }

    // -----------------------------------------------------------------------
    // Read-only projections
    // -----------------------------------------------------------------------

    /// Independent copy of the current match state.
    pub async fn snapshot(&self) -> MatchState {
        self.inner.core.lock().await.state.clone()
    }

    /// Preferences new matches start from.
    pub async fn preferences(&self) -> GamePreferences {
        self.inner.core.lock().await.preferences.clone()
    }

    /// Application settings.
    pub async fn settings(&self) -> Settings {
        self.inner.core.lock().await.settings.clone()
    }

    /// Player names entered so far, most recent first.
    pub async fn known_names(&self) -> Vec<String> {
        self.inner.core.lock().await.known_names.clone()
    }

    // -----------------------------------------------------------------------
    // Observers
    // -----------------------------------------------------------------------

    /// Register an observer for one event kind.
    pub fn subscribe(
        &self,
        kind: EventKind,
        observer: impl MatchObserver + 'static,
    ) -> SubscriptionId {
        self.inner.hub.subscribe(Some(kind), Arc::new(observer))
    }

    /// Register an observer for every event.
    pub fn subscribe_all(&self, observer: impl MatchObserver + 'static) -> SubscriptionId {
        self.inner.hub.subscribe(None, Arc::new(observer))
    }

    /// Remove an observer; returns false when it was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.hub.unsubscribe(id)
    }

    /// Stream of every event emitted from now on.
    pub fn event_stream(&self) -> broadcast::Receiver<MatchEvent> {
        self.inner.hub.stream()
    }

    // -----------------------------------------------------------------------
    // Match lifecycle
    // -----------------------------------------------------------------------

    /// Start a new match from the current preferences.
    pub async fn start_match(&self) {
        let mut core = self.inner.core.lock().await;
        self.start_match_locked(&mut core);
        self.commit(core, Vec::new()).await;
    }

    /// Start the countdown of a phase, starting the match first when needed.
    pub async fn start_phase(&self, kind: PhaseKind) {
        let mut core = self.inner.core.lock().await;
        if core.state.match_over {
            debug!(?kind, "match is over; ignoring phase start");
            return;
        }
        if !core.state.is_active {
            self.start_match_locked(&mut core);
        }
        if !apply_command(&mut core.state, PhaseCommand::Start(kind)) {
            return;
        }

        let remaining = core.state.duration(kind);
        core.state.remaining = remaining;
        self.start_countdown(&mut core);

        let events = vec![MatchEvent::PhaseStart {
            kind,
            remaining,
            resumed: false,
        }];
        self.commit(core, events).await;
    }

    /// Stop the running countdown, keeping the remaining time.
    pub async fn pause(&self) {
        let mut core = self.inner.core.lock().await;
        let Some(kind) = core.state.phase.kind() else {
            return;
        };
        if !apply_command(&mut core.state, PhaseCommand::Pause) {
            return;
        }
        core.timer.cancel();

        let events = vec![MatchEvent::Paused {
            kind,
            remaining: core.state.remaining,
        }];
        self.commit(core, events).await;
    }

    /// Restart a paused countdown from the preserved remaining time.
    pub async fn resume(&self) {
        let mut core = self.inner.core.lock().await;
        let Some(kind) = core.state.phase.kind() else {
            return;
        };
        if !apply_command(&mut core.state, PhaseCommand::Resume) {
            return;
        }
        self.start_countdown(&mut core);

        let events = vec![MatchEvent::PhaseStart {
            kind,
            remaining: core.state.remaining,
            resumed: true,
        }];
        self.commit(core, events).await;
    }

    /// End the current countdown now.
    pub async fn finish_phase(&self) {
        let mut core = self.inner.core.lock().await;
        let mut events = Vec::new();
        if !finish_locked(&mut core, &mut events) {
            return;
        }
        self.commit(core, events).await;
    }

    /// Reset a phase to its full duration from any phase, optionally starting
    /// it right away. Without a match in progress a new one is started first.
    pub async fn restart_phase(&self, kind: PhaseKind, auto_start: bool) {
        let mut core = self.inner.core.lock().await;
        if !core.state.is_active || core.state.match_over {
            self.start_match_locked(&mut core);
        }

        core.timer.cancel();
        apply_command(&mut core.state, PhaseCommand::Prepare(kind));
        let remaining = core.state.duration(kind);
        core.state.remaining = remaining;

        let mut events = Vec::new();
        if auto_start && apply_command(&mut core.state, PhaseCommand::Start(kind)) {
            self.start_countdown(&mut core);
            events.push(MatchEvent::PhaseStart {
                kind,
                remaining,
                resumed: false,
            });
        }
        self.commit(core, events).await;
    }

    /// Jump to the creation phase from wherever the round is.
    pub async fn skip_to_creation(&self, auto_start: bool) {
        self.restart_phase(PhaseKind::Creation, auto_start).await;
    }

    /// Move on to the next round.
    pub async fn next_round(&self) {
        let mut core = self.inner.core.lock().await;
        if core.state.match_over {
            debug!("match is over; ignoring next round");
            return;
        }
        if !core.state.is_active {
            self.start_match_locked(&mut core);
        } else {
            core.state.tie_break_pending = None;
            advance_round(&mut core);
        }
        self.commit(core, Vec::new()).await;
    }

    /// Replace the match with a fresh, unstarted one built from the preferences.
    pub async fn reset(&self) {
        let mut core = self.inner.core.lock().await;
        core.timer.cancel();
        let names: Vec<String> = core.state.players.iter().map(|p| p.name.clone()).collect();
        core.state = MatchState::from_preferences(&core.preferences, &names, &self.inner.config);
        info!("match reset");
        self.commit(core, Vec::new()).await;
    }

    /// Replace the match with a caller-supplied snapshot.
    pub async fn load_match(&self, mut state: MatchState) {
        state.normalize(&self.inner.config);
        let mut core = self.inner.core.lock().await;
        core.timer.cancel();
        info!(match_id = ?state.match_id, round = state.round, "loaded match");
        core.state = state;
        self.commit(core, Vec::new()).await;
    }

    // -----------------------------------------------------------------------
    // Scoring
    // -----------------------------------------------------------------------

    /// Apply the points of the current round and check the win condition.
    ///
    /// Only participants (the tie-break roster, or everyone) receive their
    /// points; every other player gets a zero entry so round histories stay
    /// aligned.
    pub async fn add_round_scores(&self, scores: impl Into<ScoreSheet>) {
        let scores = scores.into();
        let mut core = self.inner.core.lock().await;
        let state = &core.state;
        if !state.is_active || state.match_over {
            debug!("no match in progress; ignoring round scores");
            return;
        }
        if state.tie_break_pending.is_some() {
            debug!("tie-break decision pending; ignoring round scores");
            return;
        }

        let mut events = Vec::new();
        if matches!(
            core.state.phase.status(),
            Some(PhaseStatus::Running | PhaseStatus::Paused)
        ) {
            finish_locked(&mut core, &mut events);
        }
        core.timer.cancel();
        let state = &mut core.state;
        let round = state.round;
        let in_tie_break = state.tie_break.is_some();
        let roster: Option<HashSet<String>> = state
            .tie_break
            .as_ref()
            .map(|tie_break| tie_break.players.iter().cloned().collect());

        let mut applied = ScoreSheet::new();
        for player in state.players.iter_mut() {
            let participates = roster
                .as_ref()
                .is_none_or(|roster| roster.contains(&player.id));
            let points = if participates {
                scores.points_for(&player.id)
            } else {
                0
            };
            player.push_round(round, points, in_tie_break);
            applied.insert(player.id.clone(), points);
        }
        debug!(round, ?applied, "round scores applied");

        events.push(MatchEvent::RoundFinished {
            round,
            scores: applied,
        });
        evaluate_locked(&mut core, &mut events);
        self.commit(core, events).await;
    }

    /// Correct the points of a round already played and recompute totals.
    ///
    /// Never evaluates the win condition.
    pub async fn update_round_scores(&self, round: u32, scores: impl Into<ScoreSheet>) {
        let scores = scores.into();
        let mut core = self.inner.core.lock().await;
        let played = core
            .state
            .players
            .iter()
            .any(|player| player.rounds.iter().any(|entry| entry.round == round));
        if !played {
            debug!(round, current = core.state.round, "ignoring correction for unplayed round");
            return;
        }

        let mut applied = ScoreSheet::new();
        for player in core.state.players.iter_mut() {
            if scores.contains(&player.id) {
                let points = scores.points_for(&player.id);
                player.set_round_points(round, points);
                applied.insert(player.id.clone(), points);
            }
        }
        if applied.is_empty() {
            return;
        }
        info!(round, ?applied, "round scores corrected");

        let events = vec![MatchEvent::ScoresUpdated {
            round,
            scores: applied,
        }];
        self.commit(core, events).await;
    }

    /// End the match with exactly these winners, typically to share a tied win.
    pub async fn declare_winners(&self, winner_ids: Vec<String>) {
        let mut core = self.inner.core.lock().await;
        if core.state.match_over {
            return;
        }
        let winners = known_ids(&core.state, winner_ids);
        if winners.is_empty() {
            debug!("no known winners declared; ignoring");
            return;
        }

        let mut events = Vec::new();
        end_match_locked(&mut core, winners, &mut events);
        self.commit(core, events).await;
    }

    /// Start a decider round restricted to `players`, or to the tied players.
    pub async fn start_tie_break(&self, players: Option<Vec<String>>) {
        let mut core = self.inner.core.lock().await;
        let state = &core.state;
        if state.match_over || !state.is_active {
            debug!("no match in progress; ignoring tie-break");
            return;
        }

        let requested = players
            .or_else(|| state.tie_break_pending.as_ref().map(|p| p.players.clone()))
            .or_else(|| state.tie_break.as_ref().map(|t| t.players.clone()))
            .unwrap_or_default();
        let roster = known_ids(state, requested);
        if roster.len() < 2 {
            debug!(?roster, "tie-break needs at least two players; ignoring");
            return;
        }

        let index = state.tie_break.as_ref().map_or(0, |t| t.index) + 1;
        core.state.tie_break = Some(TieBreak {
            players: roster.clone(),
            index,
        });
        core.state.tie_break_pending = None;
        core.state.winner_ids.clear();
        advance_round(&mut core);
        info!(index, round = core.state.round, players = ?roster, "tie-break started");

        let events = vec![MatchEvent::TieBreakStart {
            players: roster,
            index,
            round: core.state.round,
        }];
        self.commit(core, events).await;
    }

    // -----------------------------------------------------------------------
    // Configuration
    // -----------------------------------------------------------------------

    /// Replace the roster. Only allowed while no match is in progress.
    ///
    /// Fewer than two entries are padded with default players; players keep
    /// the history of the slot they land in.
    pub async fn set_players(&self, players: Vec<PlayerInput>) -> Result<(), ServiceError> {
        if players.len() > MAX_PLAYERS {
            return Err(ServiceError::InvalidInput(format!(
                "a match holds at most {MAX_PLAYERS} players (got {})",
                players.len()
            )));
        }
        for player in &players {
            player.validate()?;
        }

        let mut core = self.inner.core.lock().await;
        if core.state.is_active && !core.state.match_over {
            return Err(ServiceError::InvalidState(
                "players can only be replaced before the match starts".into(),
            ));
        }

        let previous = std::mem::take(&mut core.state.players);
        let count = players.len().max(MIN_PLAYERS);
        let mut roster = Vec::with_capacity(count);
        for index in 0..count {
            let id = slot_id(index);
            let mut player = previous
                .iter()
                .find(|p| p.id == id)
                .cloned()
                .unwrap_or_else(|| Player::new(id.clone(), default_player_name(index)));
            player.color.clear();
            if let Some(input) = players.get(index) {
                player.name = input.name.trim().to_string();
                if let Some(color) = &input.color {
                    player.color = color.to_lowercase();
                }
            }
            player.abbrev = derive_abbrev(&player.name, &player.id);
            roster.push(player);
        }
        assign_colors(&mut roster, &self.inner.config);

        for player in &players {
            remember_name(&mut core.known_names, &player.name);
        }
        core.state.players = roster;
        core.preferences.player_count = count;

        let patch = SavePatch {
            preferences: Some(PreferencesPatch {
                player_count: Some(count),
                ..PreferencesPatch::default()
            }),
            known_names: Some(core.known_names.clone()),
            ..SavePatch::default()
        };
        self.commit_with(core, Vec::new(), patch).await;
        Ok(())
    }

    /// Rename players slot by slot; blank entries keep the current name.
    pub async fn set_player_names(&self, names: Vec<String>) -> Result<(), ServiceError> {
        for name in names.iter().filter(|name| !name.trim().is_empty()) {
            validate_player_name(name)
                .map_err(|err| ServiceError::InvalidInput(format!("player name: {err}")))?;
        }

        let mut core = self.inner.core.lock().await;
        let mut changed = false;
        let EngineCore {
            state, known_names, ..
        } = &mut *core;
        for (player, name) in state.players.iter_mut().zip(&names) {
            let name = name.trim();
            if name.is_empty() || name == player.name {
                continue;
            }
            player.name = name.to_string();
            player.abbrev = derive_abbrev(&player.name, &player.id);
            remember_name(known_names, name);
            changed = true;
        }
        if !changed {
            return Ok(());
        }

        let patch = SavePatch {
            known_names: Some(core.known_names.clone()),
            ..SavePatch::default()
        };
        self.commit_with(core, Vec::new(), patch).await;
        Ok(())
    }

    /// Merge new preferences.
    ///
    /// Before the match starts every field applies. Once it is running only
    /// the live toggles and the phase durations change; mode and targets stay
    /// those the match started with.
    pub async fn apply_preferences(&self, patch: PreferencesPatch) {
        let mut core = self.inner.core.lock().await;
        let preferences = core.preferences.clone().merged(&patch);
        core.preferences = preferences.clone();

        if core.state.phase == Phase::Config {
            sync_preferences(&mut core.state, &preferences, &self.inner.config);
        } else {
            let state = &mut core.state;
            state.scoring_enabled = preferences.scoring_enabled;
            state.validate_record_words = preferences.validate_record_words;
            state.strategy_seconds = preferences.strategy_seconds;
            state.creation_seconds = preferences.creation_seconds;
        }
        debug!(?preferences, "preferences applied");

        let patch = SavePatch {
            preferences: Some(preferences.into()),
            ..SavePatch::default()
        };
        self.commit_with(core, Vec::new(), patch).await;
    }

    /// Merge new application settings. The match itself is left as is but
    /// still announced with `statechange`.
    pub async fn apply_settings(&self, patch: SettingsPatch) {
        let mut core = self.inner.core.lock().await;
        core.settings = core.settings.clone().merged(&patch);
        debug!(settings = ?core.settings, "settings applied");
        let save = SavePatch {
            settings: Some(patch),
            ..SavePatch::default()
        };
        self.commit_with(core, Vec::new(), save).await;
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn start_match_locked(&self, core: &mut EngineCore) {
        core.timer.cancel();
        let preferences = core.preferences.clone();
        let state = &mut core.state;
        sync_preferences(state, &preferences, &self.inner.config);

        state.match_id = Some(Uuid::new_v4());
        state.is_active = true;
        state.round = 1;
        state.phase = Phase::round(PhaseKind::Strategy, PhaseStatus::Ready);
        state.remaining = state.strategy_seconds;
        state.tie_break = None;
        state.tie_break_pending = None;
        state.winner_ids.clear();
        state.match_over = false;
        state.preferences_ref = Some(preferences);
        state.players.iter_mut().for_each(Player::clear_history);

        info!(match_id = ?state.match_id, players = state.players.len(), "match started");
    }

    fn start_countdown(&self, core: &mut EngineCore) {
        core.timer.cancel();
        let epoch = core.timer.epoch;
        let weak: Weak<EngineInner> = Arc::downgrade(&self.inner);

        let handle = tokio::spawn(async move {
            let mut interval = interval_at(Instant::now() + TICK, TICK);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                let engine = MatchEngine { inner };
                if !engine.tick(epoch).await {
                    break;
                }
            }
        });
        core.timer.handle = Some(handle);
    }

    /// One countdown second; returns whether the countdown keeps going.
    async fn tick(&self, epoch: u64) -> bool {
        let mut core = self.inner.core.lock().await;
        if core.timer.epoch != epoch {
            return false;
        }
        let Phase::Round {
            kind,
            status: PhaseStatus::Running,
        } = core.state.phase
        else {
            core.timer.detach();
            return false;
        };

        let remaining = core.state.remaining.saturating_sub(1);
        core.state.remaining = remaining;
        trace!(?kind, remaining, "tick");

        let mut events = vec![MatchEvent::Tick { kind, remaining }];
        if remaining == 0 {
            core.timer.detach();
            finish_locked(&mut core, &mut events);
        }
        self.commit(core, events).await;
        remaining > 0
    }

    async fn commit(&self, core: MutexGuard<'_, EngineCore>, events: Vec<MatchEvent>) {
        self.commit_with(core, events, SavePatch::default()).await;
    }

    /// Stamp, persist and release the state, then notify observers.
    async fn commit_with(
        &self,
        mut core: MutexGuard<'_, EngineCore>,
        events: Vec<MatchEvent>,
        mut patch: SavePatch,
    ) {
        core.state.touch();
        let snapshot = core.state.clone();
        patch.match_state = Some(Some(snapshot.clone()));
        if let Err(err) = self.inner.store.save(patch).await {
            warn!(
                match_id = ?snapshot.match_id,
                error = %err,
                "failed to persist match; continuing in memory"
            );
        }
        drop(core);

        self.inner.hub.emit(MatchEvent::StateChange {
            state: Box::new(snapshot),
        });
        self.inner.hub.emit_all(events);
    }
}

/// Apply a phase command, logging and ignoring invalid ones.
fn apply_command(state: &mut MatchState, command: PhaseCommand) -> bool {
    match state.phase.apply(command) {
        Ok(next) => {
            state.phase = next;
            true
        }
        Err(err) => {
            debug!(error = %err, "ignoring phase command");
            false
        }
    }
}

fn finish_locked(core: &mut EngineCore, events: &mut Vec<MatchEvent>) -> bool {
    let Some(kind) = core.state.phase.kind() else {
        return false;
    };
    if !apply_command(&mut core.state, PhaseCommand::Finish) {
        return false;
    }
    core.timer.cancel();
    core.state.remaining = 0;
    debug!(?kind, round = core.state.round, "phase finished");
    events.push(MatchEvent::Timeup { kind });
    true
}

/// Apply the win condition after a scored round.
fn evaluate_locked(core: &mut EngineCore, events: &mut Vec<MatchEvent>) {
    match evaluate_outcome(&core.state) {
        RoundOutcome::Winner(winner) => {
            end_match_locked(core, vec![winner], events);
        }
        RoundOutcome::Tie(players) => {
            let mode = core.state.effective_mode();
            info!(round = core.state.round, ?players, ?mode, "tie awaiting decision");
            core.state.tie_break_pending = Some(TieBreakPending {
                players: players.clone(),
                mode,
            });
            events.push(MatchEvent::TieBreakPending { players, mode });
        }
        RoundOutcome::Continue => advance_round(core),
    }
}

fn advance_round(core: &mut EngineCore) {
    core.timer.cancel();
    let state = &mut core.state;
    state.round += 1;
    state.phase = Phase::round(PhaseKind::Strategy, PhaseStatus::Ready);
    state.remaining = state.strategy_seconds;
    debug!(round = state.round, "advanced to next round");
}

fn end_match_locked(core: &mut EngineCore, winners: Vec<String>, events: &mut Vec<MatchEvent>) {
    core.timer.cancel();
    let state = &mut core.state;
    apply_command(state, PhaseCommand::Complete);
    state.match_over = true;
    state.remaining = 0;
    state.tie_break = None;
    state.tie_break_pending = None;
    state.winner_ids = winners.clone();
    info!(match_id = ?state.match_id, round = state.round, winners = ?winners, "match finished");
    events.push(MatchEvent::MatchFinished {
        winner_ids: winners,
    });
}

/// Copy match-level rule fields from preferences and size the roster.
fn sync_preferences(state: &mut MatchState, preferences: &GamePreferences, config: &AppConfig) {
    state.mode = preferences.mode;
    state.rounds_target = preferences.rounds_target;
    state.points_target = preferences.points_target;
    state.scoring_enabled = preferences.scoring_enabled;
    state.validate_record_words = preferences.validate_record_words;
    state.strategy_seconds = preferences.strategy_seconds;
    state.creation_seconds = preferences.creation_seconds;
    if state.phase == Phase::Config {
        state.remaining = state.strategy_seconds;
    }

    let count = preferences.player_count.clamp(MIN_PLAYERS, MAX_PLAYERS);
    state.players.truncate(count);
    while state.players.len() < count {
        let index = state.players.len();
        state
            .players
            .push(Player::new(slot_id(index), default_player_name(index)));
    }
    assign_colors(&mut state.players, config);
}

/// Keep the ids naming a player of the match, in order, without duplicates.
fn known_ids(state: &MatchState, ids: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    ids.into_iter()
        .filter(|id| state.player(id).is_some() && seen.insert(id.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;

    use super::*;
    use crate::{
        dao::{memory::MemoryStore, storage::StorageResult},
        state::preferences::MatchMode,
    };

    async fn engine_with(preferences: GamePreferences) -> (MatchEngine, MemoryStore) {
        let store = MemoryStore::new();
        let engine = MatchEngine::hydrate(Arc::new(store.clone()), AppConfig::default(), None).await;
        engine.apply_preferences(preferences.into()).await;
        (engine, store)
    }

    fn recorder(engine: &MatchEngine) -> Arc<StdMutex<Vec<EventKind>>> {
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let sink = seen.clone();
        engine.subscribe_all(move |event: &MatchEvent| -> anyhow::Result<()> {
            sink.lock().unwrap().push(event.kind());
            Ok(())
        });
        seen
    }

    #[tokio::test]
    async fn fresh_engine_is_in_config() {
        let (engine, _) = engine_with(GamePreferences::default()).await;
        let state = engine.snapshot().await;
        assert_eq!(state.phase, Phase::Config);
        assert!(!state.is_active);
        assert_eq!(state.players.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn start_phase_auto_starts_match() {
        let (engine, _) = engine_with(GamePreferences::default()).await;
        engine.start_phase(PhaseKind::Strategy).await;

        let state = engine.snapshot().await;
        assert!(state.is_active);
        assert!(state.match_id.is_some());
        assert_eq!(state.round, 1);
        assert_eq!(state.phase.to_string(), "strategy-run");
        assert_eq!(state.remaining, 60);
        assert!(state.preferences_ref.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn pause_twice_is_the_same_as_once() {
        let (engine, _) = engine_with(GamePreferences::default()).await;
        engine.start_phase(PhaseKind::Creation).await;
        let seen = recorder(&engine);

        engine.pause().await;
        let first = engine.snapshot().await;
        engine.pause().await;
        let second = engine.snapshot().await;

        assert_eq!(first.phase, second.phase);
        assert_eq!(first.remaining, second.remaining);
        let paused = seen
            .lock()
            .unwrap()
            .iter()
            .filter(|kind| **kind == EventKind::Paused)
            .count();
        assert_eq!(paused, 1);
    }

    #[tokio::test]
    async fn resume_without_pause_is_ignored() {
        let (engine, _) = engine_with(GamePreferences::default()).await;
        engine.start_match().await;
        engine.resume().await;
        assert_eq!(engine.snapshot().await.phase.to_string(), "strategy-ready");
    }

    #[tokio::test(start_paused = true)]
    async fn finish_phase_emits_single_timeup() {
        let (engine, _) = engine_with(GamePreferences::default()).await;
        engine.start_phase(PhaseKind::Strategy).await;
        let seen = recorder(&engine);

        engine.finish_phase().await;
        engine.finish_phase().await;

        let state = engine.snapshot().await;
        assert_eq!(state.phase.to_string(), "strategy-timeup");
        assert_eq!(state.remaining, 0);
        assert_eq!(
            *seen.lock().unwrap(),
            [EventKind::StateChange, EventKind::Timeup]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn skip_to_creation_from_config_starts_match() {
        let (engine, _) = engine_with(GamePreferences::default()).await;
        engine.skip_to_creation(false).await;

        let state = engine.snapshot().await;
        assert!(state.is_active);
        assert_eq!(state.phase.to_string(), "creation-ready");
        assert_eq!(state.remaining, 120);

        engine.restart_phase(PhaseKind::Creation, true).await;
        assert_eq!(engine.snapshot().await.phase.to_string(), "creation-run");
    }

    #[tokio::test]
    async fn skip_to_creation_after_match_over_starts_new_match() {
        let (engine, _) = engine_with(GamePreferences::default()).await;
        engine.start_match().await;
        engine.declare_winners(vec!["p1".into()]).await;
        let finished = engine.snapshot().await;

        engine.skip_to_creation(false).await;
        let state = engine.snapshot().await;
        assert!(!state.match_over);
        assert_ne!(state.match_id, finished.match_id);
        assert_eq!(state.phase.to_string(), "creation-ready");
        assert!(state.winner_ids.is_empty());
    }

    #[tokio::test]
    async fn non_participants_get_zero_entries_during_tie_break() {
        let (engine, _) = engine_with(GamePreferences {
            player_count: 3,
            rounds_target: 1,
            ..GamePreferences::default()
        })
        .await;
        engine.start_match().await;
        engine
            .add_round_scores([("p1", 10), ("p2", 10), ("p3", 4)])
            .await;
        engine.start_tie_break(None).await;
        engine
            .add_round_scores([("p1", 3), ("p2", 1), ("p3", 50)])
            .await;

        let state = engine.snapshot().await;
        let p3 = state.player("p3").unwrap();
        assert_eq!(p3.rounds.len(), 2);
        assert_eq!(p3.rounds[1].points, 0);
        assert!(p3.rounds[1].tie_break);
        assert_eq!(p3.score, 4);
        assert_eq!(state.winner_ids, ["p1"]);
    }

    #[tokio::test]
    async fn scores_are_ignored_while_tie_decision_pending() {
        let (engine, _) = engine_with(GamePreferences {
            rounds_target: 1,
            ..GamePreferences::default()
        })
        .await;
        engine.start_match().await;
        engine.add_round_scores([("p1", 5), ("p2", 5)]).await;
        engine.add_round_scores([("p1", 5), ("p2", 0)]).await;

        let state = engine.snapshot().await;
        assert!(state.tie_break_pending.is_some());
        assert_eq!(state.players[0].rounds.len(), 1);
    }

    #[tokio::test]
    async fn next_round_clears_pending_tie() {
        let (engine, _) = engine_with(GamePreferences {
            rounds_target: 1,
            ..GamePreferences::default()
        })
        .await;
        engine.start_match().await;
        engine.add_round_scores([("p1", 5), ("p2", 5)]).await;
        engine.next_round().await;

        let state = engine.snapshot().await;
        assert!(state.tie_break_pending.is_none());
        assert_eq!(state.round, 2);
        assert_eq!(state.phase.to_string(), "strategy-ready");
    }

    #[tokio::test]
    async fn declare_winners_ends_match_with_shared_win() {
        let (engine, _) = engine_with(GamePreferences {
            rounds_target: 1,
            ..GamePreferences::default()
        })
        .await;
        engine.start_match().await;
        engine.add_round_scores([("p1", 5), ("p2", 5)]).await;

        engine.declare_winners(Vec::new()).await;
        assert!(!engine.snapshot().await.match_over);

        engine
            .declare_winners(vec!["p2".into(), "ghost".into(), "p1".into(), "p2".into()])
            .await;
        let state = engine.snapshot().await;
        assert!(state.match_over);
        assert_eq!(state.phase, Phase::Done);
        assert_eq!(state.winner_ids, ["p2", "p1"]);
        assert!(state.tie_break_pending.is_none());
    }

    #[tokio::test]
    async fn update_round_scores_recomputes_totals_without_advancing() {
        let (engine, _) = engine_with(GamePreferences {
            rounds_target: 5,
            ..GamePreferences::default()
        })
        .await;
        engine.start_match().await;
        engine.add_round_scores([("p1", 10), ("p2", 5)]).await;
        engine.add_round_scores([("p1", 7), ("p2", 8)]).await;

        engine.update_round_scores(1, [("p2", 500)]).await;
        engine.update_round_scores(9, [("p1", 500)]).await;

        let state = engine.snapshot().await;
        assert_eq!(state.round, 3);
        assert!(!state.match_over);
        assert_eq!(state.player("p1").unwrap().score, 17);
        assert_eq!(state.player("p2").unwrap().score, 508);
    }

    #[tokio::test]
    async fn corrections_for_the_round_in_play_are_ignored() {
        let (engine, _) = engine_with(GamePreferences::default()).await;
        engine.start_match().await;
        let seen = recorder(&engine);

        engine.update_round_scores(1, [("p1", 5)]).await;
        assert!(seen.lock().unwrap().is_empty());

        engine.add_round_scores([("p1", 2), ("p2", 1)]).await;
        let state = engine.snapshot().await;
        let p1 = state.player("p1").unwrap();
        assert_eq!(p1.rounds.len(), 1);
        assert_eq!(p1.rounds[0].round, 1);
        assert_eq!(p1.score, 2);
    }

    #[tokio::test]
    async fn oversized_scores_do_not_overflow_totals() {
        let (engine, _) = engine_with(GamePreferences {
            rounds_target: 5,
            ..GamePreferences::default()
        })
        .await;
        engine.start_match().await;
        engine
            .add_round_scores(serde_json::json!({ "p1": 2_000_000_000, "p2": 0 }))
            .await;
        engine
            .add_round_scores(serde_json::json!({ "p1": 2_000_000_000, "p2": 0 }))
            .await;

        let state = engine.snapshot().await;
        assert_eq!(state.player("p1").unwrap().score, i32::MAX);
        assert_eq!(state.round, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn scoring_a_running_phase_stops_it_before_a_tie() {
        let (engine, _) = engine_with(GamePreferences {
            rounds_target: 1,
            ..GamePreferences::default()
        })
        .await;
        engine.start_phase(PhaseKind::Creation).await;
        tokio::time::sleep(Duration::from_millis(2_500)).await;
        let seen = recorder(&engine);

        engine.add_round_scores([("p1", 4), ("p2", 4)]).await;
        let scored = engine.snapshot().await;
        assert_eq!(scored.phase.to_string(), "creation-timeup");
        assert!(scored.tie_break_pending.is_some());

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(engine.snapshot().await.remaining, scored.remaining);
        assert_eq!(
            *seen.lock().unwrap(),
            [
                EventKind::StateChange,
                EventKind::Timeup,
                EventKind::RoundFinished,
                EventKind::TieBreakPending,
            ]
        );
    }

    #[tokio::test]
    async fn settings_changes_are_announced_and_saved() {
        let (engine, store) = engine_with(GamePreferences::default()).await;
        let seen = recorder(&engine);

        engine
            .apply_settings(SettingsPatch {
                language: Some("de".into()),
                ..SettingsPatch::default()
            })
            .await;

        assert_eq!(*seen.lock().unwrap(), [EventKind::StateChange]);
        assert_eq!(engine.settings().await.language, "de");
        assert_eq!(store.profile().settings.language, "de");
    }

    #[tokio::test]
    async fn set_players_pads_and_keeps_requested_colors() {
        let (engine, store) = engine_with(GamePreferences::default()).await;
        engine
            .set_players(vec![PlayerInput {
                name: " Zoé ".into(),
                color: Some("#123ABC".into()),
            }])
            .await
            .unwrap();

        let state = engine.snapshot().await;
        assert_eq!(state.players.len(), 2);
        assert_eq!(state.players[0].name, "Zoé");
        assert_eq!(state.players[0].abbrev, "ZOÉ");
        assert_eq!(state.players[0].color, "#123abc");
        assert_ne!(state.players[1].color, "#123abc");
        assert_eq!(store.profile().known_names, ["Zoé"]);
    }

    #[tokio::test]
    async fn set_players_rejects_bad_input_and_running_matches() {
        let (engine, _) = engine_with(GamePreferences::default()).await;
        let too_many = (0..9).map(|i| PlayerInput::named(format!("P{i}"))).collect();
        assert!(matches!(
            engine.set_players(too_many).await,
            Err(ServiceError::InvalidInput(_))
        ));
        assert!(matches!(
            engine.set_players(vec![PlayerInput::named("  ")]).await,
            Err(ServiceError::InvalidInput(_))
        ));

        engine.start_match().await;
        assert!(matches!(
            engine.set_players(vec![PlayerInput::named("Ann")]).await,
            Err(ServiceError::InvalidState(_))
        ));
    }

    #[tokio::test]
    async fn set_player_names_renames_and_remembers() {
        let (engine, store) = engine_with(GamePreferences::default()).await;
        engine
            .set_player_names(vec!["alice".into(), " ".into(), "ignored".into()])
            .await
            .unwrap();

        let state = engine.snapshot().await;
        assert_eq!(state.players[0].abbrev, "ALI");
        assert_eq!(state.players[1].name, "Player 2");
        assert_eq!(engine.known_names().await, ["alice"]);
        assert_eq!(store.profile().known_names, ["alice"]);
    }

    #[tokio::test]
    async fn live_preference_edits_do_not_move_targets() {
        let (engine, _) = engine_with(GamePreferences::default()).await;
        engine.start_match().await;
        engine
            .apply_preferences(PreferencesPatch {
                mode: Some(MatchMode::Points),
                rounds_target: Some(1),
                creation_seconds: Some(30),
                ..PreferencesPatch::default()
            })
            .await;

        let state = engine.snapshot().await;
        assert_eq!(state.effective_mode(), MatchMode::Rounds);
        assert_eq!(state.effective_rounds_target(), 5);
        assert_eq!(state.creation_seconds, 30);
        assert_eq!(engine.preferences().await.mode, MatchMode::Points);
    }

    #[tokio::test]
    async fn preferences_in_config_resize_roster() {
        let (engine, store) = engine_with(GamePreferences::default()).await;
        engine
            .apply_preferences(PreferencesPatch {
                player_count: Some(4),
                strategy_seconds: Some(5),
                ..PreferencesPatch::default()
            })
            .await;

        let state = engine.snapshot().await;
        assert_eq!(state.players.len(), 4);
        assert_eq!(state.strategy_seconds, 10);
        assert_eq!(state.remaining, 10);
        assert_eq!(store.profile().preferences.player_count, 4);
    }

    #[tokio::test]
    async fn reset_replaces_match_but_keeps_names() {
        let (engine, _) = engine_with(GamePreferences::default()).await;
        engine.set_player_names(vec!["Ann".into()]).await.unwrap();
        engine.start_match().await;
        engine.add_round_scores([("p1", 3)]).await;

        engine.reset().await;
        let state = engine.snapshot().await;
        assert_eq!(state.phase, Phase::Config);
        assert!(!state.is_active);
        assert_eq!(state.players[0].name, "Ann");
        assert_eq!(state.players[0].score, 0);
    }

    #[tokio::test]
    async fn every_mutation_is_persisted() {
        let (engine, store) = engine_with(GamePreferences::default()).await;
        engine.start_match().await;
        engine.add_round_scores([("p1", 3), ("p2", 1)]).await;

        let stored: MatchState =
            serde_json::from_value(store.profile().match_state.unwrap()).unwrap();
        assert_eq!(stored, engine.snapshot().await);
    }

    struct BrokenStore;

    impl MatchStore for BrokenStore {
        fn load(&self) -> futures::future::BoxFuture<'static, StorageResult<StoredProfile>> {
            Box::pin(async {
                Err(crate::dao::storage::StorageError::unavailable(
                    "load".into(),
                    std::io::Error::other("disk gone"),
                ))
            })
        }

        fn save(&self, _patch: SavePatch) -> futures::future::BoxFuture<'static, StorageResult<()>> {
            Box::pin(async {
                Err(crate::dao::storage::StorageError::unavailable(
                    "save".into(),
                    std::io::Error::other("disk gone"),
                ))
            })
        }
    }

    #[tokio::test]
    async fn engine_keeps_working_when_persistence_fails() {
        let engine = MatchEngine::hydrate(Arc::new(BrokenStore), AppConfig::default(), None).await;
        engine.start_match().await;
        engine.add_round_scores([("p1", 4), ("p2", 2)]).await;

        let state = engine.snapshot().await;
        assert_eq!(state.round, 2);
        assert_eq!(state.players[0].score, 4);
    }

    #[tokio::test]
    async fn hydrate_resumes_running_match_paused() {
        let store = MemoryStore::new();
        let engine = MatchEngine::hydrate(Arc::new(store.clone()), AppConfig::default(), None).await;
        engine.start_phase(PhaseKind::Strategy).await;
        let before = engine.snapshot().await;
        drop(engine);

        let engine = MatchEngine::hydrate(Arc::new(store), AppConfig::default(), None).await;
        let after = engine.snapshot().await;
        assert_eq!(after.match_id, before.match_id);
        assert_eq!(after.phase.to_string(), "strategy-paused");
        assert_eq!(after.remaining, before.remaining);
    }
}
