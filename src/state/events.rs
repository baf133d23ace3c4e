use std::{
    fmt,
    panic::{AssertUnwindSafe, catch_unwind},
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
};

use indexmap::IndexMap;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{error, warn};

use crate::{
    dao::validator::WordVerdict,
    state::{game::MatchState, phase::PhaseKind, preferences::MatchMode, scoring::ScoreSheet},
};

/// Names observers subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum EventKind {
    /// Persisted state changed.
    #[serde(rename = "statechange")]
    StateChange,
    /// A countdown started or resumed.
    PhaseStart,
    /// A countdown was paused.
    Paused,
    /// A countdown reached zero or was skipped.
    Timeup,
    /// One second elapsed.
    Tick,
    /// A tie-break sub-match began.
    TieBreakStart,
    /// A tie awaits an external decision.
    TieBreakPending,
    /// Scores of the current round were applied.
    RoundFinished,
    /// A past round was corrected.
    ScoresUpdated,
    /// The match ended.
    MatchFinished,
    /// The word validator answered.
    ValidationResult,
    /// The word validator failed.
    ValidationError,
}

impl EventKind {
    /// Wire name of the event.
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::StateChange => "statechange",
            EventKind::PhaseStart => "phaseStart",
            EventKind::Paused => "paused",
            EventKind::Timeup => "timeup",
            EventKind::Tick => "tick",
            EventKind::TieBreakStart => "tieBreakStart",
            EventKind::TieBreakPending => "tieBreakPending",
            EventKind::RoundFinished => "roundFinished",
            EventKind::ScoresUpdated => "scoresUpdated",
            EventKind::MatchFinished => "matchFinished",
            EventKind::ValidationResult => "validationResult",
            EventKind::ValidationError => "validationError",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Notification emitted by the match engine.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum MatchEvent {
    /// Snapshot taken right after the state was persisted.
    #[serde(rename = "statechange")]
    StateChange {
        /// Independent copy of the new state.
        state: Box<MatchState>,
    },
    /// Countdown started (or resumed from a pause).
    PhaseStart {
        /// Phase whose countdown runs.
        kind: PhaseKind,
        /// Seconds left.
        remaining: u32,
        /// True when resuming a paused countdown.
        resumed: bool,
    },
    /// Countdown paused.
    Paused {
        /// Paused phase.
        kind: PhaseKind,
        /// Preserved seconds.
        remaining: u32,
    },
    /// Countdown finished.
    Timeup {
        /// Finished phase.
        kind: PhaseKind,
    },
    /// One countdown second elapsed.
    Tick {
        /// Running phase.
        kind: PhaseKind,
        /// Seconds left.
        remaining: u32,
    },
    /// Tie-break started.
    TieBreakStart {
        /// Restricted roster.
        players: Vec<String>,
        /// Cascade counter.
        index: u32,
        /// Round the tie-break is played in.
        round: u32,
    },
    /// Tie awaiting a decision.
    TieBreakPending {
        /// Tied players.
        players: Vec<String>,
        /// Mode the tie was computed in.
        mode: MatchMode,
    },
    /// Round scores applied.
    RoundFinished {
        /// Scored round.
        round: u32,
        /// Points that counted, per player.
        scores: ScoreSheet,
    },
    /// Past round corrected.
    ScoresUpdated {
        /// Corrected round.
        round: u32,
        /// Points written, per player.
        scores: ScoreSheet,
    },
    /// Match over.
    MatchFinished {
        /// Winning players.
        winner_ids: Vec<String>,
    },
    /// Validator verdict.
    ValidationResult {
        /// Checked word.
        word: String,
        /// Verdict returned by the validator.
        verdict: WordVerdict,
    },
    /// Validator failure.
    ValidationError {
        /// Checked word.
        word: String,
        /// Failure description.
        message: String,
    },
}

impl MatchEvent {
    /// Kind used for subscription filtering.
    pub fn kind(&self) -> EventKind {
        match self {
            MatchEvent::StateChange { .. } => EventKind::StateChange,
            MatchEvent::PhaseStart { .. } => EventKind::PhaseStart,
            MatchEvent::Paused { .. } => EventKind::Paused,
            MatchEvent::Timeup { .. } => EventKind::Timeup,
            MatchEvent::Tick { .. } => EventKind::Tick,
            MatchEvent::TieBreakStart { .. } => EventKind::TieBreakStart,
            MatchEvent::TieBreakPending { .. } => EventKind::TieBreakPending,
            MatchEvent::RoundFinished { .. } => EventKind::RoundFinished,
            MatchEvent::ScoresUpdated { .. } => EventKind::ScoresUpdated,
            MatchEvent::MatchFinished { .. } => EventKind::MatchFinished,
            MatchEvent::ValidationResult { .. } => EventKind::ValidationResult,
            MatchEvent::ValidationError { .. } => EventKind::ValidationError,
        }
    }
}

/// Receiver of engine notifications.
///
/// Errors are logged by the hub and never reach the engine or other observers.
pub trait MatchObserver: Send + Sync {
    /// Handle one event.
    fn on_event(&self, event: &MatchEvent) -> anyhow::Result<()>;
}

impl<F> MatchObserver for F
where
    F: Fn(&MatchEvent) -> anyhow::Result<()> + Send + Sync,
{
    fn on_event(&self, event: &MatchEvent) -> anyhow::Result<()> {
        self(event)
    }
}

/// Handle returned by a subscription, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

struct Registration {
    filter: Option<EventKind>,
    observer: Arc<dyn MatchObserver>,
}

/// Fan-out of engine events to registered observers and a broadcast stream.
pub struct EventHub {
    listeners: Mutex<IndexMap<SubscriptionId, Registration>>,
    sender: broadcast::Sender<MatchEvent>,
    next_id: AtomicU64,
}

impl EventHub {
    /// Construct a hub whose broadcast stream buffers `capacity` events per receiver.
    pub fn new(capacity: usize) -> Self {
        let (sender, _receiver) = broadcast::channel(capacity);
        Self {
            listeners: Mutex::new(IndexMap::new()),
            sender,
            next_id: AtomicU64::new(1),
        }
    }

    /// Register an observer for one event kind, or every kind when `filter` is `None`.
    pub fn subscribe(
        &self,
        filter: Option<EventKind>,
        observer: Arc<dyn MatchObserver>,
    ) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, Registration { filter, observer });
        id
    }

    /// Remove an observer; returns false when the id was unknown.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .shift_remove(&id)
            .is_some()
    }

    /// Register a new stream receiver that will get subsequent events.
    pub fn stream(&self) -> broadcast::Receiver<MatchEvent> {
        self.sender.subscribe()
    }

    /// Deliver `event` to every matching observer, then to the broadcast stream.
    ///
    /// Observers are called outside the registry lock so they may subscribe or
    /// unsubscribe while handling an event.
    pub fn emit(&self, event: MatchEvent) {
        let kind = event.kind();
        let targets: Vec<(SubscriptionId, Arc<dyn MatchObserver>)> = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(_, reg)| reg.filter.is_none_or(|filter| filter == kind))
            .map(|(id, reg)| (*id, reg.observer.clone()))
            .collect();

        for (id, observer) in targets {
            match catch_unwind(AssertUnwindSafe(|| observer.on_event(&event))) {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    warn!(subscription = %id, event = %kind, error = %err, "match observer failed");
                }
                Err(_) => {
                    error!(subscription = %id, event = %kind, "match observer panicked");
                }
            }
        }

        let _ = self.sender.send(event);
    }

    /// Emit a batch of events in order.
    pub fn emit_all(&self, events: impl IntoIterator<Item = MatchEvent>) {
        for event in events {
            self.emit(event);
        }
    }
}
