use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Which timed stage of a round a phase belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PhaseKind {
    /// Players plan their approach before building words.
    Strategy,
    /// Players build their words.
    Creation,
}

impl PhaseKind {
    /// Stable lowercase name used in the persisted phase string.
    pub fn as_str(self) -> &'static str {
        match self {
            PhaseKind::Strategy => "strategy",
            PhaseKind::Creation => "creation",
        }
    }
}

/// Progress of the countdown inside a round phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PhaseStatus {
    /// Duration loaded, countdown not started.
    Ready,
    /// Countdown ticking.
    Running,
    /// Countdown stopped with the remaining time preserved.
    Paused,
    /// Countdown reached zero or was skipped.
    Timeup,
}

impl PhaseStatus {
    fn as_str(self) -> &'static str {
        match self {
            PhaseStatus::Ready => "ready",
            PhaseStatus::Running => "run",
            PhaseStatus::Paused => "paused",
            PhaseStatus::Timeup => "timeup",
        }
    }
}

/// High-level phase of a match.
///
/// Persisted as the dashed names `config`, `strategy-run`, `creation-paused`,
/// `done` and so on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum Phase {
    /// Match is being configured and has not started yet.
    #[default]
    Config,
    /// A timed phase of the current round.
    Round {
        /// Strategy or creation.
        kind: PhaseKind,
        /// Countdown status.
        status: PhaseStatus,
    },
    /// Match finished; terminal.
    Done,
}

impl Phase {
    /// Shorthand for a round phase.
    pub const fn round(kind: PhaseKind, status: PhaseStatus) -> Self {
        Phase::Round { kind, status }
    }

    /// Kind of the current round phase, if any.
    pub fn kind(&self) -> Option<PhaseKind> {
        match self {
            Phase::Round { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// Countdown status of the current round phase, if any.
    pub fn status(&self) -> Option<PhaseStatus> {
        match self {
            Phase::Round { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Compute the phase reached by applying `command`, if the transition is valid.
    pub fn apply(self, command: PhaseCommand) -> Result<Phase, InvalidTransition> {
        use PhaseStatus::*;

        let next = match (self, command) {
            (_, PhaseCommand::Prepare(kind)) => Phase::round(kind, Ready),
            (Phase::Done, PhaseCommand::Start(_)) => {
                return Err(InvalidTransition {
                    from: self,
                    command,
                });
            }
            (_, PhaseCommand::Start(kind)) => Phase::round(kind, Running),
            (
                Phase::Round {
                    kind,
                    status: Running,
                },
                PhaseCommand::Pause,
            ) => Phase::round(kind, Paused),
            (
                Phase::Round {
                    kind,
                    status: Paused,
                },
                PhaseCommand::Resume,
            ) => Phase::round(kind, Running),
            (
                Phase::Round {
                    kind,
                    status: Running | Paused,
                },
                PhaseCommand::Finish,
            ) => Phase::round(kind, Timeup),
            (_, PhaseCommand::Complete) => Phase::Done,
            (from, command) => return Err(InvalidTransition { from, command }),
        };

        Ok(next)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Config => f.write_str("config"),
            Phase::Done => f.write_str("done"),
            Phase::Round { kind, status } => write!(f, "{}-{}", kind.as_str(), status.as_str()),
        }
    }
}

/// Error returned when a persisted phase name is not recognised.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown phase `{0}`")]
pub struct UnknownPhase(pub String);

impl FromStr for Phase {
    type Err = UnknownPhase;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "config" => return Ok(Phase::Config),
            "done" => return Ok(Phase::Done),
            _ => {}
        }

        let unknown = || UnknownPhase(value.to_string());
        let (kind, status) = value.split_once('-').ok_or_else(unknown)?;
        let kind = match kind {
            "strategy" => PhaseKind::Strategy,
            "creation" => PhaseKind::Creation,
            _ => return Err(unknown()),
        };
        let status = match status {
            "ready" => PhaseStatus::Ready,
            "run" => PhaseStatus::Running,
            "paused" => PhaseStatus::Paused,
            "timeup" => PhaseStatus::Timeup,
            _ => return Err(unknown()),
        };

        Ok(Phase::round(kind, status))
    }
}

impl From<Phase> for String {
    fn from(value: Phase) -> Self {
        value.to_string()
    }
}

impl TryFrom<String> for Phase {
    type Error = UnknownPhase;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Commands that move the phase state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseCommand {
    /// Load a phase with its full duration without starting the countdown.
    Prepare(PhaseKind),
    /// Start the countdown of a phase.
    Start(PhaseKind),
    /// Stop the countdown, keeping the remaining time.
    Pause,
    /// Restart the countdown from the preserved remaining time.
    Resume,
    /// Countdown expired or was skipped.
    Finish,
    /// End the match.
    Complete,
}

/// Error returned when attempting to apply an invalid transition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid transition: {command:?} cannot be applied while in {from}")]
pub struct InvalidTransition {
    /// The phase the match was in when the command was received.
    pub from: Phase,
    /// The command that cannot be applied from this phase.
    pub command: PhaseCommand,
}
