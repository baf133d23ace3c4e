//! Line-oriented commands understood by the console host.

use clap::{Parser, Subcommand};
use serde_json::{Map, Value};
use wordmatch_back::{
    dto::player::PlayerInput,
    state::{
        phase::PhaseKind,
        preferences::{PreferencesPatch, SettingsPatch},
        scoring::ScoreSheet,
    },
};

/// One console input line; the first word names the command.
#[derive(Parser, Debug)]
#[command(multicall = true)]
pub struct ConsoleLine {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start a new match
    Start,
    /// Start a phase countdown
    Phase {
        #[arg(value_parser = parse_kind)]
        kind: PhaseKind,
    },
    /// Pause the running countdown
    Pause,
    /// Resume a paused countdown
    Resume,
    /// End the current countdown now
    Finish,
    /// Reset a phase to its full duration
    Restart {
        #[arg(value_parser = parse_kind)]
        kind: PhaseKind,
        /// Start the countdown right away
        #[arg(long)]
        run: bool,
    },
    /// Jump to the creation phase
    Skip {
        /// Start the countdown right away
        #[arg(long)]
        run: bool,
    },
    /// Move to the next round
    Next,
    /// Score the current round
    Scores {
        /// `id=points` pairs
        #[arg(value_parser = parse_pair)]
        entries: Vec<(String, Value)>,
    },
    /// Correct a round already played
    Fix {
        round: u32,
        /// `id=points` pairs
        #[arg(value_parser = parse_pair, required = true)]
        entries: Vec<(String, Value)>,
    },
    /// Start a tie-break round
    Tiebreak { ids: Vec<String> },
    /// End the match with these winners
    Winners {
        #[arg(required = true)]
        ids: Vec<String>,
    },
    /// Replace the roster
    Players {
        /// `name` or `name:#rrggbb`
        #[arg(value_parser = parse_player, required = true)]
        players: Vec<PlayerInput>,
    },
    /// Rename players slot by slot
    Names {
        #[arg(required = true)]
        names: Vec<String>,
    },
    /// Update game preferences
    Prefs {
        /// `key=value` pairs, e.g. `mode=POINTS pointsTarget=50`
        #[arg(value_parser = parse_pair, required = true)]
        entries: Vec<(String, Value)>,
    },
    /// Update application settings
    Settings {
        /// `key=value` pairs, e.g. `language=fr`
        #[arg(value_parser = parse_pair, required = true)]
        entries: Vec<(String, Value)>,
    },
    /// Check a word
    Validate { word: String },
    /// Print the match as JSON
    State,
    /// Discard the match
    Reset,
    /// Leave the console
    #[command(alias = "exit")]
    Quit,
}

impl Command {
    /// Parse one input line; `Ok(None)` for blank lines.
    ///
    /// `help` and malformed lines come back as a [`clap::Error`] whose
    /// rendering is the text to show.
    pub fn parse_line(line: &str) -> Result<Option<Self>, clap::Error> {
        let words: Vec<&str> = line.split_whitespace().collect();
        if words.is_empty() {
            return Ok(None);
        }
        ConsoleLine::try_parse_from(words).map(|parsed| Some(parsed.command))
    }
}

/// Collect `key=value` pairs into a JSON object.
pub fn object(entries: Vec<(String, Value)>) -> Value {
    Value::Object(entries.into_iter().collect::<Map<_, _>>())
}

/// Score sheet from `id=points` pairs; non-numeric points count as zero.
pub fn score_sheet(entries: Vec<(String, Value)>) -> ScoreSheet {
    ScoreSheet::from(object(entries))
}

pub fn preferences_patch(entries: Vec<(String, Value)>) -> serde_json::Result<PreferencesPatch> {
    serde_json::from_value(object(entries))
}

pub fn settings_patch(entries: Vec<(String, Value)>) -> serde_json::Result<SettingsPatch> {
    serde_json::from_value(object(entries))
}

fn parse_kind(arg: &str) -> Result<PhaseKind, String> {
    match arg {
        "strategy" => Ok(PhaseKind::Strategy),
        "creation" => Ok(PhaseKind::Creation),
        other => Err(format!("unknown phase `{other}`; expected strategy or creation")),
    }
}

fn parse_player(entry: &str) -> Result<PlayerInput, String> {
    Ok(match entry.split_once(':') {
        Some((name, color)) => PlayerInput {
            name: name.to_string(),
            color: Some(color.to_string()),
        },
        None => PlayerInput::named(entry),
    })
}

/// Values are read as JSON when they parse (`true`, `12`) and kept as
/// strings otherwise (`POINTS`).
fn parse_pair(arg: &str) -> Result<(String, Value), String> {
    let (key, raw) = arg
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got `{arg}`"))?;
    let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
    Ok((key.to_string(), value))
}
