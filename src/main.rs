//! Wordmatch console host wiring the match engine to a JSON file store, the
//! optional remote word validator, and a stdin command loop.

use std::sync::Arc;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use wordmatch_back::{
    config::{AppConfig, FileStoreConfig},
    dao::{file::JsonFileStore, validator::WordValidator},
    services::MatchEngine,
    state::events::MatchEvent,
};

mod console;

use console::{Command, preferences_patch, score_sheet, settings_patch};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = AppConfig::load();
    let store_config = FileStoreConfig::from_env();
    info!(path = %store_config.path.display(), "using JSON file store");
    let store = Arc::new(JsonFileStore::from_config(&store_config));

    let engine = MatchEngine::hydrate(store, config, word_validator()?).await;
    engine.subscribe_all(log_event);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    println!("type `help` for the list of commands");
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line.context("reading stdin")?,
            _ = shutdown_signal() => None,
        };
        let Some(line) = line else {
            break;
        };

        match Command::parse_line(&line) {
            Ok(Some(Command::Quit)) => break,
            Ok(Some(command)) => {
                if let Err(err) = run(&engine, command).await {
                    warn!(error = %err, "command failed");
                }
            }
            Ok(None) => {}
            Err(err) => print!("{}", err.render()),
        }
    }

    info!("shutting down");
    Ok(())
}

async fn run(engine: &MatchEngine, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Start => engine.start_match().await,
        Command::Phase { kind } => engine.start_phase(kind).await,
        Command::Pause => engine.pause().await,
        Command::Resume => engine.resume().await,
        Command::Finish => engine.finish_phase().await,
        Command::Restart { kind, run } => engine.restart_phase(kind, run).await,
        Command::Skip { run } => engine.skip_to_creation(run).await,
        Command::Next => engine.next_round().await,
        Command::Scores { entries } => engine.add_round_scores(score_sheet(entries)).await,
        Command::Fix { round, entries } => {
            engine.update_round_scores(round, score_sheet(entries)).await
        }
        Command::Tiebreak { ids } => {
            engine
                .start_tie_break((!ids.is_empty()).then_some(ids))
                .await
        }
        Command::Winners { ids } => engine.declare_winners(ids).await,
        Command::Players { players } => engine.set_players(players).await?,
        Command::Names { names } => engine.set_player_names(names).await?,
        Command::Prefs { entries } => {
            let patch = preferences_patch(entries).context("invalid preferences")?;
            engine.apply_preferences(patch).await
        }
        Command::Settings { entries } => {
            let patch = settings_patch(entries).context("invalid settings")?;
            engine.apply_settings(patch).await
        }
        Command::Validate { word } => {
            let verdict = engine.validate_word(&word, None).await?;
            println!("{word}: {}", if verdict.valid { "valid" } else { "invalid" });
        }
        Command::State => {
            let state = engine.snapshot().await;
            println!(
                "{}",
                serde_json::to_string_pretty(&state).context("serializing match")?
            );
        }
        Command::Reset => engine.reset().await,
        Command::Quit => {}
    }
    Ok(())
}

/// Build the remote validator when `WORD_VALIDATOR_URL` is set.
#[cfg(feature = "remote-validator")]
fn word_validator() -> anyhow::Result<Option<Arc<dyn WordValidator>>> {
    use wordmatch_back::{config::ValidatorConfig, dao::remote_validator::HttpWordValidator};

    let Some(config) = ValidatorConfig::from_env() else {
        info!("no word validator configured");
        return Ok(None);
    };
    let validator = HttpWordValidator::new(config).context("building word validator")?;
    info!(endpoint = validator.endpoint(), "using remote word validator");
    Ok(Some(Arc::new(validator)))
}

#[cfg(not(feature = "remote-validator"))]
fn word_validator() -> anyhow::Result<Option<Arc<dyn WordValidator>>> {
    Ok(None)
}

fn log_event(event: &MatchEvent) -> anyhow::Result<()> {
    match event {
        MatchEvent::StateChange { .. } => {}
        MatchEvent::Tick { kind, remaining } => {
            debug!(kind = kind.as_str(), remaining, "tick");
        }
        other => {
            let payload = serde_json::to_string(other)?;
            info!(event = %other.kind(), %payload, "match event");
        }
    }
    Ok(())
}

/// Configure tracing subscribers so logs include spans by default.
fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,wordmatch_back=info".into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Resolve on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = term.recv() => {},
                }
            }
            Err(err) => {
                warn!(error = %err, "failed to install SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
