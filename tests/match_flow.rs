use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use serde_json::json;
use tokio::time::sleep;
use wordmatch_back::{
    config::AppConfig,
    dao::{
        file::JsonFileStore,
        memory::MemoryStore,
        store::{MatchStore, StoredProfile},
    },
    services::MatchEngine,
    state::{
        events::{EventKind, MatchEvent},
        phase::{Phase, PhaseKind},
        preferences::{MatchMode, PreferencesPatch},
    },
};

async fn engine_with(patch: PreferencesPatch) -> (MatchEngine, MemoryStore) {
    let store = MemoryStore::new();
    let engine = MatchEngine::hydrate(Arc::new(store.clone()), AppConfig::default(), None).await;
    engine.apply_preferences(patch).await;
    (engine, store)
}

fn count(engine: &MatchEngine, kind: EventKind) -> Arc<Mutex<usize>> {
    let counter = Arc::new(Mutex::new(0));
    let sink = counter.clone();
    engine.subscribe(kind, move |_: &MatchEvent| -> anyhow::Result<()> {
        *sink.lock().unwrap() += 1;
        Ok(())
    });
    counter
}

#[tokio::test]
async fn rounds_mode_without_tie_ends_at_target() {
    let (engine, _) = engine_with(PreferencesPatch {
        rounds_target: Some(3),
        ..PreferencesPatch::default()
    })
    .await;
    engine.start_match().await;

    for round in 1..=3 {
        assert!(!engine.snapshot().await.match_over, "ended before round {round}");
        engine.add_round_scores([("p1", 10), ("p2", 5)]).await;
    }

    let state = engine.snapshot().await;
    assert!(state.match_over);
    assert_eq!(state.phase, Phase::Done);
    assert_eq!(state.winner_ids, ["p1"]);
    assert_eq!(state.players[0].score, 30);
    assert_eq!(state.players[1].score, 15);
}

#[tokio::test]
async fn points_mode_ends_as_soon_as_one_player_crosses() {
    let (engine, _) = engine_with(PreferencesPatch {
        mode: Some(MatchMode::Points),
        points_target: Some(100),
        rounds_target: Some(10),
        ..PreferencesPatch::default()
    })
    .await;
    engine.start_match().await;

    engine.add_round_scores([("p1", 60), ("p2", 20)]).await;
    assert!(!engine.snapshot().await.match_over);
    engine.add_round_scores([("p1", 45), ("p2", 20)]).await;

    let state = engine.snapshot().await;
    assert!(state.match_over);
    assert_eq!(state.round, 2);
    assert_eq!(state.winner_ids, ["p1"]);
}

#[tokio::test]
async fn tie_at_target_waits_then_tie_break_decides() {
    let (engine, _) = engine_with(PreferencesPatch {
        rounds_target: Some(2),
        ..PreferencesPatch::default()
    })
    .await;
    let finished = count(&engine, EventKind::MatchFinished);
    engine.start_match().await;

    engine.add_round_scores([("p1", 10), ("p2", 8)]).await;
    engine.add_round_scores([("p1", 4), ("p2", 6)]).await;

    let state = engine.snapshot().await;
    assert!(!state.match_over);
    let pending = state.tie_break_pending.expect("tie should be pending");
    assert_eq!(pending.players, ["p1", "p2"]);
    assert_eq!(pending.mode, MatchMode::Rounds);

    engine.start_tie_break(None).await;
    let state = engine.snapshot().await;
    assert_eq!(state.round, 3);
    assert_eq!(state.phase.to_string(), "strategy-ready");
    assert_eq!(state.tie_break.as_ref().map(|t| t.index), Some(1));
    assert!(state.tie_break_pending.is_none());

    engine.add_round_scores([("p1", 2), ("p2", 7)]).await;
    let state = engine.snapshot().await;
    assert!(state.match_over);
    assert_eq!(state.winner_ids, ["p2"]);
    assert!(state.tie_break.is_none());
    assert_eq!(*finished.lock().unwrap(), 1);
}

#[tokio::test]
async fn repeated_ties_cascade_into_further_tie_breaks() {
    let (engine, _) = engine_with(PreferencesPatch {
        player_count: Some(3),
        rounds_target: Some(1),
        ..PreferencesPatch::default()
    })
    .await;
    let starts = count(&engine, EventKind::TieBreakStart);
    engine.start_match().await;

    engine.add_round_scores([("p1", 6), ("p2", 6), ("p3", 1)]).await;
    engine.start_tie_break(None).await;
    engine.add_round_scores([("p1", 3), ("p2", 3), ("p3", 9)]).await;

    let state = engine.snapshot().await;
    assert!(!state.match_over);
    let decision = state.tie_break_pending.expect("tie should cascade");
    assert_eq!(decision.players, ["p1", "p2"]);

    engine.start_tie_break(None).await;
    let state = engine.snapshot().await;
    assert_eq!(state.round, 3);
    let tie_break = state.tie_break.expect("second tie-break");
    assert_eq!(tie_break.index, 2);
    assert_eq!(tie_break.players, ["p1", "p2"]);

    engine.add_round_scores([("p1", 0), ("p2", 1)]).await;
    let state = engine.snapshot().await;
    assert!(state.match_over);
    assert_eq!(state.winner_ids, ["p2"]);
    assert_eq!(*starts.lock().unwrap(), 2);
}

#[tokio::test]
async fn points_mode_tie_waits_for_a_decision() {
    let (engine, _) = engine_with(PreferencesPatch {
        mode: Some(MatchMode::Points),
        points_target: Some(50),
        ..PreferencesPatch::default()
    })
    .await;
    let pending = count(&engine, EventKind::TieBreakPending);
    engine.start_match().await;

    engine.add_round_scores([("p1", 60), ("p2", 60)]).await;

    let state = engine.snapshot().await;
    assert!(!state.match_over);
    let decision = state.tie_break_pending.expect("tie should be pending");
    assert_eq!(decision.mode, MatchMode::Points);
    assert_eq!(decision.players, ["p1", "p2"]);
    assert_eq!(*pending.lock().unwrap(), 1);
}

#[tokio::test]
async fn points_mode_only_the_top_qualified_score_wins() {
    let (engine, _) = engine_with(PreferencesPatch {
        player_count: Some(3),
        mode: Some(MatchMode::Points),
        points_target: Some(50),
        ..PreferencesPatch::default()
    })
    .await;
    engine.start_match().await;

    engine.add_round_scores([("p1", 55), ("p2", 80), ("p3", 10)]).await;

    let state = engine.snapshot().await;
    assert!(state.match_over);
    assert_eq!(state.winner_ids, ["p2"]);
    assert!(state.tie_break_pending.is_none());
}

#[tokio::test]
async fn scores_always_equal_round_history() {
    let (engine, _) = engine_with(PreferencesPatch {
        player_count: Some(3),
        rounds_target: Some(4),
        ..PreferencesPatch::default()
    })
    .await;
    engine.start_match().await;
    engine
        .add_round_scores(json!({ "p1": "7", "p2": 3.9, "p3": "nope" }))
        .await;
    engine.add_round_scores([("p1", -2), ("p3", 11)]).await;
    engine.update_round_scores(1, [("p3", 5)]).await;

    for player in engine.snapshot().await.players {
        let sum: i32 = player.rounds.iter().map(|entry| entry.points).sum();
        assert_eq!(player.score, sum, "{}", player.id);
    }
}

#[tokio::test(start_paused = true)]
async fn pause_and_resume_preserve_remaining_time() {
    let (engine, _) = engine_with(PreferencesPatch {
        strategy_seconds: Some(30),
        ..PreferencesPatch::default()
    })
    .await;
    engine.start_phase(PhaseKind::Strategy).await;

    sleep(Duration::from_millis(10_500)).await;
    engine.pause().await;
    let paused = engine.snapshot().await;
    assert_eq!(paused.phase.to_string(), "strategy-paused");
    assert_eq!(paused.remaining, 20);

    sleep(Duration::from_secs(120)).await;
    assert_eq!(engine.snapshot().await.remaining, 20);

    engine.resume().await;
    assert_eq!(engine.snapshot().await.remaining, 20);
    sleep(Duration::from_millis(5_500)).await;
    let state = engine.snapshot().await;
    assert_eq!(state.phase.to_string(), "strategy-run");
    assert_eq!(state.remaining, 15);
}

#[tokio::test(start_paused = true)]
async fn countdown_reaches_zero_exactly_once() {
    let (engine, _) = engine_with(PreferencesPatch {
        creation_seconds: Some(10),
        ..PreferencesPatch::default()
    })
    .await;
    let timeups = count(&engine, EventKind::Timeup);
    let ticks = count(&engine, EventKind::Tick);

    engine.start_phase(PhaseKind::Creation).await;
    sleep(Duration::from_secs(15)).await;
    engine.finish_phase().await;

    let state = engine.snapshot().await;
    assert_eq!(state.phase.to_string(), "creation-timeup");
    assert_eq!(state.remaining, 0);
    assert_eq!(*timeups.lock().unwrap(), 1);
    assert_eq!(*ticks.lock().unwrap(), 10);
}

#[tokio::test(start_paused = true)]
async fn every_tick_is_persisted() {
    let (engine, store) = engine_with(PreferencesPatch {
        strategy_seconds: Some(30),
        ..PreferencesPatch::default()
    })
    .await;
    let saved_remaining = |store: &MemoryStore| {
        store
            .profile()
            .match_state
            .and_then(|state| state["remaining"].as_u64())
    };

    engine.start_phase(PhaseKind::Strategy).await;
    assert_eq!(saved_remaining(&store), Some(30));

    sleep(Duration::from_millis(1_500)).await;
    assert_eq!(saved_remaining(&store), Some(29));
    sleep(Duration::from_secs(2)).await;
    assert_eq!(saved_remaining(&store), Some(27));
}

#[tokio::test(start_paused = true)]
async fn restarting_a_phase_replaces_the_countdown() {
    let (engine, _) = engine_with(PreferencesPatch {
        strategy_seconds: Some(20),
        ..PreferencesPatch::default()
    })
    .await;
    let ticks = count(&engine, EventKind::Tick);

    engine.start_phase(PhaseKind::Strategy).await;
    sleep(Duration::from_millis(5_500)).await;
    engine.restart_phase(PhaseKind::Strategy, true).await;
    sleep(Duration::from_millis(3_500)).await;

    assert_eq!(engine.snapshot().await.remaining, 17);
    assert_eq!(*ticks.lock().unwrap(), 8);
}

#[tokio::test(start_paused = true)]
async fn stream_receives_events_in_order() {
    let (engine, _) = engine_with(PreferencesPatch::default()).await;
    let mut events = engine.event_stream();

    engine.start_phase(PhaseKind::Strategy).await;
    engine.pause().await;

    let kinds: Vec<EventKind> = std::iter::from_fn(|| events.try_recv().ok())
        .map(|event| event.kind())
        .collect();
    assert_eq!(
        kinds,
        [
            EventKind::StateChange,
            EventKind::PhaseStart,
            EventKind::StateChange,
            EventKind::Paused,
        ]
    );
}

#[tokio::test]
async fn unsubscribed_observers_stop_receiving() {
    let (engine, _) = engine_with(PreferencesPatch::default()).await;
    let calls = Arc::new(Mutex::new(0));
    let sink = calls.clone();
    let id = engine.subscribe(EventKind::StateChange, move |_: &MatchEvent| -> anyhow::Result<()> {
        *sink.lock().unwrap() += 1;
        Ok(())
    });

    engine.start_match().await;
    assert!(engine.unsubscribe(id));
    assert!(!engine.unsubscribe(id));
    engine.next_round().await;

    assert_eq!(*calls.lock().unwrap(), 1);
}

#[tokio::test]
async fn failing_observer_does_not_block_others() {
    let (engine, _) = engine_with(PreferencesPatch::default()).await;
    engine.subscribe_all(|_: &MatchEvent| -> anyhow::Result<()> {
        anyhow::bail!("observer broke")
    });
    engine.subscribe_all(|_: &MatchEvent| -> anyhow::Result<()> { panic!("observer panicked") });
    let changes = count(&engine, EventKind::StateChange);

    engine.start_match().await;
    assert!(engine.snapshot().await.is_active);
    assert_eq!(*changes.lock().unwrap(), 1);
}

#[tokio::test]
async fn snapshots_are_detached_from_the_engine() {
    let (engine, _) = engine_with(PreferencesPatch::default()).await;
    let mut copy = engine.snapshot().await;
    copy.players[0].name = "Mallory".into();
    copy.round = 42;

    let state = engine.snapshot().await;
    assert_eq!(state.players[0].name, "Player 1");
    assert_eq!(state.round, 1);
}

#[tokio::test]
async fn partial_snapshot_is_backfilled_on_hydrate() {
    let store = MemoryStore::with_profile(StoredProfile {
        match_state: Some(json!({
            "isActive": true,
            "round": 2,
            "phase": "creation-run",
            "remaining": 999,
            "players": [
                { "id": "p1", "name": "Ann", "rounds": [{ "round": 1, "points": 4 }] },
                { "id": "p2", "name": "Bob", "score": 77 }
            ],
            "tieBreak": null
        })),
        ..StoredProfile::default()
    });

    let engine = MatchEngine::hydrate(Arc::new(store), AppConfig::default(), None).await;
    let state = engine.snapshot().await;
    assert_eq!(state.phase.to_string(), "creation-paused");
    assert_eq!(state.remaining, 120);
    assert_eq!(state.players[0].score, 4);
    assert_eq!(state.players[0].abbrev, "ANN");
    assert_eq!(state.players[1].score, 0);
    assert!(!state.players[0].color.is_empty());
    assert_ne!(state.players[0].color, state.players[1].color);
    assert_eq!(state.mode, MatchMode::Rounds);
}

#[tokio::test]
async fn file_store_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("match.json");

    let engine = MatchEngine::hydrate(
        Arc::new(JsonFileStore::new(&path)),
        AppConfig::default(),
        None,
    )
    .await;
    engine.set_player_names(vec!["Ann".into(), "Bob".into()]).await.unwrap();
    engine.start_match().await;
    engine.add_round_scores([("p1", 9), ("p2", 3)]).await;
    let before = engine.snapshot().await;
    drop(engine);

    let store = JsonFileStore::new(&path);
    assert_eq!(store.load().await.unwrap().known_names, ["Bob", "Ann"]);

    let engine = MatchEngine::hydrate(Arc::new(store), AppConfig::default(), None).await;
    let after = engine.snapshot().await;
    assert_eq!(after.match_id, before.match_id);
    assert_eq!(after.round, 2);
    assert_eq!(after.players[0].score, 9);
    assert_eq!(after.players[1].name, "Bob");
}
