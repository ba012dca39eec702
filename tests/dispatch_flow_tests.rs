//! End-to-End Move Resolution Tests
//!
//! Exercises the book and dispatch crates together the way the service
//! wires them: a book directory on disk, a personality registry, a worker
//! pool on the in-memory broker and a dispatch client in front of it.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use move_dispatch::{
    ClockTiers, DispatchClient, DispatchConfig, DispatchError, DispatchResult, EngineAdapter,
    EngineSettings, MemoryBroker, MoveRequest, MoveResult, PersonalityRegistry, ResultKind,
    WorkerPool,
};
use polybook::{book_move, encode_moves, BookError, BookRecord, Fingerprint, WeightedSelector};

const START_KEY: u64 = 0x463b96181691fc9c;

const PERSONALITIES: &str = r#"{
    "Wizard": {"name": "Wizard", "ponder": "normal", "book": "Strong.bin", "rating": 2750,
               "out": {"cfd": "-15", "tts": "1048576"}},
    "Broken": {"name": "Broken", "ponder": "easy", "book": "Corrupt.bin", "rating": 1200}
}"#;

/// Packed Polyglot code for a plain coordinate move
fn pack(uci: &str) -> u16 {
    let b = uci.as_bytes();
    let sq = |f: u8, r: u8| u16::from(f - b'a') | (u16::from(r - b'1') << 3);
    sq(b[2], b[3]) | (sq(b[0], b[1]) << 6)
}

fn record(key: u64, uci: &str, weight: u16) -> BookRecord {
    BookRecord {
        fingerprint: Fingerprint(key),
        mv: pack(uci),
        weight,
        learn: 0,
    }
}

fn write_book(dir: &Path, name: &str, records: &[BookRecord]) {
    let bytes: Vec<u8> = records.iter().flat_map(|r| r.to_bytes()).collect();
    std::fs::write(dir.join(name), bytes).unwrap();
}

/// Engine that echoes the budget it was given in the `time` field
struct BudgetEcho;

#[async_trait]
impl EngineAdapter for BudgetEcho {
    async fn resolve(&self, settings: &EngineSettings) -> DispatchResult<MoveResult> {
        Ok(MoveResult {
            depth: Some(10),
            eval: Some(-40),
            time: Some(settings.clock_budget.as_millis() as i64),
            algebra_move: Some("Nc3".to_string()),
            ..MoveResult::default()
        })
    }
}

async fn service(books: &Path, workers: usize) -> (DispatchClient, WorkerPool) {
    let config = Arc::new(DispatchConfig {
        book_dir: books.to_path_buf(),
        workers,
        fetch_wait: Duration::from_millis(20),
        ..DispatchConfig::default()
    });
    let registry =
        PersonalityRegistry::from_json(PERSONALITIES, ClockTiers::default()).unwrap();
    let broker = Arc::new(MemoryBroker::new());

    let pool = WorkerPool::spawn(
        broker.clone(),
        Arc::clone(&config),
        Arc::new(registry),
        |_| Arc::new(BudgetEcho) as Arc<dyn EngineAdapter>,
    )
    .await
    .unwrap();
    let client = DispatchClient::connect(broker, config).await.unwrap();
    (client, pool)
}

#[test]
fn test_zero_weight_never_chosen() {
    let dir = tempfile::tempdir().unwrap();
    write_book(
        dir.path(),
        "Strong.bin",
        &[
            record(START_KEY, "e2e4", 0),
            record(START_KEY, "d2d4", 3),
            record(START_KEY, "c2c4", 0),
            record(START_KEY, "g1f3", 1),
        ],
    );

    let mut selector = WeightedSelector::seeded(2024);
    for _ in 0..500 {
        let mv = book_move::<&str, _>(&[], dir.path(), "Strong.bin", &mut selector).unwrap();
        assert!(
            mv.uci == "d2d4" || mv.uci == "g1f3",
            "Zero-weight move {} was chosen",
            mv.uci
        );
    }
}

#[test]
fn test_single_candidate_is_deterministic() {
    let dir = tempfile::tempdir().unwrap();
    write_book(dir.path(), "Strong.bin", &[record(START_KEY, "e2e4", 9)]);

    for seed in 0..20 {
        let mut selector = WeightedSelector::seeded(seed);
        let mv = book_move::<&str, _>(&[], dir.path(), "Strong.bin", &mut selector).unwrap();
        assert_eq!(mv.uci, "e2e4");
    }
}

#[test]
fn test_fingerprint_is_stable_across_notations() {
    let san = encode_moves(&["e4", "d5", "e5", "f5"]).unwrap();
    let uci = encode_moves(&["e2e4", "d7d5", "e4e5", "f7f5"]).unwrap();

    assert_eq!(san.fingerprint, uci.fingerprint);
    assert_eq!(san.fingerprint.as_u64(), 0x22a48b5a8e47ff78);
    assert_eq!(san.fen, uci.fen);
}

#[test]
fn test_truncated_book_is_format_error() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("Corrupt.bin"), [0u8; 33]).unwrap();

    let mut selector = WeightedSelector::seeded(1);
    let err = book_move::<&str, _>(&[], dir.path(), "Corrupt.bin", &mut selector).unwrap_err();
    assert!(matches!(err, BookError::Format { len: 33, .. }), "got {err:?}");
}

#[tokio::test]
async fn test_start_position_resolves_from_book() {
    let dir = tempfile::tempdir().unwrap();
    write_book(dir.path(), "Strong.bin", &[record(START_KEY, "e2e4", 1)]);
    let (client, pool) = service(dir.path(), 1).await;

    let result = client
        .resolve_default(&MoveRequest::new("opening", "Wizard", Vec::<String>::new()))
        .await
        .unwrap();

    assert_eq!(result.kind, ResultKind::Book);
    assert_eq!(result.coordinate_move.as_deref(), Some("e2e4"));
    assert!(result.err.is_none());
    pool.shutdown().await;
}

#[tokio::test]
async fn test_out_of_book_goes_to_engine() {
    let dir = tempfile::tempdir().unwrap();
    write_book(dir.path(), "Strong.bin", &[record(START_KEY, "e2e4", 1)]);

    let moves = ["d2d4", "e7e6", "e2e4", "d7d5", "a2a3"];
    let mut selector = WeightedSelector::seeded(7);
    let err = book_move(&moves, dir.path(), "Strong.bin", &mut selector).unwrap_err();
    assert!(err.is_no_book_move());

    let (client, pool) = service(dir.path(), 1).await;
    let result = client
        .resolve_default(&MoveRequest::new("middle", "Wizard", moves))
        .await
        .unwrap();

    assert_eq!(result.kind, ResultKind::Engine);
    assert_eq!(result.algebra_move.as_deref(), Some("Nc3"));
    assert_eq!(
        result.time,
        Some(ClockTiers::default().grandmaster.as_millis() as i64),
        "Rated 2750 gets the grandmaster budget"
    );
    assert!(!result.will_accept_draw, "Only five plies played");
    pool.shutdown().await;
}

#[tokio::test]
async fn test_corrupt_book_is_reported_not_fatal() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("Corrupt.bin"), [7u8; 33]).unwrap();
    let (client, pool) = service(dir.path(), 1).await;

    let result = client
        .resolve_default(&MoveRequest::new("corrupt", "Broken", ["e2e4"]))
        .await
        .unwrap();
    assert_eq!(result.kind, ResultKind::Book);
    assert!(result.err.as_deref().unwrap_or_default().contains("multiple of 16"));

    // Same worker keeps serving
    let result = client
        .resolve_default(&MoveRequest::new("after", "Broken", ["e2e4"]).skipping_book())
        .await
        .unwrap();
    assert!(result.is_success());
    pool.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_timeout_waits_for_the_full_deadline() {
    let client = DispatchClient::connect(
        Arc::new(MemoryBroker::new()),
        Arc::new(DispatchConfig::default()),
    )
    .await
    .unwrap();

    let started = tokio::time::Instant::now();
    let err = client
        .resolve(
            &MoveRequest::new("nobody", "Wizard", ["e2e4"]),
            Duration::from_secs(60),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, DispatchError::Timeout { .. }));
    assert_eq!(err.status_code(), 504);
    assert!(started.elapsed() >= Duration::from_secs(60));
}

#[tokio::test]
async fn test_concurrent_games_do_not_cross() {
    let dir = tempfile::tempdir().unwrap();
    write_book(dir.path(), "Strong.bin", &[record(START_KEY, "e2e4", 1)]);
    let (client, pool) = service(dir.path(), 2).await;

    let book_game = MoveRequest::new("white", "Wizard", Vec::<String>::new());
    let engine_game = MoveRequest::new("black", "Wizard", ["e2e4"]);
    let (a, b) = tokio::join!(
        client.resolve_default(&book_game),
        client.resolve_default(&engine_game)
    );

    let (a, b) = (a.unwrap(), b.unwrap());
    assert_eq!(a.game_id.as_deref(), Some("white"));
    assert_eq!(a.kind, ResultKind::Book);
    assert_eq!(b.game_id.as_deref(), Some("black"));
    assert_eq!(b.kind, ResultKind::Engine);
    pool.shutdown().await;
}
