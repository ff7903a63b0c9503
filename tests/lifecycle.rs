mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use common::{FailingStore, ScriptedFetcher};
use tailscan::checkpoint::{CheckpointStore, FileCheckpoints, MemoryCheckpoints};
use tailscan::config::ScanConfig;
use tailscan::lifecycle::{ExitReason, LifecycleState, Scanner};
use tailscan::record::ResultKind;
use tailscan::store::{JsonlResultStore, MemoryResultStore, ResultStore};
use tailscan::Error;

fn config(start: u64, floor: u64, batch_size: u64, workers: usize) -> ScanConfig {
    ScanConfig {
        workers,
        batch_size,
        base_wait: Duration::from_millis(100),
        poll_interval: Duration::from_millis(10),
        floor,
        start,
        ..Default::default()
    }
}

fn never() -> std::future::Pending<()> {
    std::future::pending()
}

#[tokio::test(start_paused = true)]
async fn scans_one_batch_down_to_floor() {
    let fetcher = Arc::new(ScriptedFetcher::new().with_assigned([995, 991]));
    let checkpoints = Arc::new(MemoryCheckpoints::new());
    let results = Arc::new(MemoryResultStore::new());
    let scanner = Scanner::new(
        config(1000, 990, 10, 3),
        fetcher.clone(),
        checkpoints.clone(),
        results.clone(),
    );

    let report = scanner.run(never()).await.unwrap();
    assert_eq!(report.reason, ExitReason::Exhausted);
    assert!(report.is_clean());
    assert_eq!(scanner.state(), LifecycleState::Stopped);
    assert_eq!(report.stats.assigned, 2);
    assert_eq!(report.stats.unassigned, 8);
    assert_eq!(report.checkpoint, Some(990));
    assert_eq!(checkpoints.get("tail").await.unwrap(), Some(990));

    let mut fetched: Vec<u64> = fetcher.calls().into_iter().map(|(id, _)| id).collect();
    fetched.sort_unstable();
    assert_eq!(fetched, (991..=1000).collect::<Vec<_>>());
    for id in 991..=1000 {
        assert!(results.contains(id).await.unwrap());
    }
    assert!(!results.contains(990).await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn multi_batch_scan_records_every_id_once() {
    let fetcher = Arc::new(ScriptedFetcher::new().with_assigned((0..200).filter(|i| i % 7 == 0)));
    let checkpoints = Arc::new(MemoryCheckpoints::new());
    let results = Arc::new(MemoryResultStore::new());
    let scanner = Scanner::new(
        config(200, 100, 8, 4),
        fetcher.clone(),
        checkpoints.clone(),
        results.clone(),
    );

    let report = scanner.run(never()).await.unwrap().into_result().unwrap();
    assert_eq!(report.reason, ExitReason::Exhausted);
    assert_eq!(results.len().await, 100);
    assert_eq!(report.stats.assigned + report.stats.unassigned, 100);
    assert_eq!(report.stats.duplicates, 0);
    assert_eq!(fetcher.calls().len(), 100);
    assert_eq!(
        results.kind_of(196).await.unwrap(),
        Some(ResultKind::Assigned)
    );
}

#[tokio::test(start_paused = true)]
async fn rerun_over_recorded_range_adds_nothing() {
    let checkpoints = Arc::new(MemoryCheckpoints::new());
    let results = Arc::new(MemoryResultStore::new());
    let first = Scanner::new(
        config(50, 20, 5, 2),
        Arc::new(ScriptedFetcher::new().with_assigned([40, 33])),
        checkpoints.clone(),
        results.clone(),
    );
    first.run(never()).await.unwrap().into_result().unwrap();
    let before = results.counts().await.unwrap();

    // Rewind and rescan without the recorded-id filter.
    checkpoints.set("tail", 50).await.unwrap();
    let cfg = ScanConfig {
        skip_recorded: false,
        ..config(50, 20, 5, 2)
    };
    let second = Scanner::new(
        cfg,
        Arc::new(ScriptedFetcher::new().with_assigned([40, 33])),
        checkpoints.clone(),
        results.clone(),
    );
    let report = second.run(never()).await.unwrap().into_result().unwrap();

    assert_eq!(results.counts().await.unwrap(), before);
    assert_eq!(report.stats.assigned + report.stats.unassigned, 0);
    assert_eq!(report.stats.duplicates, 30);
}

#[tokio::test(start_paused = true)]
async fn recorded_ids_are_not_fetched_again() {
    let checkpoints = Arc::new(MemoryCheckpoints::new());
    let results = Arc::new(MemoryResultStore::new());
    Scanner::new(
        config(30, 10, 5, 2),
        Arc::new(ScriptedFetcher::new()),
        checkpoints.clone(),
        results.clone(),
    )
    .run(never())
    .await
    .unwrap();

    checkpoints.set("tail", 30).await.unwrap();
    let fetcher = Arc::new(ScriptedFetcher::new());
    let report = Scanner::new(config(30, 10, 5, 2), fetcher.clone(), checkpoints, results)
        .run(never())
        .await
        .unwrap();
    assert_eq!(report.reason, ExitReason::Exhausted);
    assert!(fetcher.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn signal_cancels_in_flight_work_and_keeps_it_resumable() {
    let fetcher = Arc::new(ScriptedFetcher::new().hanging());
    let checkpoints = Arc::new(MemoryCheckpoints::new());
    let results = Arc::new(MemoryResultStore::new());
    let scanner = Scanner::new(
        config(500, 0, 10, 3),
        fetcher.clone(),
        checkpoints.clone(),
        results.clone(),
    );

    let shutdown = tokio::time::sleep(Duration::from_secs(5));
    let report = scanner.run(shutdown).await.unwrap();

    assert_eq!(report.reason, ExitReason::Signalled);
    assert!(report.is_clean());
    assert_eq!(scanner.state(), LifecycleState::Stopped);
    assert_eq!(fetcher.calls().len(), 3);
    assert!(results.is_empty().await);
    // Every claimed id was abandoned, so the scan resumes from the top.
    assert_eq!(report.checkpoint, Some(500));
    assert_eq!(checkpoints.get("tail").await.unwrap(), Some(500));
}

#[tokio::test(start_paused = true)]
async fn external_cancel_token_stops_the_scan() {
    let scanner = Scanner::new(
        config(500, 0, 10, 2),
        Arc::new(ScriptedFetcher::new().hanging()),
        Arc::new(MemoryCheckpoints::new()),
        Arc::new(MemoryResultStore::new()),
    );
    let token = scanner.cancel_token();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        token.cancel();
    });

    let report = scanner.run(never()).await.unwrap();
    assert_eq!(report.reason, ExitReason::Signalled);
}

#[tokio::test(start_paused = true)]
async fn store_failure_cancels_siblings() {
    let fetcher = Arc::new(ScriptedFetcher::new());
    let checkpoints = Arc::new(MemoryCheckpoints::new());
    let results = Arc::new(FailingStore::failing_on(95));
    let scanner = Scanner::new(
        config(100, 0, 10, 2),
        fetcher,
        checkpoints.clone(),
        results.clone(),
    );

    let report = scanner.run(never()).await.unwrap();
    assert_eq!(report.reason, ExitReason::Failed);
    assert!(matches!(report.errors[0], Error::Store { id: 95, .. }));
    assert_eq!(scanner.state(), LifecycleState::Stopped);
    // 95 never made it in, so the stored checkpoint must still cover it.
    let checkpoint = checkpoints.get("tail").await.unwrap().unwrap();
    assert!(checkpoint >= 95);
    assert!(!results.contains(95).await.unwrap());
    assert!(matches!(
        report.into_result(),
        Err(Error::Store { id: 95, .. })
    ));
}

#[tokio::test(start_paused = true)]
async fn fetch_failure_stays_pending_unless_halting() {
    let lenient = Scanner::new(
        config(20, 10, 5, 2),
        Arc::new(ScriptedFetcher::new().with_timeouts(15, 2)),
        Arc::new(MemoryCheckpoints::new()),
        Arc::new(MemoryResultStore::new()),
    );
    let report = lenient.run(never()).await.unwrap();
    assert_eq!(report.reason, ExitReason::Exhausted);
    assert_eq!(report.stats.failed_ids, vec![15]);
    assert_eq!(report.stats.unassigned, 9);
    // 15 was never acknowledged, so the scan resumes from it.
    assert_eq!(report.checkpoint, Some(15));

    let cfg = ScanConfig {
        halt_on_fetch_failure: true,
        ..config(20, 10, 5, 2)
    };
    let strict = Scanner::new(
        cfg,
        Arc::new(ScriptedFetcher::new().with_broken(15)),
        Arc::new(MemoryCheckpoints::new()),
        Arc::new(MemoryResultStore::new()),
    );
    let report = strict.run(never()).await.unwrap();
    assert_eq!(report.reason, ExitReason::Failed);
    assert!(matches!(report.errors[0], Error::Fetch { id: 15, .. }));
}

#[tokio::test(start_paused = true)]
async fn failed_id_is_fetched_again_after_restart() {
    let checkpoints = Arc::new(MemoryCheckpoints::new());
    let results = Arc::new(MemoryResultStore::new());
    let first = Scanner::new(
        config(20, 10, 5, 2),
        Arc::new(ScriptedFetcher::new().with_timeouts(15, 2)),
        checkpoints.clone(),
        results.clone(),
    );
    let report = first.run(never()).await.unwrap().into_result().unwrap();
    assert_eq!(report.stats.failed_ids, vec![15]);
    assert!(!results.contains(15).await.unwrap());
    assert_eq!(checkpoints.get("tail").await.unwrap(), Some(15));

    let fetcher = Arc::new(ScriptedFetcher::new().with_assigned([15]));
    let second = Scanner::new(
        config(20, 10, 5, 2),
        fetcher.clone(),
        checkpoints.clone(),
        results.clone(),
    );
    let report = second.run(never()).await.unwrap().into_result().unwrap();
    assert_eq!(report.reason, ExitReason::Exhausted);
    assert!(report.stats.failed_ids.is_empty());
    assert_eq!(report.stats.assigned, 1);
    // Only the failed id; everything below it is already recorded.
    assert_eq!(fetcher.calls().len(), 1);
    assert_eq!(fetcher.calls_for(15).len(), 1);
    assert_eq!(results.kind_of(15).await.unwrap(), Some(ResultKind::Assigned));
    assert_eq!(checkpoints.get("tail").await.unwrap(), Some(10));
}

#[tokio::test(start_paused = true)]
async fn exhausted_scan_reports_draining_while_workers_finish() {
    let mut fetcher = ScriptedFetcher::new();
    fetcher.hang.insert(91);
    let scanner = Scanner::new(
        config(100, 90, 10, 2),
        Arc::new(fetcher),
        Arc::new(MemoryCheckpoints::new()),
        Arc::new(MemoryResultStore::new()),
    );

    // Stops the scan as soon as draining is observed; 91 would hold it forever.
    let drained = Arc::new(AtomicBool::new(false));
    let seen = drained.clone();
    let mut states = scanner.subscribe();
    let shutdown = async move {
        tokio::select! {
            res = states.wait_for(|s| *s == LifecycleState::Draining) => {
                if res.is_ok() {
                    seen.store(true, Ordering::SeqCst);
                }
            }
            _ = tokio::time::sleep(Duration::from_secs(60)) => {}
        }
    };

    let report = scanner.run(shutdown).await.unwrap();
    assert!(drained.load(Ordering::SeqCst));
    assert_eq!(report.reason, ExitReason::Signalled);
    assert_eq!(scanner.state(), LifecycleState::Stopped);
    assert!(report.checkpoint.unwrap() >= 91);
}

#[tokio::test(start_paused = true)]
async fn scanner_runs_only_once() {
    let scanner = Scanner::new(
        config(10, 5, 5, 1),
        Arc::new(ScriptedFetcher::new()),
        Arc::new(MemoryCheckpoints::new()),
        Arc::new(MemoryResultStore::new()),
    );
    let mut states = scanner.subscribe();
    scanner.run(never()).await.unwrap();
    assert!(states.has_changed().unwrap());
    assert_eq!(*states.borrow_and_update(), LifecycleState::Stopped);
    assert!(matches!(
        scanner.run(never()).await,
        Err(Error::AlreadyStarted)
    ));
}

#[tokio::test(start_paused = true)]
async fn invalid_config_is_rejected_before_start() {
    let scanner = Scanner::new(
        config(10, 5, 5, 0),
        Arc::new(ScriptedFetcher::new()),
        Arc::new(MemoryCheckpoints::new()),
        Arc::new(MemoryResultStore::new()),
    );
    assert!(matches!(scanner.run(never()).await, Err(Error::Config(_))));
    assert_eq!(scanner.state(), LifecycleState::Idle);
}

#[tokio::test(start_paused = true)]
async fn interrupted_scan_resumes_from_file_checkpoint() {
    let dir = tempfile::tempdir().unwrap();
    let checkpoint_path = dir.path().join("checkpoints.json");
    let results_path = dir.path().join("results.jsonl");

    // First run: id 70 hangs, so the scan is interrupted with it unfinished.
    {
        let mut fetcher = ScriptedFetcher::new().with_assigned([88, 61]);
        fetcher.hang.insert(70);
        let scanner = Scanner::new(
            config(100, 40, 10, 2),
            Arc::new(fetcher),
            Arc::new(FileCheckpoints::open(&checkpoint_path).await.unwrap()),
            Arc::new(JsonlResultStore::open(&results_path).await.unwrap()),
        );
        let report = scanner
            .run(tokio::time::sleep(Duration::from_secs(30)))
            .await
            .unwrap();
        assert_eq!(report.reason, ExitReason::Signalled);
        assert!(report.checkpoint.unwrap() >= 70);
    }

    // Restart against the same files.
    let checkpoints = Arc::new(FileCheckpoints::open(&checkpoint_path).await.unwrap());
    let results = Arc::new(JsonlResultStore::open(&results_path).await.unwrap());
    let scanner = Scanner::new(
        config(100, 40, 10, 2),
        Arc::new(ScriptedFetcher::new().with_assigned([88, 61])),
        checkpoints.clone(),
        results.clone(),
    );
    let report = scanner.run(never()).await.unwrap().into_result().unwrap();
    assert_eq!(report.reason, ExitReason::Exhausted);
    assert_eq!(checkpoints.get("tail").await.unwrap(), Some(40));

    for id in 41..=100 {
        assert!(results.contains(id).await.unwrap(), "id {id} missing");
    }
    let counts = results.counts().await.unwrap();
    assert_eq!(counts.assigned, 2);
    assert_eq!(counts.unassigned, 58);
    let lines = std::fs::read_to_string(&results_path).unwrap();
    assert_eq!(lines.lines().count(), 60);
}
