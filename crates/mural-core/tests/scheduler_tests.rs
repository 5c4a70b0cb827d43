//! Dispatcher behaviour against a scripted writer

use chrono::{TimeDelta, Utc};
use mural_canvas::Point;
use mural_core::{Liveness, TransportError, WriteOutcome};
use mural_test_utils::{
    dispatcher, mark_ready, observe, row_canvas, test_config, Reply, RecordingSessions,
    ScriptedWriter, BLUE, RED, WHITE,
};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

fn far_future() -> chrono::DateTime<Utc> {
    Utc::now() + TimeDelta::hours(1)
}

#[tokio::test]
async fn two_points_two_agents_each_get_one() {
    let canvas = row_canvas(&[RED, BLUE]);
    mark_ready(&canvas);
    let writer = ScriptedWriter::new();
    let dispatcher = dispatcher(canvas, writer.clone(), &test_config(), &["alice", "bob"]);

    for agent in dispatcher.agents() {
        agent.set_cooldown(far_future());
    }
    let report = dispatcher.tick(Utc::now());

    assert_eq!(report.diff_size, 2);
    assert_eq!(report.assigned, 2);
    assert_eq!(report.cooling, 2);
    assert_eq!(report.writes_issued, 0);
    for agent in dispatcher.agents() {
        assert_eq!(agent.queue().len(), 1, "agent {}", agent.username());
    }
    assert!(writer.calls().is_empty());
}

#[tokio::test]
async fn eligible_agents_write_one_pixel_each() {
    let canvas = row_canvas(&[RED, BLUE]);
    mark_ready(&canvas);
    let writer = ScriptedWriter::new();
    let dispatcher = dispatcher(canvas, writer.clone(), &test_config(), &["alice", "bob"]);

    let now = Utc::now();
    let report = dispatcher.tick(now);
    assert_eq!(report.writes_issued, 2);

    let reports = dispatcher.drain().await;
    assert_eq!(reports.len(), 2);
    assert!(reports
        .iter()
        .all(|r| r.outcome == Some(WriteOutcome::Success) && r.attempts == 1));

    let mut written: Vec<(Point, u8)> = writer
        .calls()
        .iter()
        .map(|r| (r.local, r.color_index))
        .collect();
    written.sort();
    assert_eq!(written, vec![(Point::new(0, 0), 2), (Point::new(1, 0), 3)]);
    assert_eq!(writer.calls_for("alice").len(), 1);
    assert_eq!(writer.calls_for("bob").len(), 1);

    for agent in dispatcher.agents() {
        let waited = (agent.cooldown() - now).num_milliseconds();
        assert!((300_000..361_000).contains(&waited), "waited {waited}ms");
        assert!(agent.queue().is_empty());
    }
}

#[tokio::test]
async fn empty_diff_is_a_noop() {
    let canvas = row_canvas(&[WHITE]);
    mark_ready(&canvas);
    observe(&canvas, Point::new(0, 0), WHITE);
    let writer = ScriptedWriter::new();
    let dispatcher = dispatcher(canvas, writer.clone(), &test_config(), &["alice"]);

    let report = dispatcher.tick(Utc::now());
    assert_eq!(report.diff_size, 0);
    assert_eq!(report.writes_issued, 0);
    assert!(writer.calls().is_empty());
}

#[tokio::test]
async fn cooling_agent_is_skipped() {
    let canvas = row_canvas(&[RED]);
    mark_ready(&canvas);
    let writer = ScriptedWriter::new();
    let dispatcher = dispatcher(canvas, writer.clone(), &test_config(), &["alice"]);
    let alice = dispatcher.agent("alice").unwrap();
    alice.set_cooldown(far_future());

    let report = dispatcher.tick(Utc::now());
    assert_eq!(report.cooling, 1);
    assert_eq!(report.writes_issued, 0);
    assert_eq!(alice.queue().len(), 1);

    // Work stays queued rather than duplicated on later ticks
    let report = dispatcher.tick(Utc::now());
    assert_eq!(report.assigned, 0);
    assert_eq!(alice.queue().len(), 1);
}

#[tokio::test]
async fn busy_agent_is_skipped() {
    let canvas = row_canvas(&[RED]);
    mark_ready(&canvas);
    let writer = ScriptedWriter::new();
    let dispatcher = dispatcher(canvas, writer.clone(), &test_config(), &["alice"]);
    let alice = dispatcher.agent("alice").unwrap();

    let permit = alice.try_begin_write().unwrap();
    let report = dispatcher.tick(Utc::now());
    assert_eq!(report.busy, 1);
    assert_eq!(report.writes_issued, 0);

    drop(permit);
    let report = dispatcher.tick(Utc::now());
    assert_eq!(report.writes_issued, 1);
    dispatcher.drain().await;
}

#[tokio::test]
async fn rate_limit_moves_cooldown_to_server_time() {
    let canvas = row_canvas(&[RED]);
    mark_ready(&canvas);
    let writer = ScriptedWriter::new();
    let server = Utc::now() + TimeDelta::minutes(10);
    writer.script("alice", [Reply::rate_limited(server.timestamp_millis())]);
    let dispatcher = dispatcher(canvas, writer.clone(), &test_config(), &["alice"]);

    dispatcher.tick(Utc::now());
    let reports = dispatcher.drain().await;
    assert!(matches!(
        reports[0].outcome,
        Some(WriteOutcome::RateLimited { next_available: Some(_) })
    ));

    let alice = dispatcher.agent("alice").unwrap();
    let offset = (alice.cooldown() - server).num_milliseconds();
    assert!((0..60_000).contains(&offset), "offset {offset}ms");
    assert!(alice.is_live());
    assert_eq!(writer.calls().len(), 1);
}

#[tokio::test]
async fn ban_sentinel_retires_agent_and_frees_its_work() {
    let canvas = row_canvas(&[RED, BLUE, RED]);
    mark_ready(&canvas);
    let writer = ScriptedWriter::new();
    writer.script("alice", [Reply::banned()]);
    let dispatcher = dispatcher(canvas, writer.clone(), &test_config(), &["alice", "bob"]);

    let report = dispatcher.tick(Utc::now());
    assert_eq!(report.assigned, 3);
    dispatcher.drain().await;

    let alice = dispatcher.agent("alice").unwrap();
    assert_eq!(alice.liveness(), Liveness::Banned);
    assert!(alice.queue().is_empty());

    let report = dispatcher.tick(Utc::now());
    assert_eq!(report.live_agents, 1);
    let bob = dispatcher.agent("bob").unwrap();
    assert!(bob.queue().contains(Point::new(0, 0)));
    assert!(bob.queue().contains(Point::new(2, 0)));
    assert_eq!(writer.calls_for("alice").len(), 1);
    assert_eq!(dispatcher.stats().banned, 1);
}

#[tokio::test]
async fn unverified_agent_is_retired() {
    let canvas = row_canvas(&[RED]);
    mark_ready(&canvas);
    let writer = ScriptedWriter::new();
    writer.script("alice", [Reply::unverified()]);
    let dispatcher = dispatcher(canvas, writer.clone(), &test_config(), &["alice"]);

    dispatcher.tick(Utc::now());
    dispatcher.drain().await;

    assert_eq!(
        dispatcher.agent("alice").unwrap().liveness(),
        Liveness::Unverified
    );
    let report = dispatcher.tick(Utc::now());
    assert_eq!(report.live_agents, 0);
    assert_eq!(report.writes_issued, 0);
}

#[tokio::test]
async fn transport_failure_is_retried_once_after_reestablishing() {
    let canvas = row_canvas(&[RED]);
    mark_ready(&canvas);
    let writer = ScriptedWriter::new();
    writer.script(
        "alice",
        [Reply::Fail(TransportError::Send("reset".into())), Reply::placed()],
    );
    let sessions = Arc::new(RecordingSessions::default());
    let dispatcher = dispatcher(canvas, writer.clone(), &test_config(), &["alice"])
        .with_sessions(sessions.clone());

    dispatcher.tick(Utc::now());
    let reports = dispatcher.drain().await;

    assert_eq!(reports[0].attempts, 2);
    assert_eq!(reports[0].outcome, Some(WriteOutcome::Success));
    assert_eq!(writer.calls_for("alice").len(), 2);
    assert_eq!(sessions.reestablished(), vec!["alice".to_string()]);
}

#[tokio::test]
async fn failed_retry_defers_to_next_tick() {
    let canvas = row_canvas(&[RED]);
    mark_ready(&canvas);
    let writer = ScriptedWriter::new();
    writer.script(
        "alice",
        [
            Reply::Fail(TransportError::Closed),
            Reply::Fail(TransportError::Closed),
        ],
    );
    let dispatcher = dispatcher(canvas, writer.clone(), &test_config(), &["alice"]);

    let now = Utc::now();
    dispatcher.tick(now);
    let reports = dispatcher.drain().await;
    assert_eq!(reports[0].attempts, 2);
    assert_eq!(
        reports[0].outcome,
        Some(WriteOutcome::TransportFailure(TransportError::Closed))
    );

    let alice = dispatcher.agent("alice").unwrap();
    assert!(alice.is_live());
    assert!(alice.is_eligible(Utc::now()));

    // The point is still in the diff and goes out again
    let report = dispatcher.tick(Utc::now());
    assert_eq!(report.writes_issued, 1);
    let reports = dispatcher.drain().await;
    assert_eq!(reports[0].outcome, Some(WriteOutcome::Success));
    assert_eq!(writer.calls().len(), 3);
}

#[tokio::test]
async fn write_timeout_counts_as_transport_failure() {
    let canvas = row_canvas(&[RED]);
    mark_ready(&canvas);
    let writer = ScriptedWriter::new();
    writer.script("alice", [Reply::Hang, Reply::Hang]);
    let config = test_config().with_write_timeout(Duration::from_millis(50));
    let dispatcher = dispatcher(canvas, writer.clone(), &config, &["alice"]);

    dispatcher.tick(Utc::now());
    let reports = dispatcher.drain().await;
    assert_eq!(
        reports[0].outcome,
        Some(WriteOutcome::TransportFailure(TransportError::Timeout {
            after_ms: 50
        }))
    );
    assert_eq!(dispatcher.stats().transport_failures, 1);
}

#[tokio::test]
async fn full_queue_defers_assignment() {
    let canvas = row_canvas(&[RED, RED, BLUE, BLUE, RED]);
    mark_ready(&canvas);
    let writer = ScriptedWriter::new();
    let config = test_config().with_queue_capacity(2);
    let dispatcher = dispatcher(canvas, writer.clone(), &config, &["alice"]);
    dispatcher.agent("alice").unwrap().set_cooldown(far_future());

    let report = dispatcher.tick(Utc::now());
    assert_eq!(report.assigned, 2);
    assert_eq!(report.deferred, 3);
    assert_eq!(dispatcher.agent("alice").unwrap().queue().len(), 2);
}

#[tokio::test]
async fn stale_queue_entries_are_pruned() {
    let canvas = row_canvas(&[RED, BLUE]);
    mark_ready(&canvas);
    let writer = ScriptedWriter::new();
    let dispatcher = dispatcher(Arc::clone(&canvas), writer.clone(), &test_config(), &["alice"]);
    let alice = dispatcher.agent("alice").unwrap();
    alice.set_cooldown(far_future());

    dispatcher.tick(Utc::now());
    assert_eq!(alice.queue().len(), 2);

    observe(&canvas, Point::new(0, 0), RED);
    let report = dispatcher.tick(Utc::now());
    assert_eq!(report.pruned, 1);
    assert_eq!(alice.queue().points(), vec![Point::new(1, 0)]);
}

#[tokio::test]
async fn removed_agent_work_is_redistributed() {
    let canvas = row_canvas(&[RED, BLUE]);
    mark_ready(&canvas);
    let writer = ScriptedWriter::new();
    let dispatcher = dispatcher(canvas, writer.clone(), &test_config(), &["alice", "bob"]);
    for agent in dispatcher.agents() {
        agent.set_cooldown(far_future());
    }
    dispatcher.tick(Utc::now());

    let alice = dispatcher.remove_agent("alice").unwrap();
    assert!(alice.queue().is_empty());
    dispatcher.tick(Utc::now());
    assert_eq!(dispatcher.agent("bob").unwrap().queue().len(), 2);
    assert!(dispatcher.remove_agent("alice").is_none());
}

#[tokio::test]
async fn points_outside_the_layout_are_never_assigned() {
    let palette = mural_test_utils::test_palette();
    let target = mural_test_utils::row_target(&[RED; 10], Point::new(15, 0), &palette);
    let canvas = Arc::new(mural_canvas::CanvasModel::new(
        target,
        mural_test_utils::small_layout(),
    ));
    mark_ready(&canvas);
    let writer = ScriptedWriter::new();
    let dispatcher = dispatcher(canvas, writer.clone(), &test_config(), &["alice"]);
    dispatcher.agent("alice").unwrap().set_cooldown(far_future());

    let report = dispatcher.tick(Utc::now());
    assert_eq!(report.diff_size, 10);
    assert_eq!(report.out_of_bounds, 5);
    assert_eq!(report.assigned, 5);
}

#[tokio::test]
async fn placement_mismatch_is_only_logged() {
    let canvas = row_canvas(&[RED]);
    mark_ready(&canvas);
    let writer = ScriptedWriter::new();
    writer.set_author(0, Point::new(0, 0), "someone-else");
    let config = test_config().with_verify_placement(true);
    let dispatcher = dispatcher(canvas, writer.clone(), &config, &["alice"]);

    dispatcher.tick(Utc::now());
    let reports = dispatcher.drain().await;
    assert_eq!(reports[0].outcome, Some(WriteOutcome::Success));
    assert_eq!(reports[0].attempts, 1);
    assert_eq!(writer.calls().len(), 1);
}

#[tokio::test]
async fn stalled_placement_history_does_not_hold_the_agent() {
    let canvas = row_canvas(&[RED]);
    mark_ready(&canvas);
    let writer = ScriptedWriter::new();
    writer.hang_history();
    let config = test_config()
        .with_verify_placement(true)
        .with_write_timeout(Duration::from_millis(50));
    let dispatcher = dispatcher(canvas, writer.clone(), &config, &["alice"]);

    dispatcher.tick(Utc::now());
    let reports = tokio::time::timeout(Duration::from_secs(2), dispatcher.drain())
        .await
        .unwrap();
    assert_eq!(reports[0].outcome, Some(WriteOutcome::Success));
    assert!(!dispatcher.agent("alice").unwrap().is_writing());
}

#[tokio::test]
async fn stalled_reestablish_still_retries() {
    let canvas = row_canvas(&[RED]);
    mark_ready(&canvas);
    let writer = ScriptedWriter::new();
    writer.script("alice", [Reply::Fail(TransportError::Closed), Reply::placed()]);
    let sessions = Arc::new(RecordingSessions::hanging());
    let config = test_config().with_write_timeout(Duration::from_millis(50));
    let dispatcher =
        dispatcher(canvas, writer.clone(), &config, &["alice"]).with_sessions(sessions.clone());

    dispatcher.tick(Utc::now());
    let reports = tokio::time::timeout(Duration::from_secs(2), dispatcher.drain())
        .await
        .unwrap();
    assert_eq!(reports[0].attempts, 2);
    assert_eq!(reports[0].outcome, Some(WriteOutcome::Success));
    assert_eq!(sessions.reestablished(), vec!["alice".to_string()]);
}

#[tokio::test]
async fn run_stops_on_shutdown_and_drains() {
    let canvas = row_canvas(&[RED, BLUE, RED, BLUE]);
    mark_ready(&canvas);
    let writer = ScriptedWriter::new();
    let dispatcher = Arc::new(dispatcher(
        canvas,
        writer.clone(),
        &test_config(),
        &["alice", "bob"],
    ));

    let (stop_tx, stop_rx) = watch::channel(false);
    let running = {
        let dispatcher = Arc::clone(&dispatcher);
        tokio::spawn(async move { dispatcher.run(stop_rx).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    stop_tx.send(true).unwrap();

    let stats = tokio::time::timeout(Duration::from_secs(5), running)
        .await
        .unwrap()
        .unwrap();
    assert!(stats.ticks >= 1);
    assert_eq!(stats.writes, 2);
    assert_eq!(stats.successes, 2);
    assert_eq!(dispatcher.in_flight(), 0);
}

#[tokio::test]
async fn run_stops_when_every_agent_is_retired() {
    let canvas = row_canvas(&[RED]);
    mark_ready(&canvas);
    let writer = ScriptedWriter::new();
    writer.script("alice", [Reply::banned()]);
    let dispatcher = dispatcher(canvas, writer.clone(), &test_config(), &["alice"]);

    let (_stop_tx, stop_rx) = watch::channel(false);
    let stats = tokio::time::timeout(Duration::from_secs(5), dispatcher.run(stop_rx))
        .await
        .unwrap();
    assert_eq!(stats.banned, 1);
    assert_eq!(dispatcher.liveness_counts(), (0, 1, 0));
}
