//! Integration tests for the queue processor: the task state machine, the
//! attempts policy, queue gauges, and the backlog alert.

mod test_common;

use std::sync::Arc;
use std::time::Duration;

use portage::{
    Alert, FileMetaStore, JobResult, MAX_ATTEMPTS, NewTask, Op, Severity, TaskStatus, TaskStore,
};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use test_common::{DST, PLAIN, SRC, assert_version_token, rig, seed_settled};

// ── Copy phase ────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_happy_path_single_tick() {
    let r = rig();
    let body = vec![1u8; 100];
    seed_settled(&r.src, "a/b", &body);
    r.files.insert("a/b");
    let task = r.tasks.insert(NewTask::copy("a/b", SRC, DST)).await.unwrap();

    let worked = r.processor.process_once().await.unwrap();

    assert!(worked);
    let row = r.tasks.get(task.id).unwrap();
    assert_eq!(row.status, TaskStatus::Done);
    assert_eq!(row.error, "");
    assert_eq!(row.attempts, 0);
    assert_eq!(r.metrics.job_count(JobResult::Copied), 1);
    assert_eq!(r.dst.get_bytes("a/b").unwrap(), body);

    let meta = r.files.get("a/b").await.unwrap().unwrap();
    assert_version_token(meta.version_token.as_deref().unwrap());
}

#[tokio::test]
async fn test_rerun_of_migrated_object_is_noop() {
    let r = rig();
    let body = b"identical".to_vec();
    seed_settled(&r.src, "a/b", &body);
    seed_settled(&r.dst, "a/b", &body);
    let task = r.tasks.insert(NewTask::copy("a/b", SRC, DST)).await.unwrap();

    r.processor.process_once().await.unwrap();

    assert_eq!(r.tasks.get(task.id).unwrap().status, TaskStatus::Done);
    assert_eq!(r.metrics.job_count(JobResult::Noop), 1);
    assert_eq!(r.dst.op_count(Op::Put), 0, "no PUT on idempotent rerun");
}

#[tokio::test]
async fn test_growing_file_requeues_without_copying() {
    let r = rig();
    // Freshly written: inside the growing-file window.
    r.src.put_bytes("a/b", b"mid-upload".to_vec());
    let task = r.tasks.insert(NewTask::copy("a/b", SRC, DST)).await.unwrap();

    r.processor.process_once().await.unwrap();

    let row = r.tasks.get(task.id).unwrap();
    assert_eq!(row.status, TaskStatus::Queued, "deferred, not done");
    assert_eq!(row.attempts, 1);
    assert!(row.error.contains("file_growing"), "error: {:?}", row.error);
    assert_eq!(r.dst.op_count(Op::Put), 0);
    assert_eq!(r.metrics.job_count(JobResult::Copied), 0);
    assert_eq!(r.metrics.job_count(JobResult::Error), 0);
}

#[tokio::test]
async fn test_blocked_destination_requeues_with_reason() {
    let r = rig();
    seed_settled(&r.src, "a/b", b"secret");
    r.policy.set_encryption_enforced(true);
    let task = r.tasks.insert(NewTask::copy("a/b", SRC, PLAIN)).await.unwrap();

    r.processor.process_once().await.unwrap();

    let row = r.tasks.get(task.id).unwrap();
    assert_eq!(row.status, TaskStatus::Queued);
    assert_eq!(row.attempts, 1);
    assert_eq!(row.error, "destination_not_encrypted");
    assert_eq!(r.metrics.job_count(JobResult::Blocked), 1);
}

#[tokio::test]
async fn test_missing_source_requeues_with_error() {
    let r = rig();
    let task = r.tasks.insert(NewTask::copy("gone", SRC, DST)).await.unwrap();

    r.processor.process_once().await.unwrap();

    let row = r.tasks.get(task.id).unwrap();
    assert_eq!(row.status, TaskStatus::Queued);
    assert_eq!(row.attempts, 1);
    assert_eq!(row.error, "missing_source");
    assert_eq!(r.metrics.job_count(JobResult::MissingSource), 1);
}

#[tokio::test]
async fn test_endpoint_failure_counts_as_error() {
    let r = rig();
    seed_settled(&r.src, "a/b", b"payload");
    r.policy.fail_endpoint(DST);
    let task = r.tasks.insert(NewTask::copy("a/b", SRC, DST)).await.unwrap();

    r.processor.process_once().await.unwrap();

    let row = r.tasks.get(task.id).unwrap();
    assert_eq!(row.status, TaskStatus::Queued);
    assert_eq!(row.attempts, 1);
    assert!(row.error.contains(DST), "error names the endpoint: {:?}", row.error);
    assert_eq!(r.metrics.job_count(JobResult::Error), 1);
}

#[tokio::test]
async fn test_missing_file_meta_row_is_tolerated() {
    let r = rig();
    seed_settled(&r.src, "a/b", b"payload");
    let task = r.tasks.insert(NewTask::copy("a/b", SRC, DST)).await.unwrap();

    r.processor.process_once().await.unwrap();

    assert_eq!(r.tasks.get(task.id).unwrap().status, TaskStatus::Done);
    assert!(r.files.get("a/b").await.unwrap().is_none(), "core never creates rows");
}

// ── Attempts policy ───────────────────────────────────────────────────────

#[tokio::test]
async fn test_exhausted_task_is_dropped() {
    let r = rig();
    let task = r.tasks.insert(NewTask::copy("gone", SRC, DST)).await.unwrap();

    for tick in 1..=MAX_ATTEMPTS {
        r.processor.process_once().await.unwrap();
        if tick < MAX_ATTEMPTS {
            let row = r.tasks.get(task.id).unwrap();
            assert_eq!(row.attempts, tick, "attempts after tick {tick}");
            assert_eq!(row.status, TaskStatus::Queued);
        }
    }

    assert!(r.tasks.get(task.id).is_none(), "row deleted on final attempt");
    assert!(r.tasks.is_empty());
    assert_eq!(
        r.metrics.job_count(JobResult::MissingSource),
        u64::from(MAX_ATTEMPTS),
        "terminal tick still counts"
    );
}

// ── Cleanup phase ─────────────────────────────────────────────────────────

#[tokio::test]
async fn test_cleanup_task_deletes_source() {
    let r = rig();
    seed_settled(&r.src, "a/b", b"leftover");
    let task = r.tasks.insert(NewTask::cleanup("a/b", SRC)).await.unwrap();

    r.processor.process_once().await.unwrap();

    assert_eq!(r.tasks.get(task.id).unwrap().status, TaskStatus::Done);
    assert!(!r.src.contains("a/b"));
    assert_eq!(r.metrics.job_count(JobResult::Deleted), 1);
}

#[tokio::test]
async fn test_cleanup_of_absent_object_is_noop() {
    let r = rig();
    let task = r.tasks.insert(NewTask::cleanup("gone", SRC)).await.unwrap();

    r.processor.process_once().await.unwrap();

    assert_eq!(r.tasks.get(task.id).unwrap().status, TaskStatus::Done);
    assert_eq!(r.metrics.job_count(JobResult::Noop), 1);
}

#[tokio::test]
async fn test_failed_cleanup_requeues_into_cleanup() {
    let r = rig();
    seed_settled(&r.src, "a/b", b"leftover");
    r.src.inject_fault(Op::Delete, "503");
    let task = r.tasks.insert(NewTask::cleanup("a/b", SRC)).await.unwrap();

    r.processor.process_once().await.unwrap();

    let row = r.tasks.get(task.id).unwrap();
    assert_eq!(row.status, TaskStatus::Cleanup, "requeues into its own phase");
    assert_eq!(row.attempts, 1);
    assert_eq!(r.metrics.job_count(JobResult::CleanupError), 1);

    // Fault consumed; the next tick succeeds.
    r.processor.process_once().await.unwrap();
    assert_eq!(r.tasks.get(task.id).unwrap().status, TaskStatus::Done);
    assert_eq!(r.metrics.job_count(JobResult::Deleted), 1);
}

// ── Claim ordering and eligibility ────────────────────────────────────────

#[tokio::test]
async fn test_tasks_are_claimed_in_fifo_order() {
    let r = rig();
    seed_settled(&r.src, "first", b"1");
    seed_settled(&r.src, "second", b"2");
    let t1 = r.tasks.insert(NewTask::copy("first", SRC, DST)).await.unwrap();
    let t2 = r.tasks.insert(NewTask::copy("second", SRC, DST)).await.unwrap();

    r.processor.process_once().await.unwrap();

    assert_eq!(r.tasks.get(t1.id).unwrap().status, TaskStatus::Done);
    assert_eq!(r.tasks.get(t2.id).unwrap().status, TaskStatus::Queued);
}

#[tokio::test]
async fn test_running_and_done_rows_are_not_claimed() {
    let r = rig();
    let mut task = r.tasks.insert(NewTask::copy("a/b", SRC, DST)).await.unwrap();
    task.status = TaskStatus::Running;
    r.tasks.update(&task).await.unwrap();

    let worked = r.processor.process_once().await.unwrap();

    assert!(!worked, "a running row belongs to another worker");
    assert_eq!(r.tasks.get(task.id).unwrap().status, TaskStatus::Running);
}

// ── Observer: gauges and backlog alert ────────────────────────────────────

#[tokio::test]
async fn test_idle_tick_zero_fills_gauges() {
    let r = rig();

    let worked = r.processor.process_once().await.unwrap();

    assert!(!worked);
    for status in TaskStatus::ALL {
        assert_eq!(r.metrics.queue_depth(status), 0, "gauge for {status}");
    }
    assert!(r.alerts.alerts().is_empty());
}

#[tokio::test]
async fn test_gauges_sum_to_row_count() {
    let r = rig();
    seed_settled(&r.src, "ok", b"payload");
    r.tasks.insert(NewTask::copy("ok", SRC, DST)).await.unwrap();
    r.tasks.insert(NewTask::copy("gone", SRC, DST)).await.unwrap();
    r.tasks.insert(NewTask::cleanup("left", SRC)).await.unwrap();

    r.processor.process_once().await.unwrap();

    let total: u64 = TaskStatus::ALL
        .iter()
        .map(|s| r.metrics.queue_depth(*s))
        .sum();
    assert_eq!(total, r.tasks.len() as u64);
}

#[tokio::test]
async fn test_backlog_alert_fires_above_threshold() {
    let r = rig();
    // 21 sourceless tasks: the processed one fails and requeues, so the
    // queue is still 21 deep when the observer samples it.
    for i in 0..21 {
        r.tasks
            .insert(NewTask::copy(format!("k{i}"), SRC, DST))
            .await
            .unwrap();
    }

    r.processor.process_once().await.unwrap();

    let alerts = r.alerts.alerts();
    assert_eq!(alerts.len(), 1);
    assert_eq!(
        alerts[0],
        Alert {
            name: "migration_backlog".to_string(),
            severity: Severity::Warning,
            message: "21 migration tasks queued".to_string(),
            metadata: json!({ "queued": 21 }),
        }
    );
}

#[tokio::test]
async fn test_no_backlog_alert_at_threshold() {
    let r = rig();
    seed_settled(&r.src, "k0", b"payload");
    // First task succeeds, leaving exactly 20 queued at observation time.
    for i in 0..21 {
        r.tasks
            .insert(NewTask::copy(format!("k{i}"), SRC, DST))
            .await
            .unwrap();
    }

    r.processor.process_once().await.unwrap();

    assert_eq!(r.metrics.queue_depth(TaskStatus::Queued), 20);
    assert!(r.alerts.alerts().is_empty(), "alert requires queued > 20");
}

// ── Worker loop ───────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_worker_loop_drains_and_stops_on_cancel() {
    let r = rig();
    seed_settled(&r.src, "a/b", b"payload");
    r.tasks.insert(NewTask::copy("a/b", SRC, DST)).await.unwrap();

    let processor = Arc::new(r.processor);
    let cancel = CancellationToken::new();
    let worker = tokio::spawn({
        let processor = processor.clone();
        let cancel = cancel.clone();
        async move { processor.run(Duration::from_millis(50), cancel).await }
    });

    // Let the worker drain the queue and go idle.
    tokio::time::sleep(Duration::from_millis(200)).await;
    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(1), worker)
        .await
        .expect("worker must stop after cancellation")
        .unwrap();

    assert_eq!(r.metrics.job_count(JobResult::Copied), 1);
    assert_eq!(r.dst.get_bytes("a/b").unwrap().as_ref(), b"payload");
}
