use std::collections::HashSet;
use std::path::Path;

use clipforge_core::{JobFilter, JobStatus, SqliteJobQueue};
use tempfile::TempDir;

fn temp_queue(dir: &Path) -> SqliteJobQueue {
    let path = dir.join("library.sqlite");
    let queue = SqliteJobQueue::builder()
        .path(&path)
        .create_if_missing(true)
        .build()
        .expect("create queue");
    queue.initialize().expect("initialize queue");
    queue
}

#[test]
fn enqueue_and_list_jobs() {
    let dir = TempDir::new().unwrap();
    let queue = temp_queue(dir.path());

    let first = queue.enqueue(1, 0).unwrap();
    let second = queue.enqueue(2, 3).unwrap();
    assert_ne!(first, second);

    let list = queue
        .list(&JobFilter {
            status: Some(JobStatus::Queued),
            media_id: None,
            limit: Some(10),
        })
        .unwrap();
    assert_eq!(list.len(), 2);
    // Higher priority lists first.
    assert_eq!(list[0].media_id, 2);
}

#[test]
fn claim_prefers_priority_then_fifo() {
    let dir = TempDir::new().unwrap();
    let queue = temp_queue(dir.path());

    let low_a = queue.enqueue(1, 1).unwrap();
    let low_b = queue.enqueue(2, 1).unwrap();
    let high = queue.enqueue(3, 5).unwrap();

    let first = queue.claim_next().unwrap().unwrap();
    assert_eq!(first.id, high);
    let second = queue.claim_next().unwrap().unwrap();
    assert_eq!(second.id, low_a);
    let third = queue.claim_next().unwrap().unwrap();
    assert_eq!(third.id, low_b);
    assert!(queue.claim_next().unwrap().is_none());
}

#[test]
fn claim_marks_entries_and_never_returns_them_twice() {
    let dir = TempDir::new().unwrap();
    let queue = temp_queue(dir.path());

    for media_id in 1..=5 {
        queue.enqueue(media_id, 0).unwrap();
    }

    let mut seen = HashSet::new();
    while let Some(entry) = queue.claim_next().unwrap() {
        assert_eq!(entry.status, JobStatus::Claimed);
        assert!(entry.claimed_at.is_some());
        assert!(seen.insert(entry.id), "job {} claimed twice", entry.id);
    }
    assert_eq!(seen.len(), 5);
}

#[test]
fn finished_jobs_are_not_claimable() {
    let dir = TempDir::new().unwrap();
    let queue = temp_queue(dir.path());

    let id = queue.enqueue(1, 0).unwrap();
    let claimed = queue.claim_next().unwrap().unwrap();
    assert_eq!(claimed.id, id);
    queue.mark_finished(id, JobStatus::Completed).unwrap();

    assert!(queue.claim_next().unwrap().is_none());
    let entry = queue.fetch(id).unwrap().unwrap();
    assert_eq!(entry.status, JobStatus::Completed);
    assert!(entry.finished_at.is_some());
}

#[test]
fn mark_finished_requires_existing_job() {
    let dir = TempDir::new().unwrap();
    let queue = temp_queue(dir.path());
    assert!(queue.mark_finished(42, JobStatus::Failed).is_err());
}

#[test]
fn counts_group_by_status() {
    let dir = TempDir::new().unwrap();
    let queue = temp_queue(dir.path());

    queue.enqueue(1, 0).unwrap();
    queue.enqueue(2, 0).unwrap();
    let claimed = queue.claim_next().unwrap().unwrap();
    queue.mark_finished(claimed.id, JobStatus::Failed).unwrap();

    let counts = queue.counts().unwrap();
    assert_eq!(counts.get("queued"), Some(&1));
    assert_eq!(counts.get("failed"), Some(&1));
}
