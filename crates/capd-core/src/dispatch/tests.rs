use super::*;
use crate::queue::BackoffPolicy;
use crate::supervisor::{ActiveDownload, LineMonitor, ProcessHandle};
use chrono::TimeZone;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

const MIB: u64 = 1024 * 1024;

fn item(video: &str, title: &str) -> FeedItem {
    FeedItem {
        channel_id: "UC1".to_string(),
        video_id: video.to_string(),
        title: title.to_string(),
        link: format!("https://www.youtube.com/watch?v={video}"),
        uploaded: Some(Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()),
        username: Some("alice".to_string()),
        channel_name: Some("Alice".to_string()),
    }
}

fn queue() -> RetryQueue {
    RetryQueue::new(BackoffPolicy::default(), 0)
}

struct Fixture {
    snapshot: Snapshot,
    active: ActiveTable,
    skip: AuthSkipCache,
}

impl Fixture {
    fn new() -> Self {
        Self {
            snapshot: Snapshot::default(),
            active: ActiveTable::new(),
            skip: AuthSkipCache::new(Duration::from_secs(3600), 100),
        }
    }

    fn consider(&mut self, d: &Dispatcher, item: &FeedItem, creds: bool) -> Decision {
        let mut ctx = DispatchContext {
            snapshot: &mut self.snapshot,
            active: &self.active,
            skip_cache: &mut self.skip,
            credentials_usable: creds,
            now: Utc.with_ymd_and_hms(2024, 5, 2, 0, 0, 0).unwrap(),
            now_instant: Instant::now(),
        };
        d.consider(item, &queue(), &mut ctx)
    }
}

#[test]
fn sanitize_strips_reserved_characters() {
    assert_eq!(sanitize_title(r#" A/B\C:D*E?F"G<H>I|J "#), "ABCDEFGHIJ");
    assert_eq!(sanitize_title("Live: day 3"), "Live day 3");
}

#[test]
fn date_prefix_is_stripped() {
    assert_eq!(strip_date_prefix("[2024-05-01] Live"), "Live");
    assert_eq!(strip_date_prefix("[05-01-2024]   Live"), "Live");
    assert_eq!(strip_date_prefix("Live [2024-05-01]"), "Live [2024-05-01]");
}

#[test]
fn folder_name_follows_date_format() {
    let up = Some(Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap());
    let now = Utc::now();
    let d = Dispatcher::new(PathBuf::from("/dl"), DateFormat::YearFirst, MIB);
    assert_eq!(d.folder_name("Live: 1", up, now), "[2024-05-01] Live 1");
    let d = Dispatcher::new(PathBuf::from("/dl"), DateFormat::MonthFirst, MIB);
    assert_eq!(d.folder_name("Live: 1", up, now), "[05-01-2024] Live 1");
}

#[test]
fn channel_dir_prefers_username() {
    let d = Dispatcher::new(PathBuf::from("/dl"), DateFormat::YearFirst, MIB);
    assert_eq!(d.channel_dir(Some("alice"), "UC1"), PathBuf::from("/dl/alice"));
    assert_eq!(d.channel_dir(None, "UC1"), PathBuf::from("/dl/UC1"));
    assert_eq!(d.channel_dir(Some(""), "UC1"), PathBuf::from("/dl/UC1"));
}

#[test]
fn new_candidate_is_enqueued_due_now() {
    let tmp = tempfile::tempdir().unwrap();
    let d = Dispatcher::new(tmp.path().to_path_buf(), DateFormat::YearFirst, MIB);
    let mut f = Fixture::new();
    let decision = f.consider(&d, &item("v1", "Morning stream"), false);
    let expected_dir = tmp.path().join("alice").join("[2024-05-01] Morning stream");
    assert_eq!(
        decision,
        Decision::Enqueued {
            dir: expected_dir.clone(),
            reused: false
        }
    );
    let job = &f.snapshot.retry_queue[0];
    assert_eq!(job.key, "UC1-v1");
    assert_eq!(job.dir.as_deref(), Some(expected_dir.as_path()));
    assert_eq!(job.attempts, 0);
    assert!(!job.in_progress);
    assert_eq!(job.next_attempt_at, Utc.with_ymd_and_hms(2024, 5, 2, 0, 0, 0).unwrap());
}

#[test]
fn excluded_and_unmatched_titles_are_dropped() {
    let tmp = tempfile::tempdir().unwrap();
    let d = Dispatcher::new(tmp.path().to_path_buf(), DateFormat::YearFirst, MIB);
    let mut f = Fixture::new();
    f.snapshot.ignore_keywords.push("rerun".to_string());
    assert_eq!(f.consider(&d, &item("v1", "RERUN of yesterday"), false), Decision::Excluded);

    f.snapshot.keywords.push("karaoke".to_string());
    assert_eq!(f.consider(&d, &item("v2", "Just chatting"), false), Decision::NotMatched);
    assert!(matches!(
        f.consider(&d, &item("v3", "Karaoke night"), false),
        Decision::Enqueued { .. }
    ));
    assert_eq!(f.snapshot.retry_queue.len(), 1);
}

#[test]
fn skip_cache_only_applies_without_credentials() {
    let tmp = tempfile::tempdir().unwrap();
    let d = Dispatcher::new(tmp.path().to_path_buf(), DateFormat::YearFirst, MIB);
    let mut f = Fixture::new();
    f.skip.mark("v1", Instant::now());
    assert_eq!(f.consider(&d, &item("v1", "Members"), false), Decision::AuthSkipped);
    assert!(matches!(
        f.consider(&d, &item("v1", "Members"), true),
        Decision::Enqueued { .. }
    ));
}

#[test]
fn active_channel_title_is_not_enqueued() {
    let tmp = tempfile::tempdir().unwrap();
    let d = Dispatcher::new(tmp.path().to_path_buf(), DateFormat::YearFirst, MIB);
    let mut f = Fixture::new();
    let (handle, _rx) = ProcessHandle::detached();
    let seed = JobSeed {
        key: JobKey::new("UC1", "other"),
        title: "Morning stream".to_string(),
        username: None,
        channel_name: None,
        video_link: String::new(),
        dir: None,
    };
    f.active.insert(ActiveDownload::new(
        "a",
        seed,
        tmp.path().join("x"),
        handle,
        LineMonitor::new(100),
        Instant::now(),
        Utc::now(),
    ));
    assert_eq!(f.consider(&d, &item("v1", "Morning stream"), false), Decision::Active);
}

#[test]
fn complete_folder_is_skipped() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = tmp.path().join("alice").join("[2024-04-30] Morning stream");
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join("Morning stream.mp4"), vec![0u8; 2 * MIB as usize]).unwrap();
    let d = Dispatcher::new(tmp.path().to_path_buf(), DateFormat::YearFirst, MIB);
    let mut f = Fixture::new();
    assert_eq!(
        f.consider(&d, &item("v1", "Morning stream"), false),
        Decision::AlreadyComplete
    );
    assert!(f.snapshot.retry_queue.is_empty());
}

#[test]
fn incomplete_folder_is_reused_under_its_old_date() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = tmp.path().join("alice").join("[2024-04-30] Morning stream");
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join("Morning stream.f299.mp4.part"), b"partial").unwrap();
    let d = Dispatcher::new(tmp.path().to_path_buf(), DateFormat::YearFirst, MIB);
    let mut f = Fixture::new();
    assert_eq!(
        f.consider(&d, &item("v1", "Morning stream"), false),
        Decision::Enqueued {
            dir: dir.clone(),
            reused: true
        }
    );
}

#[test]
fn empty_matching_folder_is_removed() {
    let tmp = tempfile::tempdir().unwrap();
    let stale = tmp.path().join("alice").join("[2024-04-30] Morning stream");
    fs::create_dir_all(&stale).unwrap();
    let d = Dispatcher::new(tmp.path().to_path_buf(), DateFormat::YearFirst, MIB);
    let mut f = Fixture::new();
    let decision = f.consider(&d, &item("v1", "Morning stream"), false);
    assert!(!stale.exists());
    assert!(matches!(decision, Decision::Enqueued { reused: false, .. }));
}

#[test]
fn existing_job_keeps_its_schedule() {
    let tmp = tempfile::tempdir().unwrap();
    let d = Dispatcher::new(tmp.path().to_path_buf(), DateFormat::YearFirst, MIB);
    let mut f = Fixture::new();
    let later = Utc.with_ymd_and_hms(2024, 5, 3, 0, 0, 0).unwrap();
    let q = queue();
    let seed = JobSeed {
        key: JobKey::new("UC1", "v1"),
        title: "Morning stream".to_string(),
        username: None,
        channel_name: None,
        video_link: String::new(),
        dir: None,
    };
    q.upsert(
        &mut f.snapshot,
        &seed,
        JobUpdate {
            attempts: Some(3),
            next_attempt_at: Some(later),
            ..JobUpdate::default()
        },
        Utc::now(),
    );
    assert_eq!(
        f.consider(&d, &item("v1", "Morning stream"), false),
        Decision::AlreadyQueued
    );
    let job = &f.snapshot.retry_queue[0];
    assert_eq!(job.attempts, 3);
    assert_eq!(job.next_attempt_at, later);
}

#[test]
fn feed_item_json_uses_camel_case() {
    let json = r#"[{"channelId":"UC1","videoId":"v1","title":"T","link":"https://youtu.be/v1","uploaded":"2024-05-01T00:00:00Z"}]"#;
    let items: Vec<FeedItem> = serde_json::from_str(json).unwrap();
    assert_eq!(items[0].key(), JobKey::new("UC1", "v1"));
    assert!(items[0].username.is_none());
}

#[test]
fn missing_feed_file_is_not_found() {
    let tmp = tempfile::tempdir().unwrap();
    let feed = JsonFeedFile::new(tmp.path().join("feed.json"));
    assert!(matches!(feed.fetch(), Err(FeedError::NotFound(_))));
}

#[test]
fn not_found_log_is_rate_limited() {
    let mut log = NotFoundLog::new(Duration::from_secs(3600));
    let t0 = Instant::now();
    assert!(log.should_log("feed", t0));
    assert!(!log.should_log("feed", t0 + Duration::from_secs(60)));
    assert!(log.should_log("other", t0));
    assert!(log.should_log("feed", t0 + Duration::from_secs(3601)));
    log.clear("feed");
    assert!(log.should_log("feed", t0 + Duration::from_secs(3602)));
}

struct Flaky {
    failures: u32,
    calls: AtomicU32,
    error: FeedError,
}

impl FeedSource for Flaky {
    fn name(&self) -> String {
        "flaky".to_string()
    }

    fn fetch(&self) -> Result<Vec<FeedItem>, FeedError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if n < self.failures {
            Err(self.error.clone())
        } else {
            Ok(vec![item("v1", "T")])
        }
    }
}

fn fast_backoff() -> BackoffPolicy {
    BackoffPolicy {
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
        max_exponent: 3,
        jitter_cap: Duration::ZERO,
    }
}

#[tokio::test]
async fn transient_errors_are_retried() {
    let src = Arc::new(Flaky {
        failures: 2,
        calls: AtomicU32::new(0),
        error: FeedError::Timeout("flaky".into()),
    });
    let items = fetch_with_retry(src.clone(), 3, fast_backoff()).await.unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(src.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn retries_are_bounded() {
    let src = Arc::new(Flaky {
        failures: 10,
        calls: AtomicU32::new(0),
        error: FeedError::Connection {
            source_name: "flaky".into(),
            message: "reset".into(),
        },
    });
    let err = fetch_with_retry(src.clone(), 2, fast_backoff()).await.unwrap_err();
    assert!(err.is_transient());
    assert_eq!(src.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn not_found_is_not_retried() {
    let src = Arc::new(Flaky {
        failures: 10,
        calls: AtomicU32::new(0),
        error: FeedError::NotFound("flaky".into()),
    });
    let err = fetch_with_retry(src.clone(), 3, fast_backoff()).await.unwrap_err();
    assert!(matches!(err, FeedError::NotFound(_)));
    assert_eq!(src.calls.load(Ordering::SeqCst), 1);
}
