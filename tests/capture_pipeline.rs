//! End-to-end capture tests: begin, settle, commit, persist and upload.
//!
//! Every test runs on mock devices and a recording uploader, with the session
//! clock pinned so file names are deterministic.

mod common;

use anyhow::Result;
use common::{eventually, fixed_time, hub, RecordingUploader};
use meal_kiosk::acquisition::SensorHub;
use meal_kiosk::capture::{CaptureSession, UploadStatus, User};
use meal_kiosk::config::{CaptureConfig, PathConfig};
use meal_kiosk::hardware::mock::MockScaleHandle;
use meal_kiosk::storage::{read_container, DurableLog, DurableLogEntry};
use meal_kiosk::upload::UploadQueue;
use meal_kiosk::KioskError;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

struct Harness {
    session: Arc<CaptureSession>,
    hub: Arc<SensorHub>,
    log: Arc<DurableLog>,
    uploader: Arc<RecordingUploader>,
    scale: Option<MockScaleHandle>,
    save_dir: PathBuf,
    _dir: TempDir,
}

impl Harness {
    fn day_folder(&self) -> PathBuf {
        self.save_dir.join("20240501")
    }

    fn files_in_day_folder(&self) -> Vec<String> {
        match fs::read_dir(self.day_folder()) {
            Ok(entries) => entries
                .filter_map(|e| e.ok())
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .filter(|n| n.ends_with(".npz"))
                .collect(),
            Err(_) => Vec::new(),
        }
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.hub.shutdown();
    }
}

/// Session with the given settle delay. `started` controls whether the
/// producers run, so the not-ready path can be exercised.
fn harness(settle_delay_ms: u64, started: bool) -> Harness {
    let dir = tempfile::tempdir().expect("temp dir");
    let save_dir = dir.path().join("record");
    harness_in(dir, save_dir, settle_delay_ms, started)
}

fn harness_in(dir: TempDir, save_dir: PathBuf, settle_delay_ms: u64, started: bool) -> Harness {
    let (hub, scale) = hub(true);
    if started {
        hub.start(Duration::from_millis(5)).expect("start producers");
    }

    let uploader = Arc::new(RecordingUploader::ok());
    let uploads = Arc::new(UploadQueue::new(uploader.clone(), 2).expect("runtime"));
    let log = Arc::new(DurableLog::new());
    let paths = PathConfig {
        save_dir: save_dir.clone(),
    };
    let capture = CaptureConfig {
        settle_delay_ms,
        ..CaptureConfig::default()
    };
    let session = Arc::new(
        CaptureSession::new(Arc::clone(&hub), Arc::clone(&log), uploads, &paths, &capture)
            .with_clock(Arc::new(fixed_time)),
    );

    Harness {
        session,
        hub,
        log,
        uploader,
        scale,
        save_dir,
        _dir: dir,
    }
}

async fn wait_for_frame(h: &Harness) {
    let hub = Arc::clone(&h.hub);
    assert!(
        eventually(move || hub.latest_frame().is_some()).await,
        "camera produced no frame"
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn capture_writes_container_log_and_uploads() -> Result<()> {
    let h = harness(20, true);
    wait_for_frame(&h).await;

    let scale = h.scale.clone().expect("scale");
    scale.set_load(120.0);
    let hub = Arc::clone(&h.hub);
    assert!(eventually(move || hub.latest_weight() == 120.0).await);

    let committed = h.session.begin("before_meal", &User::with_id(7))?.wait().await?;
    let record = &committed.record;

    let expected = h.day_folder().join("20240501080309_7_before_meal.npz");
    assert_eq!(record.file_path, expected);
    assert_eq!(record.file_name, "20240501080309_7_before_meal");
    assert_eq!(record.weight, 120.0);
    assert_eq!(record.upload_status, UploadStatus::Pending);
    assert!(expected.exists());

    let container = read_container(&expected)?;
    assert_eq!(container.resolution(), (24, 32));
    assert_eq!(container.rgb_image.shape(), &[24, 32, 3]);
    assert_eq!(container.depth_scale, Some(0.001));

    let entry = h.log.get(&h.day_folder(), &record.file_name)?;
    assert_eq!(
        entry,
        Some(DurableLogEntry {
            user_id: 7,
            weight: 120.0,
            save_type: "before_meal".to_string(),
            is_upload: 0,
        })
    );

    let outcome = committed.upload.outcome().await;
    assert_eq!(outcome.status, UploadStatus::Success);
    assert_eq!(outcome.file_name, record.file_name);
    assert_eq!(h.uploader.uploaded().len(), 1);

    // The log keeps recording local existence only
    let entry = h.log.get(&h.day_folder(), &record.file_name)?.expect("entry");
    assert_eq!(entry.is_upload, 0);

    assert!(!h.session.is_committing());
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn second_begin_while_committing_is_busy() -> Result<()> {
    let h = harness(200, true);
    wait_for_frame(&h).await;

    let first = h.session.begin("before_meal", &User::with_id(7))?;
    let err = h.session.begin("after_meal", &User::with_id(8)).unwrap_err();
    assert!(matches!(err, KioskError::SessionBusy));

    first.wait().await?;
    assert_eq!(h.files_in_day_folder(), vec!["20240501080309_7_before_meal.npz".to_string()]);
    assert_eq!(h.log.read(&h.day_folder())?.len(), 1);

    // Idle again: the next capture is accepted
    h.session.begin("after_meal", &User::with_id(8))?.wait().await?;
    assert_eq!(h.files_in_day_folder().len(), 2);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn capture_before_first_frame_is_not_ready() -> Result<()> {
    let h = harness(5, false);

    let err = h
        .session
        .begin("before_meal", &User::with_id(7))?
        .wait()
        .await
        .unwrap_err();
    assert!(matches!(err, KioskError::SensorNotReady));
    assert!(!h.day_folder().exists());
    assert!(h.uploader.uploaded().is_empty());
    assert!(!h.session.is_committing());
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn commit_without_begin_is_rejected() {
    let h = harness(5, true);
    let err = h.session.commit().unwrap_err();
    assert!(matches!(err, KioskError::SessionIdle));
    assert!(!h.save_dir.exists());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn early_commit_does_not_let_stale_timer_take_next_reservation() -> Result<()> {
    let h = harness(300, true);
    wait_for_frame(&h).await;

    let first = h.session.begin("before_meal", &User::with_id(1))?;
    let early = h.session.commit()?;
    assert_eq!(early.record.file_name, "20240501080309_1_before_meal");
    assert!(!h.session.is_committing());

    let started = std::time::Instant::now();
    let second = h.session.begin("after_meal", &User::with_id(2))?;

    let err = first.wait().await.unwrap_err();
    assert!(matches!(err, KioskError::CaptureAlreadyCommitted));

    // The second reservation still gets its full settle delay
    let committed = second.wait().await?;
    assert!(started.elapsed() >= Duration::from_millis(300));
    assert_eq!(committed.record.file_name, "20240501080309_2_after_meal");
    assert_eq!(h.files_in_day_folder().len(), 2);
    assert!(!h.session.is_committing());
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn invalid_meal_type_leaves_session_idle() {
    let h = harness(5, true);
    let err = h.session.begin("../lunch", &User::with_id(7)).unwrap_err();
    assert!(matches!(err, KioskError::InvalidMealType(_)));
    assert!(!h.session.is_committing());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unwritable_save_dir_fails_and_returns_to_idle() -> Result<()> {
    let dir = tempfile::tempdir()?;
    // A regular file where the save directory should be
    let blocker = dir.path().join("record");
    fs::write(&blocker, b"not a directory")?;

    let h = harness_in(dir, blocker, 5, true);
    wait_for_frame(&h).await;

    let err = h
        .session
        .begin("before_meal", &User::with_id(7))?
        .wait()
        .await
        .unwrap_err();
    assert!(matches!(err, KioskError::FileWriteFailure { .. }));
    assert!(!h.session.is_committing());
    assert!(h.uploader.uploaded().is_empty());
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn corrupt_durable_log_does_not_abort_capture() -> Result<()> {
    let h = harness(5, true);
    wait_for_frame(&h).await;

    fs::create_dir_all(h.day_folder())?;
    let log_path = DurableLog::path_for(&h.day_folder());
    fs::write(&log_path, b"{ not json")?;

    let committed = h.session.begin("lunch", &User::with_id(3))?.wait().await?;
    assert!(committed.record.file_path.exists());
    assert_eq!(fs::read(&log_path)?, b"{ not json");
    assert_eq!(committed.upload.outcome().await.status, UploadStatus::Success);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn same_second_capture_overwrites_previous_file() -> Result<()> {
    let h = harness(5, true);
    wait_for_frame(&h).await;

    let first = h.session.begin("before_meal", &User::with_id(7))?.wait().await?;
    let frame_before = h.hub.latest_frame().expect("frame").sequence;
    let hub = Arc::clone(&h.hub);
    assert!(eventually(move || hub.latest_frame().map(|f| f.sequence) > Some(frame_before)).await);
    let second = h.session.begin("before_meal", &User::with_id(7))?.wait().await?;

    assert_eq!(first.record.file_path, second.record.file_path);
    assert_eq!(h.files_in_day_folder().len(), 1);
    assert_eq!(h.log.read(&h.day_folder())?.len(), 1);
    assert_no_partial_files(&h.day_folder());
    Ok(())
}

fn assert_no_partial_files(folder: &Path) {
    let leftovers: Vec<_> = fs::read_dir(folder)
        .expect("day folder")
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().ends_with(".partial"))
        .collect();
    assert!(leftovers.is_empty(), "temporary files left behind: {:?}", leftovers);
}
