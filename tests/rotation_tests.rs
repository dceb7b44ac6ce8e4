//! Integration tests for log rotation functionality

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use ceelog::config::{RetentionPolicy, RotationSettings, ServerConfig, StorageSettings};
use ceelog::server::dispatch::{self, AppState};
use ceelog::server::{LogRotator, RotatingSink, SinkRegistry};
use ceelog::types::{Event, StreamTag};
use chrono::{Duration as ChronoDuration, Utc};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;
use tokio::fs;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

const INTERVAL_SECS: u64 = 3600;

/// Helper to create storage settings with rotation enabled
fn create_rotation_settings(log_dir: &Path, max_file_size: u64, keep_files: u32) -> StorageSettings {
    StorageSettings {
        output_directory: log_dir.to_path_buf(),
        max_file_size,
        sync_on_write: false,
        rotation: RotationSettings {
            enabled: true,
            interval_secs: INTERVAL_SECS,
            keep_files,
            ..RotationSettings::default()
        },
    }
}

/// `n` whole intervals after the sink was opened
fn periods_later(n: i64) -> chrono::DateTime<Utc> {
    Utc::now() + ChronoDuration::seconds(n * (INTERVAL_SECS as i64 + 1))
}

/// Rotated (uncompressed) files of a stream, oldest first
async fn rotated_files(dir: &Path, tag: StreamTag) -> Vec<PathBuf> {
    let prefix = format!("{}.log.", tag.name());
    let mut files = Vec::new();
    let mut entries = fs::read_dir(dir).await.unwrap();
    while let Some(entry) = entries.next_entry().await.unwrap() {
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with(&prefix) && !name.ends_with(".gz") && !name.ends_with(".lz4") {
            files.push(entry.path());
        }
    }
    files.sort();
    files
}

async fn lines_of(path: &Path) -> Vec<String> {
    fs::read_to_string(path)
        .await
        .unwrap()
        .lines()
        .map(str::to_string)
        .collect()
}

/// Every record of a stream: rotated files first, then the active file
async fn all_records(dir: &Path, tag: StreamTag) -> Vec<String> {
    let mut records = Vec::new();
    for path in rotated_files(dir, tag).await {
        records.extend(lines_of(&path).await);
    }
    records.extend(lines_of(&dir.join(format!("{}.log", tag.name()))).await);
    records
}

async fn append_json(sink: &RotatingSink, seq: usize) {
    let payload = format!(r#"{{"seq":{},"pad":"{}"}}"#, seq, "x".repeat(64));
    sink.append(&Event::new(StreamTag::Json, payload)).await.unwrap();
}

/// Test basic log rotation based on file size
#[tokio::test]
async fn test_size_based_rotation() {
    let temp_dir = tempdir().unwrap();
    let settings = create_rotation_settings(temp_dir.path(), 1024, 0);
    let sink = RotatingSink::open(StreamTag::Json, &settings).await.unwrap();

    for i in 0..100 {
        append_json(&sink, i).await;
    }

    let rotated = rotated_files(temp_dir.path(), StreamTag::Json).await;
    assert!(rotated.len() >= 5, "expected several rotations, got {}", rotated.len());
    for path in &rotated {
        let size = fs::metadata(path).await.unwrap().len();
        assert!(size <= 1024, "{} is {} bytes", path.display(), size);
    }

    // Nothing lost, nothing duplicated, order preserved.
    let records = all_records(temp_dir.path(), StreamTag::Json).await;
    assert_eq!(records.len(), 100);
    for (i, record) in records.iter().enumerate() {
        assert!(record.contains(&format!(r#""seq":{},"#, i)), "{}", record);
    }
}

/// Test time-based rotation happens exactly once per boundary
#[tokio::test]
async fn test_time_based_rotation_boundary() {
    let temp_dir = tempdir().unwrap();
    let settings = create_rotation_settings(temp_dir.path(), 0, 0);
    let sink = RotatingSink::open(StreamTag::Json, &settings).await.unwrap();

    for i in 0..10 {
        append_json(&sink, i).await;
    }

    // Not yet due.
    assert!(!sink.maybe_rotate_at(Utc::now()).await.unwrap());

    let boundary = periods_later(1);
    assert!(sink.maybe_rotate_at(boundary).await.unwrap());
    assert!(!sink.maybe_rotate_at(boundary).await.unwrap());
    assert!(!sink
        .maybe_rotate_at(boundary + ChronoDuration::seconds(30))
        .await
        .unwrap());

    for i in 10..15 {
        append_json(&sink, i).await;
    }

    let rotated = rotated_files(temp_dir.path(), StreamTag::Json).await;
    assert_eq!(rotated.len(), 1);
    assert_eq!(lines_of(&rotated[0]).await.len(), 10);
    assert_eq!(lines_of(sink.active_path()).await.len(), 5);

    let name = rotated[0].file_name().unwrap().to_string_lossy().into_owned();
    assert!(name.starts_with(&format!("json.log.{}", boundary.format("%Y%m%d_%H%M%S"))));
}

/// Test an empty active file is never rotated
#[tokio::test]
async fn test_empty_file_not_rotated() {
    let temp_dir = tempdir().unwrap();
    let settings = create_rotation_settings(temp_dir.path(), 0, 0);
    let sink = RotatingSink::open(StreamTag::Xml, &settings).await.unwrap();

    for n in 1..4 {
        assert!(!sink.maybe_rotate_at(periods_later(n)).await.unwrap());
    }
    assert!(rotated_files(temp_dir.path(), StreamTag::Xml).await.is_empty());
}

/// Test rotation can be turned off
#[tokio::test]
async fn test_rotation_disabled() {
    let temp_dir = tempdir().unwrap();
    let mut settings = create_rotation_settings(temp_dir.path(), 256, 0);
    settings.rotation.enabled = false;
    let sink = RotatingSink::open(StreamTag::Json, &settings).await.unwrap();

    for i in 0..20 {
        append_json(&sink, i).await;
    }
    assert!(!sink.maybe_rotate_at(periods_later(10)).await.unwrap());

    assert!(rotated_files(temp_dir.path(), StreamTag::Json).await.is_empty());
    assert_eq!(lines_of(sink.active_path()).await.len(), 20);
}

/// Test retention keeps only the newest rotated files
#[tokio::test]
async fn test_retention_keep_files() {
    let temp_dir = tempdir().unwrap();
    let settings = create_rotation_settings(temp_dir.path(), 0, 3);
    let sink = RotatingSink::open(StreamTag::Text, &settings).await.unwrap();

    for n in 1..=6 {
        sink.append(&Event::new(StreamTag::Text, format!("period {}", n)))
            .await
            .unwrap();
        assert!(sink.maybe_rotate_at(periods_later(n)).await.unwrap());

        let rotated = rotated_files(temp_dir.path(), StreamTag::Text).await;
        assert!(rotated.len() <= 3);
    }

    let rotated = rotated_files(temp_dir.path(), StreamTag::Text).await;
    assert_eq!(rotated.len(), 3);
    let mut kept = Vec::new();
    for path in &rotated {
        kept.extend(lines_of(path).await);
    }
    assert!(kept[0].ends_with("period 4"));
    assert!(kept[1].ends_with("period 5"));
    assert!(kept[2].ends_with("period 6"));
}

/// Test archival retention compresses evicted files and bounds archives
#[cfg(feature = "compression")]
#[tokio::test]
async fn test_archive_retention() {
    let temp_dir = tempdir().unwrap();
    let mut settings = create_rotation_settings(temp_dir.path(), 0, 1);
    settings.rotation.retention = RetentionPolicy::Archive;
    settings.rotation.max_archives = 2;
    let sink = RotatingSink::open(StreamTag::Json, &settings).await.unwrap();

    for n in 1..=5 {
        append_json(&sink, n as usize).await;
        assert!(sink.maybe_rotate_at(periods_later(n)).await.unwrap());
    }

    let mut archives = 0;
    let mut entries = fs::read_dir(temp_dir.path()).await.unwrap();
    while let Some(entry) = entries.next_entry().await.unwrap() {
        let name = entry.file_name().to_string_lossy().into_owned();
        assert!(!name.ends_with(".tmp"), "partial archive left behind: {}", name);
        if name.ends_with(".gz") {
            archives += 1;
        }
    }
    assert_eq!(archives, 2);
    assert_eq!(rotated_files(temp_dir.path(), StreamTag::Json).await.len(), 1);
}

/// Test concurrent appends and rotations lose and interleave nothing
#[tokio::test]
async fn test_concurrent_appends_during_rotation() {
    let temp_dir = tempdir().unwrap();
    let settings = create_rotation_settings(temp_dir.path(), 4096, 0);
    let sink = Arc::new(RotatingSink::open(StreamTag::Json, &settings).await.unwrap());

    let mut handles = vec![];
    for writer in 0..8 {
        let sink = Arc::clone(&sink);
        handles.push(tokio::spawn(async move {
            for i in 0..100 {
                let payload = format!(r#"{{"writer":{},"seq":{}}}"#, writer, i);
                sink.append(&Event::new(StreamTag::Json, payload)).await.unwrap();
            }
        }));
    }

    let rotations = {
        let sink = Arc::clone(&sink);
        tokio::spawn(async move {
            let mut rotated = 0;
            for n in 1..=20 {
                if sink.maybe_rotate_at(periods_later(n)).await.unwrap() {
                    rotated += 1;
                }
                tokio::task::yield_now().await;
            }
            rotated
        })
    };

    for handle in handles {
        handle.await.unwrap();
    }
    rotations.await.unwrap();

    let records = all_records(temp_dir.path(), StreamTag::Json).await;
    assert_eq!(records.len(), 800);

    let unique: HashSet<_> = records
        .iter()
        .map(|record| {
            let (_, payload) = record.split_once(' ').unwrap();
            assert!(payload.starts_with(r#"{"writer":"#) && payload.ends_with('}'));
            payload.to_string()
        })
        .collect();
    assert_eq!(unique.len(), 800);
}

/// Test rotation of one stream leaves the others alone while ingesting over HTTP
#[tokio::test]
async fn test_rotation_while_ingesting() {
    let temp_dir = tempdir().unwrap();
    let mut config = ServerConfig::default();
    config.storage = create_rotation_settings(temp_dir.path(), 0, 0);
    let registry = Arc::new(SinkRegistry::open(&config.storage).await.unwrap());
    let app = dispatch::router(
        &config,
        AppState::new(&config, Arc::clone(&registry)).unwrap(),
    );

    let put = |content_type: &'static str, body: String| {
        Request::builder()
            .method(Method::PUT)
            .uri("/cee")
            .header(header::CONTENT_TYPE, content_type)
            .header(header::CONTENT_LENGTH, body.len())
            .body(Body::from(body))
            .unwrap()
    };

    for i in 0..5 {
        let response = app
            .clone()
            .oneshot(put("application/json", format!(r#"{{"n":{}}}"#, i)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
    let response = app
        .clone()
        .oneshot(put("application/xml", "<n>0</n>".to_string()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    assert!(registry
        .get(StreamTag::Json)
        .maybe_rotate_at(periods_later(1))
        .await
        .unwrap());

    for i in 5..8 {
        let response = app
            .clone()
            .oneshot(put("application/json", format!(r#"{{"n":{}}}"#, i)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    let rotated = rotated_files(temp_dir.path(), StreamTag::Json).await;
    assert_eq!(rotated.len(), 1);
    assert_eq!(lines_of(&rotated[0]).await.len(), 5);
    assert_eq!(lines_of(&temp_dir.path().join("json.log")).await.len(), 3);

    assert!(rotated_files(temp_dir.path(), StreamTag::Xml).await.is_empty());
    assert_eq!(lines_of(&temp_dir.path().join("xml.log")).await.len(), 1);
}

/// Test the background timer rotates due files
#[tokio::test]
async fn test_rotator_task() {
    let temp_dir = tempdir().unwrap();
    let mut settings = create_rotation_settings(temp_dir.path(), 0, 0);
    settings.rotation.interval_secs = 1;
    settings.rotation.check_interval_secs = 1;
    let registry = Arc::new(SinkRegistry::open(&settings).await.unwrap());

    registry
        .get(StreamTag::Text)
        .append(&Event::new(StreamTag::Text, "before the boundary"))
        .await
        .unwrap();

    let cancel = CancellationToken::new();
    let rotator = LogRotator::new(&settings.rotation, Arc::clone(&registry));
    let task = tokio::spawn(rotator.start_rotation_task(cancel.clone()));

    sleep(Duration::from_millis(2500)).await;
    cancel.cancel();
    task.await.unwrap();

    let rotated = rotated_files(temp_dir.path(), StreamTag::Text).await;
    assert_eq!(rotated.len(), 1);
    assert!(lines_of(&rotated[0]).await[0].ends_with("before the boundary"));
    // Empty streams were not rotated.
    assert!(rotated_files(temp_dir.path(), StreamTag::Json).await.is_empty());
}
