/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

mod common;

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use common::{files_with_extension, init_logging, random_bytes, read_checkpoint, request, FaultyClient};
use object_transfer_manager::checksum;
use object_transfer_manager::config::Builder;
use object_transfer_manager::error::ErrorKind;
use object_transfer_manager::types::{ConcurrencySetting, PartSize, ProgressListener, TransferRequest};
use object_transfer_manager::{Config, Downloader};
use tokio_util::sync::CancellationToken;

const CHUNK: u64 = 1000;
const SIZE: usize = 10_000;

fn downloader(client: &Arc<FaultyClient>, config: Builder) -> Downloader {
    let config = config
        .part_size(PartSize::Target(CHUNK))
        .concurrency(ConcurrencySetting::Explicit(3))
        .build();
    Downloader::new(client.clone(), config)
}

fn temp_path(dest: &Path) -> PathBuf {
    let mut path = dest.as_os_str().to_owned();
    path.push(".temp");
    PathBuf::from(path)
}

#[tokio::test]
async fn test_download_many_chunks_with_progress() {
    init_logging();
    let data = random_bytes(SIZE, 11);
    let client = Arc::new(FaultyClient::with_object(data.clone()));
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("object.bin");

    let events = Arc::new(Mutex::new(Vec::new()));
    let captured = events.clone();
    let listener = ProgressListener::new(move |increment, transferred, total| {
        captured.lock().unwrap().push((increment, transferred, total));
    });

    let output = downloader(&client, Config::builder().progress_listener(listener))
        .download_file(&CancellationToken::new(), request(), &dest)
        .await
        .unwrap();

    assert_eq!(SIZE as u64, output.written());
    assert_eq!(checksum::crc64(&data), output.crc64());
    assert_eq!(data.as_ref(), std::fs::read(&dest).unwrap().as_slice());
    assert_eq!(10, client.get_calls());

    let events = events.lock().unwrap();
    assert_eq!(SIZE as u64, events.iter().map(|e| e.0).sum::<u64>());
    assert_eq!(Some(&(CHUNK, SIZE as u64, Some(SIZE as u64))), events.last());
}

#[tokio::test]
async fn test_download_resumes_from_checkpoint() {
    init_logging();
    let data = random_bytes(SIZE, 12);
    let client = Arc::new(FaultyClient::with_object(data.clone()));
    let dir = tempfile::tempdir().unwrap();
    let cp_dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("object.bin");
    let config = || {
        Config::builder()
            .enable_checkpoint(true)
            .checkpoint_dir(cp_dir.path())
    };

    // the last chunk fails, everything written before it is checkpointed
    client.fail_get_at(SIZE as u64 - CHUNK);
    let err = downloader(&client, config())
        .download_file(&CancellationToken::new(), request(), &dest)
        .await
        .unwrap_err();
    assert_eq!(
        "InjectedGetFailure",
        err.service_error().unwrap().code()
    );
    assert_eq!(dest.as_path(), err.download_error().unwrap().path());
    assert!(!dest.exists());
    assert!(temp_path(&dest).exists());

    let checkpoints = files_with_extension(cp_dir.path(), "dcp");
    assert_eq!(1, checkpoints.len());
    let offset = read_checkpoint(&checkpoints[0])["DownloadInfo"]["Offset"]
        .as_u64()
        .unwrap();
    assert!(offset > 0 && offset % CHUNK == 0);

    client.clear_faults();
    let calls_before = client.get_calls();
    let output = downloader(&client, config())
        .download_file(&CancellationToken::new(), request(), &dest)
        .await
        .unwrap();

    assert_eq!(checksum::crc64(&data), output.crc64());
    assert_eq!(data.as_ref(), std::fs::read(&dest).unwrap().as_slice());
    assert_eq!(
        (SIZE as u64 - offset) / CHUNK,
        (client.get_calls() - calls_before) as u64
    );
    assert!(files_with_extension(cp_dir.path(), "dcp").is_empty());
    assert!(!temp_path(&dest).exists());
}

#[tokio::test]
async fn test_checkpoint_discarded_when_object_changes() {
    let data = random_bytes(SIZE, 13);
    let client = Arc::new(FaultyClient::with_object(data));
    let dir = tempfile::tempdir().unwrap();
    let cp_dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("object.bin");
    let config = || {
        Config::builder()
            .enable_checkpoint(true)
            .checkpoint_dir(cp_dir.path())
    };

    client.fail_get_at(SIZE as u64 - CHUNK);
    downloader(&client, config())
        .download_file(&CancellationToken::new(), request(), &dest)
        .await
        .unwrap_err();
    assert_eq!(1, files_with_extension(cp_dir.path(), "dcp").len());

    // new content, new fingerprint: the whole object is fetched again
    let replaced = random_bytes(SIZE, 14);
    client.inner.insert(common::BUCKET, common::KEY, replaced.clone()).unwrap();
    client.clear_faults();
    let calls_before = client.get_calls();
    downloader(&client, config())
        .download_file(&CancellationToken::new(), request(), &dest)
        .await
        .unwrap();

    assert_eq!(replaced.as_ref(), std::fs::read(&dest).unwrap().as_slice());
    assert_eq!(10, client.get_calls() - calls_before);
}

#[tokio::test]
async fn test_failed_download_without_checkpoint_cleans_up() {
    let client = Arc::new(FaultyClient::with_object(random_bytes(SIZE, 15)));
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("object.bin");

    client.fail_get_at(3 * CHUNK);
    let err = downloader(&client, Config::builder())
        .download_file(&CancellationToken::new(), request(), &dest)
        .await
        .unwrap_err();
    assert!(err.service_error().is_some());
    assert!(!dest.exists());
    assert!(!temp_path(&dest).exists());
}

#[tokio::test]
async fn test_source_change_mid_download() {
    let client = Arc::new(FaultyClient::with_object(random_bytes(SIZE, 16)));
    let dir = tempfile::tempdir().unwrap();
    client.report_etag("\"another-object\"");

    let err = downloader(&client, Config::builder())
        .download_file(
            &CancellationToken::new(),
            request(),
            dir.path().join("object.bin"),
        )
        .await
        .unwrap_err();
    assert_eq!(&ErrorKind::SourceChanged, err.kind());
}

#[tokio::test]
async fn test_cancellation_stops_workers() {
    let client = Arc::new(FaultyClient::with_object(random_bytes(SIZE, 17)));
    client.hang_gets();
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("object.bin");
    let cancel = CancellationToken::new();

    let task = {
        let dl = downloader(&client, Config::builder());
        let cancel = cancel.clone();
        let dest = dest.clone();
        tokio::spawn(async move { dl.download_file(&cancel, request(), &dest).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    cancel.cancel();

    let err = tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("download stopped")
        .unwrap()
        .unwrap_err();
    assert_eq!(&ErrorKind::OperationCancelled, err.kind());
    assert!(!temp_path(&dest).exists());
}

#[tokio::test]
async fn test_ranged_download_resumes_from_checkpoint() {
    init_logging();
    let data = random_bytes(SIZE, 18);
    let client = Arc::new(FaultyClient::with_object(data.clone()));
    let dir = tempfile::tempdir().unwrap();
    let cp_dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("object.bin");
    let config = || {
        Config::builder()
            .enable_checkpoint(true)
            .checkpoint_dir(cp_dir.path())
    };
    let (start, end) = (1500u64, 9000u64);
    let ranged = || {
        TransferRequest::builder()
            .bucket(common::BUCKET)
            .key(common::KEY)
            .range(format!("bytes={}-{}", start, end - 1))
            .build()
            .unwrap()
    };

    // chunks start at 1500, 2500, ... the last one (8500) fails
    client.fail_get_at(end - 500);
    downloader(&client, config())
        .download_file(&CancellationToken::new(), ranged(), &dest)
        .await
        .unwrap_err();
    let checkpoints = files_with_extension(cp_dir.path(), "dcp");
    assert_eq!(1, checkpoints.len());
    let offset = read_checkpoint(&checkpoints[0])["DownloadInfo"]["Offset"]
        .as_u64()
        .unwrap();
    assert!(offset > start && (offset - start) % CHUNK == 0);

    client.clear_faults();
    let calls_before = client.get_calls();
    let output = downloader(&client, config())
        .download_file(&CancellationToken::new(), ranged(), &dest)
        .await
        .unwrap();

    let expected = &data[start as usize..end as usize];
    assert_eq!(end - start, output.written());
    assert_eq!(checksum::crc64(expected), output.crc64());
    assert_eq!(expected, std::fs::read(&dest).unwrap().as_slice());
    assert_eq!(
        (end - offset).div_ceil(CHUNK),
        (client.get_calls() - calls_before) as u64
    );
    assert!(files_with_extension(cp_dir.path(), "dcp").is_empty());
}

#[tokio::test]
async fn test_resume_with_short_last_chunk() {
    let size = SIZE + 250;
    let data = random_bytes(size, 19);
    let client = Arc::new(FaultyClient::with_object(data.clone()));
    let dir = tempfile::tempdir().unwrap();
    let cp_dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("object.bin");
    let config = || {
        Config::builder()
            .enable_checkpoint(true)
            .checkpoint_dir(cp_dir.path())
    };

    // the trailing 250 byte chunk fails
    client.fail_get_at(SIZE as u64);
    downloader(&client, config())
        .download_file(&CancellationToken::new(), request(), &dest)
        .await
        .unwrap_err();
    let checkpoints = files_with_extension(cp_dir.path(), "dcp");
    let offset = read_checkpoint(&checkpoints[0])["DownloadInfo"]["Offset"]
        .as_u64()
        .unwrap();
    assert!(offset > 0 && offset % CHUNK == 0);

    client.clear_faults();
    let calls_before = client.get_calls();
    let output = downloader(&client, config())
        .download_file(&CancellationToken::new(), request(), &dest)
        .await
        .unwrap();

    assert_eq!(checksum::crc64(&data), output.crc64());
    assert_eq!(data.as_ref(), std::fs::read(&dest).unwrap().as_slice());
    assert_eq!(
        (size as u64 - offset).div_ceil(CHUNK),
        (client.get_calls() - calls_before) as u64
    );
}

#[tokio::test]
async fn test_download_part_size_and_concurrency_sweep() {
    let dir = tempfile::tempdir().unwrap();
    for part_size in [7u64, 1000, 4096] {
        for total in [0usize, 1, 999, 1000, 1001, 4099] {
            for workers in [1usize, 2, 4] {
                let data = random_bytes(total, total as u64 + part_size);
                let client = Arc::new(FaultyClient::with_object(data.clone()));
                let dest = dir.path().join(format!("{part_size}-{total}-{workers}.bin"));
                let config = Config::builder()
                    .part_size(PartSize::Target(part_size))
                    .concurrency(ConcurrencySetting::Explicit(workers))
                    .build();

                let output = Downloader::new(client.clone(), config)
                    .download_file(&CancellationToken::new(), request(), &dest)
                    .await
                    .unwrap();

                let case = format!("part size {part_size}, total {total}, workers {workers}");
                assert_eq!(total as u64, output.written(), "{case}");
                assert_eq!(checksum::crc64(&data), output.crc64(), "{case}");
                assert_eq!(data.as_ref(), std::fs::read(&dest).unwrap().as_slice(), "{case}");
                assert_eq!(
                    (total as u64).div_ceil(part_size),
                    client.get_calls() as u64,
                    "{case}"
                );
            }
        }
    }
}
