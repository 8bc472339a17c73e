/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

mod common;

use std::io::SeekFrom;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use common::{init_logging, random_bytes, request, FaultyClient};
use object_transfer_manager::config::ReadOnlyFileOptions;
use object_transfer_manager::error::ErrorKind;
use object_transfer_manager::{AppendFile, Config, ReadOnlyFile};
use tokio_util::sync::CancellationToken;

const SIZE: usize = 50_000;

async fn open(client: &Arc<FaultyClient>, options: ReadOnlyFileOptions) -> ReadOnlyFile {
    ReadOnlyFile::open(client.clone(), request(), options, &CancellationToken::new())
        .await
        .unwrap()
}

fn prefetch_options() -> ReadOnlyFileOptions {
    ReadOnlyFileOptions::default()
        .enable_prefetch(true)
        .chunk_size(4096)
        .prefetch_num(3)
        .prefetch_threshold(8192)
}

#[tokio::test]
async fn test_sequential_reads_with_varying_sizes() {
    init_logging();
    let data = random_bytes(SIZE, 31);
    let client = Arc::new(FaultyClient::with_object(data.clone()));
    let mut file = open(&client, prefetch_options()).await;

    let mut rng = fastrand::Rng::with_seed(31);
    let mut out = Vec::with_capacity(SIZE);
    loop {
        let mut buf = vec![0u8; rng.usize(1..3000)];
        let n = file.read(&mut buf).await.unwrap();
        if n == 0 {
            break;
        }
        out.extend_from_slice(&buf[..n]);
    }

    assert_eq!(data.as_ref(), out.as_slice());
    assert!(file.is_prefetching());
    file.close().unwrap();
}

#[tokio::test]
async fn test_prefetch_uses_fewer_requests_than_direct_reads() {
    let data = random_bytes(SIZE, 32);
    let direct_client = Arc::new(FaultyClient::with_object(data.clone()));
    let prefetch_client = Arc::new(FaultyClient::with_object(data));

    for (client, options) in [
        (&direct_client, ReadOnlyFileOptions::default()),
        (&prefetch_client, prefetch_options()),
    ] {
        let mut file = open(client, options).await;
        let mut buf = vec![0u8; 512];
        while file.read(&mut buf).await.unwrap() > 0 {}
    }

    // one GET per 512 byte read, then one per 4 KiB window once the threshold is hit
    assert_eq!(SIZE.div_ceil(512), direct_client.get_calls());
    assert_eq!(8192 / 512 + (SIZE - 8192).div_ceil(4096), prefetch_client.get_calls());
}

#[tokio::test]
async fn test_random_reads_return_correct_data() {
    let data = random_bytes(SIZE, 33);
    let client = Arc::new(FaultyClient::with_object(data.clone()));
    let mut file = open(&client, prefetch_options().prefetch_threshold(0)).await;

    let mut rng = fastrand::Rng::with_seed(33);
    for _ in 0..50 {
        let offset = rng.usize(0..SIZE);
        let len = rng.usize(1..2000).min(SIZE - offset);
        assert_eq!(offset as u64, file.seek(SeekFrom::Start(offset as u64)).unwrap());

        let mut buf = vec![0u8; len];
        let mut filled = 0;
        while filled < len {
            filled += file.read(&mut buf[filled..]).await.unwrap();
        }
        assert_eq!(&data[offset..offset + len], buf.as_slice());
    }
    // random access disables prefetching
    assert!(!file.is_prefetching());
}

#[tokio::test]
async fn test_source_change_is_detected() {
    let client = Arc::new(FaultyClient::with_object(random_bytes(1000, 34)));
    let mut file = open(&client, ReadOnlyFileOptions::default()).await;

    client.report_etag("\"rewritten\"");
    let mut buf = [0u8; 10];
    let err = file.read(&mut buf).await.unwrap_err();
    assert_eq!(&ErrorKind::SourceChanged, err.kind());
}

#[tokio::test]
async fn test_cancel_unblocks_prefetch_read() {
    let client = Arc::new(FaultyClient::with_object(random_bytes(SIZE, 35)));
    let cancel = CancellationToken::new();
    let mut file = ReadOnlyFile::open(
        client.clone(),
        request(),
        prefetch_options().prefetch_threshold(0),
        &cancel,
    )
    .await
    .unwrap();
    client.hang_gets();

    let read = tokio::spawn(async move {
        let mut buf = [0u8; 100];
        file.read(&mut buf).await
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    cancel.cancel();

    let err = tokio::time::timeout(Duration::from_secs(5), read)
        .await
        .expect("read unblocked")
        .unwrap()
        .unwrap_err();
    assert_eq!(&ErrorKind::OperationCancelled, err.kind());
}

#[tokio::test]
async fn test_abandon_unblocks_read_from_another_task() {
    let client = Arc::new(FaultyClient::with_object(random_bytes(SIZE, 38)));
    let file = open(&client, prefetch_options().prefetch_threshold(0)).await;
    let handle = file.abandon_handle();
    client.hang_gets();

    let read = tokio::spawn(async move {
        let mut file = file;
        let mut buf = [0u8; 100];
        let first = file.read(&mut buf).await.unwrap_err();
        let second = file.read(&mut buf).await.unwrap_err();
        (first, second)
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    handle.abandon();
    handle.abandon();

    let (first, second) = tokio::time::timeout(Duration::from_secs(5), read)
        .await
        .expect("read unblocked")
        .unwrap();
    assert_eq!(&ErrorKind::Abandoned, first.kind());
    assert_eq!(&ErrorKind::Abandoned, second.kind());
}

#[tokio::test]
async fn test_append_then_read_back() {
    let client = Arc::new(FaultyClient::default());
    let config = Config::default();
    let cancel = CancellationToken::new();

    let mut appender = AppendFile::open(client.clone(), &config, request(), &cancel)
        .await
        .unwrap();
    let first = random_bytes(3000, 36);
    let second = random_bytes(2000, 37);
    appender.write(first.clone()).await.unwrap();
    appender.write(second.clone()).await.unwrap();
    assert_eq!(5000, appender.position());
    appender.close().unwrap();

    let mut file = open(&client, ReadOnlyFileOptions::default()).await;
    assert_eq!(5000, file.stat().unwrap().size());
    let mut out = vec![0u8; 5000];
    let mut filled = 0;
    while filled < out.len() {
        filled += file.read(&mut out[filled..]).await.unwrap();
    }
    let expected: Bytes = [first, second].concat().into();
    assert_eq!(expected.as_ref(), out.as_slice());
}
