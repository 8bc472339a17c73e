/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{init_logging, random_bytes, request, FaultyClient};
use object_transfer_manager::error::{Error, ErrorKind};
use object_transfer_manager::io::{AsyncRangeReader, AsyncReadOptions, RangeReader};
use object_transfer_manager::types::HttpRange;
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;

/// how long to wait before assuming a read is stuck
const UNBLOCK_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::test]
async fn test_broken_body_is_resumed() {
    init_logging();
    let data = random_bytes(4096, 1);
    let client = Arc::new(FaultyClient::with_object(data.clone()));
    client.break_next_bodies(2);

    let mut reader = RangeReader::new(client.clone(), request(), HttpRange::new(100, 3000));
    let mut out = Vec::new();
    reader.read_to_end(&mut out).await.unwrap();

    assert_eq!(&data[100..3100], out.as_slice());
    assert_eq!(3, client.get_calls());
}

#[tokio::test]
async fn test_resume_budget_is_bounded() {
    let data = random_bytes(1024, 2);
    let client = Arc::new(FaultyClient::with_object(data));
    client.break_next_bodies(10);

    let mut reader = RangeReader::new(client.clone(), request(), HttpRange::default())
        .with_max_resume_attempts(2);
    let mut out = Vec::new();
    let err: Error = reader.read_to_end(&mut out).await.unwrap_err().into();

    assert_eq!(&ErrorKind::IOError, err.kind());
    assert_eq!(3, client.get_calls());
}

#[tokio::test]
async fn test_etag_change_on_resume_is_fatal() {
    let data = random_bytes(1024, 3);
    let client = Arc::new(FaultyClient::with_object(data));
    client.break_next_bodies(1);

    let mut reader = RangeReader::new(client.clone(), request(), HttpRange::default());
    let mut buf = vec![0u8; 100];
    reader.read_exact(&mut buf).await.unwrap();

    // the first body breaks at 512 bytes, the resumed one reports a new ETag
    client.report_etag("\"changed\"");
    let mut rest = Vec::new();
    let err: Error = reader.read_to_end(&mut rest).await.unwrap_err().into();
    assert_eq!(&ErrorKind::SourceChanged, err.kind());
    assert!(rest.len() < 1024 - 100);
}

#[tokio::test]
async fn test_async_reader_matches_direct_reader() {
    let data = random_bytes(10_000, 4);
    let client = Arc::new(FaultyClient::with_object(data.clone()));
    client.break_next_bodies(1);

    let reader = RangeReader::new(client, request(), HttpRange::new(10, 9_000));
    let options = AsyncReadOptions::default().buffer_size(1000).buffer_count(2);
    let mut reader = AsyncRangeReader::new(reader, &CancellationToken::new(), options);
    let mut out = Vec::new();
    reader.read_to_end(&mut out).await.unwrap();
    assert_eq!(&data[10..9_010], out.as_slice());
}

#[tokio::test]
async fn test_abandon_unblocks_pending_read() {
    let client = Arc::new(FaultyClient::with_object(random_bytes(100, 5)));
    client.hang_gets();

    let reader = RangeReader::new(client, request(), HttpRange::default());
    let mut reader =
        AsyncRangeReader::new(reader, &CancellationToken::new(), AsyncReadOptions::default());
    let handle = reader.abandon_handle();

    let read = tokio::spawn(async move {
        let mut buf = [0u8; 16];
        let result = reader.read(&mut buf).await;
        reader.close();
        reader.close();
        result
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    handle.abandon();
    handle.abandon();

    let result = tokio::time::timeout(UNBLOCK_TIMEOUT, read)
        .await
        .expect("read unblocked")
        .unwrap();
    let err: Error = result.unwrap_err().into();
    assert_eq!(&ErrorKind::Abandoned, err.kind());
}

#[tokio::test]
async fn test_cancellation_unblocks_pending_read() {
    let client = Arc::new(FaultyClient::with_object(random_bytes(100, 6)));
    client.hang_gets();
    let cancel = CancellationToken::new();

    let reader = RangeReader::new(client, request(), HttpRange::default());
    let mut reader = AsyncRangeReader::new(reader, &cancel, AsyncReadOptions::default());
    let read = tokio::spawn(async move {
        let mut buf = [0u8; 16];
        reader.read(&mut buf).await
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    cancel.cancel();

    let result = tokio::time::timeout(UNBLOCK_TIMEOUT, read)
        .await
        .expect("read unblocked")
        .unwrap();
    let err: Error = result.unwrap_err().into();
    assert_eq!(&ErrorKind::OperationCancelled, err.kind());
}
