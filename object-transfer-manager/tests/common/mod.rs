/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

#![allow(dead_code)]

use std::collections::HashSet;
use std::io;
use std::path::Path;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::task::{ready, Context, Poll};

use async_trait::async_trait;
use bytes::Bytes;
use object_transfer_manager::client::memory::MemoryClient;
use object_transfer_manager::client::{
    AppendObjectOutput, CompletedPart, GetRangeOutput, ObjectBody, ObjectMeta, OperationClient,
    PutObjectOutput, UploadPartOutput,
};
use object_transfer_manager::error::{Error, ServiceError};
use object_transfer_manager::types::{HttpRange, TransferRequest};
use pin_project_lite::pin_project;
use tokio::io::{AsyncRead, ReadBuf};

pub const BUCKET: &str = "bucket";
pub const KEY: &str = "key";

/// Install a test log subscriber, configured with `RUST_LOG`
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn request() -> TransferRequest {
    TransferRequest::builder()
        .bucket(BUCKET)
        .key(KEY)
        .build()
        .unwrap()
}

/// Deterministic pseudo random payload
pub fn random_bytes(len: usize, seed: u64) -> Bytes {
    let mut rng = fastrand::Rng::with_seed(seed);
    (0..len).map(|_| rng.u8(..)).collect::<Vec<_>>().into()
}

/// Files in `dir` with the given extension
pub fn files_with_extension(dir: &Path, ext: &str) -> Vec<std::path::PathBuf> {
    std::fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .filter(|path| path.extension().is_some_and(|e| e == ext))
        .collect()
}

/// Read a checkpoint file as loose JSON
pub fn read_checkpoint(path: &Path) -> serde_json::Value {
    serde_json::from_slice(&std::fs::read(path).unwrap()).unwrap()
}

fn injected(code: &str) -> Error {
    ServiceError::new(500, code, "injected failure").into()
}

/// A [`MemoryClient`] with fault injection and call accounting.
#[derive(Debug, Default)]
pub struct FaultyClient {
    pub inner: MemoryClient,
    /// part numbers whose next upload fails
    fail_parts: Mutex<HashSet<u32>>,
    /// ranged GETs starting at one of these offsets fail
    fail_gets_at: Mutex<HashSet<u64>>,
    /// number of upcoming GET bodies that break after half of their data
    break_bodies: AtomicUsize,
    /// ETag reported by GETs instead of the real one
    etag_override: Mutex<Option<String>>,
    /// GETs never complete
    hang_gets: AtomicBool,
    /// single puts fail
    fail_puts: AtomicBool,
    /// initiating a multipart upload fails
    fail_initiate: AtomicBool,
    /// listing the parts of a multipart upload fails
    fail_list_parts: AtomicBool,

    pub get_calls: AtomicUsize,
    pub initiate_calls: AtomicUsize,
    pub abort_calls: AtomicUsize,
    uploaded_parts: Mutex<Vec<u32>>,
}

impl FaultyClient {
    pub fn with_object(data: Bytes) -> Self {
        let client = Self::default();
        client.inner.insert(BUCKET, KEY, data).unwrap();
        client
    }

    pub fn fail_part_once(&self, part_number: u32) {
        self.fail_parts.lock().unwrap().insert(part_number);
    }

    pub fn fail_get_at(&self, offset: u64) {
        self.fail_gets_at.lock().unwrap().insert(offset);
    }

    pub fn clear_faults(&self) {
        self.fail_parts.lock().unwrap().clear();
        self.fail_gets_at.lock().unwrap().clear();
        self.break_bodies.store(0, Ordering::SeqCst);
        *self.etag_override.lock().unwrap() = None;
        self.hang_gets.store(false, Ordering::SeqCst);
        self.fail_puts.store(false, Ordering::SeqCst);
        self.fail_initiate.store(false, Ordering::SeqCst);
        self.fail_list_parts.store(false, Ordering::SeqCst);
    }

    pub fn fail_puts(&self) {
        self.fail_puts.store(true, Ordering::SeqCst);
    }

    pub fn fail_initiate(&self) {
        self.fail_initiate.store(true, Ordering::SeqCst);
    }

    pub fn fail_list_parts(&self) {
        self.fail_list_parts.store(true, Ordering::SeqCst);
    }

    pub fn break_next_bodies(&self, count: usize) {
        self.break_bodies.store(count, Ordering::SeqCst);
    }

    pub fn report_etag(&self, etag: &str) {
        *self.etag_override.lock().unwrap() = Some(etag.to_owned());
    }

    pub fn hang_gets(&self) {
        self.hang_gets.store(true, Ordering::SeqCst);
    }

    pub fn get_calls(&self) -> usize {
        self.get_calls.load(Ordering::SeqCst)
    }

    /// Part numbers uploaded successfully, in call order; resets the record
    pub fn take_uploaded_parts(&self) -> Vec<u32> {
        std::mem::take(&mut *self.uploaded_parts.lock().unwrap())
    }

    pub fn object(&self) -> Option<Bytes> {
        self.inner.get(BUCKET, KEY)
    }
}

#[async_trait]
impl OperationClient for FaultyClient {
    async fn head_object(&self, request: &TransferRequest) -> Result<ObjectMeta, Error> {
        self.inner.head_object(request).await
    }

    async fn get_range(
        &self,
        request: &TransferRequest,
        range: HttpRange,
    ) -> Result<GetRangeOutput, Error> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        if self.hang_gets.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.fail_gets_at.lock().unwrap().contains(&range.offset) {
            return Err(injected("InjectedGetFailure"));
        }

        let mut output = self.inner.get_range(request, range).await?;
        let etag_override = self.etag_override.lock().unwrap().clone();
        if let Some(etag) = etag_override {
            output.etag = Some(etag);
        }
        let broken = self
            .break_bodies
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if broken {
            let len = output.content_length.unwrap_or_default();
            output.body = Box::pin(BreakingBody::new(output.body, len / 2));
        }
        Ok(output)
    }

    async fn put_object(
        &self,
        request: &TransferRequest,
        body: Bytes,
    ) -> Result<PutObjectOutput, Error> {
        if self.fail_puts.load(Ordering::SeqCst) {
            return Err(injected("InjectedPutFailure"));
        }
        self.inner.put_object(request, body).await
    }

    async fn initiate_multipart_upload(&self, request: &TransferRequest) -> Result<String, Error> {
        self.initiate_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_initiate.load(Ordering::SeqCst) {
            return Err(injected("InjectedInitiateFailure"));
        }
        self.inner.initiate_multipart_upload(request).await
    }

    async fn upload_part(
        &self,
        request: &TransferRequest,
        upload_id: &str,
        part_number: u32,
        body: Bytes,
    ) -> Result<UploadPartOutput, Error> {
        if self.fail_parts.lock().unwrap().remove(&part_number) {
            return Err(injected("InjectedPartFailure"));
        }
        let output = self
            .inner
            .upload_part(request, upload_id, part_number, body)
            .await?;
        self.uploaded_parts.lock().unwrap().push(part_number);
        Ok(output)
    }

    async fn complete_multipart_upload(
        &self,
        request: &TransferRequest,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> Result<PutObjectOutput, Error> {
        self.inner
            .complete_multipart_upload(request, upload_id, parts)
            .await
    }

    async fn abort_multipart_upload(
        &self,
        request: &TransferRequest,
        upload_id: &str,
    ) -> Result<(), Error> {
        self.abort_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.abort_multipart_upload(request, upload_id).await
    }

    async fn list_parts(
        &self,
        request: &TransferRequest,
        upload_id: &str,
    ) -> Result<Vec<CompletedPart>, Error> {
        if self.fail_list_parts.load(Ordering::SeqCst) {
            return Err(injected("InjectedListPartsFailure"));
        }
        self.inner.list_parts(request, upload_id).await
    }

    async fn append_object(
        &self,
        request: &TransferRequest,
        position: u64,
        body: Bytes,
    ) -> Result<AppendObjectOutput, Error> {
        self.inner.append_object(request, position, body).await
    }
}

pin_project! {
    /// Body that fails with a connection reset after `remaining` bytes
    struct BreakingBody {
        inner: ObjectBody,
        remaining: u64,
    }
}

impl BreakingBody {
    fn new(inner: ObjectBody, remaining: u64) -> Self {
        Self { inner, remaining }
    }
}

impl AsyncRead for BreakingBody {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.project();
        if *this.remaining == 0 {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::ConnectionReset,
                "injected body failure",
            )));
        }
        let max = (*this.remaining).min(buf.remaining() as u64) as usize;
        let mut scratch = vec![0u8; max];
        let mut limited = ReadBuf::new(&mut scratch);
        ready!(this.inner.as_mut().poll_read(cx, &mut limited))?;
        let n = limited.filled().len();
        buf.put_slice(limited.filled());
        *this.remaining -= n as u64;
        Poll::Ready(Ok(()))
    }
}

pin_project! {
    /// Reader that yields `prefix` and then never completes
    pub struct StallingReader {
        prefix: Bytes,
    }
}

impl StallingReader {
    pub fn new(prefix: Bytes) -> Self {
        Self { prefix }
    }
}

impl AsyncRead for StallingReader {
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.project();
        if this.prefix.is_empty() {
            return Poll::Pending;
        }
        let n = this.prefix.len().min(buf.remaining());
        buf.put_slice(&this.prefix.split_to(n));
        Poll::Ready(Ok(()))
    }
}
