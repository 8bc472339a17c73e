/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use std::io;
use std::pin::Pin;
use std::task::{ready, Context, Poll};

use bytes::{Buf, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, ReadBuf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::error::{self, Error, ErrorKind};
use crate::io::RangeReader;

/// Buffering options for an [`AsyncRangeReader`]
#[derive(Debug, Clone, Copy)]
pub struct AsyncReadOptions {
    buffer_count: usize,
    buffer_size: usize,
}

impl Default for AsyncReadOptions {
    fn default() -> Self {
        Self {
            buffer_count: 4,
            buffer_size: 256 * 1024,
        }
    }
}

impl AsyncReadOptions {
    /// Number of filled buffers that may wait for the consumer. Default 4.
    pub fn buffer_count(mut self, count: usize) -> Self {
        self.buffer_count = count.max(1);
        self
    }

    /// Size of each buffer. Default 256 KiB.
    pub fn buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size.max(1);
        self
    }
}

/// A [`RangeReader`] drained by a background task into a bounded queue of buffers.
///
/// The background task stops when the range is exhausted, when the reader is
/// closed or dropped, or when the parent cancellation token fires. A read that is
/// pending at that point fails with [`ErrorKind::Abandoned`] (or
/// [`ErrorKind::OperationCancelled`] for the parent token).
///
/// [`ErrorKind::Abandoned`]: crate::error::ErrorKind::Abandoned
/// [`ErrorKind::OperationCancelled`]: crate::error::ErrorKind::OperationCancelled
#[derive(Debug)]
pub struct AsyncRangeReader {
    rx: mpsc::Receiver<Result<Bytes, Error>>,
    current: Bytes,
    parent: CancellationToken,
    token: CancellationToken,
    task: Option<JoinHandle<()>>,
    finished: bool,
    failed: Option<ErrorKind>,
}

/// Handle that abandons an [`AsyncRangeReader`] from another task.
#[derive(Debug, Clone)]
pub struct AbandonHandle {
    token: CancellationToken,
}

impl AbandonHandle {
    pub(crate) fn new(token: CancellationToken) -> Self {
        Self { token }
    }

    /// Stop the background task, pending and future reads fail with `Abandoned`
    pub fn abandon(&self) {
        self.token.cancel();
    }
}

impl AsyncRangeReader {
    /// Start prefetching `reader` in the background.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(reader: RangeReader, cancel: &CancellationToken, options: AsyncReadOptions) -> Self {
        let token = cancel.child_token();
        let (tx, rx) = mpsc::channel(options.buffer_count);
        let span = tracing::debug_span!("prefetch", start = reader.position());
        let task = tokio::spawn(
            prefetch(reader, tx, token.clone(), options.buffer_size).instrument(span),
        );

        Self {
            rx,
            current: Bytes::new(),
            parent: cancel.clone(),
            token,
            task: Some(task),
            finished: false,
            failed: None,
        }
    }

    /// A handle that can abandon this reader from elsewhere
    pub fn abandon_handle(&self) -> AbandonHandle {
        AbandonHandle::new(self.token.clone())
    }

    /// Stop the background task. Idempotent.
    pub fn close(&mut self) {
        self.token.cancel();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    fn stopped_error(&self) -> Error {
        if self.parent.is_cancelled() {
            error::operation_cancelled()
        } else {
            error::abandoned()
        }
    }
}

impl Drop for AsyncRangeReader {
    fn drop(&mut self) {
        self.close();
    }
}

impl AsyncRead for AsyncRangeReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        loop {
            if this.token.is_cancelled() {
                return Poll::Ready(Err(this.stopped_error().into()));
            }

            if !this.current.is_empty() {
                let n = this.current.len().min(buf.remaining());
                buf.put_slice(&this.current[..n]);
                this.current.advance(n);
                return Poll::Ready(Ok(()));
            }

            // a failed stream stays failed, never report EOF after an error
            if let Some(kind) = &this.failed {
                let err = Error::new(kind.clone(), "a previous read from this range failed");
                return Poll::Ready(Err(err.into()));
            }

            if this.finished {
                return Poll::Ready(Ok(()));
            }

            match ready!(this.rx.poll_recv(cx)) {
                Some(Ok(bytes)) => this.current = bytes,
                Some(Err(err)) => {
                    this.failed = Some(err.kind().clone());
                    return Poll::Ready(Err(err.into()));
                }
                None if this.token.is_cancelled() => {
                    return Poll::Ready(Err(this.stopped_error().into()));
                }
                None => this.finished = true,
            }
        }
    }
}

/// Fill buffers from `reader` until EOF, error or cancellation.
async fn prefetch(
    mut reader: RangeReader,
    tx: mpsc::Sender<Result<Bytes, Error>>,
    token: CancellationToken,
    buffer_size: usize,
) {
    loop {
        let mut buf = BytesMut::with_capacity(buffer_size);
        let filled = tokio::select! {
            _ = token.cancelled() => return,
            result = fill(&mut reader, &mut buf, buffer_size) => result,
        };

        let item = match filled {
            Ok(0) => return,
            Ok(_) => Ok(buf.freeze()),
            Err(err) => Err(err),
        };
        let is_err = item.is_err();
        tokio::select! {
            _ = token.cancelled() => return,
            sent = tx.send(item) => {
                if sent.is_err() || is_err {
                    return;
                }
            }
        }
    }
}

async fn fill(reader: &mut RangeReader, buf: &mut BytesMut, limit: usize) -> Result<usize, Error> {
    while buf.len() < limit {
        let n = reader.read_buf(buf).await?;
        if n == 0 {
            break;
        }
    }
    Ok(buf.len())
}
