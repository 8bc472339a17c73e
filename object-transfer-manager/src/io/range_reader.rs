/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use std::fmt;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};

use futures_util::future::BoxFuture;
use tokio::io::{AsyncRead, ReadBuf};

use crate::client::{GetRangeOutput, ObjectBody, SharedOperationClient};
use crate::error::{self, Error, ErrorKind};
use crate::types::{HttpRange, TransferRequest};

/// Default number of times a broken body is reopened
pub(crate) const DEFAULT_MAX_RESUME_ATTEMPTS: usize = 3;

/// Reads a byte range of a remote object as a single [`AsyncRead`] stream.
///
/// When the response body fails or ends early the reader issues a new ranged
/// GET starting at the current position, up to `max_resume_attempts` times.
/// Every response must come from the same object: the ETag is pinned by the
/// first response (or up front with [`with_etag`](Self::with_etag)) and the
/// `Content-Range` start must match the position that was asked for, otherwise
/// the read fails with [`ErrorKind::SourceChanged`].
///
/// Errors surface as [`std::io::Error`] wrapping the transfer [`Error`], which
/// converts back with `Error::from`.
pub struct RangeReader {
    client: SharedOperationClient,
    request: Arc<TransferRequest>,
    position: u64,
    // exclusive, unknown until the first response for open ended ranges
    end: Option<u64>,
    total: Option<u64>,
    etag: Option<String>,
    max_resume_attempts: usize,
    resumes: usize,
    state: State,
}

enum State {
    Idle,
    Opening(BoxFuture<'static, Result<GetRangeOutput, Error>>),
    Reading(ObjectBody),
    Done,
}

impl fmt::Debug for RangeReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.state {
            State::Idle => "Idle",
            State::Opening(_) => "Opening",
            State::Reading(_) => "Reading",
            State::Done => "Done",
        };
        f.debug_struct("RangeReader")
            .field("request", &self.request)
            .field("position", &self.position)
            .field("end", &self.end)
            .field("etag", &self.etag)
            .field("resumes", &self.resumes)
            .field("state", &state)
            .finish()
    }
}

impl RangeReader {
    /// Create a reader for `range` of the object identified by `request`.
    ///
    /// The range stored on `request` is ignored.
    pub fn new(
        client: SharedOperationClient,
        request: impl Into<Arc<TransferRequest>>,
        range: HttpRange,
    ) -> Self {
        Self {
            client,
            request: request.into(),
            position: range.offset,
            end: range.end(),
            total: None,
            etag: None,
            max_resume_attempts: DEFAULT_MAX_RESUME_ATTEMPTS,
            resumes: 0,
            state: State::Idle,
        }
    }

    /// Require every response to carry this ETag.
    pub fn with_etag(mut self, etag: impl Into<String>) -> Self {
        self.etag = Some(etag.into());
        self
    }

    /// Set the expected ETag, `None` pins whatever the first response carries.
    pub fn set_etag(mut self, etag: Option<String>) -> Self {
        self.etag = etag;
        self
    }

    /// Number of times a broken body may be reopened. Default 3.
    pub fn with_max_resume_attempts(mut self, attempts: usize) -> Self {
        self.max_resume_attempts = attempts;
        self
    }

    /// Current absolute offset in the object
    pub fn position(&self) -> u64 {
        self.position
    }

    /// ETag of the object being read, once known
    pub fn etag(&self) -> Option<&str> {
        self.etag.as_deref()
    }

    fn is_complete(&self) -> bool {
        self.end.is_some_and(|end| self.position >= end)
    }

    fn open(&self) -> BoxFuture<'static, Result<GetRangeOutput, Error>> {
        let range = HttpRange::new(
            self.position,
            self.end.map(|end| end - self.position).unwrap_or_default(),
        );
        tracing::trace!("requesting {} of {}", range, self.request.object_name());
        let client = self.client.clone();
        let request = self.request.clone();
        Box::pin(async move { client.get_range(&request, range).await })
    }

    /// Validate a response against what was asked for
    fn accept(&mut self, output: &GetRangeOutput) -> Result<(), Error> {
        match (&self.etag, &output.etag) {
            (Some(expected), Some(actual)) if expected != actual => {
                return Err(error::source_changed(format!(
                    "etag of {} changed from {expected} to {actual}",
                    self.request.object_name()
                )));
            }
            (None, Some(actual)) => self.etag = Some(actual.clone()),
            _ => {}
        }

        match output.content_range {
            Some(content_range) => {
                if content_range.start != self.position {
                    return Err(error::source_changed(format!(
                        "expected a response starting at {}, got {}",
                        self.position, content_range
                    )));
                }
                if let Some(total) = content_range.total {
                    if self.total.is_some_and(|known| known != total) {
                        return Err(error::source_changed(format!(
                            "size of {} changed to {total}",
                            self.request.object_name()
                        )));
                    }
                    self.total = Some(total);
                    self.end = Some(self.end.map_or(total, |end| end.min(total)));
                } else if self.end.is_none() {
                    self.end = Some(content_range.end + 1);
                }
            }
            None if self.position != 0 => {
                return Err(Error::new(
                    ErrorKind::IOError,
                    format!(
                        "range request at offset {} was not honored, no content range returned",
                        self.position
                    ),
                ));
            }
            None => {
                if let Some(len) = output.content_length {
                    self.total = Some(len);
                    self.end = Some(self.end.map_or(len, |end| end.min(len)));
                }
            }
        }
        Ok(())
    }

    /// Reopen the body at the current position, or give up with `err`
    fn resume(&mut self, err: Error) -> Result<(), Error> {
        if self.resumes >= self.max_resume_attempts {
            return Err(err);
        }
        self.resumes += 1;
        tracing::debug!(
            "resuming read of {} at offset {} (attempt {}): {}",
            self.request.object_name(),
            self.position,
            self.resumes,
            err
        );
        self.state = State::Idle;
        Ok(())
    }
}

impl AsyncRead for RangeReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        loop {
            if buf.remaining() == 0 {
                return Poll::Ready(Ok(()));
            }

            match &mut this.state {
                State::Done => return Poll::Ready(Ok(())),
                State::Idle => {
                    if this.is_complete() {
                        this.state = State::Done;
                        continue;
                    }
                    this.state = State::Opening(this.open());
                }
                State::Opening(fut) => {
                    let result = ready!(fut.as_mut().poll(cx));
                    let output = match result.and_then(|output| {
                        this.accept(&output)?;
                        Ok(output)
                    }) {
                        Ok(output) => output,
                        Err(err) => {
                            this.state = State::Done;
                            return Poll::Ready(Err(err.into()));
                        }
                    };
                    this.state = State::Reading(output.body);
                }
                State::Reading(body) => {
                    let before = buf.filled().len();
                    let result = ready!(body.as_mut().poll_read(cx, buf));
                    let err = match result {
                        Ok(()) => {
                            let mut n = (buf.filled().len() - before) as u64;
                            if n > 0 {
                                if let Some(end) = this.end {
                                    // drop anything past the requested window
                                    if this.position + n > end {
                                        n = end - this.position;
                                        buf.set_filled(before + n as usize);
                                    }
                                }
                                this.position += n;
                                return Poll::Ready(Ok(()));
                            }
                            if this.end.is_none() || this.is_complete() {
                                this.state = State::Done;
                                return Poll::Ready(Ok(()));
                            }
                            Error::new(
                                ErrorKind::IOError,
                                format!(
                                    "response body ended at offset {}, expected {}",
                                    this.position,
                                    this.end.unwrap_or_default()
                                ),
                            )
                        }
                        Err(err) => Error::from(err),
                    };

                    if let Err(err) = this.resume(err) {
                        this.state = State::Done;
                        return Poll::Ready(Err(err.into()));
                    }
                }
            }
        }
    }
}
