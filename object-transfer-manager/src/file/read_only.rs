/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use std::collections::VecDeque;
use std::io::SeekFrom;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::sync::CancellationToken;

use crate::client::SharedOperationClient;
use crate::config::ReadOnlyFileOptions;
use crate::error::{self, Error, ErrorKind};
use crate::file::FileInfo;
use crate::io::{AbandonHandle, AsyncRangeReader, AsyncReadOptions, RangeReader};
use crate::types::{HttpRange, TransferRequest};

/// A seekable, read-only view of a remote object.
///
/// Reads are served by ranged GETs from the current offset. With prefetching
/// enabled, once enough bytes have been read sequentially the file keeps
/// `prefetch_num` windows of `chunk_size` bytes downloading ahead of the read
/// position. Too many out-of-order reads in a row drop it back to direct reads.
///
/// After [`close`](Self::close) every call fails with [`ErrorKind::Closed`].
/// Another task can stop a blocked read through an [`AbandonHandle`], the read
/// and every later one fail with [`ErrorKind::Abandoned`].
#[derive(Debug)]
pub struct ReadOnlyFile {
    client: SharedOperationClient,
    request: Arc<TransferRequest>,
    options: ReadOnlyFileOptions,
    cancel: CancellationToken,
    abandon: CancellationToken,
    info: FileInfo,
    offset: u64,
    closed: bool,
    /// bytes read in order since the last jump
    sequential: u64,
    /// offset just past the previous read
    last_end: Option<u64>,
    out_of_order: usize,
    prefetch: Option<Prefetcher>,
}

impl ReadOnlyFile {
    /// Open the object identified by `request`, fetching its size and ETag.
    ///
    /// Any range on `request` is ignored. Cancelling `cancel` fails pending and
    /// future reads with [`ErrorKind::OperationCancelled`].
    pub async fn open(
        client: SharedOperationClient,
        request: TransferRequest,
        options: ReadOnlyFileOptions,
        cancel: &CancellationToken,
    ) -> Result<Self, Error> {
        let request = Arc::new(request.without_range());
        let meta = tokio::select! {
            _ = cancel.cancelled() => return Err(error::operation_cancelled()),
            meta = client.head_object(&request) => meta?,
        };
        let info = FileInfo::new(&request, &meta);
        tracing::debug!("opened {} ({} bytes)", info.name(), info.size());

        Ok(Self {
            client,
            request,
            options,
            cancel: cancel.child_token(),
            abandon: CancellationToken::new(),
            info,
            offset: 0,
            closed: false,
            sequential: 0,
            last_end: None,
            out_of_order: 0,
            prefetch: None,
        })
    }

    /// Metadata captured when the file was opened
    pub fn stat(&self) -> Result<FileInfo, Error> {
        self.ensure_open()?;
        Ok(self.info.clone())
    }

    /// Current read offset
    pub fn position(&self) -> u64 {
        self.offset
    }

    /// Move the read offset.
    ///
    /// The resulting offset must lie within `[0, size]`. On error the offset is
    /// left unchanged.
    pub fn seek(&mut self, pos: SeekFrom) -> Result<u64, Error> {
        self.ensure_open()?;
        let size = self.info.size();
        let target = match pos {
            SeekFrom::Start(n) => n as i128,
            SeekFrom::Current(delta) => self.offset as i128 + delta as i128,
            SeekFrom::End(delta) => size as i128 + delta as i128,
        };
        if target < 0 {
            return Err(Error::new(
                ErrorKind::NegativeOffset,
                format!("seek to negative offset {target}"),
            ));
        }
        if target > size as i128 {
            return Err(Error::new(
                ErrorKind::OffsetOutOfRange,
                format!("offset {target} is beyond the end of the object ({size} bytes)"),
            ));
        }
        self.offset = target as u64;
        Ok(self.offset)
    }

    /// Read into `buf` from the current offset, returning the number of bytes
    /// read. Zero means end of object.
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize, Error> {
        self.ensure_open()?;
        if buf.is_empty() || self.offset >= self.info.size() {
            return Ok(0);
        }

        self.track_access();
        let offset = self.offset;
        let abandon = self.abandon.clone();
        let result = tokio::select! {
            biased;
            _ = abandon.cancelled() => Err(error::abandoned()),
            result = self.read_at(offset, buf) => result,
        };
        let n = match result {
            Ok(n) => n,
            Err(err) => {
                // a failed window cannot be trusted for the next read
                self.prefetch = None;
                return Err(err);
            }
        };

        self.offset += n as u64;
        self.sequential += n as u64;
        self.last_end = Some(self.offset);
        Ok(n)
    }

    /// Stop any prefetching and release the file. A second close returns
    /// [`ErrorKind::Closed`].
    pub fn close(&mut self) -> Result<(), Error> {
        if self.closed {
            return Err(error::closed());
        }
        self.closed = true;
        self.prefetch = None;
        self.cancel.cancel();
        Ok(())
    }

    /// A handle that abandons this file from another task
    pub fn abandon_handle(&self) -> AbandonHandle {
        AbandonHandle::new(self.abandon.clone())
    }

    /// Whether reads are currently served by prefetch windows
    pub fn is_prefetching(&self) -> bool {
        self.prefetch.is_some()
    }

    fn ensure_open(&self) -> Result<(), Error> {
        if self.closed {
            return Err(error::closed());
        }
        if self.abandon.is_cancelled() {
            return Err(error::abandoned());
        }
        Ok(())
    }

    async fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize, Error> {
        match self.prefetch.as_mut() {
            Some(prefetch) => prefetch.read(offset, buf).await,
            None => self.read_direct(buf).await,
        }
    }

    /// Update the access pattern counters and switch between direct and
    /// prefetch reads accordingly.
    fn track_access(&mut self) {
        let in_order = self.last_end.map_or(true, |end| end == self.offset);
        if in_order {
            self.out_of_order = 0;
        } else {
            self.out_of_order += 1;
            self.sequential = 0;
        }

        if self.prefetch.is_some() {
            if self.out_of_order > self.options.out_of_order_read_threshold {
                tracing::debug!(
                    "{} out of order reads, falling back to direct reads",
                    self.out_of_order
                );
                self.prefetch = None;
            }
        } else if self.options.enable_prefetch
            && self.out_of_order == 0
            && self.sequential >= self.options.prefetch_threshold
        {
            tracing::debug!("starting prefetch at offset {}", self.offset);
            self.prefetch = Some(Prefetcher {
                client: self.client.clone(),
                request: self.request.clone(),
                etag: self.info.etag().map(str::to_owned),
                cancel: self.cancel.clone(),
                chunk_size: self.options.chunk_size,
                prefetch_num: self.options.prefetch_num,
                size: self.info.size(),
                windows: VecDeque::new(),
            });
        }
    }

    async fn read_direct(&mut self, buf: &mut [u8]) -> Result<usize, Error> {
        let len = (self.info.size() - self.offset).min(buf.len() as u64);
        let mut reader = RangeReader::new(
            self.client.clone(),
            self.request.clone(),
            HttpRange::new(self.offset, len),
        )
        .set_etag(self.info.etag().map(str::to_owned));

        tokio::select! {
            _ = self.cancel.cancelled() => Err(error::operation_cancelled()),
            n = read_full(&mut reader, &mut buf[..len as usize]) => n,
        }
    }
}

impl Drop for ReadOnlyFile {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Fill `buf` unless the reader ends first
async fn read_full<R: AsyncRead + Unpin>(reader: &mut R, buf: &mut [u8]) -> Result<usize, Error> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

/// A window of the object downloading in the background
#[derive(Debug)]
struct Window {
    start: u64,
    end: u64,
    /// next offset the reader yields
    pos: u64,
    reader: AsyncRangeReader,
}

/// Sliding set of consecutive windows ahead of the read position
#[derive(Debug)]
struct Prefetcher {
    client: SharedOperationClient,
    request: Arc<TransferRequest>,
    etag: Option<String>,
    cancel: CancellationToken,
    chunk_size: u64,
    prefetch_num: usize,
    size: u64,
    windows: VecDeque<Window>,
}

impl Prefetcher {
    async fn read(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize, Error> {
        let mut filled = 0;
        while filled < buf.len() && offset + (filled as u64) < self.size {
            let pos = offset + filled as u64;
            self.position_at(pos).await?;
            let Some(window) = self.windows.front_mut() else {
                break;
            };

            let want = ((window.end - window.pos) as usize).min(buf.len() - filled);
            let n = window.reader.read(&mut buf[filled..filled + want]).await?;
            if n == 0 {
                return Err(Error::new(
                    ErrorKind::IOError,
                    format!(
                        "prefetch window [{}, {}) ended at offset {}",
                        window.start, window.end, window.pos
                    ),
                ));
            }
            window.pos += n as u64;
            filled += n;
        }
        Ok(filled)
    }

    /// Make the front window yield `pos` next, starting a new set of windows
    /// when `pos` is not ahead of the current one.
    async fn position_at(&mut self, pos: u64) -> Result<(), Error> {
        while self.windows.front().is_some_and(|w| w.end <= pos) {
            self.windows.pop_front();
        }

        let reusable = self
            .windows
            .front()
            .is_some_and(|w| w.start <= pos && w.pos <= pos);
        if !reusable {
            tracing::trace!("no prefetch window holds offset {pos}, starting a new one");
            self.windows.clear();
            self.spawn_window(pos);
        }
        self.fill();

        if let Some(window) = self.windows.front_mut() {
            let skip = pos - window.pos;
            if skip > 0 {
                let mut discard = (&mut window.reader).take(skip);
                let skipped = tokio::io::copy(&mut discard, &mut tokio::io::sink()).await?;
                window.pos += skipped;
                if skipped != skip {
                    return Err(Error::new(
                        ErrorKind::IOError,
                        format!("prefetch window ended before offset {pos}"),
                    ));
                }
            }
        }
        Ok(())
    }

    /// Top up the queue to `prefetch_num` windows
    fn fill(&mut self) {
        while self.windows.len() < self.prefetch_num {
            let Some(next) = self.windows.back().map(|w| w.end) else {
                return;
            };
            if next >= self.size {
                return;
            }
            self.spawn_window(next);
        }
    }

    fn spawn_window(&mut self, start: u64) {
        let end = (start + self.chunk_size).min(self.size);
        let reader = RangeReader::new(
            self.client.clone(),
            self.request.clone(),
            HttpRange::new(start, end - start),
        )
        .set_etag(self.etag.clone());
        self.windows.push_back(Window {
            start,
            end,
            pos: start,
            reader: AsyncRangeReader::new(reader, &self.cancel, AsyncReadOptions::default()),
        });
    }
}
