/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */
use std::cmp;
use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard};

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{Error, ErrorKind};
use crate::io::path_body::PathBody;
use crate::io::stream::RawInputStream;
use crate::io::InputStream;

/// Builder for creating a `PartReader`
#[derive(Debug)]
pub(crate) struct Builder {
    stream: Option<RawInputStream>,
    part_size: u64,
    skip: HashSet<u32>,
}

impl Builder {
    pub(crate) fn new() -> Self {
        Self {
            stream: None,
            part_size: crate::config::DEFAULT_PART_SIZE,
            skip: HashSet::new(),
        }
    }

    /// Set the input stream to read from.
    pub(crate) fn stream(mut self, stream: InputStream) -> Self {
        self.stream = Some(stream.inner);
        self
    }

    /// Set the target part size that should be used when reading data.
    ///
    /// All parts except for possibly the last one should be of this size.
    pub(crate) fn part_size(mut self, part_size: u64) -> Self {
        self.part_size = part_size;
        self
    }

    /// Part numbers that have already been uploaded and must not be read again.
    ///
    /// Only honored by seekable sources (buffers and files); readers are consumed
    /// sequentially and skipped parts are read and dropped.
    pub(crate) fn skip_parts(mut self, parts: impl IntoIterator<Item = u32>) -> Self {
        self.skip.extend(parts);
        self
    }

    pub(crate) fn build(self) -> Result<PartReader, Error> {
        let stream = self
            .stream
            .ok_or_else(|| Error::new(ErrorKind::RuntimeError, "input stream not set"))?;
        Ok(PartReader::new(stream, self.part_size.max(1), self.skip))
    }
}

/// Splits an [`InputStream`] into numbered parts.
///
/// Safe to share between workers, each call to `next_part` claims the next part.
#[derive(Debug)]
pub(crate) struct PartReader {
    inner: Inner,
    part_size: u64,
    skip: HashSet<u32>,
    pushed_back: Mutex<Option<PartData>>, // std Mutex
}

#[derive(Debug)]
enum Inner {
    Bytes(BytesPartReader),
    Fs(PathBodyPartReader),
    Dyn(DynPartReader),
}

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>, Error> {
    mutex
        .lock()
        .map_err(|_| Error::new(ErrorKind::RuntimeError, "part reader state poisoned"))
}

impl PartReader {
    fn new(raw: RawInputStream, part_size: u64, skip: HashSet<u32>) -> Self {
        let inner = match raw {
            RawInputStream::Buf(buf) => Inner::Bytes(BytesPartReader::new(buf)),
            RawInputStream::Fs(path_body) => Inner::Fs(PathBodyPartReader::new(path_body)),
            RawInputStream::Dyn(body) => Inner::Dyn(DynPartReader::new(body.reader)),
        };

        Self {
            inner,
            part_size,
            skip,
            pushed_back: Mutex::new(None),
        }
    }

    /// Read the next part, `None` once the stream is exhausted.
    pub(crate) async fn next_part(&self) -> Result<Option<PartData>, Error> {
        let pushed_back = lock(&self.pushed_back)?.take();
        if let Some(part) = pushed_back {
            return Ok(Some(part));
        }

        match &self.inner {
            Inner::Bytes(bytes) => bytes.next_part(self.part_size, &self.skip),
            Inner::Fs(path_body) => path_body.next_part(self.part_size, &self.skip).await,
            Inner::Dyn(reader) => loop {
                match reader.next_part(self.part_size).await? {
                    Some(part) if self.skip.contains(&part.part_number) => continue,
                    part => break Ok(part),
                }
            },
        }
    }

    /// Return a part so the next call to `next_part` yields it again.
    pub(crate) fn push_back(&self, part: PartData) -> Result<(), Error> {
        *lock(&self.pushed_back)? = Some(part);
        Ok(())
    }
}

/// Contents of a single part of a multipart upload.
#[derive(Debug, Clone)]
pub(crate) struct PartData {
    // 1-indexed
    pub(crate) part_number: u32,
    // offset of the part within the stream
    pub(crate) offset: u64,
    pub(crate) data: Bytes,
}

impl PartData {
    fn new(part_number: u32, offset: u64, data: impl Into<Bytes>) -> Self {
        Self {
            part_number,
            offset,
            data: data.into(),
        }
    }
}

#[derive(Debug)]
struct PartReaderState {
    // current start offset
    offset: u64,
    // current part number
    part_number: u32,
    // total number of bytes remaining to be read
    remaining: u64,
}

impl PartReaderState {
    fn new(content_length: u64) -> Self {
        Self {
            offset: 0,
            part_number: 1,
            remaining: content_length,
        }
    }

    /// Claim the next part that is not in `skip`, returning `(part_number, offset, size)`
    /// where `offset` is relative to the start of the stream.
    fn claim(&mut self, part_size: u64, skip: &HashSet<u32>) -> Option<(u32, u64, u64)> {
        loop {
            if self.remaining == 0 {
                return None;
            }
            let size = cmp::min(part_size, self.remaining);
            let claimed = (self.part_number, self.offset, size);
            self.part_number += 1;
            self.offset += size;
            self.remaining -= size;
            if !skip.contains(&claimed.0) {
                return Some(claimed);
            }
        }
    }
}

/// Implementation for in-memory input streams.
#[derive(Debug)]
struct BytesPartReader {
    buf: Bytes,
    state: Mutex<PartReaderState>, // std Mutex
}

impl BytesPartReader {
    fn new(buf: Bytes) -> Self {
        let content_length = buf.len() as u64;
        Self {
            buf,
            state: Mutex::new(PartReaderState::new(content_length)),
        }
    }

    fn next_part(&self, part_size: u64, skip: &HashSet<u32>) -> Result<Option<PartData>, Error> {
        let mut state = lock(&self.state)?;
        Ok(state
            .claim(part_size, skip)
            .map(|(part_number, offset, size)| {
                let start = offset as usize;
                let data = self.buf.slice(start..start + size as usize);
                PartData::new(part_number, offset, data)
            }))
    }
}

/// Implementation for path based input streams
#[derive(Debug)]
struct PathBodyPartReader {
    body: PathBody,
    state: Mutex<PartReaderState>, // std Mutex
}

impl PathBodyPartReader {
    fn new(body: PathBody) -> Self {
        let content_length = body.length;
        Self {
            body,
            state: Mutex::new(PartReaderState::new(content_length)),
        }
    }

    async fn next_part(
        &self,
        part_size: u64,
        skip: &HashSet<u32>,
    ) -> Result<Option<PartData>, Error> {
        let claimed = lock(&self.state)?.claim(part_size, skip);
        let Some((part_number, offset, size)) = claimed else {
            return Ok(None);
        };

        let path = self.body.path.clone();
        let file_offset = self.body.offset + offset;
        let handle = tokio::task::spawn_blocking(move || {
            let mut dst = vec![0u8; size as usize];
            file_util::read_file_chunk_sync(&mut dst, path, file_offset)?;
            Ok::<PartData, Error>(PartData::new(part_number, offset, dst))
        });

        handle.await?.map(Some)
    }
}

mod file_util {
    #[cfg(unix)]
    pub(super) use unix::read_file_chunk_sync;
    #[cfg(windows)]
    pub(super) use windows::read_file_chunk_sync;

    #[cfg(unix)]
    mod unix {
        use std::fs::File;
        use std::io;
        use std::os::unix::fs::FileExt;
        use std::path::Path;

        pub(crate) fn read_file_chunk_sync(
            dst: &mut [u8],
            path: impl AsRef<Path>,
            offset: u64,
        ) -> Result<(), io::Error> {
            let file = File::open(path)?;
            file.read_exact_at(dst, offset)
        }
    }

    #[cfg(windows)]
    mod windows {
        use std::fs::File;
        use std::io;
        use std::io::{Read, Seek, SeekFrom};
        use std::path::Path;

        pub(crate) fn read_file_chunk_sync(
            dst: &mut [u8],
            path: impl AsRef<Path>,
            offset: u64,
        ) -> Result<(), io::Error> {
            let mut file = File::open(path)?;
            file.seek(SeekFrom::Start(offset))?;
            file.read_exact(dst)
        }
    }
}

/// Implementation for readers of unknown length, consumed one part at a time
struct DynPartReader {
    inner: tokio::sync::Mutex<DynState>,
}

struct DynState {
    reader: Box<dyn AsyncRead + Send + Unpin>,
    part_number: u32,
    offset: u64,
    done: bool,
}

impl std::fmt::Debug for DynPartReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DynPartReader").finish_non_exhaustive()
    }
}

impl DynPartReader {
    fn new(reader: Box<dyn AsyncRead + Send + Unpin>) -> Self {
        Self {
            inner: tokio::sync::Mutex::new(DynState {
                reader,
                part_number: 1,
                offset: 0,
                done: false,
            }),
        }
    }

    async fn next_part(&self, part_size: u64) -> Result<Option<PartData>, Error> {
        let mut state = self.inner.lock().await;
        if state.done {
            return Ok(None);
        }

        let mut data = Vec::with_capacity(part_size as usize);
        (&mut state.reader)
            .take(part_size)
            .read_to_end(&mut data)
            .await?;
        if (data.len() as u64) < part_size {
            state.done = true;
        }
        if data.is_empty() {
            return Ok(None);
        }

        let part = PartData::new(state.part_number, state.offset, data);
        state.part_number += 1;
        state.offset += part.data.len() as u64;
        Ok(Some(part))
    }
}
