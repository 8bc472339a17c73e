/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use std::fmt;
use std::io::SeekFrom;
use std::path::Path;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeek, AsyncSeekExt};

use crate::error::Error;
use crate::io::path_body::{PathBody, PathBodyBuilder};
use crate::io::size_hint::SizeHint;

/// Source of binary data for an upload.
///
/// `InputStream` wraps an in-memory buffer, a region of a local file, or an
/// arbitrary reader.
#[derive(Debug)]
pub struct InputStream {
    pub(super) inner: RawInputStream,
}

impl InputStream {
    /// Create a new `InputStream` from a static byte slice
    pub fn from_static(bytes: &'static [u8]) -> Self {
        let inner = RawInputStream::Buf(bytes.into());
        Self { inner }
    }

    /// Return the bounds on the remaining length of the `InputStream`
    pub fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }

    /// Returns a [`PathBodyBuilder`], allowing you to build a `InputStream` with
    /// full control over how the file is read (eg. specifying the length of
    /// the file or the starting offset to read from).
    ///
    /// ```no_run
    /// # {
    /// use object_transfer_manager::io::InputStream;
    ///
    /// async fn input_stream_from_file() -> InputStream {
    ///     let stream = InputStream::read_from()
    ///         .path("docs/some-large-file.csv")
    ///         .offset(1024)
    ///         .length(123_456)
    ///         .build()
    ///         .expect("valid path");
    ///     stream
    /// }
    /// # }
    /// ```
    pub fn read_from() -> PathBodyBuilder {
        PathBodyBuilder::new()
    }

    /// Create a new `InputStream` that reads data from a given `path`.
    ///
    /// ## Warning
    /// The contents of the file MUST not change while it is being uploaded.
    pub fn from_path(path: impl AsRef<Path>) -> Result<InputStream, Error> {
        Self::read_from().path(path.as_ref()).build()
    }

    /// Create a new `InputStream` from a reader of unknown length.
    ///
    /// The reader is consumed sequentially, one part at a time.
    pub fn from_reader<R>(reader: R) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        let inner = RawInputStream::Dyn(DynBody {
            reader: Box::new(reader),
            size: None,
        });
        Self { inner }
    }

    /// Create a new `InputStream` from a seekable reader.
    ///
    /// The remaining length (from the current position to the end) is measured up
    /// front so the upload can pick a part size and decide between a single put and
    /// a multipart upload.
    pub async fn from_seekable<R>(mut reader: R) -> Result<Self, Error>
    where
        R: AsyncRead + AsyncSeek + Send + Unpin + 'static,
    {
        let position = reader.stream_position().await?;
        let end = reader.seek(SeekFrom::End(0)).await?;
        reader.seek(SeekFrom::Start(position)).await?;
        let inner = RawInputStream::Dyn(DynBody {
            reader: Box::new(reader),
            size: Some(end.saturating_sub(position)),
        });
        Ok(Self { inner })
    }

    /// Read the whole stream into memory
    pub(crate) async fn read_all(self) -> Result<Bytes, Error> {
        match self.inner {
            RawInputStream::Buf(bytes) => Ok(bytes),
            RawInputStream::Fs(body) => {
                let mut file = tokio::fs::File::open(&body.path).await?;
                file.seek(SeekFrom::Start(body.offset)).await?;
                let mut data = Vec::with_capacity(body.length as usize);
                file.take(body.length).read_to_end(&mut data).await?;
                Ok(Bytes::from(data))
            }
            RawInputStream::Dyn(mut body) => {
                let mut data = Vec::new();
                body.reader.read_to_end(&mut data).await?;
                Ok(Bytes::from(data))
            }
        }
    }
}

pub(super) enum RawInputStream {
    /// In-memory buffer to read from
    Buf(Bytes),
    /// File based input
    Fs(PathBody),
    /// User provided reader
    Dyn(DynBody),
}

pub(super) struct DynBody {
    pub(super) reader: Box<dyn AsyncRead + Send + Unpin>,
    pub(super) size: Option<u64>,
}

impl fmt::Debug for RawInputStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RawInputStream::Buf(bytes) => f.debug_tuple("Buf").field(&bytes.len()).finish(),
            RawInputStream::Fs(body) => f.debug_tuple("Fs").field(body).finish(),
            RawInputStream::Dyn(body) => f
                .debug_struct("Dyn")
                .field("size", &body.size)
                .finish_non_exhaustive(),
        }
    }
}

impl RawInputStream {
    pub(super) fn size_hint(&self) -> SizeHint {
        match self {
            RawInputStream::Buf(bytes) => SizeHint::exact(bytes.len() as u64),
            RawInputStream::Fs(path_body) => SizeHint::exact(path_body.length),
            RawInputStream::Dyn(body) => body.size.map(SizeHint::exact).unwrap_or_default(),
        }
    }
}

impl Default for InputStream {
    fn default() -> Self {
        Self {
            inner: RawInputStream::Buf(Bytes::default()),
        }
    }
}

impl From<Bytes> for InputStream {
    fn from(value: Bytes) -> Self {
        Self {
            inner: RawInputStream::Buf(value),
        }
    }
}

impl From<Vec<u8>> for InputStream {
    fn from(value: Vec<u8>) -> Self {
        Self::from(Bytes::from(value))
    }
}

impl From<&'static [u8]> for InputStream {
    fn from(slice: &'static [u8]) -> InputStream {
        Self::from(Bytes::from_static(slice))
    }
}

impl From<&'static str> for InputStream {
    fn from(slice: &'static str) -> InputStream {
        Self::from(Bytes::from_static(slice.as_bytes()))
    }
}
