/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::checksum::ChecksumAccumulator;
use crate::client::SharedOperationClient;
use crate::config::Config;
use crate::error::{self, Error, ErrorKind};
use crate::file::FileInfo;
use crate::types::{ObjectType, TransferRequest};

/// Sequential writer for an appendable object.
///
/// Every write is an append call at the position this file believes is the end
/// of the object. If the service rejects that position (someone else appended
/// in between) the service error is returned as is and the position is not
/// refreshed. Re-open the file to continue.
#[derive(Debug)]
pub struct AppendFile {
    client: SharedOperationClient,
    request: Arc<TransferRequest>,
    cancel: CancellationToken,
    chunk_size: u64,
    verify_data: bool,
    position: u64,
    /// running checksum of the whole object, `None` when the starting value is unknown
    crc: Option<ChecksumAccumulator>,
    closed: bool,
}

impl AppendFile {
    /// Open `request` for appending, creating the object on the first write
    /// when it does not exist yet.
    ///
    /// `config` supplies the chunk size used by [`write_from`](Self::write_from)
    /// and whether append responses are verified.
    pub async fn open(
        client: SharedOperationClient,
        config: &Config,
        request: TransferRequest,
        cancel: &CancellationToken,
    ) -> Result<Self, Error> {
        let request = Arc::new(request.without_range());
        let head = tokio::select! {
            _ = cancel.cancelled() => return Err(error::operation_cancelled()),
            head = client.head_object(&request) => head,
        };

        let (position, crc) = match head {
            Ok(meta) if meta.object_type != ObjectType::Appendable => {
                return Err(error::invalid_input(format!(
                    "{} is not an appendable object (type {})",
                    request.object_name(),
                    meta.object_type.as_str()
                )));
            }
            Ok(meta) => (
                meta.size,
                meta.crc64
                    .map(|crc| ChecksumAccumulator::from_parts(crc, meta.size)),
            ),
            Err(err) if err.kind() == &ErrorKind::NotFound => {
                (0, Some(ChecksumAccumulator::new()))
            }
            Err(err) => return Err(err),
        };
        tracing::debug!(
            "opened {} for appending at position {position}",
            request.object_name()
        );

        Ok(Self {
            client,
            request,
            cancel: cancel.child_token(),
            chunk_size: config.part_size_bytes(),
            verify_data: config.verify_data(),
            position,
            crc,
            closed: false,
        })
    }

    /// Offset the next append is sent at
    pub fn position(&self) -> u64 {
        self.position
    }

    /// CRC-64 of the whole object as tracked locally, when known
    pub fn crc64(&self) -> Option<u64> {
        self.crc.map(|crc| crc.value())
    }

    /// Append `data` at the current position, returning the number of bytes written.
    pub async fn write(&mut self, data: impl Into<Bytes>) -> Result<usize, Error> {
        self.ensure_open()?;
        let data = data.into();
        if data.is_empty() {
            return Ok(0);
        }

        let resp = tokio::select! {
            _ = self.cancel.cancelled() => return Err(error::operation_cancelled()),
            resp = self
                .client
                .append_object(&self.request, self.position, data.clone())
                .instrument(tracing::debug_span!("send-append-object", position = self.position)) => resp?,
        };

        // the running checksum only advances together with the position
        let mut crc = self.crc;
        if let Some(crc) = crc.as_mut() {
            crc.update(&data);
            if let Some(remote) = resp.crc64.filter(|_| self.verify_data) {
                if remote != crc.value() {
                    return Err(error::checksum_mismatch(
                        &self.request.object_name(),
                        crc.value(),
                        remote,
                    ));
                }
            }
        }

        self.crc = crc;
        self.position = resp.next_position;
        Ok(data.len())
    }

    /// Append everything `reader` yields, one chunk per append call. Returns
    /// the total number of bytes written.
    pub async fn write_from<R>(&mut self, reader: R) -> Result<u64, Error>
    where
        R: AsyncRead + Unpin,
    {
        self.ensure_open()?;
        let mut reader = reader;
        let mut total = 0u64;
        loop {
            let mut chunk = BytesMut::with_capacity(self.chunk_size as usize);
            let mut limited = (&mut reader).take(self.chunk_size);
            while limited.read_buf(&mut chunk).await? > 0 {}
            if chunk.is_empty() {
                return Ok(total);
            }
            total += self.write(chunk.freeze()).await? as u64;
        }
    }

    /// Current metadata of the object
    pub async fn stat(&self) -> Result<FileInfo, Error> {
        self.ensure_open()?;
        let meta = self.client.head_object(&self.request).await?;
        Ok(FileInfo::new(&self.request, &meta))
    }

    /// Release the file. A second close returns [`ErrorKind::Closed`].
    pub fn close(&mut self) -> Result<(), Error> {
        self.ensure_open()?;
        self.closed = true;
        self.cancel.cancel();
        Ok(())
    }

    fn ensure_open(&self) -> Result<(), Error> {
        if self.closed {
            return Err(error::closed());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum;
    use crate::client::memory::MemoryClient;
    use crate::types::PartSize;
    use std::io::Cursor;

    fn request() -> TransferRequest {
        TransferRequest::builder()
            .bucket("bucket")
            .key("log")
            .build()
            .unwrap()
    }

    async fn open(client: &Arc<MemoryClient>, config: &Config) -> AppendFile {
        AppendFile::open(client.clone(), config, request(), &CancellationToken::new())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_append_creates_and_extends() {
        let client = Arc::new(MemoryClient::new());
        let config = Config::default();
        let mut file = open(&client, &config).await;
        assert_eq!(0, file.position());

        assert_eq!(5, file.write("hello").await.unwrap());
        assert_eq!(6, file.write(" world").await.unwrap());
        assert_eq!(11, file.position());
        assert_eq!(Some(checksum::crc64(b"hello world")), file.crc64());
        file.close().unwrap();

        // reopening continues at the end
        let mut file = open(&client, &config).await;
        assert_eq!(11, file.position());
        file.write("!").await.unwrap();
        assert_eq!(
            Some(Bytes::from_static(b"hello world!")),
            client.get("bucket", "log")
        );
        assert_eq!(12, file.stat().await.unwrap().size());
    }

    #[tokio::test]
    async fn test_write_from_reader_in_chunks() {
        let client = Arc::new(MemoryClient::new());
        let config = Config::builder().part_size(PartSize::Target(4)).build();
        let mut file = open(&client, &config).await;
        let written = file
            .write_from(Cursor::new(b"0123456789".to_vec()))
            .await
            .unwrap();
        assert_eq!(10, written);
        assert_eq!(10, file.position());
        assert_eq!(
            Some(Bytes::from_static(b"0123456789")),
            client.get("bucket", "log")
        );
    }

    #[tokio::test]
    async fn test_stale_position_is_surfaced() {
        let client = Arc::new(MemoryClient::new());
        let config = Config::default();
        let mut first = open(&client, &config).await;
        let mut second = open(&client, &config).await;

        first.write("abc").await.unwrap();
        let err = second.write("def").await.unwrap_err();
        assert_eq!(
            "PositionNotEqualToLength",
            err.service_error().unwrap().code()
        );
        assert_eq!(0, second.position());
    }

    #[tokio::test]
    async fn test_checksum_mismatch_leaves_state_untouched() {
        let client = Arc::new(MemoryClient::new());
        let mut file = open(&client, &Config::default()).await;
        file.write("hello").await.unwrap();

        // local view of the object disagrees with what the service has stored
        let wrong = ChecksumAccumulator::from_parts(checksum::crc64(b"jello"), 5);
        file.crc = Some(wrong);
        let err = file.write("!").await.unwrap_err();
        assert_eq!(&ErrorKind::ChecksumMismatch, err.kind());
        assert_eq!(Some(wrong.value()), file.crc64());
        assert_eq!(5, file.position());
    }

    #[tokio::test]
    async fn test_normal_object_is_rejected() {
        let client = Arc::new(MemoryClient::new());
        client.insert("bucket", "log", "data").unwrap();
        let err = AppendFile::open(
            client,
            &Config::default(),
            request(),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
        assert_eq!(&ErrorKind::InputInvalid, err.kind());
    }

    #[tokio::test]
    async fn test_closed_file() {
        let client = Arc::new(MemoryClient::new());
        let mut file = open(&client, &Config::default()).await;
        file.close().unwrap();
        assert_eq!(&ErrorKind::Closed, file.close().unwrap_err().kind());
        assert_eq!(
            &ErrorKind::Closed,
            file.write("x").await.unwrap_err().kind()
        );
    }
}
