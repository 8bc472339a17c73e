/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use std::fmt;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::AsyncRead;

use crate::error::{Error, ErrorKind};
use crate::types::{ContentRange, HttpRange, ObjectType, TransferRequest};

/// In-memory object store implementing [`OperationClient`]
pub mod memory;

/// [`OperationClient`] backed by the Amazon S3 SDK
pub mod s3;

/// Streaming body of a ranged GET
pub type ObjectBody = Pin<Box<dyn AsyncRead + Send>>;

/// Reference counted, type erased [`OperationClient`]
pub type SharedOperationClient = Arc<dyn OperationClient>;

/// Metadata returned by a HEAD request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectMeta {
    /// Object size in bytes
    pub size: u64,
    /// Entity tag
    pub etag: Option<String>,
    /// Last modification time as reported by the service
    pub last_modified: Option<String>,
    /// CRC-64 of the whole object, when the service reports one
    pub crc64: Option<u64>,
    /// Kind of the object
    pub object_type: ObjectType,
    /// Version ID
    pub version_id: Option<String>,
}

/// Response of a ranged GET.
pub struct GetRangeOutput {
    /// Streaming body of the requested range
    pub body: ObjectBody,
    /// Entity tag of the object the bytes came from
    pub etag: Option<String>,
    /// `Content-Range` of the response, absent when the whole object was returned
    pub content_range: Option<ContentRange>,
    /// Number of bytes in `body`, when known
    pub content_length: Option<u64>,
    /// CRC-64 of the whole object, when the service reports one
    pub crc64: Option<u64>,
}

impl fmt::Debug for GetRangeOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GetRangeOutput")
            .field("etag", &self.etag)
            .field("content_range", &self.content_range)
            .field("content_length", &self.content_length)
            .field("crc64", &self.crc64)
            .finish_non_exhaustive()
    }
}

/// Response of a single put or of completing a multipart upload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PutObjectOutput {
    /// Entity tag of the new object
    pub etag: Option<String>,
    /// CRC-64 of the new object, when the service reports one
    pub crc64: Option<u64>,
    /// Version ID of the new object
    pub version_id: Option<String>,
}

/// Response of uploading one part.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadPartOutput {
    /// Entity tag of the part
    pub etag: String,
    /// CRC-64 of the part, when the service reports one
    pub crc64: Option<u64>,
}

/// A part of a multipart upload that has been accepted by the service.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompletedPart {
    /// 1-based part number
    pub part_number: u32,
    /// Entity tag returned when the part was uploaded
    pub etag: String,
    /// CRC-64 of the part data
    pub crc64: Option<u64>,
    /// Size of the part in bytes
    pub size: u64,
}

/// Response of an append.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AppendObjectOutput {
    /// Position the next append must use
    pub next_position: u64,
    /// CRC-64 of the whole object after the append, when the service reports one
    pub crc64: Option<u64>,
}

/// Remote operations the transfer engine is built on.
///
/// Implementations are expected to retry transient transport failures
/// themselves; every error returned here is treated as final for the request.
#[async_trait]
pub trait OperationClient: Send + Sync + fmt::Debug {
    /// Fetch metadata of the object
    async fn head_object(&self, request: &TransferRequest) -> Result<ObjectMeta, Error>;

    /// Fetch `range` of the object. The request's own range is ignored.
    async fn get_range(
        &self,
        request: &TransferRequest,
        range: HttpRange,
    ) -> Result<GetRangeOutput, Error>;

    /// Write the object with a single request
    async fn put_object(
        &self,
        request: &TransferRequest,
        body: Bytes,
    ) -> Result<PutObjectOutput, Error>;

    /// Start a multipart upload and return its ID
    async fn initiate_multipart_upload(&self, request: &TransferRequest) -> Result<String, Error>;

    /// Upload one part of a multipart upload
    async fn upload_part(
        &self,
        request: &TransferRequest,
        upload_id: &str,
        part_number: u32,
        body: Bytes,
    ) -> Result<UploadPartOutput, Error>;

    /// Assemble the object from `parts`, which must be sorted by part number
    async fn complete_multipart_upload(
        &self,
        request: &TransferRequest,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> Result<PutObjectOutput, Error>;

    /// Discard a multipart upload and all of its parts
    async fn abort_multipart_upload(
        &self,
        request: &TransferRequest,
        upload_id: &str,
    ) -> Result<(), Error>;

    /// List the parts the service holds for a multipart upload
    async fn list_parts(
        &self,
        request: &TransferRequest,
        upload_id: &str,
    ) -> Result<Vec<CompletedPart>, Error>;

    /// Append `body` to an appendable object at `position`
    async fn append_object(
        &self,
        request: &TransferRequest,
        position: u64,
        body: Bytes,
    ) -> Result<AppendObjectOutput, Error> {
        let _ = (request, position, body);
        Err(Error::new(
            ErrorKind::Unsupported,
            "append is not supported by this client",
        ))
    }
}
