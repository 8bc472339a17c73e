/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use std::collections::{BTreeMap, HashMap};
use std::io::Cursor;
use std::sync::{Mutex, MutexGuard};
use std::time::SystemTime;

use async_trait::async_trait;
use aws_smithy_types::date_time::Format;
use aws_smithy_types::DateTime;
use bytes::{Bytes, BytesMut};

use crate::checksum;
use crate::client::{
    AppendObjectOutput, CompletedPart, GetRangeOutput, ObjectMeta, OperationClient,
    PutObjectOutput, UploadPartOutput,
};
use crate::error::{Error, ErrorKind, ServiceError};
use crate::types::{ContentRange, HttpRange, ObjectType, TransferRequest};

type ObjectKey = (String, String);

/// An [`OperationClient`] keeping objects in memory.
///
/// Behaves like the service for the operations the transfer engine uses: ranged
/// reads answer with `Content-Range`, multipart uploads are assembled in part
/// number order and every response carries a CRC-64.
#[derive(Debug, Default)]
pub struct MemoryClient {
    state: Mutex<State>, // std Mutex
}

#[derive(Debug, Default)]
struct State {
    objects: HashMap<ObjectKey, StoredObject>,
    uploads: HashMap<String, PendingUpload>,
    next_upload_id: u64,
}

#[derive(Debug, Clone)]
struct StoredObject {
    data: Bytes,
    etag: String,
    last_modified: String,
    crc64: u64,
    object_type: ObjectType,
}

impl StoredObject {
    fn new(data: Bytes, etag: String, object_type: ObjectType) -> Self {
        let crc64 = checksum::crc64(&data);
        Self {
            data,
            etag,
            last_modified: now(),
            crc64,
            object_type,
        }
    }
}

#[derive(Debug)]
struct PendingUpload {
    key: ObjectKey,
    parts: BTreeMap<u32, StoredPart>,
}

#[derive(Debug)]
struct StoredPart {
    data: Bytes,
    etag: String,
    crc64: u64,
}

fn now() -> String {
    DateTime::from(SystemTime::now())
        .fmt(Format::DateTime)
        .unwrap_or_default()
}

fn etag_of(data: &[u8]) -> String {
    format!("\"{:X}\"", md5::compute(data))
}

fn object_key(request: &TransferRequest) -> ObjectKey {
    (request.bucket().to_owned(), request.key().to_owned())
}

fn no_such_key(request: &TransferRequest) -> Error {
    ServiceError::new(
        404,
        "NoSuchKey",
        format!("the specified key does not exist: {}", request.object_name()),
    )
    .into()
}

fn no_such_upload(upload_id: &str) -> Error {
    ServiceError::new(
        404,
        "NoSuchUpload",
        format!("the specified upload does not exist: {upload_id}"),
    )
    .into()
}

impl MemoryClient {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>, Error> {
        self.state
            .lock()
            .map_err(|_| Error::new(ErrorKind::RuntimeError, "memory client state poisoned"))
    }

    /// Store `data` under `bucket`/`key` as a normal object, replacing any existing one
    pub fn insert(&self, bucket: &str, key: &str, data: impl Into<Bytes>) -> Result<(), Error> {
        let data = data.into();
        let object = StoredObject::new(data.clone(), etag_of(&data), ObjectType::Normal);
        let mut state = self.lock()?;
        state
            .objects
            .insert((bucket.to_owned(), key.to_owned()), object);
        Ok(())
    }

    /// Contents of `bucket`/`key`
    pub fn get(&self, bucket: &str, key: &str) -> Option<Bytes> {
        let state = self.state.lock().ok()?;
        state
            .objects
            .get(&(bucket.to_owned(), key.to_owned()))
            .map(|o| o.data.clone())
    }

    /// Number of multipart uploads that were neither completed nor aborted
    pub fn pending_uploads(&self) -> usize {
        self.state.lock().map(|s| s.uploads.len()).unwrap_or_default()
    }
}

#[async_trait]
impl OperationClient for MemoryClient {
    async fn head_object(&self, request: &TransferRequest) -> Result<ObjectMeta, Error> {
        let state = self.lock()?;
        let object = state
            .objects
            .get(&object_key(request))
            .ok_or_else(|| no_such_key(request))?;
        Ok(ObjectMeta {
            size: object.data.len() as u64,
            etag: Some(object.etag.clone()),
            last_modified: Some(object.last_modified.clone()),
            crc64: Some(object.crc64),
            object_type: object.object_type.clone(),
            version_id: request.version_id().map(str::to_owned),
        })
    }

    async fn get_range(
        &self,
        request: &TransferRequest,
        range: HttpRange,
    ) -> Result<GetRangeOutput, Error> {
        let object = {
            let state = self.lock()?;
            state
                .objects
                .get(&object_key(request))
                .cloned()
                .ok_or_else(|| no_such_key(request))?
        };

        let size = object.data.len() as u64;
        let (data, content_range) = if size == 0 && range.offset == 0 {
            (Bytes::new(), None)
        } else {
            let (start, end) = range.window(size).map_err(|_| {
                Error::from(ServiceError::new(
                    416,
                    "InvalidRange",
                    format!("the requested range {range} is not satisfiable"),
                ))
            })?;
            (
                object.data.slice(start as usize..end as usize),
                Some(ContentRange::new(start, end - 1, Some(size))),
            )
        };

        Ok(GetRangeOutput {
            content_length: Some(data.len() as u64),
            body: Box::pin(Cursor::new(data)),
            etag: Some(object.etag),
            content_range,
            crc64: Some(object.crc64),
        })
    }

    async fn put_object(
        &self,
        request: &TransferRequest,
        body: Bytes,
    ) -> Result<PutObjectOutput, Error> {
        let object = StoredObject::new(body.clone(), etag_of(&body), ObjectType::Normal);
        let output = PutObjectOutput {
            etag: Some(object.etag.clone()),
            crc64: Some(object.crc64),
            version_id: None,
        };
        let mut state = self.lock()?;
        state.objects.insert(object_key(request), object);
        Ok(output)
    }

    async fn initiate_multipart_upload(&self, request: &TransferRequest) -> Result<String, Error> {
        let mut state = self.lock()?;
        state.next_upload_id += 1;
        let upload_id = format!("upload-{:08}", state.next_upload_id);
        state.uploads.insert(
            upload_id.clone(),
            PendingUpload {
                key: object_key(request),
                parts: BTreeMap::new(),
            },
        );
        Ok(upload_id)
    }

    async fn upload_part(
        &self,
        _request: &TransferRequest,
        upload_id: &str,
        part_number: u32,
        body: Bytes,
    ) -> Result<UploadPartOutput, Error> {
        if !(1..=10_000).contains(&part_number) {
            return Err(ServiceError::new(
                400,
                "InvalidArgument",
                format!("part number must be between 1 and 10000, got {part_number}"),
            )
            .into());
        }
        let part = StoredPart {
            etag: etag_of(&body),
            crc64: checksum::crc64(&body),
            data: body,
        };
        let output = UploadPartOutput {
            etag: part.etag.clone(),
            crc64: Some(part.crc64),
        };
        let mut state = self.lock()?;
        let upload = state
            .uploads
            .get_mut(upload_id)
            .ok_or_else(|| no_such_upload(upload_id))?;
        upload.parts.insert(part_number, part);
        Ok(output)
    }

    async fn complete_multipart_upload(
        &self,
        _request: &TransferRequest,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> Result<PutObjectOutput, Error> {
        let mut state = self.lock()?;
        let upload = state
            .uploads
            .get(upload_id)
            .ok_or_else(|| no_such_upload(upload_id))?;

        if parts.windows(2).any(|w| w[0].part_number >= w[1].part_number) {
            return Err(ServiceError::new(
                400,
                "InvalidPartOrder",
                "the list of parts was not in ascending order",
            )
            .into());
        }

        let mut data = BytesMut::new();
        for part in parts {
            match upload.parts.get(&part.part_number) {
                Some(stored) if stored.etag == part.etag => data.extend_from_slice(&stored.data),
                _ => {
                    return Err(ServiceError::new(
                        400,
                        "InvalidPart",
                        format!("part {} could not be found", part.part_number),
                    )
                    .into())
                }
            }
        }

        let Some(upload) = state.uploads.remove(upload_id) else {
            return Err(no_such_upload(upload_id));
        };
        let data = data.freeze();
        let etag = format!(
            "\"{:X}-{}\"",
            md5::compute(&data),
            parts.len()
        );
        let object = StoredObject::new(data, etag, ObjectType::Multipart);
        let output = PutObjectOutput {
            etag: Some(object.etag.clone()),
            crc64: Some(object.crc64),
            version_id: None,
        };
        state.objects.insert(upload.key, object);
        Ok(output)
    }

    async fn abort_multipart_upload(
        &self,
        _request: &TransferRequest,
        upload_id: &str,
    ) -> Result<(), Error> {
        let mut state = self.lock()?;
        state
            .uploads
            .remove(upload_id)
            .map(|_| ())
            .ok_or_else(|| no_such_upload(upload_id))
    }

    async fn list_parts(
        &self,
        _request: &TransferRequest,
        upload_id: &str,
    ) -> Result<Vec<CompletedPart>, Error> {
        let state = self.lock()?;
        let upload = state
            .uploads
            .get(upload_id)
            .ok_or_else(|| no_such_upload(upload_id))?;
        Ok(upload
            .parts
            .iter()
            .map(|(number, part)| CompletedPart {
                part_number: *number,
                etag: part.etag.clone(),
                crc64: Some(part.crc64),
                size: part.data.len() as u64,
            })
            .collect())
    }

    async fn append_object(
        &self,
        request: &TransferRequest,
        position: u64,
        body: Bytes,
    ) -> Result<AppendObjectOutput, Error> {
        let mut state = self.lock()?;
        let key = object_key(request);
        let current = match state.objects.get(&key) {
            None => Bytes::new(),
            Some(object) if object.object_type != ObjectType::Appendable => {
                return Err(ServiceError::new(
                    409,
                    "ObjectNotAppendable",
                    "the object is not appendable",
                )
                .into())
            }
            Some(object) => object.data.clone(),
        };

        if position != current.len() as u64 {
            return Err(ServiceError::new(
                409,
                "PositionNotEqualToLength",
                format!(
                    "position {position} is not equal to the object length {}",
                    current.len()
                ),
            )
            .into());
        }

        let mut data = BytesMut::with_capacity(current.len() + body.len());
        data.extend_from_slice(&current);
        data.extend_from_slice(&body);
        let data = data.freeze();
        let object = StoredObject::new(data.clone(), etag_of(&data), ObjectType::Appendable);
        let output = AppendObjectOutput {
            next_position: data.len() as u64,
            crc64: Some(object.crc64),
        };
        state.objects.insert(key, object);
        Ok(output)
    }
}
