/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use std::fmt;
use std::sync::Arc;

use crate::error::{self, Error};

pub use crate::http::header::{ContentRange, HttpRange};

/// The target part size for an upload or download request.
#[derive(Debug, Clone, Default)]
pub enum PartSize {
    /// Use the default part size (6 MiB).
    #[default]
    Auto,

    /// Target part size explicitly given.
    ///
    /// NOTE: This is a suggestion and will be used if possible but may be adjusted for an individual request
    /// as required by the underlying API (at most 10,000 parts per upload).
    Target(u64),
}

/// The concurrency settings to use for a single upload or download request.
#[derive(Debug, Clone, Default)]
pub enum ConcurrencySetting {
    /// Use the default number of workers (3).
    #[default]
    Auto,

    /// Explicitly configured concurrency setting.
    Explicit(usize),
}

/// Kind of a remote object as reported by the service.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ObjectType {
    /// Object written with a single put
    #[default]
    Normal,
    /// Object assembled from a multipart upload
    Multipart,
    /// Object that supports append writes
    Appendable,
    /// Any other type string reported by the service
    Other(String),
}

impl ObjectType {
    /// Return the wire representation of this object type
    pub fn as_str(&self) -> &str {
        match self {
            ObjectType::Normal => "Normal",
            ObjectType::Multipart => "Multipart",
            ObjectType::Appendable => "Appendable",
            ObjectType::Other(other) => other,
        }
    }
}

impl From<&str> for ObjectType {
    fn from(value: &str) -> Self {
        match value {
            "Normal" => ObjectType::Normal,
            "Multipart" => ObjectType::Multipart,
            "Appendable" => ObjectType::Appendable,
            other => ObjectType::Other(other.to_owned()),
        }
    }
}

/// Request parameters identifying a remote object.
///
/// Shared by uploads, downloads and the file-like accessors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    bucket: String,
    key: String,
    version_id: Option<String>,
    range: Option<HttpRange>,
    request_payer: Option<String>,
}

impl TransferRequest {
    /// Create a new builder for `TransferRequest`
    pub fn builder() -> TransferRequestBuilder {
        TransferRequestBuilder::default()
    }

    /// The bucket name containing the object
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Key of the object
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Version ID used to reference a specific version of the object
    pub fn version_id(&self) -> Option<&str> {
        self.version_id.as_deref()
    }

    /// Byte range to download, only honored by downloads
    pub fn range(&self) -> Option<&HttpRange> {
        self.range.as_ref()
    }

    /// Confirms that the requester knows that they will be charged for the request
    pub fn request_payer(&self) -> Option<&str> {
        self.request_payer.as_deref()
    }

    /// Canonical object name, `oss://bucket/key`
    pub(crate) fn object_name(&self) -> String {
        format!("oss://{}/{}", self.bucket, self.key)
    }

    /// The same object without a byte range
    pub(crate) fn without_range(&self) -> TransferRequest {
        TransferRequest {
            range: None,
            ..self.clone()
        }
    }
}

/// Fluent style builder for [`TransferRequest`]
#[derive(Debug, Clone, Default)]
pub struct TransferRequestBuilder {
    bucket: Option<String>,
    key: Option<String>,
    version_id: Option<String>,
    range: Option<String>,
    byte_range: Option<HttpRange>,
    request_payer: Option<String>,
}

impl TransferRequestBuilder {
    /// The bucket name containing the object. Required.
    pub fn bucket(mut self, input: impl Into<String>) -> Self {
        self.bucket = Some(input.into());
        self
    }

    /// Key of the object. Required.
    pub fn key(mut self, input: impl Into<String>) -> Self {
        self.key = Some(input.into());
        self
    }

    /// Version ID used to reference a specific version of the object.
    pub fn version_id(mut self, input: impl Into<String>) -> Self {
        self.version_id = Some(input.into());
        self
    }

    /// Set the version ID, `None` clears it.
    pub fn set_version_id(mut self, input: Option<String>) -> Self {
        self.version_id = input;
        self
    }

    /// Byte range in HTTP form (`bytes=0-99`, `bytes=100-`). Validated on [`build`](Self::build).
    pub fn range(mut self, input: impl Into<String>) -> Self {
        self.range = Some(input.into());
        self
    }

    /// Byte range as an already validated [`HttpRange`].
    pub fn byte_range(mut self, input: HttpRange) -> Self {
        self.byte_range = Some(input);
        self
    }

    /// Confirms that the requester knows that they will be charged for the request.
    pub fn request_payer(mut self, input: impl Into<String>) -> Self {
        self.request_payer = Some(input.into());
        self
    }

    /// Consume the builder and validate the request.
    pub fn build(self) -> Result<TransferRequest, Error> {
        let bucket = self
            .bucket
            .filter(|b| !b.is_empty())
            .ok_or_else(|| error::invalid_input("bucket is required"))?;
        let key = self
            .key
            .filter(|k| !k.is_empty())
            .ok_or_else(|| error::invalid_input("key is required"))?;

        let range = match (self.byte_range, self.range) {
            (Some(range), _) => Some(range),
            (None, Some(raw)) => Some(raw.parse::<HttpRange>()?),
            (None, None) => None,
        };

        Ok(TransferRequest {
            bucket,
            key,
            version_id: self.version_id,
            range,
            request_payer: self.request_payer,
        })
    }
}

type ProgressFn = dyn Fn(u64, u64, Option<u64>) + Send + Sync;

/// Callback notified as bytes are transferred.
///
/// Invoked with `(increment, transferred, total)`, where `total` is `None`
/// when the size of the source is not known up front. Calls are made
/// sequentially from the task driving the operation.
#[derive(Clone)]
pub struct ProgressListener(Arc<ProgressFn>);

impl ProgressListener {
    /// Wrap a progress callback
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(u64, u64, Option<u64>) + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    pub(crate) fn report(&self, increment: u64, transferred: u64, total: Option<u64>) {
        (self.0)(increment, transferred, total)
    }
}

impl fmt::Debug for ProgressListener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ProgressListener").finish()
    }
}
