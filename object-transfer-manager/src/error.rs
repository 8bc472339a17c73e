/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

/// A boxed error that is `Send` and `Sync`.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors returned by this library
///
/// NOTE: Use [`aws_smithy_types::error::display::DisplayErrorContext`] or similar to display
/// the entire error cause/source chain.
#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    source: BoxError,
}

/// General categories of transfer errors.
#[derive(Clone, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum ErrorKind {
    /// Operation input validation issues (missing bucket or key, invalid range, bad arguments)
    InputInvalid,

    /// The file handle has already been closed
    Closed,

    /// A prefetching reader was closed or abandoned while a read was pending
    Abandoned,

    /// The caller cancelled the operation
    OperationCancelled,

    /// A seek resolved to a negative offset
    NegativeOffset,

    /// A seek resolved past the end of the object
    OffsetOutOfRange,

    /// The remote object changed (ETag or size) while it was being read
    SourceChanged,

    /// Locally computed CRC-64 disagrees with the one reported by the service
    ChecksumMismatch,

    /// The service returned an error response
    ServiceError(ServiceError),

    /// Resource not found (e.g. bucket, key, multipart upload ID not found)
    NotFound,

    /// I/O errors
    IOError,

    /// Some kind of internal runtime issue (e.g. task failure, poisoned mutex, etc)
    RuntimeError,

    /// The client does not support the requested operation
    Unsupported,
}

/// Structured information about an error response from the service.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ServiceError {
    status_code: u16,
    code: String,
    message: String,
    request_id: Option<String>,
}

impl ServiceError {
    /// Create a new `ServiceError` from the HTTP status and the error code returned by the service.
    pub fn new(status_code: u16, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status_code,
            code: code.into(),
            message: message.into(),
            request_id: None,
        }
    }

    /// Attach the request ID the service assigned to the failed request.
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    /// HTTP status code of the response
    pub fn status_code(&self) -> u16 {
        self.status_code
    }

    /// Service error code (e.g. `NoSuchKey`)
    pub fn code(&self) -> &str {
        &self.code
    }

    /// Human readable message from the service
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Request ID of the failed request, if the service returned one
    pub fn request_id(&self) -> Option<&str> {
        self.request_id.as_deref()
    }
}

impl fmt::Display for ServiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "service error: status {}, code {}, message {:?}",
            self.status_code, self.code, self.message
        )?;
        if let Some(request_id) = &self.request_id {
            write!(f, ", request id {request_id}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ServiceError {}

impl Error {
    /// Creates a new transfer [`Error`] from a known kind of error as well as an arbitrary error
    /// source.
    pub fn new<E>(kind: ErrorKind, err: E) -> Error
    where
        E: Into<BoxError>,
    {
        Error {
            kind,
            source: err.into(),
        }
    }

    /// Returns the corresponding [`ErrorKind`] for this error.
    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    /// Returns the service error details when this error originated from a service response.
    ///
    /// The whole source chain is searched, so a `NotFound` response or a service error
    /// wrapped with upload/download context is found as well.
    pub fn service_error(&self) -> Option<&ServiceError> {
        if let ErrorKind::ServiceError(err) = &self.kind {
            return Some(err);
        }
        let mut next: Option<&(dyn std::error::Error + 'static)> = Some(self.source.as_ref());
        while let Some(err) = next {
            if let Some(service) = err.downcast_ref::<ServiceError>() {
                return Some(service);
            }
            if let Some(Error {
                kind: ErrorKind::ServiceError(service),
                ..
            }) = err.downcast_ref::<Error>()
            {
                return Some(service);
            }
            next = err.source();
        }
        None
    }

    /// Returns the multipart upload context if this error came out of an upload.
    pub fn upload_error(&self) -> Option<&UploadError> {
        self.source.downcast_ref::<UploadError>()
    }

    /// Returns the download context if this error came out of a download.
    pub fn download_error(&self) -> Option<&DownloadError> {
        self.source.downcast_ref::<DownloadError>()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ErrorKind::InputInvalid => write!(f, "invalid input"),
            ErrorKind::Closed => write!(f, "file already closed"),
            ErrorKind::Abandoned => write!(f, "read abandoned"),
            ErrorKind::OperationCancelled => write!(f, "operation cancelled"),
            ErrorKind::NegativeOffset => write!(f, "negative offset"),
            ErrorKind::OffsetOutOfRange => write!(f, "offset out of range"),
            ErrorKind::SourceChanged => write!(f, "source object changed"),
            ErrorKind::ChecksumMismatch => write!(f, "crc64 checksum mismatch"),
            ErrorKind::ServiceError(err) => write!(f, "{err}"),
            ErrorKind::NotFound => write!(f, "resource not found"),
            ErrorKind::IOError => write!(f, "I/O error"),
            ErrorKind::RuntimeError => write!(f, "runtime error"),
            ErrorKind::Unsupported => write!(f, "operation not supported"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.source.as_ref())
    }
}

/// Context attached to a failed multipart upload.
///
/// The wrapped error keeps the kind of the underlying failure, the upload ID is
/// kept so callers can abort or resume the upload themselves.
#[derive(Debug)]
pub struct UploadError {
    upload_id: Option<String>,
    path: String,
    source: BoxError,
}

impl UploadError {
    /// The multipart upload ID, if one was created before the failure
    pub fn upload_id(&self) -> Option<&str> {
        self.upload_id.as_deref()
    }

    /// Object path (`oss://bucket/key`) the upload targeted
    pub fn path(&self) -> &str {
        &self.path
    }
}

impl fmt::Display for UploadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "upload of {} failed (upload id: {}): {}",
            self.path,
            self.upload_id.as_deref().unwrap_or("none"),
            self.source
        )
    }
}

impl std::error::Error for UploadError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.source.as_ref())
    }
}

/// Context attached to a failed download.
#[derive(Debug)]
pub struct DownloadError {
    path: PathBuf,
    source: BoxError,
}

impl DownloadError {
    /// Local destination path of the download
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl fmt::Display for DownloadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "download to {} failed: {}",
            self.path.display(),
            self.source
        )
    }
}

impl std::error::Error for DownloadError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.source.as_ref())
    }
}

/// Wrap `err` with the upload context, keeping its kind.
pub(crate) fn upload_failed(err: Error, upload_id: Option<String>, path: String) -> Error {
    let kind = err.kind.clone();
    Error::new(
        kind,
        UploadError {
            upload_id,
            path,
            source: err.source,
        },
    )
}

/// Wrap `err` with the download context, keeping its kind.
pub(crate) fn download_failed(err: Error, path: impl Into<PathBuf>) -> Error {
    let kind = err.kind.clone();
    Error::new(
        kind,
        DownloadError {
            path: path.into(),
            source: err.source,
        },
    )
}

impl From<io::Error> for Error {
    fn from(value: io::Error) -> Self {
        // unwrap errors that were smuggled through an `AsyncRead` implementation
        if value.get_ref().is_some_and(|inner| inner.is::<Error>()) {
            if let Some(inner) = value.into_inner() {
                if let Ok(err) = inner.downcast::<Error>() {
                    return *err;
                }
            }
            return Error::new(ErrorKind::IOError, "I/O error without source");
        }
        Self::new(ErrorKind::IOError, value)
    }
}

impl From<Error> for io::Error {
    fn from(value: Error) -> Self {
        let kind = match value.kind() {
            ErrorKind::InputInvalid | ErrorKind::NegativeOffset | ErrorKind::OffsetOutOfRange => {
                io::ErrorKind::InvalidInput
            }
            ErrorKind::NotFound => io::ErrorKind::NotFound,
            // std readers retry `Interrupted`
            ErrorKind::OperationCancelled | ErrorKind::Abandoned => io::ErrorKind::ConnectionAborted,
            ErrorKind::ChecksumMismatch | ErrorKind::SourceChanged => io::ErrorKind::InvalidData,
            ErrorKind::Unsupported => io::ErrorKind::Unsupported,
            _ => io::ErrorKind::Other,
        };
        io::Error::new(kind, value)
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(value: tokio::task::JoinError) -> Self {
        Self::new(ErrorKind::RuntimeError, value)
    }
}

impl From<ServiceError> for Error {
    fn from(value: ServiceError) -> Self {
        let kind = if value.status_code == 404 {
            ErrorKind::NotFound
        } else {
            ErrorKind::ServiceError(value.clone())
        };
        Error::new(kind, value)
    }
}

pub(crate) fn invalid_input<E>(err: E) -> Error
where
    E: Into<BoxError>,
{
    Error::new(ErrorKind::InputInvalid, err)
}

pub(crate) fn source_changed<E>(err: E) -> Error
where
    E: Into<BoxError>,
{
    Error::new(ErrorKind::SourceChanged, err)
}

pub(crate) fn checksum_mismatch(what: &str, local: u64, remote: u64) -> Error {
    Error::new(
        ErrorKind::ChecksumMismatch,
        format!("{what}: client crc64 {local} does not match server crc64 {remote}"),
    )
}

pub(crate) fn closed() -> Error {
    Error::new(ErrorKind::Closed, "file already closed")
}

pub(crate) fn abandoned() -> Error {
    Error::new(ErrorKind::Abandoned, "range reader was closed while a read was pending")
}

pub(crate) fn from_kind<E>(kind: ErrorKind) -> impl FnOnce(E) -> Error
where
    E: Into<BoxError>,
{
    |err| Error::new(kind, err)
}

static CANCELLATION_ERROR: &str = "operation cancelled by the caller, stopping all ongoing requests";

pub(crate) fn operation_cancelled() -> Error {
    Error::new(ErrorKind::OperationCancelled, CANCELLATION_ERROR)
}
