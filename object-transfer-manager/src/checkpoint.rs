/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use aws_smithy_types::date_time::Format;
use aws_smithy_types::DateTime;
use path_clean::PathClean;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::client::{CompletedPart, ObjectMeta};
use crate::error::{self, Error, ErrorKind};
use crate::types::TransferRequest;

const DOWNLOAD_MAGIC: &str = "92611BED-89E2-46B6-89E5-72F273D4B0A3";
const UPLOAD_MAGIC: &str = "FE8BB4EA-B593-4FAC-AD7A-2459A36E2E62";

pub(crate) const DOWNLOAD_SUFFIX: &str = ".dcp";
pub(crate) const UPLOAD_SUFFIX: &str = ".ucp";

/// Identity of the source at the time a checkpoint was written.
///
/// For downloads this is the remote object, for uploads the local file (with an
/// empty etag and the file's modification time).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct Fingerprint {
    pub(crate) etag: String,
    pub(crate) last_modified: String,
    pub(crate) size: u64,
}

impl Fingerprint {
    pub(crate) fn from_object(meta: &ObjectMeta) -> Self {
        Self {
            etag: meta.etag.clone().unwrap_or_default(),
            last_modified: meta.last_modified.clone().unwrap_or_default(),
            size: meta.size,
        }
    }

    pub(crate) async fn from_file(path: &Path) -> Result<Self, Error> {
        let metadata = tokio::fs::metadata(path).await?;
        let last_modified = metadata
            .modified()
            .ok()
            .and_then(|mtime| DateTime::from(mtime).fmt(Format::DateTime).ok())
            .unwrap_or_default();
        Ok(Self {
            etag: String::new(),
            last_modified,
            size: metadata.len(),
        })
    }
}

/// Remote locator recorded in a checkpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct ObjectLocator {
    pub(crate) name: String,
    pub(crate) version_id: String,
    pub(crate) range: String,
}

impl ObjectLocator {
    pub(crate) fn new(request: &TransferRequest) -> Self {
        Self {
            name: request.object_name(),
            version_id: request.version_id().unwrap_or_default().to_owned(),
            range: request.range().map(|r| r.to_string()).unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct DownloadInfo {
    /// Absolute object offset up to which the destination holds contiguous data
    pub(crate) offset: u64,
    /// CRC-64 of the bytes from the start of the range up to `offset`
    pub(crate) crc64: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct UploadedPart {
    pub(crate) part_number: u32,
    pub(crate) etag: String,
    pub(crate) crc64: u64,
    pub(crate) size: u64,
}

impl From<&CompletedPart> for UploadedPart {
    fn from(part: &CompletedPart) -> Self {
        Self {
            part_number: part.part_number,
            etag: part.etag.clone(),
            crc64: part.crc64.unwrap_or_default(),
            size: part.size,
        }
    }
}

impl From<&UploadedPart> for CompletedPart {
    fn from(part: &UploadedPart) -> Self {
        Self {
            part_number: part.part_number,
            etag: part.etag.clone(),
            crc64: Some(part.crc64),
            size: part.size,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct UploadInfo {
    pub(crate) upload_id: String,
    pub(crate) parts: Vec<UploadedPart>,
}

/// Persistent state of an interrupted download.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct DownloadCheckpoint {
    pub(crate) magic: String,
    #[serde(rename = "MD5")]
    pub(crate) md5: String,
    pub(crate) object_meta: Fingerprint,
    pub(crate) object_info: ObjectLocator,
    pub(crate) file_path: String,
    pub(crate) part_size: u64,
    pub(crate) download_info: DownloadInfo,
}

impl DownloadCheckpoint {
    pub(crate) fn new(
        meta: Fingerprint,
        locator: ObjectLocator,
        file_path: &Path,
        part_size: u64,
        start: u64,
    ) -> Self {
        Self {
            magic: DOWNLOAD_MAGIC.to_owned(),
            md5: String::new(),
            object_meta: meta,
            object_info: locator,
            file_path: file_path.to_string_lossy().into_owned(),
            part_size,
            download_info: DownloadInfo {
                offset: start,
                crc64: 0,
            },
        }
    }

    /// Whether this checkpoint describes the same transfer
    pub(crate) fn matches(
        &self,
        meta: &Fingerprint,
        locator: &ObjectLocator,
        file_path: &Path,
        part_size: u64,
    ) -> bool {
        self.object_meta == *meta
            && self.object_info == *locator
            && Path::new(&self.file_path) == file_path
            && self.part_size == part_size
    }
}

/// Persistent state of an interrupted multipart upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct UploadCheckpoint {
    pub(crate) magic: String,
    #[serde(rename = "MD5")]
    pub(crate) md5: String,
    pub(crate) file_meta: Fingerprint,
    pub(crate) object_info: ObjectLocator,
    pub(crate) file_path: String,
    pub(crate) part_size: u64,
    pub(crate) upload_info: UploadInfo,
}

impl UploadCheckpoint {
    pub(crate) fn new(
        meta: Fingerprint,
        locator: ObjectLocator,
        file_path: &Path,
        part_size: u64,
        upload_id: String,
    ) -> Self {
        Self {
            magic: UPLOAD_MAGIC.to_owned(),
            md5: String::new(),
            file_meta: meta,
            object_info: locator,
            file_path: file_path.to_string_lossy().into_owned(),
            part_size,
            upload_info: UploadInfo {
                upload_id,
                parts: Vec::new(),
            },
        }
    }

    pub(crate) fn matches(
        &self,
        meta: &Fingerprint,
        locator: &ObjectLocator,
        file_path: &Path,
        part_size: u64,
    ) -> bool {
        self.file_meta == *meta
            && self.object_info == *locator
            && Path::new(&self.file_path) == file_path
            && self.part_size == part_size
    }
}

/// Checkpoint documents carry a magic string and a digest of their own content.
pub(crate) trait Checkpoint: Serialize + DeserializeOwned + Clone {
    const MAGIC: &'static str;

    fn magic(&self) -> &str;
    fn md5_mut(&mut self) -> &mut String;
}

impl Checkpoint for DownloadCheckpoint {
    const MAGIC: &'static str = DOWNLOAD_MAGIC;

    fn magic(&self) -> &str {
        &self.magic
    }

    fn md5_mut(&mut self) -> &mut String {
        &mut self.md5
    }
}

impl Checkpoint for UploadCheckpoint {
    const MAGIC: &'static str = UPLOAD_MAGIC;

    fn magic(&self) -> &str {
        &self.magic
    }

    fn md5_mut(&mut self) -> &mut String {
        &mut self.md5
    }
}

/// Digest of the checkpoint serialized with an empty `MD5` field
fn digest<T: Checkpoint>(checkpoint: &T) -> Result<String, Error> {
    let mut unsigned = checkpoint.clone();
    unsigned.md5_mut().clear();
    let json = serde_json::to_vec(&unsigned).map_err(error::from_kind(ErrorKind::IOError))?;
    Ok(format!("{:x}", md5::compute(json)))
}

/// Make `path` absolute and lexically normalized
pub(crate) fn absolute_path(path: &Path) -> Result<PathBuf, Error> {
    let path = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()?.join(path)
    };
    Ok(path.clean())
}

/// A checkpoint file on disk.
///
/// The file name is the MD5 of the transfer's identity (remote locator plus
/// absolute local path), so repeating the same transfer finds the same file.
#[derive(Debug, Clone)]
pub(crate) struct CheckpointStore {
    path: PathBuf,
}

impl CheckpointStore {
    pub(crate) fn new(dir: &Path, identity: &str, suffix: &str) -> Self {
        let name = format!("{:x}{}", md5::compute(identity.as_bytes()), suffix);
        Self {
            path: dir.join(name),
        }
    }

    /// Checkpoint for downloading `request` into `dest` (absolute)
    pub(crate) fn for_download(dir: &Path, request: &TransferRequest, dest: &Path) -> Self {
        let locator = ObjectLocator::new(request);
        let identity = format!(
            "{}\n{}\n{}\n{}",
            locator.name,
            locator.version_id,
            locator.range,
            dest.display()
        );
        Self::new(dir, &identity, DOWNLOAD_SUFFIX)
    }

    /// Checkpoint for uploading `source` (absolute) to `request`
    pub(crate) fn for_upload(dir: &Path, request: &TransferRequest, source: &Path) -> Self {
        let locator = ObjectLocator::new(request);
        let identity = format!(
            "{}\n{}\n{}",
            source.display(),
            locator.name,
            locator.version_id
        );
        Self::new(dir, &identity, UPLOAD_SUFFIX)
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    /// Load the checkpoint.
    ///
    /// Missing, unreadable or tampered files yield `None`; the latter two are removed.
    pub(crate) async fn load<T: Checkpoint>(&self) -> Option<T> {
        let raw = match tokio::fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return None,
            Err(err) => {
                tracing::debug!("failed to read checkpoint {}: {}", self.path.display(), err);
                return None;
            }
        };

        let checkpoint = serde_json::from_slice::<T>(&raw)
            .ok()
            .filter(|cp| cp.magic() == T::MAGIC)
            .filter(|cp| {
                let mut cp = cp.clone();
                let recorded = std::mem::take(cp.md5_mut());
                digest(&cp).is_ok_and(|d| d == recorded)
            });

        if checkpoint.is_none() {
            tracing::debug!("discarding invalid checkpoint {}", self.path.display());
            self.remove().await;
        }
        checkpoint
    }

    /// Persist `checkpoint` atomically (temp file + rename).
    pub(crate) async fn save<T: Checkpoint>(&self, checkpoint: &mut T) -> Result<(), Error> {
        *checkpoint.md5_mut() = digest(checkpoint)?;
        let json =
            serde_json::to_vec(checkpoint).map_err(error::from_kind(ErrorKind::IOError))?;

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    /// Remove the checkpoint, ignoring missing files
    pub(crate) async fn remove(&self) {
        if let Err(err) = tokio::fs::remove_file(&self.path).await {
            if err.kind() != io::ErrorKind::NotFound {
                tracing::warn!(
                    "failed to remove checkpoint {}: {}",
                    self.path.display(),
                    err
                );
            }
        }
    }
}
