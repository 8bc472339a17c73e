/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

mod append;
mod read_only;

pub use append::AppendFile;
pub use read_only::ReadOnlyFile;

use crate::client::ObjectMeta;
use crate::types::TransferRequest;

/// Metadata of a remote object opened as a file
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub struct FileInfo {
    name: String,
    size: u64,
    etag: Option<String>,
    last_modified: Option<String>,
}

impl FileInfo {
    pub(crate) fn new(request: &TransferRequest, meta: &ObjectMeta) -> Self {
        Self {
            name: request.object_name(),
            size: meta.size,
            etag: meta.etag.clone(),
            last_modified: meta.last_modified.clone(),
        }
    }

    /// Object name in `oss://bucket/key` form
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Size in bytes
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Entity tag
    pub fn etag(&self) -> Option<&str> {
        self.etag.as_deref()
    }

    /// Last modification time
    pub fn last_modified(&self) -> Option<&str> {
        self.last_modified.as_deref()
    }
}
