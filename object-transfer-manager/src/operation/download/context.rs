/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use crate::operation::TransferContext;

/// Download specific state shared by every chunk worker
#[derive(Debug)]
pub(crate) struct DownloadState {
    /// ETag captured by the preflight HEAD, every chunk must match it
    pub(crate) etag: Option<String>,
}

/// Internal context used to drive a single download
pub(crate) type DownloadContext = TransferContext<DownloadState>;

impl DownloadContext {
    pub(crate) fn expected_etag(&self) -> Option<&str> {
        self.state().etag.as_deref()
    }
}
