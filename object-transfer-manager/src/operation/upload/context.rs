/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use crate::operation::TransferContext;

/// Upload specific state shared by all workers of a multipart upload
#[derive(Debug)]
pub(crate) struct UploadState {
    /// the multipart upload ID
    pub(crate) upload_id: String,
}

/// Internal context used to drive a single multipart upload
pub(crate) type UploadContext = TransferContext<UploadState>;

impl UploadContext {
    pub(crate) fn upload_id(&self) -> &str {
        &self.state().upload_id
    }
}
