/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::client::{OperationClient, SharedOperationClient};
use crate::config::Config;
use crate::types::{ProgressListener, TransferRequest};

/// Types for single object upload operation
pub mod upload;

/// Types for single object download operation
pub mod download;

/// Container for maintaining context required to carry out a single operation/transfer.
///
/// `State` is whatever additional operation specific state is required for the operation.
#[derive(Debug)]
pub(crate) struct TransferContext<State> {
    client: SharedOperationClient,
    config: Arc<Config>,
    request: Arc<TransferRequest>,
    /// cancelled when the caller cancels or when any worker fails
    cancel: CancellationToken,
    state: Arc<State>,
}

impl<State> TransferContext<State> {
    pub(crate) fn new(
        client: SharedOperationClient,
        config: Arc<Config>,
        request: Arc<TransferRequest>,
        parent: &CancellationToken,
        state: State,
    ) -> Self {
        Self {
            client,
            config,
            request,
            cancel: parent.child_token(),
            state: Arc::new(state),
        }
    }

    /// The client used for remote operations
    pub(crate) fn client(&self) -> &dyn OperationClient {
        self.client.as_ref()
    }

    pub(crate) fn shared_client(&self) -> SharedOperationClient {
        self.client.clone()
    }

    pub(crate) fn config(&self) -> &Config {
        &self.config
    }

    pub(crate) fn request(&self) -> &TransferRequest {
        &self.request
    }

    pub(crate) fn shared_request(&self) -> Arc<TransferRequest> {
        self.request.clone()
    }

    pub(crate) fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub(crate) fn state(&self) -> &State {
        &self.state
    }
}

impl<State> Clone for TransferContext<State> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            config: self.config.clone(),
            request: self.request.clone(),
            cancel: self.cancel.clone(),
            state: self.state.clone(),
        }
    }
}

/// Accumulates transferred bytes and notifies the configured listener.
#[derive(Debug)]
pub(crate) struct ProgressTracker {
    listener: Option<ProgressListener>,
    transferred: u64,
    total: Option<u64>,
}

impl ProgressTracker {
    pub(crate) fn new(listener: Option<&ProgressListener>, total: Option<u64>) -> Self {
        Self {
            listener: listener.cloned(),
            transferred: 0,
            total,
        }
    }

    pub(crate) fn advance(&mut self, increment: u64) {
        if increment == 0 {
            return;
        }
        self.transferred += increment;
        if let Some(listener) = &self.listener {
            listener.report(increment, self.transferred, self.total);
        }
    }
}
