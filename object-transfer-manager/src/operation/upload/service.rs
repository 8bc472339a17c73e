/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task;
use tower::{service_fn, Service, ServiceBuilder, ServiceExt};
use tracing::Instrument;

use crate::checksum;
use crate::client::CompletedPart;
use crate::error;
use crate::io::part_reader::{PartData, PartReader};
use crate::operation::upload::context::UploadContext;

/// Request/input type for our "upload_part" service.
#[derive(Debug, Clone)]
pub(super) struct UploadPartRequest {
    pub(super) ctx: UploadContext,
    pub(super) part_data: PartData,
}

/// handler (service fn) for a single part
async fn upload_part_handler(request: UploadPartRequest) -> Result<CompletedPart, error::Error> {
    let ctx = request.ctx;
    let part_data = request.part_data;
    let part_number = part_data.part_number;
    let offset = part_data.offset;
    let size = part_data.data.len() as u64;
    let crc64 = checksum::crc64(&part_data.data);

    let resp = ctx
        .client()
        .upload_part(ctx.request(), ctx.upload_id(), part_number, part_data.data)
        .await?;

    if ctx.config().verify_data() {
        if let Some(remote) = resp.crc64 {
            if remote != crc64 {
                return Err(error::checksum_mismatch(
                    &format!("part {part_number}"),
                    crc64,
                    remote,
                ));
            }
        }
    }

    tracing::trace!(
        "completed upload of part number {} at offset {}",
        part_number,
        offset
    );
    Ok(CompletedPart {
        part_number,
        etag: resp.etag,
        crc64: Some(crc64),
        size,
    })
}

/// Create a new tower::Service for uploading individual parts of an object
pub(super) fn upload_part_service(
    ctx: &UploadContext,
) -> impl Service<UploadPartRequest, Response = CompletedPart, Error = error::Error, Future: Send>
       + Clone
       + Send {
    let svc = service_fn(upload_part_handler);
    ServiceBuilder::new()
        .concurrency_limit(ctx.config().num_workers())
        .service(svc)
}

/// Spawn workers that pull parts from `part_reader` and upload them.
///
/// Every completed part (or the first failure of each worker) is sent on `comp_tx`.
pub(super) fn distribute_work(
    ctx: &UploadContext,
    part_reader: Arc<PartReader>,
    comp_tx: mpsc::Sender<Result<CompletedPart, error::Error>>,
) -> task::JoinSet<()> {
    let svc = upload_part_service(ctx);
    let n_workers = ctx.config().num_workers();
    let mut tasks = task::JoinSet::new();
    for i in 0..n_workers {
        let worker = read_body(
            part_reader.clone(),
            ctx.clone(),
            svc.clone(),
            comp_tx.clone(),
        )
        .instrument(tracing::debug_span!("upload-worker", worker = i));
        tasks.spawn(worker);
    }
    tracing::trace!("work distributed for uploading parts");
    tasks
}

/// Worker loop: read the next part and upload it until the reader is exhausted,
/// an error occurs or the upload is cancelled.
pub(super) async fn read_body(
    part_reader: Arc<PartReader>,
    ctx: UploadContext,
    svc: impl Service<UploadPartRequest, Response = CompletedPart, Error = error::Error, Future: Send>
        + Clone
        + Send
        + 'static,
    comp_tx: mpsc::Sender<Result<CompletedPart, error::Error>>,
) {
    loop {
        let result = tokio::select! {
            _ = ctx.cancel_token().cancelled() => Err(error::operation_cancelled()),
            result = upload_next_part(&part_reader, &ctx, svc.clone()) => result,
        };

        match result {
            Ok(None) => break,
            Ok(Some(part)) => {
                if comp_tx.send(Ok(part)).await.is_err() {
                    tracing::debug!("completion channel closed, stopping worker");
                    break;
                }
            }
            Err(err) => {
                let _ = comp_tx.send(Err(err)).await;
                break;
            }
        }
    }
}

async fn upload_next_part(
    part_reader: &PartReader,
    ctx: &UploadContext,
    svc: impl Service<UploadPartRequest, Response = CompletedPart, Error = error::Error, Future: Send>,
) -> Result<Option<CompletedPart>, error::Error> {
    let Some(part_data) = part_reader.next_part().await? else {
        return Ok(None);
    };
    let req = UploadPartRequest {
        ctx: ctx.clone(),
        part_data,
    };
    svc.oneshot(req).await.map(Some)
}
