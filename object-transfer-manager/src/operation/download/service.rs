/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use std::sync::Arc;

use bytes::Bytes;
use tokio::io::AsyncReadExt;
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use tokio::task;
use tower::{service_fn, Service, ServiceBuilder, ServiceExt};
use tracing::Instrument;

use crate::checksum;
use crate::error::{self, Error, ErrorKind};
use crate::io::RangeReader;
use crate::operation::download::context::DownloadContext;
use crate::types::HttpRange;

/// Byte range of the object fetched by a single ranged GET
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) struct ChunkRequest {
    /// absolute offset in the object
    pub(super) start: u64,
    pub(super) size: u64,
}

/// Request/input type for our "chunk" service.
#[derive(Debug, Clone)]
pub(super) struct DownloadChunkRequest {
    pub(super) ctx: DownloadContext,
    pub(super) request: ChunkRequest,
}

/// A downloaded chunk waiting to be written
#[derive(Debug)]
pub(crate) struct ChunkResponse {
    pub(crate) start: u64,
    pub(crate) data: Bytes,
    pub(crate) crc64: u64,
    /// window slot, released once the chunk is written
    pub(crate) permit: Option<OwnedSemaphorePermit>,
}

/// A chunk handed to a worker together with its window slot
#[derive(Debug)]
pub(super) struct ScheduledChunk {
    request: ChunkRequest,
    permit: OwnedSemaphorePermit,
}

/// handler (service fn) for a single chunk
async fn download_chunk_handler(request: DownloadChunkRequest) -> Result<ChunkResponse, Error> {
    let ctx = request.ctx;
    let ChunkRequest { start, size } = request.request;

    let mut reader = RangeReader::new(
        ctx.shared_client(),
        ctx.shared_request(),
        HttpRange::new(start, size),
    )
    .set_etag(ctx.expected_etag().map(str::to_owned));

    let mut data = Vec::with_capacity(size as usize);
    reader
        .read_to_end(&mut data)
        .instrument(tracing::debug_span!("collect-body", start))
        .await?;

    if data.len() as u64 != size {
        return Err(Error::new(
            ErrorKind::IOError,
            format!(
                "chunk at offset {start} returned {} bytes, expected {size}",
                data.len()
            ),
        ));
    }

    let crc64 = checksum::crc64(&data);
    Ok(ChunkResponse {
        start,
        data: data.into(),
        crc64,
        permit: None,
    })
}

/// Create a new tower::Service for downloading individual chunks of an object
pub(super) fn chunk_service(
    ctx: &DownloadContext,
) -> impl Service<DownloadChunkRequest, Response = ChunkResponse, Error = Error, Future: Send>
       + Clone
       + Send {
    let svc = service_fn(download_chunk_handler);
    ServiceBuilder::new()
        .concurrency_limit(ctx.config().num_workers())
        .service(svc)
}

/// Split `[start, end)` into chunks of `part_size` bytes
pub(super) fn plan_chunks(start: u64, end: u64, part_size: u64) -> impl Iterator<Item = ChunkRequest> {
    let part_size = part_size.max(1);
    (start..end)
        .step_by(part_size as usize)
        .map(move |offset| ChunkRequest {
            start: offset,
            size: part_size.min(end - offset),
        })
}

/// Spawn the dispatcher and the chunk workers for `[start, end)`.
///
/// The dispatcher claims a slot of `window` for each chunk in offset order
/// before handing it to a worker, so at most `window` chunks are in flight or
/// waiting to be written at any time. Every chunk result (or the first failure
/// of each worker) is sent on `comp_tx`.
pub(super) fn distribute_work(
    ctx: &DownloadContext,
    start: u64,
    end: u64,
    window: Arc<Semaphore>,
    comp_tx: mpsc::Sender<Result<ChunkResponse, Error>>,
) -> task::JoinSet<()> {
    let n_workers = ctx.config().num_workers();
    let (work_tx, work_rx) = async_channel::bounded(n_workers);
    let mut tasks = task::JoinSet::new();

    let chunks = plan_chunks(start, end, ctx.config().part_size_bytes());
    tasks.spawn(
        dispatch(ctx.clone(), chunks, window, work_tx)
            .instrument(tracing::debug_span!("download-dispatch")),
    );

    let svc = chunk_service(ctx);
    for i in 0..n_workers {
        let worker = download_chunks(ctx.clone(), svc.clone(), work_rx.clone(), comp_tx.clone())
            .instrument(tracing::debug_span!("download-worker", worker = i));
        tasks.spawn(worker);
    }
    tracing::trace!("work distributed for downloading chunks");
    tasks
}

async fn dispatch(
    ctx: DownloadContext,
    chunks: impl Iterator<Item = ChunkRequest>,
    window: Arc<Semaphore>,
    work_tx: async_channel::Sender<ScheduledChunk>,
) {
    for request in chunks {
        let permit = tokio::select! {
            _ = ctx.cancel_token().cancelled() => return,
            permit = window.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => return,
            },
        };
        tracing::trace!("dispatching chunk {:?}", request);
        let sent = tokio::select! {
            _ = ctx.cancel_token().cancelled() => return,
            sent = work_tx.send(ScheduledChunk { request, permit }) => sent,
        };
        if sent.is_err() {
            return;
        }
    }
    tracing::trace!("all chunks dispatched");
}

/// Worker loop: download scheduled chunks until the queue closes, an error
/// occurs or the download is cancelled.
async fn download_chunks(
    ctx: DownloadContext,
    svc: impl Service<DownloadChunkRequest, Response = ChunkResponse, Error = Error, Future: Send>
        + Clone
        + Send
        + 'static,
    work_rx: async_channel::Receiver<ScheduledChunk>,
    comp_tx: mpsc::Sender<Result<ChunkResponse, Error>>,
) {
    loop {
        let scheduled = tokio::select! {
            _ = ctx.cancel_token().cancelled() => break,
            scheduled = work_rx.recv() => match scheduled {
                Ok(scheduled) => scheduled,
                Err(_) => break,
            },
        };

        let req = DownloadChunkRequest {
            ctx: ctx.clone(),
            request: scheduled.request,
        };
        let result = tokio::select! {
            _ = ctx.cancel_token().cancelled() => Err(error::operation_cancelled()),
            result = svc.clone().oneshot(req) => result,
        };

        match result {
            Ok(mut chunk) => {
                chunk.permit = Some(scheduled.permit);
                if comp_tx.send(Ok(chunk)).await.is_err() {
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_chunks() {
        let chunks: Vec<_> = plan_chunks(5, 17, 5).map(|c| (c.start, c.size)).collect();
        assert_eq!(vec![(5, 5), (10, 5), (15, 2)], chunks);
        assert_eq!(0, plan_chunks(3, 3, 5).count());
        assert_eq!(1, plan_chunks(0, 5, 5).count());
    }
}
