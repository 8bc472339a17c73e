/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use async_trait::async_trait;
use aws_sdk_s3::error::{ProvideErrorMetadata, SdkError};
use aws_sdk_s3::operation::RequestId;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, RequestPayer};
use aws_smithy_runtime_api::client::orchestrator::HttpResponse;
use aws_smithy_types::date_time::Format;
use bytes::Bytes;

use crate::client::{
    CompletedPart, GetRangeOutput, ObjectMeta, OperationClient, PutObjectOutput, UploadPartOutput,
};
use crate::error::{self, Error, ErrorKind, ServiceError};
use crate::types::{ContentRange, HttpRange, ObjectType, TransferRequest};

/// [`OperationClient`] sending requests through an [`aws_sdk_s3::Client`].
///
/// S3 does not report CRC-64 values so every `crc64` in the responses is `None`
/// and verification is skipped. Appends are not supported.
#[derive(Debug, Clone)]
pub struct S3Client {
    client: aws_sdk_s3::Client,
}

impl S3Client {
    /// Wrap an existing SDK client
    pub fn new(client: aws_sdk_s3::Client) -> Self {
        Self { client }
    }

    /// Create a client from the environment (credentials, region, endpoint)
    pub async fn from_env() -> Self {
        let config = aws_config::load_from_env().await;
        Self::new(aws_sdk_s3::Client::new(&config))
    }

    /// The underlying SDK client
    pub fn client(&self) -> &aws_sdk_s3::Client {
        &self.client
    }
}

fn request_payer(request: &TransferRequest) -> Option<RequestPayer> {
    request.request_payer().map(RequestPayer::from)
}

fn parse_size(value: Option<i64>) -> u64 {
    value.and_then(|v| u64::try_from(v).ok()).unwrap_or_default()
}

/// Convert an SDK failure into a transfer [`Error`]
fn sdk_error<E>(err: SdkError<E, HttpResponse>) -> Error
where
    E: std::error::Error + ProvideErrorMetadata + Send + Sync + 'static,
{
    let status = err.raw_response().map(|resp| resp.status().as_u16());
    match (&err, status) {
        (SdkError::ServiceError(_), Some(status)) => {
            let mut service = ServiceError::new(
                status,
                err.code().unwrap_or("Unknown"),
                err.message().unwrap_or_default(),
            );
            if let Some(request_id) = err.request_id() {
                service = service.with_request_id(request_id);
            }
            let kind = match (status, err.code()) {
                (404, _) | (_, Some("NoSuchKey" | "NoSuchUpload" | "NoSuchBucket")) => {
                    ErrorKind::NotFound
                }
                _ => ErrorKind::ServiceError(service.clone()),
            };
            Error::new(kind, service)
        }
        _ => Error::new(ErrorKind::IOError, err),
    }
}

#[async_trait]
impl OperationClient for S3Client {
    async fn head_object(&self, request: &TransferRequest) -> Result<ObjectMeta, Error> {
        let resp = self
            .client
            .head_object()
            .bucket(request.bucket())
            .key(request.key())
            .set_version_id(request.version_id().map(str::to_owned))
            .set_request_payer(request_payer(request))
            .send()
            .await
            .map_err(sdk_error)?;

        Ok(ObjectMeta {
            size: parse_size(resp.content_length()),
            etag: resp.e_tag().map(str::to_owned),
            last_modified: resp
                .last_modified()
                .and_then(|dt| dt.fmt(Format::HttpDate).ok()),
            crc64: None,
            object_type: ObjectType::Normal,
            version_id: resp.version_id().map(str::to_owned),
        })
    }

    async fn get_range(
        &self,
        request: &TransferRequest,
        range: HttpRange,
    ) -> Result<GetRangeOutput, Error> {
        let mut builder = self
            .client
            .get_object()
            .bucket(request.bucket())
            .key(request.key())
            .set_version_id(request.version_id().map(str::to_owned))
            .set_request_payer(request_payer(request));
        if range != HttpRange::default() {
            builder = builder.range(range.to_string());
        }
        let resp = builder.send().await.map_err(sdk_error)?;

        let content_range = resp
            .content_range()
            .map(|cr| cr.parse::<ContentRange>())
            .transpose()?;
        let content_length = resp.content_length().and_then(|v| u64::try_from(v).ok());
        let etag = resp.e_tag().map(str::to_owned);

        Ok(GetRangeOutput {
            body: Box::pin(resp.body.into_async_read()),
            etag,
            content_range,
            content_length,
            crc64: None,
        })
    }

    async fn put_object(
        &self,
        request: &TransferRequest,
        body: Bytes,
    ) -> Result<PutObjectOutput, Error> {
        let content_length = body.len() as i64;
        let resp = self
            .client
            .put_object()
            .bucket(request.bucket())
            .key(request.key())
            .content_length(content_length)
            .body(ByteStream::from(body))
            .set_request_payer(request_payer(request))
            .send()
            .await
            .map_err(sdk_error)?;

        Ok(PutObjectOutput {
            etag: resp.e_tag().map(str::to_owned),
            crc64: None,
            version_id: resp.version_id().map(str::to_owned),
        })
    }

    async fn initiate_multipart_upload(&self, request: &TransferRequest) -> Result<String, Error> {
        let resp = self
            .client
            .create_multipart_upload()
            .bucket(request.bucket())
            .key(request.key())
            .set_request_payer(request_payer(request))
            .send()
            .await
            .map_err(sdk_error)?;

        resp.upload_id()
            .map(str::to_owned)
            .ok_or_else(|| error::invalid_input("CreateMultipartUpload returned no upload ID"))
    }

    async fn upload_part(
        &self,
        request: &TransferRequest,
        upload_id: &str,
        part_number: u32,
        body: Bytes,
    ) -> Result<UploadPartOutput, Error> {
        let content_length = body.len() as i64;
        let resp = self
            .client
            .upload_part()
            .bucket(request.bucket())
            .key(request.key())
            .upload_id(upload_id)
            .part_number(part_number as i32)
            .content_length(content_length)
            .body(ByteStream::from(body))
            .set_request_payer(request_payer(request))
            .send()
            .await
            .map_err(sdk_error)?;

        tracing::trace!("completed upload of part number {}", part_number);
        Ok(UploadPartOutput {
            etag: resp.e_tag().unwrap_or_default().to_owned(),
            crc64: None,
        })
    }

    async fn complete_multipart_upload(
        &self,
        request: &TransferRequest,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> Result<PutObjectOutput, Error> {
        let parts = parts
            .iter()
            .map(|part| {
                aws_sdk_s3::types::CompletedPart::builder()
                    .part_number(part.part_number as i32)
                    .e_tag(part.etag.clone())
                    .build()
            })
            .collect::<Vec<_>>();

        let resp = self
            .client
            .complete_multipart_upload()
            .bucket(request.bucket())
            .key(request.key())
            .upload_id(upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(parts))
                    .build(),
            )
            .set_request_payer(request_payer(request))
            .send()
            .await
            .map_err(sdk_error)?;

        Ok(PutObjectOutput {
            etag: resp.e_tag().map(str::to_owned),
            crc64: None,
            version_id: resp.version_id().map(str::to_owned),
        })
    }

    async fn abort_multipart_upload(
        &self,
        request: &TransferRequest,
        upload_id: &str,
    ) -> Result<(), Error> {
        self.client
            .abort_multipart_upload()
            .bucket(request.bucket())
            .key(request.key())
            .upload_id(upload_id)
            .set_request_payer(request_payer(request))
            .send()
            .await
            .map_err(sdk_error)?;
        Ok(())
    }

    async fn list_parts(
        &self,
        request: &TransferRequest,
        upload_id: &str,
    ) -> Result<Vec<CompletedPart>, Error> {
        let mut parts = Vec::new();
        let mut marker: Option<String> = None;
        loop {
            let resp = self
                .client
                .list_parts()
                .bucket(request.bucket())
                .key(request.key())
                .upload_id(upload_id)
                .set_part_number_marker(marker.take())
                .set_request_payer(request_payer(request))
                .send()
                .await
                .map_err(sdk_error)?;

            parts.extend(resp.parts().iter().map(|part| CompletedPart {
                part_number: part.part_number().unwrap_or_default() as u32,
                etag: part.e_tag().unwrap_or_default().to_owned(),
                crc64: None,
                size: parse_size(part.size()),
            }));

            match (resp.is_truncated(), resp.next_part_number_marker()) {
                (Some(true), Some(next)) => marker = Some(next.to_owned()),
                _ => break,
            }
        }
        Ok(parts)
    }
}
