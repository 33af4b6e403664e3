//! S3 client wrapper

use async_trait::async_trait;
use aws_config::Region;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::config::retry::RetryConfig;
use aws_sdk_s3::config::timeout::TimeoutConfig;
use aws_sdk_s3::config::{BehaviorVersion, Builder as S3ConfigBuilder};
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart as S3CompletedPart, ObjectCannedAcl};
use aws_sdk_s3::Client;
use haul_core::types::{
    CannedAcl, ChunkDescriptor, CompletedPart, CompletionToken, ObjectKey, SessionToken,
};
use haul_core::{Error, Result, UploadSettings};
use parking_lot::RwLock;
use std::time::Duration;
use tracing::{debug, info};

use crate::StorageClient;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Service error codes worth retrying
const TRANSIENT_CODES: &[&str] = &[
    "InternalError",
    "ServiceUnavailable",
    "SlowDown",
    "RequestTimeout",
    "RequestTimeTooSkewed",
];

/// Codes the service returns when `Content-MD5` does not match the body
const DIGEST_CODES: &[&str] = &["BadDigest", "InvalidDigest"];

/// How a storage failure should be treated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Transient,
    Permanent,
    ChecksumMismatch,
}

/// Classify a service error response by code and HTTP status
pub fn classify_service_error(code: Option<&str>, status: u16) -> ErrorClass {
    match code {
        Some(c) if DIGEST_CODES.contains(&c) => ErrorClass::ChecksumMismatch,
        Some(c) if TRANSIENT_CODES.contains(&c) => ErrorClass::Transient,
        _ if status >= 500 || status == 429 => ErrorClass::Transient,
        _ => ErrorClass::Permanent,
    }
}

fn classify<E>(operation: &str, position: Option<u32>, err: SdkError<E, HttpResponse>) -> Error
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    let message = DisplayErrorContext(&err).to_string();

    let class = match &err {
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) | SdkError::ResponseError(_) => {
            ErrorClass::Transient
        }
        SdkError::ServiceError(service) => {
            classify_service_error(service.err().code(), service.raw().status().as_u16())
        }
        _ => ErrorClass::Permanent,
    };

    match (class, position) {
        (ErrorClass::ChecksumMismatch, Some(position)) => Error::ChecksumMismatch { position, message },
        (ErrorClass::Transient, _) => Error::transient(operation, message),
        _ => Error::permanent(operation, message),
    }
}

/// Connection settings kept so the client can be rebuilt on refresh
#[derive(Debug, Clone)]
struct ClientOptions {
    region: String,
    endpoint: Option<String>,
    path_style: bool,
    access_key: String,
    secret_key: String,
}

impl ClientOptions {
    fn build(&self) -> Client {
        let credentials =
            Credentials::new(&self.access_key, &self.secret_key, None, None, "haul");

        let mut builder = S3ConfigBuilder::new()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(self.region.clone()))
            .credentials_provider(credentials)
            .force_path_style(self.path_style)
            // Retries are owned by the upload coordinator
            .retry_config(RetryConfig::disabled())
            .timeout_config(
                TimeoutConfig::builder()
                    .connect_timeout(CONNECT_TIMEOUT)
                    .build(),
            );

        if let Some(endpoint) = &self.endpoint {
            builder = builder.endpoint_url(endpoint);
        }

        Client::from_conf(builder.build())
    }
}

/// [`StorageClient`] backed by the AWS SDK
pub struct S3Storage {
    options: ClientOptions,
    client: RwLock<Client>,
}

impl S3Storage {
    pub fn new(settings: &UploadSettings) -> Self {
        let options = ClientOptions {
            region: settings.region.clone(),
            endpoint: settings.endpoint.clone(),
            path_style: settings.path_style,
            access_key: settings.credentials.access_key.clone(),
            secret_key: settings.credentials.secret_key.clone(),
        };
        let client = options.build();

        Self {
            options,
            client: RwLock::new(client),
        }
    }

    fn client(&self) -> Client {
        self.client.read().clone()
    }
}

impl std::fmt::Debug for S3Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Storage")
            .field("region", &self.options.region)
            .field("endpoint", &self.options.endpoint)
            .field("path_style", &self.options.path_style)
            .finish()
    }
}

#[async_trait]
impl StorageClient for S3Storage {
    async fn initiate(
        &self,
        bucket: &str,
        key: &ObjectKey,
        acl: CannedAcl,
    ) -> Result<SessionToken> {
        let resp = self
            .client()
            .create_multipart_upload()
            .bucket(bucket)
            .key(key.as_str())
            .acl(ObjectCannedAcl::from(acl.as_str()))
            .send()
            .await
            .map_err(|e| classify("CreateMultipartUpload", None, e))?;

        let upload_id = resp.upload_id().ok_or_else(|| {
            Error::permanent("CreateMultipartUpload", "response carried no UploadId")
        })?;

        info!(
            "CreateMultipartUpload bucket={} key={} uploadId={}",
            bucket, key, upload_id
        );
        Ok(SessionToken::new(upload_id))
    }

    async fn upload_part(
        &self,
        bucket: &str,
        key: &ObjectKey,
        session: &SessionToken,
        chunk: &ChunkDescriptor,
    ) -> Result<CompletionToken> {
        let part_number = i32::try_from(chunk.position).map_err(|_| {
            Error::Configuration(format!("Part number {} out of range", chunk.position))
        })?;
        let content_length = i64::try_from(chunk.length).map_err(|_| {
            Error::Configuration(format!("Part {} too large", chunk.position))
        })?;

        let body = ByteStream::from_path(&chunk.path).await.map_err(|e| {
            Error::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                format!("Failed to open {}: {}", chunk.path.display(), e),
            ))
        })?;

        let resp = self
            .client()
            .upload_part()
            .bucket(bucket)
            .key(key.as_str())
            .upload_id(session.as_str())
            .part_number(part_number)
            .content_md5(chunk.checksum.as_str())
            .content_length(content_length)
            .body(body)
            .send()
            .await
            .map_err(|e| classify("UploadPart", Some(chunk.position), e))?;

        let etag = resp
            .e_tag()
            .ok_or_else(|| Error::permanent("UploadPart", "response carried no ETag"))?;

        debug!(
            "UploadPart uploadId={} partNumber={} size={} etag={}",
            session, chunk.position, chunk.length, etag
        );
        Ok(CompletionToken::new(etag))
    }

    async fn complete(
        &self,
        bucket: &str,
        key: &ObjectKey,
        session: &SessionToken,
        parts: &[CompletedPart],
    ) -> Result<()> {
        let mut completed = Vec::with_capacity(parts.len());
        for part in parts {
            let part_number = i32::try_from(part.position).map_err(|_| {
                Error::Configuration(format!("Part number {} out of range", part.position))
            })?;
            completed.push(
                S3CompletedPart::builder()
                    .part_number(part_number)
                    .e_tag(part.token.as_str())
                    .build(),
            );
        }

        let upload = CompletedMultipartUpload::builder()
            .set_parts(Some(completed))
            .build();

        self.client()
            .complete_multipart_upload()
            .bucket(bucket)
            .key(key.as_str())
            .upload_id(session.as_str())
            .multipart_upload(upload)
            .send()
            .await
            .map_err(|e| classify("CompleteMultipartUpload", None, e))?;

        info!(
            "CompleteMultipartUpload bucket={} key={} uploadId={} parts={}",
            bucket,
            key,
            session,
            parts.len()
        );
        Ok(())
    }

    async fn abort(&self, bucket: &str, key: &ObjectKey, session: &SessionToken) -> Result<()> {
        self.client()
            .abort_multipart_upload()
            .bucket(bucket)
            .key(key.as_str())
            .upload_id(session.as_str())
            .send()
            .await
            .map_err(|e| classify("AbortMultipartUpload", None, e))?;

        info!(
            "AbortMultipartUpload bucket={} key={} uploadId={}",
            bucket, key, session
        );
        Ok(())
    }

    async fn refresh_clock_skew(&self) -> Result<()> {
        // Rebuilding drops pooled connections and reloads credentials. SDK
        // retries are off, so a skewed clock is not corrected here.
        let client = self.options.build();
        *self.client.write() = client;
        debug!("Refreshed S3 client");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_service_error() {
        assert_eq!(
            classify_service_error(Some("BadDigest"), 400),
            ErrorClass::ChecksumMismatch
        );
        assert_eq!(
            classify_service_error(Some("InvalidDigest"), 400),
            ErrorClass::ChecksumMismatch
        );
        assert_eq!(
            classify_service_error(Some("SlowDown"), 503),
            ErrorClass::Transient
        );
        assert_eq!(
            classify_service_error(Some("RequestTimeTooSkewed"), 403),
            ErrorClass::Transient
        );
        assert_eq!(classify_service_error(None, 502), ErrorClass::Transient);
        assert_eq!(classify_service_error(None, 429), ErrorClass::Transient);
        assert_eq!(
            classify_service_error(Some("AccessDenied"), 403),
            ErrorClass::Permanent
        );
        assert_eq!(
            classify_service_error(Some("NoSuchUpload"), 404),
            ErrorClass::Permanent
        );
    }

    #[test]
    fn test_debug_hides_credentials() {
        let settings = haul_core::UploadConfig {
            bucket: Some("nightly-backups".into()),
            access_key: Some("AKIDEXAMPLE".into()),
            secret_key: Some("very-secret".into()),
            endpoint: Some("http://localhost:9000".into()),
            ..Default::default()
        }
        .resolve()
        .unwrap();

        let storage = S3Storage::new(&settings);
        let debug = format!("{:?}", storage);
        assert!(debug.contains("localhost:9000"));
        assert!(!debug.contains("very-secret"));
    }
}
