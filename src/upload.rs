// ABOUTME: Issues short-lived presigned PUT URLs for browser uploads
// ABOUTME: Keys live under raw_data/ and the signing backend is S3 or any S3-compatible store

use crate::config::StorageConfig;
use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::presigning::PresigningConfig;
use std::time::Duration;

pub const UPLOAD_KEY_PREFIX: &str = "raw_data/";

pub const UPLOAD_URL_VALIDITY: Duration = Duration::from_secs(10 * 60);

/// Something that can presign a write to one object key
#[async_trait]
pub trait UploadSigner: Send + Sync + 'static {
    async fn presign_put(
        &self,
        key: &str,
        content_type: &str,
        expires_in: Duration,
    ) -> Result<String>;
}

/// A signed URL and what it was signed for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadCredential {
    pub url: String,
    pub key: String,
    pub content_type: String,
    pub expires_in: Duration,
}

/// Object key for an uploaded file; the filename is used verbatim
pub fn upload_key(filename: &str) -> String {
    format!("{}{}", UPLOAD_KEY_PREFIX, filename)
}

/// Presign a PUT of `filename` with `content_type`, valid for ten minutes
///
/// Signing failures are returned as-is. Nothing is retried.
pub async fn issue_upload_url<U>(
    signer: &U,
    filename: &str,
    content_type: &str,
) -> Result<UploadCredential>
where
    U: UploadSigner + ?Sized,
{
    let key = upload_key(filename);
    let url = signer
        .presign_put(&key, content_type, UPLOAD_URL_VALIDITY)
        .await
        .with_context(|| format!("Failed to presign upload for '{}'", key))?;

    tracing::info!(
        "Issued upload URL for '{}' ({}), valid for {}s",
        key,
        content_type,
        UPLOAD_URL_VALIDITY.as_secs()
    );

    Ok(UploadCredential {
        url,
        key,
        content_type: content_type.to_string(),
        expires_in: UPLOAD_URL_VALIDITY,
    })
}

/// Presigns against one bucket with the AWS SDK
#[derive(Debug, Clone)]
pub struct S3UploadSigner {
    client: aws_sdk_s3::Client,
    bucket: String,
}

impl S3UploadSigner {
    pub fn new(client: aws_sdk_s3::Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
        }
    }

    /// Build a client from `[storage]` settings and the default credential chain
    ///
    /// Credentials come from the usual AWS sources (environment, profile,
    /// instance metadata). `endpoint` and `force_path_style` make MinIO and
    /// similar stores work.
    pub async fn from_config(storage: &StorageConfig) -> Result<Self> {
        let bucket = storage.require_bucket()?.to_string();

        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(region) = &storage.region {
            loader = loader.region(Region::new(region.clone()));
        }
        if let Some(endpoint) = &storage.endpoint {
            loader = loader.endpoint_url(endpoint);
        }
        let sdk_config = loader.load().await;

        let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(storage.force_path_style)
            .build();

        tracing::debug!(
            "Configured S3 signer for bucket '{}' (endpoint: {})",
            bucket,
            storage.endpoint.as_deref().unwrap_or("default")
        );

        Ok(Self::new(aws_sdk_s3::Client::from_conf(s3_config), bucket))
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }
}

#[async_trait]
impl UploadSigner for S3UploadSigner {
    async fn presign_put(
        &self,
        key: &str,
        content_type: &str,
        expires_in: Duration,
    ) -> Result<String> {
        let presigning = PresigningConfig::expires_in(expires_in)
            .context("Invalid presigned URL validity")?;

        let request = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .presigned(presigning)
            .await
            .map_err(|e| anyhow::anyhow!("S3 presigning failed: {}", DisplayErrorContext(&e)))?;

        Ok(request.uri().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aws_sdk_s3::config::Credentials;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSigner {
        calls: Mutex<Vec<(String, String, Duration)>>,
    }

    #[async_trait]
    impl UploadSigner for RecordingSigner {
        async fn presign_put(
            &self,
            key: &str,
            content_type: &str,
            expires_in: Duration,
        ) -> Result<String> {
            self.calls
                .lock()
                .unwrap()
                .push((key.to_string(), content_type.to_string(), expires_in));
            Ok(format!("https://signed.example/{}", key))
        }
    }

    struct DownSigner;

    #[async_trait]
    impl UploadSigner for DownSigner {
        async fn presign_put(&self, _: &str, _: &str, _: Duration) -> Result<String> {
            anyhow::bail!("signing service unavailable")
        }
    }

    fn offline_s3_signer() -> S3UploadSigner {
        let config = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new("eu-west-3"))
            .credentials_provider(Credentials::new(
                "AKIDEXAMPLE",
                "wJalrXUtnFEMI/K7MDENG/bPxRfiCYEXAMPLEKEY",
                None,
                None,
                "test",
            ))
            .build();
        S3UploadSigner::new(aws_sdk_s3::Client::from_conf(config), "uploads")
    }

    #[test]
    fn test_upload_key_is_verbatim() {
        assert_eq!(upload_key("a.png"), "raw_data/a.png");
        assert_eq!(upload_key("../x y.png"), "raw_data/../x y.png");
    }

    #[tokio::test]
    async fn test_issue_upload_url_scopes_key_and_validity() {
        let signer = RecordingSigner::default();
        let credential = issue_upload_url(&signer, "a.png", "image/png").await.unwrap();

        assert_eq!(credential.key, "raw_data/a.png");
        assert_eq!(credential.url, "https://signed.example/raw_data/a.png");
        assert_eq!(credential.expires_in, Duration::from_secs(600));

        let calls = signer.calls.lock().unwrap();
        assert_eq!(
            *calls,
            vec![(
                "raw_data/a.png".to_string(),
                "image/png".to_string(),
                Duration::from_secs(600)
            )]
        );
    }

    #[tokio::test]
    async fn test_issue_upload_url_propagates_signing_failure() {
        let err = issue_upload_url(&DownSigner, "a.png", "image/png")
            .await
            .unwrap_err();
        let message = format!("{:#}", err);
        assert!(message.contains("raw_data/a.png"));
        assert!(message.contains("signing service unavailable"));
    }

    #[tokio::test]
    async fn test_s3_signer_produces_presigned_put_url() {
        let signer = offline_s3_signer();
        let credential = issue_upload_url(&signer, "a.png", "image/png").await.unwrap();

        assert!(credential.url.contains("uploads"));
        assert!(credential.url.contains("/raw_data/a.png?"));
        assert!(credential.url.contains("X-Amz-Expires=600"));
        assert!(credential.url.contains("X-Amz-Signature="));
    }

    #[tokio::test]
    async fn test_from_config_requires_bucket() {
        let storage = StorageConfig::default();
        assert!(S3UploadSigner::from_config(&storage).await.is_err());
    }
}
