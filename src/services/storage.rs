use async_trait::async_trait;
use s3::creds::Credentials;
use s3::{Bucket, Region};

/// Object storage for captured outfit photos.
#[async_trait]
pub trait ImageStorage: Send + Sync {
    /// Store the image under `key` and return the reference handed to the
    /// diagnosis processor.
    async fn put_image(&self, key: &str, data: &[u8], content_type: &str) -> Result<String, StorageError>;
}

/// S3-compatible bucket (AWS S3, Cloudflare R2, MinIO).
pub struct S3ImageStorage {
    bucket: Box<Bucket>,
    public_base_url: String,
}

impl S3ImageStorage {
    /// With `endpoint` set the bucket is addressed path-style on that host,
    /// otherwise on the AWS regional endpoint.
    pub fn new(
        bucket_name: &str,
        region: &str,
        endpoint: Option<&str>,
        access_key: &str,
        secret_key: &str,
    ) -> Result<Self, StorageError> {
        let (region, public_base_url) = match endpoint {
            Some(endpoint) => (
                Region::Custom {
                    region: region.to_string(),
                    endpoint: endpoint.to_string(),
                },
                format!("{}/{}", endpoint.trim_end_matches('/'), bucket_name),
            ),
            None => (
                region
                    .parse::<Region>()
                    .map_err(|e| StorageError::Config(e.to_string()))?,
                format!("https://{}.s3.{}.amazonaws.com", bucket_name, region),
            ),
        };

        let credentials = Credentials::new(Some(access_key), Some(secret_key), None, None, None)
            .map_err(|e| StorageError::Config(e.to_string()))?;

        let mut bucket = Bucket::new(bucket_name, region, credentials)
            .map_err(|e| StorageError::Config(e.to_string()))?;
        if endpoint.is_some() {
            bucket = bucket.with_path_style();
        }

        Ok(Self {
            bucket,
            public_base_url,
        })
    }
}

#[async_trait]
impl ImageStorage for S3ImageStorage {
    async fn put_image(&self, key: &str, data: &[u8], content_type: &str) -> Result<String, StorageError> {
        let response = self
            .bucket
            .put_object_with_content_type(key, data, content_type)
            .await
            .map_err(StorageError::S3)?;

        let status = response.status_code();
        if !(200..300).contains(&status) {
            return Err(StorageError::Rejected(status));
        }

        Ok(format!("{}/{}", self.public_base_url, key))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("S3 operation failed: {0}")]
    S3(#[from] s3::error::S3Error),

    #[error("Object storage answered with status {0}")]
    Rejected(u16),

    #[error("Storage configuration error: {0}")]
    Config(String),
}
